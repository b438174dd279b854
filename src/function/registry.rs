//! Function registry.
//!
//! Functions are registered once at startup, then read while serving. Named
//! functions are unique by name; unnamed ones are kept in registration order
//! and the last of them is the fallback target.

use super::callback::{Callback, DynCallback};
use super::handler::{CloudEventFunction, HttpFunction};
use super::signature::{validate_event_function, validate_typed_function};
use crate::error::RegistrationError;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, LazyLock, RwLock};
use tracing::{debug, info};

/// Name and path a function is registered under.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FunctionOptions {
    pub name: Option<String>,
    pub path: Option<String>,
}

impl FunctionOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }
}

/// Options naming a function.
pub fn with_name(name: impl Into<String>) -> FunctionOptions {
    FunctionOptions::new().with_name(name)
}

/// Options binding a function to a path.
pub fn with_path(path: impl Into<String>) -> FunctionOptions {
    FunctionOptions::new().with_path(path)
}

/// The callback of a registered function, tagged by kind.
#[derive(Clone)]
pub enum FunctionKind {
    Http(Arc<dyn HttpFunction>),
    CloudEvent(Arc<dyn CloudEventFunction>),
    Event(DynCallback),
    Typed(DynCallback),
}

impl FunctionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FunctionKind::Http(_) => "http",
            FunctionKind::CloudEvent(_) => "cloudevent",
            FunctionKind::Event(_) => "event",
            FunctionKind::Typed(_) => "typed",
        }
    }
}

impl fmt::Debug for FunctionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FunctionKind::Event(cb) | FunctionKind::Typed(cb) => {
                write!(f, "{}({})", self.as_str(), cb.signature())
            }
            _ => f.write_str(self.as_str()),
        }
    }
}

/// A function with its identity.
#[derive(Debug, Clone)]
pub struct RegisteredFunction {
    pub name: Option<String>,
    pub path: String,
    pub kind: FunctionKind,
}

impl RegisteredFunction {
    /// Name for logs: the registered name, or the path when unnamed.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.path)
    }
}

/// Registry of functions served by this process.
#[derive(Debug, Default)]
pub struct Registry {
    functions: HashMap<String, RegisteredFunction>,
    order: Vec<String>,
    unnamed: Vec<RegisteredFunction>,
}

impl Registry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an HTTP function.
    pub fn register_http<F>(&mut self, f: F, opts: FunctionOptions) -> Result<(), RegistrationError>
    where
        F: HttpFunction + 'static,
    {
        self.register(FunctionKind::Http(Arc::new(f)), opts)
    }

    /// Register a CloudEvent function.
    pub fn register_cloud_event<F>(
        &mut self,
        f: F,
        opts: FunctionOptions,
    ) -> Result<(), RegistrationError>
    where
        F: CloudEventFunction + 'static,
    {
        self.register(FunctionKind::CloudEvent(Arc::new(f)), opts)
    }

    /// Register an event function taking `(Context, Json<T>)` and returning
    /// `Result<(), E>`.
    pub fn register_event<F, Args>(
        &mut self,
        f: F,
        opts: FunctionOptions,
    ) -> Result<(), RegistrationError>
    where
        F: Callback<Args>,
    {
        let callback = DynCallback::new(f);
        validate_event_function(callback.signature())?;
        self.register(FunctionKind::Event(callback), opts)
    }

    /// Register a typed function taking one `Json<T>` input.
    pub fn register_typed<F, Args>(
        &mut self,
        f: F,
        opts: FunctionOptions,
    ) -> Result<(), RegistrationError>
    where
        F: Callback<Args>,
    {
        let callback = DynCallback::new(f);
        validate_typed_function(callback.signature())?;
        self.register(FunctionKind::Typed(callback), opts)
    }

    fn register(
        &mut self,
        kind: FunctionKind,
        opts: FunctionOptions,
    ) -> Result<(), RegistrationError> {
        let name = opts.name.filter(|n| !n.is_empty());
        let path = opts.path.filter(|p| !p.is_empty());

        let Some(name) = name else {
            let path = path.ok_or(RegistrationError::MissingNameAndPath)?;
            debug!("Registered unnamed {} function at {}", kind.as_str(), path);
            self.unnamed.push(RegisteredFunction {
                name: None,
                path,
                kind,
            });
            return Ok(());
        };

        if self.functions.contains_key(&name) {
            return Err(RegistrationError::DuplicateName(name));
        }

        let path = path.unwrap_or_else(|| format!("/{name}"));
        info!("Registered {} function {} at {}", kind.as_str(), name, path);
        self.order.push(name.clone());
        self.functions.insert(
            name.clone(),
            RegisteredFunction {
                name: Some(name),
                path,
                kind,
            },
        );
        Ok(())
    }

    /// Look up a named function.
    pub fn get_registered_function(&self, name: &str) -> Option<&RegisteredFunction> {
        self.functions.get(name)
    }

    /// All functions: named ones in registration order, then unnamed ones.
    pub fn get_all_functions(&self) -> Vec<&RegisteredFunction> {
        self.order
            .iter()
            .filter_map(|name| self.functions.get(name))
            .chain(self.unnamed.iter())
            .collect()
    }

    /// The most recently registered unnamed function.
    pub fn get_last_function_without_name(&self) -> Option<&RegisteredFunction> {
        self.unnamed.last()
    }

    pub fn len(&self) -> usize {
        self.functions.len() + self.unnamed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove every registration.
    pub fn reset(&mut self) {
        self.functions.clear();
        self.order.clear();
        self.unnamed.clear();
    }
}

static DEFAULT_REGISTRY: LazyLock<RwLock<Registry>> =
    LazyLock::new(|| RwLock::new(Registry::new()));

/// The process-wide registry used by [`crate::functions`].
pub fn default_registry() -> &'static RwLock<Registry> {
    &DEFAULT_REGISTRY
}
