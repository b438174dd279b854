//! Route table mapping request paths to registered functions.

use super::adapter::Invoker;
use super::config::ServerConfig;
use crate::error::ServerError;
use crate::function::{RegisteredFunction, Registry};
use crate::http::{FunctionRequest, FunctionResponse, StatusCode};
use std::sync::Arc;
use tracing::{debug, info};

/// A path pattern bound to a function.
///
/// A pattern ending in `/` matches every path below it; any other pattern
/// matches only itself.
#[derive(Debug, Clone)]
pub struct Route {
    pattern: String,
    invoker: Arc<Invoker>,
}

impl Route {
    pub fn new(pattern: impl Into<String>, invoker: Invoker) -> Self {
        let mut pattern = pattern.into();
        if !pattern.starts_with('/') {
            pattern.insert(0, '/');
        }
        Self {
            pattern,
            invoker: Arc::new(invoker),
        }
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn function(&self) -> &RegisteredFunction {
        self.invoker.function()
    }

    /// Check if this route matches the given path.
    pub fn matches(&self, path: &str) -> bool {
        if self.pattern.ends_with('/') {
            path.starts_with(&self.pattern)
        } else {
            self.pattern == path
        }
    }
}

/// Route table built once from a registry at startup.
#[derive(Debug, Clone, Default)]
pub struct Router {
    routes: Vec<Route>,
}

impl Router {
    /// Create an empty router. Every request gets a 404.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind functions from `registry`.
    ///
    /// With a function target in `config`, only that function is bound, at
    /// `/`. The target names a registered function; when no function has
    /// that name the last function registered without a name is used.
    /// Without a target, every function is bound at its own path.
    pub fn from_registry(registry: &Registry, config: &ServerConfig) -> Result<Self, ServerError> {
        let timeout = config.timeout();
        let mut router = Self::new();

        match config.function_target.as_deref() {
            Some(target) => {
                let function = registry
                    .get_registered_function(target)
                    .or_else(|| registry.get_last_function_without_name())
                    .ok_or_else(|| ServerError::NoMatchingFunction(target.to_string()))?;
                router.add(Route::new("/", Invoker::new(function.clone(), timeout)))?;
            }
            None => {
                for function in registry.get_all_functions() {
                    router.add(Route::new(
                        function.path.clone(),
                        Invoker::new(function.clone(), timeout),
                    ))?;
                }
            }
        }

        for route in &router.routes {
            info!(
                "Serving {} function {} at {}",
                route.function().kind.as_str(),
                route.function().display_name(),
                route.pattern
            );
        }
        Ok(router)
    }

    /// Add a route. Each pattern can be bound once.
    pub fn add(&mut self, route: Route) -> Result<(), ServerError> {
        if self.routes.iter().any(|r| r.pattern == route.pattern) {
            return Err(ServerError::DuplicateRoute(route.pattern));
        }
        self.routes.push(route);
        // Longest pattern first, so the most specific match wins.
        self.routes
            .sort_by(|a, b| b.pattern.len().cmp(&a.pattern.len()));
        Ok(())
    }

    /// Find the route for a path.
    pub fn find(&self, path: &str) -> Option<&Route> {
        self.routes.iter().find(|r| r.matches(path))
    }

    /// List all routes, most specific first.
    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Route a request to its function and return the function's response.
    pub async fn dispatch(&self, req: FunctionRequest) -> FunctionResponse {
        match self.find(req.path()) {
            Some(route) => route.invoker.invoke(req).await,
            None => {
                debug!("No route for {}", req.path());
                FunctionResponse::new(StatusCode::NOT_FOUND)
                    .header("Content-Type", "text/plain; charset=utf-8")
                    .body("404 page not found\n")
            }
        }
    }
}
