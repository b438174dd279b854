//! Declarative registration into the default registry.
//!
//! Each helper registers under `name`, so the function is served at `/`
//! when the server's function target is `name`. Registration failures are
//! programming errors and panic.

use crate::error::RegistrationError;
use crate::function::{
    default_registry, with_name, Callback, CloudEventFunction, HttpFunction, Registry,
};
use std::sync::PoisonError;
use tracing::error;

fn register_default(
    name: &str,
    register: impl FnOnce(&mut Registry) -> Result<(), RegistrationError>,
) {
    let result = {
        let mut registry = default_registry()
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        register(&mut registry)
    };
    if let Err(err) = result {
        error!("failure to register function {}: {}", name, err);
        panic!("failure to register function: {err}");
    }
}

/// Register an HTTP function.
pub fn http<F>(name: &str, f: F)
where
    F: HttpFunction + 'static,
{
    register_default(name, |r| r.register_http(f, with_name(name)));
}

/// Register a CloudEvent function.
pub fn cloud_event<F>(name: &str, f: F)
where
    F: CloudEventFunction + 'static,
{
    register_default(name, |r| r.register_cloud_event(f, with_name(name)));
}

/// Register an event function.
pub fn event<F, Args>(name: &str, f: F)
where
    F: Callback<Args>,
{
    register_default(name, |r| r.register_event(f, with_name(name)));
}

/// Register a typed function. It takes one `Json<T>` input and may return a
/// value, an error, both, or nothing.
pub fn typed<F, Args>(name: &str, f: F)
where
    F: Callback<Args>,
{
    register_default(name, |r| r.register_typed(f, with_name(name)));
}
