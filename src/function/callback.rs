//! Argument extraction and result interpretation for event and typed functions.
//!
//! Event and typed functions are plain async closures. Their parameter and
//! return types are described by [`Param`] and [`FunctionOutput`], which lets
//! the registry derive a [`Signature`] for validation and build a type-erased
//! [`DynCallback`] that decodes arguments from the request body.

use super::handler::Context;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::any::{type_name, TypeId};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Boxed future yielding the interpreted result of one call.
pub type OutcomeFuture = Pin<Box<dyn Future<Output = Outcome> + Send>>;

/// JSON-decoded argument, or JSON-encoded return value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Json<T>(pub T);

/// Shape of one parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    Context,
    Data(&'static str),
}

/// Shape of one return value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnKind {
    Value(&'static str),
    Error,
}

/// Parameter and return shapes of a callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    pub params: Vec<ParamKind>,
    pub returns: Vec<ReturnKind>,
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let params: Vec<&str> = self
            .params
            .iter()
            .map(|p| match p {
                ParamKind::Context => "Context",
                ParamKind::Data(name) => *name,
            })
            .collect();
        let returns: Vec<&str> = self
            .returns
            .iter()
            .map(|r| match r {
                ReturnKind::Value(name) => *name,
                ReturnKind::Error => "error",
            })
            .collect();
        write!(f, "fn({}) -> ({})", params.join(", "), returns.join(", "))
    }
}

/// Inputs available to parameter extraction.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub ctx: Context,
    pub data: Bytes,
}

/// A type that can appear as a callback parameter.
pub trait Param: Sized + Send + 'static {
    fn kind() -> ParamKind;
    fn extract(invocation: &Invocation) -> Result<Self, serde_json::Error>;
}

impl Param for Context {
    fn kind() -> ParamKind {
        ParamKind::Context
    }

    fn extract(invocation: &Invocation) -> Result<Self, serde_json::Error> {
        Ok(invocation.ctx.clone())
    }
}

impl<T> Param for Json<T>
where
    T: DeserializeOwned + Send + 'static,
{
    fn kind() -> ParamKind {
        ParamKind::Data(type_name::<T>())
    }

    fn extract(invocation: &Invocation) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(&invocation.data).map(Json)
    }
}

/// Result of one call, as the adapters see it.
#[derive(Debug)]
pub enum Outcome {
    /// Success with nothing to write.
    Empty,
    /// Success with a JSON body.
    Value(Vec<u8>),
    /// The function returned an error.
    Failed(String),
    /// The returned value could not be encoded.
    Unencodable(serde_json::Error),
}

fn encode<R: Serialize>(value: &R) -> Outcome {
    match serde_json::to_vec(value) {
        Ok(body) => Outcome::Value(body),
        Err(err) => Outcome::Unencodable(err),
    }
}

fn is_unit<R: 'static>() -> bool {
    TypeId::of::<R>() == TypeId::of::<()>()
}

/// A type that can be awaited from a callback.
pub trait FunctionOutput: Send + 'static {
    fn returns() -> Vec<ReturnKind>;
    fn into_outcome(self) -> Outcome;
}

impl FunctionOutput for () {
    fn returns() -> Vec<ReturnKind> {
        Vec::new()
    }

    fn into_outcome(self) -> Outcome {
        Outcome::Empty
    }
}

impl<R, E> FunctionOutput for Result<R, E>
where
    R: Serialize + Send + 'static,
    E: fmt::Display + Send + 'static,
{
    fn returns() -> Vec<ReturnKind> {
        if is_unit::<R>() {
            vec![ReturnKind::Error]
        } else {
            vec![ReturnKind::Value(type_name::<R>()), ReturnKind::Error]
        }
    }

    fn into_outcome(self) -> Outcome {
        match self {
            Ok(_) if is_unit::<R>() => Outcome::Empty,
            Ok(value) => encode(&value),
            Err(err) => Outcome::Failed(err.to_string()),
        }
    }
}

impl<R> FunctionOutput for Json<R>
where
    R: Serialize + Send + 'static,
{
    fn returns() -> Vec<ReturnKind> {
        vec![ReturnKind::Value(type_name::<R>())]
    }

    fn into_outcome(self) -> Outcome {
        encode(&self.0)
    }
}

/// An async closure usable as an event or typed function.
///
/// `Args` is the tuple of parameter types; it is inferred from the closure.
pub trait Callback<Args>: Clone + Send + Sync + 'static {
    fn signature() -> Signature;

    /// Decode the arguments and start the call. Decoding fails before any
    /// user code runs.
    fn prepare(&self, invocation: &Invocation) -> Result<OutcomeFuture, serde_json::Error>;
}

macro_rules! impl_callback {
    ($($ty:ident),*) => {
        impl<F, Fut, O, $($ty,)*> Callback<($($ty,)*)> for F
        where
            F: Fn($($ty),*) -> Fut + Clone + Send + Sync + 'static,
            Fut: Future<Output = O> + Send + 'static,
            O: FunctionOutput,
            $($ty: Param,)*
        {
            fn signature() -> Signature {
                Signature {
                    params: vec![$($ty::kind()),*],
                    returns: O::returns(),
                }
            }

            #[allow(non_snake_case, unused_variables)]
            fn prepare(&self, invocation: &Invocation) -> Result<OutcomeFuture, serde_json::Error> {
                $(let $ty = $ty::extract(invocation)?;)*
                let fut = (self)($($ty),*);
                Ok(Box::pin(async move { fut.await.into_outcome() }))
            }
        }
    };
}

impl_callback!();
impl_callback!(T1);
impl_callback!(T1, T2);
impl_callback!(T1, T2, T3);

type Prepare = dyn Fn(&Invocation) -> Result<OutcomeFuture, serde_json::Error> + Send + Sync;

/// A callback with its argument types erased.
#[derive(Clone)]
pub struct DynCallback {
    signature: Signature,
    prepare: Arc<Prepare>,
}

impl DynCallback {
    pub fn new<F, Args>(f: F) -> Self
    where
        F: Callback<Args>,
    {
        Self {
            signature: F::signature(),
            prepare: Arc::new(move |invocation: &Invocation| f.prepare(invocation)),
        }
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    pub fn prepare(&self, invocation: &Invocation) -> Result<OutcomeFuture, serde_json::Error> {
        (self.prepare)(invocation)
    }
}

impl fmt::Debug for DynCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DynCallback")
            .field("signature", &self.signature.to_string())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, Serialize)]
    struct Input {
        id: i64,
        name: String,
    }

    fn invocation(data: &'static str) -> Invocation {
        Invocation {
            ctx: Context::new("f", "1"),
            data: Bytes::from_static(data.as_bytes()),
        }
    }

    fn signature_of<F: Callback<Args>, Args>(_f: &F) -> Signature {
        F::signature()
    }

    #[test]
    fn test_signatures() {
        let event = |_ctx: Context, _data: Json<Input>| async { Ok::<(), String>(()) };
        assert_eq!(
            signature_of(&event).params,
            vec![ParamKind::Context, ParamKind::Data(type_name::<Input>())]
        );
        assert_eq!(signature_of(&event).returns, vec![ReturnKind::Error]);

        let typed = |Json(input): Json<Input>| async move { Ok::<_, String>(input.id) };
        assert_eq!(
            signature_of(&typed).returns,
            vec![ReturnKind::Value("i64"), ReturnKind::Error]
        );

        let bare = |_input: Json<Input>| async {};
        assert!(signature_of(&bare).returns.is_empty());

        let value_only = |Json(input): Json<Input>| async move { Json(input.name) };
        assert_eq!(
            signature_of(&value_only).returns,
            vec![ReturnKind::Value(type_name::<String>())]
        );
    }

    #[tokio::test]
    async fn test_prepare_and_call() {
        let f = DynCallback::new(|Json(input): Json<Input>| async move {
            Ok::<_, String>(input.name.to_uppercase())
        });
        match f.prepare(&invocation(r#"{"id": 1, "name": "abc"}"#)).unwrap().await {
            Outcome::Value(body) => assert_eq!(body, br#""ABC""#),
            other => panic!("unexpected outcome {other:?}"),
        }

        assert!(f.prepare(&invocation(r#"{"id": 12345, "name": 5}"#)).is_err());
    }

    #[tokio::test]
    async fn test_error_outcome() {
        let f = DynCallback::new(|ctx: Context, _data: Json<serde_json::Value>| async move {
            Err::<(), _>(format!("failed in {}", ctx.function_name))
        });
        match f.prepare(&invocation("{}")).unwrap().await {
            Outcome::Failed(msg) => assert_eq!(msg, "failed in f"),
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[test]
    fn test_signature_display() {
        let f = DynCallback::new(|_ctx: Context, _data: Json<u32>| async { Ok::<(), String>(()) });
        assert_eq!(f.signature().to_string(), "fn(Context, u32) -> (error)");
    }
}
