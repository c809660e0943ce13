use super::Bridge;
use crate::envelope::{ErrorInfo, UnaryEnvelope};
use crate::error::BoxError;
use crate::error::dispatch::DispatchError;

use std::future::Future;
use std::marker::PhantomData;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use log::{debug, warn};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

pub(crate) trait UnaryHandler: Send + Sync + 'static {
    fn call(&self, input: Value) -> BoxFuture<'static, Result<Value, ErrorInfo>>;
}

struct TypedUnary<F, I, O, E, Fut> {
    name: String,
    handler: F,
    _phantom: PhantomData<fn(I) -> (O, E, Fut)>,
}

impl<F, I, O, E, Fut> UnaryHandler for TypedUnary<F, I, O, E, Fut>
where
    F: Fn(I) -> Fut + Send + Sync + 'static,
    I: DeserializeOwned + Send + 'static,
    O: Serialize + Send + 'static,
    E: Into<BoxError> + Send + 'static,
    Fut: Future<Output = Result<O, E>> + Send + 'static,
{
    fn call(&self, input: Value) -> BoxFuture<'static, Result<Value, ErrorInfo>> {
        let input: I = match serde_json::from_value(input) {
            Ok(input) => input,
            Err(e) => {
                let error = DispatchError::invalid_input(&self.name, e);
                return Box::pin(async move { Err(ErrorInfo::from(error)) });
            }
        };

        // A handler may panic while building its future, not only while running it.
        let future = match catch_unwind(AssertUnwindSafe(|| (self.handler)(input))) {
            Ok(future) => future,
            Err(payload) => {
                let error = ErrorInfo::from_panic(payload);
                return Box::pin(async move { Err(error) });
            }
        };

        let name = self.name.clone();
        Box::pin(async move {
            match AssertUnwindSafe(future).catch_unwind().await {
                Ok(Ok(output)) => serde_json::to_value(output)
                    .map_err(|e| ErrorInfo::from(DispatchError::invalid_output(&name, e))),
                Ok(Err(error)) => {
                    let error: BoxError = error.into();
                    Err(ErrorInfo::from(&error))
                }
                Err(payload) => Err(ErrorInfo::from_panic(payload)),
            }
        })
    }
}

impl Bridge {
    /// Registers a unary operation under `name`.
    ///
    /// The handler runs once per request with the decoded input. Its output
    /// becomes `{value}`; an error, a panic, or undecodable input becomes
    /// `{error}`. No serialization is imposed between concurrent requests.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::DuplicateRegistration`] if `name` is taken.
    #[track_caller]
    pub fn handle<F, I, O, E, Fut>(&self, name: &str, handler: F) -> Result<(), DispatchError>
    where
        F: Fn(I) -> Fut + Send + Sync + 'static,
        I: DeserializeOwned + Send + 'static,
        O: Serialize + Send + 'static,
        E: Into<BoxError> + Send + 'static,
        Fut: Future<Output = Result<O, E>> + Send + 'static,
    {
        let handler = TypedUnary {
            name: name.to_string(),
            handler,
            _phantom: PhantomData,
        };
        self.inner.unary.insert(name, Arc::new(handler))
    }

    /// Executes one unary request received on `channel`.
    ///
    /// Always produces exactly one envelope.
    pub async fn call(&self, channel: &str, input: Value) -> UnaryEnvelope {
        let Some(handler) = self.inner.unary.get(channel) else {
            warn!("Unary call on unregistered channel {channel}");
            return UnaryEnvelope::Error(DispatchError::unknown_operation(channel).into());
        };

        debug!("Dispatching unary call on {channel}");
        match handler.call(input).await {
            Ok(value) => UnaryEnvelope::Value(value),
            Err(error) => {
                debug!("Unary call on {channel} failed: {}", error.message);
                UnaryEnvelope::Error(error)
            }
        }
    }
}
