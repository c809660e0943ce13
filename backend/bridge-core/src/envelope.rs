//! Error envelope and result envelopes.
//!
//! Failures cross the process boundary as [`ErrorInfo`], a plain serializable
//! description. Building one never fails, whatever the failure value was: a
//! structured error, something that only implements `Display`, or the payload
//! of a panic. The receiving side turns it back into a [`RemoteError`].

use std::any::Any;
use std::error::Error as StdError;
use std::fmt::{Display, Formatter, Result as FormatResult};

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

const PANIC_KIND: &str = "panic";
const NON_STRING_PANIC_MESSAGE: &str = "handler panicked with a non-string payload";

/// Normalized failure description carried inside envelopes and control frames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorInfo {
    pub message: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<Value>,
}

impl ErrorInfo {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: None,
            detail: None,
        }
    }

    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }

    pub fn with_detail(mut self, detail: Value) -> Self {
        self.detail = Some(detail);
        self
    }

    /// Wraps a structured error. The `source()` chain is kept as detail.
    pub fn from_error(error: &(dyn StdError + 'static)) -> Self {
        let mut causes = Vec::new();
        let mut current = error.source();
        while let Some(cause) = current {
            causes.push(Value::String(cause.to_string()));
            current = cause.source();
        }

        let info = Self::new(error.to_string());
        if causes.is_empty() {
            info
        } else {
            info.with_detail(json!({ "causes": causes }))
        }
    }

    /// Wraps anything printable.
    pub fn from_display(value: impl Display) -> Self {
        Self::new(value.to_string())
    }

    /// Wraps the payload of a caught panic.
    ///
    /// `panic!` with a literal or a formatted message yields a `&str` or a
    /// `String`; any other payload is coerced into a fixed message.
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = match payload.downcast::<String>() {
            Ok(message) => *message,
            Err(payload) => match payload.downcast::<&'static str>() {
                Ok(message) => (*message).to_string(),
                Err(_) => NON_STRING_PANIC_MESSAGE.to_string(),
            },
        };
        Self::new(message).with_kind(PANIC_KIND)
    }

    /// Rebuilds an error value on the receiving side.
    pub fn into_remote(self) -> RemoteError {
        RemoteError { info: self }
    }
}

impl From<&crate::error::BoxError> for ErrorInfo {
    fn from(error: &crate::error::BoxError) -> Self {
        ErrorInfo::from_error(error.as_ref())
    }
}

impl From<crate::error::dispatch::DispatchError> for ErrorInfo {
    fn from(error: crate::error::dispatch::DispatchError) -> Self {
        ErrorInfo::from_error(&error).with_kind("dispatch")
    }
}

/// A failure reconstructed from an [`ErrorInfo`] received over the bridge.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteError {
    info: ErrorInfo,
}

impl RemoteError {
    pub fn message(&self) -> &str {
        &self.info.message
    }

    pub fn kind(&self) -> Option<&str> {
        self.info.kind.as_deref()
    }

    pub fn detail(&self) -> Option<&Value> {
        self.info.detail.as_ref()
    }

    pub fn info(&self) -> &ErrorInfo {
        &self.info
    }
}

impl Display for RemoteError {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> FormatResult {
        formatter.write_str(&self.info.message)
    }
}

impl StdError for RemoteError {}

/// Result of a unary call: exactly one of `{value}` or `{error}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnaryEnvelope<U = Value> {
    Value(U),
    Error(ErrorInfo),
}

impl<U> UnaryEnvelope<U> {
    pub fn into_result(self) -> Result<U, RemoteError> {
        match self {
            UnaryEnvelope::Value(value) => Ok(value),
            UnaryEnvelope::Error(info) => Err(info.into_remote()),
        }
    }
}

/// One live event on a subscription channel.
///
/// The terminal sentinel is not a variant of this type: it is the absence of
/// an event (`None`, `null` on the wire).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionEvent<U = Value> {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<U>,
}

impl<U> SubscriptionEvent<U> {
    pub fn message(message: U) -> Self {
        Self {
            error: None,
            message: Some(message),
        }
    }

    pub fn error(error: ErrorInfo) -> Self {
        Self {
            error: Some(error),
            message: None,
        }
    }
}
