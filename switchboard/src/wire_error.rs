use std::collections::BTreeMap;

use crate::{BoxError, Error};

/// The code of a `WireError`.
///
/// Codes travel as plain strings, so a code this crate does not know about (an application
/// code, or one from a newer peer) is preserved as `Custom`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ErrorCode {
    /// The request was malformed or could not be routed.
    BadRequest,
    /// The requested thing does not exist.
    NotFound,
    /// The handler failed unexpectedly.
    InternalService,
    /// Something did not finish in time.
    Timeout,
    /// The caller is not allowed to do this.
    Forbidden,
    /// The caller is not authenticated.
    Unauthorized,
    /// The request conflicts with current state.
    PreconditionFailed,
    /// A downstream response could not be understood.
    BadResponse,
    /// Application-defined code, passed through unchanged.
    Custom(String),
}

impl ErrorCode {
    /// The string form used on the wire.
    pub fn as_str(&self) -> &str {
        match self {
            ErrorCode::BadRequest => "bad_request",
            ErrorCode::NotFound => "not_found",
            ErrorCode::InternalService => "internal_service",
            ErrorCode::Timeout => "timeout",
            ErrorCode::Forbidden => "forbidden",
            ErrorCode::Unauthorized => "unauthorized",
            ErrorCode::PreconditionFailed => "precondition_failed",
            ErrorCode::BadResponse => "bad_response",
            ErrorCode::Custom(code) => code,
        }
    }
}

impl From<&str> for ErrorCode {
    fn from(code: &str) -> Self {
        match code {
            "bad_request" => ErrorCode::BadRequest,
            "not_found" => ErrorCode::NotFound,
            "internal_service" => ErrorCode::InternalService,
            "timeout" => ErrorCode::Timeout,
            "forbidden" => ErrorCode::Forbidden,
            "unauthorized" => ErrorCode::Unauthorized,
            "precondition_failed" => ErrorCode::PreconditionFailed,
            "bad_response" => ErrorCode::BadResponse,
            // an empty code carries no information, so it gets the default
            "" => ErrorCode::InternalService,
            other => ErrorCode::Custom(other.to_string()),
        }
    }
}

impl From<String> for ErrorCode {
    fn from(code: String) -> Self {
        match ErrorCode::from(code.as_str()) {
            // reuse the allocation
            ErrorCode::Custom(_) => ErrorCode::Custom(code),
            known => known,
        }
    }
}

impl From<ErrorCode> for String {
    fn from(code: ErrorCode) -> Self {
        match code {
            ErrorCode::Custom(code) => code,
            known => known.as_str().to_string(),
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A coded error that can cross the transport boundary.
///
/// This is what an error `Response` carries as its payload. It is encoded with the same codec
/// as a regular response would have been, and a caller that decodes it gets back the same
/// `code` and `message` that were set where the error was raised.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize, thiserror::Error)]
#[error("{message}")]
pub struct WireError {
    /// What kind of failure this is.
    pub code: ErrorCode,
    /// Human readable description.
    pub message: String,
    /// Structured detail.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub params: BTreeMap<String, String>,
    /// The error this one wraps, if it is known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[source]
    pub cause: Option<Box<WireError>>,
}

impl WireError {
    /// A new error with a code and a message.
    pub fn new(code: impl Into<ErrorCode>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            params: Default::default(),
            cause: None,
        }
    }

    /// `bad_request`
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::BadRequest, message)
    }

    /// `not_found`
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotFound, message)
    }

    /// `internal_service`
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalService, message)
    }

    /// `timeout`
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Timeout, message)
    }

    /// `forbidden`
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Forbidden, message)
    }

    /// `unauthorized`
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Unauthorized, message)
    }

    /// `precondition_failed`
    pub fn precondition_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::PreconditionFailed, message)
    }

    /// Attach a structured parameter.
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Attach the error that caused this one.
    pub fn with_cause(mut self, cause: WireError) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    /// Normalize whatever a handler returned.
    ///
    /// A `WireError` is kept as it is. A switchboard `Error` keeps its code, so a downstream
    /// timeout is reported as `timeout`. Anything else has no code, and becomes
    /// `internal_service` with its display text as the message.
    pub fn from_handler_error(error: BoxError) -> Self {
        let error = match error.downcast::<WireError>() {
            Ok(wire_error) => return *wire_error,
            Err(error) => error,
        };
        match error.downcast::<Error>() {
            Ok(error) => error.into_wire_error(),
            Err(other) => WireError::internal(other.to_string()),
        }
    }
}
