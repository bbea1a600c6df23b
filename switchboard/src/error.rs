use std::time::Duration;

use crate::{codec::CodecError, ErrorCode, WireError};

/// Result type for switchboard.
pub type Result<T> = std::result::Result<T, Error>;

/// The error type handlers return. Anything that is an error can be returned from a handler;
/// a `WireError` keeps its code, a switchboard `Error` maps onto its code, and everything
/// else is reported to the caller as `internal_service`.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Error type for switchboard.
///
/// `Remote` is the only variant that means the request reached a server. Every other
/// variant is a local or transport-level failure, and the remote may never have seen the request.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No response arrived before the deadline. The request is abandoned on this side.
    #[error("Request to {service}/{endpoint} timed out after {after:?}")]
    Timeout {
        /// Target service
        service: String,
        /// Target endpoint
        endpoint: String,
        /// How long the caller waited
        after: Duration,
    },
    /// The transport has been killed.
    #[error("Transport is closed")]
    TransportClosed,
    /// Nothing is bound to the requested service on this transport.
    #[error("No route to service {0}")]
    NoRoute(String),
    /// The request was dropped on the serving side before anything answered it.
    #[error("Request to {0} was dropped without a response")]
    Dropped(String),
    /// The request can not be sent as built.
    #[error("Invalid request: {0}")]
    InvalidRequest(&'static str),
    /// A `Call` could not be turned into a request. Carries a `bad_request` error.
    #[error("Invalid call: {0}")]
    InvalidCall(WireError),
    /// A lifecycle method was called in the wrong state.
    #[error("Invalid state: {0}")]
    InvalidState(&'static str),
    /// Encoding or decoding failed locally.
    #[error("Codec failure: {0}")]
    Codec(#[from] CodecError),
    /// The remote answered with an error response.
    #[error("Remote error: {0}")]
    Remote(#[from] WireError),
}

impl Error {
    /// The wire code a caller would see if this error were sent over the wire.
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::Timeout { .. } => ErrorCode::Timeout,
            Error::TransportClosed
            | Error::NoRoute(_)
            | Error::Dropped(_)
            | Error::InvalidState(_) => {
                ErrorCode::InternalService
            }
            Error::InvalidRequest(_) | Error::Codec(_) => ErrorCode::BadRequest,
            Error::InvalidCall(wire_error) | Error::Remote(wire_error) => wire_error.code.clone(),
        }
    }

    /// Convert into the wire representation, preserving the code.
    pub fn into_wire_error(self) -> WireError {
        match self {
            Error::InvalidCall(wire_error) | Error::Remote(wire_error) => wire_error,
            other => WireError::new(other.code(), other.to_string()),
        }
    }
}
