/// Result type for broker operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors from the broker boundary.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No queue is declared under the routing key.
    #[error("nothing is bound to routing key {0}")]
    Unroutable(String),
    /// The broker is shut down.
    #[error("broker is closed")]
    Closed,
    /// A frame could not be encoded or decoded as an envelope.
    #[error("bad envelope: {0}")]
    Envelope(#[from] switchboard::CodecError),
}

impl From<Error> for switchboard::Error {
    fn from(error: Error) -> Self {
        match error {
            Error::Unroutable(routing_key) => switchboard::Error::NoRoute(routing_key),
            Error::Closed => switchboard::Error::TransportClosed,
            Error::Envelope(e) => switchboard::Error::Codec(e),
        }
    }
}
