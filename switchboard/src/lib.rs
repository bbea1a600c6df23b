//! Switchboard
//!
//! This crate routes requests addressed to `service/endpoint` onto handlers, over
//! whatever message substrate a `Transport` provides. A process creates a `Server`
//! for its service name, registers `Endpoint`s on it, and binds it to a transport.
//! Callers build requests with a `Call` and send them over the same kind of transport.
//!
//! * The in-memory transport lives in `transport::memory`. It is the one you want in tests.
//! * A message-broker-backed transport lives in the `switchboard-broker` crate.
//!
//! Payloads are encoded with a `Codec` chosen by content negotiation: the request's
//! `Content-Type` selects the decoder, and the response is encoded with the first
//! supported `Accept` entry, falling back to the request's content type and then
//! to MessagePack.
//!
//! Handler failures never travel as transport failures. They are normalized into a
//! `WireError` (a code, a message, and some structured parameters) and carried in band
//! as the payload of a `Response` with `is_error` set. A caller distinguishes three
//! outcomes: an application response, an error response, or a transport error from `send`.
//!
//! Handlers run concurrently, each on its own task. A handler that panics produces an
//! `internal_service` error response; it does not take the server down.

#![deny(missing_docs)]

mod context;
mod error;
mod message;
mod wire_error;

pub mod client;
pub mod codec;
pub mod server;
pub mod transport;

pub use client::Call;
pub use codec::{Codec, CodecError};
pub use context::Context;
pub use error::{BoxError, Error, Result};
pub use message::{headers, Headers, Reply, Request, Response};
pub use server::{Endpoint, Server, ServerState};
pub use transport::{Transport, MemoryTransport};
pub use wire_error::{ErrorCode, WireError};
