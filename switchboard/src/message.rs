use std::collections::HashMap;

use bytes::Bytes;

use crate::{
    codec::{request_codec, Codec, CodecError},
    Context, Error, WireError,
};

/// Request and response headers. Keys are case-sensitive.
pub type Headers = HashMap<String, String>;

/// Well-known header names.
pub mod headers {
    /// Names the codec of the payload.
    pub const CONTENT_TYPE: &str = "Content-Type";
    /// Names the codecs the caller can read, most preferred first.
    pub const ACCEPT: &str = "Accept";
}

/// A request addressed to `service/endpoint`.
///
/// The payload is the wire form of the body. The typed body only exists after the payload
/// has been decoded; a server hands it to the handler next to the request.
#[derive(Debug, Clone)]
pub struct Request {
    service: String,
    endpoint: String,
    headers: Headers,
    payload: Bytes,
    context: Context,
}

impl Request {
    /// A request with no headers, no payload and a fresh context.
    pub fn new(service: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            endpoint: endpoint.into(),
            headers: Default::default(),
            payload: Default::default(),
            context: Context::new(),
        }
    }

    /// The service this request is addressed to.
    pub fn service(&self) -> &str {
        &self.service
    }

    /// The endpoint this request is addressed to.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Set the service this request is addressed to.
    pub fn set_service(&mut self, service: impl Into<String>) {
        self.service = service.into();
    }

    /// Set the endpoint this request is addressed to.
    pub fn set_endpoint(&mut self, endpoint: impl Into<String>) {
        self.endpoint = endpoint.into();
    }

    /// All headers.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// All headers, mutably.
    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    /// One header.
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key).map(String::as_str)
    }

    /// Set one header, replacing any previous value.
    pub fn set_header(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.headers.insert(key.into(), value.into());
    }

    /// Add several headers, replacing previous values of the same keys.
    pub fn set_headers(&mut self, headers: impl IntoIterator<Item = (String, String)>) {
        self.headers.extend(headers);
    }

    /// The encoded body.
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Replace the encoded body. Does not touch `Content-Type`.
    pub fn set_payload(&mut self, payload: impl Into<Bytes>) {
        self.payload = payload.into();
    }

    /// The request context.
    pub fn context(&self) -> &Context {
        &self.context
    }

    /// Replace the request context.
    pub fn set_context(&mut self, context: Context) {
        self.context = context;
    }

    /// Encode `body` as the payload with `codec`, and say so in `Content-Type`.
    pub fn set_body<T>(&mut self, codec: Codec, body: &T) -> Result<(), CodecError>
    where
        T: serde::Serialize + ?Sized,
    {
        self.payload = codec.marshal(body)?;
        self.set_header(headers::CONTENT_TYPE, codec.content_type());
        Ok(())
    }

    /// Decode the payload with the codec named by `Content-Type`.
    pub fn decode<T>(&self) -> Result<T, CodecError>
    where
        T: serde::de::DeserializeOwned,
    {
        request_codec(&self.headers)?.unmarshal(&self.payload)
    }

    /// Start a typed reply to this request.
    pub fn reply<T>(&self, body: T) -> Reply<T> {
        Reply::new(body)
    }

    /// An empty response correlated with this request.
    pub fn response(&self) -> Response {
        Response::new(self.service.clone(), self.endpoint.clone())
    }
}

/// A response to a `Request`.
///
/// `is_error` says whether the payload is an application body or an encoded `WireError`.
/// Check it before decoding; `decode` does this for you.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    service: String,
    endpoint: String,
    headers: Headers,
    payload: Bytes,
    is_error: bool,
}

impl Response {
    /// A successful, empty response from `service/endpoint`.
    pub fn new(service: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            endpoint: endpoint.into(),
            headers: Default::default(),
            payload: Default::default(),
            is_error: false,
        }
    }

    /// The service the originating request was addressed to.
    pub fn service(&self) -> &str {
        &self.service
    }

    /// The endpoint the originating request was addressed to.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// All headers.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// All headers, mutably.
    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    /// One header.
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key).map(String::as_str)
    }

    /// Set one header, replacing any previous value.
    pub fn set_header(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.headers.insert(key.into(), value.into());
    }

    /// The encoded body.
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Replace the encoded body. Does not touch `Content-Type`.
    pub fn set_payload(&mut self, payload: impl Into<Bytes>) {
        self.payload = payload.into();
    }

    /// True when the payload is a `WireError`.
    pub fn is_error(&self) -> bool {
        self.is_error
    }

    /// Mark the payload as a `WireError` (or not).
    pub fn set_error(&mut self, is_error: bool) {
        self.is_error = is_error;
    }

    /// Encode `body` as the payload with `codec`, and say so in `Content-Type`.
    pub fn set_body<T>(&mut self, codec: Codec, body: &T) -> Result<(), CodecError>
    where
        T: serde::Serialize + ?Sized,
    {
        self.payload = codec.marshal(body)?;
        self.set_header(headers::CONTENT_TYPE, codec.content_type());
        Ok(())
    }

    /// The codec of the payload: whatever `Content-Type` says, or the default.
    pub fn codec(&self) -> Result<Codec, CodecError> {
        request_codec(&self.headers)
    }

    /// Decode the application body.
    ///
    /// An error response is decoded into `Error::Remote` instead. An empty payload is a
    /// successful response with no body.
    pub fn decode<T>(&self) -> crate::Result<Option<T>>
    where
        T: serde::de::DeserializeOwned,
    {
        if self.is_error {
            return Err(Error::Remote(self.decode_error()?));
        }
        if self.payload.is_empty() {
            return Ok(None);
        }
        Ok(Some(self.codec()?.unmarshal(&self.payload)?))
    }

    /// Decode the `WireError` carried by an error response.
    pub fn decode_error(&self) -> crate::Result<WireError> {
        if !self.is_error {
            return Err(Error::InvalidState("response is not an error"));
        }
        Ok(self.codec()?.unmarshal(&self.payload)?)
    }
}

/// What a handler returns: an optional typed body and some headers.
///
/// An empty reply is a legitimate success. It reaches the caller as a response with an
/// empty payload, which decodes to `None`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply<T> {
    headers: Headers,
    body: Option<T>,
}

impl<T> Default for Reply<T> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<T> Reply<T> {
    /// A reply carrying `body`.
    pub fn new(body: T) -> Self {
        Self {
            headers: Default::default(),
            body: Some(body),
        }
    }

    /// A reply with no body.
    pub fn empty() -> Self {
        Self {
            headers: Default::default(),
            body: None,
        }
    }

    /// Set a response header.
    pub fn set_header(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.headers.insert(key.into(), value.into());
    }

    /// Set a response header, builder style.
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_header(key, value);
        self
    }

    /// Response headers set so far.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// The body, if there is one.
    pub fn body(&self) -> Option<&T> {
        self.body.as_ref()
    }

    /// Split into headers and body.
    pub fn into_parts(self) -> (Headers, Option<T>) {
        (self.headers, self.body)
    }
}
