use std::{collections::HashMap, time::Duration};

use bytes::Bytes;
use switchboard::{Codec, Context, Headers, Request, Response};

/// What an envelope carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Kind {
    /// A request for `service/endpoint`.
    Request,
    /// A successful response.
    Response,
    /// A response whose payload is a `WireError`.
    Error,
}

/// The frame a `BrokerTransport` puts on the broker. Always encoded as a MessagePack map.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Envelope {
    /// Pairs a response with its request. Unique per reply queue.
    pub correlation_id: u64,
    /// The queue the response goes to. Empty on responses.
    #[serde(default)]
    pub reply_to: String,
    /// Request, response, or error response.
    pub kind: Kind,
    /// The service the request is addressed to.
    pub service: String,
    /// The endpoint the request is addressed to.
    pub endpoint: String,
    /// Request or response headers.
    #[serde(default)]
    pub headers: Headers,
    /// The encoded body.
    #[serde(default)]
    pub payload: Bytes,
    /// How long the caller will wait for the response, in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiration_ms: Option<u64>,
    /// Request context values.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub baggage: HashMap<String, String>,
}

impl Envelope {
    /// Wrap `request` for sending. The expiration is whichever is sooner, `timeout` or the
    /// request context's deadline.
    pub fn request(
        correlation_id: u64,
        reply_to: impl Into<String>,
        request: &Request,
        timeout: Duration,
    ) -> Self {
        let expiration = request
            .context()
            .remaining()
            .map_or(timeout, |remaining| remaining.min(timeout));
        Self {
            correlation_id,
            reply_to: reply_to.into(),
            kind: Kind::Request,
            service: request.service().to_string(),
            endpoint: request.endpoint().to_string(),
            headers: request.headers().clone(),
            payload: request.payload().clone(),
            expiration_ms: Some(expiration.as_millis().try_into().unwrap_or(u64::MAX)),
            baggage: request.context().baggage().clone(),
        }
    }

    /// Wrap `response` for sending back to the caller.
    pub fn response(correlation_id: u64, response: &Response) -> Self {
        let kind = if response.is_error() {
            Kind::Error
        } else {
            Kind::Response
        };
        Self {
            correlation_id,
            reply_to: String::new(),
            kind,
            service: response.service().to_string(),
            endpoint: response.endpoint().to_string(),
            headers: response.headers().clone(),
            payload: response.payload().clone(),
            expiration_ms: None,
            baggage: Default::default(),
        }
    }

    /// The request this envelope carries, with a context rebuilt from the expiration and
    /// baggage.
    pub fn into_request(self) -> Request {
        let mut context = Context::new();
        if let Some(expiration_ms) = self.expiration_ms {
            context = context.with_timeout(Duration::from_millis(expiration_ms));
        }
        for (key, value) in self.baggage {
            context = context.with_value(key, value);
        }
        let mut request = Request::new(self.service, self.endpoint);
        request.set_headers(self.headers);
        request.set_payload(self.payload);
        request.set_context(context);
        request
    }

    /// The response this envelope carries.
    pub fn into_response(self) -> Response {
        let mut response = Response::new(self.service, self.endpoint);
        response.set_error(self.kind == Kind::Error);
        response.headers_mut().extend(self.headers);
        response.set_payload(self.payload);
        response
    }

    /// Encode as a broker frame.
    pub fn encode(&self) -> crate::Result<Bytes> {
        Ok(Codec::MessagePack.marshal(self)?)
    }

    /// Decode a broker frame.
    pub fn decode(frame: &[u8]) -> crate::Result<Self> {
        Ok(Codec::MessagePack.unmarshal(frame)?)
    }
}
