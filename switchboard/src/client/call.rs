use std::{marker::PhantomData, time::Duration};

use crate::{
    headers, transport::Transport, Codec, Context, Error, Headers, Request, WireError,
};

/// A description of one rpc, for turning into a `Request`.
///
/// `Body` is what gets sent and `Rsp` is what the caller expects back. A call with no body
/// sends an empty payload.
///
/// ```no_run
/// # async fn example(transport: &dyn switchboard::Transport) -> switchboard::Result<()> {
/// use std::time::Duration;
/// use switchboard::Call;
///
/// let greeting: Option<String> = Call::new("service.greeter", "hello")
///     .with_body("world".to_string())
///     .send(transport, Duration::from_secs(1))
///     .await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Call<Body = (), Rsp = ()> {
    service: String,
    endpoint: String,
    body: Option<Body>,
    headers: Headers,
    context: Option<Context>,
    codec: Codec,
    _response: PhantomData<fn() -> Rsp>,
}

impl<Rsp> Call<(), Rsp> {
    /// A call to `service/endpoint` with no body yet.
    pub fn new(service: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            endpoint: endpoint.into(),
            body: None,
            headers: Default::default(),
            context: None,
            codec: Codec::DEFAULT,
            _response: PhantomData,
        }
    }
}

impl<Body, Rsp> Call<Body, Rsp> {
    /// Set the body to send.
    pub fn with_body<B>(self, body: B) -> Call<B, Rsp> {
        Call {
            service: self.service,
            endpoint: self.endpoint,
            body: Some(body),
            headers: self.headers,
            context: self.context,
            codec: self.codec,
            _response: PhantomData,
        }
    }

    /// Add a header.
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Add headers.
    pub fn with_headers(mut self, headers: impl IntoIterator<Item = (String, String)>) -> Self {
        self.headers.extend(headers);
        self
    }

    /// The parent context. This should nearly always be the context of the request being
    /// handled, if there is one; the call runs in a child of it.
    pub fn with_context(mut self, parent: &Context) -> Self {
        self.context = Some(parent.child());
        self
    }

    /// Encode the body with `codec` instead of the default.
    pub fn with_codec(mut self, codec: Codec) -> Self {
        self.codec = codec;
        self
    }

    /// Target service.
    pub fn service(&self) -> &str {
        &self.service
    }

    /// Target endpoint.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl<Body, Rsp> Call<Body, Rsp>
where
    Body: serde::Serialize,
{
    /// Build the request.
    ///
    /// Failing to encode the body is reported as `bad_request`: the call itself was bad,
    /// nothing went wrong on the network. Unless the headers already say otherwise, the
    /// response is asked for in the same encoding as the body.
    pub fn request(&self) -> Result<Request, WireError> {
        if self.service.is_empty() || self.endpoint.is_empty() {
            return Err(WireError::bad_request("A call needs a service and an endpoint")
                .with_param("service", self.service.as_str())
                .with_param("endpoint", self.endpoint.as_str()));
        }
        let mut request = Request::new(self.service.as_str(), self.endpoint.as_str());
        request.set_headers(self.headers.clone());
        if let Some(context) = &self.context {
            request.set_context(context.clone());
        }
        if let Some(body) = &self.body {
            request.set_body(self.codec, body).map_err(|e| {
                WireError::bad_request(format!("Failed to encode request body: {e}"))
                    .with_param("service", self.service.as_str())
                    .with_param("endpoint", self.endpoint.as_str())
            })?;
        }
        if !request.headers().contains_key(headers::ACCEPT) {
            request.set_header(headers::ACCEPT, self.codec.content_type());
        }
        Ok(request)
    }
}

impl<Body, Rsp> Call<Body, Rsp>
where
    Body: serde::Serialize,
    Rsp: serde::de::DeserializeOwned,
{
    /// Build the request, send it, and decode the reply.
    ///
    /// `Ok(None)` is a successful reply without a body. An error reply is `Error::Remote`
    /// carrying the code and message the server sent.
    pub async fn send(&self, transport: &dyn Transport, timeout: Duration) -> crate::Result<Option<Rsp>> {
        let request = self.request().map_err(Error::InvalidCall)?;
        let response = transport.send(request, timeout).await?;
        response.decode()
    }
}
