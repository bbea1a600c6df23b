use std::{future::Future, sync::Arc};

use futures::future::BoxFuture;

use crate::{headers, BoxError, Codec, Reply, Request, Response, WireError};

type ErasedHandler =
    dyn Fn(Request, Codec) -> BoxFuture<'static, Result<Response, WireError>> + Send + Sync;

/// A named operation within a service.
///
/// The request and response types are the endpoint's prototypes: the router decodes the
/// payload into `Req` before calling the handler, and encodes the `Rsp` it returns with
/// whatever codec the caller negotiated.
#[derive(Clone)]
pub struct Endpoint {
    name: String,
    request_type: &'static str,
    response_type: &'static str,
    handler: Arc<ErasedHandler>,
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("name", &self.name)
            .field("request_type", &self.request_type)
            .field("response_type", &self.response_type)
            .finish()
    }
}

impl Endpoint {
    /// Bind `handler` to `name`.
    ///
    /// The handler gets the request (headers, context) and its decoded body. It returns a
    /// `Reply`, or an error. Return a `WireError` to choose the code the caller sees; any other
    /// error is reported as `internal_service`.
    ///
    /// A request without a body decodes as unit, not as a default value. A `Req` that can not
    /// be built from unit turns a bodiless call into `bad_request`: take `Option<Req>` or `()`
    /// where callers may send nothing.
    pub fn new<Req, Rsp, F, Fut>(name: impl Into<String>, handler: F) -> Self
    where
        Req: serde::de::DeserializeOwned + Send + 'static,
        Rsp: serde::Serialize + Send + 'static,
        F: Fn(Request, Req) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Reply<Rsp>, BoxError>> + Send + 'static,
    {
        let handler = Arc::new(handler);
        let erased = move |request: Request, response_codec: Codec| {
            let handler = handler.clone();
            let handle: BoxFuture<'static, Result<Response, WireError>> = Box::pin(async move {
                let body: Req = request.decode().map_err(|e| {
                    WireError::bad_request(format!("Failed to decode request body: {e}"))
                        .with_param("endpoint", request.endpoint())
                })?;
                let mut response = request.response();

                let reply = handler(request, body)
                    .await
                    .map_err(WireError::from_handler_error)?;

                let (reply_headers, body) = reply.into_parts();
                response.headers_mut().extend(reply_headers);
                match body {
                    Some(body) => response.set_body(response_codec, &body).map_err(|e| {
                        WireError::internal(format!("Failed to encode response body: {e}"))
                    })?,
                    None => {
                        response.set_header(headers::CONTENT_TYPE, response_codec.content_type())
                    }
                }
                Ok(response)
            });
            handle
        };
        Self {
            name: name.into(),
            request_type: std::any::type_name::<Req>(),
            response_type: std::any::type_name::<Rsp>(),
            handler: Arc::new(erased),
        }
    }

    /// The endpoint name requests are addressed to.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name of the request body type.
    pub fn request_type(&self) -> &'static str {
        self.request_type
    }

    /// Name of the response body type.
    pub fn response_type(&self) -> &'static str {
        self.response_type
    }

    /// Decode, handle and encode one request. Handler failures come back as the `WireError`
    /// to send; panics are not caught here.
    pub(crate) fn handle(
        &self,
        request: Request,
        response_codec: Codec,
    ) -> BoxFuture<'static, Result<Response, WireError>> {
        (self.handler)(request, response_codec)
    }
}

#[cfg(test)]
mod test {
    use crate::{headers, BoxError, Codec, ErrorCode, Reply, Request, WireError};

    use super::Endpoint;

    #[derive(Debug, PartialEq, serde::Serialize, serde::Deserialize)]
    struct Ping {
        ping: String,
    }

    #[derive(Debug, PartialEq, serde::Serialize, serde::Deserialize)]
    struct Pong {
        pong: String,
    }

    fn echo() -> Endpoint {
        Endpoint::new("echo", |request: Request, ping: Ping| async move {
            Ok::<_, BoxError>(
                request
                    .reply(Pong { pong: ping.ping })
                    .with_header("X-Seen", "yes"),
            )
        })
    }

    #[test]
    fn descriptors() {
        let endpoint = echo();
        assert_eq!("echo", endpoint.name());
        assert!(endpoint.request_type().ends_with("Ping"));
        assert!(endpoint.response_type().ends_with("Pong"));
    }

    #[tokio::test]
    async fn decodes_and_encodes_with_negotiated_codecs() {
        let mut request = Request::new("service.example", "echo");
        request
            .set_body(Codec::MessagePack, &Ping { ping: "hi".to_string() })
            .expect("encodable");

        let response = echo()
            .handle(request, Codec::Json)
            .await
            .expect("handled");
        assert_eq!(Some("application/json"), response.header(headers::CONTENT_TYPE));
        assert_eq!(Some("yes"), response.header("X-Seen"));
        assert_eq!(&br#"{"pong":"hi"}"#[..], &response.payload()[..]);
    }

    #[tokio::test]
    async fn undecodable_body_is_a_bad_request() {
        let mut request = Request::new("service.example", "echo");
        request.set_header(headers::CONTENT_TYPE, "application/json");
        request.set_payload(&b"{not json"[..]);

        let error = echo()
            .handle(request, Codec::Json)
            .await
            .expect_err("can not decode");
        assert_eq!(ErrorCode::BadRequest, error.code);
        assert_eq!(Some(&"echo".to_string()), error.params.get("endpoint"));
    }

    #[tokio::test]
    async fn handler_errors_are_normalized() {
        let failing = Endpoint::new("fail", |_request: Request, _: ()| async move {
            Err::<Reply<()>, BoxError>(std::io::Error::other("disk on fire").into())
        });
        let error = failing
            .handle(Request::new("service.example", "fail"), Codec::DEFAULT)
            .await
            .expect_err("fails");
        assert_eq!(WireError::internal("disk on fire"), error);
    }

    #[tokio::test]
    async fn empty_reply_has_no_payload() {
        let nothing = Endpoint::new("nothing", |_request: Request, _: ()| async move {
            Ok::<_, BoxError>(Reply::<Pong>::empty())
        });
        let response = nothing
            .handle(Request::new("service.example", "nothing"), Codec::DEFAULT)
            .await
            .expect("handled");
        assert!(!response.is_error());
        assert!(response.payload().is_empty());
        assert_eq!(None, response.decode::<Pong>().expect("decodes"));
    }

    #[tokio::test]
    async fn bodiless_request_needs_an_optional_type() {
        let error = echo()
            .handle(Request::new("service.example", "echo"), Codec::DEFAULT)
            .await
            .expect_err("a Ping can not be made from nothing");
        assert_eq!(ErrorCode::BadRequest, error.code);

        let optional = Endpoint::new("optional", |request: Request, ping: Option<Ping>| async move {
            let pong = ping.map_or_else(|| "nobody".to_string(), |ping| ping.ping);
            Ok::<_, BoxError>(request.reply(Pong { pong }))
        });
        let response = optional
            .handle(Request::new("service.example", "optional"), Codec::DEFAULT)
            .await
            .expect("handled");
        assert_eq!(
            Some(Pong {
                pong: "nobody".to_string()
            }),
            response.decode::<Pong>().expect("decodes")
        );
    }
}
