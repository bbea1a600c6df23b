use std::{
    collections::HashMap,
    panic::AssertUnwindSafe,
    sync::{Arc, RwLock},
};

use futures::FutureExt;

use crate::{
    codec::response_codec,
    transport::{Delivery, Listener, Tomb},
    Codec, Response, WireError,
};

use super::Endpoint;

/// The endpoint table of one service, and the per-request dispatch over it.
///
/// Registration takes the write lock; every dispatch takes the read lock just long enough to
/// clone the endpoint out. Handlers never run under the lock.
#[derive(Debug)]
pub(crate) struct Router {
    service_name: String,
    endpoints: RwLock<HashMap<String, Arc<Endpoint>>>,
}

impl Router {
    pub fn new(service_name: String) -> Self {
        Self {
            service_name,
            endpoints: Default::default(),
        }
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// Register a batch of endpoints, or none of them.
    pub fn add(&self, endpoints: Vec<Endpoint>) -> Result<(), String> {
        let mut table = self.endpoints.write().expect("must not be poisoned");
        for (i, endpoint) in endpoints.iter().enumerate() {
            if endpoint.name().is_empty() {
                return Err(format!(
                    "{}: an endpoint must have a name ({} -> {})",
                    self.service_name,
                    endpoint.request_type(),
                    endpoint.response_type()
                ));
            }
            if table.contains_key(endpoint.name())
                || endpoints[..i].iter().any(|e| e.name() == endpoint.name())
            {
                return Err(format!(
                    "{}: endpoint {} is already registered",
                    self.service_name,
                    endpoint.name()
                ));
            }
        }
        for endpoint in endpoints {
            log::debug!("{}: registered endpoint {}", self.service_name, endpoint.name());
            table.insert(endpoint.name().to_string(), Arc::new(endpoint));
        }
        Ok(())
    }

    pub fn endpoint(&self, name: &str) -> Option<Arc<Endpoint>> {
        self.endpoints
            .read()
            .expect("must not be poisoned")
            .get(name)
            .cloned()
    }

    pub fn endpoint_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .endpoints
            .read()
            .expect("must not be poisoned")
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Accept deliveries until the binding goes away, dispatching each on its own task.
    ///
    /// When the tomb is killed the listener is closed: whatever is already queued is still
    /// dispatched, nothing new gets in.
    pub async fn accept(self: Arc<Self>, mut listener: Listener, tomb: Tomb) {
        let binding = listener.binding().clone();
        log::info!("{} accepting requests as {}", self.service_name, binding.id());
        let mut closed = false;
        loop {
            let delivery = if closed {
                listener.next().await
            } else {
                tokio::select! {
                    delivery = listener.next() => delivery,
                    _ = tomb.dying() => {
                        log::debug!("{} draining {}", self.service_name, binding.id());
                        listener.close();
                        closed = true;
                        continue;
                    }
                }
            };
            match delivery {
                Some(delivery) => {
                    tomb.spawn(self.clone().dispatch(delivery));
                }
                None => break,
            }
        }
        log::info!("{} stopped accepting as {}", self.service_name, binding.id());
    }

    /// Route one request to its handler and answer it. This always answers.
    pub async fn dispatch(self: Arc<Self>, delivery: Delivery) {
        let (request, responder) = delivery.into_parts();
        let codec = response_codec(request.headers());
        let shell = request.response();
        log::debug!(
            "{}: dispatching {} as {}",
            self.service_name,
            request.endpoint(),
            codec.content_type()
        );

        let result = match self.endpoint(request.endpoint()) {
            Some(endpoint) => AssertUnwindSafe(endpoint.handle(request, codec))
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| {
                    let detail = panic_message(panic.as_ref());
                    log::error!(
                        "{}/{} handler panicked: {detail}",
                        self.service_name,
                        endpoint.name()
                    );
                    Err(WireError::internal("Handler panicked")
                        .with_param("endpoint", endpoint.name())
                        .with_param("panic", detail))
                }),
            None => {
                log::debug!(
                    "{}: no endpoint named {}",
                    self.service_name,
                    request.endpoint()
                );
                Err(WireError::bad_request("Endpoint not found")
                    .with_param("endpoint", request.endpoint()))
            }
        };

        let response = match result {
            Ok(response) => response,
            Err(wire_error) => error_response(shell, codec, &wire_error),
        };
        responder.respond(response);
    }
}

/// An error response carrying `wire_error`, encoded with `codec`.
pub(crate) fn error_response(
    mut shell: Response,
    codec: Codec,
    wire_error: &WireError,
) -> Response {
    shell.set_error(true);
    if let Err(e) = shell.set_body(codec, wire_error) {
        log::error!("could not encode {wire_error:?} as {codec:?}: {e:?}");
        if let Err(e) = shell.set_body(Codec::DEFAULT, wire_error) {
            log::error!("could not encode {wire_error:?} at all: {e:?}");
        }
    }
    shell
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use crate::{
        headers,
        transport::{Delivery, Responder},
        BoxError, Codec, Endpoint, ErrorCode, Reply, Request,
    };

    use super::Router;

    fn router() -> Arc<Router> {
        let router = Router::new("service.example".to_string());
        router
            .add(vec![
                Endpoint::new("one", |request: Request, _: ()| async move {
                    Ok::<_, BoxError>(request.reply("one".to_string()))
                }),
                Endpoint::new("boom", |_request: Request, _: ()| async move {
                    if true {
                        panic!("boom went the handler");
                    }
                    Ok::<_, BoxError>(Reply::<()>::empty())
                }),
            ])
            .expect("valid endpoints");
        Arc::new(router)
    }

    async fn dispatch(router: &Arc<Router>, request: Request) -> crate::Response {
        let (responder, completion) = Responder::new();
        router
            .clone()
            .dispatch(Delivery::new(request, responder))
            .await;
        completion.await.expect("dispatch always answers")
    }

    #[test]
    fn rejects_bad_batches_whole() {
        let router = router();
        let result = router.add(vec![
            Endpoint::new("two", |request: Request, _: ()| async move {
                Ok::<_, BoxError>(request.reply(2))
            }),
            Endpoint::new("one", |request: Request, _: ()| async move {
                Ok::<_, BoxError>(request.reply(1))
            }),
        ]);
        assert!(result.is_err());
        assert_eq!(vec!["boom", "one"], router.endpoint_names(), "nothing from the batch");

        let duplicate_in_batch = router.add(vec![
            Endpoint::new("three", |request: Request, _: ()| async move {
                Ok::<_, BoxError>(request.reply(3))
            }),
            Endpoint::new("three", |request: Request, _: ()| async move {
                Ok::<_, BoxError>(request.reply(3))
            }),
        ]);
        assert!(duplicate_in_batch.is_err());

        let unnamed = router.add(vec![Endpoint::new("", |request: Request, _: ()| async move {
            Ok::<_, BoxError>(request.reply(0))
        })]);
        assert!(unnamed.is_err());
    }

    #[tokio::test]
    async fn routes_by_name() {
        let router = router();
        let response = dispatch(&router, Request::new("service.example", "one")).await;
        assert_eq!(Some("one".to_string()), response.decode::<String>().expect("decodes"));
    }

    #[tokio::test]
    async fn unknown_endpoint() {
        let router = router();
        let mut request = Request::new("service.example", "nope");
        request.set_header(headers::ACCEPT, "application/json");
        let response = dispatch(&router, request).await;

        assert!(response.is_error());
        assert_eq!(Some("application/json"), response.header(headers::CONTENT_TYPE));
        let error = response.decode_error().expect("decodes");
        assert_eq!(ErrorCode::BadRequest, error.code);
        assert_eq!("Endpoint not found", error.message);
        assert_eq!(Some(&"nope".to_string()), error.params.get("endpoint"));
    }

    #[tokio::test]
    async fn panics_become_internal_errors() {
        let router = router();
        let response = dispatch(&router, Request::new("service.example", "boom")).await;
        let error = response.decode_error().expect("decodes");
        assert_eq!(ErrorCode::InternalService, error.code);
        assert_eq!(
            Some(&"boom went the handler".to_string()),
            error.params.get("panic")
        );

        // and the router is fine afterward
        let response = dispatch(&router, Request::new("service.example", "one")).await;
        assert!(!response.is_error());
    }

    #[tokio::test]
    async fn unsupported_content_type_is_a_bad_request() {
        let router = router();
        let mut request = Request::new("service.example", "one");
        request.set_header(headers::CONTENT_TYPE, "text/plain");
        request.set_payload(&b"hi"[..]);
        let response = dispatch(&router, request).await;
        let error = response.decode_error().expect("decodes");
        assert_eq!(ErrorCode::BadRequest, error.code);
        let content_type = response
            .header(headers::CONTENT_TYPE)
            .expect("content type");
        assert_eq!(
            Some(Codec::MessagePack),
            Codec::from_content_type(content_type),
            "an error still needs some encoding"
        );
    }
}
