use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use bytes::Bytes;
use futures::future::BoxFuture;
use k_lock::Mutex;
use switchboard::{
    transport::{
        readiness, Binding, Delivery, Listener, Readiness, ReadinessTrigger, Responder, Tomb,
        Transport,
    },
    Error, Request, Response,
};
use tokio::sync::{mpsc, oneshot};

use crate::{
    completion_registry::CompletionRegistry,
    envelope::{Envelope, Kind},
    Broker,
};

static REPLY_QUEUES: AtomicU64 = AtomicU64::new(1);

/// Configuration for a `BrokerTransport`.
#[derive(Debug, Clone)]
pub struct Configuration {
    reply_queue_prefix: String,
    max_queued_requests: usize,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            reply_queue_prefix: "replies".to_string(),
            max_queued_requests: 1024,
        }
    }
}

impl Configuration {
    /// Reply queues are named `<prefix>.<process id>.<n>`. Pick a prefix that can not collide
    /// with a service name.
    ///
    /// Default: replies
    pub fn reply_queue_prefix(&mut self, reply_queue_prefix: impl Into<String>) {
        self.reply_queue_prefix = reply_queue_prefix.into();
    }

    /// Frames each declared queue holds before publishers wait for room. Applies to the
    /// service queues and the reply queue alike.
    ///
    /// Default: 1024
    pub fn max_queued_requests(&mut self, max_queued_requests: usize) {
        self.max_queued_requests = max_queued_requests.max(1);
    }
}

/// A transport over a message `Broker`.
///
/// Each service is a queue named after it. Each transport consumes a private reply queue,
/// and correlates the responses arriving there with the callers waiting for them. Requests
/// travel as `Envelope`s: the timeout becomes the envelope expiration, which in turn becomes
/// the deadline of the request context on the serving side.
///
/// The transport is ready once its reply queue consumer is running.
#[derive(Clone)]
pub struct BrokerTransport {
    shared: Arc<Shared>,
}

struct Shared {
    broker: Arc<dyn Broker>,
    configuration: Configuration,
    reply_queue: String,
    completions: CompletionRegistry,
    bindings: Mutex<HashMap<String, u64>>,
    next_id: AtomicU64,
    readiness: Readiness,
    tomb: Tomb,
}

impl std::fmt::Debug for BrokerTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerTransport")
            .field("reply_queue", &self.shared.reply_queue)
            .field("configuration", &self.shared.configuration)
            .field("ready", &self.shared.readiness.is_ready())
            .field("dying", &self.shared.tomb.is_dying())
            .finish()
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        self.broker.delete_queue(&self.reply_queue);
    }
}

impl BrokerTransport {
    /// A transport on `broker` with the default configuration.
    ///
    /// Must be called from within a tokio runtime: the reply queue consumer starts right away.
    pub fn new(broker: Arc<dyn Broker>) -> crate::Result<Self> {
        Self::with_configuration(broker, Configuration::default())
    }

    /// A transport on `broker`.
    ///
    /// Must be called from within a tokio runtime: the reply queue consumer starts right away.
    pub fn with_configuration(
        broker: Arc<dyn Broker>,
        configuration: Configuration,
    ) -> crate::Result<Self> {
        let reply_queue = format!(
            "{}.{}.{}",
            configuration.reply_queue_prefix,
            std::process::id(),
            REPLY_QUEUES.fetch_add(1, Ordering::Relaxed)
        );
        let replies = broker.declare_queue(&reply_queue, configuration.max_queued_requests)?;
        log::trace!("new broker transport {reply_queue} {configuration:?}");

        let (trigger, readiness) = readiness();
        let completions = CompletionRegistry::default();
        let tomb = Tomb::new();
        tomb.spawn(consume_replies(
            reply_queue.clone(),
            replies,
            completions.clone(),
            tomb.clone(),
            trigger,
        ));

        Ok(Self {
            shared: Arc::new(Shared {
                broker,
                configuration,
                reply_queue,
                completions,
                bindings: Default::default(),
                next_id: AtomicU64::new(1),
                readiness,
                tomb,
            }),
        })
    }

    /// The queue this transport's responses arrive on.
    pub fn reply_queue(&self) -> &str {
        &self.shared.reply_queue
    }

    /// Callers currently waiting for a response.
    pub fn waiting_requests(&self) -> usize {
        self.shared.completions.len()
    }
}

impl Transport for BrokerTransport {
    fn ready(&self) -> Readiness {
        self.shared.readiness.clone()
    }

    fn tomb(&self) -> &Tomb {
        &self.shared.tomb
    }

    fn send(
        &self,
        request: Request,
        timeout: Duration,
    ) -> BoxFuture<'static, switchboard::Result<Response>> {
        let shared = self.shared.clone();
        Box::pin(async move {
            if request.service().is_empty() {
                return Err(Error::InvalidRequest("request has no service"));
            }
            if shared.tomb.is_dying() {
                return Err(Error::TransportClosed);
            }
            let correlation_id = shared.next_id.fetch_add(1, Ordering::Relaxed);
            let service = request.service().to_string();
            let endpoint = request.endpoint().to_string();
            log::debug!("{correlation_id} sending to {service}/{endpoint}");

            let exchange = async {
                shared.readiness.wait().await?;
                let frame = Envelope::request(
                    correlation_id,
                    shared.reply_queue.as_str(),
                    &request,
                    timeout,
                )
                .encode()?;
                let (completion, response) = oneshot::channel();
                let _guard = shared
                    .completions
                    .register_completion(correlation_id, completion);
                shared.broker.publish(&service, frame).await?;
                response.await.map_err(|_| {
                    if shared.tomb.is_dying() {
                        Error::TransportClosed
                    } else {
                        Error::Dropped(format!("{service}/{endpoint}"))
                    }
                })
            };
            let result = tokio::time::timeout(timeout, exchange).await;
            match result {
                Ok(result) => result,
                Err(_elapsed) => {
                    log::debug!("{correlation_id} timed out after {timeout:?}");
                    Err(Error::Timeout {
                        service,
                        endpoint,
                        after: timeout,
                    })
                }
            }
        })
    }

    fn listen(&self, service: &str) -> switchboard::Result<Listener> {
        if service.is_empty() {
            return Err(Error::InvalidRequest("can not listen on an empty service name"));
        }
        let mut bindings = self.shared.bindings.lock().expect("must not be poisoned");
        if self.shared.tomb.is_dying() {
            return Err(Error::TransportClosed);
        }
        let frames = self
            .shared
            .broker
            .declare_queue(service, self.shared.configuration.max_queued_requests)?;
        let binding_id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        if let Some(previous) = bindings.insert(service.to_string(), binding_id) {
            log::warn!("{service} binding {previous} replaced by binding {binding_id}");
        }
        log::debug!("{service} bound as {binding_id}");

        let binding = Binding::new(service, binding_id);
        let (inbound, inbound_receiver) =
            mpsc::channel(self.shared.configuration.max_queued_requests);
        self.shared.tomb.spawn(consume_requests(
            self.shared.clone(),
            binding.clone(),
            frames,
            inbound,
        ));
        Ok(Listener::new(binding, inbound_receiver))
    }

    fn unlisten(&self, binding: &Binding) {
        self.shared.unbind(binding);
    }
}

impl Shared {
    /// Only this transport's bindings are consulted: the queue is deleted even if another
    /// transport on the broker has redeclared it.
    fn unbind(&self, binding: &Binding) {
        let mut bindings = self.bindings.lock().expect("must not be poisoned");
        match bindings.get(binding.service()) {
            Some(binding_id) if *binding_id == binding.id() => {
                bindings.remove(binding.service());
                self.broker.delete_queue(binding.service());
                log::debug!("{} unbound {}", binding.service(), binding.id());
            }
            _ => {
                log::debug!(
                    "{} binding {} is not current, nothing to unbind",
                    binding.service(),
                    binding.id()
                );
            }
        }
    }
}

/// Route responses from the reply queue to their callers, until the tomb is killed or the
/// queue goes away.
async fn consume_replies(
    reply_queue: String,
    mut replies: mpsc::Receiver<Bytes>,
    completions: CompletionRegistry,
    tomb: Tomb,
    trigger: ReadinessTrigger,
) {
    log::debug!("consuming replies on {reply_queue}");
    trigger.fire();
    loop {
        let frame = tokio::select! {
            frame = replies.recv() => frame,
            _ = tomb.dying() => None,
        };
        let Some(frame) = frame else {
            break;
        };
        match Envelope::decode(&frame) {
            Ok(envelope) if envelope.kind != Kind::Request => {
                completions.complete(envelope.correlation_id, envelope.into_response());
            }
            Ok(envelope) => {
                log::warn!(
                    "{reply_queue} dropping request {} for {}/{} on a reply queue",
                    envelope.correlation_id,
                    envelope.service,
                    envelope.endpoint
                );
            }
            Err(e) => {
                log::warn!("{reply_queue} dropping undecodable frame: {e}");
            }
        }
    }
    completions.close();
    log::debug!("stopped consuming replies on {reply_queue}");
}

/// Turn envelopes from a service queue into deliveries for the binding's listener, and send
/// each response back to its caller's reply queue.
async fn consume_requests(
    shared: Arc<Shared>,
    binding: Binding,
    mut frames: mpsc::Receiver<Bytes>,
    inbound: mpsc::Sender<Delivery>,
) {
    loop {
        let frame = tokio::select! {
            frame = frames.recv() => frame,
            _ = inbound.closed() => None,
            _ = shared.tomb.dying() => None,
        };
        let Some(frame) = frame else {
            break;
        };
        let envelope = match Envelope::decode(&frame) {
            Ok(envelope) if envelope.kind == Kind::Request => envelope,
            Ok(envelope) => {
                log::warn!(
                    "{} dropping {:?} {} on a service queue",
                    binding.service(),
                    envelope.kind,
                    envelope.correlation_id
                );
                continue;
            }
            Err(e) => {
                log::warn!("{} dropping undecodable frame: {e}", binding.service());
                continue;
            }
        };
        let correlation_id = envelope.correlation_id;
        let reply_to = envelope.reply_to.clone();
        let (responder, completion) = Responder::new();
        if inbound
            .send(Delivery::new(envelope.into_request(), responder))
            .await
            .is_err()
        {
            log::debug!(
                "{} listener {} is gone, dropping {correlation_id}",
                binding.service(),
                binding.id()
            );
            break;
        }
        shared.tomb.spawn(forward_response(
            shared.broker.clone(),
            reply_to,
            correlation_id,
            completion,
        ));
    }
    if shared.tomb.is_dying() {
        shared.unbind(&binding);
    }
    log::debug!(
        "{} stopped consuming for binding {}",
        binding.service(),
        binding.id()
    );
}

async fn forward_response(
    broker: Arc<dyn Broker>,
    reply_to: String,
    correlation_id: u64,
    completion: oneshot::Receiver<Response>,
) {
    let response = match completion.await {
        Ok(response) => response,
        Err(_) => {
            log::debug!("{correlation_id} was dropped without a response");
            return;
        }
    };
    let frame = match Envelope::response(correlation_id, &response).encode() {
        Ok(frame) => frame,
        Err(e) => {
            log::error!("{correlation_id} response could not be encoded: {e}");
            return;
        }
    };
    if let Err(e) = broker.publish(&reply_to, frame).await {
        log::debug!("{correlation_id} response undeliverable to {reply_to}: {e}");
    }
}

#[cfg(test)]
mod test {
    use std::{sync::Arc, time::Duration};

    use bytes::Bytes;
    use switchboard::{transport::Transport, Context, Error, Request};

    use crate::{Broker, LocalBroker};

    use super::{BrokerTransport, Configuration};

    fn transport(broker: &LocalBroker) -> BrokerTransport {
        BrokerTransport::new(Arc::new(broker.clone())).expect("broker is open")
    }

    #[tokio::test]
    async fn round_trip_through_the_broker() {
        let broker = LocalBroker::new();
        let transport = transport(&broker);
        transport.ready().wait().await.expect("becomes ready");
        let mut listener = transport.listen("service.echo").expect("can listen");

        let server = tokio::spawn(async move {
            let (request, responder) = listener.next().await.expect("a request").into_parts();
            assert_eq!(Some("abc"), request.context().value("trace"));
            assert!(request.context().deadline().is_some());
            let mut response = request.response();
            response.set_payload(request.payload().clone());
            responder.respond(response);
        });

        let mut request = Request::new("service.echo", "echo");
        request.set_payload(&b"hello"[..]);
        request.set_context(Context::new().with_value("trace", "abc"));
        let response = transport
            .send(request, Duration::from_secs(1))
            .await
            .expect("response");
        assert_eq!(&b"hello"[..], &response.payload()[..]);
        assert_eq!("echo", response.endpoint());
        assert_eq!(0, transport.waiting_requests());
        server.await.expect("joins");
    }

    #[tokio::test]
    async fn send_waits_for_readiness() {
        let broker = LocalBroker::new();
        let transport = transport(&broker);
        // the reply consumer has not had a turn on this thread yet
        assert!(!transport.ready().is_ready());
        let mut listener = transport.listen("service.echo").expect("can listen");
        let server = tokio::spawn(async move {
            let (request, responder) = listener.next().await.expect("a request").into_parts();
            responder.respond(request.response());
        });

        let response = transport
            .send(Request::new("service.echo", "early"), Duration::from_secs(1))
            .await
            .expect("sent once ready");
        assert_eq!("early", response.endpoint());
        assert!(transport.ready().is_ready());
        server.await.expect("joins");
    }

    #[tokio::test]
    async fn reply_queue_naming() {
        let broker = LocalBroker::new();
        let mut configuration = Configuration::default();
        configuration.reply_queue_prefix("answers");
        let transport =
            BrokerTransport::with_configuration(Arc::new(broker.clone()), configuration)
                .expect("broker is open");
        let prefix = format!("answers.{}.", std::process::id());
        assert!(transport.reply_queue().starts_with(&prefix));
        assert_eq!(vec![transport.reply_queue().to_string()], broker.queue_names());

        drop(transport);
        assert!(broker.queue_names().is_empty(), "reply queue deleted with the transport");
    }

    #[tokio::test]
    async fn unroutable_is_no_route() {
        let broker = LocalBroker::new();
        let transport = transport(&broker);
        let result = transport
            .send(Request::new("service.nobody", "x"), Duration::from_secs(1))
            .await;
        assert!(matches!(result, Err(Error::NoRoute(service)) if service == "service.nobody"));
        assert_eq!(0, transport.waiting_requests());
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_deregisters_the_caller() {
        let broker = LocalBroker::new();
        let transport = transport(&broker);
        let _listener = transport.listen("service.slow").expect("can listen");
        let result = transport
            .send(Request::new("service.slow", "x"), Duration::from_millis(50))
            .await;
        assert!(matches!(result, Err(Error::Timeout { .. })));
        assert_eq!(0, transport.waiting_requests());
    }

    #[tokio::test]
    async fn undecodable_frames_are_dropped() {
        let broker = LocalBroker::new();
        let transport = transport(&broker);
        transport.ready().wait().await.expect("becomes ready");
        let mut listener = transport.listen("service.echo").expect("can listen");
        broker
            .publish("service.echo", Bytes::from_static(b"\xc1garbage"))
            .await
            .expect("routable");
        broker
            .publish(transport.reply_queue(), Bytes::from_static(b"\xc1garbage"))
            .await
            .expect("routable");

        let server = tokio::spawn(async move {
            let (request, responder) = listener.next().await.expect("a request").into_parts();
            responder.respond(request.response());
        });
        let response = transport
            .send(Request::new("service.echo", "after"), Duration::from_secs(1))
            .await
            .expect("still serving");
        assert_eq!("after", response.endpoint());
        server.await.expect("joins");
    }

    #[tokio::test]
    async fn last_binding_wins() {
        let broker = LocalBroker::new();
        let transport = transport(&broker);
        let mut first = transport.listen("service.dup").expect("can listen");
        let second = transport.listen("service.dup").expect("can listen");
        assert_ne!(first.binding(), second.binding());
        assert!(first.next().await.is_none(), "replaced listener runs dry");

        transport.unlisten(first.binding());
        assert!(broker.queue_names().contains(&"service.dup".to_string()));
        transport.unlisten(second.binding());
        assert!(!broker.queue_names().contains(&"service.dup".to_string()));
    }

    #[tokio::test]
    async fn kill_closes_and_drains() {
        let broker = LocalBroker::new();
        let transport = transport(&broker);
        transport.ready().wait().await.expect("becomes ready");
        let mut listener = transport.listen("service.live").expect("can listen");

        // bound, but never answered before the kill
        let pending = tokio::spawn(
            transport.send(Request::new("service.live", "x"), Duration::from_secs(10)),
        );
        let delivery = listener.next().await.expect("delivered");
        transport.tomb().kill("test ending");

        assert!(matches!(
            pending.await.expect("joins"),
            Err(Error::TransportClosed)
        ));
        assert!(matches!(
            transport
                .send(Request::new("service.live", "x"), Duration::from_secs(1))
                .await,
            Err(Error::TransportClosed)
        ));
        assert!(matches!(
            transport.listen("service.other"),
            Err(Error::TransportClosed)
        ));

        drop(delivery);
        drop(listener);
        transport.tomb().wait().await;
        assert_eq!(vec![transport.reply_queue().to_string()], broker.queue_names());
    }
}
