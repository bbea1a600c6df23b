use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use bytes::Bytes;
use futures::future::BoxFuture;
use k_lock::Mutex;
use tokio::sync::mpsc;

use crate::Error;

/// The message broker a `BrokerTransport` runs on.
///
/// A broker moves opaque frames into named queues. Publishing addresses a queue directly by
/// name: the routing key is the queue name. Each queue has exactly one consumer.
///
/// Queue ownership is not tracked. A `BrokerTransport` deletes a service queue when the last
/// of its own bindings for that service goes away, even if another transport on the same
/// broker has declared that queue since. Serve each service from one transport per broker.
pub trait Broker: Send + Sync + 'static {
    /// Create the queue `name`, holding up to `capacity` frames, and consume it.
    ///
    /// Declaring a queue that already exists replaces it. The earlier consumer receives what
    /// was already queued for it and then runs dry.
    fn declare_queue(&self, name: &str, capacity: usize) -> crate::Result<mpsc::Receiver<Bytes>>;

    /// Remove the queue `name`. Its consumer receives what was already queued and then runs
    /// dry.
    fn delete_queue(&self, name: &str);

    /// Put `frame` on the queue named `routing_key`, waiting for room if the queue is full.
    ///
    /// `Error::Unroutable` when there is no such queue.
    fn publish(&self, routing_key: &str, frame: Bytes) -> BoxFuture<'static, crate::Result<()>>;
}

/// A broker that lives in this process.
///
/// Queues are bounded channels. Clones share the same queues.
#[derive(Debug, Clone, Default)]
pub struct LocalBroker {
    shared: Arc<LocalShared>,
}

#[derive(Debug, Default)]
struct LocalShared {
    queues: Mutex<HashMap<String, mpsc::Sender<Bytes>>>,
    closed: AtomicBool,
}

impl LocalBroker {
    /// A broker with no queues.
    pub fn new() -> Self {
        Self::default()
    }

    /// Shut the broker down. Every queue is deleted, and declaring or publishing fails with
    /// `Error::Closed` from now on.
    pub fn close(&self) {
        let mut queues = self.shared.queues.lock().expect("must not be poisoned");
        self.shared.closed.store(true, Ordering::Release);
        log::info!("local broker closed with {} queues", queues.len());
        queues.clear();
    }

    /// Names of the declared queues, sorted.
    pub fn queue_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .shared
            .queues
            .lock()
            .expect("must not be poisoned")
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }
}

impl Broker for LocalBroker {
    fn declare_queue(&self, name: &str, capacity: usize) -> crate::Result<mpsc::Receiver<Bytes>> {
        let mut queues = self.shared.queues.lock().expect("must not be poisoned");
        if self.is_closed() {
            return Err(Error::Closed);
        }
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        if queues.insert(name.to_string(), sender).is_some() {
            log::debug!("queue {name} redeclared");
        } else {
            log::debug!("queue {name} declared");
        }
        Ok(receiver)
    }

    fn delete_queue(&self, name: &str) {
        if self
            .shared
            .queues
            .lock()
            .expect("must not be poisoned")
            .remove(name)
            .is_some()
        {
            log::debug!("queue {name} deleted");
        }
    }

    fn publish(&self, routing_key: &str, frame: Bytes) -> BoxFuture<'static, crate::Result<()>> {
        let queue = {
            let queues = self.shared.queues.lock().expect("must not be poisoned");
            if self.is_closed() {
                Err(Error::Closed)
            } else {
                queues
                    .get(routing_key)
                    .cloned()
                    .ok_or_else(|| Error::Unroutable(routing_key.to_string()))
            }
        };
        let routing_key = routing_key.to_string();
        Box::pin(async move {
            queue?
                .send(frame)
                .await
                .map_err(|_| Error::Unroutable(routing_key))
        })
    }
}
