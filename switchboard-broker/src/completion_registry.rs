use std::{collections::HashMap, sync::Arc};

use k_lock::Mutex;
use switchboard::Response;
use tokio::sync::oneshot;

type InFlight = Arc<Mutex<Option<HashMap<u64, oneshot::Sender<Response>>>>>;

/// Callers waiting on a reply queue, by correlation id. `None` once closed.
#[derive(Debug, Clone)]
pub(crate) struct CompletionRegistry {
    in_flight: InFlight,
}

impl Default for CompletionRegistry {
    fn default() -> Self {
        Self {
            in_flight: Arc::new(Mutex::new(Some(HashMap::new()))),
        }
    }
}

impl CompletionRegistry {
    /// Register before publishing, or the response may arrive before anyone is waiting for it.
    ///
    /// Once the registry is closed the completion is dropped right away, so the caller sees
    /// its receiver fail instead of waiting for a response nobody will route.
    #[must_use]
    pub fn register_completion(
        &self,
        correlation_id: u64,
        completion: oneshot::Sender<Response>,
    ) -> CompletionGuard {
        match self.in_flight.lock().expect("must not be poisoned").as_mut() {
            Some(in_flight) => {
                in_flight.insert(correlation_id, completion);
            }
            None => {
                log::debug!("{correlation_id} registered after the reply queue closed");
            }
        }
        CompletionGuard {
            in_flight: self.in_flight.clone(),
            correlation_id,
        }
    }

    /// Hand `response` to whoever is waiting on `correlation_id`.
    pub fn complete(&self, correlation_id: u64, response: Response) {
        let completion = self
            .in_flight
            .lock()
            .expect("must not be poisoned")
            .as_mut()
            .and_then(|in_flight| in_flight.remove(&correlation_id));
        match completion {
            Some(completion) => {
                if completion.send(response).is_err() {
                    log::debug!("{correlation_id} caller went away");
                }
            }
            None => {
                log::debug!("{correlation_id} response for an abandoned request");
            }
        }
    }

    /// Abandon every waiting caller, and every caller that registers from now on.
    pub fn close(&self) {
        let in_flight = self.in_flight.lock().expect("must not be poisoned").take();
        if let Some(in_flight) = in_flight {
            if !in_flight.is_empty() {
                log::debug!("abandoning {} waiting requests", in_flight.len());
            }
        }
    }

    pub fn len(&self) -> usize {
        self.in_flight
            .lock()
            .expect("must not be poisoned")
            .as_ref()
            .map_or(0, HashMap::len)
    }
}

/// For removing a waiting caller from the registry when it stops waiting, answered or not
#[derive(Debug)]
pub(crate) struct CompletionGuard {
    in_flight: InFlight,
    correlation_id: u64,
}

impl Drop for CompletionGuard {
    fn drop(&mut self) {
        if let Some(in_flight) = self.in_flight.lock().expect("must not be poisoned").as_mut() {
            in_flight.remove(&self.correlation_id);
        }
    }
}

#[cfg(test)]
mod test {
    use switchboard::Response;
    use tokio::sync::oneshot;

    use super::CompletionRegistry;

    #[tokio::test]
    async fn completes_the_right_caller() {
        let registry = CompletionRegistry::default();
        let (first, first_completion) = oneshot::channel();
        let (second, second_completion) = oneshot::channel();
        let _first_guard = registry.register_completion(1, first);
        let _second_guard = registry.register_completion(2, second);

        registry.complete(2, Response::new("service.example", "two"));
        registry.complete(1, Response::new("service.example", "one"));
        assert_eq!("one", first_completion.await.expect("completed").endpoint());
        assert_eq!("two", second_completion.await.expect("completed").endpoint());
        assert_eq!(0, registry.len());
    }

    #[test]
    fn guard_deregisters() {
        let registry = CompletionRegistry::default();
        let (completion, _receiver) = oneshot::channel();
        let guard = registry.register_completion(1, completion);
        assert_eq!(1, registry.len());
        drop(guard);
        assert_eq!(0, registry.len());

        // a late response is harmless
        registry.complete(1, Response::new("service.example", "late"));
    }

    #[tokio::test]
    async fn close_abandons_callers() {
        let registry = CompletionRegistry::default();
        let (completion, receiver) = oneshot::channel();
        let _guard = registry.register_completion(1, completion);
        registry.close();
        assert!(receiver.await.is_err());
    }

    #[tokio::test]
    async fn closed_registry_refuses_late_callers() {
        let registry = CompletionRegistry::default();
        registry.close();

        let (completion, receiver) = oneshot::channel();
        let _guard = registry.register_completion(1, completion);
        assert_eq!(0, registry.len());
        assert!(receiver.await.is_err(), "nobody will ever complete it");

        // nothing to route to, nothing to panic about
        registry.complete(1, Response::new("service.example", "late"));
    }
}
