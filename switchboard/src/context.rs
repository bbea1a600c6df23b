use std::{collections::HashMap, sync::Arc, time::Duration};

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Cancellation, deadline and key/value baggage for one request.
///
/// A child context is cancelled when its parent is, inherits the parent's deadline unless it
/// sets an earlier one, and sees the parent's baggage. Cancellation is advisory: handlers may
/// watch it, the router never enforces it.
#[derive(Debug, Clone, Default)]
pub struct Context {
    cancellation: CancellationToken,
    deadline: Option<Instant>,
    baggage: Arc<HashMap<String, String>>,
}

impl Context {
    /// A root context: never cancelled unless you cancel it, no deadline, no baggage.
    pub fn new() -> Self {
        Self::default()
    }

    /// A context that inherits everything from this one. Cancelling the child does not
    /// cancel the parent.
    pub fn child(&self) -> Self {
        Self {
            cancellation: self.cancellation.child_token(),
            deadline: self.deadline,
            baggage: self.baggage.clone(),
        }
    }

    /// Tighten the deadline. A later deadline than the current one is ignored.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(current) => current.min(deadline),
            None => deadline,
        });
        self
    }

    /// Tighten the deadline to `timeout` from now. A timeout too large to represent leaves the
    /// deadline as it is.
    pub fn with_timeout(self, timeout: Duration) -> Self {
        match Instant::now().checked_add(timeout) {
            Some(deadline) => self.with_deadline(deadline),
            None => self,
        }
    }

    /// Add one item of baggage.
    pub fn with_value(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        Arc::make_mut(&mut self.baggage).insert(key.into(), value.into());
        self
    }

    /// Look up one item of baggage.
    pub fn value(&self, key: &str) -> Option<&str> {
        self.baggage.get(key).map(String::as_str)
    }

    /// All baggage.
    pub fn baggage(&self) -> &HashMap<String, String> {
        &self.baggage
    }

    /// The deadline, if there is one.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline. `None` without a deadline, zero once it has passed.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// Cancel this context and its children.
    pub fn cancel(&self) {
        self.cancellation.cancel();
    }

    /// True once cancelled, or once the deadline has passed.
    pub fn is_done(&self) -> bool {
        self.cancellation.is_cancelled()
            || self
                .deadline
                .is_some_and(|deadline| deadline <= Instant::now())
    }

    /// Completes when the context is cancelled or its deadline passes.
    pub async fn done(&self) {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = self.cancellation.cancelled() => {}
                    _ = tokio::time::sleep_until(deadline) => {}
                }
            }
            None => self.cancellation.cancelled().await,
        }
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use super::Context;

    #[test]
    fn child_inherits_cancellation_and_baggage() {
        let parent = Context::new().with_value("trace", "abc");
        let child = parent.child().with_value("span", "1");

        assert_eq!(Some("abc"), child.value("trace"));
        assert_eq!(Some("1"), child.value("span"));
        assert_eq!(None, parent.value("span"), "baggage does not leak upward");

        child.cancel();
        assert!(child.is_done());
        assert!(!parent.is_done(), "cancellation does not leak upward");

        let child = parent.child();
        parent.cancel();
        assert!(child.is_done());
    }

    #[tokio::test(start_paused = true)]
    async fn deadline() {
        let context = Context::new().with_timeout(Duration::from_secs(10));
        let looser = context.clone().with_timeout(Duration::from_secs(60));
        assert_eq!(context.deadline(), looser.deadline(), "deadlines only tighten");

        assert!(!context.is_done());
        context.done().await;
        assert!(context.is_done());
        assert_eq!(Some(Duration::ZERO), context.remaining());
    }

    #[test]
    fn unrepresentable_timeout_keeps_the_deadline() {
        assert_eq!(None, Context::new().with_timeout(Duration::MAX).deadline());

        let context = Context::new().with_timeout(Duration::from_secs(10));
        let unbounded = context.clone().with_timeout(Duration::MAX);
        assert_eq!(context.deadline(), unbounded.deadline());
    }
}
