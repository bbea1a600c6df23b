use tokio::sync::watch;

use crate::Error;

/// A pair of readiness handles: the trigger for the transport, the signal for everyone else.
pub fn readiness() -> (ReadinessTrigger, Readiness) {
    let (sender, receiver) = watch::channel(false);
    (ReadinessTrigger { sender }, Readiness { receiver })
}

/// Fires a `Readiness`. Consumed by firing, so it fires at most once.
#[derive(Debug)]
pub struct ReadinessTrigger {
    sender: watch::Sender<bool>,
}

impl ReadinessTrigger {
    /// Mark the transport ready.
    pub fn fire(self) {
        self.sender.send_replace(true);
    }
}

/// Observes whether a transport is ready. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Readiness {
    receiver: watch::Receiver<bool>,
}

impl Readiness {
    /// A signal that has already fired.
    pub fn ready() -> Self {
        let (trigger, readiness) = readiness();
        trigger.fire();
        readiness
    }

    /// True once fired.
    pub fn is_ready(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Wait for the signal. Fails if the trigger was dropped without firing, which means
    /// the transport gave up on becoming ready.
    pub async fn wait(&self) -> crate::Result<()> {
        if self.is_ready() {
            return Ok(());
        }
        let mut receiver = self.receiver.clone();
        receiver
            .wait_for(|ready| *ready)
            .await
            .map(|_| ())
            .map_err(|_| Error::TransportClosed)
    }
}
