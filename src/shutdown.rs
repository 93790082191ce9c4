//! Cooperative interruption for a synchronization run.
//!
//! A [`ShutdownTrigger`] is held by whoever may request an interrupt (the
//! Ctrl+C handler, the progress view). The engine only ever observes a
//! [`ShutdownSignal`], checked between items and raced against in-flight
//! processes and retry delays.

use tokio::sync::watch;

/// Requesting side of the shutdown channel
#[derive(Debug, Clone)]
pub struct ShutdownTrigger {
    sender: std::sync::Arc<watch::Sender<bool>>,
}

/// Observing side of the shutdown channel
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    receiver: watch::Receiver<bool>,
    _idle: Option<std::sync::Arc<watch::Sender<bool>>>,
}

/// Create a connected trigger/signal pair
pub fn channel() -> (ShutdownTrigger, ShutdownSignal) {
    let (sender, receiver) = watch::channel(false);
    (
        ShutdownTrigger {
            sender: std::sync::Arc::new(sender),
        },
        ShutdownSignal {
            receiver,
            _idle: None,
        },
    )
}

impl ShutdownTrigger {
    /// Request an interrupt. Idempotent.
    pub fn trigger(&self) {
        self.sender.send_replace(true);
    }
}

impl ShutdownSignal {
    /// A signal that never fires
    pub fn never() -> Self {
        let (sender, receiver) = watch::channel(false);
        Self {
            receiver,
            _idle: Some(std::sync::Arc::new(sender)),
        }
    }

    pub fn is_triggered(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Resolve once an interrupt has been requested
    pub async fn triggered(&mut self) {
        if self.receiver.wait_for(|requested| *requested).await.is_err() {
            // Every trigger was dropped without firing.
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_trigger_is_observed() {
        let (trigger, mut signal) = channel();
        assert!(!signal.is_triggered());

        trigger.trigger();
        assert!(signal.is_triggered());

        tokio::time::timeout(Duration::from_secs(1), signal.triggered())
            .await
            .expect("signal should resolve after trigger");
    }

    #[tokio::test]
    async fn test_never_does_not_fire() {
        let mut signal = ShutdownSignal::never();
        assert!(!signal.is_triggered());
        let waited = tokio::time::timeout(Duration::from_millis(50), signal.triggered()).await;
        assert!(waited.is_err());
    }

    #[tokio::test]
    async fn test_dropped_trigger_pends() {
        let (trigger, mut signal) = channel();
        drop(trigger);
        let waited = tokio::time::timeout(Duration::from_millis(50), signal.triggered()).await;
        assert!(waited.is_err());
        assert!(!signal.is_triggered());
    }
}
