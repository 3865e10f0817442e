//! Graceful shutdown
//!
//! A single [`Shutdown`] owns a `watch<bool>` channel. Every long-running loop
//! (acquisition, accept loop, connections) holds a [`ShutdownListener`] and
//! selects on [`ShutdownListener::recv`]. The flag only ever goes from `false`
//! to `true`, so late subscribers still observe it.
//!
//! [`listen_for_signals`] maps SIGINT, SIGHUP and SIGTERM onto the channel, so
//! `kill -HUP <pid>` and Ctrl-C both stop the daemon cleanly.

use std::io;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Sender side of the shutdown flag
#[derive(Debug, Clone)]
pub struct Shutdown {
    tx: watch::Sender<bool>,
}

/// Receiver side of the shutdown flag
#[derive(Debug, Clone)]
pub struct ShutdownListener {
    rx: watch::Receiver<bool>,
}

impl Shutdown {
    /// Create a new, untriggered shutdown flag
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx }
    }

    /// Obtain a listener for a task
    pub fn subscribe(&self) -> ShutdownListener {
        ShutdownListener {
            rx: self.tx.subscribe(),
        }
    }

    /// Request shutdown. Idempotent.
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    /// True once [`Shutdown::trigger`] has been called
    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownListener {
    /// Resolve once shutdown has been requested.
    ///
    /// Also resolves if the [`Shutdown`] was dropped, since nobody can
    /// trigger it any more.
    pub async fn recv(&mut self) {
        let _ = self.rx.wait_for(|stopped| *stopped).await;
    }

    /// Non-blocking check
    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }
}

/// Spawn a task that triggers `shutdown` on the first termination signal.
///
/// The handlers are registered before this returns, so a signal arriving
/// right after start-up is not lost.
pub fn listen_for_signals(shutdown: Shutdown) -> io::Result<JoinHandle<()>> {
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sighup = signal(SignalKind::hangup())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut listener = shutdown.subscribe();

    Ok(tokio::spawn(async move {
        let name = tokio::select! {
            _ = sigint.recv() => "SIGINT",
            _ = sighup.recv() => "SIGHUP",
            _ = sigterm.recv() => "SIGTERM",
            _ = listener.recv() => return,
        };
        warn!(signal = name, "Received signal, shutting down");
        shutdown.trigger();
        info!("Shutdown requested");
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_trigger_wakes_listeners() {
        let shutdown = Shutdown::new();
        let mut a = shutdown.subscribe();
        let mut b = shutdown.subscribe();
        assert!(!a.is_triggered());

        let waiter = tokio::spawn(async move {
            a.recv().await;
        });
        shutdown.trigger();

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        tokio::time::timeout(Duration::from_secs(1), b.recv())
            .await
            .unwrap();
        assert!(shutdown.is_triggered());
    }

    #[tokio::test]
    async fn test_late_subscriber_sees_trigger() {
        let shutdown = Shutdown::new();
        shutdown.trigger();
        shutdown.trigger();
        let mut late = shutdown.subscribe();
        assert!(late.is_triggered());
        tokio::time::timeout(Duration::from_millis(100), late.recv())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_dropped_sender_releases_listener() {
        let shutdown = Shutdown::new();
        let mut listener = shutdown.subscribe();
        drop(shutdown);
        tokio::time::timeout(Duration::from_millis(100), listener.recv())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_signal_listener_exits_on_manual_trigger() {
        let shutdown = Shutdown::new();
        let handle = listen_for_signals(shutdown.clone()).unwrap();
        shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
