//! Subscriber notification interface
//!
//! The cache calls exactly one method on every listener. Whether the work
//! happens inline or is deferred onto the runtime is decided by the listener
//! implementation, never by the cache.

use std::future::Future;

use tokio::sync::mpsc;
use tracing::trace;

use oddsfeed_core::{ListenerError, PriceSnapshot};

/// Receives merged price snapshots after every cache write for its key
pub trait PriceListener: Send + Sync {
    fn on_price(&self, snapshot: &PriceSnapshot) -> Result<(), ListenerError>;
}

/// Plain closures run inline on the writer's task
impl<F> PriceListener for F
where
    F: Fn(&PriceSnapshot) -> Result<(), ListenerError> + Send + Sync,
{
    fn on_price(&self, snapshot: &PriceSnapshot) -> Result<(), ListenerError> {
        self(snapshot)
    }
}

/// Forwards snapshots into a bounded channel owned by a consumer task.
///
/// A full buffer drops the snapshot rather than stalling the writer.
pub struct ChannelListener {
    tx: mpsc::Sender<PriceSnapshot>,
}

impl ChannelListener {
    pub fn new(tx: mpsc::Sender<PriceSnapshot>) -> Self {
        Self { tx }
    }

    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<PriceSnapshot>) {
        let (tx, rx) = mpsc::channel(buffer);
        (Self { tx }, rx)
    }
}

impl PriceListener for ChannelListener {
    fn on_price(&self, snapshot: &PriceSnapshot) -> Result<(), ListenerError> {
        match self.tx.try_send(snapshot.clone()) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                Err(ListenerError::Failed("listener buffer full".into()))
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(ListenerError::Closed),
        }
    }
}

/// Runs an async callback on its own task for each snapshot
pub struct DeferredListener<F> {
    callback: F,
}

impl<F, Fut> DeferredListener<F>
where
    F: Fn(PriceSnapshot) -> Fut + Send + Sync,
    Fut: Future<Output = ()> + Send + 'static,
{
    pub fn new(callback: F) -> Self {
        Self { callback }
    }
}

impl<F, Fut> PriceListener for DeferredListener<F>
where
    F: Fn(PriceSnapshot) -> Fut + Send + Sync,
    Fut: Future<Output = ()> + Send + 'static,
{
    fn on_price(&self, snapshot: &PriceSnapshot) -> Result<(), ListenerError> {
        let handle = tokio::runtime::Handle::try_current()
            .map_err(|e| ListenerError::Failed(format!("no runtime for deferred listener: {e}")))?;
        trace!(token_id = %snapshot.token_id, "Deferring listener callback");
        handle.spawn((self.callback)(snapshot.clone()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oddsfeed_core::{PriceUpdate, Venue};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn snapshot() -> PriceSnapshot {
        PriceUpdate::new(Venue::Polymarket, "tok").into_snapshot()
    }

    #[test]
    fn test_channel_listener_reports_full_and_closed() {
        let (listener, mut rx) = ChannelListener::channel(1);
        assert!(listener.on_price(&snapshot()).is_ok());
        assert!(matches!(
            listener.on_price(&snapshot()),
            Err(ListenerError::Failed(_))
        ));

        assert!(rx.try_recv().is_ok());
        drop(rx);
        assert!(matches!(listener.on_price(&snapshot()), Err(ListenerError::Closed)));
    }

    #[tokio::test]
    async fn test_deferred_listener_runs_on_runtime() {
        let hits = Arc::new(AtomicUsize::new(0));
        let (done_tx, mut done_rx) = mpsc::channel(1);
        let counter = Arc::clone(&hits);
        let listener = DeferredListener::new(move |_snapshot| {
            let counter = Arc::clone(&counter);
            let done_tx = done_tx.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                let _ = done_tx.send(()).await;
            }
        });

        listener.on_price(&snapshot()).unwrap();
        done_rx.recv().await.unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_deferred_listener_without_runtime_fails() {
        let listener = DeferredListener::new(|_snapshot| async {});
        assert!(listener.on_price(&snapshot()).is_err());
    }
}
