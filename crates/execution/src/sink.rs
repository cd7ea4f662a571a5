//! View model sink driven by snapshot and notification streams.

use crate::session::Notification;
use crate::sync::ViewSnapshot;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tracing::{debug, warn};

/// Consumer of published snapshots, typically a UI binding.
#[async_trait]
pub trait ViewModelSink: Send + Sync {
    /// Renders a snapshot. Called with the current snapshot first, then on
    /// every change; intermediate versions may be skipped.
    async fn render(&self, snapshot: Arc<ViewSnapshot>);

    /// Shows a one-shot notice.
    async fn notify(&self, _notification: Notification) {}
}

/// Feeds `sink` until the snapshot publisher goes away.
pub async fn drive_sink<S>(
    sink: &S,
    mut snapshots: watch::Receiver<Arc<ViewSnapshot>>,
    mut notifications: broadcast::Receiver<Notification>,
) where
    S: ViewModelSink + ?Sized,
{
    let initial = snapshots.borrow_and_update().clone();
    sink.render(initial).await;

    let mut notices_open = true;
    loop {
        // Notices first, so none queued before shutdown are lost.
        tokio::select! {
            biased;
            notice = notifications.recv(), if notices_open => match notice {
                Ok(notice) => sink.notify(notice).await,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped = skipped, "Sink missed notifications");
                }
                Err(broadcast::error::RecvError::Closed) => notices_open = false,
            },
            changed = snapshots.changed() => {
                if changed.is_err() {
                    debug!("Snapshot publisher closed, stopping sink");
                    break;
                }
                let snapshot = snapshots.borrow_and_update().clone();
                sink.render(snapshot).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::Reconciler;
    use punch_domain::{AccountId, ChainId, Entry};
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        versions: Mutex<Vec<u64>>,
        notices: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ViewModelSink for RecordingSink {
        async fn render(&self, snapshot: Arc<ViewSnapshot>) {
            self.versions.lock().await.push(snapshot.version);
        }

        async fn notify(&self, notification: Notification) {
            self.notices.lock().await.push(notification.message);
        }
    }

    #[tokio::test]
    async fn test_drive_sink_renders_until_closed() {
        let reconciler = Reconciler::new(ChainId::RINKEBY, false);
        let snapshots = reconciler.subscribe();
        let (tx, rx) = broadcast::channel(8);
        let sink = RecordingSink::default();

        tx.send(Notification::info("hello")).unwrap();
        reconciler.observe_live(Entry::live(AccountId::from_bytes([1; 20]), 1, "a"));
        drop(reconciler);
        drop(tx);

        drive_sink(&sink, snapshots, rx).await;

        let versions = sink.versions.lock().await.clone();
        assert_eq!(versions.first(), Some(&1));
        assert_eq!(sink.notices.lock().await.as_slice(), ["hello".to_string()]);
    }
}
