//! Debounced layout recompute.
//!
//! Resize requests arriving within the debounce window coalesce into one
//! recompute. Each recompute bumps a generation counter that UI bindings
//! watch.

use crate::observability::metrics;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Handle for requesting layout recomputes.
#[derive(Clone)]
pub struct LayoutHandle {
    requests: mpsc::UnboundedSender<()>,
    generation: watch::Receiver<u64>,
}

impl LayoutHandle {
    /// Ask for a recompute. Ignored once the debouncer has stopped.
    pub fn request_resize(&self) {
        if self.requests.send(()).is_err() {
            trace!(target: "classroom.layout", "Resize requested after shutdown");
        }
    }

    /// Number of recomputes performed so far.
    #[must_use]
    pub fn generation(&self) -> u64 {
        *self.generation.borrow()
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.generation.clone()
    }
}

/// Spawn the debouncer task.
#[must_use]
pub fn spawn(debounce: Duration, cancel: CancellationToken) -> (LayoutHandle, JoinHandle<()>) {
    let (requests, mut rx) = mpsc::unbounded_channel::<()>();
    let (generation_tx, generation) = watch::channel(0_u64);

    let task = tokio::spawn(async move {
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                request = rx.recv() => {
                    if request.is_none() {
                        break;
                    }
                }
            }

            // Wait for a quiet period, restarting on every new request.
            loop {
                tokio::select! {
                    () = cancel.cancelled() => return,
                    () = tokio::time::sleep(debounce) => break,
                    request = rx.recv() => {
                        if request.is_none() {
                            break;
                        }
                    }
                }
            }

            generation_tx.send_modify(|g| *g += 1);
            metrics::record_layout_recompute();
            debug!(target: "classroom.layout", generation = *generation_tx.borrow(), "Layout recomputed");
        }
    });

    (
        LayoutHandle {
            requests,
            generation,
        },
        task,
    )
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_burst_coalesces_into_one_recompute() {
        let cancel = CancellationToken::new();
        let (layout, _task) = spawn(Duration::from_millis(250), cancel.clone());

        for _ in 0..5 {
            layout.request_resize();
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        assert_eq!(layout.generation(), 0);

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(layout.generation(), 1);
        cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_separate_requests_recompute_separately() {
        let cancel = CancellationToken::new();
        let (layout, _task) = spawn(Duration::from_millis(250), cancel.clone());

        layout.request_resize();
        tokio::time::sleep(Duration::from_millis(500)).await;
        layout.request_resize();
        tokio::time::sleep(Duration::from_millis(500)).await;

        assert_eq!(layout.generation(), 2);
        cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_pending_recompute() {
        let cancel = CancellationToken::new();
        let (layout, task) = spawn(Duration::from_millis(250), cancel.clone());

        layout.request_resize();
        tokio::time::sleep(Duration::from_millis(10)).await;
        cancel.cancel();
        task.await.unwrap();

        assert_eq!(layout.generation(), 0);
        layout.request_resize();
    }
}
