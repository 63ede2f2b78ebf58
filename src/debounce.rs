//! Trailing-edge debouncer
//!
//! Every trigger resets the timer; the action runs once after a quiet
//! period with no further triggers. Pending runs can be flushed (run now)
//! or cancelled (discarded), e.g. when the active chat changes.

use futures::future::BoxFuture;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::debug;

type Action = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

enum Signal {
    Trigger,
    Flush(oneshot::Sender<()>),
    Cancel,
}

/// Debounced runner for an async action. Must be created inside a tokio runtime.
pub struct Debouncer {
    tx: mpsc::UnboundedSender<Signal>,
    pending: Arc<AtomicBool>,
    quiet: Duration,
    task: JoinHandle<()>,
}

impl Debouncer {
    pub fn spawn<F, Fut>(quiet: Duration, action: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let action: Action = Arc::new(move || Box::pin(action()));
        let (tx, rx) = mpsc::unbounded_channel();
        let pending = Arc::new(AtomicBool::new(false));
        let task = tokio::spawn(run(rx, quiet, action, pending.clone()));
        Self {
            tx,
            pending,
            quiet,
            task,
        }
    }

    /// Schedule a run, resetting the timer if one is pending
    pub fn trigger(&self) {
        self.pending.store(true, Ordering::SeqCst);
        let _ = self.tx.send(Signal::Trigger);
    }

    /// Run a pending action immediately and wait for it to finish
    pub async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(Signal::Flush(done_tx)).is_ok() {
            let _ = done_rx.await;
        }
    }

    /// Discard a pending run. Triggers issued after this call still run.
    pub fn cancel(&self) {
        self.pending.store(false, Ordering::SeqCst);
        let _ = self.tx.send(Signal::Cancel);
    }

    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::SeqCst)
    }

    pub fn quiet_period(&self) -> Duration {
        self.quiet
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn run(
    mut rx: mpsc::UnboundedReceiver<Signal>,
    quiet: Duration,
    action: Action,
    pending: Arc<AtomicBool>,
) {
    loop {
        // Idle until the first trigger
        match rx.recv().await {
            None => return,
            Some(Signal::Trigger) => {}
            Some(Signal::Flush(done)) => {
                let _ = done.send(());
                continue;
            }
            Some(Signal::Cancel) => continue,
        }

        let mut flushed = None;
        let mut cancelled = false;
        loop {
            tokio::select! {
                _ = sleep(quiet) => break,
                signal = rx.recv() => match signal {
                    Some(Signal::Trigger) => {
                        debug!("Debounce: timer reset");
                        continue;
                    }
                    Some(Signal::Flush(done)) => {
                        flushed = Some(done);
                        break;
                    }
                    Some(Signal::Cancel) => {
                        // The caller already cleared `pending`; a later trigger
                        // is still queued and starts a fresh timer
                        debug!("Debounce: pending run discarded");
                        cancelled = true;
                        break;
                    }
                    None => return,
                },
            }
        }
        if cancelled {
            continue;
        }

        if pending.swap(false, Ordering::SeqCst) {
            action().await;
        }
        if let Some(done) = flushed {
            let _ = done.send(());
        }
    }
}
