use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use rand::Rng;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

pub const WORK_QUEUE_CAPACITY: usize = 100;

struct Job {
    label: String,
    work: BoxFuture<'static, ()>,
}

/// Bounded queue of short background jobs for one team, such as bot
/// lookups. A single dispatcher runs items one at a time with a
/// random pause before each, so a burst of live events never turns into a
/// burst of API calls.
#[derive(Clone)]
pub struct WorkQueue {
    tx: mpsc::Sender<Job>,
}

impl WorkQueue {
    /// Spawn the dispatcher. It stops when `cancel` fires or every handle
    /// to the queue is dropped.
    pub fn start(capacity: usize, max_jitter: Duration, cancel: CancellationToken) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(capacity);
        let handle = tokio::spawn(dispatch(rx, max_jitter, cancel));
        (Self { tx }, handle)
    }

    /// Queue `work`. Returns `false` and drops it if the queue is full or
    /// the dispatcher has stopped.
    pub fn submit<F>(&self, label: impl Into<String>, work: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let job = Job {
            label: label.into(),
            work: Box::pin(work),
        };

        match self.tx.try_send(job) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(job)) => {
                warn!("Work queue full, dropping {}", job.label);
                false
            }
            Err(mpsc::error::TrySendError::Closed(job)) => {
                debug!("Work queue closed, dropping {}", job.label);
                false
            }
        }
    }
}

fn jitter(max: Duration) -> Duration {
    let max_ms = max.as_millis() as u64;
    if max_ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::rng().random_range(0..=max_ms))
}

async fn dispatch(mut rx: mpsc::Receiver<Job>, max_jitter: Duration, cancel: CancellationToken) {
    loop {
        let job = tokio::select! {
            _ = cancel.cancelled() => break,
            job = rx.recv() => match job {
                Some(job) => job,
                None => break,
            },
        };

        let delay = jitter(max_jitter);
        debug!(delay_ms = delay.as_millis() as u64, "Dispatching {}", job.label);

        let label = job.label;
        let work = job.work;
        tokio::select! {
            _ = cancel.cancelled() => break,
            outcome = async {
                tokio::time::sleep(delay).await;
                AssertUnwindSafe(work).catch_unwind().await
            } => {
                // A panicking job must not take the queue down with it
                if outcome.is_err() {
                    error!("Background job {} panicked", label);
                }
            }
        }
    }
}
