use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::api::SlackApi;
use crate::error::{Result, SyncError};

/// Wraps a [`SlackApi`] so that throttled calls are retried after exactly
/// the delay the platform asks for.
///
/// Only the calling task waits; other teams keep going. There is no retry
/// cap: a rate limit is never a failure, while any other error is handed
/// straight back to the caller. Cancelling the token aborts a pending wait
/// with [`SyncError::Cancelled`]; a request already in flight is allowed to
/// finish.
///
/// # Example
///
/// ```ignore
/// let client = RateLimitedClient::new(api, cancel.clone());
/// let team = client.call("team.info", || client.api().team_info()).await?;
/// ```
#[derive(Clone)]
pub struct RateLimitedClient {
    api: Arc<dyn SlackApi>,
    cancel: CancellationToken,
    hits: Arc<AtomicU64>,
}

impl RateLimitedClient {
    pub fn new(api: Arc<dyn SlackApi>, cancel: CancellationToken) -> Self {
        Self {
            api,
            cancel,
            hits: Arc::new(AtomicU64::new(0)),
        }
    }

    /// The wrapped client, for building operations to pass to [`call`](Self::call).
    pub fn api(&self) -> &dyn SlackApi {
        self.api.as_ref()
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// How many throttled responses this client has waited out.
    pub fn rate_limit_hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Run `operation`, re-issuing it after each rate-limit response.
    pub async fn call<T, F, Fut>(&self, label: &str, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        loop {
            if self.cancel.is_cancelled() {
                return Err(SyncError::Cancelled);
            }

            match operation().await {
                Err(SyncError::RateLimited { retry_after }) => {
                    let hits = self.hits.fetch_add(1, Ordering::Relaxed) + 1;
                    warn!(
                        operation = label,
                        delay_ms = retry_after.as_millis() as u64,
                        total_hits = hits,
                        "Rate limited, waiting {:?}",
                        retry_after
                    );

                    tokio::select! {
                        _ = self.cancel.cancelled() => return Err(SyncError::Cancelled),
                        _ = tokio::time::sleep(retry_after) => {}
                    }
                }
                other => return other,
            }
        }
    }
}
