//! ⏳ Status Poller: "are we there yet?", asked once per interval, until the answer is final.
//!
//! 🎬 *[a handle sits in a text file. the process that wrote it is long gone.]*
//! *[a new process reads it, rebuilds it, and starts asking the cluster about it.]*
//! *[the cluster, unbothered, answers "InProgress" for the ninth time.]*
//!
//! 🧠 Knowledge graph:
//! - Loop: sleep `poll_interval` → query → report → stop if terminal → repeat.
//! - Terminal means the AGGREGATE status is `Succeeded` or `Failed`. Counts are
//!   advisory: with tracking off they can sit at zero while the status flips to
//!   `Succeeded`, and we still stop. `PartialSuccess` keeps us polling.
//! - `TransientIo` is retried. More than `max_transient_retries` failures in a
//!   row escalates to `Exhausted`. Any successful query resets the streak.
//! - Other errors (`NotFound`, `InvalidArgument`) surface immediately.
//! - Cancellation is checked while sleeping and while querying; it wins ties.
//! - Polling is read-only, so many pollers may share one handle.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::backends::IngestBackend;
use crate::common::{OperationHandle, StatusSummary};
use crate::error::{IngestError, IngestResult};
use crate::progress::format_duration;

/// 🔧 How often to ask, and how many failed asks in a row we tolerate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollerConfig {
    pub poll_interval: Duration,
    pub max_transient_retries: u32,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            max_transient_retries: 5,
        }
    }
}

/// 📊 What the caller sees after every successful query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollProgress {
    pub operation_id: String,
    /// 🔢 Query number, starting at 1. Failed queries count too.
    pub query: u32,
    /// ⏱️ Wall time since polling began.
    pub elapsed: Duration,
    pub summary: StatusSummary,
}

/// ⏳ Polls the backend about one operation handle at a time.
#[derive(Debug, Clone)]
pub struct StatusPoller<B> {
    backend: Arc<B>,
    config: PollerConfig,
    cancel: CancellationToken,
}

impl<B: IngestBackend> StatusPoller<B> {
    pub fn new(backend: Arc<B>, config: PollerConfig, cancel: CancellationToken) -> Self {
        Self {
            backend,
            config,
            cancel,
        }
    }

    /// 🔍 One query, no retries, no sleeping.
    pub async fn poll_once(&self, handle: &OperationHandle) -> IngestResult<StatusSummary> {
        self.backend.get_status(handle).await
    }

    /// ⏳ Poll until terminal, reporting progress through tracing only.
    pub async fn poll_until_terminal(&self, handle: &OperationHandle) -> IngestResult<StatusSummary> {
        self.poll_until_terminal_with(handle, |_| {}).await
    }

    /// ⏳ Poll until terminal, handing every observed summary to `on_progress`.
    pub async fn poll_until_terminal_with<F>(
        &self,
        handle: &OperationHandle,
        mut on_progress: F,
    ) -> IngestResult<StatusSummary>
    where
        F: FnMut(&PollProgress),
    {
        let the_start = Instant::now();
        let mut the_query_count = 0u32;
        let mut the_failure_streak = 0u32;

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(IngestError::Cancelled),
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }

            the_query_count += 1;
            let the_answer = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(IngestError::Cancelled),
                answer = self.poll_once(handle) => answer,
            };

            match the_answer {
                Ok(summary) => {
                    the_failure_streak = 0;
                    let the_progress = PollProgress {
                        operation_id: handle.id.clone(),
                        query: the_query_count,
                        elapsed: the_start.elapsed(),
                        summary,
                    };
                    info!(
                        "⏳ Waiting for ingestion of {} ({} ; {}): {} in progress, {} failed & {} succeeded",
                        handle.id,
                        summary.status,
                        format_duration(the_progress.elapsed),
                        summary.in_progress_count,
                        summary.failed_count,
                        summary.succeeded_count
                    );
                    on_progress(&the_progress);

                    if summary.is_terminal() {
                        return Ok(summary);
                    }
                }
                Err(error) if error.is_retryable() => {
                    the_failure_streak += 1;
                    if the_failure_streak > self.config.max_transient_retries {
                        return Err(IngestError::Exhausted {
                            attempts: the_failure_streak,
                            last: error.to_string(),
                        });
                    }
                    warn!(
                        "📡 status query {} for {} failed ({}/{} retries): {error}",
                        the_query_count, handle.id, the_failure_streak, self.config.max_transient_retries
                    );
                }
                Err(error) => return Err(error),
            }
        }
    }
}
