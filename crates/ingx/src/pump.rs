//! 🎬 *[a payload source that never ends. a backend that can only take so much.]*
//! *[in between: a loop with a clipboard, counting who's still out.]*
//!
//! 🚰 The Stream Pump: draws payloads from a [`PayloadSource`] in order and
//! submits each one to the backend on its own task, keeping at most
//! `max_concurrency` submissions in flight.
//!
//! 🧠 Knowledge graph:
//! - A task is running from the moment `dispatch` spawns it until `drain`
//!   settles it as completed or failed. Being in the working set IS being
//!   running, so `working_set.len()` never exceeds `max_concurrency`.
//! - Each task posts its own terminal outcome on an `async_channel` when done.
//!   The pump blocks on that channel when the window is full, then drains EVERY
//!   completion that's already waiting (one wakeup, many reclaimed slots).
//! - A failed payload is recorded in `PumpReport::failures` and nothing else
//!   happens to it. Siblings keep running; the source keeps being drawn.
//! - Dispatch order = source order. Completion order = whoever finishes first.
//! - Only the pump's own loop touches the working set.
//! - Cancellation stops drawing and waiting, and returns `Cancelled`. Tasks
//!   already dispatched are left to finish; the backend owns work it accepted.
//!
//! ⚠️ "He who spawns without a window, DoSes his own warehouse." -- Ancient proverb 📜

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_channel::{Receiver, Sender};
use futures::FutureExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::backends::IngestBackend;
use crate::common::{IngestOptions, Payload, TableTarget};
use crate::error::{IngestError, IngestResult};
use crate::payloads::PayloadSource;

/// 🔧 The size of the in-flight window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PumpConfig {
    pub max_concurrency: usize,
}

impl Default for PumpConfig {
    fn default() -> Self {
        Self { max_concurrency: 4 }
    }
}

/// 🧵 One running payload submission and the task carrying it.
#[derive(Debug)]
struct InFlightTask {
    sequence: u64,
    handle: JoinHandle<()>,
}

/// ✉️ What a task posts on its way out.
#[derive(Debug)]
struct Completion {
    task_id: u64,
    outcome: IngestResult<()>,
}

/// 💀 A payload the backend would not take.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadFailure {
    pub sequence: u64,
    pub error: IngestError,
}

/// 📋 The final tally.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PumpReport {
    /// 🔢 Every payload whose submission reached a terminal state, failed ones included.
    pub submitted: u64,
    pub failures: Vec<PayloadFailure>,
}

impl PumpReport {
    pub fn succeeded(&self) -> u64 {
        self.submitted - self.failures.len() as u64
    }
}

/// 🚰 Pumps payloads into the backend through a fixed-size window.
#[derive(Debug, Clone)]
pub struct StreamPump<B> {
    backend: Arc<B>,
    config: PumpConfig,
    cancel: CancellationToken,
}

impl<B: IngestBackend + 'static> StreamPump<B> {
    pub fn new(backend: Arc<B>, config: PumpConfig, cancel: CancellationToken) -> Self {
        Self {
            backend,
            config,
            cancel,
        }
    }

    /// 🚀 Pump everything `source` has. Returns the tally once every dispatched
    /// task has been accounted for.
    pub async fn pump<P>(
        &self,
        source: &mut P,
        target: &TableTarget,
        options: &IngestOptions,
    ) -> IngestResult<PumpReport>
    where
        P: PayloadSource + ?Sized,
    {
        self.pump_with(source, target, options, |_| {}).await
    }

    /// 🚀 Same as [`pump`](Self::pump), calling `on_drained` with the running
    /// completed count after every drain cycle.
    pub async fn pump_with<P, F>(
        &self,
        source: &mut P,
        target: &TableTarget,
        options: &IngestOptions,
        mut on_drained: F,
    ) -> IngestResult<PumpReport>
    where
        P: PayloadSource + ?Sized,
        F: FnMut(u64),
    {
        let the_window = self.config.max_concurrency;
        if the_window == 0 {
            return Err(IngestError::InvalidArgument(
                "max_concurrency must be at least 1".to_string(),
            ));
        }

        let (tx, rx) = async_channel::unbounded::<Completion>();
        let mut working_set: HashMap<u64, InFlightTask> = HashMap::with_capacity(the_window);
        let mut report = PumpReport::default();
        let mut next_task_id = 0u64;

        loop {
            let the_next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(IngestError::Cancelled),
                next = source.next_payload() => next?,
            };
            let Some(the_payload) = the_next else {
                break;
            };

            let the_task_id = next_task_id;
            next_task_id += 1;
            self.dispatch(the_task_id, the_payload, target, options, &tx, &mut working_set);
            debug_assert!(working_set.len() <= the_window);

            if working_set.len() >= the_window {
                self.drain(&rx, &mut working_set, &mut report).await?;
                on_drained(report.submitted);
            }
        }

        debug!(
            "🏁 payload source exhausted, draining {} in-flight submissions",
            working_set.len()
        );
        while !working_set.is_empty() {
            self.drain(&rx, &mut working_set, &mut report).await?;
            on_drained(report.submitted);
        }

        Ok(report)
    }

    /// 🧵 Spawn the submission task and enter it into the working set.
    fn dispatch(
        &self,
        task_id: u64,
        payload: Payload,
        target: &TableTarget,
        options: &IngestOptions,
        tx: &Sender<Completion>,
        working_set: &mut HashMap<u64, InFlightTask>,
    ) {
        let the_sequence = payload.sequence;
        let the_backend = Arc::clone(&self.backend);
        let the_target = target.clone();
        let the_options = options.clone();
        let the_tx = tx.clone();

        let the_task = InFlightTask {
            sequence: the_sequence,
            handle: tokio::spawn(async move {
                let the_outcome = AssertUnwindSafe(the_backend.submit_stream(&the_target, &payload, &the_options))
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|_| {
                        Err(IngestError::TransientIo(format!(
                            "submission task for payload #{} panicked",
                            payload.sequence
                        )))
                    });
                // -- a closed channel means the pump was cancelled and nobody is counting anymore
                let _ = the_tx
                    .send(Completion {
                        task_id,
                        outcome: the_outcome,
                    })
                    .await;
            }),
        };
        working_set.insert(task_id, the_task);
        debug!("📤 dispatched payload #{the_sequence} ({} in flight)", working_set.len());
    }

    /// 🪣 Block until at least one task finishes, then account for every task
    /// that has finished by now.
    async fn drain(
        &self,
        rx: &Receiver<Completion>,
        working_set: &mut HashMap<u64, InFlightTask>,
        report: &mut PumpReport,
    ) -> IngestResult<()> {
        let the_first = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(IngestError::Cancelled),
            first = rx.recv() => first.map_err(|_| {
                IngestError::TransientIo("completion channel closed with tasks in flight".to_string())
            })?,
        };

        let mut the_batch = vec![the_first];
        while let Ok(the_completion) = rx.try_recv() {
            the_batch.push(the_completion);
        }

        for the_completion in the_batch {
            let Some(mut the_task) = working_set.remove(&the_completion.task_id) else {
                continue;
            };
            let the_outcome = match (&mut the_task.handle).await {
                Ok(()) => the_completion.outcome,
                Err(join_error) => Err(IngestError::TransientIo(format!(
                    "submission task for payload #{} did not finish cleanly: {join_error}",
                    the_task.sequence
                ))),
            };

            report.submitted += 1;
            match the_outcome {
                Ok(()) => debug!(
                    "✅ payload #{} completed, {} settled so far",
                    the_task.sequence, report.submitted
                ),
                Err(error) => {
                    warn!("💀 payload #{} was not ingested: {error}", the_task.sequence);
                    report.failures.push(PayloadFailure {
                        sequence: the_task.sequence,
                        error,
                    });
                }
            }
        }

        debug!(
            "🪣 drain cycle done: {} completed, {} still in flight",
            report.submitted,
            working_set.len()
        );
        Ok(())
    }
}
