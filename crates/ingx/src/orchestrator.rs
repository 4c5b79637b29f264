//! 🎬 *[camera pans across a dimly lit data center]*
//! 🎬 "In a world where files wait patiently in containers..."
//! 🎬 "One orchestrator dared to load them all."
//! 🎬 *[record scratch]* 🦆
//!
//! 📦 The Orchestrator runs one configured mode from start to finish:
//! - `Queued`: enumerate → log every pick → chunk into batches → submit each →
//!   optionally write each handle down → poll every handle to a terminal state.
//! - `Streaming`: build the payload source → pump it through the backend.
//! - `Resume`: read handles written by an earlier run → poll them.
//!
//! 🧠 Knowledge graph:
//! - The config is validated in `new`, so a bad target or zero knobs fail
//!   before any collaborator gets a call.
//! - Handles are polled concurrently, one `StatusPoller` loop each. The first
//!   hard error wins and the remaining polls are dropped.
//! - One `CancellationToken` is shared by the enumerator wait, every poller,
//!   and the pump. Cancelling it ends the run with `IngestError::Cancelled`.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use futures::future::try_join_all;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::app_config::{AppConfig, ModeConfig};
use crate::backends::{IngestBackend, IngestBackendKind, ObjectStore, ObjectStoreBackend};
use crate::common::{IngestOptions, OperationHandle, StatusSummary, TableTarget};
use crate::enumerator::{PrefixLocation, SourceEnumerator};
use crate::error::IngestError;
use crate::payloads::{PayloadSourceBackend, PayloadSourceConfig};
use crate::poller::{PollProgress, StatusPoller};
use crate::progress::{PumpProgress, render_poll_table};
use crate::pump::{PumpReport, StreamPump};
use crate::submitter::BatchSubmitter;

/// 🏁 Where one tracked operation ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationOutcome {
    pub handle: OperationHandle,
    pub summary: StatusSummary,
}

/// 🏁 What a run produced, by mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// 📨 Queued and Resume runs: one entry per polled handle.
    Queued(Vec<OperationOutcome>),
    /// 🚰 Streaming runs: the pump's tally.
    Streaming(PumpReport),
}

impl RunOutcome {
    /// ✅ Every operation `Succeeded`, or every payload landed.
    pub fn is_success(&self) -> bool {
        match self {
            RunOutcome::Queued(outcomes) => outcomes
                .iter()
                .all(|o| o.summary.status == crate::common::IngestStatus::Succeeded),
            RunOutcome::Streaming(report) => report.failures.is_empty(),
        }
    }
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunOutcome::Queued(outcomes) if outcomes.is_empty() => write!(f, "nothing to ingest"),
            RunOutcome::Queued(outcomes) => {
                for (i, the_outcome) in outcomes.iter().enumerate() {
                    if i > 0 {
                        writeln!(f)?;
                    }
                    write!(f, "{}: {}", the_outcome.handle.id, the_outcome.summary)?;
                }
                Ok(())
            }
            RunOutcome::Streaming(report) => write!(
                f,
                "{} payloads, {} succeeded, {} failed",
                report.submitted,
                report.succeeded(),
                report.failures.len()
            ),
        }
    }
}

/// 🎬 Runs the configured mode against one object store and one ingestion backend.
#[derive(Debug)]
pub struct Orchestrator<S, B> {
    config: AppConfig,
    target: TableTarget,
    store: Arc<S>,
    backend: Arc<B>,
    cancel: CancellationToken,
}

impl Orchestrator<ObjectStoreBackend, IngestBackendKind> {
    /// 🏗️ Validate the config and build the collaborators it names.
    pub fn from_config(config: AppConfig, cancel: CancellationToken) -> anyhow::Result<Self> {
        let the_target = config.validate()?;
        let the_store = ObjectStoreBackend::from_config(&config.object_store)
            .context("💀 could not build the object store")?;
        let the_backend = IngestBackendKind::from_config(&config.backend, &the_target)
            .context("💀 could not build the ingestion backend")?;
        Self::new(config, Arc::new(the_store), Arc::new(the_backend), cancel)
    }
}

impl<S, B> Orchestrator<S, B>
where
    S: ObjectStore,
    B: IngestBackend + 'static,
{
    pub fn new(
        config: AppConfig,
        store: Arc<S>,
        backend: Arc<B>,
        cancel: CancellationToken,
    ) -> anyhow::Result<Self> {
        let the_target = config.validate()?;
        Ok(Self {
            config,
            target: the_target,
            store,
            backend,
            cancel,
        })
    }

    /// 🚀 Run the configured mode to completion.
    pub async fn run(&self) -> anyhow::Result<RunOutcome> {
        let Some(the_mode) = &self.config.mode else {
            anyhow::bail!("💀 no mode configured. Pick one of Queued, Streaming or Resume.");
        };
        let the_options = self.config.ingest.options_for(the_mode);
        info!(
            "🚀 ingesting into {} as {} (tracking: {})",
            self.target, the_options.format, the_options.enable_tracking
        );

        match the_mode {
            ModeConfig::Queued {
                prefix_url,
                suffix,
                access_suffix,
                max_count,
                handle_file,
            } => {
                let the_handles = self
                    .submit_queued(
                        prefix_url,
                        suffix,
                        access_suffix,
                        *max_count,
                        handle_file.as_deref().map(Path::new),
                        &the_options,
                    )
                    .await?;
                Ok(RunOutcome::Queued(self.poll_handles(the_handles).await?))
            }
            ModeConfig::Streaming { payloads } => Ok(RunOutcome::Streaming(
                self.run_streaming(payloads, &the_options).await?,
            )),
            ModeConfig::Resume { handle_file } => {
                let the_handles = read_handles(Path::new(handle_file)).await?;
                Ok(RunOutcome::Queued(self.poll_handles(the_handles).await?))
            }
        }
    }

    /// 📨 Enumerate, batch, submit. Returns the handles in submission order.
    async fn submit_queued(
        &self,
        prefix_url: &str,
        suffix: &str,
        access_suffix: &str,
        max_count: usize,
        handle_file: Option<&Path>,
        options: &IngestOptions,
    ) -> anyhow::Result<Vec<OperationHandle>> {
        let the_location = PrefixLocation::parse(prefix_url)?;
        let the_enumerator = SourceEnumerator::new(Arc::clone(&self.store));
        let the_references = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(IngestError::Cancelled.into()),
            found = the_enumerator.enumerate_all(&the_location, suffix, max_count) => found
                .with_context(|| format!("💀 listing '{prefix_url}' went sideways"))?,
        };

        if the_references.is_empty() {
            warn!("🤷 no eligible files under '{prefix_url}' with suffix '{suffix}', nothing to submit");
            return Ok(Vec::new());
        }
        for the_reference in &the_references {
            info!("📄 {} ({} bytes)", the_reference.uri(), the_reference.size);
        }

        let the_submitter = BatchSubmitter::new(Arc::clone(&self.backend), access_suffix);
        let mut the_handles = Vec::new();
        for the_batch in the_references.chunks(self.config.runtime.batch_size) {
            if self.cancel.is_cancelled() {
                return Err(IngestError::Cancelled.into());
            }
            let the_handle = the_submitter
                .submit(the_batch.to_vec(), &self.target, options)
                .await
                .with_context(|| format!("💀 submitting a batch of {} sources failed", the_batch.len()))?;

            let the_serialized = the_handle.to_json_string()?;
            info!("🎟️ {the_serialized}");
            if let Some(path) = handle_file {
                append_handle(path, &the_serialized).await?;
            }
            the_handles.push(the_handle);
        }
        Ok(the_handles)
    }

    /// 🚰 Pump every payload the configured source produces.
    async fn run_streaming(
        &self,
        payloads: &PayloadSourceConfig,
        options: &IngestOptions,
    ) -> anyhow::Result<PumpReport> {
        let mut the_source = PayloadSourceBackend::from_config(payloads, options.compression)
            .await
            .context("💀 the payload source would not open")?;
        let the_pump = StreamPump::new(
            Arc::clone(&self.backend),
            self.config.runtime.pump_config(),
            self.cancel.clone(),
        );

        let mut the_progress = PumpProgress::new(format!("{}.{}", self.target.database, self.target.table));
        let the_result = the_pump
            .pump_with(&mut the_source, &self.target, options, |drained| {
                the_progress.update(drained)
            })
            .await;
        the_progress.finish();
        let the_report = the_result?;

        for the_failure in &the_report.failures {
            warn!("⚠️ payload #{} failed: {}", the_failure.sequence, the_failure.error);
        }
        info!(
            "🏁 streamed {} payloads: {} succeeded, {} failed",
            the_report.submitted,
            the_report.succeeded(),
            the_report.failures.len()
        );
        Ok(the_report)
    }

    /// ⏳ Poll every handle to a terminal state, all at once.
    pub async fn poll_handles(&self, handles: Vec<OperationHandle>) -> anyhow::Result<Vec<OperationOutcome>> {
        if handles.is_empty() {
            return Ok(Vec::new());
        }
        let the_poller = StatusPoller::new(
            Arc::clone(&self.backend),
            self.config.runtime.poller_config(),
            self.cancel.clone(),
        );

        let the_polls = handles.into_iter().map(|handle| {
            let the_poller = &the_poller;
            async move {
                let mut the_last_seen: Option<PollProgress> = None;
                let the_summary = the_poller
                    .poll_until_terminal_with(&handle, |progress| the_last_seen = Some(progress.clone()))
                    .await
                    .with_context(|| format!("💀 polling operation '{}' gave up", handle.id))?;
                Ok::<_, anyhow::Error>((OperationOutcome { handle, summary: the_summary }, the_last_seen))
            }
        });
        let the_results = try_join_all(the_polls).await?;

        let the_rows: Vec<PollProgress> = the_results.iter().filter_map(|(_, seen)| seen.clone()).collect();
        info!("📊 final poll board:\n{}", render_poll_table(&the_rows));

        let the_outcomes: Vec<OperationOutcome> = the_results.into_iter().map(|(outcome, _)| outcome).collect();
        for the_outcome in &the_outcomes {
            info!("🏁 {}: {}", the_outcome.handle.id, the_outcome.summary);
        }
        Ok(the_outcomes)
    }
}

/// 📝 One serialized handle per line, appended.
async fn append_handle(path: &Path, serialized: &str) -> anyhow::Result<()> {
    let mut the_file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .with_context(|| format!("💀 could not open handle file '{}'", path.display()))?;
    the_file
        .write_all(format!("{serialized}\n").as_bytes())
        .await
        .with_context(|| format!("💀 could not write to handle file '{}'", path.display()))?;
    the_file.flush().await?;
    Ok(())
}

/// 📖 Read handles back, skipping blank lines. A malformed line fails the whole read.
pub async fn read_handles(path: &Path) -> anyhow::Result<Vec<OperationHandle>> {
    let the_text = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("💀 could not read handle file '{}'", path.display()))?;
    the_text
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| {
            OperationHandle::from_json_string(line.trim())
                .with_context(|| format!("💀 line {} of '{}' is not a handle", i + 1, path.display()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app_config::{BackendConfig, IngestConfig, ObjectStoreConfig, RuntimeConfig};
    use crate::backends::{InMemoryIngestBackend, InMemoryObjectStore, ObjectEntry, StreamBehavior};
    use crate::common::IngestStatus;
    use std::time::Duration;

    const CONTAINER: &str = "https://store.example/container";
    const TARGET: &str = "https://cluster.example/db1/tableA";

    fn entry(name: &str, size: u64) -> ObjectEntry {
        ObjectEntry {
            name: name.into(),
            size,
        }
    }

    fn app_config(mode: ModeConfig) -> AppConfig {
        AppConfig {
            target_uri: TARGET.into(),
            mode: Some(mode),
            ingest: IngestConfig::default(),
            object_store: ObjectStoreConfig::default(),
            backend: BackendConfig::default(),
            runtime: RuntimeConfig::default(),
        }
    }

    fn queued(handle_file: Option<String>) -> ModeConfig {
        ModeConfig::Queued {
            prefix_url: format!("{CONTAINER}/batch-"),
            suffix: ".parquet".into(),
            access_suffix: "?sig=abc".into(),
            max_count: 500,
            handle_file,
        }
    }

    fn scenario_store() -> Arc<InMemoryObjectStore> {
        let the_objects = (1..=7)
            .map(|i| entry(&format!("batch-{i}.parquet"), 100))
            .chain([entry("batch-empty.parquet", 0)])
            .collect();
        Arc::new(InMemoryObjectStore::new().with_container(CONTAINER, the_objects))
    }

    #[tokio::test(start_paused = true)]
    async fn the_one_where_seven_files_go_in_and_seven_successes_come_out() {
        let the_dir = tempfile::tempdir().expect("💀 temp dir");
        let the_handle_file = the_dir.path().join("handles.jsonl");
        let the_backend = Arc::new(InMemoryIngestBackend::new());

        let the_orchestrator = Orchestrator::new(
            app_config(queued(Some(the_handle_file.display().to_string()))),
            scenario_store(),
            Arc::clone(&the_backend),
            CancellationToken::new(),
        )
        .expect("💀 orchestrator");
        let the_outcome = the_orchestrator.run().await.expect("💀 run");

        match &the_outcome {
            RunOutcome::Queued(outcomes) => {
                assert_eq!(outcomes.len(), 1);
                assert_eq!(
                    outcomes[0].summary,
                    StatusSummary::new(IngestStatus::Succeeded, 0, 0, 7)
                );
            }
            honestly_who_knows => panic!("💀 expected a queued outcome, got {honestly_who_knows:?}"),
        }
        assert!(the_outcome.is_success());
        assert_eq!(the_outcome.to_string(), "op-1: Succeeded, 7 succeeded, 0 failed");

        let the_submissions = the_backend.submissions().await;
        assert_eq!(the_submissions.len(), 1);
        assert!(the_submissions[0]
            .source_uris()
            .iter()
            .all(|uri| uri.ends_with(".parquet?sig=abc")));

        let the_persisted = read_handles(&the_handle_file).await.expect("💀 handles");
        assert_eq!(the_persisted.len(), 1);
        assert_eq!(the_persisted[0].database, "db1");
    }

    #[tokio::test(start_paused = true)]
    async fn the_one_where_forty_five_files_make_three_batches() {
        let the_objects = (0..45)
            .map(|i| entry(&format!("batch-{i:02}.parquet"), 1))
            .collect();
        let the_store = Arc::new(InMemoryObjectStore::new().with_container(CONTAINER, the_objects));
        let the_backend = Arc::new(InMemoryIngestBackend::new());

        let the_outcome = Orchestrator::new(
            app_config(queued(None)),
            the_store,
            Arc::clone(&the_backend),
            CancellationToken::new(),
        )
        .expect("💀 orchestrator")
        .run()
        .await
        .expect("💀 run");

        let the_sizes: Vec<usize> = the_backend
            .submissions()
            .await
            .iter()
            .map(|s| s.sources.len())
            .collect();
        assert_eq!(the_sizes, vec![20, 20, 5]);
        match the_outcome {
            RunOutcome::Queued(outcomes) => assert_eq!(outcomes.len(), 3),
            honestly_who_knows => panic!("💀 expected a queued outcome, got {honestly_who_knows:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn the_one_where_an_empty_prefix_submits_nothing() {
        let the_store = Arc::new(InMemoryObjectStore::new().with_container(CONTAINER, vec![]));
        let the_backend = Arc::new(InMemoryIngestBackend::new());

        let the_outcome = Orchestrator::new(
            app_config(queued(None)),
            the_store,
            Arc::clone(&the_backend),
            CancellationToken::new(),
        )
        .expect("💀 orchestrator")
        .run()
        .await
        .expect("💀 run");

        assert_eq!(the_outcome, RunOutcome::Queued(vec![]));
        assert!(the_backend.submissions().await.is_empty());
        assert_eq!(the_outcome.to_string(), "nothing to ingest");
    }

    #[tokio::test(start_paused = true)]
    async fn the_one_where_a_later_run_picks_up_the_handles_and_keeps_polling() {
        let the_dir = tempfile::tempdir().expect("💀 temp dir");
        let the_handle_file = the_dir.path().join("handles.jsonl");
        let the_backend = Arc::new(InMemoryIngestBackend::new().with_default_script(vec![
            Ok(StatusSummary::new(IngestStatus::InProgress, 7, 0, 0)),
            Ok(StatusSummary::new(IngestStatus::InProgress, 3, 0, 4)),
            Ok(StatusSummary::new(IngestStatus::Succeeded, 0, 0, 7)),
        ]));

        let the_first_run = Orchestrator::new(
            app_config(queued(Some(the_handle_file.display().to_string()))),
            scenario_store(),
            Arc::clone(&the_backend),
            CancellationToken::new(),
        )
        .expect("💀 orchestrator");
        let the_options = the_first_run
            .config
            .ingest
            .options_for(the_first_run.config.mode.as_ref().expect("💀 mode"));
        let the_handles = the_first_run
            .submit_queued(
                &format!("{CONTAINER}/batch-"),
                ".parquet",
                "",
                500,
                Some(the_handle_file.as_path()),
                &the_options,
            )
            .await
            .expect("💀 submit");
        assert_eq!(the_handles.len(), 1);

        // -- blank lines sneak into hand-edited files; they are not handles
        let mut the_text = tokio::fs::read_to_string(&the_handle_file).await.expect("💀 read");
        the_text.push_str("\n\n");
        tokio::fs::write(&the_handle_file, the_text).await.expect("💀 write");

        let the_outcome = Orchestrator::new(
            app_config(ModeConfig::Resume {
                handle_file: the_handle_file.display().to_string(),
            }),
            Arc::new(InMemoryObjectStore::new()),
            Arc::clone(&the_backend),
            CancellationToken::new(),
        )
        .expect("💀 orchestrator")
        .run()
        .await
        .expect("💀 resume");

        assert_eq!(
            the_outcome,
            RunOutcome::Queued(vec![OperationOutcome {
                handle: the_handles[0].clone(),
                summary: StatusSummary::new(IngestStatus::Succeeded, 0, 0, 7),
            }])
        );
        assert_eq!(the_backend.status_queries(), 3);
    }

    #[tokio::test]
    async fn the_one_where_a_garbled_handle_file_is_refused() {
        let the_dir = tempfile::tempdir().expect("💀 temp dir");
        let the_handle_file = the_dir.path().join("handles.jsonl");
        tokio::fs::write(&the_handle_file, "{\"id\":\"op-0\",\"database\":\"db1\",\"table\":\"t\"}\nnot json\n")
            .await
            .expect("💀 write");

        let the_error = read_handles(&the_handle_file).await.expect_err("💀 should refuse");
        assert!(format!("{the_error:#}").contains("line 2"));
    }

    #[tokio::test(start_paused = true)]
    async fn the_one_where_streaming_reports_the_payloads_that_fell_over() {
        let the_backend = Arc::new(InMemoryIngestBackend::new().with_stream_behavior(|payload| StreamBehavior {
            delay: Duration::from_millis(50),
            fail: payload.sequence == 2,
        }));
        let the_items = (0..5).map(|i| format!("{{\"n\":{i}}}")).collect();

        let the_outcome = Orchestrator::new(
            app_config(ModeConfig::Streaming {
                payloads: PayloadSourceConfig::InMemory { items: the_items },
            }),
            Arc::new(InMemoryObjectStore::new()),
            Arc::clone(&the_backend),
            CancellationToken::new(),
        )
        .expect("💀 orchestrator")
        .run()
        .await
        .expect("💀 run");

        match &the_outcome {
            RunOutcome::Streaming(report) => {
                assert_eq!(report.submitted, 5);
                assert_eq!(report.succeeded(), 4);
                assert_eq!(report.failures.len(), 1);
                assert_eq!(report.failures[0].sequence, 2);
            }
            honestly_who_knows => panic!("💀 expected a streaming outcome, got {honestly_who_knows:?}"),
        }
        assert!(!the_outcome.is_success());
        assert_eq!(the_outcome.to_string(), "5 payloads, 4 succeeded, 1 failed");
        assert!(the_backend.max_streams_in_flight() <= 4);
    }

    #[tokio::test(start_paused = true)]
    async fn the_one_where_ctrl_c_arrives_before_anything_happens() {
        let the_cancel = CancellationToken::new();
        the_cancel.cancel();
        let the_backend = Arc::new(InMemoryIngestBackend::new());

        let the_error = Orchestrator::new(
            app_config(queued(None)),
            scenario_store(),
            Arc::clone(&the_backend),
            the_cancel,
        )
        .expect("💀 orchestrator")
        .run()
        .await
        .expect_err("💀 a cancelled run must not succeed");

        assert_eq!(the_error.downcast_ref::<IngestError>(), Some(&IngestError::Cancelled));
        assert!(the_backend.submissions().await.is_empty());
    }

    #[tokio::test]
    async fn the_one_where_running_without_a_mode_is_refused() {
        let mut the_config = app_config(queued(None));
        the_config.mode = None;
        let the_backend = Arc::new(InMemoryIngestBackend::new());

        let the_result = Orchestrator::new(
            the_config,
            scenario_store(),
            Arc::clone(&the_backend),
            CancellationToken::new(),
        )
        .expect("💀 orchestrator")
        .run()
        .await;

        assert!(the_result.is_err());
        assert!(the_backend.submissions().await.is_empty());
    }

    #[test]
    fn the_one_where_a_bad_target_stops_construction() {
        let mut the_config = app_config(queued(None));
        the_config.target_uri = "https://cluster.example/only-db".into();
        let the_result = Orchestrator::new(
            the_config,
            Arc::new(InMemoryObjectStore::new()),
            Arc::new(InMemoryIngestBackend::new()),
            CancellationToken::new(),
        );
        assert!(the_result.is_err());
    }
}
