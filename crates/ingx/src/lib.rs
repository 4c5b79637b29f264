//! 🚀 ingx: find files, hand them to a cluster, and keep asking until it says it's done.
//!
//! 🧠 Knowledge graph:
//! - `enumerator` finds eligible files under a prefix, `submitter` hands batches
//!   to the backend, and `poller` waits on the resulting operation handles.
//! - `pump` is the streaming path: payloads go straight to the table through a
//!   bounded window of in-flight submissions.
//! - `backends` holds the object store and ingestion backend traits plus their
//!   in-memory and HTTP implementations. `orchestrator` ties it all together.

pub mod app_config;
pub mod backends;
pub mod common;
pub mod enumerator;
pub mod error;
pub mod orchestrator;
pub mod payloads;
pub mod poller;
pub(crate) mod progress;
pub mod pump;
pub mod submitter;

use anyhow::Context;
use tokio_util::sync::CancellationToken;

use crate::app_config::AppConfig;
use crate::common::OperationHandle;
use crate::orchestrator::{OperationOutcome, Orchestrator, RunOutcome};

/// 🚀 Run whatever mode the config describes.
pub async fn run(app_config: AppConfig, cancel: CancellationToken) -> anyhow::Result<RunOutcome> {
    let the_orchestrator = Orchestrator::from_config(app_config, cancel)?;
    the_orchestrator
        .run()
        .await
        .context("💀 the ingestion run did not finish")
}

/// ⏳ Poll one serialized handle (as written by a queued run) until it is terminal.
pub async fn poll_handle(
    app_config: AppConfig,
    serialized_handle: &str,
    cancel: CancellationToken,
) -> anyhow::Result<OperationOutcome> {
    let the_handle = OperationHandle::from_json_string(serialized_handle)
        .context("💀 that does not look like an operation handle")?;
    let the_orchestrator = Orchestrator::from_config(app_config, cancel)?;
    let mut the_outcomes = the_orchestrator.poll_handles(vec![the_handle]).await?;
    the_outcomes
        .pop()
        .context("💀 polling finished without reporting on the handle")
}
