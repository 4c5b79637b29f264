//! 🔧 App Configuration: the sacred TOML-to-struct pipeline, now with a cluster attached.
//!
//! 📡 "Config not found: We looked everywhere. Under the couch. Behind the fridge.
//! In the junk drawer. Nothing." -- every developer at 3am 🦆
//!
//! 🏗️ Powered by Figment. Env vars (`INGX_*`) form the base layer, an optional
//! TOML file is merged on top and wins on conflicts.
//!
//! 🧠 Knowledge graph:
//! - `mode` picks the run shape: `Queued` (enumerate, submit, poll), `Streaming`
//!   (pump payloads), or `Resume` (poll handles a previous run wrote down).
//! - `object_store` / `backend` pick the collaborators. `InMemory` is the dry-run
//!   default; `Http` talks JSON to real endpoints.
//! - `validate()` catches the mistakes that would otherwise surface mid-run:
//!   a target without database/table, zero concurrency, zero batch size.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, bail};
use figment::{
    Figment,
    providers::{Env, Format, Toml},
};
use serde::Deserialize;
use tracing::info;

use crate::backends::{HttpBackendConfig, ObjectEntry};
use crate::common::{Compression, DataFormat, IngestOptions, StatusSummary, TableTarget};
use crate::payloads::PayloadSourceConfig;
use crate::poller::PollerConfig;
use crate::pump::PumpConfig;

/// 📦 One struct to rule them all, one struct to find them,
/// one struct to bring them all, and in the Figment bind them.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    /// 🎯 `https://cluster/{database}/{table}`
    pub target_uri: String,
    /// 🎬 Required by `run`. Polling a single handle gets by without it.
    #[serde(default)]
    pub mode: Option<ModeConfig>,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub object_store: ObjectStoreConfig,
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
}

/// 🎬 What kind of run this is.
#[derive(Debug, Deserialize, Clone)]
pub enum ModeConfig {
    /// 📨 Discover files under a prefix, submit them in batches, poll until done.
    Queued {
        /// 📍 `https://store/container/name-prefix`
        prefix_url: String,
        #[serde(default)]
        suffix: String,
        /// 🔑 Appended verbatim to every source URI (SAS token and friends).
        #[serde(default)]
        access_suffix: String,
        #[serde(default = "default_max_count")]
        max_count: usize,
        /// 📝 Serialized handles get appended here, one per line.
        #[serde(default)]
        handle_file: Option<String>,
    },
    /// 🚰 Push payloads straight at the table, bounded concurrency.
    Streaming { payloads: PayloadSourceConfig },
    /// 🔁 Poll handles that an earlier run wrote to `handle_file`.
    Resume { handle_file: String },
}

fn default_max_count() -> usize {
    500
}

/// 🧾 Ingestion properties. `format` falls back per mode when unset.
#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    #[serde(default)]
    pub format: Option<DataFormat>,
    #[serde(default = "default_enable_tracking")]
    pub enable_tracking: bool,
    #[serde(default)]
    pub compression: Compression,
}

fn default_enable_tracking() -> bool {
    true
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            format: None,
            enable_tracking: default_enable_tracking(),
            compression: Compression::None,
        }
    }
}

impl IngestConfig {
    /// 🎛️ Queued runs default to parquet, streaming runs to json.
    pub fn options_for(&self, mode: &ModeConfig) -> IngestOptions {
        let the_fallback = match mode {
            ModeConfig::Streaming { .. } => DataFormat::Json,
            ModeConfig::Queued { .. } | ModeConfig::Resume { .. } => DataFormat::Parquet,
        };
        IngestOptions {
            format: self.format.unwrap_or(the_fallback),
            enable_tracking: self.enable_tracking,
            compression: self.compression,
        }
    }
}

/// 🪣 Where listings come from.
#[derive(Debug, Deserialize, Clone)]
pub enum ObjectStoreConfig {
    /// 🧠 Containers spelled out in config, keyed by container URI.
    InMemory {
        #[serde(default)]
        containers: HashMap<String, Vec<ObjectEntry>>,
    },
    Http(HttpBackendConfig),
}

impl Default for ObjectStoreConfig {
    fn default() -> Self {
        Self::InMemory {
            containers: HashMap::new(),
        }
    }
}

/// 🏭 Who ingests the data.
#[derive(Debug, Deserialize, Clone)]
pub enum BackendConfig {
    /// 🧠 Every operation walks through `script`; empty means "succeed right away".
    InMemory {
        #[serde(default)]
        script: Vec<StatusSummary>,
    },
    Http(HttpBackendConfig),
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self::InMemory { script: Vec::new() }
    }
}

/// ⚙️ The knobs that shape concurrency and patience.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeConfig {
    #[serde(default = "default_max_concurrency", alias = "parallelism")]
    pub max_concurrency: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_max_transient_retries")]
    pub max_transient_retries: u32,
}

fn default_max_concurrency() -> usize {
    4
}

fn default_batch_size() -> usize {
    20
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_max_transient_retries() -> u32 {
    5
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            batch_size: default_batch_size(),
            poll_interval_ms: default_poll_interval_ms(),
            max_transient_retries: default_max_transient_retries(),
        }
    }
}

impl RuntimeConfig {
    pub fn poller_config(&self) -> PollerConfig {
        PollerConfig {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            max_transient_retries: self.max_transient_retries,
        }
    }

    pub fn pump_config(&self) -> PumpConfig {
        PumpConfig {
            max_concurrency: self.max_concurrency,
        }
    }
}

impl AppConfig {
    /// 🔍 Parse the target and sanity-check the runtime knobs. Nothing here touches the network.
    pub fn validate(&self) -> anyhow::Result<TableTarget> {
        let the_target = TableTarget::parse(&self.target_uri)
            .with_context(|| format!("💀 target_uri '{}' is not a usable connection URI", self.target_uri))?;
        if self.runtime.max_concurrency == 0 {
            bail!("💀 runtime.max_concurrency must be at least 1. Zero lanes means zero traffic.");
        }
        if self.runtime.batch_size == 0 {
            bail!("💀 runtime.batch_size must be at least 1. Empty envelopes don't get delivered.");
        }
        Ok(the_target)
    }
}

/// 🚀 Load the config from env vars (`INGX_*`) and, if given, a TOML file.
///
/// 📐 No file means env vars only. No fallback filename, no assumptions.
/// The result is validated before it is handed back.
pub fn load_config(config_file_name: Option<&Path>) -> anyhow::Result<AppConfig> {
    info!(
        "🔧 Loading configuration: {:#?}",
        config_file_name.unwrap_or(Path::new(""))
    );

    let config = Figment::new().merge(Env::prefixed("INGX_"));
    let config = match config_file_name {
        Some(file_name) => config.merge(Toml::file(file_name)),
        None => config,
    };

    let context_msg = match config_file_name {
        Some(path) => format!(
            "💀 Failed to parse configuration from file '{}' and environment variables (INGX_*). \
             The file exists in our hearts, but apparently not on disk.",
            path.display()
        ),
        None => "💀 Failed to parse configuration from environment variables (INGX_*). \
                 No file was provided, so this one's all on the environment."
            .to_string(),
    };

    let the_config: AppConfig = config.extract().context(context_msg)?;
    the_config.validate()?;
    Ok(the_config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::IngestStatus;
    use std::io::Write;

    fn write_test_config(contents: &str) -> tempfile::NamedTempFile {
        let mut the_file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .expect("💀 temp file");
        // 🧪 Figment wants TOML from disk, like it's method acting.
        the_file
            .write_all(contents.as_bytes())
            .expect("💀 Failed to write test config. The filesystem said 'new phone who dis'.");
        the_file
    }

    #[test]
    fn the_one_where_a_queued_run_is_spelled_out_in_toml() {
        let the_file = write_test_config(
            r#"
            target_uri = "https://cluster.example/db1/tableA"

            [mode.Queued]
            prefix_url = "https://store.example/container/batch-"
            suffix = ".parquet"
            access_suffix = "?sig=abc"
            handle_file = "handles.jsonl"

            [runtime]
            batch_size = 10
            poll_interval_ms = 250
            "#,
        );

        let the_config = load_config(Some(the_file.path())).expect("💀 queued config should parse");

        match &the_config.mode {
            Some(ModeConfig::Queued {
                prefix_url,
                suffix,
                access_suffix,
                max_count,
                handle_file,
            }) => {
                assert_eq!(prefix_url, "https://store.example/container/batch-");
                assert_eq!(suffix, ".parquet");
                assert_eq!(access_suffix, "?sig=abc");
                assert_eq!(*max_count, 500);
                assert_eq!(handle_file.as_deref(), Some("handles.jsonl"));
            }
            honestly_who_knows => panic!("💀 expected Queued, serde took us to {honestly_who_knows:?}"),
        }
        assert_eq!(the_config.runtime.batch_size, 10);
        assert_eq!(the_config.runtime.max_concurrency, 4);
        assert_eq!(
            the_config.runtime.poller_config().poll_interval,
            Duration::from_millis(250)
        );

        let the_options = the_config.ingest.options_for(the_config.mode.as_ref().expect("💀 mode"));
        assert_eq!(the_options.format, DataFormat::Parquet);
        assert!(the_options.enable_tracking);
        assert!(matches!(the_config.backend, BackendConfig::InMemory { .. }));
    }

    #[test]
    fn the_one_where_streaming_defaults_to_json_and_parallelism_is_an_alias() {
        let the_file = write_test_config(
            r#"
            target_uri = "https://cluster.example/db1/tableA"

            [mode.Streaming.payloads.File]
            file_name = "events.ndjson"
            records_per_payload = 50

            [ingest]
            compression = "gzip"
            enable_tracking = false

            [runtime]
            parallelism = 8

            [backend.Http]
            url = "http://localhost:9000"
            bearer_token = "hunter2"
            "#,
        );

        let the_config = load_config(Some(the_file.path())).expect("💀 streaming config should parse");

        assert_eq!(the_config.runtime.max_concurrency, 8);
        assert_eq!(the_config.runtime.pump_config().max_concurrency, 8);
        let the_options = the_config.ingest.options_for(the_config.mode.as_ref().expect("💀 mode"));
        assert_eq!(the_options.format, DataFormat::Json);
        assert_eq!(the_options.compression, Compression::Gzip);
        assert!(!the_options.enable_tracking);
        match &the_config.mode {
            Some(ModeConfig::Streaming {
                payloads: PayloadSourceConfig::File(file_config),
            }) => {
                assert_eq!(file_config.file_name, "events.ndjson");
                assert_eq!(file_config.records_per_payload, 50);
            }
            honestly_who_knows => panic!("💀 expected a File payload source, got {honestly_who_knows:?}"),
        }
        match &the_config.backend {
            BackendConfig::Http(http) => {
                assert_eq!(http.url.as_deref(), Some("http://localhost:9000"));
                assert_eq!(http.bearer_token.as_deref(), Some("hunter2"));
            }
            honestly_who_knows => panic!("💀 expected Http backend, got {honestly_who_knows:?}"),
        }
    }

    #[test]
    fn the_one_where_the_dry_run_cluster_has_a_script() {
        let the_file = write_test_config(
            r#"
            target_uri = "https://cluster.example/db1/tableA"

            [mode.Resume]
            handle_file = "handles.jsonl"

            [[backend.InMemory.script]]
            status = "InProgress"
            in_progress_count = 1
            failed_count = 0
            succeeded_count = 0

            [[object_store.InMemory.containers."https://store.example/container"]]
            name = "batch-1.parquet"
            size = 10
            "#,
        );

        let the_config = load_config(Some(the_file.path())).expect("💀 resume config should parse");

        match &the_config.backend {
            BackendConfig::InMemory { script } => {
                assert_eq!(script, &vec![StatusSummary::new(IngestStatus::InProgress, 1, 0, 0)]);
            }
            honestly_who_knows => panic!("💀 expected InMemory backend, got {honestly_who_knows:?}"),
        }
        match &the_config.object_store {
            ObjectStoreConfig::InMemory { containers } => {
                assert_eq!(containers["https://store.example/container"].len(), 1);
            }
            honestly_who_knows => panic!("💀 expected InMemory store, got {honestly_who_knows:?}"),
        }
    }

    #[test]
    fn the_one_where_a_target_without_a_table_is_rejected_up_front() {
        let the_file = write_test_config(
            r#"
            target_uri = "https://cluster.example/db1"

            [mode.Resume]
            handle_file = "handles.jsonl"
            "#,
        );

        let the_error = load_config(Some(the_file.path())).expect_err("💀 a half target must not load");
        assert!(format!("{the_error:#}").contains("target_uri"));
    }

    #[test]
    fn the_one_where_zero_concurrency_and_zero_batches_are_config_errors() {
        let the_file = write_test_config(
            r#"
            target_uri = "https://cluster.example/db1/tableA"

            [mode.Resume]
            handle_file = "handles.jsonl"
            "#,
        );
        let mut the_config = load_config(Some(the_file.path())).expect("💀 base config should parse");

        the_config.runtime.max_concurrency = 0;
        assert!(the_config.validate().is_err());

        the_config.runtime.max_concurrency = 1;
        the_config.runtime.batch_size = 0;
        assert!(the_config.validate().is_err());

        the_config.runtime.batch_size = 1;
        assert_eq!(
            the_config.validate().expect("💀 fixed config").to_string(),
            "https://cluster.example/db1/tableA"
        );
    }
}
