//! 📦 Common data structures: the nouns of ingx.
//!
//! 🎬 COLD OPEN. INT. BLOB CONTAINER, 2:13 AM
//!
//! Seven parquet files sit in a container called `container`, each named
//! `batch-something.parquet`, each patiently waiting to become rows in
//! `db1.tableA`. They don't know about operation handles. They don't know
//! about polling. They just want to be loaded. Relatable.
//!
//! This module holds the plain types that flow between the enumerator, the
//! submitter, the poller and the pump. They don't do I/O. They carry data
//! and keep their invariants, like good postal workers.
//!
//! 🧠 Knowledge graph:
//! - `SourceReference`: one listed object. Created by the enumerator, consumed once by a submission.
//! - `TableTarget`: cluster endpoint + database + table, parsed once from the connection URI.
//! - `IngestOptions`: format, tracking, compression hint.
//! - `SubmissionRequest`: references + target + options, handed to `IngestBackend::submit_batch`.
//! - `OperationHandle`: the only durable artifact. Must survive a JSON round trip.
//! - `StatusSummary` / `IngestStatus`: a poll snapshot. Recomputed every time, never persisted.
//! - `Payload`: one in-memory chunk for streaming mode.

use std::fmt;

use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

use crate::error::{IngestError, IngestResult};

// ============================================================
//  🗂️ SourceReference
// ============================================================

/// 🗂️ An addressable handle to an object sitting in the object store.
///
/// Only references with `size > 0` and a name that matches the suffix filter
/// ever get built; the enumerator is the bouncer, this is just the wristband.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceReference {
    /// 🪣 Container URI, no trailing slash. e.g. `https://store.example/container`
    pub container_uri: String,
    /// 🏷️ Object name relative to the container. e.g. `batch-001.parquet`
    pub name: String,
    /// 📏 Size in bytes. Always positive once it reaches you.
    pub size: u64,
}

impl SourceReference {
    /// 🔗 `{container}/{name}`, the bare address.
    pub fn uri(&self) -> String {
        format!("{}/{}", self.container_uri, self.name)
    }

    /// 🔑 `{container}/{name}{access_suffix}`. The suffix is opaque (a SAS token,
    /// usually) and is appended verbatim. We do not read it. We do not judge it.
    pub fn access_uri(&self, access_suffix: &str) -> String {
        format!("{}{}", self.uri(), access_suffix)
    }
}

// ============================================================
//  🎯 TableTarget
// ============================================================

/// 🎯 Where the rows land: a cluster endpoint plus `/{database}/{table}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableTarget {
    /// 🌐 Everything before the path, e.g. `https://cluster.example`
    pub cluster_uri: String,
    pub database: String,
    pub table: String,
}

impl TableTarget {
    /// 🔍 Parse a connection URI whose path is exactly `/{database}/{table}`.
    ///
    /// A single trailing slash is tolerated (`/db/table/`). Anything else that
    /// isn't two non-empty segments is a configuration error, surfaced as
    /// `InvalidArgument` before any backend gets a phone call.
    pub fn parse(connection_uri: &str) -> IngestResult<Self> {
        let the_url = Url::parse(connection_uri).map_err(|e| {
            IngestError::InvalidArgument(format!(
                "connection URI '{connection_uri}' does not parse: {e}"
            ))
        })?;

        let the_path = the_url.path();
        let the_path = the_path.strip_suffix('/').unwrap_or(the_path);
        let the_segments: Vec<&str> = the_path
            .strip_prefix('/')
            .unwrap_or(the_path)
            .split('/')
            .collect();

        match the_segments.as_slice() {
            [database, table] if !database.is_empty() && !table.is_empty() => {
                let mut the_cluster = the_url.clone();
                the_cluster.set_path("");
                the_cluster.set_query(None);
                the_cluster.set_fragment(None);
                Ok(Self {
                    cluster_uri: the_cluster.as_str().trim_end_matches('/').to_string(),
                    database: (*database).to_string(),
                    table: (*table).to_string(),
                })
            }
            _ => Err(IngestError::InvalidArgument(format!(
                "connection URI '{connection_uri}' must have a path of exactly /{{database}}/{{table}}, got '{}'",
                the_url.path()
            ))),
        }
    }
}

impl fmt::Display for TableTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.cluster_uri, self.database, self.table)
    }
}

// ============================================================
//  🔧 IngestOptions
// ============================================================

/// 📄 What the bytes look like on the inside.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DataFormat {
    #[default]
    Parquet,
    Json,
    Multijson,
    Csv,
    Avro,
}

impl DataFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Parquet => "parquet",
            Self::Json => "json",
            Self::Multijson => "multijson",
            Self::Csv => "csv",
            Self::Avro => "avro",
        }
    }
}

impl fmt::Display for DataFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// 🫁 Compression hint. Squishy bytes or regular bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    #[default]
    None,
    Gzip,
}

/// 🔧 Knobs that ride along with every submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestOptions {
    #[serde(default)]
    pub format: DataFormat,
    /// 📊 With tracking off, the backend only reports aggregate status;
    /// per-item counts may stay at zero forever. The poller copes.
    #[serde(default = "default_enable_tracking")]
    pub enable_tracking: bool,
    #[serde(default)]
    pub compression: Compression,
}

fn default_enable_tracking() -> bool {
    true
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            format: DataFormat::default(),
            enable_tracking: default_enable_tracking(),
            compression: Compression::default(),
        }
    }
}

// ============================================================
//  📨 SubmissionRequest
// ============================================================

/// 📨 One batch submission, fully assembled. Ownership moves to the backend call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionRequest {
    pub sources: Vec<SourceReference>,
    pub access_suffix: String,
    pub target: TableTarget,
    pub options: IngestOptions,
}

impl SubmissionRequest {
    /// 🔑 Source URIs with the access suffix glued on, in submission order.
    pub fn source_uris(&self) -> Vec<String> {
        self.sources
            .iter()
            .map(|s| s.access_uri(&self.access_suffix))
            .collect()
    }
}

// ============================================================
//  🎟️ OperationHandle
// ============================================================

/// 🎟️ The claim ticket for one accepted batch submission.
///
/// Produced once by the backend, serialized to text, stored wherever, and
/// rebuilt later (possibly by a different process after a restart) to ask
/// "is it done yet?". `backend_ticket` is whatever JSON the backend answered
/// with, kept as raw text. We never parse it into numbers, so nothing in it
/// gets rounded on the way through.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationHandle {
    pub id: String,
    pub database: String,
    pub table: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend_ticket: Option<Box<RawValue>>,
}

impl PartialEq for OperationHandle {
    fn eq(&self, other: &Self) -> bool {
        // -- 🎟️ RawValue has no PartialEq, the raw text is the identity
        self.id == other.id
            && self.database == other.database
            && self.table == other.table
            && self.backend_ticket_text() == other.backend_ticket_text()
    }
}

impl Eq for OperationHandle {}

impl OperationHandle {
    pub fn new(id: impl Into<String>, database: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            database: database.into(),
            table: table.into(),
            backend_ticket: None,
        }
    }

    /// 📎 Attach the backend's own ticket. Must be valid JSON; surrounding
    /// whitespace is dropped, everything else is kept byte for byte.
    pub fn with_backend_ticket(mut self, ticket: &str) -> IngestResult<Self> {
        let the_raw = RawValue::from_string(ticket.trim().to_string()).map_err(|e| {
            IngestError::InvalidArgument(format!("backend ticket for '{}' is not JSON: {e}", self.id))
        })?;
        self.backend_ticket = Some(the_raw);
        Ok(self)
    }

    pub fn backend_ticket_text(&self) -> Option<&str> {
        self.backend_ticket.as_deref().map(RawValue::get)
    }

    /// 💾 Serialize to the durable text form.
    pub fn to_json_string(&self) -> IngestResult<String> {
        serde_json::to_string(self).map_err(|e| {
            IngestError::InvalidArgument(format!("operation handle '{}' would not serialize: {e}", self.id))
        })
    }

    /// 📂 Rebuild a handle from its durable text form.
    pub fn from_json_string(text: &str) -> IngestResult<Self> {
        serde_json::from_str(text.trim()).map_err(|e| {
            IngestError::InvalidArgument(format!("not a valid serialized operation handle: {e}"))
        })
    }
}

// ============================================================
//  📊 StatusSummary
// ============================================================

/// 🚦 Aggregate status of an operation, as the backend sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IngestStatus {
    Queued,
    InProgress,
    PartialSuccess,
    Succeeded,
    Failed,
}

impl IngestStatus {
    /// 🏁 Exactly two ways out: `Succeeded` and `Failed`. `PartialSuccess` keeps you waiting.
    pub fn is_terminal(&self) -> bool {
        matches!(self, IngestStatus::Succeeded | IngestStatus::Failed)
    }
}

impl fmt::Display for IngestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let the_label = match self {
            Self::Queued => "Queued",
            Self::InProgress => "InProgress",
            Self::PartialSuccess => "PartialSuccess",
            Self::Succeeded => "Succeeded",
            Self::Failed => "Failed",
        };
        f.write_str(the_label)
    }
}

/// 📊 One poll's worth of truth. Counts are advisory, `status` is authoritative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusSummary {
    pub status: IngestStatus,
    #[serde(default)]
    pub in_progress_count: u64,
    #[serde(default)]
    pub failed_count: u64,
    #[serde(default)]
    pub succeeded_count: u64,
}

impl StatusSummary {
    pub fn new(status: IngestStatus, in_progress: u64, failed: u64, succeeded: u64) -> Self {
        Self {
            status,
            in_progress_count: in_progress,
            failed_count: failed,
            succeeded_count: succeeded,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

impl fmt::Display for StatusSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}, {} succeeded, {} failed",
            self.status, self.succeeded_count, self.failed_count
        )
    }
}

// ============================================================
//  📦 Payload
// ============================================================

/// 📦 One in-memory chunk headed for streaming ingestion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload {
    /// 🔢 Position in the source, starting at 0. Dispatch order follows this.
    pub sequence: u64,
    pub bytes: Vec<u8>,
    pub compression: Compression,
}

impl Payload {
    pub fn new(sequence: u64, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            sequence,
            bytes: bytes.into(),
            compression: Compression::None,
        }
    }

    pub fn with_compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn the_one_where_the_connection_uri_splits_into_cluster_database_and_table() {
        let the_target = TableTarget::parse("https://cluster.example/db1/tableA")
            .expect("💀 a perfectly normal URI should parse");
        assert_eq!(the_target.cluster_uri, "https://cluster.example");
        assert_eq!(the_target.database, "db1");
        assert_eq!(the_target.table, "tableA");
    }

    #[test]
    fn the_one_where_ports_and_a_trailing_slash_are_forgiven() {
        let the_target = TableTarget::parse("http://localhost:8080/db/tbl/")
            .expect("💀 trailing slash should be tolerated");
        assert_eq!(the_target.cluster_uri, "http://localhost:8080");
        assert_eq!(the_target.database, "db");
        assert_eq!(the_target.table, "tbl");
    }

    #[test]
    fn the_one_where_uris_with_the_wrong_number_of_segments_are_config_errors() {
        for the_bad_uri in [
            "https://cluster.example",
            "https://cluster.example/",
            "https://cluster.example/db1",
            "https://cluster.example/db1/",
            "https://cluster.example//tableA",
            "https://cluster.example/db1/tableA/extra",
            "not a uri at all",
        ] {
            match TableTarget::parse(the_bad_uri) {
                Err(IngestError::InvalidArgument(_)) => {}
                honestly_who_knows => panic!(
                    "💀 '{the_bad_uri}' should be InvalidArgument, got {honestly_who_knows:?}"
                ),
            }
        }
    }

    #[test]
    fn the_one_where_the_access_suffix_is_glued_on_verbatim() {
        let the_reference = SourceReference {
            container_uri: "https://store.example/container".into(),
            name: "batch-1.parquet".into(),
            size: 42,
        };
        assert_eq!(
            the_reference.access_uri("?sv=2024&sig=abc"),
            "https://store.example/container/batch-1.parquet?sv=2024&sig=abc"
        );
    }

    #[test]
    fn the_one_where_a_handle_survives_the_round_trip_with_its_baggage() {
        let the_ticket = r#"{"id":"H1","startTime":"2026-10-16T00:00:00Z","shard":7,"database":"db1"}"#;
        let the_handle = OperationHandle::new("H1", "db1", "tableA")
            .with_backend_ticket(the_ticket)
            .expect("💀 ticket is JSON");

        let the_text = the_handle.to_json_string().expect("💀 serialize");
        let the_rebuilt = OperationHandle::from_json_string(&the_text).expect("💀 deserialize");
        assert_eq!(the_rebuilt, the_handle);
        assert_eq!(the_rebuilt.backend_ticket_text(), Some(the_ticket));
    }

    #[test]
    fn the_one_where_floats_in_the_ticket_come_back_bit_for_bit() {
        // -- 🎲 xorshift64, so the run is the same every time
        let mut the_seed: u64 = 0x9E37_79B9_7F4A_7C15;
        let mut next_float = move || loop {
            the_seed ^= the_seed << 13;
            the_seed ^= the_seed >> 7;
            the_seed ^= the_seed << 17;
            let the_float = f64::from_bits(the_seed);
            if the_float.is_finite() {
                return the_float;
            }
        };

        let mut the_values = vec![1.947700395895162e-169, 0.1, 1e308, -5e-324];
        the_values.extend((0..5_000).map(|_| next_float()));

        for the_value in the_values {
            let the_ticket = format!(
                r#"{{"id":"H1","v":{the_value:?},"nested":{{"w":[{the_value:e},1.50,123456789012345678901234567890]}}}}"#
            );
            let the_handle = OperationHandle::new("H1", "db1", "tableA")
                .with_backend_ticket(&the_ticket)
                .expect("💀 ticket is JSON");
            let the_rebuilt = OperationHandle::from_json_string(
                &the_handle.to_json_string().expect("💀 serialize"),
            )
            .expect("💀 deserialize");

            assert_eq!(the_rebuilt, the_handle, "💀 lost something around {the_value:?}");
            assert_eq!(the_rebuilt.backend_ticket_text(), Some(the_ticket.as_str()));
        }
    }

    #[test]
    fn the_one_where_a_ticket_that_is_not_json_is_refused() {
        assert!(matches!(
            OperationHandle::new("H1", "db1", "tableA").with_backend_ticket("{half"),
            Err(IngestError::InvalidArgument(_))
        ));
    }

    #[test]
    fn the_one_where_garbage_is_not_a_handle() {
        assert!(matches!(
            OperationHandle::from_json_string("{not json"),
            Err(IngestError::InvalidArgument(_))
        ));
    }

    #[test]
    fn the_one_where_only_succeeded_and_failed_end_the_story() {
        assert!(IngestStatus::Succeeded.is_terminal());
        assert!(IngestStatus::Failed.is_terminal());
        assert!(!IngestStatus::Queued.is_terminal());
        assert!(!IngestStatus::InProgress.is_terminal());
        assert!(!IngestStatus::PartialSuccess.is_terminal());
    }

    #[test]
    fn the_one_where_the_summary_reads_like_a_sentence() {
        let the_summary = StatusSummary::new(IngestStatus::Succeeded, 0, 0, 7);
        assert_eq!(the_summary.to_string(), "Succeeded, 7 succeeded, 0 failed");
    }

    #[test]
    fn the_one_where_options_default_to_tracked_uncompressed_parquet() {
        let the_options: IngestOptions = serde_json::from_str("{}").expect("💀 defaults");
        assert_eq!(the_options, IngestOptions::default());
        assert_eq!(the_options.format, DataFormat::Parquet);
        assert!(the_options.enable_tracking);
        assert_eq!(the_options.compression, Compression::None);
    }
}
