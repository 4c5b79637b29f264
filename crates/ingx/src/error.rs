//! 🏷️ Error kinds: the taxonomy of everything that can go sideways between
//! "here are some parquet files" and "the warehouse says thanks".
//!
//! 🧠 Knowledge graph:
//! - `IngestError` is what the orchestration core speaks: enumerator, submitter,
//!   poller, pump, backends. Typed, so the poller can tell "retry me" from
//!   "you misspelled the container".
//! - The app layer (`app_config`, `orchestrator`, the CLI) wraps these in `anyhow`
//!   with context, same as the rest of the house.
//! - A `Failed` aggregate status is NOT in here. The backend tried, the backend
//!   reported. That's an outcome, not a fault. See `common::IngestStatus`.
//!
//! 🦆 The duck files all its errors under `TransientIo`. The duck is an optimist.

use thiserror::Error;

/// 🏷️ Every way the orchestration core can decline to continue.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IngestError {
    /// 💀 Malformed URI, empty batch, zero concurrency. Fatal. Never retried.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// 🔍 The container or prefix does not resolve to anything. Fatal.
    #[error("not found: {0}")]
    NotFound(String),

    /// 📡 Listing or polling hiccup. The caller (or the poller) may retry.
    #[error("transient I/O failure: {0}")]
    TransientIo(String),

    /// 🔁 Retried until the budget ran dry. `last` is the final straw.
    #[error("retry budget exhausted after {attempts} attempts, last failure: {last}")]
    Exhausted { attempts: u32, last: String },

    /// 🛑 Someone pressed the big red button.
    #[error("operation cancelled")]
    Cancelled,
}

impl IngestError {
    /// 🔁 Only transient I/O earns a second chance. Everyone else goes home.
    pub fn is_retryable(&self) -> bool {
        matches!(self, IngestError::TransientIo(_))
    }
}

/// 📦 Result alias for the core, so signatures don't wrap to the next zip code.
pub type IngestResult<T> = std::result::Result<T, IngestError>;
