//! 🚰 Payload sources: where streaming mode gets its bytes.
//!
//! 🧠 Knowledge graph:
//! - Pattern: trait → concrete impls → `PayloadSourceBackend` enum picked from config.
//!   Same shape as the backends, same reasoning: the pump never needs to know
//!   whether bytes came from a file, from config, or from a closure.
//! - `next_payload` returns `Ok(None)` when the source is dry. Lazy, one
//!   payload per call, no rewinding.
//! - `FilePayloadSource` groups NDJSON lines into payloads (by record count
//!   and byte size, whichever trips first) and optionally gzips each one. A
//!   line that would push a payload past the byte cap waits for the next one;
//!   only a line that is over the cap on its own ships alone, oversize.
//! - `FnPayloadSource` wraps a caller-supplied generator, possibly endless.
//!   Sample data generation belongs to the caller, not to the pump.

use std::collections::VecDeque;
use std::io::Write;

use async_trait::async_trait;
use flate2::write::GzEncoder;
use serde::Deserialize;
use tokio::{
    fs::File,
    io::{self, AsyncBufReadExt},
};
use tracing::trace;

use crate::common::{Compression, Payload};
use crate::error::{IngestError, IngestResult};

/// 🚰 Produces payloads one at a time until it doesn't.
#[async_trait]
pub trait PayloadSource: Send {
    async fn next_payload(&mut self) -> IngestResult<Option<Payload>>;
}

// ============================================================
//  📂 FilePayloadSource
// ============================================================

/// 📂 Config for reading payloads out of an NDJSON file.
#[derive(Debug, Deserialize, Clone)]
pub struct FilePayloadConfig {
    pub file_name: String,
    #[serde(default = "default_records_per_payload")]
    pub records_per_payload: usize,
    #[serde(default = "default_max_payload_bytes")]
    pub max_payload_bytes: usize,
}

fn default_records_per_payload() -> usize {
    1000
}

// -- 4MB, comfortably under what streaming endpoints tend to accept
fn default_max_payload_bytes() -> usize {
    4 * 1024 * 1024
}

/// 📂 Reads an NDJSON file line by line and bundles lines into payloads.
pub struct FilePayloadSource {
    buf_reader: io::BufReader<File>,
    config: FilePayloadConfig,
    compression: Compression,
    next_sequence: u64,
    /// 🎒 a line that did not fit in the previous payload
    carried_line: Option<String>,
}

impl std::fmt::Debug for FilePayloadSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilePayloadSource")
            .field("config", &self.config)
            .field("compression", &self.compression)
            .field("next_sequence", &self.next_sequence)
            .field("carrying_a_line", &self.carried_line.is_some())
            .finish()
    }
}

impl FilePayloadSource {
    /// 🚀 Opens the file. A missing file is `NotFound`, other open failures are `InvalidArgument`.
    pub async fn new(config: FilePayloadConfig, compression: Compression) -> IngestResult<Self> {
        let the_file = File::open(&config.file_name).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                IngestError::NotFound(format!("payload file '{}' does not exist", config.file_name))
            } else {
                IngestError::InvalidArgument(format!(
                    "payload file '{}' would not open: {e}",
                    config.file_name
                ))
            }
        })?;
        Ok(Self {
            buf_reader: io::BufReader::new(the_file),
            config,
            compression,
            next_sequence: 0,
            carried_line: None,
        })
    }

    /// 📖 Next non-blank line without its line ending, or `None` at end of file.
    /// Bytes that are not UTF-8 are the file's fault, so they are `InvalidArgument`.
    async fn next_record(&mut self) -> IngestResult<Option<String>> {
        let mut line = String::new();
        loop {
            line.clear();
            let bytes_read = self.buf_reader.read_line(&mut line).await.map_err(|e| {
                if e.kind() == std::io::ErrorKind::InvalidData {
                    IngestError::InvalidArgument(format!(
                        "'{}' is not valid UTF-8 NDJSON: {e}",
                        self.config.file_name
                    ))
                } else {
                    IngestError::TransientIo(format!("reading '{}' failed: {e}", self.config.file_name))
                }
            })?;
            if bytes_read == 0 {
                return Ok(None);
            }

            // 🧹 blank lines are not records
            let trimmed = line.trim_end_matches('\n').trim_end_matches('\r');
            if !trimmed.is_empty() {
                return Ok(Some(trimmed.to_string()));
            }
        }
    }
}

#[async_trait]
impl PayloadSource for FilePayloadSource {
    async fn next_payload(&mut self) -> IngestResult<Option<Payload>> {
        let the_records_cap = self.config.records_per_payload.max(1);
        let the_bytes_cap = self.config.max_payload_bytes;
        let mut page = String::new();
        let mut line_count = 0usize;

        while line_count < the_records_cap && page.len() < the_bytes_cap {
            let the_record = match self.carried_line.take() {
                Some(carried) => carried,
                None => match self.next_record().await? {
                    Some(record) => record,
                    None => break,
                },
            };

            if !page.is_empty() {
                if page.len() + 1 + the_record.len() > the_bytes_cap {
                    self.carried_line = Some(the_record);
                    break;
                }
                page.push('\n');
            }
            page.push_str(&the_record);
            line_count += 1;
        }

        if page.is_empty() {
            return Ok(None);
        }

        let the_sequence = self.next_sequence;
        self.next_sequence += 1;
        trace!(
            "📖 payload #{the_sequence}: {line_count} records, {} bytes before compression",
            page.len()
        );
        let the_bytes = compress(page.into_bytes(), self.compression)?;
        Ok(Some(
            Payload::new(the_sequence, the_bytes).with_compression(self.compression),
        ))
    }
}

/// 🫁 Squish the bytes if asked to.
pub fn compress(bytes: Vec<u8>, compression: Compression) -> IngestResult<Vec<u8>> {
    match compression {
        Compression::None => Ok(bytes),
        Compression::Gzip => {
            let mut the_encoder = GzEncoder::new(Vec::new(), flate2::Compression::default());
            the_encoder
                .write_all(&bytes)
                .and_then(|_| the_encoder.finish())
                .map_err(|e| IngestError::InvalidArgument(format!("gzip refused the payload: {e}")))
        }
    }
}

// ============================================================
//  🧠 InMemoryPayloadSource
// ============================================================

/// 🧠 A fixed queue of payloads, handed out in order.
#[derive(Debug, Default)]
pub struct InMemoryPayloadSource {
    items: VecDeque<Vec<u8>>,
    compression: Compression,
    next_sequence: u64,
}

impl InMemoryPayloadSource {
    pub fn new(items: Vec<Vec<u8>>) -> Self {
        Self {
            items: items.into(),
            compression: Compression::None,
            next_sequence: 0,
        }
    }

    pub fn with_compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }
}

#[async_trait]
impl PayloadSource for InMemoryPayloadSource {
    async fn next_payload(&mut self) -> IngestResult<Option<Payload>> {
        let Some(the_item) = self.items.pop_front() else {
            return Ok(None);
        };
        let the_sequence = self.next_sequence;
        self.next_sequence += 1;
        let the_bytes = compress(the_item, self.compression)?;
        Ok(Some(
            Payload::new(the_sequence, the_bytes).with_compression(self.compression),
        ))
    }
}

// ============================================================
//  🔮 FnPayloadSource
// ============================================================

/// 🔮 Wraps a generator closure. It gets the next sequence number and returns
/// `None` when it has nothing more to say.
pub struct FnPayloadSource<F> {
    generator: F,
    next_sequence: u64,
}

impl<F> FnPayloadSource<F>
where
    F: FnMut(u64) -> Option<Payload> + Send,
{
    pub fn new(generator: F) -> Self {
        Self {
            generator,
            next_sequence: 0,
        }
    }
}

#[async_trait]
impl<F> PayloadSource for FnPayloadSource<F>
where
    F: FnMut(u64) -> Option<Payload> + Send,
{
    async fn next_payload(&mut self) -> IngestResult<Option<Payload>> {
        let the_payload = (self.generator)(self.next_sequence);
        if the_payload.is_some() {
            self.next_sequence += 1;
        }
        Ok(the_payload)
    }
}

// ============================================================
//  🎭 PayloadSourceBackend
// ============================================================

/// 🔧 Which payload source streaming mode should read from.
#[derive(Debug, Deserialize, Clone)]
pub enum PayloadSourceConfig {
    File(FilePayloadConfig),
    InMemory { items: Vec<String> },
}

/// 🎭 Config-selected payload source.
#[derive(Debug)]
pub enum PayloadSourceBackend {
    File(FilePayloadSource),
    InMemory(InMemoryPayloadSource),
}

impl PayloadSourceBackend {
    pub async fn from_config(config: &PayloadSourceConfig, compression: Compression) -> IngestResult<Self> {
        match config {
            PayloadSourceConfig::File(file_config) => Ok(Self::File(
                FilePayloadSource::new(file_config.clone(), compression).await?,
            )),
            PayloadSourceConfig::InMemory { items } => Ok(Self::InMemory(
                InMemoryPayloadSource::new(items.iter().map(|i| i.clone().into_bytes()).collect())
                    .with_compression(compression),
            )),
        }
    }
}

#[async_trait]
impl PayloadSource for PayloadSourceBackend {
    async fn next_payload(&mut self) -> IngestResult<Option<Payload>> {
        match self {
            PayloadSourceBackend::File(source) => source.next_payload().await,
            PayloadSourceBackend::InMemory(source) => source.next_payload().await,
        }
    }
}
