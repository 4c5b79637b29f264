//! 🔌 Backends: where the real I/O happens.
//!
//! 🚰 The object store pours out listings, the ingestion backend slurps up
//! submissions and answers status questions. Everything in between is
//! orchestration, and orchestration does not touch a socket.
//!
//! 🧠 Knowledge graph:
//! - Pattern: trait → concrete impls (`in_mem`, `http`) → enum dispatch
//!   (`ObjectStoreBackend`, `IngestBackendKind`) picked from config.
//! - `ObjectStore::list_page`: one page of listing per call. The enumerator
//!   decides when to stop asking, which is how it avoids paging past `max_count`.
//! - `IngestBackend`: submit a batch (get a handle), ask about a handle (get a
//!   summary), push a payload (get nothing but closure).
//! - Every method speaks `IngestError`, so callers can tell transient from fatal.
//!
//! 🦆 The duck is a backend too. It accepts everything and reports nothing.

use async_trait::async_trait;

use crate::app_config::{BackendConfig, ObjectStoreConfig};
use crate::common::{IngestOptions, OperationHandle, Payload, StatusSummary, SubmissionRequest, TableTarget};
use crate::error::IngestResult;

pub mod http;
pub mod in_mem;

pub use http::{HttpBackendConfig, HttpIngestBackend, HttpObjectStore};
pub use in_mem::{InMemoryIngestBackend, InMemoryObjectStore, StreamBehavior};

// ===== Object store =====

/// 📄 One object as the store lists it.
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
pub struct ObjectEntry {
    pub name: String,
    pub size: u64,
}

/// 📚 One page of a listing. `next_marker = None` means that was the last page.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
pub struct ListPage {
    pub objects: Vec<ObjectEntry>,
    #[serde(default)]
    pub next_marker: Option<String>,
}

/// 🪣 Lists objects in a container, one page at a time.
///
/// # Contract 📜
/// - `NotFound` when the container itself does not exist.
/// - `TransientIo` when the listing call fails in a way worth retrying.
/// - Paging is driven by the caller through `marker`; the store never pages ahead.
#[async_trait]
pub trait ObjectStore: std::fmt::Debug + Send + Sync {
    async fn list_page(
        &self,
        container_uri: &str,
        prefix: &str,
        marker: Option<&str>,
    ) -> IngestResult<ListPage>;
}

// ===== Ingestion backend =====

/// 🏭 The warehouse's front desk.
///
/// # Contract 📜
/// - `submit_batch`: exactly one call per submission. The backend shards internally.
/// - `get_status`: read-only. Safe to call from many places at once.
/// - `submit_stream`: fire-and-await. No handle. `Ok(())` means the backend took it.
#[async_trait]
pub trait IngestBackend: std::fmt::Debug + Send + Sync {
    async fn submit_batch(&self, request: SubmissionRequest) -> IngestResult<OperationHandle>;

    async fn get_status(&self, handle: &OperationHandle) -> IngestResult<StatusSummary>;

    async fn submit_stream(
        &self,
        target: &TableTarget,
        payload: &Payload,
        options: &IngestOptions,
    ) -> IngestResult<()>;
}

// ===== Enum dispatch =====

/// 🎭 The many faces of an object store, chosen by config.
#[derive(Debug)]
pub enum ObjectStoreBackend {
    InMemory(InMemoryObjectStore),
    Http(HttpObjectStore),
}

impl ObjectStoreBackend {
    /// 🏗️ Build whichever store the config asked for.
    pub fn from_config(config: &ObjectStoreConfig) -> IngestResult<Self> {
        match config {
            ObjectStoreConfig::InMemory { containers } => {
                let the_store = containers
                    .iter()
                    .fold(InMemoryObjectStore::new(), |store, (container_uri, objects)| {
                        store.with_container(container_uri, objects.clone())
                    });
                Ok(Self::InMemory(the_store))
            }
            ObjectStoreConfig::Http(http_config) => Ok(Self::Http(HttpObjectStore::new(http_config.clone())?)),
        }
    }
}

#[async_trait]
impl ObjectStore for ObjectStoreBackend {
    async fn list_page(
        &self,
        container_uri: &str,
        prefix: &str,
        marker: Option<&str>,
    ) -> IngestResult<ListPage> {
        match self {
            ObjectStoreBackend::InMemory(store) => store.list_page(container_uri, prefix, marker).await,
            ObjectStoreBackend::Http(store) => store.list_page(container_uri, prefix, marker).await,
        }
    }
}

/// 🎭 The many faces of an ingestion backend, chosen by config.
#[derive(Debug)]
pub enum IngestBackendKind {
    InMemory(InMemoryIngestBackend),
    Http(HttpIngestBackend),
}

impl IngestBackendKind {
    /// 🏗️ Build whichever backend the config asked for. HTTP defaults to the target's cluster.
    pub fn from_config(config: &BackendConfig, target: &TableTarget) -> IngestResult<Self> {
        match config {
            BackendConfig::InMemory { script } => Ok(Self::InMemory(
                InMemoryIngestBackend::new().with_default_script(script.iter().copied().map(Ok).collect()),
            )),
            BackendConfig::Http(http_config) => Ok(Self::Http(HttpIngestBackend::new(
                &target.cluster_uri,
                http_config.clone(),
            )?)),
        }
    }
}

#[async_trait]
impl IngestBackend for IngestBackendKind {
    async fn submit_batch(&self, request: SubmissionRequest) -> IngestResult<OperationHandle> {
        match self {
            IngestBackendKind::InMemory(backend) => backend.submit_batch(request).await,
            IngestBackendKind::Http(backend) => backend.submit_batch(request).await,
        }
    }

    async fn get_status(&self, handle: &OperationHandle) -> IngestResult<StatusSummary> {
        match self {
            IngestBackendKind::InMemory(backend) => backend.get_status(handle).await,
            IngestBackendKind::Http(backend) => backend.get_status(handle).await,
        }
    }

    async fn submit_stream(
        &self,
        target: &TableTarget,
        payload: &Payload,
        options: &IngestOptions,
    ) -> IngestResult<()> {
        match self {
            IngestBackendKind::InMemory(backend) => backend.submit_stream(target, payload, options).await,
            IngestBackendKind::Http(backend) => backend.submit_stream(target, payload, options).await,
        }
    }
}
