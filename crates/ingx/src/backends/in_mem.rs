//! # Previously, on ingx...
//!
//! 🎬 The cluster was in another region. The storage account needed a token
//! nobody could find. The tests still had to run. So someone wrote a backend
//! so simple it lives entirely in RAM, gone the moment you blink.
//!
//! `in_mem` provides an in-memory [`ObjectStore`] and [`IngestBackend`] for
//! tests and dry runs. The store pages through a fixed set of objects and
//! counts every listing call. The backend hands out sequential handles, plays
//! back scripted status sequences, and tracks how many streaming submissions
//! are in flight at once, which is the number the pump promises to keep small.
//!
//! ⚠️ Not for production. If you deploy this to prod, please also deploy a therapist.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::trace;

use crate::backends::{IngestBackend, ListPage, ObjectEntry, ObjectStore};
use crate::common::{
    IngestOptions, IngestStatus, OperationHandle, Payload, StatusSummary, SubmissionRequest,
    TableTarget,
};
use crate::error::{IngestError, IngestResult};

// ============================================================
//  🪣 InMemoryObjectStore
// ============================================================

/// 🪣 A container full of pretend objects, listed in name order, one page at a time.
#[derive(Debug, Clone)]
pub struct InMemoryObjectStore {
    containers: Arc<HashMap<String, Vec<ObjectEntry>>>,
    page_size: usize,
    list_calls: Arc<AtomicUsize>,
    failures_remaining: Arc<AtomicUsize>,
}

impl Default for InMemoryObjectStore {
    fn default() -> Self {
        Self {
            containers: Arc::new(HashMap::new()),
            page_size: 100,
            list_calls: Arc::new(AtomicUsize::new(0)),
            failures_remaining: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 📦 Register a container and its objects. Objects are kept sorted by name.
    pub fn with_container(mut self, container_uri: &str, mut objects: Vec<ObjectEntry>) -> Self {
        objects.sort_by(|a, b| a.name.cmp(&b.name));
        Arc::make_mut(&mut self.containers)
            .insert(container_uri.trim_end_matches('/').to_string(), objects);
        self
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// 💥 The next `count` listing calls fail with `TransientIo`.
    pub fn fail_next_listings(self, count: usize) -> Self {
        self.failures_remaining.store(count, Ordering::SeqCst);
        self
    }

    /// 📞 How many times someone asked for a page.
    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn list_page(
        &self,
        container_uri: &str,
        prefix: &str,
        marker: Option<&str>,
    ) -> IngestResult<ListPage> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);

        let the_failure_was_scheduled = self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if the_failure_was_scheduled {
            return Err(IngestError::TransientIo(format!(
                "simulated listing failure for '{container_uri}'"
            )));
        }

        let the_objects = self
            .containers
            .get(container_uri.trim_end_matches('/'))
            .ok_or_else(|| IngestError::NotFound(format!("container '{container_uri}' does not exist")))?;

        let the_page: Vec<ObjectEntry> = the_objects
            .iter()
            .filter(|o| o.name.starts_with(prefix))
            .filter(|o| marker.is_none_or(|m| o.name.as_str() > m))
            .take(self.page_size + 1)
            .cloned()
            .collect();

        // -- one extra peeked so we know whether another page exists
        let (the_objects, next_marker) = if the_page.len() > self.page_size {
            let mut the_objects = the_page;
            the_objects.truncate(self.page_size);
            let the_marker = the_objects.last().map(|o| o.name.clone());
            (the_objects, the_marker)
        } else {
            (the_page, None)
        };

        trace!(
            "🪣 in-memory listing served {} objects, more pages: {}",
            the_objects.len(),
            next_marker.is_some()
        );
        Ok(ListPage {
            objects: the_objects,
            next_marker,
        })
    }
}

// ============================================================
//  🏭 InMemoryIngestBackend
// ============================================================

/// 🎬 How a single streaming submission should behave: how long it takes, and
/// whether it ends in tears.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StreamBehavior {
    pub delay: Duration,
    pub fail: bool,
}

type StreamBehaviorFn = Arc<dyn Fn(&Payload) -> StreamBehavior + Send + Sync>;

#[derive(Default)]
struct BackendState {
    submissions: Vec<SubmissionRequest>,
    scripts: HashMap<String, VecDeque<IngestResult<StatusSummary>>>,
    streamed: Vec<u64>,
}

/// 🏭 A backend that accepts everything, remembers everything, and reports
/// whatever status script you hand it.
///
/// Status scripts are played back one entry per `get_status` call. The last
/// entry sticks around forever, so a terminal status stays terminal.
#[derive(Clone)]
pub struct InMemoryIngestBackend {
    state: Arc<Mutex<BackendState>>,
    default_script: Vec<IngestResult<StatusSummary>>,
    stream_behavior: StreamBehaviorFn,
    next_id: Arc<AtomicU64>,
    status_queries: Arc<AtomicUsize>,
    streams_in_flight: Arc<AtomicUsize>,
    max_streams_in_flight: Arc<AtomicUsize>,
}

impl std::fmt::Debug for InMemoryIngestBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryIngestBackend")
            .field("next_id", &self.next_id)
            .field("status_queries", &self.status_queries)
            .field("max_streams_in_flight", &self.max_streams_in_flight)
            .finish()
    }
}

impl Default for InMemoryIngestBackend {
    fn default() -> Self {
        Self {
            state: Arc::new(Mutex::new(BackendState::default())),
            default_script: Vec::new(),
            stream_behavior: Arc::new(|_| StreamBehavior::default()),
            next_id: Arc::new(AtomicU64::new(1)),
            status_queries: Arc::new(AtomicUsize::new(0)),
            streams_in_flight: Arc::new(AtomicUsize::new(0)),
            max_streams_in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl InMemoryIngestBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// 📜 Status script used for every handle submitted from now on.
    pub fn with_default_script(mut self, script: Vec<IngestResult<StatusSummary>>) -> Self {
        self.default_script = script;
        self
    }

    /// 🎬 Decide per payload how long the stream call takes and whether it fails.
    pub fn with_stream_behavior<F>(mut self, behavior: F) -> Self
    where
        F: Fn(&Payload) -> StreamBehavior + Send + Sync + 'static,
    {
        self.stream_behavior = Arc::new(behavior);
        self
    }

    /// 📜 Install a status script for a handle id, submitted or not.
    pub async fn script_status(&self, operation_id: &str, script: Vec<IngestResult<StatusSummary>>) {
        self.state
            .lock()
            .await
            .scripts
            .insert(operation_id.to_string(), script.into());
    }

    pub async fn submissions(&self) -> Vec<SubmissionRequest> {
        self.state.lock().await.submissions.clone()
    }

    /// 🔢 Payload sequence numbers in the order their submissions started.
    pub async fn streamed_sequences(&self) -> Vec<u64> {
        self.state.lock().await.streamed.clone()
    }

    pub fn status_queries(&self) -> usize {
        self.status_queries.load(Ordering::SeqCst)
    }

    /// 📈 High-water mark of concurrent streaming submissions.
    pub fn max_streams_in_flight(&self) -> usize {
        self.max_streams_in_flight.load(Ordering::SeqCst)
    }

    fn finished_script(request: &SubmissionRequest) -> Vec<IngestResult<StatusSummary>> {
        let the_count = request.sources.len() as u64;
        let the_summary = if request.options.enable_tracking {
            StatusSummary::new(IngestStatus::Succeeded, 0, 0, the_count)
        } else {
            StatusSummary::new(IngestStatus::Succeeded, 0, 0, 0)
        };
        vec![Ok(the_summary)]
    }
}

#[async_trait]
impl IngestBackend for InMemoryIngestBackend {
    async fn submit_batch(&self, request: SubmissionRequest) -> IngestResult<OperationHandle> {
        let the_id = format!("op-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        let the_handle = OperationHandle::new(&the_id, &request.target.database, &request.target.table);

        let the_script = if self.default_script.is_empty() {
            Self::finished_script(&request)
        } else {
            self.default_script.clone()
        };

        let mut the_state = self.state.lock().await;
        the_state.scripts.entry(the_id).or_insert_with(|| the_script.into());
        the_state.submissions.push(request);
        Ok(the_handle)
    }

    async fn get_status(&self, handle: &OperationHandle) -> IngestResult<StatusSummary> {
        self.status_queries.fetch_add(1, Ordering::SeqCst);
        let mut the_state = self.state.lock().await;
        let the_script = the_state
            .scripts
            .get_mut(&handle.id)
            .ok_or_else(|| IngestError::NotFound(format!("operation '{}' is unknown", handle.id)))?;

        match the_script.len() {
            0 => Err(IngestError::NotFound(format!("operation '{}' has no status", handle.id))),
            1 => the_script[0].clone(),
            _ => the_script
                .pop_front()
                .unwrap_or_else(|| Err(IngestError::NotFound(handle.id.clone()))),
        }
    }

    async fn submit_stream(
        &self,
        _target: &TableTarget,
        payload: &Payload,
        _options: &IngestOptions,
    ) -> IngestResult<()> {
        self.state.lock().await.streamed.push(payload.sequence);
        let the_behavior = (self.stream_behavior)(payload);

        let the_now_in_flight = self.streams_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_streams_in_flight
            .fetch_max(the_now_in_flight, Ordering::SeqCst);

        tokio::time::sleep(the_behavior.delay).await;
        self.streams_in_flight.fetch_sub(1, Ordering::SeqCst);

        if the_behavior.fail {
            Err(IngestError::TransientIo(format!(
                "simulated stream failure for payload #{}",
                payload.sequence
            )))
        } else {
            Ok(())
        }
    }
}
