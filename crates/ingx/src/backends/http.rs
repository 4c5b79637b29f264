//! # 📡 THE HTTP BACKENDS
//!
//! 🎬 COLD OPEN. INT. NETWORK STACK, 3:47 AM
//!
//! A POST leaves the building carrying twenty blob URIs. A 202 comes back
//! carrying an operation id. Somewhere, a cluster starts loading parquet.
//! Somewhere else, a poller starts asking "done yet?" once a second, like a
//! kid in the back seat of a very patient car.
//!
//! This module speaks JSON over HTTP to both collaborators:
//!
//! ```text
//!   GET  {container}?prefix=..&marker=..                      -> ListPage
//!   POST {cluster}/v1/ingest/{db}/{table}                     -> operation handle
//!   GET  {cluster}/v1/ingest/{db}/{table}/operations/{id}     -> status summary
//!   POST {cluster}/v1/rest/ingest/{db}/{table}?format=..      -> 200, nothing else
//! ```
//!
//! 🧠 Knowledge graph:
//! - Status code taxonomy lives in `classify_status`: 404 is `NotFound`,
//!   408/429/5xx are `TransientIo`, the rest of 4xx is `InvalidArgument`.
//! - Transport failures (connect, timeout, reset) are always `TransientIo`.
//! - The operation handle the backend returns is kept verbatim: `id` is read
//!   out of it and the whole body rides along as `backend_ticket`.
//! - Path pieces (database, table, operation id) go in through
//!   `path_segments_mut`, so a `#` or `/` in an id stays part of the id.
//! - Credentials are an opaque bearer token from config. How it was obtained is
//!   not our business.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::backends::{IngestBackend, ListPage, ObjectStore};
use crate::common::{
    Compression, IngestOptions, IngestStatus, OperationHandle, Payload, StatusSummary,
    SubmissionRequest, TableTarget,
};
use crate::error::{IngestError, IngestResult};

// ============================================================
//  🔧 HttpBackendConfig
// ============================================================

/// 🔧 Connection knobs shared by the HTTP object store and ingestion backend.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct HttpBackendConfig {
    /// 🌐 Base URL override. For the ingestion backend this defaults to the
    /// cluster endpoint from the connection URI.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub bearer_token: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    30
}

fn build_client(config: &HttpBackendConfig) -> IngestResult<reqwest::Client> {
    let the_timeout = if config.timeout_secs == 0 {
        default_timeout_secs()
    } else {
        config.timeout_secs
    };
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .timeout(Duration::from_secs(the_timeout))
        .build()
        .map_err(|e| IngestError::InvalidArgument(format!("💀 the HTTP client refused to be born: {e}")))
}

fn parse_url(raw: &str) -> IngestResult<Url> {
    Url::parse(raw).map_err(|e| IngestError::InvalidArgument(format!("'{raw}' is not a URL: {e}")))
}

/// 🚦 Map a non-success HTTP status to an error kind.
fn classify_status(status: StatusCode, what: &str, body: &str) -> IngestError {
    let the_story = format!("{what} answered {status}: {body}");
    if status == StatusCode::NOT_FOUND {
        IngestError::NotFound(the_story)
    } else if status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error()
    {
        IngestError::TransientIo(the_story)
    } else {
        IngestError::InvalidArgument(the_story)
    }
}

fn transport_error(what: &str, error: reqwest::Error) -> IngestError {
    IngestError::TransientIo(format!("{what} never made it: {error}"))
}

/// 📬 Send, check the status, hand back the body text. One place for the dance.
async fn send_expecting_success(request: reqwest::RequestBuilder, what: &str) -> IngestResult<String> {
    let the_response = request.send().await.map_err(|e| transport_error(what, e))?;
    let the_status = the_response.status();
    let the_body = the_response
        .text()
        .await
        .map_err(|e| transport_error(what, e))?;
    if !the_status.is_success() {
        return Err(classify_status(the_status, what, &the_body));
    }
    Ok(the_body)
}

fn with_auth(request: reqwest::RequestBuilder, token: Option<&String>) -> reqwest::RequestBuilder {
    match token {
        Some(token) => request.bearer_auth(token),
        None => request,
    }
}

// ============================================================
//  🪣 HttpObjectStore
// ============================================================

/// 🪣 Lists a container over HTTP, one JSON page per request.
#[derive(Debug, Clone)]
pub struct HttpObjectStore {
    client: reqwest::Client,
    config: HttpBackendConfig,
}

impl HttpObjectStore {
    pub fn new(config: HttpBackendConfig) -> IngestResult<Self> {
        Ok(Self {
            client: build_client(&config)?,
            config,
        })
    }
}

#[async_trait]
impl ObjectStore for HttpObjectStore {
    async fn list_page(
        &self,
        container_uri: &str,
        prefix: &str,
        marker: Option<&str>,
    ) -> IngestResult<ListPage> {
        let mut the_url = parse_url(container_uri)?;
        {
            let mut the_query = the_url.query_pairs_mut();
            the_query.append_pair("prefix", prefix);
            if let Some(marker) = marker {
                the_query.append_pair("marker", marker);
            }
        }

        trace!("🪣 listing {the_url}");
        let the_request = with_auth(self.client.get(the_url), self.config.bearer_token.as_ref());
        let the_body = send_expecting_success(the_request, "object store listing").await?;
        serde_json::from_str(&the_body)
            .map_err(|e| IngestError::TransientIo(format!("listing page did not decode: {e}")))
    }
}

// ============================================================
//  🏭 HttpIngestBackend
// ============================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BatchRequestBody<'a> {
    sources: Vec<String>,
    format: &'a str,
    enable_tracking: bool,
    compression: Compression,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatusBody {
    status: IngestStatus,
    #[serde(default)]
    in_progress_count: u64,
    #[serde(default)]
    failed_count: u64,
    #[serde(default)]
    succeeded_count: u64,
}

/// 🎟️ The only piece of the submission answer we read. The rest stays raw.
#[derive(Debug, Deserialize)]
struct TicketBody {
    #[serde(default)]
    id: String,
}

/// 🏭 Talks to the cluster's ingestion endpoints.
#[derive(Debug, Clone)]
pub struct HttpIngestBackend {
    client: reqwest::Client,
    base_url: String,
    config: HttpBackendConfig,
}

impl HttpIngestBackend {
    /// 🚀 `cluster_uri` is used unless the config carries its own `url`.
    pub fn new(cluster_uri: &str, config: HttpBackendConfig) -> IngestResult<Self> {
        let the_base = config
            .url
            .clone()
            .unwrap_or_else(|| cluster_uri.to_string())
            .trim_end_matches('/')
            .to_string();
        parse_url(&the_base)?;
        Ok(Self {
            client: build_client(&config)?,
            base_url: the_base,
            config,
        })
    }

    /// 🧭 Base URL plus `segments`, each one percent-encoded as a single path segment.
    fn endpoint(&self, segments: &[&str]) -> IngestResult<Url> {
        let mut the_url = parse_url(&self.base_url)?;
        the_url
            .path_segments_mut()
            .map_err(|()| {
                IngestError::InvalidArgument(format!(
                    "'{}' cannot carry a path, so it cannot be an ingestion endpoint",
                    self.base_url
                ))
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(the_url)
    }

    fn table_url(&self, database: &str, table: &str) -> IngestResult<Url> {
        self.endpoint(&["v1", "ingest", database, table])
    }
}

#[async_trait]
impl IngestBackend for HttpIngestBackend {
    async fn submit_batch(&self, request: SubmissionRequest) -> IngestResult<OperationHandle> {
        let the_body = BatchRequestBody {
            sources: request.source_uris(),
            format: request.options.format.as_str(),
            enable_tracking: request.options.enable_tracking,
            compression: request.options.compression,
        };
        let the_url = self.table_url(&request.target.database, &request.target.table)?;
        debug!(
            "📡 submitting {} sources to {the_url}",
            the_body.sources.len()
        );

        let the_request = with_auth(self.client.post(the_url), self.config.bearer_token.as_ref())
            .json(&the_body);
        let the_text = send_expecting_success(the_request, "batch submission").await?;

        let the_ticket: TicketBody = serde_json::from_str(&the_text)
            .map_err(|e| IngestError::TransientIo(format!("operation handle did not decode: {e}")))?;
        if the_ticket.id.is_empty() {
            return Err(IngestError::TransientIo(format!(
                "batch submission answered without an operation id: {the_text}"
            )));
        }

        OperationHandle::new(the_ticket.id, request.target.database, request.target.table)
            .with_backend_ticket(&the_text)
    }

    async fn get_status(&self, handle: &OperationHandle) -> IngestResult<StatusSummary> {
        let the_url = self.endpoint(&[
            "v1",
            "ingest",
            handle.database.as_str(),
            handle.table.as_str(),
            "operations",
            handle.id.as_str(),
        ])?;
        let the_request = with_auth(self.client.get(the_url), self.config.bearer_token.as_ref());
        let the_text = send_expecting_success(the_request, "status query").await?;
        let the_status: StatusBody = serde_json::from_str(&the_text)
            .map_err(|e| IngestError::TransientIo(format!("status summary did not decode: {e}")))?;
        Ok(StatusSummary::new(
            the_status.status,
            the_status.in_progress_count,
            the_status.failed_count,
            the_status.succeeded_count,
        ))
    }

    async fn submit_stream(
        &self,
        target: &TableTarget,
        payload: &Payload,
        options: &IngestOptions,
    ) -> IngestResult<()> {
        let mut the_url = self.endpoint(&[
            "v1",
            "rest",
            "ingest",
            target.database.as_str(),
            target.table.as_str(),
        ])?;
        the_url
            .query_pairs_mut()
            .append_pair("format", options.format.as_str());

        let mut the_request = with_auth(self.client.post(the_url), self.config.bearer_token.as_ref())
            .header("Content-Type", "application/octet-stream");
        if payload.compression == Compression::Gzip {
            the_request = the_request.header("Content-Encoding", "gzip");
        }

        send_expecting_success(the_request.body(payload.bytes.clone()), "stream submission").await?;
        trace!("🚀 payload #{} landed", payload.sequence);
        Ok(())
    }
}
