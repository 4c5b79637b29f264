//! 🔍 Source Enumerator: finds the files worth loading, and stops looking once it has enough.
//!
//! Given `https://store.example/container/batch-`, the container is
//! `https://store.example/container` and the object prefix is `batch-`.
//! Objects are pulled page by page from the [`ObjectStore`], filtered, and
//! yielded lazily. Zero-byte objects never make it out (half-written uploads
//! and folder placeholders love to be zero bytes).
//!
//! 🧠 Knowledge graph:
//! - The returned stream is finite and non-restartable: once it errors or ends, it's done.
//! - A page is fetched only when the buffer is empty AND fewer than `max_count`
//!   matches have been yielded. Hitting `max_count` means no more listing calls.
//! - `NotFound` / `TransientIo` come straight from the store. Retrying is the caller's call.

use std::collections::VecDeque;
use std::sync::Arc;

use futures::stream::{self, Stream, TryStreamExt};
use reqwest::Url;
use tracing::{debug, trace};

use crate::backends::ObjectStore;
use crate::common::SourceReference;
use crate::error::{IngestError, IngestResult};

/// 📍 A prefix location, split into the container and the in-container name prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrefixLocation {
    pub container_uri: String,
    pub prefix: String,
}

impl PrefixLocation {
    /// 🔍 The first path segment names the container, the rest is the object prefix.
    /// Query strings and fragments are dropped; access tokens travel separately.
    pub fn parse(prefix_url: &str) -> IngestResult<Self> {
        let the_url = Url::parse(prefix_url).map_err(|e| {
            IngestError::InvalidArgument(format!("prefix location '{prefix_url}' does not parse: {e}"))
        })?;

        let the_path = the_url.path().trim_start_matches('/');
        let (the_container, the_prefix) = match the_path.split_once('/') {
            Some((container, prefix)) => (container, prefix),
            None => (the_path, ""),
        };
        if the_container.is_empty() {
            return Err(IngestError::InvalidArgument(format!(
                "prefix location '{prefix_url}' does not name a container"
            )));
        }

        let mut the_container_url = the_url.clone();
        the_container_url.set_path(the_container);
        the_container_url.set_query(None);
        the_container_url.set_fragment(None);

        Ok(Self {
            container_uri: the_container_url.as_str().trim_end_matches('/').to_string(),
            prefix: the_prefix.to_string(),
        })
    }
}

// -- everything the listing loop needs to carry between pages
struct ListingCursor {
    location: PrefixLocation,
    suffix: String,
    max_count: usize,
    found: usize,
    pending: VecDeque<SourceReference>,
    marker: Option<String>,
    exhausted: bool,
}

/// 📄 Pull the next eligible reference, fetching a page only when the buffer is dry.
async fn next_reference<S: ObjectStore>(
    store: &S,
    mut cursor: ListingCursor,
) -> IngestResult<Option<(SourceReference, ListingCursor)>> {
    loop {
        if cursor.found >= cursor.max_count {
            return Ok(None);
        }
        if let Some(the_reference) = cursor.pending.pop_front() {
            cursor.found += 1;
            return Ok(Some((the_reference, cursor)));
        }
        if cursor.exhausted {
            return Ok(None);
        }

        let the_page = store
            .list_page(
                &cursor.location.container_uri,
                &cursor.location.prefix,
                cursor.marker.as_deref(),
            )
            .await?;
        trace!(
            "📚 listing page of {} objects under {}/{}",
            the_page.objects.len(),
            cursor.location.container_uri,
            cursor.location.prefix
        );

        for the_object in the_page.objects {
            let is_eligible = the_object.size > 0
                && the_object.name.starts_with(&cursor.location.prefix)
                && the_object.name.ends_with(&cursor.suffix);
            if is_eligible {
                cursor.pending.push_back(SourceReference {
                    container_uri: cursor.location.container_uri.clone(),
                    name: the_object.name,
                    size: the_object.size,
                });
            }
        }

        cursor.exhausted = the_page.next_marker.is_none();
        cursor.marker = the_page.next_marker;
    }
}

/// 🔍 Discovers eligible source objects under a prefix.
#[derive(Debug, Clone)]
pub struct SourceEnumerator<S> {
    store: Arc<S>,
}

impl<S: ObjectStore> SourceEnumerator<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// 📜 Lazily yield up to `max_count` references whose name starts with the
    /// location's prefix, ends with `suffix` (empty matches everything), and
    /// whose size is positive.
    pub fn enumerate(
        &self,
        location: &PrefixLocation,
        suffix: &str,
        max_count: usize,
    ) -> impl Stream<Item = IngestResult<SourceReference>> + use<'_, S> {
        let the_cursor = ListingCursor {
            location: location.clone(),
            suffix: suffix.to_string(),
            max_count,
            found: 0,
            pending: VecDeque::new(),
            marker: None,
            exhausted: false,
        };
        let the_store = &self.store;

        stream::try_unfold(the_cursor, move |cursor| next_reference(the_store.as_ref(), cursor))
    }

    /// 📦 Drain `enumerate` into a Vec.
    pub async fn enumerate_all(
        &self,
        location: &PrefixLocation,
        suffix: &str,
        max_count: usize,
    ) -> IngestResult<Vec<SourceReference>> {
        let the_references: Vec<SourceReference> =
            self.enumerate(location, suffix, max_count).try_collect().await?;
        debug!(
            "🔍 found {} eligible objects under {}/{} (cap {max_count})",
            the_references.len(),
            location.container_uri,
            location.prefix
        );
        Ok(the_references)
    }
}
