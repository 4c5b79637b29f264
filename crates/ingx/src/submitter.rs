//! 📨 Batch Submitter: one batch in, one operation handle out.
//!
//! The backend decides how to shard and schedule. We just make sure the batch
//! isn't empty (an empty submission that "succeeds" is a lie the caller would
//! believe) and that exactly one backend call happens per batch.

use std::sync::Arc;

use tracing::{debug, info};

use crate::backends::IngestBackend;
use crate::common::{IngestOptions, OperationHandle, SourceReference, SubmissionRequest, TableTarget};
use crate::error::{IngestError, IngestResult};

/// 📨 Hands bounded sets of references to the ingestion backend.
#[derive(Debug, Clone)]
pub struct BatchSubmitter<B> {
    backend: Arc<B>,
    access_suffix: String,
}

impl<B: IngestBackend> BatchSubmitter<B> {
    /// 🔑 `access_suffix` is glued verbatim onto every source URI (SAS tokens and friends).
    pub fn new(backend: Arc<B>, access_suffix: impl Into<String>) -> Self {
        Self {
            backend,
            access_suffix: access_suffix.into(),
        }
    }

    /// 🚀 Submit `references` to `target`. Empty batches are `InvalidArgument` and
    /// never reach the backend.
    pub async fn submit(
        &self,
        references: Vec<SourceReference>,
        target: &TableTarget,
        options: &IngestOptions,
    ) -> IngestResult<OperationHandle> {
        if references.is_empty() {
            return Err(IngestError::InvalidArgument(format!(
                "refusing to submit an empty batch to {}.{}",
                target.database, target.table
            )));
        }

        for the_reference in &references {
            debug!("📄 {}", the_reference.uri());
        }
        let the_count = references.len();

        let the_request = SubmissionRequest {
            sources: references,
            access_suffix: self.access_suffix.clone(),
            target: target.clone(),
            options: options.clone(),
        };
        let the_handle = self.backend.submit_batch(the_request).await?;

        info!(
            "🎟️ operation {} accepted: {the_count} sources into {}.{}",
            the_handle.id, target.database, target.table
        );
        Ok(the_handle)
    }
}
