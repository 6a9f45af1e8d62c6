use crate::config::{Edition, UploadConfig};
use crate::metadata_store::{MediaKind, Submission};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::timeout;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// Sink for blob writes; implemented by the object store
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put_blob(&self, key: &str, bytes: &[u8], content_type: &str) -> Result<()>;
}

/// Sink for submission records; implemented by the metadata store
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SubmissionStore: Send + Sync {
    async fn insert_submission(
        &self,
        name: &str,
        filename: &str,
        media_kind: MediaKind,
        submitted_at: DateTime<Utc>,
    ) -> Result<Submission>;
}

/// One user-selected file entering the batch
#[derive(Debug, Clone)]
pub struct IncomingFile {
    /// Original file name, used only for the extension and error messages
    pub file_name: String,
    /// Declared content type
    pub content_type: String,
    /// Raw payload
    pub bytes: Vec<u8>,
}

/// Per-file upload failure
#[derive(Debug, Error)]
pub enum UploadError {
    /// Declared content type is not accepted by the current edition
    #[error("'{file_name}' has unsupported type '{content_type}'")]
    UnsupportedType {
        file_name: String,
        content_type: String,
    },
    /// Payload exceeds the size limit for its media kind
    #[error("'{file_name}' is larger than the {limit_mib} MiB limit")]
    TooLarge { file_name: String, limit_mib: usize },
    /// Blob write failed; no record is inserted for this file
    #[error("blob write failed for '{key}': {source}")]
    BlobWrite {
        key: String,
        #[source]
        source: anyhow::Error,
    },
    /// Record insert failed after a successful blob write; the blob stays
    /// behind as an orphan and is never surfaced
    #[error("record insert failed for '{key}': {source}")]
    RecordInsert {
        key: String,
        #[source]
        source: anyhow::Error,
    },
    /// A blob write or record insert exceeded the configured I/O timeout
    #[error("timed out while storing '{key}'")]
    Timeout { key: String },
}

impl UploadError {
    /// Validation failures are user-visible per file; storage failures are
    /// logged and only reported in aggregate
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            UploadError::UnsupportedType { .. } | UploadError::TooLarge { .. }
        )
    }
}

/// A file rejected by validation, named in the response
#[derive(Debug, Clone, Serialize)]
pub struct RejectedFile {
    pub file_name: String,
    pub reason: String,
}

/// Aggregate outcome of one upload batch
#[derive(Debug, Serialize)]
pub struct BatchReport {
    /// Number of files in the batch
    pub total: usize,
    /// Files with both a blob and a matching record
    pub success_count: usize,
    /// Storage failures (blob write, record insert, timeout); details are
    /// logged, not itemized to the user
    pub failed_count: usize,
    /// Final progress percentage; exactly 100 once the last file settled
    pub progress: u8,
    /// Validation rejections, named per file
    pub rejected: Vec<RejectedFile>,
    /// Records created by this batch
    pub stored: Vec<Submission>,
}

impl BatchReport {
    fn new(total: usize) -> Self {
        Self {
            total,
            success_count: 0,
            failed_count: 0,
            progress: 0,
            rejected: Vec::new(),
            stored: Vec::new(),
        }
    }

    /// Whether the caller should clear its pending file selection. False
    /// when nothing was stored, so the user can retry the same selection.
    pub fn clear_selection(&self) -> bool {
        self.success_count > 0
    }
}

/// Validation policy derived from the upload configuration
#[derive(Debug, Clone)]
pub struct UploadPolicy {
    edition: Edition,
    max_image_bytes: usize,
    max_video_bytes: usize,
}

impl UploadPolicy {
    pub fn new(config: &UploadConfig) -> Self {
        Self {
            edition: config.edition,
            max_image_bytes: config.max_image_bytes,
            max_video_bytes: config.max_video_bytes,
        }
    }

    /// Classify a file by declared content type and enforce the size limit
    /// for its kind. The type check runs first: an oversized video in the
    /// image-only edition is rejected for its type, not its size.
    pub fn validate(&self, file: &IncomingFile) -> Result<MediaKind, UploadError> {
        let kind = if file.content_type.starts_with("image/") {
            MediaKind::Image
        } else if file.content_type.starts_with("video/") && self.edition == Edition::ImageAndVideo
        {
            MediaKind::Video
        } else {
            return Err(UploadError::UnsupportedType {
                file_name: file.file_name.clone(),
                content_type: file.content_type.clone(),
            });
        };

        let limit = match kind {
            MediaKind::Image => self.max_image_bytes,
            MediaKind::Video => self.max_video_bytes,
        };

        if file.bytes.len() > limit {
            return Err(UploadError::TooLarge {
                file_name: file.file_name.clone(),
                limit_mib: limit / (1024 * 1024),
            });
        }

        Ok(kind)
    }
}

/// Generate a unique storage key: random uuid token plus the original
/// file's extension, lowercased and stripped to alphanumerics
pub fn storage_key(file_name: &str) -> String {
    let ext = file_name
        .rsplit_once('.')
        .map(|(_, ext)| {
            ext.chars()
                .filter(|c| c.is_ascii_alphanumeric())
                .collect::<String>()
                .to_lowercase()
        })
        .filter(|ext| !ext.is_empty())
        .unwrap_or_else(|| "bin".to_string());

    format!("{}.{}", Uuid::new_v4(), ext)
}

/// Turns a batch of user-selected files into durably stored blobs and
/// matching records, with per-file isolation: one failure never aborts
/// the batch. Files are processed strictly sequentially, so at most one
/// upload is in flight and progress is well-defined.
pub struct UploadCoordinator {
    blobs: Arc<dyn BlobStore>,
    records: Arc<dyn SubmissionStore>,
    policy: UploadPolicy,
    io_timeout: Duration,
}

impl UploadCoordinator {
    pub fn new(
        blobs: Arc<dyn BlobStore>,
        records: Arc<dyn SubmissionStore>,
        policy: UploadPolicy,
        io_timeout: Duration,
    ) -> Self {
        Self {
            blobs,
            records,
            policy,
            io_timeout,
        }
    }

    /// Process one batch. Each file settles (success or failure) before the
    /// next begins; progress is recomputed after every file regardless of
    /// outcome, so observers see it rise monotonically to 100.
    #[instrument(skip(self, files, on_progress), fields(submitter = %name, total = files.len()))]
    pub async fn process_batch<F>(
        &self,
        name: &str,
        files: Vec<IncomingFile>,
        mut on_progress: F,
    ) -> BatchReport
    where
        F: FnMut(u8),
    {
        let total = files.len();
        let mut report = BatchReport::new(total);
        let mut last_submitted_at: Option<DateTime<Utc>> = None;

        for (index, file) in files.into_iter().enumerate() {
            match self.store_one(name, &file, &mut last_submitted_at).await {
                Ok(submission) => {
                    info!(
                        filename = %submission.filename,
                        media_kind = %submission.media_kind.as_str(),
                        "File stored"
                    );
                    metrics::counter!("gallery.files.stored").increment(1);
                    report.success_count += 1;
                    report.stored.push(submission);
                }
                Err(e) if e.is_validation() => {
                    warn!(file_name = %file.file_name, reason = %e, "File rejected");
                    metrics::counter!("gallery.files.rejected").increment(1);
                    report.rejected.push(RejectedFile {
                        file_name: file.file_name.clone(),
                        reason: e.to_string(),
                    });
                }
                Err(e) => {
                    // Logged, skipped, batch continues with the next file.
                    error!(file_name = %file.file_name, error = %e, "File skipped");
                    metrics::counter!("gallery.files.failed").increment(1);
                    report.failed_count += 1;
                }
            }

            report.progress = (((index + 1) * 100) as f64 / total as f64).round() as u8;
            on_progress(report.progress);
        }

        report
    }

    /// Store a single file: blob write first, record insert second. The
    /// record is inserted only after the blob landed; a failed insert
    /// leaves the blob behind as an acceptable orphan.
    async fn store_one(
        &self,
        name: &str,
        file: &IncomingFile,
        last_submitted_at: &mut Option<DateTime<Utc>>,
    ) -> Result<Submission, UploadError> {
        let kind = self.policy.validate(file)?;
        let key = storage_key(&file.file_name);

        match timeout(
            self.io_timeout,
            self.blobs.put_blob(&key, &file.bytes, &file.content_type),
        )
        .await
        {
            Ok(Ok(())) => {}
            Ok(Err(source)) => return Err(UploadError::BlobWrite { key, source }),
            Err(_) => return Err(UploadError::Timeout { key }),
        }

        // One distinct timestamp per file keeps intra-batch ordering visible
        // through the gallery's submitted_at sort.
        let mut submitted_at = Utc::now();
        if let Some(prev) = *last_submitted_at {
            if submitted_at <= prev {
                submitted_at = prev + ChronoDuration::milliseconds(1);
            }
        }
        *last_submitted_at = Some(submitted_at);

        match timeout(
            self.io_timeout,
            self.records
                .insert_submission(name, &key, kind, submitted_at),
        )
        .await
        {
            Ok(Ok(submission)) => Ok(submission),
            Ok(Err(source)) => Err(UploadError::RecordInsert { key, source }),
            Err(_) => Err(UploadError::Timeout { key }),
        }
    }
}
