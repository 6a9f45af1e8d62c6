use crate::config::DatabaseConfig;
use crate::upload::SubmissionStore;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::FromRow;
use std::convert::Infallible;
use std::time::Duration;
use tracing::{debug, info, instrument};
use uuid::Uuid;

/// Kind of media a submission holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    /// Still image
    Image,
    /// Short video clip
    Video,
}

impl MediaKind {
    /// Column/wire representation
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Image => "image",
            MediaKind::Video => "video",
        }
    }
}

// Legacy rows predate the media_kind column; anything unrecognized reads
// back as an image.
impl TryFrom<String> for MediaKind {
    type Error = Infallible;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Ok(match value.as_str() {
            "video" => MediaKind::Video,
            _ => MediaKind::Image,
        })
    }
}

/// Stored submission metadata: one row per uploaded media file
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Submission {
    /// Unique submission ID, assigned by the store at insert time
    pub id: Uuid,
    /// Submitter display name, free text
    pub name: String,
    /// Generated storage key addressing the blob in the object store
    pub filename: String,
    /// Media kind inferred from the declared content type at upload
    #[sqlx(try_from = "String")]
    pub media_kind: MediaKind,
    /// Upload timestamp (UTC), assigned when the batch was processed
    pub submitted_at: DateTime<Utc>,
    /// Row creation time
    pub created_at: DateTime<Utc>,
}

/// Read side of the submission store; implemented by [`MetadataStore`] and
/// faked in handler tests
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SubmissionReader: Send + Sync {
    /// Full ordered read, newest first
    async fn list_submissions(&self) -> Result<Vec<Submission>>;
    /// Point lookup for the detail overlay
    async fn get_submission(&self, id: Uuid) -> Result<Option<Submission>>;
    /// Total record count; doubles as the readiness probe
    async fn count_submissions(&self) -> Result<i64>;
}

/// Metadata store for submission records in PostgreSQL
pub struct MetadataStore {
    pool: PgPool,
}

impl MetadataStore {
    /// Create a new metadata store with connection pool
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .idle_timeout(Some(Duration::from_secs(config.idle_timeout_secs)))
            .connect(&config.url)
            .await
            .context("Failed to connect to PostgreSQL")?;

        info!("Connected to PostgreSQL database");

        Ok(Self { pool })
    }

    /// Run database migrations
    pub async fn run_migrations(&self) -> Result<()> {
        info!("Running database migrations");

        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("Failed to run migrations")?;

        info!("Database migrations completed");
        Ok(())
    }

    /// Insert a submission record. Called only after its blob landed in the
    /// object store, so a record implies a blob; the reverse does not hold.
    #[instrument(skip(self), fields(filename = %filename))]
    pub async fn insert_submission(
        &self,
        name: &str,
        filename: &str,
        media_kind: MediaKind,
        submitted_at: DateTime<Utc>,
    ) -> Result<Submission> {
        let submission = sqlx::query_as::<_, Submission>(
            r#"
            INSERT INTO submissions (name, filename, media_kind, submitted_at)
            VALUES ($1, $2, $3, $4)
            RETURNING id, name, filename, media_kind, submitted_at, created_at
            "#,
        )
        .bind(name)
        .bind(filename)
        .bind(media_kind.as_str())
        .bind(submitted_at)
        .fetch_one(&self.pool)
        .await
        .context("Failed to insert submission")?;

        debug!(
            submission_id = %submission.id,
            filename = %filename,
            "Submission recorded"
        );

        metrics::counter!("gallery.submissions.inserted").increment(1);

        Ok(submission)
    }

    /// Full ordered read of all submissions, newest first.
    ///
    /// No pagination: the domain (one small event) bounds the record count.
    /// This is a stated scalability ceiling, not an oversight.
    #[instrument(skip(self))]
    pub async fn list_submissions(&self) -> Result<Vec<Submission>> {
        let submissions = sqlx::query_as::<_, Submission>(
            r#"
            SELECT id, name, filename, media_kind, submitted_at, created_at
            FROM submissions
            ORDER BY submitted_at DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to list submissions")?;

        Ok(submissions)
    }

    /// Get a single submission by ID
    pub async fn get_submission(&self, id: Uuid) -> Result<Option<Submission>> {
        let submission = sqlx::query_as::<_, Submission>(
            r#"
            SELECT id, name, filename, media_kind, submitted_at, created_at
            FROM submissions
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to query submission")?;

        Ok(submission)
    }

    /// Count all submissions
    pub async fn count_submissions(&self) -> Result<i64> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM submissions")
            .fetch_one(&self.pool)
            .await
            .context("Failed to count submissions")?;

        Ok(count.0)
    }
}

#[async_trait]
impl SubmissionReader for MetadataStore {
    async fn list_submissions(&self) -> Result<Vec<Submission>> {
        MetadataStore::list_submissions(self).await
    }

    async fn get_submission(&self, id: Uuid) -> Result<Option<Submission>> {
        MetadataStore::get_submission(self, id).await
    }

    async fn count_submissions(&self) -> Result<i64> {
        MetadataStore::count_submissions(self).await
    }
}

#[async_trait]
impl SubmissionStore for MetadataStore {
    async fn insert_submission(
        &self,
        name: &str,
        filename: &str,
        media_kind: MediaKind,
        submitted_at: DateTime<Utc>,
    ) -> Result<Submission> {
        MetadataStore::insert_submission(self, name, filename, media_kind, submitted_at).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_media_kind_roundtrip() {
        assert_eq!(MediaKind::try_from("image".to_string()), Ok(MediaKind::Image));
        assert_eq!(MediaKind::try_from("video".to_string()), Ok(MediaKind::Video));
        assert_eq!(MediaKind::Image.as_str(), "image");
        assert_eq!(MediaKind::Video.as_str(), "video");
    }

    #[test]
    fn test_media_kind_legacy_defaults_to_image() {
        // Rows written before the column existed carry the column default
        // but anything unexpected still decodes as an image.
        assert_eq!(MediaKind::try_from(String::new()), Ok(MediaKind::Image));
        assert_eq!(MediaKind::try_from("IMAGE".to_string()), Ok(MediaKind::Image));
    }

    #[test]
    fn test_media_kind_json_representation() {
        assert_eq!(serde_json::to_string(&MediaKind::Image).unwrap(), "\"image\"");
        assert_eq!(serde_json::to_string(&MediaKind::Video).unwrap(), "\"video\"");
    }
}
