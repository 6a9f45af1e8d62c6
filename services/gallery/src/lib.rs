//! Event Guest Gallery Service
//!
//! Backend for a single-event photo/video sharing page: guests enter a name,
//! upload images or short videos, and everyone sees a shared gallery. Blobs
//! live in S3-compatible object storage under generated keys, metadata lives
//! in PostgreSQL, and a QR endpoint renders the event link as a scannable
//! code.
//!
//! ## Features
//!
//! - **Batch Uploads with Per-File Isolation**: files are validated and
//!   stored strictly sequentially; one failure never aborts the batch, and
//!   progress rises monotonically to 100 regardless of per-file outcome
//! - **Blob-Then-Record Durability**: a submission record exists only if its
//!   blob landed first; a failed record insert leaves an orphan blob that is
//!   tolerated and never surfaced
//! - **Ordered Gallery Reads**: one full scan, newest first, resolved to
//!   public object URLs
//! - **Link Presenter**: the fixed event URL as an SVG QR code in three
//!   viewport size tiers
//!
//! ## Architecture
//!
//! ```text
//! Multipart Upload            S3 Bucket                 PostgreSQL
//! ┌──────────────┐           ┌──────────────┐          ┌──────────────┐
//! │ name +       │           │ <uuid>.<ext> │          │ submissions  │
//! │ file parts   │──────────▶│   blobs      │          │   records    │
//! └──────────────┘           └──────────────┘          └──────────────┘
//!        │                          ▲                         ▲
//!        ▼                          │                         │
//! ┌──────────────┐                  │                         │
//! │ Upload       │──── put blob ────┘                         │
//! │ Coordinator  │──── then insert record ────────────────────┘
//! └──────────────┘
//!        │
//!        ▼
//! ┌──────────────┐           ┌──────────────┐
//! │ Gallery      │           │ QR Link      │
//! │ Read API     │           │ Presenter    │
//! └──────────────┘           └──────────────┘
//! ```

pub mod api;
pub mod config;
pub mod metadata_store;
pub mod object_store;
pub mod qr;
pub mod upload;

pub use api::{AppState, GalleryResponse, SubmissionResponse, UploadResponse};
pub use config::{Config, Edition};
pub use metadata_store::{MediaKind, MetadataStore, Submission, SubmissionReader};
pub use object_store::ObjectStore;
pub use upload::{
    BatchReport, BlobStore, IncomingFile, SubmissionStore, UploadCoordinator, UploadError,
    UploadPolicy,
};
