//! Thumbservice
//!
//! Serves JPEG thumbnails of archived astronomical frames over HTTP. A
//! thumbnail is rendered once per distinct `(frame, parameters)` pair, stored in
//! S3 under a content-addressed key and handed out as a presigned URL.
//!
//! ## Features
//!
//! - **Frame Validation**: Only image-bearing FITS frames are rendered, colour
//!   composites only for frames attached to an observation request
//! - **Content-addressed Caching**: `{frame_id}.{sha256(params)}.jpg` keys make
//!   repeat requests a single `HEAD` plus a presign
//! - **Colour Composites**: Reduced R/V/B companion frames are resolved,
//!   aligned on a best-effort basis and combined by the codec
//! - **Leak-free Temp Files**: Every temp file is tracked per request and
//!   carries its worker's pid, so crashed workers can be swept
//!
//! ## Architecture
//!
//! ```text
//!  GET /{frame}/            Archive API                 S3 Bucket
//! ┌──────────────┐         ┌──────────────┐           ┌──────────────┐
//! │ API          │────────▶│ Frame lookup │           │ {id}.{hash}  │
//! └──────────────┘         └──────────────┘           │   .jpg       │
//!        │                        │                   └──────────────┘
//!        ▼                        ▼                          ▲
//! ┌──────────────┐  miss   ┌──────────────┐                  │
//! │ Validator +  │────────▶│ Resolver +   │                  │
//! │ Cache Gate   │         │ Downloads    │                  │
//! └──────────────┘         └──────────────┘                  │
//!        │ hit                    │                          │
//!        │                        ▼                          │
//!        │                 ┌──────────────┐   ┌──────────────┐
//!        │                 │ Alignment    │──▶│ Codec +      │
//!        │                 │ (fallback)   │   │ Upload       │
//!        │                 └──────────────┘   └──────────────┘
//!        ▼
//! ┌──────────────┐
//! │ Presigned    │
//! │ URL          │
//! └──────────────┘
//! ```

pub mod alignment;
pub mod api;
pub mod archive;
pub mod cache_key;
pub mod config;
pub mod conversion;
pub mod error;
pub mod frame;
pub mod lifecycle;
pub mod object_store;
pub mod pipeline;
pub mod resolver;
pub mod validator;
pub mod workspace;

pub use alignment::{AlignmentOutcome, Aligner, CommandAligner};
pub use api::{AppState, ThumbnailResponse};
pub use archive::{ArchiveClient, FrameArchive};
pub use cache_key::{derive_key, CacheKey};
pub use config::Config;
pub use conversion::{CommandConverter, Converter};
pub use error::ThumbnailError;
pub use frame::{FrameDescriptor, FrameRef, ThumbnailParams, ThumbnailQuery};
pub use object_store::{ObjectStore, S3ObjectStore, ThumbnailStore};
pub use pipeline::{Thumbnail, ThumbnailPipeline};
pub use validator::{FrameValidator, ValidationDecision};
pub use workspace::Workspace;
