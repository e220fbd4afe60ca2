//! Publish consistency pipeline.
//!
//! - [`slug`]: slug seeds and bounded-attempt allocation
//! - [`render`]: the renderer seam and a static HTML renderer
//! - [`artifact`]: object stores and the upload-before-commit publisher
//! - [`invalidate`]: best-effort cache purges
//! - [`orchestrator`]: sequences the above around the revision CAS

pub mod artifact;
pub mod invalidate;
pub mod orchestrator;
pub mod render;
pub mod slug;
pub mod types;

pub use artifact::{
    ArtifactError, ArtifactPublisher, ArtifactReceipt, FsObjectStore, HttpObjectStore,
    MemoryObjectStore, ObjectStore,
};
pub use invalidate::{CacheInvalidator, HttpPurgeBackend, PurgeBackend, PurgeReport};
pub use orchestrator::{PublishOrchestrator, RenderedPage};
pub use render::{Renderer, StaticHtmlRenderer};
pub use slug::SlugAllocator;
pub use types::{DraftOutcome, PublishError, PublishOutcome, PublishWarning};
