//! Services module - the OCR business logic, free of any transport or UI concerns.
//!
//! # Components
//!
//! - [`ModelResolver`]: binds a detector/recognizer [`ModelPair`](crate::models::ModelPair)
//!   from a single model root, reading identities from artifact descriptors. Owns
//!   forced re-resolution with stale-artifact eviction.
//! - [`RecognitionEngine`]: `image -> lines` over a [`Recognizer`] capability, with the
//!   bounded dependency-probe and mismatch-recovery policy.
//! - [`normalize`]: pixel polygons to document-point rectangles (bottom-left origin).
//! - [`ResultCache`]: per-document page memoization with epoch-guarded invalidation.
//! - [`Document`] / [`PdfDocument`]: the document container and its rasterizer.
//! - [`ModelManifest`]: `MODEL_MANIFEST.json` generation and verification.
//!
//! The subprocess-backed adapters ([`CommandRecognizer`], [`PdfDocument`]) use tokio for
//! non-blocking execution with timeouts; everything above them is tested against fakes.

pub mod cache;
pub mod document;
pub mod engine;
pub mod manifest;
pub mod normalize;
pub mod recognizer;
pub mod resolver;

pub use cache::ResultCache;
pub use document::{Document, PageSize, PdfDocument, RenderedPage};
pub use engine::RecognitionEngine;
pub use manifest::{ManifestProblem, ModelManifest, MANIFEST_FILE};
pub use normalize::{normalize, PageGeometry};
pub use recognizer::{
    CapabilityError, CommandRecognizer, ProbeOutcome, RawLine, Recognizer, OCR_CAPABILITY,
};
pub use resolver::{default_search_roots, installed_models, ModelResolver, StaleArtifacts};
