//! Data models for the OCR subsystem.
//!
//! - [`Line`], [`NormalizedLine`], [`PageResult`]: recognition output before and after
//!   coordinate normalization
//! - [`ModelPair`], [`ModelRoots`], [`PairCandidate`]: model artifact identities and where they
//!   may be loaded from
//! - [`ScanState`]: progress snapshot of a whole-document scan
//! - [`OcrSettings`]: user configuration loaded by [`crate::config::ConfigManager`]
//!
//! All types are plain values. Shared mutable state lives in
//! [`crate::state::ScanStateManager`] and [`crate::services::ResultCache`].

pub mod config;
pub mod line;
pub mod model_pair;
pub mod scan_state;

pub use config::{DEFAULT_RECOGNITION_DPI, OcrSettings};
pub use line::{InvalidLine, Line, NormalizedLine, PageResult, Point, Rect};
pub use model_pair::{
    ModelArtifact, ModelPair, ModelRole, ModelRoots, OFFICIAL_MODELS_DIR, PairCandidate,
};
pub use scan_state::{ScanState, ScanStatus};
