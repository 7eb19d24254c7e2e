use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of a whole-document scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanStatus {
    #[default]
    Idle,
    Running,
    Completed,
    Error,
}

impl ScanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanStatus::Idle => "idle",
            ScanStatus::Running => "running",
            ScanStatus::Completed => "completed",
            ScanStatus::Error => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ScanStatus::Completed | ScanStatus::Error)
    }
}

impl fmt::Display for ScanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Progress snapshot of the scan for the open document.
///
/// Owned by [`crate::state::ScanStateManager`]; callers only ever see clones.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ScanState {
    pub status: ScanStatus,
    pub processed_pages: u32,
    pub total_pages: u32,
    pub total_lines: usize,
    /// Page that failed, when `status` is `Error`.
    pub failed_page: Option<u32>,
    pub error: Option<String>,
    /// [`OcrError::kind`](crate::error::OcrError::kind) of `error`.
    pub error_kind: Option<String>,
}

impl ScanState {
    /// Fresh running state for a document of `total_pages` pages.
    pub fn running(total_pages: u32) -> Self {
        Self {
            status: ScanStatus::Running,
            total_pages,
            ..Self::default()
        }
    }

    pub fn is_running(&self) -> bool {
        self.status == ScanStatus::Running
    }

    /// Fraction of pages done, in `[0, 1]`.
    pub fn fraction(&self) -> f64 {
        if self.total_pages == 0 {
            return if self.status == ScanStatus::Completed { 1.0 } else { 0.0 };
        }
        f64::from(self.processed_pages) / f64::from(self.total_pages)
    }
}
