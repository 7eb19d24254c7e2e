// Scan state management
//
// ScanStateManager owns the ScanState of the open document behind a RwLock and emits
// ScanEvent notifications. Only the scan worker mutates it; any number of callers poll it.

use crate::error::OcrError;
use crate::models::{ScanState, ScanStatus};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::broadcast;

/// Events emitted when the scan state changes.
#[derive(Clone, Debug, PartialEq)]
pub enum ScanEvent {
    ScanStarted {
        total_pages: u32,
    },

    /// One more page finished successfully.
    PageProcessed {
        page: u32,
        lines: usize,
        processed: u32,
        total: u32,
    },

    ScanCompleted {
        processed: u32,
        total_lines: usize,
    },

    ScanFailed {
        page: Option<u32>,
        error: String,
    },

    /// State returned to idle for a new document or after cancellation.
    ScanReset,
}

/// Proof that the holder started the current scan.
///
/// Every [`reset`](ScanStateManager::reset) or new [`begin`](ScanStateManager::begin)
/// invalidates outstanding tickets, so a worker that outlives its scan cannot write
/// into the next one.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ScanTicket(u64);

#[derive(Debug, Default)]
struct Inner {
    state: ScanState,
    scan_id: u64,
}

/// Thread-safe owner of the document's [`ScanState`].
///
/// Reads take the lock only for the duration of a clone and never wait on recognition.
pub struct ScanStateManager {
    inner: Arc<RwLock<Inner>>,
    event_tx: broadcast::Sender<ScanEvent>,
}

impl ScanStateManager {
    pub fn new() -> Self {
        let (event_tx, _) = broadcast::channel(100);
        Self {
            inner: Arc::new(RwLock::new(Inner::default())),
            event_tx,
        }
    }

    /// Clone of the current state.
    pub fn snapshot(&self) -> ScanState {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .state
            .clone()
    }

    pub fn read<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&ScanState) -> R,
    {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        f(&inner.state)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ScanEvent> {
        self.event_tx.subscribe()
    }

    /// Start a scan of `total_pages` pages.
    ///
    /// Returns `None` without touching the state while a scan is already running.
    pub fn begin(&self, total_pages: u32) -> Option<ScanTicket> {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if inner.state.is_running() {
            return None;
        }

        let old = inner.state.clone();
        inner.scan_id += 1;
        inner.state = ScanState::running(total_pages);
        let ticket = ScanTicket(inner.scan_id);

        self.emit(detect_changes(&old, &inner.state));
        Some(ticket)
    }

    /// Whether `ticket` still belongs to the running scan.
    pub fn is_current(&self, ticket: ScanTicket) -> bool {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.scan_id == ticket.0 && inner.state.is_running()
    }

    /// Count one successfully processed page.
    pub fn record_page(&self, ticket: ScanTicket, lines: usize) -> Vec<ScanEvent> {
        self.update(ticket, |state| {
            state.processed_pages += 1;
            state.total_lines += lines;
        })
    }

    /// Terminate the scan with the error of `page`.
    pub fn fail(&self, ticket: ScanTicket, page: Option<u32>, error: &OcrError) -> Vec<ScanEvent> {
        self.update(ticket, |state| {
            state.status = ScanStatus::Error;
            state.failed_page = page;
            state.error = Some(error.to_string());
            state.error_kind = Some(error.kind().to_string());
        })
    }

    pub fn complete(&self, ticket: ScanTicket) -> Vec<ScanEvent> {
        self.update(ticket, |state| {
            state.status = ScanStatus::Completed;
        })
    }

    /// Return to idle and invalidate every outstanding ticket.
    pub fn reset(&self) -> Vec<ScanEvent> {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        inner.scan_id += 1;
        inner.state = ScanState::default();

        let changes = vec![ScanEvent::ScanReset];
        self.emit(changes.clone());
        changes
    }

    /// Apply `update_fn` if `ticket` is current, emitting the resulting events.
    fn update<F>(&self, ticket: ScanTicket, update_fn: F) -> Vec<ScanEvent>
    where
        F: FnOnce(&mut ScanState),
    {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if inner.scan_id != ticket.0 || !inner.state.is_running() {
            tracing::debug!("Ignoring update from superseded scan {}", ticket.0);
            return Vec::new();
        }

        let old = inner.state.clone();
        update_fn(&mut inner.state);

        let changes = detect_changes(&old, &inner.state);
        self.emit(changes.clone());
        changes
    }

    fn emit(&self, changes: Vec<ScanEvent>) {
        for change in changes {
            // no subscribers is fine
            let _ = self.event_tx.send(change);
        }
    }
}

/// Events implied by the transition `old -> new`.
///
/// Pages are processed in order, so the page just finished is `processed_pages`.
fn detect_changes(old: &ScanState, new: &ScanState) -> Vec<ScanEvent> {
    let mut changes = Vec::new();

    if old.status != ScanStatus::Running && new.status == ScanStatus::Running {
        changes.push(ScanEvent::ScanStarted {
            total_pages: new.total_pages,
        });
    }

    if new.processed_pages > old.processed_pages {
        changes.push(ScanEvent::PageProcessed {
            page: new.processed_pages,
            lines: new.total_lines.saturating_sub(old.total_lines),
            processed: new.processed_pages,
            total: new.total_pages,
        });
    }

    if old.status != new.status {
        match new.status {
            ScanStatus::Completed => changes.push(ScanEvent::ScanCompleted {
                processed: new.processed_pages,
                total_lines: new.total_lines,
            }),
            ScanStatus::Error => changes.push(ScanEvent::ScanFailed {
                page: new.failed_page,
                error: new.error.clone().unwrap_or_default(),
            }),
            ScanStatus::Idle | ScanStatus::Running => {}
        }
    }

    changes
}

impl Default for ScanStateManager {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for ScanStateManager {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            event_tx: self.event_tx.clone(),
        }
    }
}
