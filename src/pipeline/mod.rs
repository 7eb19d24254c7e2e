// OCR orchestration
//
// OcrPipeline is the control surface over the open document: single-page requests, the
// background whole-document scan, cancellation and document switching. Every render and
// recognition goes through one execution slot regardless of which path asked for it.

use crate::error::OcrError;
use crate::metrics::Metrics;
use crate::models::{PageResult, ScanState};
use crate::services::{normalize, Document, PageGeometry, RecognitionEngine, ResultCache};
use crate::state::{ScanStateManager, ScanTicket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use tokio::sync::{watch, Semaphore};

/// Recognitions allowed in flight at once. The inference capability is not reentrant.
pub const MAX_CONCURRENT_RECOGNITIONS: usize = 1;

/// The document currently open and the scan bookkeeping scoped to it.
struct DocumentSession {
    document: Arc<dyn Document>,
    /// Cache epoch the document was opened under.
    epoch: u64,
    /// Send `true` to stop the running scan at the next page boundary.
    cancel_tx: watch::Sender<bool>,
}

/// Cache-checked, slot-serialized page recognition shared by requests and the scan worker.
#[derive(Clone)]
struct PageRunner {
    engine: Arc<RecognitionEngine>,
    cache: Arc<ResultCache>,
    metrics: Arc<Metrics>,
    slot: Arc<Semaphore>,
    dpi: u32,
}

impl PageRunner {
    async fn run(
        &self,
        document: &dyn Document,
        epoch: u64,
        page: u32,
    ) -> Result<Arc<PageResult>, OcrError> {
        if let Some(hit) = self.cache.get(page) {
            self.metrics.record_cache_hit();
            return Ok(hit);
        }

        let _permit = self
            .slot
            .acquire()
            .await
            .map_err(|_| OcrError::EngineRuntime("recognition slot closed".to_string()))?;

        // filled while we waited for the slot
        if let Some(hit) = self.cache.get(page) {
            self.metrics.record_cache_hit();
            return Ok(hit);
        }

        let start = Instant::now();
        match self.recognize(document, page).await {
            Ok(result) => {
                let result = Arc::new(result);
                self.metrics
                    .record_page_recognized(result.line_count(), start.elapsed());
                self.metrics
                    .record_resolver_recoveries(self.engine.resolver().recoveries());
                self.cache.put_if_current(epoch, page, result.clone());
                tracing::debug!(
                    "Page {}: {} lines in {:.2}s",
                    page,
                    result.line_count(),
                    start.elapsed().as_secs_f32()
                );
                Ok(result)
            }
            Err(e) => {
                self.metrics.record_page_failed();
                self.metrics
                    .record_resolver_recoveries(self.engine.resolver().recoveries());
                Err(e)
            }
        }
    }

    async fn recognize(&self, document: &dyn Document, page: u32) -> Result<PageResult, OcrError> {
        let rendered = document.render_page(page, self.dpi).await?;
        if rendered.width_px == 0 || rendered.height_px == 0 {
            return Err(OcrError::Render {
                page,
                detail: format!("empty render {}x{}", rendered.width_px, rendered.height_px),
            });
        }

        let lines = self.engine.process(&rendered.image_path).await?;
        let geometry = PageGeometry::new(
            rendered.width_px,
            rendered.height_px,
            rendered.page_width_pt,
            rendered.page_height_pt,
        );

        Ok(PageResult::new(page, normalize(&lines, &geometry)))
    }
}

/// Orchestrates OCR for the single open document.
pub struct OcrPipeline {
    runner: PageRunner,
    scan: ScanStateManager,
    session: Mutex<Option<DocumentSession>>,
    ocr_enabled: AtomicBool,
}

impl OcrPipeline {
    pub fn new(engine: Arc<RecognitionEngine>, metrics: Arc<Metrics>, dpi: u32) -> Self {
        Self {
            runner: PageRunner {
                engine,
                cache: Arc::new(ResultCache::new()),
                metrics,
                slot: Arc::new(Semaphore::new(MAX_CONCURRENT_RECOGNITIONS)),
                dpi,
            },
            scan: ScanStateManager::new(),
            session: Mutex::new(None),
            ocr_enabled: AtomicBool::new(true),
        }
    }

    pub fn cache(&self) -> &Arc<ResultCache> {
        &self.runner.cache
    }

    pub fn scan_state(&self) -> &ScanStateManager {
        &self.scan
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.runner.metrics
    }

    pub fn dpi(&self) -> u32 {
        self.runner.dpi
    }

    pub fn has_document(&self) -> bool {
        self.lock_session().is_some()
    }

    pub fn ocr_enabled(&self) -> bool {
        self.ocr_enabled.load(Ordering::Acquire)
    }

    /// Make `document` the open document.
    ///
    /// Any running scan is told to stop, the previous document is closed, the result cache is
    /// invalidated and the scan state returns to idle.
    pub async fn open_document(&self, document: Arc<dyn Document>) {
        let previous = self.lock_session().take();
        if let Some(previous) = previous {
            let _ = previous.cancel_tx.send(true);
            previous.document.close().await;
        }

        let epoch = self.runner.cache.invalidate_all();
        self.scan.reset();

        tracing::info!("Document opened for OCR ({} pages)", document.page_count());
        let (cancel_tx, _) = watch::channel(false);
        *self.lock_session() = Some(DocumentSession {
            document,
            epoch,
            cancel_tx,
        });
    }

    /// Close the open document, if any, with the same cleanup as a document switch.
    pub async fn close_document(&self) -> bool {
        let previous = self.lock_session().take();
        let Some(previous) = previous else {
            return false;
        };

        let _ = previous.cancel_tx.send(true);
        previous.document.close().await;
        self.runner.cache.invalidate_all();
        self.scan.reset();
        tracing::info!("Document closed");
        true
    }

    /// Normalized lines of `page`, served from cache when available.
    pub async fn ocr_page(&self, page: u32) -> Result<Arc<PageResult>, OcrError> {
        let (document, epoch) = {
            let session = self.lock_session();
            let session = session.as_ref().ok_or(OcrError::NoDocument)?;
            (session.document.clone(), session.epoch)
        };

        let page_count = document.page_count();
        if page == 0 || page > page_count {
            return Err(OcrError::InvalidPage { page, page_count });
        }

        self.runner.run(document.as_ref(), epoch, page).await.inspect_err(|e| {
            tracing::error!("OCR of page {} failed: {}", page, e);
        })
    }

    /// Start the background scan of every page.
    ///
    /// While a scan is running this is a no-op returning the running state.
    pub fn start_document_scan(&self) -> Result<ScanState, OcrError> {
        let mut session = self.lock_session();
        let session = session.as_mut().ok_or(OcrError::NoDocument)?;

        let total_pages = session.document.page_count();
        let Some(ticket) = self.scan.begin(total_pages) else {
            tracing::debug!("OCR scan already running");
            return Ok(self.scan.snapshot());
        };

        let (cancel_tx, cancel_rx) = watch::channel(false);
        session.cancel_tx = cancel_tx;
        self.runner.metrics.record_scan_started();

        tokio::spawn(scan_worker(
            self.runner.clone(),
            self.scan.clone(),
            session.document.clone(),
            session.epoch,
            ticket,
            cancel_rx,
        ));

        Ok(self.scan.snapshot())
    }

    /// Non-blocking progress snapshot.
    pub fn progress(&self) -> ScanState {
        self.scan.snapshot()
    }

    /// Enable or disable OCR for the open document.
    ///
    /// Disabling stops the running scan at its next page boundary and returns the scan state
    /// to idle; cached pages are kept.
    pub fn set_ocr_mode(&self, enabled: bool) {
        self.ocr_enabled.store(enabled, Ordering::Release);
        if enabled {
            return;
        }

        if let Some(session) = self.lock_session().as_ref() {
            let _ = session.cancel_tx.send(true);
        }
        if self.scan.read(ScanState::is_running) {
            tracing::info!("OCR disabled, cancelling document scan");
        }
        self.scan.reset();
    }

    fn lock_session(&self) -> std::sync::MutexGuard<'_, Option<DocumentSession>> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Recognize pages `1..=N` in order until done, failed or cancelled.
async fn scan_worker(
    runner: PageRunner,
    scan: ScanStateManager,
    document: Arc<dyn Document>,
    epoch: u64,
    ticket: ScanTicket,
    cancel_rx: watch::Receiver<bool>,
) {
    let total_pages = document.page_count();
    tracing::info!("Starting OCR scan of {} pages", total_pages);

    for page in 1..=total_pages {
        if *cancel_rx.borrow() || !scan.is_current(ticket) {
            tracing::info!("OCR scan cancelled before page {}", page);
            runner.metrics.record_scan_cancelled();
            return;
        }

        match runner.run(document.as_ref(), epoch, page).await {
            Ok(result) => {
                scan.record_page(ticket, result.line_count());
            }
            Err(e) => {
                if scan.fail(ticket, Some(page), &e).is_empty() {
                    runner.metrics.record_scan_cancelled();
                } else {
                    tracing::error!("OCR scan stopped at page {}: {}", page, e);
                    runner.metrics.record_scan_failed();
                }
                return;
            }
        }
    }

    if scan.complete(ticket).is_empty() {
        runner.metrics.record_scan_cancelled();
        return;
    }

    runner.metrics.record_scan_completed();
    let state = scan.snapshot();
    tracing::info!(
        "OCR scan completed: {} pages, {} lines",
        state.processed_pages,
        state.total_lines
    );
}
