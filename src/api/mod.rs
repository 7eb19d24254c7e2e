//! Request/response bridge.
//!
//! Turns [`OcrPipeline`] operations into serde responses for the viewer: every response
//! carries `success`, and failures add `error` (message) and `error_kind`
//! ([`OcrError::kind`]). Requests arrive as JSON objects tagged by `method`.

use crate::error::OcrError;
use crate::models::{NormalizedLine, PageResult, ScanState};
use crate::pipeline::OcrPipeline;
use crate::services::{Document, PdfDocument};
use anyhow::Context;
use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinSet;

/// Responses buffered between request tasks and the writer.
const RESPONSE_QUEUE: usize = 100;

/// One recognized line as the viewer overlays it, in document points (bottom-left origin).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineDto {
    pub text: String,
    pub confidence: f32,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl From<&NormalizedLine> for LineDto {
    fn from(line: &NormalizedLine) -> Self {
        Self {
            text: line.text.clone(),
            confidence: line.confidence,
            x: line.rect.x,
            y: line.rect.y,
            width: line.rect.width,
            height: line.rect.height,
        }
    }
}

/// Failure half shared by every response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
}

impl From<&OcrError> for ErrorInfo {
    fn from(err: &OcrError) -> Self {
        Self {
            error: Some(err.to_string()),
            error_kind: Some(err.kind().to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcrPageResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lines: Option<Vec<LineDto>>,
    #[serde(flatten)]
    pub failure: ErrorInfo,
}

impl OcrPageResponse {
    fn ok(result: &PageResult) -> Self {
        Self {
            success: true,
            page: Some(result.page),
            lines: Some(result.lines.iter().map(LineDto::from).collect()),
            failure: ErrorInfo::default(),
        }
    }

    fn failed(page: u32, err: &OcrError) -> Self {
        Self {
            success: false,
            page: Some(page),
            lines: None,
            failure: err.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressResponse {
    pub success: bool,
    pub status: String,
    pub processed_pages: u32,
    pub total_pages: u32,
    pub total_lines: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_page: Option<u32>,
    #[serde(flatten)]
    pub failure: ErrorInfo,
}

impl From<ScanState> for ProgressResponse {
    fn from(state: ScanState) -> Self {
        Self {
            success: true,
            status: state.status.as_str().to_string(),
            processed_pages: state.processed_pages,
            total_pages: state.total_pages,
            total_lines: state.total_lines,
            failed_page: state.failed_page,
            failure: ErrorInfo {
                error: state.error,
                error_kind: state.error_kind,
            },
        }
    }
}

/// Response of operations without a payload beyond their outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_count: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ocr_enabled: Option<bool>,
    #[serde(flatten)]
    pub failure: ErrorInfo,
}

impl StatusResponse {
    fn ok() -> Self {
        Self {
            success: true,
            status: None,
            page_count: None,
            ocr_enabled: None,
            failure: ErrorInfo::default(),
        }
    }

    fn failed(err: &OcrError) -> Self {
        Self {
            success: false,
            status: None,
            page_count: None,
            ocr_enabled: None,
            failure: err.into(),
        }
    }
}

/// A request read from the viewer channel.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum Request {
    OcrPage { page: u32 },
    StartOcrDocument,
    GetOcrProgress,
    OpenDocument { path: Utf8PathBuf },
    CloseDocument,
    SetOcrMode { enabled: bool },
}

/// A request plus the caller's correlation id, echoed in the response.
#[derive(Debug, Clone, Deserialize)]
pub struct RequestEnvelope {
    #[serde(default)]
    pub id: Option<serde_json::Value>,
    #[serde(flatten)]
    pub request: Request,
}

/// The operations the viewer calls.
pub struct OcrApi {
    pipeline: Arc<OcrPipeline>,
    render_dir: Utf8PathBuf,
}

impl OcrApi {
    pub fn new(pipeline: Arc<OcrPipeline>, render_dir: impl Into<Utf8PathBuf>) -> Self {
        Self {
            pipeline,
            render_dir: render_dir.into(),
        }
    }

    pub fn pipeline(&self) -> &Arc<OcrPipeline> {
        &self.pipeline
    }

    pub async fn ocr_page(&self, page: u32) -> OcrPageResponse {
        match self.pipeline.ocr_page(page).await {
            Ok(result) => OcrPageResponse::ok(&result),
            Err(e) => OcrPageResponse::failed(page, &e),
        }
    }

    /// Idempotent while a scan is running.
    pub fn start_ocr_document(&self) -> StatusResponse {
        match self.pipeline.start_document_scan() {
            Ok(state) => StatusResponse {
                status: Some(state.status.as_str().to_string()),
                page_count: Some(state.total_pages),
                ..StatusResponse::ok()
            },
            Err(e) => StatusResponse::failed(&e),
        }
    }

    pub fn get_ocr_progress(&self) -> ProgressResponse {
        self.pipeline.progress().into()
    }

    /// Open a PDF from disk as the current document.
    pub async fn open_document(&self, path: &Utf8Path) -> StatusResponse {
        match PdfDocument::open(path, &self.render_dir).await {
            Ok(document) => self.open(Arc::new(document)).await,
            Err(e) => {
                tracing::error!("Failed to open {}: {}", path, e);
                StatusResponse::failed(&e)
            }
        }
    }

    /// Make an already opened document current.
    pub async fn open(&self, document: Arc<dyn Document>) -> StatusResponse {
        let page_count = document.page_count();
        self.pipeline.open_document(document).await;
        StatusResponse {
            page_count: Some(page_count),
            ..StatusResponse::ok()
        }
    }

    pub async fn close_document(&self) -> StatusResponse {
        if self.pipeline.close_document().await {
            StatusResponse::ok()
        } else {
            StatusResponse::failed(&OcrError::NoDocument)
        }
    }

    /// Reports the mode now in effect.
    pub fn set_ocr_mode(&self, enabled: bool) -> StatusResponse {
        self.pipeline.set_ocr_mode(enabled);
        StatusResponse {
            ocr_enabled: Some(self.pipeline.ocr_enabled()),
            ..StatusResponse::ok()
        }
    }

    /// Dispatch one request to its operation.
    pub async fn handle(&self, request: Request) -> serde_json::Value {
        let response = match request {
            Request::OcrPage { page } => serde_json::to_value(self.ocr_page(page).await),
            Request::StartOcrDocument => serde_json::to_value(self.start_ocr_document()),
            Request::GetOcrProgress => serde_json::to_value(self.get_ocr_progress()),
            Request::OpenDocument { path } => serde_json::to_value(self.open_document(&path).await),
            Request::CloseDocument => serde_json::to_value(self.close_document().await),
            Request::SetOcrMode { enabled } => serde_json::to_value(self.set_ocr_mode(enabled)),
        };

        response.unwrap_or_else(|e| {
            serde_json::json!({
                "success": false,
                "error": format!("failed to encode response: {}", e),
                "error_kind": "internal",
            })
        })
    }

    /// Parse and handle one JSON line, echoing the request id.
    pub async fn handle_line(&self, line: &str) -> serde_json::Value {
        let envelope: RequestEnvelope = match serde_json::from_str(line) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!("Malformed request: {}", e);
                return serde_json::json!({
                    "success": false,
                    "error": format!("malformed request: {}", e),
                    "error_kind": "bad_request",
                });
            }
        };

        let mut response = self.handle(envelope.request).await;
        if let (Some(id), Some(object)) = (envelope.id, response.as_object_mut()) {
            object.insert("id".to_string(), id);
        }
        response
    }
}

/// Answer newline-delimited JSON requests from `reader` until it closes.
///
/// Each request runs in its own task and responses are written as they complete, so a
/// progress poll never queues behind a page waiting for the recognition slot. Callers
/// match responses to requests by `id`.
pub async fn serve<R, W>(api: Arc<OcrApi>, reader: R, writer: W) -> anyhow::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (response_tx, mut response_rx) = mpsc::channel::<serde_json::Value>(RESPONSE_QUEUE);

    let writer_task = tokio::spawn(async move {
        let mut writer = writer;
        while let Some(response) = response_rx.recv().await {
            let mut encoded =
                serde_json::to_string(&response).context("Failed to encode response")?;
            encoded.push('\n');
            writer
                .write_all(encoded.as_bytes())
                .await
                .context("Failed to write response")?;
            writer.flush().await.context("Failed to write response")?;
        }
        anyhow::Ok(())
    });

    let mut lines = reader.lines();
    let mut requests = JoinSet::new();
    while let Some(line) = lines.next_line().await.context("Failed to read request")? {
        if line.trim().is_empty() {
            continue;
        }

        let api = api.clone();
        let response_tx = response_tx.clone();
        requests.spawn(async move {
            let response = api.handle_line(&line).await;
            if response_tx.send(response).await.is_err() {
                tracing::warn!("Response writer closed, dropping response");
            }
        });

        while requests.try_join_next().is_some() {}
    }

    tracing::info!("Request channel closed, finishing {} request(s)", requests.len());
    while requests.join_next().await.is_some() {}
    drop(response_tx);

    writer_task.await.context("Response writer task failed")?
}
