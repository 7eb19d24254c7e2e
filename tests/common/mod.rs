//! Shared fixtures: on-disk model roots and in-memory documents/recognizers.

#![allow(dead_code)]

use async_trait::async_trait;
use camino::{Utf8Path, Utf8PathBuf};
use deepread_ocr::error::OcrError;
use deepread_ocr::models::{ModelPair, ModelRoots, PairCandidate, OFFICIAL_MODELS_DIR};
use deepread_ocr::services::resolver::{DESCRIPTOR_FILE, GRAPH_FILE};
use deepread_ocr::services::{
    CapabilityError, Document, ModelResolver, ProbeOutcome, RawLine, RecognitionEngine,
    Recognizer, RenderedPage,
};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

pub const SERVER_DET: &str = "PP-OCRv5_server_det";
pub const SERVER_REC: &str = "PP-OCRv5_server_rec";
pub const MOBILE_DET: &str = "PP-OCRv5_mobile_det";
pub const MOBILE_REC: &str = "PP-OCRv5_mobile_rec";

pub fn temp_root() -> (TempDir, Utf8PathBuf) {
    let temp = TempDir::new().unwrap();
    let root = Utf8PathBuf::try_from(temp.path().to_path_buf()).unwrap();
    (temp, root)
}

/// Install a complete model directory `dir_name` declaring `declared`.
pub fn install(root: &Utf8Path, dir_name: &str, declared: &str) -> Utf8PathBuf {
    let dir = root.join(OFFICIAL_MODELS_DIR).join(dir_name);
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join(GRAPH_FILE), "{\"graph\": []}").unwrap();
    fs::write(dir.join("inference.pdiparams"), vec![0u8; 64]).unwrap();
    fs::write(
        dir.join(DESCRIPTOR_FILE),
        format!("Global:\n  model_name: {}\n", declared),
    )
    .unwrap();
    dir
}

pub fn install_model(root: &Utf8Path, name: &str) -> Utf8PathBuf {
    install(root, name, name)
}

/// Root holding both the server and the mobile pair.
pub fn root_with_both_pairs() -> (TempDir, Utf8PathBuf) {
    let (temp, root) = temp_root();
    for name in [SERVER_DET, SERVER_REC, MOBILE_DET, MOBILE_REC] {
        install_model(&root, name);
    }
    (temp, root)
}

pub fn resolver_for(root: &Utf8Path) -> Arc<ModelResolver> {
    Arc::new(ModelResolver::new(
        ModelRoots::Explicit(root.to_path_buf()),
        PairCandidate::defaults(),
    ))
}

/// Axis-aligned line polygon in render pixels.
pub fn raw_line(text: &str, x: f64, y: f64, width: f64, height: f64) -> RawLine {
    RawLine {
        text: text.to_string(),
        confidence: 0.9,
        polygon: vec![[x, y], [x + width, y], [x + width, y + height], [x, y + height]],
    }
}

/// Page number encoded in a [`FakeDocument`] render path.
pub fn page_of(image: &Utf8Path) -> u32 {
    image
        .file_stem()
        .and_then(|stem| stem.strip_prefix("page"))
        .and_then(|n| n.parse().ok())
        .unwrap_or(0)
}

/// In-memory document of US Letter pages rendered at 150 DPI.
pub struct FakeDocument {
    name: String,
    pages: u32,
    pub renders: AtomicUsize,
    pub closed: AtomicBool,
    render_delay: Duration,
}

impl FakeDocument {
    pub fn new(name: &str, pages: u32) -> Self {
        Self {
            name: name.to_string(),
            pages,
            renders: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
            render_delay: Duration::ZERO,
        }
    }

    pub fn with_render_delay(mut self, delay: Duration) -> Self {
        self.render_delay = delay;
        self
    }

    pub fn render_count(&self) -> usize {
        self.renders.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Document for FakeDocument {
    fn page_count(&self) -> u32 {
        self.pages
    }

    async fn render_page(&self, page: u32, _dpi: u32) -> Result<RenderedPage, OcrError> {
        if !self.render_delay.is_zero() {
            tokio::time::sleep(self.render_delay).await;
        }
        self.renders.fetch_add(1, Ordering::SeqCst);
        Ok(RenderedPage {
            image_path: Utf8PathBuf::from(format!("/renders/{}/page{}.png", self.name, page)),
            width_px: 1275,
            height_px: 1650,
            page_width_pt: 612.0,
            page_height_pt: 792.0,
        })
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Recognizer answering from a per-page script.
#[derive(Default)]
pub struct ScriptedRecognizer {
    lines_per_page: HashMap<u32, usize>,
    failing_pages: HashSet<u32>,
    pub loads: AtomicUsize,
    pub predicted: Mutex<Vec<u32>>,
}

impl ScriptedRecognizer {
    pub fn new(lines_per_page: &[(u32, usize)]) -> Self {
        Self {
            lines_per_page: lines_per_page.iter().copied().collect(),
            ..Self::default()
        }
    }

    pub fn failing_on(mut self, page: u32) -> Self {
        self.failing_pages.insert(page);
        self
    }

    pub fn predicted_pages(&self) -> Vec<u32> {
        self.predicted.lock().unwrap().clone()
    }
}

#[async_trait]
impl Recognizer for ScriptedRecognizer {
    async fn load(&self, _pair: &ModelPair, _verify: bool) -> Result<(), CapabilityError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn predict(
        &self,
        _pair: &ModelPair,
        image: &Utf8Path,
    ) -> Result<Vec<RawLine>, CapabilityError> {
        let page = page_of(image);
        self.predicted.lock().unwrap().push(page);

        if self.failing_pages.contains(&page) {
            return Err(CapabilityError::Runtime(format!("inference crashed on page {}", page)));
        }

        let count = self.lines_per_page.get(&page).copied().unwrap_or(0);
        Ok((0..count)
            .map(|i| raw_line(&format!("p{} line {}", page, i), 100.0, 100.0 + 40.0 * i as f64, 500.0, 30.0))
            .collect())
    }

    async fn probe(&self, _capability: &str) -> ProbeOutcome {
        ProbeOutcome::Usable
    }
}

/// Engine over a fresh root with both pairs installed.
pub fn engine_with(recognizer: Arc<dyn Recognizer>) -> (TempDir, Arc<RecognitionEngine>) {
    let (temp, root) = root_with_both_pairs();
    let engine = Arc::new(RecognitionEngine::new(resolver_for(&root), recognizer));
    (temp, engine)
}

/// Poll `check` every 10ms until it holds or two seconds pass.
pub async fn wait_until<F>(mut check: F) -> bool
where
    F: FnMut() -> bool,
{
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
