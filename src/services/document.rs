use crate::error::OcrError;
use async_trait::async_trait;
use camino::{Utf8Path, Utf8PathBuf};
use regex::Regex;
use std::process::Stdio;
use std::sync::{LazyLock, Mutex, PoisonError};
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;

const RENDER_TIMEOUT: Duration = Duration::from_secs(120);

static PAGES_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^Pages:\s+(\d+)").expect("Invalid pages regex"));
static SIZE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^Page\s+(\d+)\s+size:\s+([\d.]+)\s+x\s+([\d.]+)")
        .expect("Invalid page size regex")
});
static ROT_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^Page\s+(\d+)\s+rot:\s+(-?\d+)").expect("Invalid rotation regex")
});

/// A page rasterized for recognition.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedPage {
    pub image_path: Utf8PathBuf,
    pub width_px: u32,
    pub height_px: u32,
    /// Page size in points as displayed (rotation applied).
    pub page_width_pt: f64,
    pub page_height_pt: f64,
}

/// The open document container, as far as OCR needs it.
#[async_trait]
pub trait Document: Send + Sync {
    fn page_count(&self) -> u32;

    /// Rasterize 1-based `page` at `dpi`.
    async fn render_page(&self, page: u32, dpi: u32) -> Result<RenderedPage, OcrError>;

    /// Release the document and any scratch files it produced.
    async fn close(&self);
}

/// Displayed size of one PDF page.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageSize {
    pub width_pt: f64,
    pub height_pt: f64,
}

/// Parse `pdfinfo -f 1 -l N` output into per-page displayed sizes.
///
/// Pages rotated by 90 or 270 degrees report their unrotated media box; their
/// dimensions are swapped so the result matches what the rasterizer produces.
pub fn parse_pdfinfo(output: &str) -> Result<Vec<PageSize>, String> {
    let count: usize = PAGES_PATTERN
        .captures(output)
        .and_then(|c| c[1].parse().ok())
        .ok_or_else(|| "pdfinfo reported no page count".to_string())?;

    let mut sizes: Vec<Option<PageSize>> = vec![None; count];
    for caps in SIZE_PATTERN.captures_iter(output) {
        let (Ok(page), Ok(width_pt), Ok(height_pt)) =
            (caps[1].parse::<usize>(), caps[2].parse::<f64>(), caps[3].parse::<f64>())
        else {
            continue;
        };
        if let Some(slot) = page.checked_sub(1).and_then(|i| sizes.get_mut(i)) {
            *slot = Some(PageSize { width_pt, height_pt });
        }
    }

    for caps in ROT_PATTERN.captures_iter(output) {
        let (Ok(page), Ok(rotation)) = (caps[1].parse::<usize>(), caps[2].parse::<i32>()) else {
            continue;
        };
        if rotation.rem_euclid(180) != 90 {
            continue;
        }
        if let Some(Some(size)) = page.checked_sub(1).and_then(|i| sizes.get_mut(i)) {
            std::mem::swap(&mut size.width_pt, &mut size.height_pt);
        }
    }

    sizes
        .into_iter()
        .enumerate()
        .map(|(i, size)| size.ok_or_else(|| format!("pdfinfo reported no size for page {}", i + 1)))
        .collect()
}

/// Scratch image name for a rendered page, `<stem>_page<N>_dpi<D>.png`.
pub fn render_file_name(stem: &str, page: u32, dpi: u32) -> String {
    format!("{}_page{}_dpi{}.png", stem, page, dpi)
}

/// Scratch renders owned by an open document.
#[derive(Debug, Default)]
struct Renders {
    paths: Vec<Utf8PathBuf>,
    closed: bool,
}

/// A PDF on disk, rasterized with poppler's `pdftoppm`.
pub struct PdfDocument {
    path: Utf8PathBuf,
    render_dir: Utf8PathBuf,
    pages: Vec<PageSize>,
    renders: Mutex<Renders>,
}

impl PdfDocument {
    /// Open `path`, reading page geometry with `pdfinfo`.
    pub async fn open(path: &Utf8Path, render_dir: &Utf8Path) -> Result<Self, OcrError> {
        if !path.is_file() {
            return Err(OcrError::io(
                path,
                std::io::Error::new(std::io::ErrorKind::NotFound, "document not found"),
            ));
        }

        let output = Command::new("pdfinfo")
            .args(["-f", "1", "-l", "999999"])
            .arg(path.as_str())
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| OcrError::io(path, e))?;

        if !output.status.success() {
            return Err(OcrError::io(
                path,
                std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    String::from_utf8_lossy(&output.stderr).trim().to_string(),
                ),
            ));
        }

        let pages = parse_pdfinfo(&String::from_utf8_lossy(&output.stdout)).map_err(|e| {
            OcrError::io(path, std::io::Error::new(std::io::ErrorKind::InvalidData, e))
        })?;

        tokio::fs::create_dir_all(render_dir)
            .await
            .map_err(|e| OcrError::io(render_dir, e))?;

        tracing::info!("Opened {} ({} pages)", path, pages.len());
        Ok(Self {
            path: path.to_path_buf(),
            render_dir: render_dir.to_path_buf(),
            pages,
            renders: Mutex::new(Renders::default()),
        })
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    pub fn page_size(&self, page: u32) -> Option<PageSize> {
        let index = usize::try_from(page).ok()?.checked_sub(1)?;
        self.pages.get(index).copied()
    }

    fn is_closed(&self) -> bool {
        self.renders.lock().unwrap_or_else(PoisonError::into_inner).closed
    }

    /// Record a finished render for cleanup on close.
    ///
    /// Returns false, and deletes the file, when the document was closed while
    /// the render was in flight.
    async fn keep_render(&self, image_path: &Utf8Path) -> bool {
        {
            let mut renders = self.renders.lock().unwrap_or_else(PoisonError::into_inner);
            if !renders.closed {
                renders.paths.push(image_path.to_path_buf());
                return true;
            }
        }

        if let Err(e) = tokio::fs::remove_file(image_path).await {
            tracing::debug!("Could not remove late render {}: {}", image_path, e);
        }
        false
    }
}

#[async_trait]
impl Document for PdfDocument {
    fn page_count(&self) -> u32 {
        u32::try_from(self.pages.len()).unwrap_or(u32::MAX)
    }

    async fn render_page(&self, page: u32, dpi: u32) -> Result<RenderedPage, OcrError> {
        if self.is_closed() {
            return Err(OcrError::NoDocument);
        }
        let size = self.page_size(page).ok_or(OcrError::InvalidPage {
            page,
            page_count: self.page_count(),
        })?;

        let stem = self.path.file_stem().unwrap_or("document");
        let image_path = self.render_dir.join(render_file_name(stem, page, dpi));
        // pdftoppm appends the extension itself
        let prefix = image_path.with_extension("");
        let page_arg = page.to_string();

        let child = Command::new("pdftoppm")
            .args(["-r", &dpi.to_string(), "-f", &page_arg, "-l", &page_arg, "-png", "-singlefile"])
            .arg(self.path.as_str())
            .arg(prefix.as_str())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| OcrError::Render {
                page,
                detail: format!("failed to start pdftoppm: {}", e),
            })?;

        let output = timeout(RENDER_TIMEOUT, child.wait_with_output())
            .await
            .map_err(|_| OcrError::Render {
                page,
                detail: format!("pdftoppm timed out after {:?}", RENDER_TIMEOUT),
            })?
            .map_err(|e| OcrError::Render {
                page,
                detail: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(OcrError::Render {
                page,
                detail: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let (width_px, height_px) =
            image::image_dimensions(&image_path).map_err(|e| OcrError::Render {
                page,
                detail: format!("unreadable render {}: {}", image_path, e),
            })?;

        if !self.keep_render(&image_path).await {
            return Err(OcrError::NoDocument);
        }

        tracing::debug!("Rendered page {} at {} dpi: {}x{} px", page, dpi, width_px, height_px);
        Ok(RenderedPage {
            image_path,
            width_px,
            height_px,
            page_width_pt: size.width_pt,
            page_height_pt: size.height_pt,
        })
    }

    async fn close(&self) {
        let rendered: Vec<Utf8PathBuf> = {
            let mut renders = self.renders.lock().unwrap_or_else(PoisonError::into_inner);
            renders.closed = true;
            std::mem::take(&mut renders.paths)
        };
        for path in &rendered {
            if let Err(e) = tokio::fs::remove_file(path).await {
                tracing::debug!("Could not remove render {}: {}", path, e);
            }
        }
        tracing::info!("Closed {} ({} renders removed)", self.path, rendered.len());
    }
}
