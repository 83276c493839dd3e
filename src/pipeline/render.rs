//! PDF rasterisation: render every page to a JPEG file via pdfium.
//!
//! ## Why spawn_blocking?
//!
//! The `pdfium-render` crate wraps the pdfium C++ library, which uses
//! thread-local state internally and is not safe to call from async contexts.
//! `tokio::task::spawn_blocking` moves the work onto the blocking pool so
//! the runtime keeps servicing network I/O while a long document renders.
//!
//! ## Idempotence
//!
//! Page `i` lands in `page_{i:05}.jpg`. A page whose file already exists and
//! is non-empty is reused, never re-rendered, so an interrupted render
//! resumes where it stopped. Pages are written to a temp file and renamed
//! into place, so a crash mid-encode cannot leave a truncated page behind
//! that would later pass the existence check.
//!
//! Existing pages are reused even if DPI or quality changed since they were
//! produced. The settings used are stamped into `.render.json`; a mismatch
//! is logged but does not trigger a re-render. Filling gaps in an already
//! stamped directory keeps the old stamp, so the warning persists until the
//! directory is rendered from scratch.

use crate::config::RenderSettings;
use crate::error::RenderError;
use async_trait::async_trait;
use image::codecs::jpeg::JpegEncoder;
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const SETTINGS_STAMP: &str = ".render.json";

/// One rendered page on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageImage {
    /// 1-based position in the document.
    pub ordinal: usize,
    pub path: PathBuf,
}

/// Turns a document into an ordered sequence of page images.
#[async_trait]
pub trait PageRenderer: Send + Sync {
    /// Render `document` into `out_dir`, reusing pages already present.
    ///
    /// Returns pages in document order, ordinals `1..=n` without gaps.
    async fn render(
        &self,
        document: &Path,
        out_dir: &Path,
        settings: RenderSettings,
    ) -> Result<Vec<PageImage>, RenderError>;
}

/// File name of page `ordinal`; zero padding keeps lexical order = page order.
pub fn page_path(out_dir: &Path, ordinal: usize) -> PathBuf {
    out_dir.join(format!("page_{ordinal:05}.jpg"))
}

/// True when `path` is a regular, non-empty file.
pub fn is_present(path: &Path) -> bool {
    fs::metadata(path)
        .map(|m| m.is_file() && m.len() > 0)
        .unwrap_or(false)
}

/// [`PageRenderer`] backed by pdfium.
#[derive(Debug, Clone, Default)]
pub struct PdfiumRenderer {
    lib_path: Option<PathBuf>,
}

impl PdfiumRenderer {
    /// `lib_path` is the directory holding libpdfium; `None` binds the system library.
    pub fn new(lib_path: Option<PathBuf>) -> Self {
        Self { lib_path }
    }
}

#[async_trait]
impl PageRenderer for PdfiumRenderer {
    async fn render(
        &self,
        document: &Path,
        out_dir: &Path,
        settings: RenderSettings,
    ) -> Result<Vec<PageImage>, RenderError> {
        let document = document.to_path_buf();
        let out_dir = out_dir.to_path_buf();
        let lib_path = self.lib_path.clone();

        tokio::task::spawn_blocking(move || {
            render_document_blocking(&document, &out_dir, settings, lib_path.as_deref())
        })
        .await
        .map_err(|e| RenderError::Panicked(e.to_string()))?
    }
}

fn bind_pdfium(lib_path: Option<&Path>) -> Result<Pdfium, RenderError> {
    let bindings = match lib_path {
        Some(dir) => Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(dir)),
        None => Pdfium::bind_to_system_library(),
    }
    .map_err(|e| RenderError::PdfiumBindingFailed(format!("{:?}", e)))?;
    Ok(Pdfium::new(bindings))
}

/// Blocking implementation of document rendering.
fn render_document_blocking(
    pdf_path: &Path,
    out_dir: &Path,
    settings: RenderSettings,
    lib_path: Option<&Path>,
) -> Result<Vec<PageImage>, RenderError> {
    let pdfium = bind_pdfium(lib_path)?;

    let document = pdfium
        .load_pdf_from_file(pdf_path, None)
        .map_err(|e| RenderError::CorruptPdf {
            path: pdf_path.to_path_buf(),
            detail: format!("{:?}", e),
        })?;

    let pages = document.pages();
    let total_pages = pages.len() as usize;
    debug!("PDF loaded: {} pages", total_pages);

    let render_config = PdfRenderConfig::new().scale_page_by_factor(settings.scale());

    materialise_pages(out_dir, total_pages, settings, |ordinal| {
        let page = pages
            .get((ordinal - 1) as u16)
            .map_err(|e| RenderError::PageFailed {
                page: ordinal,
                detail: format!("{:?}", e),
            })?;
        let bitmap = page
            .render_with_config(&render_config)
            .map_err(|e| RenderError::PageFailed {
                page: ordinal,
                detail: format!("{:?}", e),
            })?;
        Ok(bitmap.as_image())
    })
}

/// Ensure `page_00001.jpg ..= page_{count}.jpg` exist in `out_dir`, calling
/// `render_page` only for the missing ones.
pub(crate) fn materialise_pages<F>(
    out_dir: &Path,
    page_count: usize,
    settings: RenderSettings,
    mut render_page: F,
) -> Result<Vec<PageImage>, RenderError>
where
    F: FnMut(usize) -> Result<DynamicImage, RenderError>,
{
    fs::create_dir_all(out_dir).map_err(|source| RenderError::Write {
        path: out_dir.to_path_buf(),
        source,
    })?;
    warn_on_stale_settings(out_dir, settings);

    let mut images = Vec::with_capacity(page_count);
    let mut rendered = 0usize;

    for ordinal in 1..=page_count {
        let path = page_path(out_dir, ordinal);
        if !is_present(&path) {
            let image = render_page(ordinal)?;
            write_jpeg(&image, &path, settings.quality, ordinal)?;
            debug!(
                "Rendered page {} → {}x{} px",
                ordinal,
                image.width(),
                image.height()
            );
            rendered += 1;
        }
        images.push(PageImage { ordinal, path });
    }

    // A partial re-render leaves older pages behind; their stamp stays.
    if rendered > 0 && (rendered == page_count || !out_dir.join(SETTINGS_STAMP).exists()) {
        stamp_settings(out_dir, settings);
    }
    info!(
        "{} pages ready in {} ({} rendered, {} reused)",
        page_count,
        out_dir.display(),
        rendered,
        page_count - rendered
    );
    Ok(images)
}

fn write_jpeg(
    image: &DynamicImage,
    path: &Path,
    quality: u8,
    ordinal: usize,
) -> Result<(), RenderError> {
    let write_err = |source| RenderError::Write {
        path: path.to_path_buf(),
        source,
    };
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(write_err)?;

    {
        let mut writer = BufWriter::new(tmp.as_file_mut());
        let encoder = JpegEncoder::new_with_quality(&mut writer, quality);
        DynamicImage::ImageRgb8(image.to_rgb8())
            .write_with_encoder(encoder)
            .map_err(|e| RenderError::PageFailed {
                page: ordinal,
                detail: format!("JPEG encoding failed: {}", e),
            })?;
        writer.flush().map_err(write_err)?;
    }

    tmp.persist(path).map_err(|e| write_err(e.error))?;
    Ok(())
}

fn warn_on_stale_settings(out_dir: &Path, settings: RenderSettings) {
    let Ok(raw) = fs::read(out_dir.join(SETTINGS_STAMP)) else {
        return;
    };
    match serde_json::from_slice::<RenderSettings>(&raw) {
        Ok(previous) if previous != settings => warn!(
            "{} was rendered at {} DPI / quality {}; reusing those pages with current settings {} DPI / quality {}",
            out_dir.display(),
            previous.dpi,
            previous.quality,
            settings.dpi,
            settings.quality
        ),
        Ok(_) => {}
        Err(e) => debug!("Ignoring unreadable render stamp in {}: {}", out_dir.display(), e),
    }
}

fn stamp_settings(out_dir: &Path, settings: RenderSettings) {
    let path = out_dir.join(SETTINGS_STAMP);
    let written = serde_json::to_vec(&settings)
        .map_err(|e| e.to_string())
        .and_then(|bytes| fs::write(&path, bytes).map_err(|e| e.to_string()));
    if let Err(e) = written {
        warn!("Could not write render stamp {}: {}", path.display(), e);
    }
}
