//! Visual analyzer - renders a PDF to one JPEG per page and produces an
//! ordered list of per-slide descriptions from the vision model.
//!
//! Pages are processed strictly in page order. A page whose vision call
//! fails after retries yields an empty description and increments the
//! session's failed-page count; the pipeline continues.

use sha2::{Digest, Sha256};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::sleep;

use super::result::SlideDescription;
use super::session::DeckSession;
use crate::services::model_runtime::{ModelRuntime, RuntimeOptions};
use crate::services::storage::SharedStorage;
use crate::utils::{ApiError, ApiResult};

/// Rasterization scale over the 72-point PDF grid: 2.0 = 144 DPI.
/// Fixed so re-renders of the same PDF are deterministic.
pub const RASTER_SCALE: f32 = 2.0;

const JPEG_QUALITY: u8 = 85;

/// Per-slide vision call timeout.
const SLIDE_TIMEOUT: Duration = Duration::from_secs(120);

/// Retries after the first failure, with exponential backoff from 1s.
const SLIDE_RETRIES: u32 = 2;

/// SHA-256 hex of a prompt; the cache key component that detects live edits.
pub fn prompt_hash(prompt: &str) -> String {
    let digest = Sha256::digest(prompt.as_bytes());
    format!("{:x}", digest)
}

/// Seam over PDF rasterization so tests can run without a pdfium library.
pub trait PdfRenderer: Send + Sync {
    /// Render every page of `pdf_path` into `slide_{N}.jpg` (1-indexed,
    /// page order) under `output_dir`. Returns the written paths in order.
    fn render_pages(&self, pdf_path: &Path, output_dir: &Path) -> ApiResult<Vec<PathBuf>>;
}

/// Production renderer over the system pdfium library.
pub struct PdfiumRenderer {
    storage: SharedStorage,
}

impl PdfiumRenderer {
    pub fn new(storage: SharedStorage) -> Self {
        Self { storage }
    }
}

impl PdfRenderer for PdfiumRenderer {
    fn render_pages(&self, pdf_path: &Path, output_dir: &Path) -> ApiResult<Vec<PathBuf>> {
        use pdfium_render::prelude::*;

        let bindings = Pdfium::bind_to_system_library()
            .map_err(|e| ApiError::internal(format!("pdfium unavailable: {}", e)))?;
        let pdfium = Pdfium::new(bindings);

        let document = pdfium
            .load_pdf_from_file(pdf_path, None)
            .map_err(|e| ApiError::invalid_input(format!("cannot open PDF {:?}: {}", pdf_path, e)))?;

        let config = PdfRenderConfig::new().scale_page_by_factor(RASTER_SCALE);

        let mut paths = Vec::new();
        for (index, page) in document.pages().iter().enumerate() {
            let page_number = index + 1;
            let bitmap = page
                .render_with_config(&config)
                .map_err(|e| ApiError::internal(format!("render page {}: {}", page_number, e)))?;

            let width = bitmap.width() as u32;
            let height = bitmap.height() as u32;
            let rgba = image::RgbaImage::from_raw(width, height, bitmap.as_rgba_bytes())
                .ok_or_else(|| {
                    ApiError::internal(format!("bitmap size mismatch on page {}", page_number))
                })?;
            let rgb = image::DynamicImage::ImageRgba8(rgba).into_rgb8();

            let mut jpeg = Vec::new();
            let mut cursor = Cursor::new(&mut jpeg);
            let mut encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(
                &mut cursor,
                JPEG_QUALITY,
            );
            encoder
                .encode_image(&rgb)
                .map_err(|e| ApiError::internal(format!("encode page {}: {}", page_number, e)))?;

            let path = output_dir.join(format!("slide_{}.jpg", page_number));
            self.storage.write_atomic(&path, &jpeg)?;
            paths.push(path);
        }

        Ok(paths)
    }
}

/// Runs the visual stage of the pipeline for one deck.
pub struct VisualAnalyzer<'a> {
    runtime: &'a dyn ModelRuntime,
    renderer: &'a dyn PdfRenderer,
    storage: &'a SharedStorage,
}

impl<'a> VisualAnalyzer<'a> {
    pub fn new(
        runtime: &'a dyn ModelRuntime,
        renderer: &'a dyn PdfRenderer,
        storage: &'a SharedStorage,
    ) -> Self {
        Self { runtime, renderer, storage }
    }

    /// Render the deck's PDF and describe each slide in page order.
    ///
    /// Populates `session.visual_analysis_results` and `session.failed_pages`.
    /// Cancellation is honored between pages; the cancelled deck keeps the
    /// slides described so far and the caller decides how to fail it.
    pub async fn analyze(
        &self,
        session: &mut DeckSession,
        pdf_path: &Path,
        vision_model: &str,
        image_prompt: &str,
    ) -> ApiResult<()> {
        let slide_dir = self.storage.slide_dir(&session.company_id, &session.deck_slug)?;
        let slide_paths = self.renderer.render_pages(pdf_path, &slide_dir)?;

        tracing::info!(
            "Deck {}: rendered {} slides to {:?}",
            session.deck_id,
            slide_paths.len(),
            slide_dir
        );

        for (index, slide_path) in slide_paths.iter().enumerate() {
            let page_number = (index + 1) as i64;

            if session.cancelled() {
                tracing::warn!(
                    "Deck {}: cancelled before page {}",
                    session.deck_id,
                    page_number
                );
                return Err(ApiError::conflict("deck processing cancelled"));
            }

            let image_bytes = std::fs::read(slide_path)
                .map_err(|e| ApiError::storage_error(format!("read {:?}: {}", slide_path, e)))?;

            let description = self
                .describe_slide(session.deck_id, page_number, vision_model, image_prompt, &image_bytes)
                .await;

            let description = match description {
                Some(text) => text,
                None => {
                    session.failed_pages += 1;
                    String::new()
                },
            };

            session.visual_analysis_results.push(SlideDescription {
                page_number,
                slide_image_path: SharedStorage::slide_relative_path(
                    &session.deck_slug,
                    page_number as usize,
                ),
                description,
            });
        }

        Ok(())
    }

    /// One vision call with up to two retries on retryable errors.
    /// Returns None when the page ultimately fails.
    async fn describe_slide(
        &self,
        deck_id: i64,
        page_number: i64,
        vision_model: &str,
        image_prompt: &str,
        image_bytes: &[u8],
    ) -> Option<String> {
        let options = RuntimeOptions::default().with_timeout(SLIDE_TIMEOUT);

        for attempt in 0..=SLIDE_RETRIES {
            match self
                .runtime
                .analyze_image(vision_model, image_prompt, image_bytes, &options)
                .await
            {
                Ok(text) => return Some(text),
                Err(e) if e.is_retryable() && attempt < SLIDE_RETRIES => {
                    let backoff = Duration::from_secs(1 << attempt);
                    tracing::warn!(
                        "Deck {} page {}: vision call failed ({}), retrying in {:?}",
                        deck_id,
                        page_number,
                        e,
                        backoff
                    );
                    sleep(backoff).await;
                },
                Err(e) => {
                    tracing::error!(
                        "Deck {} page {}: vision call failed permanently: {}",
                        deck_id,
                        page_number,
                        e
                    );
                    return None;
                },
            }
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::model_runtime::{ModelInfo, RuntimeError};
    use async_trait::async_trait;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    /// Renderer stub that writes tiny placeholder JPEGs.
    pub struct StubRenderer {
        pub pages: usize,
        storage: SharedStorage,
    }

    impl StubRenderer {
        pub fn new(pages: usize, storage: SharedStorage) -> Self {
            Self { pages, storage }
        }
    }

    impl PdfRenderer for StubRenderer {
        fn render_pages(&self, _pdf_path: &Path, output_dir: &Path) -> ApiResult<Vec<PathBuf>> {
            let mut paths = Vec::new();
            for n in 1..=self.pages {
                let path = output_dir.join(format!("slide_{}.jpg", n));
                self.storage.write_atomic(&path, format!("jpeg-{}", n).as_bytes())?;
                paths.push(path);
            }
            Ok(paths)
        }
    }

    /// Vision stub: describes each image, optionally timing out on one page.
    struct StubVision {
        fail_page: Option<i64>,
        calls: AtomicU32,
    }

    #[async_trait]
    impl ModelRuntime for StubVision {
        async fn list_models(&self) -> Result<Vec<ModelInfo>, RuntimeError> {
            Ok(vec![])
        }
        async fn pull_model(&self, _name: &str) -> Result<(), RuntimeError> {
            Ok(())
        }
        async fn delete_model(&self, _name: &str) -> Result<(), RuntimeError> {
            Ok(())
        }
        async fn analyze_image(
            &self,
            _model: &str,
            _prompt: &str,
            image_bytes: &[u8],
            _options: &RuntimeOptions,
        ) -> Result<String, RuntimeError> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            let text = String::from_utf8_lossy(image_bytes).to_string();
            let page: i64 = text.trim_start_matches("jpeg-").parse().unwrap_or(0);
            if Some(page) == self.fail_page {
                return Err(RuntimeError::ModelTimeout(120));
            }
            Ok(format!("Description of page {}", page))
        }
        async fn complete(
            &self,
            _model: &str,
            _prompt: &str,
            _options: &RuntimeOptions,
        ) -> Result<String, RuntimeError> {
            Ok(String::new())
        }
    }

    fn session(deck_id: i64) -> DeckSession {
        DeckSession::new(deck_id, "ismaning", "DeckA.pdf", Arc::new(AtomicBool::new(false)))
    }

    #[tokio::test]
    async fn all_pages_described_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let storage = SharedStorage::new(dir.path());
        let renderer = StubRenderer::new(3, storage.clone());
        let vision = StubVision { fail_page: None, calls: AtomicU32::new(0) };
        let analyzer = VisualAnalyzer::new(&vision, &renderer, &storage);

        let mut session = session(1);
        analyzer
            .analyze(&mut session, Path::new("unused.pdf"), "gemma3:12b", "describe")
            .await
            .unwrap();

        assert_eq!(session.visual_analysis_results.len(), 3);
        assert_eq!(session.failed_pages, 0);
        for (i, slide) in session.visual_analysis_results.iter().enumerate() {
            let n = (i + 1) as i64;
            assert_eq!(slide.page_number, n);
            assert_eq!(slide.slide_image_path, format!("analysis/DeckA/slide_{}.jpg", n));
            assert_eq!(slide.description, format!("Description of page {}", n));
        }

        // Slide files exist under the project directory.
        for n in 1..=3 {
            assert!(storage.slide_path("ismaning", "DeckA", n).unwrap().exists());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn failed_page_yields_empty_description_and_continues() {
        let dir = tempfile::tempdir().unwrap();
        let storage = SharedStorage::new(dir.path());
        let renderer = StubRenderer::new(5, storage.clone());
        let vision = StubVision { fail_page: Some(3), calls: AtomicU32::new(0) };
        let analyzer = VisualAnalyzer::new(&vision, &renderer, &storage);

        let mut session = session(2);
        analyzer
            .analyze(&mut session, Path::new("unused.pdf"), "gemma3:12b", "describe")
            .await
            .unwrap();

        assert_eq!(session.visual_analysis_results.len(), 5);
        assert_eq!(session.visual_analysis_results[2].description, "");
        assert_eq!(session.failed_pages, 1);
        assert_eq!(session.visual_analysis_results[4].description, "Description of page 5");

        // Page 3 was attempted three times (initial call + two retries).
        assert_eq!(vision.calls.load(Ordering::Relaxed), 4 + 3);
    }

    #[test]
    fn prompt_hash_is_stable_and_distinct() {
        let a = prompt_hash("describe the slide");
        let b = prompt_hash("describe the slide");
        let c = prompt_hash("describe the slide differently");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
    }
}
