//! PDF rasterisation: PDF bytes → ordered page rasters via pdfium.
//!
//! ## Why spawn_blocking?
//!
//! `pdfium-render` wraps the pdfium C++ library, which keeps thread-local
//! state and is CPU-bound. Rendering runs on the blocking pool so the Tokio
//! workers keep serving classifier and store I/O.
//!
//! ## Restartability
//!
//! Every call binds pdfium, loads the document from the byte slice, renders,
//! and drops everything. Nothing survives between calls, so a failed run can
//! simply be retried with the same bytes.

use crate::config::PipelineConfig;
use crate::error::Pdf2SlidesError;
use crate::naming::DocumentName;
use async_trait::async_trait;
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::io::Cursor;
use std::path::PathBuf;
use tracing::{debug, info};

/// One rendered page. Produced once per run and dropped after derivation.
#[derive(Clone)]
pub struct RasterPage {
    /// 1-based, contiguous, in source order.
    pub index: usize,
    pub width: u32,
    pub height: u32,
    /// Lossless PNG encoding of the page.
    pub bytes: Vec<u8>,
}

impl std::fmt::Debug for RasterPage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RasterPage")
            .field("index", &self.index)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.bytes.len())
            .finish()
    }
}

impl RasterPage {
    /// Encode an in-memory image as a raster page.
    pub fn from_image(index: usize, image: &DynamicImage) -> Result<Self, image::ImageError> {
        let mut bytes = Vec::new();
        image.write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)?;
        Ok(Self {
            index,
            width: image.width(),
            height: image.height(),
            bytes,
        })
    }
}

/// PDF bytes → page rasters.
///
/// Implementations must be pure functions of their input: same bytes, same
/// pages, no state retained between calls.
#[async_trait]
pub trait Rasterizer: Send + Sync {
    /// Render every page in source order.
    ///
    /// Fails with [`Pdf2SlidesError::Decode`] when the bytes are not a PDF
    /// or the document has zero pages.
    async fn rasterize(
        &self,
        document: &DocumentName,
        pdf: &[u8],
    ) -> Result<Vec<RasterPage>, Pdf2SlidesError>;

    /// Number of pages, without rendering.
    async fn page_count(&self, document: &DocumentName, pdf: &[u8]) -> Result<usize, Pdf2SlidesError>;
}

/// pdfium-backed [`Rasterizer`].
#[derive(Debug, Clone)]
pub struct PdfiumRasterizer {
    dpi: u32,
    max_pixels: u32,
    password: Option<String>,
    library_path: Option<PathBuf>,
}

impl PdfiumRasterizer {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            dpi: config.dpi,
            max_pixels: config.max_rendered_pixels,
            password: config.password.clone(),
            library_path: config
                .pdfium_library_path
                .clone()
                .or_else(|| std::env::var_os("PDFIUM_LIB_PATH").map(PathBuf::from)),
        }
    }
}

#[async_trait]
impl Rasterizer for PdfiumRasterizer {
    async fn rasterize(
        &self,
        document: &DocumentName,
        pdf: &[u8],
    ) -> Result<Vec<RasterPage>, Pdf2SlidesError> {
        check_magic(document, pdf)?;
        let this = self.clone();
        let document = document.clone();
        let bytes = pdf.to_vec();

        tokio::task::spawn_blocking(move || this.rasterize_blocking(&document, &bytes))
            .await
            .map_err(|e| Pdf2SlidesError::Internal(format!("Render task panicked: {}", e)))?
    }

    async fn page_count(&self, document: &DocumentName, pdf: &[u8]) -> Result<usize, Pdf2SlidesError> {
        check_magic(document, pdf)?;
        let this = self.clone();
        let document = document.clone();
        let bytes = pdf.to_vec();

        tokio::task::spawn_blocking(move || {
            let pdfium = this.bind()?;
            let doc = this.load(&pdfium, &document, &bytes)?;
            let count = doc.pages().len() as usize;
            Ok(count)
        })
        .await
        .map_err(|e| Pdf2SlidesError::Internal(format!("Page-count task panicked: {}", e)))?
    }
}

impl PdfiumRasterizer {
    fn bind(&self) -> Result<Pdfium, Pdf2SlidesError> {
        let bindings = match self.library_path {
            Some(ref p) if p.is_dir() => {
                Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(p))
            }
            Some(ref p) => Pdfium::bind_to_library(p),
            None => Pdfium::bind_to_system_library(),
        }
        .map_err(|e| Pdf2SlidesError::PdfiumBindingFailed(format!("{:?}", e)))?;
        Ok(Pdfium::new(bindings))
    }

    fn load<'a>(
        &self,
        pdfium: &'a Pdfium,
        document: &DocumentName,
        bytes: &'a [u8],
    ) -> Result<PdfDocument<'a>, Pdf2SlidesError> {
        let password = self.password.as_deref();
        pdfium.load_pdf_from_byte_slice(bytes, password).map_err(|e| {
            let err_str = format!("{:?}", e);
            if err_str.contains("Password") || err_str.contains("password") {
                if password.is_some() {
                    Pdf2SlidesError::WrongPassword {
                        document: document.to_string(),
                    }
                } else {
                    Pdf2SlidesError::PasswordRequired {
                        document: document.to_string(),
                    }
                }
            } else {
                Pdf2SlidesError::Decode {
                    document: document.to_string(),
                    detail: err_str,
                }
            }
        })
    }

    fn rasterize_blocking(
        &self,
        document: &DocumentName,
        bytes: &[u8],
    ) -> Result<Vec<RasterPage>, Pdf2SlidesError> {
        let pdfium = self.bind()?;
        let doc = self.load(&pdfium, document, bytes)?;
        let pages = doc.pages();
        let total = pages.len() as usize;
        if total == 0 {
            return Err(Pdf2SlidesError::Decode {
                document: document.to_string(),
                detail: "document has zero pages".into(),
            });
        }
        info!("PDF '{}' loaded: {} pages", document, total);

        // DPI sets the scale; the pixel cap bounds it for oversized pages.
        let render_config = PdfRenderConfig::new()
            .scale_page_by_factor(self.dpi as f32 / 72.0)
            .set_maximum_width(self.max_pixels as i32)
            .set_maximum_height(self.max_pixels as i32);

        let mut rasters = Vec::with_capacity(total);
        for (i, page) in pages.iter().enumerate() {
            let index = i + 1;
            let decode_err = |detail: String| Pdf2SlidesError::Decode {
                document: document.to_string(),
                detail: format!("page {}: {}", index, detail),
            };
            let bitmap = page
                .render_with_config(&render_config)
                .map_err(|e| decode_err(format!("{:?}", e)))?;
            let image = bitmap.as_image();
            debug!("Rendered page {} → {}x{} px", index, image.width(), image.height());

            let raster = RasterPage::from_image(index, &image).map_err(|e| decode_err(e.to_string()))?;
            rasters.push(raster);
        }

        Ok(rasters)
    }
}

/// Reject inputs that do not start with the `%PDF` magic bytes.
pub fn check_magic(document: &DocumentName, pdf: &[u8]) -> Result<(), Pdf2SlidesError> {
    if pdf.len() < 4 || &pdf[..4] != b"%PDF" {
        return Err(Pdf2SlidesError::Decode {
            document: document.to_string(),
            detail: format!(
                "missing %PDF header (first bytes: {:?})",
                &pdf[..pdf.len().min(4)]
            ),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    #[test]
    fn raster_page_from_image_records_dimensions() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(12, 8, Rgba([0, 0, 255, 255])));
        let page = RasterPage::from_image(1, &img).unwrap();
        assert_eq!((page.width, page.height), (12, 8));
        assert_eq!(&page.bytes[1..4], b"PNG");
    }

    #[test]
    fn magic_check_rejects_non_pdf() {
        let doc = DocumentName::new("deck").unwrap();
        assert!(check_magic(&doc, b"%PDF-1.7\n").is_ok());
        let err = check_magic(&doc, b"PK\x03\x04").unwrap_err();
        assert!(matches!(err, Pdf2SlidesError::Decode { .. }));
        assert!(check_magic(&doc, b"").is_err());
    }

    #[tokio::test]
    async fn rasterize_rejects_garbage_before_binding_pdfium() {
        let r = PdfiumRasterizer::new(&PipelineConfig::default());
        let doc = DocumentName::new("deck").unwrap();
        let err = r.rasterize(&doc, b"not a pdf").await.unwrap_err();
        assert!(matches!(err, Pdf2SlidesError::Decode { .. }));
    }
}
