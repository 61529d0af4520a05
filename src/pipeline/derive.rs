//! Artifact derivation: one page raster → base JPEG plus fixed-size variants.
//!
//! Variants are resized to exactly their configured size (`resize_exact`),
//! never cropped, so a landscape slide and a portrait handout produce
//! thumbnails of identical dimensions. Filenames come from
//! [`DocumentName`] and are identical for every derivation of the same page.

use crate::config::{PipelineConfig, VariantSize};
use crate::error::ArtifactError;
use crate::model::SizeVariant;
use crate::naming::DocumentName;
use crate::pipeline::render::RasterPage;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::DynamicImage;
use tracing::debug;

/// Name of the small fixed-size variant.
pub const THUMBNAIL: &str = "thumbnail";
/// Name of the large fixed-size variant.
pub const CARD: &str = "card";

pub const JPEG_MIME: &str = "image/jpeg";

/// Encoded variant plus the metadata persisted for it.
#[derive(Debug, Clone)]
pub struct DerivedVariant {
    pub meta: SizeVariant,
    pub bytes: Vec<u8>,
}

/// Everything persisted and uploaded for one page image.
#[derive(Debug, Clone)]
pub struct DerivedArtifact {
    pub page: usize,
    /// Canonical filename, the dedup key.
    pub filename: String,
    /// Object-store key of the base image.
    pub object_key: String,
    pub width: u32,
    pub height: u32,
    pub mime_type: String,
    pub bytes: Vec<u8>,
    /// Exactly two entries: thumbnail, then card.
    pub variants: Vec<DerivedVariant>,
}

impl DerivedArtifact {
    pub fn filesize(&self) -> u64 {
        self.bytes.len() as u64
    }

    pub fn variant_metadata(&self) -> Vec<SizeVariant> {
        self.variants.iter().map(|v| v.meta.clone()).collect()
    }
}

/// Derives [`DerivedArtifact`]s from rasters.
#[derive(Debug, Clone)]
pub struct ArtifactDeriver {
    thumbnail: VariantSize,
    card: VariantSize,
    quality: u8,
}

impl ArtifactDeriver {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            thumbnail: config.thumbnail_size,
            card: config.card_size,
            quality: config.jpeg_quality,
        }
    }

    /// Decode the raster and produce the base image and both variants.
    ///
    /// CPU-bound; the orchestrator calls it from `spawn_blocking`.
    pub fn derive(
        &self,
        document: &DocumentName,
        raster: &RasterPage,
    ) -> Result<DerivedArtifact, ArtifactError> {
        let img = image::load_from_memory(&raster.bytes)
            .map_err(|e| ArtifactError::Decode(e.to_string()))?;
        if img.width() == 0 || img.height() == 0 {
            return Err(ArtifactError::EmptyRaster);
        }

        let page = raster.index;
        let bytes = encode_jpeg(&img, self.quality)?;

        let mut variants = Vec::with_capacity(2);
        for (name, size) in [(THUMBNAIL, self.thumbnail), (CARD, self.card)] {
            let resized = img.resize_exact(size.width, size.height, FilterType::Lanczos3);
            let variant_bytes = encode_jpeg(&resized, self.quality)?;
            variants.push(DerivedVariant {
                meta: SizeVariant {
                    name: name.to_string(),
                    width: size.width,
                    height: size.height,
                    filename: document.variant_filename(page, name),
                    filesize: variant_bytes.len() as u64,
                    mime_type: JPEG_MIME.to_string(),
                },
                bytes: variant_bytes,
            });
        }

        debug!(
            "Derived page {}: {}x{} px, {} bytes, {} variants",
            page,
            img.width(),
            img.height(),
            bytes.len(),
            variants.len()
        );

        Ok(DerivedArtifact {
            page,
            filename: document.canonical_filename(page),
            object_key: document.page_object_key(page),
            width: img.width(),
            height: img.height(),
            mime_type: JPEG_MIME.to_string(),
            bytes,
            variants,
        })
    }
}

fn encode_jpeg(img: &DynamicImage, quality: u8) -> Result<Vec<u8>, ArtifactError> {
    let rgb = img.to_rgb8();
    let mut buf = Vec::new();
    JpegEncoder::new_with_quality(&mut buf, quality)
        .encode_image(&rgb)
        .map_err(|e| ArtifactError::Encode(e.to_string()))?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    fn raster(index: usize, w: u32, h: u32) -> RasterPage {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(w, h, Rgba([200, 30, 30, 255])));
        RasterPage::from_image(index, &img).unwrap()
    }

    fn deriver() -> ArtifactDeriver {
        ArtifactDeriver::new(&PipelineConfig::default())
    }

    #[test]
    fn derives_base_and_two_fixed_variants() {
        let doc = DocumentName::new("deck").unwrap();
        let a = deriver().derive(&doc, &raster(2, 160, 90)).unwrap();

        assert_eq!(a.filename, "deck_page_2 (1).jpg");
        assert_eq!(a.object_key, "deck/deck_page_2.jpg");
        assert_eq!((a.width, a.height), (160, 90));
        assert_eq!(a.mime_type, "image/jpeg");
        assert_eq!(a.filesize(), a.bytes.len() as u64);

        let names: Vec<_> = a.variants.iter().map(|v| v.meta.name.as_str()).collect();
        assert_eq!(names, vec!["thumbnail", "card"]);
        assert_eq!(a.variants[0].meta.filename, "deck_page_2 (1)-thumbnail.jpg");
        assert_eq!(a.variants[1].meta.filename, "deck_page_2 (1)-card.jpg");
    }

    #[test]
    fn variants_ignore_source_aspect_ratio() {
        let doc = DocumentName::new("deck").unwrap();
        for (w, h) in [(300, 40), (40, 300)] {
            let a = deriver().derive(&doc, &raster(1, w, h)).unwrap();
            let thumb = image::load_from_memory(&a.variants[0].bytes).unwrap();
            let card = image::load_from_memory(&a.variants[1].bytes).unwrap();
            assert_eq!((thumb.width(), thumb.height()), (400, 300));
            assert_eq!((card.width(), card.height()), (768, 1024));
        }
    }

    #[test]
    fn repeated_derivation_names_identically() {
        let doc = DocumentName::new("deck").unwrap();
        let r = raster(5, 64, 48);
        let a = deriver().derive(&doc, &r).unwrap();
        let b = deriver().derive(&doc, &r).unwrap();
        assert_eq!(a.filename, b.filename);
        assert_eq!(a.variant_metadata(), b.variant_metadata());
    }

    #[test]
    fn unreadable_raster_is_an_artifact_error() {
        let doc = DocumentName::new("deck").unwrap();
        let bad = RasterPage {
            index: 1,
            width: 10,
            height: 10,
            bytes: b"definitely not an image".to_vec(),
        };
        assert!(matches!(
            deriver().derive(&doc, &bad),
            Err(ArtifactError::Decode(_))
        ));
    }
}
