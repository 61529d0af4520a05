//! Raster → base64 `ImageData` for the vision classifier.
//!
//! The raster is already PNG, so this is a straight base64 wrap. `detail:
//! "high"` keeps small slide text legible to GPT-4-class models.

use crate::pipeline::render::RasterPage;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use tracing::debug;

/// Wrap a page raster as a multimodal image attachment.
pub fn encode_page(page: &RasterPage) -> ImageData {
    let b64 = STANDARD.encode(&page.bytes);
    debug!("Encoded page {} → {} bytes base64", page.index, b64.len());
    ImageData::new(b64, "image/png").with_detail("high")
}
