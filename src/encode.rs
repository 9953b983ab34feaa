use std::io::Cursor;

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use image::{DynamicImage, ImageFormat};

/// Encode an image as PNG and return the bytes as standard base64 text.
///
/// `None` passes through as `Ok(None)`: a missing image is not an error.
pub fn encode_png_base64(img: Option<&DynamicImage>) -> Result<Option<String>> {
    let Some(img) = img else {
        return Ok(None);
    };

    let mut png = Vec::new();
    img.write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
        .context("Failed to encode image as PNG")?;

    Ok(Some(STANDARD.encode(&png)))
}
