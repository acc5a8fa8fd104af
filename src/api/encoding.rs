//! Image encoding for the wire.
//!
//! Images cross the boundary as `data:image/png;base64,...` strings.

use crate::core::error::{EngineError, EngineResult};
use crate::core::types::ImageValue;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use image::{DynamicImage, ImageFormat};
use std::io::Cursor;

const PNG_DATA_URL_PREFIX: &str = "data:image/png;base64,";

/// Encode an image as PNG bytes.
pub fn encode_png(image: &DynamicImage) -> EngineResult<Vec<u8>> {
    let mut buffer = Cursor::new(Vec::new());
    image
        .write_to(&mut buffer, ImageFormat::Png)
        .map_err(|e| EngineError::Encoding(format!("failed to encode PNG: {}", e)))?;
    Ok(buffer.into_inner())
}

/// Encode an image as a PNG data URL.
pub fn encode_png_data_url(image: &ImageValue) -> EngineResult<String> {
    let bytes = encode_png(image.image())?;
    Ok(format!("{}{}", PNG_DATA_URL_PREFIX, BASE64.encode(bytes)))
}

/// Decode an image from a base64 data URL.
///
/// Any image media type the `image` crate can sniff is accepted, as is a
/// bare base64 payload without the `data:` header.
pub fn decode_data_url(text: &str) -> EngineResult<ImageValue> {
    let text = text.trim();
    let payload = match text.strip_prefix("data:") {
        Some(rest) => {
            let (header, payload) = rest
                .split_once(',')
                .ok_or_else(|| EngineError::Encoding("data URL has no payload".to_string()))?;
            if !header.ends_with(";base64") {
                return Err(EngineError::Encoding(format!(
                    "data URL '{}' is not base64-encoded",
                    header
                )));
            }
            payload
        }
        None => text,
    };

    let bytes = BASE64
        .decode(payload)
        .map_err(|e| EngineError::Encoding(format!("invalid base64: {}", e)))?;
    Ok(ImageValue::from_bytes(&bytes)?)
}
