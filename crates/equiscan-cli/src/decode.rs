//! Grayscale conversion and QR decoding with rqrr.

/// Convert packed RGB to luma with the standard weights.
pub fn grayscale(rgb: &[u8]) -> Vec<u8> {
    rgb.chunks_exact(3)
        .map(|px| ((px[0] as u32 * 299 + px[1] as u32 * 587 + px[2] as u32 * 114) / 1000) as u8)
        .collect()
}

/// A grayscale frame region.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrayFrame {
    pub pixels: Vec<u8>,
    pub width: usize,
    pub height: usize,
}

/// Cut a centered square of `side` pixels out of `src`, clamped to the frame.
pub fn crop_center(src: &[u8], width: usize, height: usize, side: usize) -> GrayFrame {
    let side = side.min(width).min(height);
    if side == 0 {
        return GrayFrame {
            pixels: Vec::new(),
            width: 0,
            height: 0,
        };
    }

    let x0 = (width - side) / 2;
    let y0 = (height - side) / 2;
    let mut pixels = Vec::with_capacity(side * side);
    for y in y0..y0 + side {
        let row = y * width;
        pixels.extend(
            (x0..x0 + side).map(|x| src.get(row + x).copied().unwrap_or(0)),
        );
    }

    GrayFrame {
        pixels,
        width: side,
        height: side,
    }
}

/// Scale a detection box measured in container pixels to frame pixels.
pub fn box_in_frame(box_side: u32, container_width: u32, frame_width: usize) -> usize {
    if container_width == 0 {
        return frame_width;
    }
    (box_side as u64 * frame_width as u64 / container_width as u64) as usize
}

/// Every payload rqrr can read from a grayscale image.
pub fn decode_grayscale(pixels: &[u8], width: usize, height: usize) -> Vec<String> {
    if width == 0 || height == 0 {
        return Vec::new();
    }

    let mut prepared = rqrr::PreparedImage::prepare_from_greyscale(width, height, |x, y| {
        pixels.get(y * width + x).copied().unwrap_or(0)
    });

    let grids = prepared.detect_grids();
    if !grids.is_empty() {
        tracing::trace!("Detected {} QR grid(s) in {}x{} region", grids.len(), width, height);
    }

    grids
        .iter()
        .filter_map(|grid| match grid.decode() {
            Ok((meta, content)) => {
                tracing::debug!(
                    "QR decoded: {} bytes, ECC={:?}, version={:?}",
                    content.len(),
                    meta.ecc_level,
                    meta.version
                );
                Some(content)
            }
            Err(e) => {
                tracing::trace!("QR grid not decodable: {:?}", e);
                None
            }
        })
        .collect()
}

/// Decode QR payloads from an encoded image (PNG or JPEG).
pub fn decode_qr_from_image(image_data: &[u8]) -> Result<Vec<String>, String> {
    let img =
        image::load_from_memory(image_data).map_err(|e| format!("Failed to load image: {}", e))?;

    let gray = img.to_luma8();
    let width = gray.width() as usize;
    let height = gray.height() as usize;

    let found = decode_grayscale(gray.as_raw(), width, height);
    if found.is_empty() {
        return Err("No QR code found in image".to_string());
    }
    Ok(found)
}
