//! Draw detection boxes and their labels onto streamed frames.

use edge_vision_common::results::{BoundingBox, ResultRecord, Snapshot};
use image::codecs::jpeg::JpegEncoder;
use image::{Rgb, RgbImage};

use crate::preprocess::decode_jpeg;
use crate::InferenceError;

const BOX_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
const BOX_THICKNESS: i32 = 2;
const LABEL_BACKGROUND: Rgb<u8> = Rgb([24, 24, 24]);

const GLYPH_WIDTH: i32 = 5;
const GLYPH_HEIGHT: i32 = 7;
/// Horizontal pitch of one character, glyph plus one column of spacing.
const GLYPH_ADVANCE: i32 = GLYPH_WIDTH + 1;
/// Label band height: one row of padding above and below the glyphs.
const LABEL_HEIGHT: i32 = GLYPH_HEIGHT + 2;

/// Draw every boxed record of `snapshot` onto `jpeg` and re-encode it.
///
/// Returns `None` when the snapshot has nothing to draw, so the caller can
/// stream the original bytes untouched.
pub fn annotate(
    jpeg: &[u8],
    snapshot: &Snapshot,
    quality: u8,
) -> Result<Option<Vec<u8>>, InferenceError> {
    if snapshot.boxed().next().is_none() {
        return Ok(None);
    }

    let mut image = decode_jpeg(jpeg)?.to_rgb8();
    for (record, bbox) in snapshot.boxed() {
        draw_box(&mut image, bbox);
        draw_label(&mut image, record, bbox);
    }

    let mut out = Vec::with_capacity(jpeg.len());
    JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100))
        .encode_image(&image)
        .map_err(|e| InferenceError::Encode(e.to_string()))?;
    Ok(Some(out))
}

fn draw_box(image: &mut RgbImage, bbox: &BoundingBox) {
    let (left, top) = (bbox.left.round() as i32, bbox.top.round() as i32);
    let (right, bottom) = (bbox.right.round() as i32, bbox.bottom.round() as i32);
    for inset in 0..BOX_THICKNESS {
        draw_rectangle(
            image,
            left + inset,
            top + inset,
            right - inset,
            bottom - inset,
        );
    }
}

fn draw_rectangle(image: &mut RgbImage, left: i32, top: i32, right: i32, bottom: i32) {
    let width = image.width() as i32;
    let height = image.height() as i32;
    if width == 0 || height == 0 || right < left || bottom < top {
        return;
    }
    let left = left.clamp(0, width - 1);
    let right = right.clamp(0, width - 1);
    let top = top.clamp(0, height - 1);
    let bottom = bottom.clamp(0, height - 1);

    for x in left..=right {
        image.put_pixel(x as u32, top as u32, BOX_COLOR);
        image.put_pixel(x as u32, bottom as u32, BOX_COLOR);
    }
    for y in top..=bottom {
        image.put_pixel(left as u32, y as u32, BOX_COLOR);
        image.put_pixel(right as u32, y as u32, BOX_COLOR);
    }
}

/// Caption `<label>: <score>` on a dark band sitting on the box's top edge,
/// or just inside the box when there is no room above it.
fn draw_label(image: &mut RgbImage, record: &ResultRecord, bbox: &BoundingBox) {
    let text = format!("{}: {:.2}", record.label, record.confidence);
    let left = bbox.left.round() as i32;
    let top = bbox.top.round() as i32;
    let band_top = if top >= LABEL_HEIGHT { top - LABEL_HEIGHT } else { top.max(0) };
    let band_width = text.chars().count() as i32 * GLYPH_ADVANCE + 1;

    fill_rect(image, left, band_top, band_width, LABEL_HEIGHT, LABEL_BACKGROUND);
    draw_text(image, left + 1, band_top + 1, &text, BOX_COLOR);
}

fn fill_rect(image: &mut RgbImage, x: i32, y: i32, width: i32, height: i32, color: Rgb<u8>) {
    let (w, h) = (image.width() as i32, image.height() as i32);
    for py in y.max(0)..(y + height).min(h) {
        for px in x.max(0)..(x + width).min(w) {
            image.put_pixel(px as u32, py as u32, color);
        }
    }
}

/// Render `text` in the built-in 5x7 font with its top-left corner at
/// `(x, y)`. Letters are drawn uppercase; pixels off the image are dropped.
fn draw_text(image: &mut RgbImage, mut x: i32, y: i32, text: &str, color: Rgb<u8>) {
    let (w, h) = (image.width() as i32, image.height() as i32);
    for ch in text.chars().flat_map(char::to_uppercase) {
        if x >= w {
            break;
        }
        for (row, bits) in glyph(ch).iter().enumerate() {
            let py = y + row as i32;
            if py < 0 || py >= h {
                continue;
            }
            for col in 0..GLYPH_WIDTH {
                let px = x + col;
                if (bits >> (GLYPH_WIDTH - 1 - col)) & 1 == 1 && px >= 0 && px < w {
                    image.put_pixel(px as u32, py as u32, color);
                }
            }
        }
        x += GLYPH_ADVANCE;
    }
}

/// Row bitmaps, most significant of the low five bits is the left column.
/// Characters without a glyph render as `?`.
fn glyph(ch: char) -> [u8; 7] {
    match ch {
        'A' => [0x0E, 0x11, 0x11, 0x1F, 0x11, 0x11, 0x11],
        'B' => [0x1E, 0x11, 0x11, 0x1E, 0x11, 0x11, 0x1E],
        'C' => [0x0E, 0x11, 0x10, 0x10, 0x10, 0x11, 0x0E],
        'D' => [0x1E, 0x11, 0x11, 0x11, 0x11, 0x11, 0x1E],
        'E' => [0x1F, 0x10, 0x10, 0x1E, 0x10, 0x10, 0x1F],
        'F' => [0x1F, 0x10, 0x10, 0x1E, 0x10, 0x10, 0x10],
        'G' => [0x0E, 0x11, 0x10, 0x17, 0x11, 0x11, 0x0F],
        'H' => [0x11, 0x11, 0x11, 0x1F, 0x11, 0x11, 0x11],
        'I' => [0x0E, 0x04, 0x04, 0x04, 0x04, 0x04, 0x0E],
        'J' => [0x07, 0x02, 0x02, 0x02, 0x02, 0x12, 0x0C],
        'K' => [0x11, 0x12, 0x14, 0x18, 0x14, 0x12, 0x11],
        'L' => [0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x1F],
        'M' => [0x11, 0x1B, 0x15, 0x15, 0x11, 0x11, 0x11],
        'N' => [0x11, 0x11, 0x19, 0x15, 0x13, 0x11, 0x11],
        'O' => [0x0E, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0E],
        'P' => [0x1E, 0x11, 0x11, 0x1E, 0x10, 0x10, 0x10],
        'Q' => [0x0E, 0x11, 0x11, 0x11, 0x15, 0x12, 0x0D],
        'R' => [0x1E, 0x11, 0x11, 0x1E, 0x14, 0x12, 0x11],
        'S' => [0x0F, 0x10, 0x10, 0x0E, 0x01, 0x01, 0x1E],
        'T' => [0x1F, 0x04, 0x04, 0x04, 0x04, 0x04, 0x04],
        'U' => [0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0E],
        'V' => [0x11, 0x11, 0x11, 0x11, 0x11, 0x0A, 0x04],
        'W' => [0x11, 0x11, 0x11, 0x15, 0x15, 0x15, 0x0A],
        'X' => [0x11, 0x11, 0x0A, 0x04, 0x0A, 0x11, 0x11],
        'Y' => [0x11, 0x11, 0x0A, 0x04, 0x04, 0x04, 0x04],
        'Z' => [0x1F, 0x01, 0x02, 0x04, 0x08, 0x10, 0x1F],
        '0' => [0x0E, 0x11, 0x13, 0x15, 0x19, 0x11, 0x0E],
        '1' => [0x04, 0x0C, 0x04, 0x04, 0x04, 0x04, 0x0E],
        '2' => [0x0E, 0x11, 0x01, 0x02, 0x04, 0x08, 0x1F],
        '3' => [0x1E, 0x01, 0x01, 0x0E, 0x01, 0x01, 0x1E],
        '4' => [0x02, 0x06, 0x0A, 0x12, 0x1F, 0x02, 0x02],
        '5' => [0x1F, 0x10, 0x1E, 0x01, 0x01, 0x11, 0x0E],
        '6' => [0x06, 0x08, 0x10, 0x1E, 0x11, 0x11, 0x0E],
        '7' => [0x1F, 0x01, 0x02, 0x04, 0x08, 0x08, 0x08],
        '8' => [0x0E, 0x11, 0x11, 0x0E, 0x11, 0x11, 0x0E],
        '9' => [0x0E, 0x11, 0x11, 0x0F, 0x01, 0x02, 0x0C],
        ':' => [0x00, 0x0C, 0x0C, 0x00, 0x0C, 0x0C, 0x00],
        '.' => [0x00, 0x00, 0x00, 0x00, 0x00, 0x0C, 0x0C],
        '-' => [0x00, 0x00, 0x00, 0x1F, 0x00, 0x00, 0x00],
        '_' => [0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x1F],
        ' ' => [0x00; 7],
        _ => [0x0E, 0x11, 0x01, 0x02, 0x04, 0x00, 0x04],
    }
}
