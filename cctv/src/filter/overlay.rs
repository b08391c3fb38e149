use image::{Rgb, RgbImage};

const GLYPH_WIDTH: u32 = 5;
const GLYPH_HEIGHT: u32 = 7;
const SCALE: u32 = 2;
const ADVANCE: u32 = (GLYPH_WIDTH + 1) * SCALE;
const MARGIN: u32 = 10;
const COLOR: Rgb<u8> = Rgb([0, 255, 0]);

/// Draw `text` in the bottom-left corner, baseline `MARGIN` pixels above the
/// bottom edge. Only digits, `-`, `:` and space have glyphs; anything else
/// renders as a blank cell. Pixels outside the image are skipped.
pub fn stamp_timestamp(image: &mut RgbImage, text: &str) {
    let (width, height) = image.dimensions();
    let glyph_px = GLYPH_HEIGHT * SCALE;
    let Some(top) = height.checked_sub(MARGIN + glyph_px) else {
        return;
    };

    for (i, ch) in text.chars().enumerate() {
        let left = MARGIN + i as u32 * ADVANCE;
        if left >= width {
            break;
        }
        let rows = glyph(ch);
        for (row, bits) in rows.iter().enumerate() {
            for col in 0..GLYPH_WIDTH {
                if bits & (0x10 >> col) == 0 {
                    continue;
                }
                fill_cell(image, left + col * SCALE, top + row as u32 * SCALE);
            }
        }
    }
}

fn fill_cell(image: &mut RgbImage, x0: u32, y0: u32) {
    for y in y0..y0 + SCALE {
        for x in x0..x0 + SCALE {
            if x < image.width() && y < image.height() {
                image.put_pixel(x, y, COLOR);
            }
        }
    }
}

/// 5x7 bitmap rows; bit 4 is the leftmost column.
fn glyph(ch: char) -> [u8; 7] {
    match ch {
        '0' => [0x0E, 0x11, 0x13, 0x15, 0x19, 0x11, 0x0E],
        '1' => [0x04, 0x0C, 0x04, 0x04, 0x04, 0x04, 0x0E],
        '2' => [0x0E, 0x11, 0x01, 0x02, 0x04, 0x08, 0x1F],
        '3' => [0x1F, 0x02, 0x04, 0x02, 0x01, 0x11, 0x0E],
        '4' => [0x02, 0x06, 0x0A, 0x12, 0x1F, 0x02, 0x02],
        '5' => [0x1F, 0x10, 0x1E, 0x01, 0x01, 0x11, 0x0E],
        '6' => [0x06, 0x08, 0x10, 0x1E, 0x11, 0x11, 0x0E],
        '7' => [0x1F, 0x01, 0x02, 0x04, 0x08, 0x08, 0x08],
        '8' => [0x0E, 0x11, 0x11, 0x0E, 0x11, 0x11, 0x0E],
        '9' => [0x0E, 0x11, 0x11, 0x0F, 0x01, 0x02, 0x0C],
        '-' => [0x00, 0x00, 0x00, 0x1F, 0x00, 0x00, 0x00],
        ':' => [0x00, 0x0C, 0x0C, 0x00, 0x0C, 0x0C, 0x00],
        _ => [0x00; 7],
    }
}
