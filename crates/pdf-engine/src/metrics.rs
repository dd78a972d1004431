//! Glyph metrics for the standard Helvetica font.
//!
//! Widths are the AFM advance widths in 1/1000 em. The overlay text is drawn with
//! `WinAnsiEncoding`, so measurement and encoding share the same byte mapping.

pub const HELVETICA: &str = "Helvetica";

const ASCENDER: f32 = 718.0;
const DESCENDER: f32 = -207.0;
const FALLBACK_WIDTH: u16 = 556;

// Advance widths for 0x20..=0x7E.
#[rustfmt::skip]
const ASCII_WIDTHS: [u16; 95] = [
    278, 278, 355, 556, 556, 889, 667, 191, 333, 333, 389, 584, 278, 333, 278, 278,
    556, 556, 556, 556, 556, 556, 556, 556, 556, 556,
    278, 278, 584, 584, 584, 556, 1015,
    667, 667, 722, 722, 667, 611, 778, 722, 278, 500, 667, 556, 833,
    722, 778, 667, 778, 722, 667, 611, 722, 667, 944, 667, 667, 611,
    278, 278, 278, 469, 556, 333,
    556, 556, 500, 556, 556, 278, 556, 556, 222, 222, 500, 222, 833,
    556, 556, 556, 556, 333, 500, 278, 556, 500, 722, 500, 500, 500,
    334, 260, 334, 584,
];

/// Encodes text as WinAnsi bytes. Characters outside Latin-1 become `?`.
pub fn encode_win_ansi(text: &str) -> Vec<u8> {
    text.chars()
        .map(|ch| match u32::from(ch) {
            code @ 0x20..=0x7E | code @ 0xA0..=0xFF => code as u8,
            _ => b'?',
        })
        .collect()
}

fn advance_width(byte: u8) -> u16 {
    match byte {
        0x20..=0x7E => ASCII_WIDTHS[(byte - 0x20) as usize],
        0xA0 => 278,
        0xAD => 333,
        0xE7 => 500,
        0xEC..=0xEF => 278,
        0xFD | 0xFF => 500,
        0xC0..=0xC5 => 667,
        0xC6 => 1000,
        0xC7 => 722,
        0xC8..=0xCB => 667,
        0xCC..=0xCF => 278,
        0xD1 => 722,
        0xD2..=0xD6 => 778,
        0xD9..=0xDC => 722,
        // Remaining Latin-1 letters are 556 wide.
        _ => FALLBACK_WIDTH,
    }
}

/// Rendered width of `text` at `size`, measured on the encoded bytes.
pub fn text_width(text: &str, size: f32) -> f32 {
    let units: u32 = encode_win_ansi(text).into_iter().map(|byte| u32::from(advance_width(byte))).sum();
    units as f32 / 1000.0 * size
}

/// Line height at `size`, ascender to descender.
pub fn text_height(size: f32) -> f32 {
    (ASCENDER - DESCENDER) / 1000.0 * size
}
