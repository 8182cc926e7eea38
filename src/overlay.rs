//! Transparent text layer drawn independently of the field and flattened on top of it.

use crate::params::{ParamKey, ParamStore, Rgb8, TextAlign};

/// Surface height the `text_size` parameter is expressed against. Text scales with the
/// target height so a still exported at any resolution keeps the preview's layout.
pub const REFERENCE_HEIGHT: f32 = 512.0;
pub const LINE_HEIGHT: f32 = 1.2;

const GLYPH_W: i32 = 3;
const GLYPH_H: i32 = 5;
/// Fraction of the nominal font size covered by a glyph's 5-unit height.
const CAP_RATIO: f32 = 0.7;

#[derive(Debug, Clone, PartialEq)]
pub struct TextStyle {
    pub enabled: bool,
    pub text: String,
    pub size: f32,
    pub x_percent: f32,
    pub y_percent: f32,
    pub align: TextAlign,
    pub color: Rgb8,
    pub bold: bool,
}

impl TextStyle {
    pub fn from_store(store: &ParamStore) -> Self {
        Self {
            enabled: store.flag(ParamKey::TextEnabled),
            text: store.text(ParamKey::Text).to_string(),
            size: store.float(ParamKey::TextSize),
            x_percent: store.float(ParamKey::TextX),
            y_percent: store.float(ParamKey::TextY),
            align: store.text_align(),
            color: store.color(ParamKey::TextColor),
            bold: store.flag(ParamKey::TextBold),
        }
    }

    pub fn is_visible(&self) -> bool {
        self.enabled && !self.text.trim().is_empty()
    }
}

/// RGBA8 layer; alpha 0 wherever no text is drawn.
#[derive(Debug, Clone)]
pub struct TextOverlay {
    width: usize,
    height: usize,
    rgba: Vec<u8>,
}

impl TextOverlay {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            rgba: vec![0; width * height * 4],
        }
    }

    pub fn size(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    pub fn pixels(&self) -> &[u8] {
        &self.rgba
    }

    pub fn resize(&mut self, width: usize, height: usize) {
        if (width, height) != (self.width, self.height) {
            self.width = width;
            self.height = height;
            self.rgba = vec![0; width * height * 4];
        }
    }

    pub fn clear(&mut self) {
        self.rgba.fill(0);
    }

    /// Whether any pixel of the layer is covered.
    pub fn is_blank(&self) -> bool {
        self.rgba.chunks_exact(4).all(|px| px[3] == 0)
    }

    /// Redraws the layer from scratch. Lines are split on `\n`, centred vertically as a
    /// block on the anchor, and aligned horizontally on it.
    pub fn draw(&mut self, style: &TextStyle) {
        self.clear();
        if !style.is_visible() || self.width == 0 || self.height == 0 {
            return;
        }

        let font_px = style.size * self.height as f32 / REFERENCE_HEIGHT;
        let scale = ((font_px * CAP_RATIO) / GLYPH_H as f32).round().max(1.0) as i32;
        let bold_px = if style.bold { (scale / 2).max(1) } else { 0 };
        let line_h = font_px * LINE_HEIGHT;

        let anchor_x = style.x_percent / 100.0 * self.width as f32;
        let anchor_y = style.y_percent / 100.0 * self.height as f32;

        let lines: Vec<&str> = style.text.split('\n').collect();
        let total_h = line_h * lines.len() as f32;
        let first_mid = anchor_y - total_h / 2.0 + line_h / 2.0;
        let color = (style.color.r, style.color.g, style.color.b);

        for (i, line) in lines.iter().enumerate() {
            let mid = first_mid + i as f32 * line_h;
            let text_w = text_pixel_width(line, scale) + bold_px;
            let left = match style.align {
                TextAlign::Left => anchor_x,
                TextAlign::Center => anchor_x - text_w as f32 / 2.0,
                TextAlign::Right => anchor_x - text_w as f32,
            };
            let top = (mid - (GLYPH_H * scale) as f32 / 2.0).round() as i32;
            let left = left.round() as i32;
            self.draw_text(line, left, top, scale, color);
            if bold_px > 0 {
                self.draw_text(line, left + bold_px, top, scale, color);
            }
        }
    }

    fn draw_text(&mut self, text: &str, x: i32, y: i32, scale: i32, color: (u8, u8, u8)) {
        let step = (GLYPH_W + 1) * scale;
        let mut cursor_x = x;
        for ch in text.chars() {
            self.draw_char(ch, cursor_x, y, scale, color);
            cursor_x += step;
        }
    }

    fn draw_char(&mut self, ch: char, x: i32, y: i32, scale: i32, color: (u8, u8, u8)) {
        let rows = glyph_3x5(ch);
        for (ry, row_bits) in rows.iter().enumerate() {
            for rx in 0..GLYPH_W {
                if (row_bits & (1u8 << (2 - rx))) == 0 {
                    continue;
                }
                let px = x + rx * scale;
                let py = y + ry as i32 * scale;
                for oy in 0..scale {
                    for ox in 0..scale {
                        self.put(px + ox, py + oy, color);
                    }
                }
            }
        }
    }

    fn put(&mut self, x: i32, y: i32, color: (u8, u8, u8)) {
        if x < 0 || y < 0 {
            return;
        }
        let (x, y) = (x as usize, y as usize);
        if x >= self.width || y >= self.height {
            return;
        }
        let idx = (y * self.width + x) * 4;
        self.rgba[idx] = color.0;
        self.rgba[idx + 1] = color.1;
        self.rgba[idx + 2] = color.2;
        self.rgba[idx + 3] = 255;
    }
}

/// Source-over: `base` is an opaque RGBA8 field raster, `layer` the same size.
pub fn composite_over(base: &mut [u8], layer: &[u8]) {
    for (dst, src) in base.chunks_exact_mut(4).zip(layer.chunks_exact(4)) {
        let a = src[3] as u16;
        if a == 0 {
            continue;
        }
        for c in 0..3 {
            dst[c] = ((src[c] as u16 * a + dst[c] as u16 * (255 - a) + 127) / 255) as u8;
        }
        dst[3] = 255;
    }
}

pub fn text_pixel_width(text: &str, scale: i32) -> i32 {
    let scale = scale.max(1);
    let count = text.chars().count() as i32;
    if count <= 0 {
        0
    } else {
        count * ((GLYPH_W + 1) * scale) - scale
    }
}

fn glyph_3x5(ch: char) -> [u8; 5] {
    match ch.to_ascii_uppercase() {
        'A' => [0b111, 0b101, 0b111, 0b101, 0b101],
        'B' => [0b110, 0b101, 0b110, 0b101, 0b110],
        'C' => [0b111, 0b100, 0b100, 0b100, 0b111],
        'D' => [0b110, 0b101, 0b101, 0b101, 0b110],
        'E' => [0b111, 0b100, 0b110, 0b100, 0b111],
        'F' => [0b111, 0b100, 0b110, 0b100, 0b100],
        'G' => [0b111, 0b100, 0b101, 0b101, 0b111],
        'H' => [0b101, 0b101, 0b111, 0b101, 0b101],
        'I' => [0b111, 0b010, 0b010, 0b010, 0b111],
        'J' => [0b001, 0b001, 0b001, 0b101, 0b111],
        'K' => [0b101, 0b101, 0b110, 0b101, 0b101],
        'L' => [0b100, 0b100, 0b100, 0b100, 0b111],
        'M' => [0b101, 0b111, 0b111, 0b101, 0b101],
        'N' => [0b101, 0b111, 0b111, 0b111, 0b101],
        'O' => [0b111, 0b101, 0b101, 0b101, 0b111],
        'P' => [0b111, 0b101, 0b111, 0b100, 0b100],
        'Q' => [0b111, 0b101, 0b101, 0b111, 0b001],
        'R' => [0b111, 0b101, 0b111, 0b110, 0b101],
        'S' => [0b111, 0b100, 0b111, 0b001, 0b111],
        'T' => [0b111, 0b010, 0b010, 0b010, 0b010],
        'U' => [0b101, 0b101, 0b101, 0b101, 0b111],
        'V' => [0b101, 0b101, 0b101, 0b101, 0b010],
        'W' => [0b101, 0b101, 0b111, 0b111, 0b101],
        'X' => [0b101, 0b101, 0b010, 0b101, 0b101],
        'Y' => [0b101, 0b101, 0b010, 0b010, 0b010],
        'Z' => [0b111, 0b001, 0b010, 0b100, 0b111],
        '0' => [0b111, 0b101, 0b101, 0b101, 0b111],
        '1' => [0b010, 0b110, 0b010, 0b010, 0b111],
        '2' => [0b111, 0b001, 0b111, 0b100, 0b111],
        '3' => [0b111, 0b001, 0b111, 0b001, 0b111],
        '4' => [0b101, 0b101, 0b111, 0b001, 0b001],
        '5' => [0b111, 0b100, 0b111, 0b001, 0b111],
        '6' => [0b111, 0b100, 0b111, 0b101, 0b111],
        '7' => [0b111, 0b001, 0b001, 0b001, 0b001],
        '8' => [0b111, 0b101, 0b111, 0b101, 0b111],
        '9' => [0b111, 0b101, 0b111, 0b001, 0b111],
        '.' => [0b000, 0b000, 0b000, 0b000, 0b010],
        ',' => [0b000, 0b000, 0b000, 0b010, 0b100],
        '!' => [0b010, 0b010, 0b010, 0b000, 0b010],
        '?' => [0b111, 0b001, 0b011, 0b000, 0b010],
        '\'' => [0b010, 0b010, 0b000, 0b000, 0b000],
        '"' => [0b101, 0b101, 0b000, 0b000, 0b000],
        '/' => [0b001, 0b001, 0b010, 0b100, 0b100],
        '(' => [0b010, 0b100, 0b100, 0b100, 0b010],
        ')' => [0b010, 0b001, 0b001, 0b001, 0b010],
        '&' => [0b010, 0b101, 0b010, 0b101, 0b011],
        '=' => [0b000, 0b111, 0b000, 0b111, 0b000],
        '_' => [0b000, 0b000, 0b000, 0b000, 0b111],
        ':' => [0b000, 0b010, 0b000, 0b010, 0b000],
        '+' => [0b000, 0b010, 0b111, 0b010, 0b000],
        '-' => [0b000, 0b000, 0b111, 0b000, 0b000],
        '#' => [0b101, 0b111, 0b101, 0b111, 0b101],
        '*' => [0b101, 0b010, 0b111, 0b010, 0b101],
        ' ' | '\t' | '\r' => [0b000, 0b000, 0b000, 0b000, 0b000],
        _ => [0b111, 0b101, 0b111, 0b101, 0b111],
    }
}
