use super::color::srgb_to_linear;
use image::GenericImageView;

/// Source image for the kaleidoscope layer: linear-light RGB texels, sampled with
/// bilinear filtering and repeat wrapping.
#[derive(Debug, Clone)]
pub struct KaleidoTexture {
    width: usize,
    height: usize,
    texels: Vec<[f32; 3]>,
}

impl KaleidoTexture {
    /// Decodes any raster format the `image` crate was built with.
    pub fn decode(bytes: &[u8]) -> Result<Self, image::ImageError> {
        let img = image::load_from_memory(bytes)?;
        let (w, h) = img.dimensions();
        let rgba = img.to_rgba8();
        Ok(Self::from_rgba8(w as usize, h as usize, rgba.as_raw()))
    }

    /// Builds a texture from sRGB-encoded RGBA8 pixels. Returns a 1x1 black texture when
    /// the buffer does not match the dimensions.
    pub fn from_rgba8(width: usize, height: usize, rgba: &[u8]) -> Self {
        if width == 0 || height == 0 || rgba.len() < width * height * 4 {
            return Self {
                width: 1,
                height: 1,
                texels: vec![[0.0; 3]],
            };
        }
        let texels = rgba
            .chunks_exact(4)
            .take(width * height)
            .map(|px| {
                [
                    srgb_to_linear(px[0] as f32 / 255.0),
                    srgb_to_linear(px[1] as f32 / 255.0),
                    srgb_to_linear(px[2] as f32 / 255.0),
                ]
            })
            .collect();
        Self {
            width,
            height,
            texels,
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    fn texel(&self, x: i64, y: i64) -> [f32; 3] {
        let xi = x.rem_euclid(self.width as i64) as usize;
        let yi = y.rem_euclid(self.height as i64) as usize;
        self.texels[yi * self.width + xi]
    }

    /// Samples at normalized coordinates; `(0,0)` is the bottom-left corner.
    pub fn sample(&self, u: f32, v: f32) -> [f32; 3] {
        let fx = u * self.width as f32 - 0.5;
        // Image rows are stored top-down.
        let fy = (1.0 - v) * self.height as f32 - 0.5;
        let x0 = fx.floor();
        let y0 = fy.floor();
        let tx = fx - x0;
        let ty = fy - y0;
        let (x0, y0) = (x0 as i64, y0 as i64);

        let c00 = self.texel(x0, y0);
        let c10 = self.texel(x0 + 1, y0);
        let c01 = self.texel(x0, y0 + 1);
        let c11 = self.texel(x0 + 1, y0 + 1);

        let mut out = [0.0f32; 3];
        for i in 0..3 {
            let top = c00[i] + (c10[i] - c00[i]) * tx;
            let bot = c01[i] + (c11[i] - c01[i]) * tx;
            out[i] = top + (bot - top) * ty;
        }
        out
    }
}
