//! The procedural mandala field.
//!
//! Every output pixel is a pure function of its coordinate, the elapsed time and a
//! [`FieldUniforms`] snapshot of the parameter store, so the same frame can be produced
//! at any resolution. [`FieldRenderer`] owns the render target and evaluates the field
//! row-parallel on the CPU.

pub mod color;
pub mod texture;

use crate::params::{EffectKind, ParamKey, ParamStore};
use color::{adjust_hsl, mix3, normalize3, smoothstep, srgb_to_linear};
use rayon::prelude::*;
use std::f64::consts::TAU;
use texture::KaleidoTexture;
use thiserror::Error;

/// Upper bound on a render target (width × height) so a bad export request fails
/// cleanly instead of exhausting memory.
pub const MAX_TARGET_PIXELS: usize = 8192 * 16384;

const GAMMA_ENCODE: f32 = 0.4545;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RenderError {
    #[error("render target {width}x{height} is empty")]
    EmptyTarget { width: usize, height: usize },
    #[error("render target {width}x{height} exceeds the {max} pixel limit")]
    TargetTooLarge {
        width: usize,
        height: usize,
        max: usize,
    },
}

/// Per-frame copy of every value the shader reads.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldUniforms {
    pub symmetry: f32,
    pub glow: f32,
    pub speed: f32,
    pub scale: f32,
    pub center: [f32; 2],
    /// Linear-light gradient colours.
    pub colors: [[f32; 3]; 3],
    pub gradient_mix: f32,
    pub seed: f32,
    pub background_dim: f32,
    pub stars: bool,
    pub star_density: f32,
    pub star_intensity: f32,
    pub star_seed: f32,
    pub effect: EffectKind,
    pub effect_amp: f32,
    pub effect_freq: f32,
    pub use_image: bool,
    pub image_mix: f32,
    pub image_scale: f32,
    pub image_rotation: f32,
    pub image_center: [f32; 2],
    pub image_mirror: bool,
    pub image_hue: f32,
    pub image_saturation: f32,
    pub image_lightness: f32,
}

impl Default for FieldUniforms {
    fn default() -> Self {
        Self::from_store(&ParamStore::new(), false)
    }
}

impl FieldUniforms {
    /// `has_image` gates the kaleidoscope layer: it only shows when an image is loaded
    /// and the user enabled it. Gradient colours are converted to linear light, like
    /// image texels.
    pub fn from_store(store: &ParamStore, has_image: bool) -> Self {
        Self {
            symmetry: store.float(ParamKey::Symmetry),
            glow: store.float(ParamKey::Glow),
            speed: store.float(ParamKey::Speed),
            scale: store.float(ParamKey::Scale),
            center: store.point(ParamKey::Center),
            colors: [
                store.color(ParamKey::Color1).to_unit().map(srgb_to_linear),
                store.color(ParamKey::Color2).to_unit().map(srgb_to_linear),
                store.color(ParamKey::Color3).to_unit().map(srgb_to_linear),
            ],
            gradient_mix: store.float(ParamKey::GradientMix),
            seed: store.float(ParamKey::Seed),
            background_dim: store.float(ParamKey::BackgroundDim),
            stars: store.flag(ParamKey::Stars),
            star_density: store.float(ParamKey::StarDensity),
            star_intensity: store.float(ParamKey::StarIntensity),
            star_seed: store.float(ParamKey::StarSeed),
            effect: store.effect(),
            effect_amp: store.float(ParamKey::EffectAmp),
            effect_freq: store.float(ParamKey::EffectFreq),
            use_image: has_image && store.flag(ParamKey::ImageEnabled),
            image_mix: store.float(ParamKey::ImageMix),
            image_scale: store.float(ParamKey::ImageScale),
            image_rotation: store.float(ParamKey::ImageRotation),
            image_center: store.point(ParamKey::ImageCenter),
            image_mirror: store.flag(ParamKey::ImageMirror),
            image_hue: store.float(ParamKey::ImageHue),
            image_saturation: store.float(ParamKey::ImageSaturation),
            image_lightness: store.float(ParamKey::ImageLightness),
        }
    }
}

fn fract(x: f64) -> f64 {
    x - x.floor()
}

/// GLSL `mod`: result has the sign of `y`.
fn glsl_mod(x: f64, y: f64) -> f64 {
    x - y * (x / y).floor()
}

/// The fold order actually applied for a symmetry parameter value.
pub fn symmetry_order(symmetry: f32) -> f32 {
    symmetry.floor().max(1.0)
}

/// Folds a polar angle into a single mirrored wedge of width `2π/k`.
pub fn fold_angle(angle: f64, k: f64) -> f64 {
    let wedge = TAU / k;
    (glsl_mod(angle, wedge) - 0.5 * wedge).abs()
}

pub fn superformula(phi: f64, m: f64, a: f64, b: f64, n1: f64, n2: f64, n3: f64) -> f64 {
    let t1 = ((m * phi / 4.0).cos() / a).abs().powf(n2);
    let t2 = ((m * phi / 4.0).sin() / b).abs().powf(n3);
    (t1 + t2).powf(-1.0 / n1.max(0.0001))
}

/// Static per-pixel hash in [0,1).
pub fn hash21(p: [f64; 2]) -> f64 {
    let mut x = fract(p[0] * 123.34);
    let mut y = fract(p[1] * 345.45);
    let d = x * (x + 34.345) + y * (y + 34.345);
    x += d;
    y += d;
    fract(x * y)
}

/// Pre-fold sample warp.
pub fn warp(uv: [f64; 2], effect: EffectKind, amp: f32, freq: f32, t: f64) -> [f64; 2] {
    let (amp, freq) = (f64::from(amp), f64::from(freq));
    match effect {
        EffectKind::None => uv,
        EffectKind::Ripple => {
            let r0 = (uv[0] * uv[0] + uv[1] * uv[1]).sqrt();
            let ripple = ((r0 * (TAU * (1.0 + 4.0 * freq))) - t * 2.0).sin() * (amp * 0.12);
            [uv[0] * (1.0 + ripple), uv[1] * (1.0 + ripple)]
        }
        EffectKind::Wave => {
            let f = 10.0 * (1.0 + 9.0 * freq);
            [
                uv[0] + (uv[1] * f + t * 2.0).sin() * (amp * 0.12),
                uv[1] + (uv[0] * f + t * 2.0).cos() * (amp * 0.12),
            ]
        }
    }
}

fn sample_image(
    u: &FieldUniforms,
    tex: &KaleidoTexture,
    a_fold: f32,
    r: f32,
) -> [f32; 3] {
    let (s, c) = u.image_rotation.sin_cos();
    let px = a_fold.cos() * r;
    let py = a_fold.sin() * r;
    // Column-major rot2 as in the GLSL helper.
    let rx = c * px + s * py;
    let ry = -s * px + c * py;
    let tx = rx * u.image_scale - u.image_center[0] + 0.5;
    let ty = ry * u.image_scale - u.image_center[1] + 0.5;
    let (fx, fy) = (tx - tx.floor(), ty - ty.floor());
    let (mu, mv) = if u.image_mirror {
        ((fx * 2.0 - 1.0).abs(), (fy * 2.0 - 1.0).abs())
    } else {
        (fx, fy)
    };
    let rgb = tex.sample(mu, mv);
    adjust_hsl(rgb, u.image_hue, u.image_saturation, u.image_lightness)
}

/// Shades one sample. `uv` is the centre-relative field coordinate (already offset by
/// the `center` parameter); `frag` is the pixel-space coordinate used only by the star
/// hash. Returns display-encoded RGB in [0,1].
///
/// Geometry and band phase are evaluated in f64. The superformula envelope reaches
/// about 3e4 and scales any angle rounding straight into the band phase.
pub fn shade(
    u: &FieldUniforms,
    time: f64,
    uv: [f64; 2],
    frag: [f64; 2],
    tex: Option<&KaleidoTexture>,
) -> [f32; 3] {
    let t = time * f64::from(u.speed);

    let duv = warp(uv, u.effect, u.effect_amp, u.effect_freq, t);
    let r = (duv[0] * duv[0] + duv[1] * duv[1]).sqrt();
    let a = duv[1].atan2(duv[0]);

    let k = f64::from(symmetry_order(u.symmetry));
    let a_fold = fold_angle(a, k);

    let a_mod = a_fold + 0.25 * (t * 0.33).sin();
    let r_mod = r * f64::from(u.scale);

    let m = 6.0 + 4.0 * (t * 0.2 + f64::from(u.seed) * TAU).sin();
    let sf = superformula(a_mod, m, 1.0, 1.0, 0.6 + 0.4 * (t * 0.11).sin(), 8.0, 8.0);

    let bands = (10.0 * r_mod - sf * 6.0 + t).sin() + 0.5 * (21.0 * r_mod + 0.7 * t).sin();
    let petals = (m * a_mod * 0.5 + 2.0 * (t * 0.17).sin()).cos();
    let field = (bands * petals) as f32;
    let pulse = (0.6 + 0.4 * (t * 0.5 + r_mod * 3.0).sin()) as f32;
    let r_mod = r_mod as f32;

    let fall = (-2.0 * r_mod * r_mod).exp();
    let mut gl = smoothstep(0.4, 0.0, field.abs()) * fall;
    gl = gl.powf(0.8) * pulse;

    let g = {
        let radial = smoothstep(0.0, 1.2, r_mod);
        radial + (gl.clamp(0.0, 1.0) - radial) * u.gradient_mix
    };
    let [c1, c2, c3] = u.colors;
    let col12 = mix3(c1, c2, smoothstep(0.0, 0.6, g));
    let mut proc_col = mix3(col12, c3, smoothstep(0.35, 1.0, g));

    let aura = smoothstep(1.2, 0.2, r_mod) * 0.35;
    let aura_dir = normalize3([c3[0] + 0.2, c3[1] + 0.2, c3[2] + 0.2]);
    for i in 0..3 {
        proc_col[i] += aura * aura_dir[i];
    }

    let (img_col, use_image) = match tex {
        Some(tex) if u.use_image => (sample_image(u, tex, a_fold as f32, r as f32), 1.0),
        _ => ([0.0; 3], 0.0),
    };

    let star_offset = f64::from(u.star_seed) * 100.0;
    let star_hash = hash21([frag[0] * 0.5 + star_offset, frag[1] * 0.5 + star_offset]);
    let stars = if u.stars && star_hash >= 1.0 - f64::from(u.star_density) {
        u.star_intensity
    } else {
        0.0
    };

    let mut col = mix3(proc_col, img_col, use_image * u.image_mix);
    let glow = u.glow.max(0.0);
    for c in &mut col {
        *c += stars;
        *c *= glow;
        *c *= 1.0 - u.background_dim;
        *c = c.clamp(0.0, 1.0).powf(GAMMA_ENCODE);
    }
    col
}

/// Pixel-space coordinate (origin bottom-left, pixel centres) and field coordinate for
/// row `y` (top-down) and column `x` of a `w`×`h` target.
pub fn pixel_coords(x: usize, y: usize, w: usize, h: usize, center: [f32; 2]) -> ([f64; 2], [f64; 2]) {
    let fx = x as f64 + 0.5;
    let fy = (h - 1 - y) as f64 + 0.5;
    let hw = h.max(1) as f64;
    let uv = [
        (fx - 0.5 * w as f64) / hw - f64::from(center[0]),
        (fy - 0.5 * h as f64) / hw - f64::from(center[1]),
    ];
    ([fx, fy], uv)
}

pub fn to_rgba8(rgb: [f32; 3]) -> [u8; 4] {
    [
        (rgb[0] * 255.0).round() as u8,
        (rgb[1] * 255.0).round() as u8,
        (rgb[2] * 255.0).round() as u8,
        255,
    ]
}

fn check_target(width: usize, height: usize) -> Result<(), RenderError> {
    if width == 0 || height == 0 {
        return Err(RenderError::EmptyTarget { width, height });
    }
    match width.checked_mul(height) {
        Some(n) if n <= MAX_TARGET_PIXELS => Ok(()),
        _ => Err(RenderError::TargetTooLarge {
            width,
            height,
            max: MAX_TARGET_PIXELS,
        }),
    }
}

/// Owns the render target. The only component that evaluates the field.
#[derive(Debug, Clone)]
pub struct FieldRenderer {
    width: usize,
    height: usize,
    pixels: Vec<u8>,
    frames: u64,
}

impl FieldRenderer {
    pub fn new(width: usize, height: usize) -> Result<Self, RenderError> {
        check_target(width, height)?;
        Ok(Self {
            width,
            height,
            pixels: vec![0u8; width * height * 4],
            frames: 0,
        })
    }

    pub fn size(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn frames_rendered(&self) -> u64 {
        self.frames
    }

    pub fn resize(&mut self, width: usize, height: usize) -> Result<(), RenderError> {
        if (width, height) == (self.width, self.height) {
            return Ok(());
        }
        check_target(width, height)?;
        self.width = width;
        self.height = height;
        self.pixels = vec![0u8; width * height * 4];
        Ok(())
    }

    pub fn render(
        &mut self,
        uniforms: &FieldUniforms,
        time: f32,
        texture: Option<&KaleidoTexture>,
    ) -> &[u8] {
        let (w, h) = (self.width, self.height);
        let time = f64::from(time);
        self.pixels
            .par_chunks_mut(w * 4)
            .enumerate()
            .for_each(|(y, row)| {
                for (x, px) in row.chunks_exact_mut(4).enumerate() {
                    let (frag, uv) = pixel_coords(x, y, w, h, uniforms.center);
                    px.copy_from_slice(&to_rgba8(shade(uniforms, time, uv, frag, texture)));
                }
            });
        self.frames += 1;
        &self.pixels
    }
}
