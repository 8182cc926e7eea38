use crate::params::Rgb8;

/// Gradient palettes offered in the colour panel and used by the audio palette swap.
pub const PALETTES: [[Rgb8; 3]; 8] = [
    // Sunset
    [rgb(0xff6b6b), rgb(0xffa726), rgb(0xffcc02)],
    // Ocean
    [rgb(0x4fc3f7), rgb(0x29b6f6), rgb(0x0277bd)],
    // Forest
    [rgb(0x66bb6a), rgb(0x43a047), rgb(0x2e7d32)],
    // Purple dream
    [rgb(0xba68c8), rgb(0x9c27b0), rgb(0x7b1fa2)],
    // Cosmic
    [rgb(0xe91e63), rgb(0x673ab7), rgb(0x3f51b5)],
    // Neon
    [rgb(0x00e676), rgb(0x00bcd4), rgb(0x3d5afe)],
    // Warm earth
    [rgb(0xff8a65), rgb(0xff7043), rgb(0xbf360c)],
    // Cool mint
    [rgb(0x4db6ac), rgb(0x26a69a), rgb(0x00695c)],
];

const fn rgb(hex: u32) -> Rgb8 {
    Rgb8::new((hex >> 16) as u8, (hex >> 8) as u8, hex as u8)
}

pub fn smoothstep(edge0: f32, edge1: f32, x: f32) -> f32 {
    let t = ((x - edge0) / (edge1 - edge0)).clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}

pub fn mix3(a: [f32; 3], b: [f32; 3], t: f32) -> [f32; 3] {
    [
        a[0] + (b[0] - a[0]) * t,
        a[1] + (b[1] - a[1]) * t,
        a[2] + (b[2] - a[2]) * t,
    ]
}

pub fn normalize3(v: [f32; 3]) -> [f32; 3] {
    let len = (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt();
    if len <= f32::EPSILON {
        return [0.0; 3];
    }
    [v[0] / len, v[1] / len, v[2] / len]
}

/// RGB in [0,1] to (hue turns, saturation, lightness).
pub fn rgb_to_hsl(c: [f32; 3]) -> [f32; 3] {
    let [r, g, b] = c;
    let maxc = r.max(g).max(b);
    let minc = r.min(g).min(b);
    let l = (maxc + minc) * 0.5;
    let d = maxc - minc;
    if d <= 1e-5 {
        return [0.0, 0.0, l];
    }
    let s = if l > 0.5 {
        d / (2.0 - maxc - minc)
    } else {
        d / (maxc + minc)
    };
    let h = if maxc == r {
        (g - b) / d + if g < b { 6.0 } else { 0.0 }
    } else if maxc == g {
        (b - r) / d + 2.0
    } else {
        (r - g) / d + 4.0
    };
    [h / 6.0, s, l]
}

fn hue_to_rgb(p: f32, q: f32, mut t: f32) -> f32 {
    if t < 0.0 {
        t += 1.0;
    }
    if t > 1.0 {
        t -= 1.0;
    }
    if t < 1.0 / 6.0 {
        p + (q - p) * 6.0 * t
    } else if t < 0.5 {
        q
    } else if t < 2.0 / 3.0 {
        p + (q - p) * (2.0 / 3.0 - t) * 6.0
    } else {
        p
    }
}

pub fn hsl_to_rgb(hsl: [f32; 3]) -> [f32; 3] {
    let [h, s, l] = hsl;
    if s == 0.0 {
        return [l, l, l];
    }
    let q = if l < 0.5 { l * (1.0 + s) } else { l + s - l * s };
    let p = 2.0 * l - q;
    [
        hue_to_rgb(p, q, h + 1.0 / 3.0),
        hue_to_rgb(p, q, h),
        hue_to_rgb(p, q, h - 1.0 / 3.0),
    ]
}

/// Hue shift (additive, wrapped), saturation scale (clamped) and lightness shift (clamped).
pub fn adjust_hsl(c: [f32; 3], hue_shift: f32, sat_scale: f32, light_shift: f32) -> [f32; 3] {
    let [h, s, l] = rgb_to_hsl(c);
    hsl_to_rgb([
        (h + hue_shift).rem_euclid(1.0),
        (s * sat_scale).clamp(0.0, 1.0),
        (l + light_shift).clamp(0.0, 1.0),
    ])
}

pub fn srgb_to_linear(v: f32) -> f32 {
    v.max(0.0).powf(2.2)
}
