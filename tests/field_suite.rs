use mandala_lab::field::color::{adjust_hsl, hsl_to_rgb, rgb_to_hsl, smoothstep};
use mandala_lab::field::texture::KaleidoTexture;
use mandala_lab::field::{
    FieldRenderer, FieldUniforms, MAX_TARGET_PIXELS, RenderError, fold_angle, hash21,
    pixel_coords, shade, superformula, symmetry_order, warp,
};
use mandala_lab::params::EffectKind;
use proptest::prelude::*;
use std::f64::consts::{PI, TAU};

fn uniforms_without_stars() -> FieldUniforms {
    let mut u = FieldUniforms::default();
    u.stars = false;
    u
}

fn polar(r: f64, a: f64) -> [f64; 2] {
    [r * a.cos(), r * a.sin()]
}

fn assert_rgb_close(a: [f32; 3], b: [f32; 3], tol: f32) {
    for i in 0..3 {
        assert!(
            (a[i] - b[i]).abs() <= tol,
            "channel {i}: {a:?} vs {b:?} (tol {tol})"
        );
    }
}

/// Two display steps out of 255.
const SYMMETRY_TOLERANCE: f32 = 2.0 / 255.0;

fn animated_uniforms() -> FieldUniforms {
    let mut u = uniforms_without_stars();
    u.speed = 1.0;
    u
}

proptest! {
    #[test]
    fn field_has_k_fold_rotational_symmetry(
        k in 1u32..=32,
        r in 0.05f64..0.9,
        a in -PI..PI,
        time in 0.0f64..200.0,
    ) {
        let mut u = animated_uniforms();
        u.symmetry = k as f32;
        let wedge = TAU / k as f64;
        let base = shade(&u, time, polar(r, a), [0.0, 0.0], None);
        let turned = shade(&u, time, polar(r, a + wedge), [0.0, 0.0], None);
        for i in 0..3 {
            prop_assert!(
                (base[i] - turned[i]).abs() <= SYMMETRY_TOLERANCE,
                "t={} {:?} vs {:?}", time, base, turned
            );
        }
    }

    #[test]
    fn folding_is_periodic_in_the_wedge(k in 1u32..=32, a in -PI..PI) {
        let k = k as f64;
        let folded = fold_angle(a, k);
        let turned = fold_angle(a + TAU / k, k);
        prop_assert!((folded - turned).abs() < 1e-9);
    }

    #[test]
    fn folded_angle_stays_inside_half_wedge(k in 1u32..=32, a in -10.0f64..10.0) {
        let k = k as f64;
        let f = fold_angle(a, k);
        prop_assert!(f >= 0.0);
        prop_assert!(f <= PI / k + 1e-9);
    }

    #[test]
    fn hsl_round_trip_is_identity(r in 0.0f32..=1.0, g in 0.0f32..=1.0, b in 0.0f32..=1.0) {
        let back = hsl_to_rgb(rgb_to_hsl([r, g, b]));
        prop_assert!((back[0] - r).abs() < 1e-4);
        prop_assert!((back[1] - g).abs() < 1e-4);
        prop_assert!((back[2] - b).abs() < 1e-4);
    }

    #[test]
    fn star_hash_is_unit_interval(x in -5000.0f64..5000.0, y in -5000.0f64..5000.0) {
        let h = hash21([x, y]);
        prop_assert!((0.0..1.0).contains(&h));
    }
}

#[test]
fn ripple_warp_keeps_the_symmetry() {
    let mut u = animated_uniforms();
    u.symmetry = 6.0;
    u.effect = EffectKind::Ripple;
    u.effect_amp = 0.5;
    for time in [0.0, 14.28, 68.82, 151.5] {
        for a in [0.1, 0.3, 0.7, 2.18] {
            let p = shade(&u, time, polar(0.4, a), [0.0, 0.0], None);
            let q = shade(&u, time, polar(0.4, a + TAU / 6.0), [0.0, 0.0], None);
            assert_rgb_close(p, q, SYMMETRY_TOLERANCE);
        }
    }
}

#[test]
fn symmetry_survives_the_sharpest_envelope() {
    // At t=68.82 the superformula exponent sits near -5.
    let mut u = animated_uniforms();
    u.symmetry = 1.0;
    let p = shade(&u, 68.82, polar(0.09, 2.18), [0.0, 0.0], None);
    let q = shade(&u, 68.82, polar(0.09, 2.18 + TAU), [0.0, 0.0], None);
    assert_rgb_close(p, q, SYMMETRY_TOLERANCE);
    for k in [3.0, 7.0, 24.0] {
        u.symmetry = k;
        let wedge = TAU / f64::from(k);
        let p = shade(&u, 68.82, polar(0.09, 2.18), [0.0, 0.0], None);
        let q = shade(&u, 68.82, polar(0.09, 2.18 + wedge), [0.0, 0.0], None);
        assert_rgb_close(p, q, SYMMETRY_TOLERANCE);
    }
}

#[test]
fn gradient_colours_are_linearised() {
    // Default color1 is #ff6b6b.
    let u = FieldUniforms::default();
    let [r, g, b] = u.colors[0];
    assert!((r - 1.0).abs() < 1e-6);
    assert!((g - 0.148).abs() < 2e-3, "green {g}");
    assert!((b - 0.148).abs() < 2e-3, "blue {b}");
    assert!(g < 0x6b as f32 / 255.0);
}

#[test]
fn ripple_warp_scales_radially() {
    let uv = [0.3, 0.4];
    let w = warp(uv, EffectKind::Ripple, 1.0, 0.5, 0.7);
    // Same direction, only the length changes.
    let cross = uv[0] * w[1] - uv[1] * w[0];
    assert!(cross.abs() < 1e-6);
    assert_eq!(warp(uv, EffectKind::None, 1.0, 0.5, 0.7), uv);
}

#[test]
fn symmetry_order_floors_and_clamps() {
    assert_eq!(symmetry_order(0.2), 1.0);
    assert_eq!(symmetry_order(7.9), 7.0);
    assert_eq!(symmetry_order(32.0), 32.0);
}

#[test]
fn superformula_unit_rose_is_one_at_zero() {
    let v = superformula(0.0, 6.0, 1.0, 1.0, 1.0, 8.0, 8.0);
    assert!((v - 1.0).abs() < 1e-12);
}

#[test]
fn hsl_adjust_identity_and_clamps() {
    let c = [0.8, 0.3, 0.1];
    assert_rgb_close(adjust_hsl(c, 0.0, 1.0, 0.0), c, 1e-4);
    assert_rgb_close(adjust_hsl(c, 0.0, 1.0, 1.0), [1.0, 1.0, 1.0], 1e-4);
    let grey = adjust_hsl(c, 0.0, 0.0, 0.0);
    assert!((grey[0] - grey[1]).abs() < 1e-5 && (grey[1] - grey[2]).abs() < 1e-5);
    // A full hue turn wraps back.
    assert_rgb_close(adjust_hsl(c, 1.0, 1.0, 0.0), c, 1e-4);
}

#[test]
fn smoothstep_supports_reversed_edges() {
    assert_eq!(smoothstep(0.0, 1.0, -1.0), 0.0);
    assert_eq!(smoothstep(0.0, 1.0, 2.0), 1.0);
    assert_eq!(smoothstep(0.4, 0.0, 0.0), 1.0);
    assert_eq!(smoothstep(0.4, 0.0, 0.5), 0.0);
}

#[test]
fn pixel_coords_centre_on_origin() {
    let (frag, uv) = pixel_coords(0, 9, 10, 10, [0.0, 0.0]);
    assert_eq!(frag, [0.5, 0.5]);
    assert!((uv[0] + 0.45).abs() < 1e-12 && (uv[1] + 0.45).abs() < 1e-12);

    let (_, shifted) = pixel_coords(0, 9, 10, 10, [0.1, -0.2]);
    assert!((shifted[0] - (uv[0] - 0.1)).abs() < 1e-6);
    assert!((shifted[1] - (uv[1] + 0.2)).abs() < 1e-6);
}

#[test]
fn stars_are_static_and_reseeded_by_seed() {
    let mut u = FieldUniforms::default();
    u.stars = true;
    u.star_density = 0.2;
    u.star_intensity = 1.0;
    u.glow = 1.0;

    let mut on = FieldRenderer::new(48, 48).unwrap();
    let a = on.render(&u, 1.0, None).to_vec();
    let b = on.render(&u, 1.0, None).to_vec();
    assert_eq!(a, b, "same inputs give the same frame");

    let mut plain = u.clone();
    plain.stars = false;
    let without = FieldRenderer::new(48, 48).unwrap().render(&plain, 1.0, None).to_vec();
    assert_ne!(a, without, "stars add speckle");

    let mut reseeded = u.clone();
    reseeded.star_seed = 0.9;
    let c = FieldRenderer::new(48, 48).unwrap().render(&reseeded, 1.0, None).to_vec();
    assert_ne!(a, c, "a new seed moves the stars");
}

#[test]
fn background_dim_one_renders_black() {
    let mut u = FieldUniforms::default();
    u.background_dim = 1.0;
    let mut r = FieldRenderer::new(16, 16).unwrap();
    let px = r.render(&u, 2.0, None);
    assert!(px.chunks_exact(4).all(|p| p == [0, 0, 0, 255]));
}

#[test]
fn renderer_output_is_opaque_and_sized() {
    let mut r = FieldRenderer::new(32, 18).unwrap();
    let px = r.render(&FieldUniforms::default(), 0.5, None);
    assert_eq!(px.len(), 32 * 18 * 4);
    assert!(px.chunks_exact(4).all(|p| p[3] == 255));
    assert_eq!(r.frames_rendered(), 1);

    r.resize(8, 8).unwrap();
    assert_eq!(r.size(), (8, 8));
    assert_eq!(r.pixels().len(), 8 * 8 * 4);
}

#[test]
fn renderer_rejects_bad_targets() {
    assert!(matches!(
        FieldRenderer::new(0, 10),
        Err(RenderError::EmptyTarget { .. })
    ));
    let mut r = FieldRenderer::new(4, 4).unwrap();
    let too_wide = MAX_TARGET_PIXELS / 2 + 1;
    assert!(matches!(
        r.resize(too_wide, 2),
        Err(RenderError::TargetTooLarge { .. })
    ));
    assert_eq!(r.size(), (4, 4), "failed resize keeps the old target");
}

#[test]
fn image_layer_only_shows_when_enabled_and_loaded() {
    let red = KaleidoTexture::from_rgba8(2, 2, &[255, 0, 0, 255].repeat(4));
    let mut u = uniforms_without_stars();
    u.image_mix = 1.0;
    u.glow = 1.0;
    u.use_image = true;
    let with = shade(&u, 0.0, [0.1, 0.2], [0.0, 0.0], Some(&red));
    assert_rgb_close(with, [1.0, 0.0, 0.0], 1e-3);

    u.use_image = false;
    let without = shade(&u, 0.0, [0.1, 0.2], [0.0, 0.0], Some(&red));
    assert!((without[0] - 1.0).abs() > 1e-3 || without[1] > 1e-3 || without[2] > 1e-3);
}

#[test]
fn texture_sampling_wraps_and_filters() {
    // Left column black, right column white.
    let mut rgba = Vec::new();
    for _ in 0..2 {
        rgba.extend_from_slice(&[0, 0, 0, 255, 255, 255, 255, 255]);
    }
    let tex = KaleidoTexture::from_rgba8(2, 2, &rgba);
    let mid = tex.sample(0.5, 0.5);
    assert!(mid[0] > 0.2 && mid[0] < 0.8, "bilinear between columns: {mid:?}");
    let a = tex.sample(0.25, 0.5);
    let b = tex.sample(1.25, 0.5);
    assert_rgb_close(a, b, 1e-5);
}

#[test]
fn texture_decode_rejects_garbage() {
    assert!(KaleidoTexture::decode(b"definitely not an image").is_err());
}
