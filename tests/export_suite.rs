#[allow(dead_code)]
#[path = "../src/bin/export_still.rs"]
mod export_still;

use clap::Parser;
use mandala_lab::config::AspectArg;
use mandala_lab::export::{
    Aspect, ExportError, MAX_EXPORT_RESOLUTION, MIN_EXPORT_RESOLUTION, PngStillEncoder,
    StillEncoder, default_file_name, export_dimensions,
};
use mandala_lab::params::{ParamKey, ParamValue};
use mandala_lab::preset::JsonFilePresetStore;
use mandala_lab::session::{AllowAll, RenderSession, StaticAccessGate};
use std::path::PathBuf;
use std::time::Instant;

struct FailingEncoder;

impl StillEncoder for FailingEncoder {
    fn mime_type(&self) -> &'static str {
        "image/png"
    }

    fn encode(&self, _width: u32, _height: u32, _rgba: &[u8]) -> Result<Vec<u8>, ExportError> {
        Err(ExportError::Encode("disk on fire".into()))
    }
}

fn session() -> RenderSession {
    let mut s = RenderSession::new(48, Some(48));
    let now = Instant::now();
    s.set_param(ParamKey::Stars, ParamValue::Bool(false), now).unwrap();
    s.set_param(ParamKey::Text, ParamValue::Text("EXPORT".into()), now)
        .unwrap();
    s
}

// ── CLI ─────────────────────────────────────────────────────────────────────

#[test]
fn parse_args_defaults_are_stable() {
    let args = export_still::Cli::try_parse_from(["export_still"]).expect("parse should succeed");
    assert_eq!(args.resolution, None);
    assert_eq!(args.aspect, None);
    assert_eq!(args.out, None);
    assert_eq!(args.time, 0.0);
    assert_eq!(args.fps, 30);
    assert!(args.set.is_empty());
    assert!(export_still::validate_args(&args).is_ok());
}

#[test]
fn parse_args_overrides_work() {
    let args = export_still::Cli::try_parse_from([
        "export_still",
        "--resolution",
        "2048",
        "--aspect",
        "16:9",
        "--out",
        "stills/one.png",
        "--time",
        "2.5",
        "--audio",
        "song.wav",
        "--preset",
        "night",
        "--set",
        "symmetry=6",
        "--set",
        "color1=#00ff00",
        "--seed",
        "7",
    ])
    .expect("parse should succeed");

    assert_eq!(args.resolution, Some(2048));
    assert_eq!(args.aspect, Some(AspectArg::Landscape));
    assert_eq!(args.out, Some(PathBuf::from("stills/one.png")));
    assert_eq!(args.time, 2.5);
    assert_eq!(args.audio, Some(PathBuf::from("song.wav")));
    assert_eq!(args.preset.as_deref(), Some("night"));
    assert_eq!(args.set, vec!["symmetry=6", "color1=#00ff00"]);
    assert_eq!(args.seed, 7);
    assert!(export_still::validate_args(&args).is_ok());
}

#[test]
fn validate_rejects_negative_time_and_zero_fps() {
    let args = export_still::Cli::try_parse_from(["export_still", "--time=-1"]).unwrap();
    assert!(export_still::validate_args(&args).is_err());
    let args = export_still::Cli::try_parse_from(["export_still", "--fps", "0"]).unwrap();
    assert!(export_still::validate_args(&args).is_err());
}

#[test]
fn step_count_is_repeatable_for_fractional_edges() {
    assert_eq!(export_still::step_count(1.0 / 3.0, 30), 10);
    assert_eq!(export_still::step_count(0.01, 60), 1);
    assert_eq!(export_still::step_count(-2.0, 60), 0);
}

fn saved_wide_preset(tag: &str) -> (PathBuf, PathBuf) {
    let dir = std::env::temp_dir().join(format!(
        "mandala_lab_export_{tag}_{}",
        std::process::id()
    ));
    let file = dir.join("presets.json");
    let mut s = session();
    s.set_aspect(Aspect::Landscape);
    s.set_export_resolution(2048);
    s.set_param(ParamKey::Symmetry, ParamValue::Float(9.0), Instant::now())
        .unwrap();
    let mut store = JsonFilePresetStore::new(file.clone());
    s.save_preset(&mut store, "wide").unwrap();
    (dir, file)
}

#[test]
fn preset_supplies_aspect_and_resolution_when_flags_are_absent() {
    let (dir, file) = saved_wide_preset("preset_only");
    let args = export_still::Cli::try_parse_from([
        "export_still",
        "--preset",
        "wide",
        "--presets-file",
        file.to_str().unwrap(),
    ])
    .unwrap();
    assert!(export_still::validate_args(&args).is_ok());

    let s = export_still::build_session(&args, Instant::now()).unwrap();
    assert_eq!(s.aspect(), Aspect::Landscape);
    assert_eq!(s.export_resolution(), 2048);
    assert_eq!(s.export_size(), (2048, 1152));
    assert_eq!(s.store().float(ParamKey::Symmetry), 9.0);
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn explicit_flags_override_the_preset() {
    let (dir, file) = saved_wide_preset("flags_win");
    let args = export_still::Cli::try_parse_from([
        "export_still",
        "--preset",
        "wide",
        "--presets-file",
        file.to_str().unwrap(),
        "--aspect",
        "1:1",
        "--resolution",
        "512",
        "--set",
        "symmetry=5",
    ])
    .unwrap();

    let mut s = export_still::build_session(&args, Instant::now()).unwrap();
    assert_eq!(s.aspect(), Aspect::Square);
    assert_eq!(s.export_resolution(), 512);
    assert_eq!(s.store().float(ParamKey::Symmetry), 5.0);

    let still = s.capture(s.export_resolution(), &PngStillEncoder).unwrap();
    assert_eq!((still.width, still.height), (512, 512));
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn missing_preset_fails_the_export() {
    let (dir, file) = saved_wide_preset("missing");
    let args = export_still::Cli::try_parse_from([
        "export_still",
        "--preset",
        "narrow",
        "--presets-file",
        file.to_str().unwrap(),
    ])
    .unwrap();
    assert!(export_still::build_session(&args, Instant::now()).is_err());
    let _ = std::fs::remove_dir_all(&dir);
}

// ── Sizing ──────────────────────────────────────────────────────────────────

#[test]
fn export_dimensions_follow_the_aspect() {
    assert_eq!(export_dimensions(1024, Aspect::Square), (1024, 1024));
    assert_eq!(export_dimensions(1920, Aspect::Landscape), (1920, 1080));
    assert_eq!(export_dimensions(1080, Aspect::Portrait), (1080, 1920));
    assert_eq!(
        export_dimensions(10, Aspect::Square),
        (MIN_EXPORT_RESOLUTION, MIN_EXPORT_RESOLUTION)
    );
    assert_eq!(
        export_dimensions(100_000, Aspect::Landscape).0,
        MAX_EXPORT_RESOLUTION
    );
}

#[test]
fn aspect_parses_ratios_and_names() {
    assert_eq!(Aspect::parse("16:9"), Some(Aspect::Landscape));
    assert_eq!(Aspect::parse(" portrait "), Some(Aspect::Portrait));
    assert_eq!(Aspect::parse("4:3"), None);
    assert_eq!(Aspect::Portrait.next(), Aspect::Square);
}

#[test]
fn default_file_name_names_the_resolution() {
    let name = default_file_name(2048);
    assert!(name.starts_with("mandala-2048px-"));
    assert!(name.ends_with(".png"));
}

// ── Capture ─────────────────────────────────────────────────────────────────

#[test]
fn capture_produces_png_at_export_size() {
    let mut s = session();
    s.set_aspect(Aspect::Landscape);
    let still = s.capture(128, &PngStillEncoder).unwrap();
    assert_eq!((still.width, still.height), (128, 72));
    assert_eq!(still.rgba.len(), 128 * 72 * 4);
    assert_eq!(&still.encoded[..8], b"\x89PNG\r\n\x1a\n");
    assert!(still.to_data_url().starts_with("data:image/png;base64,"));

    let decoded = image::load_from_memory(&still.encoded).unwrap().to_rgba8();
    assert_eq!(decoded.dimensions(), (128, 72));
    assert_eq!(decoded.as_raw(), &still.rgba);
}

#[test]
fn capture_clamps_tiny_resolutions() {
    let mut s = session();
    let still = s.capture(MIN_EXPORT_RESOLUTION - 1, &PngStillEncoder).unwrap();
    assert_eq!(still.width, MIN_EXPORT_RESOLUTION);
}

#[test]
fn export_resolution_does_not_touch_the_preview() {
    let mut s = session();
    let before = s.preview_size();
    s.set_export_resolution(4096);
    assert_eq!(s.preview_size(), before);
    assert_eq!(s.export_resolution(), 4096);
    assert_eq!(s.export_size(), (4096, 4096));

    s.set_export_resolution(1);
    assert_eq!(s.export_resolution(), MIN_EXPORT_RESOLUTION);
}

#[test]
fn capture_restores_the_preview_pixel_for_pixel() {
    let mut s = session();
    s.set_paused(true);
    let now = Instant::now();
    s.tick(0.016, now).unwrap();
    let preview_before = s.frame().to_vec();
    let size_before = s.preview_size();
    let time_before = s.clock().time();

    s.capture(256, &PngStillEncoder).unwrap();

    assert_eq!(s.preview_size(), size_before);
    assert_eq!(
        s.render_target_size(),
        Some((size_before.width, size_before.height))
    );
    assert_eq!(s.clock().time(), time_before);
    assert_eq!(s.frame(), preview_before.as_slice());
}

#[test]
fn capture_does_not_unpause_or_advance_a_running_clock() {
    let mut s = session();
    let now = Instant::now();
    s.tick(0.5, now).unwrap();
    let t = s.clock().time();
    s.capture(96, &PngStillEncoder).unwrap();
    assert_eq!(s.clock().time(), t);
    assert!(s.clock().is_running());
}

#[test]
fn same_aspect_at_any_resolution_shows_the_same_picture() {
    let mut s = RenderSession::new(48, Some(48));
    s.set_param(ParamKey::Stars, ParamValue::Bool(false), Instant::now())
        .unwrap();
    let mean = |still: &mandala_lab::export::ExportedStill| {
        let mut sum = [0f64; 3];
        for px in still.rgba.chunks_exact(4) {
            for c in 0..3 {
                sum[c] += px[c] as f64;
            }
        }
        let n = (still.width * still.height) as f64;
        sum.map(|v| v / n)
    };
    let small = mean(&s.capture(128, &PngStillEncoder).unwrap());
    let large = mean(&s.capture(512, &PngStillEncoder).unwrap());
    for c in 0..3 {
        assert!(
            (small[c] - large[c]).abs() < 12.0,
            "average colour diverges: {small:?} vs {large:?}"
        );
    }
}

#[test]
fn failed_encode_reports_and_restores_preview() {
    let mut s = session();
    s.tick(0.0, Instant::now()).unwrap();
    let before = s.frame().to_vec();
    let size = s.preview_size();

    let err = s.capture(512, &FailingEncoder).unwrap_err();
    assert!(matches!(err, ExportError::Encode(_)));
    assert_eq!(s.render_target_size(), Some((size.width, size.height)));
    assert_eq!(s.frame(), before.as_slice());
    assert!(s.is_enabled());
}

#[test]
fn denied_access_disables_capture() {
    let mut s = session();
    assert!(!s.check_access(&StaticAccessGate::new(["alice"]), "mallory"));
    assert!(!s.is_enabled());
    assert!(matches!(
        s.capture(128, &PngStillEncoder),
        Err(ExportError::Unavailable(_))
    ));
    assert!(s.tick(0.016, Instant::now()).is_none());

    let mut ok = session();
    assert!(ok.check_access(&AllowAll, "anyone"));
    assert!(ok.check_access(&StaticAccessGate::new(["alice"]), "alice"));
    assert!(ok.is_enabled());
}

#[test]
fn saved_still_matches_encoded_bytes() {
    let dir = std::env::temp_dir().join(format!("mandala_lab_export_{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(default_file_name(64));

    let mut s = session();
    let still = s.capture(64, &PngStillEncoder).unwrap();
    still.save(&path).unwrap();
    assert_eq!(std::fs::read(&path).unwrap(), still.encoded);

    let missing_dir = dir.join("nope").join("still.png");
    assert!(matches!(
        still.save(&missing_dir),
        Err(ExportError::Io { .. })
    ));
    let _ = std::fs::remove_dir_all(&dir);
}
