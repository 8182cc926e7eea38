use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use clap::Parser;
use mandala_lab::audio::{AudioClip, AudioFeed};
use mandala_lab::config::{AspectArg, parse_assignment};
use mandala_lab::export::{
    MAX_EXPORT_RESOLUTION, MIN_EXPORT_RESOLUTION, PngStillEncoder, default_file_name,
};
use mandala_lab::modulator::AudioModulator;
use mandala_lab::preset::{JsonFilePresetStore, preset_storage_path};
use mandala_lab::session::{AllowAll, RenderSession};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

/// Preview target used while stepping the animation; the still itself is rendered at
/// the export size.
const STEP_CONTAINER: usize = 64;
const DEFAULT_SEED: u64 = 0x3A4D_2026;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "export_still",
    version,
    about = "Headless mandala still export (PNG)"
)]
pub(crate) struct Cli {
    /// Output width in pixels; height follows the aspect. Falls back to the preset's
    /// export resolution, then 1024.
    #[arg(long)]
    pub(crate) resolution: Option<u32>,

    /// Falls back to the preset's aspect, then 1:1.
    #[arg(long, value_enum)]
    pub(crate) aspect: Option<AspectArg>,

    /// Output file; defaults to `mandala-<res>px-<millis>.png`.
    #[arg(long, value_name = "PNG")]
    pub(crate) out: Option<PathBuf>,

    /// Animation time of the still, in seconds.
    #[arg(long, value_name = "SECONDS", default_value_t = 0.0)]
    pub(crate) time: f32,

    /// Steps per second while advancing to `--time`.
    #[arg(long, default_value_t = 30)]
    pub(crate) fps: u32,

    #[arg(long)]
    pub(crate) image: Option<PathBuf>,

    /// WAV that modulates the parameters up to `--time`.
    #[arg(long, value_name = "WAV")]
    pub(crate) audio: Option<PathBuf>,

    #[arg(long)]
    pub(crate) preset: Option<String>,

    #[arg(long)]
    pub(crate) presets_file: Option<PathBuf>,

    #[arg(long = "set", value_name = "NAME=VALUE")]
    pub(crate) set: Vec<String>,

    #[arg(long, default_value_t = DEFAULT_SEED)]
    pub(crate) seed: u64,
}

pub(crate) fn validate_args(args: &Cli) -> Result<()> {
    if args
        .resolution
        .is_some_and(|r| !(MIN_EXPORT_RESOLUTION..=MAX_EXPORT_RESOLUTION).contains(&r))
    {
        bail!(
            "--resolution must be in {}..={}",
            MIN_EXPORT_RESOLUTION,
            MAX_EXPORT_RESOLUTION
        );
    }
    if !args.time.is_finite() || args.time < 0.0 {
        bail!("--time must be >= 0 seconds");
    }
    if args.fps == 0 || args.fps > 240 {
        bail!("--fps must be in 1..=240");
    }
    for raw in &args.set {
        parse_assignment(raw).with_context(|| format!("invalid --set '{raw}'"))?;
    }
    Ok(())
}

/// Steps needed to reach `time` at `fps`; the last step lands exactly on `time`.
pub(crate) fn step_count(time: f32, fps: u32) -> usize {
    (time.max(0.0) * fps.max(1) as f32).ceil() as usize
}

pub(crate) fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    // A second install (tests) keeps the first subscriber.
    let _ = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .try_init();
}

fn main() -> Result<()> {
    init_logging();
    let args = Cli::parse();
    run(args)
}

/// Sets up the session the still is taken from: preset first, then the explicit
/// `--aspect`, `--resolution` and `--set` flags on top, then image and audio inputs.
pub(crate) fn build_session(args: &Cli, start: Instant) -> Result<RenderSession> {
    let modulator = AudioModulator::with_rng(fastrand::Rng::with_seed(args.seed));
    let mut session = RenderSession::with_modulator(STEP_CONTAINER, Some(STEP_CONTAINER), modulator);
    session.check_access(&AllowAll, "export");
    if let Some(reason) = session.diagnostic() {
        bail!("rendering unavailable: {reason}");
    }

    if let Some(name) = &args.preset {
        let path = args
            .presets_file
            .clone()
            .or_else(preset_storage_path)
            .context("no preset storage location")?;
        let store = JsonFilePresetStore::new(path);
        let load = session
            .load_preset(&store, name, start)
            .with_context(|| format!("load preset '{name}'"))?;
        debug!(name = %name, fallbacks = load.fallbacks.len(), "preset loaded");
    }
    if let Some(aspect) = args.aspect {
        session.set_aspect(aspect.into());
    }
    if let Some(resolution) = args.resolution {
        session.set_export_resolution(resolution);
    }
    for raw in &args.set {
        let (key, value) = parse_assignment(raw)?;
        session.set_param(key, value, start)?;
    }
    if let Some(path) = &args.image {
        session
            .load_image(path, start)
            .with_context(|| format!("load image {}", path.display()))?;
    }
    if let Some(path) = &args.audio {
        let clip = AudioClip::open(path).with_context(|| format!("read wav {}", path.display()))?;
        session.enable_audio(AudioFeed::clip(clip, start), start);
    }
    Ok(session)
}

fn run(args: Cli) -> Result<()> {
    validate_args(&args)?;

    let start = Instant::now();
    let mut session = build_session(&args, start)?;
    advance_to(&mut session, args.time, args.fps, start);

    let resolution = session.export_resolution();
    info!(resolution, aspect = ?session.aspect(), time = args.time, "exporting still");
    let still = session
        .capture(resolution, &PngStillEncoder)
        .context("capture still")?;

    let out = args
        .out
        .clone()
        .unwrap_or_else(|| PathBuf::from(default_file_name(resolution)));
    let mut parent = out.parent().unwrap_or_else(|| Path::new(""));
    if parent == Path::new("") {
        parent = Path::new(".");
    }
    fs::create_dir_all(parent)
        .with_context(|| format!("create output directory {}", parent.display()))?;
    still
        .save(&out)
        .with_context(|| format!("write {}", out.display()))?;

    println!(
        "export complete: {} ({}x{}, t={:.2}s)",
        out.display(),
        still.width,
        still.height,
        session.clock().time()
    );
    Ok(())
}

/// Advances the clock to `time` in fixed steps on a synthetic timeline, so audio
/// modulation and override expiry see the same instants on every run.
fn advance_to(session: &mut RenderSession, time: f32, fps: u32, start: Instant) {
    let steps = step_count(time, fps);
    let mut elapsed = 0.0f32;
    for i in 1..=steps {
        let target = (i as f32 / fps as f32).min(time);
        let dt = target - elapsed;
        elapsed = target;
        let now = start + Duration::from_secs_f32(target);
        let _ = session.tick(dt, now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(extra: &[&str]) -> Cli {
        let mut argv = vec!["export_still"];
        argv.extend_from_slice(extra);
        Cli::try_parse_from(argv).expect("parse should succeed")
    }

    #[test]
    fn step_count_reaches_requested_time() {
        assert_eq!(step_count(0.0, 30), 0);
        assert_eq!(step_count(1.0, 30), 30);
        assert_eq!(step_count(0.05, 30), 2);
    }

    #[test]
    fn validate_rejects_out_of_range_resolution() {
        assert!(validate_args(&cli(&["--resolution", "32"])).is_err());
        assert!(validate_args(&cli(&["--resolution", "9000"])).is_err());
        assert!(validate_args(&cli(&["--resolution", "2048"])).is_ok());
    }

    #[test]
    fn validate_rejects_bad_assignments() {
        assert!(validate_args(&cli(&["--set", "symmetry"])).is_err());
        assert!(validate_args(&cli(&["--set", "nope=1"])).is_err());
        assert!(validate_args(&cli(&["--set", "symmetry=8"])).is_ok());
    }

    #[test]
    fn advance_lands_on_requested_time() {
        let mut session = RenderSession::new(STEP_CONTAINER, Some(STEP_CONTAINER));
        advance_to(&mut session, 0.5, 30, Instant::now());
        assert!((session.clock().time() - 0.5).abs() < 1e-4);
    }

    #[test]
    fn logging_can_be_initialised_twice() {
        init_logging();
        init_logging();
    }

    #[test]
    fn without_flags_the_session_keeps_its_defaults() {
        let session = build_session(&cli(&[]), Instant::now()).unwrap();
        assert_eq!(session.export_resolution(), 1024);
        assert_eq!(session.aspect(), mandala_lab::export::Aspect::Square);
    }
}
