use crate::export::{Aspect, MAX_EXPORT_RESOLUTION, MIN_EXPORT_RESOLUTION};
use crate::modulator::ControlMode;
use crate::params::{ParamKey, ParamValue};
use anyhow::{Context, anyhow, bail};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "mandala_lab",
    version,
    about = "Animated parametric mandala generator with audio-reactive modulation"
)]
pub struct Config {
    #[arg(long, value_enum, default_value_t = AudioSourceArg::Off)]
    pub audio: AudioSourceArg,

    /// WAV file used when `--audio file`.
    #[arg(long)]
    pub audio_file: Option<PathBuf>,

    #[arg(long)]
    pub device: Option<String>,

    #[arg(long, default_value_t = false)]
    pub list_devices: bool,

    #[arg(long, value_enum, default_value_t = ControlModeArg::Geometry)]
    pub mode: ControlModeArg,

    #[arg(long, value_enum, default_value_t = AspectArg::Square)]
    pub aspect: AspectArg,

    #[arg(long, default_value_t = 30)]
    pub fps: u32,

    #[arg(long, default_value_t = 1024)]
    pub export_resolution: u32,

    #[arg(long, default_value = ".")]
    pub export_dir: PathBuf,

    /// Kaleidoscope source image.
    #[arg(long)]
    pub image: Option<PathBuf>,

    /// Preset to load at startup.
    #[arg(long)]
    pub preset: Option<String>,

    #[arg(long)]
    pub presets_file: Option<PathBuf>,

    /// Parameter assignment applied at startup, e.g. `--set symmetry=8`.
    #[arg(long = "set", value_name = "NAME=VALUE")]
    pub set: Vec<String>,

    /// Seed for randomize and the palette-swap draw.
    #[arg(long)]
    pub seed: Option<u64>,

    /// Identity passed to the access gate.
    #[arg(long, default_value = "local")]
    pub user: String,

    /// Tracing output goes here; the terminal belongs to the preview.
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    pub sync_updates: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum AudioSourceArg {
    #[value(alias = "none")]
    Off,
    #[value(alias = "microphone")]
    Mic,
    #[value(alias = "wav")]
    File,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum AspectArg {
    #[value(name = "1:1", alias = "square")]
    Square,
    #[value(name = "16:9", alias = "landscape")]
    Landscape,
    #[value(name = "9:16", alias = "portrait")]
    Portrait,
}

impl From<AspectArg> for Aspect {
    fn from(value: AspectArg) -> Self {
        match value {
            AspectArg::Square => Aspect::Square,
            AspectArg::Landscape => Aspect::Landscape,
            AspectArg::Portrait => Aspect::Portrait,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ControlModeArg {
    Geometry,
    #[value(alias = "kaleido")]
    Kaleidoscope,
    Both,
}

impl From<ControlModeArg> for ControlMode {
    fn from(value: ControlModeArg) -> Self {
        match value {
            ControlModeArg::Geometry => ControlMode::Geometry,
            ControlModeArg::Kaleidoscope => ControlMode::Kaleidoscope,
            ControlModeArg::Both => ControlMode::Both,
        }
    }
}

impl Config {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.fps == 0 || self.fps > 240 {
            bail!("--fps must be in 1..=240");
        }
        if !(MIN_EXPORT_RESOLUTION..=MAX_EXPORT_RESOLUTION).contains(&self.export_resolution) {
            bail!(
                "--export-resolution must be in {}..={}",
                MIN_EXPORT_RESOLUTION,
                MAX_EXPORT_RESOLUTION
            );
        }
        if self.audio == AudioSourceArg::File && self.audio_file.is_none() {
            bail!("--audio file requires --audio-file <PATH>");
        }
        for raw in &self.set {
            parse_assignment(raw).with_context(|| format!("invalid --set '{raw}'"))?;
        }
        Ok(())
    }

    /// Parsed `--set` assignments in command-line order.
    pub fn assignments(&self) -> anyhow::Result<Vec<(ParamKey, ParamValue)>> {
        self.set.iter().map(|raw| parse_assignment(raw)).collect()
    }
}

/// Parses `name=value` into a checked, clamped parameter value.
pub fn parse_assignment(raw: &str) -> anyhow::Result<(ParamKey, ParamValue)> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| anyhow!("expected NAME=VALUE"))?;
    let name = name.trim();
    let key = ParamKey::parse(name).ok_or_else(|| anyhow!("unknown parameter '{name}'"))?;
    let value = ParamValue::parse_for(key, value)?;
    Ok((key, value))
}
