//! The parameter store: a flat name → value map that is the single source of truth for
//! the renderer, the overlay, the audio modulator and presets.

use crate::arbiter::OverrideArbiter;
use crate::modulator::ControlMode;
use std::f32::consts::TAU;
use std::fmt;
use std::time::Instant;
use thiserror::Error;

pub const PARAM_COUNT: usize = 38;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ParamKey {
    Symmetry,
    Scale,
    Center,
    Speed,
    Glow,
    Seed,
    Color1,
    Color2,
    Color3,
    GradientMix,
    BackgroundDim,
    EffectType,
    EffectAmp,
    EffectFreq,
    Stars,
    StarDensity,
    StarIntensity,
    StarSeed,
    ImageEnabled,
    ImageMix,
    ImageScale,
    ImageRotation,
    ImageCenter,
    ImageMirror,
    ImageHue,
    ImageSaturation,
    ImageLightness,
    TextEnabled,
    Text,
    TextSize,
    TextX,
    TextY,
    TextAlign,
    TextColor,
    TextBold,
    AudioIntensity,
    AudioSensitivity,
    AudioMode,
}

/// Presentational grouping only; the store itself is flat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamGroup {
    Geometry,
    Color,
    Effects,
    Stars,
    Image,
    Text,
    Audio,
}

impl ParamGroup {
    pub fn label(self) -> &'static str {
        match self {
            Self::Geometry => "geometry",
            Self::Color => "color",
            Self::Effects => "effects",
            Self::Stars => "stars",
            Self::Image => "image",
            Self::Text => "text",
            Self::Audio => "audio",
        }
    }
}

impl ParamKey {
    pub const ALL: [Self; PARAM_COUNT] = [
        Self::Symmetry,
        Self::Scale,
        Self::Center,
        Self::Speed,
        Self::Glow,
        Self::Seed,
        Self::Color1,
        Self::Color2,
        Self::Color3,
        Self::GradientMix,
        Self::BackgroundDim,
        Self::EffectType,
        Self::EffectAmp,
        Self::EffectFreq,
        Self::Stars,
        Self::StarDensity,
        Self::StarIntensity,
        Self::StarSeed,
        Self::ImageEnabled,
        Self::ImageMix,
        Self::ImageScale,
        Self::ImageRotation,
        Self::ImageCenter,
        Self::ImageMirror,
        Self::ImageHue,
        Self::ImageSaturation,
        Self::ImageLightness,
        Self::TextEnabled,
        Self::Text,
        Self::TextSize,
        Self::TextX,
        Self::TextY,
        Self::TextAlign,
        Self::TextColor,
        Self::TextBold,
        Self::AudioIntensity,
        Self::AudioSensitivity,
        Self::AudioMode,
    ];

    /// The three gradient colours. Overrides on these are evaluated as a group.
    pub const PALETTE: [Self; 3] = [Self::Color1, Self::Color2, Self::Color3];

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|k| k.as_str() == s)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Symmetry => "symmetry",
            Self::Scale => "scale",
            Self::Center => "center",
            Self::Speed => "speed",
            Self::Glow => "glow",
            Self::Seed => "seed",
            Self::Color1 => "color1",
            Self::Color2 => "color2",
            Self::Color3 => "color3",
            Self::GradientMix => "gradient_mix",
            Self::BackgroundDim => "background_dim",
            Self::EffectType => "effect_type",
            Self::EffectAmp => "effect_amp",
            Self::EffectFreq => "effect_freq",
            Self::Stars => "stars",
            Self::StarDensity => "star_density",
            Self::StarIntensity => "star_intensity",
            Self::StarSeed => "star_seed",
            Self::ImageEnabled => "image_enabled",
            Self::ImageMix => "image_mix",
            Self::ImageScale => "image_scale",
            Self::ImageRotation => "image_rotation",
            Self::ImageCenter => "image_center",
            Self::ImageMirror => "image_mirror",
            Self::ImageHue => "image_hue",
            Self::ImageSaturation => "image_saturation",
            Self::ImageLightness => "image_lightness",
            Self::TextEnabled => "text_enabled",
            Self::Text => "text",
            Self::TextSize => "text_size",
            Self::TextX => "text_x",
            Self::TextY => "text_y",
            Self::TextAlign => "text_align",
            Self::TextColor => "text_color",
            Self::TextBold => "text_bold",
            Self::AudioIntensity => "audio_intensity",
            Self::AudioSensitivity => "audio_sensitivity",
            Self::AudioMode => "audio_mode",
        }
    }

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn group(self) -> ParamGroup {
        match self {
            Self::Symmetry | Self::Scale | Self::Center | Self::Speed | Self::Glow | Self::Seed => {
                ParamGroup::Geometry
            }
            Self::Color1
            | Self::Color2
            | Self::Color3
            | Self::GradientMix
            | Self::BackgroundDim => ParamGroup::Color,
            Self::EffectType | Self::EffectAmp | Self::EffectFreq => ParamGroup::Effects,
            Self::Stars | Self::StarDensity | Self::StarIntensity | Self::StarSeed => {
                ParamGroup::Stars
            }
            Self::ImageEnabled
            | Self::ImageMix
            | Self::ImageScale
            | Self::ImageRotation
            | Self::ImageCenter
            | Self::ImageMirror
            | Self::ImageHue
            | Self::ImageSaturation
            | Self::ImageLightness => ParamGroup::Image,
            Self::TextEnabled
            | Self::Text
            | Self::TextSize
            | Self::TextX
            | Self::TextY
            | Self::TextAlign
            | Self::TextColor
            | Self::TextBold => ParamGroup::Text,
            Self::AudioIntensity | Self::AudioSensitivity | Self::AudioMode => ParamGroup::Audio,
        }
    }

    pub fn kind(self) -> ParamKind {
        use ParamKind::*;
        match self {
            Self::Symmetry => float(1.0, 32.0, 1.0),
            Self::Scale => float(0.5, 3.0, 0.05),
            Self::Center => Point { min: -0.5, max: 0.5, step: 0.01 },
            Self::Speed => float(0.1, 2.0, 0.05),
            Self::Glow => float(0.2, 3.0, 0.05),
            Self::Seed => float(0.0, 1.0, 0.01),
            Self::Color1 | Self::Color2 | Self::Color3 | Self::TextColor => Color,
            Self::GradientMix => float(0.0, 1.0, 0.01),
            Self::BackgroundDim => float(0.0, 1.0, 0.01),
            Self::EffectType => Effect,
            Self::EffectAmp => float(0.0, 1.0, 0.01),
            Self::EffectFreq => float(0.0, 1.0, 0.01),
            Self::Stars | Self::ImageEnabled | Self::ImageMirror | Self::TextEnabled => Bool,
            Self::TextBold => Bool,
            Self::StarDensity => float(0.01, 0.2, 0.01),
            Self::StarIntensity => float(0.1, 1.0, 0.1),
            Self::StarSeed => float(0.0, 1.0, 0.01),
            Self::ImageMix => float(0.0, 1.0, 0.01),
            Self::ImageScale => float(0.1, 4.0, 0.05),
            Self::ImageRotation => float(0.0, TAU, 0.05),
            Self::ImageCenter => Point { min: -1.0, max: 1.0, step: 0.01 },
            Self::ImageHue => float(0.0, 1.0, 0.01),
            Self::ImageSaturation => float(0.0, 2.0, 0.05),
            Self::ImageLightness => float(-1.0, 1.0, 0.05),
            Self::Text => Text,
            Self::TextSize => float(12.0, 128.0, 1.0),
            Self::TextX | Self::TextY => float(0.0, 100.0, 1.0),
            Self::TextAlign => Align,
            Self::AudioIntensity => float(0.0, 2.0, 0.05),
            Self::AudioSensitivity => float(0.0, 3.0, 0.05),
            Self::AudioMode => Mode,
        }
    }

    pub fn default_value(self) -> ParamValue {
        use ParamValue::*;
        match self {
            Self::Symmetry => Float(12.0),
            Self::Scale => Float(1.2),
            Self::Center => Point([0.0, 0.0]),
            Self::Speed => Float(0.6),
            Self::Glow => Float(1.2),
            Self::Seed => Float(0.5),
            Self::Color1 => Color(Rgb8::new(0xff, 0x6b, 0x6b)),
            Self::Color2 => Color(Rgb8::new(0xff, 0xa7, 0x26)),
            Self::Color3 => Color(Rgb8::new(0xff, 0xcc, 0x02)),
            Self::GradientMix => Float(0.7),
            Self::BackgroundDim => Float(0.0),
            Self::EffectType => Effect(EffectKind::None),
            Self::EffectAmp => Float(0.3),
            Self::EffectFreq => Float(0.8),
            Self::Stars => Bool(true),
            Self::StarDensity => Float(0.05),
            Self::StarIntensity => Float(0.8),
            Self::StarSeed => Float(0.5),
            Self::ImageEnabled => Bool(false),
            Self::ImageMix => Float(1.0),
            Self::ImageScale => Float(1.0),
            Self::ImageRotation => Float(0.0),
            Self::ImageCenter => Point([0.0, 0.0]),
            Self::ImageMirror => Bool(false),
            Self::ImageHue => Float(0.0),
            Self::ImageSaturation => Float(1.0),
            Self::ImageLightness => Float(0.0),
            Self::TextEnabled => Bool(true),
            Self::Text => Text("Mandala Art".to_string()),
            Self::TextSize => Float(48.0),
            Self::TextX => Float(50.0),
            Self::TextY => Float(85.0),
            Self::TextAlign => Align(TextAlign::Center),
            Self::TextColor => Color(Rgb8::new(0xff, 0xff, 0xff)),
            Self::TextBold => Bool(false),
            Self::AudioIntensity => Float(1.0),
            Self::AudioSensitivity => Float(1.0),
            Self::AudioMode => Mode(ControlMode::Geometry),
        }
    }

    /// Checks the value's kind against this key and clamps it into range.
    pub fn normalize(self, value: ParamValue) -> Result<ParamValue, ParamError> {
        let kind = self.kind();
        match (kind, value) {
            (ParamKind::Float { min, max, .. }, ParamValue::Float(v)) => {
                if !v.is_finite() {
                    return Err(ParamError::NotFinite(self));
                }
                Ok(ParamValue::Float(v.clamp(min, max)))
            }
            (ParamKind::Point { min, max, .. }, ParamValue::Point([x, y])) => {
                if !x.is_finite() || !y.is_finite() {
                    return Err(ParamError::NotFinite(self));
                }
                Ok(ParamValue::Point([x.clamp(min, max), y.clamp(min, max)]))
            }
            (ParamKind::Bool, v @ ParamValue::Bool(_))
            | (ParamKind::Color, v @ ParamValue::Color(_))
            | (ParamKind::Text, v @ ParamValue::Text(_))
            | (ParamKind::Effect, v @ ParamValue::Effect(_))
            | (ParamKind::Align, v @ ParamValue::Align(_))
            | (ParamKind::Mode, v @ ParamValue::Mode(_)) => Ok(v),
            (kind, value) => Err(ParamError::KindMismatch {
                key: self,
                expected: kind.label(),
                got: value.kind_label(),
            }),
        }
    }
}

impl fmt::Display for ParamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const fn float(min: f32, max: f32, step: f32) -> ParamKind {
    ParamKind::Float { min, max, step }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ParamKind {
    Float { min: f32, max: f32, step: f32 },
    Point { min: f32, max: f32, step: f32 },
    Bool,
    Color,
    Text,
    Effect,
    Align,
    Mode,
}

impl ParamKind {
    pub fn label(self) -> &'static str {
        match self {
            Self::Float { .. } => "float",
            Self::Point { .. } => "point",
            Self::Bool => "bool",
            Self::Color => "color",
            Self::Text => "text",
            Self::Effect => "effect",
            Self::Align => "align",
            Self::Mode => "mode",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rgb8 {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb8 {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Accepts `#rrggbb`, `rrggbb` and the `#rgb` shorthand.
    pub fn parse_hex(s: &str) -> Option<Self> {
        let hex = s.trim().trim_start_matches('#');
        let expanded;
        let hex = match hex.len() {
            6 => hex,
            3 => {
                expanded = hex.chars().flat_map(|c| [c, c]).collect::<String>();
                expanded.as_str()
            }
            _ => return None,
        };
        let v = u32::from_str_radix(hex, 16).ok()?;
        Some(Self::new((v >> 16) as u8, (v >> 8) as u8, v as u8))
    }

    pub fn to_hex(self) -> String {
        format!("#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }

    pub fn to_unit(self) -> [f32; 3] {
        [
            self.r as f32 / 255.0,
            self.g as f32 / 255.0,
            self.b as f32 / 255.0,
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EffectKind {
    None,
    Ripple,
    Wave,
}

impl EffectKind {
    pub const ALL: [Self; 3] = [Self::None, Self::Ripple, Self::Wave];

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "none" | "off" => Some(Self::None),
            "ripple" => Some(Self::Ripple),
            "wave" => Some(Self::Wave),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Ripple => "ripple",
            Self::Wave => "wave",
        }
    }

    pub fn next(self) -> Self {
        match self {
            Self::None => Self::Ripple,
            Self::Ripple => Self::Wave,
            Self::Wave => Self::None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextAlign {
    Left,
    Center,
    Right,
}

impl TextAlign {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "left" | "start" => Some(Self::Left),
            "center" | "centre" => Some(Self::Center),
            "right" | "end" => Some(Self::Right),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Left => "left",
            Self::Center => "center",
            Self::Right => "right",
        }
    }

    pub fn next(self) -> Self {
        match self {
            Self::Left => Self::Center,
            Self::Center => Self::Right,
            Self::Right => Self::Left,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Float(f32),
    Point([f32; 2]),
    Bool(bool),
    Color(Rgb8),
    Text(String),
    Effect(EffectKind),
    Align(TextAlign),
    Mode(ControlMode),
}

impl ParamValue {
    pub fn kind_label(&self) -> &'static str {
        match self {
            Self::Float(_) => "float",
            Self::Point(_) => "point",
            Self::Bool(_) => "bool",
            Self::Color(_) => "color",
            Self::Text(_) => "text",
            Self::Effect(_) => "effect",
            Self::Align(_) => "align",
            Self::Mode(_) => "mode",
        }
    }

    pub fn as_float(&self) -> Option<f32> {
        match self {
            Self::Float(v) => Some(*v),
            _ => None,
        }
    }

    /// Parses the textual form used on the command line (`--set name=value`).
    pub fn parse_for(key: ParamKey, raw: &str) -> Result<Self, ParamError> {
        let raw = raw.trim();
        let bad = || ParamError::Parse {
            key,
            raw: raw.to_string(),
        };
        let value = match key.kind() {
            ParamKind::Float { .. } => Self::Float(raw.parse::<f32>().map_err(|_| bad())?),
            ParamKind::Point { .. } => {
                let (x, y) = raw.split_once(',').ok_or_else(bad)?;
                let x = x.trim().parse::<f32>().map_err(|_| bad())?;
                let y = y.trim().parse::<f32>().map_err(|_| bad())?;
                Self::Point([x, y])
            }
            ParamKind::Bool => Self::Bool(parse_bool(raw).ok_or_else(bad)?),
            ParamKind::Color => Self::Color(Rgb8::parse_hex(raw).ok_or_else(bad)?),
            ParamKind::Text => Self::Text(raw.replace("\\n", "\n")),
            ParamKind::Effect => Self::Effect(EffectKind::parse(raw).ok_or_else(bad)?),
            ParamKind::Align => Self::Align(TextAlign::parse(raw).ok_or_else(bad)?),
            ParamKind::Mode => Self::Mode(ControlMode::parse(raw).ok_or_else(bad)?),
        };
        key.normalize(value)
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Float(v) => write!(f, "{v:.2}"),
            Self::Point([x, y]) => write!(f, "{x:.2},{y:.2}"),
            Self::Bool(v) => write!(f, "{}", if *v { "on" } else { "off" }),
            Self::Color(c) => f.write_str(&c.to_hex()),
            Self::Text(s) => write!(f, "{:?}", s),
            Self::Effect(e) => f.write_str(e.as_str()),
            Self::Align(a) => f.write_str(a.as_str()),
            Self::Mode(m) => f.write_str(m.as_str()),
        }
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Who is writing. Only `User` writes create override bookkeeping and only `Modulator`
/// writes can be refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    User,
    Modulator,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Applied,
    Blocked,
}

impl WriteOutcome {
    pub fn applied(self) -> bool {
        self == Self::Applied
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParamError {
    #[error("parameter '{key}' expects a {expected} value, got {got}")]
    KindMismatch {
        key: ParamKey,
        expected: &'static str,
        got: &'static str,
    },
    #[error("parameter '{0}' must be finite")]
    NotFinite(ParamKey),
    #[error("unknown parameter '{0}'")]
    UnknownKey(String),
    #[error("cannot parse '{raw}' for parameter '{key}'")]
    Parse { key: ParamKey, raw: String },
}

#[derive(Debug, Clone)]
pub struct ParamStore {
    values: Vec<ParamValue>,
    arbiter: OverrideArbiter,
    modulation_active: bool,
}

impl Default for ParamStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ParamStore {
    pub fn new() -> Self {
        Self {
            values: ParamKey::ALL.iter().map(|k| k.default_value()).collect(),
            arbiter: OverrideArbiter::new(),
            modulation_active: false,
        }
    }

    pub fn get(&self, key: ParamKey) -> &ParamValue {
        &self.values[key.index()]
    }

    pub fn float(&self, key: ParamKey) -> f32 {
        self.get(key).as_float().unwrap_or(0.0)
    }

    pub fn flag(&self, key: ParamKey) -> bool {
        matches!(self.get(key), ParamValue::Bool(true))
    }

    pub fn color(&self, key: ParamKey) -> Rgb8 {
        match self.get(key) {
            ParamValue::Color(c) => *c,
            _ => Rgb8::new(0, 0, 0),
        }
    }

    pub fn point(&self, key: ParamKey) -> [f32; 2] {
        match self.get(key) {
            ParamValue::Point(p) => *p,
            _ => [0.0, 0.0],
        }
    }

    pub fn text(&self, key: ParamKey) -> &str {
        match self.get(key) {
            ParamValue::Text(s) => s,
            _ => "",
        }
    }

    pub fn effect(&self) -> EffectKind {
        match self.get(ParamKey::EffectType) {
            ParamValue::Effect(e) => *e,
            _ => EffectKind::None,
        }
    }

    pub fn text_align(&self) -> TextAlign {
        match self.get(ParamKey::TextAlign) {
            ParamValue::Align(a) => *a,
            _ => TextAlign::Center,
        }
    }

    pub fn control_mode(&self) -> ControlMode {
        match self.get(ParamKey::AudioMode) {
            ParamValue::Mode(m) => *m,
            _ => ControlMode::Geometry,
        }
    }

    /// Writes `value` on behalf of `origin`.
    ///
    /// A modulator write to a parameter the user currently owns is dropped and reported
    /// as [`WriteOutcome::Blocked`]. A user write while modulation is active re-arms that
    /// parameter's override window.
    pub fn set(
        &mut self,
        key: ParamKey,
        value: ParamValue,
        origin: Origin,
        now: Instant,
    ) -> Result<WriteOutcome, ParamError> {
        let value = key.normalize(value)?;
        match origin {
            Origin::Modulator => {
                if self.arbiter.is_overridden(key, now) {
                    return Ok(WriteOutcome::Blocked);
                }
            }
            Origin::User => {
                if self.modulation_active {
                    self.arbiter.mark_overridden(key, now);
                }
            }
            Origin::System => {}
        }
        self.values[key.index()] = value;
        Ok(WriteOutcome::Applied)
    }

    pub fn set_by_name(
        &mut self,
        name: &str,
        raw: &str,
        origin: Origin,
        now: Instant,
    ) -> Result<WriteOutcome, ParamError> {
        let key = ParamKey::parse(name).ok_or_else(|| ParamError::UnknownKey(name.to_string()))?;
        let value = ParamValue::parse_for(key, raw)?;
        self.set(key, value, origin, now)
    }

    pub fn modulation_active(&self) -> bool {
        self.modulation_active
    }

    /// Turning modulation off drops every override so none survives an off→on cycle.
    pub fn set_modulation_active(&mut self, on: bool) {
        if !on {
            self.arbiter.clear_all();
        }
        self.modulation_active = on;
    }

    pub fn is_overridden(&self, key: ParamKey, now: Instant) -> bool {
        self.arbiter.is_overridden(key, now)
    }

    pub fn arbiter(&self) -> &OverrideArbiter {
        &self.arbiter
    }

    pub fn prune_overrides(&mut self, now: Instant) -> usize {
        self.arbiter.prune(now)
    }

    pub fn reset_to_defaults(&mut self) {
        for key in ParamKey::ALL {
            self.values[key.index()] = key.default_value();
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (ParamKey, &ParamValue)> {
        ParamKey::ALL.iter().copied().zip(self.values.iter())
    }
}
