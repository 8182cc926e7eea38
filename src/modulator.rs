//! Audio-driven parameter modulation.
//!
//! The modulator never owns a parameter. Every value it computes is offered to the
//! store as a `Modulator` write, and the store drops it if the user currently holds an
//! override on that key.

use crate::audio::FrequencySnapshot;
use crate::field::color::PALETTES;
use crate::params::{Origin, ParamKey, ParamStore, ParamValue, WriteOutcome};
use std::collections::BTreeMap;
use std::f32::consts::TAU;
use std::time::Instant;
use tracing::{debug, trace};

/// Which control surface the audio drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlMode {
    Geometry,
    Kaleidoscope,
    Both,
}

impl ControlMode {
    pub const ALL: [Self; 3] = [Self::Geometry, Self::Kaleidoscope, Self::Both];

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "geometry" | "geo" => Some(Self::Geometry),
            "kaleidoscope" | "kaleido" | "image" => Some(Self::Kaleidoscope),
            "both" | "all" => Some(Self::Both),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Geometry => "geometry",
            Self::Kaleidoscope => "kaleidoscope",
            Self::Both => "both",
        }
    }

    pub fn next(self) -> Self {
        match self {
            Self::Geometry => Self::Kaleidoscope,
            Self::Kaleidoscope => Self::Both,
            Self::Both => Self::Geometry,
        }
    }

    pub fn drives_geometry(self) -> bool {
        matches!(self, Self::Geometry | Self::Both)
    }

    pub fn drives_kaleidoscope(self) -> bool {
        matches!(self, Self::Kaleidoscope | Self::Both)
    }
}

pub const GLOW_GAIN: f32 = 1.5;
pub const SPEED_GAIN: f32 = 1.0;
pub const SCALE_GAIN: f32 = 0.8;
pub const EFFECT_AMP_GAIN: f32 = 0.5;
pub const PALETTE_THRESHOLD: f32 = 0.3;
pub const PALETTE_PROBABILITY: f32 = 0.1;
pub const DRIFT_THRESHOLD: f32 = 0.2;
pub const HUE_THRESHOLD: f32 = 0.6;

/// Parameters whose un-modulated value is remembered so it can be offset from and
/// restored.
const BASE_KEYS: [ParamKey; 10] = [
    ParamKey::Glow,
    ParamKey::Speed,
    ParamKey::Scale,
    ParamKey::EffectAmp,
    ParamKey::ImageScale,
    ParamKey::ImageRotation,
    ParamKey::ImageMix,
    ParamKey::ImageCenter,
    ParamKey::ImageHue,
    ParamKey::ImageSaturation,
];

/// Outcome of one modulation tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ModulationReport {
    pub applied: usize,
    pub blocked: usize,
    pub palette: Option<usize>,
}

impl ModulationReport {
    fn record(&mut self, outcome: WriteOutcome) {
        match outcome {
            WriteOutcome::Applied => self.applied += 1,
            WriteOutcome::Blocked => self.blocked += 1,
        }
    }
}

pub struct AudioModulator {
    rng: fastrand::Rng,
    bases: BTreeMap<ParamKey, ParamValue>,
    active: bool,
}

impl Default for AudioModulator {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioModulator {
    pub fn new() -> Self {
        Self::with_rng(fastrand::Rng::new())
    }

    /// Uses `rng` for the palette-swap draw; seed it for reproducible ticks.
    pub fn with_rng(rng: fastrand::Rng) -> Self {
        Self {
            rng,
            bases: BTreeMap::new(),
            active: false,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Captures base values and switches the store into arbitrated mode.
    pub fn start(&mut self, store: &mut ParamStore) {
        self.bases = BASE_KEYS
            .iter()
            .map(|&k| (k, store.get(k).clone()))
            .collect();
        store.set_modulation_active(true);
        self.active = true;
        debug!(mode = store.control_mode().as_str(), "audio modulation started");
    }

    /// Writes the remembered bases back and ends arbitration. Every override is cleared.
    pub fn stop(&mut self, store: &mut ParamStore, now: Instant) {
        if !self.active {
            return;
        }
        for (key, value) in std::mem::take(&mut self.bases) {
            let _ = store.set(key, value, Origin::System, now);
        }
        store.set_modulation_active(false);
        self.active = false;
        debug!("audio modulation stopped");
    }

    /// Re-reads the base for `key` after a user edit so modulation offsets from the new
    /// value once the override lapses.
    pub fn rebase(&mut self, key: ParamKey, store: &ParamStore) {
        if let Some(slot) = self.bases.get_mut(&key) {
            *slot = store.get(key).clone();
        }
    }

    pub fn base(&self, key: ParamKey) -> Option<&ParamValue> {
        self.bases.get(&key)
    }

    fn base_float(&self, key: ParamKey, store: &ParamStore) -> f32 {
        self.bases
            .get(&key)
            .and_then(ParamValue::as_float)
            .unwrap_or_else(|| store.float(key))
    }

    fn offer(
        store: &mut ParamStore,
        key: ParamKey,
        value: ParamValue,
        now: Instant,
        report: &mut ModulationReport,
    ) {
        match store.set(key, value, Origin::Modulator, now) {
            Ok(outcome) => report.record(outcome),
            Err(err) => trace!(%err, "modulator write skipped"),
        }
    }

    /// One analysis-tick worth of writes. `elapsed` is the session's animation time in
    /// seconds; `has_image` gates the kaleidoscope surface.
    pub fn tick(
        &mut self,
        snapshot: FrequencySnapshot,
        elapsed: f32,
        now: Instant,
        store: &mut ParamStore,
        has_image: bool,
    ) -> ModulationReport {
        let mut report = ModulationReport::default();
        if !self.active {
            return report;
        }
        let drive = snapshot.drive(
            store.float(ParamKey::AudioIntensity),
            store.float(ParamKey::AudioSensitivity),
        );
        let avg = drive.average();
        let mode = store.control_mode();

        if mode.drives_geometry() {
            self.tick_geometry(drive, avg, now, store, &mut report);
        }
        if mode.drives_kaleidoscope() && has_image {
            self.tick_kaleidoscope(drive, avg, elapsed, now, store, &mut report);
        }
        report
    }

    fn tick_geometry(
        &mut self,
        drive: FrequencySnapshot,
        avg: f32,
        now: Instant,
        store: &mut ParamStore,
        report: &mut ModulationReport,
    ) {
        let writes = [
            (ParamKey::Glow, drive.bass * GLOW_GAIN),
            (ParamKey::Speed, drive.mid * SPEED_GAIN),
            (ParamKey::Scale, drive.treble * SCALE_GAIN),
            (ParamKey::EffectAmp, drive.bass * EFFECT_AMP_GAIN),
        ];
        for (key, offset) in writes {
            let v = self.base_float(key, store) + offset;
            Self::offer(store, key, ParamValue::Float(v), now, report);
        }

        if avg > PALETTE_THRESHOLD && self.rng.f32() < PALETTE_PROBABILITY {
            if store.arbiter().any_overridden(&ParamKey::PALETTE, now) {
                report.blocked += ParamKey::PALETTE.len();
                return;
            }
            let index = ((avg * 8.0).floor() as usize).min(PALETTES.len() - 1);
            for (key, color) in ParamKey::PALETTE.into_iter().zip(PALETTES[index]) {
                Self::offer(store, key, ParamValue::Color(color), now, report);
            }
            report.palette = Some(index);
            trace!(index, "palette swap");
        }
    }

    fn tick_kaleidoscope(
        &mut self,
        drive: FrequencySnapshot,
        avg: f32,
        t: f32,
        now: Instant,
        store: &mut ParamStore,
        report: &mut ModulationReport,
    ) {
        let scale = self.base_float(ParamKey::ImageScale, store) + drive.bass;
        Self::offer(store, ParamKey::ImageScale, ParamValue::Float(scale), now, report);

        let rotation = (t * (0.2 + 2.0 * drive.mid)).rem_euclid(TAU);
        Self::offer(store, ParamKey::ImageRotation, ParamValue::Float(rotation), now, report);

        let mix = self.base_float(ParamKey::ImageMix, store) + drive.treble;
        Self::offer(store, ParamKey::ImageMix, ParamValue::Float(mix), now, report);

        if avg > DRIFT_THRESHOLD {
            let offset = [
                0.05 * avg * (2.0 * t).sin(),
                0.05 * avg * (1.5 * t).cos(),
            ];
            Self::offer(store, ParamKey::ImageCenter, ParamValue::Point(offset), now, report);
        }
        if avg > HUE_THRESHOLD {
            let hue = (0.1 * t).rem_euclid(1.0);
            Self::offer(store, ParamKey::ImageHue, ParamValue::Float(hue), now, report);
            Self::offer(
                store,
                ParamKey::ImageSaturation,
                ParamValue::Float(1.0 + 0.5 * avg),
                now,
                report,
            );
        }
    }
}
