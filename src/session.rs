//! The render session: one owned context holding the parameter store, render target,
//! text layer, kaleidoscope image, audio feed and animation clock.
//!
//! Everything runs on the caller's thread. `tick` is the per-frame entry point;
//! `capture` runs an export to completion inside a single call and puts the preview back
//! before returning, so no frame is ever presented at export size.

use crate::audio::{
    AudioClip, AudioError, AudioFeed, FFT_SIZE, FrequencyAnalyser, FrequencySnapshot,
    InputError, MicCapture,
};
use crate::export::{
    Aspect, DEFAULT_EXPORT_RESOLUTION, ExportError, ExportedStill, StillEncoder,
    clamp_resolution, export_dimensions,
};
use crate::field::color::PALETTES;
use crate::field::texture::KaleidoTexture;
use crate::field::{FieldRenderer, FieldUniforms};
use crate::modulator::{AudioModulator, ModulationReport};
use crate::overlay::{TextOverlay, TextStyle, composite_over};
use crate::params::{EffectKind, Origin, ParamError, ParamKey, ParamStore, ParamValue, WriteOutcome};
use crate::preset::{Preset, PresetError, PresetLoad, PresetStore};
use std::collections::HashSet;
use std::path::Path;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Input(#[from] InputError),
    #[error(transparent)]
    Audio(#[from] AudioError),
    #[error(transparent)]
    Preset(#[from] PresetError),
    #[error(transparent)]
    Param(#[from] ParamError),
    #[error("preset '{0}' not found")]
    PresetNotFound(String),
}

/// External "may this user render" check. The session only consumes the answer.
pub trait AccessGate {
    fn is_active(&self, user: &str) -> bool;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl AccessGate for AllowAll {
    fn is_active(&self, _user: &str) -> bool {
        true
    }
}

/// Fixed allow-list, mostly for tests and offline use.
#[derive(Debug, Clone, Default)]
pub struct StaticAccessGate {
    active: HashSet<String>,
}

impl StaticAccessGate {
    pub fn new<I, S>(users: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            active: users.into_iter().map(Into::into).collect(),
        }
    }
}

impl AccessGate for StaticAccessGate {
    fn is_active(&self, user: &str) -> bool {
        self.active.contains(user)
    }
}

/// Elapsed animation time. Only advances while neither paused by the user nor suspended
/// by an export.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AnimationClock {
    time: f32,
    paused: bool,
    suspended: bool,
}

impl AnimationClock {
    pub fn time(&self) -> f32 {
        self.time
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn is_running(&self) -> bool {
        !self.paused && !self.suspended
    }

    pub fn advance(&mut self, dt: f32) {
        if self.is_running() && dt.is_finite() && dt > 0.0 {
            self.time += dt;
        }
    }

    pub fn set_paused(&mut self, paused: bool) {
        self.paused = paused;
    }

    pub fn toggle_pause(&mut self) -> bool {
        self.paused = !self.paused;
        self.paused
    }

    /// Returns the previous suspension state for [`AnimationClock::resume`].
    pub fn suspend(&mut self) -> bool {
        std::mem::replace(&mut self.suspended, true)
    }

    pub fn resume(&mut self, previous: bool) {
        self.suspended = previous;
    }
}

/// On-screen render target size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreviewSize {
    pub width: usize,
    pub height: usize,
}

impl PreviewSize {
    /// Fills the container width at `aspect`; when the container height is known and too
    /// small, shrinks the width so the height fits.
    pub fn fit(container_w: usize, container_h: Option<usize>, aspect: Aspect) -> Self {
        let (aw, ah) = aspect.ratio();
        let mut width = container_w.max(1);
        let mut height = ((width as f64 * ah as f64 / aw as f64).round() as usize).max(1);
        if let Some(max_h) = container_h.map(|h| h.max(1)) {
            if height > max_h {
                height = max_h;
                width = ((height as f64 * aw as f64 / ah as f64).round() as usize)
                    .clamp(1, container_w.max(1));
            }
        }
        Self { width, height }
    }
}

pub struct RenderSession {
    store: ParamStore,
    renderer: Option<FieldRenderer>,
    overlay: TextOverlay,
    frame: Vec<u8>,
    texture: Option<KaleidoTexture>,
    feed: Option<AudioFeed>,
    analyser: FrequencyAnalyser,
    window: Vec<f32>,
    modulator: AudioModulator,
    clock: AnimationClock,
    aspect: Aspect,
    export_resolution: u32,
    container: (usize, Option<usize>),
    preview: PreviewSize,
    diagnostic: Option<String>,
    last_snapshot: FrequencySnapshot,
    last_report: ModulationReport,
}

impl RenderSession {
    /// Creates the session for a container of the given size. A render target that
    /// cannot be allocated leaves the session in a persistent diagnostic state.
    pub fn new(container_w: usize, container_h: Option<usize>) -> Self {
        Self::with_modulator(container_w, container_h, AudioModulator::new())
    }

    pub fn with_modulator(
        container_w: usize,
        container_h: Option<usize>,
        modulator: AudioModulator,
    ) -> Self {
        let aspect = Aspect::default();
        let preview = PreviewSize::fit(container_w, container_h, aspect);
        let (renderer, diagnostic) = match FieldRenderer::new(preview.width, preview.height) {
            Ok(r) => (Some(r), None),
            Err(err) => {
                warn!(%err, "render target unavailable");
                (None, Some(err.to_string()))
            }
        };
        Self {
            store: ParamStore::new(),
            renderer,
            overlay: TextOverlay::new(preview.width, preview.height),
            frame: vec![0; preview.width * preview.height * 4],
            texture: None,
            feed: None,
            analyser: FrequencyAnalyser::new(),
            window: vec![0.0; FFT_SIZE],
            modulator,
            clock: AnimationClock::default(),
            aspect,
            export_resolution: DEFAULT_EXPORT_RESOLUTION,
            container: (container_w, container_h),
            preview,
            diagnostic,
            last_snapshot: FrequencySnapshot::default(),
            last_report: ModulationReport::default(),
        }
    }

    /// Consults the access gate once; a denied user disables rendering for the
    /// session's lifetime.
    pub fn check_access(&mut self, gate: &dyn AccessGate, user: &str) -> bool {
        let active = gate.is_active(user);
        if !active {
            info!(user, "access inactive; rendering disabled");
            self.diagnostic = Some(format!("access inactive for '{user}'"));
        }
        active
    }

    pub fn is_enabled(&self) -> bool {
        self.diagnostic.is_none() && self.renderer.is_some()
    }

    pub fn diagnostic(&self) -> Option<&str> {
        self.diagnostic.as_deref()
    }

    pub fn store(&self) -> &ParamStore {
        &self.store
    }

    pub fn modulator(&self) -> &AudioModulator {
        &self.modulator
    }

    pub fn clock(&self) -> &AnimationClock {
        &self.clock
    }

    pub fn aspect(&self) -> Aspect {
        self.aspect
    }

    pub fn export_resolution(&self) -> u32 {
        self.export_resolution
    }

    pub fn export_size(&self) -> (u32, u32) {
        export_dimensions(self.export_resolution, self.aspect)
    }

    pub fn preview_size(&self) -> PreviewSize {
        self.preview
    }

    /// Size of the live render target, if one exists.
    pub fn render_target_size(&self) -> Option<(usize, usize)> {
        self.renderer.as_ref().map(FieldRenderer::size)
    }

    /// The last composited preview frame (RGBA8, preview size).
    pub fn frame(&self) -> &[u8] {
        &self.frame
    }

    pub fn has_image(&self) -> bool {
        self.texture.is_some()
    }

    pub fn audio_label(&self) -> Option<&'static str> {
        self.feed.as_ref().map(AudioFeed::label)
    }

    pub fn last_snapshot(&self) -> FrequencySnapshot {
        self.last_snapshot
    }

    pub fn last_report(&self) -> ModulationReport {
        self.last_report
    }

    /// A user edit. Re-arms the override window while audio runs and moves the
    /// modulation base to the new value.
    pub fn set_param(
        &mut self,
        key: ParamKey,
        value: ParamValue,
        now: Instant,
    ) -> Result<WriteOutcome, ParamError> {
        let outcome = self.store.set(key, value, Origin::User, now)?;
        if self.modulator.is_active() {
            self.modulator.rebase(key, &self.store);
        }
        Ok(outcome)
    }

    pub fn set_param_by_name(
        &mut self,
        name: &str,
        raw: &str,
        now: Instant,
    ) -> Result<WriteOutcome, ParamError> {
        let key = ParamKey::parse(name).ok_or_else(|| ParamError::UnknownKey(name.to_string()))?;
        let value = ParamValue::parse_for(key, raw)?;
        self.set_param(key, value, now)
    }

    pub fn resize_container(&mut self, width: usize, height: Option<usize>) {
        self.container = (width, height);
        self.apply_preview_size();
    }

    pub fn set_aspect(&mut self, aspect: Aspect) {
        if aspect != self.aspect {
            self.aspect = aspect;
            self.apply_preview_size();
        }
    }

    /// Changes only the export target; the preview is untouched.
    pub fn set_export_resolution(&mut self, resolution: u32) {
        self.export_resolution = clamp_resolution(resolution);
    }

    fn apply_preview_size(&mut self) {
        let size = PreviewSize::fit(self.container.0, self.container.1, self.aspect);
        self.preview = size;
        self.set_target(size);
        self.render_preview();
    }

    fn set_target(&mut self, size: PreviewSize) {
        if let Some(renderer) = self.renderer.as_mut() {
            if let Err(err) = renderer.resize(size.width, size.height) {
                warn!(%err, "render target resize failed");
                self.diagnostic = Some(err.to_string());
            }
        }
        self.overlay.resize(size.width, size.height);
        self.frame.resize(size.width * size.height * 4, 0);
    }

    pub fn toggle_pause(&mut self) -> bool {
        self.clock.toggle_pause()
    }

    pub fn set_paused(&mut self, paused: bool) {
        self.clock.set_paused(paused);
    }

    /// One display frame: advance time, run one analysis/modulation step if audio is on,
    /// then render the preview. Returns `None` while rendering is disabled.
    pub fn tick(&mut self, dt: f32, now: Instant) -> Option<&[u8]> {
        self.clock.advance(dt);
        self.store.prune_overrides(now);
        self.audio_step(now);
        if !self.is_enabled() {
            return None;
        }
        self.render_preview();
        Some(&self.frame)
    }

    fn audio_step(&mut self, now: Instant) {
        let Some(feed) = self.feed.as_mut() else {
            return;
        };
        if let AudioFeed::Mic(mic) = feed {
            if mic.poll(now) {
                self.finish_recording(now);
            }
        }
        let Some(feed) = self.feed.as_mut() else {
            return;
        };
        feed.fill_window(now, &mut self.window);
        let bins = self.analyser.process(&self.window);
        self.last_snapshot = FrequencySnapshot::from_bins(bins);
        self.last_report = self.modulator.tick(
            self.last_snapshot,
            self.clock.time(),
            now,
            &mut self.store,
            self.texture.is_some(),
        );
    }

    /// A microphone that hit its time limit keeps driving the visuals from its own
    /// recording.
    fn finish_recording(&mut self, now: Instant) {
        if let Some(AudioFeed::Mic(mic)) = self.feed.take() {
            match mic.into_clip() {
                Some(clip) => {
                    info!(seconds = clip.duration().as_secs_f32(), "replaying recorded audio");
                    self.feed = Some(AudioFeed::clip(clip, now));
                }
                None => self.disable_audio(now),
            }
        }
    }

    /// Renders field and text at the current target and flattens them into the frame.
    pub fn render_preview(&mut self) {
        if !self.is_enabled() {
            return;
        }
        let uniforms = FieldUniforms::from_store(&self.store, self.texture.is_some());
        let style = TextStyle::from_store(&self.store);
        let Some(renderer) = self.renderer.as_mut() else {
            return;
        };
        let pixels = renderer.render(&uniforms, self.clock.time(), self.texture.as_ref());
        self.overlay.draw(&style);
        self.frame.clear();
        self.frame.extend_from_slice(pixels);
        composite_over(&mut self.frame, self.overlay.pixels());
    }

    /// Starts modulation from `feed`, replacing any current source.
    pub fn enable_audio(&mut self, feed: AudioFeed, now: Instant) {
        if self.feed.is_some() {
            self.disable_audio(now);
        }
        info!(source = feed.label(), "audio enabled");
        self.analyser.reset();
        self.window.fill(0.0);
        self.feed = Some(feed);
        self.modulator.start(&mut self.store);
    }

    pub fn start_microphone(
        &mut self,
        device: Option<&str>,
        now: Instant,
    ) -> Result<(), SessionError> {
        let mic = MicCapture::start(device, now)?;
        self.enable_audio(AudioFeed::Mic(mic), now);
        Ok(())
    }

    pub fn load_audio_file(&mut self, path: &Path, now: Instant) -> Result<(), SessionError> {
        let clip = AudioClip::open(path)?;
        self.enable_audio(AudioFeed::clip(clip, now), now);
        Ok(())
    }

    /// Stops analysis, releases the capture device, restores the un-modulated values and
    /// clears every override.
    pub fn disable_audio(&mut self, now: Instant) {
        if let Some(feed) = self.feed.take() {
            info!(source = feed.label(), "audio disabled");
        }
        self.modulator.stop(&mut self.store, now);
        self.store.set_modulation_active(false);
        self.last_snapshot = FrequencySnapshot::default();
        self.last_report = ModulationReport::default();
    }

    /// Installs a decoded image as the kaleidoscope source and switches the layer on.
    pub fn load_image_bytes(&mut self, bytes: &[u8], now: Instant) -> Result<(), SessionError> {
        let texture = KaleidoTexture::decode(bytes)
            .map_err(|e| InputError::UnsupportedImage(e.to_string()))?;
        debug!(width = texture.width(), height = texture.height(), "image loaded");
        self.texture = Some(texture);
        self.set_param(ParamKey::ImageEnabled, ParamValue::Bool(true), now)?;
        self.set_param(ParamKey::ImageMix, ParamValue::Float(0.8), now)?;
        Ok(())
    }

    pub fn load_image(&mut self, path: &Path, now: Instant) -> Result<(), SessionError> {
        let bytes = std::fs::read(path).map_err(|source| InputError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        self.load_image_bytes(&bytes, now)
    }

    pub fn clear_image(&mut self) {
        self.texture = None;
    }

    pub fn apply_palette(&mut self, index: usize, now: Instant) {
        let palette = PALETTES[index % PALETTES.len()];
        for (key, color) in ParamKey::PALETTE.into_iter().zip(palette) {
            let _ = self.set_param(key, ParamValue::Color(color), now);
        }
    }

    /// New random geometry, palette, stars and effect.
    pub fn randomize(&mut self, rng: &mut fastrand::Rng, now: Instant) {
        let float = |s: &mut Self, key: ParamKey, v: f32| {
            let _ = s.set_param(key, ParamValue::Float(v), now);
        };
        float(self, ParamKey::Seed, rng.f32());
        float(self, ParamKey::Symmetry, (6.0 + rng.f32() * 24.0).floor());
        float(self, ParamKey::Glow, 0.8 + rng.f32() * 2.0);
        float(self, ParamKey::Speed, 0.3 + rng.f32() * 1.2);
        float(self, ParamKey::Scale, 0.8 + rng.f32() * 1.8);
        let center = [(rng.f32() - 0.5) * 0.3, (rng.f32() - 0.5) * 0.3];
        let _ = self.set_param(ParamKey::Center, ParamValue::Point(center), now);

        self.apply_palette(rng.usize(..PALETTES.len()), now);

        float(self, ParamKey::GradientMix, 0.3 + rng.f32() * 0.6);
        let _ = self.set_param(ParamKey::Stars, ParamValue::Bool(rng.f32() > 0.3), now);
        float(self, ParamKey::StarDensity, rng.f32() * 0.15 + 0.02);
        float(self, ParamKey::StarIntensity, rng.f32() * 0.8 + 0.2);
        float(self, ParamKey::StarSeed, rng.f32());
        let effect = if rng.f32() < 0.4 {
            EffectKind::None
        } else if rng.f32() < 0.5 {
            EffectKind::Ripple
        } else {
            EffectKind::Wave
        };
        let _ = self.set_param(ParamKey::EffectType, ParamValue::Effect(effect), now);
        float(self, ParamKey::EffectAmp, rng.f32() * 0.6 + 0.2);
        float(self, ParamKey::EffectFreq, rng.f32());
    }

    pub fn reset_params(&mut self, now: Instant) {
        for key in ParamKey::ALL {
            let _ = self.set_param(key, key.default_value(), now);
        }
    }

    pub fn save_preset(
        &self,
        presets: &mut dyn PresetStore,
        name: &str,
    ) -> Result<(), SessionError> {
        let preset = Preset::capture(&self.store, self.aspect, self.export_resolution);
        presets.set(name, &preset)?;
        info!(name, "preset saved");
        Ok(())
    }

    pub fn load_preset(
        &mut self,
        presets: &dyn PresetStore,
        name: &str,
        now: Instant,
    ) -> Result<PresetLoad, SessionError> {
        let preset = presets
            .get(name)?
            .ok_or_else(|| SessionError::PresetNotFound(name.to_string()))?;
        Ok(self.apply_preset(&preset, now))
    }

    pub fn apply_preset(&mut self, preset: &Preset, now: Instant) -> PresetLoad {
        let load = preset.apply(&mut self.store, now);
        if self.modulator.is_active() {
            for key in ParamKey::ALL {
                self.modulator.rebase(key, &self.store);
            }
        }
        self.export_resolution = load.export_resolution;
        self.set_aspect(load.aspect);
        load
    }

    /// Exports one still at `resolution` pixels wide.
    ///
    /// Time is frozen for the duration. The render target is resized to the export size,
    /// field and text are rendered and flattened, then the previous target is restored and
    /// re-rendered before this returns, on the error path as well.
    pub fn capture(
        &mut self,
        resolution: u32,
        encoder: &dyn StillEncoder,
    ) -> Result<ExportedStill, ExportError> {
        if let Some(reason) = &self.diagnostic {
            return Err(ExportError::Unavailable(reason.clone()));
        }
        let was_suspended = self.clock.suspend();
        let prior = self.preview;
        let (w, h) = export_dimensions(resolution, self.aspect);
        info!(width = w, height = h, "capturing still");

        let result = self.render_export(w, h, encoder);

        self.set_target(prior);
        self.render_preview();
        self.clock.resume(was_suspended);

        if let Err(err) = &result {
            warn!(%err, "capture failed; preview restored");
        }
        result
    }

    fn render_export(
        &mut self,
        width: u32,
        height: u32,
        encoder: &dyn StillEncoder,
    ) -> Result<ExportedStill, ExportError> {
        let uniforms = FieldUniforms::from_store(&self.store, self.texture.is_some());
        let style = TextStyle::from_store(&self.store);
        let renderer = self
            .renderer
            .as_mut()
            .ok_or_else(|| ExportError::Unavailable("no render target".into()))?;
        renderer.resize(width as usize, height as usize)?;

        let mut rgba = renderer
            .render(&uniforms, self.clock.time(), self.texture.as_ref())
            .to_vec();
        self.overlay.resize(width as usize, height as usize);
        self.overlay.draw(&style);
        composite_over(&mut rgba, self.overlay.pixels());

        let encoded = encoder.encode(width, height, &rgba)?;
        Ok(ExportedStill {
            width,
            height,
            rgba,
            encoded,
            mime_type: encoder.mime_type(),
        })
    }
}
