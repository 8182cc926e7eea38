use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Sample, SampleFormat};
use ringbuf::HeapRb;
use ringbuf::traits::{Consumer as _, Producer as _, Split as _};
use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use std::f32::consts::PI;
use std::io::{self, Cursor, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Analysis window length in samples.
pub const FFT_SIZE: usize = 2048;
/// Number of magnitude bins produced per analysis tick.
pub const BIN_COUNT: usize = FFT_SIZE / 2;
/// Audio files above this size are rejected before decoding.
pub const MAX_AUDIO_FILE_BYTES: u64 = 32 * 1024 * 1024;
/// Microphone recordings are force-stopped after this long.
pub const MAX_CAPTURE: Duration = Duration::from_secs(60);

const SMOOTHING: f32 = 0.8;
const MIN_DB: f32 = -100.0;
const MAX_DB: f32 = -30.0;

#[derive(Debug, Error)]
pub enum AudioError {
    #[error("microphone capture denied: {0}")]
    CaptureDenied(String),
    #[error("no input device matching '{0}'")]
    NoDevice(String),
    #[error("unsupported input sample format: {0}")]
    UnsupportedFormat(String),
}

/// Rejected user-supplied media. Nothing in the session changes when one of these is
/// returned.
#[derive(Debug, Error)]
pub enum InputError {
    #[error("audio file is {size} bytes; the limit is {limit} bytes")]
    AudioTooLarge { size: u64, limit: u64 },
    #[error("unsupported audio file: {0}")]
    UnsupportedAudio(String),
    #[error("unsupported image: {0}")]
    UnsupportedImage(String),
    #[error("read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

pub fn list_input_devices() -> anyhow::Result<()> {
    use anyhow::Context as _;

    let host = cpal::default_host();
    let devices = host.input_devices().context("enumerate input devices")?;

    let mut out = io::stdout();
    writeln!(out, "Input devices:")?;
    for dev in devices {
        let name = dev.name().unwrap_or_else(|_| "<unknown>".to_string());
        writeln!(out, "  - {}", name)?;
    }
    Ok(())
}

/// A decoded audio file, down-mixed to mono.
#[derive(Debug, Clone)]
pub struct AudioClip {
    samples: Vec<f32>,
    sample_rate_hz: u32,
}

impl AudioClip {
    pub fn from_samples(samples: Vec<f32>, sample_rate_hz: u32) -> Self {
        Self {
            samples,
            sample_rate_hz: sample_rate_hz.max(1),
        }
    }

    pub fn open(path: &Path) -> Result<Self, InputError> {
        let io_err = |source| InputError::Io {
            path: path.to_path_buf(),
            source,
        };
        let size = std::fs::metadata(path).map_err(io_err)?.len();
        if size > MAX_AUDIO_FILE_BYTES {
            return Err(InputError::AudioTooLarge {
                size,
                limit: MAX_AUDIO_FILE_BYTES,
            });
        }
        let bytes = std::fs::read(path).map_err(io_err)?;
        Self::from_wav_bytes(&bytes)
    }

    /// Decodes a RIFF/WAVE file (integer PCM up to 32 bits or 32-bit float).
    pub fn from_wav_bytes(bytes: &[u8]) -> Result<Self, InputError> {
        let size = bytes.len() as u64;
        if size > MAX_AUDIO_FILE_BYTES {
            return Err(InputError::AudioTooLarge {
                size,
                limit: MAX_AUDIO_FILE_BYTES,
            });
        }
        let reader = hound::WavReader::new(Cursor::new(bytes))
            .map_err(|e| InputError::UnsupportedAudio(e.to_string()))?;
        let spec = reader.spec();
        let channels = spec.channels.max(1) as usize;

        let interleaved: Vec<f32> = match spec.sample_format {
            hound::SampleFormat::Float => reader
                .into_samples::<f32>()
                .collect::<Result<_, _>>()
                .map_err(|e| InputError::UnsupportedAudio(e.to_string()))?,
            hound::SampleFormat::Int => {
                let scale = (1i64 << (spec.bits_per_sample.clamp(1, 32) - 1)) as f32;
                reader
                    .into_samples::<i32>()
                    .map(|s| s.map(|v| v as f32 / scale))
                    .collect::<Result<_, _>>()
                    .map_err(|e| InputError::UnsupportedAudio(e.to_string()))?
            }
        };
        if interleaved.is_empty() {
            return Err(InputError::UnsupportedAudio("file has no samples".into()));
        }

        let samples = interleaved
            .chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
            .collect();
        Ok(Self::from_samples(samples, spec.sample_rate))
    }

    pub fn sample_rate_hz(&self) -> u32 {
        self.sample_rate_hz
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.samples.len() as f64 / self.sample_rate_hz as f64)
    }

    /// Fills `out` with the samples that end at `position`, looping the clip.
    pub fn fill_window(&self, position: Duration, out: &mut [f32]) {
        if self.samples.is_empty() {
            out.fill(0.0);
            return;
        }
        let len = self.samples.len() as i64;
        let end = (position.as_secs_f64() * self.sample_rate_hz as f64) as i64;
        let start = end - out.len() as i64;
        for (i, dst) in out.iter_mut().enumerate() {
            *dst = self.samples[(start + i as i64).rem_euclid(len) as usize];
        }
    }
}

/// Rolling analysis window plus a bounded recording of everything captured.
#[derive(Debug, Clone)]
pub struct CaptureBuffer {
    recent: Vec<f32>,
    write_pos: usize,
    recording: Vec<f32>,
    max_recorded: usize,
}

impl CaptureBuffer {
    pub fn new(sample_rate_hz: u32, max_duration: Duration) -> Self {
        let max_recorded = (max_duration.as_secs_f64() * sample_rate_hz as f64) as usize;
        Self {
            recent: vec![0.0; FFT_SIZE],
            write_pos: 0,
            recording: Vec::new(),
            max_recorded,
        }
    }

    pub fn push(&mut self, sample: f32) {
        self.recent[self.write_pos] = sample;
        self.write_pos = (self.write_pos + 1) % self.recent.len();
        if self.recording.len() < self.max_recorded {
            self.recording.push(sample);
        }
    }

    /// Copies the most recent `out.len()` samples, oldest first.
    pub fn fill_window(&self, out: &mut [f32]) {
        let n = self.recent.len();
        let skip = n.saturating_sub(out.len());
        for (i, dst) in out.iter_mut().enumerate() {
            *dst = self.recent[(self.write_pos + skip + i) % n];
        }
    }

    pub fn recorded(&self) -> &[f32] {
        &self.recording
    }

    pub fn is_full(&self) -> bool {
        self.recording.len() >= self.max_recorded
    }

    pub fn into_recording(self) -> Vec<f32> {
        self.recording
    }
}

/// Live microphone input. The cpal callback pushes mono samples into a ring buffer;
/// the session drains it once per frame.
pub struct MicCapture {
    stream: Option<cpal::Stream>,
    cons: ringbuf::HeapCons<f32>,
    buffer: CaptureBuffer,
    sample_rate_hz: u32,
    started: Instant,
}

impl MicCapture {
    /// Opens and starts the input stream. Any device or permission failure is reported
    /// before anything is retained.
    pub fn start(device_query: Option<&str>, now: Instant) -> Result<Self, AudioError> {
        let host = cpal::default_host();
        let device = select_input_device(&host, device_query)?;
        let supported = device
            .default_input_config()
            .map_err(|e| AudioError::CaptureDenied(e.to_string()))?;
        let sample_rate_hz = supported.sample_rate().0;
        let channels = supported.channels().max(1) as usize;
        let config: cpal::StreamConfig = supported.clone().into();

        let rb = HeapRb::<f32>::new((sample_rate_hz as usize).saturating_mul(2).max(FFT_SIZE));
        let (mut prod, cons) = rb.split();

        let err_fn = |err| warn!("audio stream error: {err}");
        let denied = |e: cpal::BuildStreamError| AudioError::CaptureDenied(e.to_string());

        let stream = match supported.sample_format() {
            SampleFormat::F32 => device
                .build_input_stream(
                    &config,
                    move |data: &[f32], _| push_interleaved(data, channels, &mut prod),
                    err_fn,
                    None,
                )
                .map_err(denied)?,
            SampleFormat::I16 => device
                .build_input_stream(
                    &config,
                    move |data: &[i16], _| push_interleaved(data, channels, &mut prod),
                    err_fn,
                    None,
                )
                .map_err(denied)?,
            SampleFormat::U16 => device
                .build_input_stream(
                    &config,
                    move |data: &[u16], _| push_interleaved(data, channels, &mut prod),
                    err_fn,
                    None,
                )
                .map_err(denied)?,
            fmt => return Err(AudioError::UnsupportedFormat(format!("{fmt:?}"))),
        };
        stream
            .play()
            .map_err(|e| AudioError::CaptureDenied(e.to_string()))?;

        info!(sample_rate_hz, channels, "microphone capture started");
        Ok(Self {
            stream: Some(stream),
            cons,
            buffer: CaptureBuffer::new(sample_rate_hz, MAX_CAPTURE),
            sample_rate_hz,
            started: now,
        })
    }

    pub fn sample_rate_hz(&self) -> u32 {
        self.sample_rate_hz
    }

    pub fn is_recording(&self) -> bool {
        self.stream.is_some()
    }

    pub fn elapsed(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.started)
    }

    /// Drains pending samples and enforces the capture time limit. Returns `true` on the
    /// call that stopped the stream.
    pub fn poll(&mut self, now: Instant) -> bool {
        while let Some(s) = self.cons.try_pop() {
            self.buffer.push(s);
        }
        if self.stream.is_some() && (self.elapsed(now) >= MAX_CAPTURE || self.buffer.is_full()) {
            info!("microphone capture reached its time limit");
            self.stop();
            return true;
        }
        false
    }

    pub fn stop(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.pause();
            debug!(recorded = self.buffer.recorded().len(), "microphone capture stopped");
        }
    }

    pub fn fill_window(&mut self, now: Instant, out: &mut [f32]) {
        self.poll(now);
        self.buffer.fill_window(out);
    }

    /// Turns the recording into a clip that can be replayed as a file source.
    pub fn into_clip(mut self) -> Option<AudioClip> {
        self.stop();
        let rate = self.sample_rate_hz;
        let samples = std::mem::replace(&mut self.buffer, CaptureBuffer::new(rate, Duration::ZERO)).into_recording();
        (!samples.is_empty()).then(|| AudioClip::from_samples(samples, rate))
    }
}

impl Drop for MicCapture {
    fn drop(&mut self) {
        self.stop();
    }
}

fn select_input_device(
    host: &cpal::Host,
    device_query: Option<&str>,
) -> Result<cpal::Device, AudioError> {
    if let Some(want) = device_query.map(|s| s.to_lowercase()) {
        let devices = host
            .input_devices()
            .map_err(|e| AudioError::CaptureDenied(e.to_string()))?;
        for dev in devices {
            if dev
                .name()
                .map(|n| n.to_lowercase().contains(&want))
                .unwrap_or(false)
            {
                return Ok(dev);
            }
        }
        return Err(AudioError::NoDevice(want));
    }
    host.default_input_device()
        .ok_or_else(|| AudioError::CaptureDenied("no default input device".into()))
}

fn push_interleaved<T: Sample<Float = f32> + Copy>(
    data: &[T],
    channels: usize,
    prod: &mut ringbuf::HeapProd<f32>,
) {
    for frame in data.chunks(channels) {
        let mut acc = 0.0f32;
        for s in frame {
            acc += (*s).to_float_sample();
        }
        let mono = acc / channels as f32;
        let _ = prod.try_push(mono);
    }
}

/// Where analysed samples come from.
pub enum AudioFeed {
    /// A file played silently on a looping wall-clock playhead.
    Clip { clip: AudioClip, started: Instant },
    Mic(MicCapture),
}

impl AudioFeed {
    pub fn clip(clip: AudioClip, now: Instant) -> Self {
        Self::Clip { clip, started: now }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Clip { .. } => "file",
            Self::Mic(_) => "mic",
        }
    }

    pub fn fill_window(&mut self, now: Instant, out: &mut [f32]) {
        match self {
            Self::Clip { clip, started } => {
                clip.fill_window(now.saturating_duration_since(*started), out)
            }
            Self::Mic(mic) => mic.fill_window(now, out),
        }
    }
}

/// Short-time spectrum in the 0..=255 byte scale of a browser analyser node: Blackman
/// window, magnitude / N, exponential smoothing, then decibels mapped linearly from
/// [-100, -30] dB.
pub struct FrequencyAnalyser {
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    fft_buf: Vec<Complex<f32>>,
    smoothed: Vec<f32>,
    bins: Vec<u8>,
}

impl Default for FrequencyAnalyser {
    fn default() -> Self {
        Self::new()
    }
}

impl FrequencyAnalyser {
    pub fn new() -> Self {
        let n = FFT_SIZE;
        let window = (0..n)
            .map(|i| {
                let x = 2.0 * PI * i as f32 / n as f32;
                0.42 - 0.5 * x.cos() + 0.08 * (2.0 * x).cos()
            })
            .collect();
        let mut planner = FftPlanner::<f32>::new();
        Self {
            fft: planner.plan_fft_forward(n),
            window,
            fft_buf: vec![Complex { re: 0.0, im: 0.0 }; n],
            smoothed: vec![0.0; BIN_COUNT],
            bins: vec![0; BIN_COUNT],
        }
    }

    /// Analyses one window of samples (shorter input is zero-padded at the front).
    pub fn process(&mut self, samples: &[f32]) -> &[u8] {
        let n = FFT_SIZE;
        let offset = n.saturating_sub(samples.len());
        let tail = &samples[samples.len().saturating_sub(n)..];
        for (i, c) in self.fft_buf.iter_mut().enumerate() {
            let s = if i >= offset { tail[i - offset] } else { 0.0 };
            *c = Complex {
                re: s * self.window[i],
                im: 0.0,
            };
        }
        self.fft.process(&mut self.fft_buf);

        let range = MAX_DB - MIN_DB;
        for (k, c) in self.fft_buf.iter().take(BIN_COUNT).enumerate() {
            let mag = c.norm() / n as f32;
            let s = SMOOTHING * self.smoothed[k] + (1.0 - SMOOTHING) * mag;
            self.smoothed[k] = s;
            self.bins[k] = if s > 0.0 {
                let db = 20.0 * s.log10();
                (255.0 * (db - MIN_DB) / range).clamp(0.0, 255.0) as u8
            } else {
                0
            };
        }
        &self.bins
    }

    pub fn bins(&self) -> &[u8] {
        &self.bins
    }

    pub fn reset(&mut self) {
        self.smoothed.fill(0.0);
        self.bins.fill(0);
    }
}

/// Band energies in [0, 1].
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FrequencySnapshot {
    pub bass: f32,
    pub mid: f32,
    pub treble: f32,
}

impl FrequencySnapshot {
    /// Means of the contiguous ranges `[0, n/8)`, `[n/8, n/2)` and `[n/2, n)`.
    pub fn from_bins(bins: &[u8]) -> Self {
        let n = bins.len();
        let mean = |range: &[u8]| {
            if range.is_empty() {
                0.0
            } else {
                range.iter().map(|&b| b as f32).sum::<f32>() / range.len() as f32 / 255.0
            }
        };
        Self {
            bass: mean(&bins[..n / 8]),
            mid: mean(&bins[n / 8..n / 2]),
            treble: mean(&bins[n / 2..]),
        }
    }

    /// Scales every band by the user's intensity and sensitivity controls.
    pub fn drive(self, intensity: f32, sensitivity: f32) -> Self {
        let k = intensity * sensitivity;
        Self {
            bass: self.bass * k,
            mid: self.mid * k,
            treble: self.treble * k,
        }
    }

    pub fn average(&self) -> f32 {
        (self.bass + self.mid + self.treble) / 3.0
    }
}
