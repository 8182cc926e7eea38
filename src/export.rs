//! Still-image export: target sizing, encoding and the finished artifact.

use crate::field::RenderError;
use base64::Engine as _;
use image::ImageEncoder as _;
use image::codecs::png::PngEncoder;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

pub const MIN_EXPORT_RESOLUTION: u32 = 64;
pub const MAX_EXPORT_RESOLUTION: u32 = 8192;
pub const DEFAULT_EXPORT_RESOLUTION: u32 = 1024;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("render target unavailable: {0}")]
    Render(#[from] RenderError),
    #[error("image encoding failed: {0}")]
    Encode(String),
    #[error("rendering is disabled: {0}")]
    Unavailable(String),
    #[error("write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Fixed frame shapes offered for preview and export.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Aspect {
    #[default]
    Square,
    Landscape,
    Portrait,
}

impl Aspect {
    pub const ALL: [Self; 3] = [Self::Square, Self::Landscape, Self::Portrait];

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "1:1" | "square" => Some(Self::Square),
            "16:9" | "landscape" => Some(Self::Landscape),
            "9:16" | "portrait" => Some(Self::Portrait),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Square => "1:1",
            Self::Landscape => "16:9",
            Self::Portrait => "9:16",
        }
    }

    /// `(aw, ah)` with height = width · ah / aw.
    pub fn ratio(self) -> (u32, u32) {
        match self {
            Self::Square => (1, 1),
            Self::Landscape => (16, 9),
            Self::Portrait => (9, 16),
        }
    }

    pub fn height_for(self, width: u32) -> u32 {
        let (aw, ah) = self.ratio();
        ((width as f64 * ah as f64 / aw as f64).round() as u32).max(1)
    }

    pub fn next(self) -> Self {
        match self {
            Self::Square => Self::Landscape,
            Self::Landscape => Self::Portrait,
            Self::Portrait => Self::Square,
        }
    }
}

impl fmt::Display for Aspect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn clamp_resolution(res: u32) -> u32 {
    res.clamp(MIN_EXPORT_RESOLUTION, MAX_EXPORT_RESOLUTION)
}

/// Pixel size of an export at `resolution` pixels wide.
pub fn export_dimensions(resolution: u32, aspect: Aspect) -> (u32, u32) {
    let w = clamp_resolution(resolution);
    (w, aspect.height_for(w))
}

/// `mandala-<res>px-<unix millis>.png`
pub fn default_file_name(resolution: u32) -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    format!("mandala-{resolution}px-{millis}.png")
}

/// Turns a flattened RGBA8 raster into file bytes.
pub trait StillEncoder {
    fn mime_type(&self) -> &'static str;
    fn encode(&self, width: u32, height: u32, rgba: &[u8]) -> Result<Vec<u8>, ExportError>;
}

/// Lossless PNG with alpha.
#[derive(Debug, Clone, Copy, Default)]
pub struct PngStillEncoder;

impl StillEncoder for PngStillEncoder {
    fn mime_type(&self) -> &'static str {
        "image/png"
    }

    fn encode(&self, width: u32, height: u32, rgba: &[u8]) -> Result<Vec<u8>, ExportError> {
        let mut out = Vec::new();
        PngEncoder::new(&mut out)
            .write_image(rgba, width, height, image::ColorType::Rgba8)
            .map_err(|e| ExportError::Encode(e.to_string()))?;
        Ok(out)
    }
}

#[derive(Debug, Clone)]
pub struct ExportedStill {
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
    pub encoded: Vec<u8>,
    pub mime_type: &'static str,
}

impl ExportedStill {
    pub fn to_data_url(&self) -> String {
        format!(
            "data:{};base64,{}",
            self.mime_type,
            base64::engine::general_purpose::STANDARD.encode(&self.encoded)
        )
    }

    pub fn save(&self, path: &Path) -> Result<(), ExportError> {
        std::fs::write(path, &self.encoded).map_err(|source| ExportError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}
