//! Named parameter snapshots and the key-value store they live in.
//!
//! A preset is a flat JSON object: one entry per parameter name plus `aspect` and
//! `exportResolution`. Loading is per-field tolerant: anything missing or malformed
//! falls back to that parameter's default.

use crate::export::{Aspect, DEFAULT_EXPORT_RESOLUTION, clamp_resolution};
use crate::params::{
    EffectKind, Origin, ParamKey, ParamKind, ParamStore, ParamValue, Rgb8, TextAlign,
};
use crate::modulator::ControlMode;
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, warn};

pub const ASPECT_KEY: &str = "aspect";
pub const RESOLUTION_KEY: &str = "exportResolution";

/// Older key spellings, mapped onto current names.
const LEGACY_ALIASES: [(&str, ParamKey); 12] = [
    ("sym", ParamKey::Symmetry),
    ("col1", ParamKey::Color1),
    ("col2", ParamKey::Color2),
    ("col3", ParamKey::Color3),
    ("gradMix", ParamKey::GradientMix),
    ("starsOn", ParamKey::Stars),
    ("starDensity", ParamKey::StarDensity),
    ("starIntensity", ParamKey::StarIntensity),
    ("starSeed", ParamKey::StarSeed),
    ("effectType", ParamKey::EffectType),
    ("effectAmp", ParamKey::EffectAmp),
    ("effectFreq", ParamKey::EffectFreq),
];

#[derive(Debug, Error)]
pub enum PresetError {
    #[error("preset name must not be empty")]
    EmptyName,
    #[error("preset '{0}' is not a JSON object")]
    NotAnObject(String),
    #[error("preset JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("preset storage {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Preset {
    record: Map<String, Value>,
}

/// What a load produced besides the parameter writes.
#[derive(Debug, Clone, PartialEq)]
pub struct PresetLoad {
    pub aspect: Aspect,
    pub export_resolution: u32,
    /// Names of entries that were missing or unusable and took their default.
    pub fallbacks: Vec<String>,
}

impl Preset {
    pub fn capture(store: &ParamStore, aspect: Aspect, export_resolution: u32) -> Self {
        let mut record = Map::new();
        for (key, value) in store.iter() {
            record.insert(key.as_str().to_string(), value_to_json(value));
        }
        record.insert(ASPECT_KEY.to_string(), json!(aspect.as_str()));
        record.insert(RESOLUTION_KEY.to_string(), json!(export_resolution));
        Self { record }
    }

    pub fn from_record(record: Map<String, Value>) -> Self {
        Self { record }
    }

    pub fn record(&self) -> &Map<String, Value> {
        &self.record
    }

    pub fn from_json(name: &str, text: &str) -> Result<Self, PresetError> {
        match serde_json::from_str::<Value>(text)? {
            Value::Object(record) => Ok(Self { record }),
            _ => Err(PresetError::NotAnObject(name.to_string())),
        }
    }

    pub fn to_json(&self) -> Result<String, PresetError> {
        Ok(serde_json::to_string_pretty(&self.record)?)
    }

    fn lookup(&self, key: ParamKey) -> Option<&Value> {
        if let Some(v) = self.record.get(key.as_str()) {
            return Some(v);
        }
        LEGACY_ALIASES
            .iter()
            .find(|(_, k)| *k == key)
            .and_then(|(alias, _)| self.record.get(*alias))
    }

    fn legacy_center(&self) -> Option<Value> {
        let x = self.record.get("centerX")?.as_f64()?;
        let y = self.record.get("centerY")?.as_f64()?;
        Some(json!([x, y]))
    }

    /// Resolves every parameter without touching a store.
    pub fn resolve(&self) -> (Vec<(ParamKey, ParamValue)>, PresetLoad) {
        let mut fallbacks = Vec::new();
        let mut values = Vec::with_capacity(ParamKey::ALL.len());
        for key in ParamKey::ALL {
            let raw = match key {
                ParamKey::Center => self.lookup(key).cloned().or_else(|| self.legacy_center()),
                _ => self.lookup(key).cloned(),
            };
            let parsed = raw.as_ref().and_then(|v| value_from_json(key, v));
            let value = match parsed {
                Some(v) => v,
                None => {
                    fallbacks.push(key.as_str().to_string());
                    key.default_value()
                }
            };
            values.push((key, value));
        }

        let aspect = match self.record.get(ASPECT_KEY).and_then(Value::as_str).and_then(Aspect::parse) {
            Some(a) => a,
            None => {
                fallbacks.push(ASPECT_KEY.to_string());
                Aspect::default()
            }
        };
        let export_resolution = match self
            .record
            .get(RESOLUTION_KEY)
            .and_then(Value::as_u64)
            .filter(|&r| r > 0)
        {
            Some(r) => clamp_resolution(r.min(u32::MAX as u64) as u32),
            None => {
                fallbacks.push(RESOLUTION_KEY.to_string());
                DEFAULT_EXPORT_RESOLUTION
            }
        };

        (
            values,
            PresetLoad {
                aspect,
                export_resolution,
                fallbacks,
            },
        )
    }

    /// Writes every parameter into `store` as a user edit.
    pub fn apply(&self, store: &mut ParamStore, now: Instant) -> PresetLoad {
        let (values, load) = self.resolve();
        for (key, value) in values {
            if let Err(err) = store.set(key, value, Origin::User, now) {
                warn!(%err, "preset value rejected");
            }
        }
        if !load.fallbacks.is_empty() {
            debug!(fallbacks = ?load.fallbacks, "preset fields fell back to defaults");
        }
        load
    }
}

fn value_to_json(value: &ParamValue) -> Value {
    match value {
        ParamValue::Float(v) => json!(v),
        ParamValue::Point([x, y]) => json!([x, y]),
        ParamValue::Bool(b) => json!(b),
        ParamValue::Color(c) => json!(c.to_hex()),
        ParamValue::Text(s) => json!(s),
        ParamValue::Effect(e) => json!(e.as_str()),
        ParamValue::Align(a) => json!(a.as_str()),
        ParamValue::Mode(m) => json!(m.as_str()),
    }
}

fn value_from_json(key: ParamKey, v: &Value) -> Option<ParamValue> {
    let value = match key.kind() {
        ParamKind::Float { .. } => ParamValue::Float(v.as_f64()? as f32),
        ParamKind::Point { .. } => {
            let arr = v.as_array()?;
            if arr.len() != 2 {
                return None;
            }
            ParamValue::Point([arr[0].as_f64()? as f32, arr[1].as_f64()? as f32])
        }
        ParamKind::Bool => ParamValue::Bool(v.as_bool()?),
        ParamKind::Color => ParamValue::Color(Rgb8::parse_hex(v.as_str()?)?),
        ParamKind::Text => ParamValue::Text(v.as_str()?.to_string()),
        ParamKind::Effect => ParamValue::Effect(match v {
            Value::Number(n) => *EffectKind::ALL.get(n.as_u64()? as usize)?,
            _ => EffectKind::parse(v.as_str()?)?,
        }),
        ParamKind::Align => ParamValue::Align(TextAlign::parse(v.as_str()?)?),
        ParamKind::Mode => ParamValue::Mode(ControlMode::parse(v.as_str()?)?),
    };
    key.normalize(value).ok()
}

/// Minimal key-value persistence for presets.
pub trait PresetStore {
    fn list(&self) -> Result<Vec<String>, PresetError>;
    fn get(&self, name: &str) -> Result<Option<Preset>, PresetError>;
    fn set(&mut self, name: &str, preset: &Preset) -> Result<(), PresetError>;
    /// Returns whether a preset was removed.
    fn delete(&mut self, name: &str) -> Result<bool, PresetError>;
}

fn check_name(name: &str) -> Result<&str, PresetError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(PresetError::EmptyName);
    }
    Ok(name)
}

/// Keeps serialized presets in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryPresetStore {
    entries: BTreeMap<String, String>,
}

impl MemoryPresetStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores raw text under `name`, bypassing serialization.
    pub fn insert_raw(&mut self, name: &str, text: &str) {
        self.entries.insert(name.to_string(), text.to_string());
    }
}

impl PresetStore for MemoryPresetStore {
    fn list(&self) -> Result<Vec<String>, PresetError> {
        Ok(self.entries.keys().cloned().collect())
    }

    fn get(&self, name: &str) -> Result<Option<Preset>, PresetError> {
        let name = check_name(name)?;
        self.entries
            .get(name)
            .map(|text| Preset::from_json(name, text))
            .transpose()
    }

    fn set(&mut self, name: &str, preset: &Preset) -> Result<(), PresetError> {
        let name = check_name(name)?;
        self.entries.insert(name.to_string(), preset.to_json()?);
        Ok(())
    }

    fn delete(&mut self, name: &str) -> Result<bool, PresetError> {
        let name = check_name(name)?;
        Ok(self.entries.remove(name).is_some())
    }
}

/// All presets in one JSON object file, rewritten atomically on every change.
#[derive(Debug, Clone)]
pub struct JsonFilePresetStore {
    path: PathBuf,
}

impl JsonFilePresetStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_err(&self, source: io::Error) -> PresetError {
        PresetError::Io {
            path: self.path.clone(),
            source,
        }
    }

    fn load_all(&self) -> Result<Map<String, Value>, PresetError> {
        let text = match std::fs::read_to_string(&self.path) {
            Ok(v) => v,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Map::new()),
            Err(err) => return Err(self.io_err(err)),
        };
        if text.trim().is_empty() {
            return Ok(Map::new());
        }
        match serde_json::from_str::<Value>(&text)? {
            Value::Object(map) => Ok(map),
            _ => Err(PresetError::NotAnObject(self.path.display().to_string())),
        }
    }

    fn save_all(&self, all: &Map<String, Value>) -> Result<(), PresetError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| self.io_err(e))?;
            }
        }
        let body = serde_json::to_string_pretty(all)?;
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, body).map_err(|e| self.io_err(e))?;
        std::fs::rename(&tmp, &self.path).map_err(|e| self.io_err(e))
    }
}

impl PresetStore for JsonFilePresetStore {
    fn list(&self) -> Result<Vec<String>, PresetError> {
        Ok(self.load_all()?.keys().cloned().collect())
    }

    fn get(&self, name: &str) -> Result<Option<Preset>, PresetError> {
        let name = check_name(name)?;
        match self.load_all()?.remove(name) {
            None => Ok(None),
            Some(Value::Object(record)) => Ok(Some(Preset::from_record(record))),
            Some(_) => Err(PresetError::NotAnObject(name.to_string())),
        }
    }

    fn set(&mut self, name: &str, preset: &Preset) -> Result<(), PresetError> {
        let name = check_name(name)?;
        let mut all = self.load_all()?;
        all.insert(name.to_string(), Value::Object(preset.record().clone()));
        self.save_all(&all)
    }

    fn delete(&mut self, name: &str) -> Result<bool, PresetError> {
        let name = check_name(name)?;
        let mut all = self.load_all()?;
        let removed = all.remove(name).is_some();
        if removed {
            self.save_all(&all)?;
        }
        Ok(removed)
    }
}

pub fn preset_storage_path() -> Option<PathBuf> {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        if !xdg.trim().is_empty() {
            return Some(PathBuf::from(xdg).join("mandala_lab").join("presets.json"));
        }
    }
    let home = std::env::var("HOME").ok()?;
    if home.trim().is_empty() {
        return None;
    }
    Some(
        PathBuf::from(home)
            .join(".config")
            .join("mandala_lab")
            .join("presets.json"),
    )
}
