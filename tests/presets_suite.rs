use mandala_lab::export::{Aspect, DEFAULT_EXPORT_RESOLUTION, MAX_EXPORT_RESOLUTION};
use mandala_lab::params::{EffectKind, ParamKey, ParamStore, ParamValue, Rgb8, TextAlign};
use mandala_lab::preset::{
    ASPECT_KEY, JsonFilePresetStore, MemoryPresetStore, Preset, PresetError, PresetStore,
    RESOLUTION_KEY,
};
use mandala_lab::session::{RenderSession, SessionError};
use serde_json::{Map, Value, json};
use std::path::PathBuf;
use std::time::Instant;

fn temp_file(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "mandala_lab_presets_{}_{}",
        std::process::id(),
        name
    ));
    let _ = std::fs::remove_dir_all(&dir);
    dir.join("presets.json")
}

fn customised_session(now: Instant) -> RenderSession {
    let mut s = RenderSession::new(32, Some(32));
    let edits = [
        (ParamKey::Symmetry, ParamValue::Float(9.0)),
        (ParamKey::Center, ParamValue::Point([0.12, -0.3])),
        (ParamKey::Color2, ParamValue::Color(Rgb8::new(0x12, 0x34, 0x56))),
        (ParamKey::EffectType, ParamValue::Effect(EffectKind::Ripple)),
        (ParamKey::Stars, ParamValue::Bool(false)),
        (ParamKey::Text, ParamValue::Text("Hello\nWorld".into())),
        (ParamKey::TextAlign, ParamValue::Align(TextAlign::Right)),
        (ParamKey::ImageSaturation, ParamValue::Float(1.37)),
    ];
    for (key, value) in edits {
        s.set_param(key, value, now).unwrap();
    }
    s.set_aspect(Aspect::Portrait);
    s.set_export_resolution(2048);
    s
}

fn assert_same_params(a: &ParamStore, b: &ParamStore) {
    for key in ParamKey::ALL {
        match (a.get(key), b.get(key)) {
            (ParamValue::Float(x), ParamValue::Float(y)) => {
                assert!((x - y).abs() < 1e-5, "{key}: {x} vs {y}")
            }
            (ParamValue::Point([x0, y0]), ParamValue::Point([x1, y1])) => {
                assert!((x0 - x1).abs() < 1e-5 && (y0 - y1).abs() < 1e-5, "{key}")
            }
            (x, y) => assert_eq!(x, y, "{key}"),
        }
    }
}

#[test]
fn save_then_load_round_trips_every_parameter() {
    let now = Instant::now();
    let source = customised_session(now);
    let mut store = MemoryPresetStore::new();
    source.save_preset(&mut store, "mine").unwrap();

    let mut target = RenderSession::new(32, Some(32));
    let load = target.load_preset(&store, "mine", now).unwrap();
    assert!(load.fallbacks.is_empty(), "{:?}", load.fallbacks);
    assert_same_params(source.store(), target.store());
    assert_eq!(target.aspect(), Aspect::Portrait);
    assert_eq!(target.export_resolution(), 2048);
}

#[test]
fn record_has_one_entry_per_parameter_plus_layout() {
    let preset = Preset::capture(&ParamStore::new(), Aspect::Landscape, 1024);
    let rec = preset.record();
    assert_eq!(rec.len(), ParamKey::ALL.len() + 2);
    assert_eq!(rec[ASPECT_KEY], json!("16:9"));
    assert_eq!(rec[RESOLUTION_KEY], json!(1024));
    assert_eq!(rec["color1"], json!("#ff6b6b"));
    assert_eq!(rec["center"], json!([0.0, 0.0]));
    assert_eq!(rec["effect_type"], json!("none"));
}

#[test]
fn missing_and_corrupt_fields_fall_back_per_field() {
    let text = r##"{
        "symmetry": 7,
        "glow": "bright",
        "color1": "#zzzzzz",
        "stars": false,
        "aspect": "4:3",
        "exportResolution": -5
    }"##;
    let preset = Preset::from_json("partial", text).unwrap();
    let (values, load) = preset.resolve();
    let get = |k: ParamKey| values.iter().find(|(key, _)| *key == k).map(|(_, v)| v.clone());

    assert_eq!(get(ParamKey::Symmetry), Some(ParamValue::Float(7.0)));
    assert_eq!(get(ParamKey::Stars), Some(ParamValue::Bool(false)));
    assert_eq!(get(ParamKey::Glow), Some(ParamKey::Glow.default_value()));
    assert_eq!(get(ParamKey::Color1), Some(ParamKey::Color1.default_value()));
    assert_eq!(load.aspect, Aspect::Square);
    assert_eq!(load.export_resolution, DEFAULT_EXPORT_RESOLUTION);

    for name in ["glow", "color1", "speed", ASPECT_KEY, RESOLUTION_KEY] {
        assert!(load.fallbacks.iter().any(|f| f == name), "missing fallback {name}");
    }
    assert!(!load.fallbacks.iter().any(|f| f == "symmetry"));
}

#[test]
fn out_of_range_values_are_clamped_not_rejected() {
    let mut rec = Map::new();
    rec.insert("scale".into(), json!(99.0));
    rec.insert(RESOLUTION_KEY.into(), json!(100_000));
    let (values, load) = Preset::from_record(rec).resolve();
    let scale = values.iter().find(|(k, _)| *k == ParamKey::Scale).unwrap();
    assert_eq!(scale.1, ParamValue::Float(3.0));
    assert_eq!(load.export_resolution, MAX_EXPORT_RESOLUTION);
}

#[test]
fn legacy_keys_are_understood() {
    let text = r##"{
        "sym": 5,
        "col1": "#010203",
        "gradMix": 0.25,
        "starsOn": false,
        "effectType": 2,
        "centerX": 0.1,
        "centerY": -0.2
    }"##;
    let (values, _) = Preset::from_json("old", text).unwrap().resolve();
    let get = |k: ParamKey| values.iter().find(|(key, _)| *key == k).map(|(_, v)| v.clone());
    assert_eq!(get(ParamKey::Symmetry), Some(ParamValue::Float(5.0)));
    assert_eq!(get(ParamKey::Color1), Some(ParamValue::Color(Rgb8::new(1, 2, 3))));
    assert_eq!(get(ParamKey::GradientMix), Some(ParamValue::Float(0.25)));
    assert_eq!(get(ParamKey::Stars), Some(ParamValue::Bool(false)));
    assert_eq!(get(ParamKey::EffectType), Some(ParamValue::Effect(EffectKind::Wave)));
    match get(ParamKey::Center) {
        Some(ParamValue::Point([x, y])) => {
            assert!((x - 0.1).abs() < 1e-6 && (y + 0.2).abs() < 1e-6)
        }
        other => panic!("center not restored: {other:?}"),
    }
}

#[test]
fn current_names_win_over_legacy_aliases() {
    let text = r#"{ "symmetry": 10, "sym": 3 }"#;
    let (values, _) = Preset::from_json("both", text).unwrap().resolve();
    assert!(values.contains(&(ParamKey::Symmetry, ParamValue::Float(10.0))));
}

#[test]
fn non_object_preset_is_rejected() {
    assert!(matches!(
        Preset::from_json("arr", "[1, 2, 3]"),
        Err(PresetError::NotAnObject(_))
    ));
    assert!(matches!(
        Preset::from_json("bad", "{ not json"),
        Err(PresetError::Json(_))
    ));
}

#[test]
fn memory_store_list_get_set_delete() {
    let preset = Preset::capture(&ParamStore::new(), Aspect::Square, 1024);
    let mut store = MemoryPresetStore::new();
    store.set("b", &preset).unwrap();
    store.set("a", &preset).unwrap();
    assert_eq!(store.list().unwrap(), vec!["a".to_string(), "b".to_string()]);
    assert_eq!(store.get("a").unwrap(), Some(preset.clone()));
    assert!(store.delete("a").unwrap());
    assert!(!store.delete("a").unwrap());
    assert_eq!(store.get("a").unwrap(), None);
    assert!(matches!(store.set("  ", &preset), Err(PresetError::EmptyName)));
}

#[test]
fn corrupt_stored_text_is_reported_on_get() {
    let mut store = MemoryPresetStore::new();
    store.insert_raw("broken", "{{{");
    assert!(store.get("broken").is_err());
}

#[test]
fn file_store_persists_across_instances() {
    let path = temp_file("persist");
    let preset = Preset::capture(&ParamStore::new(), Aspect::Landscape, 4096);
    {
        let mut store = JsonFilePresetStore::new(&path);
        assert!(store.list().unwrap().is_empty(), "missing file reads as empty");
        store.set("night", &preset).unwrap();
        store.set("day", &preset).unwrap();
    }
    let mut reopened = JsonFilePresetStore::new(&path);
    assert_eq!(
        reopened.list().unwrap(),
        vec!["day".to_string(), "night".to_string()]
    );
    assert_eq!(reopened.get("night").unwrap(), Some(preset));
    assert!(reopened.delete("day").unwrap());
    assert_eq!(reopened.list().unwrap(), vec!["night".to_string()]);
    assert!(!path.with_extension("tmp").exists());

    let raw: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert!(raw["night"].is_object());

    let _ = std::fs::remove_dir_all(path.parent().unwrap());
}

#[test]
fn session_reports_unknown_presets() {
    let store = MemoryPresetStore::new();
    let mut session = RenderSession::new(16, Some(16));
    let err = session.load_preset(&store, "ghost", Instant::now()).unwrap_err();
    assert!(matches!(err, SessionError::PresetNotFound(name) if name == "ghost"));
}

#[test]
fn loading_a_preset_while_modulating_claims_the_values() {
    let now = Instant::now();
    let source = customised_session(now);
    let mut store = MemoryPresetStore::new();
    source.save_preset(&mut store, "claimed").unwrap();

    let mut session = RenderSession::new(16, Some(16));
    let clip = mandala_lab::audio::AudioClip::from_samples(vec![0.0; 4096], 44_100);
    session.enable_audio(mandala_lab::audio::AudioFeed::clip(clip, now), now);
    session.load_preset(&store, "claimed", now).unwrap();
    assert!(session.store().is_overridden(ParamKey::Symmetry, now));
    assert_eq!(session.modulator().base(ParamKey::Glow), Some(&ParamValue::Float(1.2)));
}
