use crate::config::{AudioSourceArg, Config};
use crate::export::{Aspect, PngStillEncoder, default_file_name};
use crate::field::color::{PALETTES, adjust_hsl};
use crate::modulator::AudioModulator;
use crate::params::{ParamKey, ParamKind, ParamValue, Rgb8};
use crate::preset::{JsonFilePresetStore, MemoryPresetStore, PresetStore, preset_storage_path};
use crate::render::{Frame, HalfBlockRenderer, Renderer, preview_container};
use crate::session::{AllowAll, RenderSession};
use crate::terminal::PreviewScreen;
use anyhow::Context;
use crossterm::event::{self, Event, KeyCode, KeyEventKind, KeyModifiers};
use std::time::{Duration, Instant};
use tracing::{info, warn};

const STATUS_TTL: Duration = Duration::from_secs(4);

#[derive(Debug, Clone, PartialEq, Eq)]
enum InputMode {
    Normal,
    EditText(String),
    SavePreset(String),
    LoadPreset(String),
}

struct Ui {
    cursor: usize,
    mode: InputMode,
    show_hud: bool,
    show_help: bool,
    palette: usize,
    status: Option<(String, Instant)>,
}

impl Ui {
    fn new() -> Self {
        Self {
            cursor: 0,
            mode: InputMode::Normal,
            show_hud: true,
            show_help: false,
            palette: 0,
            status: None,
        }
    }

    fn selected(&self) -> ParamKey {
        ParamKey::ALL[self.cursor % ParamKey::ALL.len()]
    }

    fn say(&mut self, msg: impl Into<String>, now: Instant) {
        self.status = Some((msg.into(), now));
    }
}

enum Presets {
    File(JsonFilePresetStore),
    Memory(MemoryPresetStore),
}

impl Presets {
    fn store(&mut self) -> &mut dyn PresetStore {
        match self {
            Self::File(s) => s as &mut dyn PresetStore,
            Self::Memory(s) => s as &mut dyn PresetStore,
        }
    }
}

pub fn run(cfg: Config) -> anyhow::Result<()> {
    cfg.validate()?;
    let assignments = cfg.assignments()?;

    let mut rng = cfg
        .seed
        .map(fastrand::Rng::with_seed)
        .unwrap_or_else(fastrand::Rng::new);
    let modulator = AudioModulator::with_rng(rng.fork());

    let mut presets = match cfg.presets_file.clone().or_else(preset_storage_path) {
        Some(path) => Presets::File(JsonFilePresetStore::new(path)),
        None => Presets::Memory(MemoryPresetStore::new()),
    };

    let (screen, mut last_size) = PreviewScreen::enter(cfg.sync_updates)?;
    let mut out = screen.writer();
    let mut renderer = HalfBlockRenderer::new();
    info!(renderer = renderer.name(), cols = last_size.0, rows = last_size.1, "preview started");

    let mut ui = Ui::new();
    let mut hud_rows = hud_rows_for(last_size.1, ui.show_hud);
    let (cw, ch) = preview_container(last_size.0, last_size.1.saturating_sub(hud_rows));

    let start = Instant::now();
    let mut session = RenderSession::with_modulator(cw, Some(ch), modulator);
    session.check_access(&AllowAll, &cfg.user);
    session.set_aspect(cfg.aspect.into());
    session.set_export_resolution(cfg.export_resolution);
    session.set_param(
        ParamKey::AudioMode,
        ParamValue::Mode(cfg.mode.into()),
        start,
    )?;
    for (key, value) in assignments {
        session.set_param(key, value, start)?;
    }
    if let Some(path) = &cfg.image {
        session
            .load_image(path, start)
            .with_context(|| format!("load image {}", path.display()))?;
    }
    if let Some(name) = &cfg.preset {
        let load = session
            .load_preset(presets.store(), name, start)
            .with_context(|| format!("load preset '{name}'"))?;
        if !load.fallbacks.is_empty() {
            ui.say(format!("preset '{name}': {} defaults used", load.fallbacks.len()), start);
        }
    }
    match cfg.audio {
        AudioSourceArg::Off => {}
        AudioSourceArg::Mic | AudioSourceArg::File => {
            if let Err(err) = start_audio(&mut session, &cfg, start) {
                warn!(%err, "audio unavailable");
                ui.say(format!("audio: {err:#}"), start);
            }
        }
    }

    let mut last_frame = start;
    let mut fps = FpsCounter::new();

    loop {
        let now = Instant::now();

        while event::poll(Duration::from_millis(0))? {
            match event::read()? {
                Event::Key(k) if k.kind != KeyEventKind::Release => {
                    let old_hud = ui.show_hud;
                    let quit = handle_key(
                        k.code,
                        k.modifiers,
                        &mut session,
                        &mut ui,
                        &mut presets,
                        &mut rng,
                        &cfg,
                        now,
                    );
                    if quit {
                        info!("quit");
                        return Ok(());
                    }
                    if ui.show_hud != old_hud {
                        hud_rows = hud_rows_for(last_size.1, ui.show_hud);
                        resize_session(&mut session, last_size, hud_rows);
                    }
                }
                Event::Resize(c, r) => {
                    last_size = (c, r);
                    hud_rows = hud_rows_for(last_size.1, ui.show_hud);
                    resize_session(&mut session, last_size, hud_rows);
                }
                _ => {}
            }
        }

        let sz = PreviewScreen::size()?;
        if sz != last_size {
            last_size = sz;
            hud_rows = hud_rows_for(last_size.1, ui.show_hud);
            resize_session(&mut session, last_size, hud_rows);
        }

        let dt = now.duration_since(last_frame).as_secs_f32();
        last_frame = now;

        if ui
            .status
            .as_ref()
            .is_some_and(|(_, at)| now.duration_since(*at) > STATUS_TTL)
        {
            ui.status = None;
        }

        let rendered = session.tick(dt, now).is_some();
        let preview = session.preview_size();
        let (pw, ph) = if rendered {
            (preview.width, preview.height)
        } else {
            (0, 0)
        };
        let pixels: &[u8] = if rendered { session.frame() } else { &[] };

        let hud = if ui.show_hud {
            build_hud(&session, &ui, fps.fps(), now)
        } else {
            String::new()
        };
        let popup = if ui.show_help {
            Some(help_popup_text().to_string())
        } else if let Some(reason) = session.diagnostic() {
            Some(format!("Rendering disabled\n{reason}\nq quit"))
        } else {
            prompt_text(&ui.mode)
        };

        let (term_cols, term_rows) = last_size;
        let frame = Frame {
            term_cols,
            term_rows,
            visual_rows: term_rows.saturating_sub(hud_rows).max(1),
            pixel_width: pw,
            pixel_height: ph,
            pixels_rgba: pixels,
            hud: &hud,
            hud_rows,
            overlay: popup.as_deref(),
            sync_updates: cfg.sync_updates,
        };
        renderer.render(&frame, &mut out)?;
        fps.tick();

        let target = Duration::from_secs_f32(1.0 / cfg.fps.max(1) as f32);
        let elapsed = now.elapsed();
        if elapsed < target {
            std::thread::sleep(target - elapsed);
        }
    }
}

fn start_audio(session: &mut RenderSession, cfg: &Config, now: Instant) -> anyhow::Result<()> {
    match (&cfg.audio, &cfg.audio_file) {
        (AudioSourceArg::File, Some(path)) => session
            .load_audio_file(path, now)
            .with_context(|| format!("load audio {}", path.display())),
        _ => session
            .start_microphone(cfg.device.as_deref(), now)
            .context("start microphone"),
    }
}

fn resize_session(session: &mut RenderSession, size: (u16, u16), hud_rows: u16) {
    let (w, h) = preview_container(size.0, size.1.saturating_sub(hud_rows));
    session.resize_container(w, Some(h));
}

fn hud_rows_for(term_rows: u16, show_hud: bool) -> u16 {
    if !show_hud || term_rows <= 1 {
        return 0;
    }
    (term_rows - 1).min(4)
}

#[allow(clippy::too_many_arguments)]
fn handle_key(
    code: KeyCode,
    mods: KeyModifiers,
    session: &mut RenderSession,
    ui: &mut Ui,
    presets: &mut Presets,
    rng: &mut fastrand::Rng,
    cfg: &Config,
    now: Instant,
) -> bool {
    if mods.contains(KeyModifiers::CONTROL) && matches!(code, KeyCode::Char('c')) {
        return true;
    }

    if ui.mode != InputMode::Normal {
        handle_prompt_key(code, session, ui, presets, now);
        return false;
    }

    let key = ui.selected();
    match code {
        KeyCode::Esc | KeyCode::Char('q') => return true,
        KeyCode::Tab => ui.cursor = (ui.cursor + 1) % ParamKey::ALL.len(),
        KeyCode::BackTab => {
            ui.cursor = (ui.cursor + ParamKey::ALL.len() - 1) % ParamKey::ALL.len()
        }
        KeyCode::Up | KeyCode::Down | KeyCode::Left | KeyCode::Right | KeyCode::Enter => {
            let (steps, axis) = match code {
                KeyCode::Up => (1.0, 1),
                KeyCode::Down => (-1.0, 1),
                KeyCode::Right => (10.0, 0),
                KeyCode::Left => (-10.0, 0),
                _ => (1.0, 0),
            };
            if key.kind() == ParamKind::Text {
                if code == KeyCode::Enter {
                    ui.mode = InputMode::EditText(session.store().text(key).to_string());
                }
            } else if let Some(v) = nudged_value(session.store().get(key), key.kind(), steps, axis)
            {
                apply_user_write(session, ui, key, v, now);
            }
        }
        KeyCode::Backspace | KeyCode::Delete => {
            apply_user_write(session, ui, key, key.default_value(), now);
        }
        KeyCode::Char('e') => {
            ui.mode = InputMode::EditText(session.store().text(ParamKey::Text).to_string());
        }
        KeyCode::Char('p') | KeyCode::Char(' ') => {
            let paused = session.toggle_pause();
            ui.say(if paused { "paused" } else { "playing" }, now);
        }
        KeyCode::Char('a') => {
            if session.audio_label().is_some() {
                session.disable_audio(now);
                ui.say("audio off", now);
            } else if let Err(err) = start_audio(session, cfg, now) {
                warn!(%err, "audio unavailable");
                ui.say(format!("audio: {err:#}"), now);
            } else {
                ui.say("audio on", now);
            }
        }
        KeyCode::Char('m') => {
            let next = session.store().control_mode().next();
            apply_user_write(session, ui, ParamKey::AudioMode, ParamValue::Mode(next), now);
        }
        KeyCode::Char('r') => {
            session.randomize(rng, now);
            ui.say("randomized", now);
        }
        KeyCode::Char('c') => {
            ui.palette = (ui.palette + 1) % PALETTES.len();
            session.apply_palette(ui.palette, now);
        }
        KeyCode::Char('0') => {
            session.reset_params(now);
            ui.say("parameters reset", now);
        }
        KeyCode::Char('1') => session.set_aspect(Aspect::Square),
        KeyCode::Char('2') => session.set_aspect(Aspect::Landscape),
        KeyCode::Char('3') => session.set_aspect(Aspect::Portrait),
        KeyCode::Char(']') => {
            session.set_export_resolution(session.export_resolution().saturating_add(256))
        }
        KeyCode::Char('[') => {
            session.set_export_resolution(session.export_resolution().saturating_sub(256))
        }
        KeyCode::Char('x') => export_still(session, ui, cfg, now),
        KeyCode::Char('S') => ui.mode = InputMode::SavePreset(String::new()),
        KeyCode::Char('L') => ui.mode = InputMode::LoadPreset(String::new()),
        KeyCode::Char('i') => ui.show_hud = !ui.show_hud,
        KeyCode::Char('?') | KeyCode::Char('h') | KeyCode::F(1) => ui.show_help = !ui.show_help,
        _ => {}
    }
    false
}

fn handle_prompt_key(
    code: KeyCode,
    session: &mut RenderSession,
    ui: &mut Ui,
    presets: &mut Presets,
    now: Instant,
) {
    let buf = match &mut ui.mode {
        InputMode::EditText(b) | InputMode::SavePreset(b) | InputMode::LoadPreset(b) => b,
        InputMode::Normal => return,
    };
    match code {
        KeyCode::Char(c) => {
            buf.push(c);
            return;
        }
        KeyCode::Backspace => {
            buf.pop();
            return;
        }
        KeyCode::Esc => {
            ui.mode = InputMode::Normal;
            return;
        }
        KeyCode::Enter => {}
        _ => return,
    }
    match std::mem::replace(&mut ui.mode, InputMode::Normal) {
        InputMode::EditText(b) => commit_text(session, ui, &b, now),
        InputMode::SavePreset(b) => commit_save(session, ui, presets, &b, now),
        InputMode::LoadPreset(b) => commit_load(session, ui, presets, &b, now),
        InputMode::Normal => {}
    }
}

fn commit_text(session: &mut RenderSession, ui: &mut Ui, buf: &str, now: Instant) {
    let text = buf.replace("\\n", "\n");
    apply_user_write(session, ui, ParamKey::Text, ParamValue::Text(text), now);
}

fn commit_save(session: &mut RenderSession, ui: &mut Ui, presets: &mut Presets, buf: &str, now: Instant) {
    match session.save_preset(presets.store(), buf) {
        Ok(()) => ui.say(format!("preset '{}' saved", buf.trim()), now),
        Err(err) => ui.say(format!("save failed: {err}"), now),
    }
}

fn commit_load(session: &mut RenderSession, ui: &mut Ui, presets: &mut Presets, buf: &str, now: Instant) {
    match session.load_preset(presets.store(), buf, now) {
        Ok(load) if load.fallbacks.is_empty() => ui.say(format!("preset '{}' loaded", buf.trim()), now),
        Ok(load) => ui.say(
            format!("preset '{}' loaded ({} defaults used)", buf.trim(), load.fallbacks.len()),
            now,
        ),
        Err(err) => ui.say(format!("load failed: {err}"), now),
    }
}

fn apply_user_write(session: &mut RenderSession, ui: &mut Ui, key: ParamKey, value: ParamValue, now: Instant) {
    if let Err(err) = session.set_param(key, value, now) {
        ui.say(err.to_string(), now);
    }
}

fn export_still(session: &mut RenderSession, ui: &mut Ui, cfg: &Config, now: Instant) {
    let res = session.export_resolution();
    let result = session.capture(res, &PngStillEncoder).and_then(|still| {
        let path = cfg.export_dir.join(default_file_name(res));
        still.save(&path).map(|()| (path, still.width, still.height))
    });
    match result {
        Ok((path, w, h)) => {
            info!(path = %path.display(), w, h, "still exported");
            ui.say(format!("saved {}x{} -> {}", w, h, path.display()), now);
        }
        Err(err) => ui.say(format!("export failed: {err}"), now),
    }
}

/// The value one key press moves `value` to. `steps` counts the kind's step size; `axis`
/// picks the coordinate of a point. `None` for kinds edited through a prompt.
pub(crate) fn nudged_value(
    value: &ParamValue,
    kind: ParamKind,
    steps: f32,
    axis: usize,
) -> Option<ParamValue> {
    match (kind, value) {
        (ParamKind::Float { step, .. }, ParamValue::Float(v)) => {
            Some(ParamValue::Float(v + step * steps))
        }
        (ParamKind::Point { step, .. }, ParamValue::Point(p)) => {
            let mut p = *p;
            p[axis.min(1)] += step * steps.signum();
            Some(ParamValue::Point(p))
        }
        (ParamKind::Color, ParamValue::Color(c)) => {
            let [r, g, b] = adjust_hsl(c.to_unit(), steps / 36.0, 1.0, 0.0);
            Some(ParamValue::Color(Rgb8::new(
                (r * 255.0).round() as u8,
                (g * 255.0).round() as u8,
                (b * 255.0).round() as u8,
            )))
        }
        (ParamKind::Bool, ParamValue::Bool(b)) => Some(ParamValue::Bool(!b)),
        (ParamKind::Effect, ParamValue::Effect(e)) => Some(ParamValue::Effect(e.next())),
        (ParamKind::Align, ParamValue::Align(a)) => Some(ParamValue::Align(a.next())),
        (ParamKind::Mode, ParamValue::Mode(m)) => Some(ParamValue::Mode(m.next())),
        _ => None,
    }
}

fn build_hud(session: &RenderSession, ui: &Ui, fps: f32, now: Instant) -> String {
    let store = session.store();
    let preview = session.preview_size();
    let (ew, eh) = session.export_size();
    let clock = session.clock();
    let snap = session.last_snapshot();
    let report = session.last_report();

    let key = ui.selected();
    let owner = match store.arbiter().remaining(key, now) {
        Some(left) => format!(" [manual {:.1}s]", left.as_secs_f32()),
        None => String::new(),
    };

    let mut lines = vec![
        format!(
            "t {:>6.1}s{} | aspect {} | preview {}x{} | export {}x{} | fps {:>4.1}",
            clock.time(),
            if clock.is_paused() { " (paused)" } else { "" },
            session.aspect(),
            preview.width,
            preview.height,
            ew,
            eh,
            fps
        ),
        format!(
            "audio {} | mode {} | bass {:.2} mid {:.2} treble {:.2} | writes {} blocked {} | overrides {}",
            session.audio_label().unwrap_or("off"),
            store.control_mode().as_str(),
            snap.bass,
            snap.mid,
            snap.treble,
            report.applied,
            report.blocked,
            store.arbiter().pending()
        ),
        format!(
            "[{}/{}] {} > {} = {}{}",
            ui.cursor + 1,
            ParamKey::ALL.len(),
            key.group().label(),
            key,
            store.get(key),
            owner
        ),
    ];
    lines.push(match &ui.status {
        Some((msg, _)) => msg.clone(),
        None => "tab param | arrows adjust | enter toggle | a audio | x export | r random | ? help | q quit"
            .to_string(),
    });
    lines.join("\n")
}

fn prompt_text(mode: &InputMode) -> Option<String> {
    let (title, buf) = match mode {
        InputMode::Normal => return None,
        InputMode::EditText(b) => ("Overlay text (\\n for a new line)", b),
        InputMode::SavePreset(b) => ("Save preset as", b),
        InputMode::LoadPreset(b) => ("Load preset", b),
    };
    Some(format!("{title}\n> {buf}_\nenter confirm | esc cancel"))
}

fn help_popup_text() -> &'static str {
    "Mandala Lab Hotkeys\n\
tab / shift-tab  select parameter\n\
up/down  adjust by one step (point: y)\n\
left/right  adjust by ten steps (point: x)\n\
enter  toggle / cycle / edit text\n\
backspace  reset selected parameter\n\
e  edit overlay text\n\
p or space  pause animation\n\
a  audio on/off\n\
m  cycle audio mode: geometry/kaleidoscope/both\n\
r  randomize\n\
c  next palette\n\
0  reset all parameters\n\
1 / 2 / 3  aspect 1:1 / 16:9 / 9:16\n\
[ / ]  export resolution -/+ 256\n\
x  export PNG still\n\
S / L  save / load preset\n\
i  show/hide HUD\n\
? or h or F1  toggle this help\n\
q or esc  quit"
}

struct FpsCounter {
    last: Instant,
    frames: u32,
    fps: f32,
}

impl FpsCounter {
    fn new() -> Self {
        Self {
            last: Instant::now(),
            frames: 0,
            fps: 0.0,
        }
    }

    fn tick(&mut self) {
        self.frames += 1;
        let now = Instant::now();
        let dt = now.duration_since(self.last).as_secs_f32();
        if dt >= 0.5 {
            self.fps = (self.frames as f32) / dt;
            self.frames = 0;
            self.last = now;
        }
    }

    fn fps(&self) -> f32 {
        self.fps
    }
}
