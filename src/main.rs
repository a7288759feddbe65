use std::collections::{BTreeSet, HashMap};
use std::env;
use std::fs;
use std::io::{self, Stdout};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use chrono::Utc;
use clap::Parser;
use crossterm::event::{
    self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEventKind, MouseButton,
    MouseEvent, MouseEventKind,
};
use crossterm::execute;
use crossterm::terminal::{
    EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode,
};
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Alignment, Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Paragraph, Wrap};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Value, json};
use tracing::{debug, info, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

const LOAD_ERROR_MESSAGE: &str = "Failed to load projects. Please try again later.";
const EMPTY_MESSAGE: &str = "No projects available.";
const THEME_HINT: &str = "Theme: ← → keys or swipe";

const GLYPH_WIDTH_PX: u32 = 11;
const MIN_BOX_WIDTH: usize = 24;
const MAX_BOX_WIDTH: usize = 40;
const MIN_COLLAPSED_ROWS: usize = 4;
const ELLIPSIS: &str = "...";

const SWIPE_THRESHOLD_PX: u32 = 50;
const RESIZE_DEBOUNCE: Duration = Duration::from_millis(250);
const AUTO_COLLAPSE_AFTER: Duration = Duration::from_secs(3);
const IDLE_POLL: Duration = Duration::from_millis(150);
const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

const EVENT_LOG_KEY: &str = "site_analytics";
const EVENT_LOG_CAP: usize = 100;
const LOG_FILE: &str = "ascii-labs.log";
const CONFIG_FILE: &str = "config.toml";

const DEFAULT_SOURCE: &str = "http://localhost:8080/data/projects.json";
const DEFAULT_SITE_URL: &str = "http://localhost:8080";
const DEFAULT_CELL_WIDTH_PX: u16 = 10;

const TILE_GAP_COLUMNS: u16 = 2;
const TILE_GAP_ROWS: u16 = 1;
const HAS_MANY_THRESHOLD: usize = 4;

#[derive(Parser, Debug)]
#[command(name = "ascii-labs", version, about = "ASCII project tiles in the terminal")]
struct Args {
    /// Project list location: an http(s) URL or a local JSON file
    #[arg(short, long)]
    source: Option<String>,

    /// Config file (defaults to $ASCII_LABS_HOME/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Base URL used for projects without an explicit url
    #[arg(long)]
    site_url: Option<String>,

    /// Write the local event log as pretty JSON and exit
    #[arg(long, value_name = "PATH")]
    export_analytics: Option<Option<PathBuf>>,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let home = resolve_labs_home()?;
    let _log_guard = init_logging(&home);
    let config = Config::load(&home, &args)?;
    let client = reqwest::blocking::Client::builder()
        .timeout(FETCH_TIMEOUT)
        .build()
        .context("failed to build HTTP client")?;
    let mirror = config
        .analytics_endpoint
        .clone()
        .map(|endpoint| AnalyticsMirror {
            endpoint,
            client: client.clone(),
        });
    let event_log = EventLog::new(&home, mirror);

    if let Some(target) = args.export_analytics {
        let path = target.unwrap_or_else(default_export_path);
        let written = event_log.export(&path)?;
        println!("Exported {written} events to {}", path.display());
        return Ok(());
    }

    let store = ProjectStore::load(&client, &config.source, &config.site_url);
    let mut tui = Tui::new()?;
    let (columns, rows) = crossterm::terminal::size().context("failed to read terminal size")?;
    let mut app = App::new(config, store, event_log, Viewport::detect(columns, rows));

    let run_result = run_app(&mut tui, &mut app);
    let restore_result = tui.restore();

    run_result?;
    restore_result?;
    Ok(())
}

fn run_app(tui: &mut Tui, app: &mut App) -> Result<()> {
    loop {
        app.fire_due_timers(Instant::now());
        tui.draw(app)?;

        if !event::poll(app.poll_timeout(Instant::now()))? {
            continue;
        }

        match event::read()? {
            Event::Key(key) => {
                if key.kind != KeyEventKind::Press {
                    continue;
                }
                if handle_key(key.code, app, Instant::now()) {
                    return Ok(());
                }
            }
            Event::Mouse(mouse) => handle_mouse_event(mouse, app, Instant::now()),
            Event::Resize(columns, rows) => {
                app.queue_resize(Viewport::detect(columns, rows), Instant::now());
            }
            _ => {}
        }
    }
}

fn handle_key(code: KeyCode, app: &mut App, now: Instant) -> bool {
    match code {
        KeyCode::Char('q') | KeyCode::Esc => return true,
        KeyCode::Left | KeyCode::Right => app.dispatch(UiEvent::ThemeKey, now),
        KeyCode::Tab => app.move_focus(true, now),
        KeyCode::BackTab => app.move_focus(false, now),
        KeyCode::Enter => {
            if let Some(id) = app.state.focused.clone() {
                app.dispatch(UiEvent::Activate(id), now);
            }
        }
        _ => {}
    }
    false
}

fn handle_mouse_event(mouse: MouseEvent, app: &mut App, now: Instant) {
    match mouse.kind {
        MouseEventKind::Moved => {
            let hit = app.tile_at(mouse.column, mouse.row);
            if hit == app.state.hovered {
                return;
            }
            if let Some(previous) = app.state.hovered.clone() {
                app.dispatch(UiEvent::PointerLeave(previous), now);
            }
            if let Some(id) = hit {
                app.dispatch(UiEvent::PointerEnter(id), now);
            }
        }
        MouseEventKind::Down(MouseButton::Left) => {
            let tile = app.tile_at(mouse.column, mouse.row);
            app.press = Some(Press {
                tile: tile.clone(),
                column: mouse.column,
            });
            if let Some(id) = tile {
                app.dispatch(UiEvent::TouchStart(id), now);
            }
        }
        MouseEventKind::Up(MouseButton::Left) => {
            let Some(press) = app.press.take() else {
                return;
            };
            let start_px = app.column_to_px(press.column);
            let end_px = app.column_to_px(mouse.column);
            if is_swipe(start_px, end_px) {
                app.dispatch(UiEvent::Swipe { start_px, end_px }, now);
                if let Some(id) = press.tile {
                    app.dispatch(UiEvent::TouchCancel(id), now);
                }
            } else if let Some(id) = press.tile {
                // The release belongs to the tile the press started on.
                app.dispatch(UiEvent::TouchEnd(id), now);
            }
        }
        _ => {}
    }
}

fn point_in_rect(x: u16, y: u16, rect: Rect) -> bool {
    x >= rect.x
        && x < rect.x.saturating_add(rect.width)
        && y >= rect.y
        && y < rect.y.saturating_add(rect.height)
}

struct Tui {
    terminal: Terminal<CrosstermBackend<Stdout>>,
}

impl Tui {
    fn new() -> Result<Self> {
        enable_raw_mode().context("failed to enable raw mode")?;
        let mut stdout = io::stdout();
        execute!(stdout, EnterAlternateScreen, EnableMouseCapture)
            .context("failed to enter alternate screen")?;
        let backend = CrosstermBackend::new(stdout);
        let terminal = Terminal::new(backend).context("failed to create terminal")?;
        Ok(Self { terminal })
    }

    fn draw(&mut self, app: &mut App) -> Result<()> {
        self.terminal.draw(|frame| draw_ui(frame, app))?;
        Ok(())
    }

    fn restore(&mut self) -> Result<()> {
        disable_raw_mode().context("failed to disable raw mode")?;
        execute!(
            self.terminal.backend_mut(),
            DisableMouseCapture,
            LeaveAlternateScreen
        )
        .context("failed to leave alternate screen")?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
struct Project {
    id: String,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    visible: Option<bool>,
    #[serde(default, deserialize_with = "null_as_empty")]
    collapsed: Vec<String>,
    #[serde(default, deserialize_with = "null_as_empty")]
    expanded: Vec<String>,
}

impl Project {
    fn is_visible(&self) -> bool {
        self.visible != Some(false)
    }

    fn is_interactive(&self) -> bool {
        !self.expanded.is_empty()
    }
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<String>>::deserialize(deserializer)?.unwrap_or_default())
}

struct ProjectStore {
    projects: Vec<Project>,
    error: Option<String>,
    site_url: String,
}

impl ProjectStore {
    fn load(client: &reqwest::blocking::Client, source: &str, site_url: &str) -> Self {
        match fetch_projects(client, source) {
            Ok(projects) => {
                info!(source, count = projects.len(), "loaded projects");
                Self::from_projects(projects, site_url)
            }
            Err(err) => {
                warn!(source, "Failed to load projects: {err:#}");
                Self {
                    projects: Vec::new(),
                    error: Some(LOAD_ERROR_MESSAGE.to_string()),
                    site_url: site_url.to_string(),
                }
            }
        }
    }

    fn from_projects(projects: Vec<Project>, site_url: &str) -> Self {
        Self {
            projects,
            error: None,
            site_url: site_url.to_string(),
        }
    }

    fn find(&self, id: &str) -> Option<&Project> {
        self.projects.iter().find(|project| project.id == id)
    }

    fn target_url(&self, project: &Project) -> String {
        match project.url.as_deref().map(str::trim) {
            Some(url) if !url.is_empty() => url.to_string(),
            _ => format!(
                "{}/projects/{}",
                self.site_url.trim_end_matches('/'),
                project.id
            ),
        }
    }
}

fn fetch_projects(client: &reqwest::blocking::Client, source: &str) -> Result<Vec<Project>> {
    let body = if source.starts_with("http://") || source.starts_with("https://") {
        let response = client
            .get(source)
            .send()
            .with_context(|| format!("failed to request {source}"))?;
        let status = response.status();
        if !status.is_success() {
            return Err(anyhow!("HTTP error! status: {}", status.as_u16()));
        }
        response
            .text()
            .with_context(|| format!("failed to read response from {source}"))?
    } else {
        let path = expand_tilde(source);
        fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?
    };

    parse_projects(&body)
}

fn parse_projects(body: &str) -> Result<Vec<Project>> {
    let records: Vec<Project> =
        serde_json::from_str(body).context("project list is not a JSON array of projects")?;
    Ok(visible_projects(records))
}

fn visible_projects(records: Vec<Project>) -> Vec<Project> {
    let mut seen = BTreeSet::new();
    let mut projects = Vec::with_capacity(records.len());

    for project in records {
        if !project.is_visible() {
            continue;
        }
        if project.collapsed.is_empty() {
            warn!(id = %project.id, "skipping project without collapsed lines");
            continue;
        }
        if !seen.insert(project.id.clone()) {
            warn!(id = %project.id, "skipping duplicate project id");
            continue;
        }
        projects.push(project);
    }

    projects
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Padding {
    container: u32,
    tile: u32,
}

impl Padding {
    fn for_viewport(viewport_px: u32) -> Self {
        if viewport_px <= 480 {
            Self {
                container: 16,
                tile: 12,
            }
        } else if viewport_px <= 768 {
            Self {
                container: 24,
                tile: 16,
            }
        } else {
            Self {
                container: 40,
                tile: 20,
            }
        }
    }

    fn total(self) -> u32 {
        2 * (self.container + self.tile)
    }
}

fn box_width(viewport_px: u32) -> usize {
    let available = viewport_px.saturating_sub(Padding::for_viewport(viewport_px).total());
    let chars = (available / GLYPH_WIDTH_PX) as usize;
    let clamped = chars.clamp(MIN_BOX_WIDTH, MAX_BOX_WIDTH);
    clamped - clamped % 2
}

fn box_border(width: usize) -> String {
    format!("+{}+", "-".repeat(width.saturating_sub(2)))
}

fn fit_line(line: &str, width: usize) -> String {
    let inner = width.saturating_sub(4);
    if line.chars().count() > inner {
        let kept: String = line.chars().take(width.saturating_sub(7)).collect();
        format!("{kept}{ELLIPSIS}")
    } else {
        line.to_string()
    }
}

fn content_row(line: &str, width: usize) -> String {
    let text = fit_line(line, width);
    let padding = width.saturating_sub(4).saturating_sub(text.chars().count());
    let left = padding / 2;
    format!(
        "| {}{}{} |",
        " ".repeat(left),
        text,
        " ".repeat(padding - left)
    )
}

fn format_tile(project: &Project, width: usize, expanded: bool) -> String {
    let mut rows: Vec<String> = project
        .collapsed
        .iter()
        .map(|line| content_row(line, width))
        .collect();

    if expanded {
        rows.extend(project.expanded.iter().map(|line| content_row(line, width)));
    } else {
        while rows.len() < MIN_COLLAPSED_ROWS {
            rows.push(content_row("", width));
        }
    }

    let border = box_border(width);
    let mut out = Vec::with_capacity(rows.len() + 2);
    out.push(border.clone());
    out.extend(rows);
    out.push(border);
    out.join("\n")
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
enum Theme {
    #[default]
    Black,
    Green,
    Blue,
}

const THEMES: [Theme; 3] = [Theme::Black, Theme::Green, Theme::Blue];

#[derive(Clone, Copy, Debug)]
struct Palette {
    bg: Color,
    fg: Color,
    accent: Color,
    dim: Color,
}

impl Theme {
    fn name(self) -> &'static str {
        match self {
            Theme::Black => "black",
            Theme::Green => "green",
            Theme::Blue => "blue",
        }
    }

    fn next(self) -> Self {
        let idx = THEMES.iter().position(|theme| *theme == self).unwrap_or(0);
        THEMES[(idx + 1) % THEMES.len()]
    }

    fn palette(self) -> Palette {
        match self {
            Theme::Black => Palette {
                bg: Color::Black,
                fg: Color::Rgb(220, 220, 220),
                accent: Color::White,
                dim: Color::DarkGray,
            },
            Theme::Green => Palette {
                bg: Color::Black,
                fg: Color::Rgb(51, 255, 51),
                accent: Color::Rgb(180, 255, 180),
                dim: Color::Rgb(24, 120, 24),
            },
            Theme::Blue => Palette {
                bg: Color::Rgb(0, 24, 72),
                fg: Color::Rgb(160, 200, 255),
                accent: Color::White,
                dim: Color::Rgb(70, 100, 160),
            },
        }
    }
}

fn is_swipe(start_px: u32, end_px: u32) -> bool {
    start_px.abs_diff(end_px) > SWIPE_THRESHOLD_PX
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
enum TimerKey {
    Resize,
    Collapse(String),
}

/// Cancellable scheduled callbacks, one pending deadline per key.
#[derive(Debug, Default)]
struct Scheduler {
    pending: HashMap<TimerKey, Instant>,
}

impl Scheduler {
    fn schedule(&mut self, key: TimerKey, at: Instant) {
        self.pending.insert(key, at);
    }

    fn cancel(&mut self, key: &TimerKey) -> bool {
        self.pending.remove(key).is_some()
    }

    fn is_pending(&self, key: &TimerKey) -> bool {
        self.pending.contains_key(key)
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.pending.values().min().copied()
    }

    fn take_due(&mut self, now: Instant) -> Vec<TimerKey> {
        let mut due: Vec<(Instant, TimerKey)> = self
            .pending
            .iter()
            .filter(|(_, at)| **at <= now)
            .map(|(key, at)| (*at, key.clone()))
            .collect();
        due.sort_by_key(|(at, _)| *at);

        for (_, key) in &due {
            self.pending.remove(key);
        }
        due.into_iter().map(|(_, key)| key).collect()
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
enum TouchPhase {
    #[default]
    Idle,
    FirstTap,
    Armed,
    Confirming,
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum UiEvent {
    PointerEnter(String),
    PointerLeave(String),
    Focus(String),
    Blur(String),
    TouchStart(String),
    TouchEnd(String),
    TouchCancel(String),
    Activate(String),
    CollapseTimeout(String),
    ThemeKey,
    Swipe { start_px: u32, end_px: u32 },
    ViewportResized { width_px: u32 },
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Effect {
    Schedule(TimerKey, Duration),
    Cancel(TimerKey),
    Navigate { id: String, url: String },
}

#[derive(Clone, Debug, Default)]
struct UiState {
    theme: Theme,
    box_width: usize,
    expanded: BTreeSet<String>,
    touch: HashMap<String, TouchPhase>,
    focused: Option<String>,
    hovered: Option<String>,
    rendered: HashMap<String, String>,
}

impl UiState {
    fn new(store: &ProjectStore, box_width: usize) -> Self {
        let mut state = Self {
            box_width,
            ..Self::default()
        };
        state.render_all(store);
        state
    }

    fn is_expanded(&self, id: &str) -> bool {
        self.expanded.contains(id)
    }

    fn touch_phase(&self, id: &str) -> TouchPhase {
        self.touch.get(id).copied().unwrap_or_default()
    }

    fn set_touch_phase(&mut self, id: &str, phase: TouchPhase) {
        if phase == TouchPhase::Idle {
            self.touch.remove(id);
        } else {
            self.touch.insert(id.to_string(), phase);
        }
    }

    fn tile_text(&self, id: &str) -> Option<&str> {
        self.rendered.get(id).map(String::as_str)
    }

    fn render_all(&mut self, store: &ProjectStore) {
        self.rendered = store
            .projects
            .iter()
            .map(|project| {
                let expanded = self.expanded.contains(&project.id);
                (
                    project.id.clone(),
                    format_tile(project, self.box_width, expanded),
                )
            })
            .collect();
    }

    fn rerender(&mut self, project: &Project) {
        let expanded = self.expanded.contains(&project.id);
        self.rendered.insert(
            project.id.clone(),
            format_tile(project, self.box_width, expanded),
        );
    }

    fn is_held(&self, id: &str) -> bool {
        self.hovered.as_deref() == Some(id) || self.focused.as_deref() == Some(id)
    }
}

fn expand_tile(state: &mut UiState, store: &ProjectStore, id: &str) -> bool {
    let Some(project) = store.find(id) else {
        return false;
    };
    if !project.is_interactive() || !state.expanded.insert(id.to_string()) {
        return false;
    }
    state.rerender(project);
    true
}

fn collapse_tile(state: &mut UiState, store: &ProjectStore, id: &str) {
    state.set_touch_phase(id, TouchPhase::Idle);
    if !state.expanded.remove(id) {
        return;
    }
    if let Some(project) = store.find(id) {
        state.rerender(project);
    }
}

fn collapse_with_cancel(
    state: &mut UiState,
    store: &ProjectStore,
    id: &str,
    effects: &mut Vec<Effect>,
) {
    effects.push(Effect::Cancel(TimerKey::Collapse(id.to_string())));
    collapse_tile(state, store, id);
}

fn hold_tile(state: &mut UiState, store: &ProjectStore, id: &str, effects: &mut Vec<Effect>) {
    if matches!(state.touch_phase(id), TouchPhase::FirstTap | TouchPhase::Armed) {
        effects.push(Effect::Cancel(TimerKey::Collapse(id.to_string())));
        state.set_touch_phase(id, TouchPhase::Idle);
    }
    expand_tile(state, store, id);
}

fn reduce(state: &mut UiState, store: &ProjectStore, event: UiEvent) -> Vec<Effect> {
    let mut effects = Vec::new();

    match event {
        UiEvent::ThemeKey => state.theme = state.theme.next(),
        UiEvent::Swipe { start_px, end_px } => {
            if is_swipe(start_px, end_px) {
                state.theme = state.theme.next();
            }
        }
        UiEvent::ViewportResized { width_px } => {
            state.box_width = box_width(width_px);
            state.render_all(store);
        }
        UiEvent::PointerEnter(id) => {
            hold_tile(state, store, &id, &mut effects);
            state.hovered = Some(id);
        }
        UiEvent::PointerLeave(id) => {
            if state.hovered.as_deref() == Some(id.as_str()) {
                state.hovered = None;
            }
            collapse_with_cancel(state, store, &id, &mut effects);
        }
        UiEvent::Focus(id) => {
            hold_tile(state, store, &id, &mut effects);
            state.focused = Some(id);
        }
        UiEvent::Blur(id) => {
            if state.focused.as_deref() == Some(id.as_str()) {
                state.focused = None;
            }
            collapse_with_cancel(state, store, &id, &mut effects);
        }
        UiEvent::TouchStart(id) => {
            let Some(project) = store.find(&id) else {
                return effects;
            };
            if !project.is_interactive() {
                state.set_touch_phase(&id, TouchPhase::Confirming);
            } else if state.is_expanded(&id) {
                effects.push(Effect::Cancel(TimerKey::Collapse(id.clone())));
                state.set_touch_phase(&id, TouchPhase::Confirming);
            } else if expand_tile(state, store, &id) {
                state.set_touch_phase(&id, TouchPhase::FirstTap);
                effects.push(Effect::Schedule(
                    TimerKey::Collapse(id),
                    AUTO_COLLAPSE_AFTER,
                ));
            }
        }
        UiEvent::TouchEnd(id) => match state.touch_phase(&id) {
            TouchPhase::FirstTap => state.set_touch_phase(&id, TouchPhase::Armed),
            TouchPhase::Confirming => {
                let Some(project) = store.find(&id) else {
                    state.set_touch_phase(&id, TouchPhase::Idle);
                    return effects;
                };
                effects.push(Effect::Navigate {
                    id: id.clone(),
                    url: store.target_url(project),
                });
                if state.is_held(&id) {
                    state.set_touch_phase(&id, TouchPhase::Idle);
                } else {
                    collapse_tile(state, store, &id);
                }
            }
            TouchPhase::Idle | TouchPhase::Armed => {}
        },
        UiEvent::TouchCancel(id) => match state.touch_phase(&id) {
            TouchPhase::FirstTap => state.set_touch_phase(&id, TouchPhase::Armed),
            TouchPhase::Confirming => {
                // The press already cancelled the pending collapse.
                if state.is_expanded(&id) && !state.is_held(&id) {
                    state.set_touch_phase(&id, TouchPhase::Armed);
                    effects.push(Effect::Schedule(
                        TimerKey::Collapse(id),
                        AUTO_COLLAPSE_AFTER,
                    ));
                } else {
                    state.set_touch_phase(&id, TouchPhase::Idle);
                }
            }
            TouchPhase::Idle | TouchPhase::Armed => {}
        },
        UiEvent::Activate(id) => {
            if let Some(project) = store.find(&id) {
                effects.push(Effect::Navigate {
                    url: store.target_url(project),
                    id,
                });
            }
        }
        UiEvent::CollapseTimeout(id) => collapse_tile(state, store, &id),
    }

    effects
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileConfig {
    source: Option<String>,
    site_url: Option<String>,
    analytics_endpoint: Option<String>,
    opener: Option<String>,
    cell_width_px: Option<u16>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Config {
    source: String,
    site_url: String,
    analytics_endpoint: Option<String>,
    /// Empty disables opening; the URL is only shown.
    opener: String,
    cell_width_px: u16,
}

impl Config {
    fn load(home: &Path, args: &Args) -> Result<Self> {
        let path = args
            .config
            .clone()
            .unwrap_or_else(|| home.join(CONFIG_FILE));
        let file: FileConfig = if path.exists() {
            let raw = fs::read_to_string(&path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            toml::from_str(&raw).with_context(|| format!("invalid config {}", path.display()))?
        } else {
            debug!(path = %path.display(), "no config file, using defaults");
            FileConfig::default()
        };

        Ok(Self::resolve(file, args))
    }

    fn resolve(file: FileConfig, args: &Args) -> Self {
        Self {
            source: args
                .source
                .clone()
                .or(file.source)
                .unwrap_or_else(|| DEFAULT_SOURCE.to_string()),
            site_url: args
                .site_url
                .clone()
                .or(file.site_url)
                .unwrap_or_else(|| DEFAULT_SITE_URL.to_string()),
            analytics_endpoint: file
                .analytics_endpoint
                .filter(|endpoint| !endpoint.trim().is_empty()),
            opener: file.opener.unwrap_or_else(default_opener),
            cell_width_px: file
                .cell_width_px
                .filter(|px| *px > 0)
                .unwrap_or(DEFAULT_CELL_WIDTH_PX),
        }
    }
}

fn default_opener() -> String {
    if cfg!(target_os = "macos") {
        String::from("open")
    } else {
        String::from("xdg-open")
    }
}

struct LogGuard {
    _file_guard: tracing_appender::non_blocking::WorkerGuard,
}

fn init_logging(home: &Path) -> Option<LogGuard> {
    if let Err(err) = fs::create_dir_all(home) {
        eprintln!("logging disabled: cannot create {}: {err}", home.display());
        return None;
    }

    let appender = tracing_appender::rolling::never(home, LOG_FILE);
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let default_level = if env::var("ASCII_LABS_LOG").as_deref() == Ok("1") {
        "info"
    } else {
        "warn"
    };

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .with(fmt::layer().with_writer(writer).with_ansi(false))
        .try_init()
        .ok()?;

    Some(LogGuard { _file_guard: guard })
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
struct LoggedEvent {
    event: String,
    data: Value,
}

#[derive(Clone)]
struct AnalyticsMirror {
    endpoint: String,
    client: reqwest::blocking::Client,
}

/// Append-only interaction log capped at `EVENT_LOG_CAP` entries.
struct EventLog {
    path: PathBuf,
    mirror: Option<AnalyticsMirror>,
}

impl EventLog {
    fn new(home: &Path, mirror: Option<AnalyticsMirror>) -> Self {
        Self {
            path: home.join(format!("{EVENT_LOG_KEY}.json")),
            mirror,
        }
    }

    fn entries(&self) -> Result<Vec<LoggedEvent>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let raw = fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read {}", self.path.display()))?;
        if raw.trim().is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_str(&raw)
            .with_context(|| format!("invalid event log {}", self.path.display()))
    }

    fn append(&self, event: &str, data: Value) -> Result<()> {
        let mut entries = match self.entries() {
            Ok(entries) => entries,
            Err(err) => {
                warn!("discarding unreadable event log: {err:#}");
                Vec::new()
            }
        };

        let entry = LoggedEvent {
            event: event.to_string(),
            data,
        };
        entries.push(entry.clone());
        if entries.len() > EVENT_LOG_CAP {
            let excess = entries.len() - EVENT_LOG_CAP;
            entries.drain(..excess);
        }

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        atomic_write(&self.path, &serde_json::to_string(&entries)?)?;

        if let Some(mirror) = self.mirror.clone() {
            mirror_to_endpoint(mirror, entry);
        }
        Ok(())
    }

    fn record(&self, event: &str, data: Value) {
        if let Err(err) = self.append(event, data) {
            warn!("Analytics logging failed: {err:#}");
        }
    }

    fn export(&self, path: &Path) -> Result<usize> {
        let entries = self.entries()?;
        let pretty = serde_json::to_string_pretty(&entries)?;
        fs::write(path, pretty).with_context(|| format!("failed writing {}", path.display()))?;
        Ok(entries.len())
    }
}

fn mirror_to_endpoint(mirror: AnalyticsMirror, entry: LoggedEvent) {
    std::thread::spawn(move || {
        let result = mirror.client.post(&mirror.endpoint).json(&entry).send();
        if let Err(err) = result {
            debug!(endpoint = %mirror.endpoint, "analytics mirror failed: {err}");
        }
    });
}

fn default_export_path() -> PathBuf {
    PathBuf::from(format!(
        "ascii-labs-analytics-{}.json",
        Utc::now().format("%Y-%m-%d")
    ))
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
struct Viewport {
    columns: u16,
    rows: u16,
    width_px: u16,
    height_px: u16,
}

impl Viewport {
    fn detect(columns: u16, rows: u16) -> Self {
        let (width_px, height_px) = match crossterm::terminal::window_size() {
            Ok(size) => (size.width, size.height),
            Err(_) => (0, 0),
        };
        Self {
            columns,
            rows,
            width_px,
            height_px,
        }
    }

    fn effective_width_px(&self, cell_width_px: u16) -> u32 {
        if self.width_px > 0 {
            u32::from(self.width_px)
        } else {
            u32::from(self.columns) * u32::from(cell_width_px)
        }
    }

    fn column_px(&self, cell_width_px: u16) -> u32 {
        if self.width_px > 0 && self.columns > 0 {
            (u32::from(self.width_px) / u32::from(self.columns)).max(1)
        } else {
            u32::from(cell_width_px)
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct TileSlot {
    id: String,
    area: Rect,
}

#[derive(Clone, Debug)]
struct Press {
    tile: Option<String>,
    column: u16,
}

struct App {
    config: Config,
    store: ProjectStore,
    state: UiState,
    scheduler: Scheduler,
    event_log: EventLog,
    viewport: Viewport,
    tiles: Vec<TileSlot>,
    press: Option<Press>,
    status: String,
}

impl App {
    fn new(config: Config, store: ProjectStore, event_log: EventLog, viewport: Viewport) -> Self {
        let width = box_width(viewport.effective_width_px(config.cell_width_px));
        let state = UiState::new(&store, width);
        let status = if store.error.is_some() {
            String::from("Press q to quit")
        } else {
            format!("Loaded {} projects  q quit  tab focus", store.projects.len())
        };

        Self {
            config,
            store,
            state,
            scheduler: Scheduler::default(),
            event_log,
            viewport,
            tiles: Vec::new(),
            press: None,
            status,
        }
    }

    fn dispatch(&mut self, event: UiEvent, now: Instant) {
        debug!(?event, "ui event");
        for effect in reduce(&mut self.state, &self.store, event) {
            match effect {
                Effect::Schedule(key, after) => self.scheduler.schedule(key, now + after),
                Effect::Cancel(key) => {
                    self.scheduler.cancel(&key);
                }
                Effect::Navigate { id, url } => self.navigate(&id, &url),
            }
        }
    }

    fn fire_due_timers(&mut self, now: Instant) {
        for key in self.scheduler.take_due(now) {
            match key {
                TimerKey::Resize => {
                    let width_px = self.viewport.effective_width_px(self.config.cell_width_px);
                    self.dispatch(UiEvent::ViewportResized { width_px }, now);
                }
                TimerKey::Collapse(id) => self.dispatch(UiEvent::CollapseTimeout(id), now),
            }
        }
    }

    fn poll_timeout(&self, now: Instant) -> Duration {
        self.scheduler
            .next_deadline()
            .map(|at| at.saturating_duration_since(now).min(IDLE_POLL))
            .unwrap_or(IDLE_POLL)
    }

    fn queue_resize(&mut self, viewport: Viewport, now: Instant) {
        let replaced = self.scheduler.is_pending(&TimerKey::Resize);
        debug!(columns = viewport.columns, replaced, "resize queued");
        self.viewport = viewport;
        self.scheduler.schedule(TimerKey::Resize, now + RESIZE_DEBOUNCE);
    }

    fn move_focus(&mut self, forward: bool, now: Instant) {
        let len = self.store.projects.len();
        if len == 0 {
            return;
        }

        let current = self
            .state
            .focused
            .as_ref()
            .and_then(|id| self.store.projects.iter().position(|p| &p.id == id));
        let next = match (current, forward) {
            (Some(idx), true) => (idx + 1) % len,
            (Some(idx), false) => (idx + len - 1) % len,
            (None, true) => 0,
            (None, false) => len - 1,
        };
        let next_id = self.store.projects[next].id.clone();

        if let Some(previous) = self.state.focused.clone() {
            self.dispatch(UiEvent::Blur(previous), now);
        }
        self.dispatch(UiEvent::Focus(next_id), now);
    }

    fn tile_at(&self, column: u16, row: u16) -> Option<String> {
        self.tiles
            .iter()
            .find(|slot| point_in_rect(column, row, slot.area))
            .map(|slot| slot.id.clone())
    }

    fn column_to_px(&self, column: u16) -> u32 {
        u32::from(column) * self.viewport.column_px(self.config.cell_width_px)
    }

    fn navigate(&mut self, id: &str, url: &str) {
        self.track_project_click(id, url);

        if self.config.opener.trim().is_empty() {
            self.status = format!("Selected {url}");
            return;
        }

        let spawned = Command::new(&self.config.opener)
            .arg(url)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn();
        match spawned {
            Ok(_) => {
                info!(id, url, "opened project");
                self.status = format!("Opened {url}");
            }
            Err(err) => {
                warn!(id, url, opener = %self.config.opener, "failed to open project: {err}");
                self.status = format!("Could not open {url}");
            }
        }
    }

    fn track_project_click(&self, id: &str, url: &str) {
        let viewport = self.viewport;
        self.event_log.record(
            "project_click",
            json!({
                "projectId": id,
                "url": url,
                "timestamp": Utc::now().timestamp_millis(),
                "userAgent": concat!("ascii-labs/", env!("CARGO_PKG_VERSION")),
                "screenSize": format!("{}x{}", viewport.width_px, viewport.height_px),
                "viewport": format!("{}x{}", viewport.columns, viewport.rows),
                "theme": self.state.theme.name(),
            }),
        );
    }
}

fn draw_ui(frame: &mut ratatui::Frame, app: &mut App) {
    let palette = app.state.theme.palette();
    let area = frame.area();
    frame.render_widget(
        Block::default().style(Style::default().bg(palette.bg).fg(palette.fg)),
        area,
    );

    let root = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(1), Constraint::Length(1)])
        .split(area);

    render_grid(frame, root[0], app, palette);
    render_footer(frame, root[1], app, palette);
}

fn render_grid(frame: &mut ratatui::Frame, area: Rect, app: &mut App, palette: Palette) {
    app.tiles.clear();
    if area.width == 0 || area.height == 0 {
        return;
    }

    let message = match &app.store.error {
        Some(error) => Some(error.as_str()),
        None if app.store.projects.is_empty() => Some(EMPTY_MESSAGE),
        None => None,
    };
    if let Some(message) = message {
        let para = Paragraph::new(Line::from(Span::styled(
            message,
            Style::default()
                .fg(palette.accent)
                .add_modifier(Modifier::BOLD),
        )))
        .alignment(Alignment::Center)
        .wrap(Wrap { trim: false });
        let y = area.y + area.height / 2;
        frame.render_widget(para, Rect::new(area.x, y, area.width, 1));
        return;
    }

    let heights: Vec<(String, u16)> = app
        .store
        .projects
        .iter()
        .filter_map(|project| {
            let text = app.state.tile_text(&project.id)?;
            Some((project.id.clone(), text.lines().count() as u16))
        })
        .collect();
    let has_many = app.store.projects.len() >= HAS_MANY_THRESHOLD;
    app.tiles = layout_tiles(area, &heights, app.state.box_width as u16, has_many);

    for slot in &app.tiles {
        let Some(text) = app.state.tile_text(&slot.id) else {
            continue;
        };
        let expanded = app.state.is_expanded(&slot.id);
        let focused = app.state.focused.as_deref() == Some(slot.id.as_str());
        let lines = tile_lines(text, expanded, focused, palette);
        frame.render_widget(Paragraph::new(lines), slot.area);
    }
}

fn tile_lines(
    text: &str,
    expanded: bool,
    focused: bool,
    palette: Palette,
) -> Vec<Line<'static>> {
    let base = if expanded {
        Style::default().fg(palette.accent)
    } else {
        Style::default().fg(palette.fg)
    };
    let border = if focused {
        base.add_modifier(Modifier::REVERSED)
    } else {
        base
    };
    let last = text.lines().count().saturating_sub(1);

    text.lines()
        .enumerate()
        .map(|(idx, row)| {
            let style = if idx == 0 || idx == last {
                border
            } else if idx == 1 {
                base.add_modifier(Modifier::BOLD)
            } else {
                base
            };
            Line::from(Span::styled(row.to_string(), style))
        })
        .collect()
}

fn layout_tiles(
    area: Rect,
    heights: &[(String, u16)],
    box_width: u16,
    has_many: bool,
) -> Vec<TileSlot> {
    if area.width == 0 || area.height == 0 || heights.is_empty() {
        return Vec::new();
    }

    let columns = if has_many {
        let span = box_width.saturating_add(TILE_GAP_COLUMNS);
        (area.width.saturating_add(TILE_GAP_COLUMNS) / span).max(1)
    } else {
        1
    };
    let grid_width = columns * box_width + (columns - 1) * TILE_GAP_COLUMNS;
    let x0 = area.x + area.width.saturating_sub(grid_width) / 2;

    let mut slots = Vec::with_capacity(heights.len());
    let mut y = area.y;
    for row in heights.chunks(columns as usize) {
        if y >= area.bottom() {
            break;
        }
        let row_height = row.iter().map(|(_, h)| *h).max().unwrap_or(0);
        for (col, (id, height)) in row.iter().enumerate() {
            let x = x0 + col as u16 * (box_width + TILE_GAP_COLUMNS);
            let tile = Rect::new(x, y, box_width, *height).intersection(area);
            if tile.is_empty() {
                continue;
            }
            slots.push(TileSlot {
                id: id.clone(),
                area: tile,
            });
        }
        y = y.saturating_add(row_height).saturating_add(TILE_GAP_ROWS);
    }

    slots
}

fn render_footer(frame: &mut ratatui::Frame, area: Rect, app: &App, palette: Palette) {
    let dim = Style::default().fg(palette.dim);
    let hint_width = THEME_HINT.chars().count() as u16 + 1;
    let parts = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Min(0), Constraint::Length(hint_width)])
        .split(area);

    frame.render_widget(
        Paragraph::new(Line::from(vec![
            Span::styled(format!(" [{}] ", app.state.theme.name()), dim),
            Span::styled(app.status.clone(), dim),
        ])),
        parts[0],
    );
    frame.render_widget(
        Paragraph::new(Line::from(Span::styled(THEME_HINT, dim))).alignment(Alignment::Right),
        parts[1],
    );
}

fn atomic_write(path: &Path, content: &str) -> Result<()> {
    let tmp = path.with_extension(format!("tmp.{}", Uuid::new_v4()));

    fs::write(&tmp, content).with_context(|| format!("failed writing {}", tmp.display()))?;
    fs::rename(&tmp, path)
        .with_context(|| format!("failed renaming {} to {}", tmp.display(), path.display()))?;
    Ok(())
}

fn resolve_labs_home() -> Result<PathBuf> {
    if let Ok(path) = env::var("ASCII_LABS_HOME") {
        let expanded = expand_tilde(path.trim());
        if !expanded.as_os_str().is_empty() {
            return Ok(expanded);
        }
    }

    let home = env::var("HOME").context("HOME is not set")?;
    Ok(PathBuf::from(home).join(".ascii-labs"))
}

fn expand_tilde(input: &str) -> PathBuf {
    if input.is_empty() {
        return PathBuf::new();
    }

    if input == "~" {
        if let Ok(home) = env::var("HOME") {
            return PathBuf::from(home);
        }
    }

    if let Some(rest) = input.strip_prefix("~/") {
        if let Ok(home) = env::var("HOME") {
            return PathBuf::from(home).join(rest);
        }
    }

    PathBuf::from(input)
}
