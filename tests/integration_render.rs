#![allow(dead_code)]

include!("../src/main.rs");

use crossterm::event::KeyModifiers;
use ratatui::backend::TestBackend;

fn project(id: &str, collapsed: &[&str], expanded: &[&str]) -> Project {
    Project {
        id: id.to_string(),
        url: None,
        visible: None,
        collapsed: collapsed.iter().map(|s| s.to_string()).collect(),
        expanded: expanded.iter().map(|s| s.to_string()).collect(),
    }
}

fn app_with(store: ProjectStore) -> App {
    let home = std::env::temp_dir().join(format!("ascii-labs-render-{}", Uuid::new_v4()));
    let config = Config {
        source: String::from("unused"),
        site_url: String::from("https://labs.test"),
        analytics_endpoint: None,
        opener: String::new(),
        cell_width_px: 10,
    };
    let viewport = Viewport {
        columns: 80,
        rows: 30,
        width_px: 0,
        height_px: 0,
    };
    App::new(config, store, EventLog::new(&home, None), viewport)
}

fn sample_app() -> App {
    app_with(ProjectStore::from_projects(
        vec![
            project("alpha", &["Project Alpha", "a tiny tool"], &["Rust", "MIT"]),
            project("beta", &["Project Beta"], &[]),
        ],
        "https://labs.test",
    ))
}

fn draw(terminal: &mut Terminal<TestBackend>, app: &mut App) -> Vec<String> {
    terminal.draw(|frame| draw_ui(frame, app)).expect("draw");
    let buffer = terminal.backend().buffer();
    let width = buffer.area.width as usize;
    buffer
        .content
        .chunks(width)
        .map(|row| row.iter().map(|cell| cell.symbol()).collect::<String>())
        .collect()
}

fn terminal() -> Terminal<TestBackend> {
    Terminal::new(TestBackend::new(80, 30)).expect("terminal")
}

fn mouse(kind: MouseEventKind, column: u16, row: u16) -> MouseEvent {
    MouseEvent {
        kind,
        column,
        row,
        modifiers: KeyModifiers::NONE,
    }
}

#[test]
fn renders_ascii_tiles_and_theme_hint() {
    let mut app = sample_app();
    let mut terminal = terminal();
    let screen = draw(&mut terminal, &mut app);

    let border = box_border(40);
    assert!(screen[0].contains(&border));
    assert!(screen.iter().any(|row| row.contains(&content_row("Project Alpha", 40))));
    assert!(screen.iter().any(|row| row.contains("Project Beta")));
    assert!(screen[29].contains(THEME_HINT));
    assert!(screen[29].contains("[black]"));

    assert_eq!(app.tiles.len(), 2);
    assert_eq!(app.tiles[0].area, Rect::new(20, 0, 40, 6));
    assert_eq!(app.tiles[1].area, Rect::new(20, 7, 40, 6));
}

#[test]
fn title_row_is_bold() {
    let mut app = sample_app();
    let mut terminal = terminal();
    draw(&mut terminal, &mut app);

    let buffer = terminal.backend().buffer();
    let title = &buffer.content[(1 * 80 + 33) as usize];
    assert_eq!(title.symbol(), "P");
    assert!(title.modifier.contains(Modifier::BOLD));
}

#[test]
fn load_failure_shows_the_inline_message() {
    let mut app = app_with(ProjectStore {
        projects: Vec::new(),
        error: Some(LOAD_ERROR_MESSAGE.to_string()),
        site_url: String::from("https://labs.test"),
    });
    let mut terminal = terminal();
    let screen = draw(&mut terminal, &mut app);

    assert!(screen.iter().any(|row| row.contains(LOAD_ERROR_MESSAGE)));
    assert!(app.tiles.is_empty());
}

#[test]
fn empty_list_says_so() {
    let mut app = app_with(ProjectStore::from_projects(Vec::new(), "https://labs.test"));
    let mut terminal = terminal();
    let screen = draw(&mut terminal, &mut app);

    assert!(screen.iter().any(|row| row.contains(EMPTY_MESSAGE)));
    assert!(app.tiles.is_empty());
}

#[test]
fn hovering_a_tile_expands_it_on_screen() {
    let mut app = sample_app();
    let mut terminal = terminal();
    draw(&mut terminal, &mut app);
    let now = Instant::now();

    handle_mouse_event(mouse(MouseEventKind::Moved, 25, 2), &mut app, now);
    assert_eq!(app.state.hovered.as_deref(), Some("alpha"));
    assert!(app.state.is_expanded("alpha"));
    let screen = draw(&mut terminal, &mut app);
    assert!(screen.iter().any(|row| row.contains(&content_row("Rust", 40))));

    handle_mouse_event(mouse(MouseEventKind::Moved, 2, 2), &mut app, now);
    assert_eq!(app.state.hovered, None);
    assert!(!app.state.is_expanded("alpha"));
    let screen = draw(&mut terminal, &mut app);
    assert!(!screen.iter().any(|row| row.contains("Rust")));
}

#[test]
fn moving_between_tiles_hands_over_expansion() {
    let mut app = app_with(ProjectStore::from_projects(
        vec![
            project("alpha", &["Alpha"], &["a"]),
            project("beta", &["Beta"], &["b"]),
        ],
        "https://labs.test",
    ));
    let mut terminal = terminal();
    draw(&mut terminal, &mut app);
    let now = Instant::now();

    handle_mouse_event(mouse(MouseEventKind::Moved, 25, 1), &mut app, now);
    draw(&mut terminal, &mut app);
    let beta = app.tiles[1].area;
    handle_mouse_event(mouse(MouseEventKind::Moved, beta.x + 1, beta.y + 1), &mut app, now);

    assert!(!app.state.is_expanded("alpha"));
    assert!(app.state.is_expanded("beta"));
}

#[test]
fn tap_then_tap_again_opens_the_tile() {
    let mut app = sample_app();
    let mut terminal = terminal();
    draw(&mut terminal, &mut app);
    let now = Instant::now();

    handle_mouse_event(mouse(MouseEventKind::Down(MouseButton::Left), 25, 2), &mut app, now);
    handle_mouse_event(mouse(MouseEventKind::Up(MouseButton::Left), 25, 2), &mut app, now);
    assert!(app.state.is_expanded("alpha"));
    assert!(app.event_log.entries().expect("entries").is_empty());

    draw(&mut terminal, &mut app);
    handle_mouse_event(mouse(MouseEventKind::Down(MouseButton::Left), 25, 2), &mut app, now);
    handle_mouse_event(mouse(MouseEventKind::Up(MouseButton::Left), 25, 2), &mut app, now);

    assert_eq!(app.status, "Selected https://labs.test/projects/alpha");
    assert_eq!(app.event_log.entries().expect("entries").len(), 1);
    assert!(!app.scheduler.is_pending(&TimerKey::Collapse("alpha".into())));
}

#[test]
fn horizontal_drag_cycles_the_theme() {
    let mut app = sample_app();
    let mut terminal = terminal();
    draw(&mut terminal, &mut app);
    let now = Instant::now();

    // 10 columns x 10px = 100px
    handle_mouse_event(mouse(MouseEventKind::Down(MouseButton::Left), 12, 20), &mut app, now);
    handle_mouse_event(mouse(MouseEventKind::Up(MouseButton::Left), 2, 20), &mut app, now);
    assert_eq!(app.state.theme, Theme::Green);

    // 3 columns x 10px = 30px, below the threshold
    handle_mouse_event(mouse(MouseEventKind::Down(MouseButton::Left), 2, 20), &mut app, now);
    handle_mouse_event(mouse(MouseEventKind::Up(MouseButton::Left), 5, 20), &mut app, now);
    assert_eq!(app.state.theme, Theme::Green);
}

#[test]
fn swiping_across_a_tile_does_not_open_it() {
    let mut app = sample_app();
    let mut terminal = terminal();
    draw(&mut terminal, &mut app);
    let now = Instant::now();

    handle_mouse_event(mouse(MouseEventKind::Moved, 25, 2), &mut app, now);
    handle_mouse_event(mouse(MouseEventKind::Down(MouseButton::Left), 25, 2), &mut app, now);
    handle_mouse_event(mouse(MouseEventKind::Up(MouseButton::Left), 45, 2), &mut app, now);

    assert_eq!(app.state.theme, Theme::Green);
    assert!(app.event_log.entries().expect("entries").is_empty());
}

#[test]
fn arrow_keys_both_advance_the_theme() {
    let mut app = sample_app();
    let now = Instant::now();

    assert!(!handle_key(KeyCode::Left, &mut app, now));
    assert_eq!(app.state.theme, Theme::Green);
    assert!(!handle_key(KeyCode::Right, &mut app, now));
    assert_eq!(app.state.theme, Theme::Blue);
    assert!(!handle_key(KeyCode::Left, &mut app, now));
    assert_eq!(app.state.theme, Theme::Black);
}

#[test]
fn tab_focus_expands_and_enter_opens() {
    let mut app = sample_app();
    let now = Instant::now();

    handle_key(KeyCode::Tab, &mut app, now);
    assert_eq!(app.state.focused.as_deref(), Some("alpha"));
    assert!(app.state.is_expanded("alpha"));

    handle_key(KeyCode::Tab, &mut app, now);
    assert_eq!(app.state.focused.as_deref(), Some("beta"));
    assert!(!app.state.is_expanded("alpha"));
    assert!(!app.state.is_expanded("beta"));

    handle_key(KeyCode::Right, &mut app, now);
    handle_key(KeyCode::Enter, &mut app, now);
    assert_eq!(app.status, "Selected https://labs.test/projects/beta");

    let entries = app.event_log.entries().expect("entries");
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].data["projectId"], "beta");
    assert_eq!(entries[0].data["theme"], "green");
    assert_eq!(entries[0].data["viewport"], "80x30");

    handle_key(KeyCode::BackTab, &mut app, now);
    assert_eq!(app.state.focused.as_deref(), Some("alpha"));
}

#[test]
fn quit_keys() {
    let mut app = sample_app();
    let now = Instant::now();
    assert!(handle_key(KeyCode::Char('q'), &mut app, now));
    assert!(handle_key(KeyCode::Esc, &mut app, now));
    assert!(!handle_key(KeyCode::Char('x'), &mut app, now));
}

#[test]
fn themes_change_the_frame_background() {
    let mut app = sample_app();
    let mut terminal = terminal();
    draw(&mut terminal, &mut app);
    let black_bg = terminal.backend().buffer().content[0].bg;

    handle_key(KeyCode::Right, &mut app, Instant::now());
    handle_key(KeyCode::Right, &mut app, Instant::now());
    draw(&mut terminal, &mut app);
    let blue_bg = terminal.backend().buffer().content[0].bg;

    assert_eq!(black_bg, Color::Black);
    assert_eq!(blue_bg, Theme::Blue.palette().bg);
}
