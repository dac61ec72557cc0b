//! Real-time force-sensor monitor.
//!
//! Usage:
//!   cargo run --bin tui                       # discover the controller and stream
//!   cargo run --bin tui -- --port /dev/ttyACM0
//!   cargo run --bin tui -- --simulate         # built-in signal generator, no hardware
//!
//! Keys
//! ----
//!   c        connect (re-enables auto-reconnect)
//!   d        disconnect
//!   r        reset hold time on all channels
//!   1 … 6    hold a simulated press on that channel (simulate mode)
//!   q / Esc  quit

use std::collections::VecDeque;
use std::f64::consts::PI;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use anyhow::Result;
use crossterm::{
    event::{self, Event, KeyCode, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Gauge, Paragraph, Sparkline},
    Frame, Terminal,
};

use fsr_rs::channel::RawRange;
use fsr_rs::error::FsrError;
use fsr_rs::fsr_client::{FsrClient, FsrClientConfig, FsrHandle};
use fsr_rs::protocol::{encode_frame, ADC_MAX, CHANNEL_COUNT, CHANNEL_NAMES};
use fsr_rs::types::{ChannelState, ConnectionState, FsrEvent};

// ── Constants ─────────────────────────────────────────────────────────────────

/// Intensity samples kept per channel for the sparkline.
const TRACE_LEN: usize = 240;

/// Simulated controller tick.
const SIM_TICK: Duration = Duration::from_millis(20);

/// Raw level below which a simulated sensor counts as untouched.
const SIM_REST_CEILING: f64 = 40.0;

const COLORS: [Color; CHANNEL_COUNT] = [
    Color::Cyan,
    Color::Yellow,
    Color::Green,
    Color::Magenta,
    Color::LightBlue,
    Color::LightRed,
];

const SPINNER: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];

// ── App state (shared with the event task via Arc<Mutex<_>>) ──────────────────

pub struct App {
    pub link: ConnectionState,
    pub device: Option<String>,
    pub simulated: bool,
    pub channels: [ChannelState; CHANNEL_COUNT],
    traces: [VecDeque<u64>; CHANNEL_COUNT],
    /// Upper bound of the shaped intensity, for gauge scaling.
    pub ceiling: f64,

    total_frames: u64,
    frame_times: VecDeque<Instant>,

    pub last_error: Option<String>,
    /// Channels held down from the keyboard in simulate mode.
    pub sim_pressed: [bool; CHANNEL_COUNT],
}

impl App {
    fn new(ceiling: f64, simulated: bool) -> Self {
        Self {
            link: ConnectionState::Disconnected,
            device: None,
            simulated,
            channels: std::array::from_fn(ChannelState::new),
            traces: std::array::from_fn(|_| VecDeque::with_capacity(TRACE_LEN)),
            ceiling: ceiling.max(1.0),
            total_frames: 0,
            frame_times: VecDeque::new(),
            last_error: None,
            sim_pressed: [false; CHANNEL_COUNT],
        }
    }

    fn push_frame(&mut self, channels: &[ChannelState; CHANNEL_COUNT]) {
        self.channels = channels.clone();
        for (trace, ch) in self.traces.iter_mut().zip(channels.iter()) {
            if trace.len() >= TRACE_LEN {
                trace.pop_front();
            }
            trace.push_back((ch.shaped / self.ceiling * 100.0).round() as u64);
        }
        self.total_frames += 1;
        let now = Instant::now();
        self.frame_times.push_back(now);
        while self
            .frame_times
            .front()
            .is_some_and(|t| now.duration_since(*t) > Duration::from_secs(1))
        {
            self.frame_times.pop_front();
        }
    }

    fn frame_rate(&self) -> usize {
        self.frame_times.len()
    }
}

fn lock(app: &Mutex<App>) -> MutexGuard<'_, App> {
    app.lock().unwrap_or_else(|p| p.into_inner())
}

// ── Event task ────────────────────────────────────────────────────────────────

fn spawn_event_task(handle: &FsrHandle, app: Arc<Mutex<App>>) {
    let mut events = handle.subscribe_all();
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            let mut s = lock(&app);
            match event {
                FsrEvent::AllUpdated(snapshot) => s.push_frame(&snapshot),
                FsrEvent::ConnectionStatus { state, device } => {
                    s.link = state;
                    s.device = device;
                    if state.is_connected() {
                        s.last_error = None;
                    }
                }
                FsrEvent::Error(e) => s.last_error = Some(e.to_string()),
                FsrEvent::HoldTriggered { channel, current_hold } => {
                    log::info!("{} held for {current_hold:.1} s", CHANNEL_NAMES[channel]);
                }
                FsrEvent::ValueChanged { .. } | FsrEvent::ActivationChanged { .. } => {}
            }
        }
    });
}

// ── Simulator ─────────────────────────────────────────────────────────────────

/// Raw reading for one simulated sensor at time `t`.
///
/// Idle channels hover just above the floating-pin floor with a little
/// noise; pressed channels swell toward ~900.
fn sim_raw(t: f64, ch: usize, pressed: bool) -> f64 {
    let phi = ch as f64 * PI / 3.0;
    let nx = t * 1000.7 + ch as f64 * 137.508;
    let noise = ((nx.sin() * 9973.1).fract() - 0.5) * 6.0;
    if pressed {
        (700.0 + 180.0 * (2.0 * PI * 0.7 * t + phi).sin() + noise).clamp(11.0, 990.0)
    } else {
        (20.0 + 4.0 * (2.0 * PI * 0.2 * t + phi).sin() + noise).clamp(11.0, ADC_MAX)
    }
}

/// Feed synthetic controller lines through the pipeline at the real tick rate.
///
/// A slow automatic press wave runs across the channels; keys `1`–`6` add
/// manual presses on top.
fn spawn_simulator(handle: FsrHandle, app: Arc<Mutex<App>>) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(SIM_TICK);
        let dt = SIM_TICK.as_secs_f64();
        let mut t = 0.0_f64;
        loop {
            ticker.tick().await;
            let pressed = lock(&app).sim_pressed;
            let wave = ((t / 3.0) as usize) % (CHANNEL_COUNT * 2);
            let samples: [f64; CHANNEL_COUNT] =
                std::array::from_fn(|ch| sim_raw(t, ch, pressed[ch] || wave == ch * 2));
            if let Err(FsrError::Closed) = handle.inject_line(&encode_frame(&samples)).await {
                break;
            }
            t += dt;
        }
    });
}

// ── Drawing ───────────────────────────────────────────────────────────────────

fn draw(frame: &mut Frame, app: &App) {
    let area = frame.area();
    let root = Layout::vertical([
        Constraint::Length(3),
        Constraint::Min(0),
        Constraint::Length(3),
    ])
    .split(area);

    draw_header(frame, root[0], app);
    draw_channels(frame, root[1], app);
    draw_footer(frame, root[2], app);
}

fn spinner_str() -> &'static str {
    let ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    SPINNER[(ms / 100) as usize % SPINNER.len()]
}

/// Status bar: title, link state, frame rate, frame count.
fn draw_header(frame: &mut Frame, area: Rect, app: &App) {
    let (label, color) = if app.simulated {
        ("◆ Simulated".to_owned(), Color::Cyan)
    } else {
        match app.link {
            ConnectionState::Connected => (
                format!("● {}", app.device.as_deref().unwrap_or("?")),
                Color::Green,
            ),
            ConnectionState::Connecting { attempt } => (
                format!("{} Connecting (attempt {attempt})…", spinner_str()),
                Color::Yellow,
            ),
            ConnectionState::Reconnecting => {
                (format!("{} Reconnecting…", spinner_str()), Color::Yellow)
            }
            ConnectionState::Disconnected => {
                let reason = app
                    .last_error
                    .as_deref()
                    .map(|e| format!(" ({e})"))
                    .unwrap_or_default();
                (format!("○ Disconnected{reason}"), Color::Red)
            }
        }
    };

    let line = Line::from(vec![
        Span::styled(
            " FSR Monitor ",
            Style::default().fg(Color::White).add_modifier(Modifier::BOLD),
        ),
        sep(),
        Span::styled(label, Style::default().fg(color).add_modifier(Modifier::BOLD)),
        sep(),
        Span::styled(
            format!("{} frames/s", app.frame_rate()),
            Style::default().fg(Color::White),
        ),
        sep(),
        Span::styled(
            format!("{} frames", app.total_frames),
            Style::default().fg(Color::DarkGray),
        ),
        Span::raw(" "),
    ]);

    frame.render_widget(
        Paragraph::new(line).block(Block::default().borders(Borders::ALL)),
        area,
    );
}

#[inline]
fn sep<'a>() -> Span<'a> {
    Span::styled(" │ ", Style::default().fg(Color::DarkGray))
}

/// One row per channel: gauge on the left, intensity trace on the right.
fn draw_channels(frame: &mut Frame, area: Rect, app: &App) {
    let rows = Layout::vertical([Constraint::Ratio(1, CHANNEL_COUNT as u32); CHANNEL_COUNT])
        .split(area);
    for (ch, row) in rows.iter().enumerate() {
        let cols =
            Layout::horizontal([Constraint::Percentage(40), Constraint::Percentage(60)]).split(*row);
        let state = &app.channels[ch];
        let color = COLORS[ch];
        let title_style = if state.active {
            Style::default().fg(color).add_modifier(Modifier::BOLD)
        } else {
            Style::default().fg(Color::DarkGray)
        };
        let title = format!(
            " {} {} raw {:4.0}  hold {:6.2}  press {:4.1}s ",
            CHANNEL_NAMES[ch],
            if state.active { "●" } else { "○" },
            state.raw,
            state.hold_time,
            state.current_hold,
        );

        let ratio = (state.shaped / app.ceiling).clamp(0.0, 1.0);
        frame.render_widget(
            Gauge::default()
                .block(
                    Block::default()
                        .borders(Borders::ALL)
                        .title(Span::styled(title, title_style)),
                )
                .gauge_style(Style::default().fg(color))
                .ratio(ratio)
                .label(format!("{:.3}", state.shaped)),
            cols[0],
        );

        let trace: Vec<u64> = app.traces[ch].iter().copied().collect();
        frame.render_widget(
            Sparkline::default()
                .block(Block::default().borders(Borders::ALL))
                .style(Style::default().fg(color))
                .max(100)
                .data(&trace),
            cols[1],
        );
    }
}

fn draw_footer(frame: &mut Frame, area: Rect, app: &App) {
    let mut spans = vec![
        Span::raw(" "),
        key("[c]"),
        Span::raw("Connect  "),
        key("[d]"),
        Span::raw("Disconnect  "),
        key("[r]"),
        Span::raw("Reset holds  "),
    ];
    if app.simulated {
        spans.push(key("[1-6]"));
        spans.push(Span::raw("Press  "));
    }
    spans.push(key("[q]"));
    spans.push(Span::raw("Quit"));

    let second = match &app.last_error {
        Some(e) => Line::from(Span::styled(
            format!(" Last error: {e}"),
            Style::default().fg(Color::Yellow),
        )),
        None => Line::from(Span::styled(
            " No errors",
            Style::default().fg(Color::DarkGray),
        )),
    };

    frame.render_widget(
        Paragraph::new(vec![Line::from(spans), second])
            .block(Block::default().borders(Borders::ALL)),
        area,
    );
}

#[inline]
fn key(s: &str) -> Span<'_> {
    Span::styled(
        s,
        Style::default()
            .fg(Color::Yellow)
            .add_modifier(Modifier::BOLD),
    )
}

// ── Main ──────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    use std::io::IsTerminal as _;
    if !io::stdout().is_terminal() {
        eprintln!("Error: fsr-rs tui requires a real terminal (TTY).");
        eprintln!("Run it directly in a terminal emulator, not piped or redirected.");
        std::process::exit(1);
    }

    // ── Logging ─────────────────────────────────────────────────────────────
    // Logs go to fsr-tui.log so they never interfere with the display.
    //   RUST_LOG=debug cargo run --bin tui
    {
        use std::fs::File;
        if let Ok(file) = File::create("fsr-tui.log") {
            env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
                .target(env_logger::Target::Pipe(Box::new(file)))
                .init();
        }
    }

    let args: Vec<String> = std::env::args().collect();
    let simulate = args.iter().any(|a| a == "--simulate");
    let port = args
        .iter()
        .position(|a| a == "--port")
        .and_then(|i| args.get(i + 1).cloned());

    let mut config = FsrClientConfig {
        port_name: port,
        auto_connect: !simulate,
        ..FsrClientConfig::default()
    };
    if simulate {
        // Simulated sensors rest around 20; calibrate that floor to zero.
        for ch in config.channels.iter_mut() {
            ch.calibration = Some(RawRange {
                min: SIM_REST_CEILING,
                max: ADC_MAX,
            });
        }
    }
    let ceiling = config
        .channels
        .iter()
        .map(|c| {
            if c.amplification.enabled {
                c.amplification.max_multiplier
            } else {
                1.0
            }
        })
        .fold(1.0, f64::max);

    let handle = FsrClient::new(config).start()?;
    let app = Arc::new(Mutex::new(App::new(ceiling, simulate)));
    spawn_event_task(&handle, Arc::clone(&app));
    if simulate {
        spawn_simulator(handle.clone(), Arc::clone(&app));
    }

    // ── Terminal setup ────────────────────────────────────────────────────────
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let mut terminal = Terminal::new(CrosstermBackend::new(stdout))?;
    let tick = Duration::from_millis(33); // ~30 FPS

    // ── Main loop ─────────────────────────────────────────────────────────────
    loop {
        {
            let s = lock(&app);
            terminal.draw(|f| draw(f, &s))?;
        }

        if !event::poll(tick)? {
            continue;
        }
        let Event::Key(key) = event::read()? else {
            continue;
        };

        // Raw mode delivers Ctrl+C as a key event.
        let ctrl_c =
            key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c');
        if ctrl_c {
            break;
        }

        match key.code {
            KeyCode::Char('q') | KeyCode::Esc => break,
            KeyCode::Char('c') => {
                let h = handle.clone();
                tokio::spawn(async move {
                    let _ = h.connect().await;
                });
            }
            KeyCode::Char('d') => {
                let h = handle.clone();
                tokio::spawn(async move {
                    let _ = h.disconnect().await;
                });
            }
            KeyCode::Char('r') => {
                let h = handle.clone();
                tokio::spawn(async move {
                    let _ = h.reset_hold(None).await;
                });
            }
            KeyCode::Char(c @ '1'..='6') if simulate => {
                let ch = (c as u8 - b'1') as usize;
                let mut s = lock(&app);
                s.sim_pressed[ch] = !s.sim_pressed[ch];
            }
            _ => {}
        }
    }

    // ── Teardown ──────────────────────────────────────────────────────────────
    let _ = handle.shutdown().await;
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;
    Ok(())
}
