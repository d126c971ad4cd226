use crate::client::{
    AppSnapshot,
    SpectatorPanel,
};
use color_eyre::eyre::{
    Result,
    WrapErr,
    eyre,
};
use crossterm::{
    event::{
        self,
        Event,
        KeyCode,
        KeyEventKind,
        KeyModifiers,
    },
    terminal::{
        disable_raw_mode,
        enable_raw_mode,
    },
};
use live_sync::{
    FeedMode,
    leaderboard::RankTier,
};
use ratatui::{
    prelude::*,
    widgets::*,
};
use std::io::stdout;
use tokio::sync::mpsc;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UserEvent {
    Quit,
    ToggleSpectating,
    RefreshNow,
    Redraw,
}

#[derive(Default)]
pub struct UiState {
    terminal: Option<Terminal<CrosstermBackend<std::io::Stdout>>>,
}

pub type InputEventReceiver = mpsc::UnboundedReceiver<std::io::Result<Event>>;

/// Terminal input is read on a dedicated thread since `event::read` blocks.
pub fn input_event_stream() -> InputEventReceiver {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        loop {
            let event = event::read();
            let failed = event.is_err();
            if tx.send(event).is_err() || failed {
                break;
            }
        }
    });
    rx
}

pub async fn next_raw_event(input_events: &mut InputEventReceiver) -> Result<Event> {
    input_events
        .recv()
        .await
        .ok_or_else(|| eyre!("terminal input stream closed"))?
        .wrap_err("reading terminal input failed")
}

pub fn interpret_event(event: Event) -> Option<UserEvent> {
    match event {
        Event::Key(k) if k.kind == KeyEventKind::Press => match k.code {
            // raw mode swallows SIGINT, so Ctrl-C shows up as a key
            KeyCode::Char('c') if k.modifiers.contains(KeyModifiers::CONTROL) => {
                Some(UserEvent::Quit)
            }
            KeyCode::Char('q') | KeyCode::Esc => Some(UserEvent::Quit),
            KeyCode::Char('s') => Some(UserEvent::ToggleSpectating),
            KeyCode::Char('r') => Some(UserEvent::RefreshNow),
            _ => None,
        },
        Event::Resize(..) => Some(UserEvent::Redraw),
        _ => None,
    }
}

pub fn terminal_enter(state: &mut UiState) -> Result<()> {
    enable_raw_mode()?;
    crossterm::execute!(std::io::stdout(), crossterm::terminal::EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout());
    let terminal = Terminal::new(backend)?;
    state.terminal = Some(terminal);
    Ok(())
}

pub fn terminal_exit() -> Result<()> {
    disable_raw_mode()?;
    crossterm::execute!(std::io::stdout(), crossterm::terminal::LeaveAlternateScreen)?;
    Ok(())
}

pub fn draw(state: &mut UiState, snap: &AppSnapshot) -> Result<()> {
    if let Some(term) = state.terminal.as_mut() {
        term.draw(|f| ui(f, snap))?;
    }
    Ok(())
}

fn ui(f: &mut Frame, snap: &AppSnapshot) {
    f.render_widget(Clear, f.area());
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // title + feed mode
            Constraint::Length(3), // notification banner
            Constraint::Min(14),   // leaderboard + spectator
            Constraint::Length(5), // status + help
        ])
        .split(f.area());

    draw_title(f, chunks[0], snap);
    draw_notification(f, chunks[1], snap);
    let body = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(55), Constraint::Percentage(45)])
        .split(chunks[2]);
    draw_leaderboard(f, body[0], snap);
    draw_spectator(f, body[1], snap);
    draw_bottom(f, chunks[3], snap);
}

fn feed_label(mode: FeedMode) -> (&'static str, Color) {
    match mode {
        FeedMode::Connecting => ("connecting", Color::Yellow),
        FeedMode::Push => ("live push", Color::Green),
        FeedMode::Polling => ("polling", Color::Yellow),
        FeedMode::Closed => ("closed", Color::Red),
    }
}

fn draw_title(f: &mut Frame, area: Rect, snap: &AppSnapshot) {
    let (label, color) = feed_label(snap.feed_mode);
    let line = Line::from(vec![
        Span::styled(
            "Battle Arena ",
            Style::default().add_modifier(Modifier::BOLD),
        ),
        Span::raw("| feed: "),
        Span::styled(label, Style::default().fg(color)),
        Span::raw(format!(" | personal best: {}", snap.personal_best)),
    ]);
    let title = Paragraph::new(line).block(Block::default().borders(Borders::ALL));
    f.render_widget(title, area);
}

fn draw_notification(f: &mut Frame, area: Rect, snap: &AppSnapshot) {
    let text = snap.notification.clone().unwrap_or_default();
    let banner = Paragraph::new(text)
        .style(
            Style::default()
                .fg(Color::Green)
                .add_modifier(Modifier::BOLD),
        )
        .block(Block::default().borders(Borders::ALL).title("Latest"));
    f.render_widget(banner, area);
}

fn badge_style(tier: RankTier) -> Style {
    match tier {
        RankTier::Gold => Style::default()
            .fg(Color::Yellow)
            .add_modifier(Modifier::BOLD),
        RankTier::Silver => Style::default().fg(Color::Gray).add_modifier(Modifier::BOLD),
        RankTier::Bronze => Style::default()
            .fg(Color::LightRed)
            .add_modifier(Modifier::BOLD),
        RankTier::Standard => Style::default(),
    }
}

fn draw_leaderboard(f: &mut Frame, area: Rect, snap: &AppSnapshot) {
    let block = Block::default()
        .borders(Borders::ALL)
        .title("Real-Time Leaderboard");
    if snap.rows.is_empty() {
        let message = if snap.leaderboard_loaded {
            "No scores yet. Be the first to play!"
        } else {
            "Loading leaderboard..."
        };
        let empty = Paragraph::new(message)
            .alignment(Alignment::Center)
            .style(Style::default().fg(Color::DarkGray))
            .block(block);
        f.render_widget(empty, area);
        return;
    }

    let mut rows: Vec<Row> = snap
        .rows
        .iter()
        .map(|row| {
            let podium = row.badge.tier.is_podium();
            let row_style = if podium {
                Style::default().bg(Color::Rgb(40, 36, 10))
            } else {
                Style::default()
            };
            Row::new(vec![
                Cell::from(row.badge.to_string()).style(badge_style(row.badge.tier)),
                Cell::from(row.player.clone()),
                Cell::from(row.score.to_string())
                    .style(Style::default().add_modifier(Modifier::BOLD)),
                Cell::from(row.time.clone()).style(Style::default().fg(Color::DarkGray)),
            ])
            .style(row_style)
        })
        .collect();
    if snap.hidden_rows > 0 {
        rows.push(
            Row::new(vec![
                Cell::from(""),
                Cell::from(format!("...and {} more", snap.hidden_rows)),
            ])
            .style(Style::default().fg(Color::DarkGray)),
        );
    }
    let table = Table::new(
        rows,
        [
            Constraint::Length(6),
            Constraint::Length(15),
            Constraint::Length(12),
            Constraint::Length(10),
        ],
    )
    .header(
        Row::new(vec!["Rank", "Player", "Score", "Time"])
            .style(Style::default().add_modifier(Modifier::UNDERLINED)),
    )
    .block(block);
    f.render_widget(table, area);
}

fn draw_spectator(f: &mut Frame, area: Rect, snap: &AppSnapshot) {
    let block = Block::default()
        .borders(Borders::ALL)
        .title("Live Spectator Mode");
    let lines: Vec<Line> = match &snap.spectator {
        SpectatorPanel::Idle => vec![
            Line::from("Watch live games in real time."),
            Line::from(""),
            Line::from("Press s to start spectating"),
        ],
        SpectatorPanel::Waiting { watching } => vec![
            Line::from(format!("Live | {watching} watching")),
            Line::from(""),
            Line::from("Waiting for live game data..."),
        ],
        SpectatorPanel::Live {
            watching,
            score,
            health,
            grid,
        } => {
            let mut lines = vec![
                Line::from(format!("Live | {watching} watching")),
                Line::from(format!("Score: {score}  Health: {health}")),
            ];
            lines.extend(grid.iter().map(|row| Line::from(row.clone())));
            lines
        }
    };
    let panel = Paragraph::new(lines)
        .style(Style::default().fg(Color::Green))
        .block(block);
    f.render_widget(panel, area);
}

fn draw_bottom(f: &mut Frame, area: Rect, snap: &AppSnapshot) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(2), Constraint::Length(3)])
        .split(area);

    let status = if let Some(err) = snap.errors.last() {
        Paragraph::new(err.clone()).style(Style::default().fg(Color::Red))
    } else if snap.status.trim().is_empty() {
        Paragraph::new("Ready")
    } else {
        Paragraph::new(snap.status.clone()).style(Style::default().fg(Color::Green))
    };
    f.render_widget(status, chunks[0]);

    let help = Paragraph::new("s spectate | r refresh | q/Esc quit")
        .block(Block::default().borders(Borders::ALL).title("Help"));
    f.render_widget(help, chunks[1]);
}
