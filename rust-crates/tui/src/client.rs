use crate::{
    leaderboard_client::LeaderboardReader,
    stream_client::ScoreStream,
    ui,
};
use chrono::{
    DateTime,
    Local,
    Utc,
};
use color_eyre::eyre::{
    Result,
    WrapErr,
    eyre,
};
use live_sync::{
    Address,
    FeedMode,
    SubscriptionManager,
    SubscriptionRequest,
    UnixMillis,
    leaderboard::{
        LeaderboardSync,
        LeaderboardSynchronizer,
        LeaderboardUpdate,
        RankBadge,
        ScoreEntry,
    },
    notification::NotificationThrottle,
    spectator::SpectatorSimulator,
    synthetic::SyntheticEndpoint,
};
use local_state::HighScoreStore;
use std::{
    path::PathBuf,
    sync::Arc,
    time::Duration,
};
use tokio::{
    sync::mpsc,
    time,
};
use tracing::{
    error,
    info,
    warn,
};

pub const DEFAULT_SPECTATOR_TICK: Duration = Duration::from_millis(250);
/// How often the banner is checked for expiry.
const EXPIRY_CHECK_INTERVAL: Duration = Duration::from_millis(250);
const MAX_ERRORS: usize = 20;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub stream_url: Option<String>,
    pub leaderboard_url: Option<String>,
    pub contract: Address,
    pub player: Option<Address>,
    pub state_dir: PathBuf,
    pub poll_interval: Duration,
    pub spectator_tick: Duration,
    pub seed: Option<u64>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LeaderboardRow {
    pub badge: RankBadge,
    pub player: String,
    pub score: u64,
    pub time: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SpectatorPanel {
    Idle,
    Waiting {
        watching: u32,
    },
    Live {
        watching: u32,
        score: u32,
        health: u8,
        grid: Vec<String>,
    },
}

#[derive(Clone, Debug)]
pub struct AppSnapshot {
    pub feed_mode: FeedMode,
    pub notification: Option<String>,
    pub leaderboard_loaded: bool,
    pub rows: Vec<LeaderboardRow>,
    pub hidden_rows: usize,
    pub personal_best: u64,
    pub spectator: SpectatorPanel,
    pub status: String,
    pub errors: Vec<String>,
}

pub fn now_millis() -> UnixMillis {
    Utc::now().timestamp_millis()
}

fn format_local_time(unix_seconds: i64) -> String {
    DateTime::from_timestamp(unix_seconds, 0)
        .map(|dt| dt.with_timezone(&Local).format("%H:%M:%S").to_string())
        .unwrap_or_else(|| "-".to_string())
}

/// View state of the client. Everything here is owned by the UI loop; the
/// background tasks only reach it through channels.
pub struct AppController {
    leaderboard: LeaderboardSynchronizer,
    notifications: NotificationThrottle,
    spectator: SpectatorSimulator<SyntheticEndpoint>,
    high_scores: HighScoreStore,
    personal_best: u64,
    player: Option<Address>,
    status: String,
    errors: Vec<String>,
}

impl AppController {
    pub fn new(
        spectator: SpectatorSimulator<SyntheticEndpoint>,
        high_scores: HighScoreStore,
        player: Option<Address>,
    ) -> Result<Self> {
        let personal_best = high_scores
            .load()
            .map_err(|e| eyre!(e))
            .wrap_err("loading personal best failed")?;
        Ok(Self {
            leaderboard: LeaderboardSynchronizer::new(),
            notifications: NotificationThrottle::default(),
            spectator,
            high_scores,
            personal_best,
            player,
            status: String::new(),
            errors: Vec::new(),
        })
    }

    fn set_status(&mut self, message: impl Into<String>) {
        self.status = message.into();
        self.errors.clear();
    }

    fn push_error(&mut self, message: impl Into<String>) {
        let message = message.into();
        error!("{}", message);
        self.errors.push(message);
        if self.errors.len() > MAX_ERRORS {
            let drain = self.errors.len() - MAX_ERRORS;
            self.errors.drain(0..drain);
        }
    }

    pub fn ingest_update(&mut self, update: LeaderboardUpdate, now: UnixMillis) {
        match update {
            LeaderboardUpdate::Rows(rows) => self.ingest_rows(rows),
            LeaderboardUpdate::Pushed(batch) => self.ingest_pushed(&batch, now),
        }
    }

    fn ingest_rows(&mut self, rows: Vec<ScoreEntry>) {
        let best = {
            let view = self.leaderboard.apply(rows);
            self.player.as_ref().and_then(|player| view.best_for(player))
        };
        if let Some(best) = best {
            self.record_score(best);
        }
    }

    fn ingest_pushed(&mut self, batch: &[ScoreEntry], now: UnixMillis) {
        if let Some(event) = self.notifications.on_record_batch(batch, now) {
            info!(text = %event.text, "score notification");
        }
    }

    fn record_score(&mut self, score: u64) {
        match self.high_scores.record(score) {
            Ok(true) => {
                self.personal_best = score;
                self.set_status(format!("New personal best: {score}"));
            }
            Ok(false) => {}
            Err(err) => self.push_error(format!("Saving personal best failed: {err:#}")),
        }
    }

    /// Returns whether the banner changed.
    pub fn expire_notifications(&mut self, now: UnixMillis) -> bool {
        self.notifications.expire(now)
    }

    pub async fn toggle_spectating(&mut self) {
        if self.spectator.is_watching() {
            self.spectator.stop_watching().await;
            self.set_status("Stopped spectating");
        } else {
            self.spectator.start_watching(SubscriptionRequest::new());
            self.set_status("Spectating live game");
        }
    }

    pub async fn next_spectator_record(&mut self) {
        self.spectator.next_record().await
    }

    pub fn spectator_record(&mut self, now: UnixMillis) {
        self.spectator.apply_record(now);
    }

    pub async fn shutdown(&mut self) {
        self.spectator.stop_watching().await;
    }

    pub fn build_snapshot(&self, feed_mode: FeedMode, now: UnixMillis) -> AppSnapshot {
        let view = self.leaderboard.view();
        let rows = view
            .ranked()
            .map(|(badge, entry)| LeaderboardRow {
                badge,
                player: entry.player.abbreviated(),
                score: entry.score,
                time: format_local_time(entry.timestamp),
            })
            .collect();
        let spectator = if !self.spectator.is_watching() {
            SpectatorPanel::Idle
        } else {
            let watching = self.spectator.spectator_count();
            match (self.spectator.current(), self.spectator.grid()) {
                (Some(state), Some(grid)) => SpectatorPanel::Live {
                    watching,
                    score: state.score,
                    health: state.health,
                    grid: grid.lines(),
                },
                _ => SpectatorPanel::Waiting { watching },
            }
        };
        AppSnapshot {
            feed_mode,
            notification: self
                .notifications
                .current(now)
                .map(|event| event.text.clone()),
            leaderboard_loaded: self.leaderboard.has_loaded(),
            rows,
            hidden_rows: view.hidden_count(),
            personal_best: self.personal_best,
            spectator,
            status: self.status.clone(),
            errors: self.errors.clone(),
        }
    }
}

pub async fn run_app(config: AppConfig) -> Result<()> {
    let stream = Arc::new(ScoreStream::from_url(config.stream_url.as_deref()));
    let leaderboard_manager =
        SubscriptionManager::new(stream).with_poll_interval(config.poll_interval);
    let reader = LeaderboardReader::from_url(config.leaderboard_url.as_deref())
        .map_err(|e| eyre!(e))?;
    let synthetic = Arc::new(SyntheticEndpoint::new(config.spectator_tick));
    info!(
        poll_interval = ?leaderboard_manager.poll_interval(),
        spectator_tick = ?synthetic.tick(),
        "feeds configured"
    );
    let spectator_manager =
        SubscriptionManager::new(synthetic).with_poll_interval(config.poll_interval);
    let spectator = match config.seed {
        Some(seed) => SpectatorSimulator::seeded(spectator_manager, seed),
        None => SpectatorSimulator::from_os_rng(spectator_manager),
    };
    let high_scores = HighScoreStore::open(&config.state_dir)
        .map_err(|e| eyre!(e))
        .wrap_err("opening local state failed")?;
    let controller = AppController::new(spectator, high_scores, config.player.clone())?;

    let (leaderboard, updates) = LeaderboardSync::start(
        &leaderboard_manager,
        Arc::new(reader),
        SubscriptionRequest::leaderboard(config.contract.clone()),
    );

    let mut ui_state = ui::UiState::default();
    let mut input_events = ui::input_event_stream();

    info!("Starting UI");
    ui::terminal_enter(&mut ui_state)?;
    let res = run_loop(
        controller,
        leaderboard,
        updates,
        &mut ui_state,
        &mut input_events,
    )
    .await;
    ui::terminal_exit()?;
    res
}

async fn run_loop(
    mut controller: AppController,
    leaderboard: LeaderboardSync,
    mut updates: mpsc::UnboundedReceiver<LeaderboardUpdate>,
    ui_state: &mut ui::UiState,
    input_events: &mut ui::InputEventReceiver,
) -> Result<()> {
    info!("Running app loop");
    let mut expiry_ticker = time::interval(EXPIRY_CHECK_INTERVAL);
    ui::draw(ui_state, &controller.build_snapshot(leaderboard.mode(), now_millis()))
        .wrap_err("initial draw failed")?;

    let outcome: Result<()> = loop {
        tokio::select! {
            maybe_update = updates.recv() => {
                let Some(update) = maybe_update else {
                    warn!("leaderboard update channel closed");
                    break Err(eyre!("Leaderboard worker exited unexpectedly"));
                };
                controller.ingest_update(update, now_millis());
            }
            _ = controller.next_spectator_record() => {
                controller.spectator_record(now_millis());
            }
            _ = expiry_ticker.tick() => {
                if !controller.expire_notifications(now_millis()) {
                    continue;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received interrupt, exiting");
                break Ok(());
            }
            raw_ev = ui::next_raw_event(input_events) => {
                let event = match raw_ev {
                    Ok(event) => event,
                    Err(err) => break Err(err),
                };
                let Some(ev) = ui::interpret_event(event) else {
                    continue;
                };
                match ev {
                    ui::UserEvent::Quit => break Ok(()),
                    ui::UserEvent::ToggleSpectating => controller.toggle_spectating().await,
                    ui::UserEvent::RefreshNow => {
                        leaderboard.refresh_now();
                        controller.set_status("Refreshing leaderboard");
                    }
                    ui::UserEvent::Redraw => {}
                }
            }
        }
        let snapshot = controller.build_snapshot(leaderboard.mode(), now_millis());
        if let Err(err) = ui::draw(ui_state, &snapshot) {
            break Err(err).wrap_err("draw failed");
        }
    };

    leaderboard.stop().await;
    controller.shutdown().await;
    info!("All subscriptions released");
    outcome
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;
    use live_sync::{
        leaderboard::DISPLAY_LIMIT,
        spectator::GRID_ROWS,
    };
    use tempdir::TempDir;

    fn entry(player: &str, score: u64) -> ScoreEntry {
        ScoreEntry {
            player: Address::new(player),
            score,
            timestamp: 1_700_000_000,
        }
    }

    fn controller(temp_dir: &TempDir, player: Option<&str>) -> AppController {
        let manager =
            SubscriptionManager::new(Arc::new(SyntheticEndpoint::new(Duration::from_millis(50))));
        let spectator = SpectatorSimulator::seeded(manager, 42);
        let high_scores = HighScoreStore::open(temp_dir.path()).unwrap();
        AppController::new(spectator, high_scores, player.map(Address::new)).unwrap()
    }

    #[tokio::test]
    async fn build_snapshot__before_first_read__reports_not_loaded() {
        // given
        let temp_dir = TempDir::new("arena_tui_empty").unwrap();
        let controller = controller(&temp_dir, None);

        // when
        let snapshot = controller.build_snapshot(FeedMode::Connecting, 0);

        // then
        assert!(!snapshot.leaderboard_loaded);
        assert!(snapshot.rows.is_empty());
        assert_eq!(snapshot.spectator, SpectatorPanel::Idle);
    }

    #[tokio::test]
    async fn ingest_rows__shows_ten_ranked_rows_and_counts_the_rest() {
        // given
        let temp_dir = TempDir::new("arena_tui_rows").unwrap();
        let mut controller = controller(&temp_dir, None);
        let rows: Vec<_> = (0..14)
            .map(|i| entry(&format!("0x{i:040}"), 100 - i as u64))
            .collect();

        // when
        controller.ingest_update(LeaderboardUpdate::Rows(rows), 0);
        let snapshot = controller.build_snapshot(FeedMode::Push, 0);

        // then
        assert!(snapshot.leaderboard_loaded);
        assert_eq!(snapshot.rows.len(), DISPLAY_LIMIT);
        assert_eq!(snapshot.hidden_rows, 4);
        assert_eq!(snapshot.rows[0].badge.label, "1st");
        assert_eq!(snapshot.rows[0].player, "0x0000...0000");
        assert_eq!(snapshot.rows[0].score, 100);
    }

    #[tokio::test]
    async fn ingest_rows__player_on_board__persists_new_personal_best() {
        // given
        let temp_dir = TempDir::new("arena_tui_best").unwrap();
        let mut controller = controller(&temp_dir, Some("0xme"));

        // when
        controller.ingest_update(
            LeaderboardUpdate::Rows(vec![entry("0xrival", 900), entry("0xme", 640)]),
            0,
        );

        // then
        let snapshot = controller.build_snapshot(FeedMode::Push, 0);
        assert_eq!(snapshot.personal_best, 640);
        assert_eq!(snapshot.status, "New personal best: 640");
        let reopened = HighScoreStore::open(temp_dir.path()).unwrap();
        assert_eq!(reopened.load().unwrap(), 640);
    }

    #[tokio::test]
    async fn pushed_batch__shows_banner_until_it_expires() {
        // given
        let temp_dir = TempDir::new("arena_tui_banner").unwrap();
        let mut controller = controller(&temp_dir, None);

        // when
        controller.ingest_update(
            LeaderboardUpdate::Pushed(vec![entry("0x1234567890abcdef", 77)]),
            1_000,
        );

        // then
        let shown = controller.build_snapshot(FeedMode::Push, 2_000);
        assert_eq!(
            shown.notification.as_deref(),
            Some("New score: 77 by 0x1234...cdef")
        );
        assert!(!controller.expire_notifications(5_999));
        assert!(controller.expire_notifications(6_000));
        assert!(controller
            .build_snapshot(FeedMode::Push, 6_000)
            .notification
            .is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn toggle_spectating__waits_then_renders_then_resets() {
        // given
        let temp_dir = TempDir::new("arena_tui_spectate").unwrap();
        let mut controller = controller(&temp_dir, None);

        // when
        controller.toggle_spectating().await;

        // then
        assert_eq!(
            controller.build_snapshot(FeedMode::Push, 0).spectator,
            SpectatorPanel::Waiting { watching: 1 }
        );

        // when
        controller.next_spectator_record().await;
        controller.spectator_record(10);

        // then
        match controller.build_snapshot(FeedMode::Push, 10).spectator {
            SpectatorPanel::Live { watching, grid, .. } => {
                assert!(watching >= 1);
                assert_eq!(grid.len(), GRID_ROWS);
            }
            other => panic!("expected live panel, got {other:?}"),
        }

        // when
        controller.toggle_spectating().await;

        // then
        assert_eq!(
            controller.build_snapshot(FeedMode::Push, 20).spectator,
            SpectatorPanel::Idle
        );
    }
}
