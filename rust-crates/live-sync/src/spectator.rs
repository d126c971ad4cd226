//! Synthetic spectator view: every inbound record is turned into a freshly
//! sampled game state, which is then rasterized onto a small character grid.

use crate::{
    UnixMillis,
    endpoint::{
        StreamEndpoint,
        SubscriptionRequest,
    },
    manager::{
        FeedCallbacks,
        FeedMode,
        SubscriptionHandle,
        SubscriptionManager,
    },
};
use itertools::Itertools;
use rand::{
    Rng,
    SeedableRng,
    rngs::StdRng,
};
use std::{
    fmt,
    marker::PhantomData,
};
use tokio::sync::mpsc;
use tracing::{
    debug,
    info,
};

pub const VIEWPORT_WIDTH: f64 = 800.0;
pub const VIEWPORT_HEIGHT: f64 = 600.0;

pub const GRID_COLUMNS: usize = 30;
pub const GRID_ROWS: usize = 10;
/// Viewport distance between neighbouring columns.
pub const COLUMN_STEP: f64 = 10.0;
/// Viewport distance between neighbouring rows.
pub const ROW_STEP: f64 = 20.0;

const PLAYER_REACH: f64 = 20.0;
const BULLET_REACH: f64 = 5.0;
const ASTEROID_REACH: f64 = 10.0;

pub const ASTEROID_COUNT: usize = 5;
pub const BULLET_COUNT: usize = 3;
pub const BULLET_VELOCITY: f64 = -500.0;
/// Bullets only spawn in the upper half of the viewport.
const BULLET_CEILING: f64 = 300.0;
const ASTEROID_MIN_SPEED: f64 = 100.0;
const ASTEROID_MAX_SPEED: f64 = 300.0;
const SCORE_LIMIT: u32 = 1000;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    fn within(&self, other: &Point, reach: f64) -> bool {
        (self.x - other.x).abs() < reach && (self.y - other.y).abs() < reach
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Body {
    pub position: Point,
    /// Pixels per second, negative is upward.
    pub vertical_velocity: f64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct GameStateSnapshot {
    pub player: Point,
    pub score: u32,
    pub health: u8,
    pub asteroids: Vec<Body>,
    pub bullets: Vec<Body>,
    pub timestamp: UnixMillis,
}

pub fn sample_snapshot<G: Rng>(rng: &mut G, now: UnixMillis) -> GameStateSnapshot {
    let player = Point::new(
        rng.random_range(0.0..VIEWPORT_WIDTH),
        rng.random_range(0.0..VIEWPORT_HEIGHT),
    );
    let score = rng.random_range(0..SCORE_LIMIT);
    let health = rng.random_range(1..=100);
    let asteroids = (0..ASTEROID_COUNT)
        .map(|_| Body {
            position: Point::new(
                rng.random_range(0.0..VIEWPORT_WIDTH),
                rng.random_range(0.0..VIEWPORT_HEIGHT),
            ),
            vertical_velocity: rng.random_range(ASTEROID_MIN_SPEED..ASTEROID_MAX_SPEED),
        })
        .collect();
    let bullets = (0..BULLET_COUNT)
        .map(|_| Body {
            position: Point::new(
                rng.random_range(0.0..VIEWPORT_WIDTH),
                rng.random_range(0.0..BULLET_CEILING),
            ),
            vertical_velocity: BULLET_VELOCITY,
        })
        .collect();
    GameStateSnapshot {
        player,
        score,
        health,
        asteroids,
        bullets,
        timestamp: now,
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Cell {
    Player,
    Bullet,
    Asteroid,
    Empty,
}

impl Cell {
    pub fn glyph(&self) -> char {
        match self {
            Cell::Player => '▲',
            Cell::Bullet => '•',
            Cell::Asteroid => '*',
            Cell::Empty => ' ',
        }
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.glyph())
    }
}

/// Classify grid cell `(col, row)`, sampled at viewport point
/// `(col * 10, row * 20)`. The player wins over bullets, bullets over
/// asteroids.
pub fn cell_at(snapshot: &GameStateSnapshot, col: usize, row: usize) -> Cell {
    let center = Point::new(col as f64 * COLUMN_STEP, row as f64 * ROW_STEP);
    if center.within(&snapshot.player, PLAYER_REACH) {
        Cell::Player
    } else if snapshot
        .bullets
        .iter()
        .any(|bullet| center.within(&bullet.position, BULLET_REACH))
    {
        Cell::Bullet
    } else if snapshot
        .asteroids
        .iter()
        .any(|asteroid| center.within(&asteroid.position, ASTEROID_REACH))
    {
        Cell::Asteroid
    } else {
        Cell::Empty
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SpectatorGrid {
    cells: Vec<Cell>,
}

impl SpectatorGrid {
    pub fn cell(&self, col: usize, row: usize) -> Option<Cell> {
        if col >= GRID_COLUMNS || row >= GRID_ROWS {
            return None;
        }
        self.cells.get(row * GRID_COLUMNS + col).copied()
    }

    pub fn rows(&self) -> impl Iterator<Item = &[Cell]> {
        self.cells.chunks(GRID_COLUMNS)
    }

    pub fn lines(&self) -> Vec<String> {
        self.rows().map(|row| row.iter().join("")).collect()
    }
}

impl fmt::Display for SpectatorGrid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.lines().join("\n"))
    }
}

pub fn render_grid(snapshot: &GameStateSnapshot) -> SpectatorGrid {
    let cells = (0..GRID_ROWS)
        .cartesian_product(0..GRID_COLUMNS)
        .map(|(row, col)| cell_at(snapshot, col, row))
        .collect();
    SpectatorGrid { cells }
}

/// Forwards "something arrived" to the simulator. Payloads are ignored; the
/// state is sampled locally.
struct SpectatorFeed<R> {
    ticks: mpsc::UnboundedSender<()>,
    _record: PhantomData<fn(R)>,
}

impl<R: Send + 'static> FeedCallbacks<R> for SpectatorFeed<R> {
    fn on_data(&mut self, _record: R) {
        let _ = self.ticks.send(());
    }

    fn refresh(&mut self) {
        let _ = self.ticks.send(());
    }
}

struct Watching {
    subscription: SubscriptionHandle,
    ticks: Option<mpsc::UnboundedReceiver<()>>,
}

pub struct SpectatorSimulator<E, G = StdRng> {
    manager: SubscriptionManager<E>,
    rng: G,
    watching: Option<Watching>,
    current: Option<GameStateSnapshot>,
    spectators: u32,
}

impl<E: StreamEndpoint> SpectatorSimulator<E, StdRng> {
    pub fn seeded(manager: SubscriptionManager<E>, seed: u64) -> Self {
        Self::new(manager, StdRng::seed_from_u64(seed))
    }

    pub fn from_os_rng(manager: SubscriptionManager<E>) -> Self {
        Self::new(manager, StdRng::from_os_rng())
    }
}

impl<E: StreamEndpoint, G: Rng> SpectatorSimulator<E, G> {
    pub fn new(manager: SubscriptionManager<E>, rng: G) -> Self {
        Self {
            manager,
            rng,
            watching: None,
            current: None,
            spectators: 0,
        }
    }

    pub fn is_watching(&self) -> bool {
        self.watching.is_some()
    }

    /// Idle -> Watching. Does nothing if already watching.
    pub fn start_watching(&mut self, request: SubscriptionRequest) {
        if self.watching.is_some() {
            return;
        }
        let (tx, rx) = mpsc::unbounded_channel();
        let subscription = self.manager.open(
            request,
            SpectatorFeed {
                ticks: tx,
                _record: PhantomData,
            },
        );
        self.watching = Some(Watching {
            subscription,
            ticks: Some(rx),
        });
        self.spectators = 1;
        info!("spectating started");
    }

    /// Watching -> Idle. Clears the snapshot and the spectator count.
    pub async fn stop_watching(&mut self) {
        if let Some(mut watching) = self.watching.take() {
            watching.subscription.close().await;
            info!("spectating stopped");
        }
        self.current = None;
        self.spectators = 0;
    }

    /// Resolves when the feed delivers the next record. Never resolves while
    /// idle, so it can sit in a `select!` unconditionally.
    pub async fn next_record(&mut self) {
        loop {
            let Some(ticks) = self
                .watching
                .as_mut()
                .and_then(|watching| watching.ticks.as_mut())
            else {
                return std::future::pending().await;
            };
            if ticks.recv().await.is_some() {
                return;
            }
            debug!("spectator feed ended");
            if let Some(watching) = self.watching.as_mut() {
                watching.ticks = None;
            }
        }
    }

    /// Replace the current snapshot with a newly sampled one. Ignored while
    /// idle.
    pub fn apply_record(&mut self, now: UnixMillis) -> Option<&GameStateSnapshot> {
        if self.watching.is_none() {
            return None;
        }
        let snapshot = sample_snapshot(&mut self.rng, now);
        self.spectators = self
            .spectators
            .saturating_add(self.rng.random_range(0..=2));
        self.current = Some(snapshot);
        self.current.as_ref()
    }

    pub fn current(&self) -> Option<&GameStateSnapshot> {
        self.current.as_ref()
    }

    pub fn grid(&self) -> Option<SpectatorGrid> {
        self.current.as_ref().map(render_grid)
    }

    pub fn spectator_count(&self) -> u32 {
        self.spectators
    }

    pub fn feed_mode(&self) -> Option<FeedMode> {
        self.watching
            .as_ref()
            .map(|watching| watching.subscription.mode())
    }
}
