use crate::endpoint::Address;
use std::fmt;

mod worker;


pub use worker::{
    LeaderboardSource,
    LeaderboardSync,
    LeaderboardUpdate,
};

/// Rows surfaced to the UI; the rest stay in memory.
pub const DISPLAY_LIMIT: usize = 10;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScoreEntry {
    pub player: Address,
    pub score: u64,
    /// Unix seconds.
    pub timestamp: i64,
}

/// One pushed payload: the leaderboard read attached to the subscription,
/// in endpoint order.
pub type ScoreBatch = Vec<ScoreEntry>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RankTier {
    Gold,
    Silver,
    Bronze,
    Standard,
}

impl RankTier {
    pub fn is_podium(&self) -> bool {
        !matches!(self, RankTier::Standard)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RankBadge {
    pub tier: RankTier,
    pub label: String,
}

impl fmt::Display for RankBadge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label)
    }
}

/// Badge for a zero-based position. Past the podium every rank gets a plain
/// `th` suffix, so index 20 reads `21th`.
pub fn rank_badge(index: usize) -> RankBadge {
    let (tier, label) = match index {
        0 => (RankTier::Gold, "1st".to_string()),
        1 => (RankTier::Silver, "2nd".to_string()),
        2 => (RankTier::Bronze, "3rd".to_string()),
        n => (RankTier::Standard, format!("{}th", n + 1)),
    };
    RankBadge { tier, label }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LeaderboardView {
    rows: Vec<ScoreEntry>,
}

impl LeaderboardView {
    pub fn displayed(&self) -> &[ScoreEntry] {
        &self.rows[..self.rows.len().min(DISPLAY_LIMIT)]
    }

    pub fn all(&self) -> &[ScoreEntry] {
        &self.rows
    }

    pub fn hidden_count(&self) -> usize {
        self.rows.len().saturating_sub(DISPLAY_LIMIT)
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn ranked(&self) -> impl Iterator<Item = (RankBadge, &ScoreEntry)> {
        self.displayed()
            .iter()
            .enumerate()
            .map(|(index, entry)| (rank_badge(index), entry))
    }

    /// Highest score recorded for `player` anywhere in the full list.
    pub fn best_for(&self, player: &Address) -> Option<u64> {
        self.rows
            .iter()
            .filter(|entry| &entry.player == player)
            .map(|entry| entry.score)
            .max()
    }
}

/// The fresh rows replace the view wholesale, in the order given.
pub fn reconcile(_current: &LeaderboardView, fresh: Vec<ScoreEntry>) -> LeaderboardView {
    LeaderboardView { rows: fresh }
}

#[derive(Debug, Default)]
pub struct LeaderboardSynchronizer {
    view: LeaderboardView,
    reconciled: usize,
}

impl LeaderboardSynchronizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, fresh: Vec<ScoreEntry>) -> &LeaderboardView {
        self.view = reconcile(&self.view, fresh);
        self.reconciled += 1;
        &self.view
    }

    pub fn view(&self) -> &LeaderboardView {
        &self.view
    }

    /// Whether any fetch has landed yet, so an empty view can be told apart
    /// from one that is still loading.
    pub fn has_loaded(&self) -> bool {
        self.reconciled > 0
    }
}
