use crate::{
    UnixMillis,
    leaderboard::ScoreEntry,
};
use std::time::Duration;

/// How long a score banner stays up after it was derived.
pub const NOTIFICATION_WINDOW: Duration = Duration::from_millis(5000);

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NotificationEvent {
    pub text: String,
    pub expires_at: UnixMillis,
}

impl NotificationEvent {
    pub fn for_score(entry: &ScoreEntry, now: UnixMillis, window: Duration) -> Self {
        Self {
            text: format!(
                "New score: {} by {}",
                entry.score,
                entry.player.abbreviated()
            ),
            expires_at: now.saturating_add(window.as_millis() as i64),
        }
    }

    pub fn is_expired(&self, now: UnixMillis) -> bool {
        now >= self.expires_at
    }
}

/// Holds at most one banner. A fresh non-empty batch always replaces it;
/// clearing is left to the owner's timer via [`NotificationThrottle::expire`].
#[derive(Debug)]
pub struct NotificationThrottle {
    window: Duration,
    current: Option<NotificationEvent>,
}

impl Default for NotificationThrottle {
    fn default() -> Self {
        Self::new(NOTIFICATION_WINDOW)
    }
}

impl NotificationThrottle {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            current: None,
        }
    }

    /// The first record of the batch is the latest one in delivery order.
    /// Empty batches leave the current banner alone.
    pub fn on_record_batch(
        &mut self,
        records: &[ScoreEntry],
        now: UnixMillis,
    ) -> Option<NotificationEvent> {
        let latest = records.first()?;
        let event = NotificationEvent::for_score(latest, now, self.window);
        self.current = Some(event.clone());
        Some(event)
    }

    pub fn current(&self, now: UnixMillis) -> Option<&NotificationEvent> {
        self.current.as_ref().filter(|event| !event.is_expired(now))
    }

    /// Drop the banner if its window has passed. Returns whether anything
    /// was cleared.
    pub fn expire(&mut self, now: UnixMillis) -> bool {
        match &self.current {
            Some(event) if event.is_expired(now) => {
                self.current = None;
                true
            }
            _ => false,
        }
    }

    pub fn next_expiry(&self) -> Option<UnixMillis> {
        self.current.as_ref().map(|event| event.expires_at)
    }
}
