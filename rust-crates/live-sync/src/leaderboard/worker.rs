use super::{
    ScoreBatch,
    ScoreEntry,
};
use crate::{
    endpoint::{
        StreamEndpoint,
        SubscriptionRequest,
    },
    manager::{
        FeedCallbacks,
        FeedMode,
        Liveness,
        SubscriptionHandle,
        SubscriptionManager,
    },
};
use anyhow::{
    Result,
    anyhow,
};
use std::sync::Arc;
use tokio::{
    sync::mpsc,
    task::JoinHandle,
};
use tracing::{
    debug,
    warn,
};

/// Full leaderboard read. A push only tells us something changed; the rows
/// always come from here.
pub trait LeaderboardSource: Send + Sync + 'static {
    fn fetch_leaderboard(&self) -> impl Future<Output = Result<Vec<ScoreEntry>>> + Send;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LeaderboardUpdate {
    /// A fresh full read, ready to reconcile.
    Rows(Vec<ScoreEntry>),
    /// The payload of a push, for the notification banner.
    Pushed(ScoreBatch),
}

enum RefetchCommand {
    FetchNow,
    Shutdown,
}

struct LeaderboardFeed {
    commands: mpsc::UnboundedSender<RefetchCommand>,
    updates: mpsc::UnboundedSender<LeaderboardUpdate>,
}

impl FeedCallbacks<ScoreBatch> for LeaderboardFeed {
    fn on_data(&mut self, batch: ScoreBatch) {
        let _ = self.updates.send(LeaderboardUpdate::Pushed(batch));
        let _ = self.commands.send(RefetchCommand::FetchNow);
    }

    fn refresh(&mut self) {
        let _ = self.commands.send(RefetchCommand::FetchNow);
    }
}

async fn refetch_worker<S: LeaderboardSource>(
    source: Arc<S>,
    liveness: Liveness,
    mut cmd_rx: mpsc::UnboundedReceiver<RefetchCommand>,
    update_tx: mpsc::UnboundedSender<LeaderboardUpdate>,
) -> Result<()> {
    while let Some(cmd) = cmd_rx.recv().await {
        match cmd {
            RefetchCommand::FetchNow => {
                // Collapse a burst of triggers into one read.
                let mut shutdown = false;
                while let Ok(queued) = cmd_rx.try_recv() {
                    if matches!(queued, RefetchCommand::Shutdown) {
                        shutdown = true;
                    }
                }
                if shutdown {
                    break;
                }
                match source.fetch_leaderboard().await {
                    Ok(rows) => {
                        if !liveness.is_alive() {
                            debug!("discarding leaderboard read for a stopped view");
                            break;
                        }
                        update_tx
                            .send(LeaderboardUpdate::Rows(rows))
                            .map_err(|_| anyhow!("leaderboard receiver dropped"))?;
                    }
                    Err(err) => warn!(?err, "leaderboard fetch failed"),
                }
            }
            RefetchCommand::Shutdown => break,
        }
    }
    Ok(())
}

/// Live leaderboard: one subscription plus a worker that performs the
/// reads it triggers. Updates arrive on the receiver returned by `start`.
pub struct LeaderboardSync {
    liveness: Liveness,
    subscription: SubscriptionHandle,
    commands: mpsc::UnboundedSender<RefetchCommand>,
    worker: Option<JoinHandle<Result<()>>>,
}

impl LeaderboardSync {
    pub fn start<E, S>(
        manager: &SubscriptionManager<E>,
        source: Arc<S>,
        request: SubscriptionRequest,
    ) -> (Self, mpsc::UnboundedReceiver<LeaderboardUpdate>)
    where
        E: StreamEndpoint<Record = ScoreBatch>,
        S: LeaderboardSource,
    {
        let liveness = Liveness::new();
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (update_tx, update_rx) = mpsc::unbounded_channel();
        let worker = tokio::spawn(refetch_worker(
            source,
            liveness.clone(),
            cmd_rx,
            update_tx.clone(),
        ));
        let _ = cmd_tx.send(RefetchCommand::FetchNow);
        let subscription = manager.open(
            request,
            LeaderboardFeed {
                commands: cmd_tx.clone(),
                updates: update_tx,
            },
        );
        let sync = Self {
            liveness,
            subscription,
            commands: cmd_tx,
            worker: Some(worker),
        };
        (sync, update_rx)
    }

    pub fn refresh_now(&self) {
        let _ = self.commands.send(RefetchCommand::FetchNow);
    }

    pub fn mode(&self) -> FeedMode {
        self.subscription.mode()
    }

    /// Tear down the subscription and the worker. Reads still in flight are
    /// dropped rather than published.
    pub async fn stop(mut self) {
        self.liveness.revoke();
        self.subscription.close().await;
        let _ = self.commands.send(RefetchCommand::Shutdown);
        if let Some(worker) = self.worker.take() {
            worker.abort();
            match worker.await {
                Ok(Err(err)) => warn!(?err, "leaderboard worker failed"),
                Err(err) if err.is_panic() => warn!(?err, "leaderboard worker panicked"),
                _ => {}
            }
        }
    }
}

impl Drop for LeaderboardSync {
    fn drop(&mut self) {
        self.liveness.revoke();
        if let Some(worker) = self.worker.take() {
            worker.abort();
        }
    }
}
