use crate::endpoint::{
    Delivery,
    StreamEndpoint,
    StreamError,
    StreamHandlers,
    Subscription,
    SubscriptionRequest,
};
use std::{
    sync::{
        Arc,
        atomic::{
            AtomicBool,
            Ordering,
        },
    },
    time::Duration,
};
use tokio::{
    sync::{
        mpsc,
        oneshot,
        watch,
    },
    task::JoinHandle,
    time::{
        self,
        Interval,
    },
};
use tracing::{
    debug,
    info,
    warn,
};


pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(5000);

/// Shortest poll period the manager will run; shorter requests are raised to it.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Receiver side of a subscription. `refresh` is what degraded mode calls on
/// every poll tick in place of pushed records.
pub trait FeedCallbacks<R>: Send + 'static {
    fn on_data(&mut self, record: R);

    fn on_error(&mut self, err: StreamError) {
        warn!(%err, "stream delivery error");
    }

    fn refresh(&mut self);
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FeedMode {
    Connecting,
    Push,
    Polling,
    Closed,
}

/// Shared "still wanted" flag. Checked before every callback; once revoked it
/// never comes back.
#[derive(Clone, Debug)]
pub struct Liveness(Arc<AtomicBool>);

impl Liveness {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }

    pub fn is_alive(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub fn revoke(&self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Default for Liveness {
    fn default() -> Self {
        Self::new()
    }
}

pub struct SubscriptionManager<E> {
    endpoint: Arc<E>,
    poll_interval: Duration,
}

impl<E> Clone for SubscriptionManager<E> {
    fn clone(&self) -> Self {
        Self {
            endpoint: self.endpoint.clone(),
            poll_interval: self.poll_interval,
        }
    }
}

impl<E: StreamEndpoint> SubscriptionManager<E> {
    pub fn new(endpoint: Arc<E>) -> Self {
        Self {
            endpoint,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        if poll_interval < MIN_POLL_INTERVAL {
            warn!(
                requested = ?poll_interval,
                min = ?MIN_POLL_INTERVAL,
                "poll interval too short; clamping"
            );
        }
        self.poll_interval = poll_interval.max(MIN_POLL_INTERVAL);
        self
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Start one subscription attempt in the background. Must be called from
    /// within a tokio runtime. Concurrent opens for the same view are not
    /// deduplicated.
    pub fn open<C>(&self, request: SubscriptionRequest, callbacks: C) -> SubscriptionHandle
    where
        C: FeedCallbacks<E::Record>,
    {
        let liveness = Liveness::new();
        let (cancel_tx, cancel_rx) = oneshot::channel();
        let (mode_tx, mode_rx) = watch::channel(FeedMode::Connecting);
        let control = FeedControl {
            liveness: liveness.clone(),
            cancel: cancel_rx,
            mode: mode_tx,
            poll_interval: self.poll_interval,
        };
        let task = tokio::spawn(drive_feed(
            self.endpoint.clone(),
            request,
            callbacks,
            control,
        ));
        SubscriptionHandle {
            liveness,
            cancel: Some(cancel_tx),
            task: Some(task),
            mode: mode_rx,
        }
    }
}

/// Owns exactly one feed task. Dropping the handle cancels it too, but only
/// `close` waits for the release to finish.
pub struct SubscriptionHandle {
    liveness: Liveness,
    cancel: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
    mode: watch::Receiver<FeedMode>,
}

impl SubscriptionHandle {
    pub fn mode(&self) -> FeedMode {
        *self.mode.borrow()
    }

    pub fn is_closed(&self) -> bool {
        self.task.is_none()
    }

    /// Stop delivery and release the transport. Safe to call any number of
    /// times; once it returns no callback of this handle runs again.
    ///
    /// While the subscribe call is still pending, `close` does not wait for
    /// it: the feed task lets the call finish in the background and releases
    /// whatever it produced.
    pub async fn close(&mut self) {
        self.liveness.revoke();
        if let Some(cancel) = self.cancel.take() {
            let _ = cancel.send(());
        }
        let Some(task) = self.task.take() else {
            return;
        };
        if self.mode() == FeedMode::Connecting {
            debug!("closing while setup is pending; release continues in background");
            return;
        }
        if let Err(err) = task.await {
            if err.is_panic() {
                warn!(?err, "feed task panicked");
            }
        }
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.liveness.revoke();
        if let Some(cancel) = self.cancel.take() {
            let _ = cancel.send(());
        }
    }
}

struct FeedControl {
    liveness: Liveness,
    cancel: oneshot::Receiver<()>,
    mode: watch::Sender<FeedMode>,
    poll_interval: Duration,
}

impl FeedControl {
    fn set_mode(&self, mode: FeedMode) {
        self.mode.send_replace(mode);
    }
}

enum ActiveFeed<S, R> {
    Push {
        subscription: S,
        deliveries: mpsc::UnboundedReceiver<Delivery<R>>,
    },
    Poll {
        ticker: Interval,
    },
}

enum FeedEvent<R> {
    Delivery(Delivery<R>),
    Tick,
    PushEnded,
    Cancelled,
}

impl<S: Subscription, R> ActiveFeed<S, R> {
    fn poll(period: Duration) -> Self {
        ActiveFeed::Poll {
            ticker: time::interval(period),
        }
    }

    fn mode(&self) -> FeedMode {
        match self {
            ActiveFeed::Push { .. } => FeedMode::Push,
            ActiveFeed::Poll { .. } => FeedMode::Polling,
        }
    }

    async fn next_event(&mut self, cancel: &mut oneshot::Receiver<()>) -> FeedEvent<R> {
        match self {
            ActiveFeed::Push { deliveries, .. } => tokio::select! {
                biased;
                _ = cancel => FeedEvent::Cancelled,
                delivery = deliveries.recv() => match delivery {
                    Some(delivery) => FeedEvent::Delivery(delivery),
                    None => FeedEvent::PushEnded,
                },
            },
            ActiveFeed::Poll { ticker } => tokio::select! {
                biased;
                _ = cancel => FeedEvent::Cancelled,
                _ = ticker.tick() => FeedEvent::Tick,
            },
        }
    }

    async fn release(self) {
        match self {
            ActiveFeed::Push { subscription, .. } => {
                if let Err(err) = subscription.unsubscribe().await {
                    debug!(%err, "ignoring unsubscribe failure");
                }
            }
            ActiveFeed::Poll { .. } => {}
        }
    }
}

async fn drive_feed<E, C>(
    endpoint: Arc<E>,
    request: SubscriptionRequest,
    mut callbacks: C,
    mut control: FeedControl,
) where
    E: StreamEndpoint,
    C: FeedCallbacks<E::Record>,
{
    let (handlers, deliveries) = StreamHandlers::channel();
    // Setup always runs to completion so a late registration can still be
    // released below.
    let setup = endpoint.subscribe(&request, handlers).await;

    let mut feed = match setup {
        Ok(Some(subscription)) => ActiveFeed::Push {
            subscription,
            deliveries,
        },
        Ok(None) => {
            warn!(
                interval = ?control.poll_interval,
                "endpoint returned no subscription; falling back to polling"
            );
            ActiveFeed::poll(control.poll_interval)
        }
        Err(err) => {
            warn!(
                %err,
                interval = ?control.poll_interval,
                "subscribe failed; falling back to polling"
            );
            ActiveFeed::poll(control.poll_interval)
        }
    };

    if !control.liveness.is_alive() {
        debug!("owner lost interest during setup; releasing feed");
        feed.release().await;
        control.set_mode(FeedMode::Closed);
        return;
    }
    control.set_mode(feed.mode());
    info!(mode = ?feed.mode(), "subscription established");

    loop {
        let event = feed.next_event(&mut control.cancel).await;
        if !control.liveness.is_alive() {
            break;
        }
        match event {
            FeedEvent::Cancelled => break,
            FeedEvent::Delivery(Delivery::Data(record)) => callbacks.on_data(record),
            FeedEvent::Delivery(Delivery::Error(err)) => callbacks.on_error(err),
            FeedEvent::Tick => callbacks.refresh(),
            FeedEvent::PushEnded => {
                warn!(
                    interval = ?control.poll_interval,
                    "push stream ended; falling back to polling"
                );
                let ended =
                    std::mem::replace(&mut feed, ActiveFeed::poll(control.poll_interval));
                ended.release().await;
                control.set_mode(FeedMode::Polling);
            }
        }
    }

    feed.release().await;
    control.set_mode(FeedMode::Closed);
    debug!("subscription released");
}
