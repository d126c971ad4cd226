use crate::{
    endpoint::{
        StreamEndpoint,
        StreamError,
        StreamHandlers,
        Subscription,
        SubscriptionRequest,
    },
    manager::FeedCallbacks,
};
use std::{
    sync::{
        Arc,
        Mutex,
    },
    time::Duration,
};
use tokio::{
    sync::oneshot,
    time,
};

/// Let spawned tasks run. Under a paused clock this advances time by 1ms once
/// every task is idle.
pub async fn settle() {
    time::sleep(Duration::from_millis(1)).await;
}

#[derive(Clone, Copy, Debug)]
pub enum SubscribeBehavior {
    Accept,
    AcceptAfter(Duration),
    Reject,
    ReturnNothing,
    AcceptWithFailingUnsubscribe,
    /// Registration happens on a detached task; `subscribe` only waits for
    /// its answer, so dropping the call does not stop the registration.
    RegisterInBackground(Duration),
}

pub struct EndpointLog<R> {
    pub subscribe_calls: usize,
    pub created: usize,
    pub unsubscribed: usize,
    /// Handlers of the live subscriptions, keyed by subscription id.
    pub handlers: Vec<(usize, StreamHandlers<R>)>,
}

impl<R> Default for EndpointLog<R> {
    fn default() -> Self {
        Self {
            subscribe_calls: 0,
            created: 0,
            unsubscribed: 0,
            handlers: Vec::new(),
        }
    }
}

pub struct FakeEndpoint<R> {
    behavior: SubscribeBehavior,
    log: Arc<Mutex<EndpointLog<R>>>,
}

impl<R> FakeEndpoint<R> {
    pub fn new(behavior: SubscribeBehavior) -> Self {
        Self {
            behavior,
            log: Arc::new(Mutex::new(EndpointLog::default())),
        }
    }

    pub fn log(&self) -> Arc<Mutex<EndpointLog<R>>> {
        self.log.clone()
    }

    /// Handlers of the most recently registered subscription.
    pub fn handlers(&self) -> StreamHandlers<R> {
        self.log
            .lock()
            .unwrap()
            .handlers
            .last()
            .map(|(_, handlers)| handlers.clone())
            .expect("no subscription registered")
    }

    /// Drop every stored sender, as a server closing the stream would.
    pub fn end_streams(&self) {
        self.log.lock().unwrap().handlers.clear();
    }

    pub fn active_subscriptions(&self) -> usize {
        let log = self.log.lock().unwrap();
        log.created - log.unsubscribed
    }
}

pub struct FakeSubscription<R> {
    id: usize,
    log: Arc<Mutex<EndpointLog<R>>>,
    fail_unsubscribe: bool,
}

impl<R: Send + 'static> StreamEndpoint for FakeEndpoint<R> {
    type Record = R;
    type Subscription = FakeSubscription<R>;

    async fn subscribe(
        &self,
        _request: &SubscriptionRequest,
        handlers: StreamHandlers<R>,
    ) -> Result<Option<FakeSubscription<R>>, StreamError> {
        self.log.lock().unwrap().subscribe_calls += 1;
        let fail_unsubscribe = match self.behavior {
            SubscribeBehavior::RegisterInBackground(delay) => {
                let (answer_tx, answer_rx) = oneshot::channel();
                let log = self.log.clone();
                tokio::spawn(async move {
                    time::sleep(delay).await;
                    let id = register(&log, handlers);
                    let _ = answer_tx.send(FakeSubscription {
                        id,
                        log,
                        fail_unsubscribe: false,
                    });
                });
                return answer_rx.await.map(Some).map_err(|_| StreamError::Closed);
            }
            SubscribeBehavior::Accept => false,
            SubscribeBehavior::AcceptAfter(delay) => {
                time::sleep(delay).await;
                false
            }
            SubscribeBehavior::Reject => {
                return Err(StreamError::Rejected("fake endpoint refuses".into()));
            }
            SubscribeBehavior::ReturnNothing => return Ok(None),
            SubscribeBehavior::AcceptWithFailingUnsubscribe => true,
        };
        let id = register(&self.log, handlers);
        Ok(Some(FakeSubscription {
            id,
            log: self.log.clone(),
            fail_unsubscribe,
        }))
    }
}

fn register<R>(log: &Mutex<EndpointLog<R>>, handlers: StreamHandlers<R>) -> usize {
    let mut log = log.lock().unwrap();
    let id = log.created;
    log.created += 1;
    log.handlers.push((id, handlers));
    id
}

impl<R: Send + 'static> Subscription for FakeSubscription<R> {
    async fn unsubscribe(self) -> Result<(), StreamError> {
        let mut log = self.log.lock().unwrap();
        log.unsubscribed += 1;
        log.handlers.retain(|(id, _)| *id != self.id);
        if self.fail_unsubscribe {
            Err(StreamError::Transport("socket already gone".into()))
        } else {
            Ok(())
        }
    }
}

#[derive(Debug)]
pub struct Recorded<R> {
    pub data: Vec<R>,
    pub errors: Vec<StreamError>,
    pub refreshes: usize,
}

pub struct Recorder<R> {
    inner: Arc<Mutex<Recorded<R>>>,
}

impl<R> Recorder<R> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Recorded {
                data: Vec::new(),
                errors: Vec::new(),
                refreshes: 0,
            })),
        }
    }

    pub fn recorded(&self) -> Arc<Mutex<Recorded<R>>> {
        self.inner.clone()
    }
}

impl<R> Clone for Recorder<R> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<R: Send + 'static> FeedCallbacks<R> for Recorder<R> {
    fn on_data(&mut self, record: R) {
        self.inner.lock().unwrap().data.push(record);
    }

    fn on_error(&mut self, err: StreamError) {
        self.inner.lock().unwrap().errors.push(err);
    }

    fn refresh(&mut self) {
        self.inner.lock().unwrap().refreshes += 1;
    }
}
