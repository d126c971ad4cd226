use crate::endpoint::{
    StreamEndpoint,
    StreamError,
    StreamHandlers,
    Subscription,
    SubscriptionRequest,
};
use std::time::Duration;
use tokio::{
    task::JoinHandle,
    time,
};
use tracing::debug;

/// Payload of the synthetic feed. Carries nothing but its position in the
/// stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SyntheticFrame {
    pub sequence: u64,
}

/// Local stand-in for a per-session game stream: accepts any request and
/// pushes one frame per tick until unsubscribed.
#[derive(Clone, Debug)]
pub struct SyntheticEndpoint {
    tick: Duration,
}

impl SyntheticEndpoint {
    pub fn new(tick: Duration) -> Self {
        Self { tick }
    }

    pub fn tick(&self) -> Duration {
        self.tick
    }
}

impl StreamEndpoint for SyntheticEndpoint {
    type Record = SyntheticFrame;
    type Subscription = SyntheticSubscription;

    async fn subscribe(
        &self,
        _request: &SubscriptionRequest,
        handlers: StreamHandlers<SyntheticFrame>,
    ) -> Result<Option<SyntheticSubscription>, StreamError> {
        if self.tick.is_zero() {
            return Err(StreamError::Rejected("synthetic tick must be non-zero".into()));
        }
        let tick = self.tick;
        let task = tokio::spawn(async move {
            let mut ticker = time::interval_at(time::Instant::now() + tick, tick);
            let mut sequence = 0u64;
            loop {
                ticker.tick().await;
                if !handlers.on_data(SyntheticFrame { sequence }) {
                    debug!(sequence, "synthetic feed has no listener left");
                    break;
                }
                sequence += 1;
            }
        });
        Ok(Some(SyntheticSubscription { task: Some(task) }))
    }
}

pub struct SyntheticSubscription {
    task: Option<JoinHandle<()>>,
}

impl Subscription for SyntheticSubscription {
    async fn unsubscribe(mut self) -> Result<(), StreamError> {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        Ok(())
    }
}

impl Drop for SyntheticSubscription {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;
    use crate::{
        manager::{
            FeedMode,
            SubscriptionManager,
        },
        test_helpers::Recorder,
    };
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn subscribe__pushes_one_frame_per_tick_in_sequence() {
        // given
        let endpoint = Arc::new(SyntheticEndpoint::new(Duration::from_millis(250)));
        let manager = SubscriptionManager::new(endpoint);
        let recorder = Recorder::<SyntheticFrame>::new();
        let recorded = recorder.recorded();

        // when
        let mut handle = manager.open(SubscriptionRequest::new(), recorder);
        time::sleep(Duration::from_millis(1_010)).await;

        // then
        let sequences: Vec<_> = recorded
            .lock()
            .unwrap()
            .data
            .iter()
            .map(|frame| frame.sequence)
            .collect();
        assert_eq!(sequences, vec![0, 1, 2, 3]);
        assert_eq!(handle.mode(), FeedMode::Push);
        handle.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn unsubscribe__stops_the_frame_task() {
        // given
        let endpoint = Arc::new(SyntheticEndpoint::new(Duration::from_millis(100)));
        let manager = SubscriptionManager::new(endpoint);
        let recorder = Recorder::<SyntheticFrame>::new();
        let recorded = recorder.recorded();
        let mut handle = manager.open(SubscriptionRequest::new(), recorder);
        time::sleep(Duration::from_millis(350)).await;

        // when
        handle.close().await;
        let seen = recorded.lock().unwrap().data.len();
        time::sleep(Duration::from_millis(1_000)).await;

        // then
        assert_eq!(recorded.lock().unwrap().data.len(), seen);
    }

    #[tokio::test(start_paused = true)]
    async fn subscribe__zero_tick__is_rejected_and_falls_back_to_polling() {
        // given
        let endpoint = Arc::new(SyntheticEndpoint::new(Duration::ZERO));
        let manager = SubscriptionManager::new(endpoint);
        let recorder = Recorder::<SyntheticFrame>::new();
        let recorded = recorder.recorded();

        // when
        let mut handle = manager.open(SubscriptionRequest::new(), recorder);
        time::sleep(Duration::from_millis(10)).await;

        // then
        assert_eq!(handle.mode(), FeedMode::Polling);
        assert_eq!(recorded.lock().unwrap().refreshes, 1);
        handle.close().await;
    }
}
