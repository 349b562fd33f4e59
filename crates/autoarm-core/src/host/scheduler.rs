// ── Tokio scheduler ──
//
// `Scheduler` implementation backed by spawned Tokio tasks. Each job gets
// its own child cancellation token; sunrise and sunset are pushed in by
// the host adapter through `publish_sun`.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display};
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use super::{Clock, Job, Scheduler, Subscription, TokioClock};

const SUN_CHANNEL_SIZE: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SunEvent {
    Sunrise,
    Sunset,
}

pub struct TokioScheduler {
    clock: Arc<dyn Clock>,
    sun_tx: broadcast::Sender<SunEvent>,
    cancel: CancellationToken,
}

impl TokioScheduler {
    /// Scheduler driven by Tokio's clock. Must be used inside a runtime.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(TokioClock::new()))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        let (sun_tx, _) = broadcast::channel(SUN_CHANNEL_SIZE);
        Self {
            clock,
            sun_tx,
            cancel: CancellationToken::new(),
        }
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.clock)
    }

    /// Deliver a sun event to every sunrise/sunset listener.
    pub fn publish_sun(&self, event: SunEvent) -> usize {
        debug!(event = %event, "publishing sun event");
        self.sun_tx.send(event).unwrap_or(0)
    }

    /// Cancel every job this scheduler has started.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    fn on_sun(&self, wanted: SunEvent, job: Job) -> Subscription {
        let token = self.cancel.child_token();
        let cancel = token.clone();
        let mut rx = self.sun_tx.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    received = rx.recv() => match received {
                        Ok(event) if event == wanted => job().await,
                        Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
        });
        Subscription::from_token(token)
    }
}

impl Default for TokioScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler for TokioScheduler {
    fn schedule_once(&self, at: DateTime<Utc>, job: Job) -> Subscription {
        let delay = (at - self.clock.now()).to_std().unwrap_or(Duration::ZERO);
        trace!(at = %at, delay_ms = delay.as_millis(), "scheduling one-shot job");
        let token = self.cancel.child_token();
        let cancel = token.clone();
        tokio::spawn(async move {
            tokio::select! {
                biased;
                () = cancel.cancelled() => {}
                () = tokio::time::sleep(delay) => job().await,
            }
        });
        Subscription::from_token(token)
    }

    fn schedule_periodic(&self, period: Duration, job: Job) -> Subscription {
        let token = self.cancel.child_token();
        let first = tokio::time::Instant::now().checked_add(period);
        let Some(first) = first.filter(|_| !period.is_zero()) else {
            warn!(?period, "periodic job not scheduled, period out of range");
            return Subscription::from_token(token);
        };
        let cancel = token.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(first, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    _ = interval.tick() => job().await,
                }
            }
        });
        Subscription::from_token(token)
    }

    fn on_sunrise(&self, job: Job) -> Subscription {
        self.on_sun(SunEvent::Sunrise, job)
    }

    fn on_sunset(&self, job: Job) -> Subscription {
        self.on_sun(SunEvent::Sunset, job)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::job;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_job(hits: &Arc<AtomicUsize>) -> Job {
        let hits = hits.clone();
        job(move || {
            let hits = hits.clone();
            async move {
                hits.fetch_add(1, Ordering::SeqCst);
            }
        })
    }

    async fn yield_a_few() {
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn one_shot_fires_at_its_time() {
        let scheduler = TokioScheduler::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let at = scheduler.clock().now() + chrono::Duration::seconds(30);
        let _sub = scheduler.schedule_once(at, counting_job(&hits));

        tokio::time::sleep(Duration::from_secs(29)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        tokio::time::sleep(Duration::from_secs(2)).await;
        yield_a_few().await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_one_shot_never_fires() {
        let scheduler = TokioScheduler::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let at = scheduler.clock().now() + chrono::Duration::seconds(5);
        let mut sub = scheduler.schedule_once(at, counting_job(&hits));
        sub.cancel();

        tokio::time::sleep(Duration::from_secs(10)).await;
        yield_a_few().await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn periodic_skips_the_immediate_tick() {
        let scheduler = TokioScheduler::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let _sub = scheduler.schedule_periodic(Duration::from_secs(60), counting_job(&hits));

        yield_a_few().await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        tokio::time::sleep(Duration::from_secs(181)).await;
        yield_a_few().await;
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn sun_listeners_only_see_their_event() {
        let scheduler = TokioScheduler::new();
        let sunrise = Arc::new(AtomicUsize::new(0));
        let sunset = Arc::new(AtomicUsize::new(0));
        let _a = scheduler.on_sunrise(counting_job(&sunrise));
        let _b = scheduler.on_sunset(counting_job(&sunset));
        yield_a_few().await;

        assert_eq!(scheduler.publish_sun(SunEvent::Sunset), 2);
        yield_a_few().await;
        assert_eq!(sunrise.load(Ordering::SeqCst), 0);
        assert_eq!(sunset.load(Ordering::SeqCst), 1);
    }
}
