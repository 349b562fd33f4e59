// ── Host platform ports ──
//
// Capabilities the engine consumes from the automation platform: the
// entity registry, event subscriptions, scheduling, calendars, outbound
// notifications and issue reporting. The engine never talks to a concrete
// platform; it receives a `HostPorts` bundle at construction.

pub mod clock;
pub mod memory;
pub mod scheduler;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use strum::{AsRefStr, Display};
use tokio_util::sync::CancellationToken;

use crate::condition::ConditionEvaluator;
use crate::error::HostError;
use crate::model::CalendarEvent;

pub use clock::{Clock, SystemClock, TokioClock};
pub use memory::MemoryHost;
pub use scheduler::{SunEvent, TokioScheduler};

/// Entity id the host uses for the sun position.
pub const SUN_ENTITY: &str = "sun.sun";
/// Sun entity state between sunset and sunrise.
pub const BELOW_HORIZON: &str = "below_horizon";

/// Attribute map carried alongside an entity state.
pub type Attributes = Map<String, Value>;

/// A scheduled or subscribed callback with no payload.
pub type Job = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

pub type StateChangeHandler = Arc<dyn Fn(StateChange) -> BoxFuture<'static, ()> + Send + Sync>;

pub type EventHandler = Arc<dyn Fn(HostEvent) -> BoxFuture<'static, ()> + Send + Sync>;

// ── Registry types ───────────────────────────────────────────────

/// Value and attributes of one registry entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityState {
    pub state: String,
    #[serde(default)]
    pub attributes: Attributes,
    pub last_changed: DateTime<Utc>,
}

impl EntityState {
    pub fn attribute_str(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).and_then(Value::as_str)
    }
}

/// A state transition observed on the registry.
#[derive(Debug, Clone, PartialEq)]
pub struct StateChange {
    pub entity_id: String,
    pub old: Option<EntityState>,
    pub new: Option<EntityState>,
}

/// A named bus event with a JSON payload.
#[derive(Debug, Clone, PartialEq)]
pub struct HostEvent {
    pub event_type: String,
    pub data: Value,
}

// ── Notifications and issues ─────────────────────────────────────

/// Outbound notification body.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NotifyPayload {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub data: Attributes,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub target: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum IssueSeverity {
    Warning,
    Error,
}

/// A diagnostic issue raised towards the platform's repair surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    pub id: String,
    pub key: String,
    pub severity: IssueSeverity,
    #[serde(default)]
    pub placeholders: Map<String, Value>,
}

// ── Subscription ─────────────────────────────────────────────────

/// Handle to a subscription or scheduled job.
///
/// Dropping the handle leaves the job running; call [`cancel`](Self::cancel)
/// to stop it. Cancelling twice is harmless.
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    pub fn new(cancel: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    pub fn from_token(token: CancellationToken) -> Self {
        Self::new(move || token.cancel())
    }

    /// A handle with nothing behind it.
    pub fn noop() -> Self {
        Self { cancel: None }
    }

    pub fn cancel(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }

    pub fn is_active(&self) -> bool {
        self.cancel.is_some()
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.is_active())
            .finish()
    }
}

// ── Port traits ──────────────────────────────────────────────────

/// Named entity states with attributes. The single source of truth for
/// the alarm panel value.
#[async_trait]
pub trait StateRegistry: Send + Sync {
    async fn get(&self, entity_id: &str) -> Option<EntityState>;

    async fn set(&self, entity_id: &str, state: &str, attributes: Attributes)
    -> Result<(), HostError>;
}

pub trait EventBus: Send + Sync {
    fn on_state_change(&self, entity_ids: &[String], handler: StateChangeHandler) -> Subscription;

    fn on_event(&self, event_type: &str, handler: EventHandler) -> Subscription;
}

/// One-shot timers, fixed-cadence jobs and sun callbacks.
pub trait Scheduler: Send + Sync {
    fn schedule_once(&self, at: DateTime<Utc>, job: Job) -> Subscription;

    fn schedule_periodic(&self, period: Duration, job: Job) -> Subscription;

    fn on_sunrise(&self, job: Job) -> Subscription;

    fn on_sunset(&self, job: Job) -> Subscription;
}

#[async_trait]
pub trait CalendarSource: Send + Sync {
    async fn get_events(
        &self,
        calendar_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<CalendarEvent>, HostError>;
}

#[async_trait]
pub trait NotifyService: Send + Sync {
    async fn send(&self, action: &str, payload: NotifyPayload) -> Result<(), HostError>;
}

pub trait IssueReporter: Send + Sync {
    fn raise_issue(&self, issue: Issue);
}

// ── HostPorts ────────────────────────────────────────────────────

/// Every capability the engine needs, bundled for construction.
#[derive(Clone)]
pub struct HostPorts {
    pub registry: Arc<dyn StateRegistry>,
    pub bus: Arc<dyn EventBus>,
    pub scheduler: Arc<dyn Scheduler>,
    pub calendars: Arc<dyn CalendarSource>,
    pub evaluator: Arc<dyn ConditionEvaluator>,
    pub notify: Arc<dyn NotifyService>,
    pub issues: Arc<dyn IssueReporter>,
    pub clock: Arc<dyn Clock>,
}

impl HostPorts {
    /// Wire an in-memory host and a Tokio scheduler together, using the
    /// built-in expression evaluator.
    pub fn in_memory(host: &Arc<MemoryHost>, scheduler: &Arc<TokioScheduler>) -> Self {
        Self {
            registry: host.clone(),
            bus: host.clone(),
            scheduler: scheduler.clone(),
            calendars: host.clone(),
            evaluator: Arc::new(crate::condition::ExpressionEvaluator),
            notify: host.clone(),
            issues: host.clone(),
            clock: scheduler.clock(),
        }
    }
}

impl fmt::Debug for HostPorts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostPorts").finish_non_exhaustive()
    }
}

/// Wrap an async closure as a [`Job`].
pub fn job<F, Fut>(f: F) -> Job
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(move || Box::pin(f()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn subscription_cancels_once() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let mut sub = Subscription::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert!(sub.is_active());
        sub.cancel();
        sub.cancel();
        assert!(!sub.is_active());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn token_subscription_cancels_token() {
        let token = CancellationToken::new();
        let mut sub = Subscription::from_token(token.clone());
        sub.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn job_runs_on_every_call() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let run = job(move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });
        tokio_test::block_on(run());
        tokio_test::block_on(run());
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }
}
