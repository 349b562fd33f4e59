// ── Armer ──
//
// The reconciliation engine. Listens to panel, occupancy, sun, calendar,
// button and mobile triggers, decides what the alarm panel should be in,
// and commits it through the host registry. The panel value itself is
// never cached: every decision starts from a fresh registry read.

mod diagnostics;
mod reconcile;
mod triggers;

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::calendar::{CalendarDelegate, TrackedCalendar, TrackedCalendarEvent};
use crate::condition::TransitionSet;
use crate::config::ArmerConfig;
use crate::error::CoreError;
use crate::health::{HealthSnapshot, HealthTracker};
use crate::host::{HostPorts, Subscription};
use crate::limiter::Limiter;
use crate::model::{AlarmState, ChangeSource, Intervention, InterventionLog};
use crate::notify::{Notifier, NotifyOutcome, NotifyRequest};

pub use diagnostics::{
    CONFIGURED_ENTITY, CalculationRecord, CalendarDiagnostics, Diagnostics, FAILURES_ENTITY,
    INITIALIZED_ENTITY, LAST_CALCULATION_ENTITY, LAST_CALENDAR_EVENT_ENTITY,
    LAST_INTERVENTION_ENTITY, TrackedEventDiagnostics,
};
pub use triggers::{DelayedAction, DelayedRequest, MOBILE_ACTION_EVENT, START_EVENT};

/// Attribute tagging which source last wrote the panel.
pub const CHANGED_BY_ATTR: &str = "changed_by";
/// Prefix of every `changed_by` value this engine writes.
pub const CHANGED_BY_PREFIX: &str = "autoarm.";

/// The reconciliation engine.
///
/// Cheaply cloneable via `Arc<ArmerInner>`. Construct with [`Armer::new`],
/// wire it up with [`initialize`](Self::initialize) and tear it down with
/// [`shutdown`](Self::shutdown).
#[derive(Clone)]
pub struct Armer {
    inner: Arc<ArmerInner>,
}

struct ArmerInner {
    config: ArmerConfig,
    ports: HostPorts,
    notifier: Notifier,
    health: HealthTracker,
    transitions: Mutex<TransitionSet>,
    interventions: Mutex<InterventionLog>,
    limiter: Mutex<Limiter>,
    calendars: Mutex<Vec<Arc<TrackedCalendar>>>,
    /// Last state this engine asked for, and when.
    requested: Mutex<Option<(AlarmState, DateTime<Utc>)>>,
    subscriptions: Mutex<Vec<Subscription>>,
    cancel: CancellationToken,
}

impl Armer {
    /// Build an engine. Does NOT subscribe to anything -- call
    /// [`initialize()`](Self::initialize) to go live.
    pub fn new(config: ArmerConfig, ports: HostPorts) -> Self {
        let limiter = Limiter::new(config.throttle_window(), config.throttle_calls);
        let notifier = Notifier::new(config.notify.clone(), Arc::clone(&ports.notify));
        Self {
            inner: Arc::new(ArmerInner {
                config,
                ports,
                notifier,
                health: HealthTracker::new(),
                transitions: Mutex::new(TransitionSet::default()),
                interventions: Mutex::new(InterventionLog::new()),
                limiter: Mutex::new(limiter),
                calendars: Mutex::new(Vec::new()),
                requested: Mutex::new(None),
                subscriptions: Mutex::new(Vec::new()),
                cancel: CancellationToken::new(),
            }),
        }
    }

    pub fn config(&self) -> &ArmerConfig {
        &self.inner.config
    }

    pub fn alarm_panel(&self) -> &str {
        &self.inner.config.alarm_panel
    }

    pub fn health(&self) -> HealthSnapshot {
        self.inner.health.snapshot()
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    fn from_weak(weak: &Weak<ArmerInner>) -> Option<Self> {
        weak.upgrade().map(|inner| Self { inner })
    }

    fn downgrade(&self) -> Weak<ArmerInner> {
        Arc::downgrade(&self.inner)
    }

    fn now(&self) -> DateTime<Utc> {
        self.inner.ports.clock.now()
    }

    // ── Lifecycle ────────────────────────────────────────────────

    /// Subscribe to every trigger, build the transition rules, start the
    /// calendars, reconcile once with source `startup` and publish the
    /// diagnostic entities. Per-item failures are counted and reported,
    /// never fatal.
    pub async fn initialize(&self) -> Result<HealthSnapshot, CoreError> {
        if self.is_shut_down() {
            return Err(CoreError::NotRunning);
        }
        info!(panel = %self.alarm_panel(), "initializing autoarm");

        self.initialize_transitions().await;
        self.subscribe_triggers().await;
        self.initialize_calendars().await;

        self.inner.health.mark_initialized();
        self.publish_configured().await;
        self.publish_initialized().await;
        self.publish_failures().await;

        let state = self.reset_armed_state(None, ChangeSource::Startup).await;
        info!(
            panel = %self.alarm_panel(),
            state = ?state,
            "autoarm initialized"
        );
        Ok(self.health())
    }

    /// Cancel every subscription, timer and calendar tracker. Idempotent.
    pub async fn shutdown(&self) {
        if self.inner.cancel.is_cancelled() {
            return;
        }
        self.inner.cancel.cancel();
        let subscriptions: Vec<Subscription> =
            self.inner.subscriptions.lock().await.drain(..).collect();
        let count = subscriptions.len();
        for mut sub in subscriptions {
            sub.cancel();
        }
        let calendars: Vec<Arc<TrackedCalendar>> =
            self.inner.calendars.lock().await.drain(..).collect();
        for calendar in calendars {
            calendar.shutdown().await;
        }
        info!(subscriptions = count, "autoarm shut down");
    }

    async fn keep(&self, mut subscription: Subscription) {
        if self.is_shut_down() {
            subscription.cancel();
            return;
        }
        self.inner.subscriptions.lock().await.push(subscription);
    }

    async fn initialize_transitions(&self) {
        let build = TransitionSet::build(
            &self.inner.config.transitions,
            self.inner.ports.evaluator.as_ref(),
            self.inner.ports.issues.as_ref(),
        );
        for _ in 0..build.errors {
            self.inner
                .health
                .record_init_error(crate::health::Stage::Transitions);
        }
        info!(
            rules = build.set.len(),
            disabled = build.errors,
            flagged = build.warnings,
            "transition rules built"
        );
        *self.inner.transitions.lock().await = build.set;
    }

    async fn initialize_calendars(&self) {
        let delegate: Arc<dyn CalendarDelegate> = Arc::new(ArmerDelegate {
            inner: self.downgrade(),
        });
        let ports = crate::calendar::CalendarPorts {
            source: Arc::clone(&self.inner.ports.calendars),
            scheduler: Arc::clone(&self.inner.ports.scheduler),
            clock: Arc::clone(&self.inner.ports.clock),
        };
        for config in &self.inner.config.calendar_control.calendars {
            let calendar =
                match TrackedCalendar::new(config.clone(), ports.clone(), Arc::clone(&delegate)) {
                    Ok(calendar) => calendar,
                    Err(e) => {
                        error!(calendar = %config.entity_id, error = %e, "calendar disabled");
                        self.inner
                            .health
                            .record_init_error(crate::health::Stage::Calendars);
                        self.raise_config_issue("calendar", &config.entity_id, &e);
                        continue;
                    }
                };
            self.inner.calendars.lock().await.push(Arc::clone(&calendar));
            if let Err(e) = calendar.initialize().await {
                warn!(calendar = %calendar.id(), error = %e, "initial calendar poll failed");
                self.inner
                    .health
                    .record_init_error(crate::health::Stage::Calendars);
            }
        }
    }

    fn raise_config_issue(&self, kind: &str, subject: &str, err: &CoreError) {
        let mut placeholders = serde_json::Map::new();
        placeholders.insert("subject".into(), json!(subject));
        placeholders.insert("error".into(), json!(err.to_string()));
        self.inner.ports.issues.raise_issue(crate::host::Issue {
            id: format!("{kind}_{subject}"),
            key: format!("{kind}_config"),
            severity: crate::host::IssueSeverity::Error,
            placeholders,
        });
    }

    // ── State access ─────────────────────────────────────────────

    /// Current panel state from the registry. A missing or unparseable
    /// value reads as `Pending`.
    pub async fn armed_state(&self) -> AlarmState {
        let panel = self.alarm_panel();
        match self.inner.ports.registry.get(panel).await {
            Some(entity) => AlarmState::parse(&entity.state).unwrap_or_else(|| {
                warn!(panel, raw = %entity.state, "unrecognised panel state, treating as pending");
                AlarmState::Pending
            }),
            None => {
                warn!(panel, "alarm panel missing, treating as pending");
                AlarmState::Pending
            }
        }
    }

    /// Last state this engine requested, with the request time.
    pub async fn requested_state(&self) -> Option<(AlarmState, DateTime<Utc>)> {
        *self.inner.requested.lock().await
    }

    /// Commit `target` to the panel.
    ///
    /// Returns `None` without touching the registry when there is no
    /// target, the panel already holds it, or the rate limiter trips.
    /// Write failures are logged and counted, never returned.
    pub async fn arm(&self, target: Option<AlarmState>, source: ChangeSource) -> Option<AlarmState> {
        let target = target?;
        let existing = self.armed_state().await;
        if target == existing {
            debug!(source = %source, state = %target, "panel already in requested state");
            return None;
        }
        if self.inner.limiter.lock().await.triggered() {
            warn!(source = %source, target = %target, "rate limit triggered, skipping arm");
            return None;
        }

        *self.inner.requested.lock().await = Some((target, self.now()));
        let panel = self.alarm_panel();
        let mut attributes = self
            .inner
            .ports
            .registry
            .get(panel)
            .await
            .map(|e| e.attributes)
            .unwrap_or_default();
        attributes.insert(
            CHANGED_BY_ATTR.into(),
            json!(format!("{CHANGED_BY_PREFIX}{source}")),
        );

        match self
            .inner
            .ports
            .registry
            .set(panel, target.as_ref(), attributes)
            .await
        {
            Ok(()) => {
                info!(panel, from = %existing, to = %target, source = %source, "alarm state set");
                self.notify(NotifyRequest::transition(source, existing, target))
                    .await;
                Some(target)
            }
            Err(e) => {
                error!(panel, target = %target, error = %e, "failed to set alarm state");
                self.record_failure().await;
                None
            }
        }
    }

    // ── Interventions ────────────────────────────────────────────

    /// Record an intervention and publish it.
    pub async fn record_intervention(
        &self,
        source: ChangeSource,
        state: Option<AlarmState>,
    ) -> Intervention {
        let now = self.now();
        let intervention = self
            .inner
            .interventions
            .lock()
            .await
            .record_at(now, source, state);
        debug!(source = %source, state = ?state, "intervention recorded");
        self.publish_intervention(&intervention).await;
        intervention
    }

    pub async fn interventions(&self) -> Vec<Intervention> {
        self.inner.interventions.lock().await.iter().cloned().collect()
    }

    pub async fn has_intervention_since(&self, cutoff: DateTime<Utc>) -> bool {
        self.inner
            .interventions
            .lock()
            .await
            .has_intervention_since(cutoff)
    }

    // ── Calendars ────────────────────────────────────────────────

    pub async fn calendars(&self) -> Vec<Arc<TrackedCalendar>> {
        self.inner.calendars.lock().await.clone()
    }

    pub async fn has_active_calendar_event(&self) -> bool {
        for calendar in self.calendars().await {
            if calendar.has_active_event().await {
                return true;
            }
        }
        false
    }

    // ── Notifications and failures ───────────────────────────────

    async fn notify(&self, request: NotifyRequest) {
        match self.inner.notifier.notify(&request).await {
            Ok(NotifyOutcome::Sent(_) | NotifyOutcome::Skipped(_)) => {}
            Err(e) => {
                error!(source = %request.source, error = %e, "notification failed");
                self.record_failure().await;
            }
        }
    }

    async fn record_failure(&self) {
        let total = self.inner.health.record_runtime_error();
        debug!(failures = total, "runtime failure recorded");
        self.publish_failures().await;
    }
}

// ── Calendar delegate ────────────────────────────────────────────

/// Non-owning handle the calendars use to reach the engine.
struct ArmerDelegate {
    inner: Weak<ArmerInner>,
}

#[async_trait]
impl CalendarDelegate for ArmerDelegate {
    async fn armed_state(&self) -> AlarmState {
        match Armer::from_weak(&self.inner) {
            Some(armer) => armer.armed_state().await,
            None => AlarmState::Pending,
        }
    }

    async fn on_event_start(&self, event: &TrackedCalendarEvent) {
        if let Some(armer) = Armer::from_weak(&self.inner) {
            armer.on_calendar_event_start(event).await;
        }
    }

    async fn on_event_end(&self, event: &TrackedCalendarEvent) {
        if let Some(armer) = Armer::from_weak(&self.inner) {
            armer.on_calendar_event_end(event).await;
        }
    }
}
