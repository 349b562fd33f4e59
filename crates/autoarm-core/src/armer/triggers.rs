// ── Trigger handlers ──
//
// Subscriptions and the handlers behind them. Handlers are fire-and-forget:
// nothing here returns an error, failures are logged and counted.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local, TimeZone, Utc};
use tracing::{debug, info, trace, warn};

use super::{Armer, CHANGED_BY_ATTR, CHANGED_BY_PREFIX};
use crate::config::ButtonAction;
use crate::health::Stage;
use crate::host::{EventHandler, HostEvent, Job, StateChange, StateChangeHandler};
use crate::model::{AlarmState, ChangeSource, Intervention};
use crate::notify::NotifyRequest;

/// Bus event carrying a tapped mobile notification action.
pub const MOBILE_ACTION_EVENT: &str = "mobile_app_notification_action";
/// Bus event fired once the host platform has started.
pub const START_EVENT: &str = "homeassistant_start";

const MOBILE_DISARM: &str = "ALARM_PANEL_DISARM";
const MOBILE_RESET: &str = "ALARM_PANEL_RESET";
const MOBILE_AWAY: &str = "ALARM_PANEL_AWAY";

const HOUSEKEEPING_PERIOD: Duration = Duration::from_secs(60 * 60);

/// Work to do when a delayed request fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DelayedAction {
    Arm(AlarmState),
    Reset,
}

/// A delayed arm or reset, cancelled by any intervention recorded after
/// `requested_at`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DelayedRequest {
    pub action: DelayedAction,
    pub source: ChangeSource,
    pub requested_at: DateTime<Utc>,
    /// Passed to the reset so earlier interventions are overridden.
    pub intervention: Option<Intervention>,
}

impl Armer {
    // ── Subscriptions ────────────────────────────────────────────

    pub(super) async fn subscribe_triggers(&self) {
        let bus = Arc::clone(&self.inner.ports.bus);
        let scheduler = Arc::clone(&self.inner.ports.scheduler);
        let config = &self.inner.config;

        let panel = vec![config.alarm_panel.clone()];
        self.keep(bus.on_state_change(
            &panel,
            self.state_handler(|armer, change| async move { armer.on_panel_change(change).await }),
        ))
        .await;

        if config.occupancy.entity_ids.is_empty() {
            debug!("no occupants configured");
        } else {
            self.keep(bus.on_state_change(
                &config.occupancy.entity_ids,
                self.state_handler(|armer, change| async move {
                    armer.on_occupancy_change(change).await;
                }),
            ))
            .await;
        }

        for (action, button) in &config.buttons {
            if button.entity_ids.is_empty() {
                warn!(button = %action, "button configured without entities");
                self.inner.health.record_init_error(Stage::Buttons);
                continue;
            }
            let action = *action;
            self.keep(bus.on_state_change(
                &button.entity_ids,
                self.state_handler(move |armer, change| async move {
                    armer.on_button_change(action, change).await;
                }),
            ))
            .await;
            debug!(button = %action, entities = ?button.entity_ids, "button configured");
        }

        self.keep(bus.on_event(
            MOBILE_ACTION_EVENT,
            self.event_handler(|armer, event| async move { armer.on_mobile_action(event).await }),
        ))
        .await;
        self.keep(bus.on_event(
            START_EVENT,
            self.event_handler(|armer, _| async move {
                armer.reset_armed_state(None, ChangeSource::Startup).await;
            }),
        ))
        .await;

        self.keep(scheduler.on_sunrise(self.armer_job(|armer| async move { armer.on_sunrise().await })))
            .await;
        self.keep(scheduler.on_sunset(self.armer_job(|armer| async move { armer.on_sunset().await })))
            .await;
        self.keep(scheduler.schedule_periodic(
            HOUSEKEEPING_PERIOD,
            self.armer_job(|armer| async move { armer.housekeeping().await }),
        ))
        .await;
    }

    fn state_handler<F, Fut>(&self, f: F) -> StateChangeHandler
    where
        F: Fn(Armer, StateChange) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let weak = self.downgrade();
        let f = Arc::new(f);
        Arc::new(move |change| {
            let weak = weak.clone();
            let f = Arc::clone(&f);
            Box::pin(async move {
                if let Some(armer) = Armer::from_weak(&weak) {
                    f(armer, change).await;
                }
            })
        })
    }

    fn event_handler<F, Fut>(&self, f: F) -> EventHandler
    where
        F: Fn(Armer, HostEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let weak = self.downgrade();
        let f = Arc::new(f);
        Arc::new(move |event| {
            let weak = weak.clone();
            let f = Arc::clone(&f);
            Box::pin(async move {
                if let Some(armer) = Armer::from_weak(&weak) {
                    f(armer, event).await;
                }
            })
        })
    }

    fn armer_job<F, Fut>(&self, f: F) -> Job
    where
        F: Fn(Armer) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let weak = self.downgrade();
        let f = Arc::new(f);
        Arc::new(move || {
            let weak = weak.clone();
            let f = Arc::clone(&f);
            Box::pin(async move {
                if let Some(armer) = Armer::from_weak(&weak) {
                    f(armer).await;
                }
            })
        })
    }

    // ── Panel ────────────────────────────────────────────────────

    /// React to the panel changing under us. Our own writes are ignored;
    /// zombie values force a reconciliation; anything else is recorded as
    /// an intervention and announced.
    pub async fn on_panel_change(&self, change: StateChange) {
        let Some(new) = change.new else {
            warn!(panel = %change.entity_id, "alarm panel removed");
            return;
        };
        if change.old.as_ref().is_some_and(|old| old.state == new.state) {
            trace!(panel = %change.entity_id, "panel attributes changed");
            return;
        }
        if let Some(tag) = new
            .attribute_str(CHANGED_BY_ATTR)
            .filter(|tag| tag.starts_with(CHANGED_BY_PREFIX))
        {
            let requested = self.requested_state().await;
            debug!(tag, state = %new.state, requested = ?requested, "ignoring own panel change");
            return;
        }

        let old_state = change.old.as_ref().and_then(|o| AlarmState::parse(&o.state));
        match AlarmState::parse(&new.state) {
            Some(state) if !state.is_zombie() => {
                info!(from = ?old_state, to = %state, "alarm panel changed externally");
                self.record_intervention(ChangeSource::AlarmPanel, Some(state))
                    .await;
                self.notify(NotifyRequest {
                    source: ChangeSource::AlarmPanel,
                    from: old_state,
                    to: Some(state),
                    title: None,
                    message: None,
                })
                .await;
            }
            _ => {
                warn!(state = %new.state, "alarm panel has no real state, reconciling");
                self.reset_armed_state(None, ChangeSource::Zombification)
                    .await;
            }
        }
    }

    // ── Occupancy ────────────────────────────────────────────────

    /// Reconcile after an occupant moves, after the configured delay for
    /// the state the rules now point at.
    pub async fn on_occupancy_change(&self, change: StateChange) {
        let old = change.old.as_ref().map(|s| s.state.as_str());
        let new = change.new.as_ref().map(|s| s.state.as_str());
        if old == new {
            return;
        }
        debug!(occupant = %change.entity_id, from = ?old, to = ?new, "occupancy changed");

        let existing = self.armed_state().await;
        let variables = self.condition_variables(existing).await;
        let delay = self
            .determine_state(&variables)
            .await
            .and_then(|target| self.inner.config.occupancy_delay(target));

        match delay {
            Some(delay) => {
                let request = DelayedRequest {
                    action: DelayedAction::Reset,
                    source: ChangeSource::Occupancy,
                    requested_at: self.now(),
                    intervention: None,
                };
                self.schedule_delayed(request, delay).await;
            }
            None => {
                self.reset_armed_state(None, ChangeSource::Occupancy).await;
            }
        }
    }

    // ── Buttons ──────────────────────────────────────────────────

    async fn on_button_change(&self, action: ButtonAction, change: StateChange) {
        if is_press(&change) {
            self.press_button(action).await;
        }
    }

    /// Apply a button press, after the button's delay if it has one.
    pub async fn press_button(&self, action: ButtonAction) {
        info!(button = %action, "button pressed");
        let target = action.target();
        let intervention = self.record_intervention(ChangeSource::Button, target).await;
        let delay = self.inner.config.button_delay(action);

        if delay.is_zero() {
            match target {
                Some(state) => {
                    self.arm(Some(state), ChangeSource::Button).await;
                }
                None => {
                    self.reset_armed_state(Some(intervention), ChangeSource::Button)
                        .await;
                }
            }
            return;
        }

        self.notify(delay_notice(action, delay)).await;
        let request = DelayedRequest {
            action: target.map_or(DelayedAction::Reset, DelayedAction::Arm),
            source: ChangeSource::Button,
            requested_at: intervention.created_at,
            intervention: target.is_none().then_some(intervention),
        };
        self.schedule_delayed(request, delay).await;
    }

    // ── Mobile actions ───────────────────────────────────────────

    pub async fn on_mobile_action(&self, event: HostEvent) {
        let action = event.data.get("action").and_then(|a| a.as_str());
        match action {
            Some(MOBILE_DISARM) => {
                self.record_intervention(ChangeSource::Mobile, Some(AlarmState::Disarmed))
                    .await;
                self.arm(Some(AlarmState::Disarmed), ChangeSource::Mobile)
                    .await;
            }
            Some(MOBILE_RESET) => {
                let intervention = self.record_intervention(ChangeSource::Mobile, None).await;
                self.reset_armed_state(Some(intervention), ChangeSource::Mobile)
                    .await;
            }
            Some(MOBILE_AWAY) => {
                self.record_intervention(ChangeSource::Mobile, Some(AlarmState::ArmedAway))
                    .await;
                self.arm(Some(AlarmState::ArmedAway), ChangeSource::Mobile)
                    .await;
            }
            other => debug!(action = ?other, "ignoring mobile action"),
        }
    }

    // ── Sun ──────────────────────────────────────────────────────

    /// Reconcile at sunrise, or at the configured cutoff if sunrise comes
    /// earlier. Earlier interventions are honoured.
    pub async fn on_sunrise(&self) {
        let now = self.now();
        let local = now.with_timezone(&Local);
        if let Some(cutoff) = self.inner.config.sunrise_cutoff {
            if local.time() < cutoff {
                let at = Local
                    .from_local_datetime(&local.date_naive().and_time(cutoff))
                    .earliest()
                    .map_or(now, |t| t.with_timezone(&Utc));
                info!(cutoff = %cutoff, "sunrise before cutoff, deferring reset");
                let request = DelayedRequest {
                    action: DelayedAction::Reset,
                    source: ChangeSource::Sunrise,
                    requested_at: now,
                    intervention: None,
                };
                let delay = (at - now).to_std().unwrap_or(Duration::ZERO);
                self.schedule_delayed(request, delay).await;
                return;
            }
        }
        debug!("sunrise");
        self.reset_armed_state(None, ChangeSource::Sunrise).await;
    }

    /// Sunset always reconciles. Nothing is logged, so pending delayed
    /// requests still run.
    pub async fn on_sunset(&self) {
        debug!("sunset");
        self.reset_armed_state(None, ChangeSource::Sunset).await;
    }

    // ── Housekeeping ─────────────────────────────────────────────

    /// Drop expired interventions and calendar events.
    pub async fn housekeeping(&self) {
        let now = self.now();
        let pruned = self
            .inner
            .interventions
            .lock()
            .await
            .prune_at(now, self.inner.config.intervention_ttl());
        let mut events = 0;
        for calendar in self.calendars().await {
            events += calendar.prune().await;
        }
        debug!(interventions = pruned, events, "housekeeping done");
    }

    // ── Delayed requests ─────────────────────────────────────────

    /// Run `request` after `delay`, unless something intervenes first.
    pub async fn schedule_delayed(&self, request: DelayedRequest, delay: Duration) {
        let now = self.now();
        let at = chrono::Duration::from_std(delay)
            .ok()
            .and_then(|d| now.checked_add_signed(d))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        debug!(action = ?request.action, source = %request.source, at = %at, "scheduling delayed request");
        let job = self.armer_job(move |armer| {
            let request = request.clone();
            async move { armer.run_delayed(request).await }
        });
        let sub = self.inner.ports.scheduler.schedule_once(at, job);
        self.keep(sub).await;
    }

    async fn run_delayed(&self, request: DelayedRequest) {
        if self.has_intervention_since(request.requested_at).await {
            info!(
                action = ?request.action,
                source = %request.source,
                "cancelling delayed request after later intervention"
            );
            return;
        }
        match request.action {
            DelayedAction::Arm(state) => {
                self.arm(Some(state), request.source).await;
            }
            DelayedAction::Reset => {
                self.reset_armed_state(request.intervention, request.source)
                    .await;
            }
        }
    }
}

/// Heads-up sent when a delayed button press is accepted.
fn delay_notice(action: ButtonAction, delay: Duration) -> NotifyRequest {
    let secs = delay.as_secs();
    let (title, message) = match action {
        ButtonAction::Away => (
            "Arm for away process starting",
            format!("Alarm will be armed for away in {secs} seconds"),
        ),
        ButtonAction::Vacation => (
            "Arm for vacation process starting",
            format!("Alarm will be armed for vacation in {secs} seconds"),
        ),
        ButtonAction::Disarm => (
            "Disarm process starting",
            format!("Alarm will be disarmed in {secs} seconds"),
        ),
        ButtonAction::Reset => (
            "Alarm reset starting",
            format!("Alarm will be reset in {secs} seconds"),
        ),
    };
    NotifyRequest::message(ChangeSource::Button, title, message)
}

/// Whether a button entity change counts as a press. Binary sensors press
/// on `on`; momentary buttons press on any new value.
fn is_press(change: &StateChange) -> bool {
    let Some(new) = &change.new else {
        return false;
    };
    if change.old.as_ref().is_some_and(|old| old.state == new.state) {
        return false;
    }
    match new.state.as_str() {
        "off" | "unknown" | "unavailable" | "" => false,
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::EntityState;

    fn entity(state: &str) -> EntityState {
        EntityState {
            state: state.to_owned(),
            attributes: serde_json::Map::new(),
            last_changed: Utc::now(),
        }
    }

    fn change(old: Option<&str>, new: Option<&str>) -> StateChange {
        StateChange {
            entity_id: "binary_sensor.button".into(),
            old: old.map(entity),
            new: new.map(entity),
        }
    }

    #[test]
    fn presses_on_rising_edge_and_new_timestamps() {
        assert!(is_press(&change(Some("off"), Some("on"))));
        assert!(!is_press(&change(Some("on"), Some("off"))));
        assert!(!is_press(&change(Some("on"), Some("on"))));
        assert!(is_press(&change(
            Some("2026-01-01T10:00:00+00:00"),
            Some("2026-01-01T10:05:00+00:00")
        )));
        assert!(!is_press(&change(Some("on"), Some("unavailable"))));
        assert!(!is_press(&change(Some("on"), None)));
    }

    #[test]
    fn every_delayed_button_gets_its_own_notice() {
        let disarm = delay_notice(ButtonAction::Disarm, Duration::from_secs(30));
        assert_eq!(disarm.title.as_deref(), Some("Disarm process starting"));
        assert_eq!(
            disarm.message.as_deref(),
            Some("Alarm will be disarmed in 30 seconds")
        );
        let away = delay_notice(ButtonAction::Away, Duration::from_secs(180));
        assert_eq!(
            away.message.as_deref(),
            Some("Alarm will be armed for away in 180 seconds")
        );
    }
}
