// ── Diagnostics ──
//
// `autoarm.*` entities written to the host registry, plus an on-demand
// snapshot of the engine for the CLI and supervisor.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value, json};
use tracing::{trace, warn};

use super::Armer;
use crate::calendar::EventStatus;
use crate::condition::ConditionVariables;
use crate::health::HealthSnapshot;
use crate::host::Attributes;
use crate::model::{AlarmState, ChangeSource, EventSummary, Intervention};

pub const CONFIGURED_ENTITY: &str = "autoarm.configured";
pub const INITIALIZED_ENTITY: &str = "autoarm.initialized";
pub const LAST_CALENDAR_EVENT_ENTITY: &str = "autoarm.last_calendar_event";
pub const LAST_INTERVENTION_ENTITY: &str = "autoarm.last_intervention";
pub const LAST_CALCULATION_ENTITY: &str = "autoarm.last_calculation";
pub const FAILURES_ENTITY: &str = "autoarm.failures";

const NO_CHANGE: &str = "no_change";

/// Inputs and outcome of one `reset_armed_state` call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CalculationRecord {
    pub at: DateTime<Utc>,
    pub source: ChangeSource,
    pub old_state: AlarmState,
    /// State in force afterwards; `None` when nothing was decided.
    pub new_state: Option<AlarmState>,
    /// What the transition rules chose, if they were consulted.
    pub determined: Option<AlarmState>,
    pub occupied: Option<bool>,
    pub night: bool,
    pub calendar_event: Option<EventSummary>,
    pub calendar_hold: bool,
    pub intervention_hold: bool,
}

impl CalculationRecord {
    pub fn new(
        at: DateTime<Utc>,
        source: ChangeSource,
        old_state: AlarmState,
        variables: &ConditionVariables,
    ) -> Self {
        Self {
            at,
            source,
            old_state,
            new_state: None,
            determined: None,
            occupied: variables.occupied,
            night: variables.night,
            calendar_event: variables.calendar_event.clone(),
            calendar_hold: false,
            intervention_hold: false,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TrackedEventDiagnostics {
    pub id: String,
    pub summary: String,
    pub target: AlarmState,
    pub status: EventStatus,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CalendarDiagnostics {
    pub entity_id: String,
    pub events: Vec<TrackedEventDiagnostics>,
}

/// Point-in-time view of the engine.
#[derive(Debug, Clone, Serialize)]
pub struct Diagnostics {
    pub alarm_panel: String,
    pub armed_state: AlarmState,
    pub requested_state: Option<AlarmState>,
    pub health: HealthSnapshot,
    pub occupants: Vec<String>,
    pub active_event: Option<EventSummary>,
    pub calendars: Vec<CalendarDiagnostics>,
    pub interventions: Vec<Intervention>,
}

impl Armer {
    pub async fn diagnostics(&self) -> Diagnostics {
        let mut calendars = Vec::new();
        for calendar in self.calendars().await {
            let events = calendar
                .tracked_events()
                .await
                .iter()
                .map(|e| TrackedEventDiagnostics {
                    id: e.id().to_owned(),
                    summary: e.event().summary.clone(),
                    target: e.target(),
                    status: e.status(),
                    start: e.event().start,
                    end: e.event().end,
                })
                .collect();
            calendars.push(CalendarDiagnostics {
                entity_id: calendar.id().to_owned(),
                events,
            });
        }
        Diagnostics {
            alarm_panel: self.alarm_panel().to_owned(),
            armed_state: self.armed_state().await,
            requested_state: self.requested_state().await.map(|(state, _)| state),
            health: self.health(),
            occupants: self.inner.config.occupancy.entity_ids.clone(),
            active_event: self.active_event_summary().await,
            calendars,
            interventions: self.interventions().await,
        }
    }

    /// Condensed view of the effective configuration.
    pub fn config_summary(&self) -> Value {
        let config = &self.inner.config;
        json!({
            "alarm_panel": config.alarm_panel,
            "calendars": config
                .calendar_control
                .calendars
                .iter()
                .map(|c| c.entity_id.as_str())
                .collect::<Vec<_>>(),
            "no_event_mode": config.calendar_control.no_event_mode.to_string(),
            "occupants": config.occupancy.entity_ids,
            "buttons": config.buttons.keys().map(AsRef::as_ref).collect::<Vec<&str>>(),
            "transitions": config.transitions.keys().map(AsRef::as_ref).collect::<Vec<&str>>(),
            "notify_profiles": config.notify.profiles.keys().collect::<Vec<_>>(),
            "sunrise_cutoff": config.sunrise_cutoff.map(|t| t.to_string()),
            "arm_away_delay": config.arm_away_delay,
            "throttle_calls": config.throttle_calls,
            "throttle_seconds": config.throttle_seconds,
        })
    }

    // ── Publishing ───────────────────────────────────────────────

    pub(super) async fn publish_configured(&self) {
        let attributes = match self.config_summary() {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        self.publish(CONFIGURED_ENTITY, "valid", attributes).await;
    }

    pub(super) async fn publish_initialized(&self) {
        let snapshot = self.health();
        let mut attributes = Map::new();
        for (stage, count) in &snapshot.errors {
            attributes.insert(stage.to_string(), json!(count));
        }
        let state = if snapshot.initialized { "true" } else { "false" };
        self.publish(INITIALIZED_ENTITY, state, attributes).await;
    }

    pub(super) async fn publish_failures(&self) {
        let failures = self.inner.health.failures().to_string();
        self.publish(FAILURES_ENTITY, &failures, Map::new()).await;
    }

    pub(super) async fn publish_intervention(&self, intervention: &Intervention) {
        self.publish(
            LAST_INTERVENTION_ENTITY,
            intervention.source.as_ref(),
            to_attributes(intervention),
        )
        .await;
    }

    pub(super) async fn publish_calendar_event(&self, summary: &EventSummary) {
        self.publish(
            LAST_CALENDAR_EVENT_ENTITY,
            &summary.summary,
            to_attributes(summary),
        )
        .await;
    }

    pub(super) async fn publish_calculation(&self, record: &CalculationRecord) {
        let state = record.new_state.as_ref().map_or(NO_CHANGE, AsRef::as_ref);
        self.publish(LAST_CALCULATION_ENTITY, state, to_attributes(record))
            .await;
    }

    async fn publish(&self, entity_id: &str, state: &str, attributes: Attributes) {
        trace!(entity_id, state, "publishing diagnostic");
        if let Err(e) = self
            .inner
            .ports
            .registry
            .set(entity_id, state, attributes)
            .await
        {
            warn!(entity_id, error = %e, "failed to publish diagnostic entity");
        }
    }
}

fn to_attributes<T: Serialize>(value: &T) -> Attributes {
    match serde_json::to_value(value) {
        Ok(Value::Object(map)) => map,
        Ok(_) => Map::new(),
        Err(e) => {
            warn!(error = %e, "diagnostic attributes not serializable");
            Map::new()
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn record_starts_undecided() {
        let vars = ConditionVariables::sample();
        let record = CalculationRecord::new(
            Utc::now(),
            ChangeSource::Sunset,
            AlarmState::Disarmed,
            &vars,
        );
        assert_eq!(record.new_state, None);
        assert!(!record.calendar_hold);
        assert!(!record.intervention_hold);
        assert_eq!(record.night, vars.night);

        let attrs = to_attributes(&record);
        assert_eq!(attrs["source"], json!("sunset"));
        assert_eq!(attrs["old_state"], json!("disarmed"));
        assert_eq!(attrs["new_state"], Value::Null);
    }
}
