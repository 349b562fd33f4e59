// ── Reconciliation ──
//
// `reset_armed_state` and the calendar start/end reactions. Precedence,
// highest first: an active calendar event, the no-event policy, a sticky
// earlier intervention, then the transition rules.

use std::sync::Arc;

use tracing::{debug, info};

use super::{Armer, CalculationRecord};
use crate::calendar::TrackedCalendarEvent;
use crate::condition::ConditionVariables;
use crate::config::{ActiveEventPolicy, NoEventAction, NoEventTrigger};
use crate::host::{BELOW_HORIZON, SUN_ENTITY};
use crate::model::{AlarmState, ChangeSource, EventSummary, Intervention};

const HOME: &str = "home";

impl Armer {
    /// Recompute the alarm state and commit it if it differs.
    ///
    /// Returns the state in force afterwards: unchanged when a calendar
    /// event or an earlier intervention holds it, the newly armed state
    /// otherwise. `None` means no rule matched or the arm was dropped.
    /// A `last_calculation` record is published on every path.
    pub async fn reset_armed_state(
        &self,
        intervention: Option<Intervention>,
        source: ChangeSource,
    ) -> Option<AlarmState> {
        let existing = self.armed_state().await;
        let variables = self.condition_variables(existing).await;
        let mut record = CalculationRecord::new(self.now(), source, existing, &variables);

        let result = self
            .reconcile(existing, intervention.as_ref(), source, &variables, &mut record)
            .await;
        record.new_state = result;
        debug!(
            source = %source,
            existing = %existing,
            result = ?result,
            "reconciliation complete"
        );
        self.publish_calculation(&record).await;
        result
    }

    async fn reconcile(
        &self,
        existing: AlarmState,
        intervention: Option<&Intervention>,
        source: ChangeSource,
        variables: &ConditionVariables,
        record: &mut CalculationRecord,
    ) -> Option<AlarmState> {
        if !self.inner.config.calendar_control.calendars.is_empty() {
            if self.has_active_calendar_event().await {
                debug!("calendar event active, leaving state alone");
                record.calendar_hold = true;
                return Some(existing);
            }
            match self
                .inner
                .config
                .calendar_control
                .no_event_mode
                .decide(NoEventTrigger::Reconcile)
            {
                NoEventAction::Keep => {
                    debug!("no calendar event and manual mode, leaving state alone");
                    record.calendar_hold = true;
                    return Some(existing);
                }
                NoEventAction::Arm(fixed) => {
                    return self.arm_or_keep(fixed, existing, ChangeSource::Calendar).await;
                }
                NoEventAction::Reconcile { .. } => {}
            }
        }

        let must_change = intervention.is_some()
            || source.overrides_interventions()
            || existing.must_change();
        if !must_change {
            let prior = self
                .inner
                .interventions
                .lock()
                .await
                .last_state_intervention()
                .cloned();
            if let Some(prior) = prior {
                debug!(
                    prior_source = %prior.source,
                    prior_state = ?prior.state,
                    "earlier intervention stands"
                );
                record.intervention_hold = true;
                return Some(existing);
            }
        }

        let determined = self.determine_state(variables).await;
        record.determined = determined;
        match determined {
            Some(state) if state != AlarmState::Pending => {
                self.arm_or_keep(state, existing, source).await
            }
            _ => None,
        }
    }

    async fn arm_or_keep(
        &self,
        target: AlarmState,
        existing: AlarmState,
        source: ChangeSource,
    ) -> Option<AlarmState> {
        if target == existing {
            return Some(existing);
        }
        self.arm(Some(target), source).await
    }

    /// First transition rule that holds for `variables`.
    pub async fn determine_state(&self, variables: &ConditionVariables) -> Option<AlarmState> {
        let determination = self.inner.transitions.lock().await.determine(variables);
        for _ in 0..determination.errors {
            self.record_failure().await;
        }
        determination.state
    }

    /// Snapshot of everything the rules may look at.
    pub async fn condition_variables(&self, state: AlarmState) -> ConditionVariables {
        let registry = &self.inner.ports.registry;
        let occupancy = &self.inner.config.occupancy;

        let mut at_home = Vec::new();
        let mut not_home = Vec::new();
        for occupant in &occupancy.entity_ids {
            let home = registry
                .get(occupant)
                .await
                .is_some_and(|e| e.state == HOME);
            if home {
                at_home.push(occupant.clone());
            } else {
                not_home.push(occupant.clone());
            }
        }
        let (occupied, unoccupied) = if occupancy.entity_ids.is_empty() {
            (None, None)
        } else {
            (Some(!at_home.is_empty()), Some(at_home.is_empty()))
        };
        let night = registry
            .get(SUN_ENTITY)
            .await
            .is_some_and(|e| e.state == BELOW_HORIZON);

        ConditionVariables {
            occupied,
            unoccupied,
            night,
            state,
            calendar_event: self.active_calendar_event().await.map(|e| e.summary()),
            occupied_day_default: occupancy.day_default,
            occupied_night_default: occupancy.night_default,
            at_home,
            not_home,
        }
    }

    /// The active event that currently wins, per the configured policy.
    pub async fn active_calendar_event(&self) -> Option<Arc<TrackedCalendarEvent>> {
        let mut active = Vec::new();
        for calendar in self.calendars().await {
            active.extend(calendar.active_events().await);
        }
        match self.inner.config.calendar_control.active_event {
            ActiveEventPolicy::First => active.into_iter().next(),
            ActiveEventPolicy::LatestStart => active
                .into_iter()
                .reduce(|best, e| if e.event().start > best.event().start { e } else { best }),
        }
    }

    // ── Calendar reactions ───────────────────────────────────────

    pub(super) async fn on_calendar_event_start(&self, event: &TrackedCalendarEvent) {
        let existing = self.armed_state().await;
        if event.target() != existing {
            info!(
                event = %event.id(),
                target = %event.target(),
                "calendar event changing alarm state"
            );
            self.arm(Some(event.target()), ChangeSource::Calendar).await;
        }
        self.publish_calendar_event(&event.summary()).await;
    }

    pub(super) async fn on_calendar_event_end(&self, event: &TrackedCalendarEvent) {
        if self.has_active_calendar_event().await {
            debug!(event = %event.id(), "another calendar event still active");
            return;
        }
        let trigger = NoEventTrigger::EventEnded {
            previous: event.previous_state(),
        };
        match self.inner.config.calendar_control.no_event_mode.decide(trigger) {
            NoEventAction::Keep => {
                debug!(event = %event.id(), "calendar event ended, nothing to restore");
            }
            NoEventAction::Arm(state) => {
                info!(event = %event.id(), state = %state, "calendar event ended, arming");
                self.arm(Some(state), ChangeSource::Calendar).await;
            }
            NoEventAction::Reconcile { via_pending } => {
                info!(event = %event.id(), "calendar event ended, reconciling");
                if via_pending {
                    self.arm(Some(AlarmState::Pending), ChangeSource::Calendar)
                        .await;
                }
                self.reset_armed_state(None, ChangeSource::Calendar).await;
            }
        }
    }

    /// Summary of the winning active event, if any.
    pub async fn active_event_summary(&self) -> Option<EventSummary> {
        self.active_calendar_event().await.map(|e| e.summary())
    }
}
