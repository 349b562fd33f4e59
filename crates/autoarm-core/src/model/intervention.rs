// ── Intervention log ──
//
// Time-ordered record of who or what last touched the alarm state.
// Drives manual-override precedence and delayed-action cancellation.

use std::collections::VecDeque;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::{AlarmState, ChangeSource};

/// A recorded manual or semi-manual influence on the alarm state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Intervention {
    pub created_at: DateTime<Utc>,
    pub source: ChangeSource,
    pub state: Option<AlarmState>,
}

impl Intervention {
    pub fn new(source: ChangeSource, state: Option<AlarmState>) -> Self {
        Self {
            created_at: Utc::now(),
            source,
            state,
        }
    }

    pub fn at(created_at: DateTime<Utc>, source: ChangeSource, state: Option<AlarmState>) -> Self {
        Self {
            created_at,
            source,
            state,
        }
    }
}

/// Append-only, time-bounded list of interventions.
///
/// Entries are kept in creation order; a timestamp earlier than the newest
/// entry is clamped forward so ordering survives clock adjustments.
#[derive(Debug, Clone, Default)]
pub struct InterventionLog {
    entries: VecDeque<Intervention>,
}

impl InterventionLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an intervention timestamped now.
    pub fn record(&mut self, source: ChangeSource, state: Option<AlarmState>) -> Intervention {
        self.record_at(Utc::now(), source, state)
    }

    pub fn record_at(
        &mut self,
        at: DateTime<Utc>,
        source: ChangeSource,
        state: Option<AlarmState>,
    ) -> Intervention {
        let created_at = match self.entries.back() {
            Some(last) if last.created_at > at => last.created_at,
            _ => at,
        };
        let intervention = Intervention::at(created_at, source, state);
        self.entries.push_back(intervention.clone());
        intervention
    }

    /// True iff any entry was created strictly after `cutoff`.
    pub fn has_intervention_since(&self, cutoff: DateTime<Utc>) -> bool {
        self.entries.iter().any(|i| i.created_at > cutoff)
    }

    /// Most recent entry carrying a target state.
    pub fn last_state_intervention(&self) -> Option<&Intervention> {
        self.entries.iter().rev().find(|i| i.state.is_some())
    }

    pub fn last(&self) -> Option<&Intervention> {
        self.entries.back()
    }

    /// Drop entries older than `ttl`, returning how many were removed.
    pub fn prune(&mut self, ttl: Duration) -> usize {
        self.prune_at(Utc::now(), ttl)
    }

    pub fn prune_at(&mut self, now: DateTime<Utc>, ttl: Duration) -> usize {
        let cutoff = now.checked_sub_signed(ttl).unwrap_or(DateTime::<Utc>::MIN_UTC);
        let before = self.entries.len();
        while self
            .entries
            .front()
            .is_some_and(|front| front.created_at < cutoff)
        {
            self.entries.pop_front();
        }
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Intervention> {
        self.entries.iter()
    }
}
