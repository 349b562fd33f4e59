// ── Health tracking ──
//
// Per-stage initialization error counts and a cumulative runtime failure
// counter, both published as diagnostic entities.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use dashmap::DashMap;
use indexmap::IndexMap;
use serde::Serialize;
use strum::{AsRefStr, Display, EnumIter, IntoEnumIterator};

/// Initialization stages that can fail independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Display, EnumIter, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Stage {
    Calendars,
    Transitions,
    Buttons,
    Occupancy,
    Notify,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthSnapshot {
    pub initialized: bool,
    pub errors: IndexMap<Stage, u64>,
    pub failures: u64,
}

impl HealthSnapshot {
    pub fn healthy(&self) -> bool {
        self.initialized && self.errors.values().all(|n| *n == 0)
    }
}

#[derive(Debug, Default)]
pub struct HealthTracker {
    initialized: AtomicBool,
    stage_errors: DashMap<Stage, u64>,
    failures: AtomicU64,
}

impl HealthTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_init_error(&self, stage: Stage) {
        *self.stage_errors.entry(stage).or_insert(0) += 1;
    }

    /// Count a runtime failure, returning the new total.
    pub fn record_runtime_error(&self) -> u64 {
        self.failures.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn mark_initialized(&self) {
        self.initialized.store(true, Ordering::SeqCst);
    }

    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::SeqCst)
    }

    pub fn stage_errors(&self, stage: Stage) -> u64 {
        self.stage_errors.get(&stage).map_or(0, |n| *n)
    }

    pub fn snapshot(&self) -> HealthSnapshot {
        HealthSnapshot {
            initialized: self.initialized.load(Ordering::SeqCst),
            errors: Stage::iter().map(|s| (s, self.stage_errors(s))).collect(),
            failures: self.failures(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_lists_every_stage() {
        let health = HealthTracker::new();
        health.record_init_error(Stage::Transitions);
        health.record_init_error(Stage::Transitions);
        health.mark_initialized();
        assert_eq!(health.record_runtime_error(), 1);

        let snap = health.snapshot();
        assert_eq!(snap.errors.len(), 5);
        assert_eq!(snap.errors[&Stage::Transitions], 2);
        assert_eq!(snap.errors[&Stage::Calendars], 0);
        assert_eq!(snap.failures, 1);
        assert!(!snap.healthy());
    }
}
