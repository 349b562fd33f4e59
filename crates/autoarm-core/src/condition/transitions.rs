// ── Transition rules ──
//
// Ordered mapping of target state to rule. The first rule that holds
// decides the recommended state.

use indexmap::IndexMap;
use serde_json::{Map, Value, json};
use tracing::{debug, error, warn};

use super::{
    Condition, ConditionChecker, ConditionError, ConditionEvaluator, ConditionVariables,
    ValidationMode,
};
use crate::host::{Issue, IssueReporter, IssueSeverity};
use crate::model::AlarmState;

/// The built-in rule set, in priority order.
pub fn default_transitions() -> IndexMap<AlarmState, Condition> {
    let occupied_by_day = |default: AlarmState| {
        Condition::and(vec![
            Condition::var("occupied"),
            Condition::not(vec![Condition::var("night")]),
            Condition::equals("occupied_day_default", default.as_ref()),
        ])
    };
    IndexMap::from([
        (
            AlarmState::ArmedVacation,
            Condition::equals("state", AlarmState::ArmedVacation.as_ref()),
        ),
        (AlarmState::ArmedAway, Condition::var("unoccupied")),
        (
            AlarmState::ArmedNight,
            Condition::and(vec![Condition::var("occupied"), Condition::var("night")]),
        ),
        (AlarmState::ArmedHome, occupied_by_day(AlarmState::ArmedHome)),
        (AlarmState::Disarmed, occupied_by_day(AlarmState::Disarmed)),
    ])
}

/// Validated, ordered transition checkers.
#[derive(Debug, Default)]
pub struct TransitionSet {
    rules: Vec<(AlarmState, Box<dyn ConditionChecker>)>,
}

/// Outcome of building a [`TransitionSet`].
#[derive(Debug)]
pub struct TransitionBuild {
    pub set: TransitionSet,
    /// Transitions disabled because they failed validation.
    pub errors: usize,
    /// Transitions kept but flagged by strict validation.
    pub warnings: usize,
}

/// Result of one rule evaluation pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Determination {
    pub state: Option<AlarmState>,
    pub errors: usize,
}

impl TransitionSet {
    /// Validate every rule twice: strictly to surface undefined variables,
    /// then leniently for the checker kept at runtime. A failing rule is
    /// dropped and reported; the rest still build.
    pub fn build(
        conditions: &IndexMap<AlarmState, Condition>,
        evaluator: &dyn ConditionEvaluator,
        issues: &dyn IssueReporter,
    ) -> TransitionBuild {
        let mut rules = Vec::with_capacity(conditions.len());
        let mut errors = 0;
        let mut warnings = 0;

        for (state, condition) in conditions {
            if let Err(e) = evaluator.validate(condition, ValidationMode::Strict) {
                warnings += 1;
                warn!(state = %state, error = %e, "transition failed strict validation");
                issues.raise_issue(transition_issue(*state, &e, IssueSeverity::Warning));
            }
            match evaluator.validate(condition, ValidationMode::Lenient) {
                Ok(checker) => {
                    debug!(state = %state, "transition validated");
                    rules.push((*state, checker));
                }
                Err(e) => {
                    errors += 1;
                    error!(state = %state, error = %e, "transition disabled");
                    issues.raise_issue(transition_issue(*state, &e, IssueSeverity::Error));
                }
            }
        }

        TransitionBuild {
            set: Self { rules },
            errors,
            warnings,
        }
    }

    /// First state whose rule holds. Rules that fail to evaluate are
    /// skipped and counted.
    pub fn determine(&self, variables: &ConditionVariables) -> Determination {
        let mut errors = 0;
        for (state, checker) in &self.rules {
            match checker.check(variables) {
                Ok(true) => {
                    return Determination {
                        state: Some(*state),
                        errors,
                    };
                }
                Ok(false) => {}
                Err(e) => {
                    errors += 1;
                    error!(state = %state, error = %e, "transition evaluation failed");
                }
            }
        }
        Determination {
            state: None,
            errors,
        }
    }

    pub fn states(&self) -> Vec<AlarmState> {
        self.rules.iter().map(|(state, _)| *state).collect()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

fn transition_issue(state: AlarmState, err: &ConditionError, severity: IssueSeverity) -> Issue {
    let prefix = match severity {
        IssueSeverity::Warning => "strict_transition",
        IssueSeverity::Error => "transition",
    };
    let mut placeholders = Map::new();
    placeholders.insert("state".into(), json!(state.as_ref()));
    placeholders.insert("error".into(), Value::String(err.to_string()));
    Issue {
        id: format!("{prefix}_{state}"),
        key: format!("{prefix}_condition"),
        severity,
        placeholders,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::condition::ExpressionEvaluator;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Issues(Mutex<Vec<Issue>>);

    impl IssueReporter for Issues {
        fn raise_issue(&self, issue: Issue) {
            self.0.lock().unwrap().push(issue);
        }
    }

    fn defaults() -> TransitionSet {
        TransitionSet::build(&default_transitions(), &ExpressionEvaluator, &Issues::default()).set
    }

    fn vars(occupied: bool, night: bool, state: AlarmState) -> ConditionVariables {
        ConditionVariables {
            occupied: Some(occupied),
            unoccupied: Some(!occupied),
            night,
            state,
            calendar_event: None,
            ..ConditionVariables::sample()
        }
    }

    #[test]
    fn default_rules_cover_the_daily_cycle() {
        let set = defaults();
        assert_eq!(set.len(), 5);
        let pick = |v| set.determine(&v).state;
        assert_eq!(pick(vars(true, false, AlarmState::Disarmed)), Some(AlarmState::ArmedHome));
        assert_eq!(pick(vars(true, true, AlarmState::Disarmed)), Some(AlarmState::ArmedNight));
        assert_eq!(pick(vars(false, false, AlarmState::ArmedHome)), Some(AlarmState::ArmedAway));
    }

    #[test]
    fn vacation_is_sticky_but_never_entered() {
        let set = defaults();
        let away = vars(false, false, AlarmState::ArmedVacation);
        assert_eq!(set.determine(&away).state, Some(AlarmState::ArmedVacation));
        let home = vars(true, false, AlarmState::ArmedAway);
        assert_ne!(set.determine(&home).state, Some(AlarmState::ArmedVacation));
    }

    #[test]
    fn disarmed_day_default_selects_disarmed() {
        let set = defaults();
        let v = ConditionVariables {
            occupied_day_default: Some(AlarmState::Disarmed),
            ..vars(true, false, AlarmState::ArmedNight)
        };
        assert_eq!(set.determine(&v).state, Some(AlarmState::Disarmed));
    }

    #[test]
    fn unknown_occupancy_matches_nothing_but_vacation() {
        let set = defaults();
        let v = ConditionVariables {
            occupied: None,
            unoccupied: None,
            ..vars(true, false, AlarmState::Disarmed)
        };
        assert_eq!(set.determine(&v).state, None);
    }

    #[test]
    fn bad_rule_is_disabled_and_reported() {
        let issues = Issues::default();
        let mut rules = default_transitions();
        rules.insert(AlarmState::ArmedHome, Condition::or(vec![]));
        rules.insert(AlarmState::ArmedNight, Condition::var("bedtime"));

        let build = TransitionSet::build(&rules, &ExpressionEvaluator, &issues);
        assert_eq!(build.errors, 1);
        assert_eq!(build.warnings, 2);
        assert_eq!(build.set.len(), 4);
        assert!(!build.set.states().contains(&AlarmState::ArmedHome));

        let raised = issues.0.lock().unwrap();
        assert!(raised.iter().any(|i| i.id == "transition_armed_home"
            && i.severity == IssueSeverity::Error));
        assert!(raised.iter().any(|i| i.id == "strict_transition_armed_night"
            && i.severity == IssueSeverity::Warning));
    }
}
