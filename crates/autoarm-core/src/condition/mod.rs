// ── Transition conditions ──
//
// A small tagged rule language for deciding which alarm state applies,
// the variable snapshot rules are evaluated against, and the evaluator
// port that turns a rule into a reusable checker.

pub mod evaluator;
pub mod transitions;

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::{AsRefStr, Display};
use thiserror::Error;

use crate::model::{AlarmState, EventSummary};

pub use evaluator::ExpressionEvaluator;
pub use transitions::{Determination, TransitionBuild, TransitionSet, default_transitions};

/// Condition errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConditionError {
    #[error("Invalid condition configuration: {0}")]
    InvalidConfig(String),

    #[error("Undefined variable: {0}")]
    UndefinedVariable(String),

    #[error("Evaluation failed: {0}")]
    Evaluation(String),
}

/// Condition definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "condition", rename_all = "snake_case")]
pub enum Condition {
    /// All conditions must be true
    And(ConditionGroup),

    /// Any condition must be true
    Or(ConditionGroup),

    /// None of the conditions may be true
    Not(ConditionGroup),

    /// Test a named variable
    Variable(VariableCondition),

    /// Fixed outcome
    Constant(ConstantCondition),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionGroup {
    pub conditions: Vec<Condition>,
}

/// Test on a dotted variable path. With neither `equals` nor `in`, the
/// variable must be truthy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableCondition {
    pub variable: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub equals: Option<Value>,
    #[serde(default, rename = "in", skip_serializing_if = "Vec::is_empty")]
    pub one_of: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstantCondition {
    pub value: bool,
}

impl Condition {
    pub fn and(conditions: Vec<Condition>) -> Self {
        Self::And(ConditionGroup { conditions })
    }

    pub fn or(conditions: Vec<Condition>) -> Self {
        Self::Or(ConditionGroup { conditions })
    }

    /// True when none of `conditions` hold.
    pub fn not(conditions: Vec<Condition>) -> Self {
        Self::Not(ConditionGroup { conditions })
    }

    /// Truthiness test on a variable.
    pub fn var(path: impl Into<String>) -> Self {
        Self::Variable(VariableCondition {
            variable: path.into(),
            equals: None,
            one_of: Vec::new(),
        })
    }

    pub fn equals(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Variable(VariableCondition {
            variable: path.into(),
            equals: Some(value.into()),
            one_of: Vec::new(),
        })
    }

    pub fn one_of(path: impl Into<String>, values: Vec<Value>) -> Self {
        Self::Variable(VariableCondition {
            variable: path.into(),
            equals: None,
            one_of: values,
        })
    }

    pub fn constant(value: bool) -> Self {
        Self::Constant(ConstantCondition { value })
    }
}

// ── Variables ────────────────────────────────────────────────────

/// Snapshot of everything a transition rule may look at.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConditionVariables {
    /// `None` when no occupants are configured.
    pub occupied: Option<bool>,
    pub unoccupied: Option<bool>,
    pub night: bool,
    pub state: AlarmState,
    pub calendar_event: Option<EventSummary>,
    pub occupied_day_default: Option<AlarmState>,
    pub occupied_night_default: Option<AlarmState>,
    pub at_home: Vec<String>,
    pub not_home: Vec<String>,
}

impl ConditionVariables {
    /// A representative snapshot used to dry-run rules during validation.
    pub fn sample() -> Self {
        let start = DateTime::<Utc>::UNIX_EPOCH;
        Self {
            occupied: Some(true),
            unoccupied: Some(false),
            night: false,
            state: AlarmState::Disarmed,
            calendar_event: Some(EventSummary {
                calendar: "calendar.sample".into(),
                summary: String::new(),
                description: None,
                start,
                end: start,
                uid: None,
            }),
            occupied_day_default: Some(AlarmState::ArmedHome),
            occupied_night_default: Some(AlarmState::ArmedNight),
            at_home: Vec::new(),
            not_home: Vec::new(),
        }
    }

    pub fn to_value(&self) -> Result<Value, ConditionError> {
        serde_json::to_value(self).map_err(|e| ConditionError::Evaluation(e.to_string()))
    }
}

// ── Evaluator port ───────────────────────────────────────────────

/// How undefined variables are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum ValidationMode {
    /// Undefined variables are errors.
    Strict,
    /// Undefined variables read as null.
    Lenient,
}

/// A validated rule, ready to evaluate.
pub trait ConditionChecker: Send + Sync + fmt::Debug {
    fn check(&self, variables: &ConditionVariables) -> Result<bool, ConditionError>;
}

/// Builds checkers from rule definitions.
pub trait ConditionEvaluator: Send + Sync {
    fn validate(
        &self,
        condition: &Condition,
        mode: ValidationMode,
    ) -> Result<Box<dyn ConditionChecker>, ConditionError>;
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn deserializes_tagged_rules() {
        let raw = json!({
            "condition": "and",
            "conditions": [
                {"condition": "variable", "variable": "occupied"},
                {"condition": "not", "conditions": [{"condition": "variable", "variable": "night"}]},
                {"condition": "variable", "variable": "state", "in": ["disarmed", "armed_home"]}
            ]
        });
        let parsed: Condition = serde_json::from_value(raw).unwrap();
        assert_eq!(
            parsed,
            Condition::and(vec![
                Condition::var("occupied"),
                Condition::not(vec![Condition::var("night")]),
                Condition::one_of("state", vec![json!("disarmed"), json!("armed_home")]),
            ])
        );
    }

    #[test]
    fn variables_serialize_with_snake_case_states() {
        let vars = ConditionVariables::sample();
        let value = vars.to_value().unwrap();
        assert_eq!(value["state"], json!("disarmed"));
        assert_eq!(value["occupied_day_default"], json!("armed_home"));
        assert_eq!(value["calendar_event"]["calendar"], json!("calendar.sample"));
    }
}
