// ── Expression evaluator ──
//
// Built-in `ConditionEvaluator` for the tagged rule language. Variables are
// resolved by dotted path against the JSON form of the snapshot.

use serde_json::Value;

use super::{
    Condition, ConditionChecker, ConditionError, ConditionEvaluator, ConditionVariables,
    ValidationMode, VariableCondition,
};

static NULL: Value = Value::Null;

#[derive(Debug, Clone, Copy, Default)]
pub struct ExpressionEvaluator;

impl ConditionEvaluator for ExpressionEvaluator {
    fn validate(
        &self,
        condition: &Condition,
        mode: ValidationMode,
    ) -> Result<Box<dyn ConditionChecker>, ConditionError> {
        check_structure(condition)?;
        let checker = ExpressionChecker {
            condition: condition.clone(),
            mode,
        };
        checker.check(&ConditionVariables::sample())?;
        Ok(Box::new(checker))
    }
}

#[derive(Debug, Clone)]
struct ExpressionChecker {
    condition: Condition,
    mode: ValidationMode,
}

impl ConditionChecker for ExpressionChecker {
    fn check(&self, variables: &ConditionVariables) -> Result<bool, ConditionError> {
        let root = variables.to_value()?;
        evaluate(&self.condition, &root, self.mode)
    }
}

fn check_structure(condition: &Condition) -> Result<(), ConditionError> {
    match condition {
        Condition::And(group) | Condition::Or(group) | Condition::Not(group) => {
            if group.conditions.is_empty() {
                return Err(ConditionError::InvalidConfig(
                    "condition group has no conditions".into(),
                ));
            }
            group.conditions.iter().try_for_each(check_structure)
        }
        Condition::Variable(test) => {
            if test.variable.trim().is_empty() {
                return Err(ConditionError::InvalidConfig("empty variable name".into()));
            }
            if test.equals.is_some() && !test.one_of.is_empty() {
                return Err(ConditionError::InvalidConfig(format!(
                    "variable {} has both `equals` and `in`",
                    test.variable
                )));
            }
            Ok(())
        }
        Condition::Constant(_) => Ok(()),
    }
}

fn evaluate(
    condition: &Condition,
    root: &Value,
    mode: ValidationMode,
) -> Result<bool, ConditionError> {
    match condition {
        Condition::And(group) => {
            for c in &group.conditions {
                if !evaluate(c, root, mode)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        Condition::Or(group) => {
            for c in &group.conditions {
                if evaluate(c, root, mode)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        Condition::Not(group) => {
            for c in &group.conditions {
                if evaluate(c, root, mode)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        Condition::Variable(test) => evaluate_variable(test, root, mode),
        Condition::Constant(constant) => Ok(constant.value),
    }
}

fn evaluate_variable(
    test: &VariableCondition,
    root: &Value,
    mode: ValidationMode,
) -> Result<bool, ConditionError> {
    let value = resolve(root, &test.variable, mode)?;
    if let Some(expected) = &test.equals {
        return Ok(value == expected);
    }
    if !test.one_of.is_empty() {
        return Ok(test.one_of.iter().any(|candidate| candidate == value));
    }
    Ok(truthy(value))
}

/// Walk a dotted path. Walking into null yields null; a missing key is an
/// error only in strict mode.
fn resolve<'a>(
    root: &'a Value,
    path: &str,
    mode: ValidationMode,
) -> Result<&'a Value, ConditionError> {
    let mut current = root;
    for segment in path.split('.') {
        current = match current {
            Value::Null => return Ok(&NULL),
            Value::Object(map) => match map.get(segment) {
                Some(next) => next,
                None if mode == ValidationMode::Strict => {
                    return Err(ConditionError::UndefinedVariable(path.to_owned()));
                }
                None => return Ok(&NULL),
            },
            Value::Array(items) => match segment.parse::<usize>().ok().and_then(|i| items.get(i)) {
                Some(next) => next,
                None if mode == ValidationMode::Strict => {
                    return Err(ConditionError::UndefinedVariable(path.to_owned()));
                }
                None => return Ok(&NULL),
            },
            _ if mode == ValidationMode::Strict => {
                return Err(ConditionError::UndefinedVariable(path.to_owned()));
            }
            _ => return Ok(&NULL),
        };
    }
    Ok(current)
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::model::AlarmState;
    use serde_json::json;

    fn vars() -> ConditionVariables {
        ConditionVariables {
            calendar_event: None,
            ..ConditionVariables::sample()
        }
    }

    fn check(condition: &Condition, variables: &ConditionVariables) -> bool {
        ExpressionEvaluator
            .validate(condition, ValidationMode::Lenient)
            .unwrap()
            .check(variables)
            .unwrap()
    }

    #[test]
    fn boolean_combinators() {
        let v = vars();
        let home_by_day = Condition::and(vec![
            Condition::var("occupied"),
            Condition::not(vec![Condition::var("night")]),
        ]);
        assert!(check(&home_by_day, &v));
        let away_or_night = Condition::or(vec![Condition::var("unoccupied"), Condition::var("night")]);
        assert!(!check(&away_or_night, &v));
        assert!(check(&Condition::constant(true), &v));
    }

    #[test]
    fn equality_and_membership_on_states() {
        let v = ConditionVariables {
            state: AlarmState::ArmedVacation,
            ..vars()
        };
        assert!(check(&Condition::equals("state", "armed_vacation"), &v));
        assert!(check(
            &Condition::one_of("state", vec![json!("armed_away"), json!("armed_vacation")]),
            &v
        ));
        assert!(!check(&Condition::equals("occupied_day_default", "disarmed"), &v));
    }

    #[test]
    fn null_calendar_event_reads_as_null_in_lenient_mode() {
        let v = vars();
        assert!(!check(&Condition::var("calendar_event.summary"), &v));
        assert!(check(&Condition::equals("calendar_event.summary", Value::Null), &v));
    }

    #[test]
    fn strict_mode_rejects_undefined_variables() {
        let err = ExpressionEvaluator
            .validate(&Condition::var("occupants_home"), ValidationMode::Strict)
            .unwrap_err();
        assert_eq!(err, ConditionError::UndefinedVariable("occupants_home".into()));

        assert!(ExpressionEvaluator
            .validate(&Condition::var("occupants_home"), ValidationMode::Lenient)
            .is_ok());
        assert!(ExpressionEvaluator
            .validate(&Condition::var("calendar_event.summary"), ValidationMode::Strict)
            .is_ok());
    }

    #[test]
    fn structural_errors_fail_in_both_modes() {
        let empty = Condition::and(vec![]);
        for mode in [ValidationMode::Strict, ValidationMode::Lenient] {
            assert!(matches!(
                ExpressionEvaluator.validate(&empty, mode),
                Err(ConditionError::InvalidConfig(_))
            ));
        }
        let both = Condition::Variable(VariableCondition {
            variable: "state".into(),
            equals: Some(json!("disarmed")),
            one_of: vec![json!("armed_home")],
        });
        assert!(ExpressionEvaluator.validate(&both, ValidationMode::Lenient).is_err());
    }
}
