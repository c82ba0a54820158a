//! Condition predicates
//!
//! Evaluation is pure and deterministic: identical inputs always yield
//! the identical branch. This is required for crash-resume correctness,
//! since a replayed run must not re-evaluate a condition differently.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::result::StepResult;
use crate::error::EngineError;

/// Comparison operators for condition steps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    Equals,
    NotEquals,
    GreaterThan,
    LessThan,
    Contains,
    IsEmpty,
    IsNotEmpty,
}

/// A predicate over the trigger context and prior step data
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Condition {
    /// Field path: `trigger.<path>` addresses the trigger context,
    /// `steps.<step_id>.<path>` addresses a prior step's result data
    pub field: String,

    pub operator: ConditionOperator,

    #[serde(default)]
    pub value: Value,
}

impl Condition {
    pub fn new(field: impl Into<String>, operator: ConditionOperator, value: Value) -> Self {
        Self {
            field: field.into(),
            operator,
            value,
        }
    }

    /// Evaluate the predicate against the trigger context and prior results
    ///
    /// Missing operands evaluate as null rather than erroring; only a
    /// structurally malformed field path is an error.
    pub fn evaluate(&self, trigger: &Value, results: &[StepResult]) -> Result<bool, EngineError> {
        let actual = self.resolve_field(trigger, results)?;

        let holds = match self.operator {
            ConditionOperator::Equals => values_equal(&actual, &self.value),
            ConditionOperator::NotEquals => !values_equal(&actual, &self.value),
            ConditionOperator::GreaterThan => compare_numbers(&actual, &self.value)
                .map(|ord| ord == std::cmp::Ordering::Greater)
                .unwrap_or(false),
            ConditionOperator::LessThan => compare_numbers(&actual, &self.value)
                .map(|ord| ord == std::cmp::Ordering::Less)
                .unwrap_or(false),
            ConditionOperator::Contains => contains(&actual, &self.value),
            ConditionOperator::IsEmpty => is_empty(&actual),
            ConditionOperator::IsNotEmpty => !is_empty(&actual),
        };

        Ok(holds)
    }

    fn resolve_field(&self, trigger: &Value, results: &[StepResult]) -> Result<Value, EngineError> {
        let mut parts = self.field.split('.');
        let root = parts
            .next()
            .filter(|p| !p.is_empty())
            .ok_or_else(|| EngineError::MalformedCondition("empty field path".to_string()))?;

        match root {
            "trigger" => Ok(lookup_path(trigger, parts)),
            "steps" => {
                let step_id = parts.next().ok_or_else(|| {
                    EngineError::MalformedCondition(format!(
                        "field '{}' is missing a step id",
                        self.field
                    ))
                })?;
                let data = results
                    .iter()
                    .find(|r| r.step_id == step_id)
                    .and_then(|r| r.data.clone())
                    .unwrap_or(Value::Null);
                Ok(lookup_path(&data, parts))
            }
            // Bare paths address the trigger context directly
            _ => Ok(lookup_path(trigger, self.field.split('.'))),
        }
    }
}

fn lookup_path<'a>(root: &Value, parts: impl Iterator<Item = &'a str>) -> Value {
    let mut current = root.clone();
    for part in parts {
        current = match current {
            Value::Object(map) => map.get(part).cloned().unwrap_or(Value::Null),
            Value::Array(items) => part
                .parse::<usize>()
                .ok()
                .and_then(|i| items.get(i).cloned())
                .unwrap_or(Value::Null),
            _ => Value::Null,
        };
    }
    current
}

fn values_equal(a: &Value, b: &Value) -> bool {
    // Numbers compare by value so 1 == 1.0
    if let (Some(x), Some(y)) = (a.as_f64(), b.as_f64()) {
        return x == y;
    }
    a == b
}

fn compare_numbers(a: &Value, b: &Value) -> Option<std::cmp::Ordering> {
    Some(a.as_f64()?.total_cmp(&b.as_f64()?))
}

fn contains(haystack: &Value, needle: &Value) -> bool {
    match haystack {
        Value::String(s) => needle.as_str().map(|n| s.contains(n)).unwrap_or(false),
        Value::Array(items) => items.iter().any(|item| values_equal(item, needle)),
        _ => false,
    }
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::StepResult;
    use serde_json::json;

    fn step_result(id: &str, data: Value) -> StepResult {
        StepResult::success(id, "action", Some(data))
    }

    #[test]
    fn test_equals_on_trigger_field() {
        let condition = Condition::new("trigger.status", ConditionOperator::Equals, json!("open"));
        let trigger = json!({"status": "open"});

        assert!(condition.evaluate(&trigger, &[]).unwrap());
    }

    #[test]
    fn test_equals_numeric_coercion() {
        let condition = Condition::new("trigger.amount", ConditionOperator::Equals, json!(10));
        let trigger = json!({"amount": 10.0});

        assert!(condition.evaluate(&trigger, &[]).unwrap());
    }

    #[test]
    fn test_greater_than_on_step_data() {
        let condition =
            Condition::new("steps.count.total", ConditionOperator::GreaterThan, json!(5));
        let results = vec![step_result("count", json!({"total": 9}))];

        assert!(condition.evaluate(&json!({}), &results).unwrap());
    }

    #[test]
    fn test_missing_field_is_falsy() {
        let condition = Condition::new("trigger.absent", ConditionOperator::Equals, json!(1));
        assert!(!condition.evaluate(&json!({}), &[]).unwrap());

        let not_empty = Condition::new("trigger.absent", ConditionOperator::IsNotEmpty, json!(null));
        assert!(!not_empty.evaluate(&json!({}), &[]).unwrap());
    }

    #[test]
    fn test_contains_string_and_array() {
        let in_string = Condition::new("trigger.note", ConditionOperator::Contains, json!("urgent"));
        assert!(in_string
            .evaluate(&json!({"note": "this is urgent!"}), &[])
            .unwrap());

        let in_array = Condition::new("trigger.tags", ConditionOperator::Contains, json!("vip"));
        assert!(in_array
            .evaluate(&json!({"tags": ["new", "vip"]}), &[])
            .unwrap());
    }

    #[test]
    fn test_is_empty() {
        let condition = Condition::new("trigger.items", ConditionOperator::IsEmpty, json!(null));
        assert!(condition.evaluate(&json!({"items": []}), &[]).unwrap());
        assert!(!condition.evaluate(&json!({"items": [1]}), &[]).unwrap());
    }

    #[test]
    fn test_determinism() {
        let condition =
            Condition::new("steps.check.passed", ConditionOperator::Equals, json!(true));
        let results = vec![step_result("check", json!({"passed": true}))];
        let trigger = json!({"noise": 1});

        let first = condition.evaluate(&trigger, &results).unwrap();
        for _ in 0..10 {
            assert_eq!(condition.evaluate(&trigger, &results).unwrap(), first);
        }
    }

    #[test]
    fn test_missing_step_id_is_malformed() {
        let condition = Condition::new("steps", ConditionOperator::IsEmpty, json!(null));
        assert!(matches!(
            condition.evaluate(&json!({}), &[]),
            Err(EngineError::MalformedCondition(_))
        ));
    }
}
