//! Pure graph navigation
//!
//! Given a definition, the id of the step that just completed, and the
//! persisted results so far, compute the next step. This is a pure
//! function of its inputs: condition branches read the boolean already
//! persisted in the condition step's result, so replaying navigation
//! after a crash follows the exact same path.

use crate::error::EngineError;
use crate::workflow::{StepKind, StepResult, WorkflowDefinition, WorkflowStep};

/// Compute the step to execute after `completed_step_id`
///
/// Returns `Ok(None)` when the graph ends. Successors are resolved in
/// this order: condition branch target, explicit `next`, then the next
/// step in declaration order.
pub fn next_step<'a>(
    definition: &'a WorkflowDefinition,
    completed_step_id: &str,
    results: &[StepResult],
) -> Result<Option<&'a WorkflowStep>, EngineError> {
    let completed = definition
        .step(completed_step_id)
        .ok_or_else(|| EngineError::UnknownStep(completed_step_id.to_string()))?;

    let successor_id = match &completed.kind {
        StepKind::Condition {
            on_true, on_false, ..
        } => {
            // Branch on the persisted evaluation, never a fresh one
            let held = results
                .iter()
                .find(|r| r.step_id == completed.id)
                .and_then(|r| r.data.as_ref())
                .and_then(|d| d.as_bool())
                .ok_or_else(|| {
                    EngineError::MalformedCondition(format!(
                        "no persisted evaluation for condition step '{}'",
                        completed.id
                    ))
                })?;
            if held {
                on_true.as_deref()
            } else {
                on_false.as_deref()
            }
        }
        other => other.declared_next(),
    };

    match successor_id {
        Some(id) => {
            let step = definition
                .step(id)
                .ok_or_else(|| EngineError::UnknownStep(id.to_string()))?;
            Ok(Some(step))
        }
        // Conditions without a taken branch end the graph; everything
        // else falls through to declaration order
        None if matches!(completed.kind, StepKind::Condition { .. }) => Ok(None),
        None => {
            let index = definition
                .step_index(completed_step_id)
                .ok_or_else(|| EngineError::UnknownStep(completed_step_id.to_string()))?;
            Ok(definition.steps.get(index + 1))
        }
    }
}
