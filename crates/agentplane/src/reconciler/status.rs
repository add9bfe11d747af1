//! Condition bookkeeping.

use chrono::Utc;

use crate::error::ReconcileError;
use crate::resources::{Condition, ConditionStatus, ConditionType, Object};

pub const REASON_ACCEPTED: &str = "Accepted";
pub const REASON_READY: &str = "DeploymentAvailable";
pub const REASON_NOT_READY: &str = "DeploymentUnavailable";

/// Upsert one condition. Returns whether anything changed.
///
/// `last_transition_time` only moves when the status value flips.
pub fn set_condition(
    conditions: &mut Vec<Condition>,
    condition_type: ConditionType,
    status: ConditionStatus,
    reason: &str,
    message: &str,
    generation: i64,
) -> bool {
    match conditions
        .iter_mut()
        .find(|c| c.condition_type == condition_type)
    {
        Some(existing) => {
            if existing.status == status
                && existing.reason == reason
                && existing.message == message
                && existing.observed_generation == generation
            {
                return false;
            }
            if existing.status != status {
                existing.last_transition_time = Utc::now();
            }
            existing.status = status;
            existing.reason = reason.to_string();
            existing.message = message.to_string();
            existing.observed_generation = generation;
            true
        }
        None => {
            conditions.push(Condition {
                condition_type,
                status,
                reason: reason.to_string(),
                message: message.to_string(),
                last_transition_time: Utc::now(),
                observed_generation: generation,
            });
            true
        }
    }
}

/// `Accepted` derived from a reconcile outcome.
pub fn set_accepted(
    conditions: &mut Vec<Condition>,
    outcome: Result<(), &ReconcileError>,
    generation: i64,
) -> bool {
    match outcome {
        Ok(()) => set_condition(
            conditions,
            ConditionType::Accepted,
            ConditionStatus::True,
            REASON_ACCEPTED,
            "",
            generation,
        ),
        Err(e) => set_condition(
            conditions,
            ConditionType::Accepted,
            ConditionStatus::False,
            e.reason(),
            &e.to_string(),
            generation,
        ),
    }
}

/// Conditions and observed generation of kinds that carry them. Secrets,
/// ConfigMaps and Services have none.
pub fn conditions_mut(object: &mut Object) -> Option<(&mut Vec<Condition>, &mut i64)> {
    match object {
        Object::Agent(o) => Some((&mut o.status.conditions, &mut o.status.observed_generation)),
        Object::ModelConfig(o) => Some((&mut o.status.conditions, &mut o.status.observed_generation)),
        Object::ToolServer(o) => Some((&mut o.status.conditions, &mut o.status.observed_generation)),
        Object::RemoteMcpServer(o) => {
            Some((&mut o.status.conditions, &mut o.status.observed_generation))
        }
        Object::Memory(o) => Some((&mut o.status.conditions, &mut o.status.observed_generation)),
        _ => None,
    }
}
