//! Helpers for maintaining a list of typed conditions.
//!
//! Each condition type occupies a single slot. Setting a condition replaces
//! its status and reason; `last_transition_time` only moves when the status
//! actually flips.

use crate::types::{Condition, ConditionStatus, Timestamp};

/// Find the condition of the given type.
pub fn find_condition<'a>(conditions: &'a [Condition], condition_type: &str) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.condition_type == condition_type)
}

/// Set the condition of the given type, creating it if absent.
///
/// Returns true if anything changed.
pub fn set_condition(
    conditions: &mut Vec<Condition>,
    condition_type: &str,
    status: ConditionStatus,
    reason: &str,
    now: Timestamp,
) -> bool {
    match conditions
        .iter_mut()
        .find(|c| c.condition_type == condition_type)
    {
        Some(existing) => {
            let mut changed = false;
            if existing.status != status {
                existing.status = status;
                existing.last_transition_time = now;
                changed = true;
            }
            if existing.reason != reason {
                existing.reason = reason.to_string();
                changed = true;
            }
            changed
        }
        None => {
            conditions.push(Condition {
                condition_type: condition_type.to_string(),
                status,
                reason: reason.to_string(),
                message: String::new(),
                last_transition_time: now,
            });
            true
        }
    }
}
