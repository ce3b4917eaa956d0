//! Sleep-set reduction.
//!
//! A schedulable that was explored at a decision point is put to sleep there
//! once its subtree is done. It stays asleep at the following decision point
//! as long as the operation that was executed in between is independent of
//! its own pending operation: running it there could only reach schedules
//! that were already explored.

use log::trace;

use crate::error::DporError;
use crate::schedulable::{OperationType, TidEntry};
use crate::stack::ExplorationStack;

/// Whether swapping `a` and `b` may change what the program observes.
///
/// - waiting for quiescence depends on everything,
/// - operations without a target are independent of everything else,
/// - otherwise operations must share the target, and be two sends, two
///   receives, or two lifecycle operations (start, stop, create, join).
///
/// A send and a receive on the same inbox are independent: the receive
/// consumes a message that was sent earlier.
pub fn is_dependent(a: &TidEntry, b: &TidEntry) -> bool {
    if a.op == OperationType::WaitForQuiescence || b.op == OperationType::WaitForQuiescence {
        return true;
    }
    let (Some(ta), Some(tb)) = (a.target_id, b.target_id) else {
        return false;
    };
    if ta != tb || a.target_type != b.target_type {
        return false;
    }
    matches!(
        (a.op, b.op),
        (OperationType::Send, OperationType::Send)
            | (OperationType::Receive, OperationType::Receive)
    ) || (a.op.is_lifecycle() && b.op.is_lifecycle())
}

/// Propagates sleeping schedulables from the decision point below the top
/// to the newly pushed top.
pub fn update_sleep_sets(stack: &mut ExplorationStack) -> Result<(), DporError> {
    let inherited: Vec<usize> = match stack.second_from_top() {
        None => return Ok(()),
        Some(prev) => {
            let executed = prev.selected_entry()?;
            prev.entries()
                .iter()
                .enumerate()
                .filter(|(_, e)| e.sleep && !is_dependent(e, executed))
                .map(|(i, _)| i)
                .collect()
        }
    };
    let top = stack.top_mut()?;
    let step = top.step();
    for i in inherited {
        if let Some(e) = top.entries.get_mut(i) {
            trace!("{} stays asleep at step {}", e.id, step);
            e.sleep = true;
        }
    }
    Ok(())
}
