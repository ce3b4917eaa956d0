//! Races found by the analysis, and how to replay a reversed one.

use serde::{Deserialize, Serialize};

use crate::choice_set::NondetChoice;
use crate::event::StepIndex;
use crate::thread::ThreadId;

/// Two steps of different threads that are dependent, reversible, and not
/// ordered by happens-before: `earlier` could have run after `later`.
#[derive(PartialEq, Eq, Clone, Copy, Debug, Serialize, Deserialize)]
pub struct Race {
    pub earlier: StepIndex,
    pub later: StepIndex,
}

impl Race {
    pub(crate) fn new(earlier: StepIndex, later: StepIndex) -> Self {
        debug_assert!(earlier < later);
        Self { earlier, later }
    }
}

impl std::fmt::Display for Race {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} <-> {}", self.earlier, self.later)
    }
}

/// One decision of the schedule suffix that reverses a race: the thread to
/// run, and the nondeterministic choices it made when it ran originally.
#[derive(PartialEq, Eq, Clone, Debug, Serialize, Deserialize)]
pub struct RaceReplayEntry {
    pub thread: ThreadId,
    pub nondet_choices: Vec<NondetChoice>,
}
