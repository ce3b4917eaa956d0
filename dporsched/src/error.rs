//! Errors raised by the scheduler.
//!
//! Every variant is either a broken internal invariant or a request the
//! scheduler cannot honour soundly. Reaching a deadlock, or having every
//! runnable schedulable excluded by a sleep set, is the normal end of an
//! iteration and is reported through [`crate::Decision`] instead.

use thiserror::Error;

use crate::event::StepIndex;
use crate::schedulable::TidEntry;
use crate::thread::ThreadId;

#[derive(Debug, Error)]
pub enum DporError {
    /// The program under test did not behave the same way when replayed
    /// with the same scheduling decisions.
    #[error("replay diverged at step {step}: recorded {recorded}, observed {observed}")]
    ReplayDivergence {
        step: StepIndex,
        recorded: String,
        observed: String,
    },

    #[error("no selected schedulable at step {0}")]
    NoSelection(StepIndex),

    #[error("a schedulable ({0}) was already selected at this step")]
    AlreadySelected(ThreadId),

    #[error("{0} is not a schedulable at this step")]
    InvalidThread(ThreadId),

    #[error("{0} is not enabled and cannot be added to the backtrack set")]
    NotEnabled(ThreadId),

    #[error("schedulable ids must be dense: found {found} at position {position}")]
    NonDenseIds { position: usize, found: ThreadId },

    #[error("the exploration stack is empty")]
    EmptyStack,

    #[error("step {0} is not on the exploration stack")]
    StepOutOfRange(StepIndex),

    #[error("no candidate backtrack points found for race between steps {a} and {b}")]
    NoCandidates { a: StepIndex, b: StepIndex },

    #[error("did not manage to add a backtrack point at step {0}")]
    BacktrackNotAdded(StepIndex),

    #[error("race replay expected {expected} to be runnable but it is {entry}")]
    RaceReplayNotRunnable { expected: ThreadId, entry: TidEntry },

    #[error("created thread {0} is already marked missing")]
    DuplicateMissingThread(u32),

    #[error("replayed nondeterministic choice kind mismatch at choice {index}")]
    NondetMismatch { index: usize },

    #[error("nondeterministic choice cursor is at {cursor} but {recorded} choices were recorded")]
    NondetCursor { cursor: usize, recorded: usize },

    #[error(
        "a DFS exploration of integer nondeterministic choices is not supported; use random mode"
    )]
    UnsupportedIntegerChoice,

    #[error("forced choices are only supported in random mode")]
    ForcedChoiceUnsupported,

    #[error("the scheduler refused to schedule the forced choice {0}")]
    ForcedChoiceRejected(ThreadId),
}
