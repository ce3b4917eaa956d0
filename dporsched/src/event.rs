//! Steps of an explored schedule
use crate::thread::ThreadId;
use serde::{Deserialize, Serialize};

/// The 1-based index of a step (decision point) in a schedule.
///
/// Step indices start at 1. Wherever the absence of a step matters
/// (a thread with no prior operation, a target never accessed) the
/// code uses `Option<StepIndex>` instead of reserving 0.
#[derive(PartialEq, Copy, Clone, Debug, Hash, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StepIndex(u32);

impl StepIndex {
    pub fn new(index: u32) -> Option<Self> {
        (index > 0).then_some(Self(index))
    }

    pub(crate) fn first() -> Self {
        Self(1)
    }

    /// The step stored at 0-based `position` of the exploration stack.
    pub(crate) fn from_position(position: usize) -> Self {
        Self(position as u32 + 1)
    }

    /// The 0-based position of this step in the exploration stack.
    pub(crate) fn position(self) -> usize {
        self.0 as usize - 1
    }

    pub fn get(self) -> u32 {
        self.0
    }

    pub(crate) fn next(self) -> Self {
        Self(self.0 + 1)
    }

    /// Steps from `self` (inclusive) to `end` (exclusive).
    pub(crate) fn until(self, end: StepIndex) -> impl Iterator<Item = StepIndex> {
        (self.0..end.0).map(StepIndex)
    }
}

impl std::fmt::Display for StepIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A step together with the thread that executed it.
#[derive(PartialEq, Copy, Clone, Debug, Hash, Eq, Serialize, Deserialize)]
pub struct Event {
    pub(crate) thread: ThreadId,
    pub(crate) index: StepIndex,
}

impl Event {
    pub(crate) fn new(t: ThreadId, i: StepIndex) -> Self {
        Self {
            thread: t,
            index: i,
        }
    }

    pub fn thread(&self) -> ThreadId {
        self.thread
    }

    pub fn index(&self) -> StepIndex {
        self.index
    }
}

impl std::fmt::Display for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.thread, self.index)
    }
}
