//! What the runtime tells the scheduler about each schedulable at a step.

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::event::StepIndex;
use crate::thread::ThreadId;

/// The next visible operation of a schedulable.
#[derive(PartialEq, Eq, Clone, Copy, Debug, Hash, Serialize, Deserialize)]
pub enum OperationType {
    Start,
    Stop,
    Create,
    Join,
    Send,
    Receive,
    WaitForQuiescence,
    Yield,
}

impl OperationType {
    /// Operations ordered through the lifecycle of their target
    /// (the last create/start/stop/join on it).
    pub(crate) fn is_lifecycle(self) -> bool {
        matches!(
            self,
            OperationType::Start | OperationType::Stop | OperationType::Create | OperationType::Join
        )
    }
}

/// The kind of object an operation acts on.
#[derive(PartialEq, Eq, Clone, Copy, Debug, Hash, Serialize, Deserialize)]
pub enum TargetType {
    Thread,
    Inbox,
    Mutex,
    Variable,
}

/// A snapshot of one schedulable, read by the scheduler at every step.
///
/// The position of a schedulable in the list passed to the scheduler must
/// equal its id.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schedulable {
    pub id: ThreadId,
    pub enabled: bool,
    pub op: OperationType,
    pub target_type: TargetType,
    /// `None` when the operation has no target yet, e.g. a create whose
    /// thread does not exist.
    pub target_id: Option<u32>,
    /// For a receive: the step of the send that produced the message.
    pub send_step: Option<StepIndex>,
}

impl Schedulable {
    pub fn new(id: ThreadId, enabled: bool, op: OperationType) -> Self {
        Self {
            id,
            enabled,
            op,
            target_type: TargetType::Thread,
            target_id: None,
            send_step: None,
        }
    }

    pub fn with_target(mut self, target_type: TargetType, target_id: u32) -> Self {
        self.target_type = target_type;
        self.target_id = Some(target_id);
        self
    }

    pub fn with_send_step(mut self, step: StepIndex) -> Self {
        self.send_step = Some(step);
        self
    }
}

/// A schedulable as captured at one decision point, plus the exploration
/// bookkeeping for that point.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct TidEntry {
    pub(crate) id: ThreadId,
    pub(crate) enabled: bool,
    /// Excluded from exploration at this point
    pub(crate) sleep: bool,
    /// Must be explored at this point by some iteration
    pub(crate) backtrack: bool,
    pub(crate) op: OperationType,
    pub(crate) target_type: TargetType,
    pub(crate) target_id: Option<u32>,
    pub(crate) send_step: Option<StepIndex>,
}

impl TidEntry {
    pub(crate) fn capture(s: &Schedulable) -> Self {
        Self {
            id: s.id,
            enabled: s.enabled,
            sleep: false,
            backtrack: false,
            op: s.op,
            target_type: s.target_type,
            target_id: s.target_id,
            send_step: s.send_step,
        }
    }

    pub fn id(&self) -> ThreadId {
        self.id
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn sleep(&self) -> bool {
        self.sleep
    }

    pub fn backtrack(&self) -> bool {
        self.backtrack
    }

    pub fn op(&self) -> OperationType {
        self.op
    }

    pub fn target_type(&self) -> TargetType {
        self.target_type
    }

    pub fn target_id(&self) -> Option<u32> {
        self.target_id
    }

    pub fn send_step(&self) -> Option<StepIndex> {
        self.send_step
    }

    /// Enabled, or yielding (yields get enabled when nothing else can run).
    pub(crate) fn runnable(&self) -> bool {
        self.enabled || self.op == OperationType::Yield
    }

    /// Whether `other` is the same executional fact as `self`.
    ///
    /// Sleep and backtrack flags are not compared. Neither is the enabled
    /// flag of a yield, which depends on what else was runnable.
    pub(crate) fn matches_replay(&self, other: &TidEntry) -> bool {
        self.id == other.id
            && self.op == other.op
            && self.target_type == other.target_type
            && self.target_id == other.target_id
            && self.send_step == other.send_step
            && (self.op == OperationType::Yield || self.enabled == other.enabled)
    }
}

impl Display for TidEntry {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {:?}, {:?}-", self.id, self.op, self.target_type)?;
        match self.target_id {
            Some(t) => write!(f, "{}", t)?,
            None => f.write_str("_")?,
        }
        if let Some(s) = self.send_step {
            write!(f, ", send@{}", s)?;
        }
        if !self.enabled {
            f.write_str(", disabled")?;
        }
        f.write_str(")")
    }
}
