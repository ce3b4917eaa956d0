//! The depth-first exploration stack.

use log::trace;

use crate::choice_set::{BacktrackChoice, StepChoiceSet};
use crate::error::DporError;
use crate::event::StepIndex;
use crate::schedulable::Schedulable;
use crate::thread::ThreadId;

/// The decision points of the current schedule, bottom first.
///
/// Levels are only added or removed at the top. During an iteration,
/// `next_pos` counts the levels visited so far: while it is below the
/// number of stored levels the iteration is replaying a recorded prefix,
/// and every observed decision point must match the recorded one.
#[derive(Debug, Default)]
pub struct ExplorationStack {
    levels: Vec<StepChoiceSet>,
    next_pos: usize,
    randomized: bool,
}

impl ExplorationStack {
    pub fn new(randomized: bool) -> Self {
        Self {
            levels: Vec::new(),
            next_pos: 0,
            randomized,
        }
    }

    /// Visits the next decision point. Returns true if it was newly added,
    /// false if it replayed a recorded level.
    pub fn push(&mut self, schedulables: &[Schedulable]) -> Result<bool, DporError> {
        let step = StepIndex::from_position(self.next_pos);
        let observed = StepChoiceSet::capture(step, schedulables)?;
        let added = if self.next_pos == self.levels.len() {
            trace!("push {}", observed);
            self.levels.push(observed);
            true
        } else {
            let recorded = &self.levels[self.next_pos];
            if let Some((recorded, observed)) = recorded.replay_mismatch(&observed) {
                return Err(DporError::ReplayDivergence {
                    step,
                    recorded,
                    observed,
                });
            }
            trace!("replay {}", recorded);
            false
        };
        self.next_pos += 1;
        Ok(added)
    }

    /// The decision point currently being made.
    pub fn top(&self) -> Result<&StepChoiceSet, DporError> {
        self.next_pos
            .checked_sub(1)
            .and_then(|p| self.levels.get(p))
            .ok_or(DporError::EmptyStack)
    }

    pub fn top_mut(&mut self) -> Result<&mut StepChoiceSet, DporError> {
        self.next_pos
            .checked_sub(1)
            .and_then(|p| self.levels.get_mut(p))
            .ok_or(DporError::EmptyStack)
    }

    /// The decision point below the current one, if any.
    pub fn second_from_top(&self) -> Option<&StepChoiceSet> {
        self.next_pos.checked_sub(2).and_then(|p| self.levels.get(p))
    }

    /// The highest stored level, regardless of the replay cursor.
    pub fn real_top(&self) -> Option<&StepChoiceSet> {
        self.levels.last()
    }

    pub fn level(&self, step: StepIndex) -> Result<&StepChoiceSet, DporError> {
        self.levels
            .get(step.position())
            .ok_or(DporError::StepOutOfRange(step))
    }

    pub(crate) fn level_mut(&mut self, step: StepIndex) -> Result<&mut StepChoiceSet, DporError> {
        self.levels
            .get_mut(step.position())
            .ok_or(DporError::StepOutOfRange(step))
    }

    pub fn levels(&self) -> &[StepChoiceSet] {
        &self.levels
    }

    /// Number of decision points visited in the current iteration.
    pub fn num_steps(&self) -> usize {
        self.next_pos
    }

    /// Number of stored decision points.
    pub fn internal_size(&self) -> usize {
        self.levels.len()
    }

    pub fn is_randomized(&self) -> bool {
        self.randomized
    }

    /// The selection at the top if it was already made (replay), otherwise
    /// the first schedulable marked for backtracking that is not asleep,
    /// scanning round-robin from `start`.
    pub fn selected_or_first_backtrack_not_slept(
        &self,
        start: ThreadId,
    ) -> Result<BacktrackChoice, DporError> {
        let top = self.top()?;
        if let Some(tid) = top.try_selected() {
            return Ok(BacktrackChoice::Found(tid));
        }
        Ok(top.first_backtrack_not_slept(start))
    }

    /// Rewinds the stack so that the next iteration replays a prefix and then
    /// explores an unexplored alternative.
    ///
    /// In random mode the stack has already been cut back to the race being
    /// reversed, so only the cursor is rewound.
    pub fn prepare_for_next_schedule(&mut self) -> Result<(), DporError> {
        if !self.randomized {
            if self
                .levels
                .last()
                .is_some_and(|top| top.try_selected().is_none())
            {
                self.levels.pop();
            }
            while let Some(top) = self.levels.last_mut() {
                if top.backtrack_nondet_choices()? {
                    break;
                }
                top.set_selected_to_sleep()?;
                top.clear_selected();
                if !top.all_done_or_slept() {
                    break;
                }
                self.levels.pop();
            }
        }
        self.next_pos = 0;
        Ok(())
    }

    /// Drops every level above the cursor.
    pub fn clear_above_top(&mut self) {
        self.levels.truncate(self.next_pos);
    }

    pub(crate) fn truncate(&mut self, len: usize) {
        self.levels.truncate(len);
        self.next_pos = self.next_pos.min(len);
    }

    pub fn clear(&mut self) {
        self.levels.clear();
        self.next_pos = 0;
    }
}
