//! The record of a single decision point.

use std::fmt::{Display, Formatter};

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::DporError;
use crate::event::StepIndex;
use crate::schedulable::{Schedulable, TidEntry};
use crate::thread::{construct_thread_id, ThreadId};

#[derive(PartialEq, Eq, Clone, Copy, Debug, Serialize, Deserialize)]
pub enum NondetKind {
    Bool,
    Int,
}

/// A nondeterministic value drawn by the selected schedulable while it ran
/// its operation at this decision point.
#[derive(PartialEq, Eq, Clone, Copy, Debug, Serialize, Deserialize)]
pub struct NondetChoice {
    pub kind: NondetKind,
    pub value: u32,
}

/// Result of looking for the next schedulable to explore at a decision point.
#[derive(PartialEq, Eq, Clone, Copy, Debug)]
pub enum BacktrackChoice {
    Found(ThreadId),
    /// Nothing left to explore, and at least one schedulable is asleep:
    /// the point was pruned by the sleep set rather than exhausted.
    SleepSetBlocked,
    None,
}

/// All schedulables observed at one step, which one was selected, and the
/// nondeterministic choices made by the selected one.
///
/// Entry `i` describes the schedulable with id `i`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StepChoiceSet {
    step: StepIndex,
    pub(crate) entries: Vec<TidEntry>,
    selected: Option<ThreadId>,
    nondet: Vec<NondetChoice>,
    // Position of the next choice to replay in `nondet`
    next_nondet: usize,
}

impl StepChoiceSet {
    pub(crate) fn capture(step: StepIndex, schedulables: &[Schedulable]) -> Result<Self, DporError> {
        let entries = schedulables
            .iter()
            .enumerate()
            .map(|(position, s)| {
                if usize::from(s.id) != position {
                    return Err(DporError::NonDenseIds {
                        position,
                        found: s.id,
                    });
                }
                Ok(TidEntry::capture(s))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            step,
            entries,
            selected: None,
            nondet: Vec::new(),
            next_nondet: 0,
        })
    }

    pub fn step(&self) -> StepIndex {
        self.step
    }

    pub fn entries(&self) -> &[TidEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entry(&self, tid: ThreadId) -> Result<&TidEntry, DporError> {
        self.entries
            .get(usize::from(tid))
            .ok_or(DporError::InvalidThread(tid))
    }

    pub(crate) fn entry_mut(&mut self, tid: ThreadId) -> Result<&mut TidEntry, DporError> {
        self.entries
            .get_mut(usize::from(tid))
            .ok_or(DporError::InvalidThread(tid))
    }

    /// Finds the first entry that differs from `other` for replay purposes.
    pub(crate) fn replay_mismatch(&self, other: &StepChoiceSet) -> Option<(String, String)> {
        if self.entries.len() != other.entries.len() {
            return Some((
                format!("{} schedulables", self.entries.len()),
                format!("{} schedulables", other.entries.len()),
            ));
        }
        self.entries
            .iter()
            .zip(other.entries.iter())
            .find(|(a, b)| !a.matches_replay(b))
            .map(|(a, b)| (a.to_string(), b.to_string()))
    }

    /// Selection is assigned once per decision point.
    pub fn set_selected(&mut self, tid: ThreadId) -> Result<(), DporError> {
        if let Some(prev) = self.selected {
            return Err(DporError::AlreadySelected(prev));
        }
        self.entry(tid)?;
        self.selected = Some(tid);
        Ok(())
    }

    pub fn selected(&self) -> Result<ThreadId, DporError> {
        self.selected.ok_or(DporError::NoSelection(self.step))
    }

    pub fn try_selected(&self) -> Option<ThreadId> {
        self.selected
    }

    pub fn selected_entry(&self) -> Result<&TidEntry, DporError> {
        self.entry(self.selected()?)
    }

    pub(crate) fn clear_selected(&mut self) {
        self.selected = None;
    }

    pub(crate) fn set_selected_to_sleep(&mut self) -> Result<(), DporError> {
        let tid = self.selected()?;
        self.entry_mut(tid)?.sleep = true;
        Ok(())
    }

    fn rotation(&self, start: ThreadId) -> impl Iterator<Item = usize> + '_ {
        let len = self.entries.len();
        (0..len).map(move |k| start.rotate(k, len))
    }

    /// Scans round-robin from `start` for an entry that is marked for
    /// backtracking and is not asleep.
    pub fn first_backtrack_not_slept(&self, start: ThreadId) -> BacktrackChoice {
        let mut found_slept = false;
        for i in self.rotation(start) {
            let e = &self.entries[i];
            if e.backtrack && !e.sleep {
                return BacktrackChoice::Found(e.id);
            }
            found_slept |= e.sleep;
        }
        if found_slept {
            BacktrackChoice::SleepSetBlocked
        } else {
            BacktrackChoice::None
        }
    }

    pub fn all_done_or_slept(&self) -> bool {
        !matches!(
            self.first_backtrack_not_slept(construct_thread_id(0)),
            BacktrackChoice::Found(_)
        )
    }

    pub(crate) fn add_first_enabled_not_slept_to_backtrack(&mut self, start: ThreadId) {
        let len = self.entries.len();
        if let Some(i) = (0..len)
            .map(|k| start.rotate(k, len))
            .find(|&i| self.entries[i].enabled && !self.entries[i].sleep)
        {
            self.entries[i].backtrack = true;
        }
    }

    pub(crate) fn add_to_backtrack(&mut self, tid: ThreadId) -> Result<(), DporError> {
        let e = self.entry_mut(tid)?;
        if !e.enabled {
            return Err(DporError::NotEnabled(tid));
        }
        e.backtrack = true;
        Ok(())
    }

    pub(crate) fn add_random_enabled_not_slept_to_backtrack<R: Rng>(&mut self, rng: &mut R) {
        let candidates: Vec<usize> = (0..self.entries.len())
            .filter(|&i| self.entries[i].enabled && !self.entries[i].sleep)
            .collect();
        if !candidates.is_empty() {
            let i = candidates[rng.gen_range(0..candidates.len())];
            self.entries[i].backtrack = true;
        }
    }

    pub(crate) fn set_all_enabled_to_be_backtracked(&mut self) {
        for e in self.entries.iter_mut().filter(|e| e.enabled) {
            e.backtrack = true;
        }
    }

    pub fn nondet_choices(&self) -> &[NondetChoice] {
        &self.nondet
    }

    /// Replays the next recorded choice, or draws and records a new one.
    ///
    /// Without an `rng` (depth-first exploration) new boolean choices start
    /// at `false` and are flipped later by `backtrack_nondet_choices`.
    /// Integer values are drawn from `0..max`.
    pub(crate) fn make_or_replay_nondet_choice<R: Rng>(
        &mut self,
        kind: NondetKind,
        rng: Option<&mut R>,
        max: u32,
    ) -> Result<u32, DporError> {
        if rng.is_none() && kind == NondetKind::Int {
            return Err(DporError::UnsupportedIntegerChoice);
        }
        if let Some(choice) = self.nondet.get(self.next_nondet) {
            if choice.kind != kind {
                return Err(DporError::NondetMismatch {
                    index: self.next_nondet,
                });
            }
            self.next_nondet += 1;
            return Ok(choice.value);
        }
        let value = match (rng, kind) {
            (None, _) => 0,
            (Some(rng), NondetKind::Bool) => rng.gen_range(0..2),
            (Some(_), NondetKind::Int) if max == 0 => 0,
            (Some(rng), NondetKind::Int) => rng.gen_range(0..max),
        };
        self.record_nondet_choice(kind, value);
        Ok(value)
    }

    pub(crate) fn record_nondet_choice(&mut self, kind: NondetKind, value: u32) {
        debug_assert_eq!(self.next_nondet, self.nondet.len());
        self.nondet.push(NondetChoice { kind, value });
        self.next_nondet += 1;
    }

    /// Binary DFS step over the boolean choices of this point: pops trailing
    /// `true` choices and flips the last `false` one. Returns whether an
    /// unexplored combination remains. The cursor is rewound for replay.
    pub(crate) fn backtrack_nondet_choices(&mut self) -> Result<bool, DporError> {
        if self.next_nondet != self.nondet.len() {
            return Err(DporError::NondetCursor {
                cursor: self.next_nondet,
                recorded: self.nondet.len(),
            });
        }
        self.next_nondet = 0;
        while let Some(last) = self.nondet.last_mut() {
            if last.kind != NondetKind::Bool {
                return Err(DporError::UnsupportedIntegerChoice);
            }
            if last.value == 0 {
                last.value = 1;
                return Ok(true);
            }
            self.nondet.pop();
        }
        Ok(false)
    }

    pub(crate) fn rewind_nondet_choices(&mut self) {
        self.next_nondet = 0;
    }

    /// Drops the recorded choices that have not been replayed yet.
    pub(crate) fn clear_nondet_choices_from_next(&mut self) {
        self.nondet.truncate(self.next_nondet);
    }

    pub(crate) fn restore_nondet_choices(&mut self, choices: Vec<NondetChoice>) {
        self.nondet = choices;
        self.next_nondet = 0;
    }

    fn show_filtered(&self, f: &mut Formatter<'_>, keep: impl Fn(&TidEntry) -> bool) -> std::fmt::Result {
        f.write_str("[")?;
        for e in self.entries.iter().filter(|e| keep(*e)) {
            if Some(e.id) == self.selected {
                f.write_str("*")?;
            }
            write!(f, "{} ", e)?;
        }
        f.write_str("]")
    }
}

impl Display for StepChoiceSet {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: enabled ", self.step)?;
        self.show_filtered(f, |e| e.enabled)?;
        f.write_str(" selected ")?;
        match self.selected.and_then(|t| self.entries.get(usize::from(t))) {
            Some(e) => write!(f, "{}", e)?,
            None => f.write_str("-")?,
        }
        f.write_str(" backtrack ")?;
        self.show_filtered(f, |e| e.backtrack)?;
        if !self.nondet.is_empty() {
            let values: Vec<u32> = self.nondet.iter().map(|c| c.value).collect();
            write!(f, " nondet {:?}", values)?;
        }
        Ok(())
    }
}
