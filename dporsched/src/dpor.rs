//! Source-DPOR over a completed schedule.
//!
//! After an iteration ends, the analysis walks the stack once from the first
//! step to the last, computing a vector clock for every step:
//!
//! - a step inherits the clock of the previous step of its thread,
//! - lifecycle operations (create/start/stop/join) on a target are ordered
//!   after the previous lifecycle operation on it,
//! - sends to a target are ordered after the previous send to it,
//! - a receive is ordered after the send of the message it receives,
//! - waiting for quiescence is ordered after the last step of every thread.
//!
//! Whenever a step is ordered after an earlier step of another thread that
//! does not already happen-before it, and both are sends, the two steps race.
//! In depth-first mode each race adds one backtrack point at the earlier
//! step. In random mode every such race is recorded, and one of them is
//! picked to be reversed by the next iteration.

use std::collections::HashMap;

use log::{debug, info};
use rand::Rng;

use crate::choice_set::StepChoiceSet;
use crate::error::DporError;
use crate::event::{Event, StepIndex};
use crate::race::{Race, RaceReplayEntry};
use crate::schedulable::{OperationType, TidEntry};
use crate::stack::ExplorationStack;
use crate::thread::construct_thread_id;
use crate::vector_clock::VectorClockTable;

/// The state of one analysis.
///
/// Nothing survives from one analysis to the next except allocations:
/// `run` resets every table before walking the stack.
#[derive(Debug, Default)]
pub struct DporAnalysis {
    clocks: VectorClockTable,
    thread_last_op: Vec<Option<StepIndex>>,
    // Keyed by target id, which the runtime picks freely
    last_lifecycle_op: HashMap<u32, StepIndex>,
    last_send: HashMap<u32, StepIndex>,
    // Bounds the search for races in random mode
    first_send: HashMap<u32, StepIndex>,
    races: Vec<Race>,
    // Threads whose creation is dropped by a race reversal, sorted
    missing_thread_ids: Vec<u32>,
}

fn reversible(a: &TidEntry, b: &TidEntry) -> bool {
    a.op == OperationType::Send && b.op == OperationType::Send
}

impl DporAnalysis {
    pub fn new() -> Self {
        Self::default()
    }

    /// Races found by the last call to `run`.
    pub fn races(&self) -> &[Race] {
        &self.races
    }

    fn reset(&mut self, num_steps: usize, num_threads: usize) {
        self.clocks.reset(num_steps, num_threads);
        self.thread_last_op.clear();
        self.thread_last_op.resize(num_threads, None);
        self.last_lifecycle_op.clear();
        self.last_send.clear();
        self.first_send.clear();
        self.races.clear();
        self.missing_thread_ids.clear();
    }

    fn happens_before(&self, a: Event, b: StepIndex) -> bool {
        self.clocks.happens_before(a, b)
    }

    /// Analyzes the schedule held by `stack`.
    ///
    /// Without `rng`, marks backtrack points on the stack and returns an
    /// empty suffix. With `rng`, picks one recorded race, cuts the stack back
    /// to just before its earlier step and returns the schedule suffix that
    /// runs the later step first. If there is no race the stack is cleared.
    pub fn run<R: Rng>(
        &mut self,
        stack: &mut ExplorationStack,
        rng: Option<&mut R>,
    ) -> Result<Vec<RaceReplayEntry>, DporError> {
        // The last decision point has no selection when the iteration ended
        // because nothing could run.
        let num_steps = match stack.real_top() {
            Some(top) if top.try_selected().is_none() => stack.internal_size() - 1,
            _ => stack.internal_size(),
        };
        let num_threads = stack.levels().iter().map(StepChoiceSet::len).max().unwrap_or(0);
        self.reset(num_steps, num_threads);
        let randomized = rng.is_some();

        for i in StepIndex::first().until(StepIndex::from_position(num_steps)) {
            let level = stack.level(i)?;
            let step = *level.selected_entry()?;
            match self.thread_last_op[usize::from(step.id)] {
                Some(prev) => self.clocks.copy(prev, i),
                None => self.clocks.clear(i),
            }
            self.clocks.set(i, Event::new(step.id, i));
            self.thread_last_op[usize::from(step.id)] = Some(i);

            if step.op == OperationType::WaitForQuiescence {
                for (t, last) in self.thread_last_op.iter().enumerate() {
                    if let Some(last) = last {
                        if t != usize::from(step.id) {
                            self.clocks.join(i, *last);
                        }
                    }
                }
                continue;
            }

            // The thread created by a create is the one that appears next.
            let target = if step.op == OperationType::Create && i.get() < stack.internal_size() as u32 {
                Some(level.len() as u32)
            } else {
                step.target_id
            };
            let Some(target) = target else {
                continue;
            };
            let last_access = match step.op {
                OperationType::Start
                | OperationType::Stop
                | OperationType::Create
                | OperationType::Join => self.last_lifecycle_op.insert(target, i),
                OperationType::Send => {
                    self.first_send.entry(target).or_insert(i);
                    self.last_send.insert(target, i)
                }
                OperationType::Receive => step.send_step,
                OperationType::Yield | OperationType::WaitForQuiescence => None,
            };

            if let Some(a) = last_access {
                if a >= i {
                    return Err(DporError::StepOutOfRange(a));
                }
                self.add_backtrack(stack, randomized, a, i, &step)?;
                // Random mode keeps sends unordered so that a send can race
                // with every earlier concurrent send to the same target.
                if !(randomized && step.op == OperationType::Send) {
                    self.clocks.join(i, a);
                }
            }
        }

        match rng {
            Some(rng) => self.reverse_random_race(stack, rng),
            None => Ok(Vec::new()),
        }
    }

    fn add_backtrack(
        &mut self,
        stack: &mut ExplorationStack,
        randomized: bool,
        a_index: StepIndex,
        b_index: StepIndex,
        b: &TidEntry,
    ) -> Result<(), DporError> {
        let a = *stack.level(a_index)?.selected_entry()?;
        if self.happens_before(Event::new(a.id, a_index), b_index) || !reversible(&a, b) {
            return Ok(());
        }

        if randomized {
            return self.add_all_races(stack, a_index, b_index, b);
        }

        let race = Race::new(a_index, b_index);
        debug!("race {} between {} and {}", race, a.id, b.id);
        self.races.push(race);

        let candidates = self.candidates(stack, &a, a_index, b_index, b)?;
        if !candidates.iter().any(|&c| c) {
            return Err(DporError::NoCandidates {
                a: a_index,
                b: b_index,
            });
        }

        let level = stack.level_mut(a_index)?;
        let is_candidate = |e: &TidEntry| candidates.get(usize::from(e.id)).copied().unwrap_or(false);
        if level.entries.iter().any(|e| is_candidate(e) && e.backtrack) {
            return Ok(());
        }

        // Prefer waking a sleeping candidate, then an enabled one (a disabled
        // yield is only a candidate because of the yield hack), then anything.
        let n = self.clocks.num_threads();
        let preferences: [&dyn Fn(&TidEntry) -> bool; 3] = [
            &|e: &TidEntry| e.sleep,
            &|e: &TidEntry| e.enabled,
            &|_: &TidEntry| true,
        ];
        for prefer in preferences {
            for k in 0..n {
                let t = b.id.rotate(k, n);
                if let Some(e) = level.entries.get_mut(t) {
                    if is_candidate(e) && prefer(e) {
                        debug!("backtrack point {} added at step {}", e.id, a_index);
                        e.backtrack = true;
                        return Ok(());
                    }
                }
            }
        }
        Err(DporError::BacktrackNotAdded(a_index))
    }

    /// The threads that could run first at `a_index` to reverse the race
    /// with `b`: `b`'s thread if it was runnable there, and every thread
    /// runnable there whose first step after `a_index` does not
    /// happen-after the race's first step or another candidate.
    fn candidates(
        &self,
        stack: &ExplorationStack,
        a: &TidEntry,
        a_index: StepIndex,
        b_index: StepIndex,
        b: &TidEntry,
    ) -> Result<Vec<bool>, DporError> {
        let n = self.clocks.num_threads();
        let a_level = stack.level(a_index)?;
        let mut candidates = vec![false; n];
        if a_level.entry(b.id).is_ok_and(TidEntry::runnable) {
            candidates[usize::from(b.id)] = true;
        }

        let mut looking_for = vec![false; n];
        for e in a_level.entries() {
            looking_for[usize::from(e.id)] = e.id != a.id && e.id != b.id && e.runnable();
        }
        let mut remaining = looking_for.iter().filter(|&&l| l).count();

        // The latest considered step of each thread
        let mut seen: Vec<Option<StepIndex>> = vec![None; n];
        seen[usize::from(a.id)] = Some(a_index);

        for k in a_index.next().until(b_index) {
            if remaining == 0 {
                break;
            }
            let kid = usize::from(stack.level(k)?.selected()?);
            if !looking_for[kid] {
                continue;
            }
            looking_for[kid] = false;
            remaining -= 1;
            let happens_after_another = seen.iter().enumerate().any(|(t, &s)| {
                s.is_some_and(|s| self.happens_before(Event::new(construct_thread_id(t as u32), s), k))
            });
            seen[kid] = Some(k);
            if !happens_after_another {
                candidates[kid] = true;
            }
        }
        Ok(candidates)
    }

    /// Records a race between `b` and every earlier concurrent send of
    /// another thread to the same target.
    fn add_all_races(
        &mut self,
        stack: &ExplorationStack,
        a_index: StepIndex,
        b_index: StepIndex,
        b: &TidEntry,
    ) -> Result<(), DporError> {
        let first = b
            .target_id
            .and_then(|t| self.first_send.get(&t).copied())
            .unwrap_or(a_index);
        for j in first.until(b_index) {
            let e = stack.level(j)?.selected_entry()?;
            if e.op != OperationType::Send
                || e.target_id != b.target_id
                || e.id == b.id
                || self.happens_before(Event::new(e.id, j), b_index)
            {
                continue;
            }
            let race = Race::new(j, b_index);
            debug!("race {} between {} and {}", race, e.id, b.id);
            self.races.push(race);
        }
        Ok(())
    }

    fn reverse_random_race<R: Rng>(
        &mut self,
        stack: &mut ExplorationStack,
        rng: &mut R,
    ) -> Result<Vec<RaceReplayEntry>, DporError> {
        if self.races.is_empty() {
            info!("no race to reverse, starting from scratch");
            stack.clear();
            return Ok(Vec::new());
        }
        let race = self.races[rng.gen_range(0..self.races.len())];
        let a_thread = stack.level(race.earlier)?.selected()?;
        info!("reversing race {} ({} of {})", race, a_thread, self.races.len());

        // Every step between the two that does not depend on the earlier
        // one is kept, in the same order.
        let mut suffix = Vec::new();
        for i in race.earlier.until(race.later) {
            let level = stack.level(i)?;
            if self.happens_before(Event::new(a_thread, race.earlier), i) {
                if level.selected_entry()?.op == OperationType::Create {
                    let missing = level.len() as u32;
                    match self.missing_thread_ids.binary_search(&missing) {
                        Ok(_) => return Err(DporError::DuplicateMissingThread(missing)),
                        Err(pos) => self.missing_thread_ids.insert(pos, missing),
                    }
                }
            } else {
                suffix.push(self.replay_entry(level)?);
            }
        }
        suffix.push(self.replay_entry(stack.level(race.later)?)?);
        suffix.push(self.replay_entry(stack.level(race.earlier)?)?);

        stack.truncate(race.earlier.position());
        Ok(suffix)
    }

    /// The selected thread at `level`, renumbered for the threads that will
    /// not be created in the replay.
    fn replay_entry(&self, level: &StepChoiceSet) -> Result<RaceReplayEntry, DporError> {
        let tid = level.selected()?.to_number();
        let shift = self.missing_thread_ids.partition_point(|&m| m <= tid) as u32;
        Ok(RaceReplayEntry {
            thread: construct_thread_id(tid - shift),
            nondet_choices: level.nondet_choices().to_vec(),
        })
    }

    #[cfg(test)]
    pub(crate) fn clock(&self, step: StepIndex) -> Vec<u32> {
        self.clocks.clock(step)
    }
}
