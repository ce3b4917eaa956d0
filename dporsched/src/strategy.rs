//! The scheduling strategy the runtime talks to.
//!
//! At every visible operation the runtime hands the strategy a snapshot of
//! all schedulables and gets back the one to run. Between iterations it
//! calls [`SchedulingStrategy::prepare_for_next_iteration`], which runs the
//! race analysis over the finished schedule and sets up the replay prefix
//! of the next one.

use std::fmt::Debug;

use log::{debug, info, trace};
use rand::SeedableRng;
use rand_pcg::Pcg64Mcg;

use crate::choice_set::{BacktrackChoice, NondetKind};
use crate::dpor::DporAnalysis;
use crate::error::DporError;
use crate::race::RaceReplayEntry;
use crate::schedulable::{OperationType, Schedulable};
use crate::sleep_set::update_sleep_sets;
use crate::stack::ExplorationStack;
use crate::telemetry::{self, Telemetry};
use crate::thread::ThreadId;
use crate::{Config, ExplorationMode, Stats};

/// What the runtime should do at a step.
#[derive(PartialEq, Eq, Clone, Copy, Debug)]
pub enum Decision {
    Run(ThreadId),
    /// Nothing is enabled.
    Deadlock,
    /// Something is enabled but every enabled schedulable was pruned by
    /// the sleep set. Not a bug of the program under test.
    SleepSetBlocked,
}

impl Decision {
    pub fn thread(self) -> Option<ThreadId> {
        match self {
            Decision::Run(t) => Some(t),
            _ => None,
        }
    }
}

/// The contract between a controlled runtime and a scheduler.
pub trait SchedulingStrategy {
    /// Picks the schedulable to run next. `choices[i]` must describe the
    /// schedulable with id `i`; `current` is the one that ran last.
    fn next(&mut self, choices: &[Schedulable], current: ThreadId) -> Result<Decision, DporError>;

    /// Makes `next` the schedulable to run, overriding the schedule.
    fn force_next(
        &mut self,
        next: ThreadId,
        choices: &[Schedulable],
        current: ThreadId,
    ) -> Result<(), DporError>;

    fn next_boolean_choice(&mut self) -> Result<bool, DporError>;

    /// A value in `0..max_value`.
    fn next_integer_choice(&mut self, max_value: u32) -> Result<u32, DporError>;

    fn force_next_boolean_choice(&mut self, next: bool) -> Result<(), DporError>;

    fn force_next_integer_choice(&mut self, next: u32) -> Result<(), DporError>;

    /// Called after every iteration. Returns `false` when there is nothing
    /// left to explore.
    fn prepare_for_next_iteration(&mut self) -> Result<bool, DporError>;

    /// Forgets everything explored so far.
    fn reset(&mut self);

    fn description(&self) -> String;

    /// Number of scheduling decisions made in the current iteration.
    fn scheduled_steps(&self) -> usize;

    fn has_reached_max_scheduling_steps(&self) -> bool;

    fn is_fair(&self) -> bool;

    /// Hook for strategies that track mailbox order.
    fn on_send(&mut self, _source: ThreadId, _payload: &dyn Debug, _destination: ThreadId) {}

    /// Hook for strategies that track created schedulables.
    fn on_create(&mut self, _created: ThreadId) {}
}

/// Depth-first or random DPOR over an [`ExplorationStack`].
pub struct DporStrategy {
    stack: ExplorationStack,
    // None when DPOR is turned off: every enabled schedulable is explored
    analysis: Option<DporAnalysis>,
    // Some in random mode
    rng: Option<Pcg64Mcg>,
    use_sleep_sets: bool,
    step_limit: Option<usize>,
    race_reversal_limit: Option<usize>,
    race_reversals: usize,
    race_replay: Vec<RaceReplayEntry>,
    race_replay_pos: usize,
    iterations: u64,
    telemetry: Telemetry,
}

/// If nothing is enabled, enables the yields, or failing that the waits for
/// quiescence, so that the program has something to make progress with.
fn enable_yields_if_stuck(snapshot: &mut [Schedulable]) {
    if snapshot.iter().any(|s| s.enabled) {
        return;
    }
    let stuck_op = if snapshot.iter().any(|s| s.op == OperationType::Yield) {
        OperationType::Yield
    } else if snapshot.iter().any(|s| s.op == OperationType::WaitForQuiescence) {
        OperationType::WaitForQuiescence
    } else {
        return;
    };
    for s in snapshot.iter_mut().filter(|s| s.op == stuck_op) {
        s.enabled = true;
    }
}

impl DporStrategy {
    pub fn new(conf: &Config) -> Self {
        let randomized = conf.mode == ExplorationMode::Random;
        Self {
            stack: ExplorationStack::new(randomized),
            analysis: conf.dpor.then(DporAnalysis::new),
            rng: randomized.then(|| Pcg64Mcg::seed_from_u64(conf.seed)),
            use_sleep_sets: conf.sleep_sets && !randomized,
            step_limit: conf.step_limit,
            race_reversal_limit: conf.race_reversal_limit,
            race_reversals: 0,
            race_replay: Vec::new(),
            race_replay_pos: 0,
            iterations: 0,
            telemetry: Telemetry::new(),
        }
    }

    pub fn stack(&self) -> &ExplorationStack {
        &self.stack
    }

    pub fn iterations(&self) -> u64 {
        self.iterations
    }

    pub fn is_randomized(&self) -> bool {
        self.rng.is_some()
    }

    /// The race reversal suffix still to be replayed.
    pub fn pending_race_replay(&self) -> &[RaceReplayEntry] {
        &self.race_replay[self.race_replay_pos..]
    }

    pub fn stats(&self) -> Stats {
        let read = |k: &str| self.telemetry.read_counter(k).unwrap_or(0);
        Stats {
            execs: read(telemetry::COMPLETE) as usize,
            block: read(telemetry::BLOCKED) as usize,
            sleep_blocked: read(telemetry::SLEEP_SET_BLOCKED) as usize,
            races: read(telemetry::RACES) as usize,
            step_limit: read(telemetry::STEP_LIMIT) as usize,
            iterations: self.iterations,
        }
    }

    pub(crate) fn telemetry(&self) -> &Telemetry {
        &self.telemetry
    }

    fn next_helper(
        &mut self,
        forced: Option<ThreadId>,
        choices: &[Schedulable],
        current: ThreadId,
    ) -> Result<Decision, DporError> {
        let mut snapshot = choices.to_vec();
        enable_yields_if_stuck(&mut snapshot);

        if forced.is_some() {
            self.abandon_replay(false)?;
        }

        let added = self.stack.push(&snapshot)?;
        if added {
            if self.use_sleep_sets {
                update_sleep_sets(&mut self.stack)?;
            }
            let top = self.stack.top_mut()?;
            if self.analysis.is_none() {
                top.set_all_enabled_to_be_backtracked();
            } else if let Some(replay) = self.race_replay.get(self.race_replay_pos) {
                top.restore_nondet_choices(replay.nondet_choices.clone());
                let entry = top.entry_mut(replay.thread)?;
                if !entry.runnable() {
                    return Err(DporError::RaceReplayNotRunnable {
                        expected: replay.thread,
                        entry: *entry,
                    });
                }
                entry.backtrack = true;
                self.race_replay_pos += 1;
            } else if let Some(next) = forced {
                top.add_to_backtrack(next)?;
            } else if let Some(rng) = self.rng.as_mut() {
                top.add_random_enabled_not_slept_to_backtrack(rng);
            } else {
                top.add_first_enabled_not_slept_to_backtrack(current);
            }
        } else {
            self.stack.top_mut()?.rewind_nondet_choices();
        }

        let next = match self.stack.selected_or_first_backtrack_not_slept(current)? {
            BacktrackChoice::Found(t) => t,
            BacktrackChoice::SleepSetBlocked => {
                debug!("all enabled schedulables are asleep at step {}", self.stack.num_steps());
                return Ok(Decision::SleepSetBlocked);
            }
            BacktrackChoice::None => return Ok(Decision::Deadlock),
        };

        let top = self.stack.top_mut()?;
        if top.try_selected() != Some(next) {
            top.set_selected(next)?;
        }
        if !top.entry(next)?.runnable() {
            return Err(DporError::NotEnabled(next));
        }
        trace!("{}", top);
        Ok(Decision::Run(next))
    }

    /// Drops whatever was left to replay, so the current decision point is
    /// the last one on the stack. With `clear_nondet`, the choices of the
    /// current point that were not replayed yet are dropped too.
    fn abandon_replay(&mut self, clear_nondet: bool) -> Result<(), DporError> {
        if self.rng.is_none() {
            return Err(DporError::ForcedChoiceUnsupported);
        }
        if clear_nondet {
            self.stack.top_mut()?.clear_nondet_choices_from_next();
        }
        self.stack.clear_above_top();
        self.race_replay.clear();
        self.race_replay_pos = 0;
        Ok(())
    }

    fn force_nondet(&mut self, kind: NondetKind, value: u32) -> Result<(), DporError> {
        self.abandon_replay(true)?;
        self.stack.top_mut()?.record_nondet_choice(kind, value);
        self.telemetry.counter(telemetry::FORCED);
        Ok(())
    }
}

impl SchedulingStrategy for DporStrategy {
    fn next(&mut self, choices: &[Schedulable], current: ThreadId) -> Result<Decision, DporError> {
        self.next_helper(None, choices, current)
    }

    fn force_next(
        &mut self,
        next: ThreadId,
        choices: &[Schedulable],
        current: ThreadId,
    ) -> Result<(), DporError> {
        match self.next_helper(Some(next), choices, current)? {
            Decision::Run(t) if t == next => {
                self.telemetry.counter(telemetry::FORCED);
                Ok(())
            }
            _ => Err(DporError::ForcedChoiceRejected(next)),
        }
    }

    fn next_boolean_choice(&mut self) -> Result<bool, DporError> {
        let value = self
            .stack
            .top_mut()?
            .make_or_replay_nondet_choice(NondetKind::Bool, self.rng.as_mut(), 2)?;
        Ok(value == 1)
    }

    fn next_integer_choice(&mut self, max_value: u32) -> Result<u32, DporError> {
        self.stack
            .top_mut()?
            .make_or_replay_nondet_choice(NondetKind::Int, self.rng.as_mut(), max_value)
    }

    fn force_next_boolean_choice(&mut self, next: bool) -> Result<(), DporError> {
        self.force_nondet(NondetKind::Bool, next as u32)
    }

    fn force_next_integer_choice(&mut self, next: u32) -> Result<(), DporError> {
        self.force_nondet(NondetKind::Int, next)
    }

    fn prepare_for_next_iteration(&mut self) -> Result<bool, DporError> {
        self.iterations += 1;
        self.telemetry.counter(telemetry::ITERATIONS);
        self.telemetry
            .absolute_counter(telemetry::STEPS, self.stack.num_steps() as u64);

        if let Some(analysis) = self.analysis.as_mut() {
            self.race_replay = analysis.run(&mut self.stack, self.rng.as_mut())?;
            self.race_replay_pos = 0;
            self.telemetry
                .increment_counter(telemetry::RACES, analysis.races().len() as u64);
        } else if self.rng.is_some() {
            // Nothing to reverse: every iteration is a fresh random run.
            self.stack.clear();
        }

        self.stack.prepare_for_next_schedule()?;

        if self.rng.is_some() {
            if let Some(limit) = self.race_reversal_limit {
                self.race_reversals += 1;
                if self.race_reversals >= limit {
                    info!("{} race reversals done, starting from scratch", limit);
                    self.race_reversals = 0;
                    self.abandon_replay(false)?;
                }
            }
        }

        let more = self.rng.is_some() || self.stack.internal_size() != 0;
        if !more {
            info!("exploration complete after {} iterations", self.iterations);
        }
        Ok(more)
    }

    fn reset(&mut self) {
        self.stack.clear();
        self.race_replay.clear();
        self.race_replay_pos = 0;
        self.race_reversals = 0;
        self.iterations = 0;
        self.telemetry.clear();
    }

    fn description(&self) -> String {
        if self.rng.is_some() {
            "DPOR (random)".to_owned()
        } else {
            "DPOR".to_owned()
        }
    }

    fn scheduled_steps(&self) -> usize {
        self.stack.num_steps()
    }

    fn has_reached_max_scheduling_steps(&self) -> bool {
        self.step_limit
            .is_some_and(|limit| self.stack.num_steps() >= limit)
    }

    fn is_fair(&self) -> bool {
        false
    }
}
