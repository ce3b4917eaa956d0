//! Dynamic partial-order reduction for systematic testing of message-passing
//! programs.
//!
//! A controlled runtime runs the program under test one visible operation at
//! a time and asks a [`SchedulingStrategy`] which schedulable goes next.
//! [`DporStrategy`] records every decision on an exploration stack; after
//! each iteration it finds the racing sends of the finished schedule and
//! backtracks only where reordering them can change the outcome.
//!
//! ```ignore
//! let stats = dporsched::verify(Config::builder().build(), |strategy| {
//!     let mut runtime = MyRuntime::new();
//!     runtime.run(strategy)
//! })?;
//! ```

mod choice_set;
mod dpor;
mod error;
mod event;
mod race;
mod schedulable;
mod sleep_set;
mod stack;
mod strategy;
mod telemetry;
pub mod thread;
mod vector_clock;

pub use choice_set::{BacktrackChoice, NondetChoice, NondetKind, StepChoiceSet};
pub use dpor::DporAnalysis;
pub use error::DporError;
pub use event::{Event, StepIndex};
pub use race::{Race, RaceReplayEntry};
pub use schedulable::{OperationType, Schedulable, TargetType, TidEntry};
pub use sleep_set::{is_dependent, update_sleep_sets};
pub use stack::ExplorationStack;
pub use strategy::{Decision, DporStrategy, SchedulingStrategy};
pub use thread::ThreadId;

use log::{debug, info};
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};

/// Exploration statistics.
#[derive(Default, Clone, Debug, PartialEq, Eq)]
pub struct Stats {
    /// Number of executions that ran to completion
    pub execs: usize,
    /// Number of executions that ended with nothing enabled
    pub block: usize,
    /// Number of executions cut short by the sleep set
    pub sleep_blocked: usize,
    /// Races found over all iterations
    pub races: usize,
    /// Number of executions stopped at the step limit
    pub step_limit: usize,
    pub iterations: u64,
}

/// How one execution of the program under test ended.
#[derive(PartialEq, Eq, Clone, Copy, Debug)]
pub enum EndCondition {
    AllFinished,
    Deadlock,
    SleepSetBlocked,
    StepLimit,
}

#[derive(PartialEq, Eq, Clone, Copy, Debug, Serialize, Deserialize)]
pub enum ExplorationMode {
    /// Depth-first: backtrack points are added for every race, and the
    /// exploration ends when none is left.
    Dfs,
    /// Random walk: each iteration reverses one randomly chosen race of the
    /// previous one. Never ends on its own.
    Random,
}

/// Scheduler configuration options.
///
/// Use the [`ConfigBuilder`] class to construct a `Config` struct.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    pub(crate) mode: ExplorationMode,
    pub(crate) seed: u64,
    pub(crate) sleep_sets: bool,
    pub(crate) dpor: bool,
    pub(crate) step_limit: Option<usize>,
    pub(crate) race_reversal_limit: Option<usize>,
    pub(crate) max_iterations: Option<u64>,
    pub(crate) progress_report: usize,
}

impl Config {
    /// Returns a builder with the default options.
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }

    pub fn mode(&self) -> ExplorationMode {
        self.mode
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }
}

impl Default for Config {
    fn default() -> Self {
        ConfigBuilder::new().build()
    }
}

/// Builds a [`Config`] struct.
pub struct ConfigBuilder(Config);

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigBuilder {
    pub fn new() -> Self {
        ConfigBuilder(Config {
            mode: ExplorationMode::Dfs,
            seed: OsRng.next_u64(),
            sleep_sets: true,
            dpor: true,
            step_limit: None,
            race_reversal_limit: None,
            max_iterations: None,
            progress_report: 0,
        })
    }

    pub fn with_mode(mut self, mode: ExplorationMode) -> Self {
        self.0.mode = mode;
        self
    }

    /// Seeds the random number generator used in random mode.
    pub fn with_seed(mut self, s: u64) -> Self {
        self.0.seed = s;
        self
    }

    /// Enables sleep-set reduction. Ignored in random mode.
    pub fn with_sleep_sets(mut self, b: bool) -> Self {
        self.0.sleep_sets = b;
        self
    }

    /// Without DPOR every enabled schedulable is explored at every step.
    pub fn with_dpor(mut self, b: bool) -> Self {
        self.0.dpor = b;
        self
    }

    /// Scheduling steps after which an execution is reported as too long.
    pub fn with_step_limit(mut self, n: usize) -> Self {
        self.0.step_limit = Some(n);
        self
    }

    /// In random mode, start a fresh execution after `n` consecutive race
    /// reversals.
    pub fn with_race_reversal_limit(mut self, n: usize) -> Self {
        self.0.race_reversal_limit = Some(n);
        self
    }

    /// Stops [`verify`] after `n` iterations. Random mode needs this to end.
    pub fn with_max_iterations(mut self, n: u64) -> Self {
        self.0.max_iterations = Some(n);
        self
    }

    /// Logs a progress report message after every `n` executions.
    ///
    /// Note that if you do not specify this option, you will get an adaptive
    /// progress report after 1, 2, 3, ..., 10, 20, 30, ... 100, 200, 300, etc.
    pub fn with_progress_report(mut self, n: usize) -> Self {
        self.0.progress_report = n;
        self
    }

    /// Consumes the builder and produces the [`Config`]
    pub fn build(self) -> Config {
        self.0
    }
}

fn should_report(n: u64) -> bool {
    if n == 0 {
        return false;
    }
    let mut p = n;
    while p % 10 == 0 {
        p /= 10;
    }
    // Only one digit left once the trailing zeros are gone
    p < 10
}

/// Explores the executions of a program under the options in `conf`.
///
/// `run_once` performs one execution, asking `strategy` for every
/// scheduling decision and nondeterministic choice, and reports how it
/// ended. Exploration stops when the strategy runs out of schedules or
/// after the configured number of iterations.
pub fn verify<F>(conf: Config, mut run_once: F) -> Result<Stats, DporError>
where
    F: FnMut(&mut DporStrategy) -> Result<EndCondition, DporError>,
{
    let mut strategy = DporStrategy::new(&conf);
    info!("{} exploration with seed {}", strategy.description(), conf.seed);
    if let Ok(json) = serde_json::to_string(&conf) {
        debug!("config: {}", json);
    }

    loop {
        let end = run_once(&mut strategy)?;
        let key = match end {
            EndCondition::AllFinished => telemetry::COMPLETE,
            EndCondition::Deadlock => telemetry::BLOCKED,
            EndCondition::SleepSetBlocked => telemetry::SLEEP_SET_BLOCKED,
            EndCondition::StepLimit => telemetry::STEP_LIMIT,
        };
        strategy.telemetry().counter(key);

        let more = strategy.prepare_for_next_iteration()?;
        let n = strategy.iterations();
        let report = if conf.progress_report > 0 {
            n % conf.progress_report as u64 == 0
        } else {
            should_report(n)
        };
        if report {
            let stats = strategy.stats();
            info!(
                "{} iterations: {} complete, {} blocked, {} sleep-set blocked, {} step-limited",
                n, stats.execs, stats.block, stats.sleep_blocked, stats.step_limit
            );
        }
        if !more {
            break;
        }
        if conf.max_iterations.is_some_and(|max| n >= max) {
            info!("Stopping exploration because max_iterations was reached.");
            break;
        }
    }

    strategy.telemetry().print();
    Ok(strategy.stats())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_report_points() {
        let reported: Vec<u64> = (0..=300).filter(|&n| should_report(n)).collect();
        assert_eq!(&reported[..12], &[1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 20, 30]);
        assert!(reported.contains(&100));
        assert!(!reported.contains(&110));
        assert!(reported.contains(&300));
    }

    #[test]
    fn config_roundtrips_through_json() {
        let conf = Config::builder()
            .with_mode(ExplorationMode::Random)
            .with_seed(42)
            .with_step_limit(100)
            .build();
        let json = serde_json::to_string(&conf).unwrap();
        let back: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(back.mode(), ExplorationMode::Random);
        assert_eq!(back.seed(), 42);
        assert_eq!(back.step_limit, Some(100));
        assert!(back.sleep_sets);
    }

    #[test]
    fn verify_stops_at_max_iterations() {
        let conf = Config::builder()
            .with_mode(ExplorationMode::Random)
            .with_seed(5)
            .with_max_iterations(7)
            .build();
        let stats = verify(conf, |s| {
            let choices = [Schedulable::new(thread::main_thread_id(), true, OperationType::Yield)];
            s.next(&choices, thread::main_thread_id())?;
            Ok(EndCondition::AllFinished)
        })
        .unwrap();
        assert_eq!(stats.iterations, 7);
        assert_eq!(stats.execs, 7);
    }
}
