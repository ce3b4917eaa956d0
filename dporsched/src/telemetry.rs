//! Counters gathered while exploring, kept in one place rather than as
//! variables scattered through the scheduler.
//!
//! The design follows the `metrics` crate: callers register a counter by key
//! and increment it through a handle.

use log::info;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

pub type Key = String;

pub(crate) const ITERATIONS: &str = "iterations";
pub(crate) const COMPLETE: &str = "complete_executions";
pub(crate) const BLOCKED: &str = "blocked_executions";
pub(crate) const SLEEP_SET_BLOCKED: &str = "sleep_set_blocked";
pub(crate) const RACES: &str = "races";
pub(crate) const STEPS: &str = "scheduled_steps";
pub(crate) const FORCED: &str = "forced_choices";
pub(crate) const STEP_LIMIT: &str = "step_limit_reached";

/// A counter handler.
pub trait CounterFn {
    /// Increments the counter by the given amount.
    fn increment(&self, value: u64);

    /// Sets the counter to at least the given amount.
    fn absolute(&self, value: u64);
}

/// A counter.
#[derive(Clone)]
pub struct Counter {
    inner: Option<Arc<dyn CounterFn + Send + Sync>>,
}

impl Counter {
    pub fn from_arc<F: CounterFn + Send + Sync + 'static>(a: Arc<F>) -> Self {
        Self { inner: Some(a) }
    }

    pub fn increment(&self, value: u64) {
        if let Some(c) = &self.inner {
            c.increment(value)
        }
    }

    pub fn absolute(&self, value: u64) {
        if let Some(c) = &self.inner {
            c.absolute(value)
        }
    }
}

/// Something that can hand out counters.
pub trait Recorder {
    fn register_counter(&self, key: &Key) -> Counter;
}

struct Handle {
    key: Key,
    values: Arc<Mutex<HashMap<Key, u64>>>,
}

impl CounterFn for Handle {
    fn increment(&self, value: u64) {
        let mut hm = self.values.lock().expect("Cannot get lock");
        *hm.entry(self.key.clone()).or_insert(0) += value;
    }

    fn absolute(&self, value: u64) {
        let mut hm = self.values.lock().expect("Cannot get lock");
        let v = hm.entry(self.key.clone()).or_insert(0);
        *v = (*v).max(value);
    }
}

#[derive(Clone, Debug, Default)]
pub(crate) struct Telemetry {
    inner: Arc<Mutex<HashMap<Key, u64>>>,
}

impl Telemetry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read_counter(&self, k: &str) -> Option<u64> {
        let hm = self.inner.lock().expect("Cannot get lock");
        hm.get(k).copied()
    }

    pub fn increment_counter(&self, k: &str, v: u64) {
        self.register_counter(&k.to_owned()).increment(v);
    }

    pub fn counter(&self, k: &str) {
        self.increment_counter(k, 1u64);
    }

    pub fn absolute_counter(&self, k: &str, v: u64) {
        self.register_counter(&k.to_owned()).absolute(v);
    }

    pub fn clear(&self) {
        self.inner.lock().expect("Cannot get lock").clear();
    }

    pub(crate) fn print(&self) {
        let hm = self.inner.lock().expect("Could not get lock");
        let mut keys: Vec<&Key> = hm.keys().collect();
        keys.sort();
        for k in keys {
            info!("{}: {}", k, hm[k]);
        }
    }
}

impl Recorder for Telemetry {
    fn register_counter(&self, key: &Key) -> Counter {
        let handler = Handle {
            key: key.clone(),
            values: self.inner.clone(),
        };
        Counter::from_arc(Arc::new(handler))
    }
}
