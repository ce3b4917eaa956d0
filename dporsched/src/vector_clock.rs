use crate::event::{Event, StepIndex};

use serde::{Deserialize, Serialize};

// Initial estimates; both dimensions grow geometrically.
const INITIAL_THREADS: usize = 4;
const INITIAL_STEPS: usize = 1 << 8;

/// One vector clock per explored step, stored in a single flat buffer.
///
/// The clock of step `i` occupies `clocks[(i - 1) * num_threads ..][..num_threads]`.
/// An entry `clock(i)[t] = j` means that step `j` is the last step of thread
/// `t` that happens-before step `i`; `0` means there is no such step.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct VectorClockTable {
    clocks: Vec<u32>,
    num_threads: usize,
    num_steps: usize,
}

impl Default for VectorClockTable {
    fn default() -> Self {
        Self::new()
    }
}

impl VectorClockTable {
    pub(crate) fn new() -> Self {
        Self {
            clocks: vec![0; INITIAL_THREADS * INITIAL_STEPS],
            num_threads: INITIAL_THREADS,
            num_steps: 0,
        }
    }

    /// Prepares the table for an execution of `num_steps` steps over
    /// `num_threads` threads. The buffer is only reallocated when it is too
    /// small, and then to the next power-of-two multiple of its size.
    /// Clock contents are unspecified afterwards: each step's clock must be
    /// written with `copy` or `clear` before it is read.
    pub(crate) fn reset(&mut self, num_steps: usize, num_threads: usize) {
        self.num_threads = num_threads;
        self.num_steps = num_steps;
        let needed = num_threads * num_steps;
        let mut capacity = self.clocks.len().max(1);
        while capacity < needed {
            capacity <<= 1;
        }
        if self.clocks.len() < capacity {
            self.clocks = vec![0; capacity];
        }
    }

    pub(crate) fn num_threads(&self) -> usize {
        self.num_threads
    }

    fn offset(&self, step: StepIndex) -> usize {
        debug_assert!(step.position() < self.num_steps);
        step.position() * self.num_threads
    }

    fn row(&self, step: StepIndex) -> &[u32] {
        let start = self.offset(step);
        &self.clocks[start..start + self.num_threads]
    }

    fn row_mut(&mut self, step: StepIndex) -> &mut [u32] {
        let start = self.offset(step);
        let n = self.num_threads;
        &mut self.clocks[start..start + n]
    }

    /// clock(to) := clock(from)
    pub(crate) fn copy(&mut self, from: StepIndex, to: StepIndex) {
        let src = self.offset(from);
        let dst = self.offset(to);
        self.clocks.copy_within(src..src + self.num_threads, dst);
    }

    /// clock(to) := max(clock(to), clock(from)) pointwise
    pub(crate) fn join(&mut self, to: StepIndex, from: StepIndex) {
        let src = self.offset(from);
        let dst = self.offset(to);
        for k in 0..self.num_threads {
            let v = self.clocks[src + k];
            if v > self.clocks[dst + k] {
                self.clocks[dst + k] = v;
            }
        }
    }

    pub(crate) fn clear(&mut self, step: StepIndex) {
        self.row_mut(step).fill(0);
    }

    /// Stamps the entry of `e.thread` in clock `at` with `e.index`.
    pub(crate) fn set(&mut self, at: StepIndex, e: Event) {
        let start = self.offset(at);
        self.clocks[start + usize::from(e.thread)] = e.index.get();
    }

    /// Returns true iff `a` happens-before (or is) the step `b`.
    pub(crate) fn happens_before(&self, a: Event, b: StepIndex) -> bool {
        a.index.get() <= self.row(b)[usize::from(a.thread)]
    }

    #[cfg(test)]
    pub(crate) fn clock(&self, step: StepIndex) -> Vec<u32> {
        self.row(step).to_vec()
    }
}
