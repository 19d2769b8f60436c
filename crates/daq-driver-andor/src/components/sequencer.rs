//! Frame sequencer: produced-frame counter plus blocking wait.
//!
//! The polling thread calls [`FrameSequencer::increment`] once per dequeued
//! buffer; consumers block in [`FrameSequencer::wait_for`]. A reset starts a
//! new epoch, and waits begun in an older epoch fail instead of resolving
//! against frames of the new one.

use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::error::{AndorError, Result};

#[derive(Debug, Default)]
struct SequencerState {
    produced: u64,
    epoch: u64,
    aborted: bool,
    capacity: usize,
}

/// Monotonic produced-frame counter with a condition signal.
#[derive(Debug)]
pub struct FrameSequencer {
    state: Mutex<SequencerState>,
    advanced: Condvar,
}

impl FrameSequencer {
    /// Sequencer at count 0 with no ring attached.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SequencerState::default()),
            advanced: Condvar::new(),
        }
    }

    /// Start a new epoch: the count returns to 0 and pending waiters are released.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.produced = 0;
        state.epoch = state.epoch.wrapping_add(1);
        state.aborted = false;
        drop(state);
        self.advanced.notify_all();
    }

    /// Record one more produced frame and wake waiters.
    pub fn increment(&self) -> u64 {
        let mut state = self.state.lock();
        state.produced += 1;
        let produced = state.produced;
        drop(state);
        self.advanced.notify_all();
        produced
    }

    /// Wake all waiters with a failure; used when the polling thread dies.
    pub fn abort(&self) {
        self.state.lock().aborted = true;
        self.advanced.notify_all();
    }

    /// Current produced count.
    pub fn produced(&self) -> u64 {
        self.state.lock().produced
    }

    /// Block until frame `index` has been produced (`produced > index`).
    ///
    /// With `index == None` the target is the count at call time, i.e. any new
    /// frame satisfies the wait. Returns the produced count observed on
    /// success. A timeout too large to form a deadline waits without one.
    pub fn wait_for(&self, index: Option<u64>, timeout: Duration) -> Result<u64> {
        let deadline = Instant::now().checked_add(timeout);
        let mut state = self.state.lock();
        let epoch = state.epoch;
        let target = index.unwrap_or(state.produced);

        loop {
            if state.epoch != epoch {
                // Old epoch: the target index refers to frames that no longer exist.
                return Err(AndorError::Timeout { waited: timeout });
            }
            if state.aborted {
                return Err(AndorError::AcquisitionAborted {
                    message: "polling thread stopped".to_string(),
                });
            }
            if state.produced > target {
                return Ok(state.produced);
            }
            let Some(deadline) = deadline else {
                self.advanced.wait(&mut state);
                continue;
            };
            if self.advanced.wait_until(&mut state, deadline).timed_out() {
                if state.epoch == epoch && state.produced > target {
                    return Ok(state.produced);
                }
                return Err(AndorError::Timeout { waited: timeout });
            }
        }
    }

    pub(crate) fn set_capacity(&self, capacity: usize) {
        self.state.lock().capacity = capacity;
    }

    /// `(produced_count, ring_capacity)` snapshot taken under one lock.
    pub fn status(&self) -> (u64, usize) {
        let state = self.state.lock();
        (state.produced, state.capacity)
    }
}

impl Default for FrameSequencer {
    fn default() -> Self {
        Self::new()
    }
}
