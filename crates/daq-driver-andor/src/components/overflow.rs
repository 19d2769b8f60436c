//! Buffer-overflow event monitor.
//!
//! The SDK fires `BufferOverflowEvent` callbacks on a thread it owns. The
//! callback only posts into this single-slot flag; every control-flow decision
//! is taken later on the caller's thread by the acquisition controller.

use parking_lot::Mutex;
use std::sync::Arc;

use crate::components::sdk::FeatureCallback;

#[derive(Debug, Default, Clone, Copy)]
struct OverflowState {
    pending: bool,
    count: u64,
}

/// Lock-protected overflow flag plus lifetime overflow counter.
#[derive(Debug, Default)]
pub struct OverflowMonitor {
    state: Mutex<OverflowState>,
}

impl OverflowMonitor {
    /// Monitor with no pending overflow.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an overflow notification. Repeated signals before consumption collapse to one.
    pub fn on_overflow(&self) {
        let mut state = self.state.lock();
        if !state.pending {
            tracing::warn!("Camera reported a buffer overflow");
        }
        state.pending = true;
    }

    /// Whether an overflow is pending. Does not clear the flag.
    pub fn new_overflow(&self) -> bool {
        self.state.lock().pending
    }

    /// Clear the pending flag. The lifetime counter is kept.
    pub fn reset(&self) {
        self.state.lock().pending = false;
    }

    /// Atomically clear a pending overflow and count it.
    ///
    /// Returns `false` when nothing was pending.
    pub fn consume(&self) -> bool {
        let mut state = self.state.lock();
        if !state.pending {
            return false;
        }
        state.pending = false;
        state.count += 1;
        true
    }

    /// Overflows handled since construction or the last [`reset_count`](Self::reset_count).
    pub fn overflow_count(&self) -> u64 {
        self.state.lock().count
    }

    /// Zero the lifetime count. A pending flag is kept.
    pub fn reset_count(&self) {
        self.state.lock().count = 0;
    }

    /// Callback suitable for `register_feature_callback`.
    pub fn callback(self: &Arc<Self>) -> FeatureCallback {
        let monitor = Arc::clone(self);
        Arc::new(move |feature: &str| {
            tracing::trace!(feature, "Overflow event callback");
            monitor.on_overflow();
        })
    }
}
