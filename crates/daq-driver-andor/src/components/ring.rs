//! Ring buffer manager and polling thread.
//!
//! The ring is a fixed set of `N` equally sized [`FrameBuffer`]s. `Q` of them
//! are queued to the device at any time; the remaining `N - Q` are slack that
//! keeps recently delivered frames readable while the consumer catches up.
//!
//! A dedicated thread waits on the device with a bounded timeout, so that
//! [`RingBufferManager::stop_loop`] is honoured within one poll period. For
//! every dequeued buffer holding logical frame `p` it resubmits slot
//! `(p + Q) mod N` and then advances the [`FrameSequencer`].
//!
//! ```text
//! Unallocated --allocate--> Allocated --start_loop--> Running
//!      ^                        |  ^                     |
//!      +-------deallocate-------+  +------stop_loop------+
//! ```

use parking_lot::Mutex;
use std::ops::Range;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::components::overflow::OverflowMonitor;
use crate::components::sdk::{FrameBuffer, Sdk3Device, SharedBuffer, WaitedBuffer};
use crate::components::sequencer::FrameSequencer;
use crate::error::{AndorError, Result};

/// Default bound on a single device wait inside the polling loop.
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_millis(300);

/// Lifecycle phase of the ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RingPhase {
    /// No buffers
    Unallocated,
    /// Buffers exist, no polling thread
    Allocated,
    /// Polling thread alive
    Running,
}

#[derive(Debug, Default)]
struct RingState {
    buffers: Vec<SharedBuffer>,
    frame_size: usize,
    queued_depth: usize,
}

/// Owns the ring buffers and the polling thread of one camera session.
pub struct RingBufferManager {
    device: Arc<dyn Sdk3Device>,
    sequencer: Arc<FrameSequencer>,
    overflow: Arc<OverflowMonitor>,
    ring: Arc<Mutex<RingState>>,
    last_error: Arc<Mutex<Option<AndorError>>>,
    stop_flag: Arc<AtomicBool>,
    poll_thread: Mutex<Option<JoinHandle<()>>>,
    poll_timeout: Duration,
}

impl RingBufferManager {
    /// Empty ring; `poll_timeout` bounds each device wait of the polling thread.
    pub fn new(device: Arc<dyn Sdk3Device>, poll_timeout: Duration) -> Self {
        Self {
            device,
            sequencer: Arc::new(FrameSequencer::new()),
            overflow: Arc::new(OverflowMonitor::new()),
            ring: Arc::new(Mutex::new(RingState::default())),
            last_error: Arc::new(Mutex::new(None)),
            stop_flag: Arc::new(AtomicBool::new(false)),
            poll_thread: Mutex::new(None),
            poll_timeout,
        }
    }

    /// Produced-frame counter shared with the polling thread.
    pub fn sequencer(&self) -> &Arc<FrameSequencer> {
        &self.sequencer
    }

    /// Overflow flag and lifetime count.
    pub fn overflow(&self) -> &Arc<OverflowMonitor> {
        &self.overflow
    }

    /// Derived from the buffers and the polling thread.
    pub fn phase(&self) -> RingPhase {
        if self.poll_thread.lock().is_some() {
            RingPhase::Running
        } else if self.ring.lock().buffers.is_empty() {
            RingPhase::Unallocated
        } else {
            RingPhase::Allocated
        }
    }

    /// Whether the polling thread is alive.
    pub fn is_running(&self) -> bool {
        self.poll_thread.lock().is_some()
    }

    /// Allocate `buffer_count` buffers of `frame_size` bytes and queue the first `queued_depth`.
    ///
    /// Any existing ring is torn down first.
    pub fn allocate(
        &self,
        buffer_count: usize,
        frame_size: usize,
        queued_depth: usize,
    ) -> Result<()> {
        if buffer_count == 0 || frame_size == 0 {
            return Err(AndorError::invalid_state(format!(
                "cannot allocate {buffer_count} buffers of {frame_size} bytes"
            )));
        }
        if queued_depth == 0 || queued_depth > buffer_count {
            return Err(AndorError::invalid_state(format!(
                "queued depth {queued_depth} must be within 1..={buffer_count}"
            )));
        }

        self.deallocate()?;

        let buffers: Vec<SharedBuffer> = (0..buffer_count)
            .map(|id| FrameBuffer::new(id, frame_size))
            .collect();

        for buffer in buffers.iter().take(queued_depth) {
            if let Err(source) = self.device.queue_buffer(Arc::clone(buffer)) {
                tracing::error!(slot = buffer.id(), error = %source, "Device rejected ring buffer");
                if let Err(e) = self.device.flush() {
                    tracing::warn!(error = %e, "Flush after failed allocation also failed");
                }
                return Err(AndorError::Allocation {
                    slot: buffer.id(),
                    source,
                });
            }
        }

        let mut ring = self.ring.lock();
        ring.buffers = buffers;
        ring.frame_size = frame_size;
        ring.queued_depth = queued_depth;
        self.sequencer.set_capacity(buffer_count);
        drop(ring);

        tracing::info!(buffer_count, frame_size, queued_depth, "Ring buffers allocated");
        Ok(())
    }

    /// Stop the loop if running, flush the device queue and release the buffers.
    ///
    /// No-op when nothing is allocated.
    pub fn deallocate(&self) -> Result<()> {
        self.stop_loop();

        let mut ring = self.ring.lock();
        if ring.buffers.is_empty() {
            return Ok(());
        }
        let flushed = self.device.flush();
        let count = ring.buffers.len();
        *ring = RingState::default();
        self.sequencer.set_capacity(0);
        drop(ring);

        tracing::info!(buffer_count = count, "Ring buffers released");
        flushed.map_err(AndorError::from)
    }

    /// Spawn the polling thread. Already running is not an error.
    pub fn start_loop(&self) -> Result<()> {
        let mut slot = self.poll_thread.lock();
        if slot.is_some() {
            return Ok(());
        }
        if self.ring.lock().buffers.is_empty() {
            return Err(AndorError::invalid_state("polling loop needs an allocated ring"));
        }

        *self.last_error.lock() = None;
        self.stop_flag.store(false, Ordering::SeqCst);

        let poller = Poller {
            device: Arc::clone(&self.device),
            sequencer: Arc::clone(&self.sequencer),
            ring: Arc::clone(&self.ring),
            last_error: Arc::clone(&self.last_error),
            stop_flag: Arc::clone(&self.stop_flag),
            timeout: self.poll_timeout,
        };

        let handle = std::thread::Builder::new()
            .name("andor-poll".into())
            .spawn(move || poller.run())
            .map_err(|e| {
                AndorError::invalid_state(format!("failed to spawn polling thread: {e}"))
            })?;
        *slot = Some(handle);
        Ok(())
    }

    /// Signal the polling thread and join it. Returns once the thread has exited.
    pub fn stop_loop(&self) {
        let Some(handle) = self.poll_thread.lock().take() else {
            return;
        };
        self.stop_flag.store(true, Ordering::SeqCst);
        if handle.join().is_err() {
            tracing::error!("Polling thread panicked");
            let err = AndorError::AcquisitionAborted {
                message: "polling thread panicked".to_string(),
            };
            *self.last_error.lock() = Some(err);
            self.sequencer.abort();
        }
        tracing::debug!("Polling loop stopped");
    }

    /// Error that terminated the polling loop, if any.
    pub fn last_error(&self) -> Option<AndorError> {
        self.last_error.lock().clone()
    }

    /// Frame indices that may still be read.
    ///
    /// The slot of index `produced - N` is the next one the device fills, so
    /// the window holds at most `N - 1` frames.
    pub fn valid_range(&self) -> Range<u64> {
        let capacity = self.ring.lock().buffers.len() as u64;
        let produced = self.sequencer.produced();
        produced.saturating_sub(capacity.saturating_sub(1))..produced
    }

    /// Copy out the bytes of frame `index`.
    ///
    /// Fails with [`AndorError::StaleFrame`] when the slot no longer (or not
    /// yet) holds that frame.
    ///
    /// A slot is requeued on the device once `produced - index >= N - Q`, so
    /// the device may be writing into it while `index` is still inside the
    /// `N - 1` window. The frame tag covers that gap: the device write clears
    /// it and only the polling thread sets it again, so a requeued slot never
    /// reads as `index`.
    pub fn read(&self, index: u64) -> Result<Vec<u8>> {
        let ring = self.ring.lock();
        let capacity = ring.buffers.len();
        if capacity == 0 {
            return Err(AndorError::invalid_state("ring is not allocated"));
        }
        let buffer = &ring.buffers[(index % capacity as u64) as usize];
        let produced = self.sequencer.produced();
        if index >= produced || produced - index >= capacity as u64 {
            return Err(AndorError::StaleFrame {
                index,
                held: buffer.frame(),
            });
        }
        buffer
            .copy_frame(index)
            .map_err(|held| AndorError::StaleFrame { index, held })
    }

    /// `(produced_count, ring_capacity)`.
    pub fn status(&self) -> (u64, usize) {
        self.sequencer.status()
    }

    /// Bytes per buffer.
    pub fn frame_size(&self) -> usize {
        self.ring.lock().frame_size
    }

    /// `N`, the number of buffers.
    pub fn buffer_count(&self) -> usize {
        self.ring.lock().buffers.len()
    }

    /// `Q`, the number of buffers kept queued on the device.
    pub fn queued_depth(&self) -> usize {
        self.ring.lock().queued_depth
    }

    /// Record a device overflow event.
    pub fn on_overflow(&self) {
        self.overflow.on_overflow();
    }

    /// Consume a pending overflow, returning whether there was one.
    pub fn overflow_pending(&self) -> bool {
        self.overflow.new_overflow()
    }

    /// New epoch: zero the sequencer and drop any pending overflow.
    pub fn reset(&self) {
        let _ring = self.ring.lock();
        self.sequencer.reset();
        self.overflow.reset();
    }
}

impl Drop for RingBufferManager {
    fn drop(&mut self) {
        if let Err(e) = self.deallocate() {
            tracing::warn!(error = %e, "Ring teardown failed");
        }
    }
}

/// State moved onto the polling thread.
struct Poller {
    device: Arc<dyn Sdk3Device>,
    sequencer: Arc<FrameSequencer>,
    ring: Arc<Mutex<RingState>>,
    last_error: Arc<Mutex<Option<AndorError>>>,
    stop_flag: Arc<AtomicBool>,
    timeout: Duration,
}

impl Poller {
    fn run(self) {
        tracing::debug!(timeout_ms = self.timeout.as_millis() as u64, "Polling thread started");
        while !self.stop_flag.load(Ordering::SeqCst) {
            // The wait blocks, so it runs without any ring lock held.
            let waited = match self.device.wait_buffer(self.timeout) {
                Ok(waited) => waited,
                Err(e) if e.is_timeout() => continue,
                Err(e) => {
                    self.fail(e.into());
                    return;
                }
            };
            if let Err(e) = self.on_buffer(waited) {
                self.fail(e);
                return;
            }
        }
        tracing::debug!("Polling thread exiting");
    }

    fn on_buffer(&self, waited: WaitedBuffer) -> Result<()> {
        let ring = self.ring.lock();
        if waited.size != ring.frame_size {
            return Err(AndorError::BufferSizeMismatch {
                expected: ring.frame_size,
                actual: waited.size,
            });
        }
        let capacity = ring.buffers.len() as u64;
        let filled = ring.buffers.get(waited.buffer_id).ok_or_else(|| {
            AndorError::invalid_state(format!(
                "device returned unknown buffer {}",
                waited.buffer_id
            ))
        })?;

        let produced = self.sequencer.produced();
        if (produced % capacity) as usize != waited.buffer_id {
            tracing::warn!(
                produced,
                slot = waited.buffer_id,
                "Device returned buffers out of ring order"
            );
        }
        filled.set_frame(Some(produced));

        let next = ((produced + ring.queued_depth as u64) % capacity) as usize;
        self.device.queue_buffer(Arc::clone(&ring.buffers[next]))?;
        drop(ring);

        self.sequencer.increment();
        tracing::trace!(produced, slot = waited.buffer_id, requeued = next, "Frame dequeued");
        Ok(())
    }

    fn fail(&self, err: AndorError) {
        tracing::error!(error = %err, "Polling loop aborted");
        *self.last_error.lock() = Some(err);
        self.sequencer.abort();
    }
}
