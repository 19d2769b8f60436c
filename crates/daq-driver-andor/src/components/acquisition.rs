//! Andor Acquisition Logic
//!
//! Orchestrates ring sizing, device start/stop, overflow-policy enforcement
//! and multi-frame reads on top of [`RingBufferManager`].
//!
//! ## Lifecycle
//!
//! ```text
//! Idle --setup--> Configured --start--> Acquiring
//!                     ^                     |
//!                     +--------stop---------+
//! any --clear--> Idle
//! ```
//!
//! `start` always stops first, so calling it again restarts the run with the
//! stored parameters. The ring holds `frame_count + padding` buffers with
//! `frame_count` of them queued at any time.
//!
//! ## Overflow handling
//!
//! Overflow events only set a flag (see [`OverflowMonitor`]). The flag is
//! checked before every wait or read and again after a wait times out, and
//! the configured [`OverflowPolicy`] is applied on the caller's thread.
//!
//! [`OverflowMonitor`]: crate::components::overflow::OverflowMonitor

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Range;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::components::decoder::{self, BytesPerPixel, FrameGeometry, FrameMetadata, PixelArray};
use crate::components::features::{AndorFeatures, CycleMode};
use crate::components::ring::RingBufferManager;
use crate::components::sdk::{CallbackId, Sdk3Device};
use crate::error::{AndorError, Result};

/// Buffers allocated beyond the queued depth.
pub const DEFAULT_BUFFER_PADDING: usize = 10;

// =============================================================================
// Policies and Parameters
// =============================================================================

/// How frames are counted on the device side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AcquisitionMode {
    /// Exactly `frame_count` frames, then the camera stops.
    OneShot,
    /// Runs until stopped; `frame_count` only sizes the ring.
    #[default]
    Continuous,
}

/// Reaction to a hardware buffer overflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverflowPolicy {
    /// Stop the acquisition and fail with [`AndorError::Overflow`].
    #[default]
    Error,
    /// Restart the acquisition; the pending wait fails with a timeout.
    Restart,
    /// Count it and carry on.
    Ignore,
}

/// What `read_multiple` puts in place of a frame the ring no longer holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MissingFramePolicy {
    /// Leave it out.
    #[default]
    Skip,
    /// Zero-filled image of the current shape.
    Zero,
    /// `None` placeholder.
    None,
}

macro_rules! impl_policy_text {
    ($ty:ident { $($variant:ident => $text:literal $(| $alias:literal)*),+ $(,)? }) => {
        impl $ty {
            /// Canonical lowercase name, as accepted by `FromStr`.
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($ty::$variant => $text,)+
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = AndorError;

            fn from_str(s: &str) -> Result<Self> {
                match s.trim().to_ascii_lowercase().as_str() {
                    $($text $(| $alias)* => Ok($ty::$variant),)+
                    other => Err(AndorError::config(format!(
                        concat!("unknown ", stringify!($ty), " '{}'"),
                        other
                    ))),
                }
            }
        }
    };
}

impl_policy_text!(AcquisitionMode {
    OneShot => "oneshot" | "one_shot" | "sequence",
    Continuous => "continuous",
});
impl_policy_text!(OverflowPolicy {
    Error => "error",
    Restart => "restart",
    Ignore => "ignore",
});
impl_policy_text!(MissingFramePolicy {
    Skip => "skip",
    Zero => "zero",
    None => "none",
});

/// Parameters stored by [`AcquisitionController::setup`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcquisitionParameters {
    /// One-shot or continuous
    pub mode: AcquisitionMode,
    /// Frames per run (one-shot) or queued buffers (continuous)
    pub frame_count: usize,
}

/// Controller lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ControllerPhase {
    /// Nothing set up
    Idle,
    /// Ring allocated, not acquiring
    Configured,
    /// Device running and polling thread alive
    Acquiring,
}

// =============================================================================
// Read Results
// =============================================================================

/// Per-frame description returned alongside decoded images.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FrameInfo {
    /// Logical index since the last reset
    pub frame_index: u64,
    /// Device clock ticks from the timestamp chunk
    pub timestamp_device: Option<u64>,
    /// `(width, height)`
    pub size: (usize, usize),
    /// Pixel type from the frame info chunk
    pub pixel_format_code: Option<u8>,
    /// Row stride used to unpack the frame
    pub row_stride_bytes: usize,
}

impl FrameInfo {
    fn new(frame_index: u64, geometry: &FrameGeometry, metadata: &FrameMetadata) -> Self {
        let size = metadata
            .size
            .map(|(w, h)| (usize::from(w), usize::from(h)))
            .unwrap_or((geometry.width, geometry.height));
        Self {
            frame_index,
            timestamp_device: metadata.timestamp,
            size,
            pixel_format_code: metadata.pixel_type,
            row_stride_bytes: metadata.stride.unwrap_or(geometry.stride),
        }
    }
}

/// Output of [`AcquisitionController::read_multiple`].
#[derive(Debug, Clone, Default)]
pub struct FrameBatch {
    /// One entry per returned position; `None` is a missing-frame placeholder.
    pub images: Vec<Option<PixelArray>>,
    /// Present when requested; `None` entries mark placeholder frames.
    pub infos: Option<Vec<Option<FrameInfo>>>,
}

impl FrameBatch {
    /// Number of returned positions, placeholders included.
    pub fn len(&self) -> usize {
        self.images.len()
    }

    /// Whether nothing was returned.
    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }
}

/// Frame bookkeeping snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FramesStatus {
    /// Frames acquired since the last user `start`, across overflow restarts
    pub acquired: u64,
    /// Produced but not yet read
    pub unread: u64,
    /// Frames lost to the read cursor falling behind the ring
    pub skipped: u64,
    /// Ring capacity
    pub buffer_size: usize,
}

// =============================================================================
// Controller
// =============================================================================

#[derive(Debug)]
struct ControllerState {
    phase: ControllerPhase,
    params: Option<AcquisitionParameters>,
    overflow_policy: OverflowPolicy,
    read_cursor: u64,
    skipped: u64,
    /// Frames of earlier epochs of the current run
    acquired_offset: u64,
    /// Produced count recorded by the last stop
    stopped_at: u64,
    overflow_callback: Option<CallbackId>,
}

/// Acquisition engine of one opened camera.
pub struct AcquisitionController {
    features: AndorFeatures,
    ring: RingBufferManager,
    state: Mutex<ControllerState>,
    padding: usize,
}

impl AcquisitionController {
    /// Controller over an opened device; the ring holds `frame_count + padding` buffers.
    pub fn new(device: Arc<dyn Sdk3Device>, padding: usize, poll_timeout: Duration) -> Self {
        Self {
            features: AndorFeatures::new(Arc::clone(&device)),
            ring: RingBufferManager::new(device, poll_timeout),
            state: Mutex::new(ControllerState {
                phase: ControllerPhase::Idle,
                params: None,
                overflow_policy: OverflowPolicy::default(),
                read_cursor: 0,
                skipped: 0,
                acquired_offset: 0,
                stopped_at: 0,
                overflow_callback: None,
            }),
            padding,
        }
    }

    /// Typed feature access.
    pub fn features(&self) -> &AndorFeatures {
        &self.features
    }

    /// Ring buffer manager.
    pub fn ring(&self) -> &RingBufferManager {
        &self.ring
    }

    /// Current lifecycle phase.
    pub fn phase(&self) -> ControllerPhase {
        self.state.lock().phase
    }

    /// Parameters of the last `setup`, if any.
    pub fn parameters(&self) -> Option<AcquisitionParameters> {
        self.state.lock().params
    }

    /// Store acquisition parameters. Buffers are sized at `start`.
    pub fn setup(&self, mode: AcquisitionMode, frame_count: usize) -> Result<()> {
        if frame_count == 0 {
            return Err(AndorError::invalid_state("frame_count must be at least 1"));
        }
        let mut state = self.state.lock();
        if state.phase == ControllerPhase::Acquiring {
            self.stop_locked(&mut state)?;
        }
        state.params = Some(AcquisitionParameters { mode, frame_count });
        state.phase = ControllerPhase::Configured;
        tracing::debug!(%mode, frame_count, "Acquisition configured");
        Ok(())
    }

    /// Start (or restart) acquisition with the stored parameters.
    pub fn start(&self) -> Result<()> {
        let mut state = self.state.lock();
        self.start_locked(&mut state, false)
    }

    fn start_locked(&self, state: &mut ControllerState, restart: bool) -> Result<()> {
        let params = state
            .params
            .ok_or_else(|| AndorError::invalid_state("setup must be called before start"))?;
        self.stop_locked(state)?;

        let device_frames = match params.mode {
            AcquisitionMode::OneShot => params.frame_count as i64,
            AcquisitionMode::Continuous => self.features.frame_count_max()?,
        };
        self.features.set_cycle_mode(CycleMode::Fixed)?;
        self.features.set_frame_count(device_frames)?;

        let frame_size = self.features.image_size_bytes()?;
        let buffer_count = params.frame_count + self.padding;
        self.ring
            .allocate(buffer_count, frame_size, params.frame_count)?;

        if restart {
            state.acquired_offset += state.stopped_at;
        } else {
            state.acquired_offset = 0;
            state.skipped = 0;
        }
        state.stopped_at = 0;
        state.read_cursor = 0;
        self.ring.reset();

        if state.overflow_callback.is_none() {
            let callback = self.ring.overflow().callback();
            state.overflow_callback = Some(self.features.register_overflow_callback(callback)?);
        }
        self.features.enable_overflow_event()?;

        self.ring.start_loop()?;
        if let Err(e) = self.features.start_acquisition() {
            self.ring.stop_loop();
            return Err(e);
        }
        state.phase = ControllerPhase::Acquiring;

        tracing::info!(
            mode = %params.mode,
            frame_count = params.frame_count,
            device_frames,
            buffer_count,
            frame_size,
            restart,
            "Acquisition started"
        );
        Ok(())
    }

    /// Stop acquisition. No-op when not acquiring.
    pub fn stop(&self) -> Result<()> {
        let mut state = self.state.lock();
        self.stop_locked(&mut state)
    }

    fn stop_locked(&self, state: &mut ControllerState) -> Result<()> {
        let mut result = Ok(());
        if self.ring.is_running() || state.phase == ControllerPhase::Acquiring {
            match self.features.camera_acquiring() {
                Ok(true) => {
                    state.stopped_at = self.ring.sequencer().produced();
                    result = self.features.stop_acquisition();
                }
                Ok(false) => state.stopped_at = self.ring.sequencer().produced(),
                Err(e) => result = Err(e),
            }
            self.ring.stop_loop();
            tracing::info!(
                acquired = state.acquired_offset + state.stopped_at,
                "Acquisition stopped"
            );
        }
        if state.phase == ControllerPhase::Acquiring {
            state.phase = ControllerPhase::Configured;
        }
        result
    }

    /// Stop, release buffers and forget the parameters.
    pub fn clear(&self) -> Result<()> {
        let mut state = self.state.lock();
        let stopped = self.stop_locked(&mut state);
        if let Some(id) = state.overflow_callback.take() {
            if let Err(e) = self.features.unregister_overflow_callback(id) {
                tracing::warn!(error = %e, "Failed to unregister overflow callback");
            }
        }
        let released = self.ring.deallocate();
        state.params = None;
        state.phase = ControllerPhase::Idle;
        tracing::debug!("Acquisition cleared");
        stopped.and(released)
    }

    /// Whether the camera reports an acquisition in progress.
    pub fn is_acquiring(&self) -> Result<bool> {
        if self.state.lock().phase != ControllerPhase::Acquiring {
            return Ok(false);
        }
        self.features.camera_acquiring()
    }

    /// Policy applied to overflows seen from now on.
    pub fn set_overflow_policy(&self, policy: OverflowPolicy) {
        self.state.lock().overflow_policy = policy;
        tracing::debug!(%policy, "Overflow policy set");
    }

    /// Active overflow policy.
    pub fn overflow_policy(&self) -> OverflowPolicy {
        self.state.lock().overflow_policy
    }

    /// Apply the overflow policy to a pending overflow.
    ///
    /// Returns `true` when the acquisition was restarted, which invalidates
    /// any wait target of the old epoch.
    fn check_overflow(&self) -> Result<bool> {
        if !self.ring.overflow_pending() {
            return Ok(false);
        }
        let mut state = self.state.lock();
        let policy = state.overflow_policy;
        let overflow = self.ring.overflow();
        match policy {
            OverflowPolicy::Error => {
                overflow.consume();
                tracing::warn!(%policy, "Buffer overflow, stopping acquisition");
                self.stop_locked(&mut state)?;
                Err(AndorError::Overflow)
            }
            OverflowPolicy::Restart => {
                if !overflow.consume() {
                    return Ok(false);
                }
                tracing::warn!(
                    %policy,
                    count = overflow.overflow_count(),
                    "Buffer overflow, restarting acquisition"
                );
                if state.phase == ControllerPhase::Acquiring {
                    self.start_locked(&mut state, true)?;
                }
                Ok(true)
            }
            OverflowPolicy::Ignore => {
                if overflow.consume() {
                    tracing::debug!(
                        %policy,
                        count = overflow.overflow_count(),
                        "Buffer overflow ignored"
                    );
                }
                Ok(false)
            }
        }
    }

    /// Error that killed the polling thread, in place of the generic abort.
    fn loop_failure(&self, err: AndorError) -> AndorError {
        match err {
            AndorError::AcquisitionAborted { .. } => self.ring.last_error().unwrap_or(err),
            other => other,
        }
    }

    /// Block until frame `index` (or, with `None`, any new frame) is produced.
    ///
    /// Returns the produced count.
    pub fn wait_for_next(&self, timeout: Duration, index: Option<u64>) -> Result<u64> {
        let timed_out = AndorError::Timeout { waited: timeout };
        if self.check_overflow()? {
            return Err(timed_out);
        }
        match self.ring.sequencer().wait_for(index, timeout) {
            Ok(produced) => Ok(produced),
            Err(AndorError::Timeout { .. }) => {
                if self.check_overflow()? {
                    tracing::debug!("Overflow raced with a wait");
                }
                Err(timed_out)
            }
            Err(e) => Err(self.loop_failure(e)),
        }
    }

    /// Decode frames from the ring.
    ///
    /// `range` defaults to everything produced but not yet read and is
    /// clamped to the produced count. Frames the ring no longer holds are
    /// handled per `missing`. Unless `peek` is set the read cursor moves past
    /// the range.
    pub fn read_multiple(
        &self,
        range: Option<Range<u64>>,
        peek: bool,
        missing: MissingFramePolicy,
        want_info: bool,
    ) -> Result<FrameBatch> {
        self.check_overflow()?;
        if let Some(err) = self.ring.last_error() {
            return Err(err);
        }

        let mut state = self.state.lock();
        if self.ring.buffer_count() == 0 {
            return Err(AndorError::invalid_state("acquisition has not been started"));
        }
        let produced = self.ring.sequencer().produced();
        let range = match range {
            Some(r) => r.start.min(produced)..r.end.min(produced),
            None => state.read_cursor.min(produced)..produced,
        };

        let geometry = self.geometry()?;
        let bpp = BytesPerPixel::from_value(geometry.bytes_per_pixel)?;
        let valid = self.ring.valid_range();

        let mut batch = FrameBatch {
            images: Vec::with_capacity(range.end.saturating_sub(range.start) as usize),
            infos: want_info.then(Vec::new),
        };
        let mut lost = 0u64;

        for index in range.clone() {
            let raw = if valid.contains(&index) {
                match self.ring.read(index) {
                    Ok(raw) => Some(raw),
                    Err(AndorError::StaleFrame { .. }) => None,
                    Err(e) => return Err(e),
                }
            } else {
                None
            };

            let (image, info) = match raw {
                Some(raw) => {
                    let (pixels, metadata) = decoder::decode(&raw, &geometry)?;
                    let info = FrameInfo::new(index, &geometry, &metadata);
                    (Some(pixels), Some(info))
                }
                None => {
                    if index >= state.read_cursor {
                        lost += 1;
                    }
                    match missing {
                        MissingFramePolicy::Skip => continue,
                        MissingFramePolicy::Zero => (
                            Some(PixelArray::zeros(bpp, geometry.height, geometry.width)),
                            None,
                        ),
                        MissingFramePolicy::None => (None, None),
                    }
                }
            };
            batch.images.push(image);
            if let Some(infos) = batch.infos.as_mut() {
                infos.push(info);
            }
        }

        if !peek {
            if lost > 0 {
                tracing::warn!(lost, policy = %missing, "Frames overwritten before they were read");
            }
            state.skipped += lost;
            state.read_cursor = state.read_cursor.max(range.end);
        }
        tracing::debug!(
            start = range.start,
            end = range.end,
            returned = batch.len(),
            peek,
            "Frames read"
        );
        Ok(batch)
    }

    /// Current decode geometry from the device.
    pub fn geometry(&self) -> Result<FrameGeometry> {
        Ok(FrameGeometry {
            width: self.features.aoi_width()?,
            height: self.features.aoi_height()?,
            bytes_per_pixel: self.features.bytes_per_pixel()?,
            stride: self.features.aoi_stride()?,
            metadata_enabled: self.features.metadata_enabled()?,
        })
    }

    /// `(skipped, overflow_count)`
    pub fn get_missed_frames_status(&self) -> (u64, u64) {
        let skipped = self.state.lock().skipped;
        (skipped, self.ring.overflow().overflow_count())
    }

    /// Zero the skipped and overflow counters.
    pub fn reset_missed_frames_status(&self) {
        self.state.lock().skipped = 0;
        self.ring.overflow().reset_count();
    }

    /// `(produced_count, ring_capacity)`
    pub fn get_status(&self) -> (u64, usize) {
        self.ring.status()
    }

    /// Acquired, unread, skipped and ring size in one snapshot.
    pub fn frames_status(&self) -> FramesStatus {
        let state = self.state.lock();
        let (produced, buffer_size) = self.ring.status();
        FramesStatus {
            acquired: state.acquired_offset + produced,
            unread: produced.saturating_sub(state.read_cursor),
            skipped: state.skipped,
            buffer_size,
        }
    }
}
