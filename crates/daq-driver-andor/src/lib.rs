//! Andor SDK3 Camera Driver
//!
//! Componentized driver for Andor sCMOS cameras driven through SDK3:
//! - Connection: library lifecycle and camera handles
//! - Features: typed access to named SDK3 features
//! - Acquisition: ring buffers, polling thread, overflow policy, frame decoding
//!
//! The vendor library is reached through the [`Sdk3Library`] / [`Sdk3Device`]
//! traits. With the default `mock` feature an in-process simulated camera is
//! available for tests and demos.
//!
//! # Example
//!
//! ```ignore
//! let driver = AndorDriver::open_mock(AndorConfig::default())?;
//! driver.setup(AcquisitionMode::Continuous, 50)?;
//! driver.start()?;
//! driver.wait_for_next(Duration::from_secs(1), Some(9))?;
//! let batch = driver.read_multiple(None, false, MissingFramePolicy::Skip, true)?;
//! driver.stop()?;
//! ```

pub mod components;
pub mod config;
pub mod error;

use serde::Serialize;
use std::ops::Range;
use std::sync::Arc;
use std::time::Duration;

pub use crate::components::acquisition::{
    AcquisitionController, AcquisitionMode, AcquisitionParameters, ControllerPhase, FrameBatch,
    FrameInfo, FramesStatus, MissingFramePolicy, OverflowPolicy,
};
pub use crate::components::connection::{AndorConnection, SdkContext};
pub use crate::components::decoder::{FrameGeometry, FrameMetadata, PixelArray};
pub use crate::components::features::{
    Aoi, AndorFeatures, CameraInfo, FeatureKind, FeatureValue, TriggerMode,
};
#[cfg(feature = "mock")]
pub use crate::components::mock::{MockCamera, MockSdk3Library};
pub use crate::components::sdk::{Sdk3Device, Sdk3Library, SdkError};
pub use crate::config::AndorConfig;
pub use crate::error::{AndorError, Result};

/// Driver for one Andor SDK3 camera.
///
/// # Drop Order
///
/// Fields drop in declaration order: `controller` goes before `connection`,
/// so the polling thread is joined before the camera handle and the library
/// reference are released.
pub struct AndorDriver {
    controller: AcquisitionController,
    connection: AndorConnection,
    config: AndorConfig,
}

/// Serializable view of the camera and acquisition settings.
#[derive(Debug, Clone, Serialize)]
pub struct SettingsSnapshot {
    /// Model, serial number and sensor size
    pub camera: CameraInfo,
    /// Exposure time in seconds
    pub exposure_time: f64,
    /// Frame rate in Hz
    pub frame_rate: f64,
    /// Current trigger source
    pub trigger_mode: TriggerMode,
    /// Area of interest
    pub aoi: Aoi,
    /// `PixelEncoding` enum string
    pub pixel_encoding: String,
    /// Whether frames carry metadata chunks
    pub metadata_enabled: bool,
    /// Parameters of the last `setup`, if any
    pub acquisition: Option<AcquisitionParameters>,
    /// Controller lifecycle phase
    pub phase: ControllerPhase,
    /// Active overflow policy
    pub overflow_policy: OverflowPolicy,
    /// Frame bookkeeping
    pub frames: FramesStatus,
}

impl AndorDriver {
    /// Open the camera named by `config.camera_index`.
    pub fn open(config: AndorConfig, context: Arc<SdkContext>) -> Result<Self> {
        config.validate()?;
        let connection = AndorConnection::open(context, config.camera_index)?;
        let controller = AcquisitionController::new(
            connection.device()?,
            config.buffer_padding,
            config.poll_timeout(),
        );
        controller.set_overflow_policy(config.overflow_policy);

        let features = controller.features();
        if let Some(enabled) = config.enable_metadata {
            features.set_metadata_enabled(enabled)?;
        }
        controller.setup(config.default_mode, config.default_frame_count)?;

        match features.camera_info() {
            Ok(info) => tracing::info!(
                model = %info.model,
                serial = %info.serial_number,
                index = config.camera_index,
                "Andor driver ready"
            ),
            Err(e) => tracing::warn!(error = %e, "Failed to read camera info"),
        }

        Ok(Self {
            controller,
            connection,
            config,
        })
    }

    /// [`open`](Self::open) on a blocking task.
    pub async fn open_async(config: AndorConfig, context: Arc<SdkContext>) -> Result<Self> {
        tokio::task::spawn_blocking(move || Self::open(config, context))
            .await
            .map_err(|e| AndorError::invalid_state(format!("open task failed: {e}")))?
    }

    /// Open the camera with the library `config.mock` selects.
    ///
    /// `mock = true` uses the simulated library and ignores `library`;
    /// `mock = false` needs the caller's SDK3 binding in `library`.
    pub fn from_config(
        config: AndorConfig,
        library: Option<Arc<dyn Sdk3Library>>,
    ) -> Result<Self> {
        config.validate()?;
        let library = match (config.mock, library) {
            (true, supplied) => {
                if supplied.is_some() {
                    tracing::warn!("mock = true, ignoring the supplied SDK3 library");
                }
                Self::mock_library(&config)?
            }
            (false, Some(library)) => library,
            (false, None) => {
                return Err(AndorError::config(
                    "mock = false needs an SDK3 library to open the camera",
                ))
            }
        };
        Self::open(config, SdkContext::new(library))
    }

    #[cfg(feature = "mock")]
    fn mock_library(config: &AndorConfig) -> Result<Arc<dyn Sdk3Library>> {
        Ok(Arc::new(MockSdk3Library::new(config.camera_index + 1)))
    }

    #[cfg(not(feature = "mock"))]
    fn mock_library(_config: &AndorConfig) -> Result<Arc<dyn Sdk3Library>> {
        Err(AndorError::config("mock = true needs the crate's `mock` feature"))
    }

    /// Open a simulated camera; `config.camera_index + 1` cameras are created.
    ///
    /// Forces `config.mock` on.
    #[cfg(feature = "mock")]
    pub fn open_mock(mut config: AndorConfig) -> Result<Self> {
        config.mock = true;
        Self::from_config(config, None)
    }

    /// Configuration the driver was opened with.
    pub fn config(&self) -> &AndorConfig {
        &self.config
    }

    /// Typed feature accessors of the opened camera.
    pub fn features(&self) -> &AndorFeatures {
        self.controller.features()
    }

    /// Underlying acquisition engine.
    pub fn controller(&self) -> &AcquisitionController {
        &self.controller
    }

    /// SDK3 device index of the opened camera.
    pub fn camera_index(&self) -> usize {
        self.connection.index()
    }

    // =========================================================================
    // Camera Settings
    // =========================================================================

    /// Exposure time in seconds.
    pub fn exposure_time(&self) -> Result<f64> {
        self.features().exposure_time()
    }

    /// Set the exposure time in seconds.
    pub fn set_exposure_time(&self, seconds: f64) -> Result<()> {
        self.features().set_exposure_time(seconds)
    }

    /// Frame rate in Hz.
    pub fn frame_rate(&self) -> Result<f64> {
        self.features().frame_rate()
    }

    /// Set the frame rate in Hz.
    pub fn set_frame_rate(&self, hz: f64) -> Result<()> {
        self.features().set_frame_rate(hz)
    }

    /// Current trigger source.
    pub fn trigger_mode(&self) -> Result<TriggerMode> {
        self.features().trigger_mode()
    }

    /// Select the trigger source.
    pub fn set_trigger_mode(&self, mode: TriggerMode) -> Result<()> {
        self.features().set_trigger_mode(mode)
    }

    /// Current area of interest.
    pub fn aoi(&self) -> Result<Aoi> {
        self.features().aoi()
    }

    /// Apply an area of interest.
    pub fn set_aoi(&self, aoi: Aoi) -> Result<()> {
        self.features().set_aoi(aoi)
    }

    /// Switch sensor cooling on or off.
    pub fn set_cooling(&self, enabled: bool) -> Result<()> {
        self.features().set_cooling(enabled)
    }

    /// Sensor temperature in degrees Celsius.
    pub fn temperature(&self) -> Result<f64> {
        self.features().temperature()
    }

    /// `TemperatureStatus` enum string.
    pub fn temperature_status(&self) -> Result<String> {
        self.features().temperature_status()
    }

    /// Model, serial number and sensor size.
    pub fn camera_info(&self) -> Result<CameraInfo> {
        self.features().camera_info()
    }

    /// Whether frames carry metadata chunks.
    pub fn metadata_enabled(&self) -> Result<bool> {
        self.features().metadata_enabled()
    }

    /// Turn metadata chunks on or off.
    pub fn set_metadata_enabled(&self, enabled: bool) -> Result<()> {
        self.features().set_metadata_enabled(enabled)
    }

    // =========================================================================
    // Acquisition
    // =========================================================================

    /// Store acquisition parameters; buffers are sized at `start`.
    pub fn setup(&self, mode: AcquisitionMode, frame_count: usize) -> Result<()> {
        self.controller.setup(mode, frame_count)
    }

    /// Start (or restart) acquisition with the stored parameters.
    pub fn start(&self) -> Result<()> {
        self.controller.start()
    }

    /// Stop acquisition. No-op when not acquiring.
    pub fn stop(&self) -> Result<()> {
        self.controller.stop()
    }

    /// Stop, release buffers and forget the parameters.
    pub fn clear(&self) -> Result<()> {
        self.controller.clear()
    }

    /// Whether the camera reports an acquisition in progress.
    pub fn is_acquiring(&self) -> Result<bool> {
        self.controller.is_acquiring()
    }

    /// Decode frames from the ring; see [`AcquisitionController::read_multiple`].
    pub fn read_multiple(
        &self,
        range: Option<Range<u64>>,
        peek: bool,
        missing: MissingFramePolicy,
        want_info: bool,
    ) -> Result<FrameBatch> {
        self.controller.read_multiple(range, peek, missing, want_info)
    }

    /// Read every unread frame with the configured missing-frame policy.
    pub fn read_new(&self) -> Result<FrameBatch> {
        self.controller
            .read_multiple(None, false, self.config.missing_frame_policy, true)
    }

    /// Block until frame `index` (or any new frame) is produced.
    pub fn wait_for_next(&self, timeout: Duration, index: Option<u64>) -> Result<u64> {
        self.controller.wait_for_next(timeout, index)
    }

    /// [`wait_for_next`](Self::wait_for_next) on a blocking task.
    pub async fn wait_for_next_async(
        self: &Arc<Self>,
        timeout: Duration,
        index: Option<u64>,
    ) -> Result<u64> {
        let driver = Arc::clone(self);
        tokio::task::spawn_blocking(move || driver.wait_for_next(timeout, index))
            .await
            .map_err(|e| AndorError::invalid_state(format!("wait task failed: {e}")))?
    }

    /// Select the reaction to hardware buffer overflows.
    pub fn set_overflow_policy(&self, policy: OverflowPolicy) {
        self.controller.set_overflow_policy(policy);
    }

    /// `(skipped, overflow_count)`
    pub fn get_missed_frames_status(&self) -> (u64, u64) {
        self.controller.get_missed_frames_status()
    }

    /// `(produced_count, ring_capacity)`
    pub fn get_status(&self) -> (u64, usize) {
        self.controller.get_status()
    }

    /// Acquired, unread and skipped frame counts.
    pub fn frames_status(&self) -> FramesStatus {
        self.controller.frames_status()
    }

    /// Acquire exactly `count` frames and return them.
    ///
    /// Leaves the controller configured for a one-shot run of `count` frames.
    pub fn grab(&self, count: usize, timeout: Duration) -> Result<Vec<PixelArray>> {
        self.controller.setup(AcquisitionMode::OneShot, count)?;
        self.controller.start()?;
        let waited = self
            .controller
            .wait_for_next(timeout, Some(count as u64 - 1));
        let read = waited.and_then(|_| {
            self.controller
                .read_multiple(None, false, MissingFramePolicy::Skip, false)
        });
        let stopped = self.controller.stop();
        let batch = read?;
        stopped?;
        Ok(batch.images.into_iter().flatten().collect())
    }

    /// Current camera and acquisition settings.
    pub fn settings(&self) -> Result<SettingsSnapshot> {
        let features = self.features();
        Ok(SettingsSnapshot {
            camera: features.camera_info()?,
            exposure_time: features.exposure_time()?,
            frame_rate: features.frame_rate()?,
            trigger_mode: features.trigger_mode()?,
            aoi: features.aoi()?,
            pixel_encoding: features.pixel_encoding()?,
            metadata_enabled: features.metadata_enabled()?,
            acquisition: self.controller.parameters(),
            phase: self.controller.phase(),
            overflow_policy: self.controller.overflow_policy(),
            frames: self.controller.frames_status(),
        })
    }

    /// [`settings`](Self::settings) as JSON.
    pub fn settings_snapshot(&self) -> Result<serde_json::Value> {
        serde_json::to_value(self.settings()?)
            .map_err(|e| AndorError::invalid_state(format!("settings serialization: {e}")))
    }

    /// Stop, release buffers and close the camera.
    pub fn shutdown(mut self) -> Result<()> {
        let cleared = self.controller.clear();
        self.connection.close();
        cleared
    }
}

impl Drop for AndorDriver {
    fn drop(&mut self) {
        if let Err(e) = self.controller.clear() {
            tracing::warn!(error = %e, "Andor driver cleanup failed");
        }
    }
}
