//! Andor SDK3 feature access.
//!
//! SDK3 exposes every setting as a named feature of one of a few kinds. The
//! acquisition engine only depends on a handful of them; those get typed
//! accessors here. Everything else goes through [`AndorFeatures::get_feature`]
//! / [`AndorFeatures::set_feature`], checked against the [`FeatureKind`] map.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::components::sdk::{CallbackId, FeatureCallback, Sdk3Device};
use crate::error::{AndorError, Result};

// =============================================================================
// Feature Names
// =============================================================================

/// `FrameCount`
pub const FRAME_COUNT: &str = "FrameCount";
/// `CycleMode`
pub const CYCLE_MODE: &str = "CycleMode";
/// `ImageSizeBytes`
pub const IMAGE_SIZE_BYTES: &str = "ImageSizeBytes";
/// `CameraAcquiring`
pub const CAMERA_ACQUIRING: &str = "CameraAcquiring";
/// `MetadataEnable`
pub const METADATA_ENABLE: &str = "MetadataEnable";
/// `AOIStride`
pub const AOI_STRIDE: &str = "AOIStride";
/// `AOIWidth`
pub const AOI_WIDTH: &str = "AOIWidth";
/// `AOIHeight`
pub const AOI_HEIGHT: &str = "AOIHeight";
/// `AOILeft`
pub const AOI_LEFT: &str = "AOILeft";
/// `AOITop`
pub const AOI_TOP: &str = "AOITop";
/// `BytesPerPixel`
pub const BYTES_PER_PIXEL: &str = "BytesPerPixel";
/// `PixelEncoding`
pub const PIXEL_ENCODING: &str = "PixelEncoding";
/// `AcquisitionStart`
pub const ACQUISITION_START: &str = "AcquisitionStart";
/// `AcquisitionStop`
pub const ACQUISITION_STOP: &str = "AcquisitionStop";
/// `EventSelector`
pub const EVENT_SELECTOR: &str = "EventSelector";
/// `EventEnable`
pub const EVENT_ENABLE: &str = "EventEnable";
/// `BufferOverflowEvent`
pub const BUFFER_OVERFLOW_EVENT: &str = "BufferOverflowEvent";
/// `ExposureTime`
pub const EXPOSURE_TIME: &str = "ExposureTime";
/// `FrameRate`
pub const FRAME_RATE: &str = "FrameRate";
/// `TriggerMode`
pub const TRIGGER_MODE: &str = "TriggerMode";
/// `SensorCooling`
pub const SENSOR_COOLING: &str = "SensorCooling";
/// `SensorTemperature`
pub const SENSOR_TEMPERATURE: &str = "SensorTemperature";
/// `TemperatureStatus`
pub const TEMPERATURE_STATUS: &str = "TemperatureStatus";
/// `CameraModel`
pub const CAMERA_MODEL: &str = "CameraModel";
/// `SerialNumber`
pub const SERIAL_NUMBER: &str = "SerialNumber";
/// `SensorWidth`
pub const SENSOR_WIDTH: &str = "SensorWidth";
/// `SensorHeight`
pub const SENSOR_HEIGHT: &str = "SensorHeight";

// =============================================================================
// Capability Map
// =============================================================================

/// SDK3 feature type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeatureKind {
    /// Integer with min/max
    Int,
    /// Float with min/max
    Float,
    /// Boolean
    Bool,
    /// Free text
    String,
    /// Enumerated, addressed by index or string
    Enum,
    /// Command without a value
    Command,
}

/// Kinds of the features this driver knows about.
const FEATURE_KINDS: &[(&str, FeatureKind)] = &[
    (FRAME_COUNT, FeatureKind::Int),
    (CYCLE_MODE, FeatureKind::Enum),
    (IMAGE_SIZE_BYTES, FeatureKind::Int),
    (CAMERA_ACQUIRING, FeatureKind::Bool),
    (METADATA_ENABLE, FeatureKind::Bool),
    (AOI_STRIDE, FeatureKind::Int),
    (AOI_WIDTH, FeatureKind::Int),
    (AOI_HEIGHT, FeatureKind::Int),
    (AOI_LEFT, FeatureKind::Int),
    (AOI_TOP, FeatureKind::Int),
    (BYTES_PER_PIXEL, FeatureKind::Float),
    (PIXEL_ENCODING, FeatureKind::Enum),
    (ACQUISITION_START, FeatureKind::Command),
    (ACQUISITION_STOP, FeatureKind::Command),
    (EVENT_SELECTOR, FeatureKind::Enum),
    (EVENT_ENABLE, FeatureKind::Bool),
    (BUFFER_OVERFLOW_EVENT, FeatureKind::Int),
    (EXPOSURE_TIME, FeatureKind::Float),
    (FRAME_RATE, FeatureKind::Float),
    (TRIGGER_MODE, FeatureKind::Enum),
    (SENSOR_COOLING, FeatureKind::Bool),
    (SENSOR_TEMPERATURE, FeatureKind::Float),
    (TEMPERATURE_STATUS, FeatureKind::Enum),
    (CAMERA_MODEL, FeatureKind::String),
    (SERIAL_NUMBER, FeatureKind::String),
    (SENSOR_WIDTH, FeatureKind::Int),
    (SENSOR_HEIGHT, FeatureKind::Int),
];

/// Kind of a known feature, `None` for names outside the map.
pub fn feature_kind(name: &str) -> Option<FeatureKind> {
    FEATURE_KINDS
        .iter()
        .find(|(feature, _)| *feature == name)
        .map(|&(_, kind)| kind)
}

/// Typed feature value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FeatureValue {
    /// Int features
    Int(i64),
    /// Float features
    Float(f64),
    /// Bool features
    Bool(bool),
    /// String features and enum features (by their string value)
    Text(String),
}

impl FeatureValue {
    fn kind_name(&self) -> &'static str {
        match self {
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Bool(_) => "bool",
            Self::Text(_) => "string",
        }
    }
}

// =============================================================================
// Enumerated Settings
// =============================================================================

/// `CycleMode` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleMode {
    /// Stop after `FrameCount` frames
    Fixed,
    /// Run until stopped
    Continuous,
}

impl CycleMode {
    /// SDK3 string value.
    pub fn as_str(&self) -> &'static str {
        match self {
            CycleMode::Fixed => "Fixed",
            CycleMode::Continuous => "Continuous",
        }
    }
}

/// `TriggerMode` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TriggerMode {
    /// Free-running on the internal clock
    Internal,
    /// One frame per software trigger
    Software,
    /// One frame per external edge
    External,
    /// Free-running after the first external edge
    ExternalStart,
    /// Exposure follows the external pulse width
    ExternalExposure,
}

impl TriggerMode {
    /// SDK3 string value.
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerMode::Internal => "Internal",
            TriggerMode::Software => "Software",
            TriggerMode::External => "External",
            TriggerMode::ExternalStart => "External Start",
            TriggerMode::ExternalExposure => "External Exposure",
        }
    }

    /// Parse an SDK3 string value.
    pub fn from_sdk(value: &str) -> Option<Self> {
        match value {
            "Internal" => Some(TriggerMode::Internal),
            "Software" => Some(TriggerMode::Software),
            "External" => Some(TriggerMode::External),
            "External Start" => Some(TriggerMode::ExternalStart),
            "External Exposure" => Some(TriggerMode::ExternalExposure),
            _ => None,
        }
    }
}

impl fmt::Display for TriggerMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Area of interest in sensor pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Aoi {
    /// First column
    pub left: i64,
    /// First row
    pub top: i64,
    /// Columns
    pub width: i64,
    /// Rows
    pub height: i64,
}

/// Static camera description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CameraInfo {
    /// `CameraModel`
    pub model: String,
    /// `SerialNumber`
    pub serial_number: String,
    /// Sensor size in pixels (width, height)
    pub sensor_size: (i64, i64),
}

// =============================================================================
// Accessors
// =============================================================================

/// Typed feature accessors over an opened device.
#[derive(Clone)]
pub struct AndorFeatures {
    device: Arc<dyn Sdk3Device>,
}

impl AndorFeatures {
    /// Wrap an opened device.
    pub fn new(device: Arc<dyn Sdk3Device>) -> Self {
        Self { device }
    }

    /// Underlying device handle.
    pub fn device(&self) -> &Arc<dyn Sdk3Device> {
        &self.device
    }

    /// Whether the camera implements `feature`.
    pub fn is_implemented(&self, feature: &str) -> Result<bool> {
        Ok(self.device.is_implemented(feature)?)
    }

    /// Read a feature through the capability map.
    pub fn get_feature(&self, name: &str) -> Result<FeatureValue> {
        let kind = self.known_kind(name)?;
        let value = match kind {
            FeatureKind::Int => FeatureValue::Int(self.device.get_int(name)?),
            FeatureKind::Float => FeatureValue::Float(self.device.get_float(name)?),
            FeatureKind::Bool => FeatureValue::Bool(self.device.get_bool(name)?),
            FeatureKind::String => FeatureValue::Text(self.device.get_string(name)?),
            FeatureKind::Enum => FeatureValue::Text(self.get_enum_string(name)?),
            FeatureKind::Command => {
                return Err(AndorError::invalid_state(format!(
                    "feature '{name}' is a command and has no value"
                )))
            }
        };
        Ok(value)
    }

    /// Write a feature through the capability map. Ints are accepted for float features.
    pub fn set_feature(&self, name: &str, value: &FeatureValue) -> Result<()> {
        let kind = self.known_kind(name)?;
        match (kind, value) {
            (FeatureKind::Int, FeatureValue::Int(v)) => self.device.set_int(name, *v)?,
            (FeatureKind::Float, FeatureValue::Float(v)) => self.device.set_float(name, *v)?,
            (FeatureKind::Float, FeatureValue::Int(v)) => self.device.set_float(name, *v as f64)?,
            (FeatureKind::Bool, FeatureValue::Bool(v)) => self.device.set_bool(name, *v)?,
            (FeatureKind::String, FeatureValue::Text(v)) => self.device.set_string(name, v)?,
            (FeatureKind::Enum, FeatureValue::Text(v)) => self.device.set_enum_string(name, v)?,
            (FeatureKind::Enum, FeatureValue::Int(v)) => {
                let index = usize::try_from(*v).map_err(|_| {
                    AndorError::invalid_state(format!("negative enum index {v} for '{name}'"))
                })?;
                self.device.set_enum_index(name, index)?
            }
            (kind, value) => {
                return Err(AndorError::invalid_state(format!(
                    "cannot write a {} value to {kind:?} feature '{name}'",
                    value.kind_name()
                )))
            }
        }
        Ok(())
    }

    fn known_kind(&self, name: &str) -> Result<FeatureKind> {
        feature_kind(name)
            .ok_or_else(|| AndorError::invalid_state(format!("unknown feature '{name}'")))
    }

    /// Current string value of an enum feature.
    pub fn get_enum_string(&self, feature: &str) -> Result<String> {
        let index = self.device.get_enum_index(feature)?;
        Ok(self.device.get_enum_string_by_index(feature, index)?)
    }

    /// All enumerated values of an enum feature.
    pub fn enum_values(&self, feature: &str) -> Result<Vec<String>> {
        let count = self.device.get_enum_count(feature)?;
        (0..count)
            .map(|i| Ok(self.device.get_enum_string_by_index(feature, i)?))
            .collect()
    }

    // --- acquisition engine features ---

    /// `FrameCount`
    pub fn frame_count(&self) -> Result<i64> {
        Ok(self.device.get_int(FRAME_COUNT)?)
    }

    /// Write `FrameCount`.
    pub fn set_frame_count(&self, count: i64) -> Result<()> {
        Ok(self.device.set_int(FRAME_COUNT, count)?)
    }

    /// Largest frame count the device accepts.
    pub fn frame_count_max(&self) -> Result<i64> {
        Ok(self.device.get_int_max(FRAME_COUNT)?)
    }

    /// Write `CycleMode`.
    pub fn set_cycle_mode(&self, mode: CycleMode) -> Result<()> {
        Ok(self.device.set_enum_string(CYCLE_MODE, mode.as_str())?)
    }

    /// Bytes per frame buffer, `ImageSizeBytes`.
    pub fn image_size_bytes(&self) -> Result<usize> {
        let size = self.device.get_int(IMAGE_SIZE_BYTES)?;
        usize::try_from(size)
            .map_err(|_| AndorError::invalid_state(format!("device reports image size {size}")))
    }

    /// Whether the device reports an acquisition in progress.
    pub fn camera_acquiring(&self) -> Result<bool> {
        Ok(self.device.get_bool(CAMERA_ACQUIRING)?)
    }

    /// `MetadataEnable`, treated as off when the camera does not implement it.
    pub fn metadata_enabled(&self) -> Result<bool> {
        if !self.device.is_implemented(METADATA_ENABLE)? {
            return Ok(false);
        }
        Ok(self.device.get_bool(METADATA_ENABLE)?)
    }

    /// Write `MetadataEnable`.
    pub fn set_metadata_enabled(&self, enabled: bool) -> Result<()> {
        Ok(self.device.set_bool(METADATA_ENABLE, enabled)?)
    }

    /// Row stride in bytes.
    pub fn aoi_stride(&self) -> Result<usize> {
        self.get_usize(AOI_STRIDE)
    }

    /// AOI width in pixels.
    pub fn aoi_width(&self) -> Result<usize> {
        self.get_usize(AOI_WIDTH)
    }

    /// AOI height in pixels.
    pub fn aoi_height(&self) -> Result<usize> {
        self.get_usize(AOI_HEIGHT)
    }

    /// Bytes per pixel of the current encoding, 1.5 for packed 12 bit.
    pub fn bytes_per_pixel(&self) -> Result<f64> {
        Ok(self.device.get_float(BYTES_PER_PIXEL)?)
    }

    fn get_usize(&self, feature: &str) -> Result<usize> {
        let value = self.device.get_int(feature)?;
        usize::try_from(value)
            .map_err(|_| AndorError::invalid_state(format!("{feature} is negative ({value})")))
    }

    /// Run the `AcquisitionStart` command.
    pub fn start_acquisition(&self) -> Result<()> {
        Ok(self.device.command(ACQUISITION_START)?)
    }

    /// Run the `AcquisitionStop` command.
    pub fn stop_acquisition(&self) -> Result<()> {
        Ok(self.device.command(ACQUISITION_STOP)?)
    }

    /// Turn on delivery of `BufferOverflowEvent` where the camera supports event selection.
    pub fn enable_overflow_event(&self) -> Result<()> {
        if self.device.is_implemented(EVENT_SELECTOR)? {
            self.device
                .set_enum_string(EVENT_SELECTOR, BUFFER_OVERFLOW_EVENT)?;
            self.device.set_bool(EVENT_ENABLE, true)?;
        } else {
            tracing::debug!("Camera has no EventSelector; relying on default event delivery");
        }
        Ok(())
    }

    /// Register a callback on `BufferOverflowEvent`.
    pub fn register_overflow_callback(&self, callback: FeatureCallback) -> Result<CallbackId> {
        Ok(self
            .device
            .register_feature_callback(BUFFER_OVERFLOW_EVENT, callback)?)
    }

    /// Remove a callback registered with [`Self::register_overflow_callback`].
    pub fn unregister_overflow_callback(&self, id: CallbackId) -> Result<()> {
        Ok(self
            .device
            .unregister_feature_callback(BUFFER_OVERFLOW_EVENT, id)?)
    }

    // --- simple pass-throughs ---

    /// Exposure time in seconds.
    pub fn exposure_time(&self) -> Result<f64> {
        Ok(self.device.get_float(EXPOSURE_TIME)?)
    }

    /// Set the exposure time in seconds.
    pub fn set_exposure_time(&self, seconds: f64) -> Result<()> {
        Ok(self.device.set_float(EXPOSURE_TIME, seconds)?)
    }

    /// Frame rate in Hz.
    pub fn frame_rate(&self) -> Result<f64> {
        Ok(self.device.get_float(FRAME_RATE)?)
    }

    /// Set the frame rate in Hz.
    pub fn set_frame_rate(&self, hz: f64) -> Result<()> {
        Ok(self.device.set_float(FRAME_RATE, hz)?)
    }

    /// `(min, max)` frame rate for the current settings.
    pub fn frame_rate_range(&self) -> Result<(f64, f64)> {
        Ok((
            self.device.get_float_min(FRAME_RATE)?,
            self.device.get_float_max(FRAME_RATE)?,
        ))
    }

    /// Current trigger mode.
    pub fn trigger_mode(&self) -> Result<TriggerMode> {
        let value = self.get_enum_string(TRIGGER_MODE)?;
        TriggerMode::from_sdk(&value)
            .ok_or_else(|| AndorError::invalid_state(format!("unknown trigger mode '{value}'")))
    }

    /// Select the trigger mode.
    pub fn set_trigger_mode(&self, mode: TriggerMode) -> Result<()> {
        Ok(self.device.set_enum_string(TRIGGER_MODE, mode.as_str())?)
    }

    /// Current AOI.
    pub fn aoi(&self) -> Result<Aoi> {
        Ok(Aoi {
            left: self.device.get_int(AOI_LEFT)?,
            top: self.device.get_int(AOI_TOP)?,
            width: self.device.get_int(AOI_WIDTH)?,
            height: self.device.get_int(AOI_HEIGHT)?,
        })
    }

    /// Apply an AOI. Size goes first so the offsets stay within range.
    pub fn set_aoi(&self, aoi: Aoi) -> Result<()> {
        self.device.set_int(AOI_WIDTH, aoi.width)?;
        self.device.set_int(AOI_LEFT, aoi.left)?;
        self.device.set_int(AOI_HEIGHT, aoi.height)?;
        self.device.set_int(AOI_TOP, aoi.top)?;
        Ok(())
    }

    /// `PixelEncoding` as a string, e.g. `Mono12Packed`.
    pub fn pixel_encoding(&self) -> Result<String> {
        self.get_enum_string(PIXEL_ENCODING)
    }

    /// Select the pixel encoding by name.
    pub fn set_pixel_encoding(&self, encoding: &str) -> Result<()> {
        Ok(self.device.set_enum_string(PIXEL_ENCODING, encoding)?)
    }

    /// Switch sensor cooling.
    pub fn set_cooling(&self, enabled: bool) -> Result<()> {
        Ok(self.device.set_bool(SENSOR_COOLING, enabled)?)
    }

    /// Whether sensor cooling is on.
    pub fn cooling(&self) -> Result<bool> {
        Ok(self.device.get_bool(SENSOR_COOLING)?)
    }

    /// Sensor temperature in degrees Celsius.
    pub fn temperature(&self) -> Result<f64> {
        Ok(self.device.get_float(SENSOR_TEMPERATURE)?)
    }

    /// `TemperatureStatus`, e.g. `Stabilised`.
    pub fn temperature_status(&self) -> Result<String> {
        self.get_enum_string(TEMPERATURE_STATUS)
    }

    /// Model, serial number and sensor size.
    pub fn camera_info(&self) -> Result<CameraInfo> {
        Ok(CameraInfo {
            model: self.device.get_string(CAMERA_MODEL)?,
            serial_number: self.device.get_string(SERIAL_NUMBER)?,
            sensor_size: (
                self.device.get_int(SENSOR_WIDTH)?,
                self.device.get_int(SENSOR_HEIGHT)?,
            ),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feature_kind_map() {
        assert_eq!(feature_kind(FRAME_COUNT), Some(FeatureKind::Int));
        assert_eq!(feature_kind(BYTES_PER_PIXEL), Some(FeatureKind::Float));
        assert_eq!(feature_kind(ACQUISITION_START), Some(FeatureKind::Command));
        assert_eq!(feature_kind("NoSuchFeature"), None);
    }

    #[test]
    fn test_trigger_mode_names() {
        for mode in [
            TriggerMode::Internal,
            TriggerMode::Software,
            TriggerMode::External,
            TriggerMode::ExternalStart,
            TriggerMode::ExternalExposure,
        ] {
            assert_eq!(TriggerMode::from_sdk(mode.as_str()), Some(mode));
        }
        assert_eq!(TriggerMode::from_sdk("Bogus"), None);
    }

    #[test]
    fn test_feature_value_json() {
        let value = serde_json::to_value(FeatureValue::Float(0.5)).unwrap();
        assert_eq!(value, serde_json::json!(0.5));
        let text: FeatureValue = serde_json::from_value(serde_json::json!("Mono16")).unwrap();
        assert_eq!(text, FeatureValue::Text("Mono16".into()));
    }
}
