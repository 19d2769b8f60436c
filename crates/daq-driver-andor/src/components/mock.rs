//! Simulated SDK3 library and camera.
//!
//! [`MockCamera`] implements [`Sdk3Device`] in-process: a feature store with
//! ranges and enum options, a frame generator thread paced by `FrameRate`
//! that fills queued buffers in queue order, and `BufferOverflowEvent`
//! callbacks when a frame is due but no buffer is queued.
//!
//! Frames carry a deterministic pattern (see [`MockCamera::pixel_value`]) in
//! the current `PixelEncoding`, optional row padding, and, with
//! `MetadataEnable`, the image/timestamp/frame-info chunks real cameras append.

use parking_lot::{Condvar, Mutex};
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::components::decoder::{
    pack_mono12, push_chunk, BytesPerPixel, CHUNK_FRAME_INFO, CHUNK_IMAGE, CHUNK_TIMESTAMP,
};
use crate::components::features as f;
use crate::components::sdk::{
    codes, CallbackId, FeatureCallback, Sdk3Device, Sdk3Library, SdkError, SdkResult,
    SharedBuffer, WaitedBuffer,
};

/// Encodings offered by the simulated sensor, in enum index order.
pub const PIXEL_ENCODINGS: &[&str] = &["Mono8", "Mono12", "Mono12Packed", "Mono16", "Mono32"];

const TRIGGER_MODES: &[&str] = &[
    "Internal",
    "Software",
    "External",
    "External Start",
    "External Exposure",
];
const TEMPERATURE_STATES: &[&str] = &[
    "Cooler Off",
    "Stabilised",
    "Cooling",
    "Drift",
    "Not Stabilised",
    "Fault",
];
const EVENTS: &[&str] = &[
    "ExposureEndEvent",
    "ExposureStartEvent",
    "BufferOverflowEvent",
    "RowNo1Event",
];

const TIMESTAMP_BASE: u64 = 1_000_000;
const TICKS_PER_FRAME: u64 = 1_000;

// =============================================================================
// Library
// =============================================================================

/// Simulated `atcore` library with a fixed set of cameras.
pub struct MockSdk3Library {
    cameras: Vec<Arc<MockCamera>>,
    initialised: AtomicBool,
    initialise_calls: AtomicU64,
}

impl MockSdk3Library {
    /// Library exposing `camera_count` default cameras.
    pub fn new(camera_count: usize) -> Self {
        let cameras = (0..camera_count)
            .map(|i| {
                MockCamera::with_identity(&format!("SIMCAM {}", 100 + i), &format!("SIM-{i:04}"))
            })
            .collect();
        Self::with_cameras(cameras)
    }

    /// Library over prebuilt cameras.
    pub fn with_cameras(cameras: Vec<Arc<MockCamera>>) -> Self {
        Self {
            cameras,
            initialised: AtomicBool::new(false),
            initialise_calls: AtomicU64::new(0),
        }
    }

    /// Direct handle on a simulated camera, for fault injection.
    pub fn camera(&self, index: usize) -> Option<Arc<MockCamera>> {
        self.cameras.get(index).cloned()
    }

    /// Whether `initialise` ran without a matching `finalise`.
    pub fn is_initialised(&self) -> bool {
        self.initialised.load(Ordering::SeqCst)
    }

    /// Number of `initialise` calls so far.
    pub fn initialise_calls(&self) -> u64 {
        self.initialise_calls.load(Ordering::SeqCst)
    }

    fn require_initialised(&self, function: &str) -> SdkResult<()> {
        if self.is_initialised() {
            Ok(())
        } else {
            Err(SdkError::new(function, codes::AT_ERR_NOTINITIALISED))
        }
    }
}

impl Sdk3Library for MockSdk3Library {
    fn initialise(&self) -> SdkResult<()> {
        self.initialised.store(true, Ordering::SeqCst);
        self.initialise_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn finalise(&self) -> SdkResult<()> {
        self.require_initialised("AT_FinaliseLibrary")?;
        for camera in &self.cameras {
            camera.halt();
        }
        self.initialised.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn device_count(&self) -> SdkResult<usize> {
        self.require_initialised("AT_GetInt(DeviceCount)")?;
        Ok(self.cameras.len())
    }

    fn open(&self, index: usize) -> SdkResult<Arc<dyn Sdk3Device>> {
        self.require_initialised("AT_Open")?;
        let camera = self
            .cameras
            .get(index)
            .ok_or_else(|| SdkError::new("AT_Open", codes::AT_ERR_OUTOFRANGE))?;
        Ok(Arc::clone(camera) as Arc<dyn Sdk3Device>)
    }
}

// =============================================================================
// Feature Store
// =============================================================================

#[derive(Debug, Clone)]
enum Value {
    Int { value: i64, min: i64, max: i64 },
    Float { value: f64, min: f64, max: f64 },
    Bool(bool),
    Text(String),
    Enum { index: usize, options: Vec<String> },
    Command,
}

#[derive(Debug, Clone)]
struct Feature {
    value: Value,
    writable: bool,
    implemented: bool,
}

#[derive(Debug, Default)]
struct FeatureStore {
    features: BTreeMap<String, Feature>,
}

impl FeatureStore {
    fn insert(&mut self, name: &str, value: Value, writable: bool) {
        self.features.insert(
            name.to_string(),
            Feature {
                value,
                writable,
                implemented: true,
            },
        );
    }

    fn int(&mut self, name: &str, value: i64, min: i64, max: i64) {
        self.insert(name, Value::Int { value, min, max }, true);
    }

    fn float(&mut self, name: &str, value: f64, min: f64, max: f64) {
        self.insert(name, Value::Float { value, min, max }, true);
    }

    fn enumerated(&mut self, name: &str, index: usize, options: &[&str]) {
        let options = options.iter().map(|s| s.to_string()).collect();
        self.insert(name, Value::Enum { index, options }, true);
    }

    fn get(&self, function: &str, name: &str) -> SdkResult<&Feature> {
        self.features
            .get(name)
            .filter(|feature| feature.implemented)
            .ok_or_else(|| SdkError::new(function, codes::AT_ERR_NOTIMPLEMENTED))
    }

    fn get_writable(&mut self, function: &str, name: &str) -> SdkResult<&mut Feature> {
        let feature = self
            .features
            .get_mut(name)
            .filter(|feature| feature.implemented)
            .ok_or_else(|| SdkError::new(function, codes::AT_ERR_NOTIMPLEMENTED))?;
        if !feature.writable {
            return Err(SdkError::new(function, codes::AT_ERR_NOTWRITABLE));
        }
        Ok(feature)
    }

    fn int_value(&self, name: &str) -> i64 {
        match self.features.get(name).map(|f| &f.value) {
            Some(Value::Int { value, .. }) => *value,
            _ => 0,
        }
    }

    fn float_value(&self, name: &str) -> f64 {
        match self.features.get(name).map(|f| &f.value) {
            Some(Value::Float { value, .. }) => *value,
            _ => 0.0,
        }
    }

    fn bool_value(&self, name: &str) -> bool {
        matches!(self.features.get(name).map(|f| &f.value), Some(Value::Bool(true)))
    }

    fn enum_text(&self, name: &str) -> Option<&str> {
        match self.features.get(name).map(|f| &f.value) {
            Some(Value::Enum { index, options }) => options.get(*index).map(String::as_str),
            _ => None,
        }
    }

    fn set_enum_index_of(&mut self, name: &str, new_index: usize) {
        if let Some(Feature {
            value: Value::Enum { index, .. },
            ..
        }) = self.features.get_mut(name)
        {
            *index = new_index;
        }
    }
}

/// Layout of the frames the generator produces.
#[derive(Debug, Clone)]
struct FramePlan {
    encoding: String,
    width: usize,
    height: usize,
    stride: usize,
    metadata: bool,
    image_size: usize,
    frame_count: u64,
    period: Duration,
}

fn encoding_bytes_per_pixel(encoding: &str) -> BytesPerPixel {
    match encoding {
        "Mono8" => BytesPerPixel::One,
        "Mono12Packed" => BytesPerPixel::OneAndHalf,
        "Mono32" => BytesPerPixel::Four,
        _ => BytesPerPixel::Two,
    }
}

fn encoding_code(encoding: &str) -> u8 {
    PIXEL_ENCODINGS
        .iter()
        .position(|e| *e == encoding)
        .map_or(0, |i| i as u8)
}

// =============================================================================
// Camera
// =============================================================================

#[derive(Default)]
struct BufferQueues {
    queued: VecDeque<SharedBuffer>,
    done: VecDeque<WaitedBuffer>,
}

#[derive(Default)]
struct Faults {
    wait_error: Option<i32>,
    queue_error: Option<i32>,
}

struct Generator {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

/// Simulated SDK3 camera.
pub struct MockCamera {
    this: Weak<MockCamera>,
    store: Mutex<FeatureStore>,
    queues: Mutex<BufferQueues>,
    filled: Condvar,
    callbacks: Mutex<Vec<(String, CallbackId, FeatureCallback)>>,
    next_callback: AtomicU64,
    generator: Mutex<Option<Generator>>,
    acquiring: AtomicBool,
    row_padding: AtomicU64,
    faults: Mutex<Faults>,
    frames_generated: AtomicU64,
    overflow_events: AtomicU64,
}

impl MockCamera {
    /// Camera with a 256 x 256 sensor.
    pub fn new() -> Arc<Self> {
        Self::with_identity("SIMCAM 100", "SIM-0000")
    }

    /// Camera with a 256 x 256 sensor and the given identity.
    pub fn with_identity(model: &str, serial: &str) -> Arc<Self> {
        Self::build(model, serial, (256, 256))
    }

    /// Camera with a custom sensor size.
    pub fn with_sensor(width: i64, height: i64) -> Arc<Self> {
        Self::build("SIMCAM 100", "SIM-0000", (width, height))
    }

    fn build(model: &str, serial: &str, (sensor_w, sensor_h): (i64, i64)) -> Arc<Self> {
        let mut store = FeatureStore::default();
        store.int(f::FRAME_COUNT, 1, 1, i64::from(i32::MAX));
        store.enumerated(f::CYCLE_MODE, 0, &["Fixed", "Continuous"]);
        store.insert(f::IMAGE_SIZE_BYTES, Value::Int { value: 0, min: 0, max: i64::MAX }, false);
        store.insert(f::CAMERA_ACQUIRING, Value::Bool(false), false);
        store.insert(f::METADATA_ENABLE, Value::Bool(false), true);
        store.insert(f::AOI_STRIDE, Value::Int { value: 0, min: 0, max: i64::MAX }, false);
        store.int(f::AOI_WIDTH, sensor_w, 1, sensor_w);
        store.int(f::AOI_HEIGHT, sensor_h, 1, sensor_h);
        store.int(f::AOI_LEFT, 1, 1, sensor_w);
        store.int(f::AOI_TOP, 1, 1, sensor_h);
        store.insert(f::BYTES_PER_PIXEL, Value::Float { value: 2.0, min: 1.0, max: 4.0 }, false);
        store.enumerated(f::PIXEL_ENCODING, 3, PIXEL_ENCODINGS);
        store.insert(f::ACQUISITION_START, Value::Command, true);
        store.insert(f::ACQUISITION_STOP, Value::Command, true);
        store.enumerated(f::EVENT_SELECTOR, 0, EVENTS);
        store.insert(f::EVENT_ENABLE, Value::Bool(false), true);
        store.insert(
            f::BUFFER_OVERFLOW_EVENT,
            Value::Int {
                value: 0,
                min: 0,
                max: i64::MAX,
            },
            false,
        );
        store.float(f::EXPOSURE_TIME, 0.01, 1e-5, 30.0);
        store.float(f::FRAME_RATE, 100.0, 0.1, 20_000.0);
        store.enumerated(f::TRIGGER_MODE, 0, TRIGGER_MODES);
        store.insert(f::SENSOR_COOLING, Value::Bool(false), true);
        store.insert(
            f::SENSOR_TEMPERATURE,
            Value::Float {
                value: 20.0,
                min: -100.0,
                max: 50.0,
            },
            false,
        );
        let temperature_states = TEMPERATURE_STATES.iter().map(|s| s.to_string()).collect();
        store.insert(
            f::TEMPERATURE_STATUS,
            Value::Enum {
                index: 0,
                options: temperature_states,
            },
            false,
        );
        store.insert(f::CAMERA_MODEL, Value::Text(model.to_string()), false);
        store.insert(f::SERIAL_NUMBER, Value::Text(serial.to_string()), false);
        for (name, size) in [(f::SENSOR_WIDTH, sensor_w), (f::SENSOR_HEIGHT, sensor_h)] {
            let fixed = Value::Int {
                value: size,
                min: size,
                max: size,
            };
            store.insert(name, fixed, false);
        }

        Arc::new_cyclic(|this| Self {
            this: this.clone(),
            store: Mutex::new(store),
            queues: Mutex::new(BufferQueues::default()),
            filled: Condvar::new(),
            callbacks: Mutex::new(Vec::new()),
            next_callback: AtomicU64::new(1),
            generator: Mutex::new(None),
            acquiring: AtomicBool::new(false),
            row_padding: AtomicU64::new(0),
            faults: Mutex::new(Faults::default()),
            frames_generated: AtomicU64::new(0),
            overflow_events: AtomicU64::new(0),
        })
    }

    // --- test controls ---

    /// Extra bytes appended to every row.
    pub fn set_row_padding(&self, bytes: usize) {
        self.row_padding.store(bytes as u64, Ordering::SeqCst);
    }

    /// Make every `wait_buffer` fail with `code` (`None` clears).
    pub fn inject_wait_error(&self, code: Option<i32>) {
        self.faults.lock().wait_error = code;
    }

    /// Make every `queue_buffer` fail with `code` (`None` clears).
    pub fn inject_queue_error(&self, code: Option<i32>) {
        self.faults.lock().queue_error = code;
    }

    /// Mark a feature as not implemented by this camera model.
    pub fn remove_feature(&self, name: &str) {
        if let Some(feature) = self.store.lock().features.get_mut(name) {
            feature.implemented = false;
        }
    }

    /// Fire the callbacks registered for `feature`.
    pub fn raise_event(&self, feature: &str) {
        let callbacks: Vec<FeatureCallback> = self
            .callbacks
            .lock()
            .iter()
            .filter(|(name, _, _)| name == feature)
            .map(|(_, _, callback)| Arc::clone(callback))
            .collect();
        for callback in callbacks {
            callback(feature);
        }
    }

    /// Frames written since construction.
    pub fn frames_generated(&self) -> u64 {
        self.frames_generated.load(Ordering::SeqCst)
    }

    /// Overflow events fired since construction.
    pub fn overflow_events(&self) -> u64 {
        self.overflow_events.load(Ordering::SeqCst)
    }

    /// Buffers currently queued.
    pub fn queued_buffers(&self) -> usize {
        self.queues.lock().queued.len()
    }

    /// Registered feature callbacks.
    pub fn callback_count(&self) -> usize {
        self.callbacks.lock().len()
    }

    /// Pattern value of `(row, col)` in generated frame `frame` for `encoding`.
    pub fn pixel_value(encoding: &str, frame: u64, row: usize, col: usize) -> u32 {
        let raw = frame
            .wrapping_mul(7)
            .wrapping_add(row as u64 * 3)
            .wrapping_add(col as u64) as u32;
        match encoding {
            "Mono8" => raw & 0xFF,
            "Mono12" | "Mono12Packed" => raw & 0x0FFF,
            "Mono16" => raw & 0xFFFF,
            _ => raw.wrapping_mul(65_537),
        }
    }

    /// Device timestamp written into frame `frame`'s metadata.
    pub fn timestamp_of(frame: u64) -> u64 {
        TIMESTAMP_BASE + frame * TICKS_PER_FRAME
    }

    // --- geometry ---

    fn plan(&self, store: &FeatureStore) -> FramePlan {
        let encoding = store.enum_text(f::PIXEL_ENCODING).unwrap_or("Mono16").to_string();
        let width = store.int_value(f::AOI_WIDTH).max(1) as usize;
        let height = store.int_value(f::AOI_HEIGHT).max(1) as usize;
        let stride = encoding_bytes_per_pixel(&encoding).min_row_bytes(width)
            + self.row_padding.load(Ordering::SeqCst) as usize;
        let metadata = store.bool_value(f::METADATA_ENABLE);
        let mut image_size = stride * height;
        if metadata {
            // image trailer + timestamp chunk + frame-info chunk
            image_size += 8 + (8 + 8) + (8 + 8);
        }
        let rate = store.float_value(f::FRAME_RATE).max(0.1);
        FramePlan {
            encoding,
            width,
            height,
            stride,
            metadata,
            image_size,
            frame_count: store.int_value(f::FRAME_COUNT).max(1) as u64,
            period: Duration::from_secs_f64(1.0 / rate),
        }
    }

    fn render(plan: &FramePlan, frame: u64) -> Vec<u8> {
        let mut image = Vec::with_capacity(plan.stride * plan.height);
        for row in 0..plan.height {
            let start = image.len();
            let values =
                (0..plan.width).map(|col| Self::pixel_value(&plan.encoding, frame, row, col));
            match plan.encoding.as_str() {
                "Mono8" => image.extend(values.map(|v| v as u8)),
                "Mono12Packed" => {
                    let row_values: Vec<u16> = values.map(|v| v as u16).collect();
                    image.extend(pack_mono12(&row_values));
                }
                "Mono32" => image.extend(values.flat_map(u32::to_le_bytes)),
                _ => image.extend(values.flat_map(|v| (v as u16).to_le_bytes())),
            }
            image.resize(start + plan.stride, 0);
        }
        if !plan.metadata {
            return image;
        }

        let mut info = Vec::with_capacity(8);
        info.extend_from_slice(&0u16.to_le_bytes());
        info.push(0);
        info.push(encoding_code(&plan.encoding));
        info.extend_from_slice(&(plan.width as u16).to_le_bytes());
        info.extend_from_slice(&(plan.height as u16).to_le_bytes());

        let mut raw = Vec::with_capacity(plan.image_size);
        push_chunk(&mut raw, CHUNK_IMAGE, &image);
        push_chunk(&mut raw, CHUNK_TIMESTAMP, &Self::timestamp_of(frame).to_le_bytes());
        push_chunk(&mut raw, CHUNK_FRAME_INFO, &info);
        raw
    }

    // --- acquisition ---

    fn start_generator(&self) -> SdkResult<()> {
        let mut generator = self.generator.lock();
        if generator.is_some() {
            return Err(SdkError::new("AT_Command(AcquisitionStart)", codes::AT_ERR_NOTWRITABLE));
        }
        let Some(camera) = self.this.upgrade() else {
            return Err(SdkError::new("AT_Command(AcquisitionStart)", codes::AT_ERR_INVALIDHANDLE));
        };
        let plan = self.plan(&self.store.lock());
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);

        self.acquiring.store(true, Ordering::SeqCst);
        let handle = std::thread::Builder::new()
            .name("mock-andor-gen".into())
            .spawn(move || camera.generate(plan, &stop_flag))
            .map_err(|_| {
                self.acquiring.store(false, Ordering::SeqCst);
                SdkError::new("AT_Command(AcquisitionStart)", codes::AT_ERR_NOMEMORY)
            })?;
        *generator = Some(Generator { stop, handle });
        Ok(())
    }

    fn generate(&self, plan: FramePlan, stop: &AtomicBool) {
        tracing::debug!(
            frames = plan.frame_count,
            encoding = %plan.encoding,
            "Mock generator started"
        );
        let started = Instant::now();
        for frame in 0..plan.frame_count {
            let due = started + plan.period.mul_f64((frame + 1) as f64);
            loop {
                if stop.load(Ordering::SeqCst) {
                    self.acquiring.store(false, Ordering::SeqCst);
                    return;
                }
                let now = Instant::now();
                if now >= due {
                    break;
                }
                std::thread::sleep((due - now).min(Duration::from_millis(5)));
            }

            let buffer = self.queues.lock().queued.pop_front();
            self.frames_generated.fetch_add(1, Ordering::SeqCst);
            match buffer {
                Some(buffer) => {
                    let raw = Self::render(&plan, frame);
                    buffer.write_with(|bytes| {
                        let n = raw.len().min(bytes.len());
                        bytes[..n].copy_from_slice(&raw[..n]);
                    });
                    self.queues.lock().done.push_back(WaitedBuffer {
                        buffer_id: buffer.id(),
                        size: plan.image_size,
                    });
                    self.filled.notify_all();
                }
                None => {
                    self.overflow_events.fetch_add(1, Ordering::SeqCst);
                    self.raise_event(f::BUFFER_OVERFLOW_EVENT);
                }
            }
        }
        self.acquiring.store(false, Ordering::SeqCst);
        tracing::debug!("Mock generator finished");
    }

    fn stop_generator(&self) {
        let generator = self.generator.lock().take();
        if let Some(generator) = generator {
            generator.stop.store(true, Ordering::SeqCst);
            if generator.handle.join().is_err() {
                tracing::error!("Mock generator panicked");
            }
        }
        self.acquiring.store(false, Ordering::SeqCst);
    }

    /// Stop generating and drop all buffers.
    fn halt(&self) {
        self.stop_generator();
        let mut queues = self.queues.lock();
        queues.queued.clear();
        queues.done.clear();
    }

    fn set_cooling(store: &mut FeatureStore, enabled: bool) {
        let (temperature, status) = if enabled { (-25.0, 1) } else { (20.0, 0) };
        if let Some(Feature {
            value: Value::Float { value, .. },
            ..
        }) = store.features.get_mut(f::SENSOR_TEMPERATURE)
        {
            *value = temperature;
        }
        store.set_enum_index_of(f::TEMPERATURE_STATUS, status);
    }
}

impl Sdk3Device for MockCamera {
    fn is_implemented(&self, feature: &str) -> SdkResult<bool> {
        Ok(self
            .store
            .lock()
            .features
            .get(feature)
            .is_some_and(|f| f.implemented))
    }

    fn is_readable(&self, feature: &str) -> SdkResult<bool> {
        let store = self.store.lock();
        Ok(store
            .features
            .get(feature)
            .is_some_and(|f| f.implemented && !matches!(f.value, Value::Command)))
    }

    fn is_writable(&self, feature: &str) -> SdkResult<bool> {
        let store = self.store.lock();
        Ok(store
            .features
            .get(feature)
            .is_some_and(|f| f.implemented && f.writable))
    }

    fn get_int(&self, feature: &str) -> SdkResult<i64> {
        let store = self.store.lock();
        let entry = store.get("AT_GetInt", feature)?;
        match feature {
            f::IMAGE_SIZE_BYTES => return Ok(self.plan(&store).image_size as i64),
            f::AOI_STRIDE => return Ok(self.plan(&store).stride as i64),
            _ => {}
        }
        match entry.value {
            Value::Int { value, .. } => Ok(value),
            _ => Err(SdkError::new("AT_GetInt", codes::AT_ERR_NOTIMPLEMENTED)),
        }
    }

    fn set_int(&self, feature: &str, value: i64) -> SdkResult<()> {
        let mut store = self.store.lock();
        match &mut store.get_writable("AT_SetInt", feature)?.value {
            Value::Int { value: current, min, max } => {
                if value < *min || value > *max {
                    return Err(SdkError::new("AT_SetInt", codes::AT_ERR_OUTOFRANGE));
                }
                *current = value;
                Ok(())
            }
            _ => Err(SdkError::new("AT_SetInt", codes::AT_ERR_NOTIMPLEMENTED)),
        }
    }

    fn get_int_min(&self, feature: &str) -> SdkResult<i64> {
        match self.store.lock().get("AT_GetIntMin", feature)?.value {
            Value::Int { min, .. } => Ok(min),
            _ => Err(SdkError::new("AT_GetIntMin", codes::AT_ERR_NOTIMPLEMENTED)),
        }
    }

    fn get_int_max(&self, feature: &str) -> SdkResult<i64> {
        match self.store.lock().get("AT_GetIntMax", feature)?.value {
            Value::Int { max, .. } => Ok(max),
            _ => Err(SdkError::new("AT_GetIntMax", codes::AT_ERR_NOTIMPLEMENTED)),
        }
    }

    fn get_float(&self, feature: &str) -> SdkResult<f64> {
        let store = self.store.lock();
        let entry = store.get("AT_GetFloat", feature)?;
        if feature == f::BYTES_PER_PIXEL {
            let encoding = store.enum_text(f::PIXEL_ENCODING).unwrap_or("Mono16");
            return Ok(encoding_bytes_per_pixel(encoding).value());
        }
        match entry.value {
            Value::Float { value, .. } => Ok(value),
            _ => Err(SdkError::new("AT_GetFloat", codes::AT_ERR_NOTIMPLEMENTED)),
        }
    }

    fn set_float(&self, feature: &str, value: f64) -> SdkResult<()> {
        let mut store = self.store.lock();
        match &mut store.get_writable("AT_SetFloat", feature)?.value {
            Value::Float { value: current, min, max } => {
                if value < *min || value > *max {
                    return Err(SdkError::new("AT_SetFloat", codes::AT_ERR_OUTOFRANGE));
                }
                *current = value;
                Ok(())
            }
            _ => Err(SdkError::new("AT_SetFloat", codes::AT_ERR_NOTIMPLEMENTED)),
        }
    }

    fn get_float_min(&self, feature: &str) -> SdkResult<f64> {
        match self.store.lock().get("AT_GetFloatMin", feature)?.value {
            Value::Float { min, .. } => Ok(min),
            _ => Err(SdkError::new("AT_GetFloatMin", codes::AT_ERR_NOTIMPLEMENTED)),
        }
    }

    fn get_float_max(&self, feature: &str) -> SdkResult<f64> {
        match self.store.lock().get("AT_GetFloatMax", feature)?.value {
            Value::Float { max, .. } => Ok(max),
            _ => Err(SdkError::new("AT_GetFloatMax", codes::AT_ERR_NOTIMPLEMENTED)),
        }
    }

    fn get_bool(&self, feature: &str) -> SdkResult<bool> {
        let store = self.store.lock();
        let entry = store.get("AT_GetBool", feature)?;
        if feature == f::CAMERA_ACQUIRING {
            return Ok(self.acquiring.load(Ordering::SeqCst));
        }
        match entry.value {
            Value::Bool(value) => Ok(value),
            _ => Err(SdkError::new("AT_GetBool", codes::AT_ERR_NOTIMPLEMENTED)),
        }
    }

    fn set_bool(&self, feature: &str, value: bool) -> SdkResult<()> {
        let mut store = self.store.lock();
        match &mut store.get_writable("AT_SetBool", feature)?.value {
            Value::Bool(current) => *current = value,
            _ => return Err(SdkError::new("AT_SetBool", codes::AT_ERR_NOTIMPLEMENTED)),
        }
        if feature == f::SENSOR_COOLING {
            Self::set_cooling(&mut store, value);
        }
        Ok(())
    }

    fn get_string(&self, feature: &str) -> SdkResult<String> {
        match &self.store.lock().get("AT_GetString", feature)?.value {
            Value::Text(value) => Ok(value.clone()),
            _ => Err(SdkError::new("AT_GetString", codes::AT_ERR_NOTIMPLEMENTED)),
        }
    }

    fn set_string(&self, feature: &str, value: &str) -> SdkResult<()> {
        let mut store = self.store.lock();
        match &mut store.get_writable("AT_SetString", feature)?.value {
            Value::Text(current) => {
                *current = value.to_string();
                Ok(())
            }
            _ => Err(SdkError::new("AT_SetString", codes::AT_ERR_NOTIMPLEMENTED)),
        }
    }

    fn get_enum_index(&self, feature: &str) -> SdkResult<usize> {
        match self.store.lock().get("AT_GetEnumIndex", feature)?.value {
            Value::Enum { index, .. } => Ok(index),
            _ => Err(SdkError::new("AT_GetEnumIndex", codes::AT_ERR_NOTIMPLEMENTED)),
        }
    }

    fn set_enum_index(&self, feature: &str, value: usize) -> SdkResult<()> {
        let mut store = self.store.lock();
        match &mut store.get_writable("AT_SetEnumIndex", feature)?.value {
            Value::Enum { index, options } => {
                if value >= options.len() {
                    return Err(SdkError::new("AT_SetEnumIndex", codes::AT_ERR_OUTOFRANGE));
                }
                *index = value;
                Ok(())
            }
            _ => Err(SdkError::new("AT_SetEnumIndex", codes::AT_ERR_NOTIMPLEMENTED)),
        }
    }

    fn set_enum_string(&self, feature: &str, value: &str) -> SdkResult<()> {
        let mut store = self.store.lock();
        match &mut store.get_writable("AT_SetEnumString", feature)?.value {
            Value::Enum { index, options } => {
                let position = options
                    .iter()
                    .position(|option| option == value)
                    .ok_or_else(|| {
                        SdkError::new("AT_SetEnumString", codes::AT_ERR_INDEXNOTAVAILABLE)
                    })?;
                *index = position;
                Ok(())
            }
            _ => Err(SdkError::new("AT_SetEnumString", codes::AT_ERR_NOTIMPLEMENTED)),
        }
    }

    fn get_enum_count(&self, feature: &str) -> SdkResult<usize> {
        match &self.store.lock().get("AT_GetEnumCount", feature)?.value {
            Value::Enum { options, .. } => Ok(options.len()),
            _ => Err(SdkError::new("AT_GetEnumCount", codes::AT_ERR_NOTIMPLEMENTED)),
        }
    }

    fn get_enum_string_by_index(&self, feature: &str, index: usize) -> SdkResult<String> {
        match &self.store.lock().get("AT_GetEnumStringByIndex", feature)?.value {
            Value::Enum { options, .. } => options
                .get(index)
                .cloned()
                .ok_or_else(|| SdkError::new("AT_GetEnumStringByIndex", codes::AT_ERR_OUTOFRANGE)),
            _ => Err(SdkError::new("AT_GetEnumStringByIndex", codes::AT_ERR_NOTIMPLEMENTED)),
        }
    }

    fn command(&self, feature: &str) -> SdkResult<()> {
        {
            let store = self.store.lock();
            if !matches!(store.get("AT_Command", feature)?.value, Value::Command) {
                return Err(SdkError::new("AT_Command", codes::AT_ERR_NOTIMPLEMENTED));
            }
        }
        match feature {
            f::ACQUISITION_START => self.start_generator(),
            f::ACQUISITION_STOP => {
                self.stop_generator();
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn queue_buffer(&self, buffer: SharedBuffer) -> SdkResult<()> {
        if let Some(code) = self.faults.lock().queue_error {
            return Err(SdkError::new("AT_QueueBuffer", code));
        }
        let required = self.plan(&self.store.lock()).image_size;
        if buffer.len() < required {
            return Err(SdkError::new("AT_QueueBuffer", codes::AT_ERR_INVALIDSIZE));
        }
        self.queues.lock().queued.push_back(buffer);
        Ok(())
    }

    fn wait_buffer(&self, timeout: Duration) -> SdkResult<WaitedBuffer> {
        if let Some(code) = self.faults.lock().wait_error {
            return Err(SdkError::new("AT_WaitBuffer", code));
        }
        let deadline = Instant::now().checked_add(timeout);
        let mut queues = self.queues.lock();
        loop {
            if let Some(done) = queues.done.pop_front() {
                return Ok(done);
            }
            let Some(deadline) = deadline else {
                self.filled.wait(&mut queues);
                continue;
            };
            if self.filled.wait_until(&mut queues, deadline).timed_out() {
                return queues
                    .done
                    .pop_front()
                    .ok_or_else(|| SdkError::new("AT_WaitBuffer", codes::AT_ERR_TIMEDOUT));
            }
        }
    }

    fn flush(&self) -> SdkResult<()> {
        let mut queues = self.queues.lock();
        queues.queued.clear();
        queues.done.clear();
        Ok(())
    }

    fn register_feature_callback(
        &self,
        feature: &str,
        callback: FeatureCallback,
    ) -> SdkResult<CallbackId> {
        self.store.lock().get("AT_RegisterFeatureCallback", feature)?;
        let id = CallbackId(self.next_callback.fetch_add(1, Ordering::SeqCst));
        self.callbacks
            .lock()
            .push((feature.to_string(), id, callback));
        Ok(id)
    }

    fn unregister_feature_callback(&self, feature: &str, id: CallbackId) -> SdkResult<()> {
        let mut callbacks = self.callbacks.lock();
        let before = callbacks.len();
        callbacks.retain(|(name, cb_id, _)| !(name == feature && *cb_id == id));
        if callbacks.len() == before {
            return Err(SdkError::new("AT_UnregisterFeatureCallback", codes::AT_ERR_INVALIDHANDLE));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::decoder::{decode, FrameGeometry};
    use crate::components::sdk::FrameBuffer;

    fn small_camera(encoding: &str) -> Arc<MockCamera> {
        let camera = MockCamera::new();
        camera.set_int(f::AOI_WIDTH, 5).unwrap();
        camera.set_int(f::AOI_HEIGHT, 3).unwrap();
        camera.set_enum_string(f::PIXEL_ENCODING, encoding).unwrap();
        camera.set_float(f::FRAME_RATE, 1000.0).unwrap();
        camera
    }

    fn geometry(camera: &MockCamera) -> FrameGeometry {
        FrameGeometry {
            width: camera.get_int(f::AOI_WIDTH).unwrap() as usize,
            height: camera.get_int(f::AOI_HEIGHT).unwrap() as usize,
            bytes_per_pixel: camera.get_float(f::BYTES_PER_PIXEL).unwrap(),
            stride: camera.get_int(f::AOI_STRIDE).unwrap() as usize,
            metadata_enabled: camera.get_bool(f::METADATA_ENABLE).unwrap(),
        }
    }

    fn grab_one(camera: &MockCamera) -> Vec<u8> {
        let size = camera.get_int(f::IMAGE_SIZE_BYTES).unwrap() as usize;
        camera.set_int(f::FRAME_COUNT, 1).unwrap();
        camera.queue_buffer(FrameBuffer::new(0, size)).unwrap();
        let buffer = {
            let queues = camera.queues.lock();
            Arc::clone(&queues.queued[0])
        };
        camera.command(f::ACQUISITION_START).unwrap();
        let waited = camera.wait_buffer(Duration::from_secs(2)).unwrap();
        assert_eq!(waited.size, size);
        camera.command(f::ACQUISITION_STOP).unwrap();
        buffer.to_vec()
    }

    #[test]
    fn test_generated_frames_decode_for_every_encoding() {
        for encoding in ["Mono8", "Mono12Packed", "Mono16", "Mono32"] {
            let camera = small_camera(encoding);
            camera.set_row_padding(3);
            let raw = grab_one(&camera);
            let (pixels, _) = decode(&raw, &geometry(&camera)).unwrap();
            assert_eq!(pixels.shape(), (3, 5), "{encoding}");
            for row in 0..3 {
                for col in 0..5 {
                    assert_eq!(
                        pixels.get(row, col),
                        Some(MockCamera::pixel_value(encoding, 0, row, col)),
                        "{encoding} ({row}, {col})"
                    );
                }
            }
        }
    }

    #[test]
    fn test_metadata_chunks() {
        let camera = small_camera("Mono16");
        camera.set_bool(f::METADATA_ENABLE, true).unwrap();
        let raw = grab_one(&camera);
        let (_, metadata) = decode(&raw, &geometry(&camera)).unwrap();
        assert_eq!(metadata.timestamp, Some(MockCamera::timestamp_of(0)));
        assert_eq!(metadata.size, Some((5, 3)));
        assert_eq!(metadata.pixel_type, Some(encoding_code("Mono16")));
    }

    #[test]
    fn test_overflow_event_without_queued_buffers() {
        let camera = small_camera("Mono16");
        let fired = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&fired);
        camera
            .register_feature_callback(
                f::BUFFER_OVERFLOW_EVENT,
                Arc::new(move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .unwrap();

        camera.set_int(f::FRAME_COUNT, 2).unwrap();
        camera.command(f::ACQUISITION_START).unwrap();
        let deadline = Instant::now() + Duration::from_secs(2);
        while camera.get_bool(f::CAMERA_ACQUIRING).unwrap() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(2));
        }
        camera.command(f::ACQUISITION_STOP).unwrap();
        assert_eq!(fired.load(Ordering::SeqCst), 2);
        assert_eq!(camera.overflow_events(), 2);
    }

    #[test]
    fn test_feature_rules() {
        let camera = MockCamera::new();
        assert_eq!(
            camera.set_int(f::AOI_WIDTH, 0).unwrap_err().code,
            codes::AT_ERR_OUTOFRANGE
        );
        assert_eq!(
            camera.set_int(f::IMAGE_SIZE_BYTES, 4).unwrap_err().code,
            codes::AT_ERR_NOTWRITABLE
        );
        camera.remove_feature(f::METADATA_ENABLE);
        assert!(!camera.is_implemented(f::METADATA_ENABLE).unwrap());
        assert_eq!(
            camera.get_bool(f::METADATA_ENABLE).unwrap_err().code,
            codes::AT_ERR_NOTIMPLEMENTED
        );

        camera.set_bool(f::SENSOR_COOLING, true).unwrap();
        assert!(camera.get_float(f::SENSOR_TEMPERATURE).unwrap() < 0.0);
    }

    #[test]
    fn test_wait_buffer_accepts_unbounded_timeout() {
        let camera = small_camera("Mono16");
        let size = camera.get_int(f::IMAGE_SIZE_BYTES).unwrap() as usize;
        camera.set_int(f::FRAME_COUNT, 1).unwrap();
        camera.queue_buffer(FrameBuffer::new(0, size)).unwrap();
        camera.command(f::ACQUISITION_START).unwrap();
        let waited = camera.wait_buffer(Duration::MAX).unwrap();
        assert_eq!(waited.buffer_id, 0);
        camera.command(f::ACQUISITION_STOP).unwrap();
    }

    #[test]
    fn test_undersized_buffer_is_rejected() {
        let camera = small_camera("Mono16");
        let err = camera.queue_buffer(FrameBuffer::new(0, 4)).unwrap_err();
        assert_eq!(err.code, codes::AT_ERR_INVALIDSIZE);
    }
}
