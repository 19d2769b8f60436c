//! Andor SDK3 binding boundary.
//!
//! The vendor library is reached through the [`Sdk3Library`] and
//! [`Sdk3Device`] traits. Every call is synchronous and fails with a coded
//! [`SdkError`]. Implementations wrap the native `atcore` library (or, with
//! the `mock` feature, the in-process simulated camera).
//!
//! ## Buffers
//!
//! SDK3 acquisition works on caller-owned memory: the host queues buffers
//! (`AT_QueueBuffer`), the camera fills them in queue order, and
//! `AT_WaitBuffer` hands back the next filled one. Here a buffer is a
//! [`FrameBuffer`] shared through an `Arc` between the ring (which owns the
//! set) and the device (which holds clones while queued). The device writes
//! through the buffer lock; readers copy out under the same lock.

use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// SDK3 return codes used by this crate.
pub mod codes {
    /// Call succeeded
    pub const AT_SUCCESS: i32 = 0;
    /// Library not initialised
    pub const AT_ERR_NOTINITIALISED: i32 = 1;
    /// Feature not implemented on this camera
    pub const AT_ERR_NOTIMPLEMENTED: i32 = 2;
    /// Feature is read-only
    pub const AT_ERR_READONLY: i32 = 3;
    /// Feature not readable now
    pub const AT_ERR_NOTREADABLE: i32 = 4;
    /// Feature not writable now
    pub const AT_ERR_NOTWRITABLE: i32 = 5;
    /// Value outside the feature range
    pub const AT_ERR_OUTOFRANGE: i32 = 6;
    /// Enum index not available now
    pub const AT_ERR_INDEXNOTAVAILABLE: i32 = 7;
    /// Enum index not implemented
    pub const AT_ERR_INDEXNOTIMPLEMENTED: i32 = 8;
    /// Camera connection failed
    pub const AT_ERR_CONNECTION: i32 = 10;
    /// No data available
    pub const AT_ERR_NODATA: i32 = 11;
    /// Invalid device handle
    pub const AT_ERR_INVALIDHANDLE: i32 = 12;
    /// Wait timed out
    pub const AT_ERR_TIMEDOUT: i32 = 13;
    /// Input queue is full
    pub const AT_ERR_BUFFERFULL: i32 = 14;
    /// Buffer size does not match `ImageSizeBytes`
    pub const AT_ERR_INVALIDSIZE: i32 = 15;
    /// Buffer not 8-byte aligned
    pub const AT_ERR_INVALIDALIGNMENT: i32 = 16;
    /// Communication with the camera failed
    pub const AT_ERR_COMM: i32 = 17;
    /// Out of memory
    pub const AT_ERR_NOMEMORY: i32 = 37;
    /// On-camera buffer overflowed
    pub const AT_ERR_HARDWARE_OVERFLOW: i32 = 100;
}

/// Coded failure reported by the SDK.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{function} failed with code {code} ({message})")]
pub struct SdkError {
    /// SDK entry point that failed (e.g. `AT_WaitBuffer`)
    pub function: String,
    /// Raw SDK return code
    pub code: i32,
    /// Human-readable description of the code
    pub message: String,
}

impl SdkError {
    /// Error for `function` with its code description.
    pub fn new(function: impl Into<String>, code: i32) -> Self {
        Self {
            function: function.into(),
            code,
            message: describe_code(code).to_string(),
        }
    }

    /// Timeout-class codes returned by `AT_WaitBuffer` when no frame arrived in time.
    pub fn is_timeout(&self) -> bool {
        matches!(self.code, codes::AT_ERR_TIMEDOUT | codes::AT_ERR_NODATA)
    }
}

fn describe_code(code: i32) -> &'static str {
    match code {
        codes::AT_SUCCESS => "success",
        codes::AT_ERR_NOTINITIALISED => "not initialised",
        codes::AT_ERR_NOTIMPLEMENTED => "feature not implemented",
        codes::AT_ERR_READONLY => "feature is read-only",
        codes::AT_ERR_NOTREADABLE => "feature not readable",
        codes::AT_ERR_NOTWRITABLE => "feature not writable",
        codes::AT_ERR_OUTOFRANGE => "value out of range",
        codes::AT_ERR_INDEXNOTAVAILABLE => "enum index not available",
        codes::AT_ERR_INDEXNOTIMPLEMENTED => "enum index not implemented",
        codes::AT_ERR_CONNECTION => "connection error",
        codes::AT_ERR_NODATA => "no data",
        codes::AT_ERR_INVALIDHANDLE => "invalid handle",
        codes::AT_ERR_TIMEDOUT => "timed out",
        codes::AT_ERR_BUFFERFULL => "buffer full",
        codes::AT_ERR_INVALIDSIZE => "invalid buffer size",
        codes::AT_ERR_INVALIDALIGNMENT => "invalid buffer alignment",
        codes::AT_ERR_COMM => "communication error",
        codes::AT_ERR_NOMEMORY => "out of memory",
        codes::AT_ERR_HARDWARE_OVERFLOW => "hardware overflow",
        _ => "unknown error",
    }
}

/// Result type for raw binding calls.
pub type SdkResult<T> = std::result::Result<T, SdkError>;

/// Fixed-size acquisition buffer with a stable ring id.
///
/// Besides the bytes, a buffer carries the logical frame index it holds.
/// Any device write clears the tag under the same lock readers copy under,
/// so a reader can never pair a tag with bytes from a later fill.
pub struct FrameBuffer {
    id: usize,
    slot: RwLock<SlotData>,
}

struct SlotData {
    bytes: Box<[u8]>,
    frame: Option<u64>,
}

/// Buffer shared between the ring and the device while queued.
pub type SharedBuffer = Arc<FrameBuffer>;

impl FrameBuffer {
    /// Allocate a zero-filled buffer of `len` bytes.
    pub fn new(id: usize, len: usize) -> SharedBuffer {
        Arc::new(Self {
            id,
            slot: RwLock::new(SlotData {
                bytes: vec![0u8; len].into_boxed_slice(),
                frame: None,
            }),
        })
    }

    /// Ring slot this buffer belongs to.
    pub fn id(&self) -> usize {
        self.id
    }

    /// Buffer size in bytes.
    pub fn len(&self) -> usize {
        self.slot.read().bytes.len()
    }

    /// Whether the buffer has zero length.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy the buffer contents out.
    pub fn to_vec(&self) -> Vec<u8> {
        self.slot.read().bytes.to_vec()
    }

    /// Give the filling side exclusive access to the bytes. Clears the frame tag.
    pub fn write_with<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> R {
        let mut slot = self.slot.write();
        slot.frame = None;
        f(&mut slot.bytes)
    }

    /// Logical frame index currently held, if any.
    pub fn frame(&self) -> Option<u64> {
        self.slot.read().frame
    }

    pub(crate) fn set_frame(&self, index: Option<u64>) {
        self.slot.write().frame = index;
    }

    /// Copy the bytes out if the buffer still holds frame `index`.
    ///
    /// On mismatch returns the index actually held.
    pub fn copy_frame(&self, index: u64) -> std::result::Result<Vec<u8>, Option<u64>> {
        let slot = self.slot.read();
        if slot.frame == Some(index) {
            Ok(slot.bytes.to_vec())
        } else {
            Err(slot.frame)
        }
    }
}

impl fmt::Debug for FrameBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slot = self.slot.read();
        f.debug_struct("FrameBuffer")
            .field("id", &self.id)
            .field("len", &slot.bytes.len())
            .field("frame", &slot.frame)
            .finish()
    }
}

/// A filled buffer handed back by `wait_buffer`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitedBuffer {
    /// Id of the [`FrameBuffer`] that was filled
    pub buffer_id: usize,
    /// Number of bytes the device reports as written
    pub size: usize,
}

/// Feature-change callback. Receives the name of the feature that fired.
pub type FeatureCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Token identifying a registered callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallbackId(pub u64);

/// One opened SDK3 camera handle.
///
/// Calls may come from the caller's thread and from the polling thread at the
/// same time; implementations must be internally synchronised.
pub trait Sdk3Device: Send + Sync {
    /// Whether the camera implements `feature`.
    fn is_implemented(&self, feature: &str) -> SdkResult<bool>;
    /// `AT_IsReadable`
    fn is_readable(&self, feature: &str) -> SdkResult<bool>;
    /// `AT_IsWritable`
    fn is_writable(&self, feature: &str) -> SdkResult<bool>;

    /// `AT_GetInt`
    fn get_int(&self, feature: &str) -> SdkResult<i64>;
    /// `AT_SetInt`
    fn set_int(&self, feature: &str, value: i64) -> SdkResult<()>;
    /// `AT_GetIntMin`
    fn get_int_min(&self, feature: &str) -> SdkResult<i64>;
    /// `AT_GetIntMax`
    fn get_int_max(&self, feature: &str) -> SdkResult<i64>;

    /// `AT_GetFloat`
    fn get_float(&self, feature: &str) -> SdkResult<f64>;
    /// `AT_SetFloat`
    fn set_float(&self, feature: &str, value: f64) -> SdkResult<()>;
    /// `AT_GetFloatMin`
    fn get_float_min(&self, feature: &str) -> SdkResult<f64>;
    /// `AT_GetFloatMax`
    fn get_float_max(&self, feature: &str) -> SdkResult<f64>;

    /// `AT_GetBool`
    fn get_bool(&self, feature: &str) -> SdkResult<bool>;
    /// `AT_SetBool`
    fn set_bool(&self, feature: &str, value: bool) -> SdkResult<()>;

    /// `AT_GetString`
    fn get_string(&self, feature: &str) -> SdkResult<String>;
    /// `AT_SetString`
    fn set_string(&self, feature: &str, value: &str) -> SdkResult<()>;

    /// `AT_GetEnumIndex`
    fn get_enum_index(&self, feature: &str) -> SdkResult<usize>;
    /// `AT_SetEnumIndex`
    fn set_enum_index(&self, feature: &str, index: usize) -> SdkResult<()>;
    /// `AT_SetEnumString`
    fn set_enum_string(&self, feature: &str, value: &str) -> SdkResult<()>;
    /// `AT_GetEnumCount`
    fn get_enum_count(&self, feature: &str) -> SdkResult<usize>;
    /// `AT_GetEnumStringByIndex`
    fn get_enum_string_by_index(&self, feature: &str, index: usize) -> SdkResult<String>;

    /// Execute a command feature (e.g. `AcquisitionStart`).
    fn command(&self, feature: &str) -> SdkResult<()>;

    /// Submit a buffer to the device queue.
    ///
    /// The device fills the buffer through [`FrameBuffer::write_with`], which
    /// is the only mutable access to its bytes. That call clears the frame
    /// tag before the first byte lands, so a reader holding an old index sees
    /// a tag mismatch instead of a half-written frame.
    fn queue_buffer(&self, buffer: SharedBuffer) -> SdkResult<()>;

    /// Block up to `timeout` for the next filled buffer.
    ///
    /// Fails with a timeout-class code (see [`SdkError::is_timeout`]) when no
    /// buffer was filled in time.
    fn wait_buffer(&self, timeout: Duration) -> SdkResult<WaitedBuffer>;

    /// Drop every queued buffer from the device queue.
    fn flush(&self) -> SdkResult<()>;

    /// Register a callback fired (on an SDK-owned thread) when `feature` changes.
    fn register_feature_callback(
        &self,
        feature: &str,
        callback: FeatureCallback,
    ) -> SdkResult<CallbackId>;

    /// Remove a callback registered on `feature`.
    fn unregister_feature_callback(&self, feature: &str, id: CallbackId) -> SdkResult<()>;
}

/// Process-wide SDK entry points (`AT_InitialiseLibrary` and friends).
pub trait Sdk3Library: Send + Sync {
    /// `AT_InitialiseLibrary`
    fn initialise(&self) -> SdkResult<()>;
    /// `AT_FinaliseLibrary`
    fn finalise(&self) -> SdkResult<()>;
    /// Number of cameras attached, `AT_DeviceCount`.
    fn device_count(&self) -> SdkResult<usize>;
    /// Open camera `index`.
    fn open(&self, index: usize) -> SdkResult<Arc<dyn Sdk3Device>>;
}
