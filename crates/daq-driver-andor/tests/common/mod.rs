//! Shared helpers for the Andor integration tests.
//!
//! - `TestCamera`: driver opened on a simulated camera with a small AOI
//! - `wait_until`: bounded polling for asynchronous conditions

#![allow(dead_code)] // Utilities may not all be used in every test file

use daq_driver_andor::components::features as f;
use daq_driver_andor::{
    AndorConfig, AndorDriver, MockCamera, MockSdk3Library, OverflowPolicy, Sdk3Device, SdkContext,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub const WIDTH: usize = 16;
pub const HEIGHT: usize = 8;
pub const ENCODING: &str = "Mono16";

/// Driver plus a direct handle on the simulated camera behind it.
pub struct TestCamera {
    pub driver: AndorDriver,
    pub camera: Arc<MockCamera>,
    pub library: Arc<MockSdk3Library>,
}

impl TestCamera {
    /// 16 x 8 Mono16 camera at `frame_rate` Hz with the given overflow policy.
    pub fn new(frame_rate: f64, policy: OverflowPolicy) -> Self {
        let config = AndorConfig {
            overflow_policy: policy,
            poll_timeout_ms: 50,
            ..AndorConfig::default()
        };
        Self::with_config(frame_rate, config)
    }

    pub fn with_config(frame_rate: f64, config: AndorConfig) -> Self {
        let library = Arc::new(MockSdk3Library::new(1));
        let camera = library.camera(0).expect("mock library has one camera");
        camera.set_int(f::AOI_WIDTH, WIDTH as i64).unwrap();
        camera.set_int(f::AOI_HEIGHT, HEIGHT as i64).unwrap();
        camera.set_enum_string(f::PIXEL_ENCODING, ENCODING).unwrap();
        camera.set_float(f::FRAME_RATE, frame_rate).unwrap();

        let driver = AndorDriver::open(config, SdkContext::new(library.clone()))
            .expect("driver should open on the mock camera");
        Self {
            driver,
            camera,
            library,
        }
    }

    /// Trigger the overflow callback as the SDK would.
    pub fn raise_overflow(&self) {
        self.camera.raise_event(f::BUFFER_OVERFLOW_EVENT);
    }
}

/// Poll `condition` every few milliseconds until it holds or `timeout` passes.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}

/// Expected pattern value of one pixel.
pub fn expected_pixel(frame: u64, row: usize, col: usize) -> u32 {
    MockCamera::pixel_value(ENCODING, frame, row, col)
}
