//! Acquisition engine tests against the simulated camera.
//!
//! Covers one-shot and continuous runs, the three overflow policies, the
//! three missing-frame policies, teardown idempotence and error surfacing.
//!
//! ```bash
//! cargo test -p daq-driver-andor --test acquisition_test
//! ```

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use common::{expected_pixel, wait_until, TestCamera, HEIGHT, WIDTH};
use daq_driver_andor::components::features as f;
use daq_driver_andor::components::sdk::codes;
use daq_driver_andor::{
    AcquisitionMode, AndorError, ControllerPhase, MissingFramePolicy, MockCamera, OverflowPolicy,
    Sdk3Device,
};
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(3);
const PADDING: usize = 10;

// =============================================================================
// Runs
// =============================================================================

#[test]
fn one_shot_delivers_every_frame_in_order() {
    let t = TestCamera::new(500.0, OverflowPolicy::Error);
    t.driver.setup(AcquisitionMode::OneShot, 5).unwrap();
    t.driver.start().unwrap();
    assert_eq!(t.camera.get_int(f::FRAME_COUNT).unwrap(), 5);
    assert_eq!(t.driver.get_status(), (0, 5 + PADDING));

    t.driver.wait_for_next(WAIT, Some(4)).unwrap();
    let batch = t
        .driver
        .read_multiple(None, false, MissingFramePolicy::Skip, true)
        .unwrap();
    assert_eq!(batch.len(), 5);

    let infos = batch.infos.as_ref().unwrap();
    for (i, (image, info)) in batch.images.iter().zip(infos).enumerate() {
        let image = image.as_ref().unwrap();
        let info = info.as_ref().unwrap();
        assert_eq!(info.frame_index, i as u64);
        assert_eq!(info.size, (WIDTH, HEIGHT));
        assert_eq!(image.shape(), (HEIGHT, WIDTH));
        assert_eq!(image.get(2, 3), Some(expected_pixel(i as u64, 2, 3)));
    }

    assert!(wait_until(WAIT, || !t.driver.is_acquiring().unwrap()));
    t.driver.stop().unwrap();
    let status = t.driver.frames_status();
    assert_eq!(status.acquired, 5);
    assert_eq!(status.unread, 0);
    assert_eq!(status.skipped, 0);

    // Nothing new after everything was read.
    let again = t
        .driver
        .read_multiple(None, false, MissingFramePolicy::Skip, false)
        .unwrap();
    assert!(again.is_empty());
    assert!(again.infos.is_none());
}

#[test]
fn continuous_uses_device_maximum_and_keeps_ring_window() {
    let t = TestCamera::new(400.0, OverflowPolicy::Ignore);
    t.driver.set_metadata_enabled(true).unwrap();
    t.driver.setup(AcquisitionMode::Continuous, 4).unwrap();
    t.driver.start().unwrap();

    let max = t.camera.get_int_max(f::FRAME_COUNT).unwrap();
    assert_eq!(t.camera.get_int(f::FRAME_COUNT).unwrap(), max);
    assert_eq!(t.driver.get_status().1, 4 + PADDING);

    t.driver.wait_for_next(WAIT, Some(19)).unwrap();
    t.driver.stop().unwrap();
    assert!(!t.driver.is_acquiring().unwrap());

    let (produced, capacity) = t.driver.get_status();
    assert!(produced >= 20);
    let batch = t
        .driver
        .read_multiple(None, false, MissingFramePolicy::Skip, true)
        .unwrap();
    // The oldest slot of the window may already be refilled by a frame the
    // polling thread never dequeued before the stop.
    assert!(batch.len() == capacity - 1 || batch.len() == capacity - 2);

    let infos: Vec<_> = batch.infos.unwrap().into_iter().map(Option::unwrap).collect();
    assert_eq!(infos.last().unwrap().frame_index, produced - 1);
    for pair in infos.windows(2) {
        assert_eq!(pair[1].frame_index, pair[0].frame_index + 1);
        assert!(pair[1].timestamp_device > pair[0].timestamp_device);
    }
    assert!(infos.iter().all(|info| info.pixel_format_code.is_some()));

    let (skipped, _) = t.driver.get_missed_frames_status();
    assert_eq!(skipped, produced - infos.len() as u64);
}

#[test]
fn restart_via_start_begins_new_epoch() {
    let t = TestCamera::new(500.0, OverflowPolicy::Error);
    t.driver.setup(AcquisitionMode::OneShot, 3).unwrap();
    t.driver.start().unwrap();
    t.driver.wait_for_next(WAIT, Some(2)).unwrap();

    t.driver.start().unwrap();
    t.driver.wait_for_next(WAIT, Some(2)).unwrap();
    let batch = t
        .driver
        .read_multiple(None, false, MissingFramePolicy::Skip, false)
        .unwrap();
    assert_eq!(batch.len(), 3);
    t.driver.stop().unwrap();
}

#[test]
fn unbounded_wait_returns_produced_frame() {
    let t = TestCamera::new(500.0, OverflowPolicy::Error);
    t.driver.setup(AcquisitionMode::OneShot, 2).unwrap();
    t.driver.start().unwrap();
    t.driver.wait_for_next(WAIT, Some(0)).unwrap();

    let produced = t.driver.wait_for_next(Duration::MAX, Some(0)).unwrap();
    assert!(produced >= 1);
    let produced = t.driver.wait_for_next(Duration::MAX, Some(1)).unwrap();
    assert_eq!(produced, 2);
    t.driver.stop().unwrap();
}

// =============================================================================
// Overflow Policies
// =============================================================================

#[test]
fn overflow_error_policy_stops_and_fails() {
    let t = TestCamera::new(0.5, OverflowPolicy::Error);
    t.driver.setup(AcquisitionMode::Continuous, 4).unwrap();
    t.driver.start().unwrap();
    t.raise_overflow();

    let err = t
        .driver
        .wait_for_next(Duration::from_millis(200), None)
        .unwrap_err();
    assert!(err.is_overflow(), "got {err}");
    assert!(!t.driver.is_acquiring().unwrap());
    assert!(!t.camera.get_bool(f::CAMERA_ACQUIRING).unwrap());
    assert_eq!(t.driver.controller().phase(), ControllerPhase::Configured);
    assert_eq!(t.driver.get_missed_frames_status().1, 1);
}

#[test]
fn overflow_restart_policy_restarts_and_times_out() {
    let t = TestCamera::new(0.5, OverflowPolicy::Restart);
    t.driver.setup(AcquisitionMode::Continuous, 4).unwrap();
    t.driver.start().unwrap();
    t.raise_overflow();

    let err = t
        .driver
        .wait_for_next(Duration::from_millis(200), None)
        .unwrap_err();
    assert!(err.is_timeout(), "got {err}");
    assert_eq!(t.driver.get_missed_frames_status().1, 1);
    assert!(t.driver.is_acquiring().unwrap());
    assert_eq!(t.driver.get_status(), (0, 4 + PADDING));

    // The flag was consumed; the next wait is an ordinary timeout.
    let err = t
        .driver
        .wait_for_next(Duration::from_millis(50), None)
        .unwrap_err();
    assert!(err.is_timeout());
    assert_eq!(t.driver.get_missed_frames_status().1, 1);
    t.driver.stop().unwrap();
}

#[test]
fn overflow_ignore_policy_counts_only() {
    let t = TestCamera::new(0.5, OverflowPolicy::Ignore);
    t.driver.setup(AcquisitionMode::Continuous, 4).unwrap();
    t.driver.start().unwrap();
    t.raise_overflow();

    let started = std::time::Instant::now();
    let err = t
        .driver
        .wait_for_next(Duration::from_millis(150), None)
        .unwrap_err();
    assert!(err.is_timeout());
    assert!(started.elapsed() >= Duration::from_millis(150));
    assert_eq!(t.driver.get_missed_frames_status().1, 1);
    assert!(t.driver.is_acquiring().unwrap());
    t.driver.stop().unwrap();
}

#[test]
fn overflow_during_wait_is_caught_after_timeout() {
    let t = TestCamera::new(0.5, OverflowPolicy::Error);
    t.driver.setup(AcquisitionMode::Continuous, 4).unwrap();
    t.driver.start().unwrap();

    let camera = t.camera.clone();
    let raiser = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(50));
        camera.raise_event(f::BUFFER_OVERFLOW_EVENT);
    });
    let err = t
        .driver
        .wait_for_next(Duration::from_millis(300), None)
        .unwrap_err();
    raiser.join().unwrap();
    assert!(err.is_overflow(), "got {err}");
    assert!(!t.driver.is_acquiring().unwrap());
}

#[test]
fn starved_camera_raises_real_overflow_events() {
    let t = TestCamera::new(1000.0, OverflowPolicy::Ignore);
    t.driver.setup(AcquisitionMode::Continuous, 2).unwrap();
    t.driver.start().unwrap();
    t.driver.wait_for_next(WAIT, Some(0)).unwrap();

    // Stopping the polling loop alone leaves the device without buffers.
    t.driver.controller().ring().stop_loop();
    assert!(wait_until(WAIT, || t.camera.overflow_events() > 0));
    assert!(t.driver.controller().ring().overflow_pending());

    t.driver.stop().unwrap();
    let _ = t
        .driver
        .read_multiple(None, true, MissingFramePolicy::Skip, false)
        .unwrap();
    assert!(t.driver.get_missed_frames_status().1 >= 1);
}

// =============================================================================
// Missing-Frame Policies
// =============================================================================

#[test]
fn missing_frame_policies_shape_the_output() {
    let t = TestCamera::new(500.0, OverflowPolicy::Ignore);
    t.driver.setup(AcquisitionMode::Continuous, 2).unwrap();
    t.driver.start().unwrap();
    t.driver.wait_for_next(WAIT, Some(29)).unwrap();
    t.driver.stop().unwrap();

    let (produced, capacity) = t.driver.get_status();
    let range = Some(0..produced);

    let skip = t
        .driver
        .read_multiple(range.clone(), true, MissingFramePolicy::Skip, true)
        .unwrap();
    let held = skip.len() as u64;
    assert!(held == capacity as u64 - 1 || held == capacity as u64 - 2);
    let lost = (produced - held) as usize;

    let zero = t
        .driver
        .read_multiple(range.clone(), true, MissingFramePolicy::Zero, true)
        .unwrap();
    assert_eq!(zero.len() as u64, produced);
    assert!(zero.images[..lost].iter().all(|img| {
        let img = img.as_ref().unwrap();
        img.is_all_zero() && img.shape() == (HEIGHT, WIDTH)
    }));
    assert!(zero.infos.as_ref().unwrap()[..lost].iter().all(Option::is_none));

    let none = t
        .driver
        .read_multiple(range.clone(), true, MissingFramePolicy::None, true)
        .unwrap();
    assert_eq!(none.len() as u64, produced);
    assert!(none.images[..lost].iter().all(Option::is_none));

    // Held frames are identical and in order under every policy.
    assert_eq!(&zero.images[lost..], &skip.images[..]);
    assert_eq!(&none.images[lost..], &skip.images[..]);
    let first_info = skip.infos.as_ref().unwrap()[0].as_ref().unwrap();
    assert_eq!(first_info.frame_index, produced - held);

    // Peeking left the cursor alone; a real read now records the loss.
    assert_eq!(t.driver.frames_status().unread, produced);
    t.driver
        .read_multiple(None, false, MissingFramePolicy::Skip, false)
        .unwrap();
    assert_eq!(t.driver.get_missed_frames_status().0, lost as u64);
    assert_eq!(t.driver.frames_status().unread, 0);
}

#[test]
fn explicit_range_is_clamped_to_produced() {
    let t = TestCamera::new(500.0, OverflowPolicy::Error);
    t.driver.setup(AcquisitionMode::OneShot, 4).unwrap();
    t.driver.start().unwrap();
    t.driver.wait_for_next(WAIT, Some(3)).unwrap();

    let batch = t
        .driver
        .read_multiple(Some(2..100), true, MissingFramePolicy::None, true)
        .unwrap();
    assert_eq!(batch.len(), 2);
    let indices: Vec<u64> = batch
        .infos
        .unwrap()
        .into_iter()
        .map(|info| info.unwrap().frame_index)
        .collect();
    assert_eq!(indices, vec![2, 3]);
    t.driver.stop().unwrap();
}

// =============================================================================
// Teardown and Errors
// =============================================================================

#[test]
fn stop_and_deallocate_are_idempotent() {
    let t = TestCamera::new(500.0, OverflowPolicy::Error);
    t.driver.stop().unwrap();
    t.driver.stop().unwrap();
    t.driver.controller().ring().deallocate().unwrap();

    t.driver.setup(AcquisitionMode::OneShot, 2).unwrap();
    t.driver.start().unwrap();
    t.driver.stop().unwrap();
    t.driver.stop().unwrap();
    t.driver.clear().unwrap();
    t.driver.clear().unwrap();
    t.driver.controller().ring().deallocate().unwrap();
    assert_eq!(t.driver.controller().phase(), ControllerPhase::Idle);
    assert_eq!(t.camera.callback_count(), 0);

    // Start needs setup again after clear.
    assert!(t.driver.start().is_err());
}

#[test]
fn polling_failure_surfaces_as_device_error() {
    let t = TestCamera::new(500.0, OverflowPolicy::Error);
    t.driver.setup(AcquisitionMode::Continuous, 4).unwrap();
    t.driver.start().unwrap();
    t.camera.inject_wait_error(Some(codes::AT_ERR_COMM));

    let err = t.driver.wait_for_next(WAIT, Some(10_000)).unwrap_err();
    assert!(err.is_device_error(), "got {err}");
    assert!(matches!(err, AndorError::DeviceComm(ref e) if e.code == codes::AT_ERR_COMM));

    let err = t
        .driver
        .read_multiple(None, false, MissingFramePolicy::Skip, false)
        .unwrap_err();
    assert!(err.is_device_error());
    t.camera.inject_wait_error(None);
    t.driver.stop().unwrap();
}

#[test]
fn rejected_buffer_fails_allocation() {
    let t = TestCamera::new(500.0, OverflowPolicy::Error);
    t.camera.inject_queue_error(Some(codes::AT_ERR_INVALIDALIGNMENT));
    t.driver.setup(AcquisitionMode::OneShot, 3).unwrap();

    let err = t.driver.start().unwrap_err();
    assert!(matches!(err, AndorError::Allocation { slot: 0, .. }), "got {err}");
    assert!(!t.camera.get_bool(f::CAMERA_ACQUIRING).unwrap());
}

#[test]
fn decode_error_fails_read_without_losing_frames() {
    let t = TestCamera::new(500.0, OverflowPolicy::Error);
    t.driver.setup(AcquisitionMode::OneShot, 3).unwrap();
    t.driver.start().unwrap();
    t.driver.wait_for_next(WAIT, Some(2)).unwrap();
    t.driver.stop().unwrap();

    // Geometry now disagrees with what is in the ring.
    t.camera.set_row_padding(4);
    let err = t
        .driver
        .read_multiple(None, false, MissingFramePolicy::Skip, false)
        .unwrap_err();
    assert!(err.is_decode_error(), "got {err}");

    t.camera.set_row_padding(0);
    let batch = t
        .driver
        .read_multiple(None, false, MissingFramePolicy::Skip, false)
        .unwrap();
    assert_eq!(batch.len(), 3);
}

#[test]
fn row_padding_and_packed_pixels_decode() {
    let t = TestCamera::new(500.0, OverflowPolicy::Error);
    t.camera.set_enum_string(f::PIXEL_ENCODING, "Mono12Packed").unwrap();
    t.camera.set_int(f::AOI_WIDTH, 7).unwrap();
    t.camera.set_row_padding(5);

    let images = t.driver.grab(2, WAIT).unwrap();
    assert_eq!(images.len(), 2);
    for (frame, image) in images.iter().enumerate() {
        assert_eq!(image.shape(), (HEIGHT, 7));
        for col in 0..7 {
            let expected = MockCamera::pixel_value("Mono12Packed", frame as u64, 1, col);
            assert_eq!(image.get(1, col), Some(expected));
        }
    }
}
