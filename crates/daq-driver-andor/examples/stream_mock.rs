//! Stream frames from the simulated Andor camera
//!
//! Runs a continuous acquisition against the in-process mock camera and
//! prints per-batch statistics. Useful for watching the overflow and
//! missing-frame policies at work without hardware.
//!
//! # Usage
//!
//! ```bash
//! cargo run -p daq-driver-andor --example stream_mock -- --frame-rate 2000 --depth 4
//!
//! # Slow reader, overflow restarts
//! RUST_LOG=daq_driver_andor=debug cargo run -p daq-driver-andor --example stream_mock -- \
//!     --overflow-policy restart --read-interval-ms 200
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use daq_driver_andor::{
    AcquisitionMode, AndorConfig, AndorDriver, MissingFramePolicy, OverflowPolicy,
};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Stream from a simulated Andor SDK3 camera
#[derive(Parser, Debug)]
#[command(name = "stream_mock")]
#[command(about = "Continuous acquisition from the mock Andor camera")]
struct Args {
    /// Optional TOML driver configuration
    #[arg(long)]
    config: Option<PathBuf>,

    /// Frame rate (Hz)
    #[arg(long, default_value = "500")]
    frame_rate: f64,

    /// Buffers kept queued on the camera
    #[arg(long, default_value = "8")]
    depth: usize,

    /// AOI width and height (pixels)
    #[arg(long, default_value = "128")]
    size: i64,

    /// Overflow policy: error, restart or ignore
    #[arg(long)]
    overflow_policy: Option<OverflowPolicy>,

    /// Missing-frame policy: skip, zero or none
    #[arg(long, default_value = "skip")]
    missing: MissingFramePolicy,

    /// Sleep between reads (ms)
    #[arg(long, default_value = "20")]
    read_interval_ms: u64,

    /// Total run time (s)
    #[arg(long, default_value = "3")]
    seconds: u64,

    /// Enable metadata chunks
    #[arg(long)]
    metadata: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args = Args::parse();
    let mut config = match &args.config {
        Some(path) => AndorConfig::from_file(path)?,
        None => AndorConfig::default(),
    };
    if let Some(policy) = args.overflow_policy {
        config.overflow_policy = policy;
    }
    config.enable_metadata = Some(args.metadata);

    let driver = AndorDriver::open_mock(config).context("opening mock camera")?;
    let sensor = driver.camera_info()?.sensor_size;
    let mut aoi = driver.aoi()?;
    aoi.width = args.size.min(sensor.0);
    aoi.height = args.size.min(sensor.1);
    driver.set_aoi(aoi)?;
    driver.set_frame_rate(args.frame_rate)?;

    driver.setup(AcquisitionMode::Continuous, args.depth)?;
    driver.start()?;
    info!(
        frame_rate = args.frame_rate,
        depth = args.depth,
        width = aoi.width,
        height = aoi.height,
        "Streaming"
    );

    let deadline = Instant::now() + Duration::from_secs(args.seconds);
    let mut delivered = 0usize;
    while Instant::now() < deadline {
        match driver.wait_for_next(Duration::from_millis(500), None) {
            Ok(_) => {}
            Err(e) if e.is_timeout() => {
                warn!(error = %e, "No new frame");
                continue;
            }
            Err(e) => return Err(e.into()),
        }

        let batch = driver.read_multiple(None, false, args.missing, args.metadata)?;
        let placeholders = batch.images.iter().filter(|img| img.is_none()).count();
        delivered += batch.len();
        let (produced, capacity) = driver.get_status();
        let (skipped, overflows) = driver.get_missed_frames_status();
        info!(
            batch = batch.len(),
            placeholders,
            produced,
            capacity,
            skipped,
            overflows,
            "Read"
        );
        std::thread::sleep(Duration::from_millis(args.read_interval_ms));
    }

    driver.stop()?;
    let status = driver.frames_status();
    info!(
        delivered,
        acquired = status.acquired,
        skipped = status.skipped,
        "Done"
    );
    println!("{}", serde_json::to_string_pretty(&driver.settings_snapshot()?)?);
    driver.shutdown()?;
    Ok(())
}

