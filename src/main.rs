//! Multi-camera triggered acquisition service over the simulated transport.

use std::path::PathBuf;
use std::time::Duration;

use color_eyre::{eyre::eyre, Result};
use tracing::{debug, error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use multicam::capture::{Sdk, SimTransport};
use multicam::error::SessionError;
use multicam::pipeline::Dispatcher;
use multicam::rig::CaptureRig;
use multicam::Config;

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("multicam=info"));
    let registry = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_timer(fmt::time::uptime()));

    #[cfg(feature = "profiling")]
    let registry = registry.with(tracing_tracy::TracyLayer::default());

    registry.init();
}

fn log_release(failures: Vec<(u32, SessionError)>) {
    for (camera, err) in failures {
        error!("Camera {} did not release cleanly: {}", camera, err);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize error handling and logging
    color_eyre::install()?;
    init_tracing();

    info!("multicam launching...");

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = Config::load(config_path.as_deref())?;
    info!("Saving frames to {}", config.capture.save_dir.display());

    let transport = SimTransport::new(config.simulation.effective_cameras());
    let sdk = Sdk::initialize(transport.clone())?;
    let (mut rig, events) = CaptureRig::open(&sdk, &config)?;

    // Consumer side, never on a capture thread
    let consumer = tokio::spawn(
        Dispatcher::new()
            .on_status(|text| info!("[status] {}", text))
            .on_file_written(|name| debug!("Saved {}", name))
            .on_trigger_cycle(|camera, cycle| {
                debug!("Camera {} trigger cycle {}", camera, cycle)
            })
            .on_frame_ready(|camera, slot, frame| {
                debug!(
                    "Camera {} slot {} <- frame {} ({}x{})",
                    camera, slot, frame.tag.counter, frame.image.width, frame.image.height
                )
            })
            .run(events),
    );

    let failures = rig.start_all();
    for (camera, err) in &failures {
        error!("Camera {} not started: {}", camera, err);
    }
    if failures.len() == rig.len() {
        log_release(rig.release_all());
        return Err(eyre!("No camera could be started"));
    }

    // Simulated trigger line
    let interval = Duration::from_millis(config.simulation.trigger_interval_ms);
    let pulses = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let cameras = transport.fire_trigger();
            debug!("Trigger pulse reached {} camera(s)", cameras);
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("multicam shutting down");

    pulses.abort();
    for (camera, err) in rig.stop_all() {
        error!("Camera {} did not stop cleanly: {}", camera, err);
    }
    log_release(rig.release_all());
    drop(sdk);

    let handled = consumer.await?;
    info!("multicam stopped after {} events", handled);
    Ok(())
}
