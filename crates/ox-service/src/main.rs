use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use ox_protocol::{ControlListener, FramePlane, CONTROL_NAME, SHM_NAME};
use ox_service::{DriverHost, Service, ServiceConfig};

#[derive(Parser, Debug)]
#[command(name = "ox-service", about = "ox runtime service process")]
struct Args {
    /// Shared-memory region name
    #[arg(long, default_value = SHM_NAME)]
    shm_name: String,

    /// Control-channel endpoint name
    #[arg(long, default_value = CONTROL_NAME)]
    control_name: String,

    /// Directory containing driver subdirectories; defaults to `drivers/`
    /// next to the executable
    #[arg(long)]
    drivers_dir: Option<PathBuf>,

    /// Frame producer cadence in Hz
    #[arg(long, default_value_t = 90.0)]
    tick_rate: f64,
}

fn default_drivers_dir() -> Result<PathBuf> {
    let exe = std::env::current_exe().context("resolving executable path")?;
    let dir = exe
        .parent()
        .context("executable has no parent directory")?
        .join("drivers");
    Ok(dir)
}

fn main() -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    let args = Args::parse();
    info!("ox-service starting");

    let drivers_dir = match args.drivers_dir {
        Some(dir) => dir,
        None => default_drivers_dir()?,
    };
    let driver = DriverHost::discover(&drivers_dir).context("loading device driver")?;

    let config = ServiceConfig {
        tick_rate_hz: args.tick_rate,
        ..ServiceConfig::default()
    };
    let service = Service::create(driver, &args.shm_name, config)
        .context("creating shared-memory frame plane")?;
    let listener =
        ControlListener::bind(&args.control_name).context("binding control channel")?;

    let frame_task = ox_service::frame_producer::spawn(std::sync::Arc::clone(service.state()));

    service.run_control(&listener);

    service.state().stop();
    frame_task.join().ok();
    FramePlane::unlink(&args.shm_name);
    info!("ox-service stopped");
    Ok(())
}
