//! The ox service process.
//!
//! Hosts exactly one device driver, owns the shared-memory frame plane and
//! the control-channel endpoint, and runs two long-lived tasks: a control
//! task answering client requests and a frame task publishing tracking
//! data at display cadence.

pub mod driver_host;
pub mod frame_producer;
pub mod handles;
pub mod service;
pub mod session;

pub use driver_host::DriverHost;
pub use handles::HandleAllocator;
pub use service::{Service, ServiceConfig};
pub use session::SessionManager;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ServiceError>;

/// Errors raised while bringing up or running the service.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Protocol(#[from] ox_protocol::Error),

    #[error("drivers directory '{0}' not found")]
    DriversDirMissing(std::path::PathBuf),

    #[error("no loadable driver with a connected device")]
    NoConnectedDriver,

    #[error("failed to load driver library: {0}")]
    DriverLoad(String),

    #[error("driver rejected: {0}")]
    DriverRejected(&'static str),
}
