//! Wire protocol and IPC primitives shared by the ox client library and
//! the ox service.
//!
//! This crate provides:
//! - Control-channel message schema and framing (fixed 16-byte header)
//! - The shared-memory frame plane: a 4 KiB seqlock'd header page plus two
//!   fixed-bound eye-texture blocks
//! - Cross-platform shared memory and local stream channel wrappers

pub mod control_channel;
pub mod frame_plane;
pub mod messages;
pub mod shared_memory;

pub use control_channel::{ControlChannel, ControlListener};
pub use frame_plane::{
    DeviceSlot, Fov, FramePlane, FrameSnapshot, FrameState, FrameTexture, FrameView, Pose,
    SharedData, TextureInfo, EYE_COUNT, MAX_DEVICES,
};
pub use messages::*;

use std::sync::OnceLock;
use std::time::Instant;

use thiserror::Error;

/// Version stamped into the shared-memory region; the client refuses to
/// proceed when it does not match.
pub const PROTOCOL_VERSION: u32 = 1;

/// Well-known name of the shared-memory region.
pub const SHM_NAME: &str = "ox_runtime_shm";

/// Well-known name of the control-channel endpoint.
pub const CONTROL_NAME: &str = "ox_runtime_control";

/// Result type alias using the protocol error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the IPC layer.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error on the control channel
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Shared memory region does not exist (service not running)
    #[error("shared memory region '{0}' not found")]
    RegionMissing(String),

    /// Shared memory region already exists (stale or concurrent service)
    #[error("shared memory region '{0}' already exists")]
    RegionExists(String),

    /// Endpoint exists but is not accessible to this user
    #[error("permission denied on '{0}'")]
    PermissionDenied(String),

    /// Mapping the region into this process failed
    #[error("mapping shared memory failed: {0}")]
    MapFailed(String),

    /// Service and client disagree on the protocol version
    #[error("protocol version mismatch: service has {service}, client expects {client}")]
    VersionMismatch { service: u32, client: u32 },

    /// Connecting to the control channel timed out
    #[error("connect to '{0}' timed out")]
    ConnectTimeout(String),

    /// Peer closed the channel mid-message or the stream errored
    #[error("peer disconnected")]
    Disconnected,

    /// Message type field is not a known identifier
    #[error("unknown message type {0}")]
    UnknownMessageType(u32),

    /// Payload does not decode as the expected structure
    #[error("malformed message: {0}")]
    Malformed(&'static str),

    /// Header announced a payload beyond the framing bound
    #[error("payload of {0} bytes exceeds the framing limit")]
    PayloadTooLarge(u32),
}

/// Monotonic timestamp in nanoseconds, relative to first use within the
/// process. Suitable for event ordering and display-time prediction, not
/// for cross-process comparison.
pub fn monotonic_ns() -> i64 {
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    let epoch = *EPOCH.get_or_init(Instant::now);
    Instant::now().duration_since(epoch).as_nanos() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn monotonic_ns_is_non_decreasing() {
        let mut last = monotonic_ns();
        for _ in 0..1000 {
            let now = monotonic_ns();
            assert!(now >= last);
            last = now;
        }
    }
}
