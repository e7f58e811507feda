//! Client-side core of the ox runtime.
//!
//! The [`Runtime`] struct owns everything the client library keeps per
//! instance: the handle tables, the path interner, suggested bindings, and
//! swapchain state. It talks to the service through a [`ServiceConnection`],
//! which is a trait so tests can substitute a mock, and reads the
//! shared-memory frame plane on the hot path without taking the table lock.
//!
//! The OpenXR C entry points themselves are a thin translation layer over
//! these operations and live outside this crate.

#![forbid(unsafe_code)]

pub mod bindings;
pub mod connection;
pub mod graphics;
pub mod handle;
pub mod paths;
pub mod runtime;
pub mod swapchain;

pub use connection::{IpcServiceConnection, ServiceConnection};
pub use graphics::{CpuBackend, GraphicsBackend, ImageId, SessionGraphicsBinding};
pub use handle::{
    ActionHandle, ActionSetHandle, InstanceHandle, PathHandle, SessionHandle, SpaceHandle,
    SwapchainHandle,
};
pub use runtime::{
    ActionCreateInfo, ActionState, ActionType, CompositionLayer, EnvironmentBlendMode,
    FrameWaitState, InstanceCreateInfo, ProjectionView, ReferenceSpaceType, Runtime,
    SessionCreateInfo, SpaceLocation, SuggestedBinding, LOCATION_ALL_TRACKED,
};

use thiserror::Error;

/// Result alias for client operations.
pub type XrResult<T> = std::result::Result<T, XrError>;

/// Error kinds surfaced to callers. These are kinds, not causes; details
/// go to the log. "Not available" outcomes (no queued event, inactive
/// action, untracked space) are success-shaped returns, never errors.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum XrError {
    /// Malformed caller arguments; rejected before any IPC
    #[error("validation failure")]
    Validation,

    /// Handle unknown to the local tables
    #[error("invalid handle")]
    HandleInvalid,

    /// The instance this handle came from is gone
    #[error("instance lost")]
    InstanceLost,

    /// IPC failed: service absent, version mismatch, or channel death
    #[error("runtime failure")]
    RuntimeFailure,

    /// The requested entry point is not implemented
    #[error("function unsupported")]
    FunctionUnsupported,
}
