//! The driver plugin ABI.
//!
//! A driver is a dynamic library exporting one symbol,
//! `ox_driver_register`, which fills an [`OxDriverCallbacks`] table the
//! service allocated. All data crossing the boundary is fixed-layout POD;
//! strings are NUL-terminated fixed arrays. The table splits into required
//! slots, which the service validates at load time, and optional slots a
//! driver may leave empty.
//!
//! The service serializes every callback invocation, so drivers may be
//! written single-threaded.

pub const OX_DRIVER_API_VERSION: u32 = 1;

/// Maximum tracked devices a driver may report per tick.
pub const OX_MAX_DEVICES: usize = 16;

/// Symbol every driver library must export.
pub const OX_DRIVER_REGISTER_SYMBOL: &[u8] = b"ox_driver_register";

/// Platform library filename inside a `drivers/<name>/` directory.
#[cfg(target_os = "windows")]
pub const DRIVER_LIBRARY_NAME: &str = "driver.dll";
#[cfg(target_os = "macos")]
pub const DRIVER_LIBRARY_NAME: &str = "libdriver.dylib";
#[cfg(all(unix, not(target_os = "macos")))]
pub const DRIVER_LIBRARY_NAME: &str = "libdriver.so";

/// 3D position vector.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[repr(C)]
pub struct OxVector3f {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

/// Orientation quaternion.
#[derive(Debug, Clone, Copy, PartialEq)]
#[repr(C)]
pub struct OxQuaternion {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub w: f32,
}

impl Default for OxQuaternion {
    fn default() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            z: 0.0,
            w: 1.0,
        }
    }
}

/// 6DOF pose.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[repr(C)]
pub struct OxPose {
    pub position: OxVector3f,
    pub orientation: OxQuaternion,
}

/// Field of view half-angles in radians.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[repr(C)]
pub struct OxFov {
    pub angle_left: f32,
    pub angle_right: f32,
    pub angle_up: f32,
    pub angle_down: f32,
}

/// Static identity of the physical device.
#[derive(Clone, Copy)]
#[repr(C)]
pub struct OxDeviceInfo {
    pub name: [u8; 256],
    pub manufacturer: [u8; 256],
    pub serial: [u8; 256],
    pub vendor_id: u32,
    pub product_id: u32,
}

impl Default for OxDeviceInfo {
    fn default() -> Self {
        Self {
            name: [0; 256],
            manufacturer: [0; 256],
            serial: [0; 256],
            vendor_id: 0,
            product_id: 0,
        }
    }
}

/// Display panel and render-target recommendations.
#[derive(Debug, Clone, Copy, Default)]
#[repr(C)]
pub struct OxDisplayProperties {
    pub display_width: u32,
    pub display_height: u32,
    pub recommended_width: u32,
    pub recommended_height: u32,
    pub refresh_rate: f32,
    pub fov: OxFov,
}

#[derive(Debug, Clone, Copy, Default)]
#[repr(C)]
pub struct OxTrackingCapabilities {
    pub has_position_tracking: u32,
    pub has_orientation_tracking: u32,
}

/// One tracked device: controllers, trackers, and the head itself
/// (reported under `/user/head`).
#[derive(Clone, Copy)]
#[repr(C)]
pub struct OxDeviceState {
    pub user_path: [u8; 256],
    pub pose: OxPose,
    pub is_active: u32,
}

impl Default for OxDeviceState {
    fn default() -> Self {
        Self {
            user_path: [0; 256],
            pose: OxPose::default(),
            is_active: 0,
        }
    }
}

/// Result of an input component query. `Unavailable` means the component
/// does not exist on this device, which is distinct from a present
/// component whose value happens to be zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub enum OxComponentResult {
    Unavailable = 0,
    Available = 1,
}

/// Submitted eye pixels forwarded from the client, for drivers that mirror
/// or present frames themselves.
#[repr(C)]
pub struct OxSubmittedFrame {
    pub eye_index: u32,
    pub width: u32,
    pub height: u32,
    pub format: u32,
    pub data_size: u32,
    pub pixel_data: *const u8,
}

/// The callback table a driver fills in `ox_driver_register`.
///
/// `initialize`, `shutdown`, `is_device_connected`, `get_device_info`,
/// `get_display_properties`, `get_tracking_capabilities`, and
/// `update_view_pose` are required; the service refuses to load a driver
/// that leaves any of them empty. The rest are optional.
#[derive(Default)]
#[repr(C)]
pub struct OxDriverCallbacks {
    /// Called once after registration. Returns 1 on success.
    pub initialize: Option<unsafe extern "C" fn() -> i32>,

    /// Called once before the library is released.
    pub shutdown: Option<unsafe extern "C" fn()>,

    /// Returns 1 while the physical device is connected and ready.
    pub is_device_connected: Option<unsafe extern "C" fn() -> i32>,

    pub get_device_info: Option<unsafe extern "C" fn(info: *mut OxDeviceInfo)>,

    pub get_display_properties: Option<unsafe extern "C" fn(props: *mut OxDisplayProperties)>,

    pub get_tracking_capabilities:
        Option<unsafe extern "C" fn(caps: *mut OxTrackingCapabilities)>,

    /// Hot path: per-eye view pose, twice per tick. `eye_index` 0 is left.
    pub update_view_pose:
        Option<unsafe extern "C" fn(predicted_time: i64, eye_index: u32, out_pose: *mut OxPose)>,

    /// Fill up to [`OX_MAX_DEVICES`] device states; write the count to
    /// `out_count`.
    pub update_devices: Option<
        unsafe extern "C" fn(
            predicted_time: i64,
            out_states: *mut OxDeviceState,
            out_count: *mut u32,
        ),
    >,

    pub get_input_state_boolean: Option<
        unsafe extern "C" fn(
            predicted_time: i64,
            user_path: *const u8,
            component_path: *const u8,
            out_value: *mut u32,
        ) -> OxComponentResult,
    >,

    pub get_input_state_float: Option<
        unsafe extern "C" fn(
            predicted_time: i64,
            user_path: *const u8,
            component_path: *const u8,
            out_value: *mut f32,
        ) -> OxComponentResult,
    >,

    pub get_input_state_vector2f: Option<
        unsafe extern "C" fn(
            predicted_time: i64,
            user_path: *const u8,
            component_path: *const u8,
            out_x: *mut f32,
            out_y: *mut f32,
        ) -> OxComponentResult,
    >,

    /// Write up to `max_profiles` NUL-terminated profile path pointers;
    /// returns the number supported. Drivers that leave this empty are
    /// assumed to support `/interaction_profiles/khr/simple_controller`.
    pub get_interaction_profiles:
        Option<unsafe extern "C" fn(profiles: *mut *const u8, max_profiles: u32) -> u32>,

    /// Receive a submitted eye texture. Optional; the service only
    /// forwards frames when this slot is present.
    pub submit_frame: Option<unsafe extern "C" fn(frame: *const OxSubmittedFrame)>,
}

/// Signature of the exported register symbol. Returns 1 on success.
pub type OxDriverRegisterFn = unsafe extern "C" fn(callbacks: *mut OxDriverCallbacks) -> i32;

/// Copy a Rust string into a fixed NUL-terminated field.
pub fn write_fixed_str(dest: &mut [u8], value: &str) {
    dest.fill(0);
    let bytes = value.as_bytes();
    let copy = bytes.len().min(dest.len() - 1);
    dest[..copy].copy_from_slice(&bytes[..copy]);
}

/// Read a NUL-terminated fixed field back into a `&str`.
pub fn read_fixed_str(field: &[u8]) -> &str {
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    std::str::from_utf8(&field[..end]).unwrap_or("")
}
