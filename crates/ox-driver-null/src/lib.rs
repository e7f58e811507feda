//! Null driver: a simulated headset and two controllers with no hardware
//! behind them. Poses are smooth functions of the predicted time, input
//! components return fixed values, and the display reports a 90 Hz
//! 1920x1920-per-eye panel. Useful for development, CI, and as the
//! reference for driver authors.

use std::f32::consts::FRAC_PI_4;

use ox_driver_api::{
    write_fixed_str, OxComponentResult, OxDeviceInfo, OxDeviceState, OxDisplayProperties,
    OxDriverCallbacks, OxFov, OxPose, OxQuaternion, OxTrackingCapabilities, OxVector3f,
};

const EYE_HEIGHT: f32 = 1.6;
const IPD_METERS: f32 = 0.064;
const BOB_AMPLITUDE: f32 = 0.01;
const BOB_HZ: f32 = 0.25;

const SIMPLE_CONTROLLER_PROFILE: &[u8] = b"/interaction_profiles/khr/simple_controller\0";

const TRIGGER_VALUE: f32 = 0.75;
const SQUEEZE_VALUE: f32 = 0.25;
const THUMBSTICK: (f32, f32) = (0.1, -0.2);

fn seconds(predicted_time: i64) -> f32 {
    (predicted_time as f64 / 1_000_000_000.0) as f32
}

fn head_pose(predicted_time: i64) -> OxPose {
    let t = seconds(predicted_time);
    OxPose {
        position: OxVector3f {
            x: 0.0,
            y: EYE_HEIGHT + BOB_AMPLITUDE * (t * BOB_HZ * std::f32::consts::TAU).sin(),
            z: 0.0,
        },
        orientation: OxQuaternion::default(),
    }
}

fn hand_pose(predicted_time: i64, side: f32) -> OxPose {
    let t = seconds(predicted_time);
    OxPose {
        position: OxVector3f {
            x: side * 0.2,
            y: EYE_HEIGHT - 0.4 + 0.02 * (t * std::f32::consts::TAU * 0.5).sin(),
            z: -0.3,
        },
        orientation: OxQuaternion::default(),
    }
}

fn str_from_ptr<'a>(ptr: *const u8) -> &'a str {
    if ptr.is_null() {
        return "";
    }
    unsafe { std::ffi::CStr::from_ptr(ptr.cast()) }
        .to_str()
        .unwrap_or("")
}

fn is_hand(user_path: &str) -> bool {
    user_path == "/user/hand/left" || user_path == "/user/hand/right"
}

unsafe extern "C" fn initialize() -> i32 {
    1
}

unsafe extern "C" fn shutdown() {}

unsafe extern "C" fn is_device_connected() -> i32 {
    1
}

unsafe extern "C" fn get_device_info(info: *mut OxDeviceInfo) {
    if info.is_null() {
        return;
    }
    let info = &mut *info;
    write_fixed_str(&mut info.name, "Null VR Headset");
    write_fixed_str(&mut info.manufacturer, "ox runtime");
    write_fixed_str(&mut info.serial, "NULL-0001");
    info.vendor_id = 0;
    info.product_id = 0;
}

unsafe extern "C" fn get_display_properties(props: *mut OxDisplayProperties) {
    if props.is_null() {
        return;
    }
    *props = OxDisplayProperties {
        display_width: 1920,
        display_height: 1920,
        recommended_width: 1440,
        recommended_height: 1440,
        refresh_rate: 90.0,
        fov: OxFov {
            angle_left: -FRAC_PI_4,
            angle_right: FRAC_PI_4,
            angle_up: FRAC_PI_4,
            angle_down: -FRAC_PI_4,
        },
    };
}

unsafe extern "C" fn get_tracking_capabilities(caps: *mut OxTrackingCapabilities) {
    if caps.is_null() {
        return;
    }
    *caps = OxTrackingCapabilities {
        has_position_tracking: 1,
        has_orientation_tracking: 1,
    };
}

unsafe extern "C" fn update_view_pose(predicted_time: i64, eye_index: u32, out_pose: *mut OxPose) {
    if out_pose.is_null() {
        return;
    }
    let mut pose = head_pose(predicted_time);
    let offset = if eye_index == 0 { -1.0 } else { 1.0 };
    pose.position.x += offset * IPD_METERS / 2.0;
    *out_pose = pose;
}

unsafe extern "C" fn update_devices(
    predicted_time: i64,
    out_states: *mut OxDeviceState,
    out_count: *mut u32,
) {
    if out_states.is_null() || out_count.is_null() {
        return;
    }
    let states = std::slice::from_raw_parts_mut(out_states, 3);

    states[0] = OxDeviceState {
        pose: head_pose(predicted_time),
        is_active: 1,
        ..Default::default()
    };
    write_fixed_str(&mut states[0].user_path, "/user/head");

    states[1] = OxDeviceState {
        pose: hand_pose(predicted_time, -1.0),
        is_active: 1,
        ..Default::default()
    };
    write_fixed_str(&mut states[1].user_path, "/user/hand/left");

    states[2] = OxDeviceState {
        pose: hand_pose(predicted_time, 1.0),
        is_active: 1,
        ..Default::default()
    };
    write_fixed_str(&mut states[2].user_path, "/user/hand/right");

    *out_count = 3;
}

unsafe extern "C" fn get_input_state_boolean(
    _predicted_time: i64,
    user_path: *const u8,
    component_path: *const u8,
    out_value: *mut u32,
) -> OxComponentResult {
    if out_value.is_null() || !is_hand(str_from_ptr(user_path)) {
        return OxComponentResult::Unavailable;
    }
    match str_from_ptr(component_path) {
        "/input/trigger/click" => {
            *out_value = (TRIGGER_VALUE > 0.5) as u32;
            OxComponentResult::Available
        }
        "/input/select/click" => {
            *out_value = 0;
            OxComponentResult::Available
        }
        _ => OxComponentResult::Unavailable,
    }
}

unsafe extern "C" fn get_input_state_float(
    _predicted_time: i64,
    user_path: *const u8,
    component_path: *const u8,
    out_value: *mut f32,
) -> OxComponentResult {
    if out_value.is_null() || !is_hand(str_from_ptr(user_path)) {
        return OxComponentResult::Unavailable;
    }
    match str_from_ptr(component_path) {
        "/input/trigger/value" => {
            *out_value = TRIGGER_VALUE;
            OxComponentResult::Available
        }
        "/input/squeeze/value" => {
            *out_value = SQUEEZE_VALUE;
            OxComponentResult::Available
        }
        _ => OxComponentResult::Unavailable,
    }
}

unsafe extern "C" fn get_input_state_vector2f(
    _predicted_time: i64,
    user_path: *const u8,
    component_path: *const u8,
    out_x: *mut f32,
    out_y: *mut f32,
) -> OxComponentResult {
    if out_x.is_null() || out_y.is_null() || !is_hand(str_from_ptr(user_path)) {
        return OxComponentResult::Unavailable;
    }
    match str_from_ptr(component_path) {
        "/input/thumbstick" => {
            *out_x = THUMBSTICK.0;
            *out_y = THUMBSTICK.1;
            OxComponentResult::Available
        }
        _ => OxComponentResult::Unavailable,
    }
}

unsafe extern "C" fn get_interaction_profiles(
    profiles: *mut *const u8,
    max_profiles: u32,
) -> u32 {
    if !profiles.is_null() && max_profiles >= 1 {
        *profiles = SIMPLE_CONTROLLER_PROFILE.as_ptr();
    }
    1
}

/// Fill the callback table. Shared by the exported symbol and by tests
/// that register the driver in-process.
pub fn fill_callbacks(callbacks: &mut OxDriverCallbacks) {
    callbacks.initialize = Some(initialize);
    callbacks.shutdown = Some(shutdown);
    callbacks.is_device_connected = Some(is_device_connected);
    callbacks.get_device_info = Some(get_device_info);
    callbacks.get_display_properties = Some(get_display_properties);
    callbacks.get_tracking_capabilities = Some(get_tracking_capabilities);
    callbacks.update_view_pose = Some(update_view_pose);
    callbacks.update_devices = Some(update_devices);
    callbacks.get_input_state_boolean = Some(get_input_state_boolean);
    callbacks.get_input_state_float = Some(get_input_state_float);
    callbacks.get_input_state_vector2f = Some(get_input_state_vector2f);
    callbacks.get_interaction_profiles = Some(get_interaction_profiles);
    callbacks.submit_frame = None;
}

/// The symbol the service resolves after loading the library.
///
/// # Safety
/// `callbacks` must point to a valid table the caller owns.
#[no_mangle]
pub unsafe extern "C" fn ox_driver_register(callbacks: *mut OxDriverCallbacks) -> i32 {
    if callbacks.is_null() {
        return 0;
    }
    fill_callbacks(&mut *callbacks);
    1
}
