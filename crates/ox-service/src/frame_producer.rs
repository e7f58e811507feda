//! The frame task: publishes driver tracking data into the frame plane at
//! display cadence and drains client-submitted eye textures.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

use tracing::{debug, info};

use ox_driver_api::{OxDeviceState, OX_MAX_DEVICES};
use ox_protocol::{monotonic_ns, DeviceSlot, FrameView, Pose, EYE_COUNT};

use crate::service::ServiceState;

fn pose_from_driver(pose: &ox_driver_api::OxPose) -> Pose {
    Pose {
        position: [pose.position.x, pose.position.y, pose.position.z],
        orientation: [
            pose.orientation.x,
            pose.orientation.y,
            pose.orientation.z,
            pose.orientation.w,
        ],
    }
}

/// Spawn the producer thread. It runs until [`ServiceState::stop`].
pub fn spawn(state: Arc<ServiceState>) -> JoinHandle<()> {
    std::thread::Builder::new()
        .name("ox-frame-producer".to_owned())
        .spawn(move || run(state))
        .expect("spawn frame producer")
}

fn run(state: Arc<ServiceState>) {
    info!(interval = ?state.tick_interval, "frame producer started");

    let mut device_states = [OxDeviceState::default(); OX_MAX_DEVICES];
    let mut device_slots = [DeviceSlot::default(); OX_MAX_DEVICES];
    let mut pixel_buf: Vec<u8> = Vec::new();
    let mut next_tick = Instant::now();

    while state.running.load(Ordering::Relaxed) {
        next_tick += state.tick_interval;
        tick(&state, &mut device_states, &mut device_slots, &mut pixel_buf);

        let now = Instant::now();
        if next_tick > now {
            std::thread::sleep(next_tick - now);
        } else {
            // fell behind; resynchronize rather than burst
            next_tick = now;
        }
    }

    info!("frame producer stopped");
}

fn tick(
    state: &ServiceState,
    device_states: &mut [OxDeviceState; OX_MAX_DEVICES],
    device_slots: &mut [DeviceSlot; OX_MAX_DEVICES],
    pixel_buf: &mut Vec<u8>,
) {
    let predicted_display_time = monotonic_ns();
    let driver = state.driver.lock().expect("driver poisoned");

    let mut views = [FrameView::default(); EYE_COUNT];
    for (eye, view) in views.iter_mut().enumerate() {
        view.pose = pose_from_driver(&driver.update_view_pose(predicted_display_time, eye as u32));
        view.fov = state.display_fov;
    }

    let device_count = if driver.supports_devices() {
        let count = driver.update_devices(predicted_display_time, device_states);
        for (slot, device) in device_slots.iter_mut().zip(device_states.iter()).take(count) {
            *slot = DeviceSlot::new(
                ox_driver_api::read_fixed_str(&device.user_path),
                pose_from_driver(&device.pose),
                device.is_active != 0,
            );
        }
        count
    } else {
        0
    };

    state
        .plane
        .shared()
        .frame()
        .publish(predicted_display_time, &views, &device_slots[..device_count]);

    if driver.supports_frame_submit() {
        for eye in 0..EYE_COUNT {
            if let Some(info) = state.plane.texture(eye).take(pixel_buf) {
                debug!(eye, width = info.width, height = info.height, "forwarding eye texture");
                driver.submit_frame(eye as u32, info, pixel_buf);
            }
        }
    }
}
