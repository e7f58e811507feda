//! Concurrency checks for the frame-plane seqlock: a reader that observes
//! the same even frame_id before and after its copy must see one
//! producer tick, never a blend of two.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ox_protocol::{DeviceSlot, FramePlane, FrameView, Pose, EYE_COUNT};

/// Every field of tick N is derived from N, so any mixture is detectable.
fn views_for_tick(tick: u64) -> [FrameView; EYE_COUNT] {
    let mut views = [FrameView::default(); EYE_COUNT];
    for (eye, view) in views.iter_mut().enumerate() {
        let base = tick as f32;
        view.pose.position = [base, base + eye as f32, -base];
        view.pose.orientation = [0.0, 0.0, 0.0, 1.0];
        view.fov.angle_left = -base;
        view.fov.angle_right = base;
    }
    views
}

fn devices_for_tick(tick: u64) -> Vec<DeviceSlot> {
    let mut pose = Pose::IDENTITY;
    pose.position = [tick as f32, 0.0, 0.0];
    vec![
        DeviceSlot::new("/user/hand/left", pose, true),
        DeviceSlot::new("/user/hand/right", pose, true),
    ]
}

#[test]
fn frame_reads_are_torn_free_under_contention() {
    const READS: usize = 10_000;

    let plane = Arc::new(FramePlane::in_memory());
    let stop = Arc::new(AtomicBool::new(false));

    let producer = {
        let plane = Arc::clone(&plane);
        let stop = Arc::clone(&stop);
        std::thread::spawn(move || {
            let mut tick: u64 = 0;
            while !stop.load(Ordering::Relaxed) {
                tick += 1;
                plane
                    .shared()
                    .frame()
                    .publish(tick as i64, &views_for_tick(tick), &devices_for_tick(tick));
            }
        })
    };

    let mut torn = 0usize;
    let mut last_frame_id = 0u64;
    let mut last_time = 0i64;
    for _ in 0..READS {
        let snapshot = plane.shared().frame().snapshot();

        // frame_id and predicted_display_time never move backwards
        assert!(snapshot.frame_id >= last_frame_id);
        assert!(snapshot.predicted_display_time >= last_time);
        last_frame_id = snapshot.frame_id;
        last_time = snapshot.predicted_display_time;

        if snapshot.frame_id == 0 {
            continue;
        }
        let tick = snapshot.frame_id / 2;
        let expected_views = views_for_tick(tick);
        let expected_pos = [tick as f32, 0.0, 0.0];
        let consistent = snapshot.predicted_display_time == tick as i64
            && snapshot.views[0] == expected_views[0]
            && snapshot.views[1] == expected_views[1]
            && snapshot.device_count == 2
            && snapshot.devices[0].pose.position == expected_pos
            && snapshot.devices[1].pose.position == expected_pos;
        if !consistent {
            torn += 1;
        }
    }

    stop.store(true, Ordering::Relaxed);
    producer.join().unwrap();

    assert_eq!(torn, 0, "observed {torn} torn frame reads out of {READS}");
}

#[test]
fn wait_style_reads_see_progress() {
    let plane = Arc::new(FramePlane::in_memory());
    let frame = plane.shared().frame();

    for tick in 1..=100u64 {
        frame.publish(tick as i64 * 11_111_111, &views_for_tick(tick), &[]);
        assert_eq!(frame.frame_id(), tick * 2);
        assert_eq!(frame.predicted_display_time(), tick as i64 * 11_111_111);
    }
}
