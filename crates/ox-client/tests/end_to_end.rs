//! Full-stack tests: a real service (null driver, real shared memory,
//! real control socket) and the real IPC connection underneath the client
//! runtime.

#![cfg(unix)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use ox_client::{
    ActionCreateInfo, ActionType, InstanceCreateInfo, IpcServiceConnection, ReferenceSpaceType,
    Runtime, SessionCreateInfo, SuggestedBinding, XrError, LOCATION_ALL_TRACKED,
};
use ox_driver_api::OxDriverCallbacks;
use ox_protocol::{ControlListener, FramePlane, SessionState, SessionStateEvent};
use ox_service::{DriverHost, Service, ServiceConfig};

struct Harness {
    runtime: Runtime,
    state: Arc<ox_service::service::ServiceState>,
    shm_name: String,
}

impl Harness {
    fn start(tag: &str) -> Self {
        let shm_name = format!("ox_e2e_shm_{}_{}", tag, std::process::id());
        let control_name = format!("ox_e2e_ctl_{}_{}", tag, std::process::id());

        let mut callbacks = OxDriverCallbacks::default();
        driver::fill_callbacks(&mut callbacks);
        let host = DriverHost::from_callbacks(callbacks).unwrap();

        let service = Service::create(host, &shm_name, ServiceConfig::default()).unwrap();
        let state = Arc::clone(service.state());
        let listener = ControlListener::bind(&control_name).unwrap();
        ox_service::frame_producer::spawn(Arc::clone(&state));
        std::thread::spawn(move || service.run_control(&listener));

        let connection = IpcServiceConnection::with_names(&shm_name, &control_name);
        Self {
            runtime: Runtime::with_connection(Arc::new(connection)),
            state,
            shm_name,
        }
    }

    fn wait_for_state(
        &self,
        instance: ox_client::InstanceHandle,
        expected: SessionState,
    ) -> SessionStateEvent {
        let deadline = Instant::now() + Duration::from_secs(3);
        loop {
            if let Some(event) = self.runtime.poll_event(instance).unwrap() {
                assert_eq!(event.state, expected, "unexpected transition order");
                return event;
            }
            assert!(
                Instant::now() < deadline,
                "timed out waiting for {expected:?}"
            );
            std::thread::sleep(Duration::from_millis(10));
        }
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.state.stop();
        FramePlane::unlink(&self.shm_name);
    }
}

#[test]
fn instance_and_metadata_over_real_ipc() {
    let harness = Harness::start("meta");
    let instance = harness
        .runtime
        .create_instance(&InstanceCreateInfo {
            application_name: "T".to_owned(),
            application_version: 1,
        })
        .unwrap();

    let properties = harness.runtime.instance_properties(instance).unwrap();
    assert_eq!(properties.runtime_name, "ox");

    let system = harness.runtime.system_properties(instance).unwrap();
    assert_eq!(system.system_name, "Null VR Headset");
    assert!(system.orientation_tracking);

    harness.runtime.destroy_instance(instance).unwrap();
    assert_eq!(
        harness.runtime.destroy_instance(instance),
        Err(XrError::HandleInvalid)
    );
}

#[test]
fn session_walks_ready_synchronized_focused_then_exits() {
    let harness = Harness::start("lifecycle");
    let instance = harness
        .runtime
        .create_instance(&InstanceCreateInfo {
            application_name: "lifecycle".to_owned(),
            application_version: 1,
        })
        .unwrap();
    let session = harness
        .runtime
        .create_session(instance, &SessionCreateInfo::default())
        .unwrap();

    let ready = harness.wait_for_state(instance, SessionState::Ready);
    assert_eq!(ready.session_handle, session.raw());
    let synchronized = harness.wait_for_state(instance, SessionState::Synchronized);
    assert!(synchronized.timestamp >= ready.timestamp);
    let focused = harness.wait_for_state(instance, SessionState::Focused);
    assert!(focused.timestamp >= synchronized.timestamp);

    harness.runtime.request_exit_session(session).unwrap();
    harness.wait_for_state(instance, SessionState::Stopping);
    harness.wait_for_state(instance, SessionState::Idle);
}

#[test]
fn frames_flow_and_action_spaces_track() {
    let harness = Harness::start("frames");
    let instance = harness
        .runtime
        .create_instance(&InstanceCreateInfo {
            application_name: "frames".to_owned(),
            application_version: 1,
        })
        .unwrap();
    let session = harness
        .runtime
        .create_session(instance, &SessionCreateInfo::default())
        .unwrap();

    // frame ids and predicted times advance monotonically
    let first = harness.runtime.wait_frame(session).unwrap();
    let deadline = Instant::now() + Duration::from_secs(2);
    let mut later = first;
    while later.predicted_display_time <= first.predicted_display_time {
        assert!(Instant::now() < deadline, "frame producer stalled");
        std::thread::sleep(Duration::from_millis(5));
        later = harness.runtime.wait_frame(session).unwrap();
    }

    let (_flags, views) = harness
        .runtime
        .locate_views(session, later.predicted_display_time)
        .unwrap();
    let separation = views[1].pose.position[0] - views[0].pose.position[0];
    assert!((separation - 0.064).abs() < 1e-5);

    // the null driver tracks both hands
    let left = harness
        .runtime
        .string_to_path(instance, "/user/hand/left")
        .unwrap();
    let set = harness.runtime.create_action_set(instance, "gameplay").unwrap();
    let pose_action = harness
        .runtime
        .create_action(
            set,
            &ActionCreateInfo {
                name: "grip".to_owned(),
                action_type: ActionType::Pose,
                subaction_paths: vec![left],
            },
        )
        .unwrap();
    let stage = harness
        .runtime
        .create_reference_space(session, ReferenceSpaceType::Stage)
        .unwrap();
    let space = harness
        .runtime
        .create_action_space(session, pose_action, Some(left))
        .unwrap();

    let location = harness
        .runtime
        .locate_space(space, stage, later.predicted_display_time)
        .unwrap();
    assert_eq!(location.location_flags, LOCATION_ALL_TRACKED);
    assert!(location.pose.position[0] < 0.0, "left hand sits left of center");
}

#[test]
fn action_state_resolves_through_the_null_driver() {
    let harness = Harness::start("actions");
    let instance = harness
        .runtime
        .create_instance(&InstanceCreateInfo {
            application_name: "actions".to_owned(),
            application_version: 1,
        })
        .unwrap();
    let session = harness
        .runtime
        .create_session(instance, &SessionCreateInfo::default())
        .unwrap();

    let right = harness
        .runtime
        .string_to_path(instance, "/user/hand/right")
        .unwrap();
    let left = harness
        .runtime
        .string_to_path(instance, "/user/hand/left")
        .unwrap();
    let profile = harness
        .runtime
        .string_to_path(instance, "/interaction_profiles/khr/simple_controller")
        .unwrap();
    let binding = harness
        .runtime
        .string_to_path(instance, "/user/hand/right/input/trigger/value")
        .unwrap();

    let set = harness.runtime.create_action_set(instance, "gameplay").unwrap();
    let action = harness
        .runtime
        .create_action(
            set,
            &ActionCreateInfo {
                name: "fire".to_owned(),
                action_type: ActionType::Float,
                subaction_paths: vec![left, right],
            },
        )
        .unwrap();

    harness
        .runtime
        .suggest_interaction_profile_bindings(
            instance,
            profile,
            &[SuggestedBinding { action, binding }],
        )
        .unwrap();
    harness
        .runtime
        .attach_session_action_sets(session, &[set])
        .unwrap();
    assert_eq!(
        harness.runtime.current_interaction_profile(session).unwrap(),
        Some(profile)
    );

    let state = harness
        .runtime
        .action_state_float(session, action, Some(right))
        .unwrap();
    assert!(state.active);
    assert_eq!(state.current, 0.75);
}
