//! End-to-end control-channel tests: a real listener, a real client
//! channel, and the null driver registered in-process.

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::BytesMut;

use ox_driver_api::OxDriverCallbacks;
use ox_protocol::{
    AllocateHandleRequest, ControlChannel, ControlListener, HandleKind, HandleResponse,
    InputStateFloatResponse, InputStateRequest, InteractionProfiles, MessageType,
    RuntimeProperties, SessionState, SessionStateEvent, SystemProperties,
};
use ox_service::{DriverHost, Service, ServiceConfig};

struct TestClient {
    channel: ControlChannel,
    sequence: u32,
}

impl TestClient {
    fn connect(name: &str) -> Self {
        let channel = ControlChannel::connect(name, Duration::from_secs(5)).unwrap();
        Self {
            channel,
            sequence: 0,
        }
    }

    fn request(&mut self, message_type: MessageType, payload: &[u8]) -> Vec<u8> {
        let sequence = self.sequence;
        self.sequence += 1;
        self.channel.send(message_type, sequence, payload).unwrap();
        let (header, payload) = self.channel.recv().unwrap();
        assert_eq!(header.message_type, MessageType::Response);
        assert_eq!(header.sequence, sequence);
        payload
    }

    fn allocate(&mut self, kind: HandleKind) -> u64 {
        let mut buf = BytesMut::new();
        AllocateHandleRequest { kind }.encode(&mut buf);
        HandleResponse::decode(&self.request(MessageType::AllocateHandle, &buf))
            .unwrap()
            .handle
    }

    fn next_event(&mut self) -> Option<SessionStateEvent> {
        let payload = self.request(MessageType::GetNextEvent, &[]);
        if payload.is_empty() {
            None
        } else {
            Some(SessionStateEvent::decode(&payload).unwrap())
        }
    }

    fn wait_for_event(&mut self) -> SessionStateEvent {
        let deadline = Instant::now() + Duration::from_secs(2);
        loop {
            if let Some(event) = self.next_event() {
                return event;
            }
            assert!(Instant::now() < deadline, "no event before deadline");
            std::thread::sleep(Duration::from_millis(10));
        }
    }
}

fn start_service(tag: &str) -> (Arc<ox_service::service::ServiceState>, String) {
    let mut callbacks = OxDriverCallbacks::default();
    driver::fill_callbacks(&mut callbacks);
    let host = DriverHost::from_callbacks(callbacks).unwrap();
    let service = Service::in_memory(host, ServiceConfig::default()).unwrap();
    let state = Arc::clone(service.state());

    let control_name = format!("ox_test_{}_{}", tag, std::process::id());
    let listener = ControlListener::bind(&control_name).unwrap();
    std::thread::spawn(move || service.run_control(&listener));

    (state, control_name)
}

#[test]
fn static_metadata_round_trip() {
    let (_state, name) = start_service("metadata");
    let mut client = TestClient::connect(&name);

    assert!(client.request(MessageType::Connect, &[]).is_empty());

    let runtime =
        RuntimeProperties::decode(&client.request(MessageType::GetRuntimeProperties, &[]))
            .unwrap();
    assert_eq!(runtime.runtime_name, "ox");
    assert_eq!(runtime.version_major, 1);

    let system =
        SystemProperties::decode(&client.request(MessageType::GetSystemProperties, &[])).unwrap();
    assert_eq!(system.system_name, "Null VR Headset");
    assert!(system.position_tracking);

    let profiles =
        InteractionProfiles::decode(&client.request(MessageType::GetInteractionProfiles, &[]))
            .unwrap();
    assert_eq!(
        profiles.profiles,
        vec!["/interaction_profiles/khr/simple_controller".to_owned()]
    );
}

#[test]
fn handles_are_unique_across_kinds() {
    let (_state, name) = start_service("handles");
    let mut client = TestClient::connect(&name);

    let mut seen = std::collections::HashSet::new();
    for kind in [
        HandleKind::Instance,
        HandleKind::Space,
        HandleKind::Action,
        HandleKind::ActionSet,
        HandleKind::Swapchain,
    ] {
        for _ in 0..10 {
            let handle = client.allocate(kind);
            assert_ne!(handle, 0);
            assert!(seen.insert(handle), "handle {handle} repeated");
        }
    }
}

#[test]
fn session_lifecycle_event_sequence() {
    let (state, name) = start_service("lifecycle");
    let mut client = TestClient::connect(&name);

    let payload = client.request(MessageType::CreateSession, &[]);
    let session = HandleResponse::decode(&payload).unwrap().handle;
    assert_ne!(session, 0);
    assert_eq!(state.plane.shared().active_session_handle(), session);

    let ready = client.wait_for_event();
    assert_eq!(ready.state, SessionState::Ready);
    assert_eq!(ready.session_handle, session);
    assert_eq!(client.wait_for_event().state, SessionState::Synchronized);
    assert_eq!(client.wait_for_event().state, SessionState::Focused);

    let mut exit = BytesMut::new();
    ox_protocol::RequestExitSessionRequest {
        session_handle: session,
    }
    .encode(&mut exit);
    client.request(MessageType::RequestExitSession, &exit);

    assert_eq!(client.wait_for_event().state, SessionState::Stopping);
    assert_eq!(client.wait_for_event().state, SessionState::Idle);
    assert_eq!(state.plane.shared().active_session_handle(), 0);
}

#[test]
fn input_queries_hit_the_driver() {
    let (_state, name) = start_service("input");
    let mut client = TestClient::connect(&name);

    let mut buf = BytesMut::new();
    InputStateRequest {
        user_path: "/user/hand/right".to_owned(),
        component_path: "/input/trigger/value".to_owned(),
        predicted_time: 0,
    }
    .encode(&mut buf);
    let response =
        InputStateFloatResponse::decode(&client.request(MessageType::GetInputStateFloat, &buf))
            .unwrap();
    assert!(response.available);
    assert_eq!(response.value, 0.75);

    let mut buf = BytesMut::new();
    InputStateRequest {
        user_path: "/user/hand/right".to_owned(),
        component_path: "/input/nonexistent".to_owned(),
        predicted_time: 0,
    }
    .encode(&mut buf);
    let response =
        InputStateFloatResponse::decode(&client.request(MessageType::GetInputStateFloat, &buf))
            .unwrap();
    assert!(!response.available);
}

#[test]
fn malformed_payload_still_gets_a_response() {
    let (_state, name) = start_service("malformed");
    let mut client = TestClient::connect(&name);

    // AllocateHandle with a truncated payload
    let payload = client.request(MessageType::AllocateHandle, &[1]);
    assert!(payload.is_empty());

    // service is still alive afterwards
    let handle = client.allocate(HandleKind::Space);
    assert_ne!(handle, 0);
}

#[test]
fn reconnect_after_client_death() {
    let (state, name) = start_service("reconnect");

    let first_session;
    {
        let mut first = TestClient::connect(&name);
        first.request(MessageType::Connect, &[]);
        first_session =
            HandleResponse::decode(&first.request(MessageType::CreateSession, &[]))
                .unwrap()
                .handle;
        // dropped without Disconnect: simulates a killed client
    }

    let deadline = Instant::now() + Duration::from_secs(2);
    while state.plane.shared().client_connected() && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(10));
    }
    assert!(!state.plane.shared().client_connected());

    let mut second = TestClient::connect(&name);
    second.request(MessageType::Connect, &[]);
    let second_session =
        HandleResponse::decode(&second.request(MessageType::CreateSession, &[]))
            .unwrap()
            .handle;
    assert_ne!(second_session, 0);
    assert_ne!(second_session, first_session);
}
