//! Service wiring and the control-channel message loop.
//!
//! The control task is single-threaded per client: accept, answer requests
//! until the channel dies, clear the connected flag, accept the next
//! client. Every request gets exactly one response; a malformed payload
//! gets an empty one so the client can always make forward progress.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::BytesMut;
use tracing::{debug, info, warn};

use ox_protocol::{
    AllocateHandleRequest, ControlChannel, ControlListener, Fov, FramePlane, HandleKind,
    HandleResponse, InputStateBooleanResponse, InputStateFloatResponse, InputStateRequest,
    InputStateVector2Response, InteractionProfiles, MessageHeader, MessageType,
    RequestExitSessionRequest, RuntimeProperties, SessionState, SystemProperties,
    ViewConfiguration, ViewConfigurations,
};

use crate::driver_host::DriverHost;
use crate::handles::HandleAllocator;
use crate::session::SessionManager;
use crate::Result;

/// Delay between the automatic Ready -> Synchronized -> Focused steps, so
/// a polling client sees each transition as its own event.
const SESSION_STEP_DELAY: Duration = Duration::from_millis(100);

/// Tunables for a service instance.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub runtime_name: String,
    pub tick_rate_hz: f64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            runtime_name: "ox".to_owned(),
            tick_rate_hz: 90.0,
        }
    }
}

/// State shared between the control task, the frame task, and the session
/// step threads.
pub struct ServiceState {
    pub driver: Mutex<DriverHost>,
    pub handles: HandleAllocator,
    pub sessions: SessionManager,
    pub plane: FramePlane,
    pub running: AtomicBool,
    pub tick_interval: Duration,
    pub display_fov: Fov,

    runtime_properties: RuntimeProperties,
    system_properties: SystemProperties,
    view_configurations: ViewConfigurations,
    interaction_profiles: InteractionProfiles,
}

impl ServiceState {
    pub fn stop(&self) {
        self.running.store(false, Ordering::Relaxed);
        self.plane.shared().set_service_ready(false);
    }
}

pub struct Service {
    state: Arc<ServiceState>,
}

impl Service {
    /// Bring the service up over a named shared-memory region.
    pub fn create(driver: DriverHost, shm_name: &str, config: ServiceConfig) -> Result<Self> {
        // clear any region a crashed predecessor left behind
        FramePlane::unlink(shm_name);
        let plane = FramePlane::create(shm_name)?;
        Self::with_plane(driver, plane, config)
    }

    /// Heap-backed service for tests and in-process harnesses.
    pub fn in_memory(driver: DriverHost, config: ServiceConfig) -> Result<Self> {
        Self::with_plane(driver, FramePlane::in_memory(), config)
    }

    fn with_plane(driver: DriverHost, plane: FramePlane, config: ServiceConfig) -> Result<Self> {
        let identity = driver.device_identity();
        let display = driver.display_properties();
        let tracking = driver.tracking_capabilities();
        let profiles = driver.interaction_profiles();

        let runtime_properties = RuntimeProperties {
            runtime_name: config.runtime_name.clone(),
            version_major: 1,
            version_minor: 0,
            version_patch: 0,
        };
        let system_properties = SystemProperties {
            system_name: identity.name,
            max_swapchain_width: display.display_width,
            max_swapchain_height: display.display_height,
            max_layer_count: 16,
            orientation_tracking: tracking.has_orientation_tracking != 0,
            position_tracking: tracking.has_position_tracking != 0,
        };
        let view = ViewConfiguration {
            recommended_width: display.recommended_width,
            recommended_height: display.recommended_height,
            recommended_sample_count: 1,
            max_sample_count: 4,
        };
        let view_configurations = ViewConfigurations { views: [view; 2] };
        let display_fov = Fov {
            angle_left: display.fov.angle_left,
            angle_right: display.fov.angle_right,
            angle_up: display.fov.angle_up,
            angle_down: display.fov.angle_down,
        };

        let shared = plane.shared();
        shared.set_service_ready(true);
        shared.set_client_connected(false);
        shared.set_session_state(SessionState::Idle);
        shared.set_active_session_handle(0);

        let tick_interval = Duration::from_secs_f64(1.0 / config.tick_rate_hz);

        Ok(Self {
            state: Arc::new(ServiceState {
                driver: Mutex::new(driver),
                handles: HandleAllocator::new(),
                sessions: SessionManager::new(),
                plane,
                running: AtomicBool::new(true),
                tick_interval,
                display_fov,
                runtime_properties,
                system_properties,
                view_configurations,
                interaction_profiles: InteractionProfiles { profiles },
            }),
        })
    }

    pub fn state(&self) -> &Arc<ServiceState> {
        &self.state
    }

    /// Accept clients one after another until the service stops.
    pub fn run_control(&self, listener: &ControlListener) {
        while self.state.running.load(Ordering::Relaxed) {
            info!("waiting for client connection");
            let channel = match listener.accept() {
                Ok(channel) => channel,
                Err(err) => {
                    warn!(%err, "accept failed");
                    std::thread::sleep(Duration::from_secs(1));
                    continue;
                }
            };

            info!("client connected");
            self.state.plane.shared().set_client_connected(true);
            self.message_loop(channel);
            self.state.plane.shared().set_client_connected(false);
            info!("client disconnected, ready for next connection");
        }
    }

    /// Answer requests on one connected channel until it dies or the
    /// client disconnects.
    pub fn message_loop(&self, mut channel: ControlChannel) {
        loop {
            let (header, payload) = match channel.recv() {
                Ok(message) => message,
                Err(err) => {
                    debug!(%err, "control receive failed, treating as disconnect");
                    return;
                }
            };

            let disconnect = header.message_type == MessageType::Disconnect;
            if self.handle_message(&mut channel, header, &payload).is_err() {
                // peer is gone mid-response
                return;
            }
            if disconnect {
                return;
            }
        }
    }

    fn handle_message(
        &self,
        channel: &mut ControlChannel,
        header: MessageHeader,
        payload: &[u8],
    ) -> ox_protocol::Result<()> {
        let state = &self.state;
        let mut response = BytesMut::new();

        match header.message_type {
            MessageType::Connect => {
                debug!("client connect");
            }
            MessageType::Disconnect => {
                info!("client requested disconnect");
            }
            MessageType::CreateSession => {
                let handle = state.handles.allocate(HandleKind::Session);
                let shared = state.plane.shared();
                shared.set_active_session_handle(handle);
                state.sessions.transition(shared, SessionState::Ready);
                self.spawn_session_steps();
                HandleResponse { handle }.encode(&mut response);
                info!(handle, "session created");
            }
            MessageType::DestroySession => {
                self.end_session();
                info!("session destroyed");
            }
            MessageType::RequestExitSession => {
                match RequestExitSessionRequest::decode(payload) {
                    Ok(request) => {
                        debug!(handle = request.session_handle, "exit requested");
                        self.end_session();
                    }
                    Err(err) => warn!(%err, "malformed exit request"),
                }
            }
            MessageType::AllocateHandle => match AllocateHandleRequest::decode(payload) {
                Ok(request) => {
                    let handle = state.handles.allocate(request.kind);
                    HandleResponse { handle }.encode(&mut response);
                }
                Err(err) => warn!(%err, "malformed allocate request"),
            },
            MessageType::GetNextEvent => {
                if let Some(event) = state.sessions.next_event() {
                    event.encode(&mut response);
                }
            }
            MessageType::GetRuntimeProperties => {
                state.runtime_properties.encode(&mut response);
            }
            MessageType::GetSystemProperties => {
                state.system_properties.encode(&mut response);
            }
            MessageType::GetViewConfigurations => {
                state.view_configurations.encode(&mut response);
            }
            MessageType::GetInteractionProfiles => {
                state.interaction_profiles.encode(&mut response);
            }
            MessageType::GetInputStateBoolean => match InputStateRequest::decode(payload) {
                Ok(request) => {
                    let driver = state.driver.lock().expect("driver poisoned");
                    let value = driver.input_boolean(
                        request.predicted_time,
                        &request.user_path,
                        &request.component_path,
                    );
                    InputStateBooleanResponse {
                        available: value.is_some(),
                        value: value.unwrap_or(false),
                    }
                    .encode(&mut response);
                }
                Err(err) => warn!(%err, "malformed input query"),
            },
            MessageType::GetInputStateFloat => match InputStateRequest::decode(payload) {
                Ok(request) => {
                    let driver = state.driver.lock().expect("driver poisoned");
                    let value = driver.input_float(
                        request.predicted_time,
                        &request.user_path,
                        &request.component_path,
                    );
                    InputStateFloatResponse {
                        available: value.is_some(),
                        value: value.unwrap_or(0.0),
                    }
                    .encode(&mut response);
                }
                Err(err) => warn!(%err, "malformed input query"),
            },
            MessageType::GetInputStateVector2 => match InputStateRequest::decode(payload) {
                Ok(request) => {
                    let driver = state.driver.lock().expect("driver poisoned");
                    let value = driver.input_vector2(
                        request.predicted_time,
                        &request.user_path,
                        &request.component_path,
                    );
                    let (x, y) = value.unwrap_or((0.0, 0.0));
                    InputStateVector2Response {
                        available: value.is_some(),
                        x,
                        y,
                    }
                    .encode(&mut response);
                }
                Err(err) => warn!(%err, "malformed input query"),
            },
            MessageType::Response => {
                warn!("client sent a response frame; ignoring");
            }
        }

        channel.send(MessageType::Response, header.sequence, &response)
    }

    /// Walk the freshly created session up to Focused on its own thread,
    /// one step per delay, the way real hardware would ratchet in.
    fn spawn_session_steps(&self) {
        let state = Arc::clone(&self.state);
        std::thread::spawn(move || {
            let steps = [
                (SessionState::Ready, SessionState::Synchronized),
                (SessionState::Synchronized, SessionState::Focused),
            ];
            for (expected, next) in steps {
                std::thread::sleep(SESSION_STEP_DELAY);
                if !state.running.load(Ordering::Relaxed) {
                    return;
                }
                let shared = state.plane.shared();
                // abandoned mid-walk (exit or destroy moved the machine)
                if shared.active_session_handle() == 0 || shared.session_state() != expected {
                    return;
                }
                state.sessions.transition(shared, next);
            }
        });
    }

    fn end_session(&self) {
        let shared = self.state.plane.shared();
        if shared.active_session_handle() == 0 {
            return;
        }
        self.state.sessions.transition(shared, SessionState::Stopping);
        self.state.sessions.transition(shared, SessionState::Idle);
        let handle = shared.active_session_handle();
        self.state.handles.release(handle);
        shared.set_active_session_handle(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ox_driver_api::OxDriverCallbacks;

    fn null_service() -> Service {
        let mut callbacks = OxDriverCallbacks::default();
        driver::fill_callbacks(&mut callbacks);
        let host = DriverHost::from_callbacks(callbacks).unwrap();
        Service::in_memory(host, ServiceConfig::default()).unwrap()
    }

    #[test]
    fn metadata_caches_come_from_the_driver() {
        let service = null_service();
        let state = service.state();
        assert_eq!(state.runtime_properties.runtime_name, "ox");
        assert_eq!(state.system_properties.system_name, "Null VR Headset");
        assert!(state.system_properties.orientation_tracking);
        assert_eq!(
            state.view_configurations.views[0].recommended_width,
            1440
        );
        assert_eq!(
            state.interaction_profiles.profiles,
            vec!["/interaction_profiles/khr/simple_controller".to_owned()]
        );
    }

    #[test]
    fn plane_is_marked_ready_at_startup() {
        let service = null_service();
        let shared = service.state().plane.shared();
        assert!(shared.service_ready());
        assert!(!shared.client_connected());
        assert_eq!(shared.session_state(), SessionState::Idle);
    }

    #[test]
    fn end_session_walks_stopping_then_idle() {
        let service = null_service();
        let state = service.state();
        let shared = state.plane.shared();

        let handle = state.handles.allocate(HandleKind::Session);
        shared.set_active_session_handle(handle);
        state.sessions.transition(shared, SessionState::Focused);
        // drain the setup event
        while state.sessions.next_event().is_some() {}

        service.end_session();
        assert_eq!(
            state.sessions.next_event().unwrap().state,
            SessionState::Stopping
        );
        assert_eq!(state.sessions.next_event().unwrap().state, SessionState::Idle);
        assert_eq!(shared.active_session_handle(), 0);
        assert_eq!(state.handles.kind_of(handle), None);
    }

    #[test]
    fn end_session_without_session_is_a_no_op() {
        let service = null_service();
        service.end_session();
        assert!(service.state().sessions.next_event().is_none());
    }
}
