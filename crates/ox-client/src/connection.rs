//! The seam between the client library and the service.
//!
//! [`ServiceConnection`] is what the rest of the crate programs against;
//! [`IpcServiceConnection`] is the real thing (shared memory plus control
//! channel), and tests substitute a mock. All control traffic is strictly
//! synchronous: one request, one response, serialized behind one mutex,
//! with monotonically increasing sequence numbers as a sanity check.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::BytesMut;
use tracing::{debug, error, info};

use ox_protocol::{
    AllocateHandleRequest, ControlChannel, FramePlane, FrameSnapshot, HandleKind, HandleResponse,
    InputStateBooleanResponse, InputStateFloatResponse, InputStateRequest,
    InputStateVector2Response, InteractionProfiles, MessageType, RequestExitSessionRequest,
    RuntimeProperties, SessionStateEvent, SystemProperties, ViewConfigurations, CONTROL_NAME,
    SHM_NAME,
};

use crate::{XrError, XrResult};

/// Default control-channel connect timeout.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Everything the client core needs from the service side. The frame-plane
/// accessors never block on IPC; everything else is one synchronous round
/// trip.
pub trait ServiceConnection: Send + Sync {
    fn connect(&self) -> XrResult<()>;
    fn disconnect(&self);
    fn is_connected(&self) -> bool;

    /// Seqlock-consistent copy of the current frame, or `None` when no
    /// frame plane is mapped.
    fn frame(&self) -> Option<FrameSnapshot>;

    /// Latest predicted display time; single atomic read.
    fn predicted_display_time(&self) -> Option<i64>;

    /// Publish one eye's pixels into the frame plane.
    fn submit_texture(
        &self,
        eye: usize,
        width: u32,
        height: u32,
        format: u32,
        pixels: &[u8],
    ) -> XrResult<()>;

    fn allocate_handle(&self, kind: HandleKind) -> XrResult<u64>;
    fn create_session(&self) -> XrResult<u64>;
    fn destroy_session(&self) -> XrResult<()>;
    fn request_exit_session(&self, session_handle: u64) -> XrResult<()>;
    fn next_event(&self) -> XrResult<Option<SessionStateEvent>>;

    fn runtime_properties(&self) -> XrResult<RuntimeProperties>;
    fn system_properties(&self) -> XrResult<SystemProperties>;
    fn view_configurations(&self) -> XrResult<ViewConfigurations>;
    fn interaction_profiles(&self) -> XrResult<InteractionProfiles>;

    /// Typed input queries; `Ok(None)` means the component is not exposed
    /// by the driver.
    fn input_boolean(
        &self,
        user_path: &str,
        component_path: &str,
        predicted_time: i64,
    ) -> XrResult<Option<bool>>;
    fn input_float(
        &self,
        user_path: &str,
        component_path: &str,
        predicted_time: i64,
    ) -> XrResult<Option<f32>>;
    fn input_vector2(
        &self,
        user_path: &str,
        component_path: &str,
        predicted_time: i64,
    ) -> XrResult<Option<(f32, f32)>>;
}

struct Channel {
    control: ControlChannel,
    sequence: u32,
}

struct Connected {
    channel: Channel,
    runtime_properties: RuntimeProperties,
    system_properties: SystemProperties,
    view_configurations: ViewConfigurations,
    interaction_profiles: InteractionProfiles,
}

/// The real connection: maps the service's frame plane and speaks the
/// control protocol.
pub struct IpcServiceConnection {
    shm_name: String,
    control_name: String,
    // the send mutex: every request/response pair happens under it
    state: Mutex<Option<Connected>>,
    // hot path clones the Arc and reads atomics without the send mutex
    plane: Mutex<Option<Arc<FramePlane>>>,
}

impl IpcServiceConnection {
    pub fn new() -> Self {
        Self::with_names(SHM_NAME, CONTROL_NAME)
    }

    pub fn with_names(shm_name: &str, control_name: &str) -> Self {
        Self {
            shm_name: shm_name.to_owned(),
            control_name: control_name.to_owned(),
            state: Mutex::new(None),
            plane: Mutex::new(None),
        }
    }

    fn current_plane(&self) -> Option<Arc<FramePlane>> {
        self.plane.lock().expect("plane lock poisoned").clone()
    }

    fn round_trip(
        channel: &mut Channel,
        message_type: MessageType,
        payload: &[u8],
    ) -> XrResult<Vec<u8>> {
        let sequence = channel.sequence;
        channel.sequence = channel.sequence.wrapping_add(1);

        channel
            .control
            .send(message_type, sequence, payload)
            .map_err(|e| {
                error!(%e, "control send failed");
                XrError::RuntimeFailure
            })?;

        let (header, response) = channel.control.recv().map_err(|e| {
            error!(%e, "control receive failed");
            XrError::RuntimeFailure
        })?;

        // strictly synchronous protocol: the sequence is a sanity check
        if header.message_type != MessageType::Response || header.sequence != sequence {
            error!(
                got = ?header.message_type,
                expected_sequence = sequence,
                got_sequence = header.sequence,
                "response desynchronized"
            );
            return Err(XrError::RuntimeFailure);
        }
        Ok(response)
    }

    fn request(&self, message_type: MessageType, payload: &[u8]) -> XrResult<Vec<u8>> {
        let mut state = self.state.lock().expect("connection lock poisoned");
        let connected = state.as_mut().ok_or(XrError::RuntimeFailure)?;
        Self::round_trip(&mut connected.channel, message_type, payload)
    }

    fn with_metadata<T>(&self, f: impl FnOnce(&Connected) -> T) -> XrResult<T> {
        let state = self.state.lock().expect("connection lock poisoned");
        state.as_ref().map(f).ok_or(XrError::RuntimeFailure)
    }
}

impl Default for IpcServiceConnection {
    fn default() -> Self {
        Self::new()
    }
}

impl ServiceConnection for IpcServiceConnection {
    fn connect(&self) -> XrResult<()> {
        let mut state = self.state.lock().expect("connection lock poisoned");
        if state.is_some() {
            return Ok(());
        }

        // Version gate first: a mismatched service is refused before any
        // control-channel traffic.
        let plane = FramePlane::open(&self.shm_name).map_err(|e| {
            error!(%e, "failed to map service frame plane");
            XrError::RuntimeFailure
        })?;

        let control =
            ControlChannel::connect(&self.control_name, CONNECT_TIMEOUT).map_err(|e| {
                error!(%e, "failed to connect control channel");
                XrError::RuntimeFailure
            })?;
        let mut channel = Channel {
            control,
            sequence: 0,
        };

        Self::round_trip(&mut channel, MessageType::Connect, &[])?;

        // Static metadata is cached once per connection.
        let runtime_properties = RuntimeProperties::decode(&Self::round_trip(
            &mut channel,
            MessageType::GetRuntimeProperties,
            &[],
        )?)
        .map_err(|_| XrError::RuntimeFailure)?;
        let system_properties = SystemProperties::decode(&Self::round_trip(
            &mut channel,
            MessageType::GetSystemProperties,
            &[],
        )?)
        .map_err(|_| XrError::RuntimeFailure)?;
        let view_configurations = ViewConfigurations::decode(&Self::round_trip(
            &mut channel,
            MessageType::GetViewConfigurations,
            &[],
        )?)
        .map_err(|_| XrError::RuntimeFailure)?;
        let interaction_profiles = InteractionProfiles::decode(&Self::round_trip(
            &mut channel,
            MessageType::GetInteractionProfiles,
            &[],
        )?)
        .map_err(|_| XrError::RuntimeFailure)?;

        plane.shared().set_client_connected(true);
        *self.plane.lock().expect("plane lock poisoned") = Some(Arc::new(plane));
        *state = Some(Connected {
            channel,
            runtime_properties,
            system_properties,
            view_configurations,
            interaction_profiles,
        });

        info!("connected to ox service");
        Ok(())
    }

    fn disconnect(&self) {
        let mut state = self.state.lock().expect("connection lock poisoned");
        if let Some(connected) = state.as_mut() {
            let _ = Self::round_trip(&mut connected.channel, MessageType::Disconnect, &[]);
        }
        *state = None;

        let mut plane = self.plane.lock().expect("plane lock poisoned");
        if let Some(plane) = plane.as_ref() {
            plane.shared().set_client_connected(false);
        }
        *plane = None;
        debug!("disconnected from ox service");
    }

    fn is_connected(&self) -> bool {
        self.state.lock().expect("connection lock poisoned").is_some()
    }

    fn frame(&self) -> Option<FrameSnapshot> {
        self.current_plane()
            .map(|plane| plane.shared().frame().snapshot())
    }

    fn predicted_display_time(&self) -> Option<i64> {
        self.current_plane()
            .map(|plane| plane.shared().frame().predicted_display_time())
    }

    fn submit_texture(
        &self,
        eye: usize,
        width: u32,
        height: u32,
        format: u32,
        pixels: &[u8],
    ) -> XrResult<()> {
        let plane = self.current_plane().ok_or(XrError::RuntimeFailure)?;
        plane.texture(eye).publish(width, height, format, pixels);
        Ok(())
    }

    fn allocate_handle(&self, kind: HandleKind) -> XrResult<u64> {
        let mut payload = BytesMut::new();
        AllocateHandleRequest { kind }.encode(&mut payload);
        let response = self.request(MessageType::AllocateHandle, &payload)?;
        let handle = HandleResponse::decode(&response)
            .map_err(|_| XrError::RuntimeFailure)?
            .handle;
        if handle == 0 {
            return Err(XrError::RuntimeFailure);
        }
        Ok(handle)
    }

    fn create_session(&self) -> XrResult<u64> {
        let response = self.request(MessageType::CreateSession, &[])?;
        let handle = HandleResponse::decode(&response)
            .map_err(|_| XrError::RuntimeFailure)?
            .handle;
        if handle == 0 {
            return Err(XrError::RuntimeFailure);
        }
        Ok(handle)
    }

    fn destroy_session(&self) -> XrResult<()> {
        self.request(MessageType::DestroySession, &[]).map(|_| ())
    }

    fn request_exit_session(&self, session_handle: u64) -> XrResult<()> {
        let mut payload = BytesMut::new();
        RequestExitSessionRequest { session_handle }.encode(&mut payload);
        self.request(MessageType::RequestExitSession, &payload)
            .map(|_| ())
    }

    fn next_event(&self) -> XrResult<Option<SessionStateEvent>> {
        let response = self.request(MessageType::GetNextEvent, &[])?;
        if response.is_empty() {
            return Ok(None);
        }
        SessionStateEvent::decode(&response)
            .map(Some)
            .map_err(|_| XrError::RuntimeFailure)
    }

    fn runtime_properties(&self) -> XrResult<RuntimeProperties> {
        self.with_metadata(|c| c.runtime_properties.clone())
    }

    fn system_properties(&self) -> XrResult<SystemProperties> {
        self.with_metadata(|c| c.system_properties.clone())
    }

    fn view_configurations(&self) -> XrResult<ViewConfigurations> {
        self.with_metadata(|c| c.view_configurations)
    }

    fn interaction_profiles(&self) -> XrResult<InteractionProfiles> {
        self.with_metadata(|c| c.interaction_profiles.clone())
    }

    fn input_boolean(
        &self,
        user_path: &str,
        component_path: &str,
        predicted_time: i64,
    ) -> XrResult<Option<bool>> {
        let mut payload = BytesMut::new();
        InputStateRequest {
            user_path: user_path.to_owned(),
            component_path: component_path.to_owned(),
            predicted_time,
        }
        .encode(&mut payload);
        let response = self.request(MessageType::GetInputStateBoolean, &payload)?;
        let decoded =
            InputStateBooleanResponse::decode(&response).map_err(|_| XrError::RuntimeFailure)?;
        Ok(decoded.available.then_some(decoded.value))
    }

    fn input_float(
        &self,
        user_path: &str,
        component_path: &str,
        predicted_time: i64,
    ) -> XrResult<Option<f32>> {
        let mut payload = BytesMut::new();
        InputStateRequest {
            user_path: user_path.to_owned(),
            component_path: component_path.to_owned(),
            predicted_time,
        }
        .encode(&mut payload);
        let response = self.request(MessageType::GetInputStateFloat, &payload)?;
        let decoded =
            InputStateFloatResponse::decode(&response).map_err(|_| XrError::RuntimeFailure)?;
        Ok(decoded.available.then_some(decoded.value))
    }

    fn input_vector2(
        &self,
        user_path: &str,
        component_path: &str,
        predicted_time: i64,
    ) -> XrResult<Option<(f32, f32)>> {
        let mut payload = BytesMut::new();
        InputStateRequest {
            user_path: user_path.to_owned(),
            component_path: component_path.to_owned(),
            predicted_time,
        }
        .encode(&mut payload);
        let response = self.request(MessageType::GetInputStateVector2, &payload)?;
        let decoded =
            InputStateVector2Response::decode(&response).map_err(|_| XrError::RuntimeFailure)?;
        Ok(decoded.available.then_some((decoded.x, decoded.y)))
    }
}
