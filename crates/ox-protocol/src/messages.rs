//! Control-channel message schema.
//!
//! Every frame on the wire is a fixed 16-byte little-endian header followed
//! by exactly `payload_size` payload bytes. Every request receives exactly
//! one `Response` frame carrying the same sequence number. Payload structs
//! encode to fixed sizes with NUL-terminated string fields so the layout is
//! identical on both sides regardless of build.

use bytes::{Buf, BufMut, BytesMut};

use crate::{Error, Result};

/// Size of the wire header in bytes.
pub const HEADER_SIZE: usize = 16;

/// Upper bound on a single payload. Larger announcements are treated as a
/// framing error and tear down the connection.
pub const MAX_PAYLOAD_SIZE: u32 = 64 * 1024;

pub const RUNTIME_NAME_LEN: usize = 128;
pub const SYSTEM_NAME_LEN: usize = 256;
pub const USER_PATH_LEN: usize = 256;
pub const COMPONENT_PATH_LEN: usize = 128;
pub const PROFILE_PATH_LEN: usize = 128;
pub const MAX_INTERACTION_PROFILES: usize = 8;

/// Control message identifiers. Values are wire-stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum MessageType {
    Connect = 1,
    Disconnect = 2,
    CreateSession = 3,
    DestroySession = 4,
    AllocateHandle = 8,
    GetNextEvent = 9,
    GetRuntimeProperties = 10,
    GetSystemProperties = 11,
    GetViewConfigurations = 12,
    GetInteractionProfiles = 13,
    GetInputStateBoolean = 14,
    GetInputStateFloat = 15,
    GetInputStateVector2 = 16,
    RequestExitSession = 17,
    Response = 100,
}

impl TryFrom<u32> for MessageType {
    type Error = Error;

    fn try_from(value: u32) -> Result<Self> {
        Ok(match value {
            1 => Self::Connect,
            2 => Self::Disconnect,
            3 => Self::CreateSession,
            4 => Self::DestroySession,
            8 => Self::AllocateHandle,
            9 => Self::GetNextEvent,
            10 => Self::GetRuntimeProperties,
            11 => Self::GetSystemProperties,
            12 => Self::GetViewConfigurations,
            13 => Self::GetInteractionProfiles,
            14 => Self::GetInputStateBoolean,
            15 => Self::GetInputStateFloat,
            16 => Self::GetInputStateVector2,
            17 => Self::RequestExitSession,
            100 => Self::Response,
            other => return Err(Error::UnknownMessageType(other)),
        })
    }
}

/// Kinds of runtime-owned handles the service allocates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum HandleKind {
    Instance = 1,
    Session = 2,
    Space = 3,
    ActionSet = 4,
    Action = 5,
    Swapchain = 6,
}

impl TryFrom<u32> for HandleKind {
    type Error = Error;

    fn try_from(value: u32) -> Result<Self> {
        Ok(match value {
            1 => Self::Instance,
            2 => Self::Session,
            3 => Self::Space,
            4 => Self::ActionSet,
            5 => Self::Action,
            6 => Self::Swapchain,
            _ => return Err(Error::Malformed("invalid handle kind")),
        })
    }
}

/// Session lifecycle states, in transition order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum SessionState {
    Idle = 0,
    Ready = 1,
    Synchronized = 2,
    Visible = 3,
    Focused = 4,
    Stopping = 5,
    Exiting = 6,
}

impl SessionState {
    pub fn from_u32(value: u32) -> Option<Self> {
        Some(match value {
            0 => Self::Idle,
            1 => Self::Ready,
            2 => Self::Synchronized,
            3 => Self::Visible,
            4 => Self::Focused,
            5 => Self::Stopping,
            6 => Self::Exiting,
            _ => return None,
        })
    }
}

/// Fixed wire header preceding every payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    pub message_type: MessageType,
    pub sequence: u32,
    pub payload_size: u32,
}

impl MessageHeader {
    pub fn new(message_type: MessageType, sequence: u32, payload_size: u32) -> Self {
        Self {
            message_type,
            sequence,
            payload_size,
        }
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32_le(self.message_type as u32);
        buf.put_u32_le(self.sequence);
        buf.put_u32_le(self.payload_size);
        buf.put_u32_le(0);
    }

    pub fn decode(raw: &[u8; HEADER_SIZE]) -> Result<Self> {
        let mut buf = &raw[..];
        let message_type = MessageType::try_from(buf.get_u32_le())?;
        let sequence = buf.get_u32_le();
        let payload_size = buf.get_u32_le();
        let _reserved = buf.get_u32_le();
        if payload_size > MAX_PAYLOAD_SIZE {
            return Err(Error::PayloadTooLarge(payload_size));
        }
        Ok(Self {
            message_type,
            sequence,
            payload_size,
        })
    }
}

fn put_fixed_str(buf: &mut BytesMut, value: &str, len: usize) {
    let bytes = value.as_bytes();
    let copy = bytes.len().min(len - 1);
    buf.put_slice(&bytes[..copy]);
    buf.put_bytes(0, len - copy);
}

fn get_fixed_str(buf: &mut &[u8], len: usize) -> Result<String> {
    if buf.remaining() < len {
        return Err(Error::Malformed("truncated string field"));
    }
    let raw = &buf[..len];
    let end = raw.iter().position(|&b| b == 0).unwrap_or(len);
    let value = std::str::from_utf8(&raw[..end])
        .map_err(|_| Error::Malformed("string field is not UTF-8"))?
        .to_owned();
    buf.advance(len);
    Ok(value)
}

fn need(buf: &[u8], len: usize) -> Result<()> {
    if buf.len() < len {
        return Err(Error::Malformed("payload too short"));
    }
    Ok(())
}

/// Runtime identity reported by the service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeProperties {
    pub runtime_name: String,
    pub version_major: u32,
    pub version_minor: u32,
    pub version_patch: u32,
}

impl RuntimeProperties {
    pub const WIRE_SIZE: usize = RUNTIME_NAME_LEN + 12;

    pub fn encode(&self, buf: &mut BytesMut) {
        put_fixed_str(buf, &self.runtime_name, RUNTIME_NAME_LEN);
        buf.put_u32_le(self.version_major);
        buf.put_u32_le(self.version_minor);
        buf.put_u32_le(self.version_patch);
    }

    pub fn decode(mut buf: &[u8]) -> Result<Self> {
        need(buf, Self::WIRE_SIZE)?;
        let runtime_name = get_fixed_str(&mut buf, RUNTIME_NAME_LEN)?;
        Ok(Self {
            runtime_name,
            version_major: buf.get_u32_le(),
            version_minor: buf.get_u32_le(),
            version_patch: buf.get_u32_le(),
        })
    }
}

/// Device metadata and tracking limits reported by the service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemProperties {
    pub system_name: String,
    pub max_swapchain_width: u32,
    pub max_swapchain_height: u32,
    pub max_layer_count: u32,
    pub orientation_tracking: bool,
    pub position_tracking: bool,
}

impl SystemProperties {
    pub const WIRE_SIZE: usize = SYSTEM_NAME_LEN + 20;

    pub fn encode(&self, buf: &mut BytesMut) {
        put_fixed_str(buf, &self.system_name, SYSTEM_NAME_LEN);
        buf.put_u32_le(self.max_swapchain_width);
        buf.put_u32_le(self.max_swapchain_height);
        buf.put_u32_le(self.max_layer_count);
        buf.put_u32_le(self.orientation_tracking as u32);
        buf.put_u32_le(self.position_tracking as u32);
    }

    pub fn decode(mut buf: &[u8]) -> Result<Self> {
        need(buf, Self::WIRE_SIZE)?;
        let system_name = get_fixed_str(&mut buf, SYSTEM_NAME_LEN)?;
        Ok(Self {
            system_name,
            max_swapchain_width: buf.get_u32_le(),
            max_swapchain_height: buf.get_u32_le(),
            max_layer_count: buf.get_u32_le(),
            orientation_tracking: buf.get_u32_le() != 0,
            position_tracking: buf.get_u32_le() != 0,
        })
    }
}

/// Per-eye render target recommendation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ViewConfiguration {
    pub recommended_width: u32,
    pub recommended_height: u32,
    pub recommended_sample_count: u32,
    pub max_sample_count: u32,
}

/// Stereo view configuration reported by the service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ViewConfigurations {
    pub views: [ViewConfiguration; 2],
}

impl ViewConfigurations {
    pub const WIRE_SIZE: usize = 2 * 16;

    pub fn encode(&self, buf: &mut BytesMut) {
        for view in &self.views {
            buf.put_u32_le(view.recommended_width);
            buf.put_u32_le(view.recommended_height);
            buf.put_u32_le(view.recommended_sample_count);
            buf.put_u32_le(view.max_sample_count);
        }
    }

    pub fn decode(mut buf: &[u8]) -> Result<Self> {
        need(buf, Self::WIRE_SIZE)?;
        let mut views = [ViewConfiguration::default(); 2];
        for view in &mut views {
            view.recommended_width = buf.get_u32_le();
            view.recommended_height = buf.get_u32_le();
            view.recommended_sample_count = buf.get_u32_le();
            view.max_sample_count = buf.get_u32_le();
        }
        Ok(Self { views })
    }
}

/// Interaction profiles the loaded driver supports, in preference order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InteractionProfiles {
    pub profiles: Vec<String>,
}

impl InteractionProfiles {
    pub const WIRE_SIZE: usize = 4 + MAX_INTERACTION_PROFILES * PROFILE_PATH_LEN;

    pub fn encode(&self, buf: &mut BytesMut) {
        let count = self.profiles.len().min(MAX_INTERACTION_PROFILES);
        buf.put_u32_le(count as u32);
        for profile in self.profiles.iter().take(count) {
            put_fixed_str(buf, profile, PROFILE_PATH_LEN);
        }
        for _ in count..MAX_INTERACTION_PROFILES {
            buf.put_bytes(0, PROFILE_PATH_LEN);
        }
    }

    pub fn decode(mut buf: &[u8]) -> Result<Self> {
        need(buf, Self::WIRE_SIZE)?;
        let count = (buf.get_u32_le() as usize).min(MAX_INTERACTION_PROFILES);
        let mut profiles = Vec::with_capacity(count);
        for i in 0..MAX_INTERACTION_PROFILES {
            let profile = get_fixed_str(&mut buf, PROFILE_PATH_LEN)?;
            if i < count {
                profiles.push(profile);
            }
        }
        Ok(Self { profiles })
    }
}

/// A session state transition, queued by the service and drained by the
/// client one event per request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionStateEvent {
    pub session_handle: u64,
    pub state: SessionState,
    pub timestamp: i64,
}

impl SessionStateEvent {
    pub const WIRE_SIZE: usize = 24;

    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u64_le(self.session_handle);
        buf.put_u32_le(self.state as u32);
        buf.put_u32_le(0);
        buf.put_i64_le(self.timestamp);
    }

    pub fn decode(mut buf: &[u8]) -> Result<Self> {
        need(buf, Self::WIRE_SIZE)?;
        let session_handle = buf.get_u64_le();
        let state = SessionState::from_u32(buf.get_u32_le())
            .ok_or(Error::Malformed("invalid session state"))?;
        let _reserved = buf.get_u32_le();
        let timestamp = buf.get_i64_le();
        Ok(Self {
            session_handle,
            state,
            timestamp,
        })
    }
}

/// Request payload for `AllocateHandle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocateHandleRequest {
    pub kind: HandleKind,
}

impl AllocateHandleRequest {
    pub const WIRE_SIZE: usize = 4;

    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32_le(self.kind as u32);
    }

    pub fn decode(mut buf: &[u8]) -> Result<Self> {
        need(buf, Self::WIRE_SIZE)?;
        Ok(Self {
            kind: HandleKind::try_from(buf.get_u32_le())?,
        })
    }
}

/// Response payload carrying a freshly allocated handle; also used by
/// `CreateSession`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandleResponse {
    pub handle: u64,
}

impl HandleResponse {
    pub const WIRE_SIZE: usize = 8;

    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u64_le(self.handle);
    }

    pub fn decode(mut buf: &[u8]) -> Result<Self> {
        need(buf, Self::WIRE_SIZE)?;
        Ok(Self {
            handle: buf.get_u64_le(),
        })
    }
}

/// Request payload for the three typed input-state queries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputStateRequest {
    pub user_path: String,
    pub component_path: String,
    pub predicted_time: i64,
}

impl InputStateRequest {
    pub const WIRE_SIZE: usize = USER_PATH_LEN + COMPONENT_PATH_LEN + 8;

    pub fn encode(&self, buf: &mut BytesMut) {
        put_fixed_str(buf, &self.user_path, USER_PATH_LEN);
        put_fixed_str(buf, &self.component_path, COMPONENT_PATH_LEN);
        buf.put_i64_le(self.predicted_time);
    }

    pub fn decode(mut buf: &[u8]) -> Result<Self> {
        need(buf, Self::WIRE_SIZE)?;
        let user_path = get_fixed_str(&mut buf, USER_PATH_LEN)?;
        let component_path = get_fixed_str(&mut buf, COMPONENT_PATH_LEN)?;
        Ok(Self {
            user_path,
            component_path,
            predicted_time: buf.get_i64_le(),
        })
    }
}

/// Response to `GetInputStateBoolean`. `available == false` means the
/// component does not exist on the bound device, which is distinct from a
/// present component reading `false`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputStateBooleanResponse {
    pub available: bool,
    pub value: bool,
}

impl InputStateBooleanResponse {
    pub const WIRE_SIZE: usize = 8;

    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32_le(self.available as u32);
        buf.put_u32_le(self.value as u32);
    }

    pub fn decode(mut buf: &[u8]) -> Result<Self> {
        need(buf, Self::WIRE_SIZE)?;
        Ok(Self {
            available: buf.get_u32_le() != 0,
            value: buf.get_u32_le() != 0,
        })
    }
}

/// Response to `GetInputStateFloat`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InputStateFloatResponse {
    pub available: bool,
    pub value: f32,
}

impl InputStateFloatResponse {
    pub const WIRE_SIZE: usize = 8;

    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32_le(self.available as u32);
        buf.put_f32_le(self.value);
    }

    pub fn decode(mut buf: &[u8]) -> Result<Self> {
        need(buf, Self::WIRE_SIZE)?;
        Ok(Self {
            available: buf.get_u32_le() != 0,
            value: buf.get_f32_le(),
        })
    }
}

/// Response to `GetInputStateVector2`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InputStateVector2Response {
    pub available: bool,
    pub x: f32,
    pub y: f32,
}

impl InputStateVector2Response {
    pub const WIRE_SIZE: usize = 12;

    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32_le(self.available as u32);
        buf.put_f32_le(self.x);
        buf.put_f32_le(self.y);
    }

    pub fn decode(mut buf: &[u8]) -> Result<Self> {
        need(buf, Self::WIRE_SIZE)?;
        Ok(Self {
            available: buf.get_u32_le() != 0,
            x: buf.get_f32_le(),
            y: buf.get_f32_le(),
        })
    }
}

/// Request payload for `RequestExitSession`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestExitSessionRequest {
    pub session_handle: u64,
}

impl RequestExitSessionRequest {
    pub const WIRE_SIZE: usize = 8;

    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u64_le(self.session_handle);
    }

    pub fn decode(mut buf: &[u8]) -> Result<Self> {
        need(buf, Self::WIRE_SIZE)?;
        Ok(Self {
            session_handle: buf.get_u64_le(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trip() {
        let header = MessageHeader::new(MessageType::AllocateHandle, 7, 4);
        let mut buf = BytesMut::new();
        header.encode(&mut buf);
        assert_eq!(buf.len(), HEADER_SIZE);
        let raw: [u8; HEADER_SIZE] = buf[..].try_into().unwrap();
        assert_eq!(MessageHeader::decode(&raw).unwrap(), header);
    }

    #[test]
    fn header_rejects_unknown_type() {
        let mut buf = BytesMut::new();
        MessageHeader::new(MessageType::Connect, 0, 0).encode(&mut buf);
        buf[0] = 99;
        let raw: [u8; HEADER_SIZE] = buf[..].try_into().unwrap();
        assert!(matches!(
            MessageHeader::decode(&raw),
            Err(Error::UnknownMessageType(99))
        ));
    }

    #[test]
    fn header_rejects_oversized_payload() {
        let mut buf = BytesMut::new();
        MessageHeader::new(MessageType::Connect, 0, MAX_PAYLOAD_SIZE + 1).encode(&mut buf);
        let raw: [u8; HEADER_SIZE] = buf[..].try_into().unwrap();
        assert!(matches!(
            MessageHeader::decode(&raw),
            Err(Error::PayloadTooLarge(_))
        ));
    }

    #[test]
    fn runtime_properties_round_trip() {
        let props = RuntimeProperties {
            runtime_name: "ox".to_owned(),
            version_major: 1,
            version_minor: 2,
            version_patch: 3,
        };
        let mut buf = BytesMut::new();
        props.encode(&mut buf);
        assert_eq!(buf.len(), RuntimeProperties::WIRE_SIZE);
        assert_eq!(RuntimeProperties::decode(&buf).unwrap(), props);
    }

    #[test]
    fn input_state_request_round_trip() {
        let request = InputStateRequest {
            user_path: "/user/hand/right".to_owned(),
            component_path: "/input/trigger/value".to_owned(),
            predicted_time: 123_456_789,
        };
        let mut buf = BytesMut::new();
        request.encode(&mut buf);
        assert_eq!(buf.len(), InputStateRequest::WIRE_SIZE);
        assert_eq!(InputStateRequest::decode(&buf).unwrap(), request);
    }

    #[test]
    fn interaction_profiles_preserve_order() {
        let profiles = InteractionProfiles {
            profiles: vec![
                "/interaction_profiles/khr/simple_controller".to_owned(),
                "/interaction_profiles/valve/index_controller".to_owned(),
            ],
        };
        let mut buf = BytesMut::new();
        profiles.encode(&mut buf);
        assert_eq!(buf.len(), InteractionProfiles::WIRE_SIZE);
        assert_eq!(InteractionProfiles::decode(&buf).unwrap(), profiles);
    }

    #[test]
    fn session_event_rejects_bad_state() {
        let event = SessionStateEvent {
            session_handle: 2,
            state: SessionState::Ready,
            timestamp: 10,
        };
        let mut buf = BytesMut::new();
        event.encode(&mut buf);
        buf[8] = 200;
        assert!(SessionStateEvent::decode(&buf).is_err());
    }

    #[test]
    fn fixed_strings_truncate_and_terminate() {
        let long = "x".repeat(RUNTIME_NAME_LEN * 2);
        let props = RuntimeProperties {
            runtime_name: long,
            version_major: 0,
            version_minor: 0,
            version_patch: 0,
        };
        let mut buf = BytesMut::new();
        props.encode(&mut buf);
        let decoded = RuntimeProperties::decode(&buf).unwrap();
        assert_eq!(decoded.runtime_name.len(), RUNTIME_NAME_LEN - 1);
    }
}
