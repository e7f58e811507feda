//! The client runtime core: one owning struct per library instance holding
//! every table the translation layer needs. Entry points validate locally,
//! then either read the frame plane (hot path, outside the table lock) or
//! issue one synchronous control request.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, info, warn};

use ox_protocol::{
    FrameSnapshot, FrameView, HandleKind, Pose, RuntimeProperties, SessionStateEvent,
    SystemProperties, ViewConfigurations, EYE_COUNT,
};

use crate::bindings::{BindingCandidate, BindingTable};
use crate::connection::{IpcServiceConnection, ServiceConnection};
use crate::graphics::{CpuBackend, GraphicsBackend, SessionGraphicsBinding};
use crate::handle::{
    ActionHandle, ActionSetHandle, InstanceHandle, PathHandle, SessionHandle, SpaceHandle,
    SwapchainHandle,
};
use crate::paths::PathInterner;
use crate::swapchain::{Swapchain, SWAPCHAIN_IMAGE_COUNT};
use crate::{XrError, XrResult};

/// ~90 Hz, in nanoseconds.
const DISPLAY_PERIOD_NS: i64 = 11_111_111;

/// Fixed eye height for reference-space locates.
const REFERENCE_EYE_HEIGHT: f32 = 1.6;

pub const LOCATION_ORIENTATION_VALID: u64 = 0x1;
pub const LOCATION_POSITION_VALID: u64 = 0x2;
pub const LOCATION_ORIENTATION_TRACKED: u64 = 0x4;
pub const LOCATION_POSITION_TRACKED: u64 = 0x8;
pub const LOCATION_ALL_TRACKED: u64 = LOCATION_ORIENTATION_VALID
    | LOCATION_POSITION_VALID
    | LOCATION_ORIENTATION_TRACKED
    | LOCATION_POSITION_TRACKED;

#[derive(Debug, Clone, Default)]
pub struct InstanceCreateInfo {
    pub application_name: String,
    pub application_version: u32,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SessionCreateInfo {
    pub graphics_binding: Option<SessionGraphicsBinding>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceSpaceType {
    View,
    Local,
    Stage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvironmentBlendMode {
    Opaque,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionType {
    Boolean,
    Float,
    Vector2,
    Pose,
}

#[derive(Debug, Clone)]
pub struct ActionCreateInfo {
    pub name: String,
    pub action_type: ActionType,
    pub subaction_paths: Vec<PathHandle>,
}

#[derive(Debug, Clone, Copy)]
pub struct SuggestedBinding {
    pub action: ActionHandle,
    pub binding: PathHandle,
}

/// Resolved action state; `active == false` means no surviving binding
/// reported the component as available.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ActionState<T> {
    pub active: bool,
    pub current: T,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpaceLocation {
    pub location_flags: u64,
    pub pose: Pose,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameWaitState {
    pub predicted_display_time: i64,
    pub predicted_display_period: i64,
    pub should_render: bool,
}

#[derive(Debug, Clone)]
pub enum CompositionLayer {
    Projection { views: Vec<ProjectionView> },
}

#[derive(Debug, Clone, Copy)]
pub struct ProjectionView {
    pub swapchain: SwapchainHandle,
}

struct InstanceData {
    #[allow(dead_code)]
    application_name: String,
}

struct SessionData {
    instance: InstanceHandle,
    graphics_binding: Option<SessionGraphicsBinding>,
}

enum SpaceKind {
    Reference(#[allow(dead_code)] ReferenceSpaceType),
    Action {
        action: ActionHandle,
        subaction_path: Option<PathHandle>,
    },
}

struct SpaceData {
    session: SessionHandle,
    kind: SpaceKind,
}

struct ActionSetData {
    instance: InstanceHandle,
    #[allow(dead_code)]
    name: String,
}

struct ActionData {
    action_set: ActionSetHandle,
    #[allow(dead_code)]
    name: String,
    action_type: ActionType,
    subaction_paths: Vec<PathHandle>,
}

struct SwapchainData {
    session: SessionHandle,
    swapchain: Swapchain,
}

struct Tables {
    instances: HashMap<InstanceHandle, InstanceData>,
    sessions: HashMap<SessionHandle, SessionData>,
    spaces: HashMap<SpaceHandle, SpaceData>,
    action_sets: HashMap<ActionSetHandle, ActionSetData>,
    actions: HashMap<ActionHandle, ActionData>,
    swapchains: HashMap<SwapchainHandle, SwapchainData>,
    paths: PathInterner,
    bindings: BindingTable,
    suggested_profiles: Vec<PathHandle>,
    current_profile: Option<PathHandle>,
    backends: Vec<Box<dyn GraphicsBackend>>,
    // raw handles invalidated by instance destruction; the service never
    // recycles handle values, so one set covers every kind
    lost_handles: HashSet<u64>,
}

impl Tables {
    fn new() -> Self {
        Self {
            instances: HashMap::new(),
            sessions: HashMap::new(),
            spaces: HashMap::new(),
            action_sets: HashMap::new(),
            actions: HashMap::new(),
            swapchains: HashMap::new(),
            paths: PathInterner::new(),
            bindings: BindingTable::new(),
            suggested_profiles: Vec::new(),
            current_profile: None,
            backends: vec![Box::new(CpuBackend::new())],
            lost_handles: HashSet::new(),
        }
    }

    /// Error for a handle that is not in its table: `InstanceLost` when it
    /// died with its instance, `HandleInvalid` otherwise.
    fn missing(&self, raw: u64) -> XrError {
        if self.lost_handles.contains(&raw) {
            XrError::InstanceLost
        } else {
            XrError::HandleInvalid
        }
    }

    // destroyed instance handles stay plain HandleInvalid: only handles
    // derived from an instance report InstanceLost
    fn instance(&self, handle: InstanceHandle) -> XrResult<&InstanceData> {
        self.instances.get(&handle).ok_or(XrError::HandleInvalid)
    }

    fn session(&self, handle: SessionHandle) -> XrResult<&SessionData> {
        self.sessions
            .get(&handle)
            .ok_or_else(|| self.missing(handle.raw()))
    }

    fn space(&self, handle: SpaceHandle) -> XrResult<&SpaceData> {
        self.spaces
            .get(&handle)
            .ok_or_else(|| self.missing(handle.raw()))
    }

    fn action_set(&self, handle: ActionSetHandle) -> XrResult<&ActionSetData> {
        self.action_sets
            .get(&handle)
            .ok_or_else(|| self.missing(handle.raw()))
    }

    fn action(&self, handle: ActionHandle) -> XrResult<&ActionData> {
        self.actions
            .get(&handle)
            .ok_or_else(|| self.missing(handle.raw()))
    }

    fn swapchain(&self, handle: SwapchainHandle) -> XrResult<&SwapchainData> {
        self.swapchains
            .get(&handle)
            .ok_or_else(|| self.missing(handle.raw()))
    }

    fn backend_for(
        &mut self,
        binding: Option<SessionGraphicsBinding>,
    ) -> XrResult<&mut Box<dyn GraphicsBackend>> {
        let binding = binding.ok_or(XrError::Validation)?;
        self.backends
            .iter_mut()
            .find(|backend| backend.matches(&binding))
            .ok_or(XrError::Validation)
    }

    /// Drop every handle derived from an instance and remember them as
    /// lost, so later use reports `InstanceLost` rather than
    /// `HandleInvalid`.
    fn purge_instance(&mut self, instance: InstanceHandle) {
        let sessions: Vec<SessionHandle> = self
            .sessions
            .iter()
            .filter(|(_, data)| data.instance == instance)
            .map(|(&handle, _)| handle)
            .collect();
        for session in sessions {
            let derived = self.purge_session(session);
            self.lost_handles.extend(derived);
            self.sessions.remove(&session);
            self.lost_handles.insert(session.raw());
        }

        let sets: Vec<ActionSetHandle> = self
            .action_sets
            .iter()
            .filter(|(_, data)| data.instance == instance)
            .map(|(&handle, _)| handle)
            .collect();
        let doomed_actions: Vec<ActionHandle> = self
            .actions
            .iter()
            .filter(|(_, data)| sets.contains(&data.action_set))
            .map(|(&handle, _)| handle)
            .collect();
        for action in doomed_actions {
            self.actions.remove(&action);
            self.lost_handles.insert(action.raw());
        }
        for set in sets {
            self.action_sets.remove(&set);
            self.lost_handles.insert(set.raw());
        }
    }

    /// Drop a session's spaces and swapchains; returns the raw handles
    /// removed so instance teardown can mark them lost.
    fn purge_session(&mut self, session: SessionHandle) -> Vec<u64> {
        let mut purged = Vec::new();

        let doomed_spaces: Vec<SpaceHandle> = self
            .spaces
            .iter()
            .filter(|(_, data)| data.session == session)
            .map(|(&handle, _)| handle)
            .collect();
        for handle in doomed_spaces {
            self.spaces.remove(&handle);
            purged.push(handle.raw());
        }

        let doomed: Vec<SwapchainHandle> = self
            .swapchains
            .iter()
            .filter(|(_, data)| data.session == session)
            .map(|(&handle, _)| handle)
            .collect();
        for handle in doomed {
            if let Some(data) = self.swapchains.remove(&handle) {
                let binding = self
                    .sessions
                    .get(&data.session)
                    .and_then(|s| s.graphics_binding);
                if let Ok(backend) = self.backend_for(binding) {
                    backend.destroy_images(data.swapchain.images());
                }
            }
            purged.push(handle.raw());
        }
        purged
    }
}

/// The client core. One per library instance; all state lives here, no
/// process globals.
pub struct Runtime {
    connection: Arc<dyn ServiceConnection>,
    tables: Mutex<Tables>,
}

impl Runtime {
    /// Production construction: real IPC connection.
    pub fn new() -> Self {
        Self::with_connection(Arc::new(IpcServiceConnection::new()))
    }

    /// Test seam: substitute any [`ServiceConnection`].
    pub fn with_connection(connection: Arc<dyn ServiceConnection>) -> Self {
        Self {
            connection,
            tables: Mutex::new(Tables::new()),
        }
    }

    /// Add a graphics backend. Registered backends take precedence over
    /// the built-in CPU backend when both match a binding.
    pub fn register_graphics_backend(&self, backend: Box<dyn GraphicsBackend>) {
        self.lock().backends.insert(0, backend);
    }

    fn lock(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().expect("client tables poisoned")
    }

    fn frame_snapshot(&self) -> XrResult<FrameSnapshot> {
        self.connection.frame().ok_or(XrError::RuntimeFailure)
    }

    // ---- instance ----

    pub fn create_instance(&self, info: &InstanceCreateInfo) -> XrResult<InstanceHandle> {
        if info.application_name.is_empty() {
            return Err(XrError::Validation);
        }

        self.connection.connect()?;
        let handle =
            InstanceHandle::from_raw(self.connection.allocate_handle(HandleKind::Instance)?);

        self.lock().instances.insert(
            handle,
            InstanceData {
                application_name: info.application_name.clone(),
            },
        );
        info!(application = %info.application_name, "instance created");
        Ok(handle)
    }

    pub fn destroy_instance(&self, instance: InstanceHandle) -> XrResult<()> {
        let mut tables = self.lock();
        if tables.instances.remove(&instance).is_none() {
            return Err(XrError::HandleInvalid);
        }
        tables.purge_instance(instance);

        if tables.instances.is_empty() {
            tables.paths.clear();
            tables.bindings.clear();
            tables.suggested_profiles.clear();
            tables.current_profile = None;
            drop(tables);
            self.connection.disconnect();
        }
        info!("instance destroyed");
        Ok(())
    }

    pub fn instance_properties(&self, instance: InstanceHandle) -> XrResult<RuntimeProperties> {
        self.lock().instance(instance)?;
        self.connection.runtime_properties()
    }

    pub fn poll_event(&self, instance: InstanceHandle) -> XrResult<Option<SessionStateEvent>> {
        self.lock().instance(instance)?;
        self.connection.next_event()
    }

    // ---- paths ----

    pub fn string_to_path(&self, instance: InstanceHandle, path: &str) -> XrResult<PathHandle> {
        if !path.starts_with('/') || path.len() < 2 || path.ends_with('/') {
            return Err(XrError::Validation);
        }
        let mut tables = self.lock();
        tables.instance(instance)?;
        Ok(tables.paths.intern(path))
    }

    pub fn path_to_string(&self, instance: InstanceHandle, path: PathHandle) -> XrResult<String> {
        let tables = self.lock();
        tables.instance(instance)?;
        tables
            .paths
            .string_of(path)
            .map(str::to_owned)
            .ok_or(XrError::HandleInvalid)
    }

    // ---- system ----

    pub fn system_properties(&self, instance: InstanceHandle) -> XrResult<SystemProperties> {
        self.lock().instance(instance)?;
        self.connection.system_properties()
    }

    pub fn view_configurations(&self, instance: InstanceHandle) -> XrResult<ViewConfigurations> {
        self.lock().instance(instance)?;
        self.connection.view_configurations()
    }

    pub fn enumerate_environment_blend_modes(
        &self,
        instance: InstanceHandle,
    ) -> XrResult<Vec<EnvironmentBlendMode>> {
        self.lock().instance(instance)?;
        Ok(vec![EnvironmentBlendMode::Opaque])
    }

    pub fn enumerate_reference_spaces(
        &self,
        session: SessionHandle,
    ) -> XrResult<Vec<ReferenceSpaceType>> {
        self.lock().session(session)?;
        Ok(vec![
            ReferenceSpaceType::View,
            ReferenceSpaceType::Local,
            ReferenceSpaceType::Stage,
        ])
    }

    // ---- session ----

    pub fn create_session(
        &self,
        instance: InstanceHandle,
        info: &SessionCreateInfo,
    ) -> XrResult<SessionHandle> {
        {
            let mut tables = self.lock();
            tables.instance(instance)?;
            if let Some(binding) = info.graphics_binding {
                // unknown binding is a caller error, caught before IPC
                tables.backend_for(Some(binding))?;
            }
        }

        let handle = SessionHandle::from_raw(self.connection.create_session()?);
        self.lock().sessions.insert(
            handle,
            SessionData {
                instance,
                graphics_binding: info.graphics_binding,
            },
        );
        info!(handle = handle.raw(), "session created");
        Ok(handle)
    }

    pub fn destroy_session(&self, session: SessionHandle) -> XrResult<()> {
        {
            let mut tables = self.lock();
            tables.session(session)?;
            tables.purge_session(session);
            tables.sessions.remove(&session);
        }
        self.connection.destroy_session()
    }

    pub fn begin_session(&self, session: SessionHandle) -> XrResult<()> {
        self.lock().session(session)?;
        Ok(())
    }

    pub fn end_session(&self, session: SessionHandle) -> XrResult<()> {
        self.lock().session(session)?;
        Ok(())
    }

    pub fn request_exit_session(&self, session: SessionHandle) -> XrResult<()> {
        self.lock().session(session)?;
        self.connection.request_exit_session(session.raw())
    }

    // ---- spaces ----

    pub fn create_reference_space(
        &self,
        session: SessionHandle,
        space_type: ReferenceSpaceType,
    ) -> XrResult<SpaceHandle> {
        self.lock().session(session)?;
        let handle = SpaceHandle::from_raw(self.connection.allocate_handle(HandleKind::Space)?);
        self.lock().spaces.insert(
            handle,
            SpaceData {
                session,
                kind: SpaceKind::Reference(space_type),
            },
        );
        Ok(handle)
    }

    pub fn create_action_space(
        &self,
        session: SessionHandle,
        action: ActionHandle,
        subaction_path: Option<PathHandle>,
    ) -> XrResult<SpaceHandle> {
        {
            let tables = self.lock();
            tables.session(session)?;
            tables.action(action)?;
        }
        let handle = SpaceHandle::from_raw(self.connection.allocate_handle(HandleKind::Space)?);
        self.lock().spaces.insert(
            handle,
            SpaceData {
                session,
                kind: SpaceKind::Action {
                    action,
                    subaction_path,
                },
            },
        );
        Ok(handle)
    }

    pub fn destroy_space(&self, space: SpaceHandle) -> XrResult<()> {
        let mut tables = self.lock();
        tables
            .spaces
            .remove(&space)
            .map(|_| ())
            .ok_or_else(|| tables.missing(space.raw()))
    }

    /// Locate a space against a base space. Reference spaces sit at the
    /// fixed eye height with identity orientation; action spaces follow
    /// the device table in the frame plane.
    pub fn locate_space(
        &self,
        space: SpaceHandle,
        base_space: SpaceHandle,
        time: i64,
    ) -> XrResult<SpaceLocation> {
        if time <= 0 {
            return Err(XrError::Validation);
        }

        let user_path = {
            let tables = self.lock();
            let data = tables.space(space)?;
            tables.space(base_space)?;

            match &data.kind {
                SpaceKind::Reference(_) => {
                    let mut pose = Pose::IDENTITY;
                    pose.position[1] = REFERENCE_EYE_HEIGHT;
                    return Ok(SpaceLocation {
                        location_flags: LOCATION_ALL_TRACKED,
                        pose,
                    });
                }
                SpaceKind::Action { subaction_path, .. } => (*subaction_path)
                    .and_then(|token| tables.paths.string_of(token).map(str::to_owned)),
            }
        };

        // untracked: no subaction path means no device to follow
        let Some(user_path) = user_path else {
            return Ok(SpaceLocation {
                location_flags: 0,
                pose: Pose::IDENTITY,
            });
        };

        let snapshot = self.frame_snapshot()?;
        match snapshot.device(&user_path) {
            Some(device) if device.is_active() => Ok(SpaceLocation {
                location_flags: LOCATION_ALL_TRACKED,
                pose: device.pose,
            }),
            _ => Ok(SpaceLocation {
                location_flags: 0,
                pose: Pose::IDENTITY,
            }),
        }
    }

    // ---- frame loop ----

    /// Never blocks on IPC: the predicted time comes straight from the
    /// frame plane.
    pub fn wait_frame(&self, session: SessionHandle) -> XrResult<FrameWaitState> {
        self.lock().session(session)?;
        let predicted_display_time = self
            .connection
            .predicted_display_time()
            .ok_or(XrError::RuntimeFailure)?;
        Ok(FrameWaitState {
            predicted_display_time,
            predicted_display_period: DISPLAY_PERIOD_NS,
            should_render: true,
        })
    }

    pub fn begin_frame(&self, session: SessionHandle) -> XrResult<()> {
        self.lock().session(session)?;
        Ok(())
    }

    /// Stereo views for the given display time, copied torn-free.
    pub fn locate_views(
        &self,
        session: SessionHandle,
        _display_time: i64,
    ) -> XrResult<(u64, [FrameView; EYE_COUNT])> {
        self.lock().session(session)?;
        let snapshot = self.frame_snapshot()?;
        let flags = LOCATION_ORIENTATION_VALID | LOCATION_POSITION_VALID;
        Ok((flags, snapshot.views))
    }

    /// Read back each projection view's rendered image and publish it to
    /// the frame plane.
    pub fn end_frame(&self, session: SessionHandle, layers: &[CompositionLayer]) -> XrResult<()> {
        let mut tables = self.lock();
        tables.session(session)?;

        let mut pixels = Vec::new();
        for layer in layers {
            let CompositionLayer::Projection { views } = layer;
            for (eye, view) in views.iter().take(EYE_COUNT).enumerate() {
                let data = tables.swapchain(view.swapchain)?;
                let (width, height, format) = (
                    data.swapchain.width,
                    data.swapchain.height,
                    data.swapchain.format,
                );
                let Some(image) = data.swapchain.last_released_image() else {
                    debug!(eye, "no released image to submit");
                    continue;
                };

                let binding = tables
                    .sessions
                    .get(&data.session)
                    .and_then(|s| s.graphics_binding);
                let backend = tables.backend_for(binding)?;
                backend.read_pixels(image, &mut pixels)?;
                self.connection
                    .submit_texture(eye, width, height, format as u32, &pixels)?;
            }
        }
        Ok(())
    }

    // ---- actions ----

    pub fn create_action_set(
        &self,
        instance: InstanceHandle,
        name: &str,
    ) -> XrResult<ActionSetHandle> {
        if name.is_empty() {
            return Err(XrError::Validation);
        }
        self.lock().instance(instance)?;
        let handle =
            ActionSetHandle::from_raw(self.connection.allocate_handle(HandleKind::ActionSet)?);
        self.lock().action_sets.insert(
            handle,
            ActionSetData {
                instance,
                name: name.to_owned(),
            },
        );
        Ok(handle)
    }

    pub fn destroy_action_set(&self, action_set: ActionSetHandle) -> XrResult<()> {
        let mut tables = self.lock();
        if tables.action_sets.remove(&action_set).is_none() {
            return Err(tables.missing(action_set.raw()));
        }
        tables.actions.retain(|_, data| data.action_set != action_set);
        Ok(())
    }

    pub fn create_action(
        &self,
        action_set: ActionSetHandle,
        info: &ActionCreateInfo,
    ) -> XrResult<ActionHandle> {
        if info.name.is_empty() {
            return Err(XrError::Validation);
        }
        {
            let tables = self.lock();
            tables.action_set(action_set)?;
            for path in &info.subaction_paths {
                tables
                    .paths
                    .string_of(*path)
                    .ok_or(XrError::Validation)?;
            }
        }
        let handle = ActionHandle::from_raw(self.connection.allocate_handle(HandleKind::Action)?);
        self.lock().actions.insert(
            handle,
            ActionData {
                action_set,
                name: info.name.clone(),
                action_type: info.action_type,
                subaction_paths: info.subaction_paths.clone(),
            },
        );
        Ok(handle)
    }

    pub fn destroy_action(&self, action: ActionHandle) -> XrResult<()> {
        let mut tables = self.lock();
        tables
            .actions
            .remove(&action)
            .map(|_| ())
            .ok_or_else(|| tables.missing(action.raw()))
    }

    pub fn suggest_interaction_profile_bindings(
        &self,
        instance: InstanceHandle,
        profile: PathHandle,
        suggestions: &[SuggestedBinding],
    ) -> XrResult<()> {
        let mut tables = self.lock();
        tables.instance(instance)?;
        tables
            .paths
            .string_of(profile)
            .ok_or(XrError::Validation)?;

        if !tables.suggested_profiles.contains(&profile) {
            tables.suggested_profiles.push(profile);
        }

        for suggestion in suggestions {
            let action = tables.action(suggestion.action)?;
            let declared: Vec<(PathHandle, String)> = action
                .subaction_paths
                .iter()
                .filter_map(|&token| {
                    tables
                        .paths
                        .string_of(token)
                        .map(|s| (token, s.to_owned()))
                })
                .collect();
            let binding_string = tables
                .paths
                .string_of(suggestion.binding)
                .ok_or(XrError::Validation)?
                .to_owned();

            tables.bindings.suggest(
                suggestion.binding,
                &binding_string,
                suggestion.action,
                &declared,
                profile,
            );
        }
        Ok(())
    }

    /// Pick the current interaction profile: the first suggested profile
    /// the driver also supports, else the driver's first.
    pub fn attach_session_action_sets(
        &self,
        session: SessionHandle,
        action_sets: &[ActionSetHandle],
    ) -> XrResult<()> {
        {
            let tables = self.lock();
            tables.session(session)?;
            for set in action_sets {
                tables.action_set(*set)?;
            }
        }

        let driver_profiles = self.connection.interaction_profiles()?.profiles;
        let mut tables = self.lock();

        let suggested_strings: Vec<(PathHandle, String)> = tables
            .suggested_profiles
            .iter()
            .filter_map(|&token| {
                tables
                    .paths
                    .string_of(token)
                    .map(|s| (token, s.to_owned()))
            })
            .collect();

        let chosen = suggested_strings
            .iter()
            .find(|(_, name)| driver_profiles.iter().any(|d| d == name))
            .map(|(token, name)| (*token, name.clone()));

        match chosen {
            Some((token, name)) => {
                tables.current_profile = Some(token);
                info!(profile = %name, "interaction profile activated");
            }
            None => match driver_profiles.first() {
                Some(name) => {
                    let token = tables.paths.intern(name);
                    tables.current_profile = Some(token);
                    info!(profile = %name, "driver default interaction profile activated");
                }
                None => {
                    warn!("driver reports no interaction profiles");
                    tables.current_profile = None;
                }
            },
        }
        Ok(())
    }

    pub fn current_interaction_profile(
        &self,
        session: SessionHandle,
    ) -> XrResult<Option<PathHandle>> {
        let tables = self.lock();
        tables.session(session)?;
        Ok(tables.current_profile)
    }

    pub fn sync_actions(&self, session: SessionHandle) -> XrResult<()> {
        self.lock().session(session)?;
        Ok(())
    }

    fn binding_candidates(
        &self,
        session: SessionHandle,
        action: ActionHandle,
        subaction_path: Option<PathHandle>,
        expected_type: ActionType,
    ) -> XrResult<Vec<BindingCandidate>> {
        let tables = self.lock();
        tables.session(session)?;
        let data = tables.action(action)?;
        if data.action_type != expected_type {
            return Err(XrError::Validation);
        }
        Ok(tables.bindings.candidates(
            action,
            subaction_path,
            tables.current_profile,
            &tables.paths,
        ))
    }

    pub fn action_state_boolean(
        &self,
        session: SessionHandle,
        action: ActionHandle,
        subaction_path: Option<PathHandle>,
    ) -> XrResult<ActionState<bool>> {
        let candidates =
            self.binding_candidates(session, action, subaction_path, ActionType::Boolean)?;
        let time = self.connection.predicted_display_time().unwrap_or(0);
        for candidate in candidates {
            if let Some(value) =
                self.connection
                    .input_boolean(&candidate.user_path, &candidate.component_path, time)?
            {
                return Ok(ActionState {
                    active: true,
                    current: value,
                });
            }
        }
        Ok(ActionState {
            active: false,
            current: false,
        })
    }

    pub fn action_state_float(
        &self,
        session: SessionHandle,
        action: ActionHandle,
        subaction_path: Option<PathHandle>,
    ) -> XrResult<ActionState<f32>> {
        let candidates =
            self.binding_candidates(session, action, subaction_path, ActionType::Float)?;
        let time = self.connection.predicted_display_time().unwrap_or(0);
        for candidate in candidates {
            if let Some(value) =
                self.connection
                    .input_float(&candidate.user_path, &candidate.component_path, time)?
            {
                return Ok(ActionState {
                    active: true,
                    current: value,
                });
            }
        }
        Ok(ActionState {
            active: false,
            current: 0.0,
        })
    }

    pub fn action_state_vector2(
        &self,
        session: SessionHandle,
        action: ActionHandle,
        subaction_path: Option<PathHandle>,
    ) -> XrResult<ActionState<(f32, f32)>> {
        let candidates =
            self.binding_candidates(session, action, subaction_path, ActionType::Vector2)?;
        let time = self.connection.predicted_display_time().unwrap_or(0);
        for candidate in candidates {
            if let Some(value) = self.connection.input_vector2(
                &candidate.user_path,
                &candidate.component_path,
                time,
            )? {
                return Ok(ActionState {
                    active: true,
                    current: value,
                });
            }
        }
        Ok(ActionState {
            active: false,
            current: (0.0, 0.0),
        })
    }

    /// Pose actions are tracked through action spaces; the state only
    /// says whether the action is bound at all.
    pub fn action_state_pose(
        &self,
        session: SessionHandle,
        action: ActionHandle,
    ) -> XrResult<ActionState<()>> {
        let tables = self.lock();
        tables.session(session)?;
        let data = tables.action(action)?;
        if data.action_type != ActionType::Pose {
            return Err(XrError::Validation);
        }
        Ok(ActionState {
            active: true,
            current: (),
        })
    }

    pub fn apply_haptic_feedback(
        &self,
        session: SessionHandle,
        action: ActionHandle,
    ) -> XrResult<()> {
        let tables = self.lock();
        tables.session(session)?;
        tables.action(action)?;
        // no haptic transport yet; accepted and dropped
        Ok(())
    }

    pub fn stop_haptic_feedback(
        &self,
        session: SessionHandle,
        action: ActionHandle,
    ) -> XrResult<()> {
        let tables = self.lock();
        tables.session(session)?;
        tables.action(action)?;
        Ok(())
    }

    // ---- swapchains ----

    pub fn enumerate_swapchain_formats(&self, session: SessionHandle) -> XrResult<Vec<i64>> {
        let mut tables = self.lock();
        let binding = tables.session(session)?.graphics_binding;
        match binding {
            Some(_) => {
                let backend = tables.backend_for(binding)?;
                Ok(backend.supported_formats())
            }
            None => Ok(Vec::new()),
        }
    }

    pub fn create_swapchain(
        &self,
        session: SessionHandle,
        width: u32,
        height: u32,
        format: i64,
    ) -> XrResult<SwapchainHandle> {
        if width == 0 || height == 0 {
            return Err(XrError::Validation);
        }
        self.lock().session(session)?;
        let handle =
            SwapchainHandle::from_raw(self.connection.allocate_handle(HandleKind::Swapchain)?);
        self.lock().swapchains.insert(
            handle,
            SwapchainData {
                session,
                swapchain: Swapchain::new(width, height, format),
            },
        );
        Ok(handle)
    }

    pub fn destroy_swapchain(&self, swapchain: SwapchainHandle) -> XrResult<()> {
        let mut tables = self.lock();
        let data = tables
            .swapchains
            .remove(&swapchain)
            .ok_or_else(|| tables.missing(swapchain.raw()))?;
        let binding = tables
            .sessions
            .get(&data.session)
            .and_then(|s| s.graphics_binding);
        if let Ok(backend) = tables.backend_for(binding) {
            backend.destroy_images(data.swapchain.images());
        }
        Ok(())
    }

    /// Fixed-count image set; the first call allocates through the
    /// session's graphics backend.
    pub fn enumerate_swapchain_images(
        &self,
        swapchain: SwapchainHandle,
    ) -> XrResult<Vec<crate::graphics::ImageId>> {
        let mut tables = self.lock();
        let data = tables.swapchain(swapchain)?;

        if data.swapchain.has_images() {
            return Ok(data.swapchain.images().to_vec());
        }

        let (width, height, format, session) = (
            data.swapchain.width,
            data.swapchain.height,
            data.swapchain.format,
            data.session,
        );
        let binding = tables
            .sessions
            .get(&session)
            .and_then(|s| s.graphics_binding);
        let backend = tables.backend_for(binding)?;
        let images = backend.create_images(width, height, format, SWAPCHAIN_IMAGE_COUNT)?;

        let missing = tables.missing(swapchain.raw());
        let data = tables.swapchains.get_mut(&swapchain).ok_or(missing)?;
        data.swapchain.set_images(images.clone());
        Ok(images)
    }

    pub fn acquire_swapchain_image(&self, swapchain: SwapchainHandle) -> XrResult<u32> {
        let mut tables = self.lock();
        let missing = tables.missing(swapchain.raw());
        let data = tables.swapchains.get_mut(&swapchain).ok_or(missing)?;
        data.swapchain.acquire().map(|index| index as u32)
    }

    pub fn wait_swapchain_image(&self, swapchain: SwapchainHandle) -> XrResult<()> {
        let tables = self.lock();
        tables.swapchain(swapchain).map(|_| ())
    }

    pub fn release_swapchain_image(&self, swapchain: SwapchainHandle) -> XrResult<()> {
        let mut tables = self.lock();
        let missing = tables.missing(swapchain.raw());
        let data = tables.swapchains.get_mut(&swapchain).ok_or(missing)?;
        data.swapchain.release().map(|_| ())
    }

    // ---- trackers ----

    /// Generic-tracker user paths currently present in the device table:
    /// everything that is not the head or a hand.
    pub fn enumerate_tracker_paths(
        &self,
        instance: InstanceHandle,
    ) -> XrResult<Vec<PathHandle>> {
        self.lock().instance(instance)?;
        let snapshot = self.frame_snapshot()?;

        let mut tables = self.lock();
        let mut trackers = Vec::new();
        let count = snapshot.device_count.min(snapshot.devices.len() as u32) as usize;
        for device in &snapshot.devices[..count] {
            let path = device.user_path();
            if path.is_empty()
                || path == "/user/head"
                || path == "/user/hand/left"
                || path == "/user/hand/right"
            {
                continue;
            }
            trackers.push(tables.paths.intern(path));
        }
        Ok(trackers)
    }

    /// Reference-space bounds are never available from this runtime.
    pub fn reference_space_bounds(
        &self,
        session: SessionHandle,
        _space_type: ReferenceSpaceType,
    ) -> XrResult<Option<(f32, f32)>> {
        self.lock().session(session)?;
        Ok(None)
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}
