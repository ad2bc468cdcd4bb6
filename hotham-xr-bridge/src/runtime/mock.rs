//! A scriptable, call counting stand-in for an OpenXR runtime.

use std::{
    cell::{Cell, RefCell},
    collections::{HashMap, HashSet, VecDeque},
    ffi::c_void,
};

use openxr::sys::{
    self, pfn, Action, ActionSet, ActionType, Duration, EnvironmentBlendMode, FormFactor, Fovf,
    Instance, Path, Posef, Quaternionf, ReferenceSpaceType, Session, SessionState, Space,
    SpaceLocationFlags, Swapchain, SystemId, Time, Vector2f, Vector3f, Version,
    ViewConfigurationType, ViewStateFlags,
};

use super::{
    ActionState, CompositionLayer, FrameTiming, Location, RecommendedView, SwapchainDesc,
    SystemInfo, ViewPose, XrEvent, XrResult, XrRuntime,
};
use crate::util::GraphicsApi;

pub(crate) const GL_RGBA8: i64 = 0x8058;
pub(crate) const GL_SRGB8_ALPHA8: i64 = 0x8C43;
pub(crate) const MOCK_GRAPHICS_EXTENSION: &str = "XR_KHR_opengl_enable";

/// Calls that make up the frame loop, used to check nothing is issued once a session is stopping
pub(crate) const FRAME_CALLS: &[&str] = &[
    "wait_frame",
    "begin_frame",
    "end_frame",
    "locate_views",
    "sync_actions",
    "acquire_swapchain_image",
    "wait_swapchain_image",
    "release_swapchain_image",
];

pub(crate) struct MockRuntime {
    calls: RefCell<Vec<&'static str>>,
    failures: RefCell<HashSet<&'static str>>,
    functions: RefCell<HashMap<String, pfn::VoidFunction>>,
    events: RefCell<VecDeque<XrEvent>>,
    next_handle: Cell<u64>,
    paths: RefCell<Vec<String>>,
    pub supported_extensions: RefCell<Vec<String>>,
    pub enabled_extensions: RefCell<Vec<String>>,
    pub view_configurations: RefCell<Vec<ViewConfigurationType>>,
    pub graphics_range: Cell<(Version, Version)>,
    pub should_render: Cell<bool>,
    pub view_flags: Cell<ViewStateFlags>,
    pub pose_active: Cell<bool>,
    pub float_state: Cell<f32>,
    pub swapchain_descs: RefCell<Vec<SwapchainDesc>>,
    pub end_frame_layers: RefCell<Vec<usize>>,
    pub haptic_pulses: RefCell<Vec<(Path, Duration, f32)>>,
    pub hand_tracking_supported: Cell<bool>,
    /// Swapchain image waits that time out before one succeeds
    pub wait_timeouts: Cell<u32>,
    live_instances: Cell<i32>,
    live_sessions: Cell<i32>,
    live_swapchains: Cell<i32>,
    live_spaces: Cell<i32>,
    acquired: RefCell<HashMap<u64, u32>>,
    ready: RefCell<HashSet<u64>>,
    frame_begun: Cell<bool>,
    last_session: Cell<Session>,
    display_time: Cell<i64>,
}

impl Default for MockRuntime {
    fn default() -> Self {
        Self {
            calls: Default::default(),
            failures: Default::default(),
            functions: Default::default(),
            events: Default::default(),
            next_handle: Cell::new(1),
            paths: Default::default(),
            supported_extensions: RefCell::new(vec![MOCK_GRAPHICS_EXTENSION.to_string()]),
            enabled_extensions: Default::default(),
            view_configurations: RefCell::new(vec![ViewConfigurationType::PRIMARY_STEREO]),
            graphics_range: Cell::new((Version::new(3, 0, 0), Version::new(4, 6, 0))),
            should_render: Cell::new(true),
            view_flags: Cell::new(ViewStateFlags::POSITION_VALID | ViewStateFlags::ORIENTATION_VALID),
            pose_active: Cell::new(true),
            float_state: Cell::new(0.5),
            swapchain_descs: Default::default(),
            end_frame_layers: Default::default(),
            haptic_pulses: Default::default(),
            hand_tracking_supported: Cell::new(false),
            wait_timeouts: Cell::new(0),
            live_instances: Cell::new(0),
            live_sessions: Cell::new(0),
            live_swapchains: Cell::new(0),
            live_spaces: Cell::new(0),
            acquired: Default::default(),
            ready: Default::default(),
            frame_begun: Cell::new(false),
            last_session: Cell::new(Session::NULL),
            display_time: Cell::new(0),
        }
    }
}

impl MockRuntime {
    pub fn with_extensions(extensions: &[&str]) -> Self {
        let runtime = Self::default();
        runtime
            .supported_extensions
            .borrow_mut()
            .extend(extensions.iter().map(|e| e.to_string()));
        runtime
    }

    fn record(&self, name: &'static str) -> XrResult<()> {
        self.calls.borrow_mut().push(name);
        if self.failures.borrow().contains(name) {
            return Err(sys::Result::ERROR_RUNTIME_FAILURE);
        }
        Ok(())
    }

    fn handle(&self) -> u64 {
        let handle = self.next_handle.get();
        self.next_handle.set(handle + 1);
        handle
    }

    pub fn fail(&self, name: &'static str) {
        self.failures.borrow_mut().insert(name);
    }

    pub fn succeed(&self, name: &'static str) {
        self.failures.borrow_mut().remove(name);
    }

    pub fn provide_function(&self, name: &str, function: pfn::VoidFunction) {
        self.functions
            .borrow_mut()
            .insert(name.to_string(), function);
    }

    pub fn push_event(&self, event: XrEvent) {
        self.events.borrow_mut().push_back(event);
    }

    /// Queue a state change for the most recently created session
    pub fn push_state(&self, state: SessionState) {
        self.push_event(XrEvent::SessionStateChanged {
            session: self.last_session.get(),
            state,
            time: Time::from_nanos(self.display_time.get()),
        });
    }

    pub fn count(&self, name: &str) -> usize {
        self.calls.borrow().iter().filter(|c| **c == name).count()
    }

    pub fn frame_calls(&self) -> usize {
        self.calls
            .borrow()
            .iter()
            .filter(|c| FRAME_CALLS.contains(c))
            .count()
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.borrow().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.borrow_mut().clear();
    }

    pub fn outstanding_images(&self) -> u32 {
        self.acquired.borrow().values().sum()
    }

    pub fn live_handles(&self) -> (i32, i32, i32, i32) {
        (
            self.live_instances.get(),
            self.live_sessions.get(),
            self.live_swapchains.get(),
            self.live_spaces.get(),
        )
    }
}

impl XrRuntime for MockRuntime {
    fn graphics_api(&self) -> GraphicsApi {
        GraphicsApi::OpenGL
    }

    fn graphics_extension_name(&self) -> &'static str {
        MOCK_GRAPHICS_EXTENSION
    }

    fn get_instance_proc_addr(&self, _instance: Instance, name: &str) -> Option<pfn::VoidFunction> {
        self.functions.borrow().get(name).copied()
    }

    fn enumerate_instance_extension_properties(&self) -> XrResult<Vec<String>> {
        self.record("enumerate_instance_extension_properties")?;
        Ok(self.supported_extensions.borrow().clone())
    }

    fn create_instance(
        &self,
        _application_name: &str,
        _application_version: u32,
        extensions: &[&str],
    ) -> XrResult<Instance> {
        self.record("create_instance")?;
        let supported = self.supported_extensions.borrow();
        if let Some(missing) = extensions.iter().find(|e| !supported.iter().any(|s| s == *e)) {
            log::error!("[MOCK] Unsupported extension requested: {missing}");
            return Err(sys::Result::ERROR_EXTENSION_NOT_PRESENT);
        }
        *self.enabled_extensions.borrow_mut() = extensions.iter().map(|e| e.to_string()).collect();
        self.live_instances.set(self.live_instances.get() + 1);
        Ok(Instance::from_raw(self.handle()))
    }

    fn destroy_instance(&self, _instance: Instance) -> XrResult<()> {
        self.record("destroy_instance")?;
        self.live_instances.set(self.live_instances.get() - 1);
        Ok(())
    }

    fn get_system(&self, _instance: Instance, _form_factor: FormFactor) -> XrResult<SystemId> {
        self.record("get_system")?;
        Ok(SystemId::from_raw(self.handle()))
    }

    fn get_system_properties(
        &self,
        _instance: Instance,
        _system: SystemId,
        next: *mut c_void,
    ) -> XrResult<SystemInfo> {
        self.record("get_system_properties")?;
        let mut next = next as *mut sys::BaseOutStructure;
        while !next.is_null() {
            unsafe {
                if (*next).ty == sys::StructureType::SYSTEM_HAND_TRACKING_PROPERTIES_EXT {
                    let properties = next as *mut sys::SystemHandTrackingPropertiesEXT;
                    (*properties).supports_hand_tracking = if self.hand_tracking_supported.get() {
                        sys::TRUE
                    } else {
                        sys::FALSE
                    };
                }
                next = (*next).next;
            }
        }
        Ok(SystemInfo {
            system_name: "Mock HMD".to_string(),
            vendor_id: 42,
        })
    }

    fn enumerate_view_configurations(
        &self,
        _instance: Instance,
        _system: SystemId,
    ) -> XrResult<Vec<ViewConfigurationType>> {
        self.record("enumerate_view_configurations")?;
        Ok(self.view_configurations.borrow().clone())
    }

    fn enumerate_view_configuration_views(
        &self,
        _instance: Instance,
        _system: SystemId,
        _view_configuration_type: ViewConfigurationType,
    ) -> XrResult<Vec<RecommendedView>> {
        self.record("enumerate_view_configuration_views")?;
        let view = RecommendedView {
            recommended_width: 1440,
            max_width: 2880,
            recommended_height: 1600,
            max_height: 3200,
            recommended_sample_count: 1,
            max_sample_count: 4,
        };
        Ok(vec![view; 2])
    }

    fn graphics_requirements(
        &self,
        _instance: Instance,
        _system: SystemId,
    ) -> XrResult<(Version, Version)> {
        self.record("graphics_requirements")?;
        Ok(self.graphics_range.get())
    }

    fn create_session(&self, _instance: Instance, _system: SystemId) -> XrResult<Session> {
        self.record("create_session")?;
        self.live_sessions.set(self.live_sessions.get() + 1);
        let session = Session::from_raw(self.handle());
        self.last_session.set(session);
        Ok(session)
    }

    fn destroy_session(&self, _session: Session) -> XrResult<()> {
        self.record("destroy_session")?;
        self.live_sessions.set(self.live_sessions.get() - 1);
        Ok(())
    }

    fn begin_session(
        &self,
        _session: Session,
        _view_configuration_type: ViewConfigurationType,
    ) -> XrResult<()> {
        self.record("begin_session")
    }

    fn end_session(&self, _session: Session) -> XrResult<()> {
        self.record("end_session")
    }

    fn enumerate_reference_spaces(&self, _session: Session) -> XrResult<Vec<ReferenceSpaceType>> {
        self.record("enumerate_reference_spaces")?;
        Ok(vec![
            ReferenceSpaceType::VIEW,
            ReferenceSpaceType::LOCAL,
            ReferenceSpaceType::STAGE,
        ])
    }

    fn create_reference_space(
        &self,
        _session: Session,
        _reference_space_type: ReferenceSpaceType,
        _pose_in_reference_space: Posef,
    ) -> XrResult<Space> {
        self.record("create_reference_space")?;
        self.live_spaces.set(self.live_spaces.get() + 1);
        Ok(Space::from_raw(self.handle()))
    }

    fn destroy_space(&self, _space: Space) -> XrResult<()> {
        self.record("destroy_space")?;
        self.live_spaces.set(self.live_spaces.get() - 1);
        Ok(())
    }

    fn locate_space(&self, _space: Space, _base_space: Space, _time: Time) -> XrResult<Location> {
        self.record("locate_space")?;
        Ok(Location {
            flags: SpaceLocationFlags::ORIENTATION_VALID
                | SpaceLocationFlags::POSITION_VALID
                | SpaceLocationFlags::POSITION_TRACKED,
            pose: Posef {
                orientation: Quaternionf {
                    x: 0.,
                    y: 0.,
                    z: 0.,
                    w: 1.,
                },
                position: Vector3f {
                    x: 0.,
                    y: 1.6,
                    z: 0.,
                },
            },
        })
    }

    fn enumerate_swapchain_formats(&self, _session: Session) -> XrResult<Vec<i64>> {
        self.record("enumerate_swapchain_formats")?;
        Ok(vec![GL_RGBA8, GL_SRGB8_ALPHA8])
    }

    fn create_swapchain(
        &self,
        _session: Session,
        desc: &SwapchainDesc,
        _next: *const c_void,
    ) -> XrResult<Swapchain> {
        self.record("create_swapchain")?;
        self.swapchain_descs.borrow_mut().push(*desc);
        self.live_swapchains.set(self.live_swapchains.get() + 1);
        Ok(Swapchain::from_raw(self.handle()))
    }

    fn destroy_swapchain(&self, swapchain: Swapchain) -> XrResult<()> {
        self.record("destroy_swapchain")?;
        self.acquired.borrow_mut().remove(&swapchain.into_raw());
        self.ready.borrow_mut().remove(&swapchain.into_raw());
        self.live_swapchains.set(self.live_swapchains.get() - 1);
        Ok(())
    }

    fn enumerate_swapchain_images(&self, swapchain: Swapchain) -> XrResult<Vec<u64>> {
        self.record("enumerate_swapchain_images")?;
        let base = swapchain.into_raw() * 100;
        Ok(vec![base, base + 1, base + 2])
    }

    fn acquire_swapchain_image(&self, swapchain: Swapchain) -> XrResult<u32> {
        self.record("acquire_swapchain_image")?;
        let mut acquired = self.acquired.borrow_mut();
        let outstanding = acquired.entry(swapchain.into_raw()).or_default();
        if *outstanding > 0 {
            return Err(sys::Result::ERROR_CALL_ORDER_INVALID);
        }
        *outstanding += 1;
        Ok(1)
    }

    fn wait_swapchain_image(&self, swapchain: Swapchain, _timeout: Duration) -> XrResult<bool> {
        self.record("wait_swapchain_image")?;
        if self.acquired.borrow().get(&swapchain.into_raw()).copied().unwrap_or(0) == 0 {
            return Err(sys::Result::ERROR_CALL_ORDER_INVALID);
        }
        let timeouts = self.wait_timeouts.get();
        if timeouts > 0 {
            self.wait_timeouts.set(timeouts - 1);
            return Ok(false);
        }
        self.ready.borrow_mut().insert(swapchain.into_raw());
        Ok(true)
    }

    fn release_swapchain_image(&self, swapchain: Swapchain) -> XrResult<()> {
        self.record("release_swapchain_image")?;
        // Only an image that has been waited on can be released
        if !self.ready.borrow_mut().remove(&swapchain.into_raw()) {
            return Err(sys::Result::ERROR_CALL_ORDER_INVALID);
        }
        let mut acquired = self.acquired.borrow_mut();
        match acquired.get_mut(&swapchain.into_raw()) {
            Some(outstanding) if *outstanding > 0 => {
                *outstanding -= 1;
                Ok(())
            }
            _ => Err(sys::Result::ERROR_CALL_ORDER_INVALID),
        }
    }

    fn string_to_path(&self, _instance: Instance, path: &str) -> XrResult<Path> {
        self.record("string_to_path")?;
        let mut paths = self.paths.borrow_mut();
        let index = match paths.iter().position(|p| p == path) {
            Some(index) => index,
            None => {
                paths.push(path.to_string());
                paths.len() - 1
            }
        };
        Ok(Path::from_raw(index as u64 + 1))
    }

    fn path_to_string(&self, _instance: Instance, path: Path) -> XrResult<String> {
        self.record("path_to_string")?;
        self.paths
            .borrow()
            .get((path.into_raw() as usize).wrapping_sub(1))
            .cloned()
            .ok_or(sys::Result::ERROR_PATH_INVALID)
    }

    fn create_action_set(
        &self,
        _instance: Instance,
        _name: &str,
        _localized_name: &str,
        _priority: u32,
    ) -> XrResult<ActionSet> {
        self.record("create_action_set")?;
        Ok(ActionSet::from_raw(self.handle()))
    }

    fn destroy_action_set(&self, _action_set: ActionSet) -> XrResult<()> {
        self.record("destroy_action_set")
    }

    fn create_action(
        &self,
        _action_set: ActionSet,
        _name: &str,
        _localized_name: &str,
        _action_type: ActionType,
        _subaction_paths: &[Path],
    ) -> XrResult<Action> {
        self.record("create_action")?;
        Ok(Action::from_raw(self.handle()))
    }

    fn destroy_action(&self, _action: Action) -> XrResult<()> {
        self.record("destroy_action")
    }

    fn suggest_interaction_profile_bindings(
        &self,
        _instance: Instance,
        _interaction_profile: Path,
        _bindings: &[(Action, Path)],
    ) -> XrResult<()> {
        self.record("suggest_interaction_profile_bindings")
    }

    fn attach_session_action_sets(
        &self,
        _session: Session,
        _action_sets: &[ActionSet],
    ) -> XrResult<()> {
        self.record("attach_session_action_sets")
    }

    fn sync_actions(
        &self,
        _session: Session,
        _active_action_sets: &[(ActionSet, Path)],
    ) -> XrResult<()> {
        self.record("sync_actions")
    }

    fn get_action_state_boolean(
        &self,
        _session: Session,
        _action: Action,
        _subaction_path: Path,
    ) -> XrResult<ActionState<bool>> {
        self.record("get_action_state_boolean")?;
        Ok(ActionState {
            current_state: true,
            is_active: true,
        })
    }

    fn get_action_state_float(
        &self,
        _session: Session,
        _action: Action,
        _subaction_path: Path,
    ) -> XrResult<ActionState<f32>> {
        self.record("get_action_state_float")?;
        Ok(ActionState {
            current_state: self.float_state.get(),
            is_active: true,
        })
    }

    fn get_action_state_vector2f(
        &self,
        _session: Session,
        _action: Action,
        _subaction_path: Path,
    ) -> XrResult<ActionState<Vector2f>> {
        self.record("get_action_state_vector2f")?;
        Ok(ActionState {
            current_state: Vector2f { x: 0.25, y: -0.5 },
            is_active: true,
        })
    }

    fn get_action_state_pose(
        &self,
        _session: Session,
        _action: Action,
        _subaction_path: Path,
    ) -> XrResult<bool> {
        self.record("get_action_state_pose")?;
        Ok(self.pose_active.get())
    }

    fn apply_haptic_feedback(
        &self,
        _session: Session,
        _action: Action,
        subaction_path: Path,
        duration: Duration,
        _frequency: f32,
        amplitude: f32,
    ) -> XrResult<()> {
        self.record("apply_haptic_feedback")?;
        self.haptic_pulses
            .borrow_mut()
            .push((subaction_path, duration, amplitude));
        Ok(())
    }

    fn create_action_space(
        &self,
        _session: Session,
        _action: Action,
        _subaction_path: Path,
        _pose_in_action_space: Posef,
    ) -> XrResult<Space> {
        self.record("create_action_space")?;
        self.live_spaces.set(self.live_spaces.get() + 1);
        Ok(Space::from_raw(self.handle()))
    }

    fn get_current_interaction_profile(
        &self,
        _session: Session,
        _top_level_user_path: Path,
    ) -> XrResult<Path> {
        self.record("get_current_interaction_profile")?;
        Ok(Path::NULL)
    }

    fn poll_event(&self, _instance: Instance) -> XrResult<Option<XrEvent>> {
        self.record("poll_event")?;
        Ok(self.events.borrow_mut().pop_front())
    }

    fn wait_frame(&self, _session: Session) -> XrResult<FrameTiming> {
        self.record("wait_frame")?;
        let time = self.display_time.get() + 11_111_111;
        self.display_time.set(time);
        Ok(FrameTiming {
            predicted_display_time: Time::from_nanos(time),
            predicted_display_period: Duration::from_nanos(11_111_111),
            should_render: self.should_render.get(),
        })
    }

    fn begin_frame(&self, _session: Session) -> XrResult<()> {
        self.record("begin_frame")?;
        if self.frame_begun.replace(true) {
            return Err(sys::Result::ERROR_CALL_ORDER_INVALID);
        }
        Ok(())
    }

    fn end_frame(
        &self,
        _session: Session,
        _display_time: Time,
        _environment_blend_mode: EnvironmentBlendMode,
        layers: &[CompositionLayer<'_>],
    ) -> XrResult<()> {
        self.record("end_frame")?;
        if !self.frame_begun.replace(false) {
            return Err(sys::Result::ERROR_CALL_ORDER_INVALID);
        }
        self.end_frame_layers.borrow_mut().push(layers.len());
        Ok(())
    }

    fn locate_views(
        &self,
        _session: Session,
        _view_configuration_type: ViewConfigurationType,
        _display_time: Time,
        _space: Space,
    ) -> XrResult<(ViewStateFlags, Vec<ViewPose>)> {
        self.record("locate_views")?;
        let half = std::f32::consts::FRAC_PI_4;
        let view = |x: f32| ViewPose {
            pose: Posef {
                orientation: Quaternionf {
                    x: 0.,
                    y: 0.,
                    z: 0.,
                    w: 1.,
                },
                position: Vector3f { x, y: 1.6, z: 0. },
            },
            fov: Fovf {
                angle_left: -half,
                angle_right: half,
                angle_up: half,
                angle_down: -half,
            },
        };
        Ok((self.view_flags.get(), vec![view(-0.032), view(0.032)]))
    }
}
