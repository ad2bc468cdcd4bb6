use std::{cell::RefCell, collections::BTreeMap, ffi::c_void, rc::Rc};

use openxr::sys::{self, Instance, Session, SessionState, Space, SystemId, Time};

use crate::runtime::{xr_check, XrEvent, XrResult, XrRuntime};

mod color_space;
mod display_refresh_rate;
mod foveation;
mod hand_tracking;
mod overlay;
mod palm_pose;
mod passthrough;
mod performance_settings;
mod swapchain_update_state;
mod vive_tracker;

pub use color_space::ColorSpaceExtension;
pub use display_refresh_rate::DisplayRefreshRateExtension;
pub use foveation::FoveationExtension;
pub use hand_tracking::{HandTracker, HandTrackingExtension, HAND_JOINT_COUNT, PALM_JOINT};
pub use overlay::OverlayExtension;
pub use palm_pose::PalmPoseExtension;
pub use passthrough::PassthroughExtension;
pub use performance_settings::PerformanceSettingsExtension;
pub use swapchain_update_state::SwapchainUpdateStateExtension;
pub use vive_tracker::ViveTrackerExtension;

/// The extensions a wrapper would like enabled, and whether each one actually was.
///
/// The session manager reads the names before creating the instance and writes the flags back
/// afterwards: a flag is only ever `true` if the name is in the instance's enabled list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestedExtensions {
    extensions: BTreeMap<&'static str, bool>,
}

impl RequestedExtensions {
    /// Request each of `names`, all initially disabled
    pub fn new(names: &[&'static str]) -> Self {
        Self {
            extensions: names.iter().map(|name| (*name, false)).collect(),
        }
    }

    /// Names of every requested extension
    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.extensions.keys().copied()
    }

    /// Record which of the requested extensions made it into the instance
    pub fn write_back(&mut self, enabled_extensions: &[String]) {
        for (name, enabled) in self.extensions.iter_mut() {
            *enabled = enabled_extensions.iter().any(|e| e == name);
        }
    }

    /// Was `name` requested and enabled?
    pub fn is_enabled(&self, name: &str) -> bool {
        self.extensions.get(name).copied().unwrap_or(false)
    }

    /// Mark `name` as unavailable, eg. because its functions couldn't be resolved
    pub fn disable(&mut self, name: &str) {
        if let Some(enabled) = self.extensions.get_mut(name) {
            *enabled = false;
        }
    }

    /// Mark everything as unavailable
    pub fn clear(&mut self) {
        self.extensions.values_mut().for_each(|e| *e = false);
    }
}

/// What the session manager knows at the point it calls a wrapper hook.
///
/// Handles that don't exist yet are `NULL`.
pub struct SessionContext<'a> {
    /// The runtime everything goes through
    pub runtime: &'a Rc<dyn XrRuntime>,
    /// The OpenXR instance
    pub instance: Instance,
    /// The system the session was created for
    pub system_id: SystemId,
    /// The OpenXR session
    pub session: Session,
    /// The space poses are reported in
    pub play_space: Space,
    /// Predicted display time of the current frame
    pub predicted_display_time: Time,
    /// Predicted display time of the frame after this one
    pub next_frame_time: Time,
    /// The session's current state
    pub state: SessionState,
}

/// An optional runtime capability that plugs into the session lifecycle.
///
/// Every hook has a no-op default so wrappers only implement what they need. The session manager
/// calls each hook on every registered wrapper, in registration order.
pub trait ExtensionWrapper {
    /// Used in log messages
    fn name(&self) -> &'static str;
    /// The extensions this wrapper wants
    fn requested_extensions(&self) -> &RequestedExtensions;
    /// The same, for writing back which ones were enabled
    fn requested_extensions_mut(&mut self) -> &mut RequestedExtensions;

    /// Resolve function pointers. Called after the enabled flags have been written back.
    fn on_instance_initialized(&mut self, _context: &SessionContext<'_>) {}
    /// Chain a struct into `xrGetSystemProperties`. Return the new head of the chain, or `next` to
    /// leave it alone.
    fn chain_system_properties(&mut self, next: *mut c_void) -> *mut c_void {
        next
    }
    /// Chain a struct into `xrCreateSwapchain`. Same contract as [`Self::chain_system_properties`].
    fn chain_swapchain_create_info(&mut self, next: *const c_void) -> *const c_void {
        next
    }
    /// The session exists
    fn on_session_initialized(&mut self, _context: &SessionContext<'_>) {}
    /// The session moved to IDLE
    fn on_state_idle(&mut self, _context: &SessionContext<'_>) {}
    /// The session moved to READY and has been begun
    fn on_state_ready(&mut self, _context: &SessionContext<'_>) {}
    /// The session moved to SYNCHRONIZED
    fn on_state_synchronized(&mut self, _context: &SessionContext<'_>) {}
    /// The session moved to VISIBLE
    fn on_state_visible(&mut self, _context: &SessionContext<'_>) {}
    /// The session moved to FOCUSED
    fn on_state_focused(&mut self, _context: &SessionContext<'_>) {}
    /// The session moved to STOPPING
    fn on_state_stopping(&mut self, _context: &SessionContext<'_>) {}
    /// The session moved to LOSS_PENDING
    fn on_state_loss_pending(&mut self, _context: &SessionContext<'_>) {}
    /// The session moved to EXITING
    fn on_state_exiting(&mut self, _context: &SessionContext<'_>) {}
    /// Called once per frame after `xrBeginFrame`
    fn on_process_openxr(&mut self, _context: &SessionContext<'_>) {}
    /// The session is about to be destroyed
    fn on_session_destroyed(&mut self, _context: &SessionContext<'_>) {}
    /// The instance is about to be destroyed
    fn on_instance_destroyed(&mut self) {}
    /// Every polled event is offered to every wrapper. Return `true` if this wrapper handled it.
    fn on_event_polled(&mut self, _context: &SessionContext<'_>, _event: &XrEvent) -> bool {
        false
    }
    /// Veto an input binding path this wrapper is responsible for
    fn path_is_supported(&self, _path: &str) -> bool {
        true
    }
    /// Extra top level input paths to poll, eg. trackers
    fn input_paths(&self) -> Vec<&'static str> {
        Vec::new()
    }
}

/// Something that adds its own layer to `xrEndFrame`.
///
/// Providers register themselves with the session manager explicitly.
pub trait CompositionLayerProvider {
    /// The layer to submit this frame, if any. Must stay valid until the next call.
    fn composition_layer(&self) -> Option<*const sys::CompositionLayerBaseHeader>;
}

/// The runtime, instance and session a wrapper captured from its hooks so its feature API can be
/// called later.
pub(crate) struct RuntimeBinding {
    runtime: Option<Rc<dyn XrRuntime>>,
    pub instance: Instance,
    pub session: Session,
}

impl Default for RuntimeBinding {
    fn default() -> Self {
        Self {
            runtime: None,
            instance: Instance::NULL,
            session: Session::NULL,
        }
    }
}

impl RuntimeBinding {
    pub fn bind_instance(&mut self, context: &SessionContext<'_>) {
        self.runtime = Some(context.runtime.clone());
        self.instance = context.instance;
    }

    pub fn bind_session(&mut self, context: &SessionContext<'_>) {
        self.bind_instance(context);
        self.session = context.session;
    }

    pub fn unbind_session(&mut self) {
        self.session = Session::NULL;
    }

    pub fn unbind(&mut self) {
        *self = Default::default();
    }

    pub fn has_session(&self) -> bool {
        self.runtime.is_some() && self.session != Session::NULL
    }

    pub fn runtime(&self) -> Option<&Rc<dyn XrRuntime>> {
        self.runtime.as_ref()
    }

    pub fn check<T>(&self, result: XrResult<T>, action: &str) -> Option<T> {
        match &self.runtime {
            Some(runtime) => xr_check(runtime.as_ref(), self.instance, result, action),
            None => result.ok(),
        }
    }
}

/// Every wrapper this crate ships with, shared between the engine adapter and the config object.
#[derive(Clone)]
pub struct BuiltinExtensions {
    /// `XR_FB_swapchain_update_state`
    pub swapchain_update_state: Rc<RefCell<SwapchainUpdateStateExtension>>,
    /// `XR_FB_foveation`
    pub foveation: Rc<RefCell<FoveationExtension>>,
    /// `XR_EXT_performance_settings`
    pub performance_settings: Rc<RefCell<PerformanceSettingsExtension>>,
    /// `XR_FB_color_space`
    pub color_space: Rc<RefCell<ColorSpaceExtension>>,
    /// `XR_FB_display_refresh_rate`
    pub display_refresh_rate: Rc<RefCell<DisplayRefreshRateExtension>>,
    /// `XR_EXT_hand_tracking`
    pub hand_tracking: Rc<RefCell<HandTrackingExtension>>,
    /// `XR_FB_passthrough`
    pub passthrough: Rc<RefCell<PassthroughExtension>>,
    /// `XR_EXTX_overlay`
    pub overlay: Rc<RefCell<OverlayExtension>>,
    /// `XR_EXT_palm_pose`
    pub palm_pose: Rc<RefCell<PalmPoseExtension>>,
    /// `XR_HTCX_vive_tracker_interaction`
    pub vive_tracker: Rc<RefCell<ViveTrackerExtension>>,
}

impl Default for BuiltinExtensions {
    fn default() -> Self {
        let swapchain_update_state = Rc::new(RefCell::new(SwapchainUpdateStateExtension::default()));
        Self {
            foveation: Rc::new(RefCell::new(FoveationExtension::new(
                swapchain_update_state.clone(),
            ))),
            swapchain_update_state,
            performance_settings: Default::default(),
            color_space: Default::default(),
            display_refresh_rate: Default::default(),
            hand_tracking: Default::default(),
            passthrough: Default::default(),
            overlay: Default::default(),
            palm_pose: Default::default(),
            vive_tracker: Default::default(),
        }
    }
}

impl BuiltinExtensions {
    /// Every wrapper, in the order they should be registered
    pub fn wrappers(&self) -> Vec<Rc<RefCell<dyn ExtensionWrapper>>> {
        let wrappers: [Rc<RefCell<dyn ExtensionWrapper>>; 10] = [
            self.swapchain_update_state.clone(),
            self.foveation.clone(),
            self.performance_settings.clone(),
            self.color_space.clone(),
            self.display_refresh_rate.clone(),
            self.hand_tracking.clone(),
            self.passthrough.clone(),
            self.overlay.clone(),
            self.palm_pose.clone(),
            self.vive_tracker.clone(),
        ];
        wrappers.into()
    }
}

#[cfg(test)]
pub(crate) fn test_context(runtime: &Rc<dyn XrRuntime>) -> SessionContext<'_> {
    SessionContext {
        runtime,
        instance: Instance::from_raw(1),
        system_id: SystemId::from_raw(2),
        session: Session::from_raw(3),
        play_space: Space::from_raw(4),
        predicted_display_time: Time::from_nanos(11_111_111),
        next_frame_time: Time::from_nanos(22_222_222),
        state: SessionState::READY,
    }
}
