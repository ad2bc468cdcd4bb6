//! The boundary between the bridge and the OpenXR runtime.
//!
//! Everything the session manager needs from the runtime goes through [`XrRuntime`]. The production
//! implementation is [`LoaderRuntime`], which resolves the runtime's C entry points through the
//! OpenXR loader. Handles, poses and flags are the plain `openxr-sys` types.

use std::ffi::c_void;

use log::error;
use openxr::sys::{
    self, pfn, Action, ActionSet, ActionType, CompositionLayerBaseHeader, Duration, EnvironmentBlendMode,
    FormFactor, Fovf, Instance, Path, Posef, ReferenceSpaceType, Session, SessionState, Space,
    SpaceLocationFlags, Swapchain, SwapchainUsageFlags, SystemId, Time, Vector2f, Version,
    ViewConfigurationType, ViewStateFlags,
};

use crate::util::GraphicsApi;

mod enumerate;
mod loader;
#[cfg(test)]
pub(crate) mod mock;
pub(crate) mod proc_table;

pub(crate) use enumerate::enumerate;
pub use loader::{GraphicsBinding, LoaderRuntime};

/// Result of a single runtime call
pub type XrResult<T> = std::result::Result<T, sys::Result>;

/// What `xrGetSystemProperties` told us about the device
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SystemInfo {
    /// Human readable name of the system
    pub system_name: String,
    /// Vendor ID of the system
    pub vendor_id: u32,
}

/// Recommended and maximum rendering parameters for one view
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecommendedView {
    /// Recommended image width
    pub recommended_width: u32,
    /// Maximum image width
    pub max_width: u32,
    /// Recommended image height
    pub recommended_height: u32,
    /// Maximum image height
    pub max_height: u32,
    /// Recommended swapchain sample count
    pub recommended_sample_count: u32,
    /// Maximum swapchain sample count
    pub max_sample_count: u32,
}

/// Parameters for a swapchain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapchainDesc {
    /// How the images will be used
    pub usage_flags: SwapchainUsageFlags,
    /// Graphics API specific format
    pub format: i64,
    /// MSAA sample count
    pub sample_count: u32,
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// 6 for cubemaps, 1 otherwise
    pub face_count: u32,
    /// Number of array layers
    pub array_size: u32,
    /// Number of mip levels
    pub mip_count: u32,
}

/// Where a space is, and how much the runtime trusts that
#[derive(Debug, Clone, Copy)]
pub struct Location {
    /// Which parts of `pose` are valid / tracked
    pub flags: SpaceLocationFlags,
    /// The located pose
    pub pose: Posef,
}

/// Pose and field of view of one located view
#[derive(Debug, Clone, Copy)]
pub struct ViewPose {
    /// The view's pose in the requested space
    pub pose: Posef,
    /// The view's field of view
    pub fov: Fovf,
}

impl Default for ViewPose {
    fn default() -> Self {
        Self {
            pose: Posef::IDENTITY,
            fov: Fovf {
                angle_left: 0.,
                angle_right: 0.,
                angle_up: 0.,
                angle_down: 0.,
            },
        }
    }
}

/// The output of `xrWaitFrame`
#[derive(Debug, Clone, Copy)]
pub struct FrameTiming {
    /// When the frame about to be rendered is expected to be displayed
    pub predicted_display_time: Time,
    /// Expected time between displayed frames
    pub predicted_display_period: Duration,
    /// Whether the application should render this frame at all
    pub should_render: bool,
}

impl Default for FrameTiming {
    fn default() -> Self {
        Self {
            predicted_display_time: Time::from_nanos(0),
            predicted_display_period: Duration::from_nanos(0),
            should_render: false,
        }
    }
}

/// The state of an input action for one subaction path
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ActionState<T> {
    /// The current value
    pub current_state: T,
    /// Whether there's an active binding providing the value
    pub is_active: bool,
}

/// One eye's contribution to a projection layer
#[derive(Debug, Clone, Copy)]
pub struct ProjectionView {
    /// Pose the eye was rendered from
    pub pose: Posef,
    /// Field of view the eye was rendered with
    pub fov: Fovf,
    /// Swapchain holding the rendered image
    pub swapchain: Swapchain,
    /// Width and height of the rendered region
    pub extent: (i32, i32),
    /// Array layer of the image
    pub image_array_index: u32,
}

/// A layer submitted to `xrEndFrame`
#[derive(Debug, Clone, Copy)]
pub enum CompositionLayer<'a> {
    /// The regular stereo projection layer
    Projection {
        /// Space the eye poses are relative to
        space: Space,
        /// One entry per eye
        views: &'a [ProjectionView],
    },
    /// A layer built by an extension, passed through as is
    Raw(*const CompositionLayerBaseHeader),
}

/// Events returned by `xrPollEvent`
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum XrEvent {
    /// The runtime's event queue overflowed
    EventsLost {
        /// Number of events dropped
        lost_event_count: u32,
    },
    /// The instance is about to become unusable
    InstanceLossPending {
        /// When the loss will happen
        loss_time: Time,
    },
    /// The session moved to a new state
    SessionStateChanged {
        /// The session that changed
        session: Session,
        /// Its new state
        state: SessionState,
        /// When the change happened
        time: Time,
    },
    /// A reference space is about to move
    ReferenceSpaceChangePending {
        /// Which kind of space
        reference_space_type: ReferenceSpaceType,
    },
    /// The active interaction profile for at least one top level path changed
    InteractionProfileChanged {
        /// The affected session
        session: Session,
    },
    /// The visibility mask for a view changed
    VisibilityMaskChanged {
        /// The affected view
        view_index: u32,
    },
    /// `XR_EXT_performance_settings` notification
    PerfSettings {
        /// CPU or GPU
        domain: sys::PerfSettingsDomainEXT,
        /// Compositing, rendering or thermal
        sub_domain: sys::PerfSettingsSubDomainEXT,
        /// Previous notification level
        from_level: sys::PerfSettingsNotificationLevelEXT,
        /// New notification level
        to_level: sys::PerfSettingsNotificationLevelEXT,
    },
    /// `XR_FB_display_refresh_rate` notification
    DisplayRefreshRateChanged {
        /// Previous refresh rate
        from: f32,
        /// New refresh rate
        to: f32,
    },
    /// `XR_HTCX_vive_tracker_interaction` notification
    ViveTrackerConnected {
        /// Persistent path of the tracker
        persistent_path: Path,
        /// Role path of the tracker, if it has one
        role_path: Path,
    },
    /// Anything the bridge doesn't decode
    Other(sys::StructureType),
}

/// Every runtime primitive the session manager, actions and extension wrappers rely on.
///
/// Methods mirror the OpenXR functions of the same name. Variable length results are returned as
/// owned `Vec`s and output structs as plain Rust values.
pub trait XrRuntime {
    /// Which graphics API the session will be created with
    fn graphics_api(&self) -> GraphicsApi;
    /// Name of the extension that provides the graphics binding, eg. `XR_KHR_opengl_enable`
    fn graphics_extension_name(&self) -> &'static str;
    /// Resolve an extension or core function by name
    fn get_instance_proc_addr(&self, instance: Instance, name: &str) -> Option<pfn::VoidFunction>;
    /// Human readable version of a result code
    fn result_to_string(&self, _instance: Instance, result: sys::Result) -> String {
        format!("{result}")
    }

    /// `xrEnumerateInstanceExtensionProperties`, names only
    fn enumerate_instance_extension_properties(&self) -> XrResult<Vec<String>>;
    /// `xrCreateInstance`
    fn create_instance(
        &self,
        application_name: &str,
        application_version: u32,
        extensions: &[&str],
    ) -> XrResult<Instance>;
    /// `xrDestroyInstance`
    fn destroy_instance(&self, instance: Instance) -> XrResult<()>;

    /// `xrGetSystem`
    fn get_system(&self, instance: Instance, form_factor: FormFactor) -> XrResult<SystemId>;
    /// `xrGetSystemProperties`; `next` is the head of a chain built by extension wrappers
    fn get_system_properties(
        &self,
        instance: Instance,
        system: SystemId,
        next: *mut c_void,
    ) -> XrResult<SystemInfo>;
    /// `xrEnumerateViewConfigurations`
    fn enumerate_view_configurations(
        &self,
        instance: Instance,
        system: SystemId,
    ) -> XrResult<Vec<ViewConfigurationType>>;
    /// `xrEnumerateViewConfigurationViews`
    fn enumerate_view_configuration_views(
        &self,
        instance: Instance,
        system: SystemId,
        view_configuration_type: ViewConfigurationType,
    ) -> XrResult<Vec<RecommendedView>>;
    /// Minimum and maximum graphics API version the runtime supports
    fn graphics_requirements(
        &self,
        instance: Instance,
        system: SystemId,
    ) -> XrResult<(Version, Version)>;

    /// `xrCreateSession` with the graphics binding this runtime was set up with
    fn create_session(&self, instance: Instance, system: SystemId) -> XrResult<Session>;
    /// `xrDestroySession`
    fn destroy_session(&self, session: Session) -> XrResult<()>;
    /// `xrBeginSession`
    fn begin_session(
        &self,
        session: Session,
        view_configuration_type: ViewConfigurationType,
    ) -> XrResult<()>;
    /// `xrEndSession`
    fn end_session(&self, session: Session) -> XrResult<()>;

    /// `xrEnumerateReferenceSpaces`
    fn enumerate_reference_spaces(&self, session: Session) -> XrResult<Vec<ReferenceSpaceType>>;
    /// `xrCreateReferenceSpace`
    fn create_reference_space(
        &self,
        session: Session,
        reference_space_type: ReferenceSpaceType,
        pose_in_reference_space: Posef,
    ) -> XrResult<Space>;
    /// `xrDestroySpace`
    fn destroy_space(&self, space: Space) -> XrResult<()>;
    /// `xrLocateSpace`
    fn locate_space(&self, space: Space, base_space: Space, time: Time) -> XrResult<Location>;

    /// `xrEnumerateSwapchainFormats`
    fn enumerate_swapchain_formats(&self, session: Session) -> XrResult<Vec<i64>>;
    /// `xrCreateSwapchain`; `next` is the head of a chain built by extension wrappers
    fn create_swapchain(
        &self,
        session: Session,
        desc: &SwapchainDesc,
        next: *const c_void,
    ) -> XrResult<Swapchain>;
    /// `xrDestroySwapchain`
    fn destroy_swapchain(&self, swapchain: Swapchain) -> XrResult<()>;
    /// `xrEnumerateSwapchainImages`, as graphics API specific handles
    fn enumerate_swapchain_images(&self, swapchain: Swapchain) -> XrResult<Vec<u64>>;
    /// `xrAcquireSwapchainImage`
    fn acquire_swapchain_image(&self, swapchain: Swapchain) -> XrResult<u32>;
    /// `xrWaitSwapchainImage`; `Ok(false)` means the timeout expired
    fn wait_swapchain_image(&self, swapchain: Swapchain, timeout: Duration) -> XrResult<bool>;
    /// `xrReleaseSwapchainImage`
    fn release_swapchain_image(&self, swapchain: Swapchain) -> XrResult<()>;

    /// `xrStringToPath`
    fn string_to_path(&self, instance: Instance, path: &str) -> XrResult<Path>;
    /// `xrPathToString`
    fn path_to_string(&self, instance: Instance, path: Path) -> XrResult<String>;
    /// `xrCreateActionSet`
    fn create_action_set(
        &self,
        instance: Instance,
        name: &str,
        localized_name: &str,
        priority: u32,
    ) -> XrResult<ActionSet>;
    /// `xrDestroyActionSet`
    fn destroy_action_set(&self, action_set: ActionSet) -> XrResult<()>;
    /// `xrCreateAction`
    fn create_action(
        &self,
        action_set: ActionSet,
        name: &str,
        localized_name: &str,
        action_type: ActionType,
        subaction_paths: &[Path],
    ) -> XrResult<Action>;
    /// `xrDestroyAction`
    fn destroy_action(&self, action: Action) -> XrResult<()>;
    /// `xrSuggestInteractionProfileBindings`
    fn suggest_interaction_profile_bindings(
        &self,
        instance: Instance,
        interaction_profile: Path,
        bindings: &[(Action, Path)],
    ) -> XrResult<()>;
    /// `xrAttachSessionActionSets`
    fn attach_session_action_sets(&self, session: Session, action_sets: &[ActionSet])
        -> XrResult<()>;
    /// `xrSyncActions`; pass `Path::NULL` to sync every subaction path of a set
    fn sync_actions(&self, session: Session, active_action_sets: &[(ActionSet, Path)])
        -> XrResult<()>;
    /// `xrGetActionStateBoolean`
    fn get_action_state_boolean(
        &self,
        session: Session,
        action: Action,
        subaction_path: Path,
    ) -> XrResult<ActionState<bool>>;
    /// `xrGetActionStateFloat`
    fn get_action_state_float(
        &self,
        session: Session,
        action: Action,
        subaction_path: Path,
    ) -> XrResult<ActionState<f32>>;
    /// `xrGetActionStateVector2f`
    fn get_action_state_vector2f(
        &self,
        session: Session,
        action: Action,
        subaction_path: Path,
    ) -> XrResult<ActionState<Vector2f>>;
    /// `xrGetActionStatePose`, which only reports activity
    fn get_action_state_pose(
        &self,
        session: Session,
        action: Action,
        subaction_path: Path,
    ) -> XrResult<bool>;
    /// `xrApplyHapticFeedback` with a single vibration
    fn apply_haptic_feedback(
        &self,
        session: Session,
        action: Action,
        subaction_path: Path,
        duration: Duration,
        frequency: f32,
        amplitude: f32,
    ) -> XrResult<()>;
    /// `xrCreateActionSpace`
    fn create_action_space(
        &self,
        session: Session,
        action: Action,
        subaction_path: Path,
        pose_in_action_space: Posef,
    ) -> XrResult<Space>;
    /// `xrGetCurrentInteractionProfile`
    fn get_current_interaction_profile(
        &self,
        session: Session,
        top_level_user_path: Path,
    ) -> XrResult<Path>;

    /// `xrPollEvent`; `Ok(None)` once the queue is drained
    fn poll_event(&self, instance: Instance) -> XrResult<Option<XrEvent>>;
    /// `xrWaitFrame`
    fn wait_frame(&self, session: Session) -> XrResult<FrameTiming>;
    /// `xrBeginFrame`
    fn begin_frame(&self, session: Session) -> XrResult<()>;
    /// `xrEndFrame`
    fn end_frame(
        &self,
        session: Session,
        display_time: Time,
        environment_blend_mode: EnvironmentBlendMode,
        layers: &[CompositionLayer<'_>],
    ) -> XrResult<()>;
    /// `xrLocateViews`
    fn locate_views(
        &self,
        session: Session,
        view_configuration_type: ViewConfigurationType,
        display_time: Time,
        space: Space,
    ) -> XrResult<(ViewStateFlags, Vec<ViewPose>)>;
}

/// Turn a raw result code into an [`XrResult`]; success codes (including qualified successes such
/// as `TIMEOUT_EXPIRED`) are `Ok`.
#[inline]
pub fn cvt(result: sys::Result) -> XrResult<sys::Result> {
    if result.into_raw() >= 0 {
        Ok(result)
    } else {
        Err(result)
    }
}

/// Check a runtime result, logging failures with the runtime's description of the error.
///
/// This is the one place per-frame failures are reported; callers bail out on `None`.
pub fn xr_check<T>(
    runtime: &dyn XrRuntime,
    instance: Instance,
    result: XrResult<T>,
    action: &str,
) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(e) => {
            error!(
                "[OPENXR] {action} failed: {} ({})",
                runtime.result_to_string(instance, e),
                e.into_raw()
            );
            None
        }
    }
}

/// Build an OpenXR input/output struct with its `ty` filled in and every other field zeroed
/// before applying the given fields.
macro_rules! xr_struct {
    ($ty:path { $($field:ident: $value:expr),* $(,)? }) => {{
        // SAFETY: OpenXR structs are plain C data without references or function pointers, so the
        // all zero bit pattern is a valid (empty, null `next`) value.
        #[allow(unused_mut)]
        let mut s: $ty = unsafe { std::mem::zeroed() };
        s.ty = <$ty>::TYPE;
        $(s.$field = $value;)*
        s
    }};
}
pub(crate) use xr_struct;
