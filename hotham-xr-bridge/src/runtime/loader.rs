use std::{
    cell::Cell,
    ffi::{c_char, c_void, CStr, CString},
    ptr,
};

use log::{debug, error, info, warn};
use openxr::sys::{
    self, pfn, Action, ActionSet, ActionType, Duration, EnvironmentBlendMode, FormFactor, Instance,
    Path, Posef, ReferenceSpaceType, Session, Space, Swapchain, SystemId, Time, Vector2f, Version,
    ViewConfigurationType, ViewStateFlags,
};

use super::{
    cvt, enumerate, proc_table::proc_table, xr_struct, ActionState, CompositionLayer, FrameTiming,
    Location, RecommendedView, SwapchainDesc, SystemInfo, ViewPose, XrEvent, XrResult, XrRuntime,
};
use crate::{util::GraphicsApi, BridgeError, BridgeResult};

/// How the session will be bound to the host's graphics context.
///
/// `session_next` points at a graphics binding struct (eg. `XrGraphicsBindingOpenGLXlibKHR`) owned by
/// the host and must stay valid until the session has been created.
#[derive(Debug, Clone, Copy)]
pub struct GraphicsBinding {
    /// The graphics API in use
    pub api: GraphicsApi,
    /// The OpenXR extension providing the binding
    pub extension_name: &'static str,
    /// Pointer to the graphics binding struct, chained into `XrSessionCreateInfo`
    pub session_next: *const c_void,
}

impl GraphicsBinding {
    /// Bind to a desktop OpenGL context
    pub fn opengl(session_next: *const c_void) -> Self {
        Self {
            api: GraphicsApi::OpenGL,
            extension_name: "XR_KHR_opengl_enable",
            session_next,
        }
    }

    /// Bind to an OpenGL ES context
    pub fn opengl_es(session_next: *const c_void) -> Self {
        Self {
            api: GraphicsApi::OpenGLES,
            extension_name: "XR_KHR_opengl_es_enable",
            session_next,
        }
    }

    /// Bind to a Vulkan device
    pub fn vulkan(session_next: *const c_void) -> Self {
        Self {
            api: GraphicsApi::Vulkan,
            extension_name: "XR_KHR_vulkan_enable",
            session_next,
        }
    }
}

proc_table! {
    pub(crate) struct CoreFunctions {
        result_to_string: pfn::ResultToString = "xrResultToString",
        destroy_instance: pfn::DestroyInstance = "xrDestroyInstance",
        get_system: pfn::GetSystem = "xrGetSystem",
        get_system_properties: pfn::GetSystemProperties = "xrGetSystemProperties",
        enumerate_view_configurations: pfn::EnumerateViewConfigurations = "xrEnumerateViewConfigurations",
        enumerate_view_configuration_views: pfn::EnumerateViewConfigurationViews = "xrEnumerateViewConfigurationViews",
        create_session: pfn::CreateSession = "xrCreateSession",
        destroy_session: pfn::DestroySession = "xrDestroySession",
        begin_session: pfn::BeginSession = "xrBeginSession",
        end_session: pfn::EndSession = "xrEndSession",
        enumerate_reference_spaces: pfn::EnumerateReferenceSpaces = "xrEnumerateReferenceSpaces",
        create_reference_space: pfn::CreateReferenceSpace = "xrCreateReferenceSpace",
        destroy_space: pfn::DestroySpace = "xrDestroySpace",
        locate_space: pfn::LocateSpace = "xrLocateSpace",
        enumerate_swapchain_formats: pfn::EnumerateSwapchainFormats = "xrEnumerateSwapchainFormats",
        create_swapchain: pfn::CreateSwapchain = "xrCreateSwapchain",
        destroy_swapchain: pfn::DestroySwapchain = "xrDestroySwapchain",
        enumerate_swapchain_images: pfn::EnumerateSwapchainImages = "xrEnumerateSwapchainImages",
        acquire_swapchain_image: pfn::AcquireSwapchainImage = "xrAcquireSwapchainImage",
        wait_swapchain_image: pfn::WaitSwapchainImage = "xrWaitSwapchainImage",
        release_swapchain_image: pfn::ReleaseSwapchainImage = "xrReleaseSwapchainImage",
        string_to_path: pfn::StringToPath = "xrStringToPath",
        path_to_string: pfn::PathToString = "xrPathToString",
        create_action_set: pfn::CreateActionSet = "xrCreateActionSet",
        destroy_action_set: pfn::DestroyActionSet = "xrDestroyActionSet",
        create_action: pfn::CreateAction = "xrCreateAction",
        destroy_action: pfn::DestroyAction = "xrDestroyAction",
        suggest_interaction_profile_bindings: pfn::SuggestInteractionProfileBindings = "xrSuggestInteractionProfileBindings",
        attach_session_action_sets: pfn::AttachSessionActionSets = "xrAttachSessionActionSets",
        sync_actions: pfn::SyncActions = "xrSyncActions",
        get_action_state_boolean: pfn::GetActionStateBoolean = "xrGetActionStateBoolean",
        get_action_state_float: pfn::GetActionStateFloat = "xrGetActionStateFloat",
        get_action_state_vector2f: pfn::GetActionStateVector2f = "xrGetActionStateVector2f",
        get_action_state_pose: pfn::GetActionStatePose = "xrGetActionStatePose",
        apply_haptic_feedback: pfn::ApplyHapticFeedback = "xrApplyHapticFeedback",
        create_action_space: pfn::CreateActionSpace = "xrCreateActionSpace",
        get_current_interaction_profile: pfn::GetCurrentInteractionProfile = "xrGetCurrentInteractionProfile",
        poll_event: pfn::PollEvent = "xrPollEvent",
        wait_frame: pfn::WaitFrame = "xrWaitFrame",
        begin_frame: pfn::BeginFrame = "xrBeginFrame",
        end_frame: pfn::EndFrame = "xrEndFrame",
        locate_views: pfn::LocateViews = "xrLocateViews",
    }
}

proc_table! {
    pub(crate) struct GraphicsFunctions {
        get_opengl_graphics_requirements: pfn::GetOpenGLGraphicsRequirementsKHR = "xrGetOpenGLGraphicsRequirementsKHR",
        get_opengl_es_graphics_requirements: pfn::GetOpenGLESGraphicsRequirementsKHR = "xrGetOpenGLESGraphicsRequirementsKHR",
        get_vulkan_graphics_requirements: pfn::GetVulkanGraphicsRequirementsKHR = "xrGetVulkanGraphicsRequirementsKHR",
    }
}

/// An [`XrRuntime`] backed by the system's OpenXR loader.
pub struct LoaderRuntime {
    entry: openxr::Entry,
    binding: GraphicsBinding,
    core: Cell<CoreFunctions>,
    graphics: Cell<GraphicsFunctions>,
}

impl LoaderRuntime {
    /// Load the OpenXR loader from the default search path
    pub fn new(binding: GraphicsBinding) -> BridgeResult<Self> {
        // SAFETY: loading the loader runs its initialisers; there's nothing else we can check first.
        let entry = unsafe { openxr::Entry::load() }.map_err(|e| BridgeError::Loader(format!("{e}")))?;
        Ok(Self::from_entry(entry, binding))
    }

    /// Load the OpenXR loader from a specific path
    pub fn new_from_path<P: AsRef<std::path::Path>>(path: P, binding: GraphicsBinding) -> BridgeResult<Self> {
        // SAFETY: see `new`
        let entry = unsafe { openxr::Entry::load_from(path.as_ref()) }
            .map_err(|e| BridgeError::Loader(format!("{e}")))?;
        Ok(Self::from_entry(entry, binding))
    }

    /// Use an already loaded entry point
    pub fn from_entry(entry: openxr::Entry, binding: GraphicsBinding) -> Self {
        Self {
            entry,
            binding,
            core: Default::default(),
            graphics: Default::default(),
        }
    }

    fn fp(&self) -> CoreFunctions {
        self.core.get()
    }
}

fn loaded<T>(function: Option<T>) -> XrResult<T> {
    function.ok_or(sys::Result::ERROR_FUNCTION_UNSUPPORTED)
}

fn place_cstr(out: &mut [c_char], value: &str) {
    let bytes = value.as_bytes();
    let len = bytes.len().min(out.len() - 1);
    for (o, b) in out.iter_mut().zip(&bytes[..len]) {
        *o = *b as c_char;
    }
    out[len] = 0;
}

fn read_cstr(chars: &[c_char]) -> String {
    // SAFETY: the runtime always NUL terminates fixed size string members
    unsafe { CStr::from_ptr(chars.as_ptr()) }
        .to_string_lossy()
        .into_owned()
}

impl XrRuntime for LoaderRuntime {
    fn graphics_api(&self) -> GraphicsApi {
        self.binding.api
    }

    fn graphics_extension_name(&self) -> &'static str {
        self.binding.extension_name
    }

    fn get_instance_proc_addr(&self, instance: Instance, name: &str) -> Option<pfn::VoidFunction> {
        let name = CString::new(name).ok()?;
        let mut function = None;
        let result = unsafe {
            (self.entry.fp().get_instance_proc_addr)(instance, name.as_ptr(), &mut function)
        };
        if result.into_raw() < 0 {
            return None;
        }
        function
    }

    fn result_to_string(&self, instance: Instance, result: sys::Result) -> String {
        let Some(result_to_string) = self.fp().result_to_string else {
            return format!("{result}");
        };
        let mut buffer = [0 as c_char; sys::MAX_RESULT_STRING_SIZE];
        match cvt(unsafe { result_to_string(instance, result, buffer.as_mut_ptr()) }) {
            Ok(_) => read_cstr(&buffer),
            Err(_) => format!("{result}"),
        }
    }

    fn enumerate_instance_extension_properties(&self) -> XrResult<Vec<String>> {
        let function = self.entry.fp().enumerate_instance_extension_properties;
        let properties = enumerate(xr_struct!(sys::ExtensionProperties {}), |capacity, count, buffer| unsafe {
            function(ptr::null(), capacity, count, buffer)
        })?;
        Ok(properties
            .iter()
            .map(|p| read_cstr(&p.extension_name))
            .collect())
    }

    fn create_instance(
        &self,
        application_name: &str,
        application_version: u32,
        extensions: &[&str],
    ) -> XrResult<Instance> {
        // SAFETY: plain C data, see `xr_struct!`
        let mut application_info: sys::ApplicationInfo = unsafe { std::mem::zeroed() };
        place_cstr(&mut application_info.application_name, application_name);
        application_info.application_version = application_version;
        place_cstr(&mut application_info.engine_name, "hotham-xr-bridge");
        application_info.engine_version = 1;
        application_info.api_version = Version::new(1, 0, 0);

        let extension_names = extensions
            .iter()
            .filter_map(|e| CString::new(*e).ok())
            .collect::<Vec<_>>();
        let extension_pointers = extension_names.iter().map(|e| e.as_ptr()).collect::<Vec<_>>();

        let create_info = xr_struct!(sys::InstanceCreateInfo {
            application_info: application_info,
            enabled_extension_count: extension_pointers.len() as u32,
            enabled_extension_names: extension_pointers.as_ptr(),
        });

        let mut instance = Instance::NULL;
        cvt(unsafe { (self.entry.fp().create_instance)(&create_info, &mut instance) })?;

        let (core, missing) = CoreFunctions::load(self, instance);
        if !missing.is_empty() {
            error!("[OPENXR] Runtime is missing core functions: {missing:?}");
        }
        self.core.set(core);

        let (graphics, _) = GraphicsFunctions::load(self, instance);
        self.graphics.set(graphics);

        info!("[OPENXR] Instance created with extensions {extensions:?}");
        Ok(instance)
    }

    fn destroy_instance(&self, instance: Instance) -> XrResult<()> {
        let destroy_instance = loaded(self.fp().destroy_instance)?;
        cvt(unsafe { destroy_instance(instance) })?;
        self.core.set(Default::default());
        self.graphics.set(Default::default());
        Ok(())
    }

    fn get_system(&self, instance: Instance, form_factor: FormFactor) -> XrResult<SystemId> {
        let get_system = loaded(self.fp().get_system)?;
        let get_info = xr_struct!(sys::SystemGetInfo {
            form_factor: form_factor
        });
        let mut system = SystemId::from_raw(0);
        cvt(unsafe { get_system(instance, &get_info, &mut system) })?;
        Ok(system)
    }

    fn get_system_properties(
        &self,
        instance: Instance,
        system: SystemId,
        next: *mut c_void,
    ) -> XrResult<SystemInfo> {
        let get_system_properties = loaded(self.fp().get_system_properties)?;
        let mut properties = xr_struct!(sys::SystemProperties { next: next });
        cvt(unsafe { get_system_properties(instance, system, &mut properties) })?;
        Ok(SystemInfo {
            system_name: read_cstr(&properties.system_name),
            vendor_id: properties.vendor_id,
        })
    }

    fn enumerate_view_configurations(
        &self,
        instance: Instance,
        system: SystemId,
    ) -> XrResult<Vec<ViewConfigurationType>> {
        let function = loaded(self.fp().enumerate_view_configurations)?;
        enumerate(
            ViewConfigurationType::PRIMARY_STEREO,
            |capacity, count, buffer| unsafe { function(instance, system, capacity, count, buffer) },
        )
    }

    fn enumerate_view_configuration_views(
        &self,
        instance: Instance,
        system: SystemId,
        view_configuration_type: ViewConfigurationType,
    ) -> XrResult<Vec<RecommendedView>> {
        let function = loaded(self.fp().enumerate_view_configuration_views)?;
        let views = enumerate(
            xr_struct!(sys::ViewConfigurationView {}),
            |capacity, count, buffer| unsafe {
                function(instance, system, view_configuration_type, capacity, count, buffer)
            },
        )?;
        Ok(views
            .iter()
            .map(|v| RecommendedView {
                recommended_width: v.recommended_image_rect_width,
                max_width: v.max_image_rect_width,
                recommended_height: v.recommended_image_rect_height,
                max_height: v.max_image_rect_height,
                recommended_sample_count: v.recommended_swapchain_sample_count,
                max_sample_count: v.max_swapchain_sample_count,
            })
            .collect())
    }

    fn graphics_requirements(
        &self,
        instance: Instance,
        system: SystemId,
    ) -> XrResult<(Version, Version)> {
        let graphics = self.graphics.get();
        match self.binding.api {
            GraphicsApi::OpenGL => {
                let function = loaded(graphics.get_opengl_graphics_requirements)?;
                let mut requirements = xr_struct!(sys::GraphicsRequirementsOpenGLKHR {});
                cvt(unsafe { function(instance, system, &mut requirements) })?;
                Ok((
                    requirements.min_api_version_supported,
                    requirements.max_api_version_supported,
                ))
            }
            GraphicsApi::OpenGLES => {
                let function = loaded(graphics.get_opengl_es_graphics_requirements)?;
                let mut requirements = xr_struct!(sys::GraphicsRequirementsOpenGLESKHR {});
                cvt(unsafe { function(instance, system, &mut requirements) })?;
                Ok((
                    requirements.min_api_version_supported,
                    requirements.max_api_version_supported,
                ))
            }
            GraphicsApi::Vulkan => {
                let function = loaded(graphics.get_vulkan_graphics_requirements)?;
                let mut requirements = xr_struct!(sys::GraphicsRequirementsVulkanKHR {});
                cvt(unsafe { function(instance, system, &mut requirements) })?;
                Ok((
                    requirements.min_api_version_supported,
                    requirements.max_api_version_supported,
                ))
            }
            GraphicsApi::D3D | GraphicsApi::Metal => Err(sys::Result::ERROR_FUNCTION_UNSUPPORTED),
        }
    }

    fn create_session(&self, instance: Instance, system: SystemId) -> XrResult<Session> {
        let create_session = loaded(self.fp().create_session)?;
        let create_info = xr_struct!(sys::SessionCreateInfo {
            next: self.binding.session_next,
            system_id: system,
        });
        let mut session = Session::NULL;
        cvt(unsafe { create_session(instance, &create_info, &mut session) })?;
        Ok(session)
    }

    fn destroy_session(&self, session: Session) -> XrResult<()> {
        let destroy_session = loaded(self.fp().destroy_session)?;
        cvt(unsafe { destroy_session(session) }).map(|_| ())
    }

    fn begin_session(
        &self,
        session: Session,
        view_configuration_type: ViewConfigurationType,
    ) -> XrResult<()> {
        let begin_session = loaded(self.fp().begin_session)?;
        let begin_info = xr_struct!(sys::SessionBeginInfo {
            primary_view_configuration_type: view_configuration_type,
        });
        cvt(unsafe { begin_session(session, &begin_info) }).map(|_| ())
    }

    fn end_session(&self, session: Session) -> XrResult<()> {
        let end_session = loaded(self.fp().end_session)?;
        cvt(unsafe { end_session(session) }).map(|_| ())
    }

    fn enumerate_reference_spaces(&self, session: Session) -> XrResult<Vec<ReferenceSpaceType>> {
        let function = loaded(self.fp().enumerate_reference_spaces)?;
        enumerate(ReferenceSpaceType::VIEW, |capacity, count, buffer| unsafe {
            function(session, capacity, count, buffer)
        })
    }

    fn create_reference_space(
        &self,
        session: Session,
        reference_space_type: ReferenceSpaceType,
        pose_in_reference_space: Posef,
    ) -> XrResult<Space> {
        let create_reference_space = loaded(self.fp().create_reference_space)?;
        let create_info = xr_struct!(sys::ReferenceSpaceCreateInfo {
            reference_space_type: reference_space_type,
            pose_in_reference_space: pose_in_reference_space,
        });
        let mut space = Space::NULL;
        cvt(unsafe { create_reference_space(session, &create_info, &mut space) })?;
        Ok(space)
    }

    fn destroy_space(&self, space: Space) -> XrResult<()> {
        let destroy_space = loaded(self.fp().destroy_space)?;
        cvt(unsafe { destroy_space(space) }).map(|_| ())
    }

    fn locate_space(&self, space: Space, base_space: Space, time: Time) -> XrResult<Location> {
        let locate_space = loaded(self.fp().locate_space)?;
        let mut location = xr_struct!(sys::SpaceLocation {});
        cvt(unsafe { locate_space(space, base_space, time, &mut location) })?;
        Ok(Location {
            flags: location.location_flags,
            pose: location.pose,
        })
    }

    fn enumerate_swapchain_formats(&self, session: Session) -> XrResult<Vec<i64>> {
        let function = loaded(self.fp().enumerate_swapchain_formats)?;
        enumerate(0_i64, |capacity, count, buffer| unsafe {
            function(session, capacity, count, buffer)
        })
    }

    fn create_swapchain(
        &self,
        session: Session,
        desc: &SwapchainDesc,
        next: *const c_void,
    ) -> XrResult<Swapchain> {
        let create_swapchain = loaded(self.fp().create_swapchain)?;
        let create_info = xr_struct!(sys::SwapchainCreateInfo {
            next: next,
            usage_flags: desc.usage_flags,
            format: desc.format,
            sample_count: desc.sample_count,
            width: desc.width,
            height: desc.height,
            face_count: desc.face_count,
            array_size: desc.array_size,
            mip_count: desc.mip_count,
        });
        let mut swapchain = Swapchain::NULL;
        cvt(unsafe { create_swapchain(session, &create_info, &mut swapchain) })?;
        Ok(swapchain)
    }

    fn destroy_swapchain(&self, swapchain: Swapchain) -> XrResult<()> {
        let destroy_swapchain = loaded(self.fp().destroy_swapchain)?;
        cvt(unsafe { destroy_swapchain(swapchain) }).map(|_| ())
    }

    fn enumerate_swapchain_images(&self, swapchain: Swapchain) -> XrResult<Vec<u64>> {
        let function = loaded(self.fp().enumerate_swapchain_images)?;
        match self.binding.api {
            GraphicsApi::OpenGL => {
                let images = enumerate(
                    xr_struct!(sys::SwapchainImageOpenGLKHR {}),
                    |capacity, count, buffer| unsafe {
                        function(swapchain, capacity, count, buffer as *mut _)
                    },
                )?;
                Ok(images.iter().map(|i| i.image as u64).collect())
            }
            GraphicsApi::OpenGLES => {
                let images = enumerate(
                    xr_struct!(sys::SwapchainImageOpenGLESKHR {}),
                    |capacity, count, buffer| unsafe {
                        function(swapchain, capacity, count, buffer as *mut _)
                    },
                )?;
                Ok(images.iter().map(|i| i.image as u64).collect())
            }
            GraphicsApi::Vulkan => {
                let images = enumerate(
                    xr_struct!(sys::SwapchainImageVulkanKHR {}),
                    |capacity, count, buffer| unsafe {
                        function(swapchain, capacity, count, buffer as *mut _)
                    },
                )?;
                Ok(images.iter().map(|i| i.image as u64).collect())
            }
            GraphicsApi::D3D | GraphicsApi::Metal => Err(sys::Result::ERROR_FUNCTION_UNSUPPORTED),
        }
    }

    fn acquire_swapchain_image(&self, swapchain: Swapchain) -> XrResult<u32> {
        let acquire = loaded(self.fp().acquire_swapchain_image)?;
        let acquire_info = xr_struct!(sys::SwapchainImageAcquireInfo {});
        let mut index = 0;
        cvt(unsafe { acquire(swapchain, &acquire_info, &mut index) })?;
        Ok(index)
    }

    fn wait_swapchain_image(&self, swapchain: Swapchain, timeout: Duration) -> XrResult<bool> {
        let wait = loaded(self.fp().wait_swapchain_image)?;
        let wait_info = xr_struct!(sys::SwapchainImageWaitInfo { timeout: timeout });
        let result = cvt(unsafe { wait(swapchain, &wait_info) })?;
        Ok(result != sys::Result::TIMEOUT_EXPIRED)
    }

    fn release_swapchain_image(&self, swapchain: Swapchain) -> XrResult<()> {
        let release = loaded(self.fp().release_swapchain_image)?;
        let release_info = xr_struct!(sys::SwapchainImageReleaseInfo {});
        cvt(unsafe { release(swapchain, &release_info) }).map(|_| ())
    }

    fn string_to_path(&self, instance: Instance, path: &str) -> XrResult<Path> {
        let string_to_path = loaded(self.fp().string_to_path)?;
        let path = CString::new(path).map_err(|_| sys::Result::ERROR_PATH_FORMAT_INVALID)?;
        let mut out = Path::NULL;
        cvt(unsafe { string_to_path(instance, path.as_ptr(), &mut out) })?;
        Ok(out)
    }

    fn path_to_string(&self, instance: Instance, path: Path) -> XrResult<String> {
        let function = loaded(self.fp().path_to_string)?;
        let chars = enumerate(0 as c_char, |capacity, count, buffer| unsafe {
            function(instance, path, capacity, count, buffer)
        })?;
        Ok(read_cstr(&chars))
    }

    fn create_action_set(
        &self,
        instance: Instance,
        name: &str,
        localized_name: &str,
        priority: u32,
    ) -> XrResult<ActionSet> {
        let create_action_set = loaded(self.fp().create_action_set)?;
        let mut create_info = xr_struct!(sys::ActionSetCreateInfo { priority: priority });
        place_cstr(&mut create_info.action_set_name, name);
        place_cstr(&mut create_info.localized_action_set_name, localized_name);
        let mut action_set = ActionSet::NULL;
        cvt(unsafe { create_action_set(instance, &create_info, &mut action_set) })?;
        Ok(action_set)
    }

    fn destroy_action_set(&self, action_set: ActionSet) -> XrResult<()> {
        let destroy_action_set = loaded(self.fp().destroy_action_set)?;
        cvt(unsafe { destroy_action_set(action_set) }).map(|_| ())
    }

    fn create_action(
        &self,
        action_set: ActionSet,
        name: &str,
        localized_name: &str,
        action_type: ActionType,
        subaction_paths: &[Path],
    ) -> XrResult<Action> {
        let create_action = loaded(self.fp().create_action)?;
        let mut create_info = xr_struct!(sys::ActionCreateInfo {
            action_type: action_type,
            count_subaction_paths: subaction_paths.len() as u32,
            subaction_paths: subaction_paths.as_ptr(),
        });
        place_cstr(&mut create_info.action_name, name);
        place_cstr(&mut create_info.localized_action_name, localized_name);
        let mut action = Action::NULL;
        cvt(unsafe { create_action(action_set, &create_info, &mut action) })?;
        Ok(action)
    }

    fn destroy_action(&self, action: Action) -> XrResult<()> {
        let destroy_action = loaded(self.fp().destroy_action)?;
        cvt(unsafe { destroy_action(action) }).map(|_| ())
    }

    fn suggest_interaction_profile_bindings(
        &self,
        instance: Instance,
        interaction_profile: Path,
        bindings: &[(Action, Path)],
    ) -> XrResult<()> {
        let suggest = loaded(self.fp().suggest_interaction_profile_bindings)?;
        let suggested = bindings
            .iter()
            .map(|(action, binding)| sys::ActionSuggestedBinding {
                action: *action,
                binding: *binding,
            })
            .collect::<Vec<_>>();
        let suggested_bindings = xr_struct!(sys::InteractionProfileSuggestedBinding {
            interaction_profile: interaction_profile,
            count_suggested_bindings: suggested.len() as u32,
            suggested_bindings: suggested.as_ptr(),
        });
        cvt(unsafe { suggest(instance, &suggested_bindings) }).map(|_| ())
    }

    fn attach_session_action_sets(
        &self,
        session: Session,
        action_sets: &[ActionSet],
    ) -> XrResult<()> {
        let attach = loaded(self.fp().attach_session_action_sets)?;
        let attach_info = xr_struct!(sys::SessionActionSetsAttachInfo {
            count_action_sets: action_sets.len() as u32,
            action_sets: action_sets.as_ptr(),
        });
        cvt(unsafe { attach(session, &attach_info) }).map(|_| ())
    }

    fn sync_actions(
        &self,
        session: Session,
        active_action_sets: &[(ActionSet, Path)],
    ) -> XrResult<()> {
        let sync_actions = loaded(self.fp().sync_actions)?;
        let active = active_action_sets
            .iter()
            .map(|(action_set, subaction_path)| sys::ActiveActionSet {
                action_set: *action_set,
                subaction_path: *subaction_path,
            })
            .collect::<Vec<_>>();
        let sync_info = xr_struct!(sys::ActionsSyncInfo {
            count_active_action_sets: active.len() as u32,
            active_action_sets: active.as_ptr(),
        });
        cvt(unsafe { sync_actions(session, &sync_info) }).map(|_| ())
    }

    fn get_action_state_boolean(
        &self,
        session: Session,
        action: Action,
        subaction_path: Path,
    ) -> XrResult<ActionState<bool>> {
        let get_state = loaded(self.fp().get_action_state_boolean)?;
        let get_info = xr_struct!(sys::ActionStateGetInfo {
            action: action,
            subaction_path: subaction_path,
        });
        let mut state = xr_struct!(sys::ActionStateBoolean {});
        cvt(unsafe { get_state(session, &get_info, &mut state) })?;
        Ok(ActionState {
            current_state: state.current_state != sys::FALSE,
            is_active: state.is_active != sys::FALSE,
        })
    }

    fn get_action_state_float(
        &self,
        session: Session,
        action: Action,
        subaction_path: Path,
    ) -> XrResult<ActionState<f32>> {
        let get_state = loaded(self.fp().get_action_state_float)?;
        let get_info = xr_struct!(sys::ActionStateGetInfo {
            action: action,
            subaction_path: subaction_path,
        });
        let mut state = xr_struct!(sys::ActionStateFloat {});
        cvt(unsafe { get_state(session, &get_info, &mut state) })?;
        Ok(ActionState {
            current_state: state.current_state,
            is_active: state.is_active != sys::FALSE,
        })
    }

    fn get_action_state_vector2f(
        &self,
        session: Session,
        action: Action,
        subaction_path: Path,
    ) -> XrResult<ActionState<Vector2f>> {
        let get_state = loaded(self.fp().get_action_state_vector2f)?;
        let get_info = xr_struct!(sys::ActionStateGetInfo {
            action: action,
            subaction_path: subaction_path,
        });
        let mut state = xr_struct!(sys::ActionStateVector2f {});
        cvt(unsafe { get_state(session, &get_info, &mut state) })?;
        Ok(ActionState {
            current_state: state.current_state,
            is_active: state.is_active != sys::FALSE,
        })
    }

    fn get_action_state_pose(
        &self,
        session: Session,
        action: Action,
        subaction_path: Path,
    ) -> XrResult<bool> {
        let get_state = loaded(self.fp().get_action_state_pose)?;
        let get_info = xr_struct!(sys::ActionStateGetInfo {
            action: action,
            subaction_path: subaction_path,
        });
        let mut state = xr_struct!(sys::ActionStatePose {});
        cvt(unsafe { get_state(session, &get_info, &mut state) })?;
        Ok(state.is_active != sys::FALSE)
    }

    fn apply_haptic_feedback(
        &self,
        session: Session,
        action: Action,
        subaction_path: Path,
        duration: Duration,
        frequency: f32,
        amplitude: f32,
    ) -> XrResult<()> {
        let apply = loaded(self.fp().apply_haptic_feedback)?;
        let action_info = xr_struct!(sys::HapticActionInfo {
            action: action,
            subaction_path: subaction_path,
        });
        let vibration = xr_struct!(sys::HapticVibration {
            duration: duration,
            frequency: frequency,
            amplitude: amplitude,
        });
        cvt(unsafe {
            apply(
                session,
                &action_info,
                &vibration as *const sys::HapticVibration as *const sys::HapticBaseHeader,
            )
        })
        .map(|_| ())
    }

    fn create_action_space(
        &self,
        session: Session,
        action: Action,
        subaction_path: Path,
        pose_in_action_space: Posef,
    ) -> XrResult<Space> {
        let create_action_space = loaded(self.fp().create_action_space)?;
        let create_info = xr_struct!(sys::ActionSpaceCreateInfo {
            action: action,
            subaction_path: subaction_path,
            pose_in_action_space: pose_in_action_space,
        });
        let mut space = Space::NULL;
        cvt(unsafe { create_action_space(session, &create_info, &mut space) })?;
        Ok(space)
    }

    fn get_current_interaction_profile(
        &self,
        session: Session,
        top_level_user_path: Path,
    ) -> XrResult<Path> {
        let get_profile = loaded(self.fp().get_current_interaction_profile)?;
        let mut state = xr_struct!(sys::InteractionProfileState {});
        cvt(unsafe { get_profile(session, top_level_user_path, &mut state) })?;
        Ok(state.interaction_profile)
    }

    fn poll_event(&self, instance: Instance) -> XrResult<Option<XrEvent>> {
        let poll_event = loaded(self.fp().poll_event)?;
        let mut buffer = xr_struct!(sys::EventDataBuffer {});
        let result = cvt(unsafe { poll_event(instance, &mut buffer) })?;
        if result == sys::Result::EVENT_UNAVAILABLE {
            return Ok(None);
        }

        // SAFETY: `ty` tells us which event struct the runtime wrote into the buffer
        let event = unsafe { decode_event(&buffer) };
        Ok(Some(event))
    }

    fn wait_frame(&self, session: Session) -> XrResult<FrameTiming> {
        let wait_frame = loaded(self.fp().wait_frame)?;
        let wait_info = xr_struct!(sys::FrameWaitInfo {});
        let mut frame_state = xr_struct!(sys::FrameState {});
        cvt(unsafe { wait_frame(session, &wait_info, &mut frame_state) })?;
        Ok(FrameTiming {
            predicted_display_time: frame_state.predicted_display_time,
            predicted_display_period: frame_state.predicted_display_period,
            should_render: frame_state.should_render != sys::FALSE,
        })
    }

    fn begin_frame(&self, session: Session) -> XrResult<()> {
        let begin_frame = loaded(self.fp().begin_frame)?;
        let begin_info = xr_struct!(sys::FrameBeginInfo {});
        let result = cvt(unsafe { begin_frame(session, &begin_info) })?;
        if result == sys::Result::FRAME_DISCARDED {
            debug!("[OPENXR] Previous frame was discarded");
        }
        Ok(())
    }

    fn end_frame(
        &self,
        session: Session,
        display_time: Time,
        environment_blend_mode: EnvironmentBlendMode,
        layers: &[CompositionLayer<'_>],
    ) -> XrResult<()> {
        let end_frame = loaded(self.fp().end_frame)?;

        // Projection views and layers need stable addresses until xrEndFrame returns.
        let projection_views = layers
            .iter()
            .map(|layer| match layer {
                CompositionLayer::Projection { views, .. } => views
                    .iter()
                    .map(|view| {
                        xr_struct!(sys::CompositionLayerProjectionView {
                            pose: view.pose,
                            fov: view.fov,
                            sub_image: sys::SwapchainSubImage {
                                swapchain: view.swapchain,
                                image_rect: sys::Rect2Di {
                                    offset: sys::Offset2Di { x: 0, y: 0 },
                                    extent: sys::Extent2Di {
                                        width: view.extent.0,
                                        height: view.extent.1,
                                    },
                                },
                                image_array_index: view.image_array_index,
                            },
                        })
                    })
                    .collect::<Vec<_>>(),
                CompositionLayer::Raw(_) => Vec::new(),
            })
            .collect::<Vec<_>>();

        let projections = layers
            .iter()
            .zip(projection_views.iter())
            .map(|(layer, views)| match layer {
                CompositionLayer::Projection { space, .. } => {
                    Some(xr_struct!(sys::CompositionLayerProjection {
                        space: *space,
                        view_count: views.len() as u32,
                        views: views.as_ptr(),
                    }))
                }
                CompositionLayer::Raw(_) => None,
            })
            .collect::<Vec<_>>();

        let headers = layers
            .iter()
            .zip(projections.iter())
            .filter_map(|(layer, projection)| match layer {
                CompositionLayer::Raw(header) => Some(*header),
                CompositionLayer::Projection { .. } => projection.as_ref().map(|p| {
                    p as *const sys::CompositionLayerProjection as *const sys::CompositionLayerBaseHeader
                }),
            })
            .filter(|header| !header.is_null())
            .collect::<Vec<_>>();

        let end_info = xr_struct!(sys::FrameEndInfo {
            display_time: display_time,
            environment_blend_mode: environment_blend_mode,
            layer_count: headers.len() as u32,
            layers: headers.as_ptr(),
        });
        cvt(unsafe { end_frame(session, &end_info) }).map(|_| ())
    }

    fn locate_views(
        &self,
        session: Session,
        view_configuration_type: ViewConfigurationType,
        display_time: Time,
        space: Space,
    ) -> XrResult<(ViewStateFlags, Vec<ViewPose>)> {
        let locate_views = loaded(self.fp().locate_views)?;
        let locate_info = xr_struct!(sys::ViewLocateInfo {
            view_configuration_type: view_configuration_type,
            display_time: display_time,
            space: space,
        });
        let mut view_state = xr_struct!(sys::ViewState {});
        let views = enumerate(xr_struct!(sys::View {}), |capacity, count, buffer| unsafe {
            locate_views(session, &locate_info, &mut view_state, capacity, count, buffer)
        })?;
        let views = views
            .iter()
            .map(|v| ViewPose {
                pose: v.pose,
                fov: v.fov,
            })
            .collect();
        Ok((view_state.view_state_flags, views))
    }
}

unsafe fn decode_event(buffer: &sys::EventDataBuffer) -> XrEvent {
    let raw = buffer as *const sys::EventDataBuffer;
    match buffer.ty {
        sys::StructureType::EVENT_DATA_EVENTS_LOST => {
            let event = &*(raw as *const sys::EventDataEventsLost);
            XrEvent::EventsLost {
                lost_event_count: event.lost_event_count,
            }
        }
        sys::StructureType::EVENT_DATA_INSTANCE_LOSS_PENDING => {
            let event = &*(raw as *const sys::EventDataInstanceLossPending);
            XrEvent::InstanceLossPending {
                loss_time: event.loss_time,
            }
        }
        sys::StructureType::EVENT_DATA_SESSION_STATE_CHANGED => {
            let event = &*(raw as *const sys::EventDataSessionStateChanged);
            XrEvent::SessionStateChanged {
                session: event.session,
                state: event.state,
                time: event.time,
            }
        }
        sys::StructureType::EVENT_DATA_REFERENCE_SPACE_CHANGE_PENDING => {
            let event = &*(raw as *const sys::EventDataReferenceSpaceChangePending);
            XrEvent::ReferenceSpaceChangePending {
                reference_space_type: event.reference_space_type,
            }
        }
        sys::StructureType::EVENT_DATA_INTERACTION_PROFILE_CHANGED => {
            let event = &*(raw as *const sys::EventDataInteractionProfileChanged);
            XrEvent::InteractionProfileChanged {
                session: event.session,
            }
        }
        sys::StructureType::EVENT_DATA_VISIBILITY_MASK_CHANGED_KHR => {
            let event = &*(raw as *const sys::EventDataVisibilityMaskChangedKHR);
            XrEvent::VisibilityMaskChanged {
                view_index: event.view_index,
            }
        }
        sys::StructureType::EVENT_DATA_PERF_SETTINGS_EXT => {
            let event = &*(raw as *const sys::EventDataPerfSettingsEXT);
            XrEvent::PerfSettings {
                domain: event.domain,
                sub_domain: event.sub_domain,
                from_level: event.from_level,
                to_level: event.to_level,
            }
        }
        sys::StructureType::EVENT_DATA_DISPLAY_REFRESH_RATE_CHANGED_FB => {
            let event = &*(raw as *const sys::EventDataDisplayRefreshRateChangedFB);
            XrEvent::DisplayRefreshRateChanged {
                from: event.from_display_refresh_rate,
                to: event.to_display_refresh_rate,
            }
        }
        sys::StructureType::EVENT_DATA_VIVE_TRACKER_CONNECTED_HTCX => {
            let event = &*(raw as *const sys::EventDataViveTrackerConnectedHTCX);
            match event.paths.as_ref() {
                Some(paths) => XrEvent::ViveTrackerConnected {
                    persistent_path: paths.persistent_path,
                    role_path: paths.role_path,
                },
                None => {
                    warn!("[OPENXR] Vive tracker connected without paths");
                    XrEvent::Other(buffer.ty)
                }
            }
        }
        other => XrEvent::Other(other),
    }
}
