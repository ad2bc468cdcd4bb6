use std::{cell::RefCell, rc::Rc};

use log::{error, info, warn};
use openxr::sys::{Instance, Session, SessionState, Space, SystemId, Time};

use crate::{
    actions::{ActionSet, DefaultActions, InputMap},
    extensions::{CompositionLayerProvider, ExtensionWrapper, SessionContext},
    interface::EngineHost,
    runtime::{FrameTiming, ProjectionView, RecommendedView, SystemInfo, ViewPose, XrRuntime},
    BridgeError, BridgeResult,
};

mod config;
mod frame;
mod lifecycle;
mod swapchain;

pub use config::{OpenXrApiBuilder, PlaySpace, SessionConfig};
pub use swapchain::{eye_swapchain_desc, select_swapchain_format, Swapchain};

/// Owns an OpenXR instance and session and drives the per frame protocol for the host.
///
/// Bring-up happens in [`OpenXrApi::initialize`]. After that the host calls, once per frame:
/// [`OpenXrApi::process_openxr`], then [`OpenXrApi::render_openxr`] for eye 0 and eye 1. The
/// session state only ever changes in response to events polled from the runtime.
pub struct OpenXrApi {
    runtime: Rc<dyn XrRuntime>,
    config: SessionConfig,
    host: Option<Rc<dyn EngineHost>>,
    wrappers: Vec<Rc<RefCell<dyn ExtensionWrapper>>>,
    layer_providers: Vec<Rc<RefCell<dyn CompositionLayerProvider>>>,

    instance: Instance,
    system_id: SystemId,
    session: Session,
    play_space: Space,
    view_space: Space,
    enabled_extensions: Vec<String>,
    system_info: SystemInfo,
    recommended_views: Vec<RecommendedView>,
    swapchains: Vec<Swapchain>,
    action_sets: Vec<ActionSet>,
    default_actions: DefaultActions,
    input_maps: Vec<InputMap>,

    initialised: bool,
    running: bool,
    state: SessionState,
    frame_timing: FrameTiming,
    frame_begun: bool,
    frame_layer_ok: bool,
    views: Vec<ViewPose>,
    projection_views: Vec<ProjectionView>,
    views_located: bool,
    view_pose_valid: bool,
    head_pose_valid: bool,
}

impl OpenXrApi {
    /// An uninitialised session manager
    pub fn new(runtime: Rc<dyn XrRuntime>, config: SessionConfig) -> Self {
        Self {
            runtime,
            config,
            host: None,
            wrappers: Vec::new(),
            layer_providers: Vec::new(),
            instance: Instance::NULL,
            system_id: SystemId::from_raw(0),
            session: Session::NULL,
            play_space: Space::NULL,
            view_space: Space::NULL,
            enabled_extensions: Vec::new(),
            system_info: Default::default(),
            recommended_views: Vec::new(),
            swapchains: Vec::new(),
            action_sets: Vec::new(),
            default_actions: Default::default(),
            input_maps: Vec::new(),
            initialised: false,
            running: false,
            state: SessionState::UNKNOWN,
            frame_timing: Default::default(),
            frame_begun: false,
            frame_layer_ok: false,
            views: Vec::new(),
            projection_views: Vec::new(),
            views_located: false,
            view_pose_valid: true,
            head_pose_valid: true,
        }
    }

    /// A builder with the default config
    pub fn builder() -> OpenXrApiBuilder {
        OpenXrApiBuilder::new()
    }

    /// The runtime everything goes through
    pub fn runtime(&self) -> &Rc<dyn XrRuntime> {
        &self.runtime
    }

    /// The config bring-up will use
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Has bring-up completed?
    pub fn is_initialised(&self) -> bool {
        self.initialised
    }

    /// Has the session been begun and not yet ended?
    pub fn is_running(&self) -> bool {
        self.running
    }

    /// The last session state the runtime told us about
    pub fn get_state(&self) -> SessionState {
        self.state
    }

    /// The OpenXR instance, `NULL` before bring-up
    pub fn instance(&self) -> Instance {
        self.instance
    }

    /// The OpenXR session, `NULL` before bring-up
    pub fn session(&self) -> Session {
        self.session
    }

    /// The space poses are reported in
    pub fn play_space(&self) -> Space {
        self.play_space
    }

    /// What the runtime calls this system, empty before bring-up
    pub fn get_system_name(&self) -> &str {
        &self.system_info.system_name
    }

    /// Every extension the instance was created with
    pub fn get_enabled_extensions(&self) -> &[String] {
        &self.enabled_extensions
    }

    /// When the current frame is expected to be displayed; zero before the first frame
    pub fn get_predicted_display_time(&self) -> Time {
        self.frame_timing.predicted_display_time
    }

    /// When the frame after the current one is expected to be displayed
    pub fn get_next_frame_time(&self) -> Time {
        Time::from_nanos(
            self.frame_timing.predicted_display_time.as_nanos()
                + self.frame_timing.predicted_display_period.as_nanos(),
        )
    }

    /// Per eye render target size, `(0, 0)` before bring-up
    pub fn recommended_render_target_size(&self) -> (u32, u32) {
        match self.recommended_views.first() {
            Some(view) if self.initialised => {
                let multiplier = self.config.render_target_size_multiplier;
                (
                    (view.recommended_width as f32 * multiplier) as u32,
                    (view.recommended_height as f32 * multiplier) as u32,
                )
            }
            _ => (0, 0),
        }
    }

    /// One swapchain per eye
    pub fn swapchains(&self) -> &[Swapchain] {
        &self.swapchains
    }

    /// Raw handles of the eye swapchains
    pub fn swapchain_handles(&self) -> Vec<openxr::sys::Swapchain> {
        self.swapchains.iter().map(|s| s.handle()).collect()
    }

    /// The action sets created from the config
    pub fn action_sets(&self) -> &[ActionSet] {
        &self.action_sets
    }

    /// Find an action set by name
    pub fn get_action_set_mut(&mut self, name: &str) -> Option<&mut ActionSet> {
        self.action_sets.iter_mut().find(|s| s.name() == name)
    }

    /// The top level paths being polled, and the controllers they drive
    pub fn input_maps(&self) -> &[InputMap] {
        &self.input_maps
    }

    /// The last located views, in the play space
    pub fn views(&self) -> &[ViewPose] {
        &self.views
    }

    /// 1 for a head mounted display, 2 for a handheld device
    pub fn get_form_factor(&self) -> i32 {
        self.config.form_factor
    }

    /// Change the form factor. Refused once initialised.
    pub fn set_form_factor(&mut self, form_factor: i32) -> bool {
        if !self.allow_config_change("form factor") {
            return false;
        }
        self.config.form_factor = form_factor;
        true
    }

    /// The declarative action sets
    pub fn get_action_sets_text(&self) -> &str {
        &self.config.action_sets_text
    }

    /// Replace the declarative action sets. Refused once initialised.
    pub fn set_action_sets_text(&mut self, text: &str) -> bool {
        if !self.allow_config_change("action sets") {
            return false;
        }
        self.config.action_sets_text = text.to_string();
        true
    }

    /// The declarative binding suggestions
    pub fn get_interaction_profiles_text(&self) -> &str {
        &self.config.interaction_profiles_text
    }

    /// Replace the declarative binding suggestions. Refused once initialised.
    pub fn set_interaction_profiles_text(&mut self, text: &str) -> bool {
        if !self.allow_config_change("interaction profiles") {
            return false;
        }
        self.config.interaction_profiles_text = text.to_string();
        true
    }

    /// Scales the recommended eye resolution
    pub fn get_render_target_size_multiplier(&self) -> f32 {
        self.config.render_target_size_multiplier
    }

    /// Change the resolution multiplier. Refused once initialised, as the swapchains already exist.
    pub fn set_render_target_size_multiplier(&mut self, multiplier: f32) -> bool {
        if !self.allow_config_change("render target size multiplier") {
            return false;
        }
        if multiplier <= 0. {
            warn!("[OPENXR] Ignoring render target size multiplier {multiplier}");
            return false;
        }
        self.config.render_target_size_multiplier = multiplier;
        true
    }

    /// Render into RGBA8 instead of sRGB swapchains
    pub fn set_keep_3d_linear(&mut self, keep_3d_linear: bool) -> bool {
        if !self.allow_config_change("colour format") {
            return false;
        }
        self.config.keep_3d_linear = keep_3d_linear;
        true
    }

    fn ensure_not_initialised(&self) -> BridgeResult<()> {
        if self.initialised {
            return Err(BridgeError::AlreadyInitialised);
        }
        Ok(())
    }

    fn allow_config_change(&self, what: &str) -> bool {
        match self.ensure_not_initialised() {
            Ok(()) => true,
            Err(e) => {
                error!("[OPENXR] Can't change the {what}: {e}");
                false
            }
        }
    }

    /// Set (or clear) the engine the input and texture copies go to
    pub fn set_host(&mut self, host: Option<Rc<dyn EngineHost>>) {
        self.host = host;
    }

    /// Add a wrapper. Its hooks are called after those of every wrapper registered before it.
    pub fn register_extension_wrapper(&mut self, wrapper: Rc<RefCell<dyn ExtensionWrapper>>) {
        if self.wrappers.iter().any(|w| same_object(w, &wrapper)) {
            return;
        }
        if self.initialised {
            warn!(
                "[OPENXR] Wrapper {} registered after initialisation, its extensions won't be enabled",
                wrapper.borrow().name()
            );
        }
        self.wrappers.push(wrapper);
    }

    /// Remove a wrapper added with [`Self::register_extension_wrapper`]
    pub fn unregister_extension_wrapper(&mut self, wrapper: &Rc<RefCell<dyn ExtensionWrapper>>) {
        self.wrappers.retain(|w| !same_object(w, wrapper));
    }

    /// Add a source of extra composition layers. Layers are submitted in registration order,
    /// underneath the projection layer.
    pub fn register_composition_layer_provider(&mut self, provider: Rc<RefCell<dyn CompositionLayerProvider>>) {
        if !self.layer_providers.iter().any(|p| same_object(p, &provider)) {
            self.layer_providers.push(provider);
        }
    }

    /// Remove a provider added with [`Self::register_composition_layer_provider`]
    pub fn unregister_composition_layer_provider(&mut self, provider: &Rc<RefCell<dyn CompositionLayerProvider>>) {
        self.layer_providers.retain(|p| !same_object(p, provider));
    }

    /// How many wrappers are registered
    pub fn wrapper_count(&self) -> usize {
        self.wrappers.len()
    }

    /// Build the context handed to wrappers and actions. Borrows nothing but `runtime`, so it can
    /// live alongside mutable borrows of `self`.
    pub(crate) fn context<'a>(&self, runtime: &'a Rc<dyn XrRuntime>) -> SessionContext<'a> {
        SessionContext {
            runtime,
            instance: self.instance,
            system_id: self.system_id,
            session: self.session,
            play_space: self.play_space,
            predicted_display_time: self.frame_timing.predicted_display_time,
            next_frame_time: self.get_next_frame_time(),
            state: self.state,
        }
    }

    /// Call `hook` on every wrapper, in registration order
    fn notify_wrappers(&self, hook: impl Fn(&mut dyn ExtensionWrapper, &SessionContext<'_>)) {
        let runtime = self.runtime.clone();
        let context = self.context(&runtime);
        for wrapper in &self.wrappers {
            hook(&mut *wrapper.borrow_mut(), &context);
        }
    }
}

impl Drop for OpenXrApi {
    fn drop(&mut self) {
        if self.instance != Instance::NULL {
            info!("[OPENXR] Session manager dropped while initialised, tearing down");
        }
        self.uninitialize();
    }
}

fn same_object<T: ?Sized>(a: &Rc<RefCell<T>>, b: &Rc<RefCell<T>>) -> bool {
    Rc::as_ptr(a) as *const () == Rc::as_ptr(b) as *const ()
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::{extensions::BuiltinExtensions, runtime::mock::MockRuntime};
    use test_support::api_with;

    #[test]
    pub fn test_config_changes_refused_once_initialised() {
        let (_, _, mut api) = api_with(MockRuntime::default());
        assert!(api.set_form_factor(2));
        assert!(api.set_action_sets_text("[]"));
        assert!(!api.set_render_target_size_multiplier(0.));
        assert!(api.set_render_target_size_multiplier(1.5));
        assert_eq!(api.recommended_render_target_size(), (0, 0));

        assert!(api.ensure_not_initialised().is_ok());
        assert!(api.initialize());
        assert_eq!(api.recommended_render_target_size(), (2160, 2400));
        assert!(matches!(
            api.ensure_not_initialised(),
            Err(BridgeError::AlreadyInitialised)
        ));
        assert!(!api.set_form_factor(1));
        assert!(!api.set_interaction_profiles_text("[]"));
        assert!(!api.set_render_target_size_multiplier(1.));
        assert_eq!(api.get_form_factor(), 2);
        assert_eq!(api.get_action_sets_text(), "[]");
    }

    #[test]
    pub fn test_wrapper_registration() {
        let (_, _, mut api) = api_with(MockRuntime::default());
        let builtin = BuiltinExtensions::default();
        for wrapper in builtin.wrappers() {
            api.register_extension_wrapper(wrapper);
        }
        // Registering the same wrapper twice is a no-op
        api.register_extension_wrapper(builtin.overlay.clone());
        assert_eq!(api.wrapper_count(), 10);

        let overlay: Rc<RefCell<dyn ExtensionWrapper>> = builtin.overlay.clone();
        api.unregister_extension_wrapper(&overlay);
        assert_eq!(api.wrapper_count(), 9);
    }
}
