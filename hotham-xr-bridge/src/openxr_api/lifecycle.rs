use std::ptr;

use anyhow::anyhow;
use log::{debug, error, info, warn};
use openxr::sys::{self, Posef, ReferenceSpaceType, SessionState, Version};

use super::{eye_swapchain_desc, select_swapchain_format, OpenXrApi, Swapchain};
use crate::{
    actions::{
        attach_action_sets, create_action_sets, parse_action_sets, parse_interaction_profiles,
        suggest_interaction_profiles, DefaultActions, InputMap,
    },
    runtime::{xr_check, ProjectionView, ViewPose, XrEvent, XrResult},
    BridgeError, BridgeResult,
};

impl OpenXrApi {
    /// Bring up the instance, session, spaces, swapchains and actions.
    ///
    /// Does nothing if already initialised. On failure everything created so far is destroyed again
    /// and `false` is returned. The session is begun later, once the runtime reports READY.
    pub fn initialize(&mut self) -> bool {
        if self.initialised {
            return true;
        }

        info!("[OPENXR] Initialising..");
        match self.bring_up() {
            Ok(()) => {
                self.initialised = true;
                info!("[OPENXR] ..done!");
                true
            }
            Err(e) => {
                error!("[OPENXR] Failed to initialise: {e}");
                self.teardown();
                false
            }
        }
    }

    /// Destroy everything [`Self::initialize`] created. Safe to call more than once.
    pub fn uninitialize(&mut self) {
        if self.instance == sys::Instance::NULL {
            return;
        }

        info!("[OPENXR] Shutting down..");
        self.teardown();
        info!("[OPENXR] ..done!");
    }

    fn bring_up(&mut self) -> BridgeResult<()> {
        self.create_instance()?;
        self.query_system()?;
        self.create_session()?;
        self.create_spaces()?;
        self.create_swapchains()?;
        self.create_actions()
    }

    fn step<T>(&self, result: XrResult<T>, action: &str) -> BridgeResult<T> {
        result.map_err(|e| {
            error!(
                "[OPENXR] {action} failed: {}",
                self.runtime.result_to_string(self.instance, e)
            );
            e.into()
        })
    }

    fn create_instance(&mut self) -> BridgeResult<()> {
        let available = self.step(
            self.runtime.enumerate_instance_extension_properties(),
            "Enumerating instance extensions",
        )?;

        let graphics_extension = self.runtime.graphics_extension_name();
        if !available.iter().any(|e| e == graphics_extension) {
            error!("[OPENXR] The runtime doesn't support {graphics_extension}");
            return Err(BridgeError::MissingExtension(graphics_extension.to_string()));
        }

        let mut requested = vec![graphics_extension];
        for wrapper in &self.wrappers {
            let wrapper = wrapper.borrow();
            for name in wrapper.requested_extensions().names() {
                if requested.contains(&name) {
                    continue;
                }
                if available.iter().any(|e| e == name) {
                    requested.push(name);
                } else {
                    debug!("[OPENXR] {name} requested by {} is not available", wrapper.name());
                }
            }
        }

        self.instance = self.step(
            self.runtime.create_instance(
                &self.config.application_name,
                self.config.application_version,
                &requested,
            ),
            "Creating instance",
        )?;
        self.enabled_extensions = requested.iter().map(|e| e.to_string()).collect();
        info!("[OPENXR] Instance created with {:?}", self.enabled_extensions);

        for wrapper in &self.wrappers {
            wrapper
                .borrow_mut()
                .requested_extensions_mut()
                .write_back(&self.enabled_extensions);
        }
        self.notify_wrappers(|w, c| w.on_instance_initialized(c));
        Ok(())
    }

    fn query_system(&mut self) -> BridgeResult<()> {
        let form_factor = self.config.form_factor()?;
        self.system_id = self.step(
            self.runtime.get_system(self.instance, form_factor),
            "Getting system",
        )?;

        let mut next = ptr::null_mut();
        for wrapper in &self.wrappers {
            next = wrapper.borrow_mut().chain_system_properties(next);
        }
        self.system_info = self.step(
            self.runtime
                .get_system_properties(self.instance, self.system_id, next),
            "Getting system properties",
        )?;
        info!(
            "[OPENXR] Running on {} (vendor {})",
            self.system_info.system_name, self.system_info.vendor_id
        );

        let view_type = self.config.view_configuration_type();
        let view_configurations = self.step(
            self.runtime
                .enumerate_view_configurations(self.instance, self.system_id),
            "Enumerating view configurations",
        )?;
        if !view_configurations.contains(&view_type) {
            error!("[OPENXR] View configuration {view_type:?} is not supported");
            return Err(BridgeError::UnsupportedViewConfiguration);
        }
        self.recommended_views = self.step(
            self.runtime
                .enumerate_view_configuration_views(self.instance, self.system_id, view_type),
            "Enumerating view configuration views",
        )?;
        if self.recommended_views.is_empty() {
            return Err(BridgeError::UnsupportedViewConfiguration);
        }

        let (min, max) = self.step(
            self.runtime.graphics_requirements(self.instance, self.system_id),
            "Getting graphics requirements",
        )?;
        let (major, minor) = self.config.graphics_api_version;
        let desired = Version::new(major, minor, 0).into_raw();
        if desired < min.into_raw() || desired > max.into_raw() {
            warn!(
                "[OPENXR] The runtime only supports {:?} {}.{} to {}.{}, we are using {major}.{minor}",
                self.runtime.graphics_api(),
                min.major(),
                min.minor(),
                max.major(),
                max.minor()
            );
        }

        Ok(())
    }

    fn create_session(&mut self) -> BridgeResult<()> {
        self.session = self.step(
            self.runtime.create_session(self.instance, self.system_id),
            "Creating session",
        )?;
        info!("[OPENXR] Session created");
        self.notify_wrappers(|w, c| w.on_session_initialized(c));
        Ok(())
    }

    fn create_spaces(&mut self) -> BridgeResult<()> {
        let supported = self.step(
            self.runtime.enumerate_reference_spaces(self.session),
            "Enumerating reference spaces",
        )?;

        let mut play_space_type = self.config.play_space_type.reference_space_type();
        if !supported.contains(&play_space_type) {
            warn!("[OPENXR] {play_space_type:?} space is not supported, falling back to LOCAL");
            play_space_type = ReferenceSpaceType::LOCAL;
        }

        self.play_space = self.step(
            self.runtime
                .create_reference_space(self.session, play_space_type, Posef::IDENTITY),
            "Creating play space",
        )?;
        self.view_space = self.step(
            self.runtime
                .create_reference_space(self.session, ReferenceSpaceType::VIEW, Posef::IDENTITY),
            "Creating view space",
        )?;
        Ok(())
    }

    fn create_swapchains(&mut self) -> BridgeResult<()> {
        let formats = self.step(
            self.runtime.enumerate_swapchain_formats(self.session),
            "Enumerating swapchain formats",
        )?;
        let format = select_swapchain_format(
            self.runtime.graphics_api(),
            &formats,
            self.config.keep_3d_linear,
        )
        .ok_or_else(|| anyhow!("The runtime offers no swapchain formats"))?;
        info!("[OPENXR] Using swapchain format {format:#x}");

        let descs = self
            .recommended_views
            .iter()
            .map(|view| eye_swapchain_desc(view, format, self.config.render_target_size_multiplier))
            .collect::<Vec<_>>();

        for desc in descs {
            let mut next = ptr::null();
            for wrapper in &self.wrappers {
                next = wrapper.borrow_mut().chain_swapchain_create_info(next);
            }

            let swapchain = self.step(
                Swapchain::create(self.runtime.as_ref(), self.session, &desc, next),
                "Creating swapchain",
            )?;
            self.projection_views.push(ProjectionView {
                pose: Posef::IDENTITY,
                fov: ViewPose::default().fov,
                swapchain: swapchain.handle(),
                extent: (desc.width as i32, desc.height as i32),
                image_array_index: 0,
            });
            self.swapchains.push(swapchain);
        }

        debug!(
            "[OPENXR] Created {} swapchains of {}x{}",
            self.swapchains.len(),
            self.swapchains[0].width(),
            self.swapchains[0].height()
        );
        Ok(())
    }

    fn create_actions(&mut self) -> BridgeResult<()> {
        let action_set_configs = parse_action_sets(&self.config.action_sets_text)?;
        let profile_configs = parse_interaction_profiles(&self.config.interaction_profiles_text)?;

        let runtime = self.runtime.clone();
        let context = self.context(&runtime);
        self.action_sets = create_action_sets(&context, &action_set_configs)?;

        let wrappers = &self.wrappers;
        suggest_interaction_profiles(&context, &profile_configs, &self.action_sets, |path| {
            wrappers.iter().all(|w| w.borrow().path_is_supported(path))
        });
        attach_action_sets(runtime.as_ref(), self.session, &mut self.action_sets)?;
        self.default_actions = DefaultActions::locate(&self.action_sets);

        let extra_paths = self
            .wrappers
            .iter()
            .flat_map(|w| w.borrow().input_paths())
            .collect::<Vec<_>>();
        self.input_maps = InputMap::defaults(extra_paths);
        for input_map in self.input_maps.iter_mut() {
            input_map.bind(&context);
        }

        info!(
            "[OPENXR] Attached {} action sets, polling {} top level paths",
            self.action_sets.len(),
            self.input_maps.len()
        );
        Ok(())
    }

    /// Destroy whatever exists, newest first
    fn teardown(&mut self) {
        let runtime = self.runtime.clone();
        let runtime = runtime.as_ref();

        if self.running {
            if let Err(e) = runtime.end_session(self.session) {
                warn!("[OPENXR] Failed to end session: {e}");
            }
        }
        self.running = false;

        let host = self.host.clone();
        for input_map in self.input_maps.iter_mut() {
            input_map.unbind(host.as_deref());
        }
        self.input_maps.clear();

        for action_set in self.action_sets.iter_mut() {
            action_set.destroy(runtime);
        }
        self.action_sets.clear();
        self.default_actions.clear();

        for swapchain in self.swapchains.iter_mut() {
            swapchain.destroy(runtime);
        }
        self.swapchains.clear();
        self.projection_views.clear();

        for space in [&mut self.view_space, &mut self.play_space] {
            if *space != sys::Space::NULL {
                if let Err(e) = runtime.destroy_space(*space) {
                    warn!("[OPENXR] Failed to destroy space: {e}");
                }
                *space = sys::Space::NULL;
            }
        }

        if self.session != sys::Session::NULL {
            self.notify_wrappers(|w, c| w.on_session_destroyed(c));
            if let Err(e) = runtime.destroy_session(self.session) {
                warn!("[OPENXR] Failed to destroy session: {e}");
            }
            self.session = sys::Session::NULL;
        }

        if self.instance != sys::Instance::NULL {
            for wrapper in &self.wrappers {
                wrapper.borrow_mut().on_instance_destroyed();
            }
            if let Err(e) = runtime.destroy_instance(self.instance) {
                warn!("[OPENXR] Failed to destroy instance: {e}");
            }
            self.instance = sys::Instance::NULL;
        }
        for wrapper in &self.wrappers {
            wrapper.borrow_mut().requested_extensions_mut().clear();
        }

        self.system_id = sys::SystemId::from_raw(0);
        self.enabled_extensions.clear();
        self.system_info = Default::default();
        self.recommended_views.clear();
        self.initialised = false;
        self.state = SessionState::UNKNOWN;
        self.frame_timing = Default::default();
        self.frame_begun = false;
        self.views.clear();
        self.views_located = false;
        self.view_pose_valid = true;
        self.head_pose_valid = true;
    }

    /// Drain the event queue, offering every event to every wrapper first.
    ///
    /// Returns `false` if the instance is about to be lost and the frame must not go ahead.
    pub(super) fn poll_events(&mut self) -> bool {
        loop {
            let result = self.runtime.poll_event(self.instance);
            let Some(Some(event)) = xr_check(self.runtime.as_ref(), self.instance, result, "Polling events")
            else {
                return true;
            };

            let mut handled = false;
            {
                let runtime = self.runtime.clone();
                let context = self.context(&runtime);
                for wrapper in &self.wrappers {
                    handled |= wrapper.borrow_mut().on_event_polled(&context, &event);
                }
            }

            match event {
                XrEvent::EventsLost { lost_event_count } => {
                    warn!("[OPENXR] {lost_event_count} events were lost")
                }
                XrEvent::InstanceLossPending { loss_time } => {
                    warn!("[OPENXR] Instance will be lost at {}", loss_time.as_nanos());
                    self.running = false;
                    return false;
                }
                XrEvent::SessionStateChanged { session, state, .. } if session == self.session => {
                    self.on_state_changed(state);
                }
                XrEvent::ReferenceSpaceChangePending {
                    reference_space_type,
                } => info!("[OPENXR] {reference_space_type:?} space is about to change"),
                XrEvent::InteractionProfileChanged { .. } => self.refresh_interaction_profiles(),
                XrEvent::VisibilityMaskChanged { view_index } => {
                    debug!("[OPENXR] Visibility mask of view {view_index} changed")
                }
                _ if !handled => warn!("[OPENXR] Unhandled event {event:?}"),
                _ => {}
            }
        }
    }

    fn on_state_changed(&mut self, state: SessionState) {
        info!("[OPENXR] State changed from {:?} to {state:?}", self.state);
        self.state = state;

        match state {
            SessionState::IDLE => self.notify_wrappers(|w, c| w.on_state_idle(c)),
            SessionState::READY => {
                let result = self
                    .runtime
                    .begin_session(self.session, self.config.view_configuration_type());
                if xr_check(self.runtime.as_ref(), self.instance, result, "Beginning session").is_some() {
                    info!("[OPENXR] Session begun");
                    self.running = true;
                }
                self.notify_wrappers(|w, c| w.on_state_ready(c));
            }
            SessionState::SYNCHRONIZED => self.notify_wrappers(|w, c| w.on_state_synchronized(c)),
            SessionState::VISIBLE => self.notify_wrappers(|w, c| w.on_state_visible(c)),
            SessionState::FOCUSED => self.notify_wrappers(|w, c| w.on_state_focused(c)),
            SessionState::STOPPING => {
                if self.running {
                    let result = self.runtime.end_session(self.session);
                    if xr_check(self.runtime.as_ref(), self.instance, result, "Ending session").is_some() {
                        info!("[OPENXR] Session ended");
                    }
                    self.running = false;
                }
                self.frame_begun = false;
                let host = self.host.clone();
                for input_map in self.input_maps.iter_mut() {
                    input_map.release_controller(host.as_deref());
                }
                self.notify_wrappers(|w, c| w.on_state_stopping(c));
            }
            SessionState::LOSS_PENDING => {
                self.running = false;
                self.notify_wrappers(|w, c| w.on_state_loss_pending(c));
            }
            SessionState::EXITING => {
                self.running = false;
                self.notify_wrappers(|w, c| w.on_state_exiting(c));
            }
            _ => {}
        }
    }

    fn refresh_interaction_profiles(&mut self) {
        let runtime = self.runtime.clone();
        let context = self.context(&runtime);
        for input_map in self.input_maps.iter_mut() {
            input_map.refresh_interaction_profile(&context);
        }
    }
}

#[cfg(test)]
mod tests {
    use openxr::sys::ViewConfigurationType;

    use super::super::test_support::{api, api_with};
    use super::*;
    use crate::{
        extensions::BuiltinExtensions,
        runtime::mock::{MockRuntime, GL_RGBA8, GL_SRGB8_ALPHA8, MOCK_GRAPHICS_EXTENSION},
    };

    #[test]
    pub fn test_initialize_brings_everything_up() {
        let (mock, _, mut api) = api();
        assert!(api.initialize());

        assert!(api.is_initialised());
        assert!(!api.is_running());
        assert_eq!(api.get_state(), SessionState::UNKNOWN);
        assert_eq!(mock.live_handles(), (1, 1, 2, 2));
        assert_eq!(*mock.enabled_extensions.borrow(), vec![MOCK_GRAPHICS_EXTENSION]);
        assert_eq!(api.get_system_name(), "Mock HMD");
        assert_eq!(api.recommended_render_target_size(), (1440, 1600));

        let descs = mock.swapchain_descs.borrow();
        assert_eq!(descs.len(), 2);
        assert_eq!(descs[0].format, GL_SRGB8_ALPHA8);
        assert_eq!((descs[0].width, descs[0].height), (1440, 1600));

        assert_eq!(mock.count("attach_session_action_sets"), 1);
        assert!(api.action_sets().iter().all(|s| s.is_attached()));
        assert_eq!(api.input_maps().len(), 2);
        assert!(api.input_maps().iter().all(|m| m.toplevel_path() != sys::Path::NULL));

        // The session is only begun once the runtime says it's ready
        assert_eq!(mock.count("begin_session"), 0);
    }

    #[test]
    pub fn test_keep_3d_linear_selects_rgba8() {
        let (mock, _, mut api) = api();
        assert!(api.set_keep_3d_linear(true));
        assert!(api.initialize());
        assert_eq!(mock.swapchain_descs.borrow()[0].format, GL_RGBA8);
    }

    #[test]
    pub fn test_initialize_and_uninitialize_are_idempotent() {
        let (mock, _, mut api) = api();
        assert!(api.initialize());
        assert!(api.initialize());
        assert_eq!(mock.count("create_instance"), 1);
        assert_eq!(mock.count("create_session"), 1);
        assert_eq!(mock.count("create_swapchain"), 2);

        api.uninitialize();
        api.uninitialize();
        assert!(!api.is_initialised());
        assert_eq!(mock.count("destroy_instance"), 1);
        assert_eq!(mock.count("destroy_session"), 1);
        assert_eq!(mock.count("destroy_swapchain"), 2);
        assert_eq!(mock.live_handles(), (0, 0, 0, 0));

        // And it can be brought up again
        assert!(api.initialize());
        assert_eq!(mock.live_handles(), (1, 1, 2, 2));
        drop(api);
        assert_eq!(mock.live_handles(), (0, 0, 0, 0));
    }

    #[test]
    pub fn test_missing_graphics_extension_is_fatal() {
        let mock = MockRuntime::default();
        mock.supported_extensions.borrow_mut().clear();
        let (mock, _, mut api) = api_with(mock);

        assert!(!api.initialize());
        assert!(!api.is_initialised());
        assert_eq!(mock.count("create_instance"), 0);
    }

    #[test]
    pub fn test_unsupported_view_configuration_is_fatal() {
        let mock = MockRuntime::default();
        *mock.view_configurations.borrow_mut() = vec![ViewConfigurationType::PRIMARY_MONO];
        let (mock, _, mut api) = api_with(mock);

        assert!(!api.initialize());
        assert_eq!(mock.count("create_session"), 0);
        assert_eq!(mock.count("destroy_instance"), 1);
        assert_eq!(mock.live_handles(), (0, 0, 0, 0));
    }

    #[test]
    pub fn test_unsupported_form_factor_is_fatal() {
        let (mock, _, mut api) = api();
        assert!(api.set_form_factor(3));
        assert!(!api.initialize());
        assert_eq!(mock.count("get_system"), 0);
        assert_eq!(mock.live_handles(), (0, 0, 0, 0));
    }

    #[test]
    pub fn test_graphics_version_mismatch_is_not_fatal() {
        let mock = MockRuntime::default();
        mock.graphics_range
            .set((Version::new(4, 5, 0), Version::new(4, 6, 0)));
        let (_, _, mut api) = api_with(mock);
        assert!(api.initialize());
    }

    #[test]
    pub fn test_partial_failure_cleans_up_newest_first() {
        let (mock, _, mut api) = api();
        mock.fail("attach_session_action_sets");

        assert!(!api.initialize());
        assert!(!api.is_initialised());
        assert_eq!(mock.live_handles(), (0, 0, 0, 0));

        let calls = mock.calls();
        let position = |name: &str| calls.iter().rposition(|c| *c == name).unwrap();
        assert!(position("destroy_action_set") < position("destroy_swapchain"));
        assert!(position("destroy_swapchain") < position("destroy_space"));
        assert!(position("destroy_space") < position("destroy_session"));
        assert!(position("destroy_session") < position("destroy_instance"));
    }

    #[test]
    pub fn test_invalid_action_config_is_fatal() {
        let (mock, _, mut api) = api();
        assert!(api.set_action_sets_text("not json"));
        assert!(!api.initialize());
        assert_eq!(mock.live_handles(), (0, 0, 0, 0));
    }

    #[test]
    pub fn test_extension_flags_follow_enabled_list() {
        let mock = MockRuntime::with_extensions(&[
            "XR_EXT_palm_pose",
            "XR_EXTX_overlay",
            "XR_FB_color_space",
        ]);
        let (mock, _, mut api) = api_with(mock);
        let builtin = BuiltinExtensions::default();
        for wrapper in builtin.wrappers() {
            api.register_extension_wrapper(wrapper);
        }

        assert!(api.initialize());
        let enabled = api.get_enabled_extensions().to_vec();
        assert_eq!(enabled, *mock.enabled_extensions.borrow());
        assert!(enabled.contains(&"XR_FB_color_space".to_string()));
        assert!(!enabled.contains(&"XR_FB_passthrough".to_string()));

        assert!(builtin.palm_pose.borrow().is_enabled());
        assert!(builtin.overlay.borrow().is_enabled());
        assert!(!builtin.passthrough.borrow().is_enabled());
        assert!(!builtin.hand_tracking.borrow().is_enabled());
        // Enabled, but the runtime doesn't resolve its functions
        assert!(!builtin.color_space.borrow().is_enabled());

        for wrapper in builtin.wrappers() {
            for name in wrapper.borrow().requested_extensions().names() {
                if wrapper.borrow().requested_extensions().is_enabled(name) {
                    assert!(enabled.iter().any(|e| e == name));
                }
            }
        }

        api.uninitialize();
        assert!(!builtin.palm_pose.borrow().is_enabled());
        assert!(!builtin.overlay.borrow().is_enabled());
    }

    #[test]
    pub fn test_ready_begins_and_stopping_ends_the_session() {
        let (mock, host, mut api) = api();
        assert!(api.initialize());

        mock.push_state(SessionState::IDLE);
        mock.push_state(SessionState::READY);
        api.process_openxr();
        assert!(api.is_running());
        assert_eq!(mock.count("begin_session"), 1);
        api.render_openxr(0, 1, false);
        api.render_openxr(1, 2, false);

        mock.push_state(SessionState::SYNCHRONIZED);
        mock.push_state(SessionState::VISIBLE);
        mock.push_state(SessionState::FOCUSED);
        api.process_openxr();
        api.render_openxr(0, 1, false);
        api.render_openxr(1, 2, false);
        assert_eq!(host.added_hands(), vec![1, 2]);

        mock.push_state(SessionState::STOPPING);
        api.process_openxr();
        assert!(!api.is_running());
        assert_eq!(api.get_state(), SessionState::STOPPING);
        assert_eq!(mock.count("end_session"), 1);
        assert_eq!(host.removed.borrow().len(), 2);

        // Still initialised, the session can become ready again
        assert!(api.is_initialised());
        mock.push_state(SessionState::IDLE);
        mock.push_state(SessionState::READY);
        api.process_openxr();
        assert!(api.is_running());
        api.render_openxr(0, 1, false);
        api.render_openxr(1, 2, false);

        api.uninitialize();
        assert_eq!(mock.count("end_session"), 2);
    }

    #[test]
    pub fn test_state_changes_for_other_sessions_are_ignored() {
        let (mock, _, mut api) = api();
        assert!(api.initialize());
        mock.push_event(XrEvent::SessionStateChanged {
            session: sys::Session::from_raw(999),
            state: SessionState::READY,
            time: sys::Time::from_nanos(0),
        });
        api.process_openxr();
        assert!(!api.is_running());
        assert_eq!(mock.count("begin_session"), 0);
    }

    #[test]
    pub fn test_interaction_profile_change_queries_every_input_map() {
        let (mock, _, mut api) = api();
        assert!(api.initialize());
        mock.push_event(XrEvent::InteractionProfileChanged {
            session: api.session(),
        });
        api.process_openxr();
        assert_eq!(mock.count("get_current_interaction_profile"), 2);
    }

    #[test]
    pub fn test_instance_loss_stops_everything() {
        let (mock, _, mut api) = api();
        assert!(api.initialize());
        mock.push_state(SessionState::READY);
        mock.push_event(XrEvent::InstanceLossPending {
            loss_time: sys::Time::from_nanos(100),
        });
        mock.push_state(SessionState::SYNCHRONIZED);
        api.process_openxr();

        assert!(!api.is_running());
        assert_eq!(api.get_state(), SessionState::READY);
        assert_eq!(mock.count("wait_frame"), 0);
    }
}
