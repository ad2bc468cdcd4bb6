use std::{cell::RefCell, collections::BTreeMap, rc::Rc};

use openxr::sys::{FoveationDynamicFB, FoveationLevelFB, PerfSettingsLevelEXT};

use super::EngineHost;
use crate::{extensions::BuiltinExtensions, openxr_api::OpenXrApi, shared::SharedHandle};

/// Application facing settings for the shared session manager and the built in extensions.
///
/// Holds a use of the [`SharedHandle`] for as long as it lives, so settings made before the
/// [`super::XrInterface`] initialises are kept.
pub struct OpenXrConfig {
    handle: SharedHandle<OpenXrApi>,
    api: Rc<RefCell<OpenXrApi>>,
    extensions: BuiltinExtensions,
    host: Option<Rc<dyn EngineHost>>,
}

impl OpenXrConfig {
    /// Acquire the session manager. `host` is told when passthrough needs a transparent background.
    pub fn new(
        handle: SharedHandle<OpenXrApi>,
        extensions: BuiltinExtensions,
        host: Option<Rc<dyn EngineHost>>,
    ) -> Self {
        let api = handle.acquire();
        Self {
            handle,
            api,
            extensions,
            host,
        }
    }

    /// Are eye buffers linear rather than sRGB?
    pub fn keep_3d_linear(&self) -> bool {
        self.api.borrow().config().keep_3d_linear
    }

    /// Choose linear eye buffers. Refused once initialised.
    pub fn set_keep_3d_linear(&self, keep_3d_linear: bool) -> bool {
        self.api.borrow_mut().set_keep_3d_linear(keep_3d_linear)
    }

    /// 1 for a head mounted display, 2 for a handheld
    pub fn get_form_factor(&self) -> i32 {
        self.api.borrow().get_form_factor()
    }

    /// Refused once initialised
    pub fn set_form_factor(&self, form_factor: i32) -> bool {
        self.api.borrow_mut().set_form_factor(form_factor)
    }

    /// The action sets, as JSON
    pub fn get_action_sets_text(&self) -> String {
        self.api.borrow().get_action_sets_text().to_string()
    }

    /// Replace the action sets. Refused once initialised.
    pub fn set_action_sets_text(&self, text: &str) -> bool {
        self.api.borrow_mut().set_action_sets_text(text)
    }

    /// The interaction profile bindings, as JSON
    pub fn get_interaction_profiles_text(&self) -> String {
        self.api.borrow().get_interaction_profiles_text().to_string()
    }

    /// Replace the interaction profile bindings. Refused once initialised.
    pub fn set_interaction_profiles_text(&self, text: &str) -> bool {
        self.api.borrow_mut().set_interaction_profiles_text(text)
    }

    /// Scale applied to the runtime's recommended eye buffer size
    pub fn get_render_target_size_multiplier(&self) -> f32 {
        self.api.borrow().get_render_target_size_multiplier()
    }

    /// Refused once initialised, or if not positive
    pub fn set_render_target_size_multiplier(&self, multiplier: f32) -> bool {
        self.api
            .borrow_mut()
            .set_render_target_size_multiplier(multiplier)
    }

    /// The display's color space, as an `XrColorSpaceFB` value
    pub fn get_color_space(&self) -> u32 {
        self.extensions.color_space.borrow().get_color_space()
    }

    /// Switch color space
    pub fn set_color_space(&self, color_space: u32) -> bool {
        self.extensions
            .color_space
            .borrow_mut()
            .set_color_space(color_space)
    }

    /// Color spaces the display offers, value to name
    pub fn get_available_color_spaces(&self) -> BTreeMap<u32, &'static str> {
        self.extensions
            .color_space
            .borrow()
            .get_available_color_spaces()
    }

    /// Refresh rate in Hz, 0.0 if unknown
    pub fn get_refresh_rate(&self) -> f64 {
        self.extensions
            .display_refresh_rate
            .borrow()
            .get_refresh_rate()
    }

    /// Request a refresh rate in Hz
    pub fn set_refresh_rate(&self, refresh_rate: f64) -> bool {
        self.extensions
            .display_refresh_rate
            .borrow()
            .set_refresh_rate(refresh_rate)
    }

    /// Refresh rates the display supports
    pub fn get_available_refresh_rates(&self) -> Vec<f64> {
        self.extensions
            .display_refresh_rate
            .borrow()
            .get_available_refresh_rates()
    }

    /// CPU performance level
    pub fn get_cpu_level(&self) -> PerfSettingsLevelEXT {
        self.extensions.performance_settings.borrow().cpu_level()
    }

    /// Set the CPU performance level
    pub fn set_cpu_level(&self, level: PerfSettingsLevelEXT) -> bool {
        self.extensions
            .performance_settings
            .borrow_mut()
            .set_cpu_level(level)
    }

    /// GPU performance level
    pub fn get_gpu_level(&self) -> PerfSettingsLevelEXT {
        self.extensions.performance_settings.borrow().gpu_level()
    }

    /// Set the GPU performance level
    pub fn set_gpu_level(&self, level: PerfSettingsLevelEXT) -> bool {
        self.extensions
            .performance_settings
            .borrow_mut()
            .set_gpu_level(level)
    }

    /// Apply fixed foveated rendering to both eye swapchains
    pub fn set_foveation_level(&self, level: FoveationLevelFB, is_dynamic: bool) -> bool {
        let dynamic = if is_dynamic {
            FoveationDynamicFB::LEVEL_ENABLED
        } else {
            FoveationDynamicFB::DISABLED
        };
        let api = self.api.borrow();
        self.extensions.foveation.borrow().set_foveation_level(
            api.session(),
            &api.swapchain_handles(),
            level,
            dynamic,
        )
    }

    /// Show the real world behind the rendered scene. The host is asked for a transparent
    /// background once passthrough is running.
    pub fn start_passthrough(&self) -> bool {
        if !self.extensions.passthrough.borrow_mut().start_passthrough() {
            return false;
        }
        if let Some(host) = &self.host {
            host.set_transparent_background(true);
        }
        true
    }

    /// Stop showing the real world
    pub fn stop_passthrough(&self) {
        self.extensions.passthrough.borrow_mut().stop_passthrough();
        if let Some(host) = &self.host {
            host.set_transparent_background(false);
        }
    }

    /// Name of the headset, empty before initialisation
    pub fn get_system_name(&self) -> String {
        self.api.borrow().get_system_name().to_string()
    }

    /// Every extension enabled on the instance
    pub fn get_enabled_extensions(&self) -> Vec<String> {
        self.api.borrow().get_enabled_extensions().to_vec()
    }
}

impl Drop for OpenXrConfig {
    fn drop(&mut self) {
        // Release logs a mismatch itself
        let _ = self.handle.release();
    }
}
