use std::rc::Rc;

use openxr::sys::{FormFactor, ReferenceSpaceType, ViewConfigurationType};
use serde::{Deserialize, Serialize};

use super::OpenXrApi;
use crate::{
    actions::{DEFAULT_ACTION_SETS_JSON, DEFAULT_INTERACTION_PROFILES_JSON},
    runtime::XrRuntime,
    BridgeError, BridgeResult, VIEW_TYPE,
};

/// The space poses are reported in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PlaySpace {
    /// Origin at the head's starting position
    Local,
    /// Origin on the floor in the middle of the play area. Falls back to [`PlaySpace::Local`] if
    /// the runtime has no stage.
    #[default]
    Stage,
}

impl PlaySpace {
    /// The OpenXR reference space type
    pub fn reference_space_type(&self) -> ReferenceSpaceType {
        match self {
            PlaySpace::Local => ReferenceSpaceType::LOCAL,
            PlaySpace::Stage => ReferenceSpaceType::STAGE,
        }
    }
}

/// Everything the session manager needs to know before bring-up
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Reported to the runtime
    pub application_name: String,
    /// Reported to the runtime
    pub application_version: u32,
    /// 1 for a head mounted display, 2 for a handheld device
    pub form_factor: i32,
    /// Raw `XrViewConfigurationType`, primary stereo by default
    pub view_configuration_type: i32,
    /// The space poses are reported in
    pub play_space_type: PlaySpace,
    /// Render into RGBA8 instead of sRGB swapchains
    pub keep_3d_linear: bool,
    /// Scales the recommended eye resolution
    pub render_target_size_multiplier: f32,
    /// Graphics API version the host renders with, as major and minor
    pub graphics_api_version: (u16, u16),
    /// Declarative action sets, see [`crate::actions::ActionSetConfig`]
    pub action_sets_text: String,
    /// Declarative binding suggestions, see [`crate::actions::InteractionProfileConfig`]
    pub interaction_profiles_text: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            application_name: "Hotham Application".to_string(),
            application_version: 1,
            form_factor: FormFactor::HEAD_MOUNTED_DISPLAY.into_raw(),
            view_configuration_type: VIEW_TYPE.into_raw(),
            play_space_type: PlaySpace::Stage,
            keep_3d_linear: false,
            render_target_size_multiplier: 1.0,
            graphics_api_version: (3, 3),
            action_sets_text: DEFAULT_ACTION_SETS_JSON.to_string(),
            interaction_profiles_text: DEFAULT_INTERACTION_PROFILES_JSON.to_string(),
        }
    }
}

impl SessionConfig {
    /// Parse a config from JSON; missing fields take their defaults
    pub fn from_json(text: &str) -> BridgeResult<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// The configured form factor. Only head mounted displays and handheld devices are accepted.
    pub fn form_factor(&self) -> BridgeResult<FormFactor> {
        match FormFactor::from_raw(self.form_factor) {
            f @ (FormFactor::HEAD_MOUNTED_DISPLAY | FormFactor::HANDHELD_DISPLAY) => Ok(f),
            _ => Err(BridgeError::UnsupportedFormFactor(self.form_factor)),
        }
    }

    /// The configured view configuration
    pub fn view_configuration_type(&self) -> ViewConfigurationType {
        ViewConfigurationType::from_raw(self.view_configuration_type)
    }
}

/// Builds an [`OpenXrApi`] from a [`SessionConfig`]
#[derive(Debug, Clone, Default)]
pub struct OpenXrApiBuilder {
    config: SessionConfig,
}

impl OpenXrApiBuilder {
    /// A builder with the default config
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing config
    pub fn config(&mut self, config: SessionConfig) -> &mut Self {
        self.config = config;
        self
    }

    /// Application name reported to the runtime
    pub fn application_name(&mut self, name: &str) -> &mut Self {
        self.config.application_name = name.to_string();
        self
    }

    /// Application version reported to the runtime
    pub fn application_version(&mut self, version: u32) -> &mut Self {
        self.config.application_version = version;
        self
    }

    /// 1 for a head mounted display, 2 for a handheld device
    pub fn form_factor(&mut self, form_factor: i32) -> &mut Self {
        self.config.form_factor = form_factor;
        self
    }

    /// The space poses are reported in
    pub fn play_space_type(&mut self, play_space_type: PlaySpace) -> &mut Self {
        self.config.play_space_type = play_space_type;
        self
    }

    /// Render into RGBA8 instead of sRGB swapchains
    pub fn keep_3d_linear(&mut self, keep_3d_linear: bool) -> &mut Self {
        self.config.keep_3d_linear = keep_3d_linear;
        self
    }

    /// Scales the recommended eye resolution
    pub fn render_target_size_multiplier(&mut self, multiplier: f32) -> &mut Self {
        self.config.render_target_size_multiplier = multiplier;
        self
    }

    /// Graphics API version the host renders with
    pub fn graphics_api_version(&mut self, major: u16, minor: u16) -> &mut Self {
        self.config.graphics_api_version = (major, minor);
        self
    }

    /// Declarative action sets
    pub fn action_sets_text(&mut self, text: &str) -> &mut Self {
        self.config.action_sets_text = text.to_string();
        self
    }

    /// Declarative binding suggestions
    pub fn interaction_profiles_text(&mut self, text: &str) -> &mut Self {
        self.config.interaction_profiles_text = text.to_string();
        self
    }

    /// Create the (uninitialised) session manager
    pub fn build(&mut self, runtime: Rc<dyn XrRuntime>) -> OpenXrApi {
        OpenXrApi::new(runtime, self.config.clone())
    }
}
