//! Controller input through the OpenXR action system.
//!
//! Action sets and their actions are described declaratively (see [`ActionSetConfig`] and
//! [`InteractionProfileConfig`]), created once the instance exists and attached to the session
//! exactly once. Every frame the active sets are synced before any action state is read.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use openxr::sys;

mod action;
mod action_set;
mod config;
mod input_map;

pub use action::Action;
pub use action_set::{attach_action_sets, sync_action_sets, ActionSet};
pub use config::{
    create_action_sets, parse_action_sets, parse_interaction_profiles, suggest_interaction_profiles,
    ActionConfig, ActionSetConfig, BindingConfig, InteractionProfileConfig,
    DEFAULT_ACTION_SETS_JSON, DEFAULT_INTERACTION_PROFILES_JSON,
};
pub use input_map::{InputMap, InputMapKind, HAND_PATHS};

/// How much the runtime trusts a pose
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TrackingConfidence {
    /// No usable pose
    #[default]
    None,
    /// Orientation only, or an inferred position
    Low,
    /// Fully tracked
    High,
}

/// The kinds of action the bridge knows how to create
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionType {
    /// On / off input
    Bool,
    /// Analog input in `[0, 1]` or `[-1, 1]`
    Float,
    /// Two axis input, eg. a thumbstick
    Vector2,
    /// A tracked pose
    Pose,
    /// Haptic output
    Vibration,
}

impl ActionType {
    /// Parse the name used in the action set configuration
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "bool" => Some(ActionType::Bool),
            "float" => Some(ActionType::Float),
            "vector2" => Some(ActionType::Vector2),
            "pose" => Some(ActionType::Pose),
            "vibration" => Some(ActionType::Vibration),
            _ => None,
        }
    }

    /// The name used in the action set configuration
    pub fn name(&self) -> &'static str {
        match self {
            ActionType::Bool => "bool",
            ActionType::Float => "float",
            ActionType::Vector2 => "vector2",
            ActionType::Pose => "pose",
            ActionType::Vibration => "vibration",
        }
    }
}

impl From<ActionType> for sys::ActionType {
    fn from(action_type: ActionType) -> Self {
        match action_type {
            ActionType::Bool => sys::ActionType::BOOLEAN_INPUT,
            ActionType::Float => sys::ActionType::FLOAT_INPUT,
            ActionType::Vector2 => sys::ActionType::VECTOR2F_INPUT,
            ActionType::Pose => sys::ActionType::POSE_INPUT,
            ActionType::Vibration => sys::ActionType::VIBRATION_OUTPUT,
        }
    }
}

/// Actions the bridge maps onto the host engine's controller model.
///
/// They are looked up by name, so a custom action set configuration keeps the mapping working as
/// long as it reuses these names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DefaultAction {
    /// Pose the controller is pointing with
    AimPose,
    /// Pose the controller is held at
    GripPose,
    /// Analog front trigger
    FrontTrigger,
    /// Analog side (grip) trigger
    SideTrigger,
    /// Thumbstick or trackpad
    Joystick,
    /// A / X buttons
    AxButtons,
    /// B / Y / menu buttons
    BymButton,
    /// Front trigger as a button
    FrontButton,
    /// Side trigger as a button
    SideButton,
    /// Thumbstick click
    JoystickButton,
    /// Controller rumble
    Haptic,
}

impl DefaultAction {
    /// Number of default actions
    pub const COUNT: usize = 11;

    /// Every default action
    pub const ALL: [DefaultAction; Self::COUNT] = [
        DefaultAction::AimPose,
        DefaultAction::GripPose,
        DefaultAction::FrontTrigger,
        DefaultAction::SideTrigger,
        DefaultAction::Joystick,
        DefaultAction::AxButtons,
        DefaultAction::BymButton,
        DefaultAction::FrontButton,
        DefaultAction::SideButton,
        DefaultAction::JoystickButton,
        DefaultAction::Haptic,
    ];

    /// The action's name in the configuration
    pub fn name(&self) -> &'static str {
        match self {
            DefaultAction::AimPose => "aim_pose",
            DefaultAction::GripPose => "grip_pose",
            DefaultAction::FrontTrigger => "front_trigger",
            DefaultAction::SideTrigger => "side_trigger",
            DefaultAction::Joystick => "joystick",
            DefaultAction::AxButtons => "ax_buttons",
            DefaultAction::BymButton => "bym_button",
            DefaultAction::FrontButton => "front_button",
            DefaultAction::SideButton => "side_button",
            DefaultAction::JoystickButton => "joystick_button",
            DefaultAction::Haptic => "haptic",
        }
    }

    /// Look up a default action by name
    pub fn from_name(name: &str) -> Option<Self> {
        DEFAULT_ACTIONS_BY_NAME.get(name).copied()
    }

    fn index(&self) -> usize {
        Self::ALL
            .iter()
            .position(|a| a == self)
            .unwrap_or_default()
    }
}

static DEFAULT_ACTIONS_BY_NAME: Lazy<HashMap<&'static str, DefaultAction>> =
    Lazy::new(|| DefaultAction::ALL.iter().map(|a| (a.name(), *a)).collect());

/// Where each [`DefaultAction`] lives: `(action set index, action index)`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DefaultActions {
    slots: [Option<(usize, usize)>; DefaultAction::COUNT],
}

impl DefaultActions {
    /// Find each default action by name. The first set that has one wins.
    pub fn locate(action_sets: &[ActionSet]) -> Self {
        let mut default_actions = Self::default();
        for (set_index, action_set) in action_sets.iter().enumerate() {
            for (action_index, action) in action_set.actions().iter().enumerate() {
                let Some(default_action) = DefaultAction::from_name(action.name()) else {
                    continue;
                };
                let slot = &mut default_actions.slots[default_action.index()];
                if slot.is_none() {
                    *slot = Some((set_index, action_index));
                }
            }
        }
        default_actions
    }

    /// Is this default action present?
    pub fn contains(&self, default_action: DefaultAction) -> bool {
        self.slots[default_action.index()].is_some()
    }

    /// Borrow a default action
    pub fn get<'a>(&self, action_sets: &'a [ActionSet], default_action: DefaultAction) -> Option<&'a Action> {
        let (set_index, action_index) = self.slots[default_action.index()]?;
        action_sets.get(set_index)?.actions().get(action_index)
    }

    /// Mutably borrow a default action
    pub fn get_mut<'a>(
        &self,
        action_sets: &'a mut [ActionSet],
        default_action: DefaultAction,
    ) -> Option<&'a mut Action> {
        let (set_index, action_index) = self.slots[default_action.index()]?;
        action_sets.get_mut(set_index)?.actions_mut().get_mut(action_index)
    }

    /// Forget every action, eg. because the sets were destroyed
    pub fn clear(&mut self) {
        *self = Self::default();
    }
}
