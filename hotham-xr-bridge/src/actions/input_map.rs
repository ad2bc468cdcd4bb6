use log::info;
use openxr::sys::{Duration, Path};

use super::{ActionSet, DefaultAction, DefaultActions, TrackingConfidence};
use crate::{extensions::SessionContext, interface::EngineHost, runtime::xr_check};

/// Top level paths of the two hands
pub const HAND_PATHS: [&str; 2] = ["/user/hand/left", "/user/hand/right"];

/// Slightly longer than a frame at 60Hz, so a sustained rumble is continuous
const RUMBLE_PULSE_NANOS: i64 = 17_000_000;

/// Axis ids of the host's controller model
const AXIS_JOYSTICK_X: u32 = 0;
const AXIS_JOYSTICK_Y: u32 = 1;
const AXIS_FRONT_TRIGGER: u32 = 2;
const AXIS_SIDE_TRIGGER: u32 = 4;

/// Button ids of the host's controller model
const BUTTON_BYM: u32 = 1;
const BUTTON_SIDE: u32 = 2;
const BUTTON_AX: u32 = 7;
const BUTTON_JOYSTICK: u32 = 14;
const BUTTON_FRONT: u32 = 15;

/// What sits at the end of a top level path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputMapKind {
    /// A hand held controller
    Hand,
    /// A body or object tracker
    Tracker,
}

/// Ties a top level input path to a controller in the host engine.
#[derive(Debug, Clone, PartialEq)]
pub struct InputMap {
    name: String,
    kind: InputMapKind,
    toplevel_path: Path,
    controller_id: Option<i32>,
    active_profile: Path,
    tracking_confidence: TrackingConfidence,
}

impl InputMap {
    /// A map for `path`, not yet resolved against an instance
    pub fn new(path: &str, kind: InputMapKind) -> Self {
        Self {
            name: path.to_string(),
            kind,
            toplevel_path: Path::NULL,
            controller_id: None,
            active_profile: Path::NULL,
            tracking_confidence: TrackingConfidence::None,
        }
    }

    /// Both hands followed by any extra paths (eg. trackers)
    pub fn defaults<'a>(extra_paths: impl IntoIterator<Item = &'a str>) -> Vec<Self> {
        HAND_PATHS
            .iter()
            .map(|p| Self::new(p, InputMapKind::Hand))
            .chain(extra_paths.into_iter().map(|p| Self::new(p, InputMapKind::Tracker)))
            .collect()
    }

    /// The top level path as text
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Hand or tracker
    pub fn kind(&self) -> InputMapKind {
        self.kind
    }

    /// The resolved top level path, `NULL` until bound
    pub fn toplevel_path(&self) -> Path {
        self.toplevel_path
    }

    /// The host's controller id, if the controller is currently registered
    pub fn controller_id(&self) -> Option<i32> {
        self.controller_id
    }

    /// The interaction profile the runtime is currently using for this path
    pub fn active_profile(&self) -> Path {
        self.active_profile
    }

    /// Confidence of the last located aim pose
    pub fn tracking_confidence(&self) -> TrackingConfidence {
        self.tracking_confidence
    }

    /// 1 for the left hand, 2 for the right hand, 0 for anything else
    fn hand(&self) -> u32 {
        match self.kind {
            InputMapKind::Hand if self.name.ends_with("/left") => 1,
            InputMapKind::Hand if self.name.ends_with("/right") => 2,
            _ => 0,
        }
    }

    /// Resolve the top level path
    pub fn bind(&mut self, context: &SessionContext<'_>) -> bool {
        let runtime = context.runtime.as_ref();
        let result = runtime.string_to_path(context.instance, &self.name);
        match xr_check(runtime, context.instance, result, &format!("Getting path for {}", self.name)) {
            Some(path) => {
                self.toplevel_path = path;
                true
            }
            None => false,
        }
    }

    /// Remove the controller from the host, if it was registered
    pub fn release_controller(&mut self, host: Option<&dyn EngineHost>) {
        if let (Some(controller_id), Some(host)) = (self.controller_id.take(), host) {
            host.remove_controller(controller_id);
            info!("[OPENXR] Removed controller for {}", self.name);
        }
        self.tracking_confidence = TrackingConfidence::None;
    }

    /// Forget the path and profile and remove the controller from the host
    pub fn unbind(&mut self, host: Option<&dyn EngineHost>) {
        self.release_controller(host);
        self.toplevel_path = Path::NULL;
        self.active_profile = Path::NULL;
    }

    /// Ask the runtime which interaction profile drives this path, logging when it changes
    pub fn refresh_interaction_profile(&mut self, context: &SessionContext<'_>) {
        if self.toplevel_path == Path::NULL {
            return;
        }

        let runtime = context.runtime.as_ref();
        let result = runtime.get_current_interaction_profile(context.session, self.toplevel_path);
        let Some(profile) = xr_check(
            runtime,
            context.instance,
            result,
            &format!("Getting interaction profile for {}", self.name),
        ) else {
            return;
        };

        if profile == self.active_profile {
            return;
        }
        self.active_profile = profile;
        if profile == Path::NULL {
            info!("[OPENXR] No interaction profile for {}", self.name);
            return;
        }

        let result = runtime.path_to_string(context.instance, profile);
        if let Some(profile) = xr_check(runtime, context.instance, result, "Getting interaction profile name") {
            info!("[OPENXR] Interaction profile for {} changed to {profile}", self.name);
        }
    }

    /// Push this frame's input state into the host's controller. Action sets must have been synced.
    ///
    /// The controller is registered while the aim pose is active and removed when it isn't.
    pub fn update(
        &mut self,
        context: &SessionContext<'_>,
        host: &dyn EngineHost,
        action_sets: &mut [ActionSet],
        default_actions: &DefaultActions,
        world_scale: f32,
    ) {
        let path = self.toplevel_path;
        if path == Path::NULL {
            return;
        }

        let is_active = default_actions
            .get(action_sets, DefaultAction::AimPose)
            .map(|aim| aim.is_pose_active(context, path))
            .unwrap_or(false);
        if !is_active {
            self.release_controller(Some(host));
            return;
        }

        let controller_id = match self.controller_id {
            Some(controller_id) => controller_id,
            None => {
                let controller_id = host.add_controller(&self.name, self.hand(), true, true);
                info!("[OPENXR] Mapped {} to controller {controller_id}", self.name);
                self.controller_id = Some(controller_id);
                controller_id
            }
        };

        if let Some(aim) = default_actions.get_mut(action_sets, DefaultAction::AimPose) {
            let (confidence, transform) = aim.get_as_pose(context, path, world_scale);
            self.tracking_confidence = confidence;
            if let Some(transform) = transform {
                host.set_controller_transform(controller_id, transform, true, true);
            }
        }

        let action_sets = &*action_sets;
        let float = |which: DefaultAction| {
            default_actions
                .get(action_sets, which)
                .map(|a| a.get_as_float(context, path))
        };
        if let Some(value) = float(DefaultAction::FrontTrigger) {
            host.set_controller_axis(controller_id, AXIS_FRONT_TRIGGER, value, false);
        }
        if let Some(value) = float(DefaultAction::SideTrigger) {
            host.set_controller_axis(controller_id, AXIS_SIDE_TRIGGER, value, false);
        }
        if let Some(joystick) = default_actions.get(action_sets, DefaultAction::Joystick) {
            let value = joystick.get_as_vector2(context, path);
            host.set_controller_axis(controller_id, AXIS_JOYSTICK_X, value.x, true);
            host.set_controller_axis(controller_id, AXIS_JOYSTICK_Y, value.y, true);
        }

        for (which, button) in [
            (DefaultAction::AxButtons, BUTTON_AX),
            (DefaultAction::BymButton, BUTTON_BYM),
            (DefaultAction::FrontButton, BUTTON_FRONT),
            (DefaultAction::SideButton, BUTTON_SIDE),
            (DefaultAction::JoystickButton, BUTTON_JOYSTICK),
        ] {
            if let Some(action) = default_actions.get(action_sets, which) {
                host.set_controller_button(controller_id, button, action.get_as_bool(context, path));
            }
        }

        if let Some(haptic) = default_actions.get(action_sets, DefaultAction::Haptic) {
            let rumble = host.get_controller_rumble(controller_id);
            if rumble > 0. {
                haptic.do_haptic_pulse(context, path, Duration::from_nanos(RUMBLE_PULSE_NANOS), 0., rumble);
            }
        }
    }
}
