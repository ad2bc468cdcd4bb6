use glam::{Affine3A, Vec2};
use log::{info, warn};
use openxr::sys::{self, Duration, Path, Posef, SpaceLocationFlags, Time};

use super::{ActionType, TrackingConfidence};
use crate::{
    extensions::SessionContext,
    runtime::{xr_check, XrRuntime},
    util::transform_from_pose,
    BridgeResult,
};

/// A single input or output action, queried per top level path (eg. per hand).
///
/// Reads never fail: if the runtime can't give us a value the type's default is returned.
pub struct Action {
    handle: sys::Action,
    action_type: ActionType,
    name: String,
    toplevel_paths: Vec<Path>,
    spaces: Vec<sys::Space>,
    pose_valid: Vec<bool>,
    synced_at: Time,
}

impl Action {
    /// Create the action inside `action_set`. `toplevel_paths` are the subaction paths it can be
    /// queried for.
    pub fn new(
        runtime: &dyn XrRuntime,
        action_set: sys::ActionSet,
        action_type: ActionType,
        name: &str,
        localized_name: &str,
        toplevel_paths: &[Path],
    ) -> BridgeResult<Self> {
        let handle = runtime.create_action(
            action_set,
            name,
            localized_name,
            action_type.into(),
            toplevel_paths,
        )?;

        Ok(Self {
            handle,
            action_type,
            name: name.to_string(),
            toplevel_paths: toplevel_paths.to_vec(),
            spaces: vec![sys::Space::NULL; toplevel_paths.len()],
            pose_valid: vec![true; toplevel_paths.len()],
            synced_at: Time::from_nanos(0),
        })
    }

    /// The raw action handle
    pub fn handle(&self) -> sys::Action {
        self.handle
    }

    /// The action's name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// What kind of action this is
    pub fn action_type(&self) -> ActionType {
        self.action_type
    }

    /// The subaction paths this action was created with
    pub fn toplevel_paths(&self) -> &[Path] {
        &self.toplevel_paths
    }

    pub(crate) fn mark_synced(&mut self, time: Time) {
        self.synced_at = time;
    }

    fn synced_this_frame(&self, context: &SessionContext<'_>) -> bool {
        self.synced_at == context.predicted_display_time
    }

    fn can_read(&self, context: &SessionContext<'_>, path: Path, action_type: ActionType) -> bool {
        if self.handle == sys::Action::NULL || path == Path::NULL || self.action_type != action_type {
            return false;
        }
        if !self.synced_this_frame(context) {
            warn!("[OPENXR] Action {} read before its action set was synced this frame", self.name);
        }
        true
    }

    /// Current state of a boolean action
    pub fn get_as_bool(&self, context: &SessionContext<'_>, path: Path) -> bool {
        if !self.can_read(context, path, ActionType::Bool) {
            return false;
        }

        let result = context
            .runtime
            .get_action_state_boolean(context.session, self.handle, path);
        match xr_check(context.runtime.as_ref(), context.instance, result, "Getting boolean action state") {
            Some(state) if state.is_active => state.current_state,
            _ => false,
        }
    }

    /// Current state of a float action
    pub fn get_as_float(&self, context: &SessionContext<'_>, path: Path) -> f32 {
        if !self.can_read(context, path, ActionType::Float) {
            return 0.;
        }

        let result = context
            .runtime
            .get_action_state_float(context.session, self.handle, path);
        match xr_check(context.runtime.as_ref(), context.instance, result, "Getting float action state") {
            Some(state) if state.is_active => state.current_state,
            _ => 0.,
        }
    }

    /// Current state of a two axis action
    pub fn get_as_vector2(&self, context: &SessionContext<'_>, path: Path) -> Vec2 {
        if !self.can_read(context, path, ActionType::Vector2) {
            return Vec2::ZERO;
        }

        let result = context
            .runtime
            .get_action_state_vector2f(context.session, self.handle, path);
        match xr_check(context.runtime.as_ref(), context.instance, result, "Getting vector2 action state") {
            Some(state) if state.is_active => mint::Vector2::from(state.current_state).into(),
            _ => Vec2::ZERO,
        }
    }

    /// Is there an active binding driving this pose action for `path`?
    pub fn is_pose_active(&self, context: &SessionContext<'_>, path: Path) -> bool {
        if !self.can_read(context, path, ActionType::Pose) {
            return false;
        }

        let result = context
            .runtime
            .get_action_state_pose(context.session, self.handle, path);
        xr_check(context.runtime.as_ref(), context.instance, result, "Getting pose action state")
            .unwrap_or(false)
    }

    /// Locate a pose action for `path` in the play space at the predicted display time.
    ///
    /// The transform is only produced when the orientation is valid.
    pub fn get_as_pose(
        &mut self,
        context: &SessionContext<'_>,
        path: Path,
        world_scale: f32,
    ) -> (TrackingConfidence, Option<Affine3A>) {
        if !self.can_read(context, path, ActionType::Pose) {
            return (TrackingConfidence::None, None);
        }
        let Some(index) = self.toplevel_paths.iter().position(|p| *p == path) else {
            return (TrackingConfidence::None, None);
        };

        let runtime = context.runtime.as_ref();
        if self.spaces[index] == sys::Space::NULL {
            let result = runtime.create_action_space(context.session, self.handle, path, Posef::IDENTITY);
            let Some(space) = xr_check(runtime, context.instance, result, "Creating action space") else {
                return (TrackingConfidence::None, None);
            };
            self.spaces[index] = space;
        }

        let result = runtime.locate_space(
            self.spaces[index],
            context.play_space,
            context.predicted_display_time,
        );
        let Some(location) = xr_check(runtime, context.instance, result, "Locating action space") else {
            return (TrackingConfidence::None, None);
        };

        let valid = location.flags.contains(SpaceLocationFlags::ORIENTATION_VALID);
        if self.pose_valid[index] != valid {
            self.pose_valid[index] = valid;
            if valid {
                info!("[OPENXR] Pose for action {} is valid again", self.name);
            } else {
                warn!("[OPENXR] Pose for action {} is no longer valid (check tracking?)", self.name);
            }
        }
        if !valid {
            return (TrackingConfidence::None, None);
        }

        let Some(transform) = transform_from_pose(&location.pose, world_scale) else {
            return (TrackingConfidence::None, None);
        };
        let confidence = if location.flags.contains(SpaceLocationFlags::POSITION_TRACKED) {
            TrackingConfidence::High
        } else {
            TrackingConfidence::Low
        };

        (confidence, Some(transform))
    }

    /// Fire a single vibration. A frequency of `0.` leaves the choice to the runtime.
    pub fn do_haptic_pulse(
        &self,
        context: &SessionContext<'_>,
        path: Path,
        duration: Duration,
        frequency: f32,
        amplitude: f32,
    ) {
        if self.handle == sys::Action::NULL || path == Path::NULL {
            return;
        }
        if self.action_type != ActionType::Vibration {
            warn!("[OPENXR] Action {} can't vibrate, it is a {} action", self.name, self.action_type.name());
            return;
        }

        let result = context.runtime.apply_haptic_feedback(
            context.session,
            self.handle,
            path,
            duration,
            frequency,
            amplitude,
        );
        if let Err(e) = result {
            warn!("[OPENXR] Haptic pulse on {} failed: {e}", self.name);
        }
    }

    /// Destroy every action space created for pose queries
    pub fn reset_spaces(&mut self, runtime: &dyn XrRuntime) {
        for space in self.spaces.iter_mut().filter(|s| **s != sys::Space::NULL) {
            if let Err(e) = runtime.destroy_space(*space) {
                warn!("[OPENXR] Failed to destroy action space for {}: {e}", self.name);
            }
            *space = sys::Space::NULL;
        }
        self.pose_valid.iter_mut().for_each(|v| *v = true);
    }

    /// Destroy the action and its spaces
    pub fn destroy(&mut self, runtime: &dyn XrRuntime) {
        self.reset_spaces(runtime);
        if self.handle == sys::Action::NULL {
            return;
        }
        if let Err(e) = runtime.destroy_action(self.handle) {
            warn!("[OPENXR] Failed to destroy action {}: {e}", self.name);
        }
        self.handle = sys::Action::NULL;
    }
}
