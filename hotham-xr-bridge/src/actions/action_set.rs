use log::{error, warn};
use openxr::sys::{self, Path, Session};

use super::{Action, ActionType};
use crate::{
    extensions::SessionContext,
    runtime::{xr_check, XrRuntime},
    BridgeError, BridgeResult,
};

/// A named group of actions that is attached to the session once and synced every frame.
pub struct ActionSet {
    handle: sys::ActionSet,
    name: String,
    priority: u32,
    actions: Vec<Action>,
    is_active: bool,
    is_attached: bool,
}

impl ActionSet {
    /// Create an (empty, active) action set
    pub fn new(
        runtime: &dyn XrRuntime,
        instance: sys::Instance,
        name: &str,
        localized_name: &str,
        priority: u32,
    ) -> BridgeResult<Self> {
        let handle = runtime.create_action_set(instance, name, localized_name, priority)?;
        Ok(Self {
            handle,
            name: name.to_string(),
            priority,
            actions: Vec::new(),
            is_active: true,
            is_attached: false,
        })
    }

    /// The raw action set handle
    pub fn handle(&self) -> sys::ActionSet {
        self.handle
    }

    /// The set's name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The set's priority
    pub fn priority(&self) -> u32 {
        self.priority
    }

    /// Every action in the set, in creation order
    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    pub(crate) fn actions_mut(&mut self) -> &mut [Action] {
        &mut self.actions
    }

    /// Only active sets are synced
    pub fn is_active(&self) -> bool {
        self.is_active
    }

    /// Include or exclude this set from syncing
    pub fn set_active(&mut self, is_active: bool) {
        self.is_active = is_active;
    }

    /// Has the set been attached to the session?
    pub fn is_attached(&self) -> bool {
        self.is_attached
    }

    /// Add an action. An action with the same name is returned as is; nothing can be added once
    /// the set is attached.
    pub fn add_action(
        &mut self,
        runtime: &dyn XrRuntime,
        action_type: ActionType,
        name: &str,
        localized_name: &str,
        toplevel_paths: &[Path],
    ) -> Option<&mut Action> {
        if let Some(index) = self.actions.iter().position(|a| a.name() == name) {
            return Some(&mut self.actions[index]);
        }
        if self.is_attached {
            error!("[OPENXR] Can't add action {name} to {}, it is already attached", self.name);
            return None;
        }

        match Action::new(runtime, self.handle, action_type, name, localized_name, toplevel_paths) {
            Ok(action) => {
                self.actions.push(action);
                self.actions.last_mut()
            }
            Err(e) => {
                error!("[OPENXR] Failed to create action {name} in {}: {e}", self.name);
                None
            }
        }
    }

    /// Find an action by name
    pub fn get_action(&self, name: &str) -> Option<&Action> {
        self.actions.iter().find(|a| a.name() == name)
    }

    /// Find an action by name
    pub fn get_action_mut(&mut self, name: &str) -> Option<&mut Action> {
        self.actions.iter_mut().find(|a| a.name() == name)
    }

    /// Attach the set to `session`. This can only happen once per set.
    pub fn attach(&mut self, runtime: &dyn XrRuntime, session: Session) -> BridgeResult<()> {
        attach_action_sets(runtime, session, std::slice::from_mut(self))
    }

    /// Destroy the action spaces of every pose action
    pub fn reset_spaces(&mut self, runtime: &dyn XrRuntime) {
        for action in self.actions.iter_mut() {
            action.reset_spaces(runtime);
        }
    }

    /// Destroy every action, then the set itself
    pub fn destroy(&mut self, runtime: &dyn XrRuntime) {
        for action in self.actions.iter_mut() {
            action.destroy(runtime);
        }
        self.actions.clear();

        if self.handle != sys::ActionSet::NULL {
            if let Err(e) = runtime.destroy_action_set(self.handle) {
                warn!("[OPENXR] Failed to destroy action set {}: {e}", self.name);
            }
            self.handle = sys::ActionSet::NULL;
        }
        self.is_attached = false;
    }
}

/// Attach `action_sets` to `session` in a single call, which is all OpenXR allows per session.
///
/// Fails without calling the runtime if any of the sets is already attached.
pub fn attach_action_sets(
    runtime: &dyn XrRuntime,
    session: Session,
    action_sets: &mut [ActionSet],
) -> BridgeResult<()> {
    if let Some(attached) = action_sets.iter().find(|s| s.is_attached) {
        error!("[OPENXR] Action set {} is already attached", attached.name);
        return Err(BridgeError::ActionSetAlreadyAttached(attached.name.clone()));
    }
    if session == Session::NULL || action_sets.iter().any(|s| s.handle == sys::ActionSet::NULL) {
        return Err(BridgeError::NotInitialised);
    }
    if action_sets.is_empty() {
        return Ok(());
    }

    let handles = action_sets.iter().map(|s| s.handle).collect::<Vec<_>>();
    runtime.attach_session_action_sets(session, &handles)?;
    for action_set in action_sets.iter_mut() {
        action_set.is_attached = true;
    }
    Ok(())
}

/// Sync every active set in one call. Returns `false` if nothing was synced.
///
/// Every active set must have been attached first.
pub fn sync_action_sets(context: &SessionContext<'_>, action_sets: &mut [ActionSet]) -> bool {
    let mut active_sets = Vec::new();
    for action_set in action_sets.iter().filter(|s| s.is_active && s.handle != sys::ActionSet::NULL) {
        if !action_set.is_attached {
            error!(
                "[OPENXR] {}",
                BridgeError::ActionSetNotAttached(action_set.name.clone())
            );
            return false;
        }
        active_sets.push((action_set.handle, Path::NULL));
    }

    if active_sets.is_empty() {
        return false;
    }

    let result = context.runtime.sync_actions(context.session, &active_sets);
    if xr_check(context.runtime.as_ref(), context.instance, result, "Syncing actions").is_none() {
        return false;
    }

    for action_set in action_sets.iter_mut().filter(|s| s.is_active) {
        for action in action_set.actions.iter_mut() {
            action.mark_synced(context.predicted_display_time);
        }
    }
    true
}
