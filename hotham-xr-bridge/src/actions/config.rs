use log::{debug, info, warn};
use openxr::sys::{self, Path};
use serde::{Deserialize, Serialize};

use super::{ActionSet, ActionType};
use crate::{extensions::SessionContext, runtime::xr_check, BridgeResult};

/// The action sets used when the host doesn't provide its own
pub const DEFAULT_ACTION_SETS_JSON: &str = include_str!("default_action_sets.json");

/// The binding suggestions used when the host doesn't provide its own
pub const DEFAULT_INTERACTION_PROFILES_JSON: &str = include_str!("default_interaction_profiles.json");

/// One action in an [`ActionSetConfig`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionConfig {
    /// `bool`, `float`, `vector2`, `pose` or `vibration`
    #[serde(rename = "type")]
    pub action_type: String,
    /// Internal name
    pub name: String,
    /// Name shown to the user by the runtime
    pub localised_name: String,
    /// Top level paths the action is queried for
    #[serde(default)]
    pub paths: Vec<String>,
}

/// A declaratively described action set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionSetConfig {
    /// Internal name
    pub name: String,
    /// Name shown to the user by the runtime
    pub localised_name: String,
    /// Higher priority sets win when two sets bind the same input
    #[serde(default)]
    pub priority: u32,
    /// The set's actions
    #[serde(default)]
    pub actions: Vec<ActionConfig>,
}

/// Suggested input paths for one action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BindingConfig {
    /// Name of the action set the action lives in
    pub set: String,
    /// Name of the action
    pub action: String,
    /// Full input / output paths, eg. `/user/hand/left/input/trigger/value`
    pub paths: Vec<String>,
}

/// Binding suggestions for one interaction profile
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InteractionProfileConfig {
    /// eg. `/interaction_profiles/khr/simple_controller`
    pub path: String,
    /// The suggested bindings
    pub bindings: Vec<BindingConfig>,
}

/// Parse the action set text
pub fn parse_action_sets(text: &str) -> BridgeResult<Vec<ActionSetConfig>> {
    Ok(serde_json::from_str(text)?)
}

/// Parse the interaction profile text
pub fn parse_interaction_profiles(text: &str) -> BridgeResult<Vec<InteractionProfileConfig>> {
    Ok(serde_json::from_str(text)?)
}

/// Create the described action sets and their actions.
///
/// Actions with an unknown type are skipped; failing to create a set is an error.
pub fn create_action_sets(
    context: &SessionContext<'_>,
    configs: &[ActionSetConfig],
) -> BridgeResult<Vec<ActionSet>> {
    let runtime = context.runtime.as_ref();
    let mut action_sets = Vec::with_capacity(configs.len());

    for config in configs {
        let mut action_set = ActionSet::new(
            runtime,
            context.instance,
            &config.name,
            &config.localised_name,
            config.priority,
        )?;

        for action in &config.actions {
            let Some(action_type) = ActionType::from_name(&action.action_type) else {
                warn!(
                    "[OPENXR] Skipping action {} in {}: unknown type {}",
                    action.name, config.name, action.action_type
                );
                continue;
            };

            let toplevel_paths = action
                .paths
                .iter()
                .filter_map(|p| {
                    let result = runtime.string_to_path(context.instance, p);
                    xr_check(runtime, context.instance, result, &format!("Getting path for {p}"))
                })
                .collect::<Vec<_>>();

            action_set.add_action(
                runtime,
                action_type,
                &action.name,
                &action.localised_name,
                &toplevel_paths,
            );
        }

        debug!(
            "[OPENXR] Created action set {} with {} actions",
            config.name,
            action_set.actions().len()
        );
        action_sets.push(action_set);
    }

    Ok(action_sets)
}

/// Suggest bindings for every interaction profile.
///
/// Bindings naming an unknown set or action are skipped, as are paths `is_path_supported` rejects.
/// A profile the runtime refuses is logged and doesn't affect the others.
pub fn suggest_interaction_profiles(
    context: &SessionContext<'_>,
    profiles: &[InteractionProfileConfig],
    action_sets: &[ActionSet],
    is_path_supported: impl Fn(&str) -> bool,
) {
    let runtime = context.runtime.as_ref();

    for profile in profiles {
        let result = runtime.string_to_path(context.instance, &profile.path);
        let Some(profile_path) = xr_check(
            runtime,
            context.instance,
            result,
            &format!("Getting path for {}", profile.path),
        ) else {
            continue;
        };

        let mut bindings: Vec<(sys::Action, Path)> = Vec::new();
        for binding in &profile.bindings {
            let Some(action) = action_sets
                .iter()
                .find(|s| s.name() == binding.set)
                .and_then(|s| s.get_action(&binding.action))
            else {
                warn!(
                    "[OPENXR] Binding for unknown action {}/{} in {}",
                    binding.set, binding.action, profile.path
                );
                continue;
            };

            for io_path in &binding.paths {
                if !is_path_supported(io_path) {
                    debug!("[OPENXR] Skipping unsupported path {io_path}");
                    continue;
                }
                let result = runtime.string_to_path(context.instance, io_path);
                if let Some(path) =
                    xr_check(runtime, context.instance, result, &format!("Getting path for {io_path}"))
                {
                    bindings.push((action.handle(), path));
                }
            }
        }

        if bindings.is_empty() {
            continue;
        }

        let result = runtime.suggest_interaction_profile_bindings(context.instance, profile_path, &bindings);
        if xr_check(
            runtime,
            context.instance,
            result,
            &format!("Suggesting bindings for {}", profile.path),
        )
        .is_some()
        {
            info!("[OPENXR] Suggested {} bindings for {}", bindings.len(), profile.path);
        }
    }
}
