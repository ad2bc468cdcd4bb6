use super::{ExtensionWrapper, RequestedExtensions};

const PALM_POSE: &str = "XR_EXT_palm_pose";

const PALM_POSE_PATHS: [&str; 2] = [
    "/user/hand/left/input/palm_ext/pose",
    "/user/hand/right/input/palm_ext/pose",
];

/// `XR_EXT_palm_pose`: palm bindings are only suggested when the runtime enabled the extension.
pub struct PalmPoseExtension {
    requested: RequestedExtensions,
}

impl Default for PalmPoseExtension {
    fn default() -> Self {
        Self {
            requested: RequestedExtensions::new(&[PALM_POSE]),
        }
    }
}

impl PalmPoseExtension {
    /// Is the extension enabled?
    pub fn is_enabled(&self) -> bool {
        self.requested.is_enabled(PALM_POSE)
    }
}

impl ExtensionWrapper for PalmPoseExtension {
    fn name(&self) -> &'static str {
        "palm_pose"
    }

    fn requested_extensions(&self) -> &RequestedExtensions {
        &self.requested
    }

    fn requested_extensions_mut(&mut self) -> &mut RequestedExtensions {
        &mut self.requested
    }

    fn on_instance_destroyed(&mut self) {
        self.requested.clear();
    }

    fn path_is_supported(&self, path: &str) -> bool {
        if PALM_POSE_PATHS.contains(&path) {
            return self.is_enabled();
        }

        // Not ours
        true
    }
}
