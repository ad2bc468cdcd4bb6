use log::info;

use super::{ExtensionWrapper, RequestedExtensions, SessionContext};
use crate::runtime::XrEvent;

const VIVE_TRACKER_INTERACTION: &str = "XR_HTCX_vive_tracker_interaction";

/// Top level paths of every tracker role
pub const VIVE_TRACKER_ROLES: [&str; 12] = [
    "/user/vive_tracker_htcx/role/left_foot",
    "/user/vive_tracker_htcx/role/right_foot",
    "/user/vive_tracker_htcx/role/left_shoulder",
    "/user/vive_tracker_htcx/role/right_shoulder",
    "/user/vive_tracker_htcx/role/left_elbow",
    "/user/vive_tracker_htcx/role/right_elbow",
    "/user/vive_tracker_htcx/role/left_knee",
    "/user/vive_tracker_htcx/role/right_knee",
    "/user/vive_tracker_htcx/role/waist",
    "/user/vive_tracker_htcx/role/chest",
    "/user/vive_tracker_htcx/role/camera",
    "/user/vive_tracker_htcx/role/keyboard",
];

/// `XR_HTCX_vive_tracker_interaction`: adds an input map per tracker role.
pub struct ViveTrackerExtension {
    requested: RequestedExtensions,
}

impl Default for ViveTrackerExtension {
    fn default() -> Self {
        Self {
            requested: RequestedExtensions::new(&[VIVE_TRACKER_INTERACTION]),
        }
    }
}

impl ViveTrackerExtension {
    /// Is the extension enabled?
    pub fn is_enabled(&self) -> bool {
        self.requested.is_enabled(VIVE_TRACKER_INTERACTION)
    }
}

impl ExtensionWrapper for ViveTrackerExtension {
    fn name(&self) -> &'static str {
        "vive_tracker"
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

    fn on_event_polled(&mut self, _context: &SessionContext<'_>, event: &XrEvent) -> bool {
        match event {
            XrEvent::ViveTrackerConnected { .. } => {
                info!("[OPENXR] VIVE tracker connected");
                true
            }
            _ => false,
        }
    }

    fn input_paths(&self) -> Vec<&'static str> {
        if !self.is_enabled() {
            return Vec::new();
        }
        VIVE_TRACKER_ROLES.to_vec()
    }
}
