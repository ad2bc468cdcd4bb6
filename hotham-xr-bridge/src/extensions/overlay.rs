use super::{ExtensionWrapper, RequestedExtensions};

const OVERLAY: &str = "XR_EXTX_overlay";

/// `XR_EXTX_overlay`. Only tracks whether the runtime enabled it.
pub struct OverlayExtension {
    requested: RequestedExtensions,
}

impl Default for OverlayExtension {
    fn default() -> Self {
        Self {
            requested: RequestedExtensions::new(&[OVERLAY]),
        }
    }
}

impl OverlayExtension {
    /// Is the extension enabled?
    pub fn is_enabled(&self) -> bool {
        self.requested.is_enabled(OVERLAY)
    }
}

impl ExtensionWrapper for OverlayExtension {
    fn name(&self) -> &'static str {
        "overlay"
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
}
