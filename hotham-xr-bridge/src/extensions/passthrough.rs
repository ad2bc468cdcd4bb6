use log::{info, warn};
use openxr::sys::{
    self, pfn, CompositionLayerFlags, PassthroughFB, PassthroughFlagsFB, PassthroughLayerFB,
    PassthroughLayerPurposeFB,
};

use super::{
    CompositionLayerProvider, ExtensionWrapper, RequestedExtensions, RuntimeBinding,
    SessionContext,
};
use crate::runtime::{cvt, proc_table::proc_table, xr_struct};

const PASSTHROUGH: &str = "XR_FB_passthrough";
const TRIANGLE_MESH: &str = "XR_FB_triangle_mesh";

proc_table! {
    pub(crate) struct PassthroughFunctions {
        create_passthrough: pfn::CreatePassthroughFB = "xrCreatePassthroughFB",
        destroy_passthrough: pfn::DestroyPassthroughFB = "xrDestroyPassthroughFB",
        passthrough_start: pfn::PassthroughStartFB = "xrPassthroughStartFB",
        passthrough_pause: pfn::PassthroughPauseFB = "xrPassthroughPauseFB",
        create_passthrough_layer: pfn::CreatePassthroughLayerFB = "xrCreatePassthroughLayerFB",
        destroy_passthrough_layer: pfn::DestroyPassthroughLayerFB = "xrDestroyPassthroughLayerFB",
        passthrough_layer_pause: pfn::PassthroughLayerPauseFB = "xrPassthroughLayerPauseFB",
        passthrough_layer_resume: pfn::PassthroughLayerResumeFB = "xrPassthroughLayerResumeFB",
    }
}

/// `XR_FB_passthrough`: shows the camera feed behind the rendered scene.
///
/// The passthrough feature and its layer are created with the session but only contribute a
/// composition layer between [`PassthroughExtension::start_passthrough`] and
/// [`PassthroughExtension::stop_passthrough`]. The host needs a transparent background for the
/// feed to be visible.
pub struct PassthroughExtension {
    requested: RequestedExtensions,
    functions: PassthroughFunctions,
    binding: RuntimeBinding,
    passthrough: PassthroughFB,
    passthrough_layer: PassthroughLayerFB,
    composition_layer: Box<sys::CompositionLayerPassthroughFB>,
}

impl Default for PassthroughExtension {
    fn default() -> Self {
        Self {
            requested: RequestedExtensions::new(&[PASSTHROUGH, TRIANGLE_MESH]),
            functions: Default::default(),
            binding: Default::default(),
            passthrough: PassthroughFB::NULL,
            passthrough_layer: PassthroughLayerFB::NULL,
            composition_layer: Box::new(xr_struct!(sys::CompositionLayerPassthroughFB {
                flags: CompositionLayerFlags::BLEND_TEXTURE_SOURCE_ALPHA,
                layer_handle: PassthroughLayerFB::NULL,
            })),
        }
    }
}

impl PassthroughExtension {
    /// Is the extension enabled?
    pub fn is_enabled(&self) -> bool {
        self.requested.is_enabled(PASSTHROUGH)
    }

    /// Were the passthrough feature and its layer created?
    pub fn is_passthrough_valid(&self) -> bool {
        self.is_enabled()
            && self.passthrough != PassthroughFB::NULL
            && self.passthrough_layer != PassthroughLayerFB::NULL
    }

    /// Is passthrough currently contributing a layer?
    pub fn is_passthrough_started(&self) -> bool {
        self.is_passthrough_valid() && self.composition_layer.layer_handle != PassthroughLayerFB::NULL
    }

    /// Start the feature and resume its layer
    pub fn start_passthrough(&mut self) -> bool {
        if !self.is_passthrough_valid() {
            return false;
        }
        let (Some(passthrough_start), Some(passthrough_layer_resume)) = (
            self.functions.passthrough_start,
            self.functions.passthrough_layer_resume,
        ) else {
            return false;
        };

        info!("[OPENXR] Starting passthrough");
        let result = cvt(unsafe { passthrough_start(self.passthrough) });
        if self.binding.check(result, "Starting passthrough").is_none() {
            self.stop_passthrough();
            return false;
        }

        let result = cvt(unsafe { passthrough_layer_resume(self.passthrough_layer) });
        if self
            .binding
            .check(result, "Resuming the passthrough layer")
            .is_none()
        {
            self.stop_passthrough();
            return false;
        }

        self.composition_layer.layer_handle = self.passthrough_layer;
        true
    }

    /// Pause the layer and the feature. Safe to call when passthrough isn't running.
    pub fn stop_passthrough(&mut self) {
        if !self.is_enabled() {
            return;
        }

        self.composition_layer.layer_handle = PassthroughLayerFB::NULL;

        if let Some(passthrough_layer_pause) = self
            .functions
            .passthrough_layer_pause
            .filter(|_| self.passthrough_layer != PassthroughLayerFB::NULL)
        {
            let result = cvt(unsafe { passthrough_layer_pause(self.passthrough_layer) });
            self.binding.check(result, "Pausing the passthrough layer");
        }

        if let Some(passthrough_pause) = self
            .functions
            .passthrough_pause
            .filter(|_| self.passthrough != PassthroughFB::NULL)
        {
            let result = cvt(unsafe { passthrough_pause(self.passthrough) });
            self.binding.check(result, "Pausing passthrough");
        }
    }

    fn create(&mut self, context: &SessionContext<'_>) {
        let (Some(create_passthrough), Some(create_passthrough_layer)) = (
            self.functions.create_passthrough,
            self.functions.create_passthrough_layer,
        ) else {
            return;
        };

        let create_info = xr_struct!(sys::PassthroughCreateInfoFB {
            flags: PassthroughFlagsFB::EMPTY,
        });
        let result =
            cvt(unsafe { create_passthrough(context.session, &create_info, &mut self.passthrough) });
        if self.binding.check(result, "Creating passthrough").is_none() {
            self.passthrough = PassthroughFB::NULL;
            return;
        }

        let layer_create_info = xr_struct!(sys::PassthroughLayerCreateInfoFB {
            passthrough: self.passthrough,
            flags: PassthroughFlagsFB::IS_RUNNING_AT_CREATION,
            purpose: PassthroughLayerPurposeFB::RECONSTRUCTION,
        });
        let result = cvt(unsafe {
            create_passthrough_layer(context.session, &layer_create_info, &mut self.passthrough_layer)
        });
        if self
            .binding
            .check(result, "Creating the passthrough layer")
            .is_none()
        {
            self.passthrough_layer = PassthroughLayerFB::NULL;
        }
    }

    fn destroy(&mut self) {
        if self.passthrough_layer != PassthroughLayerFB::NULL {
            if let Some(destroy_passthrough_layer) = self.functions.destroy_passthrough_layer {
                let result = cvt(unsafe { destroy_passthrough_layer(self.passthrough_layer) });
                if self
                    .binding
                    .check(result, "Destroying the passthrough layer")
                    .is_some()
                {
                    self.passthrough_layer = PassthroughLayerFB::NULL;
                }
            }
        }

        if self.passthrough != PassthroughFB::NULL {
            if let Some(destroy_passthrough) = self.functions.destroy_passthrough {
                let result = cvt(unsafe { destroy_passthrough(self.passthrough) });
                if self.binding.check(result, "Destroying passthrough").is_some() {
                    self.passthrough = PassthroughFB::NULL;
                }
            }
        }
    }
}

impl CompositionLayerProvider for PassthroughExtension {
    fn composition_layer(&self) -> Option<*const sys::CompositionLayerBaseHeader> {
        if !self.is_passthrough_started() {
            return None;
        }
        Some(
            self.composition_layer.as_ref() as *const sys::CompositionLayerPassthroughFB
                as *const sys::CompositionLayerBaseHeader,
        )
    }
}

impl ExtensionWrapper for PassthroughExtension {
    fn name(&self) -> &'static str {
        "passthrough"
    }

    fn requested_extensions(&self) -> &RequestedExtensions {
        &self.requested
    }

    fn requested_extensions_mut(&mut self) -> &mut RequestedExtensions {
        &mut self.requested
    }

    fn on_instance_initialized(&mut self, context: &SessionContext<'_>) {
        self.binding.bind_instance(context);
        if !self.is_enabled() {
            return;
        }

        let (functions, missing) = PassthroughFunctions::load(context.runtime.as_ref(), context.instance);
        if !missing.is_empty() {
            warn!("[OPENXR] Failed to initialise passthrough extension, missing {missing:?}");
            self.requested.disable(PASSTHROUGH);
            return;
        }
        self.functions = functions;
    }

    fn on_session_initialized(&mut self, context: &SessionContext<'_>) {
        self.binding.bind_session(context);
        if self.is_enabled() {
            self.create(context);
        }
    }

    fn on_session_destroyed(&mut self, _context: &SessionContext<'_>) {
        if self.is_enabled() {
            self.stop_passthrough();
            self.destroy();
        }
        self.binding.unbind_session();
    }

    fn on_instance_destroyed(&mut self) {
        self.requested.clear();
        self.functions = Default::default();
        self.binding.unbind();
    }
}
