use log::warn;
use openxr::sys::{self, pfn, Swapchain};

use super::{ExtensionWrapper, RequestedExtensions, SessionContext};
use crate::runtime::{cvt, proc_table::proc_table, XrResult};

const SWAPCHAIN_UPDATE_STATE: &str = "XR_FB_swapchain_update_state";
const SWAPCHAIN_UPDATE_STATE_OPENGL_ES: &str = "XR_FB_swapchain_update_state_opengl_es";

proc_table! {
    pub(crate) struct SwapchainUpdateStateFunctions {
        update_swapchain: pfn::UpdateSwapchainFB = "xrUpdateSwapchainFB",
        get_swapchain_state: pfn::GetSwapchainStateFB = "xrGetSwapchainStateFB",
    }
}

/// `XR_FB_swapchain_update_state`: lets other wrappers (foveation) update swapchain state after
/// creation.
pub struct SwapchainUpdateStateExtension {
    requested: RequestedExtensions,
    functions: SwapchainUpdateStateFunctions,
}

impl Default for SwapchainUpdateStateExtension {
    fn default() -> Self {
        Self {
            requested: if cfg!(target_os = "android") {
                RequestedExtensions::new(&[SWAPCHAIN_UPDATE_STATE, SWAPCHAIN_UPDATE_STATE_OPENGL_ES])
            } else {
                RequestedExtensions::new(&[SWAPCHAIN_UPDATE_STATE])
            },
            functions: Default::default(),
        }
    }
}

impl SwapchainUpdateStateExtension {
    /// Is the extension enabled and are its functions resolved?
    pub fn is_enabled(&self) -> bool {
        self.requested.is_enabled(SWAPCHAIN_UPDATE_STATE)
    }

    /// `xrUpdateSwapchainFB`
    pub fn update_swapchain(
        &self,
        swapchain: Swapchain,
        state: *const sys::SwapchainStateBaseHeaderFB,
    ) -> XrResult<()> {
        let update_swapchain = self
            .functions
            .update_swapchain
            .filter(|_| self.is_enabled())
            .ok_or(sys::Result::ERROR_FUNCTION_UNSUPPORTED)?;
        cvt(unsafe { update_swapchain(swapchain, state) }).map(|_| ())
    }

    /// `xrGetSwapchainStateFB`
    pub fn get_swapchain_state(
        &self,
        swapchain: Swapchain,
        state: *mut sys::SwapchainStateBaseHeaderFB,
    ) -> XrResult<()> {
        let get_swapchain_state = self
            .functions
            .get_swapchain_state
            .filter(|_| self.is_enabled())
            .ok_or(sys::Result::ERROR_FUNCTION_UNSUPPORTED)?;
        cvt(unsafe { get_swapchain_state(swapchain, state) }).map(|_| ())
    }
}

impl ExtensionWrapper for SwapchainUpdateStateExtension {
    fn name(&self) -> &'static str {
        "swapchain_update_state"
    }

    fn requested_extensions(&self) -> &RequestedExtensions {
        &self.requested
    }

    fn requested_extensions_mut(&mut self) -> &mut RequestedExtensions {
        &mut self.requested
    }

    fn on_instance_initialized(&mut self, context: &SessionContext<'_>) {
        if !self.is_enabled() {
            return;
        }

        let (functions, missing) =
            SwapchainUpdateStateFunctions::load(context.runtime.as_ref(), context.instance);
        if !missing.is_empty() {
            warn!("[OPENXR] Failed to initialise swapchain update state extension, missing {missing:?}");
            self.requested.disable(SWAPCHAIN_UPDATE_STATE);
            return;
        }
        self.functions = functions;
    }

    fn on_instance_destroyed(&mut self) {
        self.requested.clear();
        self.functions = Default::default();
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::rc::Rc;

    use super::*;
    use crate::{
        extensions::test_context,
        runtime::{mock::MockRuntime, XrRuntime},
    };

    unsafe extern "system" fn update_swapchain(
        _swapchain: Swapchain,
        _state: *const sys::SwapchainStateBaseHeaderFB,
    ) -> sys::Result {
        sys::Result::SUCCESS
    }

    unsafe extern "system" fn get_swapchain_state(
        _swapchain: Swapchain,
        _state: *mut sys::SwapchainStateBaseHeaderFB,
    ) -> sys::Result {
        sys::Result::SUCCESS
    }

    pub(crate) fn provide_functions(runtime: &MockRuntime) {
        runtime.provide_function("xrUpdateSwapchainFB", unsafe {
            std::mem::transmute::<pfn::UpdateSwapchainFB, pfn::VoidFunction>(update_swapchain)
        });
        runtime.provide_function("xrGetSwapchainStateFB", unsafe {
            std::mem::transmute::<pfn::GetSwapchainStateFB, pfn::VoidFunction>(get_swapchain_state)
        });
    }

    #[test]
    pub fn test_missing_functions_disable_the_extension() {
        let mock = Rc::new(MockRuntime::default());
        let runtime: Rc<dyn XrRuntime> = mock.clone();
        let mut extension = SwapchainUpdateStateExtension::default();
        extension
            .requested_extensions_mut()
            .write_back(&[SWAPCHAIN_UPDATE_STATE.to_string()]);

        extension.on_instance_initialized(&test_context(&runtime));
        assert!(!extension.is_enabled());
        assert_eq!(
            extension.update_swapchain(Swapchain::from_raw(1), std::ptr::null()),
            Err(sys::Result::ERROR_FUNCTION_UNSUPPORTED)
        );
    }

    #[test]
    pub fn test_update_swapchain_when_resolved() {
        let mock = Rc::new(MockRuntime::default());
        provide_functions(&mock);
        let runtime: Rc<dyn XrRuntime> = mock.clone();
        let mut extension = SwapchainUpdateStateExtension::default();
        extension
            .requested_extensions_mut()
            .write_back(&[SWAPCHAIN_UPDATE_STATE.to_string()]);

        extension.on_instance_initialized(&test_context(&runtime));
        assert!(extension.is_enabled());
        assert_eq!(
            extension.update_swapchain(Swapchain::from_raw(1), std::ptr::null()),
            Ok(())
        );

        extension.on_instance_destroyed();
        assert!(!extension.is_enabled());
    }
}
