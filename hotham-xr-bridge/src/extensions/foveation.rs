use std::{cell::RefCell, ffi::c_void, rc::Rc};

use log::{debug, warn};
use openxr::sys::{self, pfn, FoveationDynamicFB, FoveationLevelFB, Session, Swapchain};

use super::{
    ExtensionWrapper, RequestedExtensions, RuntimeBinding, SessionContext,
    SwapchainUpdateStateExtension,
};
use crate::runtime::{cvt, proc_table::proc_table, xr_struct};

const FOVEATION: &str = "XR_FB_foveation";
const FOVEATION_CONFIGURATION: &str = "XR_FB_foveation_configuration";

proc_table! {
    pub(crate) struct FoveationFunctions {
        create_foveation_profile: pfn::CreateFoveationProfileFB = "xrCreateFoveationProfileFB",
        destroy_foveation_profile: pfn::DestroyFoveationProfileFB = "xrDestroyFoveationProfileFB",
    }
}

/// `XR_FB_foveation` and `XR_FB_foveation_configuration`: fixed and dynamic foveated rendering.
///
/// Needs `XR_FB_swapchain_update_state` to apply a profile to an existing swapchain.
pub struct FoveationExtension {
    requested: RequestedExtensions,
    functions: FoveationFunctions,
    binding: RuntimeBinding,
    swapchain_update_state: Rc<RefCell<SwapchainUpdateStateExtension>>,
    swapchain_create_info: Box<sys::SwapchainCreateInfoFoveationFB>,
}

impl FoveationExtension {
    /// Create the wrapper, sharing `swapchain_update_state` with the session manager
    pub fn new(swapchain_update_state: Rc<RefCell<SwapchainUpdateStateExtension>>) -> Self {
        Self {
            requested: RequestedExtensions::new(&[FOVEATION, FOVEATION_CONFIGURATION]),
            functions: Default::default(),
            binding: Default::default(),
            swapchain_update_state,
            swapchain_create_info: Box::new(xr_struct!(sys::SwapchainCreateInfoFoveationFB {})),
        }
    }

    /// Foveation needs both of its own extensions plus swapchain update state
    pub fn is_enabled(&self) -> bool {
        self.requested.is_enabled(FOVEATION)
            && self.requested.is_enabled(FOVEATION_CONFIGURATION)
            && self.swapchain_update_state.borrow().is_enabled()
    }

    /// Apply a foveation profile to each of `swapchains`. Returns `false` if the extension isn't
    /// available or any step fails.
    pub fn set_foveation_level(
        &self,
        session: Session,
        swapchains: &[Swapchain],
        level: FoveationLevelFB,
        dynamic: FoveationDynamicFB,
    ) -> bool {
        if !self.is_enabled() {
            return false;
        }
        let (Some(create_profile), Some(destroy_profile)) = (
            self.functions.create_foveation_profile,
            self.functions.destroy_foveation_profile,
        ) else {
            return false;
        };

        for (eye, swapchain) in swapchains.iter().enumerate() {
            let mut level_profile = xr_struct!(sys::FoveationLevelProfileCreateInfoFB {
                level: level,
                vertical_offset: 0.,
                dynamic: dynamic,
            });
            let profile_create_info = xr_struct!(sys::FoveationProfileCreateInfoFB {
                next: &mut level_profile as *mut _ as *mut c_void,
            });

            let mut profile = sys::FoveationProfileFB::NULL;
            let result = cvt(unsafe { create_profile(session, &profile_create_info, &mut profile) });
            if self
                .binding
                .check(result, &format!("Creating the foveation profile for eye {eye}"))
                .is_none()
            {
                return false;
            }

            let state = xr_struct!(sys::SwapchainStateFoveationFB { profile: profile });
            let result = self.swapchain_update_state.borrow().update_swapchain(
                *swapchain,
                &state as *const _ as *const sys::SwapchainStateBaseHeaderFB,
            );
            let updated = self
                .binding
                .check(result, &format!("Updating the swapchain for eye {eye}"))
                .is_some();

            let result = cvt(unsafe { destroy_profile(profile) });
            self.binding
                .check(result, &format!("Destroying the foveation profile for eye {eye}"));

            if !updated {
                return false;
            }
        }

        debug!("[OPENXR] Foveation level set to {level:?}, dynamic {dynamic:?}");
        true
    }
}

impl ExtensionWrapper for FoveationExtension {
    fn name(&self) -> &'static str {
        "foveation"
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

        let (functions, missing) = FoveationFunctions::load(context.runtime.as_ref(), context.instance);
        if !missing.is_empty() {
            warn!("[OPENXR] Failed to initialise foveation extension, missing {missing:?}");
            self.requested.disable(FOVEATION);
            return;
        }
        self.functions = functions;
    }

    fn chain_swapchain_create_info(&mut self, next: *const c_void) -> *const c_void {
        if !self.is_enabled() {
            return next;
        }

        self.swapchain_create_info.next = next as *mut c_void;
        self.swapchain_create_info.as_ref() as *const sys::SwapchainCreateInfoFoveationFB
            as *const c_void
    }

    fn on_session_initialized(&mut self, context: &SessionContext<'_>) {
        self.binding.bind_session(context);
    }

    fn on_session_destroyed(&mut self, _context: &SessionContext<'_>) {
        self.binding.unbind_session();
    }

    fn on_instance_destroyed(&mut self) {
        self.requested.clear();
        self.functions = Default::default();
        self.binding.unbind();
    }
}
