use std::{collections::BTreeMap, ffi::c_void};

use log::{info, warn};
use openxr::sys::{self, pfn, ColorSpaceFB};

use super::{ExtensionWrapper, RequestedExtensions, RuntimeBinding, SessionContext};
use crate::runtime::{cvt, enumerate, proc_table::proc_table, xr_struct};

const COLOR_SPACE: &str = "XR_FB_color_space";

proc_table! {
    pub(crate) struct ColorSpaceFunctions {
        enumerate_color_spaces: pfn::EnumerateColorSpacesFB = "xrEnumerateColorSpacesFB",
        set_color_space: pfn::SetColorSpaceFB = "xrSetColorSpaceFB",
    }
}

/// `XR_FB_color_space`: query and change the color space the compositor assumes.
pub struct ColorSpaceExtension {
    requested: RequestedExtensions,
    functions: ColorSpaceFunctions,
    binding: RuntimeBinding,
    properties: Box<sys::SystemColorSpacePropertiesFB>,
}

impl Default for ColorSpaceExtension {
    fn default() -> Self {
        Self {
            requested: RequestedExtensions::new(&[COLOR_SPACE]),
            functions: Default::default(),
            binding: Default::default(),
            properties: Box::new(xr_struct!(sys::SystemColorSpacePropertiesFB {
                color_space: ColorSpaceFB::UNMANAGED,
            })),
        }
    }
}

/// Human readable name of a color space
pub fn color_space_name(color_space: ColorSpaceFB) -> &'static str {
    match color_space {
        ColorSpaceFB::UNMANAGED => "XR_COLOR_SPACE_UNMANAGED_FB",
        ColorSpaceFB::REC2020 => "XR_COLOR_SPACE_REC2020_FB",
        ColorSpaceFB::REC709 => "XR_COLOR_SPACE_REC709_FB",
        ColorSpaceFB::RIFT_CV1 => "XR_COLOR_SPACE_RIFT_CV1_FB",
        ColorSpaceFB::RIFT_S => "XR_COLOR_SPACE_RIFT_S_FB",
        ColorSpaceFB::QUEST => "XR_COLOR_SPACE_QUEST_FB",
        ColorSpaceFB::P3 => "XR_COLOR_SPACE_P3_FB",
        ColorSpaceFB::ADOBE_RGB => "XR_COLOR_SPACE_ADOBE_RGB_FB",
        _ => "Unknown",
    }
}

impl ColorSpaceExtension {
    /// Is the extension enabled?
    pub fn is_enabled(&self) -> bool {
        self.requested.is_enabled(COLOR_SPACE)
    }

    /// The current color space. Starts out as the system default reported at bring-up.
    pub fn get_color_space(&self) -> u32 {
        self.properties.color_space.into_raw() as u32
    }

    /// Ask the runtime to switch color space. The new value is only remembered if it succeeds.
    pub fn set_color_space(&mut self, color_space: u32) -> bool {
        let Some(set_color_space) = self.functions.set_color_space.filter(|_| self.is_enabled()) else {
            return false;
        };
        let color_space = ColorSpaceFB::from_raw(color_space as i32);
        let result = cvt(unsafe { set_color_space(self.binding.session, color_space) });
        if self.binding.check(result, "Setting the color space").is_none() {
            return false;
        }

        info!("[OPENXR] Color space set to {}", color_space_name(color_space));
        self.properties.color_space = color_space;
        true
    }

    /// Every color space the runtime offers, keyed by value. Empty when the extension is off.
    pub fn get_available_color_spaces(&self) -> BTreeMap<u32, &'static str> {
        let Some(enumerate_color_spaces) = self
            .functions
            .enumerate_color_spaces
            .filter(|_| self.is_enabled())
        else {
            return Default::default();
        };

        let session = self.binding.session;
        let result = enumerate(ColorSpaceFB::UNMANAGED, |capacity, count, buffer| unsafe {
            enumerate_color_spaces(session, capacity, count, buffer)
        });
        let Some(color_spaces) = self.binding.check(result, "Enumerating color spaces") else {
            return Default::default();
        };

        color_spaces
            .into_iter()
            .map(|c| (c.into_raw() as u32, color_space_name(c)))
            .collect()
    }
}

impl ExtensionWrapper for ColorSpaceExtension {
    fn name(&self) -> &'static str {
        "color_space"
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

        let (functions, missing) = ColorSpaceFunctions::load(context.runtime.as_ref(), context.instance);
        if !missing.is_empty() {
            warn!("[OPENXR] Failed to initialise color space extension, missing {missing:?}");
            self.requested.disable(COLOR_SPACE);
            return;
        }
        self.functions = functions;
    }

    fn chain_system_properties(&mut self, next: *mut c_void) -> *mut c_void {
        if !self.is_enabled() {
            return next;
        }

        // Overwritten with the system's color space when the query succeeds
        self.properties.color_space = ColorSpaceFB::UNMANAGED;
        self.properties.next = next;
        self.properties.as_mut() as *mut sys::SystemColorSpacePropertiesFB as *mut c_void
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
