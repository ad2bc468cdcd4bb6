use log::{info, warn};
use openxr::sys::{self, pfn};

use super::{ExtensionWrapper, RequestedExtensions, RuntimeBinding, SessionContext};
use crate::runtime::{cvt, enumerate, proc_table::proc_table, XrEvent};

const DISPLAY_REFRESH_RATE: &str = "XR_FB_display_refresh_rate";

proc_table! {
    pub(crate) struct DisplayRefreshRateFunctions {
        enumerate_display_refresh_rates: pfn::EnumerateDisplayRefreshRatesFB = "xrEnumerateDisplayRefreshRatesFB",
        get_display_refresh_rate: pfn::GetDisplayRefreshRateFB = "xrGetDisplayRefreshRateFB",
        request_display_refresh_rate: pfn::RequestDisplayRefreshRateFB = "xrRequestDisplayRefreshRateFB",
    }
}

/// `XR_FB_display_refresh_rate`
pub struct DisplayRefreshRateExtension {
    requested: RequestedExtensions,
    functions: DisplayRefreshRateFunctions,
    binding: RuntimeBinding,
}

impl Default for DisplayRefreshRateExtension {
    fn default() -> Self {
        Self {
            requested: RequestedExtensions::new(&[DISPLAY_REFRESH_RATE]),
            functions: Default::default(),
            binding: Default::default(),
        }
    }
}

impl DisplayRefreshRateExtension {
    /// Is the extension enabled?
    pub fn is_enabled(&self) -> bool {
        self.requested.is_enabled(DISPLAY_REFRESH_RATE)
    }

    /// The display's current refresh rate, or 0.0 if unknown
    pub fn get_refresh_rate(&self) -> f64 {
        let Some(get_display_refresh_rate) = self
            .functions
            .get_display_refresh_rate
            .filter(|_| self.is_enabled())
        else {
            return 0.;
        };

        let mut rate = 0.;
        let result = cvt(unsafe { get_display_refresh_rate(self.binding.session, &mut rate) });
        match self.binding.check(result, "Getting the refresh rate") {
            Some(_) => rate as f64,
            None => 0.,
        }
    }

    /// Request a new refresh rate
    pub fn set_refresh_rate(&self, refresh_rate: f64) -> bool {
        let Some(request_display_refresh_rate) = self
            .functions
            .request_display_refresh_rate
            .filter(|_| self.is_enabled())
        else {
            return false;
        };

        let result = cvt(unsafe {
            request_display_refresh_rate(self.binding.session, refresh_rate as f32)
        });
        self.binding.check(result, "Setting the refresh rate").is_some()
    }

    /// Every refresh rate the display supports. Empty when the extension is off.
    pub fn get_available_refresh_rates(&self) -> Vec<f64> {
        let Some(enumerate_display_refresh_rates) = self
            .functions
            .enumerate_display_refresh_rates
            .filter(|_| self.is_enabled())
        else {
            return Vec::new();
        };

        let session = self.binding.session;
        let result = enumerate(0_f32, |capacity, count, buffer| unsafe {
            enumerate_display_refresh_rates(session, capacity, count, buffer)
        });
        self.binding
            .check(result, "Enumerating refresh rates")
            .unwrap_or_default()
            .into_iter()
            .map(f64::from)
            .collect()
    }
}

impl ExtensionWrapper for DisplayRefreshRateExtension {
    fn name(&self) -> &'static str {
        "display_refresh_rate"
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

        let (functions, missing) =
            DisplayRefreshRateFunctions::load(context.runtime.as_ref(), context.instance);
        if !missing.is_empty() {
            warn!("[OPENXR] Failed to initialise display refresh rate extension, missing {missing:?}");
            self.requested.disable(DISPLAY_REFRESH_RATE);
            return;
        }
        self.functions = functions;
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

    fn on_event_polled(&mut self, _context: &SessionContext<'_>, event: &XrEvent) -> bool {
        match event {
            XrEvent::DisplayRefreshRateChanged { from, to } => {
                info!("[OPENXR] Display refresh rate changed from {from} to {to}");
                true
            }
            _ => false,
        }
    }
}
