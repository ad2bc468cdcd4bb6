use log::{debug, warn};
use openxr::sys::{pfn, PerfSettingsDomainEXT, PerfSettingsLevelEXT};

use super::{ExtensionWrapper, RequestedExtensions, RuntimeBinding, SessionContext};
use crate::runtime::{cvt, proc_table::proc_table, XrEvent};

const PERFORMANCE_SETTINGS: &str = "XR_EXT_performance_settings";

/// Level applied to both domains until told otherwise
pub const DEFAULT_PERF_SETTINGS_LEVEL: PerfSettingsLevelEXT = PerfSettingsLevelEXT::SUSTAINED_HIGH;

proc_table! {
    pub(crate) struct PerformanceSettingsFunctions {
        set_performance_level: pfn::PerfSettingsSetPerformanceLevelEXT = "xrPerfSettingsSetPerformanceLevelEXT",
    }
}

/// `XR_EXT_performance_settings`: CPU and GPU performance levels.
///
/// The chosen levels are (re)applied every time the session becomes ready.
pub struct PerformanceSettingsExtension {
    requested: RequestedExtensions,
    functions: PerformanceSettingsFunctions,
    binding: RuntimeBinding,
    cpu_level: PerfSettingsLevelEXT,
    gpu_level: PerfSettingsLevelEXT,
}

impl Default for PerformanceSettingsExtension {
    fn default() -> Self {
        Self {
            requested: RequestedExtensions::new(&[PERFORMANCE_SETTINGS]),
            functions: Default::default(),
            binding: Default::default(),
            cpu_level: DEFAULT_PERF_SETTINGS_LEVEL,
            gpu_level: DEFAULT_PERF_SETTINGS_LEVEL,
        }
    }
}

impl PerformanceSettingsExtension {
    /// Is the extension enabled?
    pub fn is_enabled(&self) -> bool {
        self.requested.is_enabled(PERFORMANCE_SETTINGS)
    }

    /// The last CPU level the runtime accepted
    pub fn cpu_level(&self) -> PerfSettingsLevelEXT {
        self.cpu_level
    }

    /// The last GPU level the runtime accepted
    pub fn gpu_level(&self) -> PerfSettingsLevelEXT {
        self.gpu_level
    }

    /// Set the CPU level; only remembered if the runtime accepts it
    pub fn set_cpu_level(&mut self, level: PerfSettingsLevelEXT) -> bool {
        if !self.update_level(PerfSettingsDomainEXT::CPU, level) {
            return false;
        }
        self.cpu_level = level;
        true
    }

    /// Set the GPU level; only remembered if the runtime accepts it
    pub fn set_gpu_level(&mut self, level: PerfSettingsLevelEXT) -> bool {
        if !self.update_level(PerfSettingsDomainEXT::GPU, level) {
            return false;
        }
        self.gpu_level = level;
        true
    }

    fn update_level(&self, domain: PerfSettingsDomainEXT, level: PerfSettingsLevelEXT) -> bool {
        let Some(set_performance_level) = self
            .functions
            .set_performance_level
            .filter(|_| self.is_enabled() && self.binding.has_session())
        else {
            return false;
        };

        let result = cvt(unsafe { set_performance_level(self.binding.session, domain, level) });
        self.binding
            .check(
                result,
                &format!("Setting performance domain {domain:?} to level {level:?}"),
            )
            .is_some()
    }
}

impl ExtensionWrapper for PerformanceSettingsExtension {
    fn name(&self) -> &'static str {
        "performance_settings"
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
            PerformanceSettingsFunctions::load(context.runtime.as_ref(), context.instance);
        if !missing.is_empty() {
            warn!("[OPENXR] Failed to initialise performance settings extension, missing {missing:?}");
            self.requested.disable(PERFORMANCE_SETTINGS);
            return;
        }
        self.functions = functions;
    }

    fn on_session_initialized(&mut self, context: &SessionContext<'_>) {
        self.binding.bind_session(context);
    }

    fn on_state_ready(&mut self, _context: &SessionContext<'_>) {
        if !self.is_enabled() {
            return;
        }
        self.set_cpu_level(self.cpu_level);
        self.set_gpu_level(self.gpu_level);
    }

    fn on_session_destroyed(&mut self, _context: &SessionContext<'_>) {
        self.binding.unbind_session();
    }

    fn on_instance_destroyed(&mut self) {
        self.requested.clear();
        self.functions = Default::default();
        self.binding.unbind();
        self.cpu_level = DEFAULT_PERF_SETTINGS_LEVEL;
        self.gpu_level = DEFAULT_PERF_SETTINGS_LEVEL;
    }

    fn on_event_polled(&mut self, _context: &SessionContext<'_>, event: &XrEvent) -> bool {
        match event {
            XrEvent::PerfSettings {
                domain,
                sub_domain,
                from_level,
                to_level,
            } => {
                debug!(
                    "[OPENXR] Performance notification for {domain:?} / {sub_domain:?}: {from_level:?} -> {to_level:?}"
                );
                true
            }
            _ => false,
        }
    }
}
