#![deny(missing_docs)]
#![allow(clippy::missing_safety_doc)]

//! Drives an OpenXR session on behalf of a game engine's stereo rendering interface.
//!
//! The engine talks to an [`interface::XrInterface`], which shares a single
//! [`openxr_api::OpenXrApi`] session manager with any number of [`interface::OpenXrConfig`]
//! objects through a reference counted [`shared::SharedHandle`]. The session manager owns the
//! OpenXR instance, session, spaces, swapchains and action sets and runs the per frame
//! wait / locate / begin / render / end protocol. Optional runtime capabilities plug into that
//! pipeline as [`extensions::ExtensionWrapper`]s.
//!
//! Every call into the runtime goes through the [`runtime::XrRuntime`] trait; [`runtime::LoaderRuntime`]
//! is the implementation backed by the system's OpenXR loader.

pub use openxr as xr;

pub use bridge_error::BridgeError;
pub use openxr_api::{OpenXrApi, OpenXrApiBuilder, SessionConfig};

/// Typed access to controller input
pub mod actions;
mod bridge_error;
/// Optional runtime capabilities
pub mod extensions;
/// The adapter the host engine drives, and its configuration object
pub mod interface;
/// The session manager
pub mod openxr_api;
pub mod runtime;
/// Reference counted access to the session manager
pub mod shared;
/// Kitchen sink math helpers
pub mod util;

/// Bridge result type
pub type BridgeResult<T> = std::result::Result<T, BridgeError>;

/// OpenXR view type used unless the session config asks for another
pub const VIEW_TYPE: xr::sys::ViewConfigurationType = xr::sys::ViewConfigurationType::PRIMARY_STEREO;

/// OpenXR blend mode
pub const BLEND_MODE: xr::sys::EnvironmentBlendMode = xr::sys::EnvironmentBlendMode::OPAQUE;

/// Install `env_logger` with a `Debug` default filter. Safe to call more than once.
pub fn init_logging() {
    let _ = env_logger::builder()
        .filter_level(log::LevelFilter::Debug)
        .try_init();
}
