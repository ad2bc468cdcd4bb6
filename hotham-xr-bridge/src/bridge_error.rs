use openxr::sys::Result as OpenXRResult;
use thiserror::Error;

/// Everything that can go wrong while bringing up or driving an OpenXR session
#[derive(Error, Debug)]
pub enum BridgeError {
    /// A runtime call returned a failure code
    #[error("There was a problem with an OpenXR operation: {0}")]
    OpenXRError(#[from] OpenXRResult),
    /// An extension we can't work without isn't offered by the runtime
    #[error("The runtime does not support the required extension {0}")]
    MissingExtension(String),
    /// The runtime doesn't offer the configured view configuration
    #[error("The runtime does not support the requested view configuration")]
    UnsupportedViewConfiguration,
    /// Only head mounted displays and handheld devices are supported
    #[error("Form factor {0} is not supported")]
    UnsupportedFormFactor(i32),
    /// The operation needs a live session
    #[error("The OpenXR session has not been initialised")]
    NotInitialised,
    /// The operation is only allowed before initialisation
    #[error("The OpenXR session is already initialised")]
    AlreadyInitialised,
    /// Action sets can only be attached once per session
    #[error("Action set {0} is already attached to the session")]
    ActionSetAlreadyAttached(String),
    /// Action sets must be attached before they're synced
    #[error("Action set {0} has not been attached to the session")]
    ActionSetNotAttached(String),
    /// The shared handle was released more often than it was acquired
    #[error("release() was called without a matching acquire()")]
    ReleaseWithoutAcquire,
    /// The declarative action configuration couldn't be parsed
    #[error("The provided configuration is invalid")]
    InvalidConfig(#[from] serde_json::Error),
    /// The OpenXR loader couldn't be found or is missing entry points
    #[error("Unable to load the OpenXR loader: {0}")]
    Loader(String),
    /// Something else
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
