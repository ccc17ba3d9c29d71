use thiserror::Error;

use crate::backend::{BackendError, FeatureLevel};
use crate::device::DeviceState;
use crate::lock::LockTimeout;

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error(transparent)]
    LockTimeout(#[from] LockTimeout),

    #[error("{operation} requires state {expected:?} but the manager is in {found:?}")]
    InvalidStateTransition {
        operation: &'static str,
        expected: DeviceState,
        found: DeviceState,
    },

    #[error("failed to create the graphics device: {0}")]
    DeviceCreationFailed(#[source] BackendError),

    #[error("feature level {found} is below the required {required}")]
    UnsupportedCapabilityLevel {
        required: FeatureLevel,
        found: FeatureLevel,
    },

    #[error("{sample_count}x multisampling is not supported for the back buffer format")]
    MultisampleUnsupported { sample_count: u32 },

    #[error("multisampling was requested before the device was queried for support")]
    MultisampleNotQueried,

    #[error("output window handle is null")]
    InvalidWindowHandle,

    #[error("invalid client dimensions {width}x{height}")]
    InvalidDimensions { width: u32, height: u32 },

    #[error("failed to create {resource}: {source}")]
    ResourceCreationFailed {
        resource: &'static str,
        #[source]
        source: BackendError,
    },

    #[error("resize failed while {stage}: {source}")]
    ResizeFailed {
        stage: &'static str,
        #[source]
        source: BackendError,
    },

    #[error("failed to present: {0}")]
    PresentFailed(#[source] BackendError),

    #[error("{resource} is missing although its state was reached")]
    MissingResource { resource: &'static str },
}

impl DeviceError {
    /// Only a lock timeout is worth retrying; everything else is a caller bug or fatal for
    /// the manager instance.
    pub fn is_transient(&self) -> bool {
        matches!(self, DeviceError::LockTimeout(_))
    }
}
