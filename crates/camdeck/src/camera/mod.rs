//! Camera control.
//!
//! [`CameraSession`] is the state machine; device sources live in
//! [`synthetic`] and [`directory`], behind the traits in [`device`].

pub mod device;
pub mod directory;
pub mod frame;
pub mod session;
pub mod synthetic;

use std::sync::Arc;

pub use device::{CameraDevice, DeviceError, DeviceLease, DeviceProvider, ReleaseHandle};
pub use directory::DirectoryCamera;
pub use frame::Frame;
pub use session::{
    CameraFault, CameraSession, CameraState, CaptureSettings, CommandResult, SessionStatus,
    Snapshot,
};
pub use synthetic::SyntheticCamera;

use crate::config::{CameraConfig, CameraSource};
use crate::error::{Error, Result};

/// Build the device provider selected by configuration.
///
/// # Errors
///
/// Returns a validation error if the `directory` source has no directory.
pub fn provider_from_config(config: &CameraConfig) -> Result<Arc<dyn DeviceProvider>> {
    match config.source {
        CameraSource::Synthetic => Ok(Arc::new(SyntheticCamera::from_config(config))),
        CameraSource::Directory => {
            let root = config.directory.as_ref().ok_or_else(|| {
                Error::config_validation("camera.directory is required for the directory source")
            })?;
            Ok(Arc::new(DirectoryCamera::new(root)))
        }
    }
}
