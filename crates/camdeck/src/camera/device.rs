//! Camera device abstraction.
//!
//! A [`DeviceProvider`] opens the physical (or simulated) camera and hands
//! back a [`CameraDevice`]. The session never touches a device directly: it
//! wraps it in a [`DeviceLease`], which guarantees the device is released
//! exactly once no matter how the lease goes out of scope, or when a stuck
//! lease is abandoned through its [`ReleaseHandle`].
//!
//! All device methods are blocking. Callers run them on the blocking pool.

use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, warn};

/// Errors reported by camera devices.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeviceError {
    /// The device is already held elsewhere in this process.
    #[error("camera device '{0}' is busy")]
    Busy(String),

    /// The device could not be opened.
    #[error("failed to open camera device: {0}")]
    OpenFailed(String),

    /// Reading a frame failed.
    #[error("failed to read frame: {0}")]
    ReadFailed(String),

    /// Releasing the device failed.
    #[error("failed to release camera device: {0}")]
    ReleaseFailed(String),

    /// The capture loop did not exit in time and was aborted.
    #[error("capture loop did not stop within {timeout_ms} ms; device release forced")]
    StopTimedOut {
        /// The timeout that elapsed.
        timeout_ms: u64,
    },

    /// The capture task panicked or was cancelled.
    #[error("capture task failed: {0}")]
    TaskFailed(String),
}

/// Result type for device operations.
pub type Result<T> = std::result::Result<T, DeviceError>;

/// An opened camera.
pub trait CameraDevice: Send + Debug {
    /// Read and encode the next frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the device can no longer produce frames.
    fn read_frame(&mut self) -> Result<Vec<u8>>;

    /// Close the device.
    ///
    /// # Errors
    ///
    /// Returns an error if the device could not be closed cleanly.
    fn release(&mut self) -> Result<()>;
}

/// Opens camera devices.
pub trait DeviceProvider: Send + Sync + Debug {
    /// Name of the source (for logging).
    fn name(&self) -> &'static str;

    /// Acquire the device.
    ///
    /// # Errors
    ///
    /// Returns [`DeviceError::Busy`] if the device is already held, or
    /// [`DeviceError::OpenFailed`] if it cannot be opened.
    fn open(&self) -> Result<Box<dyn CameraDevice>>;

    /// Give up ownership of an open device without touching it.
    ///
    /// Used when the device is stuck inside a blocking call. The stuck
    /// device's own `release` is never called afterwards.
    fn force_release(&self) {}
}

/// Scoped ownership of an opened device.
///
/// The device is released by [`DeviceLease::release`], by a
/// [`ReleaseHandle`], or, failing both, when the lease is dropped. Whichever
/// comes first wins; the release happens once.
#[derive(Debug)]
pub struct DeviceLease {
    provider: Arc<dyn DeviceProvider>,
    device: Option<Box<dyn CameraDevice>>,
    released: Arc<AtomicBool>,
}

impl DeviceLease {
    /// Open a device from `provider`.
    ///
    /// # Errors
    ///
    /// Propagates the provider's open error.
    pub fn acquire(provider: &Arc<dyn DeviceProvider>) -> Result<Self> {
        let device = provider.open()?;
        debug!(source = provider.name(), "Camera device acquired");
        Ok(Self {
            provider: Arc::clone(provider),
            device: Some(device),
            released: Arc::new(AtomicBool::new(false)),
        })
    }

    /// A handle that can release the device while the lease is busy
    /// elsewhere.
    #[must_use]
    pub fn release_handle(&self) -> ReleaseHandle {
        ReleaseHandle {
            provider: Arc::clone(&self.provider),
            released: Arc::clone(&self.released),
        }
    }

    /// Whether the device has been released, by this lease or its handle.
    #[must_use]
    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    /// Read the next frame.
    ///
    /// # Errors
    ///
    /// Returns the device's read error, or [`DeviceError::ReadFailed`] if the
    /// lease was already released.
    pub fn read_frame(&mut self) -> Result<Vec<u8>> {
        match self.device.as_mut() {
            Some(device) if !self.released.load(Ordering::SeqCst) => device.read_frame(),
            _ => Err(DeviceError::ReadFailed("device already released".to_string())),
        }
    }

    /// Release the device now and report the outcome.
    ///
    /// # Errors
    ///
    /// Returns the device's release error.
    pub fn release(mut self) -> Result<()> {
        self.release_inner()
    }

    fn release_inner(&mut self) -> Result<()> {
        let Some(mut device) = self.device.take() else {
            return Ok(());
        };
        if self.released.swap(true, Ordering::SeqCst) {
            debug!(
                source = self.provider.name(),
                "Camera device was force-released, dropping it"
            );
            return Ok(());
        }
        let result = device.release();
        match &result {
            Ok(()) => debug!(source = self.provider.name(), "Camera device released"),
            Err(e) => {
                warn!(source = self.provider.name(), error = %e, "Camera device release failed");
            }
        }
        result
    }
}

/// Releases a lease's device from outside the lease.
#[derive(Debug, Clone)]
pub struct ReleaseHandle {
    provider: Arc<dyn DeviceProvider>,
    released: Arc<AtomicBool>,
}

impl ReleaseHandle {
    /// Give up the device through the provider, unless the lease already
    /// released it. Returns whether this call did the release.
    pub fn force(&self) -> bool {
        if self.released.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.provider.force_release();
        warn!(source = self.provider.name(), "Camera device force-released");
        true
    }
}

impl Drop for DeviceLease {
    fn drop(&mut self) {
        let _ = self.release_inner();
    }
}
