//! Scoped SDK lifetime and device enumeration.

use std::sync::Arc;

use tracing::{info, warn};

use super::transport::{DeviceDescriptor, Transport, TransportFilter};
use crate::error::RegistryError;

pub(crate) struct SdkScope<T: Transport> {
    transport: T,
}

impl<T: Transport> SdkScope<T> {
    pub(crate) fn transport(&self) -> &T {
        &self.transport
    }
}

impl<T: Transport> Drop for SdkScope<T> {
    fn drop(&mut self) {
        self.transport.finalize();
        info!("Camera SDK finalized");
    }
}

/// Initialized vendor SDK.
///
/// Create one before any enumeration. Every `CameraSession` keeps the scope
/// alive, so the SDK is finalized only after the `Sdk` value and all sessions
/// opened through it are gone.
pub struct Sdk<T: Transport> {
    scope: Arc<SdkScope<T>>,
}

impl<T: Transport> Sdk<T> {
    pub fn initialize(transport: T) -> Result<Self, RegistryError> {
        transport
            .initialize()
            .map_err(|code| RegistryError::SdkInit { code })?;
        info!("Camera SDK initialized");
        Ok(Self {
            scope: Arc::new(SdkScope { transport }),
        })
    }

    pub fn transport(&self) -> &T {
        self.scope.transport()
    }

    /// Enumerate attached cameras on the selected transports.
    pub fn enumerate(
        &self,
        filter: TransportFilter,
    ) -> Result<Vec<DeviceDescriptor>, RegistryError> {
        let devices = self.transport().enumerate(filter).map_err(|code| {
            warn!("Device enumeration failed: {}", code);
            RegistryError::EnumerationFailed { code }
        })?;

        if devices.is_empty() {
            return Err(RegistryError::NoDeviceFound);
        }

        info!("Found {} camera(s)", devices.len());
        for (i, device) in devices.iter().enumerate() {
            info!("  [{}] {}", i, device);
        }
        Ok(devices)
    }

    pub(crate) fn scope(&self) -> Arc<SdkScope<T>> {
        Arc::clone(&self.scope)
    }
}
