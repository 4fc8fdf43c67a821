//! Adapter seam between the capture core and a vendor camera SDK.
//!
//! The SDK delivers frames by invoking a registered callback on its own
//! thread. Everything the core needs from the SDK is expressed by the two
//! traits below; an FFI binding implements them once, `sim` implements them
//! for tests and demos.

use std::fmt;
use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};

use super::frame::RawFrame;
use super::params::ParamValue;
use crate::error::VendorCode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransportKind {
    GigE,
    Usb,
}

/// Which transport layers to include when enumerating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportFilter {
    pub gige: bool,
    pub usb: bool,
}

impl TransportFilter {
    pub const ALL: Self = Self {
        gige: true,
        usb: true,
    };

    pub fn accepts(&self, kind: TransportKind) -> bool {
        match kind {
            TransportKind::GigE => self.gige,
            TransportKind::Usb => self.usb,
        }
    }
}

impl Default for TransportFilter {
    fn default() -> Self {
        Self::ALL
    }
}

/// Opaque reference the vendor layer uses to find the device again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceRef(pub u64);

/// Identity of one enumerated camera. Valid for one enumeration pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceDescriptor {
    pub transport: TransportKind,
    pub model: String,
    pub serial: String,
    pub user_name: Option<String>,
    /// Current IPv4 address, GigE only.
    pub address: Option<Ipv4Addr>,
    pub device_ref: DeviceRef,
}

impl fmt::Display for DeviceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?} model - {}, serial - {}",
            self.transport, self.model, self.serial
        )?;
        if let Some(name) = &self.user_name {
            write!(f, ", name - {name}")?;
        }
        if let Some(ip) = &self.address {
            write!(f, ", ip - {ip}")?;
        }
        Ok(())
    }
}

/// Callback invoked by the driver for every delivered frame.
///
/// The `RawFrame` borrow only lives for the call.
pub type FrameCallback = Box<dyn for<'a> FnMut(RawFrame<'a>) + Send + 'static>;

/// Process-wide entry point of a vendor SDK.
pub trait Transport: Send + Sync + 'static {
    type Handle: DeviceHandle;

    /// Process-wide SDK initialization.
    fn initialize(&self) -> Result<(), VendorCode>;

    /// Process-wide SDK teardown, the counterpart of `initialize`.
    fn finalize(&self);

    /// Query the transport layers once. Opens nothing.
    fn enumerate(&self, filter: TransportFilter) -> Result<Vec<DeviceDescriptor>, VendorCode>;

    fn create_handle(&self, device: &DeviceDescriptor) -> Result<Self::Handle, VendorCode>;
}

/// One device handle as exposed by the SDK.
pub trait DeviceHandle: Send + 'static {
    /// Open with exclusive access. Fails if any other handle holds the device.
    fn open_exclusive(&mut self) -> Result<(), VendorCode>;

    fn close(&mut self) -> Result<(), VendorCode>;

    /// Set a named feature. The adapter picks the typed setter from the
    /// value variant.
    fn set_param(&mut self, name: &str, value: &ParamValue) -> Result<(), VendorCode>;

    /// Install the frame callback for the next `start_grabbing`, replacing
    /// any previous one.
    fn register_frame_callback(&mut self, callback: FrameCallback) -> Result<(), VendorCode>;

    fn start_grabbing(&mut self) -> Result<(), VendorCode>;

    /// Request streaming stop. The driver may still deliver one frame that
    /// was in flight.
    fn stop_grabbing(&mut self) -> Result<(), VendorCode>;

    /// Destroy the handle, dropping the registered callback.
    fn destroy(self) -> Result<(), VendorCode>
    where
        Self: Sized;
}
