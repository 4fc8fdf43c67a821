//! Error types for the capture core.
//!
//! Failures fall into four classes and each class has its own enum:
//!
//! - **Construction / start** (`RegistryError`, `SessionError`): surface to the
//!   session owner through `Result`.
//! - **Per-frame** (`DecodeError`, `PersistError`): never halt the capture
//!   callback; they are logged, counted and turned into status events.
//! - **State misuse** (`SessionError::InvalidState`): reported before any
//!   hardware call is made.
//! - **Configuration** (`ConfigError`): raised while loading `Config`.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::capture::session::SessionState;

/// Raw status code returned by the vendor transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VendorCode(pub u32);

impl VendorCode {
    /// Generic "unspecified error" code used by the SDK family.
    pub const UNKNOWN: Self = Self(0x8000_00FF);
    /// Device is already opened by another handle.
    pub const ACCESS_DENIED: Self = Self(0x8000_0203);
    /// Call made in the wrong order (e.g. start before open).
    pub const CALL_ORDER: Self = Self(0x8000_0003);
    /// Parameter not supported by the device.
    pub const NOT_SUPPORTED: Self = Self(0x8000_0004);
    /// Parameter value outside the accepted range.
    pub const PARAMETER: Self = Self(0x8000_0008);
}

impl fmt::Display for VendorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08X}", self.0)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("SDK initialization failed with code {code}")]
    SdkInit { code: VendorCode },

    #[error("No camera device found")]
    NoDeviceFound,

    #[error("Device enumeration failed with code {code}")]
    EnumerationFailed { code: VendorCode },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("Camera {camera}: failed to create device handle ({code})")]
    HandleCreation { camera: u32, code: VendorCode },

    #[error("Camera {camera}: failed to open device ({code})")]
    OpenFailed { camera: u32, code: VendorCode },

    #[error("Camera {camera}: failed to set {param} ({code})")]
    ConfigurationError {
        camera: u32,
        param: String,
        code: VendorCode,
    },

    #[error("Camera {camera}: failed to start grabbing ({code})")]
    StartFailed { camera: u32, code: VendorCode },

    #[error("Camera {camera}: failed to stop grabbing ({code})")]
    StopFailed { camera: u32, code: VendorCode },

    #[error("Camera {camera}: cannot {op} while {state:?}")]
    InvalidState {
        camera: u32,
        op: &'static str,
        state: SessionState,
    },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Unsupported pixel format: 0x{code:08x}")]
    UnsupportedPixelFormat { code: u32 },

    #[error("Invalid frame dimensions {width}x{height}")]
    InvalidDimensions { width: u32, height: u32 },

    #[error("Frame buffer too short: expected {expected} bytes, got {actual}")]
    BufferTooShort { expected: usize, actual: usize },
}

#[derive(Error, Debug)]
pub enum PersistError {
    #[error("I/O error writing {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Refusing to overwrite existing file {0}")]
    AlreadyExists(PathBuf),

    #[error("BMP encoding failed for {path}: {source}")]
    Encode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration error: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Configuration validation error: {0}")]
    Invalid(String),
}

/// Failure while bringing up the whole camera rig.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CaptureError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Session(#[from] SessionError),
}
