pub mod decoder;
pub mod frame;
pub mod params;
pub mod sdk;
pub mod session;
pub mod sim;
pub mod transport;

pub use frame::{DecodedFrame, FrameTag, Image, PixelFormat, RawFrame};
pub use params::AcquisitionConfig;
pub use sdk::Sdk;
pub use session::{CameraSession, SessionState};
pub use sim::{SimCamera, SimTransport};
pub use transport::{DeviceDescriptor, DeviceHandle, Transport, TransportFilter, TransportKind};
