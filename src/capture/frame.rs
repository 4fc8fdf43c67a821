use std::fmt;

use bytes::Bytes;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

/// Pixel formats we decode, keyed by their GenICam PFNC code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelFormat {
    Mono8,
    BayerRg8,
    BayerGb8,
    BayerGr8,
    BayerBg8,
    /// Packed 4:2:2, byte order U Y0 V Y1.
    Yuv422Uyvy,
    /// Packed 4:2:2, byte order Y0 U Y1 V.
    Yuv422Yuyv,
    Rgb8,
    Bgr8,
}

impl PixelFormat {
    pub const ALL: [Self; 9] = [
        Self::Mono8,
        Self::BayerRg8,
        Self::BayerGb8,
        Self::BayerGr8,
        Self::BayerBg8,
        Self::Yuv422Uyvy,
        Self::Yuv422Yuyv,
        Self::Rgb8,
        Self::Bgr8,
    ];

    pub const fn code(self) -> u32 {
        match self {
            Self::Mono8 => 0x0108_0001,
            Self::BayerGr8 => 0x0108_0008,
            Self::BayerRg8 => 0x0108_0009,
            Self::BayerGb8 => 0x0108_000A,
            Self::BayerBg8 => 0x0108_000B,
            Self::Yuv422Uyvy => 0x0210_001F,
            Self::Yuv422Yuyv => 0x0210_0032,
            Self::Rgb8 => 0x0218_0014,
            Self::Bgr8 => 0x0218_0015,
        }
    }

    pub fn from_code(code: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|format| format.code() == code)
    }

    /// Bytes per pixel in the raw sensor buffer.
    pub const fn bytes_per_pixel(self) -> usize {
        match self {
            Self::Mono8 | Self::BayerRg8 | Self::BayerGb8 | Self::BayerGr8 | Self::BayerBg8 => 1,
            Self::Yuv422Uyvy | Self::Yuv422Yuyv => 2,
            Self::Rgb8 | Self::Bgr8 => 3,
        }
    }
}

/// Frame exactly as the driver hands it to the callback.
///
/// The borrow ties the pixel slice to the callback invocation: the driver
/// recycles the memory as soon as the callback returns, so anything that
/// outlives the call has to go through `decode`, which copies.
#[derive(Debug, Clone, Copy)]
pub struct RawFrame<'a> {
    pub width: u32,
    pub height: u32,
    /// PFNC pixel-format code, possibly one we cannot decode.
    pub pixel_format: u32,
    /// Hardware frame number reported by the device.
    pub frame_num: u32,
    pub data: &'a [u8],
}

impl RawFrame<'_> {
    pub fn byte_len(&self) -> usize {
        self.data.len()
    }
}

/// Owned, interleaved 8-bit RGB image.
#[derive(Clone, PartialEq, Eq)]
pub struct Image {
    pub width: u32,
    pub height: u32,
    pub data: Bytes,
}

impl Image {
    pub const CHANNELS: usize = 3;

    pub fn channels(&self) -> usize {
        Self::CHANNELS
    }

    /// RGB triple at `(x, y)`, or `None` outside the image.
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let offset = (y as usize * self.width as usize + x as usize) * Self::CHANNELS;
        let px = self.data.get(offset..offset + Self::CHANNELS)?;
        Some([px[0], px[1], px[2]])
    }
}

impl fmt::Debug for Image {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Image")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.data.len())
            .finish()
    }
}

/// Sequencing tags assigned when a frame enters its camera's ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameTag {
    pub camera: u32,
    /// Per-session counter, starts at 1.
    pub counter: u64,
    /// `(counter - 1) / K`
    pub trigger_cycle: u64,
    /// 1-based position inside the cycle, `1..=K`.
    pub position: u32,
    /// Ring slot the frame was written to, `position - 1`.
    pub slot: usize,
}

/// Decoded frame shared read-only between ring, disk writer and consumers.
///
/// Cloning is cheap: pixel data is reference counted and never mutated.
#[derive(Debug, Clone)]
pub struct DecodedFrame {
    pub image: Image,
    pub tag: FrameTag,
    pub frame_num: u32,
    pub captured_at: DateTime<Local>,
}

impl DecodedFrame {
    pub fn camera(&self) -> u32 {
        self.tag.camera
    }

    pub fn counter(&self) -> u64 {
        self.tag.counter
    }
}
