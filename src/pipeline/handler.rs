//! The "frame arrived" entry point run on the driver's callback thread.

use std::sync::Arc;

use chrono::Local;
use tracing::{debug, warn};

use super::notify::Notifier;
use super::persist::PersistenceSink;
use super::ringbuf::FrameRing;
use crate::capture::decoder;
use crate::capture::frame::{FrameTag, RawFrame};

/// Per-camera chain: decode, ring update, disk write, notification.
pub struct FrameHandler {
    camera: u32,
    ring: Arc<FrameRing>,
    sink: Option<PersistenceSink>,
    notifier: Notifier,
}

impl FrameHandler {
    pub fn new(
        ring: Arc<FrameRing>,
        sink: Option<PersistenceSink>,
        notifier: Notifier,
    ) -> Self {
        Self {
            camera: ring.camera(),
            ring,
            sink,
            notifier,
        }
    }

    pub fn camera(&self) -> u32 {
        self.camera
    }

    pub fn ring(&self) -> &Arc<FrameRing> {
        &self.ring
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    /// Handle one delivered frame. Per-frame failures are logged and turned
    /// into status events; they never propagate to the driver.
    ///
    /// Returns the tag of the stored frame, or `None` if it was dropped.
    pub fn on_frame(&self, raw: RawFrame<'_>) -> Option<FrameTag> {
        self.process(None, raw)
    }

    /// `on_frame` for a frame delivered during ring epoch `epoch`. Frames
    /// from an epoch the ring has left are dropped silently.
    pub fn on_frame_in(&self, epoch: u64, raw: RawFrame<'_>) -> Option<FrameTag> {
        self.process(Some(epoch), raw)
    }

    fn process(&self, epoch: Option<u64>, raw: RawFrame<'_>) -> Option<FrameTag> {
        let captured_at = Local::now();
        let camera = self.camera.to_string();

        let image = match decoder::decode(&raw) {
            Ok(image) => image,
            Err(err) => {
                warn!("Camera {} dropped frame {}: {}", self.camera, raw.frame_num, err);
                metrics::counter!(
                    "frames_dropped_total",
                    "camera" => camera,
                    "reason" => "decode"
                )
                .increment(1);
                self.notifier.status(format!(
                    "Camera {} dropped frame {}: {}",
                    self.camera, raw.frame_num, err
                ));
                return None;
            }
        };
        metrics::counter!("frames_decoded_total", "camera" => camera.clone()).increment(1);

        let frame = match epoch {
            None => self.ring.push(image, raw.frame_num, captured_at),
            Some(epoch) => match self.ring.push_in(epoch, image, raw.frame_num, captured_at) {
                Some(frame) => frame,
                None => {
                    debug!("Camera {} dropped stale frame {}", self.camera, raw.frame_num);
                    metrics::counter!(
                        "frames_dropped_total",
                        "camera" => camera,
                        "reason" => "stale"
                    )
                    .increment(1);
                    return None;
                }
            },
        };
        debug!(
            "Camera {} frame {} -> counter {} (cycle {}, fn {})",
            self.camera,
            raw.frame_num,
            frame.tag.counter,
            frame.tag.trigger_cycle,
            frame.tag.position
        );

        let written = self.sink.as_ref().and_then(|sink| match sink.save(&frame) {
            Ok(path) => {
                metrics::counter!("frames_saved_total", "camera" => camera.clone()).increment(1);
                path.file_name().map(|name| name.to_string_lossy().into_owned())
            }
            Err(err) => {
                warn!(
                    "Camera {} failed to save frame {}: {}",
                    self.camera, frame.tag.counter, err
                );
                metrics::counter!(
                    "frames_dropped_total",
                    "camera" => camera.clone(),
                    "reason" => "save"
                )
                .increment(1);
                self.notifier.status(format!(
                    "Camera {} failed to save frame {}: {}",
                    self.camera, frame.tag.counter, err
                ));
                None
            }
        });

        self.notifier.frame_ready(&frame);
        if let Some(name) = written {
            self.notifier.file_written(name);
        }
        self.notifier.trigger_cycle(self.camera, frame.tag.trigger_cycle);

        Some(frame.tag)
    }
}
