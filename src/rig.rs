//! All cameras of one acquisition station, opened from one configuration.

use std::sync::Arc;

use flume::Receiver;
use tracing::{info, instrument, warn};

use crate::capture::frame::DecodedFrame;
use crate::capture::sdk::Sdk;
use crate::capture::session::CameraSession;
use crate::capture::transport::Transport;
use crate::error::{CaptureError, SessionError};
use crate::pipeline::handler::FrameHandler;
use crate::pipeline::notify::{self, Event, Notifier};
use crate::pipeline::persist::PersistenceSink;
use crate::pipeline::ringbuf::FrameRing;
use crate::utils::assign_indices;
use crate::Config;

pub struct CaptureRig<T: Transport> {
    sessions: Vec<CameraSession<T>>,
    notifier: Notifier,
}

impl<T: Transport> CaptureRig<T> {
    /// Enumerate, assign indices and open one configured session per camera.
    ///
    /// Returns the rig and the consumer end of its event queue. If any camera
    /// fails to open, the sessions opened so far are released and the error
    /// is returned.
    #[instrument(skip_all)]
    pub fn open(sdk: &Sdk<T>, config: &Config) -> Result<(Self, Receiver<Event>), CaptureError> {
        let capture = &config.capture;
        let devices = sdk.enumerate(capture.transports)?;
        let (notifier, rx) = notify::channel(capture.event_capacity);

        let mut sessions = Vec::new();
        let mut summary = Vec::new();
        for (index, descriptor) in assign_indices(devices, &capture.camera_order) {
            let ring = Arc::new(FrameRing::new(index, capture.ring_slots));
            let sink = capture
                .save_images
                .then(|| PersistenceSink::new(&capture.save_dir, capture.naming.clone()));
            let handler = Arc::new(FrameHandler::new(ring, sink, notifier.clone()));

            summary.push(format!("camera {}: {}", index, descriptor));
            sessions.push(CameraSession::open(
                sdk,
                descriptor,
                &config.acquisition,
                handler,
                capture.reset_counter_on_stop,
            )?);
        }

        info!("Opened {} camera session(s)", sessions.len());
        notifier.status(summary.join("\n"));
        Ok((Self { sessions, notifier }, rx))
    }

    /// Start every session. A camera that fails to start does not prevent
    /// the others; its error is returned for the caller to retry.
    pub fn start_all(&mut self) -> Vec<(u32, SessionError)> {
        self.each("start", CameraSession::start)
    }

    pub fn stop_all(&mut self) -> Vec<(u32, SessionError)> {
        self.each("stop", CameraSession::stop)
    }

    /// Release every session, stopping those still grabbing.
    pub fn release_all(mut self) -> Vec<(u32, SessionError)> {
        let failures = self.each("release", CameraSession::release);
        self.notifier.status("All cameras released");
        failures
    }

    fn each(
        &mut self,
        op: &str,
        mut f: impl FnMut(&mut CameraSession<T>) -> Result<(), SessionError>,
    ) -> Vec<(u32, SessionError)> {
        let mut failures = Vec::new();
        for session in &mut self.sessions {
            if let Err(err) = f(session) {
                warn!("{} failed: {}", op, err);
                failures.push((session.index(), err));
            }
        }
        failures
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn sessions(&self) -> &[CameraSession<T>] {
        &self.sessions
    }

    pub fn session(&self, camera: u32) -> Option<&CameraSession<T>> {
        self.sessions.iter().find(|s| s.index() == camera)
    }

    pub fn session_mut(&mut self, camera: u32) -> Option<&mut CameraSession<T>> {
        self.sessions.iter_mut().find(|s| s.index() == camera)
    }

    pub fn ring(&self, camera: u32) -> Option<&Arc<FrameRing>> {
        self.session(camera).map(|s| s.handler().ring())
    }

    /// The frame currently held in `slot` of `camera`'s ring.
    pub fn snapshot(&self, camera: u32, slot: usize) -> Option<DecodedFrame> {
        self.ring(camera)?.snapshot(slot)
    }

    /// The most recently stored frame of `camera`.
    pub fn latest(&self, camera: u32) -> Option<DecodedFrame> {
        self.ring(camera)?.latest()
    }
}
