//! One camera's handle, configuration and streaming lifecycle.

use std::sync::Arc;

use tracing::{debug, error, info, instrument, warn};

use super::frame::RawFrame;
use super::params::AcquisitionConfig;
use super::sdk::{Sdk, SdkScope};
use super::transport::{DeviceDescriptor, DeviceHandle, Transport};
use crate::error::SessionError;
use crate::pipeline::handler::FrameHandler;

/// `Created → Configured → Grabbing ⇄ Stopped → Released`; a configuration
/// failure ends in `Failed`.
///
/// `CameraSession::open` runs `Created → Configured` in one call, so a caller
/// only ever holds a session in `Configured` or later. `Created` and `Failed`
/// show up in the `state` field of the open logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Created,
    Configured,
    Grabbing,
    Stopped,
    Released,
    Failed,
}

/// Exclusive owner of one opened device.
pub struct CameraSession<T: Transport> {
    index: u32,
    descriptor: DeviceDescriptor,
    acquisition: AcquisitionConfig,
    reset_counter_on_stop: bool,
    // Restart numbering with the first frame of the next run.
    reset_pending: bool,
    state: SessionState,
    handle: Option<T::Handle>,
    handler: Arc<FrameHandler>,
    // Keeps the SDK initialized while the handle lives.
    _sdk: Arc<SdkScope<T>>,
}

impl<T: Transport> CameraSession<T> {
    /// Create the handle, open the device exclusively and apply
    /// `acquisition` in order. The first rejected setting aborts.
    #[instrument(skip_all, fields(camera = handler.camera(), serial = %descriptor.serial))]
    pub fn open(
        sdk: &Sdk<T>,
        descriptor: DeviceDescriptor,
        acquisition: &AcquisitionConfig,
        handler: Arc<FrameHandler>,
        reset_counter_on_stop: bool,
    ) -> Result<Self, SessionError> {
        let index = handler.camera();
        let scope = sdk.scope();

        let mut handle = scope
            .transport()
            .create_handle(&descriptor)
            .map_err(|code| SessionError::HandleCreation { camera: index, code })?;
        debug!(state = ?SessionState::Created, "Camera {} handle created", index);

        if let Err(code) = handle.open_exclusive() {
            discard(handle, index);
            return Err(SessionError::OpenFailed { camera: index, code });
        }

        for setting in acquisition.parameters() {
            if let Err(code) = handle.set_param(&setting.name, &setting.value) {
                error!(
                    state = ?SessionState::Failed,
                    "Camera {} rejected {} = {:?}: {}", index, setting.name, setting.value, code
                );
                if let Err(code) = handle.close() {
                    warn!("Camera {} close after failed configuration: {}", index, code);
                }
                discard(handle, index);
                return Err(SessionError::ConfigurationError {
                    camera: index,
                    param: setting.name,
                    code,
                });
            }
        }
        info!("Camera {} configured ({})", index, descriptor);

        Ok(Self {
            index,
            descriptor,
            acquisition: acquisition.clone(),
            reset_counter_on_stop,
            reset_pending: false,
            state: SessionState::Configured,
            handle: Some(handle),
            handler,
            _sdk: scope,
        })
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn descriptor(&self) -> &DeviceDescriptor {
        &self.descriptor
    }

    pub fn acquisition(&self) -> &AcquisitionConfig {
        &self.acquisition
    }

    pub fn handler(&self) -> &Arc<FrameHandler> {
        &self.handler
    }

    fn invalid(&self, op: &'static str) -> SessionError {
        SessionError::InvalidState {
            camera: self.index,
            op,
            state: self.state,
        }
    }

    /// Register the frame callback and start streaming. On failure the
    /// session stays where it was and `start` may be retried.
    ///
    /// After a stop with `reset_counter_on_stop`, the callback is bound to a
    /// new ring epoch: numbering restarts at the first frame of this run,
    /// and frames of the previous run still in flight keep their numbers.
    #[instrument(skip(self), fields(camera = self.index))]
    pub fn start(&mut self) -> Result<(), SessionError> {
        if !matches!(self.state, SessionState::Configured | SessionState::Stopped) {
            return Err(self.invalid("start"));
        }
        let index = self.index;
        let handle = self.handle.as_mut().ok_or(SessionError::InvalidState {
            camera: index,
            op: "start",
            state: self.state,
        })?;

        let handler = Arc::clone(&self.handler);
        let epoch = handler.ring().epoch() + u64::from(self.reset_pending);
        let started = handle
            .register_frame_callback(Box::new(move |raw: RawFrame<'_>| {
                handler.on_frame_in(epoch, raw);
            }))
            .and_then(|()| handle.start_grabbing());

        if let Err(code) = started {
            error!("Camera {} failed to start grabbing: {}", index, code);
            self.handler
                .notifier()
                .status(format!("Camera {} failed to start grabbing: {}", index, code));
            return Err(SessionError::StartFailed { camera: index, code });
        }

        self.state = SessionState::Grabbing;
        self.reset_pending = false;
        info!("Camera {} started grabbing", index);
        self.handler
            .notifier()
            .status(format!("Camera {} started grabbing", index));
        Ok(())
    }

    /// Request streaming stop. One frame already in flight may still be
    /// delivered after this returns; it is numbered as part of this run.
    #[instrument(skip(self), fields(camera = self.index))]
    pub fn stop(&mut self) -> Result<(), SessionError> {
        if self.state != SessionState::Grabbing {
            return Err(self.invalid("stop"));
        }
        let index = self.index;
        if let Some(handle) = self.handle.as_mut() {
            handle
                .stop_grabbing()
                .map_err(|code| SessionError::StopFailed { camera: index, code })?;
        }

        self.state = SessionState::Stopped;
        if self.reset_counter_on_stop {
            self.reset_pending = true;
        }
        info!("Camera {} stopped grabbing", index);
        self.handler
            .notifier()
            .status(format!("Camera {} stopped grabbing", index));
        Ok(())
    }

    /// Close the device and destroy the handle, stopping first if needed.
    #[instrument(skip(self), fields(camera = self.index))]
    pub fn release(&mut self) -> Result<(), SessionError> {
        if self.state == SessionState::Released {
            return Err(self.invalid("release"));
        }
        if self.state == SessionState::Grabbing {
            if let Err(err) = self.stop() {
                warn!("{}; closing anyway", err);
            }
        }

        if let Some(mut handle) = self.handle.take() {
            if let Err(code) = handle.close() {
                warn!("Camera {} close failed: {}", self.index, code);
            }
            discard(handle, self.index);
        }
        self.state = SessionState::Released;
        info!("Camera {} released", self.index);
        Ok(())
    }
}

impl<T: Transport> Drop for CameraSession<T> {
    fn drop(&mut self) {
        if self.state != SessionState::Released {
            let _ = self.release();
        }
    }
}

fn discard<H: DeviceHandle>(handle: H, camera: u32) {
    if let Err(code) = handle.destroy() {
        warn!("Camera {} handle destroy failed: {}", camera, code);
    }
}
