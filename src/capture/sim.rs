//! Simulated trigger-driven transport for testing and demos without hardware.
//!
//! Each grabbing handle owns a worker thread standing in for the driver's
//! callback thread. `SimTransport::fire_trigger` sends one pulse to every
//! grabbing camera; each pulse yields `AcquisitionBurstFrameCount` frames.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use crossbeam::channel::{self, Sender};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::frame::{PixelFormat, RawFrame};
use super::params::ParamValue;
use super::transport::{
    DeviceDescriptor, DeviceHandle, DeviceRef, FrameCallback, Transport, TransportFilter,
    TransportKind,
};
use crate::error::VendorCode;

/// One simulated device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimCamera {
    pub model: String,
    pub serial: String,
    pub transport: TransportKind,
    pub width: u32,
    pub height: u32,
    pub pixel_format: PixelFormat,
    /// Report this code instead of `pixel_format`'s, e.g. to exercise
    /// unsupported formats.
    pub format_code_override: Option<u32>,
    /// Feature name the device rejects.
    pub reject_param: Option<String>,
    /// Number of `start_grabbing` calls that fail before one succeeds.
    pub failed_starts: usize,
}

impl Default for SimCamera {
    fn default() -> Self {
        Self {
            model: "SIM-CA050-10GC".into(),
            serial: "SIM00000".into(),
            transport: TransportKind::GigE,
            width: 64,
            height: 48,
            pixel_format: PixelFormat::BayerRg8,
            format_code_override: None,
            reject_param: None,
            failed_starts: 0,
        }
    }
}

impl SimCamera {
    pub fn new(serial: impl Into<String>, pixel_format: PixelFormat) -> Self {
        Self {
            serial: serial.into(),
            pixel_format,
            ..Self::default()
        }
    }
}

#[derive(Default)]
struct SimState {
    initialized: bool,
    enumerate_error: Option<VendorCode>,
    opened: HashMap<u64, bool>,
    triggers: HashMap<u64, Sender<()>>,
    applied: Vec<(String, String, ParamValue)>,
    start_failures: HashMap<u64, usize>,
}

struct Shared {
    cameras: Vec<SimCamera>,
    state: Mutex<SimState>,
    live_handles: AtomicUsize,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Cloneable simulated SDK. Clones share the same devices.
#[derive(Clone)]
pub struct SimTransport {
    shared: Arc<Shared>,
}

impl SimTransport {
    pub fn new(cameras: Vec<SimCamera>) -> Self {
        let start_failures = cameras
            .iter()
            .enumerate()
            .map(|(i, cam)| (i as u64, cam.failed_starts))
            .collect();
        Self {
            shared: Arc::new(Shared {
                cameras,
                state: Mutex::new(SimState {
                    start_failures,
                    ..SimState::default()
                }),
                live_handles: AtomicUsize::new(0),
            }),
        }
    }

    /// Send one trigger pulse to every grabbing camera. Returns how many
    /// cameras received it.
    pub fn fire_trigger(&self) -> usize {
        let state = self.shared.lock();
        state
            .triggers
            .values()
            .filter(|tx| tx.send(()).is_ok())
            .count()
    }

    /// Make the next enumerations fail with `code`.
    pub fn fail_enumeration(&self, code: Option<VendorCode>) {
        self.shared.lock().enumerate_error = code;
    }

    pub fn is_initialized(&self) -> bool {
        self.shared.lock().initialized
    }

    /// Handles created and not yet destroyed.
    pub fn live_handles(&self) -> usize {
        self.shared.live_handles.load(Ordering::SeqCst)
    }

    /// Devices currently opened.
    pub fn open_devices(&self) -> usize {
        self.shared.lock().opened.values().filter(|open| **open).count()
    }

    /// Feature writes received by the device with `serial`, in order.
    pub fn applied_params(&self, serial: &str) -> Vec<(String, ParamValue)> {
        self.shared
            .lock()
            .applied
            .iter()
            .filter(|(s, _, _)| s == serial)
            .map(|(_, name, value)| (name.clone(), value.clone()))
            .collect()
    }
}

impl Transport for SimTransport {
    type Handle = SimHandle;

    fn initialize(&self) -> Result<(), VendorCode> {
        self.shared.lock().initialized = true;
        Ok(())
    }

    fn finalize(&self) {
        self.shared.lock().initialized = false;
    }

    fn enumerate(&self, filter: TransportFilter) -> Result<Vec<DeviceDescriptor>, VendorCode> {
        let state = self.shared.lock();
        if !state.initialized {
            return Err(VendorCode::CALL_ORDER);
        }
        if let Some(code) = state.enumerate_error {
            return Err(code);
        }
        Ok(self
            .shared
            .cameras
            .iter()
            .enumerate()
            .filter(|(_, cam)| filter.accepts(cam.transport))
            .map(|(i, cam)| DeviceDescriptor {
                transport: cam.transport,
                model: cam.model.clone(),
                serial: cam.serial.clone(),
                user_name: None,
                address: (cam.transport == TransportKind::GigE)
                    .then(|| Ipv4Addr::new(192, 168, 1, (10 + i) as u8)),
                device_ref: DeviceRef(i as u64),
            })
            .collect())
    }

    fn create_handle(&self, device: &DeviceDescriptor) -> Result<SimHandle, VendorCode> {
        let id = device.device_ref.0;
        let camera = self
            .shared
            .cameras
            .get(id as usize)
            .cloned()
            .ok_or(VendorCode::UNKNOWN)?;
        self.shared.live_handles.fetch_add(1, Ordering::SeqCst);
        Ok(SimHandle {
            id,
            camera,
            shared: Arc::clone(&self.shared),
            opened: false,
            destroyed: false,
            burst: 1,
            callback: None,
            worker: None,
        })
    }
}

/// Simulated device handle.
pub struct SimHandle {
    id: u64,
    camera: SimCamera,
    shared: Arc<Shared>,
    opened: bool,
    destroyed: bool,
    burst: u32,
    // Registered callback, handed to the worker by the next start.
    callback: Option<FrameCallback>,
    worker: Option<JoinHandle<()>>,
}

impl SimHandle {
    fn spawn_worker(&mut self) -> Result<Sender<()>, VendorCode> {
        let (tx, rx) = channel::unbounded::<()>();
        // A worker keeps the callback it was started with, so frames of a
        // stopped run never reach a callback registered after it.
        let mut callback = self.callback.take();
        let camera = self.camera.clone();
        let burst = self.burst.max(1);

        let worker = thread::Builder::new()
            .name(format!("sim-cam-{}", camera.serial))
            .spawn(move || {
                let mut frame_num = 0u32;
                for () in rx.iter() {
                    for _ in 0..burst {
                        frame_num += 1;
                        let data = test_pattern(&camera, frame_num);
                        let raw = RawFrame {
                            width: camera.width,
                            height: camera.height,
                            pixel_format: camera
                                .format_code_override
                                .unwrap_or_else(|| camera.pixel_format.code()),
                            frame_num,
                            data: &data,
                        };
                        if let Some(cb) = callback.as_mut() {
                            cb(raw);
                        }
                    }
                }
                debug!("Simulated camera {} worker finished", camera.serial);
            })
            .map_err(|err| {
                warn!("Failed to spawn simulated camera worker: {}", err);
                VendorCode::UNKNOWN
            })?;

        // A previous worker has already been told to stop; let it finish.
        if let Some(previous) = self.worker.replace(worker) {
            let _ = previous.join();
        }
        Ok(tx)
    }
}

impl DeviceHandle for SimHandle {
    fn open_exclusive(&mut self) -> Result<(), VendorCode> {
        let mut state = self.shared.lock();
        let opened = state.opened.entry(self.id).or_insert(false);
        if *opened {
            return Err(VendorCode::ACCESS_DENIED);
        }
        *opened = true;
        self.opened = true;
        Ok(())
    }

    fn close(&mut self) -> Result<(), VendorCode> {
        if !self.opened {
            return Err(VendorCode::CALL_ORDER);
        }
        let mut state = self.shared.lock();
        state.triggers.remove(&self.id);
        state.opened.insert(self.id, false);
        self.opened = false;
        Ok(())
    }

    fn set_param(&mut self, name: &str, value: &ParamValue) -> Result<(), VendorCode> {
        if !self.opened {
            return Err(VendorCode::CALL_ORDER);
        }
        if self.camera.reject_param.as_deref() == Some(name) {
            return Err(VendorCode::NOT_SUPPORTED);
        }
        if name == "AcquisitionBurstFrameCount" {
            match value {
                ParamValue::Int(n) if *n >= 1 => {
                    self.burst = u32::try_from(*n).unwrap_or(u32::MAX)
                }
                _ => return Err(VendorCode::PARAMETER),
            }
        }
        self.shared
            .lock()
            .applied
            .push((self.camera.serial.clone(), name.to_string(), value.clone()));
        Ok(())
    }

    fn register_frame_callback(&mut self, callback: FrameCallback) -> Result<(), VendorCode> {
        if !self.opened {
            return Err(VendorCode::CALL_ORDER);
        }
        self.callback = Some(callback);
        Ok(())
    }

    fn start_grabbing(&mut self) -> Result<(), VendorCode> {
        if !self.opened {
            return Err(VendorCode::CALL_ORDER);
        }
        {
            let mut state = self.shared.lock();
            if let Some(remaining) = state.start_failures.get_mut(&self.id) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(VendorCode::UNKNOWN);
                }
            }
        }
        let tx = self.spawn_worker()?;
        self.shared.lock().triggers.insert(self.id, tx);
        Ok(())
    }

    fn stop_grabbing(&mut self) -> Result<(), VendorCode> {
        // Dropping the sender ends the worker once it drains queued pulses.
        self.shared.lock().triggers.remove(&self.id);
        Ok(())
    }

    fn destroy(mut self) -> Result<(), VendorCode> {
        self.teardown();
        Ok(())
    }
}

impl SimHandle {
    fn teardown(&mut self) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;
        {
            let mut state = self.shared.lock();
            state.triggers.remove(&self.id);
            if self.opened {
                state.opened.insert(self.id, false);
                self.opened = false;
            }
        }
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
        self.callback = None;
        self.shared.live_handles.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Drop for SimHandle {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Deterministic pattern for the camera's format: a diagonal gradient shifted
/// by the frame number.
fn test_pattern(camera: &SimCamera, frame_num: u32) -> Vec<u8> {
    let bpp = camera.pixel_format.bytes_per_pixel();
    let (w, h) = (camera.width as usize, camera.height as usize);
    let mut data = Vec::with_capacity(w * h * bpp);
    for y in 0..h {
        for x in 0..w {
            let v = ((x + y) * 4).wrapping_add(frame_num as usize) as u8;
            match camera.pixel_format {
                // neutral chroma
                PixelFormat::Yuv422Yuyv => data.extend_from_slice(&[v, 128]),
                PixelFormat::Yuv422Uyvy => data.extend_from_slice(&[128, v]),
                _ => data.extend(std::iter::repeat(v).take(bpp)),
            }
        }
    }
    data
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn transport() -> SimTransport {
        SimTransport::new(vec![
            SimCamera::new("A", PixelFormat::Mono8),
            SimCamera {
                transport: TransportKind::Usb,
                ..SimCamera::new("B", PixelFormat::Rgb8)
            },
        ])
    }

    #[test]
    fn enumeration_requires_initialize_and_honours_filter() {
        let sim = transport();
        assert_eq!(sim.enumerate(TransportFilter::ALL), Err(VendorCode::CALL_ORDER));

        sim.initialize().unwrap();
        assert_eq!(sim.enumerate(TransportFilter::ALL).unwrap().len(), 2);
        let usb_only = TransportFilter {
            gige: false,
            usb: true,
        };
        let devices = sim.enumerate(usb_only).unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].serial, "B");
        assert!(devices[0].address.is_none());
    }

    #[test]
    fn second_open_is_denied_until_close() {
        let sim = transport();
        sim.initialize().unwrap();
        let device = sim.enumerate(TransportFilter::ALL).unwrap().remove(0);

        let mut first = sim.create_handle(&device).unwrap();
        let mut second = sim.create_handle(&device).unwrap();
        first.open_exclusive().unwrap();
        assert_eq!(second.open_exclusive(), Err(VendorCode::ACCESS_DENIED));

        first.close().unwrap();
        second.open_exclusive().unwrap();
        first.destroy().unwrap();
        second.destroy().unwrap();
        assert_eq!(sim.live_handles(), 0);
        assert_eq!(sim.open_devices(), 0);
    }

    #[test]
    fn pulse_delivers_burst_on_worker_thread() {
        let sim = transport();
        sim.initialize().unwrap();
        let device = sim.enumerate(TransportFilter::ALL).unwrap().remove(0);
        let mut handle = sim.create_handle(&device).unwrap();
        handle.open_exclusive().unwrap();
        handle
            .set_param("AcquisitionBurstFrameCount", &ParamValue::Int(3))
            .unwrap();

        let (tx, rx) = channel::unbounded();
        handle
            .register_frame_callback(Box::new(move |raw: RawFrame<'_>| {
                let name = thread::current().name().map(str::to_owned);
                let _ = tx.send((raw.frame_num, raw.data.len(), name));
            }))
            .unwrap();
        handle.start_grabbing().unwrap();
        assert_eq!(sim.fire_trigger(), 1);

        for expected in 1..=3 {
            let (num, len, name) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
            assert_eq!(num, expected);
            assert_eq!(len, 64 * 48);
            assert_eq!(name.as_deref(), Some("sim-cam-A"));
        }

        handle.stop_grabbing().unwrap();
        assert_eq!(sim.fire_trigger(), 0);
        handle.close().unwrap();
        handle.destroy().unwrap();
        assert_eq!(sim.live_handles(), 0);
    }
}
