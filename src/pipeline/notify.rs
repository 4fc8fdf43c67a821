//! Event delivery from the capture callbacks to consumers.
//!
//! Producers only ever `try_send` into a bounded flume channel, so a slow or
//! absent consumer costs dropped events, never a stalled capture thread.

use flume::{Receiver, Sender, TrySendError};
use tracing::{debug, trace};

use crate::capture::frame::DecodedFrame;

#[derive(Debug, Clone)]
pub enum Event {
    FrameReady {
        camera: u32,
        slot: usize,
        frame: DecodedFrame,
    },
    FileWritten(String),
    TriggerCycle { camera: u32, cycle: u64 },
    Status(String),
}

/// Create a notifier and the consumer end of its queue.
pub fn channel(capacity: usize) -> (Notifier, Receiver<Event>) {
    let (tx, rx) = flume::bounded(capacity.max(1));
    (Notifier { tx }, rx)
}

/// Non-blocking sending half, cloned into every camera pipeline.
#[derive(Clone)]
pub struct Notifier {
    tx: Sender<Event>,
}

impl Notifier {
    /// Enqueue without waiting. Returns false if the event was dropped.
    pub fn emit(&self, event: Event) -> bool {
        match self.tx.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(event)) => {
                metrics::counter!("events_dropped_total").increment(1);
                debug!("Event queue full, dropping {:?}", kind(&event));
                false
            }
            Err(TrySendError::Disconnected(_)) => {
                trace!("No event consumer attached");
                false
            }
        }
    }

    pub fn frame_ready(&self, frame: &DecodedFrame) -> bool {
        self.emit(Event::FrameReady {
            camera: frame.tag.camera,
            slot: frame.tag.slot,
            frame: frame.clone(),
        })
    }

    pub fn file_written(&self, name: impl Into<String>) -> bool {
        self.emit(Event::FileWritten(name.into()))
    }

    pub fn trigger_cycle(&self, camera: u32, cycle: u64) -> bool {
        self.emit(Event::TriggerCycle { camera, cycle })
    }

    pub fn status(&self, message: impl Into<String>) -> bool {
        self.emit(Event::Status(message.into()))
    }
}

fn kind(event: &Event) -> &'static str {
    match event {
        Event::FrameReady { .. } => "frame-ready",
        Event::FileWritten(_) => "file-written",
        Event::TriggerCycle { .. } => "trigger-cycle",
        Event::Status(_) => "status",
    }
}

type FrameReadyFn = Box<dyn FnMut(u32, usize, &DecodedFrame) + Send>;
type TextFn = Box<dyn FnMut(&str) + Send>;
type CycleFn = Box<dyn FnMut(u32, u64) + Send>;

/// Consumer-side fan-out to per-kind handlers.
///
/// Runs wherever the consumer runs (a tokio task or a plain thread), never on
/// a capture thread.
#[derive(Default)]
pub struct Dispatcher {
    frame_ready: Vec<FrameReadyFn>,
    file_written: Vec<TextFn>,
    trigger_cycle: Vec<CycleFn>,
    status: Vec<TextFn>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_frame_ready(
        mut self,
        f: impl FnMut(u32, usize, &DecodedFrame) + Send + 'static,
    ) -> Self {
        self.frame_ready.push(Box::new(f));
        self
    }

    pub fn on_file_written(mut self, f: impl FnMut(&str) + Send + 'static) -> Self {
        self.file_written.push(Box::new(f));
        self
    }

    pub fn on_trigger_cycle(mut self, f: impl FnMut(u32, u64) + Send + 'static) -> Self {
        self.trigger_cycle.push(Box::new(f));
        self
    }

    pub fn on_status(mut self, f: impl FnMut(&str) + Send + 'static) -> Self {
        self.status.push(Box::new(f));
        self
    }

    pub fn dispatch(&mut self, event: &Event) {
        match event {
            Event::FrameReady {
                camera,
                slot,
                frame,
            } => self
                .frame_ready
                .iter_mut()
                .for_each(|f| f(*camera, *slot, frame)),
            Event::FileWritten(name) => self.file_written.iter_mut().for_each(|f| f(name)),
            Event::TriggerCycle { camera, cycle } => self
                .trigger_cycle
                .iter_mut()
                .for_each(|f| f(*camera, *cycle)),
            Event::Status(text) => self.status.iter_mut().for_each(|f| f(text)),
        }
    }

    /// Drain events until every `Notifier` is dropped. Returns the number of
    /// events dispatched.
    pub async fn run(mut self, rx: Receiver<Event>) -> usize {
        let mut count = 0;
        while let Ok(event) = rx.recv_async().await {
            self.dispatch(&event);
            count += 1;
        }
        count
    }

    /// Blocking variant of `run` for consumers on a plain thread.
    pub fn run_blocking(mut self, rx: Receiver<Event>) -> usize {
        let mut count = 0;
        for event in rx.iter() {
            self.dispatch(&event);
            count += 1;
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    #[test]
    fn full_queue_drops_instead_of_blocking() {
        let (notifier, rx) = channel(2);
        assert!(notifier.status("a"));
        assert!(notifier.status("b"));
        assert!(!notifier.status("c"));
        assert_eq!(rx.len(), 2);
    }

    #[test]
    fn emit_without_consumer_is_harmless() {
        let (notifier, rx) = channel(4);
        drop(rx);
        assert!(!notifier.trigger_cycle(0, 3));
    }

    #[tokio::test]
    async fn dispatcher_routes_by_kind() {
        let (notifier, rx) = channel(16);
        let seen = Arc::new(Mutex::new(Vec::new()));

        let (s1, s2, s3) = (Arc::clone(&seen), Arc::clone(&seen), Arc::clone(&seen));
        let dispatcher = Dispatcher::new()
            .on_status(move |t| s1.lock().unwrap().push(format!("status:{t}")))
            .on_file_written(move |n| s2.lock().unwrap().push(format!("file:{n}")))
            .on_trigger_cycle(move |c, n| s3.lock().unwrap().push(format!("cycle:{c}:{n}")));

        notifier.status("started");
        notifier.file_written("cam0.bmp");
        notifier.trigger_cycle(1, 2);
        drop(notifier);

        let handled = tokio::spawn(dispatcher.run(rx)).await.unwrap();
        assert_eq!(handled, 3);
        assert_eq!(
            *seen.lock().unwrap(),
            ["status:started", "file:cam0.bmp", "cycle:1:2"]
        );
    }
}
