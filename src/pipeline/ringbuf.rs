//! Per-camera frame sequencer and display ring

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Local};
use crossbeam::utils::CachePadded;

use crate::capture::frame::{DecodedFrame, FrameTag, Image};

/// Position of a counter value inside the trigger cycle layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CyclePosition {
    pub trigger_cycle: u64,
    /// 1-based, `1..=K`
    pub position: u32,
    /// `position - 1`
    pub slot: usize,
}

impl CyclePosition {
    /// Place a 1-based counter into cycles of `slots` frames.
    pub fn of(counter: u64, slots: usize) -> Self {
        let k = slots.max(1) as u64;
        let zero_based = counter.saturating_sub(1);
        let slot = (zero_based % k) as usize;
        Self {
            trigger_cycle: zero_based / k,
            position: slot as u32 + 1,
            slot,
        }
    }
}

/// Sequencer and ring of the K most recent frames for one camera.
///
/// Numbering belongs to an epoch. A frame pushed with a newer epoch than the
/// ring's restarts numbering at 1 first; a frame from an older epoch is
/// refused.
pub struct FrameRing {
    camera: u32,
    state: Mutex<RingState>,

    /// Statistics
    stats: CachePadded<Stats>,
}

struct RingState {
    slots: Vec<Option<DecodedFrame>>,
    next_counter: u64,
    write_pos: usize,
    epoch: u64,
}

impl RingState {
    fn clear(&mut self) {
        self.slots.iter_mut().for_each(|slot| *slot = None);
        self.next_counter = 1;
        self.write_pos = 0;
    }
}

#[derive(Default)]
struct Stats {
    frames_written: AtomicU64,
    frames_evicted: AtomicU64,
    frames_stale: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingStats {
    pub frames_written: u64,
    pub frames_evicted: u64,
    /// Frames refused because their epoch had already ended.
    pub frames_stale: u64,
}

impl FrameRing {
    pub fn new(camera: u32, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            camera,
            state: Mutex::new(RingState {
                slots: vec![None; capacity],
                next_counter: 1,
                write_pos: 0,
                epoch: 0,
            }),
            stats: CachePadded::new(Stats::default()),
        }
    }

    pub fn camera(&self) -> u32 {
        self.camera
    }

    pub fn capacity(&self) -> usize {
        self.lock().slots.len()
    }

    fn lock(&self) -> MutexGuard<'_, RingState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Tag `image` with the next counter of the current epoch and store it.
    pub fn push(
        &self,
        image: Image,
        frame_num: u32,
        captured_at: DateTime<Local>,
    ) -> DecodedFrame {
        let mut state = self.lock();
        let frame = self.store(&mut state, image, frame_num, captured_at);
        drop(state);
        frame
    }

    /// Like `push`, for a frame produced during `epoch`.
    ///
    /// Returns `None` if `epoch` is older than the ring's.
    pub fn push_in(
        &self,
        epoch: u64,
        image: Image,
        frame_num: u32,
        captured_at: DateTime<Local>,
    ) -> Option<DecodedFrame> {
        let mut state = self.lock();
        if epoch < state.epoch {
            drop(state);
            self.stats.frames_stale.fetch_add(1, Ordering::Relaxed);
            return None;
        }
        if epoch > state.epoch {
            state.clear();
            state.epoch = epoch;
        }
        let frame = self.store(&mut state, image, frame_num, captured_at);
        drop(state);
        Some(frame)
    }

    // The lock covers only the slot update.
    fn store(
        &self,
        state: &mut RingState,
        image: Image,
        frame_num: u32,
        captured_at: DateTime<Local>,
    ) -> DecodedFrame {
        let counter = state.next_counter;
        let pos = CyclePosition::of(counter, state.slots.len());
        let frame = DecodedFrame {
            image,
            tag: FrameTag {
                camera: self.camera,
                counter,
                trigger_cycle: pos.trigger_cycle,
                position: pos.position,
                slot: pos.slot,
            },
            frame_num,
            captured_at,
        };
        let evicted = state.slots[pos.slot].replace(frame.clone()).is_some();
        state.next_counter += 1;
        state.write_pos = (pos.slot + 1) % state.slots.len();

        self.stats.frames_written.fetch_add(1, Ordering::Relaxed);
        if evicted {
            self.stats.frames_evicted.fetch_add(1, Ordering::Relaxed);
        }
        frame
    }

    /// Frame currently held in `slot`.
    pub fn snapshot(&self, slot: usize) -> Option<DecodedFrame> {
        self.lock().slots.get(slot).cloned().flatten()
    }

    /// Most recently stored frame.
    pub fn latest(&self) -> Option<DecodedFrame> {
        let state = self.lock();
        let k = state.slots.len();
        state.slots[(state.write_pos + k - 1) % k].clone()
    }

    /// All held frames, oldest first.
    pub fn frames(&self) -> Vec<DecodedFrame> {
        let state = self.lock();
        let k = state.slots.len();
        (0..k)
            .filter_map(|i| state.slots[(state.write_pos + i) % k].clone())
            .collect()
    }

    /// Counter the next frame will receive.
    pub fn next_counter(&self) -> u64 {
        self.lock().next_counter
    }

    pub fn epoch(&self) -> u64 {
        self.lock().epoch
    }

    /// Restart numbering at 1 and clear the ring now. Frames of the ended
    /// epoch are refused from here on.
    pub fn reset(&self) {
        let mut state = self.lock();
        state.clear();
        state.epoch += 1;
    }

    pub fn stats(&self) -> RingStats {
        RingStats {
            frames_written: self.stats.frames_written.load(Ordering::Relaxed),
            frames_evicted: self.stats.frames_evicted.load(Ordering::Relaxed),
            frames_stale: self.stats.frames_stale.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use bytes::Bytes;

    use super::*;

    fn image(value: u8) -> Image {
        Image {
            width: 1,
            height: 1,
            data: Bytes::from(vec![value; 3]),
        }
    }

    #[test]
    fn cycle_positions_follow_counter() {
        let k = 4;
        for counter in 1..=(4 * k as u64) {
            let pos = CyclePosition::of(counter, k);
            assert_eq!(pos.trigger_cycle, (counter - 1) / k as u64);
            assert_eq!(pos.slot as u64, (counter - 1) % k as u64);
            assert_eq!(pos.position as usize, pos.slot + 1);
        }
        assert_eq!(CyclePosition::of(1, 4).trigger_cycle, 0);
        assert_eq!(CyclePosition::of(4, 4).trigger_cycle, 0);
        assert_eq!(CyclePosition::of(4, 4).position, 4);
        assert_eq!(CyclePosition::of(5, 4).trigger_cycle, 1);
        assert_eq!(CyclePosition::of(5, 4).position, 1);
    }

    #[test]
    fn ring_keeps_last_k_frames() {
        for n in [1u64, 3, 4, 5, 11] {
            let ring = FrameRing::new(0, 4);
            for i in 1..=n {
                ring.push(image(i as u8), i as u32, Local::now());
            }
            let frames = ring.frames();
            assert_eq!(frames.len() as u64, n.min(4));
            let counters: Vec<u64> = frames.iter().map(|f| f.counter()).collect();
            let expected: Vec<u64> = (n.saturating_sub(4) + 1..=n).collect();
            assert_eq!(counters, expected);
            for frame in &frames {
                assert_eq!(frame.tag.slot as u64, (frame.counter() - 1) % 4);
                assert_eq!(
                    ring.snapshot(frame.tag.slot).map(|f| f.counter()),
                    Some(frame.counter())
                );
            }
            assert_eq!(ring.latest().map(|f| f.counter()), Some(n));
            assert_eq!(ring.stats().frames_evicted, n.saturating_sub(4));
        }
    }

    #[test]
    fn reset_restarts_numbering() {
        let ring = FrameRing::new(2, 4);
        for _ in 0..6 {
            ring.push(image(0), 0, Local::now());
        }
        assert_eq!(ring.next_counter(), 7);
        ring.reset();
        assert!(ring.frames().is_empty());
        assert!(ring.latest().is_none());
        assert_eq!(ring.push(image(0), 0, Local::now()).counter(), 1);
    }

    #[test]
    fn newer_epoch_restarts_numbering_on_first_frame() {
        let ring = FrameRing::new(0, 4);
        for _ in 0..3 {
            ring.push_in(0, image(0), 0, Local::now()).unwrap();
        }
        // late frame of the first run, after the next run was armed
        assert_eq!(ring.push_in(0, image(0), 0, Local::now()).unwrap().counter(), 4);

        let first = ring.push_in(1, image(1), 0, Local::now()).unwrap();
        assert_eq!((first.counter(), first.tag.trigger_cycle), (1, 0));
        assert_eq!(ring.frames().len(), 1);
        assert_eq!(ring.epoch(), 1);

        assert!(ring.push_in(0, image(0), 0, Local::now()).is_none());
        assert_eq!(ring.next_counter(), 2);
        assert_eq!(ring.stats().frames_stale, 1);
    }

    #[test]
    fn reset_refuses_frames_of_the_ended_epoch() {
        let ring = FrameRing::new(0, 4);
        let epoch = ring.epoch();
        ring.push_in(epoch, image(0), 0, Local::now()).unwrap();
        ring.reset();
        assert!(ring.push_in(epoch, image(0), 0, Local::now()).is_none());
        assert_eq!(ring.push_in(epoch + 1, image(0), 0, Local::now()).unwrap().counter(), 1);
    }

    #[test]
    fn out_of_range_slot_is_empty() {
        let ring = FrameRing::new(0, 4);
        ring.push(image(1), 1, Local::now());
        assert!(ring.snapshot(4).is_none());
        assert!(ring.snapshot(1).is_none());
    }

    #[test]
    fn concurrent_cameras_stay_isolated() {
        let rings: Vec<Arc<FrameRing>> =
            (0..2).map(|cam| Arc::new(FrameRing::new(cam, 4))).collect();
        let workers: Vec<_> = rings
            .iter()
            .map(|ring| {
                let ring = Arc::clone(ring);
                thread::spawn(move || {
                    for i in 0..500u32 {
                        ring.push(image(ring.camera() as u8), i, Local::now());
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }
        for ring in &rings {
            assert_eq!(ring.next_counter(), 501);
            for frame in ring.frames() {
                assert_eq!(frame.camera(), ring.camera());
                assert_eq!(frame.image.pixel(0, 0), Some([ring.camera() as u8; 3]));
            }
        }
    }
}
