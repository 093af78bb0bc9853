//! Ordered, non-blocking consumer of the egress queue.
//!
//! Frames may arrive with gaps when a batch is dropped. The buffer holds up to
//! `window` out-of-order frames and releases them in increasing frame number.
//! A missing frame is given up on once the window is full or the oldest
//! pending frame has waited `max_gap_wait_ticks` polls. Frames older than the
//! last released one are discarded, so output never goes backwards.

use crate::types::FrameOutput;
use crossbeam::channel::{Receiver, TryRecvError};
use std::collections::BTreeMap;

pub struct DisplayBuffer {
    rx: Receiver<FrameOutput>,
    pending: BTreeMap<u64, FrameOutput>,
    next_expected: u64,
    window: usize,
    max_gap_wait_ticks: u32,
    gap_wait: u32,
    frames_skipped: u64,
    late_dropped: u64,
}

impl DisplayBuffer {
    pub fn new(rx: Receiver<FrameOutput>, window: usize, max_gap_wait_ticks: u32) -> Self {
        Self {
            rx,
            pending: BTreeMap::new(),
            next_expected: 0,
            window: window.max(1),
            max_gap_wait_ticks,
            gap_wait: 0,
            frames_skipped: 0,
            late_dropped: 0,
        }
    }

    /// One display tick: the next frame in order, or `None` if nothing is ready
    pub fn poll(&mut self) -> Option<FrameOutput> {
        self.fill();

        if let Some(frame) = self.pending.remove(&self.next_expected) {
            return Some(self.release(frame));
        }

        let oldest = *self.pending.keys().next()?;
        self.gap_wait += 1;
        if self.pending.len() < self.window && self.gap_wait < self.max_gap_wait_ticks {
            return None;
        }

        let skipped = oldest - self.next_expected;
        self.frames_skipped += skipped;
        log::warn!(
            "Display skipped {} missing frame(s) {}..{}",
            skipped,
            self.next_expected,
            oldest
        );
        let frame = self.pending.remove(&oldest)?;
        Some(self.release(frame))
    }

    /// Non-blocking pulls until the window is full or the queue is empty
    fn fill(&mut self) {
        while self.pending.len() < self.window {
            match self.rx.try_recv() {
                Ok(frame) if frame.frame_number < self.next_expected => {
                    self.late_dropped += 1;
                    log::debug!("Dropped late frame {}", frame.frame_number);
                }
                Ok(frame) => {
                    self.pending.insert(frame.frame_number, frame);
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
    }

    fn release(&mut self, frame: FrameOutput) -> FrameOutput {
        self.next_expected = frame.frame_number + 1;
        self.gap_wait = 0;
        frame
    }

    pub fn next_expected(&self) -> u64 {
        self.next_expected
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn frames_skipped(&self) -> u64 {
        self.frames_skipped
    }

    pub fn late_dropped(&self) -> u64 {
        self.late_dropped
    }

    /// All producers gone and nothing left to show
    pub fn is_drained(&self) -> bool {
        self.pending.is_empty() && self.rx.is_empty()
    }
}
