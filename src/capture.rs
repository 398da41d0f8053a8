//! The receive path, which runs in interrupt context.
//!
//! Nothing in here may block or allocate. The only shared state touched is the filter mask,
//! which is read under a critical section, and the [PacketQueue], which is written with
//! `try_send`.

use embassy_time::Instant;
use portable_atomic::{AtomicU32, Ordering};

use crate::{
    config::FrameTypes,
    frame::{CapturedFrame, RawFrame},
    queue::PacketQueue,
};

/// What happened to a frame handed to the capture callback.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CaptureOutcome {
    /// The driver passed no frame.
    Ignored,
    /// The frame class isn't accepted by the filter.
    Filtered,
    Queued,
    /// The queue was full.
    Dropped,
}

/// Counters maintained by the capture callback.
pub struct CaptureStats {
    queued: AtomicU32,
    filtered: AtomicU32,
    dropped: AtomicU32,
}
/// A copy of the [CaptureStats] counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CaptureCounters {
    pub queued: u32,
    pub filtered: u32,
    pub dropped: u32,
}
impl CaptureStats {
    pub const fn new() -> Self {
        Self {
            queued: AtomicU32::new(0),
            filtered: AtomicU32::new(0),
            dropped: AtomicU32::new(0),
        }
    }
    fn record(&self, outcome: CaptureOutcome) {
        let counter = match outcome {
            CaptureOutcome::Ignored => return,
            CaptureOutcome::Filtered => &self.filtered,
            CaptureOutcome::Queued => &self.queued,
            CaptureOutcome::Dropped => &self.dropped,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
    pub fn counters(&self) -> CaptureCounters {
        CaptureCounters {
            queued: self.queued.load(Ordering::Relaxed),
            filtered: self.filtered.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}
impl Default for CaptureStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Milliseconds since boot, wrapping after roughly 49 days.
pub fn now_millis() -> u32 {
    Instant::now().as_millis() as u32
}

/// Copy a received frame into the queue.
///
/// Frames are dropped instead of waiting, if the queue is full.
pub fn capture_frame(
    frame: Option<RawFrame<'_>>,
    accepted: FrameTypes,
    timestamp: u32,
    queue: &PacketQueue,
    stats: &CaptureStats,
) -> CaptureOutcome {
    let outcome = match frame {
        None => CaptureOutcome::Ignored,
        Some(frame) if !accepted.contains(frame.class) => CaptureOutcome::Filtered,
        Some(frame) => {
            let captured =
                CapturedFrame::new(timestamp, frame.channel, frame.rssi, frame.payload);
            if queue.try_enqueue(captured) {
                CaptureOutcome::Queued
            } else {
                CaptureOutcome::Dropped
            }
        }
    };
    stats.record(outcome);
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        frame::{FrameClass, MAX_COPY},
        queue::PACKET_QUEUE_DEPTH,
    };

    fn raw(class: FrameClass, payload: &[u8]) -> RawFrame<'_> {
        RawFrame {
            class,
            rssi: -61,
            channel: 11,
            payload,
        }
    }

    #[test]
    fn copies_metadata_and_truncates() {
        let queue = PacketQueue::new();
        let stats = CaptureStats::new();
        let payload = [0x40u8; MAX_COPY + 100];
        let outcome = capture_frame(
            Some(raw(FrameClass::Management, &payload)),
            FrameTypes::ALL,
            1234,
            &queue,
            &stats,
        );
        assert_eq!(outcome, CaptureOutcome::Queued);
        let captured = queue.try_dequeue().unwrap();
        assert_eq!(captured.timestamp(), 1234);
        assert_eq!(captured.channel(), 11);
        assert_eq!(captured.rssi(), -61);
        assert_eq!(captured.len(), MAX_COPY);
    }

    #[test]
    fn null_frame_is_a_no_op() {
        let queue = PacketQueue::new();
        let stats = CaptureStats::new();
        assert_eq!(
            capture_frame(None, FrameTypes::ALL, 0, &queue, &stats),
            CaptureOutcome::Ignored
        );
        assert!(queue.is_empty());
        assert_eq!(stats.counters(), CaptureCounters::default());
    }

    #[test]
    fn zero_length_frames_are_queued() {
        let queue = PacketQueue::new();
        let stats = CaptureStats::new();
        let outcome = capture_frame(
            Some(raw(FrameClass::Misc, &[])),
            FrameTypes::ALL,
            0,
            &queue,
            &stats,
        );
        assert_eq!(outcome, CaptureOutcome::Queued);
        assert!(queue.try_dequeue().unwrap().is_empty());
    }

    #[test]
    fn filters_by_class() {
        let queue = PacketQueue::new();
        let stats = CaptureStats::new();
        let accepted = FrameTypes::only(FrameClass::Management);
        let outcome = capture_frame(
            Some(raw(FrameClass::Data, &[0x08, 0x00])),
            accepted,
            0,
            &queue,
            &stats,
        );
        assert_eq!(outcome, CaptureOutcome::Filtered);
        assert!(queue.is_empty());
        assert_eq!(stats.counters().filtered, 1);
    }

    #[test]
    fn drops_when_full() {
        let queue = PacketQueue::new();
        let stats = CaptureStats::new();
        for _ in 0..PACKET_QUEUE_DEPTH {
            capture_frame(
                Some(raw(FrameClass::Management, &[0x40, 0x00])),
                FrameTypes::ALL,
                0,
                &queue,
                &stats,
            );
        }
        let outcome = capture_frame(
            Some(raw(FrameClass::Management, &[0x40, 0x00])),
            FrameTypes::ALL,
            0,
            &queue,
            &stats,
        );
        assert_eq!(outcome, CaptureOutcome::Dropped);
        assert_eq!(
            stats.counters(),
            CaptureCounters {
                queued: PACKET_QUEUE_DEPTH as u32,
                filtered: 0,
                dropped: 1
            }
        );
    }
}
