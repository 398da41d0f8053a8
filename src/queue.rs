use embassy_sync::channel::Channel;

use crate::{frame::CapturedFrame, DefaultRawMutex};

/// The amount of frames, which can wait for the parser.
///
/// Worst case parse latency times this bounds the time between reception and output.
pub const PACKET_QUEUE_DEPTH: usize = 32;

/// The hand off between the receive interrupt and the parser task.
///
/// The producer never waits. If the parser falls behind, new frames are refused.
pub struct PacketQueue {
    channel: Channel<DefaultRawMutex, CapturedFrame, PACKET_QUEUE_DEPTH>,
}
impl PacketQueue {
    pub const fn new() -> Self {
        Self {
            channel: Channel::new(),
        }
    }
    /// Try to queue a frame. Returns false, if the queue was full and the frame was dropped.
    pub fn try_enqueue(&self, frame: CapturedFrame) -> bool {
        self.channel.try_send(frame).is_ok()
    }
    /// Asynchronously wait for the next frame.
    pub async fn dequeue(&self) -> CapturedFrame {
        self.channel.receive().await
    }
    pub fn try_dequeue(&self) -> Option<CapturedFrame> {
        self.channel.try_receive().ok()
    }
    pub fn len(&self) -> usize {
        self.channel.len()
    }
    pub fn is_empty(&self) -> bool {
        self.channel.is_empty()
    }
}
impl Default for PacketQueue {
    fn default() -> Self {
        Self::new()
    }
}
