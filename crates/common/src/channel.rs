//! Async channel bridge between the event pump and async consumers
//!
//! Frame handlers run on the pump thread and must not block it. The bridge
//! copies each frame into an `OwnedFrame` and offers it to a bounded channel;
//! when the consumer falls behind the frame is dropped and counted instead of
//! stalling delivery for every other stream.

use crate::frame::{Frame, FrameHandler, OwnedFrame};
use async_channel::{Receiver, Sender, TrySendError, bounded};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Pump-side half: a `FrameHandler` that forwards into the channel
pub struct ChannelHandler {
    frame_tx: Sender<OwnedFrame>,
    dropped: Arc<AtomicU64>,
}

impl FrameHandler for ChannelHandler {
    fn on_frame(&mut self, frame: &Frame<'_>) {
        match self.frame_tx.try_send(frame.to_owned_frame()) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                if dropped.is_power_of_two() {
                    tracing::debug!(
                        device = frame.device_index,
                        kind = %frame.kind(),
                        dropped,
                        "Frame consumer lagging, dropping frames"
                    );
                }
            }
            Err(TrySendError::Closed(_)) => {
                tracing::trace!("Frame receiver closed, discarding frame");
            }
        }
    }
}

/// Consumer half, usable from async or blocking code
#[derive(Clone)]
pub struct FrameReceiver {
    frame_rx: Receiver<OwnedFrame>,
    dropped: Arc<AtomicU64>,
}

impl FrameReceiver {
    /// Receive the next frame
    pub async fn recv(&self) -> crate::Result<OwnedFrame> {
        self.frame_rx
            .recv()
            .await
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }

    /// Receive the next frame (blocking)
    pub fn recv_blocking(&self) -> crate::Result<OwnedFrame> {
        self.frame_rx
            .recv_blocking()
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }

    /// Try to receive a frame without blocking
    pub fn try_recv(&self) -> Option<OwnedFrame> {
        self.frame_rx.try_recv().ok()
    }

    /// Frames discarded because the channel was full
    pub fn dropped_frames(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Frames currently queued
    pub fn len(&self) -> usize {
        self.frame_rx.len()
    }

    /// Whether no frames are queued
    pub fn is_empty(&self) -> bool {
        self.frame_rx.is_empty()
    }
}

/// Create a bounded frame bridge
///
/// Returns (ChannelHandler for the session, FrameReceiver for the consumer).
/// A capacity of 0 is raised to 1.
pub fn frame_channel(capacity: usize) -> (ChannelHandler, FrameReceiver) {
    let (frame_tx, frame_rx) = bounded(capacity.max(1));
    let dropped = Arc::new(AtomicU64::new(0));

    (
        ChannelHandler {
            frame_tx,
            dropped: dropped.clone(),
        },
        FrameReceiver { frame_rx, dropped },
    )
}
