//! Frame view and consumer trait
//!
//! A `Frame` borrows the session's capture buffer for the duration of a
//! single handler call. The borrow ends when the handler returns, because the
//! event pump refills the same buffer with the next frame; consumers that
//! need the bytes later copy them into an `OwnedFrame`.

use catalog::{FrameMode, StreamKind};

/// One delivered frame, valid only inside the handler call
#[derive(Debug, Clone, Copy)]
pub struct Frame<'a> {
    /// Index of the device that produced the frame
    pub device_index: u32,
    /// Mode the buffer was sized for
    pub mode: &'a FrameMode,
    /// Frame bytes, exactly `mode.frame_size()` long
    pub data: &'a [u8],
    /// Driver timestamp (60 MHz sensor clock ticks)
    pub timestamp: u32,
    /// Configuration epoch of the buffer and handler that produced this call
    pub epoch: u64,
}

impl Frame<'_> {
    /// Stream kind of this frame
    pub fn kind(&self) -> StreamKind {
        self.mode.kind()
    }

    /// Copy the frame out of the capture buffer
    pub fn to_owned_frame(&self) -> OwnedFrame {
        OwnedFrame {
            device_index: self.device_index,
            mode: *self.mode,
            data: self.data.to_vec(),
            timestamp: self.timestamp,
            epoch: self.epoch,
        }
    }
}

/// Frame copied out of the capture buffer
#[derive(Debug, Clone, PartialEq)]
pub struct OwnedFrame {
    /// Index of the device that produced the frame
    pub device_index: u32,
    /// Mode of the frame
    pub mode: FrameMode,
    /// Frame bytes
    pub data: Vec<u8>,
    /// Driver timestamp
    pub timestamp: u32,
    /// Configuration epoch the frame was captured in
    pub epoch: u64,
}

impl OwnedFrame {
    /// Stream kind of this frame
    pub fn kind(&self) -> StreamKind {
        self.mode.kind()
    }

    /// Borrow as a `Frame` view
    pub fn as_frame(&self) -> Frame<'_> {
        Frame {
            device_index: self.device_index,
            mode: &self.mode,
            data: &self.data,
            timestamp: self.timestamp,
            epoch: self.epoch,
        }
    }
}

/// Consumer of delivered frames
///
/// Called on the event pump thread while the stream's configuration lock is
/// held. Implementations must not call back into stream control (`start`,
/// `stop`, `set_mode`) of the same stream and should return quickly.
pub trait FrameHandler: Send + 'static {
    /// Handle one frame
    fn on_frame(&mut self, frame: &Frame<'_>);
}

impl<F> FrameHandler for F
where
    F: FnMut(&Frame<'_>) + Send + 'static,
{
    fn on_frame(&mut self, frame: &Frame<'_>) {
        self(frame)
    }
}
