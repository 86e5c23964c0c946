//! Frame buffers
//!
//! Each stream owns one fixed-size capture buffer registered with the driver
//! as its write target. The driver fills it and then fires the stream's frame
//! callback; the session lends the contents to the handler for the duration
//! of that call only, after which the driver may overwrite them.
//!
//! Buffers are tagged with the configuration epoch they were allocated for,
//! so a frame can always be traced back to the configuration that sized it.

use crate::driver::{Driver, NativeDevice};
use crate::error::{Result, SessionError};
use crate::lock;
use catalog::{FrameMode, StreamKind};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

struct BufferInner {
    data: Mutex<Box<[u8]>>,
    len: usize,
    epoch: u64,
}

/// Shared handle to one zero-initialized, contiguous capture buffer
#[derive(Clone)]
pub struct FrameBuffer {
    inner: Arc<BufferInner>,
}

impl FrameBuffer {
    /// Allocate a buffer of exactly `mode.frame_size()` bytes
    pub fn allocate(mode: &FrameMode, epoch: u64) -> Self {
        let len = mode.frame_size();
        Self {
            inner: Arc::new(BufferInner {
                data: Mutex::new(vec![0u8; len].into_boxed_slice()),
                len,
                epoch,
            }),
        }
    }

    /// Buffer size in bytes
    pub fn len(&self) -> usize {
        self.inner.len
    }

    /// Whether the buffer has no capacity (invalid mode)
    pub fn is_empty(&self) -> bool {
        self.inner.len == 0
    }

    /// Configuration epoch this buffer was allocated for
    pub fn epoch(&self) -> u64 {
        self.inner.epoch
    }

    /// Whether both handles refer to the same allocation
    pub fn same_buffer(&self, other: &FrameBuffer) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Write into the buffer (driver side)
    pub fn write<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> R {
        let mut data = lock(&self.inner.data);
        f(&mut data)
    }

    /// Read the buffer contents (delivery side)
    pub fn read<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        let data = lock(&self.inner.data);
        f(&data)
    }

    /// Raw start address for native registration
    ///
    /// The address stays valid for as long as any handle to this buffer is
    /// alive. Native code may only write through it from the event thread,
    /// before the frame callback for that write is fired.
    pub fn as_mut_ptr(&self) -> *mut u8 {
        lock(&self.inner.data).as_mut_ptr()
    }
}

impl std::fmt::Debug for FrameBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameBuffer")
            .field("len", &self.inner.len)
            .field("epoch", &self.inner.epoch)
            .finish()
    }
}

/// Registration state of one stream's capture buffer
///
/// A previously registered buffer is always deregistered from the driver
/// before this pool lets go of it.
#[derive(Debug, Default)]
pub struct BufferPool {
    current: Option<FrameBuffer>,
    allocations: u64,
}

impl BufferPool {
    /// Create an empty pool
    pub fn new() -> Self {
        Self::default()
    }

    /// Currently registered buffer
    pub fn current(&self) -> Option<&FrameBuffer> {
        self.current.as_ref()
    }

    /// Number of buffers allocated over the pool's lifetime
    pub fn allocations(&self) -> u64 {
        self.allocations
    }

    /// Allocate a buffer for `mode` and register it in place of the old one
    pub fn replace(
        &mut self,
        driver: &dyn Driver,
        device: NativeDevice,
        kind: StreamKind,
        mode: &FrameMode,
        epoch: u64,
    ) -> Result<&FrameBuffer> {
        self.release(driver, device, kind)?;

        let buffer = FrameBuffer::allocate(mode, epoch);
        driver
            .set_buffer(device, kind, Some(buffer.clone()))
            .map_err(|code| SessionError::driver("set_buffer", code))?;
        self.allocations += 1;

        debug!(
            "Registered {} byte {} buffer for epoch {}",
            buffer.len(),
            kind,
            epoch
        );
        Ok(self.current.insert(buffer))
    }

    /// Deregister and drop the current buffer, if any
    pub fn release(
        &mut self,
        driver: &dyn Driver,
        device: NativeDevice,
        kind: StreamKind,
    ) -> Result<()> {
        if self.current.is_none() {
            return Ok(());
        }

        driver
            .set_buffer(device, kind, None)
            .map_err(|code| SessionError::driver("set_buffer", code))?;
        self.current = None;
        Ok(())
    }

    /// Deregister the current buffer, dropping it even if the driver refuses
    pub fn release_tolerant(
        &mut self,
        driver: &dyn Driver,
        device: NativeDevice,
        kind: StreamKind,
    ) {
        if let Err(e) = self.release(driver, device, kind) {
            warn!("Failed to deregister {} buffer: {}", kind, e);
            self.current = None;
        }
    }
}
