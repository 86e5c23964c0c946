//! Device session
//!
//! One open sensor. Video and depth are independent streams, each moving
//! through `Idle -> Configured -> Streaming -> Configured` and each guarded by
//! its own configuration slot: the mode, the registered buffer, the handler
//! and a configuration epoch live together behind one mutex that caller
//! threads hold briefly while reconfiguring and that the event pump holds
//! while dispatching a frame. Every start and mode change bumps the epoch; a
//! driver callback carries the epoch it was registered under and is dropped
//! when it no longer matches, so a handler never sees a buffer from another
//! configuration.
//!
//! Caller-side control operations on one stream are serialized by a second
//! lock so `stop` can call into the driver without holding the slot, since a
//! driver may service pending transfers (and fire callbacks) while stopping.

use crate::buffer::BufferPool;
use crate::context::SessionRegistry;
use crate::driver::{Driver, FrameCallback, NativeDevice};
use crate::error::{Result, SessionError};
use crate::lock;
use catalog::{
    DepthFormat, FrameMode, LedStatus, PixelFormat, RawTiltState, Resolution, StreamKind,
    TiltState, TiltStatus, VideoFormat, find_mode,
};
use common::{Frame, FrameHandler};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tracing::{debug, error, info, trace, warn};

/// Lifecycle state of one stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// No mode set
    Idle,
    /// Mode set and buffer registered, not streaming
    Configured,
    /// Driver is streaming into the registered buffer
    Streaming,
}

struct StreamSlot {
    state: StreamState,
    mode: Option<FrameMode>,
    buffers: BufferPool,
    handler: Option<Box<dyn FrameHandler>>,
    epoch: u64,
    delivered: u64,
}

impl StreamSlot {
    fn new() -> Self {
        Self {
            state: StreamState::Idle,
            mode: None,
            buffers: BufferPool::new(),
            handler: None,
            epoch: 0,
            delivered: 0,
        }
    }
}

struct Stream {
    kind: StreamKind,
    control: Mutex<()>,
    slot: Arc<Mutex<StreamSlot>>,
}

impl Stream {
    fn new(kind: StreamKind) -> Self {
        Self {
            kind,
            control: Mutex::new(()),
            slot: Arc::new(Mutex::new(StreamSlot::new())),
        }
    }
}

#[derive(Default)]
struct TiltSnapshot {
    raw: RawTiltState,
    state: TiltState,
}

pub(crate) struct SessionInner {
    index: u32,
    native: NativeDevice,
    driver: Arc<dyn Driver>,
    registry: Weak<SessionRegistry>,
    closed: AtomicBool,
    video: Stream,
    depth: Stream,
    tilt: Mutex<TiltSnapshot>,
    led: Mutex<Option<LedStatus>>,
}

impl SessionInner {
    fn stream(&self, kind: StreamKind) -> &Stream {
        match kind {
            StreamKind::Video => &self.video,
            StreamKind::Depth => &self.depth,
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            Err(SessionError::DisposedSession)
        } else {
            Ok(())
        }
    }

    fn set_mode(
        &self,
        kind: StreamKind,
        resolution: Resolution,
        format: PixelFormat,
    ) -> Result<FrameMode> {
        let stream = self.stream(kind);
        let _control = lock(&stream.control);
        self.ensure_open()?;

        let mode = find_mode(kind, resolution, format);
        if !mode.is_valid {
            return Err(SessionError::InvalidMode {
                kind,
                resolution,
                format,
            });
        }

        let mut slot = lock(&stream.slot);
        if slot.state == StreamState::Streaming {
            return Err(SessionError::State(format!(
                "cannot change {} mode while streaming, stop the stream first",
                kind
            )));
        }

        self.driver
            .set_mode(self.native, kind, &mode)
            .map_err(|code| SessionError::driver("set_mode", code))?;

        let epoch = slot.epoch + 1;
        slot.epoch = epoch;
        if let Err(e) = slot
            .buffers
            .replace(self.driver.as_ref(), self.native, kind, &mode, epoch)
        {
            // The driver must not keep a mode the registered buffer is not sized for
            if let Some(previous) = slot.mode
                && let Err(code) = self.driver.set_mode(self.native, kind, &previous)
            {
                warn!(
                    "Failed to restore {} mode on device {}: status {}",
                    kind, self.index, code
                );
            }
            return Err(e);
        }
        slot.mode = Some(mode);
        slot.state = StreamState::Configured;

        debug!("Device {} {} mode set to {}", self.index, kind, mode);
        Ok(mode)
    }

    fn start(&self, kind: StreamKind, handler: Box<dyn FrameHandler>) -> Result<()> {
        let stream = self.stream(kind);
        let _control = lock(&stream.control);
        self.ensure_open()?;

        let mut slot = lock(&stream.slot);
        let mode = match (slot.state, slot.mode) {
            (StreamState::Configured, Some(mode)) => mode,
            (StreamState::Streaming, _) => {
                return Err(SessionError::State(format!(
                    "{} stream is already streaming",
                    kind
                )));
            }
            _ => {
                return Err(SessionError::State(format!(
                    "{} stream has no mode set",
                    kind
                )));
            }
        };

        let epoch = slot.epoch + 1;
        slot.epoch = epoch;
        slot.buffers
            .replace(self.driver.as_ref(), self.native, kind, &mode, epoch)?;
        slot.handler = Some(handler);
        slot.state = StreamState::Streaming;
        self.driver
            .set_frame_callback(self.native, kind, Some(self.frame_callback(stream, epoch)));

        if let Err(code) = self.driver.start_stream(self.native, kind) {
            slot.state = StreamState::Configured;
            slot.epoch += 1;
            let handler = slot.handler.take();
            self.driver.set_frame_callback(self.native, kind, None);
            drop(slot);
            drop(handler);

            warn!(
                "Failed to start {} stream on device {}: status {}",
                kind, self.index, code
            );
            return Err(SessionError::driver("start_stream", code));
        }

        info!("Device {} started {} stream ({})", self.index, kind, mode);
        Ok(())
    }

    fn frame_callback(&self, stream: &Stream, epoch: u64) -> FrameCallback {
        let slot = Arc::downgrade(&stream.slot);
        let device_index = self.index;
        Arc::new(move |timestamp| {
            if let Some(slot) = slot.upgrade() {
                dispatch(&slot, device_index, epoch, timestamp);
            }
        })
    }

    fn stop(&self, kind: StreamKind) -> Result<()> {
        let stream = self.stream(kind);
        let _control = lock(&stream.control);
        self.ensure_open()?;
        self.stop_locked(stream)
    }

    /// Stop a stream; the caller holds the stream's control lock
    fn stop_locked(&self, stream: &Stream) -> Result<()> {
        let kind = stream.kind;
        let handler = {
            let mut slot = lock(&stream.slot);
            if slot.state != StreamState::Streaming {
                return Ok(());
            }
            slot.state = StreamState::Configured;
            slot.epoch += 1;
            slot.handler.take()
        };

        // Callbacks fired from here on find a stale epoch
        let result = self
            .driver
            .stop_stream(self.native, kind)
            .map_err(|code| SessionError::driver("stop_stream", code));
        self.driver.set_frame_callback(self.native, kind, None);
        drop(handler);

        match &result {
            Ok(()) => info!("Device {} stopped {} stream", self.index, kind),
            Err(e) => warn!("Device {} {} stream stop: {}", self.index, kind, e),
        }
        result
    }

    pub(crate) fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let mut first_error = None;
        for stream in [&self.video, &self.depth] {
            let _control = lock(&stream.control);
            if let Err(e) = self.stop_locked(stream) {
                first_error.get_or_insert(e);
            }

            let mut slot = lock(&stream.slot);
            slot.buffers
                .release_tolerant(self.driver.as_ref(), self.native, stream.kind);
            slot.mode = None;
            slot.state = StreamState::Idle;
            slot.epoch += 1;
        }

        if let Err(code) = self.driver.close_device(self.native) {
            warn!("Failed to close device {}: status {}", self.index, code);
            first_error.get_or_insert(SessionError::driver("close_device", code));
        }

        if let Some(registry) = self.registry.upgrade() {
            registry.remove(self.native);
        }

        info!("Closed device {}", self.index);
        first_error.map_or(Ok(()), Err)
    }

    fn with_slot<R>(&self, kind: StreamKind, f: impl FnOnce(&StreamSlot) -> R) -> Result<R> {
        self.ensure_open()?;
        let slot = lock(&self.stream(kind).slot);
        Ok(f(&slot))
    }
}

/// Deliver one completed frame to the stream's handler
///
/// Runs on the event pump thread with the slot locked for the whole handler
/// call. Frames for a stopped stream or a superseded epoch are dropped.
fn dispatch(slot: &Mutex<StreamSlot>, device_index: u32, epoch: u64, timestamp: u32) {
    let mut guard = lock(slot);
    let slot = &mut *guard;
    if slot.state != StreamState::Streaming || slot.epoch != epoch {
        trace!(
            "Dropping frame for device {} from stale epoch {}",
            device_index, epoch
        );
        return;
    }

    let (Some(mode), Some(buffer), Some(handler)) = (
        slot.mode.as_ref(),
        slot.buffers.current(),
        slot.handler.as_mut(),
    ) else {
        return;
    };
    debug_assert_eq!(buffer.epoch(), epoch);

    let panicked = buffer.read(|data| {
        let frame = Frame {
            device_index,
            mode,
            data,
            timestamp,
            epoch,
        };
        std::panic::catch_unwind(AssertUnwindSafe(|| handler.on_frame(&frame))).is_err()
    });
    if panicked {
        error!(
            "Panic in {} frame handler of device {}",
            mode.kind(),
            device_index
        );
    }
    slot.delivered += 1;
}

/// One open sensor
///
/// Obtained from `Context::open_device`. Dropping the session closes it.
pub struct DeviceSession {
    inner: Arc<SessionInner>,
}

impl DeviceSession {
    pub(crate) fn new(
        index: u32,
        native: NativeDevice,
        driver: Arc<dyn Driver>,
        registry: Weak<SessionRegistry>,
    ) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                index,
                native,
                driver,
                registry,
                closed: AtomicBool::new(false),
                video: Stream::new(StreamKind::Video),
                depth: Stream::new(StreamKind::Depth),
                tilt: Mutex::new(TiltSnapshot::default()),
                led: Mutex::new(None),
            }),
        }
    }

    pub(crate) fn downgrade(&self) -> Weak<SessionInner> {
        Arc::downgrade(&self.inner)
    }

    /// Device index this session was opened with
    pub fn index(&self) -> u32 {
        self.inner.index
    }

    /// Native handle of the device
    pub fn native(&self) -> NativeDevice {
        self.inner.native
    }

    /// Whether `close` has run
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    // ------------------------------------------------------------------
    // Modes
    // ------------------------------------------------------------------

    /// Set the capture mode of a stream
    ///
    /// Unsupported combinations fail with `InvalidMode` and leave the current
    /// mode untouched. Changing the mode of a streaming stream is rejected.
    pub fn set_mode(
        &self,
        kind: StreamKind,
        resolution: Resolution,
        format: PixelFormat,
    ) -> Result<FrameMode> {
        self.inner.set_mode(kind, resolution, format)
    }

    /// Set the video mode
    pub fn set_video_mode(
        &self,
        resolution: Resolution,
        format: VideoFormat,
    ) -> Result<FrameMode> {
        self.set_mode(StreamKind::Video, resolution, format.into())
    }

    /// Set the depth mode
    pub fn set_depth_mode(
        &self,
        resolution: Resolution,
        format: DepthFormat,
    ) -> Result<FrameMode> {
        self.set_mode(StreamKind::Depth, resolution, format.into())
    }

    /// Set the video format at medium resolution
    pub fn set_video_format(&self, format: VideoFormat) -> Result<FrameMode> {
        self.set_video_mode(Resolution::Medium, format)
    }

    /// Set the depth format at medium resolution
    pub fn set_depth_format(&self, format: DepthFormat) -> Result<FrameMode> {
        self.set_depth_mode(Resolution::Medium, format)
    }

    /// Current mode of a stream, `None` until one is set
    pub fn mode(&self, kind: StreamKind) -> Result<Option<FrameMode>> {
        self.inner.with_slot(kind, |slot| slot.mode)
    }

    /// Current video mode
    pub fn video_mode(&self) -> Result<Option<FrameMode>> {
        self.mode(StreamKind::Video)
    }

    /// Current depth mode
    pub fn depth_mode(&self) -> Result<Option<FrameMode>> {
        self.mode(StreamKind::Depth)
    }

    // ------------------------------------------------------------------
    // Streaming
    // ------------------------------------------------------------------

    /// Start streaming with `handler` receiving every frame
    ///
    /// Requires a configured, stopped stream. The capture buffer is
    /// reallocated for the current mode. The handler runs on the event pump
    /// thread and must not start, stop or reconfigure this same stream.
    pub fn start(&self, kind: StreamKind, handler: impl FrameHandler) -> Result<()> {
        self.inner.start(kind, Box::new(handler))
    }

    /// Start the video stream
    pub fn start_video(&self, handler: impl FrameHandler) -> Result<()> {
        self.start(StreamKind::Video, handler)
    }

    /// Start the depth stream
    pub fn start_depth(&self, handler: impl FrameHandler) -> Result<()> {
        self.start(StreamKind::Depth, handler)
    }

    /// Stop a stream; a no-op when it is not streaming
    ///
    /// No handler call begins after this returns. A call already in progress
    /// on the pump thread finishes first.
    pub fn stop(&self, kind: StreamKind) -> Result<()> {
        self.inner.stop(kind)
    }

    /// Stop the video stream
    pub fn stop_video(&self) -> Result<()> {
        self.stop(StreamKind::Video)
    }

    /// Stop the depth stream
    pub fn stop_depth(&self) -> Result<()> {
        self.stop(StreamKind::Depth)
    }

    /// Lifecycle state of a stream
    pub fn stream_state(&self, kind: StreamKind) -> Result<StreamState> {
        self.inner.with_slot(kind, |slot| slot.state)
    }

    /// Frames handed to handlers of a stream since the session was opened
    pub fn frames_delivered(&self, kind: StreamKind) -> Result<u64> {
        self.inner.with_slot(kind, |slot| slot.delivered)
    }

    // ------------------------------------------------------------------
    // Motor, LED and accelerometer
    // ------------------------------------------------------------------

    /// Set the status LED
    pub fn set_led(&self, led: LedStatus) -> Result<()> {
        self.inner.ensure_open()?;
        self.inner
            .driver
            .set_led(self.inner.native, led)
            .map_err(|code| SessionError::driver("set_led", code))?;
        *lock(&self.inner.led) = Some(led);
        Ok(())
    }

    /// LED state last set through this session
    pub fn led(&self) -> Result<Option<LedStatus>> {
        self.inner.ensure_open()?;
        Ok(*lock(&self.inner.led))
    }

    /// Command the tilt motor to `degrees` (clamped to the mechanical range)
    ///
    /// Returns once the command is written; the motor keeps moving afterwards.
    pub fn set_tilt_angle(&self, degrees: f64) -> Result<()> {
        self.inner.ensure_open()?;
        self.inner
            .driver
            .set_tilt_degrees(self.inner.native, degrees)
            .map_err(|code| SessionError::driver("set_tilt_degrees", code))
    }

    /// Command the tilt motor to an angle in radians
    pub fn set_tilt_radians(&self, radians: f64) -> Result<()> {
        self.set_tilt_angle(catalog::radians_to_degrees(radians))
    }

    /// Read the motor and accelerometer and replace the cached snapshot
    ///
    /// Blocks for one driver round trip.
    pub fn refresh_tilt_state(&self) -> Result<TiltState> {
        self.inner.ensure_open()?;
        let raw = self
            .inner
            .driver
            .update_tilt_state(self.inner.native)
            .map_err(|code| SessionError::driver("update_tilt_state", code))?;

        let state = raw.to_state();
        *lock(&self.inner.tilt) = TiltSnapshot { raw, state };
        trace!("Device {} tilt state {:?}", self.inner.index, state);
        Ok(state)
    }

    /// Cached tilt snapshot from the last refresh
    pub fn tilt_state(&self) -> Result<TiltState> {
        self.inner.ensure_open()?;
        Ok(lock(&self.inner.tilt).state)
    }

    /// Cached raw register snapshot from the last refresh
    pub fn raw_tilt_state(&self) -> Result<RawTiltState> {
        self.inner.ensure_open()?;
        Ok(lock(&self.inner.tilt).raw)
    }

    /// Cached tilt angle in degrees
    pub fn tilt_angle(&self) -> Result<f64> {
        Ok(self.tilt_state()?.angle_degrees)
    }

    /// Cached motor status
    pub fn tilt_status(&self) -> Result<TiltStatus> {
        Ok(self.tilt_state()?.status)
    }

    /// Cached acceleration (x, y, z) in m/s²
    pub fn accel(&self) -> Result<[f64; 3]> {
        Ok(self.tilt_state()?.accel)
    }

    // ------------------------------------------------------------------
    // Teardown
    // ------------------------------------------------------------------

    /// Stop both streams, release buffers and close the native handle
    ///
    /// Every later operation fails with `DisposedSession`. Closing twice is a
    /// no-op. The session counts as closed even if the driver reports an
    /// error, which is returned after the remaining teardown steps ran.
    pub fn close(&self) -> Result<()> {
        self.inner.close()
    }
}

impl Drop for DeviceSession {
    fn drop(&mut self) {
        if let Err(e) = self.inner.close() {
            warn!("Error closing device {} on drop: {}", self.inner.index, e);
        }
    }
}

impl std::fmt::Debug for DeviceSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceSession")
            .field("index", &self.inner.index)
            .field("native", &self.inner.native)
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{SimConfig, SimDriver};
    use common::test_utils::FrameRecorder;

    fn open(driver: &Arc<SimDriver>) -> DeviceSession {
        let native = driver.open_device(0).unwrap();
        DeviceSession::new(0, native, driver.clone(), Weak::new())
    }

    #[test]
    fn test_stream_states() {
        let driver = Arc::new(SimDriver::new(SimConfig::manual(1)));
        let session = open(&driver);

        assert_eq!(session.stream_state(StreamKind::Video).unwrap(), StreamState::Idle);
        assert!(session.video_mode().unwrap().is_none());

        session.set_video_format(VideoFormat::Rgb).unwrap();
        assert_eq!(
            session.stream_state(StreamKind::Video).unwrap(),
            StreamState::Configured
        );
        assert_eq!(
            session.stream_state(StreamKind::Depth).unwrap(),
            StreamState::Idle
        );

        let recorder = FrameRecorder::new();
        session.start_video(recorder.handler()).unwrap();
        assert_eq!(
            session.stream_state(StreamKind::Video).unwrap(),
            StreamState::Streaming
        );
        assert!(driver.is_streaming(0, StreamKind::Video));

        session.stop_video().unwrap();
        assert_eq!(
            session.stream_state(StreamKind::Video).unwrap(),
            StreamState::Configured
        );
        assert!(!driver.has_frame_callback(0, StreamKind::Video));
    }

    #[test]
    fn test_start_reallocates_buffer() {
        let driver = Arc::new(SimDriver::new(SimConfig::manual(1)));
        let session = open(&driver);

        session.set_depth_format(DepthFormat::D11Bit).unwrap();
        let configured = driver.registered_buffer(0, StreamKind::Depth).unwrap();

        session.start_depth(FrameRecorder::new().handler()).unwrap();
        let streaming = driver.registered_buffer(0, StreamKind::Depth).unwrap();
        assert!(!streaming.same_buffer(&configured));
        assert_eq!(streaming.len(), 614_400);
        assert!(streaming.epoch() > configured.epoch());
    }

    #[test]
    fn test_driver_start_failure_stays_configured() {
        let driver = Arc::new(SimDriver::new(SimConfig::manual(1)));
        let session = open(&driver);
        session.set_video_format(VideoFormat::Bayer).unwrap();

        driver.fail_next("start_stream", -6);
        let err = session.start_video(FrameRecorder::new().handler()).unwrap_err();
        assert_eq!(err.driver_code(), Some(-6));
        assert_eq!(
            session.stream_state(StreamKind::Video).unwrap(),
            StreamState::Configured
        );

        // Late callbacks from the failed start are dropped
        driver.inject_frames(0, StreamKind::Video, 3);
        assert_eq!(session.frames_delivered(StreamKind::Video).unwrap(), 0);

        session.start_video(FrameRecorder::new().handler()).unwrap();
    }

    #[test]
    fn test_mode_change_while_streaming_is_rejected() {
        let driver = Arc::new(SimDriver::new(SimConfig::manual(1)));
        let session = open(&driver);
        let rgb = session.set_video_format(VideoFormat::Rgb).unwrap();
        session.start_video(FrameRecorder::new().handler()).unwrap();

        let err = session.set_video_format(VideoFormat::Bayer).unwrap_err();
        assert!(matches!(err, SessionError::State(_)));
        assert_eq!(session.video_mode().unwrap(), Some(rgb));
        assert_eq!(driver.applied_mode(0, StreamKind::Video), Some(rgb));
    }

    #[test]
    fn test_driver_mode_failure_leaves_mode() {
        let driver = Arc::new(SimDriver::new(SimConfig::manual(1)));
        let session = open(&driver);
        let rgb = session.set_video_format(VideoFormat::Rgb).unwrap();

        driver.fail_next("set_mode", -1);
        assert!(session.set_video_format(VideoFormat::Bayer).is_err());
        assert_eq!(session.video_mode().unwrap(), Some(rgb));
    }

    #[test]
    fn test_panicking_handler_does_not_poison_stream() {
        let driver = Arc::new(SimDriver::new(SimConfig::manual(1)));
        let session = open(&driver);
        session.set_video_format(VideoFormat::Bayer).unwrap();
        session
            .start_video(|frame: &Frame<'_>| {
                if frame.timestamp < u32::MAX {
                    panic!("handler failure");
                }
            })
            .unwrap();

        driver.inject_frames(0, StreamKind::Video, 2);
        assert_eq!(session.frames_delivered(StreamKind::Video).unwrap(), 2);
        session.stop_video().unwrap();
    }

    #[test]
    fn test_led_and_tilt_failures_surface_driver_code() {
        let driver = Arc::new(SimDriver::new(SimConfig::manual(1)));
        let session = open(&driver);

        session.set_led(LedStatus::Yellow).unwrap();
        assert_eq!(driver.led(0), Some(LedStatus::Yellow));
        assert_eq!(session.led().unwrap(), Some(LedStatus::Yellow));

        driver.fail_next("set_led", -9);
        assert_eq!(session.set_led(LedStatus::Red).unwrap_err().driver_code(), Some(-9));
        assert_eq!(session.led().unwrap(), Some(LedStatus::Yellow));

        driver.fail_next("update_tilt_state", -1);
        assert!(session.refresh_tilt_state().is_err());
        assert_eq!(session.tilt_state().unwrap(), TiltState::default());
    }

    #[test]
    fn test_drop_closes_device() {
        let driver = Arc::new(SimDriver::new(SimConfig::manual(1)));
        let session = open(&driver);
        session.set_video_format(VideoFormat::Rgb).unwrap();
        session.start_video(FrameRecorder::new().handler()).unwrap();

        drop(session);
        assert_eq!(driver.open_devices(), 0);
        assert!(!driver.is_streaming(0, StreamKind::Video));
    }
}
