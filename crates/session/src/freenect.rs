//! libfreenect backend
//!
//! Binds the native driver through its C API. Frame buffers are registered
//! by address, so every registered `FrameBuffer` handle is kept alive here
//! until it is replaced or cleared. Frame callbacks reach the session through
//! a per-device callback table installed as the device's user pointer.

use crate::buffer::FrameBuffer;
use crate::driver::{
    Driver, DriverLogCallback, DriverResult, FrameCallback, NativeDevice, check, status,
};
use crate::lock;
use catalog::{
    DeviceFlags, FrameMode, LedStatus, LogLevel, PixelFormat, RawTiltState, StreamKind,
    TiltStatus,
};
use libc::{c_char, c_double, c_int, c_void, timeval};
use std::collections::HashMap;
use std::ffi::CStr;
use std::sync::Mutex;
use std::time::Duration;
use tracing::warn;

#[allow(non_camel_case_types)]
#[repr(C)]
struct freenect_context {
    _private: [u8; 0],
}

#[allow(non_camel_case_types)]
#[repr(C)]
struct freenect_device {
    _private: [u8; 0],
}

#[allow(non_camel_case_types)]
#[repr(C)]
#[derive(Clone, Copy)]
struct freenect_frame_mode {
    reserved: u32,
    resolution: c_int,
    format: i32,
    bytes: i32,
    width: i16,
    height: i16,
    data_bits_per_pixel: i8,
    padding_bits_per_pixel: i8,
    framerate: i8,
    is_valid: i8,
}

#[allow(non_camel_case_types)]
#[repr(C)]
struct freenect_raw_tilt_state {
    accelerometer_x: i16,
    accelerometer_y: i16,
    accelerometer_z: i16,
    tilt_angle: i8,
    tilt_status: c_int,
}

type FrameCb = unsafe extern "C" fn(*mut freenect_device, *mut c_void, u32);
type LogCb = unsafe extern "C" fn(*mut freenect_context, c_int, *const c_char);

#[link(name = "freenect")]
unsafe extern "C" {
    fn freenect_init(ctx: *mut *mut freenect_context, usb_ctx: *mut c_void) -> c_int;
    fn freenect_shutdown(ctx: *mut freenect_context) -> c_int;
    fn freenect_set_log_level(ctx: *mut freenect_context, level: c_int);
    fn freenect_set_log_callback(ctx: *mut freenect_context, cb: Option<LogCb>);
    fn freenect_process_events_timeout(ctx: *mut freenect_context, timeout: *mut timeval) -> c_int;
    fn freenect_num_devices(ctx: *mut freenect_context) -> c_int;
    fn freenect_select_subdevices(ctx: *mut freenect_context, subdevs: c_int);
    fn freenect_open_device(
        ctx: *mut freenect_context,
        dev: *mut *mut freenect_device,
        index: c_int,
    ) -> c_int;
    fn freenect_close_device(dev: *mut freenect_device) -> c_int;
    fn freenect_set_user(dev: *mut freenect_device, user: *mut c_void);
    fn freenect_get_user(dev: *mut freenect_device) -> *mut c_void;
    fn freenect_set_depth_callback(dev: *mut freenect_device, cb: Option<FrameCb>);
    fn freenect_set_video_callback(dev: *mut freenect_device, cb: Option<FrameCb>);
    fn freenect_set_depth_buffer(dev: *mut freenect_device, buf: *mut c_void) -> c_int;
    fn freenect_set_video_buffer(dev: *mut freenect_device, buf: *mut c_void) -> c_int;
    fn freenect_start_depth(dev: *mut freenect_device) -> c_int;
    fn freenect_start_video(dev: *mut freenect_device) -> c_int;
    fn freenect_stop_depth(dev: *mut freenect_device) -> c_int;
    fn freenect_stop_video(dev: *mut freenect_device) -> c_int;
    fn freenect_update_tilt_state(dev: *mut freenect_device) -> c_int;
    fn freenect_get_tilt_state(dev: *mut freenect_device) -> *mut freenect_raw_tilt_state;
    fn freenect_set_tilt_degs(dev: *mut freenect_device, angle: c_double) -> c_int;
    fn freenect_set_led(dev: *mut freenect_device, option: c_int) -> c_int;
    fn freenect_find_video_mode(res: c_int, fmt: c_int) -> freenect_frame_mode;
    fn freenect_find_depth_mode(res: c_int, fmt: c_int) -> freenect_frame_mode;
    fn freenect_set_video_mode(dev: *mut freenect_device, mode: freenect_frame_mode) -> c_int;
    fn freenect_set_depth_mode(dev: *mut freenect_device, mode: freenect_frame_mode) -> c_int;
}

/// Log sink shared with the C log trampoline, which has no user pointer
static LOG_SINK: Mutex<Option<DriverLogCallback>> = Mutex::new(None);

/// Callback table a device's user pointer refers to
struct DeviceCallbacks {
    index: u32,
    video: Mutex<Option<FrameCallback>>,
    depth: Mutex<Option<FrameCallback>>,
}

struct OpenDevice {
    raw: *mut freenect_device,
    callbacks: Box<DeviceCallbacks>,
    buffers: [Option<FrameBuffer>; 2],
}

struct Inner {
    ctx: *mut freenect_context,
    devices: HashMap<NativeDevice, OpenDevice>,
    next_handle: u64,
    shut_down: bool,
}

/// Native libfreenect driver
pub struct FreenectDriver {
    inner: Mutex<Inner>,
}

// The context and device pointers are only dereferenced by libfreenect,
// which serializes access internally; all Rust-side state is behind `inner`.
unsafe impl Send for FreenectDriver {}
unsafe impl Sync for FreenectDriver {}

impl FreenectDriver {
    /// Initialize a libfreenect context
    pub fn new() -> DriverResult<Self> {
        let mut ctx = std::ptr::null_mut();
        check(unsafe { freenect_init(&mut ctx, std::ptr::null_mut()) })?;
        if ctx.is_null() {
            return Err(status::IO);
        }
        unsafe { freenect_set_log_callback(ctx, Some(log_trampoline)) };

        Ok(Self {
            inner: Mutex::new(Inner {
                ctx,
                devices: HashMap::new(),
                next_handle: 1,
                shut_down: false,
            }),
        })
    }

    fn with_device<R>(
        &self,
        device: NativeDevice,
        f: impl FnOnce(&mut OpenDevice) -> DriverResult<R>,
    ) -> DriverResult<R> {
        let mut inner = lock(&self.inner);
        let open = inner.devices.get_mut(&device).ok_or(status::NO_DEVICE)?;
        f(open)
    }
}

fn slot_index(kind: StreamKind) -> usize {
    match kind {
        StreamKind::Video => 0,
        StreamKind::Depth => 1,
    }
}

unsafe extern "C" fn log_trampoline(
    _ctx: *mut freenect_context,
    level: c_int,
    message: *const c_char,
) {
    if message.is_null() {
        return;
    }
    let Ok(level) = LogLevel::from_raw(level) else {
        return;
    };
    let sink = lock(&LOG_SINK).clone();
    if let Some(sink) = sink {
        let text = unsafe { CStr::from_ptr(message) }.to_string_lossy();
        let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            sink(None, level, &*text)
        }));
    }
}

unsafe fn frame_trampoline(dev: *mut freenect_device, kind: StreamKind, timestamp: u32) {
    let user = unsafe { freenect_get_user(dev) } as *const DeviceCallbacks;
    if user.is_null() {
        return;
    }
    let callbacks = unsafe { &*user };
    let slot = match kind {
        StreamKind::Video => &callbacks.video,
        StreamKind::Depth => &callbacks.depth,
    };
    let callback = lock(slot).clone();
    if let Some(callback) = callback {
        let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| callback(timestamp)));
    }
}

unsafe extern "C" fn video_trampoline(dev: *mut freenect_device, _data: *mut c_void, ts: u32) {
    unsafe { frame_trampoline(dev, StreamKind::Video, ts) }
}

unsafe extern "C" fn depth_trampoline(dev: *mut freenect_device, _data: *mut c_void, ts: u32) {
    unsafe { frame_trampoline(dev, StreamKind::Depth, ts) }
}

impl Driver for FreenectDriver {
    fn name(&self) -> &'static str {
        "libfreenect"
    }

    fn num_devices(&self) -> DriverResult<u32> {
        let inner = lock(&self.inner);
        let count = unsafe { freenect_num_devices(inner.ctx) };
        if count < 0 { Err(count) } else { Ok(count as u32) }
    }

    fn select_subdevices(&self, flags: DeviceFlags) {
        let inner = lock(&self.inner);
        unsafe { freenect_select_subdevices(inner.ctx, c_int::from(flags.0)) };
    }

    fn open_device(&self, index: u32) -> DriverResult<NativeDevice> {
        let mut inner = lock(&self.inner);
        let mut raw = std::ptr::null_mut();
        check(unsafe { freenect_open_device(inner.ctx, &mut raw, index as c_int) })?;

        let callbacks = Box::new(DeviceCallbacks {
            index,
            video: Mutex::new(None),
            depth: Mutex::new(None),
        });
        unsafe {
            freenect_set_user(raw, &*callbacks as *const DeviceCallbacks as *mut c_void);
            freenect_set_video_callback(raw, Some(video_trampoline));
            freenect_set_depth_callback(raw, Some(depth_trampoline));
        }

        let handle = NativeDevice(inner.next_handle);
        inner.next_handle += 1;
        inner.devices.insert(
            handle,
            OpenDevice {
                raw,
                callbacks,
                buffers: [None, None],
            },
        );
        Ok(handle)
    }

    fn close_device(&self, device: NativeDevice) -> DriverResult<()> {
        let mut inner = lock(&self.inner);
        let open = inner.devices.remove(&device).ok_or(status::NO_DEVICE)?;
        unsafe {
            freenect_set_video_callback(open.raw, None);
            freenect_set_depth_callback(open.raw, None);
            freenect_set_user(open.raw, std::ptr::null_mut());
        }
        let result = check(unsafe { freenect_close_device(open.raw) });
        if let Err(code) = result {
            warn!(
                "libfreenect close of device {} returned {}",
                open.callbacks.index, code
            );
        }
        result
    }

    fn set_log_level(&self, level: LogLevel) {
        let inner = lock(&self.inner);
        unsafe { freenect_set_log_level(inner.ctx, level.as_raw()) };
    }

    fn set_log_callback(&self, callback: Option<DriverLogCallback>) {
        *lock(&LOG_SINK) = callback;
    }

    fn set_mode(
        &self,
        device: NativeDevice,
        kind: StreamKind,
        mode: &FrameMode,
    ) -> DriverResult<()> {
        let resolution = mode.resolution.as_raw();
        self.with_device(device, |open| {
            let code = unsafe {
                match mode.format {
                    PixelFormat::Video(format) => {
                        let native = freenect_find_video_mode(resolution, format.as_raw());
                        if native.is_valid == 0 || kind != StreamKind::Video {
                            return Err(status::INVALID_PARAM);
                        }
                        freenect_set_video_mode(open.raw, native)
                    }
                    PixelFormat::Depth(format) => {
                        let native = freenect_find_depth_mode(resolution, format.as_raw());
                        if native.is_valid == 0 || kind != StreamKind::Depth {
                            return Err(status::INVALID_PARAM);
                        }
                        freenect_set_depth_mode(open.raw, native)
                    }
                }
            };
            check(code)
        })
    }

    fn set_buffer(
        &self,
        device: NativeDevice,
        kind: StreamKind,
        buffer: Option<FrameBuffer>,
    ) -> DriverResult<()> {
        self.with_device(device, |open| {
            let ptr = buffer
                .as_ref()
                .map_or(std::ptr::null_mut(), |b| b.as_mut_ptr() as *mut c_void);
            check(unsafe {
                match kind {
                    StreamKind::Video => freenect_set_video_buffer(open.raw, ptr),
                    StreamKind::Depth => freenect_set_depth_buffer(open.raw, ptr),
                }
            })?;
            // Keep the allocation alive while native code holds its address
            open.buffers[slot_index(kind)] = buffer;
            Ok(())
        })
    }

    fn set_frame_callback(
        &self,
        device: NativeDevice,
        kind: StreamKind,
        callback: Option<FrameCallback>,
    ) {
        let result = self.with_device(device, |open| {
            let slot = match kind {
                StreamKind::Video => &open.callbacks.video,
                StreamKind::Depth => &open.callbacks.depth,
            };
            *lock(slot) = callback;
            Ok(())
        });
        if result.is_err() {
            warn!("Frame callback set on unknown device {:?}", device);
        }
    }

    fn start_stream(&self, device: NativeDevice, kind: StreamKind) -> DriverResult<()> {
        self.with_device(device, |open| {
            check(unsafe {
                match kind {
                    StreamKind::Video => freenect_start_video(open.raw),
                    StreamKind::Depth => freenect_start_depth(open.raw),
                }
            })
        })
    }

    fn stop_stream(&self, device: NativeDevice, kind: StreamKind) -> DriverResult<()> {
        // Stopping drains in-flight transfers, which may fire callbacks on
        // this thread; only the device pointer is needed, so drop the lock.
        let raw = self.with_device(device, |open| Ok(open.raw))?;
        check(unsafe {
            match kind {
                StreamKind::Video => freenect_stop_video(raw),
                StreamKind::Depth => freenect_stop_depth(raw),
            }
        })
    }

    fn update_tilt_state(&self, device: NativeDevice) -> DriverResult<RawTiltState> {
        self.with_device(device, |open| {
            check(unsafe { freenect_update_tilt_state(open.raw) })?;
            let state = unsafe { freenect_get_tilt_state(open.raw) };
            if state.is_null() {
                return Err(status::IO);
            }
            let state = unsafe { &*state };
            Ok(RawTiltState {
                accelerometer_x: state.accelerometer_x,
                accelerometer_y: state.accelerometer_y,
                accelerometer_z: state.accelerometer_z,
                tilt_angle: state.tilt_angle,
                tilt_status: TiltStatus::from_raw(state.tilt_status)
                    .unwrap_or(TiltStatus::Stopped),
            })
        })
    }

    fn set_tilt_degrees(&self, device: NativeDevice, degrees: f64) -> DriverResult<()> {
        self.with_device(device, |open| {
            check(unsafe { freenect_set_tilt_degs(open.raw, degrees) })
        })
    }

    fn set_led(&self, device: NativeDevice, led: LedStatus) -> DriverResult<()> {
        self.with_device(device, |open| {
            check(unsafe { freenect_set_led(open.raw, led.as_raw()) })
        })
    }

    fn process_events(&self, timeout: Duration) -> DriverResult<()> {
        let ctx = {
            let inner = lock(&self.inner);
            if inner.shut_down {
                return Err(status::IO);
            }
            inner.ctx
        };
        let mut tv = timeval {
            tv_sec: timeout.as_secs() as libc::time_t,
            tv_usec: timeout.subsec_micros() as libc::suseconds_t,
        };
        check(unsafe { freenect_process_events_timeout(ctx, &mut tv) })
    }

    fn shutdown(&self) -> DriverResult<()> {
        let mut inner = lock(&self.inner);
        if inner.shut_down {
            return Ok(());
        }
        inner.shut_down = true;
        inner.devices.clear();
        *lock(&LOG_SINK) = None;
        check(unsafe { freenect_shutdown(inner.ctx) })
    }
}
