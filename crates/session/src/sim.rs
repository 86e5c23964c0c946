//! Simulated sensor driver
//!
//! Stands in for the hardware in tests and in `kinect-ctl --simulate`. Each
//! simulated device produces synthetic frames for its streaming cameras on a
//! fixed interval, drives a tilt motor toward its commanded angle at a fixed
//! rate, and derives the accelerometer reading from the current angle.
//!
//! Synthetic frames start with the epoch tag of the buffer they were written
//! into (8 bytes, little endian) followed by the frame sequence number
//! (4 bytes), then a gradient pattern.
//!
//! Tests can script failures for any driver operation with `fail_next` and
//! deliver frames on demand with `inject_frames`.

use crate::buffer::FrameBuffer;
use crate::driver::{
    Driver, DriverLogCallback, DriverResult, FrameCallback, NativeDevice, status,
};
use crate::lock;
use catalog::{
    COUNTS_PER_G, DeviceFlags, FrameMode, LedStatus, LogLevel, MAX_TILT_DEGREES, RawTiltState,
    StreamKind, TiltStatus, clamp_tilt_degrees,
};
use rand::Rng;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Sensor clock rate the frame timestamps are expressed in
const TIMESTAMP_HZ: u64 = 60_000_000;

/// Angle difference below which the motor counts as arrived
const ARRIVAL_DEGREES: f64 = 0.25;

/// Simulated sensor parameters
#[derive(Debug, Clone, PartialEq)]
pub struct SimConfig {
    /// Number of attached devices
    pub device_count: u32,
    /// Interval between generated frames, `None` to only deliver injected frames
    pub frame_interval: Option<Duration>,
    /// Tilt motor speed in degrees per second
    pub tilt_rate: f64,
    /// Add ±half a degree of encoder noise to tilt readings
    pub tilt_noise: bool,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            device_count: 1,
            frame_interval: Some(Duration::from_millis(33)),
            tilt_rate: 20.0,
            tilt_noise: true,
        }
    }
}

impl SimConfig {
    /// Devices that only deliver frames through `inject_frames`
    pub fn manual(device_count: u32) -> Self {
        Self {
            device_count,
            frame_interval: None,
            tilt_rate: 200.0,
            tilt_noise: false,
        }
    }
}

#[derive(Default)]
struct SimStream {
    mode: Option<FrameMode>,
    buffer: Option<FrameBuffer>,
    callback: Option<FrameCallback>,
    /// Last cleared callback, used to model transfers completing after stop
    retired: Option<FrameCallback>,
    streaming: bool,
    next_due: Option<Instant>,
    sequence: u32,
    registrations: u64,
}

impl SimStream {
    fn timestamp(&self) -> u32 {
        let rate = self.mode.map(|m| u64::from(m.framerate.max(1))).unwrap_or(30);
        (u64::from(self.sequence) * (TIMESTAMP_HZ / rate)) as u32
    }
}

struct SimMotor {
    angle: f64,
    target: f64,
    at_limit: bool,
    updated: Instant,
}

impl SimMotor {
    fn new() -> Self {
        Self {
            angle: 0.0,
            target: 0.0,
            at_limit: false,
            updated: Instant::now(),
        }
    }

    fn advance(&mut self, rate: f64) {
        let now = Instant::now();
        let step = rate * now.duration_since(self.updated).as_secs_f64();
        self.updated = now;

        let remaining = self.target - self.angle;
        if remaining.abs() <= step {
            self.angle = self.target;
        } else {
            self.angle += step.copysign(remaining);
        }
    }

    fn status(&self) -> TiltStatus {
        if (self.target - self.angle).abs() > ARRIVAL_DEGREES {
            TiltStatus::Moving
        } else if self.at_limit {
            TiltStatus::Limit
        } else {
            TiltStatus::Stopped
        }
    }
}

struct SimDevice {
    index: u32,
    streams: [SimStream; 2],
    motor: SimMotor,
    led: Option<LedStatus>,
}

impl SimDevice {
    fn stream(&self, kind: StreamKind) -> &SimStream {
        &self.streams[slot_index(kind)]
    }

    fn stream_mut(&mut self, kind: StreamKind) -> &mut SimStream {
        &mut self.streams[slot_index(kind)]
    }
}

struct SimState {
    next_handle: u64,
    devices: HashMap<NativeDevice, SimDevice>,
    subdevices: DeviceFlags,
    log_level: LogLevel,
    log_callback: Option<DriverLogCallback>,
    failures: HashMap<&'static str, VecDeque<i32>>,
    shut_down: bool,
}

impl SimState {
    fn scripted_failure(&mut self, op: &'static str) -> DriverResult<()> {
        match self.failures.get_mut(op).and_then(VecDeque::pop_front) {
            Some(code) => Err(code),
            None => Ok(()),
        }
    }

    fn device_mut(&mut self, device: NativeDevice) -> DriverResult<&mut SimDevice> {
        self.devices.get_mut(&device).ok_or(status::NO_DEVICE)
    }

    fn by_index(&self, index: u32) -> Option<&SimDevice> {
        self.devices.values().find(|d| d.index == index)
    }

    fn by_index_mut(&mut self, index: u32) -> Option<&mut SimDevice> {
        self.devices.values_mut().find(|d| d.index == index)
    }
}

/// A frame ready to be written and announced outside the state lock
struct PendingFrame {
    buffer: Option<FrameBuffer>,
    callback: FrameCallback,
    sequence: u32,
    timestamp: u32,
}

impl PendingFrame {
    fn deliver(self) {
        if let Some(buffer) = &self.buffer {
            fill_synthetic(buffer, self.sequence);
        }
        (self.callback)(self.timestamp);
    }
}

/// In-process simulated sensor
pub struct SimDriver {
    config: SimConfig,
    state: Mutex<SimState>,
}

impl SimDriver {
    /// Create a simulated driver with `config`
    pub fn new(config: SimConfig) -> Self {
        Self {
            config,
            state: Mutex::new(SimState {
                next_handle: 1,
                devices: HashMap::new(),
                subdevices: DeviceFlags::default_selection(),
                log_level: LogLevel::Warning,
                log_callback: None,
                failures: HashMap::new(),
                shut_down: false,
            }),
        }
    }

    /// Simulation parameters
    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    /// Make the next call of driver operation `op` fail with `code`
    ///
    /// `op` is the `Driver` method name, e.g. `"start_stream"`. Failures queue
    /// up when scripted repeatedly.
    pub fn fail_next(&self, op: &'static str, code: i32) {
        lock(&self.state)
            .failures
            .entry(op)
            .or_default()
            .push_back(code);
    }

    /// Deliver `count` frames on the calling thread, as if transfers completed
    ///
    /// Uses the registered callback of the stream, or the last cleared one
    /// when the stream was stopped. Returns how many callbacks were invoked.
    pub fn inject_frames(&self, index: u32, kind: StreamKind, count: u32) -> u32 {
        let mut delivered = 0;
        for _ in 0..count {
            let pending = {
                let mut state = lock(&self.state);
                let Some(device) = state.by_index_mut(index) else {
                    break;
                };
                let stream = device.stream_mut(kind);
                let Some(callback) = stream.callback.clone().or_else(|| stream.retired.clone())
                else {
                    break;
                };
                stream.sequence = stream.sequence.wrapping_add(1);
                PendingFrame {
                    buffer: stream.buffer.clone(),
                    callback,
                    sequence: stream.sequence,
                    timestamp: stream.timestamp(),
                }
            };
            pending.deliver();
            delivered += 1;
        }
        delivered
    }

    /// Emit a driver log message through the installed callback
    pub fn emit_log(&self, device: Option<u32>, level: LogLevel, message: &str) {
        let callback = {
            let state = lock(&self.state);
            if !level.passes(state.log_level) {
                return;
            }
            state.log_callback.clone()
        };
        if let Some(callback) = callback {
            callback(device, level, message);
        }
    }

    /// Buffer currently registered for a stream of device `index`
    pub fn registered_buffer(&self, index: u32, kind: StreamKind) -> Option<FrameBuffer> {
        lock(&self.state)
            .by_index(index)
            .and_then(|d| d.stream(kind).buffer.clone())
    }

    /// How many buffers were ever registered for a stream of device `index`
    pub fn buffer_registrations(&self, index: u32, kind: StreamKind) -> u64 {
        lock(&self.state)
            .by_index(index)
            .map(|d| d.stream(kind).registrations)
            .unwrap_or(0)
    }

    /// Whether a stream of device `index` is streaming
    pub fn is_streaming(&self, index: u32, kind: StreamKind) -> bool {
        lock(&self.state)
            .by_index(index)
            .is_some_and(|d| d.stream(kind).streaming)
    }

    /// Mode applied to a stream of device `index`
    pub fn applied_mode(&self, index: u32, kind: StreamKind) -> Option<FrameMode> {
        lock(&self.state)
            .by_index(index)
            .and_then(|d| d.stream(kind).mode)
    }

    /// Whether a frame callback is registered for a stream of device `index`
    pub fn has_frame_callback(&self, index: u32, kind: StreamKind) -> bool {
        lock(&self.state)
            .by_index(index)
            .is_some_and(|d| d.stream(kind).callback.is_some())
    }

    /// LED state last set on device `index`
    pub fn led(&self, index: u32) -> Option<LedStatus> {
        lock(&self.state).by_index(index).and_then(|d| d.led)
    }

    /// Number of open devices
    pub fn open_devices(&self) -> usize {
        lock(&self.state).devices.len()
    }

    /// Sub-devices selected for future opens
    pub fn subdevices(&self) -> DeviceFlags {
        lock(&self.state).subdevices
    }

    /// Whether `shutdown` was called
    pub fn is_shut_down(&self) -> bool {
        lock(&self.state).shut_down
    }

    fn require_subdevice(state: &SimState, flag: DeviceFlags) -> DriverResult<()> {
        if state.subdevices.contains(flag) {
            Ok(())
        } else {
            Err(status::NOT_SUPPORTED)
        }
    }

    fn collect_due(&self, state: &mut SimState, now: Instant) -> (Vec<PendingFrame>, Option<Instant>) {
        let mut due = Vec::new();
        let mut next_wake: Option<Instant> = None;
        let Some(interval) = self.config.frame_interval else {
            return (due, None);
        };

        for device in state.devices.values_mut() {
            for stream in device.streams.iter_mut() {
                if !stream.streaming {
                    continue;
                }
                let Some(next_due) = stream.next_due else {
                    continue;
                };
                if next_due <= now {
                    let Some(callback) = stream.callback.clone() else {
                        continue;
                    };
                    stream.sequence = stream.sequence.wrapping_add(1);
                    due.push(PendingFrame {
                        buffer: stream.buffer.clone(),
                        callback,
                        sequence: stream.sequence,
                        timestamp: stream.timestamp(),
                    });
                    // Skip missed slots instead of bursting
                    let mut following = next_due + interval;
                    if following <= now {
                        following = now + interval;
                    }
                    stream.next_due = Some(following);
                }
                let wake = stream.next_due.unwrap_or(now + interval);
                next_wake = Some(next_wake.map_or(wake, |w| w.min(wake)));
            }
        }
        (due, next_wake)
    }
}

impl Default for SimDriver {
    fn default() -> Self {
        Self::new(SimConfig::default())
    }
}

impl Driver for SimDriver {
    fn name(&self) -> &'static str {
        "sim"
    }

    fn num_devices(&self) -> DriverResult<u32> {
        let state = lock(&self.state);
        if state.shut_down {
            return Err(status::IO);
        }
        Ok(self.config.device_count)
    }

    fn select_subdevices(&self, flags: DeviceFlags) {
        lock(&self.state).subdevices = flags;
    }

    fn open_device(&self, index: u32) -> DriverResult<NativeDevice> {
        let handle = {
            let mut state = lock(&self.state);
            if state.shut_down {
                return Err(status::IO);
            }
            state.scripted_failure("open_device")?;
            if index >= self.config.device_count {
                return Err(status::NOT_FOUND);
            }
            if state.by_index(index).is_some() {
                return Err(status::BUSY);
            }

            let handle = NativeDevice(state.next_handle);
            state.next_handle += 1;
            state.devices.insert(
                handle,
                SimDevice {
                    index,
                    streams: Default::default(),
                    motor: SimMotor::new(),
                    led: None,
                },
            );
            handle
        };

        self.emit_log(Some(index), LogLevel::Info, "Opened simulated device");
        Ok(handle)
    }

    fn close_device(&self, device: NativeDevice) -> DriverResult<()> {
        let index = {
            let mut state = lock(&self.state);
            state.scripted_failure("close_device")?;
            let removed = state.devices.remove(&device).ok_or(status::NO_DEVICE)?;
            removed.index
        };

        self.emit_log(Some(index), LogLevel::Info, "Closed simulated device");
        Ok(())
    }

    fn set_log_level(&self, level: LogLevel) {
        lock(&self.state).log_level = level;
    }

    fn set_log_callback(&self, callback: Option<DriverLogCallback>) {
        lock(&self.state).log_callback = callback;
    }

    fn set_mode(
        &self,
        device: NativeDevice,
        kind: StreamKind,
        mode: &FrameMode,
    ) -> DriverResult<()> {
        let mut state = lock(&self.state);
        state.scripted_failure("set_mode")?;
        if !mode.is_valid || mode.kind() != kind {
            return Err(status::INVALID_PARAM);
        }
        let stream = state.device_mut(device)?.stream_mut(kind);
        if stream.streaming {
            return Err(status::BUSY);
        }
        stream.mode = Some(*mode);
        Ok(())
    }

    fn set_buffer(
        &self,
        device: NativeDevice,
        kind: StreamKind,
        buffer: Option<FrameBuffer>,
    ) -> DriverResult<()> {
        let mut state = lock(&self.state);
        state.scripted_failure("set_buffer")?;
        let stream = state.device_mut(device)?.stream_mut(kind);
        if buffer.is_some() {
            stream.registrations += 1;
        }
        stream.buffer = buffer;
        Ok(())
    }

    fn set_frame_callback(
        &self,
        device: NativeDevice,
        kind: StreamKind,
        callback: Option<FrameCallback>,
    ) {
        let mut state = lock(&self.state);
        if let Ok(dev) = state.device_mut(device) {
            let stream = dev.stream_mut(kind);
            let previous = std::mem::replace(&mut stream.callback, callback);
            if previous.is_some() {
                stream.retired = previous;
            }
        }
    }

    fn start_stream(&self, device: NativeDevice, kind: StreamKind) -> DriverResult<()> {
        let mut state = lock(&self.state);
        state.scripted_failure("start_stream")?;
        Self::require_subdevice(&state, DeviceFlags::CAMERA)?;

        let interval = self.config.frame_interval;
        let stream = state.device_mut(device)?.stream_mut(kind);
        if stream.streaming {
            return Err(status::BUSY);
        }
        let Some(mode) = stream.mode else {
            return Err(status::INVALID_PARAM);
        };
        match &stream.buffer {
            Some(buffer) if buffer.len() == mode.frame_size() => {}
            _ => return Err(status::INVALID_PARAM),
        }

        stream.streaming = true;
        stream.next_due = interval.map(|i| Instant::now() + i);
        Ok(())
    }

    fn stop_stream(&self, device: NativeDevice, kind: StreamKind) -> DriverResult<()> {
        let mut state = lock(&self.state);
        state.scripted_failure("stop_stream")?;
        let stream = state.device_mut(device)?.stream_mut(kind);
        if !stream.streaming {
            return Err(status::IO);
        }
        stream.streaming = false;
        stream.next_due = None;
        Ok(())
    }

    fn update_tilt_state(&self, device: NativeDevice) -> DriverResult<RawTiltState> {
        let mut state = lock(&self.state);
        state.scripted_failure("update_tilt_state")?;
        Self::require_subdevice(&state, DeviceFlags::MOTOR)?;

        let rate = self.config.tilt_rate;
        let motor = &mut state.device_mut(device)?.motor;
        motor.advance(rate);

        let mut half_degrees = (motor.angle * 2.0).round() as i32;
        if self.config.tilt_noise {
            half_degrees += rand::rng().random_range(-1..=1);
        }
        let radians = motor.angle.to_radians();

        Ok(RawTiltState {
            accelerometer_x: 0,
            accelerometer_y: (-COUNTS_PER_G * radians.cos()).round() as i16,
            accelerometer_z: (COUNTS_PER_G * radians.sin()).round() as i16,
            tilt_angle: half_degrees.clamp(i32::from(i8::MIN), i32::from(i8::MAX)) as i8,
            tilt_status: motor.status(),
        })
    }

    fn set_tilt_degrees(&self, device: NativeDevice, degrees: f64) -> DriverResult<()> {
        let mut state = lock(&self.state);
        state.scripted_failure("set_tilt_degrees")?;
        Self::require_subdevice(&state, DeviceFlags::MOTOR)?;

        let rate = self.config.tilt_rate;
        let motor = &mut state.device_mut(device)?.motor;
        motor.advance(rate);
        motor.target = clamp_tilt_degrees(degrees);
        motor.at_limit = degrees.abs() >= MAX_TILT_DEGREES;
        Ok(())
    }

    fn set_led(&self, device: NativeDevice, led: LedStatus) -> DriverResult<()> {
        let mut state = lock(&self.state);
        state.scripted_failure("set_led")?;
        Self::require_subdevice(&state, DeviceFlags::MOTOR)?;
        state.device_mut(device)?.led = Some(led);
        Ok(())
    }

    fn process_events(&self, timeout: Duration) -> DriverResult<()> {
        let now = Instant::now();
        let (due, next_wake) = {
            let mut state = lock(&self.state);
            if state.shut_down {
                return Err(status::IO);
            }
            state.scripted_failure("process_events")?;
            self.collect_due(&mut state, now)
        };

        if due.is_empty() {
            let wait = next_wake
                .map(|w| w.saturating_duration_since(now))
                .unwrap_or(timeout)
                .min(timeout);
            std::thread::sleep(wait);
            return Ok(());
        }

        for frame in due {
            frame.deliver();
        }
        Ok(())
    }

    fn shutdown(&self) -> DriverResult<()> {
        let mut state = lock(&self.state);
        state.scripted_failure("shutdown")?;
        state.devices.clear();
        state.log_callback = None;
        state.shut_down = true;
        Ok(())
    }
}

fn slot_index(kind: StreamKind) -> usize {
    match kind {
        StreamKind::Video => 0,
        StreamKind::Depth => 1,
    }
}

fn fill_synthetic(buffer: &FrameBuffer, sequence: u32) {
    let tag = buffer.epoch().to_le_bytes();
    let sequence_bytes = sequence.to_le_bytes();
    buffer.write(|data| {
        data.fill(sequence as u8);
        let header = tag.into_iter().chain(sequence_bytes);
        for (dst, src) in data.iter_mut().zip(header) {
            *dst = src;
        }
    });
}

/// Read the epoch tag a simulated frame was stamped with
pub fn frame_epoch_tag(data: &[u8]) -> Option<u64> {
    let bytes: [u8; 8] = data.get(..8)?.try_into().ok()?;
    Some(u64::from_le_bytes(bytes))
}

/// Read the sequence number of a simulated frame
pub fn frame_sequence(data: &[u8]) -> Option<u32> {
    let bytes: [u8; 4] = data.get(8..12)?.try_into().ok()?;
    Some(u32::from_le_bytes(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use catalog::{Resolution, VideoFormat, find_video_mode};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn streaming_device(driver: &SimDriver, counter: Arc<AtomicU32>) -> NativeDevice {
        let device = driver.open_device(0).unwrap();
        let mode = find_video_mode(Resolution::Medium, VideoFormat::Bayer);
        driver.set_mode(device, StreamKind::Video, &mode).unwrap();
        driver
            .set_buffer(device, StreamKind::Video, Some(FrameBuffer::allocate(&mode, 9)))
            .unwrap();
        driver.set_frame_callback(
            device,
            StreamKind::Video,
            Some(Arc::new(move |_ts: u32| {
                counter.fetch_add(1, Ordering::SeqCst);
            })),
        );
        driver.start_stream(device, StreamKind::Video).unwrap();
        device
    }

    #[test]
    fn test_open_errors() {
        let driver = SimDriver::new(SimConfig::manual(1));
        assert_eq!(driver.num_devices(), Ok(1));
        assert_eq!(driver.open_device(1), Err(status::NOT_FOUND));

        let device = driver.open_device(0).unwrap();
        assert_eq!(driver.open_device(0), Err(status::BUSY));
        driver.close_device(device).unwrap();
        assert_eq!(driver.close_device(device), Err(status::NO_DEVICE));
    }

    #[test]
    fn test_injected_frames_are_stamped() {
        let driver = SimDriver::new(SimConfig::manual(1));
        let counter = Arc::new(AtomicU32::new(0));
        streaming_device(&driver, counter.clone());

        assert_eq!(driver.inject_frames(0, StreamKind::Video, 3), 3);
        assert_eq!(counter.load(Ordering::SeqCst), 3);

        let buffer = driver.registered_buffer(0, StreamKind::Video).unwrap();
        buffer.read(|data| {
            assert_eq!(frame_epoch_tag(data), Some(9));
            assert_eq!(frame_sequence(data), Some(3));
            assert!(data[12..].iter().all(|&byte| byte == 3));
        });
    }

    #[test]
    fn test_generated_frames() {
        let driver = SimDriver::new(SimConfig {
            frame_interval: Some(Duration::from_millis(1)),
            ..SimConfig::default()
        });
        let counter = Arc::new(AtomicU32::new(0));
        streaming_device(&driver, counter.clone());

        for _ in 0..20 {
            driver.process_events(Duration::from_millis(5)).unwrap();
        }
        assert!(counter.load(Ordering::SeqCst) >= 5);
    }

    #[test]
    fn test_start_requires_matching_buffer() {
        let driver = SimDriver::new(SimConfig::manual(1));
        let device = driver.open_device(0).unwrap();
        assert_eq!(driver.start_stream(device, StreamKind::Depth), Err(status::INVALID_PARAM));

        let mode = find_video_mode(Resolution::High, VideoFormat::Rgb);
        driver.set_mode(device, StreamKind::Video, &mode).unwrap();
        let small = find_video_mode(Resolution::Medium, VideoFormat::Rgb);
        driver
            .set_buffer(device, StreamKind::Video, Some(FrameBuffer::allocate(&small, 1)))
            .unwrap();
        assert_eq!(driver.start_stream(device, StreamKind::Video), Err(status::INVALID_PARAM));
    }

    #[test]
    fn test_scripted_failures_queue() {
        let driver = SimDriver::new(SimConfig::manual(1));
        driver.fail_next("open_device", -3);
        driver.fail_next("open_device", -4);
        assert_eq!(driver.open_device(0), Err(-3));
        assert_eq!(driver.open_device(0), Err(-4));
        assert!(driver.open_device(0).is_ok());
    }

    #[test]
    fn test_motor_moves_toward_target() {
        let driver = SimDriver::new(SimConfig::manual(1));
        let device = driver.open_device(0).unwrap();
        driver.set_tilt_degrees(device, 10.0).unwrap();

        std::thread::sleep(Duration::from_millis(100));
        let raw = driver.update_tilt_state(device).unwrap();
        assert_eq!(raw.tilt_status, TiltStatus::Stopped);
        assert_eq!(raw.tilt_degrees(), 10.0);
        assert!(raw.accelerometer_z > 0);

        driver.set_tilt_degrees(device, 45.0).unwrap();
        std::thread::sleep(Duration::from_millis(200));
        let raw = driver.update_tilt_state(device).unwrap();
        assert_eq!(raw.tilt_status, TiltStatus::Limit);
        assert_eq!(raw.tilt_degrees(), 31.0);
    }

    #[test]
    fn test_motor_requires_motor_subdevice() {
        let driver = SimDriver::new(SimConfig::manual(1));
        driver.select_subdevices(DeviceFlags::CAMERA);
        let device = driver.open_device(0).unwrap();
        assert_eq!(driver.set_led(device, LedStatus::Red), Err(status::NOT_SUPPORTED));
    }
}
