//! Device session lifecycle tests against the simulated driver

use catalog::{
    DepthFormat, LedStatus, PixelFormat, Resolution, StreamKind, TiltStatus, VideoFormat,
};
use common::test_utils::{DEFAULT_TEST_TIMEOUT, FrameRecorder, wait_until};
use session::{Context, SessionError, SimConfig, StreamState, status};
use std::time::Duration;

#[test]
fn test_rgb_medium_scenario() {
    let (ctx, sim) = Context::simulated(SimConfig::manual(1));
    let device = ctx.open_device(0).unwrap();

    let mode = device
        .set_mode(StreamKind::Video, Resolution::Medium, VideoFormat::Rgb.into())
        .unwrap();
    assert_eq!(mode.frame_size(), 640 * 480 * 3);
    assert_eq!(
        device.stream_state(StreamKind::Video).unwrap(),
        StreamState::Configured
    );

    let recorder = FrameRecorder::new();
    device.start(StreamKind::Video, recorder.handler()).unwrap();
    assert_eq!(
        device.stream_state(StreamKind::Video).unwrap(),
        StreamState::Streaming
    );

    assert_eq!(sim.inject_frames(0, StreamKind::Video, 30), 30);
    let frames = recorder.frames();
    assert_eq!(frames.len(), 30);
    assert!(frames.iter().all(|f| f.len == 921_600 && f.expected_len == 921_600));

    device.stop(StreamKind::Video).unwrap();
    assert_eq!(
        device.stream_state(StreamKind::Video).unwrap(),
        StreamState::Configured
    );

    // Late transfers still reach the driver callback but must not be delivered
    assert_eq!(sim.inject_frames(0, StreamKind::Video, 5), 5);
    assert_eq!(recorder.count(), 30);
    assert_eq!(device.frames_delivered(StreamKind::Video).unwrap(), 30);
}

#[test]
fn test_invalid_mode_leaves_mode_unchanged() {
    let (ctx, sim) = Context::simulated(SimConfig::manual(1));
    let device = ctx.open_device(0).unwrap();
    let before = device
        .set_depth_mode(Resolution::Medium, DepthFormat::D11Bit)
        .unwrap();

    let err = device
        .set_depth_mode(Resolution::High, DepthFormat::D11Bit)
        .unwrap_err();
    assert!(matches!(
        err,
        SessionError::InvalidMode {
            kind: StreamKind::Depth,
            resolution: Resolution::High,
            ..
        }
    ));

    // A video format on the depth stream is no better
    let err = device
        .set_mode(
            StreamKind::Depth,
            Resolution::Medium,
            PixelFormat::Video(VideoFormat::Rgb),
        )
        .unwrap_err();
    assert!(matches!(err, SessionError::InvalidMode { .. }));

    assert_eq!(device.depth_mode().unwrap(), Some(before));
    assert_eq!(sim.applied_mode(0, StreamKind::Depth), Some(before));
}

#[test]
fn test_failed_buffer_registration_restores_mode() {
    let (ctx, sim) = Context::simulated(SimConfig::manual(1));
    let device = ctx.open_device(0).unwrap();
    let bayer = device.set_video_format(VideoFormat::Bayer).unwrap();

    sim.fail_next("set_buffer", status::IO);
    let err = device.set_video_format(VideoFormat::Rgb).unwrap_err();
    assert_eq!(err.driver_code(), Some(status::IO));

    // Driver and session agree on the previous mode
    assert_eq!(device.video_mode().unwrap(), Some(bayer));
    assert_eq!(sim.applied_mode(0, StreamKind::Video), Some(bayer));

    let recorder = FrameRecorder::new();
    device.start_video(recorder.handler()).unwrap();
    assert_eq!(sim.inject_frames(0, StreamKind::Video, 3), 3);
    assert_eq!(recorder.count(), 3);
    assert!(recorder.frames().iter().all(|f| f.len == 640 * 480));
}

#[test]
fn test_start_requires_mode() {
    let (ctx, _sim) = Context::simulated(SimConfig::manual(1));
    let device = ctx.open_device(0).unwrap();

    assert_eq!(
        device.stream_state(StreamKind::Depth).unwrap(),
        StreamState::Idle
    );
    let err = device.start_depth(FrameRecorder::new().handler()).unwrap_err();
    assert!(matches!(err, SessionError::State(_)));
    assert_eq!(
        device.stream_state(StreamKind::Depth).unwrap(),
        StreamState::Idle
    );
}

#[test]
fn test_double_start_is_state_error() {
    let (ctx, sim) = Context::simulated(SimConfig::manual(1));
    let device = ctx.open_device(0).unwrap();
    device.set_video_format(VideoFormat::Bayer).unwrap();

    let first = FrameRecorder::new();
    let second = FrameRecorder::new();
    device.start_video(first.handler()).unwrap();

    let err = device.start_video(second.handler()).unwrap_err();
    assert!(matches!(err, SessionError::State(_)));
    assert_eq!(
        device.stream_state(StreamKind::Video).unwrap(),
        StreamState::Streaming
    );

    // The original handler keeps receiving frames
    sim.inject_frames(0, StreamKind::Video, 3);
    assert_eq!(first.count(), 3);
    assert_eq!(second.count(), 0);
}

#[test]
fn test_stop_is_idempotent() {
    let (ctx, _sim) = Context::simulated(SimConfig::manual(1));
    let device = ctx.open_device(0).unwrap();
    device.stop_video().unwrap();

    device.set_video_format(VideoFormat::Rgb).unwrap();
    device.start_video(FrameRecorder::new().handler()).unwrap();
    device.stop_video().unwrap();
    device.stop_video().unwrap();
    assert_eq!(
        device.stream_state(StreamKind::Video).unwrap(),
        StreamState::Configured
    );
}

#[test]
fn test_restart_delivers_to_new_handler_only() {
    let (ctx, sim) = Context::simulated(SimConfig::manual(1));
    let device = ctx.open_device(0).unwrap();
    device.set_depth_format(DepthFormat::D11Bit).unwrap();

    let first = FrameRecorder::new();
    device.start_depth(first.handler()).unwrap();
    sim.inject_frames(0, StreamKind::Depth, 2);
    device.stop_depth().unwrap();

    let second = FrameRecorder::new();
    device.start_depth(second.handler()).unwrap();
    sim.inject_frames(0, StreamKind::Depth, 4);

    assert_eq!(first.count(), 2);
    assert_eq!(second.count(), 4);
    let first_epoch = first.frames()[0].epoch;
    assert!(second.frames().iter().all(|f| f.epoch > first_epoch));
}

#[test]
fn test_video_and_depth_are_independent() {
    let (ctx, sim) = Context::simulated(SimConfig::manual(1));
    let device = ctx.open_device(0).unwrap();
    device.set_video_format(VideoFormat::Rgb).unwrap();
    device.set_depth_format(DepthFormat::Mm).unwrap();

    let video = FrameRecorder::new();
    let depth = FrameRecorder::new();
    device.start_video(video.handler()).unwrap();
    device.start_depth(depth.handler()).unwrap();

    sim.inject_frames(0, StreamKind::Depth, 2);
    device.stop_video().unwrap();
    sim.inject_frames(0, StreamKind::Depth, 1);

    assert_eq!(video.count(), 0);
    assert_eq!(depth.count(), 3);
    assert!(depth.frames().iter().all(|f| f.len == 640 * 480 * 2));
    assert_eq!(
        device.stream_state(StreamKind::Depth).unwrap(),
        StreamState::Streaming
    );
}

#[test]
fn test_close_is_idempotent_and_disposes() {
    let (ctx, sim) = Context::simulated(SimConfig::manual(1));
    let device = ctx.open_device(0).unwrap();
    device.set_video_format(VideoFormat::Rgb).unwrap();
    let recorder = FrameRecorder::new();
    device.start_video(recorder.handler()).unwrap();

    device.close().unwrap();
    device.close().unwrap();
    assert!(device.is_closed());
    assert!(!sim.is_streaming(0, StreamKind::Video));
    assert_eq!(sim.open_devices(), 0);
    assert_eq!(ctx.open_sessions(), 0);

    assert!(matches!(
        device.set_video_format(VideoFormat::Rgb),
        Err(SessionError::DisposedSession)
    ));
    assert!(matches!(
        device.start_video(FrameRecorder::new().handler()),
        Err(SessionError::DisposedSession)
    ));
    assert!(matches!(device.stop_video(), Err(SessionError::DisposedSession)));
    assert!(matches!(
        device.set_led(LedStatus::Red),
        Err(SessionError::DisposedSession)
    ));
    assert!(matches!(
        device.refresh_tilt_state(),
        Err(SessionError::DisposedSession)
    ));
    assert!(matches!(device.video_mode(), Err(SessionError::DisposedSession)));

    // The device can be opened again once closed
    let reopened = ctx.open_device(0).unwrap();
    assert_eq!(reopened.index(), 0);
}

#[test]
fn test_driver_errors_surface_without_retry() {
    let (ctx, sim) = Context::simulated(SimConfig::manual(1));
    let device = ctx.open_device(0).unwrap();

    sim.fail_next("set_led", status::IO);
    let err = device.set_led(LedStatus::Green).unwrap_err();
    assert_eq!(err.driver_code(), Some(status::IO));
    assert_eq!(device.led().unwrap(), None);

    device.set_led(LedStatus::Green).unwrap();
    assert_eq!(device.led().unwrap(), Some(LedStatus::Green));
    assert_eq!(sim.led(0), Some(LedStatus::Green));

    device.set_video_format(VideoFormat::Rgb).unwrap();
    sim.fail_next("start_stream", status::NO_DEVICE);
    let err = device.start_video(FrameRecorder::new().handler()).unwrap_err();
    assert!(matches!(
        err,
        SessionError::Driver {
            op: "start_stream",
            code: status::NO_DEVICE
        }
    ));
    assert_eq!(
        device.stream_state(StreamKind::Video).unwrap(),
        StreamState::Configured
    );
}

#[test]
fn test_tilt_settles_near_target() {
    let (ctx, _sim) = Context::simulated(SimConfig::default());
    let device = ctx.open_device(0).unwrap();

    device.set_tilt_angle(20.0).unwrap();
    assert!(wait_until(DEFAULT_TEST_TIMEOUT, || {
        device
            .refresh_tilt_state()
            .is_ok_and(|state| state.status == TiltStatus::Stopped)
    }));

    let angle = device.tilt_angle().unwrap();
    assert!((angle - 20.0).abs() <= 2.0, "settled at {}", angle);

    // Gravity vector stays roughly 1 g in magnitude
    let [x, y, z] = device.accel().unwrap();
    let g = (x * x + y * y + z * z).sqrt();
    assert!((g - catalog::GRAVITY).abs() < 0.2, "|accel| = {}", g);
}

#[test]
fn test_tilt_clamps_to_limit() {
    let (ctx, _sim) = Context::simulated(SimConfig::manual(1));
    let device = ctx.open_device(0).unwrap();

    device.set_tilt_angle(45.0).unwrap();
    assert!(wait_until(Duration::from_secs(2), || {
        device
            .refresh_tilt_state()
            .is_ok_and(|state| state.status != TiltStatus::Moving)
    }));
    assert_eq!(device.tilt_status().unwrap(), TiltStatus::Limit);
    assert_eq!(device.tilt_angle().unwrap(), 31.0);
    assert_eq!(device.raw_tilt_state().unwrap().tilt_angle, 62);
}
