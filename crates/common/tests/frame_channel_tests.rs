//! Frame Channel Integration Tests
//!
//! Tests for the bounded bridge between the event pump thread and async
//! frame consumers.
//!
//! # Test Scenarios
//! - Frames cross from a blocking producer thread to an async consumer
//! - A lagging consumer causes drops, never a blocked producer
//! - A closed receiver is tolerated by the producer
//!
//! Run with: `cargo test -p common --test frame_channel_tests`

use catalog::{DepthFormat, FrameMode, Resolution, VideoFormat, find_depth_mode, find_video_mode};
use common::test_utils::{DEFAULT_TEST_TIMEOUT, with_timeout};
use common::{Frame, FrameHandler, frame_channel};
use std::thread;
use std::time::{Duration, Instant};

fn deliver(handler: &mut impl FrameHandler, mode: &FrameMode, data: &[u8], timestamp: u32) {
    let frame = Frame {
        device_index: 0,
        mode,
        data,
        timestamp,
        epoch: 1,
    };
    handler.on_frame(&frame);
}

// ============================================================================
// Delivery Tests
// ============================================================================

#[tokio::test]
async fn test_frames_arrive_in_order() {
    let (mut handler, receiver) = frame_channel(16);
    let mode = find_depth_mode(Resolution::Medium, DepthFormat::D11Bit);

    let producer = thread::spawn(move || {
        let data = vec![0u8; mode.frame_size()];
        for ts in 0..10 {
            deliver(&mut handler, &mode, &data, ts);
        }
    });

    for expected in 0..10 {
        let frame = with_timeout(DEFAULT_TEST_TIMEOUT, receiver.recv())
            .await
            .expect("Timed out waiting for frame")
            .expect("Channel closed");
        assert_eq!(frame.timestamp, expected);
        assert_eq!(frame.data.len(), 614_400);
    }

    producer.join().unwrap();
    assert_eq!(receiver.dropped_frames(), 0);
}

#[test]
fn test_blocking_receive() {
    let (mut handler, receiver) = frame_channel(2);
    let mode = find_video_mode(Resolution::Medium, VideoFormat::Rgb);
    let data = vec![9u8; mode.frame_size()];

    deliver(&mut handler, &mode, &data, 1);
    let frame = receiver.recv_blocking().unwrap();
    assert_eq!(frame.data[0], 9);
    assert!(receiver.try_recv().is_none());
}

// ============================================================================
// Backpressure Tests
// ============================================================================

#[test]
fn test_lagging_consumer_drops_frames() {
    let (mut handler, receiver) = frame_channel(3);
    let mode = find_video_mode(Resolution::Medium, VideoFormat::Bayer);
    let data = vec![0u8; mode.frame_size()];

    let start = Instant::now();
    for ts in 0..10 {
        deliver(&mut handler, &mode, &data, ts);
    }
    // Producer never blocks on a full channel
    assert!(start.elapsed() < Duration::from_secs(1));

    assert_eq!(receiver.len(), 3);
    assert_eq!(receiver.dropped_frames(), 7);

    // Oldest frames are kept
    assert_eq!(receiver.try_recv().unwrap().timestamp, 0);
}

#[test]
fn test_zero_capacity_is_usable() {
    let (mut handler, receiver) = frame_channel(0);
    let mode = find_video_mode(Resolution::Medium, VideoFormat::Bayer);
    let data = vec![0u8; mode.frame_size()];

    deliver(&mut handler, &mode, &data, 1);
    assert_eq!(receiver.len(), 1);
}

#[test]
fn test_closed_receiver_is_tolerated() {
    let (mut handler, receiver) = frame_channel(1);
    drop(receiver);

    let mode = find_video_mode(Resolution::Medium, VideoFormat::Bayer);
    let data = vec![0u8; mode.frame_size()];
    deliver(&mut handler, &mode, &data, 1);
    deliver(&mut handler, &mode, &data, 2);
}

#[tokio::test]
async fn test_recv_after_handler_dropped_is_channel_error() {
    let (mut handler, receiver) = frame_channel(2);
    let mode = find_video_mode(Resolution::Medium, VideoFormat::Bayer);
    let data = vec![0u8; mode.frame_size()];
    deliver(&mut handler, &mode, &data, 1);
    drop(handler);

    // Buffered frames drain before the closed channel is reported
    assert!(receiver.recv().await.is_ok());
    let err = receiver.recv().await.unwrap_err();
    assert!(matches!(err, common::Error::Channel(_)));
    assert!(receiver.recv_blocking().is_err());
}
