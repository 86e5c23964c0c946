//! Common utilities for the sensor session workspace
//!
//! This crate provides the pieces shared between the session library and the
//! command line tool: the frame view handed to consumers, the frame handler
//! and log sink traits, tracing setup, the async frame channel adapter, and
//! test helpers.

pub mod channel;
pub mod error;
pub mod frame;
pub mod logging;
pub mod test_utils;

pub use channel::{ChannelHandler, FrameReceiver, frame_channel};
pub use error::{Error, Result};
pub use frame::{Frame, FrameHandler, OwnedFrame};
pub use logging::{LogHandler, TracingLogHandler, setup_logging};
