//! Terminator-byte message framing for equipment byte streams.
//!
//! Equipment protocols on serial lines and raw TCP sockets commonly mark the
//! end of a message with a single byte (NUL, LF, ETX). This crate extracts
//! those messages from the raw stream:
//! - [`FrameMode::SingleRead`]: every physical read yields one frame, cut at
//!   the first terminator; nothing carries over between reads.
//! - [`FrameMode::Accumulate`]: a persistent buffer carries partial frames
//!   across reads and every terminated frame is yielded in order.

pub mod codec;
pub mod error;
pub mod reader;
pub mod writer;

pub use codec::{
    decode_frame, extract_frame, Frame, FrameConfig, FrameMode, DEFAULT_BUFFER_SIZE,
    DEFAULT_MAX_FRAME_SIZE, DEFAULT_TERMINATOR,
};
pub use error::{FrameError, Result};
pub use reader::FrameReader;
pub use writer::FrameWriter;
