use std::time::Duration;

use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};

/// Default end-of-frame marker.
pub const DEFAULT_TERMINATOR: u8 = 0x00;

/// Default size of a single physical read, in bytes.
pub const DEFAULT_BUFFER_SIZE: usize = 1024;

/// Default cap on unterminated bytes held in [`FrameMode::Accumulate`]: 64 KiB.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 64 * 1024;

/// A logical message extracted from a byte stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Frame bytes, including the terminator when one was found.
    pub payload: Bytes,
}

impl Frame {
    /// Create a new frame.
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            payload: payload.into(),
        }
    }

    /// Number of bytes in the frame.
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// True if the frame holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// True if the frame ends with `terminator`.
    pub fn is_terminated(&self, terminator: u8) -> bool {
        self.payload.last() == Some(&terminator)
    }
}

/// How a reader turns physical reads into frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FrameMode {
    /// One frame per read, cut after the first terminator. Bytes after the
    /// terminator in the same read are discarded and a terminator split
    /// across two reads is never seen.
    #[default]
    SingleRead,
    /// Partial frames are kept across reads until their terminator arrives.
    Accumulate,
}

/// Extract the frame contained in the first `count` bytes of `buf`.
///
/// Returns the bytes up to and including the first `terminator`, or all
/// `count` bytes when no terminator is present.
///
/// ```text
/// buf:    01 02 00 03 04     terminator 00, count 5
/// frame:  01 02 00
/// ```
pub fn extract_frame(buf: &[u8], count: usize, terminator: u8) -> Bytes {
    let valid = &buf[..count.min(buf.len())];
    let end = valid
        .iter()
        .position(|&byte| byte == terminator)
        .map_or(valid.len(), |pos| pos + 1);
    Bytes::copy_from_slice(&valid[..end])
}

/// Decode the next terminated frame from an accumulation buffer.
///
/// Returns `None` if the buffer doesn't contain a terminator yet.
/// On success, consumes the frame bytes from the buffer.
pub fn decode_frame(src: &mut BytesMut, terminator: u8) -> Option<Frame> {
    let pos = src.iter().position(|&byte| byte == terminator)?;
    Some(Frame {
        payload: src.split_to(pos + 1).freeze(),
    })
}

/// Configuration for frame readers and writers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameConfig {
    /// End-of-frame marker. Default: `0x00`.
    pub terminator: u8,
    /// Size of a single physical read. Default: 1024 bytes.
    pub buffer_size: usize,
    /// Read strategy. Default: [`FrameMode::SingleRead`].
    pub mode: FrameMode,
    /// Cap on unterminated bytes held in accumulate mode. Default: 64 KiB.
    pub max_frame_size: usize,
    /// Read timeout for blocking operations.
    pub read_timeout: Option<Duration>,
    /// Write timeout for blocking operations.
    pub write_timeout: Option<Duration>,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            terminator: DEFAULT_TERMINATOR,
            buffer_size: DEFAULT_BUFFER_SIZE,
            mode: FrameMode::SingleRead,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            read_timeout: None,
            write_timeout: None,
        }
    }
}
