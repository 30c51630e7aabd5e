use std::io::{ErrorKind, Read};

use bytes::BytesMut;
use commlink_transport::LinkStream;
use tracing::trace;

use crate::codec::{decode_frame, extract_frame, Frame, FrameConfig, FrameMode};
use crate::error::{FrameError, Result};

/// Reads frames from any `Read` stream.
///
/// In [`FrameMode::SingleRead`] every successful read produces exactly one
/// frame. In [`FrameMode::Accumulate`] partial reads are buffered and callers
/// always get complete, terminated frames.
pub struct FrameReader<T> {
    inner: T,
    chunk: Vec<u8>,
    pending: BytesMut,
    config: FrameConfig,
}

impl<T: Read> FrameReader<T> {
    /// Create a new frame reader with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a new frame reader with explicit configuration.
    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            chunk: vec![0u8; config.buffer_size.max(1)],
            pending: BytesMut::new(),
            config,
        }
    }

    /// Read the next frame (blocking).
    ///
    /// Returns `Err(FrameError::ConnectionClosed)` when EOF is reached. Read
    /// timeouts surface as `FrameError::Io` (see [`FrameError::is_timeout`]);
    /// bytes buffered in accumulate mode survive them.
    pub fn read_frame(&mut self) -> Result<Frame> {
        match self.config.mode {
            FrameMode::SingleRead => {
                let read = self.fill_chunk()?;
                let frame = Frame::new(extract_frame(&self.chunk, read, self.config.terminator));
                if frame.len() < read {
                    trace!(
                        kept = frame.len(),
                        dropped = read - frame.len(),
                        "bytes after terminator discarded"
                    );
                }
                Ok(frame)
            }
            FrameMode::Accumulate => loop {
                if let Some(frame) = decode_frame(&mut self.pending, self.config.terminator) {
                    return Ok(frame);
                }
                if self.pending.len() > self.config.max_frame_size {
                    let size = self.pending.len();
                    self.pending.clear();
                    return Err(FrameError::FrameTooLarge {
                        size,
                        max: self.config.max_frame_size,
                    });
                }

                let read = self.fill_chunk()?;
                self.pending.extend_from_slice(&self.chunk[..read]);
            },
        }
    }

    fn fill_chunk(&mut self) -> Result<usize> {
        loop {
            match self.inner.read(&mut self.chunk) {
                Ok(0) => return Err(FrameError::ConnectionClosed),
                Ok(n) => return Ok(n),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            }
        }
    }

    /// Number of unterminated bytes held back in accumulate mode.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Mutably borrow the underlying stream.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Consume the reader and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Current frame reader configuration.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}

impl FrameReader<LinkStream> {
    /// Create a frame reader for `LinkStream` and apply read timeout from config.
    pub fn with_config_link(mut inner: LinkStream, config: FrameConfig) -> Result<Self> {
        inner
            .set_read_timeout(config.read_timeout)
            .map_err(transport_to_frame_error)?;
        Ok(Self::with_config(inner, config))
    }
}

pub(crate) fn transport_to_frame_error(err: commlink_transport::TransportError) -> FrameError {
    match err {
        commlink_transport::TransportError::Io(io)
        | commlink_transport::TransportError::Accept(io) => FrameError::Io(io),
        commlink_transport::TransportError::Bind { source, .. }
        | commlink_transport::TransportError::Connect { source, .. } => FrameError::Io(source),
        other => FrameError::Io(std::io::Error::other(other.to_string())),
    }
}
