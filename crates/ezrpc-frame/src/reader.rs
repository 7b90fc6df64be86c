use std::io::ErrorKind;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::codec::Decoder;

use crate::codec::{Frame, FrameCodec, FrameConfig};
use crate::error::{FrameError, Result};

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;
const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Reads complete frames from any `AsyncRead` stream.
///
/// Handles partial reads internally; callers always get complete frames.
/// Unlike `FramedRead`, a [`FrameError::FrameTooLarge`] does not end the
/// stream: the next call to [`read_frame`](Self::read_frame) resumes after
/// the oversized frame.
pub struct FrameReader<T> {
    inner: T,
    buf: BytesMut,
    codec: FrameCodec,
    config: FrameConfig,
    eof: bool,
}

impl<T: AsyncRead + Unpin> FrameReader<T> {
    /// Create a new frame reader with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a new frame reader with explicit configuration.
    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            codec: FrameCodec::with_config(&config),
            config,
            eof: false,
        }
    }

    /// Read the next complete frame.
    ///
    /// Returns `Err(FrameError::ConnectionClosed)` when the stream ends on a
    /// frame boundary and `Err(FrameError::IncompleteFrame)` when it ends
    /// mid-frame.
    pub async fn read_frame(&mut self) -> Result<Frame> {
        loop {
            if self.eof {
                return match self.codec.decode_eof(&mut self.buf)? {
                    Some(frame) => Ok(frame),
                    None => Err(FrameError::ConnectionClosed),
                };
            }

            if let Some(frame) = self.codec.decode(&mut self.buf)? {
                return Ok(frame);
            }

            self.buf.reserve(READ_CHUNK_SIZE);
            match self.inner.read_buf(&mut self.buf).await {
                Ok(0) => self.eof = true,
                Ok(_) => {}
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            }
        }
    }

    /// Decode the next frame from already-buffered bytes without touching
    /// the underlying stream.
    pub fn next_buffered(&mut self) -> Result<Option<Frame>> {
        if self.eof {
            return self.codec.decode_eof(&mut self.buf);
        }
        self.codec.decode(&mut self.buf)
    }

    /// Number of bytes read from the stream but not yet returned as frames.
    pub fn buffered_len(&self) -> usize {
        self.buf.len()
    }

    /// Whether the underlying stream has reported end of input.
    pub fn is_eof(&self) -> bool {
        self.eof
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

    /// Update maximum frame size for subsequent decoding.
    pub fn set_max_frame_size(&mut self, max_frame_size: usize) {
        self.config.max_frame_size = max_frame_size;
        self.codec.set_max_frame_size(max_frame_size);
    }

    /// Current frame reader configuration.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}
