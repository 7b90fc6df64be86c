use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::warn;

use crate::error::{FrameError, Result};

/// Default frame delimiter: five consecutive newline bytes.
pub const DEFAULT_DELIMITER: &[u8] = b"\n\n\n\n\n";

/// Default maximum frame size: 16 MiB.
pub const DEFAULT_MAX_FRAME: usize = 16 * 1024 * 1024;

/// One framed message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// The message payload, without its delimiter.
    pub payload: Bytes,
}

impl Frame {
    /// Create a new frame.
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            payload: payload.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

/// Configuration shared by the frame reader, writer and codec.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Maximum payload size in bytes. Default: 16 MiB.
    pub max_frame_size: usize,
    /// Byte sequence terminating every frame. Default: [`DEFAULT_DELIMITER`].
    pub delimiter: Bytes,
}

impl FrameConfig {
    pub fn with_max_frame_size(mut self, max_frame_size: usize) -> Self {
        self.max_frame_size = max_frame_size;
        self
    }

    pub fn with_delimiter(mut self, delimiter: impl Into<Bytes>) -> Self {
        self.delimiter = delimiter.into();
        self
    }
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME,
            delimiter: Bytes::from_static(DEFAULT_DELIMITER),
        }
    }
}

/// Append `payload` and `delimiter` to `dst`.
///
/// Wire format:
/// ```text
/// ┌──────────────────────┬────────────────────────┐
/// │ Payload (any length) │ Delimiter              │
/// │                      │ "\n\n\n\n\n" (default) │
/// └──────────────────────┴────────────────────────┘
/// ```
///
/// Fails with [`FrameError::DelimiterInPayload`] when the payload would not
/// survive a round trip: it contains the delimiter, or ends with a proper
/// prefix of it.
pub fn encode_frame(payload: &[u8], delimiter: &[u8], dst: &mut BytesMut) -> Result<()> {
    if find(payload, delimiter).is_some()
        || (1..delimiter.len()).any(|n| payload.ends_with(&delimiter[..n]))
    {
        return Err(FrameError::DelimiterInPayload);
    }
    dst.reserve(payload.len() + delimiter.len());
    dst.put_slice(payload);
    dst.put_slice(delimiter);
    Ok(())
}

/// Delimiter codec usable with `tokio_util::codec::{FramedRead, FramedWrite}`.
///
/// Unlike a plain split, the decoder recovers from oversized frames: once a
/// frame exceeds `max_frame_size` it reports [`FrameError::FrameTooLarge`]
/// and skips input up to the next delimiter, after which decoding resumes.
#[derive(Debug, Clone)]
pub struct FrameCodec {
    delimiter: Bytes,
    max_frame_size: usize,
    next_index: usize,
    discarding: bool,
}

impl FrameCodec {
    pub fn new() -> Self {
        Self::with_config(&FrameConfig::default())
    }

    pub fn with_config(config: &FrameConfig) -> Self {
        let delimiter = if config.delimiter.is_empty() {
            warn!("empty frame delimiter configured; using default");
            Bytes::from_static(DEFAULT_DELIMITER)
        } else {
            config.delimiter.clone()
        };
        Self {
            delimiter,
            max_frame_size: config.max_frame_size,
            next_index: 0,
            discarding: false,
        }
    }

    pub fn delimiter(&self) -> &[u8] {
        &self.delimiter
    }

    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    /// Update maximum frame size for subsequent decoding and encoding.
    pub fn set_max_frame_size(&mut self, max_frame_size: usize) {
        self.max_frame_size = max_frame_size;
    }

    /// Whether the decoder is skipping the remainder of an oversized frame.
    pub fn is_discarding(&self) -> bool {
        self.discarding
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>> {
        let dlen = self.delimiter.len();
        loop {
            let start = self.next_index.min(src.len());
            let found = find(&src[start..], &self.delimiter).map(|pos| start + pos);

            match found {
                Some(end) if self.discarding => {
                    src.advance(end + dlen);
                    self.discarding = false;
                    self.next_index = 0;
                }
                Some(end) if end > self.max_frame_size => {
                    src.advance(end + dlen);
                    self.next_index = 0;
                    warn!(size = end, max = self.max_frame_size, "dropping oversized frame");
                    return Err(FrameError::FrameTooLarge {
                        size: end,
                        max: self.max_frame_size,
                    });
                }
                Some(end) => {
                    let payload = src.split_to(end).freeze();
                    src.advance(dlen);
                    self.next_index = 0;
                    return Ok(Some(Frame { payload }));
                }
                None if self.discarding => {
                    // Keep a tail that may hold the start of the delimiter.
                    let drop = src.len().saturating_sub(dlen - 1);
                    src.advance(drop);
                    self.next_index = 0;
                    return Ok(None);
                }
                None if src.len() >= self.max_frame_size.saturating_add(dlen) => {
                    let size = src.len();
                    src.advance(size - (dlen - 1));
                    self.discarding = true;
                    self.next_index = 0;
                    warn!(
                        size,
                        max = self.max_frame_size,
                        "frame exceeds maximum size; discarding to next delimiter"
                    );
                    return Err(FrameError::FrameTooLarge {
                        size,
                        max: self.max_frame_size,
                    });
                }
                None => {
                    self.next_index = src.len().saturating_sub(dlen - 1);
                    return Ok(None);
                }
            }
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Frame>> {
        if let Some(frame) = self.decode(buf)? {
            return Ok(Some(frame));
        }
        if buf.is_empty() {
            return Ok(None);
        }

        let buffered = buf.len();
        buf.clear();
        self.next_index = 0;
        if std::mem::take(&mut self.discarding) {
            return Ok(None);
        }
        Err(FrameError::IncompleteFrame { buffered })
    }
}

impl<'a> Encoder<&'a [u8]> for FrameCodec {
    type Error = FrameError;

    fn encode(&mut self, payload: &'a [u8], dst: &mut BytesMut) -> Result<()> {
        if payload.len() > self.max_frame_size {
            return Err(FrameError::FrameTooLarge {
                size: payload.len(),
                max: self.max_frame_size,
            });
        }
        encode_frame(payload, &self.delimiter, dst)
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
