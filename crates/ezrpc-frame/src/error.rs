/// Errors that can occur during frame encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// A frame grew past the configured maximum before its delimiter arrived.
    ///
    /// On the read path the offending bytes are discarded up to the next
    /// delimiter, and reading may continue.
    #[error("frame too large ({size} bytes, max {max})")]
    FrameTooLarge { size: usize, max: usize },

    /// An outgoing payload contains the delimiter, or ends with part of it.
    #[error("payload contains the frame delimiter")]
    DelimiterInPayload,

    /// The stream ended with a partial frame in the buffer.
    #[error("connection closed mid-frame ({buffered} bytes buffered)")]
    IncompleteFrame { buffered: usize },

    /// The stream ended cleanly on a frame boundary.
    #[error("connection closed")]
    ConnectionClosed,

    /// An I/O error occurred while reading or writing frames.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, FrameError>;
