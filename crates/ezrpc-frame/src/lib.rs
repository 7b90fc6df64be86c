//! Delimiter-based message framing for ezrpc.
//!
//! Every message on the wire is a payload followed by a fixed delimiter
//! (five `\n` bytes by default). Compact JSON never contains a raw newline,
//! so JSON-RPC envelopes frame cleanly without escaping.
//!
//! No partial reads, no buffer management in user code: [`FrameReader`]
//! yields complete frames and [`FrameWriter`] writes each frame in one piece.

pub mod codec;
pub mod error;
pub mod reader;
pub mod writer;

pub use codec::{encode_frame, Frame, FrameCodec, FrameConfig, DEFAULT_DELIMITER, DEFAULT_MAX_FRAME};
pub use error::{FrameError, Result};
pub use reader::FrameReader;
pub use writer::FrameWriter;
