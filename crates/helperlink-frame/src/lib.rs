//! Wire codec for the helper interface protocol.
//!
//! Every frame opens with the 4-byte signature `0xDECAFBAD`, followed by a
//! sentinel/version pair that selects the generation:
//! - generation 2: named commands and a packed, length-prefixed record
//! - generation 3: numeric commands and a 4-byte-aligned typed field set
//!
//! Everything here is pure: no I/O beyond the blocking [`FrameReader`] /
//! [`FrameWriter`] conveniences for helper processes.

pub mod blocks;
pub mod codec;
pub mod command;
pub mod error;
pub mod fields;
pub mod fixed;
pub mod messages;
pub mod reader;
pub mod writer;

pub use blocks::GpsBlock;
pub use codec::{
    decode_body, decode_frame, decode_header, encode_frame, probe_header, Frame, FrameConfig,
    Generation, HeaderInfo, MAX_FRAME_SIZE, SIGNATURE, STUB_SIZE, V2_HEADER_SIZE, V3_HEADER_SIZE,
};
pub use command::{Command, FrameKind};
pub use error::{FrameError, Result};
pub use fields::{FieldSet, Value};
pub use messages::Severity;
pub use reader::FrameReader;
pub use writer::FrameWriter;
