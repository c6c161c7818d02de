use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::command::{Command, FrameKind, V2_COMMAND_LEN};
use crate::error::{FrameError, Result};
use crate::fields::{decode_fields, encode_fields, FieldSet, Layout};

/// Signature opening every frame of every generation.
pub const SIGNATURE: u32 = 0xDECA_FBAD;

/// Sentinel identifying a generation-2 header.
pub const V2_SENTINEL: u16 = 0xABCD;

/// Sentinel identifying a generation-3 header.
pub const V3_SENTINEL: u16 = 0xA9A9;

/// Signature (4) + sentinel (2) + version (2): enough to pick a generation.
pub const STUB_SIZE: usize = 8;

/// Generation-2 header: stub (8) + data_sz (4) + command (32) + seqno (4).
pub const V2_HEADER_SIZE: usize = 48;

/// Generation-3 header: stub (8) + pkt_type (2) + pad (2) + seqno (4) +
/// code (2) + length (2) + fieldset (4).
pub const V3_HEADER_SIZE: usize = 24;

/// Hard ceiling on a frame's total encoded length: 1 MiB.
///
/// [`FrameConfig::max_frame_size`] may lower this, never raise it.
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Wire format generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Generation {
    /// Named commands, packed record payload.
    V2,
    /// Numeric commands, aligned field-set payload.
    V3,
}

impl Generation {
    /// Newest generation this build speaks.
    pub const LATEST: Generation = Generation::V3;

    /// The version number written after the sentinel.
    pub fn version(self) -> u16 {
        match self {
            Generation::V2 => 2,
            Generation::V3 => 3,
        }
    }

    /// Fixed header size for this generation.
    pub fn header_size(self) -> usize {
        match self {
            Generation::V2 => V2_HEADER_SIZE,
            Generation::V3 => V3_HEADER_SIZE,
        }
    }

    /// Whether this build was compiled with support for the generation.
    pub fn is_supported(self) -> bool {
        match self {
            Generation::V2 => cfg!(feature = "v2"),
            Generation::V3 => true,
        }
    }

    /// The previous generation supported by this build, if any.
    pub fn older(self) -> Option<Generation> {
        match self {
            Generation::V3 if Generation::V2.is_supported() => Some(Generation::V2),
            _ => None,
        }
    }

    /// The wire kind of `command` in this generation.
    pub fn kind_of(self, command: Command) -> FrameKind {
        match self {
            Generation::V2 => FrameKind::Named(command.name().to_string()),
            Generation::V3 => FrameKind::Code(command.code()),
        }
    }

    fn layout(self) -> Layout {
        match self {
            Generation::V2 => Layout::Packed,
            Generation::V3 => Layout::Aligned,
        }
    }
}

impl std::fmt::Display for Generation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "v{}", self.version())
    }
}

/// A decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Wire generation the frame was (or will be) encoded in.
    pub generation: Generation,
    /// Sender-chosen correlation number.
    pub sequence: u32,
    /// Command identifier.
    pub kind: FrameKind,
    /// Generation-3 status code; always 0 for generation 2.
    pub code: u16,
    /// Typed payload.
    pub fields: FieldSet,
}

impl Frame {
    /// Build a frame for a known command.
    pub fn new(generation: Generation, command: Command, sequence: u32, fields: FieldSet) -> Self {
        Self {
            generation,
            sequence,
            kind: generation.kind_of(command),
            code: 0,
            fields,
        }
    }

    /// Attach a generation-3 status code.
    pub fn with_code(mut self, code: u16) -> Self {
        self.code = code;
        self
    }

    /// The known command this frame carries, if any.
    pub fn command(&self) -> Option<Command> {
        Command::from_kind(&self.kind)
    }

    /// Encode into a freshly allocated buffer.
    pub fn encode(&self) -> Result<Bytes> {
        let mut buf = BytesMut::new();
        encode_frame(self, &mut buf)?;
        Ok(buf.freeze())
    }
}

/// Everything the fixed header says about a frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderInfo {
    pub generation: Generation,
    /// Bytes of header actually consumed.
    pub header_len: usize,
    /// Declared total frame length, header included.
    pub frame_len: usize,
    pub sequence: u32,
    pub kind: FrameKind,
    pub code: u16,
    /// Generation-3 presence bitmask; 0 for generation 2.
    pub fieldset: u32,
}

impl HeaderInfo {
    /// Bytes still to read after the header.
    pub fn body_len(&self) -> usize {
        self.frame_len - self.header_len
    }
}

fn be_u16(buf: &[u8], at: usize) -> u16 {
    u16::from_be_bytes([buf[at], buf[at + 1]])
}

fn be_u32(buf: &[u8], at: usize) -> u32 {
    u32::from_be_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}

/// Identify the generation from the first [`STUB_SIZE`] bytes.
///
/// Returns the generation and its full header length.
pub fn probe_header(buf: &[u8]) -> Result<(Generation, usize)> {
    if buf.len() < 4 || be_u32(buf, 0) != SIGNATURE {
        return Err(FrameError::BadSignature);
    }
    if buf.len() < STUB_SIZE {
        return Err(FrameError::Truncated {
            needed: STUB_SIZE,
            available: buf.len(),
        });
    }

    let sentinel = be_u16(buf, 4);
    let version = be_u16(buf, 6);
    let generation = match (sentinel, version) {
        (V2_SENTINEL, 2) => Generation::V2,
        (V3_SENTINEL, 3) => Generation::V3,
        _ => return Err(FrameError::UnsupportedProtocol { sentinel, version }),
    };
    if !generation.is_supported() {
        return Err(FrameError::GenerationDisabled(version));
    }
    Ok((generation, generation.header_size()))
}

/// Decode a frame header.
///
/// Reads only the fixed header prefix of `buf`. A declared length above
/// `max_frame_size` is rejected here, before any body byte is needed.
pub fn decode_header(buf: &[u8], max_frame_size: usize) -> Result<HeaderInfo> {
    let (generation, header_len) = probe_header(buf)?;
    if buf.len() < header_len {
        return Err(FrameError::Truncated {
            needed: header_len,
            available: buf.len(),
        });
    }
    let max = max_frame_size.min(MAX_FRAME_SIZE);

    let info = match generation {
        Generation::V2 => {
            let data_sz = be_u32(buf, 8) as usize;
            let raw_cmd = &buf[12..12 + V2_COMMAND_LEN];
            let end = raw_cmd.iter().position(|b| *b == 0).unwrap_or(V2_COMMAND_LEN);
            let name = std::str::from_utf8(&raw_cmd[..end])
                .map_err(|_| FrameError::Malformed("command name is not UTF-8".to_string()))?;
            HeaderInfo {
                generation,
                header_len,
                frame_len: header_len.saturating_add(data_sz),
                sequence: be_u32(buf, 44),
                kind: FrameKind::Named(name.to_string()),
                code: 0,
                fieldset: 0,
            }
        }
        Generation::V3 => {
            if be_u16(buf, 10) != 0 {
                return Err(FrameError::Malformed("header pad is not zero".to_string()));
            }
            let length = be_u16(buf, 18) as usize;
            if length < header_len {
                return Err(FrameError::Malformed(format!(
                    "declared length {length} shorter than header"
                )));
            }
            HeaderInfo {
                generation,
                header_len,
                frame_len: length,
                sequence: be_u32(buf, 12),
                kind: FrameKind::Code(be_u16(buf, 8)),
                code: be_u16(buf, 16),
                fieldset: be_u32(buf, 20),
            }
        }
    };

    if info.frame_len > max {
        return Err(FrameError::FrameTooLarge {
            size: info.frame_len,
            max,
        });
    }
    Ok(info)
}

/// Decode the body that follows `header`.
///
/// `body` must be exactly [`HeaderInfo::body_len`] bytes.
pub fn decode_body(header: &HeaderInfo, body: &[u8]) -> Result<Frame> {
    if body.len() != header.body_len() {
        return Err(FrameError::Malformed(format!(
            "body is {} bytes, header declares {}",
            body.len(),
            header.body_len()
        )));
    }
    let fields = decode_fields(body, header.generation.layout(), header.fieldset)?;
    Ok(Frame {
        generation: header.generation,
        sequence: header.sequence,
        kind: header.kind.clone(),
        code: header.code,
        fields,
    })
}

/// Encode a frame into the wire format.
///
/// Generation 2:
/// ```text
/// ┌────────────┬──────────┬─────────┬──────────┬──────────────┬─────────┬──────────┐
/// │ Signature  │ Sentinel │ Version │ data_sz  │ Command      │ Seqno   │ Record   │
/// │ 0xDECAFBAD │ 0xABCD   │ 2       │ (4B)     │ (32B, NUL    │ (4B)    │ (data_sz │
/// │ (4B)       │ (2B)     │ (2B)    │          │  padded)     │         │  bytes)  │
/// └────────────┴──────────┴─────────┴──────────┴──────────────┴─────────┴──────────┘
/// ```
///
/// Generation 3:
/// ```text
/// ┌────────────┬──────────┬─────────┬──────────┬───────┬───────┬──────┬────────┬──────────┬────────┐
/// │ Signature  │ Sentinel │ Version │ pkt_type │ Pad   │ Seqno │ Code │ Length │ Fieldset │ Fields │
/// │ 0xDECAFBAD │ 0xA9A9   │ 3       │ (2B)     │ 0     │ (4B)  │ (2B) │ (2B,   │ (4B)     │ (4B    │
/// │ (4B)       │ (2B)     │ (2B)    │          │ (2B)  │       │      │ total) │          │ aligned│
/// └────────────┴──────────┴─────────┴──────────┴───────┴───────┴──────┴────────┴──────────┴────────┘
/// ```
///
/// All multi-byte fields are big-endian.
pub fn encode_frame(frame: &Frame, dst: &mut BytesMut) -> Result<()> {
    if !frame.generation.is_supported() {
        return Err(FrameError::GenerationDisabled(frame.generation.version()));
    }

    let mut body = BytesMut::new();
    encode_fields(&frame.fields, frame.generation.layout(), &mut body)?;
    let total = frame.generation.header_size() + body.len();

    match frame.generation {
        Generation::V2 => {
            let name = match &frame.kind {
                FrameKind::Named(name) if name.len() <= V2_COMMAND_LEN => name,
                other => return Err(FrameError::Unrepresentable(other.to_string())),
            };
            if total > MAX_FRAME_SIZE {
                return Err(FrameError::FrameTooLarge {
                    size: total,
                    max: MAX_FRAME_SIZE,
                });
            }
            dst.reserve(total);
            dst.put_u32(SIGNATURE);
            dst.put_u16(V2_SENTINEL);
            dst.put_u16(2);
            dst.put_u32(body.len() as u32);
            dst.put_slice(name.as_bytes());
            dst.put_bytes(0, V2_COMMAND_LEN - name.len());
            dst.put_u32(frame.sequence);
        }
        Generation::V3 => {
            let code = match &frame.kind {
                FrameKind::Code(code) => *code,
                other => return Err(FrameError::Unrepresentable(other.to_string())),
            };
            let length = u16::try_from(total).map_err(|_| FrameError::FrameTooLarge {
                size: total,
                max: u16::MAX as usize,
            })?;
            dst.reserve(total);
            dst.put_u32(SIGNATURE);
            dst.put_u16(V3_SENTINEL);
            dst.put_u16(3);
            dst.put_u16(code);
            dst.put_u16(0);
            dst.put_u32(frame.sequence);
            dst.put_u16(frame.code);
            dst.put_u16(length);
            dst.put_u32(frame.fields.mask()?);
        }
    }
    dst.put_slice(&body);
    Ok(())
}

/// Decode a frame from a buffer.
///
/// Returns `Ok(None)` if the buffer doesn't contain a complete frame yet.
/// On success, consumes the frame bytes from the buffer.
pub fn decode_frame(src: &mut BytesMut, max_frame_size: usize) -> Result<Option<Frame>> {
    if src.len() < STUB_SIZE {
        // A wrong signature is detectable before the stub is complete.
        let seen = src.len().min(4);
        if src[..seen] != SIGNATURE.to_be_bytes()[..seen] {
            return Err(FrameError::BadSignature);
        }
        return Ok(None);
    }

    let (_, header_len) = probe_header(src)?;
    if src.len() < header_len {
        return Ok(None);
    }

    let header = decode_header(src, max_frame_size)?;
    if src.len() < header.frame_len {
        return Ok(None);
    }

    src.advance(header.header_len);
    let body = src.split_to(header.body_len());
    decode_body(&header, &body).map(Some)
}

/// Configuration for the frame codec.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Maximum total frame size in bytes. Clamped to [`MAX_FRAME_SIZE`].
    pub max_frame_size: usize,
}

impl FrameConfig {
    /// Lower the frame size limit.
    pub fn with_max_frame_size(mut self, max_frame_size: usize) -> Self {
        self.max_frame_size = max_frame_size.min(MAX_FRAME_SIZE);
        self
    }
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_frame_size: MAX_FRAME_SIZE,
        }
    }
}
