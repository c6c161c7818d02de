/// Errors that can occur during frame encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The first four bytes are not the protocol signature.
    #[error("bad frame signature (expected 0xDECAFBAD)")]
    BadSignature,

    /// The sentinel/version pair names no known generation.
    #[error("unsupported protocol (sentinel {sentinel:#06x}, version {version})")]
    UnsupportedProtocol { sentinel: u16, version: u16 },

    /// The frame is a known generation that this build does not support.
    #[error("protocol generation {0} support not compiled in")]
    GenerationDisabled(u16),

    /// Fewer bytes than the header requires.
    #[error("truncated frame header ({available} bytes, need {needed})")]
    Truncated { needed: usize, available: usize },

    /// The declared frame length exceeds the configured maximum.
    #[error("frame too large ({size} bytes, max {max})")]
    FrameTooLarge { size: usize, max: usize },

    /// The frame body could not be decoded.
    #[error("malformed frame: {0}")]
    Malformed(String),

    /// Field ids must be in 1..=32.
    #[error("invalid field id {0}")]
    InvalidFieldId(u8),

    /// A field held a value of a different type than expected.
    #[error("field {id}: expected {expected}, found {found}")]
    FieldType {
        id: u8,
        expected: &'static str,
        found: &'static str,
    },

    /// A field required by the payload schema is absent.
    #[error("missing required field {0}")]
    MissingField(u8),

    /// A floating value cannot be represented in its fixed-point encoding.
    #[error("value {value} outside encodable range [{min}, {max}]")]
    OutOfRange { value: f64, min: f64, max: f64 },

    /// The command type cannot be expressed in the requested generation.
    #[error("command {0} not representable in this generation")]
    Unrepresentable(String),

    /// An I/O error occurred while reading or writing frames.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The connection was closed before a complete frame was received.
    #[error("connection closed (incomplete frame)")]
    ConnectionClosed,
}

pub type Result<T> = std::result::Result<T, FrameError>;
