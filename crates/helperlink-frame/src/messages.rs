//! Payload schemas for the built-in commands.
//!
//! Each type converts to and from the [`FieldSet`] carried by its frame. The
//! field ids are part of the wire contract and identical in both generations.

use bytes::Bytes;

use crate::error::{FrameError, Result};
use crate::fields::{FieldSet, Value};

/// Severity of a helper-originated log message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Severity {
    Debug,
    Info,
    Error,
    Alert,
    Fatal,
}

impl Severity {
    pub fn code(self) -> u8 {
        match self {
            Severity::Debug => 1,
            Severity::Info => 2,
            Severity::Error => 4,
            Severity::Alert => 8,
            Severity::Fatal => 16,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Severity::Debug),
            2 => Some(Severity::Info),
            4 => Some(Severity::Error),
            8 => Some(Severity::Alert),
            16 => Some(Severity::Fatal),
            _ => None,
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Severity::Debug => "debug",
            Severity::Info => "info",
            Severity::Error => "error",
            Severity::Alert => "alert",
            Severity::Fatal => "fatal",
        };
        f.write_str(name)
    }
}

/// `MESSAGE`: a log line from the helper.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogMessage {
    pub severity: Severity,
    pub text: String,
}

impl LogMessage {
    const SEVERITY: u8 = 1;
    const TEXT: u8 = 2;

    pub fn to_fields(&self) -> FieldSet {
        FieldSet::new()
            .with(Self::SEVERITY, Value::U8(self.severity.code()))
            .with(Self::TEXT, Value::Str(self.text.clone()))
    }

    pub fn from_fields(fields: &FieldSet) -> Result<Self> {
        let code = fields
            .u8(Self::SEVERITY)?
            .ok_or(FrameError::MissingField(Self::SEVERITY))?;
        let severity = Severity::from_code(code)
            .ok_or_else(|| FrameError::Malformed(format!("unknown message severity {code}")))?;
        Ok(Self {
            severity,
            text: fields.str(Self::TEXT)?.unwrap_or_default().to_string(),
        })
    }
}

/// `SHUTDOWN`: the peer is going away. The reason is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Shutdown {
    pub reason: Option<String>,
}

impl Shutdown {
    const REASON: u8 = 1;

    pub fn to_fields(&self) -> FieldSet {
        let mut fields = FieldSet::new();
        if let Some(reason) = &self.reason {
            fields.insert(Self::REASON, Value::Str(reason.clone()));
        }
        fields
    }

    pub fn from_fields(fields: &FieldSet) -> Result<Self> {
        Ok(Self {
            reason: fields.str(Self::REASON)?.map(str::to_string),
        })
    }
}

/// `REGISTER`: the peer announces which subsystem it implements.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Register {
    pub subsystem: String,
}

impl Register {
    const SUBSYSTEM: u8 = 1;

    pub fn to_fields(&self) -> FieldSet {
        FieldSet::new().with(Self::SUBSYSTEM, Value::Str(self.subsystem.clone()))
    }

    pub fn from_fields(fields: &FieldSet) -> Result<Self> {
        Ok(Self {
            subsystem: fields.require_str(Self::SUBSYSTEM)?.to_string(),
        })
    }
}

/// `ERROR`: the peer reports a failure; the frame code carries its status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorReport {
    pub message: String,
}

impl ErrorReport {
    const MESSAGE: u8 = 1;

    pub fn to_fields(&self) -> FieldSet {
        FieldSet::new().with(Self::MESSAGE, Value::Str(self.message.clone()))
    }

    pub fn from_fields(fields: &FieldSet) -> Result<Self> {
        Ok(Self {
            message: fields.str(Self::MESSAGE)?.unwrap_or_default().to_string(),
        })
    }
}

/// `HTTPREGISTERURI`: expose `uri` on the server, proxied through the peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRegisterUri {
    pub uri: String,
    pub method: String,
}

impl HttpRegisterUri {
    const URI: u8 = 1;
    const METHOD: u8 = 2;

    pub fn to_fields(&self) -> FieldSet {
        FieldSet::new()
            .with(Self::URI, Value::Str(self.uri.clone()))
            .with(Self::METHOD, Value::Str(self.method.clone()))
    }

    pub fn from_fields(fields: &FieldSet) -> Result<Self> {
        Ok(Self {
            uri: fields.require_str(Self::URI)?.to_string(),
            method: fields.require_str(Self::METHOD)?.to_string(),
        })
    }
}

/// `HTTPREQUEST`: a proxied request, correlated by `req_id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub req_id: u32,
    pub uri: String,
    pub method: String,
    pub variables: Vec<(String, String)>,
}

impl HttpRequest {
    const REQ_ID: u8 = 1;
    const URI: u8 = 2;
    const METHOD: u8 = 3;
    const VARIABLES: u8 = 4;

    pub fn to_fields(&self) -> FieldSet {
        let mut fields = FieldSet::new()
            .with(Self::REQ_ID, Value::U32(self.req_id))
            .with(Self::URI, Value::Str(self.uri.clone()))
            .with(Self::METHOD, Value::Str(self.method.clone()));
        if !self.variables.is_empty() {
            fields.insert(Self::VARIABLES, Value::StrMap(self.variables.clone()));
        }
        fields
    }

    pub fn from_fields(fields: &FieldSet) -> Result<Self> {
        Ok(Self {
            req_id: fields
                .u32(Self::REQ_ID)?
                .ok_or(FrameError::MissingField(Self::REQ_ID))?,
            uri: fields.require_str(Self::URI)?.to_string(),
            method: fields.require_str(Self::METHOD)?.to_string(),
            variables: fields
                .str_map(Self::VARIABLES)?
                .map(<[_]>::to_vec)
                .unwrap_or_default(),
        })
    }
}

/// `HTTPREQUESTCANCEL`: the client behind `req_id` went away.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequestCancel {
    pub req_id: u32,
}

impl HttpRequestCancel {
    const REQ_ID: u8 = 1;

    pub fn to_fields(&self) -> FieldSet {
        FieldSet::new().with(Self::REQ_ID, Value::U32(self.req_id))
    }

    pub fn from_fields(fields: &FieldSet) -> Result<Self> {
        Ok(Self {
            req_id: fields
                .u32(Self::REQ_ID)?
                .ok_or(FrameError::MissingField(Self::REQ_ID))?,
        })
    }
}

/// `HTTPRESPONSE`: one piece of a proxied response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HttpResponse {
    pub req_id: u32,
    pub headers: Vec<(String, String)>,
    pub content: Option<Bytes>,
    pub status: Option<u16>,
    pub close: bool,
}

impl HttpResponse {
    const REQ_ID: u8 = 1;
    const HEADERS: u8 = 2;
    const CONTENT: u8 = 3;
    const STATUS: u8 = 4;
    const CLOSE: u8 = 5;

    pub fn to_fields(&self) -> FieldSet {
        let mut fields = FieldSet::new().with(Self::REQ_ID, Value::U32(self.req_id));
        if !self.headers.is_empty() {
            fields.insert(Self::HEADERS, Value::StrMap(self.headers.clone()));
        }
        if let Some(content) = &self.content {
            fields.insert(Self::CONTENT, Value::Bytes(content.clone()));
        }
        if let Some(status) = self.status {
            fields.insert(Self::STATUS, Value::U16(status));
        }
        if self.close {
            fields.insert(Self::CLOSE, Value::Bool(true));
        }
        fields
    }

    pub fn from_fields(fields: &FieldSet) -> Result<Self> {
        Ok(Self {
            req_id: fields
                .u32(Self::REQ_ID)?
                .ok_or(FrameError::MissingField(Self::REQ_ID))?,
            headers: fields
                .str_map(Self::HEADERS)?
                .map(<[_]>::to_vec)
                .unwrap_or_default(),
            content: fields.bytes(Self::CONTENT)?.cloned(),
            status: fields.u16(Self::STATUS)?,
            close: fields.bool(Self::CLOSE)?.unwrap_or(false),
        })
    }
}

/// `HTTPAUTH`: a session token minted for the helper.
#[derive(Clone, PartialEq, Eq)]
pub struct HttpAuth {
    pub token: String,
}

impl std::fmt::Debug for HttpAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpAuth")
            .field("token", &"<redacted>")
            .finish()
    }
}

impl HttpAuth {
    const TOKEN: u8 = 1;

    pub fn to_fields(&self) -> FieldSet {
        FieldSet::new().with(Self::TOKEN, Value::Str(self.token.clone()))
    }

    pub fn from_fields(fields: &FieldSet) -> Result<Self> {
        Ok(Self {
            token: fields.require_str(Self::TOKEN)?.to_string(),
        })
    }
}

/// `EVENTBUSREGISTER`: subscribe to the named events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventRegister {
    pub events: Vec<String>,
}

impl EventRegister {
    const EVENTS: u8 = 1;

    pub fn to_fields(&self) -> FieldSet {
        FieldSet::new().with(Self::EVENTS, Value::StrList(self.events.clone()))
    }

    pub fn from_fields(fields: &FieldSet) -> Result<Self> {
        Ok(Self {
            events: fields
                .str_list(Self::EVENTS)?
                .map(<[_]>::to_vec)
                .unwrap_or_default(),
        })
    }
}

/// `EVENT`: a subscribed event, serialized as JSON text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventNotice {
    pub event: String,
}

impl EventNotice {
    const EVENT: u8 = 1;

    pub fn to_fields(&self) -> FieldSet {
        FieldSet::new().with(Self::EVENT, Value::Str(self.event.clone()))
    }

    pub fn from_fields(fields: &FieldSet) -> Result<Self> {
        Ok(Self {
            event: fields.require_str(Self::EVENT)?.to_string(),
        })
    }
}

/// `EVENTBUSPUBLISH`: publish an event of `kind` with a JSON text body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventPublish {
    pub kind: String,
    pub content: String,
}

impl EventPublish {
    const KIND: u8 = 1;
    const CONTENT: u8 = 2;

    pub fn to_fields(&self) -> FieldSet {
        FieldSet::new()
            .with(Self::KIND, Value::Str(self.kind.clone()))
            .with(Self::CONTENT, Value::Str(self.content.clone()))
    }

    pub fn from_fields(fields: &FieldSet) -> Result<Self> {
        Ok(Self {
            kind: fields.require_str(Self::KIND)?.to_string(),
            content: fields.require_str(Self::CONTENT)?.to_string(),
        })
    }
}
