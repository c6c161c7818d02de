//! Command identifiers.
//!
//! Generation 2 names a command with a NUL-padded string of up to 32 bytes;
//! generation 3 uses a numeric packet type. [`Command`] is the logical set
//! both generations share, [`FrameKind`] is what actually travels on the wire.

use std::fmt;

/// Maximum length of a generation-2 command name.
pub const V2_COMMAND_LEN: usize = 32;

/// The on-wire type of a frame.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FrameKind {
    /// Generation-2 command string.
    Named(String),
    /// Generation-3 packet type.
    Code(u16),
}

impl fmt::Display for FrameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameKind::Named(name) => write!(f, "{name}"),
            FrameKind::Code(code) => write!(f, "#{code}"),
        }
    }
}

macro_rules! commands {
    ($($variant:ident = $code:literal, $name:literal;)*) => {
        /// Commands known to both protocol generations.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum Command {
            $($variant,)*
        }

        impl Command {
            /// Every known command.
            pub const ALL: &'static [Command] = &[$(Command::$variant,)*];

            /// Generation-3 packet type.
            pub fn code(self) -> u16 {
                match self {
                    $(Command::$variant => $code,)*
                }
            }

            /// Generation-2 command string.
            pub fn name(self) -> &'static str {
                match self {
                    $(Command::$variant => $name,)*
                }
            }

            /// Look up a generation-3 packet type.
            pub fn from_code(code: u16) -> Option<Self> {
                match code {
                    $($code => Some(Command::$variant),)*
                    _ => None,
                }
            }

            /// Look up a generation-2 command string.
            pub fn from_name(name: &str) -> Option<Self> {
                match name {
                    $($name => Some(Command::$variant),)*
                    _ => None,
                }
            }
        }
    };
}

commands! {
    Register = 1, "REGISTER";
    Ping = 2, "PING";
    Pong = 3, "PONG";
    Shutdown = 4, "SHUTDOWN";
    Message = 5, "MESSAGE";
    Error = 6, "ERROR";
    ProbeSource = 10, "KDSPROBESOURCE";
    ProbeSourceReport = 11, "KDSPROBESOURCEREPORT";
    OpenSource = 12, "KDSOPENSOURCE";
    OpenSourceReport = 13, "KDSOPENSOURCEREPORT";
    ListInterfaces = 14, "KDSLISTINTERFACES";
    InterfacesReport = 15, "KDSINTERFACESREPORT";
    DataReport = 16, "KDSDATAREPORT";
    Configure = 17, "KDSCONFIGURE";
    ConfigureReport = 18, "KDSCONFIGUREREPORT";
    NewSource = 19, "KDSNEWSOURCE";
    EventRegister = 32, "EVENTBUSREGISTER";
    Event = 33, "EVENT";
    EventPublish = 34, "EVENTBUSPUBLISH";
    HttpRegisterUri = 64, "HTTPREGISTERURI";
    HttpRequest = 65, "HTTPREQUEST";
    HttpRequestCancel = 66, "HTTPREQUESTCANCEL";
    HttpResponse = 67, "HTTPRESPONSE";
    HttpAuthRequest = 68, "HTTPAUTHREQ";
    HttpAuth = 69, "HTTPAUTH";
}

impl Command {
    /// Resolve a wire kind to a known command.
    pub fn from_kind(kind: &FrameKind) -> Option<Self> {
        match kind {
            FrameKind::Named(name) => Self::from_name(name),
            FrameKind::Code(code) => Self::from_code(*code),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_and_names_resolve_to_the_same_command() {
        for command in Command::ALL {
            assert_eq!(Command::from_code(command.code()), Some(*command));
            assert_eq!(Command::from_name(command.name()), Some(*command));
            assert!(command.name().len() <= V2_COMMAND_LEN);
        }
    }

    #[test]
    fn unknown_kinds_do_not_resolve() {
        assert_eq!(Command::from_kind(&FrameKind::Code(999)), None);
        assert_eq!(
            Command::from_kind(&FrameKind::Named("NOSUCHCMD".to_string())),
            None
        );
        assert_eq!(
            Command::from_kind(&FrameKind::Code(67)),
            Some(Command::HttpResponse)
        );
    }
}
