//! Minimal helper: speaks the protocol over the descriptors it is handed.
//!
//! Launch it through the CLI with the example build directory on the
//! helper search path:
//!   cargo build --example echo-helper
//!   cargo run --features cli -- launch echo-helper \
//!     --helper-path target/debug/examples --duration 5s
//!
//! It registers as the `echo` subsystem, answers pings, serves `/echo` by
//! echoing the request back, logs every event it is sent, and exits on
//! `SHUTDOWN` or when the server closes its pipe.

use std::fs::File;
use std::os::fd::{FromRawFd, RawFd};

use helperlink::frame::messages::{
    EventNotice, EventRegister, HttpRegisterUri, HttpRequest, HttpResponse, LogMessage, Register,
    Shutdown,
};
use helperlink::frame::{
    Command, FieldSet, Frame, FrameError, FrameReader, FrameWriter, Generation, Severity,
};

struct Helper {
    writer: FrameWriter<File>,
    generation: Generation,
    next_sequence: u32,
}

impl Helper {
    fn send(&mut self, command: Command, fields: FieldSet) -> Result<(), FrameError> {
        let sequence = self.next_sequence;
        self.next_sequence = self.next_sequence.wrapping_add(1).max(1);
        self.writer
            .write_frame(&Frame::new(self.generation, command, sequence, fields))
    }

    fn log(&mut self, severity: Severity, text: impl Into<String>) -> Result<(), FrameError> {
        let message = LogMessage {
            severity,
            text: text.into(),
        };
        self.send(Command::Message, message.to_fields())
    }

    /// Handle one inbound frame. Returns `false` once the helper should exit.
    fn handle(&mut self, frame: Frame) -> Result<bool, FrameError> {
        // Answer in whatever generation the server speaks to us.
        self.generation = frame.generation;
        match frame.command() {
            Some(Command::Ping) => {
                let pong = Frame::new(frame.generation, Command::Pong, frame.sequence, FieldSet::new());
                self.writer.write_frame(&pong)?;
            }
            Some(Command::Shutdown) => {
                let shutdown = Shutdown::from_fields(&frame.fields)?;
                eprintln!(
                    "echo-helper: shutdown ({})",
                    shutdown.reason.as_deref().unwrap_or("no reason")
                );
                return Ok(false);
            }
            Some(Command::HttpRequest) => {
                let request = HttpRequest::from_fields(&frame.fields)?;
                let body = format!("{} {}\n", request.method, request.uri);
                let response = HttpResponse {
                    req_id: request.req_id,
                    headers: vec![("Content-Type".to_string(), "text/plain".to_string())],
                    content: Some(body.into_bytes().into()),
                    status: Some(200),
                    close: true,
                };
                self.send(Command::HttpResponse, response.to_fields())?;
            }
            Some(Command::Event) => {
                let event = EventNotice::from_fields(&frame.fields)?;
                self.log(Severity::Info, format!("event: {}", event.event))?;
            }
            Some(Command::Pong) | Some(Command::HttpRequestCancel) => {}
            _ => {
                self.log(Severity::Debug, format!("ignoring {}", frame.kind))?;
            }
        }
        Ok(true)
    }
}

fn fd_arg(args: &[String], flag: &str) -> Option<RawFd> {
    args.iter()
        .find_map(|arg| arg.strip_prefix(flag))
        .and_then(|value| value.parse().ok())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().collect();
    let (Some(in_fd), Some(out_fd)) = (fd_arg(&args, "--in-fd="), fd_arg(&args, "--out-fd=")) else {
        eprintln!("echo-helper: expected --in-fd=N --out-fd=N (run me via `helperlink launch`)");
        std::process::exit(2);
    };

    // SAFETY: the launcher hands us these descriptors open and owned by this
    // process; nothing else in the helper wraps them.
    let (input, output) = unsafe { (File::from_raw_fd(in_fd), File::from_raw_fd(out_fd)) };

    let mut reader = FrameReader::new(input);
    let mut helper = Helper {
        writer: FrameWriter::new(output),
        generation: Generation::LATEST,
        next_sequence: 1,
    };

    helper.send(
        Command::Register,
        Register {
            subsystem: "echo".to_string(),
        }
        .to_fields(),
    )?;
    helper.send(
        Command::HttpRegisterUri,
        HttpRegisterUri {
            uri: "/echo".to_string(),
            method: "GET".to_string(),
        }
        .to_fields(),
    )?;
    helper.send(
        Command::EventRegister,
        EventRegister {
            events: vec!["TIMESTAMP".to_string()],
        }
        .to_fields(),
    )?;
    helper.log(Severity::Info, "echo helper ready")?;

    loop {
        let frame = match reader.read_frame() {
            Ok(frame) => frame,
            Err(FrameError::ConnectionClosed) => break,
            Err(err) => return Err(err.into()),
        };
        if !helper.handle(frame)? {
            break;
        }
    }

    Ok(())
}
