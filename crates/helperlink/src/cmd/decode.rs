use bytes::BytesMut;
use helperlink_frame::{decode_frame, Frame, MAX_FRAME_SIZE};

use crate::cmd::DecodeArgs;
use crate::exit::{frame_error, io_error, CliError, CliResult, DATA_INVALID, SUCCESS, USAGE};
use crate::output::{print_frame, OutputFormat};

pub fn run(args: DecodeArgs, format: OutputFormat) -> CliResult<i32> {
    let (data, source) = match (&args.hex, &args.file) {
        (Some(hex), None) => (parse_hex(hex)?, "hex".to_string()),
        (None, Some(path)) => (
            std::fs::read(path).map_err(|err| io_error("read failed", err))?,
            path.display().to_string(),
        ),
        _ => return Err(CliError::new(USAGE, "provide frame bytes as hex or --file")),
    };

    if args.max_frame_size == 0 || args.max_frame_size > MAX_FRAME_SIZE {
        return Err(CliError::new(
            USAGE,
            format!("max frame size must be in 1..={MAX_FRAME_SIZE}"),
        ));
    }

    let frames = decode_all(&data, args.max_frame_size)?;
    for frame in &frames {
        print_frame(frame, &source, format);
    }
    Ok(SUCCESS)
}

/// Decode back-to-back frames; trailing partial bytes are an error.
fn decode_all(data: &[u8], max_frame_size: usize) -> CliResult<Vec<Frame>> {
    let mut buf = BytesMut::from(data);
    let mut frames = Vec::new();
    while !buf.is_empty() {
        match decode_frame(&mut buf, max_frame_size) {
            Ok(Some(frame)) => frames.push(frame),
            Ok(None) => {
                return Err(CliError::new(
                    DATA_INVALID,
                    format!(
                        "incomplete frame after {} complete frame(s): {} trailing bytes",
                        frames.len(),
                        buf.len()
                    ),
                ))
            }
            Err(err) => return Err(frame_error("decode failed", err)),
        }
    }
    if frames.is_empty() {
        return Err(CliError::new(DATA_INVALID, "no frames in input"));
    }
    Ok(frames)
}

fn parse_hex(input: &str) -> CliResult<Vec<u8>> {
    let digits: Vec<u8> = input
        .trim()
        .trim_start_matches("0x")
        .bytes()
        .filter(|b| !b.is_ascii_whitespace())
        .collect();
    if digits.len() % 2 != 0 {
        return Err(CliError::new(USAGE, "hex input has an odd number of digits"));
    }
    digits
        .chunks(2)
        .map(|pair| {
            let hi = hex_value(pair[0])?;
            let lo = hex_value(pair[1])?;
            Ok((hi << 4) | lo)
        })
        .collect()
}

fn hex_value(digit: u8) -> CliResult<u8> {
    match digit {
        b'0'..=b'9' => Ok(digit - b'0'),
        b'a'..=b'f' => Ok(digit - b'a' + 10),
        b'A'..=b'F' => Ok(digit - b'A' + 10),
        _ => Err(CliError::new(
            USAGE,
            format!("invalid hex digit {:?}", digit as char),
        )),
    }
}

#[cfg(test)]
mod tests {
    use helperlink_frame::messages::Shutdown;
    use helperlink_frame::{Command, Generation};

    use super::*;

    fn to_hex(bytes: &[u8]) -> String {
        bytes.iter().map(|b| format!("{b:02x}")).collect()
    }

    #[test]
    fn hex_parsing_ignores_whitespace_and_prefix() {
        assert_eq!(parse_hex("0xDE AD\nbe ef").unwrap(), vec![0xde, 0xad, 0xbe, 0xef]);
        assert_eq!(parse_hex("abc").unwrap_err().code, USAGE);
        assert_eq!(parse_hex("zz").unwrap_err().code, USAGE);
    }

    #[test]
    fn decodes_consecutive_frames_of_both_generations() {
        let shutdown = Shutdown {
            reason: Some("bye".to_string()),
        };
        let mut bytes = Frame::new(Generation::V3, Command::Ping, 1, Default::default())
            .encode()
            .unwrap()
            .to_vec();
        bytes.extend_from_slice(
            &Frame::new(Generation::V3, Command::Shutdown, 2, shutdown.to_fields())
                .encode()
                .unwrap(),
        );

        let frames = decode_all(&parse_hex(&to_hex(&bytes)).unwrap(), MAX_FRAME_SIZE).unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].command(), Some(Command::Ping));
        assert_eq!(
            Shutdown::from_fields(&frames[1].fields).unwrap().reason.as_deref(),
            Some("bye")
        );
    }

    #[test]
    fn truncated_input_is_invalid_data() {
        let bytes = Frame::new(Generation::V3, Command::Ping, 1, Default::default())
            .encode()
            .unwrap();
        let err = decode_all(&bytes[..bytes.len() - 1], MAX_FRAME_SIZE).unwrap_err();
        assert_eq!(err.code, DATA_INVALID);
        assert!(err.message.contains("trailing bytes"));
    }

    #[test]
    fn bad_signature_is_invalid_data() {
        let err = decode_all(&[0, 1, 2, 3, 4, 5, 6, 7], MAX_FRAME_SIZE).unwrap_err();
        assert_eq!(err.code, DATA_INVALID);
    }
}
