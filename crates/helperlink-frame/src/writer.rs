use std::io::{ErrorKind, Write};

use bytes::BytesMut;

use crate::codec::{encode_frame, Frame, FrameConfig};
use crate::error::{FrameError, Result};

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;

/// Writes complete frames to any blocking `Write` stream.
pub struct FrameWriter<T> {
    inner: T,
    buf: BytesMut,
    config: FrameConfig,
}

impl<T: Write> FrameWriter<T> {
    /// Create a new frame writer with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a new frame writer with explicit configuration.
    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            config,
        }
    }

    /// Encode and write a complete frame (blocking), then flush.
    pub fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        self.buf.clear();
        encode_frame(frame, &mut self.buf)?;
        if self.buf.len() > self.config.max_frame_size {
            return Err(FrameError::FrameTooLarge {
                size: self.buf.len(),
                max: self.config.max_frame_size,
            });
        }

        let mut offset = 0usize;
        while offset < self.buf.len() {
            match self.inner.write(&self.buf[offset..]) {
                Ok(0) => return Err(FrameError::ConnectionClosed),
                Ok(n) => offset += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            }
        }

        self.flush()
    }

    /// Flush the underlying stream.
    pub fn flush(&mut self) -> Result<()> {
        loop {
            match self.inner.flush() {
                Ok(()) => return Ok(()),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            }
        }
    }

    /// Consume the writer and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    use bytes::BytesMut;

    use super::*;
    use crate::codec::{decode_frame, Generation, MAX_FRAME_SIZE};
    use crate::command::Command;
    use crate::fields::{FieldSet, Value};
    use crate::messages::Shutdown;

    fn written(writer: FrameWriter<Cursor<Vec<u8>>>) -> BytesMut {
        BytesMut::from(writer.into_inner().into_inner().as_slice())
    }

    #[test]
    fn write_frames_in_order() {
        let mut writer = FrameWriter::new(Cursor::new(Vec::<u8>::new()));
        for seq in 1..=3 {
            let frame = Frame::new(Generation::V3, Command::Ping, seq, FieldSet::new());
            writer.write_frame(&frame).unwrap();
        }

        let mut wire = written(writer);
        for seq in 1..=3 {
            let frame = decode_frame(&mut wire, MAX_FRAME_SIZE).unwrap().unwrap();
            assert_eq!(frame.sequence, seq);
        }
        assert!(wire.is_empty());
    }

    #[cfg(feature = "v2")]
    #[test]
    fn writes_generation_two_frames() {
        let reason = Shutdown {
            reason: Some("operator request".to_string()),
        };
        let frame = Frame::new(Generation::V2, Command::Shutdown, 5, reason.to_fields());
        let mut writer = FrameWriter::new(Cursor::new(Vec::<u8>::new()));
        writer.write_frame(&frame).unwrap();

        let mut wire = written(writer);
        let decoded = decode_frame(&mut wire, MAX_FRAME_SIZE).unwrap().unwrap();
        assert_eq!(decoded.generation, Generation::V2);
        assert_eq!(Shutdown::from_fields(&decoded.fields).unwrap(), reason);
    }

    #[test]
    fn frame_too_large_rejected() {
        let frame = Frame::new(
            Generation::V3,
            Command::Message,
            1,
            FieldSet::new().with(2, Value::Str("x".repeat(128))),
        );
        let cfg = FrameConfig::default().with_max_frame_size(64);
        let mut writer = FrameWriter::with_config(Cursor::new(Vec::<u8>::new()), cfg);
        let err = writer.write_frame(&frame).unwrap_err();
        assert!(matches!(err, FrameError::FrameTooLarge { .. }));
    }

    #[test]
    fn flush_propagates() {
        let sink = FlushTrackingWriter::default();
        let flag = Arc::clone(&sink.flushed);
        let mut writer = FrameWriter::new(sink);

        let frame = Frame::new(Generation::V3, Command::Pong, 1, FieldSet::new());
        writer.write_frame(&frame).unwrap();

        assert!(flag.load(Ordering::SeqCst));
    }

    #[test]
    fn connection_closed_when_write_returns_zero() {
        let mut writer = FrameWriter::new(ZeroWriter);
        let frame = Frame::new(Generation::V3, Command::Pong, 1, FieldSet::new());
        let err = writer.write_frame(&frame).unwrap_err();
        assert!(matches!(err, FrameError::ConnectionClosed));
    }

    #[derive(Default)]
    struct FlushTrackingWriter {
        flushed: Arc<AtomicBool>,
    }

    impl Write for FlushTrackingWriter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            self.flushed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    struct ZeroWriter;

    impl Write for ZeroWriter {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Ok(0)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }
}
