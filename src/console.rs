//! Byte level handling of the control link.

use core::fmt;

use embedded_io::Error;
use embedded_io_async::{Read, Write};
use heapless::{String, Vec};

use crate::{
    caplog::LogStore,
    command::COMMAND_MAX,
    pipeline::{Pipeline, Reply, TxQueue},
};

/// The amount of bytes requested from the link per read.
pub const READ_CHUNK: usize = 32;
/// Appended to every line written to the link.
pub const LINE_TERMINATOR: &[u8] = b"\r\n";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LineError {
    /// The line didn't fit into the buffer and was discarded.
    Overflow,
    InvalidUtf8,
}
impl fmt::Display for LineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Overflow => f.write_str("line too long"),
            Self::InvalidUtf8 => f.write_str("line isn't valid UTF-8"),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
enum Escape {
    #[default]
    None,
    /// ESC was received.
    Start,
    /// Inside a control sequence, which ends with a byte in 0x40..=0x7e.
    Sequence,
}

/// Assembles bytes from a terminal into lines.
///
/// Lines end with CR, LF or both. Backspace removes the last byte and ANSI escape sequences,
/// like the ones sent for the arrow keys, are dropped. Empty lines are skipped.
#[derive(Clone, Debug, Default)]
pub struct LineReader<const N: usize> {
    buf: Vec<u8, N>,
    escape: Escape,
    overflowed: bool,
}
impl<const N: usize> LineReader<N> {
    pub const fn new() -> Self {
        Self {
            buf: Vec::new(),
            escape: Escape::None,
            overflowed: false,
        }
    }
    /// Process one byte. Returns the line, once it's complete.
    pub fn feed(&mut self, byte: u8) -> Option<Result<String<N>, LineError>> {
        match self.escape {
            Escape::Start => {
                self.escape = if byte == b'[' {
                    Escape::Sequence
                } else {
                    Escape::None
                };
                return None;
            }
            Escape::Sequence => {
                if (0x40..=0x7e).contains(&byte) {
                    self.escape = Escape::None;
                }
                return None;
            }
            Escape::None => {}
        }
        match byte {
            b'\r' | b'\n' => self.finish_line(),
            0x1b => {
                self.escape = Escape::Start;
                None
            }
            // Backspace and delete.
            0x08 | 0x7f => {
                self.buf.pop();
                None
            }
            _ => {
                if self.buf.push(byte).is_err() {
                    self.overflowed = true;
                }
                None
            }
        }
    }
    fn finish_line(&mut self) -> Option<Result<String<N>, LineError>> {
        if core::mem::take(&mut self.overflowed) {
            self.buf.clear();
            return Some(Err(LineError::Overflow));
        }
        if self.buf.is_empty() {
            return None;
        }
        let bytes = core::mem::take(&mut self.buf);
        Some(String::from_utf8(bytes).map_err(|_| LineError::InvalidUtf8))
    }
}

/// Read commands from the link and execute them, until the link reaches its end.
pub async fn run_console<S: LogStore, R: Read>(pipeline: &Pipeline<S>, reader: &mut R) {
    let mut line_reader = LineReader::<COMMAND_MAX>::new();
    let mut buf = [0u8; READ_CHUNK];
    loop {
        let read = match reader.read(&mut buf).await {
            Ok(0) => {
                debug!("Control link closed.");
                return;
            }
            Ok(read) => read,
            Err(err) => {
                warn!("Reading from the control link failed: {:?}", err.kind());
                continue;
            }
        };
        for byte in &buf[..read] {
            match line_reader.feed(*byte) {
                None => {}
                Some(Ok(line)) => {
                    pipeline.execute(&line).await;
                }
                Some(Err(err)) => {
                    pipeline.reply(&Reply::err(format_args!("{err}"))).await;
                }
            }
        }
    }
}

async fn write_line<W: Write>(writer: &mut W, line: &str) -> Result<(), W::Error> {
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(LINE_TERMINATOR).await?;
    writer.flush().await
}

/// Write queued lines to the link forever.
///
/// A line, that couldn't be written, is lost.
pub async fn run_drain<W: Write>(tx: &TxQueue, writer: &mut W) {
    loop {
        let line = tx.pop().await;
        if let Err(err) = write_line(writer, &line).await {
            warn!("Writing to the control link failed: {:?}", err.kind());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{caplog::ram::RamStore, config::PipelineConfig, record::Line};
    use core::convert::Infallible;
    use embassy_futures::{
        block_on,
        select::{select, Either},
    };
    use embedded_io::ErrorType;

    fn feed_all<const N: usize>(
        reader: &mut LineReader<N>,
        bytes: &[u8],
    ) -> std::vec::Vec<Result<String<N>, LineError>> {
        bytes.iter().filter_map(|byte| reader.feed(*byte)).collect()
    }

    #[test]
    fn line_endings() {
        let mut reader = LineReader::<16>::new();
        let lines = feed_all(&mut reader, b"PING\r\nHOP ON\nSHOW\r\r");
        let lines: std::vec::Vec<_> = lines.iter().map(|line| line.as_ref().unwrap().as_str()).collect();
        assert_eq!(lines, ["PING", "HOP ON", "SHOW"]);
    }

    #[test]
    fn editing() {
        let mut reader = LineReader::<16>::new();
        let lines = feed_all(&mut reader, b"PINX\x08G\x1b[A\x1b[1;5C\r");
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].as_ref().unwrap().as_str(), "PING");
        // Backspace on an empty line is harmless.
        assert!(feed_all(&mut reader, b"\x7f\x7f\n").is_empty());
    }

    #[test]
    fn overflow_discards_line() {
        let mut reader = LineReader::<4>::new();
        let lines = feed_all(&mut reader, b"TOOLONG\nPING\n");
        assert_eq!(lines[0], Err(LineError::Overflow));
        assert_eq!(lines[1].as_ref().unwrap().as_str(), "PING");
        let lines = feed_all(&mut reader, b"\xff\n");
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0], Err(LineError::InvalidUtf8));
    }

    /// Hands out the input a few bytes at a time.
    struct ChunkedReader<'a> {
        data: &'a [u8],
        chunk: usize,
    }
    impl ErrorType for ChunkedReader<'_> {
        type Error = Infallible;
    }
    impl Read for ChunkedReader<'_> {
        async fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
            let len = self.chunk.min(buf.len()).min(self.data.len());
            buf[..len].copy_from_slice(&self.data[..len]);
            self.data = &self.data[len..];
            Ok(len)
        }
    }

    #[derive(Default)]
    struct RecordingWriter {
        written: std::vec::Vec<u8>,
    }
    impl ErrorType for RecordingWriter {
        type Error = Infallible;
    }
    impl Write for RecordingWriter {
        async fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
            self.written.extend_from_slice(buf);
            Ok(buf.len())
        }
    }

    #[test]
    fn console_executes_commands() {
        let pipeline = Pipeline::new(PipelineConfig::DEFAULT, RamStore::<256>::new());
        let mut reader = ChunkedReader {
            data: b"set ch 1,6\r\nping\r\n\r\nbogus\n",
            chunk: 3,
        };
        block_on(run_console(&pipeline, &mut reader));
        assert_eq!(pipeline.config().snapshot().channels.as_slice(), &[1, 6]);
        let mut lines = std::vec::Vec::new();
        while let Some(line) = pipeline.tx().try_pop() {
            lines.push(line);
        }
        assert_eq!(
            lines,
            [
                "OK: channels 1,6",
                "OK: PONG",
                "ERR: unknown command 'bogus'"
            ]
        );
    }

    #[test]
    fn drain_writes_lines_in_order() {
        let tx = TxQueue::new();
        for text in ["first", "second"] {
            let mut line = Line::new();
            line.push_str(text).unwrap();
            tx.push(line);
        }
        let mut writer = RecordingWriter::default();
        let result = block_on(select(run_drain(&tx, &mut writer), tx.wait_drained()));
        assert!(matches!(result, Either::Second(())));
        assert_eq!(writer.written, b"first\r\nsecond\r\n");
    }
}
