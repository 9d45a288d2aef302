use std::io::{BufRead, BufReader, ErrorKind, Read};
use std::time::Duration;

use crate::error::{ConfigError, SourceError};

/// Longest line accepted, newline included. Anything longer is malformed.
pub const MAX_LINE_BYTES: usize = 256;

/// What one read from a [`SampleSource`] produced.
#[derive(Clone, Debug, PartialEq)]
pub enum SourceEvent {
    Value(f32),
    /// A line that is not a finite decimal number. Carries the raw text.
    Malformed(String),
    /// No sample this time: the read timed out or the line was blank.
    Idle,
    /// The input ended cleanly.
    End,
}

/// Producer-side view of the device: yields decoded values, never raw bytes.
pub trait SampleSource: Send {
    fn next_event(&mut self) -> Result<SourceEvent, SourceError>;

    /// Short human-readable name for logs and the window header.
    fn describe(&self) -> String;
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum LineParse {
    Blank,
    Value(f32),
    Malformed,
}

/// Decodes one line of the device protocol: an ASCII decimal number.
pub fn parse_line(line: &[u8]) -> LineParse {
    let Ok(text) = std::str::from_utf8(line) else {
        return LineParse::Malformed;
    };
    let text = text.trim();
    if text.is_empty() {
        return LineParse::Blank;
    }
    match text.parse::<f32>() {
        Ok(value) if value.is_finite() => LineParse::Value(value),
        _ => LineParse::Malformed,
    }
}

/// Newline-delimited decimal samples over any buffered reader.
///
/// A line cut short by a read timeout is kept and completed by later reads.
/// A line over [`MAX_LINE_BYTES`] is reported once as malformed and the rest
/// of it is skipped, so input without newlines cannot grow memory.
pub struct LineSource<R> {
    reader: R,
    pending: Vec<u8>,
    name: String,
    eof_is_disconnect: bool,
    // Inside an over-long line; drop bytes up to the next newline.
    skipping: bool,
}

impl<R: BufRead + Send> LineSource<R> {
    pub fn new(reader: R, name: impl Into<String>) -> Self {
        Self {
            reader,
            pending: Vec::with_capacity(MAX_LINE_BYTES),
            name: name.into(),
            eof_is_disconnect: false,
            skipping: false,
        }
    }

    /// Treat end of input as a lost device rather than a clean end.
    pub fn eof_is_disconnect(mut self, yes: bool) -> Self {
        self.eof_is_disconnect = yes;
        self
    }

    fn take_line(&mut self) -> SourceEvent {
        let event = match parse_line(&self.pending) {
            LineParse::Blank => SourceEvent::Idle,
            LineParse::Value(value) => SourceEvent::Value(value),
            LineParse::Malformed => {
                SourceEvent::Malformed(String::from_utf8_lossy(&self.pending).trim().to_string())
            }
        };
        self.pending.clear();
        event
    }

    fn take_overlong(&mut self) -> SourceEvent {
        let head = String::from_utf8_lossy(&self.pending[..32]).to_string();
        self.pending.clear();
        self.skipping = true;
        SourceEvent::Malformed(format!("{head}... (over {MAX_LINE_BYTES} bytes)"))
    }
}

impl<R: BufRead + Send> SampleSource for LineSource<R> {
    fn next_event(&mut self) -> Result<SourceEvent, SourceError> {
        loop {
            // pending never reaches the limit between calls, so room > 0.
            let room = (MAX_LINE_BYTES - self.pending.len()) as u64;
            match (&mut self.reader).take(room).read_until(b'\n', &mut self.pending) {
                Ok(0) if self.pending.is_empty() && self.eof_is_disconnect => {
                    return Err(SourceError::Disconnected(format!(
                        "{} returned end of file",
                        self.name
                    )));
                }
                Ok(0) if self.pending.is_empty() => return Ok(SourceEvent::End),
                Ok(_) => {
                    let complete = self.pending.ends_with(b"\n");
                    if self.skipping {
                        self.pending.clear();
                        self.skipping = !complete;
                        continue;
                    }
                    if !complete && self.pending.len() >= MAX_LINE_BYTES {
                        return Ok(self.take_overlong());
                    }
                    return Ok(self.take_line());
                }
                Err(err) if matches!(err.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => {
                    return Ok(SourceEvent::Idle);
                }
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(SourceError::Io(err)),
            }
        }
    }

    fn describe(&self) -> String {
        self.name.clone()
    }
}

pub type SerialSource = LineSource<BufReader<Box<dyn serialport::SerialPort>>>;

/// Opens `port` for the line protocol. Reads block for at most `read_timeout`.
pub fn open_serial(
    port: &str,
    baud_rate: u32,
    read_timeout: Duration,
) -> Result<SerialSource, ConfigError> {
    let device = serialport::new(port, baud_rate)
        .timeout(read_timeout)
        .open()
        .map_err(|err| ConfigError::OpenPort {
            port: port.to_string(),
            message: err.to_string(),
        })?;
    log::info!("Connected to {port} at {baud_rate} baud");
    Ok(LineSource::new(BufReader::new(device), port).eof_is_disconnect(true))
}

pub type StdinSource = LineSource<BufReader<std::io::Stdin>>;

pub fn open_stdin() -> StdinSource {
    LineSource::new(BufReader::new(std::io::stdin()), "stdin")
}
