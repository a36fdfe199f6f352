//! Positioning sentence sources.
//!
//! Only the text of each sentence matters to the guidance core; baud rates,
//! receiver configuration and other driver details are the device's
//! business.  A [`SentenceSource`] yields one raw line per call.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::thread;
use std::time::Duration;

use tracing::debug;
use waysense_types::WayError;

/// A stream of raw NMEA sentences.
///
/// Sources are driven from a dedicated thread; `next_sentence` may block
/// until a line is available.
pub trait SentenceSource: Send {
    /// Stable identifier, e.g. `"/dev/ttyAMA0"`.
    fn id(&self) -> &str;

    /// Next raw line, without its line terminator.  `Ok(None)` signals the
    /// end of the stream.
    ///
    /// # Errors
    ///
    /// [`WayError::Device`] when the underlying reader fails.
    fn next_sentence(&mut self) -> Result<Option<String>, WayError>;
}

/// Reads newline-delimited sentences from any [`BufRead`].
///
/// Bytes that are not valid UTF-8 (line noise on a serial port) are
/// replaced rather than failing the read; the checksum rejects the sentence
/// later.
pub struct LineSentenceSource<R> {
    id: String,
    reader: R,
    pacing: Option<Duration>,
    buf: Vec<u8>,
}

impl<R: BufRead + Send> LineSentenceSource<R> {
    pub fn new(id: impl Into<String>, reader: R) -> Self {
        Self {
            id: id.into(),
            reader,
            pacing: None,
            buf: Vec::with_capacity(96),
        }
    }

    /// Sleep `interval` before every line; used to replay recorded logs at
    /// roughly their original rate.
    pub fn with_pacing(mut self, interval: Duration) -> Self {
        self.pacing = Some(interval);
        self
    }
}

impl LineSentenceSource<BufReader<File>> {
    /// Open a serial device node or a recorded log file.
    ///
    /// # Errors
    ///
    /// [`WayError::Device`] if the path cannot be opened.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, WayError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| WayError::Device {
            device: path.display().to_string(),
            details: e.to_string(),
        })?;
        debug!(device = %path.display(), "opened positioning source");
        Ok(Self::new(path.display().to_string(), BufReader::new(file)))
    }
}

impl<R: BufRead + Send> SentenceSource for LineSentenceSource<R> {
    fn id(&self) -> &str {
        &self.id
    }

    fn next_sentence(&mut self) -> Result<Option<String>, WayError> {
        loop {
            if let Some(interval) = self.pacing {
                thread::sleep(interval);
            }
            self.buf.clear();
            let n = self
                .reader
                .read_until(b'\n', &mut self.buf)
                .map_err(|e| WayError::Device {
                    device: self.id.clone(),
                    details: e.to_string(),
                })?;
            if n == 0 {
                return Ok(None);
            }
            let line = String::from_utf8_lossy(&self.buf);
            let line = line.trim();
            if !line.is_empty() {
                return Ok(Some(line.to_string()));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Write};

    #[test]
    fn yields_trimmed_lines_and_skips_blanks() {
        let data = b"$GPGGA,1*00\r\n\r\n$GPRMC,2*00\n";
        let mut src = LineSentenceSource::new("test", Cursor::new(&data[..]));
        assert_eq!(src.next_sentence().unwrap().as_deref(), Some("$GPGGA,1*00"));
        assert_eq!(src.next_sentence().unwrap().as_deref(), Some("$GPRMC,2*00"));
        assert_eq!(src.next_sentence().unwrap(), None);
        assert_eq!(src.id(), "test");
    }

    #[test]
    fn invalid_utf8_is_replaced_not_fatal() {
        let data = b"$GP\xffGGA*00\n";
        let mut src = LineSentenceSource::new("noisy", Cursor::new(&data[..]));
        let line = src.next_sentence().unwrap().unwrap();
        assert!(line.starts_with("$GP"));
        assert!(line.contains('\u{fffd}'));
    }

    #[test]
    fn opens_replay_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "$GPGGA,123519*00").unwrap();
        let mut src = LineSentenceSource::open(file.path()).unwrap();
        assert_eq!(src.next_sentence().unwrap().as_deref(), Some("$GPGGA,123519*00"));
    }

    #[test]
    fn missing_device_is_a_device_error() {
        let err = LineSentenceSource::open("/definitely/not/a/tty").err().unwrap();
        assert!(matches!(err, WayError::Device { .. }));
    }
}
