//! Integer record codecs.
//!
//! Text records are decimal integers, one per line. Binary records are densely packed 32-bit big-endian
//! unsigned integers.

use std::error::Error;
use std::fmt;
use std::fmt::Display;
use std::io;
use std::io::prelude::*;

/// Size of a binary record in bytes.
pub const RECORD_SIZE: usize = 4;

/// Record reading error.
#[derive(Debug)]
pub enum RecordError {
    /// Common I/O error.
    IO(io::Error),
    /// Record can't be decoded. `position` is a 1-based line number for text records
    /// and a byte offset for binary ones.
    Malformed { position: u64, content: String },
}

impl Error for RecordError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match &self {
            RecordError::IO(err) => Some(err),
            RecordError::Malformed { .. } => None,
        }
    }
}

impl Display for RecordError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self {
            RecordError::IO(err) => write!(f, "I/O operation failed: {}", err),
            RecordError::Malformed { position, content } => {
                write!(f, "malformed record at {}: {:?}", position, content)
            }
        }
    }
}

impl From<io::Error> for RecordError {
    fn from(err: io::Error) -> Self {
        RecordError::IO(err)
    }
}

/// Text record reader. Yields one integer per input line.
///
/// Values are decoded as signed so that negative numbers can be reported as domain violations by the caller
/// rather than as decoding failures. Lines that aren't valid UTF-8 are malformed records.
pub struct TextRecordReader<R: BufRead> {
    reader: R,
    buf: Vec<u8>,
    line: u64,
}

impl<R: BufRead> TextRecordReader<R> {
    pub fn new(reader: R) -> Self {
        TextRecordReader {
            reader,
            buf: Vec::new(),
            line: 0,
        }
    }

    /// Returns the number of the last line read (1-based).
    pub fn line(&self) -> u64 {
        self.line
    }
}

impl<R: BufRead> Iterator for TextRecordReader<R> {
    type Item = Result<i64, RecordError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.buf.clear();
        match self.reader.read_until(b'\n', &mut self.buf) {
            Ok(0) => return None,
            Ok(_) => {}
            Err(err) => return Some(Err(RecordError::IO(err))),
        }
        self.line += 1;

        let token = match std::str::from_utf8(&self.buf) {
            Ok(text) => text.trim(),
            Err(_) => {
                return Some(Err(RecordError::Malformed {
                    position: self.line,
                    content: String::from_utf8_lossy(&self.buf).trim().to_string(),
                }))
            }
        };
        Some(token.parse::<i64>().map_err(|_| RecordError::Malformed {
            position: self.line,
            content: token.to_string(),
        }))
    }
}

/// Writes a text record.
pub fn write_text_record<W: Write>(writer: &mut W, value: u64) -> io::Result<()> {
    writeln!(writer, "{}", value)
}

/// Binary record reader.
pub struct BinaryRecordReader<R: Read> {
    reader: R,
    offset: u64,
}

impl<R: Read> BinaryRecordReader<R> {
    pub fn new(reader: R) -> Self {
        BinaryRecordReader { reader, offset: 0 }
    }

    /// Returns the number of bytes consumed so far.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    fn read_record(&mut self) -> Result<Option<u32>, RecordError> {
        let mut buf = [0u8; RECORD_SIZE];
        let mut filled = 0;

        while filled < RECORD_SIZE {
            match self.reader.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(RecordError::IO(err)),
            }
        }

        match filled {
            0 => Ok(None),
            RECORD_SIZE => {
                self.offset += RECORD_SIZE as u64;
                Ok(Some(u32::from_be_bytes(buf)))
            }
            _ => Err(RecordError::Malformed {
                position: self.offset,
                content: format!("{} trailing byte(s) {:02x?}", filled, &buf[..filled]),
            }),
        }
    }
}

impl<R: Read> Iterator for BinaryRecordReader<R> {
    type Item = Result<u32, RecordError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.read_record().transpose()
    }
}

/// Writes a binary record.
pub fn write_binary_record<W: Write>(writer: &mut W, value: u32) -> io::Result<()> {
    writer.write_all(&value.to_be_bytes())
}

#[cfg(test)]
mod test {
    use std::io;

    use rstest::*;

    use super::{write_binary_record, write_text_record, BinaryRecordReader, RecordError, TextRecordReader};

    #[test]
    fn test_text_records() {
        let input = io::Cursor::new("4\n 1 \n-3\n0\n");
        let actual: Result<Vec<i64>, _> = TextRecordReader::new(input).collect();
        assert_eq!(actual.unwrap(), vec![4, 1, -3, 0]);

        let mut output = Vec::new();
        for value in [0, 1, 42] {
            write_text_record(&mut output, value).unwrap();
        }
        assert_eq!(output, b"0\n1\n42\n");
    }

    #[rstest]
    #[case(&b"1\n2\nthree\n"[..], 3, "three")]
    #[case(&b"1\n\n2\n"[..], 2, "")]
    #[case(&b"1.5\n"[..], 1, "1.5")]
    #[case(&b"1\n\xff\xfe\n0\n"[..], 2, "\u{fffd}\u{fffd}")]
    fn test_malformed_text_record(#[case] input: &[u8], #[case] line: u64, #[case] content: &str) {
        let actual: Result<Vec<i64>, _> = TextRecordReader::new(io::Cursor::new(input)).collect();
        match actual {
            Err(RecordError::Malformed { position, content: actual }) => {
                assert_eq!(position, line);
                assert_eq!(actual, content);
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_text_record_without_trailing_newline() {
        let mut reader = TextRecordReader::new(io::Cursor::new("7\r\n8"));
        assert_eq!(reader.next().unwrap().unwrap(), 7);
        assert_eq!(reader.next().unwrap().unwrap(), 8);
        assert_eq!(reader.line(), 2);
        assert!(reader.next().is_none());
    }

    #[test]
    fn test_binary_records() {
        let mut buf = Vec::new();
        for value in [0, 1, 0xdead_beef, u32::MAX] {
            write_binary_record(&mut buf, value).unwrap();
        }
        assert_eq!(&buf[..8], &[0, 0, 0, 0, 0, 0, 0, 1]);

        let actual: Result<Vec<u32>, _> = BinaryRecordReader::new(io::Cursor::new(buf)).collect();
        assert_eq!(actual.unwrap(), vec![0, 1, 0xdead_beef, u32::MAX]);
    }

    #[test]
    fn test_truncated_binary_record() {
        let buf = vec![0u8, 0, 0, 7, 0, 1];
        let mut reader = BinaryRecordReader::new(io::Cursor::new(buf));

        assert_eq!(reader.next().unwrap().unwrap(), 7);
        match reader.next() {
            Some(Err(RecordError::Malformed { position, .. })) => assert_eq!(position, 4),
            other => panic!("unexpected result: {:?}", other),
        }
    }
}
