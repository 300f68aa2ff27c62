//! Encoding detection and lazy line decoding of snapshot files
//!
//! Statewide exports arrive either as UTF-16LE with a byte-order mark or in
//! a legacy single-byte encoding, decoded here as Latin-1. Lines are read
//! one at a time; nothing beyond the current line is held in memory.

use std::fs::File;
use std::io::{self, BufRead, BufReader, Read, Seek, SeekFrom};
use std::path::Path;

/// Size of the sample used to estimate the line count.
const SAMPLE_BYTES: usize = 1024 * 1024;

const UTF16LE_BOM: [u8; 2] = [0xFF, 0xFE];

/// Text encoding of a snapshot file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextEncoding {
    Utf16Le,
    Latin1,
}

impl std::fmt::Display for TextEncoding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TextEncoding::Utf16Le => write!(f, "utf-16le"),
            TextEncoding::Latin1 => write!(f, "latin-1"),
        }
    }
}

/// Sniff the first two bytes for a UTF-16LE byte-order mark
pub fn detect_encoding<R: Read>(reader: &mut R) -> io::Result<TextEncoding> {
    let mut bom = [0u8; 2];
    let mut filled = 0;
    while filled < bom.len() {
        let n = reader.read(&mut bom[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }

    if filled == 2 && bom == UTF16LE_BOM {
        Ok(TextEncoding::Utf16Le)
    } else {
        Ok(TextEncoding::Latin1)
    }
}

/// Approximate number of lines: newlines in the first MiB scaled by the
/// file size in MiB. Only used for progress reporting.
pub fn estimate_line_count<R: Read>(reader: &mut R, file_size: u64) -> io::Result<u64> {
    let mut sample = Vec::with_capacity(SAMPLE_BYTES);
    reader.take(SAMPLE_BYTES as u64).read_to_end(&mut sample)?;

    let newlines = sample.iter().filter(|&&b| b == b'\n').count() as u64;
    if sample.len() < SAMPLE_BYTES {
        return Ok(newlines.max(1));
    }

    let mib = file_size.div_ceil(SAMPLE_BYTES as u64);
    Ok(newlines.saturating_mul(mib).max(1))
}

/// Lazy iterator over decoded lines, without their terminators
pub struct LineDecoder<R> {
    reader: R,
    encoding: TextEncoding,
    buf: Vec<u8>,
    done: bool,
}

impl<R: BufRead> LineDecoder<R> {
    /// Wrap a reader positioned at the start of the file. A UTF-16 BOM is
    /// skipped on the first read.
    pub fn new(reader: R, encoding: TextEncoding) -> Self {
        Self {
            reader,
            encoding,
            buf: Vec::new(),
            done: false,
        }
    }

    pub fn encoding(&self) -> TextEncoding {
        self.encoding
    }

    fn next_latin1(&mut self) -> io::Result<Option<String>> {
        self.buf.clear();
        if self.reader.read_until(b'\n', &mut self.buf)? == 0 {
            return Ok(None);
        }
        trim_terminator(&mut self.buf);
        // Every byte maps to the code point of the same value
        Ok(Some(self.buf.iter().map(|&b| b as char).collect()))
    }

    fn next_utf16(&mut self) -> io::Result<Option<String>> {
        let mut units: Vec<u16> = Vec::new();
        let mut pair = [0u8; 2];
        let mut saw_any = false;

        loop {
            match read_unit(&mut self.reader, &mut pair)? {
                None => break,
                Some(unit) => {
                    saw_any = true;
                    if unit == 0xFEFF && units.is_empty() {
                        continue;
                    }
                    if unit == 0x000A {
                        break;
                    }
                    units.push(unit);
                }
            }
        }

        if !saw_any {
            return Ok(None);
        }
        if units.last() == Some(&0x000D) {
            units.pop();
        }
        Ok(Some(String::from_utf16_lossy(&units)))
    }
}

/// Read one little-endian UTF-16 code unit; a trailing odd byte is dropped
fn read_unit<R: Read>(reader: &mut R, pair: &mut [u8; 2]) -> io::Result<Option<u16>> {
    let mut filled = 0;
    while filled < 2 {
        let n = reader.read(&mut pair[filled..])?;
        if n == 0 {
            return Ok(None);
        }
        filled += n;
    }
    Ok(Some(u16::from_le_bytes(*pair)))
}

fn trim_terminator(buf: &mut Vec<u8>) {
    if buf.last() == Some(&b'\n') {
        buf.pop();
    }
    if buf.last() == Some(&b'\r') {
        buf.pop();
    }
}

impl<R: BufRead> Iterator for LineDecoder<R> {
    type Item = io::Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let line = match self.encoding {
            TextEncoding::Latin1 => self.next_latin1(),
            TextEncoding::Utf16Le => self.next_utf16(),
        };
        match line {
            Ok(Some(line)) => Some(Ok(line)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// An opened snapshot: its header line, the remaining data lines, and an
/// approximate line total for progress bars
pub struct Snapshot {
    pub header: String,
    pub lines: LineDecoder<BufReader<File>>,
    pub approx_lines: u64,
}

/// Open a snapshot file, sniff its encoding and consume the header line.
///
/// The file handle is owned by the returned decoder and released when it
/// is dropped.
pub fn open_snapshot(path: impl AsRef<Path>) -> io::Result<Snapshot> {
    let path = path.as_ref();
    let mut file = File::open(path)?;
    let size = file.metadata()?.len();

    let encoding = detect_encoding(&mut file)?;
    file.seek(SeekFrom::Start(0))?;
    let approx_lines = estimate_line_count(&mut file, size)?;
    file.seek(SeekFrom::Start(0))?;

    let mut lines = LineDecoder::new(BufReader::new(file), encoding);
    let header = match lines.next() {
        Some(line) => line?,
        None => {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("{} is empty", path.display()),
            ))
        }
    };

    tracing::debug!(path = %path.display(), %encoding, approx_lines, "Opened snapshot");

    Ok(Snapshot {
        header,
        lines,
        approx_lines: approx_lines.saturating_sub(1),
    })
}
