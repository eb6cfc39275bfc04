//! Byte-level I/O helpers: encoding trials for station exports and the
//! transcoding CSV writer used by dataset export.
//!
//! Station PCs write CSVs in whatever code page their Windows locale uses, so
//! input decoding walks a fixed list of [`SourceEncoding`] candidates instead of
//! trusting a declared label. Output goes through `encoding_rs` the other way.

use std::{
    borrow::Cow,
    fs::File,
    io::{self, BufWriter, Read, Write},
    path::Path,
};

use anyhow::{Context, Result, anyhow};
use csv::QuoteStyle;
use encoding_rs::{Encoding, UTF_8, WINDOWS_1252};

pub const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

pub fn is_dash(path: &Path) -> bool {
    path == Path::new("-")
}

/// Candidate encodings in trial order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceEncoding {
    Utf8,
    Utf8Sig,
    Windows1252,
    Latin1,
    Cp1252,
    Iso88591,
}

impl SourceEncoding {
    pub const TRIAL_ORDER: [SourceEncoding; 6] = [
        SourceEncoding::Utf8,
        SourceEncoding::Utf8Sig,
        SourceEncoding::Windows1252,
        SourceEncoding::Latin1,
        SourceEncoding::Cp1252,
        SourceEncoding::Iso88591,
    ];

    pub fn label(self) -> &'static str {
        match self {
            SourceEncoding::Utf8 => "utf-8",
            SourceEncoding::Utf8Sig => "utf-8-sig",
            SourceEncoding::Windows1252 => "windows-1252",
            SourceEncoding::Latin1 => "latin-1",
            SourceEncoding::Cp1252 => "cp1252",
            SourceEncoding::Iso88591 => "iso-8859-1",
        }
    }

    /// Strict decode. `None` when the bytes are not valid in this encoding.
    ///
    /// Plain `utf-8` declines BOM-prefixed input so the BOM never leaks into
    /// the first header name; `utf-8-sig` takes it instead.
    pub fn decode(self, bytes: &[u8]) -> Option<String> {
        match self {
            SourceEncoding::Utf8 => {
                if bytes.starts_with(UTF8_BOM) {
                    return None;
                }
                decode_strict(bytes, UTF_8)
            }
            SourceEncoding::Utf8Sig => {
                decode_strict(bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes), UTF_8)
            }
            SourceEncoding::Windows1252 | SourceEncoding::Cp1252 => {
                decode_strict(bytes, WINDOWS_1252)
            }
            SourceEncoding::Latin1 | SourceEncoding::Iso88591 => {
                Some(encoding_rs::mem::decode_latin1(bytes).into_owned())
            }
        }
    }
}

fn decode_strict(bytes: &[u8], encoding: &'static Encoding) -> Option<String> {
    encoding
        .decode_without_bom_handling_and_without_replacement(bytes)
        .map(Cow::into_owned)
}

pub fn resolve_encoding(label: Option<&str>) -> Result<&'static Encoding> {
    if let Some(value) = label {
        Encoding::for_label(value.trim().as_bytes())
            .ok_or_else(|| anyhow!("Unknown encoding '{value}'"))
    } else {
        Ok(UTF_8)
    }
}

pub fn read_file_bytes(path: &Path) -> io::Result<Vec<u8>> {
    let mut file = File::open(path)?;
    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes)?;
    Ok(bytes)
}

/// Reader over already-decoded text. Ragged rows are tolerated and squared up
/// by the caller.
pub fn open_csv_reader<R>(reader: R, delimiter: u8) -> csv::Reader<R>
where
    R: Read,
{
    let mut builder = csv::ReaderBuilder::new();
    builder
        .has_headers(true)
        .delimiter(delimiter)
        .double_quote(true)
        .flexible(true);
    builder.from_reader(reader)
}

pub fn open_csv_writer(
    path: Option<&Path>,
    delimiter: u8,
    encoding: &'static Encoding,
) -> Result<csv::Writer<Box<dyn Write>>> {
    let base: Box<dyn Write> = match path {
        Some(p) if !is_dash(p) => Box::new(BufWriter::new(
            File::create(p).with_context(|| format!("Creating output file {p:?}"))?,
        )),
        _ => Box::new(std::io::stdout()),
    };

    let writer: Box<dyn Write> = if encoding == UTF_8 {
        base
    } else {
        Box::new(TranscodingWriter::new(base, encoding))
    };

    let mut builder = csv::WriterBuilder::new();
    builder
        .delimiter(delimiter)
        .quote_style(QuoteStyle::Necessary)
        .double_quote(true);
    Ok(builder.from_writer(writer))
}

/// Re-encodes the UTF-8 stream produced by `csv::Writer` on the fly. Partial
/// multi-byte sequences are held back until the next write completes them.
struct TranscodingWriter<W: Write> {
    inner: W,
    encoding: &'static Encoding,
    pending: Vec<u8>,
}

impl<W: Write> TranscodingWriter<W> {
    fn new(inner: W, encoding: &'static Encoding) -> Self {
        Self {
            inner,
            encoding,
            pending: Vec::new(),
        }
    }

    fn drain_complete(&mut self, at_end: bool) -> io::Result<()> {
        let valid_up_to = match std::str::from_utf8(&self.pending) {
            Ok(_) => self.pending.len(),
            Err(err) if err.error_len().is_some() => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "Invalid UTF-8 sequence in output stream",
                ));
            }
            Err(err) => err.valid_up_to(),
        };
        if at_end && valid_up_to < self.pending.len() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "Incomplete UTF-8 sequence at end of output stream",
            ));
        }
        if valid_up_to == 0 {
            return Ok(());
        }
        let chunk: Vec<u8> = self.pending.drain(..valid_up_to).collect();
        let text = std::str::from_utf8(&chunk)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        self.encode_and_write(text)
    }

    fn encode_and_write(&mut self, text: &str) -> io::Result<()> {
        let (encoded, _output_encoding, had_errors) = self.encoding.encode(text);
        if had_errors {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Failed to encode text using {}", self.encoding.name()),
            ));
        }
        self.inner.write_all(encoded.as_ref())
    }
}

impl<W: Write> Write for TranscodingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.pending.extend_from_slice(buf);
        self.drain_complete(false)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.drain_complete(true)?;
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_utf8_declines_bom() {
        let bytes = [UTF8_BOM, "A;B".as_bytes()].concat();
        assert_eq!(SourceEncoding::Utf8.decode(&bytes), None);
        assert_eq!(SourceEncoding::Utf8Sig.decode(&bytes).as_deref(), Some("A;B"));
    }

    #[test]
    fn latin1_maps_bytes_to_code_points() {
        let decoded = SourceEncoding::Latin1.decode(&[0x41, 0xB0, 0xF8]);
        assert_eq!(decoded.as_deref(), Some("A°ø"));
    }

    #[test]
    fn windows_1252_decodes_euro_sign() {
        assert_eq!(SourceEncoding::Cp1252.decode(&[0x80]).as_deref(), Some("€"));
    }

    #[test]
    fn transcoding_writer_handles_split_sequences() {
        let mut out = Vec::new();
        {
            let mut writer = TranscodingWriter::new(&mut out, WINDOWS_1252);
            let bytes = "é".as_bytes();
            writer.write_all(&bytes[..1]).unwrap();
            writer.write_all(&bytes[1..]).unwrap();
            writer.flush().unwrap();
        }
        assert_eq!(out, vec![0xE9]);
    }
}
