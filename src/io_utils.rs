//! Input plumbing: delimiter resolution by extension, encoding resolution,
//! and construction of decoded buffered readers.
//!
//! Uploaded reports arrive in whatever encoding the exporter produced
//! (UTF-8 with or without BOM, GBK for some Chinese locales); everything
//! downstream of this module sees UTF-8.

use std::{
    fs::File,
    io::{BufRead, BufReader, Read},
    path::Path,
};

use anyhow::{Context, Result, anyhow};
use encoding_rs::{Encoding, UTF_8};
use encoding_rs_io::DecodeReaderBytesBuilder;

pub const DEFAULT_CSV_DELIMITER: u8 = b',';
pub const DEFAULT_TSV_DELIMITER: u8 = b'\t';

pub fn resolve_encoding(label: Option<&str>) -> Result<&'static Encoding> {
    if let Some(value) = label {
        Encoding::for_label(value.trim().as_bytes())
            .ok_or_else(|| anyhow!("Unknown encoding '{value}'"))
    } else {
        Ok(UTF_8)
    }
}

pub fn resolve_input_delimiter(path: &Path, provided: Option<u8>) -> u8 {
    provided.unwrap_or_else(|| match path.extension().and_then(|ext| ext.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("tsv") => DEFAULT_TSV_DELIMITER,
        _ => DEFAULT_CSV_DELIMITER,
    })
}

/// Wrap a raw byte source in a UTF-8 decoding buffered reader.
pub fn decoded_reader<R: Read>(source: R, encoding: &'static Encoding) -> impl BufRead {
    BufReader::new(
        DecodeReaderBytesBuilder::new()
            .encoding(Some(encoding))
            .bom_sniffing(true)
            .build(source),
    )
}

pub fn open_decoded_reader(path: &Path, encoding: &'static Encoding) -> Result<impl BufRead> {
    let file = File::open(path).with_context(|| format!("Opening input file {path:?}"))?;
    Ok(decoded_reader(file, encoding))
}

pub(crate) fn printable_delimiter(delimiter: u8) -> String {
    match delimiter {
        b',' => ",".to_string(),
        b'\t' => "\\t".to_string(),
        other => (other as char).to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn delimiter_follows_extension() {
        assert_eq!(
            resolve_input_delimiter(Path::new("report.tsv"), None),
            b'\t'
        );
        assert_eq!(resolve_input_delimiter(Path::new("report.csv"), None), b',');
        assert_eq!(
            resolve_input_delimiter(Path::new("report.tsv"), Some(b';')),
            b';'
        );
    }

    #[test]
    fn decoded_reader_strips_utf8_bom() {
        let bytes = b"\xef\xbb\xbfdate,website\n";
        let mut reader = decoded_reader(Cursor::new(bytes.to_vec()), UTF_8);
        let mut line = String::new();
        reader.read_line(&mut line).expect("read line");
        assert_eq!(line, "date,website\n");
    }

    #[test]
    fn unknown_encoding_label_is_rejected() {
        assert!(resolve_encoding(Some("not-a-charset")).is_err());
        assert_eq!(resolve_encoding(None).unwrap(), UTF_8);
        assert_eq!(resolve_encoding(Some("gbk")).unwrap().name(), "GBK");
    }
}
