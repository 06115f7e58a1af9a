//! Reading MARC records from binary streams.
//!
//! This module provides [`MarcReader`] for reading ISO 2709 formatted MARC records
//! from any source that implements [`std::io::Read`]. It is the input side of a
//! batch: the reader yields [`Record`]s and the batch driver ingests them.
//!
//! # Examples
//!
//! ```no_run
//! use rdacore::MarcReader;
//!
//! let mut reader = MarcReader::open("records.mrc.gz")?;
//! while let Some(record) = reader.read_record()? {
//!     println!("Record type: {}", record.leader.record_type);
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use crate::error::{IngestError, Result};
use crate::leader::{Leader, LEADER_LEN};
use crate::record::{is_control_tag, Field, Record};
use flate2::read::MultiGzDecoder;
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;

pub(crate) const FIELD_TERMINATOR: u8 = 0x1E;
pub(crate) const SUBFIELD_DELIMITER: u8 = 0x1F;
pub(crate) const RECORD_TERMINATOR: u8 = 0x1D;

/// How the reader treats malformed input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecoveryMode {
    /// Any malformation is an error and ends the stream
    Strict,
    /// Malformed fields are skipped; a malformed record is reported and the
    /// reader resynchronizes on the next record terminator
    #[default]
    Lenient,
}

/// Reader for ISO 2709 binary MARC format.
///
/// Lenient by default: ingestion prefers salvaging a record with one bad field
/// over losing the record.
#[derive(Debug)]
pub struct MarcReader<R: Read> {
    reader: BufReader<R>,
    recovery_mode: RecoveryMode,
    records_read: usize,
    exhausted: bool,
}

impl MarcReader<Box<dyn Read + Send>> {
    /// Open a file of records, transparently decompressing `.gz` files.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let inner: Box<dyn Read + Send> = if path.extension().is_some_and(|ext| ext == "gz") {
            Box::new(MultiGzDecoder::new(file))
        } else {
            Box::new(file)
        };
        Ok(MarcReader::new(inner))
    }
}

impl<R: Read> MarcReader<R> {
    /// Create a new MARC reader.
    pub fn new(reader: R) -> Self {
        MarcReader {
            reader: BufReader::new(reader),
            recovery_mode: RecoveryMode::default(),
            records_read: 0,
            exhausted: false,
        }
    }

    /// Set the recovery mode for handling malformed records.
    #[must_use]
    pub fn with_recovery_mode(mut self, mode: RecoveryMode) -> Self {
        self.recovery_mode = mode;
        self
    }

    /// Number of records successfully read so far.
    #[must_use]
    pub fn records_read(&self) -> usize {
        self.records_read
    }

    /// Read a single MARC record.
    ///
    /// Returns `Ok(Some(record))` if a record was read, `Ok(None)` at EOF, or
    /// `Err` if the record could not be parsed. In lenient mode the reader has
    /// already skipped past the bad record when the error is returned.
    ///
    /// # Errors
    ///
    /// Returns an error if the leader or directory is malformed, the record is
    /// truncated, or an I/O error occurs.
    pub fn read_record(&mut self) -> Result<Option<Record>> {
        if self.exhausted {
            return Ok(None);
        }

        let mut leader_bytes = [0u8; LEADER_LEN];
        match self.reader.read_exact(&mut leader_bytes) {
            Ok(()) => {},
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                self.exhausted = true;
                return Ok(None);
            },
            Err(e) => {
                self.exhausted = true;
                return Err(IngestError::IoError(e));
            },
        }

        let leader = match Leader::from_bytes(&leader_bytes)
            .and_then(|leader| leader.validate_for_reading().map(|()| leader))
        {
            Ok(leader) => leader,
            Err(e) => return Err(self.resync(e)),
        };

        let mut record_data = vec![0u8; leader.record_length as usize - LEADER_LEN];
        match self.reader.read_exact(&mut record_data) {
            Ok(()) => {},
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                self.exhausted = true;
                return Err(IngestError::TruncatedRecord(
                    "Unexpected end of file while reading record data".to_string(),
                ));
            },
            Err(e) => {
                self.exhausted = true;
                return Err(IngestError::IoError(e));
            },
        }

        match self.parse_body(leader, &record_data) {
            Ok(record) => {
                self.records_read += 1;
                Ok(Some(record))
            },
            Err(e) => {
                if self.recovery_mode == RecoveryMode::Strict {
                    self.exhausted = true;
                }
                Err(e)
            },
        }
    }

    /// Skip to the byte after the next record terminator so the following
    /// call starts on a record boundary. Strict mode stops the stream instead.
    fn resync(&mut self, cause: IngestError) -> IngestError {
        if self.recovery_mode == RecoveryMode::Strict {
            self.exhausted = true;
            return cause;
        }
        let mut skipped = Vec::new();
        match self.reader.read_until(RECORD_TERMINATOR, &mut skipped) {
            Ok(0) => self.exhausted = true,
            Ok(n) => tracing::debug!(bytes = n + LEADER_LEN, "skipped unreadable record"),
            Err(e) => {
                self.exhausted = true;
                return IngestError::IoError(e);
            },
        }
        cause
    }

    fn parse_body(&self, leader: Leader, record_data: &[u8]) -> Result<Record> {
        let base = leader.data_base_address as usize - LEADER_LEN;
        let directory = &record_data[..base];
        let data = &record_data[base..];
        let strict = self.recovery_mode == RecoveryMode::Strict;

        let dir_end = memchr::memchr(FIELD_TERMINATOR, directory).unwrap_or(directory.len());
        if dir_end % 12 != 0 && strict {
            return Err(IngestError::InvalidRecord(
                "Incomplete directory entry".to_string(),
            ));
        }

        let mut record = Record::new(leader);
        for entry in directory[..dir_end].chunks_exact(12) {
            let tag = String::from_utf8_lossy(&entry[0..3]).to_string();
            let bounds = parse_digits(&entry[3..7])
                .and_then(|len| parse_digits(&entry[7..12]).map(|start| (start, start + len)));
            let (start, end) = match bounds {
                Ok((start, end)) if end <= data.len() => (start, end),
                Ok(_) if strict => {
                    return Err(IngestError::InvalidRecord(format!(
                        "Field {tag} exceeds data area"
                    )))
                },
                Err(e) if strict => return Err(e),
                _ => {
                    tracing::debug!(tag = %tag, "skipping unusable directory entry");
                    continue;
                },
            };

            let field_data = &data[start..end];
            if is_control_tag(&tag) {
                let value = field_data
                    .strip_suffix(&[FIELD_TERMINATOR])
                    .unwrap_or(field_data);
                record.add_control_field(tag, String::from_utf8_lossy(value).to_string());
                continue;
            }
            match parse_data_field(field_data, &tag) {
                Ok(field) => record.add_field(field),
                Err(e) if strict => {
                    return Err(IngestError::InvalidField(format!("Tag {tag}: {e}")));
                },
                Err(e) => tracing::debug!(tag = %tag, error = %e, "skipping malformed field"),
            }
        }
        Ok(record)
    }
}

impl<R: Read> Iterator for MarcReader<R> {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        self.read_record().transpose()
    }
}

/// Parse a data field from raw bytes
fn parse_data_field(data: &[u8], tag: &str) -> Result<Field> {
    if data.len() < 2 {
        return Err(IngestError::InvalidField(
            "Data field too short (needs indicators)".to_string(),
        ));
    }

    let mut field = Field::new(tag.to_string(), data[0] as char, data[1] as char);
    let body = &data[2..];
    let body = &body[..memchr::memchr(FIELD_TERMINATOR, body).unwrap_or(body.len())];
    if body.is_empty() {
        return Ok(field);
    }
    if body[0] != SUBFIELD_DELIMITER {
        return Err(IngestError::InvalidField(
            "Expected subfield delimiter".to_string(),
        ));
    }

    for chunk in body[1..].split(|&b| b == SUBFIELD_DELIMITER) {
        let Some((&code, value)) = chunk.split_first() else {
            continue;
        };
        field.add_subfield(code as char, String::from_utf8_lossy(value).to_string());
    }
    Ok(field)
}

/// Parse a fixed-width ASCII number from a directory entry
fn parse_digits(bytes: &[u8]) -> Result<usize> {
    let mut result = 0usize;
    for &byte in bytes {
        if !byte.is_ascii_digit() {
            return Err(IngestError::InvalidRecord(format!(
                "Invalid numeric field: expected digits, got byte {}",
                byte as char
            )));
        }
        result = result * 10 + (byte - b'0') as usize;
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::encode_record;
    use std::io::Cursor;

    fn sample_record(title: &str) -> Record {
        Record::builder(Leader::default())
            .control_field_str("001", "ocm12345")
            .control_field_str("008", "100803s20102009nyu")
            .field(
                Field::builder("245".to_string(), '1', '0')
                    .subfield_str('a', title)
                    .subfield_str('c', "by Someone.")
                    .build(),
            )
            .build()
    }

    #[test]
    fn test_read_simple_record() {
        let bytes = encode_record(&sample_record("Test title")).unwrap();
        let mut reader = MarcReader::new(Cursor::new(bytes));

        let record = reader.read_record().unwrap().unwrap();
        assert_eq!(record.control_number(), Some("ocm12345"));
        assert_eq!(record.get_control_field("008"), Some("100803s20102009nyu"));
        let field = record.get_field("245").unwrap();
        assert_eq!(field.indicator1, '1');
        assert_eq!(field.get_subfield('a'), Some("Test title"));
        assert_eq!(field.get_subfield('c'), Some("by Someone."));

        assert!(reader.read_record().unwrap().is_none());
        assert_eq!(reader.records_read(), 1);
    }

    #[test]
    fn test_iterates_multiple_records() {
        let mut bytes = encode_record(&sample_record("First")).unwrap();
        bytes.extend(encode_record(&sample_record("Second")).unwrap());

        let titles: Vec<String> = MarcReader::new(Cursor::new(bytes))
            .map(|r| r.unwrap().title().unwrap().to_string())
            .collect();
        assert_eq!(titles, vec!["First", "Second"]);
    }

    #[test]
    fn test_lenient_resyncs_after_bad_leader() {
        let mut bytes = b"garbage-not-a-leader!!!!xyz".to_vec();
        bytes.push(RECORD_TERMINATOR);
        bytes.extend(encode_record(&sample_record("Survivor")).unwrap());

        let results: Vec<_> = MarcReader::new(Cursor::new(bytes)).collect();
        assert_eq!(results.len(), 2);
        assert!(results[0].is_err());
        assert_eq!(
            results[1].as_ref().unwrap().title(),
            Some("Survivor")
        );
    }

    #[test]
    fn test_strict_stops_after_bad_leader() {
        let mut bytes = b"garbage-not-a-leader!!!!xyz".to_vec();
        bytes.push(RECORD_TERMINATOR);
        bytes.extend(encode_record(&sample_record("Lost")).unwrap());

        let mut reader =
            MarcReader::new(Cursor::new(bytes)).with_recovery_mode(RecoveryMode::Strict);
        assert!(reader.read_record().is_err());
        assert!(reader.read_record().unwrap().is_none());
    }

    #[test]
    fn test_truncated_record() {
        let bytes = encode_record(&sample_record("Cut short")).unwrap();
        let truncated = bytes[..bytes.len() - 10].to_vec();
        let mut reader = MarcReader::new(Cursor::new(truncated));
        assert!(matches!(
            reader.read_record(),
            Err(IngestError::TruncatedRecord(_))
        ));
    }

    #[test]
    fn test_parse_data_field_without_delimiter() {
        assert!(parse_data_field(b"10abc\x1e", "245").is_err());
        let field = parse_data_field(b"10\x1fa\x1fbvalue\x1e", "245").unwrap();
        assert_eq!(field.subfields.len(), 2);
        assert_eq!(field.get_subfield('a'), Some(""));
        assert_eq!(field.get_subfield('b'), Some("value"));
    }

    #[test]
    fn test_open_gzip_file() {
        use flate2::write::GzEncoder;
        use flate2::Compression;
        use std::io::Write;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("records.mrc.gz");
        let mut encoder = GzEncoder::new(File::create(&path).unwrap(), Compression::default());
        encoder
            .write_all(&encode_record(&sample_record("Zipped")).unwrap())
            .unwrap();
        encoder.finish().unwrap();

        let mut reader = MarcReader::open(&path).unwrap();
        let record = reader.read_record().unwrap().unwrap();
        assert_eq!(record.title(), Some("Zipped"));
    }
}
