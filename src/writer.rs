//! Writing MARC records in ISO 2709 binary format.
//!
//! Ingestion itself only reads records; the writer exists so fixtures and
//! sample batches can be produced from [`Record`] values.

use crate::error::{IngestError, Result};
use crate::leader::LEADER_LEN;
use crate::reader::{FIELD_TERMINATOR, RECORD_TERMINATOR, SUBFIELD_DELIMITER};
use crate::record::Record;
use std::io::Write;

/// Serialize one record to ISO 2709 bytes, computing the leader lengths.
///
/// # Errors
///
/// Returns an error if the record is too large for the five-digit lengths of
/// the leader and directory.
pub fn encode_record(record: &Record) -> Result<Vec<u8>> {
    let mut data_area = Vec::new();
    let mut directory = Vec::new();

    let mut push_entry = |tag: &str, bytes: &[u8], data_area: &mut Vec<u8>| -> Result<()> {
        if bytes.len() > 9_999 {
            return Err(IngestError::InvalidField(format!(
                "Field {tag} is {} bytes, the directory allows 9999",
                bytes.len()
            )));
        }
        directory.extend_from_slice(tag.as_bytes());
        directory.extend_from_slice(format!("{:04}", bytes.len()).as_bytes());
        directory.extend_from_slice(format!("{:05}", data_area.len()).as_bytes());
        data_area.extend_from_slice(bytes);
        Ok(())
    };

    for (tag, values) in &record.control_fields {
        for value in values {
            let mut bytes = value.as_bytes().to_vec();
            bytes.push(FIELD_TERMINATOR);
            push_entry(tag, &bytes, &mut data_area)?;
        }
    }

    for field in record.fields() {
        let mut bytes = Vec::new();
        let mut buf = [0u8; 4];
        bytes.extend_from_slice(field.indicator1.encode_utf8(&mut buf).as_bytes());
        bytes.extend_from_slice(field.indicator2.encode_utf8(&mut buf).as_bytes());
        for subfield in &field.subfields {
            bytes.push(SUBFIELD_DELIMITER);
            bytes.extend_from_slice(subfield.code.encode_utf8(&mut buf).as_bytes());
            bytes.extend_from_slice(subfield.value.as_bytes());
        }
        bytes.push(FIELD_TERMINATOR);
        push_entry(&field.tag, &bytes, &mut data_area)?;
    }

    directory.push(FIELD_TERMINATOR);

    let base_address = LEADER_LEN + directory.len();
    let record_length = base_address + data_area.len() + 1;
    let mut leader = record.leader.clone();
    leader.data_base_address = u32::try_from(base_address)
        .map_err(|_| IngestError::InvalidRecord("Directory too large".to_string()))?;
    leader.record_length = u32::try_from(record_length)
        .map_err(|_| IngestError::InvalidRecord("Record too large".to_string()))?;

    let mut out = leader.as_bytes()?;
    out.extend_from_slice(&directory);
    out.extend_from_slice(&data_area);
    out.push(RECORD_TERMINATOR);
    Ok(out)
}

/// Writer that appends ISO 2709 records to any [`std::io::Write`] destination.
#[derive(Debug)]
pub struct MarcWriter<W: Write> {
    writer: W,
    records_written: usize,
}

impl<W: Write> MarcWriter<W> {
    /// Create a new writer.
    pub fn new(writer: W) -> Self {
        MarcWriter {
            writer,
            records_written: 0,
        }
    }

    /// Write a single record.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be encoded or an I/O error occurs.
    pub fn write_record(&mut self, record: &Record) -> Result<()> {
        let bytes = encode_record(record)?;
        self.writer.write_all(&bytes)?;
        self.records_written += 1;
        Ok(())
    }

    /// Flush and return the underlying destination.
    ///
    /// # Errors
    ///
    /// Returns an error if flushing fails.
    pub fn finish(mut self) -> Result<W> {
        self.writer.flush()?;
        Ok(self.writer)
    }

    /// Number of records written so far.
    #[must_use]
    pub fn records_written(&self) -> usize {
        self.records_written
    }
}
