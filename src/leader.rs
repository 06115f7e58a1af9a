//! MARC record leader.
//!
//! The leader is the 24-byte fixed-length header at the start of every ISO 2709
//! record. Ingestion only needs the structural positions (record length and base
//! address of data) to walk the directory, plus the record type and bibliographic
//! level, which are kept for callers that want to filter the input stream.
//!
//! # Structure
//!
//! - Positions 0-4: Record length (5 digits)
//! - Position 5: Record status
//! - Position 6: Record type
//! - Position 7: Bibliographic level
//! - Positions 10-11: Indicator count, subfield code count
//! - Positions 12-16: Base address of data (5 digits)
//! - Positions 20-23: Entry map (usually "4500")

use crate::error::{IngestError, Result};
use serde::{Deserialize, Serialize};

/// Length of a leader in bytes.
pub const LEADER_LEN: usize = 24;

/// MARC Leader - 24 bytes at the start of every MARC record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Leader {
    /// Record length (5 digits) - positions 0-4
    pub record_length: u32,
    /// Record status - position 5
    pub record_status: char,
    /// Type of record - position 6
    pub record_type: char,
    /// Bibliographic level - position 7
    pub bibliographic_level: char,
    /// Base address of data (5 digits) - positions 12-16
    pub data_base_address: u32,
    /// Everything else, positions 8-11 and 17-23, kept verbatim
    pub implementation_defined: String,
}

impl Default for Leader {
    /// A leader for a new monograph with lengths still to be computed.
    fn default() -> Self {
        Leader {
            record_length: 0,
            record_status: 'n',
            record_type: 'a',
            bibliographic_level: 'm',
            data_base_address: 0,
            implementation_defined: " a22 i 4500".to_string(),
        }
    }
}

impl Leader {
    /// Parse a leader from the first 24 bytes of a record.
    ///
    /// # Errors
    ///
    /// Returns an error if fewer than 24 bytes are given or the numeric
    /// positions are not digits.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < LEADER_LEN {
            return Err(IngestError::InvalidLeader(format!(
                "Leader must be at least 24 bytes, got {}",
                bytes.len()
            )));
        }

        let mut implementation_defined = String::with_capacity(11);
        implementation_defined.push_str(&String::from_utf8_lossy(&bytes[8..12]));
        implementation_defined.push_str(&String::from_utf8_lossy(&bytes[17..24]));

        Ok(Leader {
            record_length: parse_digits(&bytes[0..5])?,
            record_status: bytes[5] as char,
            record_type: bytes[6] as char,
            bibliographic_level: bytes[7] as char,
            data_base_address: parse_digits(&bytes[12..17])?,
            implementation_defined,
        })
    }

    /// Check that the structural lengths can be used to walk the record.
    ///
    /// # Errors
    ///
    /// Returns an error if `record_length` or `data_base_address` is less than 24,
    /// or the base address points past the end of the record.
    pub fn validate_for_reading(&self) -> Result<()> {
        if self.record_length < 24 {
            return Err(IngestError::InvalidLeader(format!(
                "Record length must be at least 24, got {}",
                self.record_length
            )));
        }
        if self.data_base_address < 24 {
            return Err(IngestError::InvalidLeader(format!(
                "Base address of data must be at least 24, got {}",
                self.data_base_address
            )));
        }
        if self.data_base_address > self.record_length {
            return Err(IngestError::InvalidLeader(format!(
                "Base address of data {} exceeds record length {}",
                self.data_base_address, self.record_length
            )));
        }
        Ok(())
    }

    /// Serialize the leader to its 24-byte form.
    ///
    /// # Errors
    ///
    /// Returns an error if a length does not fit in five digits or the
    /// implementation-defined positions are not exactly 11 bytes.
    pub fn as_bytes(&self) -> Result<Vec<u8>> {
        if self.record_length > 99_999 || self.data_base_address > 99_999 {
            return Err(IngestError::InvalidLeader(
                "Lengths must fit in five digits".to_string(),
            ));
        }
        let rest = self.implementation_defined.as_bytes();
        if rest.len() != 11 {
            return Err(IngestError::InvalidLeader(format!(
                "Implementation-defined positions must be 11 bytes, got {}",
                rest.len()
            )));
        }

        let mut bytes = Vec::with_capacity(LEADER_LEN);
        bytes.extend_from_slice(format!("{:05}", self.record_length).as_bytes());
        bytes.push(self.record_status as u8);
        bytes.push(self.record_type as u8);
        bytes.push(self.bibliographic_level as u8);
        bytes.extend_from_slice(&rest[..4]);
        bytes.extend_from_slice(format!("{:05}", self.data_base_address).as_bytes());
        bytes.extend_from_slice(&rest[4..]);
        Ok(bytes)
    }
}

fn parse_digits(bytes: &[u8]) -> Result<u32> {
    let s = String::from_utf8_lossy(bytes);
    s.trim()
        .parse::<u32>()
        .map_err(|_| IngestError::InvalidLeader(format!("Invalid numeric field: '{s}'")))
}
