//! RP66V1 storage unit label, visible records and logical record segments.
//!
//! After the 80 byte label the file is a run of visible records, each a
//! 4 byte header (`length: u16 BE`, `0xFF`, `0x01`) followed by one or more
//! segments. A segment has its own 4 byte header (`length: u16 BE`,
//! `attributes`, `type`) and a body laid out as data, pad bytes, checksum and
//! trailing length, the last three present only when flagged.

use std::io::Read;

use byteorder::{BigEndian, ByteOrder};

use crate::error::{read_exact_at, Error, Result};

mod reader;
#[cfg(feature = "writer")]
mod writer;

pub use self::reader::SegmentReader;
#[cfg(feature = "writer")]
pub use self::writer::DlisWriter;

pub const LABEL_LENGTH: usize = 80;
pub const VISIBLE_RECORD_HEADER_LENGTH: u64 = 4;
pub const MIN_VISIBLE_RECORD_LENGTH: u64 = 20;
pub const MAX_VISIBLE_RECORD_LENGTH: u64 = 16384;
pub const FORMAT_VERSION: [u8; 2] = [0xFF, 0x01];
pub const SEGMENT_HEADER_LENGTH: u64 = 4;
pub const MIN_SEGMENT_LENGTH: u64 = 16;

pub mod constants {
    pub const EXPLICIT: u8 = 1 << 7;
    pub const PREDECESSOR: u8 = 1 << 6;
    pub const SUCCESSOR: u8 = 1 << 5;
    pub const ENCRYPTED: u8 = 1 << 4;
    pub const ENCRYPTION_PACKET: u8 = 1 << 3;
    pub const CHECKSUM: u8 = 1 << 2;
    pub const TRAILING_LENGTH: u8 = 1 << 1;
    pub const PADDING: u8 = 1 << 0;
}

use self::constants::*;

const VERSION_PREFIX: &[u8] = b"V1.";
const STRUCTURE: &[u8] = b"RECORD";

/// The label that opens every RP66V1 storage unit.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct StorageUnitLabel {
    pub sequence_number: u32,
    /// `V1.nn`
    pub version: String,
    pub structure: String,
    /// Zero when the writer left it undefined.
    pub max_record_length: u32,
    pub storage_set_identifier: String,
}

impl StorageUnitLabel {
    pub fn new(max_record_length: u32, storage_set_identifier: &str) -> StorageUnitLabel {
        StorageUnitLabel {
            sequence_number: 1,
            version: "V1.00".into(),
            structure: "RECORD".into(),
            max_record_length,
            storage_set_identifier: storage_set_identifier.into(),
        }
    }

    pub fn parse(buf: &[u8]) -> Result<StorageUnitLabel> {
        if buf.len() < LABEL_LENGTH {
            return Err(Error::Truncated {
                what: "storage unit label",
                position: 0,
                got: buf.len() as u64,
            });
        }

        let sequence_number = match parse_number(&buf[0..4]) {
            Some(n) if n > 0 => n,
            _ => return Err(label_error("sequence number is not a positive number")),
        };

        let version = &buf[4..9];
        if !version.starts_with(VERSION_PREFIX) || !version[3..].iter().all(u8::is_ascii_digit) {
            return Err(label_error("version is not V1.nn"));
        }

        if &buf[9..15] != STRUCTURE {
            return Err(label_error("storage unit structure is not RECORD"));
        }

        let max_record_length = parse_number(&buf[15..20])
            .ok_or_else(|| label_error("maximum record length is not a number"))?;

        Ok(StorageUnitLabel {
            sequence_number,
            version: String::from_utf8_lossy(version).into_owned(),
            structure: String::from_utf8_lossy(&buf[9..15]).into_owned(),
            max_record_length,
            storage_set_identifier: String::from_utf8_lossy(&buf[20..LABEL_LENGTH])
                .trim_end()
                .to_string(),
        })
    }

    /// Reads and parses the label at the current position.
    pub fn read<R: Read>(stream: &mut R) -> Result<StorageUnitLabel> {
        let mut buf = [0u8; LABEL_LENGTH];
        read_exact_at(stream, &mut buf, "storage unit label", 0)?;
        let label = StorageUnitLabel::parse(&buf)?;
        tracing::debug!(
            sequence_number = label.sequence_number,
            version = %label.version,
            max_record_length = label.max_record_length,
            "read storage unit label"
        );
        Ok(label)
    }

    /// Fails with `Error::Config` when a number does not fit its ASCII field.
    pub fn to_bytes(&self) -> Result<[u8; LABEL_LENGTH]> {
        if self.sequence_number == 0 || self.sequence_number > 9_999 {
            return Err(Error::Config(format!(
                "storage unit sequence number {} outside [1, 9999]",
                self.sequence_number
            )));
        }
        if self.max_record_length > 99_999 {
            return Err(Error::Config(format!(
                "maximum record length {} does not fit the storage unit label",
                self.max_record_length
            )));
        }

        let mut buf = [b' '; LABEL_LENGTH];
        let fixed = format!(
            "{:>4}{:<5.5}{:<6.6}{:>5}",
            self.sequence_number, self.version, self.structure, self.max_record_length
        );
        buf[..20].copy_from_slice(&fixed.as_bytes()[..20]);
        let identifier = self.storage_set_identifier.as_bytes();
        let n = identifier.len().min(LABEL_LENGTH - 20);
        buf[20..20 + n].copy_from_slice(&identifier[..n]);
        Ok(buf)
    }
}

fn label_error(reason: &str) -> Error {
    Error::malformed("storage unit label", 0, reason)
}

/// ASCII digits with leading spaces or zeros. All spaces reads as zero.
fn parse_number(field: &[u8]) -> Option<u32> {
    let mut value = 0u32;
    let mut digits = false;
    for &b in field {
        match b {
            b' ' if !digits => {}
            b'0'..=b'9' => {
                digits = true;
                value = value * 10 + u32::from(b - b'0');
            }
            _ => return None,
        }
    }
    Some(value)
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct VisibleRecordHeader {
    pub position: u64,
    pub length: u16,
}

impl VisibleRecordHeader {
    #[inline(always)]
    pub fn end(&self) -> u64 {
        self.position + u64::from(self.length)
    }

    pub fn to_bytes(&self) -> [u8; 4] {
        let mut buf = [0u8; 4];
        BigEndian::write_u16(&mut buf[0..2], self.length);
        buf[2..4].copy_from_slice(&FORMAT_VERSION);
        buf
    }
}

#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub struct SegmentAttributes(pub u8);

impl SegmentAttributes {
    #[inline(always)]
    fn has(self, bit: u8) -> bool {
        self.0 & bit != 0
    }

    #[inline(always)]
    pub fn is_explicit(self) -> bool {
        self.has(EXPLICIT)
    }

    #[inline(always)]
    pub fn is_first(self) -> bool {
        !self.has(PREDECESSOR)
    }

    #[inline(always)]
    pub fn is_last(self) -> bool {
        !self.has(SUCCESSOR)
    }

    #[inline(always)]
    pub fn is_encrypted(self) -> bool {
        self.has(ENCRYPTED)
    }

    #[inline(always)]
    pub fn has_encryption_packet(self) -> bool {
        self.has(ENCRYPTION_PACKET)
    }

    #[inline(always)]
    pub fn has_checksum(self) -> bool {
        self.has(CHECKSUM)
    }

    #[inline(always)]
    pub fn has_trailing_length(self) -> bool {
        self.has(TRAILING_LENGTH)
    }

    #[inline(always)]
    pub fn has_padding(self) -> bool {
        self.has(PADDING)
    }

    /// Checksum and trailing length bytes at the end of the segment.
    pub fn trailer_length(self) -> u64 {
        let mut n = 0;
        if self.has_checksum() {
            n += 2;
        }
        if self.has_trailing_length() {
            n += 2;
        }
        n
    }

    /// Whether pad bytes are removed from the data. Encrypted data keeps them.
    #[inline(always)]
    pub fn strips_padding(self) -> bool {
        self.has_padding() && !self.is_encrypted()
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct SegmentHeader {
    pub position: u64,
    pub length: u16,
    pub attributes: SegmentAttributes,
    pub type_code: u8,
}

impl SegmentHeader {
    #[inline(always)]
    pub fn end(&self) -> u64 {
        self.position + u64::from(self.length)
    }

    /// Bytes between the header and the trailer: data plus any padding.
    #[inline(always)]
    pub fn padded_data_length(&self) -> u64 {
        u64::from(self.length)
            .saturating_sub(SEGMENT_HEADER_LENGTH)
            .saturating_sub(self.attributes.trailer_length())
    }

    /// Data length once `pad` pad bytes are removed, checking the pad count fits.
    fn data_length(&self, pad: u8) -> Result<u64> {
        let padded = self.padded_data_length();
        if !self.attributes.strips_padding() {
            return Ok(padded);
        }
        let pad = u64::from(pad);
        if pad == 0 || pad > padded {
            return Err(Error::malformed(
                "logical record segment",
                self.position,
                format!("pad count {} does not fit in {} bytes", pad, padded),
            ));
        }
        Ok(padded - pad)
    }
}

/// A logical record segment read in full.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Segment {
    pub header: SegmentHeader,
    /// Data with pad bytes removed.
    pub payload: Vec<u8>,
    pub checksum: Option<u16>,
    pub trailing_length: Option<u16>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn label(text: &str) -> Vec<u8> {
        let mut buf = text.as_bytes().to_vec();
        buf.resize(LABEL_LENGTH, b' ');
        buf
    }

    #[test]
    fn parses_label_fields() {
        let sul = StorageUnitLabel::parse(&label("   1V1.00RECORD 8192Default Storage Set")).unwrap();
        assert_eq!(sul.sequence_number, 1);
        assert_eq!(sul.version, "V1.00");
        assert_eq!(sul.max_record_length, 8192);
        assert_eq!(sul.storage_set_identifier, "Default Storage Set");
    }

    #[test]
    fn label_numbers_may_contain_zeros() {
        let sul = StorageUnitLabel::parse(&label("0010V1.00RECORD16384")).unwrap();
        assert_eq!(sul.sequence_number, 10);
        assert_eq!(sul.max_record_length, 16384);
    }

    #[test]
    fn bad_labels_are_rejected() {
        assert!(StorageUnitLabel::parse(&label("   0V1.00RECORD 8192")).is_err());
        assert!(StorageUnitLabel::parse(&label("   1V2.00RECORD 8192")).is_err());
        assert!(StorageUnitLabel::parse(&label("   1V1.00STREAM 8192")).is_err());
        assert!(StorageUnitLabel::parse(&label("   1V1.00RECORD 81x2")).is_err());
        assert!(matches!(
            StorageUnitLabel::parse(b"   1V1.00"),
            Err(Error::Truncated { got: 9, .. })
        ));
    }

    #[test]
    fn label_survives_writing() {
        let sul = StorageUnitLabel::new(8192, "welllog");
        let bytes = sul.to_bytes().unwrap();
        assert_eq!(&bytes[..20], b"   1V1.00RECORD 8192");
        assert_eq!(StorageUnitLabel::parse(&bytes).unwrap(), sul);
    }

    #[test]
    fn label_numbers_must_fit_their_fields() {
        let mut sul = StorageUnitLabel::new(8192, "welllog");
        sul.sequence_number = 10_000;
        assert!(matches!(sul.to_bytes(), Err(Error::Config(_))));

        sul.sequence_number = 0;
        assert!(matches!(sul.to_bytes(), Err(Error::Config(_))));

        sul.sequence_number = 9_999;
        sul.max_record_length = 100_000;
        assert!(matches!(sul.to_bytes(), Err(Error::Config(_))));

        sul.max_record_length = 16_384;
        let bytes = sul.to_bytes().unwrap();
        assert_eq!(&bytes[..20], b"9999V1.00RECORD16384");
    }

    #[test]
    fn attribute_bits() {
        let a = SegmentAttributes(EXPLICIT | SUCCESSOR | CHECKSUM | TRAILING_LENGTH | PADDING);
        assert!(a.is_explicit() && a.is_first() && !a.is_last());
        assert_eq!(a.trailer_length(), 4);
        assert!(a.strips_padding());
        assert!(!SegmentAttributes(ENCRYPTED | PADDING).strips_padding());
    }

    #[test]
    fn pad_count_must_fit() {
        let header = SegmentHeader {
            position: 0,
            length: 16,
            attributes: SegmentAttributes(PADDING | TRAILING_LENGTH),
            type_code: 0,
        };
        assert_eq!(header.padded_data_length(), 10);
        assert_eq!(header.data_length(3).unwrap(), 7);
        assert!(header.data_length(0).is_err());
        assert!(header.data_length(11).is_err());
    }
}
