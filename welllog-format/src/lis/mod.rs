//! LIS79 physical records.
//!
//! A physical record is a 4 byte header (`length: u16 BE`, `attributes: u16 BE`),
//! the logical data it carries and an optional trailer whose fields are
//! switched on by attribute bits. The first physical record of every logical
//! record starts with a 2 byte logical record header `(type, attributes)`.

use byteorder::{BigEndian, ByteOrder};

mod reader;
#[cfg(feature = "writer")]
mod writer;

pub use self::reader::{probe_padding, FrameReader};
#[cfg(feature = "writer")]
pub use self::writer::LisWriter;

pub const HEADER_LENGTH: u64 = 4;
pub const MAX_LENGTH: u64 = 0xFFFF;
pub const LOGICAL_HEADER_LENGTH: u64 = 2;

pub mod constants {
    pub const SUCCESSOR: u16 = 1 << 0;
    pub const PREDECESSOR: u16 = 1 << 1;
    pub const CHECKSUM_ERROR: u16 = 1 << 5;
    pub const PARITY_ERROR: u16 = 1 << 6;
    pub const RECORD_NUMBER: u16 = 1 << 9;
    pub const FILE_NUMBER: u16 = 1 << 10;
    pub const CHECKSUM: u16 = 1 << 12;
    pub const CHECKSUM_UNDEFINED: u16 = 1 << 13;
    pub const TYPE_ONE: u16 = 1 << 14;
}

use self::constants::*;

#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub struct Attributes(pub u16);

impl Attributes {
    #[inline(always)]
    fn has(self, bit: u16) -> bool {
        self.0 & bit != 0
    }

    #[inline(always)]
    pub fn has_successor(self) -> bool {
        self.has(SUCCESSOR)
    }

    #[inline(always)]
    pub fn has_predecessor(self) -> bool {
        self.has(PREDECESSOR)
    }

    #[inline(always)]
    pub fn has_record_number(self) -> bool {
        self.has(RECORD_NUMBER)
    }

    #[inline(always)]
    pub fn has_file_number(self) -> bool {
        self.has(FILE_NUMBER)
    }

    #[inline(always)]
    pub fn has_checksum(self) -> bool {
        self.has(CHECKSUM)
    }

    #[inline(always)]
    pub fn checksum_undefined(self) -> bool {
        self.has(CHECKSUM_UNDEFINED)
    }

    #[inline(always)]
    pub fn is_type_one(self) -> bool {
        self.has(TYPE_ONE)
    }

    /// Error flags left by an earlier reader of the tape.
    #[inline(always)]
    pub fn previous_errors(self) -> bool {
        self.has(CHECKSUM_ERROR) || self.has(PARITY_ERROR)
    }

    pub fn trailer_length(self) -> u64 {
        [self.has_record_number(), self.has_file_number(), self.has_checksum()]
            .iter()
            .filter(|x| **x)
            .count() as u64
            * 2
    }

    pub fn continuation(mut self, is_first: bool, is_last: bool) -> Attributes {
        self.0 &= !(SUCCESSOR | PREDECESSOR);
        if !is_first {
            self.0 |= PREDECESSOR;
        }
        if !is_last {
            self.0 |= SUCCESSOR;
        }
        self
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct PhysicalRecordHeader {
    pub position: u64,
    pub length: u16,
    pub attributes: Attributes,
}

impl PhysicalRecordHeader {
    #[inline(always)]
    pub fn body_length(&self) -> u64 {
        u64::from(self.length).saturating_sub(HEADER_LENGTH)
    }

    /// Logical data length. Only meaningful once the header has been validated.
    #[inline(always)]
    pub fn payload_length(&self) -> u64 {
        self.body_length()
            .saturating_sub(self.attributes.trailer_length())
    }

    #[inline(always)]
    pub fn end(&self) -> u64 {
        self.position + u64::from(self.length)
    }

    pub fn to_bytes(&self) -> [u8; 4] {
        let mut buf = [0u8; 4];
        BigEndian::write_u16(&mut buf[0..2], self.length);
        BigEndian::write_u16(&mut buf[2..4], self.attributes.0);
        buf
    }
}

#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub struct Trailer {
    pub record_number: Option<i16>,
    pub file_number: Option<i16>,
    pub checksum: Option<u16>,
}

impl Trailer {
    /// Parses the trailer from the bytes following the payload.
    fn parse(attributes: Attributes, mut buf: &[u8]) -> Trailer {
        let mut take = |present: bool| {
            if present && buf.len() >= 2 {
                let value = BigEndian::read_u16(&buf[..2]);
                buf = &buf[2..];
                Some(value)
            } else {
                None
            }
        };

        let record_number = take(attributes.has_record_number()).map(|v| v as i16);
        let file_number = take(attributes.has_file_number()).map(|v| v as i16);
        let checksum = take(attributes.has_checksum());

        Trailer {
            record_number,
            file_number,
            checksum,
        }
    }
}

/// A physical record read in full.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Frame {
    pub header: PhysicalRecordHeader,
    /// Logical data, including the logical record header in a first frame.
    pub payload: Vec<u8>,
    pub trailer: Trailer,
}

/// Inter-record padding: after each physical record skip to the next
/// multiple of `modulo`, optionally insisting the skipped bytes are null.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub struct PaddingPolicy {
    pub modulo: u64,
    pub allow_non_null: bool,
}

impl PaddingPolicy {
    /// Bytes of padding that follow a record ending at `position`.
    #[inline(always)]
    pub fn padding_after(&self, position: u64) -> u64 {
        if self.modulo <= 1 {
            0
        } else {
            (self.modulo - position % self.modulo) % self.modulo
        }
    }
}

/// Whether four bytes could open a LIS file.
pub(crate) fn plausible_first_header(buf: &[u8]) -> bool {
    let length = u64::from(BigEndian::read_u16(&buf[0..2]));
    let attributes = Attributes(BigEndian::read_u16(&buf[2..4]));
    length >= HEADER_LENGTH + attributes.trailer_length() + LOGICAL_HEADER_LENGTH
        && !attributes.has_predecessor()
        && !attributes.is_type_one()
}
