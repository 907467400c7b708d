use std::fmt;
use std::io::{Read, Seek, SeekFrom};

use serde::{Deserialize, Serialize};

use crate::{dlis, error::read_full, error::Result, lis};

/// The two framing families handled by this crate.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum Format {
    /// LIS79 physical records.
    Lis,
    /// RP66V1 visible records and logical record segments.
    Dlis,
}

impl Format {
    /// Sniffs the format from the first bytes of a stream, restoring its position.
    pub fn detect<R: Read + Seek>(stream: &mut R) -> Result<Option<Format>> {
        let restore = stream.stream_position()?;
        stream.seek(SeekFrom::Start(0))?;
        let mut buf = [0u8; dlis::LABEL_LENGTH];
        let got = read_full(stream, &mut buf)?;
        stream.seek(SeekFrom::Start(restore))?;

        let format = if got == buf.len() && dlis::StorageUnitLabel::parse(&buf).is_ok() {
            Some(Format::Dlis)
        } else if got >= lis::HEADER_LENGTH as usize && lis::plausible_first_header(&buf[..4]) {
            Some(Format::Lis)
        } else {
            None
        };

        tracing::debug!(format = ?format, "detected format");
        Ok(format)
    }

    /// Offset of the first frame in an unwrapped stream.
    #[inline(always)]
    pub fn data_start(self) -> u64 {
        match self {
            Format::Lis => 0,
            Format::Dlis => dlis::LABEL_LENGTH as u64,
        }
    }

    /// Largest frame the format can express.
    #[inline(always)]
    pub fn max_frame_length(self) -> u64 {
        match self {
            Format::Lis => lis::MAX_LENGTH,
            Format::Dlis => dlis::MAX_VISIBLE_RECORD_LENGTH,
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Format::Lis => write!(f, "LIS"),
            Format::Dlis => write!(f, "RP66V1"),
        }
    }
}
