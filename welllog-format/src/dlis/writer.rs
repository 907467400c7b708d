use std::io::Write;

use byteorder::{BigEndian, WriteBytesExt};

use super::{
    constants::*, StorageUnitLabel, VisibleRecordHeader, LABEL_LENGTH, MAX_VISIBLE_RECORD_LENGTH,
    MIN_SEGMENT_LENGTH, MIN_VISIBLE_RECORD_LENGTH, SEGMENT_HEADER_LENGTH,
    VISIBLE_RECORD_HEADER_LENGTH,
};
use crate::{
    checksum::{Checksum, Crc16},
    config::WriteOptions,
    error::{Error, Result},
};

/// Writes logical records as RP66V1 segments packed into visible records.
///
/// The storage unit label is written on construction. Segments accumulate in
/// a visible record buffer that is flushed when the next segment no longer fits.
#[derive(Debug)]
pub struct DlisWriter<W: Write> {
    stream: W,
    options: WriteOptions,
    /// Segments of the visible record being filled.
    buffer: Vec<u8>,
    /// Offset of the visible record being filled.
    position: u64,
    finished: bool,
}

impl<W: Write> Drop for DlisWriter<W> {
    fn drop(&mut self) {
        let _ = self.finish_inner();
    }
}

/// Segment length after padding to an even length of at least 16 bytes.
#[inline(always)]
fn padded(length: u64) -> u64 {
    (length + length % 2).max(MIN_SEGMENT_LENGTH)
}

impl<W: Write> DlisWriter<W> {
    pub fn new(mut stream: W, options: WriteOptions) -> Result<DlisWriter<W>> {
        options.check_frame_length(MIN_VISIBLE_RECORD_LENGTH, MAX_VISIBLE_RECORD_LENGTH)?;
        if options.tif_markers {
            return Err(Error::Config(
                "TIF markers are only written around LIS files".into(),
            ));
        }

        let label = StorageUnitLabel::new(
            options.max_frame_length as u32,
            &options.storage_set_identifier,
        );
        stream.write_all(&label.to_bytes()?)?;
        tracing::debug!(
            max_record_length = label.max_record_length,
            "wrote storage unit label"
        );

        Ok(DlisWriter {
            stream,
            buffer: Vec::with_capacity(options.max_frame_length as usize),
            options,
            position: LABEL_LENGTH as u64,
            finished: false,
        })
    }

    /// Offset the next segment will be written at, or the next visible record
    /// header if the current one is empty.
    #[inline(always)]
    pub fn position(&self) -> u64 {
        self.position + VISIBLE_RECORD_HEADER_LENGTH + self.buffer.len() as u64
    }

    /// Free bytes left in the visible record being filled.
    #[inline(always)]
    fn space(&self) -> u64 {
        self.options.max_frame_length - VISIBLE_RECORD_HEADER_LENGTH - self.buffer.len() as u64
    }

    fn flush_visible_record(&mut self) -> Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }

        let header = VisibleRecordHeader {
            position: self.position,
            length: (VISIBLE_RECORD_HEADER_LENGTH + self.buffer.len() as u64) as u16,
        };
        self.stream.write_all(&header.to_bytes())?;
        self.stream.write_all(&self.buffer)?;

        tracing::debug!(
            position = format_args!("{:#x}", header.position),
            length = header.length,
            "wrote visible record"
        );

        self.position = header.end();
        self.buffer.clear();
        Ok(())
    }

    fn push_segment(
        &mut self,
        type_code: u8,
        mut attributes: u8,
        data: &[u8],
        checksum: Option<u16>,
    ) -> Result<u64> {
        let position = self.position();
        let trailer = (if checksum.is_some() { 2 } else { 0 })
            + (if self.options.trailing_length { 2 } else { 0 });
        let unpadded = SEGMENT_HEADER_LENGTH + data.len() as u64 + trailer;
        let length = padded(unpadded);
        let pad = length - unpadded;

        if pad > 0 {
            attributes |= PADDING;
        }
        if checksum.is_some() {
            attributes |= CHECKSUM;
        }
        if self.options.trailing_length {
            attributes |= TRAILING_LENGTH;
        }

        let segment = &mut self.buffer;
        segment.write_u16::<BigEndian>(length as u16)?;
        segment.push(attributes);
        segment.push(type_code);
        segment.extend_from_slice(data);
        if pad > 0 {
            segment.resize(segment.len() + pad as usize - 1, 0);
            segment.push(pad as u8);
        }
        if let Some(checksum) = checksum {
            segment.write_u16::<BigEndian>(checksum)?;
        }
        if self.options.trailing_length {
            segment.write_u16::<BigEndian>(length as u16)?;
        }

        tracing::debug!(
            position = format_args!("{:#x}", position),
            length,
            attributes = format_args!("{:#04x}", attributes),
            type_code,
            "wrote logical record segment"
        );
        Ok(position)
    }

    fn write_record(&mut self, type_code: u8, explicit: bool, payload: &[u8]) -> Result<u64> {
        let checksum = if self.options.checksum_enabled {
            Some(Crc16::compute(payload))
        } else {
            None
        };
        let trailing = if self.options.trailing_length { 2 } else { 0 };
        let last_trailer = trailing + if checksum.is_some() { 2 } else { 0 };

        let base = if explicit { EXPLICIT } else { 0 };
        let mut start = None;
        let mut offset = 0;

        loop {
            if self.space() < MIN_SEGMENT_LENGTH {
                self.flush_visible_record()?;
            }

            let space = self.space();
            let remaining = (payload.len() - offset) as u64;
            let mut attributes = base;
            if offset > 0 {
                attributes |= PREDECESSOR;
            }

            if padded(SEGMENT_HEADER_LENGTH + remaining + last_trailer) <= space {
                let position =
                    self.push_segment(type_code, attributes, &payload[offset..], checksum)?;
                return Ok(*start.get_or_insert(position));
            }

            // Keep at least one byte back so the record still has a last segment.
            let usable = space & !1;
            let take = (usable - SEGMENT_HEADER_LENGTH - trailing).min(remaining - 1) as usize;
            let chunk = &payload[offset..offset + take];
            let position = self.push_segment(type_code, attributes | SUCCESSOR, chunk, None)?;
            start.get_or_insert(position);
            offset += take;
        }
    }

    /// Writes an indirectly formatted logical record (IFLR). Returns the
    /// offset of its first segment.
    pub fn write_logical_record(&mut self, type_code: u8, payload: &[u8]) -> Result<u64> {
        self.write_record(type_code, false, payload)
    }

    /// Writes an explicitly formatted logical record (EFLR).
    pub fn write_explicit_record(&mut self, type_code: u8, payload: &[u8]) -> Result<u64> {
        self.write_record(type_code, true, payload)
    }

    #[inline(always)]
    fn finish_inner(&mut self) -> Result<u64> {
        if self.finished {
            return Ok(self.position);
        }
        self.finished = true;

        self.flush_visible_record()?;
        self.stream.flush()?;
        Ok(self.position)
    }

    /// Flushes the last visible record. Returns the length of the file.
    pub fn finish(mut self) -> Result<u64> {
        self.finish_inner()
    }
}
