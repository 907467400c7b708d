use std::borrow::Cow;
use std::io::Write;

use byteorder::{BigEndian, WriteBytesExt};

use super::{constants::*, Attributes, HEADER_LENGTH, LOGICAL_HEADER_LENGTH, MAX_LENGTH};
use crate::{
    checksum::{Checksum, LisChecksum},
    config::WriteOptions,
    error::{Error, Result},
    tif::MarkerWriter,
};

/// Writes logical records as LIS physical records.
#[derive(Debug)]
pub struct LisWriter<W: Write> {
    stream: W,
    options: WriteOptions,
    attributes: Attributes,
    markers: Option<MarkerWriter>,
    record_number: i16,
    position: u64,
    finished: bool,
}

impl<W: Write> Drop for LisWriter<W> {
    fn drop(&mut self) {
        let _ = self.finish_inner();
    }
}

impl<W: Write> LisWriter<W> {
    pub fn new(stream: W, options: WriteOptions) -> Result<LisWriter<W>> {
        let mut bits = 0;
        if options.record_numbers {
            bits |= RECORD_NUMBER;
        }
        if options.file_number.is_some() {
            bits |= FILE_NUMBER;
        }
        if options.checksum_enabled {
            bits |= CHECKSUM;
        }
        let attributes = Attributes(bits);

        options.check_frame_length(
            HEADER_LENGTH + attributes.trailer_length() + LOGICAL_HEADER_LENGTH,
            MAX_LENGTH,
        )?;

        Ok(LisWriter {
            stream,
            markers: if options.tif_markers {
                Some(MarkerWriter::new())
            } else {
                None
            },
            options,
            attributes,
            record_number: 0,
            position: 0,
            finished: false,
        })
    }

    /// Offset of the next physical record, ignoring any TIF markers.
    #[inline(always)]
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Logical data bytes that fit in one physical record.
    #[inline(always)]
    fn capacity(&self) -> u64 {
        self.options.max_frame_length - HEADER_LENGTH - self.attributes.trailer_length()
    }

    /// Writes one physical record carrying `chunk`, returning the bytes written
    /// including padding but not TIF markers.
    pub fn write_frame(&mut self, chunk: &[u8], is_first: bool, is_last: bool) -> Result<u64> {
        let attributes = self.attributes.continuation(is_first, is_last);
        let length = HEADER_LENGTH + chunk.len() as u64 + attributes.trailer_length();
        if length > self.options.max_frame_length {
            return Err(Error::Config(format!(
                "physical record of {} bytes exceeds max_frame_length {}",
                length, self.options.max_frame_length
            )));
        }

        let padding = self.options.padding_modulo;
        let mut frame = Vec::with_capacity(length as usize + padding as usize);
        frame.write_u16::<BigEndian>(length as u16)?;
        frame.write_u16::<BigEndian>(attributes.0)?;
        frame.extend_from_slice(chunk);

        if attributes.has_record_number() {
            frame.write_i16::<BigEndian>(self.record_number)?;
            self.record_number = self.record_number.wrapping_add(1);
        }
        if let Some(file_number) = self.options.file_number {
            frame.write_i16::<BigEndian>(file_number)?;
        }
        if attributes.has_checksum() {
            let checksum = LisChecksum::compute(&frame);
            frame.write_u16::<BigEndian>(checksum)?;
        }

        if padding > 1 {
            let pad = (padding - (self.position + length) % padding) % padding;
            frame.resize(frame.len() + pad as usize, 0);
        }

        if let Some(markers) = self.markers.as_mut() {
            markers.write_marker(&mut self.stream, frame.len() as u64)?;
        }
        self.stream.write_all(&frame)?;

        tracing::debug!(
            position = format_args!("{:#x}", self.position),
            length,
            attributes = format_args!("{:#06x}", attributes.0),
            "wrote physical record"
        );

        self.position += frame.len() as u64;
        Ok(frame.len() as u64)
    }

    /// Splits a logical record across as many physical records as it needs.
    /// Returns the offset of the first one.
    pub fn write_logical_record(&mut self, type_code: u8, payload: &[u8]) -> Result<u64> {
        let start = self.position;
        let capacity = self.capacity() as usize;
        let total = LOGICAL_HEADER_LENGTH as usize + payload.len();

        let mut offset = 0;
        loop {
            let take = capacity.min(total - offset);
            let chunk: Cow<[u8]> = if offset == 0 {
                let mut first = Vec::with_capacity(take);
                first.push(type_code);
                first.push(0);
                first.extend_from_slice(&payload[..take - LOGICAL_HEADER_LENGTH as usize]);
                Cow::Owned(first)
            } else {
                let from = offset - LOGICAL_HEADER_LENGTH as usize;
                Cow::Borrowed(&payload[from..from + take])
            };

            self.write_frame(&chunk, offset == 0, offset + take == total)?;
            offset += take;
            if offset == total {
                break;
            }
        }

        Ok(start)
    }

    #[inline(always)]
    fn finish_inner(&mut self) -> Result<u64> {
        if self.finished {
            return Ok(self.position);
        }
        self.finished = true;

        if let Some(markers) = self.markers.as_mut() {
            markers.finish(&mut self.stream)?;
        }
        self.stream.flush()?;
        Ok(self.position)
    }

    /// Closes the TIF wrapper, if any, and flushes. Returns the unwrapped length.
    pub fn finish(mut self) -> Result<u64> {
        self.finish_inner()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assemble::{FrameEngine, ReadMode};
    use crate::config::ReadOptions;
    use crate::lis::FrameReader;
    use std::io::Cursor;

    fn write(options: WriteOptions, records: &[(u8, Vec<u8>)]) -> Vec<u8> {
        let mut out = vec![];
        let mut writer = LisWriter::new(&mut out, options).unwrap();
        for (type_code, payload) in records {
            writer.write_logical_record(*type_code, payload).unwrap();
        }
        writer.finish().unwrap();
        out
    }

    #[test]
    fn long_record_splits_into_three_frames() {
        let payload: Vec<u8> = (0..2500u32).map(|i| (i % 251) as u8).collect();
        let bytes = write(WriteOptions::default().max_frame_length(1024), &[(0, payload.clone())]);

        let mut reader = FrameReader::new(&ReadOptions::default());
        let mut stream = Cursor::new(bytes);
        let mut frames = vec![];
        while let Some(frame) = reader.read_frame(&mut stream).unwrap() {
            frames.push(frame);
        }

        assert_eq!(frames.len(), 3);
        let bits: Vec<_> = frames
            .iter()
            .map(|f| (f.header.attributes.has_successor(), f.header.attributes.has_predecessor()))
            .collect();
        assert_eq!(bits, vec![(true, false), (true, true), (false, true)]);
        assert!(frames.iter().all(|f| u64::from(f.header.length) <= 1024));

        let joined: Vec<u8> = frames.iter().flat_map(|f| f.payload.clone()).collect();
        assert_eq!(&joined[..2], &[0, 0]);
        assert_eq!(&joined[2..], &payload[..]);
    }

    #[test]
    fn empty_payload_still_writes_a_frame() {
        let bytes = write(WriteOptions::default(), &[(129, vec![])]);
        assert_eq!(bytes, vec![0, 6, 0, 0, 129, 0]);
    }

    #[test]
    fn trailer_fields_are_written() {
        let options = WriteOptions::default()
            .max_frame_length(16)
            .record_numbers(true)
            .file_number(3)
            .checksum_enabled(true);
        let bytes = write(options, &[(34, b"abcdefgh".to_vec())]);

        let mut reader = FrameReader::new(&ReadOptions::default());
        let mut stream = Cursor::new(bytes);
        let first = reader.read_frame(&mut stream).unwrap().unwrap();
        let second = reader.read_frame(&mut stream).unwrap().unwrap();
        assert_eq!(first.trailer.record_number, Some(0));
        assert_eq!(second.trailer.record_number, Some(1));
        assert_eq!(second.trailer.file_number, Some(3));
        assert!(second.trailer.checksum.is_some());
        assert_eq!(first.payload, b"\x22\x00abcd");
        assert_eq!(second.payload, b"efgh");
    }

    #[test]
    fn padding_aligns_every_frame() {
        let options = WriteOptions::default().padding_modulo(4);
        let bytes = write(options, &[(1, b"a".to_vec()), (1, b"bcd".to_vec())]);
        assert_eq!(bytes.len(), 8 + 12);

        let mut reader = FrameReader::new(&ReadOptions::default().padding(4, false));
        let mut stream = Cursor::new(bytes);
        let a = reader.next_fragment(&mut stream, ReadMode::Payload).unwrap().unwrap();
        let b = reader.next_fragment(&mut stream, ReadMode::Payload).unwrap().unwrap();
        assert_eq!(a.payload.unwrap(), b"a");
        assert_eq!(b.position, 8);
        assert_eq!(b.payload.unwrap(), b"bcd");
    }

    #[test]
    fn too_small_frames_are_rejected() {
        let options = WriteOptions::default().max_frame_length(7).checksum_enabled(true);
        assert!(matches!(
            LisWriter::new(vec![], options),
            Err(Error::Config(_))
        ));
        let options = WriteOptions::default().max_frame_length(70_000);
        assert!(LisWriter::new(vec![], options).is_err());
    }
}
