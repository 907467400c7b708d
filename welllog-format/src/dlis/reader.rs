use std::io::{Read, Seek, SeekFrom};

use byteorder::{BigEndian, ByteOrder};

use super::{
    Segment, SegmentAttributes, SegmentHeader, VisibleRecordHeader, FORMAT_VERSION,
    MAX_VISIBLE_RECORD_LENGTH, MIN_VISIBLE_RECORD_LENGTH, SEGMENT_HEADER_LENGTH,
    VISIBLE_RECORD_HEADER_LENGTH,
};
use crate::{
    assemble::{Fragment, FrameEngine, ReadMode},
    checksum::{Checksum, Crc16},
    config::ReadOptions,
    error::{read_exact_at, read_full, Error, Result},
};

/// The RP66V1 visible record and segment state machine.
#[derive(Debug, Clone)]
pub struct SegmentReader {
    max_length: u64,
    checksum_enabled: bool,
    /// End of the visible record the next segment belongs to.
    visible_end: Option<u64>,
    end: Option<u64>,
}

impl SegmentReader {
    pub fn new(options: &ReadOptions) -> SegmentReader {
        SegmentReader {
            max_length: options.frame_limit(MAX_VISIBLE_RECORD_LENGTH),
            checksum_enabled: options.checksum_enabled,
            visible_end: None,
            end: None,
        }
    }

    fn stream_end<R: Seek>(&mut self, stream: &mut R) -> Result<u64> {
        if let Some(end) = self.end {
            return Ok(end);
        }
        let restore = stream.stream_position()?;
        let end = stream.seek(SeekFrom::End(0))?;
        stream.seek(SeekFrom::Start(restore))?;
        self.end = Some(end);
        Ok(end)
    }

    /// Reads a visible record header at the current position. `None` at end of stream.
    pub fn read_visible_record<R: Read + Seek>(
        &mut self,
        stream: &mut R,
    ) -> Result<Option<VisibleRecordHeader>> {
        let position = stream.stream_position()?;
        let mut buf = [0u8; 4];
        match read_full(stream, &mut buf)? {
            0 => return Ok(None),
            4 => {}
            got => {
                return Err(Error::Truncated {
                    what: "visible record header",
                    position,
                    got: got as u64,
                })
            }
        }

        let header = VisibleRecordHeader {
            position,
            length: BigEndian::read_u16(&buf[0..2]),
        };

        let length = u64::from(header.length);
        if length < MIN_VISIBLE_RECORD_LENGTH || length > self.max_length {
            return Err(Error::LengthOutOfRange {
                what: "visible record",
                position,
                length,
                min: MIN_VISIBLE_RECORD_LENGTH,
                max: self.max_length,
            });
        }
        if buf[2..4] != FORMAT_VERSION {
            return Err(Error::malformed(
                "visible record header",
                position,
                format!("format version {:02x}{:02x} is not ff01", buf[2], buf[3]),
            ));
        }

        tracing::debug!(
            position = format_args!("{:#x}", position),
            length,
            "read visible record header"
        );
        self.visible_end = Some(header.end());
        Ok(Some(header))
    }

    /// Reads the next segment header, crossing into the next visible record
    /// when the current one is used up. `None` at end of stream.
    fn next_segment_header<R: Read + Seek>(
        &mut self,
        stream: &mut R,
    ) -> Result<Option<SegmentHeader>> {
        let position = stream.stream_position()?;
        let inside = matches!(self.visible_end, Some(end) if position < end);
        if !inside && self.read_visible_record(stream)?.is_none() {
            return Ok(None);
        }
        let limit = self.visible_end.unwrap_or(0);
        self.read_segment_header(stream, limit).map(Some)
    }

    /// Reads and checks a segment header that must end by `limit`.
    fn read_segment_header<R: Read + Seek>(
        &mut self,
        stream: &mut R,
        limit: u64,
    ) -> Result<SegmentHeader> {
        let position = stream.stream_position()?;
        let mut buf = [0u8; 4];
        read_exact_at(stream, &mut buf, "logical record segment header", position)?;

        let header = SegmentHeader {
            position,
            length: BigEndian::read_u16(&buf[0..2]),
            attributes: SegmentAttributes(buf[2]),
            type_code: buf[3],
        };

        let length = u64::from(header.length);
        let min = SEGMENT_HEADER_LENGTH + header.attributes.trailer_length();
        let max = limit.saturating_sub(position);
        if length < min || length > max || length % 2 != 0 {
            return Err(Error::LengthOutOfRange {
                what: "logical record segment",
                position,
                length,
                min,
                max,
            });
        }

        tracing::debug!(
            position = format_args!("{:#x}", position),
            length,
            attributes = format_args!("{:#04x}", header.attributes.0),
            type_code = header.type_code,
            "read logical record segment header"
        );
        Ok(header)
    }

    /// Reads the next whole segment, moving through visible records as needed.
    pub fn read_segment<R: Read + Seek>(&mut self, stream: &mut R) -> Result<Option<Segment>> {
        match self.next_segment_header(stream)? {
            Some(header) => self.read_segment_body(stream, header).map(Some),
            None => Ok(None),
        }
    }

    fn read_segment_body<R: Read + Seek>(
        &mut self,
        stream: &mut R,
        header: SegmentHeader,
    ) -> Result<Segment> {
        let mut body = vec![0u8; (u64::from(header.length) - SEGMENT_HEADER_LENGTH) as usize];
        read_exact_at(stream, &mut body, "logical record segment", header.position)?;

        let attributes = header.attributes;
        let mut end = body.len();
        let trailing_length = if attributes.has_trailing_length() {
            end -= 2;
            Some(BigEndian::read_u16(&body[end..end + 2]))
        } else {
            None
        };
        let checksum = if attributes.has_checksum() {
            end -= 2;
            Some(BigEndian::read_u16(&body[end..end + 2]))
        } else {
            None
        };

        if let Some(trailing) = trailing_length {
            if trailing != header.length {
                return Err(Error::malformed(
                    "logical record segment",
                    header.position,
                    format!(
                        "trailing length {} disagrees with header length {}",
                        trailing, header.length
                    ),
                ));
            }
        }

        let pad = if end > 0 { body[end - 1] } else { 0 };
        let data_length = header.data_length(pad)?;
        body.truncate(data_length as usize);

        Ok(Segment {
            header,
            payload: body,
            checksum,
            trailing_length,
        })
    }

    fn read_fragment<R: Read + Seek>(
        &mut self,
        stream: &mut R,
        header: SegmentHeader,
        mode: ReadMode,
    ) -> Result<Fragment> {
        match mode {
            ReadMode::Payload => {
                let segment = self.read_segment_body(stream, header)?;
                let mut fragment = fragment_shell(&header, segment.payload.len() as u64);
                if header.attributes.is_last() {
                    fragment.record_checksum = segment.checksum;
                }
                fragment.payload = Some(segment.payload);
                Ok(fragment)
            }
            ReadMode::Metadata => {
                let end = self.stream_end(stream)?;
                if header.end() > end {
                    return Err(Error::Truncated {
                        what: "logical record segment",
                        position: header.position,
                        got: end - header.position,
                    });
                }

                let mut pad = 0;
                if header.attributes.strips_padding() && header.padded_data_length() > 0 {
                    let at = header.position + SEGMENT_HEADER_LENGTH + header.padded_data_length() - 1;
                    stream.seek(SeekFrom::Start(at))?;
                    let mut buf = [0u8; 1];
                    read_exact_at(stream, &mut buf, "logical record segment", header.position)?;
                    pad = buf[0];
                }
                let data_length = header.data_length(pad)?;

                stream.seek(SeekFrom::Start(header.end()))?;
                Ok(fragment_shell(&header, data_length))
            }
        }
    }
}

fn fragment_shell(header: &SegmentHeader, data_length: u64) -> Fragment {
    Fragment {
        position: header.position,
        type_code: Some(header.type_code),
        explicit: header.attributes.is_explicit(),
        first: header.attributes.is_first(),
        last: header.attributes.is_last(),
        data_position: header.position + SEGMENT_HEADER_LENGTH,
        data_length,
        payload: None,
        record_checksum: None,
        checked_whole: false,
    }
}

impl FrameEngine for SegmentReader {
    fn next_fragment<R: Read + Seek>(
        &mut self,
        stream: &mut R,
        mode: ReadMode,
    ) -> Result<Option<Fragment>> {
        match self.next_segment_header(stream)? {
            Some(header) => self.read_fragment(stream, header, mode).map(Some),
            None => Ok(None),
        }
    }

    /// The enclosing visible record is unknown here, so the segment is only
    /// bounded by the largest visible record body.
    fn fragment_at<R: Read + Seek>(
        &mut self,
        stream: &mut R,
        position: u64,
        mode: ReadMode,
    ) -> Result<Fragment> {
        stream.seek(SeekFrom::Start(position))?;
        let limit = position + self.max_length - VISIBLE_RECORD_HEADER_LENGTH;
        let header = self.read_segment_header(stream, limit)?;
        self.read_fragment(stream, header, mode)
    }

    fn restart<R: Read + Seek>(&mut self, stream: &mut R, position: u64) -> Result<()> {
        self.visible_end = None;
        self.end = None;
        stream.seek(SeekFrom::Start(position))?;
        Ok(())
    }

    fn check_record(&self, last: &Fragment, payload: &[u8]) -> Result<()> {
        let stored = match last.record_checksum {
            Some(stored) if self.checksum_enabled => stored,
            _ => return Ok(()),
        };
        let computed = Crc16::compute(payload);
        if computed != stored {
            return Err(Error::ChecksumMismatch {
                position: last.position,
                stored,
                computed,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dlis::constants::*;
    use std::io::Cursor;

    fn segment(attributes: u8, type_code: u8, data: &[u8], trailer: &[u8]) -> Vec<u8> {
        let length = 4 + data.len() + trailer.len();
        let mut out = vec![];
        out.extend_from_slice(&(length as u16).to_be_bytes());
        out.push(attributes);
        out.push(type_code);
        out.extend_from_slice(data);
        out.extend_from_slice(trailer);
        out
    }

    fn visible(segments: &[Vec<u8>]) -> Vec<u8> {
        let body: Vec<u8> = segments.concat();
        let mut out = vec![];
        out.extend_from_slice(&(body.len() as u16 + 4).to_be_bytes());
        out.extend_from_slice(&FORMAT_VERSION);
        out.extend(body);
        out
    }

    #[test]
    fn segments_span_visible_records() {
        let mut bytes = visible(&[
            segment(EXPLICIT, 3, b"0123456789ab", &[]),
            segment(EXPLICIT | SUCCESSOR, 3, b"cdefghijklmn", &[]),
        ]);
        bytes.extend(visible(&[segment(EXPLICIT | PREDECESSOR, 3, b"opqrstuvwxyz", &[])]));

        let mut reader = SegmentReader::new(&ReadOptions::default());
        let mut stream = Cursor::new(bytes);
        let a = reader.read_segment(&mut stream).unwrap().unwrap();
        let b = reader.read_segment(&mut stream).unwrap().unwrap();
        let c = reader.read_segment(&mut stream).unwrap().unwrap();
        assert!(reader.read_segment(&mut stream).unwrap().is_none());

        assert_eq!(a.header.position, 4);
        assert!(a.header.attributes.is_first() && a.header.attributes.is_last());
        assert_eq!(b.header.position, 20);
        assert_eq!(c.header.position, 40);
        assert!(!c.header.attributes.is_first() && c.header.attributes.is_last());
        assert_eq!(c.payload, b"opqrstuvwxyz");
    }

    #[test]
    fn padding_and_trailers_are_removed() {
        let flags = PADDING | CHECKSUM | TRAILING_LENGTH;
        let bytes = visible(&[segment(flags, 0, b"data\0\0\0\x04", &[0x12, 0x34, 0, 16])]);

        let mut reader = SegmentReader::new(&ReadOptions::default());
        let segment = reader.read_segment(&mut Cursor::new(bytes.clone())).unwrap().unwrap();
        assert_eq!(segment.payload, b"data");
        assert_eq!(segment.checksum, Some(0x1234));
        assert_eq!(segment.trailing_length, Some(16));

        let mut reader = SegmentReader::new(&ReadOptions::default());
        let fragment = reader
            .next_fragment(&mut Cursor::new(bytes), ReadMode::Metadata)
            .unwrap()
            .unwrap();
        assert_eq!(fragment.data_length, 4);
        assert_eq!(fragment.data_position, 8);
        assert!(fragment.payload.is_none());
    }

    #[test]
    fn encrypted_segments_keep_their_padding() {
        let bytes = visible(&[segment(ENCRYPTED | PADDING, 0, b"secretxxxx\x02\x02", &[])]);
        let mut reader = SegmentReader::new(&ReadOptions::default());
        let segment = reader.read_segment(&mut Cursor::new(bytes)).unwrap().unwrap();
        assert_eq!(segment.payload.len(), 12);
    }

    #[test]
    fn trailing_length_mismatch_is_malformed() {
        let bytes = visible(&[segment(TRAILING_LENGTH, 0, b"0123456789", &[0, 18])]);
        let mut reader = SegmentReader::new(&ReadOptions::default());
        let err = reader.read_segment(&mut Cursor::new(bytes)).unwrap_err();
        assert!(matches!(err, Error::Malformed { position: 4, .. }));
    }

    #[test]
    fn segment_must_fit_its_visible_record() {
        let mut bytes = visible(&[segment(0, 0, b"0123456789ab", &[])]);
        // Claim 18 bytes for a 16 byte segment.
        bytes[5] = 18;
        let mut reader = SegmentReader::new(&ReadOptions::default());
        let err = reader.read_segment(&mut Cursor::new(bytes)).unwrap_err();
        assert!(matches!(err, Error::LengthOutOfRange { length: 18, max: 16, .. }));
    }

    #[test]
    fn odd_segment_length_is_rejected() {
        let bytes = visible(&[segment(0, 0, b"0123456789a", &[]), vec![0]]);
        let mut reader = SegmentReader::new(&ReadOptions::default());
        let err = reader.read_segment(&mut Cursor::new(bytes)).unwrap_err();
        assert!(matches!(err, Error::LengthOutOfRange { length: 15, .. }));
    }

    #[test]
    fn visible_record_bounds_and_version() {
        let mut reader = SegmentReader::new(&ReadOptions::default());
        let err = reader
            .read_visible_record(&mut Cursor::new(vec![0, 8, 0xFF, 0x01]))
            .unwrap_err();
        assert!(matches!(err, Error::LengthOutOfRange { length: 8, min: 20, .. }));

        let mut bytes = visible(&[segment(0, 0, b"0123456789ab", &[])]);
        bytes[3] = 0x02;
        let err = reader.read_visible_record(&mut Cursor::new(bytes)).unwrap_err();
        assert!(matches!(err, Error::Malformed { .. }));

        let err = reader
            .read_visible_record(&mut Cursor::new(vec![0, 20]))
            .unwrap_err();
        assert!(matches!(err, Error::Truncated { got: 2, .. }));
    }

    #[test]
    fn record_checksum_is_checked_against_the_payload() {
        let crc = Crc16::compute(b"0123456789").to_be_bytes();
        let bytes = visible(&[segment(CHECKSUM, 0, b"0123456789", &crc)]);

        let mut reader = SegmentReader::new(&ReadOptions::default());
        let fragment = reader
            .next_fragment(&mut Cursor::new(bytes), ReadMode::Payload)
            .unwrap()
            .unwrap();
        assert_eq!(fragment.record_checksum, Some(u16::from_be_bytes(crc)));
        assert!(reader.check_record(&fragment, b"0123456789").is_ok());
        assert!(matches!(
            reader.check_record(&fragment, b"0123456788"),
            Err(Error::ChecksumMismatch { position: 4, .. })
        ));

        let unchecked = SegmentReader::new(&ReadOptions::default().checksum_enabled(false));
        assert!(unchecked.check_record(&fragment, b"0123456788").is_ok());
    }

    #[test]
    fn fragment_at_reads_without_sequential_state() {
        let bytes = visible(&[
            segment(SUCCESSOR, 9, b"0123456789ab", &[]),
            segment(PREDECESSOR, 9, b"cdefghijklmn", &[]),
        ]);
        let mut reader = SegmentReader::new(&ReadOptions::default());
        let mut stream = Cursor::new(bytes);
        let second = reader.fragment_at(&mut stream, 20, ReadMode::Payload).unwrap();
        assert!(!second.first && second.last);
        assert_eq!(second.type_code, Some(9));
        assert_eq!(second.payload.unwrap(), b"cdefghijklmn");
    }
}
