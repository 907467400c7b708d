use std::io::{Read, Seek, SeekFrom};

use byteorder::{BigEndian, ByteOrder};
use digest::Digest;

use super::{
    Attributes, Frame, PaddingPolicy, PhysicalRecordHeader, Trailer, HEADER_LENGTH,
    LOGICAL_HEADER_LENGTH, MAX_LENGTH,
};
use crate::{
    assemble::{Fragment, FrameEngine, ReadMode},
    checksum::{Checksum, LisChecksum},
    config::ReadOptions,
    error::{read_exact_at, read_full, Error, Result},
};

/// The LIS physical record state machine.
#[derive(Debug, Clone)]
pub struct FrameReader {
    max_length: u64,
    padding: PaddingPolicy,
    checksum_enabled: bool,
    keep_going: bool,
    previous_successor: bool,
    end: Option<u64>,
}

impl FrameReader {
    pub fn new(options: &ReadOptions) -> FrameReader {
        FrameReader {
            max_length: options.frame_limit(MAX_LENGTH),
            padding: PaddingPolicy {
                modulo: options.padding_modulo,
                allow_non_null: options.padding_allow_non_null,
            },
            checksum_enabled: options.checksum_enabled,
            keep_going: options.keep_going,
            previous_successor: false,
            end: None,
        }
    }

    #[inline(always)]
    pub fn padding(&self) -> PaddingPolicy {
        self.padding
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

    /// Reads and validates a header at the current position. `None` at end of stream.
    pub fn read_header<R: Read + Seek>(
        &mut self,
        stream: &mut R,
    ) -> Result<Option<PhysicalRecordHeader>> {
        let position = stream.stream_position()?;
        let mut buf = [0u8; 4];
        match read_full(stream, &mut buf)? {
            0 => return Ok(None),
            4 => {}
            got => {
                return Err(Error::Truncated {
                    what: "physical record header",
                    position,
                    got: got as u64,
                })
            }
        }

        let header = PhysicalRecordHeader {
            position,
            length: BigEndian::read_u16(&buf[0..2]),
            attributes: Attributes(BigEndian::read_u16(&buf[2..4])),
        };
        self.check_header(&header)?;

        tracing::debug!(
            position = format_args!("{:#x}", position),
            length = header.length,
            attributes = format_args!("{:#06x}", header.attributes.0),
            "read physical record header"
        );
        Ok(Some(header))
    }

    fn check_header(&self, header: &PhysicalRecordHeader) -> Result<()> {
        let length = u64::from(header.length);
        if length < HEADER_LENGTH || length > self.max_length {
            return Err(Error::LengthOutOfRange {
                what: "physical record",
                position: header.position,
                length,
                min: HEADER_LENGTH,
                max: self.max_length,
            });
        }

        let attributes = header.attributes;
        if attributes.trailer_length() > header.body_length() {
            return Err(Error::malformed(
                "physical record",
                header.position,
                format!(
                    "trailer of {} bytes does not fit in a record of {}",
                    attributes.trailer_length(),
                    length
                ),
            ));
        }

        if !self.keep_going {
            if attributes.is_type_one() {
                return Err(Error::malformed(
                    "physical record",
                    header.position,
                    "physical record type 1 is not supported",
                ));
            }
            if attributes.checksum_undefined() {
                return Err(Error::malformed(
                    "physical record",
                    header.position,
                    "checksum type is undefined",
                ));
            }
        }

        if attributes.previous_errors() {
            tracing::warn!(
                position = format_args!("{:#x}", header.position),
                "physical record flags an earlier checksum or parity error"
            );
        }
        Ok(())
    }

    fn note_continuity(&mut self, header: &PhysicalRecordHeader) {
        if header.attributes.has_predecessor() && !self.previous_successor {
            tracing::warn!(
                position = format_args!("{:#x}", header.position),
                "physical record has a predecessor but the previous record had no successor"
            );
        }
        self.previous_successor = header.attributes.has_successor();
    }

    fn skip_padding<R: Read + Seek>(&self, stream: &mut R) -> Result<()> {
        let position = stream.stream_position()?;
        let pad = self.padding.padding_after(position);
        if pad == 0 {
            return Ok(());
        }

        let mut buf = vec![0u8; pad as usize];
        let got = read_full(stream, &mut buf)?;
        if !self.padding.allow_non_null && buf[..got].iter().any(|b| *b != 0) {
            return Err(Error::malformed(
                "physical record padding",
                position,
                "padding contains non-null bytes",
            ));
        }
        Ok(())
    }

    /// Reads one whole physical record, validating its checksum when enabled.
    ///
    /// On a checksum mismatch the stream is still left at the next record.
    pub fn read_frame<R: Read + Seek>(&mut self, stream: &mut R) -> Result<Option<Frame>> {
        let header = match self.read_header(stream)? {
            Some(header) => header,
            None => return Ok(None),
        };

        let mut body = vec![0u8; header.body_length() as usize];
        read_exact_at(stream, &mut body, "physical record", header.position)?;
        let payload_length = header.payload_length() as usize;
        let trailer = Trailer::parse(header.attributes, &body[payload_length..]);

        let mismatch = match trailer.checksum {
            Some(stored) if self.checksum_enabled => {
                let mut checksum = LisChecksum::default();
                checksum.update(header.to_bytes());
                checksum.update(&body[..body.len() - 2]);
                let computed = checksum.value();
                if computed != stored {
                    Some(Error::ChecksumMismatch {
                        position: header.position,
                        stored,
                        computed,
                    })
                } else {
                    None
                }
            }
            _ => None,
        };

        self.note_continuity(&header);
        self.skip_padding(stream)?;
        if let Some(e) = mismatch {
            return Err(e);
        }

        body.truncate(payload_length);
        Ok(Some(Frame {
            header,
            payload: body,
            trailer,
        }))
    }

    fn read_fragment<R: Read + Seek>(
        &mut self,
        stream: &mut R,
        mode: ReadMode,
    ) -> Result<Option<Fragment>> {
        match mode {
            ReadMode::Payload => {
                let frame = match self.read_frame(stream)? {
                    Some(frame) => frame,
                    None => return Ok(None),
                };
                self.frame_to_fragment(frame).map(Some)
            }
            ReadMode::Metadata => {
                let header = match self.read_header(stream)? {
                    Some(header) => header,
                    None => return Ok(None),
                };

                let end = self.stream_end(stream)?;
                if header.end() > end {
                    return Err(Error::Truncated {
                        what: "physical record",
                        position: header.position,
                        got: end - header.position,
                    });
                }

                let mut fragment = self.fragment_shell(&header)?;
                if fragment.first {
                    let mut logical = [0u8; 2];
                    read_exact_at(stream, &mut logical, "logical record header", header.position)?;
                    fragment.type_code = Some(logical[0]);
                }

                stream.seek(SeekFrom::Start(header.end()))?;
                self.note_continuity(&header);
                self.skip_padding(stream)?;
                Ok(Some(fragment))
            }
        }
    }

    /// Fragment fields that follow from the header alone.
    fn fragment_shell(&self, header: &PhysicalRecordHeader) -> Result<Fragment> {
        let first = !header.attributes.has_predecessor();
        let mut data_position = header.position + HEADER_LENGTH;
        let mut data_length = header.payload_length();

        if first {
            if data_length < LOGICAL_HEADER_LENGTH {
                return Err(Error::malformed(
                    "physical record",
                    header.position,
                    "first physical record is too short for a logical record header",
                ));
            }
            data_position += LOGICAL_HEADER_LENGTH;
            data_length -= LOGICAL_HEADER_LENGTH;
        }

        Ok(Fragment {
            position: header.position,
            type_code: None,
            explicit: false,
            first,
            last: !header.attributes.has_successor(),
            data_position,
            data_length,
            payload: None,
            record_checksum: None,
            checked_whole: self.checksum_enabled && header.attributes.has_checksum(),
        })
    }

    fn frame_to_fragment(&self, frame: Frame) -> Result<Fragment> {
        let mut fragment = self.fragment_shell(&frame.header)?;
        let mut payload = frame.payload;
        if fragment.first {
            fragment.type_code = Some(payload[0]);
            payload.drain(..LOGICAL_HEADER_LENGTH as usize);
        }
        fragment.payload = Some(payload);
        Ok(fragment)
    }
}

impl FrameEngine for FrameReader {
    fn next_fragment<R: Read + Seek>(
        &mut self,
        stream: &mut R,
        mode: ReadMode,
    ) -> Result<Option<Fragment>> {
        self.read_fragment(stream, mode)
    }

    fn fragment_at<R: Read + Seek>(
        &mut self,
        stream: &mut R,
        position: u64,
        mode: ReadMode,
    ) -> Result<Fragment> {
        stream.seek(SeekFrom::Start(position))?;
        self.previous_successor = true;
        self.read_fragment(stream, mode)?.ok_or(Error::Truncated {
            what: "physical record header",
            position,
            got: 0,
        })
    }

    fn restart<R: Read + Seek>(&mut self, stream: &mut R, position: u64) -> Result<()> {
        self.previous_successor = false;
        self.end = None;
        stream.seek(SeekFrom::Start(position))?;
        Ok(())
    }
}

/// Finds the padding policy a LIS stream was written with.
///
/// Policies are tried in a fixed order and the first one under which the
/// first `limit` physical records (all of them for `None`) read cleanly wins.
pub fn probe_padding<R: Read + Seek>(
    stream: &mut R,
    start: u64,
    limit: Option<usize>,
) -> Result<Option<PaddingPolicy>> {
    for &allow_non_null in &[false, true] {
        for &modulo in &[0, 4, 2] {
            let options = ReadOptions::default().padding(modulo, allow_non_null);
            let mut reader = FrameReader::new(&options);
            reader.restart(stream, start)?;

            if scans_cleanly(&mut reader, stream, limit)? {
                tracing::debug!(modulo, allow_non_null, "probed physical record padding");
                return Ok(Some(reader.padding()));
            }
        }
    }
    Ok(None)
}

fn scans_cleanly<R: Read + Seek>(
    reader: &mut FrameReader,
    stream: &mut R,
    limit: Option<usize>,
) -> Result<bool> {
    let mut count = 0;
    loop {
        if matches!(limit, Some(limit) if count >= limit) {
            return Ok(true);
        }
        match reader.next_fragment(stream, ReadMode::Metadata) {
            Ok(Some(_)) => count += 1,
            Ok(None) => return Ok(true),
            Err(Error::Io(e)) => return Err(Error::Io(e)),
            Err(_) => return Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lis::constants::*;
    use std::io::Cursor;

    fn frame(attributes: u16, data: &[u8], trailer: &[u8]) -> Vec<u8> {
        let length = 4 + data.len() + trailer.len();
        let mut out = vec![];
        out.extend_from_slice(&(length as u16).to_be_bytes());
        out.extend_from_slice(&attributes.to_be_bytes());
        out.extend_from_slice(data);
        out.extend_from_slice(trailer);
        out
    }

    #[test]
    fn reads_frame_with_trailer() {
        let bytes = frame(RECORD_NUMBER | FILE_NUMBER, b"\x80\x00hello", &[0, 7, 0, 1]);
        let mut reader = FrameReader::new(&ReadOptions::default());
        let frame = reader.read_frame(&mut Cursor::new(bytes)).unwrap().unwrap();
        assert_eq!(frame.payload, b"\x80\x00hello");
        assert_eq!(frame.trailer.record_number, Some(7));
        assert_eq!(frame.trailer.file_number, Some(1));
        assert_eq!(frame.trailer.checksum, None);
    }

    #[test]
    fn metadata_fragment_skips_payload() {
        let mut bytes = frame(SUCCESSOR, b"\x22\x00abcd", &[]);
        bytes.extend(frame(PREDECESSOR, b"efg", &[]));
        let mut stream = Cursor::new(bytes);
        let mut reader = FrameReader::new(&ReadOptions::default());

        let first = reader
            .next_fragment(&mut stream, ReadMode::Metadata)
            .unwrap()
            .unwrap();
        assert_eq!(first.type_code, Some(0x22));
        assert!(first.first && !first.last);
        assert_eq!(first.data_position, 6);
        assert_eq!(first.data_length, 4);
        assert!(first.payload.is_none());

        let second = reader
            .next_fragment(&mut stream, ReadMode::Metadata)
            .unwrap()
            .unwrap();
        assert_eq!(second.position, 10);
        assert!(!second.first && second.last);
        assert_eq!(second.type_code, None);
        assert_eq!(second.data_length, 3);

        assert!(reader
            .next_fragment(&mut stream, ReadMode::Metadata)
            .unwrap()
            .is_none());
    }

    #[test]
    fn length_below_header_is_out_of_range() {
        let mut reader = FrameReader::new(&ReadOptions::default());
        let err = reader
            .read_frame(&mut Cursor::new(vec![0, 2, 0, 0]))
            .unwrap_err();
        assert!(matches!(err, Error::LengthOutOfRange { length: 2, .. }));
    }

    #[test]
    fn length_above_limit_is_out_of_range() {
        let bytes = frame(0, &[0u8; 60], &[]);
        let mut reader = FrameReader::new(&ReadOptions::default().max_frame_length(32));
        let err = reader.read_frame(&mut Cursor::new(bytes)).unwrap_err();
        assert!(matches!(err, Error::LengthOutOfRange { length: 64, max: 32, .. }));
    }

    #[test]
    fn trailer_longer_than_record_is_malformed() {
        let mut reader = FrameReader::new(&ReadOptions::default());
        let bytes = vec![0, 6, 0x16, 0x00, 0, 0];
        let err = reader.read_frame(&mut Cursor::new(bytes)).unwrap_err();
        assert!(matches!(err, Error::Malformed { .. }));
    }

    #[test]
    fn partial_header_is_truncated() {
        let mut reader = FrameReader::new(&ReadOptions::default());
        let err = reader.read_frame(&mut Cursor::new(vec![0, 9])).unwrap_err();
        assert!(matches!(err, Error::Truncated { got: 2, .. }));
    }

    #[test]
    fn short_body_is_truncated() {
        let mut bytes = frame(0, b"\x00\x00abcdef", &[]);
        bytes.truncate(7);
        let mut reader = FrameReader::new(&ReadOptions::default());
        let err = reader.read_frame(&mut Cursor::new(bytes.clone())).unwrap_err();
        assert!(matches!(err, Error::Truncated { position: 0, .. }));

        let err = reader
            .next_fragment(&mut Cursor::new(bytes), ReadMode::Metadata)
            .unwrap_err();
        assert!(matches!(err, Error::Truncated { position: 0, .. }));
    }

    #[test]
    fn type_one_records_need_keep_going() {
        let bytes = frame(TYPE_ONE, b"\x00\x00", &[]);
        let mut strict = FrameReader::new(&ReadOptions::default());
        assert!(strict.read_frame(&mut Cursor::new(bytes.clone())).is_err());

        let mut lenient = FrameReader::new(&ReadOptions::default().keep_going(true));
        assert!(lenient.read_frame(&mut Cursor::new(bytes)).unwrap().is_some());
    }

    #[test]
    fn checksum_mismatch_leaves_stream_at_next_record() {
        let mut first = frame(CHECKSUM, b"\x00\x00data", &[0, 0]);
        let len = first.len();
        let checksum = LisChecksum::compute(&first[..len - 2]);
        first[len - 2..].copy_from_slice(&checksum.to_be_bytes());
        first[6] ^= 0xFF;
        let mut bytes = first.clone();
        bytes.extend(frame(0, b"\x00\x00next", &[]));

        let mut stream = Cursor::new(bytes);
        let mut reader = FrameReader::new(&ReadOptions::default());
        let err = reader.read_frame(&mut stream).unwrap_err();
        assert!(matches!(err, Error::ChecksumMismatch { position: 0, .. }));
        assert_eq!(stream.position(), len as u64);
        let next = reader.read_frame(&mut stream).unwrap().unwrap();
        assert_eq!(next.payload, b"\x00\x00next");

        let mut unchecked = FrameReader::new(&ReadOptions::default().checksum_enabled(false));
        assert!(unchecked.read_frame(&mut Cursor::new(first)).is_ok());
    }

    #[test]
    fn null_padding_is_skipped() {
        let mut bytes = frame(0, b"\x00\x00a", &[]);
        bytes.push(0);
        bytes.extend(frame(0, b"\x00\x00bcde", &[]));

        let options = ReadOptions::default().padding(4, false);
        let mut reader = FrameReader::new(&options);
        let mut stream = Cursor::new(bytes);
        assert_eq!(reader.read_frame(&mut stream).unwrap().unwrap().payload, b"\x00\x00a");
        assert_eq!(reader.read_frame(&mut stream).unwrap().unwrap().payload, b"\x00\x00bcde");
    }

    #[test]
    fn non_null_padding_depends_on_policy() {
        let mut bytes = frame(0, b"\x00\x00a", &[]);
        bytes.push(0xAA);
        bytes.extend(frame(0, b"\x00\x00bcde", &[]));

        let mut strict = FrameReader::new(&ReadOptions::default().padding(4, false));
        let err = strict.read_frame(&mut Cursor::new(bytes.clone())).unwrap_err();
        assert!(matches!(err, Error::Malformed { position: 7, .. }));

        let mut lenient = FrameReader::new(&ReadOptions::default().padding(4, true));
        let mut stream = Cursor::new(bytes);
        lenient.read_frame(&mut stream).unwrap();
        assert_eq!(lenient.read_frame(&mut stream).unwrap().unwrap().payload, b"\x00\x00bcde");
    }

    #[test]
    fn probe_finds_padding() {
        let mut padded = frame(0, b"\x00\x00a", &[]);
        padded.push(0);
        padded.extend(frame(0, b"\x00\x00bcde", &[]));
        padded.extend(&[0, 0]);
        padded.extend(frame(0, b"\x00\x00fg", &[]));

        let policy = probe_padding(&mut Cursor::new(padded), 0, None).unwrap();
        assert_eq!(
            policy,
            Some(PaddingPolicy {
                modulo: 4,
                allow_non_null: false
            })
        );

        let mut plain = frame(0, b"\x00\x00a", &[]);
        plain.extend(frame(0, b"\x00\x00bc", &[]));
        let policy = probe_padding(&mut Cursor::new(plain), 0, None).unwrap();
        assert_eq!(policy, Some(PaddingPolicy::default()));
    }
}
