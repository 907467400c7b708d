//! Reassembly of logical records from frames or segments.

use std::io::{Read, Seek, SeekFrom};

use crate::error::{read_exact_at, Anomaly, Error, Result};

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ReadMode {
    /// Headers only: lengths, flags, type codes and offsets.
    Metadata,
    /// Headers and payload bytes, with checksum validation.
    Payload,
}

/// One frame (LIS) or segment (RP66V1) as seen by the assembler.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Fragment {
    /// Offset of the frame or segment header.
    pub position: u64,
    /// Present on every RP66V1 segment and on the first LIS frame of a record.
    pub type_code: Option<u8>,
    pub explicit: bool,
    pub first: bool,
    pub last: bool,
    /// Offset and length of the logical payload bytes carried by this fragment.
    pub data_position: u64,
    pub data_length: u64,
    /// Filled in `ReadMode::Payload`.
    pub payload: Option<Vec<u8>>,
    /// Record level checksum carried by this fragment, read in `ReadMode::Payload`.
    pub record_checksum: Option<u16>,
    /// The fragment has an integrity check that needs the whole frame to be read.
    pub checked_whole: bool,
}

/// A per-format framing state machine.
pub trait FrameEngine {
    /// Reads the next fragment in stream order, `None` at a clean end of stream.
    fn next_fragment<R: Read + Seek>(
        &mut self,
        stream: &mut R,
        mode: ReadMode,
    ) -> Result<Option<Fragment>>;

    /// Reads the fragment whose header starts at `position`, ignoring sequential state.
    fn fragment_at<R: Read + Seek>(
        &mut self,
        stream: &mut R,
        position: u64,
        mode: ReadMode,
    ) -> Result<Fragment>;

    /// Resets sequential state and positions the stream at the first frame.
    fn restart<R: Read + Seek>(&mut self, stream: &mut R, position: u64) -> Result<()>;

    /// Steps back to a fragment already read from the current container.
    fn rewind<R: Read + Seek>(&mut self, stream: &mut R, position: u64) -> Result<()> {
        stream.seek(SeekFrom::Start(position))?;
        Ok(())
    }

    /// Checks record level integrity once a whole payload has been assembled.
    fn check_record(&self, _last: &Fragment, _payload: &[u8]) -> Result<()> {
        Ok(())
    }
}

/// Type and layout of an assembled record.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct RecordLayout {
    pub type_code: u8,
    pub explicit: bool,
    pub length: u64,
    pub source_positions: Vec<u64>,
}

#[derive(Debug, Clone)]
pub struct Assembled {
    pub layout: RecordLayout,
    /// Empty when assembled in `ReadMode::Metadata`.
    pub payload: Vec<u8>,
}

/// Faults recorded during a keep-going scan.
#[derive(Debug, Default, Clone)]
pub struct ScanReport {
    pub anomalies: Vec<Anomaly>,
    /// The scan stopped early at an unrecoverable fault.
    pub partial: bool,
}

impl ScanReport {
    fn record(&mut self, error: &Error) {
        tracing::warn!(error = %error, "skipping over framing fault");
        self.anomalies.push(error.to_anomaly());
    }
}

#[derive(Debug)]
pub struct Assembler<E> {
    engine: E,
    mode: ReadMode,
}

impl<E: FrameEngine> Assembler<E> {
    pub fn new(engine: E, mode: ReadMode) -> Assembler<E> {
        Assembler { engine, mode }
    }

    #[inline(always)]
    pub fn engine_mut(&mut self) -> &mut E {
        &mut self.engine
    }

    /// Assembles the next logical record, `None` at a clean end of stream.
    pub fn next_record<R: Read + Seek>(&mut self, stream: &mut R) -> Result<Option<Assembled>> {
        let mut fragment = match self.engine.next_fragment(stream, self.mode)? {
            Some(f) => f,
            None => return Ok(None),
        };

        if !fragment.first {
            return Err(Error::inconsistent(
                fragment.position,
                "logical record does not open with a first fragment",
            ));
        }

        let type_code = fragment.type_code.ok_or_else(|| {
            Error::malformed(
                "logical record",
                fragment.position,
                "first fragment carries no type code",
            )
        })?;

        let mut layout = RecordLayout {
            type_code,
            explicit: fragment.explicit,
            length: 0,
            source_positions: vec![],
        };
        let mut payload = vec![];

        loop {
            layout.source_positions.push(fragment.position);
            layout.length += fragment.data_length;
            if let Some(bytes) = fragment.payload.take() {
                if payload.is_empty() {
                    payload = bytes;
                } else {
                    payload.extend_from_slice(&bytes);
                }
            }

            if fragment.last {
                break;
            }

            let next = match self.engine.next_fragment(stream, self.mode)? {
                Some(f) => f,
                None => {
                    return Err(Error::Truncated {
                        what: "logical record",
                        position: layout.source_positions[0],
                        got: layout.length,
                    })
                }
            };

            if next.first {
                self.engine.rewind(stream, next.position)?;
                return Err(Error::inconsistent(
                    next.position,
                    "a new logical record began before the previous one ended",
                ));
            }

            if let Some(code) = next.type_code {
                if code != type_code {
                    return Err(Error::inconsistent(
                        next.position,
                        format!("type code changed from {} to {} mid-record", type_code, code),
                    ));
                }
            }

            fragment = next;
        }

        if self.mode == ReadMode::Payload {
            self.engine.check_record(&fragment, &payload)?;
        }

        tracing::debug!(
            start = format_args!("{:#x}", layout.source_positions[0]),
            type_code = layout.type_code,
            fragments = layout.source_positions.len(),
            bytes = layout.length,
            "assembled logical record"
        );

        Ok(Some(Assembled { layout, payload }))
    }

    /// As `next_record`, but under `keep_going` recoverable faults are recorded
    /// and skipped, and unrecoverable ones end the scan with `report.partial` set.
    ///
    /// Resynchronisation is best effort: it resumes at the next fragment that
    /// claims to open a record.
    pub fn next_recovering<R: Read + Seek>(
        &mut self,
        stream: &mut R,
        keep_going: bool,
        report: &mut ScanReport,
    ) -> Result<Option<Assembled>> {
        loop {
            let error = match self.next_record(stream) {
                Ok(record) => return Ok(record),
                Err(e) => e,
            };

            if !keep_going || matches!(error, Error::Io(_)) {
                return Err(error);
            }

            report.record(&error);
            if !error.is_recoverable() {
                report.partial = true;
                return Ok(None);
            }

            match self.resync(stream) {
                Ok(true) => continue,
                Ok(false) => return Ok(None),
                Err(Error::Io(e)) => return Err(Error::Io(e)),
                Err(e) => {
                    report.record(&e);
                    report.partial = true;
                    return Ok(None);
                }
            }
        }
    }

    /// Skips fragments until one opens a record and leaves the stream at it.
    fn resync<R: Read + Seek>(&mut self, stream: &mut R) -> Result<bool> {
        loop {
            match self.engine.next_fragment(stream, ReadMode::Metadata)? {
                None => return Ok(false),
                Some(f) if f.first => {
                    self.engine.rewind(stream, f.position)?;
                    return Ok(true);
                }
                Some(f) => {
                    tracing::warn!(
                        position = format_args!("{:#x}", f.position),
                        "discarding orphaned fragment"
                    );
                }
            }
        }
    }

    /// Replays the fragments at `positions` to produce `length` bytes of the
    /// logical payload starting at `offset`. `None` reads to the end.
    ///
    /// Only fragments overlapping the window are read. The record level
    /// checksum is validated only when the whole payload is requested.
    pub fn read_range<R: Read + Seek>(
        &mut self,
        stream: &mut R,
        positions: &[u64],
        offset: u64,
        length: Option<u64>,
    ) -> Result<Vec<u8>> {
        let whole = offset == 0 && length.is_none();
        let end = length.map(|l| offset.saturating_add(l));
        let mode = if whole {
            ReadMode::Payload
        } else {
            ReadMode::Metadata
        };

        let mut out = vec![];
        let mut cursor = 0u64;
        let mut last = None;

        for (i, &position) in positions.iter().enumerate() {
            if matches!(end, Some(end) if cursor >= end) {
                break;
            }

            let mut fragment = self.engine.fragment_at(stream, position, mode)?;
            if fragment.first != (i == 0) || fragment.last != (i + 1 == positions.len()) {
                return Err(Error::inconsistent(
                    position,
                    "stored positions no longer describe one logical record",
                ));
            }

            let fragment_end = cursor + fragment.data_length;
            if whole {
                if let Some(bytes) = fragment.payload.take() {
                    out.extend_from_slice(&bytes);
                }
            } else if fragment_end > offset {
                let from = offset.saturating_sub(cursor);
                let to = end.map_or(fragment.data_length, |e| {
                    (e - cursor).min(fragment.data_length)
                });

                if fragment.checked_whole {
                    let bytes = self
                        .engine
                        .fragment_at(stream, position, ReadMode::Payload)?
                        .payload
                        .unwrap_or_default();
                    out.extend_from_slice(&bytes[from as usize..to as usize]);
                } else {
                    let start = fragment.data_position + from;
                    stream.seek(SeekFrom::Start(start))?;
                    let mut buf = vec![0u8; (to - from) as usize];
                    read_exact_at(stream, &mut buf, "logical record payload", start)?;
                    out.extend_from_slice(&buf);
                }
            }

            cursor = fragment_end;
            last = Some(fragment);
        }

        if whole {
            if let Some(last) = last {
                self.engine.check_record(&last, &out)?;
            }
        }

        tracing::debug!(
            start = format_args!("{:#x}", positions.first().copied().unwrap_or(0)),
            offset,
            bytes = out.len(),
            "replayed logical record range"
        );
        Ok(out)
    }
}
