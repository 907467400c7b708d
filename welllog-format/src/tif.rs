//! Tape Image Format markers.
//!
//! A TIF wrapped file interleaves 12 byte markers `(type, prev, next)` with
//! spans of the real file. `prev` is the offset of the previous marker and
//! `next` the offset of the following one; a pair of type 1 markers closes
//! the file.

use std::convert::TryFrom;
use std::io::{self, Read, Seek, SeekFrom, Write};

use byteorder::{BigEndian, ByteOrder, LittleEndian};

use crate::config::ReadOptions;
use crate::error::{read_full, Anomaly, Error, FaultKind, Result};

pub const MARKER_LENGTH: u64 = 12;
pub const MARKER_DATA: u32 = 0;
pub const MARKER_EOF: u32 = 1;

/// Markers are normally little-endian; some historical tools wrote them big-endian.
const PLAUSIBLE_SPAN: u32 = 0xFFFF + MARKER_LENGTH as u32;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum MarkerOrder {
    Little,
    Big,
}

impl Default for MarkerOrder {
    fn default() -> Self {
        MarkerOrder::Little
    }
}

impl MarkerOrder {
    #[inline(always)]
    fn read_u32(self, buf: &[u8]) -> u32 {
        match self {
            MarkerOrder::Little => LittleEndian::read_u32(buf),
            MarkerOrder::Big => BigEndian::read_u32(buf),
        }
    }

    #[inline(always)]
    fn write_u32(self, buf: &mut [u8], value: u32) {
        match self {
            MarkerOrder::Little => LittleEndian::write_u32(buf, value),
            MarkerOrder::Big => BigEndian::write_u32(buf, value),
        }
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct TifMarker {
    /// Offset of the marker itself in the wrapped stream.
    pub position: u64,
    pub kind: u32,
    pub prev: u32,
    pub next: u32,
}

impl TifMarker {
    fn parse(buf: &[u8; 12], order: MarkerOrder, position: u64) -> TifMarker {
        TifMarker {
            position,
            kind: order.read_u32(&buf[0..4]),
            prev: order.read_u32(&buf[4..8]),
            next: order.read_u32(&buf[8..12]),
        }
    }

    fn to_bytes(self, order: MarkerOrder) -> [u8; 12] {
        let mut buf = [0u8; 12];
        order.write_u32(&mut buf[0..4], self.kind);
        order.write_u32(&mut buf[4..8], self.prev);
        order.write_u32(&mut buf[8..12], self.next);
        buf
    }

    #[inline(always)]
    pub fn is_eof(&self) -> bool {
        self.kind == MARKER_EOF
    }

    /// Offset of the first byte following this marker.
    #[inline(always)]
    pub fn data_start(&self) -> u64 {
        self.position + MARKER_LENGTH
    }

    /// Number of payload bytes between this marker and the next.
    #[inline(always)]
    pub fn span_length(&self) -> u64 {
        u64::from(self.next).saturating_sub(self.data_start())
    }
}

/// Returns the marker byte order if the stream starts with a TIF data marker.
///
/// The stream position is restored afterwards.
pub fn detect_order<R: Read + Seek>(stream: &mut R) -> Result<Option<MarkerOrder>> {
    let restore = stream.stream_position()?;
    stream.seek(SeekFrom::Start(0))?;
    let mut buf = [0u8; 12];
    let got = read_full(stream, &mut buf)?;
    stream.seek(SeekFrom::Start(restore))?;

    if got < buf.len() {
        return Ok(None);
    }

    let little = TifMarker::parse(&buf, MarkerOrder::Little, 0);
    if little.kind != MARKER_DATA || little.prev != 0 {
        return Ok(None);
    }

    let big = TifMarker::parse(&buf, MarkerOrder::Big, 0);
    let order = if little.next > PLAUSIBLE_SPAN && big.next <= PLAUSIBLE_SPAN {
        MarkerOrder::Big
    } else {
        MarkerOrder::Little
    };

    tracing::debug!(order = ?order, "detected TIF markers");
    Ok(Some(order))
}

/// True if the stream starts with a TIF data marker with a zero back pointer.
pub fn detect<R: Read + Seek>(stream: &mut R) -> Result<bool> {
    detect_order(stream).map(|o| o.is_some())
}

/// Walks the marker chain from the start of a stream.
///
/// Single pass: iterating again requires a fresh call, which re-seeks to the start.
pub struct Markers<'a, R> {
    stream: &'a mut R,
    order: MarkerOrder,
    next: Option<u64>,
    end: u64,
    previous: Option<TifMarker>,
    anomalies: Vec<Anomaly>,
}

pub fn iterate_markers<R: Read + Seek>(stream: &mut R) -> Result<Markers<'_, R>> {
    let order = detect_order(stream)?.unwrap_or_default();
    iterate_markers_with_order(stream, order)
}

pub fn iterate_markers_with_order<R: Read + Seek>(
    stream: &mut R,
    order: MarkerOrder,
) -> Result<Markers<'_, R>> {
    let end = stream.seek(SeekFrom::End(0))?;
    stream.seek(SeekFrom::Start(0))?;
    Ok(Markers {
        stream,
        order,
        next: Some(0),
        end,
        previous: None,
        anomalies: vec![],
    })
}

impl<'a, R: Read + Seek> Markers<'a, R> {
    /// Back pointer mismatches seen so far.
    pub fn anomalies(&self) -> &[Anomaly] {
        &self.anomalies
    }

    pub fn into_anomalies(self) -> Vec<Anomaly> {
        self.anomalies
    }

    fn read_marker(&mut self, position: u64) -> Result<TifMarker> {
        self.stream.seek(SeekFrom::Start(position))?;
        let mut buf = [0u8; 12];
        let got = read_full(&mut *self.stream, &mut buf)?;
        if got < buf.len() {
            return Err(Error::Truncated {
                what: "TIF marker",
                position,
                got: got as u64,
            });
        }

        let marker = TifMarker::parse(&buf, self.order, position);
        if u64::from(marker.next) < marker.data_start() {
            return Err(Error::malformed(
                "TIF marker",
                position,
                format!("next offset {:#x} does not move forward", marker.next),
            ));
        }

        if let Some(previous) = self.previous {
            if u64::from(marker.prev) != previous.position {
                tracing::warn!(
                    position = format_args!("{:#x}", position),
                    prev = format_args!("{:#x}", marker.prev),
                    expected = format_args!("{:#x}", previous.position),
                    "TIF marker back pointer mismatch"
                );
                self.anomalies.push(Anomaly::new(
                    FaultKind::TifMarkerMismatch,
                    position,
                    format!(
                        "prev {:#x} does not match previous marker at {:#x}",
                        marker.prev, previous.position
                    ),
                ));
            }
        }

        tracing::debug!(
            position = format_args!("{:#x}", position),
            kind = marker.kind,
            prev = format_args!("{:#x}", marker.prev),
            next = format_args!("{:#x}", marker.next),
            "read TIF marker"
        );
        Ok(marker)
    }
}

impl<'a, R: Read + Seek> Iterator for Markers<'a, R> {
    type Item = Result<TifMarker>;

    fn next(&mut self) -> Option<Self::Item> {
        let position = self.next.take()?;
        if position == self.end {
            return None;
        }

        match self.read_marker(position) {
            Ok(marker) => {
                self.previous = Some(marker);
                self.next = Some(u64::from(marker.next));
                Some(Ok(marker))
            }
            Err(e) => Some(Err(e)),
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct StripReport {
    pub markers: usize,
    pub bytes_written: u64,
    pub anomalies: Vec<Anomaly>,
}

/// Copies the spans between markers to `output`, dropping the markers.
///
/// With no output the walk still happens and the report says what would have
/// been written. Input that is not TIF wrapped is left alone.
pub fn strip<R: Read + Seek, W: Write>(
    input: &mut R,
    mut output: Option<&mut W>,
) -> Result<StripReport> {
    let order = match detect_order(input)? {
        Some(order) => order,
        None => {
            tracing::warn!("stream is not TIF wrapped, nothing to strip");
            return Ok(StripReport::default());
        }
    };

    let (markers, anomalies) = collect_markers(input, order, false)?;
    let mut report = StripReport {
        markers: markers.len(),
        bytes_written: 0,
        anomalies,
    };

    for marker in markers.iter() {
        let length = marker.span_length();
        if let Some(out) = output.as_mut() {
            input.seek(SeekFrom::Start(marker.data_start()))?;
            let copied = io::copy(&mut (&mut *input).take(length), out)?;
            if copied < length {
                return Err(Error::Truncated {
                    what: "TIF span",
                    position: marker.data_start(),
                    got: copied,
                });
            }
        }
        report.bytes_written += length;
    }

    tracing::debug!(
        markers = report.markers,
        bytes = report.bytes_written,
        dry_run = output.is_none(),
        "stripped TIF markers"
    );
    Ok(report)
}

/// `strip` without an output.
pub fn dry_run<R: Read + Seek>(input: &mut R) -> Result<StripReport> {
    strip::<R, io::Sink>(input, None)
}

/// Walks the whole chain. With `keep_going` a framing fault ends the walk at
/// the last complete marker and is returned as an anomaly.
fn collect_markers<R: Read + Seek>(
    input: &mut R,
    order: MarkerOrder,
    keep_going: bool,
) -> Result<(Vec<TifMarker>, Vec<Anomaly>)> {
    let mut walk = iterate_markers_with_order(input, order)?;
    let mut markers = vec![];
    let mut cut = None;
    while let Some(marker) = walk.next() {
        match marker {
            Ok(marker) => markers.push(marker),
            Err(Error::Io(e)) => return Err(Error::Io(e)),
            Err(e) if keep_going => {
                tracing::warn!(error = %e, "TIF marker chain ends early");
                cut = Some(e.to_anomaly());
                break;
            }
            Err(e) => return Err(e),
        }
    }

    let mut anomalies = walk.into_anomalies();
    anomalies.extend(cut);
    Ok((markers, anomalies))
}

#[derive(Debug, Clone, Copy)]
struct Span {
    logical: u64,
    physical: u64,
    length: u64,
}

/// Presents the unwrapped content of a TIF file as a plain seekable stream.
///
/// Offsets seen through this adapter are offsets in the stripped file.
#[derive(Debug)]
pub struct TifStream<R> {
    inner: R,
    spans: Vec<Span>,
    length: u64,
    position: u64,
    physical: Option<u64>,
    markers: usize,
    anomalies: Vec<Anomaly>,
}

impl<R: Read + Seek> TifStream<R> {
    /// Maps the marker chain of `inner`.
    ///
    /// Under `keep_going` a chain cut short by a truncated file is mapped up
    /// to the cut, with the fault kept in `anomalies`. The last span is then
    /// clamped to the end of the stream, so the framing reader meets the
    /// truncation itself.
    pub fn new(mut inner: R, options: &ReadOptions) -> Result<TifStream<R>> {
        let order = detect_order(&mut inner)?
            .ok_or_else(|| Error::malformed("TIF marker", 0, "stream is not TIF wrapped"))?;
        let (markers, anomalies) = collect_markers(&mut inner, order, options.keep_going)?;
        let end = inner.seek(SeekFrom::End(0))?;

        let mut spans = Vec::with_capacity(markers.len());
        let mut logical = 0;
        for marker in markers.iter() {
            let length = marker
                .span_length()
                .min(end.saturating_sub(marker.data_start()));
            if length > 0 {
                spans.push(Span {
                    logical,
                    physical: marker.data_start(),
                    length,
                });
                logical += length;
            }
        }

        tracing::debug!(
            markers = markers.len(),
            spans = spans.len(),
            length = logical,
            "mapped TIF stream"
        );

        Ok(TifStream {
            inner,
            spans,
            length: logical,
            position: 0,
            physical: None,
            markers: markers.len(),
            anomalies,
        })
    }

    #[inline(always)]
    pub fn len(&self) -> u64 {
        self.length
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    #[inline(always)]
    pub fn marker_count(&self) -> usize {
        self.markers
    }

    pub fn anomalies(&self) -> &[Anomaly] {
        &self.anomalies
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read + Seek> Read for TifStream<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() || self.position >= self.length {
            return Ok(0);
        }

        let position = self.position;
        let index = self
            .spans
            .partition_point(|s| s.logical + s.length <= position);
        let span = match self.spans.get(index) {
            Some(span) => *span,
            None => return Ok(0),
        };

        let offset = position - span.logical;
        let available = (span.length - offset).min(buf.len() as u64) as usize;
        let target = span.physical + offset;
        if self.physical != Some(target) {
            self.inner.seek(SeekFrom::Start(target))?;
        }

        let n = self.inner.read(&mut buf[..available])?;
        self.position += n as u64;
        self.physical = Some(target + n as u64);
        Ok(n)
    }
}

impl<R: Read + Seek> Seek for TifStream<R> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(n) => Some(n),
            SeekFrom::End(d) => offset_by(self.length, d),
            SeekFrom::Current(d) => offset_by(self.position, d),
        };

        match target {
            Some(n) => {
                self.position = n;
                Ok(n)
            }
            None => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek to a negative position",
            )),
        }
    }
}

#[inline(always)]
fn offset_by(base: u64, delta: i64) -> Option<u64> {
    if delta >= 0 {
        base.checked_add(delta as u64)
    } else {
        base.checked_sub(delta.unsigned_abs())
    }
}

/// Emits TIF markers in front of spans written by the caller.
#[derive(Debug, Default, Clone)]
pub struct MarkerWriter {
    order: MarkerOrder,
    position: u64,
    previous: u64,
}

impl MarkerWriter {
    pub fn new() -> MarkerWriter {
        MarkerWriter::default()
    }

    pub fn with_order(order: MarkerOrder) -> MarkerWriter {
        MarkerWriter {
            order,
            ..MarkerWriter::default()
        }
    }

    /// Total bytes accounted for so far, markers and spans included.
    #[inline(always)]
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Writes the marker for a data span of `span_length` bytes. The caller writes the span.
    pub fn write_marker<W: Write>(&mut self, writer: &mut W, span_length: u64) -> Result<()> {
        self.write_kind(writer, MARKER_DATA, span_length)
    }

    /// Writes the closing pair of end-of-file markers.
    pub fn finish<W: Write>(&mut self, writer: &mut W) -> Result<()> {
        self.write_kind(writer, MARKER_EOF, 0)?;
        self.write_kind(writer, MARKER_EOF, 0)
    }

    fn write_kind<W: Write>(&mut self, writer: &mut W, kind: u32, span_length: u64) -> Result<()> {
        let next = self.position + MARKER_LENGTH + span_length;
        let to_u32 = |v: u64| {
            u32::try_from(v).map_err(|_| Error::Config("TIF offsets are limited to 4 GiB".into()))
        };

        let marker = TifMarker {
            position: self.position,
            kind,
            prev: to_u32(self.previous)?,
            next: to_u32(next)?,
        };
        writer.write_all(&marker.to_bytes(self.order))?;

        self.previous = self.position;
        self.position = next;
        Ok(())
    }
}
