//! Offset index over the logical records of a file.
//!
//! Built in one metadata-only pass, then used to fetch any record or any byte
//! range of a record by replaying only the frames or segments it lives in.

use std::io::{Read, Seek, Write};

use serde::{Deserialize, Serialize};

use crate::{
    assemble::{Assembler, FrameEngine, ReadMode, ScanReport},
    error::{Anomaly, Error, FaultKind, Result},
    file::{reader::LogFile, Engine},
    record::RecordKind,
    Format,
};

pub const INDEX_VERSION: u32 = 1;

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub ordinal: usize,
    pub first_frame_offset: u64,
    pub type_code: u8,
    pub explicit: bool,
    pub total_payload_length: u64,
    pub source_positions: Vec<u64>,
}

impl IndexEntry {
    #[inline(always)]
    pub fn kind(&self, format: Format) -> RecordKind {
        RecordKind::new(format, self.type_code, self.explicit)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Index {
    version: u32,
    format: Format,
    /// Length of the unwrapped stream when the index was built.
    stream_length: u64,
    entries: Vec<IndexEntry>,
    anomalies: Vec<Anomaly>,
    partial: bool,
}

impl Index {
    /// Scans `file` once in metadata mode. Under keep-going, faults are kept
    /// as anomalies and the records before an unrecoverable one stay indexed.
    pub fn build<R: Read + Seek>(file: &mut LogFile<R>) -> Result<Index> {
        let stream_length = file.stream_length()?;
        let keep_going = file.options().keep_going;
        let mut assembler = file.assembler(ReadMode::Metadata)?;
        let mut report = ScanReport::default();
        let mut entries = vec![];

        while let Some(assembled) =
            assembler.next_recovering(file.stream_mut(), keep_going, &mut report)?
        {
            let layout = assembled.layout;
            entries.push(IndexEntry {
                ordinal: entries.len(),
                first_frame_offset: layout.source_positions[0],
                type_code: layout.type_code,
                explicit: layout.explicit,
                total_payload_length: layout.length,
                source_positions: layout.source_positions,
            });
        }

        tracing::debug!(
            records = entries.len(),
            anomalies = report.anomalies.len(),
            partial = report.partial,
            "built index"
        );

        Ok(Index {
            version: INDEX_VERSION,
            format: file.format(),
            stream_length,
            entries,
            anomalies: report.anomalies,
            partial: report.partial,
        })
    }

    #[inline(always)]
    pub fn format(&self) -> Format {
        self.format
    }

    #[inline(always)]
    pub fn stream_length(&self) -> u64 {
        self.stream_length
    }

    #[inline(always)]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[inline(always)]
    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    /// Faults recorded while building under keep-going.
    #[inline(always)]
    pub fn anomalies(&self) -> &[Anomaly] {
        &self.anomalies
    }

    /// The build stopped at an unrecoverable fault.
    #[inline(always)]
    pub fn is_partial(&self) -> bool {
        self.partial
    }

    #[inline(always)]
    pub fn get(&self, ordinal: usize) -> Option<&IndexEntry> {
        self.entries.get(ordinal)
    }

    fn check_format<R: Read + Seek>(&self, file: &LogFile<R>) -> Result<()> {
        if file.format() != self.format {
            return Err(Error::Config(format!(
                "index was built for a {} file, not {}",
                self.format,
                file.format()
            )));
        }
        Ok(())
    }

    /// Reads `length` bytes of record `ordinal` from `offset`, or to the end of
    /// the record for `None`. `None` if there is no such record.
    ///
    /// The record checksum is validated only when the whole payload is read.
    pub fn get_payload<R: Read + Seek>(
        &self,
        file: &mut LogFile<R>,
        ordinal: usize,
        offset: u64,
        length: Option<u64>,
    ) -> Result<Option<Vec<u8>>> {
        let entry = match self.get(ordinal) {
            Some(entry) => entry,
            None => return Ok(None),
        };
        self.check_format(file)?;

        let engine = Engine::new(file.format(), file.options());
        let mut assembler = Assembler::new(engine, ReadMode::Payload);
        assembler
            .read_range(file.stream_mut(), &entry.source_positions, offset, length)
            .map(Some)
    }

    /// Re-reads every stored position and reports where the file no longer
    /// matches the index.
    pub fn validate<R: Read + Seek>(&self, file: &mut LogFile<R>) -> Result<Vec<Anomaly>> {
        self.check_format(file)?;
        let mut anomalies = vec![];

        let length = file.stream_length()?;
        if length != self.stream_length {
            anomalies.push(Anomaly::new(
                FaultKind::StaleIndex,
                length.min(self.stream_length),
                format!(
                    "stream is {} bytes, index was built over {}",
                    length, self.stream_length
                ),
            ));
        }

        let mut engine = Engine::new(file.format(), file.options());
        for entry in self.entries.iter() {
            if let Some(anomaly) = validate_entry(&mut engine, file, entry)? {
                tracing::warn!(ordinal = entry.ordinal, anomaly = %anomaly, "stale index entry");
                anomalies.push(anomaly);
            }
        }

        Ok(anomalies)
    }

    pub fn save<W: Write>(&self, writer: W) -> Result<()> {
        serde_json::to_writer(writer, self).map_err(Error::Persist)
    }

    /// Loads a saved index. Pairing it with the right file is up to the caller;
    /// `validate` reports a mismatch.
    pub fn load<R: Read>(reader: R) -> Result<Index> {
        let index: Index = serde_json::from_reader(reader).map_err(Error::Persist)?;
        if index.version != INDEX_VERSION {
            return Err(Error::Config(format!(
                "index version {} is not supported",
                index.version
            )));
        }

        let ordered = index.entries.iter().enumerate().all(|(i, e)| e.ordinal == i)
            && index
                .entries
                .windows(2)
                .all(|w| w[0].first_frame_offset < w[1].first_frame_offset);
        if !ordered {
            return Err(Error::Config(
                "index entries are not in file order".into(),
            ));
        }
        Ok(index)
    }
}

fn validate_entry<R: Read + Seek>(
    engine: &mut Engine,
    file: &mut LogFile<R>,
    entry: &IndexEntry,
) -> Result<Option<Anomaly>> {
    let count = entry.source_positions.len();
    let mut total = 0;

    for (i, &position) in entry.source_positions.iter().enumerate() {
        let fragment = match engine.fragment_at(file.stream_mut(), position, ReadMode::Metadata) {
            Ok(fragment) => fragment,
            Err(Error::Io(e)) => return Err(Error::Io(e)),
            Err(e) => return Ok(Some(e.to_anomaly())),
        };

        if fragment.first != (i == 0) || fragment.last != (i + 1 == count) {
            return Ok(Some(Anomaly::new(
                FaultKind::StaleIndex,
                position,
                format!(
                    "record {} continuation flags changed at fragment {}",
                    entry.ordinal, i
                ),
            )));
        }

        if let Some(code) = fragment.type_code {
            if code != entry.type_code {
                return Ok(Some(Anomaly::new(
                    FaultKind::StaleIndex,
                    position,
                    format!(
                        "record {} type changed from {} to {}",
                        entry.ordinal, entry.type_code, code
                    ),
                )));
            }
        }

        total += fragment.data_length;
    }

    if total != entry.total_payload_length {
        return Ok(Some(Anomaly::new(
            FaultKind::StaleIndex,
            entry.first_frame_offset,
            format!(
                "record {} now holds {} bytes, index says {}",
                entry.ordinal, total, entry.total_payload_length
            ),
        )));
    }
    Ok(None)
}
