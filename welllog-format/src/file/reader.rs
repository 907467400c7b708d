use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use super::{Engine, Source};
use crate::{
    assemble::{Assembler, Fragment, FrameEngine, ReadMode, ScanReport},
    config::ReadOptions,
    dlis::StorageUnitLabel,
    error::{Anomaly, Error, OpenError, Result},
    index::Index,
    lis::{self, PaddingPolicy},
    record::LogicalRecord,
    tif::{self, TifStream},
    Format,
};

/// An open LIS or RP66V1 file.
///
/// TIF markers are removed transparently, so every offset reported by the
/// handle, its records and its index is an offset in the unwrapped stream.
#[derive(Debug)]
pub struct LogFile<R> {
    stream: Source<R>,
    path: Option<PathBuf>,
    format: Format,
    options: ReadOptions,
    label: Option<StorageUnitLabel>,
}

impl LogFile<BufReader<File>> {
    /// Opens a file with default options, detecting TIF wrapping and the format.
    pub fn open<P: AsRef<Path>>(path: P) -> std::result::Result<Self, OpenError> {
        LogFile::open_with(path, ReadOptions::default())
    }

    pub fn open_with<P: AsRef<Path>>(
        path: P,
        options: ReadOptions,
    ) -> std::result::Result<Self, OpenError> {
        let path = path.as_ref();
        let file =
            File::open(path).map_err(|e| OpenError::ReadFailed(e, path.to_path_buf()))?;

        let mut f = match LogFile::sniff(BufReader::new(file), options) {
            Ok(Some(f)) => f,
            Ok(None) => return Err(OpenError::UnknownFormat(path.to_path_buf())),
            Err(Error::Io(e)) => return Err(OpenError::ReadFailed(e, path.to_path_buf())),
            Err(e) => return Err(OpenError::InvalidHeader(e, path.to_path_buf())),
        };
        f.path = Some(path.to_path_buf());
        Ok(f)
    }
}

impl<R: Read + Seek> LogFile<R> {
    /// Wraps an open stream, detecting TIF wrapping and the format.
    pub fn from_reader(reader: R, options: ReadOptions) -> Result<LogFile<R>> {
        LogFile::sniff(reader, options)?
            .ok_or_else(|| Error::malformed("file", 0, "neither a LIS nor an RP66V1 stream"))
    }

    /// Wraps an open stream of a known format. TIF wrapping is still detected.
    pub fn from_reader_as(reader: R, format: Format, options: ReadOptions) -> Result<LogFile<R>> {
        let stream = LogFile::unwrap_tif(reader, &options)?;
        LogFile::with_source(stream, format, options)
    }

    fn sniff(reader: R, options: ReadOptions) -> Result<Option<LogFile<R>>> {
        let mut stream = LogFile::unwrap_tif(reader, &options)?;
        match Format::detect(&mut stream)? {
            Some(format) => LogFile::with_source(stream, format, options).map(Some),
            None => Ok(None),
        }
    }

    fn unwrap_tif(mut reader: R, options: &ReadOptions) -> Result<Source<R>> {
        if tif::detect(&mut reader)? {
            Ok(Source::Tif(TifStream::new(reader, options)?))
        } else {
            Ok(Source::Plain(reader))
        }
    }

    fn with_source(mut stream: Source<R>, format: Format, options: ReadOptions) -> Result<LogFile<R>> {
        let label = match format {
            Format::Dlis => {
                stream.seek(SeekFrom::Start(0))?;
                Some(StorageUnitLabel::read(&mut stream)?)
            }
            Format::Lis => None,
        };

        tracing::debug!(
            format = %format,
            tif = stream.is_tif(),
            "opened log file"
        );

        Ok(LogFile {
            stream,
            path: None,
            format,
            options,
            label,
        })
    }

    #[inline(always)]
    pub fn format(&self) -> Format {
        self.format
    }

    #[inline(always)]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    #[inline(always)]
    pub fn options(&self) -> &ReadOptions {
        &self.options
    }

    /// The storage unit label of an RP66V1 file.
    #[inline(always)]
    pub fn label(&self) -> Option<&StorageUnitLabel> {
        self.label.as_ref()
    }

    #[inline(always)]
    pub fn is_tif(&self) -> bool {
        self.stream.is_tif()
    }

    /// TIF back pointer mismatches found on open, and where a cut chain ended
    /// under keep-going.
    #[inline(always)]
    pub fn tif_anomalies(&self) -> &[Anomaly] {
        self.stream.anomalies()
    }

    /// Length of the unwrapped stream.
    pub fn stream_length(&mut self) -> Result<u64> {
        Ok(self.stream.seek(SeekFrom::End(0))?)
    }

    pub(crate) fn stream_mut(&mut self) -> &mut Source<R> {
        &mut self.stream
    }

    pub fn into_inner(self) -> R {
        self.stream.into_inner()
    }

    /// Probes the LIS padding policy over the first `limit` physical records
    /// and adopts it. Returns `None` and changes nothing if no policy fits.
    pub fn probe_padding(&mut self, limit: Option<usize>) -> Result<Option<PaddingPolicy>> {
        if self.format != Format::Lis {
            return Ok(None);
        }
        let policy = lis::probe_padding(&mut self.stream, self.format.data_start(), limit)?;
        if let Some(policy) = policy {
            self.options.padding_modulo = policy.modulo;
            self.options.padding_allow_non_null = policy.allow_non_null;
        }
        Ok(policy)
    }

    pub(crate) fn assembler(&mut self, mode: ReadMode) -> Result<Assembler<Engine>> {
        let mut engine = Engine::new(self.format, &self.options);
        engine.restart(&mut self.stream, self.format.data_start())?;
        Ok(Assembler::new(engine, mode))
    }

    /// Iterates the logical records from the start of the file.
    ///
    /// Single pass: each call starts a fresh scan from the first frame.
    pub fn iter_logical_records(&mut self) -> Result<LogicalRecords<'_, R>> {
        let assembler = self.assembler(ReadMode::Payload)?;
        Ok(LogicalRecords {
            format: self.format,
            keep_going: self.options.keep_going,
            stream: &mut self.stream,
            assembler,
            report: ScanReport::default(),
            done: false,
        })
    }

    /// Iterates the raw frames (LIS) or segments (RP66V1) from the start of the file.
    pub fn fragments(&mut self, mode: ReadMode) -> Result<Fragments<'_, R>> {
        let mut engine = Engine::new(self.format, &self.options);
        engine.restart(&mut self.stream, self.format.data_start())?;
        Ok(Fragments {
            stream: &mut self.stream,
            engine,
            mode,
            done: false,
        })
    }

    pub fn build_index(&mut self) -> Result<Index> {
        Index::build(self)
    }
}

/// Logical records in file order. Yields an error at most once, then ends.
pub struct LogicalRecords<'a, R> {
    stream: &'a mut Source<R>,
    assembler: Assembler<Engine>,
    format: Format,
    keep_going: bool,
    report: ScanReport,
    done: bool,
}

impl<'a, R: Read + Seek> LogicalRecords<'a, R> {
    /// Faults skipped under keep-going.
    #[inline(always)]
    pub fn anomalies(&self) -> &[Anomaly] {
        &self.report.anomalies
    }

    /// The scan stopped early at an unrecoverable fault under keep-going.
    #[inline(always)]
    pub fn is_partial(&self) -> bool {
        self.report.partial
    }

    pub fn into_report(self) -> ScanReport {
        self.report
    }
}

impl<'a, R: Read + Seek> Iterator for LogicalRecords<'a, R> {
    type Item = Result<LogicalRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        match self
            .assembler
            .next_recovering(&mut *self.stream, self.keep_going, &mut self.report)
        {
            Ok(Some(assembled)) => Some(Ok(LogicalRecord {
                format: self.format,
                type_code: assembled.layout.type_code,
                explicit: assembled.layout.explicit,
                payload: assembled.payload,
                source_positions: assembled.layout.source_positions,
            })),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// Frames or segments in file order. Yields an error at most once, then ends.
pub struct Fragments<'a, R> {
    stream: &'a mut Source<R>,
    engine: Engine,
    mode: ReadMode,
    done: bool,
}

impl<'a, R: Read + Seek> Iterator for Fragments<'a, R> {
    type Item = Result<Fragment>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let result = self.engine.next_fragment(&mut *self.stream, self.mode).transpose();
        if !matches!(result, Some(Ok(_))) {
            self.done = true;
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WriteOptions;
    use crate::dlis::DlisWriter;
    use crate::lis::LisWriter;
    use std::io::Cursor;

    fn lis(options: WriteOptions, records: &[(u8, &str)]) -> Vec<u8> {
        let mut out = vec![];
        let mut writer = LisWriter::new(&mut out, options).unwrap();
        for (type_code, payload) in records {
            writer.write_logical_record(*type_code, payload.as_bytes()).unwrap();
        }
        writer.finish().unwrap();
        out
    }

    fn dlis(records: &[(u8, &str)]) -> Vec<u8> {
        let mut out = vec![];
        let options = WriteOptions::default().storage_set_identifier("unit test");
        let mut writer = DlisWriter::new(&mut out, options).unwrap();
        for (type_code, payload) in records {
            writer.write_explicit_record(*type_code, payload.as_bytes()).unwrap();
        }
        writer.finish().unwrap();
        out
    }

    fn payloads<R: Read + Seek>(file: &mut LogFile<R>) -> Vec<(u8, Vec<u8>)> {
        file.iter_logical_records()
            .unwrap()
            .map(|r| r.map(|r| (r.type_code, r.payload)))
            .collect::<Result<_>>()
            .unwrap()
    }

    #[test]
    fn detects_lis() {
        let bytes = lis(WriteOptions::default(), &[(128, "header"), (0, "data")]);
        let mut file = LogFile::from_reader(Cursor::new(bytes), ReadOptions::default()).unwrap();
        assert_eq!(file.format(), Format::Lis);
        assert!(!file.is_tif());
        assert!(file.label().is_none());
        assert_eq!(
            payloads(&mut file),
            vec![(128, b"header".to_vec()), (0, b"data".to_vec())]
        );
    }

    #[test]
    fn detects_dlis_and_reads_label() {
        let bytes = dlis(&[(0, "file header"), (3, "channels")]);
        let mut file = LogFile::from_reader(Cursor::new(bytes), ReadOptions::default()).unwrap();
        assert_eq!(file.format(), Format::Dlis);
        assert_eq!(file.label().unwrap().storage_set_identifier, "unit test");

        let records: Vec<_> = file.iter_logical_records().unwrap().map(|r| r.unwrap()).collect();
        assert_eq!(records.len(), 2);
        assert!(records[1].explicit);
        assert_eq!(records[1].kind().to_string(), "CHANNL");
        assert_eq!(records[0].position(), 84);
    }

    #[test]
    fn tif_wrapped_lis_reads_through() {
        let options = WriteOptions::default().tif_markers(true);
        let wrapped = lis(options, &[(34, "wellsite"), (0, "frames")]);
        let plain = lis(WriteOptions::default(), &[(34, "wellsite"), (0, "frames")]);

        let mut file = LogFile::from_reader(Cursor::new(wrapped), ReadOptions::default()).unwrap();
        assert!(file.is_tif());
        assert_eq!(file.stream_length().unwrap(), plain.len() as u64);

        let records: Vec<_> = file.iter_logical_records().unwrap().map(|r| r.unwrap()).collect();
        assert_eq!(records[1].payload, b"frames");
        // Offsets are in the unwrapped stream.
        assert_eq!(records[1].position(), 4 + 2 + 8);
    }

    #[test]
    fn unknown_bytes_are_rejected() {
        let err = LogFile::from_reader(Cursor::new(vec![0u8; 3]), ReadOptions::default());
        assert!(err.is_err());
    }

    #[test]
    fn iteration_restarts_on_each_call() {
        let bytes = lis(WriteOptions::default(), &[(1, "a"), (2, "b")]);
        let mut file = LogFile::from_reader(Cursor::new(bytes), ReadOptions::default()).unwrap();
        assert_eq!(file.iter_logical_records().unwrap().count(), 2);
        assert_eq!(file.iter_logical_records().unwrap().count(), 2);
    }

    #[test]
    fn truncation_under_keep_going_is_partial() {
        let mut bytes = lis(WriteOptions::default(), &[(1, "first"), (2, "second")]);
        bytes.truncate(bytes.len() - 3);

        let mut strict = LogFile::from_reader(Cursor::new(bytes.clone()), ReadOptions::default()).unwrap();
        let results: Vec<_> = strict.iter_logical_records().unwrap().collect();
        assert_eq!(results.len(), 2);
        assert!(matches!(results[1], Err(Error::Truncated { .. })));

        let options = ReadOptions::default().keep_going(true);
        let mut lenient = LogFile::from_reader(Cursor::new(bytes), options).unwrap();
        let mut records = lenient.iter_logical_records().unwrap();
        assert_eq!(records.next().unwrap().unwrap().payload, b"first");
        assert!(records.next().is_none());
        assert!(records.is_partial());
        assert_eq!(records.anomalies().len(), 1);
    }

    #[test]
    fn fragments_walk_every_frame() {
        let options = WriteOptions::default().max_frame_length(10);
        let bytes = lis(options, &[(0, "0123456789")]);
        let mut file = LogFile::from_reader(Cursor::new(bytes), ReadOptions::default()).unwrap();

        let fragments: Vec<_> = file
            .fragments(ReadMode::Metadata)
            .unwrap()
            .map(|f| f.unwrap())
            .collect();
        assert_eq!(fragments.len(), 2);
        assert!(fragments[0].first && !fragments[0].last);
        assert_eq!(fragments[0].data_length + fragments[1].data_length, 10);
    }

    #[test]
    fn probing_adopts_padding() {
        let bytes = lis(WriteOptions::default().padding_modulo(4), &[(1, "a"), (1, "bcd")]);
        let mut file = LogFile::from_reader(Cursor::new(bytes), ReadOptions::default()).unwrap();
        let policy = file.probe_padding(None).unwrap().unwrap();
        assert_eq!(policy.modulo, 4);
        assert_eq!(payloads(&mut file).len(), 2);
    }
}
