use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::{
    config::WriteOptions,
    dlis::DlisWriter,
    error::{Error, Result},
    lis::LisWriter,
    Format,
};

/// Writes logical records in either format.
///
/// Dropping the writer finishes it, but errors are then lost; call `finish`.
#[derive(Debug)]
pub enum Writer<W: Write> {
    Lis(LisWriter<W>),
    Dlis(DlisWriter<W>),
}

impl Writer<BufWriter<std::fs::File>> {
    /// Creates a new file, failing if one already exists at `path`.
    pub fn create<P: AsRef<Path>>(
        path: P,
        format: Format,
        options: WriteOptions,
    ) -> Result<Writer<BufWriter<std::fs::File>>> {
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path.as_ref())?;
        Writer::new(BufWriter::new(file), format, options)
    }
}

impl<W: Write> Writer<W> {
    pub fn new(stream: W, format: Format, options: WriteOptions) -> Result<Writer<W>> {
        Ok(match format {
            Format::Lis => Writer::Lis(LisWriter::new(stream, options)?),
            Format::Dlis => Writer::Dlis(DlisWriter::new(stream, options)?),
        })
    }

    #[inline(always)]
    pub fn format(&self) -> Format {
        match self {
            Writer::Lis(_) => Format::Lis,
            Writer::Dlis(_) => Format::Dlis,
        }
    }

    /// Writes one logical record, returning the offset of its first frame or
    /// segment. RP66V1 records are written indirectly formatted.
    pub fn write_logical_record(&mut self, type_code: u8, payload: &[u8]) -> Result<u64> {
        match self {
            Writer::Lis(w) => w.write_logical_record(type_code, payload),
            Writer::Dlis(w) => w.write_logical_record(type_code, payload),
        }
    }

    /// Writes an RP66V1 explicitly formatted record.
    pub fn write_explicit_record(&mut self, type_code: u8, payload: &[u8]) -> Result<u64> {
        match self {
            Writer::Lis(_) => Err(Error::Config(
                "LIS has no explicitly formatted logical records".into(),
            )),
            Writer::Dlis(w) => w.write_explicit_record(type_code, payload),
        }
    }

    pub fn finish(self) -> Result<u64> {
        match self {
            Writer::Lis(w) => w.finish(),
            Writer::Dlis(w) => w.finish(),
        }
    }
}
