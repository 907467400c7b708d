use std::io::{self, Read, Seek, SeekFrom};

use crate::{
    assemble::{Fragment, FrameEngine, ReadMode},
    config::ReadOptions,
    dlis::SegmentReader,
    error::{Anomaly, Result},
    lis::FrameReader,
    tif::TifStream,
    Format,
};

#[cfg(feature = "reader")]
pub mod reader;
#[cfg(feature = "writer")]
pub mod writer;

/// The frame engine for either format, picked when a file is opened.
#[derive(Debug, Clone)]
pub enum Engine {
    Lis(FrameReader),
    Dlis(SegmentReader),
}

impl Engine {
    pub fn new(format: Format, options: &ReadOptions) -> Engine {
        match format {
            Format::Lis => Engine::Lis(FrameReader::new(options)),
            Format::Dlis => Engine::Dlis(SegmentReader::new(options)),
        }
    }
}

impl FrameEngine for Engine {
    #[inline(always)]
    fn next_fragment<R: Read + Seek>(
        &mut self,
        stream: &mut R,
        mode: ReadMode,
    ) -> Result<Option<Fragment>> {
        match self {
            Engine::Lis(e) => e.next_fragment(stream, mode),
            Engine::Dlis(e) => e.next_fragment(stream, mode),
        }
    }

    #[inline(always)]
    fn fragment_at<R: Read + Seek>(
        &mut self,
        stream: &mut R,
        position: u64,
        mode: ReadMode,
    ) -> Result<Fragment> {
        match self {
            Engine::Lis(e) => e.fragment_at(stream, position, mode),
            Engine::Dlis(e) => e.fragment_at(stream, position, mode),
        }
    }

    #[inline(always)]
    fn restart<R: Read + Seek>(&mut self, stream: &mut R, position: u64) -> Result<()> {
        match self {
            Engine::Lis(e) => e.restart(stream, position),
            Engine::Dlis(e) => e.restart(stream, position),
        }
    }

    #[inline(always)]
    fn rewind<R: Read + Seek>(&mut self, stream: &mut R, position: u64) -> Result<()> {
        match self {
            Engine::Lis(e) => e.rewind(stream, position),
            Engine::Dlis(e) => e.rewind(stream, position),
        }
    }

    #[inline(always)]
    fn check_record(&self, last: &Fragment, payload: &[u8]) -> Result<()> {
        match self {
            Engine::Lis(e) => e.check_record(last, payload),
            Engine::Dlis(e) => e.check_record(last, payload),
        }
    }
}

/// The byte stream under a `LogFile`: the file itself, or its TIF unwrapped view.
#[derive(Debug)]
pub enum Source<R> {
    Plain(R),
    Tif(TifStream<R>),
}

impl<R: Read + Seek> Source<R> {
    #[inline(always)]
    pub fn is_tif(&self) -> bool {
        matches!(self, Source::Tif(_))
    }

    /// Back pointer mismatches found while mapping the TIF markers.
    pub fn anomalies(&self) -> &[Anomaly] {
        match self {
            Source::Plain(_) => &[],
            Source::Tif(t) => t.anomalies(),
        }
    }

    pub fn into_inner(self) -> R {
        match self {
            Source::Plain(r) => r,
            Source::Tif(t) => t.into_inner(),
        }
    }
}

impl<R: Read + Seek> Read for Source<R> {
    #[inline(always)]
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Source::Plain(r) => r.read(buf),
            Source::Tif(t) => t.read(buf),
        }
    }
}

impl<R: Read + Seek> Seek for Source<R> {
    #[inline(always)]
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        match self {
            Source::Plain(r) => r.seek(pos),
            Source::Tif(t) => t.seek(pos),
        }
    }
}
