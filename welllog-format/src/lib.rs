//! Record framing for LIS79 and RP66V1 (DLIS) well-log files.
//!
//! Splits a byte stream into physical records (LIS) or visible records and
//! segments (RP66V1), reassembles logical records, strips TIF tape markers
//! and indexes record offsets for random access. What the logical records
//! mean is left to the caller.

pub mod assemble;
pub mod checksum;
mod config;
pub mod dlis;
mod error;
mod file;
mod format;
#[cfg(feature = "reader")]
mod index;
pub mod lis;
mod record;
pub mod tif;

pub use assemble::{Fragment, FrameEngine, ReadMode, ScanReport};
pub use config::{ReadOptions, WriteOptions};
pub use error::{Anomaly, Error, FaultKind, OpenError, Result};
pub use file::{Engine, Source};
#[cfg(feature = "reader")]
pub use file::reader::{Fragments, LogFile, LogicalRecords};
#[cfg(feature = "writer")]
pub use file::writer::Writer;
pub use format::Format;
#[cfg(feature = "reader")]
pub use index::{Index, IndexEntry, INDEX_VERSION};
pub use record::{DlisRecordType, LisRecordType, LogicalRecord, RecordKind};
