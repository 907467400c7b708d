use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use humansize::{file_size_opts as options, FileSize};
use welllog_format::{Anomaly, LogFile, ReadOptions};

use crate::error::{Error, Result};

pub mod detif;
pub mod index;
pub mod list;
pub mod verify;

pub use detif::run as detif;
pub use index::run as index;
pub use list::run as list;
pub use verify::run as verify;

/// Read options shared by every command that reads a log file.
#[derive(Debug, Clone)]
pub struct ReadArgs {
    pub keep_going: bool,
    pub no_checksum: bool,
    pub padding: Option<u64>,
    pub probe_padding: bool,
    pub max_frame_length: Option<u64>,
}

impl ReadArgs {
    fn options(&self) -> ReadOptions {
        let mut options = ReadOptions::default()
            .keep_going(self.keep_going)
            .checksum_enabled(!self.no_checksum);
        if let Some(modulo) = self.padding {
            options = options.padding(modulo, false);
        }
        if let Some(length) = self.max_frame_length {
            options = options.max_frame_length(length);
        }
        options
    }
}

pub(crate) fn open(path: &Path, args: &ReadArgs) -> Result<LogFile<BufReader<File>>> {
    let mut file = LogFile::open_with(path, args.options()).map_err(|source| Error::OpenLog {
        path: path.to_path_buf(),
        source,
    })?;

    if args.probe_padding {
        let policy = file.probe_padding(None).map_err(|source| Error::ReadLog {
            path: path.to_path_buf(),
            source,
        })?;
        match policy {
            Some(policy) => tracing::info!(modulo = policy.modulo, "adopted probed padding"),
            None => tracing::warn!("no padding policy fits the first physical records"),
        }
    }

    for anomaly in file.tif_anomalies() {
        tracing::warn!(%anomaly, "TIF marker chain");
    }
    Ok(file)
}

#[inline(always)]
pub(crate) fn size(bytes: u64) -> String {
    bytes
        .file_size(options::BINARY)
        .unwrap_or_else(|_| format!("{} B", bytes))
}

pub(crate) fn print_anomalies(anomalies: &[Anomaly]) {
    for anomaly in anomalies {
        eprintln!("  {}", anomaly);
    }
}
