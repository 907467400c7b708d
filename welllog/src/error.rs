use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Cannot open log file `{}`", .path.display())]
    OpenLog {
        path: PathBuf,
        #[source]
        source: welllog_format::OpenError,
    },

    #[error("Cannot read log file `{}`", .path.display())]
    ReadLog {
        path: PathBuf,
        #[source]
        source: welllog_format::Error,
    },

    #[error("Cannot open file `{}`", .path.display())]
    OpenFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Cannot create file `{}`", .path.display())]
    CreateFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Cannot strip TIF markers from `{}`", .path.display())]
    StripMarkers {
        path: PathBuf,
        #[source]
        source: welllog_format::Error,
    },

    #[error("Cannot save index to `{}`", .path.display())]
    SaveIndex {
        path: PathBuf,
        #[source]
        source: welllog_format::Error,
    },

    #[error("Cannot load index from `{}`", .path.display())]
    LoadIndex {
        path: PathBuf,
        #[source]
        source: welllog_format::Error,
    },

    #[error("Output already exists: `{}`", path.display())]
    OutputExists { path: PathBuf },

    #[error("Found {count} problem(s) in `{}`", .path.display())]
    Verification { path: PathBuf, count: usize },
}
