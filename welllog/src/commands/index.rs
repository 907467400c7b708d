use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use crate::commands::{open, print_anomalies, size, ReadArgs};
use crate::error::{Error, Result};

/// Builds the offset index of `path`, optionally saving it as JSON.
pub fn run(path: PathBuf, output: Option<PathBuf>, args: ReadArgs) -> Result<()> {
    let mut file = open(&path, &args)?;
    let index = file.build_index().map_err(|source| Error::ReadLog {
        path: path.clone(),
        source,
    })?;

    let payload: u64 = index
        .entries()
        .iter()
        .map(|e| e.total_payload_length)
        .sum();
    println!(
        "{}: {} {} records, {} of payload in {}",
        path.display(),
        index.len(),
        index.format(),
        size(payload),
        size(index.stream_length())
    );

    if !index.anomalies().is_empty() {
        eprintln!("{} anomalies:", index.anomalies().len());
        print_anomalies(index.anomalies());
    }
    if index.is_partial() {
        eprintln!("index is partial: stopped at an unrecoverable fault");
    }

    if let Some(output) = output {
        let out = File::create(&output).map_err(|source| Error::CreateFile {
            path: output.clone(),
            source,
        })?;
        let mut writer = BufWriter::new(out);
        index.save(&mut writer).map_err(|source| Error::SaveIndex {
            path: output.clone(),
            source,
        })?;
        writer.flush().map_err(|source| Error::CreateFile {
            path: output.clone(),
            source,
        })?;
        tracing::debug!(path = %output.display(), "saved index");
    }

    Ok(())
}
