use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, ErrorKind, Write};
use std::path::PathBuf;

use welllog_format::tif;

use crate::commands::{print_anomalies, size};
use crate::error::{Error, Result};

pub fn run(input: PathBuf, output: Option<PathBuf>) -> Result<()> {
    let file = File::open(&input).map_err(|source| Error::OpenFile {
        path: input.clone(),
        source,
    })?;
    let mut reader = BufReader::new(file);
    let strip_error = |source: welllog_format::Error| Error::StripMarkers {
        path: input.clone(),
        source,
    };

    if !tif::detect(&mut reader).map_err(strip_error)? {
        println!("{}: not TIF wrapped", input.display());
        return Ok(());
    }

    let report = match output {
        None => tif::dry_run(&mut reader).map_err(strip_error)?,
        Some(output) => {
            let out = OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&output)
                .map_err(|source| match source.kind() {
                    ErrorKind::AlreadyExists => Error::OutputExists {
                        path: output.clone(),
                    },
                    _ => Error::CreateFile {
                        path: output.clone(),
                        source,
                    },
                })?;
            let mut writer = BufWriter::new(out);
            let report = tif::strip(&mut reader, Some(&mut writer)).map_err(strip_error)?;
            writer.flush().map_err(|source| Error::CreateFile {
                path: output.clone(),
                source,
            })?;
            report
        }
    };

    println!(
        "{}: {} markers, {} of data",
        input.display(),
        report.markers,
        size(report.bytes_written)
    );
    if !report.anomalies.is_empty() {
        eprintln!("{} marker anomalies:", report.anomalies.len());
        print_anomalies(&report.anomalies);
    }
    Ok(())
}
