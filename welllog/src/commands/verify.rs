use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;

use welllog_format::Index;

use crate::commands::{open, print_anomalies, size, ReadArgs};
use crate::error::{Error, Result};

/// Reads every logical record with checksums, and checks a saved index
/// against the file when one is given.
pub fn run(path: PathBuf, index_path: Option<PathBuf>, args: ReadArgs) -> Result<()> {
    let mut file = open(&path, &args)?;
    let mut problems = file.tif_anomalies().len();

    let mut records = 0usize;
    let mut bytes = 0u64;
    let mut iter = file.iter_logical_records().map_err(|source| Error::ReadLog {
        path: path.clone(),
        source,
    })?;
    for result in iter.by_ref() {
        match result {
            Ok(record) => {
                records += 1;
                bytes += record.payload.len() as u64;
            }
            Err(e) => {
                eprintln!("  {}", e);
                problems += 1;
            }
        }
    }
    let report = iter.into_report();
    problems += report.anomalies.len();

    println!(
        "{}: {} records, {} of payload",
        path.display(),
        records,
        size(bytes)
    );
    if !report.anomalies.is_empty() {
        eprintln!("{} records skipped:", report.anomalies.len());
        print_anomalies(&report.anomalies);
    }
    if report.partial {
        eprintln!("stopped early at an unrecoverable fault");
    }

    if let Some(index_path) = index_path {
        let reader = File::open(&index_path).map_err(|source| Error::OpenFile {
            path: index_path.clone(),
            source,
        })?;
        let index = Index::load(BufReader::new(reader)).map_err(|source| Error::LoadIndex {
            path: index_path.clone(),
            source,
        })?;
        let stale = index.validate(&mut file).map_err(|source| Error::ReadLog {
            path: path.clone(),
            source,
        })?;
        if stale.is_empty() {
            println!("{}: matches {} records", index_path.display(), index.len());
        } else {
            eprintln!("{} is stale:", index_path.display());
            print_anomalies(&stale);
            problems += stale.len();
        }
    }

    if problems > 0 {
        return Err(Error::Verification {
            path,
            count: problems,
        });
    }
    Ok(())
}
