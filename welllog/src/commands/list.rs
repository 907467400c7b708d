use std::io::{Read, Seek};
use std::path::{Path, PathBuf};

use welllog_format::{LogFile, ReadMode};

use crate::commands::{open, print_anomalies, size, ReadArgs};
use crate::error::{Error, Result};

pub fn run(path: PathBuf, verbose: bool, args: ReadArgs) -> Result<()> {
    let mut file = open(&path, &args)?;
    let format = file.format();
    if let Some(label) = file.label() {
        println!(
            "Storage unit {} ({} {}), set `{}`",
            label.sequence_number,
            label.version.trim(),
            label.structure.trim(),
            label.storage_set_identifier.trim()
        );
    }

    let index = file.build_index().map_err(|source| Error::ReadLog {
        path: path.clone(),
        source,
    })?;

    println!("Record   Offset        Length       Frames  Kind");
    println!("-------  ------------  -----------  ------  --------------------");
    for entry in index.entries() {
        println!(
            "{:>7}  {:#012x}  {:>11}  {:>6}  {}",
            entry.ordinal,
            entry.first_frame_offset,
            size(entry.total_payload_length),
            entry.source_positions.len(),
            entry.kind(format),
        );
    }

    if verbose {
        dump_fragments(&mut file, &path)?;
    }

    if !index.anomalies().is_empty() {
        eprintln!("{} anomalies:", index.anomalies().len());
        print_anomalies(index.anomalies());
    }
    Ok(())
}

fn dump_fragments<R: Read + Seek>(file: &mut LogFile<R>, path: &Path) -> Result<()> {
    let read_error = |source: welllog_format::Error| Error::ReadLog {
        path: path.to_path_buf(),
        source,
    };

    println!();
    println!("Offset        Data         First  Last");
    println!("------------  -----------  -----  ----");
    for fragment in file.fragments(ReadMode::Metadata).map_err(read_error)? {
        let fragment = fragment.map_err(read_error)?;
        println!(
            "{:#012x}  {:>11}  {:<5}  {}",
            fragment.position,
            size(fragment.data_length),
            fragment.first,
            fragment.last
        );
    }
    Ok(())
}
