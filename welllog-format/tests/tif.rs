mod common;

use std::fs::File;
use std::io::{BufReader, Cursor};

use welllog_format::{tif, Error, FaultKind, Format, LogFile, ReadOptions, WriteOptions, Writer};

fn records() -> Vec<(u8, Vec<u8>)> {
    let mut rng = common::rng(21);
    common::records(&mut rng, 12, 900)
}

#[test]
fn stripping_a_written_tif_file_gives_the_plain_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("wrapped.tif");
    let records = records();

    let options = WriteOptions::default().max_frame_length(256);
    let mut writer = Writer::create(&path, Format::Lis, options.clone().tif_markers(true)).unwrap();
    for (type_code, payload) in records.iter() {
        writer.write_logical_record(*type_code, payload).unwrap();
    }
    let unwrapped_length = writer.finish().unwrap();

    let plain = common::write(Format::Lis, options, &records);
    assert_eq!(unwrapped_length, plain.len() as u64);

    let mut input = BufReader::new(File::open(&path).unwrap());
    assert!(tif::detect(&mut input).unwrap());

    let preview = tif::dry_run(&mut input).unwrap();
    let mut stripped = vec![];
    let report = tif::strip(&mut input, Some(&mut stripped)).unwrap();
    assert_eq!(stripped, plain);
    assert_eq!(report.bytes_written, plain.len() as u64);
    assert_eq!(preview.bytes_written, report.bytes_written);
    assert_eq!(preview.markers, report.markers);
    assert!(report.anomalies.is_empty());

    assert!(!tif::detect(&mut Cursor::new(&stripped)).unwrap());
    let mut again = vec![];
    let report = tif::strip(&mut Cursor::new(&stripped), Some(&mut again)).unwrap();
    assert_eq!(report.bytes_written, 0);
    assert!(again.is_empty());
}

#[test]
fn wrapped_file_reads_like_the_plain_one() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("wrapped.tif");
    let records = records();

    let options = WriteOptions::default().max_frame_length(256).tif_markers(true);
    let mut writer = Writer::create(&path, Format::Lis, options).unwrap();
    for (type_code, payload) in records.iter() {
        writer.write_logical_record(*type_code, payload).unwrap();
    }
    writer.finish().unwrap();

    let mut file = LogFile::open(&path).unwrap();
    assert!(file.is_tif());
    assert_eq!(file.format(), Format::Lis);
    assert_eq!(common::read_all(&mut file), records);

    // Offsets are in the unwrapped stream, so they agree with a plain file.
    let plain = common::write(
        Format::Lis,
        WriteOptions::default().max_frame_length(256),
        &records,
    );
    let mut plain = common::open(plain, ReadOptions::default());
    let wrapped_index = file.build_index().unwrap();
    let plain_index = plain.build_index().unwrap();
    assert_eq!(wrapped_index.entries(), plain_index.entries());
    assert_eq!(wrapped_index.stream_length(), plain_index.stream_length());
    assert!(file.tif_anomalies().is_empty());
}

#[test]
fn truncated_wrapped_file_keeps_the_complete_records() {
    let mut rng = common::rng(5);
    let records = common::records(&mut rng, 6, 300);
    let options = WriteOptions::default().max_frame_length(256).tif_markers(true);
    let mut wrapped = common::write(Format::Lis, options, &records);
    // Both EOF markers and the tail of the last physical record.
    wrapped.truncate(wrapped.len() - 29);

    let strict = LogFile::from_reader(Cursor::new(wrapped.clone()), ReadOptions::default());
    assert!(matches!(strict, Err(Error::Truncated { .. })));

    let mut file = common::open(wrapped, ReadOptions::default().keep_going(true));
    assert!(file.is_tif());
    assert_eq!(file.tif_anomalies().len(), 1);
    assert_eq!(file.tif_anomalies()[0].kind, FaultKind::Truncated);

    let mut iter = file.iter_logical_records().unwrap();
    let read: Vec<_> = iter
        .by_ref()
        .map(|r| {
            let r = r.unwrap();
            (r.type_code, r.payload)
        })
        .collect();
    assert!(iter.is_partial());
    assert_eq!(iter.anomalies()[0].kind, FaultKind::Truncated);
    assert_eq!(read, records[..5].to_vec());

    let index = file.build_index().unwrap();
    assert!(index.is_partial());
    assert_eq!(index.len(), 5);
    let last = index.get_payload(&mut file, 4, 0, None).unwrap().unwrap();
    assert_eq!(last, records[4].1);
}

#[test]
fn rp66_writer_refuses_tif_markers() {
    let mut out = vec![];
    let options = WriteOptions::default().tif_markers(true);
    assert!(Writer::new(&mut out, Format::Dlis, options).is_err());
}
