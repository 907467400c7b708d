mod common;

use std::fs::{File, OpenOptions};
use std::io::Write;

use rand::prelude::*;
use welllog_format::{FaultKind, Format, Index, LogFile, ReadOptions, WriteOptions, Writer};

#[test]
fn index_matches_a_sequential_read() {
    for &format in &[Format::Lis, Format::Dlis] {
        let mut rng = common::rng(11);
        let records = common::records(&mut rng, 60, 2000);
        let options = WriteOptions::default().max_frame_length(512);
        let bytes = common::write(format, options, &records);

        let mut file = common::open(bytes, ReadOptions::default());
        let sequential: Vec<_> = file
            .iter_logical_records()
            .unwrap()
            .map(|r| r.unwrap())
            .collect();
        let index = file.build_index().unwrap();
        assert_eq!(index.len(), records.len());

        for (entry, record) in index.entries().iter().zip(sequential.iter()) {
            assert_eq!(entry.first_frame_offset, record.position());
            assert_eq!(entry.source_positions, record.source_positions);
            assert_eq!(entry.type_code, record.type_code);
            assert_eq!(entry.total_payload_length, record.payload.len() as u64);
        }

        // Fetch in reverse so every read seeks backwards.
        for ordinal in (0..records.len()).rev() {
            let payload = index.get_payload(&mut file, ordinal, 0, None).unwrap().unwrap();
            assert!(payload == records[ordinal].1, "{} record {}", format, ordinal);
        }
    }
}

#[test]
fn random_windows_match_the_payload() {
    for &format in &[Format::Lis, Format::Dlis] {
        let mut rng = common::rng(12);
        let records = common::records(&mut rng, 30, 4000);
        let options = WriteOptions::default().max_frame_length(300);
        let bytes = common::write(format, options, &records);

        let mut file = common::open(bytes, ReadOptions::default());
        let index = file.build_index().unwrap();

        for _ in 0..200 {
            let ordinal = rng.gen_range(0..records.len());
            let payload = &records[ordinal].1;
            if payload.is_empty() {
                continue;
            }
            let offset = rng.gen_range(0..payload.len());
            let length = rng.gen_range(1..=payload.len() - offset);

            let window = index
                .get_payload(&mut file, ordinal, offset as u64, Some(length as u64))
                .unwrap()
                .unwrap();
            assert_eq!(
                window,
                &payload[offset..offset + length],
                "{} record {} at {}+{}",
                format,
                ordinal,
                offset,
                length
            );
        }
    }
}

#[test]
fn saved_index_is_checked_against_the_file() {
    let dir = tempfile::tempdir().unwrap();
    let log_path = dir.path().join("run.lis");
    let index_path = dir.path().join("run.idx");

    let mut rng = common::rng(13);
    let records = common::records(&mut rng, 20, 1500);
    let mut writer = Writer::create(&log_path, Format::Lis, WriteOptions::default()).unwrap();
    for (type_code, payload) in records.iter() {
        writer.write_logical_record(*type_code, payload).unwrap();
    }
    writer.finish().unwrap();

    let mut file = LogFile::open(&log_path).unwrap();
    assert_eq!(file.path(), Some(log_path.as_path()));
    let index = file.build_index().unwrap();
    index.save(File::create(&index_path).unwrap()).unwrap();

    let loaded = Index::load(File::open(&index_path).unwrap()).unwrap();
    assert_eq!(loaded.entries(), index.entries());
    assert!(loaded.validate(&mut file).unwrap().is_empty());
    let last = records.len() - 1;
    assert_eq!(
        loaded.get_payload(&mut file, last, 0, None).unwrap().unwrap(),
        records[last].1
    );

    let mut appended = OpenOptions::new().append(true).open(&log_path).unwrap();
    appended.write_all(&[0; 8]).unwrap();
    drop(appended);

    let mut grown = LogFile::open(&log_path).unwrap();
    let anomalies = loaded.validate(&mut grown).unwrap();
    assert_eq!(anomalies.len(), 1);
    assert_eq!(anomalies[0].kind, FaultKind::StaleIndex);
}
