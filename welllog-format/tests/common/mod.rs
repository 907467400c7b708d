//! Seeded fixture generators shared by the integration tests.
#![allow(dead_code)]

use std::io::Cursor;

use rand::prelude::*;
use welllog_format::{Format, LogFile, ReadOptions, WriteOptions, Writer};

pub fn rng(seed: u64) -> StdRng {
    StdRng::seed_from_u64(seed)
}

pub fn payload(rng: &mut StdRng, length: usize) -> Vec<u8> {
    let mut buf = vec![0u8; length];
    rng.fill_bytes(&mut buf);
    buf
}

/// `count` records with random type codes and lengths in `0..=max_length`.
pub fn records(rng: &mut StdRng, count: usize, max_length: usize) -> Vec<(u8, Vec<u8>)> {
    (0..count)
        .map(|_| {
            let length = rng.gen_range(0..=max_length);
            let type_code = rng.gen();
            (type_code, payload(rng, length))
        })
        .collect()
}

pub fn write(format: Format, options: WriteOptions, records: &[(u8, Vec<u8>)]) -> Vec<u8> {
    let mut out = vec![];
    let mut writer = Writer::new(&mut out, format, options).unwrap();
    for (type_code, payload) in records {
        writer.write_logical_record(*type_code, payload).unwrap();
    }
    writer.finish().unwrap();
    out
}

pub fn open(bytes: Vec<u8>, options: ReadOptions) -> LogFile<Cursor<Vec<u8>>> {
    LogFile::from_reader(Cursor::new(bytes), options).unwrap()
}

pub fn read_all<R: std::io::Read + std::io::Seek>(file: &mut LogFile<R>) -> Vec<(u8, Vec<u8>)> {
    file.iter_logical_records()
        .unwrap()
        .map(|r| {
            let r = r.unwrap();
            (r.type_code, r.payload)
        })
        .collect()
}

/// Offset of the first logical data byte of the record starting at `position`.
pub fn first_data_byte(format: Format, position: u64) -> usize {
    match format {
        // Physical record header, then the logical record header.
        Format::Lis => position as usize + 4 + 2,
        Format::Dlis => position as usize + 4,
    }
}
