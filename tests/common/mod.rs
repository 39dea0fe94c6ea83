//! Shared fixtures for integration tests.

#![allow(dead_code)]

use bamcore::io::bam::{BamWriter, CigarOp, Header, Record, Reference, TagValue};
use bamcore::io::WriterOptions;
use std::path::Path;

/// Two references: chr1 (1 kbp) and chr2 (2 kbp).
pub fn small_header() -> Header {
    Header::new(
        "@HD\tVN:1.6\tSO:coordinate\n@SQ\tSN:chr1\tLN:1000\n@SQ\tSN:chr2\tLN:2000\n".to_string(),
        vec![
            Reference::new("chr1".to_string(), 1000),
            Reference::new("chr2".to_string(), 2000),
        ],
    )
}

/// Three references long enough to spread records over many bins.
pub fn large_header() -> Header {
    Header::new(
        "@HD\tVN:1.6\tSO:coordinate\n".to_string(),
        vec![
            Reference::new("chr1".to_string(), 5_000_000),
            Reference::new("chr2".to_string(), 3_000_000),
            Reference::new("chrM".to_string(), 16_569),
        ],
    )
}

/// A mapped record with an all-match CIGAR.
pub fn mapped(name: &str, reference_id: usize, position: i32, length: u32) -> Record {
    let mut record = Record::new();
    record.name = name.to_string();
    record.reference_id = Some(reference_id);
    record.position = Some(position);
    record.mapq = Some(60);
    record.cigar = vec![CigarOp::Match(length)];
    record.sequence = b"ACGT".iter().copied().cycle().take(length as usize).collect();
    record.quality = vec![35; length as usize];
    record.tags.insert(*b"NM", TagValue::UInt8(0));
    record.bin = record.compute_bin();
    record
}

/// An unmapped record with no reference or position.
pub fn unplaced(name: &str) -> Record {
    let mut record = Record::new();
    record.name = name.to_string();
    record.flags = bamcore::io::bam::record::flags::UNMAPPED;
    record.sequence = b"NNNN".to_vec();
    record
}

/// Write `records` to `path` as BAM.
pub fn write_bam(path: &Path, header: &Header, records: &[Record]) {
    let mut writer = BamWriter::create(path, header.clone()).unwrap();
    for record in records {
        writer.write_record(record).unwrap();
    }
    writer.finish().unwrap();
}

/// Encode `records` as in-memory BAM with small blocks, so even modest
/// inputs span many BGZF blocks.
pub fn bam_bytes(header: &Header, records: &[Record]) -> Vec<u8> {
    let options = WriterOptions {
        compression_level: 1,
        parallel_blocks: 4,
    };
    let mut writer = BamWriter::with_options(Vec::new(), header.clone(), options).unwrap();
    for (i, record) in records.iter().enumerate() {
        writer.write_record(record).unwrap();
        if i % 50 == 49 {
            writer.flush().unwrap();
        }
    }
    writer.finish().unwrap()
}

/// Deterministic coordinate-sorted records over [`large_header`].
///
/// Mixes short reads, long spliced reads, a few unmapped-but-placed reads
/// and trailing unplaced reads.
pub fn sorted_dataset(count: usize) -> Vec<Record> {
    let header = large_header();
    let mut state = 0x2545_f491_4f6c_dd1du64;
    let mut next = move || {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        state
    };

    let mut records = Vec::with_capacity(count + 3);
    for reference_id in 0..header.reference_count() {
        let length = header.references[reference_id].length as u64;
        let limit = length.saturating_sub(20_000).max(length / 2);
        let mut position = 0u64;
        for i in 0..count / header.reference_count() {
            position += next() % 4_000;
            if position >= limit {
                break;
            }
            let name = format!("r{}_{}", reference_id, i);
            let mut record = match next() % 10 {
                0 => {
                    let mut r = mapped(&name, reference_id, position as i32, 50);
                    r.cigar = vec![
                        CigarOp::Match(40),
                        CigarOp::RefSkip((next() % 15_000) as u32 + 1),
                        CigarOp::Match(10),
                    ];
                    r
                }
                1 => {
                    let mut r = mapped(&name, reference_id, position as i32, 4);
                    r.flags |= bamcore::io::bam::record::flags::UNMAPPED;
                    r.cigar.clear();
                    r.mapq = None;
                    r
                }
                _ => mapped(&name, reference_id, position as i32, 100),
            };
            record.bin = record.compute_bin();
            records.push(record);
        }
    }
    for i in 0..3 {
        records.push(unplaced(&format!("u{}", i)));
    }
    records
}

/// Records from `records` on `reference_id` overlapping `[start, end)`.
pub fn brute_force_overlaps(records: &[Record], reference_id: usize, start: i64, end: i64) -> Vec<String> {
    records
        .iter()
        .filter(|r| r.reference_id == Some(reference_id))
        .filter(|r| match (r.position, r.alignment_end()) {
            (Some(pos), Some(alignment_end)) => i64::from(pos) < end && alignment_end > start,
            _ => false,
        })
        .map(|r| r.name.clone())
        .collect()
}
