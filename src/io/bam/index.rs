//! BAI (BAM Index) support for random access queries.
//!
//! # Virtual File Offsets
//!
//! Index entries are BGZF virtual file offsets, which combine:
//! - **Compressed offset** (high 48 bits): Position in compressed file
//! - **Uncompressed offset** (low 16 bits): Position within decompressed block
//!
//! # Binning
//!
//! Each reference is covered by 37,450 bins over six levels, each level
//! eight times finer than the one above:
//! - Level 0: bin 0 (512 Mbp)
//! - Level 1: bins 1-8 (64 Mbp each)
//! - Level 2: bins 9-72 (8 Mbp each)
//! - Level 3: bins 73-584 (1 Mbp each)
//! - Level 4: bins 585-4680 (128 Kbp each)
//! - Level 5: bins 4681-37449 (16 Kbp each)
//!
//! A record lives in the smallest bin that contains its whole span. Bins are
//! kept in a `BTreeMap` keyed by bin number. Alongside the bins, a linear
//! index records, for every 16 Kbp window, the smallest offset of any record
//! overlapping that window; queries use it to drop chunks that end too early.
//!
//! # Basic Usage
//!
//! ```no_run
//! use bamcore::io::bam::{BamReader, BaiIndex};
//!
//! # fn main() -> bamcore::Result<()> {
//! let index = BaiIndex::from_path("alignments.bam.bai")?;
//! println!("Index covers {} references", index.references.len());
//!
//! let mut reader = BamReader::open("alignments.bam")?;
//! reader.set_index(index)?;
//! for record in reader.query("chr1", 1_000_000, 2_000_000)? {
//!     let record = record?;
//!     println!("{} at {:?}", record.name, record.position);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Index Generation
//!
//! [`BaiIndex::build`] scans a coordinate-sorted BAM once and produces an
//! index equivalent to `samtools index`; [`BaiIndex::to_path`] saves it.

use super::reader::BamReader;
use super::record::Record;
use crate::error::{BamError, Result};
use log::debug;
use std::collections::BTreeMap;
use std::fmt;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Seek, Write};
use std::path::Path;

/// BAI magic bytes.
pub const BAI_MAGIC: &[u8; 4] = b"BAI\x01";

/// Number of real bins per reference.
pub const BIN_COUNT: u32 = 37_450;

/// Pseudo-bin holding per-reference metadata.
pub const METADATA_BIN: u32 = 37_450;

/// Linear index window size, as a shift (16 Kbp).
pub const LINEAR_INDEX_SHIFT: u32 = 14;

/// Exclusive upper bound on positions the BAI scheme can address (512 Mbp).
pub const MAX_POSITION: i64 = 1 << 29;

/// (first bin, shift) for levels 1 through 5.
const LEVELS: [(u32, u32); 5] = [(1, 26), (9, 23), (73, 20), (585, 17), (4681, 14)];

/// Virtual file offset in BGZF format.
///
/// A 64-bit value combining:
/// - Bits 63-16: Compressed file offset (byte position in .bam file)
/// - Bits 15-0: Uncompressed offset within decompressed block
///
/// # Example
///
/// ```
/// # use bamcore::io::bam::VirtualOffset;
/// let offset = VirtualOffset::new(1024, 512);
/// assert_eq!(offset.compressed_offset(), 1024);
/// assert_eq!(offset.uncompressed_offset(), 512);
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VirtualOffset(u64);

impl VirtualOffset {
    /// Create a new virtual offset from compressed and uncompressed components.
    pub fn new(compressed: u64, uncompressed: u16) -> Self {
        VirtualOffset((compressed << 16) | (uncompressed as u64))
    }

    /// Create from raw 64-bit value.
    pub fn from_raw(value: u64) -> Self {
        VirtualOffset(value)
    }

    /// Get raw 64-bit value.
    pub fn as_raw(self) -> u64 {
        self.0
    }

    /// Get compressed file offset (high 48 bits).
    pub fn compressed_offset(self) -> u64 {
        self.0 >> 16
    }

    /// Get uncompressed offset within block (low 16 bits).
    pub fn uncompressed_offset(self) -> u16 {
        (self.0 & 0xFFFF) as u16
    }
}

impl fmt::Display for VirtualOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.compressed_offset(), self.uncompressed_offset())
    }
}

/// A contiguous range of the BAM file, `[start, end)` in virtual offsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Chunk {
    /// Virtual file offset where chunk starts
    pub start: VirtualOffset,
    /// Virtual file offset where chunk ends
    pub end: VirtualOffset,
}

impl Chunk {
    /// Create a new chunk.
    pub fn new(start: VirtualOffset, end: VirtualOffset) -> Self {
        Chunk { start, end }
    }
}

/// Contents of the metadata pseudo-bin.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReferenceMetadata {
    /// Offset of the first record on this reference
    pub start: VirtualOffset,
    /// Offset just past the last record on this reference
    pub end: VirtualOffset,
    /// Records placed on this reference without the unmapped flag
    pub mapped: u64,
    /// Records placed on this reference with the unmapped flag
    pub unmapped: u64,
}

/// Binning and linear index for one reference sequence.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReferenceIndex {
    /// Bin number -> chunks, excluding the metadata pseudo-bin
    pub bins: BTreeMap<u32, Vec<Chunk>>,
    /// Minimum record offset for each 16 Kbp window
    pub intervals: Vec<VirtualOffset>,
    /// Metadata pseudo-bin, when present
    pub metadata: Option<ReferenceMetadata>,
}

impl ReferenceIndex {
    /// Create a new empty reference index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Lower bound on the offset of any record overlapping `start`.
    pub fn min_offset(&self, start: i64) -> VirtualOffset {
        let window = (start.max(0) >> LINEAR_INDEX_SHIFT) as usize;
        self.intervals
            .get(window)
            .or_else(|| self.intervals.last())
            .copied()
            .unwrap_or_default()
    }
}

/// Bin for the 0-based half-open region `[beg, end)`.
///
/// `reg2bin(-1, 0)` gives 4680, the bin used for unplaced records.
pub fn reg2bin(beg: i64, end: i64) -> u32 {
    let end = end - 1;
    for &(first, shift) in LEVELS.iter().rev() {
        if beg >> shift == end >> shift {
            return (first as i64 + (beg >> shift)) as u32;
        }
    }
    0
}

/// All bins that may hold records overlapping `[beg, end)`.
///
/// The region is clamped to `[0, 2^29)`; an empty region has no bins.
pub fn reg2bins(beg: i64, end: i64) -> Vec<u32> {
    let beg = beg.max(0);
    let end = end.min(MAX_POSITION);
    if beg >= end {
        return Vec::new();
    }
    let end = end - 1;

    let mut bins = vec![0];
    for &(first, shift) in &LEVELS {
        let lo = first + (beg >> shift) as u32;
        let hi = first + (end >> shift) as u32;
        bins.extend(lo..=hi);
    }
    bins
}

/// Merge overlapping or adjacent chunks, sorted by start.
pub fn merge_chunks(mut chunks: Vec<Chunk>) -> Vec<Chunk> {
    chunks.sort_unstable();

    let mut merged: Vec<Chunk> = Vec::with_capacity(chunks.len());
    for chunk in chunks {
        match merged.last_mut() {
            Some(current) if chunk.start <= current.end => {
                current.end = current.end.max(chunk.end);
            }
            _ => merged.push(chunk),
        }
    }
    merged
}

/// BAI (BAM Index) structure.
///
/// Immutable once loaded or built; share it behind an `Arc` between readers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BaiIndex {
    /// Index data for each reference sequence
    pub references: Vec<ReferenceIndex>,
    /// Number of unplaced unmapped reads (optional trailing field)
    pub n_no_coor: Option<u64>,
}

fn invalid(msg: impl Into<String>) -> BamError {
    BamError::InvalidIndex(msg.into())
}

fn read_bytes<R: Read, const N: usize>(reader: &mut R, what: &str) -> Result<[u8; N]> {
    let mut buf = [0u8; N];
    reader.read_exact(&mut buf).map_err(|e| {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            invalid(format!("truncated index while reading {}", what))
        } else {
            BamError::from(e)
        }
    })?;
    Ok(buf)
}

fn read_count<R: Read>(reader: &mut R, what: &str) -> Result<usize> {
    let value = i32::from_le_bytes(read_bytes(reader, what)?);
    if value < 0 {
        return Err(invalid(format!("negative {}: {}", what, value)));
    }
    Ok(value as usize)
}

fn read_u32<R: Read>(reader: &mut R, what: &str) -> Result<u32> {
    Ok(u32::from_le_bytes(read_bytes(reader, what)?))
}

fn read_u64<R: Read>(reader: &mut R, what: &str) -> Result<u64> {
    Ok(u64::from_le_bytes(read_bytes(reader, what)?))
}

/// The trailing n_no_coor field: absent, or a full 8 bytes.
fn read_optional_u64<R: Read>(reader: &mut R) -> Result<Option<u64>> {
    let mut buf = [0u8; 8];
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e.into()),
        }
    }
    match filled {
        0 => Ok(None),
        8 => Ok(Some(u64::from_le_bytes(buf))),
        n => Err(invalid(format!("truncated n_no_coor ({} of 8 bytes)", n))),
    }
}

fn count_as_i32(count: usize, what: &str) -> Result<[u8; 4]> {
    i32::try_from(count)
        .map(i32::to_le_bytes)
        .map_err(|_| invalid(format!("too many {}: {}", what, count)))
}

impl BaiIndex {
    /// Load a BAI index from a file.
    ///
    /// # Errors
    ///
    /// - [`BamError::FileNotFound`] if the file does not exist
    /// - [`BamError::InvalidIndex`] if the contents are malformed
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => BamError::FileNotFound(path.to_path_buf()),
            _ => BamError::Io(e),
        })?;
        let index = Self::read(&mut BufReader::new(file))?;
        debug!(
            "Loaded BAI index {} ({} references)",
            path.display(),
            index.references.len()
        );
        Ok(index)
    }

    /// Read BAI index from a reader.
    ///
    /// # Format
    ///
    /// ```text
    /// magic[4]     "BAI\1"
    /// n_ref[4]     Number of reference sequences (int32)
    /// For each reference:
    ///   n_bin[4]   Number of bins (int32)
    ///   For each bin:
    ///     bin[4]   Bin number (uint32)
    ///     n_chunk[4] Number of chunks (int32)
    ///     For each chunk:
    ///       chunk_beg[8]  Virtual offset (uint64)
    ///       chunk_end[8]  Virtual offset (uint64)
    ///   n_intv[4]  Number of intervals (int32)
    ///   For each interval:
    ///     ioffset[8] Virtual offset (uint64)
    /// n_no_coor[8] Optional unplaced unmapped count (uint64)
    /// ```
    pub fn read<R: Read>(reader: &mut R) -> Result<Self> {
        let magic: [u8; 4] = read_bytes(reader, "magic")?;
        if &magic != BAI_MAGIC {
            return Err(invalid(format!(
                "Invalid BAI magic bytes: expected {:?}, got {:?}",
                BAI_MAGIC, magic
            )));
        }

        let n_ref = read_count(reader, "reference count")?;
        let mut references = Vec::with_capacity(n_ref.min(1 << 16));
        for _ in 0..n_ref {
            references.push(Self::read_reference_index(reader)?);
        }

        let n_no_coor = read_optional_u64(reader)?;

        Ok(BaiIndex {
            references,
            n_no_coor,
        })
    }

    fn read_reference_index<R: Read>(reader: &mut R) -> Result<ReferenceIndex> {
        let mut index = ReferenceIndex::new();

        let n_bin = read_count(reader, "bin count")?;
        for _ in 0..n_bin {
            let bin_id = read_u32(reader, "bin number")?;
            let n_chunk = read_count(reader, "chunk count")?;

            if bin_id == METADATA_BIN {
                if n_chunk != 2 {
                    return Err(invalid(format!(
                        "metadata pseudo-bin has {} chunks, expected 2",
                        n_chunk
                    )));
                }
                index.metadata = Some(ReferenceMetadata {
                    start: VirtualOffset::from_raw(read_u64(reader, "metadata")?),
                    end: VirtualOffset::from_raw(read_u64(reader, "metadata")?),
                    mapped: read_u64(reader, "metadata")?,
                    unmapped: read_u64(reader, "metadata")?,
                });
                continue;
            }
            if bin_id > METADATA_BIN {
                return Err(invalid(format!("bin number out of range: {}", bin_id)));
            }

            let chunks = index.bins.entry(bin_id).or_default();
            for _ in 0..n_chunk {
                let start = VirtualOffset::from_raw(read_u64(reader, "chunk start")?);
                let end = VirtualOffset::from_raw(read_u64(reader, "chunk end")?);
                chunks.push(Chunk::new(start, end));
            }
        }

        let n_intv = read_count(reader, "interval count")?;
        index.intervals.reserve(n_intv.min(1 << 16));
        for _ in 0..n_intv {
            index
                .intervals
                .push(VirtualOffset::from_raw(read_u64(reader, "interval")?));
        }

        Ok(index)
    }

    /// Serialize in BAI format.
    pub fn write<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_all(BAI_MAGIC)?;
        writer.write_all(&count_as_i32(self.references.len(), "references")?)?;

        for reference in &self.references {
            let n_bin = reference.bins.len() + usize::from(reference.metadata.is_some());
            writer.write_all(&count_as_i32(n_bin, "bins")?)?;

            for (&bin_id, chunks) in &reference.bins {
                writer.write_all(&bin_id.to_le_bytes())?;
                writer.write_all(&count_as_i32(chunks.len(), "chunks")?)?;
                for chunk in chunks {
                    writer.write_all(&chunk.start.as_raw().to_le_bytes())?;
                    writer.write_all(&chunk.end.as_raw().to_le_bytes())?;
                }
            }

            if let Some(meta) = &reference.metadata {
                writer.write_all(&METADATA_BIN.to_le_bytes())?;
                writer.write_all(&2i32.to_le_bytes())?;
                writer.write_all(&meta.start.as_raw().to_le_bytes())?;
                writer.write_all(&meta.end.as_raw().to_le_bytes())?;
                writer.write_all(&meta.mapped.to_le_bytes())?;
                writer.write_all(&meta.unmapped.to_le_bytes())?;
            }

            writer.write_all(&count_as_i32(reference.intervals.len(), "intervals")?)?;
            for offset in &reference.intervals {
                writer.write_all(&offset.as_raw().to_le_bytes())?;
            }
        }

        if let Some(n) = self.n_no_coor {
            writer.write_all(&n.to_le_bytes())?;
        }
        Ok(())
    }

    /// Save to a file, replacing any existing one.
    pub fn to_path<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path.as_ref())?);
        self.write(&mut writer)?;
        writer.flush()?;
        debug!("Wrote BAI index {}", path.as_ref().display());
        Ok(())
    }

    /// Build an index by scanning every record of a coordinate-sorted BAM.
    ///
    /// The reader is rewound to the first record before the scan.
    ///
    /// # Errors
    ///
    /// [`BamError::InvalidIndex`] if the input is not coordinate-sorted or
    /// a record lies beyond the 512 Mbp BAI range; decoding errors are
    /// passed through.
    pub fn build<R: Read + Seek>(reader: &mut BamReader<R>) -> Result<Self> {
        let mut builder = IndexBuilder::new(reader.header()?.reference_count());
        reader.scan_with_offsets(|record, start, end| builder.add_record(record, start, end))?;
        Ok(builder.finish())
    }

    /// Number of references covered.
    pub fn reference_count(&self) -> usize {
        self.references.len()
    }

    /// Chunks that may contain records overlapping `[start, end)` on
    /// reference `ref_id`.
    ///
    /// Result is sorted and non-overlapping. It may include chunks with no
    /// overlapping record but never omits one that has. Unknown references
    /// and empty ranges give an empty list.
    pub fn query(&self, ref_id: usize, start: i64, end: i64) -> Vec<Chunk> {
        let Some(reference) = self.references.get(ref_id) else {
            return Vec::new();
        };
        if start >= end {
            return Vec::new();
        }

        let mut chunks = Vec::new();
        for bin_id in reg2bins(start, end) {
            if let Some(bin_chunks) = reference.bins.get(&bin_id) {
                chunks.extend_from_slice(bin_chunks);
            }
        }

        let min_offset = reference.min_offset(start);
        chunks.retain(|chunk| chunk.end > min_offset);

        merge_chunks(chunks)
    }
}

/// Single-pass BAI construction from records in file order.
///
/// Feed every record with the virtual offsets where it starts and ends,
/// then call [`IndexBuilder::finish`].
#[derive(Debug)]
pub struct IndexBuilder {
    references: Vec<ReferenceIndex>,
    windows: Vec<Vec<Option<VirtualOffset>>>,
    n_no_coor: u64,
    last_placed: Option<(usize, i32)>,
    seen_unplaced: bool,
}

impl IndexBuilder {
    /// Builder for a header with `reference_count` references.
    pub fn new(reference_count: usize) -> Self {
        Self {
            references: vec![ReferenceIndex::new(); reference_count],
            windows: vec![Vec::new(); reference_count],
            n_no_coor: 0,
            last_placed: None,
            seen_unplaced: false,
        }
    }

    /// Add one record occupying `[start, end)` in the file.
    pub fn add_record(&mut self, record: &Record, start: VirtualOffset, end: VirtualOffset) -> Result<()> {
        let (ref_id, pos) = match (record.reference_id, record.position) {
            (Some(ref_id), Some(pos)) => (ref_id, pos),
            (None, _) => {
                self.seen_unplaced = true;
                self.n_no_coor += 1;
                return Ok(());
            }
            (Some(_), None) => {
                self.n_no_coor += 1;
                return Ok(());
            }
        };

        if ref_id >= self.references.len() {
            return Err(invalid(format!(
                "record {} refers to reference {} but header has {}",
                record.name,
                ref_id,
                self.references.len()
            )));
        }
        if self.seen_unplaced {
            return Err(invalid(format!(
                "input not sorted: placed record {} after unplaced records",
                record.name
            )));
        }
        if let Some((last_ref, last_pos)) = self.last_placed {
            if ref_id < last_ref || (ref_id == last_ref && pos < last_pos) {
                return Err(invalid(format!(
                    "input not sorted: {} at {}:{} follows {}:{}",
                    record.name, ref_id, pos, last_ref, last_pos
                )));
            }
        }
        self.last_placed = Some((ref_id, pos));

        let beg = pos as i64;
        let alignment_end = record.alignment_end().unwrap_or(beg + 1);
        if alignment_end > MAX_POSITION {
            return Err(invalid(format!(
                "record {} ends at {}, beyond the BAI limit of {}",
                record.name, alignment_end, MAX_POSITION
            )));
        }

        let reference = &mut self.references[ref_id];

        let chunks = reference.bins.entry(reg2bin(beg, alignment_end)).or_default();
        match chunks.last_mut() {
            Some(last) if last.end == start => last.end = end,
            _ => chunks.push(Chunk::new(start, end)),
        }

        let windows = &mut self.windows[ref_id];
        let first = (beg >> LINEAR_INDEX_SHIFT) as usize;
        let last = ((alignment_end - 1) >> LINEAR_INDEX_SHIFT) as usize;
        if windows.len() <= last {
            windows.resize(last + 1, None);
        }
        for slot in &mut windows[first..=last] {
            slot.get_or_insert(start);
        }

        let meta = reference.metadata.get_or_insert(ReferenceMetadata {
            start,
            ..ReferenceMetadata::default()
        });
        meta.end = end;
        if record.is_unmapped() {
            meta.unmapped += 1;
        } else {
            meta.mapped += 1;
        }

        Ok(())
    }

    /// Finish the index, back-filling empty linear-index windows.
    pub fn finish(self) -> BaiIndex {
        let references = self
            .references
            .into_iter()
            .zip(self.windows)
            .map(|(mut reference, windows)| {
                let mut previous = VirtualOffset::default();
                reference.intervals = windows
                    .into_iter()
                    .map(|slot| {
                        if let Some(offset) = slot {
                            previous = offset;
                        }
                        previous
                    })
                    .collect();
                reference
            })
            .collect();

        BaiIndex {
            references,
            n_no_coor: Some(self.n_no_coor),
        }
    }
}
