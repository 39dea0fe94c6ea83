//! BAM reader with sequential and indexed access.
//!
//! A [`BamReader`] owns a seekable BGZF stream, the decoded header and an
//! optional BAI index. Records are streamed one at a time through a reused
//! buffer, so memory stays constant regardless of file size.
//!
//! # Lifecycle
//!
//! A reader is open once constructed. [`BamReader::close`] drops the
//! stream; every later call returns [`BamError::ClosedHandle`]. Closing
//! twice is fine.
//!
//! # Usage
//!
//! ```no_run
//! use bamcore::io::bam::BamReader;
//!
//! # fn main() -> bamcore::Result<()> {
//! let mut bam = BamReader::open("alignments.bam")?;
//! println!("Header: {} references", bam.header()?.reference_count());
//!
//! for result in bam.records()? {
//!     let record = result?;
//!     println!("{} at {}", record.name, record.position.unwrap_or(-1));
//! }
//!
//! // Needs alignments.bam.bai (or alignments.bai) next to the file
//! for result in bam.query("chr1", 10_000, 20_000)? {
//!     let record = result?;
//!     println!("{} overlaps chr1:10000-20000", record.name);
//! }
//! # Ok(())
//! # }
//! ```

use super::header::{read_header, Header};
use super::index::{BaiIndex, Chunk, VirtualOffset};
use super::record::{decode_record, read_record_bytes, Record};
use crate::error::{BamError, Result};
use crate::io::compression::BgzfReader;
use log::debug;
use std::ffi::OsString;
use std::fs::File;
use std::io::{BufReader, Read, Seek};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::vec;

/// BAM file reader.
///
/// The header is read once during construction; records are then streamed
/// sequentially with [`records`](BamReader::records) or by region with
/// [`query`](BamReader::query).
///
/// # Buffer Reuse
///
/// Maintains an internal buffer that's reused across record reads to avoid
/// repeated allocations. This buffer grows to accommodate the largest record
/// seen, then stays at that size for subsequent reads.
#[derive(Debug)]
pub struct BamReader<R> {
    /// `None` once closed
    inner: Option<Inner<R>>,
    /// Location on disk, when opened from a path
    path: Option<PathBuf>,
}

#[derive(Debug)]
struct Inner<R> {
    bgzf: BgzfReader<R>,
    header: Header,
    index: Option<Arc<BaiIndex>>,
    /// Virtual offset of the first record, just past the header
    first_record: VirtualOffset,
    /// Reusable buffer for raw record bytes
    buffer: Vec<u8>,
}

impl<R: Read> Inner<R> {
    fn read_record(&mut self) -> Result<Option<Record>> {
        if !read_record_bytes(&mut self.bgzf, &mut self.buffer)? {
            return Ok(None);
        }
        decode_record(&self.buffer, &self.header).map(Some)
    }
}

impl<R: Read + Seek> Inner<R> {
    fn rewind(&mut self) -> Result<()> {
        self.bgzf.seek(self.first_record)
    }
}

impl<R> Inner<R> {
    fn install_index(&mut self, index: Arc<BaiIndex>) -> Result<()> {
        if index.reference_count() != self.header.reference_count() {
            return Err(BamError::InvalidIndex(format!(
                "index covers {} references but the header declares {}",
                index.reference_count(),
                self.header.reference_count()
            )));
        }
        self.index = Some(index);
        Ok(())
    }
}

impl BamReader<BufReader<File>> {
    /// Open a BAM file from a path.
    ///
    /// Looks for `<path>.bai`, then `<path without extension>.bai`, and
    /// loads the first one found.
    ///
    /// # Errors
    ///
    /// - [`BamError::FileNotFound`] if the file does not exist
    /// - [`BamError::InvalidHeader`] if the magic or header is malformed
    /// - [`BamError::InvalidIndex`] if a discovered index is malformed
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let bgzf = BgzfReader::open(path)?;
        let mut reader = Self::from_bgzf(bgzf)?;
        reader.path = Some(path.to_path_buf());

        if let Some(index_path) = index_candidates(path).into_iter().find(|p| p.is_file()) {
            debug!("Found index {} for {}", index_path.display(), path.display());
            reader.load_index(&index_path)?;
        }

        Ok(reader)
    }
}

impl<R: Read + Seek> BamReader<R> {
    /// Create a reader over a stream positioned at the start of a BAM file.
    ///
    /// Reads and validates the header immediately. No index is attached;
    /// use [`set_index`](Self::set_index) or [`build_index`](Self::build_index).
    pub fn new(reader: R) -> Result<Self> {
        Self::from_bgzf(BgzfReader::new(reader))
    }

    fn from_bgzf(mut bgzf: BgzfReader<R>) -> Result<Self> {
        // A bad first block means this is not a BAM file at all
        let header = read_header(&mut bgzf).map_err(|e| match e {
            BamError::CorruptBlock { offset: 0, reason } => {
                BamError::InvalidHeader(format!("not a BGZF/BAM file: {}", reason))
            }
            other => other,
        })?;
        let first_record = bgzf.virtual_position();
        debug!(
            "Read BAM header: {} references, {} bytes of text",
            header.reference_count(),
            header.text.len()
        );
        Ok(Self {
            inner: Some(Inner {
                bgzf,
                header,
                index: None,
                first_record,
                buffer: Vec::with_capacity(512),
            }),
            path: None,
        })
    }

    /// Iterate over all records from the start of the file.
    ///
    /// The reader is rewound first, so this can be called repeatedly. A
    /// malformed record or corrupt block is yielded as an error and ends
    /// the iteration.
    pub fn records(&mut self) -> Result<Records<'_, R>> {
        let inner = self.inner_mut()?;
        inner.rewind()?;
        Ok(Records { inner, done: false })
    }

    /// Iterate over records on `reference` overlapping `[start, end)`.
    ///
    /// Coordinates are 0-based, end-exclusive. A record overlaps if it
    /// covers at least one base of the range; records without a CIGAR
    /// cover one base.
    ///
    /// # Errors
    ///
    /// - [`BamError::MissingIndex`] if no index is attached
    /// - [`BamError::UnknownReference`] if `reference` is not in the header
    /// - [`BamError::InvalidRange`] if `start >= end`
    pub fn query(&mut self, reference: &str, start: i64, end: i64) -> Result<RegionRecords<'_, R>> {
        let inner = self.inner_mut()?;
        let index = inner.index.clone().ok_or(BamError::MissingIndex)?;
        let reference_id = inner
            .header
            .reference_id(reference)
            .ok_or_else(|| BamError::UnknownReference(reference.to_string()))?;
        if start >= end {
            return Err(BamError::InvalidRange(format!(
                "{}:{}-{} has start >= end",
                reference, start, end
            )));
        }

        let chunks = index.query(reference_id, start, end);
        debug!(
            "Region {}:{}-{} maps to {} chunks",
            reference,
            start,
            end,
            chunks.len()
        );

        Ok(RegionRecords {
            inner,
            reference_id,
            start,
            end,
            chunks: chunks.into_iter(),
            chunk_end: None,
            done: false,
        })
    }

    /// Build an index by scanning the whole file and attach it.
    pub fn build_index(&mut self) -> Result<()> {
        let index = BaiIndex::build(self)?;
        self.inner_mut()?.install_index(Arc::new(index))
    }

    /// Build an index and save it as `<path>.bai`, returning that path.
    ///
    /// If the file already exists and `overwrite` is false, the existing
    /// index is loaded instead.
    ///
    /// # Errors
    ///
    /// [`BamError::InvalidIndex`] if the reader was not opened from a path.
    pub fn create_index(&mut self, overwrite: bool) -> Result<PathBuf> {
        let path = self.path.clone().ok_or_else(|| {
            BamError::InvalidIndex("cannot place an index for a reader without a path".to_string())
        })?;
        let index_path = appended_bai(&path);

        if index_path.exists() && !overwrite {
            debug!("Keeping existing index {}", index_path.display());
            self.load_index(&index_path)?;
            return Ok(index_path);
        }

        let index = BaiIndex::build(self)?;
        index.to_path(&index_path)?;
        debug!("Wrote index {}", index_path.display());
        self.inner_mut()?.install_index(Arc::new(index))?;
        Ok(index_path)
    }

    /// Walk every record with the virtual offsets where it starts and ends.
    ///
    /// Rewinds to the first record. Stops at the first error, from either
    /// decoding or `f`.
    pub(crate) fn scan_with_offsets<F>(&mut self, mut f: F) -> Result<()>
    where
        F: FnMut(&Record, VirtualOffset, VirtualOffset) -> Result<()>,
    {
        let inner = self.inner_mut()?;
        inner.rewind()?;

        let mut count = 0u64;
        loop {
            let start = inner.bgzf.virtual_position();
            let Some(record) = inner.read_record()? else {
                break;
            };
            let end = inner.bgzf.virtual_position();
            f(&record, start, end)?;
            count += 1;
        }

        debug!("Scanned {} records", count);
        Ok(())
    }
}

impl<R: Read> BamReader<R> {
    /// Read the next record from the current position.
    ///
    /// Returns `Ok(None)` at end of file. Unlike [`records`](Self::records)
    /// this does not rewind.
    pub fn read_record(&mut self) -> Result<Option<Record>> {
        self.inner_mut()?.read_record()
    }
}

impl<R> BamReader<R> {
    fn inner(&self) -> Result<&Inner<R>> {
        self.inner.as_ref().ok_or(BamError::ClosedHandle)
    }

    fn inner_mut(&mut self) -> Result<&mut Inner<R>> {
        self.inner.as_mut().ok_or(BamError::ClosedHandle)
    }

    /// The BAM header.
    pub fn header(&self) -> Result<&Header> {
        Ok(&self.inner()?.header)
    }

    /// The attached index, if any.
    pub fn index(&self) -> Result<Option<&BaiIndex>> {
        Ok(self.inner()?.index.as_deref())
    }

    /// Attach an index, replacing any current one.
    ///
    /// Accepts an `Arc` so one index can be shared by several readers of
    /// the same file.
    ///
    /// # Errors
    ///
    /// [`BamError::InvalidIndex`] if the index covers a different number of
    /// references than the header.
    pub fn set_index(&mut self, index: impl Into<Arc<BaiIndex>>) -> Result<()> {
        self.inner_mut()?.install_index(index.into())
    }

    /// Load a BAI file and attach it.
    pub fn load_index<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let inner = self.inner_mut()?;
        let index = BaiIndex::from_path(path)?;
        inner.install_index(Arc::new(index))
    }

    /// Path the reader was opened from, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.inner.is_none()
    }

    /// Release the underlying stream.
    pub fn close(&mut self) {
        if self.inner.take().is_some() {
            debug!("Closed BAM reader");
        }
    }
}

/// `<path>.bai`
fn appended_bai(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".bai");
    PathBuf::from(name)
}

fn index_candidates(path: &Path) -> Vec<PathBuf> {
    let mut candidates = vec![appended_bai(path)];
    let replaced = path.with_extension("bai");
    if replaced != path {
        candidates.push(replaced);
    }
    candidates
}

/// Iterator over every record in file order.
///
/// Created by [`BamReader::records`].
pub struct Records<'a, R> {
    inner: &'a mut Inner<R>,
    done: bool,
}

impl<'a, R: Read> Iterator for Records<'a, R> {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.inner.read_record() {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

impl<'a, R: Read> std::iter::FusedIterator for Records<'a, R> {}

/// Iterator over the records of one region.
///
/// Created by [`BamReader::query`]. Visits the index chunks in order and
/// yields only records that overlap the region.
pub struct RegionRecords<'a, R> {
    inner: &'a mut Inner<R>,
    reference_id: usize,
    start: i64,
    end: i64,
    chunks: vec::IntoIter<Chunk>,
    /// End of the chunk being read, `None` between chunks
    chunk_end: Option<VirtualOffset>,
    done: bool,
}

impl<'a, R: Read + Seek> RegionRecords<'a, R> {
    fn next_record(&mut self) -> Result<Option<Record>> {
        loop {
            let chunk_end = match self.chunk_end {
                Some(end) => end,
                None => {
                    let Some(chunk) = self.chunks.next() else {
                        return Ok(None);
                    };
                    self.inner.bgzf.seek(chunk.start)?;
                    self.chunk_end = Some(chunk.end);
                    chunk.end
                }
            };

            if self.inner.bgzf.virtual_position() >= chunk_end {
                self.chunk_end = None;
                continue;
            }

            let Some(record) = self.inner.read_record()? else {
                self.chunk_end = None;
                continue;
            };

            if record.reference_id != Some(self.reference_id) {
                continue;
            }
            let (Some(position), Some(alignment_end)) = (record.position, record.alignment_end()) else {
                continue;
            };
            if i64::from(position) >= self.end {
                // Sorted input: nothing later in this chunk can overlap
                self.chunk_end = None;
                continue;
            }
            if alignment_end > self.start {
                return Ok(Some(record));
            }
        }
    }
}

impl<'a, R: Read + Seek> Iterator for RegionRecords<'a, R> {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.next_record() {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

impl<'a, R: Read + Seek> std::iter::FusedIterator for RegionRecords<'a, R> {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::bam::cigar::CigarOp;
    use crate::io::bam::header::Reference;
    use crate::io::bam::writer::BamWriter;
    use std::io::Cursor;

    fn header() -> Header {
        Header::new(
            "@HD\tVN:1.6\tSO:coordinate\n".to_string(),
            vec![Reference::new("chr1".to_string(), 1000), Reference::new("chr2".to_string(), 2000)],
        )
    }

    fn mapped(name: &str, reference_id: usize, position: i32, length: u32) -> Record {
        let mut record = Record::new();
        record.name = name.to_string();
        record.reference_id = Some(reference_id);
        record.position = Some(position);
        record.cigar = vec![CigarOp::Match(length)];
        record.sequence = vec![b'A'; length as usize];
        record.bin = record.compute_bin();
        record
    }

    fn bam_bytes(records: &[Record]) -> Vec<u8> {
        let mut writer = BamWriter::new(Vec::new(), header()).unwrap();
        for record in records {
            writer.write_record(record).unwrap();
        }
        writer.finish().unwrap()
    }

    fn names<I: Iterator<Item = Result<Record>>>(iter: I) -> Vec<String> {
        iter.map(|r| r.unwrap().name).collect()
    }

    #[test]
    fn test_records_rewinds() {
        let bytes = bam_bytes(&[mapped("a", 0, 10, 5), mapped("b", 0, 20, 5)]);
        let mut bam = BamReader::new(Cursor::new(bytes)).unwrap();

        assert_eq!(bam.header().unwrap().reference_count(), 2);
        assert_eq!(names(bam.records().unwrap()), vec!["a", "b"]);
        assert_eq!(names(bam.records().unwrap()), vec!["a", "b"]);
    }

    #[test]
    fn test_read_record_is_sequential() {
        let bytes = bam_bytes(&[mapped("a", 0, 10, 5), mapped("b", 1, 20, 5)]);
        let mut bam = BamReader::new(Cursor::new(bytes)).unwrap();

        assert_eq!(bam.read_record().unwrap().unwrap().name, "a");
        assert_eq!(bam.read_record().unwrap().unwrap().name, "b");
        assert!(bam.read_record().unwrap().is_none());
    }

    #[test]
    fn test_query_scenario() {
        let bytes = bam_bytes(&[mapped("r1", 0, 500, 50)]);
        let mut bam = BamReader::new(Cursor::new(bytes)).unwrap();
        bam.build_index().unwrap();

        assert_eq!(names(bam.query("chr1", 400, 600).unwrap()), vec!["r1"]);
        assert!(names(bam.query("chr1", 600, 1000).unwrap()).is_empty());
        assert!(names(bam.query("chr2", 0, 2000).unwrap()).is_empty());
    }

    #[test]
    fn test_query_boundaries_are_half_open() {
        let bytes = bam_bytes(&[mapped("r1", 0, 100, 10)]);
        let mut bam = BamReader::new(Cursor::new(bytes)).unwrap();
        bam.build_index().unwrap();

        assert!(names(bam.query("chr1", 110, 200).unwrap()).is_empty());
        assert_eq!(names(bam.query("chr1", 109, 200).unwrap()), vec!["r1"]);
        assert!(names(bam.query("chr1", 0, 100).unwrap()).is_empty());
        assert_eq!(names(bam.query("chr1", 0, 101).unwrap()), vec!["r1"]);
    }

    #[test]
    fn test_query_errors() {
        let bytes = bam_bytes(&[mapped("r1", 0, 100, 10)]);
        let mut bam = BamReader::new(Cursor::new(bytes)).unwrap();

        assert!(matches!(bam.query("chr1", 0, 10), Err(BamError::MissingIndex)));

        bam.build_index().unwrap();
        assert!(matches!(
            bam.query("chrX", 0, 10),
            Err(BamError::UnknownReference(name)) if name == "chrX"
        ));
        assert!(matches!(bam.query("chr1", 10, 10), Err(BamError::InvalidRange(_))));
        assert!(matches!(bam.query("chr1", 20, 10), Err(BamError::InvalidRange(_))));
    }

    #[test]
    fn test_set_index_rejects_wrong_reference_count() {
        let bytes = bam_bytes(&[]);
        let mut bam = BamReader::new(Cursor::new(bytes)).unwrap();
        let index = crate::io::bam::index::IndexBuilder::new(5).finish();
        assert!(matches!(bam.set_index(index), Err(BamError::InvalidIndex(_))));
        assert!(bam.index().unwrap().is_none());
    }

    #[test]
    fn test_shared_index() {
        let bytes = bam_bytes(&[mapped("r1", 1, 100, 10)]);
        let mut first = BamReader::new(Cursor::new(bytes.clone())).unwrap();
        first.build_index().unwrap();
        let shared = Arc::new(first.index().unwrap().unwrap().clone());

        let mut second = BamReader::new(Cursor::new(bytes)).unwrap();
        second.set_index(Arc::clone(&shared)).unwrap();
        assert_eq!(names(second.query("chr2", 0, 2000).unwrap()), vec!["r1"]);
    }

    #[test]
    fn test_close_is_idempotent() {
        let bytes = bam_bytes(&[mapped("a", 0, 10, 5)]);
        let mut bam = BamReader::new(Cursor::new(bytes)).unwrap();
        bam.close();
        bam.close();

        assert!(bam.is_closed());
        assert!(matches!(bam.header(), Err(BamError::ClosedHandle)));
        assert!(matches!(bam.index(), Err(BamError::ClosedHandle)));
        assert!(matches!(bam.records(), Err(BamError::ClosedHandle)));
        assert!(matches!(bam.read_record(), Err(BamError::ClosedHandle)));
        assert!(matches!(bam.query("chr1", 0, 10), Err(BamError::ClosedHandle)));
        assert!(matches!(bam.build_index(), Err(BamError::ClosedHandle)));
    }

    #[test]
    fn test_invalid_magic() {
        let mut writer = crate::io::compression::BgzfWriter::new(Vec::new());
        std::io::Write::write_all(&mut writer, b"NOTBAM").unwrap();
        let bytes = writer.finish().unwrap();
        assert!(matches!(
            BamReader::new(Cursor::new(bytes)),
            Err(BamError::InvalidHeader(_))
        ));
    }

    #[test]
    fn test_truncated_record_ends_iteration_with_error() {
        let record = mapped("a", 0, 10, 5);
        let mut raw = Vec::new();
        crate::io::bam::record::encode_record_into(&record, &mut raw).unwrap();

        let mut writer = crate::io::compression::BgzfWriter::new(Vec::new());
        crate::io::bam::header::write_header(&mut writer, &header()).unwrap();
        std::io::Write::write_all(&mut writer, &raw).unwrap();
        std::io::Write::write_all(&mut writer, &raw[..raw.len() - 3]).unwrap();
        let bytes = writer.finish().unwrap();

        let mut bam = BamReader::new(Cursor::new(bytes)).unwrap();
        let mut records = bam.records().unwrap();
        assert!(records.next().unwrap().is_ok());
        assert!(matches!(records.next(), Some(Err(BamError::MalformedRecord(_)))));
        assert!(records.next().is_none());
    }
}
