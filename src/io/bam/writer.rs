//! BAM writer.
//!
//! Writes the header on construction, then encodes each record with the
//! same codec the reader decodes with, so a read-then-write cycle is
//! byte-exact at the record level.
//!
//! # Example
//!
//! ```no_run
//! use bamcore::io::bam::{BamWriter, CigarOp, Header, Record, Reference};
//!
//! # fn main() -> bamcore::Result<()> {
//! let header = Header::new(
//!     "@HD\tVN:1.6\tSO:coordinate\n".to_string(),
//!     vec![Reference::new("chr1".to_string(), 248_956_422)],
//! );
//! let mut writer = BamWriter::create("out.bam", header)?;
//!
//! let mut record = Record::new();
//! record.name = "read1".to_string();
//! record.reference_id = Some(0);
//! record.position = Some(1000);
//! record.cigar = vec![CigarOp::Match(4)];
//! record.sequence = b"ACGT".to_vec();
//! record.bin = record.compute_bin();
//!
//! writer.write_record(&record)?;
//! writer.finish()?;
//! # Ok(())
//! # }
//! ```

use super::header::{write_header, Header};
use super::record::{check_reference_ids, encode_record_into, Record};
use crate::error::{BamError, Result};
use crate::io::compression::{BgzfWriter, WriterOptions};
use log::debug;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

/// BAM writer over any byte sink.
///
/// Call [`finish`](BamWriter::finish) to write the EOF marker. Dropping the
/// writer finishes the BGZF stream too, but any error is lost.
pub struct BamWriter<W: Write> {
    bgzf: BgzfWriter<W>,
    header: Header,
    /// Reusable encode buffer
    buffer: Vec<u8>,
    records_written: u64,
}

impl BamWriter<BufWriter<File>> {
    /// Create a BAM file, truncating any existing one.
    pub fn create<P: AsRef<Path>>(path: P, header: Header) -> Result<Self> {
        let path = path.as_ref();
        let file = File::create(path)?;
        debug!("Writing BAM to {}", path.display());
        Self::new(BufWriter::new(file), header)
    }
}

impl<W: Write> BamWriter<W> {
    /// Wrap a sink with default compression options and write the header.
    pub fn new(writer: W, header: Header) -> Result<Self> {
        Self::with_options(writer, header, WriterOptions::default())
    }

    /// Wrap a sink with explicit compression options and write the header.
    ///
    /// # Errors
    ///
    /// [`BamError::InvalidHeader`] if the header cannot be represented.
    pub fn with_options(writer: W, header: Header, options: WriterOptions) -> Result<Self> {
        let mut bgzf = BgzfWriter::with_options(writer, options);
        write_header(&mut bgzf, &header)?;
        Ok(Self {
            bgzf,
            header,
            buffer: Vec::with_capacity(512),
            records_written: 0,
        })
    }

    /// The header written at the start of the file.
    pub fn header(&self) -> &Header {
        &self.header
    }

    /// Number of records written so far.
    pub fn records_written(&self) -> u64 {
        self.records_written
    }

    /// Encode and write one record.
    ///
    /// # Errors
    ///
    /// [`BamError::MalformedRecord`] if the record references an unknown
    /// reference or a field does not fit its binary width. Nothing is
    /// written in that case.
    pub fn write_record(&mut self, record: &Record) -> Result<()> {
        check_reference_ids(record, &self.header)?;
        self.buffer.clear();
        encode_record_into(record, &mut self.buffer)?;
        self.bgzf.write_all(&self.buffer)?;
        self.records_written += 1;
        Ok(())
    }

    /// Close the current BGZF block and flush the sink.
    pub fn flush(&mut self) -> Result<()> {
        self.bgzf.flush().map_err(BamError::from)
    }

    /// Write remaining data and the EOF marker, returning the sink.
    pub fn finish(self) -> Result<W> {
        debug!("Finishing BAM with {} records", self.records_written);
        self.bgzf.finish()
    }
}

impl<W: Write> Write for BamWriter<W> {
    /// Raw passthrough into the BGZF stream, for pre-encoded records.
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.bgzf.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.bgzf.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::bam::cigar::CigarOp;
    use crate::io::bam::header::Reference;
    use crate::io::bam::reader::BamReader;
    use crate::io::bam::tags::TagValue;
    use crate::io::compression::BGZF_EOF;
    use std::io::Cursor;

    fn header() -> Header {
        Header::new(String::new(), vec![Reference::new("chr1".to_string(), 10_000)])
    }

    fn record(name: &str, position: i32) -> Record {
        let mut record = Record::new();
        record.name = name.to_string();
        record.reference_id = Some(0);
        record.position = Some(position);
        record.mapq = Some(30);
        record.cigar = vec![CigarOp::SoftClip(2), CigarOp::Match(6)];
        record.sequence = b"ACGTNACG".to_vec();
        record.quality = vec![30; 8];
        record.tags.insert(*b"NM", TagValue::UInt8(1));
        record.bin = record.compute_bin();
        record
    }

    #[test]
    fn test_write_then_read() {
        let records = vec![record("a", 10), record("b", 20), record("c", 9000)];
        let mut writer = BamWriter::new(Vec::new(), header()).unwrap();
        for r in &records {
            writer.write_record(r).unwrap();
        }
        assert_eq!(writer.records_written(), 3);
        let bytes = writer.finish().unwrap();
        assert_eq!(&bytes[bytes.len() - 28..], &BGZF_EOF);

        let mut reader = BamReader::new(Cursor::new(bytes)).unwrap();
        assert_eq!(reader.header().unwrap(), &header());
        let read: Vec<Record> = reader.records().unwrap().collect::<Result<_>>().unwrap();
        assert_eq!(read, records);
    }

    #[test]
    fn test_rejects_unknown_reference() {
        let mut writer = BamWriter::new(Vec::new(), header()).unwrap();
        let mut bad = record("a", 10);
        bad.reference_id = Some(1);
        assert!(matches!(writer.write_record(&bad), Err(BamError::MalformedRecord(_))));
        assert_eq!(writer.records_written(), 0);

        writer.write_record(&record("b", 10)).unwrap();
        let bytes = writer.finish().unwrap();
        let mut reader = BamReader::new(Cursor::new(bytes)).unwrap();
        let names: Vec<String> = reader.records().unwrap().map(|r| r.unwrap().name).collect();
        assert_eq!(names, vec!["b"]);
    }

    #[test]
    fn test_rejects_bad_header() {
        let header = Header::new(String::new(), vec![Reference::new("chr\u{0}1".to_string(), 10)]);
        assert!(matches!(
            BamWriter::new(Vec::new(), header),
            Err(BamError::InvalidHeader(_))
        ));
    }
}
