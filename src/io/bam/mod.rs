//! Native BAM (Binary Alignment Map) reading, writing and indexing.
//!
//! This module provides:
//! - Header parsing and writing (magic bytes, SAM text, references)
//! - A record codec that round-trips every record byte-for-byte
//! - CIGAR, 4-bit sequence and typed tag decoding
//! - BAI index loading, saving, building and region queries
//! - A streaming reader with sequential and region iteration
//! - A BAM writer and SAM text rendering
//!
//! # Architecture
//!
//! - **Streaming-first**: one record decoded at a time into a reused buffer
//! - **Seekable BGZF**: virtual offsets address any record, see
//!   [`crate::io::compression`]
//! - **Index as data**: a [`BaiIndex`] is immutable once loaded or built and
//!   can be shared between readers behind an `Arc`
//!
//! # Example
//!
//! ```no_run
//! use bamcore::io::bam::BamReader;
//!
//! # fn main() -> bamcore::Result<()> {
//! let mut bam = BamReader::open("alignments.bam")?;
//! if bam.index()?.is_none() {
//!     bam.build_index()?;
//! }
//!
//! for record in bam.query("chr1", 100_000, 200_000)? {
//!     let record = record?;
//!     println!("{} {:?} {}", record.name, record.position, record.strand());
//! }
//! # Ok(())
//! # }
//! ```

pub mod cigar;
pub mod error;
pub mod header;
pub mod index;
pub mod reader;
pub mod record;
pub mod sam;
pub mod sequence;
pub mod tags;
pub mod writer;

// Re-export main types for convenience
pub use cigar::{parse_cigar, CigarOp};
pub use error::DecodeError;
pub use header::{Header, Reference};
pub use index::{BaiIndex, Chunk, IndexBuilder, VirtualOffset};
pub use reader::{BamReader, Records, RegionRecords};
pub use record::{decode_record, encode_record, parse_record, Record};
pub use sequence::decode_sequence;
pub use tags::{parse_tags, ArrayValue, Tag, TagValue, Tags};
pub use writer::BamWriter;
