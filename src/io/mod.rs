//! I/O module: BGZF compression and the BAM format
//!
//! BGZF is the block-compressed container every BAM file lives in; the
//! [`bam`] module layers headers, records and the BAI index on top of it.

pub mod bam;
pub mod compression;

pub use bam::{BamReader, BamWriter};
pub use compression::{BgzfReader, BgzfWriter, WriterOptions};
