//! bamcore: streaming BAM reader, writer and BAI indexer
//!
//! # Overview
//!
//! bamcore reads coordinate-sorted BAM alignment files record by record
//! with constant memory, and uses a BAI index to jump straight to the
//! records overlapping a genomic region.
//!
//! ## Key Features
//!
//! - **Seekable BGZF**: per-block CRC32 checks and virtual offsets
//! - **Byte-exact codec**: decoded records re-encode to the same bytes
//! - **BAI indexes**: load, save, or build one in a single pass
//! - **Parallel compression**: the writer deflates blocks with rayon
//!
//! ## Quick Start
//!
//! ```no_run
//! use bamcore::BamReader;
//!
//! # fn main() -> bamcore::Result<()> {
//! let mut bam = BamReader::open("alignments.bam")?;
//!
//! for record in bam.records()? {
//!     let record = record?;
//!     // Process one record at a time
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Module Organization
//!
//! - [`io`]: BGZF blocks and the BAM format (header, records, index, reader, writer)
//! - [`error`]: Crate error type
//!
//! ## Logging
//!
//! Diagnostics go through the [`log`] facade; install any logger to see them.

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod error;
pub mod io;

// Re-export commonly used types
pub use error::{BamError, Result};
pub use io::bam::{BaiIndex, BamReader, BamWriter, Header, Record, VirtualOffset};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
