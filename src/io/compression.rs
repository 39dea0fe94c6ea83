//! BGZF (Blocked GNU Zip Format) reading and writing.
//!
//! BAM files are a series of independent gzip members ("blocks"), each
//! holding at most 64 KB of uncompressed data. Because blocks are
//! independent, any byte of the uncompressed stream can be addressed with a
//! [`VirtualOffset`]: the compressed offset of its block in the high 48 bits
//! and the offset within the decompressed block in the low 16 bits.
//!
//! # Block Structure
//!
//! Each BGZF block:
//! - Bytes 0-1: Gzip magic (31, 139)
//! - Byte 2: CM = 8 (deflate)
//! - Byte 3: FLG with FEXTRA (0x04) set
//! - Bytes 4-9: MTIME, XFL, OS
//! - Bytes 10-11: XLEN (extra field length)
//! - Bytes 12+: Extra subfields, including BSIZE
//!   - SI1=66 ('B'), SI2=67 ('C')
//!   - SLEN=2 (2-byte BSIZE field)
//!   - BSIZE (little-endian u16): total block size - 1
//! - Raw deflate data
//! - CRC32 and ISIZE of the uncompressed data
//!
//! A file ends with a fixed 28-byte empty block, [`BGZF_EOF`].
//!
//! # Parallel Compression
//!
//! [`BgzfWriter`] collects up to [`PARALLEL_BLOCK_COUNT`] full blocks and
//! compresses them together with rayon, writing them out in order. Memory
//! stays bounded at roughly `2 × PARALLEL_BLOCK_COUNT × 64 KB`.

use crate::error::{BamError, Result};
use crate::io::bam::index::VirtualOffset;
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use log::{debug, trace, warn};
use rayon::prelude::*;
use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom, Write};
use std::path::Path;

/// Largest BGZF block, compressed or uncompressed.
pub const MAX_BLOCK_SIZE: usize = 64 * 1024;

/// Uncompressed bytes placed in each written block.
///
/// Leaves room for incompressible data to stay under [`MAX_BLOCK_SIZE`]
/// once deflate framing, header and trailer are added.
pub const MAX_BLOCK_DATA: usize = 0xFF00;

/// Number of blocks compressed in parallel by [`BgzfWriter`].
pub const PARALLEL_BLOCK_COUNT: usize = 8;

/// The standard empty block that terminates a BGZF file.
pub const BGZF_EOF: [u8; 28] = [
    31, 139, 8, 4, 0, 0, 0, 0, 0, 255, // Header (10 bytes)
    6, 0, 66, 67, 2, 0, 27, 0, // Extra field with BSIZE=27 (8 bytes)
    3, 0, // Empty deflate block (2 bytes)
    0, 0, 0, 0, // CRC32 (4 bytes)
    0, 0, 0, 0, // ISIZE=0 (4 bytes)
];

const FIXED_HEADER_SIZE: usize = 12;
const TRAILER_SIZE: usize = 8;

/// Seekable BGZF decompressor.
///
/// Reads one block at a time and serves bytes from it. Implements
/// [`std::io::Read`]; errors raised while reading through that trait carry
/// the original [`BamError`] and convert back to it with `?`.
///
/// # Example
///
/// ```no_run
/// use bamcore::io::BgzfReader;
///
/// # fn main() -> bamcore::Result<()> {
/// let mut reader = BgzfReader::open("alignments.bam")?;
/// let mut magic = [0u8; 4];
/// reader.read_bytes(&mut magic)?;
/// let resume = reader.virtual_position();
/// // ... read more, then come back
/// reader.seek(resume)?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct BgzfReader<R> {
    inner: R,
    /// Decompressed data of the current block
    buffer: Vec<u8>,
    /// Read position within `buffer`
    position: usize,
    /// Compressed offset of the current block
    block_offset: u64,
    /// Compressed offset of the block after the current one
    next_block_offset: u64,
    /// Whether `buffer` holds the block at `block_offset`
    loaded: bool,
    /// Scratch space for compressed bytes
    compressed: Vec<u8>,
    last_block_empty: bool,
    warned_missing_eof: bool,
}

impl BgzfReader<BufReader<File>> {
    /// Open a BGZF file.
    ///
    /// # Errors
    ///
    /// [`BamError::FileNotFound`] if the path does not exist.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => BamError::FileNotFound(path.to_path_buf()),
            _ => BamError::Io(e),
        })?;
        debug!("Opened BGZF file {}", path.display());
        Ok(Self::new(BufReader::new(file)))
    }
}

impl<R> BgzfReader<R> {
    /// Wrap a stream positioned at the start of a BGZF block.
    ///
    /// Offsets are counted from the stream's current position, so pass a
    /// stream at offset 0 if virtual offsets are to match the file.
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            buffer: Vec::with_capacity(MAX_BLOCK_SIZE),
            position: 0,
            block_offset: 0,
            next_block_offset: 0,
            loaded: false,
            compressed: Vec::with_capacity(MAX_BLOCK_SIZE),
            last_block_empty: false,
            warned_missing_eof: false,
        }
    }

    /// Virtual offset of the next byte to be read.
    ///
    /// Once a block is exhausted this is the start of the next block, so
    /// the offset recorded after a record equals the one before the next.
    pub fn virtual_position(&self) -> VirtualOffset {
        if self.position < self.buffer.len() {
            VirtualOffset::new(self.block_offset, self.position as u16)
        } else {
            VirtualOffset::new(self.next_block_offset, 0)
        }
    }

    /// Get a reference to the underlying stream.
    pub fn get_ref(&self) -> &R {
        &self.inner
    }

    /// Unwrap the underlying stream.
    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read> BgzfReader<R> {
    /// Fill `compressed` with `len` bytes from the underlying stream.
    ///
    /// Returns fewer than `len` only at end of stream.
    fn read_compressed(&mut self, len: usize) -> Result<usize> {
        self.compressed.resize(len, 0);
        let mut filled = 0;
        while filled < len {
            match self.inner.read(&mut self.compressed[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(BamError::Io(e)),
            }
        }
        Ok(filled)
    }

    /// Read and inflate the block at `next_block_offset`.
    ///
    /// Returns `false` at a clean end of stream.
    fn read_raw_block(&mut self) -> Result<bool> {
        let offset = self.next_block_offset;
        let corrupt = |reason: String| BamError::corrupt_block(offset, reason);

        let got = self.read_compressed(FIXED_HEADER_SIZE)?;
        if got == 0 {
            if !self.last_block_empty && !self.warned_missing_eof {
                warn!("BGZF stream ends at offset {} without an EOF marker block", offset);
                self.warned_missing_eof = true;
            }
            self.buffer.clear();
            self.position = 0;
            self.loaded = false;
            return Ok(false);
        }
        if got < FIXED_HEADER_SIZE {
            return Err(corrupt(format!("truncated block header ({} bytes)", got)));
        }

        let header = &self.compressed[..FIXED_HEADER_SIZE];
        if header[0] != 31 || header[1] != 139 {
            return Err(corrupt(format!(
                "invalid gzip magic bytes: expected [31, 139], got [{}, {}]",
                header[0], header[1]
            )));
        }
        if header[2] != 8 {
            return Err(corrupt(format!("unsupported compression method {}", header[2])));
        }
        if header[3] & 0x04 == 0 {
            return Err(corrupt("FEXTRA flag not set; not a BGZF block".to_string()));
        }
        let xlen = u16::from_le_bytes([header[10], header[11]]) as usize;

        if self.read_compressed(xlen)? < xlen {
            return Err(corrupt("truncated extra field".to_string()));
        }
        let bsize = find_bsize(&self.compressed[..xlen])
            .ok_or_else(|| corrupt("missing BC subfield".to_string()))?;

        let block_size = bsize as usize + 1;
        let data_offset = FIXED_HEADER_SIZE + xlen;
        if block_size < data_offset + TRAILER_SIZE {
            return Err(corrupt(format!("impossible block size {}", block_size)));
        }

        let remaining = block_size - data_offset;
        let got = self.read_compressed(remaining)?;
        if got < remaining {
            return Err(corrupt(format!(
                "truncated block: expected {} more bytes, got {}",
                remaining, got
            )));
        }

        let cdata_len = remaining - TRAILER_SIZE;
        let trailer = &self.compressed[cdata_len..remaining];
        let expected_crc = u32::from_le_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);
        let isize = u32::from_le_bytes([trailer[4], trailer[5], trailer[6], trailer[7]]) as usize;
        if isize > MAX_BLOCK_SIZE {
            return Err(corrupt(format!("ISIZE {} exceeds 64 KB", isize)));
        }

        self.buffer.clear();
        DeflateDecoder::new(&self.compressed[..cdata_len])
            .take(isize as u64 + 1)
            .read_to_end(&mut self.buffer)
            .map_err(|e| corrupt(format!("inflate failed: {}", e)))?;

        if self.buffer.len() != isize {
            return Err(corrupt(format!(
                "decompressed {} bytes but ISIZE is {}",
                self.buffer.len(),
                isize
            )));
        }
        let actual_crc = crc32fast::hash(&self.buffer);
        if actual_crc != expected_crc {
            return Err(corrupt(format!(
                "CRC32 mismatch: expected {:#010x}, got {:#010x}",
                expected_crc, actual_crc
            )));
        }

        self.block_offset = offset;
        self.next_block_offset = offset + block_size as u64;
        self.position = 0;
        self.loaded = true;
        self.last_block_empty = isize == 0;
        Ok(true)
    }

    /// Make sure unread bytes are buffered, skipping empty blocks.
    ///
    /// Returns `false` at end of stream.
    fn fill_buffer(&mut self) -> Result<bool> {
        while self.position >= self.buffer.len() {
            if !self.read_raw_block()? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Next run of decompressed bytes, up to the end of the current block.
    ///
    /// The returned bytes count as consumed. `None` at end of stream.
    pub fn read_block(&mut self) -> Result<Option<&[u8]>> {
        if !self.fill_buffer()? {
            return Ok(None);
        }
        let start = self.position;
        self.position = self.buffer.len();
        Ok(Some(&self.buffer[start..]))
    }

    /// Fill `buf` from the decompressed stream.
    ///
    /// Returns the number of bytes read, which is less than `buf.len()`
    /// only at end of stream.
    pub fn read_bytes(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            if !self.fill_buffer()? {
                break;
            }
            let available = &self.buffer[self.position..];
            let n = available.len().min(buf.len() - filled);
            buf[filled..filled + n].copy_from_slice(&available[..n]);
            self.position += n;
            filled += n;
        }
        Ok(filled)
    }
}

impl<R: Read + Seek> BgzfReader<R> {
    /// Seek to a virtual offset.
    ///
    /// Seeking inside the loaded block only moves the cursor. Otherwise the
    /// block at the compressed offset is read (lazily, when the in-block
    /// offset is zero).
    ///
    /// # Errors
    ///
    /// [`BamError::CorruptBlock`] if the target block cannot be read or the
    /// in-block offset lies past its end.
    pub fn seek(&mut self, offset: VirtualOffset) -> Result<()> {
        let coffset = offset.compressed_offset();
        let uoffset = offset.uncompressed_offset() as usize;
        trace!("BGZF seek to {}", offset);

        if !(self.loaded && coffset == self.block_offset) {
            self.inner.seek(SeekFrom::Start(coffset))?;
            self.next_block_offset = coffset;
            self.buffer.clear();
            self.position = 0;
            self.loaded = false;

            if uoffset == 0 {
                return Ok(());
            }
            if !self.read_raw_block()? {
                return Err(BamError::corrupt_block(
                    coffset,
                    format!("seek to {} is past the end of the file", offset),
                ));
            }
        }

        if uoffset > self.buffer.len() {
            return Err(BamError::corrupt_block(
                coffset,
                format!(
                    "in-block offset {} beyond block of {} bytes",
                    uoffset,
                    self.buffer.len()
                ),
            ));
        }
        self.position = uoffset;
        Ok(())
    }
}

impl<R: Read> Read for BgzfReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() || !self.fill_buffer()? {
            return Ok(0);
        }
        let available = &self.buffer[self.position..];
        let n = available.len().min(buf.len());
        buf[..n].copy_from_slice(&available[..n]);
        self.position += n;
        Ok(n)
    }
}

/// Find BSIZE in the gzip extra field.
fn find_bsize(extra: &[u8]) -> Option<u16> {
    let mut pos = 0;
    while pos + 4 <= extra.len() {
        let si1 = extra[pos];
        let si2 = extra[pos + 1];
        let slen = u16::from_le_bytes([extra[pos + 2], extra[pos + 3]]) as usize;

        if si1 == 66 && si2 == 67 && slen == 2 && pos + 6 <= extra.len() {
            return Some(u16::from_le_bytes([extra[pos + 4], extra[pos + 5]]));
        }

        pos += 4 + slen;
    }
    None
}

/// Compress a single block to BGZF format
///
/// Standard gzip header (10 bytes):
/// - ID1=31, ID2=139 (gzip magic)
/// - CM=8 (deflate)
/// - FLG=4 (FEXTRA flag set)
/// - MTIME=0 (no timestamp)
/// - XFL=0
/// - OS=255 (unknown)
///
/// Extra field (8 bytes): XLEN=6, SI1='B', SI2='C', SLEN=2, BSIZE
///
/// Compressed data + CRC32 + ISIZE
fn compress_block(data: &[u8], level: Compression) -> io::Result<Vec<u8>> {
    let mut deflate = DeflateEncoder::new(Vec::with_capacity(data.len() / 2 + 64), level);
    deflate.write_all(data)?;
    let deflated = deflate.finish()?;

    let total_size = FIXED_HEADER_SIZE + 6 + deflated.len() + TRAILER_SIZE;
    if total_size > MAX_BLOCK_SIZE {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("compressed block of {} bytes exceeds 64 KB", total_size),
        ));
    }

    let mut block = Vec::with_capacity(total_size);
    block.extend_from_slice(&[31, 139, 8, 4, 0, 0, 0, 0, 0, 255]);
    block.extend_from_slice(&6u16.to_le_bytes()); // XLEN
    block.extend_from_slice(&[66, 67]);
    block.extend_from_slice(&2u16.to_le_bytes()); // SLEN
    block.extend_from_slice(&((total_size - 1) as u16).to_le_bytes());
    block.extend_from_slice(&deflated);
    block.extend_from_slice(&crc32fast::hash(data).to_le_bytes());
    block.extend_from_slice(&(data.len() as u32).to_le_bytes());

    Ok(block)
}

/// Options for [`BgzfWriter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriterOptions {
    /// Deflate level, 0 (store) to 9 (best)
    pub compression_level: u32,
    /// Full blocks collected before compressing them in parallel
    pub parallel_blocks: usize,
}

impl Default for WriterOptions {
    fn default() -> Self {
        Self {
            compression_level: 6,
            parallel_blocks: PARALLEL_BLOCK_COUNT,
        }
    }
}

/// Parallel BGZF writer.
///
/// 1. Buffer input until a block holds [`MAX_BLOCK_DATA`] bytes
/// 2. Queue full blocks until `parallel_blocks` are pending
/// 3. Compress pending blocks in parallel using rayon
/// 4. Write compressed blocks sequentially
///
/// Call [`finish`](BgzfWriter::finish) to append the EOF marker and get the
/// stream back. Dropping an unfinished writer finishes it, ignoring errors.
pub struct BgzfWriter<W: Write> {
    inner: Option<W>,
    level: Compression,
    parallel_blocks: usize,
    /// Current uncompressed block being filled
    current_block: Vec<u8>,
    /// Full uncompressed blocks waiting to be compressed
    pending: Vec<Vec<u8>>,
}

impl<W: Write> BgzfWriter<W> {
    /// Create a writer with default options.
    pub fn new(inner: W) -> Self {
        Self::with_options(inner, WriterOptions::default())
    }

    /// Create a writer with explicit options.
    pub fn with_options(inner: W, options: WriterOptions) -> Self {
        let parallel_blocks = options.parallel_blocks.max(1);
        Self {
            inner: Some(inner),
            level: Compression::new(options.compression_level.min(9)),
            parallel_blocks,
            current_block: Vec::with_capacity(MAX_BLOCK_DATA),
            pending: Vec::with_capacity(parallel_blocks),
        }
    }

    fn inner_mut(&mut self) -> io::Result<&mut W> {
        self.inner
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "BGZF writer already finished"))
    }

    /// Compress and write all pending blocks.
    fn flush_blocks(&mut self) -> io::Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }

        let level = self.level;
        let compressed: Vec<Vec<u8>> = self
            .pending
            .par_iter()
            .map(|block| compress_block(block, level))
            .collect::<io::Result<Vec<_>>>()?;

        let inner = self.inner_mut()?;
        for block in &compressed {
            inner.write_all(block)?;
        }

        self.pending.clear();
        Ok(())
    }

    /// Move the partially filled block (if any) to the pending queue.
    fn close_current_block(&mut self) {
        if !self.current_block.is_empty() {
            let block = std::mem::replace(&mut self.current_block, Vec::with_capacity(MAX_BLOCK_DATA));
            self.pending.push(block);
        }
    }

    /// Write all buffered data, append the EOF marker and return the stream.
    ///
    /// On error the stream is dropped without further writes.
    pub fn finish(mut self) -> Result<W> {
        let result = self.finish_in_place();
        // Detach before returning so Drop does not retry into a failed sink
        let inner = self.inner.take();
        result?;
        inner.ok_or_else(|| BamError::Io(io::Error::new(io::ErrorKind::Other, "BGZF writer already finished")))
    }

    fn finish_in_place(&mut self) -> io::Result<()> {
        self.close_current_block();
        self.flush_blocks()?;
        let inner = self.inner_mut()?;
        inner.write_all(&BGZF_EOF)?;
        inner.flush()
    }
}

impl<W: Write> Write for BgzfWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut remaining = buf;

        while !remaining.is_empty() {
            let space_in_block = MAX_BLOCK_DATA - self.current_block.len();
            let to_copy = remaining.len().min(space_in_block);

            self.current_block.extend_from_slice(&remaining[..to_copy]);
            remaining = &remaining[to_copy..];

            if self.current_block.len() >= MAX_BLOCK_DATA {
                self.close_current_block();
                if self.pending.len() >= self.parallel_blocks {
                    self.flush_blocks()?;
                }
            }
        }

        Ok(buf.len())
    }

    /// Ends the current block early and writes everything buffered.
    fn flush(&mut self) -> io::Result<()> {
        self.close_current_block();
        self.flush_blocks()?;
        self.inner_mut()?.flush()
    }
}

impl<W: Write> Drop for BgzfWriter<W> {
    fn drop(&mut self) {
        if self.inner.is_some() {
            let _ = self.finish_in_place();
        }
    }
}
