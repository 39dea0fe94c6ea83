//! BAM record structure, decoding and encoding.
//!
//! A BAM record represents a single alignment (read mapped to reference).
//! Each record contains alignment information, sequence data, quality scores,
//! and optional tags.
//!
//! # Binary Format
//!
//! ```text
//! BAM Record (binary, little-endian):
//! - block_size (int32): Total record size in bytes (excluding this field)
//! - refID (int32): Reference sequence ID (-1 for unmapped)
//! - pos (int32): 0-based leftmost position (-1 for unmapped)
//! - l_read_name (uint8): Length of read name (includes null terminator)
//! - mapq (uint8): Mapping quality (255 = unavailable)
//! - bin (uint16): BAI index bin (for indexing)
//! - n_cigar_op (uint16): Number of CIGAR operations
//! - flag (uint16): Bitwise FLAGS
//! - l_seq (int32): Sequence length
//! - next_refID (int32): Reference ID of mate/next read
//! - next_pos (int32): Position of mate/next read
//! - tlen (int32): Template length
//! - read_name (char[l_read_name]): Null-terminated read name
//! - cigar (uint32[n_cigar_op]): CIGAR operations
//! - seq (uint8[(l_seq+1)/2]): 4-bit encoded sequence
//! - qual (char[l_seq]): Phred quality scores
//! - tags: Optional tags (variable length)
//! ```
//!
//! Decoding and encoding are exact inverses: every field that affects the
//! bytes (including `bin` and the integer width of each tag) is kept on
//! [`Record`], so `encode(decode(bytes)) == bytes`.

use super::cigar::{self, encode_cigar, parse_cigar, CigarOp};
use super::error::DecodeError;
use super::header::Header;
use super::index::reg2bin;
use super::sequence::{decode_sequence, encode_sequence};
use super::tags::{parse_tags, ArrayValue, TagValue, Tags};
use crate::error::{BamError, Result};
use std::borrow::Cow;
use std::io::{self, Read};

/// Size of the fixed-length part of a record, including block_size.
pub const FIXED_FIELDS_SIZE: usize = 36;

/// Bin assigned to records without a position (`reg2bin(-1, 0)`).
pub const UNPLACED_BIN: u16 = 4680;

/// Largest `block_size` accepted when reading.
///
/// Far above any real record (a 4 Mbp read with qualities is about 10 MiB);
/// anything larger is treated as a corrupt length field.
pub const MAX_RECORD_SIZE: usize = 128 * 1024 * 1024;

/// Flag bits.
pub mod flags {
    /// Template has multiple segments
    pub const PAIRED: u16 = 0x1;
    /// Each segment properly aligned
    pub const PROPER_PAIR: u16 = 0x2;
    /// Segment unmapped
    pub const UNMAPPED: u16 = 0x4;
    /// Next segment unmapped
    pub const MATE_UNMAPPED: u16 = 0x8;
    /// Sequence reverse complemented
    pub const REVERSE: u16 = 0x10;
    /// Next segment reverse complemented
    pub const MATE_REVERSE: u16 = 0x20;
    /// First segment in the template
    pub const FIRST_IN_PAIR: u16 = 0x40;
    /// Last segment in the template
    pub const SECOND_IN_PAIR: u16 = 0x80;
    /// Secondary alignment
    pub const SECONDARY: u16 = 0x100;
    /// Not passing quality controls
    pub const QC_FAIL: u16 = 0x200;
    /// PCR or optical duplicate
    pub const DUPLICATE: u16 = 0x400;
    /// Supplementary alignment
    pub const SUPPLEMENTARY: u16 = 0x800;
}

/// Bounds-checked little-endian reads over a record buffer.
struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take(&mut self, n: usize, context: &'static str) -> std::result::Result<&'a [u8], DecodeError> {
        let available = self.data.len() - self.pos;
        if n > available {
            return Err(DecodeError::Truncated {
                context,
                expected: n,
                actual: available,
            });
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn read_i32(&mut self, context: &'static str) -> std::result::Result<i32, DecodeError> {
        let b = self.take(4, context)?;
        Ok(i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn read_u16(&mut self, context: &'static str) -> std::result::Result<u16, DecodeError> {
        let b = self.take(2, context)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn read_u8(&mut self, context: &'static str) -> std::result::Result<u8, DecodeError> {
        Ok(self.take(1, context)?[0])
    }

    fn remaining(&self) -> &'a [u8] {
        &self.data[self.pos..]
    }
}

/// Validate reference ID per the SAM/BAM format: -1 (unmapped) or >= 0.
fn parse_reference_id(ref_id: i32, field: &'static str) -> std::result::Result<Option<usize>, DecodeError> {
    match ref_id {
        -1 => Ok(None),
        n if n >= 0 => Ok(Some(n as usize)),
        invalid => Err(DecodeError::InvalidReferenceId {
            value: invalid as i64,
            field,
        }),
    }
}

/// Validate position: -1 (unavailable) or >= 0.
fn parse_position(pos: i32, field: &'static str) -> std::result::Result<Option<i32>, DecodeError> {
    match pos {
        -1 => Ok(None),
        n if n >= 0 => Ok(Some(n)),
        invalid => Err(DecodeError::InvalidPosition {
            value: invalid,
            field,
        }),
    }
}

/// BAM alignment record.
///
/// Represents a single read alignment with all associated information.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    /// Read name/query name
    pub name: String,

    /// Reference sequence ID (index into header.references)
    /// None if unmapped (refID = -1)
    pub reference_id: Option<usize>,

    /// 0-based leftmost mapping position
    /// None if unmapped (pos = -1)
    pub position: Option<i32>,

    /// Mapping quality (0-254)
    /// None if unavailable (mapq = 255)
    pub mapq: Option<u8>,

    /// BAI bin as stored in the record
    pub bin: u16,

    /// Bitwise FLAGS (see [`flags`])
    pub flags: u16,

    /// Mate/next segment reference ID
    /// None if unavailable (next_refID = -1)
    pub mate_reference_id: Option<usize>,

    /// Mate/next segment position
    /// None if unavailable (next_pos = -1)
    pub mate_position: Option<i32>,

    /// Template length (TLEN)
    pub template_length: i32,

    /// Sequence bases (ASCII: A, C, G, T, N, etc.)
    pub sequence: Vec<u8>,

    /// Raw Phred quality scores; empty when unavailable
    pub quality: Vec<u8>,

    /// CIGAR operations as stored
    pub cigar: Vec<CigarOp>,

    /// Optional tags
    pub tags: Tags,
}

impl Record {
    /// Create a new empty, unplaced record.
    pub fn new() -> Self {
        Self {
            name: String::new(),
            reference_id: None,
            position: None,
            mapq: None,
            bin: UNPLACED_BIN,
            flags: 0,
            mate_reference_id: None,
            mate_position: None,
            template_length: 0,
            sequence: Vec::new(),
            quality: Vec::new(),
            cigar: Vec::new(),
            tags: Tags::new(),
        }
    }

    fn flag(&self, bit: u16) -> bool {
        self.flags & bit != 0
    }

    /// Check if the read is paired.
    pub fn is_paired(&self) -> bool {
        self.flag(flags::PAIRED)
    }

    /// Check if the read is in a proper pair.
    pub fn is_proper_pair(&self) -> bool {
        self.flag(flags::PROPER_PAIR)
    }

    /// Check if the read is unmapped.
    pub fn is_unmapped(&self) -> bool {
        self.flag(flags::UNMAPPED)
    }

    /// Check if the mate is unmapped.
    pub fn is_mate_unmapped(&self) -> bool {
        self.flag(flags::MATE_UNMAPPED)
    }

    /// Check if the read is a reverse complement.
    pub fn is_reverse_complement(&self) -> bool {
        self.flag(flags::REVERSE)
    }

    /// Check if the mate is a reverse complement.
    pub fn is_mate_reverse_complement(&self) -> bool {
        self.flag(flags::MATE_REVERSE)
    }

    /// Check if the read is the first segment of its template.
    pub fn is_first_in_pair(&self) -> bool {
        self.flag(flags::FIRST_IN_PAIR)
    }

    /// Check if the read is the last segment of its template.
    pub fn is_second_in_pair(&self) -> bool {
        self.flag(flags::SECOND_IN_PAIR)
    }

    /// Check if this is a secondary alignment.
    pub fn is_secondary(&self) -> bool {
        self.flag(flags::SECONDARY)
    }

    /// Check if the read failed quality controls.
    pub fn is_qc_fail(&self) -> bool {
        self.flag(flags::QC_FAIL)
    }

    /// Check if the read is a PCR or optical duplicate.
    pub fn is_duplicate(&self) -> bool {
        self.flag(flags::DUPLICATE)
    }

    /// Check if this is a supplementary alignment.
    pub fn is_supplementary(&self) -> bool {
        self.flag(flags::SUPPLEMENTARY)
    }

    /// `'-'` for reverse strand, `'+'` otherwise.
    pub fn strand(&self) -> char {
        if self.is_reverse_complement() {
            '-'
        } else {
            '+'
        }
    }

    /// `'-'` if the mate is on the reverse strand, `'+'` otherwise.
    pub fn mate_strand(&self) -> char {
        if self.is_mate_reverse_complement() {
            '-'
        } else {
            '+'
        }
    }

    /// Get sequence length.
    pub fn sequence_length(&self) -> usize {
        self.sequence.len()
    }

    /// CIGAR of the alignment, resolving the long-read placeholder.
    ///
    /// Reads with more than 65,535 CIGAR operations are stored with a
    /// two-op placeholder `<l_seq>S<ref_len>N` and the real CIGAR in a
    /// `CG:B,I` tag. When that pattern is present the tag's operations are
    /// returned; otherwise the stored CIGAR is borrowed.
    pub fn effective_cigar(&self) -> std::result::Result<Cow<'_, [CigarOp]>, DecodeError> {
        let placeholder = matches!(
            self.cigar.as_slice(),
            [CigarOp::SoftClip(k), CigarOp::RefSkip(_)] if *k as usize == self.sequence.len()
        );
        if !placeholder {
            return Ok(Cow::Borrowed(&self.cigar));
        }

        let packed: Vec<u32> = match self.tags.get(b"CG") {
            Some(TagValue::Array(ArrayValue::UInt32(values))) => values.clone(),
            Some(TagValue::Array(ArrayValue::Int32(values))) => {
                values.iter().map(|&v| v as u32).collect()
            }
            _ => return Ok(Cow::Borrowed(&self.cigar)),
        };

        packed
            .into_iter()
            .map(CigarOp::from_packed)
            .collect::<std::result::Result<Vec<_>, _>>()
            .map(Cow::Owned)
    }

    /// Number of reference bases covered by the alignment (0 if none).
    pub fn reference_length(&self) -> u64 {
        match self.effective_cigar() {
            Ok(ops) => cigar::reference_length(&ops),
            Err(_) => cigar::reference_length(&self.cigar),
        }
    }

    /// Exclusive 0-based end of the alignment.
    ///
    /// Unmapped reads and reads whose CIGAR consumes no reference still
    /// cover one base at `position`. `None` when there is no position.
    pub fn alignment_end(&self) -> Option<i64> {
        let start = self.position? as i64;
        let span = if self.is_unmapped() {
            0
        } else {
            self.reference_length() as i64
        };
        Some(start + span.max(1))
    }

    /// BAI bin for this record's current position and CIGAR.
    pub fn compute_bin(&self) -> u16 {
        match (self.position, self.alignment_end()) {
            (Some(start), Some(end)) => reg2bin(start as i64, end) as u16,
            _ => UNPLACED_BIN,
        }
    }
}

impl Default for Record {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse a BAM record from binary data.
///
/// # Arguments
///
/// * `data` - Complete record data (including block_size field)
///
/// # Errors
///
/// Returns [`DecodeError`] if:
/// - `block_size + 4` differs from `data.len()`
/// - Any field runs past the end of the record
/// - A reference ID or position is below -1
/// - Sequence padding, CIGAR op codes or tags are malformed
/// - Name is not valid UTF-8
///
/// Reference IDs are not checked against a header here; see [`decode_record`].
pub fn parse_record(data: &[u8]) -> std::result::Result<Record, DecodeError> {
    let mut cursor = Cursor::new(data);

    let block_size = cursor.read_i32("block_size")?;
    if block_size < 0 {
        return Err(DecodeError::InvalidBlockSize { value: block_size });
    }
    let declared = block_size as usize + 4;
    if declared != data.len() {
        return Err(DecodeError::SizeMismatch {
            declared,
            actual: data.len(),
        });
    }
    if data.len() < FIXED_FIELDS_SIZE {
        return Err(DecodeError::Truncated {
            context: "fixed fields",
            expected: FIXED_FIELDS_SIZE,
            actual: data.len(),
        });
    }

    let ref_id = cursor.read_i32("refID")?;
    let pos = cursor.read_i32("pos")?;
    let l_read_name = cursor.read_u8("l_read_name")? as usize;
    let mapq = cursor.read_u8("mapq")?;
    let bin = cursor.read_u16("bin")?;
    let n_cigar_op = cursor.read_u16("n_cigar_op")? as usize;
    let flags = cursor.read_u16("flag")?;
    let l_seq = cursor.read_i32("l_seq")?;
    let next_ref_id = cursor.read_i32("next_refID")?;
    let next_pos = cursor.read_i32("next_pos")?;
    let tlen = cursor.read_i32("tlen")?;

    // BAM format requires l_read_name >= 1 (minimum "\0")
    if l_read_name == 0 {
        return Err(DecodeError::InvalidReadNameLength { length: 0 });
    }
    if l_seq < 0 {
        return Err(DecodeError::NegativeSequenceLength { length: l_seq });
    }
    let l_seq = l_seq as usize;

    let name_offset = cursor.pos;
    let name_bytes = cursor.take(l_read_name, "read name")?;
    let name = match name_bytes.split_last() {
        Some((0, body)) => String::from_utf8(body.to_vec()).map_err(|source| DecodeError::InvalidUtf8 {
            field: "read name",
            source,
        })?,
        _ => {
            return Err(DecodeError::MissingNulTerminator {
                field: "read name",
                offset: name_offset,
            })
        }
    };

    let cigar = parse_cigar(cursor.take(n_cigar_op * 4, "CIGAR")?, n_cigar_op)?;

    let sequence = decode_sequence(cursor.take(l_seq.div_ceil(2), "sequence")?, l_seq)?;

    // BAM format: when quality is omitted but sequence is not, qual is filled with 0xFF bytes
    let quality_bytes = cursor.take(l_seq, "quality")?;
    let quality = if quality_bytes.iter().all(|&b| b == 0xFF) {
        Vec::new()
    } else {
        quality_bytes.to_vec()
    };

    let tags = parse_tags(cursor.remaining())?;

    let record = Record {
        name,
        reference_id: parse_reference_id(ref_id, "read")?,
        position: parse_position(pos, "read")?,
        mapq: if mapq != 255 { Some(mapq) } else { None },
        bin,
        flags,
        mate_reference_id: parse_reference_id(next_ref_id, "mate")?,
        mate_position: parse_position(next_pos, "mate")?,
        template_length: tlen,
        sequence,
        quality,
        cigar,
        tags,
    };

    // A long-read CG tag must hold valid operations
    record.effective_cigar()?;

    Ok(record)
}

pub(crate) fn check_reference_ids(record: &Record, header: &Header) -> std::result::Result<(), DecodeError> {
    let n_ref = header.reference_count();
    for (id, field) in [
        (record.reference_id, "read"),
        (record.mate_reference_id, "mate"),
    ] {
        if let Some(id) = id {
            if id >= n_ref {
                return Err(DecodeError::InvalidReferenceId {
                    value: id as i64,
                    field,
                });
            }
        }
    }
    Ok(())
}

/// Decode a record and check its reference IDs against `header`.
///
/// # Errors
///
/// [`BamError::MalformedRecord`] for any structural problem, including a
/// reference ID at or beyond the header's reference count.
pub fn decode_record(data: &[u8], header: &Header) -> Result<Record> {
    let record = parse_record(data)?;
    check_reference_ids(&record, header)?;
    Ok(record)
}

fn to_i32(value: usize, field: &'static str) -> std::result::Result<i32, DecodeError> {
    i32::try_from(value).map_err(|_| DecodeError::FieldOverflow { field, value })
}

fn encode_reference_id(id: Option<usize>, field: &'static str) -> std::result::Result<i32, DecodeError> {
    id.map_or(Ok(-1), |id| to_i32(id, field))
}

fn encode_position(pos: Option<i32>, field: &'static str) -> std::result::Result<i32, DecodeError> {
    match pos {
        None => Ok(-1),
        Some(p) if p >= 0 => Ok(p),
        Some(p) => Err(DecodeError::InvalidPosition { value: p, field }),
    }
}

/// Append the binary form of `record` (including block_size) to `buf`.
///
/// On error `buf` is left as it was.
pub fn encode_record_into(record: &Record, buf: &mut Vec<u8>) -> std::result::Result<(), DecodeError> {
    let name_len = record.name.len() + 1;
    if name_len > 255 || record.name.as_bytes().contains(&0) {
        return Err(DecodeError::InvalidReadNameLength { length: name_len });
    }
    if record.cigar.len() > u16::MAX as usize {
        return Err(DecodeError::CigarCountOverflow {
            count: record.cigar.len(),
        });
    }
    let l_seq = record.sequence.len();
    if !record.quality.is_empty() && record.quality.len() != l_seq {
        return Err(DecodeError::QualityLengthMismatch {
            sequence: l_seq,
            quality: record.quality.len(),
        });
    }

    let ref_id = encode_reference_id(record.reference_id, "refID")?;
    let next_ref_id = encode_reference_id(record.mate_reference_id, "next_refID")?;
    let pos = encode_position(record.position, "read")?;
    let next_pos = encode_position(record.mate_position, "mate")?;
    let l_seq_i32 = to_i32(l_seq, "l_seq")?;

    let start = buf.len();
    buf.extend_from_slice(&0i32.to_le_bytes()); // block_size, patched below
    buf.extend_from_slice(&ref_id.to_le_bytes());
    buf.extend_from_slice(&pos.to_le_bytes());
    buf.push(name_len as u8);
    buf.push(record.mapq.unwrap_or(255));
    buf.extend_from_slice(&record.bin.to_le_bytes());
    buf.extend_from_slice(&(record.cigar.len() as u16).to_le_bytes());
    buf.extend_from_slice(&record.flags.to_le_bytes());
    buf.extend_from_slice(&l_seq_i32.to_le_bytes());
    buf.extend_from_slice(&next_ref_id.to_le_bytes());
    buf.extend_from_slice(&next_pos.to_le_bytes());
    buf.extend_from_slice(&record.template_length.to_le_bytes());

    buf.extend_from_slice(record.name.as_bytes());
    buf.push(0);

    if let Err(e) = encode_cigar(&record.cigar, buf) {
        buf.truncate(start);
        return Err(e);
    }

    encode_sequence(&record.sequence, buf);

    if record.quality.is_empty() {
        buf.resize(buf.len() + l_seq, 0xFF);
    } else {
        buf.extend_from_slice(&record.quality);
    }

    record.tags.encode_into(buf);

    let block_size = match to_i32(buf.len() - start - 4, "block_size") {
        Ok(size) => size,
        Err(e) => {
            buf.truncate(start);
            return Err(e);
        }
    };
    buf[start..start + 4].copy_from_slice(&block_size.to_le_bytes());

    Ok(())
}

/// Encode a record after checking its reference IDs against `header`.
pub fn encode_record(record: &Record, header: &Header) -> Result<Vec<u8>> {
    check_reference_ids(record, header)?;
    let mut buf = Vec::with_capacity(FIXED_FIELDS_SIZE + record.name.len() + record.sequence.len() * 2);
    encode_record_into(record, &mut buf)?;
    Ok(buf)
}

/// Read until `buf` is full or the stream ends; returns bytes read.
fn read_fully<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Read the raw bytes of the next record (including block_size) into `buf`.
///
/// Returns `Ok(false)` at a clean end of stream. A stream that ends inside
/// a record is a [`BamError::MalformedRecord`], never a silent end.
pub fn read_record_bytes<R: Read>(reader: &mut R, buf: &mut Vec<u8>) -> Result<bool> {
    buf.clear();

    let mut block_size_bytes = [0u8; 4];
    match read_fully(reader, &mut block_size_bytes)? {
        0 => return Ok(false),
        4 => {}
        n => {
            return Err(DecodeError::Truncated {
                context: "block_size",
                expected: 4,
                actual: n,
            }
            .into())
        }
    }

    let block_size = i32::from_le_bytes(block_size_bytes);
    if block_size < 0 || block_size as usize > MAX_RECORD_SIZE {
        return Err(DecodeError::InvalidBlockSize { value: block_size }.into());
    }
    let block_size = block_size as usize;

    // Grow with the data actually present rather than trusting block_size
    buf.extend_from_slice(&block_size_bytes);
    let n = reader.by_ref().take(block_size as u64).read_to_end(buf)?;
    if n < block_size {
        return Err(BamError::MalformedRecord(DecodeError::Truncated {
            context: "record body",
            expected: block_size,
            actual: n,
        }));
    }

    Ok(true)
}

/// Read a single BAM record from a reader.
///
/// # Returns
///
/// - `Ok(Some(record))` - Successfully read a record
/// - `Ok(None)` - EOF (no more records)
/// - `Err(_)` - Truncated or malformed record, or an I/O failure
pub fn read_record<R: Read>(reader: &mut R, header: &Header) -> Result<Option<Record>> {
    let mut buf = Vec::new();
    if !read_record_bytes(reader, &mut buf)? {
        return Ok(None);
    }
    decode_record(&buf, header).map(Some)
}
