//! BAM header parsing.
//!
//! The BAM header consists of:
//! 1. Magic bytes ("BAM\1")
//! 2. SAM header text (null-terminated string)
//! 3. Reference sequence dictionary
//!
//! # Format
//!
//! ```text
//! BAM Header:
//! - 4 bytes: Magic ("BAM\1")
//! - 4 bytes: SAM header text length (l_text, int32)
//! - l_text bytes: SAM header text
//! - 4 bytes: Number of reference sequences (n_ref, int32)
//! - For each reference:
//!   - 4 bytes: Reference name length (l_name, int32, includes null terminator)
//!   - l_name bytes: Reference name (null-terminated)
//!   - 4 bytes: Reference length (int32)
//! ```

use crate::error::{BamError, Result};
use std::borrow::Cow;
use std::io::{self, Read, Write};

/// BAM magic bytes.
pub const BAM_MAGIC: &[u8; 4] = b"BAM\x01";

/// Reference sequence information.
///
/// Each reference sequence (chromosome/contig) has a name and length.
/// These are used to validate alignment positions and convert reference
/// IDs to names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    /// Reference sequence name (e.g., "chr1", "chrM")
    pub name: String,
    /// Reference sequence length in bases
    pub length: u32,
}

impl Reference {
    /// Create a new reference.
    pub fn new(name: String, length: u32) -> Self {
        Self { name, length }
    }
}

/// BAM file header.
///
/// Contains SAM header text and reference sequence information.
/// This metadata is required to interpret BAM records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    /// SAM header text (includes @HD, @SQ, @RG, @PG lines)
    ///
    /// Kept as raw bytes: the text is free-form and need not be UTF-8.
    pub text: Vec<u8>,
    /// Reference sequences (chromosomes/contigs)
    pub references: Vec<Reference>,
}

impl Header {
    /// Create a new header.
    pub fn new(text: impl Into<Vec<u8>>, references: Vec<Reference>) -> Self {
        Self {
            text: text.into(),
            references,
        }
    }

    /// Header text as a string, with invalid UTF-8 replaced.
    pub fn text_str(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.text)
    }

    /// Get reference by ID.
    ///
    /// Returns `None` if the reference ID is out of bounds.
    pub fn reference(&self, id: usize) -> Option<&Reference> {
        self.references.get(id)
    }

    /// Get reference name by ID.
    ///
    /// Returns `None` if the reference ID is out of bounds.
    pub fn reference_name(&self, id: usize) -> Option<&str> {
        self.reference(id).map(|r| r.name.as_str())
    }

    /// Get number of reference sequences.
    pub fn reference_count(&self) -> usize {
        self.references.len()
    }

    /// Find the ID of a reference by name.
    pub fn reference_id(&self, name: &str) -> Option<usize> {
        self.references.iter().position(|r| r.name == name)
    }
}

/// `read_exact` that reports a short read as a malformed header.
fn read_field<R: Read>(reader: &mut R, buf: &mut [u8], what: &str) -> Result<()> {
    reader.read_exact(buf).map_err(|e| {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            BamError::InvalidHeader(format!("file ends inside {}", what))
        } else {
            BamError::from(e)
        }
    })
}

/// Read `len` bytes, growing the buffer only as data arrives.
fn read_vec_field<R: Read>(reader: &mut R, len: usize, what: &str) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    reader.by_ref().take(len as u64).read_to_end(&mut bytes)?;
    if bytes.len() < len {
        return Err(BamError::InvalidHeader(format!("file ends inside {}", what)));
    }
    Ok(bytes)
}

fn read_i32_field<R: Read>(reader: &mut R, what: &str) -> Result<i32> {
    let mut bytes = [0u8; 4];
    read_field(reader, &mut bytes, what)?;
    Ok(i32::from_le_bytes(bytes))
}

/// Read and validate BAM magic bytes.
///
/// The first 4 bytes of a BAM file must be "BAM\1".
pub fn read_magic<R: Read>(reader: &mut R) -> Result<()> {
    let mut magic = [0u8; 4];
    read_field(reader, &mut magic, "magic")?;

    if &magic != BAM_MAGIC {
        return Err(BamError::InvalidHeader(format!(
            "Invalid BAM magic: expected {:?}, got {:?}",
            BAM_MAGIC, magic
        )));
    }

    Ok(())
}

/// Read SAM header text.
///
/// SAM header text is stored as:
/// - 4 bytes: length (int32)
/// - N bytes: text, returned as-is
pub fn read_header_text<R: Read>(reader: &mut R) -> Result<Vec<u8>> {
    let len = read_i32_field(reader, "header text length")?;
    if len < 0 {
        return Err(BamError::InvalidHeader(format!(
            "Invalid SAM header length: {}",
            len
        )));
    }

    read_vec_field(reader, len as usize, "header text")
}

/// Read a single reference sequence.
///
/// Reference format:
/// - 4 bytes: name length (including null terminator)
/// - N bytes: name (null-terminated)
/// - 4 bytes: sequence length
pub fn read_reference<R: Read>(reader: &mut R) -> Result<Reference> {
    let name_len = read_i32_field(reader, "reference name length")?;
    if name_len <= 0 {
        return Err(BamError::InvalidHeader(format!(
            "Invalid reference name length: {}",
            name_len
        )));
    }

    let mut name_bytes = read_vec_field(reader, name_len as usize, "reference name")?;

    if name_bytes.pop() != Some(0) {
        return Err(BamError::InvalidHeader(
            "Reference name not null-terminated".to_string(),
        ));
    }

    let name = String::from_utf8(name_bytes)
        .map_err(|e| BamError::InvalidHeader(format!("Invalid UTF-8 in reference name: {}", e)))?;

    let length = read_i32_field(reader, "reference length")?;
    if length < 0 {
        return Err(BamError::InvalidHeader(format!(
            "Invalid reference length: {}",
            length
        )));
    }

    Ok(Reference::new(name, length as u32))
}

/// Read all reference sequences.
///
/// Format:
/// - 4 bytes: number of references
/// - For each reference: read_reference()
pub fn read_references<R: Read>(reader: &mut R) -> Result<Vec<Reference>> {
    let count = read_i32_field(reader, "reference count")?;
    if count < 0 {
        return Err(BamError::InvalidHeader(format!(
            "Invalid reference count: {}",
            count
        )));
    }

    // Each reference takes at least 9 bytes, so cap the up-front allocation
    let count = count as usize;
    let mut references = Vec::with_capacity(count.min(1 << 16));

    for i in 0..count {
        let reference = read_reference(reader).map_err(|e| match e {
            BamError::InvalidHeader(msg) => {
                BamError::InvalidHeader(format!("Error reading reference {}: {}", i, msg))
            }
            other => other,
        })?;
        references.push(reference);
    }

    Ok(references)
}

/// Read complete BAM header.
///
/// Reads and validates:
/// - Magic bytes
/// - SAM header text
/// - Reference sequences
///
/// # Errors
///
/// [`BamError::InvalidHeader`] for bad magic or a malformed/truncated
/// header. Errors from the underlying stream (such as a corrupt BGZF block)
/// are passed through unchanged.
///
/// # Example
///
/// ```no_run
/// use bamcore::io::bam::header::read_header;
/// use bamcore::io::BgzfReader;
///
/// # fn main() -> bamcore::Result<()> {
/// let mut reader = BgzfReader::open("alignments.bam")?;
/// let header = read_header(&mut reader)?;
///
/// println!("References: {}", header.reference_count());
/// for (i, ref_seq) in header.references.iter().enumerate() {
///     println!("  {}: {} ({} bp)", i, ref_seq.name, ref_seq.length);
/// }
/// # Ok(())
/// # }
/// ```
pub fn read_header<R: Read>(reader: &mut R) -> Result<Header> {
    read_magic(reader)?;
    let text = read_header_text(reader)?;
    let references = read_references(reader)?;
    Ok(Header::new(text, references))
}

fn len_as_i32(len: usize, what: &str) -> Result<i32> {
    i32::try_from(len).map_err(|_| BamError::InvalidHeader(format!("{} too long: {}", what, len)))
}

/// Serialize a header in BAM binary form.
pub fn write_header<W: Write>(writer: &mut W, header: &Header) -> Result<()> {
    let mut buf = Vec::with_capacity(12 + header.text.len() + header.references.len() * 16);

    buf.extend_from_slice(BAM_MAGIC);
    buf.extend_from_slice(&len_as_i32(header.text.len(), "header text")?.to_le_bytes());
    buf.extend_from_slice(&header.text);
    buf.extend_from_slice(&len_as_i32(header.references.len(), "reference list")?.to_le_bytes());

    for reference in &header.references {
        if reference.name.as_bytes().contains(&0) {
            return Err(BamError::InvalidHeader(format!(
                "Reference name contains NUL: {:?}",
                reference.name
            )));
        }
        let length = i32::try_from(reference.length).map_err(|_| {
            BamError::InvalidHeader(format!(
                "Reference {} length {} exceeds i32",
                reference.name, reference.length
            ))
        })?;
        buf.extend_from_slice(&len_as_i32(reference.name.len() + 1, "reference name")?.to_le_bytes());
        buf.extend_from_slice(reference.name.as_bytes());
        buf.push(0);
        buf.extend_from_slice(&length.to_le_bytes());
    }

    writer.write_all(&buf)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_read_magic_valid() {
        let data = b"BAM\x01extra data";
        let mut cursor = Cursor::new(data);
        assert!(read_magic(&mut cursor).is_ok());
    }

    #[test]
    fn test_read_magic_invalid() {
        let data = b"BAMX";
        let mut cursor = Cursor::new(data);
        assert!(matches!(read_magic(&mut cursor), Err(BamError::InvalidHeader(_))));
    }

    #[test]
    fn test_truncated_header_is_invalid_header() {
        let mut data = Vec::new();
        data.extend_from_slice(b"BAM\x01");
        data.extend_from_slice(&100i32.to_le_bytes());
        data.extend_from_slice(b"@HD");
        let mut cursor = Cursor::new(data);
        assert!(matches!(read_header(&mut cursor), Err(BamError::InvalidHeader(_))));

        let mut cursor = Cursor::new(b"BA".to_vec());
        assert!(matches!(read_header(&mut cursor), Err(BamError::InvalidHeader(_))));
    }

    #[test]
    fn test_negative_counts_rejected() {
        let mut data = Vec::new();
        data.extend_from_slice(b"BAM\x01");
        data.extend_from_slice(&0i32.to_le_bytes());
        data.extend_from_slice(&(-1i32).to_le_bytes());
        let mut cursor = Cursor::new(data);
        assert!(matches!(read_header(&mut cursor), Err(BamError::InvalidHeader(_))));
    }

    #[test]
    fn test_read_header_text_empty() {
        let data = vec![0, 0, 0, 0]; // length 0
        let mut cursor = Cursor::new(data);
        let text = read_header_text(&mut cursor).unwrap();
        assert!(text.is_empty());
    }

    #[test]
    fn test_read_header_text_simple() {
        let mut data = vec![5, 0, 0, 0]; // length 5
        data.extend_from_slice(b"hello");
        let mut cursor = Cursor::new(data);
        let text = read_header_text(&mut cursor).unwrap();
        assert_eq!(text, b"hello");
    }

    #[test]
    fn test_read_reference() {
        // Reference: "chr1" (length 5 including null) = 248956422 bp
        let mut data = vec![5, 0, 0, 0]; // name length = 5
        data.extend_from_slice(b"chr1\0"); // name with null terminator
        data.extend_from_slice(&248956422u32.to_le_bytes()); // length

        let mut cursor = Cursor::new(data);
        let reference = read_reference(&mut cursor).unwrap();
        assert_eq!(reference.name, "chr1");
        assert_eq!(reference.length, 248956422);
    }

    #[test]
    fn test_read_references_empty() {
        let data = vec![0, 0, 0, 0]; // count = 0
        let mut cursor = Cursor::new(data);
        let references = read_references(&mut cursor).unwrap();
        assert_eq!(references.len(), 0);
    }

    #[test]
    fn test_read_references_multiple() {
        let mut data = vec![2, 0, 0, 0]; // count = 2

        // Reference 1: "chr1"
        data.extend_from_slice(&5i32.to_le_bytes()); // name length
        data.extend_from_slice(b"chr1\0");
        data.extend_from_slice(&1000u32.to_le_bytes());

        // Reference 2: "chr2"
        data.extend_from_slice(&5i32.to_le_bytes()); // name length
        data.extend_from_slice(b"chr2\0");
        data.extend_from_slice(&2000u32.to_le_bytes());

        let mut cursor = Cursor::new(data);
        let references = read_references(&mut cursor).unwrap();
        assert_eq!(references.len(), 2);
        assert_eq!(references[0].name, "chr1");
        assert_eq!(references[0].length, 1000);
        assert_eq!(references[1].name, "chr2");
        assert_eq!(references[1].length, 2000);
    }

    #[test]
    fn test_read_full_header() {
        let mut data = Vec::new();

        // Magic
        data.extend_from_slice(b"BAM\x01");

        // SAM header text
        let header_text = "@HD\tVN:1.6\n";
        data.extend_from_slice(&(header_text.len() as i32).to_le_bytes());
        data.extend_from_slice(header_text.as_bytes());

        // References (1 reference)
        data.extend_from_slice(&1i32.to_le_bytes()); // count

        // Reference: "chr1"
        data.extend_from_slice(&5i32.to_le_bytes()); // name length
        data.extend_from_slice(b"chr1\0");
        data.extend_from_slice(&1000u32.to_le_bytes());

        let mut cursor = Cursor::new(data);
        let header = read_header(&mut cursor).unwrap();

        assert_eq!(header.text, b"@HD\tVN:1.6\n");
        assert_eq!(header.references.len(), 1);
        assert_eq!(header.references[0].name, "chr1");
        assert_eq!(header.references[0].length, 1000);
    }

    #[test]
    fn test_header_reference_lookup() {
        let header = Header::new(
            String::from("@HD\tVN:1.6\n"),
            vec![
                Reference::new(String::from("chr1"), 1000),
                Reference::new(String::from("chr2"), 2000),
            ],
        );

        assert_eq!(header.reference_count(), 2);
        assert_eq!(header.reference_name(0), Some("chr1"));
        assert_eq!(header.reference_name(1), Some("chr2"));
        assert_eq!(header.reference_name(2), None);
        assert_eq!(header.reference_id("chr2"), Some(1));
        assert_eq!(header.reference_id("chrX"), None);
    }

    #[test]
    fn test_write_then_read_header() {
        let header = Header::new(
            String::from("@HD\tVN:1.6\tSO:coordinate\n@SQ\tSN:chr1\tLN:1000\n"),
            vec![
                Reference::new(String::from("chr1"), 1000),
                Reference::new(String::from("chr2"), 2000),
            ],
        );

        let mut buf = Vec::new();
        write_header(&mut buf, &header).unwrap();
        assert_eq!(&buf[..4], BAM_MAGIC);

        let parsed = read_header(&mut Cursor::new(buf)).unwrap();
        assert_eq!(parsed, header);
    }

    #[test]
    fn test_non_utf8_text_round_trips() {
        let header = Header::new(
            b"@HD\tVN:1.6\n@CO\tcaf\xe9\n".to_vec(),
            vec![Reference::new(String::from("chr1"), 1000)],
        );
        let mut buf = Vec::new();
        write_header(&mut buf, &header).unwrap();

        let parsed = read_header(&mut Cursor::new(&buf)).unwrap();
        assert_eq!(parsed, header);
        assert_eq!(parsed.text_str(), "@HD\tVN:1.6\n@CO\tcaf\u{fffd}\n");

        let mut rewritten = Vec::new();
        write_header(&mut rewritten, &parsed).unwrap();
        assert_eq!(rewritten, buf);
    }

    #[test]
    fn test_huge_text_length_on_short_stream() {
        let mut data = Vec::new();
        data.extend_from_slice(b"BAM\x01");
        data.extend_from_slice(&i32::MAX.to_le_bytes());
        data.extend_from_slice(b"@HD\tVN:1.6\n");
        assert!(matches!(
            read_header(&mut Cursor::new(data)),
            Err(BamError::InvalidHeader(msg)) if msg.contains("header text")
        ));
    }

    #[test]
    fn test_write_rejects_oversized_reference() {
        let header = Header::new(String::new(), vec![Reference::new(String::from("big"), u32::MAX)]);
        assert!(matches!(
            write_header(&mut Vec::new(), &header),
            Err(BamError::InvalidHeader(_))
        ));
    }
}
