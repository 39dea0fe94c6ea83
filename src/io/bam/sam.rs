//! SAM text rendering of BAM records.
//!
//! Produces the 11 mandatory tab-separated columns followed by the
//! optional tags:
//!
//! ```text
//! QNAME FLAG RNAME POS MAPQ CIGAR RNEXT PNEXT TLEN SEQ QUAL [TAG:TYPE:VALUE ...]
//! ```
//!
//! Positions are converted to SAM's 1-based coordinates. Integer tags of
//! every width print as `i`. Opaque tags have no text form and are left out.

use super::cigar::cigar_to_string;
use super::header::Header;
use super::record::Record;
use super::tags::{ArrayValue, Tag, TagValue};
use std::fmt::{self, Display, Write};

/// Render one record as a SAM line, without the trailing newline.
///
/// # Example
///
/// ```
/// use bamcore::io::bam::{sam, CigarOp, Header, Record, Reference};
///
/// let header = Header::new(String::new(), vec![Reference::new("chr1".to_string(), 1000)]);
/// let mut record = Record::new();
/// record.name = "r1".to_string();
/// record.reference_id = Some(0);
/// record.position = Some(99);
/// record.mapq = Some(60);
/// record.cigar = vec![CigarOp::Match(4)];
/// record.sequence = b"ACGT".to_vec();
///
/// assert_eq!(
///     sam::format_record(&record, &header),
///     "r1\t0\tchr1\t100\t60\t4M\t*\t0\t0\tACGT\t*"
/// );
/// ```
pub fn format_record(record: &Record, header: &Header) -> String {
    let mut line = String::with_capacity(64 + record.sequence.len() * 2);
    // Writing into a String cannot fail
    let _ = write_record(&mut line, record, header);
    line
}

fn write_record<W: Write>(out: &mut W, record: &Record, header: &Header) -> fmt::Result {
    let reference_name = |id: Option<usize>| id.and_then(|id| header.reference_name(id)).unwrap_or("*");
    let one_based = |pos: Option<i32>| pos.map_or(0, |p| i64::from(p) + 1);

    let name = if record.name.is_empty() { "*" } else { record.name.as_str() };
    let mate_reference = match record.mate_reference_id {
        Some(id) if record.reference_id == Some(id) => "=",
        other => reference_name(other),
    };

    write!(
        out,
        "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t",
        name,
        record.flags,
        reference_name(record.reference_id),
        one_based(record.position),
        record.mapq.unwrap_or(255),
        cigar_to_string(&record.cigar),
        mate_reference,
        one_based(record.mate_position),
        record.template_length,
    )?;

    if record.sequence.is_empty() {
        out.write_char('*')?;
    } else {
        out.write_str(&String::from_utf8_lossy(&record.sequence))?;
    }
    out.write_char('\t')?;

    if record.quality.is_empty() {
        out.write_char('*')?;
    } else {
        for &q in &record.quality {
            out.write_char(char::from(q.saturating_add(33)))?;
        }
    }

    for tag in record.tags.iter() {
        if matches!(tag.value, TagValue::Opaque { .. }) {
            continue;
        }
        out.write_char('\t')?;
        write_tag(out, tag)?;
    }

    Ok(())
}

fn write_tag<W: Write>(out: &mut W, tag: &Tag) -> fmt::Result {
    let name = String::from_utf8_lossy(&tag.name);
    match &tag.value {
        TagValue::Char(c) => write!(out, "{}:A:{}", name, char::from(*c)),
        TagValue::Float(f) => write!(out, "{}:f:{}", name, f),
        TagValue::String(s) => write!(out, "{}:Z:{}", name, String::from_utf8_lossy(s)),
        TagValue::Hex(h) => write!(out, "{}:H:{}", name, String::from_utf8_lossy(h)),
        TagValue::Array(array) => {
            write!(out, "{}:B:{}", name, char::from(array.subtype()))?;
            match array {
                ArrayValue::Int8(v) => write_elements(out, v),
                ArrayValue::UInt8(v) => write_elements(out, v),
                ArrayValue::Int16(v) => write_elements(out, v),
                ArrayValue::UInt16(v) => write_elements(out, v),
                ArrayValue::Int32(v) => write_elements(out, v),
                ArrayValue::UInt32(v) => write_elements(out, v),
                ArrayValue::Float(v) => write_elements(out, v),
            }
        }
        TagValue::Opaque { .. } => Ok(()),
        integer => match integer.as_int() {
            Some(i) => write!(out, "{}:i:{}", name, i),
            None => Ok(()),
        },
    }
}

fn write_elements<W: Write, T: Display>(out: &mut W, values: &[T]) -> fmt::Result {
    for value in values {
        write!(out, ",{}", value)?;
    }
    Ok(())
}

impl Record {
    /// This record as a SAM line; see [`format_record`].
    pub fn to_sam(&self, header: &Header) -> String {
        format_record(self, header)
    }
}
