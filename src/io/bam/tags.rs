//! BAM optional tags (auxiliary data).
//!
//! Optional tags store additional information about alignments such as:
//! - Edit distance (NM:i)
//! - Alignment score (AS:i)
//! - Read group (RG:Z)
//! - Long-read CIGAR (CG:B,I)
//!
//! # Format
//!
//! Each tag is encoded as:
//! - 2 bytes: tag name (e.g., "NM")
//! - 1 byte: value type (`A c C s S i I f Z H B`)
//! - N bytes: value (format depends on type)
//!
//! Integer tags keep the width they were stored with and floats keep their
//! exact bits, so a parsed tag block re-encodes to the same bytes.
//!
//! A type code outside the table above (or an unknown `B` subtype) cannot be
//! sized, so everything from that tag to the end of the block is kept as a
//! single [`TagValue::Opaque`] value and written back verbatim.

use super::error::DecodeError;

/// Typed array payload of a `B` tag.
#[derive(Debug, Clone, PartialEq)]
pub enum ArrayValue {
    /// `c`
    Int8(Vec<i8>),
    /// `C`
    UInt8(Vec<u8>),
    /// `s`
    Int16(Vec<i16>),
    /// `S`
    UInt16(Vec<u16>),
    /// `i`
    Int32(Vec<i32>),
    /// `I`
    UInt32(Vec<u32>),
    /// `f`
    Float(Vec<f32>),
}

impl ArrayValue {
    /// Element type code.
    pub fn subtype(&self) -> u8 {
        match self {
            ArrayValue::Int8(_) => b'c',
            ArrayValue::UInt8(_) => b'C',
            ArrayValue::Int16(_) => b's',
            ArrayValue::UInt16(_) => b'S',
            ArrayValue::Int32(_) => b'i',
            ArrayValue::UInt32(_) => b'I',
            ArrayValue::Float(_) => b'f',
        }
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        match self {
            ArrayValue::Int8(v) => v.len(),
            ArrayValue::UInt8(v) => v.len(),
            ArrayValue::Int16(v) => v.len(),
            ArrayValue::UInt16(v) => v.len(),
            ArrayValue::Int32(v) => v.len(),
            ArrayValue::UInt32(v) => v.len(),
            ArrayValue::Float(v) => v.len(),
        }
    }

    /// Check if the array has no elements.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A single tag value.
#[derive(Debug, Clone, PartialEq)]
pub enum TagValue {
    /// `A`: printable character
    Char(u8),
    /// `c`
    Int8(i8),
    /// `C`
    UInt8(u8),
    /// `s`
    Int16(i16),
    /// `S`
    UInt16(u16),
    /// `i`
    Int32(i32),
    /// `I`
    UInt32(u32),
    /// `f`
    Float(f32),
    /// `Z`: NUL-terminated string, stored without the terminator
    String(Vec<u8>),
    /// `H`: hex string, stored without the terminator
    Hex(Vec<u8>),
    /// `B`: typed array
    Array(ArrayValue),
    /// Unrecognized type code; `data` runs from after the type byte to the
    /// end of the tag block.
    Opaque {
        /// The raw type byte
        type_code: u8,
        /// Undecoded bytes
        data: Vec<u8>,
    },
}

impl TagValue {
    /// BAM type code for this value.
    pub fn type_code(&self) -> u8 {
        match self {
            TagValue::Char(_) => b'A',
            TagValue::Int8(_) => b'c',
            TagValue::UInt8(_) => b'C',
            TagValue::Int16(_) => b's',
            TagValue::UInt16(_) => b'S',
            TagValue::Int32(_) => b'i',
            TagValue::UInt32(_) => b'I',
            TagValue::Float(_) => b'f',
            TagValue::String(_) => b'Z',
            TagValue::Hex(_) => b'H',
            TagValue::Array(_) => b'B',
            TagValue::Opaque { type_code, .. } => *type_code,
        }
    }

    /// Integer value of any integer width.
    pub fn as_int(&self) -> Option<i64> {
        match *self {
            TagValue::Int8(v) => Some(v as i64),
            TagValue::UInt8(v) => Some(v as i64),
            TagValue::Int16(v) => Some(v as i64),
            TagValue::UInt16(v) => Some(v as i64),
            TagValue::Int32(v) => Some(v as i64),
            TagValue::UInt32(v) => Some(v as i64),
            _ => None,
        }
    }
}

/// A named tag.
#[derive(Debug, Clone, PartialEq)]
pub struct Tag {
    /// Two-character tag name
    pub name: [u8; 2],
    /// Typed value
    pub value: TagValue,
}

impl Tag {
    /// Tag name as text (lossy for non-ASCII names).
    pub fn name_str(&self) -> String {
        String::from_utf8_lossy(&self.name).into_owned()
    }
}

/// Container for BAM optional tags, in file order.
///
/// Duplicate names are kept as found; lookups return the first match.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Tags {
    tags: Vec<Tag>,
}

impl Tags {
    /// Create empty tags.
    pub fn new() -> Self {
        Self { tags: Vec::new() }
    }

    /// Parse a complete tag block.
    pub fn parse(data: &[u8]) -> Result<Self, DecodeError> {
        parse_tags(data)
    }

    /// Look up a tag value by name.
    pub fn get(&self, name: &[u8; 2]) -> Option<&TagValue> {
        self.tags.iter().find(|t| &t.name == name).map(|t| &t.value)
    }

    /// Integer tag of any width, widened to `i64`.
    pub fn get_int(&self, name: &[u8; 2]) -> Option<i64> {
        self.get(name).and_then(TagValue::as_int)
    }

    /// `f` tag.
    pub fn get_float(&self, name: &[u8; 2]) -> Option<f32> {
        match self.get(name) {
            Some(TagValue::Float(v)) => Some(*v),
            _ => None,
        }
    }

    /// `Z` or `H` tag as text.
    pub fn get_string(&self, name: &[u8; 2]) -> Option<&str> {
        match self.get(name) {
            Some(TagValue::String(s)) | Some(TagValue::Hex(s)) => std::str::from_utf8(s).ok(),
            _ => None,
        }
    }

    /// `A` tag.
    pub fn get_char(&self, name: &[u8; 2]) -> Option<char> {
        match self.get(name) {
            Some(TagValue::Char(c)) => Some(*c as char),
            _ => None,
        }
    }

    /// `B` tag.
    pub fn get_array(&self, name: &[u8; 2]) -> Option<&ArrayValue> {
        match self.get(name) {
            Some(TagValue::Array(a)) => Some(a),
            _ => None,
        }
    }

    /// Set a tag, replacing the first tag with the same name or appending.
    pub fn insert(&mut self, name: [u8; 2], value: TagValue) {
        match self.tags.iter_mut().find(|t| t.name == name) {
            Some(existing) => existing.value = value,
            None => self.tags.push(Tag { name, value }),
        }
    }

    /// Remove the first tag with this name.
    pub fn remove(&mut self, name: &[u8; 2]) -> Option<TagValue> {
        let idx = self.tags.iter().position(|t| &t.name == name)?;
        Some(self.tags.remove(idx).value)
    }

    /// Iterate tags in order.
    pub fn iter(&self) -> std::slice::Iter<'_, Tag> {
        self.tags.iter()
    }

    /// Check if there are no tags.
    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    /// Number of tags.
    pub fn len(&self) -> usize {
        self.tags.len()
    }

    /// Append the binary tag block to `buf`.
    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        for tag in &self.tags {
            buf.extend_from_slice(&tag.name);
            buf.push(tag.value.type_code());
            encode_value(&tag.value, buf);
        }
    }
}

impl<'a> IntoIterator for &'a Tags {
    type Item = &'a Tag;
    type IntoIter = std::slice::Iter<'a, Tag>;

    fn into_iter(self) -> Self::IntoIter {
        self.tags.iter()
    }
}

impl FromIterator<Tag> for Tags {
    fn from_iter<I: IntoIterator<Item = Tag>>(iter: I) -> Self {
        Self {
            tags: iter.into_iter().collect(),
        }
    }
}

fn take<'a>(data: &'a [u8], cursor: &mut usize, n: usize, tag: [u8; 2]) -> Result<&'a [u8], DecodeError> {
    let end = cursor
        .checked_add(n)
        .filter(|&end| end <= data.len())
        .ok_or(DecodeError::TruncatedTag { tag })?;
    let slice = &data[*cursor..end];
    *cursor = end;
    Ok(slice)
}

fn take_array<const N: usize>(data: &[u8], cursor: &mut usize, tag: [u8; 2]) -> Result<[u8; N], DecodeError> {
    let mut out = [0u8; N];
    out.copy_from_slice(take(data, cursor, N, tag)?);
    Ok(out)
}

fn take_nul_terminated(data: &[u8], cursor: &mut usize, tag: [u8; 2]) -> Result<Vec<u8>, DecodeError> {
    let rest = &data[*cursor..];
    let nul = rest
        .iter()
        .position(|&b| b == 0)
        .ok_or(DecodeError::TruncatedTag { tag })?;
    let value = rest[..nul].to_vec();
    *cursor += nul + 1;
    Ok(value)
}

fn take_elements<T, const N: usize>(
    data: &[u8],
    cursor: &mut usize,
    count: usize,
    tag: [u8; 2],
    convert: fn([u8; N]) -> T,
) -> Result<Vec<T>, DecodeError> {
    let n_bytes = count.checked_mul(N).ok_or(DecodeError::TruncatedTag { tag })?;
    let raw = take(data, cursor, n_bytes, tag)?;
    Ok(raw
        .chunks_exact(N)
        .map(|chunk| {
            let mut bytes = [0u8; N];
            bytes.copy_from_slice(chunk);
            convert(bytes)
        })
        .collect())
}

fn element_size(subtype: u8) -> Option<usize> {
    match subtype {
        b'c' | b'C' => Some(1),
        b's' | b'S' => Some(2),
        b'i' | b'I' | b'f' => Some(4),
        _ => None,
    }
}

/// Parse tags from BAM record data.
///
/// The whole of `data` must be consumed by well-formed tags; anything left
/// over that is too short to hold a tag is a [`DecodeError::TruncatedTag`].
///
/// # Example
///
/// ```
/// use bamcore::io::bam::{parse_tags, TagValue};
///
/// let data = vec![b'N', b'M', b'C', 0x01]; // NM:C:1
/// let tags = parse_tags(&data).unwrap();
/// assert_eq!(tags.get(b"NM"), Some(&TagValue::UInt8(1)));
/// assert_eq!(tags.get_int(b"NM"), Some(1));
/// ```
pub fn parse_tags(data: &[u8]) -> Result<Tags, DecodeError> {
    let mut tags = Vec::new();
    let mut cursor = 0;

    while cursor < data.len() {
        if data.len() - cursor < 3 {
            let mut tag = [0u8; 2];
            let partial = &data[cursor..];
            tag[..partial.len().min(2)].copy_from_slice(&partial[..partial.len().min(2)]);
            return Err(DecodeError::TruncatedTag { tag });
        }

        let name = [data[cursor], data[cursor + 1]];
        let type_code = data[cursor + 2];
        cursor += 3;

        let value = match type_code {
            b'A' => TagValue::Char(take_array::<1>(data, &mut cursor, name)?[0]),
            b'c' => TagValue::Int8(i8::from_le_bytes(take_array(data, &mut cursor, name)?)),
            b'C' => TagValue::UInt8(take_array::<1>(data, &mut cursor, name)?[0]),
            b's' => TagValue::Int16(i16::from_le_bytes(take_array(data, &mut cursor, name)?)),
            b'S' => TagValue::UInt16(u16::from_le_bytes(take_array(data, &mut cursor, name)?)),
            b'i' => TagValue::Int32(i32::from_le_bytes(take_array(data, &mut cursor, name)?)),
            b'I' => TagValue::UInt32(u32::from_le_bytes(take_array(data, &mut cursor, name)?)),
            b'f' => TagValue::Float(f32::from_le_bytes(take_array(data, &mut cursor, name)?)),
            b'Z' => TagValue::String(take_nul_terminated(data, &mut cursor, name)?),
            b'H' => TagValue::Hex(take_nul_terminated(data, &mut cursor, name)?),
            b'B' if data.get(cursor).copied().and_then(element_size).is_some() => {
                let subtype = data[cursor];
                cursor += 1;
                let count = u32::from_le_bytes(take_array(data, &mut cursor, name)?) as usize;
                let array = match subtype {
                    b'c' => ArrayValue::Int8(take_elements(data, &mut cursor, count, name, i8::from_le_bytes)?),
                    b'C' => ArrayValue::UInt8(take_elements(data, &mut cursor, count, name, u8::from_le_bytes)?),
                    b's' => ArrayValue::Int16(take_elements(data, &mut cursor, count, name, i16::from_le_bytes)?),
                    b'S' => ArrayValue::UInt16(take_elements(data, &mut cursor, count, name, u16::from_le_bytes)?),
                    b'i' => ArrayValue::Int32(take_elements(data, &mut cursor, count, name, i32::from_le_bytes)?),
                    b'I' => ArrayValue::UInt32(take_elements(data, &mut cursor, count, name, u32::from_le_bytes)?),
                    _ => ArrayValue::Float(take_elements(data, &mut cursor, count, name, f32::from_le_bytes)?),
                };
                TagValue::Array(array)
            }
            _ => {
                let value = TagValue::Opaque {
                    type_code,
                    data: data[cursor..].to_vec(),
                };
                tags.push(Tag { name, value });
                break;
            }
        };

        tags.push(Tag { name, value });
    }

    Ok(Tags { tags })
}

fn encode_value(value: &TagValue, buf: &mut Vec<u8>) {
    match value {
        TagValue::Char(c) => buf.push(*c),
        TagValue::Int8(v) => buf.extend_from_slice(&v.to_le_bytes()),
        TagValue::UInt8(v) => buf.push(*v),
        TagValue::Int16(v) => buf.extend_from_slice(&v.to_le_bytes()),
        TagValue::UInt16(v) => buf.extend_from_slice(&v.to_le_bytes()),
        TagValue::Int32(v) => buf.extend_from_slice(&v.to_le_bytes()),
        TagValue::UInt32(v) => buf.extend_from_slice(&v.to_le_bytes()),
        TagValue::Float(v) => buf.extend_from_slice(&v.to_le_bytes()),
        TagValue::String(s) | TagValue::Hex(s) => {
            buf.extend_from_slice(s);
            buf.push(0);
        }
        TagValue::Array(array) => {
            buf.push(array.subtype());
            buf.extend_from_slice(&(array.len() as u32).to_le_bytes());
            match array {
                ArrayValue::Int8(v) => v.iter().for_each(|x| buf.extend_from_slice(&x.to_le_bytes())),
                ArrayValue::UInt8(v) => buf.extend_from_slice(v),
                ArrayValue::Int16(v) => v.iter().for_each(|x| buf.extend_from_slice(&x.to_le_bytes())),
                ArrayValue::UInt16(v) => v.iter().for_each(|x| buf.extend_from_slice(&x.to_le_bytes())),
                ArrayValue::Int32(v) => v.iter().for_each(|x| buf.extend_from_slice(&x.to_le_bytes())),
                ArrayValue::UInt32(v) => v.iter().for_each(|x| buf.extend_from_slice(&x.to_le_bytes())),
                ArrayValue::Float(v) => v.iter().for_each(|x| buf.extend_from_slice(&x.to_le_bytes())),
            }
        }
        TagValue::Opaque { data, .. } => buf.extend_from_slice(data),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn encoded(tags: &Tags) -> Vec<u8> {
        let mut buf = Vec::new();
        tags.encode_into(&mut buf);
        buf
    }

    #[test]
    fn test_empty_tags() {
        let tags = parse_tags(&[]).unwrap();
        assert!(tags.is_empty());
        assert_eq!(tags.len(), 0);
        assert!(encoded(&tags).is_empty());
    }

    #[test]
    fn test_parse_scalar_types() {
        let mut data = Vec::new();
        data.extend_from_slice(b"XAAx");
        data.extend_from_slice(b"NMi");
        data.extend_from_slice(&1i32.to_le_bytes());
        data.extend_from_slice(b"XSs");
        data.extend_from_slice(&(-7i16).to_le_bytes());
        data.extend_from_slice(b"XFf");
        data.extend_from_slice(&0.5f32.to_le_bytes());
        data.extend_from_slice(b"RGZgroup1\0");
        data.extend_from_slice(b"XHH1AE3\0");

        let tags = parse_tags(&data).unwrap();
        assert_eq!(tags.len(), 6);
        assert_eq!(tags.get_char(b"XA"), Some('x'));
        assert_eq!(tags.get(b"NM"), Some(&TagValue::Int32(1)));
        assert_eq!(tags.get_int(b"XS"), Some(-7));
        assert_eq!(tags.get_float(b"XF"), Some(0.5));
        assert_eq!(tags.get_string(b"RG"), Some("group1"));
        assert_eq!(tags.get(b"XH"), Some(&TagValue::Hex(b"1AE3".to_vec())));
        assert_eq!(tags.get(b"ZZ"), None);

        assert_eq!(encoded(&tags), data);
    }

    #[test]
    fn test_parse_arrays() {
        let mut data = Vec::new();
        data.extend_from_slice(b"CGBI");
        data.extend_from_slice(&2u32.to_le_bytes());
        data.extend_from_slice(&((5u32 << 4) | 0).to_le_bytes());
        data.extend_from_slice(&((3u32 << 4) | 2).to_le_bytes());
        data.extend_from_slice(b"XBBc");
        data.extend_from_slice(&3u32.to_le_bytes());
        data.extend_from_slice(&[1, 0xFF, 2]);

        let tags = parse_tags(&data).unwrap();
        assert_eq!(
            tags.get_array(b"CG"),
            Some(&ArrayValue::UInt32(vec![80, 50]))
        );
        assert_eq!(tags.get_array(b"XB"), Some(&ArrayValue::Int8(vec![1, -1, 2])));
        assert_eq!(encoded(&tags), data);
    }

    #[test]
    fn test_integer_width_preserved() {
        let data = vec![b'N', b'M', b'C', 0x05, b'A', b'S', b'S', 0x10, 0x00];
        let tags = parse_tags(&data).unwrap();
        assert_eq!(tags.get(b"NM"), Some(&TagValue::UInt8(5)));
        assert_eq!(tags.get(b"AS"), Some(&TagValue::UInt16(16)));
        assert_eq!(encoded(&tags), data);
    }

    #[test]
    fn test_unknown_type_kept_opaque() {
        let mut data = Vec::new();
        data.extend_from_slice(b"NMC\x02");
        data.extend_from_slice(b"XQq\x01\x02\x03\x04\x05");

        let tags = parse_tags(&data).unwrap();
        assert_eq!(tags.len(), 2);
        assert_eq!(
            tags.get(b"XQ"),
            Some(&TagValue::Opaque {
                type_code: b'q',
                data: vec![1, 2, 3, 4, 5]
            })
        );
        assert_eq!(encoded(&tags), data);
    }

    #[test]
    fn test_unknown_array_subtype_kept_opaque() {
        let data = b"XBBq\x01\x00\x00\x00\x09".to_vec();
        let tags = parse_tags(&data).unwrap();
        assert!(matches!(
            tags.get(b"XB"),
            Some(TagValue::Opaque { type_code: b'B', .. })
        ));
        assert_eq!(encoded(&tags), data);
    }

    #[test]
    fn test_truncated_values() {
        assert!(matches!(
            parse_tags(b"NMi\x01\x00"),
            Err(DecodeError::TruncatedTag { tag: [b'N', b'M'] })
        ));
        assert!(matches!(
            parse_tags(b"RGZabc"),
            Err(DecodeError::TruncatedTag { .. })
        ));
        assert!(matches!(
            parse_tags(b"XBBI\x05\x00\x00\x00\x01\x00"),
            Err(DecodeError::TruncatedTag { .. })
        ));
        assert!(matches!(parse_tags(b"NM"), Err(DecodeError::TruncatedTag { .. })));
    }

    #[test]
    fn test_duplicates_and_editing() {
        let data = b"XCC\x01XCC\x02".to_vec();
        let mut tags = parse_tags(&data).unwrap();
        assert_eq!(tags.len(), 2);
        assert_eq!(tags.get_int(b"XC"), Some(1));
        assert_eq!(encoded(&tags), data);

        tags.insert(*b"XC", TagValue::Int32(9));
        assert_eq!(tags.get_int(b"XC"), Some(9));
        assert_eq!(tags.len(), 2);

        tags.insert(*b"RG", TagValue::String(b"g".to_vec()));
        assert_eq!(tags.len(), 3);
        assert_eq!(tags.remove(b"RG"), Some(TagValue::String(b"g".to_vec())));
        assert_eq!(tags.remove(b"RG"), None);
    }

    fn arb_value() -> impl Strategy<Value = TagValue> {
        prop_oneof![
            (0x21u8..0x7F).prop_map(TagValue::Char),
            any::<i8>().prop_map(TagValue::Int8),
            any::<u8>().prop_map(TagValue::UInt8),
            any::<i16>().prop_map(TagValue::Int16),
            any::<u16>().prop_map(TagValue::UInt16),
            any::<i32>().prop_map(TagValue::Int32),
            any::<u32>().prop_map(TagValue::UInt32),
            any::<u32>().prop_map(|bits| TagValue::Float(f32::from_bits(bits))),
            "[ -~]{0,20}".prop_map(|s| TagValue::String(s.into_bytes())),
            "[0-9A-F]{0,20}".prop_map(|s| TagValue::Hex(s.into_bytes())),
            prop::collection::vec(any::<i16>(), 0..10)
                .prop_map(|v| TagValue::Array(ArrayValue::Int16(v))),
            prop::collection::vec(any::<u32>(), 0..10)
                .prop_map(|v| TagValue::Array(ArrayValue::UInt32(v))),
        ]
    }

    proptest! {
        #[test]
        fn prop_tag_block_bytes_survive_parse(
            entries in prop::collection::vec((any::<[u8; 2]>(), arb_value()), 0..8)
        ) {
            let tags: Tags = entries
                .into_iter()
                .map(|(name, value)| Tag { name, value })
                .collect();
            let bytes = encoded(&tags);
            let reparsed = parse_tags(&bytes).unwrap();
            prop_assert_eq!(encoded(&reparsed), bytes);
            prop_assert_eq!(reparsed.len(), tags.len());
        }
    }
}
