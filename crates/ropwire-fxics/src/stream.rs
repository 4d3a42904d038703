//! FastTransfer stream elements.
//!
//! A stream is a flat sequence of elements: a marker, or a property tag
//! followed by its value. Values use the FastTransfer encoding, which
//! differs from the ROP encoding in a few places: booleans take two
//! bytes, and strings and binaries carry a `u32` byte length (strings
//! include their terminator).

use ropwire_core::wire::{Reader, Writer};
use ropwire_core::{CodecError, PropertyTag, PropertyType, PropertyValue, TaggedValue};
use serde::Serialize;

use crate::error::FxError;
use crate::marker::{Marker, meta};

/// Largest single value the parser will wait for
pub const MAX_VALUE_SIZE: usize = 0x0100_0000;

/// One stream element
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum FxElement {
    /// Delimiter
    Marker(Marker),
    /// Property or meta-property with its value
    Property(TaggedValue),
}

/// Appends stream elements to a buffer
#[derive(Debug, Default, Clone)]
pub struct FxWriter {
    w: Writer,
}

impl FxWriter {
    /// Empty stream
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes written so far
    #[must_use]
    pub fn len(&self) -> usize {
        self.w.len()
    }

    /// True before anything is written
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.w.is_empty()
    }

    /// Append a marker
    pub fn marker(&mut self, marker: Marker) -> &mut Self {
        self.w.u32(marker.as_u32());
        self
    }

    /// Append a property
    ///
    /// # Errors
    ///
    /// Fails for named properties, or when a binary-only meta-property
    /// carries a non-binary value.
    pub fn property(&mut self, value: &TaggedValue) -> Result<&mut Self, FxError> {
        if value.tag.is_named() {
            return Err(FxError::NamedProperty(value.tag.0));
        }
        if meta::forces_binary(value.tag) {
            let data = value.value.as_binary().ok_or(FxError::UnexpectedProperty {
                tag: value.tag.0,
                context: "binary meta-property",
            })?;
            return Ok(self.meta_binary(value.tag, data));
        }
        self.w.u32(value.tag.0);
        write_value(&mut self.w, &value.value);
        Ok(self)
    }

    /// Append every property in order
    ///
    /// # Errors
    ///
    /// Fails as [`FxWriter::property`] does.
    pub fn properties(&mut self, values: &[TaggedValue]) -> Result<&mut Self, FxError> {
        for value in values {
            self.property(value)?;
        }
        Ok(self)
    }

    /// Append a meta-property whose value is a length-prefixed binary
    pub fn meta_binary(&mut self, tag: PropertyTag, data: &[u8]) -> &mut Self {
        self.w.u32(tag.0);
        write_sized(&mut self.w, data);
        self
    }

    /// Finish the stream
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.w.into_bytes()
    }
}

fn write_sized(w: &mut Writer, data: &[u8]) {
    // Values past u32::MAX cannot be produced by this crate's builders
    w.u32(data.len() as u32).bytes(data);
}

fn string8_bytes(value: &str) -> Vec<u8> {
    let mut w = Writer::new();
    w.string8(value);
    w.into_bytes()
}

/// Encode a value in the FastTransfer encoding
pub fn write_value(w: &mut Writer, value: &PropertyValue) {
    match value {
        PropertyValue::Integer16(v) => {
            w.u16(*v as u16);
        }
        PropertyValue::Integer32(v) => {
            w.u32(*v as u32);
        }
        PropertyValue::Error(v) => {
            w.u32(*v);
        }
        PropertyValue::Boolean(v) => {
            w.u16(u16::from(*v));
        }
        PropertyValue::Integer64(v) => {
            w.u64(*v as u64);
        }
        PropertyValue::SysTime(v) => {
            w.u64(*v);
        }
        PropertyValue::Guid(v) => {
            w.bytes(v);
        }
        PropertyValue::String8(s) => write_sized(w, &string8_bytes(s)),
        PropertyValue::Unicode(s) => write_sized(w, &ropwire_core::wire::unicode_bytes(s)),
        PropertyValue::Binary(b) => write_sized(w, b),
        PropertyValue::MultipleInteger32(values) => {
            w.u32(values.len() as u32);
            for v in values {
                w.u32(*v as u32);
            }
        }
        PropertyValue::MultipleUnicode(values) => {
            w.u32(values.len() as u32);
            for s in values {
                write_sized(w, &ropwire_core::wire::unicode_bytes(s));
            }
        }
        PropertyValue::MultipleBinary(values) => {
            w.u32(values.len() as u32);
            for b in values {
                write_sized(w, b);
            }
        }
    }
}

fn read_sized<'a>(r: &mut Reader<'a>) -> Result<&'a [u8], CodecError> {
    let len = r.u32()? as usize;
    if len > MAX_VALUE_SIZE {
        return Err(CodecError::InvalidValue {
            field: "FastTransfer value length",
            value: len as u64,
        });
    }
    r.bytes(len)
}

fn decode_unicode(bytes: &[u8]) -> Result<String, CodecError> {
    if bytes.len() % 2 != 0 {
        return Err(CodecError::InvalidString);
    }
    let mut units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .collect();
    while units.last() == Some(&0) {
        units.pop();
    }
    String::from_utf16(&units).map_err(|_| CodecError::InvalidString)
}

fn decode_string8(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    bytes[..end].iter().map(|&b| char::from(b)).collect()
}

fn read_count(r: &mut Reader<'_>) -> Result<usize, CodecError> {
    let count = r.u32()? as usize;
    if count > MAX_VALUE_SIZE {
        return Err(CodecError::InvalidValue {
            field: "FastTransfer value count",
            value: count as u64,
        });
    }
    Ok(count)
}

/// Decode a value in the FastTransfer encoding
///
/// # Errors
///
/// Returns [`CodecError::TooShort`] when the input ends inside the value.
pub fn read_value(r: &mut Reader<'_>, prop_type: PropertyType) -> Result<PropertyValue, CodecError> {
    Ok(match prop_type {
        PropertyType::Integer16 => PropertyValue::Integer16(r.u16()? as i16),
        PropertyType::Integer32 => PropertyValue::Integer32(r.u32()? as i32),
        PropertyType::Error => PropertyValue::Error(r.u32()?),
        PropertyType::Boolean => PropertyValue::Boolean(r.u16()? != 0),
        PropertyType::Integer64 => PropertyValue::Integer64(r.u64()? as i64),
        PropertyType::SysTime => PropertyValue::SysTime(r.u64()?),
        PropertyType::Guid => PropertyValue::Guid(r.array()?),
        PropertyType::String8 => PropertyValue::String8(decode_string8(read_sized(r)?)),
        PropertyType::Unicode => PropertyValue::Unicode(decode_unicode(read_sized(r)?)?),
        PropertyType::Binary => PropertyValue::Binary(read_sized(r)?.to_vec()),
        PropertyType::MultipleInteger32 => {
            let count = read_count(r)?;
            PropertyValue::MultipleInteger32(
                (0..count)
                    .map(|_| r.u32().map(|v| v as i32))
                    .collect::<Result<_, _>>()?,
            )
        }
        PropertyType::MultipleUnicode => {
            let count = read_count(r)?;
            PropertyValue::MultipleUnicode(
                (0..count)
                    .map(|_| decode_unicode(read_sized(r)?))
                    .collect::<Result<_, _>>()?,
            )
        }
        PropertyType::MultipleBinary => {
            let count = read_count(r)?;
            PropertyValue::MultipleBinary(
                (0..count)
                    .map(|_| read_sized(r).map(<[u8]>::to_vec))
                    .collect::<Result<_, _>>()?,
            )
        }
    })
}

fn read_element(r: &mut Reader<'_>) -> Result<FxElement, FxError> {
    let raw = r.u32()?;
    if let Some(marker) = Marker::from_u32(raw) {
        return Ok(FxElement::Marker(marker));
    }
    let tag = PropertyTag(raw);
    if tag.is_named() {
        return Err(FxError::NamedProperty(raw));
    }
    let value = if meta::forces_binary(tag) {
        PropertyValue::Binary(read_sized(r)?.to_vec())
    } else {
        read_value(r, tag.prop_type()?)?
    };
    Ok(FxElement::Property(TaggedValue { tag, value }))
}

/// Incremental parser over a stream delivered in arbitrary chunks
///
/// Bytes are buffered until a whole element is available, so an element
/// may straddle any number of chunk boundaries.
#[derive(Debug, Default, Clone)]
pub struct FxParser {
    buf: Vec<u8>,
    pos: usize,
}

impl FxParser {
    /// Parser with nothing buffered
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append the next chunk
    pub fn feed(&mut self, chunk: &[u8]) {
        if self.pos > 0 && self.pos * 2 >= self.buf.len() {
            self.buf.drain(..self.pos);
            self.pos = 0;
        }
        self.buf.extend_from_slice(chunk);
    }

    /// Next complete element, or `None` when more bytes are needed
    ///
    /// # Errors
    ///
    /// Fails when the buffered bytes cannot start a valid element.
    pub fn next_element(&mut self) -> Result<Option<FxElement>, FxError> {
        if self.pos == self.buf.len() {
            return Ok(None);
        }
        let mut r = Reader::new(&self.buf[self.pos..]);
        match read_element(&mut r) {
            Ok(element) => {
                self.pos += r.position();
                Ok(Some(element))
            }
            Err(FxError::Codec(CodecError::TooShort { .. })) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Bytes buffered but not yet returned as elements
    #[must_use]
    pub fn pending(&self) -> usize {
        self.buf.len() - self.pos
    }
}

/// Parse a complete stream
///
/// # Errors
///
/// Fails on a malformed element or when the stream ends inside one.
pub fn parse_all(bytes: &[u8]) -> Result<Vec<FxElement>, FxError> {
    let mut parser = FxParser::new();
    parser.feed(bytes);
    let mut elements = Vec::new();
    while let Some(element) = parser.next_element()? {
        elements.push(element);
    }
    if parser.pending() > 0 {
        return Err(FxError::Incomplete("element"));
    }
    Ok(elements)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ropwire_core::property::tags;

    fn sample() -> Vec<u8> {
        let mut w = FxWriter::new();
        w.marker(Marker::StartMessage);
        w.property(&TaggedValue::new(tags::SUBJECT, PropertyValue::Unicode("Hi".into())))
            .unwrap();
        w.property(&TaggedValue::new(tags::ASSOCIATED, PropertyValue::Boolean(true)))
            .unwrap();
        w.meta_binary(meta::IDSET_GIVEN, &[1, 2, 3]);
        w.marker(Marker::EndMessage);
        w.into_bytes()
    }

    #[test]
    fn test_value_layout() {
        let bytes = sample();
        // marker, then tag + u32 length + "Hi\0" in UTF-16
        assert_eq!(&bytes[..4], &0x400C_0003u32.to_le_bytes());
        assert_eq!(&bytes[4..8], &0x0037_001Fu32.to_le_bytes());
        assert_eq!(&bytes[8..12], &6u32.to_le_bytes());
        assert_eq!(&bytes[12..18], &[b'H', 0, b'i', 0, 0, 0]);
        // two-byte boolean
        assert_eq!(&bytes[18..22], &0x67AA_000Bu32.to_le_bytes());
        assert_eq!(&bytes[22..24], &[1, 0]);
    }

    #[test]
    fn test_parse_all() {
        let elements = parse_all(&sample()).unwrap();
        assert_eq!(elements.len(), 5);
        assert_eq!(elements[0], FxElement::Marker(Marker::StartMessage));
        assert_eq!(
            elements[3],
            FxElement::Property(TaggedValue {
                tag: meta::IDSET_GIVEN,
                value: PropertyValue::Binary(vec![1, 2, 3]),
            })
        );
    }

    #[test]
    fn test_parser_byte_at_a_time() {
        let bytes = sample();
        let mut parser = FxParser::new();
        let mut elements = Vec::new();
        for byte in &bytes {
            parser.feed(std::slice::from_ref(byte));
            while let Some(element) = parser.next_element().unwrap() {
                elements.push(element);
            }
        }
        assert_eq!(elements, parse_all(&bytes).unwrap());
        assert_eq!(parser.pending(), 0);
    }

    #[test]
    fn test_truncated_stream_is_incomplete() {
        let bytes = sample();
        assert_eq!(
            parse_all(&bytes[..bytes.len() - 2]),
            Err(FxError::Incomplete("element"))
        );
    }

    #[test]
    fn test_named_property_rejected() {
        let mut w = Writer::new();
        w.u32(0x8001_0003).u32(7);
        assert_eq!(
            parse_all(&w.into_bytes()),
            Err(FxError::NamedProperty(0x8001_0003))
        );
    }

    #[test]
    fn test_multivalued_values() {
        let values = vec![
            TaggedValue::new(PropertyTag(0x1234_0000), PropertyValue::MultipleUnicode(vec!["a".into(), "bc".into()])),
            TaggedValue::new(PropertyTag(0x1235_0000), PropertyValue::MultipleBinary(vec![vec![], vec![9]])),
            TaggedValue::new(PropertyTag(0x1236_0000), PropertyValue::MultipleInteger32(vec![-1, 2])),
            TaggedValue::new(PropertyTag(0x1237_0000), PropertyValue::String8("x".into())),
        ];
        let mut w = FxWriter::new();
        w.properties(&values).unwrap();
        let parsed: Vec<TaggedValue> = parse_all(&w.into_bytes())
            .unwrap()
            .into_iter()
            .map(|e| match e {
                FxElement::Property(tv) => tv,
                FxElement::Marker(m) => panic!("unexpected marker {m:?}"),
            })
            .collect();
        assert_eq!(parsed, values);
    }
}
