//! Typed payload fields.
//!
//! Both generations carry a [`FieldSet`]: a sparse map from field id
//! (1..=32) to a typed [`Value`]. Only the layout differs.
//!
//! Generation 3 (aligned). The frame header's `fieldset` bitmask lists which
//! ids are present (bit `id - 1`); the fields follow in ascending id order:
//!
//! ```text
//! ┌──────────┬──────────┬───────────┬──────────────┬────────────┐
//! │ Type(1B) │ Rsvd(1B) │ Len (2B)  │ Value        │ Zero pad   │
//! │          │ = 0      │ BE        │ (Len bytes)  │ to 4 bytes │
//! └──────────┴──────────┴───────────┴──────────────┴────────────┘
//! ```
//!
//! Generation 2 (packed). Entries carry their own id and a 32-bit length and
//! are never padded:
//!
//! ```text
//! ┌──────────┬──────────┬───────────┬──────────────┐
//! │ Id (1B)  │ Type(1B) │ Len (4B)  │ Value        │
//! │          │          │ BE        │ (Len bytes)  │
//! └──────────┴──────────┴───────────┴──────────────┘
//! ```
//!
//! Compound values (string lists, string maps, nested blocks) use the same
//! layout rules recursively, to at most [`MAX_NESTING`] levels. Every
//! declared length is checked against the remaining buffer; a length that
//! runs past the end is a decode error.

use std::collections::BTreeMap;

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{FrameError, Result};

/// Highest field id a set can carry (one bit per id in a `u32` mask).
pub const MAX_FIELD_ID: u8 = 32;

/// Deepest block nesting accepted on decode. The top-level set is level 0.
pub const MAX_NESTING: usize = 8;

const TYPE_BOOL: u8 = 1;
const TYPE_U8: u8 = 2;
const TYPE_U16: u8 = 3;
const TYPE_U32: u8 = 4;
const TYPE_U64: u8 = 5;
const TYPE_I32: u8 = 6;
const TYPE_I64: u8 = 7;
const TYPE_STR: u8 = 8;
const TYPE_BYTES: u8 = 9;
const TYPE_STR_LIST: u8 = 10;
const TYPE_STR_MAP: u8 = 11;
const TYPE_BLOCK: u8 = 12;
const TYPE_BLOCK_LIST: u8 = 13;

/// Field layout, selected by protocol generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    /// Generation 2: explicit ids, 32-bit lengths, no padding.
    Packed,
    /// Generation 3: ids implied by bitmask, 16-bit lengths, 4-byte alignment.
    Aligned,
}

/// A typed field value.
///
/// Floating values are not a wire type; they travel as scaled integers (see
/// [`crate::fixed`]).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Bool(bool),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    I32(i32),
    I64(i64),
    Str(String),
    Bytes(Bytes),
    StrList(Vec<String>),
    StrMap(Vec<(String, String)>),
    Block(FieldSet),
    BlockList(Vec<FieldSet>),
}

impl Value {
    fn type_tag(&self) -> u8 {
        match self {
            Value::Bool(_) => TYPE_BOOL,
            Value::U8(_) => TYPE_U8,
            Value::U16(_) => TYPE_U16,
            Value::U32(_) => TYPE_U32,
            Value::U64(_) => TYPE_U64,
            Value::I32(_) => TYPE_I32,
            Value::I64(_) => TYPE_I64,
            Value::Str(_) => TYPE_STR,
            Value::Bytes(_) => TYPE_BYTES,
            Value::StrList(_) => TYPE_STR_LIST,
            Value::StrMap(_) => TYPE_STR_MAP,
            Value::Block(_) => TYPE_BLOCK,
            Value::BlockList(_) => TYPE_BLOCK_LIST,
        }
    }

    /// Human-readable type name, used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Bool(_) => "bool",
            Value::U8(_) => "u8",
            Value::U16(_) => "u16",
            Value::U32(_) => "u32",
            Value::U64(_) => "u64",
            Value::I32(_) => "i32",
            Value::I64(_) => "i64",
            Value::Str(_) => "string",
            Value::Bytes(_) => "bytes",
            Value::StrList(_) => "string list",
            Value::StrMap(_) => "string map",
            Value::Block(_) => "block",
            Value::BlockList(_) => "block list",
        }
    }
}

/// A sparse set of typed fields keyed by id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldSet {
    fields: BTreeMap<u8, Value>,
}

macro_rules! scalar_getter {
    ($name:ident, $variant:ident, $ty:ty, $label:literal) => {
        #[doc = concat!("Read an optional ", $label, " field.")]
        pub fn $name(&self, id: u8) -> Result<Option<$ty>> {
            match self.fields.get(&id) {
                None => Ok(None),
                Some(Value::$variant(v)) => Ok(Some(*v)),
                Some(other) => Err(type_error(id, $label, other)),
            }
        }
    };
}

impl FieldSet {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, id: u8, value: Value) -> Self {
        self.insert(id, value);
        self
    }

    /// Insert or replace a field. Ids are validated at encode time.
    pub fn insert(&mut self, id: u8, value: Value) -> Option<Value> {
        self.fields.insert(id, value)
    }

    /// Raw access to a field.
    pub fn get(&self, id: u8) -> Option<&Value> {
        self.fields.get(&id)
    }

    /// Whether `id` is present.
    pub fn contains(&self, id: u8) -> bool {
        self.fields.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Iterate fields in ascending id order.
    pub fn iter(&self) -> impl Iterator<Item = (u8, &Value)> {
        self.fields.iter().map(|(id, v)| (*id, v))
    }

    /// Presence bitmask: bit `id - 1` set for each field.
    pub fn mask(&self) -> Result<u32> {
        let mut mask = 0u32;
        for id in self.fields.keys() {
            check_id(*id)?;
            mask |= 1 << (id - 1);
        }
        Ok(mask)
    }

    scalar_getter!(bool, Bool, bool, "bool");
    scalar_getter!(u8, U8, u8, "u8");
    scalar_getter!(u16, U16, u16, "u16");
    scalar_getter!(u32, U32, u32, "u32");
    scalar_getter!(u64, U64, u64, "u64");
    scalar_getter!(i32, I32, i32, "i32");
    scalar_getter!(i64, I64, i64, "i64");

    /// Read an optional string field.
    pub fn str(&self, id: u8) -> Result<Option<&str>> {
        match self.fields.get(&id) {
            None => Ok(None),
            Some(Value::Str(s)) => Ok(Some(s.as_str())),
            Some(other) => Err(type_error(id, "string", other)),
        }
    }

    /// Read a string field that must be present.
    pub fn require_str(&self, id: u8) -> Result<&str> {
        self.str(id)?.ok_or(FrameError::MissingField(id))
    }

    /// Read an optional byte-string field.
    pub fn bytes(&self, id: u8) -> Result<Option<&Bytes>> {
        match self.fields.get(&id) {
            None => Ok(None),
            Some(Value::Bytes(b)) => Ok(Some(b)),
            Some(other) => Err(type_error(id, "bytes", other)),
        }
    }

    pub fn str_list(&self, id: u8) -> Result<Option<&[String]>> {
        match self.fields.get(&id) {
            None => Ok(None),
            Some(Value::StrList(list)) => Ok(Some(list.as_slice())),
            Some(other) => Err(type_error(id, "string list", other)),
        }
    }

    pub fn str_map(&self, id: u8) -> Result<Option<&[(String, String)]>> {
        match self.fields.get(&id) {
            None => Ok(None),
            Some(Value::StrMap(map)) => Ok(Some(map.as_slice())),
            Some(other) => Err(type_error(id, "string map", other)),
        }
    }

    pub fn block(&self, id: u8) -> Result<Option<&FieldSet>> {
        match self.fields.get(&id) {
            None => Ok(None),
            Some(Value::Block(block)) => Ok(Some(block)),
            Some(other) => Err(type_error(id, "block", other)),
        }
    }

    pub fn block_list(&self, id: u8) -> Result<Option<&[FieldSet]>> {
        match self.fields.get(&id) {
            None => Ok(None),
            Some(Value::BlockList(list)) => Ok(Some(list.as_slice())),
            Some(other) => Err(type_error(id, "block list", other)),
        }
    }
}

fn type_error(id: u8, expected: &'static str, found: &Value) -> FrameError {
    FrameError::FieldType {
        id,
        expected,
        found: found.type_name(),
    }
}

fn check_id(id: u8) -> Result<()> {
    if id == 0 || id > MAX_FIELD_ID {
        return Err(FrameError::InvalidFieldId(id));
    }
    Ok(())
}

/// Number of zero bytes needed to bring `len` to a 4-byte boundary.
pub fn pad_len(len: usize) -> usize {
    (4 - len % 4) % 4
}

fn put_pad(dst: &mut BytesMut, len: usize) {
    dst.put_bytes(0, pad_len(len));
}

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

/// Encode a field set's fields (no leading mask) in the given layout.
pub fn encode_fields(set: &FieldSet, layout: Layout, dst: &mut BytesMut) -> Result<()> {
    for (id, value) in set.iter() {
        check_id(id)?;
        let mut body = BytesMut::new();
        encode_value(value, layout, &mut body)?;
        match layout {
            Layout::Aligned => {
                let len = u16::try_from(body.len()).map_err(|_| FrameError::FrameTooLarge {
                    size: body.len(),
                    max: u16::MAX as usize,
                })?;
                dst.put_u8(value.type_tag());
                dst.put_u8(0);
                dst.put_u16(len);
                dst.put_slice(&body);
                put_pad(dst, body.len());
            }
            Layout::Packed => {
                dst.put_u8(id);
                dst.put_u8(value.type_tag());
                dst.put_u32(len_u32(body.len())?);
                dst.put_slice(&body);
            }
        }
    }
    Ok(())
}

fn len_u32(len: usize) -> Result<u32> {
    u32::try_from(len).map_err(|_| FrameError::FrameTooLarge {
        size: len,
        max: u32::MAX as usize,
    })
}

fn put_string(dst: &mut BytesMut, s: &[u8], layout: Layout) -> Result<()> {
    dst.put_u32(len_u32(s.len())?);
    dst.put_slice(s);
    if layout == Layout::Aligned {
        put_pad(dst, s.len());
    }
    Ok(())
}

fn encode_block(set: &FieldSet, layout: Layout, dst: &mut BytesMut) -> Result<()> {
    if layout == Layout::Aligned {
        dst.put_u32(set.mask()?);
    }
    encode_fields(set, layout, dst)
}

fn encode_value(value: &Value, layout: Layout, dst: &mut BytesMut) -> Result<()> {
    match value {
        Value::Bool(v) => dst.put_u8(u8::from(*v)),
        Value::U8(v) => dst.put_u8(*v),
        Value::U16(v) => dst.put_u16(*v),
        Value::U32(v) => dst.put_u32(*v),
        Value::U64(v) => dst.put_u64(*v),
        Value::I32(v) => dst.put_i32(*v),
        Value::I64(v) => dst.put_i64(*v),
        Value::Str(s) => dst.put_slice(s.as_bytes()),
        Value::Bytes(b) => dst.put_slice(b),
        Value::StrList(list) => {
            dst.put_u32(len_u32(list.len())?);
            for s in list {
                put_string(dst, s.as_bytes(), layout)?;
            }
        }
        Value::StrMap(map) => {
            dst.put_u32(len_u32(map.len())?);
            for (k, v) in map {
                put_string(dst, k.as_bytes(), layout)?;
                put_string(dst, v.as_bytes(), layout)?;
            }
        }
        Value::Block(set) => encode_block(set, layout, dst)?,
        Value::BlockList(list) => {
            dst.put_u32(len_u32(list.len())?);
            for set in list {
                let mut inner = BytesMut::new();
                encode_block(set, layout, &mut inner)?;
                dst.put_u32(len_u32(inner.len())?);
                dst.put_slice(&inner);
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

/// Bounds-checked big-endian reader over a byte slice.
struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if n > self.remaining() {
            return Err(FrameError::Malformed(format!(
                "field length {n} exceeds remaining {} bytes",
                self.remaining()
            )));
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.array::<1>()?[0])
    }

    fn u16(&mut self) -> Result<u16> {
        Ok(u16::from_be_bytes(self.array()?))
    }

    fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_be_bytes(self.array()?))
    }

    /// Consume alignment padding after `len` value bytes; it must be zero.
    fn skip_pad(&mut self, len: usize) -> Result<()> {
        let pad = self.take(pad_len(len))?;
        if pad.iter().any(|b| *b != 0) {
            return Err(FrameError::Malformed("nonzero padding".to_string()));
        }
        Ok(())
    }

    /// A count prefix, sanity-checked against what could possibly follow.
    fn count(&mut self, min_item: usize) -> Result<usize> {
        let count = self.u32()? as usize;
        if count.saturating_mul(min_item) > self.remaining() {
            return Err(FrameError::Malformed(format!(
                "element count {count} exceeds buffer"
            )));
        }
        Ok(count)
    }

    fn string(&mut self, layout: Layout) -> Result<String> {
        let len = self.u32()? as usize;
        let raw = self.take(len)?;
        if layout == Layout::Aligned {
            self.skip_pad(len)?;
        }
        utf8(raw)
    }

    fn finish(&self) -> Result<()> {
        if self.remaining() != 0 {
            return Err(FrameError::Malformed(format!(
                "{} trailing bytes",
                self.remaining()
            )));
        }
        Ok(())
    }
}

fn utf8(raw: &[u8]) -> Result<String> {
    String::from_utf8(raw.to_vec())
        .map_err(|_| FrameError::Malformed("string is not valid UTF-8".to_string()))
}

/// Decode a full field buffer.
///
/// For [`Layout::Aligned`], `mask` is the header's fieldset bitmask; for
/// [`Layout::Packed`] it is ignored.
pub fn decode_fields(src: &[u8], layout: Layout, mask: u32) -> Result<FieldSet> {
    let mut cursor = Cursor::new(src);
    let set = match layout {
        Layout::Aligned => decode_aligned(&mut cursor, mask, 0)?,
        Layout::Packed => decode_packed(&mut cursor, 0)?,
    };
    cursor.finish()?;
    Ok(set)
}

fn decode_aligned(cursor: &mut Cursor<'_>, mask: u32, depth: usize) -> Result<FieldSet> {
    let mut set = FieldSet::new();
    for bit in 0..u32::from(MAX_FIELD_ID) {
        if mask & (1 << bit) == 0 {
            continue;
        }
        let id = bit as u8 + 1;
        let tag = cursor.u8()?;
        if cursor.u8()? != 0 {
            return Err(FrameError::Malformed(format!(
                "field {id}: reserved byte is not zero"
            )));
        }
        let len = cursor.u16()? as usize;
        let raw = cursor.take(len)?;
        cursor.skip_pad(len)?;
        set.insert(id, decode_value(tag, raw, Layout::Aligned, depth)?);
    }
    Ok(set)
}

fn decode_packed(cursor: &mut Cursor<'_>, depth: usize) -> Result<FieldSet> {
    let mut set = FieldSet::new();
    while cursor.remaining() > 0 {
        let id = cursor.u8()?;
        check_id(id)?;
        let tag = cursor.u8()?;
        let len = cursor.u32()? as usize;
        let raw = cursor.take(len)?;
        let value = decode_value(tag, raw, Layout::Packed, depth)?;
        if set.insert(id, value).is_some() {
            return Err(FrameError::Malformed(format!("duplicate field {id}")));
        }
    }
    Ok(set)
}

/// `depth` is the nesting level of the block being decoded; the top-level
/// field set is level 0.
fn decode_block(raw: &[u8], layout: Layout, depth: usize) -> Result<FieldSet> {
    if depth > MAX_NESTING {
        return Err(FrameError::Malformed("blocks nested too deeply".to_string()));
    }
    let mut cursor = Cursor::new(raw);
    let set = match layout {
        Layout::Aligned => {
            let mask = cursor.u32()?;
            decode_aligned(&mut cursor, mask, depth)?
        }
        Layout::Packed => decode_packed(&mut cursor, depth)?,
    };
    cursor.finish()?;
    Ok(set)
}

fn fixed<const N: usize>(raw: &[u8]) -> Result<[u8; N]> {
    raw.try_into().map_err(|_| {
        FrameError::Malformed(format!("scalar of {} bytes, expected {N}", raw.len()))
    })
}

fn decode_value(tag: u8, raw: &[u8], layout: Layout, depth: usize) -> Result<Value> {
    let value = match tag {
        TYPE_BOOL => match fixed::<1>(raw)?[0] {
            0 => Value::Bool(false),
            1 => Value::Bool(true),
            other => {
                return Err(FrameError::Malformed(format!("bool value {other}")));
            }
        },
        TYPE_U8 => Value::U8(fixed::<1>(raw)?[0]),
        TYPE_U16 => Value::U16(u16::from_be_bytes(fixed(raw)?)),
        TYPE_U32 => Value::U32(u32::from_be_bytes(fixed(raw)?)),
        TYPE_U64 => Value::U64(u64::from_be_bytes(fixed(raw)?)),
        TYPE_I32 => Value::I32(i32::from_be_bytes(fixed(raw)?)),
        TYPE_I64 => Value::I64(i64::from_be_bytes(fixed(raw)?)),
        TYPE_STR => Value::Str(utf8(raw)?),
        TYPE_BYTES => Value::Bytes(Bytes::copy_from_slice(raw)),
        TYPE_STR_LIST => {
            let mut cursor = Cursor::new(raw);
            let count = cursor.count(4)?;
            let mut list = Vec::with_capacity(count);
            for _ in 0..count {
                list.push(cursor.string(layout)?);
            }
            cursor.finish()?;
            Value::StrList(list)
        }
        TYPE_STR_MAP => {
            let mut cursor = Cursor::new(raw);
            let count = cursor.count(8)?;
            let mut map = Vec::with_capacity(count);
            for _ in 0..count {
                let key = cursor.string(layout)?;
                let value = cursor.string(layout)?;
                map.push((key, value));
            }
            cursor.finish()?;
            Value::StrMap(map)
        }
        TYPE_BLOCK => Value::Block(decode_block(raw, layout, depth + 1)?),
        TYPE_BLOCK_LIST => {
            let mut cursor = Cursor::new(raw);
            let count = cursor.count(4)?;
            let mut list = Vec::with_capacity(count);
            for _ in 0..count {
                let len = cursor.u32()? as usize;
                list.push(decode_block(cursor.take(len)?, layout, depth + 1)?);
            }
            cursor.finish()?;
            Value::BlockList(list)
        }
        other => {
            return Err(FrameError::Malformed(format!("unknown value type {other}")));
        }
    };
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> FieldSet {
        FieldSet::new()
            .with(1, Value::U8(4))
            .with(2, Value::Str("abcde".to_string()))
            .with(
                3,
                Value::StrMap(vec![("Content-Type".to_string(), "text/plain".to_string())]),
            )
            .with(
                5,
                Value::Block(
                    FieldSet::new()
                        .with(1, Value::U32(7))
                        .with(2, Value::StrList(vec!["a".to_string(), "bcd".to_string()])),
                ),
            )
    }

    #[test]
    fn aligned_encoding_keeps_every_field_on_a_word_boundary() {
        let set = sample();
        let mut buf = BytesMut::new();
        encode_fields(&set, Layout::Aligned, &mut buf).unwrap();
        assert_eq!(buf.len() % 4, 0);

        // Walk the top-level fields and check each pad is zero.
        let mut pos = 0;
        for _ in 0..set.len() {
            assert_eq!(pos % 4, 0, "field must start aligned");
            let len = u16::from_be_bytes([buf[pos + 2], buf[pos + 3]]) as usize;
            let pad_start = pos + 4 + len;
            let pad_end = pad_start + pad_len(len);
            assert!(buf[pad_start..pad_end].iter().all(|b| *b == 0));
            pos = pad_end;
        }
        assert_eq!(pos, buf.len());
    }

    #[test]
    fn aligned_roundtrip_uses_mask() {
        let set = sample();
        let mut buf = BytesMut::new();
        encode_fields(&set, Layout::Aligned, &mut buf).unwrap();
        let mask = set.mask().unwrap();
        assert_eq!(mask, 0b10111);
        let decoded = decode_fields(&buf, Layout::Aligned, mask).unwrap();
        assert_eq!(decoded, set);
    }

    #[test]
    fn packed_roundtrip() {
        let set = sample().with(32, Value::Bytes(Bytes::from_static(b"\x00\x01\x02")));
        let mut buf = BytesMut::new();
        encode_fields(&set, Layout::Packed, &mut buf).unwrap();
        let decoded = decode_fields(&buf, Layout::Packed, 0).unwrap();
        assert_eq!(decoded, set);
    }

    #[test]
    fn string_length_past_end_is_rejected() {
        let set = FieldSet::new().with(1, Value::Str("hello".to_string()));
        let mut buf = BytesMut::new();
        encode_fields(&set, Layout::Aligned, &mut buf).unwrap();
        // Claim 200 bytes of value.
        buf[2] = 0;
        buf[3] = 200;
        let err = decode_fields(&buf, Layout::Aligned, 1).unwrap_err();
        assert!(matches!(err, FrameError::Malformed(_)));
    }

    #[test]
    fn nonzero_padding_is_rejected() {
        let set = FieldSet::new().with(1, Value::Str("abc".to_string()));
        let mut buf = BytesMut::new();
        encode_fields(&set, Layout::Aligned, &mut buf).unwrap();
        let last = buf.len() - 1;
        buf[last] = 0xff;
        assert!(matches!(
            decode_fields(&buf, Layout::Aligned, 1),
            Err(FrameError::Malformed(_))
        ));
    }

    #[test]
    fn mask_with_missing_field_is_rejected() {
        let set = FieldSet::new().with(1, Value::U32(1));
        let mut buf = BytesMut::new();
        encode_fields(&set, Layout::Aligned, &mut buf).unwrap();
        assert!(decode_fields(&buf, Layout::Aligned, 0b11).is_err());
    }

    #[test]
    fn hostile_element_count_is_rejected_without_allocating() {
        let mut raw = BytesMut::new();
        raw.put_u32(u32::MAX);
        assert!(matches!(
            decode_value(TYPE_STR_LIST, &raw, Layout::Packed, 0),
            Err(FrameError::Malformed(_))
        ));
    }

    /// A packed body holding `levels` blocks, each the only field of its parent.
    fn packed_nest(levels: usize) -> BytesMut {
        let mut body = BytesMut::with_capacity(levels * 6);
        for inside in (0..levels).rev() {
            body.put_u8(1);
            body.put_u8(TYPE_BLOCK);
            body.put_u32((inside * 6) as u32);
        }
        body
    }

    /// An aligned body (field 1 set) holding `levels` nested blocks.
    fn aligned_nest(levels: usize) -> BytesMut {
        let mut body = BytesMut::with_capacity(levels * 8);
        for inside in (0..levels).rev() {
            body.put_u8(TYPE_BLOCK);
            body.put_u8(0);
            body.put_u16((4 + inside * 8) as u16);
            body.put_u32(u32::from(inside > 0));
        }
        body
    }

    #[test]
    fn packed_nesting_is_bounded() {
        assert!(decode_fields(&packed_nest(MAX_NESTING), Layout::Packed, 0).is_ok());
        for levels in [MAX_NESTING + 1, 150_000] {
            let err = decode_fields(&packed_nest(levels), Layout::Packed, 0).unwrap_err();
            assert!(
                matches!(err, FrameError::Malformed(ref msg) if msg.contains("nested too deeply")),
                "{err}"
            );
        }
    }

    #[test]
    fn aligned_nesting_is_bounded() {
        assert!(decode_fields(&aligned_nest(MAX_NESTING), Layout::Aligned, 1).is_ok());
        for levels in [MAX_NESTING + 1, 4_000] {
            let err = decode_fields(&aligned_nest(levels), Layout::Aligned, 1).unwrap_err();
            assert!(
                matches!(err, FrameError::Malformed(ref msg) if msg.contains("nested too deeply")),
                "{err}"
            );
        }
    }

    #[test]
    fn packed_duplicate_and_invalid_ids_are_rejected() {
        let mut buf = BytesMut::new();
        for _ in 0..2 {
            buf.put_u8(1);
            buf.put_u8(TYPE_U8);
            buf.put_u32(1);
            buf.put_u8(9);
        }
        assert!(decode_fields(&buf, Layout::Packed, 0).is_err());

        let set = FieldSet::new().with(33, Value::U8(1));
        let mut out = BytesMut::new();
        assert!(matches!(
            encode_fields(&set, Layout::Packed, &mut out),
            Err(FrameError::InvalidFieldId(33))
        ));
    }

    #[test]
    fn typed_getters_report_mismatches() {
        let set = FieldSet::new().with(1, Value::U32(5));
        assert_eq!(set.u32(1).unwrap(), Some(5));
        assert_eq!(set.u32(2).unwrap(), None);
        assert!(matches!(
            set.str(1),
            Err(FrameError::FieldType { id: 1, .. })
        ));
        assert!(matches!(set.require_str(9), Err(FrameError::MissingField(9))));
    }
}
