//! Data codec — the heart of the crate: a recursive, self-describing
//! but schema-validated wire format for structured records.
//!
//! ```text
//! CHUNK := type:u32  size:u32  name:cstring  payload[size]
//! ```
//! `type` is a primitive or group tag (`schema::PrimitiveTag` /
//! `schema::GroupTag`). Unknown field names are skipped on decode;
//! missing fields stay at their zero value — this is how schema
//! evolution (added/removed fields) is tolerated. Recursion deeper than
//! [`MAX_DEPTH`] aborts with `MalformedData`, matching the upstream
//! format's `EET_I_LIMIT`-derived recursion guard.
//!
//! Decoded/to-be-encoded records are represented as a generic [`Value`]
//! tree rather than raw caller memory — see the "Open question" note in
//! `schema.rs` for why.

use crate::byteio;
use crate::dictionary::Dictionary;
use crate::schema::{Descriptor, ElementKind, FieldDescriptor, FieldKind, GroupTag, PrimitiveTag, RESERVED_TAG_LIMIT};
use std::collections::HashMap;
use std::io::Cursor;
use thiserror::Error;
use tracing::warn;

/// Matches the upstream format's internal recursion bound
/// (`EET_I_LIMIT = 128`).
pub const MAX_DEPTH: u32 = 128;

const MAX_NAME_LEN: usize = 4096;
const MAX_CHUNK_SIZE: u32 = 64 * 1024 * 1024;

#[derive(Error, Debug)]
pub enum DataCodecError {
    #[error("malformed data: {0}")]
    MalformedData(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("dictionary error: {0}")]
    Dictionary(#[from] crate::dictionary::DictionaryError),
}

/// A decoded (or about-to-be-encoded) record value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Char(i8),
    Short(i16),
    Int(i32),
    LongLong(i64),
    Float(f32),
    Double(f64),
    UChar(u8),
    UShort(u16),
    UInt(u32),
    ULongLong(u64),
    Str(String),
    Null,
    F32P32(f64),
    F16P16(f64),
    F8P24(f64),
    Record(Vec<(String, Value)>),
    List(Vec<Value>),
    Hash(Vec<(String, Value)>),
    Union { variant: String, value: Box<Value> },
    /// A variant payload whose tag the reader's schema doesn't know —
    /// round-tripped verbatim rather than decoded.
    Opaque { tag: String, bytes: Vec<u8> },
}

impl Value {
    fn record_fields(&self) -> Option<&[(String, Value)]> {
        match self {
            Value::Record(fields) => Some(fields),
            _ => None,
        }
    }

    fn field(&self, name: &str) -> Option<&Value> {
        self.record_fields()?.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }
}

// ── Encoding ─────────────────────────────────────────────────────────────────

/// Encode `value` (must be `Value::Record`) against `descriptor`, tagged
/// with the descriptor's own name as the outer group-open chunk.
pub fn encode(descriptor: &Descriptor, value: &Value, dict: &Dictionary) -> Result<Vec<u8>, DataCodecError> {
    let body = encode_fields(descriptor, value, dict, 0)?;
    Ok(write_chunk(GroupTag::Unknown as u32, &descriptor.name, &body))
}

fn encode_fields(
    descriptor: &Descriptor,
    value: &Value,
    dict: &Dictionary,
    depth: u32,
) -> Result<Vec<u8>, DataCodecError> {
    if depth > MAX_DEPTH {
        return Err(DataCodecError::MalformedData(format!("recursion exceeds {MAX_DEPTH}")));
    }
    let mut out = match descriptor.size_hint {
        Some(bytes) => Vec::with_capacity(bytes),
        None => Vec::new(),
    };
    for field in &descriptor.fields {
        let field_value = value.field(&field.name).unwrap_or(&Value::Null);
        encode_field(field, field_value, dict, depth, &mut out)?;
    }
    Ok(out)
}

fn encode_field(
    field: &FieldDescriptor,
    value: &Value,
    dict: &Dictionary,
    depth: u32,
    out: &mut Vec<u8>,
) -> Result<(), DataCodecError> {
    match &field.kind {
        FieldKind::Primitive(tag) => {
            let body = encode_primitive(*tag, value, dict)?;
            out.extend_from_slice(&write_chunk(primitive_wire_tag(*tag, value, dict), &field.name, &body));
        }
        FieldKind::Nested(sub) => {
            let body = encode_fields(sub, value, dict, depth + 1)?;
            out.extend_from_slice(&write_chunk(GroupTag::Unknown as u32, &field.name, &body));
        }
        FieldKind::Collection { tag, element } => {
            encode_collection(*tag, element, &field.name, field.count, value, dict, depth, out)?;
        }
        FieldKind::Dispatch { tag, dispatch } => {
            encode_dispatch(*tag, dispatch, &field.name, value, dict, depth, out)?;
        }
    }
    Ok(())
}

fn primitive_wire_tag(tag: PrimitiveTag, value: &Value, dict: &Dictionary) -> u32 {
    if tag == PrimitiveTag::String {
        if let Value::Str(s) = value {
            if dict.contains(s) {
                return PrimitiveTag::InlinedString as u32;
            }
        }
    }
    tag as u32
}

fn encode_primitive(tag: PrimitiveTag, value: &Value, dict: &Dictionary) -> Result<Vec<u8>, DataCodecError> {
    let mut out = Vec::new();
    match (tag, value) {
        (PrimitiveTag::Char, Value::Char(v)) => byteio::write_i8(&mut out, *v)?,
        (PrimitiveTag::UChar, Value::UChar(v)) => byteio::write_u8(&mut out, *v)?,
        (PrimitiveTag::Short, Value::Short(v)) => byteio::write_i16(&mut out, *v)?,
        (PrimitiveTag::UShort, Value::UShort(v)) => byteio::write_u16(&mut out, *v)?,
        (PrimitiveTag::Int, Value::Int(v)) => byteio::write_i32(&mut out, *v)?,
        (PrimitiveTag::UInt, Value::UInt(v)) => byteio::write_u32(&mut out, *v)?,
        (PrimitiveTag::LongLong, Value::LongLong(v)) => byteio::write_i64(&mut out, *v)?,
        (PrimitiveTag::ULongLong, Value::ULongLong(v)) => byteio::write_u64(&mut out, *v)?,
        (PrimitiveTag::Float, Value::Float(v)) => byteio::write_float(&mut out, *v)?,
        (PrimitiveTag::Double, Value::Double(v)) => byteio::write_double(&mut out, *v)?,
        (PrimitiveTag::F32P32, Value::F32P32(v)) => byteio::write_fixed(&mut out, *v, 32)?,
        (PrimitiveTag::F16P16, Value::F16P16(v)) => byteio::write_fixed(&mut out, *v, 16)?,
        (PrimitiveTag::F8P24, Value::F8P24(v)) => byteio::write_fixed(&mut out, *v, 24)?,
        (PrimitiveTag::Null, _) => {}
        (PrimitiveTag::String, Value::Str(s)) => {
            if let Some(idx) = dict.lookup(s) {
                byteio::write_u32(&mut out, idx)?;
            } else {
                out.extend_from_slice(s.as_bytes());
            }
        }
        (PrimitiveTag::InlinedString, Value::Str(_)) => unreachable!("dispatched via primitive_wire_tag"),
        (expected, actual) => {
            return Err(DataCodecError::MalformedData(format!(
                "value {actual:?} does not match field primitive {expected:?}"
            )))
        }
    }
    Ok(out)
}

#[allow(clippy::too_many_arguments)]
fn encode_collection(
    tag: GroupTag,
    element: &ElementKind,
    name: &str,
    count: Option<u32>,
    value: &Value,
    dict: &Dictionary,
    depth: u32,
    out: &mut Vec<u8>,
) -> Result<(), DataCodecError> {
    match tag {
        GroupTag::Hash => {
            let entries = match value {
                Value::Hash(entries) => entries.as_slice(),
                _ => &[],
            };
            for (key, elem_value) in entries {
                let mut body = Vec::new();
                byteio::write_cstring(&mut body, key)?;
                body.extend_from_slice(&encode_element(element, elem_value, dict, depth + 1)?);
                out.extend_from_slice(&write_chunk(GroupTag::Hash as u32, name, &body));
            }
        }
        GroupTag::Array | GroupTag::VarArray | GroupTag::List => {
            let items: &[Value] = match value {
                Value::List(items) => items.as_slice(),
                _ => &[],
            };
            if tag == GroupTag::Array {
                if let Some(expected) = count {
                    if items.len() as u32 != expected {
                        return Err(DataCodecError::MalformedData(format!(
                            "field {name:?} is a fixed array of {expected} elements but got {}",
                            items.len()
                        )));
                    }
                }
            }
            let tag_for_chunk = match element {
                ElementKind::Primitive(p) => *p as u32,
                ElementKind::Record(_) => GroupTag::Unknown as u32,
            };
            for item in items {
                let body = encode_element(element, item, dict, depth + 1)?;
                out.extend_from_slice(&write_chunk(tag_for_chunk, name, &body));
            }
        }
        _ => unreachable!("encode_collection only called for Array/VarArray/List/Hash"),
    }
    Ok(())
}

fn encode_element(
    element: &ElementKind,
    value: &Value,
    dict: &Dictionary,
    depth: u32,
) -> Result<Vec<u8>, DataCodecError> {
    match element {
        ElementKind::Primitive(tag) => encode_primitive(*tag, value, dict),
        ElementKind::Record(descriptor) => encode_fields(descriptor, value, dict, depth),
    }
}

#[allow(clippy::too_many_arguments)]
fn encode_dispatch(
    _tag: GroupTag,
    dispatch: &crate::schema::UnionDispatch,
    name: &str,
    value: &Value,
    dict: &Dictionary,
    depth: u32,
    out: &mut Vec<u8>,
) -> Result<(), DataCodecError> {
    match value {
        Value::Union { variant, value } => {
            let descriptor = dispatch
                .variants
                .get(variant)
                .ok_or_else(|| DataCodecError::MalformedData(format!("unknown union variant {variant:?}")))?;
            let tag_body = variant.as_bytes().to_vec();
            out.extend_from_slice(&write_chunk(PrimitiveTag::String as u32, name, &tag_body));
            let payload = encode_fields(descriptor, value, dict, depth + 1)?;
            out.extend_from_slice(&write_chunk(GroupTag::Unknown as u32, name, &payload));
        }
        Value::Opaque { tag, bytes } => {
            let tag_body = tag.as_bytes().to_vec();
            out.extend_from_slice(&write_chunk(PrimitiveTag::String as u32, name, &tag_body));
            out.extend_from_slice(&write_chunk(GroupTag::Unknown as u32, name, bytes));
        }
        Value::Null => {}
        other => {
            return Err(DataCodecError::MalformedData(format!("expected a union value, got {other:?}")))
        }
    }
    Ok(())
}

fn write_chunk(tag: u32, name: &str, body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(8 + name.len() + 1 + body.len());
    byteio::write_u32(&mut out, tag).unwrap();
    byteio::write_u32(&mut out, body.len() as u32).unwrap();
    byteio::write_cstring(&mut out, name).unwrap();
    out.extend_from_slice(body);
    out
}

// ── Decoding ─────────────────────────────────────────────────────────────────

struct Chunk {
    tag: u32,
    name: String,
    body: Vec<u8>,
}

fn read_chunk(cur: &mut Cursor<&[u8]>) -> Result<Option<Chunk>, DataCodecError> {
    if cur.position() as usize >= cur.get_ref().len() {
        return Ok(None);
    }
    let tag = byteio::read_u32(cur)?;
    if tag >= RESERVED_TAG_LIMIT {
        return Err(DataCodecError::MalformedData(format!("chunk tag {tag} falls in the reserved tag space")));
    }
    let size = byteio::read_u32(cur)?;
    if size > MAX_CHUNK_SIZE {
        return Err(DataCodecError::MalformedData(format!("chunk size {size} exceeds maximum")));
    }
    let name = byteio::read_cstring(cur, MAX_NAME_LEN)
        .map_err(|e| DataCodecError::MalformedData(format!("bad chunk name: {e}")))?;
    let mut body = vec![0u8; size as usize];
    std::io::Read::read_exact(cur, &mut body)?;
    Ok(Some(Chunk { tag, name, body }))
}

/// Decode a record previously produced by [`encode`]. The outer
/// group-open chunk's declared name is ignored (callers already know
/// which descriptor they expect); only `descriptor`'s shape governs
/// decoding.
pub fn decode(descriptor: &Descriptor, data: &[u8], dict: &Dictionary) -> Result<Value, DataCodecError> {
    let mut cur = Cursor::new(data);
    let outer = read_chunk(&mut cur)?
        .ok_or_else(|| DataCodecError::MalformedData("empty payload".into()))?;
    if outer.tag != GroupTag::Unknown as u32 {
        return Err(DataCodecError::MalformedData(format!("unexpected outer chunk tag {}", outer.tag)));
    }
    decode_fields(descriptor, &outer.body, dict, 0)
}

fn default_value(field: &FieldDescriptor) -> Value {
    match &field.kind {
        FieldKind::Primitive(tag) => default_primitive(*tag),
        FieldKind::Nested(sub) => Value::Record(sub.fields.iter().map(|f| (f.name.clone(), default_value(f))).collect()),
        FieldKind::Collection { tag: GroupTag::Hash, .. } => Value::Hash(Vec::new()),
        FieldKind::Collection { .. } => Value::List(Vec::new()),
        FieldKind::Dispatch { .. } => Value::Null,
    }
}

fn default_primitive(tag: PrimitiveTag) -> Value {
    use PrimitiveTag::*;
    match tag {
        Char => Value::Char(0),
        UChar => Value::UChar(0),
        Short => Value::Short(0),
        UShort => Value::UShort(0),
        Int => Value::Int(0),
        UInt => Value::UInt(0),
        LongLong => Value::LongLong(0),
        ULongLong => Value::ULongLong(0),
        Float => Value::Float(0.0),
        Double => Value::Double(0.0),
        F32P32 => Value::F32P32(0.0),
        F16P16 => Value::F16P16(0.0),
        F8P24 => Value::F8P24(0.0),
        String | InlinedString => Value::Str(String::new()),
        Null => Value::Null,
    }
}

fn decode_fields(
    descriptor: &Descriptor,
    data: &[u8],
    dict: &Dictionary,
    depth: u32,
) -> Result<Value, DataCodecError> {
    if depth > MAX_DEPTH {
        return Err(DataCodecError::MalformedData(format!("recursion exceeds {MAX_DEPTH}")));
    }

    let mut fields: HashMap<String, Value> = descriptor
        .fields
        .iter()
        .map(|f| (f.name.clone(), default_value(f)))
        .collect();
    let mut lists: HashMap<String, Vec<Value>> = HashMap::new();
    let mut hashes: HashMap<String, Vec<(String, Value)>> = HashMap::new();
    let mut pending_union_tag: HashMap<String, String> = HashMap::new();

    let mut cur = Cursor::new(data);
    while let Some(chunk) = read_chunk(&mut cur)? {
        let Some(field) = descriptor.field(&chunk.name) else {
            warn!(field = chunk.name, "skipping unknown field during decode");
            continue; // unknown field — schema evolution tolerance
        };
        decode_into_field(field, &chunk, dict, depth, &mut fields, &mut lists, &mut hashes, &mut pending_union_tag)?;
    }

    for field in &descriptor.fields {
        if let FieldKind::Collection { tag: GroupTag::Array, .. } = &field.kind {
            if let Some(expected) = field.count {
                let actual = lists.get(&field.name).map(|v| v.len()).unwrap_or(0) as u32;
                if actual != expected {
                    return Err(DataCodecError::MalformedData(format!(
                        "field {:?} is a fixed array of {expected} elements but decoded {actual}",
                        field.name
                    )));
                }
            }
        }
    }

    for (name, items) in lists {
        fields.insert(name, Value::List(items));
    }
    for (name, entries) in hashes {
        fields.insert(name, Value::Hash(entries));
    }

    let ordered = descriptor
        .fields
        .iter()
        .map(|f| (f.name.clone(), fields.remove(&f.name).unwrap_or(Value::Null)))
        .collect();
    Ok(Value::Record(ordered))
}

#[allow(clippy::too_many_arguments)]
fn decode_into_field(
    field: &FieldDescriptor,
    chunk: &Chunk,
    dict: &Dictionary,
    depth: u32,
    fields: &mut HashMap<String, Value>,
    lists: &mut HashMap<String, Vec<Value>>,
    hashes: &mut HashMap<String, Vec<(String, Value)>>,
    pending_union_tag: &mut HashMap<String, String>,
) -> Result<(), DataCodecError> {
    match &field.kind {
        FieldKind::Primitive(tag) => {
            let value = decode_primitive(*tag, chunk, dict)?;
            fields.insert(field.name.clone(), value);
        }
        FieldKind::Nested(sub) => {
            let value = decode_fields(sub, &chunk.body, dict, depth + 1)?;
            fields.insert(field.name.clone(), value);
        }
        FieldKind::Collection { tag: GroupTag::Hash, element } => {
            let mut body_cur = Cursor::new(chunk.body.as_slice());
            let key = byteio::read_cstring(&mut body_cur, MAX_NAME_LEN)
                .map_err(|e| DataCodecError::MalformedData(format!("bad hash key: {e}")))?;
            let rest = &chunk.body[body_cur.position() as usize..];
            let value = decode_element(element, rest, dict, depth + 1)?;
            hashes.entry(field.name.clone()).or_default().push((key, value));
        }
        FieldKind::Collection { element, .. } => {
            let value = decode_element(element, &chunk.body, dict, depth + 1)?;
            lists.entry(field.name.clone()).or_default().push(value);
        }
        FieldKind::Dispatch { dispatch, .. } => {
            if chunk.tag == PrimitiveTag::String as u32 && !pending_union_tag.contains_key(&field.name) {
                let tag_name = String::from_utf8_lossy(&chunk.body).into_owned();
                pending_union_tag.insert(field.name.clone(), tag_name);
            } else {
                let tag_name = pending_union_tag.remove(&field.name).ok_or_else(|| {
                    DataCodecError::MalformedData(format!("union payload for {:?} before its tag", field.name))
                })?;
                let value = match dispatch.variants.get(&tag_name) {
                    Some(sub) => {
                        let record = decode_fields(sub, &chunk.body, dict, depth + 1)?;
                        Value::Union { variant: tag_name, value: Box::new(record) }
                    }
                    None if dispatch.allow_opaque => Value::Opaque { tag: tag_name, bytes: chunk.body.clone() },
                    None => {
                        return Err(DataCodecError::MalformedData(format!("unknown union variant {tag_name:?}")))
                    }
                };
                fields.insert(field.name.clone(), value);
            }
        }
    }
    Ok(())
}

fn decode_element(element: &ElementKind, body: &[u8], dict: &Dictionary, depth: u32) -> Result<Value, DataCodecError> {
    match element {
        ElementKind::Primitive(tag) => decode_primitive_body(*tag, body, dict),
        ElementKind::Record(descriptor) => decode_fields(descriptor, body, dict, depth),
    }
}

fn decode_primitive(tag: PrimitiveTag, chunk: &Chunk, dict: &Dictionary) -> Result<Value, DataCodecError> {
    if chunk.tag == PrimitiveTag::InlinedString as u32 {
        let mut cur = Cursor::new(chunk.body.as_slice());
        let idx = byteio::read_u32(&mut cur)?;
        let s = dict.string_at(idx)?.to_owned();
        return Ok(Value::Str(s));
    }
    decode_primitive_body(tag, &chunk.body, dict)
}

fn decode_primitive_body(tag: PrimitiveTag, body: &[u8], _dict: &Dictionary) -> Result<Value, DataCodecError> {
    let mut cur = Cursor::new(body);
    Ok(match tag {
        PrimitiveTag::Char => Value::Char(byteio::read_i8(&mut cur)?),
        PrimitiveTag::UChar => Value::UChar(byteio::read_u8(&mut cur)?),
        PrimitiveTag::Short => Value::Short(byteio::read_i16(&mut cur)?),
        PrimitiveTag::UShort => Value::UShort(byteio::read_u16(&mut cur)?),
        PrimitiveTag::Int => Value::Int(byteio::read_i32(&mut cur)?),
        PrimitiveTag::UInt => Value::UInt(byteio::read_u32(&mut cur)?),
        PrimitiveTag::LongLong => Value::LongLong(byteio::read_i64(&mut cur)?),
        PrimitiveTag::ULongLong => Value::ULongLong(byteio::read_u64(&mut cur)?),
        PrimitiveTag::Float => Value::Float(byteio::read_float(&mut cur)?),
        PrimitiveTag::Double => Value::Double(byteio::read_double(&mut cur)?),
        PrimitiveTag::F32P32 => Value::F32P32(byteio::read_fixed(&mut cur, 32)?),
        PrimitiveTag::F16P16 => Value::F16P16(byteio::read_fixed(&mut cur, 16)?),
        PrimitiveTag::F8P24 => Value::F8P24(byteio::read_fixed(&mut cur, 24)?),
        PrimitiveTag::Null => Value::Null,
        PrimitiveTag::String | PrimitiveTag::InlinedString => {
            Value::Str(String::from_utf8_lossy(body).into_owned())
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::UnionDispatch;
    use std::sync::Arc;

    fn point_descriptor() -> Descriptor {
        Descriptor::new("point")
            .add_field(FieldDescriptor { name: "x".into(), kind: FieldKind::Primitive(PrimitiveTag::Int), count: None })
            .add_field(FieldDescriptor { name: "y".into(), kind: FieldKind::Primitive(PrimitiveTag::Int), count: None })
    }

    #[test]
    fn primitive_roundtrip() {
        let descriptor = point_descriptor();
        let dict = Dictionary::new();
        let value = Value::Record(vec![("x".into(), Value::Int(3)), ("y".into(), Value::Int(-7))]);
        let encoded = encode(&descriptor, &value, &dict).unwrap();
        let decoded = decode(&descriptor, &encoded, &dict).unwrap();
        assert_eq!(decoded, value);
    }

    #[test]
    fn reserved_chunk_tag_is_rejected() {
        let descriptor = point_descriptor();
        let dict = Dictionary::new();
        let value = Value::Record(vec![("x".into(), Value::Int(3)), ("y".into(), Value::Int(-7))]);
        let mut encoded = encode(&descriptor, &value, &dict).unwrap();

        // Corrupt the inner "x" field chunk's tag (first field after the
        // outer group-open chunk's header + name) to a reserved value.
        let outer_header_and_name = 4 + 4 + "point".len() + 1;
        let inner_tag_pos = outer_header_and_name;
        encoded[inner_tag_pos..inner_tag_pos + 4].copy_from_slice(&200u32.to_be_bytes());

        assert!(decode(&descriptor, &encoded, &dict).is_err());
    }

    #[test]
    fn unknown_field_is_skipped_missing_field_stays_zero() {
        let old_descriptor = point_descriptor().add_field(FieldDescriptor {
            name: "z".into(),
            kind: FieldKind::Primitive(PrimitiveTag::Int),
            count: None,
        });
        let value = Value::Record(vec![
            ("x".into(), Value::Int(1)),
            ("y".into(), Value::Int(2)),
            ("z".into(), Value::Int(99)),
        ]);
        let dict = Dictionary::new();
        let encoded = encode(&old_descriptor, &value, &dict).unwrap();

        // A newer reader's schema dropped "z" and added "w".
        let new_descriptor = point_descriptor().add_field(FieldDescriptor {
            name: "w".into(),
            kind: FieldKind::Primitive(PrimitiveTag::Int),
            count: None,
        });
        let decoded = decode(&new_descriptor, &encoded, &dict).unwrap();
        assert_eq!(decoded.field("x"), Some(&Value::Int(1)));
        assert_eq!(decoded.field("w"), Some(&Value::Int(0)));
    }

    #[test]
    fn string_uses_dictionary_when_present() {
        let descriptor = Descriptor::new("labeled")
            .add_field(FieldDescriptor { name: "label".into(), kind: FieldKind::Primitive(PrimitiveTag::String), count: None });
        let mut dict = Dictionary::new();
        dict.intern("shared");
        let value = Value::Record(vec![("label".into(), Value::Str("shared".into()))]);
        let encoded = encode(&descriptor, &value, &dict).unwrap();
        let decoded = decode(&descriptor, &encoded, &dict).unwrap();
        assert_eq!(decoded, value);
    }

    #[test]
    fn list_of_primitives_roundtrip() {
        let descriptor = Descriptor::new("numbers").add_field(FieldDescriptor {
            name: "values".into(),
            kind: FieldKind::Collection { tag: GroupTag::List, element: ElementKind::Primitive(PrimitiveTag::Int) },
            count: None,
        });
        let dict = Dictionary::new();
        let value = Value::Record(vec![(
            "values".into(),
            Value::List(vec![Value::Int(1), Value::Int(2), Value::Int(3)]),
        )]);
        let encoded = encode(&descriptor, &value, &dict).unwrap();
        let decoded = decode(&descriptor, &encoded, &dict).unwrap();
        assert_eq!(decoded, value);
    }

    fn fixed_array_descriptor(count: u32) -> Descriptor {
        Descriptor::new("triple").add_field(FieldDescriptor {
            name: "values".into(),
            kind: FieldKind::Collection { tag: GroupTag::Array, element: ElementKind::Primitive(PrimitiveTag::Int) },
            count: Some(count),
        })
    }

    #[test]
    fn fixed_array_roundtrips_at_declared_count() {
        let descriptor = fixed_array_descriptor(3);
        let dict = Dictionary::new();
        let value = Value::Record(vec![(
            "values".into(),
            Value::List(vec![Value::Int(1), Value::Int(2), Value::Int(3)]),
        )]);
        let encoded = encode(&descriptor, &value, &dict).unwrap();
        let decoded = decode(&descriptor, &encoded, &dict).unwrap();
        assert_eq!(decoded, value);
    }

    #[test]
    fn fixed_array_rejects_wrong_count_on_encode() {
        let descriptor = fixed_array_descriptor(3);
        let dict = Dictionary::new();
        let value = Value::Record(vec![("values".into(), Value::List(vec![Value::Int(1), Value::Int(2)]))]);
        assert!(encode(&descriptor, &value, &dict).is_err());
    }

    #[test]
    fn fixed_array_rejects_wrong_count_on_decode() {
        // Encode against a schema expecting 2 elements, then decode
        // against one expecting 3 — the bytes are well-formed but the
        // cardinality contract is violated.
        let loose_descriptor = Descriptor::new("triple").add_field(FieldDescriptor {
            name: "values".into(),
            kind: FieldKind::Collection { tag: GroupTag::List, element: ElementKind::Primitive(PrimitiveTag::Int) },
            count: None,
        });
        let dict = Dictionary::new();
        let value = Value::Record(vec![("values".into(), Value::List(vec![Value::Int(1), Value::Int(2)]))]);
        let encoded = encode(&loose_descriptor, &value, &dict).unwrap();

        let strict_descriptor = fixed_array_descriptor(3);
        assert!(decode(&strict_descriptor, &encoded, &dict).is_err());
    }

    #[test]
    fn hash_roundtrip() {
        let descriptor = Descriptor::new("attrs").add_field(FieldDescriptor {
            name: "map".into(),
            kind: FieldKind::Collection { tag: GroupTag::Hash, element: ElementKind::Primitive(PrimitiveTag::Int) },
            count: None,
        });
        let dict = Dictionary::new();
        let value = Value::Record(vec![(
            "map".into(),
            Value::Hash(vec![("a".into(), Value::Int(1)), ("b".into(), Value::Int(2))]),
        )]);
        let encoded = encode(&descriptor, &value, &dict).unwrap();
        let decoded = decode(&descriptor, &encoded, &dict).unwrap();
        assert_eq!(decoded, value);
    }

    #[test]
    fn union_roundtrip_and_unknown_variant_is_opaque() {
        let circle = Arc::new(
            Descriptor::new("circle").add_field(FieldDescriptor {
                name: "radius".into(),
                kind: FieldKind::Primitive(PrimitiveTag::Int),
                count: None,
            }),
        );
        let dispatch = UnionDispatch::new(true).add_variant("circle", circle);
        let descriptor = Descriptor::new("shape").add_field(FieldDescriptor {
            name: "body".into(),
            kind: FieldKind::Dispatch { tag: GroupTag::Variant, dispatch },
            count: None,
        });
        let dict = Dictionary::new();
        let value = Value::Record(vec![(
            "body".into(),
            Value::Union { variant: "circle".into(), value: Box::new(Value::Record(vec![("radius".into(), Value::Int(5))])) },
        )]);
        let encoded = encode(&descriptor, &value, &dict).unwrap();
        let decoded = decode(&descriptor, &encoded, &dict).unwrap();
        assert_eq!(decoded, value);

        // Now decode against a schema that doesn't know "circle" at all —
        // the reader instead gets it back as an opaque blob.
        let unknowing_dispatch = UnionDispatch::new(true);
        let unknowing_descriptor = Descriptor::new("shape").add_field(FieldDescriptor {
            name: "body".into(),
            kind: FieldKind::Dispatch { tag: GroupTag::Variant, dispatch: unknowing_dispatch },
            count: None,
        });
        let decoded = decode(&unknowing_descriptor, &encoded, &dict).unwrap();
        match decoded.field("body") {
            Some(Value::Opaque { tag, .. }) => assert_eq!(tag, "circle"),
            other => panic!("expected opaque variant, got {other:?}"),
        }
    }

    #[test]
    fn recursion_limit_is_enforced() {
        // Build a descriptor that nests itself one level per call and
        // drive decode_fields past MAX_DEPTH directly, since constructing
        // a literal 129-deep descriptor by hand is impractical.
        let leaf = Descriptor::new("leaf");
        let err = decode_fields(&leaf, &[], &Dictionary::new(), MAX_DEPTH + 1).unwrap_err();
        assert!(matches!(err, DataCodecError::MalformedData(_)));
    }
}
