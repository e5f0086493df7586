//! Schema model — descriptor objects describing the shape of a
//! structured record: field names, primitive/group tags, and
//! sub-descriptors for nested records, lists, hashes, arrays, unions,
//! and variants.
//!
//! # Open question: offsets vs. values
//! The distilled design describes field descriptors carrying a raw byte
//! `offset` into a C struct, with `list_next`/`hash_foreach`/`mem_alloc`
//! callbacks walking arbitrary caller memory. Rust has no safe
//! equivalent of that without `unsafe` pointer arithmetic tied to a
//! specific `#[repr(C)]` layout chosen per schema. strongbox instead
//! represents every decoded or to-be-encoded record as a [`Value`] tree
//! (see `data_codec.rs`) and a [`Descriptor`] validates/shapes that tree
//! by field name rather than by byte offset — the wire format, field
//! ordering, schema-evolution tolerance, and union/variant dispatch all
//! behave exactly as specified; only the in-memory representation the
//! descriptor walks is idiomatic-Rust instead of raw-memory.

use std::collections::HashMap;
use std::sync::Arc;

/// Primitive wire tags. `17` is reserved (`EET_T_LAST` is 18 but only
/// tags through 16 are assigned) and must be rejected rather than
/// silently accepted by a catch-all arm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimitiveTag {
    Char = 1,
    Short = 2,
    Int = 3,
    LongLong = 4,
    Float = 5,
    Double = 6,
    UChar = 7,
    UShort = 8,
    UInt = 9,
    ULongLong = 10,
    String = 11,
    InlinedString = 12,
    Null = 13,
    F32P32 = 14,
    F16P16 = 15,
    F8P24 = 16,
}

impl TryFrom<u32> for PrimitiveTag {
    type Error = ();
    fn try_from(v: u32) -> Result<Self, ()> {
        use PrimitiveTag::*;
        Ok(match v {
            1 => Char,
            2 => Short,
            3 => Int,
            4 => LongLong,
            5 => Float,
            6 => Double,
            7 => UChar,
            8 => UShort,
            9 => UInt,
            10 => ULongLong,
            11 => String,
            12 => InlinedString,
            13 => Null,
            14 => F32P32,
            15 => F16P16,
            16 => F8P24,
            _ => return Err(()), // includes the reserved value 17
        })
    }
}

/// Group wire tags — container shapes nested inside a record.
/// `Unknown` (100) is the wrapper tag for a plain nested record / the
/// outer group-open chunk of any encoded record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupTag {
    Unknown = 100,
    Array = 101,
    VarArray = 102,
    List = 103,
    Hash = 104,
    Union = 105,
    Variant = 106,
}

impl TryFrom<u32> for GroupTag {
    type Error = ();
    fn try_from(v: u32) -> Result<Self, ()> {
        use GroupTag::*;
        Ok(match v {
            100 => Unknown,
            101 => Array,
            102 => VarArray,
            103 => List,
            104 => Hash,
            105 => Union,
            106 => Variant,
            _ => return Err(()),
        })
    }
}

/// Reserved internal/unassigned tag space; a decoder must reject any
/// `type` chunk tag that falls in here outright.
pub const RESERVED_TAG_LIMIT: u32 = 128;

/// What a collection field's elements are shaped like.
#[derive(Debug, Clone)]
pub enum ElementKind {
    Primitive(PrimitiveTag),
    Record(Arc<Descriptor>),
}

/// What kind of field this is.
#[derive(Debug, Clone)]
pub enum FieldKind {
    Primitive(PrimitiveTag),
    /// A single nested sub-record (wire tag `GroupTag::Unknown`).
    Nested(Arc<Descriptor>),
    /// A homogeneous collection: fixed array, var-array, list, or hash.
    Collection { tag: GroupTag, element: ElementKind },
    /// Union/variant fields don't have one fixed sub-descriptor — the
    /// right one is chosen at encode/decode time by [`UnionDispatch`].
    Dispatch { tag: GroupTag, dispatch: UnionDispatch },
}

#[derive(Debug, Clone)]
pub struct FieldDescriptor {
    pub name: String,
    pub kind: FieldKind,
    /// Fixed element count, meaningful only for `GroupTag::Array`: the
    /// codec rejects an encode or decode whose actual element count
    /// doesn't match. Ignored for `VarArray`/`List`/`Hash`, which carry no
    /// cardinality constraint of their own.
    pub count: Option<u32>,
}

/// How a union/variant field is dispatched: a map from variant tag name
/// to the descriptor that describes its payload. `type_of` in the
/// original design (pick the active variant from an in-memory value) is
/// replaced by the `Value::Union { variant, .. }` tag carried inline —
/// Rust values are already self-describing, unlike a C union.
#[derive(Debug, Clone)]
pub struct UnionDispatch {
    pub variants: HashMap<String, Arc<Descriptor>>,
    /// If `true` (a "variant" field, not a plain "union"), an unmatched
    /// tag decodes to an opaque blob instead of a hard decode failure.
    pub allow_opaque: bool,
}

impl UnionDispatch {
    pub fn new(allow_opaque: bool) -> UnionDispatch {
        UnionDispatch { variants: HashMap::new(), allow_opaque }
    }

    pub fn add_variant(mut self, tag: impl Into<String>, descriptor: Arc<Descriptor>) -> Self {
        self.variants.insert(tag.into(), descriptor);
        self
    }
}

/// Describes one structured record type: a name (used as the outer
/// chunk's group name) and an ordered list of fields.
#[derive(Debug, Clone)]
pub struct Descriptor {
    pub name: String,
    pub fields: Vec<FieldDescriptor>,
    /// Expected encoded size in bytes, if known ahead of time. Purely an
    /// allocation hint for `data_codec::encode` — never affects the wire
    /// format, and a wrong hint only costs a reallocation, never
    /// correctness.
    pub size_hint: Option<usize>,
}

impl Descriptor {
    pub fn new(name: impl Into<String>) -> Descriptor {
        Descriptor { name: name.into(), fields: Vec::new(), size_hint: None }
    }

    pub fn add_field(mut self, field: FieldDescriptor) -> Self {
        self.fields.push(field);
        self
    }

    /// Record an expected encoded size so `data_codec::encode` can
    /// pre-allocate its output buffer instead of growing it incrementally.
    pub fn with_size_hint(mut self, bytes: usize) -> Self {
        self.size_hint = Some(bytes);
        self
    }

    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// Construction mode — affects only string ownership in decoded
/// records. `Stream` always allocates and owns strings; `File` may hand
/// out borrowed slices of the container's dictionary blob (only valid
/// while the originating handle stays open).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstructionMode {
    Stream,
    File,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_reserved_tag_17() {
        assert!(PrimitiveTag::try_from(17).is_err());
        assert!(PrimitiveTag::try_from(18).is_err());
    }

    #[test]
    fn accepts_all_defined_primitive_tags() {
        for v in 1..=16u32 {
            assert!(PrimitiveTag::try_from(v).is_ok(), "tag {v} should be valid");
        }
    }

    #[test]
    fn group_tags_roundtrip() {
        assert_eq!(GroupTag::try_from(101).unwrap(), GroupTag::Array);
        assert_eq!(GroupTag::try_from(106).unwrap(), GroupTag::Variant);
        assert!(GroupTag::try_from(107).is_err());
    }

    #[test]
    fn size_hint_is_stored_but_optional() {
        let descriptor = Descriptor::new("point").with_size_hint(64);
        assert_eq!(descriptor.size_hint, Some(64));
        assert_eq!(Descriptor::new("point").size_hint, None);
    }

    #[test]
    fn descriptor_field_lookup() {
        let inner = Arc::new(Descriptor::new("point"));
        let descriptor = Descriptor::new("shape").add_field(FieldDescriptor {
            name: "origin".into(),
            kind: FieldKind::Collection { tag: GroupTag::List, element: ElementKind::Record(inner) },
            count: None,
        });
        assert!(descriptor.field("origin").is_some());
        assert!(descriptor.field("missing").is_none());
    }
}
