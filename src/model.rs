//! Configuration type model
//!
//! The tagged-variant core of the compiler: one discriminated union per
//! type constructor, with a shared metadata record embedded in each
//! variant. Models are constructed by the loader, frozen after validation,
//! then read-only for all queries and emission.
//!
//! Every mapping is an [`IndexMap`] so declaration order survives from the
//! YAML source to the generated C; order is load-bearing for deterministic
//! output.

use std::collections::HashMap;

use indexmap::IndexMap;
use serde::Deserialize;

/// Name prefix of every generated C symbol.
pub const PLUGIN_NAME: &str = "l1_config";

/// An integer slot that admits either a literal or a define/enum-value
/// name, resolved lazily through the evaluator.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum IntOrName {
    Int(i64),
    Name(String),
}

impl std::fmt::Display for IntOrName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IntOrName::Int(v) => write!(f, "{v}"),
            IntOrName::Name(s) => write!(f, "{s}"),
        }
    }
}

/// Descriptive metadata allowed on every node: preserved, not
/// semantically constraining. `alias` overrides the accessor name of a
/// field, bypassing the parent-prefix convention.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Metadata {
    pub summary: Option<String>,
    pub description: Option<String>,
    pub alias: Option<String>,
}

/// A named integer constant, usable wherever a literal integer or range
/// endpoint is permitted.
#[derive(Debug, Clone, Deserialize)]
pub struct Define {
    pub value: i64,
    #[serde(flatten)]
    pub meta: Metadata,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EnumValue {
    #[serde(default)]
    pub value: Option<u8>,
    #[serde(flatten)]
    pub meta: Metadata,
}

/// Ordered set of named values; missing numeric values are assigned
/// sequentially by the C consumer.
#[derive(Debug, Clone, Deserialize)]
pub struct EnumDecl {
    pub values: IndexMap<String, EnumValue>,
    #[serde(flatten)]
    pub meta: Metadata,
}

/// Bits contained in a bitfield. The YAML field `size` is the width in
/// bits; `type` may refer to an enum.
#[derive(Debug, Clone, Deserialize)]
pub struct BitFieldBits {
    #[serde(rename = "size")]
    pub width: u8,
    pub default: IntOrName,
    #[serde(default)]
    pub range: Option<String>,
    #[serde(rename = "type", default)]
    pub element_type: Option<String>,
    #[serde(flatten)]
    pub meta: Metadata,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BitFieldDecl {
    pub bits: IndexMap<String, BitFieldBits>,
    #[serde(flatten)]
    pub meta: Metadata,
}

/// Fixed-size array of a named item type. `size` is an integer literal or
/// a define name. The default list is mandatory when items are numeric,
/// bool, or enum.
#[derive(Debug, Clone, Deserialize)]
pub struct ArrayDecl {
    pub item_type: String,
    pub size: IntOrName,
    #[serde(default)]
    pub range: Option<String>,
    #[serde(default)]
    pub default: Option<Vec<IntOrName>>,
    #[serde(flatten)]
    pub meta: Metadata,
}

/// A struct type replicated across a fixed index set (enum values or
/// `0..N-1`).
#[derive(Debug, Clone, Deserialize)]
pub struct ItemizedField {
    pub item_type: String,
    pub indexes: String,
    #[serde(flatten)]
    pub meta: Metadata,
}

/// The eight numeric width tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NumericWidth {
    #[default]
    U8,
    U16,
    U32,
    U64,
    I8,
    I16,
    I32,
    I64,
}

impl NumericWidth {
    pub const ALL: [NumericWidth; 8] = [
        NumericWidth::U8,
        NumericWidth::U16,
        NumericWidth::U32,
        NumericWidth::U64,
        NumericWidth::I8,
        NumericWidth::I16,
        NumericWidth::I32,
        NumericWidth::I64,
    ];

    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "uint8_t" => Some(NumericWidth::U8),
            "uint16_t" => Some(NumericWidth::U16),
            "uint32_t" => Some(NumericWidth::U32),
            "uint64_t" => Some(NumericWidth::U64),
            "int8_t" => Some(NumericWidth::I8),
            "int16_t" => Some(NumericWidth::I16),
            "int32_t" => Some(NumericWidth::I32),
            "int64_t" => Some(NumericWidth::I64),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            NumericWidth::U8 => "uint8_t",
            NumericWidth::U16 => "uint16_t",
            NumericWidth::U32 => "uint32_t",
            NumericWidth::U64 => "uint64_t",
            NumericWidth::I8 => "int8_t",
            NumericWidth::I16 => "int16_t",
            NumericWidth::I32 => "int32_t",
            NumericWidth::I64 => "int64_t",
        }
    }

    pub fn is_signed(self) -> bool {
        matches!(
            self,
            NumericWidth::I8 | NumericWidth::I16 | NumericWidth::I32 | NumericWidth::I64
        )
    }

    /// Natural limits of the width. i128 so `uint64_t` compares correctly.
    pub fn bounds(self) -> (i128, i128) {
        match self {
            NumericWidth::U8 => (0, u8::MAX as i128),
            NumericWidth::U16 => (0, u16::MAX as i128),
            NumericWidth::U32 => (0, u32::MAX as i128),
            NumericWidth::U64 => (0, u64::MAX as i128),
            NumericWidth::I8 => (i8::MIN as i128, i8::MAX as i128),
            NumericWidth::I16 => (i16::MIN as i128, i16::MAX as i128),
            NumericWidth::I32 => (i32::MIN as i128, i32::MAX as i128),
            NumericWidth::I64 => (i64::MIN as i128, i64::MAX as i128),
        }
    }
}

/// A numeric slot. The width comes from the `type` discriminator, not from
/// the payload, so the loader fills it in after dispatch.
#[derive(Debug, Clone, Deserialize)]
pub struct NumericDecl {
    #[serde(skip)]
    pub width: NumericWidth,
    pub default: IntOrName,
    #[serde(default)]
    pub range: Option<String>,
    #[serde(flatten)]
    pub meta: Metadata,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BoolDecl {
    pub default: bool,
    #[serde(flatten)]
    pub meta: Metadata,
}

/// Struct field referring to a named type. Default is mandatory when the
/// referenced type is an enum. The type name comes from the discriminator.
#[derive(Debug, Clone, Deserialize)]
pub struct CustomField {
    #[serde(skip)]
    pub type_name: String,
    #[serde(default)]
    pub default: Option<IntOrName>,
    #[serde(flatten)]
    pub meta: Metadata,
}

#[derive(Debug, Clone)]
pub struct StructDecl {
    pub fields: IndexMap<String, StructField>,
    pub meta: Metadata,
}

/// One field of a struct type.
#[derive(Debug, Clone)]
pub enum StructField {
    Itemized(ItemizedField),
    Numeric(NumericDecl),
    Bool(BoolDecl),
    Array(ArrayDecl),
    Custom(CustomField),
}

impl StructField {
    /// The `type` discriminator as written in the schema; for custom refs
    /// this is the referenced type name.
    pub fn element_type(&self) -> &str {
        match self {
            StructField::Itemized(_) => "itemized",
            StructField::Numeric(n) => n.width.as_str(),
            StructField::Bool(_) => "bool",
            StructField::Array(_) => "array",
            StructField::Custom(c) => &c.type_name,
        }
    }

    pub fn meta(&self) -> &Metadata {
        match self {
            StructField::Itemized(f) => &f.meta,
            StructField::Numeric(f) => &f.meta,
            StructField::Bool(f) => &f.meta,
            StructField::Array(f) => &f.meta,
            StructField::Custom(f) => &f.meta,
        }
    }

    pub fn alias(&self) -> Option<&str> {
        self.meta().alias.as_deref()
    }
}

/// A user-declared (or injected builtin) type.
#[derive(Debug, Clone)]
pub enum TypeDecl {
    Enum(EnumDecl),
    BitField(BitFieldDecl),
    Struct(StructDecl),
    Bool(BoolDecl),
    Array(ArrayDecl),
    Numeric(NumericDecl),
}

impl TypeDecl {
    /// The native tag of the declaration.
    pub fn element_type(&self) -> &'static str {
        match self {
            TypeDecl::Enum(_) => "enum",
            TypeDecl::BitField(_) => "bitfield",
            TypeDecl::Struct(_) => "struct",
            TypeDecl::Bool(_) => "bool",
            TypeDecl::Array(_) => "array",
            TypeDecl::Numeric(n) => n.width.as_str(),
        }
    }

    pub fn as_struct(&self) -> Option<&StructDecl> {
        match self {
            TypeDecl::Struct(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_enum(&self) -> Option<&EnumDecl> {
        match self {
            TypeDecl::Enum(e) => Some(e),
            _ => None,
        }
    }
}

/// The loaded schema: defines, types, and the root struct name.
#[derive(Debug, Clone)]
pub struct ConfigModel {
    pub version: u32,
    pub defines: IndexMap<String, Define>,
    pub types: IndexMap<String, TypeDecl>,
    pub root: String,
}

impl ConfigModel {
    /// Prepend the built-in types to the type table: the eight numeric
    /// widths and `bool`. Builtins come first; a user type reusing a
    /// builtin name replaces the value without moving it.
    pub(crate) fn inject_builtins(&mut self) {
        let mut table = IndexMap::with_capacity(self.types.len() + 9);
        for width in NumericWidth::ALL {
            table.insert(
                width.as_str().to_string(),
                TypeDecl::Numeric(NumericDecl {
                    width,
                    default: IntOrName::Int(0),
                    range: None,
                    meta: Metadata {
                        summary: Some(width.as_str().to_string()),
                        ..Metadata::default()
                    },
                }),
            );
        }
        table.insert(
            "bool".to_string(),
            TypeDecl::Bool(BoolDecl {
                default: false,
                meta: Metadata {
                    summary: Some("bool".to_string()),
                    ..Metadata::default()
                },
            }),
        );
        for (name, decl) in std::mem::take(&mut self.types) {
            table.insert(name, decl);
        }
        self.types = table;
    }

    /// Define values keyed by name, the variable map handed to the
    /// expression evaluator.
    pub fn define_values(&self) -> HashMap<String, i64> {
        self.defines
            .iter()
            .map(|(name, define)| (name.clone(), define.value))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn int_or_name_deserializes_both_shapes() {
        let v: IntOrName = serde_yaml::from_str("7").unwrap();
        assert_eq!(v, IntOrName::Int(7));
        let v: IntOrName = serde_yaml::from_str("N_MAX").unwrap();
        assert_eq!(v, IntOrName::Name("N_MAX".to_string()));
    }

    #[test]
    fn numeric_width_bounds() {
        assert_eq!(NumericWidth::U8.bounds(), (0, 255));
        assert_eq!(NumericWidth::I8.bounds(), (-128, 127));
        assert_eq!(NumericWidth::U64.bounds().1, u64::MAX as i128);
        assert!(NumericWidth::I64.is_signed());
        assert!(!NumericWidth::U32.is_signed());
    }

    #[test]
    fn builtins_injected_before_user_types() {
        let mut model = ConfigModel {
            version: 1,
            defines: IndexMap::new(),
            types: IndexMap::from([(
                "mode".to_string(),
                TypeDecl::Enum(EnumDecl {
                    values: IndexMap::new(),
                    meta: Metadata::default(),
                }),
            )]),
            root: "mode".to_string(),
        };
        model.inject_builtins();

        let names: Vec<&str> = model.types.keys().map(String::as_str).collect();
        assert_eq!(names[0], "uint8_t");
        assert_eq!(names[8], "bool");
        assert_eq!(names[9], "mode");
    }
}
