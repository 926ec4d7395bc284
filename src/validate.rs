//! Semantic validation
//!
//! The second pass, run after builtin injection: every cross-reference
//! must resolve, every default must be representable under its declared
//! type and range, itemized indexes must classify, the root must be a
//! struct, and no type may contain itself.

use std::collections::HashMap;

use petgraph::algo::kosaraju_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use regex::Regex;
use tracing::debug;

use crate::error::{Result, SchemaError};
use crate::expr;
use crate::model::{
    ArrayDecl, BitFieldDecl, ConfigModel, EnumDecl, IntOrName, NumericDecl, NumericWidth,
    StructField, TypeDecl,
};
use crate::queries::{is_builtin, is_numeric};

/// Validate a loaded model. The model is frozen afterwards.
pub fn validate(model: &ConfigModel) -> Result<()> {
    Validator::new(model).run()
}

struct Validator<'a> {
    model: &'a ConfigModel,
    defines: HashMap<String, i64>,
    numeric_range: Regex,
    bits_range: Regex,
}

impl<'a> Validator<'a> {
    fn new(model: &'a ConfigModel) -> Self {
        Self {
            model,
            defines: model.define_values(),
            numeric_range: Regex::new(r"^[A-Za-z0-9_-]+\.\.[A-Za-z0-9_-]+$").unwrap(),
            bits_range: Regex::new(r"^\d+\.\.\d+$").unwrap(),
        }
    }

    fn run(&self) -> Result<()> {
        for (name, decl) in &self.model.types {
            match decl {
                TypeDecl::Enum(e) => self.check_enum(name, e)?,
                TypeDecl::BitField(b) => self.check_bitfield(name, b)?,
                TypeDecl::Struct(s) => {
                    for (field_name, field) in &s.fields {
                        self.check_struct_field(field_name, field)?;
                    }
                }
                TypeDecl::Array(a) => self.check_array(a)?,
                TypeDecl::Numeric(n) => self.check_numeric(n)?,
                TypeDecl::Bool(_) => {}
            }
        }

        let root = self
            .model
            .types
            .get(&self.model.root)
            .ok_or_else(|| SchemaError::UndefinedRoot(self.model.root.clone()))?;
        if root.as_struct().is_none() {
            return Err(SchemaError::RootNotStruct(self.model.root.clone()).into());
        }

        self.check_cycles()?;
        debug!("model validated");
        Ok(())
    }

    fn check_enum(&self, name: &str, decl: &EnumDecl) -> Result<()> {
        let mut seen = Vec::new();
        for entry in decl.values.values() {
            if let Some(value) = entry.value {
                if seen.contains(&value) {
                    return Err(SchemaError::DuplicateEnumValue(value, name.to_string()).into());
                }
                seen.push(value);
            }
        }
        Ok(())
    }

    fn check_bitfield(&self, name: &str, decl: &BitFieldDecl) -> Result<()> {
        for (bit_name, bit) in &decl.bits {
            if bit.width == 0 {
                return Err(
                    SchemaError::BadBitsWidth(bit.width, format!("{name}.{bit_name}")).into(),
                );
            }

            if let Some(range) = &bit.range {
                if !self.bits_range.is_match(range) {
                    return Err(SchemaError::InvalidRange(range.clone()).into());
                }
                let (lo, hi) = split_range(range);
                let lo: u64 = lo.parse().map_err(|_| SchemaError::InvalidRange(range.clone()))?;
                let hi: u64 = hi.parse().map_err(|_| SchemaError::InvalidRange(range.clone()))?;
                if lo > hi || (bit.width < 64 && hi >= 1 << bit.width) {
                    return Err(SchemaError::RangeOutOfBounds(range.clone()).into());
                }
            }

            let element = match &bit.element_type {
                Some(element_type) => {
                    let Some(TypeDecl::Enum(e)) = self.model.types.get(element_type) else {
                        return Err(SchemaError::BitsTypeNotEnum(bit_name.clone()).into());
                    };
                    Some(e)
                }
                None => None,
            };

            match (&bit.default, element) {
                (IntOrName::Name(default), Some(e)) => {
                    if !e.values.contains_key(default) {
                        return Err(SchemaError::UnknownEnumDefault(default.clone()).into());
                    }
                }
                (IntOrName::Name(default), None) => {
                    if !self.defines.contains_key(default) {
                        return Err(SchemaError::UndefinedDefault(default.clone()).into());
                    }
                }
                (IntOrName::Int(v), _) => {
                    let fits = *v >= 0 && (bit.width >= 64 || *v < 1 << bit.width);
                    if !fits {
                        return Err(SchemaError::DefaultOutOfRange(v.to_string()).into());
                    }
                }
            }
        }
        Ok(())
    }

    fn check_struct_field(&self, field_name: &str, field: &StructField) -> Result<()> {
        match field {
            StructField::Numeric(n) => self.check_numeric(n),
            StructField::Bool(_) => Ok(()),
            StructField::Array(a) => self.check_array(a),
            StructField::Itemized(it) => {
                let item = self
                    .model
                    .types
                    .get(&it.item_type)
                    .ok_or_else(|| SchemaError::UndefinedType(it.item_type.clone()))?;
                if item.as_struct().is_none() {
                    return Err(SchemaError::NotAStruct(it.item_type.clone()).into());
                }
                let indexes_is_enum =
                    matches!(self.model.types.get(&it.indexes), Some(TypeDecl::Enum(_)));
                if !indexes_is_enum && !self.defines.contains_key(&it.indexes) {
                    return Err(SchemaError::BadItemizedIndexes(it.indexes.clone()).into());
                }
                Ok(())
            }
            StructField::Custom(c) => {
                let target = self
                    .model
                    .types
                    .get(&c.type_name)
                    .ok_or_else(|| SchemaError::UndefinedType(c.type_name.clone()))?;
                if let TypeDecl::Enum(e) = target {
                    let Some(default) = &c.default else {
                        return Err(SchemaError::MissingEnumDefault(field_name.to_string()).into());
                    };
                    let IntOrName::Name(default) = default else {
                        return Err(
                            SchemaError::EnumDefaultNotSymbolic(field_name.to_string()).into()
                        );
                    };
                    if !e.values.contains_key(default) {
                        return Err(SchemaError::UnknownEnumDefault(default.clone()).into());
                    }
                }
                Ok(())
            }
        }
    }

    fn check_numeric(&self, decl: &NumericDecl) -> Result<()> {
        let (lo, hi) = self.numeric_bounds(decl.width, decl.range.as_deref())?;

        let default = match &decl.default {
            IntOrName::Int(v) => *v,
            IntOrName::Name(name) => *self
                .defines
                .get(name)
                .ok_or_else(|| SchemaError::UndefinedDefault(name.clone()))?,
        };
        if (default as i128) < lo || (default as i128) > hi {
            return Err(SchemaError::DefaultOutOfRange(decl.default.to_string()).into());
        }
        Ok(())
    }

    /// Effective bounds of a numeric slot: its range when declared (which
    /// must lie within the width's natural limits), the width limits
    /// otherwise.
    fn numeric_bounds(&self, width: NumericWidth, range: Option<&str>) -> Result<(i128, i128)> {
        let (min, max) = width.bounds();
        let Some(range) = range else {
            return Ok((min, max));
        };

        if !self.numeric_range.is_match(range) {
            return Err(SchemaError::InvalidRange(range.to_string()).into());
        }
        let (lo, hi) = split_range(range);
        let lo = expr::evaluate(lo, &self.defines)? as i128;
        let hi = expr::evaluate(hi, &self.defines)? as i128;
        if lo < min || hi > max || lo > hi {
            return Err(SchemaError::RangeOutOfBounds(range.to_string()).into());
        }
        Ok((lo, hi))
    }

    fn check_array(&self, decl: &ArrayDecl) -> Result<()> {
        if !is_numeric(&decl.item_type) && !self.model.types.contains_key(&decl.item_type) {
            return Err(SchemaError::UndefinedType(decl.item_type.clone()).into());
        }

        let size = match &decl.size {
            IntOrName::Int(v) => *v,
            IntOrName::Name(name) => *self
                .defines
                .get(name)
                .ok_or_else(|| SchemaError::BadArraySize(name.clone()))?,
        };
        if size <= 0 {
            return Err(SchemaError::BadArraySize(decl.size.to_string()).into());
        }
        let size = size as usize;

        let item_enum = self
            .model
            .types
            .get(&decl.item_type)
            .and_then(TypeDecl::as_enum);

        // Range on an array constrains its numeric items.
        if decl.range.is_some() {
            if let Some(TypeDecl::Numeric(n)) = self.model.types.get(&decl.item_type) {
                self.numeric_bounds(n.width, decl.range.as_deref())?;
            }
        }

        let Some(default) = &decl.default else {
            if is_numeric(&decl.item_type) {
                return Err(SchemaError::MissingArrayDefault("numeric").into());
            }
            if decl.item_type == "bool" {
                return Err(SchemaError::MissingArrayDefault("bool").into());
            }
            if item_enum.is_some() {
                return Err(SchemaError::MissingArrayDefault("enum").into());
            }
            return Ok(());
        };

        if default.len() != size {
            return Err(SchemaError::DefaultArity(size).into());
        }
        for entry in default {
            match entry {
                IntOrName::Name(name) => match item_enum {
                    Some(e) => {
                        if !e.values.contains_key(name) {
                            return Err(SchemaError::UnknownEnumDefault(name.clone()).into());
                        }
                    }
                    None => {
                        if !self.defines.contains_key(name) {
                            return Err(SchemaError::UndefinedDefault(name.clone()).into());
                        }
                    }
                },
                IntOrName::Int(_) => {
                    if item_enum.is_some() {
                        return Err(SchemaError::EnumArrayDefaultNotSymbolic.into());
                    }
                }
            }
        }
        Ok(())
    }

    /// No type may contain itself through struct fields, itemized
    /// replication, or array items.
    fn check_cycles(&self) -> Result<()> {
        let mut graph: DiGraph<&str, ()> = DiGraph::new();
        let mut nodes: HashMap<&str, NodeIndex> = HashMap::new();
        for name in self.model.types.keys() {
            if !is_builtin(name) {
                nodes.insert(name.as_str(), graph.add_node(name.as_str()));
            }
        }

        let mut add_edge = |graph: &mut DiGraph<&str, ()>, from: &str, to: &str| {
            if let (Some(&a), Some(&b)) = (nodes.get(from), nodes.get(to)) {
                graph.add_edge(a, b, ());
            }
        };

        for (name, decl) in &self.model.types {
            match decl {
                TypeDecl::Struct(s) => {
                    for field in s.fields.values() {
                        match field {
                            StructField::Custom(c) => add_edge(&mut graph, name, &c.type_name),
                            StructField::Itemized(it) => add_edge(&mut graph, name, &it.item_type),
                            StructField::Array(a) => add_edge(&mut graph, name, &a.item_type),
                            _ => {}
                        }
                    }
                }
                TypeDecl::Array(a) => add_edge(&mut graph, name, &a.item_type),
                _ => {}
            }
        }

        for scc in kosaraju_scc(&graph) {
            let cyclic = scc.len() > 1 || graph.contains_edge(scc[0], scc[0]);
            if cyclic {
                return Err(SchemaError::TypeCycle(graph[scc[0]].to_string()).into());
            }
        }
        Ok(())
    }
}

fn split_range(range: &str) -> (&str, &str) {
    // Callers have matched the range pattern already.
    range.split_once("..").unwrap_or((range, range))
}

#[cfg(test)]
mod tests {
    use crate::error::Error;
    use crate::loader::load_str;

    fn schema(body: &str) -> String {
        format!("version: 1\ndefines: {{}}\ntypes:\n{body}root: root\n")
    }

    #[test]
    fn default_above_range_is_rejected() {
        let input = schema(
            "  root:\n    type: struct\n    fields:\n      x:\n        type: uint8_t\n        default: 300\n",
        );
        let err = load_str(&input, &[]).unwrap_err();
        assert!(err
            .to_string()
            .contains("Invalid range for default value 300"));
    }

    #[test]
    fn default_outside_declared_range_is_rejected() {
        let input = schema(
            "  root:\n    type: struct\n    fields:\n      x:\n        type: uint8_t\n        default: 11\n        range: 0..10\n",
        );
        let err = load_str(&input, &[]).unwrap_err();
        assert!(err
            .to_string()
            .contains("Invalid range for default value 11"));
    }

    #[test]
    fn range_beyond_width_is_rejected() {
        let input = schema(
            "  root:\n    type: struct\n    fields:\n      x:\n        type: uint8_t\n        default: 0\n        range: 0..300\n",
        );
        let err = load_str(&input, &[]).unwrap_err();
        assert!(err.to_string().contains("Range 0..300 is not valid"));
    }

    #[test]
    fn malformed_range_is_rejected() {
        let input = schema(
            "  root:\n    type: struct\n    fields:\n      x:\n        type: uint8_t\n        default: 0\n        range: 0..10..20\n",
        );
        let err = load_str(&input, &[]).unwrap_err();
        assert!(err.to_string().contains("Invalid range 0..10..20"));
    }

    #[test]
    fn symbolic_range_endpoint_resolves_through_defines() {
        let input = "\
version: 1
defines:
  N_MAX:
    value: 16
    summary: upper bound
types:
  root:
    type: struct
    fields:
      x:
        type: uint8_t
        default: 15
        range: 0..N_MAX-1
root: root
";
        load_str(input, &[]).unwrap();
    }

    #[test]
    fn unknown_range_symbol_is_a_range_error() {
        let input = schema(
            "  root:\n    type: struct\n    fields:\n      x:\n        type: uint8_t\n        default: 0\n        range: 0..NOPE\n",
        );
        let err = load_str(&input, &[]).unwrap_err();
        assert!(matches!(err, Error::Range(_)));
        assert!(err.to_string().contains("Unknown symbol NOPE"));
    }

    #[test]
    fn undefined_custom_type_is_rejected() {
        let input = schema(
            "  root:\n    type: struct\n    fields:\n      x:\n        type: NotAType\n",
        );
        let err = load_str(&input, &[]).unwrap_err();
        assert!(err.to_string().contains("Type NotAType is undefined"));
    }

    #[test]
    fn enum_custom_field_requires_symbolic_default() {
        let base = "  e:\n    type: enum\n    values:\n      A:\n        value: 0\n      B:\n        value: 1\n";
        let missing = schema(&format!(
            "{base}  root:\n    type: struct\n    fields:\n      mode:\n        type: e\n"
        ));
        let err = load_str(&missing, &[]).unwrap_err();
        assert!(err.to_string().contains("Default is mandatory"));

        let numeric = schema(&format!(
            "{base}  root:\n    type: struct\n    fields:\n      mode:\n        type: e\n        default: 1\n"
        ));
        let err = load_str(&numeric, &[]).unwrap_err();
        assert!(err.to_string().contains("one of the enum values"));

        let wrong = schema(&format!(
            "{base}  root:\n    type: struct\n    fields:\n      mode:\n        type: e\n        default: C\n"
        ));
        let err = load_str(&wrong, &[]).unwrap_err();
        assert!(err.to_string().contains("Default C is not defined in enum values"));

        let good = schema(&format!(
            "{base}  root:\n    type: struct\n    fields:\n      mode:\n        type: e\n        default: B\n"
        ));
        load_str(&good, &[]).unwrap();
    }

    #[test]
    fn array_default_arity_is_enforced() {
        let input = schema(
            "  root:\n    type: struct\n    fields:\n      xs:\n        type: array\n        item_type: uint8_t\n        size: 3\n        default: [1, 2]\n",
        );
        let err = load_str(&input, &[]).unwrap_err();
        assert!(err.to_string().contains("Default should contain 3 elements"));
    }

    #[test]
    fn numeric_array_requires_a_default() {
        let input = schema(
            "  root:\n    type: struct\n    fields:\n      xs:\n        type: array\n        item_type: uint8_t\n        size: 3\n",
        );
        let err = load_str(&input, &[]).unwrap_err();
        assert!(err
            .to_string()
            .contains("Default is mandatory for items of type numeric"));
    }

    #[test]
    fn root_must_be_a_struct() {
        let undefined = "version: 1\ndefines: {}\ntypes: {}\nroot: nothing\n";
        let err = load_str(undefined, &[]).unwrap_err();
        assert!(err
            .to_string()
            .contains("Struct nothing used as root is not defined"));

        let not_struct = schema("  root:\n    type: bool\n    default: false\n");
        let err = load_str(&not_struct, &[]).unwrap_err();
        assert!(err.to_string().contains("Root root is not a struct"));
    }

    #[test]
    fn containment_cycles_are_detected() {
        let input = schema(
            "  a:\n    type: struct\n    fields:\n      b:\n        type: b\n  b:\n    type: struct\n    fields:\n      a:\n        type: a\n  root:\n    type: struct\n    fields:\n      a:\n        type: a\n",
        );
        let err = load_str(&input, &[]).unwrap_err();
        assert!(err.to_string().contains("Type cycle detected"));
    }

    #[test]
    fn self_containment_is_detected() {
        let input = schema(
            "  root:\n    type: struct\n    fields:\n      next:\n        type: root\n",
        );
        let err = load_str(&input, &[]).unwrap_err();
        assert!(err.to_string().contains("Type cycle detected involving root"));
    }

    #[test]
    fn itemized_indexes_must_classify() {
        let input = schema(
            "  s:\n    type: struct\n    fields:\n      v:\n        type: uint8_t\n        default: 0\n  root:\n    type: struct\n    fields:\n      chan:\n        type: itemized\n        item_type: s\n        indexes: MISSING\n",
        );
        let err = load_str(&input, &[]).unwrap_err();
        assert!(err
            .to_string()
            .contains("Index MISSING is not an enum or a define"));
    }

    #[test]
    fn bitfield_bits_are_checked() {
        let zero_width = schema(
            "  bf:\n    type: bitfield\n    bits:\n      f:\n        size: 0\n        default: 0\n  root:\n    type: struct\n    fields:\n      b:\n        type: bf\n",
        );
        let err = load_str(&zero_width, &[]).unwrap_err();
        assert!(err.to_string().contains("Invalid bits width 0"));

        let loose_range = schema(
            "  bf:\n    type: bitfield\n    bits:\n      f:\n        size: 2\n        default: 0\n        range: 0..x\n  root:\n    type: struct\n    fields:\n      b:\n        type: bf\n",
        );
        let err = load_str(&loose_range, &[]).unwrap_err();
        assert!(err.to_string().contains("Invalid range 0..x"));

        let wide_default = schema(
            "  bf:\n    type: bitfield\n    bits:\n      f:\n        size: 2\n        default: 4\n  root:\n    type: struct\n    fields:\n      b:\n        type: bf\n",
        );
        let err = load_str(&wide_default, &[]).unwrap_err();
        assert!(err.to_string().contains("Invalid range for default value 4"));
    }
}
