//! Schema loading and preprocessing
//!
//! Three steps, in order:
//!
//! 1. merge `-D NAME=VALUE` overrides into the raw tree's `defines` map;
//! 2. prune every map whose `flag` expression evaluates false, with the
//!    define values bound as variables (overrides win, unknown symbols
//!    read as 0);
//! 3. dispatch each map on its `type` discriminator into the model.
//!
//! The result is validated and returned frozen; nothing downstream
//! mutates it.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde_yaml::{Mapping, Value};
use tracing::debug;

use crate::error::{Result, SchemaError};
use crate::expr;
use crate::model::{ConfigModel, Define, NumericWidth, StructDecl, StructField, TypeDecl};
use crate::validate;

/// Load, preprocess, parse, and validate a schema file.
pub fn load_file(path: &Path, overrides: &[String]) -> Result<ConfigModel> {
    let input = fs::read_to_string(path)?;
    load_str(&input, overrides)
}

/// Load a schema from an in-memory YAML document.
pub fn load_str(input: &str, overrides: &[String]) -> Result<ConfigModel> {
    let raw: Value = serde_yaml::from_str(input)
        .map_err(|e| SchemaError::InvalidYaml(e.to_string()))?;
    let Value::Mapping(mut doc) = raw else {
        return Err(SchemaError::InvalidYaml("document root is not a mapping".to_string()).into());
    };

    inject_overrides(&mut doc, overrides)?;

    let flag_vars = collect_flag_vars(&doc);
    let doc = match prune_flags(Value::Mapping(doc), &flag_vars)? {
        Some(Value::Mapping(doc)) => doc,
        _ => Mapping::new(),
    };

    let mut model = parse_model(&doc)?;
    model.inject_builtins();
    validate::validate(&model)?;
    debug!(
        types = model.types.len(),
        defines = model.defines.len(),
        "schema loaded"
    );
    Ok(model)
}

/// Merge `NAME=VALUE` overrides into the raw `defines` mapping, each as a
/// define whose summary is its own name.
fn inject_overrides(doc: &mut Mapping, overrides: &[String]) -> Result<()> {
    if overrides.is_empty() {
        return Ok(());
    }

    let defines = doc
        .entry(Value::String("defines".to_string()))
        .or_insert_with(|| Value::Mapping(Mapping::new()));
    let Value::Mapping(defines) = defines else {
        return Err(SchemaError::InvalidNode(
            "defines".to_string(),
            "expected a mapping".to_string(),
        )
        .into());
    };

    for raw in overrides {
        let (name, value) = raw
            .split_once('=')
            .ok_or_else(|| SchemaError::InvalidOverride(raw.clone()))?;
        let value: i64 = value
            .trim()
            .parse()
            .map_err(|_| SchemaError::InvalidOverride(raw.clone()))?;

        let mut define = Mapping::new();
        define.insert(Value::String("value".to_string()), Value::Number(value.into()));
        define.insert(
            Value::String("summary".to_string()),
            Value::String(name.to_string()),
        );
        defines.insert(Value::String(name.to_string()), Value::Mapping(define));
        debug!(name, value, "define override injected");
    }
    Ok(())
}

/// Variables visible to `flag` expressions: every define's integer value,
/// CLI overrides already merged in.
fn collect_flag_vars(doc: &Mapping) -> HashMap<String, i64> {
    let mut vars = HashMap::new();
    let Some(Value::Mapping(defines)) = doc.get("defines") else {
        return vars;
    };
    for (name, define) in defines {
        let (Value::String(name), Value::Mapping(define)) = (name, define) else {
            continue;
        };
        if let Some(value) = define
            .get("value")
            .and_then(Value::as_i64)
        {
            vars.insert(name.clone(), value);
        }
    }
    vars
}

/// Recursively drop every mapping whose `flag` evaluates false. The `flag`
/// key itself is consumed; mappings left empty vanish with it. Sequences
/// pass through untouched.
fn prune_flags(value: Value, vars: &HashMap<String, i64>) -> Result<Option<Value>> {
    let Value::Mapping(map) = value else {
        return Ok(Some(value));
    };

    let mut kept = Mapping::new();
    for (key, entry) in map {
        if let Value::Mapping(_) = entry {
            if let Some(entry) = prune_flags(entry, vars)? {
                kept.insert(key, entry);
            }
        } else if key.as_str() == Some("flag") {
            let Value::String(flag) = &entry else {
                return Err(SchemaError::InvalidExpression(format!("{entry:?}")).into());
            };
            let enabled = expr::evaluate_flag(flag, vars)
                .map_err(|_| SchemaError::InvalidExpression(flag.clone()))?;
            if !enabled {
                debug!(flag = %flag, "subtree pruned");
                return Ok(None);
            }
        } else {
            kept.insert(key, entry);
        }
    }

    if kept.is_empty() {
        return Ok(None);
    }
    Ok(Some(Value::Mapping(kept)))
}

fn parse_model(doc: &Mapping) -> Result<ConfigModel> {
    check_fields(doc, &["version", "defines", "types", "root"], "schema")?;

    let version = doc
        .get("version")
        .and_then(Value::as_u64)
        .and_then(|v| u32::try_from(v).ok())
        .ok_or(SchemaError::MissingField("version", "schema".to_string()))?;

    let root = doc
        .get("root")
        .and_then(Value::as_str)
        .ok_or(SchemaError::MissingField("root", "schema".to_string()))?
        .to_string();

    let mut defines = IndexMap::new();
    for (name, entry) in mapping_entries(doc, "defines")? {
        let map = as_mapping(&entry, &name)?;
        check_fields(map, &["value", "summary", "description"], &name)?;
        defines.insert(name.clone(), from_value::<Define>(entry, &name)?);
    }

    let mut types = IndexMap::new();
    for (name, entry) in mapping_entries(doc, "types")? {
        let decl = parse_type_decl(&name, &entry)?;
        types.insert(name, decl);
    }

    Ok(ConfigModel {
        version,
        defines,
        types,
        root,
    })
}

/// Dispatch a top-level type declaration on its `type` discriminator.
fn parse_type_decl(name: &str, value: &Value) -> Result<TypeDecl> {
    let map = as_mapping(value, name)?;
    let tag = discriminator(map, name)?;

    let decl = match tag {
        "enum" => {
            check_fields(map, &["type", "values", "summary", "description", "alias"], name)?;
            if let Some(Value::Mapping(values)) = map.get("values") {
                for (value_name, entry) in values {
                    let ctx = format!("{name}.{}", key_name(value_name, name)?);
                    let value_map = as_mapping(entry, &ctx)?;
                    check_fields(value_map, &["value", "summary", "description"], &ctx)?;
                }
            }
            TypeDecl::Enum(from_value(strip_tag(map), name)?)
        }
        "bitfield" => {
            check_fields(map, &["type", "bits", "summary", "description", "alias"], name)?;
            if let Some(Value::Mapping(bits)) = map.get("bits") {
                for (bit_name, entry) in bits {
                    let ctx = format!("{name}.{}", key_name(bit_name, name)?);
                    let bit_map = as_mapping(entry, &ctx)?;
                    check_fields(
                        bit_map,
                        &["size", "default", "range", "type", "summary", "description", "alias"],
                        &ctx,
                    )?;
                }
            }
            TypeDecl::BitField(from_value(strip_tag(map), name)?)
        }
        "struct" => TypeDecl::Struct(parse_struct(name, map)?),
        "array" => {
            check_fields(
                map,
                &["type", "item_type", "size", "range", "default", "summary", "description", "alias"],
                name,
            )?;
            TypeDecl::Array(from_value(strip_tag(map), name)?)
        }
        "bool" => {
            check_fields(map, &["type", "default", "summary", "description", "alias"], name)?;
            TypeDecl::Bool(from_value(strip_tag(map), name)?)
        }
        tag => match NumericWidth::from_tag(tag) {
            Some(width) => TypeDecl::Numeric(parse_numeric(name, map, width)?),
            None => return Err(SchemaError::UnknownType(tag.to_string()).into()),
        },
    };
    Ok(decl)
}

fn parse_struct(name: &str, map: &Mapping) -> Result<StructDecl> {
    check_fields(map, &["type", "fields", "summary", "description", "alias"], name)?;
    let Some(Value::Mapping(raw_fields)) = map.get("fields") else {
        return Err(SchemaError::MissingField("fields", name.to_string()).into());
    };

    let mut fields = IndexMap::new();
    for (field_name, entry) in raw_fields {
        let field_name = key_name(field_name, name)?;
        let ctx = format!("{name}.{field_name}");
        fields.insert(field_name.to_string(), parse_struct_field(&ctx, entry)?);
    }

    let meta = from_value(strip_field(map, &["type", "fields"]), name)?;
    Ok(StructDecl { fields, meta })
}

/// Dispatch a struct field. Tags outside the native set become custom
/// refs, resolved against the type table during validation.
fn parse_struct_field(ctx: &str, value: &Value) -> Result<StructField> {
    let map = as_mapping(value, ctx)?;
    let tag = discriminator(map, ctx)?;

    let field = match tag {
        "itemized" => {
            check_fields(
                map,
                &["type", "item_type", "indexes", "summary", "description", "alias"],
                ctx,
            )?;
            StructField::Itemized(from_value(strip_tag(map), ctx)?)
        }
        "array" => {
            check_fields(
                map,
                &["type", "item_type", "size", "range", "default", "summary", "description", "alias"],
                ctx,
            )?;
            StructField::Array(from_value(strip_tag(map), ctx)?)
        }
        "bool" => {
            check_fields(map, &["type", "default", "summary", "description", "alias"], ctx)?;
            StructField::Bool(from_value(strip_tag(map), ctx)?)
        }
        tag => match NumericWidth::from_tag(tag) {
            Some(width) => StructField::Numeric(parse_numeric(ctx, map, width)?),
            None => {
                check_fields(map, &["type", "default", "summary", "description", "alias"], ctx)?;
                let mut custom: crate::model::CustomField = from_value(strip_tag(map), ctx)?;
                custom.type_name = tag.to_string();
                StructField::Custom(custom)
            }
        },
    };
    Ok(field)
}

fn parse_numeric(
    ctx: &str,
    map: &Mapping,
    width: NumericWidth,
) -> Result<crate::model::NumericDecl> {
    check_fields(map, &["type", "default", "range", "summary", "description", "alias"], ctx)?;
    let mut decl: crate::model::NumericDecl = from_value(strip_tag(map), ctx)?;
    decl.width = width;
    Ok(decl)
}

fn discriminator<'a>(map: &'a Mapping, ctx: &str) -> Result<&'a str> {
    map.get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| SchemaError::MissingField("type", ctx.to_string()).into())
}

fn as_mapping<'a>(value: &'a Value, ctx: &str) -> Result<&'a Mapping> {
    value.as_mapping().ok_or_else(|| {
        SchemaError::InvalidNode(ctx.to_string(), "expected a mapping".to_string()).into()
    })
}

fn key_name<'a>(key: &'a Value, ctx: &str) -> Result<&'a str> {
    key.as_str().ok_or_else(|| {
        SchemaError::InvalidNode(ctx.to_string(), "mapping key is not a string".to_string()).into()
    })
}

/// Unknown fields inside a variant map are errors.
fn check_fields(map: &Mapping, allowed: &[&str], ctx: &str) -> Result<()> {
    for key in map.keys() {
        let key = key_name(key, ctx)?;
        if !allowed.contains(&key) {
            return Err(SchemaError::UnknownField(key.to_string(), ctx.to_string()).into());
        }
    }
    Ok(())
}

/// Iterate an optional top-level mapping (`defines`, `types`) in
/// declaration order.
fn mapping_entries(doc: &Mapping, field: &str) -> Result<Vec<(String, Value)>> {
    let Some(value) = doc.get(field) else {
        return Ok(Vec::new());
    };
    let map = as_mapping(value, field)?;
    let mut entries = Vec::with_capacity(map.len());
    for (name, entry) in map {
        entries.push((key_name(name, field)?.to_string(), entry.clone()));
    }
    Ok(entries)
}

/// Copy of the map without the `type` discriminator, ready for payload
/// deserialization.
fn strip_tag(map: &Mapping) -> Value {
    strip_field(map, &["type"])
}

fn strip_field(map: &Mapping, fields: &[&str]) -> Value {
    let mut copy = map.clone();
    for field in fields {
        copy.remove(*field);
    }
    Value::Mapping(copy)
}

fn from_value<T: DeserializeOwned>(value: Value, ctx: &str) -> Result<T> {
    serde_yaml::from_value(value)
        .map_err(|e| SchemaError::InvalidNode(ctx.to_string(), e.to_string()).into())
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = "\
version: 1
defines: {}
types:
  root:
    type: struct
    fields:
      x:
        type: uint8_t
        default: 0
        range: 0..10
root: root
";

    #[test]
    fn minimal_schema_loads() {
        let model = load_str(MINIMAL, &[]).unwrap();
        assert_eq!(model.version, 1);
        assert_eq!(model.root, "root");
        // Builtins plus the declared root.
        assert_eq!(model.types.len(), 10);
        let root = model.types["root"].as_struct().unwrap();
        assert!(matches!(root.fields["x"], StructField::Numeric(_)));
    }

    #[test]
    fn unknown_top_level_type_tag_is_rejected() {
        let input = MINIMAL.replace("type: struct", "type: gadget");
        let err = load_str(&input, &[]).unwrap_err();
        assert!(err.to_string().contains("Unknown type gadget"));
    }

    #[test]
    fn unknown_field_is_rejected() {
        let input = MINIMAL.replace("range: 0..10", "range: 0..10\n        wat: 3");
        let err = load_str(&input, &[]).unwrap_err();
        assert!(err.to_string().contains("Unknown field wat"));
    }

    #[test]
    fn override_injects_a_define() {
        let model = load_str(MINIMAL, &["EXTRA=5".to_string()]).unwrap();
        assert_eq!(model.defines["EXTRA"].value, 5);
        assert_eq!(model.defines["EXTRA"].meta.summary.as_deref(), Some("EXTRA"));
    }

    #[test]
    fn malformed_override_is_rejected() {
        let err = load_str(MINIMAL, &["EXTRA".to_string()]).unwrap_err();
        assert!(err.to_string().contains("Invalid define override"));
        let err = load_str(MINIMAL, &["EXTRA=x".to_string()]).unwrap_err();
        assert!(err.to_string().contains("Invalid define override"));
    }

    #[test]
    fn false_flag_prunes_the_enclosing_map() {
        let input = "\
version: 1
defines:
  FEAT:
    value: 0
    summary: feature switch
types:
  root:
    type: struct
    fields:
      always:
        type: bool
        default: false
      gated:
        flag: FEAT
        type: uint8_t
        default: 0
root: root
";
        let model = load_str(input, &[]).unwrap();
        let root = model.types["root"].as_struct().unwrap();
        assert!(root.fields.contains_key("always"));
        assert!(!root.fields.contains_key("gated"));

        // The same schema with the define forced on keeps the field.
        let model = load_str(input, &["FEAT=1".to_string()]).unwrap();
        let root = model.types["root"].as_struct().unwrap();
        assert!(root.fields.contains_key("gated"));
    }

    #[test]
    fn invalid_flag_expression_is_fatal() {
        let input = MINIMAL.replace("        default: 0\n", "        default: 0\n        flag: \"FEAT ~ 1\"\n");
        let err = load_str(&input, &[]).unwrap_err();
        assert!(err.to_string().contains("Invalid expression"));
    }

    #[test]
    fn flag_sees_schema_defines_without_overrides() {
        let input = "\
version: 1
defines:
  FEAT:
    value: 1
    summary: feature switch
types:
  root:
    type: struct
    fields:
      gated:
        flag: FEAT
        type: uint8_t
        default: 0
root: root
";
        let model = load_str(input, &[]).unwrap();
        let root = model.types["root"].as_struct().unwrap();
        assert!(root.fields.contains_key("gated"));
    }
}
