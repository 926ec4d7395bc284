//! `l1_config_types.h` emission
//!
//! One C declaration per user type, in schema order: enums (with their
//! `<NAME>_NUM` macro), bitfields as bit-packed structs, structs with
//! itemized fields expanded into replicas, arrays as typedefs. Schema
//! defines come first so later declarations can reference them.

use crate::error::Result;
use crate::model::{ConfigModel, StructDecl, StructField, TypeDecl};
use crate::queries::is_builtin;

use super::{bits_storage, close_guard, doc_comment, file_banner, open_guard};

const GUARD: &str = "L1_CONFIG_TYPES_H";

pub fn render(model: &ConfigModel) -> Result<String> {
    let mut out = String::new();
    file_banner(&mut out);
    open_guard(&mut out, GUARD);

    out.push_str("#include <stdbool.h>\n#include <stdint.h>\n\n");

    if !model.defines.is_empty() {
        out.push_str("/* Configuration defines. */\n");
        for (name, define) in &model.defines {
            doc_comment(&mut out, define.meta.summary.as_deref());
            out.push_str(&format!("#define {name} {}\n", define.value));
        }
        out.push('\n');
    }

    for (name, decl) in &model.types {
        if is_builtin(name) {
            continue;
        }
        match decl {
            TypeDecl::Enum(e) => {
                doc_comment(&mut out, e.meta.summary.as_deref());
                out.push_str(&format!("enum {name} {{\n"));
                for (value_name, value) in &e.values {
                    match value.value {
                        Some(v) => out.push_str(&format!("\t{value_name} = {v},\n")),
                        None => out.push_str(&format!("\t{value_name},\n")),
                    }
                }
                out.push_str("};\n");
                out.push_str(&format!(
                    "#define {}_NUM {}\n\n",
                    name.to_uppercase(),
                    e.values.len()
                ));
            }
            TypeDecl::BitField(b) => {
                doc_comment(&mut out, b.meta.summary.as_deref());
                out.push_str(&format!("struct {name} {{\n"));
                for (bit_name, bit) in &b.bits {
                    doc_comment_indented(&mut out, bit.meta.summary.as_deref());
                    out.push_str(&format!(
                        "\t{} {bit_name} : {};\n",
                        bits_storage(bit),
                        bit.width
                    ));
                }
                out.push_str("};\n\n");
            }
            TypeDecl::Struct(s) => {
                doc_comment(&mut out, s.meta.summary.as_deref());
                out.push_str(&format!("struct {name} {{\n"));
                render_struct_members(model, s, &mut out)?;
                out.push_str("};\n\n");
            }
            TypeDecl::Array(a) => {
                doc_comment(&mut out, a.meta.summary.as_deref());
                let item = model.get_full_type(&a.item_type)?;
                out.push_str(&format!("typedef {item} {name}[{}];\n\n", a.size));
            }
            TypeDecl::Numeric(n) => {
                doc_comment(&mut out, n.meta.summary.as_deref());
                out.push_str(&format!("typedef {} {name};\n\n", n.width.as_str()));
            }
            TypeDecl::Bool(b) => {
                doc_comment(&mut out, b.meta.summary.as_deref());
                out.push_str(&format!("typedef bool {name};\n\n"));
            }
        }
    }

    close_guard(&mut out, GUARD);
    Ok(out)
}

fn render_struct_members(model: &ConfigModel, decl: &StructDecl, out: &mut String) -> Result<()> {
    for (field_name, field) in &decl.fields {
        doc_comment_indented(out, field.meta().summary.as_deref());
        match field {
            StructField::Numeric(n) => {
                out.push_str(&format!("\t{} {field_name};\n", n.width.as_str()));
            }
            StructField::Bool(_) => {
                out.push_str(&format!("\tbool {field_name};\n"));
            }
            StructField::Array(a) => {
                let item = model.get_full_type(&a.item_type)?;
                out.push_str(&format!("\t{item} {field_name}[{}];\n", a.size));
            }
            StructField::Custom(c) => {
                let full = model.get_full_type(&c.type_name)?;
                out.push_str(&format!("\t{full} {field_name};\n"));
            }
            StructField::Itemized(it) => {
                let full = model.get_full_type(&it.item_type)?;
                for label in model.get_itemized_index_list(it)? {
                    out.push_str(&format!("\t{full} {field_name}{label};\n"));
                }
            }
        }
    }
    Ok(())
}

fn doc_comment_indented(out: &mut String, summary: Option<&str>) {
    if let Some(summary) = summary {
        out.push_str(&format!("\t/** {summary} */\n"));
    }
}
