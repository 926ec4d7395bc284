//! `l1_config_keys.{c,h}` emission
//!
//! The header exposes the compile-time key enumeration and the descriptor
//! struct; the source materializes one default object per key, the policy
//! check functions, and the flat descriptor array binding them together.
//!
//! Checkers referenced by composite checkers (struct members, array
//! items) are emitted first and deduplicated by name, so each function is
//! defined once and before its first use.

use crate::error::Result;
use crate::model::{
    ArrayDecl, BitFieldDecl, ConfigModel, EnumDecl, NumericWidth, StructDecl, StructField,
    TypeDecl, PLUGIN_NAME,
};
use crate::queries::{is_native_type, is_numeric, KeyEntry};

use super::{close_guard, file_banner, leaf_array, open_guard};

const GUARD: &str = "L1_CONFIG_KEYS_H";

pub fn render_header(model: &ConfigModel) -> Result<String> {
    let keys = model.flatten_keys()?;

    let mut out = String::new();
    file_banner(&mut out);
    open_guard(&mut out, GUARD);

    out.push_str("#include <stdbool.h>\n#include <stddef.h>\n#include <stdint.h>\n\n");
    out.push_str("#include \"l1_config_types.h\"\n\n");

    out.push_str(&format!("#define L1_CONFIG_VERSION {}\n\n", model.version));

    out.push_str("/* Flat key space, one entry per leaf parameter. */\n");
    out.push_str("enum l1_config_key {\n");
    for key in &keys {
        out.push_str(&format!("\t{},\n", key.enumerator()));
    }
    out.push_str("};\n\n");

    out.push_str(&format!("#define L1_CONFIG_NB_KEYS {}\n", model.get_nb_keys()?));
    out.push_str(&format!(
        "#define L1_CONFIG_NB_ROOT_KEY_SECTIONS {}\n\n",
        model.get_nb_root_key_sections()?
    ));

    out.push_str("/* Returns true when the candidate value is acceptable for the key. */\n");
    out.push_str("typedef bool (*l1_config_policy_check_t)(const void *value);\n\n");

    out.push_str("struct l1_config_key_desc {\n");
    out.push_str("\tconst char *name;\n");
    out.push_str("\tsize_t size;\n");
    out.push_str("\tconst void *def_value;\n");
    out.push_str("\tl1_config_policy_check_t check;\n");
    out.push_str("};\n\n");

    out.push_str("extern const struct l1_config_key_desc l1_config_keys[L1_CONFIG_NB_KEYS];\n\n");

    close_guard(&mut out, GUARD);
    Ok(out)
}

pub fn render_source(model: &ConfigModel) -> Result<String> {
    let keys = model.flatten_keys()?;

    let mut out = String::new();
    file_banner(&mut out);
    out.push_str("#include \"l1_config_keys.h\"\n\n");

    out.push_str("/* Default values. */\n");
    for key in &keys {
        render_default(model, key, &mut out)?;
    }
    out.push('\n');

    let mut checkers = Checkers::new(model);
    for key in &keys {
        checkers.add_key(key)?;
    }
    if !checkers.bodies.is_empty() {
        out.push_str("/* Policy check functions. */\n");
        for body in &checkers.bodies {
            out.push_str(body);
            out.push('\n');
        }
    }

    out.push_str("const struct l1_config_key_desc l1_config_keys[L1_CONFIG_NB_KEYS] = {\n");
    for key in &keys {
        let symbol = key.symbol();
        out.push_str(&format!("\t[{}] = {{\n", key.enumerator()));
        out.push_str(&format!("\t\t.name = \"{}\",\n", key.name()));
        out.push_str(&format!(
            "\t\t.size = sizeof(l1_config_default_{symbol}),\n"
        ));
        out.push_str(&format!(
            "\t\t.def_value = &l1_config_default_{symbol},\n"
        ));
        out.push_str(&format!("\t\t.check = {},\n", key.checker));
        out.push_str("\t},\n");
    }
    out.push_str("};\n");
    Ok(out)
}

/// One `static const` object per key, typed exactly as the key's storage
/// so the descriptor can take `sizeof` of it.
fn render_default(model: &ConfigModel, key: &KeyEntry<'_>, out: &mut String) -> Result<()> {
    let symbol = format!("l1_config_default_{}", key.symbol());

    if let Some(array) = leaf_array(model, key) {
        let init = match &array.default {
            Some(values) => values
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", "),
            None => "0".to_string(),
        };
        match key.field {
            // A typedef'd array keeps its own name.
            StructField::Custom(c) => {
                out.push_str(&format!(
                    "static const {} {symbol} = {{ {init} }};\n",
                    c.type_name
                ));
            }
            _ => {
                let item = model.get_full_type(&array.item_type)?;
                out.push_str(&format!(
                    "static const {item} {symbol}[{}] = {{ {init} }};\n",
                    array.size
                ));
            }
        }
        return Ok(());
    }

    match key.field {
        StructField::Numeric(n) => {
            out.push_str(&format!(
                "static const {} {symbol} = {};\n",
                n.width.as_str(),
                n.default
            ));
        }
        StructField::Bool(b) => {
            out.push_str(&format!("static const bool {symbol} = {};\n", b.default));
        }
        StructField::Custom(c) => match model.find_type(&c.type_name)? {
            TypeDecl::Enum(_) => {
                // Validated: the default is one of the enum value names.
                let default = c.default.as_ref().map(ToString::to_string).unwrap_or_default();
                out.push_str(&format!("static const uint8_t {symbol} = {default};\n"));
            }
            TypeDecl::BitField(b) => {
                out.push_str(&format!(
                    "static const struct {} {symbol} = {{\n",
                    c.type_name
                ));
                for (bit_name, bit) in &b.bits {
                    out.push_str(&format!("\t.{bit_name} = {},\n", bit.default));
                }
                out.push_str("};\n");
            }
            TypeDecl::Numeric(n) => {
                let default = c.default.as_ref().unwrap_or(&n.default);
                out.push_str(&format!(
                    "static const {} {symbol} = {default};\n",
                    n.width.as_str()
                ));
            }
            TypeDecl::Bool(b) => {
                out.push_str(&format!("static const bool {symbol} = {};\n", b.default));
            }
            TypeDecl::Struct(_) | TypeDecl::Array(_) => {
                unreachable!("struct refs recurse and arrays are handled above")
            }
        },
        StructField::Array(_) | StructField::Itemized(_) => {
            unreachable!("arrays are handled above and itemizeds are never leaves")
        }
    }
    Ok(())
}

/// Collects policy check functions in dependency order, deduplicated by
/// name.
struct Checkers<'m> {
    model: &'m ConfigModel,
    names: Vec<String>,
    bodies: Vec<String>,
}

impl<'m> Checkers<'m> {
    fn new(model: &'m ConfigModel) -> Self {
        Self {
            model,
            names: Vec::new(),
            bodies: Vec::new(),
        }
    }

    fn add_key(&mut self, key: &KeyEntry<'m>) -> Result<()> {
        if key.checker == "NULL" {
            return Ok(());
        }
        self.add_field(key.checker.clone(), key.field)
    }

    fn add_field(&mut self, name: String, field: &'m StructField) -> Result<()> {
        if self.names.contains(&name) {
            return Ok(());
        }
        match field {
            StructField::Numeric(n) => {
                if let Some(range) = &n.range {
                    self.push_numeric(name, n.width, range);
                }
            }
            StructField::Bool(_) => self.push_bool(name),
            StructField::Array(a) => self.add_array(name, a)?,
            StructField::Custom(c) => {
                let decl = self.model.find_type(&c.type_name)?;
                self.add_decl(name, &c.type_name, decl)?;
            }
            StructField::Itemized(_) => {}
        }
        Ok(())
    }

    fn add_decl(&mut self, name: String, type_name: &str, decl: &'m TypeDecl) -> Result<()> {
        if self.names.contains(&name) {
            return Ok(());
        }
        match decl {
            TypeDecl::Enum(e) => self.push_enum(name, e),
            TypeDecl::Bool(_) => self.push_bool(name),
            TypeDecl::Numeric(n) => {
                if let Some(range) = &n.range {
                    self.push_numeric(name, n.width, range);
                }
            }
            TypeDecl::BitField(b) => self.push_bitfield(name, type_name, b)?,
            TypeDecl::Array(a) => self.add_array(name, a)?,
            TypeDecl::Struct(s) => self.add_struct(name, type_name, s)?,
        }
        Ok(())
    }

    /// Array checker: a bounds check per item for numeric ranges, a
    /// delegation to the item type's checker otherwise.
    fn add_array(&mut self, name: String, decl: &'m ArrayDecl) -> Result<()> {
        let item = self.model.get_full_type(&decl.item_type)?;

        if is_numeric(&decl.item_type) {
            let Some(range) = &decl.range else {
                return Ok(());
            };
            let (lo, hi) = range.split_once("..").unwrap_or((range.as_str(), range.as_str()));
            let body = format!(
                "static bool {name}(const void *value)\n{{\n\
                 \tconst {item} *v = (const {item} *)value;\n\
                 \tsize_t i;\n\n\
                 \tfor (i = 0; i < {size}; i++) {{\n\
                 \t\tif (!((int64_t)v[i] >= ({lo}) && (int64_t)v[i] <= ({hi})))\n\
                 \t\t\treturn false;\n\
                 \t}}\n\
                 \treturn true;\n}}\n",
                size = decl.size
            );
            self.push(name, body);
            return Ok(());
        }

        if is_native_type(&decl.item_type) {
            return Ok(());
        }
        let item_decl = self.model.find_type(&decl.item_type)?;
        let item_checker = format!("{PLUGIN_NAME}_policy_check_{}", decl.item_type);
        self.add_decl(item_checker.clone(), &decl.item_type, item_decl)?;
        let body = format!(
            "static bool {name}(const void *value)\n{{\n\
             \tconst {item} *v = (const {item} *)value;\n\
             \tsize_t i;\n\n\
             \tfor (i = 0; i < {size}; i++) {{\n\
             \t\tif (!{item_checker}(&v[i]))\n\
             \t\t\treturn false;\n\
             \t}}\n\
             \treturn true;\n}}\n",
            size = decl.size
        );
        self.push(name, body);
        Ok(())
    }

    /// Struct checker: every constrained member delegates to its own
    /// checker, emitted beforehand.
    fn add_struct(&mut self, name: String, type_name: &str, decl: &'m StructDecl) -> Result<()> {
        let mut members = Vec::new();
        for (member_name, member) in &decl.fields {
            if self.model.has_checker_func(member)? {
                let checker = self.model.get_checker_func(member_name, member)?;
                self.add_field(checker.clone(), member)?;
                members.push((member_name.clone(), checker));
            }
        }

        let mut body = format!(
            "static bool {name}(const void *value)\n{{\n\
             \tconst struct {type_name} *v = (const struct {type_name} *)value;\n\n"
        );
        for (member_name, checker) in members {
            body.push_str(&format!(
                "\tif (!{checker}(&v->{member_name}))\n\t\treturn false;\n"
            ));
        }
        body.push_str("\treturn true;\n}\n");
        self.push(name, body);
        Ok(())
    }

    fn push_numeric(&mut self, name: String, width: NumericWidth, range: &str) {
        let (lo, hi) = range.split_once("..").unwrap_or((range, range));
        let body = format!(
            "static bool {name}(const void *value)\n{{\n\
             \tconst int64_t v = (int64_t)*(const {width} *)value;\n\n\
             \treturn v >= ({lo}) && v <= ({hi});\n}}\n",
            width = width.as_str()
        );
        self.push(name, body);
    }

    fn push_enum(&mut self, name: String, decl: &EnumDecl) {
        let membership = if decl.values.is_empty() {
            "false".to_string()
        } else {
            decl.values
                .keys()
                .map(|value_name| format!("v == {value_name}"))
                .collect::<Vec<_>>()
                .join(" || ")
        };
        let body = format!(
            "static bool {name}(const void *value)\n{{\n\
             \tconst uint8_t v = *(const uint8_t *)value;\n\n\
             \treturn {membership};\n}}\n"
        );
        self.push(name, body);
    }

    fn push_bitfield(
        &mut self,
        name: String,
        type_name: &str,
        decl: &'m BitFieldDecl,
    ) -> Result<()> {
        let mut body = format!(
            "static bool {name}(const void *value)\n{{\n\
             \tconst struct {type_name} *v = (const struct {type_name} *)value;\n\n"
        );
        for (bit_name, bit) in &decl.bits {
            if let Some(range) = &bit.range {
                let (lo, hi) = range.split_once("..").unwrap_or((range.as_str(), range.as_str()));
                body.push_str(&format!(
                    "\tif (!(v->{bit_name} >= {lo} && v->{bit_name} <= {hi}))\n\t\treturn false;\n"
                ));
            } else if let Some(element_type) = &bit.element_type {
                let Some(e) = self.model.find_type(element_type)?.as_enum() else {
                    continue;
                };
                let membership = e
                    .values
                    .keys()
                    .map(|value_name| format!("v->{bit_name} == {value_name}"))
                    .collect::<Vec<_>>()
                    .join(" || ");
                body.push_str(&format!("\tif (!({membership}))\n\t\treturn false;\n"));
            }
        }
        body.push_str("\treturn true;\n}\n");
        self.push(name, body);
        Ok(())
    }

    fn push_bool(&mut self, name: String) {
        let body = format!(
            "static bool {name}(const void *value)\n{{\n\
             \tconst uint8_t v = *(const uint8_t *)value;\n\n\
             \treturn v == 0 || v == 1;\n}}\n"
        );
        self.push(name, body);
    }

    fn push(&mut self, name: String, body: String) {
        self.names.push(name);
        self.bodies.push(body);
    }
}
