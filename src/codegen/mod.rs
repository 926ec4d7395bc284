//! C code emission
//!
//! Renders the four plugin artifacts from the frozen model:
//!
//! - `src/l1_config_keys.c` — default objects, policy check functions,
//!   and the flat key descriptor array;
//! - `src/l1_config_keys.h` — key enumeration and count macros;
//! - `include/l1_config_types.h` — one C declaration per user type;
//! - `include/l1_config_getter.h` — one accessor prototype per key.
//!
//! The emitters are pure functions of the model; only [`Generator`]
//! touches the filesystem, and it renders everything before creating the
//! first file so a failing schema leaves no partial artifacts behind.

mod getter;
mod keys;
mod types;

use std::fs;
use std::path::Path;

use tracing::{debug, info};

use crate::error::Result;
use crate::model::{ArrayDecl, BitFieldBits, ConfigModel, StructField};
use crate::queries::KeyEntry;

/// Banner at the top of every generated file.
pub const GENERATED: &str = "This file is generated automatically, edit with care.";

/// Renders and writes the output artifacts.
pub struct Generator<'a> {
    model: &'a ConfigModel,
}

impl<'a> Generator<'a> {
    pub fn new(model: &'a ConfigModel) -> Self {
        Self { model }
    }

    /// Render all artifacts, then write them under `output_dir/src` and
    /// `output_dir/include`.
    pub fn generate(&self, output_dir: &Path) -> Result<()> {
        let artifacts = [
            ("src", "l1_config_keys.c", keys::render_source(self.model)?),
            ("src", "l1_config_keys.h", keys::render_header(self.model)?),
            ("include", "l1_config_types.h", types::render(self.model)?),
            ("include", "l1_config_getter.h", getter::render(self.model)?),
        ];

        for (sub_dir, file_name, content) in artifacts {
            let dir = output_dir.join(sub_dir);
            fs::create_dir_all(&dir)?;
            let path = dir.join(file_name);
            fs::write(&path, content)?;
            debug!(path = %path.display(), "artifact written");
        }
        info!(keys = self.model.get_nb_keys()?, "plugin sources generated");
        Ok(())
    }
}

fn file_banner(out: &mut String) {
    out.push_str(&format!("/* {GENERATED} */\n\n"));
}

fn open_guard(out: &mut String, name: &str) {
    out.push_str(&format!("#ifndef {name}\n#define {name}\n\n"));
}

fn close_guard(out: &mut String, name: &str) {
    out.push_str(&format!("#endif /* {name} */\n"));
}

fn doc_comment(out: &mut String, summary: Option<&str>) {
    if let Some(summary) = summary {
        out.push_str(&format!("/** {summary} */\n"));
    }
}

/// The C spelling of a leaf key's stored value. Inline arrays are
/// handled by the callers, which need the item type and length
/// separately.
fn leaf_c_type(model: &ConfigModel, key: &KeyEntry<'_>) -> Result<String> {
    match key.field {
        StructField::Numeric(n) => Ok(n.width.as_str().to_string()),
        StructField::Bool(_) => Ok("bool".to_string()),
        StructField::Array(a) => model.get_full_type(&a.item_type),
        StructField::Custom(c) => {
            let (base, _) = model.get_base_type(&c.type_name)?;
            // A custom name whose base is numeric or bool spells as the
            // base width, not as `<width> <name>`.
            if crate::queries::is_builtin(base) {
                return Ok(base.to_string());
            }
            model.get_full_type(&c.type_name)
        }
        StructField::Itemized(_) => unreachable!("itemized fields are never leaves"),
    }
}

/// The inline array behind a key, when the key stores one: the field's
/// own array, or the array typedef a custom ref points at.
fn leaf_array<'m>(model: &'m ConfigModel, key: &KeyEntry<'m>) -> Option<&'m ArrayDecl> {
    match key.field {
        StructField::Array(a) => Some(a),
        StructField::Custom(c) => match model.types.get(&c.type_name) {
            Some(crate::model::TypeDecl::Array(a)) => Some(a),
            _ => None,
        },
        _ => None,
    }
}

/// Storage unit for one bitfield member: the enum byte when typed, the
/// smallest unsigned width holding the bits otherwise.
fn bits_storage(bit: &BitFieldBits) -> &'static str {
    if bit.element_type.is_some() {
        return "uint8_t";
    }
    match bit.width {
        0..=8 => "uint8_t",
        9..=16 => "uint16_t",
        17..=32 => "uint32_t",
        _ => "uint64_t",
    }
}
