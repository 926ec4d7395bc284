//! `l1_config_getter.h` emission
//!
//! One accessor prototype per flat key. Array-valued keys take the array
//! itself (which decays to a pointer); every other key takes a pointer to
//! its storage type.

use crate::error::Result;
use crate::model::{ConfigModel, StructField};

use super::{close_guard, doc_comment, file_banner, leaf_array, leaf_c_type, open_guard};

const GUARD: &str = "L1_CONFIG_GETTER_H";

pub fn render(model: &ConfigModel) -> Result<String> {
    let keys = model.flatten_keys()?;

    let mut out = String::new();
    file_banner(&mut out);
    open_guard(&mut out, GUARD);

    out.push_str("#include <stdbool.h>\n#include <stdint.h>\n\n");
    out.push_str("#include \"l1_config_types.h\"\n\n");

    for key in &keys {
        doc_comment(&mut out, key.field.meta().summary.as_deref());
        let getter = &key.getter;
        match (key.field, leaf_array(model, key)) {
            // Typedef'd arrays pass by their own name.
            (StructField::Custom(c), Some(_)) => {
                out.push_str(&format!("int {getter}({} value);\n", c.type_name));
            }
            // Inline arrays pass a pointer to their item type.
            (_, Some(array)) => {
                let item = model.get_full_type(&array.item_type)?;
                out.push_str(&format!("int {getter}({item} *value);\n"));
            }
            _ => {
                let c_type = leaf_c_type(model, key)?;
                out.push_str(&format!("int {getter}({c_type} *value);\n"));
            }
        }
    }
    out.push('\n');

    close_guard(&mut out, GUARD);
    Ok(out)
}
