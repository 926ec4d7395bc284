//! Model queries
//!
//! The read-only surface the emitters consume. Every function here is a
//! pure projection of the frozen model; none of them touch the
//! filesystem. This is the entire contract between the model and the
//! rendering layer.

use crate::error::{Result, SchemaError};
use crate::model::{
    ArrayDecl, ConfigModel, EnumDecl, ItemizedField, StructDecl, StructField, TypeDecl,
    PLUGIN_NAME,
};

/// The eight numeric width tags, unsigned first.
pub const NUMERIC_UNSIGNED: [&str; 4] = ["uint8_t", "uint16_t", "uint32_t", "uint64_t"];
pub const NUMERIC_SIGNED: [&str; 4] = ["int8_t", "int16_t", "int32_t", "int64_t"];

/// Is `name` one of the eight numeric widths or `bool`?
pub fn is_builtin(name: &str) -> bool {
    name == "bool" || is_numeric(name)
}

pub fn is_numeric_unsigned(name: &str) -> bool {
    NUMERIC_UNSIGNED.contains(&name)
}

pub fn is_numeric_signed(name: &str) -> bool {
    NUMERIC_SIGNED.contains(&name)
}

pub fn is_numeric(name: &str) -> bool {
    is_numeric_unsigned(name) || is_numeric_signed(name)
}

/// Is `tag` a native type constructor rather than a user type name?
pub fn is_native_type(tag: &str) -> bool {
    matches!(tag, "enum" | "bitfield" | "struct" | "array" | "itemized") || is_builtin(tag)
}

/// One entry of the flat key space: a leaf field reachable from the root,
/// with its naming already resolved.
#[derive(Debug, Clone)]
pub struct KeyEntry<'a> {
    /// Path segments from the root, leaf field included. Itemized
    /// replicas contribute a `<field><label>` segment.
    pub path: Vec<String>,
    /// The leaf field's own name.
    pub field_name: String,
    /// Ancestor segments joined with `_`, empty at the first level.
    pub parent: String,
    pub field: &'a StructField,
    pub getter: String,
    /// Checker function name, or the `NULL` sentinel.
    pub checker: String,
}

impl KeyEntry<'_> {
    /// `a_b_c`, the spine of every generated per-key symbol.
    pub fn symbol(&self) -> String {
        self.path.join("_")
    }

    /// `A_B_C`, the key enumerator suffix.
    pub fn enumerator(&self) -> String {
        format!("{}_KEY_{}", PLUGIN_NAME.to_uppercase(), self.symbol().to_uppercase())
    }

    /// `a.b.c`, the runtime lookup name.
    pub fn name(&self) -> String {
        self.path.join(".")
    }
}

impl ConfigModel {
    /// Resolve a user type by name.
    pub fn find_type(&self, name: &str) -> Result<&TypeDecl> {
        self.types
            .get(name)
            .ok_or_else(|| SchemaError::UndefinedType(name.to_string()).into())
    }

    /// Resolve `element_type` to its base constructor. Native tags come
    /// back verbatim with `true`; user names resolve through the type
    /// table to their constructor tag with `false`.
    pub fn get_base_type<'m>(&'m self, element_type: &'m str) -> Result<(&'m str, bool)> {
        if is_native_type(element_type) {
            return Ok((element_type, true));
        }
        let decl = self.find_type(element_type)?;
        Ok((decl.element_type(), false))
    }

    /// The C-visible spelling of a type. Arrays are typedef'd so the bare
    /// name is used; enums are storage-packed as bytes; bitfields
    /// materialize as structs.
    pub fn get_full_type(&self, element_type: &str) -> Result<String> {
        let (base, native) = self.get_base_type(element_type)?;
        if native {
            return Ok(base.to_string());
        }
        Ok(match base {
            "array" => element_type.to_string(),
            "enum" => "uint8_t".to_string(),
            "bitfield" => format!("struct {element_type}"),
            base => format!("{base} {element_type}"),
        })
    }

    /// Classify an itemized's index source: the enum when indexes name
    /// one, `None` for a define-sized range.
    pub fn is_itemized_indexes_enum(&self, itemized: &ItemizedField) -> Option<&EnumDecl> {
        self.types.get(&itemized.indexes).and_then(TypeDecl::as_enum)
    }

    /// The C macro holding the replica count: `<ENUM>_NUM` for enum
    /// indexes, the uppercased define name otherwise.
    pub fn get_itemized_size_name(&self, itemized: &ItemizedField) -> String {
        if self.is_itemized_indexes_enum(itemized).is_some() {
            format!("{}_NUM", itemized.indexes.to_uppercase())
        } else {
            itemized.indexes.to_uppercase()
        }
    }

    /// The replica labels: enum value names, or `0..N-1` for a define.
    pub fn get_itemized_index_list(&self, itemized: &ItemizedField) -> Result<Vec<String>> {
        if let Some(e) = self.is_itemized_indexes_enum(itemized) {
            return Ok(e.values.keys().cloned().collect());
        }
        let count = self.get_define_value(&itemized.indexes)?;
        Ok((0..count).map(|i| i.to_string()).collect())
    }

    pub fn get_itemized_size(&self, itemized: &ItemizedField) -> Result<usize> {
        Ok(self.get_itemized_index_list(itemized)?.len())
    }

    pub fn get_define_value(&self, name: &str) -> Result<i64> {
        self.defines
            .get(name)
            .map(|d| d.value)
            .ok_or_else(|| SchemaError::UndefinedDefine(name.to_string()).into())
    }

    /// The range constraining a field, when one applies: a numeric's own
    /// range, or an array's range over numeric items.
    pub fn get_range<'f>(&self, field: &'f StructField) -> Option<&'f str> {
        match field {
            StructField::Numeric(n) => n.range.as_deref(),
            StructField::Array(a) if is_numeric(&a.item_type) => a.range.as_deref(),
            _ => None,
        }
    }

    /// Accessor name: the alias when one is declared, the
    /// parent-prefixed field name otherwise.
    pub fn get_getter_func(&self, name: &str, field: &StructField, parent: &str) -> String {
        let mut getter = format!("{PLUGIN_NAME}_read_");
        match field.alias() {
            Some(alias) => getter.push_str(alias),
            None => {
                if !parent.is_empty() {
                    getter.push_str(parent);
                    getter.push('_');
                }
                getter.push_str(name);
            }
        }
        getter
    }

    /// Does the field, or any descendant of it, carry a runtime policy
    /// constraint?
    pub fn has_checker_func(&self, field: &StructField) -> Result<bool> {
        if self.get_range(field).is_some() {
            return Ok(true);
        }
        match field {
            StructField::Bool(_) => Ok(true),
            StructField::Numeric(_) | StructField::Itemized(_) => Ok(false),
            StructField::Array(a) => self.array_needs_checker(a),
            StructField::Custom(c) => self.type_needs_checker(self.find_type(&c.type_name)?),
        }
    }

    fn type_needs_checker(&self, decl: &TypeDecl) -> Result<bool> {
        match decl {
            TypeDecl::Enum(_) | TypeDecl::Bool(_) => Ok(true),
            TypeDecl::Numeric(n) => Ok(n.range.is_some()),
            TypeDecl::BitField(b) => Ok(b
                .bits
                .values()
                .any(|bit| bit.range.is_some() || bit.element_type.is_some())),
            TypeDecl::Struct(s) => {
                for field in s.fields.values() {
                    if self.has_checker_func(field)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            TypeDecl::Array(a) => self.array_needs_checker(a),
        }
    }

    fn array_needs_checker(&self, a: &ArrayDecl) -> Result<bool> {
        if a.range.is_some() && is_numeric(&a.item_type) {
            return Ok(true);
        }
        if !is_native_type(&a.item_type) {
            return self.type_needs_checker(self.find_type(&a.item_type)?);
        }
        Ok(false)
    }

    /// Checker function name, or the `NULL` sentinel when the field is
    /// unconstrained. `bool` collapses to a single shared checker; other
    /// native leaves are named after the field, user types after the
    /// type.
    pub fn get_checker_func(&self, name: &str, field: &StructField) -> Result<String> {
        if !self.has_checker_func(field)? {
            return Ok("NULL".to_string());
        }
        let (base, native) = self.get_base_type(field.element_type())?;
        if base == "bool" {
            return Ok(format!("{PLUGIN_NAME}_policy_check_bool"));
        }
        let type_name = if native { name } else { field.element_type() };
        Ok(format!("{PLUGIN_NAME}_policy_check_{type_name}"))
    }

    /// Total flat key count: leaves contribute 1, structs the sum over
    /// their fields, itemizeds `size x keys-per-replica`.
    pub fn get_nb_keys(&self) -> Result<usize> {
        let root = self.root_struct()?;
        let mut total = 0;
        for field in root.fields.values() {
            total += self.nb_keys_for_field(field)?;
        }
        Ok(total)
    }

    fn nb_keys_for_field(&self, field: &StructField) -> Result<usize> {
        let (base, _) = self.get_base_type(field.element_type())?;
        match base {
            "itemized" => {
                let StructField::Itemized(it) = field else {
                    unreachable!("itemized base without itemized field");
                };
                let item = self.find_type(&it.item_type)?;
                let Some(item) = item.as_struct() else {
                    return Err(SchemaError::NotAStruct(it.item_type.clone()).into());
                };
                let mut per_replica = 0;
                for inner in item.fields.values() {
                    per_replica += self.nb_keys_for_field(inner)?;
                }
                Ok(self.get_itemized_size(it)? * per_replica)
            }
            "struct" => {
                let decl = self.find_type(field.element_type())?;
                let Some(s) = decl.as_struct() else {
                    return Err(SchemaError::NotAStruct(field.element_type().to_string()).into());
                };
                let mut total = 0;
                for inner in s.fields.values() {
                    total += self.nb_keys_for_field(inner)?;
                }
                Ok(total)
            }
            _ => Ok(1),
        }
    }

    /// First-level key sections. Only struct fields descend; itemizeds
    /// and leaves both count as 1 at their immediate child. Note that a
    /// struct field descends with the full key recursion from the second
    /// level down.
    pub fn get_nb_root_key_sections(&self) -> Result<usize> {
        let root = self.root_struct()?;
        let mut total = 0;
        for field in root.fields.values() {
            let (base, _) = self.get_base_type(field.element_type())?;
            if base == "struct" {
                let decl = self.find_type(field.element_type())?;
                if let Some(s) = decl.as_struct() {
                    for inner in s.fields.values() {
                        total += self.nb_keys_for_field(inner)?;
                    }
                }
            } else {
                total += 1;
            }
        }
        Ok(total)
    }

    /// Flatten the root struct into the linear key space, resolving
    /// getter and checker names along the way.
    pub fn flatten_keys(&self) -> Result<Vec<KeyEntry<'_>>> {
        let root = self.root_struct()?;
        let mut keys = Vec::new();
        self.flatten_struct(root, &[], &mut keys)?;
        Ok(keys)
    }

    fn flatten_struct<'m>(
        &'m self,
        decl: &'m StructDecl,
        prefix: &[String],
        keys: &mut Vec<KeyEntry<'m>>,
    ) -> Result<()> {
        for (name, field) in &decl.fields {
            let (base, _) = self.get_base_type(field.element_type())?;
            match base {
                "itemized" => {
                    let StructField::Itemized(it) = field else {
                        unreachable!("itemized base without itemized field");
                    };
                    let item = self.find_type(&it.item_type)?;
                    let Some(item) = item.as_struct() else {
                        return Err(SchemaError::NotAStruct(it.item_type.clone()).into());
                    };
                    for label in self.get_itemized_index_list(it)? {
                        let mut path = prefix.to_vec();
                        path.push(format!("{name}{label}"));
                        self.flatten_struct(item, &path, keys)?;
                    }
                }
                "struct" => {
                    let inner = self.find_type(field.element_type())?;
                    let Some(inner) = inner.as_struct() else {
                        return Err(
                            SchemaError::NotAStruct(field.element_type().to_string()).into()
                        );
                    };
                    let mut path = prefix.to_vec();
                    path.push(name.clone());
                    self.flatten_struct(inner, &path, keys)?;
                }
                _ => {
                    let parent = prefix.join("_");
                    let mut path = prefix.to_vec();
                    path.push(name.clone());
                    keys.push(KeyEntry {
                        getter: self.get_getter_func(name, field, &parent),
                        checker: self.get_checker_func(name, field)?,
                        path,
                        field_name: name.clone(),
                        parent,
                        field,
                    });
                }
            }
        }
        Ok(())
    }

    fn root_struct(&self) -> Result<&StructDecl> {
        let decl = self
            .types
            .get(&self.root)
            .ok_or_else(|| SchemaError::UndefinedRoot(self.root.clone()))?;
        decl.as_struct()
            .ok_or_else(|| SchemaError::RootNotStruct(self.root.clone()).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::load_str;

    const RICH: &str = "\
version: 1
defines:
  N_SLOTS:
    value: 2
    summary: slot count
types:
  rate:
    type: enum
    values:
      RATE_LOW:
        value: 0
      RATE_HIGH:
        value: 1
  tuning:
    type: bitfield
    bits:
      gain:
        size: 3
        default: 1
        range: 0..5
      mode:
        size: 1
        default: RATE_LOW
        type: rate
  coeffs:
    type: array
    item_type: uint8_t
    size: N_SLOTS
    range: 0..50
    default: [1, 2]
  session:
    type: struct
    fields:
      speed:
        type: uint16_t
        default: 10
        range: 0..100
      fast:
        type: bool
        default: false
  top:
    type: struct
    fields:
      plain:
        type: uint8_t
        default: 0
      chan:
        type: itemized
        item_type: session
        indexes: rate
      slot:
        type: itemized
        item_type: session
        indexes: N_SLOTS
      mode:
        type: rate
        default: RATE_HIGH
      knobs:
        type: tuning
      calib:
        type: coeffs
        alias: calibration
root: top
";

    fn model() -> crate::model::ConfigModel {
        load_str(RICH, &[]).unwrap()
    }

    #[test]
    fn builtin_and_numeric_sets() {
        assert!(is_builtin("uint64_t"));
        assert!(is_builtin("bool"));
        assert!(!is_builtin("enum"));
        assert!(is_numeric_unsigned("uint8_t"));
        assert!(!is_numeric_unsigned("int8_t"));
        assert!(is_numeric_signed("int32_t"));
        assert!(!is_numeric("bool"));
        assert!(is_native_type("itemized"));
        assert!(!is_native_type("session"));
    }

    #[test]
    fn base_type_resolution() {
        let m = model();
        assert_eq!(m.get_base_type("uint8_t").unwrap(), ("uint8_t", true));
        assert_eq!(m.get_base_type("struct").unwrap(), ("struct", true));
        assert_eq!(m.get_base_type("rate").unwrap(), ("enum", false));
        assert_eq!(m.get_base_type("tuning").unwrap(), ("bitfield", false));
        assert_eq!(m.get_base_type("coeffs").unwrap(), ("array", false));
        assert!(m.get_base_type("missing").is_err());
    }

    #[test]
    fn full_type_spelling() {
        let m = model();
        assert_eq!(m.get_full_type("uint16_t").unwrap(), "uint16_t");
        assert_eq!(m.get_full_type("bool").unwrap(), "bool");
        // Enums pack as bytes, bitfields materialize as structs, arrays
        // keep their typedef name.
        assert_eq!(m.get_full_type("rate").unwrap(), "uint8_t");
        assert_eq!(m.get_full_type("tuning").unwrap(), "struct tuning");
        assert_eq!(m.get_full_type("coeffs").unwrap(), "coeffs");
        assert_eq!(m.get_full_type("session").unwrap(), "struct session");
    }

    #[test]
    fn itemized_classification_and_sizes() {
        let m = model();
        let top = m.types["top"].as_struct().unwrap();
        let StructField::Itemized(chan) = &top.fields["chan"] else {
            panic!("chan should be itemized");
        };
        let StructField::Itemized(slot) = &top.fields["slot"] else {
            panic!("slot should be itemized");
        };

        assert!(m.is_itemized_indexes_enum(chan).is_some());
        assert!(m.is_itemized_indexes_enum(slot).is_none());

        assert_eq!(m.get_itemized_size_name(chan), "RATE_NUM");
        assert_eq!(m.get_itemized_size_name(slot), "N_SLOTS");

        assert_eq!(
            m.get_itemized_index_list(chan).unwrap(),
            vec!["RATE_LOW", "RATE_HIGH"]
        );
        assert_eq!(m.get_itemized_index_list(slot).unwrap(), vec!["0", "1"]);

        // Size law: size == |index list|.
        assert_eq!(m.get_itemized_size(chan).unwrap(), 2);
        assert_eq!(m.get_itemized_size(slot).unwrap(), 2);
    }

    #[test]
    fn key_count_conservation() {
        let m = model();
        // plain(1) + chan(2x2) + slot(2x2) + mode(1) + knobs(1) + calib(1)
        assert_eq!(m.get_nb_keys().unwrap(), 12);
        assert_eq!(m.flatten_keys().unwrap().len(), 12);
        // Sections: every first-level field counts as 1 here (no struct
        // fields at the first level).
        assert_eq!(m.get_nb_root_key_sections().unwrap(), 6);
    }

    #[test]
    fn root_sections_descend_into_structs() {
        let input = "\
version: 1
defines: {}
types:
  inner:
    type: struct
    fields:
      a:
        type: uint8_t
        default: 0
      b:
        type: uint8_t
        default: 0
  root:
    type: struct
    fields:
      sub:
        type: inner
      x:
        type: bool
        default: true
root: root
";
        let m = load_str(input, &[]).unwrap();
        assert_eq!(m.get_nb_keys().unwrap(), 3);
        // The struct field contributes its full key count, not 1.
        assert_eq!(m.get_nb_root_key_sections().unwrap(), 3);
    }

    #[test]
    fn getter_names_honor_alias_and_parent() {
        let m = model();
        let keys = m.flatten_keys().unwrap();
        let getters: Vec<&str> = keys.iter().map(|k| k.getter.as_str()).collect();

        assert!(getters.contains(&"l1_config_read_plain"));
        // Itemized replicas prefix the getter with the replica segment.
        assert!(getters.contains(&"l1_config_read_chanRATE_LOW_speed"));
        assert!(getters.contains(&"l1_config_read_slot1_fast"));
        // The alias bypasses the parent-prefix convention.
        assert!(getters.contains(&"l1_config_read_calibration"));
    }

    #[test]
    fn checker_presence_matches_checker_name() {
        let m = model();
        for key in m.flatten_keys().unwrap() {
            let has = m.has_checker_func(key.field).unwrap();
            assert_eq!(has, key.checker != "NULL", "key {}", key.name());
        }
    }

    #[test]
    fn checker_names() {
        let m = model();
        let keys = m.flatten_keys().unwrap();
        let by_name = |n: &str| keys.iter().find(|k| k.name().ends_with(n)).unwrap();

        // Range-constrained native leaf: named after the field.
        assert_eq!(by_name("speed").checker, "l1_config_policy_check_speed");
        // Bool collapses to the shared checker.
        assert_eq!(by_name("fast").checker, "l1_config_policy_check_bool");
        // User types are named after the type.
        assert_eq!(by_name("mode").checker, "l1_config_policy_check_rate");
        assert_eq!(by_name("knobs").checker, "l1_config_policy_check_tuning");
        assert_eq!(by_name("calib").checker, "l1_config_policy_check_coeffs");
        // Unconstrained leaf gets the sentinel.
        assert_eq!(by_name("plain").checker, "NULL");
    }

    #[test]
    fn key_naming_helpers() {
        let m = model();
        let keys = m.flatten_keys().unwrap();
        let speed = keys
            .iter()
            .find(|k| k.name() == "chanRATE_LOW.speed")
            .unwrap();
        assert_eq!(speed.symbol(), "chanRATE_LOW_speed");
        assert_eq!(speed.enumerator(), "L1_CONFIG_KEY_CHANRATE_LOW_SPEED");
        assert_eq!(speed.parent, "chanRATE_LOW");
    }
}
