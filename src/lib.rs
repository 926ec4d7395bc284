//! Config Plugin Generator
//!
//! A small compiler front end for the config manager plugin: it reads a
//! declarative YAML schema describing a hierarchical, typed configuration
//! tree, validates its semantic consistency, and emits the C sources that
//! realize the schema as typed keys, accessors, default tables, and
//! per-key policy check functions.
//!
//! ## Pipeline
//!
//! ```text
//! raw YAML tree
//!   -> preprocess (define injection + flag pruning)
//!   -> parse into the type model
//!   -> validate (references, ranges, defaults, cycles)
//!   -> model queries
//!   -> C emission (keys, types, getters)
//! ```
//!
//! The model is frozen after validation; queries and emitters only read
//! it. Emission renders every artifact before the first file is written,
//! so a rejected schema leaves no partial output behind.

pub mod codegen;
pub mod error;
pub mod expr;
pub mod loader;
pub mod model;
pub mod queries;
pub mod validate;

pub use codegen::Generator;
pub use error::{Error, RangeError, Result, SchemaError};
pub use model::{ConfigModel, Define, IntOrName, NumericWidth, StructField, TypeDecl};
pub use queries::KeyEntry;
