//! Error types for the generator

use thiserror::Error;

/// Result type for generator operations
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error, one class per failure domain. The CLI prints the
/// `Display` output as a single line on stderr.
#[derive(Error, Debug)]
pub enum Error {
    #[error("SchemaError: {0}")]
    Schema(#[from] SchemaError),

    #[error("RangeError: {0}")]
    Range(#[from] RangeError),

    #[error("IoError: {0}")]
    Io(#[from] std::io::Error),
}

/// Anything wrong with the input schema: missing or unknown types, invalid
/// discriminators, malformed ranges, defaults out of range, cycles.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    #[error("{0}")]
    InvalidYaml(String),

    #[error("Unknown type {0}")]
    UnknownType(String),

    #[error("Type {0} is undefined")]
    UndefinedType(String),

    #[error("Type {0} is not a struct")]
    NotAStruct(String),

    #[error("Struct {0} used as root is not defined")]
    UndefinedRoot(String),

    #[error("Root {0} is not a struct")]
    RootNotStruct(String),

    #[error("Invalid expression: {0}")]
    InvalidExpression(String),

    #[error("Invalid range {0}")]
    InvalidRange(String),

    #[error("Range {0} is not valid")]
    RangeOutOfBounds(String),

    #[error("Invalid range for default value {0}")]
    DefaultOutOfRange(String),

    #[error("Default {0} is not defined")]
    UndefinedDefault(String),

    #[error("Default {0} is not defined in enum values")]
    UnknownEnumDefault(String),

    #[error("Default should contain {0} elements")]
    DefaultArity(usize),

    #[error("Default is mandatory for items of type {0}")]
    MissingArrayDefault(&'static str),

    #[error("Default is mandatory for enum struct field {0}")]
    MissingEnumDefault(String),

    #[error("Default should be one of the enum values for enum struct field {0}")]
    EnumDefaultNotSymbolic(String),

    #[error("Default should be an array of enum values")]
    EnumArrayDefaultNotSymbolic,

    #[error("Field type of bits {0} should be an enum")]
    BitsTypeNotEnum(String),

    #[error("Invalid bits width {0} for {1}")]
    BadBitsWidth(u8, String),

    #[error("Index {0} is not an enum or a define")]
    BadItemizedIndexes(String),

    #[error("Index type {0} is not defined")]
    BadArraySize(String),

    #[error("Define {0} is not defined")]
    UndefinedDefine(String),

    #[error("Enum value {0} is duplicated in {1}")]
    DuplicateEnumValue(u8, String),

    #[error("Type cycle detected involving {0}")]
    TypeCycle(String),

    #[error("Invalid define override {0}")]
    InvalidOverride(String),

    #[error("Unknown field {0} in {1}")]
    UnknownField(String, String),

    #[error("Missing field {0} in {1}")]
    MissingField(&'static str, String),

    #[error("Invalid definition of {0}: {1}")]
    InvalidNode(String, String),
}

/// Arithmetic failures while evaluating a range or a symbolic default.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RangeError {
    #[error("Unknown symbol {0}")]
    UnknownSymbol(String),

    #[error("Division by zero")]
    DivisionByZero,

    #[error("Arithmetic overflow")]
    Overflow,

    #[error("Invalid expression: {0}")]
    Syntax(String),
}
