//! Shared value types for the wisp engine

pub mod address;
pub mod convention;
pub mod module;
pub mod pattern;
pub mod schema;

pub use address::RemoteAddr;
pub use convention::CallSpec;
pub use module::Module;
pub use pattern::PatternSpec;
pub use schema::{
    FieldDef, FieldKind, MappedObject, ObjectShape, PropertyDef, PropertyKind, StructLayout, Value,
};
