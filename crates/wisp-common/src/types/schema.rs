//! Mapping schemas: native struct layouts and destination object shapes
//!
//! A [`StructLayout`] describes how a native struct sits in remote memory:
//! named fields at byte offsets with a tagged kind. An [`ObjectShape`]
//! describes the destination object the mapper produces. Correspondence
//! between the two is by field/property name. The mapper walks these
//! schemas recursively instead of doing any runtime type introspection.

use crate::types::address::RemoteAddr;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Field kind inside a native struct layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldKind {
    U8,
    U16,
    U32,
    I8,
    I16,
    I32,
    F32,
    /// Single byte holding 0 or 1, mapped to a boolean property
    Bool8,
    /// Raw 4-byte address copied as a value, never followed
    Addr,
    /// Struct embedded inline at the field offset
    Struct(Box<StructLayout>),
    /// Pointer to a struct instance; followed and mapped recursively
    PtrStruct(Box<StructLayout>),
    /// Pointer to a list-shaped struct; followed through the list path
    PtrList(Box<StructLayout>),
    /// Pointer to a NUL-terminated single-byte-encoded string
    PtrString,
    /// The `items` member of a list-shaped struct: a pointer to an array
    /// of pointers to elements of the given layout
    ItemsPtr(Box<StructLayout>),
}

impl FieldKind {
    /// Width of the field in the native struct, in bytes.
    pub fn width(&self) -> usize {
        match self {
            FieldKind::U8 | FieldKind::I8 | FieldKind::Bool8 => 1,
            FieldKind::U16 | FieldKind::I16 => 2,
            FieldKind::U32 | FieldKind::I32 | FieldKind::F32 => 4,
            FieldKind::Addr
            | FieldKind::PtrStruct(_)
            | FieldKind::PtrList(_)
            | FieldKind::PtrString
            | FieldKind::ItemsPtr(_) => RemoteAddr::SIZE,
            FieldKind::Struct(layout) => layout.size,
        }
    }
}

/// A named field at a byte offset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    pub offset: usize,
    pub kind: FieldKind,
}

/// Layout of a native struct in remote memory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructLayout {
    pub name: String,
    /// Total size of the struct in bytes
    pub size: usize,
    pub fields: Vec<FieldDef>,
}

/// The items/count pair of a list-shaped layout.
pub struct ListShape<'a> {
    pub items_offset: usize,
    pub count_offset: usize,
    pub element: &'a StructLayout,
}

impl StructLayout {
    pub fn new(name: impl Into<String>, size: usize) -> Self {
        Self {
            name: name.into(),
            size,
            fields: Vec::new(),
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, offset: usize, kind: FieldKind) -> Self {
        self.fields.push(FieldDef {
            name: name.into(),
            offset,
            kind,
        });
        self
    }

    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// A layout is list-shaped when it exposes exactly two members: an
    /// `items` pointer and a `count`.
    pub fn list_shape(&self) -> Option<ListShape<'_>> {
        if self.fields.len() != 2 {
            return None;
        }
        let items = self
            .fields
            .iter()
            .find(|f| f.name.eq_ignore_ascii_case("items"))?;
        let count = self
            .fields
            .iter()
            .find(|f| f.name.eq_ignore_ascii_case("count"))?;
        match (&items.kind, &count.kind) {
            (FieldKind::ItemsPtr(element), FieldKind::U32 | FieldKind::I32) => Some(ListShape {
                items_offset: items.offset,
                count_offset: count.offset,
                element,
            }),
            _ => None,
        }
    }
}

/// Property kind of a destination object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PropertyKind {
    Unsigned,
    Signed,
    Float,
    Bool,
    Text,
    Address,
    Object(Box<ObjectShape>),
    List(Box<ObjectShape>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyDef {
    pub name: String,
    pub kind: PropertyKind,
}

/// Shape of the destination object a layout maps into.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectShape {
    pub name: String,
    pub properties: Vec<PropertyDef>,
}

impl ObjectShape {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            properties: Vec::new(),
        }
    }

    pub fn with_property(mut self, name: impl Into<String>, kind: PropertyKind) -> Self {
        self.properties.push(PropertyDef {
            name: name.into(),
            kind,
        });
        self
    }

    pub fn property(&self, name: &str) -> Option<&PropertyDef> {
        self.properties.iter().find(|p| p.name == name)
    }
}

/// A mapped property value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Unsigned(u32),
    Signed(i32),
    Float(f32),
    Bool(bool),
    Text(String),
    Address(RemoteAddr),
    Object(MappedObject),
    List(Vec<MappedObject>),
}

impl Value {
    /// True for the zero/false default of a value-typed property. Text,
    /// object and list values are never default: their absence is the
    /// null case.
    pub fn is_default(&self) -> bool {
        match self {
            Value::Unsigned(v) => *v == 0,
            Value::Signed(v) => *v == 0,
            Value::Float(v) => *v == 0.0,
            Value::Bool(v) => !v,
            Value::Address(a) => a.is_null(),
            Value::Text(_) | Value::Object(_) | Value::List(_) => false,
        }
    }

    pub fn as_unsigned(&self) -> Option<u32> {
        match self {
            Value::Unsigned(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&MappedObject> {
        match self {
            Value::Object(o) => Some(o),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[MappedObject]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }
}

/// A destination object produced by the mapper: a name → value map stamped
/// with the remote address it was read from, so callers can later write
/// back to the same location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappedObject {
    /// Where the source struct was read from; absent for objects mapped
    /// from an in-flight byte buffer
    pub address: Option<RemoteAddr>,
    pub shape: String,
    values: BTreeMap<String, Value>,
}

impl MappedObject {
    pub fn new(shape: impl Into<String>) -> Self {
        Self {
            address: None,
            shape: shape.into(),
            values: BTreeMap::new(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        self.values.insert(name.into(), value);
    }

    pub fn values(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.values.iter()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Merge another candidate mapped from the same shape: for each of the
    /// other's properties, the own value wins unless it is absent or the
    /// zero default, in which case the other's value is substituted.
    pub fn merge_missing_from(&mut self, other: MappedObject) {
        for (name, theirs) in other.values {
            let take = match self.values.get(&name) {
                None => true,
                Some(ours) => ours.is_default(),
            };
            if take {
                self.values.insert(name, theirs);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list_layout() -> StructLayout {
        let element = StructLayout::new("Item", 8).with_field("id", 0, FieldKind::U32);
        StructLayout::new("ItemList", 8)
            .with_field("items", 0, FieldKind::ItemsPtr(Box::new(element)))
            .with_field("count", 4, FieldKind::U32)
    }

    #[test]
    fn test_list_shape_detection() {
        let layout = list_layout();
        let shape = layout.list_shape().expect("list-shaped");
        assert_eq!(shape.items_offset, 0);
        assert_eq!(shape.count_offset, 4);
        assert_eq!(shape.element.name, "Item");
    }

    #[test]
    fn test_list_shape_requires_exactly_two_fields() {
        let layout = list_layout().with_field("extra", 8, FieldKind::U32);
        assert!(layout.list_shape().is_none());

        let plain = StructLayout::new("Plain", 8)
            .with_field("a", 0, FieldKind::U32)
            .with_field("b", 4, FieldKind::U32);
        assert!(plain.list_shape().is_none());
    }

    #[test]
    fn test_field_widths() {
        assert_eq!(FieldKind::U8.width(), 1);
        assert_eq!(FieldKind::I16.width(), 2);
        assert_eq!(FieldKind::F32.width(), 4);
        assert_eq!(FieldKind::PtrString.width(), 4);
        let nested = FieldKind::Struct(Box::new(StructLayout::new("N", 12)));
        assert_eq!(nested.width(), 12);
    }

    #[test]
    fn test_value_defaults() {
        assert!(Value::Unsigned(0).is_default());
        assert!(Value::Bool(false).is_default());
        assert!(Value::Address(RemoteAddr::NULL).is_default());
        assert!(!Value::Unsigned(1).is_default());
        assert!(!Value::Text(String::new()).is_default());
    }

    #[test]
    fn test_merge_own_value_wins() {
        let mut own = MappedObject::new("Player");
        own.set("health", Value::Unsigned(100));
        own.set("armor", Value::Unsigned(0));

        let mut other = MappedObject::new("Player");
        other.set("health", Value::Unsigned(50));
        other.set("armor", Value::Unsigned(25));
        other.set("name", Value::Text("orc".into()));

        own.merge_missing_from(other);
        assert_eq!(own.get("health"), Some(&Value::Unsigned(100)));
        assert_eq!(own.get("armor"), Some(&Value::Unsigned(25)));
        assert_eq!(own.get("name"), Some(&Value::Text("orc".into())));
    }
}
