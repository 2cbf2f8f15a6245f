//! Schema-driven struct mapping
//!
//! Recursively converts flat native structs in remote memory into typed,
//! pointer-free object graphs. Source layouts and destination shapes are
//! declared up front ([`wisp_common::StructLayout`] /
//! [`wisp_common::ObjectShape`]); mapping is a walk over those schemas,
//! never runtime type introspection. Embedded pointers are followed:
//! strings are read out, list-shaped structs expand into element
//! sequences, other pointees map recursively. Every mapped object is
//! stamped with the remote address it was read from.

use crate::memory::MemoryEngine;
use rayon::prelude::*;
use tracing::trace;
use wisp_common::{
    Error, FieldKind, MappedObject, ObjectShape, PropertyKind, RemoteAddr, Result, StructLayout,
    Value,
};

#[derive(Clone)]
pub struct StructMapper {
    memory: MemoryEngine,
}

impl StructMapper {
    pub fn new(memory: MemoryEngine) -> Self {
        Self { memory }
    }

    /// Map one struct instance already copied out of the target.
    ///
    /// Fields whose names match a destination property are converted in
    /// place. Nested-struct fields without a corresponding property are
    /// mapped against the same shape and merged in, letting one shape
    /// aggregate fields scattered across several nested native structs.
    pub fn map(&self, bytes: &[u8], layout: &StructLayout, shape: &ObjectShape) -> Result<MappedObject> {
        if bytes.len() < layout.size {
            return Err(Error::InvalidArgument(format!(
                "buffer of {} bytes is smaller than layout '{}' ({} bytes)",
                bytes.len(),
                layout.name,
                layout.size
            )));
        }

        let mut out = MappedObject::new(&shape.name);

        for field in &layout.fields {
            let end = field.offset + field.kind.width();
            if end > bytes.len() {
                return Err(Error::InvalidArgument(format!(
                    "field '{}' at {}..{} exceeds layout '{}'",
                    field.name, field.offset, end, layout.name
                )));
            }
            let raw = &bytes[field.offset..end];

            match shape.property(&field.name) {
                Some(property) => {
                    if let Some(value) = self.convert(raw, &field.kind, &property.kind)? {
                        out.set(&property.name, value);
                    }
                }
                None => {
                    // Non-corresponding nested structs flatten into the
                    // same destination view.
                    if let FieldKind::Struct(nested) = &field.kind {
                        trace!(field = %field.name, layout = %nested.name, "merging nested struct");
                        let deeper = self.map(raw, nested, shape)?;
                        out.merge_missing_from(deeper);
                    }
                }
            }
        }

        Ok(out)
    }

    /// Read one instance of `layout` from `address`, map it and stamp the
    /// result with its originating location.
    pub fn read_and_map(
        &self,
        address: RemoteAddr,
        layout: &StructLayout,
        shape: &ObjectShape,
    ) -> Result<MappedObject> {
        if address.is_null() {
            return Err(Error::InvalidArgument("source address is null".into()));
        }
        let bytes = self.memory.read_bytes(address, layout.size)?;
        let mut mapped = self.map(&bytes, layout, shape)?;
        mapped.address = Some(address);
        Ok(mapped)
    }

    /// Read a list-shaped struct at `address` and map every element it
    /// points to. A null items pointer yields an empty sequence no matter
    /// what the count field says. Elements are independent and map in
    /// parallel.
    pub fn read_and_map_list(
        &self,
        address: RemoteAddr,
        layout: &StructLayout,
        shape: &ObjectShape,
    ) -> Result<Vec<MappedObject>> {
        if address.is_null() {
            return Err(Error::InvalidArgument("source address is null".into()));
        }
        let list = layout
            .list_shape()
            .ok_or_else(|| Error::NotListShaped(layout.name.clone()))?;

        let bytes = self.memory.read_bytes(address, layout.size)?;
        let items = read_addr(&bytes, list.items_offset);
        if items.is_null() {
            return Ok(Vec::new());
        }
        let count = read_u32(&bytes, list.count_offset) as usize;

        let pointers: Vec<RemoteAddr> = self.memory.read_array(items, count)?;
        trace!(address = %address, count, "mapping element list");
        pointers
            .par_iter()
            .map(|&element| self.read_and_map(element, list.element, shape))
            .collect()
    }

    pub async fn read_and_map_async(
        &self,
        address: RemoteAddr,
        layout: StructLayout,
        shape: ObjectShape,
    ) -> Result<MappedObject> {
        let mapper = self.clone();
        tokio::task::spawn_blocking(move || mapper.read_and_map(address, &layout, &shape))
            .await
            .map_err(|e| Error::Worker(e.to_string()))?
    }

    pub async fn read_and_map_list_async(
        &self,
        address: RemoteAddr,
        layout: StructLayout,
        shape: ObjectShape,
    ) -> Result<Vec<MappedObject>> {
        let mapper = self.clone();
        tokio::task::spawn_blocking(move || mapper.read_and_map_list(address, &layout, &shape))
            .await
            .map_err(|e| Error::Worker(e.to_string()))?
    }

    /// Convert one field's raw bytes for the corresponding property.
    /// Returns `None` when the value is absent (null pointer) or the
    /// field/property kinds do not line up.
    fn convert(
        &self,
        raw: &[u8],
        field: &FieldKind,
        property: &PropertyKind,
    ) -> Result<Option<Value>> {
        let value = match (field, property) {
            (FieldKind::U8, PropertyKind::Bool) | (FieldKind::Bool8, PropertyKind::Bool) => {
                Some(Value::Bool(raw[0] == 1))
            }
            (FieldKind::U8, PropertyKind::Unsigned) => Some(Value::Unsigned(u32::from(raw[0]))),
            (FieldKind::U16, PropertyKind::Unsigned) => {
                Some(Value::Unsigned(u32::from(read_u16(raw))))
            }
            (FieldKind::U32, PropertyKind::Unsigned) => Some(Value::Unsigned(read_u32(raw, 0))),
            (FieldKind::I8, PropertyKind::Signed) => Some(Value::Signed(i32::from(raw[0] as i8))),
            (FieldKind::I16, PropertyKind::Signed) => {
                Some(Value::Signed(i32::from(read_u16(raw) as i16)))
            }
            (FieldKind::I32, PropertyKind::Signed) => {
                Some(Value::Signed(read_u32(raw, 0) as i32))
            }
            (FieldKind::F32, PropertyKind::Float) => {
                Some(Value::Float(f32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]])))
            }
            (FieldKind::Addr, PropertyKind::Address) => Some(Value::Address(read_addr(raw, 0))),
            (FieldKind::Struct(nested), PropertyKind::Object(sub)) => {
                Some(Value::Object(self.map(raw, nested, sub)?))
            }
            (FieldKind::PtrString, PropertyKind::Text) => {
                let pointer = read_addr(raw, 0);
                if pointer.is_null() {
                    None
                } else {
                    Some(Value::Text(self.memory.read_string(pointer)?))
                }
            }
            (FieldKind::PtrStruct(pointee), PropertyKind::Object(sub)) => {
                let pointer = read_addr(raw, 0);
                if pointer.is_null() {
                    None
                } else {
                    Some(Value::Object(self.read_and_map(pointer, pointee, sub)?))
                }
            }
            (FieldKind::PtrList(list), PropertyKind::List(sub)) => {
                let pointer = read_addr(raw, 0);
                if pointer.is_null() {
                    None
                } else {
                    Some(Value::List(self.read_and_map_list(pointer, list, sub)?))
                }
            }
            // Kind mismatch: the property stays absent.
            _ => None,
        };
        Ok(value)
    }
}

fn read_u16(raw: &[u8]) -> u16 {
    u16::from_le_bytes([raw[0], raw[1]])
}

fn read_u32(raw: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([raw[offset], raw[offset + 1], raw[offset + 2], raw[offset + 3]])
}

fn read_addr(raw: &[u8], offset: usize) -> RemoteAddr {
    RemoteAddr::new(read_u32(raw, offset))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testvm::FakeVm;
    use std::sync::Arc;

    fn mapper() -> (Arc<FakeVm>, StructMapper) {
        let vm = FakeVm::new();
        let memory = MemoryEngine::new(vm.clone());
        (vm, StructMapper::new(memory))
    }

    fn player_layout() -> StructLayout {
        StructLayout::new("PlayerData", 16)
            .with_field("health", 0, FieldKind::U32)
            .with_field("alive", 4, FieldKind::Bool8)
            .with_field("speed", 8, FieldKind::F32)
            .with_field("name", 12, FieldKind::PtrString)
    }

    fn player_shape() -> ObjectShape {
        ObjectShape::new("Player")
            .with_property("health", PropertyKind::Unsigned)
            .with_property("alive", PropertyKind::Bool)
            .with_property("speed", PropertyKind::Float)
            .with_property("name", PropertyKind::Text)
    }

    fn seed_player(vm: &FakeVm, at: RemoteAddr, health: u32, alive: u8, name_at: RemoteAddr) {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&health.to_le_bytes());
        bytes.extend_from_slice(&[alive, 0, 0, 0]);
        bytes.extend_from_slice(&2.5f32.to_le_bytes());
        bytes.extend_from_slice(&name_at.to_le_bytes());
        vm.seed(at, &bytes);
    }

    #[test]
    fn test_map_scalars_and_bool() {
        let (vm, mapper) = mapper();
        let addr = RemoteAddr::new(0x1000);
        seed_player(&vm, addr, 100, 1, RemoteAddr::NULL);

        let player = mapper
            .read_and_map(addr, &player_layout(), &player_shape())
            .unwrap();
        assert_eq!(player.get("health"), Some(&Value::Unsigned(100)));
        assert_eq!(player.get("alive"), Some(&Value::Bool(true)));
        assert_eq!(player.get("speed"), Some(&Value::Float(2.5)));
        // null name pointer stays absent
        assert_eq!(player.get("name"), None);
        assert_eq!(player.address, Some(addr));
    }

    #[test]
    fn test_map_follows_string_pointer() {
        let (vm, mapper) = mapper();
        let addr = RemoteAddr::new(0x1000);
        let name_at = RemoteAddr::new(0x2000);
        vm.seed(name_at, b"gordon\0");
        seed_player(&vm, addr, 55, 0, name_at);

        let player = mapper
            .read_and_map(addr, &player_layout(), &player_shape())
            .unwrap();
        assert_eq!(player.get("name"), Some(&Value::Text("gordon".into())));
        assert_eq!(player.get("alive"), Some(&Value::Bool(false)));
    }

    #[test]
    fn test_read_and_map_rejects_null() {
        let (_vm, mapper) = mapper();
        assert!(matches!(
            mapper.read_and_map(RemoteAddr::NULL, &player_layout(), &player_shape()),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_mapping_twice_yields_equal_objects() {
        let (vm, mapper) = mapper();
        let addr = RemoteAddr::new(0x1000);
        seed_player(&vm, addr, 42, 1, RemoteAddr::NULL);

        let layout = player_layout();
        let shape = player_shape();
        let first = mapper.read_and_map(addr, &layout, &shape).unwrap();
        let second = mapper.read_and_map(addr, &layout, &shape).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.address, second.address);
    }

    #[test]
    fn test_nested_struct_flattens_into_same_shape() {
        let (vm, mapper) = mapper();
        // outer: health(u32) + inline vitals{alive(bool8), speed(f32)}
        let vitals = StructLayout::new("Vitals", 8)
            .with_field("alive", 0, FieldKind::Bool8)
            .with_field("speed", 4, FieldKind::F32);
        let layout = StructLayout::new("PlayerData", 12)
            .with_field("health", 0, FieldKind::U32)
            .with_field("vitals", 4, FieldKind::Struct(Box::new(vitals)));

        let addr = RemoteAddr::new(0x3000);
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&77u32.to_le_bytes());
        bytes.extend_from_slice(&[1, 0, 0, 0]);
        bytes.extend_from_slice(&4.0f32.to_le_bytes());
        vm.seed(addr, &bytes);

        let player = mapper.read_and_map(addr, &layout, &player_shape()).unwrap();
        assert_eq!(player.get("health"), Some(&Value::Unsigned(77)));
        assert_eq!(player.get("alive"), Some(&Value::Bool(true)));
        assert_eq!(player.get("speed"), Some(&Value::Float(4.0)));
    }

    #[test]
    fn test_merge_prefers_own_non_default_value() {
        let (vm, mapper) = mapper();
        // both the outer struct and the nested one carry 'health'; the
        // outer (own) non-zero value wins
        let nested = StructLayout::new("Stats", 4).with_field("health", 0, FieldKind::U32);
        let layout = StructLayout::new("PlayerData", 8)
            .with_field("health", 0, FieldKind::U32)
            .with_field("stats", 4, FieldKind::Struct(Box::new(nested)));

        let addr = RemoteAddr::new(0x3100);
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&100u32.to_le_bytes());
        bytes.extend_from_slice(&50u32.to_le_bytes());
        vm.seed(addr, &bytes);

        let shape = ObjectShape::new("Player").with_property("health", PropertyKind::Unsigned);
        let player = mapper.read_and_map(addr, &layout, &shape).unwrap();
        assert_eq!(player.get("health"), Some(&Value::Unsigned(100)));
    }

    #[test]
    fn test_merge_fills_own_default_from_nested() {
        let (vm, mapper) = mapper();
        let nested = StructLayout::new("Stats", 4).with_field("health", 0, FieldKind::U32);
        let layout = StructLayout::new("PlayerData", 8)
            .with_field("health", 0, FieldKind::U32)
            .with_field("stats", 4, FieldKind::Struct(Box::new(nested)));

        let addr = RemoteAddr::new(0x3200);
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&0u32.to_le_bytes());
        bytes.extend_from_slice(&50u32.to_le_bytes());
        vm.seed(addr, &bytes);

        let shape = ObjectShape::new("Player").with_property("health", PropertyKind::Unsigned);
        let player = mapper.read_and_map(addr, &layout, &shape).unwrap();
        assert_eq!(player.get("health"), Some(&Value::Unsigned(50)));
    }

    #[test]
    fn test_pointer_to_struct_is_followed() {
        let (vm, mapper) = mapper();
        let weapon_layout = StructLayout::new("WeaponData", 4).with_field("ammo", 0, FieldKind::U32);
        let weapon_shape = ObjectShape::new("Weapon").with_property("ammo", PropertyKind::Unsigned);
        let layout = StructLayout::new("PlayerData", 8)
            .with_field("health", 0, FieldKind::U32)
            .with_field("weapon", 4, FieldKind::PtrStruct(Box::new(weapon_layout)));
        let shape = ObjectShape::new("Player")
            .with_property("health", PropertyKind::Unsigned)
            .with_property("weapon", PropertyKind::Object(Box::new(weapon_shape)));

        let weapon_at = RemoteAddr::new(0x5000);
        vm.seed(weapon_at, &30u32.to_le_bytes());
        let addr = RemoteAddr::new(0x4000);
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&90u32.to_le_bytes());
        bytes.extend_from_slice(&weapon_at.to_le_bytes());
        vm.seed(addr, &bytes);

        let player = mapper.read_and_map(addr, &layout, &shape).unwrap();
        let weapon = player.get("weapon").and_then(Value::as_object).unwrap();
        assert_eq!(weapon.get("ammo"), Some(&Value::Unsigned(30)));
        assert_eq!(weapon.address, Some(weapon_at));
    }

    fn item_list_fixtures() -> (StructLayout, ObjectShape, StructLayout) {
        let element = StructLayout::new("ItemData", 4).with_field("id", 0, FieldKind::U32);
        let list = StructLayout::new("ItemList", 8)
            .with_field("items", 0, FieldKind::ItemsPtr(Box::new(element.clone())))
            .with_field("count", 4, FieldKind::U32);
        let shape = ObjectShape::new("Item").with_property("id", PropertyKind::Unsigned);
        (list, shape, element)
    }

    #[test]
    fn test_list_mapping() {
        let (vm, mapper) = mapper();
        let (list_layout, item_shape, _element) = item_list_fixtures();

        let first = RemoteAddr::new(0x6000);
        let second = RemoteAddr::new(0x6100);
        vm.seed(first, &7u32.to_le_bytes());
        vm.seed(second, &8u32.to_le_bytes());

        let pointers = RemoteAddr::new(0x7000);
        let mut table = Vec::new();
        table.extend_from_slice(&first.to_le_bytes());
        table.extend_from_slice(&second.to_le_bytes());
        vm.seed(pointers, &table);

        let list_at = RemoteAddr::new(0x8000);
        let mut header = Vec::new();
        header.extend_from_slice(&pointers.to_le_bytes());
        header.extend_from_slice(&2u32.to_le_bytes());
        vm.seed(list_at, &header);

        let items = mapper
            .read_and_map_list(list_at, &list_layout, &item_shape)
            .unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].get("id"), Some(&Value::Unsigned(7)));
        assert_eq!(items[1].get("id"), Some(&Value::Unsigned(8)));
        assert_eq!(items[0].address, Some(first));
    }

    #[test]
    fn test_list_with_null_items_is_empty_not_error() {
        let (vm, mapper) = mapper();
        let (list_layout, item_shape, _element) = item_list_fixtures();

        let list_at = RemoteAddr::new(0x8100);
        let mut header = Vec::new();
        header.extend_from_slice(&RemoteAddr::NULL.to_le_bytes());
        header.extend_from_slice(&9u32.to_le_bytes());
        vm.seed(list_at, &header);

        let items = mapper
            .read_and_map_list(list_at, &list_layout, &item_shape)
            .unwrap();
        assert!(items.is_empty());
    }

    #[test]
    fn test_list_mapping_requires_list_shape() {
        let (vm, mapper) = mapper();
        let addr = RemoteAddr::new(0x8200);
        vm.seed(addr, &[0; 16]);

        let result = mapper.read_and_map_list(addr, &player_layout(), &player_shape());
        assert!(matches!(result, Err(Error::NotListShaped(name)) if name == "PlayerData"));
    }

    #[test]
    fn test_pointer_to_list_inside_struct() {
        let (vm, mapper) = mapper();
        let (list_layout, item_shape, _element) = item_list_fixtures();

        let layout = StructLayout::new("Inventory", 4).with_field(
            "items_list",
            0,
            FieldKind::PtrList(Box::new(list_layout)),
        );
        let shape = ObjectShape::new("Inventory")
            .with_property("items_list", PropertyKind::List(Box::new(item_shape)));

        let element = RemoteAddr::new(0x9000);
        vm.seed(element, &3u32.to_le_bytes());
        let pointers = RemoteAddr::new(0x9100);
        vm.seed(pointers, &element.to_le_bytes());
        let list_at = RemoteAddr::new(0x9200);
        let mut header = Vec::new();
        header.extend_from_slice(&pointers.to_le_bytes());
        header.extend_from_slice(&1u32.to_le_bytes());
        vm.seed(list_at, &header);

        let holder_at = RemoteAddr::new(0x9300);
        vm.seed(holder_at, &list_at.to_le_bytes());

        let holder = mapper.read_and_map(holder_at, &layout, &shape).unwrap();
        let items = holder.get("items_list").and_then(Value::as_list).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].get("id"), Some(&Value::Unsigned(3)));
    }

    #[test]
    fn test_map_rejects_short_buffer() {
        let (_vm, mapper) = mapper();
        let result = mapper.map(&[0u8; 4], &player_layout(), &player_shape());
        assert!(matches!(result, Err(Error::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn test_async_read_and_map() {
        let (vm, mapper) = mapper();
        let addr = RemoteAddr::new(0xA000);
        seed_player(&vm, addr, 64, 1, RemoteAddr::NULL);

        let player = mapper
            .read_and_map_async(addr, player_layout(), player_shape())
            .await
            .unwrap();
        assert_eq!(player.get("health"), Some(&Value::Unsigned(64)));
    }
}
