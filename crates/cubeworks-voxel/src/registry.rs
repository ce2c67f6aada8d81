//! Block type registry: maps 12-bit type indices to [`BlockTypeDef`] metadata
//! and optional [`BlockBehavior`] hooks.
//!
//! The registry is built once during startup and shared read-only afterwards.
//! Air is always type 0 so that zeroed chunk memory represents empty space.

use std::sync::Arc;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::behavior::BlockBehavior;
use crate::block_data::{AIR_TYPE, BlockData, Direction, TYPE_MASK};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Full descriptor for a block type.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct BlockTypeDef {
    /// Human-readable name (e.g. "stone", "grass").
    pub name: String,
    /// Whether entities collide with this block. Copied into the solid bit.
    pub solid: bool,
}

impl BlockTypeDef {
    /// Block entities collide with.
    pub fn solid(name: &str) -> Self {
        Self {
            name: name.to_string(),
            solid: true,
        }
    }

    /// Block without collision (plants, decorations).
    pub fn decoration(name: &str) -> Self {
        Self {
            name: name.to_string(),
            solid: false,
        }
    }
}

/// Errors that can occur during block type registration.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// A type with the same name has already been registered.
    #[error("duplicate block type name: {0}")]
    DuplicateName(String),
    /// All 4096 type indices have been consumed.
    #[error("block type registry is full (max 4096 types)")]
    RegistryFull,
}

struct RegisteredType {
    def: BlockTypeDef,
    behavior: Option<Arc<dyn BlockBehavior>>,
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Maps type indices to definitions with O(1) lookup by index and by name.
pub struct BlockRegistry {
    /// Dense array where `index == type index`.
    types: Vec<RegisteredType>,
    name_to_type: FxHashMap<String, u16>,
}

impl BlockRegistry {
    /// Creates a new registry with Air pre-registered as type 0.
    pub fn new() -> Self {
        let air = BlockTypeDef::decoration("air");

        let mut name_to_type = FxHashMap::default();
        name_to_type.insert(air.name.clone(), AIR_TYPE);

        Self {
            types: vec![RegisteredType {
                def: air,
                behavior: None,
            }],
            name_to_type,
        }
    }

    /// Registers a new block type and returns its type index.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::DuplicateName`] if a type with the same name
    /// already exists, or [`RegistryError::RegistryFull`] if all 4096 indices
    /// are consumed.
    pub fn register(&mut self, def: BlockTypeDef) -> Result<u16, RegistryError> {
        self.insert(def, None)
    }

    /// Registers a block type whose cells run `behavior` hooks.
    pub fn register_with_behavior(
        &mut self,
        def: BlockTypeDef,
        behavior: Arc<dyn BlockBehavior>,
    ) -> Result<u16, RegistryError> {
        self.insert(def, Some(behavior))
    }

    fn insert(
        &mut self,
        def: BlockTypeDef,
        behavior: Option<Arc<dyn BlockBehavior>>,
    ) -> Result<u16, RegistryError> {
        if self.name_to_type.contains_key(&def.name) {
            return Err(RegistryError::DuplicateName(def.name));
        }
        if self.types.len() > TYPE_MASK as usize {
            return Err(RegistryError::RegistryFull);
        }

        let type_index = self.types.len() as u16;
        self.name_to_type.insert(def.name.clone(), type_index);
        self.types.push(RegisteredType { def, behavior });
        Ok(type_index)
    }

    /// Returns the definition for a type index, or `None` for unknown indices.
    pub fn get(&self, type_index: u16) -> Option<&BlockTypeDef> {
        self.types.get(type_index as usize).map(|t| &t.def)
    }

    /// Definition for a type index; unknown indices resolve to air.
    pub fn def_or_air(&self, type_index: u16) -> &BlockTypeDef {
        match self.types.get(type_index as usize) {
            Some(registered) => &registered.def,
            None => &self.types[AIR_TYPE as usize].def,
        }
    }

    pub fn behavior(&self, type_index: u16) -> Option<&Arc<dyn BlockBehavior>> {
        self.types
            .get(type_index as usize)
            .and_then(|t| t.behavior.as_ref())
    }

    /// Returns the type index for a name, or `None` if not found.
    pub fn lookup_by_name(&self, name: &str) -> Option<u16> {
        self.name_to_type.get(name).copied()
    }

    /// Unrotated cell of the given type with its solid bit taken from the definition.
    pub fn block(&self, type_index: u16) -> BlockData {
        let solid = self.get(type_index).is_some_and(|def| def.solid);
        BlockData::new(type_index, solid, Direction::Up)
    }

    /// Cell for a named type.
    pub fn block_by_name(&self, name: &str) -> Option<BlockData> {
        self.lookup_by_name(name).map(|t| self.block(t))
    }

    /// Returns the total number of registered types (including Air).
    pub fn len(&self) -> usize {
        self.types.len()
    }

    /// Returns `true` if only Air is registered.
    pub fn is_empty(&self) -> bool {
        self.types.len() <= 1
    }
}

impl Default for BlockRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for BlockRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockRegistry")
            .field("types", &self.types.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::behavior::GrowingBlock;

    #[test]
    fn test_air_is_type_zero() {
        let registry = BlockRegistry::new();
        let air = registry.get(AIR_TYPE).unwrap();
        assert_eq!(air.name, "air");
        assert!(!air.solid);
        assert_eq!(registry.block(AIR_TYPE), BlockData::AIR);
    }

    #[test]
    fn test_register_returns_sequential_types() {
        let mut registry = BlockRegistry::new();
        assert_eq!(registry.register(BlockTypeDef::solid("stone")).unwrap(), 1);
        assert_eq!(registry.register(BlockTypeDef::solid("dirt")).unwrap(), 2);
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn test_block_carries_solid_flag() {
        let mut registry = BlockRegistry::new();
        let stone = registry.register(BlockTypeDef::solid("stone")).unwrap();
        let flower = registry.register(BlockTypeDef::decoration("flower")).unwrap();
        assert!(registry.block(stone).is_solid());
        assert!(!registry.block(flower).is_solid());
        assert_eq!(registry.block_by_name("stone").unwrap().block_type(), stone);
        assert_eq!(registry.block_by_name("missing"), None);
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let mut registry = BlockRegistry::new();
        registry.register(BlockTypeDef::solid("stone")).unwrap();
        let result = registry.register(BlockTypeDef::solid("stone"));
        assert!(matches!(result, Err(RegistryError::DuplicateName(_))));
    }

    #[test]
    fn test_registry_full_at_twelve_bits() {
        let mut registry = BlockRegistry::new();
        for i in 1..=TYPE_MASK {
            registry
                .register(BlockTypeDef::solid(&format!("type{i}")))
                .unwrap();
        }
        let result = registry.register(BlockTypeDef::solid("overflow"));
        assert!(matches!(result, Err(RegistryError::RegistryFull)));
    }

    #[test]
    fn test_unknown_type_resolves_to_air() {
        let registry = BlockRegistry::new();
        assert_eq!(registry.def_or_air(77).name, "air");
        assert!(registry.get(77).is_none());
        assert!(registry.behavior(77).is_none());
    }

    #[test]
    fn test_behavior_lookup() {
        let mut registry = BlockRegistry::new();
        let grown = registry.register(BlockTypeDef::decoration("grown")).unwrap();
        let sapling = registry
            .register_with_behavior(
                BlockTypeDef::decoration("sapling"),
                Arc::new(GrowingBlock::new(BlockData::of_type(grown))),
            )
            .unwrap();
        assert!(registry.behavior(sapling).is_some());
        assert!(registry.behavior(grown).is_none());
    }
}
