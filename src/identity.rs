use std::{any::TypeId, sync::Arc};

use dashmap::DashMap;
use once_cell::sync::OnceCell;
use rustc_hash::FxBuildHasher;

use crate::id::{EventTypeId, IdGenerator};

// Maps Rust types to event type ids.
//
// Implementations must return the same nonzero identifier for a given type on
// every call and distinct identifiers for distinct types.
pub trait TypeIdentity: Send + Sync {
    fn identifier_of(&self, type_id: TypeId) -> EventTypeId;

    fn identifier_for<T: ?Sized + 'static>(&self) -> EventTypeId
    where
        Self: Sized
    {
        self.identifier_of(TypeId::of::<T>())
    }
}

static GLOBAL: OnceCell<Arc<TypeRegistry>> = OnceCell::new();

// Lazily populated type table. The first lookup of a type captures the next
// counter value; later lookups return the stored one.
#[derive(Debug)]
pub struct TypeRegistry {
    ids: DashMap<TypeId, EventTypeId, FxBuildHasher>,
    generator: IdGenerator,
}

impl TypeRegistry {

    pub fn new() -> Self {
        Self {
            ids: DashMap::with_hasher(FxBuildHasher),
            generator: IdGenerator::new(1),
        }
    }

    // Process-wide registry shared by every dispatcher built without an
    // explicit identity.
    pub fn global() -> Arc<TypeRegistry> {
        Arc::clone(GLOBAL.get_or_init(|| Arc::new(TypeRegistry::new())))
    }

    pub fn lookup<T: ?Sized + 'static>(&self) -> Option<EventTypeId> {
        self.ids.get(&TypeId::of::<T>()).map(|id| *id.value())
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TypeIdentity for TypeRegistry {
    fn identifier_of(&self, type_id: TypeId) -> EventTypeId {
        if let Some(id) = self.ids.get(&type_id) {
            return *id.value();
        }

        // The entry holds its shard lock until the id is stored, so racing
        // first touches of one type agree on a single counter value.
        *self.ids
            .entry(type_id)
            .or_insert_with(|| self.generator.get())
            .value()
    }
}
