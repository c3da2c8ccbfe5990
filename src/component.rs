// Copyright 2025 Lattice ECS Developers
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Component trait and shared-object registry
//!
//! Components are plain data attached to entities. Shared objects back
//! object-link keys: the value lives once behind an `Arc` and is surfaced to
//! iteration per row, so every entity bearing the link sees the same value.

use std::any::{type_name, Any, TypeId};
use std::marker::PhantomData;
use std::ptr::NonNull;
use std::sync::Arc;

use slotmap::{new_key_type, SlotMap};

/// Marker trait for components
///
/// Components must be 'static (no borrowed data)
pub trait Component: 'static + Send + Sync {}

/// Automatically implement Component for all valid types
impl<T: 'static + Send + Sync> Component for T {}

new_key_type! {
    /// Handle identity of a registered shared object
    pub struct ObjectId;
}

/// Typed handle to a shared object registered with a world
pub struct ObjectHandle<T> {
    id: ObjectId,
    _marker: PhantomData<fn() -> T>,
}

impl<T> ObjectHandle<T> {
    pub(crate) fn new(id: ObjectId) -> Self {
        Self {
            id,
            _marker: PhantomData,
        }
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }
}

impl<T> Clone for ObjectHandle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for ObjectHandle<T> {}

impl<T> std::fmt::Debug for ObjectHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ObjectHandle").field(&self.id).finish()
    }
}

struct SharedEntry {
    /// Keeps the value alive; never mutated after registration
    _value: Arc<dyn Any + Send + Sync>,
    /// Address of the value inside the `Arc` allocation, stable while the
    /// entry lives
    ptr: NonNull<u8>,
    type_id: TypeId,
    #[allow(dead_code)]
    type_name: &'static str,
}

// SAFETY: `ptr` points into an `Arc<T>` where `T: Send + Sync` (enforced by
// the typed `register` path), and the entry only ever grants shared access.
unsafe impl Send for SharedEntry {}
unsafe impl Sync for SharedEntry {}

/// Registry of shared objects; entries live for the registry's lifetime.
pub(crate) struct SharedObjects {
    map: SlotMap<ObjectId, SharedEntry>,
}

impl SharedObjects {
    pub fn new() -> Self {
        Self {
            map: SlotMap::with_key(),
        }
    }

    pub fn register<T: Component>(&mut self, value: T) -> ObjectHandle<T> {
        let arc = Arc::new(value);
        let ptr = NonNull::from(arc.as_ref()).cast::<u8>();
        let id = self.map.insert(SharedEntry {
            _value: arc,
            ptr,
            type_id: TypeId::of::<T>(),
            type_name: type_name::<T>(),
        });
        ObjectHandle::new(id)
    }

    pub fn get<T: Component>(&self, handle: ObjectHandle<T>) -> Option<&T> {
        self.get_by_id(handle.id)
    }

    pub fn get_by_id<T: Component>(&self, id: ObjectId) -> Option<&T> {
        let entry = self.map.get(id)?;
        if entry.type_id != TypeId::of::<T>() {
            return None;
        }
        // SAFETY: type checked above; the value outlives the borrow of self
        Some(unsafe { &*(entry.ptr.as_ptr() as *const T) })
    }

    /// Untyped value address for iteration, checked against the expected type.
    pub fn value_ptr(&self, id: ObjectId, expected: TypeId) -> Option<NonNull<u8>> {
        let entry = self.map.get(id)?;
        (entry.type_id == expected).then_some(entry.ptr)
    }

    pub fn contains(&self, id: ObjectId) -> bool {
        self.map.contains_key(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Palette {
        accent: u32,
    }

    #[test]
    fn register_and_resolve() {
        let mut objects = SharedObjects::new();
        let handle = objects.register(Palette { accent: 0xff00ff });
        let copy = handle;
        assert_eq!(objects.get(copy), Some(&Palette { accent: 0xff00ff }));
        assert!(objects.contains(handle.id()));
    }

    #[test]
    fn type_mismatch_is_rejected() {
        let mut objects = SharedObjects::new();
        let handle = objects.register(Palette { accent: 1 });
        assert!(objects.get_by_id::<u32>(handle.id()).is_none());
        assert!(objects
            .value_ptr(handle.id(), TypeId::of::<u32>())
            .is_none());
    }
}
