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

//! Component key catalog
//!
//! Components are keyed by `(type, role, target)`, not by type alone: a
//! relation `Follows(alice)` and a relation `Follows(bob)` are distinct keys
//! and occupy distinct columns. The catalog interns these triples to dense
//! `KeyId`s so signature operations work on small integers, and captures the
//! value type's layout at intern time so columns can be built without the
//! static type.

use std::any::{type_name, TypeId};
use std::cmp::Ordering;

use ahash::AHashMap;
use smallvec::SmallVec;

use crate::component::{Component, ObjectId};
use crate::entity::EntityId;

/// Role half of a component key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyRole {
    /// Ordinary per-entity component
    Plain,
    /// Component keyed by another entity
    Relation,
    /// Component keyed by a shared heap object
    ObjectLink,
}

/// Target half of a component key
///
/// Variant order matters: canonical key ordering sorts by type, then role,
/// then target, and the derived `Ord` supplies the last two.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum KeyTarget {
    None,
    Entity(EntityId),
    Object(ObjectId),
}

impl KeyTarget {
    pub fn role(&self) -> KeyRole {
        match self {
            KeyTarget::None => KeyRole::Plain,
            KeyTarget::Entity(_) => KeyRole::Relation,
            KeyTarget::Object(_) => KeyRole::ObjectLink,
        }
    }
}

/// Interned key identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KeyId(u32);

impl KeyId {
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// Interned key record: the identity triple plus the value type's layout
#[derive(Debug, Clone, Copy)]
pub struct KeyInfo {
    pub type_id: TypeId,
    pub target: KeyTarget,
    pub type_name: &'static str,
    /// Per-row value size; zero for object-link keys (the value is shared)
    pub item_size: usize,
    pub item_align: usize,
    pub drop_fn: Option<unsafe fn(*mut u8)>,
}

impl KeyInfo {
    pub fn role(&self) -> KeyRole {
        self.target.role()
    }
}

/// Wildcard-capable key pattern used by queries and presence checks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyPattern {
    type_id: TypeId,
    type_name: &'static str,
    filter: TargetFilter,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TargetFilter {
    PlainOnly,
    Any,
    AnyEntity,
    AnyObject,
    Entity(EntityId),
    Object(ObjectId),
}

impl KeyPattern {
    /// Plain component of type `T`, no target
    pub fn plain<T: Component>() -> Self {
        Self::from_parts::<T>(TargetFilter::PlainOnly)
    }

    /// Any key of type `T`: plain, relation, or object link
    pub fn any<T: Component>() -> Self {
        Self::from_parts::<T>(TargetFilter::Any)
    }

    /// Relation of type `T` to any entity
    pub fn any_entity<T: Component>() -> Self {
        Self::from_parts::<T>(TargetFilter::AnyEntity)
    }

    /// Object link of type `T` to any shared object
    pub fn any_object<T: Component>() -> Self {
        Self::from_parts::<T>(TargetFilter::AnyObject)
    }

    /// Relation of type `T` to one specific entity
    pub fn target<T: Component>(target: EntityId) -> Self {
        Self::from_parts::<T>(TargetFilter::Entity(target))
    }

    /// Object link of type `T` to one specific shared object
    pub fn object<T: Component>(handle: crate::component::ObjectHandle<T>) -> Self {
        Self::from_parts::<T>(TargetFilter::Object(handle.id()))
    }

    fn from_parts<T: Component>(filter: TargetFilter) -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            type_name: type_name::<T>(),
            filter,
        }
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub(crate) fn matches_info(&self, info: &KeyInfo) -> bool {
        if info.type_id != self.type_id {
            return false;
        }
        match self.filter {
            TargetFilter::Any => true,
            TargetFilter::PlainOnly => info.target == KeyTarget::None,
            TargetFilter::AnyEntity => matches!(info.target, KeyTarget::Entity(_)),
            TargetFilter::AnyObject => matches!(info.target, KeyTarget::Object(_)),
            TargetFilter::Entity(e) => info.target == KeyTarget::Entity(e),
            TargetFilter::Object(o) => info.target == KeyTarget::Object(o),
        }
    }
}

/// Canonically ordered, deduplicated set of component keys
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Signature(SmallVec<[KeyId; 8]>);

impl Signature {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn keys(&self) -> &[KeyId] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, key: KeyId) -> bool {
        self.0.contains(&key)
    }
}

/// Interning catalog for component keys
pub struct KeyCatalog {
    keys: Vec<KeyInfo>,
    index: AHashMap<(TypeId, KeyTarget), KeyId>,
}

impl Default for KeyCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyCatalog {
    pub fn new() -> Self {
        Self {
            keys: Vec::new(),
            index: AHashMap::with_capacity(64),
        }
    }

    /// Intern the key `(T, target)`, capturing `T`'s layout on first sight.
    ///
    /// Object-link keys store no per-row value, so their layout is zero
    /// regardless of `T`.
    pub fn intern<T: Component>(&mut self, target: KeyTarget) -> KeyId {
        if let KeyTarget::Object(id) = target {
            return self.intern_object(TypeId::of::<T>(), type_name::<T>(), id);
        }
        let type_id = TypeId::of::<T>();
        if let Some(&key) = self.index.get(&(type_id, target)) {
            return key;
        }
        let drop_fn: Option<unsafe fn(*mut u8)> = if std::mem::needs_drop::<T>() {
            Some(|ptr| unsafe { std::ptr::drop_in_place(ptr as *mut T) })
        } else {
            None
        };
        self.insert(KeyInfo {
            type_id,
            target,
            type_name: type_name::<T>(),
            item_size: std::mem::size_of::<T>(),
            item_align: std::mem::align_of::<T>(),
            drop_fn,
        })
    }

    /// Intern an object-link key without the static type.
    pub(crate) fn intern_object(
        &mut self,
        type_id: TypeId,
        type_name: &'static str,
        object: ObjectId,
    ) -> KeyId {
        let target = KeyTarget::Object(object);
        if let Some(&key) = self.index.get(&(type_id, target)) {
            return key;
        }
        self.insert(KeyInfo {
            type_id,
            target,
            type_name,
            item_size: 0,
            item_align: 1,
            drop_fn: None,
        })
    }

    fn insert(&mut self, info: KeyInfo) -> KeyId {
        let key = KeyId(self.keys.len() as u32);
        self.index.insert((info.type_id, info.target), key);
        self.keys.push(info);
        key
    }

    /// Resolve an already-interned key, if any.
    pub fn lookup(&self, type_id: TypeId, target: KeyTarget) -> Option<KeyId> {
        self.index.get(&(type_id, target)).copied()
    }

    pub fn info(&self, key: KeyId) -> &KeyInfo {
        &self.keys[key.index()]
    }

    pub fn role(&self, key: KeyId) -> KeyRole {
        self.info(key).role()
    }

    pub fn target(&self, key: KeyId) -> KeyTarget {
        self.info(key).target
    }

    pub fn matches(&self, key: KeyId, pattern: &KeyPattern) -> bool {
        pattern.matches_info(self.info(key))
    }

    /// Canonical key order: by type, then role, then target.
    pub fn cmp_keys(&self, a: KeyId, b: KeyId) -> Ordering {
        let (a, b) = (self.info(a), self.info(b));
        a.type_id
            .cmp(&b.type_id)
            .then_with(|| a.target.cmp(&b.target))
    }

    /// Build a signature from arbitrary keys, sorting and deduplicating.
    pub fn signature_from(&self, keys: impl IntoIterator<Item = KeyId>) -> Signature {
        let mut out: SmallVec<[KeyId; 8]> = keys.into_iter().collect();
        out.sort_by(|&a, &b| self.cmp_keys(a, b));
        out.dedup();
        Signature(out)
    }

    /// `signature` plus `key`, canonical order preserved.
    pub fn signature_with(&self, signature: &Signature, key: KeyId) -> Signature {
        let mut out = signature.0.clone();
        match out.binary_search_by(|&k| self.cmp_keys(k, key)) {
            Ok(_) => {}
            Err(pos) => out.insert(pos, key),
        }
        Signature(out)
    }

    /// `signature` minus `key`.
    pub fn signature_without(&self, signature: &Signature, key: KeyId) -> Signature {
        let mut out = signature.0.clone();
        out.retain(|&mut k| k != key);
        Signature(out)
    }
}
