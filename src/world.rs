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

//! World: central entity, key, and archetype storage plus the structural
//! deferral machinery.
//!
//! Structural operations through `&mut World` apply immediately. While the
//! world lock counter is nonzero (any runner active, or a [`WorldLock`]
//! guard held), structural operations go through the deferral surface
//! ([`WorldLock`] / [`EntityCtx`]) and are replayed in submission order on
//! the final release.

use std::any::{type_name, TypeId};
use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use ahash::{AHashMap, AHashSet};
use tracing::{debug, trace, trace_span};

use crate::archetype::Archetype;
use crate::command::{Command, DeferralLog};
use crate::component::{Component, ObjectHandle, SharedObjects};
use crate::entity::{EntityId, EntityLocation, EntityRegistry};
use crate::error::{EcsError, Result};
use crate::key::{KeyCatalog, KeyId, KeyPattern, KeyTarget, Signature};
use crate::query::{QueryBuilder, StreamQuery};

/// Archetype index of the empty signature, fixed at world creation
pub(crate) const EMPTY_ARCHETYPE: usize = 0;

static NEXT_WORLD_ID: AtomicU64 = AtomicU64::new(1);

/// Structural state of one world
pub(crate) struct WorldState {
    pub(crate) entities: EntityRegistry,
    pub(crate) archetypes: Vec<Archetype>,
    archetype_index: AHashMap<Signature, usize>,
    /// Edge cache: `(archetype, key, is_add) -> neighbour archetype`
    transitions: AHashMap<(usize, KeyId, bool), usize>,
    pub(crate) catalog: KeyCatalog,
    pub(crate) objects: SharedObjects,
}

impl WorldState {
    fn new() -> Self {
        let mut state = Self {
            // Start with reasonable defaults to avoid resize spikes
            archetypes: Vec::with_capacity(64),
            archetype_index: AHashMap::with_capacity(64),
            transitions: AHashMap::with_capacity(128),
            entities: EntityRegistry::new(),
            catalog: KeyCatalog::new(),
            objects: SharedObjects::new(),
        };
        // Bootstrap the empty archetype (entities with no components).
        // It is always at index 0 and receives every spawn.
        let empty = state.get_or_create_archetype(Signature::empty());
        debug_assert_eq!(empty, EMPTY_ARCHETYPE);
        state
    }

    fn get_or_create_archetype(&mut self, signature: Signature) -> usize {
        if let Some(&id) = self.archetype_index.get(&signature) {
            return id;
        }
        let archetype = Archetype::new(signature.clone(), &self.catalog);
        self.archetypes.push(archetype);
        let id = self.archetypes.len() - 1;
        self.archetype_index.insert(signature, id);
        trace!(archetype = id, keys = self.archetypes[id].signature().len(), "created archetype");
        id
    }

    fn edge_add(&mut self, from: usize, key: KeyId) -> usize {
        if let Some(&to) = self.transitions.get(&(from, key, true)) {
            return to;
        }
        let signature = self
            .catalog
            .signature_with(self.archetypes[from].signature(), key);
        let to = self.get_or_create_archetype(signature);
        self.transitions.insert((from, key, true), to);
        // the reverse edge comes for free
        self.transitions.insert((to, key, false), from);
        to
    }

    fn edge_remove(&mut self, from: usize, key: KeyId) -> usize {
        if let Some(&to) = self.transitions.get(&(from, key, false)) {
            return to;
        }
        let signature = self
            .catalog
            .signature_without(self.archetypes[from].signature(), key);
        let to = self.get_or_create_archetype(signature);
        self.transitions.insert((from, key, false), to);
        self.transitions.insert((to, key, true), from);
        to
    }

    pub(crate) fn spawn_empty(&mut self) -> EntityId {
        let id = self.entities.alloc();
        self.place(id);
        id
    }

    /// Materialize a reserved identifier into the empty archetype.
    pub(crate) fn place_reserved(&mut self, id: EntityId) {
        debug_assert!(self.entities.locate(id).is_none(), "reserved id already placed");
        self.place(id);
    }

    fn place(&mut self, id: EntityId) {
        let archetype = &mut self.archetypes[EMPTY_ARCHETYPE];
        let row = archetype.allocate_row(id);
        self.entities.set_location(
            id,
            EntityLocation {
                archetype_id: EMPTY_ARCHETYPE,
                archetype_row: row,
            },
        );
    }

    pub(crate) fn despawn(&mut self, entity: EntityId) -> Result<()> {
        let location = self.entities.free(entity)?;
        let archetype = &mut self.archetypes[location.archetype_id];
        // SAFETY: the registry recorded this row for the entity.
        let swapped = unsafe { archetype.swap_remove_row(location.archetype_row) };
        if let Some(swapped_entity) = swapped {
            self.entities.set_location(swapped_entity, location);
        }
        Ok(())
    }

    pub(crate) fn add_keyed<T: Component>(
        &mut self,
        entity: EntityId,
        target: KeyTarget,
        value: T,
    ) -> Result<()> {
        let location = self.entities.locate(entity).ok_or(EcsError::StaleEntity)?;
        if let KeyTarget::Entity(t) = target {
            if !self.entities.is_alive(t) {
                return Err(EcsError::StaleEntity);
            }
        }
        let key = self.catalog.intern::<T>(target);
        let archetype = &mut self.archetypes[location.archetype_id];
        if let Some(column) = archetype.column_mut(key) {
            // Add of a present key overwrites in place; no structural move
            unsafe { column.replace::<T>(location.archetype_row, value) };
            return Ok(());
        }
        let destination = self.edge_add(location.archetype_id, key);
        self.move_entity(entity, location, destination, |archetype, _row| {
            let column = archetype
                .column_mut(key)
                .expect("destination archetype bears the added key");
            // SAFETY: the move left exactly this column one row short.
            unsafe { column.push(value) };
        });
        Ok(())
    }

    pub(crate) fn add_object_key(
        &mut self,
        entity: EntityId,
        type_id: TypeId,
        type_name: &'static str,
        object: crate::component::ObjectId,
    ) -> Result<()> {
        let location = self.entities.locate(entity).ok_or(EcsError::StaleEntity)?;
        if !self.objects.contains(object) {
            return Err(EcsError::WrongWorld);
        }
        let key = self.catalog.intern_object(type_id, type_name, object);
        if self.archetypes[location.archetype_id].has_key(key) {
            debug!(entity = %entity, component = type_name, "object link already present");
            return Ok(());
        }
        let destination = self.edge_add(location.archetype_id, key);
        self.move_entity(entity, location, destination, |archetype, _row| {
            archetype
                .column_mut(key)
                .expect("destination archetype bears the added key")
                .push_empty();
        });
        Ok(())
    }

    pub(crate) fn remove_keyed(
        &mut self,
        entity: EntityId,
        type_id: TypeId,
        target: KeyTarget,
    ) -> Result<()> {
        let location = self.entities.locate(entity).ok_or(EcsError::StaleEntity)?;
        let Some(key) = self.catalog.lookup(type_id, target) else {
            debug!(entity = %entity, "remove of a never-seen key is a no-op");
            return Ok(());
        };
        if !self.archetypes[location.archetype_id].has_key(key) {
            debug!(
                entity = %entity,
                component = self.catalog.info(key).type_name,
                "remove of a missing component is a no-op"
            );
            return Ok(());
        }
        let destination = self.edge_remove(location.archetype_id, key);
        self.move_entity(entity, location, destination, |_, _| {});
        Ok(())
    }

    /// Relocate an entity's row between archetypes. Shared columns move
    /// their values, dropped keys drop them, and `write_new` fills columns
    /// only present in the destination.
    fn move_entity<F>(
        &mut self,
        entity: EntityId,
        old: EntityLocation,
        new_archetype_id: usize,
        write_new: F,
    ) where
        F: FnOnce(&mut Archetype, usize),
    {
        debug_assert_ne!(old.archetype_id, new_archetype_id);

        // Access both archetypes through split_at_mut
        let (source, destination) = if old.archetype_id < new_archetype_id {
            let (left, right) = self.archetypes.split_at_mut(new_archetype_id);
            (&mut left[old.archetype_id], &mut right[0])
        } else {
            let (left, right) = self.archetypes.split_at_mut(old.archetype_id);
            (&mut right[0], &mut left[new_archetype_id])
        };

        let (new_row, swapped) = source.move_row_to(old.archetype_row, destination);
        write_new(destination, new_row);
        destination.assert_row_coherent();
        source.assert_row_coherent();

        if let Some(swapped_entity) = swapped {
            self.entities.set_location(swapped_entity, old);
        }
        self.entities.set_location(
            entity,
            EntityLocation {
                archetype_id: new_archetype_id,
                archetype_row: new_row,
            },
        );
    }

    pub(crate) fn component_ref<T: Component>(
        &self,
        entity: EntityId,
        target: KeyTarget,
    ) -> Option<&T> {
        let location = self.entities.locate(entity)?;
        let key = self.catalog.lookup(TypeId::of::<T>(), target)?;
        let column = self.archetypes[location.archetype_id].column(key)?;
        // SAFETY: the key was interned for T; row recorded by the registry.
        Some(unsafe { &*(column.ptr_at(location.archetype_row) as *const T) })
    }

    pub(crate) fn component_mut<T: Component>(
        &mut self,
        entity: EntityId,
        target: KeyTarget,
    ) -> Option<&mut T> {
        let location = self.entities.locate(entity)?;
        let key = self.catalog.lookup(TypeId::of::<T>(), target)?;
        let column = self.archetypes[location.archetype_id].column(key)?;
        // SAFETY: as component_ref, and &mut self guarantees exclusivity.
        Some(unsafe { &mut *(column.ptr_at(location.archetype_row) as *mut T) })
    }
}

/// Central ECS instance
///
/// Dropping the world runs destructors for all component values and releases
/// all buffers.
pub struct World {
    id: u64,
    state: UnsafeCell<WorldState>,
    lock_count: AtomicU32,
    deferred: DeferralLog,
}

// SAFETY: all component values are Send + Sync (enforced by `Component`).
// Shared access from Job workers is confined to disjoint rows while the
// world lock pins the structural state.
unsafe impl Send for World {}
unsafe impl Sync for World {}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}

impl World {
    /// Create a new, empty world.
    pub fn new() -> Self {
        Self {
            id: NEXT_WORLD_ID.fetch_add(1, Ordering::Relaxed),
            state: UnsafeCell::new(WorldState::new()),
            lock_count: AtomicU32::new(0),
            deferred: DeferralLog::new(),
        }
    }

    /// Identity of this world; streams are bound to it at compile time.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Shared view of the structural state.
    ///
    /// # Safety
    /// The caller must not hold the reference across any point where the
    /// state is mutated through `&mut self` or a deferral drain; runners
    /// satisfy this by holding the world lock for the borrow's duration.
    pub(crate) unsafe fn state_ref(&self) -> &WorldState {
        &*self.state.get()
    }

    fn state_mut(&mut self) -> &mut WorldState {
        self.state.get_mut()
    }

    // ========== Entity lifecycle ==========

    /// Spawn a new entity into the empty archetype.
    pub fn spawn(&mut self) -> EntityMut<'_> {
        let entity = self.state_mut().spawn_empty();
        EntityMut {
            world: self,
            entity,
        }
    }

    /// Handle to an existing entity.
    pub fn entity_mut(&mut self, entity: EntityId) -> Result<EntityMut<'_>> {
        if !self.is_alive(entity) {
            return Err(EcsError::StaleEntity);
        }
        Ok(EntityMut {
            world: self,
            entity,
        })
    }

    /// Despawn immediately; the row is swap-removed and the identifier
    /// recycled with a bumped generation.
    pub fn despawn(&mut self, entity: EntityId) -> Result<()> {
        self.state_mut().despawn(entity)
    }

    pub fn is_alive(&self, entity: EntityId) -> bool {
        // SAFETY: read-only probe of the registry.
        unsafe { self.state_ref() }.entities.is_alive(entity)
    }

    pub fn locate(&self, entity: EntityId) -> Option<EntityLocation> {
        // SAFETY: read-only probe of the registry.
        unsafe { self.state_ref() }.entities.locate(entity)
    }

    // ========== Structural operations (immediate path) ==========

    /// Add (or overwrite) a plain component.
    pub fn add<T: Component>(&mut self, entity: EntityId, value: T) -> Result<()> {
        self.state_mut().add_keyed(entity, KeyTarget::None, value)
    }

    /// Add (or overwrite) a relation component keyed by `target`.
    pub fn add_relation<T: Component>(
        &mut self,
        entity: EntityId,
        target: EntityId,
        value: T,
    ) -> Result<()> {
        self.state_mut()
            .add_keyed(entity, KeyTarget::Entity(target), value)
    }

    /// Link `entity` to a registered shared object.
    pub fn add_object<T: Component>(
        &mut self,
        entity: EntityId,
        handle: ObjectHandle<T>,
    ) -> Result<()> {
        self.state_mut()
            .add_object_key(entity, TypeId::of::<T>(), type_name::<T>(), handle.id())
    }

    /// Remove a plain component. Removing a key the entity does not bear is
    /// a logged no-op.
    pub fn remove<T: Component>(&mut self, entity: EntityId) -> Result<()> {
        self.state_mut()
            .remove_keyed(entity, TypeId::of::<T>(), KeyTarget::None)
    }

    pub fn remove_relation<T: Component>(
        &mut self,
        entity: EntityId,
        target: EntityId,
    ) -> Result<()> {
        self.state_mut()
            .remove_keyed(entity, TypeId::of::<T>(), KeyTarget::Entity(target))
    }

    pub fn remove_object<T: Component>(
        &mut self,
        entity: EntityId,
        handle: ObjectHandle<T>,
    ) -> Result<()> {
        self.state_mut()
            .remove_keyed(entity, TypeId::of::<T>(), KeyTarget::Object(handle.id()))
    }

    // ========== Component access ==========

    pub fn get<T: Component>(&self, entity: EntityId) -> Option<&T> {
        // SAFETY: shared read; see state_ref.
        unsafe { self.state_ref() }.component_ref(entity, KeyTarget::None)
    }

    pub fn get_mut<T: Component>(&mut self, entity: EntityId) -> Option<&mut T> {
        self.state_mut().component_mut(entity, KeyTarget::None)
    }

    pub fn get_relation<T: Component>(&self, entity: EntityId, target: EntityId) -> Option<&T> {
        // SAFETY: shared read; see state_ref.
        unsafe { self.state_ref() }.component_ref(entity, KeyTarget::Entity(target))
    }

    pub fn get_relation_mut<T: Component>(
        &mut self,
        entity: EntityId,
        target: EntityId,
    ) -> Option<&mut T> {
        self.state_mut()
            .component_mut(entity, KeyTarget::Entity(target))
    }

    /// Every `(target, value)` relation of type `T` borne by `entity`,
    /// lazily, in the archetype's canonical key order.
    pub fn relations<T: Component>(
        &self,
        entity: EntityId,
    ) -> impl Iterator<Item = (EntityId, &T)> + '_ {
        // SAFETY: shared read; see state_ref.
        let state = unsafe { self.state_ref() };
        let located = state
            .entities
            .locate(entity)
            .map(|location| (&state.archetypes[location.archetype_id], location.archetype_row));
        located.into_iter().flat_map(move |(archetype, row)| {
            archetype
                .signature()
                .keys()
                .iter()
                .enumerate()
                .filter_map(move |(slot, &key)| {
                    let info = state.catalog.info(key);
                    if info.type_id != TypeId::of::<T>() {
                        return None;
                    }
                    let KeyTarget::Entity(target) = info.target else {
                        return None;
                    };
                    let column = archetype.column_by_slot(slot);
                    // SAFETY: the key was interned for T; row from the registry.
                    let value = unsafe { &*(column.ptr_at(row) as *const T) };
                    Some((target, value))
                })
        })
    }

    pub fn has<T: Component>(&self, entity: EntityId) -> bool {
        self.has_pattern(entity, &KeyPattern::plain::<T>())
    }

    /// Does the entity bear any key matching `pattern`?
    pub fn has_pattern(&self, entity: EntityId, pattern: &KeyPattern) -> bool {
        // SAFETY: shared read; see state_ref.
        let state = unsafe { self.state_ref() };
        let Some(location) = state.entities.locate(entity) else {
            return false;
        };
        state.archetypes[location.archetype_id]
            .signature()
            .keys()
            .iter()
            .any(|&key| state.catalog.matches(key, pattern))
    }

    // ========== Shared objects ==========

    /// Register a shared object; the value lives for the world's lifetime.
    pub fn register_object<T: Component>(&mut self, value: T) -> ObjectHandle<T> {
        self.state_mut().objects.register(value)
    }

    pub fn object<T: Component>(&self, handle: ObjectHandle<T>) -> Option<&T> {
        // SAFETY: shared read; objects are never removed.
        unsafe { self.state_ref() }.objects.get(handle)
    }

    // ========== Queries ==========

    /// Start a query descriptor over the select tuple `S`.
    pub fn query<S: StreamQuery>(&self) -> QueryBuilder<'_, S> {
        QueryBuilder::new(self)
    }

    // ========== Lock and deferral ==========

    /// Acquire the world lock. Re-entrant: nested guards stack, and only the
    /// outermost release drains the deferral log.
    pub fn lock(&self) -> WorldLock<'_> {
        self.lock_count.fetch_add(1, Ordering::Acquire);
        WorldLock { world: self }
    }

    pub fn is_locked(&self) -> bool {
        self.lock_count.load(Ordering::Relaxed) > 0
    }

    fn release_lock(&self) {
        if self.lock_count.fetch_sub(1, Ordering::Release) == 1 {
            // SAFETY: the counter just reached zero, so no runner is active
            // and nothing else mutates the state during the drain.
            unsafe { self.drain_deferred() };
        }
    }

    /// # Safety
    /// Must only run when the lock counter is zero and no shared state
    /// borrows from runners are live.
    unsafe fn drain_deferred(&self) {
        let state = &mut *self.state.get();
        state.entities.flush_reserved();
        if self.deferred.is_empty() {
            return;
        }
        let span = trace_span!("world.drain", queued = self.deferred.len());
        let _guard = span.enter();

        // Entities despawned in this drain; later ops against them collapse.
        let mut drained_dead: AHashSet<EntityId> = AHashSet::new();
        while let Some(command) = self.deferred.pop() {
            match command {
                Command::Spawn(id) => state.place_reserved(id),
                Command::Despawn(id) => {
                    if drained_dead.contains(&id) {
                        continue;
                    }
                    match state.despawn(id) {
                        Ok(()) => {
                            drained_dead.insert(id);
                        }
                        Err(err) => trace!(entity = %id, %err, "deferred despawn dropped"),
                    }
                }
                Command::Apply { entity, op } => {
                    if drained_dead.contains(&entity) {
                        trace!(entity = %entity, "deferred op dropped: target despawned in this drain");
                        continue;
                    }
                    if let Err(err) = op(state) {
                        debug!(entity = %entity, %err, "deferred op failed");
                    }
                }
            }
        }
    }

    // ========== Deferral surface (used by WorldLock / EntityCtx) ==========

    pub(crate) fn defer_spawn(&self) -> EntityId {
        debug_assert!(self.is_locked(), "deferred spawn outside a lock");
        // SAFETY: reservation never mutates registry slots; see EntityRegistry.
        let id = unsafe { self.state_ref() }.entities.reserve();
        self.deferred.push(Command::Spawn(id));
        id
    }

    pub(crate) fn defer_despawn(&self, entity: EntityId) {
        debug_assert!(self.is_locked(), "deferred despawn outside a lock");
        self.deferred.push(Command::Despawn(entity));
    }

    pub(crate) fn defer_add<T: Component>(&self, entity: EntityId, target: KeyTarget, value: T) {
        debug_assert!(self.is_locked(), "deferred add outside a lock");
        self.deferred.push(Command::Apply {
            entity,
            op: Box::new(move |state| state.add_keyed(entity, target, value)),
        });
    }

    pub(crate) fn defer_add_object(
        &self,
        entity: EntityId,
        type_id: TypeId,
        type_name: &'static str,
        object: crate::component::ObjectId,
    ) {
        debug_assert!(self.is_locked(), "deferred add outside a lock");
        self.deferred.push(Command::Apply {
            entity,
            op: Box::new(move |state| state.add_object_key(entity, type_id, type_name, object)),
        });
    }

    pub(crate) fn defer_remove(&self, entity: EntityId, type_id: TypeId, target: KeyTarget) {
        debug_assert!(self.is_locked(), "deferred remove outside a lock");
        self.deferred.push(Command::Apply {
            entity,
            op: Box::new(move |state| state.remove_keyed(entity, type_id, target)),
        });
    }

    // ========== Statistics ==========

    pub fn entity_count(&self) -> usize {
        // SAFETY: read-only probe.
        let state = unsafe { self.state_ref() };
        state.archetypes.iter().map(Archetype::len).sum()
    }

    pub fn archetype_count(&self) -> usize {
        // SAFETY: read-only probe.
        unsafe { self.state_ref() }.archetypes.len()
    }

    /// Inspect one archetype (archetypes are never destroyed, so indices
    /// stay valid once observed).
    pub fn archetype(&self, id: usize) -> Option<&Archetype> {
        // SAFETY: read-only probe.
        unsafe { self.state_ref() }.archetypes.get(id)
    }
}

/// Re-entrant world lock guard; structural operations through the guard are
/// deferred and replayed when the outermost guard releases.
pub struct WorldLock<'w> {
    world: &'w World,
}

impl<'w> WorldLock<'w> {
    /// Deferred spawn: the identifier is usable immediately and materializes
    /// into the empty archetype on drain.
    pub fn spawn(&self) -> EntityId {
        self.world.defer_spawn()
    }

    pub fn despawn(&self, entity: EntityId) {
        self.world.defer_despawn(entity);
    }

    pub fn add<T: Component>(&self, entity: EntityId, value: T) {
        self.world.defer_add(entity, KeyTarget::None, value);
    }

    pub fn add_relation<T: Component>(&self, entity: EntityId, target: EntityId, value: T) {
        self.world.defer_add(entity, KeyTarget::Entity(target), value);
    }

    pub fn add_object<T: Component>(&self, entity: EntityId, handle: ObjectHandle<T>) {
        self.world
            .defer_add_object(entity, TypeId::of::<T>(), type_name::<T>(), handle.id());
    }

    pub fn remove<T: Component>(&self, entity: EntityId) {
        self.world
            .defer_remove(entity, TypeId::of::<T>(), KeyTarget::None);
    }

    pub fn remove_relation<T: Component>(&self, entity: EntityId, target: EntityId) {
        self.world
            .defer_remove(entity, TypeId::of::<T>(), KeyTarget::Entity(target));
    }
}

impl Drop for WorldLock<'_> {
    fn drop(&mut self) {
        self.world.release_lock();
    }
}

/// Per-invocation handle passed to stream actions: the current entity plus
/// the deferral surface for structural changes.
pub struct EntityCtx<'w> {
    entity: EntityId,
    world: &'w World,
}

impl<'w> EntityCtx<'w> {
    pub(crate) fn new(entity: EntityId, world: &'w World) -> Self {
        Self { entity, world }
    }

    /// The entity this invocation is visiting.
    pub fn entity(&self) -> EntityId {
        self.entity
    }

    /// Deferred spawn of a new entity; see [`WorldLock::spawn`].
    pub fn spawn(&self) -> EntityId {
        self.world.defer_spawn()
    }

    /// Deferred add on the visited entity.
    pub fn add<T: Component>(&self, value: T) {
        self.world.defer_add(self.entity, KeyTarget::None, value);
    }

    /// Deferred add on another entity.
    pub fn add_to<T: Component>(&self, entity: EntityId, value: T) {
        self.world.defer_add(entity, KeyTarget::None, value);
    }

    /// Deferred relation add on the visited entity.
    pub fn add_relation<T: Component>(&self, target: EntityId, value: T) {
        self.world
            .defer_add(self.entity, KeyTarget::Entity(target), value);
    }

    /// Deferred object link on the visited entity.
    pub fn add_object<T: Component>(&self, handle: ObjectHandle<T>) {
        self.world
            .defer_add_object(self.entity, TypeId::of::<T>(), type_name::<T>(), handle.id());
    }

    /// Deferred remove on the visited entity.
    pub fn remove<T: Component>(&self) {
        self.world
            .defer_remove(self.entity, TypeId::of::<T>(), KeyTarget::None);
    }

    /// Deferred relation remove on the visited entity.
    pub fn remove_relation<T: Component>(&self, target: EntityId) {
        self.world
            .defer_remove(self.entity, TypeId::of::<T>(), KeyTarget::Entity(target));
    }

    /// Deferred despawn of the visited entity.
    pub fn despawn(&self) {
        self.world.defer_despawn(self.entity);
    }

    /// Deferred despawn of another entity.
    pub fn despawn_entity(&self, entity: EntityId) {
        self.world.defer_despawn(entity);
    }
}

/// Exclusive handle to one live entity; thin chaining sugar over the world's
/// structural operations.
pub struct EntityMut<'w> {
    world: &'w mut World,
    entity: EntityId,
}

impl<'w> EntityMut<'w> {
    pub fn id(&self) -> EntityId {
        self.entity
    }

    pub fn add<T: Component>(&mut self, value: T) -> &mut Self {
        self.world
            .add(self.entity, value)
            .expect("EntityMut refers to a live entity");
        self
    }

    pub fn add_relation<T: Component>(&mut self, target: EntityId, value: T) -> Result<&mut Self> {
        self.world.add_relation(self.entity, target, value)?;
        Ok(self)
    }

    pub fn add_object<T: Component>(&mut self, handle: ObjectHandle<T>) -> Result<&mut Self> {
        self.world.add_object(self.entity, handle)?;
        Ok(self)
    }

    pub fn remove<T: Component>(&mut self) -> &mut Self {
        self.world
            .remove::<T>(self.entity)
            .expect("EntityMut refers to a live entity");
        self
    }

    pub fn get<T: Component>(&self) -> Option<&T> {
        self.world.get(self.entity)
    }

    pub fn despawn(self) {
        self.world
            .despawn(self.entity)
            .expect("EntityMut refers to a live entity");
    }
}
