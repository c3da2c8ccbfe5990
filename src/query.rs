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

//! Query engine and stream runners
//!
//! A query is a typed tuple of select slots plus signature filters. Compiling
//! it checks the descriptor for aliasing and yields a `Stream`, which caches
//! its matched archetypes incrementally (each archetype is tested exactly
//! once per stream; archetypes are never destroyed, so there is no removal
//! path) and dispatches actions through one of the runners.
//!
//! Wildcard slots (`Rel`, `RelMut`, `Obj` without narrowing) may match
//! several columns in one archetype; runners then invoke the action once per
//! (row, matching-column combination).

use std::any::{type_name, TypeId};
use std::marker::PhantomData;
use std::ptr::NonNull;

use parking_lot::Mutex;
use smallvec::{smallvec, SmallVec};
use tracing::debug;

use crate::archetype::{Archetype, RawStorage};
#[cfg(feature = "parallel")]
use crate::archetype::DEFAULT_CHUNK_SIZE;
use crate::component::{Component, ObjectHandle, ObjectId};
use crate::entity::EntityId;
use crate::error::{EcsError, Result};
use crate::key::{KeyInfo, KeyPattern, KeyTarget};
use crate::world::{EntityCtx, World, WorldState};

/// Maximum number of select slots in one stream
pub const MAX_SELECT: usize = 8;

/// Target constraint of a select slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RolePattern {
    Plain,
    RelationAny,
    RelationTo(EntityId),
    ObjectAny,
    ObjectIs(ObjectId),
}

/// Descriptor of one select slot
#[derive(Debug, Clone, Copy)]
pub struct SelectSpec {
    pub type_id: TypeId,
    pub type_name: &'static str,
    pub role: RolePattern,
    pub mutable: bool,
}

impl SelectSpec {
    fn matches_info(&self, info: &KeyInfo) -> bool {
        if info.type_id != self.type_id {
            return false;
        }
        match self.role {
            RolePattern::Plain => info.target == KeyTarget::None,
            RolePattern::RelationAny => matches!(info.target, KeyTarget::Entity(_)),
            RolePattern::RelationTo(e) => info.target == KeyTarget::Entity(e),
            RolePattern::ObjectAny => matches!(info.target, KeyTarget::Object(_)),
            RolePattern::ObjectIs(o) => info.target == KeyTarget::Object(o),
        }
    }

    /// Whether two slots can resolve to one common column.
    fn overlaps(&self, other: &SelectSpec) -> bool {
        if self.type_id != other.type_id {
            return false;
        }
        use RolePattern::*;
        match (self.role, other.role) {
            (Plain, Plain) => true,
            (RelationAny, RelationAny | RelationTo(_)) => true,
            (RelationTo(_), RelationAny) => true,
            (RelationTo(a), RelationTo(b)) => a == b,
            (ObjectAny, ObjectAny | ObjectIs(_)) => true,
            (ObjectIs(_), ObjectAny) => true,
            (ObjectIs(a), ObjectIs(b)) => a == b,
            _ => false,
        }
    }
}

/// Resolved view of one (slot, column) pairing inside one archetype
pub struct SlotCtx {
    column: NonNull<RawStorage>,
    /// Address of the shared value for object-link columns
    shared: Option<NonNull<u8>>,
    target: KeyTarget,
}

impl SlotCtx {
    #[inline]
    unsafe fn column(&self) -> &RawStorage {
        self.column.as_ref()
    }

    #[inline]
    fn target_entity(&self) -> EntityId {
        match self.target {
            KeyTarget::Entity(e) => e,
            _ => unreachable!("relation slot resolved to a non-relation key"),
        }
    }
}

/// One select slot: how a matched column is viewed per row (`Item`) and per
/// archetype (`Raw`).
///
/// # Safety
/// `fetch` and `raw` trust their context blindly: implementations must only
/// be paired with columns whose key matched the slot's `spec` pattern.
pub unsafe trait Select: 'static {
    type Item<'w>;
    type Raw<'w>;

    fn spec() -> SelectSpec;

    /// # Safety
    /// `slot` resolved from a column matching `spec()`; `row` is in bounds;
    /// the aliasing rules encoded in `spec().mutable` are upheld by the
    /// runner.
    unsafe fn fetch<'w>(slot: &SlotCtx, row: usize) -> Self::Item<'w>;

    /// # Safety
    /// As `fetch`, for the whole column at once.
    unsafe fn raw<'w>(slot: &SlotCtx) -> Self::Raw<'w>;
}

/// Shared access to a plain component
pub struct Read<T>(PhantomData<T>);

/// Exclusive access to a plain component
pub struct Write<T>(PhantomData<T>);

/// Shared access to relation values of type `T`; yields the relation target
/// alongside each value. Matches every relation column unless narrowed with
/// [`QueryBuilder::related_to`].
pub struct Rel<T>(PhantomData<T>);

/// Exclusive variant of [`Rel`]
pub struct RelMut<T>(PhantomData<T>);

/// Shared access to an object-link component; every row of an archetype sees
/// the same shared value. Matches every object link of type `T` unless
/// narrowed with [`QueryBuilder::object_is`].
pub struct Obj<T>(PhantomData<T>);

unsafe impl<T: Component> Select for Read<T> {
    type Item<'w> = &'w T;
    type Raw<'w> = &'w [T];

    fn spec() -> SelectSpec {
        SelectSpec {
            type_id: TypeId::of::<T>(),
            type_name: type_name::<T>(),
            role: RolePattern::Plain,
            mutable: false,
        }
    }

    unsafe fn fetch<'w>(slot: &SlotCtx, row: usize) -> &'w T {
        &*(slot.column().ptr_at(row) as *const T)
    }

    unsafe fn raw<'w>(slot: &SlotCtx) -> &'w [T] {
        slot.column().as_slice::<T>()
    }
}

unsafe impl<T: Component> Select for Write<T> {
    type Item<'w> = &'w mut T;
    type Raw<'w> = &'w mut [T];

    fn spec() -> SelectSpec {
        SelectSpec {
            type_id: TypeId::of::<T>(),
            type_name: type_name::<T>(),
            role: RolePattern::Plain,
            mutable: true,
        }
    }

    unsafe fn fetch<'w>(slot: &SlotCtx, row: usize) -> &'w mut T {
        &mut *(slot.column().ptr_at(row) as *mut T)
    }

    unsafe fn raw<'w>(slot: &SlotCtx) -> &'w mut [T] {
        slot.column().as_mut_slice::<T>()
    }
}

unsafe impl<T: Component> Select for Rel<T> {
    type Item<'w> = (&'w T, EntityId);
    type Raw<'w> = (&'w [T], EntityId);

    fn spec() -> SelectSpec {
        SelectSpec {
            type_id: TypeId::of::<T>(),
            type_name: type_name::<T>(),
            role: RolePattern::RelationAny,
            mutable: false,
        }
    }

    unsafe fn fetch<'w>(slot: &SlotCtx, row: usize) -> (&'w T, EntityId) {
        (
            &*(slot.column().ptr_at(row) as *const T),
            slot.target_entity(),
        )
    }

    unsafe fn raw<'w>(slot: &SlotCtx) -> (&'w [T], EntityId) {
        (slot.column().as_slice::<T>(), slot.target_entity())
    }
}

unsafe impl<T: Component> Select for RelMut<T> {
    type Item<'w> = (&'w mut T, EntityId);
    type Raw<'w> = (&'w mut [T], EntityId);

    fn spec() -> SelectSpec {
        SelectSpec {
            type_id: TypeId::of::<T>(),
            type_name: type_name::<T>(),
            role: RolePattern::RelationAny,
            mutable: true,
        }
    }

    unsafe fn fetch<'w>(slot: &SlotCtx, row: usize) -> (&'w mut T, EntityId) {
        (
            &mut *(slot.column().ptr_at(row) as *mut T),
            slot.target_entity(),
        )
    }

    unsafe fn raw<'w>(slot: &SlotCtx) -> (&'w mut [T], EntityId) {
        (slot.column().as_mut_slice::<T>(), slot.target_entity())
    }
}

unsafe impl<T: Component> Select for Obj<T> {
    type Item<'w> = &'w T;
    type Raw<'w> = &'w T;

    fn spec() -> SelectSpec {
        SelectSpec {
            type_id: TypeId::of::<T>(),
            type_name: type_name::<T>(),
            role: RolePattern::ObjectAny,
            mutable: false,
        }
    }

    unsafe fn fetch<'w>(slot: &SlotCtx, _row: usize) -> &'w T {
        debug_assert!(slot.shared.is_some());
        &*(slot.shared.unwrap_unchecked().as_ptr() as *const T)
    }

    unsafe fn raw<'w>(slot: &SlotCtx) -> &'w T {
        debug_assert!(slot.shared.is_some());
        &*(slot.shared.unwrap_unchecked().as_ptr() as *const T)
    }
}

/// A tuple of select slots forming one stream's descriptor
///
/// # Safety
/// `item`/`raw` index `slots` positionally; implementations must keep slot
/// order identical to `specs()` order.
pub unsafe trait StreamQuery: 'static {
    type Item<'w>;
    type Raw<'w>;

    const ARITY: usize;

    fn specs() -> SmallVec<[SelectSpec; MAX_SELECT]>;

    /// # Safety
    /// See [`Select::fetch`]; `slots` must be resolved in `specs()` order.
    unsafe fn item<'w>(slots: &[SlotCtx], row: usize) -> Self::Item<'w>;

    /// # Safety
    /// See [`Select::raw`].
    unsafe fn raw<'w>(slots: &[SlotCtx]) -> Self::Raw<'w>;
}

macro_rules! impl_stream_query {
    ($(($S:ident, $idx:tt)),+) => {
        unsafe impl<$($S: Select),+> StreamQuery for ($($S,)+) {
            type Item<'w> = ($($S::Item<'w>,)+);
            type Raw<'w> = ($($S::Raw<'w>,)+);

            const ARITY: usize = 0 $(+ { let _ = $idx; 1 })+;

            fn specs() -> SmallVec<[SelectSpec; MAX_SELECT]> {
                let mut out = SmallVec::new();
                $(out.push($S::spec());)+
                out
            }

            unsafe fn item<'w>(slots: &[SlotCtx], row: usize) -> Self::Item<'w> {
                ($($S::fetch(&slots[$idx], row),)+)
            }

            unsafe fn raw<'w>(slots: &[SlotCtx]) -> Self::Raw<'w> {
                ($($S::raw(&slots[$idx]),)+)
            }
        }
    };
}

impl_stream_query!((A, 0));
impl_stream_query!((A, 0), (B, 1));
impl_stream_query!((A, 0), (B, 1), (C, 2));
impl_stream_query!((A, 0), (B, 1), (C, 2), (D, 3));
impl_stream_query!((A, 0), (B, 1), (C, 2), (D, 3), (E, 4));
impl_stream_query!((A, 0), (B, 1), (C, 2), (D, 3), (E, 4), (F, 5));
impl_stream_query!((A, 0), (B, 1), (C, 2), (D, 3), (E, 4), (F, 5), (G, 6));
impl_stream_query!(
    (A, 0),
    (B, 1),
    (C, 2),
    (D, 3),
    (E, 4),
    (F, 5),
    (G, 6),
    (H, 7)
);

/// Signature-level archetype filter
#[derive(Debug, Clone)]
pub enum Filter {
    /// Signature bears at least one key matching the pattern
    Has(KeyPattern),
    /// Signature bears no key matching the pattern
    Not(KeyPattern),
    /// At least one of the patterns matches some key
    Any(SmallVec<[KeyPattern; 4]>),
    /// Every pattern matches some key
    All(SmallVec<[KeyPattern; 4]>),
}

impl Filter {
    fn passes(&self, state: &WorldState, arch: &Archetype) -> bool {
        let bears = |pattern: &KeyPattern| {
            arch.signature()
                .keys()
                .iter()
                .any(|&key| state.catalog.matches(key, pattern))
        };
        match self {
            Filter::Has(p) => bears(p),
            Filter::Not(p) => !bears(p),
            Filter::Any(ps) => ps.iter().any(bears),
            Filter::All(ps) => ps.iter().all(bears),
        }
    }
}

/// Fluent query descriptor builder; terminal operation is [`Self::compile`].
pub struct QueryBuilder<'w, S: StreamQuery> {
    world: &'w World,
    specs: SmallVec<[SelectSpec; MAX_SELECT]>,
    filters: Vec<Filter>,
    _marker: PhantomData<fn() -> S>,
}

impl<'w, S: StreamQuery> QueryBuilder<'w, S> {
    pub(crate) fn new(world: &'w World) -> Self {
        Self {
            world,
            specs: S::specs(),
            filters: Vec::new(),
            _marker: PhantomData,
        }
    }

    /// Require at least one key matching `pattern`.
    pub fn has(mut self, pattern: KeyPattern) -> Self {
        self.filters.push(Filter::Has(pattern));
        self
    }

    /// Exclude archetypes bearing a key matching `pattern`.
    pub fn not(mut self, pattern: KeyPattern) -> Self {
        self.filters.push(Filter::Not(pattern));
        self
    }

    /// Require at least one of `patterns` to match.
    pub fn any_of(mut self, patterns: impl IntoIterator<Item = KeyPattern>) -> Self {
        self.filters.push(Filter::Any(patterns.into_iter().collect()));
        self
    }

    /// Require every one of `patterns` to match.
    pub fn all_of(mut self, patterns: impl IntoIterator<Item = KeyPattern>) -> Self {
        self.filters.push(Filter::All(patterns.into_iter().collect()));
        self
    }

    /// Narrow the first unpinned `Rel<T>`/`RelMut<T>` slot to one specific
    /// target.
    ///
    /// Each call pins one slot, so successive calls pin successive wildcard
    /// slots of the same type; two relation selects of one type can then
    /// stream two targets independently.
    pub fn related_to<T: Component>(mut self, target: EntityId) -> Self {
        let slot = self.specs.iter_mut().find(|spec| {
            spec.type_id == TypeId::of::<T>() && spec.role == RolePattern::RelationAny
        });
        match slot {
            Some(spec) => spec.role = RolePattern::RelationTo(target),
            None => debug!(
                component = type_name::<T>(),
                "related_to found no unpinned relation slot"
            ),
        }
        self
    }

    /// Narrow the first unpinned `Obj<T>` slot to one specific shared
    /// object. Like [`Self::related_to`], each call pins one slot.
    pub fn object_is<T: Component>(mut self, handle: ObjectHandle<T>) -> Self {
        let slot = self.specs.iter_mut().find(|spec| {
            spec.type_id == TypeId::of::<T>() && spec.role == RolePattern::ObjectAny
        });
        match slot {
            Some(spec) => spec.role = RolePattern::ObjectIs(handle.id()),
            None => debug!(
                component = type_name::<T>(),
                "object_is found no unpinned object slot"
            ),
        }
        self
    }

    /// Resolve the descriptor into a stream.
    ///
    /// Fails with [`EcsError::AliasingConflict`] if two slots can resolve to
    /// one common column and either is mutable.
    pub fn compile(self) -> Result<Stream<S>> {
        for i in 0..self.specs.len() {
            for j in (i + 1)..self.specs.len() {
                let (a, b) = (&self.specs[i], &self.specs[j]);
                if (a.mutable || b.mutable) && a.overlaps(b) {
                    return Err(EcsError::AliasingConflict(a.type_name));
                }
            }
        }
        Ok(Stream {
            world_id: self.world.id(),
            specs: self.specs,
            filters: self.filters,
            cache: Mutex::new(MatchCache::default()),
            _marker: PhantomData,
        })
    }
}

/// One archetype admitted to a stream, with the matching columns per slot
#[derive(Debug, Clone)]
struct MatchedArchetype {
    archetype_id: usize,
    /// Per select slot: the column slots whose key matched
    candidates: SmallVec<[SmallVec<[usize; 2]>; MAX_SELECT]>,
}

#[derive(Default)]
struct MatchCache {
    seen_archetypes: usize,
    matches: Vec<MatchedArchetype>,
}

/// Compiled query bound to one world, ready for dispatch
pub struct Stream<S: StreamQuery> {
    world_id: u64,
    specs: SmallVec<[SelectSpec; MAX_SELECT]>,
    filters: Vec<Filter>,
    cache: Mutex<MatchCache>,
    _marker: PhantomData<fn() -> S>,
}

impl<S: StreamQuery> std::fmt::Debug for Stream<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stream")
            .field("world_id", &self.world_id)
            .field("specs", &self.specs)
            .field("filters", &self.filters)
            .finish()
    }
}

impl<S: StreamQuery> Stream<S> {
    fn check_world(&self, world: &World) {
        assert_eq!(
            self.world_id,
            world.id(),
            "stream executed against a different world"
        );
    }

    /// Admit archetypes created since the last execution, then return the
    /// matched set. Each archetype is tested exactly once per stream.
    fn matched(&self, state: &WorldState) -> Vec<MatchedArchetype> {
        let mut cache = self.cache.lock();
        let count = state.archetypes.len();
        if count > cache.seen_archetypes {
            for archetype_id in cache.seen_archetypes..count {
                if let Some(m) = self.match_archetype(state, archetype_id) {
                    cache.matches.push(m);
                }
            }
            cache.seen_archetypes = count;
        }
        cache.matches.clone()
    }

    fn match_archetype(&self, state: &WorldState, archetype_id: usize) -> Option<MatchedArchetype> {
        let arch = &state.archetypes[archetype_id];
        let mut candidates: SmallVec<[SmallVec<[usize; 2]>; MAX_SELECT]> = SmallVec::new();
        for spec in &self.specs {
            let columns: SmallVec<[usize; 2]> = arch
                .signature()
                .keys()
                .iter()
                .enumerate()
                .filter(|&(_, &key)| spec.matches_info(state.catalog.info(key)))
                .map(|(slot, _)| slot)
                .collect();
            if columns.is_empty() {
                return None;
            }
            candidates.push(columns);
        }
        if !self.filters.iter().all(|f| f.passes(state, arch)) {
            return None;
        }
        Some(MatchedArchetype {
            archetype_id,
            candidates,
        })
    }

    /// Visit every matched entity once per matching-column combination, in
    /// ascending row order within each archetype.
    pub fn for_each<F>(&self, world: &World, mut action: F)
    where
        F: FnMut(EntityCtx<'_>, S::Item<'_>),
    {
        self.check_world(world);
        let _lock = world.lock();
        // SAFETY: structural changes are deferred while the lock is held, so
        // archetypes and columns stay stable for the whole iteration.
        let state = unsafe { world.state_ref() };
        for m in self.matched(state) {
            let arch = &state.archetypes[m.archetype_id];
            let len = arch.len();
            if len == 0 {
                continue;
            }
            for_each_combo(&m.candidates, |combo| {
                let slots = build_slots(state, arch, &self.specs, combo);
                let entities = arch.entities();
                for row in 0..len {
                    // SAFETY: row in bounds; slots resolved from matching
                    // columns; compile() rejected mutable self-aliasing.
                    let item = unsafe { S::item(&slots, row) };
                    action(EntityCtx::new(entities[row], world), item);
                }
            });
        }
    }

    /// [`Self::for_each`] with a per-invocation uniform threaded by
    /// reference to every call.
    pub fn for_each_with<U, F>(&self, world: &World, uniform: U, mut action: F)
    where
        F: FnMut(EntityCtx<'_>, S::Item<'_>, &U),
    {
        self.check_world(world);
        let _lock = world.lock();
        // SAFETY: as in `for_each`.
        let state = unsafe { world.state_ref() };
        for m in self.matched(state) {
            let arch = &state.archetypes[m.archetype_id];
            let len = arch.len();
            if len == 0 {
                continue;
            }
            for_each_combo(&m.candidates, |combo| {
                let slots = build_slots(state, arch, &self.specs, combo);
                let entities = arch.entities();
                for row in 0..len {
                    // SAFETY: as in `for_each`.
                    let item = unsafe { S::item(&slots, row) };
                    action(EntityCtx::new(entities[row], world), item, &uniform);
                }
            });
        }
    }

    /// Parallel per-entity dispatch over the rayon pool, partitioned by
    /// archetype and contiguous row ranges. Actions must be row-local: they
    /// see one row's references and the deferral surface, nothing else.
    ///
    /// No ordering is guaranteed across rows.
    #[cfg(feature = "parallel")]
    pub fn job<F>(&self, world: &World, action: F)
    where
        F: Fn(EntityCtx<'_>, S::Item<'_>) + Send + Sync,
    {
        use rayon::prelude::*;

        self.check_world(world);
        let _lock = world.lock();
        // SAFETY: as in `for_each`; workers only touch disjoint rows.
        let state = unsafe { world.state_ref() };
        let matches = self.matched(state);
        matches.into_par_iter().for_each(|m| {
            // SAFETY: the lock outlives the parallel scope.
            let state = unsafe { world.state_ref() };
            let arch = &state.archetypes[m.archetype_id];
            let len = arch.len();
            if len == 0 {
                return;
            }
            for_each_combo(&m.candidates, |combo| {
                let ranges: Vec<(usize, usize)> = (0..len)
                    .step_by(DEFAULT_CHUNK_SIZE)
                    .map(|start| (start, (start + DEFAULT_CHUNK_SIZE).min(len)))
                    .collect();
                ranges.into_par_iter().for_each(|(start, end)| {
                    // SAFETY: as above; ranges are disjoint.
                    let state = unsafe { world.state_ref() };
                    let arch = &state.archetypes[m.archetype_id];
                    let slots = build_slots(state, arch, &self.specs, combo);
                    let entities = arch.entities();
                    for row in start..end {
                        // SAFETY: as in `for_each`.
                        let item = unsafe { S::item(&slots, row) };
                        action(EntityCtx::new(entities[row], world), item);
                    }
                });
            });
        });
    }

    /// [`Self::job`] with a uniform.
    #[cfg(feature = "parallel")]
    pub fn job_with<U, F>(&self, world: &World, uniform: U, action: F)
    where
        U: Sync,
        F: Fn(EntityCtx<'_>, S::Item<'_>, &U) + Send + Sync,
    {
        use rayon::prelude::*;

        self.check_world(world);
        let _lock = world.lock();
        // SAFETY: as in `for_each`; workers only touch disjoint rows.
        let state = unsafe { world.state_ref() };
        let matches = self.matched(state);
        matches.into_par_iter().for_each(|m| {
            // SAFETY: the lock outlives the parallel scope.
            let state = unsafe { world.state_ref() };
            let arch = &state.archetypes[m.archetype_id];
            let len = arch.len();
            if len == 0 {
                return;
            }
            for_each_combo(&m.candidates, |combo| {
                let ranges: Vec<(usize, usize)> = (0..len)
                    .step_by(DEFAULT_CHUNK_SIZE)
                    .map(|start| (start, (start + DEFAULT_CHUNK_SIZE).min(len)))
                    .collect();
                ranges.into_par_iter().for_each(|(start, end)| {
                    // SAFETY: as above; ranges are disjoint.
                    let state = unsafe { world.state_ref() };
                    let arch = &state.archetypes[m.archetype_id];
                    let slots = build_slots(state, arch, &self.specs, combo);
                    let entities = arch.entities();
                    for row in start..end {
                        // SAFETY: as in `for_each`.
                        let item = unsafe { S::item(&slots, row) };
                        action(EntityCtx::new(entities[row], world), item, &uniform);
                    }
                });
            });
        });
    }

    /// Per-archetype dispatch: one contiguous view per selected key, once
    /// per matching-column combination.
    pub fn raw<F>(&self, world: &World, mut action: F)
    where
        F: FnMut(&[EntityId], S::Raw<'_>),
    {
        self.check_world(world);
        let _lock = world.lock();
        // SAFETY: as in `for_each`.
        let state = unsafe { world.state_ref() };
        for m in self.matched(state) {
            let arch = &state.archetypes[m.archetype_id];
            if arch.is_empty() {
                continue;
            }
            for_each_combo(&m.candidates, |combo| {
                let slots = build_slots(state, arch, &self.specs, combo);
                // SAFETY: as in `for_each`.
                let views = unsafe { S::raw(&slots) };
                action(arch.entities(), views);
            });
        }
    }

    /// [`Self::raw`] with a uniform.
    pub fn raw_with<U, F>(&self, world: &World, uniform: U, mut action: F)
    where
        F: FnMut(&[EntityId], S::Raw<'_>, &U),
    {
        self.check_world(world);
        let _lock = world.lock();
        // SAFETY: as in `for_each`.
        let state = unsafe { world.state_ref() };
        for m in self.matched(state) {
            let arch = &state.archetypes[m.archetype_id];
            if arch.is_empty() {
                continue;
            }
            for_each_combo(&m.candidates, |combo| {
                let slots = build_slots(state, arch, &self.specs, combo);
                // SAFETY: as in `for_each`.
                let views = unsafe { S::raw(&slots) };
                action(arch.entities(), views, &uniform);
            });
        }
    }

    /// Bulk-overwrite every matched column selected as `Write<T>` with a
    /// clone of `value`. Relation and object selects are not blit targets,
    /// even when mutable.
    pub fn blit<T: Component + Clone>(&self, world: &World, value: T) -> Result<()> {
        self.check_world(world);
        let slot = self
            .specs
            .iter()
            .position(|s| {
                s.type_id == TypeId::of::<T>() && s.mutable && s.role == RolePattern::Plain
            })
            .ok_or(EcsError::ComponentNotFound)?;
        let _lock = world.lock();
        // SAFETY: as in `for_each`.
        let state = unsafe { world.state_ref() };
        for m in self.matched(state) {
            let arch = &state.archetypes[m.archetype_id];
            if arch.is_empty() {
                continue;
            }
            for &column in &m.candidates[slot] {
                // SAFETY: the slot is the unique mutable selector of this
                // column (enforced at compile), and T matched its key.
                let values = unsafe { (*arch.column_ptr(column).as_ptr()).as_mut_slice::<T>() };
                for v in values {
                    *v = value.clone();
                }
            }
        }
        Ok(())
    }

    /// Number of entities currently matched (combinations not multiplied).
    pub fn count(&self, world: &World) -> usize {
        self.check_world(world);
        let _lock = world.lock();
        // SAFETY: as in `for_each`.
        let state = unsafe { world.state_ref() };
        self.matched(state)
            .iter()
            .map(|m| state.archetypes[m.archetype_id].len())
            .sum()
    }
}

/// Resolve one (slot, column) pairing per select slot for `combo`.
fn build_slots(
    state: &WorldState,
    arch: &Archetype,
    specs: &[SelectSpec],
    combo: &[usize],
) -> SmallVec<[SlotCtx; MAX_SELECT]> {
    specs
        .iter()
        .zip(combo)
        .map(|(spec, &column_slot)| {
            let key = arch.signature().keys()[column_slot];
            let info = state.catalog.info(key);
            let shared = match info.target {
                KeyTarget::Object(object) => Some(
                    state
                        .objects
                        .value_ptr(object, spec.type_id)
                        .expect("object-link key refers to a registered object"),
                ),
                _ => None,
            };
            SlotCtx {
                column: arch.column_ptr(column_slot),
                shared,
                target: info.target,
            }
        })
        .collect()
}

/// Odometer over the per-slot candidate columns: invokes `f` with every
/// combination, one column choice per slot.
fn for_each_combo(candidates: &[SmallVec<[usize; 2]>], mut f: impl FnMut(&[usize])) {
    let n = candidates.len();
    debug_assert!(n > 0);
    let mut choice: SmallVec<[usize; MAX_SELECT]> = smallvec![0; n];
    let mut combo: SmallVec<[usize; MAX_SELECT]> = smallvec![0; n];
    loop {
        for i in 0..n {
            combo[i] = candidates[i][choice[i]];
        }
        f(&combo);
        let mut i = 0;
        loop {
            if i == n {
                return;
            }
            choice[i] += 1;
            if choice[i] < candidates[i].len() {
                break;
            }
            choice[i] = 0;
            i += 1;
        }
    }
}
