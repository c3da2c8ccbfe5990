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

//! Archetype storage: structure-of-arrays columns with swap-remove rows
//!
//! Each archetype holds every entity sharing one exact signature. Columns
//! are type-erased raw buffers, one per signature key, all row-aligned with
//! the `entities` column. Object-link columns are zero width (the value is
//! shared) but keep row accounting so the alignment invariant holds for
//! every column.

use std::alloc::{alloc, dealloc, handle_alloc_error, realloc, Layout};
use std::ptr::{self, NonNull};

use rustc_hash::FxHashMap;

use crate::entity::EntityId;
use crate::key::{KeyCatalog, KeyId, KeyInfo, Signature};

/// Minimum row count a parallel job assigns to one worker task
pub const DEFAULT_CHUNK_SIZE: usize = 1024;

/// Type-erased component column
///
/// The buffer honors the element type's alignment (captured in the key
/// catalog at intern time) and grows geometrically. Rows are removed by
/// swapping the last row in, which keeps the column dense.
pub struct RawStorage {
    ptr: NonNull<u8>,
    cap: usize,
    len: usize,
    item_size: usize,
    item_align: usize,
    drop_fn: Option<unsafe fn(*mut u8)>,
    type_name: &'static str,
}

// SAFETY: every value stored here is `Send + Sync` (enforced by the
// `Component` bound on the intern path that produced the layout).
unsafe impl Send for RawStorage {}
unsafe impl Sync for RawStorage {}

impl RawStorage {
    pub fn for_key(info: &KeyInfo) -> Self {
        Self {
            // Aligned dangling pointer; zero-size columns never allocate
            ptr: unsafe { NonNull::new_unchecked(info.item_align as *mut u8) },
            cap: if info.item_size == 0 { usize::MAX } else { 0 },
            len: 0,
            item_size: info.item_size,
            item_align: info.item_align,
            drop_fn: info.drop_fn,
            type_name: info.type_name,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn item_size(&self) -> usize {
        self.item_size
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    fn grow(&mut self) {
        debug_assert!(self.item_size > 0);
        let new_cap = (self.cap * 2).max(4);
        let new_layout = Layout::from_size_align(new_cap * self.item_size, self.item_align)
            .expect("column layout overflow");
        let new_ptr = if self.cap == 0 {
            unsafe { alloc(new_layout) }
        } else {
            let old_layout =
                Layout::from_size_align(self.cap * self.item_size, self.item_align).unwrap();
            unsafe { realloc(self.ptr.as_ptr(), old_layout, new_layout.size()) }
        };
        let Some(new_ptr) = NonNull::new(new_ptr) else {
            handle_alloc_error(new_layout);
        };
        self.ptr = new_ptr;
        self.cap = new_cap;
    }

    pub fn reserve(&mut self, additional: usize) {
        if self.item_size == 0 {
            return;
        }
        while self.cap - self.len < additional {
            self.grow();
        }
    }

    /// Raw address of `row`'s value.
    ///
    /// # Safety
    /// `row < self.len()` (one-past-the-end only via the push paths).
    pub unsafe fn ptr_at(&self, row: usize) -> *mut u8 {
        self.ptr.as_ptr().add(row * self.item_size)
    }

    /// Append `value` as a new row.
    ///
    /// # Safety
    /// `T` must be the column's element type.
    pub unsafe fn push<T>(&mut self, value: T) {
        debug_assert_eq!(std::mem::size_of::<T>(), self.item_size);
        if self.len == self.cap {
            self.grow();
        }
        ptr::write(self.ptr_at(self.len) as *mut T, value);
        self.len += 1;
    }

    /// Append a row copied bytewise from `src`.
    ///
    /// # Safety
    /// `src` must point at a valid value of the column's element type; the
    /// source must not be dropped afterwards (ownership moves here).
    pub unsafe fn push_raw(&mut self, src: *const u8) {
        if self.item_size == 0 {
            self.len += 1;
            return;
        }
        if self.len == self.cap {
            self.grow();
        }
        ptr::copy_nonoverlapping(src, self.ptr_at(self.len), self.item_size);
        self.len += 1;
    }

    /// Append a row to a zero-width column.
    pub fn push_empty(&mut self) {
        debug_assert_eq!(self.item_size, 0, "push_empty on a sized column");
        self.len += 1;
    }

    /// Drop the value at `row` and write `value` in its place.
    ///
    /// # Safety
    /// `row < len`; `T` must be the column's element type.
    pub unsafe fn replace<T>(&mut self, row: usize, value: T) {
        debug_assert!(row < self.len);
        let slot = self.ptr_at(row);
        if let Some(drop_fn) = self.drop_fn {
            drop_fn(slot);
        }
        ptr::write(slot as *mut T, value);
    }

    /// Drop the value at `row` and move the last row into the gap.
    ///
    /// # Safety
    /// `row < len`.
    pub unsafe fn swap_remove(&mut self, row: usize) {
        debug_assert!(row < self.len);
        if let Some(drop_fn) = self.drop_fn {
            drop_fn(self.ptr_at(row));
        }
        self.close_gap(row);
    }

    /// Move the value at `row` to the end of `dst`, then close the gap.
    ///
    /// # Safety
    /// `row < len`; `dst` must have the same element layout.
    pub unsafe fn swap_remove_into(&mut self, row: usize, dst: &mut RawStorage) {
        debug_assert!(row < self.len);
        debug_assert_eq!(self.item_size, dst.item_size);
        dst.push_raw(self.ptr_at(row));
        self.close_gap(row);
    }

    unsafe fn close_gap(&mut self, row: usize) {
        let last = self.len - 1;
        if row != last && self.item_size > 0 {
            ptr::copy_nonoverlapping(self.ptr_at(last), self.ptr_at(row), self.item_size);
        }
        self.len = last;
    }

    /// View the column as a typed slice.
    ///
    /// # Safety
    /// `T` must be the element type; the caller chooses the lifetime and is
    /// responsible for aliasing.
    pub unsafe fn as_slice<'a, T>(&self) -> &'a [T] {
        debug_assert_eq!(std::mem::size_of::<T>(), self.item_size);
        std::slice::from_raw_parts(self.ptr.as_ptr() as *const T, self.len)
    }

    /// Mutable variant of [`Self::as_slice`].
    ///
    /// # Safety
    /// As `as_slice`, plus the caller must guarantee exclusive access.
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn as_mut_slice<'a, T>(&self) -> &'a mut [T] {
        debug_assert_eq!(std::mem::size_of::<T>(), self.item_size);
        std::slice::from_raw_parts_mut(self.ptr.as_ptr() as *mut T, self.len)
    }
}

impl Drop for RawStorage {
    fn drop(&mut self) {
        if let Some(drop_fn) = self.drop_fn {
            for row in 0..self.len {
                unsafe { drop_fn(self.ptr_at(row)) };
            }
        }
        if self.item_size > 0 && self.cap > 0 {
            let layout =
                Layout::from_size_align(self.cap * self.item_size, self.item_align).unwrap();
            unsafe { dealloc(self.ptr.as_ptr(), layout) };
        }
    }
}

/// Archetype: all entities sharing one exact signature, stored column-wise
pub struct Archetype {
    signature: Signature,
    entities: Vec<EntityId>,
    /// Parallel to `signature.keys()`
    columns: Vec<RawStorage>,
    column_index: FxHashMap<KeyId, usize>,
}

impl Archetype {
    pub fn new(signature: Signature, catalog: &KeyCatalog) -> Self {
        let columns: Vec<RawStorage> = signature
            .keys()
            .iter()
            .map(|&key| RawStorage::for_key(catalog.info(key)))
            .collect();
        let column_index = signature
            .keys()
            .iter()
            .enumerate()
            .map(|(slot, &key)| (key, slot))
            .collect();
        Self {
            signature,
            entities: Vec::new(),
            columns,
            column_index,
        }
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn entities(&self) -> &[EntityId] {
        &self.entities
    }

    pub fn has_key(&self, key: KeyId) -> bool {
        self.column_index.contains_key(&key)
    }

    pub fn column_slot(&self, key: KeyId) -> Option<usize> {
        self.column_index.get(&key).copied()
    }

    pub fn column(&self, key: KeyId) -> Option<&RawStorage> {
        self.column_slot(key).map(|slot| &self.columns[slot])
    }

    pub fn column_mut(&mut self, key: KeyId) -> Option<&mut RawStorage> {
        let slot = self.column_slot(key)?;
        Some(&mut self.columns[slot])
    }

    pub fn column_by_slot(&self, slot: usize) -> &RawStorage {
        &self.columns[slot]
    }

    /// Pointer to a column for iteration through shared world access.
    pub(crate) fn column_ptr(&self, slot: usize) -> NonNull<RawStorage> {
        NonNull::from(&self.columns[slot])
    }

    /// Append a row for `entity`; component columns are filled by the caller.
    pub fn allocate_row(&mut self, entity: EntityId) -> usize {
        let row = self.entities.len();
        self.entities.push(entity);
        row
    }

    pub fn reserve_rows(&mut self, additional: usize) {
        self.entities.reserve(additional);
        for column in &mut self.columns {
            column.reserve(additional);
        }
    }

    /// Remove `row` from every column, dropping its values, and return the
    /// entity swapped into its place (if any).
    ///
    /// # Safety
    /// `row` must be a valid row index and all columns row-aligned.
    pub unsafe fn swap_remove_row(&mut self, row: usize) -> Option<EntityId> {
        for column in &mut self.columns {
            column.swap_remove(row);
        }
        self.entities.swap_remove(row);
        if row < self.entities.len() {
            Some(self.entities[row])
        } else {
            None
        }
    }

    /// Relocate `row` into `dst`: shared columns move their values, columns
    /// absent from `dst` drop them. Columns only present in `dst` must be
    /// filled by the caller to restore row alignment.
    ///
    /// Returns the destination row and the entity swapped into the vacated
    /// source row (if any).
    pub(crate) fn move_row_to(&mut self, row: usize, dst: &mut Archetype) -> (usize, Option<EntityId>) {
        debug_assert!(row < self.entities.len());
        let entity = self.entities[row];
        let new_row = dst.entities.len();
        dst.entities.push(entity);

        for slot in 0..self.columns.len() {
            let key = self.signature.keys()[slot];
            let column = &mut self.columns[slot];
            match dst.column_index.get(&key) {
                Some(&dst_slot) => unsafe {
                    column.swap_remove_into(row, &mut dst.columns[dst_slot]);
                },
                None => unsafe {
                    column.swap_remove(row);
                },
            }
        }

        self.entities.swap_remove(row);
        let swapped = if row < self.entities.len() {
            Some(self.entities[row])
        } else {
            None
        };
        (new_row, swapped)
    }

    /// Row-alignment invariant: every column is as long as `entities`.
    pub(crate) fn assert_row_coherent(&self) {
        if cfg!(debug_assertions) {
            for column in &self.columns {
                debug_assert_eq!(
                    column.len(),
                    self.entities.len(),
                    "column `{}` out of alignment",
                    column.type_name()
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::{KeyCatalog, KeyTarget};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct Tally(Arc<AtomicUsize>);

    impl Drop for Tally {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn single_key_archetype<T: crate::component::Component>(
        catalog: &mut KeyCatalog,
    ) -> (Archetype, crate::key::KeyId) {
        let key = catalog.intern::<T>(KeyTarget::None);
        let signature = catalog.signature_from([key]);
        (Archetype::new(signature, catalog), key)
    }

    #[test]
    fn swap_remove_is_dense_and_reports_the_swapped_entity() {
        let mut catalog = KeyCatalog::new();
        let (mut arch, key) = single_key_archetype::<u64>(&mut catalog);

        for i in 0..3u64 {
            let row = arch.allocate_row(EntityId::new(i as u32, 0));
            assert_eq!(row, i as usize);
            unsafe { arch.column_mut(key).unwrap().push(i * 10) };
        }
        arch.assert_row_coherent();

        let swapped = unsafe { arch.swap_remove_row(0) };
        assert_eq!(swapped, Some(EntityId::new(2, 0)));
        assert_eq!(arch.len(), 2);
        let values: &[u64] = unsafe { arch.column(key).unwrap().as_slice() };
        assert_eq!(values, &[20, 10]);

        let swapped = unsafe { arch.swap_remove_row(1) };
        assert_eq!(swapped, None);
        assert_eq!(arch.len(), 1);
    }

    #[test]
    fn removed_rows_drop_their_values() {
        let drops = Arc::new(AtomicUsize::new(0));
        let mut catalog = KeyCatalog::new();
        let (mut arch, key) = single_key_archetype::<Tally>(&mut catalog);

        for i in 0..2 {
            arch.allocate_row(EntityId::new(i, 0));
            unsafe { arch.column_mut(key).unwrap().push(Tally(drops.clone())) };
        }
        unsafe { arch.swap_remove_row(0) };
        assert_eq!(drops.load(Ordering::SeqCst), 1);

        drop(arch);
        assert_eq!(drops.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn move_row_transfers_shared_columns_and_drops_the_rest() {
        let drops = Arc::new(AtomicUsize::new(0));
        let mut catalog = KeyCatalog::new();
        let keep = catalog.intern::<u32>(KeyTarget::None);
        let lose = catalog.intern::<Tally>(KeyTarget::None);

        let mut src = Archetype::new(catalog.signature_from([keep, lose]), &catalog);
        let mut dst = Archetype::new(catalog.signature_from([keep]), &catalog);

        src.allocate_row(EntityId::new(0, 0));
        unsafe {
            src.column_mut(keep).unwrap().push(7u32);
            src.column_mut(lose).unwrap().push(Tally(drops.clone()));
        }

        let (new_row, swapped) = src.move_row_to(0, &mut dst);
        assert_eq!((new_row, swapped), (0, None));
        assert_eq!(src.len(), 0);
        assert_eq!(dst.len(), 1);
        assert_eq!(drops.load(Ordering::SeqCst), 1);
        let values: &[u32] = unsafe { dst.column(keep).unwrap().as_slice() };
        assert_eq!(values, &[7]);
        dst.assert_row_coherent();
    }

    #[test]
    fn zero_width_columns_keep_row_accounting() {
        struct Tag;
        let mut catalog = KeyCatalog::new();
        let (mut arch, key) = single_key_archetype::<Tag>(&mut catalog);

        for i in 0..4 {
            arch.allocate_row(EntityId::new(i, 0));
            arch.column_mut(key).unwrap().push_empty();
        }
        arch.assert_row_coherent();
        unsafe { arch.swap_remove_row(1) };
        assert_eq!(arch.column(key).unwrap().len(), 3);
    }
}
