//! # Archetype-based Entity Storage
//!
//! Entities with the same component set are stored together, one column per
//! component:
//!
//! ```text
//! Archetype (Position + Velocity):
//!   entities:   [E4, E9, E1, ...]
//!   Position[]: [P4, P9, P1, ...]   dirty: 0b...101
//!   Velocity[]: [V4, V9, V1, ...]   dirty: 0b...001
//! ```
//!
//! Two kinds share one contract:
//!
//! - [`StaticArchetype`]: declared when the World is built, typed `Vec` columns.
//! - [`RuntimeArchetype`]: created on demand from an [`ArchetypeDescriptor`],
//!   erased byte columns.
//!
//! Rows are dense. Removal swaps the last row into the vacated slot, carrying
//! its dirty bits along.

// SAFETY: The erased storage contract moves values through raw pointers.
// Implementations uphold the ownership rules documented on each method.
#![allow(unsafe_code)]

mod runtime_archetype;
mod static_archetype;

use std::any::Any;
use std::ptr;

pub use runtime_archetype::RuntimeArchetype;
pub use static_archetype::StaticArchetype;

use super::component::{Component, ComponentId, ComponentInfo};
use super::dirty::DirtyBits;
use super::entity::Entity;
use super::multi_vec::ComponentTuple;
use super::typeset;

/// Whether an archetype was declared with the World or created at runtime.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ArchetypeKind {
    /// Declared through [`WorldBuilder::archetype`](crate::WorldBuilder::archetype).
    Static,
    /// Created by `new_archetype`, `add_archetype` or a migration.
    Runtime,
}

/// Ordered list of component descriptors: the schema of an archetype.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ArchetypeDescriptor {
    components: Vec<ComponentInfo>,
}

impl ArchetypeDescriptor {
    /// Creates an empty descriptor.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            components: Vec::new(),
        }
    }

    /// Descriptor of the tuple `T`, in declared order.
    #[must_use]
    pub fn of<T: ComponentTuple>() -> Self {
        Self {
            components: T::component_infos(),
        }
    }

    /// Appends component `C`.
    #[must_use]
    pub fn with<C: Component>(mut self) -> Self {
        self.components.push(ComponentInfo::of::<C>());
        self
    }

    /// Appends a descriptor.
    pub fn push(&mut self, info: ComponentInfo) {
        self.components.push(info);
    }

    /// Component descriptors in declared order.
    #[inline]
    #[must_use]
    pub fn components(&self) -> &[ComponentInfo] {
        &self.components
    }

    /// Component ids in declared order.
    #[must_use]
    pub fn ids(&self) -> Vec<ComponentId> {
        self.components.iter().map(ComponentInfo::id).collect()
    }

    /// Number of components.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.components.len()
    }

    /// Checks if empty.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    /// These components followed by those of `extra` not already present.
    #[must_use]
    pub fn extend(&self, extra: &[ComponentInfo]) -> Self {
        Self {
            components: typeset::union(&self.components, extra),
        }
    }

    /// These components minus `removed`, order kept.
    #[must_use]
    pub fn without(&self, removed: &[ComponentId]) -> Self {
        Self {
            components: self
                .components
                .iter()
                .filter(|info| !removed.contains(&info.id()))
                .copied()
                .collect(),
        }
    }

    /// First component listed twice, if any.
    #[must_use]
    pub fn first_duplicate(&self) -> Option<&ComponentInfo> {
        typeset::first_duplicate(&self.components)
    }
}

impl FromIterator<ComponentInfo> for ArchetypeDescriptor {
    fn from_iter<I: IntoIterator<Item = ComponentInfo>>(iter: I) -> Self {
        Self {
            components: iter.into_iter().collect(),
        }
    }
}

/// Erased storage shared by static and runtime archetypes.
///
/// The World only talks to archetypes through this trait, so both kinds live
/// in one list and every placement, migration and query path is written once.
pub(crate) trait ArchetypeStorage: Any {
    /// Static or runtime.
    fn kind(&self) -> ArchetypeKind;

    /// Declared schema.
    fn descriptor(&self) -> &ArchetypeDescriptor;

    /// Component ids in declared order.
    fn ids(&self) -> &[ComponentId];

    /// Owner of every row.
    fn entities(&self) -> &[Entity];

    /// Base pointer of column `column`.
    fn column_ptr(&self, column: usize) -> Option<*const u8>;

    /// Mutable base pointer of column `column`.
    fn column_ptr_mut(&mut self, column: usize) -> Option<*mut u8>;

    /// Dirty bits of column `column`.
    fn dirty(&self, column: usize) -> &DirtyBits;

    /// Mutable dirty bits of column `column`.
    fn dirty_mut(&mut self, column: usize) -> &mut DirtyBits;

    /// Makes room for one more row.
    fn reserve_row(&mut self) -> crate::EcsResult<()>;

    /// Appends a row owned by `entity`, moving one value per column out of
    /// `src` (declared order). The row starts fully dirty.
    ///
    /// # Safety
    ///
    /// `src[i]` points to an initialized value of column `i`'s type; ownership
    /// moves into the archetype. [`ArchetypeStorage::reserve_row`] must have
    /// succeeded since the last push.
    unsafe fn push_moved(&mut self, entity: Entity, src: &[*mut u8]) -> usize;

    /// Drops every value of `row` and moves the values of `src` in. The row
    /// becomes fully dirty.
    ///
    /// # Safety
    ///
    /// As [`ArchetypeStorage::push_moved`], and `row < len`.
    unsafe fn replace_moved(&mut self, row: usize, src: &[*mut u8]);

    /// Drops `row` and swap-removes it. Returns the entity moved into `row`.
    fn swap_remove(&mut self, row: usize) -> Option<Entity>;

    /// Swap-removes `row` without dropping its values. Returns the entity
    /// moved into `row`.
    ///
    /// # Safety
    ///
    /// Every value of `row` has been moved out or dropped already.
    unsafe fn forget_swap_remove(&mut self, row: usize) -> Option<Entity>;

    /// Upcast for typed access.
    fn as_any(&self) -> &dyn Any;

    /// Upcast for typed access.
    fn as_any_mut(&mut self) -> &mut dyn Any;

    /// Row count.
    fn len(&self) -> usize {
        self.entities().len()
    }

    /// Position of component `id`.
    fn column_index(&self, id: ComponentId) -> Option<usize> {
        typeset::position(self.ids(), &id)
    }

    /// Pointer to the value of `column` at `row`.
    fn cell_ptr_mut(&mut self, column: usize, row: usize) -> Option<*mut u8> {
        let size = self.descriptor().components().get(column)?.size();
        Some(self.column_ptr_mut(column)?.wrapping_add(row * size))
    }

    /// Drops the value of `column` at `row` in place.
    ///
    /// # Safety
    ///
    /// `row < len`; the slot must be refilled or forgotten before reuse.
    unsafe fn drop_cell(&mut self, column: usize, row: usize) {
        let Some(info) = self.descriptor().components().get(column).copied() else {
            return;
        };
        if let Some(ptr) = self.cell_ptr_mut(column, row) {
            // SAFETY: Forwarded from the caller.
            unsafe { info.drop_in_place(ptr) };
        }
    }

    /// Replaces one value in place and marks it dirty.
    ///
    /// # Safety
    ///
    /// `row < len`; `src` points to an initialized value of the column's type
    /// whose ownership moves into the archetype.
    unsafe fn replace_cell_moved(&mut self, column: usize, row: usize, src: *mut u8) {
        let Some(info) = self.descriptor().components().get(column).copied() else {
            return;
        };
        if let Some(dst) = self.cell_ptr_mut(column, row) {
            // SAFETY: `dst` is initialized; it is dropped, then overwritten.
            unsafe {
                info.drop_in_place(dst);
                ptr::copy_nonoverlapping(src.cast_const(), dst, info.size());
            }
            self.dirty_mut(column).set(row, true);
        }
    }

    /// Sets or clears the dirty bit of every column at `row`.
    fn mark_row(&mut self, row: usize, dirty: bool) {
        for column in 0..self.ids().len() {
            self.dirty_mut(column).set(row, dirty);
        }
    }
}
