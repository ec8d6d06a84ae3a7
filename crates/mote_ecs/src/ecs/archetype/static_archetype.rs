//! Static archetypes: the component list is a tuple type fixed when the World
//! is built, so columns are plain typed `Vec`s.

// SAFETY: Raw row moves forward the contracts of `MultiVec`.
#![allow(unsafe_code)]

use std::any::Any;

use super::{ArchetypeDescriptor, ArchetypeKind, ArchetypeStorage};
use crate::ecs::component::{Component, ComponentId};
use crate::ecs::dirty::DirtyBits;
use crate::ecs::entity::Entity;
use crate::ecs::multi_vec::{ComponentTuple, MultiVec};
use crate::error::{EcsError, EcsResult};

/// Archetype whose column set is the tuple `T`.
pub struct StaticArchetype<T: ComponentTuple> {
    rows: MultiVec<T>,
    descriptor: ArchetypeDescriptor,
    entities: Vec<Entity>,
    dirty: Vec<DirtyBits>,
}

impl<T: ComponentTuple> StaticArchetype<T> {
    /// Creates an empty archetype with room for `capacity` rows.
    pub(crate) fn with_capacity(capacity: usize) -> EcsResult<Self> {
        let rows = MultiVec::with_capacity(capacity)?;
        let descriptor = rows.infos().iter().copied().collect();
        Ok(Self {
            dirty: vec![DirtyBits::new(); T::LEN],
            entities: Vec::with_capacity(rows.capacity()),
            descriptor,
            rows,
        })
    }

    /// Number of rows.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Checks if empty.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Rows that fit before the next growth.
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.rows.capacity()
    }

    /// Owner of every row.
    #[inline]
    #[must_use]
    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }

    /// Declared schema.
    #[inline]
    #[must_use]
    pub fn descriptor(&self) -> &ArchetypeDescriptor {
        &self.descriptor
    }

    /// Component `C` of `row`.
    #[inline]
    #[must_use]
    pub fn get<C: Component>(&self, row: usize) -> Option<&C> {
        self.rows.get(row)
    }

    /// Mutable component `C` of `row`. Does not touch dirty bits.
    #[inline]
    pub fn get_mut<C: Component>(&mut self, row: usize) -> Option<&mut C> {
        self.rows.get_mut(row)
    }

    /// The whole column of `C`.
    #[inline]
    #[must_use]
    pub fn column<C: Component>(&self) -> Option<&[C]> {
        self.rows.column()
    }

    /// The whole column of `C`, mutably. Does not touch dirty bits.
    #[inline]
    pub fn column_mut<C: Component>(&mut self) -> Option<&mut [C]> {
        self.rows.column_mut()
    }

    /// Dirty bits of the column of `C`.
    #[must_use]
    pub fn dirty_bits<C: Component>(&self) -> Option<&DirtyBits> {
        let column = self.rows.column_index(ComponentId::of::<C>())?;
        self.dirty.get(column)
    }

    /// Checks the dirty bit of `C` at `row`.
    #[must_use]
    pub fn is_dirty<C: Component>(&self, row: usize) -> bool {
        self.dirty_bits::<C>().is_some_and(|bits| bits.get(row))
    }

    /// Sets or clears the dirty bit of `C` at `row`. Returns `false` if the
    /// archetype has no `C` column.
    pub fn mark_dirty<C: Component>(&mut self, row: usize, dirty: bool) -> bool {
        self.mark_dirty_range::<C>(row, row + 1, dirty)
    }

    /// Sets or clears the dirty bits of `C` for `start..end`. Returns `false`
    /// if the archetype has no `C` column.
    pub fn mark_dirty_range<C: Component>(&mut self, start: usize, end: usize, dirty: bool) -> bool {
        let Some(column) = self.rows.column_index(ComponentId::of::<C>()) else {
            return false;
        };
        self.dirty[column].set_range(start, end, dirty);
        true
    }

    /// Appends a row owned by `entity`, fully dirty.
    pub(crate) fn new_entity(&mut self, entity: Entity, values: T) -> EcsResult<usize> {
        self.reserve_row()?;
        let row = self.rows.push(values)?;
        self.push_bookkeeping(entity);
        Ok(row)
    }

    /// Replaces the values of `row` and marks it dirty.
    pub(crate) fn emplace_at(&mut self, row: usize, values: T) {
        self.rows.set(row, values);
        self.mark_row(row, true);
    }

    /// Drops `row` and swap-removes it. Returns the entity moved into `row`.
    pub(crate) fn remove(&mut self, row: usize) -> Option<Entity> {
        let _ = self.rows.swap_remove(row);
        self.remove_bookkeeping(row)
    }

    fn push_bookkeeping(&mut self, entity: Entity) {
        self.entities.push(entity);
        for bits in &mut self.dirty {
            bits.push_row(true);
        }
    }

    fn remove_bookkeeping(&mut self, row: usize) -> Option<Entity> {
        for bits in &mut self.dirty {
            bits.swap_remove(row);
        }
        self.entities.swap_remove(row);
        self.entities.get(row).copied()
    }
}

impl<T: ComponentTuple> ArchetypeStorage for StaticArchetype<T> {
    fn kind(&self) -> ArchetypeKind {
        ArchetypeKind::Static
    }

    fn descriptor(&self) -> &ArchetypeDescriptor {
        &self.descriptor
    }

    fn ids(&self) -> &[ComponentId] {
        self.rows.ids()
    }

    fn entities(&self) -> &[Entity] {
        &self.entities
    }

    fn column_ptr(&self, column: usize) -> Option<*const u8> {
        self.rows.column_ptr_at(column)
    }

    fn column_ptr_mut(&mut self, column: usize) -> Option<*mut u8> {
        self.rows.column_ptr_at_mut(column)
    }

    fn dirty(&self, column: usize) -> &DirtyBits {
        &self.dirty[column]
    }

    fn dirty_mut(&mut self, column: usize) -> &mut DirtyBits {
        &mut self.dirty[column]
    }

    fn reserve_row(&mut self) -> EcsResult<()> {
        self.rows.grow_if_full()?;
        for bits in &mut self.dirty {
            bits.reserve_row()?;
        }
        self.entities
            .try_reserve(1)
            .map_err(|_| EcsError::OutOfMemory {
                bytes: (self.entities.len() + 1) * std::mem::size_of::<Entity>(),
            })
    }

    unsafe fn push_moved(&mut self, entity: Entity, src: &[*mut u8]) -> usize {
        // SAFETY: Forwarded from the caller.
        let row = unsafe { self.rows.push_raw(src) };
        self.push_bookkeeping(entity);
        row
    }

    unsafe fn replace_moved(&mut self, row: usize, src: &[*mut u8]) {
        // SAFETY: Forwarded from the caller.
        unsafe { self.rows.replace_raw(row, src) };
        self.mark_row(row, true);
    }

    fn swap_remove(&mut self, row: usize) -> Option<Entity> {
        self.remove(row)
    }

    unsafe fn forget_swap_remove(&mut self, row: usize) -> Option<Entity> {
        // SAFETY: Forwarded from the caller.
        unsafe { self.rows.forget_swap_remove(row) };
        self.remove_bookkeeping(row)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entity(index: u32) -> Entity {
        Entity::from_index(index)
    }

    #[test]
    fn test_new_entity_is_dirty() {
        let mut arch = StaticArchetype::<(i32, f32)>::with_capacity(5).unwrap();
        let row = arch.new_entity(entity(0), (42, 3.25)).unwrap();
        assert_eq!(row, 0);
        assert_eq!(arch.len(), 1);
        assert!(arch.is_dirty::<i32>(0));
        assert!(arch.is_dirty::<f32>(0));
        assert!(!arch.is_dirty::<u8>(0));
        assert_eq!(arch.get::<i32>(0), Some(&42));
    }

    #[test]
    fn test_remove_relocates_last_row() {
        let mut arch = StaticArchetype::<(u32,)>::with_capacity(2).unwrap();
        for i in 0..4 {
            arch.new_entity(entity(i), (i * 10,)).unwrap();
        }
        arch.mark_dirty_range::<u32>(0, 4, false);
        arch.mark_dirty::<u32>(3, true);

        let moved = arch.remove(1);
        assert_eq!(moved, Some(entity(3)));
        assert_eq!(arch.entities(), &[entity(0), entity(3), entity(2)]);
        assert_eq!(arch.column::<u32>(), Some(&[0, 30, 20][..]));
        assert!(arch.is_dirty::<u32>(1));
        assert!(!arch.is_dirty::<u32>(2));

        assert_eq!(arch.remove(2), None);
        assert_eq!(arch.len(), 2);
    }

    #[test]
    fn test_emplace_at_marks_dirty() {
        let mut arch = StaticArchetype::<(String, u8)>::with_capacity(1).unwrap();
        arch.new_entity(entity(0), ("a".to_string(), 1)).unwrap();
        arch.mark_dirty_range::<String>(0, 1, false);
        arch.mark_dirty_range::<u8>(0, 1, false);
        arch.emplace_at(0, ("b".to_string(), 2));
        assert!(arch.is_dirty::<String>(0));
        assert!(arch.is_dirty::<u8>(0));
        assert_eq!(arch.get::<String>(0).map(String::as_str), Some("b"));
    }

    #[test]
    fn test_erased_contract() {
        let mut arch = StaticArchetype::<(u16, u64)>::with_capacity(1).unwrap();
        let storage: &mut dyn ArchetypeStorage = &mut arch;
        assert_eq!(storage.kind(), ArchetypeKind::Static);
        assert_eq!(storage.column_index(ComponentId::of::<u64>()), Some(1));

        storage.reserve_row().unwrap();
        let row = (7u16, 70u64).with_raw(|src| unsafe { storage.push_moved(entity(5), src) });
        assert_eq!(row, 0);
        assert_eq!(storage.len(), 1);
        assert!(storage.dirty(1).get(0));

        let ptr = storage.column_ptr(1).unwrap();
        assert_eq!(unsafe { *ptr.cast::<u64>() }, 70);
    }
}
