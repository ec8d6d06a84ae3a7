//! Runtime archetypes: the column set is data. Each column is an
//! [`ErasedColumn`] driven by its [`ComponentInfo`](crate::ComponentInfo).

// SAFETY: Typed accessors check the stored `ComponentId` before casting a
// column pointer; raw moves forward the contracts of `ErasedColumn`.
#![allow(unsafe_code)]

use std::any::Any;
use std::slice;

use super::{ArchetypeDescriptor, ArchetypeKind, ArchetypeStorage};
use crate::ecs::column::ErasedColumn;
use crate::ecs::component::{Component, ComponentId, ComponentInfo};
use crate::ecs::dirty::DirtyBits;
use crate::ecs::entity::Entity;
use crate::ecs::typeset;
use crate::error::{EcsError, EcsResult};

/// Archetype whose column set is only known at runtime.
pub struct RuntimeArchetype {
    descriptor: ArchetypeDescriptor,
    ids: Vec<ComponentId>,
    columns: Vec<ErasedColumn>,
    entities: Vec<Entity>,
    dirty: Vec<DirtyBits>,
}

impl RuntimeArchetype {
    /// Creates an empty archetype with room for `capacity` rows.
    pub(crate) fn new(descriptor: ArchetypeDescriptor, capacity: usize) -> EcsResult<Self> {
        let columns = descriptor
            .components()
            .iter()
            .map(|info| ErasedColumn::with_capacity(*info, capacity))
            .collect::<EcsResult<Vec<_>>>()?;
        Ok(Self {
            ids: descriptor.ids(),
            dirty: vec![DirtyBits::new(); columns.len()],
            entities: Vec::with_capacity(capacity),
            columns,
            descriptor,
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
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.columns
            .iter()
            .map(ErasedColumn::capacity)
            .min()
            .unwrap_or_else(|| self.entities.capacity())
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

    /// This schema followed by the components of `extra` not already present.
    ///
    /// Used to materialize the destination of a migration.
    #[must_use]
    pub fn extend(&self, extra: &[ComponentInfo]) -> ArchetypeDescriptor {
        self.descriptor.extend(extra)
    }

    /// Component `C` of `row`.
    #[must_use]
    pub fn get<C: Component>(&self, row: usize) -> Option<&C> {
        self.column::<C>()?.get(row)
    }

    /// Mutable component `C` of `row`. Does not touch dirty bits.
    pub fn get_mut<C: Component>(&mut self, row: usize) -> Option<&mut C> {
        self.column_mut::<C>()?.get_mut(row)
    }

    /// The whole column of `C`.
    #[must_use]
    pub fn column<C: Component>(&self) -> Option<&[C]> {
        let index = typeset::position(&self.ids, &ComponentId::of::<C>())?;
        let column = &self.columns[index];
        // SAFETY: The column stores `C` (ids match) and rows `0..len` are
        // initialized.
        Some(unsafe { slice::from_raw_parts(column.as_ptr().cast::<C>(), column.len()) })
    }

    /// The whole column of `C`, mutably. Does not touch dirty bits.
    pub fn column_mut<C: Component>(&mut self) -> Option<&mut [C]> {
        let index = typeset::position(&self.ids, &ComponentId::of::<C>())?;
        let column = &mut self.columns[index];
        // SAFETY: As `column`; `&mut self` guarantees exclusivity.
        Some(unsafe { slice::from_raw_parts_mut(column.as_ptr().cast::<C>(), column.len()) })
    }

    /// Checks the dirty bit of `C` at `row`.
    #[must_use]
    pub fn is_dirty<C: Component>(&self, row: usize) -> bool {
        typeset::position(&self.ids, &ComponentId::of::<C>())
            .is_some_and(|column| self.dirty[column].get(row))
    }

    /// Sets or clears the dirty bits of `C` for `start..end`. Returns `false`
    /// if the archetype has no `C` column.
    pub fn mark_dirty_range<C: Component>(&mut self, start: usize, end: usize, dirty: bool) -> bool {
        let Some(column) = typeset::position(&self.ids, &ComponentId::of::<C>()) else {
            return false;
        };
        self.dirty[column].set_range(start, end, dirty);
        true
    }

    fn remove_bookkeeping(&mut self, row: usize) -> Option<Entity> {
        for bits in &mut self.dirty {
            bits.swap_remove(row);
        }
        self.entities.swap_remove(row);
        self.entities.get(row).copied()
    }
}

impl ArchetypeStorage for RuntimeArchetype {
    fn kind(&self) -> ArchetypeKind {
        ArchetypeKind::Runtime
    }

    fn descriptor(&self) -> &ArchetypeDescriptor {
        &self.descriptor
    }

    fn ids(&self) -> &[ComponentId] {
        &self.ids
    }

    fn entities(&self) -> &[Entity] {
        &self.entities
    }

    fn column_ptr(&self, column: usize) -> Option<*const u8> {
        self.columns.get(column).map(|c| c.as_ptr().cast_const())
    }

    fn column_ptr_mut(&mut self, column: usize) -> Option<*mut u8> {
        self.columns.get_mut(column).map(|c| c.as_ptr())
    }

    fn dirty(&self, column: usize) -> &DirtyBits {
        &self.dirty[column]
    }

    fn dirty_mut(&mut self, column: usize) -> &mut DirtyBits {
        &mut self.dirty[column]
    }

    fn reserve_row(&mut self) -> EcsResult<()> {
        for column in &mut self.columns {
            column.reserve_one()?;
        }
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
        debug_assert_eq!(src.len(), self.columns.len());
        let row = self.entities.len();
        for (column, &value) in self.columns.iter_mut().zip(src) {
            // SAFETY: Forwarded from the caller.
            unsafe { column.push_moved(value.cast_const()) };
        }
        self.entities.push(entity);
        for bits in &mut self.dirty {
            bits.push_row(true);
        }
        row
    }

    unsafe fn replace_moved(&mut self, row: usize, src: &[*mut u8]) {
        debug_assert_eq!(src.len(), self.columns.len());
        for (column, &value) in self.columns.iter_mut().zip(src) {
            // SAFETY: Forwarded from the caller.
            unsafe { column.replace_moved(row, value.cast_const()) };
        }
        self.mark_row(row, true);
    }

    fn swap_remove(&mut self, row: usize) -> Option<Entity> {
        for column in &mut self.columns {
            column.swap_remove(row);
        }
        self.remove_bookkeeping(row)
    }

    unsafe fn forget_swap_remove(&mut self, row: usize) -> Option<Entity> {
        for column in &mut self.columns {
            // SAFETY: Forwarded from the caller.
            unsafe { column.swap_remove_forget(row) };
        }
        self.remove_bookkeeping(row)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
