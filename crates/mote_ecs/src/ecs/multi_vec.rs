//! # Typed Columnar Container
//!
//! A fixed, ordered component list stored structure-of-arrays: one `Vec` per
//! component type, all of equal length.
//!
//! ```text
//! MultiVec<(Position, Velocity, Health)>:
//!   Position[]: [P0, P1, P2, ...]
//!   Velocity[]: [V0, V1, V2, ...]
//!   Health[]:   [H0, H1, H2, ...]
//! ```
//!
//! The type list is a tuple implementing [`ComponentTuple`]. Besides typed
//! access, every column can be reached through an erased pointer so the same
//! rows can be moved to and from archetypes whose types are only known at
//! runtime.

// SAFETY: Raw moves read values out of caller-provided pointers and shorten
// columns without dropping moved-out slots. Each unsafe fn documents the
// ownership transfer it expects.
#![allow(unsafe_code)]

use std::any::Any;
use std::collections::TryReserveError;
use std::mem::ManuallyDrop;
use std::ptr;

use super::component::{Component, ComponentId, ComponentInfo};
use super::typeset;
use crate::error::{EcsError, EcsResult};

/// An ordered list of component types, as a tuple `(A, B, ...)` of 1 to 12
/// components.
///
/// A value of the tuple is one row. The associated functions operate on the
/// matching column storage (`(Vec<A>, Vec<B>, ...)`).
pub trait ComponentTuple: Sized + 'static {
    /// One `Vec` per component.
    type Columns: 'static;

    /// Number of components.
    const LEN: usize;

    /// Descriptors in declared order.
    fn component_infos() -> Vec<ComponentInfo>;

    /// Ids in declared order.
    fn component_ids() -> Vec<ComponentId> {
        Self::component_infos().iter().map(ComponentInfo::id).collect()
    }

    /// Empty column storage.
    fn new_columns() -> Self::Columns;

    /// Row count.
    fn len(columns: &Self::Columns) -> usize;

    /// Appends a row.
    fn push(columns: &mut Self::Columns, values: Self);

    /// Drops the values of `row` and stores `values` in their place.
    fn replace(columns: &mut Self::Columns, row: usize, values: Self);

    /// Swaps two rows across all columns.
    fn swap(columns: &mut Self::Columns, a: usize, b: usize);

    /// Removes the last row.
    fn pop(columns: &mut Self::Columns) -> Option<Self>;

    /// Removes `row`, moving the last row into its place.
    fn swap_remove(columns: &mut Self::Columns, row: usize) -> Self;

    /// Reserves room for exactly `additional` more rows in every column.
    ///
    /// # Errors
    ///
    /// Returns the allocator error of the first column that cannot grow.
    fn try_reserve_exact(
        columns: &mut Self::Columns,
        additional: usize,
    ) -> Result<(), TryReserveError>;

    /// Releases spare capacity in every column.
    fn shrink_to_fit(columns: &mut Self::Columns);

    /// Base pointer of column `column`.
    fn column_ptr(columns: &Self::Columns, column: usize) -> Option<*const u8>;

    /// Mutable base pointer of column `column`.
    fn column_ptr_mut(columns: &mut Self::Columns, column: usize) -> Option<*mut u8>;

    /// Column `column` as `&Vec<C>` behind `dyn Any`.
    fn column_any(columns: &Self::Columns, column: usize) -> Option<&dyn Any>;

    /// Column `column` as `&mut Vec<C>` behind `dyn Any`.
    fn column_any_mut(columns: &mut Self::Columns, column: usize) -> Option<&mut dyn Any>;

    /// Hands out one pointer per value, in declared order, and gives up
    /// ownership of them.
    ///
    /// `f` must move every value out (or drop it); the tuple itself is never
    /// dropped.
    fn with_raw<R>(self, f: impl FnOnce(&[*mut u8]) -> R) -> R;

    /// Appends a row by moving values out of `src`.
    ///
    /// # Safety
    ///
    /// `src` holds `LEN` pointers to initialized values of the declared types,
    /// in declared order. Ownership moves into the columns; the sources must
    /// not be used or dropped afterwards.
    unsafe fn push_raw(columns: &mut Self::Columns, src: &[*mut u8]);

    /// Replaces `row` by moving values out of `src`; the old values are dropped.
    ///
    /// # Safety
    ///
    /// As [`ComponentTuple::push_raw`], and `row` must be in bounds.
    unsafe fn replace_raw(columns: &mut Self::Columns, row: usize, src: &[*mut u8]);

    /// Removes `row` without dropping it, moving the last row into its place.
    ///
    /// # Safety
    ///
    /// Every value of `row` must already have been moved out or dropped, and
    /// `row` must be in bounds.
    unsafe fn forget_swap_remove(columns: &mut Self::Columns, row: usize);
}

/// Removes `row` from `column` without dropping it.
///
/// # Safety
///
/// The value at `row` must already be moved out; `row < column.len()`.
unsafe fn forget_swap_remove_vec<C>(column: &mut Vec<C>, row: usize) {
    let last = column.len() - 1;
    let base = column.as_mut_ptr();
    // SAFETY: Both rows are in bounds; the slot at `row` holds no live value,
    // and the last slot is forgotten by shortening the length.
    unsafe {
        if row != last {
            ptr::copy_nonoverlapping(base.add(last), base.add(row), 1);
        }
        column.set_len(last);
    }
}

macro_rules! impl_component_tuple {
    ($len:expr; $($idx:tt $T:ident),+) => {
        impl<$($T: Component),+> ComponentTuple for ($($T,)+) {
            type Columns = ($(Vec<$T>,)+);

            const LEN: usize = $len;

            fn component_infos() -> Vec<ComponentInfo> {
                vec![$(ComponentInfo::of::<$T>()),+]
            }

            fn new_columns() -> Self::Columns {
                ($(Vec::<$T>::new(),)+)
            }

            #[inline]
            fn len(columns: &Self::Columns) -> usize {
                columns.0.len()
            }

            #[inline]
            fn push(columns: &mut Self::Columns, values: Self) {
                $(columns.$idx.push(values.$idx);)+
            }

            #[inline]
            fn replace(columns: &mut Self::Columns, row: usize, values: Self) {
                $(columns.$idx[row] = values.$idx;)+
            }

            #[inline]
            fn swap(columns: &mut Self::Columns, a: usize, b: usize) {
                $(columns.$idx.swap(a, b);)+
            }

            fn pop(columns: &mut Self::Columns) -> Option<Self> {
                if columns.0.is_empty() {
                    return None;
                }
                Some(($(columns.$idx.pop()?,)+))
            }

            fn swap_remove(columns: &mut Self::Columns, row: usize) -> Self {
                ($(columns.$idx.swap_remove(row),)+)
            }

            fn try_reserve_exact(
                columns: &mut Self::Columns,
                additional: usize,
            ) -> Result<(), TryReserveError> {
                $(columns.$idx.try_reserve_exact(additional)?;)+
                Ok(())
            }

            fn shrink_to_fit(columns: &mut Self::Columns) {
                $(columns.$idx.shrink_to_fit();)+
            }

            #[inline]
            fn column_ptr(columns: &Self::Columns, column: usize) -> Option<*const u8> {
                match column {
                    $($idx => Some(columns.$idx.as_ptr().cast::<u8>()),)+
                    _ => None,
                }
            }

            #[inline]
            fn column_ptr_mut(columns: &mut Self::Columns, column: usize) -> Option<*mut u8> {
                match column {
                    $($idx => Some(columns.$idx.as_mut_ptr().cast::<u8>()),)+
                    _ => None,
                }
            }

            fn column_any(columns: &Self::Columns, column: usize) -> Option<&dyn Any> {
                match column {
                    $($idx => Some(&columns.$idx as &dyn Any),)+
                    _ => None,
                }
            }

            fn column_any_mut(columns: &mut Self::Columns, column: usize) -> Option<&mut dyn Any> {
                match column {
                    $($idx => Some(&mut columns.$idx as &mut dyn Any),)+
                    _ => None,
                }
            }

            fn with_raw<R>(self, f: impl FnOnce(&[*mut u8]) -> R) -> R {
                let mut values = ManuallyDrop::new(self);
                let values: &mut Self = &mut values;
                let ptrs = [$(ptr::addr_of_mut!(values.$idx).cast::<u8>()),+];
                f(&ptrs)
            }

            unsafe fn push_raw(columns: &mut Self::Columns, src: &[*mut u8]) {
                debug_assert_eq!(src.len(), $len);
                // SAFETY: Each pointer holds an initialized value of its
                // column's type, handed over by the caller.
                $(columns.$idx.push(unsafe { src[$idx].cast::<$T>().read() });)+
            }

            unsafe fn replace_raw(columns: &mut Self::Columns, row: usize, src: &[*mut u8]) {
                debug_assert_eq!(src.len(), $len);
                // SAFETY: As `push_raw`; assignment drops the previous value.
                $(columns.$idx[row] = unsafe { src[$idx].cast::<$T>().read() };)+
            }

            unsafe fn forget_swap_remove(columns: &mut Self::Columns, row: usize) {
                // SAFETY: Forwarded from the caller.
                $(unsafe { forget_swap_remove_vec(&mut columns.$idx, row) };)+
            }
        }
    };
}

impl_component_tuple!(1; 0 A);
impl_component_tuple!(2; 0 A, 1 B);
impl_component_tuple!(3; 0 A, 1 B, 2 C);
impl_component_tuple!(4; 0 A, 1 B, 2 C, 3 D);
impl_component_tuple!(5; 0 A, 1 B, 2 C, 3 D, 4 E);
impl_component_tuple!(6; 0 A, 1 B, 2 C, 3 D, 4 E, 5 F);
impl_component_tuple!(7; 0 A, 1 B, 2 C, 3 D, 4 E, 5 F, 6 G);
impl_component_tuple!(8; 0 A, 1 B, 2 C, 3 D, 4 E, 5 F, 6 G, 7 H);
impl_component_tuple!(9; 0 A, 1 B, 2 C, 3 D, 4 E, 5 F, 6 G, 7 H, 8 I);
impl_component_tuple!(10; 0 A, 1 B, 2 C, 3 D, 4 E, 5 F, 6 G, 7 H, 8 I, 9 J);
impl_component_tuple!(11; 0 A, 1 B, 2 C, 3 D, 4 E, 5 F, 6 G, 7 H, 8 I, 9 J, 10 K);
impl_component_tuple!(12; 0 A, 1 B, 2 C, 3 D, 4 E, 5 F, 6 G, 7 H, 8 I, 9 J, 10 K, 11 L);

/// Structure-of-arrays buffer over the component list `T`.
///
/// Capacity starts at the requested value (at least 1) and doubles whenever a
/// push finds every column full.
pub struct MultiVec<T: ComponentTuple> {
    columns: T::Columns,
    infos: Vec<ComponentInfo>,
    ids: Vec<ComponentId>,
    capacity: usize,
}

impl<T: ComponentTuple> MultiVec<T> {
    /// Creates an empty container with room for `capacity` rows.
    ///
    /// # Errors
    ///
    /// Returns [`EcsError::OutOfMemory`] if the columns cannot be allocated.
    pub fn with_capacity(capacity: usize) -> EcsResult<Self> {
        let infos = T::component_infos();
        let ids = infos.iter().map(ComponentInfo::id).collect();
        let mut multi = Self {
            columns: T::new_columns(),
            infos,
            ids,
            capacity: 0,
        };
        multi.reserve(capacity.max(1))?;
        Ok(multi)
    }

    /// Row count.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        T::len(&self.columns)
    }

    /// Checks if empty.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Rows that fit before the next growth.
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Component ids in declared order.
    #[inline]
    #[must_use]
    pub fn ids(&self) -> &[ComponentId] {
        &self.ids
    }

    /// Component descriptors in declared order.
    #[inline]
    #[must_use]
    pub fn infos(&self) -> &[ComponentInfo] {
        &self.infos
    }

    /// Position of component `id` in the declared order.
    #[inline]
    #[must_use]
    pub fn column_index(&self, id: ComponentId) -> Option<usize> {
        typeset::position(&self.ids, &id)
    }

    /// Appends a row and returns its index.
    ///
    /// # Errors
    ///
    /// Returns [`EcsError::OutOfMemory`] if growing fails; nothing is stored.
    pub fn push(&mut self, values: T) -> EcsResult<usize> {
        self.grow_if_full()?;
        let row = self.len();
        T::push(&mut self.columns, values);
        Ok(row)
    }

    /// Replaces the values of an existing row.
    ///
    /// # Panics
    ///
    /// Panics if `row` is out of bounds.
    pub fn set(&mut self, row: usize, values: T) {
        T::replace(&mut self.columns, row, values);
    }

    /// Swaps two rows across all columns.
    ///
    /// # Panics
    ///
    /// Panics if either row is out of bounds.
    pub fn swap(&mut self, a: usize, b: usize) {
        T::swap(&mut self.columns, a, b);
    }

    /// Removes and returns the last row.
    pub fn pop(&mut self) -> Option<T> {
        T::pop(&mut self.columns)
    }

    /// Removes `row`, moving the last row into its place.
    ///
    /// # Panics
    ///
    /// Panics if `row` is out of bounds.
    pub fn swap_remove(&mut self, row: usize) -> T {
        T::swap_remove(&mut self.columns, row)
    }

    /// Reserves room for `additional` more rows.
    ///
    /// # Errors
    ///
    /// Returns [`EcsError::OutOfMemory`] if a column cannot grow.
    pub fn reserve(&mut self, additional: usize) -> EcsResult<()> {
        let wanted = self.len().saturating_add(additional);
        if wanted <= self.capacity {
            return Ok(());
        }
        let additional = wanted - self.len();
        T::try_reserve_exact(&mut self.columns, additional).map_err(|_| {
            EcsError::OutOfMemory {
                bytes: wanted.saturating_mul(self.row_size()),
            }
        })?;
        self.capacity = wanted;
        Ok(())
    }

    /// Releases spare capacity.
    pub fn shrink_to_fit(&mut self) {
        T::shrink_to_fit(&mut self.columns);
        self.capacity = self.len().max(1);
    }

    /// Doubles the capacity if the next push would not fit.
    ///
    /// # Errors
    ///
    /// Returns [`EcsError::OutOfMemory`] if a column cannot grow.
    pub fn grow_if_full(&mut self) -> EcsResult<()> {
        if self.len() < self.capacity {
            return Ok(());
        }
        self.reserve(self.capacity.max(1))
    }

    /// Component `C` of `row`.
    #[inline]
    #[must_use]
    pub fn get<C: Component>(&self, row: usize) -> Option<&C> {
        self.column::<C>()?.get(row)
    }

    /// Mutable component `C` of `row`.
    #[inline]
    pub fn get_mut<C: Component>(&mut self, row: usize) -> Option<&mut C> {
        self.column_mut::<C>()?.get_mut(row)
    }

    /// The whole column of `C`.
    #[must_use]
    pub fn column<C: Component>(&self) -> Option<&[C]> {
        let index = self.column_index(ComponentId::of::<C>())?;
        T::column_any(&self.columns, index)?
            .downcast_ref::<Vec<C>>()
            .map(Vec::as_slice)
    }

    /// The whole column of `C`, mutably.
    pub fn column_mut<C: Component>(&mut self) -> Option<&mut [C]> {
        let index = self.column_index(ComponentId::of::<C>())?;
        T::column_any_mut(&mut self.columns, index)?
            .downcast_mut::<Vec<C>>()
            .map(Vec::as_mut_slice)
    }

    /// Erased base pointer of the column of `id`.
    #[must_use]
    pub fn column_ptr(&self, id: ComponentId) -> Option<*const u8> {
        T::column_ptr(&self.columns, self.column_index(id)?)
    }

    /// Erased mutable base pointer of the column of `id`.
    pub fn column_ptr_mut(&mut self, id: ComponentId) -> Option<*mut u8> {
        let index = self.column_index(id)?;
        T::column_ptr_mut(&mut self.columns, index)
    }

    /// Erased base pointer of column `index`.
    #[inline]
    #[must_use]
    pub fn column_ptr_at(&self, index: usize) -> Option<*const u8> {
        T::column_ptr(&self.columns, index)
    }

    /// Erased mutable base pointer of column `index`.
    #[inline]
    pub fn column_ptr_at_mut(&mut self, index: usize) -> Option<*mut u8> {
        T::column_ptr_mut(&mut self.columns, index)
    }

    /// Appends a row moved out of raw pointers.
    ///
    /// # Safety
    ///
    /// See [`ComponentTuple::push_raw`]. The caller must have called
    /// [`MultiVec::grow_if_full`] first so the push cannot reallocate past the
    /// tracked capacity.
    pub unsafe fn push_raw(&mut self, src: &[*mut u8]) -> usize {
        let row = self.len();
        // SAFETY: Forwarded from the caller.
        unsafe { T::push_raw(&mut self.columns, src) };
        row
    }

    /// Replaces `row` with values moved out of raw pointers.
    ///
    /// # Safety
    ///
    /// See [`ComponentTuple::replace_raw`].
    pub unsafe fn replace_raw(&mut self, row: usize, src: &[*mut u8]) {
        // SAFETY: Forwarded from the caller.
        unsafe { T::replace_raw(&mut self.columns, row, src) };
    }

    /// Removes `row` without dropping its values.
    ///
    /// # Safety
    ///
    /// See [`ComponentTuple::forget_swap_remove`].
    pub unsafe fn forget_swap_remove(&mut self, row: usize) {
        // SAFETY: Forwarded from the caller.
        unsafe { T::forget_swap_remove(&mut self.columns, row) };
    }

    fn row_size(&self) -> usize {
        self.infos.iter().map(ComponentInfo::size).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    #[derive(Debug)]
    struct Tracked(Rc<Cell<i32>>);

    impl Tracked {
        fn new(live: &Rc<Cell<i32>>) -> Self {
            live.set(live.get() + 1);
            Self(Rc::clone(live))
        }
    }

    impl Drop for Tracked {
        fn drop(&mut self) {
            self.0.set(self.0.get() - 1);
        }
    }

    #[test]
    fn test_push_and_get() {
        let mut multi = MultiVec::<(i32, f32)>::with_capacity(5).unwrap();
        assert_eq!(multi.push((42, 3.25)).unwrap(), 0);
        assert_eq!(multi.push((7, 1.0)).unwrap(), 1);
        assert_eq!(multi.len(), 2);
        assert_eq!(multi.get::<i32>(0), Some(&42));
        assert_eq!(multi.get::<f32>(1), Some(&1.0));
        assert_eq!(multi.column::<i32>(), Some(&[42, 7][..]));
        assert!(multi.get::<u8>(0).is_none());
        assert!(multi.get::<i32>(2).is_none());
    }

    #[test]
    fn test_capacity_doubles() {
        let mut multi = MultiVec::<(u32,)>::with_capacity(5).unwrap();
        assert_eq!(multi.capacity(), 5);
        for i in 0..5 {
            multi.push((i,)).unwrap();
        }
        assert_eq!(multi.capacity(), 5);
        multi.push((5,)).unwrap();
        assert_eq!(multi.capacity(), 10);
        for i in 6..11 {
            multi.push((i,)).unwrap();
        }
        assert_eq!(multi.capacity(), 20);
    }

    #[test]
    fn test_zero_capacity_is_bumped() {
        let multi = MultiVec::<(u8,)>::with_capacity(0).unwrap();
        assert_eq!(multi.capacity(), 1);
    }

    #[test]
    fn test_swap_and_pop() {
        let mut multi = MultiVec::<(u8, char)>::with_capacity(4).unwrap();
        multi.push((1, 'a')).unwrap();
        multi.push((2, 'b')).unwrap();
        multi.swap(0, 1);
        assert_eq!(multi.column::<char>(), Some(&['b', 'a'][..]));
        assert_eq!(multi.pop(), Some((1, 'a')));
        assert_eq!(multi.pop(), Some((2, 'b')));
        assert_eq!(multi.pop(), None);
    }

    #[test]
    fn test_set_drops_previous() {
        let live = Rc::new(Cell::new(0));
        let mut multi = MultiVec::<(Tracked, u8)>::with_capacity(2).unwrap();
        multi.push((Tracked::new(&live), 1)).unwrap();
        multi.set(0, (Tracked::new(&live), 2));
        assert_eq!(live.get(), 1);
        assert_eq!(multi.get::<u8>(0), Some(&2));
        drop(multi);
        assert_eq!(live.get(), 0);
    }

    #[test]
    fn test_column_mut() {
        let mut multi = MultiVec::<(i64, String)>::with_capacity(2).unwrap();
        multi.push((1, "a".to_string())).unwrap();
        multi.push((2, "b".to_string())).unwrap();
        for value in multi.column_mut::<i64>().unwrap() {
            *value *= 10;
        }
        multi.get_mut::<String>(1).unwrap().push('!');
        assert_eq!(multi.column::<i64>(), Some(&[10, 20][..]));
        assert_eq!(multi.get::<String>(1).map(String::as_str), Some("b!"));
    }

    #[test]
    fn test_raw_round_trip() {
        let live = Rc::new(Cell::new(0));
        let mut source = MultiVec::<(Tracked, u16)>::with_capacity(2).unwrap();
        let mut target = MultiVec::<(Tracked, u16)>::with_capacity(2).unwrap();
        source.push((Tracked::new(&live), 10)).unwrap();
        source.push((Tracked::new(&live), 20)).unwrap();

        let ptrs = [
            source.column_ptr_at_mut(0).unwrap(),
            source.column_ptr_at_mut(1).unwrap(),
        ];
        target.grow_if_full().unwrap();
        unsafe {
            target.push_raw(&ptrs);
            source.forget_swap_remove(0);
        }

        assert_eq!(live.get(), 2);
        assert_eq!(target.get::<u16>(0), Some(&10));
        assert_eq!(source.get::<u16>(0), Some(&20));
        drop(source);
        drop(target);
        assert_eq!(live.get(), 0);
    }

    #[test]
    fn test_with_raw_hands_over_values() {
        let live = Rc::new(Cell::new(0));
        let mut multi = MultiVec::<(Tracked, u8)>::with_capacity(1).unwrap();
        multi.grow_if_full().unwrap();
        (Tracked::new(&live), 9u8).with_raw(|ptrs| unsafe {
            multi.push_raw(ptrs);
        });
        assert_eq!(live.get(), 1);
        assert_eq!(multi.get::<u8>(0), Some(&9));
    }

    #[test]
    fn test_erased_column_pointer() {
        let mut multi = MultiVec::<(u32, u64)>::with_capacity(2).unwrap();
        multi.push((1, 100)).unwrap();
        let ptr = multi.column_ptr(ComponentId::of::<u64>()).unwrap();
        assert_eq!(unsafe { *ptr.cast::<u64>() }, 100);
        assert!(multi.column_ptr(ComponentId::of::<i8>()).is_none());
    }
}
