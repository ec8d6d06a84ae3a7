//! # Component Queries
//!
//! A query names a component subset and how each component is borrowed:
//! `&C` reads, `&mut C` writes. Queries are single references or tuples of up
//! to 12 of them:
//!
//! ```rust,ignore
//! world.get::<(&mut Position, &Velocity)>(entity);
//! world.make_system::<&mut Health>()?;
//! ```
//!
//! Mutability matters: `MARK_DIRTY` passes only mark the columns borrowed as
//! `&mut`.

// SAFETY: Fetching turns column base pointers into references. Callers
// guarantee the pointers address live columns of the right types, that the
// row is in bounds, and that no two fetched items alias.
#![allow(unsafe_code)]

use super::component::{Component, ComponentId};

/// One borrowed component of a query.
pub trait QueryItem {
    /// The component type.
    type Component: Component;

    /// What the callback receives.
    type Item<'w>;

    /// Whether the component is borrowed mutably.
    const MUTABLE: bool;

    /// Borrows the value at `row` of the column starting at `base`.
    ///
    /// # Safety
    ///
    /// `base` is the base of a column of `Self::Component` with more than
    /// `row` initialized values, valid and unaliased for `'w`.
    unsafe fn fetch<'w>(base: *mut u8, row: usize) -> Self::Item<'w>;
}

impl<C: Component> QueryItem for &C {
    type Component = C;
    type Item<'w> = &'w C;
    const MUTABLE: bool = false;

    #[inline]
    unsafe fn fetch<'w>(base: *mut u8, row: usize) -> Self::Item<'w> {
        // SAFETY: Forwarded from the caller.
        unsafe { &*base.cast::<C>().add(row) }
    }
}

impl<C: Component> QueryItem for &mut C {
    type Component = C;
    type Item<'w> = &'w mut C;
    const MUTABLE: bool = true;

    #[inline]
    unsafe fn fetch<'w>(base: *mut u8, row: usize) -> Self::Item<'w> {
        // SAFETY: Forwarded from the caller.
        unsafe { &mut *base.cast::<C>().add(row) }
    }
}

/// A query item whose component can be copied out and written back, used by
/// copy-in/copy-out (`SAFE_INSERT`) passes.
pub trait OwnedItem: QueryItem {
    /// Clones the value at `row`.
    ///
    /// # Safety
    ///
    /// As [`QueryItem::fetch`].
    unsafe fn read(base: *mut u8, row: usize) -> Self::Component;

    /// Stores `value` back at `row` if the borrow was mutable; otherwise the
    /// copy is dropped.
    ///
    /// # Safety
    ///
    /// As [`QueryItem::fetch`].
    unsafe fn write_back(base: *mut u8, row: usize, value: Self::Component);
}

impl<C: Component + Clone> OwnedItem for &C {
    #[inline]
    unsafe fn read(base: *mut u8, row: usize) -> C {
        // SAFETY: Forwarded from the caller.
        unsafe { (*base.cast::<C>().add(row)).clone() }
    }

    #[inline]
    unsafe fn write_back(_base: *mut u8, _row: usize, _value: C) {}
}

impl<C: Component + Clone> OwnedItem for &mut C {
    #[inline]
    unsafe fn read(base: *mut u8, row: usize) -> C {
        // SAFETY: Forwarded from the caller.
        unsafe { (*base.cast::<C>().add(row)).clone() }
    }

    #[inline]
    unsafe fn write_back(base: *mut u8, row: usize, value: C) {
        // SAFETY: Forwarded from the caller; assignment drops the old value.
        unsafe { *base.cast::<C>().add(row) = value };
    }
}

/// A component subset with borrow modes.
pub trait Query {
    /// Borrowed values handed to a callback.
    type Item<'w>;

    /// Number of components.
    const LEN: usize;

    /// Component ids in query order.
    fn component_ids() -> Vec<ComponentId>;

    /// Component type names in query order.
    fn component_names() -> Vec<&'static str>;

    /// Per component, whether it is borrowed mutably.
    fn mutability() -> Vec<bool>;

    /// Borrows the values at `row`, one column base per component.
    ///
    /// # Safety
    ///
    /// `bases[i]` satisfies [`QueryItem::fetch`] for component `i`, and the
    /// components are pairwise distinct.
    unsafe fn fetch<'w>(bases: &[*mut u8], row: usize) -> Self::Item<'w>;
}

/// A query whose components can be copied out and written back.
pub trait OwnedQuery: Query {
    /// Owned copies of every queried component.
    type Owned;

    /// Clones the values at `row`.
    ///
    /// # Safety
    ///
    /// As [`Query::fetch`].
    unsafe fn read(bases: &[*mut u8], row: usize) -> Self::Owned;

    /// Writes mutable components back to `row`; read-only copies are dropped.
    ///
    /// # Safety
    ///
    /// As [`Query::fetch`].
    unsafe fn write_back(bases: &[*mut u8], row: usize, owned: Self::Owned);
}

macro_rules! impl_single_query {
    ($($ref:tt)+) => {
        impl<C: Component> Query for $($ref)+ C {
            type Item<'w> = <Self as QueryItem>::Item<'w>;
            const LEN: usize = 1;

            fn component_ids() -> Vec<ComponentId> {
                vec![ComponentId::of::<C>()]
            }

            fn component_names() -> Vec<&'static str> {
                vec![std::any::type_name::<C>()]
            }

            fn mutability() -> Vec<bool> {
                vec![<Self as QueryItem>::MUTABLE]
            }

            #[inline]
            unsafe fn fetch<'w>(bases: &[*mut u8], row: usize) -> Self::Item<'w> {
                // SAFETY: Forwarded from the caller.
                unsafe { <Self as QueryItem>::fetch(bases[0], row) }
            }
        }

        impl<C: Component + Clone> OwnedQuery for $($ref)+ C {
            type Owned = C;

            #[inline]
            unsafe fn read(bases: &[*mut u8], row: usize) -> C {
                // SAFETY: Forwarded from the caller.
                unsafe { <Self as OwnedItem>::read(bases[0], row) }
            }

            #[inline]
            unsafe fn write_back(bases: &[*mut u8], row: usize, owned: C) {
                // SAFETY: Forwarded from the caller.
                unsafe { <Self as OwnedItem>::write_back(bases[0], row, owned) };
            }
        }
    };
}

impl_single_query!(&);
impl_single_query!(&mut);

macro_rules! impl_tuple_query {
    ($len:expr; $($idx:tt $Q:ident),+) => {
        impl<$($Q: QueryItem),+> Query for ($($Q,)+) {
            type Item<'w> = ($($Q::Item<'w>,)+);
            const LEN: usize = $len;

            fn component_ids() -> Vec<ComponentId> {
                vec![$(ComponentId::of::<$Q::Component>()),+]
            }

            fn component_names() -> Vec<&'static str> {
                vec![$(std::any::type_name::<$Q::Component>()),+]
            }

            fn mutability() -> Vec<bool> {
                vec![$($Q::MUTABLE),+]
            }

            #[inline]
            unsafe fn fetch<'w>(bases: &[*mut u8], row: usize) -> Self::Item<'w> {
                // SAFETY: Forwarded from the caller.
                unsafe { ($($Q::fetch(bases[$idx], row),)+) }
            }
        }

        impl<$($Q: OwnedItem),+> OwnedQuery for ($($Q,)+) {
            type Owned = ($($Q::Component,)+);

            #[inline]
            unsafe fn read(bases: &[*mut u8], row: usize) -> Self::Owned {
                // SAFETY: Forwarded from the caller.
                unsafe { ($($Q::read(bases[$idx], row),)+) }
            }

            #[inline]
            unsafe fn write_back(bases: &[*mut u8], row: usize, owned: Self::Owned) {
                // SAFETY: Forwarded from the caller.
                unsafe { $($Q::write_back(bases[$idx], row, owned.$idx);)+ }
            }
        }
    };
}

impl_tuple_query!(1; 0 A);
impl_tuple_query!(2; 0 A, 1 B);
impl_tuple_query!(3; 0 A, 1 B, 2 C);
impl_tuple_query!(4; 0 A, 1 B, 2 C, 3 D);
impl_tuple_query!(5; 0 A, 1 B, 2 C, 3 D, 4 E);
impl_tuple_query!(6; 0 A, 1 B, 2 C, 3 D, 4 E, 5 F);
impl_tuple_query!(7; 0 A, 1 B, 2 C, 3 D, 4 E, 5 F, 6 G);
impl_tuple_query!(8; 0 A, 1 B, 2 C, 3 D, 4 E, 5 F, 6 G, 7 H);
impl_tuple_query!(9; 0 A, 1 B, 2 C, 3 D, 4 E, 5 F, 6 G, 7 H, 8 I);
impl_tuple_query!(10; 0 A, 1 B, 2 C, 3 D, 4 E, 5 F, 6 G, 7 H, 8 I, 9 J);
impl_tuple_query!(11; 0 A, 1 B, 2 C, 3 D, 4 E, 5 F, 6 G, 7 H, 8 I, 9 J, 10 K);
impl_tuple_query!(12; 0 A, 1 B, 2 C, 3 D, 4 E, 5 F, 6 G, 7 H, 8 I, 9 J, 10 K, 11 L);
