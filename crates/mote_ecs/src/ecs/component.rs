//! # Component System
//!
//! Components are plain data attached to entities. Any `'static` type can be a
//! component; its [`ComponentInfo`] is the type-erased vtable the runtime paths
//! use to move and drop values they cannot name.

// SAFETY: Erased drop functions are only called on pointers to initialized
// values of the type the descriptor was built from.
#![allow(unsafe_code)]

use std::alloc::Layout;
use std::any::{type_name, TypeId};
use std::fmt;

/// Marker trait for ECS components.
///
/// Implemented for every `'static` type. Use [`named_component!`](crate::named_component)
/// to give a shared underlying type (a `String`, an `f32`) distinct identities.
pub trait Component: 'static {}

impl<T: 'static> Component for T {}

/// Identity of a component type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct ComponentId(TypeId);

impl ComponentId {
    /// Returns the id of `C`.
    #[inline]
    #[must_use]
    pub fn of<C: Component>() -> Self {
        Self(TypeId::of::<C>())
    }

    /// Returns the underlying `TypeId`.
    #[inline]
    #[must_use]
    pub const fn type_id(self) -> TypeId {
        self.0
    }
}

/// Erased destructor: drops the value behind the pointer in place.
pub type DropFn = unsafe fn(*mut u8);

/// Layout descriptor for one component type.
///
/// Moving a value is a bitwise copy followed by forgetting the source, so the
/// descriptor only needs the layout and an optional destructor.
#[derive(Clone, Copy)]
pub struct ComponentInfo {
    id: ComponentId,
    name: &'static str,
    layout: Layout,
    drop: Option<DropFn>,
}

impl ComponentInfo {
    /// Builds the descriptor of `C`.
    #[must_use]
    pub fn of<C: Component>() -> Self {
        Self {
            id: ComponentId::of::<C>(),
            name: type_name::<C>(),
            layout: Layout::new::<C>(),
            drop: if std::mem::needs_drop::<C>() {
                Some(drop_erased::<C> as DropFn)
            } else {
                None
            },
        }
    }

    /// Type identity.
    #[inline]
    #[must_use]
    pub const fn id(&self) -> ComponentId {
        self.id
    }

    /// Type name, for diagnostics.
    #[inline]
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Memory layout of one value.
    #[inline]
    #[must_use]
    pub const fn layout(&self) -> Layout {
        self.layout
    }

    /// Size of one value in bytes.
    #[inline]
    #[must_use]
    pub const fn size(&self) -> usize {
        self.layout.size()
    }

    /// Alignment of one value in bytes.
    #[inline]
    #[must_use]
    pub const fn align(&self) -> usize {
        self.layout.align()
    }

    /// Whether values need their destructor run.
    #[inline]
    #[must_use]
    pub const fn needs_drop(&self) -> bool {
        self.drop.is_some()
    }

    /// Drops the value at `ptr` in place.
    ///
    /// # Safety
    ///
    /// `ptr` must point to an initialized value of this component type that
    /// is not used again.
    #[inline]
    pub unsafe fn drop_in_place(&self, ptr: *mut u8) {
        if let Some(drop) = self.drop {
            // SAFETY: Forwarded from the caller.
            unsafe { drop(ptr) };
        }
    }
}

impl PartialEq for ComponentInfo {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ComponentInfo {}

impl fmt::Debug for ComponentInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentInfo")
            .field("name", &self.name)
            .field("size", &self.layout.size())
            .field("align", &self.layout.align())
            .field("needs_drop", &self.drop.is_some())
            .finish()
    }
}

unsafe fn drop_erased<C>(ptr: *mut u8) {
    // SAFETY: The descriptor pairs this function with `C` only.
    unsafe { ptr.cast::<C>().drop_in_place() };
}

/// Declares a nominal component wrapping another type.
///
/// Several components often share a representation (a name and a title are
/// both `String`s). A wrapper gives each its own identity while still derefing
/// to the inner value.
///
/// ```rust
/// mote_ecs::named_component! {
///     /// Display name.
///     #[derive(Clone, Debug, PartialEq)]
///     pub struct Name(String);
/// }
///
/// let name = Name::from("probe".to_string());
/// assert_eq!(name.len(), 5);
/// ```
#[macro_export]
macro_rules! named_component {
    ($(#[$meta:meta])* $vis:vis struct $name:ident($inner:ty);) => {
        $(#[$meta])*
        #[repr(transparent)]
        $vis struct $name(pub $inner);

        impl ::core::ops::Deref for $name {
            type Target = $inner;

            #[inline]
            fn deref(&self) -> &$inner {
                &self.0
            }
        }

        impl ::core::ops::DerefMut for $name {
            #[inline]
            fn deref_mut(&mut self) -> &mut $inner {
                &mut self.0
            }
        }

        impl ::core::convert::From<$inner> for $name {
            #[inline]
            fn from(value: $inner) -> Self {
                Self(value)
            }
        }
    };
}
