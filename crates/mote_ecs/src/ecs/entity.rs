//! # Entity Management
//!
//! Entities are dense indices into the World's link table. Each link records
//! which archetype currently stores the entity and at which row.

use std::fmt;

/// Opaque handle for one record in a [`World`](crate::World).
///
/// Entities are never recycled automatically; dead slots are found with
/// [`World::find_dead`](crate::World::find_dead).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct Entity(u32);

impl Entity {
    /// Null/invalid entity.
    pub const NULL: Self = Self(u32::MAX);

    /// Creates an entity handle from a link-table index.
    #[inline]
    #[must_use]
    pub const fn from_index(index: u32) -> Self {
        Self(index)
    }

    /// Returns the link-table index.
    #[inline]
    #[must_use]
    pub const fn index(self) -> u32 {
        self.0
    }

    /// Checks if this entity is the null handle.
    #[inline]
    #[must_use]
    pub const fn is_null(self) -> bool {
        self.0 == u32::MAX
    }
}

impl Default for Entity {
    fn default() -> Self {
        Self::NULL
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            f.write_str("null")
        } else {
            write!(f, "#{}", self.0)
        }
    }
}

/// Identifier of an archetype in a World's flat archetype-id space.
///
/// Static archetypes take the ids `0..N` in declaration order, runtime
/// archetypes follow.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct ArchetypeId(u32);

impl ArchetypeId {
    /// Null/invalid archetype id.
    pub const NULL: Self = Self(u32::MAX);

    /// Creates an archetype id.
    #[inline]
    #[must_use]
    pub const fn new(index: u32) -> Self {
        Self(index)
    }

    /// Returns the position in the World's archetype list.
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    /// Checks if this is the null id.
    #[inline]
    #[must_use]
    pub const fn is_null(self) -> bool {
        self.0 == u32::MAX
    }
}

impl fmt::Display for ArchetypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "archetype {}", self.0)
    }
}

/// Location of an entity: archetype and row.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ArchetypeLink {
    /// Archetype storing the entity.
    pub archetype: ArchetypeId,
    /// Row within that archetype.
    pub row: usize,
}

impl ArchetypeLink {
    /// Link of an unallocated or dead entity.
    pub const NULL: Self = Self {
        archetype: ArchetypeId::NULL,
        row: usize::MAX,
    };

    /// Creates a live link.
    #[inline]
    #[must_use]
    pub const fn new(archetype: ArchetypeId, row: usize) -> Self {
        Self { archetype, row }
    }

    /// Checks if the link points at a row.
    #[inline]
    #[must_use]
    pub const fn is_live(self) -> bool {
        !self.archetype.is_null()
    }
}

impl Default for ArchetypeLink {
    fn default() -> Self {
        Self::NULL
    }
}
