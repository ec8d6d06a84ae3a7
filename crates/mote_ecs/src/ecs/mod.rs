//! # Entity Component System
//!
//! An archetype ECS: entities with the same component set share one
//! structure-of-arrays block, so systems iterate each component as a dense
//! slice.
//!
//! ## Design Philosophy
//!
//! - Static archetypes are declared once with the World; runtime archetypes
//!   are created on demand and never destroyed
//! - Removal is O(1) by swap-removal; row order is not stable
//! - Change tracking is one bit per row per component, 64 rows per word
//! - Every placement and migration path goes through one erased storage
//!   contract shared by both archetype kinds

pub mod archetype;
mod column;
mod component;
mod dirty;
mod entity;
mod multi_vec;
mod query;
mod system;
pub mod typeset;
mod world;

pub use archetype::{ArchetypeDescriptor, ArchetypeKind, RuntimeArchetype, StaticArchetype};
pub use component::{Component, ComponentId, ComponentInfo, DropFn};
pub use dirty::{DirtyBits, DirtyRows, ROWS_PER_WORD};
pub use entity::{ArchetypeId, ArchetypeLink, Entity};
pub use multi_vec::{ComponentTuple, MultiVec};
pub use query::{OwnedItem, OwnedQuery, Query, QueryItem};
pub use system::{RunFlags, System};
pub use world::{World, WorldBuilder};
