//! # MOTE ECS
//!
//! Archetype entity/component storage for simulation code:
//! - Static archetypes declared up front, runtime archetypes created on demand
//! - O(1) amortized insert and swap-removal
//! - Per-component dirty bits for incremental systems
//! - Safe migration when an entity's component set changes
//!
//! ## Architecture Rules
//!
//! 1. **Structure of arrays** - One contiguous column per component type
//! 2. **Typed errors for contract violations** - Expected absence is `None`
//! 3. **Single writer** - Every structural change takes `&mut World`
//!
//! ## Example
//!
//! ```rust
//! use mote_ecs::{RunFlags, World};
//!
//! #[derive(Clone, Copy, Debug, PartialEq)]
//! struct Position(f32);
//! #[derive(Clone, Copy, Debug, PartialEq)]
//! struct Velocity(f32);
//!
//! let mut world = World::builder()
//!     .archetype::<(Position, Velocity)>()
//!     .build()
//!     .unwrap();
//! let e = world
//!     .static_emplace_entity((Position(0.0), Velocity(2.0)))
//!     .unwrap();
//!
//! let mut movement = world.make_system::<(&mut Position, &Velocity)>().unwrap();
//! movement
//!     .run(&mut world, RunFlags::empty(), |(pos, vel)| pos.0 += vel.0)
//!     .unwrap();
//! assert_eq!(world.component::<Position>(e), Some(&Position(2.0)));
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod config;
pub mod ecs;
pub mod error;

pub use config::WorldConfig;
pub use ecs::{
    ArchetypeDescriptor, ArchetypeId, ArchetypeKind, ArchetypeLink, Component, ComponentId,
    ComponentInfo, ComponentTuple, DirtyBits, Entity, MultiVec, OwnedQuery, Query, QueryItem,
    RunFlags, RuntimeArchetype, StaticArchetype, System, World, WorldBuilder,
};
pub use error::{EcsError, EcsResult};
