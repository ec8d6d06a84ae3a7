//! # ECS World
//!
//! The central container for all entities and components.
//!
//! Archetypes live in one growable list sharing a single id space: the static
//! archetypes declared through [`WorldBuilder`] take ids `0..N`, runtime
//! archetypes created later take ids `N..`. Every entity has a link
//! `(archetype, row)` in a dense table indexed by the entity.
//!
//! ```rust,ignore
//! let mut world = World::builder()
//!     .archetype::<(Position, Velocity)>()
//!     .build()?;
//!
//! let e = world.static_emplace_entity((Position::default(), Velocity::default()))?;
//! world.extend(e, (Health(100),))?;
//! let (pos, hp) = world.get::<(&mut Position, &Health)>(e).unwrap();
//! ```

// SAFETY: Placement and migration move component values between archetypes
// through raw pointers. Types are checked against the destination schema
// before any value is moved, and every value is moved or dropped exactly once.
#![allow(unsafe_code)]

use std::alloc::dealloc;
use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use super::archetype::{
    ArchetypeDescriptor, ArchetypeKind, ArchetypeStorage, RuntimeArchetype, StaticArchetype,
};
use super::component::{Component, ComponentId, ComponentInfo};
use super::entity::{ArchetypeId, ArchetypeLink, Entity};
use super::multi_vec::ComponentTuple;
use super::query::Query;
use super::system::System;
use super::typeset;
use crate::config::WorldConfig;
use crate::error::{EcsError, EcsResult};

static NEXT_WORLD_ID: AtomicU64 = AtomicU64::new(1);

type ArchetypeFactory = fn(usize) -> EcsResult<Box<dyn ArchetypeStorage>>;

fn make_static<T: ComponentTuple>(capacity: usize) -> EcsResult<Box<dyn ArchetypeStorage>> {
    Ok(Box::new(StaticArchetype::<T>::with_capacity(capacity)?))
}

/// A static archetype declaration waiting for [`WorldBuilder::build`].
struct StaticSlot {
    type_id: TypeId,
    name: &'static str,
    components: Vec<ComponentInfo>,
    make: ArchetypeFactory,
}

/// Declares the static archetypes of a [`World`].
///
/// The set is fixed once built.
#[derive(Default)]
pub struct WorldBuilder {
    config: WorldConfig,
    slots: Vec<StaticSlot>,
}

impl WorldBuilder {
    /// Creates a builder with the default configuration and no archetypes.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares the static archetype `T`. Its id is its declaration index.
    #[must_use]
    pub fn archetype<T: ComponentTuple>(mut self) -> Self {
        self.slots.push(StaticSlot {
            type_id: TypeId::of::<T>(),
            name: type_name::<T>(),
            components: T::component_infos(),
            make: make_static::<T>,
        });
        self
    }

    /// Replaces the configuration.
    #[must_use]
    pub fn config(mut self, config: WorldConfig) -> Self {
        self.config = config;
        self
    }

    /// Validates the declarations and allocates every static archetype.
    ///
    /// # Errors
    ///
    /// - [`EcsError::InvalidConfig`] if the configuration is invalid.
    /// - [`EcsError::DuplicateComponent`] if a declaration repeats a type.
    /// - [`EcsError::DuplicateArchetype`] if two declarations hold the same
    ///   component set, in any order.
    /// - [`EcsError::OutOfMemory`] if a column cannot be allocated.
    pub fn build(self) -> EcsResult<World> {
        self.config.validate()?;

        for (i, slot) in self.slots.iter().enumerate() {
            if let Some(info) = typeset::first_duplicate(&slot.components) {
                return Err(EcsError::DuplicateComponent(info.name()));
            }
            let ids: Vec<ComponentId> = slot.components.iter().map(ComponentInfo::id).collect();
            for earlier in &self.slots[..i] {
                let earlier_ids: Vec<ComponentId> =
                    earlier.components.iter().map(ComponentInfo::id).collect();
                if typeset::same_set(&earlier_ids, &ids) {
                    return Err(EcsError::DuplicateArchetype {
                        first: earlier.name,
                        second: slot.name,
                    });
                }
            }
        }

        let mut world = World::with_config(self.config);
        for slot in &self.slots {
            let id = world.next_archetype_id();
            world
                .archetypes
                .push((slot.make)(world.config.initial_capacity)?);
            world.static_lookup.insert(slot.type_id, id);
        }
        world.static_count = world.archetypes.len();

        tracing::info!(
            "World {} built with {} static archetypes",
            world.id,
            world.static_count
        );
        Ok(world)
    }
}

/// Where a placement writes its values.
#[derive(Clone, Copy)]
enum Slot {
    /// The entity already lives in the destination at this row.
    Replace(usize),
    /// A new row is appended; room is reserved.
    Append,
}

/// The ECS World: archetypes, entity links and the runtime type index.
pub struct World {
    id: u64,
    config: WorldConfig,
    links: Vec<ArchetypeLink>,
    archetypes: Vec<Box<dyn ArchetypeStorage>>,
    static_count: usize,
    /// Declared tuple type to static archetype.
    static_lookup: HashMap<TypeId, ArchetypeId>,
    /// Component to the runtime archetypes holding it, ascending.
    runtime_index: HashMap<ComponentId, Vec<ArchetypeId>>,
    /// `static_extend` targets per (source archetype, extension tuple).
    static_transitions: HashMap<(ArchetypeId, TypeId), Option<ArchetypeId>>,
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}

impl World {
    /// Creates a World without static archetypes.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(WorldConfig::default())
    }

    /// Starts declaring static archetypes.
    #[must_use]
    pub fn builder() -> WorldBuilder {
        WorldBuilder::new()
    }

    fn with_config(config: WorldConfig) -> Self {
        Self {
            id: NEXT_WORLD_ID.fetch_add(1, Ordering::Relaxed),
            links: Vec::with_capacity(config.entity_capacity),
            config,
            archetypes: Vec::new(),
            static_count: 0,
            static_lookup: HashMap::new(),
            runtime_index: HashMap::new(),
            static_transitions: HashMap::new(),
        }
    }

    /// Active configuration.
    #[must_use]
    pub fn config(&self) -> &WorldConfig {
        &self.config
    }

    // =========================================================================
    // Entities
    // =========================================================================

    /// Allocates an entity with a null link. It becomes live on placement.
    ///
    /// # Errors
    ///
    /// [`EcsError::OutOfMemory`] if the link table cannot grow.
    #[allow(clippy::cast_possible_truncation)]
    pub fn new_entity(&mut self) -> EcsResult<Entity> {
        self.links
            .try_reserve(1)
            .map_err(|_| EcsError::OutOfMemory {
                bytes: (self.links.len() + 1).saturating_mul(std::mem::size_of::<ArchetypeLink>()),
            })?;
        let entity = Entity::from_index(self.links.len() as u32);
        self.links.push(ArchetypeLink::NULL);
        Ok(entity)
    }

    /// Removes `entity`, dropping its components. Returns `false` if it was
    /// out of range or already dead.
    pub fn remove(&mut self, entity: Entity) -> bool {
        let Some(link) = self.live_link(entity) else {
            return false;
        };
        self.detach(entity, link);
        true
    }

    /// Reports every dead entity.
    pub fn find_dead(&self, f: impl FnMut(Entity)) -> usize {
        self.find_dead_in(0, usize::MAX, f)
    }

    /// Reports the dead entities among `limit` slots starting at `start_at`.
    /// Returns how many were reported.
    #[allow(clippy::cast_possible_truncation)]
    pub fn find_dead_in(&self, start_at: usize, limit: usize, mut f: impl FnMut(Entity)) -> usize {
        let end = start_at.saturating_add(limit).min(self.links.len());
        let mut found = 0;
        for index in start_at..end {
            if !self.links[index].is_live() {
                f(Entity::from_index(index as u32));
                found += 1;
            }
        }
        found
    }

    /// Checks if `entity` is placed in an archetype.
    #[must_use]
    pub fn is_alive(&self, entity: Entity) -> bool {
        self.live_link(entity).is_some()
    }

    /// Link of `entity`, `None` if out of range.
    #[must_use]
    pub fn link(&self, entity: Entity) -> Option<ArchetypeLink> {
        self.links.get(entity.index() as usize).copied()
    }

    /// Archetype currently holding `entity`.
    #[must_use]
    pub fn entity_archetype(&self, entity: Entity) -> Option<ArchetypeId> {
        self.live_link(entity).map(|link| link.archetype)
    }

    /// Entities ever allocated, dead ones included.
    #[must_use]
    pub fn entity_count(&self) -> usize {
        self.links.len()
    }

    /// Entities currently placed.
    #[must_use]
    pub fn alive_count(&self) -> usize {
        self.archetypes.iter().map(|a| a.len()).sum()
    }

    // =========================================================================
    // Placement
    // =========================================================================

    /// Creates an entity in the static archetype `T`.
    ///
    /// # Errors
    ///
    /// [`EcsError::UndeclaredArchetype`] if `T` was not declared, or
    /// [`EcsError::OutOfMemory`].
    pub fn static_emplace_entity<T: ComponentTuple>(&mut self, values: T) -> EcsResult<Entity> {
        let archetype = self.static_id::<T>()?;
        let entity = self.new_entity()?;
        self.place_static(archetype, entity, values)?;
        Ok(entity)
    }

    /// Places `entity` in the static archetype `T`, leaving its previous
    /// archetype if any. Replaces the row in place if it is already there.
    ///
    /// # Errors
    ///
    /// [`EcsError::UndeclaredArchetype`], [`EcsError::IndexOutOfRange`] for an
    /// unknown entity, or [`EcsError::OutOfMemory`].
    pub fn static_set_entity<T: ComponentTuple>(
        &mut self,
        entity: Entity,
        values: T,
    ) -> EcsResult<()> {
        let archetype = self.static_id::<T>()?;
        self.place_static(archetype, entity, values)
    }

    /// Creates an entity in `archetype`.
    ///
    /// # Errors
    ///
    /// - [`EcsError::IndexOutOfRange`] for an unknown archetype.
    /// - [`EcsError::InvalidArgumentCount`] or [`EcsError::TypeMismatch`] if
    ///   `values` does not match the declared columns in order.
    /// - [`EcsError::OutOfMemory`].
    pub fn emplace_entity<T: ComponentTuple>(
        &mut self,
        archetype: ArchetypeId,
        values: T,
    ) -> EcsResult<Entity> {
        self.check_values(archetype, &T::component_infos())?;
        let entity = self.new_entity()?;
        self.place_unchecked(archetype, entity, values)?;
        Ok(entity)
    }

    /// Places `entity` in `archetype`, leaving its previous archetype if any.
    ///
    /// # Errors
    ///
    /// As [`World::emplace_entity`], plus [`EcsError::IndexOutOfRange`] for an
    /// unknown entity.
    pub fn dynamic_set_entity<T: ComponentTuple>(
        &mut self,
        archetype: ArchetypeId,
        entity: Entity,
        values: T,
    ) -> EcsResult<()> {
        self.check_values(archetype, &T::component_infos())?;
        self.place_unchecked(archetype, entity, values)
    }

    /// Places `entity` in `archetype` with values whose types are only known
    /// at runtime, one box per declared column.
    ///
    /// # Errors
    ///
    /// As [`World::dynamic_set_entity`]. Nothing is consumed on error.
    pub fn set_entity_boxed(
        &mut self,
        archetype: ArchetypeId,
        entity: Entity,
        values: Vec<Box<dyn Any>>,
    ) -> EcsResult<()> {
        let declared = self.storage(archetype)?.descriptor().clone();
        if declared.len() != values.len() {
            return Err(EcsError::InvalidArgumentCount {
                expected: declared.len(),
                got: values.len(),
            });
        }
        for (column, (info, value)) in declared.components().iter().zip(&values).enumerate() {
            if info.id().type_id() != (**value).type_id() {
                return Err(EcsError::TypeMismatch {
                    column,
                    expected: info.name(),
                    found: EcsError::ERASED_TYPE,
                });
            }
        }

        let slot = self.prepare_slot(archetype, entity)?;
        let cells: Vec<*mut u8> = values
            .into_iter()
            .map(|value| Box::into_raw(value).cast::<u8>())
            .collect();
        // SAFETY: Each box holds a value of its column's type (checked above).
        // The values are moved out bitwise, then the boxes are freed without
        // running drop.
        unsafe {
            self.fill_slot(archetype, entity, slot, &cells);
            for (cell, info) in cells.into_iter().zip(declared.components()) {
                if info.size() != 0 {
                    dealloc(cell, info.layout());
                }
            }
        }
        Ok(())
    }

    // =========================================================================
    // Schema
    // =========================================================================

    /// Archetype whose declared component list equals `ids`, same order.
    /// Static archetypes are searched first.
    #[must_use]
    pub fn archetype_exists(&self, ids: &[ComponentId]) -> Option<ArchetypeId> {
        let statics = &self.archetypes[..self.static_count];
        if let Some(index) = statics.iter().position(|a| typeset::same_order(a.ids(), ids)) {
            return Some(self.id_at(index));
        }

        match ids.first() {
            Some(first) => self.runtime_index.get(first)?.iter().copied().find(|id| {
                typeset::same_order(self.archetypes[id.index()].ids(), ids)
            }),
            None => (self.static_count..self.archetypes.len())
                .find(|&index| self.archetypes[index].ids().is_empty())
                .map(|index| self.id_at(index)),
        }
    }

    /// [`World::archetype_exists`] for the tuple `T`.
    #[must_use]
    pub fn archetype_exists_for<T: ComponentTuple>(&self) -> Option<ArchetypeId> {
        self.archetype_exists(&T::component_ids())
    }

    /// Returns the archetype of `T`, registering a runtime one if needed.
    ///
    /// # Errors
    ///
    /// As [`World::add_archetype`].
    pub fn new_archetype<T: ComponentTuple>(&mut self) -> EcsResult<ArchetypeId> {
        self.add_archetype(ArchetypeDescriptor::of::<T>())
    }

    /// Returns the archetype with this exact component list, registering a
    /// runtime one if needed.
    ///
    /// # Errors
    ///
    /// [`EcsError::DuplicateComponent`] if a type repeats, or
    /// [`EcsError::OutOfMemory`].
    pub fn add_archetype(&mut self, descriptor: ArchetypeDescriptor) -> EcsResult<ArchetypeId> {
        if let Some(info) = descriptor.first_duplicate() {
            return Err(EcsError::DuplicateComponent(info.name()));
        }
        if let Some(existing) = self.archetype_exists(&descriptor.ids()) {
            return Ok(existing);
        }

        let id = self.next_archetype_id();
        for component in descriptor.ids() {
            self.runtime_index.entry(component).or_default().push(id);
        }
        tracing::debug!(
            "Registered runtime {} with {} components",
            id,
            descriptor.len()
        );
        let archetype = RuntimeArchetype::new(descriptor, self.config.initial_capacity)?;
        self.archetypes.push(Box::new(archetype));
        Ok(id)
    }

    /// Total archetype count, static and runtime.
    #[must_use]
    pub fn archetype_count(&self) -> usize {
        self.archetypes.len()
    }

    /// Number of static archetypes.
    #[must_use]
    pub fn static_archetype_count(&self) -> usize {
        self.static_count
    }

    /// Checks if `archetype` is a runtime archetype.
    #[must_use]
    pub fn is_runtime_archetype(&self, archetype: ArchetypeId) -> bool {
        self.archetype_kind(archetype) == Some(ArchetypeKind::Runtime)
    }

    /// Static or runtime; `None` for an unknown id.
    #[must_use]
    pub fn archetype_kind(&self, archetype: ArchetypeId) -> Option<ArchetypeKind> {
        Some(self.archetypes.get(archetype.index())?.kind())
    }

    /// Row count of `archetype`.
    #[must_use]
    pub fn archetype_len(&self, archetype: ArchetypeId) -> Option<usize> {
        Some(self.archetypes.get(archetype.index())?.len())
    }

    /// Declared schema of `archetype`.
    #[must_use]
    pub fn archetype_components(&self, archetype: ArchetypeId) -> Option<&ArchetypeDescriptor> {
        Some(self.archetypes.get(archetype.index())?.descriptor())
    }

    /// Typed view of the static archetype `T`.
    #[must_use]
    pub fn static_archetype<T: ComponentTuple>(&self) -> Option<&StaticArchetype<T>> {
        let id = self.static_lookup.get(&TypeId::of::<T>())?;
        self.archetypes[id.index()].as_any().downcast_ref()
    }

    /// Typed mutable view of the static archetype `T`.
    pub fn static_archetype_mut<T: ComponentTuple>(&mut self) -> Option<&mut StaticArchetype<T>> {
        let id = *self.static_lookup.get(&TypeId::of::<T>())?;
        self.archetypes[id.index()].as_any_mut().downcast_mut()
    }

    /// Typed view of a runtime archetype.
    #[must_use]
    pub fn runtime_archetype(&self, archetype: ArchetypeId) -> Option<&RuntimeArchetype> {
        self.archetypes.get(archetype.index())?.as_any().downcast_ref()
    }

    // =========================================================================
    // Migration
    // =========================================================================

    /// Adds the components of `E` to `entity`, moving it to the archetype of
    /// its current components followed by the new ones. Components it already
    /// has are overwritten.
    ///
    /// # Errors
    ///
    /// - [`EcsError::IndexOutOfRange`] for an unknown entity.
    /// - [`EcsError::UninitializedEntity`] if it is not placed.
    /// - [`EcsError::DuplicateComponent`] if `E` repeats a type.
    /// - [`EcsError::OutOfMemory`].
    pub fn extend<E: ComponentTuple>(&mut self, entity: Entity, values: E) -> EcsResult<()> {
        let old = self.require_live(entity)?;
        let extra = E::component_infos();
        if let Some(info) = typeset::first_duplicate(&extra) {
            return Err(EcsError::DuplicateComponent(info.name()));
        }

        let current = self.archetypes[old.archetype.index()].descriptor();
        let target_schema = current.extend(&extra);
        if target_schema.len() == current.len() {
            self.overwrite(old, values);
            return Ok(());
        }

        let target = match self.archetype_exists(&target_schema.ids()) {
            Some(id) => id,
            None => self.add_archetype(target_schema)?,
        };
        self.migrate(entity, old, target, values)
    }

    /// [`World::extend`] restricted to static destinations: the target is the
    /// static archetype holding exactly current ∪ `E`, in any order. Falls
    /// back to [`World::extend`] when there is none.
    ///
    /// # Errors
    ///
    /// As [`World::extend`].
    pub fn static_extend<E: ComponentTuple>(&mut self, entity: Entity, values: E) -> EcsResult<()> {
        let old = self.require_live(entity)?;
        if let Some(info) = typeset::first_duplicate(&E::component_infos()) {
            return Err(EcsError::DuplicateComponent(info.name()));
        }
        let key = (old.archetype, TypeId::of::<E>());
        let target = match self.static_transitions.get(&key) {
            Some(target) => *target,
            None => {
                let target = self.resolve_static_target::<E>(old.archetype);
                self.static_transitions.insert(key, target);
                target
            }
        };

        match target {
            Some(target) if target == old.archetype => {
                self.overwrite(old, values);
                Ok(())
            }
            Some(target) => self.migrate(entity, old, target, values),
            None => self.extend(entity, values),
        }
    }

    /// Removes the components of `R` from `entity`, moving it to the archetype
    /// of what remains. Types it lacks are ignored; removing everything
    /// removes the entity.
    ///
    /// # Errors
    ///
    /// [`EcsError::IndexOutOfRange`], [`EcsError::UninitializedEntity`] or
    /// [`EcsError::OutOfMemory`].
    pub fn shrink<R: ComponentTuple>(&mut self, entity: Entity) -> EcsResult<()> {
        let old = self.require_live(entity)?;
        let current = self.archetypes[old.archetype.index()].descriptor();
        let remaining = current.without(&R::component_ids());
        if remaining.len() == current.len() {
            return Ok(());
        }
        if remaining.is_empty() {
            self.detach(entity, old);
            return Ok(());
        }

        let target = match self.archetype_exists(&remaining.ids()) {
            Some(id) => id,
            None => self.add_archetype(remaining)?,
        };
        self.archetypes[target.index()].reserve_row()?;
        // SAFETY: Every target column comes from the source row.
        unsafe { self.move_row(entity, old, target, &[], &[]) };
        Ok(())
    }

    // =========================================================================
    // Access
    // =========================================================================

    /// Borrows the queried components of `entity`. `None` if it is dead, lacks
    /// one of them, or the query names a type twice.
    pub fn get<Q: Query>(&mut self, entity: Entity) -> Option<Q::Item<'_>> {
        self.try_get::<Q>(entity).ok().flatten()
    }

    /// [`World::get`] that reports aliasing queries.
    ///
    /// # Errors
    ///
    /// [`EcsError::DuplicateComponent`] if `Q` names a type twice.
    pub fn try_get<Q: Query>(&mut self, entity: Entity) -> EcsResult<Option<Q::Item<'_>>> {
        let ids = unique_ids::<Q>()?;
        let Some(link) = self.live_link(entity) else {
            return Ok(None);
        };
        Ok(self.fetch_at::<Q>(link, &ids))
    }

    /// [`World::get`] answering only while `entity` lives in the static
    /// archetype `T`.
    pub fn static_get<T: ComponentTuple, Q: Query>(&mut self, entity: Entity) -> Option<Q::Item<'_>> {
        let ids = unique_ids::<Q>().ok()?;
        let archetype = *self.static_lookup.get(&TypeId::of::<T>())?;
        let link = self.live_link(entity).filter(|l| l.archetype == archetype)?;
        self.fetch_at::<Q>(link, &ids)
    }

    /// Shared borrow of one component.
    #[must_use]
    pub fn component<C: Component>(&self, entity: Entity) -> Option<&C> {
        let link = self.live_link(entity)?;
        let storage = &self.archetypes[link.archetype.index()];
        let column = storage.column_index(ComponentId::of::<C>())?;
        let base = storage.column_ptr(column)?;
        // SAFETY: The column stores `C` and `row` is live.
        Some(unsafe { &*base.cast::<C>().add(link.row) })
    }

    /// Checks if any component of `T` is dirty for `entity`.
    #[must_use]
    pub fn is_dirty<T: ComponentTuple>(&self, entity: Entity) -> bool {
        let Some(link) = self.live_link(entity) else {
            return false;
        };
        let storage = &self.archetypes[link.archetype.index()];
        T::component_ids().into_iter().any(|id| {
            storage
                .column_index(id)
                .is_some_and(|column| storage.dirty(column).get(link.row))
        })
    }

    /// Sets the dirty bit of `C` for `entity`. Returns `false` if the entity
    /// is dead or has no `C`.
    pub fn mark_dirty<C: Component>(&mut self, entity: Entity) -> bool {
        let Some(link) = self.live_link(entity) else {
            return false;
        };
        let storage = &mut self.archetypes[link.archetype.index()];
        let Some(column) = storage.column_index(ComponentId::of::<C>()) else {
            return false;
        };
        storage.dirty_mut(column).set(link.row, true);
        true
    }

    // =========================================================================
    // Systems
    // =========================================================================

    /// Builds a system over every archetype holding the components of `Q`.
    ///
    /// # Errors
    ///
    /// [`EcsError::DuplicateComponent`] if `Q` names a type twice.
    pub fn make_system<Q: Query>(&self) -> EcsResult<System<Q>> {
        System::new(self, false)
    }

    /// Builds a system over the static archetypes holding the components of
    /// `Q`; runtime archetypes are never visited.
    ///
    /// # Errors
    ///
    /// As [`World::make_system`].
    pub fn make_static_system<Q: Query>(&self) -> EcsResult<System<Q>> {
        System::new(self, true)
    }

    // =========================================================================
    // Crate internals
    // =========================================================================

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn live_link(&self, entity: Entity) -> Option<ArchetypeLink> {
        self.link(entity).filter(|link| link.is_live())
    }

    pub(crate) fn storage_at(&self, index: usize) -> Option<&dyn ArchetypeStorage> {
        self.archetypes.get(index).map(|a| &**a)
    }

    pub(crate) fn storages_mut(&mut self) -> &mut [Box<dyn ArchetypeStorage>] {
        &mut self.archetypes
    }

    /// Runtime archetypes holding every component of `ids`, ascending.
    pub(crate) fn runtime_candidates(&self, ids: &[ComponentId]) -> Vec<ArchetypeId> {
        let Some((first, rest)) = ids.split_first() else {
            return (self.static_count..self.archetypes.len())
                .map(|index| self.id_at(index))
                .collect();
        };
        let mut candidates = self.runtime_index.get(first).cloned().unwrap_or_default();
        for id in rest {
            match self.runtime_index.get(id) {
                Some(list) => typeset::retain_sorted(&mut candidates, list),
                None => return Vec::new(),
            }
        }
        candidates
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    #[allow(clippy::cast_possible_truncation)]
    fn id_at(&self, index: usize) -> ArchetypeId {
        debug_assert!(index < self.archetypes.len());
        ArchetypeId::new(index as u32)
    }

    #[allow(clippy::cast_possible_truncation)]
    fn next_archetype_id(&self) -> ArchetypeId {
        ArchetypeId::new(self.archetypes.len() as u32)
    }

    fn static_id<T: ComponentTuple>(&self) -> EcsResult<ArchetypeId> {
        self.static_lookup
            .get(&TypeId::of::<T>())
            .copied()
            .ok_or(EcsError::UndeclaredArchetype(type_name::<T>()))
    }

    fn storage(&self, archetype: ArchetypeId) -> EcsResult<&dyn ArchetypeStorage> {
        self.storage_at(archetype.index())
            .ok_or(EcsError::IndexOutOfRange {
                index: archetype.index(),
                len: self.archetypes.len(),
            })
    }

    fn link_of(&self, entity: Entity) -> EcsResult<ArchetypeLink> {
        self.link(entity).ok_or(EcsError::IndexOutOfRange {
            index: entity.index() as usize,
            len: self.links.len(),
        })
    }

    fn require_live(&self, entity: Entity) -> EcsResult<ArchetypeLink> {
        let link = self.link_of(entity)?;
        if link.is_live() {
            Ok(link)
        } else {
            Err(EcsError::UninitializedEntity(entity))
        }
    }

    /// Checks `values` against the declared columns of `archetype`, in order.
    fn check_values(&self, archetype: ArchetypeId, values: &[ComponentInfo]) -> EcsResult<()> {
        let declared = self.storage(archetype)?.descriptor().components();
        if declared.len() != values.len() {
            return Err(EcsError::InvalidArgumentCount {
                expected: declared.len(),
                got: values.len(),
            });
        }
        for (column, (expected, found)) in declared.iter().zip(values).enumerate() {
            if expected.id() != found.id() {
                return Err(EcsError::TypeMismatch {
                    column,
                    expected: expected.name(),
                    found: found.name(),
                });
            }
        }
        Ok(())
    }

    /// Places values through the typed columns of the static archetype `T`.
    fn place_static<T: ComponentTuple>(
        &mut self,
        archetype: ArchetypeId,
        entity: Entity,
        values: T,
    ) -> EcsResult<()> {
        let slot = self.prepare_slot(archetype, entity)?;
        let table = self.archetypes[archetype.index()]
            .as_any_mut()
            .downcast_mut::<StaticArchetype<T>>()
            .ok_or(EcsError::UndeclaredArchetype(type_name::<T>()))?;
        match slot {
            Slot::Replace(row) => table.emplace_at(row, values),
            Slot::Append => {
                let row = table.new_entity(entity, values)?;
                self.links[entity.index() as usize] = ArchetypeLink::new(archetype, row);
            }
        }
        Ok(())
    }

    /// Places typed values. `archetype` must exist and declare exactly the
    /// columns of `T` in order.
    fn place_unchecked<T: ComponentTuple>(
        &mut self,
        archetype: ArchetypeId,
        entity: Entity,
        values: T,
    ) -> EcsResult<()> {
        let slot = self.prepare_slot(archetype, entity)?;
        // SAFETY: The destination columns are the types of `T`, in order.
        values.with_raw(|cells| unsafe { self.fill_slot(archetype, entity, slot, cells) });
        Ok(())
    }

    /// Reserves the destination row before anything is consumed, then frees
    /// the entity's previous row.
    fn prepare_slot(&mut self, archetype: ArchetypeId, entity: Entity) -> EcsResult<Slot> {
        let old = self.link_of(entity)?;
        if old.is_live() && old.archetype == archetype {
            return Ok(Slot::Replace(old.row));
        }
        self.archetypes[archetype.index()].reserve_row()?;
        if old.is_live() {
            self.detach(entity, old);
        }
        Ok(Slot::Append)
    }

    /// # Safety
    ///
    /// `cells` hold one value per declared column of `archetype`, in order;
    /// ownership moves in. `slot` comes from [`World::prepare_slot`].
    unsafe fn fill_slot(
        &mut self,
        archetype: ArchetypeId,
        entity: Entity,
        slot: Slot,
        cells: &[*mut u8],
    ) {
        let storage = &mut self.archetypes[archetype.index()];
        match slot {
            // SAFETY: Forwarded from the caller.
            Slot::Replace(row) => unsafe { storage.replace_moved(row, cells) },
            Slot::Append => {
                // SAFETY: Forwarded from the caller; the row is reserved.
                let row = unsafe { storage.push_moved(entity, cells) };
                self.links[entity.index() as usize] = ArchetypeLink::new(archetype, row);
            }
        }
    }

    /// Drops the row at `link`, fixes the link of the row swapped into its
    /// place and nulls the link of `entity`.
    fn detach(&mut self, entity: Entity, link: ArchetypeLink) {
        let moved = self.archetypes[link.archetype.index()].swap_remove(link.row);
        if let Some(moved) = moved {
            self.links[moved.index() as usize].row = link.row;
        }
        self.links[entity.index() as usize] = ArchetypeLink::NULL;
    }

    /// Overwrites components the entity already has, in place.
    fn overwrite<E: ComponentTuple>(&mut self, link: ArchetypeLink, values: E) {
        let ids = E::component_ids();
        let storage = &mut self.archetypes[link.archetype.index()];
        values.with_raw(|cells| {
            for (id, &cell) in ids.iter().zip(cells) {
                if let Some(column) = storage.column_index(*id) {
                    // SAFETY: The column stores this type and the row is live.
                    unsafe { storage.replace_cell_moved(column, link.row, cell) };
                }
            }
        });
    }

    /// Moves `entity` from `old` to `target`, taking the columns named by `E`
    /// from `values` and the rest from the old row.
    fn migrate<E: ComponentTuple>(
        &mut self,
        entity: Entity,
        old: ArchetypeLink,
        target: ArchetypeId,
        values: E,
    ) -> EcsResult<()> {
        self.archetypes[target.index()].reserve_row()?;
        let ids = E::component_ids();
        // SAFETY: `target` holds exactly the old columns plus `E`.
        values.with_raw(|cells| unsafe { self.move_row(entity, old, target, &ids, cells) });
        Ok(())
    }

    /// Builds the destination row in `target` column order: a value from
    /// `extra` if its id is listed there, else the old row's value. Old values
    /// that are overridden or not carried over are dropped. The old row is
    /// then swap-removed and both affected links are written once.
    ///
    /// # Safety
    ///
    /// Every column of `target` is in `extra_ids` or in the old archetype,
    /// every id of `extra_ids` is a column of `target`, `extra` holds values
    /// of those types, and a row of `target` is reserved.
    unsafe fn move_row(
        &mut self,
        entity: Entity,
        old: ArchetypeLink,
        target: ArchetypeId,
        extra_ids: &[ComponentId],
        extra: &[*mut u8],
    ) {
        let (src, dst) = pair_mut(&mut self.archetypes, old.archetype.index(), target.index());
        let src_ids = src.ids().to_vec();
        let dst_ids = dst.ids().to_vec();

        let mut cells = Vec::with_capacity(dst_ids.len());
        for id in &dst_ids {
            let cell = match typeset::position(extra_ids, id) {
                Some(i) => Some(extra[i]),
                None => typeset::position(&src_ids, id)
                    .and_then(|column| src.cell_ptr_mut(column, old.row)),
            };
            cells.extend(cell);
        }
        debug_assert_eq!(cells.len(), dst_ids.len(), "migration column mismatch");

        // SAFETY: Forwarded from the caller.
        let row = unsafe { dst.push_moved(entity, &cells) };
        for (column, id) in src_ids.iter().enumerate() {
            if !dst_ids.contains(id) || extra_ids.contains(id) {
                // SAFETY: The value was not moved into `dst`.
                unsafe { src.drop_cell(column, old.row) };
            }
        }
        // SAFETY: Every value of the old row was moved or dropped above.
        let moved = unsafe { src.forget_swap_remove(old.row) };

        if let Some(moved) = moved {
            self.links[moved.index() as usize].row = old.row;
        }
        self.links[entity.index() as usize] = ArchetypeLink::new(target, row);
        tracing::trace!(
            "Migrated entity {} from {} to {}",
            entity,
            old.archetype,
            target
        );
    }

    fn resolve_static_target<E: ComponentTuple>(&self, source: ArchetypeId) -> Option<ArchetypeId> {
        let wanted = typeset::union(self.archetypes[source.index()].ids(), &E::component_ids());
        let target = (0..self.static_count)
            .find(|&index| typeset::same_set(self.archetypes[index].ids(), &wanted))
            .map(|index| self.id_at(index));
        tracing::debug!(
            "Static extension of {} by {}: {:?}",
            source,
            type_name::<E>(),
            target
        );
        target
    }

    fn fetch_at<Q: Query>(&mut self, link: ArchetypeLink, ids: &[ComponentId]) -> Option<Q::Item<'_>> {
        let storage = self.archetypes.get_mut(link.archetype.index())?;
        let mut bases = Vec::with_capacity(ids.len());
        for id in ids {
            let column = storage.column_index(*id)?;
            bases.push(storage.column_ptr_mut(column)?);
        }
        // SAFETY: The bases are columns of the queried types, pairwise
        // distinct, and `row` is live.
        Some(unsafe { Q::fetch(&bases, link.row) })
    }
}

/// Component ids of `Q`, rejecting queries that name a type twice.
pub(crate) fn unique_ids<Q: Query>() -> EcsResult<Vec<ComponentId>> {
    let ids = Q::component_ids();
    if let Some(duplicate) = typeset::first_duplicate(&ids) {
        let name = typeset::position(&ids, duplicate)
            .and_then(|i| Q::component_names().get(i).copied())
            .unwrap_or("unknown");
        tracing::warn!("Rejected aliasing query over {}", name);
        return Err(EcsError::DuplicateComponent(name));
    }
    Ok(ids)
}

/// Two distinct archetypes, mutably.
fn pair_mut(
    archetypes: &mut [Box<dyn ArchetypeStorage>],
    a: usize,
    b: usize,
) -> (&mut Box<dyn ArchetypeStorage>, &mut Box<dyn ArchetypeStorage>) {
    debug_assert_ne!(a, b);
    if a < b {
        let (head, tail) = archetypes.split_at_mut(b);
        (&mut head[a], &mut tail[0])
    } else {
        let (head, tail) = archetypes.split_at_mut(a);
        (&mut tail[0], &mut head[b])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    #[derive(Debug, Clone, Copy, PartialEq)]
    struct Position(f32, f32);

    #[derive(Debug, Clone, Copy, PartialEq)]
    struct Velocity(f32, f32);

    #[derive(Debug, Clone, Copy, PartialEq)]
    struct Health(u32);

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

    fn physics_world() -> World {
        World::builder()
            .archetype::<(Position, Velocity)>()
            .archetype::<(Position, Velocity, Health)>()
            .build()
            .unwrap()
    }

    #[test]
    fn test_builder_assigns_ids_in_order() {
        let world = physics_world();
        assert_eq!(world.static_archetype_count(), 2);
        assert_eq!(
            world.archetype_exists_for::<(Position, Velocity, Health)>(),
            Some(ArchetypeId::new(1))
        );
        assert_eq!(world.archetype_kind(ArchetypeId::new(0)), Some(ArchetypeKind::Static));
    }

    #[test]
    fn test_builder_rejects_duplicates() {
        let err = World::builder().archetype::<(u8, u8)>().build().err();
        assert!(matches!(err, Some(EcsError::DuplicateComponent(_))));

        let err = World::builder()
            .archetype::<(u8, u16)>()
            .archetype::<(u16, u8)>()
            .build()
            .err();
        assert!(matches!(err, Some(EcsError::DuplicateArchetype { .. })));
    }

    #[test]
    fn test_static_set_replaces_in_place() {
        let mut world = physics_world();
        let e = world
            .static_emplace_entity((Position(1.0, 2.0), Velocity(0.0, 0.0)))
            .unwrap();
        world
            .static_set_entity(e, (Position(5.0, 5.0), Velocity(1.0, 1.0)))
            .unwrap();
        assert_eq!(world.alive_count(), 1);
        assert_eq!(world.component::<Position>(e), Some(&Position(5.0, 5.0)));
    }

    #[test]
    fn test_static_set_leaves_previous_archetype() {
        let mut world = physics_world();
        let e = world
            .static_emplace_entity((Position(1.0, 2.0), Velocity(0.0, 0.0)))
            .unwrap();
        world
            .static_set_entity(e, (Position(3.0, 3.0), Velocity(0.0, 0.0), Health(7)))
            .unwrap();
        assert_eq!(world.archetype_len(ArchetypeId::new(0)), Some(0));
        assert_eq!(world.entity_archetype(e), Some(ArchetypeId::new(1)));
    }

    #[test]
    fn test_undeclared_static_archetype() {
        let mut world = physics_world();
        let err = world.static_emplace_entity((Health(1),)).unwrap_err();
        assert!(matches!(err, EcsError::UndeclaredArchetype(_)));
    }

    #[test]
    fn test_emplace_validates_values() {
        let mut world = World::new();
        let id = world.new_archetype::<(i32, String)>().unwrap();

        let err = world.emplace_entity(id, (1i32,)).unwrap_err();
        assert_eq!(err, EcsError::InvalidArgumentCount { expected: 2, got: 1 });

        let err = world.emplace_entity(id, ("x".to_string(), 1i32)).unwrap_err();
        assert!(matches!(err, EcsError::TypeMismatch { column: 0, .. }));

        let err = world
            .emplace_entity(ArchetypeId::new(9), (1i32,))
            .unwrap_err();
        assert_eq!(err, EcsError::IndexOutOfRange { index: 9, len: 1 });
        assert_eq!(world.entity_count(), 0);
    }

    #[test]
    fn test_archetype_exists_is_order_sensitive() {
        let mut world = World::new();
        let ab = world.new_archetype::<(u8, u16)>().unwrap();
        assert_eq!(world.new_archetype::<(u8, u16)>().unwrap(), ab);
        assert_eq!(world.archetype_exists_for::<(u16, u8)>(), None);
        let ba = world.new_archetype::<(u16, u8)>().unwrap();
        assert_ne!(ab, ba);
        assert!(world.is_runtime_archetype(ba));
    }

    #[test]
    fn test_empty_archetype() {
        let mut world = World::new();
        let empty = world.add_archetype(ArchetypeDescriptor::new()).unwrap();
        assert_eq!(world.archetype_exists(&[]), Some(empty));
        assert_eq!(world.add_archetype(ArchetypeDescriptor::new()).unwrap(), empty);
    }

    #[test]
    fn test_add_archetype_rejects_duplicates() {
        let mut world = World::new();
        let descriptor = ArchetypeDescriptor::new().with::<u8>().with::<u8>();
        assert!(matches!(
            world.add_archetype(descriptor),
            Err(EcsError::DuplicateComponent(_))
        ));
    }

    #[test]
    fn test_extend_creates_runtime_target() {
        let mut world = physics_world();
        let e = world
            .static_emplace_entity((Position(1.0, 2.0), Velocity(3.0, 4.0)))
            .unwrap();
        world.extend(e, ("tag".to_string(),)).unwrap();

        let archetype = world.entity_archetype(e).unwrap();
        assert!(world.is_runtime_archetype(archetype));
        assert_eq!(
            world.archetype_components(archetype).unwrap().ids(),
            vec![
                ComponentId::of::<Position>(),
                ComponentId::of::<Velocity>(),
                ComponentId::of::<String>()
            ]
        );
        let (pos, tag) = world.get::<(&Position, &String)>(e).unwrap();
        assert_eq!(*pos, Position(1.0, 2.0));
        assert_eq!(tag, "tag");
        assert_eq!(world.archetype_len(ArchetypeId::new(0)), Some(0));
    }

    #[test]
    fn test_extend_existing_component_overwrites() {
        let mut world = physics_world();
        let e = world
            .static_emplace_entity((Position(1.0, 2.0), Velocity(3.0, 4.0)))
            .unwrap();
        world.extend(e, (Velocity(9.0, 9.0),)).unwrap();
        assert_eq!(world.entity_archetype(e), Some(ArchetypeId::new(0)));
        assert_eq!(world.component::<Velocity>(e), Some(&Velocity(9.0, 9.0)));
    }

    #[test]
    fn test_extend_errors() {
        let mut world = physics_world();
        let e = world.new_entity().unwrap();
        assert_eq!(
            world.extend(e, (Health(1),)),
            Err(EcsError::UninitializedEntity(e))
        );
        assert!(matches!(
            world.extend(Entity::from_index(50), (Health(1),)),
            Err(EcsError::IndexOutOfRange { index: 50, .. })
        ));
    }

    #[test]
    fn test_static_extend_prefers_static_target() {
        let mut world = World::builder()
            .archetype::<(Position, Velocity)>()
            .archetype::<(Health, Velocity, Position)>()
            .build()
            .unwrap();
        let a = world
            .static_emplace_entity((Position(1.0, 1.0), Velocity(2.0, 2.0)))
            .unwrap();
        let b = world
            .static_emplace_entity((Position(5.0, 5.0), Velocity(6.0, 6.0)))
            .unwrap();

        world.static_extend(a, (Health(10),)).unwrap();
        world.static_extend(b, (Health(20),)).unwrap();

        assert_eq!(world.entity_archetype(a), Some(ArchetypeId::new(1)));
        assert_eq!(world.archetype_count(), 2);
        let (hp, pos) = world.get::<(&Health, &Position)>(b).unwrap();
        assert_eq!((*hp, *pos), (Health(20), Position(5.0, 5.0)));
    }

    #[test]
    fn test_static_extend_falls_back_to_runtime() {
        let mut world = physics_world();
        let e = world
            .static_emplace_entity((Position(1.0, 1.0), Velocity(2.0, 2.0)))
            .unwrap();
        world.static_extend(e, (7u64,)).unwrap();
        assert!(world.is_runtime_archetype(world.entity_archetype(e).unwrap()));
        assert_eq!(world.component::<u64>(e), Some(&7));
    }

    #[test]
    fn test_migration_fixes_swapped_link() {
        let mut world = physics_world();
        let first = world
            .static_emplace_entity((Position(0.0, 0.0), Velocity(0.0, 0.0)))
            .unwrap();
        let last = world
            .static_emplace_entity((Position(1.0, 1.0), Velocity(1.0, 1.0)))
            .unwrap();
        world.static_extend(first, (Health(3),)).unwrap();
        assert_eq!(world.link(last).unwrap().row, 0);
        assert_eq!(world.component::<Position>(last), Some(&Position(1.0, 1.0)));
    }

    #[test]
    fn test_shrink() {
        let mut world = physics_world();
        let e = world
            .static_emplace_entity((Position(1.0, 2.0), Velocity(3.0, 4.0), Health(5)))
            .unwrap();
        world.shrink::<(Health,)>(e).unwrap();
        assert_eq!(world.entity_archetype(e), Some(ArchetypeId::new(0)));
        assert_eq!(world.component::<Velocity>(e), Some(&Velocity(3.0, 4.0)));

        world.shrink::<(u8,)>(e).unwrap();
        assert_eq!(world.entity_archetype(e), Some(ArchetypeId::new(0)));

        world.shrink::<(Position, Velocity)>(e).unwrap();
        assert!(!world.is_alive(e));
    }

    #[test]
    fn test_set_entity_boxed() {
        let mut world = World::new();
        let id = world.new_archetype::<(u32, String)>().unwrap();
        let e = world.new_entity().unwrap();

        let err = world
            .set_entity_boxed(id, e, vec![Box::new("x".to_string()), Box::new(1u32)])
            .unwrap_err();
        assert_eq!(
            err,
            EcsError::TypeMismatch {
                column: 0,
                expected: std::any::type_name::<u32>(),
                found: EcsError::ERASED_TYPE,
            }
        );
        assert!(err.to_string().ends_with("found <erased>"));

        world
            .set_entity_boxed(id, e, vec![Box::new(1u32), Box::new("boxed".to_string())])
            .unwrap();
        assert_eq!(world.component::<String>(e).map(String::as_str), Some("boxed"));
    }

    #[test]
    fn test_aliasing_query_is_rejected() {
        let mut world = physics_world();
        let e = world
            .static_emplace_entity((Position(1.0, 2.0), Velocity(3.0, 4.0)))
            .unwrap();
        assert!(matches!(
            world.try_get::<(&mut Position, &Position)>(e),
            Err(EcsError::DuplicateComponent(_))
        ));
        assert!(world.get::<(&mut Position, &Position)>(e).is_none());
    }

    #[test]
    fn test_static_get_checks_archetype() {
        let mut world = physics_world();
        let e = world
            .static_emplace_entity((Position(1.0, 2.0), Velocity(3.0, 4.0)))
            .unwrap();
        assert!(world.static_get::<(Position, Velocity), &Position>(e).is_some());
        assert!(world
            .static_get::<(Position, Velocity, Health), &Position>(e)
            .is_none());
    }

    #[test]
    fn test_mark_dirty() {
        let mut world = physics_world();
        let e = world
            .static_emplace_entity((Position(1.0, 2.0), Velocity(3.0, 4.0)))
            .unwrap();
        world
            .static_archetype_mut::<(Position, Velocity)>()
            .unwrap()
            .mark_dirty_range::<Position>(0, 1, false);
        world
            .static_archetype_mut::<(Position, Velocity)>()
            .unwrap()
            .mark_dirty_range::<Velocity>(0, 1, false);
        assert!(!world.is_dirty::<(Position, Velocity)>(e));
        assert!(world.mark_dirty::<Velocity>(e));
        assert!(world.is_dirty::<(Position, Velocity)>(e));
        assert!(!world.mark_dirty::<Health>(e));
    }

    #[test]
    fn test_find_dead_in_window() {
        let mut world = physics_world();
        let entities: Vec<Entity> = (0..6u8)
            .map(|i| {
                world
                    .static_emplace_entity((Position(f32::from(i), 0.0), Velocity(0.0, 0.0)))
                    .unwrap()
            })
            .collect();
        world.remove(entities[1]);
        world.remove(entities[4]);

        let mut dead = Vec::new();
        assert_eq!(world.find_dead_in(2, 3, |e| dead.push(e)), 1);
        assert_eq!(dead, vec![entities[4]]);
        assert_eq!(world.find_dead(|_| {}), 2);
        assert_eq!(world.find_dead_in(10, 5, |_| {}), 0);
    }

    #[test]
    fn test_drops_balance_across_operations() {
        let live = Rc::new(Cell::new(0));
        {
            let mut world = World::builder().archetype::<(Tracked, u8)>().build().unwrap();
            let a = world.static_emplace_entity((Tracked::new(&live), 1u8)).unwrap();
            let b = world.static_emplace_entity((Tracked::new(&live), 2u8)).unwrap();
            world.static_set_entity(a, (Tracked::new(&live), 3u8)).unwrap();
            assert_eq!(live.get(), 2);

            world.extend(b, (Tracked::new(&live),)).unwrap();
            assert_eq!(live.get(), 2);
            world.extend(b, ("x".to_string(),)).unwrap();
            assert_eq!(live.get(), 2);
            world.shrink::<(Tracked,)>(b).unwrap();
            assert_eq!(live.get(), 1);

            world.remove(a);
            assert_eq!(live.get(), 0);
            world.static_set_entity(a, (Tracked::new(&live), 4u8)).unwrap();
        }
        assert_eq!(live.get(), 0);
    }
}
