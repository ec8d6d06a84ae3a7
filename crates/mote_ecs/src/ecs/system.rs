//! # Systems
//!
//! A [`System`] is a resolved view over every archetype holding a query's
//! components. It is built once from a World and run any number of times:
//!
//! ```rust,ignore
//! let mut movement = world.make_system::<(&mut Position, &Velocity)>()?;
//! movement.run(&mut world, RunFlags::MARK_DIRTY, |(pos, vel)| {
//!     pos.x += vel.x;
//! })?;
//! ```
//!
//! ## Dirty filtering
//!
//! `ONLY_DIRTY` and `STRICT_ONLY_DIRTY` scan the dirty bitsets of the queried
//! columns one 64-row word at a time and only visit rows whose combined word
//! has a bit set. Visited bits are consumed unless `KEEP_DIRTY` is given.

// SAFETY: Column base pointers are fetched per archetype while the World is
// mutably borrowed; queried columns are pairwise distinct and rows are below
// the archetype length.
#![allow(unsafe_code)]

use std::marker::PhantomData;

use bitflags::bitflags;

use super::archetype::ArchetypeStorage;
use super::component::ComponentId;
use super::dirty::ROWS_PER_WORD;
use super::entity::{ArchetypeId, Entity};
use super::query::{OwnedQuery, Query};
use super::typeset;
use super::world::{unique_ids, World};
use crate::error::{EcsError, EcsResult};

bitflags! {
    /// Options of a system pass. Combine with `|`.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct RunFlags: u8 {
        /// The callback also receives the row's entity. Accepted by
        /// [`System::run_with_ids`] and [`System::run_safe`], whose callbacks
        /// always take the entity; [`System::run`] rejects it.
        const WITH_IDS = 1 << 0;
        /// Visit rows dirty in at least one queried column.
        const ONLY_DIRTY = 1 << 1;
        /// Visit rows dirty in every queried column.
        const STRICT_ONLY_DIRTY = 1 << 2;
        /// Leave dirty bits set after a filtered pass.
        const KEEP_DIRTY = 1 << 3;
        /// After an unfiltered pass, mark every visited row dirty in the
        /// columns borrowed as `&mut`.
        const MARK_DIRTY = 1 << 4;
        /// Copy values out, run the callback with the World, write back.
        const SAFE_INSERT = 1 << 5;
    }
}

impl RunFlags {
    fn filtered(self) -> bool {
        self.intersects(Self::ONLY_DIRTY | Self::STRICT_ONLY_DIRTY)
    }

    fn consumes(self) -> bool {
        self.filtered() && !self.contains(Self::KEEP_DIRTY)
    }

    fn marks(self) -> bool {
        !self.filtered() && self.contains(Self::MARK_DIRTY)
    }
}

/// One archetype the system visits, with the positions of the queried
/// components in its column order.
#[derive(Debug, Clone)]
struct Candidate {
    archetype: ArchetypeId,
    columns: Vec<usize>,
}

/// Where `run_safe` found an entity: fresh column bases, its row and the
/// positions of the queried components.
struct Located {
    bases: Vec<*mut u8>,
    row: usize,
    columns: Vec<usize>,
}

/// Cached query over the archetypes of one World.
pub struct System<Q: Query> {
    world_id: u64,
    static_only: bool,
    ids: Vec<ComponentId>,
    mutable: Vec<bool>,
    candidates: Vec<Candidate>,
    /// Archetypes already examined; later ones are resolved on the next run.
    resolved: usize,
    _query: PhantomData<fn() -> Q>,
}

impl<Q: Query> System<Q> {
    pub(crate) fn new(world: &World, static_only: bool) -> EcsResult<Self> {
        let mut system = Self {
            world_id: world.id(),
            static_only,
            ids: unique_ids::<Q>()?,
            mutable: Q::mutability(),
            candidates: Vec::new(),
            resolved: 0,
            _query: PhantomData,
        };
        system.refresh(world);
        Ok(system)
    }

    /// Archetypes currently visited, in visiting order.
    #[must_use]
    pub fn archetypes(&self) -> Vec<ArchetypeId> {
        self.candidates.iter().map(|c| c.archetype).collect()
    }

    /// Rows an unfiltered pass would visit right now.
    ///
    /// # Errors
    ///
    /// [`EcsError::WorldMismatch`] if `world` is not the one this system was
    /// built from.
    pub fn row_count(&mut self, world: &World) -> EcsResult<usize> {
        self.check_world(world)?;
        self.refresh(world);
        Ok(self
            .candidates
            .iter()
            .filter_map(|c| world.storage_at(c.archetype.index()))
            .map(|storage| storage.len())
            .sum())
    }

    /// Calls `f` with the queried components of every matching row.
    ///
    /// # Errors
    ///
    /// [`EcsError::WorldMismatch`] for a foreign World, or
    /// [`EcsError::UnsupportedFlags`] if `SAFE_INSERT` is set (use
    /// [`System::run_safe`]) or `WITH_IDS` is set (use
    /// [`System::run_with_ids`]).
    pub fn run<'w, F>(&mut self, world: &'w mut World, flags: RunFlags, mut f: F) -> EcsResult<()>
    where
        F: FnMut(Q::Item<'w>),
    {
        if flags.contains(RunFlags::WITH_IDS) {
            return Err(EcsError::UnsupportedFlags(flags));
        }
        self.run_with_ids(world, flags, |_, item| f(item))
    }

    /// [`System::run`] that also passes each row's entity. `WITH_IDS` may be
    /// set or left out.
    ///
    /// # Errors
    ///
    /// [`EcsError::WorldMismatch`] for a foreign World, or
    /// [`EcsError::UnsupportedFlags`] if `SAFE_INSERT` is set.
    pub fn run_with_ids<'w, F>(
        &mut self,
        world: &'w mut World,
        flags: RunFlags,
        mut f: F,
    ) -> EcsResult<()>
    where
        F: FnMut(Entity, Q::Item<'w>),
    {
        self.check_world(world)?;
        if flags.contains(RunFlags::SAFE_INSERT) {
            return Err(EcsError::UnsupportedFlags(flags));
        }
        self.refresh(world);

        let strict = flags.contains(RunFlags::STRICT_ONLY_DIRTY);
        let storages = world.storages_mut();
        for candidate in &self.candidates {
            let storage = &mut storages[candidate.archetype.index()];
            let len = storage.len();
            if len == 0 {
                continue;
            }
            let Some(bases) = column_bases(&mut **storage, &candidate.columns) else {
                continue;
            };

            if flags.filtered() {
                for word in 0..len.div_ceil(ROWS_PER_WORD) {
                    let mut bits = dirty_word(&**storage, &candidate.columns, word, len, strict);
                    if flags.consumes() {
                        for &column in &candidate.columns {
                            storage.dirty_mut(column).clear_word_bits(word, bits);
                        }
                    }
                    while bits != 0 {
                        let row = word * ROWS_PER_WORD + bits.trailing_zeros() as usize;
                        bits &= bits - 1;
                        let entity = storage.entities()[row];
                        // SAFETY: `row < len` and the bases address the
                        // queried columns.
                        f(entity, unsafe { Q::fetch(&bases, row) });
                    }
                }
            } else {
                for row in 0..len {
                    let entity = storage.entities()[row];
                    // SAFETY: As above.
                    f(entity, unsafe { Q::fetch(&bases, row) });
                }
                if flags.marks() {
                    for (&column, &mutable) in candidate.columns.iter().zip(&self.mutable) {
                        if mutable {
                            storage.dirty_mut(column).set_range(0, len, true);
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Checks `world` is the World this system was built from.
    fn check_world(&self, world: &World) -> EcsResult<()> {
        if world.id() == self.world_id {
            Ok(())
        } else {
            Err(EcsError::WorldMismatch)
        }
    }

    /// Resolves archetypes created since the last call.
    fn refresh(&mut self, world: &World) {
        let total = world.archetype_count();
        if self.resolved == total {
            return;
        }
        let statics = world.static_archetype_count();

        for index in self.resolved..statics.min(total) {
            let Some(storage) = world.storage_at(index) else {
                continue;
            };
            if typeset::is_subset(&self.ids, storage.ids()) {
                self.push_candidate(world, index);
            }
        }

        if !self.static_only {
            let first_new = self.resolved.max(statics);
            for archetype in world.runtime_candidates(&self.ids) {
                if archetype.index() >= first_new {
                    self.push_candidate(world, archetype.index());
                }
            }
        }

        tracing::trace!(
            "System resolved {} archetypes, {} candidates",
            total - self.resolved,
            self.candidates.len()
        );
        self.resolved = total;
    }

    #[allow(clippy::cast_possible_truncation)]
    fn push_candidate(&mut self, world: &World, index: usize) {
        let Some(storage) = world.storage_at(index) else {
            return;
        };
        let columns: Option<Vec<usize>> =
            self.ids.iter().map(|id| storage.column_index(*id)).collect();
        if let Some(columns) = columns {
            self.candidates.push(Candidate {
                archetype: ArchetypeId::new(index as u32),
                columns,
            });
        }
    }
}

impl<Q: OwnedQuery> System<Q> {
    /// Copy-in/copy-out pass: `f` receives the World itself, the entity and
    /// owned copies of its components, and may create, remove or migrate
    /// entities.
    ///
    /// The visit list is taken before the first callback. Each entity is
    /// located again before its callback and skipped if it died or lost a
    /// queried component; its `&mut` components are written back afterwards
    /// if it still has them. Entities created during the pass are not
    /// visited.
    ///
    /// # Errors
    ///
    /// [`EcsError::WorldMismatch`] for a foreign World.
    pub fn run_safe<F>(&mut self, world: &mut World, flags: RunFlags, mut f: F) -> EcsResult<()>
    where
        F: FnMut(&mut World, Entity, &mut Q::Owned),
    {
        self.check_world(world)?;
        self.refresh(world);

        let visits = self.snapshot(world, flags);
        for entity in visits {
            let Some(before) = self.locate(world, entity) else {
                continue;
            };
            // SAFETY: Fresh bases for a live row of an archetype holding
            // every queried column.
            let mut owned = unsafe { Q::read(&before.bases, before.row) };

            f(world, entity, &mut owned);

            let Some(after) = self.locate(world, entity) else {
                continue;
            };
            // SAFETY: Located again after the callback.
            unsafe { Q::write_back(&after.bases, after.row, owned) };
            if flags.marks() {
                if let Some(archetype) = world.entity_archetype(entity) {
                    let storage = &mut world.storages_mut()[archetype.index()];
                    for (&column, &mutable) in after.columns.iter().zip(&self.mutable) {
                        if mutable {
                            storage.dirty_mut(column).set(after.row, true);
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Entities to visit, consuming dirty bits for filtered passes.
    fn snapshot(&self, world: &mut World, flags: RunFlags) -> Vec<Entity> {
        let strict = flags.contains(RunFlags::STRICT_ONLY_DIRTY);
        let storages = world.storages_mut();
        let mut visits = Vec::new();
        for candidate in &self.candidates {
            let storage = &mut storages[candidate.archetype.index()];
            let len = storage.len();
            if !flags.filtered() {
                visits.extend_from_slice(storage.entities());
                continue;
            }
            for word in 0..len.div_ceil(ROWS_PER_WORD) {
                let mut bits = dirty_word(&**storage, &candidate.columns, word, len, strict);
                if flags.consumes() {
                    for &column in &candidate.columns {
                        storage.dirty_mut(column).clear_word_bits(word, bits);
                    }
                }
                while bits != 0 {
                    let row = word * ROWS_PER_WORD + bits.trailing_zeros() as usize;
                    bits &= bits - 1;
                    visits.push(storage.entities()[row]);
                }
            }
        }
        visits
    }

    /// Where `entity` is now, if it is alive and holds every queried
    /// component.
    fn locate(&self, world: &mut World, entity: Entity) -> Option<Located> {
        let link = world.live_link(entity)?;
        let storage = world.storages_mut().get_mut(link.archetype.index())?;
        let columns: Vec<usize> = self
            .ids
            .iter()
            .map(|id| storage.column_index(*id))
            .collect::<Option<_>>()?;
        let bases = column_bases(&mut **storage, &columns)?;
        Some(Located {
            bases,
            row: link.row,
            columns,
        })
    }
}

/// Base pointers of `columns`, in query order.
fn column_bases(storage: &mut dyn ArchetypeStorage, columns: &[usize]) -> Option<Vec<*mut u8>> {
    columns
        .iter()
        .map(|&column| storage.column_ptr_mut(column))
        .collect()
}

/// Combined dirty word `word` of `columns`: OR, or AND when `strict`. Bits
/// at or past `len` are masked off.
fn dirty_word(
    storage: &dyn ArchetypeStorage,
    columns: &[usize],
    word: usize,
    len: usize,
    strict: bool,
) -> u64 {
    let mut bits = if strict { u64::MAX } else { 0 };
    for &column in columns {
        let current = storage.dirty(column).word(word);
        if strict {
            bits &= current;
        } else {
            bits |= current;
        }
    }
    let valid = len - word * ROWS_PER_WORD;
    if valid < ROWS_PER_WORD {
        bits &= (1u64 << valid) - 1;
    }
    bits
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq)]
    struct Position(i32);

    #[derive(Debug, Clone, Copy, PartialEq)]
    struct Velocity(i32);

    fn world_with(rows: i32) -> (World, Vec<Entity>) {
        let mut world = World::builder()
            .archetype::<(Position, Velocity)>()
            .archetype::<(Position,)>()
            .build()
            .unwrap();
        let entities = (0..rows)
            .map(|i| {
                world
                    .static_emplace_entity((Position(i), Velocity(1)))
                    .unwrap()
            })
            .collect();
        (world, entities)
    }

    fn clear_all(world: &mut World) {
        let arch = world.static_archetype_mut::<(Position, Velocity)>().unwrap();
        let len = arch.len();
        arch.mark_dirty_range::<Position>(0, len, false);
        arch.mark_dirty_range::<Velocity>(0, len, false);
    }

    #[test]
    fn test_resolves_static_supersets() {
        let (world, _) = world_with(0);
        let system = world.make_system::<&Position>().unwrap();
        assert_eq!(
            system.archetypes(),
            vec![ArchetypeId::new(0), ArchetypeId::new(1)]
        );
        let system = world.make_system::<(&Velocity, &Position)>().unwrap();
        assert_eq!(system.archetypes(), vec![ArchetypeId::new(0)]);
    }

    #[test]
    fn test_run_mutates() {
        let (mut world, entities) = world_with(3);
        let mut system = world.make_system::<(&mut Position, &Velocity)>().unwrap();
        system
            .run(&mut world, RunFlags::empty(), |(pos, vel)| pos.0 += vel.0)
            .unwrap();
        assert_eq!(world.component::<Position>(entities[2]), Some(&Position(3)));
    }

    #[test]
    fn test_only_dirty_consumes_bits() {
        let (mut world, entities) = world_with(70);
        clear_all(&mut world);
        world.mark_dirty::<Position>(entities[3]);
        world.mark_dirty::<Velocity>(entities[66]);

        let mut system = world.make_system::<(&Position, &Velocity)>().unwrap();
        let mut seen = Vec::new();
        system
            .run_with_ids(&mut world, RunFlags::ONLY_DIRTY, |e, _| seen.push(e))
            .unwrap();
        assert_eq!(seen, vec![entities[3], entities[66]]);
        assert!(!world.is_dirty::<(Position, Velocity)>(entities[3]));

        seen.clear();
        system
            .run_with_ids(&mut world, RunFlags::ONLY_DIRTY, |e, _| seen.push(e))
            .unwrap();
        assert!(seen.is_empty());
    }

    #[test]
    fn test_strict_and_keep_dirty() {
        let (mut world, entities) = world_with(4);
        clear_all(&mut world);
        world.mark_dirty::<Position>(entities[0]);
        world.mark_dirty::<Position>(entities[1]);
        world.mark_dirty::<Velocity>(entities[1]);

        let mut system = world.make_system::<(&Position, &Velocity)>().unwrap();
        let mut seen = Vec::new();
        let flags = RunFlags::STRICT_ONLY_DIRTY | RunFlags::KEEP_DIRTY;
        system
            .run_with_ids(&mut world, flags, |e, _| seen.push(e))
            .unwrap();
        assert_eq!(seen, vec![entities[1]]);
        assert!(world.is_dirty::<(Velocity,)>(entities[1]));
    }

    #[test]
    fn test_mark_dirty_only_mutable_columns() {
        let (mut world, entities) = world_with(2);
        clear_all(&mut world);
        let mut system = world.make_system::<(&mut Position, &Velocity)>().unwrap();
        system
            .run(&mut world, RunFlags::MARK_DIRTY, |_| {})
            .unwrap();
        assert!(world.is_dirty::<(Position,)>(entities[1]));
        assert!(!world.is_dirty::<(Velocity,)>(entities[1]));
    }

    #[test]
    fn test_sees_runtime_archetypes_created_later() {
        let (mut world, entities) = world_with(1);
        let mut system = world.make_system::<&Position>().unwrap();
        let mut static_system = world.make_static_system::<&Position>().unwrap();
        world.extend(entities[0], (7u8,)).unwrap();

        let mut count = 0;
        system.run(&mut world, RunFlags::empty(), |_| count += 1).unwrap();
        assert_eq!(count, 1);
        assert_eq!(system.archetypes().len(), 3);

        count = 0;
        static_system
            .run(&mut world, RunFlags::empty(), |_| count += 1)
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_rejects_foreign_world_and_safe_flag() {
        let (mut world, _) = world_with(1);
        let (mut other, _) = world_with(1);
        let mut system = world.make_system::<&Position>().unwrap();
        assert_eq!(
            system.run(&mut other, RunFlags::empty(), |_| {}),
            Err(EcsError::WorldMismatch)
        );
        assert_eq!(
            system.run(&mut world, RunFlags::SAFE_INSERT, |_| {}),
            Err(EcsError::UnsupportedFlags(RunFlags::SAFE_INSERT))
        );
    }

    #[test]
    fn test_with_ids_needs_the_id_entry_point() {
        let (mut world, entities) = world_with(2);
        let mut system = world.make_system::<&Position>().unwrap();
        let mut count = 0;
        assert_eq!(
            system.run(&mut world, RunFlags::WITH_IDS, |_| count += 1),
            Err(EcsError::UnsupportedFlags(RunFlags::WITH_IDS))
        );
        assert_eq!(count, 0);

        let mut seen = Vec::new();
        system
            .run_with_ids(&mut world, RunFlags::WITH_IDS, |e, _| seen.push(e))
            .unwrap();
        assert_eq!(seen, entities);
    }

    #[test]
    fn test_aliasing_system_is_rejected() {
        let (world, _) = world_with(0);
        assert!(matches!(
            world.make_system::<(&mut Position, &mut Position)>(),
            Err(EcsError::DuplicateComponent(_))
        ));
    }

    #[test]
    fn test_run_safe_writes_back_and_mutates_world() {
        let (mut world, entities) = world_with(3);
        let mut system = world.make_system::<(&mut Position, &Velocity)>().unwrap();
        let mut spawned = Vec::new();
        system
            .run_safe(&mut world, RunFlags::SAFE_INSERT, |world, entity, (pos, vel)| {
                pos.0 += vel.0 * 10;
                vel.0 = 99;
                if entity == entities[0] {
                    world.remove(entities[1]);
                    spawned.push(world.static_emplace_entity((Position(-1), Velocity(0))).unwrap());
                }
            })
            .unwrap();

        assert_eq!(world.component::<Position>(entities[0]), Some(&Position(10)));
        assert_eq!(world.component::<Velocity>(entities[0]), Some(&Velocity(1)));
        assert!(!world.is_alive(entities[1]));
        assert_eq!(world.component::<Position>(entities[2]), Some(&Position(12)));
        assert_eq!(world.component::<Position>(spawned[0]), Some(&Position(-1)));
    }
}
