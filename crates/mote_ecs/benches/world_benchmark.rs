//! # World Benchmark
//!
//! Measures the hot paths of the World:
//!
//! 1. **Placement**: emplacing entities into static and runtime archetypes
//! 2. **Iteration**: system passes over 100K rows
//! 3. **Migration**: extend/shrink round trips between archetypes
//!
//! Run with: cargo bench -p mote_ecs --bench world_benchmark

#![allow(missing_docs)]
#![allow(dead_code)]

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use mote_ecs::{Entity, RunFlags, World};

#[derive(Clone, Copy, Debug, Default)]
struct Position {
    x: f32,
    y: f32,
    z: f32,
}

#[derive(Clone, Copy, Debug, Default)]
struct Velocity {
    x: f32,
    y: f32,
    z: f32,
}

#[derive(Clone, Copy, Debug, Default)]
struct Health(u32);

const ENTITY_COUNT: usize = 100_000;

fn populated_world(count: usize) -> (World, Vec<Entity>) {
    let mut world = World::builder()
        .archetype::<(Position, Velocity)>()
        .archetype::<(Position, Velocity, Health)>()
        .build()
        .expect("static archetypes are distinct");
    let entities = (0..count)
        .map(|i| {
            #[allow(clippy::cast_precision_loss)]
            let x = i as f32;
            world
                .static_emplace_entity((
                    Position { x, y: 0.0, z: 0.0 },
                    Velocity { x: 1.0, y: 0.5, z: 0.0 },
                ))
                .expect("archetype declared")
        })
        .collect();
    (world, entities)
}

// ============================================================================
// PLACEMENT
// ============================================================================

fn bench_static_emplace(c: &mut Criterion) {
    c.bench_function("static_emplace_100k", |b| {
        b.iter(|| {
            let (world, _) = populated_world(black_box(ENTITY_COUNT));
            black_box(world.alive_count())
        });
    });
}

fn bench_runtime_emplace(c: &mut Criterion) {
    c.bench_function("runtime_emplace_100k", |b| {
        b.iter(|| {
            let mut world = World::new();
            let id = world
                .new_archetype::<(Position, Velocity, String)>()
                .expect("fresh world");
            for _ in 0..ENTITY_COUNT {
                let _ = world.emplace_entity(
                    id,
                    (Position::default(), Velocity::default(), String::new()),
                );
            }
            black_box(world.alive_count())
        });
    });
}

// ============================================================================
// ITERATION
// ============================================================================

fn bench_system_pass(c: &mut Criterion) {
    let (mut world, _) = populated_world(ENTITY_COUNT);
    let mut system = world
        .make_system::<(&mut Position, &Velocity)>()
        .expect("distinct components");

    c.bench_function("system_pass_100k", |b| {
        b.iter(|| {
            system
                .run(&mut world, RunFlags::empty(), |(p, v)| {
                    p.x += v.x;
                    p.y += v.y;
                    p.z += v.z;
                })
                .expect("same world");
        });
    });
}

fn bench_system_pass_with_ids(c: &mut Criterion) {
    let (mut world, _) = populated_world(ENTITY_COUNT);
    let mut system = world.make_system::<&Position>().expect("single component");

    c.bench_function("system_pass_with_ids_100k", |b| {
        b.iter(|| {
            let mut sum = 0u64;
            system
                .run_with_ids(&mut world, RunFlags::WITH_IDS, |entity, p| {
                    sum += u64::from(entity.index());
                    black_box(p);
                })
                .expect("same world");
            black_box(sum)
        });
    });
}

fn bench_safe_pass(c: &mut Criterion) {
    let (mut world, _) = populated_world(ENTITY_COUNT);
    let mut system = world
        .make_system::<(&mut Position, &Velocity)>()
        .expect("distinct components");

    c.bench_function("safe_pass_100k", |b| {
        b.iter(|| {
            system
                .run_safe(&mut world, RunFlags::SAFE_INSERT, |_, _, (p, v)| {
                    p.x += v.x;
                })
                .expect("same world");
        });
    });
}

// ============================================================================
// MIGRATION
// ============================================================================

fn bench_extend_shrink(c: &mut Criterion) {
    let mut group = c.benchmark_group("migration");

    for count in [1_000usize, 10_000] {
        group.bench_with_input(BenchmarkId::new("static_extend", count), &count, |b, &n| {
            b.iter(|| {
                let (mut world, entities) = populated_world(n);
                for &e in &entities {
                    let _ = world.static_extend(e, (Health(100),));
                }
                black_box(world.archetype_count())
            });
        });

        group.bench_with_input(BenchmarkId::new("runtime_round_trip", count), &count, |b, &n| {
            b.iter(|| {
                let (mut world, entities) = populated_world(n);
                for &e in &entities {
                    let _ = world.extend(e, (String::from("tag"),));
                    let _ = world.shrink::<(String,)>(e);
                }
                black_box(world.archetype_count())
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_static_emplace,
    bench_runtime_emplace,
    bench_system_pass,
    bench_system_pass_with_ids,
    bench_safe_pass,
    bench_extend_shrink,
);
criterion_main!(benches);
