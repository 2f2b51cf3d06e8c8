//! Arena allocation benchmarks using criterion.
//!
//! Run with: cargo bench --bench arena_bench

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use grapnel_runtime::alloc::{Allocator, SystemAllocator};
use grapnel_runtime::arena::{BumpArena, VirtualArena};
use grapnel_runtime::MB;

fn bench_bump_arena(c: &mut Criterion) {
    let mut group = c.benchmark_group("bump_arena");
    group.throughput(Throughput::Bytes(64));

    group.bench_function("alloc_64", |b| {
        let arena = BumpArena::with_capacity(4 * MB);
        b.iter(|| {
            if arena.remaining() < 64 {
                arena.clear();
            }
            black_box(arena.alloc(64).unwrap());
        });
    });

    group.bench_function("alloc_copy_64", |b| {
        let arena = BumpArena::with_capacity(4 * MB);
        let payload = [0x5Au8; 64];
        b.iter(|| {
            if arena.remaining() < 64 {
                arena.clear();
            }
            black_box(arena.alloc_copy(&payload).unwrap());
        });
    });

    group.finish();
}

fn bench_virtual_arena(c: &mut Criterion) {
    let mut group = c.benchmark_group("virtual_arena");
    group.throughput(Throughput::Bytes(64));

    group.bench_function("alloc_64", |b| {
        let arena = VirtualArena::reserve(64 * MB).unwrap();
        b.iter(|| {
            if arena.remaining() < 64 {
                arena.clear();
            }
            black_box(arena.alloc(64).unwrap());
        });
    });

    group.bench_function("clear_after_one_page", |b| {
        let arena = VirtualArena::reserve(4 * MB).unwrap();
        b.iter(|| {
            arena.alloc(4096).unwrap();
            arena.clear();
        });
    });

    group.finish();
}

fn bench_system_allocator(c: &mut Criterion) {
    let mut group = c.benchmark_group("system_allocator");
    group.throughput(Throughput::Bytes(64));

    group.bench_function("alloc_dealloc_64", |b| {
        let alloc = SystemAllocator;
        b.iter(|| {
            let ptr = alloc.alloc(black_box(64)).unwrap();
            unsafe { alloc.dealloc(ptr) };
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_bump_arena,
    bench_virtual_arena,
    bench_system_allocator
);
criterion_main!(benches);
