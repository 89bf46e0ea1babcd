//! Propagation benchmarks for ripple-core
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use ripple_core::{batch, computed, writable, Computed};

// =============================================================================
// WRITABLE BENCHMARKS
// =============================================================================

fn bench_writable_set(c: &mut Criterion) {
    let cell = writable(0i64);
    let mut next = 0i64;
    c.bench_function("writable_set", |b| {
        b.iter(|| {
            next += 1;
            cell.set(black_box(next)).ok()
        })
    });
}

fn bench_writable_set_same_value(c: &mut Criterion) {
    let cell = writable(42i64);
    c.bench_function("writable_set_same_value", |b| {
        b.iter(|| cell.set(black_box(42)).ok())
    });
}

// =============================================================================
// GRAPH BENCHMARKS
// =============================================================================

fn bench_diamond_fan_out(c: &mut Criterion) {
    let mut group = c.benchmark_group("diamond_fan_out");
    for width in [4usize, 16, 64] {
        let source = writable(0i64);
        let branches: Vec<Computed<i64>> = (0..width as i64)
            .map(|offset| {
                let source = source.clone();
                computed(move || Ok(source.get()? + offset))
            })
            .collect();
        let join = computed({
            let branches = branches.clone();
            move || branches.iter().map(|b| b.get()).sum::<ripple_core::Result<i64>>()
        });
        let _unsub = join.subscribe(|v: &i64| {
            black_box(*v);
        });

        let mut next = 0i64;
        group.bench_with_input(BenchmarkId::from_parameter(width), &width, |b, _| {
            b.iter(|| {
                next += 1;
                source.set(next).ok()
            })
        });
    }
    group.finish();
}

fn bench_batched_writes(c: &mut Criterion) {
    let cells: Vec<_> = (0..32i64).map(writable).collect();
    let total = computed({
        let cells = cells.clone();
        move || cells.iter().map(|c| c.get()).sum::<ripple_core::Result<i64>>()
    });
    let _unsub = total.subscribe(|v: &i64| {
        black_box(*v);
    });

    let mut round = 0i64;
    c.bench_function("batched_writes_32", |b| {
        b.iter(|| {
            round += 1;
            batch(|| {
                for cell in &cells {
                    cell.set(round)?;
                }
                Ok(())
            })
            .ok()
        })
    });
}

// =============================================================================
// CELLX BENCHMARK
// =============================================================================

fn cellx_graph(layers: usize) -> (Vec<ripple_core::Writable<i64>>, Computed<i64>) {
    let roots: Vec<_> = (1..=4i64).map(writable).collect();
    let mut layer: Vec<Computed<i64>> = roots
        .iter()
        .map(|w| {
            let w = w.clone();
            computed(move || w.get())
        })
        .collect();

    for _ in 0..layers {
        let (a, b, c, d) = (
            layer[0].clone(),
            layer[1].clone(),
            layer[2].clone(),
            layer[3].clone(),
        );
        layer = vec![
            computed({
                let b = b.clone();
                move || b.get()
            }),
            computed({
                let (a, c) = (a.clone(), c.clone());
                move || Ok(a.get()? - c.get()?)
            }),
            computed({
                let (b, d) = (b.clone(), d.clone());
                move || Ok(b.get()? + d.get()?)
            }),
            computed(move || c.get()),
        ];
    }

    let sum = computed(move || layer.iter().map(|c| c.get()).sum::<ripple_core::Result<i64>>());
    (roots, sum)
}

fn bench_cellx(c: &mut Criterion) {
    let mut group = c.benchmark_group("cellx");
    for layers in [100usize, 200] {
        let (roots, sum) = cellx_graph(layers);
        let _unsub = sum.subscribe(|v: &i64| {
            black_box(*v);
        });

        let mut flip = false;
        group.bench_with_input(BenchmarkId::from_parameter(layers), &layers, |b, _| {
            b.iter(|| {
                flip = !flip;
                let values = if flip { [4, 3, 2, 1] } else { [1, 2, 3, 4] };
                batch(|| {
                    for (root, value) in roots.iter().zip(values) {
                        root.set(value)?;
                    }
                    Ok(())
                })
                .ok()
            })
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_writable_set,
    bench_writable_set_same_value,
    bench_diamond_fan_out,
    bench_batched_writes,
    bench_cellx,
);
criterion_main!(benches);
