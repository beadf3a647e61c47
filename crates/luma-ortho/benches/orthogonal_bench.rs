//! Benchmarks for orthogonal bitmap aggregation
//!
//! Covers row ingestion, partial state merge and shipping, and finalize-time
//! evaluation.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use luma_ortho::factory::{
    AggregateFunctionRef, ORTHOGONAL_BITMAP_EXPR_CALCULATE_COUNT,
    ORTHOGONAL_BITMAP_INTERSECT_COUNT,
};
use luma_ortho::{
    AggregateFunctionFactory, AggregateState, BucketExpr, BucketedState, ColumnData, DataType,
    FunctionArgument, OrthConfig, Value,
};
use std::hint::black_box;

const BUCKETS: i64 = 16;

fn resolve(name: &str, literals: Vec<Value>) -> AggregateFunctionRef {
    let mut args = vec![
        FunctionArgument::column(DataType::Bitmap),
        FunctionArgument::column(DataType::Int64),
    ];
    args.extend(literals.into_iter().map(FunctionArgument::literal));
    AggregateFunctionFactory::new()
        .try_get(name, &args, false)
        .expect("benchmark function resolves")
}

fn batch(rows: usize) -> (ColumnData, ColumnData) {
    let bitmaps = ColumnData::bitmaps((0..rows as u32).map(|i| [i, i.wrapping_mul(7919)]));
    let keys = ColumnData::Int64((0..rows as i64).map(|i| Some(i % BUCKETS)).collect());
    (bitmaps, keys)
}

fn filled_state(function: &AggregateFunctionRef, rows: usize) -> AggregateState {
    let (bitmaps, keys) = batch(rows);
    let mut state = function.create_state();
    function
        .add_batch(&mut state, &[&bitmaps, &keys])
        .expect("batch matches signature");
    state
}

fn bench_ingestion(c: &mut Criterion) {
    let mut group = c.benchmark_group("ingestion");
    let function = resolve(
        ORTHOGONAL_BITMAP_INTERSECT_COUNT,
        (0..BUCKETS / 2).map(Value::Int64).collect(),
    );

    for rows in [1_000, 10_000, 100_000] {
        let (bitmaps, keys) = batch(rows);
        group.throughput(Throughput::Elements(rows as u64));
        group.bench_with_input(BenchmarkId::new("add_batch", rows), &rows, |b, _| {
            b.iter(|| {
                let mut state = function.create_state();
                function
                    .add_batch(&mut state, &[&bitmaps, &keys])
                    .expect("batch matches signature");
                black_box(state)
            })
        });
    }

    group.finish();
}

fn bench_merge(c: &mut Criterion) {
    let mut group = c.benchmark_group("merge");
    let function = resolve(
        ORTHOGONAL_BITMAP_INTERSECT_COUNT,
        (0..BUCKETS).map(Value::Int64).collect(),
    );
    let partial = filled_state(&function, 50_000);

    group.bench_function("merge_partial", |b| {
        b.iter(|| {
            let mut target = filled_state(&function, 1_000);
            function.merge(&mut target, &partial).expect("same function");
            black_box(target)
        })
    });

    let mut bytes = Vec::new();
    function.serialize(&partial, &mut bytes).expect("serializable");
    group.throughput(Throughput::Bytes(bytes.len() as u64));
    group.bench_function("serialize", |b| {
        b.iter(|| {
            let mut out = Vec::with_capacity(bytes.len());
            function.serialize(&partial, &mut out).expect("serializable");
            black_box(out)
        })
    });
    group.bench_function("deserialize", |b| {
        b.iter(|| black_box(function.deserialize(&bytes).expect("valid payload")))
    });

    group.finish();
}

fn bench_finalize(c: &mut Criterion) {
    let mut group = c.benchmark_group("finalize");
    let config = OrthConfig::default();

    let mut state = BucketedState::<i64>::new();
    for i in 0..200_000u32 {
        state.insert(&(i as i64 % BUCKETS), i / 3);
    }

    for depth in [2usize, 8, 16] {
        let source = (0..depth as i64)
            .map(|k| k.to_string())
            .collect::<Vec<_>>()
            .join("|");
        let expr = BucketExpr::<i64>::parse(&format!("({})&0-1", source), &config)
            .expect("valid expression");
        group.bench_with_input(BenchmarkId::new("evaluate", depth), &expr, |b, expr| {
            b.iter(|| black_box(expr.evaluate(&state)))
        });
    }

    let targets: Vec<i64> = (0..BUCKETS).collect();
    group.bench_function("intersect_all", |b| {
        b.iter(|| black_box(state.intersect(&targets)))
    });

    let function = resolve(
        ORTHOGONAL_BITMAP_EXPR_CALCULATE_COUNT,
        vec![Value::from("(0|1|2|3)&(4|5)-6")],
    );
    group.bench_function("expr_count_end_to_end", |b| {
        b.iter(|| {
            let state = filled_state(&function, 10_000);
            black_box(function.finalize(state).expect("same function"))
        })
    });

    group.finish();
}

criterion_group!(benches, bench_ingestion, bench_merge, bench_finalize);
criterion_main!(benches);
