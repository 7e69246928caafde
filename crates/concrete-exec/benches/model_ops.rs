//! Model Operations Benchmarks
//!
//! Benchmarks for the model ⇄ object bridge and payload encoding.
//!
//! Run with: `cargo bench --bench model_ops`

#![allow(clippy::unwrap_used, clippy::expect_used)]

use concrete_exec::model::{ArrayModel, ClassId, CompositeModel, FieldRef, Handle, Model};
use concrete_exec::runtime::{ClassDef, FieldDef};
use concrete_exec::{
    CustomConstructors, ExpansionStrategy, IdentityCache, Machine, ModelConstructor, ProgramCatalog,
    ValueConstructor,
};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::collections::BTreeMap;
use std::sync::Arc;

const NODE: &str = "bench.Node";

fn machine() -> Machine {
    let node = ClassDef::class(NODE)
        .with_field(FieldDef::instance("value", "int"))
        .with_field(FieldDef::instance("next", NODE));
    let catalog = ProgramCatalog::new().with_entry("bench", vec![node]);
    let mut machine = Machine::new(Arc::new(catalog));
    machine.add_paths(&["bench".to_string()]).unwrap();
    machine
}

fn chain(len: u32) -> Model {
    let mut next = Model::null(NODE);
    for handle in (1..=len).rev() {
        next = CompositeModel::new(Some(Handle::new(handle)), ClassId::new(NODE))
            .with_field(FieldRef::new(NODE, "value"), Model::int(handle as i32))
            .with_field(FieldRef::new(NODE, "next"), next)
            .into();
    }
    next
}

fn sparse_array(len: usize) -> Model {
    let overrides: BTreeMap<usize, Model> = (0..len).step_by(7).map(|i| (i, Model::int(i as i32))).collect();
    ArrayModel {
        id: Some(Handle::new(1)),
        class_id: ClassId::new(ClassId::INT).array_of(),
        length: len,
        default_fill: Box::new(Model::int(0)),
        overrides,
    }
    .into()
}

fn bench_value_construction(c: &mut Criterion) {
    let mut group = c.benchmark_group("value_construction");

    for len in [10u32, 100, 1000] {
        let model = chain(len);
        group.bench_with_input(BenchmarkId::from_parameter(format!("chain_{len}")), &model, |bench, model| {
            bench.iter(|| {
                let mut machine = machine();
                let mut session = IdentityCache::new();
                let mut ctor = ValueConstructor::new(&mut machine, &mut session);
                ctor.index([model]);
                black_box(ctor.construct(black_box(model)).unwrap());
            });
        });
    }

    group.finish();
}

fn bench_model_construction(c: &mut Criterion) {
    let mut group = c.benchmark_group("model_construction");
    let customs = CustomConstructors::default();

    for len in [10u32, 100, 1000] {
        let mut machine = machine();
        let model = chain(len);
        let value = {
            let mut session = IdentityCache::new();
            let mut ctor = ValueConstructor::new(&mut machine, &mut session);
            ctor.index([&model]);
            ctor.construct(&model).unwrap()
        };
        group.bench_function(BenchmarkId::from_parameter(format!("chain_{len}")), |bench| {
            bench.iter(|| {
                let mut session = IdentityCache::new();
                let mut ctor = ModelConstructor::new(&machine, &mut session, &customs, ExpansionStrategy::Always);
                black_box(ctor.construct(&value, &ClassId::new(NODE), len + 2).unwrap());
            });
        });
    }

    group.finish();
}

fn bench_payload_encoding(c: &mut Criterion) {
    let mut group = c.benchmark_group("payload_encoding");

    for len in [100usize, 10_000] {
        let model = sparse_array(len);
        group.bench_with_input(BenchmarkId::new("sparse_array", len), &model, |bench, model| {
            bench.iter(|| black_box(concrete_exec::protocol::encode_payload(model).unwrap()));
        });
    }

    let model = chain(500);
    let bytes = concrete_exec::protocol::encode_payload(&model).unwrap();
    group.bench_function("decode_chain_500", |bench| {
        bench.iter(|| black_box(concrete_exec::protocol::decode_payload::<Model>(black_box(&bytes)).unwrap()));
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_value_construction,
    bench_model_construction,
    bench_payload_encoding
);
criterion_main!(benches);
