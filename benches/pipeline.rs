use std::hint::black_box;

use cognimaker::dataset::Table;
use cognimaker::estimator::{self, Hyperparameters, Target};
use cognimaker::transform::{FittedTransforms, TransformPipeline, TransformSpec};
use cognimaker::{EstimatorKind, Value};
use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};

const ROW_COUNT: usize = 5_000;
const CITIES: [&str; 4] = ["NYC", "SF", "LA", "BOS"];

fn rows() -> Table {
    let rows = (0..ROW_COUNT)
        .map(|i| {
            let age = 18.0 + ((i * 13) % 60) as f64;
            vec![
                if i % 17 == 0 {
                    Value::Null
                } else {
                    Value::Number(age)
                },
                Value::Number(((i * 7919) % 1000) as f64 / 10.0),
                Value::from(CITIES[i % CITIES.len()]),
                Value::Bool(age > 45.0),
            ]
        })
        .collect();
    Table::new(
        vec!["age".into(), "score".into(), "city".into(), "label".into()],
        rows,
    )
    .expect("bench table")
}

fn pipeline() -> TransformPipeline {
    TransformPipeline::new(vec![
        TransformSpec::impute("age"),
        TransformSpec::StandardScale {
            column: "age".into(),
        },
        TransformSpec::MinMaxScale {
            column: "score".into(),
        },
        TransformSpec::one_hot("city"),
    ])
}

fn labels(table: &Table) -> Target {
    let idx = table.column_index("label").expect("label column");
    Target::Classes {
        labels: table
            .column_values(idx)
            .map(|v| usize::from(*v == Value::Bool(true)))
            .collect(),
        n_classes: 2,
    }
}

fn bench_transforms(c: &mut Criterion) {
    let table = rows();
    let spec = pipeline();
    c.bench_with_input(BenchmarkId::new("pipeline_fit", ROW_COUNT), &table, |b, table| {
        b.iter(|| spec.fit(black_box(table), "label").expect("fit"));
    });
    let fitted: FittedTransforms = spec.fit(&table, "label").expect("fit");
    c.bench_with_input(BenchmarkId::new("pipeline_features", ROW_COUNT), &table, |b, table| {
        b.iter(|| fitted.features(black_box(table)).expect("features"));
    });
}

fn bench_estimators(c: &mut Criterion) {
    let table = rows();
    let fitted = pipeline().fit(&table, "label").expect("fit");
    let x = fitted.features(&table).expect("features");
    let y = labels(&table);
    let params = Hyperparameters::new();
    for kind in [
        EstimatorKind::Logistic,
        EstimatorKind::DecisionTree,
        EstimatorKind::Gbdt,
    ] {
        c.bench_function(&format!("train_{kind}"), |b| {
            b.iter(|| estimator::train(kind, black_box(x.view()), &y, &params, 592).expect("train"));
        });
    }
}

criterion_group!(benches, bench_transforms, bench_estimators);
criterion_main!(benches);
