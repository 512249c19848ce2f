//! Small deterministic `{age, city, label}` dataset.

use std::path::Path;

use cognimaker::{ColumnSpec, DistributedDataset, Schema, SemanticType, Table, Value};

pub const CITIES: [&str; 3] = ["NYC", "SF", "LA"];

pub fn schema() -> Schema {
    Schema::new(
        vec![
            ColumnSpec::new("age", SemanticType::Numeric),
            ColumnSpec::new("city", SemanticType::Categorical),
            ColumnSpec::new("label", SemanticType::Boolean),
        ],
        "label",
    )
    .expect("people schema")
}

/// Row `i`: every tenth age is missing; label is `age > 40` with a city twist.
pub fn row(i: usize) -> (Option<f64>, &'static str, bool) {
    let age = 20.0 + ((i * 7) % 50) as f64;
    let city = CITIES[i % CITIES.len()];
    let label = age > 40.0 || (city == "SF" && age > 30.0);
    let age = (i % 10 != 3).then_some(age);
    (age, city, label)
}

pub fn table(n: usize) -> Table {
    let rows = (0..n)
        .map(|i| {
            let (age, city, label) = row(i);
            vec![
                age.map_or(Value::Null, Value::Number),
                Value::from(city),
                Value::Bool(label),
            ]
        })
        .collect();
    Table::new(
        vec!["age".into(), "city".into(), "label".into()],
        rows,
    )
    .expect("people table")
}

/// `n` rows spread round-robin over `partitions` in-memory partitions.
pub fn dataset(n: usize, partitions: usize) -> DistributedDataset {
    let all = table(n);
    let tables = (0..partitions)
        .map(|p| {
            let rows: Vec<usize> = (0..n).filter(|i| i % partitions == p).collect();
            all.select_rows(&rows)
        })
        .collect();
    DistributedDataset::from_tables(tables)
}

/// Write `n` rows as CSV partitions with a leading id column.
pub fn write_csv_partitions(dir: &Path, n: usize, partitions: usize) {
    for p in 0..partitions {
        let mut body = String::from("id,age,city,label\n");
        for i in (0..n).filter(|i| i % partitions == p) {
            let (age, city, label) = row(i);
            let age = age.map(|a| a.to_string()).unwrap_or_default();
            body.push_str(&format!("r{i},{age},{city},{label}\n"));
        }
        std::fs::write(dir.join(format!("part-{p:05}.csv")), body).expect("write partition");
    }
}
