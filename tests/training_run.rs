mod support;

use support::{cogni_env::CogniHomeGuard, people};

use cognimaker::{
    Artifact, CogniError, DeploymentGateway, DistributedDataset, EstimatorKind,
    LocalDirectoryGateway, RunConfig, Table, TrainingRun, Value,
    config::EvaluationPlan,
    estimator::HyperValue,
    transform::{TransformPipeline, TransformSpec},
};

fn logistic_config(metrics: &[&str]) -> RunConfig {
    let mut config = RunConfig::new(EstimatorKind::Logistic);
    config.seed = 42;
    config.evaluation = EvaluationPlan::Holdout {
        train_fraction: 0.8,
    };
    config.transforms = TransformPipeline::new(vec![
        TransformSpec::impute("age"),
        TransformSpec::one_hot("city"),
    ]);
    config.metrics = metrics.iter().map(|m| m.to_string()).collect();
    config
}

fn query() -> Table {
    Table::new(
        vec!["age".into(), "city".into()],
        vec![vec![Value::Number(30.0), Value::from("NYC")]],
    )
    .expect("query table")
}

fn train(config: RunConfig, data: &DistributedDataset) -> Artifact {
    TrainingRun::new(people::schema(), config)
        .expect("valid run")
        .execute(data)
        .expect("training succeeds")
}

#[test]
fn people_logistic_run_scores_and_reloads_identically() {
    let data = people::dataset(100, 4);
    let artifact = train(logistic_config(&["accuracy"]), &data);

    assert_eq!(artifact.metrics.metrics.len(), 1);
    let accuracy = artifact.metrics.value("accuracy").expect("accuracy value");
    assert!((0.0..=1.0).contains(&accuracy));
    assert_eq!(artifact.training.training_rows, 80);
    assert_eq!(artifact.training.score, Some(accuracy));

    let dir = tempfile::tempdir().unwrap();
    artifact.save(dir.path()).unwrap();
    let reloaded = Artifact::load(dir.path()).unwrap();
    assert_eq!(reloaded, artifact);

    let expected = artifact.predict(&query()).unwrap();
    assert!(matches!(expected[0], Value::Bool(_)));
    for _ in 0..3 {
        assert_eq!(reloaded.predict(&query()).unwrap(), expected);
    }

    let again = train(logistic_config(&["accuracy"]), &data);
    assert_eq!(again.artifact_id, artifact.artifact_id);
    assert_eq!(again.predict(&query()).unwrap(), expected);
}

#[test]
fn unknown_metric_is_marked_without_failing_the_run() {
    let artifact = train(
        logistic_config(&["accuracy", "bogus_metric"]),
        &people::dataset(100, 2),
    );
    assert!(artifact.metrics.value("accuracy").is_some());
    let bogus = artifact.metrics.get("bogus_metric").expect("marker present");
    assert!(bogus.is_error());
    assert_eq!(artifact.indicators().metrics.len(), 2);
}

#[test]
fn csv_partitions_with_dropped_id_train_under_cross_validation() {
    let dir = tempfile::tempdir().unwrap();
    people::write_csv_partitions(dir.path(), 60, 3);
    let data = DistributedDataset::from_csv_dir(dir.path()).unwrap();
    assert_eq!(data.partition_count(), 3);

    let schema = people::schema().with_dropped(vec!["id".into()]).unwrap();
    let mut config = RunConfig::new(EstimatorKind::DecisionTree);
    config.transforms = TransformPipeline::new(vec![
        TransformSpec::impute("age"),
        TransformSpec::one_hot("city"),
    ]);
    config.hyperparameters.insert("max_depth".into(), HyperValue::Int(3));
    config.metrics = vec!["accuracy".into(), "f1".into()];
    config.evaluation = EvaluationPlan::Auto {
        cross_validation_below_rows: 1000,
        train_fraction: 0.8,
        folds: 5,
        repeats: 1,
    };

    let artifact = TrainingRun::new(schema, config)
        .unwrap()
        .execute(&data)
        .unwrap();
    assert_eq!(artifact.metrics.folds, Some(5));
    assert_eq!(artifact.training.training_rows, 60);
    assert_eq!(
        artifact.hyperparameters.get("max_depth"),
        Some(&HyperValue::Int(3))
    );
    assert!(artifact.metrics.value("accuracy").unwrap() > 0.5);
}

#[test]
fn missing_declared_column_is_named() {
    let schema = cognimaker::Schema::new(
        vec![
            cognimaker::ColumnSpec::new("age", cognimaker::SemanticType::Numeric),
            cognimaker::ColumnSpec::new("income", cognimaker::SemanticType::Numeric),
            cognimaker::ColumnSpec::new("city", cognimaker::SemanticType::Categorical),
            cognimaker::ColumnSpec::new("label", cognimaker::SemanticType::Boolean),
        ],
        "label",
    )
    .unwrap();
    let err = TrainingRun::new(schema, logistic_config(&["accuracy"]))
        .unwrap()
        .execute(&people::dataset(20, 1))
        .unwrap_err();
    match err {
        CogniError::SchemaMismatch(mismatch) => assert_eq!(mismatch.missing, vec!["income"]),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn over_budget_dataset_is_refused_before_collection() {
    let mut config = logistic_config(&["accuracy"]);
    config.memory_budget_bytes = 64;
    let err = TrainingRun::new(people::schema(), config)
        .unwrap()
        .execute(&people::dataset(100, 2))
        .unwrap_err();
    assert!(matches!(err, CogniError::ResourceExhausted { .. }));
}

#[test]
fn transform_on_missing_column_fails_as_pipeline_config() {
    let mut config = logistic_config(&["accuracy"]);
    config.transforms = TransformPipeline::new(vec![TransformSpec::impute("salary")]);
    let err = TrainingRun::new(people::schema(), config)
        .unwrap()
        .execute(&people::dataset(40, 1))
        .unwrap_err();
    assert!(matches!(err, CogniError::PipelineConfig { .. }));
}

#[test]
fn local_gateway_publishes_under_app_dir() {
    let temp = tempfile::tempdir().unwrap();
    let _home = CogniHomeGuard::set_home(temp.path().to_path_buf());

    let artifact = train(logistic_config(&["accuracy"]), &people::dataset(50, 2));
    let gateway = LocalDirectoryGateway::in_app_dir().unwrap();
    assert!(gateway.root().starts_with(temp.path()));

    let publication = gateway.publish(&artifact).unwrap();
    assert_eq!(publication.artifact_id, artifact.artifact_id);
    let dir = gateway.root().join(&artifact.artifact_id);
    assert!(dir.join("model.json").is_file());
    assert!(dir.join("indicator.json").is_file());
    assert_eq!(Artifact::load(&dir).unwrap(), artifact);
}
