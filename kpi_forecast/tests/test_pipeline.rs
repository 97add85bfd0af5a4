mod common;

use common::write_acquisition;
use kpi_forecast::error::ForecastError;
use kpi_forecast::{Pipeline, PipelineConfig};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::fs;
use std::path::Path;
use tempfile::tempdir;

/// Weekly NDVI acquisitions with a slow seasonal swing
fn populate(root: &Path, name_id: &str, count: usize) {
    let dir = root.join("geotiffs").join(name_id);
    fs::create_dir_all(&dir).unwrap();
    for i in 0..count {
        let nir = 0.5 + 0.2 * ((i as f32) * 0.5).sin();
        write_acquisition(&dir.join(format!("{}_{:03}.tif", name_id, i)), 4, 4, &[0.2, nir]);
        fs::write(dir.join(format!("{}_{:03}.xml", name_id, i)), b"<meta/>").unwrap();
    }
}

fn config(root: &Path, overrides: serde_json::Value) -> PipelineConfig {
    let mut document = json!({
        "name_id": "field_a",
        "geotiffs_path": root.join("geotiffs"),
        "models_path": root.join("models"),
        "visualizations_path": root.join("visualizations"),
        "dataset_path": root.join("datasets"),
        "start_date": "2024-01-01",
        "interval_type": "weeks",
        "date_interval": 1,
        "bands": ["B04", "B08"],
        "formula": "NDVI",
        "kpi": "mean",
    });
    if let (Some(base), Some(extra)) = (document.as_object_mut(), overrides.as_object()) {
        for (key, value) in extra {
            base.insert(key.clone(), value.clone());
        }
    }
    PipelineConfig::from_json_str(&document.to_string()).unwrap()
}

#[test]
fn test_full_run_writes_models_charts_and_dataset() {
    let root = tempdir().unwrap();
    populate(root.path(), "field_a", 24);

    let config = config(
        root.path(),
        json!({
            "models": ["arima", "sarima", "random_forest", "gradient_boosting"],
            "model_params": {
                "sarima": {"m": 4, "max_p": 1, "max_q": 1},
                "random_forest": {"n_estimators": 10},
                "gradient_boosting": {"n_estimators": 10}
            },
            "train": true,
            "save_model": true,
            "predict": true,
            "visualize": true
        }),
    );
    let report = Pipeline::new(config.clone()).unwrap().run().unwrap();

    let dataset = report.dataset.unwrap();
    assert_eq!(dataset.len(), 24);
    assert!(root.path().join("datasets/field_a.csv").is_file());

    let strategies: Vec<&str> = report.models.iter().map(|m| m.strategy.as_str()).collect();
    assert_eq!(strategies, vec!["arima", "sarima", "random_forest", "gradient_boosting"]);

    for model in &report.models {
        assert!(model.metrics.is_some());
        // 24 rows, 19 for training
        assert_eq!(model.forecast.as_ref().unwrap().horizon(), 5);

        let model_file = config.model_file(&model.strategy);
        assert_eq!(model.model_file.as_deref(), Some(model_file.as_path()));
        assert!(model_file.is_file());

        let chart = fs::read_to_string(model.chart_file.as_ref().unwrap()).unwrap();
        assert!(chart.contains("Time (weeks)"));
    }
}

#[test]
fn test_load_and_predict_from_saved_models() {
    let root = tempdir().unwrap();
    populate(root.path(), "field_a", 20);

    let train = config(
        root.path(),
        json!({"models": ["random_forest"], "model_params": {"random_forest": {"n_estimators": 5}},
               "train": true, "save_model": true, "predict": true}),
    );
    let trained = Pipeline::new(train).unwrap().run().unwrap();

    let reuse = config(
        root.path(),
        json!({"models": ["random_forest"], "model_params": {"random_forest": {"n_estimators": 5}},
               "load_model": true, "predict": true}),
    );
    let reused = Pipeline::new(reuse).unwrap().run().unwrap();

    assert_eq!(
        trained.models[0].forecast.as_ref().unwrap().values(),
        reused.models[0].forecast.as_ref().unwrap().values()
    );
    assert!(reused.models[0].metrics.is_none());
}

#[test]
fn test_predict_without_training_or_saved_model_fails() {
    let root = tempdir().unwrap();
    populate(root.path(), "field_a", 12);

    let config = config(root.path(), json!({"models": ["arima"], "predict": true}));
    let err = Pipeline::new(config).unwrap().run().unwrap_err();
    match err {
        ForecastError::Stage { stage, source, .. } => {
            assert_eq!(stage, "predict");
            assert!(matches!(*source, ForecastError::ModelNotFound(_)));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_unknown_model_name_is_a_configuration_error() {
    let root = tempdir().unwrap();
    populate(root.path(), "field_a", 6);

    let config = config(root.path(), json!({"models": ["lstm"], "train": true}));
    let err = Pipeline::new(config).unwrap().run().unwrap_err();
    match err {
        ForecastError::Stage { stage, source, .. } => {
            assert_eq!(stage, "model");
            assert!(matches!(*source, ForecastError::Config(_)));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_config_file_round_trip() {
    let root = tempdir().unwrap();
    let path = root.path().join("field_a.json");
    fs::write(
        &path,
        r#"{"name_id": "field_a", "start_date": "2024-03-01", "interval_type": "months",
            "date_interval": 2, "bands": ["B03", "B11"], "formula": "NDSI", "kpi": "std"}"#,
    )
    .unwrap();

    let config = PipelineConfig::from_file(&path).unwrap();
    assert_eq!(config.step().unwrap().count(), 2);
    assert_eq!(config.statistic(), kpi_forecast::KpiStatistic::Std);
    assert!(PipelineConfig::from_file(root.path().join("missing.json")).is_err());
}
