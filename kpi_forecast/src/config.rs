//! Pipeline configuration
//!
//! One JSON document describes one dataset: where its rasters live, how the
//! acquisitions are spaced, which index to compute and which models to run.

use crate::error::{ForecastError, Result};
use crate::models::MODEL_EXTENSION;
use crate::temporal::{CalendarStep, StepUnit};
use band_math::KpiStatistic;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

fn default_geotiffs_path() -> PathBuf {
    PathBuf::from("geotiffs")
}

fn default_models_path() -> PathBuf {
    PathBuf::from("models")
}

fn default_visualizations_path() -> PathBuf {
    PathBuf::from("visualizations")
}

fn default_interval_type() -> String {
    "weeks".to_string()
}

fn default_date_interval() -> u32 {
    1
}

/// Settings for one pipeline run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Dataset identifier, also the raster sub-directory name
    pub name_id: String,
    #[serde(default = "default_geotiffs_path")]
    pub geotiffs_path: PathBuf,
    #[serde(default = "default_models_path")]
    pub models_path: PathBuf,
    #[serde(default = "default_visualizations_path")]
    pub visualizations_path: PathBuf,
    /// Where to export the built dataset as CSV, if anywhere
    #[serde(default)]
    pub dataset_path: Option<PathBuf>,
    pub start_date: NaiveDate,
    /// `"weeks"` or `"months"`
    #[serde(default = "default_interval_type")]
    pub interval_type: String,
    #[serde(default = "default_date_interval")]
    pub date_interval: u32,
    /// Band identifiers, bound to raster bands by position
    #[serde(default)]
    pub bands: Vec<String>,
    /// Preset name or band expression. Absent means raw bands.
    #[serde(default)]
    pub formula: Option<String>,
    /// Unknown names read as `mean`
    #[serde(default)]
    pub kpi: KpiStatistic,
    /// Strategies to run, by name
    #[serde(default)]
    pub models: Vec<String>,
    /// Hyperparameters per strategy name
    #[serde(default)]
    pub model_params: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub download: bool,
    #[serde(default)]
    pub train: bool,
    #[serde(default)]
    pub save_model: bool,
    #[serde(default)]
    pub load_model: bool,
    #[serde(default)]
    pub predict: bool,
    #[serde(default)]
    pub visualize: bool,
}

impl PipelineConfig {
    /// Read and validate a configuration file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|e| {
            ForecastError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_json_str(&contents)
    }

    /// Parse and validate a configuration document
    pub fn from_json_str(contents: &str) -> Result<Self> {
        let config: PipelineConfig = serde_json::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Check the settings that cannot be expressed by types alone
    pub fn validate(&self) -> Result<()> {
        if self.name_id.trim().is_empty() {
            return Err(ForecastError::Config("name_id must not be empty".to_string()));
        }
        if self.date_interval == 0 {
            return Err(ForecastError::Config(
                "date_interval must be at least 1".to_string(),
            ));
        }
        if self.bands.is_empty() {
            return Err(ForecastError::Config(
                "at least one band must be listed".to_string(),
            ));
        }
        Ok(())
    }

    pub fn step_unit(&self) -> StepUnit {
        StepUnit::from_config_name(&self.interval_type)
    }

    pub fn step(&self) -> Result<CalendarStep> {
        CalendarStep::new(self.step_unit(), self.date_interval)
    }

    pub fn statistic(&self) -> KpiStatistic {
        self.kpi
    }

    /// Directory holding this dataset's rasters
    pub fn raster_directory(&self) -> PathBuf {
        self.geotiffs_path.join(&self.name_id)
    }

    /// File a strategy's fitted estimator is saved to
    pub fn model_file(&self, strategy: &str) -> PathBuf {
        self.models_path
            .join(format!("{}_{}{}", self.name_id, strategy, MODEL_EXTENSION))
    }

    /// Chart file for a strategy
    pub fn visualization_file(&self, strategy: &str) -> PathBuf {
        self.visualizations_path
            .join(format!("{}_{}.svg", self.name_id, strategy))
    }

    /// CSV export target, when a dataset directory is configured
    pub fn dataset_file(&self) -> Option<PathBuf> {
        self.dataset_path
            .as_ref()
            .map(|dir| dir.join(format!("{}.csv", self.name_id)))
    }

    /// Hyperparameters configured for `strategy`, `null` when none are given
    pub fn params_for(&self, strategy: &str) -> serde_json::Value {
        self.model_params
            .get(strategy)
            .cloned()
            .unwrap_or(serde_json::Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_defaults_are_applied() {
        let config = PipelineConfig::from_json_str(
            r#"{"name_id": "field_a", "start_date": "2024-01-01", "bands": ["B04", "B08"]}"#,
        )
        .unwrap();

        assert_eq!(config.interval_type, "weeks");
        assert_eq!(config.date_interval, 1);
        assert_eq!(config.kpi, KpiStatistic::Mean);
        assert_eq!(config.formula, None);
        assert!(config.models.is_empty());
        assert!(!config.train && !config.predict && !config.visualize);
        assert_eq!(config.raster_directory(), PathBuf::from("geotiffs/field_a"));
        assert_eq!(config.dataset_file(), None);
    }

    #[test]
    fn test_output_paths() {
        let config = PipelineConfig::from_json_str(
            r#"{
                "name_id": "lake",
                "models_path": "out/models",
                "visualizations_path": "out/charts",
                "dataset_path": "out/data",
                "start_date": "2023-06-01",
                "interval_type": "months",
                "bands": ["B03", "B08"],
                "formula": "NDWI",
                "kpi": "max",
                "model_params": {"sarima": {"m": 52}}
            }"#,
        )
        .unwrap();

        assert_eq!(config.model_file("arima"), PathBuf::from("out/models/lake_arima.sav"));
        assert_eq!(
            config.visualization_file("sarima"),
            PathBuf::from("out/charts/lake_sarima.svg")
        );
        assert_eq!(config.dataset_file(), Some(PathBuf::from("out/data/lake.csv")));
        assert_eq!(config.step_unit(), StepUnit::Months);
        assert_eq!(config.statistic(), KpiStatistic::Max);
        assert_eq!(config.params_for("sarima"), json!({"m": 52}));
        assert_eq!(config.params_for("arima"), serde_json::Value::Null);
    }

    #[test]
    fn test_unknown_kpi_falls_back_to_mean() {
        let config = PipelineConfig::from_json_str(
            r#"{"name_id": "x", "start_date": "2024-01-01", "bands": ["B04"], "kpi": "median"}"#,
        )
        .unwrap();
        assert_eq!(config.statistic(), KpiStatistic::Mean);
    }

    #[test]
    fn test_invalid_documents() {
        let zero_interval = r#"{"name_id": "x", "start_date": "2024-01-01", "bands": ["B04"], "date_interval": 0}"#;
        assert!(matches!(
            PipelineConfig::from_json_str(zero_interval),
            Err(ForecastError::Config(_))
        ));

        let no_bands = r#"{"name_id": "x", "start_date": "2024-01-01"}"#;
        assert!(PipelineConfig::from_json_str(no_bands).is_err());

        let bad_date = r#"{"name_id": "x", "start_date": "01/01/2024", "bands": ["B04"]}"#;
        assert!(matches!(
            PipelineConfig::from_json_str(bad_date),
            Err(ForecastError::Config(_))
        ));
    }
}
