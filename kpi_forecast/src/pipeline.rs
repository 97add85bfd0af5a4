//! End-to-end run: rasters to dataset to fitted, evaluated and charted models

use crate::config::PipelineConfig;
use crate::data::{Dataset, DatasetBuilder};
use crate::error::{ForecastError, Result};
use crate::metrics::ErrorMetrics;
use crate::models::{create_model, ForecastModel, ForecastResult};
use std::path::PathBuf;
use tracing::{info, warn};

/// What one strategy produced during a run
#[derive(Debug, Clone)]
pub struct ModelReport {
    pub strategy: String,
    pub metrics: Option<ErrorMetrics>,
    pub forecast: Option<ForecastResult>,
    pub model_file: Option<PathBuf>,
    pub chart_file: Option<PathBuf>,
}

/// Outcome of a pipeline run
#[derive(Debug, Clone)]
pub struct RunReport {
    /// Built dataset, absent when no phase needed one
    pub dataset: Option<Dataset>,
    pub models: Vec<ModelReport>,
}

/// Drives every configured phase for one dataset
#[derive(Debug, Clone)]
pub struct Pipeline {
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    fn stage<T>(&self, stage: &str, result: Result<T>) -> Result<T> {
        result.map_err(|err| err.in_stage(&self.config.name_id, stage))
    }

    fn needs_models(&self) -> bool {
        let c = &self.config;
        c.train || c.save_model || c.load_model || c.predict || c.visualize
    }

    /// Run the configured phases in order. The first failure stops the run.
    pub fn run(&self) -> Result<RunReport> {
        let config = &self.config;
        info!("Running pipeline for {}", config.name_id);

        if config.download {
            info!(
                "Download requested for {}; acquisitions are fetched by the external downloader into {}",
                config.name_id,
                config.raster_directory().display()
            );
        }

        let mut report = RunReport {
            dataset: None,
            models: Vec::new(),
        };
        if !self.needs_models() && config.dataset_file().is_none() {
            info!("No phase needs a dataset, nothing else to do");
            return Ok(report);
        }

        let dataset = self.stage("dataset", self.build_dataset())?;
        if let Some(file) = config.dataset_file() {
            self.stage("export", dataset.to_csv(&file))?;
        }

        if self.needs_models() {
            if config.models.is_empty() {
                warn!("No models configured for {}", config.name_id);
            }
            for strategy in &config.models {
                let model = self.stage(
                    "model",
                    create_model(strategy, dataset.clone(), &config.params_for(strategy)),
                )?;
                report.models.push(self.run_model(model)?);
            }
        }

        report.dataset = Some(dataset);
        Ok(report)
    }

    fn build_dataset(&self) -> Result<Dataset> {
        let builder = DatasetBuilder::from_config(&self.config)?;
        let dataset = builder.build(&self.config.raster_directory())?;
        info!("Dataframe:\n{}", dataset.dataframe());
        if dataset.is_empty() {
            return Err(ForecastError::DatasetBuild(format!(
                "no usable acquisitions in {}",
                self.config.raster_directory().display()
            )));
        }
        Ok(dataset)
    }

    fn run_model(&self, mut model: Box<dyn ForecastModel>) -> Result<ModelReport> {
        let config = &self.config;
        let strategy = model.name().to_string();
        let model_file = config.model_file(&strategy);
        let mut report = ModelReport {
            strategy: strategy.clone(),
            metrics: None,
            forecast: None,
            model_file: None,
            chart_file: None,
        };

        if config.train {
            self.stage("train", model.train())?;
            report.metrics = Some(self.stage("evaluate", model.evaluate())?);
        }
        if config.save_model {
            self.stage("save", model.persist(&model_file))?;
            report.model_file = Some(model_file.clone());
        }
        if config.load_model {
            self.stage("load", model.load(&model_file))?;
        }
        if config.predict {
            report.forecast = Some(self.stage("predict", model.predict(Some(&model_file)))?);
        }
        if config.visualize {
            let chart_file = config.visualization_file(&strategy);
            self.stage(
                "visualize",
                model.visualize(&chart_file, &config.name_id, config.step_unit().label()),
            )?;
            report.chart_file = Some(chart_file);
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn config(json: &str) -> PipelineConfig {
        PipelineConfig::from_json_str(json).unwrap()
    }

    #[test]
    fn test_missing_directory_is_wrapped_with_stage() {
        let dir = tempdir().unwrap();
        let json = format!(
            r#"{{"name_id": "ghost", "geotiffs_path": "{}", "start_date": "2024-01-01",
                "bands": ["B04"], "train": true, "models": ["arima"]}}"#,
            dir.path().display()
        );
        let err = Pipeline::new(config(&json)).unwrap().run().unwrap_err();
        match err {
            ForecastError::Stage { name_id, stage, source } => {
                assert_eq!(name_id, "ghost");
                assert_eq!(stage, "dataset");
                assert!(matches!(*source, ForecastError::DirectoryNotFound(_)));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_nothing_to_do() {
        let report = Pipeline::new(config(
            r#"{"name_id": "idle", "start_date": "2024-01-01", "bands": ["B04"], "download": true}"#,
        ))
        .unwrap()
        .run()
        .unwrap();
        assert!(report.dataset.is_none());
        assert!(report.models.is_empty());
    }
}
