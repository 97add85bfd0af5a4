//! Forecasting models for KPI time series
//!
//! Every strategy is an [`Estimator`]: a hyperparameter record that can fit a
//! serializable estimator on the train split and forecast the test split.
//! [`Model`] wraps an estimator with the dataset, the split and the fitted
//! state, and exposes the uniform [`ForecastModel`] contract the pipeline
//! drives through `Box<dyn ForecastModel>`.

use crate::data::Dataset;
use crate::error::{ForecastError, Result};
use crate::metrics::ErrorMetrics;
use crate::visualize::{render_forecast_chart, ForecastChart};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

pub mod arima;
pub mod gradient_boosting;
pub mod optimize;
pub mod random_forest;
pub mod sarima;
pub mod tree;

pub use arima::{Arima, ArimaOrder, ArimaParams, FittedArima};
pub use gradient_boosting::{GradientBoosting, GradientBoostingParams};
pub use random_forest::{RandomForest, RandomForestParams};
pub use sarima::{InformationCriterion, Sarima, SarimaParams};

/// Extension every persisted model file must carry
pub const MODEL_EXTENSION: &str = ".sav";

/// Strategy names accepted by [`create_model`]
pub const STRATEGIES: [&str; 4] = ["arima", "sarima", "random_forest", "gradient_boosting"];

/// Forecast result containing predicted values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastResult {
    values: Vec<f64>,
    /// Lower and upper prediction bounds per step (optional)
    intervals: Option<Vec<(f64, f64)>>,
}

impl ForecastResult {
    /// Create a new forecast result
    pub fn new(values: Vec<f64>) -> Self {
        Self {
            values,
            intervals: None,
        }
    }

    /// Create a new forecast result with prediction intervals
    pub fn new_with_intervals(values: Vec<f64>, intervals: Vec<(f64, f64)>) -> Result<Self> {
        if values.len() != intervals.len() {
            return Err(ForecastError::ValidationError(format!(
                "Values length ({}) doesn't match intervals length ({})",
                values.len(),
                intervals.len()
            )));
        }
        Ok(Self {
            values,
            intervals: Some(intervals),
        })
    }

    /// Get the forecasted values
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Number of periods forecasted
    pub fn horizon(&self) -> usize {
        self.values.len()
    }

    /// Get the prediction intervals, if available
    pub fn intervals(&self) -> Option<&[(f64, f64)]> {
        self.intervals.as_deref()
    }
}

/// A forecasting technique with its hyperparameters
pub trait Estimator: Debug {
    /// The fitted state, persisted with bincode
    type Fitted: Serialize + DeserializeOwned + Debug + Clone;

    /// Short name used in file names and configuration
    fn name(&self) -> &'static str;

    /// Name shown on charts
    fn display_name(&self) -> &'static str;

    /// Fraction of the dataset held out for testing
    fn test_size(&self) -> f64;

    /// Fit on the train split
    fn fit(&self, train: &Dataset) -> Result<Self::Fitted>;

    /// Forecast one value per row of `test`, which directly follows `train`
    fn forecast(&self, fitted: &Self::Fitted, train: &Dataset, test: &Dataset)
        -> Result<ForecastResult>;
}

/// Uniform lifecycle shared by every strategy
pub trait ForecastModel: Debug {
    /// Strategy name
    fn name(&self) -> &str;

    /// Strategy name shown on charts
    fn display_name(&self) -> &str;

    /// Whether an estimator is fitted or restored
    fn is_fitted(&self) -> bool;

    /// Last file the estimator was saved to
    fn saved_path(&self) -> Option<&Path>;

    /// Split the dataset and fit the estimator on the train part.
    /// A second call replaces both.
    fn train(&mut self) -> Result<()>;

    /// Forecast the test part and compare against it
    fn evaluate(&mut self) -> Result<ErrorMetrics>;

    /// Forecast the held-out horizon, restoring an estimator from
    /// `model_path` or the last saved path when none is fitted
    fn predict(&mut self, model_path: Option<&Path>) -> Result<ForecastResult>;

    /// Save the fitted estimator to a `.sav` file
    fn persist(&mut self, path: &Path) -> Result<()>;

    /// Restore an estimator from a `.sav` file and make it current
    fn load(&mut self, path: &Path) -> Result<()>;

    /// Draw train, test and forecast curves to an SVG file
    fn visualize(&mut self, path: &Path, display_name: &str, time_unit: &str) -> Result<()>;
}

#[derive(Serialize)]
struct EnvelopeRef<'a, F> {
    strategy: &'a str,
    estimator: &'a F,
}

#[derive(Deserialize)]
struct Envelope<F> {
    strategy: String,
    estimator: F,
}

fn check_extension(path: &Path) -> Result<()> {
    let valid = path
        .file_name()
        .map(|name| name.to_string_lossy().ends_with(MODEL_EXTENSION))
        .unwrap_or(false);
    if valid {
        Ok(())
    } else {
        Err(ForecastError::InvalidFilenameExtension {
            path: path.to_path_buf(),
            expected: MODEL_EXTENSION.to_string(),
        })
    }
}

/// A strategy bound to a dataset
#[derive(Debug)]
pub struct Model<E: Estimator> {
    estimator: E,
    dataset: Dataset,
    split: Option<(Dataset, Dataset)>,
    fitted: Option<E::Fitted>,
    saved_path: Option<PathBuf>,
}

impl<E: Estimator> Model<E> {
    /// Create a new unfitted model
    pub fn new(estimator: E, dataset: Dataset) -> Self {
        Self {
            estimator,
            dataset,
            split: None,
            fitted: None,
            saved_path: None,
        }
    }

    pub fn estimator(&self) -> &E {
        &self.estimator
    }

    pub fn dataset(&self) -> &Dataset {
        &self.dataset
    }

    /// The fitted estimator, if any
    pub fn fitted(&self) -> Option<&E::Fitted> {
        self.fitted.as_ref()
    }

    /// Read an estimator from `path` without changing this model
    pub fn restore(&self, path: &Path) -> Result<E::Fitted> {
        check_extension(path)?;
        if !path.is_file() {
            return Err(ForecastError::ModelNotFound(path.display().to_string()));
        }

        let bytes = fs::read(path)?;
        // the strategy name leads the envelope
        let strategy: String = bincode::deserialize(&bytes)?;
        if strategy != self.estimator.name() {
            return Err(ForecastError::Serialization(format!(
                "{} holds a '{}' model, expected '{}'",
                path.display(),
                strategy,
                self.estimator.name()
            )));
        }

        let envelope: Envelope<E::Fitted> = bincode::deserialize(&bytes)?;
        Ok(envelope.estimator)
    }

    /// Train and test splits, computed on first use
    fn splits(&mut self) -> Result<(Dataset, Dataset)> {
        if let Some(split) = &self.split {
            return Ok(split.clone());
        }
        let split = self.dataset.split(self.estimator.test_size())?;
        self.split = Some(split.clone());
        Ok(split)
    }

    fn ensure_fitted(&mut self, model_path: Option<&Path>) -> Result<()> {
        if self.fitted.is_some() {
            return Ok(());
        }
        match model_path.map(Path::to_path_buf).or_else(|| self.saved_path.clone()) {
            Some(path) => self.load(&path),
            None => Err(ForecastError::ModelNotFound(format!(
                "{} has not been trained or loaded",
                self.estimator.name()
            ))),
        }
    }

    fn forecast_test(&mut self, model_path: Option<&Path>) -> Result<(Dataset, Dataset, ForecastResult)> {
        self.ensure_fitted(model_path)?;
        let (train, test) = self.splits()?;
        let fitted = self
            .fitted
            .as_ref()
            .ok_or_else(|| ForecastError::ModelNotFound(self.estimator.name().to_string()))?;
        let forecast = self.estimator.forecast(fitted, &train, &test)?;
        Ok((train, test, forecast))
    }
}

impl<E: Estimator> ForecastModel for Model<E> {
    fn name(&self) -> &str {
        self.estimator.name()
    }

    fn display_name(&self) -> &str {
        self.estimator.display_name()
    }

    fn is_fitted(&self) -> bool {
        self.fitted.is_some()
    }

    fn saved_path(&self) -> Option<&Path> {
        self.saved_path.as_deref()
    }

    fn train(&mut self) -> Result<()> {
        self.split = None;
        let (train, test) = self.splits()?;
        info!(
            "Training {} on {} observations ({} held out)",
            self.estimator.name(),
            train.len(),
            test.len()
        );
        self.fitted = Some(self.estimator.fit(&train)?);
        Ok(())
    }

    fn evaluate(&mut self) -> Result<ErrorMetrics> {
        let (_, test, forecast) = self.forecast_test(None)?;
        let metrics = ErrorMetrics::compute(forecast.values(), &test.kpi_values()?)?;
        info!("{} evaluation: {}", self.estimator.name(), metrics);
        Ok(metrics)
    }

    fn predict(&mut self, model_path: Option<&Path>) -> Result<ForecastResult> {
        let (_, _, forecast) = self.forecast_test(model_path)?;
        info!("{} prediction: {:?}", self.estimator.name(), forecast.values());
        Ok(forecast)
    }

    fn persist(&mut self, path: &Path) -> Result<()> {
        check_extension(path)?;
        let fitted = self.fitted.as_ref().ok_or_else(|| {
            ForecastError::ModelNotFound(format!(
                "{} has no fitted estimator to save",
                self.estimator.name()
            ))
        })?;

        let bytes = bincode::serialize(&EnvelopeRef {
            strategy: self.estimator.name(),
            estimator: fitted,
        })?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, bytes)?;

        info!("Saved {} model to {}", self.estimator.name(), path.display());
        self.saved_path = Some(path.to_path_buf());
        Ok(())
    }

    fn load(&mut self, path: &Path) -> Result<()> {
        let fitted = self.restore(path)?;
        self.fitted = Some(fitted);
        info!("Loaded {} model from {}", self.estimator.name(), path.display());
        Ok(())
    }

    fn visualize(&mut self, path: &Path, display_name: &str, time_unit: &str) -> Result<()> {
        let (train, test, forecast) = self.forecast_test(None)?;
        let chart = ForecastChart {
            title: format!("{} - {}", display_name, self.estimator.display_name()),
            x_label: format!("Time ({})", time_unit),
            y_label: format!("KPI ({})", self.dataset.kpi_column()),
            train: train.kpi_values()?,
            test: test.kpi_values()?,
            forecast: forecast.values().to_vec(),
        };
        render_forecast_chart(path, &chart)?;
        info!("Saved {} chart to {}", self.estimator.name(), path.display());
        Ok(())
    }
}

fn parse_params<P: DeserializeOwned + Default>(strategy: &str, params: &serde_json::Value) -> Result<P> {
    if params.is_null() {
        return Ok(P::default());
    }
    serde_json::from_value(params.clone()).map_err(|e| {
        ForecastError::InvalidParameter(format!("{} parameters: {}", strategy, e))
    })
}

/// Build the named strategy over `dataset`.
///
/// `params` is the strategy's hyperparameter object; `null` selects the
/// defaults and missing fields keep theirs.
pub fn create_model(
    strategy: &str,
    dataset: Dataset,
    params: &serde_json::Value,
) -> Result<Box<dyn ForecastModel>> {
    let model: Box<dyn ForecastModel> = match strategy {
        "arima" => Box::new(Model::new(
            Arima::new(parse_params(strategy, params)?)?,
            dataset,
        )),
        "sarima" => Box::new(Model::new(
            Sarima::new(parse_params(strategy, params)?)?,
            dataset,
        )),
        "random_forest" => Box::new(Model::new(
            RandomForest::new(parse_params(strategy, params)?)?,
            dataset,
        )),
        "gradient_boosting" => Box::new(Model::new(
            GradientBoosting::new(parse_params(strategy, params)?)?,
            dataset,
        )),
        other => {
            return Err(ForecastError::Config(format!(
                "unknown model '{}', expected one of {}",
                other,
                STRATEGIES.join(", ")
            )))
        }
    };
    Ok(model)
}

pub(crate) fn validate_test_size(test_size: f64) -> Result<()> {
    if (0.0..1.0).contains(&test_size) {
        Ok(())
    } else {
        Err(ForecastError::InvalidParameter(format!(
            "test_size must be in [0, 1), got {}",
            test_size
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn dataset() -> Dataset {
        let values = (0..12).map(|i| (i as f64 * 0.5).sin()).collect();
        Dataset::new("mean", values, (1..=12).collect()).unwrap()
    }

    #[test]
    fn test_unknown_strategy() {
        let err = create_model("prophet", dataset(), &serde_json::Value::Null).unwrap_err();
        assert!(matches!(err, ForecastError::Config(_)));
    }

    #[test]
    fn test_bad_parameters_are_rejected() {
        let err = create_model("arima", dataset(), &json!({"p": "five"})).unwrap_err();
        assert!(matches!(err, ForecastError::InvalidParameter(_)));

        let err = create_model("random_forest", dataset(), &json!({"n_trees": 5})).unwrap_err();
        assert!(matches!(err, ForecastError::InvalidParameter(_)));
    }

    #[test]
    fn test_extension_check() {
        assert!(check_extension(Path::new("dir/model.sav")).is_ok());
        assert!(check_extension(Path::new("model.pkl")).is_err());
        assert!(check_extension(Path::new("model.sav.bak")).is_err());
    }

    #[test]
    fn test_untrained_model_reports_model_not_found() {
        let mut model = create_model("gradient_boosting", dataset(), &json!({"n_estimators": 3})).unwrap();
        assert!(!model.is_fitted());
        assert!(matches!(model.evaluate(), Err(ForecastError::ModelNotFound(_))));
        assert!(matches!(model.predict(None), Err(ForecastError::ModelNotFound(_))));
    }

    #[test]
    fn test_forecast_result_interval_length() {
        assert!(ForecastResult::new_with_intervals(vec![1.0], vec![]).is_err());
        let result = ForecastResult::new_with_intervals(vec![1.0], vec![(0.5, 1.5)]).unwrap();
        assert_eq!(result.horizon(), 1);
        assert_eq!(result.intervals(), Some(&[(0.5, 1.5)][..]));
    }
}
