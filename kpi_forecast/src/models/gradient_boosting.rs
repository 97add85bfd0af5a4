//! Gradient boosting regression on the KPI table

use super::random_forest::r2_score;
use super::tree::{check_feature_width, RegressionTree, TreeSettings};
use super::{validate_test_size, Estimator, ForecastResult};
use crate::data::Dataset;
use crate::error::{ForecastError, Result};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Gradient boosting hyperparameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GradientBoostingParams {
    pub n_estimators: usize,
    pub learning_rate: f64,
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    /// Keep the KPI column out of the features
    pub exclude_target: bool,
    pub test_size: f64,
}

impl Default for GradientBoostingParams {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            learning_rate: 0.1,
            max_depth: None,
            min_samples_split: 2,
            min_samples_leaf: 1,
            exclude_target: false,
            test_size: 0.2,
        }
    }
}

/// Fitted boosting ensemble
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FittedBoosting {
    initial: f64,
    learning_rate: f64,
    stages: Vec<RegressionTree>,
    n_features: usize,
    /// Training R² of the ensemble
    pub score: f64,
}

impl FittedBoosting {
    pub fn predict(&self, features: &[Vec<f64>]) -> Vec<f64> {
        let mut predictions = vec![self.initial; features.len()];
        for stage in &self.stages {
            for (p, step) in predictions.iter_mut().zip(stage.predict(features)) {
                *p += self.learning_rate * step;
            }
        }
        predictions
    }

    pub fn n_stages(&self) -> usize {
        self.stages.len()
    }

    /// Width of the feature rows the ensemble was fitted on
    pub fn n_features(&self) -> usize {
        self.n_features
    }
}

/// Squared-loss boosting from the mean
#[derive(Debug, Clone)]
pub struct GradientBoosting {
    params: GradientBoostingParams,
}

impl GradientBoosting {
    pub fn new(params: GradientBoostingParams) -> Result<Self> {
        validate_test_size(params.test_size)?;
        if params.n_estimators == 0 {
            return Err(ForecastError::InvalidParameter(
                "n_estimators must be at least 1".to_string(),
            ));
        }
        if !(params.learning_rate > 0.0 && params.learning_rate.is_finite()) {
            return Err(ForecastError::InvalidParameter(format!(
                "learning_rate must be positive, got {}",
                params.learning_rate
            )));
        }
        let boosting = Self { params };
        boosting.tree_settings().validate()?;
        Ok(boosting)
    }

    fn tree_settings(&self) -> TreeSettings {
        TreeSettings {
            max_depth: self.params.max_depth,
            min_samples_split: self.params.min_samples_split,
            min_samples_leaf: self.params.min_samples_leaf,
            max_features: None,
        }
    }
}

impl Estimator for GradientBoosting {
    type Fitted = FittedBoosting;

    fn name(&self) -> &'static str {
        "gradient_boosting"
    }

    fn display_name(&self) -> &'static str {
        "Gradient Boosting"
    }

    fn test_size(&self) -> f64 {
        self.params.test_size
    }

    fn fit(&self, train: &Dataset) -> Result<FittedBoosting> {
        let features = train.feature_matrix(!self.params.exclude_target)?;
        let targets = train.kpi_values()?;
        if targets.is_empty() {
            return Err(ForecastError::InsufficientData { needed: 1, got: 0 });
        }

        let settings = self.tree_settings();
        // every feature is considered, so the generator is never drawn from
        let mut rng = StdRng::seed_from_u64(0);

        let initial = targets.iter().sum::<f64>() / targets.len() as f64;
        let mut predictions = vec![initial; targets.len()];
        let mut stages = Vec::with_capacity(self.params.n_estimators);
        for _ in 0..self.params.n_estimators {
            let residuals: Vec<f64> = targets.iter().zip(&predictions).map(|(y, p)| y - p).collect();
            let stage = RegressionTree::fit(&features, &residuals, &settings, &mut rng)?;
            for (p, step) in predictions.iter_mut().zip(stage.predict(&features)) {
                *p += self.params.learning_rate * step;
            }
            stages.push(stage);
        }

        let score = r2_score(&predictions, &targets);
        info!("Gradient boosting training R2: {:.4}", score);
        Ok(FittedBoosting {
            initial,
            learning_rate: self.params.learning_rate,
            stages,
            n_features: features.first().map_or(0, Vec::len),
            score,
        })
    }

    fn forecast(&self, fitted: &FittedBoosting, _train: &Dataset, test: &Dataset) -> Result<ForecastResult> {
        let features = test.feature_matrix(!self.params.exclude_target)?;
        check_feature_width(fitted.n_features, &features)?;
        Ok(ForecastResult::new(fitted.predict(&features)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn dataset() -> Dataset {
        let values: Vec<f64> = (0..10).map(|i| if i < 5 { 0.1 } else { 0.6 }).collect();
        Dataset::new("mean", values, (1..=10).collect()).unwrap()
    }

    #[test]
    fn test_boosting_approaches_targets() {
        let boosting = GradientBoosting::new(GradientBoostingParams {
            n_estimators: 50,
            exclude_target: true,
            ..GradientBoostingParams::default()
        })
        .unwrap();
        let fitted = boosting.fit(&dataset()).unwrap();
        assert_eq!(fitted.n_stages(), 50);
        // residual shrinks by (1 - 0.1) per stage
        let predictions = fitted.predict(&[vec![1.0], vec![10.0]]);
        assert_relative_eq!(predictions[0], 0.35 - 0.25 * (1.0 - 0.9f64.powi(50)), epsilon = 1e-9);
        assert_relative_eq!(predictions[1], 0.35 + 0.25 * (1.0 - 0.9f64.powi(50)), epsilon = 1e-9);
    }

    #[test]
    fn test_invalid_learning_rate() {
        let params = GradientBoostingParams {
            learning_rate: 0.0,
            ..GradientBoostingParams::default()
        };
        assert!(GradientBoosting::new(params).is_err());
    }
}
