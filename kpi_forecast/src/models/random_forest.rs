//! Random forest regression on the KPI table

use super::tree::{check_feature_width, RegressionTree, TreeSettings};
use super::{validate_test_size, Estimator, ForecastResult};
use crate::data::Dataset;
use crate::error::{ForecastError, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Random forest hyperparameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RandomForestParams {
    pub n_estimators: usize,
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    pub max_features: Option<usize>,
    /// Draw each tree's rows with replacement
    pub bootstrap: bool,
    pub random_state: u64,
    /// Keep the KPI column out of the features
    pub exclude_target: bool,
    pub test_size: f64,
}

impl Default for RandomForestParams {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            max_depth: None,
            min_samples_split: 2,
            min_samples_leaf: 1,
            max_features: None,
            bootstrap: true,
            random_state: 42,
            exclude_target: false,
            test_size: 0.2,
        }
    }
}

/// Fitted forest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FittedForest {
    trees: Vec<RegressionTree>,
    n_features: usize,
    /// Training R² of the ensemble
    pub score: f64,
}

impl FittedForest {
    /// Average of the tree predictions
    pub fn predict(&self, features: &[Vec<f64>]) -> Vec<f64> {
        let mut totals = vec![0.0; features.len()];
        for tree in &self.trees {
            for (total, value) in totals.iter_mut().zip(tree.predict(features)) {
                *total += value;
            }
        }
        let n = self.trees.len().max(1) as f64;
        totals.into_iter().map(|t| t / n).collect()
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    /// Width of the feature rows the forest was fitted on
    pub fn n_features(&self) -> usize {
        self.n_features
    }
}

/// R² of `predicted` against `actual`
pub(crate) fn r2_score(predicted: &[f64], actual: &[f64]) -> f64 {
    crate::metrics::ErrorMetrics::compute(predicted, actual)
        .map(|m| m.r2)
        .unwrap_or(f64::NAN)
}

/// Bagged regression trees
#[derive(Debug, Clone)]
pub struct RandomForest {
    params: RandomForestParams,
}

impl RandomForest {
    pub fn new(params: RandomForestParams) -> Result<Self> {
        validate_test_size(params.test_size)?;
        if params.n_estimators == 0 {
            return Err(ForecastError::InvalidParameter(
                "n_estimators must be at least 1".to_string(),
            ));
        }
        let forest = Self { params };
        forest.tree_settings().validate()?;
        Ok(forest)
    }

    fn tree_settings(&self) -> TreeSettings {
        TreeSettings {
            max_depth: self.params.max_depth,
            min_samples_split: self.params.min_samples_split,
            min_samples_leaf: self.params.min_samples_leaf,
            max_features: self.params.max_features,
        }
    }
}

impl Estimator for RandomForest {
    type Fitted = FittedForest;

    fn name(&self) -> &'static str {
        "random_forest"
    }

    fn display_name(&self) -> &'static str {
        "Random Forest"
    }

    fn test_size(&self) -> f64 {
        self.params.test_size
    }

    fn fit(&self, train: &Dataset) -> Result<FittedForest> {
        let features = train.feature_matrix(!self.params.exclude_target)?;
        let targets = train.kpi_values()?;
        let settings = self.tree_settings();
        let mut rng = StdRng::seed_from_u64(self.params.random_state);

        let n = targets.len();
        let mut trees = Vec::with_capacity(self.params.n_estimators);
        for _ in 0..self.params.n_estimators {
            let tree = if self.params.bootstrap && n > 0 {
                let rows: Vec<usize> = (0..n).map(|_| rng.gen_range(0..n)).collect();
                let x: Vec<Vec<f64>> = rows.iter().map(|&r| features[r].clone()).collect();
                let y: Vec<f64> = rows.iter().map(|&r| targets[r]).collect();
                RegressionTree::fit(&x, &y, &settings, &mut rng)?
            } else {
                RegressionTree::fit(&features, &targets, &settings, &mut rng)?
            };
            trees.push(tree);
        }

        let mut fitted = FittedForest {
            trees,
            n_features: features.first().map_or(0, Vec::len),
            score: 0.0,
        };
        fitted.score = r2_score(&fitted.predict(&features), &targets);
        info!("Random forest training R2: {:.4}", fitted.score);
        Ok(fitted)
    }

    fn forecast(&self, fitted: &FittedForest, _train: &Dataset, test: &Dataset) -> Result<ForecastResult> {
        let features = test.feature_matrix(!self.params.exclude_target)?;
        check_feature_width(fitted.n_features, &features)?;
        Ok(ForecastResult::new(fitted.predict(&features)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dataset() -> Dataset {
        let values: Vec<f64> = (0..20).map(|i| 0.2 + 0.03 * i as f64).collect();
        Dataset::new("mean", values, (1..=20).collect()).unwrap()
    }

    #[test]
    fn test_seeded_forests_are_identical() {
        let params = RandomForestParams {
            n_estimators: 10,
            ..RandomForestParams::default()
        };
        let a = RandomForest::new(params.clone()).unwrap().fit(&dataset()).unwrap();
        let b = RandomForest::new(params).unwrap().fit(&dataset()).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.n_trees(), 10);
    }

    #[test]
    fn test_zero_trees_is_rejected() {
        let params = RandomForestParams {
            n_estimators: 0,
            ..RandomForestParams::default()
        };
        assert!(RandomForest::new(params).is_err());
    }

    #[test]
    fn test_without_bootstrap_fits_training_data() {
        let forest = RandomForest::new(RandomForestParams {
            n_estimators: 3,
            bootstrap: false,
            ..RandomForestParams::default()
        })
        .unwrap();
        let fitted = forest.fit(&dataset()).unwrap();
        assert!((fitted.score - 1.0).abs() < 1e-12);
    }
}
