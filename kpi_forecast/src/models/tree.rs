//! CART regression trees

use crate::error::{ForecastError, Result};
use rand::seq::index::sample;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Growth limits of a tree
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TreeSettings {
    /// Unlimited when `None`
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    /// Features considered per split, all when `None`
    pub max_features: Option<usize>,
}

impl Default for TreeSettings {
    fn default() -> Self {
        Self {
            max_depth: None,
            min_samples_split: 2,
            min_samples_leaf: 1,
            max_features: None,
        }
    }
}

impl TreeSettings {
    pub fn validate(&self) -> Result<()> {
        if self.min_samples_split < 2 {
            return Err(ForecastError::InvalidParameter(
                "min_samples_split must be at least 2".to_string(),
            ));
        }
        if self.min_samples_leaf < 1 {
            return Err(ForecastError::InvalidParameter(
                "min_samples_leaf must be at least 1".to_string(),
            ));
        }
        if self.max_features == Some(0) {
            return Err(ForecastError::InvalidParameter(
                "max_features must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
enum Node {
    Leaf {
        value: f64,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: Box<Node>,
        right: Box<Node>,
    },
}

/// A fitted regression tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionTree {
    root: Node,
    n_features: usize,
}

struct Split {
    feature: usize,
    threshold: f64,
    sse: f64,
}

/// Reject feature rows whose width differs from the fitted layout
pub fn check_feature_width(expected: usize, features: &[Vec<f64>]) -> Result<()> {
    match features.iter().find(|row| row.len() != expected) {
        Some(row) => Err(ForecastError::ValidationError(format!(
            "Estimator was fitted on {} feature(s), got rows of width {}",
            expected,
            row.len()
        ))),
        None => Ok(()),
    }
}

fn mean(targets: &[f64], rows: &[usize]) -> f64 {
    rows.iter().map(|&r| targets[r]).sum::<f64>() / rows.len() as f64
}

impl RegressionTree {
    /// Fit a tree on `features` (one row per sample) and `targets`
    pub fn fit<R: Rng>(
        features: &[Vec<f64>],
        targets: &[f64],
        settings: &TreeSettings,
        rng: &mut R,
    ) -> Result<Self> {
        if features.is_empty() || features.len() != targets.len() {
            return Err(ForecastError::ValidationError(format!(
                "Need matching non-empty features ({}) and targets ({})",
                features.len(),
                targets.len()
            )));
        }
        let n_features = features[0].len();
        if n_features == 0 || features.iter().any(|row| row.len() != n_features) {
            return Err(ForecastError::ValidationError(
                "Feature rows must share a non-zero width".to_string(),
            ));
        }

        let rows: Vec<usize> = (0..features.len()).collect();
        let root = grow(features, targets, &rows, 0, settings, n_features, rng);
        Ok(Self { root, n_features })
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    pub fn predict_row(&self, row: &[f64]) -> f64 {
        let mut node = &self.root;
        loop {
            match node {
                Node::Leaf { value } => return *value,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    let x = row.get(*feature).copied().unwrap_or(0.0);
                    node = if x <= *threshold { left } else { right };
                }
            }
        }
    }

    pub fn predict(&self, features: &[Vec<f64>]) -> Vec<f64> {
        features.iter().map(|row| self.predict_row(row)).collect()
    }

    /// Depth of the deepest leaf
    pub fn depth(&self) -> usize {
        fn walk(node: &Node) -> usize {
            match node {
                Node::Leaf { .. } => 0,
                Node::Split { left, right, .. } => 1 + walk(left).max(walk(right)),
            }
        }
        walk(&self.root)
    }
}

fn grow<R: Rng>(
    features: &[Vec<f64>],
    targets: &[f64],
    rows: &[usize],
    depth: usize,
    settings: &TreeSettings,
    n_features: usize,
    rng: &mut R,
) -> Node {
    let value = mean(targets, rows);
    let depth_reached = settings.max_depth.map_or(false, |max| depth >= max);
    if depth_reached || rows.len() < settings.min_samples_split {
        return Node::Leaf { value };
    }

    let candidates: Vec<usize> = match settings.max_features {
        Some(k) if k < n_features => sample(rng, n_features, k).into_vec(),
        _ => (0..n_features).collect(),
    };

    let parent_sse: f64 = rows.iter().map(|&r| (targets[r] - value).powi(2)).sum();
    let best = candidates
        .into_iter()
        .filter_map(|feature| best_split(features, targets, rows, feature, settings.min_samples_leaf))
        .min_by(|a, b| a.sse.total_cmp(&b.sse));

    match best {
        Some(split) if split.sse < parent_sse - 1e-12 => {
            let (left, right): (Vec<usize>, Vec<usize>) = rows
                .iter()
                .copied()
                .partition(|&r| features[r][split.feature] <= split.threshold);
            Node::Split {
                feature: split.feature,
                threshold: split.threshold,
                left: Box::new(grow(features, targets, &left, depth + 1, settings, n_features, rng)),
                right: Box::new(grow(features, targets, &right, depth + 1, settings, n_features, rng)),
            }
        }
        _ => Node::Leaf { value },
    }
}

/// Lowest squared-error threshold on one feature, at midpoints between
/// distinct sorted values
fn best_split(
    features: &[Vec<f64>],
    targets: &[f64],
    rows: &[usize],
    feature: usize,
    min_leaf: usize,
) -> Option<Split> {
    let mut sorted: Vec<(f64, f64)> = rows
        .iter()
        .map(|&r| (features[r][feature], targets[r]))
        .collect();
    sorted.sort_by(|a, b| a.0.total_cmp(&b.0));

    let n = sorted.len();
    let total_sum: f64 = sorted.iter().map(|(_, y)| y).sum();
    let total_sq: f64 = sorted.iter().map(|(_, y)| y * y).sum();

    let mut left_sum = 0.0;
    let mut left_sq = 0.0;
    let mut best: Option<Split> = None;
    for i in 0..n.saturating_sub(1) {
        let (x, y) = sorted[i];
        left_sum += y;
        left_sq += y * y;

        let left_n = i + 1;
        let right_n = n - left_n;
        if left_n < min_leaf || right_n < min_leaf || sorted[i + 1].0 <= x {
            continue;
        }

        let right_sum = total_sum - left_sum;
        let right_sq = total_sq - left_sq;
        let sse = (left_sq - left_sum * left_sum / left_n as f64)
            + (right_sq - right_sum * right_sum / right_n as f64);
        if best.as_ref().map_or(true, |b| sse < b.sse) {
            best = Some(Split {
                feature,
                threshold: (x + sorted[i + 1].0) / 2.0,
                sse,
            });
        }
    }
    best
}
