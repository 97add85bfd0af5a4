//! Per-image KPI reduction
//!
//! A stack of index fields has the image on axis 0 and spatial (or band)
//! axes after it. Reducing collapses every non-image axis into one scalar.

use crate::{MathError, Result};
use ndarray::{Array1, ArrayD, ArrayViewD, Axis};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

/// Statistic used to summarize one image
///
/// Deserializes from its name with the same fallback as
/// [`KpiStatistic::parse_or_mean`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum KpiStatistic {
    #[default]
    Mean,
    Max,
    Min,
    /// Population standard deviation (ddof = 0)
    Std,
}

impl KpiStatistic {
    /// Column name used for the KPI in a dataset
    pub fn name(&self) -> &'static str {
        match self {
            KpiStatistic::Mean => "mean",
            KpiStatistic::Max => "max",
            KpiStatistic::Min => "min",
            KpiStatistic::Std => "std",
        }
    }

    /// Parse a statistic name, falling back to `Mean` for anything unknown.
    ///
    /// Older configuration files carry free-form KPI names, so an unknown name
    /// is not an error here.
    pub fn parse_or_mean(name: &str) -> Self {
        name.parse().unwrap_or(KpiStatistic::Mean)
    }

    /// Apply the statistic to every element of one image
    pub fn apply(&self, values: ArrayViewD<'_, f64>) -> Result<f64> {
        let count = values.len();
        if count == 0 {
            return Err(MathError::InsufficientData(
                "cannot reduce an image without pixels".to_string(),
            ));
        }

        let value = match self {
            KpiStatistic::Mean => values.sum() / count as f64,
            KpiStatistic::Max => values.fold(f64::NEG_INFINITY, |acc, &v| acc.max(v)),
            KpiStatistic::Min => values.fold(f64::INFINITY, |acc, &v| acc.min(v)),
            KpiStatistic::Std => {
                let mean = values.sum() / count as f64;
                let variance = values.fold(0.0, |acc, &v| acc + (v - mean).powi(2)) / count as f64;
                variance.sqrt()
            }
        };
        Ok(value)
    }
}

impl FromStr for KpiStatistic {
    type Err = MathError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "mean" => Ok(KpiStatistic::Mean),
            "max" => Ok(KpiStatistic::Max),
            "min" => Ok(KpiStatistic::Min),
            "std" => Ok(KpiStatistic::Std),
            other => Err(MathError::InvalidInput(format!(
                "unknown KPI statistic '{}'",
                other
            ))),
        }
    }
}

impl<'de> Deserialize<'de> for KpiStatistic {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        Ok(KpiStatistic::parse_or_mean(&name))
    }
}

impl fmt::Display for KpiStatistic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Reduce `stack` over `axes`, leaving one value per image.
///
/// `axes` must list every axis except the image axis 0, in any order.
pub fn reduce(stack: &ArrayD<f64>, axes: &[usize], statistic: KpiStatistic) -> Result<Array1<f64>> {
    let ndim = stack.ndim();
    if ndim < 2 {
        return Err(MathError::InvalidInput(format!(
            "expected a stack of images with at least 2 axes, got {}",
            ndim
        )));
    }

    let mut requested = axes.to_vec();
    requested.sort_unstable();
    requested.dedup();
    let spatial: Vec<usize> = (1..ndim).collect();
    if requested != spatial {
        return Err(MathError::InvalidInput(format!(
            "axes {:?} must cover exactly the non-image axes {:?}",
            axes, spatial
        )));
    }

    stack
        .axis_iter(Axis(0))
        .map(|image| statistic.apply(image))
        .collect::<Result<Vec<f64>>>()
        .map(Array1::from)
}

/// Reduce every non-image axis of `stack`
pub fn reduce_images(stack: &ArrayD<f64>, statistic: KpiStatistic) -> Result<Array1<f64>> {
    let axes: Vec<usize> = (1..stack.ndim().max(1)).collect();
    reduce(stack, &axes, statistic)
}
