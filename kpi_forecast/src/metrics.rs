//! Metrics for evaluating forecast performance

use crate::error::{ForecastError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Error metrics of a forecast against held-out observations
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ErrorMetrics {
    /// Mean Absolute Error
    pub mae: f64,
    /// Mean Squared Error
    pub mse: f64,
    /// Root Mean Squared Error
    pub rmse: f64,
    /// Coefficient of determination
    pub r2: f64,
}

impl ErrorMetrics {
    /// Compare `predicted` with `actual`
    pub fn compute(predicted: &[f64], actual: &[f64]) -> Result<Self> {
        if predicted.len() != actual.len() || actual.is_empty() {
            return Err(ForecastError::ValidationError(format!(
                "Forecast ({}) and actual ({}) values must have the same non-zero length",
                predicted.len(),
                actual.len()
            )));
        }

        let n = actual.len() as f64;
        let mae = predicted
            .iter()
            .zip(actual)
            .map(|(p, a)| (a - p).abs())
            .sum::<f64>()
            / n;
        let ss_res: f64 = predicted.iter().zip(actual).map(|(p, a)| (a - p).powi(2)).sum();
        let mse = ss_res / n;

        let mean = actual.iter().sum::<f64>() / n;
        let ss_tot: f64 = actual.iter().map(|a| (a - mean).powi(2)).sum();
        let r2 = if ss_tot > 0.0 {
            1.0 - ss_res / ss_tot
        } else if ss_res == 0.0 {
            1.0
        } else {
            0.0
        };

        Ok(Self {
            mae,
            mse,
            rmse: mse.sqrt(),
            r2,
        })
    }
}

impl fmt::Display for ErrorMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "MAE={:.6} MSE={:.6} RMSE={:.6} R2={:.4}",
            self.mae, self.mse, self.rmse, self.r2
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_perfect_forecast() {
        let m = ErrorMetrics::compute(&[1.0, 2.0, 3.0], &[1.0, 2.0, 3.0]).unwrap();
        assert_eq!(m.mse, 0.0);
        assert_eq!(m.r2, 1.0);
    }

    #[test]
    fn test_known_values() {
        let m = ErrorMetrics::compute(&[2.0, 2.0, 2.0, 2.0], &[1.0, 2.0, 3.0, 4.0]).unwrap();
        assert_relative_eq!(m.mae, 1.0);
        assert_relative_eq!(m.mse, 1.5);
        assert_relative_eq!(m.rmse, 1.5f64.sqrt());
        // ss_tot = 5, ss_res = 6
        assert_relative_eq!(m.r2, -0.2, epsilon = 1e-12);
    }

    #[test]
    fn test_length_mismatch() {
        assert!(ErrorMetrics::compute(&[1.0], &[1.0, 2.0]).is_err());
        assert!(ErrorMetrics::compute(&[], &[]).is_err());
    }
}
