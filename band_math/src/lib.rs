//! # Band Math
//!
//! Pixel arithmetic for multispectral imagery.
//! This crate provides a small, sandboxed expression language for spectral
//! indices (NDVI, NDWI, EVI, ...) and the statistics that collapse a stack of
//! per-image index fields into one KPI value per image.

use thiserror::Error;

pub mod formula;
pub mod kpi;

pub use formula::{resolve_preset, BandMap, Formula, FormulaPreset};
pub use kpi::{reduce, reduce_images, KpiStatistic};

/// Errors that can occur in band arithmetic and KPI reduction
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MathError {
    #[error("Insufficient data for calculation: {0}")]
    InsufficientData(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Calculation error: {0}")]
    CalculationError(String),

    #[error("Syntax error at position {position}: {message}")]
    Syntax { position: usize, message: String },

    #[error("Unknown band '{0}' in formula")]
    UnknownBand(String),

    #[error("Shape mismatch: expected {expected:?}, found {found:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        found: Vec<usize>,
    },
}

/// Result type for band math operations
pub type Result<T> = std::result::Result<T, MathError>;

/// Replace NaN and infinite values with zero, in place.
pub fn sanitize_non_finite<D: ndarray::Dimension>(values: &mut ndarray::Array<f64, D>) {
    values.mapv_inplace(|v| if v.is_finite() { v } else { 0.0 });
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_sanitize_non_finite() {
        let mut values = array![[f64::NAN, 1.5], [f64::INFINITY, f64::NEG_INFINITY]];
        sanitize_non_finite(&mut values);
        assert_eq!(values, array![[0.0, 1.5], [0.0, 0.0]]);
    }

    #[test]
    fn test_error_display() {
        let err = MathError::Syntax {
            position: 4,
            message: "unexpected ')'".to_string(),
        };
        assert_eq!(err.to_string(), "Syntax error at position 4: unexpected ')'");
    }
}
