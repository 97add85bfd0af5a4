//! # Sentinel KPI
//!
//! Workspace facade over the two crates that turn satellite acquisitions
//! into forecasts:
//!
//! - [`band_math`]: index formulas and per-image KPI statistics
//! - [`kpi_forecast`]: raster indexing, datasets, forecasting models and
//!   the pipeline behind the `kpi-forecast` binary
//!
//! ## Example
//!
//! ```
//! use sentinel_kpi::band_math::{Formula, FormulaPreset};
//! use sentinel_kpi::band_math::formula::BandMap;
//! use ndarray::array;
//!
//! let ndvi = Formula::parse(FormulaPreset::Ndvi.expression()).unwrap();
//! let mut bands = BandMap::new();
//! bands.insert("B04".to_string(), array![[0.2, 0.0]]);
//! bands.insert("B08".to_string(), array![[0.6, 0.0]]);
//!
//! let field = ndvi.evaluate(&bands).unwrap();
//! assert!((field[[0, 0]] - 0.5).abs() < 1e-12);
//! // 0 / 0 is reported as 0
//! assert_eq!(field[[0, 1]], 0.0);
//! ```

pub use band_math;
pub use kpi_forecast;

pub use kpi_forecast::{
    create_model, Dataset, DatasetBuilder, ErrorMetrics, ForecastError, ForecastModel,
    ForecastResult, KpiStatistic, Pipeline, PipelineConfig,
};
