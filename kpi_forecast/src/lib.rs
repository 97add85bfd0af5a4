//! # KPI Forecast
//!
//! Spectral index time series from satellite rasters, with interchangeable
//! forecasting models.
//!
//! ## Features
//!
//! - Calendar indexing of acquisition directories (weekly or monthly steps)
//! - Band extraction from multi-band and multi-page GeoTIFFs
//! - Index formulas (NDVI, NDWI, EVI, ...) reduced to one KPI per image
//! - ARIMA, automatic SARIMA, Random Forest and Gradient Boosting models
//!   behind one train / evaluate / predict / persist / visualize contract
//!
//! ## Quick Start
//!
//! ```no_run
//! use kpi_forecast::{create_model, DatasetBuilder, KpiStatistic};
//! use kpi_forecast::temporal::{CalendarStep, StepUnit};
//! use chrono::NaiveDate;
//! use std::path::Path;
//!
//! # fn main() -> kpi_forecast::Result<()> {
//! let builder = DatasetBuilder::new(
//!     NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
//!     CalendarStep::new(StepUnit::Weeks, 1)?,
//!     &["B04", "B08"],
//!     Some("NDVI"),
//!     KpiStatistic::Mean,
//! );
//! let dataset = builder.build(Path::new("geotiffs/field_a"))?;
//!
//! let mut model = create_model("arima", dataset, &serde_json::Value::Null)?;
//! model.train()?;
//! let metrics = model.evaluate()?;
//! println!("MSE: {}", metrics.mse);
//! model.persist(Path::new("models/field_a_arima.sav"))?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod data;
pub mod error;
pub mod metrics;
pub mod models;
pub mod pipeline;
pub mod raster;
pub mod temporal;
pub mod visualize;

// Re-export commonly used types
pub use crate::config::PipelineConfig;
pub use crate::data::{Dataset, DatasetBuilder};
pub use crate::error::{ForecastError, Result};
pub use crate::metrics::ErrorMetrics;
pub use crate::models::{create_model, ForecastModel, ForecastResult};
pub use crate::pipeline::{Pipeline, RunReport};
pub use band_math::{FormulaPreset, KpiStatistic};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
