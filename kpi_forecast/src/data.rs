//! KPI time series datasets
//!
//! A [`Dataset`] is the two-column table the models consume: the KPI value
//! of each acquisition and its calendar bucket. [`DatasetBuilder`] produces
//! one from a directory of rasters.

use crate::config::PipelineConfig;
use crate::error::{ForecastError, Result};
use crate::raster::RasterBandExtractor;
use crate::temporal::{CalendarStep, IndexedImage, TemporalIndexer};
use band_math::{reduce_images, sanitize_non_finite, Formula, KpiStatistic};
use chrono::NaiveDate;
use ndarray::{ArrayD, ArrayView2, ArrayViewD, Axis};
use polars::prelude::*;
use std::fs::{self, File};
use std::path::Path;
use tracing::{info, warn};

/// Name of the calendar bucket column
pub const TIME_COLUMN: &str = "time";

/// Ordered KPI time series backed by a polars DataFrame.
///
/// Row order is the temporal axis. Clones share the column buffers.
#[derive(Debug, Clone)]
pub struct Dataset {
    df: DataFrame,
    kpi_column: String,
}

impl Dataset {
    /// Create a dataset from KPI values and their calendar buckets
    pub fn new(kpi_column: &str, values: Vec<f64>, time: Vec<u32>) -> Result<Self> {
        if values.len() != time.len() {
            return Err(ForecastError::DatasetBuild(format!(
                "KPI values ({}) and time values ({}) differ in length",
                values.len(),
                time.len()
            )));
        }
        if kpi_column == TIME_COLUMN {
            return Err(ForecastError::InvalidParameter(format!(
                "KPI column cannot be named '{}'",
                TIME_COLUMN
            )));
        }

        let df = DataFrame::new(vec![
            Series::new(kpi_column, values),
            Series::new(TIME_COLUMN, time),
        ])?;

        Ok(Self {
            df,
            kpi_column: kpi_column.to_string(),
        })
    }

    /// Wrap an existing DataFrame holding a KPI column and a time column
    pub fn from_dataframe(df: DataFrame, kpi_column: &str) -> Result<Self> {
        for name in [kpi_column, TIME_COLUMN] {
            if df.column(name).is_err() {
                return Err(ForecastError::DataError(format!(
                    "Column '{}' not found in data",
                    name
                )));
            }
        }
        Ok(Self {
            df,
            kpi_column: kpi_column.to_string(),
        })
    }

    /// Get the DataFrame
    pub fn dataframe(&self) -> &DataFrame {
        &self.df
    }

    /// Name of the KPI column
    pub fn kpi_column(&self) -> &str {
        &self.kpi_column
    }

    pub fn len(&self) -> usize {
        self.df.height()
    }

    pub fn is_empty(&self) -> bool {
        self.df.height() == 0
    }

    /// KPI values in temporal order
    pub fn kpi_values(&self) -> Result<Vec<f64>> {
        column_as_f64(&self.df, &self.kpi_column)
    }

    /// Calendar buckets in temporal order
    pub fn time_values(&self) -> Result<Vec<u32>> {
        let series = self.df.column(TIME_COLUMN)?.cast(&DataType::UInt32)?;
        Ok(series.u32()?.into_iter().flatten().collect())
    }

    /// Rows `start..start + len`
    pub fn slice(&self, start: usize, len: usize) -> Self {
        Self {
            df: self.df.slice(start as i64, len),
            kpi_column: self.kpi_column.clone(),
        }
    }

    /// Split into a leading train part and a trailing test part without
    /// shuffling. The train part holds `round(len * (1 - test_size))` rows.
    pub fn split(&self, test_size: f64) -> Result<(Dataset, Dataset)> {
        if !(0.0..1.0).contains(&test_size) {
            return Err(ForecastError::InvalidParameter(format!(
                "test_size must be in [0, 1), got {}",
                test_size
            )));
        }

        let n = self.len();
        let train_len = ((n as f64) * (1.0 - test_size)).round() as usize;
        let train_len = train_len.min(n);
        if train_len == 0 {
            return Err(ForecastError::InsufficientData { needed: 1, got: n });
        }

        Ok((self.slice(0, train_len), self.slice(train_len, n - train_len)))
    }

    /// Feature rows for the regression models.
    ///
    /// With `include_target` every column (KPI and time) is a feature, in
    /// table order; otherwise only the time column is.
    pub fn feature_matrix(&self, include_target: bool) -> Result<Vec<Vec<f64>>> {
        let columns: Vec<Vec<f64>> = if include_target {
            self.df
                .get_column_names()
                .into_iter()
                .map(|name| column_as_f64(&self.df, name))
                .collect::<Result<_>>()?
        } else {
            vec![column_as_f64(&self.df, TIME_COLUMN)?]
        };

        Ok((0..self.len())
            .map(|row| columns.iter().map(|col| col[row]).collect())
            .collect())
    }

    /// Write the dataset as CSV, creating parent directories as needed
    pub fn to_csv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let mut file = File::create(path)?;
        let mut df = self.df.clone();
        CsvWriter::new(&mut file).has_header(true).finish(&mut df)?;

        info!("Dataset written to {}", path.display());
        Ok(())
    }
}

fn column_as_f64(df: &DataFrame, name: &str) -> Result<Vec<f64>> {
    let series = df.column(name)?.cast(&DataType::Float64)?;
    Ok(series.f64()?.into_iter().flatten().collect())
}

/// Turns a directory of rasters into a [`Dataset`]
#[derive(Debug, Clone)]
pub struct DatasetBuilder {
    indexer: TemporalIndexer,
    extractor: RasterBandExtractor,
    formula: Option<String>,
    statistic: KpiStatistic,
}

impl DatasetBuilder {
    /// Create a new builder.
    ///
    /// `formula` is a preset name or a band expression; `None` reduces the
    /// raw bands instead.
    pub fn new<S: AsRef<str>>(
        start_date: NaiveDate,
        step: CalendarStep,
        band_names: &[S],
        formula: Option<&str>,
        statistic: KpiStatistic,
    ) -> Self {
        Self {
            indexer: TemporalIndexer::new(start_date, step),
            extractor: RasterBandExtractor::new(band_names),
            formula: formula.map(str::to_string),
            statistic,
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Result<Self> {
        Ok(Self::new(
            config.start_date,
            config.step()?,
            &config.bands,
            config.formula.as_deref(),
            config.statistic(),
        ))
    }

    pub fn statistic(&self) -> KpiStatistic {
        self.statistic
    }

    /// Build the dataset for every usable raster in `directory`.
    ///
    /// Images whose bands cannot be read, whose formula evaluation fails or
    /// that have no pixels are logged and dropped; everything else must share
    /// one shape.
    pub fn build(&self, directory: &Path) -> Result<Dataset> {
        let formula = self.compile_formula()?;
        let images = self.indexer.index(directory)?;

        let mut fields = Vec::with_capacity(images.len());
        let mut buckets = Vec::with_capacity(images.len());
        for image in &images {
            match self.image_field(image, formula.as_ref()) {
                Ok(field) => {
                    fields.push(field);
                    buckets.push(image.bucket);
                }
                Err(err) => warn!("Excluding {}: {}", image.path.display(), err),
            }
        }

        let values = if fields.is_empty() {
            Vec::new()
        } else {
            let views: Vec<ArrayViewD<'_, f64>> = fields.iter().map(|f| f.view()).collect();
            let mut stack = ndarray::stack(Axis(0), &views).map_err(|e| {
                ForecastError::DatasetBuild(format!("images cannot be stacked: {}", e))
            })?;
            sanitize_non_finite(&mut stack);
            reduce_images(&stack, self.statistic)?.to_vec()
        };

        let dataset = Dataset::new(self.statistic.name(), values, buckets)?;
        info!(
            "Built dataset from {}: shape {:?}",
            directory.display(),
            dataset.dataframe().shape()
        );
        Ok(dataset)
    }

    fn compile_formula(&self) -> Result<Option<Formula>> {
        let Some(source) = self.formula.as_deref() else {
            return Ok(None);
        };
        let formula =
            Formula::from_preset_or_expression(source).map_err(ForecastError::FormulaEvaluation)?;

        let known = self.extractor.band_names();
        if let Some(missing) = formula.bands().into_iter().find(|b| !known.contains(b)) {
            return Err(ForecastError::FormulaEvaluation(
                band_math::MathError::UnknownBand(missing),
            ));
        }

        info!("Using formula {}", formula.source());
        Ok(Some(formula))
    }

    fn image_field(&self, image: &IndexedImage, formula: Option<&Formula>) -> Result<ArrayD<f64>> {
        let bands = self.extractor.extract(&image.path)?;

        let field = match formula {
            Some(formula) => formula
                .evaluate(&bands)
                .map_err(ForecastError::FormulaEvaluation)?
                .into_dyn(),
            None => {
                let views: Vec<ArrayView2<'_, f64>> = self
                    .extractor
                    .band_names()
                    .iter()
                    .filter_map(|name| bands.get(name).map(|band| band.view()))
                    .collect();
                let stacked = ndarray::stack(Axis(0), &views).map_err(|e| {
                    ForecastError::BandExtraction {
                        path: image.path.clone(),
                        reason: format!("bands differ in shape: {}", e),
                    }
                })?;
                stacked.into_dyn()
            }
        };
        with_pixels(field, &image.path)
    }
}

/// Zero-pixel fields have no KPI and are excluded like unreadable images
fn with_pixels(field: ArrayD<f64>, path: &Path) -> Result<ArrayD<f64>> {
    if field.is_empty() {
        return Err(ForecastError::BandExtraction {
            path: path.to_path_buf(),
            reason: format!("image of shape {:?} has no pixels", field.shape()),
        });
    }
    Ok(field)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::IxDyn;
    use pretty_assertions::assert_eq;

    fn sample(n: usize) -> Dataset {
        let values = (0..n).map(|i| i as f64 * 0.1).collect();
        let time = (1..=n as u32).collect();
        Dataset::new("mean", values, time).unwrap()
    }

    #[test]
    fn test_columns_and_order() {
        let ds = sample(4);
        assert_eq!(ds.dataframe().get_column_names(), vec!["mean", "time"]);
        assert_eq!(ds.time_values().unwrap(), vec![1, 2, 3, 4]);
        assert_eq!(ds.len(), 4);
    }

    #[test]
    fn test_split_preserves_order() {
        let ds = sample(10);
        let (train, test) = ds.split(0.2).unwrap();
        assert_eq!(train.len(), 8);
        assert_eq!(test.time_values().unwrap(), vec![9, 10]);

        let mut joined = train.kpi_values().unwrap();
        joined.extend(test.kpi_values().unwrap());
        assert_eq!(joined, ds.kpi_values().unwrap());
    }

    #[test]
    fn test_split_rounding() {
        // 7 * 0.8 = 5.6
        let (train, test) = sample(7).split(0.2).unwrap();
        assert_eq!((train.len(), test.len()), (6, 1));
    }

    #[test]
    fn test_split_rejects_bad_ratio_and_empty_data() {
        assert!(sample(5).split(1.0).is_err());
        assert!(sample(5).split(-0.1).is_err());
        assert!(matches!(
            sample(0).split(0.2),
            Err(ForecastError::InsufficientData { .. })
        ));
    }

    #[test]
    fn test_feature_matrix_with_and_without_target() {
        let ds = Dataset::new("max", vec![0.5, 0.7], vec![3, 4]).unwrap();
        assert_eq!(
            ds.feature_matrix(true).unwrap(),
            vec![vec![0.5, 3.0], vec![0.7, 4.0]]
        );
        assert_eq!(ds.feature_matrix(false).unwrap(), vec![vec![3.0], vec![4.0]]);
    }

    #[test]
    fn test_length_mismatch_is_rejected() {
        assert!(matches!(
            Dataset::new("mean", vec![1.0], vec![]),
            Err(ForecastError::DatasetBuild(_))
        ));
    }

    #[test]
    fn test_zero_pixel_fields_are_excluded() {
        let path = Path::new("geotiffs/field_a/empty.tif");
        let err = with_pixels(ArrayD::zeros(IxDyn(&[0, 4])), path).unwrap_err();
        assert!(matches!(err, ForecastError::BandExtraction { .. }));

        let field = with_pixels(ArrayD::zeros(IxDyn(&[2, 2])), path).unwrap();
        assert_eq!(field.len(), 4);
    }
}
