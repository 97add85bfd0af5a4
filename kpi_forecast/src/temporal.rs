//! Calendar indexing of acquisition directories
//!
//! The download step writes one raster per acquisition into
//! `<geotiffs>/<name_id>/`, named so that lexicographic order is
//! chronological. Failed downloads keep their slot with an `-error` suffix and
//! sidecar metadata ends in `.xml`.

use crate::error::{ForecastError, Result};
use chrono::{Datelike, Duration, Months, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Suffix marking a failed download
pub const ERROR_SUFFIX: &str = "-error";
/// Extension of sidecar metadata files
pub const SIDECAR_EXTENSION: &str = ".xml";

/// Unit of the acquisition interval
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepUnit {
    Weeks,
    Months,
}

impl StepUnit {
    /// Interpret a configured interval type. Only `"months"` selects months,
    /// everything else counts as weeks.
    pub fn from_config_name(name: &str) -> Self {
        if name == "months" {
            StepUnit::Months
        } else {
            StepUnit::Weeks
        }
    }

    /// Label used on chart axes
    pub fn label(&self) -> &'static str {
        match self {
            StepUnit::Weeks => "weeks",
            StepUnit::Months => "months",
        }
    }
}

impl fmt::Display for StepUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Fixed calendar step between consecutive acquisitions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CalendarStep {
    unit: StepUnit,
    count: u32,
}

impl CalendarStep {
    /// Create a new step of `count` units
    pub fn new(unit: StepUnit, count: u32) -> Result<Self> {
        if count == 0 {
            return Err(ForecastError::InvalidParameter(
                "Date interval must be at least 1".to_string(),
            ));
        }
        Ok(Self { unit, count })
    }

    /// Step unit
    pub fn unit(&self) -> StepUnit {
        self.unit
    }

    /// Number of units per step
    pub fn count(&self) -> u32 {
        self.count
    }

    /// Move `date` forward by one step. Month steps clamp to the last day of
    /// the target month.
    pub fn advance(&self, date: NaiveDate) -> Result<NaiveDate> {
        let next = match self.unit {
            StepUnit::Weeks => date.checked_add_signed(Duration::weeks(i64::from(self.count))),
            StepUnit::Months => date.checked_add_months(Months::new(self.count)),
        };
        next.ok_or_else(|| {
            ForecastError::ValidationError(format!("Date overflow advancing {} by {}", date, self))
        })
    }

    /// Calendar bucket of a date: month number for monthly steps, ISO week
    /// number otherwise.
    pub fn bucket(&self, date: NaiveDate) -> u32 {
        match self.unit {
            StepUnit::Months => date.month(),
            StepUnit::Weeks => date.iso_week().week(),
        }
    }
}

impl fmt::Display for CalendarStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.count, self.unit)
    }
}

/// One acquisition file with its calendar position
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexedImage {
    /// Raster file
    pub path: PathBuf,
    /// Date assigned to the acquisition
    pub date: NaiveDate,
    /// Month or ISO week number
    pub bucket: u32,
}

/// Walks an acquisition directory and assigns calendar buckets
#[derive(Debug, Clone)]
pub struct TemporalIndexer {
    start_date: NaiveDate,
    step: CalendarStep,
}

impl TemporalIndexer {
    /// Create a new indexer
    pub fn new(start_date: NaiveDate, step: CalendarStep) -> Self {
        Self { start_date, step }
    }

    /// Start date of the series
    pub fn start_date(&self) -> NaiveDate {
        self.start_date
    }

    /// Step between acquisitions
    pub fn step(&self) -> CalendarStep {
        self.step
    }

    /// Index `directory` in filename order.
    ///
    /// Every entry that is not a sidecar consumes one calendar step, including
    /// failed downloads, which are then left out of the result.
    pub fn index(&self, directory: &Path) -> Result<Vec<IndexedImage>> {
        if !directory.is_dir() {
            return Err(ForecastError::DirectoryNotFound(directory.to_path_buf()));
        }

        let mut entries: Vec<(String, PathBuf)> = fs::read_dir(directory)?
            .map(|entry| {
                entry.map(|e| (e.file_name().to_string_lossy().into_owned(), e.path()))
            })
            .collect::<std::io::Result<_>>()?;
        entries.sort_by(|a, b| a.0.cmp(&b.0));

        let mut current = self.start_date;
        let mut images = Vec::with_capacity(entries.len());

        for (name, path) in entries {
            if name.ends_with(SIDECAR_EXTENSION) {
                continue;
            }

            current = self.step.advance(current)?;

            if name.ends_with(ERROR_SUFFIX) {
                debug!("Skipping failed acquisition {} ({})", name, current);
                continue;
            }

            images.push(IndexedImage {
                path,
                date: current,
                bucket: self.step.bucket(current),
            });
        }

        info!(
            "Indexed {} acquisitions in {}",
            images.len(),
            directory.display()
        );
        debug!(
            "Time values: {:?}",
            images.iter().map(|image| image.bucket).collect::<Vec<_>>()
        );

        Ok(images)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::fs::File;
    use tempfile::tempdir;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn touch(dir: &Path, names: &[&str]) {
        for name in names {
            File::create(dir.join(name)).unwrap();
        }
    }

    #[test]
    fn test_weekly_index_skips_errors_and_sidecars() {
        let dir = tempdir().unwrap();
        touch(dir.path(), &["img_03.xml", "img_02-error", "img_01", "img_02"]);

        let step = CalendarStep::new(StepUnit::Weeks, 1).unwrap();
        let images = TemporalIndexer::new(date(2024, 1, 1), step)
            .index(dir.path())
            .unwrap();

        let names: Vec<String> = images
            .iter()
            .map(|i| i.path.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["img_01", "img_02"]);
        assert_eq!(images[0].date, date(2024, 1, 8));
        assert_eq!(images[0].bucket, date(2024, 1, 8).iso_week().week());
        assert_eq!(images[1].date, date(2024, 1, 15));
        assert_eq!(images[1].bucket, 3);
    }

    #[test]
    fn test_error_entries_consume_a_slot() {
        let dir = tempdir().unwrap();
        touch(dir.path(), &["a", "b-error", "c"]);

        let step = CalendarStep::new(StepUnit::Weeks, 2).unwrap();
        let images = TemporalIndexer::new(date(2024, 1, 1), step)
            .index(dir.path())
            .unwrap();

        assert_eq!(images.len(), 2);
        assert_eq!(images[0].date, date(2024, 1, 15));
        // b-error took 2024-01-29
        assert_eq!(images[1].date, date(2024, 2, 12));
        assert_eq!(images[1].bucket, 7);
    }

    #[test]
    fn test_monthly_buckets_wrap_without_year() {
        let dir = tempdir().unwrap();
        let names: Vec<String> = (0..14).map(|i| format!("scene_{:02}", i)).collect();
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        touch(dir.path(), &refs);

        let step = CalendarStep::new(StepUnit::Months, 1).unwrap();
        let images = TemporalIndexer::new(date(2023, 11, 1), step)
            .index(dir.path())
            .unwrap();

        let buckets: Vec<u32> = images.iter().map(|i| i.bucket).collect();
        assert_eq!(buckets, vec![12, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 1]);
    }

    #[test]
    fn test_month_end_clamps() {
        let step = CalendarStep::new(StepUnit::Months, 1).unwrap();
        assert_eq!(step.advance(date(2024, 1, 31)).unwrap(), date(2024, 2, 29));
    }

    #[test]
    fn test_empty_directory_yields_no_images() {
        let dir = tempdir().unwrap();
        touch(dir.path(), &["only.xml", "x-error"]);

        let step = CalendarStep::new(StepUnit::Weeks, 1).unwrap();
        let images = TemporalIndexer::new(date(2024, 1, 1), step)
            .index(dir.path())
            .unwrap();
        assert!(images.is_empty());
    }

    #[test]
    fn test_missing_directory() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("nope");
        let step = CalendarStep::new(StepUnit::Weeks, 1).unwrap();
        let err = TemporalIndexer::new(date(2024, 1, 1), step)
            .index(&missing)
            .unwrap_err();
        assert!(matches!(err, ForecastError::DirectoryNotFound(p) if p == missing));
        assert!(!missing.exists());
    }

    #[test]
    fn test_step_unit_from_config_name() {
        assert_eq!(StepUnit::from_config_name("months"), StepUnit::Months);
        assert_eq!(StepUnit::from_config_name("weeks"), StepUnit::Weeks);
        assert_eq!(StepUnit::from_config_name("days"), StepUnit::Weeks);
    }

    #[test]
    fn test_zero_step_is_rejected() {
        assert!(CalendarStep::new(StepUnit::Weeks, 0).is_err());
    }
}
