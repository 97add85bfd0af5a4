//! Seasonal ARIMA with automatic order selection

use super::arima::{difference, fit_arima, ArimaOrder, FittedArima};
use super::{validate_test_size, Estimator, ForecastResult};
use crate::data::Dataset;
use crate::error::{ForecastError, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Variance ratio below which another regular difference is taken
const DIFFERENCE_RATIO: f64 = 0.9;
/// Variance ratio below which a seasonal difference is taken
const SEASONAL_DIFFERENCE_RATIO: f64 = 0.7;

/// Criterion used to rank candidate orders
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InformationCriterion {
    #[default]
    Aic,
    Bic,
}

impl InformationCriterion {
    fn score(&self, fitted: &FittedArima) -> f64 {
        match self {
            InformationCriterion::Aic => fitted.aic(),
            InformationCriterion::Bic => fitted.bic(),
        }
    }
}

/// SARIMA search settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SarimaParams {
    /// Season length in steps
    pub m: usize,
    pub seasonal: bool,
    /// Treat the series as stationary: no differencing at all
    pub stationary: bool,
    pub max_p: usize,
    pub max_q: usize,
    pub max_d: usize,
    pub max_seasonal_p: usize,
    pub max_seasonal_q: usize,
    pub max_seasonal_d: usize,
    pub information_criterion: InformationCriterion,
    pub test_size: f64,
}

impl Default for SarimaParams {
    fn default() -> Self {
        Self {
            m: 12,
            seasonal: true,
            stationary: false,
            max_p: 3,
            max_q: 3,
            max_d: 2,
            max_seasonal_p: 1,
            max_seasonal_q: 1,
            max_seasonal_d: 1,
            information_criterion: InformationCriterion::Aic,
            test_size: 0.2,
        }
    }
}

fn sample_variance(series: &[f64]) -> f64 {
    if series.len() < 2 {
        return 0.0;
    }
    let mean = series.iter().sum::<f64>() / series.len() as f64;
    series.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (series.len() - 1) as f64
}

/// Number of regular differences that keep shrinking the variance
pub fn suggest_differencing(series: &[f64], max_d: usize) -> usize {
    let mut current = series.to_vec();
    let mut d = 0;
    while d < max_d {
        let next = difference(&current, 1);
        if next.len() < 2 {
            break;
        }
        let (before, after) = (sample_variance(&current), sample_variance(&next));
        if before <= 0.0 || after / before >= DIFFERENCE_RATIO {
            break;
        }
        current = next;
        d += 1;
    }
    d
}

/// One seasonal difference when it clearly reduces the variance
pub fn suggest_seasonal_differencing(series: &[f64], period: usize, max_seasonal_d: usize) -> usize {
    if max_seasonal_d == 0 || period < 2 || series.len() < 2 * period {
        return 0;
    }
    let original = sample_variance(series);
    let seasonal = sample_variance(&difference(series, period));
    if original > 0.0 && seasonal / original < SEASONAL_DIFFERENCE_RATIO {
        1
    } else {
        0
    }
}

/// Automatic SARIMA strategy
#[derive(Debug, Clone)]
pub struct Sarima {
    params: SarimaParams,
}

impl Sarima {
    pub fn new(params: SarimaParams) -> Result<Self> {
        validate_test_size(params.test_size)?;
        Ok(Self { params })
    }

    fn seasonal_search(&self) -> bool {
        self.params.seasonal && self.params.m > 1
    }

    /// Differencing orders for `series`
    pub fn differencing(&self, series: &[f64]) -> (usize, usize) {
        if self.params.stationary {
            return (0, 0);
        }
        let seasonal_d = if self.seasonal_search() {
            suggest_seasonal_differencing(series, self.params.m, self.params.max_seasonal_d)
        } else {
            0
        };
        let mut adjusted = series.to_vec();
        if seasonal_d > 0 {
            adjusted = difference(&adjusted, self.params.m);
        }
        (suggest_differencing(&adjusted, self.params.max_d), seasonal_d)
    }

    /// Every order the search tries for the given differencing
    pub fn candidates(&self, d: usize, seasonal_d: usize) -> Vec<ArimaOrder> {
        let p = &self.params;
        let (max_sp, max_sq) = if self.seasonal_search() {
            (p.max_seasonal_p, p.max_seasonal_q)
        } else {
            (0, 0)
        };

        let mut orders = Vec::new();
        for ar in 0..=p.max_p {
            for ma in 0..=p.max_q {
                for sar in 0..=max_sp {
                    for sma in 0..=max_sq {
                        let order = ArimaOrder::new(ar, d, ma);
                        orders.push(if self.seasonal_search() {
                            order.with_seasonal(sar, seasonal_d, sma, p.m)
                        } else {
                            order
                        });
                    }
                }
            }
        }
        orders
    }

    /// Fit every candidate that fits the series and keep the best one
    pub fn search(&self, series: &[f64]) -> Result<FittedArima> {
        let (d, seasonal_d) = self.differencing(series);
        debug!("Suggested differencing d={} D={}", d, seasonal_d);

        let criterion = self.params.information_criterion;
        let mut best: Option<(f64, FittedArima)> = None;
        for order in self.candidates(d, seasonal_d) {
            if series.len() < order.min_observations() {
                debug!("Skipping {}: series too short", order);
                continue;
            }
            match fit_arima(series, order) {
                Ok(fitted) => {
                    let score = criterion.score(&fitted);
                    debug!("{} {:?}={:.4}", order, criterion, score);
                    if score.is_finite() && best.as_ref().map_or(true, |(s, _)| score < *s) {
                        best = Some((score, fitted));
                    }
                }
                Err(err) => debug!("Skipping {}: {}", order, err),
            }
        }

        let (score, fitted) = best.ok_or_else(|| {
            ForecastError::InsufficientData {
                needed: ArimaOrder::new(0, d, 0).min_observations(),
                got: series.len(),
            }
        })?;
        info!("Selected {} ({:?}={:.4})", fitted.order(), criterion, score);
        Ok(fitted)
    }
}

impl Estimator for Sarima {
    type Fitted = FittedArima;

    fn name(&self) -> &'static str {
        "sarima"
    }

    fn display_name(&self) -> &'static str {
        "SARIMA"
    }

    fn test_size(&self) -> f64 {
        self.params.test_size
    }

    fn fit(&self, train: &Dataset) -> Result<FittedArima> {
        self.search(&train.kpi_values()?)
    }

    fn forecast(&self, fitted: &FittedArima, _train: &Dataset, test: &Dataset) -> Result<ForecastResult> {
        fitted.forecast(test.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_suggest_differencing() {
        let stationary = vec![1.0, 0.5, 1.2, 0.8, 1.1, 0.9, 1.0, 1.1];
        assert_eq!(suggest_differencing(&stationary, 2), 0);

        let trend: Vec<f64> = (0..20).map(|i| 10.0 + 2.0 * i as f64).collect();
        assert!(suggest_differencing(&trend, 2) >= 1);
        assert_eq!(suggest_differencing(&trend, 0), 0);
    }

    #[test]
    fn test_seasonal_differencing_needs_two_seasons() {
        let series: Vec<f64> = (0..10).map(|i| (i % 4) as f64).collect();
        assert_eq!(suggest_seasonal_differencing(&series, 12, 1), 0);

        let periodic: Vec<f64> = (0..24).map(|i| [0.0, 5.0, 10.0, 5.0][i % 4]).collect();
        assert_eq!(suggest_seasonal_differencing(&periodic, 4, 1), 1);
    }

    #[test]
    fn test_stationary_forces_no_differencing() {
        let sarima = Sarima::new(SarimaParams {
            stationary: true,
            ..SarimaParams::default()
        })
        .unwrap();
        let trend: Vec<f64> = (0..40).map(|i| i as f64).collect();
        assert_eq!(sarima.differencing(&trend), (0, 0));
    }

    #[test]
    fn test_candidate_grid() {
        let sarima = Sarima::new(SarimaParams {
            max_p: 1,
            max_q: 1,
            m: 4,
            ..SarimaParams::default()
        })
        .unwrap();
        assert_eq!(sarima.candidates(1, 0).len(), 16);

        let plain = Sarima::new(SarimaParams {
            max_p: 1,
            max_q: 1,
            seasonal: false,
            ..SarimaParams::default()
        })
        .unwrap();
        let orders = plain.candidates(1, 0);
        assert_eq!(orders.len(), 4);
        assert!(orders.iter().all(|o| !o.is_seasonal()));
    }

    #[test]
    fn test_search_skips_oversized_candidates() {
        let sarima = Sarima::new(SarimaParams {
            m: 12,
            max_p: 1,
            max_q: 1,
            ..SarimaParams::default()
        })
        .unwrap();
        // too short for any seasonal term
        let series: Vec<f64> = (0..16).map(|i| (i as f64 * 0.7).sin()).collect();
        let fitted = sarima.search(&series).unwrap();
        assert!(fitted.order().seasonal_p == 0 && fitted.order().seasonal_q == 0);
    }
}
