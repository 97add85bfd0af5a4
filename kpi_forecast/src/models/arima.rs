//! ARIMA model for time series forecasting
//!
//! Coefficients are estimated by minimising the conditional sum of squares
//! with Nelder-Mead. Seasonal terms are multiplied into the non-seasonal
//! polynomials, so the same fitting code serves ARIMA and SARIMA.

use super::optimize::NelderMead;
use super::{validate_test_size, Estimator, ForecastResult};
use crate::data::Dataset;
use crate::error::{ForecastError, Result};
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Normal};
use std::f64::consts::PI;
use std::fmt;

/// Bound on every AR and MA coefficient during estimation
const COEFFICIENT_BOUND: f64 = 0.99;
/// Smallest innovation variance used in the likelihood
const MIN_VARIANCE: f64 = 1e-12;
/// Coverage of the reported prediction intervals
const INTERVAL_LEVEL: f64 = 0.95;

/// (p, d, q)(P, D, Q)m model order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArimaOrder {
    pub p: usize,
    pub d: usize,
    pub q: usize,
    pub seasonal_p: usize,
    pub seasonal_d: usize,
    pub seasonal_q: usize,
    /// Season length; 0 or 1 means no seasonal part
    pub period: usize,
}

impl ArimaOrder {
    /// Non-seasonal order
    pub fn new(p: usize, d: usize, q: usize) -> Self {
        Self {
            p,
            d,
            q,
            seasonal_p: 0,
            seasonal_d: 0,
            seasonal_q: 0,
            period: 0,
        }
    }

    /// Add a seasonal part
    pub fn with_seasonal(mut self, seasonal_p: usize, seasonal_d: usize, seasonal_q: usize, period: usize) -> Self {
        self.seasonal_p = seasonal_p;
        self.seasonal_d = seasonal_d;
        self.seasonal_q = seasonal_q;
        self.period = period;
        self
    }

    pub fn is_seasonal(&self) -> bool {
        self.period > 1 && (self.seasonal_p + self.seasonal_d + self.seasonal_q) > 0
    }

    fn season(&self) -> usize {
        if self.period > 1 {
            self.period
        } else {
            0
        }
    }

    /// Lags of the differencing steps, in application order
    fn difference_lags(&self) -> Vec<usize> {
        let mut lags = vec![1; self.d];
        if self.season() > 0 {
            lags.extend(std::iter::repeat(self.season()).take(self.seasonal_d));
        }
        lags
    }

    fn includes_mean(&self) -> bool {
        self.d == 0 && (self.season() == 0 || self.seasonal_d == 0)
    }

    fn ar_degree(&self) -> usize {
        self.p + self.seasonal_p * self.season()
    }

    fn ma_degree(&self) -> usize {
        self.q + self.seasonal_q * self.season()
    }

    /// Number of estimated coefficients, mean included
    pub fn parameter_count(&self) -> usize {
        let seasonal = if self.season() > 0 {
            self.seasonal_p + self.seasonal_q
        } else {
            0
        };
        self.p + self.q + seasonal + usize::from(self.includes_mean())
    }

    /// Shortest series this order can be fitted to
    pub fn min_observations(&self) -> usize {
        let differenced: usize = self.difference_lags().iter().sum();
        differenced + self.ar_degree().max(self.ma_degree()) + self.parameter_count() + 2
    }
}

impl fmt::Display for ArimaOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ARIMA({},{},{})", self.p, self.d, self.q)?;
        if self.is_seasonal() {
            write!(
                f,
                "({},{},{})[{}]",
                self.seasonal_p, self.seasonal_d, self.seasonal_q, self.period
            )?;
        }
        Ok(())
    }
}

/// Lag-`lag` difference of a series
pub fn difference(series: &[f64], lag: usize) -> Vec<f64> {
    if lag == 0 || series.len() <= lag {
        return Vec::new();
    }
    series.windows(lag + 1).map(|w| w[lag] - w[0]).collect()
}

/// `(1 - a(B))(1 - A(B^s))` for AR, `(1 + a(B))(1 + A(B^s))` for MA,
/// returned as lag coefficients starting at lag 1.
fn expand_polynomial(nonseasonal: &[f64], seasonal: &[f64], season: usize, ar: bool) -> Vec<f64> {
    let degree = nonseasonal.len() + seasonal.len() * season;
    let mut coefficients = vec![0.0; degree];
    for (i, a) in nonseasonal.iter().enumerate() {
        coefficients[i] += a;
    }
    for (j, big_a) in seasonal.iter().enumerate() {
        let lag = (j + 1) * season;
        coefficients[lag - 1] += big_a;
        for (i, a) in nonseasonal.iter().enumerate() {
            let cross = a * big_a;
            coefficients[lag + i] += if ar { -cross } else { cross };
        }
    }
    coefficients
}

/// Unpacked coefficient vector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Coefficients {
    ar: Vec<f64>,
    ma: Vec<f64>,
    seasonal_ar: Vec<f64>,
    seasonal_ma: Vec<f64>,
    mean: f64,
}

impl Coefficients {
    fn unpack(order: &ArimaOrder, params: &[f64], fixed_mean: f64) -> Self {
        let season = order.season();
        let (sp, sq) = if season > 0 {
            (order.seasonal_p, order.seasonal_q)
        } else {
            (0, 0)
        };
        let mut offset = 0;
        let mut take = |n: usize| {
            let start = offset.min(params.len());
            let end = (offset + n).min(params.len());
            offset = end;
            params[start..end].to_vec()
        };
        let ar = take(order.p);
        let ma = take(order.q);
        let seasonal_ar = take(sp);
        let seasonal_ma = take(sq);
        let mean = if order.includes_mean() {
            take(1).first().copied().unwrap_or(fixed_mean)
        } else {
            fixed_mean
        };
        Self {
            ar,
            ma,
            seasonal_ar,
            seasonal_ma,
            mean,
        }
    }

    fn full_ar(&self, season: usize) -> Vec<f64> {
        expand_polynomial(&self.ar, &self.seasonal_ar, season, true)
    }

    fn full_ma(&self, season: usize) -> Vec<f64> {
        expand_polynomial(&self.ma, &self.seasonal_ma, season, false)
    }
}

/// One-step residuals of the stationary series under the given polynomials,
/// starting at the first index with a full AR history.
fn css_residuals(w: &[f64], mean: f64, ar: &[f64], ma: &[f64]) -> Vec<f64> {
    let start = ar.len();
    let mut residuals = vec![0.0; w.len()];
    for t in start..w.len() {
        let mut prediction = mean;
        for (k, phi) in ar.iter().enumerate() {
            prediction += phi * (w[t - k - 1] - mean);
        }
        for (k, theta) in ma.iter().enumerate() {
            if t > k {
                prediction += theta * residuals[t - k - 1];
            }
        }
        residuals[t] = w[t] - prediction;
    }
    residuals
}

/// Fitted ARIMA estimator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FittedArima {
    order: ArimaOrder,
    coefficients: Coefficients,
    sigma2: f64,
    log_likelihood: f64,
    aic: f64,
    bic: f64,
    /// Training series, needed to forecast from its end
    history: Vec<f64>,
    /// Residuals of the differenced training series
    residuals: Vec<f64>,
}

impl FittedArima {
    pub fn order(&self) -> ArimaOrder {
        self.order
    }

    pub fn ar_coefficients(&self) -> &[f64] {
        &self.coefficients.ar
    }

    pub fn ma_coefficients(&self) -> &[f64] {
        &self.coefficients.ma
    }

    /// Innovation variance
    pub fn sigma2(&self) -> f64 {
        self.sigma2
    }

    pub fn log_likelihood(&self) -> f64 {
        self.log_likelihood
    }

    pub fn aic(&self) -> f64 {
        self.aic
    }

    pub fn bic(&self) -> f64 {
        self.bic
    }

    /// Forecast `horizon` steps past the end of the training series
    pub fn forecast(&self, horizon: usize) -> Result<ForecastResult> {
        let season = self.order.season();
        let ar = self.coefficients.full_ar(season);
        let ma = self.coefficients.full_ma(season);
        let mean = self.coefficients.mean;
        let lags = self.order.difference_lags();

        // levels[0] is the series, levels[i + 1] its i-th difference
        let mut levels = vec![self.history.clone()];
        for &lag in &lags {
            let next = difference(levels[levels.len() - 1].as_slice(), lag);
            levels.push(next);
        }
        let mut residuals = self.residuals.clone();

        let mut values = Vec::with_capacity(horizon);
        for _ in 0..horizon {
            let w = &levels[lags.len()];
            let t = w.len();
            let mut next = mean;
            for (k, phi) in ar.iter().enumerate() {
                if let Some(past) = t.checked_sub(k + 1).map(|i| w[i]) {
                    next += phi * (past - mean);
                }
            }
            for (k, theta) in ma.iter().enumerate() {
                if let Some(past) = t.checked_sub(k + 1).and_then(|i| residuals.get(i)) {
                    next += theta * past;
                }
            }
            residuals.push(0.0);
            levels[lags.len()].push(next);

            for i in (0..lags.len()).rev() {
                let lag = lags[i];
                let below = &levels[i];
                let base = below.len().checked_sub(lag).map(|j| below[j]).ok_or_else(|| {
                    ForecastError::InsufficientData {
                        needed: lag,
                        got: below.len(),
                    }
                })?;
                let integrated = levels[i + 1][levels[i + 1].len() - 1] + base;
                levels[i].push(integrated);
            }
            values.push(levels[0][levels[0].len() - 1]);
        }

        let intervals = self.prediction_intervals(&values)?;
        ForecastResult::new_with_intervals(values, intervals)
    }

    /// Normal-theory bounds from the psi weights of the integrated model
    fn prediction_intervals(&self, values: &[f64]) -> Result<Vec<(f64, f64)>> {
        let season = self.order.season();
        let mut ar_poly = vec![1.0];
        ar_poly.extend(self.coefficients.full_ar(season).iter().map(|c| -c));
        for lag in self.order.difference_lags() {
            let mut diff = vec![0.0; lag + 1];
            diff[0] = 1.0;
            diff[lag] = -1.0;
            ar_poly = multiply(&ar_poly, &diff);
        }
        let ma = self.coefficients.full_ma(season);

        let horizon = values.len();
        let mut psi = vec![0.0; horizon];
        if horizon > 0 {
            psi[0] = 1.0;
        }
        for j in 1..horizon {
            let mut weight = ma.get(j - 1).copied().unwrap_or(0.0);
            for k in 1..=j.min(ar_poly.len() - 1) {
                weight -= ar_poly[k] * psi[j - k];
            }
            psi[j] = weight;
        }

        let normal = Normal::new(0.0, 1.0)
            .map_err(|e| ForecastError::InvalidParameter(e.to_string()))?;
        let z = normal.inverse_cdf(0.5 + INTERVAL_LEVEL / 2.0);

        let mut cumulative = 0.0;
        Ok(values
            .iter()
            .zip(&psi)
            .map(|(v, w)| {
                cumulative += w * w;
                let margin = z * (self.sigma2 * cumulative).sqrt();
                (v - margin, v + margin)
            })
            .collect())
    }
}

fn multiply(a: &[f64], b: &[f64]) -> Vec<f64> {
    let mut out = vec![0.0; a.len() + b.len() - 1];
    for (i, x) in a.iter().enumerate() {
        for (j, y) in b.iter().enumerate() {
            out[i + j] += x * y;
        }
    }
    out
}

/// Fit `order` to `series` by conditional sum of squares
pub fn fit_arima(series: &[f64], order: ArimaOrder) -> Result<FittedArima> {
    let needed = order.min_observations();
    if series.len() < needed {
        return Err(ForecastError::InsufficientData {
            needed,
            got: series.len(),
        });
    }
    if series.iter().any(|v| !v.is_finite()) {
        return Err(ForecastError::DataError(
            "Series contains non-finite values".to_string(),
        ));
    }

    let mut w = series.to_vec();
    for lag in order.difference_lags() {
        w = difference(&w, lag);
    }

    let season = order.season();
    let sample_mean = w.iter().sum::<f64>() / w.len() as f64;
    let fixed_mean = if order.includes_mean() { sample_mean } else { 0.0 };

    let coefficient_count = order.parameter_count() - usize::from(order.includes_mean());
    let mut initial = vec![0.0; coefficient_count];
    let mut bounds = vec![(-COEFFICIENT_BOUND, COEFFICIENT_BOUND); coefficient_count];
    if order.includes_mean() {
        let spread = w.iter().map(|v| (v - sample_mean).abs()).fold(0.0, f64::max) + 1.0;
        initial.push(sample_mean);
        bounds.push((sample_mean - spread, sample_mean + spread));
    }

    let start = order.ar_degree();
    let effective = (w.len() - start) as f64;
    let objective = |params: &[f64]| -> f64 {
        let c = Coefficients::unpack(&order, params, fixed_mean);
        let residuals = css_residuals(&w, c.mean, &c.full_ar(season), &c.full_ma(season));
        residuals[start..].iter().map(|e| e * e).sum::<f64>()
    };

    let minimum = NelderMead::default().minimize(objective, &initial, &bounds);
    if !minimum.value.is_finite() {
        return Err(ForecastError::DataError(format!(
            "{} estimation did not produce a finite sum of squares",
            order
        )));
    }

    let coefficients = Coefficients::unpack(&order, &minimum.point, fixed_mean);
    let residuals = css_residuals(
        &w,
        coefficients.mean,
        &coefficients.full_ar(season),
        &coefficients.full_ma(season),
    );
    let sigma2 = (minimum.value / effective).max(MIN_VARIANCE);
    let log_likelihood = -0.5 * effective * (1.0 + sigma2.ln() + (2.0 * PI).ln());
    let k = (order.parameter_count() + 1) as f64;

    Ok(FittedArima {
        order,
        coefficients,
        sigma2,
        log_likelihood,
        aic: -2.0 * log_likelihood + 2.0 * k,
        bic: -2.0 * log_likelihood + k * effective.ln(),
        history: series.to_vec(),
        residuals,
    })
}

/// ARIMA hyperparameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ArimaParams {
    pub p: usize,
    pub d: usize,
    pub q: usize,
    pub test_size: f64,
}

impl Default for ArimaParams {
    fn default() -> Self {
        Self {
            p: 5,
            d: 1,
            q: 0,
            test_size: 0.2,
        }
    }
}

/// Fixed-order ARIMA strategy
#[derive(Debug, Clone)]
pub struct Arima {
    params: ArimaParams,
}

impl Arima {
    pub fn new(params: ArimaParams) -> Result<Self> {
        validate_test_size(params.test_size)?;
        Ok(Self { params })
    }

    pub fn order(&self) -> ArimaOrder {
        ArimaOrder::new(self.params.p, self.params.d, self.params.q)
    }
}

impl Estimator for Arima {
    type Fitted = FittedArima;

    fn name(&self) -> &'static str {
        "arima"
    }

    fn display_name(&self) -> &'static str {
        "ARIMA"
    }

    fn test_size(&self) -> f64 {
        self.params.test_size
    }

    fn fit(&self, train: &Dataset) -> Result<FittedArima> {
        fit_arima(&train.kpi_values()?, self.order())
    }

    fn forecast(&self, fitted: &FittedArima, _train: &Dataset, test: &Dataset) -> Result<ForecastResult> {
        fitted.forecast(test.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn ar1_series(n: usize, phi: f64) -> Vec<f64> {
        // deterministic pseudo-noise keeps the test reproducible
        let mut y = vec![0.0; n];
        for t in 1..n {
            let noise = ((t as f64 * 12.9898).sin() * 43758.5453).fract().abs() - 0.5;
            y[t] = phi * y[t - 1] + noise;
        }
        y
    }

    #[test]
    fn test_difference() {
        assert_eq!(difference(&[1.0, 3.0, 6.0, 10.0], 1), vec![2.0, 3.0, 4.0]);
        assert_eq!(difference(&[1.0, 2.0, 5.0, 7.0], 2), vec![4.0, 5.0]);
        assert!(difference(&[1.0], 1).is_empty());
    }

    #[test]
    fn test_seasonal_polynomial_expansion() {
        // (1 - 0.5B)(1 - 0.3B^4) = 1 - 0.5B - 0.3B^4 + 0.15B^5
        let ar = expand_polynomial(&[0.5], &[0.3], 4, true);
        assert_eq!(ar.len(), 5);
        assert_relative_eq!(ar[0], 0.5);
        assert_relative_eq!(ar[3], 0.3);
        assert_relative_eq!(ar[4], -0.15);

        let ma = expand_polynomial(&[0.5], &[0.3], 4, false);
        assert_relative_eq!(ma[4], 0.15);
    }

    #[test]
    fn test_ar1_coefficient_is_recovered() {
        let series = ar1_series(300, 0.7);
        let fitted = fit_arima(&series, ArimaOrder::new(1, 0, 0)).unwrap();
        assert!((fitted.ar_coefficients()[0] - 0.7).abs() < 0.15);
        assert!(fitted.aic().is_finite());
        assert!(fitted.bic() > fitted.aic());
    }

    #[test]
    fn test_linear_trend_is_extrapolated() {
        let series: Vec<f64> = (0..30).map(|i| 2.0 + 0.5 * i as f64).collect();
        let fitted = fit_arima(&series, ArimaOrder::new(0, 2, 0)).unwrap();
        let forecast = fitted.forecast(3).unwrap();
        assert_relative_eq!(forecast.values()[0], 17.0, epsilon = 1e-9);
        assert_relative_eq!(forecast.values()[2], 18.0, epsilon = 1e-9);
    }

    #[test]
    fn test_intervals_widen_with_horizon() {
        let series = ar1_series(60, 0.4);
        let fitted = fit_arima(&series, ArimaOrder::new(1, 1, 0)).unwrap();
        let forecast = fitted.forecast(4).unwrap();
        let widths: Vec<f64> = forecast
            .intervals()
            .unwrap()
            .iter()
            .map(|(lo, hi)| hi - lo)
            .collect();
        assert!(widths.windows(2).all(|w| w[1] >= w[0]));
    }

    #[test]
    fn test_short_series_is_rejected() {
        let err = fit_arima(&[1.0, 2.0, 3.0], ArimaOrder::new(5, 1, 0)).unwrap_err();
        assert!(matches!(err, ForecastError::InsufficientData { .. }));
    }

    #[test]
    fn test_order_display() {
        let order = ArimaOrder::new(1, 1, 1).with_seasonal(1, 0, 1, 12);
        assert_eq!(order.to_string(), "ARIMA(1,1,1)(1,0,1)[12]");
    }
}
