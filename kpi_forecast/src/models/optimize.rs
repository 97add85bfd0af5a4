//! Derivative-free minimisation for model fitting

/// Outcome of a Nelder-Mead run
#[derive(Debug, Clone)]
pub struct Minimum {
    pub point: Vec<f64>,
    pub value: f64,
    pub iterations: usize,
    pub converged: bool,
}

/// Nelder-Mead settings
#[derive(Debug, Clone, Copy)]
pub struct NelderMead {
    pub max_iter: usize,
    pub tolerance: f64,
    /// Reflection coefficient
    pub alpha: f64,
    /// Expansion coefficient
    pub gamma: f64,
    /// Contraction coefficient
    pub rho: f64,
    /// Shrink coefficient
    pub sigma: f64,
    pub initial_step: f64,
}

impl Default for NelderMead {
    fn default() -> Self {
        Self {
            max_iter: 1000,
            tolerance: 1e-8,
            alpha: 1.0,
            gamma: 2.0,
            rho: 0.5,
            sigma: 0.5,
            initial_step: 0.05,
        }
    }
}

impl NelderMead {
    /// Minimise `objective` from `initial`, clamping every vertex to `bounds`.
    pub fn minimize<F>(&self, objective: F, initial: &[f64], bounds: &[(f64, f64)]) -> Minimum
    where
        F: Fn(&[f64]) -> f64,
    {
        let n = initial.len();
        if n == 0 {
            return Minimum {
                point: Vec::new(),
                value: objective(&[]),
                iterations: 0,
                converged: true,
            };
        }

        let clamp = |point: Vec<f64>| -> Vec<f64> {
            point
                .into_iter()
                .enumerate()
                .map(|(i, x)| match bounds.get(i) {
                    Some(&(lo, hi)) => x.clamp(lo, hi),
                    None => x,
                })
                .collect()
        };
        // NaN objective values sort last
        let score = |point: &[f64]| -> f64 {
            let v = objective(point);
            if v.is_nan() {
                f64::INFINITY
            } else {
                v
            }
        };

        let mut simplex = Vec::with_capacity(n + 1);
        simplex.push(clamp(initial.to_vec()));
        for i in 0..n {
            let mut vertex = initial.to_vec();
            vertex[i] += if initial[i].abs() > 1e-10 {
                self.initial_step * initial[i].abs()
            } else {
                self.initial_step
            };
            simplex.push(clamp(vertex));
        }
        let mut values: Vec<f64> = simplex.iter().map(|v| score(v)).collect();

        let mut iterations = 0;
        let mut converged = false;

        while iterations < self.max_iter {
            iterations += 1;

            let mut order: Vec<usize> = (0..=n).collect();
            order.sort_by(|&a, &b| values[a].total_cmp(&values[b]));
            let (best, second_worst, worst) = (order[0], order[n - 1], order[n]);

            if (values[worst] - values[best]).abs() < self.tolerance {
                converged = true;
                break;
            }

            let centroid = centroid(&simplex, worst);
            let spread = simplex
                .iter()
                .map(|v| distance(v, &centroid))
                .fold(0.0, f64::max);
            if spread < self.tolerance {
                converged = true;
                break;
            }

            let reflected = clamp(towards(&centroid, &simplex[worst], -self.alpha));
            let reflected_value = score(&reflected);

            if reflected_value < values[best] {
                let expanded = clamp(towards(&centroid, &reflected, self.gamma));
                let expanded_value = score(&expanded);
                if expanded_value < reflected_value {
                    simplex[worst] = expanded;
                    values[worst] = expanded_value;
                } else {
                    simplex[worst] = reflected;
                    values[worst] = reflected_value;
                }
                continue;
            }

            if reflected_value < values[second_worst] {
                simplex[worst] = reflected;
                values[worst] = reflected_value;
                continue;
            }

            let (contracted, threshold) = if reflected_value < values[worst] {
                (clamp(towards(&centroid, &reflected, self.rho)), reflected_value)
            } else {
                (clamp(towards(&centroid, &simplex[worst], self.rho)), values[worst])
            };
            let contracted_value = score(&contracted);
            if contracted_value < threshold {
                simplex[worst] = contracted;
                values[worst] = contracted_value;
                continue;
            }

            let anchor = simplex[best].clone();
            for i in (0..=n).filter(|&i| i != best) {
                let shrunk = clamp(towards(&anchor, &simplex[i], self.sigma));
                values[i] = score(&shrunk);
                simplex[i] = shrunk;
            }
        }

        let best = (0..=n)
            .min_by(|&a, &b| values[a].total_cmp(&values[b]))
            .unwrap_or(0);

        Minimum {
            point: simplex[best].clone(),
            value: values[best],
            iterations,
            converged,
        }
    }
}

/// `origin + factor * (point - origin)`
fn towards(origin: &[f64], point: &[f64], factor: f64) -> Vec<f64> {
    origin
        .iter()
        .zip(point)
        .map(|(o, p)| o + factor * (p - o))
        .collect()
}

fn centroid(simplex: &[Vec<f64>], exclude: usize) -> Vec<f64> {
    let dim = simplex[0].len();
    let count = (simplex.len() - 1) as f64;
    let mut c = vec![0.0; dim];
    for (_, vertex) in simplex.iter().enumerate().filter(|(i, _)| *i != exclude) {
        for (acc, x) in c.iter_mut().zip(vertex) {
            *acc += x;
        }
    }
    c.iter_mut().for_each(|x| *x /= count);
    c
}

fn distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y).powi(2)).sum::<f64>().sqrt()
}
