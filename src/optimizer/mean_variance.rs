//! Long-only mean-variance solvers under a per-asset cap
//!
//! Feasible set: `0 <= w_i <= cap`, `sum(w) = 1`, with `cap * n >= 1`.
//! The unconstrained analytic solution is used when it already lies in the feasible set;
//! otherwise the problem is solved iteratively with projection onto the capped simplex.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::debug;

use super::portfolio_volatility;
use crate::math;

/// Smallest step tried by the max-Sharpe line search
const MIN_STEP: Decimal = dec!(0.000000000001);
const MAX_STEP: Decimal = dec!(100);
/// Slack when testing the analytic solution against the bounds
const BOUND_SLACK: Decimal = dec!(0.000000001);

pub(super) struct MeanVariance<'a> {
    covariance: &'a [Vec<Decimal>],
    cap: Decimal,
    max_iterations: usize,
    tolerance: Decimal,
}

impl<'a> MeanVariance<'a> {
    pub fn new(
        covariance: &'a [Vec<Decimal>],
        cap: Decimal,
        max_iterations: usize,
        tolerance: Decimal,
    ) -> Self {
        Self {
            covariance,
            cap,
            max_iterations,
            tolerance,
        }
    }

    fn n(&self) -> usize {
        self.covariance.len()
    }

    fn equal(&self) -> Vec<Decimal> {
        let n = self.n();
        vec![Decimal::ONE / Decimal::from(n as u64); n]
    }

    /// Minimum-variance portfolio
    pub fn min_variance(&self) -> Vec<Decimal> {
        match self.n() {
            0 => return Vec::new(),
            1 => return vec![Decimal::ONE],
            _ => {}
        }

        // w = Σ^-1 1 / (1' Σ^-1 1)
        let ones = vec![Decimal::ONE; self.n()];
        if let Some(w) = self.analytic(&ones) {
            if self.feasible(&w) {
                debug!("Minimum variance: analytic solution is feasible");
                return w;
            }
        }

        self.projected_min_variance()
    }

    /// Maximum-Sharpe portfolio for the given excess returns
    pub fn max_sharpe(&self, excess: &[Decimal]) -> Vec<Decimal> {
        match self.n() {
            0 => return Vec::new(),
            1 => return vec![Decimal::ONE],
            _ => {}
        }

        // w = Σ^-1 (μ - rf) / (1' Σ^-1 (μ - rf))
        if let Some(w) = self.analytic(excess) {
            if self.feasible(&w) && dot(&w, excess) > Decimal::ZERO {
                debug!("Maximum Sharpe: analytic solution is feasible");
                return w;
            }
        }

        self.projected_max_sharpe(excess)
    }

    /// Fill the highest expected returns up to the cap
    pub fn max_return(&self, returns: &[Decimal]) -> Vec<Decimal> {
        let n = self.n();
        let mut order: Vec<usize> = (0..n).collect();
        order.sort_by(|&a, &b| returns[b].cmp(&returns[a]).then(a.cmp(&b)));

        let mut weights = vec![Decimal::ZERO; n];
        let mut remaining = Decimal::ONE;
        for i in order {
            if remaining <= Decimal::ZERO {
                break;
            }
            let take = self.cap.min(remaining);
            weights[i] = take;
            remaining -= take;
        }
        weights
    }

    fn analytic(&self, rhs: &[Decimal]) -> Option<Vec<Decimal>> {
        let inverse = math::invert_matrix(self.covariance, self.tolerance)?;
        let z: Vec<Decimal> = inverse
            .iter()
            .map(|row| row.iter().zip(rhs.iter()).map(|(a, b)| *a * *b).sum())
            .collect();
        let sum: Decimal = z.iter().sum();
        if sum <= self.tolerance {
            return None;
        }
        Some(z.into_iter().map(|x| x / sum).collect())
    }

    fn feasible(&self, w: &[Decimal]) -> bool {
        w.iter()
            .all(|&x| x >= -BOUND_SLACK && x <= self.cap + BOUND_SLACK)
    }

    fn project(&self, v: &[Decimal]) -> Vec<Decimal> {
        math::project_capped_simplex(v, self.cap)
    }

    /// Projected gradient descent on w'Σw with step 1/L, L bounded by Gershgorin
    fn projected_min_variance(&self) -> Vec<Decimal> {
        let lipschitz = dec!(2)
            * self
                .covariance
                .iter()
                .map(|row| row.iter().map(|c| c.abs()).sum::<Decimal>())
                .max()
                .unwrap_or(Decimal::ZERO);
        let mut w = self.project(&self.equal());
        if lipschitz <= Decimal::ZERO {
            return w;
        }
        let step = Decimal::ONE / lipschitz;

        for iteration in 0..self.max_iterations {
            let gradient = self.sigma_times(&w);
            let moved: Vec<Decimal> = w
                .iter()
                .zip(gradient.iter())
                .map(|(&wi, &gi)| wi - step * dec!(2) * gi)
                .collect();
            let next = self.project(&moved);
            let delta = max_abs_diff(&w, &next);
            w = next;
            if delta < self.tolerance {
                debug!("Minimum variance converged after {} iterations", iteration + 1);
                break;
            }
        }
        w
    }

    /// Monotone projected ascent on the Sharpe ratio, starting from minimum variance
    fn projected_max_sharpe(&self, excess: &[Decimal]) -> Vec<Decimal> {
        let mut w = self.min_variance();
        let mut best = self.sharpe(&w, excess);
        let mut step = Decimal::ONE;

        for _ in 0..self.max_iterations {
            let gradient = self.sharpe_gradient(&w, excess);
            let mut improved = false;
            while step >= MIN_STEP {
                let moved: Vec<Decimal> = w
                    .iter()
                    .zip(gradient.iter())
                    .map(|(&wi, &gi)| wi + step * gi)
                    .collect();
                let candidate = self.project(&moved);
                let value = self.sharpe(&candidate, excess);
                if value > best + self.tolerance {
                    w = candidate;
                    best = value;
                    improved = true;
                    step = (step * dec!(2)).min(MAX_STEP);
                    break;
                }
                step /= dec!(2);
            }
            if !improved {
                break;
            }
        }
        w
    }

    fn sigma_times(&self, w: &[Decimal]) -> Vec<Decimal> {
        self.covariance
            .iter()
            .map(|row| row.iter().zip(w.iter()).map(|(c, x)| *c * *x).sum())
            .collect()
    }

    fn sharpe(&self, w: &[Decimal], excess: &[Decimal]) -> Decimal {
        let vol = portfolio_volatility(self.covariance, w);
        if vol <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        dot(w, excess) / vol
    }

    /// ∂S/∂w_i = e_i/σ − (e·w)(Σw)_i/σ³
    fn sharpe_gradient(&self, w: &[Decimal], excess: &[Decimal]) -> Vec<Decimal> {
        let vol = portfolio_volatility(self.covariance, w);
        if vol <= Decimal::ZERO {
            return excess.to_vec();
        }
        let ret = dot(w, excess);
        let sigma_w = self.sigma_times(w);
        let vol3 = vol * vol * vol;
        excess
            .iter()
            .zip(sigma_w.iter())
            .map(|(&e, &s)| e / vol - ret * s / vol3)
            .collect()
    }
}

fn dot(a: &[Decimal], b: &[Decimal]) -> Decimal {
    a.iter().zip(b.iter()).map(|(x, y)| *x * *y).sum()
}

fn max_abs_diff(a: &[Decimal], b: &[Decimal]) -> Decimal {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (*x - *y).abs())
        .max()
        .unwrap_or(Decimal::ZERO)
}
