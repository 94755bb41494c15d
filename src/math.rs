//! Decimal numerics shared by the optimizer and risk analyzer

use rust_decimal::prelude::*;
use rust_decimal::MathematicalOps;
use rust_decimal_macros::dec;

/// sqrt(2 * pi)
const SQRT_TWO_PI: Decimal = dec!(2.5066282746310002);

/// Square root, zero for non-positive input
pub fn sqrt(x: Decimal) -> Decimal {
    if x <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    x.sqrt().unwrap_or(Decimal::ZERO)
}

/// Hyperbolic tangent. Saturates outside [-20, 20], where tanh is within 1e-17 of +/-1.
pub fn tanh(x: Decimal) -> Decimal {
    let x = x.max(dec!(-20)).min(dec!(20));
    let e = (x * Decimal::TWO).exp();
    (e - Decimal::ONE) / (e + Decimal::ONE)
}

/// Standard normal density
pub fn normal_pdf(z: Decimal) -> Decimal {
    (-(z * z) / Decimal::TWO).exp() / SQRT_TWO_PI
}

/// Standard normal quantile (inverse CDF), Acklam's rational approximation.
/// Relative error below 1.2e-9 over (0, 1).
pub fn normal_quantile(p: Decimal) -> Decimal {
    assert!(
        p > Decimal::ZERO && p < Decimal::ONE,
        "normal quantile requires p in (0, 1), got {}",
        p
    );

    const A: [Decimal; 6] = [
        dec!(-39.69683028665376),
        dec!(220.9460984245205),
        dec!(-275.9285104469687),
        dec!(138.3577518672690),
        dec!(-30.66479806614716),
        dec!(2.506628277459239),
    ];
    const B: [Decimal; 5] = [
        dec!(-54.47609879822406),
        dec!(161.5858368580409),
        dec!(-155.6989798598866),
        dec!(66.80131188771972),
        dec!(-13.28068155288572),
    ];
    const C: [Decimal; 6] = [
        dec!(-0.007784894002430293),
        dec!(-0.3223964580411365),
        dec!(-2.400758277161838),
        dec!(-2.549732539343734),
        dec!(4.374664141464968),
        dec!(2.938163982698783),
    ];
    const D: [Decimal; 4] = [
        dec!(0.007784695709041462),
        dec!(0.3224671290700398),
        dec!(2.445134137142996),
        dec!(3.754408661907416),
    ];
    let p_low = dec!(0.02425);

    let tail = |q: Decimal| {
        let num = ((((C[0] * q + C[1]) * q + C[2]) * q + C[3]) * q + C[4]) * q + C[5];
        let den = (((D[0] * q + D[1]) * q + D[2]) * q + D[3]) * q + Decimal::ONE;
        num / den
    };

    if p < p_low {
        tail(sqrt(dec!(-2) * p.ln()))
    } else if p <= Decimal::ONE - p_low {
        let q = p - dec!(0.5);
        let r = q * q;
        let num = (((((A[0] * r + A[1]) * r + A[2]) * r + A[3]) * r + A[4]) * r + A[5]) * q;
        let den = ((((B[0] * r + B[1]) * r + B[2]) * r + B[3]) * r + B[4]) * r + Decimal::ONE;
        num / den
    } else {
        -tail(sqrt(dec!(-2) * (Decimal::ONE - p).ln()))
    }
}

/// Invert a square matrix using Gauss-Jordan elimination with partial pivoting.
/// Returns `None` when a pivot falls below `tolerance`.
pub fn invert_matrix(matrix: &[Vec<Decimal>], tolerance: Decimal) -> Option<Vec<Vec<Decimal>>> {
    let n = matrix.len();

    let mut aug = vec![vec![Decimal::ZERO; 2 * n]; n];
    for i in 0..n {
        aug[i][..n].copy_from_slice(&matrix[i][..n]);
        aug[i][n + i] = Decimal::ONE;
    }

    for col in 0..n {
        let mut max_row = col;
        let mut max_val = aug[col][col].abs();
        for (row, r) in aug.iter().enumerate().skip(col + 1) {
            if r[col].abs() > max_val {
                max_val = r[col].abs();
                max_row = row;
            }
        }

        if max_val < tolerance {
            return None;
        }

        if max_row != col {
            aug.swap(col, max_row);
        }

        let pivot = aug[col][col];
        for v in aug[col].iter_mut() {
            *v /= pivot;
        }

        let col_row: Vec<Decimal> = aug[col].clone();
        for (row, r) in aug.iter_mut().enumerate() {
            if row != col {
                let factor = r[col];
                if factor != Decimal::ZERO {
                    for (v, c) in r.iter_mut().zip(col_row.iter()) {
                        *v -= factor * c;
                    }
                }
            }
        }
    }

    Some(aug.into_iter().map(|row| row[n..].to_vec()).collect())
}

/// Euclidean projection onto `{ w : 0 <= w_i <= cap, sum(w) = 1 }`.
/// Requires `cap * n >= 1`.
pub fn project_capped_simplex(v: &[Decimal], cap: Decimal) -> Vec<Decimal> {
    let clamped_sum = |tau: Decimal| -> Decimal {
        v.iter()
            .map(|&x| (x - tau).max(Decimal::ZERO).min(cap))
            .sum()
    };

    // sum is non-increasing in tau: n*cap at lo, 0 at hi
    let mut lo = v.iter().copied().min().unwrap_or(Decimal::ZERO) - cap;
    let mut hi = v.iter().copied().max().unwrap_or(Decimal::ZERO);
    for _ in 0..90 {
        let mid = (lo + hi) / Decimal::TWO;
        if clamped_sum(mid) > Decimal::ONE {
            lo = mid;
        } else {
            hi = mid;
        }
    }
    let tau = (lo + hi) / Decimal::TWO;

    let mut w: Vec<Decimal> = v
        .iter()
        .map(|&x| (x - tau).max(Decimal::ZERO).min(cap))
        .collect();
    let sum: Decimal = w.iter().sum();
    if sum > Decimal::ZERO {
        for x in &mut w {
            *x /= sum;
        }
    }
    w
}
