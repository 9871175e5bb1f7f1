//! Calibration of Gaussian noise with the analytic Gaussian mechanism.
//!
//! Given a privacy budget `(epsilon, delta)` and an upper bound on the L2 global sensitivity of a
//! statistic, the analytic Gaussian mechanism finds the smallest standard deviation `sigma` such
//! that adding `N(0, sigma^2)` noise to the statistic is `(epsilon, delta)`-differentially private.
//!
//! With `Phi` the standard normal CDF, let
//!
//! ```text
//! case_a(e, s) = Phi( sqrt(e * s)) - exp(e) * Phi(-sqrt(e * (s + 2)))
//! case_b(e, s) = Phi(-sqrt(e * s)) - exp(e) * Phi(-sqrt(e * (s + 2)))
//! ```
//!
//! and `delta_thr = case_a(epsilon, 0)`. Depending on whether `delta` lies above or below the
//! threshold, a root `s >= 0` of `case_a(epsilon, s) = delta` resp. `case_b(epsilon, s) = delta` is
//! searched by doubling an upper bound followed by a bisection. The root determines
//! `alpha`, and `sigma = alpha * sensitivity / sqrt(2 * epsilon)`.
//!
//! Both searches run for a bounded number of steps.

use std::f64::consts::{PI, SQRT_2};

use tracing::warn;

use crate::privacy::{validate_budget, ParameterError};

/// The default tolerance on `delta` of the root search.
pub const DEFAULT_TOLERANCE: f64 = 1e-12;

/// The maximal number of times the upper bound of the search interval is doubled.
const MAX_DOUBLING_STEPS: usize = 1_024;

/// The maximal number of bisection steps.
const MAX_BISECTION_STEPS: usize = 10_000;

/// The standard normal CDF.
fn phi(t: f64) -> f64 {
    0.5 * libm::erfc(-t / SQRT_2)
}

/// Below this argument `erfc` loses its relative precision and the asymptotic tail is used.
const LN_PHI_ASYMPTOTIC_BELOW: f64 = -30.;

/// The natural logarithm of the standard normal CDF.
fn ln_phi(t: f64) -> f64 {
    if t >= LN_PHI_ASYMPTOTIC_BELOW {
        return phi(t).ln();
    }
    // Phi(-z) = exp(-z^2 / 2) / (z sqrt(2 pi)) * (1 - 1/z^2 + 3/z^4 - 15/z^6 + ...)
    let z = -t;
    let z2 = z * z;
    let series = 1. - 1. / z2 + 3. / (z2 * z2) - 15. / (z2 * z2 * z2);
    -0.5 * z2 - z.ln() - 0.5 * (2. * PI).ln() + series.ln()
}

/// Computes `exp(e) * Phi(-sqrt(e * (s + 2)))` without overflowing `exp(e)`.
fn tail(epsilon: f64, s: f64) -> f64 {
    (epsilon + ln_phi(-(epsilon * (s + 2.)).sqrt())).exp()
}

fn case_a(epsilon: f64, s: f64) -> f64 {
    phi((epsilon * s).sqrt()) - tail(epsilon, s)
}

fn case_b(epsilon: f64, s: f64) -> f64 {
    phi(-(epsilon * s).sqrt()) - tail(epsilon, s)
}

/// Returns the `delta` at which the calibrated `sigma` equals `sensitivity / sqrt(2 * epsilon)`.
pub fn threshold_delta(epsilon: f64) -> f64 {
    case_a(epsilon, 0.)
}

/// Computes the standard deviation of the Gaussian noise for the given privacy budget and global
/// sensitivity with the [default tolerance](DEFAULT_TOLERANCE).
///
/// # Errors
/// Fails if `epsilon <= 0`, `delta` lies outside of `(0, 1)` or `sensitivity < 0`.
pub fn calibrate(epsilon: f64, delta: f64, sensitivity: f64) -> Result<f64, ParameterError> {
    calibrate_with_tolerance(epsilon, delta, sensitivity, DEFAULT_TOLERANCE)
}

/// Computes the standard deviation of the Gaussian noise for the given privacy budget and global
/// sensitivity.
///
/// `tol` bounds the error on `delta` accepted by the bisection.
///
/// # Errors
/// Fails if `epsilon <= 0`, `delta` lies outside of `(0, 1)` or `sensitivity < 0`.
pub fn calibrate_with_tolerance(
    epsilon: f64,
    delta: f64,
    sensitivity: f64,
    tol: f64,
) -> Result<f64, ParameterError> {
    validate_budget(epsilon, delta)?;
    if !(sensitivity.is_finite() && sensitivity >= 0.) {
        return Err(ParameterError::Sensitivity(sensitivity));
    }

    let alpha = alpha(epsilon, delta, tol);
    Ok(alpha * sensitivity / (2. * epsilon).sqrt())
}

#[allow(clippy::float_cmp)]
fn alpha(epsilon: f64, delta: f64, tol: f64) -> f64 {
    let delta_thr = threshold_delta(epsilon);

    if delta == delta_thr {
        1.
    } else if delta > delta_thr {
        let s = solve(|s| case_a(epsilon, s), delta, Monotonicity::Increasing, tol);
        (1. + s / 2.).sqrt() - (s / 2.).sqrt()
    } else {
        let s = solve(|s| case_b(epsilon, s), delta, Monotonicity::Decreasing, tol);
        (1. + s / 2.).sqrt() + (s / 2.).sqrt()
    }
}

#[derive(Clone, Copy, Debug)]
enum Monotonicity {
    Increasing,
    Decreasing,
}

impl Monotonicity {
    /// Checks whether `value` is at or beyond `target` in the direction of monotonicity.
    fn reached(self, value: f64, target: f64) -> bool {
        match self {
            Self::Increasing => value >= target,
            Self::Decreasing => value <= target,
        }
    }

    /// Checks whether `value` is strictly beyond `target` in the direction of monotonicity.
    fn overshot(self, value: f64, target: f64) -> bool {
        match self {
            Self::Increasing => value > target,
            Self::Decreasing => value < target,
        }
    }
}

/// Finds `s >= 0` with `|f(s) - target| <= tol` for a monotonic `f`.
#[allow(clippy::float_cmp)]
fn solve<F>(f: F, target: f64, monotonicity: Monotonicity, tol: f64) -> f64
where
    F: Fn(f64) -> f64,
{
    let (mut s_inf, mut s_sup) = (0., 1.);
    let mut steps = 0;
    while !monotonicity.reached(f(s_sup), target) {
        if steps == MAX_DOUBLING_STEPS || !(2. * s_sup).is_finite() {
            warn!("doubling search did not bracket the root within {} steps", steps);
            break;
        }
        s_inf = s_sup;
        s_sup *= 2.;
        steps += 1;
    }

    let mut s_mid = s_inf + (s_sup - s_inf) / 2.;
    for _ in 0..MAX_BISECTION_STEPS {
        let value = f(s_mid);
        if (value - target).abs() <= tol {
            return s_mid;
        }
        if monotonicity.overshot(value, target) {
            s_sup = s_mid;
        } else {
            s_inf = s_mid;
        }
        let next = s_inf + (s_sup - s_inf) / 2.;
        if next == s_mid {
            // the interval cannot be split any further in f64
            return s_mid;
        }
        s_mid = next;
    }
    warn!(
        "bisection did not reach the tolerance {} within {} steps",
        tol, MAX_BISECTION_STEPS,
    );
    s_mid
}
