//! Adaptive step-size selection for the embedded Dormand-Prince pair.
//!
//! Proportional-integral control after Hairer, Nørsett & Wanner ("Solving
//! Ordinary Differential Equations I", §II.4): the next step size scales by
//! `safety * err^(-alpha) * err_prev^beta`, where `err` is the scaled error
//! norm of the current step and `err_prev` that of the last accepted one.
//! The integral term damps the growth/shrink oscillation a purely
//! proportional rule produces on smooth problems.

use ndarray as nd;
use num_complex::Complex64 as C64;
use crate::error::{ QocError, QocResult };

/// Step-size controller settings.
///
/// The defaults satisfy `alpha + 0.75 * beta = 1/5` for the order-5(4) pair,
/// the Lund-stabilized choice; step ratios are clamped to
/// `[min_factor, max_factor]` and a step following a rejection never grows.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StepControl {
    /// Safety factor applied to every ratio (default 0.9).
    pub safety: f64,
    /// Proportional exponent on the current error (default 0.14).
    pub alpha: f64,
    /// Integral exponent on the previous accepted error (default 0.08).
    pub beta: f64,
    /// Lower clamp on the step ratio (default 0.2).
    pub min_factor: f64,
    /// Upper clamp on the step ratio (default 10.0).
    pub max_factor: f64,
}

impl Default for StepControl {
    fn default() -> Self {
        Self {
            safety: 0.9,
            alpha: 0.14,
            beta: 0.08,
            min_factor: 0.2,
            max_factor: 10.0,
        }
    }
}

impl StepControl {
    /// Reject non-finite or out-of-range settings.
    pub fn validate(&self) -> QocResult<()> {
        if !self.safety.is_finite() || self.safety <= 0.0 || self.safety >= 1.0
        {
            return Err(QocError::InvalidSetting {
                name: "safety", value: self.safety });
        }
        if !self.alpha.is_finite() || self.alpha <= 0.0 {
            return Err(QocError::InvalidSetting {
                name: "alpha", value: self.alpha });
        }
        if !self.beta.is_finite() || self.beta < 0.0 {
            return Err(QocError::InvalidSetting {
                name: "beta", value: self.beta });
        }
        if !self.min_factor.is_finite()
            || self.min_factor <= 0.0
            || self.min_factor >= 1.0
        {
            return Err(QocError::InvalidSetting {
                name: "min_factor", value: self.min_factor });
        }
        if !self.max_factor.is_finite() || self.max_factor <= 1.0 {
            return Err(QocError::InvalidSetting {
                name: "max_factor", value: self.max_factor });
        }
        Ok(())
    }
}

// Running controller state. `err_prev` is floored at 1e-4 so one very
// accurate step cannot blow up the integral term.
pub(crate) struct Controller {
    ctrl: StepControl,
    err_prev: f64,
    rejected: bool,
}

impl Controller {
    pub(crate) fn new(ctrl: StepControl) -> Self {
        Self { ctrl, err_prev: 1e-4, rejected: false }
    }

    // Step ratio after an accepted step with scaled error norm `err <= 1`.
    pub(crate) fn accept(&mut self, err: f64) -> f64 {
        let fac = self.ctrl.safety
            * err.max(1e-10).powf(-self.ctrl.alpha)
            * self.err_prev.powf(self.ctrl.beta);
        let ceil = if self.rejected { 1.0 } else { self.ctrl.max_factor };
        self.err_prev = err.max(1e-4);
        self.rejected = false;
        fac.clamp(self.ctrl.min_factor, ceil)
    }

    // Step ratio after a rejected step; never grows. A non-finite error norm
    // forces the strongest shrink.
    pub(crate) fn reject(&mut self, err: f64) -> f64 {
        self.rejected = true;
        if !err.is_finite() {
            return self.ctrl.min_factor;
        }
        let fac = self.ctrl.safety * err.powf(-self.ctrl.alpha);
        fac.clamp(self.ctrl.min_factor, 1.0)
    }
}

// Scaled RMS norm of `a` with the tolerance scale taken from `y`.
fn scaled_norm(
    a: &nd::Array2<C64>,
    y: &nd::Array2<C64>,
    rtol: f64,
    atol: f64,
) -> f64
{
    let mut acc: f64 = 0.0;
    nd::Zip::from(a).and(y).for_each(|ai, yi| {
        let sc = atol + rtol * yi.norm();
        acc += (ai.norm() / sc).powi(2);
    });
    (acc / a.len() as f64).sqrt()
}

// Starting step size, following the heuristic of Hairer, Nørsett & Wanner
// (§II.4, "starting step size"): compare the scaled magnitudes of the state
// and its derivative, probe one explicit Euler step to estimate the second
// derivative, then bound everything by the integration span.
pub(crate) fn initial_step<F>(
    rhs: F,
    z0: &nd::Array2<C64>,
    f0: &nd::Array2<C64>,
    t1: f64,
    rtol: f64,
    atol: f64,
) -> f64
where F: Fn(f64, &nd::Array2<C64>) -> nd::Array2<C64>
{
    let d0 = scaled_norm(z0, z0, rtol, atol);
    let d1 = scaled_norm(f0, z0, rtol, atol);
    let h0 =
        if d0 < 1e-5 || d1 < 1e-5 { 1e-6 }
        else { 0.01 * d0 / d1 };
    let h0 = h0.min(t1);
    let z1 = z0 + &(f0 * C64::from(h0));
    let f1 = rhs(h0, &z1);
    let d2 = scaled_norm(&(&f1 - f0), z0, rtol, atol) / h0;
    let h1 =
        if d1.max(d2) <= 1e-15 { (h0 * 1e-3).max(1e-6) }
        else { (0.01 / d1.max(d2)).powf(0.2) };
    let h = (100.0 * h0).min(h1).min(t1);
    if h.is_finite() && h > 0.0 { h } else { 1e-6_f64.min(t1) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        assert!(StepControl::default().validate().is_ok());
    }

    #[test]
    fn out_of_range_settings_are_rejected() {
        let ok = StepControl::default();
        assert!(StepControl { safety: 1.0, ..ok }.validate().is_err());
        assert!(StepControl { safety: -0.1, ..ok }.validate().is_err());
        assert!(StepControl { alpha: 0.0, ..ok }.validate().is_err());
        assert!(StepControl { beta: -0.01, ..ok }.validate().is_err());
        assert!(StepControl { min_factor: 0.0, ..ok }.validate().is_err());
        assert!(StepControl { min_factor: 1.5, ..ok }.validate().is_err());
        assert!(StepControl { max_factor: 0.9, ..ok }.validate().is_err());
        assert!(StepControl { max_factor: f64::NAN, ..ok }.validate()
            .is_err());
    }

    #[test]
    fn small_error_grows_large_error_shrinks() {
        let mut c = Controller::new(StepControl::default());
        let grow = c.accept(1e-8);
        assert!(grow > 1.0);
        let mut c = Controller::new(StepControl::default());
        let shrink = c.accept(0.99);
        assert!(shrink < 1.0);
    }

    #[test]
    fn ratios_stay_clamped() {
        let ctrl = StepControl::default();
        let mut c = Controller::new(ctrl);
        assert!(c.accept(0.0) <= ctrl.max_factor);
        let mut c = Controller::new(ctrl);
        assert!(c.accept(1.0) >= ctrl.min_factor);
        let mut c = Controller::new(ctrl);
        assert!(c.reject(1e9) >= ctrl.min_factor);
        assert!(c.reject(1.0001) <= 1.0);
    }

    #[test]
    fn no_growth_right_after_a_rejection() {
        let mut c = Controller::new(StepControl::default());
        let shrink = c.reject(50.0);
        assert!(shrink < 1.0);
        let after = c.accept(1e-10);
        assert!(after <= 1.0);
        // the ceiling is restored on the following step
        let later = c.accept(1e-10);
        assert!(later > 1.0);
    }

    #[test]
    fn non_finite_error_forces_strongest_shrink() {
        let ctrl = StepControl::default();
        let mut c = Controller::new(ctrl);
        assert_eq!(c.reject(f64::NAN), ctrl.min_factor);
        assert_eq!(c.reject(f64::INFINITY), ctrl.min_factor);
    }

    #[test]
    fn initial_step_is_positive_and_bounded() {
        // dz/dt = -z from z = 1
        let rhs = |_: f64, z: &nd::Array2<C64>| z.mapv(|v| -v);
        let z0 = nd::array![[C64::new(1.0, 0.0)]];
        let f0 = rhs(0.0, &z0);
        let h = initial_step(&rhs, &z0, &f0, 10.0, 1e-5, 1e-5);
        assert!(h > 0.0);
        assert!(h <= 10.0);
        // span bounds the guess for short integrations
        let h_short = initial_step(&rhs, &z0, &f0, 1e-3, 1e-5, 1e-5);
        assert!(h_short <= 1e-3);
    }

    #[test]
    fn initial_step_handles_zero_rhs() {
        let rhs = |_: f64, z: &nd::Array2<C64>| nd::Array2::zeros(z.dim());
        let z0 = nd::array![[C64::new(1.0, 0.0)]];
        let f0 = rhs(0.0, &z0);
        let h = initial_step(&rhs, &z0, &f0, 5.0, 1e-5, 1e-5);
        assert!(h > 0.0);
        assert!(h.is_finite());
    }
}
