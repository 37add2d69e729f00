//! Differentiable evolution engine.
//!
//! Advances a column block from `t = 0` to a caller-supplied end time under
//! a [`Generator`], using the Dormand-Prince 5(4) pair with adaptive steps.
//! When derivatives are requested the block is augmented with one forward
//! sensitivity per control parameter, `dS_j/dt = G S_j + (dG/dp_j) X` with
//! `S_j(0) = 0`, and the whole augmented block shares one error control: the
//! reported sensitivities are solved to the same tolerances as the state
//! itself rather than reconstructed afterwards.

use ndarray::{ self as nd, s };
use num_complex::Complex64 as C64;
use tracing::{ debug, trace };
use crate::{
    error::{ QocError, QocResult },
    generator::Generator,
};

pub mod controller;
use controller::{ Controller, StepControl };

pub(crate) mod dopri5;

/// Tolerances, step budget, and step-size control for one solve.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct IntegratorOptions {
    /// Relative tolerance (default 1e-5).
    pub rtol: f64,
    /// Absolute tolerance (default 1e-5).
    pub atol: f64,
    /// Maximum accepted plus rejected steps per solve (default 100 000).
    pub max_steps: usize,
    /// Step-size controller settings.
    pub control: StepControl,
}

impl Default for IntegratorOptions {
    fn default() -> Self {
        Self {
            rtol: 1e-5,
            atol: 1e-5,
            max_steps: 100_000,
            control: StepControl::default(),
        }
    }
}

impl IntegratorOptions {
    /// Reject nonpositive or non-finite tolerances, an empty step budget, or
    /// out-of-range controller settings.
    pub fn validate(&self) -> QocResult<()> {
        if !self.rtol.is_finite() || self.rtol <= 0.0 {
            return Err(QocError::InvalidSetting {
                name: "rtol", value: self.rtol });
        }
        if !self.atol.is_finite() || self.atol <= 0.0 {
            return Err(QocError::InvalidSetting {
                name: "atol", value: self.atol });
        }
        if self.max_steps == 0 {
            return Err(QocError::InvalidSetting {
                name: "max_steps", value: 0.0 });
        }
        self.control.validate()
    }
}

// Final state block, forward sensitivities, and end-time slope of one solve.
pub(crate) struct Evolution {
    pub(crate) state: nd::Array2<C64>,
    pub(crate) sens: Vec<nd::Array2<C64>>,
    // dX/dt at the end time; free from the FSAL stage, and exactly the
    // derivative of the final state with respect to the end time.
    pub(crate) slope: nd::Array2<C64>,
    // solve statistics, read by the integration tests
    #[cfg_attr(not(test), allow(dead_code))]
    pub(crate) steps: usize,
    #[cfg_attr(not(test), allow(dead_code))]
    pub(crate) rejected: usize,
}

// Scaled RMS error norm; the acceptance test is `norm <= 1`.
fn error_norm(
    err: &nd::Array2<C64>,
    z0: &nd::Array2<C64>,
    z1: &nd::Array2<C64>,
    rtol: f64,
    atol: f64,
) -> f64
{
    let mut acc: f64 = 0.0;
    nd::Zip::from(err).and(z0).and(z1).for_each(|e, a, b| {
        let sc = atol + rtol * a.norm().max(b.norm());
        acc += (e.norm() / sc).powi(2);
    });
    (acc / err.len() as f64).sqrt()
}

// Adaptive Dormand-Prince loop from t = 0 to t1 > 0. Returns the final
// augmented block, the final FSAL stage, and the step counts.
fn integrate<F>(
    rhs: F,
    z0: nd::Array2<C64>,
    t1: f64,
    opts: &IntegratorOptions,
) -> QocResult<(nd::Array2<C64>, nd::Array2<C64>, usize, usize)>
where F: Fn(f64, &nd::Array2<C64>) -> nd::Array2<C64>
{
    let mut t: f64 = 0.0;
    let mut z = z0;
    let mut k1 = rhs(0.0, &z);
    let mut h =
        controller::initial_step(&rhs, &z, &k1, t1, opts.rtol, opts.atol);
    let mut ctrl = Controller::new(opts.control);
    // below this the step no longer moves t in floating point
    let h_floor = 16.0 * f64::EPSILON * t1;
    let mut steps: usize = 0;
    let mut rejected: usize = 0;
    let mut prop: dopri5::ProposedStep;
    let mut err: f64;
    while t < t1 {
        if steps + rejected >= opts.max_steps {
            return Err(QocError::StepBudgetExhausted {
                max_steps: opts.max_steps, t });
        }
        if h < h_floor {
            return Err(QocError::StepSizeUnderflow { t });
        }
        let last = h >= t1 - t;
        if last { h = t1 - t; }
        prop = dopri5::step(&rhs, t, h, &z, &k1);
        err = error_norm(&prop.err, &z, &prop.y, opts.rtol, opts.atol);
        if err.is_finite() && err <= 1.0 {
            t = if last { t1 } else { t + h };
            z = prop.y;
            k1 = prop.fsal;
            steps += 1;
            if z.iter().any(|v| !v.re.is_finite() || !v.im.is_finite()) {
                return Err(QocError::NonFiniteState { t });
            }
            h *= ctrl.accept(err);
        } else {
            rejected += 1;
            trace!("step rejected at t = {}, h = {}, err = {}", t, h, err);
            h *= ctrl.reject(err);
        }
    }
    debug!("evolved to t = {} in {} steps ({} rejected)", t1, steps, rejected);
    Ok((z, k1, steps, rejected))
}

// Evolve the column block `x0` under `gen` to `t1`, optionally with one
// forward sensitivity block per control parameter. `params` must already
// match the generator's layout.
pub(crate) fn evolve_block(
    gen: &Generator,
    x0: &nd::Array2<C64>,
    t1: f64,
    params: &[f64],
    with_sens: bool,
    opts: &IntegratorOptions,
) -> QocResult<Evolution>
{
    let n = x0.nrows();
    let w = x0.ncols();
    let np = if with_sens { gen.n_params() } else { 0 };
    let phase = gen.kind().phase();
    // augmented block [X | S_0 | .. | S_{np-1}]; sensitivities start at zero
    let mut z0: nd::Array2<C64> = nd::Array2::zeros((n, w * (np + 1)));
    z0.slice_mut(s![.., 0..w]).assign(x0);
    let rhs = |t: f64, z: &nd::Array2<C64>| -> nd::Array2<C64> {
        if with_sens {
            let ev = gen.eval_at(t, params);
            let mut dz = ev.value.dot(z);
            let x = z.slice(s![.., 0..w]);
            let mut bx: nd::Array2<C64>;
            for (term, c) in gen.terms().iter().zip(ev.coeffs.iter()) {
                if c.tan.is_empty() { continue; }
                bx = term.op.dot(&x);
                for (m, &dc) in c.tan.iter().enumerate() {
                    if dc != 0.0 {
                        let j = term.offset + m + 1;
                        dz.slice_mut(s![.., w * j .. w * (j + 1)])
                            .scaled_add(C64::from(dc), &bx);
                    }
                }
            }
            dz.mapv_into(|v| phase * v)
        } else {
            gen.value_at(t, params).dot(z).mapv_into(|v| phase * v)
        }
    };
    let (z, k1, steps, rejected) = integrate(rhs, z0, t1, opts)?;
    let state = z.slice(s![.., 0..w]).to_owned();
    let sens = (0..np)
        .map(|j| z.slice(s![.., w * (j + 1) .. w * (j + 2)]).to_owned())
        .collect();
    let slope = k1.slice(s![.., 0..w]).to_owned();
    Ok(Evolution { state, sens, slope, steps, rejected })
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;
    use crate::{
        dual::Dual,
        objective::{ ControlTerm, Objective, State },
        op,
        pulse::{ ControlParams, PulseSpec },
    };
    use super::*;

    fn sx() -> nd::Array2<C64> {
        nd::array![
            [C64::new(0.0, 0.0), C64::new(1.0, 0.0)],
            [C64::new(1.0, 0.0), C64::new(0.0, 0.0)],
        ]
    }

    fn ket0() -> State {
        State::Ket(nd::array![C64::new(1.0, 0.0), C64::new(0.0, 0.0)])
    }

    fn ket1() -> State {
        State::Ket(nd::array![C64::new(0.0, 0.0), C64::new(1.0, 0.0)])
    }

    fn ket0_block() -> nd::Array2<C64> {
        nd::array![[C64::new(1.0, 0.0)], [C64::new(0.0, 0.0)]]
    }

    fn tight() -> IntegratorOptions {
        IntegratorOptions { rtol: 1e-10, atol: 1e-12, ..Default::default() }
    }

    fn drift_only(h: nd::Array2<C64>) -> Generator<'static> {
        let obj = Objective::new(ket0(), h, vec![], ket1()).unwrap();
        Generator::new(&obj, &ControlParams::new()).unwrap()
    }

    #[test]
    fn rabi_oscillation_matches_the_analytic_solution() {
        // H = sigma_x: psi(t) = cos(t)|0> - i sin(t)|1>
        let gen = drift_only(sx());
        let t1 = 0.7;
        let sol = evolve_block(
            &gen, &ket0_block(), t1, &[], false, &tight()).unwrap();
        assert_abs_diff_eq!(sol.state[[0, 0]].re, t1.cos(), epsilon = 1e-8);
        assert_abs_diff_eq!(sol.state[[0, 0]].im, 0.0, epsilon = 1e-8);
        assert_abs_diff_eq!(sol.state[[1, 0]].re, 0.0, epsilon = 1e-8);
        assert_abs_diff_eq!(sol.state[[1, 0]].im, -t1.sin(), epsilon = 1e-8);
        assert!(sol.sens.is_empty());
        assert!(sol.steps > 0);
        // the slope is -i sigma_x psi(t1)
        assert_abs_diff_eq!(sol.slope[[0, 0]].re, -t1.sin(), epsilon = 1e-8);
        assert_abs_diff_eq!(sol.slope[[1, 0]].im, -t1.cos(), epsilon = 1e-8);
    }

    #[test]
    fn sensitivity_matches_the_analytic_derivative() {
        // H = p0 sigma_x: dX/dp0 = -i t1 sigma_x X
        let obj = Objective::new(
            ket0(),
            nd::Array2::zeros((2, 2)),
            vec![ControlTerm::new(sx(), |_, p: &[Dual]| p[0].clone())],
            ket1(),
        ).unwrap();
        let spec = ControlParams::new()
            .with("x", PulseSpec::unbounded(vec![0.8]).unwrap())
            .unwrap();
        let gen = Generator::new(&obj, &spec).unwrap();
        let t1 = 0.9;
        let sol = evolve_block(
            &gen, &ket0_block(), t1, &[0.8], true, &tight()).unwrap();
        assert_eq!(sol.sens.len(), 1);
        let expected = sx().dot(&sol.state)
            .mapv(|v| C64::new(0.0, -t1) * v);
        for i in 0..2 {
            assert_abs_diff_eq!(
                sol.sens[0][[i, 0]].re, expected[[i, 0]].re, epsilon = 1e-7);
            assert_abs_diff_eq!(
                sol.sens[0][[i, 0]].im, expected[[i, 0]].im, epsilon = 1e-7);
        }
    }

    #[test]
    fn lindblad_decay_matches_the_exponential() {
        let gamma: f64 = 0.35;
        let sm = nd::array![
            [C64::new(0.0, 0.0), C64::new(gamma.sqrt(), 0.0)],
            [C64::new(0.0, 0.0), C64::new(0.0, 0.0)],
        ];
        let h0: nd::Array2<C64> = nd::Array2::zeros((2, 2));
        let drift = op::liouvillian(&h0, &[sm]).unwrap();
        let rho1 = nd::array![
            [C64::new(0.0, 0.0), C64::new(0.0, 0.0)],
            [C64::new(0.0, 0.0), C64::new(1.0, 0.0)],
        ];
        let rho0 = nd::array![
            [C64::new(1.0, 0.0), C64::new(0.0, 0.0)],
            [C64::new(0.0, 0.0), C64::new(0.0, 0.0)],
        ];
        let obj = Objective::new(
            State::Operator(rho1.clone()), drift, vec![],
            State::Operator(rho0),
        ).unwrap();
        let gen = Generator::new(&obj, &ControlParams::new()).unwrap();
        let x0 = op::vec_op(&rho1).insert_axis(nd::Axis(1));
        let t1 = 1.3;
        let sol = evolve_block(&gen, &x0, t1, &[], false, &tight()).unwrap();
        // row-stacked vec(rho): indices 0 and 3 are the populations
        let decayed = (-gamma * t1).exp();
        assert_abs_diff_eq!(sol.state[[3, 0]].re, decayed, epsilon = 1e-8);
        assert_abs_diff_eq!(
            sol.state[[0, 0]].re, 1.0 - decayed, epsilon = 1e-8);
        assert_abs_diff_eq!(sol.state[[1, 0]].re, 0.0, epsilon = 1e-10);
    }

    #[test]
    fn step_budget_is_enforced() {
        let gen = drift_only(sx());
        let opts = IntegratorOptions {
            max_steps: 3,
            ..Default::default()
        };
        let res = evolve_block(&gen, &ket0_block(), 50.0, &[], false, &opts);
        match res {
            Err(e @ QocError::StepBudgetExhausted { max_steps: 3, .. }) =>
                assert!(e.is_numerical()),
            other => panic!("expected step budget error, got {:?}",
                other.map(|s| s.steps)),
        }
    }

    #[test]
    fn non_finite_coefficients_surface_as_errors() {
        let obj = Objective::new(
            ket0(),
            nd::Array2::zeros((2, 2)),
            vec![ControlTerm::new(
                sx(), |_, _: &[Dual]| Dual::constant(f64::NAN))],
            ket1(),
        ).unwrap();
        let spec = ControlParams::new()
            .with("x", PulseSpec::unbounded(vec![0.5]).unwrap())
            .unwrap();
        let gen = Generator::new(&obj, &spec).unwrap();
        let res = evolve_block(
            &gen, &ket0_block(), 1.0, &[0.5], false,
            &IntegratorOptions::default());
        let e = res.err().unwrap();
        assert!(e.is_numerical(), "unexpected error class: {:?}", e);
    }

    #[test]
    fn tighter_tolerances_take_more_steps() {
        let gen = drift_only(sx());
        let loose = IntegratorOptions {
            rtol: 1e-4, atol: 1e-4, ..Default::default() };
        let strict = IntegratorOptions {
            rtol: 1e-9, atol: 1e-9, ..Default::default() };
        let a = evolve_block(
            &gen, &ket0_block(), 6.0, &[], false, &loose).unwrap();
        let b = evolve_block(
            &gen, &ket0_block(), 6.0, &[], false, &strict).unwrap();
        assert!(b.steps > a.steps);
    }

    #[test]
    fn option_validation_rejects_bad_settings() {
        assert!(IntegratorOptions::default().validate().is_ok());
        let bad = IntegratorOptions { rtol: 0.0, ..Default::default() };
        assert!(bad.validate().is_err());
        let bad = IntegratorOptions { atol: f64::NAN, ..Default::default() };
        assert!(bad.validate().is_err());
        let bad = IntegratorOptions { max_steps: 0, ..Default::default() };
        assert!(bad.validate().is_err());
    }
}
