//! Infidelity objective and its gradient.
//!
//! [`PulseGrad`] compiles an [`Objective`], a time grid, and a control
//! layout into a pair of pure functions of the flat parameter vector,
//! [`infidelity`][PulseGrad::infidelity] and
//! [`gradient`][PulseGrad::gradient], built to be called without bound by an
//! external minimizer. Every call re-solves the evolution from scratch at
//! the supplied parameters; nothing is cached between calls, so evaluations
//! at equal parameters return bit-identical values and the session can be
//! shared behind an immutable reference.
//!
//! The target normalization `1 / ||target||` is fixed once at setup. All
//! three fidelity conventions are evaluated on column blocks with the
//! Frobenius inner product, which reduces to the usual ket overlap for
//! single columns and is preserved by row-stacking vectorization.

use std::str::FromStr;
use ndarray as nd;
use num_complex::Complex64 as C64;
use tracing::debug;
use crate::{
    dual::CDual,
    error::{ QocError, QocResult },
    evolve::{ self, IntegratorOptions },
    generator::{ Generator, GeneratorKind },
    grid::TimeGrid,
    objective::{ Objective, State },
    op,
    pulse::{ ControlParams, TimeVar },
};

/// Fidelity conventions for the error functional.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FidKind {
    /// Trace-difference form `nf/2 * ||X - target||^2`; the only convention
    /// meaningful for density matrices.
    TraceDiff,
    /// One minus the overlap magnitude; insensitive to global phase.
    Psu,
    /// One minus the overlap real part; global phase counts.
    Su,
}

impl FidKind {
    /// Convention used when none is configured: [`TraceDiff`][Self::TraceDiff]
    /// for superoperator generators, [`Psu`][Self::Psu] otherwise.
    pub fn default_for(kind: GeneratorKind) -> Self {
        match kind {
            GeneratorKind::Liouvillian => Self::TraceDiff,
            GeneratorKind::Hamiltonian => Self::Psu,
        }
    }
}

impl FromStr for FidKind {
    type Err = QocError;

    /// Case-insensitive parse of `TRACEDIFF`, `PSU`, or `SU`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "TRACEDIFF" => Ok(Self::TraceDiff),
            "PSU" => Ok(Self::Psu),
            "SU" => Ok(Self::Su),
            _ => Err(QocError::UnknownFidKind(s.into())),
        }
    }
}

impl std::fmt::Display for FidKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TraceDiff => write!(f, "TRACEDIFF"),
            Self::Psu => write!(f, "PSU"),
            Self::Su => write!(f, "SU"),
        }
    }
}

/// Session options.
#[derive(Clone, Debug, Default)]
pub struct Options {
    /// Fidelity convention; defaults per the generator classification.
    pub fid_kind: Option<FidKind>,
    /// Present when the total evolution time is itself an optimization
    /// parameter, appended after all control parameters.
    pub var_time: Option<TimeVar>,
    /// Integrator tolerances and step control.
    pub integrator: IntegratorOptions,
}

/// Compiled pulse-optimization session.
///
/// Construction validates the full problem and fixes the parameter layout;
/// afterwards [`infidelity`][Self::infidelity] and
/// [`gradient`][Self::gradient] accept only vectors of exactly
/// [`n_params`][Self::n_params] entries. Numerical failures inside a solve
/// come back as errors, never as substituted objective values.
#[derive(Debug)]
pub struct PulseGrad<'a> {
    generator: Generator<'a>,
    initial_block: nd::Array2<C64>,
    target: State,
    target_block: nd::Array2<C64>,
    fid_kind: FidKind,
    norm_fac: f64,
    evo_time: f64,
    var_time: Option<TimeVar>,
    guess: nd::Array1<f64>,
    bounds: Vec<(f64, f64)>,
    n_params: usize,
    integrator: IntegratorOptions,
}

impl<'a> PulseGrad<'a> {
    /// Compile a session.
    ///
    /// The generator is bound to the control layout here, the target
    /// normalization is computed once, and the fidelity convention falls
    /// back to [`FidKind::default_for`] when unset. The grid supplies the
    /// evolution time; a `var_time` option overrides it with a trailing
    /// parameter at call time.
    pub fn new(
        objective: &Objective<'a>,
        grid: &TimeGrid,
        controls: &ControlParams,
        options: Options,
    ) -> QocResult<Self>
    {
        options.integrator.validate()?;
        if let Some(tv) = &options.var_time { tv.validate()?; }
        let generator = Generator::new(objective, controls)?;
        let kind = generator.kind();
        let nrm = objective.target().norm()?;
        if nrm == 0.0 {
            return Err(QocError::ZeroNormTarget);
        }
        let fid_kind = options.fid_kind
            .unwrap_or_else(|| FidKind::default_for(kind));
        let initial_block = objective.initial().to_block(kind)?;
        let target_block = objective.target().to_block(kind)?;
        let mut guess = controls.guess_vector().to_vec();
        let mut bounds = controls.bounds_vector();
        if let Some(tv) = &options.var_time {
            guess.push(tv.guess);
            bounds.push(tv.bounds);
        }
        let n_params = generator.n_params()
            + usize::from(options.var_time.is_some());
        debug!(
            "session compiled: {} control terms, {} parameters, \
             fid_kind = {}, {:?} generator",
            controls.len(), n_params, fid_kind, kind,
        );
        Ok(Self {
            generator,
            initial_block,
            target: objective.target().clone(),
            target_block,
            fid_kind,
            norm_fac: nrm.recip(),
            evo_time: grid.evo_time(),
            var_time: options.var_time,
            guess: nd::Array1::from_vec(guess),
            bounds,
            n_params,
            integrator: options.integrator,
        })
    }

    /// Infidelity at one parameter vector.
    pub fn infidelity(&self, params: &[f64]) -> QocResult<f64> {
        self.check_params(params)?;
        let (ctrl, t1) = self.split_end(params)?;
        let sol = evolve::evolve_block(
            &self.generator, &self.initial_block, t1, ctrl, false,
            &self.integrator)?;
        Ok(self.error_of(&sol.state))
    }

    /// Gradient of the infidelity at one parameter vector, in layout order
    /// with the end-time component last when the time is free.
    ///
    /// Derivatives come from forward sensitivities solved alongside the
    /// state, not from finite differences of
    /// [`infidelity`][Self::infidelity].
    pub fn gradient(&self, params: &[f64]) -> QocResult<nd::Array1<f64>> {
        self.check_params(params)?;
        let (ctrl, t1) = self.split_end(params)?;
        let sol = evolve::evolve_block(
            &self.generator, &self.initial_block, t1, ctrl, true,
            &self.integrator)?;
        let mut sens: Vec<&nd::Array2<C64>> = sol.sens.iter().collect();
        if self.var_time.is_some() {
            sens.push(&sol.slope);
        }
        Ok(self.error_grad(&sol.state, &sens))
    }

    /// Final evolved state or operator at one parameter vector.
    pub fn final_state(&self, params: &[f64]) -> QocResult<State> {
        self.check_params(params)?;
        let (ctrl, t1) = self.split_end(params)?;
        let sol = evolve::evolve_block(
            &self.generator, &self.initial_block, t1, ctrl, false,
            &self.integrator)?;
        State::from_block(&sol.state, &self.target, self.generator.kind())
    }

    /// Starting parameter vector in layout order, the free evolution time
    /// last when present.
    pub fn guess_params(&self) -> nd::Array1<f64> { self.guess.clone() }

    /// `(lo, hi)` bounds matching [`guess_params`][Self::guess_params].
    pub fn bounds(&self) -> &[(f64, f64)] { &self.bounds }

    /// Expected parameter vector length.
    pub fn n_params(&self) -> usize { self.n_params }

    /// Fidelity convention in effect.
    pub fn fid_kind(&self) -> FidKind { self.fid_kind }

    /// Generator classification.
    pub fn kind(&self) -> GeneratorKind { self.generator.kind() }

    /// Evolution time used when the end time is not a parameter.
    pub fn evo_time(&self) -> f64 { self.evo_time }

    fn check_params(&self, params: &[f64]) -> QocResult<()> {
        if params.len() != self.n_params {
            return Err(QocError::ParamCount {
                expected: self.n_params,
                got: params.len(),
            });
        }
        Ok(())
    }

    // Split off the end time: the trailing parameter when the time is free,
    // the grid's evolution time otherwise.
    fn split_end<'p>(&self, params: &'p [f64]) -> QocResult<(&'p [f64], f64)> {
        if self.var_time.is_some() {
            let t1 = params[params.len() - 1];
            if !t1.is_finite() || t1 <= 0.0 {
                return Err(QocError::NonPositiveEvoTime(t1));
            }
            Ok((&params[..params.len() - 1], t1))
        } else {
            Ok((params, self.evo_time))
        }
    }

    fn error_of(&self, x: &nd::Array2<C64>) -> f64 {
        match self.fid_kind {
            FidKind::TraceDiff => {
                let d = x - &self.target_block;
                0.5 * self.norm_fac
                    * d.iter().map(|v| v.norm_sqr()).sum::<f64>()
            },
            FidKind::Psu => {
                let g = self.norm_fac
                    * op::frob_inner(&self.target_block, x);
                1.0 - g.norm()
            },
            FidKind::Su => {
                let g = self.norm_fac
                    * op::frob_inner(&self.target_block, x);
                1.0 - g.re
            },
        }
    }

    fn error_grad(
        &self,
        x: &nd::Array2<C64>,
        sens: &[&nd::Array2<C64>],
    ) -> nd::Array1<f64>
    {
        match self.fid_kind {
            FidKind::TraceDiff => {
                let d = x - &self.target_block;
                sens.iter()
                    .map(|s| self.norm_fac * op::frob_inner(&d, *s).re)
                    .collect()
            },
            FidKind::Psu => self.overlap_dual(x, sens).abs().tan.mapv(|dg| -dg),
            FidKind::Su => self.overlap_dual(x, sens).re().tan.mapv(|dg| -dg),
        }
    }

    // Normalized overlap with the target as a complex dual over the
    // parameter directions.
    fn overlap_dual(
        &self,
        x: &nd::Array2<C64>,
        sens: &[&nd::Array2<C64>],
    ) -> CDual
    {
        let val = self.norm_fac * op::frob_inner(&self.target_block, x);
        let tan: nd::Array1<C64> = sens.iter()
            .map(|s| self.norm_fac * op::frob_inner(&self.target_block, *s))
            .collect();
        CDual::new(val, tan)
    }
}
