//! Piecewise assembly of the time-dependent generator: a parameter-free
//! drift plus a sum of control terms, each a fixed operator weighted by a
//! coefficient function of time and a slice of the flat parameter vector.
//!
//! Slices are assigned once, when the generator is bound to a control-
//! parameter layout: the k-th control term sees exactly
//! `params[offset .. offset + len]`, with `offset` accumulated over the
//! controls that precede it. The slice range is stored explicitly per term
//! rather than captured in a closure, so a term reused in another session
//! cannot alias a stale layout.

use ndarray as nd;
use num_complex::Complex64 as C64;
use crate::{
    dual::{ self, Dual },
    error::{ QocError, QocResult },
    objective::{ Coeff, Objective },
    pulse::ControlParams,
};

/// Closed- versus open-system classification of a generator matrix.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum GeneratorKind {
    /// Plain operator acting on kets or operator columns; evolution follows
    /// the Schrödinger form `dX/dt = -i G X`.
    Hamiltonian,
    /// Superoperator acting on row-stacked density matrices; evolution
    /// follows the Lindblad form `d vec(rho)/dt = G vec(rho)`.
    Liouvillian,
}

impl GeneratorKind {
    /// Classify a square generator by dimension: one matching the state
    /// dimension is a Hamiltonian, one matching its square is a Liouvillian;
    /// anything else is a configuration error.
    pub fn classify(op_dim: usize, state_dim: usize) -> QocResult<Self> {
        if op_dim == state_dim {
            Ok(Self::Hamiltonian)
        } else if op_dim == state_dim * state_dim {
            Ok(Self::Liouvillian)
        } else {
            Err(QocError::UnclassifiableGenerator { op_dim, state_dim })
        }
    }

    /// `true` for the open-system (superoperator) case.
    pub fn is_superop(&self) -> bool { matches!(self, Self::Liouvillian) }

    // Scale folded into the equation of motion, dz/dt = phase * G(t, p) z.
    pub(crate) fn phase(&self) -> C64 {
        match self {
            Self::Hamiltonian => -C64::i(),
            Self::Liouvillian => C64::from(1.0),
        }
    }
}

// One control term bound to its range of the flat parameter vector.
pub(crate) struct Term<'a> {
    pub(crate) op: nd::Array2<C64>,
    pub(crate) coeff: Coeff<'a>,
    pub(crate) offset: usize,
    pub(crate) len: usize,
}

// Generator matrix and per-term coefficient duals at one instant; each dual's
// tangent is in its own term's slice-local basis.
pub(crate) struct GenEval {
    pub(crate) value: nd::Array2<C64>,
    pub(crate) coeffs: Vec<Dual>,
}

/// Time- and parameter-dependent generator, built once per optimization run
/// and evaluable as `generator(t, params) -> operator`.
pub struct Generator<'a> {
    drift: nd::Array2<C64>,
    terms: Vec<Term<'a>>,
    n_params: usize,
    kind: GeneratorKind,
}

impl<'a> std::fmt::Debug for Generator<'a> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f,
            "Generator {{ dim: {}, kind: {:?}, terms: {}, n_params: {} }}",
            self.dim(), self.kind, self.terms.len(), self.n_params,
        )
    }
}

impl<'a> Generator<'a> {
    /// Bind an objective's drift and control terms to a parameter layout.
    ///
    /// Terms and specifications are paired in order and their counts must
    /// match; the pairing fixes each term's slice of the flat parameter
    /// vector. A drift-only objective (no controls) is degenerate but valid.
    pub fn new(objective: &Objective<'a>, params: &ControlParams)
        -> QocResult<Self>
    {
        if objective.controls().len() != params.len() {
            return Err(QocError::ControlCountMismatch {
                terms: objective.controls().len(),
                specs: params.len(),
            });
        }
        let mut offset: usize = 0;
        let mut terms: Vec<Term>
            = Vec::with_capacity(objective.controls().len());
        let iter = objective.controls().iter().zip(params.iter());
        for (term, (_, spec)) in iter {
            terms.push(Term {
                op: term.op().clone(),
                coeff: term.coeff.clone(),
                offset,
                len: spec.len(),
            });
            offset += spec.len();
        }
        Ok(Self {
            drift: objective.drift().clone(),
            terms,
            n_params: offset,
            kind: objective.kind(),
        })
    }

    /// Total number of control parameters routed to coefficient functions.
    pub fn n_params(&self) -> usize { self.n_params }

    /// Closed- versus open-system classification.
    pub fn kind(&self) -> GeneratorKind { self.kind }

    /// Generator matrix dimension.
    pub fn dim(&self) -> usize { self.drift.nrows() }

    /// Evaluate the generator matrix at one instant.
    pub fn at(&self, t: f64, params: &[f64]) -> QocResult<nd::Array2<C64>> {
        if params.len() != self.n_params {
            return Err(QocError::ParamCount {
                expected: self.n_params,
                got: params.len(),
            });
        }
        Ok(self.value_at(t, params))
    }

    // Evaluate without derivative seeding; `params` length is the caller's
    // responsibility.
    pub(crate) fn value_at(&self, t: f64, params: &[f64]) -> nd::Array2<C64> {
        let mut gen: nd::Array2<C64> = self.drift.clone();
        let mut c: Dual;
        for term in self.terms.iter() {
            let p = dual::constants(
                &params[term.offset .. term.offset + term.len]);
            c = (term.coeff)(t, &p);
            gen.scaled_add(C64::from(c.val), &term.op);
        }
        gen
    }

    // Evaluate with each term's coefficient seeded over its own slice.
    pub(crate) fn eval_at(&self, t: f64, params: &[f64]) -> GenEval {
        let mut gen: nd::Array2<C64> = self.drift.clone();
        let mut coeffs: Vec<Dual> = Vec::with_capacity(self.terms.len());
        for term in self.terms.iter() {
            let p = dual::seed(
                &params[term.offset .. term.offset + term.len]);
            let c = (term.coeff)(t, &p);
            gen.scaled_add(C64::from(c.val), &term.op);
            coeffs.push(c);
        }
        GenEval { value: gen, coeffs }
    }

    pub(crate) fn terms(&self) -> &[Term<'a>] { &self.terms }
}
