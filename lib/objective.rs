//! Optimization objective: initial state or operator, generator terms, and
//! the target to steer toward.

use std::rc::Rc;
use ndarray::{ self as nd };
use ndarray_linalg::SVD;
use num_complex::Complex64 as C64;
use crate::{
    dual::Dual,
    error::{ QocError, QocResult },
    generator::GeneratorKind,
    op,
};

/// Ket or operator payload for initial and target states.
#[derive(Clone, Debug, PartialEq)]
pub enum State {
    /// Pure state vector.
    Ket(nd::Array1<C64>),
    /// Density matrix or propagator-style operator.
    Operator(nd::Array2<C64>),
}

impl From<nd::Array1<C64>> for State {
    fn from(a: nd::Array1<C64>) -> Self { Self::Ket(a) }
}

impl From<nd::Array2<C64>> for State {
    fn from(a: nd::Array2<C64>) -> Self { Self::Operator(a) }
}

impl State {
    /// Hilbert-space dimension (row count for operators).
    pub fn dim(&self) -> usize {
        match self {
            Self::Ket(v) => v.len(),
            Self::Operator(m) => m.nrows(),
        }
    }

    /// `true` for the `Ket` variant.
    pub fn is_ket(&self) -> bool { matches!(self, Self::Ket(_)) }

    /// `true` when both are kets or both are operators.
    pub fn same_kind(&self, other: &Self) -> bool {
        self.is_ket() == other.is_ket()
    }

    /// l2 norm for kets, trace norm (sum of singular values) for operators.
    pub fn norm(&self) -> QocResult<f64> {
        match self {
            Self::Ket(v) => {
                Ok(v.iter().map(|z| z.norm_sqr()).sum::<f64>().sqrt())
            },
            Self::Operator(m) => {
                let (_, sv, _) = m.svd(false, false)?;
                Ok(sv.sum())
            },
        }
    }

    // Column-block representation used by the evolution engine: kets are a
    // single column, operators evolve column-per-column under a Hamiltonian
    // and as a single vectorized column under a Liouvillian.
    pub(crate) fn to_block(&self, kind: GeneratorKind)
        -> QocResult<nd::Array2<C64>>
    {
        match (self, kind) {
            (Self::Ket(v), GeneratorKind::Hamiltonian) =>
                Ok(v.clone().insert_axis(nd::Axis(1))),
            (Self::Ket(_), GeneratorKind::Liouvillian) =>
                Err(QocError::DimensionMismatch(
                    "a ket cannot evolve under a superoperator generator"
                        .into())),
            (Self::Operator(m), GeneratorKind::Hamiltonian) =>
                Ok(m.clone()),
            (Self::Operator(m), GeneratorKind::Liouvillian) =>
                Ok(op::vec_op(m).insert_axis(nd::Axis(1))),
        }
    }

    // Inverse of `to_block`; `like` supplies the kind and dimension.
    pub(crate) fn from_block(
        block: &nd::Array2<C64>,
        like: &State,
        kind: GeneratorKind,
    ) -> QocResult<State>
    {
        match (like, kind) {
            (Self::Ket(_), GeneratorKind::Hamiltonian) =>
                Ok(State::Ket(block.column(0).to_owned())),
            (Self::Ket(_), GeneratorKind::Liouvillian) =>
                Err(QocError::DimensionMismatch(
                    "a ket cannot evolve under a superoperator generator"
                        .into())),
            (Self::Operator(_), GeneratorKind::Hamiltonian) =>
                Ok(State::Operator(block.clone())),
            (Self::Operator(m), GeneratorKind::Liouvillian) =>
                Ok(State::Operator(
                    op::unvec_op(&block.column(0), m.nrows())?)),
        }
    }
}

/// Heap-allocated coefficient function of time and a parameter slice.
pub type Coeff<'a> = Rc<dyn Fn(f64, &[Dual]) -> Dual + 'a>;

/// One control term: an operator scaled by a coefficient function of time and
/// this control's slice of the flat parameter vector.
#[derive(Clone)]
pub struct ControlTerm<'a> {
    pub(crate) op: nd::Array2<C64>,
    pub(crate) coeff: Coeff<'a>,
}

impl<'a> std::fmt::Debug for ControlTerm<'a> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ControlTerm {{ op: {:?}, coeff: Fn(..) }}", self.op)
    }
}

impl<'a> ControlTerm<'a> {
    /// Create from an operator and a coefficient function.
    pub fn new<F>(op: nd::Array2<C64>, coeff: F) -> Self
    where F: Fn(f64, &[Dual]) -> Dual + 'a
    {
        Self { op, coeff: Rc::new(coeff) }
    }

    /// Create from an operator and a pre-wrapped coefficient.
    pub fn from_coeff(op: nd::Array2<C64>, coeff: Coeff<'a>) -> Self {
        Self { op, coeff }
    }

    /// The control operator.
    pub fn op(&self) -> &nd::Array2<C64> { &self.op }
}

/// Initial state, drift plus control terms, and target state.
///
/// Immutable once constructed; all dimension checks happen here so later
/// stages can assume a consistent problem.
#[derive(Debug)]
pub struct Objective<'a> {
    pub(crate) initial: State,
    pub(crate) drift: nd::Array2<C64>,
    pub(crate) controls: Vec<ControlTerm<'a>>,
    pub(crate) target: State,
    pub(crate) kind: GeneratorKind,
}

impl<'a> Objective<'a> {
    /// Create and validate.
    ///
    /// The drift must be square and either match the state dimension
    /// (Hamiltonian) or its square (Liouvillian acting on vectorized density
    /// matrices); every control operator must match the drift; initial and
    /// target must be the same kind and dimension.
    pub fn new(
        initial: State,
        drift: nd::Array2<C64>,
        controls: Vec<ControlTerm<'a>>,
        target: State,
    ) -> QocResult<Self>
    {
        let n = op::square_dim(&drift)?;
        if let State::Operator(m) = &initial { op::square_dim(m)?; }
        if let State::Operator(m) = &target { op::square_dim(m)?; }
        if !initial.same_kind(&target) {
            return Err(QocError::StateKindMismatch);
        }
        if initial.dim() != target.dim() {
            return Err(QocError::DimensionMismatch(format!(
                "initial dimension {} vs target dimension {}",
                initial.dim(), target.dim(),
            )));
        }
        let kind = GeneratorKind::classify(n, initial.dim())?;
        if kind == GeneratorKind::Liouvillian && initial.is_ket() {
            return Err(QocError::DimensionMismatch(
                "a ket cannot evolve under a superoperator generator".into()));
        }
        for term in controls.iter() {
            if term.op.dim() != drift.dim() {
                return Err(QocError::DimensionMismatch(format!(
                    "control operator is {}x{}, drift is {}x{}",
                    term.op.nrows(), term.op.ncols(), n, n,
                )));
            }
        }
        Ok(Self { initial, drift, controls, target, kind })
    }

    /// Initial state.
    pub fn initial(&self) -> &State { &self.initial }

    /// Parameter-free drift term.
    pub fn drift(&self) -> &nd::Array2<C64> { &self.drift }

    /// Control terms in parameter-layout order.
    pub fn controls(&self) -> &[ControlTerm<'a>] { &self.controls }

    /// Target state.
    pub fn target(&self) -> &State { &self.target }

    /// Closed- versus open-system classification.
    pub fn kind(&self) -> GeneratorKind { self.kind }

    /// Generator matrix dimension.
    pub fn generator_dim(&self) -> usize { self.drift.nrows() }
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;
    use super::*;

    fn ket0() -> State {
        State::Ket(nd::array![C64::new(1.0, 0.0), C64::new(0.0, 0.0)])
    }

    fn ket1() -> State {
        State::Ket(nd::array![C64::new(0.0, 0.0), C64::new(1.0, 0.0)])
    }

    fn sz() -> nd::Array2<C64> {
        nd::array![
            [C64::new(1.0, 0.0), C64::new(0.0, 0.0)],
            [C64::new(0.0, 0.0), C64::new(-1.0, 0.0)],
        ]
    }

    #[test]
    fn ket_norm_is_l2() {
        let s = State::Ket(nd::array![C64::new(3.0, 0.0), C64::new(0.0, 4.0)]);
        assert_abs_diff_eq!(s.norm().unwrap(), 5.0, epsilon = 1e-12);
    }

    #[test]
    fn operator_norm_is_trace_norm() {
        let m = nd::array![
            [C64::new(3.0, 0.0), C64::new(0.0, 0.0)],
            [C64::new(0.0, 0.0), C64::new(-4.0, 0.0)],
        ];
        let s = State::Operator(m);
        assert_abs_diff_eq!(s.norm().unwrap(), 7.0, epsilon = 1e-9);
    }

    #[test]
    fn plain_drift_classifies_closed() {
        let obj = Objective::new(ket0(), sz(), vec![], ket1()).unwrap();
        assert_eq!(obj.kind(), GeneratorKind::Hamiltonian);
    }

    #[test]
    fn superoperator_drift_classifies_open() {
        let lv = crate::op::liouvillian(&sz(), &[]).unwrap();
        let rho0 =
            State::Operator(nd::Array2::<C64>::eye(2).mapv(|x| 0.5 * x));
        let rho1 =
            State::Operator(nd::Array2::<C64>::eye(2).mapv(|x| 0.5 * x));
        let obj = Objective::new(rho0, lv, vec![], rho1).unwrap();
        assert_eq!(obj.kind(), GeneratorKind::Liouvillian);
    }

    #[test]
    fn kets_cannot_evolve_under_superoperators() {
        let lv = crate::op::liouvillian(&sz(), &[]).unwrap();
        let res = Objective::new(ket0(), lv, vec![], ket1());
        assert!(res.is_err());
    }

    #[test]
    fn mismatches_are_rejected() {
        let drift3: nd::Array2<C64> = nd::Array2::zeros((3, 3));
        assert!(Objective::new(ket0(), drift3, vec![], ket1()).is_err());
        let rho = State::Operator(nd::Array2::eye(2));
        assert!(matches!(
            Objective::new(ket0(), sz(), vec![], rho),
            Err(QocError::StateKindMismatch),
        ));
        let wide: nd::Array2<C64> = nd::Array2::zeros((2, 3));
        assert!(Objective::new(ket0(), wide, vec![], ket1()).is_err());
        let small = ControlTerm::new(
            nd::Array2::zeros((3, 3)),
            |_, _| Dual::constant(0.0),
        );
        assert!(Objective::new(ket0(), sz(), vec![small], ket1()).is_err());
    }

    #[test]
    fn block_round_trip_ket() {
        let s = ket1();
        let block = s.to_block(GeneratorKind::Hamiltonian).unwrap();
        assert_eq!(block.dim(), (2, 1));
        let back =
            State::from_block(&block, &s, GeneratorKind::Hamiltonian).unwrap();
        assert_eq!(back, s);
    }

    #[test]
    fn block_round_trip_vectorized() {
        let m = nd::array![
            [C64::new(0.75, 0.0), C64::new(0.1, 0.2)],
            [C64::new(0.1, -0.2), C64::new(0.25, 0.0)],
        ];
        let s = State::Operator(m);
        let block = s.to_block(GeneratorKind::Liouvillian).unwrap();
        assert_eq!(block.dim(), (4, 1));
        let back =
            State::from_block(&block, &s, GeneratorKind::Liouvillian).unwrap();
        assert_eq!(back, s);
    }
}
