//! Operator-algebra helpers shared by the generator, the engine, and callers
//! assembling open-system problems.
//!
//! Superoperators follow the row-stacking convention: `vec(rho)` concatenates
//! the rows of `rho`, so `A rho B` maps to `(A ⊗ B^T) vec(rho)`. All helpers
//! here use that convention consistently; superoperators built elsewhere with
//! column stacking are transposed relative to these.

use ndarray::{ self as nd, linalg::kron };
use num_complex::Complex64 as C64;
use num_traits::Zero;
use crate::error::{ QocError, QocResult };

/// Conjugate transpose.
pub fn dagger<S>(A: &nd::ArrayBase<S, nd::Ix2>) -> nd::Array2<C64>
where S: nd::Data<Elem = C64>
{
    A.t().mapv(|a| a.conj())
}

/// Sum of the main diagonal.
pub fn trace<S>(A: &nd::ArrayBase<S, nd::Ix2>) -> C64
where S: nd::Data<Elem = C64>
{
    A.diag().iter().sum()
}

/// Row-stacking vectorization.
pub fn vec_op<S>(A: &nd::ArrayBase<S, nd::Ix2>) -> nd::Array1<C64>
where S: nd::Data<Elem = C64>
{
    A.iter().copied().collect()
}

/// Inverse of [`vec_op`] for an `n x n` operator.
pub fn unvec_op<S>(v: &nd::ArrayBase<S, nd::Ix1>, n: usize)
    -> QocResult<nd::Array2<C64>>
where S: nd::Data<Elem = C64>
{
    let a = v.to_owned().into_shape((n, n))?;
    Ok(a)
}

/// Commutator superoperator `-i (H ⊗ 1 - 1 ⊗ H^T)` for a Hamiltonian `H`.
pub fn hamiltonian_superop<S>(H: &nd::ArrayBase<S, nd::Ix2>)
    -> QocResult<nd::Array2<C64>>
where S: nd::Data<Elem = C64>
{
    let n = square_dim(H)?;
    let eye: nd::Array2<C64> = nd::Array2::eye(n);
    let m = kron(&H.view(), &eye) - kron(&eye, &H.t());
    Ok(m.mapv(|x| C64::new(0.0, -1.0) * x))
}

/// Dissipator superoperator
/// `L ⊗ conj(L) - (L†L ⊗ 1)/2 - (1 ⊗ (L†L)^T)/2`
/// for a collapse operator `L`.
pub fn dissipator_superop<S>(L: &nd::ArrayBase<S, nd::Ix2>)
    -> QocResult<nd::Array2<C64>>
where S: nd::Data<Elem = C64>
{
    let n = square_dim(L)?;
    let eye: nd::Array2<C64> = nd::Array2::eye(n);
    let ld = dagger(L);
    let ldl = ld.dot(L);
    let m =
        kron(&L.view(), &L.mapv(|x| x.conj()))
        - kron(&ldl, &eye).mapv(|x| 0.5 * x)
        - kron(&eye, &ldl.t()).mapv(|x| 0.5 * x);
    Ok(m)
}

/// Full Liouvillian for a Hamiltonian and a set of collapse operators, each
/// entering at unit rate (scale the operators to fold rates in).
pub fn liouvillian<S>(
    H: &nd::ArrayBase<S, nd::Ix2>,
    collapse: &[nd::Array2<C64>],
) -> QocResult<nd::Array2<C64>>
where S: nd::Data<Elem = C64>
{
    let n = square_dim(H)?;
    let mut m = hamiltonian_superop(H)?;
    for L in collapse.iter() {
        if square_dim(L)? != n {
            return Err(QocError::DimensionMismatch(format!(
                "collapse operator is {}x{}, Hamiltonian is {}x{}",
                L.nrows(), L.ncols(), n, n,
            )));
        }
        m = m + dissipator_superop(L)?;
    }
    Ok(m)
}

pub(crate) fn square_dim<A, S>(M: &nd::ArrayBase<S, nd::Ix2>)
    -> QocResult<usize>
where S: nd::Data<Elem = A>
{
    let (rows, cols) = M.dim();
    if rows == cols {
        Ok(rows)
    } else {
        Err(QocError::NonSquareOperator { rows, cols })
    }
}

/// Frobenius inner product `tr(A† B)`, evaluated elementwise.
pub fn frob_inner<SA, SB>(
    A: &nd::ArrayBase<SA, nd::Ix2>,
    B: &nd::ArrayBase<SB, nd::Ix2>,
) -> C64
where
    SA: nd::Data<Elem = C64>,
    SB: nd::Data<Elem = C64>,
{
    let mut acc = C64::zero();
    nd::Zip::from(A).and(B).for_each(|a, b| { acc += a.conj() * *b; });
    acc
}
