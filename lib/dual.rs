//! Forward-mode scalars.
//!
//! Control coefficients are written once against [`Dual`] and serve both
//! plain evaluation and derivative propagation: a dual carries a value
//! together with a tangent vector over some parameter slice. An empty tangent
//! marks a constant and broadcasts against any other operand, so numeric
//! literals mix freely with seeded parameters. [`CDual`] is the complex
//! counterpart used by the objective algebra; it hosts the zero-safe
//! magnitude rule.

use ndarray as nd;
use num_complex::Complex64 as C64;

/// Real value paired with a tangent vector.
#[derive(Clone, Debug, PartialEq)]
pub struct Dual {
    /// Primal value.
    pub val: f64,
    /// Tangent components; empty for a constant.
    pub tan: nd::Array1<f64>,
}

impl Dual {
    /// Create from explicit value and tangent.
    pub fn new(val: f64, tan: nd::Array1<f64>) -> Self { Self { val, tan } }

    /// Create a constant (empty tangent).
    pub fn constant(val: f64) -> Self {
        Self { val, tan: nd::Array1::zeros(0) }
    }

    fn chain(&self, val: f64, dval: f64) -> Self {
        Self { val, tan: self.tan.mapv(|t| dval * t) }
    }

    pub fn sin(&self) -> Self { self.chain(self.val.sin(), self.val.cos()) }

    pub fn cos(&self) -> Self { self.chain(self.val.cos(), -self.val.sin()) }

    pub fn exp(&self) -> Self {
        let e = self.val.exp();
        self.chain(e, e)
    }

    pub fn ln(&self) -> Self { self.chain(self.val.ln(), self.val.recip()) }

    pub fn sqrt(&self) -> Self {
        let r = self.val.sqrt();
        self.chain(r, 0.5 / r)
    }

    pub fn powi(&self, n: i32) -> Self {
        self.chain(self.val.powi(n), f64::from(n) * self.val.powi(n - 1))
    }

    pub fn powf(&self, p: f64) -> Self {
        self.chain(self.val.powf(p), p * self.val.powf(p - 1.0))
    }

    /// Absolute value with subderivative zero at the origin.
    pub fn abs(&self) -> Self {
        let d = if self.val == 0.0 { 0.0 } else { self.val.signum() };
        self.chain(self.val.abs(), d)
    }
}

impl From<f64> for Dual {
    fn from(val: f64) -> Self { Self::constant(val) }
}

/// Duals over a parameter slice, each carrying a unit tangent in the
/// slice-local basis.
pub fn seed(vals: &[f64]) -> Vec<Dual> {
    let m = vals.len();
    vals.iter().enumerate()
        .map(|(k, &v)| {
            let mut tan = nd::Array1::zeros(m);
            tan[k] = 1.0;
            Dual { val: v, tan }
        })
        .collect()
}

/// Duals over a parameter slice with no tangent dependence.
pub fn constants(vals: &[f64]) -> Vec<Dual> {
    vals.iter().map(|&v| Dual::constant(v)).collect()
}

// An empty tangent is a constant; broadcast it against the other operand.
// Differing non-empty lengths mean two different seeding bases were mixed in
// one expression, which violates the coefficient-function contract.
fn zip_tan<F>(a: &nd::Array1<f64>, b: &nd::Array1<f64>, f: F) -> nd::Array1<f64>
where F: Fn(f64, f64) -> f64
{
    match (a.len(), b.len()) {
        (0, _) => b.mapv(|y| f(0.0, y)),
        (_, 0) => a.mapv(|x| f(x, 0.0)),
        (na, nb) if na == nb =>
            nd::Zip::from(a).and(b).map_collect(|&x, &y| f(x, y)),
        (na, nb) => panic!("mismatched tangent lengths: {} vs {}", na, nb),
    }
}

fn dual_add(a: &Dual, b: &Dual) -> Dual {
    Dual { val: a.val + b.val, tan: zip_tan(&a.tan, &b.tan, |x, y| x + y) }
}

fn dual_sub(a: &Dual, b: &Dual) -> Dual {
    Dual { val: a.val - b.val, tan: zip_tan(&a.tan, &b.tan, |x, y| x - y) }
}

fn dual_mul(a: &Dual, b: &Dual) -> Dual {
    Dual {
        val: a.val * b.val,
        tan: zip_tan(&a.tan, &b.tan, |x, y| x * b.val + y * a.val),
    }
}

fn dual_div(a: &Dual, b: &Dual) -> Dual {
    Dual {
        val: a.val / b.val,
        tan: zip_tan(
            &a.tan, &b.tan,
            |x, y| (x * b.val - y * a.val) / (b.val * b.val),
        ),
    }
}

macro_rules! impl_dual_op {
    ($op:ident, $meth:ident, $core:ident) => {
        impl std::ops::$op<Dual> for Dual {
            type Output = Dual;
            fn $meth(self, rhs: Dual) -> Dual { $core(&self, &rhs) }
        }

        impl<'b> std::ops::$op<&'b Dual> for Dual {
            type Output = Dual;
            fn $meth(self, rhs: &'b Dual) -> Dual { $core(&self, rhs) }
        }

        impl<'a> std::ops::$op<Dual> for &'a Dual {
            type Output = Dual;
            fn $meth(self, rhs: Dual) -> Dual { $core(self, &rhs) }
        }

        impl<'a, 'b> std::ops::$op<&'b Dual> for &'a Dual {
            type Output = Dual;
            fn $meth(self, rhs: &'b Dual) -> Dual { $core(self, rhs) }
        }

        impl std::ops::$op<f64> for Dual {
            type Output = Dual;
            fn $meth(self, rhs: f64) -> Dual {
                $core(&self, &Dual::constant(rhs))
            }
        }

        impl<'a> std::ops::$op<f64> for &'a Dual {
            type Output = Dual;
            fn $meth(self, rhs: f64) -> Dual {
                $core(self, &Dual::constant(rhs))
            }
        }

        impl std::ops::$op<Dual> for f64 {
            type Output = Dual;
            fn $meth(self, rhs: Dual) -> Dual {
                $core(&Dual::constant(self), &rhs)
            }
        }

        impl<'b> std::ops::$op<&'b Dual> for f64 {
            type Output = Dual;
            fn $meth(self, rhs: &'b Dual) -> Dual {
                $core(&Dual::constant(self), rhs)
            }
        }
    };
}

impl_dual_op!(Add, add, dual_add);
impl_dual_op!(Sub, sub, dual_sub);
impl_dual_op!(Mul, mul, dual_mul);
impl_dual_op!(Div, div, dual_div);

impl std::ops::Neg for Dual {
    type Output = Dual;
    fn neg(self) -> Dual { Dual { val: -self.val, tan: self.tan.mapv(|t| -t) } }
}

impl<'a> std::ops::Neg for &'a Dual {
    type Output = Dual;
    fn neg(self) -> Dual { Dual { val: -self.val, tan: self.tan.mapv(|t| -t) } }
}

/// Complex value paired with a tangent vector.
#[derive(Clone, Debug, PartialEq)]
pub struct CDual {
    /// Primal value.
    pub val: C64,
    /// Tangent components.
    pub tan: nd::Array1<C64>,
}

impl CDual {
    /// Create from explicit value and tangent.
    pub fn new(val: C64, tan: nd::Array1<C64>) -> Self { Self { val, tan } }

    /// Real part, with tangents.
    pub fn re(&self) -> Dual {
        Dual { val: self.val.re, tan: self.tan.mapv(|t| t.re) }
    }

    /// Magnitude with a zero-safe derivative.
    ///
    /// The tangent along direction `t` is `Re(conj(x) t) / |x|`, except
    /// exactly at `|x| = 0` where it is taken to be zero: the derivative of
    /// the magnitude is discontinuous at the origin, and the subderivative
    /// keeps downstream gradients finite instead of propagating `0/0`.
    pub fn abs(&self) -> Dual {
        let a = self.val.norm();
        let tan =
            if a == 0.0 {
                nd::Array1::zeros(self.tan.len())
            } else {
                self.tan.mapv(|t| (self.val.conj() * t).re / a)
            };
        Dual { val: a, tan }
    }
}

impl std::ops::Mul<f64> for CDual {
    type Output = CDual;
    fn mul(self, rhs: f64) -> CDual {
        CDual { val: self.val * rhs, tan: self.tan.mapv(|t| t * rhs) }
    }
}

impl<'a> std::ops::Mul<f64> for &'a CDual {
    type Output = CDual;
    fn mul(self, rhs: f64) -> CDual {
        CDual { val: self.val * rhs, tan: self.tan.mapv(|t| t * rhs) }
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;
    use super::*;

    #[test]
    fn sinusoid_chain_rule() {
        // c(p) = p0 sin(p1 t + p2) at t = 0.7
        let t = 0.7;
        let p = seed(&[1.25, 2.0, 0.3]);
        let c = &p[0] * (&p[1] * t + &p[2]).sin();
        let phase: f64 = 2.0 * t + 0.3;
        assert_abs_diff_eq!(c.val, 1.25 * phase.sin(), epsilon = 1e-12);
        assert_abs_diff_eq!(c.tan[0], phase.sin(), epsilon = 1e-12);
        assert_abs_diff_eq!(c.tan[1], 1.25 * t * phase.cos(), epsilon = 1e-12);
        assert_abs_diff_eq!(c.tan[2], 1.25 * phase.cos(), epsilon = 1e-12);
    }

    #[test]
    fn quotient_rule() {
        let p = seed(&[3.0, 2.0]);
        let q = &p[0] / &p[1];
        assert_abs_diff_eq!(q.val, 1.5, epsilon = 1e-12);
        assert_abs_diff_eq!(q.tan[0], 0.5, epsilon = 1e-12);
        assert_abs_diff_eq!(q.tan[1], -0.75, epsilon = 1e-12);
    }

    #[test]
    fn constants_broadcast() {
        let p = seed(&[2.0]);
        let c = (&p[0] + 1.0) * Dual::constant(3.0) - 0.5;
        assert_abs_diff_eq!(c.val, 8.5, epsilon = 1e-12);
        assert_eq!(c.tan.len(), 1);
        assert_abs_diff_eq!(c.tan[0], 3.0, epsilon = 1e-12);
        let k = Dual::constant(4.0).exp();
        assert_eq!(k.tan.len(), 0);
    }

    #[test]
    fn unary_rules() {
        let p = seed(&[0.8]);
        let e = p[0].exp();
        assert_abs_diff_eq!(e.tan[0], 0.8_f64.exp(), epsilon = 1e-12);
        let r = p[0].sqrt();
        assert_abs_diff_eq!(r.tan[0], 0.5 / 0.8_f64.sqrt(), epsilon = 1e-12);
        let w = p[0].powi(3);
        assert_abs_diff_eq!(w.tan[0], 3.0 * 0.8_f64.powi(2), epsilon = 1e-12);
        let z = Dual::new(0.0, nd::array![1.0]).abs();
        assert_eq!(z.tan[0], 0.0);
    }

    #[test]
    fn seed_layout() {
        let p = seed(&[5.0, 6.0, 7.0]);
        assert_eq!(p.len(), 3);
        for (k, pk) in p.iter().enumerate() {
            assert_eq!(pk.tan.len(), 3);
            for j in 0..3 {
                assert_eq!(pk.tan[j], if j == k { 1.0 } else { 0.0 });
            }
        }
    }

    #[test]
    #[should_panic]
    fn mixed_bases_panic() {
        let a = Dual::new(1.0, nd::Array1::zeros(2));
        let b = Dual::new(1.0, nd::Array1::zeros(3));
        let _ = a + b;
    }

    #[test]
    fn complex_abs_away_from_zero() {
        // x = 3 + 4i; d|x| along 1 is 3/5, along i is 4/5
        let x = CDual::new(
            C64::new(3.0, 4.0),
            nd::array![C64::new(1.0, 0.0), C64::new(0.0, 1.0)],
        );
        let a = x.abs();
        assert_abs_diff_eq!(a.val, 5.0, epsilon = 1e-12);
        assert_abs_diff_eq!(a.tan[0], 0.6, epsilon = 1e-12);
        assert_abs_diff_eq!(a.tan[1], 0.8, epsilon = 1e-12);
    }

    #[test]
    fn complex_abs_at_zero() {
        let x = CDual::new(
            C64::new(0.0, 0.0),
            nd::array![C64::new(2.0, -1.0)],
        );
        let a = x.abs();
        assert_eq!(a.val, 0.0);
        assert_eq!(a.tan[0], 0.0);
        assert!(a.tan[0].is_finite());
    }

    #[test]
    fn real_part_rule() {
        let x = CDual::new(
            C64::new(1.0, 2.0),
            nd::array![C64::new(0.5, -0.25)],
        );
        let r = x.re();
        assert_abs_diff_eq!(r.val, 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(r.tan[0], 0.5, epsilon = 1e-12);
    }
}
