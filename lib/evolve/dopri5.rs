//! Dormand-Prince 5(4) embedded Runge-Kutta stages.
//!
//! Coefficients from Dormand & Prince (1980), as tabulated in Hairer,
//! Nørsett & Wanner, "Solving Ordinary Differential Equations I", table
//! II.5.2. The pair is FSAL: the seventh stage is the first stage of the
//! next step, so an accepted step costs six fresh right-hand-side
//! evaluations and a rejected one seven.

use ndarray as nd;
use num_complex::Complex64 as C64;

const c2: f64 = 1.0 / 5.0;
const c3: f64 = 3.0 / 10.0;
const c4: f64 = 4.0 / 5.0;
const c5: f64 = 8.0 / 9.0;

const a21: f64 = 1.0 / 5.0;
const a31: f64 = 3.0 / 40.0;
const a32: f64 = 9.0 / 40.0;
const a41: f64 = 44.0 / 45.0;
const a42: f64 = -56.0 / 15.0;
const a43: f64 = 32.0 / 9.0;
const a51: f64 = 19372.0 / 6561.0;
const a52: f64 = -25360.0 / 2187.0;
const a53: f64 = 64448.0 / 6561.0;
const a54: f64 = -212.0 / 729.0;
const a61: f64 = 9017.0 / 3168.0;
const a62: f64 = -355.0 / 33.0;
const a63: f64 = 46732.0 / 5247.0;
const a64: f64 = 49.0 / 176.0;
const a65: f64 = -5103.0 / 18656.0;

// Fifth-order weights; also the a-row of the final stage.
const b1: f64 = 35.0 / 384.0;
const b3: f64 = 500.0 / 1113.0;
const b4: f64 = 125.0 / 192.0;
const b5: f64 = -2187.0 / 6784.0;
const b6: f64 = 11.0 / 84.0;

// Fifth-order minus embedded fourth-order weights; dotting the stages with
// these gives the local error estimate directly.
const e1: f64 = 71.0 / 57600.0;
const e3: f64 = -71.0 / 16695.0;
const e4: f64 = 71.0 / 1920.0;
const e5: f64 = -17253.0 / 339200.0;
const e6: f64 = 22.0 / 525.0;
const e7: f64 = -1.0 / 40.0;

// One proposed step: fifth-order solution, embedded error estimate, and the
// final stage for FSAL reuse.
pub(crate) struct ProposedStep {
    pub(crate) y: nd::Array2<C64>,
    pub(crate) err: nd::Array2<C64>,
    pub(crate) fsal: nd::Array2<C64>,
}

// Advance `y0` by one step of size `h`, reusing `k1 = rhs(t, y0)` from the
// previous step's final stage.
pub(crate) fn step<F>(
    rhs: &F,
    t: f64,
    h: f64,
    y0: &nd::Array2<C64>,
    k1: &nd::Array2<C64>,
) -> ProposedStep
where F: Fn(f64, &nd::Array2<C64>) -> nd::Array2<C64>
{
    let mut yk: nd::Array2<C64>;
    yk = y0 + &(k1 * (h * a21));
    let k2 = rhs(t + c2 * h, &yk);
    yk = y0 + &(k1 * (h * a31)) + &(&k2 * (h * a32));
    let k3 = rhs(t + c3 * h, &yk);
    yk = y0 + &(k1 * (h * a41)) + &(&k2 * (h * a42)) + &(&k3 * (h * a43));
    let k4 = rhs(t + c4 * h, &yk);
    yk = y0
        + &(k1 * (h * a51)) + &(&k2 * (h * a52))
        + &(&k3 * (h * a53)) + &(&k4 * (h * a54));
    let k5 = rhs(t + c5 * h, &yk);
    yk = y0
        + &(k1 * (h * a61)) + &(&k2 * (h * a62)) + &(&k3 * (h * a63))
        + &(&k4 * (h * a64)) + &(&k5 * (h * a65));
    let k6 = rhs(t + h, &yk);
    let y = y0
        + &(k1 * (h * b1)) + &(&k3 * (h * b3)) + &(&k4 * (h * b4))
        + &(&k5 * (h * b5)) + &(&k6 * (h * b6));
    let fsal = rhs(t + h, &y);
    let err = k1 * (h * e1) + &k3 * (h * e3) + &k4 * (h * e4)
        + &k5 * (h * e5) + &k6 * (h * e6) + &fsal * (h * e7);
    ProposedStep { y, err, fsal }
}
