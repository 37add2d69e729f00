//! Error types for pulse-gradient sessions.
//!
//! Configuration errors surface when objects are constructed, before any solve
//! runs. Numerical errors surface from an individual `infidelity` or
//! `gradient` call and must reach the caller unconverted; substituting a
//! default objective value would corrupt the surrounding optimization.

use thiserror::Error;

/// Errors produced while building or evaluating a pulse-gradient problem.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum QocError {
    /// Neither an explicit instant sequence nor a total evolution time was
    /// supplied.
    #[error("either tslots or evo_time must be specified")]
    GridUnderspecified,

    /// Supplied time-grid inputs fail validation.
    #[error("invalid time grid: {0}")]
    InvalidTimeGrid(&'static str),

    /// Fidelity-kind string is not one of TRACEDIFF, PSU, SU.
    #[error("unknown fidelity kind '{0}', expected TRACEDIFF, PSU, or SU")]
    UnknownFidKind(String),

    /// A control name was registered twice.
    #[error("duplicate control '{0}'")]
    DuplicateControl(String),

    /// A control's guess and bounds sequences have different lengths.
    #[error("{guess} guess values but {bounds} bounds")]
    BoundsLengthMismatch {
        /// Number of guess values.
        guess: usize,
        /// Number of bound pairs.
        bounds: usize,
    },

    /// A bound pair is inverted or NaN, or a guess value is not finite.
    #[error("invalid guess or bounds at index {index}")]
    InvalidPulseSpec {
        /// Parameter index within the control.
        index: usize,
    },

    /// Number of generator control terms does not match the number of control
    /// specifications.
    #[error("{terms} control terms but {specs} control specifications")]
    ControlCountMismatch {
        /// Control terms handed to the generator.
        terms: usize,
        /// Entries in the control-parameter specification.
        specs: usize,
    },

    /// A parameter vector has the wrong length for the compiled layout.
    #[error("expected {expected} parameters, got {got}")]
    ParamCount {
        /// Length fixed at setup.
        expected: usize,
        /// Length received.
        got: usize,
    },

    /// An operator is not square.
    #[error("operator must be square, got {rows}x{cols}")]
    NonSquareOperator {
        /// Row count.
        rows: usize,
        /// Column count.
        cols: usize,
    },

    /// Generator and state dimensions are inconsistent.
    #[error("dimension mismatch: {0}")]
    DimensionMismatch(String),

    /// Initial and target are not both kets or both operators.
    #[error("initial and target states must be of the same kind")]
    StateKindMismatch,

    /// Drift dimension matches neither the state dimension nor its square.
    #[error(
        "cannot classify a {op_dim}-dimensional generator acting on a \
         {state_dim}-dimensional state"
    )]
    UnclassifiableGenerator {
        /// Generator matrix dimension.
        op_dim: usize,
        /// Hilbert-space dimension of the initial state.
        state_dim: usize,
    },

    /// The target state or operator has zero norm, so the fidelity
    /// normalization is undefined.
    #[error("target has zero norm")]
    ZeroNormTarget,

    /// A tolerance or controller setting is nonpositive or not finite.
    #[error("invalid setting {name} = {value}")]
    InvalidSetting {
        /// Setting name.
        name: &'static str,
        /// Rejected value.
        value: f64,
    },

    /// Step size fell below the resolvable floor for the integration span.
    #[error("step size underflow at t = {t}")]
    StepSizeUnderflow {
        /// Time reached when the controller gave up.
        t: f64,
    },

    /// Accepted plus rejected steps exceeded the configured budget.
    #[error("step budget of {max_steps} exhausted at t = {t}")]
    StepBudgetExhausted {
        /// Configured maximum.
        max_steps: usize,
        /// Time reached.
        t: f64,
    },

    /// The state picked up a NaN or infinity during integration.
    #[error("non-finite state at t = {t}")]
    NonFiniteState {
        /// Time of detection.
        t: f64,
    },

    /// A free evolution time must be positive.
    #[error("evolution time must be positive, got {0}")]
    NonPositiveEvoTime(f64),

    /// Array reshape failed.
    #[error("shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),

    /// Dense linear algebra failed (target trace-norm factorization).
    #[error("linear algebra error: {0}")]
    Linalg(#[from] ndarray_linalg::error::LinalgError),
}

impl QocError {
    /// `true` for call-time numerical failures, `false` for configuration
    /// errors.
    pub fn is_numerical(&self) -> bool {
        matches!(
            self,
            Self::StepSizeUnderflow { .. }
                | Self::StepBudgetExhausted { .. }
                | Self::NonFiniteState { .. }
                | Self::NonPositiveEvoTime(_)
                | Self::Linalg(_)
        )
    }
}

/// Result type for pulse-gradient operations.
pub type QocResult<T> = Result<T, QocError>;
