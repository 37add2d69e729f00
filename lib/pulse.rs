//! Named control pulses: guess values, box bounds, and the layout of the flat
//! optimization vector.

use indexmap::IndexMap;
use ndarray as nd;
use crate::error::{ QocError, QocResult };

/// Guess values and box bounds for one named control.
#[derive(Clone, Debug, PartialEq)]
pub struct PulseSpec {
    guess: Vec<f64>,
    bounds: Vec<(f64, f64)>,
}

impl PulseSpec {
    /// Create from guesses and matching bounds.
    ///
    /// Guesses must be finite; each bound pair must satisfy `lo <= hi` and
    /// contain no NaN. Infinite bounds are allowed.
    pub fn new(guess: Vec<f64>, bounds: Vec<(f64, f64)>) -> QocResult<Self> {
        if guess.len() != bounds.len() {
            return Err(QocError::BoundsLengthMismatch {
                guess: guess.len(),
                bounds: bounds.len(),
            });
        }
        for (k, (&g, &(lo, hi))) in guess.iter().zip(&bounds).enumerate() {
            if !g.is_finite() || lo.is_nan() || hi.is_nan() || lo > hi {
                return Err(QocError::InvalidPulseSpec { index: k });
            }
        }
        Ok(Self { guess, bounds })
    }

    /// Create with unbounded parameters.
    pub fn unbounded(guess: Vec<f64>) -> QocResult<Self> {
        let bounds = vec![(f64::NEG_INFINITY, f64::INFINITY); guess.len()];
        Self::new(guess, bounds)
    }

    /// Number of parameters carried by this control.
    pub fn len(&self) -> usize { self.guess.len() }

    /// `true` if the control carries no parameters.
    pub fn is_empty(&self) -> bool { self.guess.is_empty() }

    /// Guess values.
    pub fn guess(&self) -> &[f64] { &self.guess }

    /// `(lo, hi)` bound pairs.
    pub fn bounds(&self) -> &[(f64, f64)] { &self.bounds }
}

/// Guess and bounds for a free total evolution time.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TimeVar {
    /// Starting evolution time.
    pub guess: f64,
    /// `(lo, hi)` bounds handed to the external minimizer.
    pub bounds: (f64, f64),
}

impl TimeVar {
    /// Free time starting from `guess`, bounded below by zero.
    pub fn new(guess: f64) -> Self {
        Self { guess, bounds: (0.0, f64::INFINITY) }
    }

    /// Reject nonpositive or non-finite guesses and malformed bounds.
    pub fn validate(&self) -> QocResult<()> {
        if !self.guess.is_finite() || self.guess <= 0.0 {
            return Err(QocError::NonPositiveEvoTime(self.guess));
        }
        let (lo, hi) = self.bounds;
        if lo.is_nan() || hi.is_nan() || lo > hi {
            return Err(QocError::InvalidSetting {
                name: "time_bounds", value: lo });
        }
        Ok(())
    }
}

/// Insertion-ordered collection of control pulse specifications.
///
/// Insertion order fixes both the pairing with generator control terms and
/// the layout of the flat parameter vector.
#[derive(Clone, Debug, Default)]
pub struct ControlParams {
    specs: IndexMap<String, PulseSpec>,
}

impl ControlParams {
    /// Create an empty collection.
    pub fn new() -> Self { Self::default() }

    /// Register a control; re-registering a name is an error.
    pub fn insert(&mut self, name: impl Into<String>, spec: PulseSpec)
        -> QocResult<()>
    {
        let name = name.into();
        if self.specs.contains_key(&name) {
            return Err(QocError::DuplicateControl(name));
        }
        self.specs.insert(name, spec);
        Ok(())
    }

    /// Builder-style [`insert`][Self::insert].
    pub fn with(mut self, name: impl Into<String>, spec: PulseSpec)
        -> QocResult<Self>
    {
        self.insert(name, spec)?;
        Ok(self)
    }

    /// Number of controls.
    pub fn len(&self) -> usize { self.specs.len() }

    /// `true` if no controls are registered.
    pub fn is_empty(&self) -> bool { self.specs.is_empty() }

    /// Total parameter count over all controls.
    pub fn total_params(&self) -> usize {
        self.specs.values().map(PulseSpec::len).sum()
    }

    /// Look up one control.
    pub fn get(&self, name: &str) -> Option<&PulseSpec> {
        self.specs.get(name)
    }

    /// Controls in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &PulseSpec)> {
        self.specs.iter().map(|(name, spec)| (name.as_str(), spec))
    }

    /// Concatenated guess values in layout order.
    pub fn guess_vector(&self) -> nd::Array1<f64> {
        self.specs.values()
            .flat_map(|spec| spec.guess().iter().copied())
            .collect()
    }

    /// Concatenated bound pairs in layout order.
    pub fn bounds_vector(&self) -> Vec<(f64, f64)> {
        self.specs.values()
            .flat_map(|spec| spec.bounds().iter().copied())
            .collect()
    }
}
