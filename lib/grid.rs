//! Evolution time axis for a single optimization run.

use std::cell::OnceCell;
use itertools::Itertools;
use ndarray as nd;
use crate::error::{ QocError, QocResult };

/// Slot count assumed when only a total evolution time is given.
pub const DEFAULT_N_TSLOTS: usize = 100;

#[derive(Clone, Debug)]
enum GridSpec {
    Explicit(nd::Array1<f64>),
    Derived { evo_time: f64, n_tslots: usize },
}

/// Time axis derived lazily from either an explicit instant sequence or an
/// (evolution time, slot count) pair.
///
/// Whichever representation was not supplied is computed on first access and
/// cached. There are no setters, so cached values can never go stale; a fresh
/// grid is constructed per run.
#[derive(Debug)]
pub struct TimeGrid {
    spec: GridSpec,
    tslots: OnceCell<nd::Array1<f64>>,
    evo_time: OnceCell<f64>,
}

impl TimeGrid {
    /// Create from optional inputs.
    ///
    /// An explicit sequence takes precedence when both it and an evolution
    /// time are supplied. With only an evolution time, the slot count
    /// defaults to [`DEFAULT_N_TSLOTS`]. Supplying neither is a configuration
    /// error.
    pub fn new(
        tslots: Option<nd::Array1<f64>>,
        evo_time: Option<f64>,
        n_tslots: Option<usize>,
    ) -> QocResult<Self>
    {
        if let Some(ts) = tslots {
            Self::from_tslots(ts)
        } else if let Some(t) = evo_time {
            Self::derived(t, n_tslots.unwrap_or(DEFAULT_N_TSLOTS))
        } else {
            Err(QocError::GridUnderspecified)
        }
    }

    /// Create from an explicit sequence of instants.
    ///
    /// The sequence must hold at least two finite, non-decreasing,
    /// non-negative values with a positive final instant.
    pub fn from_tslots(tslots: nd::Array1<f64>) -> QocResult<Self> {
        if tslots.len() < 2 {
            return Err(QocError::InvalidTimeGrid(
                "at least two instants are required"));
        }
        if tslots.iter().any(|t| !t.is_finite()) {
            return Err(QocError::InvalidTimeGrid(
                "instants must be finite"));
        }
        if tslots.iter().tuple_windows().any(|(a, b)| a > b) {
            return Err(QocError::InvalidTimeGrid(
                "instants must be non-decreasing"));
        }
        if tslots[0] < 0.0 {
            return Err(QocError::InvalidTimeGrid(
                "instants must be non-negative"));
        }
        if tslots[tslots.len() - 1] <= 0.0 {
            return Err(QocError::InvalidTimeGrid(
                "the final instant must be positive"));
        }
        Ok(Self {
            spec: GridSpec::Explicit(tslots),
            tslots: OnceCell::new(),
            evo_time: OnceCell::new(),
        })
    }

    /// Create from a total evolution time with [`DEFAULT_N_TSLOTS`] slots.
    pub fn from_evo_time(evo_time: f64) -> QocResult<Self> {
        Self::derived(evo_time, DEFAULT_N_TSLOTS)
    }

    fn derived(evo_time: f64, n_tslots: usize) -> QocResult<Self> {
        if !evo_time.is_finite() || evo_time <= 0.0 {
            return Err(QocError::InvalidTimeGrid(
                "evo_time must be finite and positive"));
        }
        if n_tslots < 2 {
            return Err(QocError::InvalidTimeGrid(
                "n_tslots must be at least 2"));
        }
        Ok(Self {
            spec: GridSpec::Derived { evo_time, n_tslots },
            tslots: OnceCell::new(),
            evo_time: OnceCell::new(),
        })
    }

    /// Instant sequence; evenly spaced from 0 to the evolution time inclusive
    /// when derived.
    pub fn tslots(&self) -> &nd::Array1<f64> {
        match &self.spec {
            GridSpec::Explicit(ts) => ts,
            GridSpec::Derived { evo_time, n_tslots } =>
                self.tslots.get_or_init(|| {
                    nd::Array1::linspace(0.0, *evo_time, *n_tslots)
                }),
        }
    }

    /// Total evolution time: the final instant.
    pub fn evo_time(&self) -> f64 {
        match &self.spec {
            GridSpec::Derived { evo_time, .. } => *evo_time,
            GridSpec::Explicit(ts) =>
                *self.evo_time.get_or_init(|| ts[ts.len() - 1]),
        }
    }

    /// Number of instants.
    pub fn n_tslots(&self) -> usize {
        match &self.spec {
            GridSpec::Explicit(ts) => ts.len(),
            GridSpec::Derived { n_tslots, .. } => *n_tslots,
        }
    }
}
