#![allow(non_snake_case, non_upper_case_globals)]

//! Gradient-based pulse optimization for driven quantum systems: adaptive
//! evolution of closed (Schrödinger) and open (Lindblad) dynamics with
//! forward sensitivities, and infidelity objectives whose exact gradients
//! feed an external minimizer.

pub mod error;
pub mod dual;
pub mod op;
pub mod grid;
pub mod pulse;
pub mod objective;
pub mod generator;
pub mod evolve;
pub mod infid;
