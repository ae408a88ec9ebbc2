//! Leaf gas-exchange modelling.
//!
//! This crate re-exports the two member crates of the workspace:
//!
//! - [`leafgas_core`] (re-exported at the root): the biochemical
//!   photosynthesis model, stomatal-conductance models, the coupled
//!   gas-exchange solver and the optimal-stomata solver.
//! - [`calibrate`]: least-squares estimation of biochemical and
//!   stomatal parameters from gas-exchange measurements.
//!
//! The usual flow is measurement tables -> [`calibrate`] -> fitted
//! parameter sets -> the core solvers -> predicted assimilation,
//! conductance and transpiration surfaces.

pub use leafgas_core::*;

pub use leafgas_calibrate as calibrate;
