//! Core leaf gas-exchange models and solvers.
//!
//! This crate implements the demand side of leaf gas exchange (the
//! Farquhar-von Caemmerer-Berry biochemical model of C3 photosynthesis),
//! the supply side (Ball-Berry family stomatal-conductance models and an
//! optimality-based alternative), and the coupled solver that finds the
//! intercellular CO2 concentration at which the two agree through
//! Fick's-law transport.
//!
//! # Module Organisation
//!
//! - `biochem`: assimilation as a function of chloroplastic CO2
//! - `temperature`: Arrhenius / peaked / Q10 kinetics and the default
//!   coefficient calibration
//! - `stomata`: empirical conductance models
//! - `coupled`: the three-mode coupled gas-exchange solver
//! - `optimal`: stomatal behaviour from carbon-gain optimisation
//! - `energy_balance`: leaf-temperature correction at its interface
//! - `rootfind`: shared bracketed root-finding and 1-D maximisation

pub mod biochem;
pub mod constants;
pub mod coupled;
pub mod energy_balance;
pub mod environment;
pub mod errors;
pub mod optimal;
pub mod rootfind;
pub mod stomata;
pub mod temperature;

pub use biochem::{assimilation, AssimilationRates, BiochemParams, Limitation};
pub use coupled::{GasExchangeResult, LeafGasExchange, SolveStatus, SolverSettings};
pub use energy_balance::{EnergyBalance, LinearizedEnergyBalance};
pub use environment::LeafEnvironment;
pub use errors::{LeafGasError, LeafGasResult};
pub use optimal::{OptimalResult, OptimalStatus, OptimalStomata};
pub use stomata::{StomatalModel, StomatalParams};
pub use temperature::{TemperatureCoefficients, TemperatureResponse};
