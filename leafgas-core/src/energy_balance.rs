//! Leaf energy balance at its interface.
//!
//! The gas-exchange solvers treat leaf-temperature correction as an
//! external collaborator: they hand the current transpiration estimate to
//! an [`EnergyBalance`] implementation and re-solve at the corrected
//! temperature until the two agree. Consumers depend only on the trait;
//! [`LinearizedEnergyBalance`] is one workable implementation, sufficient
//! when boundary-layer effects are moderate.

use crate::constants::{
    CP_AIR_MOLAR, KELVIN, LATENT_HEAT_H2O, STEFAN_BOLTZMANN, UMOL_PHOTON_PER_JOULE,
};
use crate::environment::LeafEnvironment;
use crate::errors::{LeafGasError, LeafGasResult};
use serde::{Deserialize, Serialize};

/// Supplier of a corrected leaf temperature.
pub trait EnergyBalance {
    /// Leaf temperature (°C) consistent with the given transpiration
    /// rate under this implementation's radiative and boundary-layer
    /// assumptions.
    ///
    /// # Arguments
    ///
    /// * `env` - Environmental drivers (PAR is used as the shortwave
    ///   source)
    /// * `transpiration` - Latent flux as water vapour (mmol m⁻² s⁻¹)
    fn leaf_temperature(&self, env: &LeafEnvironment, transpiration: f64) -> LeafGasResult<f64>;
}

/// Energy balance linearized around air temperature.
///
/// Absorbed shortwave is taken from PAR (total solar is roughly twice the
/// PAR-band energy), longwave exchange with surroundings at air
/// temperature is folded into a radiative conductance, and the
/// boundary-layer conductance to heat follows the laminar forced
/// convection relation for a flat leaf:
///
/// $$ g_{bH} = 2 \times 1.4 \times 0.135 \sqrt{u / w} $$
///
/// The leaf-air temperature difference is then
///
/// $$ \Delta T = \frac{Q_{abs} - \lambda E}{c_p (g_{bH} + g_r)} $$
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LinearizedEnergyBalance {
    /// Air temperature (°C).
    pub air_temp: f64,
    /// Wind speed at leaf height
    /// unit: m s⁻¹
    /// default: 2.0
    pub wind: f64,
    /// Characteristic leaf width
    /// unit: m
    /// default: 0.02
    pub leaf_width: f64,
    /// Shortwave absorptance of the leaf
    /// unit: dimensionless
    /// default: 0.5
    pub absorptance: f64,
    /// Thermal emissivity of the leaf
    /// unit: dimensionless
    /// default: 0.97
    pub emissivity: f64,
}

impl LinearizedEnergyBalance {
    /// Create an energy balance for the given air temperature with
    /// default wind, leaf geometry and radiative properties.
    pub fn new(air_temp: f64) -> Self {
        Self {
            air_temp,
            wind: 2.0,
            leaf_width: 0.02,
            absorptance: 0.5,
            emissivity: 0.97,
        }
    }

    /// Check that the configuration is physically meaningful.
    pub fn validate(&self) -> LeafGasResult<()> {
        for (name, value) in [("wind", self.wind), ("leaf_width", self.leaf_width)] {
            if !value.is_finite() || value <= 0.0 {
                return Err(LeafGasError::InvalidParameter(format!(
                    "{} must be positive, got {}",
                    name, value
                )));
            }
        }
        for (name, value) in [
            ("absorptance", self.absorptance),
            ("emissivity", self.emissivity),
        ] {
            if !(value > 0.0 && value <= 1.0) {
                return Err(LeafGasError::InvalidParameter(format!(
                    "{} must be in (0, 1], got {}",
                    name, value
                )));
            }
        }
        Ok(())
    }

    /// Two-sided boundary-layer conductance to heat (mol m⁻² s⁻¹).
    pub fn boundary_layer_conductance(&self) -> f64 {
        2.0 * 1.4 * 0.135 * (self.wind / self.leaf_width).sqrt()
    }

    /// Two-sided radiative conductance (mol m⁻² s⁻¹), linearized at air
    /// temperature.
    pub fn radiative_conductance(&self) -> f64 {
        let ta = self.air_temp + KELVIN;
        2.0 * 4.0 * self.emissivity * STEFAN_BOLTZMANN * ta.powi(3) / CP_AIR_MOLAR
    }
}

impl EnergyBalance for LinearizedEnergyBalance {
    fn leaf_temperature(&self, env: &LeafEnvironment, transpiration: f64) -> LeafGasResult<f64> {
        self.validate()?;
        if !transpiration.is_finite() {
            return Err(LeafGasError::InvalidParameter(format!(
                "transpiration must be finite, got {}",
                transpiration
            )));
        }

        // Absorbed shortwave (W m⁻²): total solar approximated as twice
        // the PAR-band energy
        let q_abs = self.absorptance * 2.0 * env.par / UMOL_PHOTON_PER_JOULE;

        // Latent flux (W m⁻²), transpiration in mmol m⁻² s⁻¹
        let latent = transpiration * 1e-3 * LATENT_HEAT_H2O;

        let g_bh = self.boundary_layer_conductance();
        let g_r = self.radiative_conductance();

        let delta_t = (q_abs - latent) / (CP_AIR_MOLAR * (g_bh + g_r));
        Ok(self.air_temp + delta_t)
    }
}
