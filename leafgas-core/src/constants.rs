//! Physical constants used across the gas-exchange calculations.

/// Universal gas constant (J mol⁻¹ K⁻¹).
pub const GAS_CONSTANT: f64 = 8.314;

/// Reference temperature for kinetic parameters (°C).
pub const TREF_C: f64 = 25.0;

/// Offset between Celsius and Kelvin scales.
pub const KELVIN: f64 = 273.15;

/// Ratio of the diffusivities of water vapour and CO2 in air.
///
/// Converts between stomatal conductance to water vapour and to CO2:
/// `gs_co2 = gs_h2o / 1.6`.
pub const GS_H2O_PER_CO2: f64 = 1.6;

/// Photon flux per unit shortwave energy in the PAR band (µmol J⁻¹).
pub const UMOL_PHOTON_PER_JOULE: f64 = 4.57;

/// Molar latent heat of vaporisation of water near 25 °C (J mol⁻¹).
pub const LATENT_HEAT_H2O: f64 = 44100.0;

/// Molar heat capacity of dry air (J mol⁻¹ K⁻¹).
pub const CP_AIR_MOLAR: f64 = 29.3;

/// Stefan-Boltzmann constant (W m⁻² K⁻⁴).
pub const STEFAN_BOLTZMANN: f64 = 5.67e-8;
