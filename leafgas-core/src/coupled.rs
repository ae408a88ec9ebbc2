//! Coupled leaf gas-exchange solver.
//!
//! Finds the intercellular CO2 mole fraction Ci at which the biochemical
//! demand function and the stomatal supply function agree through
//! Fick's-law transport:
//!
//! $$ A_n = \frac{g_s}{1.6} (C_a - C_i) $$
//!
//! Three modes are supported, depending on which quantity is prescribed:
//!
//! - **Ci given** ([`LeafGasExchange::solve_at_ci`]): direct evaluation,
//!   no iteration.
//! - **gs given** ([`LeafGasExchange::solve_at_gs`]): a 1-D root-find
//!   over Ci of `demand(Ci) − (gs/1.6)(Ca − Ci)`.
//! - **Fully coupled** ([`LeafGasExchange::solve`]): neither is given.
//!   The stomatal model makes gs a function of An, which itself depends
//!   on Ci, so the operating point is implicit. Substituting the
//!   demand-implied An into the stomatal model makes the supply side an
//!   explicit function of the trial Ci, leaving a single bracketed
//!   root-find over Ci on the residual `demand(Ci) − supply(Ci)`.
//!
//! Non-convergence never raises: the result record carries a status flag
//! and the best estimate, so batch callers keep processing the remaining
//! records.

use crate::biochem::{assimilation, AssimilationRates, BiochemParams, Limitation};
use crate::constants::GS_H2O_PER_CO2;
use crate::energy_balance::EnergyBalance;
use crate::environment::LeafEnvironment;
use crate::errors::{LeafGasError, LeafGasResult};
use crate::rootfind::{find_sign_change, solve_bracketed};
use crate::stomata::StomatalParams;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Convergence outcome of an iterative solve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SolveStatus {
    Converged,
    /// The iteration cap was reached, or no operating point could be
    /// bracketed; the result holds the best estimate found.
    MaxIterationsReached,
}

/// Tolerances and iteration caps for the coupled solvers.
///
/// The defaults are deliberately conservative; all fields are
/// user-overridable.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SolverSettings {
    /// Absolute tolerance on the assimilation residual
    /// unit: µmol m⁻² s⁻¹
    pub an_tol: f64,

    /// Relative tolerance on Ci.
    pub ci_rel_tol: f64,

    /// Iteration cap for the 1-D root-finds.
    pub max_iter: usize,

    /// Lower bound of the Ci search bracket (µmol mol⁻¹).
    pub ci_min: f64,

    /// Grid resolution used to bracket the coupled residual.
    pub bracket_steps: usize,

    /// Iteration cap for the mesophyll fixed-point refinement.
    pub gm_max_iter: usize,

    /// Damping factor of the mesophyll fixed point, in (0, 1];
    /// 1 is undamped.
    pub gm_damping: f64,

    /// Convergence tolerance of the energy-balance outer loop (K).
    pub tleaf_tol: f64,

    /// Iteration cap for the energy-balance outer loop.
    pub max_outer_iter: usize,

    /// Absolute tolerance on Ci for the optimal-stomata search
    /// (µmol mol⁻¹).
    pub optimum_xtol: f64,
}

impl Default for SolverSettings {
    fn default() -> Self {
        Self {
            an_tol: 1e-6,
            ci_rel_tol: 1e-9,
            max_iter: 100,
            ci_min: 1.0,
            bracket_steps: 64,
            gm_max_iter: 50,
            gm_damping: 0.5,
            tleaf_tol: 0.01,
            max_outer_iter: 10,
            optimum_xtol: 0.01,
        }
    }
}

/// Full record of one coupled solve.
///
/// Field set is stable across the three modes, suitable for direct
/// serialization into an output table.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct GasExchangeResult {
    /// Intercellular CO2 mole fraction (µmol mol⁻¹).
    pub ci: f64,
    /// Chloroplastic CO2 mole fraction (µmol mol⁻¹); equals `ci` when
    /// mesophyll conductance is infinite.
    pub cc: f64,
    /// Net assimilation (µmol m⁻² s⁻¹).
    pub an: f64,
    /// Rubisco-limited gross rate (µmol m⁻² s⁻¹).
    pub ac: f64,
    /// Electron-transport-limited gross rate (µmol m⁻² s⁻¹).
    pub aj: f64,
    /// Stomatal conductance to water vapour (mol m⁻² s⁻¹).
    pub gs: f64,
    /// Transpiration (mmol m⁻² s⁻¹).
    pub transpiration: f64,
    /// Leaf temperature the solution was evaluated at (°C).
    pub tleaf: f64,
    pub limitation: Limitation,
    pub status: SolveStatus,
    /// Function evaluations spent in the root-find (0 for direct modes).
    pub iterations: usize,
}

/// Coupled demand/supply gas-exchange model.
///
/// Holds the biochemical and stomatal parameter sets plus solver
/// settings; evaluation is pure and the same instance can be shared
/// across threads for batch work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeafGasExchange {
    biochem: BiochemParams,
    stomatal: StomatalParams,
    settings: SolverSettings,
}

impl LeafGasExchange {
    /// Create a coupled model from validated parameter sets.
    pub fn new(biochem: BiochemParams, stomatal: StomatalParams) -> LeafGasResult<Self> {
        biochem.validate()?;
        stomatal.validate()?;
        Ok(Self {
            biochem,
            stomatal,
            settings: SolverSettings::default(),
        })
    }

    /// Set custom solver settings.
    pub fn with_settings(mut self, settings: SolverSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn biochem(&self) -> &BiochemParams {
        &self.biochem
    }

    pub fn stomatal(&self) -> &StomatalParams {
        &self.stomatal
    }

    pub fn settings(&self) -> &SolverSettings {
        &self.settings
    }

    /// Demand-side assimilation at an intercellular CO2 mole fraction.
    ///
    /// With finite mesophyll conductance the chloroplastic mole fraction
    /// `Cc = Ci − An/gm` depends on the rate itself; a damped fixed-point
    /// iteration with a bounded count resolves the pair. Returns the
    /// rates and the Cc they were evaluated at.
    pub fn demand(
        &self,
        env: &LeafEnvironment,
        ci: f64,
    ) -> LeafGasResult<(AssimilationRates, f64)> {
        let Some(gm) = env.gmeso else {
            let rates = assimilation(ci, env.tleaf, env.par, &self.biochem)?;
            return Ok((rates, ci));
        };

        let mut cc = ci;
        let mut rates = assimilation(cc, env.tleaf, env.par, &self.biochem)?;
        for iteration in 0..self.settings.gm_max_iter {
            let target = (ci - rates.an / gm).max(0.0);
            let step = self.settings.gm_damping * (target - cc);
            cc += step;
            rates = assimilation(cc, env.tleaf, env.par, &self.biochem)?;
            if step.abs() < 1e-9 * cc.abs().max(1.0) {
                log::debug!("mesophyll fixed point converged in {} iterations", iteration);
                break;
            }
        }
        Ok((rates, cc))
    }

    /// Mode (a): Ci is prescribed; no root-finding.
    ///
    /// The stomatal conductance reported is the one implied by transport
    /// at that Ci. For Ci ≥ Ca the transport relation has no physical
    /// solution and the implied conductance is logged as questionable.
    pub fn solve_at_ci(&self, env: &LeafEnvironment, ci: f64) -> LeafGasResult<GasExchangeResult> {
        env.validate()?;
        if !ci.is_finite() || ci < 0.0 {
            return Err(LeafGasError::InvalidParameter(format!(
                "ci must be non-negative, got {}",
                ci
            )));
        }

        let (rates, cc) = self.demand(env, ci)?;
        let gs = if env.ca == ci {
            log::warn!("transport-implied conductance is undefined at Ci = Ca");
            f64::INFINITY
        } else {
            if ci > env.ca {
                log::warn!(
                    "Ci ({}) above Ca ({}); transport-implied conductance is only \
                     meaningful for a respiring leaf",
                    ci,
                    env.ca
                );
            }
            GS_H2O_PER_CO2 * rates.an / (env.ca - ci)
        };

        Ok(self.assemble(env, ci, cc, &rates, gs, SolveStatus::Converged, 0))
    }

    /// Mode (b): stomatal conductance is prescribed; solve the transport
    /// relation jointly with the demand function for Ci.
    pub fn solve_at_gs(&self, env: &LeafEnvironment, gs: f64) -> LeafGasResult<GasExchangeResult> {
        env.validate()?;
        if !gs.is_finite() || gs <= 0.0 {
            return Err(LeafGasError::InvalidParameter(format!(
                "gs must be positive, got {}",
                gs
            )));
        }

        let s = &self.settings;
        let residual = |ci: f64| match self.demand(env, ci) {
            Ok((rates, _)) => rates.an - gs / GS_H2O_PER_CO2 * (env.ca - ci),
            Err(_) => f64::NAN,
        };

        // The residual is monotonically increasing in Ci: demand rises
        // while supply falls. The root can sit above Ca for a respiring
        // leaf, hence the wide bracket.
        let root = solve_bracketed(&residual, s.ci_min, 2.0 * env.ca, s.ci_rel_tol, s.an_tol, s.max_iter);
        let status = if root.converged {
            SolveStatus::Converged
        } else {
            log::warn!(
                "gs-given solve did not converge (residual {:.3e} at Ci {:.2})",
                root.f,
                root.x
            );
            SolveStatus::MaxIterationsReached
        };

        let (rates, cc) = self.demand(env, root.x)?;
        Ok(self.assemble(env, root.x, cc, &rates, gs, status, root.iterations))
    }

    /// Mode (c): fully coupled solve; neither Ci nor gs prescribed.
    ///
    /// The residual is scanned downward from Ca because it can cross zero
    /// a second time below the compensation point where both demand and
    /// supply are negative; the uppermost crossing is the physical
    /// operating point. When no crossing exists in `[ci_min, Ca]` the
    /// interval `[Ca, 2Ca]` is tried, which contains the respiring
    /// equilibrium (Ci > Ca) of a dark leaf with non-zero residual
    /// conductance.
    pub fn solve(&self, env: &LeafEnvironment) -> LeafGasResult<GasExchangeResult> {
        env.validate()?;
        let s = &self.settings;

        let residual = |ci: f64| match self.demand(env, ci) {
            Ok((rates, _)) => {
                let gs = self
                    .stomatal
                    .conductance_unchecked(rates.an, env.ca, env.vpd);
                rates.an - gs / GS_H2O_PER_CO2 * (env.ca - ci)
            }
            Err(_) => f64::NAN,
        };

        let bracket = find_sign_change(&residual, env.ca, s.ci_min, s.bracket_steps)
            .or_else(|| find_sign_change(&residual, env.ca, 2.0 * env.ca, s.bracket_steps));

        let (ci, status, iterations) = match bracket {
            Some((a, b)) => {
                let root = solve_bracketed(&residual, a, b, s.ci_rel_tol, s.an_tol, s.max_iter);
                let status = if root.converged {
                    SolveStatus::Converged
                } else {
                    log::warn!(
                        "coupled solve did not converge (residual {:.3e} at Ci {:.2})",
                        root.f,
                        root.x
                    );
                    SolveStatus::MaxIterationsReached
                };
                (root.x, status, root.iterations + s.bracket_steps)
            }
            None => {
                log::warn!(
                    "no coupled operating point bracketed in [{:.1}, {:.1}]; \
                     returning the smallest-residual estimate",
                    s.ci_min,
                    2.0 * env.ca
                );
                let ci = self.smallest_residual_ci(&residual, env);
                (ci, SolveStatus::MaxIterationsReached, 2 * s.bracket_steps)
            }
        };

        let (rates, cc) = self.demand(env, ci)?;
        let gs = self
            .stomatal
            .conductance_unchecked(rates.an, env.ca, env.vpd);
        Ok(self.assemble(env, ci, cc, &rates, gs, status, iterations))
    }

    /// Fully coupled solve with an energy-balance outer loop.
    ///
    /// Re-solves at the collaborator's corrected leaf temperature until
    /// the temperature settles or the outer cap is reached; the cap
    /// downgrades the status rather than failing.
    pub fn solve_with_energy_balance(
        &self,
        env: &LeafEnvironment,
        energy_balance: &dyn EnergyBalance,
    ) -> LeafGasResult<GasExchangeResult> {
        let s = &self.settings;
        let mut current = *env;
        let mut result = self.solve(&current)?;

        for _ in 0..s.max_outer_iter {
            let tleaf = energy_balance.leaf_temperature(&current, result.transpiration)?;
            if (tleaf - current.tleaf).abs() < s.tleaf_tol {
                return Ok(result);
            }
            current.tleaf = tleaf;
            result = self.solve(&current)?;
        }

        log::warn!(
            "energy-balance loop did not settle within {} outer iterations",
            s.max_outer_iter
        );
        result.status = SolveStatus::MaxIterationsReached;
        Ok(result)
    }

    /// Fully coupled solve over a batch of independent records.
    ///
    /// Records are solved in parallel; order is preserved and per-record
    /// failures (invalid drivers) do not abort the remainder.
    pub fn solve_batch(
        &self,
        envs: &[LeafEnvironment],
    ) -> Vec<LeafGasResult<GasExchangeResult>> {
        envs.par_iter().map(|env| self.solve(env)).collect()
    }

    fn smallest_residual_ci<F: Fn(f64) -> f64>(&self, residual: &F, env: &LeafEnvironment) -> f64 {
        let s = &self.settings;
        let lo = s.ci_min;
        let hi = 2.0 * env.ca;
        let mut best = (env.ca, f64::INFINITY);
        for i in 0..=s.bracket_steps {
            let ci = lo + (hi - lo) * i as f64 / s.bracket_steps as f64;
            let r = residual(ci).abs();
            if r.is_finite() && r < best.1 {
                best = (ci, r);
            }
        }
        best.0
    }

    fn assemble(
        &self,
        env: &LeafEnvironment,
        ci: f64,
        cc: f64,
        rates: &AssimilationRates,
        gs: f64,
        status: SolveStatus,
        iterations: usize,
    ) -> GasExchangeResult {
        GasExchangeResult {
            ci,
            cc,
            an: rates.an,
            ac: rates.ac,
            aj: rates.aj,
            gs,
            transpiration: transpiration(gs, env),
            tleaf: env.tleaf,
            limitation: rates.limitation,
            status,
            iterations,
        }
    }
}

/// Perfect-coupling transpiration (mmol m⁻² s⁻¹) from conductance and
/// the leaf-to-air vapour pressure deficit.
pub fn transpiration(gs: f64, env: &LeafEnvironment) -> f64 {
    1000.0 * gs * env.vpd / env.pressure
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stomata::StomatalModel;
    use approx::assert_relative_eq;

    fn model() -> LeafGasExchange {
        LeafGasExchange::new(
            BiochemParams::new(100.0, 180.0, 1.0).unwrap(),
            StomatalParams::new(0.0, 4.0, StomatalModel::BallBerry).unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn test_ci_given_matches_direct_evaluation_exactly() {
        let m = model();
        let env = LeafEnvironment::default();
        let result = m.solve_at_ci(&env, 300.0).unwrap();
        let direct = assimilation(300.0, env.tleaf, env.par, m.biochem()).unwrap();
        assert_eq!(result.an, direct.an);
        assert_eq!(result.limitation, direct.limitation);
        assert_eq!(result.iterations, 0);
    }

    #[test]
    fn test_gs_given_round_trips_mode_a() {
        let m = model();
        let env = LeafEnvironment::default();
        let forward = m.solve_at_ci(&env, 300.0).unwrap();
        assert!(forward.gs > 0.0);

        let inverse = m.solve_at_gs(&env, forward.gs).unwrap();
        assert_eq!(inverse.status, SolveStatus::Converged);
        assert!(
            (inverse.ci - 300.0).abs() < 1e-3,
            "round-trip Ci = {}",
            inverse.ci
        );
        assert_relative_eq!(inverse.an, forward.an, max_relative = 1e-5);
    }

    #[test]
    fn test_fully_coupled_ball_berry_operating_point() {
        // With f(D) = 1, g0 = 0 the operating point satisfies
        // g1 (Ca - Ci) / (1.6 Ca) = 1, i.e. Ci = Ca (1 - 1.6/g1) = 240
        let m = model();
        let env = LeafEnvironment::default();
        let result = m.solve(&env).unwrap();

        assert_eq!(result.status, SolveStatus::Converged);
        assert!(
            (result.ci - 240.0).abs() < 0.01,
            "operating point Ci = {}",
            result.ci
        );
        assert!(result.ci > 42.75 && result.ci < env.ca);
        assert!(result.gs > 0.0);
        assert!(result.transpiration > 0.0);
        assert!(result.an > 0.0);
    }

    #[test]
    fn test_fully_coupled_solution_is_self_consistent() {
        let m = model();
        let env = LeafEnvironment::default();
        let result = m.solve(&env).unwrap();

        // Transport, demand and the stomatal model must all agree
        let transport_an = result.gs / GS_H2O_PER_CO2 * (env.ca - result.ci);
        assert_relative_eq!(transport_an, result.an, epsilon = 1e-4);

        let gs_model = m
            .stomatal()
            .conductance(result.an, env.ca, env.vpd)
            .unwrap();
        assert_relative_eq!(gs_model, result.gs, epsilon = 1e-9);
    }

    #[test]
    fn test_medlyn_operating_point_sits_below_ball_berry() {
        // f(D) = 1/sqrt(1.5) < 1 weakens supply, so Ci settles lower
        let medlyn = LeafGasExchange::new(
            BiochemParams::new(100.0, 180.0, 1.0).unwrap(),
            StomatalParams::new(0.0, 4.0, StomatalModel::Medlyn).unwrap(),
        )
        .unwrap();
        let env = LeafEnvironment::default();
        let bb = model().solve(&env).unwrap();
        let md = medlyn.solve(&env).unwrap();
        assert!(
            md.ci < bb.ci,
            "Medlyn Ci ({}) should sit below Ball-Berry Ci ({})",
            md.ci,
            bb.ci
        );
    }

    #[test]
    fn test_dark_leaf_equilibrates_above_ambient() {
        let m = LeafGasExchange::new(
            BiochemParams::new(100.0, 180.0, 1.0).unwrap(),
            StomatalParams::new(0.05, 4.0, StomatalModel::BallBerry).unwrap(),
        )
        .unwrap();
        let env = LeafEnvironment {
            par: 0.0,
            ..Default::default()
        };
        let result = m.solve(&env).unwrap();

        assert_eq!(result.status, SolveStatus::Converged);
        assert_relative_eq!(result.an, -1.0, epsilon = 1e-4);
        // gs = 0.05 + 4 * (-1/400) = 0.04; Ci = Ca + 1.6 Rd / gs = 440
        assert_relative_eq!(result.gs, 0.04, epsilon = 1e-4);
        assert!(
            (result.ci - 440.0).abs() < 0.1,
            "dark equilibrium Ci = {}",
            result.ci
        );
    }

    #[test]
    fn test_mesophyll_conductance_lowers_assimilation() {
        let m = model();
        let free = LeafEnvironment::default();
        let resistive = LeafEnvironment {
            gmeso: Some(0.3),
            ..Default::default()
        };

        let without = m.solve_at_ci(&free, 300.0).unwrap();
        let with = m.solve_at_ci(&resistive, 300.0).unwrap();

        assert!(with.cc < with.ci, "Cc must fall below Ci under finite gm");
        assert!(
            with.an < without.an,
            "finite gm should cost assimilation: {} vs {}",
            with.an,
            without.an
        );
        // Fixed point must be self-consistent: Cc = Ci - An/gm
        assert_relative_eq!(with.cc, 300.0 - with.an / 0.3, epsilon = 1e-4);
    }

    #[test]
    fn test_below_compensation_never_produces_nan() {
        let m = model();
        let env = LeafEnvironment::default();
        let result = m.solve_at_ci(&env, 20.0).unwrap();
        assert_eq!(result.limitation, Limitation::BelowCompensation);
        assert!(result.an <= 0.0);
        assert!(result.an.is_finite());
        assert!(result.gs.is_finite());
    }

    #[test]
    fn test_batch_preserves_order_and_survives_bad_record() {
        let m = model();
        let envs = vec![
            LeafEnvironment::default(),
            LeafEnvironment {
                vpd: -1.0, // invalid driver
                ..Default::default()
            },
            LeafEnvironment {
                ca: 800.0,
                ..Default::default()
            },
        ];
        let results = m.solve_batch(&envs);
        assert_eq!(results.len(), 3);
        assert!(results[0].is_ok());
        assert!(results[1].is_err());
        let high_co2 = results[2].as_ref().unwrap();
        assert!(high_co2.ci > results[0].as_ref().unwrap().ci);
    }

    #[test]
    fn test_settings_are_overridable() {
        let settings = SolverSettings {
            max_iter: 500,
            an_tol: 1e-9,
            ..Default::default()
        };
        let m = model().with_settings(settings);
        assert_eq!(m.settings().max_iter, 500);
        let result = m.solve(&LeafEnvironment::default()).unwrap();
        assert_eq!(result.status, SolveStatus::Converged);
    }
}
