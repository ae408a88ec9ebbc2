//! Cross-mode consistency tests for the coupled gas-exchange solver.
//!
//! These exercise the round-trip guarantees between the three solve
//! modes and the end-to-end behaviour of the default parameterisation.

use approx::assert_relative_eq;
use is_close::is_close;
use leafgas_core::{
    BiochemParams, EnergyBalance, LeafEnvironment, LeafGasExchange, Limitation,
    LinearizedEnergyBalance, SolveStatus, StomatalModel, StomatalParams,
};

fn default_model() -> LeafGasExchange {
    LeafGasExchange::new(
        BiochemParams::new(100.0, 180.0, 1.0).unwrap(),
        StomatalParams::new(0.0, 4.0, StomatalModel::BallBerry).unwrap(),
    )
    .unwrap()
}

/// Mode (b) and mode (c) must converge back to the Ci whose mode (a)
/// outputs they were fed.
#[test]
fn test_forward_inverse_round_trip() {
    let model = default_model();
    let env = LeafEnvironment::default();

    for ci in [150.0, 240.0, 300.0, 350.0] {
        let forward = model.solve_at_ci(&env, ci).unwrap();
        let inverse = model.solve_at_gs(&env, forward.gs).unwrap();

        assert_eq!(inverse.status, SolveStatus::Converged);
        assert!(
            (inverse.ci - ci).abs() < 1e-3,
            "mode (b) round trip at Ci={} landed on {}",
            ci,
            inverse.ci
        );
        assert!(is_close!(inverse.an, forward.an, rel_tol = 1e-5));
    }
}

/// The fully coupled solution must satisfy all three relations at once,
/// and feeding its gs back through mode (b) must reproduce it.
#[test]
fn test_fully_coupled_idempotence() {
    let model = default_model();
    let env = LeafEnvironment::default();

    let coupled = model.solve(&env).unwrap();
    assert_eq!(coupled.status, SolveStatus::Converged);

    let replay = model.solve_at_gs(&env, coupled.gs).unwrap();
    assert!(
        (replay.ci - coupled.ci).abs() < 1e-3,
        "replayed Ci {} vs coupled Ci {}",
        replay.ci,
        coupled.ci
    );

    let direct = model.solve_at_ci(&env, coupled.ci).unwrap();
    assert!(is_close!(direct.an, coupled.an, rel_tol = 1e-6));
}

/// End-to-end scenario with the default temperature calibration at 25 °C.
#[test]
fn test_end_to_end_limitation_regimes() {
    let model = default_model();
    let env = LeafEnvironment::default();

    // Low Ci: Rubisco-limited, An in the low-to-mid twenties
    let low = model.solve_at_ci(&env, 300.0).unwrap();
    assert_eq!(low.limitation, Limitation::Rubisco);
    assert!(
        low.an > 20.0 && low.an < 26.0,
        "An at Ci=300 was {}",
        low.an
    );

    // High Ci: electron transport takes over and the curve saturates
    // below the linear extrapolation of the Rubisco region
    let high = model.solve_at_ci(&env, 900.0).unwrap();
    assert_eq!(high.limitation, Limitation::ElectronTransport);
    let rubisco_line = low.an * (900.0 - 42.75) / (300.0 - 42.75);
    assert!(
        high.an < rubisco_line,
        "An at Ci=900 ({}) should fall below the Rubisco line ({})",
        high.an,
        rubisco_line
    );
    assert!(high.an > low.an);
}

/// Fully coupled solve with g1=4, g0=0 at D=1.5 kPa: a unique converged
/// operating point strictly inside (Γ*, Ca) with positive fluxes.
#[test]
fn test_fully_coupled_operating_point_is_physical() {
    for model_variant in [
        StomatalModel::BallBerry,
        StomatalModel::Leuning { d0: 1.5 },
        StomatalModel::Medlyn,
    ] {
        let model = LeafGasExchange::new(
            BiochemParams::new(100.0, 180.0, 1.0).unwrap(),
            StomatalParams::new(0.0, 4.0, model_variant).unwrap(),
        )
        .unwrap();
        let env = LeafEnvironment::default();
        let result = model.solve(&env).unwrap();

        assert_eq!(result.status, SolveStatus::Converged, "{:?}", model_variant);
        assert!(
            result.ci > 42.75 && result.ci < env.ca,
            "{:?}: Ci = {}",
            model_variant,
            result.ci
        );
        assert!(result.gs > 0.0, "{:?}", model_variant);
        assert!(result.transpiration > 0.0, "{:?}", model_variant);
    }
}

/// The energy-balance refinement settles on a self-consistent leaf
/// temperature within the outer iteration cap.
#[test]
fn test_energy_balance_refinement_settles() {
    let model = default_model();
    let env = LeafEnvironment::default();
    let energy_balance = LinearizedEnergyBalance::new(25.0);

    let plain = model.solve(&env).unwrap();
    let refined = model.solve_with_energy_balance(&env, &energy_balance).unwrap();

    assert_eq!(refined.status, SolveStatus::Converged);
    // A sunlit transpiring leaf at these settings runs warmer than air
    assert!(
        refined.tleaf > 25.0,
        "refined leaf temperature was {}",
        refined.tleaf
    );
    assert!(refined.tleaf < 35.0);
    // The correction must actually have fed back into the solution
    assert!(refined.an != plain.an || refined.tleaf == plain.tleaf);

    // Self-consistency: the reported temperature reproduces itself
    let check_env = LeafEnvironment {
        tleaf: refined.tleaf,
        ..env
    };
    let recheck = model.solve(&check_env).unwrap();
    let t_again = energy_balance
        .leaf_temperature(&check_env, recheck.transpiration)
        .unwrap();
    assert!(
        (t_again - refined.tleaf).abs() < 0.05,
        "energy balance not self-consistent: {} vs {}",
        t_again,
        refined.tleaf
    );
}

/// Result records serialize with stable field names across modes.
#[test]
fn test_result_serializes_to_stable_fields() {
    let model = default_model();
    let env = LeafEnvironment::default();
    let result = model.solve(&env).unwrap();

    let value = serde_json::to_value(&result).unwrap();
    for field in [
        "ci",
        "cc",
        "an",
        "ac",
        "aj",
        "gs",
        "transpiration",
        "tleaf",
        "limitation",
        "status",
        "iterations",
    ] {
        assert!(value.get(field).is_some(), "missing field {}", field);
    }
}

/// Batch solving across a CO2 gradient is order-stable and monotone.
#[test]
fn test_batch_over_co2_gradient() {
    let model = default_model();
    let envs: Vec<LeafEnvironment> = (0..8)
        .map(|i| LeafEnvironment {
            ca: 300.0 + 100.0 * i as f64,
            ..Default::default()
        })
        .collect();

    let results = model.solve_batch(&envs);
    assert_eq!(results.len(), envs.len());

    let mut previous_an = f64::NEG_INFINITY;
    for (env, result) in envs.iter().zip(&results) {
        let result = result.as_ref().unwrap();
        assert_eq!(result.status, SolveStatus::Converged);
        assert!(result.ci < env.ca);
        assert!(
            result.an >= previous_an,
            "assimilation should rise with Ca; Ca={} gave {}",
            env.ca,
            result.an
        );
        previous_an = result.an;
    }
}

/// Mesophyll resistance shifts the operating point without breaking
/// convergence.
#[test]
fn test_fully_coupled_with_mesophyll_conductance() {
    let model = default_model();
    let env = LeafEnvironment {
        gmeso: Some(0.3),
        ..Default::default()
    };
    let result = model.solve(&env).unwrap();

    assert_eq!(result.status, SolveStatus::Converged);
    assert!(result.cc < result.ci);
    assert_relative_eq!(result.cc, result.ci - result.an / 0.3, epsilon = 1e-3);
}
