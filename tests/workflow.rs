//! End-to-end workflow: fit parameters from measurements, then drive the
//! coupled solver and the optimality solver with the fitted values.

use leafgas::biochem::{assimilation, BiochemParams};
use leafgas::calibrate::{fit_aci, fit_stomatal, AciCurve, AciFitOptions, GsObservation};
use leafgas::coupled::{LeafGasExchange, SolveStatus};
use leafgas::environment::LeafEnvironment;
use leafgas::optimal::{OptimalStatus, OptimalStomata};
use leafgas::stomata::{StomatalModel, StomatalParams};

/// Measurements -> fitted parameters -> predictions, all the way through.
#[test]
fn test_fit_then_simulate() {
    // "Measured" A-Ci curve from a leaf whose true capacities we know
    let truth = BiochemParams::new(90.0, 150.0, 1.2).unwrap();
    let ci: Vec<f64> = vec![
        60.0, 90.0, 130.0, 180.0, 240.0, 310.0, 400.0, 520.0, 700.0, 950.0, 1250.0, 1550.0,
    ];
    let a: Vec<f64> = ci
        .iter()
        .map(|&ci| assimilation(ci, 25.0, 1500.0, &truth).unwrap().an)
        .collect();
    let curve = AciCurve::from_arrays(&ci, &a).unwrap();

    // "Measured" conductance behaviour from a known Medlyn response
    let true_gs = StomatalParams::new(0.015, 4.2, StomatalModel::Medlyn).unwrap();
    let gs_obs: Vec<GsObservation> = [
        (24.0, 0.8),
        (22.0, 1.2),
        (20.0, 1.6),
        (18.0, 2.1),
        (15.0, 2.7),
        (12.0, 3.2),
    ]
    .iter()
    .map(|&(an, vpd)| GsObservation {
        gs: true_gs.conductance(an, 400.0, vpd).unwrap(),
        an,
        ca: 400.0,
        vpd,
    })
    .collect();

    // Fit both models
    let biochem_fit = fit_aci(&curve, &AciFitOptions::default()).unwrap();
    assert!(biochem_fit.converged, "{}", biochem_fit.summary());

    let gs_fit = fit_stomatal(&gs_obs, StomatalModel::Medlyn, &Default::default()).unwrap();
    assert!((gs_fit.estimates["g1"] - 4.2).abs() < 1e-6);

    // Rebuild parameter objects from the fits and couple them
    let biochem = BiochemParams::new(
        biochem_fit.estimates["Vcmax"],
        biochem_fit.estimates["Jmax"],
        biochem_fit.estimates["Rd"],
    )
    .unwrap();
    let stomatal = StomatalParams::new(
        gs_fit.estimates["g0"].max(0.0),
        gs_fit.estimates["g1"],
        StomatalModel::Medlyn,
    )
    .unwrap();

    let model = LeafGasExchange::new(biochem.clone(), stomatal).unwrap();
    let env = LeafEnvironment::default();
    let prediction = model.solve(&env).unwrap();

    assert_eq!(prediction.status, SolveStatus::Converged);
    assert!(prediction.ci > 42.75 && prediction.ci < env.ca);
    assert!(prediction.an > 0.0 && prediction.gs > 0.0);

    // The fitted model reproduces the source leaf's behaviour
    let truth_model = LeafGasExchange::new(truth, stomatal).unwrap();
    let reference = truth_model.solve(&env).unwrap();
    assert!(
        (prediction.an - reference.an).abs() < 0.05,
        "fitted prediction {} vs reference {}",
        prediction.an,
        reference.an
    );

    // The optimality solver runs off the same fitted biochemistry
    let optimal = OptimalStomata::new(biochem, 1.0).unwrap();
    let best = optimal.solve(&env).unwrap();
    assert_eq!(best.status, OptimalStatus::Converged);
    assert!(best.ci > 42.75 && best.ci < env.ca - 0.5);
}
