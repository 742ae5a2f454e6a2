use acvmc::{
    allocate_samples_acv, allocate_samples_acv_best_kl, allocate_samples_mfmc,
    allocate_samples_mlmc, gradient, mfmc_control_variate_weights, mlmc_lagrange_multiplier, Acv,
    AcvError, AllocationConfig, Covariance, DiscrepancyStrategy, Dual, Estimator, Mfmc, Mlmc,
    OptimMethod,
};
use approx::assert_relative_eq;

/// Unit variance MLMC example with discrepancy variances 1, 4, 4.
fn mlmc_example() -> (Covariance, Vec<f64>) {
    let cov = Covariance::from_rows(&[
        vec![1.0, 0.5, 0.25],
        vec![0.5, 1.0, 0.5],
        vec![0.25, 0.5, 4.0],
    ])
    .unwrap();
    (cov, vec![6.0, 3.0, 1.0])
}

fn cov4() -> Covariance {
    Covariance::from_rows(&[
        vec![1.0, 0.9, 0.8, 0.7],
        vec![0.9, 1.0, 0.85, 0.75],
        vec![0.8, 0.85, 1.0, 0.8],
        vec![0.7, 0.75, 0.8, 1.0],
    ])
    .unwrap()
}

fn costs4() -> Vec<f64> {
    vec![1.0, 0.1, 0.05, 0.01]
}

fn two_models() -> (Covariance, Vec<f64>) {
    let cov = Covariance::from_rows(&[vec![1.0, 0.9], vec![0.9, 1.0]]).unwrap();
    (cov, vec![1.0, 0.01])
}

/// Three models `A_i (cos θ_i x^p_i + sin θ_i y^p_i)` with `x, y ~ U[−1, 1]`; the
/// correlations are tuned by `θ_1`.
fn tunable(theta1: f64) -> Covariance {
    let (a0, a1, a2) = (11f64.sqrt(), 7f64.sqrt(), 3f64.sqrt());
    let (theta0, theta2) = (1.4 / 0.95, 0.6 / 1.05);
    let c01 = a0 * a1 / 9.0 * (theta0 - theta1).cos();
    let c02 = a0 * a2 / 7.0 * (theta0 - theta2).cos();
    let c12 = a1 * a2 / 5.0 * (theta1 - theta2).cos();
    Covariance::from_rows(&[
        vec![1.0, c01, c02],
        vec![c01, 1.0, c12],
        vec![c02, c12, 1.0],
    ])
    .unwrap()
}

/// Named covariance, costs and budget for the numerical allocation tests.
fn allocation_cases() -> Vec<(String, Covariance, Vec<f64>, f64)> {
    let (cov3, costs3) = mlmc_example();
    let mut cases = vec![
        ("three models".to_string(), cov3, costs3, 81.0),
        ("four models".to_string(), cov4(), costs4(), 100.0),
    ];
    for theta1 in [0.6, 0.8, 1.0, 1.2, 1.4] {
        cases.push((
            format!("tunable θ1 = {theta1}"),
            tunable(theta1),
            vec![1.0, 0.1, 0.01],
            100.0,
        ));
    }
    cases
}

fn strategies(nmodels: usize) -> Vec<DiscrepancyStrategy> {
    let mut out = vec![
        DiscrepancyStrategy::Nested,
        DiscrepancyStrategy::IndependentSampling,
    ];
    for k in 1..nmodels {
        for l in 1..=k {
            out.push(DiscrepancyStrategy::Partitioned { k, l });
        }
    }
    out
}

fn unrounded() -> AllocationConfig {
    AllocationConfig {
        standardize: false,
        ..Default::default()
    }
}

fn trust_region() -> AllocationConfig {
    AllocationConfig {
        method: OptimMethod::TrustRegion,
        ..Default::default()
    }
}

// ══════════════════════════════════════════════
//  Closed-form allocations
// ══════════════════════════════════════════════

#[test]
fn mlmc_worked_example() {
    let (cov, costs) = mlmc_example();
    let alloc = allocate_samples_mlmc(&cov, &costs, 81.0, true).unwrap();
    assert_relative_eq!(alloc.variance(), 1.0, max_relative = 1e-12);

    // Level counts 9 * sqrt(VarΔ / CostΔ), each model sampled on two levels.
    let level: Vec<f64> = [1.0 / 9.0, 4.0 / 4.0, 4.0 / 1.0]
        .iter()
        .map(|v: &f64| 9.0 * v.sqrt())
        .collect();
    let expected = [level[0], level[0] + level[1], level[1] + level[2]];
    for (n, e) in alloc.samples_per_model().iter().zip(&expected) {
        assert_relative_eq!(*n, *e, max_relative = 1e-12);
    }
    assert_relative_eq!(alloc.cost(&costs), 81.0, max_relative = 1e-12);
}

#[test]
fn mlmc_round_trip() {
    let cov = cov4();
    let costs = costs4();
    let alloc = allocate_samples_mlmc(&cov, &costs, 1000.0, false).unwrap();
    let est = Mlmc::new(cov.clone(), costs.clone()).unwrap();
    let gamma = est.variance_reduction(&alloc.ratios).unwrap();
    assert_relative_eq!(
        gamma,
        alloc.variance() / cov.hf_variance() * alloc.nhf_samples,
        max_relative = 1e-10
    );
    assert_relative_eq!(alloc.cost(&costs), 1000.0, max_relative = 1e-10);
}

#[test]
fn mlmc_two_models_rounded() {
    let cov = Covariance::from_rows(&[vec![2.0, 1.6], vec![1.6, 1.5]]).unwrap();
    let costs = [1.0, 0.1];
    let alloc = allocate_samples_mlmc(&cov, &costs, 10.0, true).unwrap();
    assert_eq!(alloc.nhf_samples.fract(), 0.0);
    let counts = alloc.samples_per_model();
    assert_relative_eq!(counts[1], counts[1].round(), epsilon = 1e-9);
    // Rounding moves each count by at most half a sample.
    assert!(alloc.cost(&costs) <= 10.0 + 0.5 * (1.0 + 0.1) + 1e-12);
}

#[test]
fn mlmc_lagrangian_is_stationary() {
    let (cov, costs) = mlmc_example();
    let est = Mlmc::new(cov.clone(), costs.clone()).unwrap();
    let alloc = allocate_samples_mlmc(&cov, &costs, 81.0, false).unwrap();
    let lambda = mlmc_lagrange_multiplier(&cov, &costs, alloc.nhf_samples).unwrap();
    assert_relative_eq!(lambda, 81.0, max_relative = 1e-12);

    let x: Vec<f64> = std::iter::once(alloc.nhf_samples)
        .chain(alloc.ratios.iter().copied())
        .collect();
    let (_, g) = gradient(
        |xd: &[Dual<f64>]| est.lagrangian(xd, Dual::constant(lambda)).unwrap(),
        &x,
    );
    for gi in g {
        assert!(gi.abs() < 1e-9, "gradient component {gi}");
    }
}

#[test]
fn mlmc_lagrangian_is_stationary_four_models() {
    let cov = cov4();
    let costs = costs4();
    let est = Mlmc::new(cov.clone(), costs.clone()).unwrap();
    let alloc = allocate_samples_mlmc(&cov, &costs, 500.0, false).unwrap();
    let lambda = mlmc_lagrange_multiplier(&cov, &costs, alloc.nhf_samples).unwrap();
    let x: Vec<f64> = std::iter::once(alloc.nhf_samples)
        .chain(alloc.ratios.iter().copied())
        .collect();
    let (_, g) = gradient(
        |xd: &[Dual<f64>]| est.lagrangian(xd, Dual::constant(lambda)).unwrap(),
        &x,
    );
    let scale = est.total_cost(&x).unwrap();
    for gi in g {
        assert!(gi.abs() < 1e-9 * scale, "gradient component {gi}");
    }
}

#[test]
fn mfmc_round_trip() {
    let cov = cov4();
    let costs = costs4();
    let alloc = allocate_samples_mfmc(&cov, &costs, 1000.0, false).unwrap();
    let est = Mfmc::new(cov.clone(), costs.clone()).unwrap();
    let gamma = est.variance_reduction(&alloc.ratios).unwrap();
    assert_relative_eq!(
        gamma,
        alloc.variance() / cov.hf_variance() * alloc.nhf_samples,
        max_relative = 1e-10
    );
    assert_relative_eq!(alloc.cost(&costs), 1000.0, max_relative = 1e-10);
    assert!(alloc.ratios.windows(2).all(|w| w[1] >= w[0]));
}

#[test]
fn mfmc_variance_matches_weighted_estimator() {
    // Var = c00/N0 + Σ (1/N_{k−1} − 1/N_k)(η_k² c_kk + 2 η_k c_0k)
    let cov = cov4();
    let nhf = 10.0;
    let ratios = [2.0, 4.0, 8.0];
    let n: Vec<f64> = std::iter::once(nhf)
        .chain(ratios.iter().map(|r| r * nhf))
        .collect();
    let eta = mfmc_control_variate_weights(&cov);
    let mut var = cov[(0, 0)] / n[0];
    for k in 1..4 {
        let e = eta[k - 1];
        var += (1.0 / n[k - 1] - 1.0 / n[k]) * (e * e * cov[(k, k)] + 2.0 * e * cov[(0, k)]);
    }
    let est = Mfmc::new(cov.clone(), costs4()).unwrap();
    let gamma = est.variance_reduction(&ratios).unwrap();
    assert_relative_eq!(var / cov[(0, 0)] * nhf, gamma, max_relative = 1e-12);
}

#[test]
fn mfmc_requires_ordered_models() {
    let cov = Covariance::from_rows(&[
        vec![1.0, 0.2, 0.5],
        vec![0.2, 1.0, 0.1],
        vec![0.5, 0.1, 1.0],
    ])
    .unwrap();
    assert!(matches!(
        allocate_samples_mfmc(&cov, &[1.0, 0.1, 0.01], 100.0, true),
        Err(AcvError::ModelOrdering { model: 2 })
    ));
}

// ══════════════════════════════════════════════
//  Numerical allocations
// ══════════════════════════════════════════════

#[test]
fn acv_mf_two_models_matches_closed_form() {
    // For two models ACV-MF and MFMC coincide.
    let (cov, costs) = two_models();
    let expected = allocate_samples_mfmc(&cov, &costs, 100.0, false).unwrap();
    let est = Acv::mf(cov, costs).unwrap();
    for method in [OptimMethod::Sqp, OptimMethod::TrustRegion] {
        let config = AllocationConfig {
            method,
            ..unrounded()
        };
        let alloc = allocate_samples_acv(&est, 100.0, None, &config).unwrap();
        assert_relative_eq!(alloc.ratios[0], expected.ratios[0], max_relative = 1e-4);
        assert_relative_eq!(alloc.nhf_samples, expected.nhf_samples, max_relative = 1e-4);
        assert_relative_eq!(
            alloc.log10_variance,
            expected.log10_variance,
            epsilon = 1e-8
        );
    }
}

#[test]
fn acv_improves_on_initial_guess() {
    let cov = cov4();
    let costs = costs4();
    let mlmc = allocate_samples_mlmc(&cov, &costs, 100.0, false).unwrap();
    let x0: Vec<f64> = std::iter::once(mlmc.nhf_samples)
        .chain(mlmc.ratios.iter().copied())
        .collect();
    for est in [Acv::mf(cov.clone(), costs.clone()).unwrap(), Acv::is(cov.clone(), costs.clone()).unwrap()] {
        let alloc = allocate_samples_acv(&est, 100.0, None, &unrounded()).unwrap();
        assert!(alloc.log10_variance <= est.objective(&x0).unwrap() + 1e-10);
        assert_relative_eq!(alloc.cost(&costs), 100.0, max_relative = 1e-6);
    }
}

#[test]
fn rounded_acv_allocation_respects_bounds() {
    let costs = costs4();
    let est = Acv::is(cov4(), costs.clone()).unwrap();
    let alloc = allocate_samples_acv(&est, 100.0, None, &AllocationConfig::default()).unwrap();
    assert!(alloc.nhf_samples >= 1.0);
    assert_eq!(alloc.nhf_samples.fract(), 0.0);
    assert!(alloc.ratios.iter().all(|&r| r >= 1.0));
    for n in alloc.samples_per_model() {
        assert_relative_eq!(n, n.round(), epsilon = 1e-9);
    }
    let slack = 0.5 * costs.iter().sum::<f64>();
    assert!(alloc.cost(&costs) <= 100.0 + slack + 1e-9);
    let x: Vec<f64> = std::iter::once(alloc.nhf_samples)
        .chain(alloc.ratios.iter().copied())
        .collect();
    assert_relative_eq!(alloc.log10_variance, est.objective(&x).unwrap());
}

#[test]
fn solvers_agree_on_optimal_variance() {
    for (name, cov, costs, target) in allocation_cases() {
        for strategy in strategies(cov.nmodels()) {
            let est = Acv::new(cov.clone(), costs.clone(), strategy).unwrap();
            let sqp = allocate_samples_acv(&est, target, None, &unrounded())
                .unwrap_or_else(|e| panic!("{strategy}, {name}, SQP: {e}"));
            let tr = allocate_samples_acv(
                &est,
                target,
                None,
                &AllocationConfig {
                    standardize: false,
                    ..trust_region()
                },
            )
            .unwrap_or_else(|e| panic!("{strategy}, {name}, trust-region: {e}"));
            assert!(
                (sqp.log10_variance - tr.log10_variance).abs() < 1e-4,
                "{strategy}, {name}: SQP {} vs trust-region {}",
                sqp.log10_variance,
                tr.log10_variance
            );
            for alloc in [&sqp, &tr] {
                assert_relative_eq!(alloc.cost(&costs), target, max_relative = 1e-6);
            }
        }
    }
}

#[test]
fn kl_allocation_keeps_ratios_ordered() {
    let est = Acv::kl(cov4(), costs4(), 2, 1).unwrap();
    let alloc = allocate_samples_acv(&est, 100.0, None, &unrounded()).unwrap();
    assert!(alloc.ratios.windows(2).all(|w| w[1] >= w[0] - 1e-8));
}

#[test]
fn best_kl_is_no_worse_than_baseline() {
    for (name, cov, costs, target) in allocation_cases() {
        for config in [AllocationConfig::default(), trust_region()] {
            let mf = Acv::mf(cov.clone(), costs.clone()).unwrap();
            let baseline = allocate_samples_acv(&mf, target, None, &config)
                .unwrap_or_else(|e| panic!("ACV-MF, {name}, {}: {e}", config.method));
            let best = allocate_samples_acv_best_kl(&cov, &costs, target, &config)
                .unwrap_or_else(|e| panic!("best ACV-KL, {name}, {}: {e}", config.method));
            assert!(best.allocation.log10_variance <= baseline.log10_variance);
            assert!(best.allocation.cost(&costs) <= target + config.cost_slack);
            assert_eq!(best.k.is_some(), best.l.is_some());
            if let (Some(k), Some(l)) = (best.k, best.l) {
                assert!(1 <= l && l <= k && k < cov.nmodels());
            }
        }
    }
}

#[test]
fn best_kl_with_trust_region_on_large_budget() {
    let best = allocate_samples_acv_best_kl(&cov4(), &costs4(), 10_000.0, &trust_region()).unwrap();
    assert!(best.allocation.cost(&costs4()) <= 10_000.0 + trust_region().cost_slack);
    assert!(best.allocation.nhf_samples >= 1.0);
}

#[test]
fn best_kl_fails_when_no_configuration_converges() {
    let mut config = AllocationConfig::default();
    config.sqp.convergence.max_iter = 1;
    assert!(matches!(
        allocate_samples_acv_best_kl(&cov4(), &costs4(), 100.0, &config),
        Err(AcvError::OptimizerFailed {
            method: OptimMethod::Sqp,
            ..
        })
    ));
}

#[test]
fn rounded_partition_keeps_every_control_variate() {
    // Rounding the continuous ACV-KL(1,1) optimum can give models 1 and 2 the same
    // number of samples, which silences the second control variate.
    let costs = costs4();
    let est = Acv::kl(cov4(), costs.clone(), 1, 1).unwrap();
    let exact = allocate_samples_acv(&est, 100.0, None, &unrounded()).unwrap();
    let rounded = allocate_samples_acv(&est, 100.0, None, &AllocationConfig::default()).unwrap();

    let counts = rounded.samples_per_model();
    assert!(counts[2] >= counts[1] + 1.0 - 1e-9, "counts {counts:?}");
    assert!(counts[3] >= counts[1] + 1.0 - 1e-9, "counts {counts:?}");
    for n in &counts {
        assert_relative_eq!(*n, n.round(), epsilon = 1e-9);
    }
    assert!(rounded.cost(&costs) <= 100.0 + AllocationConfig::default().cost_slack);
    assert!(
        rounded.log10_variance < exact.log10_variance + 0.1,
        "rounded {} vs exact {}",
        rounded.log10_variance,
        exact.log10_variance
    );
}

#[test]
fn optimizer_failure_names_method() {
    let est = Acv::is(cov4(), costs4()).unwrap();
    let mut config = AllocationConfig::default();
    config.sqp.convergence.max_iter = 1;
    let err = allocate_samples_acv(&est, 100.0, None, &config).unwrap_err();
    assert!(matches!(
        err,
        AcvError::OptimizerFailed {
            method: OptimMethod::Sqp,
            ..
        }
    ));
    assert!(err.to_string().starts_with("SQP optimizer failed"));
}

#[test]
fn invalid_inputs() {
    let est = Acv::is(cov4(), costs4()).unwrap();
    let config = AllocationConfig::default();
    assert!(matches!(
        allocate_samples_acv(&est, 100.0, Some(&[10.0, 2.0][..]), &config),
        Err(AcvError::DimensionMismatch { .. })
    ));
    assert!(matches!(
        allocate_samples_acv(&est, -1.0, None, &config),
        Err(AcvError::InvalidBudget { .. })
    ));
    assert!(matches!(
        allocate_samples_mlmc(&cov4(), &[1.0, 0.1], 100.0, true),
        Err(AcvError::InvalidCosts { .. })
    ));
}

#[test]
fn explicit_initial_guess() {
    let (cov, costs) = two_models();
    let est = Acv::is(cov, costs).unwrap();
    let from_default = allocate_samples_acv(&est, 100.0, None, &unrounded()).unwrap();
    let from_guess =
        allocate_samples_acv(&est, 100.0, Some(&[50.0, 5.0][..]), &unrounded()).unwrap();
    assert_relative_eq!(
        from_default.log10_variance,
        from_guess.log10_variance,
        epsilon = 1e-8
    );
}
