use acvmc::Covariance;

// ─── Model hierarchies ─────────────────────────────────────────────────────
// AR(1) correlation ρ^|i−j| with unit variances: correlation with the
// high-fidelity model decays with the index, as MFMC requires.

pub fn ar1_covariance(nmodels: usize, rho: f64) -> Covariance {
    let rows: Vec<Vec<f64>> = (0..nmodels)
        .map(|i| {
            (0..nmodels)
                .map(|j| rho.powi((i as i32 - j as i32).abs()))
                .collect()
        })
        .collect();
    Covariance::from_rows(&rows).unwrap()
}

/// Costs dropping by a factor of ten per model.
pub fn geometric_costs(nmodels: usize) -> Vec<f64> {
    (0..nmodels).map(|i| 10f64.powi(-(i as i32))).collect()
}

/// Feasible scaled allocation `[Nhf, r_1 Nhf, ...]` with increasing ratios.
pub fn sample_point(nmodels: usize) -> Vec<f64> {
    (0..nmodels).map(|i| 10.0 * (1.0 + 2.0 * i as f64)).collect()
}
