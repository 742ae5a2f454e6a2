//! Sample sets and model evaluations for the ACV-IS, MLMC and MFMC estimators.
//!
//! Every low-fidelity model `i` is evaluated on two sets: `S1_i`, shared with the
//! previous model (or the high-fidelity samples), and its own `S2_i`. How these sets
//! overlap is what distinguishes the estimators.

use ndarray::{concatenate, s, Array2, Axis};

use crate::ensemble::{Model, TaggedModel, TaggedSamples};
use crate::error::{check_len, AcvError, Result};

/// The two sample sets of one model. Model 0 has no `own` set.
#[derive(Debug, Clone, PartialEq)]
pub struct SamplePair {
    /// `S1`: `(nvars, nsamples)`.
    pub shared: Array2<f64>,
    /// `S2`: `(nvars, nsamples)`.
    pub own: Option<Array2<f64>>,
}

/// Model outputs on a [`SamplePair`], each `(nsamples, nqoi)`.
#[derive(Debug, Clone, PartialEq)]
pub struct ValuePair {
    pub shared: Array2<f64>,
    pub own: Option<Array2<f64>>,
}

/// Samples and values for every model, high fidelity first.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleSets {
    pub samples: Vec<SamplePair>,
    pub values: Vec<ValuePair>,
}

/// How the models are evaluated.
#[derive(Clone, Copy)]
pub enum ModelSet<'a> {
    /// One callable per model, evaluated separately.
    Separate(&'a [&'a dyn Model]),
    /// A single callable evaluating tagged samples in one batch.
    Tagged(&'a dyn TaggedModel),
}

impl ModelSet<'_> {
    /// Number of models in the set.
    pub fn nmodels(&self) -> usize {
        match self {
            ModelSet::Separate(models) => models.len(),
            ModelSet::Tagged(model) => model.nmodels(),
        }
    }

    /// Evaluate each `(model_id, samples)` request, returning outputs in the same
    /// order. Tagged models see all requests in one call.
    fn evaluate(&self, requests: &[(usize, &Array2<f64>)]) -> Result<Vec<Array2<f64>>> {
        let outputs: Vec<Array2<f64>> = match self {
            ModelSet::Separate(models) => requests
                .iter()
                .map(|&(id, samples)| models[id].evaluate(samples.view()))
                .collect(),
            ModelSet::Tagged(model) => {
                let nvars = requests.first().map_or(0, |(_, s)| s.nrows());
                let mut tagged = TaggedSamples::new(nvars);
                for &(id, samples) in requests {
                    tagged.push(samples.view(), id)?;
                }
                let values = model.evaluate_tagged(&tagged)?;
                if values.nrows() != tagged.len() {
                    return Err(AcvError::evaluation(format!(
                        "tagged model returned {} rows for {} samples",
                        values.nrows(),
                        tagged.len()
                    )));
                }
                let mut start = 0;
                requests
                    .iter()
                    .map(|(_, samples)| {
                        let end = start + samples.ncols();
                        let block = values.slice(s![start..end, ..]).to_owned();
                        start = end;
                        block
                    })
                    .collect()
            }
        };
        check_outputs(requests, &outputs)?;
        Ok(outputs)
    }
}

fn check_outputs(requests: &[(usize, &Array2<f64>)], outputs: &[Array2<f64>]) -> Result<()> {
    let nqoi = outputs.first().map_or(0, |v| v.ncols());
    for (&(id, samples), values) in requests.iter().zip(outputs) {
        if values.nrows() != samples.ncols() || values.ncols() != nqoi {
            return Err(AcvError::evaluation(format!(
                "model {id} returned a {}x{} block for {} samples, expected {nqoi} QoI",
                values.nrows(),
                values.ncols(),
                samples.ncols()
            )));
        }
    }
    Ok(())
}

/// Whole number of samples `r_i · Nhf` for each low-fidelity model.
fn sample_counts(nhf_samples: usize, ratios: &[f64]) -> Result<Vec<usize>> {
    if nhf_samples == 0 {
        return Err(AcvError::ratios("the number of high-fidelity samples must be positive"));
    }
    ratios
        .iter()
        .enumerate()
        .map(|(i, &r)| {
            if !r.is_finite() || r < 1.0 {
                return Err(AcvError::ratios(format!(
                    "ratio of model {} is {r}, must be at least 1",
                    i + 1
                )));
            }
            let count = r * nhf_samples as f64;
            if (count - count.round()).abs() > 1e-8 * count.max(1.0) {
                return Err(AcvError::NonIntegralSampleCount {
                    model: i + 1,
                    count,
                });
            }
            Ok(count.round() as usize)
        })
        .collect()
}

fn draw(generate: &mut impl FnMut(usize) -> Array2<f64>, n: usize) -> Result<Array2<f64>> {
    let samples = generate(n);
    if samples.ncols() != n {
        return Err(AcvError::evaluation(format!(
            "sample generator returned {} samples, {n} requested",
            samples.ncols()
        )));
    }
    Ok(samples)
}

fn check_models(models: &ModelSet<'_>, ratios: &[f64]) -> Result<()> {
    check_len("models", ratios.len() + 1, models.nmodels())
}

fn leading_rows(values: &Array2<f64>, n: usize) -> Array2<f64> {
    values.slice(s![..n, ..]).to_owned()
}

fn leading_columns(samples: &Array2<f64>, n: usize) -> Array2<f64> {
    samples.slice(s![.., ..n]).to_owned()
}

/// ACV-IS sample sets.
///
/// All models share one core of `Nhf` samples. Model `i` additionally gets
/// `r_i·Nhf − Nhf` independent samples, so `S2_i = [core | extra_i]` and
/// `S1_i = core`. Each model is evaluated once; `V1_i` is the leading block of its
/// outputs.
pub fn generate_samples_and_values_acv_is(
    nhf_samples: usize,
    ratios: &[f64],
    models: ModelSet<'_>,
    mut generate: impl FnMut(usize) -> Array2<f64>,
) -> Result<SampleSets> {
    check_models(&models, ratios)?;
    let counts = sample_counts(nhf_samples, ratios)?;

    let core = draw(&mut generate, nhf_samples)?;
    let mut own_sets = Vec::with_capacity(counts.len());
    for &count in &counts {
        let extra = draw(&mut generate, count - nhf_samples)?;
        let own = concatenate(Axis(1), &[core.view(), extra.view()])
            .map_err(|e| AcvError::evaluation(e.to_string()))?;
        own_sets.push(own);
    }

    let requests: Vec<(usize, &Array2<f64>)> = std::iter::once((0, &core))
        .chain(own_sets.iter().enumerate().map(|(i, s)| (i + 1, s)))
        .collect();
    let mut outputs = models.evaluate(&requests)?.into_iter();
    let hf_values = next_output(&mut outputs)?;

    let mut samples = vec![SamplePair {
        shared: core.clone(),
        own: None,
    }];
    let mut values = vec![ValuePair {
        shared: hf_values,
        own: None,
    }];
    for own in own_sets {
        let v = next_output(&mut outputs)?;
        values.push(ValuePair {
            shared: leading_rows(&v, nhf_samples),
            own: Some(v),
        });
        samples.push(SamplePair {
            shared: core.clone(),
            own: Some(own),
        });
    }
    Ok(SampleSets { samples, values })
}

/// MLMC sample sets.
///
/// `S1_0` has `Nhf` fresh samples, `S1_1 = S1_0` and `S1_i = S2_{i−1}`. Each `S2_i`
/// is fresh, with `r_i·Nhf − |S1_i|` samples, so consecutive levels are coupled and
/// levels are independent of each other.
pub fn generate_samples_and_values_mlmc(
    nhf_samples: usize,
    ratios: &[f64],
    models: ModelSet<'_>,
    mut generate: impl FnMut(usize) -> Array2<f64>,
) -> Result<SampleSets> {
    check_models(&models, ratios)?;
    let counts = sample_counts(nhf_samples, ratios)?;

    let hf = draw(&mut generate, nhf_samples)?;
    let mut pairs: Vec<(Array2<f64>, Array2<f64>)> = Vec::with_capacity(counts.len());
    for (i, &count) in counts.iter().enumerate() {
        let shared = pairs.last().map_or_else(|| hf.clone(), |(_, own)| own.clone());
        if count <= shared.ncols() {
            return Err(AcvError::ratios(format!(
                "model {} needs more than the {} samples it shares with model {i}, got {count}",
                i + 1,
                shared.ncols()
            )));
        }
        let own = draw(&mut generate, count - shared.ncols())?;
        pairs.push((shared, own));
    }

    let mut requests: Vec<(usize, &Array2<f64>)> = vec![(0, &hf)];
    for (i, (shared, own)) in pairs.iter().enumerate() {
        requests.push((i + 1, shared));
        requests.push((i + 1, own));
    }
    let mut outputs = models.evaluate(&requests)?.into_iter();
    let hf_values = next_output(&mut outputs)?;

    let mut samples = vec![SamplePair {
        shared: hf,
        own: None,
    }];
    let mut values = vec![ValuePair {
        shared: hf_values,
        own: None,
    }];
    for (shared, own) in pairs {
        values.push(ValuePair {
            shared: next_output(&mut outputs)?,
            own: Some(next_output(&mut outputs)?),
        });
        samples.push(SamplePair {
            shared,
            own: Some(own),
        });
    }
    Ok(SampleSets { samples, values })
}

/// MFMC sample sets.
///
/// One draw of `max_i r_i·Nhf` samples; `S1_i` and `S2_i` are its leading
/// `r_{i−1}·Nhf` and `r_i·Nhf` columns (`r_0 = 1`). Ratios must be non-decreasing.
/// Each model is evaluated once on `S2_i` and `V1_i` is the leading block.
pub fn generate_samples_and_values_mfmc(
    nhf_samples: usize,
    ratios: &[f64],
    models: ModelSet<'_>,
    mut generate: impl FnMut(usize) -> Array2<f64>,
) -> Result<SampleSets> {
    check_models(&models, ratios)?;
    let counts = sample_counts(nhf_samples, ratios)?;
    if let Some(i) = (1..counts.len()).find(|&i| counts[i] < counts[i - 1]) {
        return Err(AcvError::ratios(format!(
            "MFMC ratios must be non-decreasing, model {} has fewer samples than model {i}",
            i + 1
        )));
    }

    let total = counts.iter().copied().fold(nhf_samples, usize::max);
    let all = draw(&mut generate, total)?;
    let hf = leading_columns(&all, nhf_samples);
    let own_sets: Vec<Array2<f64>> = counts.iter().map(|&c| leading_columns(&all, c)).collect();

    let requests: Vec<(usize, &Array2<f64>)> = std::iter::once((0, &hf))
        .chain(own_sets.iter().enumerate().map(|(i, s)| (i + 1, s)))
        .collect();
    let mut outputs = models.evaluate(&requests)?.into_iter();
    let hf_values = next_output(&mut outputs)?;

    let mut samples = vec![SamplePair {
        shared: hf.clone(),
        own: None,
    }];
    let mut values = vec![ValuePair {
        shared: hf_values,
        own: None,
    }];
    let mut prev = nhf_samples;
    for (own, &count) in own_sets.into_iter().zip(&counts) {
        let v = next_output(&mut outputs)?;
        values.push(ValuePair {
            shared: leading_rows(&v, prev),
            own: Some(v),
        });
        samples.push(SamplePair {
            shared: leading_columns(&own, prev),
            own: Some(own),
        });
        prev = count;
    }
    Ok(SampleSets { samples, values })
}

fn next_output(outputs: &mut impl Iterator<Item = Array2<f64>>) -> Result<Array2<f64>> {
    outputs
        .next()
        .ok_or_else(|| AcvError::evaluation("missing model output"))
}
