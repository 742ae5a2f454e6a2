//! Model evaluation interfaces.
//!
//! Models can be evaluated one at a time ([`Model`]) or in a single batched call on
//! samples tagged with the id of the model that should evaluate them
//! ([`TaggedModel`]). [`ModelEnsemble`] turns a list of per-model functions into a
//! tagged model.

use ndarray::{Array2, ArrayView2, Axis};

use crate::error::{AcvError, Result};

/// A model mapping a `(nvars, nsamples)` block of samples to a `(nsamples, nqoi)`
/// block of outputs.
pub trait Model {
    fn evaluate(&self, samples: ArrayView2<f64>) -> Array2<f64>;
}

impl<F> Model for F
where
    F: Fn(ArrayView2<f64>) -> Array2<f64>,
{
    fn evaluate(&self, samples: ArrayView2<f64>) -> Array2<f64> {
        self(samples)
    }
}

/// Samples from several models gathered into one matrix, each column tagged with
/// the id of the model that evaluates it.
#[derive(Debug, Clone)]
pub struct TaggedSamples {
    samples: Array2<f64>,
    model_ids: Vec<usize>,
}

impl TaggedSamples {
    pub fn new(nvars: usize) -> Self {
        TaggedSamples {
            samples: Array2::zeros((nvars, 0)),
            model_ids: Vec::new(),
        }
    }

    /// Append a batch of samples for `model_id`.
    pub fn push(&mut self, batch: ArrayView2<f64>, model_id: usize) -> Result<()> {
        if batch.nrows() != self.samples.nrows() {
            return Err(AcvError::evaluation(format!(
                "batch has {} variables, expected {}",
                batch.nrows(),
                self.samples.nrows()
            )));
        }
        self.samples
            .append(Axis(1), batch)
            .map_err(|e| AcvError::evaluation(e.to_string()))?;
        self.model_ids
            .extend(std::iter::repeat(model_id).take(batch.ncols()));
        Ok(())
    }

    /// All pushed samples, one column per sample.
    pub fn samples(&self) -> &Array2<f64> {
        &self.samples
    }

    /// Model each sample column is tagged with.
    pub fn model_ids(&self) -> &[usize] {
        &self.model_ids
    }

    /// Number of tagged samples.
    pub fn len(&self) -> usize {
        self.model_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.model_ids.is_empty()
    }
}

/// A collection of models evaluated in one call on tagged samples.
///
/// The output has one row per sample column, in the order the samples were pushed.
pub trait TaggedModel {
    /// Number of distinct model ids this callable accepts.
    fn nmodels(&self) -> usize;

    fn evaluate_tagged(&self, tagged: &TaggedSamples) -> Result<Array2<f64>>;
}

/// Dispatches tagged samples to a list of per-model functions.
pub struct ModelEnsemble {
    models: Vec<Box<dyn Model>>,
}

impl ModelEnsemble {
    pub fn new(models: Vec<Box<dyn Model>>) -> Self {
        ModelEnsemble { models }
    }

    /// The per-model functions, usable as [`crate::ModelSet::Separate`].
    pub fn models(&self) -> Vec<&dyn Model> {
        self.models.iter().map(|m| m.as_ref()).collect()
    }
}

impl TaggedModel for ModelEnsemble {
    fn nmodels(&self) -> usize {
        self.models.len()
    }

    fn evaluate_tagged(&self, tagged: &TaggedSamples) -> Result<Array2<f64>> {
        if let Some(&bad) = tagged.model_ids().iter().find(|&&id| id >= self.models.len()) {
            return Err(AcvError::evaluation(format!(
                "unknown model id {bad} for an ensemble of {} models",
                self.models.len()
            )));
        }

        let mut out: Option<Array2<f64>> = None;
        for (id, model) in self.models.iter().enumerate() {
            let columns: Vec<usize> = tagged
                .model_ids()
                .iter()
                .enumerate()
                .filter(|(_, &m)| m == id)
                .map(|(j, _)| j)
                .collect();
            if columns.is_empty() {
                continue;
            }
            let batch = tagged.samples().select(Axis(1), &columns);
            let values = model.evaluate(batch.view());
            if values.nrows() != columns.len() {
                return Err(AcvError::evaluation(format!(
                    "model {id} returned {} rows for {} samples",
                    values.nrows(),
                    columns.len()
                )));
            }

            let out = out.get_or_insert_with(|| Array2::zeros((tagged.len(), values.ncols())));
            if values.ncols() != out.ncols() {
                return Err(AcvError::evaluation(format!(
                    "model {id} returned {} QoI, expected {}",
                    values.ncols(),
                    out.ncols()
                )));
            }
            for (row, &j) in values.outer_iter().zip(&columns) {
                out.row_mut(j).assign(&row);
            }
        }
        Ok(out.unwrap_or_else(|| Array2::zeros((0, 0))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn ensemble() -> ModelEnsemble {
        ModelEnsemble::new(vec![
            Box::new(|x: ArrayView2<f64>| x.t().mapv(|v| 2.0 * v)),
            Box::new(|x: ArrayView2<f64>| x.t().mapv(|v| -v)),
        ])
    }

    #[test]
    fn scatters_back_in_submission_order() {
        let mut tagged = TaggedSamples::new(1);
        tagged.push(array![[1.0, 2.0]].view(), 1).unwrap();
        tagged.push(array![[3.0]].view(), 0).unwrap();
        tagged.push(array![[4.0]].view(), 1).unwrap();
        assert_eq!(tagged.model_ids(), &[1, 1, 0, 1]);

        let out = ensemble().evaluate_tagged(&tagged).unwrap();
        assert_eq!(out, array![[-1.0], [-2.0], [6.0], [-4.0]]);
    }

    #[test]
    fn unknown_id() {
        let mut tagged = TaggedSamples::new(1);
        tagged.push(array![[1.0]].view(), 5).unwrap();
        assert!(ensemble().evaluate_tagged(&tagged).is_err());
    }

    #[test]
    fn push_checks_nvars() {
        let mut tagged = TaggedSamples::new(2);
        assert!(tagged.push(array![[1.0]].view(), 0).is_err());
        assert!(tagged.is_empty());
    }

    #[test]
    fn wrong_output_rows() {
        let ens = ModelEnsemble::new(vec![Box::new(|_: ArrayView2<f64>| Array2::zeros((1, 1)))]);
        let mut tagged = TaggedSamples::new(1);
        tagged.push(array![[1.0, 2.0]].view(), 0).unwrap();
        assert!(ens.evaluate_tagged(&tagged).is_err());
    }
}
