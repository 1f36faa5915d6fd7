//! L2-regularized logistic regression fitted by full-batch gradient descent.
//!
//! Features are standardized internally with statistics captured at fit time,
//! so callers pass raw (imputed) features both when fitting and predicting.

use super::{Classifier, sigmoid};
use crate::error::MlError;
use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogisticRegression {
    /// Inverse regularization strength.
    pub c: f64,
    pub max_iter: usize,
    pub learning_rate: f64,
    mean: Array1<f64>,
    scale: Array1<f64>,
    weights: Array1<f64>,
    bias: f64,
}

impl LogisticRegression {
    pub fn new(c: f64, max_iter: usize) -> Self {
        Self {
            c,
            max_iter,
            learning_rate: 0.5,
            mean: Array1::zeros(0),
            scale: Array1::zeros(0),
            weights: Array1::zeros(0),
            bias: 0.0,
        }
    }

    fn standardize(&self, x: &Array2<f64>) -> Array2<f64> {
        (x - &self.mean) / &self.scale
    }
}

impl Default for LogisticRegression {
    fn default() -> Self {
        Self::new(1.0, 300)
    }
}

impl Classifier for LogisticRegression {
    fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>, _seed: u64) -> Result<(), MlError> {
        if self.c <= 0.0 {
            return Err(MlError::training("logistic regression needs C > 0"));
        }
        let n = x.nrows();
        if n == 0 || n != y.len() {
            return Err(MlError::training(format!(
                "logistic regression got {n} rows and {} targets",
                y.len()
            )));
        }
        self.mean = x
            .mean_axis(Axis(0))
            .ok_or_else(|| MlError::training("cannot standardize empty features"))?;
        self.scale = x
            .std_axis(Axis(0), 0.0)
            .mapv(|s| if s > 1e-12 { s } else { 1.0 });
        let z = self.standardize(x);

        let n_f = n as f64;
        let lambda = 1.0 / (self.c * n_f);
        self.weights = Array1::zeros(x.ncols());
        self.bias = 0.0;
        for _ in 0..self.max_iter {
            let logits = z.dot(&self.weights) + self.bias;
            let error = logits.mapv(sigmoid) - y;
            let grad_w = z.t().dot(&error) / n_f + &self.weights * lambda;
            let grad_b = error.sum() / n_f;
            self.weights.scaled_add(-self.learning_rate, &grad_w);
            self.bias -= self.learning_rate * grad_b;
        }
        Ok(())
    }

    fn predict_proba(&self, x: &Array2<f64>) -> Result<Array1<f64>, MlError> {
        if self.weights.is_empty() {
            return Err(MlError::model("logistic regression is not fitted"));
        }
        if x.ncols() != self.weights.len() {
            return Err(MlError::model(format!(
                "model expects {} features, got {}",
                self.weights.len(),
                x.ncols()
            )));
        }
        let logits = self.standardize(x).dot(&self.weights) + self.bias;
        Ok(logits.mapv(sigmoid))
    }

    fn params(&self) -> serde_json::Value {
        serde_json::json!({ "C": self.c, "max_iter": self.max_iter })
    }
}
