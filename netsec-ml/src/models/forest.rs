//! Random forest: bootstrap-sampled Gini trees with per-split feature sampling.

use super::Classifier;
use super::tree::{Criterion, DecisionTree, TreeParams};
use crate::error::MlError;
use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomForest {
    pub n_estimators: usize,
    pub max_depth: Option<usize>,
    trees: Vec<DecisionTree>,
}

impl RandomForest {
    pub fn new(n_estimators: usize, max_depth: Option<usize>) -> Self {
        Self {
            n_estimators,
            max_depth,
            trees: Vec::new(),
        }
    }
}

impl Default for RandomForest {
    fn default() -> Self {
        Self::new(100, None)
    }
}

impl Classifier for RandomForest {
    fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>, seed: u64) -> Result<(), MlError> {
        if self.n_estimators == 0 {
            return Err(MlError::training("random forest needs at least one tree"));
        }
        let n = x.nrows();
        let max_features = ((x.ncols() as f64).sqrt().floor() as usize).max(1);
        let params = TreeParams {
            criterion: Criterion::Gini,
            max_depth: self.max_depth,
            max_features: Some(max_features),
            ..TreeParams::default()
        };
        let weights = Array1::ones(n);
        let mut rng = StdRng::seed_from_u64(seed);

        self.trees.clear();
        for _ in 0..self.n_estimators {
            let sample: Vec<usize> = (0..n).map(|_| rng.gen_range(0..n)).collect();
            let mut tree = DecisionTree::new(params);
            tree.fit_weighted(x, y, &weights, sample, &mut rng)?;
            self.trees.push(tree);
        }
        Ok(())
    }

    fn predict_proba(&self, x: &Array2<f64>) -> Result<Array1<f64>, MlError> {
        if self.trees.is_empty() {
            return Err(MlError::model("random forest is not fitted"));
        }
        let mut total = Array1::zeros(x.nrows());
        for tree in &self.trees {
            total += &tree.predict_values(x)?;
        }
        Ok(total / self.trees.len() as f64)
    }

    fn params(&self) -> serde_json::Value {
        serde_json::json!({
            "n_estimators": self.n_estimators,
            "max_depth": self.max_depth,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array;

    fn separable(n: usize) -> (Array2<f64>, Array1<f64>) {
        let x = Array::from_shape_fn((n, 3), |(i, j)| ((i * 7 + j * 3) % 11) as f64 + i as f64);
        let y = Array1::from_shape_fn(n, |i| if i >= n / 2 { 1.0 } else { 0.0 });
        (x, y)
    }

    #[test]
    fn test_forest_learns_separable_data() {
        let (x, y) = separable(40);
        let mut model = RandomForest::new(15, None);
        model.fit(&x, &y, 3).unwrap();
        let pred = model.predict(&x).unwrap();
        let correct = pred.iter().zip(y.iter()).filter(|(a, b)| a == b).count();
        assert!(correct >= 36, "only {correct} of 40 correct");
    }

    #[test]
    fn test_forest_is_deterministic_for_seed() {
        let (x, y) = separable(30);
        let mut a = RandomForest::new(5, Some(3));
        let mut b = RandomForest::new(5, Some(3));
        a.fit(&x, &y, 11).unwrap();
        b.fit(&x, &y, 11).unwrap();
        assert_eq!(a.predict_proba(&x).unwrap(), b.predict_proba(&x).unwrap());
    }

    #[test]
    fn test_unfitted_forest_errors() {
        let (x, _) = separable(4);
        assert!(RandomForest::default().predict_proba(&x).is_err());
    }
}
