//! Boosted ensembles: gradient boosting on the log-loss and AdaBoost (SAMME)
//! over decision stumps.

use super::tree::{Criterion, DecisionTree, TreeParams};
use super::{Classifier, sigmoid};
use crate::error::MlError;
use ndarray::{Array1, Array2};
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Clamp for probabilities fed into logs and ratios.
const PROB_EPS: f64 = 1e-12;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradientBoosting {
    pub n_estimators: usize,
    pub learning_rate: f64,
    pub max_depth: usize,
    init_score: f64,
    trees: Vec<DecisionTree>,
}

impl GradientBoosting {
    pub fn new(n_estimators: usize, learning_rate: f64, max_depth: usize) -> Self {
        Self {
            n_estimators,
            learning_rate,
            max_depth,
            init_score: 0.0,
            trees: Vec::new(),
        }
    }

    fn raw_scores(&self, x: &Array2<f64>) -> Result<Array1<f64>, MlError> {
        let mut scores = Array1::from_elem(x.nrows(), self.init_score);
        for tree in &self.trees {
            scores.scaled_add(self.learning_rate, &tree.predict_values(x)?);
        }
        Ok(scores)
    }
}

impl Default for GradientBoosting {
    fn default() -> Self {
        Self::new(100, 0.1, 3)
    }
}

impl Classifier for GradientBoosting {
    fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>, seed: u64) -> Result<(), MlError> {
        if self.n_estimators == 0 || self.learning_rate <= 0.0 {
            return Err(MlError::training(
                "gradient boosting needs n_estimators > 0 and learning_rate > 0",
            ));
        }
        let n = x.nrows();
        if n == 0 {
            return Err(MlError::training("cannot fit gradient boosting on zero rows"));
        }
        let prior = (y.sum() / n as f64).clamp(PROB_EPS, 1.0 - PROB_EPS);
        self.init_score = (prior / (1.0 - prior)).ln();
        self.trees.clear();

        let params = TreeParams {
            criterion: Criterion::SquaredError,
            max_depth: Some(self.max_depth.max(1)),
            ..TreeParams::default()
        };
        let weights = Array1::ones(n);
        let mut rng = StdRng::seed_from_u64(seed);
        let mut scores = Array1::from_elem(n, self.init_score);

        for _ in 0..self.n_estimators {
            let prob = scores.mapv(sigmoid);
            let residual = y - &prob;
            let mut tree = DecisionTree::new(params);
            tree.fit_weighted(x, &residual, &weights, (0..n).collect(), &mut rng)?;

            // One Newton step per leaf: Σ residual / Σ p(1-p).
            let mut leaves: BTreeMap<usize, (f64, f64)> = BTreeMap::new();
            for (i, row) in x.rows().into_iter().enumerate() {
                let entry = leaves.entry(tree.apply(row)).or_default();
                entry.0 += residual[i];
                entry.1 += prob[i] * (1.0 - prob[i]);
            }
            for (leaf, (num, den)) in &leaves {
                let step = if *den < PROB_EPS { 0.0 } else { num / den };
                tree.set_leaf_value(*leaf, step);
            }

            scores.scaled_add(self.learning_rate, &tree.predict_values(x)?);
            self.trees.push(tree);
        }
        Ok(())
    }

    fn predict_proba(&self, x: &Array2<f64>) -> Result<Array1<f64>, MlError> {
        if self.trees.is_empty() {
            return Err(MlError::model("gradient boosting is not fitted"));
        }
        Ok(self.raw_scores(x)?.mapv(sigmoid))
    }

    fn params(&self) -> serde_json::Value {
        serde_json::json!({
            "n_estimators": self.n_estimators,
            "learning_rate": self.learning_rate,
            "max_depth": self.max_depth,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdaBoost {
    pub n_estimators: usize,
    pub learning_rate: f64,
    stumps: Vec<DecisionTree>,
    alphas: Vec<f64>,
}

impl AdaBoost {
    pub fn new(n_estimators: usize, learning_rate: f64) -> Self {
        Self {
            n_estimators,
            learning_rate,
            stumps: Vec::new(),
            alphas: Vec::new(),
        }
    }

    /// Signed vote: positive favours class 1.
    fn decision(&self, x: &Array2<f64>) -> Result<Array1<f64>, MlError> {
        let mut score = Array1::zeros(x.nrows());
        for (stump, alpha) in self.stumps.iter().zip(&self.alphas) {
            let votes = stump
                .predict_values(x)?
                .mapv(|p| if p >= 0.5 { 1.0 } else { -1.0 });
            score.scaled_add(*alpha, &votes);
        }
        Ok(score)
    }
}

impl Default for AdaBoost {
    fn default() -> Self {
        Self::new(50, 1.0)
    }
}

impl Classifier for AdaBoost {
    fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>, seed: u64) -> Result<(), MlError> {
        if self.n_estimators == 0 || self.learning_rate <= 0.0 {
            return Err(MlError::training(
                "AdaBoost needs n_estimators > 0 and learning_rate > 0",
            ));
        }
        let n = x.nrows();
        if n == 0 {
            return Err(MlError::training("cannot fit AdaBoost on zero rows"));
        }
        let params = TreeParams {
            criterion: Criterion::Gini,
            max_depth: Some(1),
            ..TreeParams::default()
        };
        let mut weights = Array1::from_elem(n, 1.0 / n as f64);
        let mut rng = StdRng::seed_from_u64(seed);
        self.stumps.clear();
        self.alphas.clear();

        for _ in 0..self.n_estimators {
            let mut stump = DecisionTree::new(params);
            stump.fit_weighted(x, y, &weights, (0..n).collect(), &mut rng)?;
            let predicted = stump.predict_values(x)?.mapv(|p| if p >= 0.5 { 1.0 } else { 0.0 });
            let miss: Array1<f64> = predicted
                .iter()
                .zip(y.iter())
                .map(|(p, t)| if p == t { 0.0 } else { 1.0 })
                .collect();
            let error = (&weights * &miss).sum() / weights.sum();

            if error <= PROB_EPS {
                // A perfect stump decides alone.
                self.stumps.push(stump);
                self.alphas.push(1.0);
                break;
            }
            if error >= 0.5 {
                if self.stumps.is_empty() {
                    self.stumps.push(stump);
                    self.alphas.push(1.0);
                }
                break;
            }

            let alpha = self.learning_rate * ((1.0 - error) / error).ln();
            weights = &weights * &miss.mapv(|m| (alpha * m).exp());
            let total = weights.sum();
            weights /= total;
            self.stumps.push(stump);
            self.alphas.push(alpha);
        }
        Ok(())
    }

    fn predict_proba(&self, x: &Array2<f64>) -> Result<Array1<f64>, MlError> {
        if self.stumps.is_empty() {
            return Err(MlError::model("AdaBoost is not fitted"));
        }
        let total: f64 = self.alphas.iter().sum();
        let scale = if total > 0.0 { total } else { 1.0 };
        Ok(self.decision(x)?.mapv(|s| sigmoid(2.0 * s / scale)))
    }

    fn params(&self) -> serde_json::Value {
        serde_json::json!({
            "n_estimators": self.n_estimators,
            "learning_rate": self.learning_rate,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn data() -> (Array2<f64>, Array1<f64>) {
        let x = array![
            [1.0, 0.0],
            [2.0, 1.0],
            [3.0, 0.0],
            [4.0, 1.0],
            [5.0, 0.0],
            [6.0, 1.0],
            [7.0, 0.0],
            [8.0, 1.0],
        ];
        let y = array![0.0, 0.0, 0.0, 1.0, 0.0, 1.0, 1.0, 1.0];
        (x, y)
    }

    fn accuracy(model: &impl Classifier, x: &Array2<f64>, y: &Array1<f64>) -> f64 {
        let pred = model.predict(x).unwrap();
        pred.iter().zip(y.iter()).filter(|(a, b)| a == b).count() as f64 / y.len() as f64
    }

    #[test]
    fn test_gradient_boosting_fits() {
        let (x, y) = data();
        let mut model = GradientBoosting::new(50, 0.3, 2);
        model.fit(&x, &y, 0).unwrap();
        assert_eq!(accuracy(&model, &x, &y), 1.0);
        let proba = model.predict_proba(&x).unwrap();
        assert!(proba.iter().all(|p| (0.0..=1.0).contains(p)));
    }

    #[test]
    fn test_gradient_boosting_rejects_bad_params() {
        let (x, y) = data();
        let mut model = GradientBoosting::new(0, 0.1, 3);
        assert!(matches!(model.fit(&x, &y, 0), Err(MlError::Training(_))));
    }

    #[test]
    fn test_adaboost_beats_single_stump() {
        let (x, y) = data();
        let mut stump = AdaBoost::new(1, 1.0);
        stump.fit(&x, &y, 0).unwrap();
        let mut boosted = AdaBoost::new(30, 1.0);
        boosted.fit(&x, &y, 0).unwrap();
        assert!(accuracy(&boosted, &x, &y) >= accuracy(&stump, &x, &y));
        assert!(accuracy(&boosted, &x, &y) >= 0.875);
    }

    #[test]
    fn test_adaboost_perfect_stump_stops_early() {
        let x = array![[0.0], [1.0], [2.0], [3.0]];
        let y = array![0.0, 0.0, 1.0, 1.0];
        let mut model = AdaBoost::default();
        model.fit(&x, &y, 0).unwrap();
        assert_eq!(model.stumps.len(), 1);
        assert_eq!(model.predict(&x).unwrap(), y);
    }
}
