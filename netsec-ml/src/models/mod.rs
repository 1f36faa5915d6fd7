//! Candidate classifier families.
//!
//! Every family implements [`Classifier`]; the trainer handles them through
//! the closed [`CandidateModel`] enum, selected by [`ModelFamily`] tag.

pub mod boosting;
pub mod forest;
pub mod logistic;
pub mod tree;

pub use boosting::{AdaBoost, GradientBoosting};
pub use forest::RandomForest;
pub use logistic::LogisticRegression;
pub use tree::{Criterion, DecisionTreeClassifier};

use crate::error::MlError;
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Binary classifier over dense features. Class labels are `0.0` and `1.0`.
pub trait Classifier {
    fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>, seed: u64) -> Result<(), MlError>;

    /// Probability of class 1 per row.
    fn predict_proba(&self, x: &Array2<f64>) -> Result<Array1<f64>, MlError>;

    fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>, MlError> {
        Ok(self
            .predict_proba(x)?
            .mapv(|p| if p >= 0.5 { 1.0 } else { 0.0 }))
    }

    /// Hyperparameters as a JSON object.
    fn params(&self) -> serde_json::Value;
}

pub(crate) fn sigmoid(z: f64) -> f64 {
    if z >= 0.0 {
        1.0 / (1.0 + (-z).exp())
    } else {
        let e = z.exp();
        e / (1.0 + e)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelFamily {
    RandomForest,
    DecisionTree,
    GradientBoosting,
    AdaBoost,
    LogisticRegression,
}

impl ModelFamily {
    /// Candidate order; also the first-seen order used to break ties.
    pub const ALL: [ModelFamily; 5] = [
        Self::RandomForest,
        Self::DecisionTree,
        Self::GradientBoosting,
        Self::AdaBoost,
        Self::LogisticRegression,
    ];

    pub fn display_name(self) -> &'static str {
        match self {
            Self::RandomForest => "Random Forest",
            Self::DecisionTree => "Decision Tree",
            Self::GradientBoosting => "Gradient Boosting",
            Self::LogisticRegression => "Logistic Regression",
            Self::AdaBoost => "AdaBoost",
        }
    }
}

impl fmt::Display for ModelFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// One configured (and possibly fitted) candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "family", content = "model", rename_all = "snake_case")]
pub enum CandidateModel {
    RandomForest(RandomForest),
    DecisionTree(DecisionTreeClassifier),
    GradientBoosting(GradientBoosting),
    LogisticRegression(LogisticRegression),
    AdaBoost(AdaBoost),
}

impl CandidateModel {
    /// The family's default configuration.
    pub fn default_for(family: ModelFamily) -> Self {
        match family {
            ModelFamily::RandomForest => Self::RandomForest(RandomForest::default()),
            ModelFamily::DecisionTree => Self::DecisionTree(DecisionTreeClassifier::default()),
            ModelFamily::GradientBoosting => Self::GradientBoosting(GradientBoosting::default()),
            ModelFamily::LogisticRegression => {
                Self::LogisticRegression(LogisticRegression::default())
            }
            ModelFamily::AdaBoost => Self::AdaBoost(AdaBoost::default()),
        }
    }

    /// Small fixed tuning grid for a family, in evaluation order.
    pub fn grid(family: ModelFamily) -> Vec<Self> {
        match family {
            ModelFamily::RandomForest => [32, 64, 128]
                .into_iter()
                .map(|n| Self::RandomForest(RandomForest::new(n, None)))
                .collect(),
            ModelFamily::DecisionTree => [Criterion::Gini, Criterion::Entropy]
                .into_iter()
                .map(|c| Self::DecisionTree(DecisionTreeClassifier::new(c, None)))
                .collect(),
            ModelFamily::GradientBoosting => {
                let mut grid = Vec::new();
                for learning_rate in [0.1, 0.05] {
                    for n_estimators in [32, 64] {
                        grid.push(Self::GradientBoosting(GradientBoosting::new(
                            n_estimators,
                            learning_rate,
                            3,
                        )));
                    }
                }
                grid
            }
            ModelFamily::LogisticRegression => [1.0, 0.1]
                .into_iter()
                .map(|c| Self::LogisticRegression(LogisticRegression::new(c, 300)))
                .collect(),
            ModelFamily::AdaBoost => {
                let mut grid = Vec::new();
                for learning_rate in [1.0, 0.5] {
                    for n_estimators in [32, 64] {
                        grid.push(Self::AdaBoost(AdaBoost::new(n_estimators, learning_rate)));
                    }
                }
                grid
            }
        }
    }

    pub fn family(&self) -> ModelFamily {
        match self {
            Self::RandomForest(_) => ModelFamily::RandomForest,
            Self::DecisionTree(_) => ModelFamily::DecisionTree,
            Self::GradientBoosting(_) => ModelFamily::GradientBoosting,
            Self::LogisticRegression(_) => ModelFamily::LogisticRegression,
            Self::AdaBoost(_) => ModelFamily::AdaBoost,
        }
    }

    fn inner(&self) -> &dyn Classifier {
        match self {
            Self::RandomForest(m) => m,
            Self::DecisionTree(m) => m,
            Self::GradientBoosting(m) => m,
            Self::LogisticRegression(m) => m,
            Self::AdaBoost(m) => m,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn Classifier {
        match self {
            Self::RandomForest(m) => m,
            Self::DecisionTree(m) => m,
            Self::GradientBoosting(m) => m,
            Self::LogisticRegression(m) => m,
            Self::AdaBoost(m) => m,
        }
    }
}

impl Classifier for CandidateModel {
    fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>, seed: u64) -> Result<(), MlError> {
        self.inner_mut().fit(x, y, seed)
    }

    fn predict_proba(&self, x: &Array2<f64>) -> Result<Array1<f64>, MlError> {
        self.inner().predict_proba(x)
    }

    fn params(&self) -> serde_json::Value {
        self.inner().params()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_every_family_fits_and_predicts() {
        let x = array![[0.0, 1.0], [1.0, 0.0], [2.0, 1.0], [3.0, 0.0], [4.0, 1.0], [5.0, 0.0]];
        let y = array![0.0, 0.0, 0.0, 1.0, 1.0, 1.0];
        for family in ModelFamily::ALL {
            let mut model = CandidateModel::default_for(family);
            assert_eq!(model.family(), family);
            model.fit(&x, &y, 42).unwrap();
            let pred = model.predict(&x).unwrap();
            assert_eq!(pred.len(), 6, "{family}");
            assert!(pred.iter().all(|p| *p == 0.0 || *p == 1.0));
        }
    }

    #[test]
    fn test_candidate_order() {
        assert_eq!(
            ModelFamily::ALL,
            [
                ModelFamily::RandomForest,
                ModelFamily::DecisionTree,
                ModelFamily::GradientBoosting,
                ModelFamily::AdaBoost,
                ModelFamily::LogisticRegression,
            ]
        );
    }

    #[test]
    fn test_grids_are_non_empty_and_tagged() {
        for family in ModelFamily::ALL {
            let grid = CandidateModel::grid(family);
            assert!(!grid.is_empty());
            assert!(grid.iter().all(|m| m.family() == family));
        }
    }

    #[test]
    fn test_serialized_tag_selects_family() {
        let model = CandidateModel::default_for(ModelFamily::AdaBoost);
        let json = serde_json::to_value(&model).unwrap();
        assert_eq!(json["family"], "ada_boost");
        let back: CandidateModel = serde_json::from_value(json).unwrap();
        assert_eq!(back.family(), ModelFamily::AdaBoost);
    }

    #[test]
    fn test_sigmoid_is_stable() {
        assert_eq!(sigmoid(0.0), 0.5);
        assert!(sigmoid(-1000.0) >= 0.0);
        assert!(sigmoid(1000.0) <= 1.0);
    }
}
