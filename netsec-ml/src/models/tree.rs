//! CART decision trees on dense `f64` features.
//!
//! One builder serves classification (Gini or entropy over 0/1 targets, leaf
//! value = weighted share of class 1) and regression (squared error, leaf
//! value = weighted mean). Nodes are stored flat so fitted trees serialize
//! without recursion.

use super::Classifier;
use crate::error::MlError;
use ndarray::{Array1, Array2, ArrayView1};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

const EPS: f64 = 1e-12;

/// Split quality criterion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Criterion {
    Gini,
    Entropy,
    SquaredError,
}

impl Criterion {
    /// Weighted impurity of a node from its accumulators `(Σw, Σwy, Σwy²)`.
    fn cost(self, w: f64, s: f64, q: f64) -> f64 {
        if w <= EPS {
            return 0.0;
        }
        match self {
            Self::Gini => {
                let p = (s / w).clamp(0.0, 1.0);
                w * 2.0 * p * (1.0 - p)
            }
            Self::Entropy => {
                let p = (s / w).clamp(0.0, 1.0);
                let h = |v: f64| if v <= 0.0 { 0.0 } else { -v * v.log2() };
                w * (h(p) + h(1.0 - p))
            }
            Self::SquaredError => (q - s * s / w).max(0.0),
        }
    }
}

/// Tree growth limits.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TreeParams {
    pub criterion: Criterion,
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    /// Features drawn per split; `None` considers all of them.
    pub max_features: Option<usize>,
}

impl Default for TreeParams {
    fn default() -> Self {
        Self {
            criterion: Criterion::Gini,
            max_depth: None,
            min_samples_split: 2,
            min_samples_leaf: 1,
            max_features: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Node {
    Leaf {
        value: f64,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionTree {
    pub params: TreeParams,
    nodes: Vec<Node>,
    n_features: usize,
}

struct Accum {
    w: f64,
    s: f64,
    q: f64,
}

impl Accum {
    fn over(indices: &[usize], y: &Array1<f64>, weights: &Array1<f64>) -> Self {
        let mut acc = Self {
            w: 0.0,
            s: 0.0,
            q: 0.0,
        };
        for &i in indices {
            acc.add(y[i], weights[i]);
        }
        acc
    }

    fn add(&mut self, y: f64, w: f64) {
        self.w += w;
        self.s += w * y;
        self.q += w * y * y;
    }
}

struct BestSplit {
    feature: usize,
    threshold: f64,
    cost: f64,
}

impl DecisionTree {
    pub fn new(params: TreeParams) -> Self {
        Self {
            params,
            nodes: Vec::new(),
            n_features: 0,
        }
    }

    pub fn is_fitted(&self) -> bool {
        !self.nodes.is_empty()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Fit on the rows named by `indices` (duplicates allowed, as in a
    /// bootstrap sample) with per-row `weights`.
    pub fn fit_weighted(
        &mut self,
        x: &Array2<f64>,
        y: &Array1<f64>,
        weights: &Array1<f64>,
        indices: Vec<usize>,
        rng: &mut StdRng,
    ) -> Result<(), MlError> {
        if x.nrows() != y.len() || y.len() != weights.len() {
            return Err(MlError::training(format!(
                "tree inputs disagree: {} rows, {} targets, {} weights",
                x.nrows(),
                y.len(),
                weights.len()
            )));
        }
        if indices.is_empty() {
            return Err(MlError::training("cannot fit a tree on zero rows"));
        }
        self.nodes.clear();
        self.n_features = x.ncols();

        let mut stack = vec![(0usize, indices, 0usize)];
        self.nodes.push(Node::Leaf { value: 0.0 });
        while let Some((node, rows, depth)) = stack.pop() {
            let acc = Accum::over(&rows, y, weights);
            let value = if acc.w > EPS { acc.s / acc.w } else { 0.0 };
            let parent_cost = self.params.criterion.cost(acc.w, acc.s, acc.q);

            let depth_exhausted = self.params.max_depth.is_some_and(|d| depth >= d);
            let split = if depth_exhausted
                || rows.len() < self.params.min_samples_split.max(2)
                || parent_cost <= EPS
            {
                None
            } else {
                self.best_split(x, y, weights, &rows, parent_cost, rng)
            };

            let Some(split) = split else {
                self.nodes[node] = Node::Leaf { value };
                continue;
            };
            let (left_rows, right_rows): (Vec<usize>, Vec<usize>) = rows
                .into_iter()
                .partition(|&i| x[[i, split.feature]] <= split.threshold);
            let left = self.nodes.len();
            self.nodes.push(Node::Leaf { value });
            let right = self.nodes.len();
            self.nodes.push(Node::Leaf { value });
            self.nodes[node] = Node::Split {
                feature: split.feature,
                threshold: split.threshold,
                left,
                right,
            };
            stack.push((right, right_rows, depth + 1));
            stack.push((left, left_rows, depth + 1));
        }
        Ok(())
    }

    fn best_split(
        &self,
        x: &Array2<f64>,
        y: &Array1<f64>,
        weights: &Array1<f64>,
        rows: &[usize],
        parent_cost: f64,
        rng: &mut StdRng,
    ) -> Option<BestSplit> {
        let mut features: Vec<usize> = (0..x.ncols()).collect();
        if let Some(k) = self.params.max_features {
            features.shuffle(rng);
            features.truncate(k.clamp(1, x.ncols()));
            features.sort_unstable();
        }

        let min_leaf = self.params.min_samples_leaf.max(1);
        let total = Accum::over(rows, y, weights);
        let mut best: Option<BestSplit> = None;
        let mut sorted = rows.to_vec();
        for feature in features {
            sorted.sort_by(|&a, &b| x[[a, feature]].total_cmp(&x[[b, feature]]));
            let mut left = Accum {
                w: 0.0,
                s: 0.0,
                q: 0.0,
            };
            for pos in 0..sorted.len() - 1 {
                let i = sorted[pos];
                left.add(y[i], weights[i]);
                let (here, next) = (x[[i, feature]], x[[sorted[pos + 1], feature]]);
                if here == next || pos + 1 < min_leaf || sorted.len() - pos - 1 < min_leaf {
                    continue;
                }
                let cost = self.params.criterion.cost(left.w, left.s, left.q)
                    + self.params.criterion.cost(
                        total.w - left.w,
                        total.s - left.s,
                        total.q - left.q,
                    );
                let improves = cost < parent_cost + EPS;
                let better = best.as_ref().is_none_or(|b| cost < b.cost - EPS);
                if improves && better {
                    best = Some(BestSplit {
                        feature,
                        threshold: here + (next - here) / 2.0,
                        cost,
                    });
                }
            }
        }
        best
    }

    /// Index of the leaf a row falls into.
    pub fn apply(&self, row: ArrayView1<'_, f64>) -> usize {
        let mut node = 0;
        while let Some(Node::Split {
            feature,
            threshold,
            left,
            right,
        }) = self.nodes.get(node)
        {
            node = if row[*feature] <= *threshold {
                *left
            } else {
                *right
            };
        }
        node
    }

    pub fn predict_row(&self, row: ArrayView1<'_, f64>) -> f64 {
        match self.nodes.get(self.apply(row)) {
            Some(Node::Leaf { value }) => *value,
            _ => 0.0,
        }
    }

    /// Overwrite a leaf's output. Boosting uses this for Newton leaf steps.
    pub fn set_leaf_value(&mut self, leaf: usize, new_value: f64) {
        if let Some(Node::Leaf { value }) = self.nodes.get_mut(leaf) {
            *value = new_value;
        }
    }

    pub(crate) fn check_width(&self, x: &Array2<f64>) -> Result<(), MlError> {
        if !self.is_fitted() {
            return Err(MlError::model("tree is not fitted"));
        }
        if x.ncols() != self.n_features {
            return Err(MlError::model(format!(
                "model expects {} features, got {}",
                self.n_features,
                x.ncols()
            )));
        }
        Ok(())
    }

    pub fn predict_values(&self, x: &Array2<f64>) -> Result<Array1<f64>, MlError> {
        self.check_width(x)?;
        Ok(x.rows().into_iter().map(|r| self.predict_row(r)).collect())
    }
}

/// Single decision tree classifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionTreeClassifier {
    pub tree: DecisionTree,
}

impl DecisionTreeClassifier {
    pub fn new(criterion: Criterion, max_depth: Option<usize>) -> Self {
        Self {
            tree: DecisionTree::new(TreeParams {
                criterion,
                max_depth,
                ..TreeParams::default()
            }),
        }
    }
}

impl Default for DecisionTreeClassifier {
    fn default() -> Self {
        Self::new(Criterion::Gini, None)
    }
}

impl Classifier for DecisionTreeClassifier {
    fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>, seed: u64) -> Result<(), MlError> {
        let weights = Array1::ones(y.len());
        let mut rng = StdRng::seed_from_u64(seed);
        self.tree
            .fit_weighted(x, y, &weights, (0..y.len()).collect(), &mut rng)
    }

    fn predict_proba(&self, x: &Array2<f64>) -> Result<Array1<f64>, MlError> {
        self.tree.predict_values(x)
    }

    fn params(&self) -> serde_json::Value {
        serde_json::json!({
            "criterion": self.tree.params.criterion,
            "max_depth": self.tree.params.max_depth,
        })
    }
}
