//! Model trainer stage: fit every candidate family, pick one, package it.

use crate::artifacts::{CandidateReport, DataTransformationArtifact, ModelTrainerArtifact};
use crate::config::{ModelTrainerConfig, TieBreak};
use crate::data::arrays::load_array;
use crate::data::transform::Preprocessor;
use crate::error::MlError;
use crate::models::{CandidateModel, Classifier, ModelFamily};
use crate::training::estimator::NetworkModel;
use crate::training::metrics::{ClassificationMetric, get_classification_score};
use crate::training::reproducibility::SeedManager;
use crate::training::tracking::{ExperimentTracker, TrackedRun};
use ndarray::{Array1, Array2, Axis, s};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use std::sync::Arc;

/// Score differences at or below this count as ties.
const SCORE_TOLERANCE: f64 = 1e-12;

pub const FINAL_MODEL_FILE_NAME: &str = "model.json";
pub const FINAL_PREPROCESSOR_FILE_NAME: &str = "preprocessor.json";

/// Knobs of the selection procedure.
#[derive(Debug, Clone, Copy)]
pub struct SelectionOptions {
    pub seed: u64,
    pub cv_folds: usize,
    pub tie_break: TieBreak,
}

/// A fitted candidate with its held-out score.
#[derive(Debug, Clone)]
pub struct EvaluatedCandidate {
    pub model: CandidateModel,
    pub test_metric: ClassificationMetric,
}

/// Outcome of [`evaluate_models`].
#[derive(Debug, Clone)]
pub struct ModelSelection {
    pub candidates: Vec<EvaluatedCandidate>,
    pub best_index: usize,
}

impl ModelSelection {
    pub fn best(&self) -> &EvaluatedCandidate {
        &self.candidates[self.best_index]
    }
}

/// Split a `[features | target]` array.
pub fn split_features_target(array: &Array2<f64>) -> Result<(Array2<f64>, Array1<f64>), MlError> {
    if array.ncols() < 2 {
        return Err(MlError::training(format!(
            "transformed array has {} columns; need features and a target",
            array.ncols()
        )));
    }
    let last = array.ncols() - 1;
    Ok((
        array.slice(s![.., ..last]).to_owned(),
        array.column(last).to_owned(),
    ))
}

/// Labels must be 0/1; the training split must hold both classes.
pub fn check_labels(y_train: &Array1<f64>, y_test: &Array1<f64>) -> Result<(), MlError> {
    if y_train.is_empty() {
        return Err(MlError::training("training split is empty"));
    }
    if y_test.is_empty() {
        return Err(MlError::training("test split is empty"));
    }
    if let Some(bad) = y_train
        .iter()
        .chain(y_test.iter())
        .find(|v| **v != 0.0 && **v != 1.0)
    {
        return Err(MlError::training(format!(
            "target must be binary (0/1 after mapping -1 to 0), found {bad}"
        )));
    }
    let positives = y_train.iter().filter(|v| **v == 1.0).count();
    if positives == 0 || positives == y_train.len() {
        return Err(MlError::training(format!(
            "training split has a single class ({} rows); need at least two classes",
            y_train.len()
        )));
    }
    Ok(())
}

/// Seeded k-fold partition of `0..n` as `(fit, holdout)` index pairs.
pub fn kfold_indices(n: usize, k: usize, seed: u64) -> Vec<(Vec<usize>, Vec<usize>)> {
    let k = k.min(n);
    if k < 2 {
        return Vec::new();
    }
    let mut order: Vec<usize> = (0..n).collect();
    order.shuffle(&mut StdRng::seed_from_u64(seed));
    let (base, extra) = (n / k, n % k);
    let mut folds = Vec::with_capacity(k);
    let mut start = 0;
    for fold in 0..k {
        let len = base + usize::from(fold < extra);
        let holdout = order[start..start + len].to_vec();
        let fit: Vec<usize> = order[..start]
            .iter()
            .chain(&order[start + len..])
            .copied()
            .collect();
        folds.push((fit, holdout));
        start += len;
    }
    folds
}

fn cross_validated_f1(
    model: &CandidateModel,
    x: &Array2<f64>,
    y: &Array1<f64>,
    folds: &[(Vec<usize>, Vec<usize>)],
    seed: u64,
) -> Result<f64, MlError> {
    let mut total = 0.0;
    for (fit_idx, holdout_idx) in folds {
        let mut candidate = model.clone();
        candidate.fit(
            &x.select(Axis(0), fit_idx),
            &y.select(Axis(0), fit_idx),
            seed,
        )?;
        let predicted = candidate.predict(&x.select(Axis(0), holdout_idx))?;
        total += get_classification_score(&y.select(Axis(0), holdout_idx), &predicted)?.f1_score;
    }
    Ok(total / folds.len() as f64)
}

/// Pick a family's configuration: the best grid point by mean CV F1
/// (first-seen on ties), or the default when tuning is off.
fn tune_family(
    family: ModelFamily,
    x: &Array2<f64>,
    y: &Array1<f64>,
    folds: &[(Vec<usize>, Vec<usize>)],
    seed: u64,
) -> Result<CandidateModel, MlError> {
    if folds.is_empty() {
        return Ok(CandidateModel::default_for(family));
    }
    let mut best: Option<(f64, CandidateModel)> = None;
    for candidate in CandidateModel::grid(family) {
        let score = cross_validated_f1(&candidate, x, y, folds, seed)?;
        tracing::debug!(
            family = %family,
            params = %candidate.params(),
            cv_f1 = score,
            "Grid point scored"
        );
        let better = best
            .as_ref()
            .is_none_or(|(b, _)| score > b + SCORE_TOLERANCE);
        if better {
            best = Some((score, candidate));
        }
    }
    best.map(|(_, m)| m)
        .ok_or_else(|| MlError::training(format!("no grid points for {family}")))
}

/// `true` when `challenger` should replace `incumbent`.
fn outranks(
    challenger: &ClassificationMetric,
    incumbent: &ClassificationMetric,
    tie_break: TieBreak,
) -> bool {
    let diff = challenger.f1_score - incumbent.f1_score;
    if diff > SCORE_TOLERANCE {
        return true;
    }
    if diff < -SCORE_TOLERANCE {
        return false;
    }
    match tie_break {
        TieBreak::Precision => {
            challenger.precision_score > incumbent.precision_score + SCORE_TOLERANCE
        }
        TieBreak::Recall => challenger.recall_score > incumbent.recall_score + SCORE_TOLERANCE,
        TieBreak::FirstSeen => false,
    }
}

/// Index of the winning metric: highest F1, then `tie_break`, then order.
pub fn select_best(metrics: &[ClassificationMetric], tie_break: TieBreak) -> Option<usize> {
    let mut best: Option<usize> = None;
    for (i, metric) in metrics.iter().enumerate() {
        let replace = match best {
            None => true,
            Some(b) => outranks(metric, &metrics[b], tie_break),
        };
        if replace {
            best = Some(i);
        }
    }
    best
}

/// Fit every family on the training split and score it on the test split.
pub fn evaluate_models(
    x_train: &Array2<f64>,
    y_train: &Array1<f64>,
    x_test: &Array2<f64>,
    y_test: &Array1<f64>,
    options: SelectionOptions,
) -> Result<ModelSelection, MlError> {
    let mut seeds = SeedManager::new(options.seed);
    let folds = kfold_indices(x_train.nrows(), options.cv_folds, seeds.get_seed("cv"));

    let mut candidates = Vec::with_capacity(ModelFamily::ALL.len());
    for family in ModelFamily::ALL {
        let seed = seeds.get_seed(&format!("{family:?}"));
        let mut model = tune_family(family, x_train, y_train, &folds, seed)?;
        model.fit(x_train, y_train, seed)?;
        let predicted = model.predict(x_test)?;
        let test_metric = get_classification_score(y_test, &predicted)?;
        tracing::debug!(
            family = %family,
            f1 = test_metric.f1_score,
            precision = test_metric.precision_score,
            recall = test_metric.recall_score,
            "Candidate evaluated"
        );
        candidates.push(EvaluatedCandidate { model, test_metric });
    }

    let metrics: Vec<ClassificationMetric> = candidates.iter().map(|c| c.test_metric).collect();
    let best_index = select_best(&metrics, options.tie_break)
        .ok_or_else(|| MlError::training("no candidate models were evaluated"))?;
    Ok(ModelSelection {
        candidates,
        best_index,
    })
}

/// Model trainer stage.
pub struct ModelTrainer {
    config: ModelTrainerConfig,
    transformation_artifact: DataTransformationArtifact,
    tracker: Arc<dyn ExperimentTracker>,
}

impl ModelTrainer {
    pub fn new(
        config: ModelTrainerConfig,
        transformation_artifact: DataTransformationArtifact,
        tracker: Arc<dyn ExperimentTracker>,
    ) -> Self {
        Self {
            config,
            transformation_artifact,
            tracker,
        }
    }

    fn selection_options(&self) -> SelectionOptions {
        SelectionOptions {
            seed: self.config.seed,
            cv_folds: self.config.cv_folds,
            tie_break: self.config.tie_break,
        }
    }

    fn report_diagnostics(
        &self,
        family: ModelFamily,
        train: &ClassificationMetric,
        test: &ClassificationMetric,
    ) {
        if test.f1_score < self.config.expected_score {
            tracing::warn!(
                family = %family,
                f1 = test.f1_score,
                expected = self.config.expected_score,
                "Best model is below the expected score"
            );
        }
        let gap = (train.f1_score - test.f1_score).abs();
        if gap > self.config.overfitting_threshold {
            tracing::warn!(
                family = %family,
                train_f1 = train.f1_score,
                test_f1 = test.f1_score,
                threshold = self.config.overfitting_threshold,
                "Train/test F1 gap suggests over- or underfitting"
            );
        }
    }

    /// Log the run; failures are returned as text, never raised.
    async fn track(&self, run: &TrackedRun) -> Option<String> {
        match self.tracker.log_run(run).await {
            Ok(()) => None,
            Err(e) => {
                tracing::warn!(
                    tracker = self.tracker.name(),
                    error = %e,
                    "Experiment tracking failed; continuing"
                );
                Some(e.to_string())
            }
        }
    }

    pub async fn initiate_model_trainer(&self) -> Result<ModelTrainerArtifact, MlError> {
        let train = load_array(&self.transformation_artifact.transformed_train_file_path)?;
        let test = load_array(&self.transformation_artifact.transformed_test_file_path)?;
        let (x_train, y_train) = split_features_target(&train)?;
        let (x_test, y_test) = split_features_target(&test)?;
        if x_train.ncols() != x_test.ncols() {
            return Err(MlError::training(format!(
                "train has {} features, test has {}",
                x_train.ncols(),
                x_test.ncols()
            )));
        }
        check_labels(&y_train, &y_test)?;
        let preprocessor =
            Preprocessor::load(&self.transformation_artifact.transformed_object_file_path)?;

        let options = self.selection_options();
        let (selection, x_train, y_train) = tokio::task::spawn_blocking(move || {
            evaluate_models(&x_train, &y_train, &x_test, &y_test, options)
                .map(|selection| (selection, x_train, y_train))
        })
        .await
        .map_err(|e| MlError::training(format!("candidate fitting task failed: {e}")))??;

        let best = selection.best();
        let family = best.model.family();
        let train_metric = get_classification_score(&y_train, &best.model.predict(&x_train)?)?;
        let test_metric = best.test_metric;
        tracing::info!(
            family = %family,
            train_f1 = train_metric.f1_score,
            test_f1 = test_metric.f1_score,
            "Best model selected"
        );
        self.report_diagnostics(family, &train_metric, &test_metric);

        let network_model = NetworkModel::new(preprocessor, best.model.clone());
        network_model.save(&self.config.trained_model_file_path)?;
        network_model.save(&self.config.final_model_dir.join(FINAL_MODEL_FILE_NAME))?;
        network_model
            .preprocessor
            .save(&self.config.final_model_dir.join(FINAL_PREPROCESSOR_FILE_NAME))?;

        let tracking_error = self
            .track(&TrackedRun {
                run_name: format!("{family:?}").to_lowercase(),
                model_family: family,
                params: best.model.params(),
                train_metric,
                test_metric,
                model_path: self.config.trained_model_file_path.clone(),
            })
            .await;

        let candidate_reports = selection
            .candidates
            .iter()
            .map(|c| CandidateReport {
                family: c.model.family(),
                params: c.model.params(),
                test_metric: c.test_metric,
            })
            .collect();

        Ok(ModelTrainerArtifact {
            trained_model_file_path: self.config.trained_model_file_path.clone(),
            model_family: family,
            train_metric_artifact: train_metric,
            test_metric_artifact: test_metric,
            tie_break: self.config.tie_break,
            candidate_reports,
            tracking_error,
        })
    }
}
