//! Best-effort experiment tracking.
//!
//! Trackers report failures as errors; the trainer decides they are not fatal.

use crate::config::{TrackingBackend, TrackingSettings};
use crate::error::MlError;
use crate::models::ModelFamily;
use crate::training::metrics::ClassificationMetric;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Everything a tracker records about one training run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedRun {
    pub run_name: String,
    pub model_family: ModelFamily,
    pub params: serde_json::Value,
    pub train_metric: ClassificationMetric,
    pub test_metric: ClassificationMetric,
    pub model_path: PathBuf,
}

impl TrackedRun {
    /// Flat metric names as logged: `train_f1_score`, `test_recall_score`, ...
    pub fn metrics(&self) -> BTreeMap<String, f64> {
        let mut out = BTreeMap::new();
        for (split, m) in [("train", &self.train_metric), ("test", &self.test_metric)] {
            out.insert(format!("{split}_f1_score"), m.f1_score);
            out.insert(format!("{split}_precision_score"), m.precision_score);
            out.insert(format!("{split}_recall_score"), m.recall_score);
        }
        out
    }

    /// Hyperparameters flattened to strings.
    pub fn param_strings(&self) -> BTreeMap<String, String> {
        let mut out = BTreeMap::new();
        out.insert("model_family".to_string(), self.model_family.to_string());
        if let Some(obj) = self.params.as_object() {
            for (k, v) in obj {
                let value = match v {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                out.insert(k.clone(), value);
            }
        }
        out
    }
}

#[async_trait]
pub trait ExperimentTracker: Send + Sync {
    fn name(&self) -> &str;

    async fn log_run(&self, run: &TrackedRun) -> Result<(), MlError>;
}

/// Tracking disabled.
pub struct NoopTracker;

#[async_trait]
impl ExperimentTracker for NoopTracker {
    fn name(&self) -> &str {
        "none"
    }

    async fn log_run(&self, _run: &TrackedRun) -> Result<(), MlError> {
        Ok(())
    }
}

/// One run in the local registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentRecord {
    pub id: String,
    pub experiment: String,
    pub run_name: String,
    pub model_family: ModelFamily,
    pub params: serde_json::Value,
    pub metrics: BTreeMap<String, f64>,
    /// Where the trainer wrote the model.
    pub model_path: PathBuf,
    /// Copy kept next to the registry; survives deletion of the run directory.
    pub model_artifact: PathBuf,
    pub model_sha256: String,
    pub created_at: DateTime<Utc>,
}

/// JSON file of all locally tracked runs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExperimentRegistry {
    pub experiments: Vec<ExperimentRecord>,
}

impl ExperimentRegistry {
    pub fn load(path: &Path) -> Result<Self, MlError> {
        Ok(crate::persistence::read_json_artifact(path)?.unwrap_or_default())
    }

    pub fn save(&self, path: &Path) -> Result<(), MlError> {
        crate::persistence::write_json_artifact(path, self)
    }

    pub fn find_by_family(&self, family: ModelFamily) -> Vec<&ExperimentRecord> {
        self.experiments
            .iter()
            .filter(|e| e.model_family == family)
            .collect()
    }
}

/// Appends runs to a JSON registry file and keeps a copy of each logged model
/// under `<registry dir>/models/<run id>/`.
pub struct LocalTracker {
    registry_path: PathBuf,
    experiment: String,
}

impl LocalTracker {
    pub fn new(registry_path: impl Into<PathBuf>, experiment: &str) -> Self {
        Self {
            registry_path: registry_path.into(),
            experiment: experiment.to_string(),
        }
    }

    pub fn models_dir(&self) -> PathBuf {
        self.registry_path
            .parent()
            .map(|p| p.join("models"))
            .unwrap_or_else(|| PathBuf::from("models"))
    }
}

#[async_trait]
impl ExperimentTracker for LocalTracker {
    fn name(&self) -> &str {
        "local"
    }

    async fn log_run(&self, run: &TrackedRun) -> Result<(), MlError> {
        let path = self.registry_path.clone();
        let id = uuid::Uuid::new_v4().to_string();
        let file_name = run
            .model_path
            .file_name()
            .map(|n| n.to_os_string())
            .ok_or_else(|| MlError::tracking("model path has no file name"))?;
        let model_artifact = self.models_dir().join(&id).join(file_name);
        let mut record = ExperimentRecord {
            id,
            experiment: self.experiment.clone(),
            run_name: run.run_name.clone(),
            model_family: run.model_family,
            params: run.params.clone(),
            metrics: run.metrics(),
            model_path: run.model_path.clone(),
            model_artifact,
            model_sha256: String::new(),
            created_at: Utc::now(),
        };
        tokio::task::spawn_blocking(move || {
            let bytes = std::fs::read(&record.model_path).map_err(|e| {
                MlError::tracking(format!(
                    "cannot read model {}: {e}",
                    record.model_path.display()
                ))
            })?;
            record.model_sha256 = format!("{:x}", Sha256::digest(&bytes));
            crate::persistence::write_artifact(&record.model_artifact, &bytes)?;
            let mut registry = ExperimentRegistry::load(&path)?;
            registry.experiments.push(record);
            registry.save(&path)
        })
        .await
        .map_err(|e| MlError::tracking(format!("registry task failed: {e}")))?
    }
}

/// MLflow REST tracking (`/api/2.0/mlflow`).
pub struct MlflowTracker {
    client: reqwest::Client,
    base_uri: String,
    experiment: String,
    token: Option<String>,
    timeout: Duration,
}

impl MlflowTracker {
    pub fn new(
        base_uri: &str,
        experiment: &str,
        token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, MlError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(format!("netsec/{}", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            base_uri: base_uri.trim_end_matches('/').to_string(),
            experiment: experiment.to_string(),
            token,
            timeout,
        })
    }

    /// Replace the HTTP client, e.g. to bypass proxies for a local server.
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/api/2.0/mlflow/{path}", self.base_uri)
    }

    fn artifact_endpoint(&self, path: &str) -> String {
        format!("{}/api/2.0/mlflow-artifacts/artifacts/{path}", self.base_uri)
    }

    /// PUT the model file under the run's `model/` artifact directory.
    async fn upload_model(&self, artifact_root: &str, model_path: &Path) -> Result<(), MlError> {
        let file_name = model_path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| MlError::tracking("model path has no file name"))?;
        let bytes = tokio::fs::read(model_path).await.map_err(|e| {
            MlError::tracking(format!("cannot read model {}: {e}", model_path.display()))
        })?;
        let size = bytes.len();
        let upload = self
            .client
            .put(self.artifact_endpoint(&format!("{artifact_root}/model/{file_name}")))
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(bytes);
        self.call(upload, "artifacts upload").await?;
        tracing::debug!(bytes = size, artifact_root, "Model uploaded to MLflow");
        Ok(())
    }

    async fn call(
        &self,
        request: reqwest::RequestBuilder,
        what: &str,
    ) -> Result<serde_json::Value, MlError> {
        let request = match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        };
        let response = request.send().await?;
        let status = response.status();
        let body: serde_json::Value = response.json().await.unwrap_or(serde_json::Value::Null);
        if !status.is_success() {
            return Err(MlError::tracking(format!(
                "{what} returned status {status}: {body}"
            )));
        }
        Ok(body)
    }

    async fn experiment_id(&self) -> Result<String, MlError> {
        let lookup = self
            .client
            .get(self.endpoint("experiments/get-by-name"))
            .query(&[("experiment_name", self.experiment.as_str())]);
        if let Ok(body) = self.call(lookup, "experiments/get-by-name").await {
            if let Some(id) = body["experiment"]["experiment_id"].as_str() {
                return Ok(id.to_string());
            }
        }
        let create = self
            .client
            .post(self.endpoint("experiments/create"))
            .json(&json!({ "name": self.experiment }));
        let body = self.call(create, "experiments/create").await?;
        body["experiment_id"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| MlError::tracking("experiments/create returned no experiment_id"))
    }

    async fn log_run_inner(&self, run: &TrackedRun) -> Result<(), MlError> {
        let experiment_id = self.experiment_id().await?;
        let now = Utc::now().timestamp_millis();

        let create = self.client.post(self.endpoint("runs/create")).json(&json!({
            "experiment_id": experiment_id,
            "run_name": run.run_name,
            "start_time": now,
            "tags": [{ "key": "model_family", "value": run.model_family.to_string() }],
        }));
        let body = self.call(create, "runs/create").await?;
        let run_id = body["run"]["info"]["run_id"]
            .as_str()
            .ok_or_else(|| MlError::tracking("runs/create returned no run_id"))?
            .to_string();
        let artifact_root = artifact_root(
            body["run"]["info"]["artifact_uri"].as_str(),
            &experiment_id,
            &run_id,
        );

        let metrics: Vec<serde_json::Value> = run
            .metrics()
            .into_iter()
            .map(|(key, value)| json!({ "key": key, "value": value, "timestamp": now, "step": 0 }))
            .collect();
        let params: Vec<serde_json::Value> = run
            .param_strings()
            .into_iter()
            .map(|(key, value)| json!({ "key": key, "value": value }))
            .collect();
        let batch = self.client.post(self.endpoint("runs/log-batch")).json(&json!({
            "run_id": run_id,
            "metrics": metrics,
            "params": params,
            "tags": [{ "key": "model_path", "value": run.model_path.display().to_string() }],
        }));
        self.call(batch, "runs/log-batch").await?;
        self.upload_model(&artifact_root, &run.model_path).await?;

        let finish = self.client.post(self.endpoint("runs/update")).json(&json!({
            "run_id": run_id,
            "status": "FINISHED",
            "end_time": Utc::now().timestamp_millis(),
        }));
        self.call(finish, "runs/update").await?;
        tracing::debug!(run_id = %run_id, "Run logged to MLflow");
        Ok(())
    }
}

#[async_trait]
impl ExperimentTracker for MlflowTracker {
    fn name(&self) -> &str {
        "mlflow"
    }

    async fn log_run(&self, run: &TrackedRun) -> Result<(), MlError> {
        tokio::time::timeout(self.timeout, self.log_run_inner(run))
            .await
            .map_err(|_| {
                MlError::timeout(format!(
                    "MLflow at {} did not respond within {}s",
                    self.base_uri,
                    self.timeout.as_secs()
                ))
            })?
    }
}

/// Artifact path of a run relative to the server's artifact proxy.
///
/// `mlflow-artifacts:/7/abc/artifacts` and
/// `mlflow-artifacts://host:5000/7/abc/artifacts` both give `7/abc/artifacts`;
/// any other scheme falls back to the server's default layout.
pub fn artifact_root(artifact_uri: Option<&str>, experiment_id: &str, run_id: &str) -> String {
    let proxied = artifact_uri.and_then(|uri| uri.strip_prefix("mlflow-artifacts:"));
    match proxied {
        Some(rest) => {
            let path = match rest.strip_prefix("//") {
                Some(with_host) => with_host.split_once('/').map_or("", |(_, p)| p),
                None => rest,
            };
            path.trim_matches('/').to_string()
        }
        None => format!("{experiment_id}/{run_id}/artifacts"),
    }
}

/// Build the tracker the settings ask for.
pub fn tracker_from_settings(
    settings: &TrackingSettings,
) -> Result<Arc<dyn ExperimentTracker>, MlError> {
    let uri = || {
        settings.uri.clone().ok_or_else(|| {
            MlError::config(format!("tracking.uri is required for {:?}", settings.backend))
        })
    };
    Ok(match settings.backend {
        TrackingBackend::None => Arc::new(NoopTracker),
        TrackingBackend::Local => Arc::new(LocalTracker::new(uri()?, &settings.experiment)),
        TrackingBackend::Mlflow => {
            let token = std::env::var(&settings.token_env)
                .ok()
                .filter(|t| !t.is_empty());
            Arc::new(MlflowTracker::new(
                &uri()?,
                &settings.experiment,
                token,
                Duration::from_secs(settings.timeout_secs.max(1)),
            )?)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader, Read, Write};
    use std::net::{TcpListener, TcpStream};
    use std::sync::Mutex;
    use tempfile::TempDir;

    fn run(model_path: PathBuf) -> TrackedRun {
        let metric = ClassificationMetric {
            f1_score: 0.9,
            precision_score: 0.8,
            recall_score: 1.0,
        };
        TrackedRun {
            run_name: "run".into(),
            model_family: ModelFamily::RandomForest,
            params: json!({"n_estimators": 32, "max_depth": null}),
            train_metric: metric,
            test_metric: metric,
            model_path,
        }
    }

    #[test]
    fn test_flattened_metrics_and_params() {
        let r = run(PathBuf::from("model.json"));
        let metrics = r.metrics();
        assert_eq!(metrics.len(), 6);
        assert_eq!(metrics["test_recall_score"], 1.0);
        let params = r.param_strings();
        assert_eq!(params["n_estimators"], "32");
        assert_eq!(params["max_depth"], "null");
        assert_eq!(params["model_family"], "Random Forest");
    }

    #[tokio::test]
    async fn test_local_tracker_appends_runs() {
        let dir = TempDir::new().unwrap();
        let model_path = dir.path().join("model.json");
        std::fs::write(&model_path, b"{}").unwrap();
        let registry_path = dir.path().join("tracking").join("registry.json");
        let tracker = LocalTracker::new(&registry_path, "networksecurity");
        tracker.log_run(&run(model_path.clone())).await.unwrap();
        tracker.log_run(&run(model_path)).await.unwrap();

        let registry = ExperimentRegistry::load(&registry_path).unwrap();
        assert_eq!(registry.experiments.len(), 2);
        assert_eq!(registry.find_by_family(ModelFamily::RandomForest).len(), 2);
        assert_eq!(registry.experiments[0].model_sha256.len(), 64);
        assert_ne!(
            registry.experiments[0].model_artifact,
            registry.experiments[1].model_artifact
        );
    }

    #[tokio::test]
    async fn test_local_tracker_keeps_model_copy() {
        let dir = TempDir::new().unwrap();
        let run_dir = dir.path().join("Artifacts").join("run");
        let model_path = run_dir.join("model.json");
        std::fs::create_dir_all(&run_dir).unwrap();
        std::fs::write(&model_path, br#"{"family":"decision_tree"}"#).unwrap();
        let registry_path = dir.path().join("tracking").join("registry.json");
        let tracker = LocalTracker::new(&registry_path, "networksecurity");
        tracker.log_run(&run(model_path)).await.unwrap();

        std::fs::remove_dir_all(&run_dir).unwrap();
        let registry = ExperimentRegistry::load(&registry_path).unwrap();
        let record = &registry.experiments[0];
        assert!(record.model_artifact.starts_with(tracker.models_dir()));
        assert_eq!(
            std::fs::read(&record.model_artifact).unwrap(),
            br#"{"family":"decision_tree"}"#
        );
    }

    #[tokio::test]
    async fn test_local_tracker_missing_model_errors() {
        let dir = TempDir::new().unwrap();
        let registry_path = dir.path().join("registry.json");
        let tracker = LocalTracker::new(&registry_path, "networksecurity");
        let err = tracker
            .log_run(&run(dir.path().join("absent.json")))
            .await
            .unwrap_err();
        assert!(matches!(err, MlError::Tracking(_)));
        assert!(!registry_path.exists());
    }

    #[test]
    fn test_artifact_root() {
        assert_eq!(
            artifact_root(Some("mlflow-artifacts:/7/abc/artifacts"), "7", "abc"),
            "7/abc/artifacts"
        );
        assert_eq!(
            artifact_root(Some("mlflow-artifacts://host:5000/7/abc/artifacts"), "7", "abc"),
            "7/abc/artifacts"
        );
        assert_eq!(artifact_root(Some("s3://bucket/7/abc"), "7", "abc"), "7/abc/artifacts");
        assert_eq!(artifact_root(None, "1", "r"), "1/r/artifacts");
    }

    #[derive(Debug, Clone)]
    struct RecordedRequest {
        method: String,
        target: String,
        body: Vec<u8>,
    }

    fn read_request(stream: &TcpStream) -> Option<RecordedRequest> {
        let mut reader = BufReader::new(stream);
        let mut line = String::new();
        reader.read_line(&mut line).ok()?;
        let mut parts = line.split_whitespace();
        let method = parts.next()?.to_string();
        let target = parts.next()?.to_string();
        let mut content_length = 0usize;
        loop {
            let mut header = String::new();
            reader.read_line(&mut header).ok()?;
            let header = header.trim_end();
            if header.is_empty() {
                break;
            }
            if let Some((name, value)) = header.split_once(':') {
                if name.eq_ignore_ascii_case("content-length") {
                    content_length = value.trim().parse().ok()?;
                }
            }
        }
        let mut body = vec![0u8; content_length];
        reader.read_exact(&mut body).ok()?;
        Some(RecordedRequest {
            method,
            target,
            body,
        })
    }

    /// Minimal MLflow server answering every request with canned JSON.
    fn spawn_mlflow_server() -> (String, Arc<Mutex<Vec<RecordedRequest>>>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&seen);
        std::thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(mut stream) = stream else { break };
                let Some(request) = read_request(&stream) else {
                    continue;
                };
                let body = if request.target.contains("experiments/get-by-name") {
                    r#"{"experiment":{"experiment_id":"7","name":"networksecurity"}}"#
                } else if request.target.contains("runs/create") {
                    r#"{"run":{"info":{"run_id":"r1","experiment_id":"7","artifact_uri":"mlflow-artifacts:/7/r1/artifacts"}}}"#
                } else {
                    "{}"
                };
                log.lock().unwrap().push(request);
                let _ = write!(
                    stream,
                    "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = stream.flush();
            }
        });
        (base, seen)
    }

    #[tokio::test]
    async fn test_mlflow_uploads_model_artifact() {
        let (base, seen) = spawn_mlflow_server();
        let dir = TempDir::new().unwrap();
        let model_path = dir.path().join("model.json");
        std::fs::write(&model_path, br#"{"family":"ada_boost"}"#).unwrap();

        let client = reqwest::Client::builder().no_proxy().build().unwrap();
        let tracker =
            MlflowTracker::new(&base, "networksecurity", None, Duration::from_secs(5))
                .unwrap()
                .with_client(client);
        tracker.log_run(&run(model_path)).await.unwrap();

        let requests = seen.lock().unwrap().clone();
        let upload = requests
            .iter()
            .find(|r| r.method == "PUT")
            .expect("model upload request");
        assert_eq!(
            upload.target,
            "/api/2.0/mlflow-artifacts/artifacts/7/r1/artifacts/model/model.json"
        );
        assert_eq!(upload.body, br#"{"family":"ada_boost"}"#);

        let batch = requests
            .iter()
            .find(|r| r.target.ends_with("runs/log-batch"))
            .expect("log-batch request");
        assert!(String::from_utf8_lossy(&batch.body).contains("test_f1_score"));
        assert!(requests.last().unwrap().target.ends_with("runs/update"));
    }

    #[tokio::test]
    async fn test_unreachable_mlflow_errors() {
        let tracker = MlflowTracker::new(
            "http://127.0.0.1:1",
            "networksecurity",
            None,
            Duration::from_secs(2),
        )
        .unwrap();
        let err = tracker.log_run(&run(PathBuf::from("m.json"))).await;
        assert!(err.is_err());
    }

    #[test]
    fn test_tracker_selection() {
        let mut settings = TrackingSettings::default();
        assert_eq!(tracker_from_settings(&settings).unwrap().name(), "none");
        settings.backend = TrackingBackend::Local;
        assert!(tracker_from_settings(&settings).is_err());
        settings.uri = Some("registry.json".into());
        assert_eq!(tracker_from_settings(&settings).unwrap().name(), "local");
    }
}
