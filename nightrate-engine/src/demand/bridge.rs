//! Demand worker bridge
//!
//! One actor task owns the worker child process. Callers enqueue jobs on a
//! bounded channel and await a oneshot reply; a full queue is rejected at
//! once instead of waiting. The child is started lazily, killed on timeout
//! or protocol failure, respawned on the next call, and stopped after an
//! idle period.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use nightrate_common::config::DemandWorkerConfig;

use crate::demand::protocol::{ErrorKind, WorkerRequest, WorkerResponse};
use crate::demand::{
    ContextFeatures, DemandOracle, GridPoint, Observation, RevenueOptimum, TrainOutcome,
};
use crate::error::BridgeError;

/// Per-call deadline, queue wait excluded
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Seed handed to the worker for the train/validation split
pub const TRAINING_SEED: u64 = 42;

#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub command: PathBuf,
    pub args: Vec<String>,
    pub queue_capacity: usize,
    pub call_timeout: Duration,
    pub idle_timeout: Duration,
}

impl BridgeConfig {
    pub fn new(command: impl Into<PathBuf>, models_dir: &Path) -> Self {
        Self {
            command: command.into(),
            args: vec![
                "--models-dir".to_string(),
                models_dir.display().to_string(),
            ],
            queue_capacity: 64,
            call_timeout: DEFAULT_CALL_TIMEOUT,
            idle_timeout: Duration::from_secs(300),
        }
    }

    pub fn from_toml(config: &DemandWorkerConfig, default_models_dir: &Path) -> Self {
        let models_dir = config
            .models_dir
            .clone()
            .unwrap_or_else(|| default_models_dir.to_path_buf());
        Self {
            queue_capacity: config.queue_capacity.max(1),
            idle_timeout: Duration::from_secs(config.idle_timeout_secs.max(1)),
            ..Self::new(config.command.clone(), &models_dir)
        }
    }
}

struct Job {
    request: WorkerRequest,
    reply: oneshot::Sender<Result<serde_json::Value, BridgeError>>,
}

/// Handle to the bridge actor; cheap to clone
#[derive(Clone)]
pub struct DemandBridge {
    tx: mpsc::Sender<Job>,
}

impl DemandBridge {
    /// Start the actor. The worker process itself starts on the first call.
    pub fn spawn(config: BridgeConfig) -> Self {
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        tokio::spawn(run_actor(config, rx));
        Self { tx }
    }

    async fn call(&self, request: WorkerRequest) -> Result<serde_json::Value, BridgeError> {
        let (reply, response) = oneshot::channel();
        self.tx
            .try_send(Job { request, reply })
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => BridgeError::QueueFull,
                mpsc::error::TrySendError::Closed(_) => BridgeError::Stopped,
            })?;
        response.await.map_err(|_| BridgeError::Stopped)?
    }

    /// Round-trip a ping through the worker
    pub async fn ping(&self) -> Result<(), BridgeError> {
        let value = self.call(WorkerRequest::Ping).await?;
        match value.as_str() {
            Some("pong") => Ok(()),
            _ => Err(BridgeError::Protocol(format!("unexpected ping reply {}", value))),
        }
    }
}

fn decode<T: DeserializeOwned>(value: serde_json::Value) -> Result<T, BridgeError> {
    serde_json::from_value(value).map_err(|e| BridgeError::Protocol(e.to_string()))
}

#[async_trait]
impl DemandOracle for DemandBridge {
    async fn has_model(&self, property_id: &str) -> Result<bool, BridgeError> {
        decode(
            self.call(WorkerRequest::HasModel {
                property_id: property_id.to_string(),
            })
            .await?,
        )
    }

    async fn predict_demand(
        &self,
        property_id: &str,
        context: &ContextFeatures,
        price: f64,
    ) -> Result<f64, BridgeError> {
        decode(
            self.call(WorkerRequest::PredictDemand {
                property_id: property_id.to_string(),
                context: context.clone(),
                price,
            })
            .await?,
        )
    }

    async fn optimize(
        &self,
        property_id: &str,
        context: &ContextFeatures,
        capacity_remaining: f64,
        price_grid: &[f64],
    ) -> Result<Vec<GridPoint>, BridgeError> {
        decode(
            self.call(WorkerRequest::Optimize {
                property_id: property_id.to_string(),
                context: context.clone(),
                capacity_remaining,
                price_grid: price_grid.to_vec(),
            })
            .await?,
        )
    }

    async fn argmax_revenue(
        &self,
        property_id: &str,
        context: &ContextFeatures,
        price_grid: &[f64],
    ) -> Result<RevenueOptimum, BridgeError> {
        decode(
            self.call(WorkerRequest::ArgmaxRevenue {
                property_id: property_id.to_string(),
                context: context.clone(),
                price_grid: price_grid.to_vec(),
                capacity_remaining: None,
            })
            .await?,
        )
    }

    async fn train(
        &self,
        property_id: &str,
        observations: &[Observation],
    ) -> Result<TrainOutcome, BridgeError> {
        decode(
            self.call(WorkerRequest::Train {
                property_id: property_id.to_string(),
                observations: observations.to_vec(),
                seed: TRAINING_SEED,
            })
            .await?,
        )
    }
}

/// Running child with its pipes
struct WorkerProcess {
    child: Child,
    stdin: ChildStdin,
    stdout: Lines<BufReader<ChildStdout>>,
}

impl WorkerProcess {
    fn spawn(config: &BridgeConfig) -> Result<Self, BridgeError> {
        let mut child = Command::new(&config.command)
            .args(&config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| BridgeError::Spawn(format!("{}: {}", config.command.display(), e)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| BridgeError::Spawn("worker stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| BridgeError::Spawn("worker stdout unavailable".to_string()))?;

        info!(command = %config.command.display(), pid = ?child.id(), "Demand worker started");

        Ok(Self {
            child,
            stdin,
            stdout: BufReader::new(stdout).lines(),
        })
    }

    async fn exchange(&mut self, request: &WorkerRequest) -> Result<serde_json::Value, BridgeError> {
        let mut line = serde_json::to_string(request)
            .map_err(|e| BridgeError::Protocol(e.to_string()))?;
        line.push('\n');

        self.stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|e| BridgeError::Crashed(e.to_string()))?;
        self.stdin
            .flush()
            .await
            .map_err(|e| BridgeError::Crashed(e.to_string()))?;

        let reply = self
            .stdout
            .next_line()
            .await
            .map_err(|e| BridgeError::Crashed(e.to_string()))?
            .ok_or_else(|| BridgeError::Crashed("worker closed stdout".to_string()))?;

        match serde_json::from_str::<WorkerResponse>(&reply) {
            Ok(WorkerResponse::Ok { result }) => Ok(result),
            Ok(WorkerResponse::Error {
                kind: ErrorKind::NoModel,
                ..
            }) => Err(BridgeError::NoModel(request_property(request))),
            Ok(WorkerResponse::Error { kind, message }) => {
                Err(BridgeError::Worker(format!("{:?}: {}", kind, message)))
            }
            Err(e) => Err(BridgeError::Protocol(format!("bad reply {:?}: {}", reply, e))),
        }
    }

    async fn stop(mut self) {
        if let Err(e) = self.child.kill().await {
            debug!(error = %e, "Demand worker already gone");
        }
    }
}

fn request_property(request: &WorkerRequest) -> String {
    match request {
        WorkerRequest::Ping => String::new(),
        WorkerRequest::HasModel { property_id }
        | WorkerRequest::PredictDemand { property_id, .. }
        | WorkerRequest::Optimize { property_id, .. }
        | WorkerRequest::ArgmaxRevenue { property_id, .. }
        | WorkerRequest::Train { property_id, .. } => property_id.clone(),
    }
}

/// Failures after which the child can no longer be trusted
fn poisons_worker(error: &BridgeError) -> bool {
    matches!(
        error,
        BridgeError::Timeout | BridgeError::Crashed(_) | BridgeError::Protocol(_) | BridgeError::Spawn(_)
    )
}

async fn run_actor(config: BridgeConfig, mut rx: mpsc::Receiver<Job>) {
    let mut worker: Option<WorkerProcess> = None;

    loop {
        let job = if worker.is_some() {
            match tokio::time::timeout(config.idle_timeout, rx.recv()).await {
                Ok(Some(job)) => job,
                Ok(None) => break,
                Err(_) => {
                    if let Some(process) = worker.take() {
                        info!("Demand worker idle, stopping");
                        process.stop().await;
                    }
                    continue;
                }
            }
        } else {
            match rx.recv().await {
                Some(job) => job,
                None => break,
            }
        };

        if worker.is_none() {
            match WorkerProcess::spawn(&config) {
                Ok(process) => worker = Some(process),
                Err(e) => {
                    warn!(error = %e, "Demand worker unavailable");
                    let _ = job.reply.send(Err(e));
                    continue;
                }
            }
        }
        let Some(process) = worker.as_mut() else {
            continue;
        };

        let op = job.request.op();
        let result = match tokio::time::timeout(config.call_timeout, process.exchange(&job.request)).await {
            Ok(result) => result,
            Err(_) => Err(BridgeError::Timeout),
        };

        if let Err(e) = &result {
            if poisons_worker(e) {
                warn!(op, error = %e, "Killing demand worker");
                if let Some(process) = worker.take() {
                    process.stop().await;
                }
            } else {
                debug!(op, error = %e, "Demand worker call failed");
            }
        }

        // Caller may have given up; nothing to do then
        let _ = job.reply.send(result);
    }

    if let Some(process) = worker.take() {
        process.stop().await;
    }
    debug!("Demand bridge actor stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(command: &str) -> BridgeConfig {
        BridgeConfig {
            command: PathBuf::from(command),
            args: vec![],
            queue_capacity: 4,
            call_timeout: Duration::from_millis(500),
            idle_timeout: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn test_missing_binary_is_spawn_error() {
        let bridge = DemandBridge::spawn(config("/nonexistent/nightrate-demand-worker"));
        let err = bridge.has_model("p1").await.unwrap_err();
        assert!(matches!(err, BridgeError::Spawn(_)));
    }

    #[tokio::test]
    async fn test_worker_exiting_is_crash() {
        // `true` exits immediately without answering
        let bridge = DemandBridge::spawn(config("true"));
        let err = bridge.ping().await.unwrap_err();
        assert!(
            matches!(err, BridgeError::Crashed(_)),
            "unexpected error {:?}",
            err
        );
    }

    #[tokio::test]
    async fn test_silent_worker_times_out() {
        // `sleep` reads nothing and never answers
        let mut cfg = config("sleep");
        cfg.args = vec!["30".to_string()];
        let bridge = DemandBridge::spawn(cfg);
        assert_eq!(bridge.ping().await.unwrap_err(), BridgeError::Timeout);
    }

    #[tokio::test]
    async fn test_echoing_worker_is_protocol_error() {
        // `cat` echoes the request, which has no status tag
        let bridge = DemandBridge::spawn(config("cat"));
        let err = bridge.ping().await.unwrap_err();
        assert!(matches!(err, BridgeError::Protocol(_)), "unexpected error {:?}", err);
    }

    #[test]
    fn test_from_toml_defaults_models_dir() {
        let toml = DemandWorkerConfig::default();
        let cfg = BridgeConfig::from_toml(&toml, Path::new("/data/models"));
        assert_eq!(cfg.args, vec!["--models-dir".to_string(), "/data/models".to_string()]);
        assert_eq!(cfg.queue_capacity, 64);
        assert_eq!(cfg.call_timeout, DEFAULT_CALL_TIMEOUT);
    }
}
