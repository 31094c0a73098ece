//! Worker side of the demand bridge
//!
//! Runs inside `nightrate-demand-worker`: reads one request per line from
//! stdin, answers one response per line on stdout. Logs go to stderr only.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::Utc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::demand::model::DemandModel;
use crate::demand::protocol::{ErrorKind, WorkerRequest, WorkerResponse};
use crate::demand::training::train_model;
use crate::demand::TrainOutcome;

/// Artifacts on disk, cached after first load
pub struct ModelRegistry {
    models_dir: PathBuf,
    cache: HashMap<String, DemandModel>,
}

/// Ids become file names; anything outside `[A-Za-z0-9_-]` is rejected
fn is_safe_id(property_id: &str) -> bool {
    !property_id.is_empty()
        && property_id.len() <= 128
        && property_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

impl ModelRegistry {
    pub fn new(models_dir: impl Into<PathBuf>) -> Self {
        Self {
            models_dir: models_dir.into(),
            cache: HashMap::new(),
        }
    }

    pub fn models_dir(&self) -> &Path {
        &self.models_dir
    }

    fn artifact_path(&self, property_id: &str) -> PathBuf {
        self.models_dir.join(format!("{}.json", property_id))
    }

    /// Load (and cache) the artifact for `property_id`
    pub fn get(&mut self, property_id: &str) -> Option<&DemandModel> {
        if !is_safe_id(property_id) {
            return None;
        }
        if !self.cache.contains_key(property_id) {
            let path = self.artifact_path(property_id);
            let model = std::fs::read_to_string(&path)
                .ok()
                .and_then(|content| match serde_json::from_str::<DemandModel>(&content) {
                    Ok(model) if model.is_well_formed() => Some(model),
                    Ok(_) => {
                        tracing::warn!(path = %path.display(), "Ignoring malformed model artifact");
                        None
                    }
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = %e, "Ignoring unreadable model artifact");
                        None
                    }
                })?;
            self.cache.insert(property_id.to_string(), model);
        }
        self.cache.get(property_id)
    }

    /// Persist atomically (temp file + rename) and refresh the cache
    pub fn save(&mut self, model: DemandModel) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.models_dir)?;
        let path = self.artifact_path(&model.property_id);
        let tmp_path = path.with_extension("json.tmp");
        let content = serde_json::to_string_pretty(&model)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(&tmp_path, content)?;
        std::fs::rename(&tmp_path, &path)?;
        self.cache.insert(model.property_id.clone(), model);
        Ok(())
    }

    /// Answer one request
    pub fn handle(&mut self, request: WorkerRequest) -> WorkerResponse {
        match request {
            WorkerRequest::Ping => WorkerResponse::ok(&"pong"),

            WorkerRequest::HasModel { property_id } => {
                WorkerResponse::ok(&self.get(&property_id).is_some())
            }

            WorkerRequest::PredictDemand {
                property_id,
                context,
                price,
            } => match self.get(&property_id) {
                Some(model) => WorkerResponse::ok(&model.predict(&context, price)),
                None => no_model(&property_id),
            },

            WorkerRequest::Optimize {
                property_id,
                context,
                capacity_remaining,
                price_grid,
            } => match self.get(&property_id) {
                Some(model) => {
                    WorkerResponse::ok(&model.optimize(&context, capacity_remaining, &price_grid))
                }
                None => no_model(&property_id),
            },

            WorkerRequest::ArgmaxRevenue {
                property_id,
                context,
                price_grid,
                capacity_remaining,
            } => match self.get(&property_id) {
                Some(model) => {
                    let capacity = capacity_remaining.unwrap_or(f64::INFINITY);
                    match model.argmax_revenue(&context, capacity, &price_grid) {
                        Some(best) => WorkerResponse::ok(&best),
                        None => WorkerResponse::error(
                            ErrorKind::InvalidRequest,
                            "price grid has no positive prices",
                        ),
                    }
                }
                None => no_model(&property_id),
            },

            WorkerRequest::Train {
                property_id,
                observations,
                seed,
            } => self.train(&property_id, &observations, seed),
        }
    }

    fn train(
        &mut self,
        property_id: &str,
        observations: &[crate::demand::Observation],
        seed: u64,
    ) -> WorkerResponse {
        if !is_safe_id(property_id) {
            return WorkerResponse::error(
                ErrorKind::InvalidRequest,
                format!("unsupported property id {:?}", property_id),
            );
        }

        let current = self.get(property_id).cloned();
        let result = match train_model(property_id, observations, current.as_ref(), seed, Utc::now()) {
            Ok(result) => result,
            Err(e) => return WorkerResponse::error(ErrorKind::Training, e.to_string()),
        };

        let outcome = TrainOutcome {
            replaced: result.replaced,
            version: if result.replaced {
                result.candidate.version
            } else {
                current.as_ref().map(|m| m.version).unwrap_or(0)
            },
            val_rmse: result.candidate.val_rmse,
            trained_at: result.candidate.trained_at,
            feature_importance: result.candidate.feature_importance.clone(),
        };

        if result.replaced {
            if let Err(e) = self.save(result.candidate) {
                return WorkerResponse::error(ErrorKind::Internal, format!("save failed: {}", e));
            }
            tracing::info!(
                property_id,
                version = outcome.version,
                val_rmse = outcome.val_rmse,
                "Model artifact replaced"
            );
        } else {
            tracing::info!(
                property_id,
                val_rmse = outcome.val_rmse,
                "Candidate model not better by 5%, keeping current artifact"
            );
        }

        WorkerResponse::ok(&outcome)
    }
}

fn no_model(property_id: &str) -> WorkerResponse {
    WorkerResponse::error(ErrorKind::NoModel, format!("no model for {}", property_id))
}

/// Serve requests until `reader` reaches EOF
pub async fn serve<R, W>(registry: &mut ModelRegistry, reader: R, mut writer: W) -> std::io::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = reader.lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<WorkerRequest>(&line) {
            Ok(request) => {
                tracing::debug!(op = request.op(), "Worker request");
                registry.handle(request)
            }
            Err(e) => WorkerResponse::error(ErrorKind::InvalidRequest, e.to_string()),
        };

        let mut encoded = serde_json::to_string(&response)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        encoded.push('\n');
        writer.write_all(encoded.as_bytes()).await?;
        writer.flush().await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::demand::training::test_support::synthetic_observations;
    use crate::demand::ContextFeatures;
    use chrono::NaiveDate;
    use tokio::io::BufReader;

    fn context() -> ContextFeatures {
        ContextFeatures {
            date: NaiveDate::from_ymd_opt(2026, 5, 12).unwrap(),
            lead_days: 20,
            weather_score: Some(60.0),
            expected_demand_impact: None,
            market_trend_score: Some(0.1),
            competitor_avg_price: Some(110.0),
        }
    }

    #[test]
    fn test_train_then_argmax() {
        let dir = tempfile::tempdir().unwrap();
        let mut registry = ModelRegistry::new(dir.path());

        let no = registry.handle(WorkerRequest::HasModel {
            property_id: "p1".into(),
        });
        assert_eq!(no, WorkerResponse::ok(&false));

        let trained = registry.handle(WorkerRequest::Train {
            property_id: "p1".into(),
            observations: synthetic_observations(90),
            seed: 3,
        });
        match trained {
            WorkerResponse::Ok { result } => {
                let outcome: TrainOutcome = serde_json::from_value(result).unwrap();
                assert!(outcome.replaced);
                assert_eq!(outcome.version, 1);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(dir.path().join("p1.json").exists());

        // A fresh registry reads the artifact back from disk
        let mut reloaded = ModelRegistry::new(dir.path());
        let best = reloaded.handle(WorkerRequest::ArgmaxRevenue {
            property_id: "p1".into(),
            context: context(),
            price_grid: vec![70.0, 90.0, 110.0, 130.0],
            capacity_remaining: Some(1.0),
        });
        assert!(matches!(best, WorkerResponse::Ok { .. }));
    }

    #[test]
    fn test_unknown_property_is_no_model() {
        let dir = tempfile::tempdir().unwrap();
        let mut registry = ModelRegistry::new(dir.path());
        let response = registry.handle(WorkerRequest::PredictDemand {
            property_id: "../etc/passwd".into(),
            context: context(),
            price: 100.0,
        });
        assert!(matches!(
            response,
            WorkerResponse::Error {
                kind: ErrorKind::NoModel,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_serve_answers_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let mut registry = ModelRegistry::new(dir.path());
        let input = b"{\"op\":\"ping\"}\n\nnot json\n{\"op\":\"has_model\",\"property_id\":\"x\"}\n";
        let mut output = Vec::new();

        serve(&mut registry, BufReader::new(&input[..]), &mut output)
            .await
            .unwrap();

        let lines: Vec<WorkerResponse> = String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], WorkerResponse::ok(&"pong"));
        assert!(matches!(
            lines[1],
            WorkerResponse::Error {
                kind: ErrorKind::InvalidRequest,
                ..
            }
        ));
        assert_eq!(lines[2], WorkerResponse::ok(&false));
    }
}
