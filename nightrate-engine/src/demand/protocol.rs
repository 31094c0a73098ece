//! Worker wire protocol: one JSON object per line in each direction
//!
//! Responses come back in request order; the bridge sends one request at a
//! time, so no correlation id is needed.

use serde::{Deserialize, Serialize};

use crate::demand::{ContextFeatures, Observation};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum WorkerRequest {
    Ping,
    HasModel {
        property_id: String,
    },
    PredictDemand {
        property_id: String,
        context: ContextFeatures,
        price: f64,
    },
    Optimize {
        property_id: String,
        context: ContextFeatures,
        capacity_remaining: f64,
        price_grid: Vec<f64>,
    },
    ArgmaxRevenue {
        property_id: String,
        context: ContextFeatures,
        price_grid: Vec<f64>,
        #[serde(default)]
        capacity_remaining: Option<f64>,
    },
    Train {
        property_id: String,
        observations: Vec<Observation>,
        seed: u64,
    },
}

impl WorkerRequest {
    pub fn op(&self) -> &'static str {
        match self {
            WorkerRequest::Ping => "ping",
            WorkerRequest::HasModel { .. } => "has_model",
            WorkerRequest::PredictDemand { .. } => "predict_demand",
            WorkerRequest::Optimize { .. } => "optimize",
            WorkerRequest::ArgmaxRevenue { .. } => "argmax_revenue",
            WorkerRequest::Train { .. } => "train",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NoModel,
    InvalidRequest,
    Training,
    Internal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum WorkerResponse {
    Ok { result: serde_json::Value },
    Error { kind: ErrorKind, message: String },
}

impl WorkerResponse {
    pub fn ok<T: Serialize>(value: &T) -> Self {
        match serde_json::to_value(value) {
            Ok(result) => WorkerResponse::Ok { result },
            Err(e) => WorkerResponse::error(ErrorKind::Internal, e.to_string()),
        }
    }

    pub fn error(kind: ErrorKind, message: impl Into<String>) -> Self {
        WorkerResponse::Error {
            kind,
            message: message.into(),
        }
    }
}
