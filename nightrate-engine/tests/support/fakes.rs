//! In-process stand-ins for the LLM vendor, demand worker and PMS

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use serde_json::json;

use nightrate_common::events::PublishedPrice;
use nightrate_engine::demand::{
    ContextFeatures, DemandOracle, GridPoint, Observation, RevenueOptimum, TrainOutcome,
};
use nightrate_engine::error::{BridgeError, LlmError};
use nightrate_engine::llm::{ChatCompletion, ChatMessage, ChatProvider};
use nightrate_engine::services::PmsHandoff;

/// Replays canned answers in order; the last one repeats
pub struct ScriptedProvider {
    replies: Mutex<VecDeque<Result<ChatCompletion, LlmError>>>,
    calls: AtomicUsize,
}

impl ScriptedProvider {
    pub fn new(replies: Vec<Result<ChatCompletion, LlmError>>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn answering(content: impl Into<String>) -> Self {
        Self::new(vec![Ok(ChatCompletion {
            content: content.into(),
            total_tokens: 900,
        })])
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChatProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, _messages: &[ChatMessage]) -> Result<ChatCompletion, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut replies = self.replies.lock().unwrap();
        if replies.len() > 1 {
            replies.pop_front().unwrap()
        } else {
            replies.front().cloned().expect("at least one scripted reply")
        }
    }
}

/// Vendor that never answers within a test's lifetime
pub struct StalledProvider {
    calls: AtomicUsize,
}

impl StalledProvider {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChatProvider for StalledProvider {
    fn name(&self) -> &str {
        "stalled"
    }

    async fn complete(&self, _messages: &[ChatMessage]) -> Result<ChatCompletion, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(std::time::Duration::from_secs(60)).await;
        Err(LlmError::Timeout)
    }
}

/// Well-formed model answer pricing the given nights
pub fn calendar_answer(days: &[(NaiveDate, i64, &str)]) -> String {
    let calendar: Vec<_> = days
        .iter()
        .map(|(date, price, reasoning)| {
            json!({
                "date": date.format("%Y-%m-%d").to_string(),
                "weekday": date.format("%A").to_string(),
                "final_suggested_price": price,
                "price_breakdown": {},
                "reasoning": reasoning,
            })
        })
        .collect();
    json!({
        "audit_metadata": {
            "market_sentiment": "neutral",
            "property_grade": "B",
            "top_demand_drivers": ["summer"],
        },
        "calendar": calendar,
    })
    .to_string()
}

/// Demand model answering every argmax with a fixed optimum
pub struct FakeOracle {
    pub has_model: bool,
    pub optimum: f64,
    pub confidence: f64,
    pub replace_on_train: bool,
    pub trained: Mutex<Vec<(String, usize)>>,
}

impl FakeOracle {
    pub fn with_optimum(optimum: f64, confidence: f64) -> Self {
        Self {
            has_model: true,
            optimum,
            confidence,
            replace_on_train: true,
            trained: Mutex::new(Vec::new()),
        }
    }

    pub fn without_model() -> Self {
        Self {
            has_model: false,
            ..Self::with_optimum(0.0, 0.0)
        }
    }

    pub fn trained(&self) -> Vec<(String, usize)> {
        self.trained.lock().unwrap().clone()
    }
}

#[async_trait]
impl DemandOracle for FakeOracle {
    async fn has_model(&self, _property_id: &str) -> Result<bool, BridgeError> {
        Ok(self.has_model)
    }

    async fn predict_demand(
        &self,
        _property_id: &str,
        _context: &ContextFeatures,
        _price: f64,
    ) -> Result<f64, BridgeError> {
        Ok(1.0)
    }

    async fn optimize(
        &self,
        _property_id: &str,
        _context: &ContextFeatures,
        _capacity_remaining: f64,
        price_grid: &[f64],
    ) -> Result<Vec<GridPoint>, BridgeError> {
        Ok(price_grid
            .iter()
            .map(|&price| GridPoint {
                price,
                predicted_demand: 1.0,
                expected_revenue: price,
            })
            .collect())
    }

    async fn argmax_revenue(
        &self,
        property_id: &str,
        _context: &ContextFeatures,
        _price_grid: &[f64],
    ) -> Result<RevenueOptimum, BridgeError> {
        if !self.has_model {
            return Err(BridgeError::NoModel(property_id.to_string()));
        }
        Ok(RevenueOptimum {
            price: self.optimum,
            predicted_demand: 1.0,
            expected_revenue: self.optimum,
            confidence: self.confidence,
        })
    }

    async fn train(
        &self,
        property_id: &str,
        observations: &[Observation],
    ) -> Result<TrainOutcome, BridgeError> {
        self.trained
            .lock()
            .unwrap()
            .push((property_id.to_string(), observations.len()));
        Ok(TrainOutcome {
            replaced: self.replace_on_train,
            version: 1,
            val_rmse: 0.25,
            trained_at: Utc::now(),
            feature_importance: BTreeMap::new(),
        })
    }
}

/// Collects every hand-off batch
#[derive(Default)]
pub struct RecordingPms {
    pub batches: Mutex<Vec<(String, Vec<PublishedPrice>)>>,
}

impl RecordingPms {
    pub fn batches(&self) -> Vec<(String, Vec<PublishedPrice>)> {
        self.batches.lock().unwrap().clone()
    }
}

#[async_trait]
impl PmsHandoff for RecordingPms {
    async fn publish(
        &self,
        property_id: &str,
        prices: Vec<PublishedPrice>,
    ) -> nightrate_common::Result<()> {
        self.batches
            .lock()
            .unwrap()
            .push((property_id.to_string(), prices));
        Ok(())
    }
}
