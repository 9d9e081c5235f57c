use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use tracing::debug;

use crate::client::{ApiRequest, AuthenticatedClient};
use crate::errors::{AppError, AppResult};

pub const MAP_TERM_PATH: &str = "/mappings/map-ayush/";
pub const HISTORY_PATH: &str = "/mappings/history/";
pub const EMPTY_TERM_MESSAGE: &str = "Please enter an AYUSH term to map";

const HIGH_CONFIDENCE_FLOOR: f64 = 90.0;
const MEDIUM_CONFIDENCE_FLOOR: f64 = 70.0;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MappingRequest {
    #[serde(rename = "ayush_term")]
    term: String,
}

impl MappingRequest {
    pub fn new(term: &str) -> AppResult<Self> {
        let trimmed = term.trim();
        if trimmed.is_empty() {
            return Err(AppError::Validation(EMPTY_TERM_MESSAGE.into()));
        }
        Ok(Self {
            term: trimmed.to_string(),
        })
    }

    pub fn term(&self) -> &str {
        &self.term
    }
}

/// Mapping certainty as a percentage, clamped to `0..=100` on ingestion.
/// Bands and statistics use the score as sent; display rounds it.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize)]
#[serde(transparent)]
pub struct Confidence(f64);

impl Confidence {
    pub fn from_score(score: f64) -> Self {
        if score.is_nan() {
            return Self(0.0);
        }
        Self(score.clamp(0.0, 100.0))
    }

    pub fn score(self) -> f64 {
        self.0
    }

    pub fn value(self) -> u8 {
        self.0.round() as u8
    }

    pub fn band(self) -> ConfidenceBand {
        ConfidenceBand::from(self)
    }
}

impl<'de> Deserialize<'de> for Confidence {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        f64::deserialize(deserializer).map(Confidence::from_score)
    }
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}%", self.value())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceBand {
    High,
    Medium,
    Low,
}

impl From<Confidence> for ConfidenceBand {
    fn from(confidence: Confidence) -> Self {
        match confidence.score() {
            v if v >= HIGH_CONFIDENCE_FLOOR => ConfidenceBand::High,
            v if v >= MEDIUM_CONFIDENCE_FLOOR => ConfidenceBand::Medium,
            _ => ConfidenceBand::Low,
        }
    }
}

impl ConfidenceBand {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfidenceBand::High => "high",
            ConfidenceBand::Medium => "medium",
            ConfidenceBand::Low => "low",
        }
    }
}

/// One agent's contribution, as reported by the backend pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingStep {
    #[serde(rename = "agent", alias = "agent_name")]
    pub agent_name: String,
    #[serde(default)]
    pub output: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappingResult {
    #[serde(rename = "ayush_term")]
    pub term: String,
    #[serde(rename = "icd_code")]
    pub code: String,
    pub disease_name: String,
    #[serde(default)]
    pub disease_category: Option<String>,
    pub confidence: Confidence,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub explanation: Option<String>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub processing_steps: Vec<ProcessingStep>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappingHistoryEntry {
    pub id: i64,
    #[serde(flatten)]
    pub result: MappingResult,
    pub created_at: DateTime<Utc>,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<ProcessingStep>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<ProcessingStep>>::deserialize(deserializer)?.unwrap_or_default())
}

/// Dashboard figures over a history listing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistorySummary {
    pub total: usize,
    pub high_confidence: usize,
    pub average_confidence: f64,
}

impl HistorySummary {
    pub fn from_entries(entries: &[MappingHistoryEntry]) -> Self {
        let total = entries.len();
        let high_confidence = entries
            .iter()
            .filter(|entry| entry.result.confidence.band() == ConfidenceBand::High)
            .count();
        let average_confidence = if total == 0 {
            0.0
        } else {
            let sum: f64 = entries
                .iter()
                .map(|entry| entry.result.confidence.score())
                .sum();
            sum / total as f64
        };
        Self {
            total,
            high_confidence,
            average_confidence,
        }
    }
}

#[async_trait]
pub trait MappingService: Send + Sync {
    async fn submit_mapping(&self, term: &str) -> AppResult<MappingResult>;
    async fn fetch_history(&self) -> AppResult<Vec<MappingHistoryEntry>>;
}

/// Typed access to the mapping endpoints.
#[derive(Clone)]
pub struct MappingGateway {
    client: AuthenticatedClient,
}

impl MappingGateway {
    pub fn new(client: AuthenticatedClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl MappingService for MappingGateway {
    async fn submit_mapping(&self, term: &str) -> AppResult<MappingResult> {
        let request = MappingRequest::new(term)?;
        debug!(target: "mapping_gateway", term = request.term(), "submitting mapping");
        let body = serde_json::to_value(&request)?;
        self.client.send(ApiRequest::post(MAP_TERM_PATH, body)).await
    }

    async fn fetch_history(&self) -> AppResult<Vec<MappingHistoryEntry>> {
        let entries: Vec<MappingHistoryEntry> =
            self.client.send(ApiRequest::get(HISTORY_PATH)).await?;
        debug!(target: "mapping_gateway", count = entries.len(), "fetched mapping history");
        Ok(entries)
    }
}
