//! Human-in-the-loop option request/response shapes (spec §3, §6).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HitlOption {
    pub id: String,
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HitlOptionRequest {
    pub world_id: String,
    pub request_id: String,
    pub title: String,
    pub message: String,
    pub options: Vec<HitlOption>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_option_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<String>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HitlResolutionSource {
    User,
    Timeout,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HitlOptionResolution {
    pub request_id: String,
    pub option_id: String,
    pub source: HitlResolutionSource,
}

/// Wire payload for the `system` event a HITL request is announced on
/// (spec §6 "HITL wire payload").
#[derive(Debug, Clone, Serialize)]
pub struct HitlWireRequest<'a> {
    pub event_type: &'static str,
    pub request_id: &'a str,
    pub title: &'a str,
    pub message: &'a str,
    pub options: &'a [HitlOption],
    pub default_option_id: &'a str,
    pub timeout_ms: u64,
    pub metadata: &'a serde_json::Value,
}

/// Submission payload (spec §6).
#[derive(Debug, Clone, Deserialize)]
pub struct HitlOptionSubmission {
    pub world_id: String,
    pub request_id: String,
    pub option_id: String,
    #[serde(default)]
    pub chat_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HitlSubmissionResult {
    pub accepted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl HitlSubmissionResult {
    pub fn accepted() -> Self {
        Self {
            accepted: true,
            reason: None,
            metadata: None,
        }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            accepted: false,
            reason: Some(reason.into()),
            metadata: None,
        }
    }
}
