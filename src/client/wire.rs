//! Request and response bodies exchanged with the service.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::models::{Configuration, PhaseId};

// ============================================================
// Request Types
// ============================================================

/// Body of `POST /config/{id}`.
#[derive(Debug, Serialize, Deserialize)]
pub struct ConfigRequest {
    pub percent: Configuration,
}

/// Body of `PUT /evaluate/{id}`: phase id to score.
pub type EvaluateRequest = BTreeMap<PhaseId, f64>;

// ============================================================
// Response Types
// ============================================================

/// Response of `GET /health`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HealthStatus {
    pub version: String,
    #[serde(default)]
    pub build_time: String,
    #[serde(default, alias = "msg")]
    pub message: String,
}

/// Responses carrying a single identifier: upload, reset, copy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdResponse {
    pub id: String,
    #[serde(default, alias = "msg", skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Response of `POST /run/{id}`.
///
/// The service omits empty lists and zero scores, so both default.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResponse {
    #[serde(default)]
    pub ids: Vec<PhaseId>,
    #[serde(default)]
    pub optimal: f64,
    #[serde(default, alias = "msg", skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Response of `GET /evaluate/{id}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InspectResponse {
    #[serde(default)]
    pub ids: Vec<PhaseId>,
    #[serde(default, alias = "msg", skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Acknowledgement or error body. Every error body must carry a message;
/// an empty message is fine, a missing one is not.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessageBody {
    #[serde(default, alias = "msg")]
    pub message: Option<String>,
}
