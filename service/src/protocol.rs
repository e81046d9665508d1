//! IPC protocol types for the petition service.
//!
//! JSON-RPC-lite: one JSON object per line, `{id, method, params}` in and
//! `{id, result}` or `{id, error}` out. Petition errors are reported with a
//! code equal to their HTTP-style status.

use petition_core::{
    Caller, NewPetition, Petition, PetitionDetail, PetitionResults, PetitionUpdate, PublicId,
    Signature, SignatureId, SurveyAnswer, UserId,
};
use serde::{Deserialize, Serialize};

// ─────────────────────────────────────────────────────────────────────────────
// Error codes (JSON-RPC error.code)
// ─────────────────────────────────────────────────────────────────────────────

/// Standard JSON-RPC errors.
pub const ERR_INVALID_REQUEST: i64 = -32600;
pub const ERR_METHOD_NOT_FOUND: i64 = -32601;
pub const ERR_INVALID_PARAMS: i64 = -32602;

/// Petition errors, numbered after their HTTP status.
pub const ERR_VALIDATION: i64 = 400;
pub const ERR_UNAUTHENTICATED: i64 = 401;
pub const ERR_FORBIDDEN: i64 = 403;
pub const ERR_NOT_FOUND: i64 = 404;
pub const ERR_CONFLICT: i64 = 409;
pub const ERR_INTERNAL: i64 = 500;

// ─────────────────────────────────────────────────────────────────────────────
// Envelope
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Integer(i64),
    String(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    pub id: RequestId,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
    pub id: RequestId,
    pub result: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcErrorResponse {
    pub id: RequestId,
    pub error: RpcError,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl RpcError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(ERR_INVALID_PARAMS, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ERR_INTERNAL, message)
    }
}

/// Identity of the caller as asserted by the authenticating front end.
///
/// Absent or blank means anonymous.
fn caller_from(caller_id: Option<&str>) -> Caller {
    Caller::from_option(
        caller_id
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(|id| UserId(id.to_string())),
    )
}

// ─────────────────────────────────────────────────────────────────────────────
// Handshake
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HelloParams {
    pub protocol_version: String,
    pub client_version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HelloResult {
    pub protocol_version: String,
    pub service_version: String,
    pub capabilities: Vec<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// petition.*
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PetitionCreateParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caller_id: Option<String>,
    #[serde(flatten)]
    pub petition: NewPetition,
}

impl PetitionCreateParams {
    pub fn caller(&self) -> Caller {
        caller_from(self.caller_id.as_deref())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PetitionCreateResult {
    pub id: PublicId,
}

/// Public lookup by identifier (`petition.get`, `results.get`).
///
/// The identifier is validated by the handler so a malformed one is a
/// validation error rather than a params error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PetitionRefParams {
    pub petition_id: String,
}

/// Owner-scoped lookup (`petition.owned`, `petition.delete`,
/// `results.owned`, `signature.list`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OwnedRefParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caller_id: Option<String>,
    pub petition_id: String,
}

impl OwnedRefParams {
    pub fn caller(&self) -> Caller {
        caller_from(self.caller_id.as_deref())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PetitionUpdateParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caller_id: Option<String>,
    pub petition_id: String,
    #[serde(flatten)]
    pub update: PetitionUpdate,
}

impl PetitionUpdateParams {
    pub fn caller(&self) -> Caller {
        caller_from(self.caller_id.as_deref())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallerParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caller_id: Option<String>,
}

impl CallerParams {
    pub fn caller(&self) -> Caller {
        caller_from(self.caller_id.as_deref())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurrentPetitionResult {
    pub petition: Option<PetitionDetail>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PetitionListResult {
    pub petitions: Vec<Petition>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OkResult {
    pub ok: bool,
}

// ─────────────────────────────────────────────────────────────────────────────
// signature.*
// ─────────────────────────────────────────────────────────────────────────────

/// A signature submission.
///
/// Exactly one of `signature_image_ref` (already stored) or
/// `signature_data_url` (`data:image/png;base64,...`) must be given.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignatureSubmitParams {
    pub petition_id: String,
    pub name: String,
    pub phone: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature_image_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature_data_url: Option<String>,
    #[serde(default)]
    pub survey_responses: Vec<SurveyAnswer>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignatureSubmitResult {
    pub ok: bool,
    pub signature_id: SignatureId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignatureExistsParams {
    pub petition_id: String,
    pub phone: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignatureExistsResult {
    pub signed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignatureListResult {
    pub signatures: Vec<Signature>,
}

// ─────────────────────────────────────────────────────────────────────────────
// results.*
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurrentResultsResult {
    pub results: Option<PetitionResults>,
}

// ─────────────────────────────────────────────────────────────────────────────
// service.status
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceStatusResult {
    pub uptime_s: u64,
    pub service_version: String,
    pub single_petition_mode: bool,
}
