use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use thiserror::Error;

use crate::hex::encode_hex;

pub const API_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Error)]
/// Enumerates supported `ApiError` values.
pub enum ApiError {
    #[error("api frame JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unsupported api schema version {0}")]
    UnsupportedSchema(u32),
    #[error("unsupported api frame kind '{0}'; supported kinds are login, stream.attach, network.create, network.update, network.list, network.delete, config.apply")]
    UnsupportedKind(String),
    #[error("api response status must be 'ok' or 'rejected', found '{0}'")]
    InvalidStatus(String),
    #[error("api frame payload must be a JSON object")]
    InvalidPayload,
    #[error("missing payload field '{0}'")]
    MissingField(&'static str),
    #[error("payload field '{field}' must be {expected}")]
    InvalidField {
        field: &'static str,
        expected: &'static str,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Enumerates supported `ApiRequestKind` values.
pub enum ApiRequestKind {
    Login,
    StreamAttach,
    NetworkCreate,
    NetworkUpdate,
    NetworkList,
    NetworkDelete,
    ConfigApply,
}

impl ApiRequestKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Login => "login",
            Self::StreamAttach => "stream.attach",
            Self::NetworkCreate => "network.create",
            Self::NetworkUpdate => "network.update",
            Self::NetworkList => "network.list",
            Self::NetworkDelete => "network.delete",
            Self::ConfigApply => "config.apply",
        }
    }
}

impl fmt::Display for ApiRequestKind {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

impl FromStr for ApiRequestKind {
    type Err = ApiError;

    fn from_str(value: &str) -> Result<Self, ApiError> {
        match value {
            "login" => Ok(Self::Login),
            "stream.attach" => Ok(Self::StreamAttach),
            "network.create" => Ok(Self::NetworkCreate),
            "network.update" => Ok(Self::NetworkUpdate),
            "network.list" => Ok(Self::NetworkList),
            "network.delete" => Ok(Self::NetworkDelete),
            "config.apply" => Ok(Self::ConfigApply),
            other => Err(ApiError::UnsupportedKind(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Enumerates supported `ApiStatus` values.
pub enum ApiStatus {
    Ok,
    Rejected,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
/// Request envelope sent on the auth and config channels.
pub struct ApiRequestFrame {
    pub schema_version: u32,
    pub kind: String,
    pub payload: Value,
}

impl ApiRequestFrame {
    pub fn to_text(&self) -> Result<String, ApiError> {
        serde_json::to_string(self).map_err(ApiError::from)
    }
}

#[derive(Debug, Clone, PartialEq)]
/// Validated response envelope received on the auth and config channels.
pub struct ApiResponseFrame {
    pub kind: ApiRequestKind,
    pub status: ApiStatus,
    pub payload: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq)]
/// Rejection detail extracted from a `rejected` response payload.
pub struct ApiRejection {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
/// Single inventory entry returned by a `network.list` response.
pub struct NetworkRecord {
    pub network_id: u32,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq)]
/// Parameters for a `config.apply` request. `sinks: None` targets the whole network.
pub struct ConfigChangeRequest {
    pub network_id: u32,
    pub interval_seconds: u16,
    pub payload: Vec<u8>,
    pub override_existing: bool,
    pub sinks: Option<Vec<u32>>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawApiResponseFrame {
    schema_version: u32,
    kind: String,
    status: String,
    payload: Value,
}

pub fn parse_response_frame(raw: &str) -> Result<ApiResponseFrame, ApiError> {
    let frame = serde_json::from_str::<RawApiResponseFrame>(raw)?;
    if frame.schema_version != API_SCHEMA_VERSION {
        return Err(ApiError::UnsupportedSchema(frame.schema_version));
    }
    let kind = ApiRequestKind::from_str(frame.kind.trim())?;
    let status = match frame.status.as_str() {
        "ok" => ApiStatus::Ok,
        "rejected" => ApiStatus::Rejected,
        other => return Err(ApiError::InvalidStatus(other.to_string())),
    };
    let payload = frame
        .payload
        .as_object()
        .ok_or(ApiError::InvalidPayload)?
        .clone();

    Ok(ApiResponseFrame {
        kind,
        status,
        payload,
    })
}

pub fn require_session_token(frame: &ApiResponseFrame) -> Result<String, ApiError> {
    let value = frame
        .payload
        .get("session_token")
        .ok_or(ApiError::MissingField("session_token"))?;
    let raw = value.as_str().ok_or(ApiError::InvalidField {
        field: "session_token",
        expected: "a string",
    })?;
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ApiError::InvalidField {
            field: "session_token",
            expected: "a non-empty string",
        });
    }
    Ok(trimmed.to_string())
}

pub fn parse_network_records(frame: &ApiResponseFrame) -> Result<Vec<NetworkRecord>, ApiError> {
    let value = frame
        .payload
        .get("networks")
        .ok_or(ApiError::MissingField("networks"))?;
    serde_json::from_value(value.clone()).map_err(ApiError::from)
}

pub fn rejection_details(frame: &ApiResponseFrame) -> ApiRejection {
    let code = frame
        .payload
        .get("code")
        .and_then(Value::as_str)
        .unwrap_or("unknown")
        .to_string();
    let message = frame
        .payload
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or("no detail provided")
        .to_string();
    ApiRejection { code, message }
}

fn build_request(kind: ApiRequestKind, payload: Value) -> ApiRequestFrame {
    ApiRequestFrame {
        schema_version: API_SCHEMA_VERSION,
        kind: kind.as_str().to_string(),
        payload,
    }
}

pub fn build_login_request(username: &str, password: &str) -> ApiRequestFrame {
    build_request(
        ApiRequestKind::Login,
        json!({
            "username": username,
            "password": password,
        }),
    )
}

pub fn build_stream_attach_request(session_token: &str) -> ApiRequestFrame {
    build_request(
        ApiRequestKind::StreamAttach,
        json!({
            "session_token": session_token,
        }),
    )
}

pub fn build_network_create_request(network_id: u32, name: &str) -> ApiRequestFrame {
    build_request(
        ApiRequestKind::NetworkCreate,
        json!({
            "network_id": network_id,
            "name": name,
        }),
    )
}

pub fn build_network_update_request(network_id: u32, name: &str) -> ApiRequestFrame {
    build_request(
        ApiRequestKind::NetworkUpdate,
        json!({
            "network_id": network_id,
            "name": name,
        }),
    )
}

pub fn build_network_list_request() -> ApiRequestFrame {
    build_request(ApiRequestKind::NetworkList, json!({}))
}

pub fn build_network_delete_request(network_id: u32, force: bool) -> ApiRequestFrame {
    build_request(
        ApiRequestKind::NetworkDelete,
        json!({
            "network_id": network_id,
            "force": force,
        }),
    )
}

pub fn build_config_apply_request(change: &ConfigChangeRequest) -> ApiRequestFrame {
    build_request(
        ApiRequestKind::ConfigApply,
        json!({
            "network_id": change.network_id,
            "interval_seconds": change.interval_seconds,
            "payload_hex": encode_hex(&change.payload),
            "override": change.override_existing,
            "sinks": change.sinks,
        }),
    )
}
