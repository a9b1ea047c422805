//! IPC protocol types and validation for tapto-daemon.
//!
//! This crate is shared by the daemon and its clients to prevent schema drift.
//! The daemon remains the authority on validation, but clients can reuse the
//! same types to construct valid requests.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::io::{ErrorKind, Read};

pub const PROTOCOL_VERSION: u32 = 1;
pub const MAX_REQUEST_BYTES: usize = 1024 * 1024; // 1MB
pub const MAX_TOKEN_TEXT_BYTES: usize = 8 * 1024;
const FRAME_CHUNK_SIZE: usize = 4096;

/// Failure to read one newline-delimited message off a socket.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("message exceeded maximum size of {limit} bytes")]
    TooLarge { limit: usize },

    #[error("timed out waiting for message")]
    TimedOut,

    #[error("failed to read message: {0}")]
    Io(#[from] std::io::Error),
}

impl FrameError {
    /// Protocol error code reported back to the peer.
    pub fn code(&self) -> &'static str {
        match self {
            FrameError::TooLarge { .. } => "request_too_large",
            FrameError::TimedOut => "read_timeout",
            FrameError::Io(_) => "read_error",
        }
    }
}

/// Reads up to the first newline (or EOF) and returns the bytes before it.
/// Anything the peer sent after the newline is dropped.
pub fn read_frame<R: Read>(reader: &mut R, limit: usize) -> Result<Vec<u8>, FrameError> {
    let mut frame = Vec::new();
    let mut chunk = [0u8; FRAME_CHUNK_SIZE];

    loop {
        let n = match reader.read(&mut chunk) {
            Ok(0) => return Ok(frame),
            Ok(n) => n,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                return Err(FrameError::TimedOut);
            }
            Err(err) => return Err(err.into()),
        };

        let newline = chunk[..n].iter().position(|b| *b == b'\n');
        frame.extend_from_slice(&chunk[..newline.unwrap_or(n)]);
        if frame.len() > limit {
            return Err(FrameError::TooLarge { limit });
        }
        if newline.is_some() {
            return Ok(frame);
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub enum Method {
    GetHealth,
    GetState,
    Launch,
    DisableLauncher,
    EnableLauncher,
    SetWriteRequest,
    Stop,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Request {
    pub protocol_version: u32,
    pub method: Method,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub params: Option<Value>,
}

impl Request {
    pub fn new(method: Method, params: Option<Value>) -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION,
            method,
            id: None,
            params,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Response {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

impl Response {
    pub fn ok(id: Option<String>, data: Value) -> Self {
        Self {
            ok: true,
            id,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(id: Option<String>, code: &str, message: impl Into<String>) -> Self {
        Self {
            ok: false,
            id,
            data: None,
            error: Some(ErrorInfo::new(code, message)),
        }
    }

    pub fn error_with_info(id: Option<String>, error: ErrorInfo) -> Self {
        Self {
            ok: false,
            id,
            data: None,
            error: Some(error),
        }
    }
}

/// Token as reported to API clients.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct TokenInfo {
    pub kind: String,
    pub uid: String,
    pub text: String,
    #[serde(default)]
    pub scan_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub from_api: bool,
}

/// Payload of `get_state`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StateView {
    pub revision: u64,
    pub active_card: TokenInfo,
    pub last_scanned: TokenInfo,
    pub reader_connected: bool,
    pub reader_type: String,
    pub launcher_disabled: bool,
    pub stop_requested: bool,
    pub write_request: String,
    #[serde(default)]
    pub db_load_time: Option<DateTime<Utc>>,
    pub uid_mappings: usize,
    pub text_mappings: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct LaunchParams {
    pub text: String,
    #[serde(default)]
    pub uid: Option<String>,
}

impl LaunchParams {
    pub fn validate(&self) -> Result<(), ErrorInfo> {
        require_text(&self.text, "text")?;
        if let Some(uid) = &self.uid {
            if uid.len() > 128 || uid.chars().any(char::is_whitespace) {
                return Err(ErrorInfo::new(
                    "invalid_uid",
                    "uid must be 128 characters or fewer without whitespace",
                ));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct WriteRequestParams {
    pub text: String,
}

pub fn parse_launch(params: Value) -> Result<LaunchParams, ErrorInfo> {
    let parsed: LaunchParams = serde_json::from_value(params).map_err(|err| {
        ErrorInfo::new(
            "invalid_params",
            format!("launch payload is invalid JSON: {}", err),
        )
    })?;
    parsed.validate()?;
    Ok(parsed)
}

/// Parses `set_write_request`. An empty text clears the pending request.
pub fn parse_write_request(params: Value) -> Result<WriteRequestParams, ErrorInfo> {
    let parsed: WriteRequestParams = serde_json::from_value(params).map_err(|err| {
        ErrorInfo::new(
            "invalid_params",
            format!("write request payload is invalid JSON: {}", err),
        )
    })?;
    if parsed.text.len() > MAX_TOKEN_TEXT_BYTES {
        return Err(ErrorInfo::new("text_too_large", "text exceeds token capacity"));
    }
    Ok(parsed)
}

fn require_text(value: &str, field: &str) -> Result<(), ErrorInfo> {
    if value.trim().is_empty() {
        return Err(ErrorInfo::new(
            "missing_field",
            format!("{} is required", field),
        ));
    }
    if value.len() > MAX_TOKEN_TEXT_BYTES {
        return Err(ErrorInfo::new(
            "text_too_large",
            format!("{} exceeds token capacity", field),
        ));
    }
    Ok(())
}
