use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{BridgeError, ErrorCode};

/// Terminal response to one command. `data` and `error`/`errorCode` are
/// mutually exclusive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(rename = "errorCode", default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<u8>,
}

impl Response {
    pub fn ok(data: Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            error_code: None,
        }
    }

    pub fn from_error(err: &BridgeError) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(err.to_string()),
            error_code: Some(err.code().as_u8()),
        }
    }

    pub fn error_code(&self) -> Option<ErrorCode> {
        self.error_code.and_then(ErrorCode::from_u8)
    }

    /// One wire line, without the trailing newline.
    pub fn to_line(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            format!(r#"{{"success":false,"error":"serialization failed: {e}","errorCode":1}}"#)
        })
    }
}

impl From<crate::Result<Value>> for Response {
    fn from(result: crate::Result<Value>) -> Self {
        match result {
            Ok(data) => Response::ok(data),
            Err(err) => Response::from_error(&err),
        }
    }
}

/// Asynchronous event frame: `{"type":"EVENT","event":name, ...payload}`.
/// Payload keys named `type` or `event` are overwritten.
pub fn event_frame(event: &str, payload: &Map<String, Value>) -> Value {
    let mut frame = payload.clone();
    frame.insert("type".into(), Value::String("EVENT".into()));
    frame.insert("event".into(), Value::String(event.into()));
    Value::Object(frame)
}
