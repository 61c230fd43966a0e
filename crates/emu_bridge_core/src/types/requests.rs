use std::collections::BTreeMap;

use serde::{Serialize, Serializer};
use serde::ser::SerializeMap;
use serde_json::{Map, Value};

use crate::{BridgeError, Result};

/// A single protocol request. On the wire the parameters sit next to `type`
/// in one flat object; every parameter is carried as a string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub command_type: String,
    pub params: BTreeMap<String, String>,
}

impl Command {
    pub fn new(command_type: impl Into<String>) -> Self {
        Self {
            command_type: command_type.into(),
            params: BTreeMap::new(),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    /// Parse one newline-delimited request.
    pub fn parse_line(line: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(line.trim())
            .map_err(|e| BridgeError::invalid("request", format!("malformed JSON: {e}")))?;
        Self::from_value(value)
    }

    pub fn from_value(value: Value) -> Result<Self> {
        let Value::Object(mut object) = value else {
            return Err(BridgeError::invalid("request", "expected a JSON object"));
        };

        let command_type = match object.remove("type") {
            Some(Value::String(s)) if !s.is_empty() => s,
            Some(Value::Null) | None => return Err(BridgeError::MissingParameter("type".into())),
            Some(_) => return Err(BridgeError::invalid("type", "expected a non-empty string")),
        };

        let params = object
            .into_iter()
            .filter(|(_, v)| !v.is_null())
            .map(|(k, v)| (k, stringify(v)))
            .collect();

        Ok(Self {
            command_type,
            params,
        })
    }

    pub fn to_value(&self) -> Value {
        let mut object = Map::new();
        object.insert("type".into(), Value::String(self.command_type.clone()));
        for (k, v) in &self.params {
            object.insert(k.clone(), Value::String(v.clone()));
        }
        Value::Object(object)
    }
}

impl Serialize for Command {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.params.len() + 1))?;
        map.serialize_entry("type", &self.command_type)?;
        for (k, v) in &self.params {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

fn stringify(value: Value) -> String {
    match value {
        Value::String(s) => s,
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorCode;

    #[test]
    fn test_parse_flat_request() {
        let cmd = Command::parse_line(r#"{"type":"READ","addr":"0x7E0020"}"#).unwrap();
        assert_eq!(cmd.command_type, "READ");
        assert_eq!(cmd.param("addr"), Some("0x7E0020"));
    }

    #[test]
    fn test_non_string_params_are_stringified() {
        let cmd = Command::parse_line(
            r#"{"type":"BATCH","count":5,"reset":true,"commands":[{"type":"PING"}]}"#,
        )
        .unwrap();
        assert_eq!(cmd.param("count"), Some("5"));
        assert_eq!(cmd.param("reset"), Some("true"));
        assert_eq!(cmd.param("commands"), Some(r#"[{"type":"PING"}]"#));
    }

    #[test]
    fn test_missing_type_is_missing_parameter() {
        let err = Command::parse_line(r#"{"addr":"0x10"}"#).unwrap_err();
        assert_eq!(err.code(), ErrorCode::MissingParameter);
    }

    #[test]
    fn test_garbage_line_is_invalid_value() {
        let err = Command::parse_line("not json").unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidParameterValue);

        let err = Command::parse_line("[1,2]").unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidParameterValue);
    }

    #[test]
    fn test_serialize_flattens_params() {
        let cmd = Command::new("WRITE").with_param("addr", "0x10").with_param("value", "3");
        let json = serde_json::to_value(&cmd).unwrap();
        assert_eq!(json["type"], "WRITE");
        assert_eq!(json["addr"], "0x10");
        assert_eq!(json, cmd.to_value());
    }
}
