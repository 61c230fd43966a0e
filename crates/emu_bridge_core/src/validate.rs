//! Parameter coercion. Every wire parameter is a string; handlers declare the
//! kind they expect and receive a [`Params`] of already-coerced values.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::{BridgeError, Result};

/// Highest address on a 24-bit bus.
pub const MAX_ADDRESS: u32 = 0xFF_FFFF;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    Int,
    HexAddr,
    Float,
    Bool,
    Enum(&'static [&'static str]),
    Text,
    Json,
}

impl ParamKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            ParamKind::Int => "int",
            ParamKind::HexAddr => "hex-address",
            ParamKind::Float => "float",
            ParamKind::Bool => "bool",
            ParamKind::Enum(_) => "enum",
            ParamKind::Text => "string",
            ParamKind::Json => "json",
        }
    }

    pub fn coerce(&self, name: &str, raw: &str) -> Result<ParamValue> {
        match self {
            ParamKind::Int => parse_int(raw)
                .map(ParamValue::Int)
                .ok_or_else(|| BridgeError::invalid(name, format!("expected an integer, got '{raw}'"))),
            ParamKind::HexAddr => parse_address(raw).map(ParamValue::Addr).ok_or_else(|| {
                BridgeError::invalid(
                    name,
                    format!("expected a hex address up to 0x{MAX_ADDRESS:06X}, got '{raw}'"),
                )
            }),
            ParamKind::Float => raw
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|f| f.is_finite())
                .map(ParamValue::Float)
                .ok_or_else(|| BridgeError::invalid(name, format!("expected a number, got '{raw}'"))),
            ParamKind::Bool => parse_bool(raw)
                .map(ParamValue::Bool)
                .ok_or_else(|| BridgeError::invalid(name, format!("expected true or false, got '{raw}'"))),
            ParamKind::Enum(choices) => {
                let token = raw.trim();
                if choices.contains(&token) {
                    Ok(ParamValue::Text(token.to_string()))
                } else {
                    Err(BridgeError::invalid(
                        name,
                        format!("expected one of {}, got '{raw}'", choices.join(", ")),
                    ))
                }
            }
            ParamKind::Text => Ok(ParamValue::Text(raw.to_string())),
            ParamKind::Json => serde_json::from_str(raw)
                .map(ParamValue::Json)
                .map_err(|e| BridgeError::invalid(name, format!("malformed JSON: {e}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Int(i64),
    Addr(u32),
    Float(f64),
    Bool(bool),
    Text(String),
    Json(Value),
}

/// Accepts `0x7E0020`, `$7E0020` and bare `7E0020`.
pub fn parse_address(raw: &str) -> Option<u32> {
    let s = raw.trim();
    let digits = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .or_else(|| s.strip_prefix('$'))
        .unwrap_or(s);
    if digits.is_empty() || digits.len() > 8 {
        return None;
    }
    u32::from_str_radix(digits, 16)
        .ok()
        .filter(|addr| *addr <= MAX_ADDRESS)
}

/// Decimal, or hex with a `0x` prefix. A leading `-` is allowed on decimals.
pub fn parse_int(raw: &str) -> Option<i64> {
    let s = raw.trim();
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        return i64::from_str_radix(hex, 16).ok();
    }
    s.parse::<i64>().ok()
}

pub fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Coerced parameters handed to a handler.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Params {
    values: BTreeMap<String, ParamValue>,
}

impl Params {
    pub fn insert(&mut self, name: impl Into<String>, value: ParamValue) {
        self.values.insert(name.into(), value);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.values.get(name)
    }

    fn require(&self, name: &str) -> Result<&ParamValue> {
        self.values
            .get(name)
            .ok_or_else(|| BridgeError::MissingParameter(name.to_string()))
    }

    pub fn addr(&self, name: &str) -> Result<u32> {
        match self.require(name)? {
            ParamValue::Addr(a) => Ok(*a),
            other => Err(mismatch(name, "address", other)),
        }
    }

    pub fn opt_addr(&self, name: &str) -> Result<Option<u32>> {
        self.optional(name, |p| p.addr(name))
    }

    pub fn int(&self, name: &str) -> Result<i64> {
        match self.require(name)? {
            ParamValue::Int(i) => Ok(*i),
            ParamValue::Addr(a) => Ok(i64::from(*a)),
            other => Err(mismatch(name, "integer", other)),
        }
    }

    pub fn opt_int(&self, name: &str) -> Result<Option<i64>> {
        self.optional(name, |p| p.int(name))
    }

    /// Integer constrained to `[min, max]`.
    pub fn int_in(&self, name: &str, min: i64, max: i64) -> Result<i64> {
        let value = self.int(name)?;
        if (min..=max).contains(&value) {
            Ok(value)
        } else {
            Err(BridgeError::invalid(
                name,
                format!("{value} is outside {min}..={max}"),
            ))
        }
    }

    pub fn opt_int_in(&self, name: &str, min: i64, max: i64) -> Result<Option<i64>> {
        self.optional(name, |p| p.int_in(name, min, max))
    }

    pub fn float(&self, name: &str) -> Result<f64> {
        match self.require(name)? {
            ParamValue::Float(f) => Ok(*f),
            ParamValue::Int(i) => Ok(*i as f64),
            other => Err(mismatch(name, "number", other)),
        }
    }

    pub fn flag(&self, name: &str) -> bool {
        matches!(self.values.get(name), Some(ParamValue::Bool(true)))
    }

    pub fn text(&self, name: &str) -> Result<&str> {
        match self.require(name)? {
            ParamValue::Text(s) => Ok(s.as_str()),
            other => Err(mismatch(name, "string", other)),
        }
    }

    pub fn opt_text(&self, name: &str) -> Option<&str> {
        match self.values.get(name) {
            Some(ParamValue::Text(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Enum token, falling back to `default` when the parameter was omitted.
    pub fn choice<'a>(&'a self, name: &str, default: &'a str) -> &'a str {
        self.opt_text(name).unwrap_or(default)
    }

    pub fn json(&self, name: &str) -> Result<&Value> {
        match self.require(name)? {
            ParamValue::Json(v) => Ok(v),
            other => Err(mismatch(name, "JSON", other)),
        }
    }

    fn optional<T>(&self, name: &str, get: impl FnOnce(&Self) -> Result<T>) -> Result<Option<T>> {
        if self.contains(name) {
            get(self).map(Some)
        } else {
            Ok(None)
        }
    }
}

fn mismatch(name: &str, expected: &str, got: &ParamValue) -> BridgeError {
    BridgeError::Internal(format!(
        "parameter '{name}' declared as {got:?} but read as {expected}"
    ))
}
