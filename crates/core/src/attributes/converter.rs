//! Conversion of raw directory values into local values.
//!
//! [`convert`] is total: malformed input becomes the empty value of the
//! target type, so one odd attribute never fails a record.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::{DateTime, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::directory::common_name;
use crate::models::{DirectoryValue, LocalValue};

/// Difference between the FILETIME epoch (1601) and the unix epoch, in
/// 100 ns intervals.
const FILETIME_UNIX_DIFF: i64 = 116_444_736_000_000_000;
const FILETIME_TICKS_PER_SEC: i64 = 10_000_000;
/// "Never" sentinel used by `accountExpires` and friends.
const FILETIME_NEVER: i64 = i64::MAX;

const CANONICAL_TIME: &str = "%Y-%m-%d %H:%M:%S";

/// Type of a whitelisted attribute.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeType {
    #[default]
    String,
    List,
    Integer,
    Bool,
    Octet,
    Time,
    Timestamp,
    #[serde(alias = "commonName", alias = "cn")]
    CommonName,
}

impl AttributeType {
    /// Types that can be written back to the directory.
    pub fn is_writable(self) -> bool {
        matches!(self, Self::String | Self::List | Self::Integer | Self::Bool)
    }

    /// The empty value of this type.
    pub fn empty_value(self) -> LocalValue {
        match self {
            Self::List => LocalValue::List(Vec::new()),
            Self::Integer => LocalValue::Integer(0),
            Self::Bool => LocalValue::Bool(false),
            _ => LocalValue::Text(String::new()),
        }
    }
}

/// Convert a raw value (or its absence) to the local form of `attribute_type`.
pub fn convert(attribute_type: AttributeType, raw: Option<&DirectoryValue>) -> LocalValue {
    let Some(raw) = raw else {
        return attribute_type.empty_value();
    };

    match attribute_type {
        AttributeType::String => LocalValue::Text(first_text(raw).trim().to_string()),
        AttributeType::List => LocalValue::List(texts(raw)),
        AttributeType::Integer => LocalValue::Integer(parse_integer(&first_text(raw))),
        AttributeType::Bool => LocalValue::Bool(parse_bool(&first_text(raw))),
        AttributeType::Octet => LocalValue::Text(octet(raw)),
        AttributeType::Time => LocalValue::Text(generalized_time(&first_text(raw))),
        AttributeType::Timestamp => LocalValue::Text(timestamp(&first_text(raw))),
        AttributeType::CommonName => {
            let value = first_text(raw);
            let value = value.trim();
            LocalValue::Text(common_name(value).unwrap_or(value).to_string())
        }
    }
}

fn texts(raw: &DirectoryValue) -> Vec<String> {
    match raw {
        DirectoryValue::Text(values) => values.clone(),
        DirectoryValue::Binary(values) => values
            .iter()
            .map(|v| String::from_utf8_lossy(v).into_owned())
            .collect(),
    }
}

fn first_text(raw: &DirectoryValue) -> String {
    texts(raw).into_iter().next().unwrap_or_default()
}

/// First numeric token (optionally signed); 0 when there is none.
fn parse_integer(value: &str) -> i64 {
    let value = value.trim_start();
    let (sign, digits) = match value.strip_prefix('-') {
        Some(rest) => (-1, rest),
        None => (1, value.strip_prefix('+').unwrap_or(value)),
    };
    let end = digits
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(digits.len());
    digits[..end].parse::<i64>().map(|n| sign * n).unwrap_or(0)
}

fn parse_bool(value: &str) -> bool {
    let value = value.trim();
    if ["1", "true", "yes", "on"]
        .iter()
        .any(|t| value.eq_ignore_ascii_case(t))
    {
        return true;
    }
    value.parse::<f64>().map(|n| n != 0.0).unwrap_or(false)
}

fn octet(raw: &DirectoryValue) -> String {
    match raw {
        DirectoryValue::Binary(values) => values.first().map(|v| STANDARD.encode(v)),
        DirectoryValue::Text(values) => values.first().map(|v| STANDARD.encode(v.as_bytes())),
    }
    .unwrap_or_default()
}

/// LDAP generalized time (`YYYYMMDDHHMMSS[.f]Z`) in canonical form.
fn generalized_time(value: &str) -> String {
    let value = value.trim();
    value
        .get(..14)
        .and_then(|head| NaiveDateTime::parse_from_str(head, "%Y%m%d%H%M%S").ok())
        .map(|dt| dt.format(CANONICAL_TIME).to_string())
        .unwrap_or_default()
}

/// FILETIME or unix seconds in canonical form; `0` and "never" are empty.
fn timestamp(value: &str) -> String {
    let Ok(raw) = value.trim().parse::<i64>() else {
        return String::new();
    };
    if raw <= 0 || raw == FILETIME_NEVER {
        return String::new();
    }
    let secs = if raw >= FILETIME_UNIX_DIFF {
        (raw - FILETIME_UNIX_DIFF) / FILETIME_TICKS_PER_SEC
    } else {
        raw
    };
    DateTime::from_timestamp(secs, 0)
        .map(|dt| dt.format(CANONICAL_TIME).to_string())
        .unwrap_or_default()
}
