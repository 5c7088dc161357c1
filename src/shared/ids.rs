use getrandom::getrandom;
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};

const BASE36_ALPHABET: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
const SESSION_PREFIX: &str = "workflow-";
const SESSION_SUFFIX_LEN: usize = 8;

pub fn validate_record_id_value(kind: &str, raw: &str) -> Result<i64, String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(format!("{kind} must be non-empty"));
    }
    match trimmed.parse::<i64>() {
        Ok(value) if value > 0 => Ok(value),
        _ => Err(format!("{kind} must be a positive integer")),
    }
}

macro_rules! define_record_id {
    ($name:ident, $kind:literal) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
        #[serde(transparent)]
        pub struct $name(i64);

        impl $name {
            pub fn new(value: i64) -> Self {
                Self(value)
            }

            pub fn parse(raw: &str) -> Result<Self, String> {
                validate_record_id_value($kind, raw).map(Self)
            }

            pub fn get(self) -> i64 {
                self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                self.0.fmt(f)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: Deserializer<'de>,
            {
                let raw = i64::deserialize(deserializer)?;
                if raw <= 0 {
                    return Err(D::Error::custom(format!(
                        "invalid {} `{}`: must be positive",
                        $kind, raw
                    )));
                }
                Ok(Self(raw))
            }
        }

        impl ToSql for $name {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                self.0.to_sql()
            }
        }

        impl FromSql for $name {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                i64::column_result(value).map(Self)
            }
        }
    };
}

define_record_id!(WorkflowId, "workflow id");
define_record_id!(StepId, "step id");
define_record_id!(ParticipantId, "participant id");
define_record_id!(WorkRequestId, "work request id");

/// Opaque conversation handle the agent uses to keep memory across calls.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn parse(raw: &str) -> Result<Self, String> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err("session id must be non-empty".to_string());
        }
        if !trimmed
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == '_')
        {
            return Err("session id must use only ASCII letters, digits, '-' or '_'".to_string());
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Side conversation that shares this session's prefix without polluting its memory.
    pub fn derived(&self, suffix: &str) -> Self {
        Self(format!("{}-{suffix}", self.0))
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl ToSql for SessionId {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        self.0.to_sql()
    }
}

impl FromSql for SessionId {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let raw = value.as_str()?;
        Self::parse(raw).map_err(|err| FromSqlError::Other(err.into()))
    }
}

pub fn generate_session_id() -> Result<SessionId, String> {
    let mut bytes = [0_u8; SESSION_SUFFIX_LEN];
    getrandom(&mut bytes).map_err(|err| format!("failed to generate session id: {err}"))?;
    let suffix = bytes
        .iter()
        .map(|byte| BASE36_ALPHABET[usize::from(*byte) % BASE36_ALPHABET.len()] as char)
        .collect::<String>();
    Ok(SessionId(format!("{SESSION_PREFIX}{suffix}")))
}
