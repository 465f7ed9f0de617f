//! Duration values as written in test scripts ("1m", "30s", "1m30s", "250ms" or integer seconds)

use serde::{Deserialize, Deserializer};
use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScriptDuration(Duration);

impl ScriptDuration {
    pub fn into_inner(self) -> Duration {
        self.0
    }

    /// Parse a human duration string
    pub fn parse(input: &str) -> Result<Self, String> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err("empty duration".to_string());
        }
        if let Ok(secs) = trimmed.parse::<u64>() {
            return Ok(Self(Duration::from_secs(secs)));
        }
        humantime::parse_duration(trimmed)
            .map(Self)
            .map_err(|e| format!("invalid duration '{}': {}", trimmed, e))
    }
}

impl<'de> Deserialize<'de> for ScriptDuration {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct Visitor;

        impl serde::de::Visitor<'_> for Visitor {
            type Value = ScriptDuration;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a duration string (e.g. \"30s\", \"1m30s\") or integer seconds")
            }

            fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                Ok(ScriptDuration(Duration::from_secs(v)))
            }

            fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                u64::try_from(v)
                    .map(|v| ScriptDuration(Duration::from_secs(v)))
                    .map_err(|_| E::custom("duration must not be negative"))
            }

            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                ScriptDuration::parse(v).map_err(E::custom)
            }
        }

        deserializer.deserialize_any(Visitor)
    }
}
