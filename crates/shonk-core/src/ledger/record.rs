use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::ItemRef;

/// Durable per-user state.
///
/// Field names on disk match the bot's historical `user_data.json` layout so
/// an existing file keeps loading. Missing keys fall back to defaults.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserRecord {
    pub points: u64,
    pub premium: bool,
    pub banned: bool,

    #[serde(rename = "isshonk_uses")]
    pub monthly_uses: u32,
    #[serde(rename = "isshonk_reset", with = "timestamp")]
    pub monthly_reset_at: Option<DateTime<Utc>>,

    #[serde(rename = "daily_reset", with = "timestamp")]
    pub daily_claim_at: Option<DateTime<Utc>>,

    /// Claimed items in claim order. Append-only.
    #[serde(rename = "shonks")]
    pub collection: Vec<ItemRef>,
}

/// Optional timestamps stored as strings.
///
/// Unset is written as `""`. On read we accept RFC 3339 as well as the naive
/// `YYYY-MM-DDTHH:MM:SS[.ffffff]` form (interpreted as UTC).
mod timestamp {
    use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(v: &Option<DateTime<Utc>>, s: S) -> Result<S::Ok, S::Error> {
        match v {
            Some(dt) => s.serialize_str(&dt.to_rfc3339_opts(SecondsFormat::Micros, true)),
            None => s.serialize_str(""),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<DateTime<Utc>>, D::Error> {
        let raw = Option::<String>::deserialize(d)?.unwrap_or_default();
        parse(&raw).map_err(de::Error::custom)
    }

    pub(super) fn parse(raw: &str) -> Result<Option<DateTime<Utc>>, String> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Ok(None);
        }
        if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
            return Ok(Some(dt.with_timezone(&Utc)));
        }
        NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
            .map(|naive| Some(naive.and_utc()))
            .map_err(|e| format!("invalid timestamp {raw:?}: {e}"))
    }
}
