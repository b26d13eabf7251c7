use std::borrow::Cow;

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Field name reserved for the arrival time of an entry
pub const TIMESTAMP_FIELD: &str = "timestamp";

/// Field name used for the optional entry identifier
pub const ID_FIELD: &str = "id";

/// A registered JSON record plus its system-assigned timestamp
///
/// The payload is an open-ended JSON object. The `timestamp` field is owned by
/// the store; `id` is only populated by backends that assign identifiers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Entry {
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    #[serde(flatten)]
    fields: Map<String, Value>,
}

impl Entry {
    /// Builds an entry from a JSON object, stamping it with `now`
    ///
    /// Any caller-supplied `timestamp` is overwritten.
    pub fn stamped(mut fields: Map<String, Value>, now: DateTime<Utc>) -> Self {
        fields.insert(TIMESTAMP_FIELD.to_string(), Value::String(format_timestamp(now)));
        Self { id: None, fields }
    }

    /// Rebuilds an entry from stored data without touching its timestamp
    ///
    /// Returns `None` if the value is not a JSON object.
    pub fn from_stored(value: Value) -> Option<Self> {
        match value {
            Value::Object(fields) => Some(Self::from_map(fields)),
            _ => None,
        }
    }

    /// Lifts a string `id` out of the payload; other `id` values stay as data
    fn from_map(mut fields: Map<String, Value>) -> Self {
        let id = match fields.remove(ID_FIELD) {
            Some(Value::String(id)) => Some(id),
            Some(other) => {
                fields.insert(ID_FIELD.to_string(), other);
                None
            }
            None => None,
        };
        Self { id, fields }
    }

    /// Attaches an identifier, replacing any payload field of the same name
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.fields.remove(ID_FIELD);
        self.id = Some(id.into());
        self
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// Returns the value stored under `key`, if any. The identifier counts as a field.
    pub fn get(&self, key: &str) -> Option<Cow<'_, Value>> {
        match (key, &self.id) {
            (ID_FIELD, Some(id)) => Some(Cow::Owned(Value::String(id.clone()))),
            _ => self.fields.get(key).map(Cow::Borrowed),
        }
    }

    /// Presence test used by filtering
    pub fn contains_key(&self, key: &str) -> bool {
        self.fields.contains_key(key) || (key == ID_FIELD && self.id.is_some())
    }

    /// Parses the stored timestamp
    ///
    /// Returns `None` when the field is missing or not a recognizable instant.
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.fields
            .get(TIMESTAMP_FIELD)
            .and_then(Value::as_str)
            .and_then(parse_timestamp)
    }

    /// Whether this entry has aged past `cutoff`
    ///
    /// Entries without a parseable timestamp are always considered expired.
    pub fn is_expired(&self, cutoff: DateTime<Utc>) -> bool {
        match self.timestamp() {
            Some(ts) => ts <= cutoff,
            None => true,
        }
    }

    /// Converts the entry back into a plain JSON object
    pub fn into_value(self) -> Value {
        let mut fields = self.fields;
        if let Some(id) = self.id {
            fields.insert(ID_FIELD.to_string(), Value::String(id));
        }
        Value::Object(fields)
    }
}

impl<'de> Deserialize<'de> for Entry {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Map::deserialize(deserializer).map(Self::from_map)
    }
}

/// Generates an opaque identifier for backends that key entries by id
pub fn generate_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Formats an instant the way the store writes it: RFC 3339, microseconds, `Z`
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parses RFC 3339 instants, falling back to naive ISO-8601 date-times read as UTC
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}
