//! Domain identifiers (strongly-typed IDs).
//!
//! Two families live here:
//! - **Local ids** (`EntryId`, `HostId`): ULID ベース。Phantom type で型を分ける
//! - **Device ids** (`JobId`): the device issues them, we only carry them around

use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use ulid::Ulid;

/// IdMarker は各 ID 型のマーカー trait
pub trait IdMarker: Send + Sync + 'static {
    /// Display で使うプレフィックス（例: "entry-"）
    fn prefix() -> &'static str;
}

/// ジェネリック ID 型
///
/// `EntryId` と `HostId` は同じ ULID 表現だが、型としては混同できない。
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Id<T: IdMarker> {
    ulid: Ulid,
    #[serde(skip)]
    _marker: PhantomData<T>,
}

impl<T: IdMarker> Id<T> {
    pub fn new() -> Self {
        Self::from_ulid(Ulid::new())
    }

    pub fn from_ulid(ulid: Ulid) -> Self {
        Self {
            ulid,
            _marker: PhantomData,
        }
    }

    pub fn as_ulid(&self) -> Ulid {
        self.ulid
    }
}

impl<T: IdMarker> Default for Id<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: IdMarker> From<Ulid> for Id<T> {
    fn from(ulid: Ulid) -> Self {
        Self::from_ulid(ulid)
    }
}

impl<T: IdMarker> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", T::prefix(), self.ulid)
    }
}

/// QueueEntry のマーカー型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Entry {}

impl IdMarker for Entry {
    fn prefix() -> &'static str {
        "entry-"
    }
}

/// WorkerHost のマーカー型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Host {}

impl IdMarker for Host {
    fn prefix() -> &'static str {
        "host-"
    }
}

pub type EntryId = Id<Entry>;
pub type HostId = Id<Host>;

/// Device job id (`WFID`).
///
/// The device reports it as a number on some endpoints and as a string on
/// others, so both shapes normalize to the same textual form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Reads a job id out of a raw JSON field.
    pub fn from_value(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::String(s) if !s.is_empty() => Some(Self(s.clone())),
            serde_json::Value::Number(n) => Some(Self(n.to_string())),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl<'de> Deserialize<'de> for JobId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let value = serde_json::Value::deserialize(deserializer)?;
        Self::from_value(&value)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid job id: {value}")))
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn entry_ids_display_with_prefix() {
        let id = EntryId::new();
        assert!(id.to_string().starts_with("entry-"));
    }

    #[test]
    fn ids_are_unique() {
        assert_ne!(EntryId::new(), EntryId::new());
    }

    #[test]
    fn job_id_accepts_numbers_and_strings() {
        assert_eq!(JobId::from_value(&json!(42)), Some(JobId::new("42")));
        assert_eq!(JobId::from_value(&json!("42")), Some(JobId::new("42")));
        assert_eq!(JobId::from_value(&json!(null)), None);
        assert_eq!(JobId::from_value(&json!("")), None);

        let id: JobId = serde_json::from_value(json!(7)).unwrap();
        assert_eq!(id.as_str(), "7");
    }
}
