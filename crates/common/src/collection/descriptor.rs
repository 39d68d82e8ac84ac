use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How a collection gets released
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollectionType {
    #[default]
    Manual,
    Scheduled,
}

/// What the publishing pipeline needs to know about a collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionDescription {
    pub id: String,
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: CollectionType,
    #[serde(default)]
    pub publish_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub encrypted: bool,
    /// Published uris to remove as part of this release
    #[serde(default)]
    pub pending_deletes: Vec<String>,
}

impl CollectionDescription {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind: CollectionType::Manual,
            publish_date: None,
            encrypted: false,
            pending_deletes: Vec::new(),
        }
    }

    pub fn encrypted(mut self, encrypted: bool) -> Self {
        self.encrypted = encrypted;
        self
    }

    pub fn scheduled(mut self, publish_date: DateTime<Utc>) -> Self {
        self.kind = CollectionType::Scheduled;
        self.publish_date = Some(publish_date);
        self
    }

    pub fn with_pending_deletes(mut self, uris: impl IntoIterator<Item = String>) -> Self {
        self.pending_deletes.extend(uris);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_wire_format() {
        let json = r#"{
            "id": "budget-2024",
            "name": "Budget 2024",
            "type": "scheduled",
            "publishDate": "2024-03-06T12:30:00Z",
            "encrypted": true,
            "pendingDeletes": ["/economy/old"]
        }"#;
        let desc: CollectionDescription = serde_json::from_str(json).unwrap();
        assert_eq!(desc.kind, CollectionType::Scheduled);
        assert!(desc.encrypted);
        assert_eq!(desc.pending_deletes, vec!["/economy/old".to_string()]);
    }

    #[test]
    fn test_descriptor_defaults() {
        let desc: CollectionDescription =
            serde_json::from_str(r#"{"id": "c1", "name": "c1"}"#).unwrap();
        assert_eq!(desc.kind, CollectionType::Manual);
        assert!(!desc.encrypted);
        assert!(desc.publish_date.is_none());
    }
}
