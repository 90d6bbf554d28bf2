//! The opaque, canonically serializable mutation payload carried by a
//! transaction, and the type classification derived from its action string.

use serde::{Deserialize, Serialize};

/// User-defined mutation data. An opaque wrapper over `serde_json::Value` so
/// the core never needs to know the shape of a caller's domain records; all
/// hashing and equality pass through the canonical encoding in [`crate::hash`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PayloadValue(pub serde_json::Value);

impl PayloadValue {
    pub fn new(value: serde_json::Value) -> Self {
        Self(value)
    }
}

/// `{resource, action, data}` — a unit of intent to mutate a server-side resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payload {
    pub resource: String,
    pub action: String,
    pub data: PayloadValue,
}

impl Payload {
    pub fn new(resource: impl Into<String>, action: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            resource: resource.into(),
            action: action.into(),
            data: PayloadValue::new(data),
        }
    }

    /// Classify `action` into a [`TransactionType`] by substring match on its
    /// lowercased form: `create`, `update`, `delete` map to their respective
    /// type; anything else is `custom`.
    pub fn transaction_type(&self) -> TransactionType {
        let lowered = self.action.to_lowercase();
        if lowered.contains("create") {
            TransactionType::Create
        } else if lowered.contains("update") {
            TransactionType::Update
        } else if lowered.contains("delete") {
            TransactionType::Delete
        } else {
            TransactionType::Custom
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionType {
    Create,
    Update,
    Delete,
    Custom,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn classifies_by_lowercased_substring() {
        assert_eq!(
            Payload::new("companies", "CREATE_COMPANY", json!({})).transaction_type(),
            TransactionType::Create
        );
        assert_eq!(
            Payload::new("companies", "updateCompanyName", json!({})).transaction_type(),
            TransactionType::Update
        );
        assert_eq!(
            Payload::new("companies", "delete", json!({})).transaction_type(),
            TransactionType::Delete
        );
        assert_eq!(
            Payload::new("companies", "archive", json!({})).transaction_type(),
            TransactionType::Custom
        );
    }
}
