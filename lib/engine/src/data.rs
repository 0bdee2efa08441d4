//! Data rows: the typed blobs nodes exchange through the store.

use crate::node::NodeId;
use chrono::{DateTime, Utc};
use gridwork_core::{define_id, WorkflowId};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;
use std::str::FromStr;

define_id!(
    /// Unique identifier for a data row.
    DataId,
    "data"
);

/// The type of a data row.
///
/// `Custom` keeps the core opaque to domain-specific extensions (agent
/// action/observation/memory/delegation rows and the like) — it only
/// special-cases the five types it must interpret itself. Serialized as a
/// plain string on the wire, so an unrecognized `content_type` round-trips
/// instead of failing to deserialize.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataType {
    NodeInput,
    NodeResult,
    NodeYield,
    NodeYieldResult,
    WorkflowOutput,
    Custom(String),
}

impl DataType {
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::NodeInput => "NODE_INPUT",
            Self::NodeResult => "NODE_RESULT",
            Self::NodeYield => "NODE_YIELD",
            Self::NodeYieldResult => "NODE_YIELD_RESULT",
            Self::WorkflowOutput => "WORKFLOW_OUTPUT",
            Self::Custom(s) => s,
        }
    }
}

impl From<&str> for DataType {
    fn from(s: &str) -> Self {
        match s {
            "NODE_INPUT" => Self::NodeInput,
            "NODE_RESULT" => Self::NodeResult,
            "NODE_YIELD" => Self::NodeYield,
            "NODE_YIELD_RESULT" => Self::NodeYieldResult,
            "WORKFLOW_OUTPUT" => Self::WorkflowOutput,
            other => Self::Custom(other.to_string()),
        }
    }
}

impl Serialize for DataType {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for DataType {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ok(DataType::from(s.as_str()))
    }
}

/// Discriminates a `NODE_RESULT` row as a success or a failure payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultDiscriminator {
    Success,
    Error,
}

/// One append-only row in the `data` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataRow {
    pub data_id: DataId,
    pub workflow_id: WorkflowId,
    pub node_id: Option<NodeId>,
    pub data_type: DataType,
    pub discriminator: Option<ResultDiscriminator>,
    pub key: Option<String>,
    pub content: JsonValue,
    pub content_type: Option<String>,
    pub metadata: JsonValue,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_type_screaming_snake_case_roundtrip() {
        let json = serde_json::to_string(&DataType::NodeInput).expect("serialize");
        assert_eq!(json, "\"NODE_INPUT\"");
        let parsed: DataType = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(parsed, DataType::NodeInput);
    }

    #[test]
    fn data_type_custom_passthrough() {
        let parsed: DataType = serde_json::from_str("\"AGENT_OBSERVATION\"").expect("deserialize");
        assert_eq!(parsed, DataType::Custom("AGENT_OBSERVATION".into()));
    }
}
