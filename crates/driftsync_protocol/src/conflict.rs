//! Client-reported conflict audit records.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// How a client resolved a conflict it detected locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResolutionStrategy {
    /// The change with the greater `(timestamp, version)` won.
    LastWriteWins,
    /// The client's local state won.
    ClientWins,
    /// The server's state won.
    ServerWins,
    /// Application-specific resolution.
    Custom,
}

/// A conflict a client detected and resolved locally.
///
/// Purely informational: the server records it for audit and never
/// recomputes the resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictReport {
    /// Table the conflicting record lives in.
    pub table_name: String,
    /// Logical key of the conflicting record.
    pub record_id: String,
    /// The client's version of the row.
    pub client_data: Value,
    /// The server's version of the row as the client saw it.
    pub server_data: Value,
    /// Strategy the client applied.
    pub resolution_strategy: ResolutionStrategy,
    /// The row the client kept.
    pub resolved_data: Value,
    /// When the client detected the conflict, epoch milliseconds.
    pub detected_at: i64,
    /// When the client resolved it, epoch milliseconds.
    pub resolved_at: i64,
    /// Session the report arrived in, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync_session_id: Option<Uuid>,
}
