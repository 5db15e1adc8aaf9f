// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Operation types flowing through the pipeline.
//!
//! Three shapes, in pipeline order:
//!
//! 1. [`TableOperation`]: a raw row change read from a source data store.
//! 2. [`TransformedOperation`]: the row reshaped into a public schema.
//! 3. [`TransformedOperationWithSource`]: the transformed row annotated
//!    with its origin, which is what gets persisted and shipped.
//!
//! A [`Transaction`] groups the table operations of one source commit and
//! carries a single-use acknowledgement channel back to the source.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::oneshot;

/// JSON object payload of a row.
pub type RowObject = Map<String, Value>;

/// A row-level change captured from a source data store.
///
/// Deletes carry no row payload; the key columns identify the row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum TableOperation {
    Insert {
        table: String,
        table_schema: String,
        key_columns: Vec<String>,
        new: RowObject,
    },
    Update {
        table: String,
        table_schema: String,
        key_columns: Vec<String>,
        new: RowObject,
    },
    Delete {
        table: String,
        table_schema: String,
        key_columns: Vec<String>,
    },
}

impl TableOperation {
    /// The table this change applies to.
    pub fn table(&self) -> &str {
        match self {
            Self::Insert { table, .. } | Self::Update { table, .. } | Self::Delete { table, .. } => {
                table
            }
        }
    }

    /// Operation kind as a lowercase tag.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Insert { .. } => "insert",
            Self::Update { .. } => "update",
            Self::Delete { .. } => "delete",
        }
    }
}

/// A row change expressed in the shape of a public schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum TransformedOperation {
    Insert {
        key_columns: Vec<String>,
        object: RowObject,
    },
    Update {
        key_columns: Vec<String>,
        object: RowObject,
    },
    Delete {
        key_columns: Vec<String>,
    },
}

impl TransformedOperation {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Insert { .. } => "insert",
            Self::Update { .. } => "update",
            Self::Delete { .. } => "delete",
        }
    }

    pub fn key_columns(&self) -> &[String] {
        match self {
            Self::Insert { key_columns, .. }
            | Self::Update { key_columns, .. }
            | Self::Delete { key_columns } => key_columns,
        }
    }
}

/// Version of a public schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
}

impl Version {
    pub fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Identifies the public schema an operation was produced under.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourcePublicSchema {
    pub name: String,
    pub version: Version,
}

/// A transformed operation annotated with where it came from.
///
/// This is the unit persisted in the event store and carried over the
/// sync HTTP protocol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransformedOperationWithSource {
    #[serde(flatten)]
    pub operation: TransformedOperation,
    pub source_manifest_slug: String,
    pub source_data_store_slug: String,
    pub source_public_schema: SourcePublicSchema,
}

/// One stored transaction's worth of transformed operations, as
/// delivered to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationMessage {
    pub transaction_id: String,
    pub operations: Vec<TransformedOperationWithSource>,
}

/// A source commit: ordered table operations plus a one-shot
/// acknowledgement channel back to the source.
///
/// `ack(true)` means the transaction was durably consumed and the
/// source may advance its replication position; `ack(false)` means
/// processing failed and the source should hold position. Consuming
/// `self` makes double acknowledgement unrepresentable.
#[derive(Debug)]
pub struct Transaction {
    pub id: String,
    pub operations: Vec<TableOperation>,
    ack_tx: Option<oneshot::Sender<bool>>,
}

impl Transaction {
    /// Create a transaction, returning the receiver the source should
    /// await for the acknowledgement.
    pub fn new(id: impl Into<String>, operations: Vec<TableOperation>) -> (Self, oneshot::Receiver<bool>) {
        let (ack_tx, ack_rx) = oneshot::channel();
        (
            Self {
                id: id.into(),
                operations,
                ack_tx: Some(ack_tx),
            },
            ack_rx,
        )
    }

    /// Create a transaction whose acknowledgement nobody listens for.
    pub fn detached(id: impl Into<String>, operations: Vec<TableOperation>) -> Self {
        Self {
            id: id.into(),
            operations,
            ack_tx: None,
        }
    }

    /// Acknowledge the transaction back to its source.
    pub fn ack(mut self, consumed: bool) {
        if let Some(tx) = self.ack_tx.take() {
            // The source may have stopped listening; that is not an error.
            let _ = tx.send(consumed);
        }
    }
}

/// A transaction tagged with the manifest and data store it was read from.
#[derive(Debug)]
pub struct SourceTransaction {
    pub source_manifest_slug: String,
    pub source_data_store_slug: String,
    pub transaction: Transaction,
}
