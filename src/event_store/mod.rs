// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! The durable, idempotent event log.
//!
//! The event store is where the pipeline's at-least-once upstream
//! becomes exactly-once storage: [`EventStore::write`] keyed by
//! transaction id accepts each transaction once and reports replays as
//! duplicates, so sources can be acknowledged and re-deliveries are
//! harmless.
//!
//! Reads are cursor-driven: a consumer presents its [`Cursor`]s and
//! receives transactions committed after them, filtered to the public
//! schemas those cursors name.
//!
//! [`InMemoryEventStore`] backs tests and in-memory pipelines;
//! [`SqliteEventStore`] is the production store.

pub mod sqlite;

pub use sqlite::SqliteEventStore;

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::cursor::{Cursor, PublicSchemaReference};
use crate::error::Result;
use crate::operation::{OperationMessage, TransformedOperationWithSource};

/// Default number of transactions returned per read.
pub const DEFAULT_READ_LIMIT: usize = 100;

/// Upper bound a single read will ever return.
pub const MAX_READ_LIMIT: usize = 1000;

/// Durable, idempotent, cursor-addressable transaction log.
#[async_trait]
pub trait EventStore: Send + Sync {
    async fn prepare(&self) -> Result<()>;
    async fn stop(&self) -> Result<()>;
    async fn close(&self) -> Result<()>;

    /// Append one transaction's operations.
    ///
    /// Returns `true` when the transaction was stored, `false` when its
    /// id was already present (idempotent no-op). Either way the caller
    /// may acknowledge the transaction upstream.
    async fn write(
        &self,
        transaction_id: &str,
        operations: &[TransformedOperationWithSource],
    ) -> Result<bool>;

    /// Read transactions committed after the given cursors, oldest
    /// first, at most `limit` (default [`DEFAULT_READ_LIMIT`]).
    ///
    /// Operations are filtered to the public schemas the cursors name.
    /// A cursor whose transaction id is no longer in the log reads from
    /// the beginning.
    async fn read(&self, cursors: &[Cursor], limit: Option<usize>)
        -> Result<Vec<OperationMessage>>;

    /// Current log head per schema: for each reference, a cursor at the
    /// last transaction containing one of its operations, or an empty
    /// cursor when none exists yet.
    async fn tail(&self, schemas: &[PublicSchemaReference]) -> Result<Vec<Cursor>>;
}

fn operation_matches(op: &TransformedOperationWithSource, schema: &PublicSchemaReference) -> bool {
    op.source_manifest_slug == schema.manifest_slug
        && op.source_public_schema.name == schema.name
        && op.source_public_schema.version.major == schema.major_version
}

struct StoredTransaction {
    transaction_id: String,
    operations: Vec<TransformedOperationWithSource>,
}

#[derive(Default)]
struct InMemoryLog {
    log: Vec<StoredTransaction>,
    index: HashMap<String, usize>,
}

/// Event store held entirely in memory. Not durable; for tests and
/// in-memory pipelines.
#[derive(Default)]
pub struct InMemoryEventStore {
    inner: Mutex<InMemoryLog>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored transactions.
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).log.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn prepare(&self) -> Result<()> {
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }

    async fn write(
        &self,
        transaction_id: &str,
        operations: &[TransformedOperationWithSource],
    ) -> Result<bool> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if inner.index.contains_key(transaction_id) {
            return Ok(false);
        }
        let position = inner.log.len();
        inner.index.insert(transaction_id.to_string(), position);
        inner.log.push(StoredTransaction {
            transaction_id: transaction_id.to_string(),
            operations: operations.to_vec(),
        });
        Ok(true)
    }

    async fn read(
        &self,
        cursors: &[Cursor],
        limit: Option<usize>,
    ) -> Result<Vec<OperationMessage>> {
        let limit = limit.unwrap_or(DEFAULT_READ_LIMIT).min(MAX_READ_LIMIT);
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());

        // Resume after the furthest cursor; an id that fell out of the
        // log resolves to the beginning.
        let start = cursors
            .iter()
            .filter_map(|c| c.transaction_id.as_deref())
            .filter_map(|id| inner.index.get(id))
            .map(|&i| i + 1)
            .max()
            .unwrap_or(0);

        let mut messages = Vec::new();
        for stored in inner.log.iter().skip(start) {
            if messages.len() >= limit {
                break;
            }
            let operations: Vec<TransformedOperationWithSource> = stored
                .operations
                .iter()
                .filter(|op| cursors.iter().any(|c| operation_matches(op, &c.schema)))
                .cloned()
                .collect();
            if !operations.is_empty() {
                messages.push(OperationMessage {
                    transaction_id: stored.transaction_id.clone(),
                    operations,
                });
            }
        }
        Ok(messages)
    }

    async fn tail(&self, schemas: &[PublicSchemaReference]) -> Result<Vec<Cursor>> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        Ok(schemas
            .iter()
            .map(|schema| {
                let last = inner
                    .log
                    .iter()
                    .rev()
                    .find(|stored| stored.operations.iter().any(|op| operation_matches(op, schema)))
                    .map(|stored| stored.transaction_id.clone());
                Cursor::new(schema.clone(), last)
            })
            .collect())
    }
}
