// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! In-memory backend, used in tests and as the reference adapter set.
//!
//! Sources are fed by hand with [`InMemorySource::post_transaction`],
//! sinks record what was written to them, and the transformation
//! adapters under the `in-memory` tag copy row images through
//! unchanged (optionally filtered to one table).

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tracing::debug;

use crate::adapter::{
    ConnectionAdapter, ConsumerSchemaTransformationAdapter, DataSink, DataSource,
    OperationTransformationPair, PublicSchemaTransformationAdapter, TransactionStream,
    WatermarkLevel,
};
use crate::cursor::Cursor;
use crate::error::{Result, SyncError};
use crate::event_store::{EventStore, InMemoryEventStore};
use crate::manifest::{Connection, Transformation};
use crate::operation::{TableOperation, Transaction, TransformedOperation};

pub const IN_MEMORY_TYPE: &str = "in-memory";

// ═══════════════════════════════════════════════════════════════════════
// Source
// ═══════════════════════════════════════════════════════════════════════

/// A source whose transactions are posted by the test driver.
pub struct InMemorySource {
    slug: String,
    tx: Mutex<Option<mpsc::UnboundedSender<Transaction>>>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<Transaction>>>,
    watermarks: Mutex<Vec<(WatermarkLevel, String)>>,
}

impl InMemorySource {
    pub fn new(slug: impl Into<String>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            slug: slug.into(),
            tx: Mutex::new(Some(tx)),
            rx: Mutex::new(Some(rx)),
            watermarks: Mutex::new(Vec::new()),
        }
    }

    /// Watermarks written so far, in write order.
    pub fn watermarks(&self) -> Vec<(WatermarkLevel, String)> {
        self.watermarks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Feed a transaction into the source, as if a database commit had
    /// been replicated.
    pub fn post_transaction(&self, transaction: Transaction) -> Result<()> {
        let guard = self.tx.lock().unwrap_or_else(|e| e.into_inner());
        let sender = guard
            .as_ref()
            .ok_or_else(|| SyncError::source(&self.slug, "source is stopped"))?;
        sender
            .send(transaction)
            .map_err(|_| SyncError::source(&self.slug, "iteration has ended"))
    }
}

#[async_trait]
impl DataSource for InMemorySource {
    async fn prepare(&self) -> Result<()> {
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        // Dropping the sender ends the stream once the buffer drains.
        self.tx.lock().unwrap_or_else(|e| e.into_inner()).take();
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }

    async fn start_iteration(
        &self,
        shutdown: watch::Receiver<bool>,
    ) -> Result<Box<dyn TransactionStream>> {
        let rx = self
            .rx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
            .ok_or_else(|| SyncError::source(&self.slug, "iteration already started"))?;
        Ok(Box::new(InMemoryTransactionStream { rx, shutdown }))
    }

    async fn write_watermark(&self, level: WatermarkLevel, backfill_id: &str) -> Result<()> {
        debug!(
            slug = %self.slug,
            level = level.as_str(),
            backfill_id,
            "watermark written"
        );
        self.watermarks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((level, backfill_id.to_string()));
        Ok(())
    }

    // This backend has no rows to backfill from.
    async fn backfill_records(
        &self,
        _query: &str,
        _params: &[serde_json::Value],
    ) -> Result<Vec<serde_json::Map<String, serde_json::Value>>> {
        Ok(Vec::new())
    }
}

struct InMemoryTransactionStream {
    rx: mpsc::UnboundedReceiver<Transaction>,
    shutdown: watch::Receiver<bool>,
}

#[async_trait]
impl TransactionStream for InMemoryTransactionStream {
    async fn next(&mut self) -> Option<Transaction> {
        // recv() is cancel safe, so losing the race cannot drop a
        // transaction.
        tokio::select! {
            _ = self.shutdown.changed() => None,
            transaction = self.rx.recv() => transaction,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Sink
// ═══════════════════════════════════════════════════════════════════════

/// One operation as it landed in a sink.
#[derive(Debug, Clone)]
pub struct WrittenRecord {
    pub transaction_id: String,
    pub operation: crate::operation::TransformedOperationWithSource,
}

/// A sink that records everything written to it.
#[derive(Default)]
pub struct InMemorySink {
    records: Mutex<Vec<WrittenRecord>>,
}

impl InMemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<WrittenRecord> {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn push(&self, record: WrittenRecord) {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(record);
    }
}

#[async_trait]
impl DataSink for InMemorySink {
    fn connection_type(&self) -> &str {
        IN_MEMORY_TYPE
    }

    async fn prepare(&self) -> Result<()> {
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Connection adapter
// ═══════════════════════════════════════════════════════════════════════

/// Creates and caches in-memory sources and sinks per connection slug,
/// so the engine and the test driver observe the same instances.
#[derive(Default)]
pub struct InMemoryConnectionAdapter {
    sources: Mutex<HashMap<String, Arc<InMemorySource>>>,
    sinks: Mutex<HashMap<String, Arc<InMemorySink>>>,
}

impl InMemoryConnectionAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn source(&self, slug: &str) -> Arc<InMemorySource> {
        self.sources
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(slug.to_string())
            .or_insert_with(|| Arc::new(InMemorySource::new(slug)))
            .clone()
    }

    pub fn sink(&self, slug: &str) -> Arc<InMemorySink> {
        self.sinks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(slug.to_string())
            .or_insert_with(|| Arc::new(InMemorySink::new()))
            .clone()
    }
}

#[async_trait]
impl ConnectionAdapter for InMemoryConnectionAdapter {
    fn connection_type(&self) -> &str {
        IN_MEMORY_TYPE
    }

    async fn create_source(&self, connection: &Connection) -> Result<Arc<dyn DataSource>> {
        Ok(self.source(&connection.slug))
    }

    async fn create_sink(&self, connection: &Connection) -> Result<Arc<dyn DataSink>> {
        Ok(self.sink(&connection.slug))
    }

    async fn create_event_store(&self, _connection: &Connection) -> Result<Arc<dyn EventStore>> {
        Ok(Arc::new(InMemoryEventStore::new()))
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Transformation adapters
// ═══════════════════════════════════════════════════════════════════════

/// Passes row images through unchanged. When the transformation config
/// names a `table`, operations on other tables produce no output.
#[derive(Default)]
pub struct InMemoryPublicSchemaTransformationAdapter;

impl InMemoryPublicSchemaTransformationAdapter {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl PublicSchemaTransformationAdapter for InMemoryPublicSchemaTransformationAdapter {
    fn transformation_type(&self) -> &str {
        IN_MEMORY_TYPE
    }

    async fn apply_public_schema_transformation(
        &self,
        source_data_store_slug: &str,
        operation: &TableOperation,
        transformation: &Transformation,
    ) -> Result<Option<TransformedOperation>> {
        if let Some(table) = transformation.config_str("table") {
            if table != operation.table() {
                return Ok(None);
            }
        }
        debug!(
            data_store = source_data_store_slug,
            table = operation.table(),
            kind = operation.kind(),
            "Applying in-memory public schema transformation"
        );
        let transformed = match operation {
            TableOperation::Insert {
                key_columns, new, ..
            } => TransformedOperation::Insert {
                key_columns: key_columns.clone(),
                object: new.clone(),
            },
            TableOperation::Update {
                key_columns, new, ..
            } => TransformedOperation::Update {
                key_columns: key_columns.clone(),
                object: new.clone(),
            },
            TableOperation::Delete { key_columns, .. } => TransformedOperation::Delete {
                key_columns: key_columns.clone(),
            },
        };
        Ok(Some(transformed))
    }
}

/// Writes consumed operations straight into the destination's in-memory
/// sink.
pub struct InMemoryConsumerSchemaTransformationAdapter {
    connections: Arc<InMemoryConnectionAdapter>,
}

impl InMemoryConsumerSchemaTransformationAdapter {
    pub fn new(connections: Arc<InMemoryConnectionAdapter>) -> Self {
        Self { connections }
    }
}

#[async_trait]
impl ConsumerSchemaTransformationAdapter for InMemoryConsumerSchemaTransformationAdapter {
    fn connection_type(&self) -> &str {
        IN_MEMORY_TYPE
    }

    fn transformation_type(&self) -> &str {
        IN_MEMORY_TYPE
    }

    async fn cursors(&self, _destination_data_store_slug: &str) -> Result<Vec<Cursor>> {
        // In-memory destinations keep no durable consumption state.
        Ok(Vec::new())
    }

    async fn apply_consumer_schema_transformation(
        &self,
        destination_data_store_slug: &str,
        transaction_id: &str,
        pairs: Vec<OperationTransformationPair>,
    ) -> Result<()> {
        let sink = self.connections.sink(destination_data_store_slug);
        for pair in pairs {
            sink.push(WrittenRecord {
                transaction_id: transaction_id.to_string(),
                operation: pair.operation,
            });
        }
        Ok(())
    }
}
