// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Adapter seams between the sync engine and concrete backends.
//!
//! Everything backend-specific hangs off a string tag: connection
//! adapters are selected by the connection's `connectionType`, and
//! transformation adapters by the transformation's `transformationType`.
//! The engine itself only ever talks to the traits in this module, so a
//! new backend is a new registry entry rather than a code change in the
//! pipeline.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::watch;

use crate::cursor::Cursor;
use crate::error::{Result, SyncError};
use crate::event_store::EventStore;
use crate::manifest::{Connection, Transformation};
use crate::operation::{TableOperation, Transaction, TransformedOperationWithSource};

/// Stream of transactions read from a source data store.
///
/// `next` must be cancel safe: dropping the future before it resolves
/// must not lose a transaction, because callers race it against other
/// sources and shutdown signals.
#[async_trait]
pub trait TransactionStream: Send {
    /// Next transaction, or `None` once the source has ended.
    async fn next(&mut self) -> Option<Transaction>;
}

/// Which side of a backfill window a watermark marks in the change
/// stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatermarkLevel {
    /// Written before the backfill snapshot is taken.
    Low,
    /// Written after the backfill snapshot completes.
    High,
}

impl WatermarkLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::High => "high",
        }
    }
}

/// A source data store the engine reads row changes from.
#[async_trait]
pub trait DataSource: Send + Sync {
    /// Establish connections and claim replication resources.
    async fn prepare(&self) -> Result<()>;

    /// Stop producing transactions. Streams end after this.
    async fn stop(&self) -> Result<()>;

    /// Release connections. Called after `stop`.
    async fn close(&self) -> Result<()>;

    /// Begin iterating transactions. The stream ends when the source is
    /// stopped or the shutdown signal fires.
    async fn start_iteration(
        &self,
        shutdown: watch::Receiver<bool>,
    ) -> Result<Box<dyn TransactionStream>>;

    /// Insert a watermark into the change stream so backfilled rows can
    /// be reconciled against concurrently replicated changes. Both
    /// watermarks of a backfill carry the same `backfill_id`.
    async fn write_watermark(&self, level: WatermarkLevel, backfill_id: &str) -> Result<()>;

    /// Run a backfill query against the source and return the raw rows.
    async fn backfill_records(
        &self,
        query: &str,
        params: &[Value],
    ) -> Result<Vec<Map<String, Value>>>;
}

/// A destination data store the engine writes transformed data into.
#[async_trait]
pub trait DataSink: Send + Sync {
    fn connection_type(&self) -> &str;

    async fn prepare(&self) -> Result<()>;

    async fn close(&self) -> Result<()>;
}

/// Factory for sources, sinks, and event stores of one connection type.
#[async_trait]
pub trait ConnectionAdapter: Send + Sync {
    /// The `connectionType` tag this adapter serves.
    fn connection_type(&self) -> &str;

    async fn create_source(&self, connection: &Connection) -> Result<Arc<dyn DataSource>>;

    async fn create_sink(&self, connection: &Connection) -> Result<Arc<dyn DataSink>>;

    async fn create_event_store(&self, connection: &Connection) -> Result<Arc<dyn EventStore>>;
}

/// Applies a public schema transformation to a single table operation.
#[async_trait]
pub trait PublicSchemaTransformationAdapter: Send + Sync {
    /// The `transformationType` tag this adapter serves.
    fn transformation_type(&self) -> &str;

    /// Transform one table operation. `Ok(None)` means the operation is
    /// not covered by this transformation and produces no output.
    async fn apply_public_schema_transformation(
        &self,
        source_data_store_slug: &str,
        operation: &TableOperation,
        transformation: &Transformation,
    ) -> Result<Option<crate::operation::TransformedOperation>>;
}

/// An operation paired with the consumer transformations to apply to it.
pub struct OperationTransformationPair {
    pub operation: TransformedOperationWithSource,
    pub transformations: Vec<Transformation>,
}

/// Applies consumer schema transformations and writes the result to a
/// destination data store.
#[async_trait]
pub trait ConsumerSchemaTransformationAdapter: Send + Sync {
    /// The `connectionType` of destinations this adapter writes to.
    fn connection_type(&self) -> &str;

    /// The `transformationType` tag this adapter serves.
    fn transformation_type(&self) -> &str;

    /// Cursors recorded in the destination, one per consumed schema.
    async fn cursors(&self, destination_data_store_slug: &str) -> Result<Vec<Cursor>>;

    /// Apply the transformations for one transaction and persist the
    /// results, atomically with the destination's cursor update where
    /// the backend supports it.
    async fn apply_consumer_schema_transformation(
        &self,
        destination_data_store_slug: &str,
        transaction_id: &str,
        pairs: Vec<OperationTransformationPair>,
    ) -> Result<()>;
}

/// Tag-indexed adapter lookup.
pub struct Registry<T: ?Sized> {
    kind: &'static str,
    map: HashMap<String, Arc<T>>,
}

impl<T: ?Sized> Registry<T> {
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            map: HashMap::new(),
        }
    }

    pub fn register(&mut self, tag: impl Into<String>, adapter: Arc<T>) {
        self.map.insert(tag.into(), adapter);
    }

    pub fn get(&self, tag: &str) -> Result<&Arc<T>> {
        self.map.get(tag).ok_or_else(|| SyncError::AdapterNotFound {
            kind: self.kind,
            tag: tag.to_string(),
        })
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.map.contains_key(tag)
    }

    pub fn values(&self) -> impl Iterator<Item = &Arc<T>> {
        self.map.values()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

/// All adapter registries the engine dispatches through.
pub struct AdapterRegistries {
    pub connections: Registry<dyn ConnectionAdapter>,
    pub public_transformations: Registry<dyn PublicSchemaTransformationAdapter>,
    pub consumer_transformations: Registry<dyn ConsumerSchemaTransformationAdapter>,
}

impl AdapterRegistries {
    pub fn new() -> Self {
        Self {
            connections: Registry::new("connection"),
            public_transformations: Registry::new("public schema transformation"),
            consumer_transformations: Registry::new("consumer schema transformation"),
        }
    }
}

impl Default for AdapterRegistries {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Named(&'static str);

    #[test]
    fn test_registry_lookup() {
        let mut registry: Registry<Named> = Registry::new("connection");
        registry.register("postgres", Arc::new(Named("postgres")));

        assert!(registry.contains("postgres"));
        assert_eq!(registry.get("postgres").unwrap().0, "postgres");
    }

    #[test]
    fn test_registry_miss_names_kind_and_tag() {
        let registry: Registry<Named> = Registry::new("connection");
        let err = registry.get("oracle").unwrap_err();
        match err {
            SyncError::AdapterNotFound { kind, tag } => {
                assert_eq!(kind, "connection");
                assert_eq!(tag, "oracle");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_watermark_level_labels() {
        assert_eq!(WatermarkLevel::Low.as_str(), "low");
        assert_eq!(WatermarkLevel::High.as_str(), "high");
    }

    #[test]
    fn test_registry_last_registration_wins() {
        let mut registry: Registry<Named> = Registry::new("connection");
        registry.register("in-memory", Arc::new(Named("first")));
        registry.register("in-memory", Arc::new(Named("second")));
        assert_eq!(registry.get("in-memory").unwrap().0, "second");
    }
}
