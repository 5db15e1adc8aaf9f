// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Fans consumed operation messages out to destination data stores.
//!
//! One sink is created per destination data store named by a consumer
//! schema. Each message is regrouped per destination and transformation
//! type, then handed to the matching consumer schema transformation
//! adapter, which applies the transformations and persists the result.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::try_join_all;
use tracing::{debug, info, warn};

use crate::adapter::{
    ConnectionAdapter, ConsumerSchemaTransformationAdapter, DataSink, OperationTransformationPair,
    Registry,
};
use crate::cursor::{Cursor, Cursors, PublicSchemaReference};
use crate::error::{Result, SyncError};
use crate::manifest::SyncManifest;
use crate::operation::OperationMessage;

struct SinkEntry {
    data_store_slug: String,
    sink: Arc<dyn DataSink>,
}

pub struct SinkWriter {
    manifest: Arc<SyncManifest>,
    sinks: Vec<SinkEntry>,
    consumer_adapters: Arc<Registry<dyn ConsumerSchemaTransformationAdapter>>,
}

impl SinkWriter {
    /// Create sinks for every destination data store in the workspace.
    pub async fn new(
        manifest: Arc<SyncManifest>,
        connection_adapters: &Registry<dyn ConnectionAdapter>,
        consumer_adapters: Arc<Registry<dyn ConsumerSchemaTransformationAdapter>>,
    ) -> Result<Self> {
        let mut sinks = Vec::new();
        for destination in manifest.destination_data_stores() {
            let adapter = connection_adapters.get(destination.connection.connection_type())?;
            let sink = adapter.create_sink(destination.connection).await?;
            sinks.push(SinkEntry {
                data_store_slug: destination.connection_slug.to_string(),
                sink,
            });
        }
        info!(sinks = sinks.len(), "Sink writer created");
        Ok(Self {
            manifest,
            sinks,
            consumer_adapters,
        })
    }

    pub async fn prepare(&self) -> Result<()> {
        try_join_all(self.sinks.iter().map(|entry| entry.sink.prepare())).await?;
        Ok(())
    }

    pub async fn close(&self) -> Result<()> {
        try_join_all(self.sinks.iter().map(|entry| entry.sink.close())).await?;
        Ok(())
    }

    /// Resume cursors for every schema this workspace consumes.
    ///
    /// Every consumed schema gets at least a null cursor, so a fresh
    /// destination reads the log from the beginning. Cursors recorded in
    /// the destinations themselves overlay the nulls.
    pub async fn cursors(&self) -> Result<Cursors> {
        let mut cursors: Vec<Cursor> = self
            .consumed_schema_references()
            .into_iter()
            .map(Cursor::empty)
            .collect();

        for entry in &self.sinks {
            for adapter in self.consumer_adapters.values() {
                if adapter.connection_type() != entry.sink.connection_type() {
                    continue;
                }
                cursors.extend(adapter.cursors(&entry.data_store_slug).await?);
            }
        }
        Ok(Cursors::from_cursors(cursors))
    }

    /// Write one operation message to all consuming destinations.
    pub async fn write(&self, message: &OperationMessage) -> Result<()> {
        // (destination, transformation type) -> pairs to apply there.
        let mut grouped: HashMap<(String, String), Vec<OperationTransformationPair>> =
            HashMap::new();

        for operation in &message.operations {
            for consumer in self.manifest.consumer_schemas_for_public_schema(operation) {
                let Some(tag) = consumer
                    .transformations
                    .first()
                    .map(|t| t.transformation_type.clone())
                else {
                    warn!(
                        consumer_schema = %consumer.name,
                        "Consumer schema has no transformations, skipping"
                    );
                    continue;
                };
                grouped
                    .entry((consumer.destination_data_store_slug.clone(), tag))
                    .or_default()
                    .push(OperationTransformationPair {
                        operation: operation.clone(),
                        transformations: consumer.transformations.clone(),
                    });
            }
        }

        let mut dispatches = Vec::with_capacity(grouped.len());
        for ((destination, tag), pairs) in grouped {
            let adapter = self.consumer_adapters.get(&tag)?;
            let entry = self
                .sinks
                .iter()
                .find(|entry| entry.data_store_slug == destination)
                .ok_or_else(|| {
                    SyncError::sink(&destination, "no sink created for destination data store")
                })?;
            if adapter.connection_type() != entry.sink.connection_type() {
                return Err(SyncError::sink(
                    &destination,
                    format!(
                        "transformation targets {} but destination is {}",
                        adapter.connection_type(),
                        entry.sink.connection_type()
                    ),
                ));
            }
            debug!(
                destination = %destination,
                transformation_type = %tag,
                operations = pairs.len(),
                transaction_id = %message.transaction_id,
                "Dispatching to sink"
            );
            let transaction_id = message.transaction_id.clone();
            let adapter = adapter.clone();
            dispatches.push(async move {
                let started = std::time::Instant::now();
                let count = pairs.len();
                let result = adapter
                    .apply_consumer_schema_transformation(&destination, &transaction_id, pairs)
                    .await;
                match &result {
                    Ok(()) => {
                        crate::metrics::record_sink_write(&destination, count, started.elapsed())
                    }
                    Err(_) => crate::metrics::record_sink_error(&destination),
                }
                result
            });
        }
        try_join_all(dispatches).await?;
        Ok(())
    }

    fn consumed_schema_references(&self) -> Vec<PublicSchemaReference> {
        let mut references = Vec::new();
        for manifest in self.manifest.manifests() {
            for consumer in &manifest.consumer_schemas {
                let reference = PublicSchemaReference::new(
                    &consumer.source_manifest_slug,
                    &consumer.public_schema.name,
                    consumer.public_schema.major_version,
                );
                if !references.contains(&reference) {
                    references.push(reference);
                }
            }
        }
        references
    }
}
