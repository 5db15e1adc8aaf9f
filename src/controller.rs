// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Ties the pipeline together and drives it.
//!
//! The controller owns one source reader, one transformer, one sink
//! writer, one publish bus, and any number of subscribe buses. `start`
//! spawns one task draining the reader into the publish bus and one
//! task per subscribe bus draining it into the sink writer, plus the
//! HTTP server when one is registered.
//!
//! The publish and subscribe side may share a single bus object (the
//! event store bus implements both traits); lifecycle fan-out
//! de-duplicates shared instances so each is prepared and closed once.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use futures::future::{join_all, try_join_all};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::HttpServerConfig;
use crate::error::{Result, SyncError};
use crate::event_store::EventStore;
use crate::message_bus::{PublishMessageBus, SubscribeMessageBus};
use crate::sink_writer::SinkWriter;
use crate::source_reader::SourceReader;
use crate::transformer::PublicSchemaTransformer;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ControllerState {
    Initial,
    Prepared,
    Started,
    Stopped,
    Closed,
}

impl std::fmt::Display for ControllerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ControllerState::Initial => "initial",
            ControllerState::Prepared => "prepared",
            ControllerState::Started => "started",
            ControllerState::Stopped => "stopped",
            ControllerState::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// HTTP exposure of the local event store, registered on the controller
/// when the workspace serves remote consumers.
pub struct HttpExposure {
    pub config: HttpServerConfig,
    pub store: Arc<dyn EventStore>,
}

pub struct SyncController {
    source_reader: Arc<tokio::sync::Mutex<SourceReader>>,
    transformer: Arc<PublicSchemaTransformer>,
    sink_writer: Arc<SinkWriter>,
    publish_bus: Arc<dyn PublishMessageBus>,
    subscribe_buses: Vec<Arc<dyn SubscribeMessageBus>>,
    http: Option<HttpExposure>,
    state: Mutex<ControllerState>,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl SyncController {
    pub fn new(
        source_reader: SourceReader,
        transformer: PublicSchemaTransformer,
        sink_writer: SinkWriter,
        publish_bus: Arc<dyn PublishMessageBus>,
        subscribe_buses: Vec<Arc<dyn SubscribeMessageBus>>,
        http: Option<HttpExposure>,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            source_reader: Arc::new(tokio::sync::Mutex::new(source_reader)),
            transformer: Arc::new(transformer),
            sink_writer: Arc::new(sink_writer),
            publish_bus,
            subscribe_buses,
            http,
            state: Mutex::new(ControllerState::Initial),
            shutdown,
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Assemble the full pipeline for a verified workspace.
    ///
    /// The event store doubles as the local publish and subscribe bus.
    /// An external bus is added when the workspace consumes schemas
    /// from manifests outside the set; that requires a resolver.
    pub async fn from_manifest(
        config: &crate::config::SyncConfig,
        manifest: Arc<crate::manifest::SyncManifest>,
        connection_adapters: &crate::adapter::Registry<dyn crate::adapter::ConnectionAdapter>,
        public_adapters: Arc<
            crate::adapter::Registry<dyn crate::adapter::PublicSchemaTransformationAdapter>,
        >,
        consumer_adapters: Arc<
            crate::adapter::Registry<dyn crate::adapter::ConsumerSchemaTransformationAdapter>,
        >,
        resolver: Option<Arc<dyn crate::http::SyncServiceResolver>>,
    ) -> Result<Self> {
        let mut sources = Vec::new();
        for store in manifest.source_data_stores() {
            let adapter = connection_adapters.get(store.connection.connection_type())?;
            let source = adapter.create_source(store.connection).await?;
            sources.push(crate::source_reader::SourceHandle {
                manifest_slug: store.manifest_slug.to_string(),
                data_store_slug: store.connection_slug.to_string(),
                source,
            });
        }
        let source_reader = SourceReader::new(sources);

        let store: Arc<dyn EventStore> =
            Arc::new(crate::event_store::SqliteEventStore::new(&config.event_store).await?);
        let bus = Arc::new(crate::message_bus::EventStoreMessageBus::new(
            store.clone(),
            &config.bus,
        ));
        let publish_bus: Arc<dyn PublishMessageBus> = bus.clone();
        let mut subscribe_buses: Vec<Arc<dyn SubscribeMessageBus>> = vec![bus];

        if !manifest.external_consumer_schemas().is_empty() {
            let resolver = resolver.ok_or_else(|| {
                SyncError::Config(
                    "workspace consumes external schemas but no resolver is configured"
                        .to_string(),
                )
            })?;
            subscribe_buses.push(Arc::new(crate::external_bus::ExternalSyncMessageBus::new(
                manifest.clone(),
                resolver,
                &config.external,
            )));
        }

        let transformer = PublicSchemaTransformer::new(manifest.clone(), public_adapters);
        let sink_writer =
            SinkWriter::new(manifest.clone(), connection_adapters, consumer_adapters).await?;
        let http = config.http.as_ref().map(|http_config| HttpExposure {
            config: http_config.clone(),
            store: store.clone(),
        });

        Ok(Self::new(
            source_reader,
            transformer,
            sink_writer,
            publish_bus,
            subscribe_buses,
            http,
        ))
    }

    pub fn state(&self) -> ControllerState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, state: ControllerState) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = state;
        crate::metrics::set_controller_state(&state.to_string());
    }

    fn require(&self, expected: ControllerState) -> Result<()> {
        let actual = self.state();
        if actual != expected {
            return Err(SyncError::InvalidState {
                expected: expected.to_string(),
                actual: actual.to_string(),
            });
        }
        Ok(())
    }

    /// Subscribe buses that are not the same object as the publish bus
    /// or an earlier subscribe bus. Shared instances get their lifecycle
    /// calls exactly once.
    fn distinct_subscribe_buses(&self) -> Vec<&Arc<dyn SubscribeMessageBus>> {
        let mut seen = HashSet::new();
        seen.insert(Arc::as_ptr(&self.publish_bus) as *const () as usize);
        self.subscribe_buses
            .iter()
            .filter(|bus| seen.insert(Arc::as_ptr(*bus) as *const () as usize))
            .collect()
    }

    pub async fn prepare(&self) -> Result<()> {
        self.require(ControllerState::Initial)?;

        let mut prepares = vec![self.publish_bus.prepare()];
        prepares.extend(
            self.distinct_subscribe_buses()
                .into_iter()
                .map(|bus| bus.prepare()),
        );
        try_join_all(prepares).await?;
        self.sink_writer.prepare().await?;
        self.source_reader.lock().await.prepare().await?;

        // Every subscribe bus resumes from what the destinations have
        // already consumed.
        let cursors = self.sink_writer.cursors().await?;
        debug!(cursors = cursors.len(), "Seeding subscribe buses");
        try_join_all(
            self.subscribe_buses
                .iter()
                .map(|bus| bus.set_initial_cursors(cursors.clone())),
        )
        .await?;

        self.set_state(ControllerState::Prepared);
        info!("Sync controller prepared");
        Ok(())
    }

    pub async fn start(&self) -> Result<()> {
        self.require(ControllerState::Prepared)?;

        self.source_reader
            .lock()
            .await
            .start(self.shutdown.subscribe())
            .await?;

        let mut tasks = Vec::new();
        tasks.push(tokio::spawn(publish_loop(
            self.source_reader.clone(),
            self.transformer.clone(),
            self.publish_bus.clone(),
        )));
        for bus in &self.subscribe_buses {
            tasks.push(tokio::spawn(subscribe_loop(
                bus.clone(),
                self.sink_writer.clone(),
            )));
        }
        if let Some(http) = &self.http {
            let config = http.config.clone();
            let store = http.store.clone();
            let shutdown = self.shutdown.subscribe();
            tasks.push(tokio::spawn(async move {
                if let Err(e) = crate::http::serve(&config, store, shutdown).await {
                    error!(error = %e, "HTTP server failed");
                }
            }));
        }
        self.tasks.lock().unwrap_or_else(|e| e.into_inner()).extend(tasks);

        self.set_state(ControllerState::Started);
        info!("Sync controller started");
        Ok(())
    }

    pub async fn stop(&self) -> Result<()> {
        if self.state() >= ControllerState::Stopped {
            return Ok(());
        }
        // Receivers may all be gone already; that is still a stop.
        let _ = self.shutdown.send(true);

        self.source_reader.lock().await.stop().await?;
        let mut stops = vec![self.publish_bus.stop()];
        stops.extend(
            self.distinct_subscribe_buses()
                .into_iter()
                .map(|bus| bus.stop()),
        );
        try_join_all(stops).await?;
        self.set_state(ControllerState::Stopped);
        info!("Sync controller stopped");
        Ok(())
    }

    pub async fn close(&self) -> Result<()> {
        if self.state() == ControllerState::Closed {
            return Ok(());
        }
        self.stop().await?;

        let tasks: Vec<_> = self
            .tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain(..)
            .collect();
        for result in join_all(tasks).await {
            if let Err(e) = result {
                warn!(error = %e, "Pipeline task panicked");
            }
        }

        self.source_reader.lock().await.close().await?;
        self.sink_writer.close().await?;
        let mut closes = vec![self.publish_bus.close()];
        closes.extend(
            self.distinct_subscribe_buses()
                .into_iter()
                .map(|bus| bus.close()),
        );
        try_join_all(closes).await?;
        self.set_state(ControllerState::Closed);
        info!("Sync controller closed");
        Ok(())
    }
}

/// Drain the source reader into the publish bus.
///
/// Each transaction is isolated: a transform or publish failure rejects
/// that transaction (so the source holds its position) and the loop
/// moves on.
async fn publish_loop(
    source_reader: Arc<tokio::sync::Mutex<SourceReader>>,
    transformer: Arc<PublicSchemaTransformer>,
    publish_bus: Arc<dyn PublishMessageBus>,
) {
    let mut reader = source_reader.lock().await;
    loop {
        let source = match reader.next().await {
            Ok(Some(source)) => source,
            Ok(None) => break,
            Err(e) => {
                error!(error = %e, "Source reader failed");
                crate::metrics::record_error("publish", "source_read");
                break;
            }
        };
        let transaction_id = source.transaction.id.clone();
        let data_store_slug = source.source_data_store_slug.clone();

        let operations = match transformer.transform_to_public_schema(&source).await {
            Ok(operations) => operations,
            Err(e) => {
                error!(
                    transaction_id = %transaction_id,
                    error = %e,
                    "Transformation failed, rejecting transaction"
                );
                crate::metrics::record_error("publish", "transform");
                crate::metrics::record_transaction_ack(&data_store_slug, false);
                source.transaction.ack(false);
                continue;
            }
        };

        if operations.is_empty() {
            // Nothing published, but the transaction is consumed.
            crate::metrics::record_transaction_ack(&data_store_slug, true);
            source.transaction.ack(true);
            continue;
        }

        match publish_bus.publish(&transaction_id, operations).await {
            Ok(accepted) => {
                if !accepted {
                    debug!(transaction_id = %transaction_id, "Replayed transaction");
                }
                crate::metrics::record_transaction_ack(&data_store_slug, true);
                source.transaction.ack(true);
            }
            Err(e) => {
                error!(
                    transaction_id = %transaction_id,
                    error = %e,
                    "Publish failed, rejecting transaction"
                );
                crate::metrics::record_error("publish", "publish");
                crate::metrics::record_transaction_ack(&data_store_slug, false);
                source.transaction.ack(false);
            }
        }
    }
    debug!("Publish loop ended");
}

/// Drain one subscribe bus into the sink writer.
///
/// Write failures are logged and skipped; the bus has already advanced
/// past the batch, retrying here could only deliver it out of order.
async fn subscribe_loop(bus: Arc<dyn SubscribeMessageBus>, sink_writer: Arc<SinkWriter>) {
    loop {
        match bus.poll_next().await {
            Ok(Some(messages)) => {
                for message in &messages {
                    if let Err(e) = sink_writer.write(message).await {
                        error!(
                            transaction_id = %message.transaction_id,
                            error = %e,
                            "Sink write failed"
                        );
                        crate::metrics::record_error("subscribe", "sink_write");
                    }
                }
            }
            Ok(None) => break,
            Err(e) => {
                error!(error = %e, "Subscribe poll failed");
                crate::metrics::record_error("subscribe", "poll");
            }
        }
    }
    debug!("Subscribe loop ended");
}
