//! # Manifest Sync
//!
//! A manifest-driven replication engine for synchronizing data between
//! services through versioned public schemas.
//!
//! ## Architecture
//!
//! Each service declares its published and consumed schemas in a
//! manifest. The engine reads row changes from source data stores,
//! transforms them into public schema operations, persists them in a
//! durable event log, and fans them out to destination data stores,
//! locally and across services over HTTP:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                            manifest-sync                             │
//! │                                                                      │
//! │  ┌──────────────┐   ┌─────────────┐   ┌───────────────────────────┐  │
//! │  │ SourceReader │──►│ Transformer │──►│ Event store (SQLite log)  │  │
//! │  │ (N sources)  │   │ (public     │   │ idempotent, cursor-paged  │  │
//! │  └──────────────┘   │  schemas)   │   └───────────────────────────┘  │
//! │                     └─────────────┘          │             │         │
//! │                                              ▼             ▼         │
//! │  ┌──────────────────┐               ┌──────────────┐  ┌───────────┐  │
//! │  │ ExternalSyncBus  │──────────────►│  SinkWriter  │  │ HTTP /read│  │
//! │  │ (remote /read)   │               │ (N sinks)    │  │ (axum)    │  │
//! │  └──────────────────┘               └──────────────┘  └───────────┘  │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use manifest_sync::adapter::{AdapterRegistries, Registry};
//! use manifest_sync::config::SyncConfig;
//! use manifest_sync::controller::SyncController;
//! use manifest_sync::manifest::{Manifest, SyncManifest, SyncManifestOptions};
//! use manifest_sync::memory::{
//!     InMemoryConnectionAdapter, InMemoryConsumerSchemaTransformationAdapter,
//!     InMemoryPublicSchemaTransformationAdapter, IN_MEMORY_TYPE,
//! };
//!
//! #[tokio::main]
//! async fn main() -> manifest_sync::Result<()> {
//!     let manifests: Vec<Manifest> = vec![/* loaded elsewhere */];
//!     let manifest = Arc::new(SyncManifest::new(manifests, SyncManifestOptions::default())?);
//!
//!     let connections = Arc::new(InMemoryConnectionAdapter::new());
//!     let mut registries = AdapterRegistries::new();
//!     registries.connections.register(IN_MEMORY_TYPE, connections.clone());
//!     registries.public_transformations.register(
//!         IN_MEMORY_TYPE,
//!         Arc::new(InMemoryPublicSchemaTransformationAdapter::new()),
//!     );
//!     registries.consumer_transformations.register(
//!         IN_MEMORY_TYPE,
//!         Arc::new(InMemoryConsumerSchemaTransformationAdapter::new(connections)),
//!     );
//!
//!     let controller = SyncController::from_manifest(
//!         &SyncConfig::default(),
//!         manifest,
//!         &registries.connections,
//!         Arc::new(registries.public_transformations),
//!         Arc::new(registries.consumer_transformations),
//!         None,
//!     )
//!     .await?;
//!     controller.prepare().await?;
//!     controller.start().await?;
//!     // Runs until stop() and close().
//!     Ok(())
//! }
//! ```

pub mod adapter;
pub mod config;
pub mod controller;
pub mod cursor;
pub mod error;
pub mod event_store;
pub mod external_bus;
pub mod http;
pub mod manifest;
pub mod memory;
pub mod message_bus;
pub mod metrics;
pub mod operation;
pub mod resilience;
pub mod sink_writer;
pub mod source_reader;
pub mod transformer;

// Re-exports for convenience
pub use adapter::{AdapterRegistries, Registry, WatermarkLevel};
pub use config::SyncConfig;
pub use controller::{ControllerState, SyncController};
pub use cursor::{Cursor, Cursors, PublicSchemaReference};
pub use error::{Result, SyncError};
pub use event_store::{EventStore, InMemoryEventStore, SqliteEventStore};
pub use external_bus::ExternalSyncMessageBus;
pub use manifest::{Manifest, SyncManifest, SyncManifestOptions};
pub use message_bus::{EventStoreMessageBus, PublishMessageBus, SubscribeMessageBus};
pub use operation::{OperationMessage, TableOperation, Transaction, TransformedOperation};
pub use sink_writer::SinkWriter;
pub use source_reader::{SourceReader, SourceReaderState};
pub use transformer::PublicSchemaTransformer;
