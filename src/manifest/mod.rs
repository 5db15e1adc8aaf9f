// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Manifest data model.
//!
//! A manifest is the declarative unit of configuration for one service:
//! its connections, the data stores and event stores bound to them, the
//! public schemas it publishes, and the consumer schemas it subscribes
//! with. Manifests are plain data; [`verify`] checks a set of them for
//! referential integrity and [`merge`] folds several into one.
//!
//! All types serialize with camelCase field names, matching the JSON
//! documents that workspace tooling produces.

pub mod merge;
pub mod sync_manifest;
pub mod verify;

pub use merge::{merge_manifests, MergeDiagnostic};
pub use sync_manifest::{SyncManifest, SyncManifestOptions};
pub use verify::{verify_manifests, Diagnostic, DiagnosticCode, VerificationResult, VerifyOptions};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::operation::Version;

/// A named connection to some backing system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connection {
    pub slug: String,
    pub config: ConnectionConfig,
}

impl Connection {
    /// The connection's type tag, used for adapter dispatch.
    pub fn connection_type(&self) -> &'static str {
        self.config.connection_type()
    }
}

/// Connection configuration, discriminated by `connectionType`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "connectionType", rename_all_fields = "camelCase")]
pub enum ConnectionConfig {
    #[serde(rename = "postgres")]
    Postgres {
        host: String,
        port: u16,
        user: String,
        password: String,
        database: String,
    },
    #[serde(rename = "in-memory")]
    InMemory {},
}

impl ConnectionConfig {
    pub fn connection_type(&self) -> &'static str {
        match self {
            Self::Postgres { .. } => "postgres",
            Self::InMemory {} => "in-memory",
        }
    }
}

/// A data store: a connection used as a replication source and/or a
/// destination. `config` is present only when the store publishes
/// changes (it names the replication machinery to use).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataStore {
    pub connection_slug: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<DataStoreConfig>,
}

/// Source-side data store configuration, discriminated by `connectionType`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "connectionType", rename_all_fields = "camelCase")]
pub enum DataStoreConfig {
    #[serde(rename = "postgres")]
    Postgres {
        slot_name: String,
        publication_name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tables: Option<Vec<String>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        all_tables: Option<bool>,
    },
    #[serde(rename = "in-memory")]
    InMemory {},
}

impl DataStoreConfig {
    pub fn connection_type(&self) -> &'static str {
        match self {
            Self::Postgres { .. } => "postgres",
            Self::InMemory {} => "in-memory",
        }
    }
}

/// An event store binding: the connection whose adapter persists the
/// transformed event log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventStoreRef {
    pub connection_slug: String,
}

/// Where a public schema reads from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicSchemaSource {
    pub data_store_slug: String,
    /// Tables whose changes feed this schema.
    #[serde(default)]
    pub tables: Vec<String>,
}

/// A versioned, published data contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicSchema {
    pub name: String,
    pub source: PublicSchemaSource,
    /// JSON schema describing the transformed row shape.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<Value>,
    pub transformations: Vec<Transformation>,
    pub version: Version,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub definition_file: Option<String>,
}

/// Reference to a public schema by name and major version.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicSchemaRef {
    pub name: String,
    pub major_version: u32,
}

/// A subscription to a public schema, with transformations that write
/// the subscribed rows into a destination data store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumerSchema {
    pub name: String,
    /// Slug of the manifest that publishes the schema. May name a
    /// manifest outside the loaded set; those are synced over HTTP.
    pub source_manifest_slug: String,
    pub public_schema: PublicSchemaRef,
    pub destination_data_store_slug: String,
    pub transformations: Vec<Transformation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub definition_file: Option<String>,
}

/// One transformation step. The tag selects the adapter; everything
/// else is adapter-specific and passed through opaquely.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transformation {
    pub transformation_type: String,
    #[serde(flatten)]
    pub config: Map<String, Value>,
}

impl Transformation {
    pub fn new(transformation_type: impl Into<String>) -> Self {
        Self {
            transformation_type: transformation_type.into(),
            config: Map::new(),
        }
    }

    /// Fetch a string field from the adapter-specific config.
    pub fn config_str(&self, key: &str) -> Option<&str> {
        self.config.get(key).and_then(Value::as_str)
    }
}

/// The declarative configuration of one service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub slug: String,
    pub manifest_version: u32,
    #[serde(default)]
    pub connections: Vec<Connection>,
    #[serde(default)]
    pub data_stores: Vec<DataStore>,
    #[serde(default)]
    pub event_stores: Vec<EventStoreRef>,
    #[serde(default)]
    pub public_schemas: Vec<PublicSchema>,
    #[serde(default)]
    pub consumer_schemas: Vec<ConsumerSchema>,
    #[serde(default)]
    pub workspaces: Vec<String>,
}

impl Manifest {
    /// An empty manifest with the given slug, at the current version.
    pub fn new(slug: impl Into<String>) -> Self {
        Self {
            slug: slug.into(),
            manifest_version: 0,
            connections: Vec::new(),
            data_stores: Vec::new(),
            event_stores: Vec::new(),
            public_schemas: Vec::new(),
            consumer_schemas: Vec::new(),
            workspaces: Vec::new(),
        }
    }
}
