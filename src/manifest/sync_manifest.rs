// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Verified view over a set of manifests.
//!
//! [`SyncManifest`] is the only way the runtime consumes manifests:
//! construction verifies the set and fails on any error-severity
//! diagnostic, so every query method afterwards can assume referential
//! integrity. Warnings are logged and kept.

use std::collections::{BTreeMap, HashSet};

use tracing::warn;

use crate::error::{Result, SyncError};
use crate::operation::TransformedOperationWithSource;

use super::verify::{verify_manifests, ExternalReference, VerifyOptions};
use super::{Connection, ConsumerSchema, DataStoreConfig, Manifest, PublicSchema};

/// Options for constructing a [`SyncManifest`].
#[derive(Debug, Clone)]
pub struct SyncManifestOptions {
    /// Require consumer schema references to resolve within the set.
    /// Disable for services that subscribe to remote manifests.
    pub check_public_schema_references: bool,
}

impl Default for SyncManifestOptions {
    fn default() -> Self {
        Self {
            check_public_schema_references: true,
        }
    }
}

/// A data store that publishes changes.
#[derive(Debug, Clone, Copy)]
pub struct SourceDataStore<'a> {
    pub manifest_slug: &'a str,
    pub connection_slug: &'a str,
    pub config: &'a DataStoreConfig,
    pub connection: &'a Connection,
}

/// A data store that consumer schemas write into.
#[derive(Debug, Clone, Copy)]
pub struct DestinationDataStore<'a> {
    pub connection_slug: &'a str,
    pub connection: &'a Connection,
}

/// Verified, queryable manifest set.
#[derive(Debug)]
pub struct SyncManifest {
    manifests: Vec<Manifest>,
    external_references: Vec<ExternalReference>,
}

impl SyncManifest {
    /// Verify `manifests` and build the facade.
    ///
    /// Returns [`SyncError::Manifest`] carrying all diagnostics when
    /// any error-severity finding exists. Warnings are logged here and
    /// do not fail construction.
    pub fn new(manifests: Vec<Manifest>, options: SyncManifestOptions) -> Result<Self> {
        let result = verify_manifests(
            &manifests,
            &VerifyOptions {
                check_public_schema_references: options.check_public_schema_references,
            },
        );

        for diagnostic in result.warnings() {
            warn!(
                code = %diagnostic.code,
                manifest = %diagnostic.manifest_slug,
                "manifest warning: {}",
                diagnostic.message
            );
        }

        if !result.is_valid() {
            return Err(SyncError::Manifest(result.diagnostics));
        }

        Ok(Self {
            manifests,
            external_references: result.external_references,
        })
    }

    pub fn manifests(&self) -> &[Manifest] {
        &self.manifests
    }

    /// Slugs of all loaded manifests.
    pub fn slugs(&self) -> Vec<&str> {
        self.manifests.iter().map(|m| m.slug.as_str()).collect()
    }

    /// Find a connection by slug across all loaded manifests.
    pub fn connection_by_slug(&self, slug: &str) -> Option<&Connection> {
        self.manifests
            .iter()
            .flat_map(|m| m.connections.iter())
            .find(|c| c.slug == slug)
    }

    /// Data stores that publish changes: every data store carrying a
    /// source config, with its connection resolved.
    pub fn source_data_stores(&self) -> Vec<SourceDataStore<'_>> {
        self.manifests
            .iter()
            .flat_map(|manifest| {
                manifest.data_stores.iter().filter_map(move |data_store| {
                    let config = data_store.config.as_ref()?;
                    let connection = self.connection_by_slug(&data_store.connection_slug)?;
                    Some(SourceDataStore {
                        manifest_slug: manifest.slug.as_str(),
                        connection_slug: data_store.connection_slug.as_str(),
                        config,
                        connection,
                    })
                })
            })
            .collect()
    }

    /// Distinct data stores that consumer schemas write into.
    pub fn destination_data_stores(&self) -> Vec<DestinationDataStore<'_>> {
        let mut seen = HashSet::new();
        self.manifests
            .iter()
            .flat_map(|m| m.consumer_schemas.iter())
            .filter_map(|consumer| {
                let slug = consumer.destination_data_store_slug.as_str();
                if !seen.insert(slug) {
                    return None;
                }
                let connection = self.connection_by_slug(slug)?;
                Some(DestinationDataStore {
                    connection_slug: slug,
                    connection,
                })
            })
            .collect()
    }

    /// Connections backing the declared event stores.
    pub fn event_store_connections(&self) -> Vec<&Connection> {
        self.manifests
            .iter()
            .flat_map(|m| m.event_stores.iter())
            .filter_map(|es| self.connection_by_slug(&es.connection_slug))
            .collect()
    }

    /// Public schemas fed by a change to `table` in `data_store_slug`,
    /// with the slug of the publishing manifest.
    pub fn public_schemas_for_operation(
        &self,
        data_store_slug: &str,
        table: &str,
    ) -> Vec<(&str, &PublicSchema)> {
        self.manifests
            .iter()
            .flat_map(|manifest| {
                manifest
                    .public_schemas
                    .iter()
                    .filter(|schema| {
                        schema.source.data_store_slug == data_store_slug
                            && schema.source.tables.iter().any(|t| t == table)
                    })
                    .map(move |schema| (manifest.slug.as_str(), schema))
            })
            .collect()
    }

    /// Consumer schemas subscribed to the public schema an operation
    /// was produced under.
    pub fn consumer_schemas_for_public_schema(
        &self,
        operation: &TransformedOperationWithSource,
    ) -> Vec<&ConsumerSchema> {
        self.manifests
            .iter()
            .flat_map(|m| m.consumer_schemas.iter())
            .filter(|consumer| consumer.public_schema.name == operation.source_public_schema.name)
            .collect()
    }

    /// Consumer schemas whose source manifest is not loaded, grouped by
    /// that remote slug. BTreeMap keeps the polling order deterministic.
    pub fn external_consumer_schemas(&self) -> BTreeMap<String, Vec<&ConsumerSchema>> {
        let local: HashSet<&str> = self.manifests.iter().map(|m| m.slug.as_str()).collect();
        let mut grouped: BTreeMap<String, Vec<&ConsumerSchema>> = BTreeMap::new();
        for consumer in self.manifests.iter().flat_map(|m| m.consumer_schemas.iter()) {
            if !local.contains(consumer.source_manifest_slug.as_str()) {
                grouped
                    .entry(consumer.source_manifest_slug.clone())
                    .or_default()
                    .push(consumer);
            }
        }
        grouped
    }

    /// External schema references collected during verification.
    pub fn external_schema_references(&self) -> &[ExternalReference] {
        &self.external_references
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::{
        Connection, ConnectionConfig, ConsumerSchema, DataStore, EventStoreRef, PublicSchemaRef,
        PublicSchemaSource, Transformation,
    };
    use crate::operation::{SourcePublicSchema, TransformedOperation, Version};

    fn manifest_pair() -> Vec<Manifest> {
        let mut producer = Manifest::new("svc-a");
        producer.connections.push(Connection {
            slug: "ds-main".to_string(),
            config: ConnectionConfig::InMemory {},
        });
        producer.data_stores.push(DataStore {
            connection_slug: "ds-main".to_string(),
            config: Some(DataStoreConfig::InMemory {}),
        });
        producer.event_stores.push(EventStoreRef {
            connection_slug: "ds-main".to_string(),
        });
        producer.public_schemas.push(PublicSchema {
            name: "accounts".to_string(),
            source: PublicSchemaSource {
                data_store_slug: "ds-main".to_string(),
                tables: vec!["account".to_string()],
            },
            output_schema: None,
            transformations: vec![Transformation::new("in-memory")],
            version: Version::new(1, 0),
            definition_file: None,
        });

        let mut consumer = Manifest::new("svc-b");
        consumer.connections.push(Connection {
            slug: "ds-dest".to_string(),
            config: ConnectionConfig::InMemory {},
        });
        consumer.data_stores.push(DataStore {
            connection_slug: "ds-dest".to_string(),
            config: None,
        });
        consumer.consumer_schemas.push(ConsumerSchema {
            name: "accounts-consumer".to_string(),
            source_manifest_slug: "svc-a".to_string(),
            public_schema: PublicSchemaRef {
                name: "accounts".to_string(),
                major_version: 1,
            },
            destination_data_store_slug: "ds-dest".to_string(),
            transformations: vec![Transformation::new("in-memory")],
            definition_file: None,
        });

        vec![producer, consumer]
    }

    #[test]
    fn test_new_rejects_invalid_set() {
        let mut broken = Manifest::new("svc-a");
        broken.data_stores.push(DataStore {
            connection_slug: "missing".to_string(),
            config: None,
        });

        let err = SyncManifest::new(vec![broken], SyncManifestOptions::default()).unwrap_err();
        match err {
            SyncError::Manifest(diagnostics) => assert!(!diagnostics.is_empty()),
            other => panic!("expected manifest error, got {other}"),
        }
    }

    #[test]
    fn test_source_and_destination_data_stores() {
        let sync = SyncManifest::new(manifest_pair(), SyncManifestOptions::default()).unwrap();

        let sources = sync.source_data_stores();
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].manifest_slug, "svc-a");
        assert_eq!(sources[0].connection_slug, "ds-main");
        assert_eq!(sources[0].connection.connection_type(), "in-memory");

        let destinations = sync.destination_data_stores();
        assert_eq!(destinations.len(), 1);
        assert_eq!(destinations[0].connection_slug, "ds-dest");
    }

    #[test]
    fn test_public_schemas_for_operation() {
        let sync = SyncManifest::new(manifest_pair(), SyncManifestOptions::default()).unwrap();

        let matches = sync.public_schemas_for_operation("ds-main", "account");
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].0, "svc-a");
        assert_eq!(matches[0].1.name, "accounts");

        assert!(sync.public_schemas_for_operation("ds-main", "other_table").is_empty());
        assert!(sync.public_schemas_for_operation("ds-other", "account").is_empty());
    }

    #[test]
    fn test_consumer_schemas_for_public_schema() {
        let sync = SyncManifest::new(manifest_pair(), SyncManifestOptions::default()).unwrap();

        let operation = TransformedOperationWithSource {
            operation: TransformedOperation::Delete {
                key_columns: vec!["id".to_string()],
            },
            source_manifest_slug: "svc-a".to_string(),
            source_data_store_slug: "ds-main".to_string(),
            source_public_schema: SourcePublicSchema {
                name: "accounts".to_string(),
                version: Version::new(1, 0),
            },
        };

        let consumers = sync.consumer_schemas_for_public_schema(&operation);
        assert_eq!(consumers.len(), 1);
        assert_eq!(consumers[0].name, "accounts-consumer");
    }

    #[test]
    fn test_external_consumer_schemas_grouping() {
        let mut manifests = manifest_pair();
        manifests[1].consumer_schemas.push(ConsumerSchema {
            name: "remote-orders".to_string(),
            source_manifest_slug: "billing-service".to_string(),
            public_schema: PublicSchemaRef {
                name: "orders".to_string(),
                major_version: 2,
            },
            destination_data_store_slug: "ds-dest".to_string(),
            transformations: vec![Transformation::new("in-memory")],
            definition_file: None,
        });

        let sync = SyncManifest::new(
            manifests,
            SyncManifestOptions {
                check_public_schema_references: false,
            },
        )
        .unwrap();

        let external = sync.external_consumer_schemas();
        assert_eq!(external.len(), 1);
        assert_eq!(external["billing-service"].len(), 1);
        assert_eq!(external["billing-service"][0].name, "remote-orders");

        let references = sync.external_schema_references();
        assert_eq!(references.len(), 1);
        assert_eq!(references[0].manifest_slug, "billing-service");
        assert_eq!(references[0].public_schema.major_version, 2);
    }

    #[test]
    fn test_event_store_connections() {
        let sync = SyncManifest::new(manifest_pair(), SyncManifestOptions::default()).unwrap();
        let connections = sync.event_store_connections();
        assert_eq!(connections.len(), 1);
        assert_eq!(connections[0].slug, "ds-main");
    }

    #[test]
    fn test_connection_by_slug_spans_manifests() {
        let sync = SyncManifest::new(manifest_pair(), SyncManifestOptions::default()).unwrap();
        assert!(sync.connection_by_slug("ds-main").is_some());
        assert!(sync.connection_by_slug("ds-dest").is_some());
        assert!(sync.connection_by_slug("nope").is_none());
    }
}
