// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Applies public schema transformations to raw source transactions.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::adapter::PublicSchemaTransformationAdapter;
use crate::error::Result;
use crate::manifest::SyncManifest;
use crate::adapter::Registry;
use crate::operation::{SourcePublicSchema, SourceTransaction, TransformedOperationWithSource};

/// Runs every matching public schema transformation over each operation
/// of a transaction.
///
/// An operation matches a public schema when the schema's source names
/// the operation's data store and lists its table. One operation can
/// feed several schemas; a transformation that declines an operation
/// simply contributes nothing.
pub struct PublicSchemaTransformer {
    manifest: Arc<SyncManifest>,
    adapters: Arc<Registry<dyn PublicSchemaTransformationAdapter>>,
}

impl PublicSchemaTransformer {
    pub fn new(
        manifest: Arc<SyncManifest>,
        adapters: Arc<Registry<dyn PublicSchemaTransformationAdapter>>,
    ) -> Self {
        Self { manifest, adapters }
    }

    pub async fn transform_to_public_schema(
        &self,
        source: &SourceTransaction,
    ) -> Result<Vec<TransformedOperationWithSource>> {
        let started = std::time::Instant::now();
        let mut results = Vec::new();
        for operation in &source.transaction.operations {
            let schemas = self
                .manifest
                .public_schemas_for_operation(&source.source_data_store_slug, operation.table());
            if schemas.is_empty() {
                debug!(
                    data_store = %source.source_data_store_slug,
                    table = operation.table(),
                    "No public schema covers table, skipping operation"
                );
                continue;
            }
            for (manifest_slug, schema) in schemas {
                for transformation in &schema.transformations {
                    let adapter = self.adapters.get(&transformation.transformation_type)?;
                    let transformed = adapter
                        .apply_public_schema_transformation(
                            &source.source_data_store_slug,
                            operation,
                            transformation,
                        )
                        .await?;
                    let Some(transformed) = transformed else {
                        continue;
                    };
                    results.push(TransformedOperationWithSource {
                        operation: transformed,
                        source_manifest_slug: manifest_slug.to_string(),
                        source_data_store_slug: source.source_data_store_slug.clone(),
                        source_public_schema: SourcePublicSchema {
                            name: schema.name.clone(),
                            version: schema.version,
                        },
                    });
                }
            }
        }
        if results.is_empty() {
            warn!(
                transaction_id = %source.transaction.id,
                "Transaction produced no public schema operations"
            );
        }
        crate::metrics::record_transformations(
            &source.source_data_store_slug,
            results.len(),
            started.elapsed(),
        );
        Ok(results)
    }
}
