//! Manifest and adapter fixtures shared across integration tests.

use std::sync::Arc;
use std::time::Duration;

use manifest_sync::adapter::{
    ConnectionAdapter, ConsumerSchemaTransformationAdapter, PublicSchemaTransformationAdapter,
    Registry,
};
use manifest_sync::manifest::{
    Connection, ConnectionConfig, ConsumerSchema, DataStore, DataStoreConfig, Manifest,
    PublicSchema, PublicSchemaRef, PublicSchemaSource, Transformation,
};
use manifest_sync::memory::{
    InMemoryConnectionAdapter, InMemoryConsumerSchemaTransformationAdapter,
    InMemoryPublicSchemaTransformationAdapter, IN_MEMORY_TYPE,
};
use manifest_sync::operation::{TableOperation, Version};

/// Manifest for a service publishing `accounts@1.0` from `ds-main`.
pub fn producer_manifest() -> Manifest {
    let mut m = Manifest::new("svc-a");
    m.connections.push(Connection {
        slug: "ds-main".to_string(),
        config: ConnectionConfig::InMemory {},
    });
    m.data_stores.push(DataStore {
        connection_slug: "ds-main".to_string(),
        config: Some(DataStoreConfig::InMemory {}),
    });
    let mut transformation = Transformation::new(IN_MEMORY_TYPE);
    transformation
        .config
        .insert("table".to_string(), serde_json::json!("accounts"));
    m.public_schemas.push(PublicSchema {
        name: "accounts".to_string(),
        source: PublicSchemaSource {
            data_store_slug: "ds-main".to_string(),
            tables: vec!["accounts".to_string()],
        },
        output_schema: None,
        transformations: vec![transformation],
        version: Version::new(1, 0),
        definition_file: None,
    });
    m
}

/// Manifest for a service consuming `svc-a/accounts@1` into `ds-dest`.
pub fn consumer_manifest() -> Manifest {
    let mut m = Manifest::new("svc-b");
    m.connections.push(Connection {
        slug: "ds-dest".to_string(),
        config: ConnectionConfig::InMemory {},
    });
    m.data_stores.push(DataStore {
        connection_slug: "ds-dest".to_string(),
        config: None,
    });
    m.consumer_schemas.push(ConsumerSchema {
        name: "accounts-consumer".to_string(),
        source_manifest_slug: "svc-a".to_string(),
        public_schema: PublicSchemaRef {
            name: "accounts".to_string(),
            major_version: 1,
        },
        destination_data_store_slug: "ds-dest".to_string(),
        transformations: vec![Transformation::new(IN_MEMORY_TYPE)],
        definition_file: None,
    });
    m
}

/// Both manifests together: producer and consumer in one workspace.
pub fn workspace() -> Vec<Manifest> {
    vec![producer_manifest(), consumer_manifest()]
}

pub struct TestRegistries {
    pub connections_adapter: Arc<InMemoryConnectionAdapter>,
    pub connections: Registry<dyn ConnectionAdapter>,
    pub public_transformations: Arc<Registry<dyn PublicSchemaTransformationAdapter>>,
    pub consumer_transformations: Arc<Registry<dyn ConsumerSchemaTransformationAdapter>>,
}

/// Full in-memory adapter set.
pub fn registries() -> TestRegistries {
    let connections_adapter = Arc::new(InMemoryConnectionAdapter::new());

    let mut connections: Registry<dyn ConnectionAdapter> = Registry::new("connection");
    connections.register(IN_MEMORY_TYPE, connections_adapter.clone());

    let mut public_transformations: Registry<dyn PublicSchemaTransformationAdapter> =
        Registry::new("public schema transformation");
    public_transformations.register(
        IN_MEMORY_TYPE,
        Arc::new(InMemoryPublicSchemaTransformationAdapter::new()),
    );

    let mut consumer_transformations: Registry<dyn ConsumerSchemaTransformationAdapter> =
        Registry::new("consumer schema transformation");
    consumer_transformations.register(
        IN_MEMORY_TYPE,
        Arc::new(InMemoryConsumerSchemaTransformationAdapter::new(
            connections_adapter.clone(),
        )),
    );

    TestRegistries {
        connections_adapter,
        connections,
        public_transformations: Arc::new(public_transformations),
        consumer_transformations: Arc::new(consumer_transformations),
    }
}

/// An insert on the given table with one `id` column.
pub fn insert_op(table: &str, id: i64) -> TableOperation {
    let mut new = serde_json::Map::new();
    new.insert("id".to_string(), serde_json::json!(id));
    TableOperation::Insert {
        table: table.to_string(),
        table_schema: "public".to_string(),
        key_columns: vec!["id".to_string()],
        new,
    }
}

/// Route engine logs through the test harness. Safe to call from every
/// test; only the first call installs the subscriber.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// Poll a condition until it holds or a few seconds elapse.
pub async fn wait_until<F>(description: &str, condition: F)
where
    F: Fn() -> bool,
{
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for: {description}");
}
