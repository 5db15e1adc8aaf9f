// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Maps a remote manifest slug to the base URL of the sync service that
//! publishes it.

use std::collections::HashMap;

use tracing::warn;

use crate::error::{Result, SyncError};

pub trait SyncServiceResolver: Send + Sync {
    fn resolve(&self, manifest_slug: &str) -> Result<String>;
}

/// Fixed slug-to-URL map, typically loaded from configuration.
#[derive(Default)]
pub struct StaticResolver {
    hosts: HashMap<String, String>,
}

impl StaticResolver {
    pub fn new(hosts: HashMap<String, String>) -> Self {
        Self { hosts }
    }
}

impl SyncServiceResolver for StaticResolver {
    fn resolve(&self, manifest_slug: &str) -> Result<String> {
        self.hosts
            .get(manifest_slug)
            .cloned()
            .ok_or_else(|| SyncError::Resolve {
                slug: manifest_slug.to_string(),
            })
    }
}

/// Resolves every slug to a port on localhost. Development only.
pub struct LocalhostResolver {
    port: u16,
}

impl LocalhostResolver {
    pub fn new(port: u16) -> Self {
        Self { port }
    }
}

impl SyncServiceResolver for LocalhostResolver {
    fn resolve(&self, manifest_slug: &str) -> Result<String> {
        warn!(
            manifest_slug,
            "Resolving via localhost resolver; not suitable for production"
        );
        Ok(format!("http://localhost:{}", self.port))
    }
}

/// Resolves slugs through cluster-internal DNS, one service per
/// manifest.
pub struct KubernetesResolver {
    namespace: String,
    port: u16,
}

impl KubernetesResolver {
    pub fn new(namespace: impl Into<String>, port: u16) -> Self {
        Self {
            namespace: namespace.into(),
            port,
        }
    }
}

impl SyncServiceResolver for KubernetesResolver {
    fn resolve(&self, manifest_slug: &str) -> Result<String> {
        Ok(format!(
            "http://rejot-manifest-{}.{}.svc.cluster.local:{}",
            manifest_slug, self.namespace, self.port
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_resolver() {
        let mut hosts = HashMap::new();
        hosts.insert("svc-a".to_string(), "http://svc-a:3000".to_string());
        let resolver = StaticResolver::new(hosts);

        assert_eq!(resolver.resolve("svc-a").unwrap(), "http://svc-a:3000");
        assert!(matches!(
            resolver.resolve("svc-b").unwrap_err(),
            SyncError::Resolve { .. }
        ));
    }

    #[test]
    fn test_kubernetes_resolver_shape() {
        let resolver = KubernetesResolver::new("sync", 3000);
        assert_eq!(
            resolver.resolve("svc-a").unwrap(),
            "http://rejot-manifest-svc-a.sync.svc.cluster.local:3000"
        );
    }

    #[test]
    fn test_localhost_resolver() {
        let resolver = LocalhostResolver::new(4000);
        assert_eq!(resolver.resolve("anything").unwrap(), "http://localhost:4000");
    }
}
