// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Manifest merging.
//!
//! [`merge_manifests`] folds overlay manifests into a base manifest,
//! last occurrence wins. Collection entries are keyed:
//!
//! - connections by `slug`
//! - data stores and event stores by `connectionSlug`
//! - public schemas by `name@majorVersion`
//! - consumer schemas by `name`
//! - workspaces are unioned and de-duplicated
//!
//! Every overwrite (except event stores, which carry no payload beyond
//! their key) is reported as an informational [`MergeDiagnostic`] so
//! tooling can tell users what got replaced. Overwrites are expected
//! during iterative development, so they are never errors.
//!
//! First-occurrence positions are preserved: replacing an entry does
//! not move it, which keeps merged output diffs small.

use std::collections::{HashMap, HashSet};
use std::fmt;

use super::Manifest;

/// What kind of entry was overwritten during a merge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeItem {
    Connection,
    DataStore,
    PublicSchema,
    ConsumerSchema,
}

impl fmt::Display for MergeItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connection => f.write_str("connection"),
            Self::DataStore => f.write_str("data store"),
            Self::PublicSchema => f.write_str("public schema"),
            Self::ConsumerSchema => f.write_str("consumer schema"),
        }
    }
}

/// Informational record of one overwritten entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeDiagnostic {
    pub item: MergeItem,
    pub key: String,
}

impl fmt::Display for MergeDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} '{}' was overwritten by a later manifest", self.item, self.key)
    }
}

/// Keyed collection that keeps first-occurrence order and replaces in
/// place on duplicate keys.
struct KeyedMerge<T> {
    entries: Vec<T>,
    index: HashMap<String, usize>,
}

impl<T> KeyedMerge<T> {
    fn new() -> Self {
        Self {
            entries: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Returns true when an existing entry was replaced.
    fn insert(&mut self, key: String, value: T) -> bool {
        match self.index.get(&key) {
            Some(&i) => {
                self.entries[i] = value;
                true
            }
            None => {
                self.index.insert(key, self.entries.len());
                self.entries.push(value);
                false
            }
        }
    }

    fn into_vec(self) -> Vec<T> {
        self.entries
    }
}

/// Merge overlay manifests into a base manifest, last occurrence wins.
///
/// The result keeps the base manifest's slug and version.
pub fn merge_manifests(
    base: Manifest,
    overlays: Vec<Manifest>,
) -> (Manifest, Vec<MergeDiagnostic>) {
    let mut diagnostics = Vec::new();

    let mut connections = KeyedMerge::new();
    let mut data_stores = KeyedMerge::new();
    let mut event_stores = KeyedMerge::new();
    let mut public_schemas = KeyedMerge::new();
    let mut consumer_schemas = KeyedMerge::new();
    let mut workspaces: Vec<String> = Vec::new();
    let mut seen_workspaces: HashSet<String> = HashSet::new();

    let slug = base.slug.clone();
    let manifest_version = base.manifest_version;

    for manifest in std::iter::once(base).chain(overlays) {
        for connection in manifest.connections {
            let key = connection.slug.clone();
            if connections.insert(key.clone(), connection) {
                diagnostics.push(MergeDiagnostic {
                    item: MergeItem::Connection,
                    key,
                });
            }
        }

        for data_store in manifest.data_stores {
            let key = data_store.connection_slug.clone();
            if data_stores.insert(key.clone(), data_store) {
                diagnostics.push(MergeDiagnostic {
                    item: MergeItem::DataStore,
                    key,
                });
            }
        }

        for event_store in manifest.event_stores {
            // Key-only entries; replacing one is not worth reporting.
            event_stores.insert(event_store.connection_slug.clone(), event_store);
        }

        for schema in manifest.public_schemas {
            let key = format!("{}@{}", schema.name, schema.version.major);
            if public_schemas.insert(key.clone(), schema) {
                diagnostics.push(MergeDiagnostic {
                    item: MergeItem::PublicSchema,
                    key,
                });
            }
        }

        for consumer in manifest.consumer_schemas {
            let key = consumer.name.clone();
            if consumer_schemas.insert(key.clone(), consumer) {
                diagnostics.push(MergeDiagnostic {
                    item: MergeItem::ConsumerSchema,
                    key,
                });
            }
        }

        for workspace in manifest.workspaces {
            if seen_workspaces.insert(workspace.clone()) {
                workspaces.push(workspace);
            }
        }
    }

    let merged = Manifest {
        slug,
        manifest_version,
        connections: connections.into_vec(),
        data_stores: data_stores.into_vec(),
        event_stores: event_stores.into_vec(),
        public_schemas: public_schemas.into_vec(),
        consumer_schemas: consumer_schemas.into_vec(),
        workspaces,
    };

    (merged, diagnostics)
}
