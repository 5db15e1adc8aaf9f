// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Cursor tracking per public schema.
//!
//! A cursor records the last transaction id applied for one public
//! schema reference. Consumers resume from `cursor + 1` (exclusive
//! read), so re-delivering the cursor's own transaction is a no-op.
//!
//! ## Cursor Semantics
//!
//! The cursor stores the **last successfully applied** transaction id.
//!
//! ```text
//! read tx-1234 → apply to destination → advance cursor to tx-1234
//!                (crash here = re-read tx-1234, idempotent)
//! ```
//!
//! A `None` transaction id means "never consumed anything": reading
//! starts from the beginning of the event log.
//!
//! # Monotonicity
//!
//! [`Cursors::advance`] never regresses: a cursor only moves when the
//! incoming transaction id compares greater than the stored one, and a
//! set cursor is never cleared back to `None`. Transaction ids must
//! therefore be lexicographically monotonic per schema, which the event
//! log's append order guarantees.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::operation::OperationMessage;

/// Identifies one public schema at a major version, qualified by the
/// manifest that publishes it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicSchemaReference {
    pub manifest_slug: String,
    pub name: String,
    pub major_version: u32,
}

impl PublicSchemaReference {
    pub fn new(manifest_slug: impl Into<String>, name: impl Into<String>, major_version: u32) -> Self {
        Self {
            manifest_slug: manifest_slug.into(),
            name: name.into(),
            major_version,
        }
    }

    /// Stable map key: `manifestSlug->schemaName@majorVersion`.
    pub fn cursor_key(&self) -> String {
        format!("{}->{}@{}", self.manifest_slug, self.name, self.major_version)
    }
}

impl fmt::Display for PublicSchemaReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}->{}@{}", self.manifest_slug, self.name, self.major_version)
    }
}

/// Position in the event log for one public schema reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cursor {
    pub schema: PublicSchemaReference,
    pub transaction_id: Option<String>,
}

impl Cursor {
    pub fn new(schema: PublicSchemaReference, transaction_id: Option<String>) -> Self {
        Self {
            schema,
            transaction_id,
        }
    }

    /// A cursor that has consumed nothing yet.
    pub fn empty(schema: PublicSchemaReference) -> Self {
        Self {
            schema,
            transaction_id: None,
        }
    }
}

/// Monotonic cursor map keyed by public schema reference.
#[derive(Debug, Clone, Default)]
pub struct Cursors {
    inner: HashMap<String, Cursor>,
}

impl Cursors {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a cursor list. Duplicate references keep the highest
    /// transaction id, so merging positions from several consumers of
    /// the same schema is safe.
    pub fn from_cursors(cursors: Vec<Cursor>) -> Self {
        let mut out = Self::new();
        for cursor in cursors {
            let transaction_id = cursor.transaction_id.clone();
            match (&transaction_id, out.inner.get(&cursor.schema.cursor_key())) {
                (Some(id), Some(existing)) => {
                    if existing.transaction_id.as_deref() < Some(id.as_str()) {
                        out.inner.insert(cursor.schema.cursor_key(), cursor);
                    }
                }
                (None, Some(_)) => {}
                (_, None) => {
                    out.inner.insert(cursor.schema.cursor_key(), cursor);
                }
            }
        }
        out
    }

    /// Advance the cursor for `schema` to `transaction_id`.
    ///
    /// Inserts when the reference is unknown. Never regresses: the
    /// update is skipped unless the stored id is `None` or the new id
    /// compares greater.
    pub fn advance(&mut self, schema: &PublicSchemaReference, transaction_id: &str) {
        let key = schema.cursor_key();
        match self.inner.get_mut(&key) {
            Some(existing) => match &existing.transaction_id {
                Some(current) if current.as_str() >= transaction_id => {}
                _ => existing.transaction_id = Some(transaction_id.to_string()),
            },
            None => {
                self.inner.insert(
                    key,
                    Cursor::new(schema.clone(), Some(transaction_id.to_string())),
                );
            }
        }
    }

    /// Advance cursors for every operation in the given messages.
    pub fn advance_with_messages(&mut self, messages: &[OperationMessage]) {
        for message in messages {
            for op in &message.operations {
                let schema = PublicSchemaReference::new(
                    op.source_manifest_slug.clone(),
                    op.source_public_schema.name.clone(),
                    op.source_public_schema.version.major,
                );
                self.advance(&schema, &message.transaction_id);
            }
        }
    }

    pub fn get(&self, schema: &PublicSchemaReference) -> Option<&Cursor> {
        self.inner.get(&schema.cursor_key())
    }

    /// Snapshot as a list, ordered by cursor key for determinism.
    pub fn to_vec(&self) -> Vec<Cursor> {
        let mut keys: Vec<&String> = self.inner.keys().collect();
        keys.sort();
        keys.into_iter().map(|k| self.inner[k].clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::{
        SourcePublicSchema, TransformedOperation, TransformedOperationWithSource, Version,
    };

    fn schema(name: &str) -> PublicSchemaReference {
        PublicSchemaReference::new("svc-a", name, 1)
    }

    #[test]
    fn test_cursor_key_format() {
        let reference = PublicSchemaReference::new("svc-a", "accounts", 2);
        assert_eq!(reference.cursor_key(), "svc-a->accounts@2");
        assert_eq!(reference.to_string(), "svc-a->accounts@2");
    }

    #[test]
    fn test_advance_inserts_unknown_reference() {
        let mut cursors = Cursors::new();
        cursors.advance(&schema("accounts"), "tx-001");

        let cursor = cursors.get(&schema("accounts")).unwrap();
        assert_eq!(cursor.transaction_id.as_deref(), Some("tx-001"));
        assert_eq!(cursors.len(), 1);
    }

    #[test]
    fn test_advance_is_monotonic() {
        let mut cursors = Cursors::new();
        cursors.advance(&schema("accounts"), "tx-005");
        // Lower id must not move the cursor backwards.
        cursors.advance(&schema("accounts"), "tx-003");
        assert_eq!(
            cursors.get(&schema("accounts")).unwrap().transaction_id.as_deref(),
            Some("tx-005")
        );

        // Equal id is a no-op.
        cursors.advance(&schema("accounts"), "tx-005");
        assert_eq!(
            cursors.get(&schema("accounts")).unwrap().transaction_id.as_deref(),
            Some("tx-005")
        );

        // Higher id advances.
        cursors.advance(&schema("accounts"), "tx-009");
        assert_eq!(
            cursors.get(&schema("accounts")).unwrap().transaction_id.as_deref(),
            Some("tx-009")
        );
    }

    #[test]
    fn test_advance_fills_null_cursor() {
        let mut cursors = Cursors::from_cursors(vec![Cursor::empty(schema("accounts"))]);
        assert!(cursors.get(&schema("accounts")).unwrap().transaction_id.is_none());

        cursors.advance(&schema("accounts"), "tx-001");
        assert_eq!(
            cursors.get(&schema("accounts")).unwrap().transaction_id.as_deref(),
            Some("tx-001")
        );
    }

    #[test]
    fn test_from_cursors_keeps_highest_duplicate() {
        let cursors = Cursors::from_cursors(vec![
            Cursor::new(schema("accounts"), Some("tx-002".to_string())),
            Cursor::new(schema("accounts"), Some("tx-007".to_string())),
            Cursor::new(schema("accounts"), None),
            Cursor::new(schema("accounts"), Some("tx-004".to_string())),
        ]);

        assert_eq!(cursors.len(), 1);
        assert_eq!(
            cursors.get(&schema("accounts")).unwrap().transaction_id.as_deref(),
            Some("tx-007")
        );
    }

    #[test]
    fn test_distinct_references_are_independent() {
        let mut cursors = Cursors::new();
        cursors.advance(&schema("accounts"), "tx-002");
        cursors.advance(&schema("orders"), "tx-001");
        cursors.advance(&PublicSchemaReference::new("svc-b", "accounts", 1), "tx-003");
        // Same name, different major version is a distinct cursor.
        cursors.advance(&PublicSchemaReference::new("svc-a", "accounts", 2), "tx-009");

        assert_eq!(cursors.len(), 4);
        assert_eq!(
            cursors.get(&schema("accounts")).unwrap().transaction_id.as_deref(),
            Some("tx-002")
        );
    }

    #[test]
    fn test_advance_with_messages() {
        let message = OperationMessage {
            transaction_id: "tx-010".to_string(),
            operations: vec![
                TransformedOperationWithSource {
                    operation: TransformedOperation::Delete {
                        key_columns: vec!["id".to_string()],
                    },
                    source_manifest_slug: "svc-a".to_string(),
                    source_data_store_slug: "ds-main".to_string(),
                    source_public_schema: SourcePublicSchema {
                        name: "accounts".to_string(),
                        version: Version::new(1, 3),
                    },
                },
                TransformedOperationWithSource {
                    operation: TransformedOperation::Delete {
                        key_columns: vec!["id".to_string()],
                    },
                    source_manifest_slug: "svc-b".to_string(),
                    source_data_store_slug: "ds-other".to_string(),
                    source_public_schema: SourcePublicSchema {
                        name: "orders".to_string(),
                        version: Version::new(2, 0),
                    },
                },
            ],
        };

        let mut cursors = Cursors::new();
        cursors.advance_with_messages(std::slice::from_ref(&message));

        assert_eq!(
            cursors.get(&schema("accounts")).unwrap().transaction_id.as_deref(),
            Some("tx-010")
        );
        assert_eq!(
            cursors
                .get(&PublicSchemaReference::new("svc-b", "orders", 2))
                .unwrap()
                .transaction_id
                .as_deref(),
            Some("tx-010")
        );
    }

    #[test]
    fn test_to_vec_is_sorted_by_key() {
        let mut cursors = Cursors::new();
        cursors.advance(&schema("orders"), "tx-1");
        cursors.advance(&schema("accounts"), "tx-1");

        let keys: Vec<String> = cursors.to_vec().iter().map(|c| c.schema.cursor_key()).collect();
        assert_eq!(keys, vec!["svc-a->accounts@1", "svc-a->orders@1"]);
    }
}
