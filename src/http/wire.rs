// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Wire format of the cross-service read protocol.
//!
//! Cursors travel in a nested shape, spelling out the manifest and the
//! versioned schema rather than the flat form used internally.

use serde::{Deserialize, Serialize};

use crate::cursor::{Cursor, PublicSchemaReference};
use crate::operation::OperationMessage;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireManifest {
    pub slug: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireMajorVersion {
    pub major: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireSchema {
    pub name: String,
    pub version: WireMajorVersion,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireSchemaReference {
    pub manifest: WireManifest,
    pub schema: WireSchema,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireCursor {
    pub schema: WireSchemaReference,
    pub transaction_id: Option<String>,
}

impl From<&Cursor> for WireCursor {
    fn from(cursor: &Cursor) -> Self {
        Self {
            schema: WireSchemaReference {
                manifest: WireManifest {
                    slug: cursor.schema.manifest_slug.clone(),
                },
                schema: WireSchema {
                    name: cursor.schema.name.clone(),
                    version: WireMajorVersion {
                        major: cursor.schema.major_version,
                    },
                },
            },
            transaction_id: cursor.transaction_id.clone(),
        }
    }
}

impl From<WireCursor> for Cursor {
    fn from(wire: WireCursor) -> Self {
        Cursor::new(
            PublicSchemaReference::new(
                wire.schema.manifest.slug,
                wire.schema.schema.name,
                wire.schema.schema.version.major,
            ),
            wire.transaction_id,
        )
    }
}

/// Body of `POST /read`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadRequest {
    pub cursors: Vec<WireCursor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

/// Response of `POST /read`: ordered transactions after the cursors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadResponse {
    pub operations: Vec<OperationMessage>,
}
