// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Manifest verification.
//!
//! [`verify_manifests`] checks a set of manifests for referential
//! integrity and returns every problem found, not just the first one.
//! Each problem is a structured [`Diagnostic`] with a stable code, a
//! severity, and an optional fix hint, so callers can render them for
//! humans or match on them in tooling.
//!
//! Consumer schemas may reference manifests outside the given set.
//! Those references are collected as [`ExternalReference`]s regardless
//! of options; they are what the cross-service poller syncs over HTTP.
//! With `check_public_schema_references` enabled (the default for a
//! whole-workspace check), an out-of-set reference is also an error.

use std::collections::{HashMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use super::{Manifest, PublicSchemaRef};

/// Stable identifier for a class of manifest problem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DiagnosticCode {
    ConnectionNotFound,
    ConnectionTypeMismatch,
    DataStoreMissingConfig,
    DataStoreNotFound,
    DuplicateManifestSlug,
    DuplicatePublicSchema,
    ManifestNotFound,
    PublicSchemaNotFound,
    UnusedConnection,
    VersionMismatch,
}

impl fmt::Display for DiagnosticCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::ConnectionNotFound => "CONNECTION_NOT_FOUND",
            Self::ConnectionTypeMismatch => "CONNECTION_TYPE_MISMATCH",
            Self::DataStoreMissingConfig => "DATA_STORE_MISSING_CONFIG",
            Self::DataStoreNotFound => "DATA_STORE_NOT_FOUND",
            Self::DuplicateManifestSlug => "DUPLICATE_MANIFEST_SLUG",
            Self::DuplicatePublicSchema => "DUPLICATE_PUBLIC_SCHEMA",
            Self::ManifestNotFound => "MANIFEST_NOT_FOUND",
            Self::PublicSchemaNotFound => "PUBLIC_SCHEMA_NOT_FOUND",
            Self::UnusedConnection => "UNUSED_CONNECTION",
            Self::VersionMismatch => "VERSION_MISMATCH",
        };
        f.write_str(s)
    }
}

/// Whether a diagnostic blocks startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Warning => f.write_str("warning"),
            Self::Error => f.write_str("error"),
        }
    }
}

/// One verification finding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Diagnostic {
    pub code: DiagnosticCode,
    pub severity: Severity,
    pub message: String,
    /// Slug of the manifest the finding is located in.
    pub manifest_slug: String,
    /// The item within the manifest (data store slug, schema name, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

impl Diagnostic {
    pub fn error(
        code: DiagnosticCode,
        message: impl Into<String>,
        manifest_slug: impl Into<String>,
    ) -> Self {
        Self {
            code,
            severity: Severity::Error,
            message: message.into(),
            manifest_slug: manifest_slug.into(),
            context: None,
            hint: None,
        }
    }

    pub fn warning(
        code: DiagnosticCode,
        message: impl Into<String>,
        manifest_slug: impl Into<String>,
    ) -> Self {
        Self {
            code,
            severity: Severity::Warning,
            message: message.into(),
            manifest_slug: manifest_slug.into(),
            context: None,
            hint: None,
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} [{}]: {}",
            self.severity, self.code, self.manifest_slug, self.message
        )?;
        if let Some(hint) = &self.hint {
            write!(f, " (hint: {})", hint)?;
        }
        Ok(())
    }
}

/// A consumer schema reference that points outside the verified set.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalReference {
    /// Slug of the manifest that publishes the schema.
    pub manifest_slug: String,
    pub public_schema: PublicSchemaRef,
}

/// Verification options.
#[derive(Debug, Clone)]
pub struct VerifyOptions {
    /// When true, consumer schema references must resolve within the
    /// given set: an out-of-set manifest, a missing schema name, or a
    /// major version mismatch is an error. When false, out-of-set
    /// references are merely collected as [`ExternalReference`]s.
    pub check_public_schema_references: bool,
}

impl Default for VerifyOptions {
    fn default() -> Self {
        Self {
            check_public_schema_references: true,
        }
    }
}

/// Outcome of verifying a manifest set.
#[derive(Debug, Clone, Default)]
pub struct VerificationResult {
    pub diagnostics: Vec<Diagnostic>,
    pub external_references: Vec<ExternalReference>,
}

impl VerificationResult {
    /// True when no error-severity diagnostic is present. Warnings and
    /// external references do not invalidate a set.
    pub fn is_valid(&self) -> bool {
        !self.diagnostics.iter().any(Diagnostic::is_error)
    }

    pub fn errors(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics.iter().filter(|d| d.is_error())
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics.iter().filter(|d| !d.is_error())
    }
}

/// Verify a set of manifests together.
///
/// All checks run to completion; nothing short-circuits.
pub fn verify_manifests(manifests: &[Manifest], options: &VerifyOptions) -> VerificationResult {
    let mut result = VerificationResult::default();

    check_duplicate_slugs(manifests, &mut result);
    check_duplicate_public_schemas(manifests, &mut result);

    let manifests_by_slug: HashMap<&str, &Manifest> =
        manifests.iter().map(|m| (m.slug.as_str(), m)).collect();
    let all_data_stores: HashSet<&str> = manifests
        .iter()
        .flat_map(|m| m.data_stores.iter())
        .map(|ds| ds.connection_slug.as_str())
        .collect();

    for manifest in manifests {
        check_connections(manifest, &mut result);
        check_public_schema_sources(manifest, manifests, &all_data_stores, &mut result);
        check_consumer_schemas(manifest, &manifests_by_slug, &all_data_stores, options, &mut result);
    }

    result
}

fn check_duplicate_slugs(manifests: &[Manifest], result: &mut VerificationResult) {
    let mut seen = HashSet::new();
    for manifest in manifests {
        if !seen.insert(manifest.slug.as_str()) {
            result.diagnostics.push(
                Diagnostic::error(
                    DiagnosticCode::DuplicateManifestSlug,
                    format!("manifest slug '{}' appears more than once", manifest.slug),
                    &manifest.slug,
                )
                .with_hint("give each manifest a unique slug"),
            );
        }
    }
}

fn check_duplicate_public_schemas(manifests: &[Manifest], result: &mut VerificationResult) {
    // Keyed by (name, major): two minor revisions of the same major are
    // still the same contract and must not be published twice.
    let mut seen: HashSet<(&str, u32)> = HashSet::new();
    for manifest in manifests {
        for schema in &manifest.public_schemas {
            if !seen.insert((schema.name.as_str(), schema.version.major)) {
                result.diagnostics.push(
                    Diagnostic::error(
                        DiagnosticCode::DuplicatePublicSchema,
                        format!(
                            "public schema '{}' version {} is published more than once",
                            schema.name, schema.version.major
                        ),
                        &manifest.slug,
                    )
                    .with_context(schema.name.clone()),
                );
            }
        }
    }
}

fn check_connections(manifest: &Manifest, result: &mut VerificationResult) {
    let connections: HashMap<&str, &super::Connection> = manifest
        .connections
        .iter()
        .map(|c| (c.slug.as_str(), c))
        .collect();
    let mut used: HashSet<&str> = HashSet::new();

    for data_store in &manifest.data_stores {
        used.insert(data_store.connection_slug.as_str());
        match connections.get(data_store.connection_slug.as_str()) {
            None => {
                result.diagnostics.push(
                    Diagnostic::error(
                        DiagnosticCode::ConnectionNotFound,
                        format!(
                            "data store references connection '{}' which does not exist",
                            data_store.connection_slug
                        ),
                        &manifest.slug,
                    )
                    .with_context(data_store.connection_slug.clone())
                    .with_hint(format!(
                        "add a connection with slug '{}' to manifest '{}'",
                        data_store.connection_slug, manifest.slug
                    )),
                );
            }
            Some(connection) => {
                if let Some(config) = &data_store.config {
                    if config.connection_type() != connection.connection_type() {
                        result.diagnostics.push(
                            Diagnostic::error(
                                DiagnosticCode::ConnectionTypeMismatch,
                                format!(
                                    "data store '{}' is configured as '{}' but its connection is '{}'",
                                    data_store.connection_slug,
                                    config.connection_type(),
                                    connection.connection_type()
                                ),
                                &manifest.slug,
                            )
                            .with_context(data_store.connection_slug.clone()),
                        );
                    }
                }
            }
        }
    }

    for event_store in &manifest.event_stores {
        used.insert(event_store.connection_slug.as_str());
        if !connections.contains_key(event_store.connection_slug.as_str()) {
            result.diagnostics.push(
                Diagnostic::error(
                    DiagnosticCode::ConnectionNotFound,
                    format!(
                        "event store references connection '{}' which does not exist",
                        event_store.connection_slug
                    ),
                    &manifest.slug,
                )
                .with_context(event_store.connection_slug.clone()),
            );
        }
    }

    for connection in &manifest.connections {
        if !used.contains(connection.slug.as_str()) {
            result.diagnostics.push(
                Diagnostic::warning(
                    DiagnosticCode::UnusedConnection,
                    format!(
                        "connection '{}' is not referenced by any data store or event store",
                        connection.slug
                    ),
                    &manifest.slug,
                )
                .with_context(connection.slug.clone())
                .with_hint("remove the connection or bind a data store to it"),
            );
        }
    }
}

fn check_public_schema_sources(
    manifest: &Manifest,
    manifests: &[Manifest],
    all_data_stores: &HashSet<&str>,
    result: &mut VerificationResult,
) {
    for schema in &manifest.public_schemas {
        let slug = schema.source.data_store_slug.as_str();
        if !all_data_stores.contains(slug) {
            result.diagnostics.push(
                Diagnostic::error(
                    DiagnosticCode::DataStoreNotFound,
                    format!(
                        "public schema '{}' sources from data store '{}' which does not exist",
                        schema.name, slug
                    ),
                    &manifest.slug,
                )
                .with_context(schema.name.clone()),
            );
            continue;
        }

        // A source store must carry replication config.
        let has_config = manifests
            .iter()
            .flat_map(|m| m.data_stores.iter())
            .any(|ds| ds.connection_slug == slug && ds.config.is_some());
        if !has_config {
            result.diagnostics.push(
                Diagnostic::error(
                    DiagnosticCode::DataStoreMissingConfig,
                    format!(
                        "public schema '{}' sources from data store '{}' which has no source configuration",
                        schema.name, slug
                    ),
                    &manifest.slug,
                )
                .with_context(schema.name.clone())
                .with_hint(format!("add a 'config' block to data store '{}'", slug)),
            );
        }
    }
}

fn check_consumer_schemas(
    manifest: &Manifest,
    manifests_by_slug: &HashMap<&str, &Manifest>,
    all_data_stores: &HashSet<&str>,
    options: &VerifyOptions,
    result: &mut VerificationResult,
) {
    for consumer in &manifest.consumer_schemas {
        if !all_data_stores.contains(consumer.destination_data_store_slug.as_str()) {
            result.diagnostics.push(
                Diagnostic::error(
                    DiagnosticCode::DataStoreNotFound,
                    format!(
                        "consumer schema '{}' writes to data store '{}' which does not exist",
                        consumer.name, consumer.destination_data_store_slug
                    ),
                    &manifest.slug,
                )
                .with_context(consumer.name.clone()),
            );
        }

        match manifests_by_slug.get(consumer.source_manifest_slug.as_str()) {
            None => {
                // Recorded even when reference checking is off; this
                // list drives the cross-service poller.
                let external = ExternalReference {
                    manifest_slug: consumer.source_manifest_slug.clone(),
                    public_schema: consumer.public_schema.clone(),
                };
                if !result.external_references.contains(&external) {
                    result.external_references.push(external);
                }

                if options.check_public_schema_references {
                    result.diagnostics.push(
                        Diagnostic::error(
                            DiagnosticCode::ManifestNotFound,
                            format!(
                                "consumer schema '{}' references manifest '{}' which is not in the set",
                                consumer.name, consumer.source_manifest_slug
                            ),
                            &manifest.slug,
                        )
                        .with_context(consumer.name.clone())
                        .with_hint(
                            "include the manifest in the set, or verify without public schema reference checking",
                        ),
                    );
                }
            }
            Some(source_manifest) if options.check_public_schema_references => {
                let by_name: Vec<&super::PublicSchema> = source_manifest
                    .public_schemas
                    .iter()
                    .filter(|s| s.name == consumer.public_schema.name)
                    .collect();

                if by_name.is_empty() {
                    result.diagnostics.push(
                        Diagnostic::error(
                            DiagnosticCode::PublicSchemaNotFound,
                            format!(
                                "consumer schema '{}' references public schema '{}' which manifest '{}' does not publish",
                                consumer.name,
                                consumer.public_schema.name,
                                consumer.source_manifest_slug
                            ),
                            &manifest.slug,
                        )
                        .with_context(consumer.name.clone()),
                    );
                } else if !by_name
                    .iter()
                    .any(|s| s.version.major == consumer.public_schema.major_version)
                {
                    let published: Vec<String> = by_name
                        .iter()
                        .map(|s| s.version.major.to_string())
                        .collect();
                    result.diagnostics.push(
                        Diagnostic::error(
                            DiagnosticCode::VersionMismatch,
                            format!(
                                "consumer schema '{}' wants '{}' major version {}, but published major version(s) are: {}",
                                consumer.name,
                                consumer.public_schema.name,
                                consumer.public_schema.major_version,
                                published.join(", ")
                            ),
                            &manifest.slug,
                        )
                        .with_context(consumer.name.clone()),
                    );
                }
            }
            Some(_) => {}
        }
    }
}
