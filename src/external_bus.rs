// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Subscribe bus over remote sync services.
//!
//! Every manifest slug referenced by a consumer schema but not present
//! in this workspace is a remote. The bus polls remotes round robin
//! over HTTP, one remote per `poll_next`, with bounded retries per
//! request. Cursors advance only for schemas the polled remote
//! publishes, so remotes progress independently.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::config::ExternalSyncConfig;
use crate::cursor::{Cursor, Cursors};
use crate::error::{Result, SyncError};
use crate::http::{SyncHttpClient, SyncServiceResolver};
use crate::manifest::SyncManifest;
use crate::message_bus::{BusState, MessageBusLifecycle, SubscribeMessageBus};
use crate::operation::OperationMessage;
use crate::resilience::RetryConfig;

struct Remote {
    manifest_slug: String,
    client: Arc<SyncHttpClient>,
}

pub struct ExternalSyncMessageBus {
    manifest: Arc<SyncManifest>,
    resolver: Arc<dyn SyncServiceResolver>,
    retry: RetryConfig,
    poll_interval: Duration,
    state: Mutex<BusState>,
    cursors: Mutex<Option<Cursors>>,
    remotes: Mutex<Vec<Remote>>,
    next_remote: AtomicUsize,
}

impl ExternalSyncMessageBus {
    pub fn new(
        manifest: Arc<SyncManifest>,
        resolver: Arc<dyn SyncServiceResolver>,
        config: &ExternalSyncConfig,
    ) -> Self {
        Self {
            manifest,
            resolver,
            retry: config.retry_config(),
            poll_interval: config.poll_interval_duration(),
            state: Mutex::new(BusState::Initial),
            cursors: Mutex::new(None),
            remotes: Mutex::new(Vec::new()),
            next_remote: AtomicUsize::new(0),
        }
    }

    fn state(&self) -> BusState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, state: BusState) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = state;
    }

    async fn read_with_retry(
        &self,
        remote: &Remote,
        cursors: &[Cursor],
    ) -> Result<Vec<OperationMessage>> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let started = Instant::now();
            match remote.client.read(cursors, None).await {
                Ok(messages) => {
                    crate::metrics::record_remote_poll(
                        &remote.manifest_slug,
                        true,
                        started.elapsed(),
                    );
                    return Ok(messages);
                }
                Err(e) if attempt < self.retry.max_attempts => {
                    let delay = self.retry.delay_for_attempt(attempt);
                    warn!(
                        remote = %remote.manifest_slug,
                        attempt,
                        max_attempts = self.retry.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Remote read failed, retrying"
                    );
                    crate::metrics::record_remote_retry(&remote.manifest_slug);
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    crate::metrics::record_remote_poll(
                        &remote.manifest_slug,
                        false,
                        started.elapsed(),
                    );
                    return Err(e);
                }
            }
        }
    }
}

#[async_trait]
impl MessageBusLifecycle for ExternalSyncMessageBus {
    async fn prepare(&self) -> Result<()> {
        let mut remotes = Vec::new();
        // BTreeMap keys give a stable round robin order.
        for slug in self.manifest.external_consumer_schemas().keys() {
            let base_url = self.resolver.resolve(slug)?;
            let client = SyncHttpClient::new(base_url, self.retry.request_timeout)?;
            remotes.push(Remote {
                manifest_slug: slug.clone(),
                client: Arc::new(client),
            });
        }
        info!(remotes = remotes.len(), "External sync bus prepared");
        *self.remotes.lock().unwrap_or_else(|e| e.into_inner()) = remotes;
        self.set_state(BusState::Prepared);
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        if self.state() < BusState::Stopped {
            self.set_state(BusState::Stopped);
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.set_state(BusState::Closed);
        Ok(())
    }
}

#[async_trait]
impl SubscribeMessageBus for ExternalSyncMessageBus {
    async fn set_initial_cursors(&self, cursors: Cursors) -> Result<()> {
        // Make sure every externally consumed schema has a cursor, so a
        // fresh workspace starts each remote from the beginning.
        let mut all: Vec<Cursor> = self
            .manifest
            .external_schema_references()
            .iter()
            .map(|reference| {
                Cursor::empty(crate::cursor::PublicSchemaReference::new(
                    &reference.manifest_slug,
                    &reference.public_schema.name,
                    reference.public_schema.major_version,
                ))
            })
            .collect();
        all.extend(cursors.to_vec());
        *self.cursors.lock().unwrap_or_else(|e| e.into_inner()) =
            Some(Cursors::from_cursors(all));
        Ok(())
    }

    async fn poll_next(&self) -> Result<Option<Vec<OperationMessage>>> {
        match self.state() {
            BusState::Initial => return Err(SyncError::BusNotPrepared),
            BusState::Stopped | BusState::Closed => return Ok(None),
            BusState::Prepared => self.set_state(BusState::Running),
            BusState::Running => tokio::time::sleep(self.poll_interval).await,
        }
        if self.state() >= BusState::Stopped {
            return Ok(None);
        }

        let remote = {
            let remotes = self.remotes.lock().unwrap_or_else(|e| e.into_inner());
            if remotes.is_empty() {
                return Ok(None);
            }
            let idx = self.next_remote.fetch_add(1, Ordering::Relaxed) % remotes.len();
            Remote {
                manifest_slug: remotes[idx].manifest_slug.clone(),
                client: remotes[idx].client.clone(),
            }
        };

        let cursors = self
            .cursors
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .ok_or(SyncError::CursorsNotSet)?;
        let remote_cursors: Vec<Cursor> = cursors
            .to_vec()
            .into_iter()
            .filter(|cursor| cursor.schema.manifest_slug == remote.manifest_slug)
            .collect();
        if remote_cursors.is_empty() {
            debug!(remote = %remote.manifest_slug, "No schemas consumed from remote");
            return Ok(Some(Vec::new()));
        }

        let messages = self.read_with_retry(&remote, &remote_cursors).await?;
        if !messages.is_empty() {
            let mut advanced = cursors;
            advanced.advance_with_messages(&messages);
            *self.cursors.lock().unwrap_or_else(|e| e.into_inner()) = Some(advanced);
        }
        Ok(Some(messages))
    }
}
