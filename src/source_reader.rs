// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Reads transactions from every source data store in the workspace and
//! interleaves them into one sequence.
//!
//! All source streams are raced concurrently; whichever yields first is
//! returned, tagged with its manifest and data store. The race relies on
//! [`TransactionStream::next`] being cancel safe: the losing futures are
//! dropped each round and recreated on the next call.

use std::sync::Arc;

use futures::future::{select_all, try_join_all};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::adapter::{DataSource, TransactionStream};
use crate::error::{Result, SyncError};
use crate::operation::SourceTransaction;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SourceReaderState {
    Initial,
    Prepared,
    Running,
    Stopped,
    Closed,
}

impl std::fmt::Display for SourceReaderState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SourceReaderState::Initial => "initial",
            SourceReaderState::Prepared => "prepared",
            SourceReaderState::Running => "running",
            SourceReaderState::Stopped => "stopped",
            SourceReaderState::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// A source plus the manifest coordinates its transactions carry.
pub struct SourceHandle {
    pub manifest_slug: String,
    pub data_store_slug: String,
    pub source: Arc<dyn DataSource>,
}

struct StreamEntry {
    manifest_slug: String,
    data_store_slug: String,
    stream: Box<dyn TransactionStream>,
}

pub struct SourceReader {
    state: SourceReaderState,
    sources: Vec<SourceHandle>,
    streams: Vec<StreamEntry>,
}

impl SourceReader {
    pub fn new(sources: Vec<SourceHandle>) -> Self {
        Self {
            state: SourceReaderState::Initial,
            sources,
            streams: Vec::new(),
        }
    }

    pub fn state(&self) -> SourceReaderState {
        self.state
    }

    fn require(&self, expected: SourceReaderState) -> Result<()> {
        if self.state != expected {
            return Err(SyncError::InvalidState {
                expected: expected.to_string(),
                actual: self.state.to_string(),
            });
        }
        Ok(())
    }

    pub async fn prepare(&mut self) -> Result<()> {
        self.require(SourceReaderState::Initial)?;
        try_join_all(self.sources.iter().map(|handle| handle.source.prepare())).await?;
        self.state = SourceReaderState::Prepared;
        crate::metrics::set_active_sources(self.sources.len());
        info!(sources = self.sources.len(), "Source reader prepared");
        Ok(())
    }

    /// Open one transaction stream per source. Streams end when the
    /// shutdown signal fires.
    pub async fn start(&mut self, shutdown: watch::Receiver<bool>) -> Result<()> {
        self.require(SourceReaderState::Prepared)?;
        for handle in &self.sources {
            let stream = handle.source.start_iteration(shutdown.clone()).await?;
            self.streams.push(StreamEntry {
                manifest_slug: handle.manifest_slug.clone(),
                data_store_slug: handle.data_store_slug.clone(),
                stream,
            });
        }
        self.state = SourceReaderState::Running;
        Ok(())
    }

    /// Next transaction from whichever source produces one first.
    ///
    /// One exhausted source stops the whole reader: sources only end on
    /// stop or shutdown, and a partial set of live sources would silently
    /// drop data.
    pub async fn next(&mut self) -> Result<Option<SourceTransaction>> {
        match self.state {
            SourceReaderState::Running => {}
            SourceReaderState::Stopped | SourceReaderState::Closed => return Ok(None),
            _ => {
                return Err(SyncError::InvalidState {
                    expected: SourceReaderState::Running.to_string(),
                    actual: self.state.to_string(),
                })
            }
        }
        if self.streams.is_empty() {
            return Ok(None);
        }

        let races: Vec<_> = self
            .streams
            .iter_mut()
            .enumerate()
            .map(|(idx, entry)| Box::pin(async move { (idx, entry.stream.next().await) }))
            .collect();
        let ((idx, transaction), _, _) = select_all(races).await;

        match transaction {
            Some(transaction) => {
                let entry = &self.streams[idx];
                crate::metrics::record_transaction_read(
                    &entry.data_store_slug,
                    transaction.operations.len(),
                );
                debug!(
                    data_store = %entry.data_store_slug,
                    transaction_id = %transaction.id,
                    operations = transaction.operations.len(),
                    "Read transaction"
                );
                Ok(Some(SourceTransaction {
                    source_manifest_slug: entry.manifest_slug.clone(),
                    source_data_store_slug: entry.data_store_slug.clone(),
                    transaction,
                }))
            }
            None => {
                warn!(
                    data_store = %self.streams[idx].data_store_slug,
                    "Source ended, stopping reader"
                );
                self.stop().await?;
                Ok(None)
            }
        }
    }

    pub async fn stop(&mut self) -> Result<()> {
        if self.state >= SourceReaderState::Stopped {
            return Ok(());
        }
        self.state = SourceReaderState::Stopped;
        self.streams.clear();
        try_join_all(self.sources.iter().map(|handle| handle.source.stop())).await?;
        crate::metrics::set_active_sources(0);
        info!("Source reader stopped");
        Ok(())
    }

    pub async fn close(&mut self) -> Result<()> {
        if self.state == SourceReaderState::Closed {
            return Ok(());
        }
        if self.state < SourceReaderState::Stopped {
            self.stop().await?;
        }
        self.state = SourceReaderState::Closed;
        try_join_all(self.sources.iter().map(|handle| handle.source.close())).await?;
        Ok(())
    }
}
