// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Message buses between the publish and subscribe halves of the engine.
//!
//! The publish side hands transformed transactions to a
//! [`PublishMessageBus`]; the subscribe side drains ordered batches from
//! a [`SubscribeMessageBus`]. [`EventStoreMessageBus`] implements both
//! over one durable event store, which is how a single service consumes
//! its own published schemas.

use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::config::BusConfig;
use crate::cursor::Cursors;
use crate::error::{Result, SyncError};
use crate::event_store::EventStore;
use crate::operation::{OperationMessage, TransformedOperationWithSource};

/// Bus lifecycle, ordered. A bus only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum BusState {
    Initial = 1,
    Prepared = 2,
    Running = 3,
    Stopped = 4,
    Closed = 5,
}

impl std::fmt::Display for BusState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            BusState::Initial => "initial",
            BusState::Prepared => "prepared",
            BusState::Running => "running",
            BusState::Stopped => "stopped",
            BusState::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Shared lifecycle of both bus halves.
#[async_trait]
pub trait MessageBusLifecycle: Send + Sync {
    async fn prepare(&self) -> Result<()>;

    /// Stop yielding messages. In-flight polls finish; later polls end.
    async fn stop(&self) -> Result<()>;

    async fn close(&self) -> Result<()>;
}

/// Accepts transformed transactions from the publish pipeline.
#[async_trait]
pub trait PublishMessageBus: MessageBusLifecycle {
    /// Publish one transaction. Returns `false` when the transaction id
    /// was already published (a replay), `true` when newly accepted.
    async fn publish(
        &self,
        transaction_id: &str,
        operations: Vec<TransformedOperationWithSource>,
    ) -> Result<bool>;
}

/// Yields ordered batches of operation messages to the subscribe
/// pipeline.
#[async_trait]
pub trait SubscribeMessageBus: MessageBusLifecycle {
    /// Set the cursors the first poll resumes from. Must be called
    /// before the first `poll_next`.
    async fn set_initial_cursors(&self, cursors: Cursors) -> Result<()>;

    /// Next batch of messages. `Ok(Some(vec![]))` means nothing new yet;
    /// `Ok(None)` means the bus has stopped and no more will come.
    ///
    /// Internal cursors advance past everything a poll returns, so a
    /// batch is delivered at most once per bus instance.
    async fn poll_next(&self) -> Result<Option<Vec<OperationMessage>>>;
}

// ═══════════════════════════════════════════════════════════════════════
// Event store bus
// ═══════════════════════════════════════════════════════════════════════

/// Both bus halves over one event store.
///
/// `publish` writes through to the store; `poll_next` reads from the
/// store at the subscriber's cursors. State and cursors sit behind
/// plain mutexes, never held across an await.
pub struct EventStoreMessageBus {
    store: Arc<dyn EventStore>,
    poll_interval: Duration,
    state: Mutex<BusState>,
    cursors: Mutex<Option<Cursors>>,
}

impl EventStoreMessageBus {
    pub fn new(store: Arc<dyn EventStore>, config: &BusConfig) -> Self {
        Self {
            store,
            poll_interval: config.poll_interval_duration(),
            state: Mutex::new(BusState::Initial),
            cursors: Mutex::new(None),
        }
    }

    pub fn state(&self) -> BusState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, state: BusState) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = state;
    }
}

#[async_trait]
impl MessageBusLifecycle for EventStoreMessageBus {
    async fn prepare(&self) -> Result<()> {
        self.store.prepare().await?;
        self.set_state(BusState::Prepared);
        debug!("Event store bus prepared");
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        if self.state() < BusState::Stopped {
            self.set_state(BusState::Stopped);
        }
        self.store.stop().await
    }

    async fn close(&self) -> Result<()> {
        if self.state() < BusState::Closed {
            self.set_state(BusState::Closed);
        }
        self.store.close().await?;
        info!("Event store bus closed");
        Ok(())
    }
}

#[async_trait]
impl PublishMessageBus for EventStoreMessageBus {
    async fn publish(
        &self,
        transaction_id: &str,
        operations: Vec<TransformedOperationWithSource>,
    ) -> Result<bool> {
        match self.state() {
            BusState::Initial => return Err(SyncError::BusNotPrepared),
            BusState::Stopped | BusState::Closed => return Err(SyncError::BusNotRunning),
            BusState::Prepared | BusState::Running => {}
        }
        self.store.write(transaction_id, &operations).await
    }
}

#[async_trait]
impl SubscribeMessageBus for EventStoreMessageBus {
    async fn set_initial_cursors(&self, cursors: Cursors) -> Result<()> {
        *self.cursors.lock().unwrap_or_else(|e| e.into_inner()) = Some(cursors);
        Ok(())
    }

    async fn poll_next(&self) -> Result<Option<Vec<OperationMessage>>> {
        let state = self.state();
        match state {
            BusState::Initial => return Err(SyncError::BusNotPrepared),
            BusState::Stopped | BusState::Closed => return Ok(None),
            BusState::Prepared => self.set_state(BusState::Running),
            // Space out polls once the first one has happened.
            BusState::Running => tokio::time::sleep(self.poll_interval).await,
        }
        // Re-check after the sleep; stop() may have landed meanwhile.
        if self.state() >= BusState::Stopped {
            return Ok(None);
        }

        let cursors = self
            .cursors
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .ok_or(SyncError::CursorsNotSet)?;

        let started = std::time::Instant::now();
        let messages = self.store.read(&cursors.to_vec(), None).await?;
        crate::metrics::record_bus_poll(messages.len(), started.elapsed());

        if !messages.is_empty() {
            let mut advanced = cursors;
            advanced.advance_with_messages(&messages);
            *self.cursors.lock().unwrap_or_else(|e| e.into_inner()) = Some(advanced);
        }
        Ok(Some(messages))
    }
}
