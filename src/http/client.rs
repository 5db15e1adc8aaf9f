// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Client side of the cross-service read protocol.

use std::time::Duration;

use tracing::debug;

use crate::cursor::Cursor;
use crate::error::{Result, SyncError};
use crate::operation::OperationMessage;

use super::wire::{ReadRequest, ReadResponse, WireCursor};

pub struct SyncHttpClient {
    http: reqwest::Client,
    base_url: String,
}

impl SyncHttpClient {
    /// `base_url` is scheme plus authority, no trailing slash.
    pub fn new(base_url: impl Into<String>, request_timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| SyncError::http("client", e.to_string()))?;
        Ok(Self {
            http,
            base_url: base_url.into(),
        })
    }

    /// Read transactions after the cursors from the remote service.
    pub async fn read(
        &self,
        cursors: &[Cursor],
        limit: Option<usize>,
    ) -> Result<Vec<OperationMessage>> {
        let url = format!("{}/read", self.base_url);
        let request = ReadRequest {
            cursors: cursors.iter().map(WireCursor::from).collect(),
            limit,
        };
        debug!(url = %url, cursors = cursors.len(), "Reading from remote sync service");

        let response = self.http.post(&url).json(&request).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SyncError::http(
                "read",
                format!("{url} returned {status}: {body}"),
            ));
        }
        let body: ReadResponse = response.json().await?;
        Ok(body.operations)
    }
}
