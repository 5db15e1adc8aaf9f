// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! HTTP protocol between sync services: server, client, wire types, and
//! service resolution.

pub mod client;
pub mod resolver;
pub mod server;
pub mod wire;

pub use client::SyncHttpClient;
pub use resolver::{KubernetesResolver, LocalhostResolver, StaticResolver, SyncServiceResolver};
pub use server::{router, serve};
pub use wire::{ReadRequest, ReadResponse, WireCursor};
