// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # urpc - RPC over lossy datagram transports
//!
//! Request/response calls on top of a transport that may lose, delay or
//! duplicate messages. Every logical call gets exactly one outcome at the
//! caller, and the server never runs the same call twice.
//!
//! ## Delivery semantics
//!
//! | Side | Mechanism |
//! |------|-----------|
//! | Client | Idempotent operations are retransmitted until answered; non-idempotent ones are sent once and time out |
//! | Server | Requests are deduplicated by call id; the first response is cached and replayed to duplicates |
//!
//! ```text
//!   CallDispatcher                      RequestProcessor
//!        |                                     |
//!        |--- Request(call_id, op, args) ----->|  miss: invoke Service, cache
//!        |           (lost response)      X<---|
//!        |--- Request(call_id, op, args) ----->|  hit: replay cached bytes
//!        |<-- Success/Error(call_id) ----------|
//! ```
//!
//! ## Key Types
//!
//! | Type | Description |
//! |------|-------------|
//! | [`CallDispatcher`] | Client: issues calls, retries idempotent ones |
//! | [`RequestProcessor`] | Server: dedup, invoke, cache, replay |
//! | [`Envelope`] | Wire message (request, success or error) |
//! | [`Transport`] | Datagram transport ([`UdpTransport`], [`MemoryNetwork`]) |
//! | [`Service`] | Named operations invoked by the processor |
//! | [`KvStore`] / [`StoreProxy`] | Key-value service and its typed client |

pub mod config;
pub mod dedup;
pub mod dispatcher;
pub mod error;
pub mod processor;
pub mod protocol;
pub mod service;
pub mod store;
pub mod transport;

pub use config::{Backoff, DispatcherConfig, ProcessorConfig, RpcConfig};
pub use dedup::{DedupTable, Resolution};
pub use dispatcher::{CallDispatcher, DispatcherStats, Idempotency, OperationCatalog};
pub use error::{RpcError, RpcResult};
pub use processor::{ProcessorStats, Reply, RequestProcessor, ShutdownHandle};
pub use protocol::{CallId, Envelope, MessageKind, Payload, ProtocolError, Value};
pub use service::{Service, ServiceError, ServiceTable};
pub use store::{store_catalog, KvStore, StoreProxy};
pub use transport::{
    Datagram, FaultConfig, MemoryNetwork, MemoryTransport, NetworkStats, Transport, UdpTransport,
};
