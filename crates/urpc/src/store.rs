// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Key-value store service and its typed client proxy.
//!
//! | Operation | Arguments | Result | Idempotent |
//! |-----------|-----------|--------|------------|
//! | `put` | key, value, overwrite | stored? (bool) | yes |
//! | `get` | key | value | yes |
//! | `append` | key, suffix | new value | no |
//! | `remove` | key | removed value | no |

use crate::dispatcher::{CallDispatcher, OperationCatalog};
use crate::error::{RpcError, RpcResult};
use crate::protocol::Value;
use crate::service::{arg_bool, arg_str, expect_arity, ServiceError, ServiceTable};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

pub const OP_PUT: &str = "put";
pub const OP_GET: &str = "get";
pub const OP_APPEND: &str = "append";
pub const OP_REMOVE: &str = "remove";

/// Idempotency of the store operations.
///
/// `put` counts as idempotent: repeating the same put leaves the same
/// state and returns the same result once the first one has landed.
pub fn store_catalog() -> OperationCatalog {
    OperationCatalog::new()
        .idempotent(OP_GET)
        .idempotent(OP_PUT)
        .non_idempotent(OP_APPEND)
        .non_idempotent(OP_REMOVE)
}

fn not_found(key: &str) -> ServiceError {
    ServiceError::failed(format!("Key {} not found", key))
}

/// In-memory string store.
#[derive(Debug, Default)]
pub struct KvStore {
    data: Mutex<HashMap<String, String>>,
}

impl KvStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `value` under `key` if the key is absent or `overwrite` is set.
    pub fn put(&self, key: &str, value: &str, overwrite: bool) -> bool {
        let mut data = self.data.lock();
        if overwrite || !data.contains_key(key) {
            data.insert(key.to_string(), value.to_string());
            true
        } else {
            false
        }
    }

    pub fn get(&self, key: &str) -> Result<String, ServiceError> {
        self.data.lock().get(key).cloned().ok_or_else(|| not_found(key))
    }

    /// Append `suffix` to the value at `key`; returns the new value.
    pub fn append(&self, key: &str, suffix: &str) -> Result<String, ServiceError> {
        let mut data = self.data.lock();
        let value = data.get_mut(key).ok_or_else(|| not_found(key))?;
        value.push_str(suffix);
        Ok(value.clone())
    }

    /// Remove `key`; returns the removed value.
    pub fn remove(&self, key: &str) -> Result<String, ServiceError> {
        self.data.lock().remove(key).ok_or_else(|| not_found(key))
    }

    pub fn len(&self) -> usize {
        self.data.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.lock().is_empty()
    }

    /// Expose the store as a dispatch table.
    pub fn service(self: &Arc<Self>) -> ServiceTable {
        let put = Arc::clone(self);
        let get = Arc::clone(self);
        let append = Arc::clone(self);
        let remove = Arc::clone(self);

        ServiceTable::new()
            .register(OP_PUT, move |args: &[Value]| {
                expect_arity(OP_PUT, args, 3)?;
                let stored = put.put(
                    arg_str(OP_PUT, args, 0)?,
                    arg_str(OP_PUT, args, 1)?,
                    arg_bool(OP_PUT, args, 2)?,
                );
                Ok(Value::Bool(stored))
            })
            .register(OP_GET, move |args: &[Value]| {
                expect_arity(OP_GET, args, 1)?;
                get.get(arg_str(OP_GET, args, 0)?).map(Value::Str)
            })
            .register(OP_APPEND, move |args: &[Value]| {
                expect_arity(OP_APPEND, args, 2)?;
                append
                    .append(arg_str(OP_APPEND, args, 0)?, arg_str(OP_APPEND, args, 1)?)
                    .map(Value::Str)
            })
            .register(OP_REMOVE, move |args: &[Value]| {
                expect_arity(OP_REMOVE, args, 1)?;
                remove.remove(arg_str(OP_REMOVE, args, 0)?).map(Value::Str)
            })
    }
}

/// Typed client for a remote [`KvStore`].
pub struct StoreProxy {
    client: CallDispatcher,
}

impl StoreProxy {
    /// Wrap a dispatcher (its catalog should come from [`store_catalog`]).
    pub fn new(client: CallDispatcher) -> Self {
        Self { client }
    }

    pub fn put(&self, key: &str, value: &str, overwrite: bool) -> RpcResult<bool> {
        let reply = self.client.call(
            OP_PUT,
            vec![Value::from(key), Value::from(value), Value::Bool(overwrite)],
        )?;
        reply
            .as_bool()
            .ok_or_else(|| unexpected(OP_PUT, "bool", &reply))
    }

    pub fn get(&self, key: &str) -> RpcResult<String> {
        expect_string(OP_GET, self.client.call(OP_GET, vec![Value::from(key)])?)
    }

    pub fn append(&self, key: &str, value: &str) -> RpcResult<String> {
        let reply = self
            .client
            .call(OP_APPEND, vec![Value::from(key), Value::from(value)])?;
        expect_string(OP_APPEND, reply)
    }

    pub fn remove(&self, key: &str) -> RpcResult<String> {
        expect_string(OP_REMOVE, self.client.call(OP_REMOVE, vec![Value::from(key)])?)
    }

    /// Underlying dispatcher (for untyped calls and stats).
    pub fn dispatcher(&self) -> &CallDispatcher {
        &self.client
    }
}

fn expect_string(operation: &str, reply: Value) -> RpcResult<String> {
    match reply {
        Value::Str(s) => Ok(s),
        other => Err(unexpected(operation, "str", &other)),
    }
}

fn unexpected(operation: &str, expected: &str, found: &Value) -> RpcError {
    RpcError::UnexpectedReply(format!(
        "{} expected {}, got {}",
        operation,
        expected,
        found.type_name()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::Idempotency;
    use crate::service::Service;

    #[test]
    fn put_respects_overwrite_flag() {
        let store = KvStore::new();
        assert!(store.put("a", "1", false));
        assert!(!store.put("a", "2", false));
        assert_eq!(store.get("a").unwrap(), "1");
        assert!(store.put("a", "3", true));
        assert_eq!(store.get("a").unwrap(), "3");
    }

    #[test]
    fn missing_key_messages() {
        let store = KvStore::new();
        assert_eq!(store.get("missing").unwrap_err().to_string(), "Key missing not found");
        assert_eq!(store.append("x", "1").unwrap_err().to_string(), "Key x not found");
        assert_eq!(store.remove("y").unwrap_err().to_string(), "Key y not found");
    }

    #[test]
    fn append_and_remove() {
        let store = KvStore::new();
        store.put("a", "1", false);
        assert_eq!(store.append("a", "2").unwrap(), "12");
        assert_eq!(store.remove("a").unwrap(), "12");
        assert!(store.is_empty());
    }

    #[test]
    fn service_table_routes_store_operations() {
        let store = Arc::new(KvStore::new());
        let svc = store.service();
        assert_eq!(svc.operations(), vec!["append", "get", "put", "remove"]);

        let put = svc.invoke(
            "put",
            &[Value::from("a"), Value::from("1"), Value::from("False")],
        );
        assert_eq!(put, Ok(Value::Bool(true)));
        assert_eq!(
            svc.invoke("append", &[Value::from("a"), Value::from("2")]),
            Ok(Value::from("12"))
        );
        assert_eq!(store.len(), 1);

        let err = svc.invoke("get", &[]).unwrap_err();
        assert!(matches!(err, ServiceError::InvalidArguments { .. }));
    }

    #[test]
    fn catalog_classification() {
        let catalog = store_catalog();
        assert_eq!(catalog.classify(OP_GET), Idempotency::Idempotent);
        assert_eq!(catalog.classify(OP_PUT), Idempotency::Idempotent);
        assert_eq!(catalog.classify(OP_APPEND), Idempotency::NonIdempotent);
        assert_eq!(catalog.classify(OP_REMOVE), Idempotency::NonIdempotent);
    }
}
