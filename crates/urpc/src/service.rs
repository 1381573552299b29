// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Service side of urpc: named operations invoked with positional arguments.

use crate::protocol::Value;
use std::collections::HashMap;
use std::fmt;

/// Failure reported by a service operation.
///
/// The `Display` text is what crosses the wire as the error description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceError {
    /// No operation with this name.
    UnknownOperation(String),
    /// Wrong number or type of arguments.
    InvalidArguments { operation: String, reason: String },
    /// The operation ran and failed.
    Failed(String),
}

impl ServiceError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }

    pub fn invalid_args(operation: &str, reason: impl Into<String>) -> Self {
        Self::InvalidArguments {
            operation: operation.to_string(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for ServiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownOperation(name) => write!(f, "Unknown operation: {}", name),
            Self::InvalidArguments { operation, reason } => {
                write!(f, "Invalid arguments for '{}': {}", operation, reason)
            }
            Self::Failed(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for ServiceError {}

/// A set of named operations.
///
/// Implement this trait to expose your service through a
/// [`RequestProcessor`](crate::RequestProcessor).
pub trait Service: Send + Sync {
    /// Invoke `operation` with `args`.
    fn invoke(&self, operation: &str, args: &[Value]) -> Result<Value, ServiceError>;
}

/// A function-based service.
impl<F> Service for F
where
    F: Fn(&str, &[Value]) -> Result<Value, ServiceError> + Send + Sync,
{
    fn invoke(&self, operation: &str, args: &[Value]) -> Result<Value, ServiceError> {
        self(operation, args)
    }
}

type Handler = Box<dyn Fn(&[Value]) -> Result<Value, ServiceError> + Send + Sync>;

/// Operation-name dispatch table.
///
/// # Example
///
/// ```
/// use urpc::{Service, ServiceTable, Value};
///
/// let table = ServiceTable::new().register("echo", |args: &[Value]| {
///     Ok(args.first().cloned().unwrap_or_default())
/// });
/// assert_eq!(table.invoke("echo", &[Value::Int(3)]), Ok(Value::Int(3)));
/// assert!(table.invoke("nope", &[]).is_err());
/// ```
#[derive(Default)]
pub struct ServiceTable {
    handlers: HashMap<String, Handler>,
}

impl ServiceTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` under `name`, replacing any previous handler.
    #[must_use]
    pub fn register<F>(mut self, name: &str, handler: F) -> Self
    where
        F: Fn(&[Value]) -> Result<Value, ServiceError> + Send + Sync + 'static,
    {
        self.handlers.insert(name.to_string(), Box::new(handler));
        self
    }

    /// Registered operation names, sorted.
    pub fn operations(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl Service for ServiceTable {
    fn invoke(&self, operation: &str, args: &[Value]) -> Result<Value, ServiceError> {
        match self.handlers.get(operation) {
            Some(handler) => handler(args),
            None => Err(ServiceError::UnknownOperation(operation.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Argument helpers
// ---------------------------------------------------------------------------

/// Fail unless exactly `count` arguments were supplied.
pub fn expect_arity(operation: &str, args: &[Value], count: usize) -> Result<(), ServiceError> {
    if args.len() == count {
        Ok(())
    } else {
        Err(ServiceError::invalid_args(
            operation,
            format!("expected {} arguments, got {}", count, args.len()),
        ))
    }
}

/// String argument at `index`.
pub fn arg_str<'a>(operation: &str, args: &'a [Value], index: usize) -> Result<&'a str, ServiceError> {
    match args.get(index) {
        Some(Value::Str(s)) => Ok(s),
        Some(other) => Err(ServiceError::invalid_args(
            operation,
            format!("argument {} must be str, got {}", index, other.type_name()),
        )),
        None => Err(ServiceError::invalid_args(
            operation,
            format!("missing argument {}", index),
        )),
    }
}

/// Bool argument at `index`; also accepts `"True"`/`"False"` spelled as strings.
pub fn arg_bool(operation: &str, args: &[Value], index: usize) -> Result<bool, ServiceError> {
    match args.get(index) {
        Some(Value::Bool(b)) => Ok(*b),
        Some(Value::Str(s)) if s == "True" || s == "true" => Ok(true),
        Some(Value::Str(s)) if s == "False" || s == "false" => Ok(false),
        Some(other) => Err(ServiceError::invalid_args(
            operation,
            format!("argument {} must be bool, got {}", index, other.type_name()),
        )),
        None => Err(ServiceError::invalid_args(
            operation,
            format!("missing argument {}", index),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closure_service() {
        let svc = |op: &str, _args: &[Value]| -> Result<Value, ServiceError> {
            Ok(Value::from(op.to_uppercase()))
        };
        assert_eq!(svc.invoke("get", &[]), Ok(Value::from("GET")));
    }

    #[test]
    fn table_dispatch_and_unknown_operation() {
        let table = ServiceTable::new()
            .register("one", |_| Ok(Value::Int(1)))
            .register("fail", |_| Err(ServiceError::failed("nope")));

        assert_eq!(table.operations(), vec!["fail", "one"]);
        assert_eq!(table.invoke("one", &[]), Ok(Value::Int(1)));
        assert_eq!(table.invoke("fail", &[]).unwrap_err().to_string(), "nope");

        let err = table.invoke("frobnicate", &[]).unwrap_err();
        assert_eq!(err, ServiceError::UnknownOperation("frobnicate".into()));
        assert_eq!(err.to_string(), "Unknown operation: frobnicate");
    }

    #[test]
    fn argument_helpers() {
        let args = vec![Value::from("k"), Value::from("False"), Value::Int(3)];
        assert!(expect_arity("op", &args, 3).is_ok());
        assert!(expect_arity("op", &args, 2).is_err());
        assert_eq!(arg_str("op", &args, 0), Ok("k"));
        assert_eq!(arg_bool("op", &args, 1), Ok(false));
        assert!(arg_bool("op", &args, 2).is_err());
        assert!(arg_str("op", &args, 2).is_err());
        assert!(arg_str("op", &args, 9)
            .unwrap_err()
            .to_string()
            .contains("missing argument 9"));
    }
}
