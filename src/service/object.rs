//! Exposed objects.
//!
//! Anything reachable through an [`ObjectSpace`](super::object_space::ObjectSpace)
//! implements [`RemoteObject`]. Most callers build a [`MethodTable`] from
//! closures instead of implementing the trait by hand.

use crate::protocol::message::MethodSignature;
use crate::protocol::value::Value;
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// What a remote method can fail with. Reported to the caller as an
/// invocation fault carrying the display text.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum InvocationError {
    #[error("argument {index}: expected {expected}, got {found}")]
    BadArgument {
        index: usize,
        expected: &'static str,
        found: &'static str,
    },

    #[error("{0}")]
    Failed(String),
}

impl InvocationError {
    pub fn failed(message: impl Into<String>) -> Self {
        InvocationError::Failed(message.into())
    }
}

/// A local instance callable by remote peers.
///
/// `resolve` answers whether a method exists without running it; the object
/// space uses it to tell an unknown method apart from a failing one.
/// Implementations are shared across connections and worker threads.
pub trait RemoteObject: Send + Sync + 'static {
    fn resolve(&self, signature: &MethodSignature) -> bool;

    fn invoke(&self, signature: &MethodSignature, args: &[Value]) -> Result<Value, InvocationError>;
}

/// Typed view over positional arguments.
#[derive(Debug, Clone, Copy)]
pub struct Args<'a> {
    values: &'a [Value],
}

impl<'a> Args<'a> {
    pub fn new(values: &'a [Value]) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> &'a [Value] {
        self.values
    }

    pub fn get(&self, index: usize) -> Result<&'a Value, InvocationError> {
        self.values.get(index).ok_or(InvocationError::BadArgument {
            index,
            expected: "a value",
            found: "nothing",
        })
    }

    pub fn str(&self, index: usize) -> Result<&'a str, InvocationError> {
        let value = self.get(index)?;
        value.as_str().ok_or_else(|| mismatch(index, "text", value))
    }

    pub fn i64(&self, index: usize) -> Result<i64, InvocationError> {
        let value = self.get(index)?;
        value.as_i64().ok_or_else(|| mismatch(index, "int", value))
    }

    pub fn f64(&self, index: usize) -> Result<f64, InvocationError> {
        let value = self.get(index)?;
        value.as_f64().ok_or_else(|| mismatch(index, "float", value))
    }

    pub fn bool(&self, index: usize) -> Result<bool, InvocationError> {
        let value = self.get(index)?;
        value.as_bool().ok_or_else(|| mismatch(index, "bool", value))
    }

    pub fn bytes(&self, index: usize) -> Result<&'a [u8], InvocationError> {
        let value = self.get(index)?;
        value.as_bytes().ok_or_else(|| mismatch(index, "bytes", value))
    }
}

fn mismatch(index: usize, expected: &'static str, found: &Value) -> InvocationError {
    InvocationError::BadArgument {
        index,
        expected,
        found: found.kind(),
    }
}

type MethodFn = dyn Fn(Args<'_>) -> Result<Value, InvocationError> + Send + Sync + 'static;

/// A [`RemoteObject`] assembled from closures, keyed by name and arity.
///
/// ```rust
/// use remote_space::service::object::{MethodTable, RemoteObject};
/// use remote_space::protocol::message::MethodSignature;
/// use remote_space::protocol::value::Value;
///
/// let echo = MethodTable::new("echo")
///     .method("concat", 2, |args| Ok(format!("{}{}", args.str(0)?, args.str(1)?)));
///
/// let signature = MethodSignature::new("concat", 2);
/// let out = echo.invoke(&signature, &[Value::from("foo"), Value::from("bar")]);
/// assert_eq!(out, Ok(Value::from("foobar")));
/// ```
pub struct MethodTable {
    name: String,
    methods: HashMap<MethodSignature, Box<MethodFn>>,
}

impl MethodTable {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            methods: HashMap::new(),
        }
    }

    /// Add a method. A later method with the same name and arity replaces
    /// the earlier one.
    pub fn method<F, R>(mut self, name: &str, arity: usize, handler: F) -> Self
    where
        F: Fn(Args<'_>) -> Result<R, InvocationError> + Send + Sync + 'static,
        R: Into<Value>,
    {
        let method: Box<MethodFn> =
            Box::new(move |args: Args<'_>| handler(args).map(Into::<Value>::into));
        self.methods.insert(MethodSignature::new(name, arity), method);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Exposed signatures, sorted by name then arity
    pub fn signatures(&self) -> Vec<MethodSignature> {
        let mut signatures: Vec<MethodSignature> = self.methods.keys().cloned().collect();
        signatures.sort_by(|a, b| a.name.cmp(&b.name).then(a.arity.cmp(&b.arity)));
        signatures
    }
}

impl RemoteObject for MethodTable {
    fn resolve(&self, signature: &MethodSignature) -> bool {
        self.methods.contains_key(signature)
    }

    fn invoke(&self, signature: &MethodSignature, args: &[Value]) -> Result<Value, InvocationError> {
        match self.methods.get(signature) {
            Some(handler) => handler(Args::new(args)),
            None => Err(InvocationError::Failed(format!(
                "{} has no method {signature}",
                self.name
            ))),
        }
    }
}

impl fmt::Debug for MethodTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodTable")
            .field("name", &self.name)
            .field("methods", &self.signatures())
            .finish()
    }
}
