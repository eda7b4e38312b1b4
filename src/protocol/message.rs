use crate::protocol::value::Value;
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;
use thiserror::Error;

/// Identity under which an object is exposed
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectId(String);

impl ObjectId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for ObjectId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ObjectId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for ObjectId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Method name plus arity; objects may overload a name by argument count.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodSignature {
    pub name: String,
    pub arity: usize,
}

impl MethodSignature {
    pub fn new(name: impl Into<String>, arity: usize) -> Self {
        Self {
            name: name.into(),
            arity,
        }
    }
}

impl fmt::Display for MethodSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.name, self.arity)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvocationRequest {
    /// Caller-chosen id echoed in the response
    pub request_id: u64,
    pub object_id: ObjectId,
    pub method: String,
    pub args: Vec<Value>,
    /// No response is produced when set
    #[serde(default)]
    pub one_way: bool,
}

impl InvocationRequest {
    pub fn new(
        request_id: u64,
        object_id: impl Into<ObjectId>,
        method: impl Into<String>,
        args: Vec<Value>,
    ) -> Self {
        Self {
            request_id,
            object_id: object_id.into(),
            method: method.into(),
            args,
            one_way: false,
        }
    }

    pub fn one_way(mut self) -> Self {
        self.one_way = true;
        self
    }

    pub fn signature(&self) -> MethodSignature {
        MethodSignature::new(self.method.clone(), self.args.len())
    }
}

/// Failure returned to the remote caller as response payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
pub enum Fault {
    #[error("Unknown object: {object_id}")]
    UnknownObject { object_id: ObjectId },

    #[error("Unknown method {method}/{arity} on object {object_id}")]
    UnknownMethod {
        object_id: ObjectId,
        method: String,
        arity: usize,
    },

    #[error("Remote invocation failed: {message}")]
    Invocation { message: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvocationResponse {
    pub request_id: u64,
    pub result: Result<Value, Fault>,
}

impl InvocationResponse {
    pub fn ok(request_id: u64, value: Value) -> Self {
        Self {
            request_id,
            result: Ok(value),
        }
    }

    pub fn fault(request_id: u64, fault: Fault) -> Self {
        Self {
            request_id,
            result: Err(fault),
        }
    }

    pub fn is_fault(&self) -> bool {
        self.result.is_err()
    }
}

/// Everything that travels inside a frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Message {
    Request(InvocationRequest),
    Response(InvocationResponse),
    Ping { id: u64 },
    Pong { id: u64 },
    Disconnect,
}

impl Message {
    /// Name used in logs
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Request(_) => "REQUEST",
            Message::Response(_) => "RESPONSE",
            Message::Ping { .. } => "PING",
            Message::Pong { .. } => "PONG",
            Message::Disconnect => "DISCONNECT",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_from_request() {
        let req = InvocationRequest::new(1, "echo", "concat", vec![Value::Unit, Value::Unit]);
        assert_eq!(req.signature(), MethodSignature::new("concat", 2));
        assert_eq!(req.signature().to_string(), "concat/2");
        assert!(!req.one_way);
        assert!(req.one_way().one_way);
    }

    #[test]
    fn test_fault_messages() {
        let fault = Fault::UnknownMethod {
            object_id: ObjectId::from("echo"),
            method: "shout".into(),
            arity: 1,
        };
        assert_eq!(fault.to_string(), "Unknown method shout/1 on object echo");
    }
}
