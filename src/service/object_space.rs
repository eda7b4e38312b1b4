//! # Object Space
//!
//! Registry of exposed objects and router for invocation requests.
//!
//! A connection must be bound with [`ObjectSpace::add_connection`] before
//! its requests are served; the space implements
//! [`ConnectionObserver`] so attaching it to a server does this
//! automatically. Unbinding with [`ObjectSpace::remove_connection`] makes
//! every later or in-flight response for that connection disappear.
//!
//! ```rust
//! use remote_space::prelude::*;
//!
//! let space = ObjectSpace::new();
//! space
//!     .register("echo", MethodTable::new("echo").method("concat", 2, |args| {
//!         Ok(format!("{}{}", args.str(0)?, args.str(1)?))
//!     }))
//!     .unwrap();
//!
//! let request = InvocationRequest::new(1, "echo", "concat", vec!["foo".into(), "bar".into()]);
//! let response = space.invoke(&request);
//! assert_eq!(response.result, Ok(Value::from("foobar")));
//! ```

use crate::error::constants::{
    ERR_BINDINGS_LOCK, ERR_METHOD_PANICKED, ERR_REGISTRY_READ_LOCK, ERR_REGISTRY_WRITE_LOCK,
    ERR_RESULT_TOO_DEEP, ERR_WORKER_FAILED,
};
use crate::error::{RemoteError, Result};
use crate::protocol::message::{Fault, InvocationRequest, InvocationResponse, Message, ObjectId};
use crate::protocol::value::MAX_DEPTH;
use crate::service::executor::WorkerPool;
use crate::service::object::RemoteObject;
use crate::transport::connection::{Connection, ConnectionId};
use crate::transport::observer::ConnectionObserver;
use crate::utils::metrics::{Metrics, Timer};
use async_trait::async_trait;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, RwLock, Weak};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

type ObjectRef = Arc<dyn RemoteObject>;

/// A bound connection. The space never keeps a connection alive; `live` is
/// cancelled when the binding is removed.
struct Binding {
    connection: Weak<Connection>,
    live: CancellationToken,
}

struct SpaceInner {
    objects: RwLock<HashMap<ObjectId, ObjectRef>>,
    bindings: Mutex<HashMap<ConnectionId, Binding>>,
    executor: Option<Arc<WorkerPool>>,
    metrics: Arc<Metrics>,
}

/// Invocation registry. Clones share the same registry.
#[derive(Clone)]
pub struct ObjectSpace {
    inner: Arc<SpaceInner>,
}

impl Default for ObjectSpace {
    fn default() -> Self {
        Self::new()
    }
}

impl ObjectSpace {
    /// Space that runs invocations on the read loop that decoded them.
    pub fn new() -> Self {
        Self::from_parts(None, Arc::new(Metrics::new()))
    }

    /// Space that runs each invocation as its own job on `executor`.
    pub fn with_executor(executor: Arc<WorkerPool>) -> Self {
        Self::from_parts(Some(executor), Arc::new(Metrics::new()))
    }

    pub fn from_parts(executor: Option<Arc<WorkerPool>>, metrics: Arc<Metrics>) -> Self {
        Self {
            inner: Arc::new(SpaceInner {
                objects: RwLock::new(HashMap::new()),
                bindings: Mutex::new(HashMap::new()),
                executor,
                metrics,
            }),
        }
    }

    /// Expose `object` under `object_id`. The first registration of an id
    /// wins; later attempts fail and leave it in place.
    pub fn register(
        &self,
        object_id: impl Into<ObjectId>,
        object: impl RemoteObject,
    ) -> Result<()> {
        self.register_shared(object_id, Arc::new(object))
    }

    pub fn register_shared(&self, object_id: impl Into<ObjectId>, object: ObjectRef) -> Result<()> {
        let object_id = object_id.into();
        let mut objects = self
            .inner
            .objects
            .write()
            .map_err(|_| RemoteError::LockPoisoned(ERR_REGISTRY_WRITE_LOCK))?;

        if objects.contains_key(&object_id) {
            warn!(object = %object_id, "Object already registered");
            return Err(RemoteError::DuplicateRegistration(object_id));
        }
        info!(object = %object_id, "Registered remote object");
        objects.insert(object_id, object);
        Ok(())
    }

    /// Stop exposing `object_id`. Returns whether it was registered.
    pub fn deregister(&self, object_id: &str) -> Result<bool> {
        let mut objects = self
            .inner
            .objects
            .write()
            .map_err(|_| RemoteError::LockPoisoned(ERR_REGISTRY_WRITE_LOCK))?;
        let removed = objects.remove(object_id).is_some();
        if removed {
            info!(object = object_id, "Deregistered remote object");
        }
        Ok(removed)
    }

    pub fn is_registered(&self, object_id: &str) -> bool {
        self.inner
            .objects
            .read()
            .map(|objects| objects.contains_key(object_id))
            .unwrap_or(false)
    }

    /// Registered ids, sorted
    pub fn object_ids(&self) -> Vec<ObjectId> {
        let mut ids: Vec<ObjectId> = self
            .inner
            .objects
            .read()
            .map(|objects| objects.keys().cloned().collect())
            .unwrap_or_default();
        ids.sort();
        ids
    }

    /// Start serving requests from `connection`. Binding an already bound
    /// connection is a no-op.
    pub fn add_connection(&self, connection: &Arc<Connection>) -> Result<()> {
        let mut bindings = self.lock_bindings()?;
        bindings.entry(connection.id()).or_insert_with(|| {
            debug!(connection = %connection.id(), "Connection bound to object space");
            Binding {
                connection: Arc::downgrade(connection),
                live: CancellationToken::new(),
            }
        });
        Ok(())
    }

    /// Stop serving `connection`.
    ///
    /// Once this returns no response will be written to the connection by
    /// this space, including responses from invocations still running.
    pub async fn remove_connection(&self, connection: &Connection) -> Result<()> {
        let binding = self.lock_bindings()?.remove(&connection.id());
        if let Some(binding) = binding {
            binding.live.cancel();
            // A response already holding the write lock either lands or is
            // abandoned; every later one sees the cancelled binding.
            connection.write_barrier().await;
            debug!(connection = %connection.id(), "Connection unbound from object space");
        }
        Ok(())
    }

    pub fn is_bound(&self, id: ConnectionId) -> bool {
        self.lock_bindings()
            .map(|bindings| bindings.contains_key(&id))
            .unwrap_or(false)
    }

    pub fn connection_count(&self) -> usize {
        self.lock_bindings().map(|b| b.len()).unwrap_or(0)
    }

    pub fn metrics(&self) -> Arc<Metrics> {
        self.inner.metrics.clone()
    }

    pub fn executor(&self) -> Option<&Arc<WorkerPool>> {
        self.inner.executor.as_ref()
    }

    /// Resolve and run one request without touching the network.
    ///
    /// Every outcome is a response: unknown objects and methods become
    /// faults, and so do method errors and panics.
    pub fn invoke(&self, request: &InvocationRequest) -> InvocationResponse {
        let _timer = Timer::start("invoke");
        let object = match self.lookup(&request.object_id) {
            Ok(Some(object)) => object,
            Ok(None) => {
                return InvocationResponse::fault(
                    request.request_id,
                    Fault::UnknownObject {
                        object_id: request.object_id.clone(),
                    },
                )
            }
            Err(e) => {
                error!(error = %e, "Object lookup failed");
                return InvocationResponse::fault(
                    request.request_id,
                    Fault::Invocation {
                        message: e.to_string(),
                    },
                );
            }
        };

        let signature = request.signature();
        if !object.resolve(&signature) {
            return InvocationResponse::fault(
                request.request_id,
                Fault::UnknownMethod {
                    object_id: request.object_id.clone(),
                    method: signature.name,
                    arity: signature.arity,
                },
            );
        }

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            object.invoke(&signature, &request.args)
        }));
        match outcome {
            // peers refuse anything deeper, so never put it on the wire
            Ok(Ok(value)) if value.depth() > MAX_DEPTH => {
                warn!(object = %request.object_id, method = %signature, "Return value nested too deeply");
                InvocationResponse::fault(
                    request.request_id,
                    Fault::Invocation {
                        message: ERR_RESULT_TOO_DEEP.to_string(),
                    },
                )
            }
            Ok(Ok(value)) => InvocationResponse::ok(request.request_id, value),
            Ok(Err(e)) => {
                debug!(object = %request.object_id, method = %signature, error = %e, "Invocation failed");
                InvocationResponse::fault(
                    request.request_id,
                    Fault::Invocation {
                        message: e.to_string(),
                    },
                )
            }
            Err(_) => {
                warn!(object = %request.object_id, method = %signature, "Remote method panicked");
                InvocationResponse::fault(
                    request.request_id,
                    Fault::Invocation {
                        message: ERR_METHOD_PANICKED.to_string(),
                    },
                )
            }
        }
    }

    /// Serve a request that arrived on `connection` and route the response
    /// back to it.
    ///
    /// Without an executor this completes the invocation and the write
    /// before returning. With one, it returns once the job is queued and
    /// waits for a free worker first. Requests from unbound connections are
    /// dropped.
    pub async fn dispatch(
        &self,
        connection: &Arc<Connection>,
        request: InvocationRequest,
    ) -> Result<()> {
        let live = match self.binding_token(connection.id())? {
            Some(live) => live,
            None => {
                debug!(connection = %connection.id(), "Ignoring request from unbound connection");
                return Ok(());
            }
        };

        match &self.inner.executor {
            None => {
                let response = self.invoke(&request);
                self.deliver(connection, &live, &request, response).await
            }
            Some(executor) => {
                let space = self.clone();
                let job_space = self.clone();
                let weak = Arc::downgrade(connection);
                let job_request = request.clone();

                executor
                    .submit(
                        move || job_space.invoke(&job_request),
                        move |outcome| async move {
                            let response = outcome.unwrap_or_else(|e| {
                                error!(error = %e, "Invocation worker failed");
                                InvocationResponse::fault(
                                    request.request_id,
                                    Fault::Invocation {
                                        message: ERR_WORKER_FAILED.to_string(),
                                    },
                                )
                            });
                            let Some(connection) = weak.upgrade() else {
                                space.inner.metrics.response_discarded();
                                return;
                            };
                            if let Err(e) = space.deliver(&connection, &live, &request, response).await {
                                debug!(connection = %connection.id(), error = %e, "Failed to deliver response");
                            }
                        },
                    )
                    .await
            }
        }
    }

    async fn deliver(
        &self,
        connection: &Connection,
        live: &CancellationToken,
        request: &InvocationRequest,
        response: InvocationResponse,
    ) -> Result<()> {
        let metrics = &self.inner.metrics;
        metrics.invocation(response.is_fault());

        if live.is_cancelled() {
            metrics.response_discarded();
            return Ok(());
        }
        if !response.is_fault() {
            connection.record_object(&request.object_id);
        }

        if request.one_way {
            if let Err(fault) = &response.result {
                warn!(connection = %connection.id(), %fault, "One-way invocation faulted");
            }
            return Ok(());
        }

        if connection.send_while(live, &Message::Response(response)).await? {
            Ok(())
        } else {
            metrics.response_discarded();
            debug!(connection = %connection.id(), "Discarded response for unbound connection");
            Ok(())
        }
    }

    fn lookup(&self, object_id: &ObjectId) -> Result<Option<ObjectRef>> {
        let objects = self
            .inner
            .objects
            .read()
            .map_err(|_| RemoteError::LockPoisoned(ERR_REGISTRY_READ_LOCK))?;
        Ok(objects.get(object_id).cloned())
    }

    fn binding_token(&self, id: ConnectionId) -> Result<Option<CancellationToken>> {
        let bindings = self.lock_bindings()?;
        Ok(bindings
            .get(&id)
            .filter(|binding| binding.connection.strong_count() > 0)
            .map(|binding| binding.live.clone()))
    }

    fn lock_bindings(&self) -> Result<std::sync::MutexGuard<'_, HashMap<ConnectionId, Binding>>> {
        self.inner
            .bindings
            .lock()
            .map_err(|_| RemoteError::LockPoisoned(ERR_BINDINGS_LOCK))
    }
}

#[async_trait]
impl ConnectionObserver for ObjectSpace {
    async fn connected(&self, connection: &Arc<Connection>) {
        if let Err(e) = self.add_connection(connection) {
            error!(connection = %connection.id(), error = %e, "Failed to bind connection");
        }
    }

    async fn disconnected(&self, connection: &Arc<Connection>) {
        if let Err(e) = self.remove_connection(connection).await {
            error!(connection = %connection.id(), error = %e, "Failed to unbind connection");
        }
    }

    async fn received(&self, connection: &Arc<Connection>, message: Message) {
        match message {
            Message::Request(request) => {
                if let Err(e) = self.dispatch(connection, request).await {
                    warn!(connection = %connection.id(), error = %e, "Dispatch failed");
                }
            }
            other => {
                debug!(connection = %connection.id(), kind = other.kind(), "Ignoring message");
            }
        }
    }
}

impl std::fmt::Debug for ObjectSpace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectSpace")
            .field("objects", &self.object_ids())
            .field("connections", &self.connection_count())
            .field("executor", &self.inner.executor.as_ref().map(|e| e.workers()))
            .finish()
    }
}
