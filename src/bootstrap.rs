//! # Bootstrap
//!
//! Wires a server from configuration: codec, stream provider, worker pool,
//! object space. Objects are registered before the space sees any traffic.
//!
//! ```no_run
//! use remote_space::bootstrap;
//! use remote_space::config::RemoteConfig;
//! use remote_space::service::object::MethodTable;
//!
//! # async fn run() -> remote_space::error::Result<()> {
//! let config = RemoteConfig::from_env()?;
//! let deployment = bootstrap::launch(&config, |space| {
//!     space.register(
//!         "echo",
//!         MethodTable::new("echo").method("concat", 2, |args| {
//!             Ok(format!("{}{}", args.str(0)?, args.str(1)?))
//!         }),
//!     )
//! })
//! .await?;
//!
//! // ... serve until asked to stop
//! deployment.shutdown().await?;
//! # Ok(())
//! # }
//! ```

use crate::config::RemoteConfig;
use crate::core::serialization::FormatSerialization;
use crate::error::Result;
use crate::service::executor::WorkerPool;
use crate::service::object_space::ObjectSpace;
use crate::transport::server::Server;
use crate::transport::stream;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};

/// A running server with its object space.
pub struct Deployment {
    server: Server,
    space: ObjectSpace,
    executor: Option<Arc<WorkerPool>>,
    local_addr: SocketAddr,
    shutdown_timeout: Duration,
}

impl Deployment {
    pub fn server(&self) -> &Server {
        &self.server
    }

    pub fn space(&self) -> &ObjectSpace {
        &self.space
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting, close every connection, then drain the worker pool.
    pub async fn shutdown(self) -> Result<()> {
        self.server.stop().await?;
        if let Some(executor) = &self.executor {
            if !executor.shutdown(self.shutdown_timeout).await {
                warn!("Invocations still running after shutdown timeout");
            }
        }
        Ok(())
    }
}

/// Validate `config`, build every collaborator, let `register` expose
/// objects, then start and bind.
///
/// Bind failures surface here unchanged.
#[instrument(skip_all, fields(port = config.server.port))]
pub async fn launch<F>(config: &RemoteConfig, register: F) -> Result<Deployment>
where
    F: FnOnce(&ObjectSpace) -> Result<()>,
{
    config.validate_strict()?;

    let serialization = Arc::new(FormatSerialization::new(config.transport.format));
    let streams = stream::from_config(&config.server, &config.transport);
    let executor = match config.executor.workers {
        0 => None,
        workers => Some(Arc::new(WorkerPool::new(workers))),
    };

    let server = Server::new(config.server.clone(), serialization, streams)
        .with_max_payload(config.transport.max_payload_size);
    let space = ObjectSpace::from_parts(executor.clone(), server.metrics());
    register(&space)?;

    server.start()?;
    server.add_observer(Arc::new(space.clone()));
    let local_addr = server.bind(config.server.port).await?;

    info!(
        objects = space.object_ids().len(),
        workers = config.executor.workers,
        format = config.transport.format.name(),
        "Remote object space ready"
    );

    Ok(Deployment {
        server,
        space,
        executor,
        local_addr,
        shutdown_timeout: config.server.shutdown_timeout,
    })
}
