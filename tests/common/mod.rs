//! Shared fixtures for the integration tests.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use remote_space::prelude::*;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub fn echo_object() -> MethodTable {
    MethodTable::new("echo")
        .method("concat", 2, |args| {
            Ok(format!("{}{}", args.str(0)?, args.str(1)?))
        })
        .method("len", 1, |args| Ok(args.str(0)?.len() as i64))
        .method("explode", 0, |_| -> std::result::Result<Value, InvocationError> {
            panic!("explode called")
        })
}

pub fn echo_space() -> ObjectSpace {
    let space = ObjectSpace::new();
    space.register("echo", echo_object()).unwrap();
    space
}

pub fn local_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        shutdown_timeout: Duration::from_secs(2),
        ..ServerConfig::default()
    }
}

/// Bincode, no compression, on a free local port.
pub async fn serve(space: &ObjectSpace) -> (Server, SocketAddr) {
    serve_with(space, local_config(), Arc::new(PlainStreams::default())).await
}

pub async fn serve_with(
    space: &ObjectSpace,
    config: ServerConfig,
    streams: Arc<dyn StreamProvider>,
) -> (Server, SocketAddr) {
    let server = Server::new(config, Arc::new(FormatSerialization::default()), streams);
    server.add_observer(Arc::new(space.clone()));
    server.start().unwrap();
    let addr = server.bind(0).await.unwrap();
    (server, addr)
}

pub async fn connect(addr: SocketAddr) -> Client {
    Client::connect(
        addr,
        Arc::new(FormatSerialization::default()),
        Arc::new(PlainStreams::default()),
    )
    .await
    .expect("client should connect")
}

/// Poll `condition` until it holds or `within` elapses.
pub async fn wait_until<F>(within: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = Instant::now() + within;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
