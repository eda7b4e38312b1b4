//! Configuration-driven startup.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use common::echo_object;
use remote_space::bootstrap;
use remote_space::prelude::*;
use std::net::TcpListener as StdListener;
use std::sync::Arc;

fn free_port() -> u16 {
    let listener = StdListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

fn config(port: u16, workers: usize, compression: Option<CompressionKind>) -> RemoteConfig {
    RemoteConfig::default_with_overrides(|c| {
        c.server.host = "127.0.0.1".into();
        c.server.port = port;
        c.executor.workers = workers;
        c.transport.format = SerializationFormat::MessagePack;
        c.transport.compression = compression;
    })
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_launch_serves_registered_objects() {
    let config = config(free_port(), 4, Some(CompressionKind::Lz4));
    let deployment = bootstrap::launch(&config, |space| space.register("echo", echo_object()))
        .await
        .unwrap();
    assert_eq!(deployment.local_addr().port(), config.server.port);
    assert!(deployment.space().executor().is_some());

    let client = Client::connect(
        deployment.local_addr(),
        Arc::new(FormatSerialization::new(SerializationFormat::MessagePack)),
        Arc::new(CompressedStreams::new(CompressionKind::Lz4)),
    )
    .await
    .unwrap();
    let out = client
        .invoke("echo", "concat", vec!["foo".into(), "bar".into()])
        .await
        .unwrap();
    assert_eq!(out, Ok(Value::from("foobar")));

    // space and server share one set of counters
    let metrics = deployment.server().metrics();
    assert_eq!(metrics.snapshot().invocations_total, 1);

    deployment.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_launch_surfaces_bind_error() {
    let occupied = StdListener::bind("127.0.0.1:0").unwrap();
    let port = occupied.local_addr().unwrap().port();

    let result = bootstrap::launch(&config(port, 0, None), |_| Ok(())).await;
    assert!(matches!(result, Err(RemoteError::Bind { .. })));
}

#[tokio::test]
async fn test_launch_rejects_invalid_config() {
    let result = bootstrap::launch(&config(0, 0, None), |_| Ok(())).await;
    assert!(matches!(result, Err(RemoteError::ConfigError(_))));
}

#[tokio::test]
async fn test_launch_propagates_registration_failure() {
    let result = bootstrap::launch(&config(free_port(), 0, None), |space| {
        space.register("echo", echo_object())?;
        space.register("echo", echo_object())
    })
    .await;
    assert!(matches!(result, Err(RemoteError::DuplicateRegistration(_))));
}
