use crate::protocol::message::Message;
use crate::transport::connection::Connection;
use async_trait::async_trait;
use std::sync::Arc;

/// Lifecycle hook registered on a [`Server`](crate::transport::server::Server).
///
/// For each accepted socket the server calls `connected` exactly once, after
/// the connection is built and before its first frame is read; then
/// `received` for every inbound request or response in arrival order; then
/// `disconnected` exactly once, after the read loop has ended. Ping, pong
/// and disconnect notices are handled by the server and never reach
/// observers.
#[async_trait]
pub trait ConnectionObserver: Send + Sync + 'static {
    async fn connected(&self, _connection: &Arc<Connection>) {}

    async fn disconnected(&self, _connection: &Arc<Connection>) {}

    async fn received(&self, _connection: &Arc<Connection>, _message: Message) {}
}
