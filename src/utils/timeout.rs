use crate::error::{RemoteError, Result};
use std::future::Future;
use std::time::Duration;

/// Default timeout for client calls and connection idleness
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default maximum time a connection may stay silent before it is closed
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Longest a single frame may take to reach the socket before the
/// connection is given up on
pub const WRITE_TIMEOUT: Duration = Duration::from_secs(30);

/// How long `stop()` waits for connection tasks to wind down
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Run a future with a deadline, mapping expiry to `RemoteError::Timeout`.
pub async fn with_timeout_error<F, T>(future: F, duration: Duration) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(duration, future).await {
        Ok(result) => result,
        Err(_) => Err(RemoteError::Timeout),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_timeout_elapses() {
        let slow = async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(())
        };
        let result = with_timeout_error(slow, Duration::from_millis(20)).await;
        assert!(matches!(result, Err(RemoteError::Timeout)));
    }

    #[tokio::test]
    async fn test_inner_error_passes_through() {
        let failing = async { Err::<(), _>(RemoteError::ConnectionClosed) };
        let result = with_timeout_error(failing, Duration::from_secs(1)).await;
        assert!(matches!(result, Err(RemoteError::ConnectionClosed)));
    }
}
