//! Readiness poll for the database.
//!
//! The database container usually starts after the application container, so the service
//! probes the PostgreSQL port with a plain TCP connect and sleeps a fixed interval between
//! failed probes. There is no backoff: the interval never grows.

use log::{debug, info, warn};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_retry::strategy::FixedInterval;
use tokio_retry::Retry;

const MIN_CONNECT_TIMEOUT: Duration = Duration::from_secs(1);

/// Block until `host:port` accepts a TCP connection.
///
/// # Arguments
/// - `host`: The database host, such as `db` inside docker compose.
/// - `port`: The database port.
/// - `interval`: The fixed sleep between two failed probes.
/// - `max_attempts`: `None` polls forever, `Some(n)` gives up after `n` failed probes.
///   The first probe always runs, so `Some(0)` behaves like `Some(1)`.
///
/// # Returns
/// The number of probes it took for the database to answer.
pub async fn wait_for_db(
    host: &str,
    port: u16,
    interval: Duration,
    max_attempts: Option<usize>,
) -> Result<usize, anyhow::Error> {
    let address = format!("{}:{}", host, port);
    let attempts = AtomicUsize::new(0);
    let connect_timeout = connect_timeout_for(interval);

    // The first probe runs immediately, each element of the strategy is one more retry.
    let strategy: Box<dyn Iterator<Item = Duration> + Send> = match max_attempts {
        Some(n) => Box::new(FixedInterval::new(interval).take(n.saturating_sub(1))),
        None => Box::new(FixedInterval::new(interval)),
    };

    info!("Waiting for the database at {}.", address);
    let result = {
        let address = address.as_str();
        let attempts = &attempts;
        Retry::spawn(strategy, move || probe(address, connect_timeout, attempts)).await
    };

    let used = attempts.load(Ordering::SeqCst);
    match result {
        Ok(()) => {
            info!("The database at {} is ready after {} attempt(s).", address, used);
            Ok(used)
        }
        Err(e) => Err(anyhow::anyhow!(
            "The database at {} is still unavailable after {} attempts: {}",
            address,
            used,
            e
        )),
    }
}

/// The probe timeout: the retry interval, but at least one second.
fn connect_timeout_for(interval: Duration) -> Duration {
    interval.max(MIN_CONNECT_TIMEOUT)
}

async fn probe(
    address: &str,
    connect_timeout: Duration,
    attempts: &AtomicUsize,
) -> Result<(), anyhow::Error> {
    let attempt = attempts.fetch_add(1, Ordering::SeqCst) + 1;
    debug!("Probing {} (attempt {}).", address, attempt);

    match tokio::time::timeout(connect_timeout, TcpStream::connect(address)).await {
        Ok(Ok(_stream)) => Ok(()),
        Ok(Err(e)) => {
            warn!("Postgres is unavailable ({}), sleeping.", e);
            Err(e.into())
        }
        Err(_) => {
            warn!("Postgres did not answer within {:?}, sleeping.", connect_timeout);
            Err(anyhow::anyhow!("connect timed out"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    async fn free_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    }

    #[tokio::test]
    async fn test_wait_for_db_when_ready() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let attempts = wait_for_db("127.0.0.1", port, Duration::from_millis(10), Some(3))
            .await
            .unwrap();
        assert_eq!(attempts, 1);
    }

    #[tokio::test]
    async fn test_wait_for_db_gives_up_after_max_attempts() {
        let port = free_port().await;

        let err = wait_for_db("127.0.0.1", port, Duration::from_millis(10), Some(3))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("after 3 attempts"), "{}", err);
    }

    #[test]
    fn test_connect_timeout_has_a_floor() {
        assert_eq!(connect_timeout_for(Duration::from_millis(10)), MIN_CONNECT_TIMEOUT);
        assert_eq!(
            connect_timeout_for(Duration::from_secs(5)),
            Duration::from_secs(5)
        );
    }

    #[tokio::test]
    async fn test_wait_for_db_with_zero_attempts_still_probes_once() {
        let port = free_port().await;

        let err = wait_for_db("127.0.0.1", port, Duration::from_millis(10), Some(0))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("after 1 attempts"), "{}", err);
    }

    #[tokio::test]
    async fn test_wait_for_db_blocks_until_listener_is_up() {
        let port = free_port().await;

        let server = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(150)).await;
            let listener = TcpListener::bind(("127.0.0.1", port)).await.unwrap();
            // Keep the listener alive long enough for the probe to connect.
            let _ = listener.accept().await;
        });

        let attempts = wait_for_db("127.0.0.1", port, Duration::from_millis(20), None)
            .await
            .unwrap();
        assert!(attempts > 1);
        server.await.unwrap();
    }
}
