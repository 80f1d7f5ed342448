//! Bootstrap utilities for tenantstore binaries.

use std::future::Future;
use std::time::Duration;

use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::LOG_ENV_VAR;

/// Initialize tracing with the TENANTSTORE_LOG environment variable.
///
/// Defaults to "info" level if TENANTSTORE_LOG is not set.
pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_env(LOG_ENV_VAR)
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Retry `connect` with exponential backoff until it succeeds or
/// `max_retries` attempts have failed.
///
/// Used at startup, when the database may still be coming up. Operations
/// after startup are never retried here.
pub async fn connect_with_retry<T, E, F, Fut>(
    target: &str,
    max_retries: u32,
    connect: F,
) -> Result<T, E>
where
    E: std::fmt::Display,
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    const INITIAL_DELAY: Duration = Duration::from_millis(100);
    const MAX_DELAY: Duration = Duration::from_secs(5);

    let max_retries = max_retries.max(1);
    let mut delay = INITIAL_DELAY;
    let mut attempt = 0;

    loop {
        attempt += 1;
        match connect().await {
            Ok(connected) => {
                info!(%target, attempt, "Connected");
                return Ok(connected);
            }
            Err(e) if attempt < max_retries => {
                warn!(
                    %target,
                    attempt,
                    max_retries,
                    error = %e,
                    retry_in = ?delay,
                    "Connection failed, retrying"
                );
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(MAX_DELAY);
            }
            Err(e) => {
                error!(%target, attempts = attempt, error = %e, "Giving up on connection");
                return Err(e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_connect_with_retry_succeeds_after_failures() {
        let attempts = AtomicU32::new(0);
        let result: Result<u32, String> = connect_with_retry("db", 5, || async {
            let n = attempts.fetch_add(1, Ordering::SeqCst) + 1;
            if n < 3 {
                Err(format!("refused {}", n))
            } else {
                Ok(n)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_with_retry_gives_up() {
        let attempts = AtomicU32::new(0);
        let result: Result<(), String> = connect_with_retry("db", 4, || async {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err("refused".to_string())
        })
        .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 4);
    }
}
