use std::time::Duration;

use async_trait::async_trait;
use sqlx::PgPool;
use thiserror::Error;
use tracing::{info, warn};

/// Retry delays grow linearly with the attempt count but never past this.
const MAX_BACKOFF: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum ReadinessError {
    #[error("dependency not ready after {attempts} attempt(s), last error: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },
}

/// A dependency the service cannot run without, reduced to a binary
/// reachability check.
#[async_trait]
pub trait Dependency {
    async fn healthcheck(&self) -> anyhow::Result<()>;
}

pub struct PostgresDependency {
    pool: PgPool,
}

impl PostgresDependency {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Dependency for PostgresDependency {
    async fn healthcheck(&self) -> anyhow::Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

fn backoff(attempt: u32) -> Duration {
    Duration::from_secs(u64::from(attempt)).min(MAX_BACKOFF)
}

/// Poll `dependency` until it answers, sleeping between failed checks.
/// The first failed check counts as attempt 1; once the attempt counter
/// reaches `max_attempts` without a success the error is fatal and startup
/// must abort.
pub async fn wait_until_ready(
    dependency: &(dyn Dependency + Send + Sync),
    max_attempts: u32,
) -> Result<(), ReadinessError> {
    let mut attempt = 0u32;
    loop {
        match dependency.healthcheck().await {
            Ok(()) => {
                info!("dependency ready after {} check(s)", attempt + 1);
                return Ok(());
            }
            Err(err) => {
                attempt += 1;
                if attempt >= max_attempts {
                    return Err(ReadinessError::RetriesExhausted {
                        attempts: attempt,
                        last_error: err.to_string(),
                    });
                }
                let delay = backoff(attempt);
                warn!(
                    "dependency not ready (attempt {}/{}): {}; retrying in {:?}",
                    attempt, max_attempts, err, delay
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}
