#![allow(dead_code)]

use std::error::Error;
use std::sync::LazyLock;
use std::time::Duration;

use actors::EmailPipeline;
use calendar_core::{PipelineStats, QueueConfig};
use tokio::sync::{Mutex, MutexGuard};

use db::{DbConfig, DbError};

static TEST_LOCK: LazyLock<Mutex<()>> = LazyLock::new(|| Mutex::new(()));

pub async fn setup_db() -> Result<MutexGuard<'static, ()>, DbError> {
    let guard = TEST_LOCK.lock().await;
    db::init(DbConfig::memory()).await?;
    let db_conn = db::get_db()?;
    db_conn
        .query("DELETE broker_message; DELETE broker_queue;")
        .await?;
    Ok(guard)
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .try_init();
}

/// Fast timings so retries finish within a test.
pub fn fast_config() -> QueueConfig {
    QueueConfig::default()
        .with_retry_delay(Duration::from_millis(10))
        .with_poll_interval(Duration::from_millis(10))
}

/// Poll the pipeline's totals until `done` holds, failing after five seconds.
pub async fn wait_for_stats<F>(
    pipeline: &EmailPipeline,
    done: F,
) -> Result<PipelineStats, Box<dyn Error>>
where
    F: Fn(&PipelineStats) -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let stats = pipeline.stats().await?;
        if done(&stats) {
            return Ok(stats);
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(format!("timed out waiting for pipeline, last stats: {:?}", stats).into());
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
