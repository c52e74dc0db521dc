use std::error::Error;
use std::sync::LazyLock;

use tokio::runtime::Runtime;
use tokio::sync::{Mutex, MutexGuard};

use db::DbConfig;

static TEST_LOCK: LazyLock<Mutex<()>> = LazyLock::new(|| Mutex::new(()));

/// Each `#[tokio::test]` gets its own runtime, but the database connection is
/// a process-wide global whose background task lives on the runtime that
/// created it. Connect on a runtime that outlives every test.
static DB_RUNTIME: LazyLock<Runtime> = LazyLock::new(|| {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("failed to build database test runtime")
});

pub async fn setup_db() -> Result<MutexGuard<'static, ()>, Box<dyn Error>> {
    let guard = TEST_LOCK.lock().await;
    DB_RUNTIME.spawn(db::init(DbConfig::memory())).await??;
    let db_conn = db::get_db()?;
    db_conn
        .query("DELETE broker_message; DELETE broker_queue;")
        .await?;
    Ok(guard)
}
