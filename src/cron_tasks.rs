use crate::Config;
use crate::database::postgres_repository::PostgresRepository;
use crate::database::session::SessionRepository;
use crate::db::init_pool;
use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Copy)]
pub struct SweepResult {
    pub sessions_removed: u64,
    pub cutoff: DateTime<Utc>,
}

pub async fn sweep_stale_sessions(config: &Config) -> Result<SweepResult, String> {
    let pool = init_pool(&config.database)
        .await
        .map_err(|err| format!("Failed to initialize database pool: {err}"))?;

    let repo = PostgresRepository { pool: pool.clone() };
    let cutoff = Utc::now() - config.session.stale_after();
    let sessions_removed = repo
        .delete_stale_sessions(cutoff)
        .await
        .map_err(|err| format!("Failed to sweep stale sessions: {err:?}"))?;

    pool.close().await;

    Ok(SweepResult { sessions_removed, cutoff })
}
