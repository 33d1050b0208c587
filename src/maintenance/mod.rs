use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration as TokioDuration};
use tracing::{error, info};

const SWEEP_INTERVAL_SECONDS: u64 = 3600;

/// Read notifications older than this are reaped
const READ_RETENTION_DAYS: i64 = 7;

/// Nothing survives past this age, read or not
const HARD_RETENTION_DAYS: i64 = 180;

#[derive(Debug, Default, PartialEq)]
pub struct SweepStats {
    pub expired: u64,
    pub read_stale: u64,
    pub over_age: u64,
}

/// Age cutoffs for a sweep pinned at `now`.
pub fn sweep_cutoffs(now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
    (
        now - Duration::days(READ_RETENTION_DAYS),
        now - Duration::days(HARD_RETENTION_DAYS),
    )
}

/// One idempotent reaping pass, computed as of `now`.
///
/// Best-effort hygiene: correctness never depends on this having run.
pub async fn sweep_notifications(pool: &PgPool, now: DateTime<Utc>) -> Result<SweepStats, sqlx::Error> {
    let (read_cutoff, hard_cutoff) = sweep_cutoffs(now);

    let expired = sqlx::query("DELETE FROM chat.notifications WHERE expires_at < $1")
        .bind(now)
        .execute(pool)
        .await?
        .rows_affected();

    let read_stale = sqlx::query(
        "DELETE FROM chat.notifications WHERE is_read = true AND created_at < $1",
    )
    .bind(read_cutoff)
    .execute(pool)
    .await?
    .rows_affected();

    let over_age = sqlx::query("DELETE FROM chat.notifications WHERE created_at < $1")
        .bind(hard_cutoff)
        .execute(pool)
        .await?
        .rows_affected();

    Ok(SweepStats {
        expired,
        read_stale,
        over_age,
    })
}

/// Spawn the hourly sweep loop, decoupled from request handling.
pub fn spawn_notification_sweeper(pool: PgPool) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(TokioDuration::from_secs(SWEEP_INTERVAL_SECONDS));
        loop {
            ticker.tick().await;
            match sweep_notifications(&pool, Utc::now()).await {
                Ok(stats) => {
                    if stats != SweepStats::default() {
                        info!(
                            "Notification sweep: {} expired, {} stale-read, {} over-age",
                            stats.expired, stats.read_stale, stats.over_age
                        );
                    }
                }
                Err(e) => error!("Notification sweep failed: {}", e),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sweep_cutoffs_are_relative_to_pinned_now() {
        let now = Utc::now();
        let (read_cutoff, hard_cutoff) = sweep_cutoffs(now);

        assert_eq!(now - read_cutoff, Duration::days(READ_RETENTION_DAYS));
        assert_eq!(now - hard_cutoff, Duration::days(HARD_RETENTION_DAYS));
        assert!(hard_cutoff < read_cutoff);
    }

    #[test]
    fn test_sweep_is_deterministic_for_a_pinned_now() {
        // Same pinned instant, same cutoffs: the pass is idempotent by
        // construction
        let now = Utc::now();
        assert_eq!(sweep_cutoffs(now), sweep_cutoffs(now));
    }
}
