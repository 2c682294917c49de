//! Database metrics.

use metrics::{gauge, histogram};
use sqlx::PgPool;
use std::time::Instant;

/// Times one query and records it as `db_query_duration_seconds{query}`.
///
/// ```ignore
/// let timer = QueryTimer::new("find_export_by_id");
/// let result = sqlx::query_as::<_, ExportRecordEntity>(...).fetch_optional(&pool).await;
/// timer.record();
/// ```
pub struct QueryTimer {
    query: String,
    started: Instant,
}

impl QueryTimer {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            started: Instant::now(),
        }
    }

    pub fn record(self) {
        histogram!("db_query_duration_seconds", "query" => self.query)
            .record(self.started.elapsed().as_secs_f64());
    }
}

/// Publishes pool occupancy as `db_pool_connections{state}`.
pub fn record_pool_metrics(pool: &PgPool) {
    let size = pool.size() as usize;
    let idle = pool.num_idle();

    gauge!("db_pool_connections", "state" => "active").set(size.saturating_sub(idle) as f64);
    gauge!("db_pool_connections", "state" => "idle").set(idle as f64);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_timer_accepts_owned_and_borrowed_names() {
        assert_eq!(QueryTimer::new("find_export_by_id").query, "find_export_by_id");
        assert_eq!(QueryTimer::new(String::from("chart_summary")).query, "chart_summary");
    }

    #[test]
    fn test_record_without_recorder_is_noop() {
        QueryTimer::new("noop").record();
    }
}
