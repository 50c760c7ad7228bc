use std::path::Path;

use anyhow::Result;
use chrono::{DateTime, Utc};
use tokio_rusqlite::{rusqlite, Connection};

pub mod destinations;
pub mod servers;
pub mod streams;
pub mod task_logs;
pub mod tasks;

pub async fn init(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path).await?;
    apply_schema(&conn).await?;
    Ok(conn)
}

/// In-memory database for tests and simulation runs.
pub async fn init_in_memory() -> Result<Connection> {
    let conn = Connection::open(":memory:").await?;
    apply_schema(&conn).await?;
    Ok(conn)
}

async fn apply_schema(conn: &Connection) -> Result<()> {
    conn.call(|conn| {
        let schema = include_str!("schema.sql");
        conn.execute_batch(schema)?;

        // Enable foreign keys (SQLite disables them by default!)
        conn.execute("PRAGMA foreign_keys = ON;", [])?;

        Ok::<(), rusqlite::Error>(())
    })
    .await?;

    Ok(())
}

pub(crate) fn fmt_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339()
}

pub(crate) fn parse_ts(raw: &str) -> Result<DateTime<Utc>, rusqlite::Error> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| bad_column(format!("invalid timestamp '{raw}': {e}")))
}

pub(crate) fn parse_opt_ts(
    raw: Option<String>,
) -> Result<Option<DateTime<Utc>>, rusqlite::Error> {
    raw.as_deref().map(parse_ts).transpose()
}

/// Map a domain-level decode failure into a rusqlite conversion error so it
/// can surface from a row-mapping closure.
pub(crate) fn bad_column(message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        0,
        rusqlite::types::Type::Text,
        message.into(),
    )
}


#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn schema_applies_cleanly() {
        let conn = init_in_memory().await.unwrap();
        let count: i64 = conn
            .call(|c| {
                c.query_row("SELECT COUNT(*) FROM backup_tasks", [], |row| row.get(0))
            })
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn timestamps_round_trip() {
        let now = Utc::now();
        let parsed = parse_ts(&fmt_ts(now)).unwrap();
        assert_eq!(parsed, now);
        assert!(parse_ts("not-a-timestamp").is_err());
        assert_eq!(parse_opt_ts(None).unwrap(), None);
    }
}
