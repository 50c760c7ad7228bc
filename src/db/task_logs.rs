use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use tokio_rusqlite::{params, rusqlite, Connection};
use uuid::Uuid;

use crate::core::models::BackupTaskLog;
use crate::db::{fmt_ts, parse_opt_ts, parse_ts};

/// Open a log row for a run that is starting. Returns the new log id.
pub async fn create(conn: &Connection, task_id: String, started_at: DateTime<Utc>) -> Result<String> {
    let log_id = Uuid::now_v7().to_string();
    let id = log_id.clone();

    conn.call(move |c| {
        c.execute(
            "INSERT INTO backup_task_logs (id, task_id, started_at)
             VALUES (?1, ?2, ?3)",
            params![id, task_id, fmt_ts(started_at)],
        )?;
        Ok::<(), rusqlite::Error>(())
    })
    .await?;

    Ok(log_id)
}

/// Write the captured output and outcome. A log is finalized exactly once;
/// `successful_at` stays NULL for failed runs.
pub async fn finalize(
    conn: &Connection,
    log_id: String,
    output: String,
    successful_at: Option<DateTime<Utc>>,
) -> Result<()> {
    conn.call(move |c| {
        c.execute(
            "UPDATE backup_task_logs SET output = ?2, successful_at = ?3
             WHERE id = ?1",
            params![log_id, output, successful_at.map(fmt_ts)],
        )?;
        Ok::<(), rusqlite::Error>(())
    })
    .await?;

    Ok(())
}

pub async fn get(conn: &Connection, log_id: String) -> Result<BackupTaskLog> {
    conn.call(move |c| {
        let mut stmt = c.prepare(
            "SELECT id, task_id, started_at, successful_at, output
             FROM backup_task_logs WHERE id = ?1",
        )?;
        stmt.query_row(params![log_id], row_to_log)
    })
    .await
    .map_err(|e| anyhow!("Failed to get backup task log: {}", e))
}

pub async fn list_for_task(conn: &Connection, task_id: String) -> Result<Vec<BackupTaskLog>> {
    conn.call(move |c| {
        let mut stmt = c.prepare(
            "SELECT id, task_id, started_at, successful_at, output
             FROM backup_task_logs WHERE task_id = ?1 ORDER BY started_at DESC",
        )?;
        let rows = stmt.query_map(params![task_id], row_to_log)?;
        rows.collect::<Result<Vec<_>, _>>()
    })
    .await
    .map_err(|e| anyhow!("Failed to list backup task logs: {}", e))
}

fn row_to_log(row: &rusqlite::Row<'_>) -> Result<BackupTaskLog, rusqlite::Error> {
    let started_raw: String = row.get(2)?;
    Ok(BackupTaskLog {
        id: row.get(0)?,
        task_id: row.get(1)?,
        started_at: parse_ts(&started_raw)?,
        successful_at: parse_opt_ts(row.get(3)?)?,
        output: row.get(4)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::db::tests_support::{seed_destination, seed_server, seed_task};

    #[tokio::test]
    async fn create_finalize_get_round_trip() {
        let conn = db::init_in_memory().await.unwrap();
        seed_server(&conn, "srv-1").await;
        seed_destination(&conn, "dest-1").await;
        seed_task(&conn, "task-1", "srv-1", "dest-1").await;

        let started = Utc::now();
        let log_id = create(&conn, "task-1".into(), started).await.unwrap();

        let open = get(&conn, log_id.clone()).await.unwrap();
        assert_eq!(open.successful_at, None);
        assert!(open.output.is_empty());

        let done = Utc::now();
        finalize(&conn, log_id.clone(), "archived 2 paths".into(), Some(done))
            .await
            .unwrap();

        let closed = get(&conn, log_id).await.unwrap();
        assert!(closed.succeeded());
        assert_eq!(closed.output, "archived 2 paths");
        assert_eq!(closed.started_at, started);
    }

    #[tokio::test]
    async fn failed_runs_keep_null_successful_at() {
        let conn = db::init_in_memory().await.unwrap();
        seed_server(&conn, "srv-1").await;
        seed_destination(&conn, "dest-1").await;
        seed_task(&conn, "task-1", "srv-1", "dest-1").await;

        let log_id = create(&conn, "task-1".into(), Utc::now()).await.unwrap();
        finalize(&conn, log_id.clone(), "connection failed".into(), None)
            .await
            .unwrap();

        let log = get(&conn, log_id).await.unwrap();
        assert!(!log.succeeded());
        assert_eq!(log.output, "connection failed");
    }
}
