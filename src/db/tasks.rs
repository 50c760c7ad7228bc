use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use tokio_rusqlite::{params, rusqlite, Connection};

use crate::core::models::{BackupTask, Frequency, TaskKind};
use crate::db::{bad_column, fmt_ts, parse_opt_ts};

pub async fn create(conn: &Connection, task: &BackupTask) -> Result<()> {
    let task = task.clone();
    let source_paths = serde_json::to_string(&task.source_paths)?;
    let exclude_patterns = serde_json::to_string(&task.exclude_patterns)?;

    conn.call(move |c| {
        c.execute(
            "INSERT INTO backup_tasks
                (id, owner, label, remote_server_id, destination_id, kind,
                 source_paths, exclude_patterns, database_name, time_to_run,
                 frequency, paused)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                &task.id,
                &task.owner,
                &task.label,
                &task.remote_server_id,
                &task.destination_id,
                task.kind.as_str(),
                &source_paths,
                &exclude_patterns,
                &task.database_name,
                &task.time_to_run,
                task.frequency.as_str(),
                task.paused,
            ],
        )?;
        Ok::<(), rusqlite::Error>(())
    })
    .await?;

    Ok(())
}

pub async fn get(conn: &Connection, task_id: String) -> Result<BackupTask> {
    conn.call(move |c| {
        let mut stmt = c.prepare(
            "SELECT id, owner, label, remote_server_id, destination_id, kind,
                    source_paths, exclude_patterns, database_name, time_to_run,
                    frequency, paused, last_run_at, last_finished_at, last_status
             FROM backup_tasks WHERE id = ?1",
        )?;
        stmt.query_row(params![task_id], row_to_task)
    })
    .await
    .map_err(|e| anyhow!("Failed to get backup task: {}", e))
}

/// All tasks that are not paused, for the scheduler's due filter.
pub async fn list_unpaused(conn: &Connection) -> Result<Vec<BackupTask>> {
    conn.call(|c| {
        let mut stmt = c.prepare(
            "SELECT id, owner, label, remote_server_id, destination_id, kind,
                    source_paths, exclude_patterns, database_name, time_to_run,
                    frequency, paused, last_run_at, last_finished_at, last_status
             FROM backup_tasks WHERE paused = 0 ORDER BY time_to_run",
        )?;
        let rows = stmt.query_map([], row_to_task)?;
        rows.collect::<Result<Vec<_>, _>>()
    })
    .await
    .map_err(|e| anyhow!("Failed to list backup tasks: {}", e))
}

pub async fn record_run_started(
    conn: &Connection,
    task_id: String,
    at: DateTime<Utc>,
) -> Result<()> {
    conn.call(move |c| {
        c.execute(
            "UPDATE backup_tasks SET last_run_at = ?2, last_status = 'running'
             WHERE id = ?1",
            params![task_id, fmt_ts(at)],
        )?;
        Ok::<(), rusqlite::Error>(())
    })
    .await?;

    Ok(())
}

pub async fn record_run_finished(
    conn: &Connection,
    task_id: String,
    status: String,
    at: DateTime<Utc>,
) -> Result<()> {
    conn.call(move |c| {
        c.execute(
            "UPDATE backup_tasks SET last_finished_at = ?2, last_status = ?3
             WHERE id = ?1",
            params![task_id, fmt_ts(at), status],
        )?;
        Ok::<(), rusqlite::Error>(())
    })
    .await?;

    Ok(())
}

fn row_to_task(row: &rusqlite::Row<'_>) -> Result<BackupTask, rusqlite::Error> {
    let kind_raw: String = row.get(5)?;
    let kind = TaskKind::from_str(&kind_raw)
        .ok_or_else(|| bad_column(format!("unknown task kind '{kind_raw}'")))?;

    let frequency_raw: String = row.get(10)?;
    let frequency = Frequency::from_str(&frequency_raw)
        .ok_or_else(|| bad_column(format!("unknown frequency '{frequency_raw}'")))?;

    let source_paths: String = row.get(6)?;
    let exclude_patterns: String = row.get(7)?;

    Ok(BackupTask {
        id: row.get(0)?,
        owner: row.get(1)?,
        label: row.get(2)?,
        remote_server_id: row.get(3)?,
        destination_id: row.get(4)?,
        kind,
        source_paths: serde_json::from_str(&source_paths)
            .map_err(|e| bad_column(format!("bad source_paths: {e}")))?,
        exclude_patterns: serde_json::from_str(&exclude_patterns)
            .map_err(|e| bad_column(format!("bad exclude_patterns: {e}")))?,
        database_name: row.get(8)?,
        time_to_run: row.get(9)?,
        frequency,
        paused: row.get(11)?,
        last_run_at: parse_opt_ts(row.get(12)?)?,
        last_finished_at: parse_opt_ts(row.get(13)?)?,
        last_status: row.get(14)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::db::tests_support::{seed_destination, seed_server, test_task};

    #[tokio::test]
    async fn create_and_get_round_trip() {
        let conn = db::init_in_memory().await.unwrap();
        seed_server(&conn, "srv-1").await;
        seed_destination(&conn, "dest-1").await;

        let task = test_task("task-1", "srv-1", "dest-1");
        create(&conn, &task).await.unwrap();

        let loaded = get(&conn, "task-1".into()).await.unwrap();
        assert_eq!(loaded.kind, TaskKind::File);
        assert_eq!(loaded.source_paths, vec!["/var/www".to_string()]);
        assert_eq!(loaded.last_run_at, None);
    }

    #[tokio::test]
    async fn duplicate_schedule_per_server_is_rejected() {
        let conn = db::init_in_memory().await.unwrap();
        seed_server(&conn, "srv-1").await;
        seed_destination(&conn, "dest-1").await;

        create(&conn, &test_task("task-1", "srv-1", "dest-1"))
            .await
            .unwrap();
        // Same owner, server and time_to_run trips the unique constraint.
        let err = create(&conn, &test_task("task-2", "srv-1", "dest-1")).await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn run_bookkeeping_updates_status() {
        let conn = db::init_in_memory().await.unwrap();
        seed_server(&conn, "srv-1").await;
        seed_destination(&conn, "dest-1").await;
        create(&conn, &test_task("task-1", "srv-1", "dest-1"))
            .await
            .unwrap();

        let started = Utc::now();
        record_run_started(&conn, "task-1".into(), started)
            .await
            .unwrap();
        let running = get(&conn, "task-1".into()).await.unwrap();
        assert_eq!(running.last_status.as_deref(), Some("running"));
        assert_eq!(running.last_run_at, Some(started));

        record_run_finished(&conn, "task-1".into(), "succeeded".into(), Utc::now())
            .await
            .unwrap();
        let finished = get(&conn, "task-1".into()).await.unwrap();
        assert_eq!(finished.last_status.as_deref(), Some("succeeded"));
        assert!(finished.last_finished_at.is_some());
    }
}
