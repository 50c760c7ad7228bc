use anyhow::{anyhow, Result};
use tokio_rusqlite::{params, rusqlite, Connection};

use crate::core::models::{BackupDestination, DestinationKind, ReachabilityStatus};
use crate::db::bad_column;

pub async fn create(conn: &Connection, destination: &BackupDestination) -> Result<()> {
    let destination = destination.clone();
    conn.call(move |c| {
        c.execute(
            "INSERT INTO backup_destinations
                (id, owner, label, kind, endpoint, region, bucket, access_key,
                 secret_key, reachability_status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                &destination.id,
                &destination.owner,
                &destination.label,
                destination.kind.as_str(),
                &destination.endpoint,
                &destination.region,
                &destination.bucket,
                &destination.access_key,
                &destination.secret_key,
                destination.reachability_status.as_str(),
            ],
        )?;
        Ok::<(), rusqlite::Error>(())
    })
    .await?;

    Ok(())
}

pub async fn get(conn: &Connection, destination_id: String) -> Result<BackupDestination> {
    conn.call(move |c| {
        let mut stmt = c.prepare(
            "SELECT id, owner, label, kind, endpoint, region, bucket,
                    access_key, secret_key, reachability_status
             FROM backup_destinations WHERE id = ?1",
        )?;
        stmt.query_row(params![destination_id], row_to_destination)
    })
    .await
    .map_err(|e| anyhow!("Failed to get backup destination: {}", e))
}

/// Last-write-wins, same as remote server status.
pub async fn update_status(
    conn: &Connection,
    destination_id: String,
    status: ReachabilityStatus,
) -> Result<()> {
    conn.call(move |c| {
        c.execute(
            "UPDATE backup_destinations SET reachability_status = ?2 WHERE id = ?1",
            params![destination_id, status.as_str()],
        )?;
        Ok::<(), rusqlite::Error>(())
    })
    .await?;

    Ok(())
}

fn row_to_destination(row: &rusqlite::Row<'_>) -> Result<BackupDestination, rusqlite::Error> {
    let kind_raw: String = row.get(3)?;
    let kind = DestinationKind::from_str(&kind_raw)
        .ok_or_else(|| bad_column(format!("unknown destination kind '{kind_raw}'")))?;

    let status_raw: String = row.get(9)?;
    let reachability_status = ReachabilityStatus::from_str(&status_raw)
        .ok_or_else(|| bad_column(format!("unknown reachability status '{status_raw}'")))?;

    Ok(BackupDestination {
        id: row.get(0)?,
        owner: row.get(1)?,
        label: row.get(2)?,
        kind,
        endpoint: row.get(4)?,
        region: row.get(5)?,
        bucket: row.get(6)?,
        access_key: row.get(7)?,
        secret_key: row.get(8)?,
        reachability_status,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::db::tests_support::test_destination;

    #[tokio::test]
    async fn status_updates_persist() {
        let conn = db::init_in_memory().await.unwrap();
        create(&conn, &test_destination("dest-1")).await.unwrap();

        update_status(&conn, "dest-1".into(), ReachabilityStatus::Unreachable)
            .await
            .unwrap();

        let destination = get(&conn, "dest-1".into()).await.unwrap();
        assert_eq!(
            destination.reachability_status,
            ReachabilityStatus::Unreachable
        );
    }
}
