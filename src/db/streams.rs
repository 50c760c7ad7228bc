use anyhow::{anyhow, Result};
use tokio_rusqlite::{params, rusqlite, Connection};

use crate::core::models::{NotificationStream, StreamKind};
use crate::db::bad_column;

pub async fn create(conn: &Connection, stream: &NotificationStream) -> Result<()> {
    let stream = stream.clone();
    conn.call(move |c| {
        c.execute(
            "INSERT INTO notification_streams (id, owner, label, kind, target)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                &stream.id,
                &stream.owner,
                &stream.label,
                stream.kind.as_str(),
                &stream.target,
            ],
        )?;
        Ok::<(), rusqlite::Error>(())
    })
    .await?;

    Ok(())
}

pub async fn list_for_owner(conn: &Connection, owner: String) -> Result<Vec<NotificationStream>> {
    conn.call(move |c| {
        let mut stmt = c.prepare(
            "SELECT id, owner, label, kind, target
             FROM notification_streams WHERE owner = ?1 ORDER BY label",
        )?;
        let rows = stmt.query_map(params![owner], row_to_stream)?;
        rows.collect::<Result<Vec<_>, _>>()
    })
    .await
    .map_err(|e| anyhow!("Failed to list notification streams: {}", e))
}

fn row_to_stream(row: &rusqlite::Row<'_>) -> Result<NotificationStream, rusqlite::Error> {
    let kind_raw: String = row.get(3)?;
    let kind = StreamKind::from_str(&kind_raw)
        .ok_or_else(|| bad_column(format!("unknown stream kind '{kind_raw}'")))?;

    Ok(NotificationStream {
        id: row.get(0)?,
        owner: row.get(1)?,
        label: row.get(2)?,
        kind,
        target: row.get(4)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    #[tokio::test]
    async fn streams_are_scoped_to_owner() {
        let conn = db::init_in_memory().await.unwrap();
        create(
            &conn,
            &NotificationStream {
                id: "stream-1".into(),
                owner: "a@example.com".into(),
                label: "ops".into(),
                kind: StreamKind::Webhook,
                target: "https://hooks.example.com/T1".into(),
            },
        )
        .await
        .unwrap();

        let mine = list_for_owner(&conn, "a@example.com".into()).await.unwrap();
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].kind, StreamKind::Webhook);

        let theirs = list_for_owner(&conn, "b@example.com".into()).await.unwrap();
        assert!(theirs.is_empty());
    }
}
