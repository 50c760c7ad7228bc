use anyhow::{anyhow, Result};
use tokio_rusqlite::{params, rusqlite, Connection};

use crate::core::models::{ConnectivityStatus, RemoteServer};
use crate::db::bad_column;

pub async fn create(conn: &Connection, server: &RemoteServer) -> Result<()> {
    let server = server.clone();
    conn.call(move |c| {
        c.execute(
            "INSERT INTO remote_servers
                (id, owner, label, host, port, username, database_password,
                 connectivity_status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                &server.id,
                &server.owner,
                &server.label,
                &server.host,
                server.port,
                &server.username,
                &server.database_password,
                server.connectivity_status.as_str(),
            ],
        )?;
        Ok::<(), rusqlite::Error>(())
    })
    .await?;

    Ok(())
}

pub async fn get(conn: &Connection, server_id: String) -> Result<RemoteServer> {
    conn.call(move |c| {
        let mut stmt = c.prepare(
            "SELECT id, owner, label, host, port, username, database_password,
                    connectivity_status
             FROM remote_servers WHERE id = ?1",
        )?;
        stmt.query_row(params![server_id], row_to_server)
    })
    .await
    .map_err(|e| anyhow!("Failed to get remote server: {}", e))
}

pub async fn list(conn: &Connection) -> Result<Vec<RemoteServer>> {
    conn.call(|c| {
        let mut stmt = c.prepare(
            "SELECT id, owner, label, host, port, username, database_password,
                    connectivity_status
             FROM remote_servers ORDER BY label",
        )?;
        let rows = stmt.query_map([], row_to_server)?;
        rows.collect::<Result<Vec<_>, _>>()
    })
    .await
    .map_err(|e| anyhow!("Failed to list remote servers: {}", e))
}

/// Last-write-wins; concurrent checkers may race and that is tolerated,
/// the status is advisory monitoring data.
pub async fn update_status(
    conn: &Connection,
    server_id: String,
    status: ConnectivityStatus,
) -> Result<()> {
    conn.call(move |c| {
        c.execute(
            "UPDATE remote_servers SET connectivity_status = ?2 WHERE id = ?1",
            params![server_id, status.as_str()],
        )?;
        Ok::<(), rusqlite::Error>(())
    })
    .await?;

    Ok(())
}

fn row_to_server(row: &rusqlite::Row<'_>) -> Result<RemoteServer, rusqlite::Error> {
    let status_raw: String = row.get(7)?;
    let connectivity_status = ConnectivityStatus::from_str(&status_raw)
        .ok_or_else(|| bad_column(format!("unknown connectivity status '{status_raw}'")))?;

    Ok(RemoteServer {
        id: row.get(0)?,
        owner: row.get(1)?,
        label: row.get(2)?,
        host: row.get(3)?,
        port: row.get(4)?,
        username: row.get(5)?,
        database_password: row.get(6)?,
        connectivity_status,
    })
}
