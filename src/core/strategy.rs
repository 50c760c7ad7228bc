//! Artifact production strategies: one per backup task kind.
//!
//! The runner holds a `Box<dyn BackupStrategy>` chosen from the task and
//! only ever drives the trait; how the artifact comes to exist on the
//! remote host is the variant's business.

use std::time::Instant;

use async_trait::async_trait;

use crate::core::models::{BackupTask, RemoteServer, TaskKind};
use crate::core::runner::{RunError, RunLog};
use crate::core::ssh::{shell_quote, RemoteSession, SshError};

/// Stable validation message asserted by consumers; do not reword.
pub const MISSING_DB_PASSWORD: &str =
    "Please provide a database password for the remote server.";

pub const MISSING_SOURCE_PATHS: &str = "No source paths configured for this backup task.";
pub const MISSING_DATABASE_NAME: &str = "No database name configured for this backup task.";

/// A produced backup artifact sitting on the remote host, ready to stream.
#[derive(Debug, Clone)]
pub struct RemoteArtifact {
    pub path: String,
    pub size_bytes: Option<u64>,
    pub content_type: &'static str,
    pub extension: &'static str,
}

pub struct StrategyContext<'a> {
    pub run_id: &'a str,
    pub task: &'a BackupTask,
    pub server: &'a RemoteServer,
    pub log: RunLog,
}

#[async_trait]
pub trait BackupStrategy: Send + Sync {
    fn kind(&self) -> TaskKind;

    /// Configuration checks that must pass before any connection attempt.
    fn validate(&self, task: &BackupTask, server: &RemoteServer) -> Result<(), RunError>;

    async fn produce(
        &self,
        session: &dyn RemoteSession,
        ctx: &StrategyContext<'_>,
    ) -> Result<RemoteArtifact, RunError>;
}

pub fn for_task(task: &BackupTask) -> Box<dyn BackupStrategy> {
    match task.kind {
        TaskKind::File => Box::new(FileBackup),
        TaskKind::Database => Box::new(DatabaseBackup),
    }
}

/// Archives and compresses the configured remote paths into one tarball.
pub struct FileBackup;

#[async_trait]
impl BackupStrategy for FileBackup {
    fn kind(&self) -> TaskKind {
        TaskKind::File
    }

    fn validate(&self, task: &BackupTask, _server: &RemoteServer) -> Result<(), RunError> {
        if task.source_paths.iter().all(|p| p.trim().is_empty()) {
            return Err(RunError::Validation(MISSING_SOURCE_PATHS.into()));
        }
        Ok(())
    }

    async fn produce(
        &self,
        session: &dyn RemoteSession,
        ctx: &StrategyContext<'_>,
    ) -> Result<RemoteArtifact, RunError> {
        let started = Instant::now();
        let archive_path = format!("/tmp/bktd-{}.tar.gz", ctx.run_id);
        let command = archive_command(&archive_path, &ctx.task.source_paths, &ctx.task.exclude_patterns);

        ctx.log.line(format!(
            "archiving {} path(s) on {}",
            ctx.task.source_paths.len(),
            ctx.server.label
        ));

        let output = session.exec(&command).await.map_err(exec_err)?;
        if !output.success() {
            return Err(RunError::Execution(format!(
                "archive command failed: {}",
                output.stderr.trim()
            )));
        }

        let size_bytes = remote_size(session, &archive_path).await;
        ctx.log.line(format!(
            "archive ready at {} ({}) in {:.1}s",
            archive_path,
            size_bytes
                .map(|b| format!("{b} bytes"))
                .unwrap_or_else(|| "size unknown".into()),
            started.elapsed().as_secs_f64()
        ));

        Ok(RemoteArtifact {
            path: archive_path,
            size_bytes,
            content_type: "application/gzip",
            extension: "tar.gz",
        })
    }
}

/// Dumps a database with the engine's native utility and compresses the
/// result. The engine is detected by probing the remote host.
pub struct DatabaseBackup;

#[async_trait]
impl BackupStrategy for DatabaseBackup {
    fn kind(&self) -> TaskKind {
        TaskKind::Database
    }

    fn validate(&self, task: &BackupTask, server: &RemoteServer) -> Result<(), RunError> {
        if !server.has_database_password() {
            return Err(RunError::Validation(MISSING_DB_PASSWORD.into()));
        }
        if task
            .database_name
            .as_deref()
            .map_or(true, |name| name.trim().is_empty())
        {
            return Err(RunError::Validation(MISSING_DATABASE_NAME.into()));
        }
        Ok(())
    }

    async fn produce(
        &self,
        session: &dyn RemoteSession,
        ctx: &StrategyContext<'_>,
    ) -> Result<RemoteArtifact, RunError> {
        let started = Instant::now();
        let engine = detect_engine(session).await?;
        ctx.log.line(format!("detected database engine: {}", engine.as_str()));

        if let Ok(version) = session.exec(engine.version_command()).await {
            if let Some(line) = version.stdout.lines().next() {
                ctx.log.line(format!("dump utility: {}", line.trim()));
            }
        }

        // Both validated as present before the run connected.
        let database = ctx.task.database_name.as_deref().unwrap_or_default();
        let password = ctx.server.database_password.as_deref().unwrap_or_default();

        let sql_path = format!("/tmp/bktd-{}.sql", ctx.run_id);
        let command = engine.dump_command(database, password, &sql_path);

        let output = session.exec(&command).await.map_err(exec_err)?;
        if !output.success() {
            return Err(RunError::Execution(format!(
                "{} failed: {}",
                engine.utility(),
                output.stderr.trim()
            )));
        }

        let artifact_path = format!("{sql_path}.gz");
        let size_bytes = remote_size(session, &artifact_path).await;
        ctx.log.line(format!(
            "dump of '{}' ready at {} in {:.1}s",
            database,
            artifact_path,
            started.elapsed().as_secs_f64()
        ));

        Ok(RemoteArtifact {
            path: artifact_path,
            size_bytes,
            content_type: "application/gzip",
            extension: "sql.gz",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DatabaseEngine {
    MySql,
    Postgres,
}

impl DatabaseEngine {
    fn as_str(self) -> &'static str {
        match self {
            Self::MySql => "mysql",
            Self::Postgres => "postgres",
        }
    }

    fn utility(self) -> &'static str {
        match self {
            Self::MySql => "mysqldump",
            Self::Postgres => "pg_dump",
        }
    }

    fn version_command(self) -> &'static str {
        match self {
            Self::MySql => "mysqldump --version",
            Self::Postgres => "pg_dump --version",
        }
    }

    /// Dump-then-compress keeps the exit status of the dump utility; a
    /// plain pipe would report gzip's status instead.
    fn dump_command(self, database: &str, password: &str, sql_path: &str) -> String {
        let quoted_db = shell_quote(database);
        let quoted_path = shell_quote(sql_path);
        match self {
            Self::MySql => format!(
                "MYSQL_PWD={} mysqldump --single-transaction {} > {} && gzip -f {}",
                shell_quote(password),
                quoted_db,
                quoted_path,
                quoted_path
            ),
            Self::Postgres => format!(
                "PGPASSWORD={} pg_dump {} > {} && gzip -f {}",
                shell_quote(password),
                quoted_db,
                quoted_path,
                quoted_path
            ),
        }
    }
}

async fn detect_engine(session: &dyn RemoteSession) -> Result<DatabaseEngine, RunError> {
    for engine in [DatabaseEngine::MySql, DatabaseEngine::Postgres] {
        let probe = format!("command -v {}", engine.utility());
        let output = session.exec(&probe).await.map_err(exec_err)?;
        if output.success() {
            return Ok(engine);
        }
    }
    Err(RunError::Execution(
        "no supported database dump utility found on the remote host \
         (tried mysqldump, pg_dump)"
            .into(),
    ))
}

async fn remote_size(session: &dyn RemoteSession, path: &str) -> Option<u64> {
    let command = format!("wc -c < {}", shell_quote(path));
    let output = session.exec(&command).await.ok()?;
    if output.success() {
        output.stdout.trim().parse().ok()
    } else {
        None
    }
}

fn archive_command(archive_path: &str, sources: &[String], excludes: &[String]) -> String {
    let mut command = format!("tar -czf {}", shell_quote(archive_path));
    for pattern in excludes {
        command.push_str(&format!(" --exclude={}", shell_quote(pattern)));
    }
    for path in sources {
        command.push(' ');
        command.push_str(&shell_quote(path));
    }
    command
}

fn exec_err(e: SshError) -> RunError {
    RunError::Execution(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::{ConnectivityStatus, Frequency};

    fn server(password: Option<&str>) -> RemoteServer {
        RemoteServer {
            id: "srv".into(),
            owner: "o@example.com".into(),
            label: "db-1".into(),
            host: "192.0.2.4".into(),
            port: 22,
            username: "backup".into(),
            database_password: password.map(String::from),
            connectivity_status: ConnectivityStatus::Online,
        }
    }

    fn task(kind: TaskKind) -> BackupTask {
        BackupTask {
            id: "task".into(),
            owner: "o@example.com".into(),
            label: "nightly".into(),
            remote_server_id: "srv".into(),
            destination_id: "dest".into(),
            kind,
            source_paths: vec!["/var/www".into()],
            exclude_patterns: vec![],
            database_name: Some("app".into()),
            time_to_run: "02:30".into(),
            frequency: Frequency::Daily,
            paused: false,
            last_run_at: None,
            last_finished_at: None,
            last_status: None,
        }
    }

    #[test]
    fn database_validation_requires_password() {
        let strategy = DatabaseBackup;
        let err = strategy
            .validate(&task(TaskKind::Database), &server(None))
            .err()
            .unwrap();
        assert!(matches!(
            err,
            RunError::Validation(msg) if msg == MISSING_DB_PASSWORD
        ));

        assert!(strategy
            .validate(&task(TaskKind::Database), &server(Some("pw")))
            .is_ok());
    }

    #[test]
    fn database_validation_requires_database_name() {
        let strategy = DatabaseBackup;
        let mut t = task(TaskKind::Database);
        t.database_name = None;
        let err = strategy.validate(&t, &server(Some("pw"))).err().unwrap();
        assert!(matches!(
            err,
            RunError::Validation(msg) if msg == MISSING_DATABASE_NAME
        ));
    }

    #[test]
    fn file_validation_requires_source_paths() {
        let strategy = FileBackup;
        let mut t = task(TaskKind::File);
        t.source_paths = vec![" ".into()];
        assert!(strategy.validate(&t, &server(None)).is_err());
    }

    #[test]
    fn archive_command_quotes_paths_and_excludes() {
        let command = archive_command(
            "/tmp/bktd-1.tar.gz",
            &["/var/www".into(), "/home/app data".into()],
            &["*.log".into()],
        );
        assert_eq!(
            command,
            "tar -czf '/tmp/bktd-1.tar.gz' --exclude='*.log' '/var/www' '/home/app data'"
        );
    }

    #[test]
    fn dump_commands_quote_credentials() {
        let cmd = DatabaseEngine::MySql.dump_command("app", "p'w", "/tmp/a.sql");
        assert!(cmd.starts_with(r"MYSQL_PWD='p'\''w' mysqldump --single-transaction 'app'"));
        assert!(cmd.ends_with("&& gzip -f '/tmp/a.sql'"));

        let cmd = DatabaseEngine::Postgres.dump_command("app", "pw", "/tmp/a.sql");
        assert!(cmd.starts_with("PGPASSWORD='pw' pg_dump 'app'"));
    }

    #[tokio::test]
    async fn engine_detection_prefers_mysql_then_postgres() {
        use crate::core::ssh::{CommandOutput, RemoteShell, SimulatedShell, SshTarget};
        use std::path::PathBuf;
        use std::time::Duration;

        let shell = SimulatedShell::permissive();
        // mysqldump missing, pg_dump present.
        shell.fail_command("command -v mysqldump", "");
        shell.on_command("command -v pg_dump", CommandOutput::ok());

        let session = shell
            .connect(&SshTarget {
                host: "h".into(),
                port: 22,
                username: "u".into(),
                private_key_path: PathBuf::from("/tmp/key"),
                connect_timeout: Duration::from_secs(5),
            })
            .await
            .unwrap();

        let engine = detect_engine(session.as_ref()).await.unwrap();
        assert_eq!(engine, DatabaseEngine::Postgres);
    }
}
