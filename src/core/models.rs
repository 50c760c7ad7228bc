use chrono::{DateTime, Utc};

/// A scheduled backup job: one remote server, one destination, one artifact
/// per run.
#[derive(Debug, Clone)]
pub struct BackupTask {
    pub id: String,
    /// Owner identifier, also the address status mail is sent to.
    pub owner: String,
    pub label: String,
    pub remote_server_id: String,
    pub destination_id: String,
    pub kind: TaskKind,
    /// Remote paths to archive (file tasks).
    pub source_paths: Vec<String>,
    /// tar exclusion patterns (file tasks).
    pub exclude_patterns: Vec<String>,
    /// Database to dump (database tasks).
    pub database_name: Option<String>,
    /// Time of day the task runs, "HH:MM" UTC.
    pub time_to_run: String,
    pub frequency: Frequency,
    pub paused: bool,
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_finished_at: Option<DateTime<Utc>>,
    pub last_status: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    File,
    Database,
}

impl TaskKind {
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "file" => Some(Self::File),
            "database" => Some(Self::Database),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Database => "database",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Frequency {
    Daily,
    Weekly,
}

impl Frequency {
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "daily" => Some(Self::Daily),
            "weekly" => Some(Self::Weekly),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Daily => "daily",
            Self::Weekly => "weekly",
        }
    }
}

/// One execution attempt. Created when the run starts, finalized exactly
/// once, immutable afterwards. `successful_at` stays NULL on failure.
#[derive(Debug, Clone)]
pub struct BackupTaskLog {
    pub id: String,
    pub task_id: String,
    pub started_at: DateTime<Utc>,
    pub successful_at: Option<DateTime<Utc>>,
    pub output: String,
}

impl BackupTaskLog {
    pub fn succeeded(&self) -> bool {
        self.successful_at.is_some()
    }
}

/// An SSH-reachable host that backups are taken from.
#[derive(Debug, Clone)]
pub struct RemoteServer {
    pub id: String,
    pub owner: String,
    pub label: String,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub database_password: Option<String>,
    pub connectivity_status: ConnectivityStatus,
}

impl RemoteServer {
    /// True when a usable (non-empty) database password is configured.
    pub fn has_database_password(&self) -> bool {
        self.database_password
            .as_deref()
            .is_some_and(|p| !p.is_empty())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityStatus {
    Online,
    Offline,
    Checking,
}

impl ConnectivityStatus {
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "online" => Some(Self::Online),
            "offline" => Some(Self::Offline),
            "checking" => Some(Self::Checking),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Online => "online",
            Self::Offline => "offline",
            Self::Checking => "checking",
        }
    }
}

/// An object storage target for backup artifacts.
#[derive(Debug, Clone)]
pub struct BackupDestination {
    pub id: String,
    pub owner: String,
    pub label: String,
    pub kind: DestinationKind,
    pub endpoint: String,
    pub region: String,
    pub bucket: String,
    pub access_key: String,
    pub secret_key: String,
    pub reachability_status: ReachabilityStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DestinationKind {
    S3,
    CustomS3,
    Local,
}

impl DestinationKind {
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "s3" => Some(Self::S3),
            "custom_s3" => Some(Self::CustomS3),
            "local" => Some(Self::Local),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::S3 => "s3",
            Self::CustomS3 => "custom_s3",
            Self::Local => "local",
        }
    }

    /// Destinations the object storage checker knows how to talk to.
    pub fn is_s3_compatible(&self) -> bool {
        matches!(self, Self::S3 | Self::CustomS3)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReachabilityStatus {
    Reachable,
    Unreachable,
    Checking,
}

impl ReachabilityStatus {
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "reachable" => Some(Self::Reachable),
            "unreachable" => Some(Self::Unreachable),
            "checking" => Some(Self::Checking),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Reachable => "reachable",
            Self::Unreachable => "unreachable",
            Self::Checking => "checking",
        }
    }
}

/// Per-owner external alert channel (chat webhook etc.).
#[derive(Debug, Clone)]
pub struct NotificationStream {
    pub id: String,
    pub owner: String,
    pub label: String,
    pub kind: StreamKind,
    /// Channel address: webhook URL for `Webhook` streams.
    pub target: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Webhook,
}

impl StreamKind {
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "webhook" => Some(Self::Webhook),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Webhook => "webhook",
        }
    }
}
