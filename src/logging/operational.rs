use chrono::Utc;
use sea_orm::{ActiveModelTrait, DatabaseConnection, Set};
use std::fmt;
use std::sync::Arc;
use tracing::warn;

use crate::entities::log_entry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Warn,
    Error,
    Unknown,
}

impl LogLevel {
    /// Parses a level name; anything unrecognised is `Unknown`.
    pub fn parse(level: &str) -> Self {
        match level.to_ascii_uppercase().as_str() {
            "INFO" => Self::Info,
            "WARN" | "WARNING" => Self::Warn,
            "ERROR" => Self::Error,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "INFO",
            Self::Warn => "WARN",
            Self::Error => "ERROR",
            Self::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Best-effort operational log persisted to the `logs` table.
///
/// Writes happen on a spawned task; failures are reported through `tracing`
/// and never reach the caller.
#[derive(Clone)]
pub struct OperationalLog {
    db: Arc<DatabaseConnection>,
}

impl OperationalLog {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    pub fn record(&self, level: LogLevel, info: impl Into<String>) {
        let db = self.db.clone();
        let info = info.into();
        tokio::spawn(async move {
            if let Err(e) = Self::write(&db, level, info).await {
                warn!(error = %e, "failed to persist operational log entry");
            }
        });
    }

    pub fn error(&self, info: impl Into<String>) {
        self.record(LogLevel::Error, info)
    }

    pub fn warn(&self, info: impl Into<String>) {
        self.record(LogLevel::Warn, info)
    }

    pub(crate) async fn write(
        db: &DatabaseConnection,
        level: LogLevel,
        info: String,
    ) -> Result<(), sea_orm::DbErr> {
        log_entry::ActiveModel {
            log_level: Set(level.as_str().to_string()),
            info: Set(info),
            created_at: Set(Utc::now()),
            ..Default::default()
        }
        .insert(db)
        .await
        .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use sea_orm::EntityTrait;

    #[rstest]
    #[case("info", LogLevel::Info)]
    #[case("WARN", LogLevel::Warn)]
    #[case("warning", LogLevel::Warn)]
    #[case("Error", LogLevel::Error)]
    #[case("debug", LogLevel::Unknown)]
    #[case("", LogLevel::Unknown)]
    fn parses_levels(#[case] raw: &str, #[case] expected: LogLevel) {
        assert_eq!(LogLevel::parse(raw), expected);
    }

    #[tokio::test]
    async fn write_persists_entry() {
        let db = crate::db::establish_connection_with_config(&crate::db::DbConfig {
            url: "sqlite::memory:".into(),
            max_connections: 1,
            ..Default::default()
        })
        .await
        .unwrap();
        crate::db::run_migrations(&db).await.unwrap();

        OperationalLog::write(&db, LogLevel::parse("bogus"), "cache refresh failed".into())
            .await
            .unwrap();

        let entries = log_entry::Entity::find().all(&db).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].log_level, "UNKNOWN");
        assert_eq!(entries[0].info, "cache refresh failed");
    }
}
