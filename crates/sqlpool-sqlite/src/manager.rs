//! Connection factory for a single SQLite database.

use crate::connection::{SqliteConfig, SqliteConnection};
use crate::pragma::Pragmas;
use sqlpool_core::{ConnectionManager, Result};

/// Opens connections to one database file and applies [`Pragmas`] to each.
#[derive(Debug, Clone)]
pub struct SqliteManager {
    config: SqliteConfig,
    pragmas: Pragmas,
}

impl SqliteManager {
    pub fn new(config: SqliteConfig) -> Self {
        Self {
            config,
            pragmas: Pragmas::default(),
        }
    }

    /// Manager for a file-based database with default flags and PRAGMAs.
    pub fn file(path: impl Into<String>) -> Self {
        Self::new(SqliteConfig::file(path))
    }

    /// Replace the per-connection PRAGMA settings.
    pub fn with_pragmas(mut self, pragmas: Pragmas) -> Self {
        self.pragmas = pragmas;
        self
    }

    pub fn config(&self) -> &SqliteConfig {
        &self.config
    }

    pub fn pragmas(&self) -> &Pragmas {
        &self.pragmas
    }
}

impl ConnectionManager for SqliteManager {
    type Connection = SqliteConnection;

    fn connect(&self) -> Result<SqliteConnection> {
        SqliteConnection::open(&self.config)
    }

    fn configure(&self, conn: &SqliteConnection) -> Result<()> {
        conn.execute_raw(&self.pragmas.to_sql())?;
        tracing::trace!(path = %self.config.path, "Applied connection PRAGMAs");
        Ok(())
    }

    fn target(&self) -> &str {
        &self.config.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pragma::{Synchronous, TempStore};

    #[test]
    fn configure_applies_pragmas() {
        let path = std::env::temp_dir().join(format!(
            "sqlpool_manager_{}.db",
            std::process::id()
        ));
        let _ = std::fs::remove_file(&path);
        let manager = SqliteManager::file(path.to_string_lossy().into_owned());

        let conn = manager.connect().unwrap();
        manager.configure(&conn).unwrap();

        assert_eq!(
            conn.query_text("PRAGMA journal_mode").unwrap().as_deref(),
            Some("wal")
        );
        // NORMAL = 1
        assert_eq!(
            conn.query_text("PRAGMA synchronous").unwrap().as_deref(),
            Some("1")
        );
        assert_eq!(
            conn.query_text("PRAGMA cache_size").unwrap().as_deref(),
            Some("-64000")
        );
        // MEMORY = 2
        assert_eq!(
            conn.query_text("PRAGMA temp_store").unwrap().as_deref(),
            Some("2")
        );
        assert_eq!(
            conn.query_text("PRAGMA foreign_keys").unwrap().as_deref(),
            Some("1")
        );

        conn.close().unwrap();
        for suffix in ["", "-wal", "-shm"] {
            let _ = std::fs::remove_file(format!("{}{}", path.to_string_lossy(), suffix));
        }
    }

    #[test]
    fn custom_pragmas_on_memory_db() {
        let manager = SqliteManager::new(SqliteConfig::memory()).with_pragmas(
            Pragmas::default()
                .synchronous(Synchronous::Full)
                .temp_store(TempStore::File),
        );
        assert_eq!(manager.target(), ":memory:");

        let conn = manager.connect().unwrap();
        manager.configure(&conn).unwrap();
        // FULL = 2, FILE = 1
        assert_eq!(
            conn.query_text("PRAGMA synchronous").unwrap().as_deref(),
            Some("2")
        );
        assert_eq!(
            conn.query_text("PRAGMA temp_store").unwrap().as_deref(),
            Some("1")
        );
    }
}
