//! One-time performance configuration applied to new connections.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Journal mode (`PRAGMA journal_mode`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JournalMode {
    Delete,
    Truncate,
    Persist,
    Memory,
    Wal,
    Off,
}

/// Durability level (`PRAGMA synchronous`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Synchronous {
    Off,
    Normal,
    Full,
    Extra,
}

/// Where temporary tables and indices live (`PRAGMA temp_store`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TempStore {
    Default,
    File,
    Memory,
}

impl fmt::Display for JournalMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            JournalMode::Delete => "DELETE",
            JournalMode::Truncate => "TRUNCATE",
            JournalMode::Persist => "PERSIST",
            JournalMode::Memory => "MEMORY",
            JournalMode::Wal => "WAL",
            JournalMode::Off => "OFF",
        })
    }
}

impl fmt::Display for Synchronous {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Synchronous::Off => "OFF",
            Synchronous::Normal => "NORMAL",
            Synchronous::Full => "FULL",
            Synchronous::Extra => "EXTRA",
        })
    }
}

impl fmt::Display for TempStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TempStore::Default => "DEFAULT",
            TempStore::File => "FILE",
            TempStore::Memory => "MEMORY",
        })
    }
}

/// Per-connection PRAGMA settings.
///
/// Defaults favour a server workload on a local disk: WAL journaling with
/// `NORMAL` sync, a 64 MiB page cache and in-memory temp storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Pragmas {
    pub journal_mode: JournalMode,
    pub synchronous: Synchronous,
    /// Page cache size in KiB (emitted as a negative `cache_size`).
    pub cache_size_kib: u32,
    pub temp_store: TempStore,
    pub foreign_keys: bool,
}

impl Default for Pragmas {
    fn default() -> Self {
        Self {
            journal_mode: JournalMode::Wal,
            synchronous: Synchronous::Normal,
            cache_size_kib: 64_000,
            temp_store: TempStore::Memory,
            foreign_keys: true,
        }
    }
}

impl Pragmas {
    /// Set journal mode.
    pub fn journal_mode(mut self, mode: JournalMode) -> Self {
        self.journal_mode = mode;
        self
    }

    /// Set synchronous level.
    pub fn synchronous(mut self, level: Synchronous) -> Self {
        self.synchronous = level;
        self
    }

    /// Set page cache size in KiB.
    pub fn cache_size_kib(mut self, kib: u32) -> Self {
        self.cache_size_kib = kib;
        self
    }

    /// Set temp store location.
    pub fn temp_store(mut self, store: TempStore) -> Self {
        self.temp_store = store;
        self
    }

    /// Enable/disable foreign key enforcement.
    pub fn foreign_keys(mut self, enabled: bool) -> Self {
        self.foreign_keys = enabled;
        self
    }

    /// Render the settings as a batch of PRAGMA statements.
    pub fn to_sql(&self) -> String {
        format!(
            "PRAGMA journal_mode = {}; PRAGMA synchronous = {}; PRAGMA cache_size = -{}; \
             PRAGMA temp_store = {}; PRAGMA foreign_keys = {};",
            self.journal_mode,
            self.synchronous,
            self.cache_size_kib,
            self.temp_store,
            if self.foreign_keys { "ON" } else { "OFF" },
        )
    }
}
