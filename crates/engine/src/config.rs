use crate::sql::SqlOptions;
use std::path::{Path, PathBuf};

/// Table queried when a dataset URL names none.
pub const DEFAULT_TABLE: &str = "tb0";

/// Approximate response chunk size; a data frame is flushed once the batch
/// estimate reaches this many bytes.
pub const DEFAULT_CHUNK_BYTES: usize = 64 * 1024;

/// Flat per-row contribution to the batch size estimate.
pub const DEFAULT_ROW_OVERHEAD: usize = 100;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    /// Port to bind; 0 lets the OS pick one.
    pub port: u16,
    pub default_table: String,
    pub chunk_bytes: usize,
    pub row_overhead: usize,
    /// When set, identifiers in compiled SQL must pass the allow-list and
    /// are quoted.
    pub hardened_sql: bool,
    /// File to write the bound port to, for client discovery.
    pub port_file: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 0,
            default_table: DEFAULT_TABLE.to_string(),
            chunk_bytes: DEFAULT_CHUNK_BYTES,
            row_overhead: DEFAULT_ROW_OVERHEAD,
            hardened_sql: false,
            port_file: None,
        }
    }
}

impl ServerConfig {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn set_port_file<P: AsRef<Path>>(mut self, file: P) -> Self {
        self.port_file = Some(file.as_ref().to_path_buf());
        self
    }

    pub fn set_default_table<S: Into<String>>(mut self, table: S) -> Self {
        self.default_table = table.into();
        self
    }

    pub fn sql(&self) -> SqlOptions {
        self.into()
    }
}

impl From<&ServerConfig> for SqlOptions {
    fn from(cfg: &ServerConfig) -> Self {
        Self {
            default_table: cfg.default_table.clone(),
            hardened: cfg.hardened_sql,
        }
    }
}
