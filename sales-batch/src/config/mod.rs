//! Application configuration and database bootstrap
//!
//! Settings come from `<config dir>/sales-batch/config.toml` (or an explicit
//! file), then `SALES_BATCH_*` environment variables. `main` loads a `.env`
//! file into the environment before configuration is read.

pub mod repository;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};

const APP_DIR: &str = "sales-batch";

pub const ENV_DATABASE: &str = "SALES_BATCH_DATABASE";
pub const ENV_SALES_OUTPUT: &str = "SALES_BATCH_SALES_OUTPUT";
pub const ENV_INVOICE_OUTPUT: &str = "SALES_BATCH_INVOICE_OUTPUT";
pub const ENV_OFFICE_BIN: &str = "SALES_BATCH_OFFICE_BIN";
pub const ENV_ACTOR: &str = "SALES_BATCH_ACTOR";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// SQLite database file holding `sales_history`
    pub database_path: PathBuf,
    /// Base folder for generated reports (monthly summaries)
    pub sales_output_folder: Option<PathBuf>,
    /// Base folder for exported PDFs
    pub invoice_output_folder: Option<PathBuf>,
    /// LibreOffice executable used for PDF rendering
    pub office_binary: PathBuf,
    /// Recorded as created_by / updated_by on ingested rows
    pub actor: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            sales_output_folder: None,
            invoice_output_folder: None,
            office_binary: PathBuf::from("soffice"),
            actor: APP_DIR.to_string(),
        }
    }
}

impl Config {
    /// Load configuration from `path`, or from the default location when `None`.
    ///
    /// A missing default file yields defaults; a missing explicit file is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => {
                let default_path = default_config_path();
                if default_path.exists() {
                    Self::from_file(&default_path)?
                } else {
                    log::debug!("No config file at {}, using defaults", default_path.display());
                    Self::default()
                }
            }
        };

        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::from_toml_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).context("Invalid configuration")
    }

    /// Override fields from `lookup` (the process environment outside tests)
    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = non_empty(ENV_DATABASE) {
            self.database_path = PathBuf::from(v);
        }
        if let Some(v) = non_empty(ENV_SALES_OUTPUT) {
            self.sales_output_folder = Some(PathBuf::from(v));
        }
        if let Some(v) = non_empty(ENV_INVOICE_OUTPUT) {
            self.invoice_output_folder = Some(PathBuf::from(v));
        }
        if let Some(v) = non_empty(ENV_OFFICE_BIN) {
            self.office_binary = PathBuf::from(v);
        }
        if let Some(v) = non_empty(ENV_ACTOR) {
            self.actor = v;
        }
    }

    pub fn sales_output_dir(&self) -> PathBuf {
        self.sales_output_folder
            .clone()
            .unwrap_or_else(fallback_output_dir)
    }

    pub fn invoice_output_dir(&self) -> PathBuf {
        self.invoice_output_folder
            .clone()
            .unwrap_or_else(fallback_output_dir)
    }

    /// Open the sales database, creating it if needed, and apply migrations
    pub async fn connect(&self) -> Result<SqlitePool> {
        if let Some(parent) = self.database_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create database directory: {}", parent.display())
                })?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(&self.database_path)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .with_context(|| {
                format!("Failed to open database: {}", self.database_path.display())
            })?;

        run_migrations(&pool).await?;
        log::debug!("Database ready at {}", self.database_path.display());
        Ok(pool)
    }
}

async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("Failed to run database migrations")
}

pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
        .join("config.toml")
}

fn default_database_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
        .join("sales.db")
}

fn fallback_output_dir() -> PathBuf {
    dirs::desktop_dir().unwrap_or_else(|| PathBuf::from("."))
}

/// In-memory database with migrations applied
#[cfg(test)]
pub(crate) async fn test_pool() -> SqlitePool {
    use std::str::FromStr;

    let options = SqliteConnectOptions::from_str("sqlite::memory:").unwrap();
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .unwrap();
    run_migrations(&pool).await.unwrap();
    pool
}
