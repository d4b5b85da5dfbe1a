//! Credential store bootstrap.
//!
//! The gateway only borrows the database: queries are raw statements
//! built from the configured SQL bindings, so the schema may live
//! anywhere. The bundled migration exists for standalone deployments
//! where the gateway owns a local sqlite store.

use std::path::Path;

use log::{debug, info};
use sea_orm::{DatabaseConnection, DbErr};
use thiserror::Error;
use tokio::fs;

use self::migration::{Migrator, MigratorTrait};
use crate::config::DatabaseConfig;

pub mod account;
pub mod migration;
pub mod query;
pub mod security;

#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("could not prepare the sqlite store: {0}")]
    PrepareStore(#[from] std::io::Error),
    #[error("credential store is unreachable: {0}")]
    Unreachable(DbErr),
    #[error("bundled schema migration failed: {0}")]
    Migration(DbErr),
}

/// Opens the configured credential store. Local sqlite stores get
/// their backing file created and, unless disabled, the bundled
/// account schema applied.
pub async fn connect(config: &DatabaseConfig) -> Result<DatabaseConnection, ConnectError> {
    let con_str = &config.connection_string;

    // sqlx will not open a sqlite file that does not exist yet
    if let Some(db_file) = sqlite_file_path(con_str) {
        prepare_sqlite_store(Path::new(db_file)).await?;
    }

    let connection = sea_orm::Database::connect(con_str)
        .await
        .map_err(ConnectError::Unreachable)?;
    info!("Credential store ready ({con_str})");

    if config.run_migrations {
        debug!("Applying bundled account schema");
        Migrator::up(&connection, None)
            .await
            .map_err(ConnectError::Migration)?;
    }

    Ok(connection)
}

/// Creates the sqlite file and its parent directories when missing
async fn prepare_sqlite_store(path: &Path) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.exists() {
            fs::create_dir_all(parent).await?;
        }
    }
    if !path.exists() {
        fs::File::create(path).await?;
    }
    Ok(())
}

/// Extracts the file path from a sqlite connection string, ignoring
/// any trailing query options
fn sqlite_file_path(con_str: &str) -> Option<&str> {
    let path = con_str
        .strip_prefix("sqlite://")
        .or_else(|| con_str.strip_prefix("sqlite:"))?;
    if path.is_empty() || path.starts_with(':') {
        // In-memory databases need no file
        return None;
    }
    Some(path.split('?').next().unwrap_or(path))
}
