//! The process wide context threaded through every session. There are
//! deliberately no ambient globals: everything a session touches hangs
//! off this struct.

use std::sync::Arc;

use sea_orm::{DatabaseConnection, DbBackend};

use crate::{
    config::Config,
    database::{
        account::{AccountLookup, LastServerUpdate},
        security::SecurityCheck,
    },
    services::{directory::ServerDirectory, registry::ClientRegistry},
};

/// Query bindings declared once at startup from configuration
pub struct Queries {
    pub account: AccountLookup,
    pub last_server: LastServerUpdate,
    pub security: SecurityCheck,
}

pub struct App {
    pub config: Config,
    pub db: DatabaseConnection,
    /// Backend captured at connect time, for statement building
    pub backend: DbBackend,
    pub queries: Queries,
    pub registry: ClientRegistry,
    pub directory: ServerDirectory,
}

impl App {
    pub fn new(config: Config, db: DatabaseConnection, backend: DbBackend) -> Arc<Self> {
        let queries = Queries {
            account: AccountLookup::new(config.sql_account.clone(), config.db.salt.clone()),
            last_server: LastServerUpdate::new(config.sql_update_last_server_idx.clone()),
            security: SecurityCheck::new(
                config.sql_security_no_check.clone(),
                config.db.salt.clone(),
            ),
        };

        Arc::new(Self {
            config,
            db,
            backend,
            queries,
            registry: ClientRegistry::default(),
            directory: ServerDirectory::default(),
        })
    }

    /// Context over a disconnected database for exercising session
    /// logic in tests
    #[cfg(test)]
    pub fn test() -> Arc<Self> {
        Self::new(
            Config::default(),
            DatabaseConnection::Disconnected,
            DbBackend::Sqlite,
        )
    }
}
