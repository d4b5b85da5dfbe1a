//! Server configuration. Loaded once at startup from an inline JSON
//! environment variable or a `config.json` file next to the binary,
//! falling back to defaults for anything unset.

use log::LevelFilter;
use serde::Deserialize;
use std::{env, fs::read_to_string, net::IpAddr, path::Path};

/// The server version extracted from the Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Commit the binary was cut from; the `INFO` version probe reports a
/// slice of this value back to release tooling.
pub const BUILD_COMMIT: &str = "4f9d2ab35e0c17d8b6a1440fe8b29c57d31a80e6";

/// Environment variable key to load the config from
const CONFIG_ENV_KEY: &str = "REALM_AUTH_CONFIG_JSON";

pub fn load_config() -> Option<Config> {
    // Attempt to load the config from the env
    if let Ok(env) = env::var(CONFIG_ENV_KEY) {
        let config: Config = match serde_json::from_str(&env) {
            Ok(value) => value,
            Err(err) => {
                eprintln!("Failed to load env config (Using default): {:?}", err);
                return None;
            }
        };
        return Some(config);
    }

    // Attempt to load the config from disk
    let file = Path::new("config.json");
    if !file.exists() {
        return None;
    }

    let data = match read_to_string(file) {
        Ok(value) => value,
        Err(err) => {
            eprintln!("Failed to load config file (Using defaults): {:?}", err);
            return None;
        }
    };

    let config: Config = match serde_json::from_str(&data) {
        Ok(value) => value,
        Err(err) => {
            eprintln!("Failed to load config file (Using default): {:?}", err);
            return None;
        }
    };

    Some(config)
}

#[derive(Deserialize)]
#[serde(default)]
pub struct Config {
    pub logging: LevelFilter,
    pub client: ClientListenConfig,
    pub game: GameListenConfig,
    pub db: DatabaseConfig,
    pub sql_account: AccountSqlConfig,
    pub sql_update_last_server_idx: LastServerSqlConfig,
    pub sql_security_no_check: SecurityNoSqlConfig,
    pub traffic_dump: TrafficDumpConfig,
    pub audit: AuditConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            logging: LevelFilter::Info,
            client: Default::default(),
            game: Default::default(),
            db: Default::default(),
            sql_account: Default::default(),
            sql_update_last_server_idx: Default::default(),
            sql_security_no_check: Default::default(),
            traffic_dump: Default::default(),
            audit: Default::default(),
        }
    }
}

/// Listener for game client connections
#[derive(Deserialize)]
#[serde(default)]
pub struct ClientListenConfig {
    pub listen_ip: IpAddr,
    pub port: u16,
    pub auto_start: bool,
    /// Servers with an index above this base (plus the per account
    /// offset) are hidden from the server list
    pub max_public_server_idx: u16,
    /// Whether the alternate IMBC credential path is accepted
    pub enable_imbc: bool,
}

impl Default for ClientListenConfig {
    fn default() -> Self {
        Self {
            listen_ip: IpAddr::from([0, 0, 0, 0]),
            port: 4500,
            auto_start: true,
            max_public_server_idx: 30,
            enable_imbc: false,
        }
    }
}

/// Listener for game server connections
#[derive(Deserialize)]
#[serde(default)]
pub struct GameListenConfig {
    pub listen_ip: IpAddr,
    pub port: u16,
    pub auto_start: bool,
    /// Advertised capacity used when computing the user ratio shown in
    /// the server list
    pub max_players: u32,
}

impl Default for GameListenConfig {
    fn default() -> Self {
        Self {
            listen_ip: IpAddr::from([0, 0, 0, 0]),
            port: 4502,
            auto_start: true,
            max_players: 2000,
        }
    }
}

#[derive(Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub connection_string: String,
    /// Salt prepended to passwords before digesting
    pub salt: String,
    /// Create the bundled default schema on startup. Disable when the
    /// SQL bindings target an externally managed database.
    pub run_migrations: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            connection_string: "sqlite://data/realm-auth.db?mode=rwc".to_string(),
            salt: String::new(),
            run_migrations: true,
        }
    }
}

/// Bindings of the account lookup query. Parameter slots are 1-based
/// placeholder positions; 0 leaves the parameter unbound. Column names
/// address the result set, letting operators retarget any schema
/// without code changes.
#[derive(Deserialize, Clone)]
#[serde(default)]
pub struct AccountSqlConfig {
    pub enable: bool,
    pub query: String,
    pub param_account: u32,
    pub param_password: u32,
    pub column_account_id: String,
    pub column_password: String,
    pub column_auth_ok: String,
    pub column_age: String,
    pub column_last_server_idx: String,
    pub column_event_code: String,
    pub column_pcbang: String,
    pub column_server_idx_offset: String,
    pub column_block: String,
}

impl Default for AccountSqlConfig {
    fn default() -> Self {
        Self {
            enable: true,
            query: "SELECT * FROM accounts WHERE account = ? AND password = ?".to_string(),
            param_account: 1,
            param_password: 2,
            column_account_id: "account_id".to_string(),
            column_password: "password".to_string(),
            column_auth_ok: "auth_ok".to_string(),
            column_age: "age".to_string(),
            column_last_server_idx: "last_login_server_idx".to_string(),
            column_event_code: "event_code".to_string(),
            column_pcbang: "pcbang".to_string(),
            column_server_idx_offset: "server_idx_offset".to_string(),
            column_block: "block".to_string(),
        }
    }
}

/// Bindings of the fire-and-forget last-server update
#[derive(Deserialize, Clone)]
#[serde(default)]
pub struct LastServerSqlConfig {
    pub enable: bool,
    pub query: String,
    pub param_server_idx: u32,
    pub param_account_id: u32,
}

impl Default for LastServerSqlConfig {
    fn default() -> Self {
        Self {
            enable: true,
            query: "UPDATE accounts SET last_login_server_idx = ? WHERE account_id = ?"
                .to_string(),
            param_server_idx: 1,
            param_account_id: 2,
        }
    }
}

/// Bindings of the security number check relayed for game servers
#[derive(Deserialize, Clone)]
#[serde(default)]
pub struct SecurityNoSqlConfig {
    pub enable: bool,
    pub query: String,
    pub param_account: u32,
    pub param_security_no: u32,
}

impl Default for SecurityNoSqlConfig {
    fn default() -> Self {
        Self {
            enable: false,
            query: "SELECT account FROM accounts WHERE account = ? AND security_no = ?"
                .to_string(),
            param_account: 1,
            param_security_no: 2,
        }
    }
}

#[derive(Deserialize)]
#[serde(default)]
pub struct TrafficDumpConfig {
    pub enable: bool,
    pub file: String,
}

impl Default for TrafficDumpConfig {
    fn default() -> Self {
        Self {
            enable: false,
            file: "data/traffic.log".to_string(),
        }
    }
}

#[derive(Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    pub file: String,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            file: "data/audit.log".to_string(),
        }
    }
}
