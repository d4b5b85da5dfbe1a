//! The account credential lookup and the last-server update.
//!
//! Both bindings are fully retargetable: SQL text, parameter slots and
//! column names come from configuration so operators can point the
//! gateway at any schema holding the logical account fields.

use log::{debug, warn};
use sea_orm::{DbBackend, DbErr, QueryResult, Statement, Value};

use super::query::{optional_column, positional_values, QueryDef, RowDecision};
use crate::config::{AccountSqlConfig, LastServerSqlConfig};
use crate::utils::crypto::{self, AES_KEY_IV_LENGTH};
use crate::utils::hashing::credential_digest;
use crate::utils::types::{AccountId, ServerIdx};

/// Sentinel prefix marking banned rows in the credential store
const BANNED_PREFIX: char = '@';

/// How the password bytes submitted by the client are protected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialMode {
    /// AES-128-CBC under the RSA exchanged key material
    Aes,
    /// Legacy static keyed DES
    Des,
    /// Plaintext (IMBC clients without the RSA handshake)
    Plain,
}

/// Input of one account lookup job
pub struct AccountLookupInput {
    pub account: String,
    pub password: Vec<u8>,
    pub mode: CredentialMode,
    pub key_iv: [u8; AES_KEY_IV_LENGTH],
    /// Digest computed by the pre-process hook, kept for row acceptance
    password_hex: Option<String>,
}

impl AccountLookupInput {
    pub fn new(
        account: String,
        password: Vec<u8>,
        mode: CredentialMode,
        key_iv: [u8; AES_KEY_IV_LENGTH],
    ) -> Self {
        Self {
            account,
            password,
            mode,
            key_iv,
            password_hex: None,
        }
    }
}

/// The logical account record produced per accepted row
pub struct AccountRow {
    pub account_id: AccountId,
    pub password_hash: Option<String>,
    pub auth_ok: bool,
    pub age: u8,
    pub last_login_server_idx: ServerIdx,
    pub event_code: u32,
    pub pcbang: u32,
    pub server_idx_offset: u32,
    pub block: bool,
}

/// The account lookup binding, built once from configuration
pub struct AccountLookup {
    config: AccountSqlConfig,
    salt: String,
}

impl AccountLookup {
    pub fn new(config: AccountSqlConfig, salt: String) -> Self {
        Self { config, salt }
    }

    /// Recovers the plaintext password per the credential mode
    fn recover_plaintext(&self, input: &AccountLookupInput) -> Option<Vec<u8>> {
        match input.mode {
            CredentialMode::Aes => match crypto::aes_decrypt(&input.key_iv, &input.password) {
                Ok(value) => Some(value),
                Err(err) => {
                    warn!("Failed to decrypt AES credential: {err}");
                    None
                }
            },
            CredentialMode::Des => Some(crypto::des_password_decrypt(&input.password)),
            CredentialMode::Plain => {
                let end = input
                    .password
                    .iter()
                    .position(|value| *value == 0)
                    .unwrap_or(input.password.len());
                Some(input.password[..end].to_vec())
            }
        }
    }
}

impl QueryDef for AccountLookup {
    type Input = AccountLookupInput;
    type Row = AccountRow;

    const NAME: &'static str = "db_account";

    fn enabled(&self) -> bool {
        self.config.enable
    }

    fn prepare(&self, backend: DbBackend, input: &mut Self::Input) -> Option<Statement> {
        // Names carrying the ban sentinel never reach SQL
        if input.account.is_empty() || input.account.starts_with(BANNED_PREFIX) {
            debug!("Rejected account name: {}", input.account);
            return None;
        }

        let plaintext = self.recover_plaintext(input)?;
        let digest = credential_digest(&self.salt, &plaintext);
        input.password_hex = Some(digest.clone());

        let values = positional_values(vec![
            (self.config.param_account, Value::from(input.account.clone())),
            (self.config.param_password, Value::from(digest)),
        ]);
        Some(Statement::from_sql_and_values(
            backend,
            &self.config.query,
            values,
        ))
    }

    fn decode_row(&self, _input: &Self::Input, row: &QueryResult) -> Result<Self::Row, DbErr> {
        let config = &self.config;
        // Retargeted schemas may omit any column but the account id;
        // the defaults apply only to absent columns, while a present
        // column that fails to decode fails the whole job
        Ok(AccountRow {
            account_id: row.try_get_by(config.column_account_id.as_str())?,
            // No password column means the lookup query itself already
            // checked the credential
            password_hash: optional_column(row, config.column_password.as_str(), None)?,
            auth_ok: optional_column(row, config.column_auth_ok.as_str(), true)?,
            age: optional_column(row, config.column_age.as_str(), 19)?,
            last_login_server_idx: optional_column(
                row,
                config.column_last_server_idx.as_str(),
                1,
            )?,
            event_code: optional_column(row, config.column_event_code.as_str(), 0)?,
            pcbang: optional_column(row, config.column_pcbang.as_str(), 0)?,
            server_idx_offset: optional_column(row, config.column_server_idx_offset.as_str(), 0)?,
            block: optional_column(row, config.column_block.as_str(), false)?,
        })
    }

    fn keep_row(&self, input: &Self::Input, row: &Self::Row) -> RowDecision {
        let computed = input.password_hex.as_deref().unwrap_or("");
        if password_matches(row.password_hash.as_deref(), computed) {
            RowDecision::Keep
        } else {
            RowDecision::Discard
        }
    }
}

/// Row acceptance for the credential check: a NULL or missing stored
/// hash accepts on name match alone, anything else must equal the
/// computed digest exactly.
fn password_matches(stored: Option<&str>, computed: &str) -> bool {
    match stored {
        Some(stored) if !stored.is_empty() => stored == computed,
        _ => true,
    }
}

/// Fire-and-forget update of the account's last selected server
pub struct LastServerUpdate {
    config: LastServerSqlConfig,
}

impl LastServerUpdate {
    pub fn new(config: LastServerSqlConfig) -> Self {
        Self { config }
    }

    /// Builds the update statement, or `None` when disabled
    pub fn statement(
        &self,
        backend: DbBackend,
        account_id: AccountId,
        server_idx: ServerIdx,
    ) -> Option<Statement> {
        if !self.config.enable {
            return None;
        }
        let values = positional_values(vec![
            (self.config.param_server_idx, Value::from(server_idx as u32)),
            (self.config.param_account_id, Value::from(account_id)),
        ]);
        Some(Statement::from_sql_and_values(
            backend,
            &self.config.query,
            values,
        ))
    }
}
