//! Security number validation relayed on behalf of game servers.

use log::debug;
use sea_orm::{DbBackend, DbErr, QueryResult, Statement, Value};

use super::query::{positional_values, FetchMode, QueryDef};
use crate::config::SecurityNoSqlConfig;
use crate::utils::hashing::credential_digest;

/// Input of one security number check
pub struct SecurityCheckInput {
    pub account: String,
    pub security_no: String,
    /// Mode value echoed back to the requesting game server
    pub mode: u32,
}

/// The security number check binding. The stored value uses the same
/// salted digest scheme as passwords; a single matching row passes.
pub struct SecurityCheck {
    config: SecurityNoSqlConfig,
    salt: String,
}

impl SecurityCheck {
    pub fn new(config: SecurityNoSqlConfig, salt: String) -> Self {
        Self { config, salt }
    }
}

impl QueryDef for SecurityCheck {
    type Input = SecurityCheckInput;
    type Row = ();

    const NAME: &'static str = "db_security_no_check";

    fn enabled(&self) -> bool {
        self.config.enable
    }

    fn prepare(&self, backend: DbBackend, input: &mut Self::Input) -> Option<Statement> {
        if input.account.is_empty() {
            debug!("Security check without an account name");
            return None;
        }

        let digest = credential_digest(&self.salt, input.security_no.as_bytes());
        let values = positional_values(vec![
            (self.config.param_account, Value::from(input.account.clone())),
            (self.config.param_security_no, Value::from(digest)),
        ]);
        Some(Statement::from_sql_and_values(
            backend,
            &self.config.query,
            values,
        ))
    }

    fn decode_row(&self, _input: &Self::Input, _row: &QueryResult) -> Result<Self::Row, DbErr> {
        Ok(())
    }

    fn fetch_mode(&self) -> FetchMode {
        FetchMode::FirstKept
    }
}

#[cfg(test)]
mod test {
    use super::*;

    /// Tests the binding digests the security number into its slot
    #[test]
    fn test_prepare_binds_digest() {
        let check = SecurityCheck::new(
            SecurityNoSqlConfig {
                enable: true,
                ..Default::default()
            },
            "pepper".to_string(),
        );

        let mut input = SecurityCheckInput {
            account: "alice".to_string(),
            security_no: "170233".to_string(),
            mode: 1,
        };
        let statement = check.prepare(DbBackend::Sqlite, &mut input).unwrap();
        let values = statement.values.unwrap();
        assert_eq!(values.0[0], Value::from("alice"));
        assert_eq!(
            values.0[1],
            Value::from(credential_digest("pepper", b"170233"))
        );
    }
}
