//! Account security records, written to the dedicated audit logger.
//!
//! These are the gateway's counterpart of the cluster log server feed:
//! operators watch this stream for credential sharing and account
//! takeover patterns, so the records distinguish whether the evicted
//! login was still authenticating or already playing.

use log::info;

use crate::utils::logging::AUDIT_TARGET;
use crate::utils::types::{AccountId, ServerIdx};

/// Records a duplicate login that evicted an auth attached session
pub fn duplicate_auth_login(account: &str, account_id: AccountId, new_ip: &str, old_ip: &str) {
    info!(
        target: AUDIT_TARGET,
        "duplicate login (auth): account={account} id={account_id} new_ip={new_ip} old_ip={old_ip}"
    );
}

/// Records a duplicate login against an account already on a game server
pub fn duplicate_game_login(
    account: &str,
    account_id: AccountId,
    server_idx: ServerIdx,
    new_ip: &str,
    old_ip: &str,
) {
    info!(
        target: AUDIT_TARGET,
        "duplicate login (game): account={account} id={account_id} server_idx={server_idx} \
         new_ip={new_ip} old_ip={old_ip}"
    );
}
