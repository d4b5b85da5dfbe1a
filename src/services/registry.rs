//! The cluster wide index of logged in accounts.
//!
//! This registry is the single source of truth for "who is logged in
//! and where". Every entry is owned exclusively by the registry;
//! sessions only keep the account id as a key plus their own session id
//! acting as a generation guard, so a stale completion can never mutate
//! an entry that has since moved on.
//!
//! Each operation is a single lock acquisition and never performs I/O,
//! making the individual calls the linearization points for login
//! arbitration and the auth-to-game hand off.

use std::{collections::HashMap, sync::Arc};

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::utils::types::{AccountId, OneTimeKey, ServerIdx, SessionId};

/// Where a logged in account currently lives
#[derive(Clone)]
pub enum ClientLocation {
    /// Attached to a live auth session
    Auth {
        session_id: SessionId,
        /// Handle used to abort the owning session when the account is
        /// evicted by a duplicate login
        stop: Arc<Notify>,
    },
    /// Handed off to a game server. `connected` flips once the game
    /// server has confirmed the client arrival with the one time key.
    Game {
        server_idx: ServerIdx,
        connected: bool,
    },
}

/// A logged in account
pub struct ClientEntry {
    pub account: String,
    pub account_id: AccountId,
    pub ip: String,
    pub age: u8,
    pub event_code: u32,
    pub pcbang: u32,
    pub location: ClientLocation,
    /// Valid only while a hand off is pending (`Game { connected: false }`)
    pub one_time_key: OneTimeKey,
}

/// Immutable view of an entry handed out to callers
#[derive(Clone)]
pub struct ClientProfile {
    pub account: String,
    pub account_id: AccountId,
    pub ip: String,
    pub age: u8,
    pub event_code: u32,
    pub pcbang: u32,
}

impl ClientProfile {
    fn of(entry: &ClientEntry) -> Self {
        Self {
            account: entry.account.clone(),
            account_id: entry.account_id,
            ip: entry.ip.clone(),
            age: entry.age,
            event_code: entry.event_code,
            pcbang: entry.pcbang,
        }
    }
}

/// Parameters for inserting a freshly authenticated account
pub struct NewClient {
    pub account: String,
    pub account_id: AccountId,
    pub ip: String,
    pub age: u8,
    pub event_code: u32,
    pub pcbang: u32,
    pub session_id: SessionId,
    pub stop: Arc<Notify>,
}

/// What the caller must do about an evicted duplicate. The decision is
/// computed while the registry lock is held; the resulting I/O happens
/// outside of it.
#[derive(Debug)]
pub enum EvictAction {
    /// The old login is still sitting on an auth session: abort it. The
    /// entry stays until that session's teardown removes it.
    AbortAuthSession(Arc<Notify>),
    /// The old login is connected to a game server: ask that server to
    /// kick it. The entry stays until the server confirms the logout.
    KickFromGame(ServerIdx),
    /// The old login was mid hand off and not yet connected; the entry
    /// was removed inline.
    Removed(ServerIdx),
}

/// Details of the rejected duplicate login
#[derive(Debug)]
pub struct DuplicateLogin {
    pub old_ip: String,
    pub action: EvictAction,
}

type Inner = (
    HashMap<AccountId, ClientEntry>,
    HashMap<String, AccountId>,
);

/// The registry service. Shared by every session through the app
/// context; internally a single mutex over both indexes.
#[derive(Default)]
pub struct ClientRegistry {
    inner: Mutex<Inner>,
}

impl ClientRegistry {
    /// Inserts the account if no entry exists for its id, otherwise
    /// computes the duplicate eviction decision without mutating the
    /// surviving entry (beyond an inline removal of an unconnected
    /// hand off).
    pub fn try_add(&self, new: NewClient) -> Result<(), DuplicateLogin> {
        let (by_id, by_name) = &mut *self.inner.lock();

        let existing = by_id.get(&new.account_id).map(|existing| {
            (
                existing.ip.clone(),
                existing.account.clone(),
                existing.location.clone(),
            )
        });
        if let Some((old_ip, old_account, location)) = existing {
            let action = match location {
                ClientLocation::Auth { stop, .. } => EvictAction::AbortAuthSession(stop),
                ClientLocation::Game {
                    server_idx,
                    connected: true,
                } => EvictAction::KickFromGame(server_idx),
                ClientLocation::Game {
                    server_idx,
                    connected: false,
                } => {
                    by_name.remove(&old_account);
                    by_id.remove(&new.account_id);
                    EvictAction::Removed(server_idx)
                }
            };
            return Err(DuplicateLogin { old_ip, action });
        }

        by_name.insert(new.account.clone(), new.account_id);
        by_id.insert(
            new.account_id,
            ClientEntry {
                account: new.account,
                account_id: new.account_id,
                ip: new.ip,
                age: new.age,
                event_code: new.event_code,
                pcbang: new.pcbang,
                location: ClientLocation::Auth {
                    session_id: new.session_id,
                    stop: new.stop,
                },
                one_time_key: 0,
            },
        );
        Ok(())
    }

    /// Removes the entry owned by the given auth session. A no-op when
    /// the entry is gone or has moved to a game server, so delayed
    /// session teardown can never clobber a hand off.
    pub fn remove_auth(&self, account_id: AccountId, session_id: SessionId) -> bool {
        let (by_id, by_name) = &mut *self.inner.lock();
        let owned = by_id.get(&account_id).is_some_and(|entry| {
            matches!(
                entry.location,
                ClientLocation::Auth { session_id: owner, .. } if owner == session_id
            )
        });
        if !owned {
            return false;
        }
        if let Some(entry) = by_id.remove(&account_id) {
            by_name.remove(&entry.account);
        }
        true
    }

    /// Removes an entry by account name regardless of location. Used
    /// for game server initiated logouts and failed kicks.
    pub fn remove_by_name(&self, account: &str) -> bool {
        let (by_id, by_name) = &mut *self.inner.lock();
        match by_name.remove(account) {
            Some(account_id) => by_id.remove(&account_id).is_some(),
            None => false,
        }
    }

    /// Atomically transitions an auth attached entry to its chosen game
    /// server, recording the pending one time key. Fails when the entry
    /// is not attached to the calling session.
    pub fn switch_to_server(
        &self,
        account_id: AccountId,
        session_id: SessionId,
        server_idx: ServerIdx,
        one_time_key: OneTimeKey,
    ) -> bool {
        let (by_id, _) = &mut *self.inner.lock();
        let entry = match by_id.get_mut(&account_id) {
            Some(value) => value,
            None => return false,
        };

        match entry.location {
            ClientLocation::Auth {
                session_id: owner, ..
            } if owner == session_id => {
                entry.location = ClientLocation::Game {
                    server_idx,
                    connected: false,
                };
                entry.one_time_key = one_time_key;
                true
            }
            _ => false,
        }
    }

    /// Verifies a client arrival reported by a game server: the entry
    /// must be mid hand off towards that exact server with a matching
    /// one time key. On success the entry is marked connected.
    pub fn confirm_client_login(
        &self,
        account: &str,
        server_idx: ServerIdx,
        one_time_key: OneTimeKey,
    ) -> Option<ClientProfile> {
        let (by_id, by_name) = &mut *self.inner.lock();
        let account_id = *by_name.get(account)?;
        let entry = by_id.get_mut(&account_id)?;

        match entry.location {
            ClientLocation::Game {
                server_idx: target,
                connected: false,
            } if target == server_idx && entry.one_time_key == one_time_key => {
                entry.location = ClientLocation::Game {
                    server_idx,
                    connected: true,
                };
                Some(ClientProfile::of(entry))
            }
            _ => None,
        }
    }

    /// Reconciliation from a game server account list: re-attaches an
    /// existing entry to that server as connected. Returns false when
    /// the account is unknown (caller buffers it).
    pub fn attach_to_server(&self, account: &str, server_idx: ServerIdx) -> bool {
        let (by_id, by_name) = &mut *self.inner.lock();
        let account_id = match by_name.get(account) {
            Some(value) => *value,
            None => return false,
        };
        if let Some(entry) = by_id.get_mut(&account_id) {
            entry.location = ClientLocation::Game {
                server_idx,
                connected: true,
            };
            true
        } else {
            false
        }
    }

    /// Removes every entry attached to the given game server, returning
    /// how many were dropped
    pub fn sweep_server(&self, server_idx: ServerIdx) -> usize {
        let (by_id, by_name) = &mut *self.inner.lock();
        let before = by_id.len();
        by_id.retain(|_, entry| {
            let attached = matches!(
                entry.location,
                ClientLocation::Game { server_idx: idx, .. } if idx == server_idx
            );
            if attached {
                by_name.remove(&entry.account);
            }
            !attached
        });
        before - by_id.len()
    }

    /// Number of accounts attached to the given game server
    pub fn count_server(&self, server_idx: ServerIdx) -> u32 {
        let (by_id, _) = &*self.inner.lock();
        by_id
            .values()
            .filter(|entry| {
                matches!(
                    entry.location,
                    ClientLocation::Game { server_idx: idx, .. } if idx == server_idx
                )
            })
            .count() as u32
    }

    /// Total number of logged in accounts
    pub fn count(&self) -> u32 {
        let (by_id, _) = &*self.inner.lock();
        by_id.len() as u32
    }

    /// Snapshot of an entry's location, for arbitration tests
    #[cfg(test)]
    pub fn location_of(&self, account_id: AccountId) -> Option<ClientLocation> {
        let (by_id, _) = &*self.inner.lock();
        by_id.get(&account_id).map(|entry| entry.location.clone())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn new_client(account: &str, account_id: AccountId, session_id: SessionId) -> NewClient {
        NewClient {
            account: account.to_string(),
            account_id,
            ip: "127.0.0.1".to_string(),
            age: 21,
            event_code: 0,
            pcbang: 0,
            session_id,
            stop: Arc::new(Notify::new()),
        }
    }

    /// Tests at most one entry per account id can ever exist
    #[test]
    fn test_single_occupancy() {
        let registry = ClientRegistry::default();
        assert!(registry.try_add(new_client("alice", 1, 100)).is_ok());
        assert_eq!(registry.count(), 1);

        let duplicate = registry.try_add(new_client("alice", 1, 101));
        assert!(matches!(
            duplicate,
            Err(DuplicateLogin {
                action: EvictAction::AbortAuthSession(_),
                ..
            })
        ));
        assert_eq!(registry.count(), 1);
    }

    /// Tests duplicate arbitration against a connected game login asks
    /// for a kick and keeps the entry
    #[test]
    fn test_duplicate_in_game_requests_kick() {
        let registry = ClientRegistry::default();
        registry.try_add(new_client("alice", 1, 100)).unwrap();
        assert!(registry.switch_to_server(1, 100, 7, 555));
        assert!(registry.confirm_client_login("alice", 7, 555).is_some());

        let duplicate = registry.try_add(new_client("alice", 1, 101));
        assert!(matches!(
            duplicate,
            Err(DuplicateLogin {
                action: EvictAction::KickFromGame(7),
                ..
            })
        ));
        // Entry retained until the game server confirms the logout
        assert_eq!(registry.count(), 1);
    }

    /// Tests duplicate arbitration against an unconnected hand off
    /// drops the entry inline
    #[test]
    fn test_duplicate_pending_hand_off_removed() {
        let registry = ClientRegistry::default();
        registry.try_add(new_client("alice", 1, 100)).unwrap();
        assert!(registry.switch_to_server(1, 100, 7, 555));

        let duplicate = registry.try_add(new_client("alice", 1, 101));
        assert!(matches!(
            duplicate,
            Err(DuplicateLogin {
                action: EvictAction::Removed(7),
                ..
            })
        ));
        assert_eq!(registry.count(), 0);

        // The retry from the new session succeeds
        assert!(registry.try_add(new_client("alice", 1, 101)).is_ok());
    }

    /// Tests the hand off is atomic: after the switch no observer can
    /// see the entry attached to auth, and the stale session can no
    /// longer remove it
    #[test]
    fn test_hand_off_atomicity() {
        let registry = ClientRegistry::default();
        registry.try_add(new_client("alice", 1, 100)).unwrap();
        assert!(registry.switch_to_server(1, 100, 7, 999));

        assert!(matches!(
            registry.location_of(1),
            Some(ClientLocation::Game {
                server_idx: 7,
                connected: false
            })
        ));

        // Generation guarded removal: the auth session that handed off
        // must not be able to destroy the moved entry
        assert!(!registry.remove_auth(1, 100));
        assert_eq!(registry.count(), 1);
    }

    /// Tests removal is idempotent and guarded by the owning session
    #[test]
    fn test_remove_auth_guarded() {
        let registry = ClientRegistry::default();
        registry.try_add(new_client("alice", 1, 100)).unwrap();

        assert!(!registry.remove_auth(1, 999));
        assert!(registry.remove_auth(1, 100));
        assert!(!registry.remove_auth(1, 100));
        assert_eq!(registry.count(), 0);
    }

    /// Tests one time key verification requires server and key to match
    #[test]
    fn test_confirm_client_login() {
        let registry = ClientRegistry::default();
        registry.try_add(new_client("alice", 1, 100)).unwrap();
        registry.switch_to_server(1, 100, 7, 555);

        assert!(registry.confirm_client_login("alice", 8, 555).is_none());
        assert!(registry.confirm_client_login("alice", 7, 556).is_none());
        assert!(registry.confirm_client_login("missing", 7, 555).is_none());

        let profile = registry.confirm_client_login("alice", 7, 555).unwrap();
        assert_eq!(profile.account_id, 1);

        // A second confirmation must fail: the key is one time
        assert!(registry.confirm_client_login("alice", 7, 555).is_none());
    }

    /// Tests sweeping a dead game server removes exactly its accounts
    #[test]
    fn test_sweep_server() {
        let registry = ClientRegistry::default();
        registry.try_add(new_client("alice", 1, 100)).unwrap();
        registry.try_add(new_client("bob", 2, 101)).unwrap();
        registry.try_add(new_client("carol", 3, 102)).unwrap();

        registry.switch_to_server(1, 100, 7, 1);
        registry.switch_to_server(2, 101, 8, 2);

        assert_eq!(registry.sweep_server(7), 1);
        assert_eq!(registry.count(), 2);
        assert_eq!(registry.count_server(8), 1);

        // Swept name is free again
        assert!(registry.try_add(new_client("alice", 1, 103)).is_ok());
    }
}
