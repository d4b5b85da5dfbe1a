//! The live table of registered game servers.

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::session::models::game::{ids as game_ids, AccountName};
use crate::session::socket::PacketTx;
use crate::utils::types::{ServerIdx, SessionId};

/// A registered game server
pub struct GameServer {
    pub server_idx: ServerIdx,
    pub name: String,
    pub ip: String,
    pub port: u16,
    pub is_adult: bool,
    pub screenshot_url: String,
    pub player_count: u32,
    pub ready: bool,
    /// Session owning this registration
    session_id: SessionId,
    /// Channel towards the owning session for relayed packets
    tx: PacketTx,
}

/// Read only snapshot of one directory entry
#[derive(Clone)]
pub struct ServerSummary {
    pub server_idx: ServerIdx,
    pub name: String,
    pub ip: String,
    pub port: u16,
    pub is_adult: bool,
    pub screenshot_url: String,
    pub player_count: u32,
    pub ready: bool,
}

/// Parameters of a registration attempt
pub struct ServerRegistration {
    pub server_idx: ServerIdx,
    pub name: String,
    pub ip: String,
    pub port: u16,
    pub is_adult: bool,
    pub screenshot_url: String,
}

/// Directory of game servers keyed by their cluster wide index
#[derive(Default)]
pub struct ServerDirectory {
    servers: Mutex<HashMap<ServerIdx, GameServer>>,
}

impl ServerDirectory {
    /// Registers a game server. The index must be unused; a collision
    /// leaves the existing registration untouched.
    pub fn register(
        &self,
        registration: ServerRegistration,
        session_id: SessionId,
        tx: PacketTx,
    ) -> Result<(), ServerIdx> {
        let servers = &mut *self.servers.lock();
        if servers.contains_key(&registration.server_idx) {
            return Err(registration.server_idx);
        }

        servers.insert(
            registration.server_idx,
            GameServer {
                server_idx: registration.server_idx,
                name: registration.name,
                ip: registration.ip,
                port: registration.port,
                is_adult: registration.is_adult,
                screenshot_url: registration.screenshot_url,
                player_count: 0,
                ready: true,
                session_id,
                tx,
            },
        );
        Ok(())
    }

    /// Removes a registration, guarded by the owning session so a
    /// colliding login can never tear down the survivor
    pub fn unregister(&self, server_idx: ServerIdx, session_id: SessionId) -> bool {
        let servers = &mut *self.servers.lock();
        match servers.get(&server_idx) {
            Some(server) if server.session_id == session_id => {
                servers.remove(&server_idx);
                true
            }
            _ => false,
        }
    }

    /// Whether the index currently has a registration
    pub fn contains(&self, server_idx: ServerIdx) -> bool {
        self.servers.lock().contains_key(&server_idx)
    }

    /// Updates the advertised player count of a server
    pub fn set_player_count(&self, server_idx: ServerIdx, player_count: u32) {
        if let Some(server) = self.servers.lock().get_mut(&server_idx) {
            server.player_count = player_count;
        }
    }

    /// Read only snapshot of every registration
    pub fn snapshot(&self) -> Vec<ServerSummary> {
        self.servers
            .lock()
            .values()
            .map(|server| ServerSummary {
                server_idx: server.server_idx,
                name: server.name.clone(),
                ip: server.ip.clone(),
                port: server.port,
                is_adult: server.is_adult,
                screenshot_url: server.screenshot_url.clone(),
                player_count: server.player_count,
                ready: server.ready,
            })
            .collect()
    }

    /// Relays a kick request for the given account to the server it is
    /// connected to. Returns false when the server is gone.
    pub fn kick_client(&self, server_idx: ServerIdx, account: &str) -> bool {
        let packet = AccountName {
            account: account.to_string(),
        }
        .encode(game_ids::AG_KICK_CLIENT);

        let servers = &*self.servers.lock();
        match servers.get(&server_idx) {
            Some(server) => {
                server.tx.send(packet);
                true
            }
            None => false,
        }
    }
}

/// Visibility rule for the client server list: servers indexed above
/// the public base plus the per account offset stay hidden, as do
/// servers that are not ready.
pub fn is_visible(server: &ServerSummary, max_public_base: ServerIdx, account_offset: u32) -> bool {
    server.ready && (server.server_idx as u32) <= (max_public_base as u32) + account_offset
}
