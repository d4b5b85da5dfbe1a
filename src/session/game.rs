//! Game server sessions: cluster members registering themselves and
//! exchanging client hand offs with the gateway.

use std::{mem::take, sync::Arc};

use log::{debug, info, warn};
use tokio::{net::TcpStream, sync::mpsc};

use crate::{
    database::{
        query::{self, QueryOutcome, QueryStatus},
        security::{SecurityCheck, SecurityCheckInput},
    },
    state::App,
    utils::{
        logging::TRAFFIC_TARGET,
        types::{ServerIdx, SessionId},
    },
};

use super::{
    epoch::{game_packet_kind, GamePacketKind},
    models::{
        game::{
            AccountInfo, AccountList, AccountName, ClientLogin, ClientLoginResult, SecurityNoCheck,
            SecurityNoCheckResult, ServerLogin, ServerLoginResult,
        },
        ResultCode,
    },
    next_session_id,
    packet::{Packet, HEARTBEAT_ID},
    socket::{self, PacketRx, PacketTx},
    SessionError,
};

/// Completions delivered back into the session task
enum GameSessionEvent {
    SecurityResult(QueryOutcome<SecurityCheck>),
}

pub struct GameSession {
    id: SessionId,
    ip: String,
    app: Arc<App>,
    tx: PacketTx,
    /// Directory index owned by this session once registered
    server_idx: Option<ServerIdx>,
    /// Registered with the reconnect guid layout: use the extended
    /// client login replies and echo security check modes
    extended_replies: bool,
    /// Accounts reported connected before their registry entries
    /// exist; retried on the next account list
    pending_accounts: Vec<AccountInfo>,
    /// Single in-flight security check
    security_pending: bool,
    events_tx: mpsc::UnboundedSender<GameSessionEvent>,
}

/// Accepts a new game server connection, spawning its socket driver
/// and session task
pub fn spawn(stream: TcpStream, ip: String, app: Arc<App>) {
    let (socket_future, packet_rx, packet_tx) = socket::split(stream);
    tokio::spawn(async move {
        if let Err(err) = socket_future.await {
            debug!("Game server socket closed with error: {err}");
        }
    });

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let session = GameSession {
        id: next_session_id(),
        ip,
        app,
        tx: packet_tx,
        server_idx: None,
        extended_replies: false,
        pending_accounts: Vec::new(),
        security_pending: false,
        events_tx,
    };
    tokio::spawn(session.run(packet_rx, events_rx));
}

impl GameSession {
    async fn run(
        mut self,
        mut packets: PacketRx,
        mut events: mpsc::UnboundedReceiver<GameSessionEvent>,
    ) {
        debug!("Game server connected (SID: {}, IP: {})", self.id, self.ip);

        loop {
            tokio::select! {
                packet = packets.recv() => match packet {
                    Some(packet) => {
                        if let Err(err) = self.handle_packet(packet) {
                            match err {
                                SessionError::Closed => {}
                                err => info!("Aborting game server session {}: {err}", self.id),
                            }
                            break;
                        }
                    }
                    None => break,
                },
                event = events.recv() => {
                    if let Some(event) = event {
                        self.handle_event(event);
                    }
                }
            }
        }

        self.cleanup();
        debug!("Game server disconnected (SID: {})", self.id);
    }

    /// Drops the registration and every registry entry still pointing
    /// at this server
    fn cleanup(&mut self) {
        if let Some(server_idx) = self.server_idx.take() {
            self.app.directory.unregister(server_idx, self.id);
            let swept = self.app.registry.sweep_server(server_idx);
            if swept > 0 {
                info!("Dropped {swept} account(s) attached to server {server_idx}");
            }
        }
    }

    fn handle_packet(&mut self, packet: Packet) -> Result<(), SessionError> {
        self.log_packet("Read", &packet);

        if packet.id == HEARTBEAT_ID {
            return Ok(());
        }

        let kind = match game_packet_kind(packet.id) {
            Some(value) => value,
            None => {
                debug!(
                    "Unknown packet ID: {}, size: {}",
                    packet.id,
                    packet.frame_length()
                );
                return Ok(());
            }
        };

        match kind {
            GamePacketKind::Login => self.on_login(&packet),
            GamePacketKind::Logout => self.on_logout(),
            GamePacketKind::AccountList => self.on_account_list(&packet),
            GamePacketKind::ClientLogin => self.on_client_login(&packet),
            GamePacketKind::ClientLogout => self.on_client_logout(&packet),
            GamePacketKind::ClientKickFailed => self.on_client_kick_failed(&packet),
            GamePacketKind::SecurityNoCheck => self.on_security_no_check(&packet),
        }
    }

    fn handle_event(&mut self, event: GameSessionEvent) {
        match event {
            GameSessionEvent::SecurityResult(outcome) => self.on_security_result(outcome),
        }
    }

    fn send(&self, packet: Packet) {
        self.log_packet("Write", &packet);
        self.tx.send(packet);
    }

    fn log_packet(&self, action: &'static str, packet: &Packet) {
        if packet.id == HEARTBEAT_ID {
            return;
        }
        debug!(
            target: TRAFFIC_TARGET,
            "{action} game SID={} id={} size={} data={}",
            self.id,
            packet.id,
            packet.frame_length(),
            hex::encode(&packet.contents)
        );
    }

    /// The index this session registered, or a violation when the
    /// packet requires registration first
    fn registered_idx(&self) -> Result<ServerIdx, SessionError> {
        self.server_idx
            .ok_or(SessionError::Violation("packet before registration"))
    }

    /// Handles the registration request. Index collisions reject the
    /// newcomer and close its session, leaving the survivor untouched.
    fn on_login(&mut self, packet: &Packet) -> Result<(), SessionError> {
        if self.server_idx.is_some() {
            return Err(SessionError::Violation("second registration on one session"));
        }

        let login = ServerLogin::decode(packet)?;
        let registration = crate::services::directory::ServerRegistration {
            server_idx: login.server_idx,
            name: login.name,
            ip: login.ip,
            port: login.port,
            is_adult: login.is_adult,
            screenshot_url: login.screenshot_url,
        };

        match self
            .app
            .directory
            .register(registration, self.id, self.tx.clone())
        {
            Ok(()) => {
                self.server_idx = Some(login.server_idx);
                self.extended_replies = login.guid.is_some();
                info!(
                    "Game server {} registered (SID: {}, IP: {})",
                    login.server_idx, self.id, self.ip
                );
                self.send(
                    ServerLoginResult {
                        result: ResultCode::Ok,
                    }
                    .encode(),
                );
                Ok(())
            }
            Err(server_idx) => {
                warn!("Game server login with duplicate index {server_idx}");
                self.send(
                    ServerLoginResult {
                        result: ResultCode::AlreadyExist,
                    }
                    .encode(),
                );
                Err(SessionError::Closed)
            }
        }
    }

    /// Reconciles the accounts the game server believes are connected
    /// to it. Unknown accounts are buffered for the next list; they
    /// usually arrive mid hand off.
    fn on_account_list(&mut self, packet: &Packet) -> Result<(), SessionError> {
        let server_idx = self.registered_idx()?;
        let list = AccountList::decode(packet)?;

        let mut unresolved = Vec::new();
        for info in take(&mut self.pending_accounts)
            .into_iter()
            .chain(list.accounts)
        {
            if !self.app.registry.attach_to_server(&info.account, server_idx) {
                unresolved.push(info);
            }
        }
        if !unresolved.is_empty() {
            debug!(
                "Buffered {} unresolved account(s) from server {server_idx}",
                unresolved.len()
            );
        }
        self.pending_accounts = unresolved;

        let player_count = self.app.registry.count_server(server_idx);
        self.app.directory.set_player_count(server_idx, player_count);

        if list.final_packet {
            debug!(
                "Account list complete for server {server_idx}: {player_count} player(s)"
            );
        }
        Ok(())
    }

    /// Verifies an arriving client against its pending hand off
    fn on_client_login(&mut self, packet: &Packet) -> Result<(), SessionError> {
        let server_idx = self.registered_idx()?;
        let login = ClientLogin::decode(packet)?;

        let reply = match self.app.registry.confirm_client_login(
            &login.account,
            server_idx,
            login.one_time_key,
        ) {
            Some(profile) => {
                let player_count = self.app.registry.count_server(server_idx);
                self.app.directory.set_player_count(server_idx, player_count);
                ClientLoginResult {
                    account: profile.account,
                    result: ResultCode::Ok,
                    account_id: profile.account_id,
                    age: profile.age,
                    event_code: profile.event_code,
                    pcbang: profile.pcbang,
                    ip: profile.ip,
                    server_idx,
                }
            }
            None => {
                debug!(
                    "Rejected client login for {} on server {server_idx}",
                    login.account
                );
                ClientLoginResult::denied(login.account)
            }
        };

        self.send(reply.encode(self.extended_replies));
        Ok(())
    }

    fn on_client_logout(&mut self, packet: &Packet) -> Result<(), SessionError> {
        let server_idx = self.registered_idx()?;
        let logout = AccountName::decode(packet)?;
        self.app.registry.remove_by_name(&logout.account);
        self.app
            .directory
            .set_player_count(server_idx, self.app.registry.count_server(server_idx));
        Ok(())
    }

    /// The game side kick failed: fall back to dropping our record so
    /// the account can log in again
    fn on_client_kick_failed(&mut self, packet: &Packet) -> Result<(), SessionError> {
        self.registered_idx()?;
        let failed = AccountName::decode(packet)?;
        warn!("Kick failed for {}, dropping registry entry", failed.account);
        self.app.registry.remove_by_name(&failed.account);
        Ok(())
    }

    /// Relays a security number check through the database
    fn on_security_no_check(&mut self, packet: &Packet) -> Result<(), SessionError> {
        self.registered_idx()?;
        let request = SecurityNoCheck::decode(packet)?;

        if self.security_pending {
            info!("Security check while one is already in progress (SID: {})", self.id);
            self.send(
                SecurityNoCheckResult {
                    account: request.account,
                    result: ResultCode::ClientSideError,
                    mode: self.echoed_mode(request.mode),
                }
                .encode(),
            );
            return Ok(());
        }

        let input = SecurityCheckInput {
            account: request.account,
            security_no: request.security_no,
            mode: request.mode,
        };

        let app = self.app.clone();
        let events = self.events_tx.clone();
        self.security_pending = true;
        tokio::spawn(async move {
            let outcome = if events.is_closed() {
                query::canceled(input)
            } else {
                query::run(&app.queries.security, &app.db, input).await
            };
            let _ = events.send(GameSessionEvent::SecurityResult(outcome));
        });
        Ok(())
    }

    fn on_security_result(&mut self, outcome: QueryOutcome<SecurityCheck>) {
        self.security_pending = false;

        let result = match outcome.status {
            QueryStatus::Ok if !outcome.rows.is_empty() => ResultCode::Ok,
            QueryStatus::Canceled => return,
            _ => ResultCode::NotExist,
        };

        self.send(
            SecurityNoCheckResult {
                account: outcome.input.account,
                result,
                mode: self.echoed_mode(outcome.input.mode),
            }
            .encode(),
        );
    }

    /// Only sessions speaking the newer registration layout get the
    /// mode echoed back
    fn echoed_mode(&self, mode: u32) -> u32 {
        if self.extended_replies {
            mode
        } else {
            0
        }
    }

    /// Orderly shutdown: the server asks for its accounts to be
    /// released before the socket goes away
    fn on_logout(&mut self) -> Result<(), SessionError> {
        let server_idx = self.registered_idx()?;
        info!("Game server {server_idx} logging out (SID: {})", self.id);
        Err(SessionError::Closed)
    }
}
