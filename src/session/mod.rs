//! Client sessions: the authentication dialogue between a game client
//! and the gateway.
//!
//! Each connection is driven by a single task owning all session state.
//! The dialogue is version → optional key exchange → login → server
//! list → select, after which ownership of the registry entry moves to
//! the chosen game server and the client is expected to disconnect.

use std::sync::{
    atomic::{AtomicU32, Ordering},
    Arc, OnceLock,
};

use log::{debug, info, warn};
use tokio::{
    net::TcpStream,
    sync::{mpsc, Notify},
};

use crate::{
    config::BUILD_COMMIT,
    database::{
        account::{AccountLookup, AccountLookupInput, CredentialMode},
        query::{self, QueryOutcome, QueryStatus},
    },
    services::{
        audit,
        directory::is_visible,
        registry::{DuplicateLogin, EvictAction, NewClient},
    },
    state::App,
    utils::{
        crypto,
        logging::TRAFFIC_TARGET,
        types::{AccountId, ServerIdx, SessionId},
    },
};

use self::{
    epoch::{client_packet_kind, ClientPacketKind, ProtocolEpoch},
    models::{
        client::{
            AesKeyIv, AuthResult, Credentials, CredentialLayout, ProbeResult, RsaPublicKey,
            SelectServer, SelectServerResult, SelectServerRsaResult, ServerList, ServerListEntry,
            VersionProbe,
        },
        DecodeError, LoginFlags, ResultCode,
    },
    packet::{Packet, HEARTBEAT_ID},
    socket::{PacketRx, PacketTx},
};

pub mod epoch;
pub mod game;
pub mod models;
pub mod packet;
pub mod socket;

/// Mask applied to values reported through the version probes
const PROBE_VALUE_MASK: u32 = 0xADADADAD;

/// Allocator for process unique session ids, shared by both listeners
static NEXT_SESSION_ID: AtomicU32 = AtomicU32::new(1);

pub fn next_session_id() -> SessionId {
    NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed)
}

/// Errors that terminate a session. Everything recoverable is handled
/// with a reply instead.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Crypto(#[from] crate::utils::crypto::CryptoError),
    #[error("protocol violation: {0}")]
    Violation(&'static str),
    /// Clean close requested by the protocol (not an error)
    #[error("session closed")]
    Closed,
}

/// Progress of the client dialogue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ClientState {
    /// Connected, nothing proven yet
    Connected,
    /// Credential query in flight
    AuthPending,
    /// Logged in, owning a registry entry
    Authenticated,
    /// Registry entry transferred to a game server
    HandedOff,
}

/// Completions delivered back into the session task
enum SessionEvent {
    AuthResult(QueryOutcome<AccountLookup>),
}

pub struct ClientSession {
    id: SessionId,
    /// Remote address in presentation form
    ip: String,
    app: Arc<App>,
    tx: PacketTx,
    state: ClientState,
    epoch: ProtocolEpoch,
    /// AES key material from the RSA exchange; presence selects the
    /// RSA credential and hand-off layouts
    aes_key_iv: Option<[u8; crypto::AES_KEY_IV_LENGTH]>,
    last_login_server_idx: ServerIdx,
    server_idx_offset: u32,
    /// Registry entry owned by this session while authenticated
    attached: Option<AccountId>,
    /// Abort handle armed by duplicate login eviction
    stop: Arc<Notify>,
    events_tx: mpsc::UnboundedSender<SessionEvent>,
}

/// Accepts a new client connection, spawning its socket driver and
/// session task
pub fn spawn(stream: TcpStream, ip: String, app: Arc<App>) {
    let (socket_future, packet_rx, packet_tx) = socket::split(stream);
    tokio::spawn(async move {
        if let Err(err) = socket_future.await {
            debug!("Client socket closed with error: {err}");
        }
    });

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let session = ClientSession {
        id: next_session_id(),
        ip,
        app,
        tx: packet_tx,
        state: ClientState::Connected,
        epoch: ProtocolEpoch::default(),
        aes_key_iv: None,
        last_login_server_idx: 1,
        server_idx_offset: 0,
        attached: None,
        stop: Arc::new(Notify::new()),
        events_tx,
    };
    tokio::spawn(session.run(packet_rx, events_rx));
}

impl ClientSession {
    async fn run(
        mut self,
        mut packets: PacketRx,
        mut events: mpsc::UnboundedReceiver<SessionEvent>,
    ) {
        debug!("Client connected (SID: {}, IP: {})", self.id, self.ip);

        loop {
            let stop = self.stop.clone();
            tokio::select! {
                packet = packets.recv() => match packet {
                    Some(packet) => {
                        if let Err(err) = self.handle_packet(packet) {
                            match err {
                                SessionError::Closed => {}
                                err => info!("Aborting client session {}: {err}", self.id),
                            }
                            break;
                        }
                    }
                    // Remote closed the connection
                    None => break,
                },
                event = events.recv() => {
                    if let Some(event) = event {
                        self.handle_event(event);
                    }
                }
                _ = stop.notified() => {
                    debug!("Client session {} evicted by duplicate login", self.id);
                    break;
                }
            }
        }

        self.cleanup();
        debug!("Client disconnected (SID: {})", self.id);
    }

    /// Removes any registry entry still owned by this session. The
    /// removal is generation guarded so an entry handed off to a game
    /// server stays put.
    fn cleanup(&mut self) {
        if let Some(account_id) = self.attached.take() {
            self.app.registry.remove_auth(account_id, self.id);
        }
    }

    fn handle_packet(&mut self, packet: Packet) -> Result<(), SessionError> {
        self.log_packet("Read", &packet);

        if packet.id == HEARTBEAT_ID {
            return Ok(());
        }

        let kind = match client_packet_kind(self.epoch, packet.id) {
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
            ClientPacketKind::Version => self.on_version(&packet),
            ClientPacketKind::RsaPublicKey => self.on_rsa_key(&packet),
            ClientPacketKind::Account => self.on_account(&packet, false),
            ClientPacketKind::ImbcAccount => self.on_account(&packet, true),
            ClientPacketKind::ServerList => self.on_server_list(),
            ClientPacketKind::SelectServer => self.on_select_server(&packet),
        }
    }

    fn handle_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::AuthResult(outcome) => self.on_auth_result(outcome),
        }
    }

    fn send(&self, packet: Packet) {
        self.log_packet("Write", &packet);
        self.tx.send(packet);
    }

    /// Logs the packet to the traffic tap. Heartbeats are skipped as
    /// they carry nothing.
    fn log_packet(&self, action: &'static str, packet: &Packet) {
        if packet.id == HEARTBEAT_ID {
            return;
        }
        debug!(
            target: TRAFFIC_TARGET,
            "{action} client SID={} id={} size={} data={}",
            self.id,
            packet.id,
            packet.frame_length(),
            hex::encode(&packet.contents)
        );
    }

    /// Handles the version probe: reporting hooks for tooling plus the
    /// epic 2 dialect detection
    fn on_version(&mut self, packet: &Packet) -> Result<(), SessionError> {
        let probe = VersionProbe::decode(packet)?;
        let version = probe.version.as_str();

        if version.starts_with("TEST") {
            let total_user_count = self.app.registry.count();
            self.send(
                ProbeResult {
                    request_msg_id: packet.id,
                    result: 0,
                    value: total_user_count ^ PROBE_VALUE_MASK,
                }
                .encode(),
            );
        } else if version.starts_with("INFO") {
            // Hex parse of the commit sha slice is memoized
            static COMMIT_SUFFIX: OnceLock<u32> = OnceLock::new();
            let value = *COMMIT_SUFFIX
                .get_or_init(|| u32::from_str_radix(&BUILD_COMMIT[8..16], 16).unwrap_or(0));
            self.send(
                ProbeResult {
                    request_msg_id: packet.id,
                    result: 0,
                    value: value ^ PROBE_VALUE_MASK,
                }
                .encode(),
            );
        } else if version.starts_with("200609280") || version.starts_with("Creer") {
            // The epic 2 latch is one way; later probes never revert it
            self.epoch = ProtocolEpoch::Epic2;
            debug!("Client is epic 2 (SID: {})", self.id);
        }

        Ok(())
    }

    /// Handles the client public key, answering with RSA wrapped AES
    /// key material and arming the RSA credential layouts
    fn on_rsa_key(&mut self, packet: &Packet) -> Result<(), SessionError> {
        if !matches!(self.state, ClientState::Connected | ClientState::AuthPending) {
            return Err(SessionError::Violation("RSA key after authentication"));
        }

        let request = RsaPublicKey::decode(packet)?;
        let public_key = crypto::import_public_key(&request.key_pem)?;

        let key_iv = crypto::generate_key_iv();
        let encrypted = crypto::rsa_encrypt(&public_key, &key_iv)?;

        self.aes_key_iv = Some(key_iv);
        self.send(AesKeyIv { encrypted: &encrypted }.encode());
        Ok(())
    }

    /// Handles both credential packets, launching the account lookup
    fn on_account(&mut self, packet: &Packet, imbc: bool) -> Result<(), SessionError> {
        if self.state == ClientState::AuthPending {
            info!("Client auth request while one is already in progress (SID: {})", self.id);
            self.send_auth_result(ResultCode::ClientSideError);
            return Ok(());
        }

        let rsa_session = self.aes_key_iv.is_some();
        let credentials = Credentials::decode(packet, rsa_session)?;

        if imbc && !self.app.config.client.enable_imbc {
            debug!(
                "Refused IMBC connection (IMBC is disabled) for account {}",
                credentials.account
            );
            self.send_auth_result(ResultCode::AccessDenied);
            return Ok(());
        }

        if credentials.layout == CredentialLayout::Short && self.epoch == ProtocolEpoch::Latest {
            self.epoch = ProtocolEpoch::Epic4;
            debug!("Client is epic 4 or older (SID: {})", self.id);
        }

        let mode = match (rsa_session, imbc) {
            (true, _) => CredentialMode::Aes,
            (false, true) => CredentialMode::Plain,
            (false, false) => CredentialMode::Des,
        };

        debug!("Login request for account {} (SID: {})", credentials.account, self.id);

        let input = AccountLookupInput::new(
            credentials.account,
            credentials.password,
            mode,
            self.aes_key_iv.unwrap_or([0u8; crypto::AES_KEY_IV_LENGTH]),
        );

        let app = self.app.clone();
        let events = self.events_tx.clone();
        self.state = ClientState::AuthPending;
        tokio::spawn(async move {
            // A session torn down before the worker picked the job up
            // cancels it without touching SQL; a session torn down
            // after completion just drops the event
            let outcome = if events.is_closed() {
                query::canceled(input)
            } else {
                query::run(&app.queries.account, &app.db, input).await
            };
            let _ = events.send(SessionEvent::AuthResult(outcome));
        });
        Ok(())
    }

    /// Applies the account lookup outcome: the duplicate login policy
    /// lives here
    fn on_auth_result(&mut self, outcome: QueryOutcome<AccountLookup>) {
        if self.state == ClientState::AuthPending {
            self.state = ClientState::Connected;
        }

        match outcome.status {
            QueryStatus::Ok => {}
            QueryStatus::Canceled => return,
            QueryStatus::DbError => {
                warn!("Account lookup failed, rejecting login for {}", outcome.input.account);
                self.send_auth_result(ResultCode::NotExist);
                return;
            }
        }

        // Exactly one accepted row authenticates
        if outcome.rows.len() != 1 {
            self.send_auth_result(ResultCode::NotExist);
            return;
        }
        let row = &outcome.rows[0];

        if !row.auth_ok {
            self.send_auth_result(ResultCode::NotExist);
            return;
        }
        if row.block {
            self.send_auth_result(ResultCode::AccessDenied);
            return;
        }
        if self.attached.is_some() {
            info!(
                "Client connection already authenticated (SID: {}, account: {})",
                self.id, outcome.input.account
            );
            self.send_auth_result(ResultCode::ClientSideError);
            return;
        }

        let account = outcome.input.account;
        let added = self.app.registry.try_add(NewClient {
            account: account.clone(),
            account_id: row.account_id,
            ip: self.ip.clone(),
            age: row.age,
            event_code: row.event_code,
            pcbang: row.pcbang,
            session_id: self.id,
            stop: self.stop.clone(),
        });

        match added {
            Ok(()) => {
                self.attached = Some(row.account_id);
                self.last_login_server_idx = row.last_login_server_idx;
                self.server_idx_offset = row.server_idx_offset;
                self.state = ClientState::Authenticated;
                self.send(
                    AuthResult {
                        result: ResultCode::Ok,
                        login_flags: LoginFlags::EULA_ACCEPTED,
                    }
                    .encode(),
                );
            }
            Err(DuplicateLogin { old_ip, action }) => {
                info!("Client {account} already connected");
                self.send_auth_result(ResultCode::AlreadyExist);
                self.evict_old_login(&account, row.account_id, &old_ip, action);
            }
        }
    }

    /// Evicts the surviving login after a duplicate was rejected
    fn evict_old_login(
        &self,
        account: &str,
        account_id: AccountId,
        old_ip: &str,
        action: EvictAction,
    ) {
        match action {
            EvictAction::AbortAuthSession(stop) => {
                audit::duplicate_auth_login(account, account_id, &self.ip, old_ip);
                stop.notify_one();
            }
            EvictAction::KickFromGame(server_idx) => {
                audit::duplicate_game_login(account, account_id, server_idx, &self.ip, old_ip);
                if !self.app.directory.kick_client(server_idx, account) {
                    // Server vanished between arbitration and the kick
                    warn!("Kick target server {server_idx} is gone, dropping {account}");
                    self.app.registry.remove_by_name(account);
                }
            }
            EvictAction::Removed(server_idx) => {
                audit::duplicate_game_login(account, account_id, server_idx, &self.ip, old_ip);
            }
        }
    }

    /// Builds the filtered server list for the authenticated account
    fn on_server_list(&mut self) -> Result<(), SessionError> {
        if self.state != ClientState::Authenticated {
            return Err(SessionError::Violation("server list without authentication"));
        }

        let max_public_base = self.app.config.client.max_public_server_idx;
        let max_players = self.app.config.game.max_players.max(1);

        let servers = self
            .app
            .directory
            .snapshot()
            .into_iter()
            .filter(|server| is_visible(server, max_public_base, self.server_idx_offset))
            .map(|server| {
                let user_ratio = (server.player_count * 100 / max_players).min(100) as u16;
                ServerListEntry {
                    server_idx: server.server_idx,
                    name: server.name,
                    screenshot_url: server.screenshot_url,
                    is_adult: server.is_adult,
                    ip: server.ip,
                    port: server.port,
                    user_ratio,
                }
            })
            .collect();

        let reply = ServerList {
            last_login_server_idx: self.last_login_server_idx,
            servers,
        };
        self.send(reply.encode(self.epoch.server_list_epoch()));
        Ok(())
    }

    /// Hands the client off to its chosen game server
    fn on_select_server(&mut self, packet: &Packet) -> Result<(), SessionError> {
        if self.state != ClientState::Authenticated {
            return Err(SessionError::Violation("server select without authentication"));
        }
        let account_id = match self.attached {
            Some(value) => value,
            None => return Err(SessionError::Violation("server select without registry entry")),
        };

        let request = SelectServer::decode(packet)?;
        if !self.app.directory.contains(request.server_idx) {
            warn!(
                "Attempt to connect to an invalid server idx: {}",
                request.server_idx
            );
            return Err(SessionError::Violation("unknown server index"));
        }

        let one_time_key = crypto::generate_one_time_key();

        // Record the chosen server; failures only cost the preference
        if let Some(statement) = self.app.queries.last_server.statement(
            self.app.backend,
            account_id,
            request.server_idx,
        ) {
            let db = self.app.db.clone();
            tokio::spawn(query::execute_no_result(
                "update_last_server_idx",
                db,
                statement,
            ));
        }

        // Ownership of the registry entry moves to the game server
        if !self
            .app
            .registry
            .switch_to_server(account_id, self.id, request.server_idx, one_time_key)
        {
            return Err(SessionError::Violation("registry entry not owned by session"));
        }
        self.attached = None;
        self.state = ClientState::HandedOff;

        debug!("Client chose server idx {} (SID: {})", request.server_idx, self.id);

        match self.aes_key_iv {
            Some(key_iv) => {
                let encrypted = crypto::aes_encrypt(&key_iv, &one_time_key.to_le_bytes())?;
                let encrypted_key: [u8; 16] = encrypted
                    .try_into()
                    .map_err(|_| SessionError::Violation("unexpected AES block length"))?;
                self.send(
                    SelectServerRsaResult {
                        result: ResultCode::Ok,
                        encrypted_key,
                        pending_time: 0,
                    }
                    .encode(),
                );
            }
            None => {
                self.send(
                    SelectServerResult {
                        result: ResultCode::Ok,
                        one_time_key,
                        pending_time: 0,
                    }
                    .encode(),
                );
            }
        }
        Ok(())
    }

    fn send_auth_result(&self, result: ResultCode) {
        self.send(
            AuthResult {
                result,
                login_flags: LoginFlags::empty(),
            }
            .encode(),
        );
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::database::account::AccountRow;
    use crate::services::directory::ServerRegistration;
    use crate::session::models::client::ids as client_ids;
    use crate::session::models::PayloadReader;
    use crate::session::models::PayloadWriter;

    fn test_session(app: Arc<App>) -> (ClientSession, PacketRx) {
        let (tx, rx) = socket::test_channel();
        let (events_tx, _events_rx) = mpsc::unbounded_channel();
        let session = ClientSession {
            id: next_session_id(),
            ip: "127.0.0.1".to_string(),
            app,
            tx,
            state: ClientState::Connected,
            epoch: ProtocolEpoch::default(),
            aes_key_iv: None,
            last_login_server_idx: 1,
            server_idx_offset: 0,
            attached: None,
            stop: Arc::new(Notify::new()),
            events_tx,
        };
        (session, rx)
    }

    fn version_packet(version: &str) -> Packet {
        let mut writer = PayloadWriter::new();
        writer.write_fixed_string(version, 20);
        Packet::new(client_ids::CA_VERSION, writer.finish())
    }

    fn account_row(account_id: AccountId) -> AccountRow {
        AccountRow {
            account_id,
            password_hash: None,
            auth_ok: true,
            age: 21,
            last_login_server_idx: 3,
            event_code: 0,
            pcbang: 0,
            server_idx_offset: 0,
            block: false,
        }
    }

    fn auth_outcome(account: &str, rows: Vec<AccountRow>, status: QueryStatus) -> QueryOutcome<AccountLookup> {
        QueryOutcome {
            status,
            rows,
            input: AccountLookupInput::new(
                account.to_string(),
                Vec::new(),
                CredentialMode::Plain,
                [0u8; 32],
            ),
        }
    }

    fn register_server(app: &App, server_idx: ServerIdx) {
        let (tx, _rx) = socket::test_channel();
        app.directory
            .register(
                ServerRegistration {
                    server_idx,
                    name: format!("world-{server_idx}"),
                    ip: "10.0.0.1".to_string(),
                    port: 4514,
                    is_adult: false,
                    screenshot_url: String::new(),
                },
                0,
                tx,
            )
            .unwrap();
    }

    /// Tests the TEST probe reports the masked user count and result 0
    #[tokio::test]
    async fn test_version_probe_count() {
        let app = App::test();
        let (mut session, mut rx) = test_session(app.clone());

        app.registry
            .try_add(NewClient {
                account: "alice".to_string(),
                account_id: 1,
                ip: "127.0.0.1".to_string(),
                age: 21,
                event_code: 0,
                pcbang: 0,
                session_id: 999,
                stop: Arc::new(Notify::new()),
            })
            .unwrap();

        session.handle_packet(version_packet("TEST")).unwrap();

        let reply = rx.recv().await.unwrap();
        assert_eq!(reply.id, client_ids::SC_RESULT);
        let mut reader = PayloadReader::new(&reply.contents);
        assert_eq!(reader.read_u16().unwrap(), client_ids::CA_VERSION);
        assert_eq!(reader.read_u16().unwrap(), 0);
        assert_eq!(reader.read_u32().unwrap(), 1 ^ PROBE_VALUE_MASK);
    }

    /// Tests the epic 2 latch engages and never reverts
    #[tokio::test]
    async fn test_epoch_latch() {
        let (mut session, _rx) = test_session(App::test());

        session.handle_packet(version_packet("9.1.0")).unwrap();
        assert_eq!(session.epoch, ProtocolEpoch::Latest);

        session.handle_packet(version_packet("200609280")).unwrap();
        assert_eq!(session.epoch, ProtocolEpoch::Epic2);

        session.handle_packet(version_packet("9.1.0")).unwrap();
        assert_eq!(session.epoch, ProtocolEpoch::Epic2);
    }

    /// Tests a successful auth result attaches the account and reports
    /// the EULA flag
    #[tokio::test]
    async fn test_auth_result_success() {
        let app = App::test();
        let (mut session, mut rx) = test_session(app.clone());
        session.state = ClientState::AuthPending;

        session.handle_event(SessionEvent::AuthResult(auth_outcome(
            "alice",
            vec![account_row(11)],
            QueryStatus::Ok,
        )));

        assert_eq!(session.state, ClientState::Authenticated);
        assert_eq!(session.attached, Some(11));
        assert_eq!(session.last_login_server_idx, 3);
        assert_eq!(app.registry.count(), 1);

        let reply = rx.recv().await.unwrap();
        assert_eq!(reply.id, client_ids::AC_RESULT);
        let mut reader = PayloadReader::new(&reply.contents);
        assert_eq!(reader.read_u16().unwrap(), client_ids::CA_ACCOUNT);
        assert_eq!(reader.read_u16().unwrap(), u16::from(ResultCode::Ok));
        assert_eq!(reader.read_u32().unwrap(), LoginFlags::EULA_ACCEPTED.bits());
    }

    /// Tests zero rows, blocked rows and failed lookups map to their
    /// result codes without touching the registry
    #[tokio::test]
    async fn test_auth_result_rejections() {
        let app = App::test();
        let (mut session, mut rx) = test_session(app.clone());

        let expectations = [
            (auth_outcome("a", Vec::new(), QueryStatus::Ok), ResultCode::NotExist),
            (
                auth_outcome("a", Vec::new(), QueryStatus::DbError),
                ResultCode::NotExist,
            ),
            (
                auth_outcome(
                    "a",
                    vec![AccountRow {
                        block: true,
                        ..account_row(1)
                    }],
                    QueryStatus::Ok,
                ),
                ResultCode::AccessDenied,
            ),
            (
                auth_outcome(
                    "a",
                    vec![AccountRow {
                        auth_ok: false,
                        ..account_row(1)
                    }],
                    QueryStatus::Ok,
                ),
                ResultCode::NotExist,
            ),
        ];

        for (outcome, expected) in expectations {
            session.handle_event(SessionEvent::AuthResult(outcome));
            let reply = rx.recv().await.unwrap();
            let mut reader = PayloadReader::new(&reply.contents);
            reader.read_u16().unwrap();
            assert_eq!(reader.read_u16().unwrap(), u16::from(expected));
            assert_eq!(app.registry.count(), 0);
            assert_eq!(session.state, ClientState::Connected);
        }
    }

    /// Tests duplicate login arbitration aborts the old auth session
    #[tokio::test]
    async fn test_auth_result_duplicate() {
        let app = App::test();
        let old_stop = Arc::new(Notify::new());
        app.registry
            .try_add(NewClient {
                account: "alice".to_string(),
                account_id: 11,
                ip: "10.0.0.9".to_string(),
                age: 21,
                event_code: 0,
                pcbang: 0,
                session_id: 999,
                stop: old_stop.clone(),
            })
            .unwrap();

        let (mut session, mut rx) = test_session(app.clone());
        session.handle_event(SessionEvent::AuthResult(auth_outcome(
            "alice",
            vec![account_row(11)],
            QueryStatus::Ok,
        )));

        let reply = rx.recv().await.unwrap();
        let mut reader = PayloadReader::new(&reply.contents);
        reader.read_u16().unwrap();
        assert_eq!(reader.read_u16().unwrap(), u16::from(ResultCode::AlreadyExist));
        assert!(session.attached.is_none());

        // The evicted session observes its stop notification
        tokio::time::timeout(std::time::Duration::from_secs(1), old_stop.notified())
            .await
            .expect("old session was not aborted");
    }

    /// Tests server list filtering end to end through the handler
    #[tokio::test]
    async fn test_server_list_filtering() {
        let app = App::test();
        for idx in [1, 5, 31, 40] {
            register_server(&app, idx);
        }

        let (mut session, mut rx) = test_session(app.clone());
        session.state = ClientState::Authenticated;
        session.attached = Some(11);
        session.server_idx_offset = 5;
        session.last_login_server_idx = 3;

        session.on_server_list().unwrap();
        let reply = rx.recv().await.unwrap();
        let mut reader = PayloadReader::new(&reply.contents);
        assert_eq!(reader.read_u16().unwrap(), 3);
        assert_eq!(reader.read_u16().unwrap(), 3, "expected servers 1, 5 and 31");

        session.server_idx_offset = 0;
        session.on_server_list().unwrap();
        let reply = rx.recv().await.unwrap();
        let mut reader = PayloadReader::new(&reply.contents);
        reader.read_u16().unwrap();
        assert_eq!(reader.read_u16().unwrap(), 2, "expected servers 1 and 5");
    }

    /// Tests the unauthenticated server list aborts the session
    #[tokio::test]
    async fn test_server_list_requires_auth() {
        let (mut session, _rx) = test_session(App::test());
        assert!(matches!(
            session.on_server_list(),
            Err(SessionError::Violation(_))
        ));
    }

    /// Tests the hand off: registry moves to the game server with the
    /// same one time key delivered to the client
    #[tokio::test]
    async fn test_select_server_hand_off() {
        let app = App::test();
        register_server(&app, 5);

        let (mut session, mut rx) = test_session(app.clone());
        let session_id = session.id;
        app.registry
            .try_add(NewClient {
                account: "bob".to_string(),
                account_id: 22,
                ip: "127.0.0.1".to_string(),
                age: 30,
                event_code: 0,
                pcbang: 0,
                session_id,
                stop: session.stop.clone(),
            })
            .unwrap();
        session.state = ClientState::Authenticated;
        session.attached = Some(22);

        let mut writer = PayloadWriter::new();
        writer.write_u16(5);
        let packet = Packet::new(client_ids::CA_SELECT_SERVER, writer.finish());
        session.handle_packet(packet).unwrap();

        assert_eq!(session.state, ClientState::HandedOff);
        assert!(session.attached.is_none());

        let reply = rx.recv().await.unwrap();
        assert_eq!(reply.id, client_ids::AC_SELECT_SERVER);
        let mut reader = PayloadReader::new(&reply.contents);
        assert_eq!(reader.read_u16().unwrap(), u16::from(ResultCode::Ok));
        let one_time_key = reader.read_u64().unwrap();

        // The delivered key is the key the game server must verify
        assert!(app
            .registry
            .confirm_client_login("bob", 5, one_time_key)
            .is_some());

        // Cleanup after hand off must not disturb the moved entry
        session.cleanup();
        assert_eq!(app.registry.count(), 1);
    }

    /// Tests the RSA variant delivers the key AES enciphered
    #[tokio::test]
    async fn test_select_server_rsa_hand_off() {
        let app = App::test();
        register_server(&app, 5);

        let (mut session, mut rx) = test_session(app.clone());
        let key_iv = crypto::generate_key_iv();
        session.aes_key_iv = Some(key_iv);
        app.registry
            .try_add(NewClient {
                account: "bob".to_string(),
                account_id: 22,
                ip: "127.0.0.1".to_string(),
                age: 30,
                event_code: 0,
                pcbang: 0,
                session_id: session.id,
                stop: session.stop.clone(),
            })
            .unwrap();
        session.state = ClientState::Authenticated;
        session.attached = Some(22);

        let mut writer = PayloadWriter::new();
        writer.write_u16(5);
        session
            .handle_packet(Packet::new(client_ids::CA_SELECT_SERVER, writer.finish()))
            .unwrap();

        let reply = rx.recv().await.unwrap();
        let mut reader = PayloadReader::new(&reply.contents);
        assert_eq!(reader.read_u16().unwrap(), u16::from(ResultCode::Ok));
        assert_eq!(reader.read_u32().unwrap(), 16);
        let encrypted = reader.read_fixed_bytes(16).unwrap();

        // The client decrypts exactly the 8 little endian key bytes
        let decrypted = crypto::aes_decrypt(&key_iv, &encrypted).unwrap();
        let one_time_key = u64::from_le_bytes(decrypted.try_into().unwrap());
        assert!(app
            .registry
            .confirm_client_login("bob", 5, one_time_key)
            .is_some());
    }

    /// Tests selecting an unknown server aborts
    #[tokio::test]
    async fn test_select_unknown_server() {
        let app = App::test();
        let (mut session, _rx) = test_session(app.clone());
        session.state = ClientState::Authenticated;
        session.attached = Some(22);

        let mut writer = PayloadWriter::new();
        writer.write_u16(9);
        let result =
            session.handle_packet(Packet::new(client_ids::CA_SELECT_SERVER, writer.finish()));
        assert!(matches!(result, Err(SessionError::Violation(_))));
    }
}
