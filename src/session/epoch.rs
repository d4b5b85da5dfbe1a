//! Protocol epochs and the epoch indexed packet dispatch tables.
//!
//! A session-wide epoch selects which wire ids (and for some replies,
//! which layouts) are in effect. Epic 2 era clients announce themselves
//! through the version handshake and keep using the legacy request ids.

use super::models::{client::ids as client_ids, game::ids as game_ids};

/// The protocol dialects spoken by clients. Once a session drops to
/// [`ProtocolEpoch::Epic2`] it never moves back up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProtocolEpoch {
    Epic2,
    Epic4,
    Epic9_1,
    #[default]
    Latest,
}

impl ProtocolEpoch {
    /// Whether this epoch uses the legacy reply layouts
    pub fn is_legacy(&self) -> bool {
        matches!(self, ProtocolEpoch::Epic2)
    }

    /// The dialect a server list reply is encoded with: epic 2 clients
    /// get the legacy layout, everyone else the 9.1 layout
    pub fn server_list_epoch(&self) -> ProtocolEpoch {
        if self.is_legacy() {
            ProtocolEpoch::Epic2
        } else {
            ProtocolEpoch::Epic9_1
        }
    }
}

/// Logical packet kinds accepted from clients
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientPacketKind {
    Version,
    RsaPublicKey,
    Account,
    ImbcAccount,
    ServerList,
    SelectServer,
}

/// Logical packet kinds accepted from game servers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GamePacketKind {
    Login,
    Logout,
    AccountList,
    ClientLogin,
    ClientLogout,
    ClientKickFailed,
    SecurityNoCheck,
}

/// Maps a wire id to the logical client packet kind for the epoch the
/// session currently speaks. Ids outside the table are unknown and get
/// dropped by the caller.
pub fn client_packet_kind(epoch: ProtocolEpoch, id: u16) -> Option<ClientPacketKind> {
    // Ids shared by every epoch
    let shared = match id {
        client_ids::CA_VERSION => Some(ClientPacketKind::Version),
        client_ids::CA_RSA_PUBLIC_KEY => Some(ClientPacketKind::RsaPublicKey),
        client_ids::CA_IMBC_ACCOUNT => Some(ClientPacketKind::ImbcAccount),
        _ => None,
    };
    if shared.is_some() {
        return shared;
    }

    match epoch {
        ProtocolEpoch::Epic2 => match id {
            client_ids::CA_ACCOUNT_EPIC2 => Some(ClientPacketKind::Account),
            client_ids::CA_SERVER_LIST_EPIC2 => Some(ClientPacketKind::ServerList),
            client_ids::CA_SELECT_SERVER_EPIC2 => Some(ClientPacketKind::SelectServer),
            _ => None,
        },
        _ => match id {
            client_ids::CA_ACCOUNT => Some(ClientPacketKind::Account),
            client_ids::CA_SERVER_LIST => Some(ClientPacketKind::ServerList),
            client_ids::CA_SELECT_SERVER => Some(ClientPacketKind::SelectServer),
            _ => None,
        },
    }
}

/// Maps a wire id to the logical game server packet kind. Game servers
/// always speak the current dialect.
pub fn game_packet_kind(id: u16) -> Option<GamePacketKind> {
    match id {
        game_ids::GA_LOGIN => Some(GamePacketKind::Login),
        game_ids::GA_LOGOUT => Some(GamePacketKind::Logout),
        game_ids::GA_ACCOUNT_LIST => Some(GamePacketKind::AccountList),
        game_ids::GA_CLIENT_LOGIN => Some(GamePacketKind::ClientLogin),
        game_ids::GA_CLIENT_LOGOUT => Some(GamePacketKind::ClientLogout),
        game_ids::GA_CLIENT_KICK_FAILED => Some(GamePacketKind::ClientKickFailed),
        game_ids::GA_SECURITY_NO_CHECK => Some(GamePacketKind::SecurityNoCheck),
        _ => None,
    }
}
