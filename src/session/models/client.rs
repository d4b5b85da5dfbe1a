//! Packet models for the client facing listener

use super::{DecodeError, LoginFlags, PayloadReader, PayloadWriter, ResultCode};
use crate::session::epoch::ProtocolEpoch;
use crate::session::packet::Packet;
use crate::utils::types::ServerIdx;

/// Client to auth packet ids (canonical epoch)
pub mod ids {
    /// Version probe reply
    pub const SC_RESULT: u16 = 0;
    pub const CA_RSA_PUBLIC_KEY: u16 = 71;
    pub const AC_AES_KEY_IV: u16 = 72;
    pub const AC_RESULT: u16 = 10000;
    pub const CA_VERSION: u16 = 10001;
    pub const CA_ACCOUNT: u16 = 10010;
    pub const CA_IMBC_ACCOUNT: u16 = 10012;
    pub const CA_SERVER_LIST: u16 = 10021;
    pub const AC_SERVER_LIST: u16 = 10022;
    pub const CA_SELECT_SERVER: u16 = 10023;
    pub const AC_SELECT_SERVER: u16 = 10024;

    /// Legacy request ids still used by epic 2 era clients
    pub const CA_ACCOUNT_EPIC2: u16 = 10002;
    pub const CA_SERVER_LIST_EPIC2: u16 = 10004;
    pub const CA_SELECT_SERVER_EPIC2: u16 = 10006;
}

/// Width of the version literal field
const VERSION_FIELD: usize = 20;
/// Width of account / password fields in the long layouts
const LONG_FIELD: usize = 61;
/// Account field width in the short (epic 4 era) layout
const SHORT_ACCOUNT_FIELD: usize = 19;
/// Password field width in the short layout
const SHORT_PASSWORD_FIELD: usize = 32;
/// Capacity of the RSA enciphered password block
const RSA_PASSWORD_FIELD: usize = 64;

/// Payload length of the short credential layout
const SHORT_LAYOUT_LENGTH: usize = SHORT_ACCOUNT_FIELD + SHORT_PASSWORD_FIELD;
/// Payload length of the long credential layout
const LONG_LAYOUT_LENGTH: usize = LONG_FIELD * 2;

/// The version probe sent first by most clients
pub struct VersionProbe {
    pub version: String,
}

impl VersionProbe {
    pub fn decode(packet: &Packet) -> Result<Self, DecodeError> {
        let mut reader = PayloadReader::new(&packet.contents);
        Ok(Self {
            version: reader.read_fixed_string(VERSION_FIELD)?,
        })
    }
}

/// Reply to the `TEST` / `INFO` version probes
pub struct ProbeResult {
    pub request_msg_id: u16,
    pub result: u16,
    pub value: u32,
}

impl ProbeResult {
    pub fn encode(&self) -> Packet {
        let mut writer = PayloadWriter::new();
        writer.write_u16(self.request_msg_id);
        writer.write_u16(self.result);
        writer.write_u32(self.value);
        Packet::new(ids::SC_RESULT, writer.finish())
    }
}

/// Client supplied RSA public key enabling the AES credential path
pub struct RsaPublicKey {
    pub key_pem: Vec<u8>,
}

impl RsaPublicKey {
    /// Decodes the key blob. The declared key size must account for
    /// every remaining payload byte or the packet is malformed.
    pub fn decode(packet: &Packet) -> Result<Self, DecodeError> {
        let mut reader = PayloadReader::new(&packet.contents);
        let key_size = reader.read_u32()? as usize;
        if key_size != reader.remaining() {
            return Err(DecodeError::UnknownLayout {
                id: ids::CA_RSA_PUBLIC_KEY,
                size: packet.contents.len(),
            });
        }
        Ok(Self {
            key_pem: reader.read_remaining().to_vec(),
        })
    }
}

/// RSA enciphered AES key material reply
pub struct AesKeyIv<'a> {
    pub encrypted: &'a [u8],
}

impl AesKeyIv<'_> {
    pub fn encode(&self) -> Packet {
        let mut writer = PayloadWriter::new();
        writer.write_u32(self.encrypted.len() as u32);
        writer.write_bytes(self.encrypted);
        Packet::new(ids::AC_AES_KEY_IV, writer.finish())
    }
}

/// Which of the coexisting credential layouts a login packet used
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialLayout {
    /// RSA handshake done: length prefixed AES enciphered password
    Rsa,
    /// Long fixed width layout
    Long,
    /// Short fixed width layout used by epic 4 era clients
    Short,
}

/// A decoded login request (regular or IMBC path)
pub struct Credentials {
    pub account: String,
    pub password: Vec<u8>,
    pub layout: CredentialLayout,
}

impl Credentials {
    /// Decodes a credential packet. The layout is discriminated by the
    /// session RSA state first and the payload size second; any other
    /// size fails closed.
    pub fn decode(packet: &Packet, rsa_session: bool) -> Result<Self, DecodeError> {
        let mut reader = PayloadReader::new(&packet.contents);

        if rsa_session {
            let account = reader.read_fixed_string(LONG_FIELD)?;
            let password = reader.read_sized_bytes(RSA_PASSWORD_FIELD)?;
            return Ok(Self {
                account,
                password,
                layout: CredentialLayout::Rsa,
            });
        }

        match packet.contents.len() {
            SHORT_LAYOUT_LENGTH => Ok(Self {
                account: reader.read_fixed_string(SHORT_ACCOUNT_FIELD)?,
                password: reader.read_fixed_bytes(SHORT_PASSWORD_FIELD)?,
                layout: CredentialLayout::Short,
            }),
            LONG_LAYOUT_LENGTH => Ok(Self {
                account: reader.read_fixed_string(LONG_FIELD)?,
                password: reader.read_fixed_bytes(LONG_FIELD)?,
                layout: CredentialLayout::Long,
            }),
            size => Err(DecodeError::UnknownLayout {
                id: packet.id,
                size,
            }),
        }
    }
}

/// Login outcome reply
pub struct AuthResult {
    pub result: ResultCode,
    pub login_flags: LoginFlags,
}

impl AuthResult {
    pub fn encode(&self) -> Packet {
        let mut writer = PayloadWriter::new();
        // Both credential paths echo the canonical account request id
        writer.write_u16(ids::CA_ACCOUNT);
        writer.write_u16(self.result.into());
        writer.write_u32(self.login_flags.bits());
        Packet::new(ids::AC_RESULT, writer.finish())
    }
}

/// One advertised game server inside the server list reply
pub struct ServerListEntry {
    pub server_idx: ServerIdx,
    pub name: String,
    pub screenshot_url: String,
    pub is_adult: bool,
    pub ip: String,
    pub port: u16,
    /// Occupancy percentage, saturated at 100
    pub user_ratio: u16,
}

/// The filtered server list reply. The epic 2 era layout drops the
/// adult flag and screenshot URL fields.
pub struct ServerList {
    pub last_login_server_idx: ServerIdx,
    pub servers: Vec<ServerListEntry>,
}

impl ServerList {
    pub fn encode(&self, epoch: ProtocolEpoch) -> Packet {
        let legacy_layout = epoch.is_legacy();
        let mut writer = PayloadWriter::new();
        writer.write_u16(self.last_login_server_idx);
        writer.write_u16(self.servers.len() as u16);
        for server in &self.servers {
            writer.write_u16(server.server_idx);
            writer.write_fixed_string(&server.name, 21);
            if !legacy_layout {
                writer.write_fixed_string(&server.screenshot_url, 256);
                writer.write_u8(server.is_adult as u8);
            }
            writer.write_fixed_string(&server.ip, 16);
            writer.write_u16(server.port);
            writer.write_u16(server.user_ratio);
        }
        Packet::new(ids::AC_SERVER_LIST, writer.finish())
    }
}

/// Server choice sent by an authenticated client
pub struct SelectServer {
    pub server_idx: ServerIdx,
}

impl SelectServer {
    pub fn decode(packet: &Packet) -> Result<Self, DecodeError> {
        let mut reader = PayloadReader::new(&packet.contents);
        Ok(Self {
            server_idx: reader.read_u16()?,
        })
    }
}

/// Hand-off reply carrying the one time key in the clear
pub struct SelectServerResult {
    pub result: ResultCode,
    pub one_time_key: u64,
    pub pending_time: u32,
}

impl SelectServerResult {
    pub fn encode(&self) -> Packet {
        let mut writer = PayloadWriter::new();
        writer.write_u16(self.result.into());
        writer.write_u64(self.one_time_key);
        writer.write_u32(self.pending_time);
        Packet::new(ids::AC_SELECT_SERVER, writer.finish())
    }
}

/// Hand-off reply carrying the one time key AES enciphered for RSA
/// sessions. The encrypted block is always a single padded AES block.
pub struct SelectServerRsaResult {
    pub result: ResultCode,
    pub encrypted_key: [u8; 16],
    pub pending_time: u32,
}

impl SelectServerRsaResult {
    pub fn encode(&self) -> Packet {
        let mut writer = PayloadWriter::new();
        writer.write_u16(self.result.into());
        writer.write_u32(self.encrypted_key.len() as u32);
        writer.write_bytes(&self.encrypted_key);
        writer.write_u32(self.pending_time);
        Packet::new(ids::AC_SELECT_SERVER, writer.finish())
    }
}
