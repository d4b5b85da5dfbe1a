//! Packet models for the game server facing listener

use super::{DecodeError, PayloadReader, PayloadWriter, ResultCode};
use crate::session::packet::Packet;
use crate::utils::types::{AccountId, OneTimeKey, ServerIdx};

/// Game server to auth packet ids
pub mod ids {
    pub const GA_LOGIN: u16 = 20001;
    pub const AG_LOGIN_RESULT: u16 = 20002;
    pub const GA_CLIENT_LOGIN: u16 = 20010;
    pub const AG_CLIENT_LOGIN: u16 = 20011;
    pub const GA_CLIENT_LOGOUT: u16 = 20012;
    pub const AG_KICK_CLIENT: u16 = 20013;
    pub const GA_CLIENT_KICK_FAILED: u16 = 20014;
    pub const GA_ACCOUNT_LIST: u16 = 20015;
    pub const GA_LOGOUT: u16 = 20020;
    pub const GA_SECURITY_NO_CHECK: u16 = 20021;
    pub const AG_SECURITY_NO_CHECK: u16 = 20022;
}

/// Width of account and security number fields
const ACCOUNT_FIELD: usize = 61;
/// Width of the server name field
const NAME_FIELD: usize = 21;
/// Width of the screenshot URL field
const URL_FIELD: usize = 256;
/// Width of advertised IP fields
const IP_FIELD: usize = 16;

/// Base payload length of the registration packet
const LOGIN_LENGTH: usize = 2 + NAME_FIELD + URL_FIELD + 1 + IP_FIELD + 2;
/// Registration payload carrying the reconnect guid
const LOGIN_GUID_LENGTH: usize = LOGIN_LENGTH + 16;

/// Per account block length inside the account list
const ACCOUNT_INFO_LENGTH: usize = ACCOUNT_FIELD + 4 + 1 + 4 + 4 + IP_FIELD;

/// Game server registration request. The newer layout appends a 16
/// byte guid, which also opts the session into the extended client
/// login replies.
pub struct ServerLogin {
    pub server_idx: ServerIdx,
    pub name: String,
    pub screenshot_url: String,
    pub is_adult: bool,
    pub ip: String,
    pub port: u16,
    pub guid: Option<[u8; 16]>,
}

impl ServerLogin {
    pub fn decode(packet: &Packet) -> Result<Self, DecodeError> {
        let with_guid = match packet.contents.len() {
            LOGIN_LENGTH => false,
            LOGIN_GUID_LENGTH => true,
            size => {
                return Err(DecodeError::UnknownLayout {
                    id: packet.id,
                    size,
                })
            }
        };

        let mut reader = PayloadReader::new(&packet.contents);
        let server_idx = reader.read_u16()?;
        let name = reader.read_fixed_string(NAME_FIELD)?;
        let screenshot_url = reader.read_fixed_string(URL_FIELD)?;
        let is_adult = reader.read_u8()? != 0;
        let ip = reader.read_fixed_string(IP_FIELD)?;
        let port = reader.read_u16()?;
        let guid = if with_guid {
            let mut guid = [0u8; 16];
            guid.copy_from_slice(&reader.read_fixed_bytes(16)?);
            Some(guid)
        } else {
            None
        };

        Ok(Self {
            server_idx,
            name,
            screenshot_url,
            is_adult,
            ip,
            port,
            guid,
        })
    }

    #[cfg(test)]
    pub fn encode(&self) -> Packet {
        let mut writer = PayloadWriter::new();
        writer.write_u16(self.server_idx);
        writer.write_fixed_string(&self.name, NAME_FIELD);
        writer.write_fixed_string(&self.screenshot_url, URL_FIELD);
        writer.write_u8(self.is_adult as u8);
        writer.write_fixed_string(&self.ip, IP_FIELD);
        writer.write_u16(self.port);
        if let Some(guid) = &self.guid {
            writer.write_fixed_bytes(guid, 16);
        }
        Packet::new(ids::GA_LOGIN, writer.finish())
    }
}

/// Registration outcome
pub struct ServerLoginResult {
    pub result: ResultCode,
}

impl ServerLoginResult {
    pub fn encode(&self) -> Packet {
        let mut writer = PayloadWriter::new();
        writer.write_u16(self.result.into());
        Packet::new(ids::AG_LOGIN_RESULT, writer.finish())
    }
}

/// One account the game server believes is connected to it. The
/// profile fields ride along for the buffered retry path even though
/// reconciliation only keys on the name.
#[allow(unused)]
pub struct AccountInfo {
    pub account: String,
    pub account_id: AccountId,
    pub age: u8,
    pub event_code: u32,
    pub pcbang: u32,
    pub ip: String,
}

/// Reconciliation of the accounts connected to a game server, possibly
/// split over several batches
pub struct AccountList {
    pub final_packet: bool,
    pub accounts: Vec<AccountInfo>,
}

impl AccountList {
    pub fn decode(packet: &Packet) -> Result<Self, DecodeError> {
        let mut reader = PayloadReader::new(&packet.contents);
        let final_packet = reader.read_u8()? != 0;
        let count = reader.read_u16()? as usize;

        if reader.remaining() != count * ACCOUNT_INFO_LENGTH {
            return Err(DecodeError::UnknownLayout {
                id: packet.id,
                size: packet.contents.len(),
            });
        }

        let mut accounts = Vec::with_capacity(count);
        for _ in 0..count {
            accounts.push(AccountInfo {
                account: reader.read_fixed_string(ACCOUNT_FIELD)?,
                account_id: reader.read_u32()?,
                age: reader.read_u8()?,
                event_code: reader.read_u32()?,
                pcbang: reader.read_u32()?,
                ip: reader.read_fixed_string(IP_FIELD)?,
            });
        }

        Ok(Self {
            final_packet,
            accounts,
        })
    }

    #[cfg(test)]
    pub fn encode(&self) -> Packet {
        let mut writer = PayloadWriter::new();
        writer.write_u8(self.final_packet as u8);
        writer.write_u16(self.accounts.len() as u16);
        for info in &self.accounts {
            writer.write_fixed_string(&info.account, ACCOUNT_FIELD);
            writer.write_u32(info.account_id);
            writer.write_u8(info.age);
            writer.write_u32(info.event_code);
            writer.write_u32(info.pcbang);
            writer.write_fixed_string(&info.ip, IP_FIELD);
        }
        Packet::new(ids::GA_ACCOUNT_LIST, writer.finish())
    }
}

/// Game server reporting a client arriving with a one time key
pub struct ClientLogin {
    pub account: String,
    pub one_time_key: OneTimeKey,
}

impl ClientLogin {
    pub fn decode(packet: &Packet) -> Result<Self, DecodeError> {
        let mut reader = PayloadReader::new(&packet.contents);
        Ok(Self {
            account: reader.read_fixed_string(ACCOUNT_FIELD)?,
            one_time_key: reader.read_u64()?,
        })
    }
}

/// Profile delivered back for a verified client login. The extended
/// layout is used for sessions registered with the guid layout.
pub struct ClientLoginResult {
    pub account: String,
    pub result: ResultCode,
    pub account_id: AccountId,
    pub age: u8,
    pub event_code: u32,
    pub pcbang: u32,
    pub ip: String,
    pub server_idx: ServerIdx,
}

impl ClientLoginResult {
    pub fn encode(&self, extended: bool) -> Packet {
        let mut writer = PayloadWriter::new();
        writer.write_fixed_string(&self.account, ACCOUNT_FIELD);
        writer.write_u16(self.result.into());
        writer.write_u32(self.account_id);
        writer.write_u8(self.age);
        writer.write_u32(self.event_code);
        writer.write_u32(self.pcbang);
        if extended {
            writer.write_fixed_string(&self.ip, IP_FIELD);
            writer.write_u16(self.server_idx);
        }
        Packet::new(ids::AG_CLIENT_LOGIN, writer.finish())
    }

    /// Rejection carrying only the echoed account name
    pub fn denied(account: String) -> Self {
        Self {
            account,
            result: ResultCode::AccessDenied,
            account_id: 0,
            age: 0,
            event_code: 0,
            pcbang: 0,
            ip: String::new(),
            server_idx: 0,
        }
    }
}

/// Single account name payload shared by logout, kick and kick-failed
pub struct AccountName {
    pub account: String,
}

impl AccountName {
    pub fn decode(packet: &Packet) -> Result<Self, DecodeError> {
        let mut reader = PayloadReader::new(&packet.contents);
        Ok(Self {
            account: reader.read_fixed_string(ACCOUNT_FIELD)?,
        })
    }

    pub fn encode(&self, id: u16) -> Packet {
        let mut writer = PayloadWriter::new();
        writer.write_fixed_string(&self.account, ACCOUNT_FIELD);
        Packet::new(id, writer.finish())
    }
}

/// Security number validation request relayed from a game server
pub struct SecurityNoCheck {
    pub account: String,
    pub security_no: String,
    pub mode: u32,
}

impl SecurityNoCheck {
    pub fn decode(packet: &Packet) -> Result<Self, DecodeError> {
        let mut reader = PayloadReader::new(&packet.contents);
        Ok(Self {
            account: reader.read_fixed_string(ACCOUNT_FIELD)?,
            security_no: reader.read_fixed_string(ACCOUNT_FIELD)?,
            mode: reader.read_u32()?,
        })
    }
}

/// Security number validation outcome
pub struct SecurityNoCheckResult {
    pub account: String,
    pub result: ResultCode,
    pub mode: u32,
}

impl SecurityNoCheckResult {
    pub fn encode(&self) -> Packet {
        let mut writer = PayloadWriter::new();
        writer.write_fixed_string(&self.account, ACCOUNT_FIELD);
        writer.write_u16(self.result.into());
        writer.write_u32(self.mode);
        Packet::new(ids::AG_SECURITY_NO_CHECK, writer.finish())
    }
}
