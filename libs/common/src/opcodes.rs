//! Opcode and status-code definitions shared by the gateway and its clients.

/// The null opcode. Never valid on the wire; sending it is a logged error.
pub const NULL_OPCODE: u16 = 0x0000;

/// Number of defined opcodes; valid opcodes are `1..NUM_OPCODES`.
pub const NUM_OPCODES: u16 = 8;

/// Wire opcodes. Client-originated first, then server-originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum Opcode {
    // Client
    Hello = 1,
    AuthSession = 2,
    SendMessage = 3,
    SendEmbed = 4,
    Ping = 5,

    // Server
    AuthResponse = 6,
    Pong = 7,
}

impl Opcode {
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            1 => Some(Self::Hello),
            2 => Some(Self::AuthSession),
            3 => Some(Self::SendMessage),
            4 => Some(Self::SendEmbed),
            5 => Some(Self::Ping),
            6 => Some(Self::AuthResponse),
            7 => Some(Self::Pong),
            _ => None,
        }
    }

    /// Display name used in protocol logs.
    pub fn name(value: u16) -> &'static str {
        match Self::from_u16(value) {
            Some(Self::Hello) => "CLIENT_SEND_HELLO",
            Some(Self::AuthSession) => "CLIENT_AUTH_SESSION",
            Some(Self::SendMessage) => "CLIENT_SEND_MESSAGE",
            Some(Self::SendEmbed) => "CLIENT_SEND_EMBED",
            Some(Self::Ping) => "CLIENT_SEND_PING",
            Some(Self::AuthResponse) => "SERVER_AUTH_RESPONSE",
            Some(Self::Pong) => "SERVER_SEND_PONG",
            None => {
                if value < NUM_OPCODES {
                    "UNKNOWN_OPCODE"
                } else {
                    "INVALID_OPCODE"
                }
            }
        }
    }
}

/// Result code carried by `SERVER_AUTH_RESPONSE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AuthResponseCode {
    Ok = 0,
    Failed = 1,
    UnknownAccount = 2,
    BannedAccount = 3,
    BannedPermanentlyAccount = 4,
    IncorrectKey = 5,
    ServerOffline = 6,
    BotNotFound = 7,
    ChannelsNotFound = 8,
    ChannelsIncorrect = 9,
    BannedIp = 10,
    BannedPermanentlyIp = 11,
}

/// Channel categories a guild must expose. The resolved channel list handed to
/// a session is indexed by this selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ChannelType {
    General = 0,
    ServerStatus = 1,
    Chat = 2,
    Trade = 3,
    Events = 4,
    Logins = 5,
    Admin = 6,
}

/// Number of channel types a correctly configured guild resolves to.
pub const CHANNEL_TYPES_COUNT: usize = 7;

impl ChannelType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::General),
            1 => Some(Self::ServerStatus),
            2 => Some(Self::Chat),
            3 => Some(Self::Trade),
            4 => Some(Self::Events),
            5 => Some(Self::Logins),
            6 => Some(Self::Admin),
            _ => None,
        }
    }
}
