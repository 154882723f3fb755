//! The authentication handshake.
//!
//! A strict sequential pipeline: account lookup → ban checks → server state →
//! verifier check → bot guild check → channel resolution. The first failing
//! stage short-circuits the rest and maps to one specific
//! [`AuthResponseCode`]; the connection sends that code and closes. The
//! pipeline itself never touches the socket, so every stage is testable with
//! mocked collaborators.

pub mod verifier;

use crosslink_common::opcodes::{AuthResponseCode, CHANNEL_TYPES_COUNT};
use crosslink_common::packet::{Packet, PacketError};

use crate::bans::{BanCache, BanInfo};
use crate::bot::BotGateway;
use crate::storage::{AccountRow, AccountStore};

/// Handshake scratch state parsed from a `CLIENT_AUTH_SESSION` frame.
#[derive(Debug, Clone)]
pub struct AuthRequest {
    pub account: String,
    pub key: String,
    pub core_name: String,
    pub core_version: String,
    pub module_version: u32,
}

impl AuthRequest {
    pub fn parse(packet: &mut Packet) -> Result<Self, PacketError> {
        Ok(Self {
            account: packet.read_string()?,
            key: packet.read_string()?,
            core_name: packet.read_string()?,
            core_version: packet.read_string()?,
            module_version: packet.read_u32()?,
        })
    }
}

/// Account facts computed once per handshake from a single storage row.
#[derive(Debug, Clone)]
pub struct AccountInfo {
    pub id: u32,
    pub guild_id: i64,
    pub realm_name: String,
    pub ban_date: i64,
    pub unban_date: i64,
    pub is_banned: bool,
    pub is_permanently_banned: bool,
    salt: [u8; verifier::SALT_LENGTH],
    verifier: [u8; verifier::VERIFIER_LENGTH],
}

impl AccountInfo {
    pub fn from_row(row: AccountRow, now: i64) -> Self {
        let ban_date = row.ban_date.unwrap_or(0);
        let unban_date = row.unban_date.unwrap_or(0);
        Self {
            id: row.id,
            guild_id: row.guild_id,
            realm_name: row.realm_name,
            ban_date,
            unban_date,
            // A populated unban date in the past means the ban expired.
            is_banned: unban_date > 0 && unban_date > now,
            is_permanently_banned: ban_date > 0 && ban_date == unban_date,
            salt: row.salt,
            verifier: row.verifier,
        }
    }

    pub fn check_key(&self, account_name: &str, key: &str) -> bool {
        verifier::check_login(account_name, key, &self.salt, &self.verifier)
    }
}

/// Collaborators the handshake consults.
pub struct AuthContext<'a> {
    pub storage: &'a dyn AccountStore,
    pub bot: &'a dyn BotGateway,
    pub bans: &'a BanCache,
    /// Server closed/draining: no new logins accepted.
    pub closed: bool,
}

#[derive(Debug)]
pub enum AuthOutcome {
    Failure(AuthResponseCode),
    Success {
        account: AccountInfo,
        channels: Vec<i64>,
    },
}

/// Run the handshake pipeline for one parsed auth request.
pub async fn authenticate(
    ctx: AuthContext<'_>,
    request: &AuthRequest,
    remote_ip: &str,
) -> AuthOutcome {
    let row = match ctx.storage.account_by_name(&request.account).await {
        Ok(Some(row)) => row,
        Ok(None) => {
            tracing::error!(remote_ip, "auth rejected: unknown account");
            return AuthOutcome::Failure(AuthResponseCode::UnknownAccount);
        }
        Err(e) => {
            tracing::error!(remote_ip, error = %e, "auth rejected: account lookup failed");
            return AuthOutcome::Failure(AuthResponseCode::Failed);
        }
    };

    let now = chrono::Utc::now().timestamp();
    let account = AccountInfo::from_row(row, now);

    if account.is_permanently_banned {
        tracing::error!(
            account = %request.account,
            "auth rejected: account permanently banned"
        );
        ctx.bans
            .record_account(&request.account, BanInfo::new(0, Some(account.ban_date)));
        return AuthOutcome::Failure(AuthResponseCode::BannedPermanentlyAccount);
    }

    if account.is_banned {
        tracing::error!(account = %request.account, "auth rejected: account banned");
        ctx.bans.record_account(
            &request.account,
            BanInfo::new(account.unban_date - now, Some(account.ban_date)),
        );
        return AuthOutcome::Failure(AuthResponseCode::BannedAccount);
    }

    if ctx.closed {
        tracing::error!(remote_ip, "auth rejected: server is closed");
        return AuthOutcome::Failure(AuthResponseCode::ServerOffline);
    }

    if !account.check_key(&request.account, &request.key) {
        tracing::error!(account = %request.account, "auth rejected: incorrect key");
        return AuthOutcome::Failure(AuthResponseCode::IncorrectKey);
    }

    if !ctx.bot.guild_exists(account.guild_id).await {
        tracing::error!(
            account = %request.account,
            guild_id = account.guild_id,
            "auth rejected: bot not in guild"
        );
        return AuthOutcome::Failure(AuthResponseCode::BotNotFound);
    }

    let channels = ctx.bot.resolve_channels(account.guild_id).await;
    if channels.is_empty() {
        tracing::error!(
            account = %request.account,
            guild_id = account.guild_id,
            "auth rejected: no channels resolved"
        );
        return AuthOutcome::Failure(AuthResponseCode::ChannelsNotFound);
    }
    if channels.len() != CHANNEL_TYPES_COUNT {
        tracing::error!(
            account = %request.account,
            guild_id = account.guild_id,
            resolved = channels.len(),
            expected = CHANNEL_TYPES_COUNT,
            "auth rejected: wrong channel count"
        );
        return AuthOutcome::Failure(AuthResponseCode::ChannelsIncorrect);
    }

    AuthOutcome::Success { account, channels }
}
