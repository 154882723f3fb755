//! Abstraction over the credential/ban store.
//!
//! Backed by a relational database in production (prepared, parameterized
//! statements) and an in-memory map in tests and standalone runs.

use async_trait::async_trait;
use dashmap::DashMap;

use crate::auth::verifier::{self, SALT_LENGTH, VERIFIER_LENGTH};

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// One account row, left-joined with its active ban row (if any).
#[derive(Debug, Clone)]
pub struct AccountRow {
    pub id: u32,
    pub salt: [u8; SALT_LENGTH],
    pub verifier: [u8; VERIFIER_LENGTH],
    pub guild_id: i64,
    pub realm_name: String,
    pub last_ip: String,
    pub core_name: String,
    pub module_version: u32,
    /// Unix timestamp the active ban was issued, if one exists.
    pub ban_date: Option<i64>,
    /// Unix timestamp the active ban lifts; equal to `ban_date` for a
    /// permanent ban.
    pub unban_date: Option<i64>,
}

/// Result of the IP ban lookup performed before any frame is read.
#[derive(Debug, Clone, Copy, Default)]
pub struct IpBanStatus {
    pub is_banned: bool,
    pub is_permanent: bool,
}

#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Look up an account by (case-normalized) name.
    async fn account_by_name(&self, name: &str) -> Result<Option<AccountRow>, StorageError>;

    /// Check whether an IP has an active ban.
    async fn ip_ban_status(&self, ip: &str) -> Result<IpBanStatus, StorageError>;

    /// Record a successful login: refresh the account's last-seen IP.
    async fn touch_login(&self, account_id: u32, ip: &str) -> Result<(), StorageError>;
}

// ---------------------------------------------------------------------------
// In-memory implementation (tests / standalone)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
struct IpBanRow {
    ban_date: i64,
    unban_date: i64,
}

pub struct MemoryAccountStore {
    accounts: DashMap<String, AccountRow>,
    ip_bans: DashMap<String, IpBanRow>,
    next_id: std::sync::atomic::AtomicU32,
}

impl MemoryAccountStore {
    pub fn new() -> Self {
        Self {
            accounts: DashMap::new(),
            ip_bans: DashMap::new(),
            next_id: std::sync::atomic::AtomicU32::new(1),
        }
    }

    /// Seed an account with a fresh salt and a verifier derived from `key`.
    /// Returns the assigned account id.
    pub fn insert_account(&self, name: &str, key: &str, guild_id: i64) -> u32 {
        let id = self
            .next_id
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        let salt = verifier::generate_salt();
        let row = AccountRow {
            id,
            salt,
            verifier: verifier::compute_verifier(name, key, &salt),
            guild_id,
            realm_name: String::new(),
            last_ip: String::new(),
            core_name: String::new(),
            module_version: 0,
            ban_date: None,
            unban_date: None,
        };
        self.accounts.insert(verifier::upper_only_latin(name), row);
        id
    }

    /// Attach an active ban to a seeded account. `unban_date == ban_date`
    /// marks the ban permanent.
    pub fn ban_account(&self, name: &str, ban_date: i64, unban_date: i64) {
        if let Some(mut row) = self.accounts.get_mut(&verifier::upper_only_latin(name)) {
            row.ban_date = Some(ban_date);
            row.unban_date = Some(unban_date);
        }
    }

    pub fn ban_ip(&self, ip: &str, ban_date: i64, unban_date: i64) {
        self.ip_bans.insert(
            ip.to_string(),
            IpBanRow {
                ban_date,
                unban_date,
            },
        );
    }
}

impl Default for MemoryAccountStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AccountStore for MemoryAccountStore {
    async fn account_by_name(&self, name: &str) -> Result<Option<AccountRow>, StorageError> {
        Ok(self
            .accounts
            .get(&verifier::upper_only_latin(name))
            .map(|row| row.clone()))
    }

    async fn ip_ban_status(&self, ip: &str) -> Result<IpBanStatus, StorageError> {
        let Some(row) = self.ip_bans.get(ip) else {
            return Ok(IpBanStatus::default());
        };
        let now = chrono::Utc::now().timestamp();
        let is_permanent = row.unban_date == row.ban_date;
        Ok(IpBanStatus {
            is_banned: is_permanent || row.unban_date > now,
            is_permanent,
        })
    }

    async fn touch_login(&self, account_id: u32, ip: &str) -> Result<(), StorageError> {
        for mut entry in self.accounts.iter_mut() {
            if entry.id == account_id {
                entry.last_ip = ip.to_string();
                break;
            }
        }
        Ok(())
    }
}
