//! In-memory ban cache.
//!
//! Read-mostly mirror of the storage-side ban rows, keyed by account name or
//! IP. Refreshed whenever a handshake trips over an active ban and by
//! administrative record/clear calls.

use dashmap::DashMap;

use crate::auth::verifier;

/// One cached ban. `duration_secs == 0` or `ban_date == unban_date` marks a
/// permanent ban.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BanInfo {
    pub duration_secs: i64,
    pub ban_date: i64,
    pub unban_date: i64,
}

impl BanInfo {
    pub fn new(duration_secs: i64, ban_date: Option<i64>) -> Self {
        let ban_date = ban_date.unwrap_or_else(|| chrono::Utc::now().timestamp());
        Self {
            duration_secs,
            ban_date,
            unban_date: ban_date + duration_secs,
        }
    }

    pub fn is_permanent(&self) -> bool {
        self.duration_secs == 0 || self.ban_date == self.unban_date
    }

    pub fn is_active(&self, now: i64) -> bool {
        self.is_permanent() || self.unban_date > now
    }
}

#[derive(Default)]
pub struct BanCache {
    accounts: DashMap<String, BanInfo>,
    ips: DashMap<String, BanInfo>,
}

impl BanCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_account(&self, account_name: &str, ban: BanInfo) {
        self.accounts
            .insert(verifier::upper_only_latin(account_name), ban);
    }

    pub fn record_ip(&self, ip: &str, ban: BanInfo) {
        self.ips.insert(ip.to_string(), ban);
    }

    pub fn account(&self, account_name: &str) -> Option<BanInfo> {
        self.accounts
            .get(&verifier::upper_only_latin(account_name))
            .map(|b| *b)
    }

    pub fn ip(&self, ip: &str) -> Option<BanInfo> {
        self.ips.get(ip).map(|b| *b)
    }

    pub fn clear_account(&self, account_name: &str) {
        self.accounts.remove(&verifier::upper_only_latin(account_name));
    }

    pub fn clear_ip(&self, ip: &str) {
        self.ips.remove(ip);
    }
}
