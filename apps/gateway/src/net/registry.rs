//! Active-session registry keyed by account id.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use super::dispatch::OpcodeTable;
use super::session::Session;

#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<u32, Arc<Session>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
        }
    }

    /// Register a freshly authenticated session. If the account already has a
    /// live session the new one is rejected and returned to the caller.
    pub fn insert(&self, session: Arc<Session>) -> Result<(), Arc<Session>> {
        match self.sessions.entry(session.account_id()) {
            Entry::Vacant(slot) => {
                slot.insert(session);
                Ok(())
            }
            Entry::Occupied(_) => Err(session),
        }
    }

    pub fn remove(&self, account_id: u32) -> Option<Arc<Session>> {
        self.sessions.remove(&account_id).map(|(_, session)| session)
    }

    pub fn find(&self, account_id: u32) -> Option<Arc<Session>> {
        self.sessions.get(&account_id).map(|entry| entry.clone())
    }

    pub fn count(&self) -> usize {
        self.sessions.len()
    }

    fn snapshot(&self) -> Vec<Arc<Session>> {
        self.sessions
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Drive every session's update; sessions that report themselves dead are
    /// dropped from the registry.
    pub fn update_all(&self, table: &OpcodeTable) {
        for session in self.snapshot() {
            if !session.update(table) {
                tracing::debug!(
                    account_id = session.account_id(),
                    account = session.account_name(),
                    "removing dead session"
                );
                self.sessions.remove(&session.account_id());
            }
        }
    }

    pub fn kick_all(&self, reason: &str) {
        for session in self.snapshot() {
            session.kick(reason);
        }
    }

    /// Kick every session whose peer address matches the given IP.
    pub fn kick_by_address(&self, ip: &str, reason: &str) {
        for session in self.snapshot() {
            let session_ip = session.address().rsplit_once(':').map(|(host, _)| host);
            if session_ip == Some(ip) {
                session.kick(reason);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bot::{BotError, BotGateway, Embed};
    use crate::config::Config;
    use crate::net::connection::Connection;
    use async_trait::async_trait;
    use tokio::net::{TcpListener, TcpStream};

    struct SilentBot;

    #[async_trait]
    impl BotGateway for SilentBot {
        async fn guild_exists(&self, _guild_id: i64) -> bool {
            true
        }

        async fn resolve_channels(&self, _guild_id: i64) -> Vec<i64> {
            vec![]
        }

        async fn send_message(&self, _channel_id: i64, _content: &str) -> Result<(), BotError> {
            Ok(())
        }

        async fn send_embed(&self, _channel_id: i64, _embed: Embed) -> Result<(), BotError> {
            Ok(())
        }
    }

    async fn session_for(account_id: u32) -> (Arc<Session>, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (server, peer) = listener.accept().await.unwrap();

        let config = Config {
            bind_addr: "127.0.0.1".to_string(),
            port: 0,
            send_buffer_size: 4096,
            tcp_nodelay: false,
            update_interval_ms: 10,
            min_ping_interval_secs: 10,
            max_overspeed_pings: 5,
        };
        let (connection, _reader) = Connection::new(server, peer, &config);
        let session = Arc::new(Session::new(
            account_id,
            1,
            format!("acct{account_id}"),
            vec![],
            connection,
            Arc::new(SilentBot),
        ));
        (session, client)
    }

    #[tokio::test]
    async fn duplicate_account_insert_is_rejected() {
        let registry = SessionRegistry::new();
        let (first, _c1) = session_for(9).await;
        let (second, _c2) = session_for(9).await;

        assert!(registry.insert(first).is_ok());
        assert!(registry.insert(second).is_err());
        assert_eq!(registry.count(), 1);
    }

    #[tokio::test]
    async fn concurrent_inserts_leave_exactly_one_session() {
        let registry = Arc::new(SessionRegistry::new());

        let mut sessions = Vec::new();
        for _ in 0..8 {
            let (session, client) = session_for(42).await;
            sessions.push((session, client));
        }

        let mut tasks = Vec::new();
        for (session, _client) in &sessions {
            let registry = registry.clone();
            let session = session.clone();
            tasks.push(tokio::spawn(
                async move { registry.insert(session).is_ok() },
            ));
        }

        let mut accepted = 0;
        for task in tasks {
            if task.await.unwrap() {
                accepted += 1;
            }
        }
        assert_eq!(accepted, 1);
        assert_eq!(registry.count(), 1);
    }

    #[tokio::test]
    async fn remove_and_find_by_account_id() {
        let registry = SessionRegistry::new();
        let (session, _client) = session_for(3).await;
        registry.insert(session).unwrap();

        assert!(registry.find(3).is_some());
        assert!(registry.find(4).is_none());

        let removed = registry.remove(3).unwrap();
        assert_eq!(removed.account_id(), 3);
        assert_eq!(registry.count(), 0);
    }

    #[tokio::test]
    async fn kick_by_address_matches_the_ip_only() {
        let registry = SessionRegistry::new();
        let (a, _ca) = session_for(1).await;
        let (b, _cb) = session_for(2).await;
        registry.insert(a.clone()).unwrap();
        registry.insert(b.clone()).unwrap();

        registry.kick_by_address("127.0.0.1", "ip ban");
        assert!(a.is_kicked());
        assert!(b.is_kicked());

        registry.kick_by_address("10.0.0.1", "no match");
        assert_eq!(registry.count(), 2);
    }

    #[tokio::test]
    async fn update_all_drops_sessions_without_a_connection() {
        let registry = SessionRegistry::new();
        let (session, _client) = session_for(5).await;
        registry.insert(session.clone()).unwrap();

        let table = OpcodeTable::new();
        registry.update_all(&table);
        assert_eq!(registry.count(), 1);

        session.kick("bye");
        registry.update_all(&table);
        assert_eq!(registry.count(), 0);
    }
}
