pub mod auth;
pub mod bans;
pub mod bot;
pub mod config;
pub mod handlers;
pub mod net;
pub mod storage;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bans::BanCache;
use bot::BotGateway;
use config::Config;
use net::dispatch::OpcodeTable;
use net::registry::SessionRegistry;
use storage::AccountStore;

/// Shared state handed to every connection and tick task.
#[derive(Clone)]
pub struct GatewayState {
    pub config: Arc<Config>,
    pub storage: Arc<dyn AccountStore>,
    pub bot: Arc<dyn BotGateway>,
    pub sessions: Arc<SessionRegistry>,
    pub bans: Arc<BanCache>,
    pub opcodes: Arc<OpcodeTable>,
    closed: Arc<AtomicBool>,
}

impl GatewayState {
    pub fn new(config: Config, storage: Arc<dyn AccountStore>, bot: Arc<dyn BotGateway>) -> Self {
        Self {
            config: Arc::new(config),
            storage,
            bot,
            sessions: Arc::new(SessionRegistry::new()),
            bans: Arc::new(BanCache::new()),
            opcodes: Arc::new(OpcodeTable::new()),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Draining/shutting down: no new logins are accepted.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn set_closed(&self, closed: bool) {
        self.closed.store(closed, Ordering::SeqCst);
    }
}
