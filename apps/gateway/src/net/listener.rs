//! TCP accept loop and the shared update tick.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::net::TcpListener;

use super::connection::Connection;
use crate::GatewayState;

/// Tracks every live connection so the tick can flush outbound queues and
/// drop the dead ones.
#[derive(Default)]
pub struct ConnectionManager {
    connections: Mutex<Vec<Arc<Connection>>>,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, connection: Arc<Connection>) {
        self.connections.lock().push(connection);
    }

    pub fn count(&self) -> usize {
        self.connections.lock().len()
    }

    /// Flush every connection; forget the ones that have closed.
    pub async fn update(&self) {
        let snapshot: Vec<Arc<Connection>> = self.connections.lock().clone();

        let mut dead = Vec::new();
        for connection in &snapshot {
            if !connection.update().await {
                dead.push(connection.address());
            }
        }

        if !dead.is_empty() {
            self.connections
                .lock()
                .retain(|c| !dead.contains(&c.address()));
        }
    }
}

/// Bind the listener and serve until the accept loop fails or the task is
/// dropped.
pub async fn run(state: GatewayState) -> std::io::Result<()> {
    let bind = format!("{}:{}", state.config.bind_addr, state.config.port);
    let listener = TcpListener::bind(&bind).await?;
    tracing::info!(%bind, "gateway listening");
    serve(listener, state).await
}

/// Accept connections on an already-bound listener. Spawns the update tick
/// that drives connections and sessions.
pub async fn serve(listener: TcpListener, state: GatewayState) -> std::io::Result<()> {
    let manager = Arc::new(ConnectionManager::new());

    let tick_manager = manager.clone();
    let tick_state = state.clone();
    tokio::spawn(async move {
        let mut interval =
            tokio::time::interval(Duration::from_millis(tick_state.config.update_interval_ms));
        loop {
            interval.tick().await;
            tick_manager.update().await;
            tick_state.sessions.update_all(&tick_state.opcodes);
        }
    });

    loop {
        let (stream, address) = listener.accept().await?;
        if state.config.tcp_nodelay {
            if let Err(e) = stream.set_nodelay(true) {
                tracing::warn!(%address, error = %e, "failed to set TCP_NODELAY");
            }
        }

        let (connection, reader) = Connection::new(stream, address, &state.config);
        manager.add(connection.clone());
        tokio::spawn(connection.run(reader, state.clone()));
    }
}
