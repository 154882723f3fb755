//! Per-authenticated-connection session.
//!
//! Created only after the full handshake succeeds. The session owns the
//! inbound packet queue and is driven by the update tick; it survives its
//! connection (pending callbacks may still land) and is dropped once the
//! registry notices the socket is gone.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crosslink_common::opcodes::{ChannelType, Opcode, NULL_OPCODE};
use crosslink_common::packet::Packet;

use super::callback::CallbackProcessor;
use super::connection::Connection;
use super::dispatch::{HandlerKind, OpcodeTable};
use crate::bot::{BotError, BotGateway, Embed};
use crate::storage::{AccountStore, StorageError};

/// Process at most this many inbound packets per update, so one chatty
/// session cannot starve the others sharing the tick.
const MAX_PACKETS_PER_UPDATE: usize = 100;

/// Inbound queue bound; packets beyond this are dropped with a warning.
const MAX_INBOUND_QUEUE: usize = 4096;

pub struct Session {
    account_id: u32,
    guild_id: i64,
    account_name: String,
    address: String,
    /// Resolved channel ids, indexed by [`ChannelType`].
    channels: Vec<i64>,
    connection: Mutex<Option<Arc<Connection>>>,
    inbound: Mutex<VecDeque<Packet>>,
    latency_us: AtomicI64,
    kicked: AtomicBool,
    bot: Arc<dyn BotGateway>,
    storage_callbacks: CallbackProcessor<Result<(), StorageError>>,
    bot_callbacks: CallbackProcessor<Result<(), BotError>>,
    #[cfg(test)]
    pub(crate) processed_log: Mutex<Vec<u16>>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("account_id", &self.account_id)
            .field("guild_id", &self.guild_id)
            .field("account_name", &self.account_name)
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

impl Session {
    pub fn new(
        account_id: u32,
        guild_id: i64,
        account_name: String,
        channels: Vec<i64>,
        connection: Arc<Connection>,
        bot: Arc<dyn BotGateway>,
    ) -> Self {
        let address = connection.address().to_string();
        Self {
            account_id,
            guild_id,
            account_name,
            address,
            channels,
            connection: Mutex::new(Some(connection)),
            inbound: Mutex::new(VecDeque::new()),
            latency_us: AtomicI64::new(0),
            kicked: AtomicBool::new(false),
            bot,
            storage_callbacks: CallbackProcessor::new(),
            bot_callbacks: CallbackProcessor::new(),
            #[cfg(test)]
            processed_log: Mutex::new(Vec::new()),
        }
    }

    pub fn account_id(&self) -> u32 {
        self.account_id
    }

    pub fn guild_id(&self) -> i64 {
        self.guild_id
    }

    pub fn account_name(&self) -> &str {
        &self.account_name
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn latency_us(&self) -> i64 {
        self.latency_us.load(Ordering::Relaxed)
    }

    pub fn set_latency_us(&self, latency: i64) {
        self.latency_us.store(latency, Ordering::Relaxed);
    }

    pub fn is_kicked(&self) -> bool {
        self.kicked.load(Ordering::Relaxed)
    }

    /// Thread-safe enqueue from the connection read path.
    pub fn queue_packet(&self, packet: Packet) {
        let mut inbound = self.inbound.lock();
        if inbound.len() >= MAX_INBOUND_QUEUE {
            tracing::warn!(
                account_id = self.account_id,
                opcode = Opcode::name(packet.opcode()),
                depth = inbound.len(),
                "inbound queue full, dropping packet"
            );
            return;
        }
        inbound.push_back(packet);
    }

    /// Drain and dispatch inbound packets (FIFO, bounded per tick), then run
    /// the async-callback processors. Returns false once the session has no
    /// live connection and can be removed from the registry.
    pub fn update(&self, table: &OpcodeTable) -> bool {
        let mut processed = 0;

        while self.has_live_connection() && processed < MAX_PACKETS_PER_UPDATE {
            let Some(mut packet) = self.inbound.lock().pop_front() else {
                break;
            };
            #[cfg(test)]
            self.processed_log.lock().push(packet.opcode());

            match table.handler(packet.opcode()) {
                Some(handler) => match handler.kind {
                    HandlerKind::Normal(call) => {
                        if let Err(e) = call(self, &mut packet) {
                            tracing::error!(
                                account_id = self.account_id,
                                opcode = handler.name,
                                error = %e,
                                "skipped malformed packet"
                            );
                            tracing::debug!(payload = %packet.hex_dump(), "offending packet");
                        } else if packet.remaining() > 0 {
                            tracing::trace!(
                                opcode = handler.name,
                                unread = packet.remaining(),
                                "unprocessed tail data"
                            );
                        }
                    }
                    HandlerKind::EarlyProcess => {
                        tracing::error!(
                            account_id = self.account_id,
                            opcode = handler.name,
                            "opcode must be handled in the connection read path"
                        );
                    }
                    HandlerKind::ServerSide => {
                        tracing::error!(
                            account_id = self.account_id,
                            opcode = handler.name,
                            "received server-side opcode from client"
                        );
                    }
                },
                None => {
                    tracing::error!(
                        account_id = self.account_id,
                        opcode = packet.opcode(),
                        "no handler for opcode"
                    );
                }
            }

            processed += 1;
        }

        self.process_callbacks();
        self.detach_if_closed();
        self.connection.lock().is_some()
    }

    /// Forward a packet to the owning connection's outbound queue. No-op once
    /// detached; the null opcode is refused with an error log.
    pub fn send_packet(&self, packet: Packet) {
        if packet.opcode() == NULL_OPCODE {
            tracing::error!(account_id = self.account_id, "refusing to send NULL_OPCODE");
            return;
        }

        let connection = self.connection.lock().clone();
        if let Some(connection) = connection {
            tracing::trace!(
                account_id = self.account_id,
                opcode = Opcode::name(packet.opcode()),
                "S->C"
            );
            connection.send_packet(packet);
        }
    }

    /// Close the underlying connection and mark the session kicked.
    /// Idempotent.
    pub fn kick(&self, reason: &str) {
        if !self.kicked.swap(true, Ordering::SeqCst) {
            tracing::info!(account_id = self.account_id, reason, "session kicked");
        }
        let connection = self.connection.lock().clone();
        if let Some(connection) = connection {
            connection.close();
        }
    }

    /// Resolve a channel-type selector to the guild's channel id.
    pub fn channel_id(&self, channel_type: u8) -> Option<i64> {
        let valid = ChannelType::from_u8(channel_type)
            .map(|ct| (ct as usize) < self.channels.len())
            .unwrap_or(false);
        if !valid {
            tracing::error!(
                channel_type,
                account = %self.account_name,
                address = %self.address,
                "incorrect channel type"
            );
            return None;
        }
        Some(self.channels[channel_type as usize])
    }

    /// Fire-and-forget message delivery; the completion is applied on the
    /// next update tick.
    pub fn deliver_message(&self, channel_id: i64, content: String) {
        let bot = self.bot.clone();
        let (tx, rx) = oneshot::channel();
        tokio::spawn(async move {
            let _ = tx.send(bot.send_message(channel_id, &content).await);
        });

        let account_id = self.account_id;
        self.bot_callbacks.add(rx, move |result| {
            if let Err(e) = result {
                tracing::warn!(account_id, channel_id, error = %e, "message delivery failed");
            }
        });
    }

    pub fn deliver_embed(&self, channel_id: i64, embed: Embed) {
        let bot = self.bot.clone();
        let (tx, rx) = oneshot::channel();
        tokio::spawn(async move {
            let _ = tx.send(bot.send_embed(channel_id, embed).await);
        });

        let account_id = self.account_id;
        self.bot_callbacks.add(rx, move |result| {
            if let Err(e) = result {
                tracing::warn!(account_id, channel_id, error = %e, "embed delivery failed");
            }
        });
    }

    /// Record the successful login in storage; failure is logged when the
    /// completion drains.
    pub fn schedule_touch_login(&self, storage: Arc<dyn AccountStore>, ip: String) {
        let account_id = self.account_id;
        let (tx, rx) = oneshot::channel();
        tokio::spawn(async move {
            let _ = tx.send(storage.touch_login(account_id, &ip).await);
        });

        self.storage_callbacks.add(rx, move |result| {
            if let Err(e) = result {
                tracing::warn!(account_id, error = %e, "failed to record login");
            }
        });
    }

    fn process_callbacks(&self) {
        self.storage_callbacks.process_ready();
        self.bot_callbacks.process_ready();
    }

    fn has_live_connection(&self) -> bool {
        self.connection
            .lock()
            .as_ref()
            .map(|c| !c.is_closed())
            .unwrap_or(false)
    }

    fn detach_if_closed(&self) {
        let mut connection = self.connection.lock();
        if let Some(conn) = connection.as_ref() {
            if conn.is_closed() {
                tracing::debug!(
                    account_id = self.account_id,
                    address = %self.address,
                    "connection gone, detaching session"
                );
                *connection = None;
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn inbound_depth(&self) -> usize {
        self.inbound.lock().len()
    }

    #[cfg(test)]
    pub(crate) fn connection(&self) -> Option<Arc<Connection>> {
        self.connection.lock().clone()
    }
}
