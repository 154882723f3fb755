//! One accepted TCP connection.
//!
//! The read task owns frame assembly and the pre-session opcodes (auth
//! request, ping); everything else is queued onto the session and handled on
//! the update tick. Outbound packets accumulate in a queue and are flushed in
//! batched buffers, also on the tick.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::BytesMut;
use parking_lot::Mutex;
use tokio::io::AsyncReadExt;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Notify;

use crosslink_common::codec::{
    decode_client_header, encode_server_header, ClientHeader, HEADER_SIZE,
};
use crosslink_common::opcodes::{AuthResponseCode, Opcode};
use crosslink_common::packet::{Packet, PacketError};

use super::session::Session;
use crate::auth::{self, AuthContext, AuthOutcome, AuthRequest};
use crate::config::Config;
use crate::GatewayState;

const READ_BUFFER_SIZE: usize = 4096;

pub struct Connection {
    address: SocketAddr,
    writer: tokio::sync::Mutex<Option<OwnedWriteHalf>>,
    session: Mutex<Option<Arc<Session>>>,
    outbound: Mutex<VecDeque<Packet>>,
    send_buffer_size: usize,
    ping: Mutex<PingTracker>,
    min_ping_interval: Duration,
    max_overspeed_pings: u32,
    authed: AtomicBool,
    closed: AtomicBool,
    closed_notify: Notify,
}

impl Connection {
    /// Split the stream; the caller spawns [`Connection::run`] with the read
    /// half while the connection keeps the write half.
    pub fn new(
        stream: TcpStream,
        address: SocketAddr,
        config: &Config,
    ) -> (Arc<Self>, OwnedReadHalf) {
        let (reader, writer) = stream.into_split();
        let connection = Arc::new(Self {
            address,
            writer: tokio::sync::Mutex::new(Some(writer)),
            session: Mutex::new(None),
            outbound: Mutex::new(VecDeque::new()),
            send_buffer_size: config.send_buffer_size,
            ping: Mutex::new(PingTracker::default()),
            min_ping_interval: Duration::from_secs(config.min_ping_interval_secs),
            max_overspeed_pings: config.max_overspeed_pings,
            authed: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            closed_notify: Notify::new(),
        });
        (connection, reader)
    }

    pub fn address(&self) -> SocketAddr {
        self.address
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Drive the connection: IP ban gate, then the framing loop until the
    /// peer disconnects, the protocol is violated, or the gateway closes us.
    pub async fn run(self: Arc<Self>, mut reader: OwnedReadHalf, state: GatewayState) {
        if !self.check_ip_ban(&state).await {
            self.shutdown().await;
            return;
        }
        tracing::debug!(address = %self.address, "connection open");

        let mut read_buf = BytesMut::with_capacity(READ_BUFFER_SIZE);
        let mut header = [0u8; HEADER_SIZE];
        let mut header_filled = 0usize;
        let mut current: Option<ClientHeader> = None;
        let mut payload = BytesMut::new();

        'conn: while !self.is_closed() {
            // Assemble as many complete frames as the buffer holds. Header
            // and payload both resume across reads.
            loop {
                let frame = match current {
                    Some(frame) => frame,
                    None => {
                        let take = (HEADER_SIZE - header_filled).min(read_buf.len());
                        if take > 0 {
                            header[header_filled..header_filled + take]
                                .copy_from_slice(&read_buf.split_to(take));
                            header_filled += take;
                        }
                        if header_filled < HEADER_SIZE {
                            break;
                        }
                        match decode_client_header(&header) {
                            Ok(frame) => {
                                payload = BytesMut::with_capacity(frame.payload_len);
                                current = Some(frame);
                                frame
                            }
                            Err(e) => {
                                tracing::error!(
                                    address = %self.address,
                                    error = %e,
                                    "closing connection"
                                );
                                break 'conn;
                            }
                        }
                    }
                };

                let take = (frame.payload_len - payload.len()).min(read_buf.len());
                if take > 0 {
                    payload.extend_from_slice(&read_buf.split_to(take));
                }
                if payload.len() < frame.payload_len {
                    break;
                }

                let packet = Packet::from_payload(frame.opcode, std::mem::take(&mut payload));
                current = None;
                header_filled = 0;

                if !self.read_data_handler(&state, packet).await {
                    break 'conn;
                }
            }

            tokio::select! {
                _ = self.closed_notify.notified() => break,
                result = reader.read_buf(&mut read_buf) => match result {
                    Ok(0) => break,
                    Ok(_) => {}
                    Err(e) => {
                        tracing::debug!(address = %self.address, error = %e, "read failed");
                        break;
                    }
                },
            }
        }

        self.shutdown().await;
    }

    /// Reject banned IPs before reading a single frame. Returns false when
    /// the connection must not proceed.
    async fn check_ip_ban(&self, state: &GatewayState) -> bool {
        let ip = self.address.ip().to_string();
        match state.storage.ip_ban_status(&ip).await {
            Ok(status) if status.is_banned => {
                let code = if status.is_permanent {
                    AuthResponseCode::BannedPermanentlyIp
                } else {
                    AuthResponseCode::BannedIp
                };
                tracing::error!(
                    %ip,
                    permanent = status.is_permanent,
                    "rejecting connection from banned ip"
                );
                self.send_auth_response(code);
                if let Err(e) = self.flush().await {
                    tracing::debug!(%ip, error = %e, "failed to flush ban response");
                }
                false
            }
            Ok(_) => true,
            Err(e) => {
                // Storage trouble must not lock everyone out.
                tracing::error!(%ip, error = %e, "ip ban lookup failed");
                true
            }
        }
    }

    /// Route one complete frame. Auth and ping are handled here, before a
    /// session necessarily exists; everything else requires an authenticated
    /// session and is queued for the update tick. Returns false to close.
    async fn read_data_handler(self: &Arc<Self>, state: &GatewayState, mut packet: Packet) -> bool {
        match Opcode::from_u16(packet.opcode()) {
            Some(Opcode::Ping) => match self.handle_ping(&mut packet) {
                Ok(keep_open) => keep_open,
                Err(e) => {
                    tracing::error!(address = %self.address, error = %e, "malformed ping");
                    false
                }
            },
            Some(Opcode::AuthSession) => {
                if self.authed.load(Ordering::SeqCst) {
                    tracing::error!(address = %self.address, "duplicate auth session");
                    return false;
                }
                let request = match AuthRequest::parse(&mut packet) {
                    Ok(request) => request,
                    Err(e) => {
                        tracing::error!(
                            address = %self.address,
                            error = %e,
                            "malformed auth session"
                        );
                        return false;
                    }
                };
                self.handle_auth_session(state, request).await
            }
            _ => {
                tracing::trace!(
                    address = %self.address,
                    opcode = Opcode::name(packet.opcode()),
                    "C->S"
                );
                if !self.authed.load(Ordering::SeqCst) {
                    tracing::error!(
                        address = %self.address,
                        opcode = Opcode::name(packet.opcode()),
                        "packet before authentication"
                    );
                    return false;
                }
                let session = self.session.lock().clone();
                match session {
                    Some(session) => {
                        session.queue_packet(packet);
                        true
                    }
                    None => {
                        tracing::error!(address = %self.address, "authed connection lost its session");
                        false
                    }
                }
            }
        }
    }

    async fn handle_auth_session(
        self: &Arc<Self>,
        state: &GatewayState,
        request: AuthRequest,
    ) -> bool {
        let ip = self.address.ip().to_string();
        let ctx = AuthContext {
            storage: state.storage.as_ref(),
            bot: state.bot.as_ref(),
            bans: &state.bans,
            closed: state.is_closed(),
        };

        match auth::authenticate(ctx, &request, &ip).await {
            AuthOutcome::Failure(code) => {
                self.send_auth_response(code);
                self.delayed_close().await;
                false
            }
            AuthOutcome::Success { account, channels } => {
                let session = Arc::new(Session::new(
                    account.id,
                    account.guild_id,
                    request.account.clone(),
                    channels,
                    self.clone(),
                    state.bot.clone(),
                ));

                if state.sessions.insert(session.clone()).is_err() {
                    tracing::error!(
                        account = %request.account,
                        "auth rejected: account already has a live session"
                    );
                    self.send_auth_response(AuthResponseCode::Failed);
                    self.delayed_close().await;
                    return false;
                }

                self.authed.store(true, Ordering::SeqCst);
                *self.session.lock() = Some(session.clone());
                session.schedule_touch_login(state.storage.clone(), ip);
                self.send_auth_response(AuthResponseCode::Ok);

                tracing::info!(
                    account_id = account.id,
                    account = %request.account,
                    address = %self.address,
                    core = %request.core_name,
                    "session authenticated"
                );
                true
            }
        }
    }

    /// Ping carries the client clock and its measured latency. Answer with a
    /// pong echoing the clock; rate-limit abusers.
    fn handle_ping(&self, packet: &mut Packet) -> Result<bool, PacketError> {
        let client_time = packet.read_i64()?;
        let latency = packet.read_i64()?;

        let abusive = self.ping.lock().record(
            Instant::now(),
            self.min_ping_interval,
            self.max_overspeed_pings,
        );

        let session = self.session.lock().clone();
        let Some(session) = session else {
            tracing::error!(address = %self.address, "ping before session established");
            return Ok(false);
        };

        if abusive {
            tracing::error!(
                account_id = session.account_id(),
                address = %self.address,
                "kicking ping flooder"
            );
            session.kick("excessive ping rate");
            return Ok(false);
        }

        session.set_latency_us(latency);

        let mut pong = Packet::with_capacity(Opcode::Pong as u16, 8);
        pong.write_i64(client_time);
        self.send_packet(pong);
        Ok(true)
    }

    /// Queue a packet for the next flush. No-op once closed.
    pub fn send_packet(&self, packet: Packet) {
        if self.is_closed() {
            return;
        }
        self.outbound.lock().push_back(packet);
    }

    pub fn send_auth_response(&self, code: AuthResponseCode) {
        let mut packet = Packet::with_capacity(Opcode::AuthResponse as u16, 1);
        packet.write_u8(code as u8);
        self.send_packet(packet);
    }

    /// Write everything queued, batching frames into fixed-size buffers. A
    /// frame is never split across buffers; one larger than the buffer size
    /// gets a buffer of its own.
    pub async fn flush(&self) -> std::io::Result<()> {
        let queued: Vec<Packet> = {
            let mut outbound = self.outbound.lock();
            outbound.drain(..).collect()
        };
        if queued.is_empty() {
            return Ok(());
        }

        let buffers = batch_frames(queued, self.send_buffer_size);
        let mut writer = self.writer.lock().await;
        let Some(writer) = writer.as_mut() else {
            return Ok(());
        };
        for buffer in buffers {
            writer.write_all(&buffer).await?;
        }
        Ok(())
    }

    /// Per-tick maintenance. Returns false once the connection is gone and
    /// can be dropped by the manager.
    pub async fn update(&self) -> bool {
        if self.is_closed() {
            return false;
        }
        if let Err(e) = self.flush().await {
            tracing::debug!(address = %self.address, error = %e, "write failed");
            self.close();
            return false;
        }
        true
    }

    /// Flush whatever is queued (the auth response, typically), then close.
    pub async fn delayed_close(&self) {
        if let Err(e) = self.flush().await {
            tracing::debug!(address = %self.address, error = %e, "final flush failed");
        }
        self.close();
    }

    /// Mark the connection closed and wake the read task. Idempotent; the
    /// write half is released when the read task exits.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            *self.session.lock() = None;
            self.closed_notify.notify_waiters();
        }
    }

    async fn shutdown(&self) {
        self.close();
        self.writer.lock().await.take();
        tracing::debug!(address = %self.address, "connection closed");
    }

    #[cfg(test)]
    pub(crate) fn outbound_depth(&self) -> usize {
        self.outbound.lock().len()
    }
}

/// Ping-rate bookkeeping. The first ping only sets the baseline; after that,
/// each under-interval ping counts toward the overspeed limit and any
/// well-spaced ping resets the count.
#[derive(Default)]
struct PingTracker {
    last: Option<Instant>,
    overspeed: u32,
}

impl PingTracker {
    /// Record a ping and report whether the client crossed the abuse limit.
    /// A limit of zero disables the check.
    fn record(&mut self, now: Instant, min_interval: Duration, max_allowed: u32) -> bool {
        let Some(previous) = self.last.replace(now) else {
            return false;
        };

        if now.duration_since(previous) < min_interval {
            self.overspeed += 1;
            max_allowed != 0 && self.overspeed > max_allowed
        } else {
            self.overspeed = 0;
            false
        }
    }
}

/// Coalesce frames into send buffers of at most `buffer_size` bytes without
/// ever splitting a frame.
fn batch_frames(packets: Vec<Packet>, buffer_size: usize) -> Vec<Vec<u8>> {
    let mut buffers = Vec::new();
    let mut current: Vec<u8> = Vec::with_capacity(buffer_size);

    for packet in packets {
        let frame_len = HEADER_SIZE + packet.len();
        if !current.is_empty() && current.len() + frame_len > buffer_size {
            buffers.push(std::mem::replace(&mut current, Vec::with_capacity(buffer_size)));
        }

        current.extend_from_slice(&encode_server_header(packet.opcode(), packet.len()));
        current.extend_from_slice(packet.payload());

        if frame_len > buffer_size {
            buffers.push(std::mem::replace(&mut current, Vec::with_capacity(buffer_size)));
        }
    }

    if !current.is_empty() {
        buffers.push(current);
    }
    buffers
}
