//! End-to-end tests against a real listener on an ephemeral port, speaking
//! the wire protocol over raw TCP.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use crosslink_common::codec::encode_client_header;
use crosslink_common::opcodes::{AuthResponseCode, Opcode, CHANNEL_TYPES_COUNT};
use crosslink_common::packet::Packet;
use crosslink_gateway::bot::{BotError, BotGateway, Embed};
use crosslink_gateway::config::Config;
use crosslink_gateway::net;
use crosslink_gateway::storage::MemoryAccountStore;
use crosslink_gateway::GatewayState;

/// Bot double that records deliveries instead of sending them.
struct RecordingBot {
    messages: Mutex<Vec<(i64, String)>>,
    embeds: Mutex<Vec<(i64, Embed)>>,
}

impl RecordingBot {
    fn new() -> Self {
        Self {
            messages: Mutex::new(Vec::new()),
            embeds: Mutex::new(Vec::new()),
        }
    }

    fn channel(slot: usize) -> i64 {
        1000 + slot as i64
    }
}

#[async_trait]
impl BotGateway for RecordingBot {
    async fn guild_exists(&self, _guild_id: i64) -> bool {
        true
    }

    async fn resolve_channels(&self, _guild_id: i64) -> Vec<i64> {
        (0..CHANNEL_TYPES_COUNT).map(Self::channel).collect()
    }

    async fn send_message(&self, channel_id: i64, content: &str) -> Result<(), BotError> {
        self.messages.lock().push((channel_id, content.to_string()));
        Ok(())
    }

    async fn send_embed(&self, channel_id: i64, embed: Embed) -> Result<(), BotError> {
        self.embeds.lock().push((channel_id, embed));
        Ok(())
    }
}

fn test_config() -> Config {
    Config {
        bind_addr: "127.0.0.1".to_string(),
        port: 0,
        send_buffer_size: 4096,
        tcp_nodelay: true,
        update_interval_ms: 5,
        min_ping_interval_secs: 10,
        max_overspeed_pings: 5,
    }
}

async fn spawn_gateway(
    storage: Arc<MemoryAccountStore>,
    bot: Arc<RecordingBot>,
) -> (SocketAddr, GatewayState) {
    let state = GatewayState::new(test_config(), storage, bot);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(net::listener::serve(listener, state.clone()));
    (addr, state)
}

async fn send_frame(stream: &mut TcpStream, opcode: u16, payload: &[u8]) {
    let header = encode_client_header(opcode, payload.len());
    stream.write_all(&header).await.unwrap();
    stream.write_all(payload).await.unwrap();
}

async fn read_frame(stream: &mut TcpStream) -> (u16, Vec<u8>) {
    let mut header = [0u8; 4];
    stream.read_exact(&mut header).await.unwrap();
    let size = u16::from_be_bytes([header[0], header[1]]) as usize;
    let opcode = u16::from_le_bytes([header[2], header[3]]);
    let mut payload = vec![0u8; size - 2];
    stream.read_exact(&mut payload).await.unwrap();
    (opcode, payload)
}

fn auth_payload(name: &str, key: &str) -> Vec<u8> {
    let mut packet = Packet::new(Opcode::AuthSession as u16);
    packet.write_str(name);
    packet.write_str(key);
    packet.write_str("test-core");
    packet.write_str("1.0.0");
    packet.write_u32(1);
    packet.payload().to_vec()
}

/// Connect and complete the handshake, asserting the expected response code.
async fn authenticate(addr: SocketAddr, name: &str, key: &str, expected: AuthResponseCode) -> TcpStream {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    send_frame(&mut stream, Opcode::AuthSession as u16, &auth_payload(name, key)).await;
    let (opcode, payload) = read_frame(&mut stream).await;
    assert_eq!(opcode, Opcode::AuthResponse as u16);
    assert_eq!(payload, vec![expected as u8]);
    stream
}

async fn wait_for(mut condition: impl FnMut() -> bool) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not met within 2.5s");
}

async fn assert_closed(stream: &mut TcpStream) {
    let mut buf = [0u8; 16];
    let read = tokio::time::timeout(Duration::from_secs(3), stream.read(&mut buf))
        .await
        .expect("peer did not close the connection");
    assert_eq!(read.unwrap(), 0);
}

#[tokio::test]
async fn successful_handshake_registers_a_session() {
    let storage = Arc::new(MemoryAccountStore::new());
    let id = storage.insert_account("Tester", "hunter2", 7);
    let (addr, state) = spawn_gateway(storage, Arc::new(RecordingBot::new())).await;

    let _stream = authenticate(addr, "Tester", "hunter2", AuthResponseCode::Ok).await;

    wait_for(|| state.sessions.count() == 1).await;
    let session = state.sessions.find(id).unwrap();
    assert_eq!(session.account_name(), "Tester");
    assert_eq!(session.guild_id(), 7);
}

#[tokio::test]
async fn wrong_key_is_rejected_and_disconnected() {
    let storage = Arc::new(MemoryAccountStore::new());
    storage.insert_account("Tester", "hunter2", 7);
    let (addr, state) = spawn_gateway(storage, Arc::new(RecordingBot::new())).await;

    let mut stream = authenticate(addr, "Tester", "wrong", AuthResponseCode::IncorrectKey).await;
    assert_closed(&mut stream).await;
    assert_eq!(state.sessions.count(), 0);
}

#[tokio::test]
async fn unknown_account_is_rejected() {
    let storage = Arc::new(MemoryAccountStore::new());
    let (addr, _state) = spawn_gateway(storage, Arc::new(RecordingBot::new())).await;

    let mut stream =
        authenticate(addr, "Nobody", "key", AuthResponseCode::UnknownAccount).await;
    assert_closed(&mut stream).await;
}

#[tokio::test]
async fn banned_ip_is_rejected_before_any_frame() {
    let storage = Arc::new(MemoryAccountStore::new());
    storage.insert_account("Tester", "hunter2", 7);
    let now = chrono::Utc::now().timestamp();
    storage.ban_ip("127.0.0.1", now, now); // permanent
    let (addr, _state) = spawn_gateway(storage, Arc::new(RecordingBot::new())).await;

    let mut stream = TcpStream::connect(addr).await.unwrap();
    let (opcode, payload) = read_frame(&mut stream).await;
    assert_eq!(opcode, Opcode::AuthResponse as u16);
    assert_eq!(
        payload,
        vec![AuthResponseCode::BannedPermanentlyIp as u8]
    );
    assert_closed(&mut stream).await;
}

#[tokio::test]
async fn duplicate_login_is_rejected() {
    let storage = Arc::new(MemoryAccountStore::new());
    storage.insert_account("Tester", "hunter2", 7);
    let (addr, state) = spawn_gateway(storage, Arc::new(RecordingBot::new())).await;

    let _first = authenticate(addr, "Tester", "hunter2", AuthResponseCode::Ok).await;
    wait_for(|| state.sessions.count() == 1).await;

    let mut second = authenticate(addr, "Tester", "hunter2", AuthResponseCode::Failed).await;
    assert_closed(&mut second).await;
    assert_eq!(state.sessions.count(), 1);
}

#[tokio::test]
async fn ping_is_answered_with_a_pong_echoing_the_clock() {
    let storage = Arc::new(MemoryAccountStore::new());
    let id = storage.insert_account("Tester", "hunter2", 7);
    let (addr, state) = spawn_gateway(storage, Arc::new(RecordingBot::new())).await;

    let mut stream = authenticate(addr, "Tester", "hunter2", AuthResponseCode::Ok).await;
    wait_for(|| state.sessions.count() == 1).await;

    let mut ping = Packet::new(Opcode::Ping as u16);
    ping.write_i64(123_456_789);
    ping.write_i64(2500);
    send_frame(&mut stream, Opcode::Ping as u16, ping.payload()).await;

    let (opcode, payload) = read_frame(&mut stream).await;
    assert_eq!(opcode, Opcode::Pong as u16);
    assert_eq!(payload, 123_456_789i64.to_le_bytes());

    let session = state.sessions.find(id).unwrap();
    assert_eq!(session.latency_us(), 2500);
}

#[tokio::test]
async fn ping_before_authentication_closes_the_connection() {
    let storage = Arc::new(MemoryAccountStore::new());
    let (addr, _state) = spawn_gateway(storage, Arc::new(RecordingBot::new())).await;

    let mut stream = TcpStream::connect(addr).await.unwrap();
    let mut ping = Packet::new(Opcode::Ping as u16);
    ping.write_i64(1);
    ping.write_i64(0);
    send_frame(&mut stream, Opcode::Ping as u16, ping.payload()).await;
    assert_closed(&mut stream).await;
}

#[tokio::test]
async fn chat_message_reaches_the_bot_on_the_right_channel() {
    let storage = Arc::new(MemoryAccountStore::new());
    storage.insert_account("Tester", "hunter2", 7);
    let bot = Arc::new(RecordingBot::new());
    let (addr, state) = spawn_gateway(storage, bot.clone()).await;

    let mut stream = authenticate(addr, "Tester", "hunter2", AuthResponseCode::Ok).await;
    wait_for(|| state.sessions.count() == 1).await;

    let mut message = Packet::new(Opcode::SendMessage as u16);
    message.write_u8(2); // chat channel
    message.write_str("hello world");
    send_frame(&mut stream, Opcode::SendMessage as u16, message.payload()).await;

    wait_for(|| !bot.messages.lock().is_empty()).await;
    let recorded = bot.messages.lock().clone();
    assert_eq!(
        recorded,
        vec![(RecordingBot::channel(2), "hello world".to_string())]
    );
}

#[tokio::test]
async fn embed_reaches_the_bot_with_its_fields() {
    let storage = Arc::new(MemoryAccountStore::new());
    storage.insert_account("Tester", "hunter2", 7);
    let bot = Arc::new(RecordingBot::new());
    let (addr, state) = spawn_gateway(storage, bot.clone()).await;

    let mut stream = authenticate(addr, "Tester", "hunter2", AuthResponseCode::Ok).await;
    wait_for(|| state.sessions.count() == 1).await;

    let mut embed = Packet::new(Opcode::SendEmbed as u16);
    embed.write_u8(1); // server-status channel
    embed.write_u32(0x00FF00);
    embed.write_str("Server online");
    embed.write_str("Realm is up");
    embed.write_u32(2); // field count
    embed.write_str("Uptime");
    embed.write_str("3 days");
    embed.write_bool(true);
    embed.write_str("Players");
    embed.write_str("125");
    embed.write_bool(true);
    embed.write_i64(1_700_000_000);
    send_frame(&mut stream, Opcode::SendEmbed as u16, embed.payload()).await;

    wait_for(|| !bot.embeds.lock().is_empty()).await;
    let recorded = bot.embeds.lock();
    let (channel_id, embed) = &recorded[0];
    assert_eq!(*channel_id, RecordingBot::channel(1));
    assert_eq!(embed.title, "Server online");
    assert_eq!(embed.color, 0x00FF00);
    assert_eq!(embed.fields.len(), 2);
    assert_eq!(embed.fields[1].name, "Players");
    assert_eq!(embed.timestamp, 1_700_000_000);
}

#[tokio::test]
async fn frames_split_across_writes_are_reassembled() {
    let storage = Arc::new(MemoryAccountStore::new());
    storage.insert_account("Tester", "hunter2", 7);
    let (addr, state) = spawn_gateway(storage, Arc::new(RecordingBot::new())).await;

    let mut stream = TcpStream::connect(addr).await.unwrap();
    let payload = auth_payload("Tester", "hunter2");
    let header = encode_client_header(Opcode::AuthSession as u16, payload.len());

    let mut wire = header.to_vec();
    wire.extend_from_slice(&payload);
    for byte in wire {
        stream.write_all(&[byte]).await.unwrap();
        stream.flush().await.unwrap();
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    let (opcode, payload) = read_frame(&mut stream).await;
    assert_eq!(opcode, Opcode::AuthResponse as u16);
    assert_eq!(payload, vec![AuthResponseCode::Ok as u8]);
    wait_for(|| state.sessions.count() == 1).await;
}

#[tokio::test]
async fn malformed_header_closes_the_connection() {
    let storage = Arc::new(MemoryAccountStore::new());
    let (addr, _state) = spawn_gateway(storage, Arc::new(RecordingBot::new())).await;

    let mut stream = TcpStream::connect(addr).await.unwrap();
    // Declared size 1 is below the opcode width.
    stream.write_all(&[0x00, 0x01, 0x02, 0x00]).await.unwrap();
    assert_closed(&mut stream).await;
}

#[tokio::test]
async fn kicked_session_is_dropped_from_the_registry() {
    let storage = Arc::new(MemoryAccountStore::new());
    let id = storage.insert_account("Tester", "hunter2", 7);
    let (addr, state) = spawn_gateway(storage, Arc::new(RecordingBot::new())).await;

    let mut stream = authenticate(addr, "Tester", "hunter2", AuthResponseCode::Ok).await;
    wait_for(|| state.sessions.count() == 1).await;

    state.sessions.find(id).unwrap().kick("test kick");
    assert_closed(&mut stream).await;
    wait_for(|| state.sessions.count() == 0).await;
}
