//! Abstraction over the external chat-bot gateway.
//!
//! The real implementation talks to the bot process that owns the guilds and
//! channels; the gateway core only needs existence checks, channel
//! resolution, and fire-and-forget delivery.

use async_trait::async_trait;

/// Longest embed field name the chat gateway accepts.
pub const MAX_EMBED_FIELD_NAME: usize = 256;
/// Longest embed field value the chat gateway accepts.
pub const MAX_EMBED_FIELD_VALUE: usize = 1024;
/// Most fields a single embed may carry.
pub const MAX_EMBED_FIELDS: usize = 25;

#[derive(Debug, thiserror::Error)]
pub enum BotError {
    #[error("delivery to channel {channel_id} failed: {reason}")]
    Delivery { channel_id: i64, reason: String },
}

#[derive(Debug, Clone)]
pub struct EmbedField {
    pub name: String,
    pub value: String,
    pub inline: bool,
}

impl EmbedField {
    pub fn has_valid_name(&self) -> bool {
        !self.name.is_empty() && self.name.len() <= MAX_EMBED_FIELD_NAME
    }

    pub fn has_valid_value(&self) -> bool {
        !self.value.is_empty() && self.value.len() <= MAX_EMBED_FIELD_VALUE
    }
}

/// A rich message: title/description/color plus up to
/// [`MAX_EMBED_FIELDS`] name/value fields and a timestamp.
#[derive(Debug, Clone)]
pub struct Embed {
    pub title: String,
    pub description: String,
    pub color: u32,
    pub fields: Vec<EmbedField>,
    pub timestamp: i64,
}

#[async_trait]
pub trait BotGateway: Send + Sync {
    /// Is the bot a member of this guild?
    async fn guild_exists(&self, guild_id: i64) -> bool;

    /// Resolve the guild's channel ids, indexed by channel type. An empty or
    /// wrong-sized result means the guild is misconfigured.
    async fn resolve_channels(&self, guild_id: i64) -> Vec<i64>;

    async fn send_message(&self, channel_id: i64, content: &str) -> Result<(), BotError>;

    async fn send_embed(&self, channel_id: i64, embed: Embed) -> Result<(), BotError>;
}

/// Stand-in gateway for standalone runs: every guild exists, channel ids are
/// synthesized, and deliveries are logged instead of sent.
pub struct LogBotGateway;

#[async_trait]
impl BotGateway for LogBotGateway {
    async fn guild_exists(&self, _guild_id: i64) -> bool {
        true
    }

    async fn resolve_channels(&self, guild_id: i64) -> Vec<i64> {
        (0..crosslink_common::opcodes::CHANNEL_TYPES_COUNT as i64)
            .map(|slot| guild_id * 100 + slot)
            .collect()
    }

    async fn send_message(&self, channel_id: i64, content: &str) -> Result<(), BotError> {
        tracing::info!(channel_id, %content, "message (log-only bot gateway)");
        Ok(())
    }

    async fn send_embed(&self, channel_id: i64, embed: Embed) -> Result<(), BotError> {
        tracing::info!(
            channel_id,
            title = %embed.title,
            fields = embed.fields.len(),
            "embed (log-only bot gateway)"
        );
        Ok(())
    }
}
