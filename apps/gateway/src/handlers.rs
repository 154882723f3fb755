//! Session-level opcode handlers.
//!
//! Each handler parses one inbound frame and hands the result to the
//! session. Parse errors bubble up to the dispatcher, which logs and drops
//! the frame.

use crosslink_common::packet::{Packet, PacketError};

use crate::bot::{Embed, EmbedField, MAX_EMBED_FIELDS};
use crate::net::session::Session;

pub fn handle_hello(session: &Session, packet: &mut Packet) -> Result<(), PacketError> {
    let greeting = packet.read_string()?;
    tracing::info!(
        account = session.account_name(),
        address = session.address(),
        %greeting,
        "client hello"
    );
    Ok(())
}

pub fn handle_send_message(session: &Session, packet: &mut Packet) -> Result<(), PacketError> {
    let channel_type = packet.read_u8()?;
    let content = packet.read_string()?;

    if content.is_empty() {
        tracing::warn!(account = session.account_name(), "empty message, dropping");
        return Ok(());
    }

    let Some(channel_id) = session.channel_id(channel_type) else {
        return Ok(());
    };

    session.deliver_message(channel_id, content);
    Ok(())
}

pub fn handle_send_embed(session: &Session, packet: &mut Packet) -> Result<(), PacketError> {
    let channel_type = packet.read_u8()?;
    let color = packet.read_u32()?;
    let title = packet.read_string()?;
    let description = packet.read_string()?;

    let field_count = packet.read_array_len(MAX_EMBED_FIELDS)?;
    let mut fields = Vec::with_capacity(field_count);
    for _ in 0..field_count {
        let field = EmbedField {
            name: packet.read_string()?,
            value: packet.read_string()?,
            inline: packet.read_bool()?,
        };
        if !field.has_valid_name() || !field.has_valid_value() {
            tracing::error!(
                account = session.account_name(),
                name_len = field.name.len(),
                value_len = field.value.len(),
                "dropping embed field with out-of-range name or value"
            );
            continue;
        }
        fields.push(field);
    }

    let timestamp = packet.read_i64()?;

    let Some(channel_id) = session.channel_id(channel_type) else {
        return Ok(());
    };

    session.deliver_embed(
        channel_id,
        Embed {
            title,
            description,
            color,
            fields,
            timestamp,
        },
    );
    Ok(())
}
