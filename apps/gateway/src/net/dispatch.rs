//! Static opcode dispatch table.
//!
//! Built once at startup. Every defined opcode maps to exactly one handler
//! descriptor; binding an opcode twice is a configuration bug and aborts
//! startup. Lookup is a direct array index over the small dense opcode space.

use crosslink_common::opcodes::{Opcode, NUM_OPCODES};
use crosslink_common::packet::{Packet, PacketError};

use super::session::Session;
use crate::handlers;

pub type HandlerFn = fn(&Session, &mut Packet) -> Result<(), PacketError>;

pub enum HandlerKind {
    /// Business opcode: parsed and handled on the session.
    Normal(HandlerFn),
    /// Handled in the connection read path before a session exists
    /// (auth request, ping); reaching the session is a protocol violation.
    EarlyProcess,
    /// Server-originated opcode; never legal from a client.
    ServerSide,
}

pub struct OpcodeHandler {
    pub name: &'static str,
    pub kind: HandlerKind,
}

pub struct OpcodeTable {
    table: [Option<OpcodeHandler>; NUM_OPCODES as usize],
}

impl OpcodeTable {
    pub fn new() -> Self {
        let mut table = Self {
            table: Default::default(),
        };

        // Client
        table.define(Opcode::Hello, HandlerKind::Normal(handlers::handle_hello));
        table.define(Opcode::AuthSession, HandlerKind::EarlyProcess);
        table.define(
            Opcode::SendMessage,
            HandlerKind::Normal(handlers::handle_send_message),
        );
        table.define(
            Opcode::SendEmbed,
            HandlerKind::Normal(handlers::handle_send_embed),
        );
        table.define(Opcode::Ping, HandlerKind::EarlyProcess);

        // Server
        table.define(Opcode::AuthResponse, HandlerKind::ServerSide);
        table.define(Opcode::Pong, HandlerKind::ServerSide);

        table
    }

    fn define(&mut self, opcode: Opcode, kind: HandlerKind) {
        let index = opcode as u16;
        assert!(
            index >= 1 && index < NUM_OPCODES,
            "opcode {index} out of handler range"
        );
        let slot = &mut self.table[index as usize];
        if slot.is_some() {
            panic!(
                "duplicate handler binding for opcode {}",
                Opcode::name(index)
            );
        }
        *slot = Some(OpcodeHandler {
            name: Opcode::name(index),
            kind,
        });
    }

    pub fn handler(&self, opcode: u16) -> Option<&OpcodeHandler> {
        self.table.get(opcode as usize).and_then(Option::as_ref)
    }
}

impl Default for OpcodeTable {
    fn default() -> Self {
        Self::new()
    }
}
