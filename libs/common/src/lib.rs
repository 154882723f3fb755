pub mod codec;
pub mod opcodes;
pub mod packet;

pub use codec::{ClientHeader, CodecError};
pub use opcodes::{AuthResponseCode, ChannelType, Opcode};
pub use packet::{Packet, PacketError};
