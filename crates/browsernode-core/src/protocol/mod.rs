//! Protocol module containing the channel envelope types and the text codec.

pub mod codec;
pub mod messages;

pub use codec::{decode_frame, encode_frame, ProtocolError};
pub use messages::*;
