pub mod codec;
pub mod failure;
pub mod messages;
pub mod namespace;

pub use codec::{CodecError, Frame, decode_event, decode_frame, encode_command};
pub use messages::{ClientCommand, ServerEvent};
