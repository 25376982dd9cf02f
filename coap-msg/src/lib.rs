//! CoAP (RFC 7252) message parsing and serialization.
//!
//! This crate is the wire layer only: it has no notion of sockets,
//! retransmission, or resources. It turns a [`Message`] into bytes and
//! back, and nothing else.

mod code;
mod from_bytes;
mod id;
mod message;
mod opt;
mod parse_error;
mod to_bytes;
mod token;
mod ty;

pub use code::{Code, CodeKind};
pub use from_bytes::{decode, recover_header};
pub use id::Id;
pub use message::Message;
pub use opt::known;
pub use opt::{OptNumber, OptValue, OptionMap};
pub use parse_error::{MessageParseError, OptParseError};
pub use to_bytes::encode;
pub use token::Token;
pub use ty::Type;
