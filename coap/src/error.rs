use std::fmt;
use std::net::SocketAddr;

use coap_msg::{Id, MessageParseError, Token};

/// The context an error occurred in.
#[derive(Debug, Clone)]
pub enum When {
  /// We were polling the socket for a datagram.
  Polling,
  /// We were sending a message to a peer.
  Sending(SocketAddr, Id, Token),
  /// No particular context.
  None,
}

impl When {
  /// Attach a [`What`] to this context.
  pub fn what(self, what: What) -> Error {
    Error { when: self, what }
  }
}

/// A contextless error with whatever debug data is relevant.
#[derive(Debug)]
pub enum What {
  /// A socket operation failed.
  Io(std::io::Error),
  /// Decoding a datagram into a [`coap_msg::Message`] failed.
  FromBytes(MessageParseError),
  /// A CONfirmable message exhausted its retransmissions without an
  /// ACK or RST.
  MessageNeverAcked,
  /// The resource tree has no node at the requested path.
  NotFound,
  /// The matched resource has no handler for the request's method.
  MethodNotAllowed,
}

impl fmt::Display for What {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      | What::Io(e) => write!(f, "socket error: {e}"),
      | What::FromBytes(e) => write!(f, "malformed datagram: {e}"),
      | What::MessageNeverAcked => write!(f, "CON message was never acknowledged"),
      | What::NotFound => write!(f, "no resource at that path"),
      | What::MethodNotAllowed => write!(f, "resource has no handler for that method"),
    }
  }
}

/// An error surfaced by the endpoint, with the context it happened in.
#[derive(Debug)]
pub struct Error {
  /// What happened.
  pub what: What,
  /// What we were doing when it happened.
  pub when: When,
}

impl fmt::Display for Error {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.what)
  }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
  fn from(e: std::io::Error) -> Self {
    When::None.what(What::Io(e))
  }
}
