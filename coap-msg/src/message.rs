use crate::opt::known;
use crate::opt::OptionMap;
use crate::{Code, Id, Token, Type};

/// CoAP protocol version. Only version `1` is defined by RFC7252 and
/// only version `1` is accepted by [`crate::from_bytes::decode`].
pub const VERSION: u8 = 1;

/// A fully-decoded CoAP message: the 4-byte fixed header, the token,
/// the option set, and the payload.
///
/// `decode(encode(m)) == m` for any `m` constructed by this crate
/// (the codec invariant from the spec's §3 and §8 property 1) -- the
/// only fields the wire format does not carry are the peer addresses,
/// which callers track alongside the message (see `coap::net::Addrd`).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
  /// Protocol version; always [`VERSION`] for messages this crate produces.
  pub ver: u8,
  /// CON / NON / ACK / RST.
  pub ty: Type,
  /// Request/response/empty code.
  pub code: Code,
  /// Message ID.
  pub id: Id,
  /// Request/response correlator.
  pub token: Token,
  /// The option set.
  pub opts: OptionMap,
  /// The message payload, if any.
  pub payload: Vec<u8>,
}

impl Message {
  /// Construct a new message with an empty option set and payload.
  pub fn new(ty: Type, code: Code, id: Id, token: Token) -> Self {
    Self { ver: VERSION,
           ty,
           code,
           id,
           token,
           opts: OptionMap::new(),
           payload: Vec::new() }
  }

  /// Set the Uri-Path options from a `/`-joined path string.
  pub fn set_path(&mut self, path: &str) {
    self.opts.remove(known::URI_PATH);
    for seg in path.split('/').filter(|s| !s.is_empty()) {
      self.opts.add(known::URI_PATH, seg);
    }
  }

  /// The request's `/`-joined Uri-Path.
  pub fn path(&self) -> String {
    self.opts.path_segments(known::URI_PATH).join("/")
  }

  /// The Content-Format option, if present.
  pub fn content_format(&self) -> Option<known::ContentFormat> {
    self.opts.get(known::CONTENT_FORMAT).map(|v| known::ContentFormat::from(v.as_u64() as u16))
  }

  /// Set the Content-Format option.
  pub fn set_content_format(&mut self, cf: known::ContentFormat) {
    self.opts.set(known::CONTENT_FORMAT, u16::from(cf));
  }

  /// The Observe option's raw integer value, if present.
  pub fn observe(&self) -> Option<u32> {
    self.opts.get(known::OBSERVE).map(|v| v.as_u64() as u32)
  }

  /// Set the Observe option to a raw integer value (a subscription
  /// sequence number on a response, or 0/1 register/deregister on a
  /// request).
  pub fn set_observe(&mut self, n: u32) {
    self.opts.set(known::OBSERVE, n);
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn set_and_read_path() {
    let mut m = Message::new(Type::Con, Code::GET, Id(1), Token::empty());
    m.set_path("a/b/c");
    assert_eq!(m.path(), "a/b/c");
  }

  #[test]
  fn set_path_ignores_leading_slash() {
    let mut m = Message::new(Type::Con, Code::GET, Id(1), Token::empty());
    m.set_path("/a/b");
    assert_eq!(m.path(), "a/b");
  }
}
