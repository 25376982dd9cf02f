//! The observe layer (RFC 7641): subscription registration, sequence
//! numbering, and notification fan-out.

use std::collections::HashMap;
use std::net::SocketAddr;

use coap_msg::known::{Action, ContentFormat};
use coap_msg::{Message, Token};

/// One client's subscription to a resource.
#[derive(Debug, Clone)]
pub struct Subscriber {
  /// The subscribing peer.
  pub peer: SocketAddr,
  /// The token from the original registering GET; notifications reuse it.
  pub token: Token,
  /// The path subscribed to.
  pub path: String,
  /// The Accept option from the registering GET, if any; notifications
  /// re-apply the same content-format filter as the original request.
  pub accept: Option<ContentFormat>,
}

/// Registry of active subscriptions, keyed by resource path.
///
/// See §4.4: a GET with `Observe: 0` registers `(peer, token,
/// resource)`; a matching RST, a deregistering GET, exhausted
/// retransmission, or an error response all remove the entry.
#[derive(Default)]
pub struct Registry {
  by_path: HashMap<String, Vec<Subscriber>>,
}

impl Registry {
  /// An empty registry.
  pub fn new() -> Self {
    Self::default()
  }

  /// Register `peer`/`token` as an observer of `path`. Idempotent: a
  /// re-registration from the same `(peer, token)` replaces the
  /// previous entry rather than duplicating it.
  pub fn register(&mut self, path: &str, peer: SocketAddr, token: Token, accept: Option<ContentFormat>) {
    let subs = self.by_path.entry(path.to_owned()).or_default();
    subs.retain(|s| !(s.peer == peer && s.token == token));
    subs.push(Subscriber { peer, token, path: path.to_owned(), accept });
  }

  /// Remove `(peer, token)`'s subscription to `path`, if any.
  pub fn deregister(&mut self, path: &str, peer: SocketAddr, token: Token) {
    if let Some(subs) = self.by_path.get_mut(path) {
      subs.retain(|s| !(s.peer == peer && s.token == token));
      if subs.is_empty() {
        self.by_path.remove(path);
      }
    }
  }

  /// Remove every subscription a peer holds for `token`, regardless of
  /// path. Used when a notification's retransmission is exhausted or
  /// an RST arrives and the caller only has the token to go on.
  pub fn deregister_by_token(&mut self, peer: SocketAddr, token: Token) {
    self.by_path.retain(|_, subs| {
                  subs.retain(|s| !(s.peer == peer && s.token == token));
                  !subs.is_empty()
                });
  }

  /// Apply a client's Observe request value: `Register` adds the
  /// subscription, `Deregister` removes it.
  pub fn apply(&mut self, path: &str, peer: SocketAddr, token: Token, action: Action, accept: Option<ContentFormat>) {
    match action {
      | Action::Register => self.register(path, peer, token, accept),
      | Action::Deregister => self.deregister(path, peer, token),
    }
  }

  /// All current subscribers of `path`, to notify on a change.
  pub fn subscribers(&self, path: &str) -> &[Subscriber] {
    self.by_path.get(path).map(Vec::as_slice).unwrap_or(&[])
  }

  /// Render one notification per current subscriber of `path` via
  /// `render`, pairing each with the peer and token to send it to.
  ///
  /// Mirrors CoAPthon's `notify()`: walk the subscriber list for a
  /// resource whose `changed`/`deleted` flag was just set and re-render
  /// it once per subscriber. Sending and clearing those flags is the
  /// caller's job; this only builds the messages.
  pub fn notify(&self, path: &str, render: impl Fn(&Subscriber) -> Message) -> Vec<(SocketAddr, Token, Message)> {
    self.subscribers(path)
        .iter()
        .map(|s| (s.peer, s.token, render(s)))
        .collect()
  }

  /// Drop every subscription to `path` outright, e.g. after the
  /// resource itself is deleted and a final notification has gone out.
  pub fn forget_path(&mut self, path: &str) {
    self.by_path.remove(path);
  }
}

/// Compare two Observe sequence numbers for freshness per RFC7641
/// §3.4: `b` is considered newer than `a` if `(b - a) mod 2^24` is
/// less than `2^23`, which tolerates a single wraparound of the
/// 24-bit sequence space.
pub fn is_fresher(a: u32, b: u32) -> bool {
  const MODULUS: u32 = 1 << 24;
  const WINDOW: u32 = 1 << 23;

  let diff = b.wrapping_sub(a) % MODULUS;
  diff != 0 && diff < WINDOW
}

#[cfg(test)]
mod tests {
  use std::net::{Ipv4Addr, SocketAddrV4};

  use super::*;

  fn peer() -> SocketAddr {
    SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::new(127, 0, 0, 1), 5683))
  }

  #[test]
  fn register_then_notify_then_deregister() {
    let mut reg = Registry::new();
    let token = Token::new(&[0xCA]);

    reg.register("temperature", peer(), token, None);
    assert_eq!(reg.subscribers("temperature").len(), 1);

    reg.deregister("temperature", peer(), token);
    assert_eq!(reg.subscribers("temperature").len(), 0);
  }

  #[test]
  fn reregistration_does_not_duplicate() {
    let mut reg = Registry::new();
    let token = Token::new(&[0xCA]);
    reg.register("t", peer(), token, None);
    reg.register("t", peer(), token, None);
    assert_eq!(reg.subscribers("t").len(), 1);
  }

  #[test]
  fn notify_renders_one_message_per_subscriber() {
    let mut reg = Registry::new();
    let a = Token::new(&[0x01]);
    let b = Token::new(&[0x02]);
    reg.register("t", peer(), a, None);
    reg.register("t", peer(), b, None);

    let sent = reg.notify("t", |s| Message::new(coap_msg::Type::Con, coap_msg::Code::CONTENT, coap_msg::Id(0), s.token));
    assert_eq!(sent.len(), 2);

    reg.forget_path("t");
    assert!(reg.subscribers("t").is_empty());
  }

  #[test]
  fn sequence_freshness_tolerates_wraparound() {
    assert!(is_fresher(7, 8));
    assert!(is_fresher(8, 9));
    assert!(!is_fresher(9, 8));
    assert!(!is_fresher(8, 8));

    let max = (1u32 << 24) - 1;
    assert!(is_fresher(max, 0));
    assert!(!is_fresher(0, max));
  }
}
