use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use coap_msg::{Id, Message};

/// One cached inbound exchange, keyed by `(peer, mid)`.
#[derive(Debug, Clone)]
struct Entry {
  completed: bool,
  response: Option<Message>,
  inserted_at: Instant,
}

/// The outcome of looking up an inbound request in the cache, per the
/// three-way branch of the message layer's duplicate handling.
#[derive(Debug, PartialEq, Eq)]
pub enum Lookup {
  /// Not seen before; a new transaction should be created.
  Miss,
  /// Seen before and already answered; resend the cached response.
  HitCompleted(Option<Message>),
  /// Seen before but still being processed; ACK only, don't re-dispatch.
  HitInProgress,
}

/// Bounded LRU-by-insertion-order cache of recently seen `(peer, mid)`
/// exchanges, used to detect and answer duplicate CON/NON requests
/// without invoking the handler twice (RFC7252 §4.5).
pub struct DedupCache {
  capacity: usize,
  lifetime: Duration,
  entries: HashMap<(SocketAddr, Id), Entry>,
  order: VecDeque<(SocketAddr, Id)>,
}

impl DedupCache {
  /// Construct an empty cache with room for `capacity` entries, each
  /// evicted `lifetime` after insertion (`EXCHANGE_LIFETIME`).
  pub fn new(capacity: usize, lifetime: Duration) -> Self {
    Self { capacity,
           lifetime,
           entries: HashMap::new(),
           order: VecDeque::new() }
  }

  /// Look up `(peer, mid)`, inserting a fresh in-progress entry on a
  /// miss. Expired entries are swept first so a stale `mid` a peer
  /// happens to reuse isn't mistaken for a duplicate.
  pub fn lookup_or_insert(&mut self, peer: SocketAddr, mid: Id, now: Instant) -> Lookup {
    self.evict_expired(now);

    if let Some(entry) = self.entries.get(&(peer, mid)) {
      return if entry.completed {
        Lookup::HitCompleted(entry.response.clone())
      } else {
        Lookup::HitInProgress
      };
    }

    self.insert(peer, mid, now);
    Lookup::Miss
  }

  fn insert(&mut self, peer: SocketAddr, mid: Id, now: Instant) {
    if self.order.len() >= self.capacity {
      if let Some(oldest) = self.order.pop_front() {
        self.entries.remove(&oldest);
      }
    }

    self.entries.insert((peer, mid),
                        Entry { completed: false,
                                response: None,
                                inserted_at: now });
    self.order.push_back((peer, mid));
  }

  /// Record the response produced for `(peer, mid)`, so a subsequent
  /// duplicate of the same request can be answered without
  /// re-dispatching.
  pub fn complete(&mut self, peer: SocketAddr, mid: Id, response: Option<Message>) {
    if let Some(entry) = self.entries.get_mut(&(peer, mid)) {
      entry.completed = true;
      entry.response = response;
    }
  }

  fn evict_expired(&mut self, now: Instant) {
    while let Some(&key) = self.order.front() {
      let expired = self.entries
                        .get(&key)
                        .map(|e| now.duration_since(e.inserted_at) >= self.lifetime)
                        .unwrap_or(true);
      if expired {
        self.order.pop_front();
        self.entries.remove(&key);
      } else {
        break;
      }
    }
  }

  /// Number of live entries, for tests and diagnostics.
  pub fn len(&self) -> usize {
    self.entries.len()
  }
}

#[cfg(test)]
mod tests {
  use std::net::{Ipv4Addr, SocketAddrV4};

  use super::*;

  fn peer() -> SocketAddr {
    SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::new(127, 0, 0, 1), 5683))
  }

  #[test]
  fn miss_then_in_progress_then_completed() {
    let mut cache = DedupCache::new(8, Duration::from_secs(10));
    let now = Instant::now();

    assert_eq!(cache.lookup_or_insert(peer(), Id(1), now), Lookup::Miss);
    assert_eq!(cache.lookup_or_insert(peer(), Id(1), now), Lookup::HitInProgress);

    cache.complete(peer(), Id(1), Some(Message::new(coap_msg::Type::Ack,
                                                     coap_msg::Code::CONTENT,
                                                     Id(1),
                                                     coap_msg::Token::empty())));

    match cache.lookup_or_insert(peer(), Id(1), now) {
      | Lookup::HitCompleted(Some(_)) => (),
      | other => panic!("expected HitCompleted(Some(_)), got {other:?}"),
    }
  }

  #[test]
  fn entries_expire_after_lifetime() {
    let mut cache = DedupCache::new(8, Duration::from_millis(10));
    let now = Instant::now();
    cache.lookup_or_insert(peer(), Id(1), now);

    let later = now + Duration::from_millis(50);
    assert_eq!(cache.lookup_or_insert(peer(), Id(1), later), Lookup::Miss);
  }

  #[test]
  fn bounded_capacity_evicts_oldest() {
    let mut cache = DedupCache::new(2, Duration::from_secs(60));
    let now = Instant::now();
    cache.lookup_or_insert(peer(), Id(1), now);
    cache.lookup_or_insert(peer(), Id(2), now);
    cache.lookup_or_insert(peer(), Id(3), now);

    assert_eq!(cache.len(), 2);
    assert_eq!(cache.lookup_or_insert(peer(), Id(1), now), Lookup::Miss);
  }
}
