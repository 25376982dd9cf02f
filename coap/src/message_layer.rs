//! The message layer (RFC7252 §4): MID allocation, duplicate
//! detection, CON/ACK/RST matching, and the bookkeeping a retry thread
//! needs to decide when to give up.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use coap_msg::{CodeKind, Id, Message, Token, Type};
use rand::{Rng, SeedableRng};

use crate::dedup::{DedupCache, Lookup};

/// Shared state for one outstanding exchange this endpoint initiated
/// (an outbound request, or an outbound CON response/notification).
///
/// Owned by whichever thread is retrying the message and consulted by
/// [`MessageLayer::receive_response`] when a reply arrives.
#[derive(Debug)]
pub struct Transaction {
  /// The MID this transaction's outbound message was sent with.
  pub request_mid: Id,
  /// Set once a matching ACK (empty or piggybacked) arrives: retransmission
  /// of the original message should stop. Does not by itself mean the
  /// response body has arrived — a separate response may still be pending.
  pub acknowledged: AtomicBool,
  /// Set once a matching RST arrives.
  pub rejected: AtomicBool,
  /// Set by the retry thread once retransmissions are exhausted.
  pub timeouted: AtomicBool,
  /// Set to ask an in-flight retry thread to stop early (peer replied,
  /// or the endpoint is shutting down).
  pub cancelled: AtomicBool,
  /// Set once the response body itself has been stored in `response`,
  /// whether piggybacked on the ACK or delivered as a separate response.
  pub responded: AtomicBool,
  /// The response body, once one arrives (piggybacked or separate).
  pub response: Mutex<Option<Message>>,
}

impl Transaction {
  fn new(request_mid: Id) -> Arc<Self> {
    Arc::new(Self { request_mid,
                    acknowledged: AtomicBool::new(false),
                    rejected: AtomicBool::new(false),
                    timeouted: AtomicBool::new(false),
                    cancelled: AtomicBool::new(false),
                    responded: AtomicBool::new(false),
                    response: Mutex::new(None) })
  }

  /// Whether retransmission of the original message should stop:
  /// acknowledged, rejected, timed out, or explicitly cancelled. A
  /// caller expecting a separate response must keep waiting on
  /// [`Transaction::responded`] even after this returns true.
  pub fn settled(&self) -> bool {
    self.acknowledged.load(Ordering::SeqCst) || self.rejected.load(Ordering::SeqCst)
    || self.timeouted.load(Ordering::SeqCst) || self.cancelled.load(Ordering::SeqCst)
  }
}

/// What happened when an inbound request was looked up against the
/// dedup cache, per §4.2's three-way branch.
#[derive(Debug)]
pub enum RequestOutcome {
  /// Not seen before; the caller should dispatch it.
  Fresh,
  /// Seen before and already answered; resend the cached response (if
  /// one was recorded) and do not re-dispatch.
  DuplicateCompleted(Option<Message>),
  /// Seen before but still being worked on; ACK only, do not dispatch.
  DuplicateInProgress,
}

/// Outcome of looking up an inbound response/empty message.
#[derive(Debug, Default)]
pub struct ResponseLookup {
  /// The transaction this reply belongs to, if any were outstanding.
  pub transaction: Option<Arc<Transaction>>,
  /// Whether this reply piggybacked on the request's own ACK (same
  /// MID) as opposed to arriving as a separate response.
  pub piggyback: bool,
}

/// MID allocation, request deduplication, and CON/ACK/RST bookkeeping
/// for one endpoint.
pub struct MessageLayer {
  next_mid: Mutex<Id>,
  dedup: Mutex<DedupCache>,
  pending_by_token: Mutex<HashMap<(SocketAddr, Token), Arc<Transaction>>>,
  pending_by_mid: Mutex<HashMap<(SocketAddr, Id), Arc<Transaction>>>,
}

impl MessageLayer {
  /// Construct a message layer with its MID counter seeded from
  /// `token_seed` mixed with the current time, and a dedup cache sized
  /// per `config`.
  pub fn new(token_seed: u16, dedup_capacity: usize, exchange_lifetime: std::time::Duration) -> Self {
    let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(u64::from(token_seed) ^ 0x5EED_u64);
    Self { next_mid: Mutex::new(Id(rng.gen())),
           dedup: Mutex::new(DedupCache::new(dedup_capacity, exchange_lifetime)),
           pending_by_token: Mutex::new(HashMap::new()),
           pending_by_mid: Mutex::new(HashMap::new()) }
  }

  /// Claim the next outbound MID for `peer`, skipping any value
  /// currently tracked as outstanding for that peer.
  pub fn next_mid(&self, peer: SocketAddr) -> Id {
    let mut mid = self.next_mid.lock().unwrap();
    let pending = self.pending_by_mid.lock().unwrap();

    loop {
      let candidate = *mid;
      *mid = mid.next();
      if !pending.contains_key(&(peer, candidate)) {
        return candidate;
      }
    }
  }

  /// Look up an inbound request against the dedup cache (§4.2
  /// receive-request).
  pub fn receive_request(&self, peer: SocketAddr, msg: &Message, now: Instant) -> RequestOutcome {
    match self.dedup.lock().unwrap().lookup_or_insert(peer, msg.id, now) {
      | Lookup::Miss => RequestOutcome::Fresh,
      | Lookup::HitCompleted(resp) => RequestOutcome::DuplicateCompleted(resp),
      | Lookup::HitInProgress => RequestOutcome::DuplicateInProgress,
    }
  }

  /// Record the response produced for `(peer, mid)`, so a retransmit
  /// of the same request is answered without re-dispatching.
  pub fn complete_request(&self, peer: SocketAddr, mid: Id, response: Option<Message>) {
    self.dedup.lock().unwrap().complete(peer, mid, response);
  }

  /// Register a transaction for an outbound CON/NON request, tracked
  /// both by the token a matching response will carry and by the MID
  /// a bare empty ACK/RST (no token of its own to speak of) will carry.
  pub fn register_request(&self, peer: SocketAddr, token: Token, mid: Id) -> Arc<Transaction> {
    let t = Transaction::new(mid);
    self.pending_by_token.lock().unwrap().insert((peer, token), t.clone());
    self.pending_by_mid.lock().unwrap().insert((peer, mid), t.clone());
    t
  }

  /// Register a transaction for an outbound CON response or
  /// notification, tracked by its own MID (the ACK/RST that settles it
  /// carries no token).
  pub fn register_con_reply(&self, peer: SocketAddr, mid: Id) -> Arc<Transaction> {
    let t = Transaction::new(mid);
    self.pending_by_mid.lock().unwrap().insert((peer, mid), t.clone());
    t
  }

  /// Stop tracking a settled transaction tied to `token`/`mid`.
  pub fn forget_request(&self, peer: SocketAddr, token: Token, mid: Id) {
    self.pending_by_token.lock().unwrap().remove(&(peer, token));
    self.pending_by_mid.lock().unwrap().remove(&(peer, mid));
  }

  /// Stop tracking a settled transaction tied to `mid`.
  pub fn forget_con_reply(&self, peer: SocketAddr, mid: Id) {
    self.pending_by_mid.lock().unwrap().remove(&(peer, mid));
  }

  /// Look up an inbound response or empty ACK/RST (§4.2
  /// receive-response).
  pub fn receive_response(&self, peer: SocketAddr, msg: &Message) -> ResponseLookup {
    match msg.code.kind() {
      | CodeKind::Response => {
        let pending = self.pending_by_token.lock().unwrap();
        match pending.get(&(peer, msg.token)) {
          | Some(t) => {
            let piggyback = msg.id == t.request_mid;
            // Any matching response, piggybacked or separate, settles the
            // transaction: retransmission must stop and the caller's wait
            // for the response body is over.
            t.acknowledged.store(true, Ordering::SeqCst);
            t.responded.store(true, Ordering::SeqCst);
            *t.response.lock().unwrap() = Some(msg.clone());
            ResponseLookup { transaction: Some(t.clone()),
                             piggyback }
          },
          | None => ResponseLookup::default(),
        }
      },
      | CodeKind::Empty => {
        let pending = self.pending_by_mid.lock().unwrap();
        match pending.get(&(peer, msg.id)) {
          | Some(t) => {
            match msg.ty {
              | Type::Ack => t.acknowledged.store(true, Ordering::SeqCst),
              | Type::Reset => t.rejected.store(true, Ordering::SeqCst),
              | _ => {},
            }
            ResponseLookup { transaction: Some(t.clone()),
                             piggyback: true }
          },
          | None => ResponseLookup::default(),
        }
      },
      | _ => ResponseLookup::default(),
    }
  }
}
