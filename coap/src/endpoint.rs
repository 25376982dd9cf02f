//! The endpoint runtime: one UDP socket, a receive loop, a worker
//! thread per inbound datagram, and a blocking client-request path
//! with retransmission.
//!
//! Grounded on `coapthon/server/server.py`'s `ThreadingUDPServer` /
//! `CoAPHandler` split (one thread accepts, one thread per request
//! handles it) and `toad/src/core/mod.rs`'s `tick`/`poll_req` naming,
//! reworked per SPEC_FULL.md §4.6 into the thread-based model the
//! design notes explicitly allow.

use std::net::{SocketAddr, ToSocketAddrs};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use coap_msg::{Code, CodeKind, Message, Token, Type};

use crate::block::AssemblyTable;
use crate::config::Config;
use crate::error::{Error, What};
use crate::message_layer::{MessageLayer, RequestOutcome};
use crate::net::{Addrd, Socket};
use crate::observe::Registry;
use crate::request_layer::RequestLayer;
use crate::resource::Tree;
use crate::retry::{Attempts, RetryTimer, YouShould};

/// How often the receive loop wakes up to check the shutdown flag.
const POLL_INTERVAL: Duration = Duration::from_millis(200);
/// How often a blocking request call re-checks its transaction while waiting.
const AWAIT_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// A running CoAP endpoint: the resource tree it serves plus the
/// message/block/observe layers that implement the protocol on top of
/// one bound UDP socket.
pub struct Endpoint {
  socket: Arc<Socket>,
  message_layer: Arc<MessageLayer>,
  request_layer: RequestLayer,
  tree: Mutex<Tree>,
  observe: Mutex<Registry>,
  block1: Mutex<AssemblyTable>,
  config: Config,
  running: AtomicBool,
}

impl Endpoint {
  /// Bind a new endpoint to `addr`.
  pub fn bind<A: ToSocketAddrs>(addr: A, config: Config) -> std::io::Result<Arc<Self>> {
    let socket = Socket::bind(addr, POLL_INTERVAL)?;
    let message_layer =
      MessageLayer::new(config.msg.token_seed, config.dedup_cache_capacity, config.exchange_lifetime());

    Ok(Arc::new(Self { socket: Arc::new(socket),
                        message_layer: Arc::new(message_layer),
                        request_layer: RequestLayer::new(config.default_block_size),
                        tree: Mutex::new(Tree::new()),
                        observe: Mutex::new(Registry::new()),
                        block1: Mutex::new(AssemblyTable::new()),
                        config,
                        running: AtomicBool::new(true) }))
  }

  /// The local address this endpoint is bound to.
  pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
    self.socket.local_addr()
  }

  /// Lock the resource tree, for mounting resources before or during [`Self::serve_forever`].
  pub fn resources(&self) -> std::sync::MutexGuard<'_, Tree> {
    self.tree.lock().unwrap()
  }

  /// Ask the receive loop to stop after its current poll interval.
  pub fn shutdown(&self) {
    self.running.store(false, Ordering::SeqCst);
  }

  /// Run the receive loop on the calling thread, spawning a worker
  /// thread per inbound datagram, until [`Self::shutdown`] is called.
  pub fn serve_forever(self: &Arc<Self>) -> std::io::Result<()> {
    while self.running.load(Ordering::SeqCst) {
      match self.socket.recv() {
        | Ok(Some(Addrd(Ok(msg), peer))) => {
          let this = self.clone();
          thread::spawn(move || this.handle_inbound(peer, msg));
        },
        | Ok(Some(Addrd(Err(e), peer))) => {
          log::warn!("dropping malformed datagram from {peer}: {}", e.error);
          if let Some((Type::Con, mid)) = e.header {
            let rst = Message::new(Type::Reset, Code::EMPTY, mid, Token::empty());
            let _ = self.socket.send(Addrd(&rst, peer));
          }
        },
        | Ok(None) => continue,
        | Err(e) => return Err(e),
      }
    }
    Ok(())
  }

  fn handle_inbound(self: &Arc<Self>, peer: SocketAddr, msg: Message) {
    log::trace!("recv {} from {peer}", crate::logging::msg_summary(&msg));
    match msg.code.kind() {
      | CodeKind::Request => self.handle_request(peer, msg),
      | CodeKind::Response | CodeKind::Empty => self.handle_reply(peer, &msg),
      | CodeKind::Malformed => log::warn!("dropping message with malformed code from {peer}: {}", msg.code),
    }
  }

  fn handle_request(self: &Arc<Self>, peer: SocketAddr, msg: Message) {
    match self.message_layer.receive_request(peer, &msg, Instant::now()) {
      | RequestOutcome::Fresh => {
        let path = msg.path();
        let dispatch = {
          // `unwrap_or_else(PoisonError::into_inner)` rather than `unwrap`:
          // a caught handler panic below must not leave these locks
          // permanently poisoned for the rest of the server's lifetime.
          let mut tree = self.tree.lock().unwrap_or_else(|e| e.into_inner());
          let mut observe = self.observe.lock().unwrap_or_else(|e| e.into_inner());
          let mut block1 = self.block1.lock().unwrap_or_else(|e| e.into_inner());
          catch_unwind(AssertUnwindSafe(|| self.request_layer.handle(&mut tree, &mut observe, &mut block1, peer, &msg)))
        };

        let mut response = match dispatch {
          | Ok(resp) => resp,
          | Err(_) => {
            log::error!("handler for {path} panicked while serving a request from {peer}");
            Message::new(Type::Ack, Code::INTERNAL_SERVER_ERROR, msg.id, msg.token)
          },
        };

        match msg.ty {
          | Type::Con => {
            response.ty = Type::Ack;
            response.id = msg.id;
          },
          | Type::Non => {
            response.ty = Type::Non;
            response.id = self.message_layer.next_mid(peer);
          },
          | _ => {},
        }

        self.message_layer.complete_request(peer, msg.id, Some(response.clone()));
        if let Err(e) = self.socket.send(Addrd(&response, peer)) {
          log::warn!("failed to send response to {peer}: {e}");
        }

        self.notify_subscribers(&path);
      },
      | RequestOutcome::DuplicateCompleted(Some(resp)) => {
        let _ = self.socket.send(Addrd(&resp, peer));
      },
      | RequestOutcome::DuplicateCompleted(None) => {},
      | RequestOutcome::DuplicateInProgress => {
        if msg.ty == Type::Con {
          let ack = Message::new(Type::Ack, Code::EMPTY, msg.id, msg.token);
          let _ = self.socket.send(Addrd(&ack, peer));
        }
      },
    }
  }

  /// Block for up to one socket poll interval and process whatever
  /// arrives as a reply. A caller blocked in [`Self::request`] has no
  /// separate receive-loop thread guaranteed to be running on its
  /// behalf, so it does its own opportunistic reads while it waits
  /// instead of only sleeping. Inbound requests seen this way (this
  /// endpoint also serving resources while one of its own requests is
  /// outstanding) are left for [`Self::serve_forever`]'s own thread,
  /// if one is running, to pick up.
  fn poll_once(&self) {
    if let Ok(Some(Addrd(Ok(msg), peer))) = self.socket.recv() {
      if matches!(msg.code.kind(), CodeKind::Response | CodeKind::Empty) {
        self.handle_reply(peer, &msg);
      }
    }
  }

  fn handle_reply(&self, peer: SocketAddr, msg: &Message) {
    let lookup = self.message_layer.receive_response(peer, msg);
    let Some(_transaction) = lookup.transaction else {
      log::debug!("dropping reply from {peer} with no matching transaction (token {:?})", msg.token);
      return;
    };

    if msg.code.kind() == CodeKind::Response && msg.ty == Type::Con && !lookup.piggyback {
      let ack = Message::new(Type::Ack, Code::EMPTY, msg.id, Token::empty());
      let _ = self.socket.send(Addrd(&ack, peer));
    }
  }

  /// Walk `path`'s subscribers and emit one notification each, per §4.4's
  /// notify rule: a resource whose handler set `changed` or `deleted`
  /// gets re-rendered once per subscriber, each with a freshly bumped
  /// `Observe` sequence number.
  ///
  /// A `deleted` resource is removed from the tree and its subscriber
  /// list dropped only after the final notification has been built, so
  /// the last render still sees the resource's last live state.
  fn notify_subscribers(self: &Arc<Self>, path: &str) {
    let (deleted, renders) = {
      let mut tree = self.tree.lock().unwrap_or_else(|e| e.into_inner());
      let mut observe = self.observe.lock().unwrap_or_else(|e| e.into_inner());

      let Some(node) = tree.get_mut(path) else { return };
      if !node.resource.changed && !node.resource.deleted {
        return;
      }
      let deleted = node.resource.deleted;
      node.resource.changed = false;
      node.resource.deleted = false;

      let subs = observe.subscribers(path).to_vec();
      let mut renders = Vec::with_capacity(subs.len());
      for sub in &subs {
        let msg = self.request_layer.render_notification(node, sub);
        renders.push((sub.peer, sub.token, msg));
      }
      (deleted, renders)
    };

    for (peer, token, msg) in renders {
      self.send_notification(peer, token, msg);
    }

    if deleted {
      let mut tree = self.tree.lock().unwrap_or_else(|e| e.into_inner());
      let mut observe = self.observe.lock().unwrap_or_else(|e| e.into_inner());
      tree.remove(path);
      observe.forget_path(path);
    }
  }

  /// Send one notification, as CON, and hand its retransmission to a
  /// background timer thread: notifications enter the same retry
  /// machinery as an outbound request (§4.2), but the endpoint doesn't
  /// block on them.
  ///
  /// Exhausted retransmission or a received RST deregisters the
  /// subscriber (§4.4's deregister triggers (b) and (c)).
  fn send_notification(self: &Arc<Self>, peer: SocketAddr, token: Token, mut msg: Message) {
    let mid = self.message_layer.next_mid(peer);
    msg.id = mid;
    msg.token = token;
    msg.ty = Type::Con;

    let transaction = self.message_layer.register_con_reply(peer, mid);
    if let Err(e) = self.socket.send(Addrd(&msg, peer)) {
      log::warn!("failed to send notification to {peer}: {e}");
    }

    let this = self.clone();
    thread::spawn(move || {
      let max_attempts = Attempts(this.config.msg.con.max_attempts.0 + 1);
      let mut timer = RetryTimer::new(Instant::now(), this.config.msg.con.retry_strategy, max_attempts);

      loop {
        if transaction.settled() {
          break;
        }
        match timer.what_should_i_do(Instant::now()) {
          | YouShould::Wait => thread::sleep(AWAIT_POLL_INTERVAL),
          | YouShould::Retry => {
            let _ = this.socket.send(Addrd(&msg, peer));
          },
          | YouShould::Cry => {
            transaction.timeouted.store(true, Ordering::SeqCst);
            break;
          },
        }
      }

      this.message_layer.forget_con_reply(peer, mid);

      if transaction.rejected.load(Ordering::SeqCst) {
        log::debug!("observer {peer} reset a notification; deregistering token {token:?}");
        this.observe.lock().unwrap_or_else(|e| e.into_inner()).deregister_by_token(peer, token);
      } else if transaction.timeouted.load(Ordering::SeqCst) {
        log::debug!("notification to {peer} timed out; deregistering token {token:?}");
        this.observe.lock().unwrap_or_else(|e| e.into_inner()).deregister_by_token(peer, token);
      }
    });
  }

  /// Send a request and block until a response arrives, is rejected,
  /// or retransmissions are exhausted.
  ///
  /// `msg`'s MID is overwritten with a freshly allocated one; its token
  /// is used to correlate the reply and is left as the caller set it.
  pub fn request(&self, peer: SocketAddr, mut msg: Message) -> Result<Message, Error> {
    let mid = self.message_layer.next_mid(peer);
    msg.id = mid;
    let token = msg.token;
    let ty = msg.ty;
    let start = Instant::now();

    let transaction = self.message_layer.register_request(peer, token, mid);
    self.socket.send(Addrd(&msg, peer)).map_err(|e| Error::from(e))?;

    if ty != Type::Con {
      let deadline = start + self.config.max_latency();
      while Instant::now() < deadline && !transaction.settled() {
        self.poll_once();
      }
      self.message_layer.forget_request(peer, token, mid);
      return transaction.response
                         .lock()
                         .unwrap()
                         .take()
                         .ok_or_else(|| crate::error::When::None.what(What::MessageNeverAcked));
    }

    // See SPEC_FULL.md's note on `RetryTimer`: `Attempts` counts the
    // next attempt to grant, starting from 1 for the message already
    // sent above, so `max_attempts + 1` is what grants exactly
    // `max_attempts` retries before giving up.
    let max_attempts = Attempts(self.config.msg.con.max_attempts.0 + 1);
    let mut timer = RetryTimer::new(start, self.config.msg.con.retry_strategy, max_attempts);

    loop {
      if transaction.settled() {
        break;
      }

      match timer.what_should_i_do(Instant::now()) {
        | YouShould::Wait => self.poll_once(),
        | YouShould::Retry => {
          let _ = self.socket.send(Addrd(&msg, peer));
        },
        | YouShould::Cry => {
          transaction.timeouted.store(true, Ordering::SeqCst);
          break;
        },
      }
    }

    if transaction.rejected.load(Ordering::SeqCst) {
      self.message_layer.forget_request(peer, token, mid);
      return Err(crate::error::When::Sending(peer, mid, token).what(What::MessageNeverAcked));
    }
    if transaction.timeouted.load(Ordering::SeqCst) {
      self.message_layer.forget_request(peer, token, mid);
      return Err(crate::error::When::Sending(peer, mid, token).what(What::MessageNeverAcked));
    }

    // Acknowledged, but not necessarily answered yet: a bare empty ACK
    // only promises the response will arrive separately, correlated by
    // token rather than this MID. Keep the transaction registered and
    // wait for it instead of giving up the moment retransmission stops.
    let response_deadline = Instant::now() + self.config.max_latency();
    while Instant::now() < response_deadline && !transaction.responded.load(Ordering::SeqCst)
          && !transaction.rejected.load(Ordering::SeqCst)
    {
      self.poll_once();
    }

    self.message_layer.forget_request(peer, token, mid);

    if transaction.rejected.load(Ordering::SeqCst) {
      return Err(crate::error::When::Sending(peer, mid, token).what(What::MessageNeverAcked));
    }

    transaction.response
               .lock()
               .unwrap()
               .take()
               .ok_or_else(|| crate::error::When::Sending(peer, mid, token).what(What::MessageNeverAcked))
  }
}

#[cfg(test)]
mod tests {
  use std::time::Duration;

  use coap_msg::known::ContentFormat;
  use coap_msg::Id;

  use super::*;
  use crate::resource::{Handler, Request, Resource, Response};

  struct Echo;
  impl Handler for Echo {
    fn get(&self, _req: &Request<'_>, res: &mut Resource) -> Response {
      Response::content(Code::CONTENT, res.payload(ContentFormat::Text).unwrap_or(&[]).to_vec(), ContentFormat::Text)
    }
  }

  #[test]
  fn client_and_server_exchange_a_confirmable_request() {
    let mut server_config = Config::default();
    server_config.msg.con.max_attempts = Attempts(2);
    let server = Endpoint::bind("127.0.0.1:0", server_config).unwrap();
    {
      let mut res = Resource::new("hello");
      res.set_payload(ContentFormat::Text, b"world".to_vec());
      server.resources().add(res, Box::new(Echo));
    }
    let server_addr = server.local_addr().unwrap();

    let server_loop = server.clone();
    thread::spawn(move || server_loop.serve_forever().unwrap());

    let mut client_config = Config::default();
    client_config.msg.con.max_attempts = Attempts(2);
    let client = Endpoint::bind("127.0.0.1:0", client_config).unwrap();

    let mut req = Message::new(Type::Con, Code::GET, Id(0), Token::new(&[0x9]));
    req.set_path("hello");

    let resp = client.request(server_addr, req).unwrap();
    assert_eq!(resp.code, Code::CONTENT);
    assert_eq!(resp.payload, b"world");

    server.shutdown();
    thread::sleep(Duration::from_millis(50));
  }
}
