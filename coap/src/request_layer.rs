//! The request layer: routes an inbound request to a resource,
//! reassembles Block1 bodies, negotiates Block2 on oversized responses,
//! and applies Observe registration/deregistration.
//!
//! Grounded on `coapthon/resources/resource.py`'s content-negotiation
//! rules (`render_GET` picking from `resource.content`) and
//! `toad/src/server/{method.rs,path.rs}` for method/path vocabulary,
//! expressed as plain `match` dispatch per SPEC_FULL.md §4.5.

use std::net::SocketAddr;

use coap_msg::known::{self, Action, Block, ContentFormat};
use coap_msg::{Code, Id, Message, Token, Type};

use crate::block::{self, AssemblyTable};
use crate::observe::{Registry, Subscriber};
use crate::resource::{Node, Request, Response, Tree};

/// Routes and dispatches inbound requests against a resource tree.
pub struct RequestLayer {
  default_block_size: u16,
}

impl RequestLayer {
  /// A request layer that splits oversized responses at
  /// `default_block_size` bytes when the client didn't ask for a
  /// specific size.
  pub fn new(default_block_size: u16) -> Self {
    Self { default_block_size }
  }

  /// Handle one inbound request, mutating `tree`'s resources and
  /// `observe`'s subscriptions as a side effect, and return the
  /// response message to send back.
  #[allow(clippy::too_many_arguments)]
  pub fn handle(&self, tree: &mut Tree, observe: &mut Registry, block1: &mut AssemblyTable, peer: SocketAddr,
                 req: &Message)
                 -> Message {
    let path = req.path();

    let body = match self.reassemble_block1(block1, peer, req) {
      | ReassemblyOutcome::Complete(bytes) => bytes,
      | ReassemblyOutcome::Continue => return self.block1_ack(req, Code::CONTINUE),
    };

    let Some(node) = tree.get_mut(&path) else {
      return self.error_response(req, Code::NOT_FOUND);
    };

    if let Some(cf) = req.content_format() {
      if node.resource.payload(cf).is_none() && matches!(req.code, Code::PUT | Code::POST) {
        // Accept regardless: a handler may choose to store whatever
        // format it's given. Content-Format is only binding for GET's
        // Accept negotiation below.
      }
    }

    let mut patched_req = req.clone();
    patched_req.payload = body;
    let handler_req = Request { msg: &patched_req,
                                 path: &path };

    let mut response = match req.code {
      | Code::GET => node.handler.get(&handler_req, &mut node.resource),
      | Code::PUT => node.handler.put(&handler_req, &mut node.resource),
      | Code::POST => node.handler.post(&handler_req, &mut node.resource),
      | Code::DELETE => node.handler.delete(&handler_req, &mut node.resource),
      | _ => crate::resource::method_not_allowed(),
    };

    let mut observe_seq = None;
    if req.code == Code::GET {
      self.apply_accept(req, node.resource.available_formats().collect(), &mut response);
      if let Some(n) = req.observe() {
        observe_seq = self.apply_observe(observe, &path, peer, req, n, &mut node.resource, &response);
      }
    }

    if let Some(etag) = node.resource.etag.clone() {
      self.apply_etag(req, &etag, &mut response);
    }

    let mut out = self.build_response(req, &response, node.resource.max_age);
    if let Some(seq) = observe_seq {
      out.set_observe(seq);
    }
    self.apply_block2(req, &mut out, response.payload);
    out
  }

  /// Re-render `node`'s resource for one subscriber and bump its
  /// observation sequence number, per §4.4's notify rule: the endpoint
  /// re-runs this layer for the subscriber's original request rather
  /// than replaying a cached response, so the notification always
  /// reflects current state. The returned message carries the
  /// subscriber's token and a fresh `Observe` value; MID and CON/NON
  /// type are the caller's (the endpoint's) to assign.
  pub fn render_notification(&self, node: &mut Node, sub: &Subscriber) -> Message {
    let probe = Message::new(Type::Con, Code::GET, Id(0), sub.token);
    let handler_req = Request { msg: &probe,
                                 path: &sub.path };
    let mut response = node.handler.get(&handler_req, &mut node.resource);

    if let Some(accept) = sub.accept {
      let available: Vec<_> = node.resource.available_formats().collect();
      if response.code.class == 2 && !available.is_empty() && !available.contains(&accept) {
        response.code = Code::NOT_ACCEPTABLE;
        response.payload.clear();
      }
    }

    let seq = node.resource.next_observe_value();
    let mut out = self.build_response(&probe, &response, node.resource.max_age);
    out.set_observe(seq);
    self.apply_block2(&probe, &mut out, response.payload);
    out
  }

  fn reassemble_block1(&self, block1: &mut AssemblyTable, peer: SocketAddr, req: &Message) -> ReassemblyOutcome {
    let Some(opt) = req.opts.get(known::BLOCK1) else {
      return ReassemblyOutcome::Complete(req.payload.clone());
    };
    let block = Block::from(opt.as_u64() as u32);

    match block1.accept(peer, req.token, block, &req.payload) {
      | Some(full) => ReassemblyOutcome::Complete(full),
      | None => ReassemblyOutcome::Continue,
    }
  }

  fn block1_ack(&self, req: &Message, code: Code) -> Message {
    let mut resp = Message::new(Type::Ack, code, req.id, req.token);
    if let Some(opt) = req.opts.get(known::BLOCK1) {
      resp.opts.set(known::BLOCK1, opt.as_u64());
    }
    resp
  }

  fn error_response(&self, req: &Message, code: Code) -> Message {
    Message::new(Type::Ack, code, req.id, req.token)
  }

  fn apply_accept(&self, req: &Message, available: Vec<ContentFormat>, response: &mut Response) {
    let Some(accept) = req.opts.get(known::ACCEPT) else {
      return;
    };
    let wanted = ContentFormat::from(accept.as_u64() as u16);
    if response.code.kind() == coap_msg::CodeKind::Response && response.code.class == 2 && !available.contains(&wanted)
       && !available.is_empty()
    {
      response.code = Code::NOT_ACCEPTABLE;
      response.payload.clear();
    }
  }

  /// Apply a GET's `Observe` option, registering or deregistering
  /// `peer`/`token` as appropriate. On a successful registration,
  /// returns the sequence number to stamp on the outgoing response's
  /// `Observe` option.
  fn apply_observe(&self, observe: &mut Registry, path: &str, peer: SocketAddr, req: &Message, n: u32,
                    resource: &mut crate::resource::Resource, response: &Response)
                    -> Option<u32> {
    if !resource.observable {
      return None;
    }
    let action = Action::from_u32(n)?;
    let accept = req.opts.get(known::ACCEPT).map(|v| ContentFormat::from(v.as_u64() as u16));
    observe.apply(path, peer, req.token, action, accept);
    (action == Action::Register && response.code.class == 2).then(|| resource.next_observe_value())
  }

  /// `2.03 Valid`, no payload, if `req` is a GET carrying an ETag
  /// option matching the resource's current one.
  fn apply_etag(&self, req: &Message, etag: &[u8], response: &mut Response) {
    if req.code != Code::GET {
      return;
    }
    let matches = req.opts.get_all(known::ETAG).iter().any(|v| v.as_bytes() == etag);
    if matches {
      response.code = Code::VALID;
      response.payload.clear();
    }
  }

  fn build_response(&self, req: &Message, response: &Response, max_age: Option<u32>) -> Message {
    let mut msg = Message::new(Type::Ack, response.code, req.id, req.token);
    msg.set_content_format(response.content_format);
    if let Some(age) = max_age {
      msg.opts.set(known::MAX_AGE, age);
    }
    if let Some(loc) = &response.location {
      for seg in loc.split('/').filter(|s| !s.is_empty()) {
        msg.opts.add(known::LOCATION_PATH, seg);
      }
    }
    msg
  }

  /// Split `payload` into the block the client asked for, honoring its
  /// requested SZX (RFC7959 §2.3: the server must not use a block size
  /// larger than the one the client requested) clamped down to this
  /// layer's own configured default, which stays the ceiling when the
  /// client didn't ask for Block2 at all.
  fn apply_block2(&self, req: &Message, out: &mut Message, payload: Vec<u8>) {
    let requested = req.opts.get(known::BLOCK2).map(|v| Block::from(v.as_u64() as u32));
    let requested_num = requested.map(Block::num).unwrap_or(0);
    let block_size = requested.map(|b| b.size().min(self.default_block_size))
                               .unwrap_or(self.default_block_size);

    if requested.is_none() && payload.len() <= block_size as usize {
      out.payload = payload;
      return;
    }

    match block::block_at(&payload, requested_num, block_size) {
      | Some((block, chunk)) => {
        out.opts.set(known::BLOCK2, u32::from(block));
        out.payload = chunk.to_vec();
      },
      | None => {
        out.code = Code::BAD_OPTION;
        out.payload.clear();
      },
    }
  }
}

enum ReassemblyOutcome {
  Complete(Vec<u8>),
  Continue,
}

#[cfg(test)]
mod tests {
  use std::net::{Ipv4Addr, SocketAddrV4};

  use coap_msg::{Id, Type};

  use super::*;
  use crate::resource::{Handler, Resource};

  fn peer() -> SocketAddr {
    SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::new(127, 0, 0, 1), 5683))
  }

  struct Counter;
  impl Handler for Counter {
    fn get(&self, _req: &Request<'_>, res: &mut Resource) -> Response {
      Response::content(Code::CONTENT, res.payload(ContentFormat::Text).unwrap_or(&[]).to_vec(), ContentFormat::Text)
    }
  }

  fn get(path: &str, token: Token) -> Message {
    let mut m = Message::new(Type::Con, Code::GET, Id(1), token);
    m.set_path(path);
    m
  }

  #[test]
  fn missing_resource_is_not_found() {
    let layer = RequestLayer::new(1024);
    let mut tree = Tree::new();
    let mut observe = Registry::new();
    let mut block1 = AssemblyTable::new();

    let resp = layer.handle(&mut tree, &mut observe, &mut block1, peer(), &get("nope", Token::empty()));
    assert_eq!(resp.code, Code::NOT_FOUND);
  }

  #[test]
  fn oversized_response_is_split_into_block2() {
    let layer = RequestLayer::new(16);
    let mut tree = Tree::new();
    let mut res = Resource::new("big");
    res.set_payload(ContentFormat::Text, vec![7u8; 40]);
    tree.add(res, Box::new(Counter));
    let mut observe = Registry::new();
    let mut block1 = AssemblyTable::new();

    let resp = layer.handle(&mut tree, &mut observe, &mut block1, peer(), &get("big", Token::empty()));
    assert_eq!(resp.payload.len(), 16);
    let block = Block::from(resp.opts.get(known::BLOCK2).unwrap().as_u64() as u32);
    assert_eq!(block.num(), 0);
    assert!(block.more());
  }

  #[test]
  fn block2_honors_a_client_requested_size_smaller_than_the_default() {
    let layer = RequestLayer::new(1024);
    let mut tree = Tree::new();
    let mut res = Resource::new("big");
    res.set_payload(ContentFormat::Text, vec![7u8; 40]);
    tree.add(res, Box::new(Counter));
    let mut observe = Registry::new();
    let mut block1 = AssemblyTable::new();

    let mut req = get("big", Token::empty());
    req.opts.set(known::BLOCK2, u32::from(Block::new(16, 0, false)));

    let resp = layer.handle(&mut tree, &mut observe, &mut block1, peer(), &req);
    let block = Block::from(resp.opts.get(known::BLOCK2).unwrap().as_u64() as u32);
    assert_eq!(block.size(), 16, "server must not exceed the client's requested block size");
    assert_eq!(resp.payload.len(), 16);
    assert!(block.more());
  }

  #[test]
  fn observe_registration_stamps_sequence_number() {
    let layer = RequestLayer::new(1024);
    let mut tree = Tree::new();
    let mut res = Resource::new("temp");
    res.observable = true;
    res.set_payload(ContentFormat::Text, b"21c".to_vec());
    tree.add(res, Box::new(Counter));
    let mut observe = Registry::new();
    let mut block1 = AssemblyTable::new();

    let token = Token::new(&[0x01]);
    let mut req = get("temp", token);
    req.set_observe(0);

    let resp = layer.handle(&mut tree, &mut observe, &mut block1, peer(), &req);
    assert_eq!(resp.observe(), Some(1));
    assert_eq!(observe.subscribers("temp").len(), 1);
  }

  #[test]
  fn matching_etag_on_get_is_valid_with_no_payload() {
    let layer = RequestLayer::new(1024);
    let mut tree = Tree::new();
    let mut res = Resource::new("temp");
    res.set_payload(ContentFormat::Text, b"21c".to_vec());
    res.etag = Some(vec![0xAA, 0xBB]);
    tree.add(res, Box::new(Counter));
    let mut observe = Registry::new();
    let mut block1 = AssemblyTable::new();

    let mut req = get("temp", Token::empty());
    req.opts.add(known::ETAG, vec![0x01]);
    req.opts.add(known::ETAG, vec![0xAA, 0xBB]);

    let resp = layer.handle(&mut tree, &mut observe, &mut block1, peer(), &req);
    assert_eq!(resp.code, Code::VALID);
    assert!(resp.payload.is_empty());
  }

  #[test]
  fn non_matching_etag_on_get_renders_normally() {
    let layer = RequestLayer::new(1024);
    let mut tree = Tree::new();
    let mut res = Resource::new("temp");
    res.set_payload(ContentFormat::Text, b"21c".to_vec());
    res.etag = Some(vec![0xAA, 0xBB]);
    tree.add(res, Box::new(Counter));
    let mut observe = Registry::new();
    let mut block1 = AssemblyTable::new();

    let mut req = get("temp", Token::empty());
    req.opts.add(known::ETAG, vec![0x01]);

    let resp = layer.handle(&mut tree, &mut observe, &mut block1, peer(), &req);
    assert_eq!(resp.code, Code::CONTENT);
    assert_eq!(resp.payload, b"21c");
  }
}
