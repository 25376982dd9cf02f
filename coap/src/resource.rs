//! The resource tree: the addressable things a [`crate::Endpoint`]
//! serves, and the handlers that render requests against them.
//!
//! Grounded on CoAPthon's `Resource`: a resource's identity (path,
//! visibility, observability), its content-negotiated payload store,
//! and its `changed`/`deleted` flags that drive observe notifications.

use std::collections::BTreeMap;

use coap_msg::known::ContentFormat;
use coap_msg::{Code, Message};

/// A request dispatched to a [`Handler`], already routed to its
/// resource by [`crate::request_layer`].
pub struct Request<'a> {
  /// The inbound message (method code, options, payload).
  pub msg: &'a Message,
  /// The full request path, `/`-joined.
  pub path: &'a str,
}

/// The outcome of handling a request: a response code, optional
/// payload tagged with its content format, and optionally a path to
/// mount a newly created child resource at (for `POST` on a container).
pub struct Response {
  /// Response code, e.g. `2.05 Content` or `4.04 Not Found`.
  pub code: Code,
  /// Response payload, if any.
  pub payload: Vec<u8>,
  /// Content-Format of `payload`.
  pub content_format: ContentFormat,
  /// Path of a child resource created by this request (`POST` on a
  /// container); rendered as a `Location-Path` option by the caller.
  pub location: Option<String>,
}

impl Response {
  /// A response with a code and no payload.
  pub fn empty(code: Code) -> Self {
    Self { code,
           payload: Vec::new(),
           content_format: ContentFormat::Text,
           location: None }
  }

  /// A response carrying a payload in the given content format.
  pub fn content(code: Code, payload: Vec<u8>, content_format: ContentFormat) -> Self {
    Self { code,
           payload,
           content_format,
           location: None }
  }
}

/// `4.05 Method Not Allowed`, the default outcome for handler methods
/// a resource doesn't implement (mirrors CoAPthon's `render_*` methods
/// raising `NotImplementedError` by default).
pub fn method_not_allowed() -> Response {
  Response::empty(Code::METHOD_NOT_ALLOWED)
}

/// Behavior a resource implements for the CoAP methods it supports.
///
/// Each method defaults to [`method_not_allowed`]; resources only
/// override what they actually serve.
pub trait Handler: Send + Sync {
  /// Handle `GET`.
  fn get(&self, _req: &Request<'_>, _res: &mut Resource) -> Response {
    method_not_allowed()
  }

  /// Handle `PUT`.
  fn put(&self, _req: &Request<'_>, _res: &mut Resource) -> Response {
    method_not_allowed()
  }

  /// Handle `POST`.
  fn post(&self, _req: &Request<'_>, _res: &mut Resource) -> Response {
    method_not_allowed()
  }

  /// Handle `DELETE`.
  fn delete(&self, _req: &Request<'_>, _res: &mut Resource) -> Response {
    method_not_allowed()
  }
}

/// A resource's data: everything about it except the handler logic.
///
/// See CoAPthon's `coapthon.resources.resource.Resource`.
#[derive(Debug, Clone)]
pub struct Resource {
  /// This resource's full path.
  pub path: String,
  /// Whether `/.well-known/core` discovery should list this resource.
  pub visible: bool,
  /// Whether clients may `GET ... Observe: 0` this resource.
  pub observable: bool,
  /// Whether `POST` may create children under this resource.
  pub allow_children: bool,
  /// CoRE Link Format attributes (`rt`, `if`, `sz`, ...).
  pub attributes: BTreeMap<String, String>,
  /// Payload per content format this resource can render (content
  /// negotiation source of truth; `render_GET` picks from here).
  payloads: BTreeMap<ContentFormat, Vec<u8>>,
  /// Current ETag, if the resource supports conditional GET.
  pub etag: Option<Vec<u8>>,
  /// `Max-Age` to attach to responses, if non-default.
  pub max_age: Option<u32>,
  /// Next `Observe` sequence number to hand to a new subscriber.
  pub observe_count: u32,
  /// Set by a handler after a successful mutation; the endpoint
  /// notifies subscribers and clears this flag.
  pub changed: bool,
  /// Set by a handler after a successful delete; like `changed` but
  /// triggers a final notification before subscriber deregistration.
  pub deleted: bool,
}

impl Resource {
  /// A new resource at `path` with no payload.
  pub fn new(path: impl Into<String>) -> Self {
    Self { path: path.into(),
           visible: true,
           observable: false,
           allow_children: false,
           attributes: BTreeMap::new(),
           payloads: BTreeMap::new(),
           etag: None,
           max_age: None,
           observe_count: 0,
           changed: false,
           deleted: false }
  }

  /// Set the payload for one content format, replacing any existing
  /// payload for that format.
  pub fn set_payload(&mut self, cf: ContentFormat, bytes: impl Into<Vec<u8>>) {
    self.payloads.insert(cf, bytes.into());
  }

  /// The payload for `cf`, if this resource has one.
  pub fn payload(&self, cf: ContentFormat) -> Option<&[u8]> {
    self.payloads.get(&cf).map(Vec::as_slice)
  }

  /// All content formats this resource currently has a payload for.
  pub fn available_formats(&self) -> impl Iterator<Item = ContentFormat> + '_ {
    self.payloads.keys().copied()
  }

  /// Bump `observe_count`, wrapping per RFC7641 §4's 24-bit sequence
  /// space, and return the new value to send as the next `Observe`.
  pub fn next_observe_value(&mut self) -> u32 {
    self.observe_count = (self.observe_count + 1) % (1 << 24);
    self.observe_count
  }
}

/// A node in the resource tree: a resource's data plus its handler.
pub struct Node {
  /// The resource's data.
  pub resource: Resource,
  /// The resource's method handlers.
  pub handler: Box<dyn Handler>,
}

/// The tree of resources an endpoint serves, keyed by their full,
/// `/`-joined path (no leading or trailing slash; the root is `""`).
///
/// See CoAPthon's `CoAP.add_resource` / `self.root` (a flat dict
/// keyed by path string, not a literal tree of child pointers).
#[derive(Default)]
pub struct Tree {
  nodes: BTreeMap<String, Node>,
}

impl Tree {
  /// An empty resource tree.
  pub fn new() -> Self {
    Self::default()
  }

  /// Mount `resource` with `handler` at `resource.path`. Returns
  /// `false` (and does not mount) if the resource's parent path isn't
  /// already present and allowing children, mirroring CoAPthon's
  /// `add_resource`.
  pub fn add(&mut self, resource: Resource, handler: Box<dyn Handler>) -> bool {
    let parent = parent_path(&resource.path);
    if !parent.is_empty() {
      match self.nodes.get(parent) {
        | Some(p) if p.resource.allow_children => (),
        | _ => return false,
      }
    }

    self.nodes.insert(resource.path.clone(), Node { resource, handler });
    true
  }

  /// Look up the node at `path`.
  pub fn get(&self, path: &str) -> Option<&Node> {
    self.nodes.get(path)
  }

  /// Mutably look up the node at `path`.
  pub fn get_mut(&mut self, path: &str) -> Option<&mut Node> {
    self.nodes.get_mut(path)
  }

  /// Remove the node at `path`, returning it if present.
  pub fn remove(&mut self, path: &str) -> Option<Node> {
    self.nodes.remove(path)
  }

  /// Iterate all mounted resources (e.g. to render `/.well-known/core`).
  pub fn iter(&self) -> impl Iterator<Item = &Node> {
    self.nodes.values()
  }
}

fn parent_path(path: &str) -> &str {
  match path.rfind('/') {
    | Some(ix) => &path[..ix],
    | None => "",
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  struct Echo;
  impl Handler for Echo {
    fn get(&self, _req: &Request<'_>, res: &mut Resource) -> Response {
      Response::content(Code::CONTENT, res.payload(ContentFormat::Text).unwrap_or(&[]).to_vec(), ContentFormat::Text)
    }
  }

  #[test]
  fn unhandled_methods_are_not_allowed() {
    let res = Resource::new("a");
    let node = Node { resource: res, handler: Box::new(Echo) };
    let req = Request { msg: &Message::new(coap_msg::Type::Con, Code::PUT, coap_msg::Id(1), coap_msg::Token::empty()),
                        path: "a" };
    let resp = node.handler.put(&req, &mut node.resource.clone());
    assert_eq!(resp.code, Code::METHOD_NOT_ALLOWED);
  }

  #[test]
  fn add_requires_parent_to_allow_children() {
    let mut tree = Tree::new();
    let mut root = Resource::new("");
    root.allow_children = true;
    assert!(tree.add(root, Box::new(Echo)));

    let mut child = Resource::new("a");
    child.allow_children = false;
    assert!(tree.add(child, Box::new(Echo)));

    let grandchild = Resource::new("a/b");
    assert!(!tree.add(grandchild, Box::new(Echo)));
  }

  #[test]
  fn observe_count_wraps_at_24_bits() {
    let mut res = Resource::new("a");
    res.observe_count = (1 << 24) - 1;
    assert_eq!(res.next_observe_value(), 0);
  }
}
