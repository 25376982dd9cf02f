//! A threaded CoAP (RFC 7252) endpoint: message, block, observe, and
//! request layers wired over a [`std::net::UdpSocket`].
//!
//! ```no_run
//! use coap::config::Config;
//! use coap::endpoint::Endpoint;
//! use coap::resource::{Handler, Request, Resource, Response};
//! use coap_msg::known::ContentFormat;
//! use coap_msg::Code;
//!
//! struct Hello;
//! impl Handler for Hello {
//!   fn get(&self, _req: &Request<'_>, res: &mut Resource) -> Response {
//!     Response::content(Code::CONTENT, res.payload(ContentFormat::Text).unwrap_or(&[]).to_vec(), ContentFormat::Text)
//!   }
//! }
//!
//! let endpoint = Endpoint::bind("127.0.0.1:5683", Config::default()).unwrap();
//! {
//!   let mut hello = Resource::new("hello");
//!   hello.set_payload(ContentFormat::Text, b"world".to_vec());
//!   endpoint.resources().add(hello, Box::new(Hello));
//! }
//! endpoint.serve_forever().unwrap();
//! ```

pub mod block;
pub mod config;
pub mod dedup;
pub mod endpoint;
pub mod error;
pub mod logging;
pub mod message_layer;
pub mod net;
pub mod observe;
pub mod request_layer;
pub mod resource;
pub mod retry;

pub use config::Config;
pub use endpoint::Endpoint;
pub use error::Error;
