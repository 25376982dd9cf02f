//! A minimal CoAP server exposing one observable resource.
//!
//! ```sh
//! cargo run --example server
//! ```

use coap::config::Config;
use coap::endpoint::Endpoint;
use coap::resource::{Handler, Request, Resource, Response};
use coap_msg::known::ContentFormat;
use coap_msg::Code;

struct Temperature;

impl Handler for Temperature {
  fn get(&self, _req: &Request<'_>, res: &mut Resource) -> Response {
    Response::content(Code::CONTENT,
                       res.payload(ContentFormat::Text).unwrap_or(b"unknown").to_vec(),
                       ContentFormat::Text)
  }

  fn put(&self, req: &Request<'_>, res: &mut Resource) -> Response {
    res.set_payload(ContentFormat::Text, req.msg.payload.clone());
    res.changed = true;
    Response::empty(Code::CHANGED)
  }
}

fn main() -> std::io::Result<()> {
  simple_logger::SimpleLogger::new().init().ok();

  let endpoint = Endpoint::bind("127.0.0.1:5683", Config::default())?;
  {
    let mut temperature = Resource::new("temperature");
    temperature.observable = true;
    temperature.set_payload(ContentFormat::Text, b"21.0".to_vec());
    endpoint.resources().add(temperature, Box::new(Temperature));
  }

  log::info!("listening on {}", endpoint.local_addr()?);
  endpoint.serve_forever()
}
