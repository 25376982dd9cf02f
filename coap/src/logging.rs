use coap_msg::Message;

/// One-line human-readable summary of a message, for `log::debug!` call
/// sites throughout the layers (e.g. `log::debug!("recv {}", msg_summary(&msg))`).
pub(crate) fn msg_summary(msg: &Message) -> String {
  format!("{:?} {} {} token={:?} {}B payload",
          msg.ty,
          msg.code,
          msg.id.0,
          msg.token.as_bytes(),
          msg.payload.len())
}

#[cfg(test)]
mod tests {
  use coap_msg::{Code, Id, Token, Type};

  use super::*;

  #[test]
  fn summary_is_human_readable() {
    let msg = Message::new(Type::Con, Code::GET, Id(1), Token::empty());
    let s = msg_summary(&msg);
    assert!(s.contains("Con"));
    assert!(s.contains("0.01"));
  }
}
