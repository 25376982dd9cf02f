use crate::opt::{uint_bytes, OptValue};
use crate::Message;

const PAYLOAD_MARKER: u8 = 0xFF;

/// Encode `msg` to its CoAP wire representation (RFC7252 §3).
///
/// Options are emitted in the order `msg.opts` iterates them, which is
/// always non-decreasing by option number (`OptionMap` is backed by a
/// `BTreeMap`), satisfying the codec's ordering invariant (§8 property 3).
pub fn encode(msg: &Message) -> Vec<u8> {
  let mut out = Vec::with_capacity(4 + msg.token.len() + msg.opts.0.len() * 4 + msg.payload.len());

  let byte0 = (msg.ver << 6) | (msg.ty.bits() << 4) | (msg.token.len() as u8);
  out.push(byte0);
  out.push(msg.code.into());
  out.extend_from_slice(&msg.id.to_be_bytes());
  out.extend_from_slice(msg.token.as_bytes());

  let mut last_number = 0u16;
  for (number, value) in msg.opts.iter() {
    encode_option(&mut out, last_number, number.0, value);
    last_number = number.0;
  }

  if !msg.payload.is_empty() {
    out.push(PAYLOAD_MARKER);
    out.extend_from_slice(&msg.payload);
  }

  out
}

fn encode_option(out: &mut Vec<u8>, last_number: u16, number: u16, value: &OptValue) {
  let delta = number - last_number;
  let bytes: Vec<u8>;
  let value_bytes: &[u8] = match value {
    | OptValue::Empty => &[],
    | OptValue::Opaque(b) => b.as_slice(),
    | OptValue::String(s) => s.as_bytes(),
    | OptValue::UInt(n) => {
      bytes = uint_bytes(*n);
      &bytes
    },
  };

  let (delta_nibble, delta_ext) = nibble_and_ext(delta);
  let (len_nibble, len_ext) = nibble_and_ext(value_bytes.len() as u16);

  out.push((delta_nibble << 4) | len_nibble);
  if let Some(b) = delta_ext.one() {
    out.push(b);
  }
  if let Some(bs) = delta_ext.two() {
    out.extend_from_slice(&bs);
  }
  if let Some(b) = len_ext.one() {
    out.push(b);
  }
  if let Some(bs) = len_ext.two() {
    out.extend_from_slice(&bs);
  }
  out.extend_from_slice(value_bytes);
}

/// Either no extended field, a 1-byte extended field (delta/length
/// 13-268), or a 2-byte extended field (269-65804).
enum Ext {
  None,
  One(u8),
  Two([u8; 2]),
}

impl Ext {
  fn one(&self) -> Option<u8> {
    match self {
      | Ext::One(b) => Some(*b),
      | _ => None,
    }
  }

  fn two(&self) -> Option<[u8; 2]> {
    match self {
      | Ext::Two(b) => Some(*b),
      | _ => None,
    }
  }
}

/// Split a delta or length value into its nibble (0-14) and any
/// extended bytes, per RFC7252 §3.1:
/// - `0..=12` is carried directly in the nibble.
/// - `13..=268` is nibble `13` plus one extended byte (`actual - 13`).
/// - `269..=65804` is nibble `14` plus two extended bytes (`actual - 269`).
fn nibble_and_ext(actual: u16) -> (u8, Ext) {
  match actual {
    | 0..=12 => (actual as u8, Ext::None),
    | 13..=268 => (13, Ext::One((actual - 13) as u8)),
    | _ => (14, Ext::Two((actual - 269).to_be_bytes())),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{Code, Id, Token, Type};

  #[test]
  fn nibble_boundaries() {
    assert!(matches!(nibble_and_ext(0), (0, Ext::None)));
    assert!(matches!(nibble_and_ext(12), (12, Ext::None)));
    assert!(matches!(nibble_and_ext(13), (13, Ext::One(0))));
    assert!(matches!(nibble_and_ext(268), (13, Ext::One(255))));
    assert!(matches!(nibble_and_ext(269), (14, Ext::Two([0, 0]))));
  }

  #[test]
  fn encode_empty_message() {
    let msg = Message::new(Type::Con, Code::GET, Id(1), Token::empty());
    let bytes = encode(&msg);
    assert_eq!(bytes, vec![0b01_00_0000, 0b000_00001, 0, 1]);
  }

  #[test]
  fn encode_with_token() {
    let msg = Message::new(Type::Con, Code::GET, Id(1), Token::new(&[0xAB]));
    let bytes = encode(&msg);
    assert_eq!(bytes[0] & 0b1111, 1);
    assert_eq!(&bytes[4..5], &[0xAB]);
  }

  #[test]
  fn encode_with_payload_adds_marker() {
    let mut msg = Message::new(Type::Con, Code::CONTENT, Id(1), Token::empty());
    msg.payload = vec![1, 2, 3];
    let bytes = encode(&msg);
    assert_eq!(bytes[bytes.len() - 4], 0xFF);
    assert_eq!(&bytes[bytes.len() - 3..], &[1, 2, 3]);
  }
}
