use crate::opt::{bytes_to_uint, known, OptValue, ValueType};
use crate::{Code, Id, Message, MessageParseError, OptParseError, Token, Type};

const PAYLOAD_MARKER: u8 = 0xFF;

/// Decode a CoAP datagram per RFC7252 §3.
///
/// `decode(encode(m)) == m` for any message produced by this crate
/// (§8 property 1/2 of the spec). Malformed input is reported via
/// [`MessageParseError`] rather than panicking; callers decide how to
/// react (drop silently for empty/RST per §4.1, elicit an RST for CON
/// per §7).
pub fn decode(bytes: &[u8]) -> Result<Message, MessageParseError> {
  let mut cur = Cursor::new(bytes);

  let byte0 = cur.take_one().ok_or_else(MessageParseError::eof)?;
  let ver = byte0 >> 6;
  if ver != crate::message::VERSION {
    return Err(MessageParseError::UnsupportedVersion(ver));
  }

  let ty = Type::try_from((byte0 >> 4) & 0b11)?;
  let tkl = byte0 & 0b1111;
  if tkl > 8 {
    return Err(MessageParseError::InvalidTokenLength(tkl));
  }

  let code = Code::from(cur.take_one().ok_or_else(MessageParseError::eof)?);

  let id_bytes = cur.take(2).ok_or_else(MessageParseError::eof)?;
  let id = Id::from_be_bytes([id_bytes[0], id_bytes[1]]);

  let token_bytes = cur.take(tkl as usize).ok_or_else(MessageParseError::eof)?;
  let token = Token::new(token_bytes);

  let mut msg = Message::new(ty, code, id, token);
  decode_options_and_payload(&mut cur, &mut msg)?;

  Ok(msg)
}

/// Recover just the type and message ID from `bytes`, without decoding
/// options or payload.
///
/// Used by callers that must react to a malformed datagram (e.g. send
/// an RST) but still need the ID of the message that failed to parse.
/// Returns `None` if even the 4-byte fixed header can't be read or its
/// version/type bits are invalid.
pub fn recover_header(bytes: &[u8]) -> Option<(Type, Id)> {
  let mut cur = Cursor::new(bytes);

  let byte0 = cur.take_one()?;
  if byte0 >> 6 != crate::message::VERSION {
    return None;
  }
  let ty = Type::try_from((byte0 >> 4) & 0b11).ok()?;

  cur.take_one()?; // code
  let id_bytes = cur.take(2)?;
  Some((ty, Id::from_be_bytes([id_bytes[0], id_bytes[1]])))
}

fn decode_options_and_payload(cur: &mut Cursor<'_>, msg: &mut Message) -> Result<(), MessageParseError> {
  let mut last_number = 0u16;

  loop {
    let Some(header) = cur.peek_one() else { return Ok(()) };

    if header == PAYLOAD_MARKER {
      cur.take_one();
      if cur.remaining() == 0 {
        return Err(OptParseError::PayloadMarkerEmpty.into());
      }
      msg.payload = cur.rest().to_vec();
      return Ok(());
    }

    cur.take_one();
    let delta_nibble = header >> 4;
    let len_nibble = header & 0b1111;

    if delta_nibble == 15 {
      return Err(OptParseError::OptionDeltaReservedValue.into());
    }
    if len_nibble == 15 {
      return Err(OptParseError::ValueLengthReservedValue.into());
    }

    let delta = read_ext(cur, delta_nibble)?;
    let length = read_ext(cur, len_nibble)?;

    let number = last_number + delta;
    last_number = number;

    let value_bytes = cur.take(length as usize).ok_or_else(MessageParseError::eof)?;

    let value = decode_value(number, value_bytes)?;
    msg.opts.add(number, value);
  }
}

/// Read the extended delta/length field implied by `nibble`, per the
/// same `13`/`14` extension rule `to_bytes` uses when encoding.
fn read_ext(cur: &mut Cursor<'_>, nibble: u8) -> Result<u16, MessageParseError> {
  match nibble {
    | 0..=12 => Ok(u16::from(nibble)),
    | 13 => {
      let b = cur.take_one().ok_or_else(MessageParseError::eof)?;
      Ok(u16::from(b) + 13)
    },
    | 14 => {
      let bs = cur.take(2).ok_or_else(MessageParseError::eof)?;
      Ok(u16::from_be_bytes([bs[0], bs[1]]) + 269)
    },
    | _ => unreachable!("reserved nibble 15 handled by caller"),
  }
}

fn decode_value(number: u16, bytes: &[u8]) -> Result<OptValue, MessageParseError> {
  match known::lookup(number) {
    | Some(reg) => Ok(match reg.value_type {
      | ValueType::Empty => OptValue::Empty,
      | ValueType::Opaque => OptValue::Opaque(bytes.to_vec()),
      | ValueType::String => OptValue::String(String::from_utf8_lossy(bytes).into_owned()),
      | ValueType::UInt => OptValue::UInt(bytes_to_uint(bytes)),
    }),
    | None if number % 2 == 1 => Err(OptParseError::UnknownCriticalOption(number).into()),
    | None => Ok(OptValue::Opaque(bytes.to_vec())),
  }
}

/// A forward-only cursor over a byte slice, used by the decoder so it
/// never has to juggle indices by hand.
struct Cursor<'a> {
  bytes: &'a [u8],
  pos: usize,
}

impl<'a> Cursor<'a> {
  fn new(bytes: &'a [u8]) -> Self {
    Self { bytes, pos: 0 }
  }

  fn remaining(&self) -> usize {
    self.bytes.len() - self.pos
  }

  fn peek_one(&self) -> Option<u8> {
    self.bytes.get(self.pos).copied()
  }

  fn take_one(&mut self) -> Option<u8> {
    let b = self.peek_one()?;
    self.pos += 1;
    Some(b)
  }

  fn take(&mut self, n: usize) -> Option<&'a [u8]> {
    if self.remaining() < n {
      return None;
    }
    let slice = &self.bytes[self.pos..self.pos + n];
    self.pos += n;
    Some(slice)
  }

  fn rest(&mut self) -> &'a [u8] {
    let slice = &self.bytes[self.pos..];
    self.pos = self.bytes.len();
    slice
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::to_bytes::encode;

  #[test]
  fn roundtrip_empty_message() {
    let msg = Message::new(Type::Con, Code::GET, Id(1), Token::empty());
    let bytes = encode(&msg);
    assert_eq!(decode(&bytes).unwrap(), msg);
  }

  #[test]
  fn roundtrip_with_token_options_and_payload() {
    let mut msg = Message::new(Type::Con, Code::GET, Id(0x1234), Token::new(&[0xCA, 0xFE]));
    msg.set_path("sensors/temperature");
    msg.opts.set(known::ACCEPT, u16::from(known::ContentFormat::Json));
    msg.payload = b"hello".to_vec();

    let bytes = encode(&msg);
    let decoded = decode(&bytes).unwrap();
    assert_eq!(decoded, msg);
    assert_eq!(decode(&encode(&decoded)).unwrap(), decoded);
  }

  #[test]
  fn unsupported_version_is_malformed() {
    let bytes = [0b10_00_0000, 1, 0, 1];
    assert_eq!(decode(&bytes), Err(MessageParseError::UnsupportedVersion(2)));
  }

  #[test]
  fn truncated_header_is_malformed() {
    assert_eq!(decode(&[0x40]), Err(MessageParseError::UnexpectedEndOfStream));
  }

  #[test]
  fn reserved_delta_nibble_is_malformed() {
    // header + code + id, then one "option" byte with delta nibble = 15, length = 0
    let bytes = [0b01_00_0000, 1, 0, 1, 0b1111_0000];
    assert_eq!(decode(&bytes),
               Err(MessageParseError::OptParseError(OptParseError::OptionDeltaReservedValue)));
  }

  #[test]
  fn empty_payload_marker_is_malformed() {
    let bytes = [0b01_00_0000, 1, 0, 1, 0xFF];
    assert_eq!(decode(&bytes),
               Err(MessageParseError::OptParseError(OptParseError::PayloadMarkerEmpty)));
  }

  #[test]
  fn unknown_critical_option_is_malformed() {
    // option number 9 (odd => critical, not in registry): delta=9, length=0
    let bytes = [0b01_00_0000, 1, 0, 1, 0b1001_0000];
    assert_eq!(decode(&bytes),
               Err(MessageParseError::OptParseError(OptParseError::UnknownCriticalOption(9))));
  }

  #[test]
  fn unknown_elective_option_is_preserved_as_opaque() {
    // option number 2 (even => elective, not in registry): delta=2, length=1, value=0xAB
    let bytes = [0b01_00_0000, 1, 0, 1, 0b0010_0001, 0xAB];
    let msg = decode(&bytes).unwrap();
    assert_eq!(msg.opts.get(2), Some(&OptValue::Opaque(vec![0xAB])));
  }

  #[test]
  fn options_are_non_decreasing_on_reencode() {
    let mut msg = Message::new(Type::Con, Code::GET, Id(1), Token::empty());
    msg.opts.set(known::URI_HOST, "example.com");
    msg.opts.set(known::MAX_AGE, 60u32);
    msg.opts.add(known::URI_PATH, "a");
    msg.opts.add(known::URI_PATH, "b");

    let bytes = encode(&msg);
    let mut last = 0u16;
    let mut cur = Cursor::new(&bytes[4..]);
    loop {
      match cur.peek_one() {
        | None | Some(PAYLOAD_MARKER) => break,
        | Some(h) => {
          cur.take_one();
          let d = read_ext(&mut cur, h >> 4).unwrap();
          let l = read_ext(&mut cur, h & 0b1111).unwrap();
          cur.take(l as usize);
          let number = last + d;
          assert!(number >= last);
          last = number;
        },
      }
    }
  }
}
