//! The registry of CoAP option numbers this endpoint understands, plus the
//! well-known option value types (`Block`, observe `Action`, `ContentFormat`)
//! from RFC 7959 and RFC 7641.

use std::fmt;

/// Three pieces of information are packed into a Block1/Block2 option
/// value: the block size, whether more blocks follow, and the block's
/// sequential number.
///
/// Wire representation (RFC7959 §2.2): an unsigned integer whose last
/// 3 bits are `SZX` (size exponent), next bit is `M` (more), and the
/// remaining high bits are `NUM`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Block(u32);

impl Block {
  /// Construct a block descriptor. `size` is rounded down to the
  /// nearest supported power of two in `16..=1024`.
  pub fn new(size: u16, num: u32, more: bool) -> Self {
    let szx = Self::size_to_szx(size);
    let more_bit = u32::from(more) << 3;
    Self((num << 4) | more_bit | szx as u32)
  }

  fn size_to_szx(size: u16) -> u32 {
    let size = size.clamp(16, 1024);
    (f32::from(size).log2() as u32).saturating_sub(4)
  }

  /// Block size in bytes, `2^(SZX+4)`.
  pub fn size(&self) -> u16 {
    let szx = (self.0 & 0b111).min(6);
    2u16.pow(szx + 4)
  }

  /// The SZX exponent (0-6).
  pub fn szx(&self) -> u8 {
    (self.0 & 0b111) as u8
  }

  /// Whether more blocks follow this one.
  pub fn more(&self) -> bool {
    (self.0 & 0b1000) != 0
  }

  /// The 0-indexed sequence number of this block.
  pub fn num(&self) -> u32 {
    self.0 >> 4
  }
}

impl From<Block> for u32 {
  fn from(b: Block) -> Self {
    b.0
  }
}

impl From<u32> for Block {
  fn from(n: u32) -> Self {
    Block(n)
  }
}

/// The Observe option's value (RFC7641 §2): on a request it is an
/// [`Action`], on a response it is a sequence number handled directly
/// as a `u32` by the observe layer.
#[derive(Hash, Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Copy)]
pub enum Action {
  /// Register as an observer of this resource.
  Register,
  /// Deregister as an observer of this resource.
  Deregister,
}

impl Action {
  /// Parse an Observe request value.
  pub fn from_u32(n: u32) -> Option<Self> {
    match n {
      | 0 => Some(Action::Register),
      | 1 => Some(Action::Deregister),
      | _ => None,
    }
  }
}

impl From<Action> for u32 {
  fn from(a: Action) -> Self {
    match a {
      | Action::Register => 0,
      | Action::Deregister => 1,
    }
  }
}

/// Content-Format registry values (RFC7252 §12.3).
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentFormat {
  /// `text/plain; charset=utf-8`
  Text,
  /// `application/link-format`
  LinkFormat,
  /// `application/xml`
  Xml,
  /// `application/octet-stream`
  OctetStream,
  /// `application/json`
  Json,
  /// Any other registered or experimental content format.
  Other(u16),
}

impl From<ContentFormat> for u16 {
  fn from(f: ContentFormat) -> Self {
    match f {
      | ContentFormat::Text => 0,
      | ContentFormat::LinkFormat => 40,
      | ContentFormat::Xml => 41,
      | ContentFormat::OctetStream => 42,
      | ContentFormat::Json => 50,
      | ContentFormat::Other(n) => n,
    }
  }
}

impl From<u16> for ContentFormat {
  fn from(n: u16) -> Self {
    match n {
      | 0 => ContentFormat::Text,
      | 40 => ContentFormat::LinkFormat,
      | 41 => ContentFormat::Xml,
      | 42 => ContentFormat::OctetStream,
      | 50 => ContentFormat::Json,
      | n => ContentFormat::Other(n),
    }
  }
}

/// The kind of value an option carries, per RFC7252 §3.2.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
  /// A zero-length value; the option's presence is the signal.
  Empty,
  /// Arbitrary bytes.
  Opaque,
  /// A UTF-8 string.
  String,
  /// An unsigned integer, encoded as 0-4 big-endian bytes with
  /// leading zero bytes stripped (the integer `0` is zero bytes).
  UInt,
}

/// A registry entry for one option number.
#[derive(Debug, Clone, Copy)]
pub struct Registration {
  /// The option number.
  pub number: u16,
  /// Human-readable name, for logging.
  pub name: &'static str,
  /// The wire value type the codec should assume for this number.
  pub value_type: ValueType,
  /// Whether this option may appear more than once in a message.
  pub repeatable: bool,
  /// Critical options (odd numbers, RFC7252 §5.4.1) MUST be
  /// understood by the recipient or the message is rejected;
  /// elective options may be silently ignored.
  pub critical: bool,
  /// "Unsafe to forward" per RFC7252 §5.4.2 (not used by this
  /// endpoint directly, since it does not proxy, but kept for
  /// completeness of the registry).
  pub unsafe_to_forward: bool,
  /// Whether this option is part of the cache key (RFC7252 §5.4.2).
  pub no_cache_key: bool,
}

macro_rules! registry {
  ($($num:expr => $name:ident, $ty:ident, repeatable = $rep:expr, critical = $crit:expr, unsafe = $unsafe:expr, no_cache_key = $nck:expr;)*) => {
    $(
      #[doc = concat!("Option number ", stringify!($num), ": ", stringify!($name))]
      pub const $name: u16 = $num;
    )*

    /// Look up the registry entry for a known option number.
    ///
    /// Returns `None` for option numbers this endpoint does not
    /// recognize; per RFC7252 §5.4.1, the caller must then treat
    /// odd (critical) numbers as [`OptParseError::UnknownCriticalOption`](crate::OptParseError::UnknownCriticalOption)
    /// and even (elective) numbers as opaque pass-through data.
    pub fn lookup(number: u16) -> Option<Registration> {
      match number {
        $(
          $num => Some(Registration { number: $num,
                                       name: stringify!($name),
                                       value_type: ValueType::$ty,
                                       repeatable: $rep,
                                       critical: $crit,
                                       unsafe_to_forward: $unsafe,
                                       no_cache_key: $nck }),
        )*
        | _ => None,
      }
    }
  };
}

registry! {
  1  => IF_MATCH,       Opaque, repeatable = true,  critical = true,  unsafe = false, no_cache_key = false;
  3  => URI_HOST,       String, repeatable = false, critical = true,  unsafe = true,  no_cache_key = false;
  4  => ETAG,           Opaque, repeatable = true,  critical = false, unsafe = false, no_cache_key = false;
  5  => IF_NONE_MATCH,  Empty,  repeatable = false, critical = true,  unsafe = false, no_cache_key = false;
  6  => OBSERVE,        UInt,   repeatable = false, critical = false, unsafe = true,  no_cache_key = false;
  7  => URI_PORT,       UInt,   repeatable = false, critical = true,  unsafe = true,  no_cache_key = false;
  8  => LOCATION_PATH,  String, repeatable = true,  critical = false, unsafe = false, no_cache_key = false;
  11 => URI_PATH,       String, repeatable = true,  critical = true,  unsafe = true,  no_cache_key = false;
  12 => CONTENT_FORMAT, UInt,   repeatable = false, critical = false, unsafe = false, no_cache_key = false;
  14 => MAX_AGE,        UInt,   repeatable = false, critical = false, unsafe = true,  no_cache_key = true;
  15 => URI_QUERY,      String, repeatable = true,  critical = true,  unsafe = true,  no_cache_key = false;
  17 => ACCEPT,         UInt,   repeatable = false, critical = true,  unsafe = false, no_cache_key = false;
  20 => LOCATION_QUERY, String, repeatable = true,  critical = false, unsafe = false, no_cache_key = false;
  23 => BLOCK2,         UInt,   repeatable = false, critical = true,  unsafe = true,  no_cache_key = false;
  27 => BLOCK1,         UInt,   repeatable = false, critical = true,  unsafe = true,  no_cache_key = false;
  28 => SIZE2,          UInt,   repeatable = false, critical = false, unsafe = false, no_cache_key = true;
  35 => PROXY_URI,      String, repeatable = false, critical = true,  unsafe = true,  no_cache_key = false;
  39 => PROXY_SCHEME,   String, repeatable = false, critical = true,  unsafe = true,  no_cache_key = false;
  60 => SIZE1,          UInt,   repeatable = false, critical = false, unsafe = false, no_cache_key = true;
}

impl fmt::Display for Registration {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{} ({})", self.name, self.number)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn block_roundtrip() {
    let b = Block::new(32, 2, false);
    assert_eq!(b.size(), 32);
    assert_eq!(b.num(), 2);
    assert!(!b.more());

    let b = Block::new(128, 3, true);
    assert_eq!(b.size(), 128);
    assert_eq!(b.num(), 3);
    assert!(b.more());
  }

  #[test]
  fn block_size_rounds_down_to_nearest_power_of_two() {
    assert_eq!(Block::new(0, 1, false).size(), 16);
    assert_eq!(Block::new(17, 1, false).size(), 16);
    assert_eq!(Block::new(33, 1, false).size(), 32);
    assert_eq!(Block::new(2048, 1, false).size(), 1024);
  }

  #[test]
  fn registry_lookup() {
    let r = lookup(URI_PATH).unwrap();
    assert_eq!(r.value_type, ValueType::String);
    assert!(r.repeatable);
    assert!(r.critical);

    assert!(lookup(9999).is_none());
  }

  #[test]
  fn criticality_is_odd_numbered() {
    for n in [1, 3, 5, 7, 11, 15, 17, 23, 27, 35, 39] {
      assert!(lookup(n).unwrap().critical, "{n} should be critical");
    }
    for n in [4, 6, 8, 12, 14, 20, 28, 60] {
      assert!(!lookup(n).unwrap().critical, "{n} should be elective");
    }
  }
}
