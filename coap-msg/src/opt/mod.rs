//! CoAP message options: the registry, value representation, and the
//! ordered collection type a [`Message`](crate::Message) stores them in.

use std::collections::BTreeMap;
use std::fmt;

/// The registry of well-known option numbers and value types.
pub mod known;

/// A CoAP option number.
///
/// Newtype so option ordering (`BTreeMap<OptNumber, _>` is sorted by
/// number, satisfying the codec's "non-decreasing by number" wire
/// invariant for free) can't be confused with an arbitrary `u16`.
#[derive(Copy, Clone, Hash, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub struct OptNumber(pub u16);

/// One option's value, tagged by the representation the registry
/// declares for its option number (RFC7252 §3.2).
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum OptValue {
  /// A zero-length value.
  Empty,
  /// Arbitrary bytes.
  Opaque(Vec<u8>),
  /// A UTF-8 string.
  String(String),
  /// An unsigned integer. Stored widened to `u64`; the codec narrows
  /// it to the shortest big-endian encoding (0-4 bytes) on the wire.
  UInt(u64),
}

impl OptValue {
  /// Number of bytes this value occupies on the wire.
  pub fn wire_len(&self) -> usize {
    match self {
      | OptValue::Empty => 0,
      | OptValue::Opaque(b) => b.len(),
      | OptValue::String(s) => s.len(),
      | OptValue::UInt(n) => uint_bytes(*n).len(),
    }
  }

  /// View this value as a byte slice, for options whose registered
  /// type is opaque or string.
  pub fn as_bytes(&self) -> &[u8] {
    match self {
      | OptValue::Empty => &[],
      | OptValue::Opaque(b) => b,
      | OptValue::String(s) => s.as_bytes(),
      | OptValue::UInt(_) => unreachable!("uint options are read with as_u64"),
    }
  }

  /// View this value as an integer, for options whose registered type
  /// is `UInt`. Returns `0` for `Empty`, matching the "0 length means
  /// integer 0" encoding rule.
  pub fn as_u64(&self) -> u64 {
    match self {
      | OptValue::UInt(n) => *n,
      | OptValue::Empty => 0,
      | _ => panic!("not a uint option value"),
    }
  }
}

impl From<&str> for OptValue {
  fn from(s: &str) -> Self {
    OptValue::String(s.to_owned())
  }
}

impl From<String> for OptValue {
  fn from(s: String) -> Self {
    OptValue::String(s)
  }
}

impl From<&[u8]> for OptValue {
  fn from(b: &[u8]) -> Self {
    OptValue::Opaque(b.to_vec())
  }
}

impl From<Vec<u8>> for OptValue {
  fn from(b: Vec<u8>) -> Self {
    OptValue::Opaque(b)
  }
}

impl From<u64> for OptValue {
  fn from(n: u64) -> Self {
    OptValue::UInt(n)
  }
}

impl From<u32> for OptValue {
  fn from(n: u32) -> Self {
    OptValue::UInt(n as u64)
  }
}

impl From<u16> for OptValue {
  fn from(n: u16) -> Self {
    OptValue::UInt(n as u64)
  }
}

/// Shortest big-endian encoding of `n`, with leading zero bytes
/// stripped; `0` encodes as zero bytes (RFC7252 §3.2, and the
/// expanded spec's note that the integer 0 MUST be encoded with 0
/// bytes rather than a fixed-width field).
pub(crate) fn uint_bytes(n: u64) -> Vec<u8> {
  let be = n.to_be_bytes();
  let first_nonzero = be.iter().position(|&b| b != 0);
  match first_nonzero {
    | Some(ix) => be[ix..].to_vec(),
    | None => Vec::new(),
  }
}

/// Parse a big-endian byte string (0-4 bytes, already validated by
/// the caller) into an unsigned integer.
pub(crate) fn bytes_to_uint(bytes: &[u8]) -> u64 {
  let mut buf = [0u8; 8];
  let start = 8 - bytes.len();
  buf[start..].copy_from_slice(bytes);
  u64::from_be_bytes(buf)
}

/// The ordered, possibly-repeated collection of options carried by a
/// message.
///
/// Backed by a `BTreeMap` so iteration is always non-decreasing by
/// option number (the codec's delta-encoding invariant), with `Vec`
/// values to support repeatable options (e.g. Uri-Path, ETag).
#[derive(Clone, Default, Debug, PartialEq, Eq)]
pub struct OptionMap(pub BTreeMap<OptNumber, Vec<OptValue>>);

impl OptionMap {
  /// An empty option map.
  pub fn new() -> Self {
    Self::default()
  }

  /// Insert a value for `number`, replacing any existing values.
  pub fn set(&mut self, number: u16, value: impl Into<OptValue>) {
    self.0.insert(OptNumber(number), vec![value.into()]);
  }

  /// Append a value for `number`, preserving any existing values
  /// (for repeatable options).
  pub fn add(&mut self, number: u16, value: impl Into<OptValue>) {
    self.0.entry(OptNumber(number)).or_default().push(value.into());
  }

  /// Remove all values for `number`.
  pub fn remove(&mut self, number: u16) {
    self.0.remove(&OptNumber(number));
  }

  /// The first value stored for `number`, if any.
  pub fn get(&self, number: u16) -> Option<&OptValue> {
    self.0.get(&OptNumber(number)).and_then(|v| v.first())
  }

  /// All values stored for `number`.
  pub fn get_all(&self, number: u16) -> &[OptValue] {
    self.0.get(&OptNumber(number)).map(Vec::as_slice).unwrap_or(&[])
  }

  /// Whether any value is stored for `number`.
  pub fn has(&self, number: u16) -> bool {
    self.0.contains_key(&OptNumber(number))
  }

  /// Iterate `(number, value)` pairs in non-decreasing order by
  /// number, each repeated value visited in insertion order.
  pub fn iter(&self) -> impl Iterator<Item = (OptNumber, &OptValue)> {
    self.0.iter().flat_map(|(&n, vs)| vs.iter().map(move |v| (n, v)))
  }

  /// Concatenate repeated Uri-Path (or Location-Path) segments into a
  /// `/`-joined path string.
  pub fn path_segments(&self, number: u16) -> Vec<String> {
    self.get_all(number)
        .iter()
        .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
        .collect()
  }
}

impl fmt::Display for OptionMap {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    for (n, v) in self.iter() {
      write!(f, "[{}:{:?}]", n.0, v)?;
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn uint_strips_leading_zeros() {
    assert_eq!(uint_bytes(0), Vec::<u8>::new());
    assert_eq!(uint_bytes(5), vec![5]);
    assert_eq!(uint_bytes(256), vec![1, 0]);
    assert_eq!(uint_bytes(u64::from(u32::MAX)), vec![255, 255, 255, 255]);
  }

  #[test]
  fn bytes_to_uint_roundtrip() {
    for n in [0u64, 1, 255, 256, 65535, 1_000_000] {
      assert_eq!(bytes_to_uint(&uint_bytes(n)), n);
    }
  }

  #[test]
  fn repeatable_options_preserve_order() {
    let mut opts = OptionMap::new();
    opts.add(known::URI_PATH, "a");
    opts.add(known::URI_PATH, "b");
    opts.add(known::URI_PATH, "c");
    assert_eq!(opts.path_segments(known::URI_PATH), vec!["a", "b", "c"]);
  }

  #[test]
  fn set_replaces_and_add_appends() {
    let mut opts = OptionMap::new();
    opts.set(known::MAX_AGE, 60u32);
    opts.set(known::MAX_AGE, 30u32);
    assert_eq!(opts.get_all(known::MAX_AGE).len(), 1);
    assert_eq!(opts.get(known::MAX_AGE).unwrap().as_u64(), 30);
  }
}
