/// Message ID.
///
/// 16-bit unsigned integer in network byte order. Used to detect message
/// duplication and to match messages of type Acknowledgement/Reset to
/// messages of type Confirmable/Non-confirmable.
///
/// See [RFC7252 §3](https://datatracker.ietf.org/doc/html/rfc7252#section-3).
#[derive(Copy, Clone, Hash, PartialEq, PartialOrd, Debug, Eq, Ord)]
pub struct Id(pub u16);

impl Id {
  /// Build an `Id` from its big-endian wire representation.
  pub fn from_be_bytes(bs: [u8; 2]) -> Self {
    Self(u16::from_be_bytes(bs))
  }

  /// The big-endian wire representation of this id.
  pub fn to_be_bytes(self) -> [u8; 2] {
    self.0.to_be_bytes()
  }

  /// Wrapping successor, used by MID allocation.
  pub fn next(self) -> Self {
    Self(self.0.wrapping_add(1))
  }
}
