use tinyvec::ArrayVec;

/// Message Token.
///
/// 0-8 opaque bytes used to correlate a response with the request
/// that elicited it. Unlike the [`Id`](crate::Id), the token is not
/// required to be unique across time, only unambiguous among a peer's
/// currently outstanding requests.
///
/// See [RFC7252 §5.3.1](https://datatracker.ietf.org/doc/html/rfc7252#section-5.3.1).
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Default)]
pub struct Token(pub ArrayVec<[u8; 8]>);

impl Token {
  /// The empty (zero-length) token.
  pub fn empty() -> Token {
    Token(ArrayVec::default())
  }

  /// Build a token from a byte slice.
  ///
  /// # Panics
  /// Panics if `bytes` is longer than 8 bytes.
  pub fn new(bytes: &[u8]) -> Self {
    assert!(bytes.len() <= 8, "CoAP tokens are at most 8 bytes");
    Token(bytes.iter().copied().collect())
  }

  /// Derive an 8-byte opaque token from arbitrary input data, e.g. a
  /// token seed concatenated with the current time, so that tokens are
  /// not easily guessable by an off-path attacker.
  pub fn opaque(data: &[u8]) -> Token {
    use blake2::digest::consts::U8;
    use blake2::{Blake2b, Digest};

    let mut digest = Blake2b::<U8>::new();
    digest.update(data);
    let out: [u8; 8] = digest.finalize().into();
    Token(out.into_iter().collect())
  }

  /// Number of bytes in this token (0-8).
  pub fn len(&self) -> usize {
    self.0.len()
  }

  /// Whether this token carries no bytes.
  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }

  /// Borrow the token bytes.
  pub fn as_bytes(&self) -> &[u8] {
    &self.0
  }
}

impl AsRef<[u8]> for Token {
  fn as_ref(&self) -> &[u8] {
    &self.0
  }
}
