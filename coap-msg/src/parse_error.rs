use std::fmt;

/// Errors encounterable while parsing an option from bytes.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum OptParseError {
  /// Reached end of stream before parsing was finished.
  UnexpectedEndOfStream,
  /// Option Delta nibble was `15`, which is only legal as the
  /// `0xFF` payload marker.
  OptionDeltaReservedValue,
  /// Option Length nibble was `15`, which is reserved.
  ValueLengthReservedValue,
  /// A critical option (odd-numbered per RFC7252 §5.4.6) was not
  /// recognized by the registry.
  UnknownCriticalOption(u16),
  /// The `0xFF` payload marker was the last byte in the datagram,
  /// implying a zero-length payload, which is malformed.
  PayloadMarkerEmpty,
}

impl OptParseError {
  /// Shorthand for [`OptParseError::UnexpectedEndOfStream`].
  pub fn eof() -> Self {
    Self::UnexpectedEndOfStream
  }
}

impl fmt::Display for OptParseError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      | Self::UnexpectedEndOfStream => write!(f, "unexpected end of stream while parsing option"),
      | Self::OptionDeltaReservedValue => write!(f, "option delta nibble was the reserved value 15"),
      | Self::ValueLengthReservedValue => write!(f, "option length nibble was the reserved value 15"),
      | Self::UnknownCriticalOption(n) => write!(f, "unknown critical option {n}"),
      | Self::PayloadMarkerEmpty => write!(f, "payload marker present with no trailing payload"),
    }
  }
}

impl std::error::Error for OptParseError {}

/// Errors encounterable while parsing a [`Message`](crate::Message) from bytes.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MessageParseError {
  /// Fewer than 4 bytes were available for the fixed header.
  UnexpectedEndOfStream,
  /// The version nibble was not `1`.
  UnsupportedVersion(u8),
  /// The type nibble did not map to a known [`Type`](crate::Type).
  InvalidType(u8),
  /// The token length nibble was greater than `8`.
  InvalidTokenLength(u8),
  /// An option failed to parse.
  OptParseError(OptParseError),
}

impl MessageParseError {
  /// Shorthand for [`MessageParseError::UnexpectedEndOfStream`].
  pub fn eof() -> Self {
    Self::UnexpectedEndOfStream
  }
}

impl From<OptParseError> for MessageParseError {
  fn from(e: OptParseError) -> Self {
    Self::OptParseError(e)
  }
}

impl fmt::Display for MessageParseError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      | Self::UnexpectedEndOfStream => write!(f, "unexpected end of stream while parsing header"),
      | Self::UnsupportedVersion(v) => write!(f, "unsupported CoAP version {v}"),
      | Self::InvalidType(t) => write!(f, "invalid message type bits {t}"),
      | Self::InvalidTokenLength(n) => write!(f, "invalid token length {n} (must be 0-8)"),
      | Self::OptParseError(e) => write!(f, "{e}"),
    }
  }
}

impl std::error::Error for MessageParseError {}
