use crate::parse_error::MessageParseError;

/// Indicates if a message is Confirmable (0), Non-confirmable (1),
/// Acknowledgement (2), or Reset (3).
///
/// See [RFC7252 §3](https://datatracker.ietf.org/doc/html/rfc7252#section-3).
#[derive(Copy, Clone, Hash, Eq, Ord, PartialEq, PartialOrd, Debug)]
pub enum Type {
  /// A message that does not require an acknowledgement.
  Non,
  /// A message that elicits exactly one ACK or RST in reply.
  Con,
  /// Acknowledges a Confirmable message, optionally piggybacking a response.
  Ack,
  /// Indicates a message was received but could not be processed.
  Reset,
}

impl Type {
  /// The 2-bit wire representation of this type.
  pub fn bits(self) -> u8 {
    match self {
      | Type::Con => 0,
      | Type::Non => 1,
      | Type::Ack => 2,
      | Type::Reset => 3,
    }
  }
}

impl TryFrom<u8> for Type {
  type Error = MessageParseError;

  fn try_from(b: u8) -> Result<Self, Self::Error> {
    match b {
      | 0 => Ok(Type::Con),
      | 1 => Ok(Type::Non),
      | 2 => Ok(Type::Ack),
      | 3 => Ok(Type::Reset),
      | _ => Err(MessageParseError::InvalidType(b)),
    }
  }
}
