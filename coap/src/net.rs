use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};

use coap_msg::{Id, Message, Type};

/// Data paired with the peer address it came from or is going to.
///
/// Mirrors `std::net::UdpSocket::recv_from`'s `(data, addr)` pairing so
/// every layer can carry "whose message is this" alongside the message
/// itself without threading a second parameter through every call.
#[derive(PartialEq, Eq, Debug, Clone, Copy, Hash)]
pub struct Addrd<T>(pub T, pub SocketAddr);

impl<T> Addrd<T> {
  /// Borrow the data, discarding the address.
  pub fn data(&self) -> &T {
    &self.0
  }

  /// The peer address.
  pub fn addr(&self) -> SocketAddr {
    self.1
  }

  /// Apply `f` to the data, keeping the same address.
  pub fn map<R>(self, f: impl FnOnce(T) -> R) -> Addrd<R> {
    Addrd(f(self.0), self.1)
  }

  /// Discard the address.
  pub fn unwrap(self) -> T {
    self.0
  }
}

/// The endpoint's one UDP socket.
///
/// A thin wrapper over [`std::net::UdpSocket`] that speaks in
/// [`Message`]s and [`Addrd`] pairs instead of raw byte buffers.
pub struct Socket {
  inner: UdpSocket,
}

/// Maximum UDP datagram payload this endpoint will attempt to receive.
/// CoAP over UDP is defined for links that don't fragment below this
/// (RFC7252 §4.6); larger payloads use the block layer instead.
const MAX_DATAGRAM: usize = 1152;

impl Socket {
  /// Bind a new socket. Blocking reads get a read timeout so the
  /// endpoint's receiver thread can periodically check the shutdown
  /// signal instead of blocking forever.
  pub fn bind<A: ToSocketAddrs>(addr: A, recv_timeout: std::time::Duration) -> std::io::Result<Self> {
    let inner = UdpSocket::bind(addr)?;
    inner.set_read_timeout(Some(recv_timeout))?;
    Ok(Self { inner })
  }

  /// The local address this socket is bound to.
  pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
    self.inner.local_addr()
  }

  /// Serialize and send a message to its addressed peer.
  pub fn send(&self, msg: Addrd<&Message>) -> std::io::Result<()> {
    let bytes = coap_msg::encode(msg.data());
    self.inner.send_to(&bytes, msg.addr())?;
    Ok(())
  }

  /// Block (up to the configured read timeout) for one datagram and
  /// decode it. Returns `Ok(None)` on a read timeout, so the caller's
  /// loop can re-check its shutdown signal.
  ///
  /// On a decode failure the error is paired with whatever `Type`/`Id`
  /// could still be recovered from the datagram's fixed header, so a
  /// caller that must answer a malformed CON with an RST has the MID to
  /// put in it even though the rest of the message didn't parse.
  pub fn recv(&self) -> std::io::Result<Option<Addrd<Result<Message, RecvError>>>> {
    let mut buf = [0u8; MAX_DATAGRAM];
    match self.inner.recv_from(&mut buf) {
      | Ok((n, addr)) => {
        let result = coap_msg::decode(&buf[..n]).map_err(|e| RecvError { error: e,
                                                                          header: coap_msg::recover_header(&buf[..n]) });
        Ok(Some(Addrd(result, addr)))
      },
      | Err(e) if matches!(e.kind(), std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut) => Ok(None),
      | Err(e) => Err(e),
    }
  }
}

/// A datagram that failed to decode, carrying whatever header could
/// still be recovered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecvError {
  pub error: coap_msg::MessageParseError,
  pub header: Option<(Type, Id)>,
}
