//! Block-wise transfer (RFC 7959): splitting outbound payloads too
//! large for one datagram, and reassembling inbound blocks.

use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;

use coap_msg::known::Block;
use coap_msg::Token;

/// State of one in-progress inbound block-wise transfer, keyed by the
/// `(peer, token)` that ties its blocks together.
///
/// Blocks arriving out of order but within the same transfer are
/// buffered and drained once the gap closes; a re-sent block at or
/// before `next_num` is an idempotent no-op. Only the caller's
/// transaction timeout gives up on a transfer that never completes.
#[derive(Debug, Default, Clone)]
pub struct Assembly {
  buf: Vec<u8>,
  next_num: u32,
  pending: BTreeMap<u32, Vec<u8>>,
  final_num: Option<u32>,
}

impl Assembly {
  /// Fold `chunk` into the assembly at the offset implied by
  /// `block.num()`: appended immediately if it's the next expected
  /// block (draining any now-contiguous buffered blocks), buffered if
  /// it arrived early, or silently dropped if it's a re-send of a
  /// block already folded in.
  pub fn accept(&mut self, block: Block, chunk: &[u8]) {
    if !block.more() {
      self.final_num = Some(block.num());
    }

    if block.num() < self.next_num {
      return;
    }
    if block.num() > self.next_num {
      self.pending.insert(block.num(), chunk.to_vec());
      return;
    }

    self.buf.extend_from_slice(chunk);
    self.next_num += 1;
    while let Some(buffered) = self.pending.remove(&self.next_num) {
      self.buf.extend_from_slice(&buffered);
      self.next_num += 1;
    }
  }

  /// Whether the final block has arrived and every block before it has
  /// been folded into `buf`.
  pub fn is_complete(&self) -> bool {
    matches!(self.final_num, Some(n) if self.next_num > n)
  }

  /// The reassembled payload once [`Assembly::is_complete`] is true.
  pub fn into_payload(self) -> Vec<u8> {
    self.buf
  }
}

/// Tracks in-progress inbound assemblies across all peers/tokens.
///
/// See §4.3's inbound-assembly rule: chunks are buffered per
/// transaction until `M=0` arrives, at which point the caller (the
/// request layer) takes the completed buffer and dispatches once.
#[derive(Default)]
pub struct AssemblyTable {
  in_progress: HashMap<(SocketAddr, Token), Assembly>,
}

impl AssemblyTable {
  /// A table with no in-progress transfers.
  pub fn new() -> Self {
    Self::default()
  }

  /// Feed one inbound Block1 (or Block2, for a client reassembling a
  /// response) chunk into the assembly for `(peer, token)`.
  ///
  /// Returns `Some(payload)` once every block up to and including the
  /// final one (`M=0`) has been folded in, at which point the entry is
  /// removed; otherwise returns `None` and the caller should reply with
  /// `2.31 Continue` (Block1) or issue the next block's GET (Block2).
  pub fn accept(&mut self, peer: SocketAddr, token: Token, block: Block, chunk: &[u8]) -> Option<Vec<u8>> {
    let entry = self.in_progress.entry((peer, token)).or_default();
    entry.accept(block, chunk);

    if entry.is_complete() {
      self.in_progress.remove(&(peer, token)).map(Assembly::into_payload)
    } else {
      None
    }
  }

  /// Whether a transfer for `(peer, token)` is currently in progress.
  pub fn in_progress(&self, peer: SocketAddr, token: Token) -> bool {
    self.in_progress.contains_key(&(peer, token))
  }

  /// Abandon any in-progress transfer for `(peer, token)` (e.g. on
  /// transaction timeout).
  pub fn forget(&mut self, peer: SocketAddr, token: Token) {
    self.in_progress.remove(&(peer, token));
  }
}

/// Split `payload` into the block at 0-indexed sequence `num`, sized
/// to `block_size` bytes, per §4.3's outbound-split rule.
///
/// Returns `None` if `num` is past the end of `payload`.
pub fn block_at(payload: &[u8], num: u32, block_size: u16) -> Option<(Block, &[u8])> {
  let size = block_size as usize;
  let start = num as usize * size;
  if start >= payload.len() && !payload.is_empty() {
    return None;
  }
  if payload.is_empty() && num > 0 {
    return None;
  }

  let end = (start + size).min(payload.len());
  let chunk = &payload[start..end];
  let more = end < payload.len();

  Some((Block::new(block_size, num, more), chunk))
}

#[cfg(test)]
mod tests {
  use std::net::{Ipv4Addr, SocketAddrV4};

  use super::*;

  fn peer() -> SocketAddr {
    SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::new(127, 0, 0, 1), 5683))
  }

  #[test]
  fn splits_200_bytes_into_64_byte_blocks() {
    let payload = vec![0u8; 200];

    let (b0, c0) = block_at(&payload, 0, 64).unwrap();
    assert_eq!((b0.num(), b0.more(), c0.len()), (0, true, 64));

    let (b1, c1) = block_at(&payload, 1, 64).unwrap();
    assert_eq!((b1.num(), b1.more(), c1.len()), (1, true, 64));

    let (b2, c2) = block_at(&payload, 2, 64).unwrap();
    assert_eq!((b2.num(), b2.more(), c2.len()), (2, true, 64));

    let (b3, c3) = block_at(&payload, 3, 64).unwrap();
    assert_eq!((b3.num(), b3.more(), c3.len()), (3, false, 8));

    assert!(block_at(&payload, 4, 64).is_none());
  }

  #[test]
  fn reassembles_in_order_blocks() {
    let mut table = AssemblyTable::new();
    let token = Token::new(&[0xCA]);

    let payload = (0..200u32).map(|i| i as u8).collect::<Vec<_>>();
    let mut reassembled = None;
    for num in 0..4 {
      let (block, chunk) = block_at(&payload, num, 64).unwrap();
      reassembled = table.accept(peer(), token, block, chunk);
    }

    assert_eq!(reassembled, Some(payload));
    assert!(!table.in_progress(peer(), token));
  }

  #[test]
  fn out_of_order_block_is_buffered_until_contiguous() {
    let mut table = AssemblyTable::new();
    let token = Token::new(&[0xCA]);
    let payload = (0..200u32).map(|i| i as u8).collect::<Vec<_>>();

    let (b1, c1) = block_at(&payload, 1, 64).unwrap();
    assert_eq!(table.accept(peer(), token, b1, c1), None);
    assert!(table.in_progress(peer(), token));

    let (b3, c3) = block_at(&payload, 3, 64).unwrap();
    assert_eq!(table.accept(peer(), token, b3, c3), None);

    let (b0, c0) = block_at(&payload, 0, 64).unwrap();
    assert_eq!(table.accept(peer(), token, b0, c0), None);

    let (b2, c2) = block_at(&payload, 2, 64).unwrap();
    assert_eq!(table.accept(peer(), token, b2, c2), Some(payload.clone()));
    assert!(!table.in_progress(peer(), token));
  }

  #[test]
  fn duplicate_resend_of_last_block_is_idempotent() {
    let mut table = AssemblyTable::new();
    let token = Token::new(&[0xCA]);
    let payload = (0..128u32).map(|i| i as u8).collect::<Vec<_>>();

    let (b0, c0) = block_at(&payload, 0, 64).unwrap();
    assert_eq!(table.accept(peer(), token, b0, c0), None);
    assert_eq!(table.accept(peer(), token, b0, c0), None);

    let (b1, c1) = block_at(&payload, 1, 64).unwrap();
    assert_eq!(table.accept(peer(), token, b1, c1), Some(payload));
  }
}
