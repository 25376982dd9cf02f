use std::time::Duration;

use crate::retry::{Attempts, Strategy};

/// Configuration for the retry behavior of outbound CONfirmable messages.
///
/// Defaults match RFC7252 §4.8's recommended transmission parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Con {
  /// Retry strategy used while waiting for the first ACK.
  pub retry_strategy: Strategy,
  /// Number of retransmissions allowed before giving up (`MAX_RETRANSMIT`).
  pub max_attempts: Attempts,
}

impl Default for Con {
  fn default() -> Self {
    Con { retry_strategy: Strategy::Exponential { init_min: Duration::from_secs(2),
                                                  init_max: Duration::from_millis(3_000) },
          max_attempts: Attempts(4) }
  }
}

/// Configuration for message-ID allocation, deduplication, and timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Msg {
  /// Seed mixed into [`coap_msg::Token::opaque`] so tokens aren't
  /// trivially guessable across restarts of the same endpoint.
  pub token_seed: u16,
  /// See [`Con`].
  pub con: Con,
  /// `NSTART`: maximum number of outstanding interactions per peer
  /// that this endpoint will initiate concurrently. The spec's
  /// congestion-control open question resolves this to `1`.
  pub nstart: u8,
}

impl Default for Msg {
  fn default() -> Self {
    Msg { token_seed: 0,
          con: Con::default(),
          nstart: 1 }
  }
}

/// Runtime configuration for a [`crate::Endpoint`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Config {
  /// See [`Msg`].
  pub msg: Msg,
  /// Negotiated default block size in bytes, used when a request
  /// doesn't specify one. Must be a supported block size (16-1024,
  /// power of two).
  pub default_block_size: u16,
  /// Minimum size of the bounded LRU dedup cache.
  pub dedup_cache_capacity: usize,
}

impl Default for Config {
  fn default() -> Self {
    Config { msg: Msg::default(),
             default_block_size: 1024,
             dedup_cache_capacity: 512 }
  }
}

impl Config {
  /// `MAX_TRANSMIT_SPAN`: the longest time a CON's retransmissions
  /// can take, not counting the last wait.
  pub(crate) fn max_transmit_span(&self) -> Duration {
    self.msg.con.retry_strategy.max_time(self.msg.con.max_attempts - Attempts(1))
  }

  /// `MAX_LATENCY`: RFC7252's assumed upper bound on how long a
  /// datagram can take to traverse the network end-to-end.
  pub(crate) fn max_latency(&self) -> Duration {
    Duration::from_secs(100)
  }

  /// `PROCESSING_DELAY`: assumed time a peer takes to respond.
  pub(crate) fn processing_delay(&self) -> Duration {
    Duration::from_secs(2)
  }

  /// `EXCHANGE_LIFETIME`: how long a message ID must be remembered
  /// for duplicate rejection (§4.2's dedup cache eviction rule).
  pub(crate) fn exchange_lifetime(&self) -> Duration {
    self.max_transmit_span() + 2 * self.max_latency() + self.processing_delay()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn default_matches_rfc7252_recommendations() {
    let cfg = Config::default();
    assert_eq!(cfg.msg.con.max_attempts, Attempts(4));
    assert!(cfg.exchange_lifetime() > cfg.max_transmit_span());
  }
}
