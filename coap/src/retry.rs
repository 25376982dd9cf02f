use std::ops::RangeInclusive;
use std::time::{Duration, Instant};

use rand::{Rng, SeedableRng};

/// A non-blocking timer that drives the retransmission backoff for one
/// outbound CONfirmable message.
///
/// Doesn't own or schedule the retry itself; a caller polls
/// [`RetryTimer::what_should_i_do`] against wall-clock time and acts on
/// the result. See `coap::message_layer` for the thread that drives it.
#[derive(Debug, Clone, Copy)]
pub struct RetryTimer {
  start: Instant,
  init: Duration,
  strategy: Strategy,
  attempts: Attempts,
  max_attempts: Attempts,
}

/// A number of attempts.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Attempts(pub u16);

impl std::ops::Sub for Attempts {
  type Output = Attempts;

  fn sub(self, rhs: Attempts) -> Attempts {
    Attempts(self.0.saturating_sub(rhs.0))
  }
}

/// Result of [`RetryTimer::what_should_i_do`].
#[derive(PartialEq, Eq, Debug, Clone, Copy)]
pub enum YouShould {
  /// Attempts have been exhausted; the send should be considered timed out.
  Cry,
  /// Not enough time has passed yet; keep waiting.
  Wait,
  /// A retry should be performed now.
  Retry,
}

impl RetryTimer {
  /// Start a new retry timer at `start`, the moment the message was
  /// first transmitted.
  pub fn new(start: Instant, strategy: Strategy, max_attempts: Attempts) -> Self {
    let init = if strategy.has_jitter() {
      let seed = start.elapsed().as_nanos() as u64;
      let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(seed);
      Duration::from_millis(rng.gen_range(strategy.range_millis()))
    } else {
      Duration::from_millis(*strategy.range_millis().start())
    };

    Self { start,
           init,
           strategy,
           max_attempts,
           attempts: Attempts(1) }
  }

  /// Ask the timer what to do, given the current time.
  pub fn what_should_i_do(&mut self, now: Instant) -> YouShould {
    if self.attempts >= self.max_attempts {
      return YouShould::Cry;
    }

    if self.is_ready(now.duration_since(self.start), self.attempts.0) {
      self.attempts.0 += 1;
      YouShould::Retry
    } else {
      YouShould::Wait
    }
  }

  fn is_ready(&self, time_passed: Duration, attempts: u16) -> bool {
    if attempts == 0 {
      return true;
    }

    time_passed >= Strategy::total_delay_exp(self.init, attempts)
  }
}

/// Backoff strategy for retransmissions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
  /// Pick a random initial delay in `[init_min, init_max]`, then
  /// double it after every failed attempt (RFC7252 §4.2's default).
  Exponential {
    /// Minimum (inclusive) delay before the first retry.
    init_min: Duration,
    /// Maximum (inclusive) delay before the first retry.
    init_max: Duration,
  },
}

impl Strategy {
  fn has_jitter(&self) -> bool {
    let r = self.range_millis();
    r.start() != r.end()
  }

  fn range_millis(&self) -> RangeInclusive<u64> {
    match self {
      | Self::Exponential { init_min, init_max } => {
        init_min.as_millis() as u64..=init_max.as_millis() as u64
      },
    }
  }

  /// The total time elapsed if all `max_attempts` retries happen
  /// back-to-back with no early giveup.
  pub(crate) fn max_time(&self, max_attempts: Attempts) -> Duration {
    match self {
      | Self::Exponential { init_max, .. } => Self::total_delay_exp(*init_max, max_attempts.0),
    }
  }

  fn total_delay_exp(init: Duration, attempt: u16) -> Duration {
    if attempt == 0 {
      return Duration::ZERO;
    }
    init * 2u32.pow(u32::from(attempt - 1))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn exponential_retrier_without_jitter() {
    let strategy = Strategy::Exponential { init_min: Duration::from_millis(1000),
                                           init_max: Duration::from_millis(1000) };
    let start = Instant::now();
    let mut retry = RetryTimer::new(start, strategy, Attempts(4));

    assert_eq!(retry.what_should_i_do(start + Duration::from_millis(999)),
               YouShould::Wait);
    assert_eq!(retry.what_should_i_do(start + Duration::from_millis(1000)),
               YouShould::Retry);

    assert_eq!(retry.what_should_i_do(start + Duration::from_millis(1999)),
               YouShould::Wait);
    assert_eq!(retry.what_should_i_do(start + Duration::from_millis(2000)),
               YouShould::Retry);

    assert_eq!(retry.what_should_i_do(start + Duration::from_millis(4000)),
               YouShould::Retry);

    assert_eq!(retry.what_should_i_do(start + Duration::from_secs(3600)),
               YouShould::Cry);
  }

  #[test]
  fn exp_calculation() {
    let init = Duration::from_millis(100);
    assert_eq!(Strategy::total_delay_exp(init, 1), Duration::from_millis(100));
    assert_eq!(Strategy::total_delay_exp(init, 2), Duration::from_millis(200));
    assert_eq!(Strategy::total_delay_exp(init, 3), Duration::from_millis(400));
  }

  #[test]
  fn attempts_saturating_sub() {
    assert_eq!(Attempts(4) - Attempts(1), Attempts(3));
    assert_eq!(Attempts(0) - Attempts(1), Attempts(0));
  }
}
