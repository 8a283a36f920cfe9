//! Token bucket admission primitive.

use parking_lot::Mutex;
use std::time::{Duration, Instant};

/// Unit a configured rate is expressed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RateUnit {
    /// Requests per second
    Second,
    /// Requests per minute
    Minute,
}

impl RateUnit {
    /// Get the duration of this unit.
    pub fn duration(&self) -> Duration {
        match self {
            RateUnit::Second => Duration::from_secs(1),
            RateUnit::Minute => Duration::from_secs(60),
        }
    }

    /// Time it takes to refill a single token at `rate` requests per unit.
    ///
    /// `rate` must be non-zero; configuration validation guarantees this.
    pub fn refill_interval(&self, rate: u32) -> Duration {
        debug_assert!(rate > 0, "rate must be non-zero");
        self.duration().checked_div(rate).unwrap_or(Duration::ZERO)
    }
}

/// A continuously refilling token bucket.
///
/// Tokens are fractional: partial refills accumulate between calls. The
/// bucket is internally synchronized so a shared `Arc<TokenBucket>` can be
/// consulted from any number of request tasks without double-admitting.
#[derive(Debug)]
pub struct TokenBucket {
    /// Maximum number of tokens (the burst size)
    capacity: u32,
    /// Time needed to refill one token
    refill_interval: Duration,
    state: Mutex<BucketState>,
}

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    /// Create a full bucket.
    pub fn new(capacity: u32, refill_interval: Duration) -> Self {
        Self::new_at(capacity, refill_interval, Instant::now())
    }

    /// Create a full bucket whose refill clock starts at `now`.
    pub fn new_at(capacity: u32, refill_interval: Duration, now: Instant) -> Self {
        Self {
            capacity,
            refill_interval,
            state: Mutex::new(BucketState {
                tokens: capacity as f64,
                last_refill: now,
            }),
        }
    }

    /// Create a bucket admitting `rate` requests per `unit` with the given burst.
    pub fn with_rate(rate: u32, unit: RateUnit, burst: u32) -> Self {
        Self::new(burst, unit.refill_interval(rate))
    }

    /// Try to take one token.
    ///
    /// Returns `true` if the request is admitted, `false` if the bucket is empty.
    pub fn try_acquire(&self) -> bool {
        self.try_acquire_at(Instant::now())
    }

    /// Try to take one token as of `now`.
    pub fn try_acquire_at(&self, now: Instant) -> bool {
        self.acquire_at(now).0
    }

    /// Try to take one token and report the whole tokens left afterwards.
    ///
    /// Both values come from the same critical section.
    pub fn acquire(&self) -> (bool, u32) {
        self.acquire_at(Instant::now())
    }

    /// [`TokenBucket::acquire`] as of `now`.
    pub fn acquire_at(&self, now: Instant) -> (bool, u32) {
        let mut state = self.state.lock();
        self.refill(&mut state, now);

        let admitted = state.tokens >= 1.0;
        if admitted {
            state.tokens -= 1.0;
        }
        (admitted, floor_tokens(state.tokens))
    }

    /// Whole tokens currently available, for reporting only.
    pub fn remaining(&self) -> u32 {
        floor_tokens(self.state.lock().tokens)
    }

    /// Get the capacity of this bucket.
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Get the refill interval of this bucket.
    pub fn refill_interval(&self) -> Duration {
        self.refill_interval
    }

    fn refill(&self, state: &mut BucketState, now: Instant) {
        // saturating: an earlier `now` than the last refill adds nothing
        let elapsed = now.saturating_duration_since(state.last_refill);
        if elapsed.is_zero() {
            return;
        }

        let interval = self.refill_interval.as_secs_f64();
        let added = if interval > 0.0 {
            elapsed.as_secs_f64() / interval
        } else {
            self.capacity as f64
        };

        state.tokens = (state.tokens + added).min(self.capacity as f64);
        state.last_refill = now;
    }
}

fn floor_tokens(tokens: f64) -> u32 {
    tokens.floor().max(0.0) as u32
}
