//! Producer-side backpressure policies.
//!
//! A producer that cannot claim a slot calls [`WaitStrategy::idle`] with a
//! counter that starts at 0 for each call and is replaced by whatever the
//! strategy returns. Returning [`GiveUp`] aborts the call with
//! [`CallError::QueueFull`](crate::CallError::QueueFull).
//!
//! The consumer never waits inside the channel: `consume` returns fewer
//! calls than asked for when the ring is empty.

use crate::backoff::Backoff;
use std::hint;
use std::thread;
use std::time::Duration;
use thiserror::Error;

/// Returned by a [`WaitStrategy`] that refuses to wait any longer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("wait strategy gave up")]
pub struct GiveUp;

/// Policy invoked when a producer finds no free slot.
pub trait WaitStrategy: Send + Sync {
    /// Waits once and returns the next counter, or gives up.
    fn idle(&self, counter: u32) -> Result<u32, GiveUp>;
}

impl<F> WaitStrategy for F
where
    F: Fn(u32) -> Result<u32, GiveUp> + Send + Sync,
{
    #[inline]
    fn idle(&self, counter: u32) -> Result<u32, GiveUp> {
        self(counter)
    }
}

/// Spins on the CPU forever.
#[derive(Debug, Clone, Copy, Default)]
pub struct BusySpin;

impl WaitStrategy for BusySpin {
    #[inline]
    fn idle(&self, counter: u32) -> Result<u32, GiveUp> {
        hint::spin_loop();
        Ok(counter.saturating_add(1))
    }
}

/// Spins `spin_tries` rounds, then yields the time slice on every round.
#[derive(Debug, Clone, Copy)]
pub struct Yielding {
    pub spin_tries: u32,
}

impl Default for Yielding {
    fn default() -> Self {
        Self { spin_tries: 100 }
    }
}

impl WaitStrategy for Yielding {
    #[inline]
    fn idle(&self, counter: u32) -> Result<u32, GiveUp> {
        if counter < self.spin_tries {
            hint::spin_loop();
        } else {
            thread::yield_now();
        }
        Ok(counter.saturating_add(1))
    }
}

/// Spins, then yields, then parks the thread for `park` per round.
#[derive(Debug, Clone, Copy)]
pub struct Parking {
    pub spin_tries: u32,
    pub yield_tries: u32,
    pub park: Duration,
}

impl Default for Parking {
    fn default() -> Self {
        Self {
            spin_tries: 100,
            yield_tries: 100,
            park: Duration::from_micros(50),
        }
    }
}

impl WaitStrategy for Parking {
    fn idle(&self, counter: u32) -> Result<u32, GiveUp> {
        if counter < self.spin_tries {
            hint::spin_loop();
        } else if counter < self.spin_tries.saturating_add(self.yield_tries) {
            thread::yield_now();
        } else {
            thread::park_timeout(self.park);
        }
        Ok(counter.saturating_add(1))
    }
}

/// Never waits: a full ring fails the call immediately.
#[derive(Debug, Clone, Copy, Default)]
pub struct FailFast;

impl WaitStrategy for FailFast {
    #[inline]
    fn idle(&self, _counter: u32) -> Result<u32, GiveUp> {
        Err(GiveUp)
    }
}

/// Adaptive spin-then-yield [`Backoff`] that gives up once it is exhausted.
///
/// The counter is the backoff step, so a call fails after
/// `Backoff::YIELD_LIMIT + 1` unsuccessful claims.
#[derive(Debug, Clone, Copy, Default)]
pub struct BackoffThenFail;

impl WaitStrategy for BackoffThenFail {
    fn idle(&self, counter: u32) -> Result<u32, GiveUp> {
        let mut backoff = Backoff::at_step(counter);
        if backoff.is_completed() {
            return Err(GiveUp);
        }
        backoff.snooze();
        Ok(backoff.step())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_until_give_up<W: WaitStrategy>(wait: &W, max_rounds: u32) -> Option<u32> {
        let mut counter = 0;
        for round in 0..max_rounds {
            match wait.idle(counter) {
                Ok(next) => counter = next,
                Err(GiveUp) => return Some(round),
            }
        }
        None
    }

    #[test]
    fn test_fail_fast_gives_up_immediately() {
        assert_eq!(FailFast.idle(0), Err(GiveUp));
    }

    #[test]
    fn test_backoff_then_fail_gives_up_eventually() {
        assert_eq!(
            run_until_give_up(&BackoffThenFail, 100),
            Some(Backoff::YIELD_LIMIT + 1)
        );
    }

    #[test]
    fn test_waiting_strategies_never_give_up() {
        assert_eq!(run_until_give_up(&BusySpin, 1000), None);
        assert_eq!(run_until_give_up(&Yielding { spin_tries: 2 }, 10), None);
        let parking = Parking {
            spin_tries: 1,
            yield_tries: 1,
            park: Duration::from_micros(1),
        };
        assert_eq!(run_until_give_up(&parking, 5), None);
    }

    #[test]
    fn test_counter_saturates() {
        assert_eq!(BusySpin.idle(u32::MAX), Ok(u32::MAX));
    }

    #[test]
    fn test_closure_strategy() {
        let give_up_after_three = |counter: u32| {
            if counter >= 3 {
                Err(GiveUp)
            } else {
                Ok(counter + 1)
            }
        };
        assert_eq!(run_until_give_up(&give_up_after_three, 10), Some(3));
    }
}
