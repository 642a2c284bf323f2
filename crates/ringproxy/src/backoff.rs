use std::hint;
use std::thread;

/// Exponential spin-then-yield backoff for a thread that found no work.
///
/// Each step doubles the spin count up to `2^SPIN_LIMIT` PAUSE hints, then
/// switches to `thread::yield_now` until `YIELD_LIMIT` is passed, after which
/// [`is_completed`](Self::is_completed) reports that waiting longer is not
/// worth it. Producers use it through [`BackoffThenFail`](crate::BackoffThenFail);
/// consumer loops use it between empty `consume` rounds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Backoff {
    step: u32,
}

impl Backoff {
    /// Steps spent spinning before yielding (2^6 = 64 PAUSEs at most).
    pub const SPIN_LIMIT: u32 = 6;
    /// Steps after which the backoff counts as completed.
    pub const YIELD_LIMIT: u32 = 10;

    #[inline]
    pub const fn new() -> Self {
        Self { step: 0 }
    }

    /// Resumes a backoff at `step`, e.g. from a producer's idle counter.
    #[inline]
    pub const fn at_step(step: u32) -> Self {
        Self { step }
    }

    #[inline]
    pub const fn step(&self) -> u32 {
        self.step
    }

    /// Spins `2^step` times, without ever yielding.
    #[inline]
    pub fn spin(&mut self) {
        for _ in 0..1u32 << self.step.min(Self::SPIN_LIMIT) {
            hint::spin_loop();
        }
        if self.step <= Self::SPIN_LIMIT {
            self.step += 1;
        }
    }

    /// Spins while the step is small, yields the time slice afterwards.
    #[inline]
    pub fn snooze(&mut self) {
        if self.step <= Self::SPIN_LIMIT {
            self.spin();
        } else {
            thread::yield_now();
            if self.step <= Self::YIELD_LIMIT {
                self.step += 1;
            }
        }
    }

    /// True once spinning and yielding are both exhausted.
    #[inline]
    pub const fn is_completed(&self) -> bool {
        self.step > Self::YIELD_LIMIT
    }

    #[inline]
    pub fn reset(&mut self) {
        self.step = 0;
    }
}
