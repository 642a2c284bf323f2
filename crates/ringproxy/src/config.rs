/// Largest slot count a channel accepts (after rounding).
pub const MAX_CAPACITY: usize = 1 << 30;

/// Configuration for a proxy channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// Requested slot count; rounded up to the next power of two.
    pub capacity: usize,
    /// Enable metrics collection (slight overhead)
    pub enable_metrics: bool,
}

impl Config {
    /// Creates a new configuration with custom settings.
    pub const fn new(capacity: usize, enable_metrics: bool) -> Self {
        Self {
            capacity,
            enable_metrics,
        }
    }

    /// Returns a copy with a different requested capacity.
    pub const fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Returns a copy with metrics switched on or off.
    pub const fn with_metrics(mut self, enable_metrics: bool) -> Self {
        self.enable_metrics = enable_metrics;
        self
    }

    /// Slot count actually allocated: the next power of two `>= capacity`.
    ///
    /// Returns `None` for a zero capacity or one that rounds past [`MAX_CAPACITY`].
    #[inline]
    pub const fn effective_capacity(&self) -> Option<usize> {
        if self.capacity == 0 || self.capacity > MAX_CAPACITY {
            return None;
        }
        Some(self.capacity.next_power_of_two())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            capacity: 4096,
            enable_metrics: false,
        }
    }
}

/// Low latency configuration (1K slots)
pub const LOW_LATENCY_CONFIG: Config = Config::new(1024, false);

/// High throughput configuration (64K slots)
pub const HIGH_THROUGHPUT_CONFIG: Config = Config::new(1 << 16, false);
