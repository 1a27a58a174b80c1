//! Provisioned rate configuration and the per-connection limiter pair.

use std::fmt;
use std::num::NonZeroU64;
use std::sync::Arc;

use crate::config::WebSocketRateLimitConfig;
use crate::throttle::bucket::TokenBucket;

/// Window used when the operator leaves `time_window` unset or zero.
pub const DEFAULT_TIME_WINDOW_SECS: u64 = 60;

const DEFAULT_TIME_WINDOW: NonZeroU64 = match NonZeroU64::new(DEFAULT_TIME_WINDOW_SECS) {
    Some(window) => window,
    None => panic!("default time window must be non-zero"),
};

/// Direction of travel through a throttled connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Client to server; limited on read.
    Upload,
    /// Server to client; limited on write.
    Download,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Upload => "upload",
            Direction::Download => "download",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rate limits after provisioning defaults have been applied.
///
/// Immutable; a direction whose burst is zero is disabled and its byte rate
/// is forced to zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateConfig {
    up_byte_rate: u64,
    up_burst: u64,
    down_byte_rate: u64,
    down_burst: u64,
    time_window: NonZeroU64,
}

impl RateConfig {
    /// Apply operator defaults to the raw option block.
    pub fn provision(raw: &WebSocketRateLimitConfig) -> Self {
        let time_window = NonZeroU64::new(raw.time_window).unwrap_or(DEFAULT_TIME_WINDOW);

        let (up_byte_rate, up_burst) = if raw.up_burst_limit == 0 {
            tracing::info!("upload rate limit is disabled");
            (0, 0)
        } else {
            (raw.up_byte_rate, raw.up_burst_limit)
        };

        let (down_byte_rate, down_burst) = if raw.down_burst_limit == 0 {
            tracing::info!("download rate limit is disabled");
            (0, 0)
        } else {
            (raw.down_byte_rate, raw.down_burst_limit)
        };

        let config = Self {
            up_byte_rate,
            up_burst,
            down_byte_rate,
            down_burst,
            time_window,
        };

        tracing::info!(
            up_byte_rate = config.up_byte_rate,
            up_burst_limit = config.up_burst,
            down_byte_rate = config.down_byte_rate,
            down_burst_limit = config.down_burst,
            time_window = config.time_window.get(),
            "WebSocket rate limit provisioned"
        );

        config
    }

    pub fn time_window_secs(&self) -> u64 {
        self.time_window.get()
    }

    /// Burst size for `direction`, zero when disabled.
    pub fn burst(&self, direction: Direction) -> u64 {
        match direction {
            Direction::Upload => self.up_burst,
            Direction::Download => self.down_burst,
        }
    }

    /// Configured bytes per window for `direction`.
    pub fn byte_rate(&self, direction: Direction) -> u64 {
        match direction {
            Direction::Upload => self.up_byte_rate,
            Direction::Download => self.down_byte_rate,
        }
    }

    /// Derived refill rate in bytes per second.
    pub fn bytes_per_second(&self, direction: Direction) -> f64 {
        self.byte_rate(direction) as f64 / self.time_window.get() as f64
    }

    pub fn is_enabled(&self, direction: Direction) -> bool {
        self.burst(direction) > 0
    }

    fn bucket(&self, direction: Direction) -> Option<Arc<TokenBucket>> {
        self.is_enabled(direction).then(|| {
            Arc::new(TokenBucket::new(
                self.bytes_per_second(direction),
                self.burst(direction),
            ))
        })
    }
}

impl Default for RateConfig {
    fn default() -> Self {
        Self::provision(&WebSocketRateLimitConfig::default())
    }
}

/// Upload and download buckets for exactly one connection.
///
/// `None` means the direction is not limited.
#[derive(Debug, Clone, Default)]
pub struct LimiterPair {
    upload: Option<Arc<TokenBucket>>,
    download: Option<Arc<TokenBucket>>,
}

impl LimiterPair {
    /// Build fresh buckets from a provisioned configuration.
    pub fn new(config: &RateConfig) -> Self {
        Self {
            upload: config.bucket(Direction::Upload),
            download: config.bucket(Direction::Download),
        }
    }

    /// A pair that limits nothing.
    pub fn unlimited() -> Self {
        Self::default()
    }

    pub fn upload(&self) -> Option<&Arc<TokenBucket>> {
        self.upload.as_ref()
    }

    pub fn download(&self) -> Option<&Arc<TokenBucket>> {
        self.download.as_ref()
    }

    pub fn get(&self, direction: Direction) -> Option<&Arc<TokenBucket>> {
        match direction {
            Direction::Upload => self.upload(),
            Direction::Download => self.download(),
        }
    }
}
