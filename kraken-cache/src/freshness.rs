//! Freshness contracts for cache reads.
//!
//! A cached entry records the last-modified timestamp of the document it was
//! read from. Callers state how far that timestamp may drift from the one the
//! remote store reports now before the entry stops being valid.

use std::time::Duration;

use kraken_core::Timestamp;

/// Freshness requirement for cache reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Freshness {
    /// The cached timestamp must match the remote one exactly (to the
    /// millisecond, the precision entries are stored with).
    #[default]
    Exact,

    /// Accept entries whose timestamp differs from the remote one by at most
    /// `window`, in either direction.
    ///
    /// Use this when the cached timestamp was taken from a different clock
    /// than the server's, e.g. the client time right after a read.
    Tolerant {
        /// Maximum accepted difference between the two timestamps.
        window: Duration,
    },
}

impl Freshness {
    /// Create a freshness requirement from a tolerance window.
    ///
    /// A zero window is [`Freshness::Exact`].
    pub fn within(window: Duration) -> Self {
        if window.is_zero() {
            Self::Exact
        } else {
            Self::Tolerant { window }
        }
    }

    /// The accepted drift. Zero for `Exact`.
    pub fn window(&self) -> Duration {
        match self {
            Self::Exact => Duration::ZERO,
            Self::Tolerant { window } => *window,
        }
    }

    /// Whether an entry cached at `cached` is valid against `remote`.
    pub fn admits(&self, cached: Timestamp, remote: Timestamp) -> bool {
        let drift = cached
            .timestamp_millis()
            .abs_diff(remote.timestamp_millis());
        u128::from(drift) <= self.window().as_millis()
    }
}

/// A successful cache read, carrying the timestamp the entry was stored with.
#[derive(Debug, Clone)]
pub struct CacheRead<T> {
    value: T,
    cached_at: Timestamp,
}

impl<T> CacheRead<T> {
    pub fn new(value: T, cached_at: Timestamp) -> Self {
        Self { value, cached_at }
    }

    /// Consume the wrapper and return the underlying value.
    pub fn into_value(self) -> T {
        self.value
    }

    pub fn value(&self) -> &T {
        &self.value
    }

    /// The document timestamp recorded when the entry was written.
    pub fn cached_at(&self) -> Timestamp {
        self.cached_at
    }

    /// Map the inner value to a new type.
    pub fn map<U, F>(self, f: F) -> CacheRead<U>
    where
        F: FnOnce(T) -> U,
    {
        CacheRead {
            value: f(self.value),
            cached_at: self.cached_at,
        }
    }
}

impl<T> AsRef<T> for CacheRead<T> {
    fn as_ref(&self) -> &T {
        &self.value
    }
}
