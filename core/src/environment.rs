//! Dependency-injection traits: abstractions over time and identifier
//! generation so domain and orchestration code stays deterministic and
//! testable.

use chrono::{DateTime, Utc};

/// Abstracts time so tests can control "now" deterministically.
pub trait Clock: Send + Sync {
    /// The current time.
    fn now(&self) -> DateTime<Utc>;
}

/// Production clock backed by the system wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock fixed at a single instant, with interior mutability so tests
/// can advance it explicitly.
#[derive(Debug, Clone)]
pub struct FixedClock {
    instant: std::sync::Arc<std::sync::RwLock<DateTime<Utc>>>,
}

impl FixedClock {
    /// A clock fixed at the given instant.
    #[must_use]
    pub fn at(instant: DateTime<Utc>) -> Self {
        Self {
            instant: std::sync::Arc::new(std::sync::RwLock::new(instant)),
        }
    }

    /// A clock fixed at the Unix epoch start of 2025, matching the
    /// convention used throughout the test suite.
    #[must_use]
    pub fn at_epoch() -> Self {
        Self::at(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("valid rfc3339 literal")
                .with_timezone(&Utc),
        )
    }

    /// Advance the clock by a duration, affecting every clone that
    /// shares this instance.
    pub fn advance(&self, delta: chrono::Duration) {
        if let Ok(mut guard) = self.instant.write() {
            *guard += delta;
        }
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.instant.read().map(|g| *g).unwrap_or_else(|_| Utc::now())
    }
}
