//! Activation gate and clock source.
//!
//! A petition with a future `activated_at` does not exist as far as public
//! callers are concerned. The gate is evaluated per request against the
//! configured clock; nothing about visibility is cached.

use chrono::{DateTime, Utc};
use std::sync::Mutex;

use crate::model::Petition;

/// Whether a petition with this activation time is publicly visible at `now`.
pub fn is_visible(activated_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    match activated_at {
        None => true,
        Some(at) => at <= now,
    }
}

impl Petition {
    pub fn is_visible_at(&self, now: DateTime<Utc>) -> bool {
        is_visible(self.activated_at, now)
    }
}

/// Process-wide time source
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually advanced clock for tests and replay.
#[derive(Debug)]
pub struct FixedClock {
    now: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        let mut guard = self.now.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        *guard = now;
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut guard = self.now.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        *guard += by;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}
