//! Platform-agnostic wall-clock access
//!
//! Provides the current UTC instant on both WASM and native targets, plus the
//! timestamp rendering used for the page stamp.

use chrono::{DateTime, SecondsFormat, Utc};

/// Source of the current instant
pub trait Clock {
    fn now(&self) -> DateTime<Utc>;
}

/// Reads the host clock
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        now_utc()
    }
}

/// Always reports the same instant (tests, reproducible renders)
#[derive(Clone, Copy, Debug)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

impl<C: Clock + ?Sized> Clock for &C {
    fn now(&self) -> DateTime<Utc> {
        (**self).now()
    }
}

#[cfg(all(target_arch = "wasm32", feature = "wasm"))]
pub fn now_utc() -> DateTime<Utc> {
    let millis = js_sys::Date::now() as i64;
    DateTime::from_timestamp_millis(millis).unwrap_or_default()
}

#[cfg(not(all(target_arch = "wasm32", feature = "wasm")))]
pub fn now_utc() -> DateTime<Utc> {
    Utc::now()
}

/// Render an instant as `YYYY-MM-DDTHH:MM:SS.mmmZ`
///
/// Matches the browser's `Date.prototype.toISOString` for four-digit years.
pub fn format_timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}
