// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! A simple module which provides the wall clock used to timestamp observations, either backed by
//! [`std::time::SystemTime`] or a mocked version of it for tests.

use core::time::Duration;

/// A measurement of wall-clock time, expressed as the time since the unix epoch.
///
/// Mission control watermarks and payment records are stamped with this so they can be persisted
/// and compared across restarts.
pub trait Time {
	/// Returns the current time as a duration since the unix epoch.
	fn duration_since_epoch() -> Duration;

	/// Returns the time elapsed since `earlier`, or zero if `earlier` lies in the future.
	fn elapsed_since(earlier: Duration) -> Duration {
		Self::duration_since_epoch().saturating_sub(earlier)
	}
}

/// A [`Time`] backed by [`std::time::SystemTime`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SystemClock;

impl Time for SystemClock {
	fn duration_since_epoch() -> Duration {
		use std::time::SystemTime;
		SystemTime::now().duration_since(SystemTime::UNIX_EPOCH).unwrap_or(Duration::ZERO)
	}
}

#[cfg(test)]
pub(crate) mod tests {
	use super::Time;

	use core::cell::Cell;
	use core::time::Duration;

	/// Time that can be advanced manually in tests.
	#[derive(Clone, Copy, Debug, PartialEq, Eq)]
	pub struct SinceEpoch;

	impl SinceEpoch {
		thread_local! {
			static ELAPSED: Cell<Duration> = core::cell::Cell::new(Duration::from_secs(1_600_000_000));
		}

		pub fn advance(duration: Duration) {
			Self::ELAPSED.with(|elapsed| elapsed.set(elapsed.get() + duration))
		}
	}

	impl Time for SinceEpoch {
		fn duration_since_epoch() -> Duration {
			Self::ELAPSED.with(|elapsed| elapsed.get())
		}
	}

	#[test]
	fn time_passes_when_advanced() {
		let now = SinceEpoch::duration_since_epoch();

		SinceEpoch::advance(Duration::from_secs(1));
		SinceEpoch::advance(Duration::from_secs(1));

		assert_eq!(SinceEpoch::elapsed_since(now), Duration::from_secs(2));
	}

	#[test]
	fn elapsed_saturates_for_future_timestamps() {
		let future = SinceEpoch::duration_since_epoch() + Duration::from_secs(10);
		assert_eq!(SinceEpoch::elapsed_since(future), Duration::ZERO);
	}

	#[test]
	fn system_clock_is_after_epoch() {
		assert!(super::SystemClock::duration_since_epoch() > Duration::from_secs(1_600_000_000));
	}
}
