//! Hands out unique ids, such as attempt and session ids, falling back to a mutex on platforms
//! without 64-bit atomics.

#[cfg(not(target_has_atomic = "64"))]
use crate::sync::Mutex;
#[cfg(target_has_atomic = "64")]
use core::sync::atomic::{AtomicU64, Ordering};

pub(crate) struct AtomicCounter {
	#[cfg(target_has_atomic = "64")]
	next_id: AtomicU64,
	#[cfg(not(target_has_atomic = "64"))]
	next_id: Mutex<u64>,
}

impl AtomicCounter {
	/// Starts handing out ids at 0.
	pub(crate) fn new() -> Self {
		Self {
			#[cfg(target_has_atomic = "64")]
			next_id: AtomicU64::new(0),
			#[cfg(not(target_has_atomic = "64"))]
			next_id: Mutex::new(0),
		}
	}

	pub(crate) fn next(&self) -> u64 {
		#[cfg(target_has_atomic = "64")]
		{
			self.next_id.fetch_add(1, Ordering::AcqRel)
		}
		#[cfg(not(target_has_atomic = "64"))]
		{
			let mut next_id = self.next_id.lock().unwrap();
			let id = *next_id;
			*next_id += 1;
			id
		}
	}

	/// Ensures [`Self::next`] never again returns a value at or below `seen`, used after reloading
	/// ids which were handed out before a restart.
	pub(crate) fn bump_past(&self, seen: u64) {
		let floor = seen.saturating_add(1);
		#[cfg(target_has_atomic = "64")]
		{
			self.next_id.fetch_max(floor, Ordering::AcqRel);
		}
		#[cfg(not(target_has_atomic = "64"))]
		{
			let mut next_id = self.next_id.lock().unwrap();
			*next_id = core::cmp::max(*next_id, floor);
		}
	}
}
