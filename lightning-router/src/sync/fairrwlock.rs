use std::sync::{LockResult, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Rust libstd's RwLock does not provide any fairness guarantees (and, in fact, when used on
/// Linux with pthreads under the hood, readers trivially and completely starve writers).
/// Mission control lookups happen on every edge considered during route search, while the
/// writes that record a first sighting of a pair or reset all history are rare but must not wait
/// behind a continuous stream of searches.
///
/// Thus, we block readers when a writer is pending, which we do with a trivial RwLock wrapper
/// here. It is not particularly optimized, but provides some reasonable fairness by blocking
/// readers (by taking the write lock) if there are writers pending when we go to take a read
/// lock.
pub struct FairRwLock<T> {
	lock: RwLock<T>,
	waiting_writers: AtomicUsize,
}

impl<T> FairRwLock<T> {
	pub fn new(t: T) -> Self {
		Self { lock: RwLock::new(t), waiting_writers: AtomicUsize::new(0) }
	}

	// Note that all atomic accesses are relaxed, as we do not rely on the atomics here for any
	// ordering at all, instead relying on the underlying RwLock to provide ordering of unrelated
	// memory.
	pub fn write(&self) -> LockResult<RwLockWriteGuard<T>> {
		self.waiting_writers.fetch_add(1, Ordering::Relaxed);
		let res = self.lock.write();
		self.waiting_writers.fetch_sub(1, Ordering::Relaxed);
		res
	}

	pub fn read(&self) -> LockResult<RwLockReadGuard<T>> {
		if self.waiting_writers.load(Ordering::Relaxed) != 0 {
			let _write_queue_lock = self.lock.write();
		}
		self.lock.read()
	}
}

#[cfg(test)]
mod tests {
	use super::FairRwLock;
	use crate::sync::Arc;

	#[test]
	fn readers_and_writers_interleave() {
		let lock = Arc::new(FairRwLock::new(0u64));
		let mut handles = Vec::new();
		for i in 0..4 {
			let lock = Arc::clone(&lock);
			handles.push(std::thread::spawn(move || {
				for _ in 0..100 {
					if i % 2 == 0 {
						*lock.write().unwrap() += 1;
					} else {
						let _ = *lock.read().unwrap();
					}
				}
			}));
		}
		for handle in handles {
			handle.join().unwrap();
		}
		assert_eq!(*lock.read().unwrap(), 200);
	}
}
