// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Per directed node pair records of the tightest known failure and success amounts.
//!
//! Observations are merged so that the stored record only depends on the set of observations,
//! not on the order in which they arrived: a failure watermark only ever moves down, a success
//! watermark only ever moves up, and for equal amounts the more recent observation is kept.

use crate::prelude::*;
use crate::routing::gossip::NodeId;
use crate::sync::{Arc, FairRwLock, Mutex};
use crate::util::ser::{DecodeError, Readable, Writeable, Writer};

use core::cmp;
use core::fmt;
use core::time::Duration;
use std::io;

/// An ordered pair of nodes. History is tracked per direction since the liquidity available to
/// forward from `from` to `to` says little about the reverse direction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DirectedPair {
	/// The node forwarding the HTLC
	pub from: NodeId,
	/// The node receiving the HTLC
	pub to: NodeId,
}

impl DirectedPair {
	/// Creates the pair for HTLCs sent from `from` to `to`.
	pub fn new(from: NodeId, to: NodeId) -> Self {
		DirectedPair { from, to }
	}
}

impl fmt::Display for DirectedPair {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f, "{} -> {}", self.from, self.to)
	}
}

/// An amount observed to fail or succeed, and when it was observed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Watermark {
	/// The amount, in msat, of the observed HTLC
	pub amount_msat: u64,
	/// When the observation was made, as a duration since the unix epoch
	pub timestamp: Duration,
}

/// What we know about forwarding over one [`DirectedPair`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PairHistory {
	/// The smallest amount known to have failed. Amounts at or above it are assumed likely to
	/// fail.
	pub failure: Option<Watermark>,
	/// The largest amount known to have succeeded. Amounts at or below it are assumed likely to
	/// succeed.
	pub success: Option<Watermark>,
}

impl PairHistory {
	/// Merges a failure of `amount_msat` observed at `timestamp`, returning whether the stored
	/// failure watermark changed.
	pub fn record_failure(&mut self, amount_msat: u64, timestamp: Duration) -> bool {
		let observed = Watermark { amount_msat, timestamp };
		let tighter = match self.failure {
			None => true,
			Some(current) => (amount_msat, cmp::Reverse(timestamp)) < (current.amount_msat, cmp::Reverse(current.timestamp)),
		};
		if tighter {
			self.failure = Some(observed);
		}
		tighter
	}

	/// Merges a success of `amount_msat` observed at `timestamp`, returning whether the stored
	/// success watermark changed.
	pub fn record_success(&mut self, amount_msat: u64, timestamp: Duration) -> bool {
		let observed = Watermark { amount_msat, timestamp };
		let tighter = match self.success {
			None => true,
			Some(current) => (amount_msat, timestamp) > (current.amount_msat, current.timestamp),
		};
		if tighter {
			self.success = Some(observed);
		}
		tighter
	}

	/// Returns the watermarks which should be used for lookups. When the two contradict (the
	/// success amount is at or above the failure amount) only the more recent one is kept, with
	/// the failure winning a tie.
	pub fn effective_watermarks(&self) -> (Option<Watermark>, Option<Watermark>) {
		match (self.failure, self.success) {
			(Some(failure), Some(success)) if success.amount_msat >= failure.amount_msat => {
				if success.timestamp > failure.timestamp {
					(None, Some(success))
				} else {
					(Some(failure), None)
				}
			},
			(failure, success) => (failure, success),
		}
	}
}

impl Writeable for Watermark {
	fn write<W: Writer>(&self, w: &mut W) -> Result<(), io::Error> {
		self.amount_msat.write(w)?;
		self.timestamp.write(w)
	}
}

impl Readable for Watermark {
	fn read<R: io::Read>(r: &mut R) -> Result<Self, DecodeError> {
		Ok(Watermark { amount_msat: Readable::read(r)?, timestamp: Readable::read(r)? })
	}
}

impl Writeable for PairHistory {
	fn write<W: Writer>(&self, w: &mut W) -> Result<(), io::Error> {
		self.failure.write(w)?;
		self.success.write(w)
	}
}

impl Readable for PairHistory {
	fn read<R: io::Read>(r: &mut R) -> Result<Self, DecodeError> {
		Ok(PairHistory { failure: Readable::read(r)?, success: Readable::read(r)? })
	}
}

/// Concurrent storage of [`PairHistory`] entries.
///
/// Each pair sits behind its own lock so that updates to different pairs never serialize against
/// each other. The map itself is only write-locked to add a pair seen for the first time or to
/// clear everything.
pub struct PairHistoryStore {
	pairs: FairRwLock<HashMap<DirectedPair, Arc<Mutex<PairHistory>>>>,
}

impl PairHistoryStore {
	/// Creates an empty store.
	pub fn new() -> Self {
		Self { pairs: FairRwLock::new(new_hash_map()) }
	}

	/// Returns a copy of the history of `pair`, if any outcome was recorded for it.
	pub fn get(&self, pair: &DirectedPair) -> Option<PairHistory> {
		let pairs = self.pairs.read().unwrap();
		pairs.get(pair).map(|history| *history.lock().unwrap())
	}

	/// Applies `update` to the history of `pair`, creating an empty history first if needed, and
	/// returns the result of `update`.
	pub fn update<F: FnOnce(&mut PairHistory) -> R, R>(&self, pair: &DirectedPair, update: F) -> R {
		let existing = self.pairs.read().unwrap().get(pair).map(Arc::clone);
		let history = match existing {
			Some(history) => history,
			None => {
				let mut pairs = self.pairs.write().unwrap();
				Arc::clone(pairs.entry(*pair).or_insert_with(|| Arc::new(Mutex::new(PairHistory::default()))))
			},
		};
		let mut history = history.lock().unwrap();
		update(&mut history)
	}

	/// Forgets every pair.
	pub fn clear(&self) {
		*self.pairs.write().unwrap() = new_hash_map();
	}

	/// Returns a copy of every pair's history, ordered by pair.
	///
	/// The map is only read-locked long enough to collect the per-pair handles, after which each
	/// pair is read under its own lock.
	pub fn snapshot(&self) -> Vec<(DirectedPair, PairHistory)> {
		let handles: Vec<(DirectedPair, Arc<Mutex<PairHistory>>)> = self.pairs.read().unwrap()
			.iter().map(|(pair, history)| (*pair, Arc::clone(history))).collect();
		let mut snapshot: Vec<(DirectedPair, PairHistory)> = handles.into_iter()
			.map(|(pair, history)| (pair, *history.lock().unwrap()))
			.collect();
		snapshot.sort_unstable_by(|a, b| a.0.cmp(&b.0));
		snapshot
	}

	/// The number of pairs with recorded history.
	pub fn len(&self) -> usize {
		self.pairs.read().unwrap().len()
	}
}
