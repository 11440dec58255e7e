// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Mission control turns the outcomes of past payment attempts into success probability
//! estimates which [`find_route`] uses to steer away from pairs that recently failed.
//!
//! Knowledge about a pair is kept as two watermarks (see [`PairHistory`]). How much a watermark
//! moves the estimate away from the configured prior decays with a half-life, so that old
//! failures do not block a pair forever.
//!
//! [`find_route`]: crate::routing::router::find_route

use crate::routing::gossip::NodeId;
use crate::routing::pair_history::{DirectedPair, PairHistory, PairHistoryStore, Watermark};
use crate::routing::router::Route;
use crate::util::config::MissionControlConfig;
use crate::util::logger::Logger;
use crate::util::time::{SystemClock, Time};

use crate::prelude::*;

use core::marker::PhantomData;
use core::ops::Deref;
use core::time::Duration;

/// A source of success probability estimates for forwarding an amount over a pair of nodes.
pub trait ProbabilitySource {
	/// Returns the estimated probability, in `[0, 1]`, that `amount_msat` can be forwarded from
	/// `from` to `to`.
	fn success_probability(&self, from: &NodeId, to: &NodeId, amount_msat: u64) -> f64;
}

impl<S: ProbabilitySource + ?Sized, T: Deref<Target = S>> ProbabilitySource for T {
	fn success_probability(&self, from: &NodeId, to: &NodeId, amount_msat: u64) -> f64 {
		self.deref().success_probability(from, to, amount_msat)
	}
}

/// Learns from the outcome of HTLCs sent over a [`Route`].
pub trait ProbabilityUpdate {
	/// Records how an HTLC sent over `route` was resolved.
	fn report_outcome(&self, route: &Route, outcome: RouteOutcome);
}

impl<U: ProbabilityUpdate + ?Sized, T: Deref<Target = U>> ProbabilityUpdate for T {
	fn report_outcome(&self, route: &Route, outcome: RouteOutcome) {
		self.deref().report_outcome(route, outcome)
	}
}

/// How an HTLC sent over a [`Route`] was resolved.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RouteOutcome {
	/// The recipient settled the HTLC.
	Succeeded,
	/// The channel at the given index of [`Route::hops`] could not forward the HTLC. Every hop
	/// before it did.
	FailedAtHop(usize),
	/// The HTLC reached the recipient, which rejected it.
	RecipientRejected,
}

/// [`MissionControlUsingTime`] using the system clock.
pub type MissionControl<L> = MissionControlUsingTime<L, SystemClock>;

/// Tracks per-pair payment outcomes and derives success probabilities from them.
///
/// All methods take `&self` and may be called concurrently. Reports for different pairs never
/// contend with each other.
///
/// Use [`MissionControl`] rather than this type directly unless a different [`Time`] source is
/// needed.
pub struct MissionControlUsingTime<L: Deref, T: Time> where L::Target: Logger {
	config: MissionControlConfig,
	history: PairHistoryStore,
	logger: L,
	_time: PhantomData<T>,
}

impl<L: Deref, T: Time> MissionControlUsingTime<L, T> where L::Target: Logger {
	/// Creates mission control with no history.
	pub fn new(config: MissionControlConfig, logger: L) -> Self {
		Self { config, history: PairHistoryStore::new(), logger, _time: PhantomData }
	}

	/// The probability assumed for pairs we know nothing about.
	pub fn prior_probability(&self) -> f64 {
		self.config.prior_probability
	}

	/// How much an observation made at `observed_at` is still trusted, from 1 (just now) down
	/// towards 0.
	fn confidence(&self, observed_at: Duration) -> f64 {
		let half_life = self.config.decay_half_life.as_secs_f64();
		if half_life <= 0.0 {
			return 0.0;
		}
		let elapsed = T::elapsed_since(observed_at).as_secs_f64();
		libm::pow(0.5, elapsed / half_life)
	}

	/// Returns the estimated probability that `amount_msat` can be forwarded from `from` to `to`.
	///
	/// Amounts at or above the failure watermark get the prior scaled down by how fresh the
	/// failure is, amounts at or below the success watermark get the prior scaled up towards 1 by
	/// how fresh the success is. In between, the estimate moves linearly in `ln(1 + amount)`.
	pub fn success_probability(&self, from: &NodeId, to: &NodeId, amount_msat: u64) -> f64 {
		let prior = self.config.prior_probability;
		let history = match self.history.get(&DirectedPair::new(*from, *to)) {
			Some(history) => history,
			None => return prior,
		};
		let (failure, success) = history.effective_watermarks();
		let failure = failure.map(|f| (f.amount_msat, prior * (1.0 - self.confidence(f.timestamp))));
		let success = success.map(|s| (s.amount_msat, prior + (1.0 - prior) * self.confidence(s.timestamp)));

		let probability = match (failure, success) {
			(Some((fail_amt, fail_prob)), _) if amount_msat >= fail_amt => fail_prob,
			(_, Some((succ_amt, succ_prob))) if amount_msat <= succ_amt => succ_prob,
			(None, _) => prior,
			(Some((fail_amt, fail_prob)), success) => {
				let (low_amt, low_prob) = success.unwrap_or((0, prior));
				let low = libm::log1p(low_amt as f64);
				let high = libm::log1p(fail_amt as f64);
				let position = (libm::log1p(amount_msat as f64) - low) / (high - low);
				low_prob + position * (fail_prob - low_prob)
			},
		};
		probability.max(0.0).min(1.0)
	}

	/// Records that `amount_msat` succeeded or failed to be forwarded over `pair`.
	pub fn report_pair_outcome(&self, pair: &DirectedPair, amount_msat: u64, succeeded: bool) {
		let now = T::duration_since_epoch();
		self.history.update(pair, |history| {
			let before = *history;
			let changed = if succeeded {
				history.record_success(amount_msat, now)
			} else {
				history.record_failure(amount_msat, now)
			};
			if changed {
				if succeeded {
					log_debug!(self.logger, "Setting success watermark of {} from {} to {} msat",
						pair, WatermarkAmount(before.success), amount_msat);
				} else {
					log_debug!(self.logger, "Setting failure watermark of {} from {} to {} msat",
						pair, WatermarkAmount(before.failure), amount_msat);
				}
			} else {
				log_trace!(self.logger, "Ignoring {} of {} msat over {}, a tighter bound is already known",
					if succeeded { "success" } else { "failure" }, amount_msat, pair);
			}
		});
	}

	/// Records how an HTLC sent over `route` was resolved, updating every pair it tells us
	/// something about.
	pub fn report_outcome(&self, route: &Route, outcome: RouteOutcome) {
		let succeeded_hops = match outcome {
			RouteOutcome::Succeeded | RouteOutcome::RecipientRejected => route.hops.len(),
			RouteOutcome::FailedAtHop(hop) => core::cmp::min(hop, route.hops.len()),
		};
		for (idx, pair) in route.pairs().enumerate() {
			if idx < succeeded_hops {
				self.report_pair_outcome(&pair, route.amount_into_hop(idx), true);
			} else {
				self.report_pair_outcome(&pair, route.amount_into_hop(idx), false);
				break;
			}
		}
	}

	/// Returns the history recorded for the pair `from` -> `to`, if any.
	pub fn pair_history(&self, from: &NodeId, to: &NodeId) -> Option<PairHistory> {
		self.history.get(&DirectedPair::new(*from, *to))
	}

	/// Returns the recorded history of every pair, ordered by pair.
	pub fn snapshot(&self) -> Vec<(DirectedPair, PairHistory)> {
		self.history.snapshot()
	}

	/// Forgets everything learned so far. Every pair goes back to the prior probability.
	pub fn reset_history(&self) {
		let pairs = self.history.len();
		self.history.clear();
		log_info!(self.logger, "Reset mission control, forgot history of {} pairs", pairs);
	}
}

impl<L: Deref, T: Time> ProbabilitySource for MissionControlUsingTime<L, T> where L::Target: Logger {
	fn success_probability(&self, from: &NodeId, to: &NodeId, amount_msat: u64) -> f64 {
		MissionControlUsingTime::success_probability(self, from, to, amount_msat)
	}
}

impl<L: Deref, T: Time> ProbabilityUpdate for MissionControlUsingTime<L, T> where L::Target: Logger {
	fn report_outcome(&self, route: &Route, outcome: RouteOutcome) {
		MissionControlUsingTime::report_outcome(self, route, outcome)
	}
}

struct WatermarkAmount(Option<Watermark>);
impl core::fmt::Display for WatermarkAmount {
	fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
		match self.0 {
			Some(watermark) => write!(f, "{}", watermark.amount_msat),
			None => f.write_str("none"),
		}
	}
}
