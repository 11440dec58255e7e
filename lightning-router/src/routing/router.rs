// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! The router finds paths within a [`ChannelGraph`] and builds [`Route`]s over given hops.
//!
//! Route search runs backwards from the payee so that every hop's fee is computed from the exact
//! amount it has to forward. Candidate channels are weighted by their fee plus a penalty derived
//! from a [`ProbabilitySource`] (usually [`MissionControl`]).
//!
//! [`MissionControl`]: crate::routing::mission_control::MissionControl

use crate::routing::gossip::{ChannelGraph, DirectedChannel, NodeId};
use crate::routing::mission_control::ProbabilitySource;
use crate::routing::pair_history::DirectedPair;
use crate::util::config::RouterConfig;
use crate::util::errors::APIError;
use crate::util::logger::Logger;
use crate::util::ser::{DecodeError, Readable, Writeable, Writer};

use crate::prelude::*;

use alloc::collections::BinaryHeap;
use core::cmp;
use core::ops::Deref;
use std::io;

/// The total number of millisatoshis that can ever exist.
pub const MAX_VALUE_MSAT: u64 = 21_000_000_0000_0000_000;

/// The default limit on the sum of all CLTV deltas of a route, including the payee's.
pub const DEFAULT_MAX_TOTAL_CLTV_EXPIRY_DELTA: u32 = 2016;

/// A hop in a route
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub struct RouteHop {
	/// The node_id of the node at this hop.
	pub node_id: NodeId,
	/// The channel that should be used from the previous hop to reach this node.
	pub short_channel_id: u64,
	/// The fee taken on this hop (for paying for the use of the *next* channel in the path).
	/// For the last hop, this should be the full value of the payment (might be more than
	/// requested if we had to match htlc_minimum_msat).
	pub fee_msat: u64,
	/// The CLTV delta added for this hop. For the last hop, this should be the full CLTV value
	/// expected at the destination, in excess of the current block height.
	pub cltv_expiry_delta: u32,
}

impl Writeable for RouteHop {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), io::Error> {
		self.node_id.write(writer)?;
		self.short_channel_id.write(writer)?;
		self.fee_msat.write(writer)?;
		self.cltv_expiry_delta.write(writer)
	}
}

impl Readable for RouteHop {
	fn read<R: io::Read>(reader: &mut R) -> Result<Self, DecodeError> {
		Ok(RouteHop {
			node_id: Readable::read(reader)?,
			short_channel_id: Readable::read(reader)?,
			fee_msat: Readable::read(reader)?,
			cltv_expiry_delta: Readable::read(reader)?,
		})
	}
}

/// A route directs a payment from the sender (us) to the recipient over a single path.
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct Route {
	/// The node the route starts from. It is not included in `hops`.
	pub source: NodeId,
	/// The hops of the path, NOT INCLUDING `source`, where the last hop is the destination. Thus,
	/// this must always be at least length one.
	pub hops: Vec<RouteHop>,
}

impl Route {
	/// Returns the total amount of fees paid on this [`Route`].
	///
	/// This doesn't include any extra payment made to the recipient, which can happen in excess of
	/// the requested amount to meet an `htlc_minimum_msat`.
	pub fn total_fees(&self) -> u64 {
		// Do not count last hop since that's the full value of the payment
		self.hops.split_last().map(|(_, path_prefix)| path_prefix).unwrap_or(&[])
			.iter().map(|hop| hop.fee_msat)
			.sum()
	}

	/// The amount delivered to the destination.
	pub fn final_value_msat(&self) -> u64 {
		self.hops.last().map_or(0, |hop| hop.fee_msat)
	}

	/// The amount leaving the source, i.e. the final value plus all fees.
	pub fn total_amount(&self) -> u64 {
		self.amount_into_hop(0)
	}

	/// The amount which has to arrive at `hops[hop_idx]`, i.e. the amount carried by the channel
	/// leading to it.
	pub fn amount_into_hop(&self, hop_idx: usize) -> u64 {
		self.hops.get(hop_idx..).unwrap_or(&[]).iter().map(|hop| hop.fee_msat).sum()
	}

	/// The total time lock of the route: every hop's CLTV delta plus the destination's final delta.
	pub fn total_cltv_expiry_delta(&self) -> u32 {
		self.hops.iter().map(|hop| hop.cltv_expiry_delta).sum()
	}

	/// The node pairs this route forwards over, in order, starting with `source`.
	pub fn pairs(&self) -> impl Iterator<Item = DirectedPair> + '_ {
		core::iter::once(self.source).chain(self.hops.iter().map(|hop| hop.node_id))
			.zip(self.hops.iter())
			.map(|(from, hop)| DirectedPair::new(from, hop.node_id))
	}
}

const SERIALIZATION_VERSION: u8 = 1;
const MIN_SERIALIZATION_VERSION: u8 = 1;

impl Writeable for Route {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), io::Error> {
		write_ver_prefix!(writer, SERIALIZATION_VERSION, MIN_SERIALIZATION_VERSION);
		self.source.write(writer)?;
		self.hops.write(writer)
	}
}

impl Readable for Route {
	fn read<R: io::Read>(reader: &mut R) -> Result<Route, DecodeError> {
		let _ver = read_ver_prefix!(reader, SERIALIZATION_VERSION);
		let source = Readable::read(reader)?;
		let hops: Vec<RouteHop> = Readable::read(reader)?;
		if hops.is_empty() {
			return Err(DecodeError::InvalidValue);
		}
		Ok(Route { source, hops })
	}
}

/// Parameters needed to find a [`Route`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RouteParameters {
	/// The node the payment is destined for.
	pub payee: NodeId,
	/// The amount in msats sent on the path (without fees).
	pub final_value_msat: u64,
	/// The CLTV expiry delta the payee requires.
	pub final_cltv_expiry_delta: u32,
	/// The maximum total fees, in millisatoshi, that may accrue during route finding. No limit
	/// if `None`.
	pub max_total_routing_fee_msat: Option<u64>,
	/// The maximum total CLTV delta we accept for the route, including the payee's.
	///
	/// Default value: [`DEFAULT_MAX_TOTAL_CLTV_EXPIRY_DELTA`]
	pub max_total_cltv_expiry_delta: u32,
	/// If set, the route must start with this channel of ours.
	pub first_hop: Option<u64>,
	/// Channels the route must not use, for example ones which failed a previous attempt.
	pub excluded_channels: Vec<u64>,
}

impl RouteParameters {
	/// Constructs [`RouteParameters`] with no fee limit, no fixed first hop and no exclusions.
	pub fn from_payee_and_amount(payee: NodeId, final_value_msat: u64, final_cltv_expiry_delta: u32) -> Self {
		Self {
			payee,
			final_value_msat,
			final_cltv_expiry_delta,
			max_total_routing_fee_msat: None,
			max_total_cltv_expiry_delta: DEFAULT_MAX_TOTAL_CLTV_EXPIRY_DELTA,
			first_hop: None,
			excluded_channels: Vec::new(),
		}
	}
}

/// One way of reaching the payee from a node, as known so far.
#[derive(Clone, Copy, Debug)]
struct PathBuildingHop {
	/// The amount which has to be delivered to this node.
	amount_msat: u64,
	/// Fees charged by this node and every node after it.
	total_fee_msat: u64,
	/// CLTV deltas added by this node and every node after it, excluding the payee's.
	total_cltv_delta: u32,
	hop_count: u8,
	/// Fees plus probability penalties from this node to the payee.
	weight: u64,
	/// The channel this node forwards over, its fee and the index of the downstream node's
	/// [`PathBuildingHop`]. `None` for the payee.
	next_hop: Option<(DirectedChannel, u64, usize)>,
}

impl PathBuildingHop {
	/// Whether `self` is at least as good as `other` on every limited quantity, in which case
	/// `other` can never lead to a better route.
	fn dominates(&self, other: &PathBuildingHop) -> bool {
		self.weight <= other.weight && self.total_fee_msat <= other.total_fee_msat
			&& self.total_cltv_delta <= other.total_cltv_delta && self.hop_count <= other.hop_count
	}
}

#[derive(Eq, PartialEq)]
struct RouteGraphNode {
	node_id: NodeId,
	/// Index of the [`PathBuildingHop`] this entry was queued for.
	hop_idx: usize,
	weight: u64,
	total_cltv_delta: u32,
	hop_count: u8,
}

impl cmp::Ord for RouteGraphNode {
	fn cmp(&self, other: &RouteGraphNode) -> cmp::Ordering {
		// BinaryHeap is a max-heap, so compare the other way around to pop the cheapest first.
		(other.weight, other.total_cltv_delta, other.hop_count)
			.cmp(&(self.weight, self.total_cltv_delta, self.hop_count))
			.then_with(|| other.node_id.cmp(&self.node_id))
			.then_with(|| other.hop_idx.cmp(&self.hop_idx))
	}
}

impl cmp::PartialOrd for RouteGraphNode {
	fn partial_cmp(&self, other: &RouteGraphNode) -> Option<cmp::Ordering> {
		Some(self.cmp(other))
	}
}

/// The penalty, in msat, for an edge which succeeds with the given probability.
fn probability_penalty_msat(attempt_penalty_msat: u64, success_probability: f64) -> u64 {
	let penalty = attempt_penalty_msat as f64 * (1.0 - success_probability) / success_probability;
	if penalty >= u64::max_value() as f64 { u64::max_value() } else { penalty as u64 }
}

pub(crate) fn check_amount(final_value_msat: u64) -> Result<(), APIError> {
	if final_value_msat > MAX_VALUE_MSAT {
		return Err(APIError::InvalidRequest { err: "Cannot generate a route of more value than all existing satoshis".to_owned() });
	}
	if final_value_msat == 0 {
		return Err(APIError::InvalidRequest { err: "Cannot send a payment of 0 msat".to_owned() });
	}
	Ok(())
}

/// Finds a route from us (payer) to the given target node (payee).
///
/// The returned route is the cheapest one found by weight, which is the sum of routing fees plus
/// a penalty of `config.attempt_penalty_msat * (1 - p) / p` for every channel with success
/// probability `p`. Channels whose success probability is below `config.min_probability` are not
/// considered. Ties are broken by lower total time lock, then by fewer hops.
///
/// Every constraint of `params` holds for the returned route: fee and time lock limits, the
/// required first hop and the excluded channels. Every channel can carry the amount it is asked
/// to forward and the path has at most `config.max_path_length` hops.
pub fn find_route<G: Deref, S: ProbabilitySource + ?Sized, L: Deref>(
	our_node_id: &NodeId, params: &RouteParameters, graph: G, probabilities: &S,
	config: &RouterConfig, logger: L
) -> Result<Route, APIError>
where G::Target: ChannelGraph, L::Target: Logger {
	let payee = params.payee;
	if payee == *our_node_id {
		return Err(APIError::InvalidRequest { err: "Cannot generate a route to ourselves".to_owned() });
	}
	check_amount(params.final_value_msat)?;
	if let Some(first_hop) = params.first_hop {
		if !graph.outbound_channels(our_node_id).iter().any(|chan| chan.short_channel_id == first_hop) {
			return Err(APIError::InvalidRequest { err: format!("First hop {} is not one of our channels", first_hop) });
		}
	}
	if params.final_cltv_expiry_delta > params.max_total_cltv_expiry_delta {
		return Err(APIError::InvalidRequest { err: format!(
			"Final CLTV delta {} exceeds the limit of {}", params.final_cltv_expiry_delta, params.max_total_cltv_expiry_delta) });
	}

	// A node may be reachable in several ways where neither is better on weight, fees, time lock
	// and length at once. A costlier way can be the only one fitting the limits further upstream,
	// so every such way is kept. `live` holds the ones no other way to the same node dominates.
	let mut hops: Vec<PathBuildingHop> = Vec::new();
	let mut live: HashMap<NodeId, Vec<usize>> = new_hash_map();
	let mut targets: BinaryHeap<RouteGraphNode> = BinaryHeap::new();

	hops.push(PathBuildingHop {
		amount_msat: params.final_value_msat,
		total_fee_msat: 0,
		total_cltv_delta: 0,
		hop_count: 0,
		weight: 0,
		next_hop: None,
	});
	live.insert(payee, vec![0]);
	targets.push(RouteGraphNode { node_id: payee, hop_idx: 0, weight: 0, total_cltv_delta: 0, hop_count: 0 });

	let mut found = None;
	while let Some(RouteGraphNode { node_id, hop_idx, .. }) = targets.pop() {
		if !live.get(&node_id).map_or(false, |idxs| idxs.contains(&hop_idx)) {
			continue;
		}
		if node_id == *our_node_id {
			found = Some(hop_idx);
			break;
		}
		let downstream = hops[hop_idx];
		if downstream.hop_count >= config.max_path_length {
			continue;
		}
		let amount_msat = downstream.amount_msat;

		for chan in graph.inbound_channels(&node_id) {
			let source = chan.source;
			if source == payee {
				continue;
			}
			if params.excluded_channels.contains(&chan.short_channel_id) {
				continue;
			}
			let from_us = source == *our_node_id;
			if from_us && params.first_hop.map_or(false, |scid| scid != chan.short_channel_id) {
				continue;
			}
			if !chan.can_carry(amount_msat) {
				continue;
			}
			let (fee_msat, cltv_delta) = if from_us {
				(0, 0)
			} else {
				match chan.policy.fees.fee_for(amount_msat) {
					Some(fee) => (fee, chan.policy.cltv_expiry_delta as u32),
					None => continue,
				}
			};
			let (total_fee_msat, forward_msat) = match (
				downstream.total_fee_msat.checked_add(fee_msat), amount_msat.checked_add(fee_msat)
			) {
				(Some(total), Some(forward)) => (total, forward),
				_ => continue,
			};
			if params.max_total_routing_fee_msat.map_or(false, |max| total_fee_msat > max) {
				continue;
			}
			let total_cltv_delta = match downstream.total_cltv_delta.checked_add(cltv_delta) {
				Some(total) => total,
				None => continue,
			};
			match total_cltv_delta.checked_add(params.final_cltv_expiry_delta) {
				Some(total) if total <= params.max_total_cltv_expiry_delta => {},
				_ => continue,
			}
			let probability = probabilities.success_probability(&source, &node_id, amount_msat);
			if probability < config.min_probability || probability <= 0.0 {
				log_gossip!(logger, "Skipping channel {} from {} with success probability {}", chan.short_channel_id, source, probability);
				continue;
			}
			let weight = downstream.weight
				.saturating_add(fee_msat)
				.saturating_add(probability_penalty_msat(config.attempt_penalty_msat, probability));
			let candidate = PathBuildingHop {
				amount_msat: forward_msat,
				total_fee_msat,
				total_cltv_delta,
				hop_count: downstream.hop_count + 1,
				weight,
				next_hop: Some((chan, fee_msat, hop_idx)),
			};
			// Going around a loop never improves anything, so this also keeps paths loop-free.
			let known = live.entry(source).or_insert_with(Vec::new);
			if known.iter().any(|idx| hops[*idx].dominates(&candidate)) {
				continue;
			}
			known.retain(|idx| !candidate.dominates(&hops[*idx]));
			known.push(hops.len());
			targets.push(RouteGraphNode {
				node_id: source, hop_idx: hops.len(), weight, total_cltv_delta, hop_count: candidate.hop_count,
			});
			hops.push(candidate);
		}
	}

	let route = match found {
		Some(first_idx) => {
			let mut route_hops = Vec::with_capacity(hops[first_idx].hop_count as usize);
			let mut next_hop = hops[first_idx].next_hop;
			while let Some((chan, _, node_idx)) = next_hop {
				let node = &hops[node_idx];
				let (fee_msat, cltv_expiry_delta) = match node.next_hop {
					Some((next_chan, fee, _)) => (fee, next_chan.policy.cltv_expiry_delta as u32),
					None => (params.final_value_msat, params.final_cltv_expiry_delta),
				};
				route_hops.push(RouteHop { node_id: chan.target, short_channel_id: chan.short_channel_id, fee_msat, cltv_expiry_delta });
				next_hop = node.next_hop;
			}
			Route { source: *our_node_id, hops: route_hops }
		},
		None => {
			log_debug!(logger, "Failed to find a path to {} for {} msat", payee, params.final_value_msat);
			return Err(APIError::NoRouteFound { err: "Failed to find a path to the given destination".to_owned() });
		},
	};

	log_info!(logger, "Got route: {}", log_route!(route));
	Ok(route)
}

/// The fee and time lock a payment to some node is expected to need.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RouteFeeEstimate {
	/// The routing fees of the best route found, in msat.
	pub routing_fee_msat: u64,
	/// The total time lock of the best route found, including the payee's final CLTV delta.
	pub time_lock_delay: u32,
}

/// Estimates the routing fee and time lock of a payment by finding a route for it, without
/// sending anything.
pub fn estimate_route_fee<G: Deref, S: ProbabilitySource + ?Sized, L: Deref>(
	our_node_id: &NodeId, params: &RouteParameters, graph: G, probabilities: &S,
	config: &RouterConfig, logger: L
) -> Result<RouteFeeEstimate, APIError>
where G::Target: ChannelGraph, L::Target: Logger {
	let route = find_route(our_node_id, params, graph, probabilities, config, logger)?;
	Ok(RouteFeeEstimate {
		routing_fee_msat: route.total_fees(),
		time_lock_delay: route.total_cltv_expiry_delta(),
	})
}

/// Orders the channels between two nodes for [`build_route`]: the most expensive first, then the
/// one with the largest CLTV delta, then the lowest short channel id.
fn build_route_preference(chan: &DirectedChannel, fee_msat: u64) -> (u64, u16, cmp::Reverse<u64>) {
	(fee_msat, chan.policy.cltv_expiry_delta, cmp::Reverse(chan.short_channel_id))
}

/// Builds a [`Route`] over the given sequence of nodes, starting at our node.
///
/// Between each pair of consecutive nodes the usable channel charging the highest fee is picked,
/// so that the route works whichever of the parallel channels the forwarding node actually uses.
/// If `amount_msat` is `None`, the smallest amount all picked channels accept is used.
pub fn build_route<G: Deref, L: Deref>(
	our_node_id: &NodeId, hops: &[NodeId], amount_msat: Option<u64>, final_cltv_expiry_delta: u32,
	first_hop: Option<u64>, graph: G, config: &RouterConfig, logger: L
) -> Result<Route, APIError>
where G::Target: ChannelGraph, L::Target: Logger {
	if hops.is_empty() {
		return Err(APIError::InvalidRequest { err: "Route must contain at least one hop".to_owned() });
	}
	if hops.contains(our_node_id) {
		return Err(APIError::InvalidRequest { err: "Route must not contain our own node".to_owned() });
	}
	if hops.len() > config.max_path_length as usize {
		return Err(APIError::InvalidRequest { err: format!(
			"Route of {} hops exceeds the maximum path length of {}", hops.len(), config.max_path_length) });
	}
	if let Some(amount) = amount_msat {
		check_amount(amount)?;
	}

	let mut candidates: Vec<Vec<DirectedChannel>> = Vec::with_capacity(hops.len());
	let mut from = *our_node_id;
	for (idx, to) in hops.iter().enumerate() {
		let channels: Vec<DirectedChannel> = graph.outbound_channels(&from).into_iter()
			.filter(|chan| chan.target == *to && chan.policy.enabled)
			.filter(|chan| idx != 0 || first_hop.map_or(true, |scid| scid == chan.short_channel_id))
			.collect();
		if channels.is_empty() {
			log_debug!(logger, "No channel from {} to {} to build a route over", from, to);
			return Err(APIError::NoRouteFound { err: format!("No channel from {} to {}", from, to) });
		}
		candidates.push(channels);
		from = *to;
	}

	let final_value_msat = match amount_msat {
		Some(amount) => amount,
		None => candidates.iter().filter_map(|channels| {
			channels.iter()
				.max_by_key(|chan| build_route_preference(chan, chan.policy.fees.base_msat as u64))
				.map(|chan| chan.policy.htlc_minimum_msat)
		}).max().unwrap_or(1).max(1),
	};

	// Walk backwards so each channel's fee is computed on the amount it forwards.
	let mut chosen: Vec<(DirectedChannel, u64)> = Vec::with_capacity(hops.len());
	let mut amount = final_value_msat;
	for (idx, channels) in candidates.iter().enumerate().rev() {
		let from_us = idx == 0;
		let best = channels.iter()
			.filter(|chan| chan.can_carry(amount))
			.filter_map(|chan| {
				let fee = if from_us { Some(0) } else { chan.policy.fees.fee_for(amount) };
				fee.map(|fee| (chan, fee))
			})
			.max_by_key(|(chan, fee)| build_route_preference(chan, *fee));
		let (chan, fee) = match best {
			Some(best) => best,
			None => {
				return Err(APIError::NoRouteFound { err: format!(
					"No channel to {} can carry {} msat", hops[idx], amount) });
			},
		};
		chosen.push((*chan, fee));
		amount = match amount.checked_add(fee) {
			Some(amount) => amount,
			None => return Err(APIError::InvalidRequest { err: "Route fees overflow".to_owned() }),
		};
	}
	chosen.reverse();

	let route_hops = chosen.iter().enumerate().map(|(idx, (chan, _))| {
		let (fee_msat, cltv_expiry_delta) = match chosen.get(idx + 1) {
			Some((next_chan, fee)) => (*fee, next_chan.policy.cltv_expiry_delta as u32),
			None => (final_value_msat, final_cltv_expiry_delta),
		};
		RouteHop { node_id: chan.target, short_channel_id: chan.short_channel_id, fee_msat, cltv_expiry_delta }
	}).collect();
	let route = Route { source: *our_node_id, hops: route_hops };
	log_info!(logger, "Built route: {}", log_route!(route));
	Ok(route)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::routing::gossip::{ChannelPolicy, NetworkGraph};
	use crate::routing::mission_control::MissionControlUsingTime;
	use crate::routing::test_utils::{add_channel, build_diamond_graph, node_id, policy};
	use crate::util::config::MissionControlConfig;
	use crate::util::test_utils::TestLogger;
	use crate::util::time::tests::SinceEpoch;

	struct UniformProbability(f64);
	impl ProbabilitySource for UniformProbability {
		fn success_probability(&self, _from: &NodeId, _to: &NodeId, _amount_msat: u64) -> f64 {
			self.0
		}
	}

	fn scids(route: &Route) -> Vec<u64> {
		route.hops.iter().map(|hop| hop.short_channel_id).collect()
	}

	fn unwrap_err_msg(res: Result<Route, APIError>) -> String {
		match res {
			Err(APIError::InvalidRequest { err }) | Err(APIError::NoRouteFound { err }) => err,
			other => panic!("Unexpected result {:?}", other),
		}
	}

	#[test]
	fn simple_route_test() {
		let logger = TestLogger::new();
		let graph = NetworkGraph::new(&logger);
		let [us, x, y, _a, _b, d] = build_diamond_graph(&graph);
		let config = RouterConfig::default();
		let probabilities = UniformProbability(1.0);

		// Only the upper path is usable.
		let mut params = RouteParameters::from_payee_and_amount(d, 100, 42);
		params.excluded_channels = vec![4];
		let route = find_route(&us, &params, &graph, &probabilities, &config, &logger).unwrap();
		assert_eq!(route.source, us);
		assert_eq!(route.hops, vec![
			RouteHop { node_id: x, short_channel_id: 1, fee_msat: 10, cltv_expiry_delta: 40 },
			RouteHop { node_id: y, short_channel_id: 2, fee_msat: 10, cltv_expiry_delta: 40 },
			RouteHop { node_id: d, short_channel_id: 3, fee_msat: 100, cltv_expiry_delta: 42 },
		]);
		assert_eq!(route.total_fees(), 20);
		assert_eq!(route.total_amount(), 120);
		assert_eq!(route.final_value_msat(), 100);
		assert_eq!(route.total_cltv_expiry_delta(), 122);
		assert_eq!(route.amount_into_hop(1), 110);
		assert_eq!(route.pairs().collect::<Vec<_>>(), vec![
			DirectedPair::new(us, x), DirectedPair::new(x, y), DirectedPair::new(y, d),
		]);
		logger.assert_log_contains("lightning_router::routing::router", "Got route: 3 hop route from", 1);
	}

	#[test]
	fn avoids_recently_failed_pair() {
		let logger = TestLogger::new();
		let graph = NetworkGraph::new(&logger);
		let [us, x, y, a, b, d] = build_diamond_graph(&graph);
		let config = RouterConfig::default();
		let mission_control = MissionControlUsingTime::<_, SinceEpoch>::new(MissionControlConfig::default(), &logger);
		let params = RouteParameters::from_payee_and_amount(d, 1_000, 40);

		// Both paths cost the same, so the search is free to pick either one.
		let route = find_route(&us, &params, &graph, &mission_control, &config, &logger).unwrap();
		assert!(scids(&route) == vec![1, 2, 3] || scids(&route) == vec![4, 5, 6]);

		mission_control.report_pair_outcome(&DirectedPair::new(x, y), 1_000, false);
		let route = find_route(&us, &params, &graph, &mission_control, &config, &logger).unwrap();
		assert_eq!(scids(&route), vec![4, 5, 6]);
		assert_eq!(route.hops.iter().map(|hop| hop.node_id).collect::<Vec<_>>(), vec![a, b, d]);
		assert_eq!(route.total_fees(), 20);

		// Once the lower path fails too, nothing is left.
		mission_control.report_pair_outcome(&DirectedPair::new(a, b), 1_000, false);
		let err = find_route(&us, &params, &graph, &mission_control, &config, &logger).unwrap_err();
		assert_eq!(err, APIError::NoRouteFound { err: "Failed to find a path to the given destination".to_owned() });
	}

	#[test]
	fn penalizes_unlikely_channels() {
		struct Unlikely(NodeId);
		impl ProbabilitySource for Unlikely {
			fn success_probability(&self, from: &NodeId, _to: &NodeId, _amount_msat: u64) -> f64 {
				if *from == self.0 { 0.1 } else { 0.9 }
			}
		}
		let logger = TestLogger::new();
		let graph = NetworkGraph::new(&logger);
		let [us, x, _y, a, _b, d] = build_diamond_graph(&graph);
		// The upper path is cheaper, but X is unlikely to forward.
		graph.update_channel_policy(5, &a, policy(500, 0, 40)).unwrap();
		let config = RouterConfig::default();
		let params = RouteParameters::from_payee_and_amount(d, 1_000, 40);

		let route = find_route(&us, &params, &graph, &UniformProbability(1.0), &config, &logger).unwrap();
		assert_eq!(scids(&route), vec![1, 2, 3]);
		let route = find_route(&us, &params, &graph, &Unlikely(x), &config, &logger).unwrap();
		assert_eq!(scids(&route), vec![4, 5, 6]);

		// Without an attempt penalty only fees count.
		let config = RouterConfig { attempt_penalty_msat: 0, ..Default::default() };
		let route = find_route(&us, &params, &graph, &Unlikely(x), &config, &logger).unwrap();
		assert_eq!(scids(&route), vec![1, 2, 3]);
	}

	#[test]
	fn honors_limits() {
		let logger = TestLogger::new();
		let graph = NetworkGraph::new(&logger);
		let [us, _x, y, _a, _b, d] = build_diamond_graph(&graph);
		graph.update_channel_policy(6, &node_id(5), policy(5, 0, 144)).unwrap();
		let config = RouterConfig::default();
		let probabilities = UniformProbability(1.0);

		// The lower path is cheaper but has the longer time lock.
		let mut params = RouteParameters::from_payee_and_amount(d, 1_000, 40);
		let route = find_route(&us, &params, &graph, &probabilities, &config, &logger).unwrap();
		assert_eq!(scids(&route), vec![4, 5, 6]);
		assert_eq!(route.total_fees(), 15);

		params.max_total_cltv_expiry_delta = 200;
		let route = find_route(&us, &params, &graph, &probabilities, &config, &logger).unwrap();
		assert_eq!(scids(&route), vec![1, 2, 3]);
		assert!(route.total_cltv_expiry_delta() <= 200);

		params.max_total_routing_fee_msat = Some(19);
		unwrap_err_msg(find_route(&us, &params, &graph, &probabilities, &config, &logger));

		params.max_total_routing_fee_msat = Some(20);
		params.first_hop = Some(4);
		assert!(find_route(&us, &params, &graph, &probabilities, &config, &logger).is_err());
		params.max_total_cltv_expiry_delta = DEFAULT_MAX_TOTAL_CLTV_EXPIRY_DELTA;
		let route = find_route(&us, &params, &graph, &probabilities, &config, &logger).unwrap();
		assert_eq!(scids(&route), vec![4, 5, 6]);

		let short = RouterConfig { max_path_length: 2, ..Default::default() };
		let params = RouteParameters::from_payee_and_amount(d, 1_000, 40);
		assert!(find_route(&us, &params, &graph, &probabilities, &short, &logger).is_err());
		let params = RouteParameters::from_payee_and_amount(y, 1_000, 40);
		assert_eq!(scids(&find_route(&us, &params, &graph, &probabilities, &short, &logger).unwrap()), vec![1, 2]);
	}

	#[test]
	fn keeps_slower_cheaper_alternatives_within_time_lock_limit() {
		// us -- A -- N -------- D
		//             \        /
		//              B -----
		// N reaches D cheaply but slowly, or through B quickly at a higher fee. Only the latter
		// keeps the whole route within the time lock limit.
		let logger = TestLogger::new();
		let graph = NetworkGraph::new(&logger);
		let (us, a, n, b, d) = (node_id(1), node_id(2), node_id(3), node_id(4), node_id(5));
		add_channel(&graph, 1, &us, &a, policy(10, 0, 40));
		add_channel(&graph, 2, &a, &n, policy(10, 0, 40));
		add_channel(&graph, 3, &n, &d, policy(1, 0, 100));
		add_channel(&graph, 4, &n, &b, policy(10, 0, 5));
		add_channel(&graph, 5, &b, &d, policy(10, 0, 5));
		let config = RouterConfig::default();
		let probabilities = UniformProbability(1.0);

		let mut params = RouteParameters::from_payee_and_amount(d, 1_000, 40);
		let route = find_route(&us, &params, &graph, &probabilities, &config, &logger).unwrap();
		assert_eq!(scids(&route), vec![1, 2, 3]);
		assert_eq!(route.total_cltv_expiry_delta(), 180);

		params.max_total_cltv_expiry_delta = 150;
		let route = find_route(&us, &params, &graph, &probabilities, &config, &logger).unwrap();
		assert_eq!(scids(&route), vec![1, 2, 4, 5]);
		assert_eq!(route.total_cltv_expiry_delta(), 90);
		assert_eq!(route, build_route(&us, &[a, n, b, d], Some(1_000), 40, None, &graph, &config, &logger).unwrap());

		// The same holds for the fee limit: N -- D is now the cheaper hop but unlikely to succeed,
		// so the search prefers going through B unless that breaks the fee limit.
		struct UnlikelyPair(NodeId, NodeId);
		impl ProbabilitySource for UnlikelyPair {
			fn success_probability(&self, from: &NodeId, to: &NodeId, _amount_msat: u64) -> f64 {
				if (*from, *to) == (self.0, self.1) { 0.5 } else { 1.0 }
			}
		}
		graph.update_channel_policy(3, &n, policy(30, 0, 40)).unwrap();
		graph.update_channel_policy(4, &n, policy(20, 0, 5)).unwrap();
		graph.update_channel_policy(5, &b, policy(20, 0, 5)).unwrap();
		let unlikely = UnlikelyPair(n, d);
		let mut params = RouteParameters::from_payee_and_amount(d, 1_000, 40);
		let route = find_route(&us, &params, &graph, &unlikely, &config, &logger).unwrap();
		assert_eq!(scids(&route), vec![1, 2, 4, 5]);
		assert_eq!(route.total_fees(), 50);

		params.max_total_routing_fee_msat = Some(45);
		let route = find_route(&us, &params, &graph, &unlikely, &config, &logger).unwrap();
		assert_eq!(scids(&route), vec![1, 2, 3]);
		assert_eq!(route.total_fees(), 40);
		params.max_total_routing_fee_msat = Some(39);
		assert!(matches!(find_route(&us, &params, &graph, &unlikely, &config, &logger),
			Err(APIError::NoRouteFound { .. })));
	}

	#[test]
	fn time_lock_sums_near_the_maximum_do_not_overflow() {
		let logger = TestLogger::new();
		let graph = NetworkGraph::new(&logger);
		let [us, x, _y, _a, _b, d] = build_diamond_graph(&graph);
		let config = RouterConfig::default();
		let probabilities = UniformProbability(1.0);

		let mut params = RouteParameters::from_payee_and_amount(d, 1_000, u32::max_value() - 10);
		params.max_total_cltv_expiry_delta = u32::max_value();
		assert!(matches!(find_route(&us, &params, &graph, &probabilities, &config, &logger),
			Err(APIError::NoRouteFound { .. })));

		// Our own channel adds no delta, so a direct peer is still reachable.
		params.payee = x;
		let route = find_route(&us, &params, &graph, &probabilities, &config, &logger).unwrap();
		assert_eq!(scids(&route), vec![1]);
		assert_eq!(route.total_cltv_expiry_delta(), u32::max_value() - 10);
	}

	#[test]
	fn respects_htlc_limits_and_disabled_channels() {
		let logger = TestLogger::new();
		let graph = NetworkGraph::new(&logger);
		let [us, x, _y, a, b, d] = build_diamond_graph(&graph);
		let config = RouterConfig::default();
		let probabilities = UniformProbability(1.0);
		let capped = ChannelPolicy { htlc_maximum_msat: Some(5_000), ..policy(10, 0, 40) };
		graph.update_channel_policy(2, &x, capped).unwrap();
		graph.update_channel_policy(5, &a, ChannelPolicy { enabled: false, ..policy(10, 0, 40) }).unwrap();

		let params = RouteParameters::from_payee_and_amount(d, 4_000, 40);
		assert_eq!(scids(&find_route(&us, &params, &graph, &probabilities, &config, &logger).unwrap()), vec![1, 2, 3]);
		let params = RouteParameters::from_payee_and_amount(d, 6_000, 40);
		assert!(find_route(&us, &params, &graph, &probabilities, &config, &logger).is_err());

		graph.update_channel_policy(5, &a, policy(10, 0, 40)).unwrap();
		graph.update_channel_policy(6, &b, ChannelPolicy { htlc_minimum_msat: 10_000, ..policy(10, 0, 40) }).unwrap();
		assert!(find_route(&us, &params, &graph, &probabilities, &config, &logger).is_err());
		let params = RouteParameters::from_payee_and_amount(d, 10_000, 40);
		assert_eq!(scids(&find_route(&us, &params, &graph, &probabilities, &config, &logger).unwrap()), vec![4, 5, 6]);
	}

	#[test]
	fn rejects_bad_parameters() {
		let logger = TestLogger::new();
		let graph = NetworkGraph::new(&logger);
		let [us, _x, _y, _a, _b, d] = build_diamond_graph(&graph);
		let config = RouterConfig::default();
		let probabilities = UniformProbability(1.0);

		let params = RouteParameters::from_payee_and_amount(us, 1_000, 40);
		assert_eq!(unwrap_err_msg(find_route(&us, &params, &graph, &probabilities, &config, &logger)),
			"Cannot generate a route to ourselves");
		let params = RouteParameters::from_payee_and_amount(d, 0, 40);
		assert_eq!(unwrap_err_msg(find_route(&us, &params, &graph, &probabilities, &config, &logger)),
			"Cannot send a payment of 0 msat");
		let params = RouteParameters::from_payee_and_amount(d, MAX_VALUE_MSAT + 1, 40);
		assert_eq!(unwrap_err_msg(find_route(&us, &params, &graph, &probabilities, &config, &logger)),
			"Cannot generate a route of more value than all existing satoshis");
		let mut params = RouteParameters::from_payee_and_amount(d, 1_000, 40);
		params.first_hop = Some(2);
		match find_route(&us, &params, &graph, &probabilities, &config, &logger) {
			Err(APIError::InvalidRequest { .. }) => {},
			other => panic!("Unexpected result {:?}", other),
		}
		let params = RouteParameters::from_payee_and_amount(node_id(42), 1_000, 40);
		match find_route(&us, &params, &graph, &probabilities, &config, &logger) {
			Err(APIError::NoRouteFound { .. }) => {},
			other => panic!("Unexpected result {:?}", other),
		}
		logger.assert_log_contains("lightning_router::routing::router", "Failed to find a path to", 1);
	}

	#[test]
	fn build_route_totals() {
		let logger = TestLogger::new();
		let graph = NetworkGraph::new(&logger);
		let (us, x, y, d) = (node_id(1), node_id(2), node_id(3), node_id(4));
		add_channel(&graph, 1, &us, &x, policy(1_000, 0, 10));
		add_channel(&graph, 2, &x, &y, policy(100, 1_000, 30));
		// A cheaper parallel channel the route must not rely on.
		add_channel(&graph, 7, &x, &y, policy(10, 0, 30));
		add_channel(&graph, 3, &y, &d, policy(50, 0, 20));
		let config = RouterConfig::default();

		let route = build_route(&us, &[x, y, d], Some(1_000_000), 40, None, &graph, &config, &logger).unwrap();
		assert_eq!(route.hops, vec![
			RouteHop { node_id: x, short_channel_id: 1, fee_msat: 1_100, cltv_expiry_delta: 30 },
			RouteHop { node_id: y, short_channel_id: 2, fee_msat: 50, cltv_expiry_delta: 20 },
			RouteHop { node_id: d, short_channel_id: 3, fee_msat: 1_000_000, cltv_expiry_delta: 40 },
		]);
		// Fees of every forwarding hop, time locks of every hop plus the final delta.
		assert_eq!(route.total_fees(), 1_100 + 50);
		assert_eq!(route.total_cltv_expiry_delta(), 30 + 20 + 40);
		assert_eq!(route.total_amount(), 1_001_150);

		// Route search is free to use the cheaper parallel channel.
		let params = RouteParameters::from_payee_and_amount(d, 1_000_000, 40);
		let estimate = estimate_route_fee(&us, &params, &graph, &UniformProbability(1.0), &config, &logger).unwrap();
		assert_eq!(estimate, RouteFeeEstimate { routing_fee_msat: 10 + 50, time_lock_delay: 90 });
	}

	#[test]
	fn build_route_default_amount_and_errors() {
		let logger = TestLogger::new();
		let graph = NetworkGraph::new(&logger);
		let [us, x, y, a, _b, d] = build_diamond_graph(&graph);
		graph.update_channel_policy(2, &x, ChannelPolicy { htlc_minimum_msat: 2_500, ..policy(10, 0, 40) }).unwrap();
		let config = RouterConfig::default();

		let route = build_route(&us, &[x, y, d], None, 40, None, &graph, &config, &logger).unwrap();
		assert_eq!(route.final_value_msat(), 2_500);
		assert_eq!(route.amount_into_hop(1), 2_510);

		let route = build_route(&us, &[x, y], Some(3_000), 40, Some(1), &graph, &config, &logger).unwrap();
		assert_eq!(scids(&route), vec![1, 2]);
		assert!(build_route(&us, &[x, y], Some(3_000), 40, Some(4), &graph, &config, &logger).is_err());
		// Too small for the channel from X to Y.
		assert!(matches!(build_route(&us, &[x, y], Some(100), 40, None, &graph, &config, &logger),
			Err(APIError::NoRouteFound { .. })));

		assert_eq!(unwrap_err_msg(build_route(&us, &[], Some(100), 40, None, &graph, &config, &logger)),
			"Route must contain at least one hop");
		assert!(matches!(build_route(&us, &[x, us], Some(100), 40, None, &graph, &config, &logger),
			Err(APIError::InvalidRequest { .. })));
		assert!(matches!(build_route(&us, &[x, a], Some(100), 40, None, &graph, &config, &logger),
			Err(APIError::NoRouteFound { .. })));
		let short = RouterConfig { max_path_length: 2, ..Default::default() };
		assert!(matches!(build_route(&us, &[x, y, d], Some(100), 40, None, &graph, &short, &logger),
			Err(APIError::InvalidRequest { .. })));
	}

	#[test]
	fn route_serialization() {
		let logger = TestLogger::new();
		let graph = NetworkGraph::new(&logger);
		let [us, x, y, _a, _b, d] = build_diamond_graph(&graph);
		let route = build_route(&us, &[x, y, d], Some(5_000), 40, None, &graph, &RouterConfig::default(), &logger).unwrap();
		let encoded = route.encode();
		assert_eq!(Route::read(&mut io::Cursor::new(&encoded)).unwrap(), route);
		assert_eq!(Route::read(&mut io::Cursor::new(&encoded[..encoded.len() - 1])), Err(DecodeError::ShortRead));
	}
}
