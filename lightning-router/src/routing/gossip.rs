// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! The [`NetworkGraph`] stores the network gossip and [`ChannelGraph`] is how route search reads
//! it. Both directions of a channel carry their own [`ChannelPolicy`].

use bitcoin::secp256k1;
use bitcoin::secp256k1::constants::PUBLIC_KEY_SIZE;
use bitcoin::secp256k1::PublicKey;

use crate::prelude::*;
use crate::sync::RwLock;
use crate::util::errors::APIError;
use crate::util::logger::Logger;
use crate::util::ser::{DecodeError, Readable, Writeable, Writer};

use core::{cmp, fmt};
use core::ops::Deref;
use std::io;

/// Represents the compressed public key of a node
#[derive(Clone, Copy)]
pub struct NodeId([u8; PUBLIC_KEY_SIZE]);

impl NodeId {
	/// Create a new NodeId from a public key
	pub fn from_pubkey(pubkey: &PublicKey) -> Self {
		NodeId(pubkey.serialize())
	}

	/// Create a new NodeId from a slice of bytes, failing unless exactly 33 bytes are given.
	pub fn from_slice(bytes: &[u8]) -> Result<Self, DecodeError> {
		if bytes.len() != PUBLIC_KEY_SIZE {
			return Err(DecodeError::InvalidValue);
		}
		let mut data = [0; PUBLIC_KEY_SIZE];
		data.copy_from_slice(bytes);
		Ok(NodeId(data))
	}

	/// Get the public key slice from this NodeId
	pub fn as_slice(&self) -> &[u8] {
		&self.0
	}

	/// Get the public key from this NodeId
	pub fn as_pubkey(&self) -> Result<PublicKey, secp256k1::Error> {
		PublicKey::from_slice(&self.0)
	}
}

impl fmt::Debug for NodeId {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f, "NodeId({})", log_bytes!(self.0))
	}
}
impl fmt::Display for NodeId {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f, "{}", log_bytes!(self.0))
	}
}

impl core::hash::Hash for NodeId {
	fn hash<H: core::hash::Hasher>(&self, hasher: &mut H) {
		self.0.hash(hasher);
	}
}

impl Eq for NodeId {}

impl PartialEq for NodeId {
	fn eq(&self, other: &Self) -> bool {
		self.0[..] == other.0[..]
	}
}

impl cmp::PartialOrd for NodeId {
	fn partial_cmp(&self, other: &Self) -> Option<cmp::Ordering> {
		Some(self.cmp(other))
	}
}

impl Ord for NodeId {
	fn cmp(&self, other: &Self) -> cmp::Ordering {
		self.0[..].cmp(&other.0[..])
	}
}

impl Writeable for NodeId {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), io::Error> {
		writer.write_all(&self.0)?;
		Ok(())
	}
}

impl Readable for NodeId {
	fn read<R: io::Read>(reader: &mut R) -> Result<Self, DecodeError> {
		let mut buf = [0; PUBLIC_KEY_SIZE];
		reader.read_exact(&mut buf)?;
		Ok(Self(buf))
	}
}

/// Fees for routing via a given channel
#[derive(Eq, PartialEq, Copy, Clone, Debug, Hash, Default)]
pub struct RoutingFees {
	/// Flat routing fee in millisatoshis.
	pub base_msat: u32,
	/// Liquidity-based routing fee in millionths of a routed amount.
	/// In other words, 10000 is 1%.
	pub proportional_millionths: u32,
}

impl RoutingFees {
	/// The fee charged for forwarding `amount_msat`, or `None` on overflow.
	pub fn fee_for(&self, amount_msat: u64) -> Option<u64> {
		let proportional_fee_millions =
			amount_msat.checked_mul(self.proportional_millionths as u64)?;
		(self.base_msat as u64).checked_add(proportional_fee_millions / 1_000_000)
	}
}

/// The forwarding policy one end of a channel applies to HTLCs it sends over the channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChannelPolicy {
	/// Whether the channel can be currently used for payments (in this one direction).
	pub enabled: bool,
	/// Fees charged when the channel is used for routing
	pub fees: RoutingFees,
	/// The difference in CLTV values that you must have when routing through this channel.
	pub cltv_expiry_delta: u16,
	/// The minimum value, which must be relayed to the next hop via the channel
	pub htlc_minimum_msat: u64,
	/// The maximum value which may be relayed to the next hop via the channel, if announced.
	pub htlc_maximum_msat: Option<u64>,
}

impl fmt::Display for ChannelPolicy {
	fn fmt(&self, f: &mut fmt::Formatter) -> Result<(), fmt::Error> {
		write!(f, "enabled {}, cltv_expiry_delta {}, htlc_minimum_msat {}, fees {:?}", self.enabled, self.cltv_expiry_delta, self.htlc_minimum_msat, self.fees)
	}
}

/// One direction of a channel as seen by route search: the channel from `source` to `target`
/// together with the policy `source` applies when forwarding over it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DirectedChannel {
	/// The short channel id of the channel
	pub short_channel_id: u64,
	/// The node sending HTLCs over the channel in this direction
	pub source: NodeId,
	/// The node receiving HTLCs over the channel in this direction
	pub target: NodeId,
	/// The policy `source` applies
	pub policy: ChannelPolicy,
	/// The channel capacity, if known. No single HTLC can exceed it.
	pub capacity_msat: Option<u64>,
}

impl DirectedChannel {
	/// The largest HTLC this direction can carry, if bounded.
	pub fn max_htlc_msat(&self) -> Option<u64> {
		match (self.policy.htlc_maximum_msat, self.capacity_msat) {
			(Some(max), Some(capacity)) => Some(cmp::min(max, capacity)),
			(max, capacity) => max.or(capacity),
		}
	}

	/// Whether an HTLC of `amount_msat` may be sent over this direction.
	pub fn can_carry(&self, amount_msat: u64) -> bool {
		self.policy.enabled && amount_msat >= self.policy.htlc_minimum_msat
			&& self.max_htlc_msat().map_or(true, |max| amount_msat <= max)
	}
}

/// A read-only source of the channel graph consulted by route search.
pub trait ChannelGraph {
	/// Returns the known channels `node_id` can send over, with `node_id` as their source.
	fn outbound_channels(&self, node_id: &NodeId) -> Vec<DirectedChannel>;
	/// Returns the known channels `node_id` can receive over, with `node_id` as their target.
	fn inbound_channels(&self, node_id: &NodeId) -> Vec<DirectedChannel>;
}

impl<G: Deref> ChannelGraph for G where G::Target: ChannelGraph {
	fn outbound_channels(&self, node_id: &NodeId) -> Vec<DirectedChannel> {
		self.deref().outbound_channels(node_id)
	}
	fn inbound_channels(&self, node_id: &NodeId) -> Vec<DirectedChannel> {
		self.deref().inbound_channels(node_id)
	}
}

/// Details about a channel (both directions).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChannelInfo {
	/// Source node of the first direction of a channel
	pub node_one: NodeId,
	/// Details about the first direction of a channel
	pub one_to_two: Option<ChannelPolicy>,
	/// Source node of the second direction of a channel
	pub node_two: NodeId,
	/// Details about the second direction of a channel
	pub two_to_one: Option<ChannelPolicy>,
	/// The channel capacity, if known.
	pub capacity_msat: Option<u64>,
}

impl ChannelInfo {
	/// Returns the channel directed from `source`, if `source` is an endpoint and has announced a
	/// policy for that direction.
	fn as_directed_from(&self, short_channel_id: u64, source: &NodeId) -> Option<DirectedChannel> {
		let (policy, target) = if source == &self.node_one {
			(self.one_to_two.as_ref(), self.node_two)
		} else if source == &self.node_two {
			(self.two_to_one.as_ref(), self.node_one)
		} else {
			return None;
		};
		policy.map(|policy| DirectedChannel {
			short_channel_id, source: *source, target, policy: *policy, capacity_msat: self.capacity_msat,
		})
	}

	fn counterparty(&self, node_id: &NodeId) -> Option<NodeId> {
		if node_id == &self.node_one { Some(self.node_two) }
		else if node_id == &self.node_two { Some(self.node_one) }
		else { None }
	}
}

struct GraphState {
	channels: HashMap<u64, ChannelInfo>,
	nodes: HashMap<NodeId, Vec<u64>>,
}

/// Represents the network as nodes and channels between them
pub struct NetworkGraph<L: Deref> where L::Target: Logger {
	logger: L,
	state: RwLock<GraphState>,
}

impl<L: Deref> NetworkGraph<L> where L::Target: Logger {
	/// Creates a new, empty, network graph.
	pub fn new(logger: L) -> NetworkGraph<L> {
		Self {
			logger,
			state: RwLock::new(GraphState { channels: new_hash_map(), nodes: new_hash_map() }),
		}
	}

	/// Adds a channel between `node_one` and `node_two` without any policies. Routing over either
	/// direction becomes possible once [`Self::update_channel_policy`] is called for it.
	pub fn add_channel(&self, short_channel_id: u64, node_one: NodeId, node_two: NodeId, capacity_msat: Option<u64>) -> Result<(), APIError> {
		if node_one == node_two {
			return Err(APIError::InvalidRequest { err: "Channel announcement node had a channel with itself".to_owned() });
		}
		let mut state = self.state.write().unwrap();
		if state.channels.contains_key(&short_channel_id) {
			return Err(APIError::InvalidRequest { err: format!("Already have knowledge of channel {}", short_channel_id) });
		}
		state.channels.insert(short_channel_id, ChannelInfo {
			node_one, one_to_two: None, node_two, two_to_one: None, capacity_msat,
		});
		for node_id in [node_one, node_two].iter() {
			state.nodes.entry(*node_id).or_insert_with(Vec::new).push(short_channel_id);
		}
		log_gossip!(self.logger, "Added channel {} between {} and {}", short_channel_id, node_one, node_two);
		Ok(())
	}

	/// Sets the policy `source` applies when forwarding over the given channel.
	pub fn update_channel_policy(&self, short_channel_id: u64, source: &NodeId, policy: ChannelPolicy) -> Result<(), APIError> {
		let mut state = self.state.write().unwrap();
		let channel = match state.channels.get_mut(&short_channel_id) {
			Some(channel) => channel,
			None => return Err(APIError::InvalidRequest { err: format!("Couldn't find channel {} for update", short_channel_id) }),
		};
		let direction = if source == &channel.node_one {
			&mut channel.one_to_two
		} else if source == &channel.node_two {
			&mut channel.two_to_one
		} else {
			return Err(APIError::InvalidRequest { err: format!("Node {} is not an endpoint of channel {}", source, short_channel_id) });
		};
		log_gossip!(self.logger, "Updating policy of channel {} from {} to {}", short_channel_id, source, policy);
		*direction = Some(policy);
		Ok(())
	}

	/// Removes a channel from the graph, along with any node which has no channels left.
	pub fn remove_channel(&self, short_channel_id: u64) {
		let mut state = self.state.write().unwrap();
		if let Some(channel) = state.channels.remove(&short_channel_id) {
			for node_id in [channel.node_one, channel.node_two].iter() {
				let now_empty = match state.nodes.get_mut(node_id) {
					Some(node_channels) => {
						node_channels.retain(|scid| *scid != short_channel_id);
						node_channels.is_empty()
					},
					None => false,
				};
				if now_empty {
					state.nodes.remove(node_id);
				}
			}
			log_gossip!(self.logger, "Removed channel {}", short_channel_id);
		}
	}

	/// Returns a copy of the given channel's details.
	pub fn channel(&self, short_channel_id: u64) -> Option<ChannelInfo> {
		self.state.read().unwrap().channels.get(&short_channel_id).cloned()
	}

	/// The number of channels in the graph.
	pub fn channel_count(&self) -> usize {
		self.state.read().unwrap().channels.len()
	}
}

impl<L: Deref> ChannelGraph for NetworkGraph<L> where L::Target: Logger {
	fn outbound_channels(&self, node_id: &NodeId) -> Vec<DirectedChannel> {
		let state = self.state.read().unwrap();
		let scids = match state.nodes.get(node_id) { Some(scids) => scids, None => return Vec::new() };
		scids.iter().filter_map(|scid| {
			state.channels.get(scid).and_then(|channel| channel.as_directed_from(*scid, node_id))
		}).collect()
	}

	fn inbound_channels(&self, node_id: &NodeId) -> Vec<DirectedChannel> {
		let state = self.state.read().unwrap();
		let scids = match state.nodes.get(node_id) { Some(scids) => scids, None => return Vec::new() };
		scids.iter().filter_map(|scid| {
			let channel = state.channels.get(scid)?;
			let source = channel.counterparty(node_id)?;
			channel.as_directed_from(*scid, &source)
		}).collect()
	}
}
