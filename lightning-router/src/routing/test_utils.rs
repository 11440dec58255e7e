// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

use bitcoin::secp256k1::{PublicKey, Secp256k1, SecretKey};

use crate::routing::gossip::{ChannelPolicy, NetworkGraph, NodeId, RoutingFees};
use crate::util::logger::Logger;

use core::ops::Deref;

/// The node id derived from the secret key `[n; 32]`. `n` must not be zero.
pub(crate) fn node_id(n: u8) -> NodeId {
	let secp_ctx = Secp256k1::signing_only();
	let secret = SecretKey::from_slice(&[n; 32]).unwrap();
	NodeId::from_pubkey(&PublicKey::from_secret_key(&secp_ctx, &secret))
}

pub(crate) fn policy(base_msat: u32, proportional_millionths: u32, cltv_expiry_delta: u16) -> ChannelPolicy {
	ChannelPolicy {
		enabled: true,
		fees: RoutingFees { base_msat, proportional_millionths },
		cltv_expiry_delta,
		htlc_minimum_msat: 1,
		htlc_maximum_msat: None,
	}
}

/// Adds channel `scid` from `from` to `to` with `forward` applied by `from`, and the same policy
/// in the other direction.
pub(crate) fn add_channel<L: Deref>(graph: &NetworkGraph<L>, scid: u64, from: &NodeId, to: &NodeId, forward: ChannelPolicy)
where L::Target: Logger {
	graph.add_channel(scid, *from, *to, Some(100_000_000_000)).unwrap();
	graph.update_channel_policy(scid, from, forward).unwrap();
	graph.update_channel_policy(scid, to, forward).unwrap();
}

/// Builds the graph used by most router tests:
///
/// ```text
///        1 -- X -- 2 -- Y -- 3
///       /                     \
/// us --                        -- D
///       \                     /
///        4 -- A -- 5 -- B -- 6
/// ```
///
/// Every channel charges 10 msat base fee with a CLTV delta of 40. Returns
/// `[us, X, Y, A, B, D]`.
pub(crate) fn build_diamond_graph<L: Deref>(graph: &NetworkGraph<L>) -> [NodeId; 6]
where L::Target: Logger {
	let nodes = [node_id(1), node_id(2), node_id(3), node_id(4), node_id(5), node_id(6)];
	let [us, x, y, a, b, d] = nodes;
	let fwd = policy(10, 0, 40);
	add_channel(graph, 1, &us, &x, fwd);
	add_channel(graph, 2, &x, &y, fwd);
	add_channel(graph, 3, &y, &d, fwd);
	add_channel(graph, 4, &us, &a, fwd);
	add_channel(graph, 5, &a, &b, fwd);
	add_channel(graph, 6, &b, &d, fwd);
	nodes
}
