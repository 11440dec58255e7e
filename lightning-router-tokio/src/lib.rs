// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! A Tokio front for lightning-router, for those wishing to expose its payment and routing
//! operations over an async RPC transport.
//!
//! [`RouterServer`] wraps an already composed [`PaymentController`], [`MissionControl`] and
//! [`ForwardInterceptor`] and offers their operations as async request and stream shaped calls.
//! Identifiers arrive as raw bytes, the way a transport would carry them, and are validated
//! here.
//!
//! Every stream ends promptly with [`APIError::ShuttingDown`] once [`RouterServer::stop`] is
//! called. Dropping a stream is the client's way of cancelling it and never affects the
//! payment or session behind it beyond releasing the stream itself.

#![deny(rustdoc::broken_intra_doc_links)]
#![deny(rustdoc::private_intra_doc_links)]

#![deny(missing_docs)]
#![cfg_attr(docsrs, feature(doc_auto_cfg))]

use futures_util::{select_biased, future::FutureExt};

use tokio::sync::{mpsc, watch};

use lightning_router::intercept::{ForwardInterceptor, ForwardResolution, ForwardingPipeline, HeldForward, HtlcEvent};
use lightning_router::payment::controller::{PaymentController, SendToRouteResult};
use lightning_router::payment::store::PaymentStore;
use lightning_router::payment::{Payment, PaymentDispatcher, PaymentRequest, Retry};
use lightning_router::routing::gossip::{ChannelGraph, NodeId};
use lightning_router::routing::mission_control::MissionControl;
use lightning_router::routing::pair_history::{DirectedPair, PairHistory};
use lightning_router::routing::router::{self, Route, RouteFeeEstimate, RouteParameters};
use lightning_router::types::{InterceptId, PaymentHash};
use lightning_router::util::config::UserConfig;
use lightning_router::util::errors::APIError;
use lightning_router::util::logger::Logger;
use lightning_router::util::wakers::Subscription;
use lightning_router::{log_debug, log_info};

use std::ops::Deref;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// A request to pay a node, with identifiers in their raw byte form.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SendPaymentRequest {
	/// The 32-byte payment hash
	pub payment_hash: Vec<u8>,
	/// The 33-byte compressed public key of the recipient
	pub dest: Vec<u8>,
	/// The amount the recipient should receive
	pub amt_msat: u64,
	/// The CLTV delta the recipient requires, or the configured default if `None`
	pub final_cltv_delta: Option<u32>,
	/// The most we are willing to pay in fees on any single attempt
	pub fee_limit_msat: Option<u64>,
	/// The largest total time lock we accept, or the configured default if `None`
	pub cltv_limit: Option<u32>,
	/// If set, every attempt must leave over this channel of ours
	pub outgoing_chan_id: Option<u64>,
	/// How long to keep retrying failed attempts, in seconds
	pub timeout_seconds: Option<u32>,
	/// Only deliver the payment's final state on the returned stream
	pub no_inflight_updates: bool,
}

/// The resolution of one held forward, as sent by an interceptor client.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InterceptResolution {
	/// The held forward being resolved
	pub intercept_id: InterceptId,
	/// What to do with it
	pub resolution: ForwardResolution,
}

/// The success probability of a pair along with what mission control knows about it.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PairProbability {
	/// The estimated probability that the pair forwards the queried amount
	pub probability: f64,
	/// The recorded history of the pair, if any
	pub history: Option<PairHistory>,
}

/// A stream of updates from the router, ended by [`RouterServer::stop`].
pub struct Updates<T> {
	subscription: Subscription<T>,
	quit: watch::Receiver<bool>,
	finished: bool,
}

impl<T> Updates<T> {
	/// Waits for the next update. Returns `None` once the stream has ended.
	///
	/// If the server is stopped, the stream's last item is [`APIError::ShuttingDown`], even if
	/// other updates were still queued.
	pub async fn next(&mut self) -> Option<Result<T, APIError>> {
		if self.finished {
			return None;
		}
		let quit = &mut self.quit;
		let subscription = &mut self.subscription;
		let update = select_biased! {
			_ = quit.wait_for(|quit| *quit).fuse() => Some(Err(APIError::ShuttingDown)),
			update = subscription.next().fuse() => update,
		};
		if !matches!(update, Some(Ok(_))) {
			self.finished = true;
		}
		update
	}
}

/// A stream of [`Payment`] states, see [`RouterServer::track_payment`].
pub type PaymentUpdates = Updates<Payment>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ServerState {
	Created,
	Running,
	Stopped,
}

enum SessionInput {
	Quit,
	Forward(Option<Result<HeldForward, APIError>>),
	Resolution(Option<InterceptResolution>),
}

fn parse_node_id(bytes: &[u8]) -> Result<NodeId, APIError> {
	NodeId::from_slice(bytes).map_err(|_| APIError::InvalidRequest {
		err: format!("Node public keys must be 33 bytes, got {}", bytes.len())
	})
}

fn parse_payment_hash(bytes: &[u8]) -> Result<PaymentHash, APIError> {
	PaymentHash::from_slice(bytes).map_err(|_| APIError::InvalidRequest {
		err: format!("Payment hashes must be 32 bytes, got {}", bytes.len())
	})
}

/// Exposes the payment and routing operations of one node to async RPC handlers.
pub struct RouterServer<G: Deref, D: Deref, S: Deref, P: Deref, L: Deref>
where
	G::Target: ChannelGraph,
	D::Target: PaymentDispatcher,
	S::Target: PaymentStore,
	P::Target: ForwardingPipeline,
	L::Target: Logger,
{
	our_node_id: NodeId,
	config: UserConfig,
	graph: G,
	mission_control: Arc<MissionControl<L>>,
	controller: Arc<PaymentController<G, Arc<MissionControl<L>>, D, S, L>>,
	interceptor: Arc<ForwardInterceptor<P, L>>,
	logger: L,
	state: Mutex<ServerState>,
	quit: watch::Sender<bool>,
}

impl<G: Deref, D: Deref, S: Deref, P: Deref, L: Deref> RouterServer<G, D, S, P, L>
where
	G::Target: ChannelGraph,
	D::Target: PaymentDispatcher,
	S::Target: PaymentStore,
	P::Target: ForwardingPipeline,
	L::Target: Logger,
{
	/// Constructs a new server. `controller` must have been built for `our_node_id` over `graph`
	/// and `mission_control`.
	pub fn new(
		our_node_id: NodeId, config: UserConfig, graph: G, mission_control: Arc<MissionControl<L>>,
		controller: Arc<PaymentController<G, Arc<MissionControl<L>>, D, S, L>>,
		interceptor: Arc<ForwardInterceptor<P, L>>, logger: L
	) -> Self {
		let (quit, _) = watch::channel(false);
		Self {
			our_node_id, config, graph, mission_control, controller, interceptor, logger,
			state: Mutex::new(ServerState::Created),
			quit,
		}
	}

	/// The payment controller behind this server, to which payment outcomes are reported.
	pub fn controller(&self) -> &Arc<PaymentController<G, Arc<MissionControl<L>>, D, S, L>> {
		&self.controller
	}

	/// The interceptor behind this server, to which forwards are offered.
	pub fn interceptor(&self) -> &Arc<ForwardInterceptor<P, L>> {
		&self.interceptor
	}

	/// Resumes the payments left in flight by a previous run. Calling this again while running
	/// does nothing, calling it after [`Self::stop`] fails with [`APIError::ShuttingDown`].
	pub fn start(&self) -> Result<(), APIError> {
		let mut state = self.state.lock().unwrap();
		match *state {
			ServerState::Running => return Ok(()),
			ServerState::Stopped => return Err(APIError::ShuttingDown),
			ServerState::Created => {},
		}
		let resumed = self.controller.resume_payments()?;
		*state = ServerState::Running;
		log_info!(self.logger, "Router server started, resumed {} payments", resumed);
		Ok(())
	}

	/// Ends every open stream and interceptor session with [`APIError::ShuttingDown`] and shuts
	/// down the payment controller and the interceptor. Calling this again does nothing.
	pub fn stop(&self) {
		{
			let mut state = self.state.lock().unwrap();
			if *state == ServerState::Stopped {
				return;
			}
			*state = ServerState::Stopped;
		}
		self.quit.send_replace(true);
		self.controller.shutdown();
		self.interceptor.shutdown();
		log_info!(self.logger, "Router server stopped");
	}

	fn updates<T>(&self, subscription: Subscription<T>) -> Updates<T> {
		Updates { subscription, quit: self.quit.subscribe(), finished: false }
	}

	/// Initiates a payment and streams its states until it succeeds or fails.
	pub async fn send_payment(&self, request: SendPaymentRequest) -> Result<PaymentUpdates, APIError> {
		let payment_hash = parse_payment_hash(&request.payment_hash)?;
		let payee = parse_node_id(&request.dest)?;
		let payment_request = PaymentRequest {
			final_cltv_expiry_delta: request.final_cltv_delta,
			max_total_routing_fee_msat: request.fee_limit_msat,
			max_total_cltv_expiry_delta: request.cltv_limit,
			first_hop: request.outgoing_chan_id,
			retry: request.timeout_seconds.map(|secs| Retry::Timeout(Duration::from_secs(secs.into()))),
			..PaymentRequest::new(payment_hash, payee, request.amt_msat)
		};
		self.controller.send_payment(payment_request)?;
		self.track(&payment_hash, request.no_inflight_updates)
	}

	fn track(&self, payment_hash: &PaymentHash, no_inflight_updates: bool) -> Result<PaymentUpdates, APIError> {
		let subscription = self.controller.track_payment(payment_hash, no_inflight_updates)?;
		Ok(self.updates(subscription))
	}

	/// Streams the states of a payment, starting with its current one.
	pub async fn track_payment(&self, payment_hash: &[u8], no_inflight_updates: bool) -> Result<PaymentUpdates, APIError> {
		let payment_hash = parse_payment_hash(payment_hash)?;
		self.track(&payment_hash, no_inflight_updates)
	}

	/// Sends one attempt over `route` and waits for its outcome.
	///
	/// The attempt is returned whenever one was made, even if an error occurred after it was
	/// recorded. If the server stops while waiting, the in-flight attempt is returned along with
	/// [`APIError::ShuttingDown`].
	pub async fn send_to_route(&self, payment_hash: &[u8], route: Route) -> SendToRouteResult {
		let payment_hash = match parse_payment_hash(payment_hash) {
			Ok(payment_hash) => payment_hash,
			Err(e) => return SendToRouteResult { attempt: None, error: Some(e) },
		};
		let started = self.controller.begin_route_attempt(&payment_hash, route);
		let attempt_id = match (&started.attempt, &started.error) {
			(Some(attempt), None) if attempt.is_in_flight() => attempt.attempt_id,
			_ => return started,
		};
		let mut attempt = started.attempt;
		let mut updates = match self.track(&payment_hash, false) {
			Ok(updates) => updates,
			Err(e) => return SendToRouteResult { attempt, error: Some(e) },
		};
		while let Some(update) = updates.next().await {
			match update {
				Ok(payment) => {
					if let Some(latest) = payment.attempt(attempt_id) {
						let resolved = !latest.is_in_flight();
						attempt = Some(latest.clone());
						if resolved {
							break;
						}
					}
				},
				Err(e) => return SendToRouteResult { attempt, error: Some(e) },
			}
		}
		SendToRouteResult { attempt, error: None }
	}

	/// Builds a route over the given hops, see [`router::build_route`].
	pub async fn build_route(
		&self, amt_msat: Option<u64>, final_cltv_delta: u32, outgoing_chan_id: Option<u64>,
		hop_pubkeys: &[Vec<u8>]
	) -> Result<Route, APIError> {
		let hops = hop_pubkeys.iter().map(|hop| parse_node_id(hop)).collect::<Result<Vec<_>, _>>()?;
		router::build_route(&self.our_node_id, &hops, amt_msat, final_cltv_delta, outgoing_chan_id,
			&*self.graph, &self.config.router, &*self.logger)
	}

	/// Estimates the fee and time lock of paying `amt_msat` to `dest`.
	pub async fn estimate_route_fee(&self, dest: &[u8], amt_msat: u64) -> Result<RouteFeeEstimate, APIError> {
		let payee = parse_node_id(dest)?;
		let params = RouteParameters::from_payee_and_amount(payee, amt_msat,
			self.config.payment.default_final_cltv_expiry_delta);
		router::estimate_route_fee(&self.our_node_id, &params, &*self.graph, &*self.mission_control,
			&self.config.router, &*self.logger)
	}

	/// Returns everything mission control has learned, ordered by pair.
	pub async fn query_mission_control(&self) -> Vec<(DirectedPair, PairHistory)> {
		self.mission_control.snapshot()
	}

	/// Returns the probability that `from` forwards `amt_msat` to `to`.
	pub async fn query_probability(&self, from: &[u8], to: &[u8], amt_msat: u64) -> Result<PairProbability, APIError> {
		let from = parse_node_id(from)?;
		let to = parse_node_id(to)?;
		Ok(PairProbability {
			probability: self.mission_control.success_probability(&from, &to, amt_msat),
			history: self.mission_control.pair_history(&from, &to),
		})
	}

	/// Forgets everything mission control has learned.
	pub async fn reset_mission_control(&self) {
		self.mission_control.reset_history();
	}

	/// Streams [`HtlcEvent`]s of interceptor sessions.
	pub async fn subscribe_htlc_events(&self) -> Result<Updates<HtlcEvent>, APIError> {
		let subscription = self.interceptor.subscribe_htlc_events()?;
		Ok(self.updates(subscription))
	}

	/// Runs the interceptor session for one client.
	///
	/// Held forwards are sent to `forwards`, resolutions are read from `resolutions` and may
	/// arrive in any order. Returns `Ok(())` once the client closes either channel and
	/// [`APIError::ShuttingDown`] if the server stops. Forwards the client did not resolve are
	/// resumed when this returns. Fails immediately with [`APIError::InterceptorAlreadyExists`]
	/// while another client's session is running.
	pub async fn htlc_interceptor(
		&self, mut resolutions: mpsc::Receiver<InterceptResolution>, forwards: mpsc::Sender<HeldForward>
	) -> Result<(), APIError> {
		let mut quit = self.quit.subscribe();
		if *quit.borrow() {
			return Err(APIError::ShuttingDown);
		}
		let mut session = self.interceptor.open_session()?;
		let session_id = session.session_id();
		loop {
			let input = select_biased! {
				_ = quit.wait_for(|quit| *quit).fuse() => SessionInput::Quit,
				forward = session.next_forward().fuse() => SessionInput::Forward(forward),
				resolution = resolutions.recv().fuse() => SessionInput::Resolution(resolution),
			};
			match input {
				SessionInput::Quit => return Err(APIError::ShuttingDown),
				SessionInput::Forward(Some(Ok(forward))) => {
					let sent = select_biased! {
						_ = quit.wait_for(|quit| *quit).fuse() => return Err(APIError::ShuttingDown),
						res = forwards.send(forward).fuse() => res.is_ok(),
					};
					if !sent {
						log_debug!(self.logger, "Interceptor client of session {} stopped receiving forwards", session_id);
						return Ok(());
					}
				},
				SessionInput::Forward(Some(Err(e))) => return Err(e),
				SessionInput::Forward(None) => return Ok(()),
				SessionInput::Resolution(Some(InterceptResolution { intercept_id, resolution })) => {
					match session.resolve(&intercept_id, resolution) {
						Ok(()) => {},
						Err(APIError::ShuttingDown) => return Err(APIError::ShuttingDown),
						Err(e) => {
							log_debug!(self.logger, "Ignoring resolution from session {}: {:?}", session_id, e);
						},
					}
				},
				SessionInput::Resolution(None) => {
					log_debug!(self.logger, "Interceptor client of session {} closed its resolutions", session_id);
					return Ok(());
				},
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	use bitcoin::secp256k1::{PublicKey, Secp256k1, SecretKey};

	use lightning_router::payment::store::KVStore;
	use lightning_router::payment::{AttemptFailure, AttemptStatus, PaymentStatus};
	use lightning_router::routing::gossip::{ChannelPolicy, NetworkGraph, RoutingFees};
	use lightning_router::types::PaymentPreimage;
	use lightning_router::util::logger::Record;

	use std::collections::HashMap;
	use std::io;

	struct TestLogger;
	impl Logger for TestLogger {
		fn log(&self, record: Record) {
			println!("{}", record);
		}
	}

	struct MemoryStore(Mutex<HashMap<(String, String), Vec<u8>>>);
	impl KVStore for MemoryStore {
		fn read(&self, namespace: &str, key: &str) -> Result<Vec<u8>, io::Error> {
			self.0.lock().unwrap().get(&(namespace.to_owned(), key.to_owned())).cloned()
				.ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "not found"))
		}
		fn write(&self, namespace: &str, key: &str, buf: &[u8]) -> Result<(), io::Error> {
			self.0.lock().unwrap().insert((namespace.to_owned(), key.to_owned()), buf.to_vec());
			Ok(())
		}
		fn list(&self, namespace: &str) -> Result<Vec<String>, io::Error> {
			Ok(self.0.lock().unwrap().keys().filter(|(ns, _)| ns == namespace).map(|(_, key)| key.clone()).collect())
		}
	}

	struct RecordingDispatcher(Mutex<Vec<(PaymentHash, u64, Route)>>);
	impl PaymentDispatcher for RecordingDispatcher {
		fn dispatch(&self, payment_hash: &PaymentHash, attempt_id: u64, route: &Route) -> Result<(), APIError> {
			self.0.lock().unwrap().push((*payment_hash, attempt_id, route.clone()));
			Ok(())
		}
	}

	struct RecordingPipeline(Mutex<Vec<(HeldForward, ForwardResolution)>>);
	impl ForwardingPipeline for RecordingPipeline {
		fn resolve_forward(&self, forward: HeldForward, resolution: ForwardResolution) {
			self.0.lock().unwrap().push((forward, resolution));
		}
	}

	type TestServer = RouterServer<Arc<NetworkGraph<Arc<TestLogger>>>, Arc<RecordingDispatcher>, Arc<MemoryStore>, Arc<RecordingPipeline>, Arc<TestLogger>>;

	struct Node {
		server: TestServer,
		dispatcher: Arc<RecordingDispatcher>,
		pipeline: Arc<RecordingPipeline>,
		nodes: Vec<NodeId>,
	}

	fn node_id(n: u8) -> NodeId {
		let secp_ctx = Secp256k1::signing_only();
		NodeId::from_pubkey(&PublicKey::from_secret_key(&secp_ctx, &SecretKey::from_slice(&[n; 32]).unwrap()))
	}

	/// Us, connected to the destination over a single intermediate node.
	fn create_node() -> Node {
		let logger = Arc::new(TestLogger);
		let nodes = vec![node_id(1), node_id(2), node_id(3)];
		let graph = Arc::new(NetworkGraph::new(Arc::clone(&logger)));
		let policy = ChannelPolicy {
			enabled: true,
			fees: RoutingFees { base_msat: 10, proportional_millionths: 0 },
			cltv_expiry_delta: 40,
			htlc_minimum_msat: 1,
			htlc_maximum_msat: None,
		};
		for (scid, (from, to)) in [(1, (nodes[0], nodes[1])), (2, (nodes[1], nodes[2]))] {
			graph.add_channel(scid, from, to, Some(1_000_000_000)).unwrap();
			graph.update_channel_policy(scid, &from, policy).unwrap();
			graph.update_channel_policy(scid, &to, policy).unwrap();
		}
		let config = UserConfig::default();
		let mission_control = Arc::new(MissionControl::new(config.mission_control, Arc::clone(&logger)));
		let dispatcher = Arc::new(RecordingDispatcher(Mutex::new(Vec::new())));
		let store = Arc::new(MemoryStore(Mutex::new(HashMap::new())));
		let pipeline = Arc::new(RecordingPipeline(Mutex::new(Vec::new())));
		let controller = Arc::new(PaymentController::new(nodes[0], config, Arc::clone(&graph),
			Arc::clone(&mission_control), Arc::clone(&dispatcher), store, Arc::clone(&logger)));
		let interceptor = Arc::new(ForwardInterceptor::new(Arc::clone(&pipeline), Arc::clone(&logger)));
		let server = RouterServer::new(nodes[0], config, graph, mission_control, controller, interceptor, logger);
		server.start().unwrap();
		Node { server, dispatcher, pipeline, nodes }
	}

	fn preimage(n: u8) -> PaymentPreimage {
		PaymentPreimage([n; 32])
	}

	fn payment_request(node: &Node, n: u8) -> SendPaymentRequest {
		SendPaymentRequest {
			payment_hash: PaymentHash::from(preimage(n)).0.to_vec(),
			dest: node.nodes[2].as_slice().to_vec(),
			amt_msat: 5_000,
			..Default::default()
		}
	}

	fn forward(htlc_index: u64) -> HeldForward {
		HeldForward {
			intercept_id: InterceptId::from_incoming_htlc(1, htlc_index),
			incoming_channel_id: 1,
			incoming_htlc_index: htlc_index,
			outgoing_channel_id: 2,
			payment_hash: PaymentHash::from(preimage(htlc_index as u8)),
			incoming_amount_msat: 5_010,
			outgoing_amount_msat: 5_000,
			incoming_expiry: 800_080,
			outgoing_expiry: 800_040,
		}
	}

	async fn hold_forward(node: &Node, forward: HeldForward) {
		while !node.server.interceptor().intercept_forward(forward.clone()) {
			tokio::task::yield_now().await;
		}
	}

	#[tokio::test]
	async fn send_payment_streams_until_final() {
		let node = create_node();
		let request = payment_request(&node, 1);
		let payment_hash = PaymentHash::from(preimage(1));
		let mut updates = node.server.send_payment(request.clone()).await.unwrap();

		let in_flight = updates.next().await.unwrap().unwrap();
		assert_eq!(in_flight.status, PaymentStatus::InFlight);
		let (_, attempt_id, route) = node.dispatcher.0.lock().unwrap()[0].clone();
		assert_eq!(route.total_fees(), 10);

		node.server.controller().attempt_succeeded(&payment_hash, attempt_id, preimage(1)).unwrap();
		let succeeded = updates.next().await.unwrap().unwrap();
		assert_eq!(succeeded.status, PaymentStatus::Succeeded);
		assert!(updates.next().await.is_none());

		assert!(matches!(node.server.send_payment(request).await, Err(APIError::PaymentAlreadyPaid)));
		let mut tracked = node.server.track_payment(&payment_hash.0, true).await.unwrap();
		assert_eq!(tracked.next().await.unwrap().unwrap().status, PaymentStatus::Succeeded);
		assert!(tracked.next().await.is_none());
	}

	#[tokio::test]
	async fn malformed_identifiers_are_rejected() {
		let node = create_node();
		let mut request = payment_request(&node, 1);
		request.payment_hash.pop();
		assert!(matches!(node.server.send_payment(request).await, Err(APIError::InvalidRequest { .. })));
		let mut request = payment_request(&node, 1);
		request.dest = vec![2; 32];
		assert!(matches!(node.server.send_payment(request).await, Err(APIError::InvalidRequest { .. })));
		assert!(matches!(node.server.track_payment(&[0; 33], false).await, Err(APIError::InvalidRequest { .. })));
		assert!(matches!(node.server.track_payment(&[0; 32], false).await, Err(APIError::PaymentNotFound)));
		assert!(matches!(node.server.query_probability(&[1], &[2], 1_000).await, Err(APIError::InvalidRequest { .. })));
		assert!(matches!(node.server.build_route(None, 40, None, &[vec![3; 3]]).await, Err(APIError::InvalidRequest { .. })));
		assert!(node.dispatcher.0.lock().unwrap().is_empty());
	}

	#[tokio::test]
	async fn stop_ends_streams() {
		let node = create_node();
		let mut updates = node.server.send_payment(payment_request(&node, 1)).await.unwrap();
		assert_eq!(updates.next().await.unwrap().unwrap().status, PaymentStatus::InFlight);

		node.server.stop();
		node.server.stop();
		assert_eq!(updates.next().await, Some(Err(APIError::ShuttingDown)));
		assert!(updates.next().await.is_none());
		assert!(matches!(node.server.send_payment(payment_request(&node, 2)).await, Err(APIError::ShuttingDown)));
		assert_eq!(node.server.start(), Err(APIError::ShuttingDown));
	}

	#[tokio::test]
	async fn send_to_route_waits_for_outcome() {
		let node = create_node();
		let route = node.server.build_route(Some(5_000), 40, None,
			&[node.nodes[1].as_slice().to_vec(), node.nodes[2].as_slice().to_vec()]).await.unwrap();
		assert_eq!(route.total_fees(), 10);
		let payment_hash = PaymentHash::from(preimage(1));

		let (res, ()) = tokio::join!(
			node.server.send_to_route(&payment_hash.0, route.clone()),
			async {
				let attempt_id = loop {
					if let Some((_, attempt_id, _)) = node.dispatcher.0.lock().unwrap().first() {
						break *attempt_id;
					}
					tokio::task::yield_now().await;
				};
				node.server.controller()
					.attempt_failed(&payment_hash, attempt_id, AttemptFailure::Channel { hop_index: 1 }).unwrap();
			}
		);
		assert_eq!(res.error, None);
		let attempt = res.into_result().unwrap();
		assert!(matches!(attempt.status, AttemptStatus::Failed { failure: AttemptFailure::Channel { hop_index: 1 }, .. }));

		// The failure was learned from.
		let snapshot = node.server.query_mission_control().await;
		assert_eq!(snapshot.len(), 2);
		let probability = node.server.query_probability(node.nodes[1].as_slice(), node.nodes[2].as_slice(), 5_000).await.unwrap();
		assert!(probability.history.unwrap().failure.is_some());
		assert!(probability.probability < 0.01);
		assert!(matches!(node.server.estimate_route_fee(node.nodes[2].as_slice(), 5_000).await, Err(APIError::NoRouteFound { .. })));

		node.server.reset_mission_control().await;
		assert!(node.server.query_mission_control().await.is_empty());
		let estimate = node.server.estimate_route_fee(node.nodes[2].as_slice(), 5_000).await.unwrap();
		assert_eq!(estimate.routing_fee_msat, 10);
		assert_eq!(estimate.time_lock_delay, 80);
	}

	#[tokio::test]
	async fn single_interceptor_session() {
		let node = create_node();
		let (resolution_sender, resolutions) = mpsc::channel(8);
		let (forwards, mut forward_receiver) = mpsc::channel(8);
		let mut events = node.server.subscribe_htlc_events().await.unwrap();

		let (res, ()) = tokio::join!(
			node.server.htlc_interceptor(resolutions, forwards),
			async {
				hold_forward(&node, forward(1)).await;
				assert_eq!(forward_receiver.recv().await, Some(forward(1)));

				let (_second_sender, second_resolutions) = mpsc::channel(1);
				let (second_forwards, _second_receiver) = mpsc::channel(1);
				assert_eq!(node.server.htlc_interceptor(second_resolutions, second_forwards).await,
					Err(APIError::InterceptorAlreadyExists));

				let resolution = ForwardResolution::Settle { preimage: preimage(1) };
				resolution_sender.send(InterceptResolution { intercept_id: forward(1).intercept_id, resolution }).await.unwrap();
				while node.pipeline.0.lock().unwrap().is_empty() {
					tokio::task::yield_now().await;
				}
				hold_forward(&node, forward(2)).await;
				drop(resolution_sender);
			}
		);
		assert_eq!(res, Ok(()));
		assert_eq!(*node.pipeline.0.lock().unwrap(), vec![
			(forward(1), ForwardResolution::Settle { preimage: preimage(1) }),
			(forward(2), ForwardResolution::Resume),
		]);
		assert_eq!(events.next().await, Some(Ok(HtlcEvent::Intercepted(forward(1)))));

		// The slot was released, so a new client gets a session.
		let (resolution_sender, resolutions) = mpsc::channel(1);
		let (forwards, _forward_receiver) = mpsc::channel(1);
		drop(resolution_sender);
		assert_eq!(node.server.htlc_interceptor(resolutions, forwards).await, Ok(()));
	}

	#[tokio::test]
	async fn stop_ends_interceptor_session() {
		let node = create_node();
		let (_resolution_sender, resolutions) = mpsc::channel(1);
		let (forwards, mut forward_receiver) = mpsc::channel(1);
		let (res, ()) = tokio::join!(
			node.server.htlc_interceptor(resolutions, forwards),
			async {
				hold_forward(&node, forward(1)).await;
				assert_eq!(forward_receiver.recv().await, Some(forward(1)));
				node.server.stop();
			}
		);
		assert_eq!(res, Err(APIError::ShuttingDown));
		assert_eq!(*node.pipeline.0.lock().unwrap(), vec![(forward(1), ForwardResolution::Resume)]);
		assert!(!node.server.interceptor().intercept_forward(forward(2)));
	}
}
