// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! The [`PaymentController`] drives outbound payments through their attempts.

use crate::payment::store::PaymentStore;
use crate::payment::{
	AttemptFailure, AttemptStatus, HtlcAttempt, Payment, PaymentDispatcher, PaymentFailureReason,
	PaymentRequest, PaymentStatus, Retry,
};
use crate::routing::gossip::{ChannelGraph, NodeId};
use crate::routing::mission_control::{ProbabilitySource, ProbabilityUpdate, RouteOutcome};
use crate::routing::router::{check_amount, find_route, Route, RouteParameters};
use crate::sync::{Arc, Mutex};
use crate::types::{PaymentHash, PaymentPreimage};
use crate::util::atomic_counter::AtomicCounter;
use crate::util::config::UserConfig;
use crate::util::errors::APIError;
use crate::util::logger::{Logger, WithContext};
use crate::util::time::{SystemClock, Time};
use crate::util::wakers::{Subscription, UpdateQueue};

use crate::prelude::*;

use core::marker::PhantomData;
use core::ops::Deref;
use core::sync::atomic::{AtomicBool, Ordering};

/// A stream of [`Payment`] states, as returned by [`PaymentController::track_payment`].
pub type PaymentSubscription = Subscription<Payment>;

/// The outcome of [`PaymentController::send_to_route`].
///
/// Both fields may be set at once: an attempt which was recorded but could not be dispatched is
/// returned together with the dispatch error.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SendToRouteResult {
	/// The attempt, if one was recorded
	pub attempt: Option<HtlcAttempt>,
	/// The error which occurred, if any
	pub error: Option<APIError>,
}

impl SendToRouteResult {
	fn failed(error: APIError) -> Self {
		SendToRouteResult { attempt: None, error: Some(error) }
	}

	/// Returns the attempt if one was recorded, even if an error occurred as well, and the error
	/// otherwise.
	pub fn into_result(self) -> Result<HtlcAttempt, APIError> {
		match (self.attempt, self.error) {
			(Some(attempt), _) => Ok(attempt),
			(None, Some(err)) => Err(err),
			(None, None) => Err(APIError::InvalidRequest { err: "No attempt was recorded".to_owned() }),
		}
	}
}

struct Subscriber {
	queue: Arc<UpdateQueue<Payment>>,
	no_inflight_updates: bool,
}

/// What the controller needs to find the next route for a payment it drives itself.
struct RetryContext {
	route_params: RouteParameters,
	retry: Retry,
	attempts: u32,
}

struct PaymentEntry {
	payment: Payment,
	/// `None` for payments whose attempts are sent to explicit routes.
	retry: Option<RetryContext>,
	subscribers: Vec<Subscriber>,
}

/// Keeps track of every outbound payment, launching attempts over routes found in the
/// [`ChannelGraph`], feeding their outcomes to mission control and retrying until a payment
/// succeeds or its retry budget is exhausted.
///
/// Every state transition of a payment is persisted to the [`PaymentStore`] before it is
/// published to the payment's subscribers, and at most one payment exists per payment hash.
/// Once a payment has succeeded or failed its state never changes again.
///
/// HTLCs are handed to the [`PaymentDispatcher`], whose outcomes must be reported back through
/// [`Self::attempt_succeeded`] and [`Self::attempt_failed`].
pub struct PaymentController<G: Deref, M: Deref, D: Deref, S: Deref, L: Deref, T: Time = SystemClock>
where
	G::Target: ChannelGraph,
	M::Target: ProbabilitySource + ProbabilityUpdate,
	D::Target: PaymentDispatcher,
	S::Target: PaymentStore,
	L::Target: Logger,
{
	our_node_id: NodeId,
	config: UserConfig,
	graph: G,
	mission_control: M,
	dispatcher: D,
	store: S,
	logger: L,
	payments: Mutex<HashMap<PaymentHash, Arc<Mutex<PaymentEntry>>>>,
	next_attempt_id: AtomicCounter,
	shutting_down: AtomicBool,
	_time: PhantomData<T>,
}

fn duplicate_error(payment: &Payment) -> APIError {
	match payment.status {
		PaymentStatus::Succeeded => APIError::PaymentAlreadyPaid,
		PaymentStatus::Failed => APIError::PaymentAlreadyFailed,
		PaymentStatus::Created | PaymentStatus::InFlight => APIError::PaymentAlreadyInFlight,
	}
}

/// Publishes the payment's current state. A final state is the last update any subscriber
/// sees, after which its stream ends.
fn notify_subscribers(entry: &mut PaymentEntry) {
	let is_final = entry.payment.status.is_final();
	let payment = &entry.payment;
	entry.subscribers.retain(|subscriber| {
		if is_final {
			subscriber.queue.push(payment.clone());
			subscriber.queue.close();
			false
		} else if subscriber.no_inflight_updates {
			!subscriber.queue.is_finished()
		} else {
			subscriber.queue.push(payment.clone())
		}
	});
}

impl<G: Deref, M: Deref, D: Deref, S: Deref, L: Deref, T: Time> PaymentController<G, M, D, S, L, T>
where
	G::Target: ChannelGraph,
	M::Target: ProbabilitySource + ProbabilityUpdate,
	D::Target: PaymentDispatcher,
	S::Target: PaymentStore,
	L::Target: Logger,
{
	/// Constructs a new controller for payments from `our_node_id`.
	///
	/// Payments persisted by a previous instance are not loaded until [`Self::resume_payments`]
	/// is called.
	pub fn new(
		our_node_id: NodeId, config: UserConfig, graph: G, mission_control: M, dispatcher: D,
		store: S, logger: L
	) -> Self {
		Self {
			our_node_id,
			config,
			graph,
			mission_control,
			dispatcher,
			store,
			logger,
			payments: Mutex::new(new_hash_map()),
			next_attempt_id: AtomicCounter::new(),
			shutting_down: AtomicBool::new(false),
			_time: PhantomData,
		}
	}

	fn is_shutting_down(&self) -> bool {
		self.shutting_down.load(Ordering::Acquire)
	}

	fn route_params(&self, request: &PaymentRequest) -> RouteParameters {
		RouteParameters {
			payee: request.payee,
			final_value_msat: request.amount_msat,
			final_cltv_expiry_delta: request.final_cltv_expiry_delta
				.unwrap_or(self.config.payment.default_final_cltv_expiry_delta),
			max_total_routing_fee_msat: request.max_total_routing_fee_msat,
			max_total_cltv_expiry_delta: request.max_total_cltv_expiry_delta
				.unwrap_or(self.config.payment.default_max_total_cltv_expiry_delta),
			first_hop: request.first_hop,
			excluded_channels: Vec::new(),
		}
	}

	fn persist(&self, payment: &Payment) -> Result<(), APIError> {
		self.store.persist_payment(payment).map_err(|e| {
			let logger = WithContext::from(&self.logger, None, Some(payment.payment_hash));
			log_error!(logger, "Failed to persist payment {} while {}: {}", payment.payment_hash, payment.status, e);
			APIError::from(e)
		})
	}

	fn persist_and_notify(&self, entry: &mut PaymentEntry) {
		// A failed write was logged, the in-memory state stays authoritative until the next one.
		let _ = self.persist(&entry.payment);
		notify_subscribers(entry);
	}

	fn fail_payment(&self, entry: &mut PaymentEntry, reason: PaymentFailureReason) {
		let logger = WithContext::from(&self.logger, None, Some(entry.payment.payment_hash));
		log_info!(logger, "Payment {} failed after {} attempts: {:?}",
			entry.payment.payment_hash, entry.payment.attempts.len(), reason);
		entry.payment.status = PaymentStatus::Failed;
		entry.payment.failure_reason = Some(reason);
		self.persist_and_notify(entry);
	}

	/// Drops a payment which could not be recorded, ending its subscriptions with `err`.
	fn forget_payment(&self, payment_hash: &PaymentHash, entry: &Arc<Mutex<PaymentEntry>>, err: APIError) {
		let mut payments = self.payments.lock().unwrap();
		if payments.get(payment_hash).map_or(false, |known| Arc::ptr_eq(known, entry)) {
			payments.remove(payment_hash);
		}
		let mut entry = entry.lock().unwrap();
		for subscriber in entry.subscribers.drain(..) {
			subscriber.queue.fail(err.clone());
		}
	}

	fn entry(&self, payment_hash: &PaymentHash) -> Result<Arc<Mutex<PaymentEntry>>, APIError> {
		self.payments.lock().unwrap().get(payment_hash).cloned().ok_or(APIError::PaymentNotFound)
	}

	/// Makes a persisted payment known in memory, making sure new attempt ids never collide with
	/// the ones it already used. The caller has to [`Self::continue_payment`] it once the map lock
	/// is released.
	fn load_persisted(
		&self, payments: &mut HashMap<PaymentHash, Arc<Mutex<PaymentEntry>>>, payment: Payment
	) -> Arc<Mutex<PaymentEntry>> {
		if let Some(max_attempt_id) = payment.attempts.iter().map(|attempt| attempt.attempt_id).max() {
			self.next_attempt_id.bump_past(max_attempt_id);
		}
		let payment_hash = payment.payment_hash;
		let entry = Arc::new(Mutex::new(self.entry_from_persisted(payment)));
		payments.insert(payment_hash, Arc::clone(&entry));
		entry
	}

	/// Picks a reloaded payment back up. Payments sent to explicit routes with no attempt left in
	/// flight are failed, payments we drive ourselves with no attempt left in flight get a new
	/// attempt if their retry budget allows.
	fn continue_payment(&self, entry: &Arc<Mutex<PaymentEntry>>) {
		let needs_attempt = {
			let mut locked = entry.lock().unwrap();
			if locked.payment.status.is_final() || locked.payment.inflight_attempts() > 0 {
				false
			} else if locked.retry.is_some() {
				true
			} else {
				self.fail_payment(&mut locked, PaymentFailureReason::AttemptFailed);
				false
			}
		};
		if needs_attempt {
			self.drive_payment(entry);
		}
	}

	/// Rebuilds the in-memory state of a persisted payment.
	fn entry_from_persisted(&self, payment: Payment) -> PaymentEntry {
		let retry = match &payment.request {
			Some(request) if !payment.status.is_final() => {
				let mut route_params = self.route_params(request);
				for attempt in payment.attempts.iter() {
					if let AttemptStatus::Failed { failure, .. } = attempt.status {
						if let Some(hop) = failure.failed_hop().and_then(|idx| attempt.route.hops.get(idx)) {
							route_params.excluded_channels.push(hop.short_channel_id);
						}
					}
				}
				Some(RetryContext {
					route_params,
					retry: request.retry.unwrap_or(self.config.payment.default_retry),
					attempts: payment.attempts.len() as u32,
				})
			},
			_ => None,
		};
		PaymentEntry { payment, retry, subscribers: Vec::new() }
	}

	/// Initiates a payment, finding routes and retrying failed attempts until the payment
	/// succeeds or the request's retry budget runs out.
	///
	/// Returns once the payment is recorded and its first attempt was handed to the
	/// [`PaymentDispatcher`]. Failures to find a route are not returned here, they fail the
	/// payment and are visible through [`Self::track_payment`].
	///
	/// Fails with [`APIError::PaymentAlreadyInFlight`], [`APIError::PaymentAlreadyPaid`] or
	/// [`APIError::PaymentAlreadyFailed`] if a payment with the same hash exists.
	pub fn send_payment(&self, request: PaymentRequest) -> Result<(), APIError> {
		if request.payee == self.our_node_id {
			return Err(APIError::InvalidRequest { err: "Cannot send a payment to ourselves".to_owned() });
		}
		check_amount(request.amount_msat)?;
		let route_params = self.route_params(&request);
		let retry = request.retry.unwrap_or(self.config.payment.default_retry);
		let payment_hash = request.payment_hash;
		let logger = WithContext::from(&self.logger, Some(request.payee), Some(payment_hash));

		let entry = {
			let mut payments = self.payments.lock().unwrap();
			if self.is_shutting_down() {
				return Err(APIError::ShuttingDown);
			}
			if let Some(existing) = payments.get(&payment_hash) {
				let err = duplicate_error(&existing.lock().unwrap().payment);
				log_trace!(logger, "Rejecting payment {}: {:?}", payment_hash, err);
				return Err(err);
			}
			let payment = Payment {
				payment_hash,
				value_msat: request.amount_msat,
				creation_time: T::duration_since_epoch(),
				status: PaymentStatus::Created,
				failure_reason: None,
				preimage: None,
				attempts: Vec::new(),
				controller_driven: true,
				request: Some(request),
			};
			let entry = Arc::new(Mutex::new(PaymentEntry {
				payment,
				retry: Some(RetryContext { route_params, retry, attempts: 0 }),
				subscribers: Vec::new(),
			}));
			payments.insert(payment_hash, Arc::clone(&entry));
			entry
		};

		// The entry holds the payment hash while the store is consulted without the map lock. Until
		// it is persisted nothing launches attempts for it, and duplicates see it as in flight.
		let created = entry.lock().unwrap().payment.clone();
		let stored = match self.store.read_payment(&payment_hash) {
			Ok(Some(existing)) => Err(duplicate_error(&existing)),
			Ok(None) => self.persist(&created),
			Err(e) => Err(e.into()),
		};
		if let Err(err) = stored {
			log_trace!(logger, "Rejecting payment {}: {:?}", payment_hash, err);
			self.forget_payment(&payment_hash, &entry, err.clone());
			return Err(err);
		}
		log_info!(logger, "Initiated payment {} of {} msat", payment_hash, entry.lock().unwrap().payment.value_msat);

		self.drive_payment(&entry);
		Ok(())
	}

	/// Launches attempts for a payment we drive ourselves until one is dispatched or the payment
	/// fails.
	fn drive_payment(&self, entry: &Arc<Mutex<PaymentEntry>>) {
		loop {
			let (payment_hash, attempt_id, route) = {
				let mut locked = entry.lock().unwrap();
				match self.launch_attempt(&mut locked) {
					Some(attempt) => attempt,
					None => return,
				}
			};
			match self.dispatcher.dispatch(&payment_hash, attempt_id, &route) {
				Ok(()) => return,
				Err(e) => {
					let logger = WithContext::from(&self.logger, None, Some(payment_hash));
					log_debug!(logger, "Failed to dispatch attempt {} of payment {}: {:?}", attempt_id, payment_hash, e);
					let mut locked = entry.lock().unwrap();
					match self.resolve_failed_attempt(&mut locked, attempt_id, AttemptFailure::Dispatch) {
						Ok(true) => continue,
						_ => return,
					}
				},
			}
		}
	}

	/// Records a new attempt over a freshly found route, or fails the payment if no attempt may
	/// be made.
	fn launch_attempt(&self, entry: &mut PaymentEntry) -> Option<(PaymentHash, u64, Route)> {
		let payment_hash = entry.payment.payment_hash;
		let logger = WithContext::from(&self.logger, None, Some(payment_hash));
		if entry.payment.status.is_final() {
			return None;
		}
		if self.is_shutting_down() {
			log_debug!(logger, "Not launching a new attempt for payment {} while shutting down", payment_hash);
			return None;
		}
		let now = T::duration_since_epoch();
		let (attempts, retry) = match &entry.retry {
			Some(ctx) => (ctx.attempts, ctx.retry),
			None => return None,
		};
		if attempts > 0 && !retry.is_retryable_now(attempts, entry.payment.creation_time, now) {
			self.fail_payment(entry, PaymentFailureReason::RetriesExhausted);
			return None;
		}
		let route_res = match &entry.retry {
			Some(ctx) => find_route(&self.our_node_id, &ctx.route_params, &*self.graph,
				&*self.mission_control, &self.config.router, &*self.logger),
			None => return None,
		};
		let route = match route_res {
			Ok(route) => route,
			Err(e) => {
				log_debug!(logger, "No route for attempt {} of payment {}: {:?}", attempts + 1, payment_hash, e);
				self.fail_payment(entry, PaymentFailureReason::NoRoute);
				return None;
			},
		};
		if let Some(ctx) = entry.retry.as_mut() {
			ctx.attempts += 1;
		}
		let attempt_id = self.next_attempt_id.next();
		log_debug!(logger, "Launching attempt {} of payment {} over {}", attempt_id, payment_hash, log_route!(route));
		entry.payment.attempts.push(HtlcAttempt {
			attempt_id, route: route.clone(), attempt_time: now, status: AttemptStatus::InFlight,
		});
		entry.payment.status = PaymentStatus::InFlight;
		self.persist_and_notify(entry);
		Some((payment_hash, attempt_id, route))
	}

	/// Records the failure of an attempt. Returns whether the controller should launch another
	/// attempt.
	fn resolve_failed_attempt(
		&self, entry: &mut PaymentEntry, attempt_id: u64, failure: AttemptFailure
	) -> Result<bool, APIError> {
		let payment_hash = entry.payment.payment_hash;
		let logger = WithContext::from(&self.logger, None, Some(payment_hash));
		let route = match entry.payment.attempts.iter_mut().find(|attempt| attempt.attempt_id == attempt_id) {
			None => return Err(APIError::InvalidRequest {
				err: format!("Payment {} has no attempt {}", payment_hash, attempt_id)
			}),
			Some(attempt) if !attempt.is_in_flight() => {
				log_trace!(logger, "Ignoring repeated outcome of attempt {} of payment {}", attempt_id, payment_hash);
				return Ok(false);
			},
			Some(attempt) => {
				if failure.failed_hop().map_or(false, |hop_idx| hop_idx >= attempt.route.hops.len()) {
					return Err(APIError::InvalidRequest { err: format!(
						"Attempt {} of payment {} has only {} hops", attempt_id, payment_hash, attempt.route.hops.len()) });
				}
				attempt.status = AttemptStatus::Failed { failure, resolve_time: T::duration_since_epoch() };
				attempt.route.clone()
			},
		};
		log_debug!(logger, "Attempt {} of payment {} failed: {:?}", attempt_id, payment_hash, failure);

		let outcome = match failure.failed_hop() {
			Some(hop_idx) => RouteOutcome::FailedAtHop(hop_idx),
			None => RouteOutcome::RecipientRejected,
		};
		self.mission_control.report_outcome(&route, outcome);

		if entry.payment.status.is_final() {
			log_trace!(logger, "Recorded late failure of attempt {} of {} payment {}", attempt_id, entry.payment.status, payment_hash);
			let _ = self.persist(&entry.payment);
			return Ok(false);
		}

		if entry.retry.is_none() {
			if entry.payment.inflight_attempts() == 0 {
				let reason = match failure {
					AttemptFailure::Recipient => PaymentFailureReason::RecipientRejected,
					_ => PaymentFailureReason::AttemptFailed,
				};
				self.fail_payment(entry, reason);
			} else {
				self.persist_and_notify(entry);
			}
			return Ok(false);
		}

		if failure == AttemptFailure::Recipient {
			self.fail_payment(entry, PaymentFailureReason::RecipientRejected);
			return Ok(false);
		}
		let failed_hop = failure.failed_hop().and_then(|hop_idx| route.hops.get(hop_idx));
		if let (Some(ctx), Some(hop)) = (entry.retry.as_mut(), failed_hop) {
			ctx.route_params.excluded_channels.push(hop.short_channel_id);
			log_debug!(logger, "Excluding channel {} from further attempts of payment {}, now excluding {}",
				hop.short_channel_id, payment_hash, log_iter!(ctx.route_params.excluded_channels.iter()));
		}
		self.persist_and_notify(entry);
		Ok(true)
	}

	/// Reports that the recipient settled the given attempt.
	///
	/// The payment becomes [`PaymentStatus::Succeeded`] unless it already reached a final state,
	/// in which case only the attempt is updated. Reporting an outcome for an attempt which
	/// was already resolved is a no-op.
	pub fn attempt_succeeded(
		&self, payment_hash: &PaymentHash, attempt_id: u64, preimage: PaymentPreimage
	) -> Result<(), APIError> {
		if PaymentHash::from(preimage) != *payment_hash {
			return Err(APIError::InvalidRequest { err: "Preimage does not match the payment hash".to_owned() });
		}
		let entry = self.entry(payment_hash)?;
		let mut entry = entry.lock().unwrap();
		let logger = WithContext::from(&self.logger, None, Some(*payment_hash));
		let route = match entry.payment.attempts.iter_mut().find(|attempt| attempt.attempt_id == attempt_id) {
			None => return Err(APIError::InvalidRequest {
				err: format!("Payment {} has no attempt {}", payment_hash, attempt_id)
			}),
			Some(attempt) if !attempt.is_in_flight() => {
				log_trace!(logger, "Ignoring repeated outcome of attempt {} of payment {}", attempt_id, payment_hash);
				return Ok(());
			},
			Some(attempt) => {
				attempt.status = AttemptStatus::Succeeded { preimage, resolve_time: T::duration_since_epoch() };
				attempt.route.clone()
			},
		};
		self.mission_control.report_outcome(&route, RouteOutcome::Succeeded);

		if entry.payment.status.is_final() {
			log_trace!(logger, "Recorded late success of attempt {} of {} payment {}", attempt_id, entry.payment.status, payment_hash);
			let _ = self.persist(&entry.payment);
			return Ok(());
		}
		entry.payment.status = PaymentStatus::Succeeded;
		entry.payment.preimage = Some(preimage);
		entry.payment.failure_reason = None;
		log_info!(logger, "Payment {} succeeded after {} attempts, paying {} msat in fees",
			payment_hash, entry.payment.attempts.len(), route.total_fees());
		self.persist_and_notify(&mut entry);
		Ok(())
	}

	/// Reports that the given attempt failed.
	///
	/// The failure is fed to mission control first. A payment we drive ourselves is then retried
	/// over a route avoiding the failed channel, unless the recipient rejected it. A payment sent
	/// to explicit routes fails once none of its attempts is in flight anymore. Reporting an
	/// outcome for an attempt which was already resolved is a no-op.
	pub fn attempt_failed(
		&self, payment_hash: &PaymentHash, attempt_id: u64, failure: AttemptFailure
	) -> Result<(), APIError> {
		let entry = self.entry(payment_hash)?;
		let retry = {
			let mut locked = entry.lock().unwrap();
			self.resolve_failed_attempt(&mut locked, attempt_id, failure)?
		};
		if retry {
			self.drive_payment(&entry);
		}
		Ok(())
	}

	/// Records and dispatches one attempt over a caller-provided route, returning as soon as it
	/// was handed to the [`PaymentDispatcher`].
	///
	/// Several attempts may be sent for the same payment hash as long as the payment was started
	/// through this method and has not reached a final state. The payment is created on the
	/// first attempt, for the amount the route delivers.
	pub fn begin_route_attempt(&self, payment_hash: &PaymentHash, route: Route) -> SendToRouteResult {
		if route.hops.is_empty() {
			return SendToRouteResult::failed(APIError::InvalidRequest { err: "Route must contain at least one hop".to_owned() });
		}
		if route.source != self.our_node_id {
			return SendToRouteResult::failed(APIError::InvalidRequest { err: "Route does not start at our node".to_owned() });
		}
		if let Err(e) = check_amount(route.final_value_msat()) {
			return SendToRouteResult::failed(e);
		}
		let logger = WithContext::from(&self.logger, None, Some(*payment_hash));

		let (entry, attempt_id) = {
			let mut payments = self.payments.lock().unwrap();
			if self.is_shutting_down() {
				return SendToRouteResult::failed(APIError::ShuttingDown);
			}
			let entry = match payments.get(payment_hash) {
				Some(entry) => Arc::clone(entry),
				None => {
					match self.store.read_payment(payment_hash) {
						Ok(Some(existing)) => return SendToRouteResult::failed(duplicate_error(&existing)),
						Ok(None) => {},
						Err(e) => return SendToRouteResult::failed(e.into()),
					}
					let payment = Payment {
						payment_hash: *payment_hash,
						value_msat: route.final_value_msat(),
						creation_time: T::duration_since_epoch(),
						status: PaymentStatus::Created,
						failure_reason: None,
						preimage: None,
						attempts: Vec::new(),
						controller_driven: false,
						request: None,
					};
					if let Err(e) = self.persist(&payment) {
						return SendToRouteResult::failed(e);
					}
					log_info!(logger, "Initiated payment {} of {} msat to an explicit route", payment_hash, payment.value_msat);
					let entry = Arc::new(Mutex::new(PaymentEntry { payment, retry: None, subscribers: Vec::new() }));
					payments.insert(*payment_hash, Arc::clone(&entry));
					entry
				},
			};

			let mut locked = entry.lock().unwrap();
			if locked.payment.status.is_final() || locked.payment.controller_driven {
				return SendToRouteResult::failed(duplicate_error(&locked.payment));
			}
			let attempt_id = self.next_attempt_id.next();
			let previous_status = locked.payment.status;
			locked.payment.attempts.push(HtlcAttempt {
				attempt_id, route: route.clone(), attempt_time: T::duration_since_epoch(), status: AttemptStatus::InFlight,
			});
			locked.payment.status = PaymentStatus::InFlight;
			if let Err(e) = self.persist(&locked.payment) {
				locked.payment.attempts.pop();
				locked.payment.status = previous_status;
				if locked.payment.attempts.is_empty() {
					payments.remove(payment_hash);
				}
				return SendToRouteResult::failed(e);
			}
			log_debug!(logger, "Launching attempt {} of payment {} over {}", attempt_id, payment_hash, log_route!(route));
			notify_subscribers(&mut locked);
			drop(locked);
			(entry, attempt_id)
		};

		match self.dispatcher.dispatch(payment_hash, attempt_id, &route) {
			Ok(()) => {
				let attempt = entry.lock().unwrap().payment.attempt(attempt_id).cloned();
				SendToRouteResult { attempt, error: None }
			},
			Err(e) => {
				log_debug!(logger, "Failed to dispatch attempt {} of payment {}: {:?}", attempt_id, payment_hash, e);
				let mut locked = entry.lock().unwrap();
				let _ = self.resolve_failed_attempt(&mut locked, attempt_id, AttemptFailure::Dispatch);
				SendToRouteResult { attempt: locked.payment.attempt(attempt_id).cloned(), error: Some(e) }
			},
		}
	}

	/// Sends one attempt over a caller-provided route and blocks until its outcome is known.
	///
	/// See [`Self::begin_route_attempt`] for the rules on which payments accept new attempts.
	/// If we shut down while waiting, the in-flight attempt is returned together with
	/// [`APIError::ShuttingDown`].
	pub fn send_to_route(&self, payment_hash: &PaymentHash, route: Route) -> SendToRouteResult {
		let started = self.begin_route_attempt(payment_hash, route);
		let attempt_id = match (&started.attempt, &started.error) {
			(Some(attempt), None) if attempt.is_in_flight() => attempt.attempt_id,
			_ => return started,
		};
		let mut subscription = match self.track_payment(payment_hash, false) {
			Ok(subscription) => subscription,
			Err(e) => return SendToRouteResult { attempt: started.attempt, error: Some(e) },
		};
		let mut attempt = started.attempt;
		while let Some(update) = subscription.wait_next() {
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

	/// Subscribes to the state of a payment.
	///
	/// The first update is the payment's current state, every update after that is a state
	/// transition, in order. The stream ends after the payment reaches a final state. With
	/// `no_inflight_updates` set, only the final state is delivered.
	///
	/// Payments not known in memory are looked up in the [`PaymentStore`]. One which has not
	/// reached a final state is resumed as by [`Self::resume_payments`].
	pub fn track_payment(&self, payment_hash: &PaymentHash, no_inflight_updates: bool) -> Result<PaymentSubscription, APIError> {
		let (entry, reloaded) = {
			let mut payments = self.payments.lock().unwrap();
			if self.is_shutting_down() {
				return Err(APIError::ShuttingDown);
			}
			match payments.get(payment_hash) {
				Some(entry) => (Arc::clone(entry), false),
				None => {
					let payment = self.store.read_payment(payment_hash)?.ok_or(APIError::PaymentNotFound)?;
					if payment.status.is_final() {
						let queue = Arc::new(UpdateQueue::new());
						queue.push(payment);
						queue.close();
						return Ok(Subscription::new(queue));
					}
					(self.load_persisted(&mut payments, payment), true)
				},
			}
		};
		let queue = Arc::new(UpdateQueue::new());
		{
			let mut locked = entry.lock().unwrap();
			let is_final = locked.payment.status.is_final();
			if is_final || !no_inflight_updates {
				queue.push(locked.payment.clone());
			}
			if is_final {
				queue.close();
			} else {
				locked.subscribers.push(Subscriber { queue: Arc::clone(&queue), no_inflight_updates });
			}
		}
		if reloaded {
			let logger = WithContext::from(&self.logger, None, Some(*payment_hash));
			log_info!(logger, "Resuming payment {} on its first subscription", payment_hash);
			self.continue_payment(&entry);
		}
		Ok(Subscription::new(queue))
	}

	/// Returns the current state of a payment.
	pub fn payment(&self, payment_hash: &PaymentHash) -> Result<Option<Payment>, APIError> {
		if let Some(entry) = self.payments.lock().unwrap().get(payment_hash) {
			return Ok(Some(entry.lock().unwrap().payment.clone()));
		}
		Ok(self.store.read_payment(payment_hash)?)
	}

	/// Returns every payment we know of, in memory or persisted, oldest first.
	pub fn list_payments(&self) -> Result<Vec<Payment>, APIError> {
		let mut by_hash: HashMap<PaymentHash, Payment> = new_hash_map();
		for payment in self.store.read_payments()? {
			by_hash.insert(payment.payment_hash, payment);
		}
		for (payment_hash, entry) in self.payments.lock().unwrap().iter() {
			by_hash.insert(*payment_hash, entry.lock().unwrap().payment.clone());
		}
		let mut payments: Vec<Payment> = by_hash.into_iter().map(|(_, payment)| payment).collect();
		payments.sort_unstable_by(|a, b| a.creation_time.cmp(&b.creation_time).then(a.payment_hash.0.cmp(&b.payment_hash.0)));
		Ok(payments)
	}

	/// Loads every payment which has not reached a final state from the [`PaymentStore`] and
	/// continues driving it. Outcomes of attempts dispatched before the restart may then be
	/// reported as usual.
	///
	/// Payments sent to explicit routes with no attempt left in flight are failed, payments we
	/// drive ourselves with no attempt left in flight get a new attempt if their retry budget
	/// allows. Payments already in memory are skipped, so calling this again is harmless.
	/// Returns the number of payments resumed.
	pub fn resume_payments(&self) -> Result<usize, APIError> {
		let persisted = self.store.read_payments()?;
		let mut resumed = Vec::new();
		{
			let mut payments = self.payments.lock().unwrap();
			if self.is_shutting_down() {
				return Err(APIError::ShuttingDown);
			}
			for payment in persisted {
				if let Some(max_attempt_id) = payment.attempts.iter().map(|attempt| attempt.attempt_id).max() {
					self.next_attempt_id.bump_past(max_attempt_id);
				}
				if payment.status.is_final() || payments.contains_key(&payment.payment_hash) {
					continue;
				}
				resumed.push(self.load_persisted(&mut payments, payment));
			}
		}
		log_info!(self.logger, "Resuming {} payments", resumed.len());

		for entry in resumed.iter() {
			self.continue_payment(entry);
		}
		Ok(resumed.len())
	}

	/// Stops accepting new payments and subscriptions and terminates every open subscription
	/// with [`APIError::ShuttingDown`].
	///
	/// Outcomes of attempts already dispatched are still recorded, but no new attempts are
	/// launched. Payments left in flight can be picked up by [`Self::resume_payments`] after a
	/// restart.
	pub fn shutdown(&self) {
		self.shutting_down.store(true, Ordering::Release);
		let payments = self.payments.lock().unwrap();
		let mut terminated = 0;
		for entry in payments.values() {
			let mut entry = entry.lock().unwrap();
			for subscriber in entry.subscribers.drain(..) {
				subscriber.queue.fail(APIError::ShuttingDown);
				terminated += 1;
			}
		}
		log_info!(self.logger, "Payment controller shutting down, terminated {} subscriptions", terminated);
	}
}
