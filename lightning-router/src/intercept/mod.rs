// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Lets a single external session hold HTLCs we are about to forward and decide their fate.
//!
//! While an [`InterceptorSession`] is open, every forward offered to
//! [`ForwardInterceptor::intercept_forward`] is held until the session resolves it. Forwards
//! still held when the session ends are handed back to the [`ForwardingPipeline`] with
//! [`ForwardResolution::Resume`], so nothing stays stuck once the session is gone.

use crate::sync::{Arc, Mutex};
use crate::types::{InterceptId, PaymentHash, PaymentPreimage};
use crate::util::atomic_counter::AtomicCounter;
use crate::util::errors::APIError;
use crate::util::logger::{Logger, WithContext};
use crate::util::wakers::{Recv, Subscription, UpdateQueue};

use crate::prelude::*;

use core::mem;
use core::ops::Deref;
use core::task::Poll;
use core::time::Duration;

/// An HTLC we were asked to forward, held until the active [`InterceptorSession`] decides what
/// to do with it.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct HeldForward {
	/// Identifies the forward when resolving it. See [`InterceptId::from_incoming_htlc`].
	pub intercept_id: InterceptId,
	/// The channel the HTLC was received over
	pub incoming_channel_id: u64,
	/// The index of the HTLC in the incoming channel
	pub incoming_htlc_index: u64,
	/// The channel the HTLC is supposed to leave over
	pub outgoing_channel_id: u64,
	/// The payment hash used for this HTLC.
	pub payment_hash: PaymentHash,
	/// How many msats were received on the inbound edge of this HTLC.
	pub incoming_amount_msat: u64,
	/// How many msats the payer intended to route to the next node.
	pub outgoing_amount_msat: u64,
	/// The block height at which the incoming HTLC expires
	pub incoming_expiry: u32,
	/// The block height at which the outgoing HTLC would expire
	pub outgoing_expiry: u32,
}

/// What to do with a [`HeldForward`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ForwardResolution {
	/// Settle the incoming HTLC with the given preimage without forwarding it.
	Settle {
		/// The preimage of the HTLC's payment hash
		preimage: PaymentPreimage,
	},
	/// Fail the incoming HTLC back.
	Fail,
	/// Forward the HTLC as if it had never been intercepted.
	Resume,
}

/// The node's autonomous forwarding logic, which carries out the fate of every forward once it
/// is no longer held.
pub trait ForwardingPipeline {
	/// Carries out `resolution` for `forward`.
	fn resolve_forward(&self, forward: HeldForward, resolution: ForwardResolution);
}

impl<F: ForwardingPipeline + ?Sized, T: Deref<Target = F>> ForwardingPipeline for T {
	fn resolve_forward(&self, forward: HeldForward, resolution: ForwardResolution) {
		self.deref().resolve_forward(forward, resolution)
	}
}

/// An event describing what happened to an intercepted forward, as delivered by
/// [`ForwardInterceptor::subscribe_htlc_events`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HtlcEvent {
	/// A forward was handed to the active session and is now held.
	Intercepted(HeldForward),
	/// The session resolved a held forward.
	Resolved {
		/// The forward's id
		intercept_id: InterceptId,
		/// What the session decided
		resolution: ForwardResolution,
	},
	/// A held forward was resumed because its session ended before resolving it.
	Released {
		/// The forward's id
		intercept_id: InterceptId,
	},
}

enum SessionState {
	Idle,
	Active {
		session_id: u64,
		held: HashMap<InterceptId, HeldForward>,
		feed: Arc<UpdateQueue<HeldForward>>,
	},
	ShuttingDown,
}

/// Hands forwards to at most one [`InterceptorSession`] at a time.
///
/// Opening a second session while one is open fails with [`APIError::InterceptorAlreadyExists`]
/// and leaves the open one untouched. The slot is freed whenever the open session ends, be it
/// by [`InterceptorSession::close`], by dropping it or by [`Self::shutdown`].
pub struct ForwardInterceptor<P: Deref, L: Deref>
where
	P::Target: ForwardingPipeline,
	L::Target: Logger,
{
	pipeline: P,
	logger: L,
	state: Mutex<SessionState>,
	next_session_id: AtomicCounter,
	event_queues: Mutex<Vec<Arc<UpdateQueue<HtlcEvent>>>>,
}

impl<P: Deref, L: Deref> ForwardInterceptor<P, L>
where
	P::Target: ForwardingPipeline,
	L::Target: Logger,
{
	/// Constructs an interceptor with no open session. Forwards not held by a session, and
	/// forwards released when a session ends, are passed to `pipeline`.
	pub fn new(pipeline: P, logger: L) -> Self {
		Self {
			pipeline,
			logger,
			state: Mutex::new(SessionState::Idle),
			next_session_id: AtomicCounter::new(),
			event_queues: Mutex::new(Vec::new()),
		}
	}

	/// Opens the interception session.
	///
	/// Fails with [`APIError::InterceptorAlreadyExists`] if a session is open and with
	/// [`APIError::ShuttingDown`] once [`Self::shutdown`] was called.
	pub fn open_session(&self) -> Result<InterceptorSession<'_, P, L>, APIError> {
		let mut state = self.state.lock().unwrap();
		match &*state {
			SessionState::Active { session_id, .. } => {
				log_debug!(self.logger, "Rejecting HTLC interceptor session, session {} is still open", session_id);
				Err(APIError::InterceptorAlreadyExists)
			},
			SessionState::ShuttingDown => Err(APIError::ShuttingDown),
			SessionState::Idle => {
				let session_id = self.next_session_id.next();
				let feed = Arc::new(UpdateQueue::new());
				*state = SessionState::Active { session_id, held: new_hash_map(), feed: Arc::clone(&feed) };
				log_info!(self.logger, "Opened HTLC interceptor session {}", session_id);
				Ok(InterceptorSession { interceptor: self, session_id, feed: Subscription::new(feed) })
			},
		}
	}

	/// Offers a forward to the open session.
	///
	/// Returns true if the session now holds it, in which case it will eventually be passed to
	/// the [`ForwardingPipeline`] with the session's resolution, or with
	/// [`ForwardResolution::Resume`] if the session ends first. Returns false if no session is
	/// open, in which case the caller should forward the HTLC autonomously.
	pub fn intercept_forward(&self, forward: HeldForward) -> bool {
		let mut state = self.state.lock().unwrap();
		let (session_id, held, feed) = match &mut *state {
			SessionState::Active { session_id, held, feed } => (*session_id, held, feed),
			_ => return false,
		};
		let logger = WithContext::from(&self.logger, None, Some(forward.payment_hash));
		if held.contains_key(&forward.intercept_id) {
			log_trace!(logger, "Forward {} is already held by session {}", forward.intercept_id, session_id);
			return true;
		}
		if !feed.push(forward.clone()) {
			return false;
		}
		log_debug!(logger, "Holding forward {} of {} msat from channel {} to channel {} for session {}",
			forward.intercept_id, forward.outgoing_amount_msat, forward.incoming_channel_id,
			forward.outgoing_channel_id, session_id);
		held.insert(forward.intercept_id, forward.clone());
		drop(state);
		self.push_event(HtlcEvent::Intercepted(forward));
		true
	}

	/// The number of forwards currently held by the open session.
	pub fn held_forwards(&self) -> usize {
		match &*self.state.lock().unwrap() {
			SessionState::Active { held, .. } => held.len(),
			_ => 0,
		}
	}

	fn resolve(&self, session_id: u64, intercept_id: &InterceptId, resolution: ForwardResolution) -> Result<(), APIError> {
		let forward = {
			let mut state = self.state.lock().unwrap();
			match &mut *state {
				SessionState::Active { session_id: active_id, held, .. } if *active_id == session_id => {
					held.remove(intercept_id).ok_or_else(|| APIError::InvalidRequest {
						err: format!("No forward with intercept id {} is held", intercept_id)
					})?
				},
				_ => return Err(APIError::ShuttingDown),
			}
		};
		if let ForwardResolution::Settle { preimage } = resolution {
			if PaymentHash::from(preimage) != forward.payment_hash {
				log_warn!(self.logger, "Settling forward {} with a preimage not matching its payment hash", intercept_id);
			}
		}
		let logger = WithContext::from(&self.logger, None, Some(forward.payment_hash));
		log_debug!(logger, "Session {} resolved forward {}: {:?}", session_id, intercept_id, resolution);
		self.pipeline.resolve_forward(forward, resolution);
		self.push_event(HtlcEvent::Resolved { intercept_id: *intercept_id, resolution });
		Ok(())
	}

	fn release(&self, held: HashMap<InterceptId, HeldForward>) {
		let mut forwards: Vec<HeldForward> = held.into_iter().map(|(_, forward)| forward).collect();
		forwards.sort_unstable_by_key(|forward| (forward.incoming_channel_id, forward.incoming_htlc_index));
		for forward in forwards {
			let intercept_id = forward.intercept_id;
			self.pipeline.resolve_forward(forward, ForwardResolution::Resume);
			self.push_event(HtlcEvent::Released { intercept_id });
		}
	}

	fn close_session(&self, session_id: u64) {
		let held = {
			let mut state = self.state.lock().unwrap();
			match &*state {
				SessionState::Active { session_id: active_id, .. } if *active_id == session_id => {},
				_ => return,
			}
			match mem::replace(&mut *state, SessionState::Idle) {
				SessionState::Active { held, feed, .. } => {
					feed.close();
					held
				},
				_ => return,
			}
		};
		log_info!(self.logger, "Closed HTLC interceptor session {}, resuming {} held forwards", session_id, held.len());
		self.release(held);
	}

	/// Ends the open session, if any, resuming its held forwards, and rejects every new session.
	///
	/// The session's feed of forwards and every HTLC event subscription end with
	/// [`APIError::ShuttingDown`].
	pub fn shutdown(&self) {
		let previous = mem::replace(&mut *self.state.lock().unwrap(), SessionState::ShuttingDown);
		if let SessionState::Active { session_id, held, feed } = previous {
			feed.fail(APIError::ShuttingDown);
			log_info!(self.logger, "Shutting down HTLC interceptor session {}, resuming {} held forwards", session_id, held.len());
			self.release(held);
		}
		for queue in self.event_queues.lock().unwrap().drain(..) {
			queue.fail(APIError::ShuttingDown);
		}
	}

	/// Subscribes to [`HtlcEvent`]s of every session opened from now on.
	pub fn subscribe_htlc_events(&self) -> Result<Subscription<HtlcEvent>, APIError> {
		let state = self.state.lock().unwrap();
		if let SessionState::ShuttingDown = *state {
			return Err(APIError::ShuttingDown);
		}
		let queue = Arc::new(UpdateQueue::new());
		self.event_queues.lock().unwrap().push(Arc::clone(&queue));
		Ok(Subscription::new(queue))
	}

	fn push_event(&self, event: HtlcEvent) {
		self.event_queues.lock().unwrap().retain(|queue| queue.push(event.clone()));
	}
}

/// The open interception session of a [`ForwardInterceptor`].
///
/// Dropping the session closes it.
pub struct InterceptorSession<'a, P: Deref, L: Deref>
where
	P::Target: ForwardingPipeline,
	L::Target: Logger,
{
	interceptor: &'a ForwardInterceptor<P, L>,
	session_id: u64,
	feed: Subscription<HeldForward>,
}

impl<'a, P: Deref, L: Deref> InterceptorSession<'a, P, L>
where
	P::Target: ForwardingPipeline,
	L::Target: Logger,
{
	/// Identifies the session in logs.
	pub fn session_id(&self) -> u64 {
		self.session_id
	}

	/// Resolves once a forward is held for this session, the session ends (`None`) or we shut
	/// down (`Some(Err(APIError::ShuttingDown))`).
	pub fn next_forward(&mut self) -> Recv<'_, HeldForward> {
		self.feed.next()
	}

	/// Blocks until a forward is held for this session or the session ends.
	pub fn wait_next_forward(&mut self) -> Option<Result<HeldForward, APIError>> {
		self.feed.wait_next()
	}

	/// Waits at most `max_wait` for the next forward, returning [`Poll::Pending`] on timeout.
	pub fn wait_next_forward_timeout(&mut self, max_wait: Duration) -> Poll<Option<Result<HeldForward, APIError>>> {
		self.feed.wait_next_timeout(max_wait)
	}

	/// Resolves a held forward, in any order relative to other held forwards.
	///
	/// Fails with [`APIError::InvalidRequest`] if no forward with that id is held, which includes
	/// forwards already resolved, and with [`APIError::ShuttingDown`] if the session was ended
	/// by [`ForwardInterceptor::shutdown`].
	pub fn resolve(&self, intercept_id: &InterceptId, resolution: ForwardResolution) -> Result<(), APIError> {
		self.interceptor.resolve(self.session_id, intercept_id, resolution)
	}

	/// Closes the session, resuming every forward it still holds.
	pub fn close(self) {}
}

impl<'a, P: Deref, L: Deref> Drop for InterceptorSession<'a, P, L>
where
	P::Target: ForwardingPipeline,
	L::Target: Logger,
{
	fn drop(&mut self) {
		self.interceptor.close_session(self.session_id);
	}
}
