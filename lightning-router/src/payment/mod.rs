// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Outbound payments: the records the [`PaymentController`] keeps for every payment hash and the
//! seams through which attempts leave and outcomes come back.
//!
//! [`PaymentController`]: controller::PaymentController

pub mod controller;
pub mod store;

use crate::routing::gossip::NodeId;
use crate::routing::router::Route;
use crate::types::{PaymentHash, PaymentPreimage};
use crate::util::errors::APIError;
use crate::util::ser::{DecodeError, Readable, Writeable, Writer};

use crate::prelude::*;

use core::fmt;
use core::time::Duration;
use std::io;

/// Strategies available to retry payment path failures.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Retry {
	/// Max number of attempts to retry payment.
	///
	/// Each attempt may be multiple HTLCs along multiple paths if the router decides to split up a
	/// retry, and may retry multiple failed HTLCs at once if they failed around the same time and
	/// were retried along a route from a single call to [`find_route`].
	///
	/// [`find_route`]: crate::routing::router::find_route
	Attempts(u32),
	/// Time elapsed before abandoning retries for a payment. At least one attempt at payment is made;
	/// see [`PaymentConfig::default_retry`] for the default.
	///
	/// [`PaymentConfig::default_retry`]: crate::util::config::PaymentConfig::default_retry
	Timeout(Duration),
}

impl Retry {
	/// Whether another attempt may be made after `attempts` attempts, for a payment created at
	/// `creation_time`.
	pub(crate) fn is_retryable_now(&self, attempts: u32, creation_time: Duration, now: Duration) -> bool {
		match *self {
			Retry::Attempts(max_retry_count) => attempts <= max_retry_count,
			Retry::Timeout(max_duration) => now.saturating_sub(creation_time) < max_duration,
		}
	}
}

/// The state of a [`Payment`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PaymentStatus {
	/// The payment was accepted but no attempt was made yet.
	Created,
	/// At least one attempt is, or may soon be, in flight.
	InFlight,
	/// An attempt was settled by the recipient. Final.
	Succeeded,
	/// No further attempts will be made and none succeeded. Final.
	Failed,
}

impl PaymentStatus {
	/// Whether the status can never change again.
	pub fn is_final(&self) -> bool {
		match self {
			PaymentStatus::Succeeded | PaymentStatus::Failed => true,
			PaymentStatus::Created | PaymentStatus::InFlight => false,
		}
	}
}

/// Why a payment ended [`PaymentStatus::Failed`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PaymentFailureReason {
	/// Route search found no path satisfying the payment's constraints.
	NoRoute,
	/// The recipient rejected the payment.
	RecipientRejected,
	/// The retry budget ran out before an attempt succeeded.
	RetriesExhausted,
	/// An attempt sent to an explicit route failed and no other attempt is in flight.
	AttemptFailed,
}

/// Where an attempt failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AttemptFailure {
	/// The channel at `hop_index` of the attempt's route could not forward the HTLC.
	Channel {
		/// The index in [`Route::hops`] of the hop the failing channel leads to.
		hop_index: usize,
	},
	/// The recipient rejected the HTLC.
	Recipient,
	/// The HTLC could not be handed to our first hop.
	Dispatch,
}

impl AttemptFailure {
	/// The index of the hop which failed to forward, or `None` if the HTLC reached the recipient.
	pub fn failed_hop(&self) -> Option<usize> {
		match self {
			AttemptFailure::Channel { hop_index } => Some(*hop_index),
			AttemptFailure::Dispatch => Some(0),
			AttemptFailure::Recipient => None,
		}
	}
}

/// The state of one [`HtlcAttempt`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AttemptStatus {
	/// The HTLC was dispatched and its outcome is not known yet.
	InFlight,
	/// The recipient settled the HTLC.
	Succeeded {
		/// The preimage the recipient revealed
		preimage: PaymentPreimage,
		/// When the outcome was learned
		resolve_time: Duration,
	},
	/// The HTLC failed.
	Failed {
		/// Where it failed
		failure: AttemptFailure,
		/// When the outcome was learned
		resolve_time: Duration,
	},
}

/// A single HTLC sent over one route as part of a payment.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct HtlcAttempt {
	/// Identifies the attempt. Unique across all payments of a controller.
	pub attempt_id: u64,
	/// The route the HTLC was sent over
	pub route: Route,
	/// When the HTLC was dispatched
	pub attempt_time: Duration,
	/// What is known about the attempt's outcome
	pub status: AttemptStatus,
}

impl HtlcAttempt {
	/// Whether the attempt's outcome is still unknown.
	pub fn is_in_flight(&self) -> bool {
		self.status == AttemptStatus::InFlight
	}
}

/// Everything known about the payment of one payment hash.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Payment {
	/// The payment hash identifying the payment
	pub payment_hash: PaymentHash,
	/// The amount the recipient should receive
	pub value_msat: u64,
	/// When the payment was first initiated
	pub creation_time: Duration,
	/// The current state of the payment
	pub status: PaymentStatus,
	/// Set once the payment has [`PaymentStatus::Failed`]
	pub failure_reason: Option<PaymentFailureReason>,
	/// Set once the payment has [`PaymentStatus::Succeeded`]
	pub preimage: Option<PaymentPreimage>,
	/// Every attempt made, in the order they were made
	pub attempts: Vec<HtlcAttempt>,
	/// Whether the controller finds routes and retries for this payment itself, as opposed to
	/// attempts being sent to explicit routes by the caller.
	pub controller_driven: bool,
	/// The request a controller driven payment was initiated with, kept so that retries can
	/// continue after a restart.
	pub request: Option<PaymentRequest>,
}

impl Payment {
	/// Returns the attempt with the given id.
	pub fn attempt(&self, attempt_id: u64) -> Option<&HtlcAttempt> {
		self.attempts.iter().find(|attempt| attempt.attempt_id == attempt_id)
	}

	/// The number of attempts whose outcome is still unknown.
	pub fn inflight_attempts(&self) -> usize {
		self.attempts.iter().filter(|attempt| attempt.is_in_flight()).count()
	}

	/// The fees paid by the attempt which succeeded, if any.
	pub fn fee_msat(&self) -> Option<u64> {
		self.attempts.iter()
			.find(|attempt| matches!(attempt.status, AttemptStatus::Succeeded { .. }))
			.map(|attempt| attempt.route.total_fees())
	}
}

impl fmt::Display for PaymentStatus {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		match self {
			PaymentStatus::Created => f.write_str("created"),
			PaymentStatus::InFlight => f.write_str("in flight"),
			PaymentStatus::Succeeded => f.write_str("succeeded"),
			PaymentStatus::Failed => f.write_str("failed"),
		}
	}
}

/// A request to pay `amount_msat` to `payee`, finding routes and retrying as needed.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PaymentRequest {
	/// The payment hash the recipient expects
	pub payment_hash: PaymentHash,
	/// The recipient
	pub payee: NodeId,
	/// The amount the recipient should receive
	pub amount_msat: u64,
	/// The CLTV delta the recipient requires. Defaults to
	/// [`PaymentConfig::default_final_cltv_expiry_delta`].
	///
	/// [`PaymentConfig::default_final_cltv_expiry_delta`]: crate::util::config::PaymentConfig::default_final_cltv_expiry_delta
	pub final_cltv_expiry_delta: Option<u32>,
	/// The most we are willing to pay in fees on any single attempt. No limit if `None`.
	pub max_total_routing_fee_msat: Option<u64>,
	/// The largest total time lock we accept. Defaults to
	/// [`PaymentConfig::default_max_total_cltv_expiry_delta`].
	///
	/// [`PaymentConfig::default_max_total_cltv_expiry_delta`]: crate::util::config::PaymentConfig::default_max_total_cltv_expiry_delta
	pub max_total_cltv_expiry_delta: Option<u32>,
	/// If set, every attempt must leave over this channel of ours.
	pub first_hop: Option<u64>,
	/// How long to keep retrying. Defaults to [`PaymentConfig::default_retry`].
	///
	/// [`PaymentConfig::default_retry`]: crate::util::config::PaymentConfig::default_retry
	pub retry: Option<Retry>,
}

impl PaymentRequest {
	/// A request with every optional constraint left at its default.
	pub fn new(payment_hash: PaymentHash, payee: NodeId, amount_msat: u64) -> Self {
		Self {
			payment_hash, payee, amount_msat,
			final_cltv_expiry_delta: None,
			max_total_routing_fee_msat: None,
			max_total_cltv_expiry_delta: None,
			first_hop: None,
			retry: None,
		}
	}
}

/// Hands HTLCs to the network.
///
/// `dispatch` must not block waiting for the HTLC's outcome. The outcome is reported later
/// through [`PaymentController::attempt_succeeded`] or [`PaymentController::attempt_failed`].
/// Returning an error means the HTLC never left us.
///
/// [`PaymentController::attempt_succeeded`]: controller::PaymentController::attempt_succeeded
/// [`PaymentController::attempt_failed`]: controller::PaymentController::attempt_failed
pub trait PaymentDispatcher {
	/// Sends an HTLC for `payment_hash` over `route`, identified by `attempt_id`.
	fn dispatch(&self, payment_hash: &PaymentHash, attempt_id: u64, route: &Route) -> Result<(), APIError>;
}

impl<D: PaymentDispatcher + ?Sized, T: core::ops::Deref<Target = D>> PaymentDispatcher for T {
	fn dispatch(&self, payment_hash: &PaymentHash, attempt_id: u64, route: &Route) -> Result<(), APIError> {
		self.deref().dispatch(payment_hash, attempt_id, route)
	}
}

macro_rules! impl_writeable_unit_enum {
	($ty: ident, $($variant: ident => $id: expr),*) => {
		impl Writeable for $ty {
			fn write<W: Writer>(&self, w: &mut W) -> Result<(), io::Error> {
				let id: u8 = match self { $($ty::$variant => $id),* };
				id.write(w)
			}
		}
		impl Readable for $ty {
			fn read<R: io::Read>(r: &mut R) -> Result<Self, DecodeError> {
				let id: u8 = Readable::read(r)?;
				match id {
					$($id => Ok($ty::$variant),)*
					_ => Err(DecodeError::InvalidValue),
				}
			}
		}
	}
}

impl_writeable_unit_enum!(PaymentStatus, Created => 0, InFlight => 1, Succeeded => 2, Failed => 3);
impl_writeable_unit_enum!(PaymentFailureReason, NoRoute => 0, RecipientRejected => 1, RetriesExhausted => 2, AttemptFailed => 3);

impl Writeable for AttemptFailure {
	fn write<W: Writer>(&self, w: &mut W) -> Result<(), io::Error> {
		match self {
			AttemptFailure::Channel { hop_index } => {
				0u8.write(w)?;
				(*hop_index as u64).write(w)
			},
			AttemptFailure::Recipient => 1u8.write(w),
			AttemptFailure::Dispatch => 2u8.write(w),
		}
	}
}

impl Readable for AttemptFailure {
	fn read<R: io::Read>(r: &mut R) -> Result<Self, DecodeError> {
		let id: u8 = Readable::read(r)?;
		match id {
			0 => {
				let hop_index: u64 = Readable::read(r)?;
				let hop_index = usize::try_from(hop_index).map_err(|_| DecodeError::InvalidValue)?;
				Ok(AttemptFailure::Channel { hop_index })
			},
			1 => Ok(AttemptFailure::Recipient),
			2 => Ok(AttemptFailure::Dispatch),
			_ => Err(DecodeError::InvalidValue),
		}
	}
}

impl Writeable for AttemptStatus {
	fn write<W: Writer>(&self, w: &mut W) -> Result<(), io::Error> {
		match self {
			AttemptStatus::InFlight => 0u8.write(w),
			AttemptStatus::Succeeded { preimage, resolve_time } => {
				1u8.write(w)?;
				preimage.write(w)?;
				resolve_time.write(w)
			},
			AttemptStatus::Failed { failure, resolve_time } => {
				2u8.write(w)?;
				failure.write(w)?;
				resolve_time.write(w)
			},
		}
	}
}

impl Readable for AttemptStatus {
	fn read<R: io::Read>(r: &mut R) -> Result<Self, DecodeError> {
		let id: u8 = Readable::read(r)?;
		match id {
			0 => Ok(AttemptStatus::InFlight),
			1 => Ok(AttemptStatus::Succeeded { preimage: Readable::read(r)?, resolve_time: Readable::read(r)? }),
			2 => Ok(AttemptStatus::Failed { failure: Readable::read(r)?, resolve_time: Readable::read(r)? }),
			_ => Err(DecodeError::InvalidValue),
		}
	}
}

impl Writeable for HtlcAttempt {
	fn write<W: Writer>(&self, w: &mut W) -> Result<(), io::Error> {
		self.attempt_id.write(w)?;
		self.route.write(w)?;
		self.attempt_time.write(w)?;
		self.status.write(w)
	}
}

impl Readable for HtlcAttempt {
	fn read<R: io::Read>(r: &mut R) -> Result<Self, DecodeError> {
		Ok(HtlcAttempt {
			attempt_id: Readable::read(r)?,
			route: Readable::read(r)?,
			attempt_time: Readable::read(r)?,
			status: Readable::read(r)?,
		})
	}
}

impl Writeable for Retry {
	fn write<W: Writer>(&self, w: &mut W) -> Result<(), io::Error> {
		match self {
			Retry::Attempts(attempts) => {
				0u8.write(w)?;
				attempts.write(w)
			},
			Retry::Timeout(duration) => {
				1u8.write(w)?;
				duration.write(w)
			},
		}
	}
}

impl Readable for Retry {
	fn read<R: io::Read>(r: &mut R) -> Result<Self, DecodeError> {
		let id: u8 = Readable::read(r)?;
		match id {
			0 => Ok(Retry::Attempts(Readable::read(r)?)),
			1 => Ok(Retry::Timeout(Readable::read(r)?)),
			_ => Err(DecodeError::InvalidValue),
		}
	}
}

impl Writeable for PaymentRequest {
	fn write<W: Writer>(&self, w: &mut W) -> Result<(), io::Error> {
		self.payment_hash.write(w)?;
		self.payee.write(w)?;
		self.amount_msat.write(w)?;
		self.final_cltv_expiry_delta.write(w)?;
		self.max_total_routing_fee_msat.write(w)?;
		self.max_total_cltv_expiry_delta.write(w)?;
		self.first_hop.write(w)?;
		self.retry.write(w)
	}
}

impl Readable for PaymentRequest {
	fn read<R: io::Read>(r: &mut R) -> Result<Self, DecodeError> {
		Ok(PaymentRequest {
			payment_hash: Readable::read(r)?,
			payee: Readable::read(r)?,
			amount_msat: Readable::read(r)?,
			final_cltv_expiry_delta: Readable::read(r)?,
			max_total_routing_fee_msat: Readable::read(r)?,
			max_total_cltv_expiry_delta: Readable::read(r)?,
			first_hop: Readable::read(r)?,
			retry: Readable::read(r)?,
		})
	}
}

const SERIALIZATION_VERSION: u8 = 1;
const MIN_SERIALIZATION_VERSION: u8 = 1;

impl Writeable for Payment {
	fn write<W: Writer>(&self, w: &mut W) -> Result<(), io::Error> {
		write_ver_prefix!(w, SERIALIZATION_VERSION, MIN_SERIALIZATION_VERSION);
		self.payment_hash.write(w)?;
		self.value_msat.write(w)?;
		self.creation_time.write(w)?;
		self.status.write(w)?;
		self.failure_reason.write(w)?;
		self.preimage.write(w)?;
		self.attempts.write(w)?;
		self.controller_driven.write(w)?;
		self.request.write(w)
	}
}

impl Readable for Payment {
	fn read<R: io::Read>(r: &mut R) -> Result<Self, DecodeError> {
		let _ver = read_ver_prefix!(r, SERIALIZATION_VERSION);
		let payment = Payment {
			payment_hash: Readable::read(r)?,
			value_msat: Readable::read(r)?,
			creation_time: Readable::read(r)?,
			status: Readable::read(r)?,
			failure_reason: Readable::read(r)?,
			preimage: Readable::read(r)?,
			attempts: Readable::read(r)?,
			controller_driven: Readable::read(r)?,
			request: Readable::read(r)?,
		};
		if payment.status == PaymentStatus::Succeeded && payment.preimage.is_none() {
			return Err(DecodeError::InvalidValue);
		}
		Ok(payment)
	}
}
