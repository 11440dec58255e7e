// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Error types live here.

use crate::prelude::*;

use core::fmt;

/// Indicates an error on the client's part or a condition which prevented the request from
/// completing.
///
/// Each variant is a distinct kind so callers can decide between retrying, treating the request
/// as a no-op and giving up without inspecting the message.
#[derive(Clone, PartialEq, Eq)]
pub enum APIError {
	/// No path satisfying every constraint of the request exists in the known graph.
	NoRouteFound {
		/// A human-readable error message
		err: String,
	},
	/// The request was malformed, e.g. an identifier of the wrong length, an out-of-range amount
	/// or a missing route.
	InvalidRequest {
		/// A human-readable error message
		err: String,
	},
	/// A payment with the same hash is currently being attempted.
	PaymentAlreadyInFlight,
	/// A payment with the same hash has already succeeded.
	PaymentAlreadyPaid,
	/// A payment with the same hash has already failed. Failed payments are final and are not
	/// restarted.
	PaymentAlreadyFailed,
	/// No payment with the given hash was ever initiated.
	PaymentNotFound,
	/// An HTLC interceptor session is already active.
	InterceptorAlreadyExists,
	/// The operation was aborted because we are shutting down.
	ShuttingDown,
	/// The durable payment store failed to persist or load a payment.
	PersistenceFailure {
		/// A human-readable error message
		err: String,
	},
}

impl fmt::Debug for APIError {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		match *self {
			APIError::NoRouteFound { ref err } => write!(f, "No route found: {}", err),
			APIError::InvalidRequest { ref err } => write!(f, "Invalid request: {}", err),
			APIError::PaymentAlreadyInFlight => f.write_str("A payment with this hash is already in flight"),
			APIError::PaymentAlreadyPaid => f.write_str("A payment with this hash has already been paid"),
			APIError::PaymentAlreadyFailed => f.write_str("A payment with this hash has already failed"),
			APIError::PaymentNotFound => f.write_str("No payment with this hash was initiated"),
			APIError::InterceptorAlreadyExists => f.write_str("An HTLC interceptor session is already active"),
			APIError::ShuttingDown => f.write_str("Shutting down"),
			APIError::PersistenceFailure { ref err } => write!(f, "Failed to persist payment: {}", err),
		}
	}
}

impl fmt::Display for APIError {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		fmt::Debug::fmt(self, f)
	}
}

impl std::error::Error for APIError {}

impl From<std::io::Error> for APIError {
	fn from(e: std::io::Error) -> Self {
		APIError::PersistenceFailure { err: e.to_string() }
	}
}

#[cfg(test)]
mod tests {
	use super::APIError;

	#[test]
	fn error_kinds_are_distinguishable() {
		assert_ne!(APIError::PaymentAlreadyInFlight, APIError::PaymentAlreadyPaid);
		assert_eq!(format!("{:?}", APIError::NoRouteFound { err: "exhausted".to_owned() }), "No route found: exhausted");
		let io_err = std::io::Error::new(std::io::ErrorKind::Other, "disk full");
		match APIError::from(io_err) {
			APIError::PersistenceFailure { err } => assert_eq!(err, "disk full"),
			_ => panic!(),
		}
	}
}
