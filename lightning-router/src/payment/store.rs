// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Durable storage of [`Payment`] records so that payments can be resumed after a restart.
//!
//! Implement [`KVStore`] to get a [`PaymentStore`] for free. Payments are then stored under the
//! [`PAYMENT_NAMESPACE`] namespace, keyed by the hex-encoded payment hash.

use crate::payment::Payment;
use crate::types::PaymentHash;
use crate::util::ser::{Readable, Writeable};

use crate::prelude::*;

use std::io;

/// The namespace payments are stored under in a [`KVStore`].
pub const PAYMENT_NAMESPACE: &str = "payments";

/// Trait for a key-value store for persisting some writeable object at some key.
///
/// Implementing `KVStore` provides an auto-implementation of [`PaymentStore`].
pub trait KVStore {
	/// Returns the data stored for `key`, failing with [`io::ErrorKind::NotFound`] if nothing
	/// was stored.
	fn read(&self, namespace: &str, key: &str) -> Result<Vec<u8>, io::Error>;
	/// Stores `buf` at `key`, replacing anything stored before. Must only return once the data
	/// is durably stored.
	fn write(&self, namespace: &str, key: &str, buf: &[u8]) -> Result<(), io::Error>;
	/// Lists every key stored in `namespace`.
	fn list(&self, namespace: &str) -> Result<Vec<String>, io::Error>;
}

/// Trait that handles persisting [`Payment`]s, returning an error if persistence failed.
///
/// Every write stores the full record, so writing the same state twice is harmless.
pub trait PaymentStore {
	/// Persists the given payment, replacing any earlier version of it.
	fn persist_payment(&self, payment: &Payment) -> Result<(), io::Error>;
	/// Reads the payment with the given hash, if one was persisted.
	fn read_payment(&self, payment_hash: &PaymentHash) -> Result<Option<Payment>, io::Error>;
	/// Reads every persisted payment.
	fn read_payments(&self) -> Result<Vec<Payment>, io::Error>;
}

fn decode_payment(buf: &[u8]) -> Result<Payment, io::Error> {
	let mut reader = io::Cursor::new(buf);
	Ok(Payment::read(&mut reader)?)
}

impl<K: KVStore + ?Sized> PaymentStore for K {
	fn persist_payment(&self, payment: &Payment) -> Result<(), io::Error> {
		let key = payment.payment_hash.to_string();
		self.write(PAYMENT_NAMESPACE, &key, &payment.encode())
	}

	fn read_payment(&self, payment_hash: &PaymentHash) -> Result<Option<Payment>, io::Error> {
		match self.read(PAYMENT_NAMESPACE, &payment_hash.to_string()) {
			Ok(buf) => decode_payment(&buf).map(Some),
			Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
			Err(e) => Err(e),
		}
	}

	fn read_payments(&self) -> Result<Vec<Payment>, io::Error> {
		let mut payments = Vec::new();
		for key in self.list(PAYMENT_NAMESPACE)? {
			let buf = self.read(PAYMENT_NAMESPACE, &key)?;
			payments.push(decode_payment(&buf)?);
		}
		Ok(payments)
	}
}
