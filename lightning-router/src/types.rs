// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Identifiers shared by payments and forwarded HTLCs.

use bitcoin::hashes::sha256::Hash as Sha256;
use bitcoin::hashes::Hash;

use crate::util::ser::{DecodeError, Readable, Writeable, Writer};

use std::io::{self, Read};

/// The payment hash is the hash of the [`PaymentPreimage`] which is the value used to lock funds
/// in HTLCs while they transit the lightning network. It identifies one logical payment across
/// all of its attempts.
#[derive(Hash, Copy, Clone, PartialEq, Eq, Debug, Ord, PartialOrd)]
pub struct PaymentHash(pub [u8; 32]);

impl core::fmt::Display for PaymentHash {
	fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
		crate::util::logger::DebugBytes(&self.0).fmt(f)
	}
}

impl PaymentHash {
	/// Parses a payment hash from raw bytes, failing unless exactly 32 bytes are given.
	pub fn from_slice(bytes: &[u8]) -> Result<Self, DecodeError> {
		let hash: [u8; 32] = bytes.try_into().map_err(|_| DecodeError::InvalidValue)?;
		Ok(PaymentHash(hash))
	}
}

/// The payment preimage is the "secret key" which is revealed by the recipient to settle the
/// HTLCs of a payment.
#[derive(Hash, Copy, Clone, PartialEq, Eq, Debug, Ord, PartialOrd)]
pub struct PaymentPreimage(pub [u8; 32]);

impl core::fmt::Display for PaymentPreimage {
	fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
		crate::util::logger::DebugBytes(&self.0).fmt(f)
	}
}

/// Converts a `PaymentPreimage` into a `PaymentHash` by hashing the preimage with SHA256.
impl From<PaymentPreimage> for PaymentHash {
	fn from(value: PaymentPreimage) -> Self {
		PaymentHash(Sha256::hash(&value.0).to_byte_array())
	}
}

/// An identifier used to correlate a forwarded HTLC held by the interceptor with the resolution
/// the interceptor later sends for it.
#[derive(Hash, Copy, Clone, PartialEq, Eq, Debug, Ord, PartialOrd)]
pub struct InterceptId(pub [u8; 32]);

impl InterceptId {
	/// Derives the id of the HTLC with index `htlc_index` received over the channel
	/// `incoming_channel_id`.
	pub fn from_incoming_htlc(incoming_channel_id: u64, htlc_index: u64) -> Self {
		let mut preimage = [0u8; 16];
		preimage[..8].copy_from_slice(&incoming_channel_id.to_be_bytes());
		preimage[8..].copy_from_slice(&htlc_index.to_be_bytes());
		InterceptId(Sha256::hash(&preimage).to_byte_array())
	}
}

impl core::fmt::Display for InterceptId {
	fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
		crate::util::logger::DebugBytes(&self.0).fmt(f)
	}
}

macro_rules! impl_writeable_byte_newtype {
	($ty: ident) => {
		impl Writeable for $ty {
			fn write<W: Writer>(&self, w: &mut W) -> Result<(), io::Error> {
				self.0.write(w)
			}
		}
		impl Readable for $ty {
			fn read<R: Read>(r: &mut R) -> Result<Self, DecodeError> {
				Ok($ty(Readable::read(r)?))
			}
		}
	}
}

impl_writeable_byte_newtype!(PaymentHash);
impl_writeable_byte_newtype!(PaymentPreimage);
impl_writeable_byte_newtype!(InterceptId);

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn preimage_hashes_to_payment_hash() {
		let preimage = PaymentPreimage([0; 32]);
		// SHA256 of 32 zero bytes.
		assert_eq!(PaymentHash::from(preimage).to_string(),
			"66687aadf862bd776c8fc18b8e9f8e20089714856ee233b3902a591d0d5f2925");
	}

	#[test]
	fn payment_hash_from_slice_checks_length() {
		assert!(PaymentHash::from_slice(&[1; 31]).is_err());
		assert_eq!(PaymentHash::from_slice(&[1; 32]), Ok(PaymentHash([1; 32])));
	}

	#[test]
	fn intercept_ids_differ_per_htlc() {
		assert_ne!(InterceptId::from_incoming_htlc(1, 0), InterceptId::from_incoming_htlc(1, 1));
		assert_eq!(InterceptId::from_incoming_htlc(5, 9), InterceptId::from_incoming_htlc(5, 9));
	}
}
