// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Routing and forwarding-decision engine for a Lightning node.
//!
//! The crate is split along the lines of the data flow of a payment:
//!  * [`routing::mission_control::MissionControl`] learns per-pair success probabilities from
//!    payment outcomes,
//!  * [`routing::router::find_route`] searches the [`routing::gossip::ChannelGraph`] for a path
//!    weighted by fee and by those probabilities,
//!  * [`payment::controller::PaymentController`] drives payments through their attempts and
//!    exposes their progress to subscribers,
//!  * [`intercept::ForwardInterceptor`] lets a single external session hold and resolve HTLCs we
//!    are about to forward.
//!
//! Nothing here talks to the network or to disk directly. The HTLC dispatch, the default
//! forwarding pipeline and durable storage are traits implemented by the user.

#![deny(rustdoc::broken_intra_doc_links)]
#![deny(rustdoc::private_intra_doc_links)]

#![deny(missing_docs)]
#![cfg_attr(docsrs, feature(doc_auto_cfg))]

pub extern crate bitcoin;

#[macro_use]
pub mod util;
pub mod intercept;
pub mod payment;
pub mod routing;
pub mod types;

pub(crate) mod sync;

mod prelude {
	#![allow(unused_imports)]
	pub use alloc::{boxed::Box, string::String, string::ToString, vec, vec::Vec};

	pub use alloc::borrow::ToOwned;

	pub use crate::util::hash_tables::*;
}

extern crate alloc;
