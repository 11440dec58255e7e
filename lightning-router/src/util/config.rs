// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Various user-configurable routing, mission control and payment settings which the
//! [`MissionControl`], [`find_route`] and [`PaymentController`] apply for you.
//!
//! [`MissionControl`]: crate::routing::mission_control::MissionControl
//! [`find_route`]: crate::routing::router::find_route
//! [`PaymentController`]: crate::payment::controller::PaymentController

use core::time::Duration;

use crate::payment::Retry;

/// Parameters of the success probability model used by [`MissionControl`].
///
/// Default::default() provides sane defaults.
///
/// [`MissionControl`]: crate::routing::mission_control::MissionControl
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct MissionControlConfig {
	/// The success probability assumed for a pair we have never observed, for any amount.
	///
	/// Values outside `[0, 1]` are clamped.
	///
	/// Default value: 0.6
	pub prior_probability: f64,
	/// The time after which a recorded success or failure only carries half of its original
	/// weight. Observations fade towards [`Self::prior_probability`] rather than expiring.
	///
	/// A zero half-life makes observations carry no weight once any time has passed.
	///
	/// Default value: 1 hour
	pub decay_half_life: Duration,
}

impl Default for MissionControlConfig {
	fn default() -> MissionControlConfig {
		MissionControlConfig {
			prior_probability: 0.6,
			decay_half_life: Duration::from_secs(60 * 60),
		}
	}
}

/// Parameters applied while searching for a route.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct RouterConfig {
	/// The cost, in msat, we are willing to pay to avoid a failed attempt. An edge with success
	/// probability `p` is weighted as its fee plus `attempt_penalty_msat * (1 - p) / p`, so a
	/// cheap but unreliable channel loses against a slightly more expensive reliable one.
	///
	/// Default value: 100_000 msat
	pub attempt_penalty_msat: u64,
	/// Edges whose success probability is below this value are not considered at all.
	///
	/// Default value: 0.01
	pub min_probability: f64,
	/// The maximum number of hops a route may have.
	///
	/// Default value: 20
	pub max_path_length: u8,
}

impl Default for RouterConfig {
	fn default() -> RouterConfig {
		RouterConfig {
			attempt_penalty_msat: 100_000,
			min_probability: 0.01,
			max_path_length: 20,
		}
	}
}

/// Defaults applied to payment requests which leave the corresponding field unset.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PaymentConfig {
	/// The CLTV delta required by the recipient.
	///
	/// Default value: 40
	pub default_final_cltv_expiry_delta: u32,
	/// The maximum total CLTV delta a route may lock our funds for.
	///
	/// Default value: 2016 (two weeks of blocks)
	pub default_max_total_cltv_expiry_delta: u32,
	/// How persistently we retry a payment after a failed attempt.
	///
	/// Default value: [`Retry::Attempts`] of 10
	pub default_retry: Retry,
}

impl Default for PaymentConfig {
	fn default() -> PaymentConfig {
		PaymentConfig {
			default_final_cltv_expiry_delta: 40,
			default_max_total_cltv_expiry_delta: 2016,
			default_retry: Retry::Attempts(10),
		}
	}
}

/// Top-level config which holds the routing, mission control and payment configs.
///
/// Default::default() provides sane defaults for most configurations.
#[derive(Copy, Clone, Debug, PartialEq, Default)]
pub struct UserConfig {
	/// Mission control probability model parameters.
	pub mission_control: MissionControlConfig,
	/// Route search parameters.
	pub router: RouterConfig,
	/// Payment request defaults.
	pub payment: PaymentConfig,
}
