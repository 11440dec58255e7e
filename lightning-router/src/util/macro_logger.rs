// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

use crate::routing::router::Route;

use core::fmt;

macro_rules! log_iter {
	($obj: expr) => {
		$crate::util::logger::DebugIter($obj)
	};
}

/// Logs a byte slice in hex format.
#[macro_export]
macro_rules! log_bytes {
	($obj: expr) => {
		$crate::util::logger::DebugBytes(&$obj)
	};
}

/// Displays a [`Route`] as its source followed by one bracketed entry per hop.
pub(crate) struct DebugRoute<'a>(pub &'a Route);
impl<'a> fmt::Display for DebugRoute<'a> {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f, "{} hop route from {}", self.0.hops.len(), self.0.source)?;
		for hop in self.0.hops.iter() {
			write!(f, " [{} via {}: {} msat, +{} blocks]",
				hop.node_id, hop.short_channel_id, hop.fee_msat, hop.cltv_expiry_delta)?;
		}
		Ok(())
	}
}

macro_rules! log_route {
	($obj: expr) => {
		$crate::util::macro_logger::DebugRoute(&$obj)
	};
}

/// Builds a [`Record`] without any context and hands it to the logger. Not meant to be used
/// directly, but exported so that the level macros work from other crates.
///
/// [`Record`]: crate::util::logger::Record
#[doc(hidden)]
#[macro_export]
macro_rules! log_internal {
	($logger: expr, $lvl: expr, $($arg: tt)+) => {
		$logger.log($crate::util::logger::Record::new(
			$lvl, None, None, format_args!($($arg)+), module_path!(), file!(), line!()
		))
	};
}

/// Logs at `$lvl` unless the `max_level_*` features compiled that level out.
#[doc(hidden)]
#[macro_export]
macro_rules! log_given_level {
	($logger: expr, $lvl: expr, $($arg: tt)+) => {
		if $lvl.is_compiled_in() {
			$crate::log_internal!($logger, $lvl, $($arg)+)
		}
	};
}

/// Log at the `ERROR` level.
#[macro_export]
macro_rules! log_error {
	($logger: expr, $($arg: tt)*) => {
		$crate::log_given_level!($logger, $crate::util::logger::Level::Error, $($arg)*)
	};
}

/// Log at the `WARN` level.
#[macro_export]
macro_rules! log_warn {
	($logger: expr, $($arg: tt)*) => {
		$crate::log_given_level!($logger, $crate::util::logger::Level::Warn, $($arg)*)
	};
}

/// Log at the `INFO` level.
#[macro_export]
macro_rules! log_info {
	($logger: expr, $($arg: tt)*) => {
		$crate::log_given_level!($logger, $crate::util::logger::Level::Info, $($arg)*)
	};
}

/// Log at the `DEBUG` level.
#[macro_export]
macro_rules! log_debug {
	($logger: expr, $($arg: tt)*) => {
		$crate::log_given_level!($logger, $crate::util::logger::Level::Debug, $($arg)*)
	};
}

/// Log at the `TRACE` level.
#[macro_export]
macro_rules! log_trace {
	($logger: expr, $($arg: tt)*) => {
		$crate::log_given_level!($logger, $crate::util::logger::Level::Trace, $($arg)*)
	};
}

/// Log at the `GOSSIP` level, used for per-edge decisions of the route search and graph updates.
#[macro_export]
macro_rules! log_gossip {
	($logger: expr, $($arg: tt)*) => {
		$crate::log_given_level!($logger, $crate::util::logger::Level::Gossip, $($arg)*)
	};
}
