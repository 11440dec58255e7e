// Pruned copy of crate rust log, without global logger
// https://github.com/rust-lang-nursery/log #7a60286
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Log traits live here, which are called throughout the library to provide useful information for
//! debugging purposes.
//!
//! Log messages should be filtered client-side by implementing check against a given [`Record`]'s
//! [`Level`] field. Each module may have its own Logger or share one.

use core::cmp;
use core::fmt;
use core::fmt::Display;
use core::ops::Deref;

use crate::routing::gossip::NodeId;
use crate::types::PaymentHash;

static LOG_LEVEL_NAMES: [&'static str; 6] = ["GOSSIP", "TRACE", "DEBUG", "INFO", "WARN", "ERROR"];

/// An enum representing the available verbosity levels of the logger.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Hash)]
pub enum Level {
	/// Designates extremely verbose information, such as per-edge search decisions
	Gossip,
	/// Designates very low priority, often extremely verbose, information
	Trace,
	/// Designates lower priority information
	Debug,
	/// Designates useful information
	Info,
	/// Designates hazardous situations
	Warn,
	/// Designates very serious errors
	Error,
}

impl PartialOrd for Level {
	#[inline]
	fn partial_cmp(&self, other: &Level) -> Option<cmp::Ordering> {
		Some(self.cmp(other))
	}
}

impl Ord for Level {
	#[inline]
	fn cmp(&self, other: &Level) -> cmp::Ordering {
		(*self as usize).cmp(&(*other as usize))
	}
}

impl fmt::Display for Level {
	fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
		fmt.pad(LOG_LEVEL_NAMES[*self as usize])
	}
}

/// The least severe level whose records are compiled in, as selected by the `max_level_*`
/// features. `None` if logging is compiled out entirely.
const LEAST_SEVERE_COMPILED_LEVEL: Option<Level> =
	if cfg!(feature = "max_level_off") { None }
	else if cfg!(feature = "max_level_error") { Some(Level::Error) }
	else if cfg!(feature = "max_level_warn") { Some(Level::Warn) }
	else if cfg!(feature = "max_level_info") { Some(Level::Info) }
	else if cfg!(feature = "max_level_debug") { Some(Level::Debug) }
	else if cfg!(feature = "max_level_trace") { Some(Level::Trace) }
	else { Some(Level::Gossip) };

impl Level {
	/// Returns the most verbose logging level.
	#[inline]
	pub fn max() -> Level {
		Level::Gossip
	}

	/// Whether records at this level survive the `max_level_*` features the crate was built
	/// with. The log macros do not even format records for which this is false.
	#[inline]
	pub fn is_compiled_in(self) -> bool {
		match LEAST_SEVERE_COMPILED_LEVEL {
			Some(least_severe) => self >= least_severe,
			None => false,
		}
	}
}

/// A Record, unit of logging output with Metadata to enable filtering
/// Module_path, file, line to inform on log's source
#[derive(Clone, Debug)]
pub struct Record<'a> {
	/// The verbosity level of the message.
	pub level: Level,
	/// The node the logged record pertains to, if any. Since it is not repeated in the message
	/// body, include it in the log output so entries remain clear.
	pub node_id: Option<NodeId>,
	/// The payment hash the logged record pertains to, if any.
	///
	/// Note that this is only filled in for logs pertaining to a specific payment, and will be
	/// `None` for logs which are not directly related to a payment.
	pub payment_hash: Option<PaymentHash>,
	/// The message body.
	pub args: fmt::Arguments<'a>,
	/// The module path of the message.
	pub module_path: &'static str,
	/// The source file containing the message.
	pub file: &'static str,
	/// The line containing the message.
	pub line: u32,
}

impl<'a> Record<'a> {
	/// Returns a new Record.
	#[inline]
	pub fn new(
		level: Level, node_id: Option<NodeId>, payment_hash: Option<PaymentHash>,
		args: fmt::Arguments<'a>, module_path: &'static str, file: &'static str, line: u32,
	) -> Record<'a> {
		Record { level, node_id, payment_hash, args, module_path, file, line }
	}
}

impl<'a> Display for Record<'a> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{:<5} [{}:{}] {}", self.level, self.module_path, self.line, self.args)?;
		match (self.node_id, self.payment_hash) {
			(Some(node_id), Some(payment_hash)) => write!(f, " [n:{} h:{}]", node_id, payment_hash),
			(Some(node_id), None) => write!(f, " [n:{}]", node_id),
			(None, Some(payment_hash)) => write!(f, " [h:{}]", payment_hash),
			(None, None) => Ok(()),
		}
	}
}

/// A trait encapsulating the operations required of a logger. Keep in mind that log messages might
/// not be entirely self-explanatory and may need accompanying context fields to be fully
/// understood.
pub trait Logger {
	/// Logs the [`Record`]. Since [`Record::node_id`] and [`Record::payment_hash`] are not embedded
	/// in the message body, log implementations should print those alongside the message.
	fn log(&self, record: Record);
}

/// Adds relevant context to a [`Record`] before passing it to the wrapped [`Logger`].
pub struct WithContext<'a, L: Deref>
where
	L::Target: Logger,
{
	logger: &'a L,
	node_id: Option<NodeId>,
	payment_hash: Option<PaymentHash>,
}

impl<'a, L: Deref> Logger for WithContext<'a, L>
where
	L::Target: Logger,
{
	fn log(&self, mut record: Record) {
		if self.node_id.is_some() {
			record.node_id = self.node_id;
		}
		if self.payment_hash.is_some() {
			record.payment_hash = self.payment_hash;
		}
		self.logger.log(record)
	}
}

impl<'a, L: Deref> WithContext<'a, L>
where
	L::Target: Logger,
{
	/// Wraps the given logger, providing additional context to any logged records.
	pub fn from(logger: &'a L, node_id: Option<NodeId>, payment_hash: Option<PaymentHash>) -> Self {
		WithContext { logger, node_id, payment_hash }
	}
}

/// Wrapper for logging byte slices in hex format.
#[doc(hidden)]
pub struct DebugBytes<'a>(pub &'a [u8]);
impl<'a> core::fmt::Display for DebugBytes<'a> {
	fn fmt(&self, f: &mut core::fmt::Formatter) -> Result<(), core::fmt::Error> {
		for i in self.0 {
			write!(f, "{:02x}", i)?;
		}
		Ok(())
	}
}

/// Wrapper for logging `Iterator`s.
#[doc(hidden)]
pub struct DebugIter<T: fmt::Display, I: core::iter::Iterator<Item = T> + Clone>(pub I);
impl<T: fmt::Display, I: core::iter::Iterator<Item = T> + Clone> fmt::Display for DebugIter<T, I> {
	fn fmt(&self, f: &mut fmt::Formatter) -> Result<(), fmt::Error> {
		write!(f, "[")?;
		let mut iter = self.0.clone();
		if let Some(item) = iter.next() {
			write!(f, "{}", item)?;
		}
		for item in iter {
			write!(f, ", {}", item)?;
		}
		write!(f, "]")?;
		Ok(())
	}
}
