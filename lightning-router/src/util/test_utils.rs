// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

use crate::intercept::{ForwardResolution, ForwardingPipeline, HeldForward};
use crate::payment::PaymentDispatcher;
use crate::payment::store::KVStore;
use crate::prelude::*;
use crate::routing::gossip::NodeId;
use crate::routing::router::Route;
use crate::sync::{Condvar, Mutex};
use crate::types::PaymentHash;
use crate::util::errors::APIError;
use crate::util::logger::{Level, Logger, Record};

use std::collections::VecDeque;
use std::io;

pub struct TestLogger {
	level: Level,
	id: String,
	pub lines: Mutex<HashMap<(String, String), usize>>,
	pub last_context: Mutex<(Option<NodeId>, Option<PaymentHash>)>,
}

impl TestLogger {
	pub fn new() -> TestLogger {
		Self::with_id("".to_owned())
	}
	pub fn with_id(id: String) -> TestLogger {
		TestLogger {
			level: Level::Trace,
			id,
			lines: Mutex::new(new_hash_map()),
			last_context: Mutex::new((None, None)),
		}
	}
	pub fn enable(&mut self, level: Level) {
		self.level = level;
	}
	pub fn assert_log(&self, module: &str, line: String, count: usize) {
		let log_entries = self.lines.lock().unwrap();
		assert_eq!(log_entries.get(&(module.to_string(), line)), Some(&count));
	}

	/// Search for the number of occurrence of the logged lines which
	/// 1. belongs to the specified module and
	/// 2. contains `line` in it.
	/// And asserts if the number of occurrences is the same with the given `count`
	pub fn assert_log_contains(&self, module: &str, line: &str, count: usize) {
		let log_entries = self.lines.lock().unwrap();
		let l: usize = log_entries.iter().filter(|&(&(ref m, ref l), _c)| {
			m == module && l.contains(line)
		}).map(|(_, c)| { c }).sum();
		assert_eq!(l, count)
	}

	/// Search for the number of occurrences of logged lines which
	/// 1. belong to the specified module and
	/// 2. match the given regex pattern.
	/// Assert that the number of occurrences equals the given `count`
	pub fn assert_log_regex(&self, module: &str, pattern: regex::Regex, count: usize) {
		let log_entries = self.lines.lock().unwrap();
		let l: usize = log_entries.iter().filter(|&(&(ref m, ref l), _c)| {
			m == module && pattern.is_match(&l)
		}).map(|(_, c)| { c }).sum();
		assert_eq!(l, count)
	}
}

impl Logger for TestLogger {
	fn log(&self, record: Record) {
		*self.lines.lock().unwrap().entry((record.module_path.to_string(), format!("{}", record.args))).or_insert(0) += 1;
		*self.last_context.lock().unwrap() = (record.node_id, record.payment_hash);
		if record.level >= self.level {
			println!("{:<5} {} [{} : {}, {}] {}", record.level.to_string(), self.id, record.module_path, record.file, record.line, record.args);
		}
	}
}

/// An in-memory [`KVStore`] whose writes can be made to fail.
pub struct TestStore {
	entries: Mutex<HashMap<(String, String), Vec<u8>>>,
	pub fail_writes: Mutex<bool>,
	pub write_count: Mutex<usize>,
	/// While set, writes block until [`Self::release_writes`] is called.
	pub hold_writes: Mutex<bool>,
	writes_released: Condvar,
}

impl TestStore {
	pub fn new() -> Self {
		Self {
			entries: Mutex::new(new_hash_map()),
			fail_writes: Mutex::new(false),
			write_count: Mutex::new(0),
			hold_writes: Mutex::new(false),
			writes_released: Condvar::new(),
		}
	}

	pub fn release_writes(&self) {
		*self.hold_writes.lock().unwrap() = false;
		self.writes_released.notify_all();
	}

	pub fn raw(&self, namespace: &str, key: &str) -> Option<Vec<u8>> {
		self.entries.lock().unwrap().get(&(namespace.to_string(), key.to_string())).cloned()
	}
}

impl KVStore for TestStore {
	fn read(&self, namespace: &str, key: &str) -> Result<Vec<u8>, io::Error> {
		self.raw(namespace, key).ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "key not found"))
	}

	fn write(&self, namespace: &str, key: &str, buf: &[u8]) -> Result<(), io::Error> {
		let mut held = self.hold_writes.lock().unwrap();
		while *held {
			held = self.writes_released.wait(held).unwrap();
		}
		drop(held);
		if *self.fail_writes.lock().unwrap() {
			return Err(io::Error::new(io::ErrorKind::Other, "write failed"));
		}
		*self.write_count.lock().unwrap() += 1;
		self.entries.lock().unwrap().insert((namespace.to_string(), key.to_string()), buf.to_vec());
		Ok(())
	}

	fn list(&self, namespace: &str) -> Result<Vec<String>, io::Error> {
		let entries = self.entries.lock().unwrap();
		let mut keys: Vec<String> = entries.keys().filter(|(ns, _)| ns == namespace).map(|(_, key)| key.clone()).collect();
		keys.sort();
		Ok(keys)
	}
}

/// A [`PaymentDispatcher`] which records every dispatched attempt and optionally rejects some.
pub struct TestDispatcher {
	pub dispatched: Mutex<Vec<(PaymentHash, u64, Route)>>,
	pub next_results: Mutex<VecDeque<Result<(), APIError>>>,
}

impl TestDispatcher {
	pub fn new() -> Self {
		Self { dispatched: Mutex::new(Vec::new()), next_results: Mutex::new(VecDeque::new()) }
	}

	pub fn fail_next_dispatch(&self, err: APIError) {
		self.next_results.lock().unwrap().push_back(Err(err));
	}

	/// The attempt ids dispatched so far for `payment_hash`.
	pub fn attempt_ids(&self, payment_hash: &PaymentHash) -> Vec<u64> {
		self.dispatched.lock().unwrap().iter()
			.filter(|(hash, _, _)| hash == payment_hash)
			.map(|(_, attempt_id, _)| *attempt_id)
			.collect()
	}

	pub fn last_route(&self) -> Option<Route> {
		self.dispatched.lock().unwrap().last().map(|(_, _, route)| route.clone())
	}
}

impl PaymentDispatcher for TestDispatcher {
	fn dispatch(&self, payment_hash: &PaymentHash, attempt_id: u64, route: &Route) -> Result<(), APIError> {
		self.dispatched.lock().unwrap().push((*payment_hash, attempt_id, route.clone()));
		self.next_results.lock().unwrap().pop_front().unwrap_or(Ok(()))
	}
}

/// A [`ForwardingPipeline`] which records how each held forward was resolved.
pub struct TestPipeline {
	pub resolved: Mutex<Vec<(HeldForward, ForwardResolution)>>,
}

impl TestPipeline {
	pub fn new() -> Self {
		Self { resolved: Mutex::new(Vec::new()) }
	}
}

impl ForwardingPipeline for TestPipeline {
	fn resolve_forward(&self, forward: HeldForward, resolution: ForwardResolution) {
		self.resolved.lock().unwrap().push((forward, resolution));
	}
}
