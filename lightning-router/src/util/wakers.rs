// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Utilities which allow users to block on, or `await`, the next update produced by the crate,
//! such as a payment state transition or a forward held for the interceptor.
//!
//! Both blocking waiters (via a [`Condvar`]) and async tasks (via [`Waker`]s) are supported so
//! that no particular runtime is required.

use crate::prelude::*;
use crate::sync::{Arc, Condvar, Mutex, MutexGuard};
use crate::util::errors::APIError;

use core::future::Future as StdFuture;
use core::mem;
use core::pin::Pin;
use core::task::{Context, Poll, Waker};
use core::time::Duration;
use std::collections::VecDeque;
use std::time::Instant;

enum Terminal {
	Open,
	Closed,
	Failed(APIError),
}

struct QueueState<T> {
	items: VecDeque<T>,
	terminal: Terminal,
	receiver_connected: bool,
	wakers: Vec<Waker>,
}

impl<T> QueueState<T> {
	fn take_next(&mut self) -> Poll<Option<Result<T, APIError>>> {
		if let Some(item) = self.items.pop_front() {
			return Poll::Ready(Some(Ok(item)));
		}
		match mem::replace(&mut self.terminal, Terminal::Closed) {
			Terminal::Open => {
				self.terminal = Terminal::Open;
				Poll::Pending
			},
			Terminal::Closed => Poll::Ready(None),
			Terminal::Failed(e) => Poll::Ready(Some(Err(e))),
		}
	}
}

/// A FIFO of updates from a single producer to a single receiver which can be closed normally or
/// with an error.
///
/// Receivers see every pushed item in order followed by the end of the stream. Failing the queue
/// discards items which have not yet been received so the error is observed next.
pub(crate) struct UpdateQueue<T> {
	state: Mutex<QueueState<T>>,
	condvar: Condvar,
}

impl<T> UpdateQueue<T> {
	pub(crate) fn new() -> Self {
		Self {
			state: Mutex::new(QueueState {
				items: VecDeque::new(),
				terminal: Terminal::Open,
				receiver_connected: true,
				wakers: Vec::new(),
			}),
			condvar: Condvar::new(),
		}
	}

	/// Queues an item, returning false if the queue was closed or the receiver went away.
	pub(crate) fn push(&self, item: T) -> bool {
		let mut state = self.state.lock().unwrap();
		if !state.receiver_connected || !matches!(state.terminal, Terminal::Open) {
			return false;
		}
		state.items.push_back(item);
		self.wake(state);
		true
	}

	/// Ends the stream once all queued items have been received.
	pub(crate) fn close(&self) {
		let mut state = self.state.lock().unwrap();
		if matches!(state.terminal, Terminal::Open) {
			state.terminal = Terminal::Closed;
		}
		self.wake(state);
	}

	/// Ends the stream with the given error, dropping any items not yet received.
	pub(crate) fn fail(&self, err: APIError) {
		let mut state = self.state.lock().unwrap();
		if matches!(state.terminal, Terminal::Open) {
			state.items.clear();
			state.terminal = Terminal::Failed(err);
		}
		self.wake(state);
	}

	/// Whether the producer may stop tracking this queue.
	pub(crate) fn is_finished(&self) -> bool {
		let state = self.state.lock().unwrap();
		!state.receiver_connected || !matches!(state.terminal, Terminal::Open)
	}

	fn disconnect(&self) {
		let mut state = self.state.lock().unwrap();
		state.receiver_connected = false;
		state.items.clear();
	}

	fn wake(&self, mut state: MutexGuard<QueueState<T>>) {
		let wakers = mem::take(&mut state.wakers);
		mem::drop(state);
		self.condvar.notify_all();
		for waker in wakers {
			waker.wake();
		}
	}

	fn wait_next(&self) -> Option<Result<T, APIError>> {
		let mut state = self.state.lock().unwrap();
		loop {
			if let Poll::Ready(res) = state.take_next() {
				return res;
			}
			state = self.condvar.wait(state).unwrap();
		}
	}

	fn wait_next_timeout(&self, max_wait: Duration) -> Poll<Option<Result<T, APIError>>> {
		let start = Instant::now();
		let mut state = self.state.lock().unwrap();
		loop {
			if let Poll::Ready(res) = state.take_next() {
				return Poll::Ready(res);
			}
			// Spurious wakeups may return early, so recompute how long is left each time.
			let remaining = match max_wait.checked_sub(start.elapsed()) {
				Some(remaining) if remaining > Duration::ZERO => remaining,
				_ => return Poll::Pending,
			};
			state = self.condvar.wait_timeout(state, remaining).unwrap().0;
		}
	}

	fn poll_next(&self, cx: &mut Context<'_>) -> Poll<Option<Result<T, APIError>>> {
		let mut state = self.state.lock().unwrap();
		let res = state.take_next();
		if res.is_pending() && !state.wakers.iter().any(|w| w.will_wake(cx.waker())) {
			state.wakers.push(cx.waker().clone());
		}
		res
	}
}

/// The receiving end of a stream of updates.
///
/// Items are delivered in the order they were produced. After the last item the stream yields
/// `None`, preceded by exactly one `Err` if it was terminated by an error (e.g.
/// [`APIError::ShuttingDown`]).
///
/// Dropping the subscription unsubscribes without affecting whatever produces the updates.
pub struct Subscription<T> {
	queue: Arc<UpdateQueue<T>>,
}

impl<T> Subscription<T> {
	pub(crate) fn new(queue: Arc<UpdateQueue<T>>) -> Self {
		Self { queue }
	}

	/// Returns a future which resolves to the next update, or `None` once the stream has ended.
	pub fn next(&mut self) -> Recv<'_, T> {
		Recv { queue: &self.queue }
	}

	/// Blocks until the next update is available, or returns `None` once the stream has ended.
	pub fn wait_next(&mut self) -> Option<Result<T, APIError>> {
		self.queue.wait_next()
	}

	/// Like [`Self::wait_next`] but gives up after `max_wait`, returning [`Poll::Pending`].
	pub fn wait_next_timeout(&mut self, max_wait: Duration) -> Poll<Option<Result<T, APIError>>> {
		self.queue.wait_next_timeout(max_wait)
	}
}

impl<T> Drop for Subscription<T> {
	fn drop(&mut self) {
		self.queue.disconnect();
	}
}

/// A future returned by [`Subscription::next`].
pub struct Recv<'a, T> {
	queue: &'a UpdateQueue<T>,
}

impl<'a, T> StdFuture for Recv<'a, T> {
	type Output = Option<Result<T, APIError>>;

	fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
		self.queue.poll_next(cx)
	}
}
