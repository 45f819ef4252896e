//! FIFO dispatch of decoded parcels to a subscriber, with a "freeze" gate
//! for startup coordination and a cooperative at-most-one-pending-drain
//! scheduling rule.
//!
//! There is no bundled event loop here: the owning [`Connection`](crate::connection::Connection)
//! calls [`Dispatch::run`] whenever its own loop decides it is time to let
//! the queue drain, which is how a GLib idle callback gets translated for a
//! library that does not bring its own reactor.

use crate::parcel::Parcel;
use log::trace;
use std::collections::VecDeque;

/// A FIFO queue of decoded [`Parcel`]s awaiting dispatch to a subscriber.
#[derive(Debug, Default)]
pub struct Dispatch {
	queue: VecDeque<Parcel>,
	frozen: bool,
	drain_pending: bool,
}

impl Dispatch {
	pub fn new(frozen: bool) -> Self {
		Self { queue: VecDeque::new(), frozen, drain_pending: false }
	}

	/// Enqueue a parcel for later dispatch, preserving arrival order.
	pub fn push(&mut self, parcel: Parcel) {
		self.queue.push_back(parcel);
		self.drain_pending = true;
	}

	pub fn is_frozen(&self) -> bool {
		self.frozen
	}

	/// Idempotently lift the freeze, allowing queued and future parcels to
	/// be drained on the next [`run`](Self::run) call.
	pub fn start_message_processing(&mut self) {
		if self.frozen {
			trace!("unfreezing dispatch queue");
			self.frozen = false;
			if !self.queue.is_empty() {
				self.drain_pending = true;
			}
		}
	}

	/// True if a drain should be scheduled: there is at least one queued
	/// parcel, the queue is not frozen, and no drain has run since the last
	/// push. Mirrors an idle-callback scheduler's "only one pending
	/// invocation at a time" guarantee.
	pub fn needs_drain(&self) -> bool {
		self.drain_pending && !self.frozen && !self.queue.is_empty()
	}

	/// Hand every currently queued parcel to `on_parcel`, in arrival order,
	/// stopping early if the queue is frozen mid-drain or `on_parcel`
	/// returns `false`. A no-op while frozen.
	pub fn run(&mut self, mut on_parcel: impl FnMut(Parcel) -> bool) {
		self.drain_pending = false;
		if self.frozen {
			return;
		}
		while let Some(parcel) = self.queue.pop_front() {
			if self.frozen {
				self.queue.push_front(parcel);
				self.drain_pending = true;
				return;
			}
			if !on_parcel(parcel) {
				break;
			}
		}
	}

	/// Drop every parcel currently queued without dispatching it, as happens
	/// when the owning connection is cancelled or torn down.
	pub fn cancel(&mut self) {
		self.queue.clear();
		self.drain_pending = false;
	}

	pub fn len(&self) -> usize {
		self.queue.len()
	}

	pub fn is_empty(&self) -> bool {
		self.queue.is_empty()
	}
}
