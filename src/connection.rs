//! Connection lifecycle: one-shot idempotent initialization, non-blocking
//! frame extraction, and FIFO dispatch of decoded parcels to a subscriber.
//!
//! The library does not spawn worker threads and does not bundle an event
//! loop. A [`Connection`] exposes its raw file descriptor for the caller's
//! own epoll/select loop to register, and [`Connection::fill`] /
//! [`Connection::run_dispatch`] are the two methods that loop calls back
//! into whenever the descriptor becomes readable or the loop has a moment
//! to drain pending work.

use crate::{
	cancellable::Cancellable,
	dispatch::Dispatch,
	error::{Error, Result},
	frame::FrameReader,
	parcel::Parcel,
};
use bitflags::bitflags;
use log::{debug, trace, warn};
use nix::fcntl::{fcntl, FcntlArg, OFlag};
use once_cell::sync::OnceCell;
use std::{
	io::{Read, Write},
	os::unix::{
		io::{AsRawFd, RawFd},
		net::UnixStream,
	},
	path::PathBuf,
	sync::Mutex,
};

bitflags! {
	/// Flags accepted at construction time.
	pub struct ConnectionFlags: u32 {
		/// Start the connection with its dispatch queue frozen; the caller
		/// must call [`Connection::start_message_processing`] before any
		/// decoded parcel is handed to the subscriber.
		const DELAY_MESSAGE_PROCESSING = 1 << 0;
	}
}

impl Default for ConnectionFlags {
	fn default() -> Self {
		Self::empty()
	}
}

/// Anything a [`Connection`] can read frames from and write parcels to.
pub trait Transport: Read + Write + AsRawFd + Send {}
impl<T: Read + Write + AsRawFd + Send> Transport for T {}

enum Source {
	Stream(Box<dyn Transport>),
	Address(PathBuf),
}

struct State {
	transport: Box<dyn Transport>,
	frame_reader: FrameReader,
	dispatch: Dispatch,
	subscriber: Option<Box<dyn FnMut(Parcel) + Send>>,
	fatal_error: Option<Error>,
	/// Cancels pending fills during teardown. Distinct from the caller-
	/// supplied [`Cancellable`], which is only ever consulted once, at the
	/// top of [`Connection::init`] — cancelling it afterward has no effect
	/// on subsequent reads (§5).
	internal_cancellable: Cancellable,
}

/// A client connection to a RIL daemon over a stream transport.
///
/// Exactly one of a stream or an address is supplied at construction; that
/// choice, together with the requested [`ConnectionFlags`] and an optional
/// [`Cancellable`], is consumed the first time [`Connection::init`] (or one
/// of the `connect_*` constructors) runs. Initialization is idempotent: it
/// runs at most once, and every caller — concurrent or not — observes the
/// same outcome, cloned from a single stored result.
pub struct Connection {
	source: Mutex<Option<Source>>,
	address: Option<PathBuf>,
	flags: ConnectionFlags,
	cancellable: Option<Cancellable>,
	init: OnceCell<Result<()>>,
	state: Mutex<Option<State>>,
}

impl std::fmt::Debug for Connection {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Connection").field("initialized", &self.init.get().is_some()).finish()
	}
}

fn set_nonblocking(fd: RawFd) -> Result<()> {
	let flags = OFlag::from_bits_truncate(fcntl(fd, FcntlArg::F_GETFL)?);
	fcntl(fd, FcntlArg::F_SETFL(flags | OFlag::O_NONBLOCK))?;
	Ok(())
}

impl Connection {
	fn from_source(source: Source, flags: ConnectionFlags, cancellable: Option<Cancellable>) -> Self {
		let address = match &source {
			Source::Address(path) => Some(path.clone()),
			Source::Stream(_) => None,
		};
		Self {
			source: Mutex::new(Some(source)),
			address,
			flags,
			cancellable,
			init: OnceCell::new(),
			state: Mutex::new(None),
		}
	}

	/// Wrap an already-connected stream. Initialization happens
	/// synchronously, before this call returns.
	pub fn connect_stream_sync(
		stream: impl Transport + 'static,
		flags: ConnectionFlags,
		cancellable: Option<Cancellable>,
	) -> Result<Self> {
		let conn = Self::from_source(Source::Stream(Box::new(stream)), flags, cancellable);
		conn.init()?;
		Ok(conn)
	}

	/// Same contract as [`connect_stream_sync`](Self::connect_stream_sync),
	/// but reports its outcome through `callback` instead of a return value.
	/// There is no bundled executor to suspend on, so the synchronous work
	/// still happens before this call returns — the asynchronous shape is
	/// preserved for API parity with the synchronous constructors, not for
	/// genuine concurrency.
	pub fn connect_stream_async(
		stream: impl Transport + 'static,
		flags: ConnectionFlags,
		cancellable: Option<Cancellable>,
		mut callback: impl FnMut(Result<Self>),
	) {
		callback(Self::connect_stream_sync(stream, flags, cancellable));
	}

	/// Dial a Unix domain socket at `path`. Initialization happens
	/// synchronously, before this call returns.
	pub fn connect_address_sync(
		path: impl Into<PathBuf>,
		flags: ConnectionFlags,
		cancellable: Option<Cancellable>,
	) -> Result<Self> {
		let conn = Self::from_source(Source::Address(path.into()), flags, cancellable);
		conn.init()?;
		Ok(conn)
	}

	/// Asynchronous counterpart of
	/// [`connect_address_sync`](Self::connect_address_sync); see
	/// [`connect_stream_async`](Self::connect_stream_async) for why this
	/// still runs synchronously under the hood.
	pub fn connect_address_async(
		path: impl Into<PathBuf>,
		flags: ConnectionFlags,
		cancellable: Option<Cancellable>,
		mut callback: impl FnMut(Result<Self>),
	) {
		callback(Self::connect_address_sync(path, flags, cancellable));
	}

	/// Run the one-shot initialization sequence if it has not already run,
	/// and return a clone of its stored outcome. Safe to call from multiple
	/// threads sharing the same `Connection`: the first caller performs the
	/// work, every caller (including concurrent ones) observes the same
	/// result.
	///
	/// The sequence: (1) check cancellation, (2) take ownership of the
	/// construction-time source, dialing it if it was an address, (3) put
	/// the transport into non-blocking mode, (4) build the frame reader and
	/// dispatch queue, the latter frozen iff `DELAY_MESSAGE_PROCESSING` was
	/// requested, (5) create an internal cancellation handle for operations
	/// scoped to this connection's lifetime, (6) store the resulting state.
	pub fn init(&self) -> Result<()> {
		self.init.get_or_init(|| self.do_init()).clone()
	}

	fn do_init(&self) -> Result<()> {
		if let Some(cancellable) = &self.cancellable {
			cancellable.check()?;
		}

		let source = self
			.source
			.lock()
			.unwrap()
			.take()
			.ok_or_else(|| Error::internal("connection source consumed before init ran"))?;

		let transport: Box<dyn Transport> = match source {
			Source::Stream(stream) => stream,
			Source::Address(path) => {
				trace!("dialing {}", path.display());
				Box::new(UnixStream::connect(&path)?)
			},
		};

		set_nonblocking(transport.as_raw_fd())?;

		let frozen = self.flags.contains(ConnectionFlags::DELAY_MESSAGE_PROCESSING);
		debug!("connection initialized, dispatch {}", if frozen { "frozen" } else { "active" });

		*self.state.lock().unwrap() = Some(State {
			transport,
			frame_reader: FrameReader::new(),
			dispatch: Dispatch::new(frozen),
			subscriber: None,
			fatal_error: None,
			internal_cancellable: Cancellable::new(),
		});

		Ok(())
	}

	fn with_state<R>(&self, f: impl FnOnce(&mut State) -> R) -> Option<R> {
		self.state.lock().unwrap().as_mut().map(f)
	}

	/// The connection's raw file descriptor, for registering with the
	/// caller's own event loop. `None` before initialization has run.
	pub fn as_raw_fd(&self) -> Option<RawFd> {
		self.with_state(|state| state.transport.as_raw_fd())
	}

	/// The endpoint address this connection was constructed to dial, or
	/// `None` if it was instead constructed directly from a caller-supplied
	/// stream.
	pub fn get_address(&self) -> Option<&PathBuf> {
		self.address.as_ref()
	}

	/// The flags this connection was constructed with.
	pub fn get_flags(&self) -> ConnectionFlags {
		self.flags
	}

	/// Register a subscriber invoked with each parcel as
	/// [`run_dispatch`](Self::run_dispatch) drains the queue.
	pub fn subscribe(&self, callback: impl FnMut(Parcel) + Send + 'static) {
		self.with_state(|state| state.subscriber = Some(Box::new(callback)));
	}

	/// Idempotently lift the `DELAY_MESSAGE_PROCESSING` freeze.
	pub fn start_message_processing(&self) {
		self.with_state(|state| state.dispatch.start_message_processing());
	}

	/// True once a fatal transport or framing error has torn the connection
	/// down; no further frames will ever be delivered.
	pub fn has_fatal_error(&self) -> bool {
		self.with_state(|state| state.fatal_error.is_some()).unwrap_or(false)
	}

	/// Read as much as is available from the transport without blocking,
	/// extracting complete frames into parcels and pushing them onto the
	/// dispatch queue. Returns `Ok(true)` once the transport reaches EOF.
	///
	/// A transport I/O error or a framing violation is fatal: it is
	/// recorded, the connection stops accepting further fills, and the
	/// error is returned. A malformed parcel, by contrast, never reaches
	/// this far — it is contained within that parcel's own sticky flag.
	pub fn fill(&self) -> Result<bool> {
		let mut guard = self.state.lock().unwrap();
		let state = guard.as_mut().ok_or_else(|| Error::internal("connection not initialized"))?;

		if let Some(err) = &state.fatal_error {
			return Err(err.clone());
		}

		let eof = match state.frame_reader.fill(&mut state.transport) {
			Ok(eof) => eof,
			Err(io_err) => {
				let err = Error::from(io_err);
				warn!("connection fill failed fatally: {err}");
				state.fatal_error = Some(err.clone());
				return Err(err);
			},
		};

		while let Some(payload) = state.frame_reader.pop_frame() {
			state.dispatch.push(Parcel::from_bytes(payload));
		}

		Ok(eof)
	}

	/// Drain the dispatch queue, handing each parcel to the registered
	/// subscriber in arrival order. A no-op while the queue is frozen or
	/// has nothing pending.
	pub fn run_dispatch(&self) {
		let mut guard = self.state.lock().unwrap();
		let state = match guard.as_mut() {
			Some(state) => state,
			None => return,
		};
		let State { dispatch, subscriber, .. } = state;
		match subscriber {
			Some(subscriber) => dispatch.run(|parcel| {
				subscriber(parcel);
				true
			}),
			None => dispatch.run(|_| false),
		}
	}

	/// Cancel this connection's internal cancellation handle, aborting any
	/// in-flight fill and preventing future ones.
	///
	/// This does *not* flush or drop already-queued parcels: they still
	/// drain on the next [`run_dispatch`](Self::run_dispatch) call unless the
	/// connection is torn down first (§4.C of the wire spec — only
	/// destruction discards them).
	///
	/// This is distinct from the caller-supplied [`Cancellable`] passed at
	/// construction, which is only consulted once, at the top of
	/// [`init`](Self::init); cancelling that token afterward has no effect.
	pub fn cancel(&self) {
		self.with_state(|state| {
			state.internal_cancellable.cancel();
			if state.fatal_error.is_none() {
				state.fatal_error = Some(Error::Cancelled);
			}
		});
	}
}

impl Drop for Connection {
	/// Releases the internal cancellation handle (cancelling any pending
	/// fill) and discards any parcels still queued for dispatch, before the
	/// transport, frame reader, and dispatch queue are dropped along with
	/// the rest of the state. Nothing is flushed.
	fn drop(&mut self) {
		if let Some(state) = self.state.get_mut().unwrap().as_mut() {
			trace!("dropping connection, cancelling internal handle");
			state.internal_cancellable.cancel();
			state.dispatch.cancel();
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::{io::Write as _, os::unix::net::UnixStream};

	fn pad4(n: usize) -> usize {
		(n + 3) & !3
	}

	#[test]
	fn init_runs_exactly_once_and_is_idempotent() {
		let (a, _b) = UnixStream::pair().unwrap();
		let conn = Connection::connect_stream_sync(a, ConnectionFlags::empty(), None).unwrap();
		assert!(conn.init().is_ok());
		assert!(conn.init().is_ok());
	}

	#[test]
	fn delay_message_processing_freezes_dispatch_until_released() {
		let (a, mut b) = UnixStream::pair().unwrap();
		let conn =
			Connection::connect_stream_sync(a, ConnectionFlags::DELAY_MESSAGE_PROCESSING, None).unwrap();

		let payload = [0xaa, 0xbb, 0xcc, 0xdd];
		let mut frame = (payload.len() as u32).to_le_bytes().to_vec();
		frame.extend_from_slice(&payload);
		b.write_all(&frame).unwrap();

		conn.fill().unwrap();

		let received = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
		let received_clone = received.clone();
		conn.subscribe(move |parcel| {
			received_clone.lock().unwrap().push(parcel.size());
		});

		conn.run_dispatch();
		assert!(received.lock().unwrap().is_empty(), "dispatch must stay frozen");

		conn.start_message_processing();
		conn.run_dispatch();
		assert_eq!(received.lock().unwrap().as_slice(), &[pad4(payload.len())]);
	}

	#[test]
	fn fill_delivers_frame_across_two_writes() {
		let (a, mut b) = UnixStream::pair().unwrap();
		let conn = Connection::connect_stream_sync(a, ConnectionFlags::empty(), None).unwrap();

		let payload = b"hello world";
		let mut frame = (payload.len() as u32).to_le_bytes().to_vec();
		frame.extend_from_slice(payload);

		b.write_all(&frame[..5]).unwrap();
		let _ = conn.fill();
		b.write_all(&frame[5..]).unwrap();
		let _ = conn.fill();

		let received = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
		let received_clone = received.clone();
		conn.subscribe(move |parcel| {
			let mut buf = vec![0u8; payload.len()];
			parcel.read(&mut buf);
			received_clone.lock().unwrap().push(buf);
		});
		conn.run_dispatch();

		assert_eq!(received.lock().unwrap().as_slice(), &[payload.to_vec()]);
	}

	#[test]
	fn fatal_io_error_is_recorded_and_returned_to_every_caller() {
		crate::init_test_logging();
		let (a, b) = UnixStream::pair().unwrap();
		drop(b);
		let conn = Connection::connect_stream_sync(a, ConnectionFlags::empty(), None).unwrap();
		// peer dropped: eventually a read reports EOF (Ok(true)), not an error
		// on a Unix socket pair, so this asserts the fill() call at least
		// completes without panicking and is safe to call repeatedly.
		let _ = conn.fill();
		let _ = conn.fill();
	}

	#[test]
	fn cancel_is_fatal_but_still_drains_already_queued_parcels() {
		let (a, mut b) = UnixStream::pair().unwrap();
		let conn = Connection::connect_stream_sync(a, ConnectionFlags::empty(), None).unwrap();

		let payload = [1, 2, 3, 4];
		let mut frame = (payload.len() as u32).to_le_bytes().to_vec();
		frame.extend_from_slice(&payload);
		b.write_all(&frame).unwrap();
		conn.fill().unwrap();

		conn.cancel();
		assert!(conn.has_fatal_error());
		assert!(matches!(conn.fill(), Err(Error::Cancelled)), "cancel must prevent future fills");

		let received = std::sync::Arc::new(std::sync::Mutex::new(0usize));
		let received_clone = received.clone();
		conn.subscribe(move |_| {
			*received_clone.lock().unwrap() += 1;
		});
		conn.run_dispatch();
		assert_eq!(
			*received.lock().unwrap(),
			1,
			"cancel must not flush or drop already-queued parcels; only destruction does"
		);
	}

	#[test]
	fn dropping_a_connection_discards_queued_parcels() {
		let (a, mut b) = UnixStream::pair().unwrap();
		let conn = Connection::connect_stream_sync(a, ConnectionFlags::empty(), None).unwrap();

		let payload = [9, 9, 9, 9];
		let mut frame = (payload.len() as u32).to_le_bytes().to_vec();
		frame.extend_from_slice(&payload);
		b.write_all(&frame).unwrap();
		conn.fill().unwrap();

		let dispatch_len = conn.with_state(|state| state.dispatch.len());
		assert_eq!(dispatch_len, Some(1));
		drop(conn);
		// nothing left to observe directly once dropped; the assertion of
		// interest is that this does not panic and the parcel is gone along
		// with the rest of `State`.
	}

	#[test]
	fn get_address_reflects_construction_source() {
		let (a, _b) = UnixStream::pair().unwrap();
		let from_stream = Connection::connect_stream_sync(a, ConnectionFlags::empty(), None).unwrap();
		assert!(from_stream.get_address().is_none());
		assert_eq!(from_stream.get_flags(), ConnectionFlags::empty());
	}
}
