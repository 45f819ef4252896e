use std::{io, sync::Arc};

/// Error taxonomy for the connection and parcel engines.
///
/// [`Error`] is `Clone` so that a single failure — in particular a one-shot
/// initialization failure — can be handed out as an owned copy to every
/// caller that observes it, rather than being consumed by the first one.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
	#[error("invalid argument: {0}")]
	InvalidArgument(String),

	#[error("operation cancelled")]
	Cancelled,

	#[error("transport I/O error: {0}")]
	Io(Arc<io::Error>),

	#[error("malformed protocol data: {0}")]
	Protocol(String),

	#[error("internal error: {0}")]
	Internal(String),
}

impl Error {
	pub fn invalid_argument(msg: impl Into<String>) -> Self {
		Self::InvalidArgument(msg.into())
	}

	pub fn protocol(msg: impl Into<String>) -> Self {
		Self::Protocol(msg.into())
	}

	pub fn internal(msg: impl Into<String>) -> Self {
		Self::Internal(msg.into())
	}

	/// True for errors that end the connection: transport I/O failures and
	/// framing-level protocol violations are fatal, unlike a malformed
	/// [`Parcel`](crate::parcel::Parcel), which is contained in that
	/// parcel's sticky flag and never reaches here.
	pub fn is_fatal(&self) -> bool {
		matches!(self, Self::Io(_) | Self::Protocol(_))
	}
}

impl From<io::Error> for Error {
	fn from(err: io::Error) -> Self {
		Self::Io(Arc::new(err))
	}
}

impl From<nix::Error> for Error {
	fn from(err: nix::Error) -> Self {
		Self::Io(Arc::new(io::Error::from(err)))
	}
}

pub type Result<T> = std::result::Result<T, Error>;
