//! A thin handle wrapping exactly one [`Connection`]. It has no behavior of
//! its own beyond owning and exposing that connection — opcode-level RIL
//! semantics live above this crate.

use crate::connection::Connection;

#[derive(Debug)]
pub struct Client {
	connection: Connection,
}

impl Client {
	pub fn new(connection: Connection) -> Self {
		Self { connection }
	}

	pub fn connection(&self) -> &Connection {
		&self.connection
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::os::unix::net::UnixStream;

	#[test]
	fn client_exposes_its_connection() {
		let (a, _b) = UnixStream::pair().unwrap();
		let connection =
			Connection::connect_stream_sync(a, crate::connection::ConnectionFlags::empty(), None).unwrap();
		let client = Client::new(connection);
		assert!(!client.connection().has_fatal_error());
	}
}
